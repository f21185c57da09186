//! Filter predicates evaluated over Arrow record batches.
//!
//! Expressions are trees of [`TesseraExpr`] nodes shared as [`ExprRef`]. A scan inspects a
//! predicate to learn which columns it reads (see [`TesseraExprExt::references`]) and then
//! evaluates it against each decoded batch to produce a selection mask.

use std::any::Any;
use std::collections::BTreeSet;
use std::fmt::{Debug, Display};
use std::sync::Arc;

use arrow_array::{BooleanArray, RecordBatch};
use arrow_array::cast::AsArray;
use tessera_error::{TesseraExpect, TesseraResult, tessera_err};

mod binary;
mod column;
mod is_null;
mod literal;
mod not;
mod operators;
pub mod traversal;
mod value;

pub use binary::*;
pub use column::*;
pub use is_null::*;
pub use literal::*;
pub use not::*;
pub use operators::*;
pub use value::*;

use crate::traversal::{Node, ReferenceCollector};

/// The name of a top-level column.
pub type FieldName = Arc<str>;

pub type ExprRef = Arc<dyn TesseraExpr>;

/// Represents a logical operation over the columns of a [`RecordBatch`].
pub trait TesseraExpr: Debug + Send + Sync + DynEq + Display {
    /// Convert expression reference to reference of [`Any`] type
    fn as_any(&self) -> &dyn Any;

    /// Compute result of expression on given batch.
    fn evaluate(&self, batch: &RecordBatch) -> TesseraResult<ColumnarValue>;

    fn children(&self) -> Vec<&ExprRef>;
}

pub trait TesseraExprExt {
    /// Accumulate all column references from this expression and its children in a set
    fn references(&self) -> BTreeSet<FieldName>;

    /// Evaluate a predicate to one selection flag per row of `batch`.
    ///
    /// Fails if the expression does not produce booleans.
    fn evaluate_mask(&self, batch: &RecordBatch) -> TesseraResult<BooleanArray>;
}

impl TesseraExprExt for ExprRef {
    fn references(&self) -> BTreeSet<FieldName> {
        let mut collector = ReferenceCollector::new();
        // The collector is infallible, so we can unwrap the result
        self.accept(&mut collector)
            .tessera_expect("reference collector should never fail");
        collector.into_fields()
    }

    fn evaluate_mask(&self, batch: &RecordBatch) -> TesseraResult<BooleanArray> {
        let array = self.evaluate(batch)?.into_array(batch.num_rows())?;
        let mask = array.as_boolean_opt().ok_or_else(|| {
            tessera_err!(
                "filter {} evaluates to {}, expected a boolean",
                self,
                array.data_type()
            )
        })?;
        Ok(mask.clone())
    }
}

/// Splits top level and operations into separate expressions
pub fn split_conjunction(expr: &ExprRef) -> Vec<ExprRef> {
    let mut conjunctions = vec![];
    split_inner(expr, &mut conjunctions);
    conjunctions
}

fn split_inner(expr: &ExprRef, exprs: &mut Vec<ExprRef>) {
    match expr.as_any().downcast_ref::<BinaryExpr>() {
        Some(bexp) if bexp.op() == Operator::And => {
            split_inner(bexp.lhs(), exprs);
            split_inner(bexp.rhs(), exprs);
        }
        Some(_) | None => {
            exprs.push(expr.clone());
        }
    }
}

/// Combines a list of expressions into a single conjunction, or `None` if the list is empty.
pub fn conjunction(exprs: impl IntoIterator<Item = ExprRef>) -> Option<ExprRef> {
    exprs.into_iter().reduce(and)
}

// Adapted from apache/datafusion https://github.com/apache/datafusion/blob/f31ca5b927c040ce03f6a3c8c8dc3d7f4ef5be34/datafusion/physical-expr-common/src/physical_expr.rs#L156
/// [`TesseraExpr`] can't be constrained by [`Eq`] directly because it must remain object
/// safe. To ease implementation blanket implementation is provided for [`Eq`] types.
pub trait DynEq {
    fn dyn_eq(&self, other: &dyn Any) -> bool;
}

impl<T: Eq + Any> DynEq for T {
    fn dyn_eq(&self, other: &dyn Any) -> bool {
        other.downcast_ref::<Self>() == Some(self)
    }
}

impl PartialEq for dyn TesseraExpr {
    fn eq(&self, other: &Self) -> bool {
        self.dyn_eq(other.as_any())
    }
}

impl Eq for dyn TesseraExpr {}
