use std::any::Any;
use std::fmt::Display;
use std::sync::Arc;

use arrow_arith::boolean::{and_kleene, or_kleene};
use arrow_array::{ArrayRef, BooleanArray, Datum, RecordBatch, Scalar};
use arrow_array::cast::AsArray;
use arrow_cast::{CastOptions, cast_with_options};
use arrow_ord::cmp;
use arrow_schema::DataType;
use tessera_error::{TesseraResult, tessera_err};

use crate::{ColumnarValue, ExprRef, Operator, TesseraExpr};

#[derive(Debug, Clone, Eq)]
pub struct BinaryExpr {
    lhs: ExprRef,
    operator: Operator,
    rhs: ExprRef,
}

impl PartialEq for BinaryExpr {
    fn eq(&self, other: &Self) -> bool {
        self.lhs.eq(&other.lhs) && self.operator.eq(&other.operator) && self.rhs.eq(&other.rhs)
    }
}

impl BinaryExpr {
    pub fn new_expr(lhs: ExprRef, operator: Operator, rhs: ExprRef) -> ExprRef {
        Arc::new(Self { lhs, operator, rhs })
    }

    pub fn lhs(&self) -> &ExprRef {
        &self.lhs
    }

    pub fn rhs(&self) -> &ExprRef {
        &self.rhs
    }

    pub fn op(&self) -> Operator {
        self.operator
    }
}

impl Display for BinaryExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} {} {})", self.lhs, self.operator, self.rhs)
    }
}

impl TesseraExpr for BinaryExpr {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn evaluate(&self, batch: &RecordBatch) -> TesseraResult<ColumnarValue> {
        let lhs = self.lhs.evaluate(batch)?;
        let rhs = self.rhs.evaluate(batch)?;
        let both_scalar = lhs.is_scalar() && rhs.is_scalar();
        let (lhs, rhs) = if self.operator.is_comparison() {
            coerce_operands(lhs, rhs)?
        } else {
            (lhs, rhs)
        };

        let result = match self.operator {
            Operator::Eq => cmp::eq(&lhs, &rhs)?,
            Operator::NotEq => cmp::neq(&lhs, &rhs)?,
            Operator::Gt => cmp::gt(&lhs, &rhs)?,
            Operator::Gte => cmp::gt_eq(&lhs, &rhs)?,
            Operator::Lt => cmp::lt(&lhs, &rhs)?,
            Operator::Lte => cmp::lt_eq(&lhs, &rhs)?,
            Operator::And | Operator::Or => {
                let len = if both_scalar { 1 } else { batch.num_rows() };
                let lhs = boolean_operand(lhs.into_array(len)?, &self.lhs)?;
                let rhs = boolean_operand(rhs.into_array(len)?, &self.rhs)?;
                if self.operator == Operator::And {
                    and_kleene(lhs.as_boolean(), rhs.as_boolean())?
                } else {
                    or_kleene(lhs.as_boolean(), rhs.as_boolean())?
                }
            }
        };

        let result: ArrayRef = Arc::new(result);
        Ok(if both_scalar {
            ColumnarValue::Scalar(Scalar::new(result))
        } else {
            ColumnarValue::Array(result)
        })
    }

    fn children(&self) -> Vec<&ExprRef> {
        vec![&self.lhs, &self.rhs]
    }
}

/// Cast a numeric literal to the type of the column it is compared against.
///
/// Integer literals coerce to any integer or float column, float literals only to float
/// columns. A literal that does not fit the column type is an error.
fn coerce_operands(
    lhs: ColumnarValue,
    rhs: ColumnarValue,
) -> TesseraResult<(ColumnarValue, ColumnarValue)> {
    match (lhs.is_scalar(), rhs.is_scalar()) {
        (false, true) => {
            let target = lhs.get().0.data_type().clone();
            Ok((lhs, coerce_literal(rhs, &target)?))
        }
        (true, false) => {
            let target = rhs.get().0.data_type().clone();
            Ok((coerce_literal(lhs, &target)?, rhs))
        }
        _ => Ok((lhs, rhs)),
    }
}

fn coerce_literal(value: ColumnarValue, target: &DataType) -> TesseraResult<ColumnarValue> {
    let (literal, _) = value.get();
    let source = literal.data_type();
    let coercible = source != target
        && ((source.is_integer() && (target.is_integer() || target.is_floating()))
            || (source.is_floating() && target.is_floating()));
    if !coercible {
        return Ok(value);
    }

    let options = CastOptions {
        safe: false,
        ..Default::default()
    };
    let cast = cast_with_options(literal, target, &options)
        .map_err(|_| tessera_err!("literal of type {} does not fit {}", source, target))?;
    Ok(ColumnarValue::Scalar(Scalar::new(cast)))
}

pub(crate) fn boolean_operand(array: ArrayRef, expr: &ExprRef) -> TesseraResult<ArrayRef> {
    if array.as_any().downcast_ref::<BooleanArray>().is_none() {
        return Err(tessera_err!(
            "expression {} evaluates to {}, expected a boolean",
            expr,
            array.data_type()
        ));
    }
    Ok(array)
}

/// Create a new `BinaryExpr` using the `Eq` operator.
pub fn eq(lhs: ExprRef, rhs: ExprRef) -> ExprRef {
    BinaryExpr::new_expr(lhs, Operator::Eq, rhs)
}

/// Create a new `BinaryExpr` using the `NotEq` operator.
pub fn not_eq(lhs: ExprRef, rhs: ExprRef) -> ExprRef {
    BinaryExpr::new_expr(lhs, Operator::NotEq, rhs)
}

/// Create a new `BinaryExpr` using the `Gte` operator.
pub fn gt_eq(lhs: ExprRef, rhs: ExprRef) -> ExprRef {
    BinaryExpr::new_expr(lhs, Operator::Gte, rhs)
}

/// Create a new `BinaryExpr` using the `Gt` operator.
///
/// ## Example usage
///
/// ```
/// use std::sync::Arc;
///
/// use arrow_array::{Int64Array, RecordBatch};
/// use arrow_array::cast::AsArray;
/// use tessera_expr::{col, gt, lit};
///
/// let batch = RecordBatch::try_from_iter([
///     ("id", Arc::new(Int64Array::from(vec![1, 2, 3])) as _),
/// ]).unwrap();
/// let mask = gt(col("id"), lit(1i64))
///     .evaluate(&batch)
///     .unwrap()
///     .into_array(batch.num_rows())
///     .unwrap();
///
/// assert_eq!(
///     mask.as_boolean().iter().collect::<Vec<_>>(),
///     vec![Some(false), Some(true), Some(true)],
/// );
/// ```
pub fn gt(lhs: ExprRef, rhs: ExprRef) -> ExprRef {
    BinaryExpr::new_expr(lhs, Operator::Gt, rhs)
}

/// Create a new `BinaryExpr` using the `Lte` operator.
pub fn lt_eq(lhs: ExprRef, rhs: ExprRef) -> ExprRef {
    BinaryExpr::new_expr(lhs, Operator::Lte, rhs)
}

/// Create a new `BinaryExpr` using the `Lt` operator.
pub fn lt(lhs: ExprRef, rhs: ExprRef) -> ExprRef {
    BinaryExpr::new_expr(lhs, Operator::Lt, rhs)
}

/// Create a new `BinaryExpr` using the `Or` operator.
pub fn or(lhs: ExprRef, rhs: ExprRef) -> ExprRef {
    BinaryExpr::new_expr(lhs, Operator::Or, rhs)
}

/// Create a new `BinaryExpr` using the `And` operator.
pub fn and(lhs: ExprRef, rhs: ExprRef) -> ExprRef {
    BinaryExpr::new_expr(lhs, Operator::And, rhs)
}
