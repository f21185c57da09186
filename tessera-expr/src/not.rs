use std::any::Any;
use std::fmt::Display;
use std::sync::Arc;

use arrow_arith::boolean;
use arrow_array::cast::AsArray;
use arrow_array::{ArrayRef, RecordBatch, Scalar};
use tessera_error::TesseraResult;

use crate::binary::boolean_operand;
use crate::{ColumnarValue, ExprRef, TesseraExpr};

#[derive(Debug, Eq)]
pub struct Not {
    child: ExprRef,
}

impl PartialEq for Not {
    fn eq(&self, other: &Self) -> bool {
        self.child.eq(&other.child)
    }
}

impl Not {
    pub fn new_expr(child: ExprRef) -> ExprRef {
        Arc::new(Self { child })
    }

    pub fn child(&self) -> &ExprRef {
        &self.child
    }
}

impl Display for Not {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "!{}", self.child)
    }
}

impl TesseraExpr for Not {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn evaluate(&self, batch: &RecordBatch) -> TesseraResult<ColumnarValue> {
        let value = self.child.evaluate(batch)?;
        let scalar = value.is_scalar();
        let array = boolean_operand(value.into_array(if scalar { 1 } else { batch.num_rows() })?, &self.child)?;
        let negated: ArrayRef = Arc::new(boolean::not(array.as_boolean())?);
        Ok(if scalar {
            ColumnarValue::Scalar(Scalar::new(negated))
        } else {
            ColumnarValue::Array(negated)
        })
    }

    fn children(&self) -> Vec<&ExprRef> {
        vec![&self.child]
    }
}

pub fn not(operand: ExprRef) -> ExprRef {
    Not::new_expr(operand)
}
