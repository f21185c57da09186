use std::any::Any;
use std::fmt::Display;
use std::sync::Arc;

use arrow_array::RecordBatch;
use tessera_error::TesseraResult;

use crate::{ColumnarValue, ExprRef, ScalarValue, TesseraExpr};

#[derive(Debug, PartialEq, Eq)]
pub struct Literal {
    value: ScalarValue,
}

impl Literal {
    pub fn new_expr(value: ScalarValue) -> ExprRef {
        Arc::new(Self { value })
    }

    pub fn value(&self) -> &ScalarValue {
        &self.value
    }
}

impl Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl TesseraExpr for Literal {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn evaluate(&self, _batch: &RecordBatch) -> TesseraResult<ColumnarValue> {
        Ok(ColumnarValue::Scalar(self.value.to_scalar()))
    }

    fn children(&self) -> Vec<&ExprRef> {
        vec![]
    }
}

/// Create a new `Literal` expression from a type that coerces to [`ScalarValue`].
///
/// ## Example usage
///
/// ```
/// use tessera_expr::{lit, Literal, ScalarValue};
///
/// let number = lit(34i64);
///
/// let literal = number.as_any()
///     .downcast_ref::<Literal>()
///     .unwrap();
/// assert_eq!(literal.value(), &ScalarValue::Int64(34));
/// ```
pub fn lit(value: impl Into<ScalarValue>) -> ExprRef {
    Literal::new_expr(value.into())
}
