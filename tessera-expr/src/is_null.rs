use std::any::Any;
use std::fmt::Display;
use std::sync::Arc;

use arrow_arith::boolean;
use arrow_array::{ArrayRef, RecordBatch};
use tessera_error::TesseraResult;

use crate::{ColumnarValue, ExprRef, TesseraExpr};

#[derive(Debug, Eq)]
pub struct IsNull {
    child: ExprRef,
}

impl PartialEq for IsNull {
    fn eq(&self, other: &Self) -> bool {
        self.child.eq(&other.child)
    }
}

impl IsNull {
    pub fn new_expr(child: ExprRef) -> ExprRef {
        Arc::new(Self { child })
    }

    pub fn child(&self) -> &ExprRef {
        &self.child
    }
}

impl Display for IsNull {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "is_null({})", self.child)
    }
}

impl TesseraExpr for IsNull {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn evaluate(&self, batch: &RecordBatch) -> TesseraResult<ColumnarValue> {
        let array = self.child.evaluate(batch)?.into_array(batch.num_rows())?;
        let nulls: ArrayRef = Arc::new(boolean::is_null(array.as_ref())?);
        Ok(ColumnarValue::Array(nulls))
    }

    fn children(&self) -> Vec<&ExprRef> {
        vec![&self.child]
    }
}

pub fn is_null(child: ExprRef) -> ExprRef {
    IsNull::new_expr(child)
}

/// Shorthand for `not(is_null(child))`.
pub fn is_not_null(child: ExprRef) -> ExprRef {
    crate::not(is_null(child))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow_array::cast::AsArray;
    use arrow_array::{Int32Array, RecordBatch};

    use crate::{col, is_not_null, is_null, TesseraExpr};

    #[test]
    fn null_mask() {
        let batch = RecordBatch::try_from_iter([(
            "a",
            Arc::new(Int32Array::from(vec![Some(1), None, Some(3)])) as _,
        )])
        .unwrap();

        let nulls = is_null(col("a"))
            .evaluate(&batch)
            .unwrap()
            .into_array(3)
            .unwrap();
        assert_eq!(
            nulls.as_boolean().iter().collect::<Vec<_>>(),
            vec![Some(false), Some(true), Some(false)]
        );

        let valid = is_not_null(col("a"))
            .evaluate(&batch)
            .unwrap()
            .into_array(3)
            .unwrap();
        assert_eq!(
            valid.as_boolean().iter().collect::<Vec<_>>(),
            vec![Some(true), Some(false), Some(true)]
        );
    }
}
