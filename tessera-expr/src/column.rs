use std::any::Any;
use std::fmt::Display;
use std::sync::Arc;

use arrow_array::RecordBatch;
use tessera_error::{TesseraResult, tessera_err};

use crate::{ColumnarValue, ExprRef, FieldName, TesseraExpr};

/// A reference to a top-level column of the batch, by name.
#[derive(Debug, PartialEq, Hash, Clone, Eq)]
pub struct Column {
    name: FieldName,
}

impl Column {
    pub fn new_expr(name: impl Into<FieldName>) -> ExprRef {
        Arc::new(Self { name: name.into() })
    }

    pub fn name(&self) -> &FieldName {
        &self.name
    }
}

impl Display for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${}", self.name)
    }
}

impl TesseraExpr for Column {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn evaluate(&self, batch: &RecordBatch) -> TesseraResult<ColumnarValue> {
        batch
            .column_by_name(&self.name)
            .cloned()
            .map(ColumnarValue::Array)
            .ok_or_else(|| tessera_err!(ColumnNotFound: "batch has no column {}", self.name))
    }

    fn children(&self) -> Vec<&ExprRef> {
        vec![]
    }
}

pub fn col(name: impl Into<FieldName>) -> ExprRef {
    Column::new_expr(name)
}
