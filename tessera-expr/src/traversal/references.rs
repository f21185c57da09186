use std::collections::BTreeSet;

use tessera_error::TesseraResult;

use crate::traversal::{NodeVisitor, TraversalOrder};
use crate::{Column, ExprRef, FieldName};

#[derive(Debug, Default)]
pub struct ReferenceCollector {
    fields: BTreeSet<FieldName>,
}

impl ReferenceCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_fields(self) -> BTreeSet<FieldName> {
        self.fields
    }
}

impl<'a> NodeVisitor<'a> for ReferenceCollector {
    type NodeTy = ExprRef;

    fn visit_up(&mut self, node: &'a ExprRef) -> TesseraResult<TraversalOrder> {
        if let Some(col) = node.as_any().downcast_ref::<Column>() {
            self.fields.insert(col.name().clone());
        }
        Ok(TraversalOrder::Continue)
    }
}
