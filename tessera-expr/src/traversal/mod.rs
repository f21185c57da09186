mod references;

pub use references::ReferenceCollector;
use tessera_error::TesseraResult;

use crate::ExprRef;

/// A pre-order traversal over expression trees.
///
/// `TraversalOrder` controls the walk:
/// - `Skip`: Skip visiting the children of the current node.
/// - `Stop`: Stop visiting any more nodes in the traversal.
/// - `Continue`: Continue with the traversal as expected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraversalOrder {
    Skip,
    Stop,
    Continue,
}

pub trait NodeVisitor<'a> {
    type NodeTy: Node;

    fn visit_down(&mut self, _node: &'a Self::NodeTy) -> TesseraResult<TraversalOrder> {
        Ok(TraversalOrder::Continue)
    }

    fn visit_up(&mut self, _node: &'a Self::NodeTy) -> TesseraResult<TraversalOrder> {
        Ok(TraversalOrder::Continue)
    }
}

pub trait Node: Sized {
    fn accept<'a, V: NodeVisitor<'a, NodeTy = Self>>(
        &'a self,
        visitor: &mut V,
    ) -> TesseraResult<TraversalOrder>;
}

impl Node for ExprRef {
    fn accept<'a, V: NodeVisitor<'a, NodeTy = ExprRef>>(
        &'a self,
        visitor: &mut V,
    ) -> TesseraResult<TraversalOrder> {
        let mut ord = visitor.visit_down(self)?;
        if ord == TraversalOrder::Stop {
            return Ok(TraversalOrder::Stop);
        }
        if ord == TraversalOrder::Skip {
            return Ok(TraversalOrder::Continue);
        }
        for child in self.children() {
            if ord != TraversalOrder::Continue {
                return Ok(ord);
            }
            ord = child.accept(visitor)?;
        }

        if ord == TraversalOrder::Stop {
            return Ok(TraversalOrder::Stop);
        }

        visitor.visit_up(self)
    }
}
