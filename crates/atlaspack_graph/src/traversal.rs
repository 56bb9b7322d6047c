use crate::NodeId;

/// What a traversal should do after a node has been visited.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TraversalAction {
  Continue,
  /// Do not descend into the children of this node. Its `exit` is not called.
  SkipChildren,
  /// Abort the traversal entirely.
  Stop,
}

/// Depth first visitor.
///
/// `parent` is the node the traversal arrived from, or `None` for the start
/// node. Errors abort the traversal and are returned to the caller.
pub trait GraphVisitor<N> {
  fn enter(
    &mut self,
    node_id: NodeId,
    node: &N,
    parent: Option<NodeId>,
  ) -> anyhow::Result<TraversalAction>;

  fn exit(
    &mut self,
    _node_id: NodeId,
    _node: &N,
    _parent: Option<NodeId>,
  ) -> anyhow::Result<TraversalAction> {
    Ok(TraversalAction::Continue)
  }
}

/// Adapts an `enter` closure into a [`GraphVisitor`].
pub(crate) struct EnterFn<F>(pub F);

impl<N, F> GraphVisitor<N> for EnterFn<F>
where
  F: FnMut(NodeId, &N, Option<NodeId>) -> anyhow::Result<TraversalAction>,
{
  fn enter(
    &mut self,
    node_id: NodeId,
    node: &N,
    parent: Option<NodeId>,
  ) -> anyhow::Result<TraversalAction> {
    (self.0)(node_id, node, parent)
  }
}

/// Collects nodes in post order, used for topological sorting.
#[derive(Default)]
pub(crate) struct PostOrder {
  pub order: Vec<NodeId>,
}

impl<N> GraphVisitor<N> for PostOrder {
  fn enter(&mut self, _: NodeId, _: &N, _: Option<NodeId>) -> anyhow::Result<TraversalAction> {
    Ok(TraversalAction::Continue)
  }

  fn exit(&mut self, node_id: NodeId, _: &N, _: Option<NodeId>) -> anyhow::Result<TraversalAction> {
    self.order.push(node_id);
    Ok(TraversalAction::Continue)
  }
}
