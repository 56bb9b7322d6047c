use std::collections::{HashMap, HashSet};

use anyhow::anyhow;
use petgraph::graph::{EdgeIndex, NodeIndex};
use petgraph::stable_graph::StableDiGraph;
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use petgraph::Direction;

use crate::traversal::{EnterFn, GraphVisitor, PostOrder, TraversalAction};
use crate::BitSet;

pub type NodeId = usize;

/// Restricts an edge query to a single edge type.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EdgeFilter<E> {
  All,
  Only(E),
}

impl<E: PartialEq> EdgeFilter<E> {
  pub fn matches(&self, edge_type: &E) -> bool {
    match self {
      EdgeFilter::All => true,
      EdgeFilter::Only(expected) => expected == edge_type,
    }
  }
}

/// Directed graph with stable integer node ids and typed edges.
///
/// Node ids are allocated sequentially and never reused, so they can index
/// into side tables and bit sets even after nodes have been removed. At most
/// one edge of each type exists between two nodes. Neighbor queries return
/// nodes in edge insertion order.
#[derive(Clone, Debug)]
pub struct Graph<N, E> {
  graph: StableDiGraph<NodeId, E>,
  nodes: Vec<Option<N>>,
  node_id_to_node_index: HashMap<NodeId, NodeIndex>,
  root_node_id: Option<NodeId>,
}

impl<N, E> Default for Graph<N, E> {
  fn default() -> Self {
    Self {
      graph: StableDiGraph::default(),
      nodes: Vec::new(),
      node_id_to_node_index: HashMap::new(),
      root_node_id: None,
    }
  }
}

impl<N, E> Graph<N, E>
where
  E: Copy + PartialEq,
{
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add_node(&mut self, node: N) -> NodeId {
    let node_id = self.nodes.len();
    self.nodes.push(Some(node));
    let node_index = self.graph.add_node(node_id);
    self.node_id_to_node_index.insert(node_id, node_index);
    node_id
  }

  pub fn has_node(&self, node_id: NodeId) -> bool {
    self.node_id_to_node_index.contains_key(&node_id)
  }

  pub fn get_node(&self, node_id: NodeId) -> Option<&N> {
    self.nodes.get(node_id)?.as_ref()
  }

  pub fn get_node_mut(&mut self, node_id: NodeId) -> Option<&mut N> {
    self.nodes.get_mut(node_id)?.as_mut()
  }

  /// Removes a node along with every edge touching it.
  pub fn remove_node(&mut self, node_id: NodeId) -> anyhow::Result<N> {
    let node_index = self
      .node_id_to_node_index
      .remove(&node_id)
      .ok_or_else(|| anyhow!("Cannot remove node {node_id}, it does not exist"))?;

    self.graph.remove_node(node_index);
    if self.root_node_id == Some(node_id) {
      self.root_node_id = None;
    }

    self
      .nodes
      .get_mut(node_id)
      .and_then(Option::take)
      .ok_or_else(|| anyhow!("Node {node_id} has no value"))
  }

  /// Number of live nodes.
  pub fn node_count(&self) -> usize {
    self.node_id_to_node_index.len()
  }

  /// One past the largest node id ever allocated.
  pub fn node_id_limit(&self) -> usize {
    self.nodes.len()
  }

  pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &N)> {
    self
      .nodes
      .iter()
      .enumerate()
      .filter_map(|(node_id, node)| node.as_ref().map(|node| (node_id, node)))
  }

  pub fn set_root_node_id(&mut self, node_id: NodeId) {
    self.root_node_id = Some(node_id);
  }

  pub fn root_node_id(&self) -> Option<NodeId> {
    self.root_node_id
  }

  fn node_index(&self, node_id: NodeId) -> anyhow::Result<NodeIndex> {
    self
      .node_id_to_node_index
      .get(&node_id)
      .copied()
      .ok_or_else(|| anyhow!("Node {node_id} does not exist"))
  }

  fn edges_between(&self, from: NodeId, to: NodeId, filter: EdgeFilter<E>) -> Vec<EdgeIndex> {
    let (Some(from_index), Some(to_index)) = (
      self.node_id_to_node_index.get(&from),
      self.node_id_to_node_index.get(&to),
    ) else {
      return Vec::new();
    };

    self
      .graph
      .edges_directed(*from_index, Direction::Outgoing)
      .filter(|edge| edge.target() == *to_index && filter.matches(edge.weight()))
      .map(|edge| edge.id())
      .collect()
  }

  /// Adds an edge, returning `false` if an edge of the same type already exists.
  pub fn add_edge(&mut self, from: NodeId, to: NodeId, edge_type: E) -> anyhow::Result<bool> {
    let from_index = self.node_index(from)?;
    let to_index = self.node_index(to)?;

    if self.has_edge(from, to, EdgeFilter::Only(edge_type)) {
      return Ok(false);
    }

    self.graph.add_edge(from_index, to_index, edge_type);
    Ok(true)
  }

  pub fn has_edge(&self, from: NodeId, to: NodeId, filter: EdgeFilter<E>) -> bool {
    !self.edges_between(from, to, filter).is_empty()
  }

  /// Removes matching edges, returning whether any existed.
  pub fn remove_edge(&mut self, from: NodeId, to: NodeId, filter: EdgeFilter<E>) -> bool {
    let edges = self.edges_between(from, to, filter);
    for edge in &edges {
      self.graph.remove_edge(*edge);
    }
    !edges.is_empty()
  }

  fn neighbors(&self, node_id: NodeId, filter: EdgeFilter<E>, direction: Direction) -> Vec<NodeId> {
    let Some(node_index) = self.node_id_to_node_index.get(&node_id) else {
      return Vec::new();
    };

    let mut neighbors = self
      .graph
      .edges_directed(*node_index, direction)
      .filter(|edge| filter.matches(edge.weight()))
      .filter_map(|edge| {
        let other = match direction {
          Direction::Outgoing => edge.target(),
          Direction::Incoming => edge.source(),
        };
        self.graph.node_weight(other).copied()
      })
      .collect::<Vec<_>>();

    // petgraph yields the most recently added edge first
    neighbors.reverse();

    let mut seen = HashSet::new();
    neighbors.retain(|node_id| seen.insert(*node_id));
    neighbors
  }

  pub fn get_node_ids_connected_from(&self, node_id: NodeId, filter: EdgeFilter<E>) -> Vec<NodeId> {
    self.neighbors(node_id, filter, Direction::Outgoing)
  }

  pub fn get_node_ids_connected_to(&self, node_id: NodeId, filter: EdgeFilter<E>) -> Vec<NodeId> {
    self.neighbors(node_id, filter, Direction::Incoming)
  }

  /// All edges as `(from, to, type)` triples.
  pub fn edges(&self) -> Vec<(NodeId, NodeId, E)> {
    self
      .graph
      .edge_references()
      .filter_map(|edge| {
        let from = *self.graph.node_weight(edge.source())?;
        let to = *self.graph.node_weight(edge.target())?;
        Some((from, to, *edge.weight()))
      })
      .collect()
  }

  /// Depth first traversal from `start`, or from the root node when `start` is `None`.
  ///
  /// Each node is entered at most once. Children are visited in edge
  /// insertion order and `exit` runs after all of a node's children.
  pub fn traverse<V>(
    &self,
    visitor: &mut V,
    start: Option<NodeId>,
    filter: EdgeFilter<E>,
  ) -> anyhow::Result<()>
  where
    V: GraphVisitor<N>,
  {
    enum Frame {
      Enter(NodeId, Option<NodeId>),
      Exit(NodeId, Option<NodeId>),
    }

    let start = match start.or(self.root_node_id) {
      Some(start) => start,
      None => anyhow::bail!("Cannot traverse a graph without a start or root node"),
    };

    let mut visited = BitSet::new(self.node_id_limit());
    let mut stack = vec![Frame::Enter(start, None)];

    while let Some(frame) = stack.pop() {
      match frame {
        Frame::Enter(node_id, parent) => {
          if visited.has(node_id) {
            continue;
          }
          visited.add(node_id);

          let Some(node) = self.get_node(node_id) else {
            continue;
          };

          match visitor.enter(node_id, node, parent)? {
            TraversalAction::Stop => return Ok(()),
            TraversalAction::SkipChildren => continue,
            TraversalAction::Continue => {}
          }

          stack.push(Frame::Exit(node_id, parent));
          for child in self
            .get_node_ids_connected_from(node_id, filter)
            .into_iter()
            .rev()
          {
            if !visited.has(child) {
              stack.push(Frame::Enter(child, Some(node_id)));
            }
          }
        }
        Frame::Exit(node_id, parent) => {
          let Some(node) = self.get_node(node_id) else {
            continue;
          };

          if visitor.exit(node_id, node, parent)? == TraversalAction::Stop {
            return Ok(());
          }
        }
      }
    }

    Ok(())
  }

  /// Traversal with a closure that is called on enter.
  pub fn traverse_fn<F>(
    &self,
    start: Option<NodeId>,
    filter: EdgeFilter<E>,
    enter: F,
  ) -> anyhow::Result<()>
  where
    F: FnMut(NodeId, &N, Option<NodeId>) -> anyhow::Result<TraversalAction>,
  {
    self.traverse(&mut EnterFn(enter), start, filter)
  }

  /// Nodes reachable from the root in topological order.
  ///
  /// Cycles do not fail the sort, the back edge is ignored.
  pub fn topo_sort(&self, filter: EdgeFilter<E>) -> anyhow::Result<Vec<NodeId>> {
    let mut post_order = PostOrder::default();
    self.traverse(&mut post_order, None, filter)?;

    let mut sorted = post_order.order;
    sorted.reverse();
    Ok(sorted)
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  #[derive(Clone, Copy, Debug, Eq, PartialEq)]
  enum EdgeType {
    Sync,
    Lazy,
  }

  fn graph_with_nodes(count: usize) -> Graph<&'static str, EdgeType> {
    let mut graph = Graph::new();
    for _ in 0..count {
      graph.add_node("node");
    }
    graph.set_root_node_id(0);
    graph
  }

  #[test]
  fn node_ids_are_not_reused_after_removal() {
    let mut graph: Graph<u32, ()> = Graph::new();
    let a = graph.add_node(1);
    let b = graph.add_node(2);

    assert_eq!(graph.remove_node(a).unwrap(), 1);
    let c = graph.add_node(3);

    assert_eq!((a, b, c), (0, 1, 2));
    assert!(!graph.has_node(a));
    assert_eq!(graph.get_node(a), None);
    assert_eq!(graph.node_count(), 2);
    assert_eq!(graph.node_id_limit(), 3);
    assert_eq!(
      graph.nodes().map(|(id, n)| (id, *n)).collect::<Vec<_>>(),
      vec![(1, 2), (2, 3)]
    );
  }

  #[test]
  fn removing_a_missing_node_is_an_error() {
    let mut graph: Graph<u32, ()> = Graph::new();
    assert!(graph.remove_node(4).is_err());
  }

  #[test]
  fn edges_are_deduplicated_per_type() {
    let mut graph = graph_with_nodes(2);

    assert!(graph.add_edge(0, 1, EdgeType::Sync).unwrap());
    assert!(!graph.add_edge(0, 1, EdgeType::Sync).unwrap());
    assert!(graph.add_edge(0, 1, EdgeType::Lazy).unwrap());

    assert_eq!(graph.edges().len(), 2);
    assert!(graph.has_edge(0, 1, EdgeFilter::Only(EdgeType::Lazy)));

    assert!(graph.remove_edge(0, 1, EdgeFilter::Only(EdgeType::Lazy)));
    assert!(!graph.has_edge(0, 1, EdgeFilter::Only(EdgeType::Lazy)));
    assert!(graph.has_edge(0, 1, EdgeFilter::All));
  }

  #[test]
  fn add_edge_to_missing_node_is_an_error() {
    let mut graph = graph_with_nodes(1);
    assert!(graph.add_edge(0, 5, EdgeType::Sync).is_err());
  }

  #[test]
  fn neighbors_follow_insertion_order_and_filter() {
    let mut graph = graph_with_nodes(4);
    graph.add_edge(0, 3, EdgeType::Sync).unwrap();
    graph.add_edge(0, 1, EdgeType::Lazy).unwrap();
    graph.add_edge(0, 2, EdgeType::Sync).unwrap();
    graph.add_edge(0, 1, EdgeType::Sync).unwrap();

    assert_eq!(
      graph.get_node_ids_connected_from(0, EdgeFilter::All),
      vec![3, 1, 2]
    );
    assert_eq!(
      graph.get_node_ids_connected_from(0, EdgeFilter::Only(EdgeType::Sync)),
      vec![3, 2, 1]
    );
    assert_eq!(graph.get_node_ids_connected_to(1, EdgeFilter::All), vec![0]);
  }

  #[test]
  fn removing_a_node_removes_its_edges() {
    let mut graph = graph_with_nodes(3);
    graph.add_edge(0, 1, EdgeType::Sync).unwrap();
    graph.add_edge(1, 2, EdgeType::Sync).unwrap();

    graph.remove_node(1).unwrap();

    assert!(graph.get_node_ids_connected_from(0, EdgeFilter::All).is_empty());
    assert!(graph.get_node_ids_connected_to(2, EdgeFilter::All).is_empty());
    assert!(graph.edges().is_empty());
  }

  #[test]
  fn traverse_visits_depth_first_with_enter_and_exit() {
    struct Recorder(Vec<String>);

    impl GraphVisitor<&'static str> for Recorder {
      fn enter(
        &mut self,
        node_id: NodeId,
        _: &&'static str,
        parent: Option<NodeId>,
      ) -> anyhow::Result<TraversalAction> {
        self.0.push(format!("enter {node_id} from {parent:?}"));
        Ok(TraversalAction::Continue)
      }

      fn exit(
        &mut self,
        node_id: NodeId,
        _: &&'static str,
        _: Option<NodeId>,
      ) -> anyhow::Result<TraversalAction> {
        self.0.push(format!("exit {node_id}"));
        Ok(TraversalAction::Continue)
      }
    }

    let mut graph = graph_with_nodes(4);
    graph.add_edge(0, 1, EdgeType::Sync).unwrap();
    graph.add_edge(0, 2, EdgeType::Sync).unwrap();
    graph.add_edge(1, 3, EdgeType::Sync).unwrap();
    graph.add_edge(2, 3, EdgeType::Sync).unwrap();

    let mut recorder = Recorder(Vec::new());
    graph
      .traverse(&mut recorder, None, EdgeFilter::All)
      .unwrap();

    assert_eq!(
      recorder.0,
      vec![
        "enter 0 from None",
        "enter 1 from Some(0)",
        "enter 3 from Some(1)",
        "exit 3",
        "exit 1",
        "enter 2 from Some(0)",
        "exit 2",
        "exit 0",
      ]
    );
  }

  #[test]
  fn traverse_can_skip_children_and_stop() {
    let mut graph = graph_with_nodes(5);
    graph.add_edge(0, 1, EdgeType::Sync).unwrap();
    graph.add_edge(1, 2, EdgeType::Sync).unwrap();
    graph.add_edge(0, 3, EdgeType::Sync).unwrap();
    graph.add_edge(3, 4, EdgeType::Sync).unwrap();

    let mut visited = Vec::new();
    graph
      .traverse_fn(None, EdgeFilter::All, |node_id, _, _| {
        visited.push(node_id);
        Ok(match node_id {
          1 => TraversalAction::SkipChildren,
          3 => TraversalAction::Stop,
          _ => TraversalAction::Continue,
        })
      })
      .unwrap();

    assert_eq!(visited, vec![0, 1, 3]);
  }

  #[test]
  fn traverse_respects_edge_filter_and_start() {
    let mut graph = graph_with_nodes(3);
    graph.add_edge(0, 1, EdgeType::Lazy).unwrap();
    graph.add_edge(1, 2, EdgeType::Sync).unwrap();

    let mut visited = Vec::new();
    graph
      .traverse_fn(None, EdgeFilter::Only(EdgeType::Sync), |node_id, _, _| {
        visited.push(node_id);
        Ok(TraversalAction::Continue)
      })
      .unwrap();
    assert_eq!(visited, vec![0]);

    visited.clear();
    graph
      .traverse_fn(Some(1), EdgeFilter::All, |node_id, _, _| {
        visited.push(node_id);
        Ok(TraversalAction::Continue)
      })
      .unwrap();
    assert_eq!(visited, vec![1, 2]);
  }

  #[test]
  fn traverse_propagates_visitor_errors() {
    let graph = graph_with_nodes(1);
    let result = graph.traverse_fn(None, EdgeFilter::All, |_, _, _| {
      Err(anyhow!("visitor failed"))
    });

    assert_eq!(result.unwrap_err().to_string(), "visitor failed");
  }

  #[test]
  fn topo_sort_orders_parents_before_children() {
    let mut graph = graph_with_nodes(5);
    graph.add_edge(0, 1, EdgeType::Sync).unwrap();
    graph.add_edge(0, 2, EdgeType::Lazy).unwrap();
    graph.add_edge(1, 3, EdgeType::Sync).unwrap();
    graph.add_edge(2, 3, EdgeType::Sync).unwrap();
    graph.add_edge(3, 1, EdgeType::Lazy).unwrap();

    let sorted = graph.topo_sort(EdgeFilter::All).unwrap();
    let position = |id: NodeId| sorted.iter().position(|n| *n == id).unwrap();

    assert_eq!(sorted.len(), 4);
    assert_eq!(sorted[0], 0);
    assert!(position(2) < position(3));
    assert!(!sorted.contains(&4));
  }

  #[test]
  fn topo_sort_without_root_fails() {
    let graph: Graph<(), ()> = Graph::new();
    assert!(graph.topo_sort(EdgeFilter::All).is_err());
  }
}
