use std::sync::Arc;

use anyhow::anyhow;
use atlaspack_graph::ContentGraph;
use atlaspack_graph::EdgeFilter;
use atlaspack_graph::GraphVisitor;
use atlaspack_graph::NodeId;
use atlaspack_graph::TraversalAction;

use crate::types::Asset;
use crate::types::Dependency;

const ROOT_CONTENT_KEY: &str = "@@root";

#[derive(Clone, Debug, PartialEq)]
pub enum AssetGraphNode {
  Root,
  Asset(Arc<Asset>),
  Dependency(Arc<Dependency>),
}

/// The module graph handed to the bundler
///
/// Entry dependencies hang off the root node. Every other dependency is
/// connected from the asset that contains it and points to the assets it
/// resolved to.
#[derive(Clone, Debug)]
pub struct AssetGraph {
  graph: ContentGraph<AssetGraphNode, ()>,
  root_node_id: NodeId,
}

impl Default for AssetGraph {
  fn default() -> Self {
    Self::new()
  }
}

impl AssetGraph {
  pub fn new() -> Self {
    let mut graph = ContentGraph::new();
    let root_node_id = graph.add_node_by_content_key_if_needed(ROOT_CONTENT_KEY, AssetGraphNode::Root);
    graph.set_root_node_id(root_node_id);

    AssetGraph {
      graph,
      root_node_id,
    }
  }

  pub fn root_node(&self) -> NodeId {
    self.root_node_id
  }

  fn add_node(&mut self, content_key: &str, node: AssetGraphNode) -> NodeId {
    match self.graph.get_node_id_by_content_key(content_key) {
      Some(node_id) => {
        if let Some(existing) = self.graph.get_node_mut(node_id) {
          *existing = node;
        }
        node_id
      }
      None => self.graph.add_node_by_content_key_if_needed(content_key, node),
    }
  }

  pub fn add_asset(&mut self, asset: Arc<Asset>) -> NodeId {
    let content_key = asset.id.clone();
    self.add_node(&content_key, AssetGraphNode::Asset(asset))
  }

  pub fn add_dependency(&mut self, dependency: Arc<Dependency>) -> NodeId {
    let content_key = dependency.id.clone();
    self.add_node(&content_key, AssetGraphNode::Dependency(dependency))
  }

  pub fn add_entry_dependency(&mut self, dependency: Arc<Dependency>) -> anyhow::Result<NodeId> {
    let node_id = self.add_dependency(dependency);
    self.add_edge(self.root_node_id, node_id)?;
    Ok(node_id)
  }

  pub fn add_edge(&mut self, from: NodeId, to: NodeId) -> anyhow::Result<()> {
    self.graph.add_edge(from, to, ())?;
    Ok(())
  }

  pub fn get_node(&self, node_id: NodeId) -> Option<&AssetGraphNode> {
    self.graph.get_node(node_id)
  }

  pub fn get_node_id_by_content_key(&self, content_key: &str) -> Option<NodeId> {
    self.graph.get_node_id_by_content_key(content_key)
  }

  pub fn get_content_key(&self, node_id: NodeId) -> Option<&str> {
    self.graph.get_content_key(node_id)
  }

  pub fn get_asset(&self, node_id: NodeId) -> Option<&Arc<Asset>> {
    match self.graph.get_node(node_id)? {
      AssetGraphNode::Asset(asset) => Some(asset),
      _ => None,
    }
  }

  pub fn get_dependency(&self, node_id: NodeId) -> Option<&Arc<Dependency>> {
    match self.graph.get_node(node_id)? {
      AssetGraphNode::Dependency(dependency) => Some(dependency),
      _ => None,
    }
  }

  pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &AssetGraphNode)> {
    self.graph.nodes()
  }

  pub fn edges(&self) -> Vec<(NodeId, NodeId)> {
    self
      .graph
      .edges()
      .into_iter()
      .map(|(from, to, _)| (from, to))
      .collect()
  }

  pub fn assets(&self) -> impl Iterator<Item = &Arc<Asset>> {
    self.graph.nodes().filter_map(|(_, node)| match node {
      AssetGraphNode::Asset(asset) => Some(asset),
      _ => None,
    })
  }

  fn node_id_of(&self, content_key: &str) -> anyhow::Result<NodeId> {
    self
      .graph
      .get_node_id_by_content_key(content_key)
      .ok_or_else(|| anyhow!("{content_key} is not in the asset graph"))
  }

  /// The assets a dependency resolved to, in resolution order
  pub fn get_dependency_assets(&self, dependency: &Dependency) -> anyhow::Result<Vec<&Arc<Asset>>> {
    let node_id = self.node_id_of(&dependency.id)?;

    Ok(
      self
        .graph
        .get_node_ids_connected_from(node_id, EdgeFilter::All)
        .into_iter()
        .filter_map(|child| self.get_asset(child))
        .collect(),
    )
  }

  pub fn get_incoming_dependencies(&self, asset: &Asset) -> anyhow::Result<Vec<&Arc<Dependency>>> {
    let node_id = self.node_id_of(&asset.id)?;

    Ok(
      self
        .graph
        .get_node_ids_connected_to(node_id, EdgeFilter::All)
        .into_iter()
        .filter_map(|parent| self.get_dependency(parent))
        .collect(),
    )
  }

  /// The asset that contains a dependency, `None` for entry dependencies
  pub fn get_asset_with_dependency(&self, dependency: &Dependency) -> anyhow::Result<Option<&Arc<Asset>>> {
    let node_id = self.node_id_of(&dependency.id)?;

    Ok(
      self
        .graph
        .get_node_ids_connected_to(node_id, EdgeFilter::All)
        .into_iter()
        .find_map(|parent| self.get_asset(parent)),
    )
  }

  /// Depth first traversal from `start`, or from the root when `start` is `None`
  pub fn traverse<V>(&self, visitor: &mut V, start: Option<NodeId>) -> anyhow::Result<()>
  where
    V: GraphVisitor<AssetGraphNode>,
  {
    self.graph.traverse(visitor, start, EdgeFilter::All)
  }

  pub fn traverse_fn<F>(&self, start: Option<NodeId>, enter: F) -> anyhow::Result<()>
  where
    F: FnMut(NodeId, &AssetGraphNode, Option<NodeId>) -> anyhow::Result<TraversalAction>,
  {
    self.graph.traverse_fn(start, EdgeFilter::All, enter)
  }
}
