use std::sync::Arc;

use anyhow::anyhow;
use anyhow::ensure;
use anyhow::Context;
use atlaspack_graph::ContentGraph;
use atlaspack_graph::EdgeFilter;
use atlaspack_graph::NodeId;
use tracing::trace;

use super::BundleGroupId;
use super::BundleId;
use super::CreateBundleOptions;
use super::MutableBundleGraph;
use crate::asset_graph::AssetGraph;
use crate::asset_graph::AssetGraphNode;
use crate::hash::hash_string;
use crate::types::Asset;
use crate::types::Bundle;
use crate::types::BundleGroup;
use crate::types::Dependency;
use crate::types::Target;

const ROOT_CONTENT_KEY: &str = "@@root";

/// Edge types in the bundle graph
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[repr(u8)]
pub enum NativeBundleGraphEdgeType {
  /// Edges copied from the asset graph, and the edges tying bundle groups to their dependency
  #[default]
  Null = 1,
  /// Bundle to the assets and dependencies it contains
  Contains = 2,
  /// Root or bundle to the bundle groups it loads, and bundle groups to their bundles
  Bundle = 3,
  References = 4,
  /// Bundle to an async dependency resolved within it
  InternalAsync = 5,
}

#[derive(Clone, Debug, PartialEq)]
#[allow(clippy::large_enum_variant)]
pub enum NativeBundleGraphNode {
  Root,
  Asset(Arc<Asset>),
  Dependency(Arc<Dependency>),
  BundleGroup(BundleGroup),
  Bundle(Bundle),
}

/// In memory bundle graph, seeded from an asset graph
#[derive(Clone, Debug)]
pub struct NativeBundleGraph {
  graph: ContentGraph<NativeBundleGraphNode, NativeBundleGraphEdgeType>,
  root_node_id: NodeId,
}

impl Default for NativeBundleGraph {
  fn default() -> Self {
    Self::new()
  }
}

impl NativeBundleGraph {
  pub fn new() -> Self {
    let mut graph = ContentGraph::new();
    let root_node_id =
      graph.add_node_by_content_key_if_needed(ROOT_CONTENT_KEY, NativeBundleGraphNode::Root);
    graph.set_root_node_id(root_node_id);

    Self {
      graph,
      root_node_id,
    }
  }

  /// Create a bundle graph from an asset graph.
  ///
  /// Copies all asset, dependency and root nodes and all edges from the asset graph.
  pub fn from_asset_graph(asset_graph: &AssetGraph) -> anyhow::Result<Self> {
    let mut bundle_graph = NativeBundleGraph::new();

    for (node_id, node) in asset_graph.nodes() {
      let content_key = asset_graph
        .get_content_key(node_id)
        .ok_or_else(|| anyhow!("Asset graph node {node_id} has no content key"))?;

      let node = match node {
        AssetGraphNode::Root => continue,
        AssetGraphNode::Asset(asset) => NativeBundleGraphNode::Asset(asset.clone()),
        AssetGraphNode::Dependency(dependency) => {
          NativeBundleGraphNode::Dependency(dependency.clone())
        }
      };

      bundle_graph.graph.add_node_by_content_key(content_key, node)?;
    }

    for (from, to) in asset_graph.edges() {
      let from = bundle_graph.node_id_for(asset_graph, from)?;
      let to = bundle_graph.node_id_for(asset_graph, to)?;
      bundle_graph
        .graph
        .add_edge(from, to, NativeBundleGraphEdgeType::Null)?;
    }

    Ok(bundle_graph)
  }

  fn node_id_for(&self, asset_graph: &AssetGraph, node_id: NodeId) -> anyhow::Result<NodeId> {
    if node_id == asset_graph.root_node() {
      return Ok(self.root_node_id);
    }

    let content_key = asset_graph
      .get_content_key(node_id)
      .ok_or_else(|| anyhow!("Asset graph node {node_id} has no content key"))?;

    self.node_id(content_key)
  }

  fn node_id(&self, content_key: &str) -> anyhow::Result<NodeId> {
    self
      .graph
      .get_node_id_by_content_key(content_key)
      .ok_or_else(|| anyhow!("{content_key} is not in the bundle graph"))
  }

  fn bundle_node_id(&self, bundle_id: &str) -> anyhow::Result<NodeId> {
    let node_id = self.node_id(bundle_id)?;
    match self.graph.get_node(node_id) {
      Some(NativeBundleGraphNode::Bundle(_)) => Ok(node_id),
      _ => Err(anyhow!("{bundle_id} is not a bundle")),
    }
  }

  fn bundle_group_node_id(&self, bundle_group_id: &str) -> anyhow::Result<NodeId> {
    let node_id = self.node_id(bundle_group_id)?;
    match self.graph.get_node(node_id) {
      Some(NativeBundleGraphNode::BundleGroup(_)) => Ok(node_id),
      _ => Err(anyhow!("{bundle_group_id} is not a bundle group")),
    }
  }

  pub fn root_node(&self) -> NodeId {
    self.root_node_id
  }

  pub fn nodes(&self) -> impl Iterator<Item = &NativeBundleGraphNode> {
    self.graph.nodes().map(|(_, node)| node)
  }

  fn bundle_at(&self, node_id: NodeId) -> Option<&Bundle> {
    match self.graph.get_node(node_id)? {
      NativeBundleGraphNode::Bundle(bundle) => Some(bundle),
      _ => None,
    }
  }

  fn bundle_group_at(&self, node_id: NodeId) -> Option<&BundleGroup> {
    match self.graph.get_node(node_id)? {
      NativeBundleGraphNode::BundleGroup(bundle_group) => Some(bundle_group),
      _ => None,
    }
  }

  fn dependency_at(&self, node_id: NodeId) -> Option<&Arc<Dependency>> {
    match self.graph.get_node(node_id)? {
      NativeBundleGraphNode::Dependency(dependency) => Some(dependency),
      _ => None,
    }
  }

  fn asset_at(&self, node_id: NodeId) -> Option<&Arc<Asset>> {
    match self.graph.get_node(node_id)? {
      NativeBundleGraphNode::Asset(asset) => Some(asset),
      _ => None,
    }
  }

  /// All bundles in creation order
  pub fn get_bundles(&self) -> Vec<&Bundle> {
    self
      .graph
      .nodes()
      .filter_map(|(_, node)| match node {
        NativeBundleGraphNode::Bundle(bundle) => Some(bundle),
        _ => None,
      })
      .collect()
  }

  pub fn get_bundle(&self, bundle_id: &str) -> Option<&Bundle> {
    let node_id = self.graph.get_node_id_by_content_key(bundle_id)?;
    self.bundle_at(node_id)
  }

  pub fn get_bundle_groups(&self) -> Vec<&BundleGroup> {
    self
      .graph
      .nodes()
      .filter_map(|(_, node)| match node {
        NativeBundleGraphNode::BundleGroup(bundle_group) => Some(bundle_group),
        _ => None,
      })
      .collect()
  }

  /// Assets in the order they were added to the bundle
  pub fn get_bundle_assets(&self, bundle_id: &str) -> anyhow::Result<Vec<&Arc<Asset>>> {
    let node_id = self.bundle_node_id(bundle_id)?;

    Ok(
      self
        .graph
        .get_node_ids_connected_from(node_id, EdgeFilter::Only(NativeBundleGraphEdgeType::Contains))
        .into_iter()
        .filter_map(|child| self.asset_at(child))
        .collect(),
    )
  }

  pub fn get_bundles_in_bundle_group(&self, bundle_group_id: &str) -> anyhow::Result<Vec<&Bundle>> {
    let node_id = self.bundle_group_node_id(bundle_group_id)?;

    Ok(
      self
        .graph
        .get_node_ids_connected_from(node_id, EdgeFilter::Only(NativeBundleGraphEdgeType::Bundle))
        .into_iter()
        .filter_map(|child| self.bundle_at(child))
        .collect(),
    )
  }

  /// Bundle groups the bundle belongs to
  pub fn get_bundle_groups_containing_bundle(
    &self,
    bundle_id: &str,
  ) -> anyhow::Result<Vec<&BundleGroup>> {
    let node_id = self.bundle_node_id(bundle_id)?;

    Ok(
      self
        .graph
        .get_node_ids_connected_to(node_id, EdgeFilter::Only(NativeBundleGraphEdgeType::Bundle))
        .into_iter()
        .filter_map(|parent| self.bundle_group_at(parent))
        .collect(),
    )
  }

  /// Bundle groups loaded from within the bundle
  pub fn get_bundle_groups_referenced_by_bundle(
    &self,
    bundle_id: &str,
  ) -> anyhow::Result<Vec<&BundleGroup>> {
    let node_id = self.bundle_node_id(bundle_id)?;

    Ok(
      self
        .graph
        .get_node_ids_connected_from(node_id, EdgeFilter::Only(NativeBundleGraphEdgeType::Bundle))
        .into_iter()
        .filter_map(|child| self.bundle_group_at(child))
        .collect(),
    )
  }

  /// Bundle groups loaded directly from the root
  pub fn get_entry_bundle_groups(&self) -> Vec<&BundleGroup> {
    self
      .graph
      .get_node_ids_connected_from(
        self.root_node_id,
        EdgeFilter::Only(NativeBundleGraphEdgeType::Bundle),
      )
      .into_iter()
      .filter_map(|child| self.bundle_group_at(child))
      .collect()
  }

  pub fn get_referenced_bundles(&self, bundle_id: &str) -> anyhow::Result<Vec<&Bundle>> {
    let node_id = self.bundle_node_id(bundle_id)?;

    Ok(
      self
        .graph
        .get_node_ids_connected_from(
          node_id,
          EdgeFilter::Only(NativeBundleGraphEdgeType::References),
        )
        .into_iter()
        .filter_map(|child| self.bundle_at(child))
        .collect(),
    )
  }

  /// Bundles a dependency was redirected to with an asset reference
  pub fn get_referenced_bundles_for_dependency(
    &self,
    dependency: &Dependency,
  ) -> anyhow::Result<Vec<&Bundle>> {
    let node_id = self.node_id(&dependency.id)?;

    Ok(
      self
        .graph
        .get_node_ids_connected_from(
          node_id,
          EdgeFilter::Only(NativeBundleGraphEdgeType::References),
        )
        .into_iter()
        .filter_map(|child| self.bundle_at(child))
        .collect(),
    )
  }

  pub fn is_dependency_internalized(&self, bundle_id: &str, dependency: &Dependency) -> bool {
    let (Ok(bundle_node_id), Ok(dependency_node_id)) =
      (self.bundle_node_id(bundle_id), self.node_id(&dependency.id))
    else {
      return false;
    };

    self.graph.has_edge(
      bundle_node_id,
      dependency_node_id,
      EdgeFilter::Only(NativeBundleGraphEdgeType::InternalAsync),
    )
  }

  fn bundle_id_for(options: &CreateBundleOptions) -> BundleId {
    let (key, target) = match options {
      CreateBundleOptions::Entry {
        entry_asset,
        target,
        ..
      } => (entry_asset.id.as_str(), target),
      CreateBundleOptions::Keyed {
        unique_key, target, ..
      } => (unique_key.as_str(), target),
    };

    hash_string(format!("bundle:{}{}", key, target.dist_dir.display()))
  }

  /// Resolved asset of a dependency, following the edges copied from the asset graph
  fn resolved_asset(&self, dependency_node_id: NodeId) -> Option<(NodeId, &Arc<Asset>)> {
    self
      .graph
      .get_node_ids_connected_from(
        dependency_node_id,
        EdgeFilter::Only(NativeBundleGraphEdgeType::Null),
      )
      .into_iter()
      .find_map(|child| self.asset_at(child).map(|asset| (child, asset)))
  }
}

impl MutableBundleGraph for NativeBundleGraph {
  fn create_bundle_group(
    &mut self,
    dependency: &Dependency,
    target: &Arc<Target>,
  ) -> anyhow::Result<BundleGroupId> {
    let dependency_node_id = self.node_id(&dependency.id)?;
    let (asset_node_id, asset) = self
      .resolved_asset(dependency_node_id)
      .with_context(|| format!("Dependency {} did not resolve to an asset", dependency.specifier))?;

    let bundle_group = BundleGroup {
      target: target.clone(),
      entry_asset_id: asset.id.clone(),
    };
    let bundle_group_id = bundle_group.id();

    let bundle_group_node_id = self.graph.add_node_by_content_key_if_needed(
      &bundle_group_id,
      NativeBundleGraphNode::BundleGroup(bundle_group),
    );

    self.graph.add_edge(
      dependency_node_id,
      bundle_group_node_id,
      NativeBundleGraphEdgeType::Null,
    )?;
    self.graph.add_edge(
      bundle_group_node_id,
      asset_node_id,
      NativeBundleGraphEdgeType::Null,
    )?;
    self.graph.add_edge(
      dependency_node_id,
      asset_node_id,
      NativeBundleGraphEdgeType::References,
    )?;

    if dependency.is_entry {
      self.graph.add_edge(
        self.root_node_id,
        bundle_group_node_id,
        NativeBundleGraphEdgeType::Bundle,
      )?;
    } else {
      let containing_bundles = self.graph.get_node_ids_connected_to(
        dependency_node_id,
        EdgeFilter::Only(NativeBundleGraphEdgeType::Contains),
      );

      for bundle_node_id in containing_bundles {
        if self.bundle_at(bundle_node_id).is_some() {
          self.graph.add_edge(
            bundle_node_id,
            bundle_group_node_id,
            NativeBundleGraphEdgeType::Bundle,
          )?;
        }
      }
    }

    trace!(bundle_group_id, "created bundle group");

    Ok(bundle_group_id)
  }

  fn create_bundle(&mut self, options: CreateBundleOptions) -> anyhow::Result<BundleId> {
    let bundle_id = Self::bundle_id_for(&options);
    if self.graph.has_content_key(&bundle_id) {
      self.bundle_node_id(&bundle_id)?;
      return Ok(bundle_id);
    }

    let bundle = match options {
      CreateBundleOptions::Entry {
        entry_asset,
        target,
        bundle_behavior,
        needs_stable_name,
      } => Bundle {
        id: bundle_id.clone(),
        bundle_behavior,
        bundle_type: entry_asset.file_type.clone(),
        entry_asset_ids: vec![entry_asset.id.clone()],
        env: entry_asset.env.clone(),
        main_entry_id: Some(entry_asset.id.clone()),
        manual_shared_bundle: None,
        needs_stable_name,
        target,
        unique_key: None,
      },
      CreateBundleOptions::Keyed {
        unique_key,
        bundle_type,
        env,
        target,
        bundle_behavior,
        needs_stable_name,
        manual_shared_bundle,
      } => Bundle {
        id: bundle_id.clone(),
        bundle_behavior,
        bundle_type,
        entry_asset_ids: Vec::new(),
        env,
        main_entry_id: None,
        manual_shared_bundle,
        needs_stable_name,
        target,
        unique_key: Some(unique_key),
      },
    };

    self
      .graph
      .add_node_by_content_key(bundle_id.clone(), NativeBundleGraphNode::Bundle(bundle))?;

    trace!(bundle_id, "created bundle");

    Ok(bundle_id)
  }

  fn add_asset_to_bundle(&mut self, asset: &Asset, bundle_id: &BundleId) -> anyhow::Result<()> {
    let bundle_node_id = self.bundle_node_id(bundle_id)?;
    let asset_node_id = self.node_id(&asset.id)?;

    self.graph.add_edge(
      bundle_node_id,
      asset_node_id,
      NativeBundleGraphEdgeType::Contains,
    )?;

    let dependencies = self
      .graph
      .get_node_ids_connected_from(asset_node_id, EdgeFilter::Only(NativeBundleGraphEdgeType::Null))
      .into_iter()
      .filter(|child| self.dependency_at(*child).is_some())
      .collect::<Vec<_>>();

    for dependency_node_id in dependencies {
      self.graph.add_edge(
        bundle_node_id,
        dependency_node_id,
        NativeBundleGraphEdgeType::Contains,
      )?;

      let bundle_groups = self
        .graph
        .get_node_ids_connected_from(
          dependency_node_id,
          EdgeFilter::Only(NativeBundleGraphEdgeType::Null),
        )
        .into_iter()
        .filter(|child| self.bundle_group_at(*child).is_some())
        .collect::<Vec<_>>();

      for bundle_group_node_id in bundle_groups {
        self.graph.add_edge(
          bundle_node_id,
          bundle_group_node_id,
          NativeBundleGraphEdgeType::Bundle,
        )?;
      }
    }

    Ok(())
  }

  fn add_bundle_to_bundle_group(
    &mut self,
    bundle_id: &BundleId,
    bundle_group_id: &BundleGroupId,
  ) -> anyhow::Result<()> {
    let bundle_node_id = self.bundle_node_id(bundle_id)?;
    let bundle_group_node_id = self.bundle_group_node_id(bundle_group_id)?;

    self.graph.add_edge(
      bundle_group_node_id,
      bundle_node_id,
      NativeBundleGraphEdgeType::Bundle,
    )?;

    Ok(())
  }

  fn create_bundle_reference(&mut self, from: &BundleId, to: &BundleId) -> anyhow::Result<()> {
    let from = self.bundle_node_id(from)?;
    let to = self.bundle_node_id(to)?;

    self
      .graph
      .add_edge(from, to, NativeBundleGraphEdgeType::References)?;

    Ok(())
  }

  fn create_asset_reference(
    &mut self,
    dependency: &Dependency,
    asset: &Asset,
    bundle_id: &BundleId,
  ) -> anyhow::Result<()> {
    let dependency_node_id = self.node_id(&dependency.id)?;
    let asset_node_id = self.node_id(&asset.id)?;
    let bundle_node_id = self.bundle_node_id(bundle_id)?;

    self.graph.add_edge(
      dependency_node_id,
      asset_node_id,
      NativeBundleGraphEdgeType::References,
    )?;
    self.graph.add_edge(
      dependency_node_id,
      bundle_node_id,
      NativeBundleGraphEdgeType::References,
    )?;

    Ok(())
  }

  fn internalize_async_dependency(
    &mut self,
    bundle_id: &BundleId,
    dependency: &Dependency,
  ) -> anyhow::Result<()> {
    ensure!(
      dependency.is_async(),
      "Expected dependency {} to be async",
      dependency.specifier
    );

    let bundle_node_id = self.bundle_node_id(bundle_id)?;
    let dependency_node_id = self.node_id(&dependency.id)?;

    self.graph.add_edge(
      bundle_node_id,
      dependency_node_id,
      NativeBundleGraphEdgeType::InternalAsync,
    )?;

    Ok(())
  }

  fn get_incoming_dependencies(&self, asset: &Asset) -> anyhow::Result<Vec<Arc<Dependency>>> {
    let asset_node_id = self.node_id(&asset.id)?;

    Ok(
      self
        .graph
        .get_node_ids_connected_to(asset_node_id, EdgeFilter::Only(NativeBundleGraphEdgeType::Null))
        .into_iter()
        .filter_map(|parent| self.dependency_at(parent).cloned())
        .collect(),
    )
  }

  fn bundle_has_dependency(
    &self,
    bundle_id: &BundleId,
    dependency: &Dependency,
  ) -> anyhow::Result<bool> {
    let bundle_node_id = self.bundle_node_id(bundle_id)?;
    let dependency_node_id = self.node_id(&dependency.id)?;

    Ok(self.graph.has_edge(
      bundle_node_id,
      dependency_node_id,
      EdgeFilter::Only(NativeBundleGraphEdgeType::Contains),
    ))
  }

  fn get_bundles_with_dependency(&self, dependency: &Dependency) -> anyhow::Result<Vec<BundleId>> {
    let dependency_node_id = self.node_id(&dependency.id)?;

    Ok(
      self
        .graph
        .get_node_ids_connected_to(
          dependency_node_id,
          EdgeFilter::Only(NativeBundleGraphEdgeType::Contains),
        )
        .into_iter()
        .filter_map(|parent| self.bundle_at(parent).map(|bundle| bundle.id.clone()))
        .collect(),
    )
  }
}
