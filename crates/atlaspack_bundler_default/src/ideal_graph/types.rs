use std::sync::Arc;

use atlaspack_graph::BitSet;
use atlaspack_graph::ContentGraph;
use atlaspack_graph::EdgeFilter;
use atlaspack_graph::Graph;
use atlaspack_graph::NodeId;
use indexmap::IndexMap;
use indexmap::IndexSet;

use crate::types::Asset;
use crate::types::BundleBehavior;
use crate::types::Dependency;
use crate::types::Environment;
use crate::types::FileType;
use crate::types::Priority;
use crate::types::Target;

/// Position of an asset in the bundler's traversal order
///
/// Used to index reachability bit sets and to keep bundle contents ordered.
pub type AssetIndex = usize;

/// A bundle under construction
#[derive(Clone, Debug, PartialEq)]
pub struct IdealBundle {
  /// Member assets in insertion order
  pub assets: IndexSet<AssetIndex>,

  /// Assets that are already loaded whenever this bundle runs
  pub internalized_assets: Option<BitSet>,

  pub bundle_behavior: Option<BundleBehavior>,

  pub bundle_type: FileType,

  pub env: Arc<Environment>,

  /// The asset this bundle was created for, absent for shared bundles
  pub main_entry_asset: Option<AssetIndex>,

  /// Name of the manual shared bundle rule that owns this bundle
  pub manual_shared_bundle: Option<String>,

  pub needs_stable_name: bool,

  /// Running sum of member asset sizes
  pub size: u64,

  /// Bundles that load this one, only set for shared and reused bundles
  pub source_bundles: IndexSet<NodeId>,

  pub target: Arc<Target>,

  pub unique_key: Option<String>,
}

impl IdealBundle {
  /// A bundle named after `asset`, which becomes its first member
  pub fn from_asset(
    asset_index: AssetIndex,
    asset: &Asset,
    target: Arc<Target>,
    bundle_behavior: Option<BundleBehavior>,
    needs_stable_name: bool,
  ) -> Self {
    IdealBundle {
      assets: IndexSet::from([asset_index]),
      internalized_assets: None,
      bundle_behavior,
      bundle_type: asset.file_type.clone(),
      env: asset.env.clone(),
      main_entry_asset: Some(asset_index),
      manual_shared_bundle: None,
      needs_stable_name,
      size: asset.size(),
      source_bundles: IndexSet::new(),
      target,
      unique_key: None,
    }
  }

  /// An empty bundle without a main entry
  pub fn keyed(
    unique_key: Option<String>,
    bundle_type: FileType,
    env: Arc<Environment>,
    target: Arc<Target>,
  ) -> Self {
    IdealBundle {
      assets: IndexSet::new(),
      internalized_assets: None,
      bundle_behavior: None,
      bundle_type,
      env,
      main_entry_asset: None,
      manual_shared_bundle: None,
      needs_stable_name: false,
      size: 0,
      source_bundles: IndexSet::new(),
      target,
      unique_key,
    }
  }

  /// Adds an asset, returning `false` if it was already a member
  pub fn add_asset(&mut self, asset_index: AssetIndex, size: u64) -> bool {
    let inserted = self.assets.insert(asset_index);
    if inserted {
      self.size += size;
    }
    inserted
  }

  pub fn remove_asset(&mut self, asset_index: AssetIndex, size: u64) -> bool {
    let removed = self.assets.shift_remove(&asset_index);
    if removed {
      self.size = self.size.saturating_sub(size);
    }
    removed
  }

  pub fn is_shared(&self) -> bool {
    !self.source_bundles.is_empty() && self.main_entry_asset.is_none()
  }
}

#[derive(Clone, Debug, PartialEq)]
#[allow(clippy::large_enum_variant)]
pub enum BundleGraphNode {
  Root,
  Bundle(IdealBundle),
}

/// How one bundle root loads another
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BundleRootEdgeType {
  Parallel,
  Lazy,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DependencyBundleGraphNode {
  Dependency(Arc<Dependency>),
  Bundle(NodeId),
}

/// Content key of a bundle in the dependency bundle graph
pub(crate) fn bundle_content_key(bundle_id: NodeId) -> String {
  format!("bundle:{bundle_id}")
}

/// Bundle assignment for a single target
#[derive(Clone, Debug)]
pub struct IdealGraph {
  /// Assets of the target in traversal order, indexed by [`AssetIndex`]
  pub assets: Vec<Arc<Asset>>,

  /// Bundles and the bundles they load, rooted at a [`BundleGraphNode::Root`]
  pub bundle_graph: Graph<BundleGraphNode, ()>,

  /// Which dependencies resolve to which bundles, edges are typed by priority
  pub dependency_bundle_graph: ContentGraph<DependencyBundleGraphNode, Priority>,

  /// Bundles that start a bundle group
  pub bundle_group_bundle_ids: IndexSet<NodeId>,

  /// Cross bundle references created for parallel and type change dependencies
  pub asset_reference: IndexMap<AssetIndex, Vec<(Arc<Dependency>, NodeId)>>,

  /// Assets placed by manual shared bundle rules
  pub manual_asset_to_bundle: IndexMap<AssetIndex, NodeId>,
}

impl IdealGraph {
  pub fn root_node_id(&self) -> Option<NodeId> {
    self.bundle_graph.root_node_id()
  }

  pub fn bundles(&self) -> impl Iterator<Item = (NodeId, &IdealBundle)> {
    self.bundle_graph.nodes().filter_map(|(node_id, node)| match node {
      BundleGraphNode::Bundle(bundle) => Some((node_id, bundle)),
      BundleGraphNode::Root => None,
    })
  }

  pub fn get_bundle(&self, bundle_id: NodeId) -> Option<&IdealBundle> {
    match self.bundle_graph.get_node(bundle_id)? {
      BundleGraphNode::Bundle(bundle) => Some(bundle),
      BundleGraphNode::Root => None,
    }
  }

  pub fn asset_index(&self, asset_id: &str) -> Option<AssetIndex> {
    self.assets.iter().position(|asset| asset.id == asset_id)
  }

  /// Bundles that contain the asset, in bundle creation order
  pub fn bundles_containing(&self, asset_index: AssetIndex) -> Vec<NodeId> {
    self
      .bundles()
      .filter(|(_, bundle)| bundle.assets.contains(&asset_index))
      .map(|(bundle_id, _)| bundle_id)
      .collect()
  }

  /// Bundles reachable from a bundle group's root bundle, including itself
  pub fn bundles_in_group(&self, group_bundle_id: NodeId) -> anyhow::Result<Vec<NodeId>> {
    let mut bundle_ids = Vec::new();

    self
      .bundle_graph
      .traverse_fn(Some(group_bundle_id), EdgeFilter::All, |node_id, node, _| {
        if let BundleGraphNode::Bundle(_) = node {
          bundle_ids.push(node_id);
        }
        Ok(atlaspack_graph::TraversalAction::Continue)
      })?;

    Ok(bundle_ids)
  }
}
