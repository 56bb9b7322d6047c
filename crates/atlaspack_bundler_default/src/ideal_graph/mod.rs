//! Computes the ideal assignment of assets to bundles for one target.
//!
//! The builder runs a fixed sequence of phases over the asset graph:
//!
//! 1. Bundle roots are found by walking the graph from every entry.
//! 2. Reachability records which assets each bundle root loads synchronously.
//! 3. Availability records which assets are guaranteed to be loaded already
//!    whenever a bundle root runs.
//! 4. Async bundles whose root is always available are internalized.
//! 5. Every asset is placed into its roots' bundles or a shared bundle.
//! 6. Small shared bundles are merged and the parallel request limit is enforced.
//!
//! Bundles live in a [`Graph`] and are referenced by node id. Node ids are
//! never reused, so removed bundles leave gaps that later phases skip.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use anyhow::anyhow;
use anyhow::bail;
use anyhow::Context;
use atlaspack_graph::BitSet;
use atlaspack_graph::ContentGraph;
use atlaspack_graph::Graph;
use atlaspack_graph::NodeId;
use atlaspack_graph::TraversalAction;
use indexmap::IndexMap;
use indexmap::IndexSet;
use tracing::debug;
use tracing::instrument;

use crate::asset_graph::AssetGraph;
use crate::asset_graph::AssetGraphNode;
use crate::config::BundlerConfig;
use crate::types::Asset;
use crate::types::Dependency;
use crate::types::FileType;
use crate::types::Priority;

mod create_bundles;
mod insert_or_share;
mod internalize;
mod manual_shared_bundles;
mod merge;
mod reachability;
mod types;

pub use self::types::*;

use self::manual_shared_bundles::ManualSharedBundleMatches;

/// Builds the ideal graph for the entries of a single target
#[instrument(level = "debug", skip_all, fields(entries = entries.len()))]
pub fn create_ideal_graph(
  asset_graph: &AssetGraph,
  config: &BundlerConfig,
  entries: &[(Arc<Asset>, Arc<Dependency>)],
) -> anyhow::Result<IdealGraph> {
  IdealGraphBuilder::new(asset_graph, config, entries)?.build()
}

pub(crate) struct IdealGraphBuilder<'a> {
  asset_graph: &'a AssetGraph,
  config: &'a BundlerConfig,

  /// Entry asset ids of the target being bundled
  entry_asset_ids: HashSet<String>,
  entries: IndexMap<AssetIndex, Arc<Dependency>>,

  assets: Vec<Arc<Asset>>,
  asset_to_index: HashMap<String, AssetIndex>,

  manual: ManualSharedBundleMatches,

  bundle_graph: Graph<BundleGraphNode, ()>,
  bundle_graph_root: NodeId,
  dependency_bundle_graph: ContentGraph<DependencyBundleGraphNode, Priority>,

  /// Bundle root asset to `(bundle, bundle group bundle)`
  bundle_roots: IndexMap<AssetIndex, (NodeId, NodeId)>,

  /// Bundles by root asset id, shared bundle key or type change key
  bundles: HashMap<String, NodeId>,

  bundle_group_bundle_ids: IndexSet<NodeId>,
  asset_reference: IndexMap<AssetIndex, Vec<(Arc<Dependency>, NodeId)>>,

  /// Manual shared bundles by `{name},{type}`
  manual_shared_map: IndexMap<String, NodeId>,
  manual_asset_to_bundle: IndexMap<AssetIndex, NodeId>,

  /// Lazily imported assets that were placed in a manual shared bundle
  manual_bundle_to_internalized: IndexMap<NodeId, Vec<AssetIndex>>,

  /// One node per bundle root, `None` is the synthetic root linking entries
  bundle_root_graph: Graph<Option<AssetIndex>, BundleRootEdgeType>,
  bundle_root_graph_root: NodeId,
  asset_to_bundle_root_node_id: HashMap<AssetIndex, NodeId>,

  /// Bundle root nodes that synchronously reach each asset
  reachable_roots: Vec<BitSet>,

  /// Assets synchronously reachable from each bundle root node
  reachable_assets: Vec<BitSet>,

  /// Assets loaded on every path to each bundle root node
  ancestor_assets: Vec<Option<BitSet>>,

  /// Constant modules imported by each asset
  inline_constant_deps: HashMap<AssetIndex, IndexSet<AssetIndex>>,

  /// Bundles that received assets while enforcing the parallel request limit
  modified_bundles: IndexSet<NodeId>,
}

impl<'a> IdealGraphBuilder<'a> {
  fn new(
    asset_graph: &'a AssetGraph,
    config: &'a BundlerConfig,
    entries: &[(Arc<Asset>, Arc<Dependency>)],
  ) -> anyhow::Result<Self> {
    let mut bundle_graph = Graph::new();
    let bundle_graph_root = bundle_graph.add_node(BundleGraphNode::Root);
    bundle_graph.set_root_node_id(bundle_graph_root);

    let mut bundle_root_graph = Graph::new();
    let bundle_root_graph_root = bundle_root_graph.add_node(None);
    bundle_root_graph.set_root_node_id(bundle_root_graph_root);

    let mut builder = IdealGraphBuilder {
      asset_graph,
      config,
      entry_asset_ids: entries.iter().map(|(asset, _)| asset.id.clone()).collect(),
      entries: IndexMap::new(),
      assets: Vec::new(),
      asset_to_index: HashMap::new(),
      manual: ManualSharedBundleMatches::default(),
      bundle_graph,
      bundle_graph_root,
      dependency_bundle_graph: ContentGraph::new(),
      bundle_roots: IndexMap::new(),
      bundles: HashMap::new(),
      bundle_group_bundle_ids: IndexSet::new(),
      asset_reference: IndexMap::new(),
      manual_shared_map: IndexMap::new(),
      manual_asset_to_bundle: IndexMap::new(),
      manual_bundle_to_internalized: IndexMap::new(),
      bundle_root_graph,
      bundle_root_graph_root,
      asset_to_bundle_root_node_id: HashMap::new(),
      reachable_roots: Vec::new(),
      reachable_assets: Vec::new(),
      ancestor_assets: Vec::new(),
      inline_constant_deps: HashMap::new(),
      modified_bundles: IndexSet::new(),
    };

    builder.collect_assets()?;

    for (asset, dependency) in entries {
      let asset_index = builder.asset_index(&asset.id)?;
      builder.entries.insert(asset_index, dependency.clone());
    }

    Ok(builder)
  }

  fn build(mut self) -> anyhow::Result<IdealGraph> {
    // Phase 1: match manual shared bundle rules before any bundle exists
    self.match_manual_shared_bundles()?;

    // Phase 2: bundle roots for entries, async imports and type changes
    self.create_entry_bundles()?;
    self.create_bundles()?;

    // Phase 3: reachability and availability
    self.build_reachability()?;
    self.compute_availability()?;

    // Phase 4: delete async bundles that are always loaded already
    self.internalize_async_bundles()?;
    self.finalize_manual_bundle_roots()?;

    // Phase 5: place every asset
    self.insert_or_share()?;
    self.split_manual_shared_bundles()?;
    self.insert_constant_modules_into_manual_bundles()?;

    // Phase 6: trade duplication for fewer requests
    self.merge_small_shared_bundles()?;
    self.enforce_parallel_request_limit()?;
    self.sort_modified_bundles()?;

    debug!(
      assets = self.assets.len(),
      bundles = self.bundle_graph.node_count() - 1,
      "ideal graph: built"
    );

    Ok(IdealGraph {
      assets: self.assets,
      bundle_graph: self.bundle_graph,
      dependency_bundle_graph: self.dependency_bundle_graph,
      bundle_group_bundle_ids: self.bundle_group_bundle_ids,
      asset_reference: self.asset_reference,
      manual_asset_to_bundle: self.manual_asset_to_bundle,
    })
  }

  /// Assigns asset indices in the order bundle creation will visit assets
  fn collect_assets(&mut self) -> anyhow::Result<()> {
    let asset_graph = self.asset_graph;
    let mut assets = Vec::new();

    asset_graph.traverse_fn(None, |_, node, parent| {
      let AssetGraphNode::Asset(asset) = node else {
        return Ok(TraversalAction::Continue);
      };

      if self.is_foreign_entry(asset, parent) {
        return Ok(TraversalAction::SkipChildren);
      }

      assets.push(asset.clone());
      Ok(TraversalAction::Continue)
    })?;

    self.asset_to_index = assets
      .iter()
      .enumerate()
      .map(|(index, asset)| (asset.id.clone(), index))
      .collect();
    self.assets = assets;

    debug!(assets = self.assets.len(), "ideal graph: indexed assets");
    Ok(())
  }

  /// Entries of other targets are reached through entry dependencies of the root
  fn is_foreign_entry(&self, asset: &Asset, parent: Option<NodeId>) -> bool {
    parent
      .and_then(|parent| self.asset_graph.get_dependency(parent))
      .is_some_and(|dependency| dependency.is_entry && !self.entry_asset_ids.contains(&asset.id))
  }

  fn asset_index(&self, asset_id: &str) -> anyhow::Result<AssetIndex> {
    self
      .asset_to_index
      .get(asset_id)
      .copied()
      .ok_or_else(|| anyhow!("Asset {asset_id} was not visited while indexing the target"))
  }

  fn bundle(&self, bundle_id: NodeId) -> anyhow::Result<&IdealBundle> {
    match self.bundle_graph.get_node(bundle_id) {
      Some(BundleGraphNode::Bundle(bundle)) => Ok(bundle),
      Some(BundleGraphNode::Root) => bail!("The bundle graph root is not a bundle"),
      None => bail!("Bundle {bundle_id} does not exist"),
    }
  }

  fn bundle_mut(&mut self, bundle_id: NodeId) -> anyhow::Result<&mut IdealBundle> {
    match self.bundle_graph.get_node_mut(bundle_id) {
      Some(BundleGraphNode::Bundle(bundle)) => Ok(bundle),
      Some(BundleGraphNode::Root) => bail!("The bundle graph root is not a bundle"),
      None => bail!("Bundle {bundle_id} does not exist"),
    }
  }

  fn has_bundle(&self, bundle_id: NodeId) -> bool {
    matches!(self.bundle_graph.get_node(bundle_id), Some(BundleGraphNode::Bundle(_)))
  }

  fn bundle_root(&self, asset_index: AssetIndex) -> anyhow::Result<(NodeId, NodeId)> {
    self
      .bundle_roots
      .get(&asset_index)
      .copied()
      .with_context(|| format!("{} is not a bundle root", self.assets[asset_index].file_path.display()))
  }

  fn bundle_for_root(&self, asset_index: AssetIndex) -> anyhow::Result<&IdealBundle> {
    let (bundle_id, _) = self.bundle_root(asset_index)?;
    self.bundle(bundle_id)
  }

  /// The bundle root asset a bundle root graph node stands for
  fn root_asset(&self, node_id: NodeId) -> anyhow::Result<AssetIndex> {
    match self.bundle_root_graph.get_node(node_id) {
      Some(Some(asset_index)) => Ok(*asset_index),
      Some(None) => bail!("The bundle root graph root is not a bundle root"),
      None => bail!("Bundle root node {node_id} does not exist"),
    }
  }

  fn add_bundle(&mut self, bundle: IdealBundle) -> NodeId {
    self.bundle_graph.add_node(BundleGraphNode::Bundle(bundle))
  }

  /// Adds an asset to a bundle, returning `false` if it was already a member
  fn add_asset_to_bundle(&mut self, bundle_id: NodeId, asset_index: AssetIndex) -> anyhow::Result<bool> {
    let size = self.assets[asset_index].size();
    Ok(self.bundle_mut(bundle_id)?.add_asset(asset_index, size))
  }

  fn dependency_node(&mut self, dependency: &Arc<Dependency>) -> NodeId {
    self.dependency_bundle_graph.add_node_by_content_key_if_needed(
      &dependency.id,
      DependencyBundleGraphNode::Dependency(dependency.clone()),
    )
  }

  fn dependency_bundle_node(&mut self, bundle_id: NodeId) -> NodeId {
    self.dependency_bundle_graph.add_node_by_content_key_if_needed(
      &bundle_content_key(bundle_id),
      DependencyBundleGraphNode::Bundle(bundle_id),
    )
  }

  fn link_dependency_to_bundle(
    &mut self,
    dependency: &Arc<Dependency>,
    bundle_id: NodeId,
    priority: Priority,
  ) -> anyhow::Result<()> {
    let dependency_node = self.dependency_node(dependency);
    let bundle_node = self.dependency_bundle_node(bundle_id);
    self
      .dependency_bundle_graph
      .add_edge(dependency_node, bundle_node, priority)?;
    Ok(())
  }

  /// Key that identifies a bundle group when naming its type change bundles
  ///
  /// Falls back to `bundle_id` when the group bundle no longer exists.
  fn bundle_group_key(&self, group_id: NodeId, bundle_id: NodeId) -> anyhow::Result<String> {
    for candidate in [group_id, bundle_id] {
      let Some(BundleGraphNode::Bundle(bundle)) = self.bundle_graph.get_node(candidate) else {
        continue;
      };

      if let Some(main_entry) = bundle.main_entry_asset {
        return Ok(self.assets[main_entry].id.clone());
      }

      if let Some(unique_key) = &bundle.unique_key {
        return Ok(unique_key.clone());
      }
    }

    bail!("Bundle group {group_id} has neither a main entry nor a unique key")
  }
}

/// Key of the manual shared bundle for a rule and asset type
pub(crate) fn manual_shared_bundle_key(name: &str, file_type: &FileType) -> String {
  format!("{name},{}", file_type.extension())
}

fn manual_shared_bundle_unique_key(name: &str, file_type: &FileType) -> String {
  format!("{name}{}", file_type.extension())
}
