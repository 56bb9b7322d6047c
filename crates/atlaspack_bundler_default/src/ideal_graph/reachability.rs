use anyhow::bail;
use anyhow::Context;
use atlaspack_graph::BitSet;
use atlaspack_graph::EdgeFilter;
use atlaspack_graph::NodeId;
use atlaspack_graph::TraversalAction;
use tracing::debug;
use tracing::instrument;

use crate::asset_graph::AssetGraphNode;
use crate::types::BundleBehavior;
use crate::types::Priority;

use super::AssetIndex;
use super::BundleRootEdgeType;
use super::IdealGraphBuilder;

impl IdealGraphBuilder<'_> {
  /// Records the assets each bundle root loads synchronously and how bundle roots load each other
  #[instrument(level = "debug", skip_all)]
  pub(super) fn build_reachability(&mut self) -> anyhow::Result<()> {
    let roots = self.bundle_roots.keys().copied().collect::<Vec<_>>();

    for root_index in &roots {
      let node_id = self.bundle_root_graph.add_node(Some(*root_index));
      self.asset_to_bundle_root_node_id.insert(*root_index, node_id);

      if self.entries.contains_key(root_index) {
        self
          .bundle_root_graph
          .add_edge(self.bundle_root_graph_root, node_id, BundleRootEdgeType::Parallel)?;
      }
    }

    let asset_count = self.assets.len();
    let node_count = self.bundle_root_graph.node_id_limit();
    self.reachable_roots = vec![BitSet::new(node_count); asset_count];
    self.reachable_assets = vec![BitSet::new(asset_count); node_count];

    for root_index in roots {
      self.scan_bundle_root(root_index)?;
    }

    debug!(
      bundle_roots = node_count - 1,
      "ideal graph: computed reachability"
    );

    Ok(())
  }

  /// Walks the synchronous subgraph below one bundle root
  ///
  /// The walk stops at async dependencies, assets with a bundle behavior and
  /// assets whose type differs from the root, since those load separately.
  fn scan_bundle_root(&mut self, root_index: AssetIndex) -> anyhow::Result<()> {
    let asset_graph = self.asset_graph;
    let root = self.assets[root_index].clone();
    let root_node_id = *self
      .asset_to_bundle_root_node_id
      .get(&root_index)
      .context("Bundle root has no node in the bundle root graph")?;
    let start = asset_graph
      .get_node_id_by_content_key(&root.id)
      .with_context(|| format!("{} is not in the asset graph", root.file_path.display()))?;

    asset_graph.traverse_fn(Some(start), |_, node, _| match node {
      AssetGraphNode::Root => Ok(TraversalAction::Continue),
      AssetGraphNode::Dependency(dependency) => {
        if dependency.priority == Priority::Sync {
          return Ok(TraversalAction::Continue);
        }

        if self.dependency_bundle_graph.has_content_key(&dependency.id) {
          let assets = asset_graph.get_dependency_assets(dependency)?;
          match assets.as_slice() {
            [] => {}
            [child] => {
              let bundle_id = *self
                .bundles
                .get(&child.id)
                .with_context(|| format!("No bundle for async import of {}", child.file_path.display()))?;
              let bundle = self.bundle(bundle_id)?;

              if bundle.bundle_behavior.is_none()
                && !bundle.env.is_isolated()
                && bundle.env.context == root.env.context
              {
                let child_index = self.asset_index(&child.id)?;
                let child_node_id = *self
                  .asset_to_bundle_root_node_id
                  .get(&child_index)
                  .context("Async bundle has no node in the bundle root graph")?;
                let edge_type = match dependency.priority {
                  Priority::Parallel => BundleRootEdgeType::Parallel,
                  _ => BundleRootEdgeType::Lazy,
                };

                self.bundle_root_graph.add_edge(root_node_id, child_node_id, edge_type)?;
              }
            }
            _ => bail!(
              "Async dependency {} resolved to more than one asset",
              dependency.specifier
            ),
          }
        }

        Ok(TraversalAction::SkipChildren)
      }
      AssetGraphNode::Asset(asset) => {
        if asset.id == root.id {
          return Ok(TraversalAction::Continue);
        }

        if asset.bundle_behavior.is_some() || asset.file_type != root.file_type {
          return Ok(TraversalAction::SkipChildren);
        }

        let asset_index = self.asset_index(&asset.id)?;
        self.reachable_assets[root_node_id].add(asset_index);
        self.reachable_roots[asset_index].add(root_node_id);

        if asset.is_constant_module() {
          for dependency in asset_graph.get_incoming_dependencies(asset)? {
            if let Some(parent) = asset_graph.get_asset_with_dependency(dependency)? {
              let parent_index = self.asset_index(&parent.id)?;
              self
                .inline_constant_deps
                .entry(parent_index)
                .or_default()
                .insert(asset_index);
            }
          }
        }

        Ok(TraversalAction::Continue)
      }
    })
  }

  /// Computes the assets guaranteed to be loaded on every path to each bundle root
  ///
  /// Bundle roots are visited in topological order. A root's availability is
  /// the intersection over its parents of what each parent makes available,
  /// plus whatever its earlier parallel siblings load.
  #[instrument(level = "debug", skip_all)]
  pub(super) fn compute_availability(&mut self) -> anyhow::Result<()> {
    let asset_count = self.assets.len();
    let order = self.bundle_root_graph.topo_sort(EdgeFilter::All)?;
    self.ancestor_assets = vec![None; self.bundle_root_graph.node_id_limit()];

    for node_id in order {
      let Some(Some(root_index)) = self.bundle_root_graph.get_node(node_id).copied() else {
        continue;
      };

      let available = if self.assets[root_index].bundle_behavior == Some(BundleBehavior::Isolated) {
        BitSet::new(asset_count)
      } else {
        self.assets_available_from(node_id, root_index)?
      };

      let mut parallel_availability = BitSet::new(asset_count);

      for child_id in self.bundle_root_graph.get_node_ids_connected_from(node_id, EdgeFilter::All) {
        let child_index = self.root_asset(child_id)?;
        if self.bundle_for_root(child_index)?.bundle_behavior.is_some() {
          continue;
        }

        let is_parallel = self.bundle_root_graph.has_edge(
          node_id,
          child_id,
          EdgeFilter::Only(BundleRootEdgeType::Parallel),
        );

        let current = if is_parallel {
          BitSet::union_of(&parallel_availability, &available)
        } else {
          available.clone()
        };

        match &mut self.ancestor_assets[child_id] {
          Some(ancestor_assets) => ancestor_assets.intersect(&current),
          slot @ None => *slot = Some(current),
        }

        if is_parallel {
          parallel_availability.union(&self.reachable_assets[child_id]);
          parallel_availability.add(child_index);
        }
      }
    }

    debug!("ideal graph: computed availability");
    Ok(())
  }

  /// Assets loaded once a bundle root's bundle group has loaded
  fn assets_available_from(&self, node_id: NodeId, root_index: AssetIndex) -> anyhow::Result<BitSet> {
    let mut available = self.ancestor_assets[node_id]
      .clone()
      .unwrap_or_else(|| BitSet::new(self.assets.len()));

    let (bundle_id, group_id) = self.bundle_root(root_index)?;
    let mut group = vec![group_id];
    for sibling_id in self.bundle_graph.get_node_ids_connected_from(group_id, EdgeFilter::All) {
      if !group.contains(&sibling_id) {
        group.push(sibling_id);
      }
    }
    if !group.contains(&bundle_id) {
      group.push(bundle_id);
    }

    for group_bundle_id in group {
      let bundle = self.bundle(group_bundle_id)?;
      if bundle.bundle_behavior.is_some() {
        continue;
      }

      for asset_index in bundle.assets.iter().copied() {
        available.add(asset_index);

        if let Some(asset_node_id) = self.asset_to_bundle_root_node_id.get(&asset_index) {
          available.union(&self.reachable_assets[*asset_node_id]);
        }
      }
    }

    Ok(available)
  }
}
