use atlaspack_graph::EdgeFilter;
use atlaspack_graph::NodeId;
use tracing::debug;
use tracing::instrument;

use crate::types::BundleBehavior;

use super::AssetIndex;
use super::BundleGraphNode;
use super::IdealGraphBuilder;

impl IdealGraphBuilder<'_> {
  /// Folds shared bundles below the minimum size back into their source bundles
  #[instrument(level = "debug", skip_all)]
  pub(super) fn merge_small_shared_bundles(&mut self) -> anyhow::Result<()> {
    let min_bundle_size = self.config.min_bundle_size;

    let small_bundle_ids = self
      .bundle_graph
      .nodes()
      .filter_map(|(bundle_id, node)| match node {
        BundleGraphNode::Bundle(bundle)
          if bundle.is_shared()
            && bundle.manual_shared_bundle.is_none()
            && bundle.size < min_bundle_size =>
        {
          Some(bundle_id)
        }
        _ => None,
      })
      .collect::<Vec<_>>();

    for bundle_id in &small_bundle_ids {
      self.remove_bundle(*bundle_id)?;
    }

    debug!(
      merged = small_bundle_ids.len(),
      "ideal graph: merged small shared bundles"
    );

    Ok(())
  }

  /// Removes shared bundles from bundle groups that load too many bundles at once
  ///
  /// The smallest shared bundles are removed first. Their assets are copied
  /// into the source bundles inside the group, and the bundle is deleted once
  /// it has at most two referrers left.
  #[instrument(level = "debug", skip_all)]
  pub(super) fn enforce_parallel_request_limit(&mut self) -> anyhow::Result<()> {
    if self.config.disable_shared_bundles {
      return Ok(());
    }

    let max_parallel_requests = self.config.max_parallel_requests;
    let group_ids = self
      .bundle_graph
      .get_node_ids_connected_from(self.bundle_graph_root, EdgeFilter::All);

    for group_id in group_ids {
      if !self.has_bundle(group_id) {
        continue;
      }

      let group_bundle_ids = self.bundles_in_group(group_id)?;

      let mut request_count = 0;
      for bundle_id in &group_bundle_ids {
        if self.bundle(*bundle_id)?.bundle_behavior != Some(BundleBehavior::Inline) {
          request_count += 1;
        }
      }

      if request_count <= max_parallel_requests {
        continue;
      }

      let mut shared_bundles = Vec::new();
      for bundle_id in &group_bundle_ids {
        let bundle = self.bundle(*bundle_id)?;
        if !bundle.source_bundles.is_empty()
          && *bundle_id != group_id
          && bundle.manual_shared_bundle.is_none()
        {
          shared_bundles.push((*bundle_id, bundle.size));
        }
      }

      // Largest first, so popping yields the smallest
      shared_bundles.sort_by(|(_, a), (_, b)| b.cmp(a));

      debug!(
        group = group_id,
        request_count,
        candidates = shared_bundles.len(),
        "ideal graph: enforcing parallel request limit"
      );

      while request_count > max_parallel_requests {
        let Some((bundle_id, _)) = shared_bundles.pop() else {
          break;
        };

        if !self.has_bundle(bundle_id) {
          continue;
        }

        let source_bundle_ids = self
          .bundle(bundle_id)?
          .source_bundles
          .iter()
          .copied()
          .filter(|source_bundle_id| group_bundle_ids.contains(source_bundle_id))
          .collect::<Vec<_>>();

        for source_bundle_id in source_bundle_ids {
          self.modified_bundles.insert(source_bundle_id);
          self.bundle_mut(bundle_id)?.source_bundles.shift_remove(&source_bundle_id);

          let assets = self.bundle(bundle_id)?.assets.iter().copied().collect::<Vec<_>>();
          for asset_index in assets {
            self.add_asset_to_source_bundle(asset_index, source_bundle_id)?;
          }

          for child_id in self.bundle_graph.get_node_ids_connected_from(bundle_id, EdgeFilter::All) {
            self.bundle_mut(child_id)?.source_bundles.insert(source_bundle_id);
            self.bundle_graph.add_edge(source_bundle_id, child_id, ())?;
          }

          let referrers = self
            .bundle_graph
            .get_node_ids_connected_to(bundle_id, EdgeFilter::All)
            .len();

          if referrers <= 2 && self.bundle(bundle_id)?.main_entry_asset.is_none() {
            self.remove_bundle(bundle_id)?;
            break;
          }

          self
            .bundle_graph
            .remove_edge(source_bundle_id, bundle_id, EdgeFilter::All);
        }

        request_count -= 1;
      }
    }

    Ok(())
  }

  /// Deletes a shared bundle after copying its assets into each remaining source bundle
  pub(super) fn remove_bundle(&mut self, bundle_id: NodeId) -> anyhow::Result<()> {
    let bundle = self.bundle(bundle_id)?;
    let assets = bundle.assets.iter().copied().collect::<Vec<_>>();
    let source_bundle_ids = bundle.source_bundles.iter().copied().collect::<Vec<_>>();

    for asset_index in assets {
      if let Some(references) = self.asset_reference.get_mut(&asset_index) {
        references.retain(|(_, referenced_bundle_id)| *referenced_bundle_id != bundle_id);
      }

      for source_bundle_id in &source_bundle_ids {
        if self.has_bundle(*source_bundle_id) {
          self.add_asset_to_source_bundle(asset_index, *source_bundle_id)?;
        }
      }
    }

    self.bundle_graph.remove_node(bundle_id)?;
    Ok(())
  }

  /// Adds an asset to the bundle rooted at a source bundle's main entry
  fn add_asset_to_source_bundle(
    &mut self,
    asset_index: AssetIndex,
    source_bundle_id: NodeId,
  ) -> anyhow::Result<()> {
    match self.bundle(source_bundle_id)?.main_entry_asset {
      Some(main_entry) if self.bundle_roots.contains_key(&main_entry) => {
        self.add_asset_to_bundle_root(asset_index, main_entry)
      }
      _ => self
        .add_asset_to_bundle(source_bundle_id, asset_index)
        .map(|_| ()),
    }
  }

  /// Restores traversal order in bundles that received assets out of order
  pub(super) fn sort_modified_bundles(&mut self) -> anyhow::Result<()> {
    for bundle_id in std::mem::take(&mut self.modified_bundles) {
      if let Some(BundleGraphNode::Bundle(bundle)) = self.bundle_graph.get_node_mut(bundle_id) {
        bundle.assets.sort();
      }
    }

    Ok(())
  }

  fn bundles_in_group(&self, group_id: NodeId) -> anyhow::Result<Vec<NodeId>> {
    let mut bundle_ids = Vec::new();

    self
      .bundle_graph
      .traverse_fn(Some(group_id), EdgeFilter::All, |bundle_id, node, _| {
        if let BundleGraphNode::Bundle(_) = node {
          bundle_ids.push(bundle_id);
        }
        Ok(atlaspack_graph::TraversalAction::Continue)
      })?;

    Ok(bundle_ids)
  }
}
