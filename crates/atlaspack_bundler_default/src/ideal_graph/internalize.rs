use anyhow::Context;
use atlaspack_graph::BitSet;
use atlaspack_graph::EdgeFilter;
use tracing::debug;
use tracing::instrument;

use crate::types::BundleBehavior;

use super::AssetIndex;
use super::BundleGraphNode;
use super::IdealGraphBuilder;

impl IdealGraphBuilder<'_> {
  /// Deletes async bundles whose root asset is already loaded by every parent
  ///
  /// Each parent that has the root available records it as internalized, so
  /// the import resolves inside the parent instead of fetching a bundle.
  #[instrument(level = "debug", skip_all)]
  pub(super) fn internalize_async_bundles(&mut self) -> anyhow::Result<()> {
    let asset_count = self.assets.len();
    let mut deleted = 0;

    for node_id in 0..self.bundle_root_graph.node_id_limit() {
      let Some(Some(root_index)) = self.bundle_root_graph.get_node(node_id).copied() else {
        continue;
      };

      if self.manual.asset_to_rule.contains_key(&root_index) {
        continue;
      }

      let parents = self
        .bundle_root_graph
        .get_node_ids_connected_to(node_id, EdgeFilter::All);

      if parents.is_empty() {
        continue;
      }

      let mut can_delete = self.bundle_for_root(root_index)?.bundle_behavior != Some(BundleBehavior::Isolated);

      for parent_id in parents {
        if parent_id == self.bundle_root_graph_root {
          can_delete = false;
          continue;
        }

        let is_available = self.reachable_assets[parent_id].has(root_index)
          || self.ancestor_assets[parent_id]
            .as_ref()
            .is_some_and(|ancestor_assets| ancestor_assets.has(root_index));

        if !is_available {
          can_delete = false;
          continue;
        }

        let parent_index = self.root_asset(parent_id)?;
        let parent_bundle_id = *self
          .bundles
          .get(&self.assets[parent_index].id)
          .context("Bundle root has no bundle")?;

        self
          .bundle_mut(parent_bundle_id)?
          .internalized_assets
          .get_or_insert_with(|| BitSet::new(asset_count))
          .add(root_index);
      }

      if can_delete {
        self.delete_bundle_root(root_index)?;
        deleted += 1;
      }
    }

    debug!(deleted, "ideal graph: internalized async bundles");
    Ok(())
  }

  fn delete_bundle_root(&mut self, root_index: AssetIndex) -> anyhow::Result<()> {
    let bundle_id = self
      .bundles
      .remove(&self.assets[root_index].id)
      .context("Bundle root has no bundle")?;

    self.bundle_graph.remove_node(bundle_id)?;
    self.bundle_roots.shift_remove(&root_index);
    self.bundle_group_bundle_ids.shift_remove(&bundle_id);

    if let Some(node_id) = self.asset_to_bundle_root_node_id.remove(&root_index) {
      self.bundle_root_graph.remove_node(node_id)?;
    }

    Ok(())
  }

  /// Manual shared bundles that started from an async import stop being bundle groups
  ///
  /// Their root assets are internalized so importers resolve them from the
  /// already loaded shared bundle.
  pub(super) fn finalize_manual_bundle_roots(&mut self) -> anyhow::Result<()> {
    let asset_count = self.assets.len();

    for (bundle_id, assets) in std::mem::take(&mut self.manual_bundle_to_internalized) {
      if !self.has_bundle(bundle_id) {
        continue;
      }

      let bundle = self.bundle_mut(bundle_id)?;
      let internalized_assets = bundle
        .internalized_assets
        .get_or_insert_with(|| BitSet::new(asset_count));
      for asset_index in assets {
        internalized_assets.add(asset_index);
      }

      bundle.main_entry_asset = None;
      self.bundle_group_bundle_ids.shift_remove(&bundle_id);

      let root = self.bundle_graph_root;
      let has_importer = self
        .bundle_graph
        .get_node_ids_connected_to(bundle_id, EdgeFilter::All)
        .into_iter()
        .any(|importer| importer != root);

      if has_importer {
        self
          .bundle_graph
          .remove_edge(self.bundle_graph_root, bundle_id, EdgeFilter::All);
      }
    }

    // Every manual shared bundle is keyed by its rule, never by an entry asset
    let manual_bundle_ids = self
      .bundle_graph
      .nodes()
      .filter_map(|(bundle_id, node)| match node {
        BundleGraphNode::Bundle(bundle) if bundle.manual_shared_bundle.is_some() => Some(bundle_id),
        _ => None,
      })
      .collect::<Vec<_>>();

    for bundle_id in manual_bundle_ids {
      self.bundle_mut(bundle_id)?.main_entry_asset = None;
      self.bundle_group_bundle_ids.shift_remove(&bundle_id);
    }

    Ok(())
  }
}
