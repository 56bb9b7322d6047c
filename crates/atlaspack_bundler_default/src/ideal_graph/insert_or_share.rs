use atlaspack_graph::BitSet;
use atlaspack_graph::NodeId;
use itertools::Itertools;
use tracing::debug;
use tracing::instrument;

use crate::types::BundleBehavior;

use super::manual_shared_bundle_key;
use super::manual_shared_bundle_unique_key;
use super::AssetIndex;
use super::IdealBundle;
use super::IdealGraphBuilder;

impl IdealGraphBuilder<'_> {
  /// Places every asset into the bundles of the roots that reach it
  ///
  /// Assets reached from several roots that cannot hold their own copy are
  /// moved into a bundle the roots already load, or into a new shared bundle.
  #[instrument(level = "debug", skip_all)]
  pub(super) fn insert_or_share(&mut self) -> anyhow::Result<()> {
    let mut shared = 0;

    for asset_index in 0..self.assets.len() {
      let asset = self.assets[asset_index].clone();

      if let Some((bundle_id, _)) = self.bundle_roots.get(&asset_index).copied() {
        self.assign_inline_constants(asset_index, bundle_id)?;
      }

      // Constant modules follow the assets that import them
      if asset.is_constant_module() {
        continue;
      }

      let mut reachable = Vec::new();
      for root_node_id in self.reachable_roots[asset_index].iter().collect::<Vec<_>>() {
        let Some(Some(root_index)) = self.bundle_root_graph.get_node(root_node_id).copied() else {
          continue;
        };

        if self.keeps_own_copy(root_index)? {
          self.add_asset_to_bundle_root(asset_index, root_index)?;
          continue;
        }

        let is_available = self.ancestor_assets[root_node_id]
          .as_ref()
          .is_some_and(|ancestor_assets| ancestor_assets.has(asset_index));

        if !is_available {
          reachable.push(root_node_id);
        }
      }

      if !reachable.is_empty() {
        if let Some(name) = self.manual_rule(asset_index).map(|rule| rule.name.clone()) {
          self.place_in_manual_shared_bundle(asset_index, &name, &reachable)?;
          continue;
        }
      }

      if !self.config.disable_shared_bundles {
        self.reuse_existing_bundles(asset_index, &mut reachable)?;
      }

      if !self.config.disable_shared_bundles && reachable.len() > self.config.min_bundles {
        self.add_to_shared_bundle(asset_index, &reachable)?;
        shared += 1;
      } else {
        for root_node_id in reachable {
          let root_index = self.root_asset(root_node_id)?;
          self.add_asset_to_bundle_root(asset_index, root_index)?;
        }
      }
    }

    debug!(shared, "ideal graph: placed assets");
    Ok(())
  }

  /// Roots whose bundle always receives its own copy of the assets it reaches
  fn keeps_own_copy(&self, root_index: AssetIndex) -> anyhow::Result<bool> {
    if self.entries.contains_key(&root_index) || !self.assets[root_index].is_bundle_splittable {
      return Ok(true);
    }

    if !self.bundle_roots.contains_key(&root_index) {
      return Ok(false);
    }

    let bundle = self.bundle_for_root(root_index)?;
    Ok(bundle.needs_stable_name || bundle.bundle_behavior == Some(BundleBehavior::Isolated))
  }

  /// Drops roots that already load a bundle containing the asset
  ///
  /// When the asset is itself a bundle root, the other roots reference its
  /// bundle. Otherwise a root that reaches another candidate root references
  /// that root's bundle instead.
  fn reuse_existing_bundles(
    &mut self,
    asset_index: AssetIndex,
    reachable: &mut Vec<NodeId>,
  ) -> anyhow::Result<()> {
    let asset_bundle_id = self.bundles.get(&self.assets[asset_index].id).copied();

    for candidate in reachable.clone() {
      let candidate_index = self.root_asset(candidate)?;
      if self.assets[candidate_index].env.is_isolated() {
        continue;
      }

      let (candidate_bundle_id, _) = self.bundle_root(candidate_index)?;

      if let Some(reused_bundle_id) = asset_bundle_id {
        if reused_bundle_id == candidate_bundle_id {
          continue;
        }

        reachable.retain(|root_node_id| *root_node_id != candidate);
        self.bundle_graph.add_edge(candidate_bundle_id, reused_bundle_id, ())?;
        self.bundle_mut(reused_bundle_id)?.source_bundles.insert(candidate_bundle_id);
        continue;
      }

      for other in reachable.clone() {
        if other == candidate {
          continue;
        }

        let other_index = self.root_asset(other)?;
        if !self.reachable_assets[candidate].has(other_index) {
          continue;
        }

        let (other_bundle_id, _) = self.bundle_root(other_index)?;
        reachable.retain(|root_node_id| *root_node_id != candidate);
        self.bundle_graph.add_edge(candidate_bundle_id, other_bundle_id, ())?;
        self.bundle_mut(other_bundle_id)?.source_bundles.insert(candidate_bundle_id);
        break;
      }
    }

    Ok(())
  }

  /// Adds the asset to the bundle shared by exactly the given roots
  fn add_to_shared_bundle(&mut self, asset_index: AssetIndex, reachable: &[NodeId]) -> anyhow::Result<()> {
    let asset = self.assets[asset_index].clone();

    let mut source_bundle_ids = Vec::with_capacity(reachable.len());
    let mut root_ids = Vec::with_capacity(reachable.len());
    for root_node_id in reachable {
      let root_index = self.root_asset(*root_node_id)?;
      source_bundle_ids.push(self.bundle_root(root_index)?.0);
      root_ids.push(self.assets[root_index].id.as_str());
    }

    root_ids.sort_unstable();
    let key = format!("{}.{}", root_ids.iter().join(","), asset.file_type.extension());

    let bundle_id = match self.bundles.get(&key).copied() {
      Some(bundle_id) => bundle_id,
      None => {
        let first_source = self.bundle(source_bundle_ids[0])?;
        let mut internalized_assets = first_source
          .internalized_assets
          .clone()
          .unwrap_or_else(|| BitSet::new(self.assets.len()));

        for source_bundle_id in &source_bundle_ids[1..] {
          if *source_bundle_id == source_bundle_ids[0] {
            continue;
          }

          match &self.bundle(*source_bundle_id)?.internalized_assets {
            Some(source_internalized) => internalized_assets.intersect(source_internalized),
            None => internalized_assets.clear(),
          }
        }

        let mut bundle = IdealBundle::keyed(
          None,
          asset.file_type.clone(),
          first_source.env.clone(),
          first_source.target.clone(),
        );
        bundle.source_bundles = source_bundle_ids.iter().copied().collect();
        bundle.internalized_assets = Some(internalized_assets);

        let bundle_id = self.add_bundle(bundle);
        self.bundles.insert(key, bundle_id);

        debug!(
          asset = %asset.file_path.display(),
          sources = source_bundle_ids.len(),
          "ideal graph: created shared bundle"
        );

        bundle_id
      }
    };

    self.add_asset_to_bundle(bundle_id, asset_index)?;
    self.assign_inline_constants(asset_index, bundle_id)?;

    for source_bundle_id in source_bundle_ids {
      if source_bundle_id != bundle_id {
        self.bundle_graph.add_edge(source_bundle_id, bundle_id, ())?;
      }
    }

    self.dependency_bundle_node(bundle_id);
    Ok(())
  }

  fn place_in_manual_shared_bundle(
    &mut self,
    asset_index: AssetIndex,
    name: &str,
    reachable: &[NodeId],
  ) -> anyhow::Result<()> {
    let file_type = self.assets[asset_index].file_type.clone();
    let key = manual_shared_bundle_key(name, &file_type);

    let mut source_bundle_ids = Vec::with_capacity(reachable.len());
    for root_node_id in reachable {
      let root_index = self.root_asset(*root_node_id)?;
      source_bundle_ids.push(self.bundle_root(root_index)?.0);
    }

    let bundle_id = match self.manual_shared_map.get(&key).copied() {
      Some(bundle_id) => bundle_id,
      None => {
        let first_source = self.bundle(source_bundle_ids[0])?;
        let mut bundle = IdealBundle::keyed(
          Some(manual_shared_bundle_unique_key(name, &file_type)),
          file_type.clone(),
          first_source.env.clone(),
          first_source.target.clone(),
        );
        bundle.manual_shared_bundle = Some(String::from(name));

        let bundle_id = self.add_bundle(bundle);
        self.manual_shared_map.insert(key, bundle_id);

        debug!(name, "ideal graph: created manual shared bundle");
        bundle_id
      }
    };

    self.add_asset_to_bundle(bundle_id, asset_index)?;
    self.assign_inline_constants(asset_index, bundle_id)?;

    for source_bundle_id in source_bundle_ids {
      if source_bundle_id == bundle_id {
        continue;
      }

      self.bundle_mut(bundle_id)?.source_bundles.insert(source_bundle_id);
      self.bundle_graph.add_edge(source_bundle_id, bundle_id, ())?;
    }

    self.manual_asset_to_bundle.insert(asset_index, bundle_id);
    self.dependency_bundle_node(bundle_id);
    Ok(())
  }

  /// Adds an asset to a bundle root's bundle, or to its type change sibling when the types differ
  pub(super) fn add_asset_to_bundle_root(
    &mut self,
    asset_index: AssetIndex,
    root_index: AssetIndex,
  ) -> anyhow::Result<()> {
    let (bundle_id, group_id) = self.bundle_root(root_index)?;
    let asset_type = self.assets[asset_index].file_type.clone();
    let bundle = self.bundle(bundle_id)?;

    let target_bundle_id = if bundle.bundle_type == asset_type {
      bundle_id
    } else {
      let key = format!(
        "{}.{}",
        self.bundle_group_key(group_id, bundle_id)?,
        asset_type.extension()
      );

      match self.bundles.get(&key).copied() {
        Some(type_change_bundle_id) => type_change_bundle_id,
        None => {
          let mut type_change = IdealBundle::keyed(
            Some(key.clone()),
            asset_type,
            bundle.env.clone(),
            bundle.target.clone(),
          );
          type_change.needs_stable_name = bundle.needs_stable_name;
          type_change.bundle_behavior = bundle.bundle_behavior;

          let type_change_bundle_id = self.add_bundle(type_change);
          self.bundle_graph.add_edge(bundle_id, type_change_bundle_id, ())?;
          self.bundles.insert(key, type_change_bundle_id);
          type_change_bundle_id
        }
      }
    };

    self.add_asset_to_bundle(target_bundle_id, asset_index)?;
    self.assign_inline_constants(asset_index, target_bundle_id)
  }

  /// Adds the constant modules imported by `parent_index` to a bundle
  pub(super) fn assign_inline_constants(
    &mut self,
    parent_index: AssetIndex,
    bundle_id: NodeId,
  ) -> anyhow::Result<()> {
    let Some(constants) = self.inline_constant_deps.get(&parent_index) else {
      return Ok(());
    };

    for constant_index in constants.iter().copied().collect::<Vec<_>>() {
      self.add_asset_to_bundle(bundle_id, constant_index)?;
    }

    Ok(())
  }
}
