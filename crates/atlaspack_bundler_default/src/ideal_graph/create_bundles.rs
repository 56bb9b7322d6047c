use std::sync::Arc;

use anyhow::Context;
use atlaspack_graph::GraphVisitor;
use atlaspack_graph::NodeId;
use atlaspack_graph::TraversalAction;
use tracing::debug;
use tracing::instrument;

use crate::asset_graph::AssetGraphNode;
use crate::types::Asset;
use crate::types::BundleBehavior;
use crate::types::Dependency;
use crate::types::Priority;

use super::manual_shared_bundle_key;
use super::manual_shared_bundle_unique_key;
use super::AssetIndex;
use super::IdealBundle;
use super::IdealGraphBuilder;

impl IdealGraphBuilder<'_> {
  /// Creates one bundle group per entry asset
  #[instrument(level = "debug", skip_all)]
  pub(super) fn create_entry_bundles(&mut self) -> anyhow::Result<()> {
    let entries = self
      .entries
      .iter()
      .map(|(asset_index, dependency)| (*asset_index, dependency.clone()))
      .collect::<Vec<_>>();

    for (asset_index, dependency) in entries {
      let asset = self.assets[asset_index].clone();
      let target = dependency
        .target
        .clone()
        .with_context(|| format!("Entry dependency {} has no target", dependency.specifier))?;

      let bundle = IdealBundle::from_asset(asset_index, &asset, target, None, dependency.is_entry);
      let bundle_id = self.add_bundle(bundle);

      self.bundle_graph.add_edge(self.bundle_graph_root, bundle_id, ())?;
      self.bundles.insert(asset.id.clone(), bundle_id);
      self.bundle_roots.insert(asset_index, (bundle_id, bundle_id));
      self.bundle_group_bundle_ids.insert(bundle_id);
      self.link_dependency_to_bundle(&dependency, bundle_id, dependency.priority)?;
    }

    debug!(entries = self.entries.len(), "ideal graph: created entry bundles");
    Ok(())
  }

  /// Walks the asset graph creating a bundle for every async import, type change and inline asset
  #[instrument(level = "debug", skip_all)]
  pub(super) fn create_bundles(&mut self) -> anyhow::Result<()> {
    let asset_graph = self.asset_graph;
    let mut visitor = CreateBundlesVisitor {
      builder: self,
      stack: Vec::new(),
    };

    asset_graph.traverse(&mut visitor, None)?;

    debug!(
      bundles = self.bundle_graph.node_count() - 1,
      bundle_roots = self.bundle_roots.len(),
      "ideal graph: created bundles"
    );

    Ok(())
  }
}

/// Tracks the enclosing bundle roots while walking the asset graph
struct CreateBundlesVisitor<'b, 'a> {
  builder: &'b mut IdealGraphBuilder<'a>,

  /// `(bundle root asset, bundle group bundle)` for every bundle root on the current path
  stack: Vec<(AssetIndex, NodeId)>,
}

impl GraphVisitor<AssetGraphNode> for CreateBundlesVisitor<'_, '_> {
  fn enter(
    &mut self,
    _node_id: NodeId,
    node: &AssetGraphNode,
    parent: Option<NodeId>,
  ) -> anyhow::Result<TraversalAction> {
    match node {
      AssetGraphNode::Root => Ok(TraversalAction::Continue),
      AssetGraphNode::Asset(asset) => self.enter_asset(asset, parent),
      AssetGraphNode::Dependency(dependency) => self.enter_dependency(dependency, parent),
    }
  }

  fn exit(
    &mut self,
    _node_id: NodeId,
    node: &AssetGraphNode,
    _parent: Option<NodeId>,
  ) -> anyhow::Result<TraversalAction> {
    if let AssetGraphNode::Asset(asset) = node {
      let asset_index = self.builder.asset_to_index.get(&asset.id);
      if asset_index.is_some() && self.stack.last().map(|(root, _)| root) == asset_index {
        self.stack.pop();
      }
    }

    Ok(TraversalAction::Continue)
  }
}

impl CreateBundlesVisitor<'_, '_> {
  fn enter_asset(&mut self, asset: &Arc<Asset>, parent: Option<NodeId>) -> anyhow::Result<TraversalAction> {
    if self.builder.is_foreign_entry(asset, parent) {
      return Ok(TraversalAction::SkipChildren);
    }

    let asset_index = self.builder.asset_index(&asset.id)?;

    if let Some((bundle_id, group_id)) = self.builder.bundle_roots.get(&asset_index).copied() {
      if bundle_id == group_id {
        self.stack.push((asset_index, bundle_id));
      } else {
        let (_, enclosing_group_id) = *self
          .stack
          .last()
          .context("Bundle root visited outside of a bundle group")?;
        self.stack.push((asset_index, enclosing_group_id));
      }
    }

    Ok(TraversalAction::Continue)
  }

  fn enter_dependency(
    &mut self,
    dependency: &Arc<Dependency>,
    parent: Option<NodeId>,
  ) -> anyhow::Result<TraversalAction> {
    let asset_graph = self.builder.asset_graph;

    // Entry dependencies hang off the root and were handled up front
    let Some(parent_asset) = parent.and_then(|parent| asset_graph.get_asset(parent)) else {
      return Ok(TraversalAction::Continue);
    };

    for child in asset_graph.get_dependency_assets(dependency)? {
      self.place_dependency_asset(dependency, parent_asset, child)?;
    }

    Ok(TraversalAction::Continue)
  }

  fn place_dependency_asset(
    &mut self,
    dependency: &Arc<Dependency>,
    parent_asset: &Asset,
    child: &Arc<Asset>,
  ) -> anyhow::Result<()> {
    let builder = &mut *self.builder;
    let child_index = builder.asset_index(&child.id)?;

    let manual_name = builder.manual_rule(child_index).map(|rule| rule.name.clone());
    let manual_key = manual_name
      .as_ref()
      .map(|name| manual_shared_bundle_key(name, &child.file_type));

    let mut existing_bundle_id = builder.bundles.get(&child.id).copied();
    if let Some(manual_bundle_id) = manual_key.as_ref().and_then(|key| builder.manual_shared_map.get(key)) {
      existing_bundle_id = Some(*manual_bundle_id);
    }

    let is_inline = dependency.bundle_behavior == Some(BundleBehavior::Inline)
      || child.bundle_behavior == Some(BundleBehavior::Inline);

    let placed_bundle_id = if dependency.priority == Priority::Lazy
      || child.bundle_behavior == Some(BundleBehavior::Isolated)
    {
      let bundle_id = match existing_bundle_id {
        Some(bundle_id) => {
          upgrade_to_isolated(builder, bundle_id, dependency)?;
          bundle_id
        }
        None => {
          let (_, first_group_id) = *self
            .stack
            .first()
            .context("Async dependency visited outside of a bundle group")?;
          let target = builder.bundle(first_group_id)?.target.clone();
          let needs_stable_name = !is_inline && (dependency.is_entry || dependency.needs_stable_name);

          let bundle = IdealBundle::from_asset(
            child_index,
            child,
            target,
            dependency.bundle_behavior.or(child.bundle_behavior),
            needs_stable_name,
          );

          let bundle_id = builder.add_bundle(bundle);
          builder.bundles.insert(child.id.clone(), bundle_id);
          builder.bundle_roots.insert(child_index, (bundle_id, bundle_id));
          builder.bundle_group_bundle_ids.insert(bundle_id);
          builder.bundle_graph.add_edge(builder.bundle_graph_root, bundle_id, ())?;

          if manual_name.is_some() {
            builder
              .manual_bundle_to_internalized
              .entry(bundle_id)
              .or_default()
              .push(child_index);
          }

          debug!(
            asset = %child.file_path.display(),
            "ideal graph: created async bundle"
          );

          bundle_id
        }
      };

      // Manual shared bundles load alongside their importer instead of forming a bundle group
      if manual_name.is_some() {
        let (referencing_root, _) = *self
          .stack
          .last()
          .context("Async dependency visited outside of a bundle group")?;
        let (referencing_bundle_id, _) = builder.bundle_root(referencing_root)?;

        if referencing_bundle_id != bundle_id {
          builder.bundle_graph.add_edge(referencing_bundle_id, bundle_id, ())?;
          builder
            .bundle_mut(bundle_id)?
            .source_bundles
            .insert(referencing_bundle_id);
        }
      }

      builder.link_dependency_to_bundle(dependency, bundle_id, dependency.priority)?;
      Some((bundle_id, false))
    } else if parent_asset.file_type != child.file_type
      || dependency.priority == Priority::Parallel
      || child.bundle_behavior == Some(BundleBehavior::Inline)
    {
      let (referencing_root, group_id) = *self
        .stack
        .last()
        .context("Parallel dependency visited outside of a bundle group")?;
      let (referencing_bundle_id, _) = builder.bundle_root(referencing_root)?;

      // A type change directly under an entry can share the entry's bundle group
      let mut merged_into_group = false;
      if parent_asset.file_type != child.file_type && dependency.bundle_behavior.is_none() {
        if let Some(group_entry) = builder.bundle(group_id)?.main_entry_asset {
          if builder.entries.contains_key(&group_entry) && can_merge(&builder.assets[group_entry], child) {
            existing_bundle_id = Some(group_id);
            merged_into_group = true;
          }
        }
      }

      let bundle_id = match existing_bundle_id {
        Some(bundle_id) => {
          upgrade_to_isolated(builder, bundle_id, dependency)?;
          bundle_id
        }
        None => {
          let referencing_bundle = builder.bundle(referencing_bundle_id)?;
          let needs_stable_name = if is_inline
            || (dependency.priority == Priority::Parallel && !dependency.needs_stable_name)
          {
            false
          } else {
            referencing_bundle.needs_stable_name
          };

          let bundle = IdealBundle::from_asset(
            child_index,
            child,
            referencing_bundle.target.clone(),
            dependency.bundle_behavior.or(child.bundle_behavior),
            needs_stable_name,
          );

          debug!(
            asset = %child.file_path.display(),
            "ideal graph: created parallel bundle"
          );

          builder.add_bundle(bundle)
        }
      };

      if merged_into_group {
        builder.add_asset_to_bundle(group_id, child_index)?;
      }

      builder.bundles.insert(child.id.clone(), bundle_id);
      builder.bundle_roots.insert(child_index, (bundle_id, group_id));

      if referencing_bundle_id != bundle_id {
        builder.bundle_graph.add_edge(referencing_bundle_id, bundle_id, ())?;
      }

      if bundle_id != group_id {
        builder.link_dependency_to_bundle(dependency, bundle_id, Priority::Parallel)?;
      }

      builder
        .asset_reference
        .entry(child_index)
        .or_default()
        .push((dependency.clone(), bundle_id));

      Some((bundle_id, merged_into_group))
    } else {
      None
    };

    // Manual shared bundle members become roots of the rule's bundle
    if let (Some(name), Some(key), Some((bundle_id, false))) = (manual_name, manual_key, placed_bundle_id) {
      builder.manual_asset_to_bundle.insert(child_index, bundle_id);
      builder.add_asset_to_bundle(bundle_id, child_index)?;
      builder.bundles.insert(child.id.clone(), bundle_id);
      builder.bundle_roots.insert(child_index, (bundle_id, bundle_id));
      builder.manual_shared_map.entry(key).or_insert(bundle_id);

      let unique_key = manual_shared_bundle_unique_key(&name, &child.file_type);
      let bundle = builder.bundle_mut(bundle_id)?;
      bundle.manual_shared_bundle = Some(name);
      bundle.unique_key = Some(unique_key);
    }

    Ok(())
  }
}

fn upgrade_to_isolated(
  builder: &mut IdealGraphBuilder<'_>,
  bundle_id: NodeId,
  dependency: &Dependency,
) -> anyhow::Result<()> {
  let bundle = builder.bundle_mut(bundle_id)?;
  if dependency.bundle_behavior == Some(BundleBehavior::Isolated) && bundle.bundle_behavior.is_none() {
    bundle.bundle_behavior = Some(BundleBehavior::Isolated);
  }
  Ok(())
}

/// Whether two assets can live in the same bundle
fn can_merge(a: &Asset, b: &Asset) -> bool {
  a.file_type == b.file_type
    && a.env.context == b.env.context
    && a.bundle_behavior.is_none()
    && b.bundle_behavior.is_none()
}
