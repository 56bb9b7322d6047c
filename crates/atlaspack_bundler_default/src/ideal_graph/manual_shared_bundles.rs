use std::collections::HashMap;
use std::collections::HashSet;
use std::path::PathBuf;

use atlaspack_graph::EdgeFilter;
use atlaspack_graph::TraversalAction;
use glob_match::glob_match;
use indexmap::IndexMap;
use path_slash::PathExt;
use pathdiff::diff_paths;
use tracing::debug;
use tracing::instrument;
use tracing::warn;

use crate::asset_graph::AssetGraphNode;
use crate::config::ManualSharedBundle;
use crate::hash::manual_shared_bundle_shard;
use crate::types::Asset;
use crate::types::Priority;

use super::manual_shared_bundle_key;
use super::manual_shared_bundle_unique_key;
use super::AssetIndex;
use super::BundleGraphNode;
use super::IdealBundle;
use super::IdealGraphBuilder;

/// Assets claimed by manual shared bundle rules, rules are referenced by position in the config
#[derive(Debug, Default)]
pub(crate) struct ManualSharedBundleMatches {
  pub asset_to_rule: HashMap<AssetIndex, usize>,

  /// Constant modules are copied into every matching bundle instead of being owned by one
  pub constant_module_to_rules: IndexMap<AssetIndex, Vec<usize>>,
}

impl IdealGraphBuilder<'_> {
  pub(super) fn manual_rule(&self, asset_index: AssetIndex) -> Option<&ManualSharedBundle> {
    let rule_index = self.manual.asset_to_rule.get(&asset_index)?;
    self.config.manual_shared_bundles.get(*rule_index)
  }

  /// Matches every rule's globs against the assets of this target
  ///
  /// Rules are applied last to first so that the first declared rule wins
  /// when several rules match the same asset.
  #[instrument(level = "debug", skip_all)]
  pub(super) fn match_manual_shared_bundles(&mut self) -> anyhow::Result<()> {
    let config = self.config;
    let asset_graph = self.asset_graph;

    if config.manual_shared_bundles.is_empty() {
      return Ok(());
    }

    let root_paths = config
      .manual_shared_bundles
      .iter()
      .filter_map(|rule| rule.root.as_ref())
      .map(|root| config.project_root.join(root))
      .collect::<HashSet<PathBuf>>();

    let mut root_nodes = HashMap::new();
    if !root_paths.is_empty() {
      asset_graph.traverse_fn(None, |node_id, node, _| {
        if let AssetGraphNode::Asset(asset) = node {
          if root_paths.contains(&asset.file_path) {
            root_nodes.insert(asset.file_path.clone(), node_id);

            if root_nodes.len() == root_paths.len() {
              return Ok(TraversalAction::Stop);
            }
          }
        }

        Ok(TraversalAction::Continue)
      })?;
    }

    let mut matches = ManualSharedBundleMatches::default();

    for (rule_index, rule) in config.manual_shared_bundles.iter().enumerate().rev() {
      let start = match &rule.root {
        Some(root) => match root_nodes.get(&config.project_root.join(root)) {
          Some(node_id) => Some(*node_id),
          None => {
            warn!(
              name = %rule.name,
              "Manual shared bundle \"{}\" skipped, no root asset found",
              rule.name
            );
            continue;
          }
        },
        None => None,
      };

      asset_graph.traverse_fn(start, |_, node, _| match node {
        AssetGraphNode::Dependency(dependency) if start.is_some() && dependency.priority == Priority::Lazy => {
          Ok(TraversalAction::SkipChildren)
        }
        AssetGraphNode::Asset(asset) => {
          let Some(asset_index) = self.asset_to_index.get(&asset.id).copied() else {
            return Ok(TraversalAction::Continue);
          };

          if !rule_matches(rule, asset, &config.project_root) {
            return Ok(TraversalAction::Continue);
          }

          if asset.is_constant_module() {
            matches
              .constant_module_to_rules
              .entry(asset_index)
              .or_default()
              .push(rule_index);
          } else {
            matches.asset_to_rule.insert(asset_index, rule_index);
          }

          Ok(TraversalAction::Continue)
        }
        _ => Ok(TraversalAction::Continue),
      })?;
    }

    debug!(
      matched = matches.asset_to_rule.len(),
      constant_modules = matches.constant_module_to_rules.len(),
      "ideal graph: matched manual shared bundles"
    );

    self.manual = matches;
    Ok(())
  }

  /// Spreads the assets of manual shared bundles with a `split` over sibling bundles
  ///
  /// Each asset stays in the original bundle or moves to the sibling for its
  /// shard, so the partition only depends on asset ids.
  #[instrument(level = "debug", skip_all)]
  pub(super) fn split_manual_shared_bundles(&mut self) -> anyhow::Result<()> {
    let bundle_ids = self.manual_shared_map.values().copied().collect::<Vec<_>>();

    for bundle_id in bundle_ids {
      let Some(BundleGraphNode::Bundle(bundle)) = self.bundle_graph.get_node(bundle_id) else {
        continue;
      };

      let Some(name) = bundle.manual_shared_bundle.clone() else {
        continue;
      };

      let split = self
        .config
        .manual_shared_bundles
        .iter()
        .find(|rule| rule.name == name)
        .and_then(|rule| rule.split)
        .unwrap_or(1);

      if split <= 1 {
        continue;
      }

      let mut shards: IndexMap<u32, Vec<AssetIndex>> = IndexMap::new();
      for asset_index in bundle.assets.iter().copied() {
        let shard = manual_shared_bundle_shard(&self.assets[asset_index].id, split);
        if shard != 0 {
          shards.entry(shard).or_default().push(asset_index);
        }
      }
      shards.sort_keys();

      let parents = self
        .bundle_graph
        .get_node_ids_connected_to(bundle_id, EdgeFilter::All);
      let source_bundles = bundle.source_bundles.clone();
      let internalized_assets = bundle.internalized_assets.clone();
      let bundle_type = bundle.bundle_type.clone();
      let env = bundle.env.clone();
      let target = bundle.target.clone();

      for (shard, members) in shards {
        let mut sibling = IdealBundle::keyed(
          Some(format!(
            "{}{shard}",
            manual_shared_bundle_unique_key(&name, &bundle_type)
          )),
          bundle_type.clone(),
          env.clone(),
          target.clone(),
        );
        sibling.manual_shared_bundle = Some(name.clone());
        sibling.source_bundles = source_bundles.clone();
        sibling.internalized_assets = internalized_assets.clone();

        let sibling_id = self.add_bundle(sibling);
        for parent_id in &parents {
          self.bundle_graph.add_edge(*parent_id, sibling_id, ())?;
        }

        for asset_index in members {
          let size = self.assets[asset_index].size();
          self.bundle_mut(bundle_id)?.remove_asset(asset_index, size);
          self.bundle_mut(sibling_id)?.add_asset(asset_index, size);

          if self.manual_asset_to_bundle.get(&asset_index) == Some(&bundle_id) {
            self.manual_asset_to_bundle.insert(asset_index, sibling_id);
          }
        }

        debug!(name = %name, shard, "ideal graph: split manual shared bundle");
      }

      if self.bundle(bundle_id)?.assets.is_empty() {
        self.bundle_graph.remove_node(bundle_id)?;
      }
    }

    Ok(())
  }

  /// Copies constant modules into every manual shared bundle whose rule matched them
  pub(super) fn insert_constant_modules_into_manual_bundles(&mut self) -> anyhow::Result<()> {
    let constant_modules = self
      .manual
      .constant_module_to_rules
      .iter()
      .map(|(asset_index, rules)| (*asset_index, rules.clone()))
      .collect::<Vec<_>>();

    for (asset_index, rule_indices) in constant_modules {
      let file_type = self.assets[asset_index].file_type.clone();

      for rule_index in rule_indices {
        let Some(rule) = self.config.manual_shared_bundles.get(rule_index) else {
          continue;
        };

        let key = manual_shared_bundle_key(&rule.name, &file_type);
        let Some(bundle_id) = self.manual_shared_map.get(&key).copied() else {
          continue;
        };

        if self.has_bundle(bundle_id) {
          self.add_asset_to_bundle(bundle_id, asset_index)?;
        }
      }
    }

    Ok(())
  }
}

fn rule_matches(rule: &ManualSharedBundle, asset: &Asset, project_root: &std::path::Path) -> bool {
  if let Some(types) = &rule.types {
    if !types.iter().any(|file_type| file_type == asset.file_type.extension()) {
      return false;
    }
  }

  let relative_path = diff_paths(&asset.file_path, project_root).unwrap_or_else(|| asset.file_path.clone());
  let relative_path: String = relative_path.to_slash_lossy().into();

  rule.assets.iter().any(|glob| glob_match(glob, &relative_path))
}
