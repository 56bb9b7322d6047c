//! Default bundler for atlaspack.
//!
//! Assigns the assets of an [`AssetGraph`] to bundles by computing an
//! [`IdealGraph`](ideal_graph::IdealGraph) per target and writing it into a
//! [`MutableBundleGraph`].

use std::fmt::Debug;
use std::sync::Arc;

use anyhow::Context;
use rayon::prelude::*;
use tracing::info;
use tracing::instrument;

pub mod asset_graph;
pub mod bundle_graph;
pub mod config;
pub mod decorate;
pub mod entries;
pub mod hash;
pub mod ideal_graph;
pub mod types;

#[cfg(test)]
mod test_utils;

use crate::asset_graph::AssetGraph;
use crate::bundle_graph::CreateBundleOptions;
use crate::bundle_graph::MutableBundleGraph;
use crate::config::BundlerConfig;
use crate::decorate::decorate_bundle_graph;
use crate::entries::get_entry_by_target;
use crate::entries::EntryAssets;
use crate::ideal_graph::create_ideal_graph;
use crate::ideal_graph::IdealGraph;
use crate::types::Asset;
use crate::types::Dependency;

/// Bundler algorithms take an asset graph and assign assets and dependencies to bundles
///
/// Implementations write bundles, bundle groups and their edges into the
/// provided bundle graph and leave the asset graph untouched.
pub trait Bundler: Debug + Send + Sync {
  fn bundle(
    &self,
    asset_graph: &AssetGraph,
    bundle_graph: &mut dyn MutableBundleGraph,
  ) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
pub struct DefaultBundler {
  pub config: BundlerConfig,
}

impl DefaultBundler {
  pub fn new(config: BundlerConfig) -> Self {
    Self { config }
  }
}

/// Work for a single target
struct TargetBundles {
  /// Entries bundled on their own because they carry a bundle behavior
  single_file_entries: EntryAssets,
  ideal_graph: IdealGraph,
}

impl Bundler for DefaultBundler {
  #[instrument(level = "debug", skip_all)]
  fn bundle(
    &self,
    asset_graph: &AssetGraph,
    bundle_graph: &mut dyn MutableBundleGraph,
  ) -> anyhow::Result<()> {
    let entries_by_target = get_entry_by_target(asset_graph)?;
    let targets = entries_by_target.iter().collect::<Vec<_>>();

    let target_bundles = targets
      .par_iter()
      .map(|(dist_dir, entries)| {
        let (single_file_entries, entries): (EntryAssets, EntryAssets) = entries
          .iter()
          .cloned()
          .partition(|(asset, _)| asset.bundle_behavior.is_some());

        let ideal_graph = create_ideal_graph(asset_graph, &self.config, &entries)
          .with_context(|| format!("Failed to bundle target {}", dist_dir.display()))?;

        Ok(TargetBundles {
          single_file_entries,
          ideal_graph,
        })
      })
      .collect::<anyhow::Result<Vec<_>>>()?;

    for TargetBundles {
      single_file_entries,
      ideal_graph,
    } in target_bundles
    {
      for (asset, dependency) in single_file_entries {
        create_single_file_bundle(bundle_graph, &asset, &dependency)?;
      }

      decorate_bundle_graph(&ideal_graph, bundle_graph)?;
    }

    info!(targets = targets.len(), "bundled asset graph");

    Ok(())
  }
}

/// Bundles an entry asset on its own, in a bundle group of its own
fn create_single_file_bundle(
  bundle_graph: &mut dyn MutableBundleGraph,
  asset: &Arc<Asset>,
  dependency: &Dependency,
) -> anyhow::Result<()> {
  let target = dependency
    .target
    .clone()
    .with_context(|| format!("Entry dependency {} has no target", dependency.specifier))?;

  let bundle_group_id = bundle_graph.create_bundle_group(dependency, &target)?;
  let bundle_id = bundle_graph.create_bundle(CreateBundleOptions::Entry {
    entry_asset: asset.clone(),
    target,
    bundle_behavior: asset.bundle_behavior,
    needs_stable_name: dependency.needs_stable_name,
  })?;

  bundle_graph.add_bundle_to_bundle_group(&bundle_id, &bundle_group_id)?;
  bundle_graph.add_asset_to_bundle(asset, &bundle_id)?;

  Ok(())
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;
  use crate::bundle_graph::NativeBundleGraph;
  use crate::test_utils::AssetGraphFixture;
  use crate::types::BundleBehavior;

  fn bundle(fixture: &AssetGraphFixture) -> NativeBundleGraph {
    let mut bundle_graph = NativeBundleGraph::from_asset_graph(&fixture.asset_graph).unwrap();
    DefaultBundler::default()
      .bundle(&fixture.asset_graph, &mut bundle_graph)
      .unwrap();
    bundle_graph
  }

  #[test]
  fn can_be_dyn() {
    let _bundler: Box<dyn Bundler> = Box::new(DefaultBundler::default());
  }

  #[test]
  fn bundles_every_target_independently() {
    let mut fixture = AssetGraphFixture::new();
    let web = fixture.target("web");
    let node = fixture.target("node");

    fixture.entry_for("index.js", &web);
    fixture.entry_for("server.js", &node);
    fixture.sync("index.js", "shared.js");
    fixture.sync("server.js", "shared.js");

    let bundle_graph = bundle(&fixture);

    let bundles = bundle_graph
      .get_bundles()
      .into_iter()
      .map(|bundle| {
        let assets = bundle_graph
          .get_bundle_assets(&bundle.id)
          .unwrap()
          .into_iter()
          .map(|asset| fixture.name_of(asset))
          .collect::<Vec<_>>();

        (bundle.target.name.clone(), assets)
      })
      .collect::<Vec<_>>();

    assert_eq!(
      bundles,
      vec![
        (String::from("web"), vec![String::from("index.js"), String::from("shared.js")]),
        (String::from("node"), vec![String::from("server.js"), String::from("shared.js")]),
      ]
    );
    assert_eq!(bundle_graph.get_entry_bundle_groups().len(), 2);
  }

  #[test]
  fn entries_with_a_bundle_behavior_are_bundled_alone() {
    let mut fixture = AssetGraphFixture::new();
    fixture.asset_with("worker.js", |asset| {
      asset.bundle_behavior = Some(BundleBehavior::Isolated);
    });
    fixture.entry("index.js");
    fixture.entry("worker.js");
    fixture.sync("index.js", "a.js");
    fixture.sync("worker.js", "b.js");

    let bundle_graph = bundle(&fixture);

    let worker_id = fixture.id_of("worker.js");
    let worker = bundle_graph
      .get_bundles()
      .into_iter()
      .find(|bundle| bundle.main_entry_id.as_ref() == Some(&worker_id))
      .unwrap();

    assert_eq!(worker.bundle_behavior, Some(BundleBehavior::Isolated));
    assert_eq!(
      bundle_graph
        .get_bundle_assets(&worker.id)
        .unwrap()
        .into_iter()
        .map(|asset| fixture.name_of(asset))
        .collect::<Vec<_>>(),
      vec!["worker.js"]
    );
    assert_eq!(bundle_graph.get_bundles().len(), 2);
    assert_eq!(bundle_graph.get_entry_bundle_groups().len(), 2);
  }

  #[test]
  fn entries_without_a_target_fail() {
    let mut fixture = AssetGraphFixture::new();
    fixture.entry_without_target("index.js");

    let mut bundle_graph = NativeBundleGraph::from_asset_graph(&fixture.asset_graph).unwrap();
    let result = DefaultBundler::default().bundle(&fixture.asset_graph, &mut bundle_graph);

    assert!(result.is_err());
    assert!(bundle_graph.get_bundles().is_empty());
  }
}
