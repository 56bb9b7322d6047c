use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use atlaspack_graph::TraversalAction;
use indexmap::IndexMap;
use tracing::debug;
use tracing::instrument;

use crate::asset_graph::AssetGraph;
use crate::asset_graph::AssetGraphNode;
use crate::types::Asset;
use crate::types::Dependency;

pub type EntryAssets = Vec<(Arc<Asset>, Arc<Dependency>)>;

/// Groups entry assets and their entry dependencies by output directory
///
/// Targets appear in the order their first entry is discovered.
#[instrument(level = "debug", skip_all)]
pub fn get_entry_by_target(asset_graph: &AssetGraph) -> anyhow::Result<IndexMap<PathBuf, EntryAssets>> {
  let mut entries_by_target: IndexMap<PathBuf, EntryAssets> = IndexMap::new();

  asset_graph.traverse_fn(None, |_node_id, node, parent| {
    let AssetGraphNode::Asset(asset) = node else {
      return Ok(TraversalAction::Continue);
    };

    let dependency = parent
      .and_then(|parent| asset_graph.get_dependency(parent))
      .filter(|dependency| dependency.is_entry)
      .with_context(|| {
        format!(
          "Expected {} to be reached through an entry dependency",
          asset.file_path.display()
        )
      })?;

    let target = dependency.target.as_ref().with_context(|| {
      format!(
        "Entry dependency {} has no target",
        dependency.specifier
      )
    })?;

    entries_by_target
      .entry(target.dist_dir.clone())
      .or_default()
      .push((asset.clone(), dependency.clone()));

    Ok(TraversalAction::SkipChildren)
  })?;

  debug!(targets = entries_by_target.len(), "ideal graph: resolved entries");

  Ok(entries_by_target)
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use crate::test_utils::AssetGraphFixture;

  use super::*;

  #[test]
  fn groups_entries_by_dist_dir() {
    let mut fixture = AssetGraphFixture::new();
    let web = fixture.target("web");
    let node = fixture.target("node");

    fixture.entry_for("src/a.js", &web);
    fixture.entry_for("src/b.js", &node);
    fixture.entry_for("src/c.js", &web);
    fixture.sync("src/a.js", "src/shared.js");

    let entries = get_entry_by_target(&fixture.asset_graph).unwrap();
    let summary = entries
      .iter()
      .map(|(dist_dir, entries)| {
        let names = entries
          .iter()
          .map(|(asset, _)| fixture.name_of(asset))
          .collect::<Vec<_>>();
        (dist_dir.clone(), names)
      })
      .collect::<Vec<_>>();

    assert_eq!(
      summary,
      vec![
        (
          PathBuf::from("dist/web"),
          vec![String::from("src/a.js"), String::from("src/c.js")]
        ),
        (PathBuf::from("dist/node"), vec![String::from("src/b.js")]),
      ]
    );
  }

  #[test]
  fn entry_dependencies_without_targets_are_errors() {
    let mut fixture = AssetGraphFixture::new();
    fixture.entry_without_target("src/a.js");

    let error = get_entry_by_target(&fixture.asset_graph).unwrap_err();
    assert!(error.to_string().contains("has no target"));
  }
}
