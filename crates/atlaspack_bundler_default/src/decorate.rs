use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use anyhow::Context;
use atlaspack_graph::EdgeFilter;
use atlaspack_graph::NodeId;
use itertools::Itertools;
use tracing::debug;
use tracing::instrument;

use crate::bundle_graph::BundleGroupId;
use crate::bundle_graph::BundleId;
use crate::bundle_graph::CreateBundleOptions;
use crate::bundle_graph::MutableBundleGraph;
use crate::ideal_graph::bundle_content_key;
use crate::ideal_graph::BundleGraphNode;
use crate::ideal_graph::DependencyBundleGraphNode;
use crate::ideal_graph::IdealBundle;
use crate::ideal_graph::IdealGraph;
use crate::types::Dependency;
use crate::types::Priority;
use crate::types::SpecifierType;

/// Writes the bundles of an ideal graph into a mutable bundle graph
#[instrument(level = "debug", skip_all)]
pub fn decorate_bundle_graph(
  ideal_graph: &IdealGraph,
  bundle_graph: &mut dyn MutableBundleGraph,
) -> anyhow::Result<()> {
  let mut decorator = Decorator {
    ideal_graph,
    bundle_graph,
    bundle_ids: HashMap::new(),
    bundle_groups: HashMap::new(),
  };

  decorator.create_bundles()?;
  decorator.internalize_dependencies()?;
  decorator.add_bundles_to_groups()?;
  decorator.create_references()?;

  debug!(
    bundles = decorator.bundle_ids.len(),
    bundle_groups = decorator.bundle_groups.len(),
    "decorated bundle graph"
  );

  Ok(())
}

struct Decorator<'a> {
  ideal_graph: &'a IdealGraph,
  bundle_graph: &'a mut dyn MutableBundleGraph,

  /// Output bundle for every ideal bundle
  bundle_ids: HashMap<NodeId, BundleId>,

  /// Bundle groups started by each bundle group bundle
  bundle_groups: HashMap<NodeId, Vec<BundleGroupId>>,
}

impl Decorator<'_> {
  fn bundle_id(&self, ideal_bundle_id: NodeId) -> anyhow::Result<&BundleId> {
    self
      .bundle_ids
      .get(&ideal_bundle_id)
      .ok_or_else(|| anyhow!("Bundle {ideal_bundle_id} was not decorated"))
  }

  fn create_bundles(&mut self) -> anyhow::Result<()> {
    let ideal_graph = self.ideal_graph;

    for (ideal_bundle_id, ideal_bundle) in ideal_graph.bundles() {
      let bundle_id = if ideal_graph.bundle_group_bundle_ids.contains(&ideal_bundle_id) {
        self.create_bundle_group(ideal_bundle_id, ideal_bundle)?
      } else {
        let options = self.bundle_options(ideal_bundle)?;
        self.bundle_graph.create_bundle(options)?
      };

      for asset_index in &ideal_bundle.assets {
        let asset = ideal_graph
          .assets
          .get(*asset_index)
          .with_context(|| format!("Asset {asset_index} is not in the ideal graph"))?;

        self.bundle_graph.add_asset_to_bundle(asset, &bundle_id)?;
      }

      self.bundle_ids.insert(ideal_bundle_id, bundle_id);
    }

    Ok(())
  }

  /// Creates a bundle group for every dependency that loads the bundle
  fn create_bundle_group(
    &mut self,
    ideal_bundle_id: NodeId,
    ideal_bundle: &IdealBundle,
  ) -> anyhow::Result<BundleId> {
    let entry_asset_index = ideal_bundle
      .main_entry_asset
      .with_context(|| format!("Bundle group bundle {ideal_bundle_id} has no entry asset"))?;
    let entry_asset = self
      .ideal_graph
      .assets
      .get(entry_asset_index)
      .with_context(|| format!("Asset {entry_asset_index} is not in the ideal graph"))?;

    let mut bundle_group_ids = Vec::new();
    for dependency in self.dependencies_loading(ideal_bundle_id)? {
      let bundle_group_id = self
        .bundle_graph
        .create_bundle_group(&dependency, &ideal_bundle.target)?;
      if !bundle_group_ids.contains(&bundle_group_id) {
        bundle_group_ids.push(bundle_group_id);
      }
    }

    if bundle_group_ids.is_empty() {
      return Err(anyhow!(
        "No bundle group was resolved for {}",
        entry_asset.file_path.display()
      ));
    }

    let bundle_id = self.bundle_graph.create_bundle(CreateBundleOptions::Entry {
      entry_asset: entry_asset.clone(),
      target: ideal_bundle.target.clone(),
      bundle_behavior: ideal_bundle.bundle_behavior,
      needs_stable_name: ideal_bundle.needs_stable_name,
    })?;

    for bundle_group_id in &bundle_group_ids {
      self
        .bundle_graph
        .add_bundle_to_bundle_group(&bundle_id, bundle_group_id)?;
    }
    self.bundle_groups.insert(ideal_bundle_id, bundle_group_ids);

    Ok(bundle_id)
  }

  fn dependencies_loading(&self, ideal_bundle_id: NodeId) -> anyhow::Result<Vec<Arc<Dependency>>> {
    let dependency_bundle_graph = &self.ideal_graph.dependency_bundle_graph;
    let node_id = dependency_bundle_graph
      .get_node_id_by_content_key(&bundle_content_key(ideal_bundle_id))
      .with_context(|| format!("Bundle {ideal_bundle_id} is not loaded by any dependency"))?;

    dependency_bundle_graph
      .get_node_ids_connected_to(node_id, EdgeFilter::All)
      .into_iter()
      .map(|parent| match dependency_bundle_graph.get_node(parent) {
        Some(DependencyBundleGraphNode::Dependency(dependency)) => Ok(dependency.clone()),
        _ => Err(anyhow!("Expected node {parent} to be a dependency")),
      })
      .collect()
  }

  fn bundle_options(&self, ideal_bundle: &IdealBundle) -> anyhow::Result<CreateBundleOptions> {
    let is_shared = !ideal_bundle.source_bundles.is_empty() && ideal_bundle.main_entry_asset.is_none();

    if is_shared || ideal_bundle.unique_key.is_some() {
      let unique_key = match &ideal_bundle.unique_key {
        Some(unique_key) => unique_key.clone(),
        None => ideal_bundle
          .assets
          .iter()
          .filter_map(|asset_index| self.ideal_graph.assets.get(*asset_index))
          .map(|asset| asset.id.as_str())
          .join(","),
      };

      return Ok(CreateBundleOptions::Keyed {
        unique_key,
        bundle_type: ideal_bundle.bundle_type.clone(),
        env: ideal_bundle.env.clone(),
        target: ideal_bundle.target.clone(),
        bundle_behavior: ideal_bundle.bundle_behavior,
        needs_stable_name: ideal_bundle.needs_stable_name,
        manual_shared_bundle: ideal_bundle.manual_shared_bundle.clone(),
      });
    }

    let entry_asset_index = ideal_bundle
      .main_entry_asset
      .context("Bundle has neither an entry asset nor a unique key")?;
    let entry_asset = self
      .ideal_graph
      .assets
      .get(entry_asset_index)
      .with_context(|| format!("Asset {entry_asset_index} is not in the ideal graph"))?;

    Ok(CreateBundleOptions::Entry {
      entry_asset: entry_asset.clone(),
      target: ideal_bundle.target.clone(),
      bundle_behavior: ideal_bundle.bundle_behavior,
      needs_stable_name: ideal_bundle.needs_stable_name,
    })
  }

  fn internalize_dependencies(&mut self) -> anyhow::Result<()> {
    let ideal_graph = self.ideal_graph;

    for (ideal_bundle_id, ideal_bundle) in ideal_graph.bundles() {
      let Some(internalized_assets) = &ideal_bundle.internalized_assets else {
        continue;
      };
      let bundle_id = self.bundle_id(ideal_bundle_id)?.clone();

      for asset_index in internalized_assets.iter() {
        let Some(asset) = ideal_graph.assets.get(asset_index) else {
          continue;
        };

        for dependency in self.bundle_graph.get_incoming_dependencies(asset)? {
          if is_internalizable(&dependency)
            && self.bundle_graph.bundle_has_dependency(&bundle_id, &dependency)?
          {
            self
              .bundle_graph
              .internalize_async_dependency(&bundle_id, &dependency)?;
          }
        }
      }
    }

    // Manual shared bundle members are loaded wherever their importers are
    for asset_index in ideal_graph.manual_asset_to_bundle.keys() {
      let Some(asset) = ideal_graph.assets.get(*asset_index) else {
        continue;
      };

      for dependency in self.bundle_graph.get_incoming_dependencies(asset)? {
        if !is_internalizable(&dependency) {
          continue;
        }

        for bundle_id in self.bundle_graph.get_bundles_with_dependency(&dependency)? {
          self
            .bundle_graph
            .internalize_async_dependency(&bundle_id, &dependency)?;
        }
      }
    }

    Ok(())
  }

  /// Adds the bundles a bundle group bundle loads directly to its bundle groups
  fn add_bundles_to_groups(&mut self) -> anyhow::Result<()> {
    let ideal_graph = self.ideal_graph;
    let graph = &ideal_graph.bundle_graph;
    let root_node_id = ideal_graph
      .root_node_id()
      .context("Ideal bundle graph has no root")?;

    for group_bundle_id in graph.get_node_ids_connected_from(root_node_id, EdgeFilter::All) {
      let Some(bundle_group_ids) = self.bundle_groups.get(&group_bundle_id).cloned() else {
        continue;
      };

      for sibling_id in graph.get_node_ids_connected_from(group_bundle_id, EdgeFilter::All) {
        let sibling_bundle_id = self.bundle_id(sibling_id)?.clone();

        for bundle_group_id in &bundle_group_ids {
          self
            .bundle_graph
            .add_bundle_to_bundle_group(&sibling_bundle_id, bundle_group_id)?;
        }
      }
    }

    Ok(())
  }

  fn create_references(&mut self) -> anyhow::Result<()> {
    let ideal_graph = self.ideal_graph;

    for (from, to, _) in ideal_graph.bundle_graph.edges() {
      let is_bundle = |node_id| {
        matches!(
          ideal_graph.bundle_graph.get_node(node_id),
          Some(BundleGraphNode::Bundle(_))
        )
      };

      if !is_bundle(from) || !is_bundle(to) {
        continue;
      }

      let from = self.bundle_id(from)?.clone();
      let to = self.bundle_id(to)?.clone();
      self.bundle_graph.create_bundle_reference(&from, &to)?;
    }

    for (asset_index, references) in &ideal_graph.asset_reference {
      let Some(asset) = ideal_graph.assets.get(*asset_index) else {
        continue;
      };

      for (dependency, ideal_bundle_id) in references {
        let Some(bundle_id) = self.bundle_ids.get(ideal_bundle_id).cloned() else {
          continue;
        };

        self
          .bundle_graph
          .create_asset_reference(dependency, asset, &bundle_id)?;
      }
    }

    Ok(())
  }
}

fn is_internalizable(dependency: &Dependency) -> bool {
  dependency.priority == Priority::Lazy && dependency.specifier_type != SpecifierType::Url
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;
  use crate::bundle_graph::NativeBundleGraph;
  use std::path::PathBuf;

  use crate::config::BundlerConfig;
  use crate::config::ManualSharedBundle;
  use crate::ideal_graph::create_ideal_graph;
  use crate::test_utils::AssetGraphFixture;
  use crate::test_utils::PROJECT_ROOT;
  use crate::types::Bundle;

  fn decorate(fixture: &AssetGraphFixture, config: &BundlerConfig) -> NativeBundleGraph {
    let ideal_graph = create_ideal_graph(&fixture.asset_graph, config, &fixture.entries()).unwrap();
    let mut bundle_graph = NativeBundleGraph::from_asset_graph(&fixture.asset_graph).unwrap();
    decorate_bundle_graph(&ideal_graph, &mut bundle_graph).unwrap();
    bundle_graph
  }

  fn bundle_assets(
    fixture: &AssetGraphFixture,
    bundle_graph: &NativeBundleGraph,
    bundle: &Bundle,
  ) -> Vec<String> {
    bundle_graph
      .get_bundle_assets(&bundle.id)
      .unwrap()
      .into_iter()
      .map(|asset| fixture.name_of(asset))
      .collect()
  }

  fn bundle_for<'a>(
    fixture: &AssetGraphFixture,
    bundle_graph: &'a NativeBundleGraph,
    name: &str,
  ) -> &'a Bundle {
    let id = fixture.id_of(name);
    bundle_graph
      .get_bundles()
      .into_iter()
      .find(|bundle| bundle.main_entry_id.as_ref() == Some(&id))
      .unwrap()
  }

  #[test]
  fn creates_a_bundle_group_per_async_import() {
    let mut fixture = AssetGraphFixture::new();
    fixture.entry("index.js");
    fixture.sync("index.js", "a.js");
    fixture.lazy("index.js", "b.js");

    let bundle_graph = decorate(&fixture, &BundlerConfig::default());

    let index = bundle_for(&fixture, &bundle_graph, "index.js");
    let b = bundle_for(&fixture, &bundle_graph, "b.js");

    assert_eq!(bundle_graph.get_bundles().len(), 2);
    assert_eq!(bundle_graph.get_bundle_groups().len(), 2);
    assert_eq!(
      bundle_assets(&fixture, &bundle_graph, index),
      vec!["index.js", "a.js"]
    );
    assert_eq!(bundle_assets(&fixture, &bundle_graph, b), vec!["b.js"]);
    assert!(index.needs_stable_name);
    assert!(!b.needs_stable_name);

    let entry_groups = bundle_graph.get_entry_bundle_groups();
    assert_eq!(entry_groups.len(), 1);
    assert_eq!(entry_groups[0].entry_asset_id, fixture.id_of("index.js"));

    let loaded = bundle_graph
      .get_bundle_groups_referenced_by_bundle(&index.id)
      .unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].entry_asset_id, fixture.id_of("b.js"));
  }

  #[test]
  fn type_change_bundles_join_the_referencing_group() {
    let mut fixture = AssetGraphFixture::new();
    fixture.entry("index.js");
    let style = fixture.sync("index.js", "style.css");

    let bundle_graph = decorate(&fixture, &BundlerConfig::default());

    let index = bundle_for(&fixture, &bundle_graph, "index.js");
    let css = bundle_for(&fixture, &bundle_graph, "style.css");

    let groups = bundle_graph
      .get_bundle_groups_containing_bundle(&css.id)
      .unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].entry_asset_id, fixture.id_of("index.js"));

    let referenced = bundle_graph.get_referenced_bundles(&index.id).unwrap();
    assert_eq!(referenced.len(), 1);
    assert_eq!(referenced[0].id, css.id);

    let referenced = bundle_graph
      .get_referenced_bundles_for_dependency(&style)
      .unwrap();
    assert_eq!(referenced.len(), 1);
    assert_eq!(referenced[0].id, css.id);
  }

  #[test]
  fn internalizes_lazy_imports_of_already_loaded_assets() {
    let mut fixture = AssetGraphFixture::new();
    fixture.entry("index.js");
    fixture.sync("index.js", "m.js");
    let lazy = fixture.lazy("index.js", "m.js");

    let bundle_graph = decorate(&fixture, &BundlerConfig::default());

    assert_eq!(bundle_graph.get_bundles().len(), 1);

    let index = bundle_for(&fixture, &bundle_graph, "index.js");
    assert_eq!(
      bundle_assets(&fixture, &bundle_graph, index),
      vec!["index.js", "m.js"]
    );
    assert!(bundle_graph.is_dependency_internalized(&index.id, &lazy));
  }

  #[test]
  fn shared_bundles_are_keyed_by_their_assets() {
    let mut fixture = AssetGraphFixture::new();
    fixture.entry("index.js");
    fixture.lazy("index.js", "a.js");
    fixture.lazy("index.js", "b.js");
    fixture.sync("a.js", "shared.js");
    fixture.sync("b.js", "shared.js");

    let config = BundlerConfig {
      min_bundle_size: 0,
      ..BundlerConfig::default()
    };
    let bundle_graph = decorate(&fixture, &config);

    let shared = bundle_graph
      .get_bundles()
      .into_iter()
      .find(|bundle| bundle.main_entry_id.is_none())
      .unwrap();

    assert_eq!(
      bundle_assets(&fixture, &bundle_graph, shared),
      vec!["shared.js"]
    );

    for name in ["a.js", "b.js"] {
      let bundle = bundle_for(&fixture, &bundle_graph, name);
      let referenced = bundle_graph.get_referenced_bundles(&bundle.id).unwrap();
      assert_eq!(referenced.len(), 1);
      assert_eq!(referenced[0].id, shared.id);

      let group = bundle_graph
        .get_bundle_groups_containing_bundle(&bundle.id)
        .unwrap()[0]
        .id();
      let group_bundles = bundle_graph
        .get_bundles_in_bundle_group(&group)
        .unwrap()
        .into_iter()
        .map(|bundle| bundle.id.clone())
        .collect::<Vec<_>>();
      assert_eq!(group_bundles, vec![bundle.id.clone(), shared.id.clone()]);
    }
  }

  #[test]
  fn lazy_manual_shared_bundles_join_the_importing_group() {
    let mut fixture = AssetGraphFixture::new();
    fixture.entry("index.js");
    let lazy = fixture.lazy("index.js", "node_modules/lib.js");

    let config = BundlerConfig {
      project_root: PathBuf::from(PROJECT_ROOT),
      manual_shared_bundles: vec![ManualSharedBundle {
        name: String::from("vendor"),
        assets: vec![String::from("node_modules/**")],
        types: None,
        root: None,
        split: None,
      }],
      ..BundlerConfig::default()
    };
    let bundle_graph = decorate(&fixture, &config);

    assert_eq!(bundle_graph.get_bundles().len(), 2);
    assert_eq!(bundle_graph.get_bundle_groups().len(), 1);

    let index = bundle_for(&fixture, &bundle_graph, "index.js");
    let vendor = bundle_graph
      .get_bundles()
      .into_iter()
      .find(|bundle| bundle.manual_shared_bundle.as_deref() == Some("vendor"))
      .unwrap();

    assert_eq!(
      bundle_assets(&fixture, &bundle_graph, vendor),
      vec!["node_modules/lib.js"]
    );
    assert!(bundle_graph.is_dependency_internalized(&index.id, &lazy));

    let groups = bundle_graph
      .get_bundle_groups_containing_bundle(&vendor.id)
      .unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].entry_asset_id, fixture.id_of("index.js"));

    let referenced = bundle_graph.get_referenced_bundles(&index.id).unwrap();
    assert_eq!(referenced.len(), 1);
    assert_eq!(referenced[0].id, vendor.id);
  }
}
