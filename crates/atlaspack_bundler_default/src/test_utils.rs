use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::asset_graph::AssetGraph;
use crate::entries::get_entry_by_target;
use crate::entries::EntryAssets;
use crate::types::Asset;
use crate::types::Dependency;
use crate::types::DependencyBuilder;
use crate::types::Priority;
use crate::types::Target;

pub const PROJECT_ROOT: &str = "/project";

/// Size given to fixture assets unless a test overrides it
pub const DEFAULT_ASSET_SIZE: u32 = 1000;

/// Builds asset graphs from project relative file names
pub struct AssetGraphFixture {
  pub asset_graph: AssetGraph,
  pub target: Arc<Target>,
  assets: HashMap<String, Arc<Asset>>,
  names: HashMap<String, String>,
}

impl AssetGraphFixture {
  pub fn new() -> Self {
    AssetGraphFixture {
      asset_graph: AssetGraph::new(),
      target: Arc::new(Target::default()),
      assets: HashMap::new(),
      names: HashMap::new(),
    }
  }

  pub fn target(&self, name: &str) -> Arc<Target> {
    Arc::new(Target {
      dist_dir: PathBuf::from("dist").join(name),
      name: String::from(name),
      ..Target::default()
    })
  }

  pub fn path(&self, name: &str) -> PathBuf {
    PathBuf::from(PROJECT_ROOT).join(name)
  }

  /// Returns the asset for `name`, creating it on first use
  pub fn asset(&mut self, name: &str) -> Arc<Asset> {
    if let Some(asset) = self.assets.get(name) {
      return asset.clone();
    }

    self.asset_with(name, |_| {})
  }

  /// Creates or replaces the asset for `name`
  pub fn asset_with(&mut self, name: &str, configure: impl FnOnce(&mut Asset)) -> Arc<Asset> {
    let mut asset = match self.assets.get(name) {
      Some(existing) => (**existing).clone(),
      None => {
        let mut asset = Asset::new(self.path(name), self.target.env.clone());
        asset.stats.size = DEFAULT_ASSET_SIZE;
        asset
      }
    };

    configure(&mut asset);

    let asset = Arc::new(asset);
    self.asset_graph.add_asset(asset.clone());
    self.assets.insert(String::from(name), asset.clone());
    self.names.insert(asset.id.clone(), String::from(name));
    asset
  }

  pub fn sized(&mut self, name: &str, size: u32) -> Arc<Asset> {
    self.asset_with(name, |asset| asset.stats.size = size)
  }

  pub fn entry(&mut self, name: &str) -> Arc<Dependency> {
    let target = self.target.clone();
    self.entry_for(name, &target)
  }

  pub fn entry_for(&mut self, name: &str, target: &Arc<Target>) -> Arc<Dependency> {
    let dependency = Dependency::entry(self.path(name).display().to_string(), target.clone());
    self.connect_entry(name, dependency)
  }

  pub fn entry_without_target(&mut self, name: &str) -> Arc<Dependency> {
    let dependency = DependencyBuilder::default()
      .is_entry(true)
      .specifier(self.path(name).display().to_string())
      .build();

    self.connect_entry(name, dependency)
  }

  fn connect_entry(&mut self, name: &str, dependency: Dependency) -> Arc<Dependency> {
    let asset = self.asset(name);
    let dependency = Arc::new(dependency);

    let dependency_node = self
      .asset_graph
      .add_entry_dependency(dependency.clone())
      .unwrap();
    let asset_node = self.asset_graph.add_asset(asset);
    self.asset_graph.add_edge(dependency_node, asset_node).unwrap();

    dependency
  }

  /// Connects `from` to `to` through a dependency built by `configure`
  pub fn dependency(
    &mut self,
    from: &str,
    to: &str,
    configure: impl FnOnce(DependencyBuilder) -> DependencyBuilder,
  ) -> Arc<Dependency> {
    let parent = self.asset(from);
    let child = self.asset(to);

    let builder = DependencyBuilder::default()
      .env(parent.env.clone())
      .source_asset_id(parent.id.clone())
      .source_path(parent.file_path.clone())
      .specifier(format!("./{to}"));

    let dependency = Arc::new(configure(builder).build());

    let parent_node = self.asset_graph.add_asset(parent);
    let dependency_node = self.asset_graph.add_dependency(dependency.clone());
    let child_node = self.asset_graph.add_asset(child);

    self.asset_graph.add_edge(parent_node, dependency_node).unwrap();
    self.asset_graph.add_edge(dependency_node, child_node).unwrap();

    dependency
  }

  pub fn sync(&mut self, from: &str, to: &str) -> Arc<Dependency> {
    self.dependency(from, to, |dependency| dependency)
  }

  pub fn lazy(&mut self, from: &str, to: &str) -> Arc<Dependency> {
    self.dependency(from, to, |dependency| dependency.priority(Priority::Lazy))
  }

  pub fn parallel(&mut self, from: &str, to: &str) -> Arc<Dependency> {
    self.dependency(from, to, |dependency| dependency.priority(Priority::Parallel))
  }

  pub fn name_of(&self, asset: &Asset) -> String {
    self
      .names
      .get(&asset.id)
      .cloned()
      .unwrap_or_else(|| asset.id.clone())
  }

  pub fn id_of(&self, name: &str) -> String {
    self.assets[name].id.clone()
  }

  /// Entries of the first target
  pub fn entries(&self) -> EntryAssets {
    get_entry_by_target(&self.asset_graph)
      .unwrap()
      .into_values()
      .next()
      .unwrap_or_default()
  }
}
