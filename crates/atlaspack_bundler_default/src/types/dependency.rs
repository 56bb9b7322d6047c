use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;

use derive_builder::Builder;
use serde::Deserialize;
use serde::Serialize;
use serde_repr::Deserialize_repr;
use serde_repr::Serialize_repr;

use crate::hash::IdentifierHasher;

use super::AssetId;
use super::BundleBehavior;
use super::Environment;
use super::JSONObject;
use super::Target;

pub fn create_dependency_id(
  source_asset_id: Option<&AssetId>,
  specifier: &str,
  environment_id: &str,
  target: Option<&Target>,
  specifier_type: &SpecifierType,
  bundle_behavior: &Option<BundleBehavior>,
  priority: &Priority,
) -> String {
  let mut hasher = IdentifierHasher::default();

  source_asset_id.hash(&mut hasher);
  specifier.hash(&mut hasher);
  environment_id.hash(&mut hasher);
  target.hash(&mut hasher);
  specifier_type.hash(&mut hasher);
  bundle_behavior.hash(&mut hasher);
  priority.hash(&mut hasher);

  format!("{:016x}", hasher.finish())
}

impl DependencyBuilder {
  pub fn build(self) -> Dependency {
    let env = self.env.unwrap_or_default();
    let specifier = self.specifier.unwrap_or_default();
    let source_asset_id = self.source_asset_id.flatten();
    let target = self.target.flatten();
    let specifier_type = self.specifier_type.unwrap_or_default();
    let bundle_behavior = self.bundle_behavior.flatten();
    let priority = self.priority.unwrap_or_default();

    let id = create_dependency_id(
      source_asset_id.as_ref(),
      &specifier,
      &env.id(),
      target.as_deref(),
      &specifier_type,
      &bundle_behavior,
      &priority,
    );

    Dependency {
      bundle_behavior,
      env,
      id,
      is_entry: self.is_entry.unwrap_or_default(),
      meta: self.meta.unwrap_or_default(),
      needs_stable_name: self.needs_stable_name.unwrap_or_default(),
      priority,
      source_asset_id,
      source_path: self.source_path.flatten(),
      specifier,
      specifier_type,
      target,
    }
  }
}

/// A dependency denotes a connection between two assets
#[derive(Builder, Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[builder(build_fn(skip), pattern = "owned", setter(strip_option))]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
  /// Controls the behavior of the bundle the resolved asset is placed into
  pub bundle_behavior: Option<BundleBehavior>,

  /// The environment of the dependency
  pub env: Arc<Environment>,

  /// The id of the dependency
  #[builder(setter(skip))]
  pub id: String,

  /// Whether the dependency is an entry point of a target
  pub is_entry: bool,

  #[serde(default)]
  pub meta: JSONObject,

  /// Whether the bundle created for this dependency needs a stable file name
  pub needs_stable_name: bool,

  /// Determines when the dependency should be loaded
  pub priority: Priority,

  /// The asset that contains the dependency, absent for entries
  pub source_asset_id: Option<AssetId>,

  pub source_path: Option<PathBuf>,

  /// The import or export specifier that connects two assets together
  pub specifier: String,

  /// How the specifier should be interpreted
  pub specifier_type: SpecifierType,

  /// The target of an entry dependency
  pub target: Option<Arc<Target>>,
}

impl Dependency {
  pub fn entry(entry: String, target: Arc<Target>) -> Dependency {
    DependencyBuilder::default()
      .env(target.env.clone())
      .is_entry(true)
      .needs_stable_name(true)
      .specifier(entry)
      .specifier_type(SpecifierType::Url)
      .target(target)
      .build()
  }

  pub fn is_async(&self) -> bool {
    self.priority != Priority::Sync
  }
}

/// Determines when a dependency should load
#[derive(Clone, Copy, Debug, Default, Deserialize_repr, Eq, Hash, PartialEq, Serialize_repr)]
#[repr(u32)]
pub enum Priority {
  /// Resolves the dependency synchronously, placing the resolved asset in the same bundle as the parent
  #[default]
  Sync = 0,

  /// Places the dependency in a separate bundle loaded in parallel with the current bundle
  Parallel = 1,

  /// The dependency should be placed in a separate bundle that is loaded later
  Lazy = 2,
}

/// The type of the import specifier
#[derive(Clone, Copy, Debug, Default, Deserialize_repr, Eq, Hash, PartialEq, Serialize_repr)]
#[repr(u32)]
pub enum SpecifierType {
  /// An ES Module specifier
  #[default]
  Esm = 0,

  /// A CommonJS specifier
  CommonJS = 1,

  /// A URL that works as in a browser
  ///
  /// Url dependencies are never internalized, the referencing code needs the bundle file.
  Url = 2,

  /// A custom specifier that must be handled by a custom resolver plugin
  Custom = 3,
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  #[test]
  fn entry_dependencies_need_stable_names() {
    let target = Arc::new(Target::default());
    let dependency = Dependency::entry(String::from("src/index.js"), target.clone());

    assert!(dependency.is_entry);
    assert!(dependency.needs_stable_name);
    assert_eq!(dependency.target, Some(target));
    assert_eq!(dependency.priority, Priority::Sync);
  }

  #[test]
  fn id_changes_with_priority() {
    let sync = DependencyBuilder::default()
      .specifier(String::from("./a"))
      .source_asset_id(String::from("parent"))
      .build();

    let lazy = DependencyBuilder::default()
      .specifier(String::from("./a"))
      .source_asset_id(String::from("parent"))
      .priority(Priority::Lazy)
      .build();

    assert_ne!(sync.id, lazy.id);
    assert!(lazy.is_async());
    assert!(!sync.is_async());
  }

  #[test]
  fn priority_serializes_as_number() {
    assert_eq!(serde_json::to_string(&Priority::Lazy).unwrap(), "2");
  }
}
