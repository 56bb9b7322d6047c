use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use serde_repr::Deserialize_repr;
use serde_repr::Serialize_repr;

use crate::hash::IdentifierHasher;

use super::Environment;
use super::FileType;
use super::JSONObject;

pub type AssetId = String;

/// Flag written by the transformer for modules that only export constants
const CONSTANT_MODULE_META_KEY: &str = "isConstantModule";

pub fn create_asset_id(env: &Environment, file_path: &Path, query: Option<&str>) -> AssetId {
  let mut hasher = IdentifierHasher::default();

  env.hash(&mut hasher);
  file_path.hash(&mut hasher);
  query.hash(&mut hasher);

  format!("{:016x}", hasher.finish())
}

/// Controls how an asset is placed relative to the bundles that reference it
#[derive(Clone, Copy, Debug, Deserialize_repr, Eq, Hash, PartialEq, Serialize_repr)]
#[repr(u8)]
pub enum BundleBehavior {
  /// The asset is placed in its own bundle and inlined into the referencing bundle
  Inline = 0,

  /// The asset is placed in its own bundle that does not share modules with its parents
  Isolated = 1,
}

/// Statistics that pertain to an asset
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct AssetStats {
  pub size: u32,
  pub time: u32,
}

/// A compiled module the bundler places into bundles
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
  pub id: AssetId,

  pub bundle_behavior: Option<BundleBehavior>,

  pub env: Arc<Environment>,

  pub file_path: PathBuf,

  #[serde(rename = "type")]
  pub file_type: FileType,

  /// Whether the asset may be moved out of its own bundle into a shared bundle
  pub is_bundle_splittable: bool,

  #[serde(default)]
  pub meta: JSONObject,

  #[serde(default)]
  pub stats: AssetStats,
}

impl Default for Asset {
  fn default() -> Self {
    Self {
      id: AssetId::default(),
      bundle_behavior: None,
      env: Arc::default(),
      file_path: PathBuf::default(),
      file_type: FileType::default(),
      is_bundle_splittable: true,
      meta: JSONObject::default(),
      stats: AssetStats::default(),
    }
  }
}

impl Asset {
  pub fn new(file_path: impl Into<PathBuf>, env: Arc<Environment>) -> Self {
    let file_path = file_path.into();
    let file_type = file_path
      .extension()
      .map(|ext| FileType::from_extension(&ext.to_string_lossy()))
      .unwrap_or_default();

    Self {
      id: create_asset_id(&env, &file_path, None),
      env,
      file_path,
      file_type,
      ..Asset::default()
    }
  }

  /// Modules that only export constants are inlined into every bundle that imports them
  pub fn is_constant_module(&self) -> bool {
    self
      .meta
      .get(CONSTANT_MODULE_META_KEY)
      .and_then(serde_json::Value::as_bool)
      .unwrap_or(false)
  }

  pub fn set_is_constant_module(&mut self, is_constant_module: bool) {
    self.meta.insert(
      String::from(CONSTANT_MODULE_META_KEY),
      serde_json::Value::Bool(is_constant_module),
    );
  }

  pub fn size(&self) -> u64 {
    u64::from(self.stats.size)
  }
}
