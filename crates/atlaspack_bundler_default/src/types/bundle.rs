use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;

use super::AssetId;
use super::BundleBehavior;
use super::Environment;
use super::FileType;
use super::Target;

/// A bundle as written to the output bundle graph
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
  pub id: String,

  pub bundle_behavior: Option<BundleBehavior>,

  #[serde(rename = "type")]
  pub bundle_type: FileType,

  pub entry_asset_ids: Vec<AssetId>,

  pub env: Arc<Environment>,

  /// The asset the bundle is named after, absent for shared bundles
  pub main_entry_id: Option<AssetId>,

  /// Name of the manual shared bundle rule that produced this bundle
  pub manual_shared_bundle: Option<String>,

  pub needs_stable_name: bool,

  pub target: Arc<Target>,

  pub unique_key: Option<String>,
}

/// A set of bundles that load together when a dependency is resolved
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleGroup {
  pub target: Arc<Target>,
  pub entry_asset_id: AssetId,
}

impl BundleGroup {
  pub fn id(&self) -> String {
    format!("bundle_group:{}{}", self.target.name, self.entry_asset_id)
  }
}
