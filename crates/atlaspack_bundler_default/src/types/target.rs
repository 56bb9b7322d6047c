use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;

use super::Environment;

/// An output destination, bundles are computed independently per target
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
  /// The output directory, entries are grouped by this value
  pub dist_dir: PathBuf,

  pub dist_entry: Option<PathBuf>,

  pub env: Arc<Environment>,

  pub name: String,

  pub public_url: String,
}

impl Default for Target {
  fn default() -> Self {
    Self {
      dist_dir: PathBuf::from("dist"),
      dist_entry: None,
      env: Arc::new(Environment::default()),
      name: String::from("default"),
      public_url: String::from("/"),
    }
  }
}
