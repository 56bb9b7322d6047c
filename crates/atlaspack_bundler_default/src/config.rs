use std::collections::HashSet;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

pub const CONFIG_KEY: &str = "@atlaspack/bundler-default";

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("Invalid config for {CONFIG_KEY}: {0}")]
  InvalidSchema(#[from] serde_json::Error),

  #[error("Invalid config for {CONFIG_KEY}: http must be 1 or 2, received {0}")]
  UnsupportedHttpVersion(u8),

  #[error("Invalid config for {CONFIG_KEY}: manual shared bundle names must be unique, \"{0}\" is used more than once")]
  DuplicateManualSharedBundle(String),

  #[error("Invalid config for {CONFIG_KEY}: manual shared bundle \"{0}\" must have a split of at least 1")]
  InvalidSplit(String),
}

/// Rule that forces matching assets into a named shared bundle
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ManualSharedBundle {
  pub name: String,

  /// Globs matched against asset paths relative to the project root
  pub assets: Vec<String>,

  /// Only assets of these types match, all types match when absent
  #[serde(default)]
  pub types: Option<Vec<String>>,

  /// Limits matching to assets synchronously reachable from this file
  #[serde(default)]
  pub root: Option<PathBuf>,

  /// Number of bundles the rule's assets are spread across
  #[serde(default)]
  pub split: Option<u32>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawBundlerConfig {
  http: Option<u8>,
  min_bundles: Option<usize>,
  min_bundle_size: Option<u64>,
  max_parallel_requests: Option<usize>,
  disable_shared_bundles: Option<bool>,
  #[serde(default)]
  manual_shared_bundles: Vec<ManualSharedBundle>,
}

#[derive(Deserialize)]
struct PackageJson {
  #[serde(rename = "@atlaspack/bundler-default")]
  config: Option<serde_json::Value>,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum HttpVersion {
  Http1,
  #[default]
  Http2,
}

impl TryFrom<u8> for HttpVersion {
  type Error = ConfigError;

  fn try_from(version: u8) -> Result<Self, Self::Error> {
    match version {
      1 => Ok(HttpVersion::Http1),
      2 => Ok(HttpVersion::Http2),
      other => Err(ConfigError::UnsupportedHttpVersion(other)),
    }
  }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BundlerConfig {
  pub disable_shared_bundles: bool,
  pub manual_shared_bundles: Vec<ManualSharedBundle>,
  pub max_parallel_requests: usize,
  pub min_bundle_size: u64,
  pub min_bundles: usize,
  pub project_root: PathBuf,
}

impl Default for BundlerConfig {
  fn default() -> Self {
    Self::for_http(HttpVersion::default(), PathBuf::new())
  }
}

impl BundlerConfig {
  /// Defaults tuned for the number of concurrent requests each protocol handles well
  pub fn for_http(version: HttpVersion, project_root: impl Into<PathBuf>) -> Self {
    let (min_bundle_size, max_parallel_requests) = match version {
      HttpVersion::Http1 => (30000, 6),
      HttpVersion::Http2 => (20000, 25),
    };

    BundlerConfig {
      disable_shared_bundles: false,
      manual_shared_bundles: Vec::new(),
      max_parallel_requests,
      min_bundle_size,
      min_bundles: 1,
      project_root: project_root.into(),
    }
  }

  /// Reads the bundler options from a package.json, using defaults when the key is absent
  pub fn from_package_json(
    package_json: &serde_json::Value,
    project_root: impl Into<PathBuf>,
  ) -> Result<Self, ConfigError> {
    let package_json = PackageJson::deserialize(package_json)?;

    match package_json.config {
      Some(config) => Self::from_json_value(config, project_root),
      None => Ok(Self::for_http(HttpVersion::default(), project_root)),
    }
  }

  pub fn from_json_value(
    value: serde_json::Value,
    project_root: impl Into<PathBuf>,
  ) -> Result<Self, ConfigError> {
    let raw: RawBundlerConfig = serde_json::from_value(value)?;

    let version = match raw.http {
      Some(version) => HttpVersion::try_from(version)?,
      None => HttpVersion::default(),
    };

    let mut names = HashSet::new();
    for rule in &raw.manual_shared_bundles {
      if !names.insert(rule.name.as_str()) {
        return Err(ConfigError::DuplicateManualSharedBundle(rule.name.clone()));
      }

      if rule.split == Some(0) {
        return Err(ConfigError::InvalidSplit(rule.name.clone()));
      }
    }

    let defaults = Self::for_http(version, project_root);
    let disable_shared_bundles = raw.disable_shared_bundles.unwrap_or(defaults.disable_shared_bundles);

    if disable_shared_bundles {
      let ignored = [
        ("minBundles", raw.min_bundles.is_some()),
        ("minBundleSize", raw.min_bundle_size.is_some()),
        ("maxParallelRequests", raw.max_parallel_requests.is_some()),
      ];

      for (option, _) in ignored.iter().filter(|(_, is_set)| *is_set) {
        warn!(
          option,
          "{CONFIG_KEY}: {option} has no effect when disableSharedBundles is true"
        );
      }
    }

    Ok(BundlerConfig {
      disable_shared_bundles,
      manual_shared_bundles: raw.manual_shared_bundles,
      max_parallel_requests: raw.max_parallel_requests.unwrap_or(defaults.max_parallel_requests),
      min_bundle_size: raw.min_bundle_size.unwrap_or(defaults.min_bundle_size),
      min_bundles: raw.min_bundles.unwrap_or(defaults.min_bundles),
      project_root: defaults.project_root,
    })
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;
  use serde_json::json;
  use tracing_test::traced_test;

  use super::*;

  #[test]
  fn defaults_to_http2() {
    let config = BundlerConfig::from_json_value(json!({}), "/project").unwrap();

    assert_eq!(
      config,
      BundlerConfig {
        disable_shared_bundles: false,
        manual_shared_bundles: Vec::new(),
        max_parallel_requests: 25,
        min_bundle_size: 20000,
        min_bundles: 1,
        project_root: PathBuf::from("/project"),
      }
    );
  }

  #[test]
  fn http1_profile_lowers_the_request_limit() {
    let config = BundlerConfig::from_json_value(json!({ "http": 1 }), "/project").unwrap();

    assert_eq!(config.max_parallel_requests, 6);
    assert_eq!(config.min_bundle_size, 30000);
  }

  #[test]
  fn explicit_options_override_the_profile() {
    let config = BundlerConfig::from_json_value(
      json!({
        "http": 1,
        "minBundles": 3,
        "maxParallelRequests": 10,
        "manualSharedBundles": [
          { "name": "vendor", "assets": ["node_modules/**"], "types": ["js"], "split": 2 }
        ]
      }),
      "/project",
    )
    .unwrap();

    assert_eq!(config.min_bundles, 3);
    assert_eq!(config.max_parallel_requests, 10);
    assert_eq!(config.min_bundle_size, 30000);
    assert_eq!(
      config.manual_shared_bundles,
      vec![ManualSharedBundle {
        name: String::from("vendor"),
        assets: vec![String::from("node_modules/**")],
        types: Some(vec![String::from("js")]),
        root: None,
        split: Some(2),
      }]
    );
  }

  #[test]
  fn reads_config_from_package_json() {
    let package_json = json!({
      "name": "app",
      "@atlaspack/bundler-default": { "minBundleSize": 0 }
    });

    let config = BundlerConfig::from_package_json(&package_json, "/project").unwrap();
    assert_eq!(config.min_bundle_size, 0);

    let config = BundlerConfig::from_package_json(&json!({ "name": "app" }), "/project").unwrap();
    assert_eq!(config, BundlerConfig::for_http(HttpVersion::Http2, "/project"));
  }

  #[test]
  fn rejects_unknown_fields() {
    let error = BundlerConfig::from_json_value(json!({ "minBundle": 1 }), "/project").unwrap_err();
    assert!(matches!(error, ConfigError::InvalidSchema(_)));
  }

  #[test]
  fn rejects_wrong_types() {
    let error = BundlerConfig::from_json_value(json!({ "http": "2" }), "/project").unwrap_err();
    assert!(matches!(error, ConfigError::InvalidSchema(_)));
  }

  #[test]
  fn rejects_unsupported_http_versions() {
    let error = BundlerConfig::from_json_value(json!({ "http": 3 }), "/project").unwrap_err();
    assert!(matches!(error, ConfigError::UnsupportedHttpVersion(3)));
  }

  #[test]
  fn rejects_duplicate_manual_shared_bundle_names() {
    let error = BundlerConfig::from_json_value(
      json!({
        "manualSharedBundles": [
          { "name": "vendor", "assets": ["a/**"] },
          { "name": "vendor", "assets": ["b/**"] }
        ]
      }),
      "/project",
    )
    .unwrap_err();

    assert_eq!(
      error.to_string(),
      "Invalid config for @atlaspack/bundler-default: manual shared bundle names must be unique, \"vendor\" is used more than once"
    );
  }

  #[test]
  fn rejects_zero_split() {
    let error = BundlerConfig::from_json_value(
      json!({ "manualSharedBundles": [{ "name": "vendor", "assets": ["**"], "split": 0 }] }),
      "/project",
    )
    .unwrap_err();

    assert!(matches!(error, ConfigError::InvalidSplit(name) if name == "vendor"));
  }

  #[traced_test]
  #[test]
  fn warns_about_options_ignored_without_shared_bundles() {
    let config = BundlerConfig::from_json_value(
      json!({ "disableSharedBundles": true, "minBundleSize": 100 }),
      "/project",
    )
    .unwrap();

    assert!(config.disable_shared_bundles);
    assert!(logs_contain("minBundleSize has no effect when disableSharedBundles is true"));
  }
}
