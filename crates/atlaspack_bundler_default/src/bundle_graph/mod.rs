use std::sync::Arc;

use crate::types::Asset;
use crate::types::BundleBehavior;
use crate::types::Dependency;
use crate::types::Environment;
use crate::types::FileType;
use crate::types::Target;

mod native_bundle_graph;

pub use self::native_bundle_graph::*;

pub type BundleId = String;
pub type BundleGroupId = String;

#[derive(Clone, Debug, PartialEq)]
pub enum CreateBundleOptions {
  /// A bundle named after its entry asset
  Entry {
    entry_asset: Arc<Asset>,
    target: Arc<Target>,
    bundle_behavior: Option<BundleBehavior>,
    needs_stable_name: bool,
  },

  /// A bundle without an entry asset, identified by a key that is unique within the target
  Keyed {
    unique_key: String,
    bundle_type: FileType,
    env: Arc<Environment>,
    target: Arc<Target>,
    bundle_behavior: Option<BundleBehavior>,
    needs_stable_name: bool,
    manual_shared_bundle: Option<String>,
  },
}

/// The output graph bundlers write their decisions into
pub trait MutableBundleGraph {
  /// Creates the bundle group loaded by a dependency, or returns the existing one
  fn create_bundle_group(
    &mut self,
    dependency: &Dependency,
    target: &Arc<Target>,
  ) -> anyhow::Result<BundleGroupId>;

  /// Creates a bundle, or returns the id of an identical existing bundle
  fn create_bundle(&mut self, options: CreateBundleOptions) -> anyhow::Result<BundleId>;

  fn add_asset_to_bundle(&mut self, asset: &Asset, bundle_id: &BundleId) -> anyhow::Result<()>;

  fn add_bundle_to_bundle_group(
    &mut self,
    bundle_id: &BundleId,
    bundle_group_id: &BundleGroupId,
  ) -> anyhow::Result<()>;

  /// Records that `from` needs `to` to be loaded
  fn create_bundle_reference(&mut self, from: &BundleId, to: &BundleId) -> anyhow::Result<()>;

  /// Records that a dependency resolves to an asset in another bundle
  fn create_asset_reference(
    &mut self,
    dependency: &Dependency,
    asset: &Asset,
    bundle_id: &BundleId,
  ) -> anyhow::Result<()>;

  /// Marks an async dependency as resolved inside the bundle
  fn internalize_async_dependency(
    &mut self,
    bundle_id: &BundleId,
    dependency: &Dependency,
  ) -> anyhow::Result<()>;

  fn get_incoming_dependencies(&self, asset: &Asset) -> anyhow::Result<Vec<Arc<Dependency>>>;

  fn bundle_has_dependency(&self, bundle_id: &BundleId, dependency: &Dependency) -> anyhow::Result<bool>;

  fn get_bundles_with_dependency(&self, dependency: &Dependency) -> anyhow::Result<Vec<BundleId>>;
}
