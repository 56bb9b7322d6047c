use std::hash::{Hash, Hasher};

use serde::Deserialize;
use serde::Serialize;

use crate::hash::IdentifierHasher;

/// The environment the output of an asset runs in
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
  /// The runtime the output runs in
  pub context: EnvironmentContext,

  /// Whether this is a library build that is consumed by another tool
  #[serde(default)]
  pub is_library: bool,

  /// Determines what type of module to output
  #[serde(default)]
  pub output_format: OutputFormat,

  #[serde(default)]
  pub should_scope_hoist: bool,
}

impl Environment {
  pub fn id(&self) -> String {
    let mut hasher = IdentifierHasher::default();
    self.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
  }

  /// Whether code in this environment runs in its own global scope
  ///
  /// Workers and worklets cannot see modules loaded by the page that started
  /// them, so nothing is ever considered already available inside them.
  pub fn is_isolated(&self) -> bool {
    self.context.is_worker() || self.context.is_worklet()
  }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvironmentContext {
  #[default]
  Browser,
  ElectronMain,
  ElectronRenderer,
  Node,
  ServiceWorker,
  WebWorker,
  Worklet,
}

impl EnvironmentContext {
  pub fn is_browser(&self) -> bool {
    use EnvironmentContext::*;
    matches!(
      self,
      Browser | WebWorker | ServiceWorker | Worklet | ElectronRenderer
    )
  }

  pub fn is_node(&self) -> bool {
    use EnvironmentContext::*;
    matches!(self, Node | ElectronMain | ElectronRenderer)
  }

  pub fn is_worker(&self) -> bool {
    use EnvironmentContext::*;
    matches!(self, WebWorker | ServiceWorker)
  }

  pub fn is_worklet(&self) -> bool {
    matches!(self, EnvironmentContext::Worklet)
  }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
  #[default]
  Global,
  CommonJS,
  EsModule,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn workers_and_worklets_are_isolated() {
    let env = |context| Environment {
      context,
      ..Environment::default()
    };

    assert!(env(EnvironmentContext::WebWorker).is_isolated());
    assert!(env(EnvironmentContext::ServiceWorker).is_isolated());
    assert!(env(EnvironmentContext::Worklet).is_isolated());
    assert!(!env(EnvironmentContext::Browser).is_isolated());
    assert!(!env(EnvironmentContext::Node).is_isolated());
  }

  #[test]
  fn id_depends_on_context() {
    let browser = Environment::default();
    let node = Environment {
      context: EnvironmentContext::Node,
      ..Environment::default()
    };

    assert_eq!(browser.id(), Environment::default().id());
    assert_ne!(browser.id(), node.id());
  }
}
