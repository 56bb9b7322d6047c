mod asset;
mod bundle;
mod dependency;
mod environment;
mod file_type;
mod target;

pub use self::asset::*;
pub use self::bundle::*;
pub use self::dependency::*;
pub use self::environment::*;
pub use self::file_type::*;
pub use self::target::*;

/// Plugin specific metadata attached to assets and dependencies
pub type JSONObject = serde_json::Map<String, serde_json::Value>;
