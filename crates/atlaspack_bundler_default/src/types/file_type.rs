use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// The kind of content in an asset or bundle, identified by its extension
///
/// Assets of different types are never placed in the same bundle.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub enum FileType {
  Css,
  Html,
  #[default]
  Js,
  Json,
  Svg,
  Wasm,
  Other(String),
}

impl FileType {
  pub fn extension(&self) -> &str {
    match self {
      FileType::Css => "css",
      FileType::Html => "html",
      FileType::Js => "js",
      FileType::Json => "json",
      FileType::Svg => "svg",
      FileType::Wasm => "wasm",
      FileType::Other(ext) => ext.as_str(),
    }
  }

  pub fn from_extension(ext: &str) -> Self {
    match ext {
      "css" => FileType::Css,
      "htm" | "html" => FileType::Html,
      "cjs" | "js" | "jsx" | "mjs" | "ts" | "tsx" => FileType::Js,
      "json" => FileType::Json,
      "svg" => FileType::Svg,
      "wasm" => FileType::Wasm,
      ext => FileType::Other(ext.to_string()),
    }
  }
}

impl fmt::Display for FileType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.extension())
  }
}

impl Serialize for FileType {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: serde::Serializer,
  {
    self.extension().serialize(serializer)
  }
}

impl<'de> Deserialize<'de> for FileType {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: serde::Deserializer<'de>,
  {
    let ext: String = Deserialize::deserialize(deserializer)?;
    Ok(Self::from_extension(&ext))
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  #[test]
  fn script_extensions_collapse_to_js() {
    for ext in ["js", "mjs", "ts", "tsx"] {
      assert_eq!(FileType::from_extension(ext), FileType::Js);
    }
  }

  #[test]
  fn unknown_extensions_round_trip() {
    let file_type = FileType::from_extension("woff2");
    assert_eq!(file_type, FileType::Other(String::from("woff2")));
    assert_eq!(file_type.extension(), "woff2");
  }

  #[test]
  fn serializes_as_extension() {
    assert_eq!(serde_json::to_string(&FileType::Css).unwrap(), "\"css\"");
    assert_eq!(
      serde_json::from_str::<FileType>("\"html\"").unwrap(),
      FileType::Html
    );
  }
}
