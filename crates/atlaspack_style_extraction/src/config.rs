use serde::Deserialize;

pub const DEFAULT_PACKAGE: &str = "@macaron-css/core";

/// APIs of the style package whose calls are moved into the extracted module
pub const DEFAULT_EXTRACTION_APIS: &[&str] = &[
  "macaron$",
  "styled",
  "recipe",
  "style",
  "styleVariants",
  "globalStyle",
  "createTheme",
  "createGlobalTheme",
  "createThemeContract",
  "createGlobalThemeContract",
  "assignVars",
  "createVar",
  "fallbackVar",
  "fontFace",
  "globalFontFace",
  "keyframes",
  "globalKeyframes",
  "layer",
  "globalLayer",
  "createContainer",
];

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StyleExtractionConfig {
  /// Module the extraction APIs are imported from
  #[serde(default = "default_package")]
  pub package: String,
  #[serde(default = "default_extraction_apis")]
  pub extraction_apis: Vec<String>,
  /// Remove module-level declarations that were copied into the extracted
  /// module once nothing in the source module references them anymore
  #[serde(default = "default_true")]
  pub prune_relocated_bindings: bool,
}

impl Default for StyleExtractionConfig {
  fn default() -> StyleExtractionConfig {
    StyleExtractionConfig {
      package: default_package(),
      extraction_apis: default_extraction_apis(),
      prune_relocated_bindings: true,
    }
  }
}

impl StyleExtractionConfig {
  pub fn is_extraction_api(&self, name: &str) -> bool {
    self.extraction_apis.iter().any(|api| api == name)
  }

  /// Cheap check to skip sources that can't contain any extraction site
  pub fn should_transform(&self, code: &str) -> bool {
    code.contains(self.package.as_str())
  }
}

fn default_package() -> String {
  DEFAULT_PACKAGE.to_string()
}

fn default_extraction_apis() -> Vec<String> {
  DEFAULT_EXTRACTION_APIS
    .iter()
    .map(|api| api.to_string())
    .collect()
}

fn default_true() -> bool {
  true
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  #[test]
  fn test_deserialize_empty_config_uses_defaults() {
    let config: StyleExtractionConfig = serde_json::from_str("{}").unwrap();

    assert_eq!(config, StyleExtractionConfig::default());
    assert!(config.is_extraction_api("style"));
    assert!(config.is_extraction_api("styleVariants"));
    assert!(!config.is_extraction_api("css"));
  }

  #[test]
  fn test_deserialize_overrides() {
    let config: StyleExtractionConfig = serde_json::from_str(
      r#"{
        "package": "@vanilla-extract/css",
        "extractionApis": ["style"],
        "pruneRelocatedBindings": false
      }"#,
    )
    .unwrap();

    assert_eq!(
      config,
      StyleExtractionConfig {
        package: "@vanilla-extract/css".into(),
        extraction_apis: vec!["style".into()],
        prune_relocated_bindings: false,
      }
    );
    assert!(!config.is_extraction_api("styleVariants"));
  }

  #[test]
  fn test_should_transform() {
    let config = StyleExtractionConfig::default();

    assert!(config.should_transform("import { style } from '@macaron-css/core';"));
    assert!(!config.should_transform("import { style } from './local';"));
  }
}
