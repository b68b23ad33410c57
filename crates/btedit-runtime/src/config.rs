#![forbid(unsafe_code)]

//! Session configuration.
//!
//! [`SessionConfig`] gathers the knobs the editor shell used to hardcode.
//! It loads from TOML or JSON; omitted fields keep their defaults.
//!
//! ```toml
//! # btedit.toml
//! left_tab_name = "Robot"
//! right_tab_name = "Operator"
//! xml_indent = 4
//! initial_mode = "monitor"
//! ```
//!
//! ```rust,ignore
//! let config = SessionConfig::from_toml_file("btedit.toml")?.validated()?;
//! let session = Session::with_config(config);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::EditorMode;

/// Largest accepted `xml_indent`.
pub const MAX_XML_INDENT: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Document name used for the left pane by dual-pane loading.
    pub left_tab_name: String,
    /// Document name used for the right pane by dual-pane loading.
    pub right_tab_name: String,
    /// Name given to blank documents when none is supplied.
    pub default_tree_name: String,
    /// Spaces per nesting level in saved XML.
    pub xml_indent: usize,
    pub initial_mode: EditorMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            left_tab_name: "Agent".into(),
            right_tab_name: "Human".into(),
            default_tree_name: "BehaviorTree".into(),
            xml_indent: 2,
            initial_mode: EditorMode::Editor,
        }
    }
}

impl SessionConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(ConfigError::Toml)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;
        Self::from_toml_str(&content)
    }

    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(s).map_err(ConfigError::Json)
    }

    /// Problems with this configuration; empty when it is usable.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        for (field, value) in [
            ("left_tab_name", &self.left_tab_name),
            ("right_tab_name", &self.right_tab_name),
            ("default_tree_name", &self.default_tree_name),
        ] {
            if value.trim().is_empty() {
                errors.push(format!("{field} must not be empty"));
            }
        }
        if self.left_tab_name == self.right_tab_name {
            errors.push(format!(
                "left_tab_name and right_tab_name must differ, both are {:?}",
                self.left_tab_name
            ));
        }
        if self.xml_indent > MAX_XML_INDENT {
            errors.push(format!(
                "xml_indent must be <= {MAX_XML_INDENT}, got {}",
                self.xml_indent
            ));
        }
        errors
    }

    /// `self` if [`validate`](Self::validate) finds nothing.
    pub fn validated(self) -> Result<Self, ConfigError> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[source] toml::de::Error),
    #[error("JSON parse error: {0}")]
    Json(#[source] serde_json::Error),
    #[error("validation errors: {}", .0.join("; "))]
    Validation(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_validates_clean() {
        assert!(SessionConfig::default().validate().is_empty());
    }

    #[test]
    fn partial_override_preserves_defaults() {
        let config = SessionConfig::from_toml_str("xml_indent = 4\ninitial_mode = \"monitor\"\n").unwrap();
        assert_eq!(config.xml_indent, 4);
        assert_eq!(config.initial_mode, EditorMode::Monitor);
        assert_eq!(config.left_tab_name, "Agent");
        assert_eq!(config.right_tab_name, "Human");
    }

    #[test]
    fn json_loading() {
        let config = SessionConfig::from_json_str(r#"{"left_tab_name":"Robot"}"#).unwrap();
        assert_eq!(config.left_tab_name, "Robot");
        assert_eq!(config.default_tree_name, "BehaviorTree");
    }

    #[test]
    fn toml_file_loading() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "right_tab_name = \"Operator\"").unwrap();
        let config = SessionConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(config.right_tab_name, "Operator");
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SessionConfig::from_toml_file(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn malformed_input_is_reported() {
        assert!(matches!(
            SessionConfig::from_toml_str("xml_indent = \"wide\""),
            Err(ConfigError::Toml(_))
        ));
        assert!(matches!(
            SessionConfig::from_json_str("{"),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn multiple_validation_errors_collected() {
        let config = SessionConfig {
            left_tab_name: "Same".into(),
            right_tab_name: "Same".into(),
            default_tree_name: " ".into(),
            xml_indent: 12,
            ..SessionConfig::default()
        };
        let errors = config.clone().validate();
        assert_eq!(errors.len(), 3, "{errors:?}");

        let err = config.validated().unwrap_err();
        assert!(err.to_string().starts_with("validation errors: "));
    }
}
