//! Core types for modelcheck

use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared packaging/runtime contract of a model artifact
///
/// Unrecognised names are kept verbatim in [`ModelFamily::Other`] so the
/// service can answer with an explicit "unsupported" verdict instead of
/// rejecting the request at decode time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ModelFamily {
    /// SavedModel graph loaded into a runtime session
    GraphRuntimeV1,
    /// Weights plus topology descriptor, checked by file presence
    StaticFileV1,
    /// Any other name
    Other(String),
}

impl ModelFamily {
    /// Canonical wire name
    pub fn as_str(&self) -> &str {
        match self {
            Self::GraphRuntimeV1 => "GRAPH_RUNTIME_V1",
            Self::StaticFileV1 => "STATIC_FILE_V1",
            Self::Other(name) => name,
        }
    }

    /// Whether this is one of the families the service knows about
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl From<String> for ModelFamily {
    fn from(name: String) -> Self {
        match name.as_str() {
            "GRAPH_RUNTIME_V1" | "TENSORFLOW_1_13_1" => Self::GraphRuntimeV1,
            "STATIC_FILE_V1" | "OPENVINO_2019_R2" => Self::StaticFileV1,
            _ => Self::Other(name),
        }
    }
}

impl From<&str> for ModelFamily {
    fn from(name: &str) -> Self {
        Self::from(name.to_string())
    }
}

impl From<ModelFamily> for String {
    fn from(family: ModelFamily) -> Self {
        match family {
            ModelFamily::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to validate one remote model artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRequest {
    /// Remote location of the artifact
    pub url: String,

    /// Size the caller claims the artifact has
    pub declared_size_bytes: u64,

    /// Declared model family
    pub model_family: ModelFamily,
}

impl ValidationRequest {
    /// Create a new validation request
    pub fn new(url: impl Into<String>, declared_size_bytes: u64, model_family: ModelFamily) -> Self {
        Self {
            url: url.into(),
            declared_size_bytes,
            model_family,
        }
    }
}

/// Verdict for one request
///
/// `message` is empty when the model is valid and carries a diagnostic
/// otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,

    #[serde(default)]
    pub message: String,
}

impl ValidationResult {
    /// A passing verdict
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            message: String::new(),
        }
    }

    /// A failing verdict with a diagnostic
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            message: message.into(),
        }
    }
}

impl From<crate::Error> for ValidationResult {
    fn from(err: crate::Error) -> Self {
        Self::invalid(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_accepts_legacy_names() {
        assert_eq!(ModelFamily::from("TENSORFLOW_1_13_1"), ModelFamily::GraphRuntimeV1);
        assert_eq!(ModelFamily::from("OPENVINO_2019_R2"), ModelFamily::StaticFileV1);
        assert_eq!(ModelFamily::from("GRAPH_RUNTIME_V1"), ModelFamily::GraphRuntimeV1);
    }

    #[test]
    fn test_unknown_family_is_preserved() {
        let family = ModelFamily::from("ONNX_V9");
        assert!(!family.is_known());
        assert_eq!(family.to_string(), "ONNX_V9");
    }

    #[test]
    fn test_request_json_shape() {
        let req: ValidationRequest = serde_json::from_str(
            r#"{"url":"https://example.com/saved_model.zip","declared_size_bytes":62623947,"model_family":"GRAPH_RUNTIME_V1"}"#,
        )
        .unwrap();
        assert_eq!(req.declared_size_bytes, 62_623_947);
        assert_eq!(req.model_family, ModelFamily::GraphRuntimeV1);

        let back = serde_json::to_value(&req).unwrap();
        assert_eq!(back["model_family"], "GRAPH_RUNTIME_V1");
    }

    #[test]
    fn test_negative_size_is_rejected_at_decode() {
        let res = serde_json::from_str::<ValidationRequest>(
            r#"{"url":"u","declared_size_bytes":-1,"model_family":"STATIC_FILE_V1"}"#,
        );
        assert!(res.is_err());
    }

    #[test]
    fn test_result_from_error() {
        let result = ValidationResult::from(crate::Error::UnsupportedFamily("X".into()));
        assert!(!result.is_valid);
        assert_eq!(result.message, "unsupported model family: X");
        assert_eq!(ValidationResult::valid().message, "");
    }
}
