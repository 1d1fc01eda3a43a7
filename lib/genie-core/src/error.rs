//! Error types for the attachment pipeline and their CNI wire form

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GenieError>;

/// CNI error codes: the standard set plus genie's own codes
///
/// See: https://github.com/containernetworking/cni/blob/spec-v1.0.0/SPEC.md#error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CniErrorCode {
    /// 1: Incompatible CNI version
    IncompatibleVersion = 1,

    /// 2: Unsupported field in network configuration
    UnsupportedField = 2,

    /// 3: Container unknown or does not exist
    UnknownContainer = 3,

    /// 4: Invalid necessary environment variables
    InvalidEnvironmentVariables = 4,

    /// 5: I/O failure
    IoFailure = 5,

    /// 6: Failed to decode content
    DecodingFailure = 6,

    /// 7: Invalid network config
    InvalidNetworkConfig = 7,

    /// 11: Try again later
    TryAgainLater = 11,

    // Plugin-specific errors (100+)

    /// 100: Pod named by CNI_ARGS does not exist
    PodNotFound = 100,

    /// 101: Pod networking annotation is malformed
    InvalidAnnotation = 101,

    /// 102: Referenced network resource does not exist
    ResourceNotFound = 102,

    /// 103: Referenced network resource violates its schema
    InvalidResource = 103,

    /// 104: No configuration or synthesis for the requested plugin
    UnknownPlugin = 104,

    /// 105: Plugin binary not installed
    PluginBinaryMissing = 105,

    /// 106: Pod status patch failed
    PatchFailed = 106,

    /// 107: Delegate failed without reporting a CNI error
    DelegateExecFailed = 107,
}

/// CNI error with code, message, and optional details
///
/// The code is kept as a raw number so that errors reported by delegated
/// plugins pass through verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{msg}")]
pub struct CniError {
    code: u32,
    msg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl CniError {
    /// Create a new CNI error
    pub fn new(code: CniErrorCode, msg: &str) -> Self {
        Self::from_raw(code as u32, msg)
    }

    /// Create an error carrying a code reported by another plugin
    pub fn from_raw(code: u32, msg: &str) -> Self {
        Self {
            code,
            msg: msg.to_string(),
            details: None,
        }
    }

    /// Add details to the error
    pub fn with_details(mut self, details: &str) -> Self {
        self.details = Some(details.to_string());
        self
    }

    pub fn code(&self) -> u32 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.msg
    }

    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    /// Whether the delegate reported that the container is already gone
    pub fn is_unknown_container(&self) -> bool {
        self.code == CniErrorCode::UnknownContainer as u32
    }

    /// Render the error JSON printed on stdout by a failing plugin
    pub fn to_json(&self, cni_version: &str) -> serde_json::Value {
        let mut output = serde_json::json!({
            "cniVersion": cni_version,
            "code": self.code,
            "msg": self.msg,
        });
        if let Some(details) = &self.details {
            output["details"] = serde_json::Value::String(details.clone());
        }
        output
    }
}

/// Errors produced while planning, resolving and delegating attachments
#[derive(Error, Debug)]
pub enum GenieError {
    #[error("Invalid CNI envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Pod not found: {namespace}/{name}")]
    PodNotFound { namespace: String, name: String },

    #[error("Invalid annotation: {0}")]
    InvalidAnnotation(String),

    #[error("{kind} not found: {namespace}/{name}")]
    CrdNotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("Invalid {kind} {namespace}/{name}: {reason}")]
    InvalidCrd {
        kind: &'static str,
        namespace: String,
        name: String,
        reason: String,
    },

    #[error("Invalid CNI configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown plugin: {0}")]
    UnknownPlugin(String),

    #[error("Plugin binary missing: {plugin} not found in {dir}")]
    PluginBinaryMissing { plugin: String, dir: String },

    #[error("Delegate {plugin} failed for interface {interface}: {source}")]
    DelegateFailed {
        plugin: String,
        interface: String,
        #[source]
        source: CniError,
    },

    #[error("Pod status patch failed: {0}")]
    PatchFailed(String),

    #[error("Kubernetes error: {0}")]
    Kubernetes(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GenieError {
    pub fn invalid_crd(
        kind: &'static str,
        namespace: &str,
        name: &str,
        reason: impl Into<String>,
    ) -> Self {
        GenieError::InvalidCrd {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// Convert into the CNI error reported to the runtime.
    ///
    /// Delegate failures surface the delegate's own error unchanged.
    pub fn to_cni_error(&self) -> CniError {
        let (code, msg) = match self {
            GenieError::DelegateFailed { source, .. } => return source.clone(),
            GenieError::InvalidEnvelope(_) => {
                (CniErrorCode::InvalidEnvironmentVariables, "invalid CNI invocation")
            }
            GenieError::PodNotFound { .. } => (CniErrorCode::PodNotFound, "pod not found"),
            GenieError::InvalidAnnotation(_) => {
                (CniErrorCode::InvalidAnnotation, "invalid pod network annotation")
            }
            GenieError::CrdNotFound { .. } => {
                (CniErrorCode::ResourceNotFound, "network resource not found")
            }
            GenieError::InvalidCrd { .. } => {
                (CniErrorCode::InvalidResource, "invalid network resource")
            }
            GenieError::InvalidConfig(_) => {
                (CniErrorCode::InvalidNetworkConfig, "invalid CNI configuration")
            }
            GenieError::UnknownPlugin(_) => (CniErrorCode::UnknownPlugin, "unknown plugin"),
            GenieError::PluginBinaryMissing { .. } => {
                (CniErrorCode::PluginBinaryMissing, "plugin binary missing")
            }
            GenieError::PatchFailed(_) => (CniErrorCode::PatchFailed, "pod status patch failed"),
            GenieError::Kubernetes(_) => (CniErrorCode::TryAgainLater, "kubernetes API error"),
            GenieError::Serialization(_) => {
                (CniErrorCode::DecodingFailure, "failed to decode content")
            }
            GenieError::Io(_) => (CniErrorCode::IoFailure, "I/O failure"),
        };
        CniError::new(code, msg).with_details(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_values() {
        assert_eq!(CniErrorCode::IncompatibleVersion as u32, 1);
        assert_eq!(CniErrorCode::UnknownContainer as u32, 3);
        assert_eq!(CniErrorCode::PodNotFound as u32, 100);
    }

    #[test]
    fn test_error_with_details() {
        let err = CniError::new(CniErrorCode::IoFailure, "read failed")
            .with_details("permission denied");

        assert_eq!(err.code(), 5);
        assert_eq!(err.message(), "read failed");
        assert_eq!(err.details(), Some("permission denied"));
    }

    #[test]
    fn test_delegate_error_passes_through() {
        let delegate = CniError::from_raw(999, "weave: no route").with_details("eth1");
        let err = GenieError::DelegateFailed {
            plugin: "weave".to_string(),
            interface: "eth1".to_string(),
            source: delegate.clone(),
        };
        assert_eq!(err.to_cni_error(), delegate);
    }

    #[test]
    fn test_genie_error_details() {
        let err = GenieError::UnknownPlugin("abc".to_string());
        let cni = err.to_cni_error();
        assert_eq!(cni.code(), CniErrorCode::UnknownPlugin as u32);
        assert_eq!(cni.details(), Some("Unknown plugin: abc"));

        let json = cni.to_json("0.3.1");
        assert_eq!(json["code"], 104);
        assert_eq!(json["cniVersion"], "0.3.1");
    }

    #[test]
    fn test_kind_codes() {
        let cases = vec![
            (GenieError::InvalidEnvelope("no CNI_COMMAND".into()), 4),
            (
                GenieError::PodNotFound {
                    namespace: "default".into(),
                    name: "web".into(),
                },
                100,
            ),
            (GenieError::invalid_crd("LogicalNetwork", "test", "net1", "no plugin"), 103),
            (GenieError::PatchFailed("conflict".into()), 106),
            (
                GenieError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone")),
                5,
            ),
        ];
        for (err, code) in cases {
            let cni = err.to_cni_error();
            assert_eq!(cni.code(), code);
            assert!(!cni.message().is_empty());
            assert_eq!(cni.details(), Some(err.to_string().as_str()));
        }
    }

    #[test]
    fn test_error_json_roundtrip_from_plugin() {
        let err: CniError =
            serde_json::from_str(r#"{"cniVersion":"0.4.0","code":3,"msg":"no such container"}"#)
                .unwrap();
        assert!(err.is_unknown_container());
        assert_eq!(err.details(), None);
    }
}
