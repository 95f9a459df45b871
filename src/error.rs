//! Error types for the fabnet launcher

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Main error type for network lifecycle operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error, surfaced verbatim
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// HTTP transport error while probing a node
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid network specification
    #[error("validation error: {0}")]
    Validation(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Launcher configuration error (kubeconfig, paths, backend selection)
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem error other than a missing identity file
    #[error("io error at {}: {source}", path.display())]
    Io {
        /// Path being accessed
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// An external tool exited non-zero
    #[error("{command} failed: {output}")]
    ToolFailed {
        /// Full command line
        command: String,
        /// Combined stdout and stderr
        output: String,
    },

    /// A required certificate or key file is absent from the crypto tree
    #[error("crypto material not found: {}", path.display())]
    MaterialNotFound {
        /// Expected location of the file
        path: PathBuf,
    },

    /// A cluster object already exists
    #[error("{kind} {name} already exists")]
    ResourceConflict {
        /// Object kind (Service, ConfigMap, ...)
        kind: String,
        /// Object name
        name: String,
    },

    /// A container in a pod entered the terminated state
    #[error("Pod: {pod}; Container {container}; failed to come up with reason: {reason}, err: {message}")]
    ContainerTerminated {
        /// Pod name
        pod: String,
        /// Container name
        container: String,
        /// Termination reason reported by the kubelet
        reason: String,
        /// Termination message reported by the kubelet
        message: String,
    },

    /// A pod did not reach the running state in time
    #[error("pod {pod} not running after timeout: {reason}")]
    ReadinessTimeout {
        /// Pod label being watched
        pod: String,
        /// Last observed condition reason
        reason: String,
    },

    /// One or more pods failed the running check
    #[error("{} pod(s) failed to come up: {}", failures.len(), failures.join("; "))]
    Readiness {
        /// One message per failed pod
        failures: Vec<String>,
    },

    /// A node's health endpoint returned a non-200 status
    #[error("health check failed for {node}: status {status}")]
    HealthCheck {
        /// Node name
        node: String,
        /// HTTP status returned
        status: u16,
    },

    /// Namespace deletion did not finish within the bounded wait
    #[error("namespace {namespace} is still in terminating phase")]
    NamespaceTerminating {
        /// Namespace name
        namespace: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Wrap an IO error on `path`
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Wrap an IO error reading generated crypto material.
    ///
    /// `NotFound` becomes [`Error::MaterialNotFound`].
    pub fn material(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::MaterialNotFound {
                path: path.as_ref().to_path_buf(),
            }
        } else {
            Self::io(path, source)
        }
    }

    /// Create a resource conflict error
    pub fn conflict(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::ResourceConflict {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// True for readiness and health failures
    pub fn is_readiness(&self) -> bool {
        matches!(
            self,
            Self::ContainerTerminated { .. }
                | Self::ReadinessTimeout { .. }
                | Self::Readiness { .. }
                | Self::HealthCheck { .. }
        )
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
