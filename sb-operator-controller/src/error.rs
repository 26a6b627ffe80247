// SPDX-FileCopyrightText: 2025 Timothy Pogue
//
// SPDX-License-Identifier: ISC

use std::result;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("kube error: {0}")]
    KubeError(#[from] kube::Error),
    #[error("conflicting update of {0}")]
    ConflictError(String),
    #[error("missing object key: {0}")]
    MissingObjectKeyError(&'static str),
    #[error("finalizer error: {0}")]
    FinalizerError(String),
    #[error(transparent)]
    BindingError(#[from] BindingError),
    #[error("unknown error: {0}")]
    UnknownError(String),
}

impl ControllerError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ControllerError::ConflictError(_))
    }
}

pub type Result<T> = result::Result<T, ControllerError>;

/// Failures of a single projection pass.
///
/// Each variant maps to the CamelCase reason written to the binding's Ready
/// condition, see [`BindingError::reason`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindingError {
    #[error("{0} not found")]
    TargetNotFound(String),
    #[error("container {container} not found in {target}")]
    ContainerNotFound { target: String, container: String },
    #[error("{target} has an unsupported shape: {detail}")]
    UnsupportedShape { target: String, detail: String },
    #[error("cyclic mapping: {}", .0.join(" -> "))]
    CyclicMapping(Vec<String>),
    #[error("mapping {mapping} references unknown entry {key}")]
    UnresolvedReference { mapping: String, key: String },
    #[error("mapping {0} is declared more than once")]
    DuplicateMapping(String),
    #[error("env var {env} references unknown secret entry {key}")]
    MissingSecretKey { env: String, key: String },
    #[error("invalid path {path}: {detail}")]
    InvalidMapping { path: String, detail: String },
    #[error("service {0} not found")]
    ServiceNotFound(String),
    #[error("service {0} does not expose status.binding.name")]
    ServiceNotReady(String),
    #[error("secret {0} not found")]
    SecretNotFound(String),
    #[error("gave up updating {target} after {attempts} conflicting writes")]
    ConflictRetryExhausted { target: String, attempts: u32 },
    #[error("object store error: {0}")]
    ObjectStore(String),
}

impl BindingError {
    pub fn reason(&self) -> &'static str {
        match self {
            BindingError::TargetNotFound(_) => "TargetNotFound",
            BindingError::ContainerNotFound { .. } => "ContainerNotFound",
            BindingError::UnsupportedShape { .. } => "UnsupportedShape",
            BindingError::CyclicMapping(_) => "CyclicMapping",
            BindingError::UnresolvedReference { .. } => "UnresolvedReference",
            BindingError::DuplicateMapping(_) => "DuplicateMapping",
            BindingError::MissingSecretKey { .. } => "MissingSecretKey",
            BindingError::InvalidMapping { .. } => "InvalidMapping",
            BindingError::ServiceNotFound(_) => "ServiceNotFound",
            BindingError::ServiceNotReady(_) => "ServiceNotReady",
            BindingError::SecretNotFound(_) => "SecretNotFound",
            BindingError::ConflictRetryExhausted { .. } => "ConflictRetryExhausted",
            BindingError::ObjectStore(_) => "ObjectStoreError",
        }
    }

    /// Transient failures are requeued quickly; everything else waits for
    /// the next resync or a change to the binding.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BindingError::ConflictRetryExhausted { .. } | BindingError::ObjectStore(_))
    }
}

impl From<ControllerError> for BindingError {
    fn from(error: ControllerError) -> Self {
        match error {
            ControllerError::BindingError(inner) => inner,
            other => BindingError::ObjectStore(other.to_string()),
        }
    }
}
