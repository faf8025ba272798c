//! Error types for job runs.
//!
//! Every variant is fatal for the run that raised it and carries enough
//! context (file path, step id, template name) to localize the failure.
//! Missing secrets are the exception: they are collected while the run
//! proceeds and surface at the end as a single [`Error::Vault`].

use crate::vault::VaultErrors;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while running a job.
#[derive(Debug, Error)]
pub enum Error {
    /// A job, value, template or vault file could not be read
    #[error("{}: {source}", path.display())]
    Io {
        /// File that could not be read
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// A job or value file is not valid YAML of the expected shape
    #[error("parse {}: {source}", path.display())]
    Parse {
        /// File that failed to parse
        path: PathBuf,
        /// Underlying YAML error
        #[source]
        source: serde_yaml::Error,
    },

    /// Template expansion failed
    #[error("expand {name}")]
    Expand {
        /// Base name of the template (or the job file)
        name: String,
        /// Error reported by the expander
        #[source]
        source: anyhow::Error,
    },

    /// A step document has fields of the wrong type
    #[error("step {id}: {source}")]
    Decode {
        /// Step identity
        id: usize,
        /// Underlying decode error
        #[source]
        source: serde_yaml::Error,
    },

    /// A step document has none of the recognized step keys
    #[error("step {id}: unknown step, expected one of [tmplt, wait, action], got keys {keys:?}")]
    UnknownStep {
        /// Step identity
        id: usize,
        /// Keys that were present in the step document
        keys: Vec<String>,
    },

    /// The executor failed to perform a step
    #[error("step {id} {name}")]
    Executor {
        /// Step identity
        id: usize,
        /// Template base name, or the step kind for wait/prune
        name: String,
        /// Error reported by the executor
        #[source]
        source: anyhow::Error,
    },

    /// The vault directory does not describe a usable vault
    #[error("vault config {}: {message}", path.display())]
    VaultConfig {
        /// Vault directory (or the offending file in it)
        path: PathBuf,
        /// What is wrong with it
        message: String,
    },

    /// A named secret backend could not be created
    #[error("vault backend {backend}")]
    VaultBackend {
        /// Value of the `type` file
        backend: String,
        /// Error reported by the backend factory
        #[source]
        source: anyhow::Error,
    },

    /// The vault did not answer the ping-check with the expected value
    #[error("keyvault ping-check expected {expected}, got: {got}")]
    VaultUnreachable {
        /// Expected ping-check value
        expected: &'static str,
        /// Value that was returned instead
        got: String,
    },

    /// Secret lookups failed during the run
    #[error(transparent)]
    Vault(#[from] VaultErrors),

    /// Unrecognized mode string
    #[error(
        "expected mode to be one of [apply,apply-with-actions,generate,generate-with-actions] instead of: {0}"
    )]
    InvalidMode(String),
}

impl Error {
    /// Step identity this error belongs to, if any
    pub fn step_id(&self) -> Option<usize> {
        match self {
            Error::Decode { id, .. }
            | Error::UnknownStep { id, .. }
            | Error::Executor { id, .. } => Some(*id),
            _ => None,
        }
    }
}

/// Result type for job runs.
pub type Result<T> = std::result::Result<T, Error>;
