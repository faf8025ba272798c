//! Secret vault with deferred error collection
//!
//! Secrets are looked up from inside template expansion, where a failed
//! lookup cannot be propagated as a typed error. [`Vault::get`] therefore
//! never fails: it records the problem in the vault's [`ErrorCollector`],
//! returns a `<...>` placeholder and lets expansion finish. The collected
//! errors are inspected once, after the whole run, so a single run reports
//! every missing secret.

use crate::error::{Error, Result};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Key that must resolve to [`PING_CHECK_VALUE`] for a vault to be usable
pub const PING_CHECK_KEY: &str = "ping-check";
/// Expected value of [`PING_CHECK_KEY`]
pub const PING_CHECK_VALUE: &str = "pong";
/// Vault directory file selecting the backend
pub const TYPE_KEY: &str = "type";
/// Backend name for the directory-of-files vault
pub const FILE_BACKEND: &str = "file";

/// Source of raw secret values
///
/// Implement this trait to plug in a secret backend. `Ok(None)` means the
/// key does not exist; `Err` means the backend could not be asked.
pub trait SecretSource {
    /// Fetch the raw value stored under `key`
    fn fetch(&self, key: &str) -> anyhow::Result<Option<String>>;
}

/// In-memory source, filled from a vault directory or directly
#[derive(Debug, Clone, Default)]
pub struct FileSource {
    entries: HashMap<String, String>,
}

impl FileSource {
    pub fn new(entries: HashMap<String, String>) -> Self {
        Self { entries }
    }
}

impl SecretSource for FileSource {
    fn fetch(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }
}

/// A single failed secret lookup
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VaultError {
    #[error("not found: {0}")]
    KeyNotFound(String),

    #[error("not found: {field} in {key}")]
    FieldNotFound { key: String, field: String },

    #[error("{key}: expected a JSON object: {message}")]
    Malformed { key: String, message: String },

    #[error("{key}: {message}")]
    Backend { key: String, message: String },
}

impl VaultError {
    /// Text substituted into the template in place of the secret
    pub fn placeholder(&self) -> String {
        match self {
            VaultError::KeyNotFound(key) => format!("<not found: {key}>"),
            VaultError::FieldNotFound { field, .. } => format!("<not found: {field}>"),
            other => format!("<{other}>"),
        }
    }
}

/// All secret lookup failures of a run, in the order they occurred
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultErrors(Vec<VaultError>);

impl VaultErrors {
    pub fn errors(&self) -> &[VaultError] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for VaultErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let noun = if self.0.len() == 1 { "error" } else { "errors" };
        write!(f, "{} vault {noun} occurred:", self.0.len())?;
        for err in &self.0 {
            write!(f, "\n\t* {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for VaultErrors {}

/// Accumulates lookup failures for the lifetime of one run
///
/// Runs are single threaded, so a `RefCell` is enough. Anything that
/// parallelizes steps has to serialize access to this collector.
#[derive(Debug, Default)]
pub struct ErrorCollector {
    errors: RefCell<Vec<VaultError>>,
}

impl ErrorCollector {
    pub fn record(&self, error: VaultError) {
        log::debug!("vault: {error}");
        self.errors.borrow_mut().push(error);
    }

    /// Aggregate of everything recorded so far, `None` if all went well
    pub fn aggregate(&self) -> Option<VaultErrors> {
        let errors = self.errors.borrow();
        if errors.is_empty() {
            None
        } else {
            Some(VaultErrors(errors.clone()))
        }
    }
}

/// Resolves `(key, field)` pairs to secret strings
pub struct Vault {
    source: Box<dyn SecretSource>,
    errors: ErrorCollector,
}

impl fmt::Debug for Vault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vault")
            .field("errors", &self.errors)
            .finish_non_exhaustive()
    }
}

impl Vault {
    /// Create a vault backed by `source`
    pub fn new(source: Box<dyn SecretSource>) -> Self {
        Self {
            source,
            errors: ErrorCollector::default(),
        }
    }

    /// Vault that only answers the ping-check
    pub fn empty() -> Self {
        let entries = HashMap::from([(PING_CHECK_KEY.to_string(), PING_CHECK_VALUE.to_string())]);
        Self::new(Box::new(FileSource::new(entries)))
    }

    /// Look up a secret
    ///
    /// With an empty `field` (or `.`) the raw value is returned as-is.
    /// Otherwise the raw value must be a JSON object and `field` one of its
    /// keys. Failures are recorded and a placeholder is returned.
    pub fn get(&self, key: &str, field: &str) -> String {
        match self.resolve(key, field) {
            Ok(value) => value,
            Err(err) => {
                let placeholder = err.placeholder();
                self.errors.record(err);
                placeholder
            }
        }
    }

    fn resolve(&self, key: &str, field: &str) -> std::result::Result<String, VaultError> {
        let raw = self
            .source
            .fetch(key)
            .map_err(|e| VaultError::Backend {
                key: key.to_string(),
                message: format!("{e:#}"),
            })?
            .ok_or_else(|| VaultError::KeyNotFound(key.to_string()))?;

        if field.is_empty() || field == "." {
            return Ok(raw);
        }

        let object: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&raw)
            .map_err(|e| VaultError::Malformed {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        match object.get(field) {
            Some(serde_json::Value::String(s)) => Ok(s.clone()),
            Some(other) => Ok(other.to_string()),
            None => Err(VaultError::FieldNotFound {
                key: key.to_string(),
                field: field.to_string(),
            }),
        }
    }

    /// Aggregate of all failed lookups so far, `None` if all went well
    pub fn error(&self) -> Option<VaultErrors> {
        self.errors.aggregate()
    }

    /// Verify the backend is reachable by resolving the ping-check key
    pub fn ping_check(&self) -> Result<()> {
        let got = self.get(PING_CHECK_KEY, "");
        if got == PING_CHECK_VALUE {
            Ok(())
        } else {
            Err(Error::VaultUnreachable {
                expected: PING_CHECK_VALUE,
                got,
            })
        }
    }
}

/// Creates a secret source from the files of a vault directory
pub type BackendFactory =
    Box<dyn Fn(&HashMap<String, String>) -> anyhow::Result<Box<dyn SecretSource>>>;

/// Builds a [`Vault`] from a vault directory
///
/// The directory holds one file per key. A `type` file selects the
/// backend: absent or `file` means the files themselves are the secrets,
/// any other name must be registered with [`VaultBuilder::backend`] and
/// receives the files as its configuration.
#[derive(Default)]
pub struct VaultBuilder {
    backends: BTreeMap<String, BackendFactory>,
}

impl VaultBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named external backend
    pub fn backend<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&HashMap<String, String>) -> anyhow::Result<Box<dyn SecretSource>> + 'static,
    {
        self.backends.insert(name.into(), Box::new(factory));
        self
    }

    /// Open the vault at `path`; no path gives [`Vault::empty`]
    pub fn open(&self, path: Option<&Path>) -> Result<Vault> {
        let Some(path) = path else {
            return Ok(Vault::empty());
        };

        let files = read_vault_dir(path)?;
        let backend = files
            .get(TYPE_KEY)
            .map(|t| t.trim().to_string())
            .unwrap_or_else(|| FILE_BACKEND.to_string());

        if backend == FILE_BACKEND {
            log::debug!("vault: {} file entries from {}", files.len(), path.display());
            return Ok(Vault::new(Box::new(FileSource::new(files))));
        }

        match self.backends.get(&backend) {
            Some(factory) => {
                let source = factory(&files).map_err(|source| Error::VaultBackend {
                    backend: backend.clone(),
                    source,
                })?;
                log::debug!("vault: using {backend} backend");
                Ok(Vault::new(source))
            }
            None => {
                let mut accepted: Vec<&str> = vec![FILE_BACKEND];
                accepted.extend(self.backends.keys().map(String::as_str));
                Err(Error::VaultConfig {
                    path: path.join(TYPE_KEY),
                    message: format!("must be one of [{}], got: {backend}", accepted.join(",")),
                })
            }
        }
    }
}

/// Read every regular file of `dir` into a name → content map
fn read_vault_dir(dir: &Path) -> Result<HashMap<String, String>> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| Error::Io { path, source }
    };

    let mut files = HashMap::new();
    for entry in fs::read_dir(dir).map_err(io_err(dir))? {
        let entry = entry.map_err(io_err(dir))?;
        let path = entry.path();
        if path.is_dir() {
            continue;
        }
        let content = fs::read_to_string(&path).map_err(io_err(&path))?;
        files.insert(entry.file_name().to_string_lossy().into_owned(), content);
    }
    Ok(files)
}
