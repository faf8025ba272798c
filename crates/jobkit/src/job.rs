//! Job documents and template loading

use crate::error::{Error, Result};
use crate::executor::{Labels, Store};
use crate::values::Values;
use serde::{Deserialize, Deserializer};
use std::fs;
use std::path::{Path, PathBuf};

/// A job: default values, ordered steps and prune configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Job {
    /// Lowest-priority values for every step
    #[serde(default)]
    pub defaults: Values,
    /// Raw step documents, classified when they run
    #[serde(default, deserialize_with = "nullable")]
    pub steps: Vec<Values>,
    #[serde(default, deserialize_with = "nullable")]
    pub prune: Prune,
}

/// Prune configuration of a job
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Prune {
    /// Labels added to all rendered resources
    #[serde(default, deserialize_with = "nullable")]
    pub labels: Labels,
    /// Store holding the resources deployed by the previous run
    #[serde(default, deserialize_with = "nullable")]
    pub store: Store,
}

/// Treat an explicit `null` like an absent field
fn nullable<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Job {
    /// Parse a job document; `path` is only used for error messages
    pub fn parse(path: &Path, bytes: &[u8]) -> Result<Job> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Job::default());
        }
        serde_yaml::from_slice(bytes).map_err(|source| Error::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Read a whole file, attaching the path to any error
pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Loads template bodies for steps
pub trait TemplateSource {
    /// Read the template at `path`, returning the resolved path and body
    fn read(&self, path: &str) -> Result<(PathBuf, Vec<u8>)>;
}

/// Resolves template paths relative to the job file's directory
#[derive(Debug, Clone)]
pub struct JobDirSource {
    dir: PathBuf,
}

impl JobDirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Source for the directory containing `job_path`
    pub fn for_job(job_path: &Path) -> Self {
        Self::new(job_path.parent().unwrap_or(Path::new("")))
    }
}

impl TemplateSource for JobDirSource {
    fn read(&self, path: &str) -> Result<(PathBuf, Vec<u8>)> {
        let full = self.dir.join(path);
        let body = read_file(&full)?;
        Ok((full, body))
    }
}
