//! Executor contract
//!
//! The orchestrator never talks to a cluster itself. Every piece of
//! cluster-facing work goes through an [`Executor`], identified by the
//! step's sequential id. One implementation applies to a live cluster,
//! another writes a textual representation to an output sink.

use crate::values::Values;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identity of a deployed resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KindNamespaceName {
    pub kind: String,
    /// Empty for cluster scoped resources
    #[serde(default)]
    pub namespace: String,
    pub name: String,
}

impl KindNamespaceName {
    pub fn new(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for KindNamespaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}/{}", self.kind, self.name)
        } else {
            write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
        }
    }
}

/// Where the list of deployed resources is kept between runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Store {
    pub name: String,
    pub namespace: String,
}

impl Store {
    /// Pruning needs both a name and a namespace
    pub fn is_configured(&self) -> bool {
        !self.name.is_empty() && !self.namespace.is_empty()
    }
}

/// Labels added to every rendered resource
pub type Labels = BTreeMap<String, String>;

/// Performs the cluster-facing work of each step
pub trait Executor {
    /// Wait for the condition described by `flags`
    fn wait(&mut self, id: usize, flags: &str) -> anyhow::Result<()>;

    /// Apply a rendered manifest stream, returning what was deployed
    fn apply(
        &mut self,
        id: usize,
        name: &str,
        labels: &Labels,
        doc: &[u8],
    ) -> anyhow::Result<Vec<KindNamespaceName>>;

    /// Run a rendered action
    ///
    /// `passed` is shared by all steps of a run; values written here are
    /// visible to later steps.
    fn action(
        &mut self,
        id: usize,
        name: &str,
        doc: &[u8],
        port_forward: &str,
        passed: &mut Values,
    ) -> anyhow::Result<()>;

    /// Remove previously deployed resources that are not in `deployed`
    fn prune(&mut self, id: usize, deployed: &[KindNamespaceName], store: &Store)
    -> anyhow::Result<()>;
}
