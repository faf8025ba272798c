//! # jobkit
//!
//! Step orchestration for templated deployments.
//!
//! A job is an ordered list of steps: render-and-apply a manifest template,
//! wait for a condition, or run an action. Before each step the values it
//! needs are resolved from layered sources, its template is expanded, and
//! the result is handed to an [`Executor`] that talks to the target
//! cluster (or writes to an output sink).
//!
//! ## Core Concepts
//!
//! - **Values**: ordered value sets combined with a right-biased deep merge.
//!   Effective step values are `defaults < step values < value file < overrides`
//! - **Vault**: secret lookups that never fail mid-template; failures are
//!   collected and reported once the run is over
//! - **Step**: a closed set of step kinds decoded from loose job documents
//! - **Mode**: generate or apply, with or without actions
//! - **Orchestrator**: runs the steps in order, passing values forward
//!   between actions and collecting deployed resources for pruning
//!
//! ## Example
//!
//! ```ignore
//! use jobkit::{Mode, NoProgress, Orchestrator, Values};
//!
//! let orchestrator = Orchestrator::new("deploy/job.yaml", Mode::APPLY, Box::new(my_expander))
//!     .value_file("deploy/values.yaml")
//!     .vault_dir("/etc/vault");
//!
//! let report = orchestrator.run(&Values::new(), &mut my_executor, &mut NoProgress)?;
//! println!("deployed {} resources", report.deployed.len());
//! ```
//!
//! ## Collaborator Traits
//!
//! - [`Executor`]: performs wait, apply, action and prune
//! - [`Expander`]: expands template bodies
//! - [`SecretSource`]: backs the vault
//! - [`TemplateSource`]: loads template bodies
//! - [`RunObserver`]: receives progress updates

pub mod context;
pub mod error;
pub mod executor;
pub mod expand;
pub mod job;
pub mod mode;
pub mod orchestrator;
pub mod step;
pub mod values;
pub mod vault;

// Re-export main types at crate root
pub use context::{NoProgress, RunObserver};
pub use error::{Error, Result};
pub use executor::{Executor, KindNamespaceName, Labels, Store};
pub use expand::{Expander, Expansion, FuncMap, TemplateFn, VAULT_FN};
pub use job::{Job, JobDirSource, Prune, TemplateSource};
pub use mode::Mode;
pub use orchestrator::{Orchestrator, RunReport};
pub use step::{Step, StepKind, classify};
pub use values::{Values, merge};
pub use vault::{
    BackendFactory, ErrorCollector, FileSource, SecretSource, Vault, VaultBuilder, VaultError,
    VaultErrors,
};
