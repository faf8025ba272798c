//! Orchestrator - runs the steps of a job in order
//!
//! A run goes through these stages:
//! 1. Open the vault and check it answers the ping-check
//! 2. Merge the value file with the caller's overrides into the globals
//! 3. Parse the job, expand the job document against its own defaults and
//!    the globals, and parse the expanded document again
//! 4. Run every step in document order, threading the passed values and
//!    the deployed resource list from step to step
//! 5. Prune, when a store is configured and the mode is not generate
//! 6. Fail the run if any secret lookup failed along the way

use crate::context::RunObserver;
use crate::error::{Error, Result};
use crate::executor::{Executor, KindNamespaceName, Labels};
use crate::expand::{Expander, Expansion, FuncMap};
use crate::job::{Job, JobDirSource, TemplateSource, read_file};
use crate::mode::Mode;
use crate::step::Step;
use crate::values::{Values, merge};
use crate::vault::{Vault, VaultBuilder};
use std::path::{Path, PathBuf};

/// What a completed run did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    /// Steps that were dispatched to the executor
    pub executed: usize,
    /// Action steps skipped because the mode excludes actions
    pub skipped: usize,
    /// Resources deployed by render steps, in order
    pub deployed: Vec<KindNamespaceName>,
    /// Whether the prune call was made
    pub pruned: bool,
    /// Passed values as left by the last action
    pub passed: Values,
}

/// Runs a job file against an executor
pub struct Orchestrator {
    mode: Mode,
    job_path: PathBuf,
    value_path: Option<PathBuf>,
    vault_path: Option<PathBuf>,
    environ: Vec<(String, String)>,
    vaults: VaultBuilder,
    expander: Box<dyn Expander>,
}

impl Orchestrator {
    /// Create an orchestrator for the job at `job_path`
    pub fn new(job_path: impl Into<PathBuf>, mode: Mode, expander: Box<dyn Expander>) -> Self {
        Self {
            mode,
            job_path: job_path.into(),
            value_path: None,
            vault_path: None,
            environ: Vec::new(),
            vaults: VaultBuilder::new(),
            expander,
        }
    }

    /// Values file merged beneath the caller's overrides
    pub fn value_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.value_path = Some(path.into());
        self
    }

    /// Directory describing the master vault
    pub fn vault_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.vault_path = Some(path.into());
        self
    }

    /// Builder used to open the vault; register external backends on it
    pub fn vaults(mut self, vaults: VaultBuilder) -> Self {
        self.vaults = vaults;
        self
    }

    /// Environment handed to the expander
    pub fn environ(mut self, environ: Vec<(String, String)>) -> Self {
        self.environ = environ;
        self
    }

    pub fn job_path(&self) -> &Path {
        &self.job_path
    }

    /// Run the job
    ///
    /// `overrides` have the highest priority of all values. A run that
    /// completed every step but could not resolve some secrets still fails
    /// with [`Error::Vault`].
    pub fn run<E, P>(&self, overrides: &Values, executor: &mut E, progress: &mut P) -> Result<RunReport>
    where
        E: Executor + ?Sized,
        P: RunObserver + ?Sized,
    {
        let vault = self.vaults.open(self.vault_path.as_deref())?;
        vault.ping_check()?;

        let file_values = match &self.value_path {
            Some(path) => {
                Values::from_yaml(&read_file(path)?).map_err(|source| Error::Parse {
                    path: path.clone(),
                    source,
                })?
            }
            None => Values::new(),
        };
        let globals = merge([&file_values, overrides]);

        let job = read_file(&self.job_path)?;
        let source = JobDirSource::for_job(&self.job_path);

        let report = self.execute(&vault, &source, &globals, &job, executor, progress)?;

        if let Some(errors) = vault.error() {
            return Err(errors.into());
        }
        Ok(report)
    }

    /// Run an already loaded job document
    ///
    /// Vault errors are left in `vault` for the caller to inspect.
    pub fn execute<E, P>(
        &self,
        vault: &Vault,
        source: &dyn TemplateSource,
        globals: &Values,
        job: &[u8],
        executor: &mut E,
        progress: &mut P,
    ) -> Result<RunReport>
    where
        E: Executor + ?Sized,
        P: RunObserver + ?Sized,
    {
        let functions = FuncMap::with_vault(vault);

        // The job may template its own fields, evaluated against the
        // defaults as written before expansion.
        let unexpanded = Job::parse(&self.job_path, job)?;
        let job_values = merge([&unexpanded.defaults, globals]);
        let expanded = self
            .expander
            .expand(&Expansion {
                environ: &self.environ,
                path: &self.job_path,
                body: job,
                values: &job_values,
                passed: &Values::new(),
                functions: &functions,
            })
            .map_err(|source| Error::Expand {
                name: base_name(&self.job_path.to_string_lossy()),
                source,
            })?;
        let job = Job::parse(&self.job_path, &expanded)?;
        log::debug!("job {}: {} steps", self.job_path.display(), job.steps.len());

        let mut runner = StepRunner {
            mode: self.mode,
            environ: &self.environ,
            expander: self.expander.as_ref(),
            functions: &functions,
            source,
            defaults: &job.defaults,
            globals,
            labels: &job.prune.labels,
            executor: &mut *executor,
            progress: &mut *progress,
            passed: Values::new(),
        };

        let mut report = RunReport::default();
        let mut id = 1;
        for raw in &job.steps {
            match runner.run(id, raw)? {
                StepOutcome::Deployed(resources) => {
                    report.executed += 1;
                    report.deployed.extend(resources);
                }
                StepOutcome::Done => report.executed += 1,
                StepOutcome::Skipped => report.skipped += 1,
            }
            id += 1;
        }
        report.passed = runner.passed;

        let store = &job.prune.store;
        if store.is_configured() && !self.mode.is_generate() {
            log::info!(
                "prune {}/{}: keeping {} resources",
                store.namespace,
                store.name,
                report.deployed.len()
            );
            progress.on_prune(id, report.deployed.len(), store);
            executor
                .prune(id, &report.deployed, store)
                .map_err(|source| Error::Executor {
                    id,
                    name: "prune".to_string(),
                    source,
                })?;
            report.pruned = true;
        }

        Ok(report)
    }
}

enum StepOutcome {
    Deployed(Vec<KindNamespaceName>),
    Done,
    Skipped,
}

/// Per-run state shared by all steps
struct StepRunner<'a, E: ?Sized, P: ?Sized> {
    mode: Mode,
    environ: &'a [(String, String)],
    expander: &'a dyn Expander,
    functions: &'a FuncMap<'a>,
    source: &'a dyn TemplateSource,
    defaults: &'a Values,
    globals: &'a Values,
    labels: &'a Labels,
    executor: &'a mut E,
    progress: &'a mut P,
    passed: Values,
}

impl<E, P> StepRunner<'_, E, P>
where
    E: Executor + ?Sized,
    P: RunObserver + ?Sized,
{
    fn run(&mut self, id: usize, raw: &Values) -> Result<StepOutcome> {
        let step = Step::decode(id, raw)?;
        let kind = step.kind();

        let (template, values) = match &step {
            Step::Wait { flags } => {
                log::info!("step {id}: wait {flags}");
                self.progress.on_step_start(id, kind, flags);
                self.executor
                    .wait(id, flags)
                    .map_err(|source| Error::Executor {
                        id,
                        name: kind.to_string(),
                        source,
                    })?;
                self.progress.on_step_complete(id, kind, 0);
                return Ok(StepOutcome::Done);
            }
            Step::Action { template, .. } if !self.mode.runs_actions() => {
                // Skip before expanding: the template may read passed values
                // that only a real action would have set.
                log::warn!("step {id}: skipping action {template}, mode {} excludes actions", self.mode);
                self.progress
                    .on_step_skipped(id, kind, "actions are disabled in this mode");
                return Ok(StepOutcome::Skipped);
            }
            Step::Render { template, values } | Step::Action {
                template, values, ..
            } => (template.as_str(), values),
        };

        let name = base_name(template);
        log::info!("step {id}: {kind} {template}");
        self.progress.on_step_start(id, kind, &name);

        let (path, body) = self.source.read(template)?;
        let effective = merge([self.defaults, values, self.globals]);
        log::debug!("step {id}: {} values, {} passed", effective.len(), self.passed.len());

        let rendered = self
            .expander
            .expand(&Expansion {
                environ: self.environ,
                path: &path,
                body: &body,
                values: &effective,
                passed: &self.passed,
                functions: self.functions,
            })
            .map_err(|source| Error::Expand {
                name: name.clone(),
                source,
            })?;
        log::debug!("step {id}: expanded {name} to {} bytes", rendered.len());

        let executor_err = |source| Error::Executor {
            id,
            name: name.clone(),
            source,
        };
        let outcome = match &step {
            Step::Render { .. } => {
                let deployed = self
                    .executor
                    .apply(id, &name, self.labels, &rendered)
                    .map_err(executor_err)?;
                StepOutcome::Deployed(deployed)
            }
            Step::Action { port_forward, .. } => {
                self.executor
                    .action(id, &name, &rendered, port_forward, &mut self.passed)
                    .map_err(executor_err)?;
                StepOutcome::Done
            }
            Step::Wait { .. } => StepOutcome::Done,
        };

        let count = match &outcome {
            StepOutcome::Deployed(resources) => resources.len(),
            _ => 0,
        };
        self.progress.on_step_complete(id, kind, count);
        Ok(outcome)
    }
}

/// Final component of a slash separated path
fn base_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}
