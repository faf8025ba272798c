//! `kubetmplt run` - run the steps of a job file

use anyhow::{Context as AnyhowContext, Result};
use jobkit::{Mode, Orchestrator, RunReport, VaultBuilder};
use std::fs::File;
use std::io::{self, BufWriter, Write};

use crate::Context;
use crate::cli::RunArgs;
use crate::config;
use crate::execute::{Generate, Kubectl};
use crate::progress::TerminalProgress;
use crate::secrets::{AZURE_KEY_VAULT, AzureKeyVault};
use crate::template::TemplateEngine;
use crate::ui;

pub fn run(ctx: &Context, args: RunArgs) -> Result<()> {
    let mode: Mode = args.mode.parse()?;
    let overrides = config::overrides(&args.set)?;
    let job_file = config::expand_path(&args.job_file);
    log::debug!("run {} in {mode} mode", job_file.display());

    let mut orchestrator = Orchestrator::new(&job_file, mode, Box::new(TemplateEngine))
        .vaults(vaults())
        .environ(config::environ());
    if let Some(path) = &args.set_file {
        orchestrator = orchestrator.value_file(config::expand_path(path));
    }
    if let Some(path) = &args.master_vault_path {
        orchestrator = orchestrator.vault_dir(config::expand_path(path));
    }

    let mut progress = TerminalProgress::new(ctx.quiet);
    let report = if mode.is_generate() {
        if args.dry_run {
            log::warn!("--dry-run has no effect in {mode} mode");
        }
        match &args.output {
            Some(path) => {
                let path = config::expand_path(path);
                let file = File::create(&path)
                    .with_context(|| format!("Failed to create {}", path.display()))?;
                let mut generate = Generate::new(BufWriter::new(file));
                let report = orchestrator.run(&overrides, &mut generate, &mut progress)?;
                generate
                    .into_inner()
                    .flush()
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                report
            }
            None => {
                let mut generate = Generate::new(io::stdout().lock());
                orchestrator.run(&overrides, &mut generate, &mut progress)?
            }
        }
    } else {
        if args.output.is_some() {
            ui::warn(&format!("--output is ignored in {mode} mode"));
        }
        let kubeconfig = args.kubeconfig.as_deref().map(config::expand_path);
        let mut kubectl = Kubectl::new(args.context.as_deref(), kubeconfig.as_deref(), args.dry_run)?;
        orchestrator.run(&overrides, &mut kubectl, &mut progress)?
    };

    if !ctx.quiet {
        summary(ctx, mode, &report);
    }
    Ok(())
}

/// Vault backends available to `--master-vault-path`
fn vaults() -> VaultBuilder {
    VaultBuilder::new().backend(AZURE_KEY_VAULT, AzureKeyVault::from_config)
}

fn summary(ctx: &Context, mode: Mode, report: &RunReport) {
    ui::success(&format!(
        "{} step{} run in {mode} mode",
        report.executed,
        ui::plural(report.executed)
    ));
    ui::kv("resources", &report.deployed.len().to_string());
    if ctx.verbose > 0 {
        for resource in &report.deployed {
            ui::dim(&resource.to_string());
        }
    }
    if report.skipped > 0 {
        ui::kv("skipped actions", &report.skipped.to_string());
    }
    if report.pruned {
        ui::kv("pruned", "yes");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    const JOB: &str = r"
defaults:
  ns: web
steps:
  - tmplt: ns.yaml
  - action: token.yaml
    portForward: svc/vault 8200
prune:
  labels:
    team: web
  store:
    name: deployed
    namespace: kube-system
";

    fn job_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("job.yaml"), JOB).unwrap();
        fs::write(
            dir.path().join("ns.yaml"),
            "kind: Namespace\nmetadata:\n  name: {{ .Values.ns }}\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("token.yaml"),
            "type: kubectl\nargs: [get, secret, {{ .Values.ns }}]\n",
        )
        .unwrap();
        dir
    }

    fn args(dir: &Path, mode: &str) -> RunArgs {
        RunArgs {
            job_file: dir.join("job.yaml"),
            set_file: None,
            set: vec!["ns=api".to_string()],
            master_vault_path: None,
            mode: mode.to_string(),
            context: None,
            kubeconfig: None,
            dry_run: false,
            output: Some(dir.join("out.yaml")),
        }
    }

    fn quiet() -> Context {
        Context {
            verbose: 0,
            quiet: true,
        }
    }

    #[test]
    fn test_generate_to_file() {
        let dir = job_dir();
        run(&quiet(), args(dir.path(), "generate")).unwrap();

        let out = fs::read_to_string(dir.path().join("out.yaml")).unwrap();
        assert!(out.starts_with("# 1 tmplt ns.yaml\n"), "{out}");
        assert!(out.contains("name: api"), "{out}");
        assert!(out.contains("team: web"), "{out}");
        assert!(!out.contains("action"), "{out}");
        assert!(!out.contains("prune"), "{out}");
    }

    #[test]
    fn test_generate_with_actions() {
        let dir = job_dir();
        run(&quiet(), args(dir.path(), "generate-with-actions")).unwrap();

        let out = fs::read_to_string(dir.path().join("out.yaml")).unwrap();
        assert!(out.contains("# 2 action token.yaml\n# portForward: svc/vault 8200\n"), "{out}");
        assert!(out.contains("args: [get, secret, api]"), "{out}");
    }

    #[test]
    fn test_generate_chained_actions() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("job.yaml"),
            "steps:\n  - action: a.yaml\n  - action: b.yaml\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("a.yaml"),
            "type: kubectl\nargs: [get, secret, token]\npassValue: token\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("b.yaml"),
            "type: kubectl\nargs: [annotate, pod, x, \"token={{ .Get.token }}\"]\n",
        )
        .unwrap();

        run(&quiet(), args(dir.path(), "generate-with-actions")).unwrap();

        let out = fs::read_to_string(dir.path().join("out.yaml")).unwrap();
        assert!(out.contains("# 2 action b.yaml\n"), "{out}");
        assert!(out.contains("token=<generated: step 1 a.yaml>"), "{out}");
    }

    #[test]
    fn test_set_file_and_vault() {
        let dir = job_dir();
        fs::write(dir.path().join("values.yaml"), "ns: from-file\n").unwrap();
        let vault = dir.path().join("vault");
        fs::create_dir(&vault).unwrap();
        fs::write(vault.join("ping-check"), "pong").unwrap();
        fs::write(vault.join("ns-secret"), "s3cr3t").unwrap();
        fs::write(
            dir.path().join("ns.yaml"),
            "kind: Secret\nmetadata:\n  name: {{ .Values.ns }}\ndata:\n  v: {{ vault \"ns-secret\" | b64enc }}\n",
        )
        .unwrap();

        let mut args = args(dir.path(), "generate");
        args.set.clear();
        args.set_file = Some(dir.path().join("values.yaml"));
        args.master_vault_path = Some(vault);
        run(&quiet(), args).unwrap();

        let out = fs::read_to_string(dir.path().join("out.yaml")).unwrap();
        assert!(out.contains("name: from-file"), "{out}");
        assert!(out.contains("v: czNjcjN0"), "{out}");
    }

    #[test]
    fn test_invalid_mode() {
        let dir = job_dir();
        let err = run(&quiet(), args(dir.path(), "deploy")).unwrap_err();
        assert!(err.to_string().contains("expected mode to be one of"));
    }
}
