use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kubetmplt")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Render templated Kubernetes manifests and apply them step by step", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the steps of a job file
    Run(RunArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Job file with defaults, steps and prune settings
    #[arg(short, long, env = "KUBETMPLT_JOB_FILE")]
    pub job_file: PathBuf,

    /// YAML file with values, overriding job defaults
    #[arg(long)]
    pub set_file: Option<PathBuf>,

    /// Set a value (KEY=VALUE, dotted keys nest); overrides --set-file
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub set: Vec<String>,

    /// Directory with vault configuration or secrets, one file per key
    #[arg(long, env = "KUBETMPLT_MASTER_VAULT_PATH")]
    pub master_vault_path: Option<PathBuf>,

    /// One of generate, generate-with-actions, apply, apply-with-actions
    #[arg(short, long, env = "KUBETMPLT_MODE", default_value = "generate")]
    pub mode: String,

    /// kubectl context
    #[arg(long)]
    pub context: Option<String>,

    /// kubeconfig file
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Validate applies on the server without persisting; skip waits, actions and prune deletes
    #[arg(long)]
    pub dry_run: bool,

    /// Write generated output here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_args() {
        let cli = Cli::try_parse_from([
            "kubetmplt",
            "-v",
            "run",
            "-j",
            "job.yaml",
            "--set",
            "a.b=1",
            "--set",
            "c=x",
            "-m",
            "apply",
            "--dry-run",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 1);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.job_file, PathBuf::from("job.yaml"));
        assert_eq!(args.set, vec!["a.b=1", "c=x"]);
        assert_eq!(args.mode, "apply");
        assert!(args.dry_run);
        assert!(args.output.is_none());
    }
}
