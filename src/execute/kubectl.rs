//! Executor backed by the `kubectl` CLI

use super::{Action, manifest};
use crate::runner::{run_capture, run_with_input, spawn_quiet};
use anyhow::{Context, Result};
use jobkit::{Executor, KindNamespaceName, Labels, Store, Values};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Child;
use std::thread;
use std::time::Duration;

/// Action type handled by this executor
const ACTION_KUBECTL: &str = "kubectl";
/// Key in the store ConfigMap holding the deployed list
const STORE_KEY: &str = "deployed";
/// Time given to a port-forward to start listening
const DEFAULT_SETTLE: Duration = Duration::from_secs(2);

/// Applies to a live cluster through `kubectl`
pub struct Kubectl {
    kubectl: PathBuf,
    global: Vec<String>,
    dry_run: bool,
    settle: Duration,
}

impl Kubectl {
    /// Find `kubectl` in PATH
    pub fn new(context: Option<&str>, kubeconfig: Option<&Path>, dry_run: bool) -> Result<Self> {
        let kubectl = which::which("kubectl").context("kubectl not found in PATH")?;
        let mut global = Vec::new();
        if let Some(context) = context {
            global.extend(["--context".to_string(), context.to_string()]);
        }
        if let Some(kubeconfig) = kubeconfig {
            global.extend(["--kubeconfig".to_string(), kubeconfig.display().to_string()]);
        }
        Ok(Self::with_binary(kubectl, global, dry_run))
    }

    pub fn with_binary(kubectl: impl Into<PathBuf>, global: Vec<String>, dry_run: bool) -> Self {
        Self {
            kubectl: kubectl.into(),
            global,
            dry_run,
            settle: DEFAULT_SETTLE,
        }
    }

    /// How long to wait after starting a port-forward
    #[cfg(test)]
    pub fn port_forward_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    fn args<I, S>(&self, rest: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.global
            .iter()
            .cloned()
            .chain(rest.into_iter().map(Into::into))
            .collect()
    }

    /// `kubectl apply -f -` with `stream` on stdin
    fn apply_stream(&self, stream: &str) -> Result<String> {
        let mut args = self.args(["apply", "-f", "-"]);
        if self.dry_run {
            args.push("--dry-run=server".to_string());
        }
        run_with_input(&self.kubectl, &args, stream.as_bytes())
    }

    fn read_store(&self, store: &Store) -> Result<Vec<KindNamespaceName>> {
        let args = self.args([
            "get",
            "configmap",
            store.name.as_str(),
            "-n",
            store.namespace.as_str(),
            "-o",
            "json",
            "--ignore-not-found",
        ]);
        let out = run_capture(&self.kubectl, &args)?;
        parse_store(&out)
    }

    fn port_forward(&self, flags: &str) -> Result<PortForward> {
        let args = self.args(["port-forward".to_string()].into_iter().chain(split_flags(flags)?));
        let mut child = spawn_quiet(&self.kubectl, &args)?;
        thread::sleep(self.settle);
        if let Some(status) = child.try_wait()? {
            anyhow::bail!("port-forward {flags} exited early ({status})");
        }
        log::debug!("port-forward {flags}: running as pid {}", child.id());
        Ok(PortForward { child })
    }
}

/// Background `kubectl port-forward`, stopped when dropped
struct PortForward {
    child: Child,
}

impl Drop for PortForward {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            log::debug!("port-forward: kill: {e}");
        }
        if let Err(e) = self.child.wait() {
            log::debug!("port-forward: wait: {e}");
        }
    }
}

impl Executor for Kubectl {
    fn wait(&mut self, id: usize, flags: &str) -> Result<()> {
        let args = self.args(["wait".to_string()].into_iter().chain(split_flags(flags)?));
        if self.dry_run {
            log::info!("step {id}: dry-run, not waiting: {flags}");
            return Ok(());
        }
        let out = run_capture(&self.kubectl, &args)?;
        log_output(id, &out);
        Ok(())
    }

    fn apply(
        &mut self,
        id: usize,
        name: &str,
        labels: &Labels,
        doc: &[u8],
    ) -> Result<Vec<KindNamespaceName>> {
        let mut objects = manifest::split(doc).with_context(|| format!("parse {name}"))?;
        if objects.is_empty() {
            log::info!("step {id}: {name} has no objects");
            return Ok(Vec::new());
        }
        for object in &mut objects {
            manifest::add_labels(object, labels);
        }
        let deployed = manifest::identities(&objects)?;

        let out = self.apply_stream(&manifest::join(&objects)?)?;
        log_output(id, &out);
        Ok(deployed)
    }

    fn action(
        &mut self,
        id: usize,
        name: &str,
        doc: &[u8],
        port_forward: &str,
        passed: &mut Values,
    ) -> Result<()> {
        let action = Action::parse(name, doc)?;
        if action.kind != ACTION_KUBECTL {
            anyhow::bail!(
                "action {name}: type must be {ACTION_KUBECTL}, got: {:?}",
                action.kind
            );
        }
        if self.dry_run {
            log::info!(
                "step {id}: dry-run, not running: kubectl {}",
                shell_words::join(&action.args)
            );
            action.pass(passed, format!("<dry-run: step {id} {name}>"));
            return Ok(());
        }

        let _forward = if port_forward.trim().is_empty() {
            None
        } else {
            Some(self.port_forward(port_forward)?)
        };

        let out = run_capture(&self.kubectl, &self.args(action.args.iter().cloned()))?;
        if action.pass_value.is_empty() {
            log_output(id, &out);
        } else {
            log::debug!("step {id}: passing {} bytes as {}", out.len(), action.pass_value);
            action.pass(passed, out.trim_end());
        }
        Ok(())
    }

    fn prune(&mut self, id: usize, deployed: &[KindNamespaceName], store: &Store) -> Result<()> {
        let previous = self
            .read_store(store)
            .with_context(|| format!("read store {}/{}", store.namespace, store.name))?;

        for resource in stale(&previous, deployed) {
            let args = self.args(delete_args(&resource));
            if self.dry_run {
                log::info!("step {id}: dry-run, would delete {resource}");
                continue;
            }
            log::info!("step {id}: deleting {resource}");
            run_capture(&self.kubectl, &args)?;
        }

        let out = self.apply_stream(&store_manifest(store, deployed)?)?;
        log_output(id, &out);
        Ok(())
    }
}

fn split_flags(flags: &str) -> Result<Vec<String>> {
    shell_words::split(flags).with_context(|| format!("invalid flags: {flags}"))
}

fn log_output(id: usize, out: &str) {
    for line in out.lines().filter(|l| !l.trim().is_empty()) {
        log::info!("step {id}: {line}");
    }
}

/// Resources in `previous` that are not in `current`, in `previous` order
fn stale(previous: &[KindNamespaceName], current: &[KindNamespaceName]) -> Vec<KindNamespaceName> {
    let keep: BTreeSet<&KindNamespaceName> = current.iter().collect();
    previous
        .iter()
        .filter(|r| !keep.contains(r))
        .cloned()
        .collect()
}

fn delete_args(resource: &KindNamespaceName) -> Vec<String> {
    let mut args = vec![
        "delete".to_string(),
        resource.kind.clone(),
        resource.name.clone(),
    ];
    if !resource.namespace.is_empty() {
        args.extend(["-n".to_string(), resource.namespace.clone()]);
    }
    args.push("--ignore-not-found".to_string());
    args
}

/// Deployed list from `kubectl get configmap -o json`; empty output means
/// the store does not exist yet
fn parse_store(json: &str) -> Result<Vec<KindNamespaceName>> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    let configmap: serde_json::Value = serde_json::from_str(json).context("parse store")?;
    match configmap["data"][STORE_KEY].as_str() {
        Some(list) => serde_json::from_str(list).context("parse deployed list"),
        None => Ok(Vec::new()),
    }
}

fn store_manifest(store: &Store, deployed: &[KindNamespaceName]) -> Result<String> {
    let configmap = serde_json::json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {
            "name": store.name,
            "namespace": store.namespace,
        },
        "data": {
            STORE_KEY: serde_json::to_string(deployed)?,
        },
    });
    Ok(serde_json::to_string_pretty(&configmap)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_yaml::Value;

    fn knsn(kind: &str, namespace: &str, name: &str) -> KindNamespaceName {
        KindNamespaceName::new(kind, namespace, name)
    }

    #[test]
    fn test_stale() {
        let previous = vec![
            knsn("Namespace", "", "old"),
            knsn("Deployment", "web", "api"),
            knsn("Service", "web", "gone"),
        ];
        let current = vec![knsn("Deployment", "web", "api")];
        assert_eq!(
            stale(&previous, &current),
            vec![knsn("Namespace", "", "old"), knsn("Service", "web", "gone")]
        );
        assert!(stale(&[], &current).is_empty());
    }

    #[test]
    fn test_delete_args() {
        assert_eq!(
            delete_args(&knsn("Service", "web", "gone")),
            vec!["delete", "Service", "gone", "-n", "web", "--ignore-not-found"]
        );
        assert_eq!(
            delete_args(&knsn("Namespace", "", "old")),
            vec!["delete", "Namespace", "old", "--ignore-not-found"]
        );
    }

    #[test]
    fn test_store_roundtrip() {
        let store = Store {
            name: "deployed".into(),
            namespace: "kube-system".into(),
        };
        let deployed = vec![knsn("Deployment", "web", "api")];
        let manifest = store_manifest(&store, &deployed).unwrap();
        assert!(manifest.contains("\"kind\": \"ConfigMap\""));
        assert_eq!(parse_store(&manifest).unwrap(), deployed);
    }

    #[test]
    fn test_parse_store_missing() {
        assert!(parse_store("").unwrap().is_empty());
        assert!(parse_store(r#"{"kind": "ConfigMap", "data": {}}"#).unwrap().is_empty());
        assert!(parse_store("{not json").is_err());
    }

    #[cfg(unix)]
    mod fake_kubectl {
        use super::*;
        use std::fs;
        use tempfile::TempDir;

        /// Executor running a script that logs its arguments and stdin and
        /// prints `out-<first arg>`. `get configmap` prints `store.json` from
        /// the same directory, if any.
        fn fake(dir: &TempDir, global: &[&str], dry_run: bool) -> Kubectl {
            let script = dir.path().join("kubectl.sh");
            fs::write(
                &script,
                format!(
                    "cd '{}'\necho \"$*\" >> calls\ncat >> calls\n\
                     if [ \"$2\" = configmap ]; then cat store.json 2>/dev/null || true; \
                     else echo \"out-$1\"; fi\n",
                    dir.path().display()
                ),
            )
            .unwrap();
            let mut args = vec![script.display().to_string()];
            args.extend(global.iter().map(ToString::to_string));
            Kubectl::with_binary("sh", args, dry_run).port_forward_settle(Duration::from_millis(10))
        }

        fn calls(dir: &TempDir) -> String {
            fs::read_to_string(dir.path().join("calls")).unwrap_or_default()
        }

        #[test]
        fn test_apply_pipes_labelled_objects() {
            let dir = TempDir::new().unwrap();
            let mut kubectl = fake(&dir, &["--context", "dev"], false);
            let labels = Labels::from([("team".to_string(), "web".to_string())]);

            let deployed = kubectl
                .apply(1, "ns.yaml", &labels, b"kind: Namespace\nmetadata:\n  name: web\n")
                .unwrap();
            assert_eq!(deployed, vec![knsn("Namespace", "", "web")]);

            let calls = calls(&dir);
            assert!(calls.starts_with("--context dev apply -f -\n"), "{calls}");
            assert!(calls.contains("team: web"), "{calls}");
        }

        #[test]
        fn test_wait_splits_flags() {
            let dir = TempDir::new().unwrap();
            let mut kubectl = fake(&dir, &[], false);
            kubectl
                .wait(2, "--for 'condition=Available' deploy/api --timeout 60s")
                .unwrap();
            assert_eq!(
                calls(&dir),
                "wait --for condition=Available deploy/api --timeout 60s\n"
            );
        }

        #[test]
        fn test_action_passes_value() {
            let dir = TempDir::new().unwrap();
            let mut kubectl = fake(&dir, &[], false);
            let mut passed = Values::new();

            kubectl
                .action(
                    3,
                    "token.yaml",
                    b"type: kubectl\nargs: [get, secret, token]\npassValue: vault.token\n",
                    "",
                    &mut passed,
                )
                .unwrap();
            assert_eq!(
                passed.lookup("vault.token").and_then(Value::as_str),
                Some("out-get")
            );
        }

        #[test]
        fn test_action_rejects_other_types() {
            let dir = TempDir::new().unwrap();
            let mut kubectl = fake(&dir, &[], false);
            let err = kubectl
                .action(3, "x.yaml", b"type: helm\nargs: [list]\n", "", &mut Values::new())
                .unwrap_err();
            assert!(err.to_string().contains("helm"));
            assert!(calls(&dir).is_empty());
        }

        #[test]
        fn test_dry_run_action_is_not_run() {
            let dir = TempDir::new().unwrap();
            let mut kubectl = fake(&dir, &[], true);
            let mut passed = Values::new();

            kubectl
                .action(
                    1,
                    "cleanup.yaml",
                    b"type: kubectl\nargs: [delete, namespace, prod]\npassValue: result\n",
                    "svc/vault 8200",
                    &mut passed,
                )
                .unwrap();

            assert!(calls(&dir).is_empty(), "{}", calls(&dir));
            assert_eq!(
                passed.lookup("result").and_then(Value::as_str),
                Some("<dry-run: step 1 cleanup.yaml>")
            );
        }

        fn previous_store(dir: &TempDir) -> Store {
            let store = Store {
                name: "deployed".into(),
                namespace: "kube-system".into(),
            };
            let previous = vec![knsn("Deployment", "web", "api"), knsn("Service", "web", "gone")];
            fs::write(
                dir.path().join("store.json"),
                store_manifest(&store, &previous).unwrap(),
            )
            .unwrap();
            store
        }

        #[test]
        fn test_prune_deletes_stale_and_saves() {
            let dir = TempDir::new().unwrap();
            let store = previous_store(&dir);
            let mut kubectl = fake(&dir, &[], false);

            kubectl
                .prune(4, &[knsn("Deployment", "web", "api")], &store)
                .unwrap();

            let calls = calls(&dir);
            let lines: Vec<&str> = calls.lines().collect();
            assert_eq!(
                lines[0],
                "get configmap deployed -n kube-system -o json --ignore-not-found"
            );
            assert_eq!(lines[1], "delete Service gone -n web --ignore-not-found");
            assert_eq!(lines[2], "apply -f -");
            assert!(!calls.contains("delete Deployment"));
        }

        #[test]
        fn test_dry_run_prune_deletes_nothing() {
            let dir = TempDir::new().unwrap();
            let store = previous_store(&dir);
            let mut kubectl = fake(&dir, &[], true);

            kubectl.prune(4, &[], &store).unwrap();

            let calls = calls(&dir);
            assert!(!calls.contains("delete"), "{calls}");
            assert!(calls.contains("apply -f - --dry-run=server"), "{calls}");
        }
    }
}
