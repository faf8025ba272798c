//! Executor that writes what would be done instead of doing it

use super::{Action, manifest};
use anyhow::{Context, Result};
use jobkit::{Executor, KindNamespaceName, Labels, StepKind, Store, Values};
use std::io::Write;

/// Writes each step as a `---` separated document stream
///
/// Every step starts with a `# <id> <kind> <name>` comment. Rendered
/// manifests are written with the prune labels added, actions are written
/// verbatim and never run. An action's `passValue` gets a placeholder so
/// later steps that read it still render.
pub struct Generate<W: Write> {
    out: W,
}

impl<W: Write> Generate<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn header(&mut self, id: usize, kind: StepKind, name: &str) -> Result<()> {
        writeln!(self.out, "# {id} {kind} {name}").context("write output")
    }
}

impl<W: Write> Executor for Generate<W> {
    fn wait(&mut self, id: usize, flags: &str) -> Result<()> {
        self.header(id, StepKind::Wait, flags)
    }

    fn apply(
        &mut self,
        id: usize,
        name: &str,
        labels: &Labels,
        doc: &[u8],
    ) -> Result<Vec<KindNamespaceName>> {
        let mut objects = manifest::split(doc).with_context(|| format!("parse {name}"))?;
        for object in &mut objects {
            manifest::add_labels(object, labels);
        }
        let deployed = manifest::identities(&objects)?;

        self.header(id, StepKind::Render, name)?;
        self.out
            .write_all(manifest::join(&objects)?.as_bytes())
            .context("write output")?;
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
        action.pass(passed, format!("<generated: step {id} {name}>"));

        self.header(id, StepKind::Action, name)?;
        if !port_forward.is_empty() {
            writeln!(self.out, "# portForward: {port_forward}")?;
        }
        self.out.write_all(b"---\n")?;
        self.out.write_all(doc)?;
        if !doc.ends_with(b"\n") {
            self.out.write_all(b"\n")?;
        }
        Ok(())
    }

    fn prune(&mut self, id: usize, deployed: &[KindNamespaceName], store: &Store) -> Result<()> {
        writeln!(
            self.out,
            "# {id} prune {}/{}: keeping {} resources",
            store.namespace,
            store.name,
            deployed.len()
        )?;
        for resource in deployed {
            writeln!(self.out, "#   {resource}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(generate: Generate<Vec<u8>>) -> String {
        String::from_utf8(generate.into_inner()).unwrap()
    }

    #[test]
    fn test_apply_writes_labelled_stream() {
        let mut generate = Generate::new(Vec::new());
        let labels = Labels::from([("team".to_string(), "web".to_string())]);
        let doc = b"kind: Namespace\nmetadata:\n  name: web\n---\nkind: Service\nmetadata:\n  name: api\n  namespace: web\n";

        let deployed = generate.apply(1, "app.yaml", &labels, doc).unwrap();
        assert_eq!(
            deployed,
            vec![
                KindNamespaceName::new("Namespace", "", "web"),
                KindNamespaceName::new("Service", "web", "api"),
            ]
        );

        let out = output(generate);
        assert!(out.starts_with("# 1 tmplt app.yaml\n---\n"), "{out}");
        assert_eq!(out.matches("team: web").count(), 2);
    }

    #[test]
    fn test_apply_rejects_invalid_manifest() {
        let mut generate = Generate::new(Vec::new());
        let err = generate
            .apply(1, "bad.yaml", &Labels::new(), b"just text")
            .unwrap_err();
        assert!(format!("{err:#}").contains("bad.yaml"));
    }

    #[test]
    fn test_action_is_written_not_run() {
        let mut generate = Generate::new(Vec::new());
        let mut passed = Values::new();
        generate
            .action(2, "token.yaml", b"type: kubectl\nargs: [get, pods]", "svc/vault 8200", &mut passed)
            .unwrap();
        assert!(passed.is_empty());
        assert_eq!(
            output(generate),
            "# 2 action token.yaml\n# portForward: svc/vault 8200\n---\ntype: kubectl\nargs: [get, pods]\n"
        );
    }

    #[test]
    fn test_action_passes_placeholder() {
        let mut generate = Generate::new(Vec::new());
        let mut passed = Values::new();
        generate
            .action(
                4,
                "token.yaml",
                b"type: kubectl\nargs: [get, secret]\npassValue: vault.token\n",
                "",
                &mut passed,
            )
            .unwrap();
        assert_eq!(
            passed.lookup("vault.token").and_then(serde_yaml::Value::as_str),
            Some("<generated: step 4 token.yaml>")
        );

        let err = generate
            .action(5, "bad.yaml", b"args: [get]\n", "", &mut passed)
            .unwrap_err();
        assert!(format!("{err:#}").contains("bad.yaml"));
    }

    #[test]
    fn test_wait_and_prune() {
        let mut generate = Generate::new(Vec::new());
        generate.wait(3, "--for condition=Ready pod/x").unwrap();
        let store = Store {
            name: "deployed".into(),
            namespace: "kube-system".into(),
        };
        generate
            .prune(4, &[KindNamespaceName::new("Namespace", "", "web")], &store)
            .unwrap();
        assert_eq!(
            output(generate),
            "# 3 wait --for condition=Ready pod/x\n# 4 prune kube-system/deployed: keeping 1 resources\n#   Namespace/web\n"
        );
    }
}
