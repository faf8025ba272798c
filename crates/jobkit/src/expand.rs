//! Template expansion contract
//!
//! How a template body is parsed and executed is up to the [`Expander`].
//! The orchestrator hands it the value set, the passed values and a
//! function table, and gets the expanded bytes back. The only function the
//! orchestrator contributes is `vault`.

use crate::vault::Vault;
use crate::values::Values;
use std::collections::BTreeMap;
use std::path::Path;

/// Name under which the vault lookup is exposed to templates
pub const VAULT_FN: &str = "vault";

/// A function callable from a template
pub type TemplateFn<'a> = Box<dyn Fn(&[String]) -> anyhow::Result<String> + 'a>;

/// Named functions available during expansion
#[derive(Default)]
pub struct FuncMap<'a> {
    funcs: BTreeMap<String, TemplateFn<'a>>,
}

impl<'a> FuncMap<'a> {
    pub fn new() -> Self {
        Self {
            funcs: BTreeMap::new(),
        }
    }

    /// Table with the functions owned by the orchestrator
    pub fn with_vault(vault: &'a Vault) -> Self {
        let mut funcs = Self::new();
        funcs.insert(VAULT_FN, move |args: &[String]| -> anyhow::Result<String> {
            match args {
                [key] => Ok(vault.get(key, "")),
                [key, field] => Ok(vault.get(key, field)),
                _ => anyhow::bail!("{VAULT_FN}: expected 1 or 2 arguments, got {}", args.len()),
            }
        });
        funcs
    }

    pub fn insert<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&[String]) -> anyhow::Result<String> + 'a,
    {
        self.funcs.insert(name.into(), Box::new(f));
    }

    /// Call a function by name
    pub fn call(&self, name: &str, args: &[String]) -> anyhow::Result<String> {
        match self.funcs.get(name) {
            Some(f) => f(args),
            None => anyhow::bail!("function {name:?} not defined"),
        }
    }
}

/// Everything an expander gets for one template
pub struct Expansion<'a> {
    /// Process environment as `(name, value)` pairs
    pub environ: &'a [(String, String)],
    /// Path of the template, for diagnostics
    pub path: &'a Path,
    /// Raw template body
    pub body: &'a [u8],
    /// Effective values for this template
    pub values: &'a Values,
    /// Values passed forward by earlier action steps
    pub passed: &'a Values,
    /// Function table
    pub functions: &'a FuncMap<'a>,
}

/// Expands template bodies
pub trait Expander {
    fn expand(&self, input: &Expansion<'_>) -> anyhow::Result<Vec<u8>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::FileSource;
    use std::collections::HashMap;

    #[test]
    fn test_vault_function() {
        let vault = Vault::new(Box::new(FileSource::new(HashMap::from([
            ("token".to_string(), "abc".to_string()),
            ("sp".to_string(), r#"{"id": "42"}"#.to_string()),
        ]))));
        let funcs = FuncMap::with_vault(&vault);

        assert_eq!(funcs.call("vault", &["token".into()]).unwrap(), "abc");
        assert_eq!(
            funcs.call("vault", &["sp".into(), "id".into()]).unwrap(),
            "42"
        );
        assert!(funcs.call("vault", &[]).is_err());
        assert!(vault.error().is_none());

        assert_eq!(
            funcs.call("vault", &["nope".into()]).unwrap(),
            "<not found: nope>"
        );
        assert_eq!(vault.error().unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_function() {
        let funcs = FuncMap::new();
        let err = funcs.call("vault", &[]).unwrap_err();
        assert!(err.to_string().contains("not defined"));
    }
}
