//! Executors: where rendered steps end up

pub mod generate;
pub mod kubectl;
pub mod manifest;

pub use generate::Generate;
pub use kubectl::Kubectl;

use anyhow::{Context, Result};
use jobkit::Values;
use serde::Deserialize;
use serde_yaml::Value;

/// Rendered action document
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Passed values key receiving the command's stdout
    #[serde(default)]
    pub pass_value: String,
}

impl Action {
    pub fn parse(name: &str, doc: &[u8]) -> Result<Self> {
        serde_yaml::from_slice(doc).with_context(|| format!("parse action {name}"))
    }

    /// Store `value` under `passValue`, if the action has one
    pub fn pass(&self, passed: &mut Values, value: impl Into<String>) {
        if !self.pass_value.is_empty() {
            passed.set_path(&self.pass_value, Value::String(value.into()));
        }
    }
}
