//! Run configuration: `--set` overrides, environment and paths

use anyhow::{Context, Result};
use jobkit::Values;
use serde_yaml::Value;
use std::borrow::Cow;
use std::path::{Path, PathBuf};

/// Expand `~` and environment variables in a path given on the command line
///
/// Unknown variables are left as written.
pub fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    let expanded = shellexpand::full(&raw).unwrap_or(Cow::Borrowed(raw.as_ref()));
    PathBuf::from(expanded.as_ref())
}

/// Parse one `KEY=VALUE` override
///
/// The value is read as a YAML scalar, so `true` and `3` keep their type.
/// Anything that is not a scalar stays a string.
pub fn parse_set(arg: &str) -> Result<(String, Value)> {
    let (key, raw) = arg
        .split_once('=')
        .with_context(|| format!("--set {arg}: expected KEY=VALUE"))?;
    let key = key.trim();
    if key.is_empty() || key.split('.').any(str::is_empty) {
        anyhow::bail!("--set {arg}: invalid key");
    }

    let value = match serde_yaml::from_str::<Value>(raw) {
        Ok(v @ (Value::Bool(_) | Value::Number(_) | Value::String(_))) => v,
        _ => Value::String(raw.to_string()),
    };
    Ok((key.to_string(), value))
}

/// Values from repeated `--set` flags; later flags win
pub fn overrides(sets: &[String]) -> Result<Values> {
    let mut values = Values::new();
    for arg in sets {
        let (key, value) = parse_set(arg)?;
        values.set_path(&key, value);
    }
    Ok(values)
}

/// Process environment as `(name, value)` pairs, skipping non UTF-8 entries
pub fn environ() -> Vec<(String, String)> {
    std::env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
        .collect()
}
