//! Multi-document manifest handling shared by the executors

use anyhow::{Context, Result};
use jobkit::{KindNamespaceName, Labels};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};

/// Split a rendered `---` separated stream into objects
///
/// Empty documents (comments only, or nothing between separators) are
/// dropped. Every remaining document must be a mapping with a `kind`.
pub fn split(doc: &[u8]) -> Result<Vec<Value>> {
    let mut objects = Vec::new();
    for (i, de) in serde_yaml::Deserializer::from_slice(doc).enumerate() {
        let value = Value::deserialize(de).with_context(|| format!("document {}", i + 1))?;
        match value {
            Value::Null => continue,
            Value::Mapping(_) => {
                if value.get("kind").and_then(Value::as_str).is_none() {
                    anyhow::bail!("document {}: missing kind", i + 1);
                }
                objects.push(value);
            }
            _ => anyhow::bail!("document {}: expected a mapping", i + 1),
        }
    }
    Ok(objects)
}

/// Identity of an object: kind, metadata.namespace and metadata.name
pub fn identity(object: &Value) -> Option<KindNamespaceName> {
    let kind = object.get("kind")?.as_str()?;
    let metadata = object.get("metadata")?;
    let name = metadata.get("name")?.as_str()?;
    let namespace = metadata
        .get("namespace")
        .and_then(Value::as_str)
        .unwrap_or_default();
    Some(KindNamespaceName::new(kind, namespace, name))
}

/// Identities of all objects, failing on an object without a name
pub fn identities(objects: &[Value]) -> Result<Vec<KindNamespaceName>> {
    objects
        .iter()
        .map(|o| {
            identity(o).with_context(|| {
                let kind = o.get("kind").and_then(Value::as_str).unwrap_or("?");
                format!("{kind} without metadata.name")
            })
        })
        .collect()
}

/// Merge `labels` into `metadata.labels`, keeping labels already present
pub fn add_labels(object: &mut Value, labels: &Labels) {
    if labels.is_empty() {
        return;
    }
    let Some(root) = object.as_mapping_mut() else {
        return;
    };
    let Some(existing) =
        mapping_entry(root, "metadata").and_then(|metadata| mapping_entry(metadata, "labels"))
    else {
        return;
    };
    for (key, value) in labels {
        let key = Value::String(key.clone());
        if !existing.contains_key(&key) {
            existing.insert(key, Value::String(value.clone()));
        }
    }
}

/// Child mapping at `key`, replacing null or scalar values
fn mapping_entry<'a>(mapping: &'a mut Mapping, key: &str) -> Option<&'a mut Mapping> {
    let slot = mapping
        .entry(Value::String(key.to_string()))
        .or_insert(Value::Null);
    if !slot.is_mapping() {
        *slot = Value::Mapping(Mapping::new());
    }
    slot.as_mapping_mut()
}

/// Serialize objects back into a `---` separated stream
pub fn join(objects: &[Value]) -> Result<String> {
    let mut out = String::new();
    for object in objects {
        out.push_str("---\n");
        out.push_str(&serde_yaml::to_string(object)?);
    }
    Ok(out)
}
