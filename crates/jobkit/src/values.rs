//! Layered value sets
//!
//! A [`Values`] is an ordered mapping from string keys to arbitrary (possibly
//! nested) YAML values. Value sets from different scopes are combined with a
//! right-biased deep merge: later sets win, nested mappings merge recursively,
//! everything else is replaced wholesale.

use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::{Mapping, Value};

/// Ordered key-value set used for defaults, step values, globals and passed values
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Values(Mapping);

// A document that holds `defaults:` with no body deserializes to null.
impl<'de> Deserialize<'de> for Values {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self(
            Option::<Mapping>::deserialize(deserializer)?.unwrap_or_default(),
        ))
    }
}

impl From<Mapping> for Values {
    fn from(mapping: Mapping) -> Self {
        Self(mapping)
    }
}

impl Values {
    /// Create an empty value set
    pub fn new() -> Self {
        Self(Mapping::new())
    }

    /// Parse a YAML document into a value set
    ///
    /// Empty input (or a document that is just `null`) yields an empty set.
    /// Any other non-mapping document is an error.
    pub fn from_yaml(bytes: &[u8]) -> Result<Self, serde_yaml::Error> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::new());
        }
        serde_yaml::from_slice(bytes)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Top-level lookup by key
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Insert or replace a top-level key
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(Value::String(key.into()), value)
    }

    /// Top-level keys that are strings, in document order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().filter_map(Value::as_str)
    }

    pub fn as_mapping(&self) -> &Mapping {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Mapping(self.0)
    }

    /// Resolve a dotted path such as `app.image.tag`
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.0.get(parts.next()?)?;
        for part in parts {
            current = current.as_mapping()?.get(part)?;
        }
        Some(current)
    }

    /// Set a value at a dotted path, creating intermediate mappings
    ///
    /// Intermediate values that are not mappings are replaced.
    pub fn set_path(&mut self, path: &str, value: Value) {
        let mut parts: Vec<&str> = path.split('.').collect();
        let Some(last) = parts.pop() else {
            return;
        };

        let mut current = &mut self.0;
        for part in parts {
            let key = Value::String(part.to_string());
            let slot = current
                .entry(key)
                .or_insert_with(|| Value::Mapping(Mapping::new()));
            if !slot.is_mapping() {
                *slot = Value::Mapping(Mapping::new());
            }
            let Some(next) = slot.as_mapping_mut() else {
                return;
            };
            current = next;
        }
        current.insert(Value::String(last.to_string()), value);
    }

    /// Deep-merge `overlay` into this set, overlay winning on conflicts
    pub fn merge_from(&mut self, overlay: &Values) {
        merge_mapping(&mut self.0, &overlay.0);
    }
}

/// Deep-merge a left-to-right chain of value sets
///
/// Later sets win on key conflicts. Inputs are never mutated, so the same
/// base can be reused for every step.
pub fn merge<'a>(sets: impl IntoIterator<Item = &'a Values>) -> Values {
    let mut out = Values::new();
    for set in sets {
        out.merge_from(set);
    }
    out
}

fn merge_mapping(base: &mut Mapping, overlay: &Mapping) {
    for (key, value) in overlay {
        match (base.get_mut(key), value) {
            (Some(Value::Mapping(existing)), Value::Mapping(incoming)) => {
                merge_mapping(existing, incoming);
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vals(yaml: &str) -> Values {
        Values::from_yaml(yaml.as_bytes()).unwrap()
    }

    #[test]
    fn test_step_precedence() {
        let defaults = vals("x: 1");
        let step = vals("{x: 2, y: 3}");
        let file = vals("x: 4");
        let overrides = vals("y: 5");

        let global = merge([&file, &overrides]);
        let effective = merge([&defaults, &step, &global]);

        assert_eq!(effective, vals("{x: 4, y: 5}"));
    }

    #[test]
    fn test_merge_chaining() {
        let a = vals("{a: 1, n: {x: 1, y: 1}}");
        let b1 = vals("{a: 2, n: {y: 2}, b: 2}");
        let b2 = vals("{n: {x: 3}, c: [1, 2]}");

        let chained = merge([&a, &b1, &b2]);
        let stepwise = merge([&merge([&a, &b1]), &b2]);

        assert_eq!(chained, stepwise);
        assert_eq!(chained, vals("{a: 2, n: {x: 3, y: 2}, b: 2, c: [1, 2]}"));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let a = vals("{a: 1, n: {x: [1, 2], y: {z: true}}}");
        assert_eq!(merge([&a, &a]), a);
    }

    #[test]
    fn test_merge_does_not_touch_inputs() {
        let base = vals("n: {x: 1}");
        let overlay = vals("n: {y: 2}");
        let _ = merge([&base, &overlay]);

        assert_eq!(base, vals("n: {x: 1}"));
        assert_eq!(overlay, vals("n: {y: 2}"));
    }

    #[test]
    fn test_non_mapping_overlay_replaces() {
        let base = vals("n: {x: 1}");
        let overlay = vals("n: plain");
        assert_eq!(merge([&base, &overlay]), vals("n: plain"));

        let base = vals("n: [1, 2]");
        let overlay = vals("n: {x: 1}");
        assert_eq!(merge([&base, &overlay]), vals("n: {x: 1}"));
    }

    #[test]
    fn test_from_yaml_empty_and_null() {
        assert!(Values::from_yaml(b"").unwrap().is_empty());
        assert!(Values::from_yaml(b"  \n").unwrap().is_empty());
        assert!(Values::from_yaml(b"~").unwrap().is_empty());
        assert!(Values::from_yaml(b"- a\n- b\n").is_err());
    }

    #[test]
    fn test_lookup() {
        let v = vals("app: {image: {tag: v1}}");
        assert_eq!(v.lookup("app.image.tag"), Some(&Value::from("v1")));
        assert!(v.lookup("app.image.missing").is_none());
        assert!(v.lookup("app.image.tag.deeper").is_none());
    }

    #[test]
    fn test_set_path() {
        let mut v = vals("a: {b: 1, keep: true}");
        v.set_path("a.c.d", Value::from("x"));
        v.set_path("a.b.e", Value::from(2));
        v.set_path("top", Value::from(false));

        assert_eq!(
            v,
            vals("{a: {b: {e: 2}, keep: true, c: {d: x}}, top: false}")
        );
    }
}
