//! The shared key/value store steps exchange data through.
//!
//! A [`Namespace`] is append-only: once a key holds a value, later writes to
//! it are refused. Values written during a level are staged in a
//! [`LevelWrites`] buffer and only merged when the level finishes, so sibling
//! steps never see each other's output.

use serde::{Deserialize, Serialize};
use tracing::warn;

use entraflow_config::InputBinding;

use crate::value::{Value, ValueMap};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace {
    values: ValueMap,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn as_map(&self) -> &ValueMap {
        &self.values
    }

    /// Write a value under a new key.
    ///
    /// Returns `false` and leaves the existing value untouched if the key is taken.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> bool {
        let key = key.into();
        if self.values.contains_key(&key) {
            return false;
        }
        self.values.insert(key, value);
        true
    }

    /// Collect the values for a step's declared inputs.
    ///
    /// In lenient mode absent keys are left out. In strict mode any absent
    /// key makes the whole binding fail with the list of missing keys.
    pub fn bind(&self, keys: &[String], binding: InputBinding) -> Result<ValueMap, Vec<String>> {
        let mut bound = ValueMap::new();
        let mut missing = Vec::new();

        for key in keys {
            if bound.contains_key(key) || missing.contains(key) {
                continue;
            }
            match self.values.get(key) {
                Some(value) => {
                    bound.insert(key.clone(), value.clone());
                }
                None => missing.push(key.clone()),
            }
        }

        if !missing.is_empty() && binding == InputBinding::Strict {
            return Err(missing);
        }
        Ok(bound)
    }

    /// Merge a level's staged writes. Conflicting keys keep their old value.
    pub fn merge(&mut self, writes: LevelWrites) -> Vec<String> {
        let mut rejected = Vec::new();
        for (agent, key, value) in writes.entries {
            if !self.insert(key.clone(), value) {
                warn!(
                    "Namespace key '{}' already set; ignoring write from {}",
                    key, agent
                );
                rejected.push(key);
            }
        }
        rejected
    }
}

impl From<ValueMap> for Namespace {
    fn from(values: ValueMap) -> Self {
        Self { values }
    }
}

/// Writes produced by the steps of one level, in step order.
#[derive(Debug, Default)]
pub struct LevelWrites {
    entries: Vec<(String, String, Value)>,
}

impl LevelWrites {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage `value` under every key for `agent`.
    pub fn stage(&mut self, agent: &str, keys: &[String], value: &Value) {
        for key in keys {
            self.entries
                .push((agent.to_string(), key.clone(), value.clone()));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> Namespace {
        let mut ns = Namespace::new();
        ns.insert("location", Value::from("Berlin"));
        ns.insert("raw_data", Value::from(1));
        ns
    }

    #[test]
    fn test_insert_is_append_only() {
        let mut ns = seeded();
        assert!(!ns.insert("location", Value::from("Paris")));
        assert_eq!(ns.get("location"), Some(&Value::from("Berlin")));
        assert!(ns.insert("new_key", Value::Null));
        assert_eq!(ns.len(), 3);
    }

    #[test]
    fn test_lenient_bind_omits_missing() {
        let ns = seeded();
        let keys = vec!["location".to_string(), "analysis".to_string()];
        let bound = ns.bind(&keys, InputBinding::Lenient).unwrap();
        assert_eq!(bound.len(), 1);
        assert!(bound.contains_key("location"));
    }

    #[test]
    fn test_strict_bind_reports_missing() {
        let ns = seeded();
        let keys = vec![
            "location".to_string(),
            "analysis".to_string(),
            "decisions".to_string(),
        ];
        let missing = ns.bind(&keys, InputBinding::Strict).unwrap_err();
        assert_eq!(missing, vec!["analysis", "decisions"]);
    }

    #[test]
    fn test_bind_repeated_keys_once() {
        let ns = seeded();
        let keys = vec![
            "location".to_string(),
            "location".to_string(),
            "analysis".to_string(),
            "analysis".to_string(),
        ];
        let bound = ns.bind(&keys, InputBinding::Lenient).unwrap();
        assert_eq!(bound.len(), 1);
        let missing = ns.bind(&keys, InputBinding::Strict).unwrap_err();
        assert_eq!(missing, vec!["analysis"]);
    }

    #[test]
    fn test_merge_applies_in_order_and_rejects_conflicts() {
        let mut ns = seeded();
        let mut writes = LevelWrites::new();
        writes.stage("Analyzer", &["analysis".to_string()], &Value::from(0.5));
        writes.stage("Other", &["analysis".to_string()], &Value::from(0.9));
        writes.stage("Other", &["location".to_string()], &Value::from("Rome"));

        let rejected = ns.merge(writes);
        assert_eq!(rejected, vec!["analysis", "location"]);
        assert_eq!(ns.get("analysis"), Some(&Value::from(0.5)));
        assert_eq!(ns.get("location"), Some(&Value::from("Berlin")));
    }

    #[test]
    fn test_serializes_as_plain_map() {
        let ns = seeded();
        let json = serde_json::to_value(&ns).unwrap();
        assert!(json.get("location").is_some());
        let back: Namespace = serde_json::from_value(json).unwrap();
        assert_eq!(back, ns);
    }
}
