//! Environment handling.
//!
//! The process environment is captured once into an [`Environment`] value and
//! layered with the `dockerized.env` override files. Every later stage reads
//! from that value instead of the real process environment.

pub mod dotenv;
pub mod layers;
pub mod template;

use std::collections::BTreeMap;

/// Immutable set of environment variables threaded through the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current process environment.
    pub fn from_process() -> Self {
        std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    /// Returns a copy with `key` set, replacing any previous value.
    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Returns a copy with `key` set only if it is not present yet.
    pub fn with_default(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.entry(key.into()).or_insert_with(|| value.into());
        self
    }

    /// Adds every entry of `other` whose key is not present yet.
    pub fn extended_with(mut self, other: BTreeMap<String, String>) -> Self {
        for (key, value) in other {
            self.vars.entry(key).or_insert(value);
        }
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Environment {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_default_keeps_existing_value() {
        let env = Environment::new()
            .with_var("GO_VERSION", "1.18")
            .with_default("GO_VERSION", "1.17")
            .with_default("NODE_VERSION", "18");

        assert_eq!(env.get("GO_VERSION"), Some("1.18"));
        assert_eq!(env.get("NODE_VERSION"), Some("18"));
    }

    #[test]
    fn test_extended_with_is_additive_only() {
        let env: Environment = [("HOME", "/home/me")].into_iter().collect();
        let mut extra = BTreeMap::new();
        extra.insert("HOME".to_string(), "/elsewhere".to_string());
        extra.insert("COMPOSE_FILE".to_string(), "a.yml".to_string());

        let env = env.extended_with(extra);
        assert_eq!(env.get("HOME"), Some("/home/me"));
        assert_eq!(env.get("COMPOSE_FILE"), Some("a.yml"));
        assert_eq!(env.len(), 2);
    }

    #[test]
    fn test_with_var_replaces() {
        let env = Environment::new().with_var("A", "1").with_var("A", "2");
        assert_eq!(env.get("A"), Some("2"));
        assert!(env.contains("A"));
        assert!(!env.contains("B"));
    }
}
