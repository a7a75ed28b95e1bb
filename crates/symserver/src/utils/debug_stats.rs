//! Per-request debug statistics.
//!
//! A [`DebugStats`] is a tree of nested JSON objects with numeric leaves,
//! returned verbatim in the `debug` stanza of a v5 response when the client
//! sends the `Debug` header. It is request-scoped and owned by a single
//! worker, so no synchronization is needed.

use std::time::Instant;

use serde_json::{Map, Number, Value};

/// A path into the stats tree.
///
/// Dotted strings are split on `.`; slices and arrays are taken verbatim,
/// which matters for per-module keys like `libxul.so/ABC123` that contain
/// dots themselves.
pub trait StatsPath {
    fn segments(&self) -> Vec<&str>;
}

impl StatsPath for str {
    fn segments(&self) -> Vec<&str> {
        self.split('.').collect()
    }
}

impl StatsPath for [&str] {
    fn segments(&self) -> Vec<&str> {
        self.to_vec()
    }
}

impl<const N: usize> StatsPath for [&str; N] {
    fn segments(&self) -> Vec<&str> {
        self.to_vec()
    }
}

#[derive(Debug, Default)]
pub struct DebugStats {
    data: Map<String, Value>,
}

impl DebugStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes the stats and returns the tree as a JSON value.
    pub fn into_value(self) -> Value {
        Value::Object(self.data)
    }

    /// Returns the leaf or subtree at `key`, if present.
    pub fn get<K>(&self, key: &K) -> Option<&Value>
    where
        K: StatsPath + ?Sized,
    {
        let mut current = self.data.get(*key.segments().first()?)?;
        for part in &key.segments()[1..] {
            current = current.as_object()?.get(*part)?;
        }
        Some(current)
    }

    /// Sets the leaf at `key`, creating intermediate objects as needed.
    pub fn set<K, V>(&mut self, key: &K, value: V)
    where
        K: StatsPath + ?Sized,
        V: Into<Value>,
    {
        *self.leaf(&key.segments()) = value.into();
    }

    /// Adds `delta` to the integer leaf at `key`, initializing it to 0 first.
    pub fn incr<K>(&mut self, key: &K, delta: i64)
    where
        K: StatsPath + ?Sized,
    {
        let leaf = self.leaf(&key.segments());
        let current = leaf.as_i64().unwrap_or(0);
        *leaf = Value::from(current + delta);
    }

    /// Adds `secs` to the float leaf at `key`, initializing it to 0 first.
    pub fn add_time<K>(&mut self, key: &K, secs: f64)
    where
        K: StatsPath + ?Sized,
    {
        let leaf = self.leaf(&key.segments());
        let current = leaf.as_f64().unwrap_or(0.0);
        *leaf = Number::from_f64(current + secs)
            .map(Value::Number)
            .unwrap_or_else(|| Value::from(0));
    }

    /// Runs `f` and writes the elapsed wall time in seconds to `key`,
    /// regardless of how `f` exits.
    pub fn with_timer<K, F, T>(&mut self, key: &K, f: F) -> T
    where
        K: StatsPath + ?Sized,
        F: FnOnce(&mut DebugStats) -> T,
    {
        let start = Instant::now();
        let result = f(self);
        self.set(key, start.elapsed().as_secs_f64());
        result
    }

    fn leaf(&mut self, parts: &[&str]) -> &mut Value {
        debug_assert!(!parts.is_empty());
        let mut current = &mut self.data;
        for part in &parts[..parts.len() - 1] {
            let slot = current
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            current = match slot {
                Value::Object(map) => map,
                _ => unreachable!(),
            };
        }
        current
            .entry(parts[parts.len() - 1].to_string())
            .or_insert(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::DebugStats;

    #[test]
    fn test_set_and_get_dotted() {
        let mut stats = DebugStats::new();
        stats.set("cache_lookups.count", 5);
        assert_eq!(stats.get("cache_lookups.count"), Some(&json!(5)));
        assert_eq!(stats.get("cache_lookups"), Some(&json!({"count": 5})));
        assert_eq!(stats.get("cache_lookups.missing"), None);
    }

    #[test]
    fn test_array_keys_keep_dots() {
        let mut stats = DebugStats::new();
        stats.set(&["downloads", "size_per_module", "libxul.so/ABC123"], 1024);
        assert_eq!(
            stats.get(&["downloads", "size_per_module", "libxul.so/ABC123"]),
            Some(&json!(1024))
        );
        // the module key must not have been split on its dot
        assert_eq!(stats.get("downloads.size_per_module.libxul"), None);
    }

    #[test]
    fn test_incr_initializes_missing_leaf() {
        let mut stats = DebugStats::new();
        stats.incr("cache_lookups.hits", 0);
        assert_eq!(stats.get("cache_lookups.hits"), Some(&json!(0)));
        stats.incr("cache_lookups.hits", 1);
        stats.incr("cache_lookups.hits", 1);
        assert_eq!(stats.get("cache_lookups.hits"), Some(&json!(2)));
    }

    #[test]
    fn test_add_time_accumulates_floats() {
        let mut stats = DebugStats::new();
        stats.add_time("downloads.time", 0.25);
        stats.add_time("downloads.time", 0.5);
        let value = stats.get("downloads.time").and_then(|v| v.as_f64());
        assert_eq!(value, Some(0.75));
    }

    #[test]
    fn test_with_timer_writes_leaf() {
        let mut stats = DebugStats::new();
        let value = stats.with_timer("time", |stats| {
            stats.incr("work", 1);
            42
        });
        assert_eq!(value, 42);
        let elapsed = stats.get("time").and_then(|v| v.as_f64());
        assert!(elapsed.is_some());
        assert!(elapsed.unwrap() >= 0.0);
    }

    #[test]
    fn test_into_value() {
        let mut stats = DebugStats::new();
        stats.incr("modules.count", 3);
        assert_eq!(stats.into_value(), json!({"modules": {"count": 3}}));
    }
}
