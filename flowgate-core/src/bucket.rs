//! Per-pipeline data buckets.
//!
//! A bucket is a keyed store plugins use to stash state on the pipeline
//! context. Buckets are scoped: one per plugin instance, or one shared by
//! every instance of a plugin. Instance buckets are deleted by the plugin
//! instance's cleanup hook; plugin-wide buckets live until the plugin itself
//! is removed.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::value::Value;

/// Which instances of a plugin a bucket belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BucketScope {
    /// Owned by one plugin instance, keyed by its instance id.
    Instance(String),
    /// Shared by all instances of the plugin.
    PluginWide,
}

impl BucketScope {
    /// Scope for one plugin instance.
    pub fn instance(id: impl Into<String>) -> Self {
        Self::Instance(id.into())
    }
}

/// A keyed store with reader/writer locking: concurrent readers, exclusive
/// writers.
#[derive(Default)]
pub struct DataBucket {
    entries: RwLock<HashMap<String, Value>>,
}

impl DataBucket {
    /// Create an empty bucket.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a value under a key, returning the previous value if any.
    pub fn bind(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.entries.write().insert(key.into(), value)
    }

    /// Look up a value.
    pub fn query(&self, key: &str) -> Option<Value> {
        self.entries.read().get(key).cloned()
    }

    /// Look up a value, binding one from `default_fn` if the key is absent.
    ///
    /// Atomic: the factory runs at most once across all concurrent callers,
    /// and never when the key already exists.
    pub fn query_or_bind_default(
        &self,
        key: &str,
        default_fn: impl FnOnce() -> Value,
    ) -> Value {
        if let Some(value) = self.entries.read().get(key) {
            return value.clone();
        }
        self.entries
            .write()
            .entry(key.to_string())
            .or_insert_with(default_fn)
            .clone()
    }

    /// Remove a binding, returning the removed value if any.
    pub fn unbind(&self, key: &str) -> Option<Value> {
        self.entries.write().remove(key)
    }

    /// Number of bindings.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the bucket holds no bindings.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop every binding.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}
