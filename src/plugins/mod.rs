//! Plugin Registry (spec component L): swap-in native providers for
//! distance functions, codecs, and indices, activated once at init and
//! never allowed to take the core down if they misbehave.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::warn;

/// Well-known registration keys a plugin may claim. `storage:<name>` is a
/// family, not a single key, so it's represented as an owned string instead
/// of a variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PluginSlot {
    Distance,
    Msgpack,
    Roaring,
    Hnsw,
    MetadataIndex,
    Storage(String),
}

impl PluginSlot {
    pub fn key(&self) -> String {
        match self {
            PluginSlot::Distance => "distance".to_string(),
            PluginSlot::Msgpack => "msgpack".to_string(),
            PluginSlot::Roaring => "roaring".to_string(),
            PluginSlot::Hnsw => "hnsw".to_string(),
            PluginSlot::MetadataIndex => "metadataIndex".to_string(),
            PluginSlot::Storage(name) => format!("storage:{name}"),
        }
    }
}

/// Context handed to a plugin's `activate` hook. Deliberately minimal: a
/// plugin discovers what it needs to wire in through its own closures at
/// registration time, not by reaching back into the core.
pub struct PluginContext<'a> {
    pub slots_in_use: &'a [String],
}

/// A provider the core may fall back away from without failing the caller.
pub trait Plugin: Send + Sync {
    fn slot(&self) -> PluginSlot;
    /// Returning `false` (or panicking, which is caught) is non-fatal: the
    /// core logs a warning and keeps its built-in implementation.
    fn activate(&self, ctx: &PluginContext<'_>) -> bool;
    fn deactivate(&self) {}
}

#[derive(Default)]
pub struct PluginRegistry {
    plugins: Mutex<HashMap<String, Box<dyn Plugin>>>,
    active: Mutex<Vec<String>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin under its slot key. A slot already claimed is
    /// replaced (last registration wins) but never activated twice per call
    /// to [`PluginRegistry::activate_all`].
    pub fn register(&self, plugin: Box<dyn Plugin>) {
        let key = plugin.slot().key();
        self.plugins.lock().unwrap().insert(key, plugin);
    }

    /// Activate every registered plugin. A single plugin's failure (a
    /// `false` return or an unwinding panic) never aborts the rest; it's
    /// logged and the slot silently falls back to the builtin.
    pub fn activate_all(&self) -> Vec<String> {
        let plugins = self.plugins.lock().unwrap();
        let mut active = self.active.lock().unwrap();
        let mut newly_active = Vec::new();
        for (key, plugin) in plugins.iter() {
            if active.contains(key) {
                continue;
            }
            let ctx = PluginContext { slots_in_use: &active };
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| plugin.activate(&ctx)));
            match outcome {
                Ok(true) => {
                    active.push(key.clone());
                    newly_active.push(key.clone());
                }
                Ok(false) => warn!(slot = %key, "plugin declined activation, using builtin"),
                Err(_) => warn!(slot = %key, "plugin panicked during activation, using builtin"),
            }
        }
        newly_active
    }

    pub fn get_active_plugins(&self) -> Vec<String> {
        self.active.lock().unwrap().clone()
    }

    pub fn deactivate_all(&self) {
        let plugins = self.plugins.lock().unwrap();
        let mut active = self.active.lock().unwrap();
        for key in active.drain(..) {
            if let Some(plugin) = plugins.get(&key) {
                plugin.deactivate();
            }
        }
    }

    pub fn is_active(&self, slot: &PluginSlot) -> bool {
        self.active.lock().unwrap().contains(&slot.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingPlugin {
        slot: PluginSlot,
        succeeds: bool,
        activations: Arc<AtomicUsize>,
    }

    impl Plugin for CountingPlugin {
        fn slot(&self) -> PluginSlot {
            self.slot.clone()
        }
        fn activate(&self, _ctx: &PluginContext<'_>) -> bool {
            self.activations.fetch_add(1, Ordering::SeqCst);
            self.succeeds
        }
    }

    #[test]
    fn same_plugin_never_activates_twice() {
        let registry = PluginRegistry::new();
        let activations = Arc::new(AtomicUsize::new(0));
        registry.register(Box::new(CountingPlugin { slot: PluginSlot::Distance, succeeds: true, activations: activations.clone() }));
        registry.activate_all();
        registry.activate_all();
        assert_eq!(activations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_plugin_does_not_block_others() {
        let registry = PluginRegistry::new();
        let activations = Arc::new(AtomicUsize::new(0));
        registry.register(Box::new(CountingPlugin { slot: PluginSlot::Distance, succeeds: false, activations: activations.clone() }));
        registry.register(Box::new(CountingPlugin { slot: PluginSlot::Hnsw, succeeds: true, activations: activations.clone() }));
        let active = registry.activate_all();
        assert_eq!(active, vec!["hnsw".to_string()]);
        assert!(!registry.is_active(&PluginSlot::Distance));
        assert!(registry.is_active(&PluginSlot::Hnsw));
    }

    #[test]
    fn panicking_plugin_is_non_fatal() {
        struct PanicsPlugin;
        impl Plugin for PanicsPlugin {
            fn slot(&self) -> PluginSlot {
                PluginSlot::Roaring
            }
            fn activate(&self, _ctx: &PluginContext<'_>) -> bool {
                panic!("boom")
            }
        }
        let registry = PluginRegistry::new();
        registry.register(Box::new(PanicsPlugin));
        let active = registry.activate_all();
        assert!(active.is_empty());
    }

    #[test]
    fn storage_slot_keys_are_namespaced() {
        assert_eq!(PluginSlot::Storage("s3".into()).key(), "storage:s3");
    }
}
