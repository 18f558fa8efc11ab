use std::sync::{Arc, Weak};

use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::trace;

use super::record::{PropertyDef, RecordType};
use crate::config::QueryConfig;

/// Default number of lookups between sweeps of dead cache entries.
pub const DEFAULT_SWEEP_INTERVAL: usize = 256;

/// Synthesizes structural record types for shapes with no known type.
///
/// Emitted types are cached by their ordered property list so repeated shapes
/// reuse the same type. The cache only holds weak references, an emitted type
/// lives as long as something (a value, a query) references it. Dead entries
/// are swept periodically.
#[derive(Debug)]
pub struct TypeEmitter {
    sweep_interval: usize,
    state: Mutex<EmitterState>,
}

#[derive(Debug, Default)]
struct EmitterState {
    cache: HashMap<Vec<PropertyDef>, Weak<RecordType>>,
    lookups_since_sweep: usize,
    emitted: u64,
}

impl Default for TypeEmitter {
    fn default() -> Self {
        Self::new(DEFAULT_SWEEP_INTERVAL)
    }
}

impl TypeEmitter {
    pub fn new(sweep_interval: usize) -> Self {
        TypeEmitter {
            sweep_interval: sweep_interval.max(1),
            state: Mutex::new(EmitterState::default()),
        }
    }

    /// Emitter sweeping every `emitter_sweep_interval` lookups.
    pub fn from_config(config: &QueryConfig) -> Self {
        Self::new(config.emitter_sweep_interval)
    }

    pub fn sweep_interval(&self) -> usize {
        self.sweep_interval
    }

    /// Get or emit a type with exactly the given properties.
    pub fn emit(&self, properties: &[PropertyDef]) -> Arc<RecordType> {
        let mut state = self.state.lock();

        state.lookups_since_sweep += 1;
        if state.lookups_since_sweep >= self.sweep_interval {
            Self::sweep_locked(&mut state);
        }

        if let Some(existing) = state.cache.get(properties).and_then(Weak::upgrade) {
            return existing;
        }

        let record = RecordType::anonymous(properties.iter().cloned());
        state
            .cache
            .insert(properties.to_vec(), Arc::downgrade(&record));
        state.emitted += 1;
        trace!(name = %record.name(), "emitted structural type");

        record
    }

    /// Remove cache entries whose type is no longer referenced.
    ///
    /// Returns the number of removed entries.
    pub fn sweep(&self) -> usize {
        let mut state = self.state.lock();
        Self::sweep_locked(&mut state)
    }

    fn sweep_locked(state: &mut EmitterState) -> usize {
        let before = state.cache.len();
        state.cache.retain(|_, ty| ty.strong_count() > 0);
        state.lookups_since_sweep = 0;
        let removed = before - state.cache.len();
        if removed > 0 {
            trace!(%removed, "swept emitted types");
        }
        removed
    }

    /// Number of cached types that are still alive.
    pub fn live_count(&self) -> usize {
        self.state
            .lock()
            .cache
            .values()
            .filter(|ty| ty.strong_count() > 0)
            .count()
    }

    /// Number of entries in the cache, including dead entries not yet swept.
    pub fn cached_count(&self) -> usize {
        self.state.lock().cache.len()
    }

    /// Total number of types emitted over the lifetime of this emitter.
    pub fn emitted_count(&self) -> u64 {
        self.state.lock().emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataType;
    use crate::values::Value;

    fn shape() -> Vec<PropertyDef> {
        vec![
            PropertyDef::new("category", DataType::Utf8),
            PropertyDef::new("amount", DataType::Float64),
        ]
    }

    #[test]
    fn same_shape_reuses_type() {
        let emitter = TypeEmitter::default();
        let a = emitter.emit(&shape());
        let b = emitter.emit(&shape());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(1, emitter.emitted_count());
    }

    #[test]
    fn order_matters() {
        let emitter = TypeEmitter::default();
        let a = emitter.emit(&shape());
        let mut reversed = shape();
        reversed.reverse();
        let b = emitter.emit(&reversed);
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn dead_types_swept() {
        let emitter = TypeEmitter::new(1000);
        let ty = emitter.emit(&shape());
        assert_eq!(1, emitter.live_count());

        drop(ty);
        assert_eq!(0, emitter.live_count());
        assert_eq!(1, emitter.cached_count());

        assert_eq!(1, emitter.sweep());
        assert_eq!(0, emitter.cached_count());
    }

    #[test]
    fn periodic_sweep() {
        let emitter = TypeEmitter::new(2);
        drop(emitter.emit(&shape()));
        // Second lookup triggers the sweep before inserting.
        let _keep = emitter.emit(&[PropertyDef::new("x", DataType::Int32)]);
        assert_eq!(1, emitter.cached_count());
    }

    #[test]
    fn configured_sweep_interval() {
        let mut config = QueryConfig::default();
        config
            .set_from_value("emitter_sweep_interval", Value::Int64(3))
            .unwrap();
        let emitter = TypeEmitter::from_config(&config);
        assert_eq!(3, emitter.sweep_interval());

        drop(emitter.emit(&shape()));
        let _a = emitter.emit(&[PropertyDef::new("a", DataType::Int32)]);
        // Dead entry survives until the third lookup.
        assert_eq!(2, emitter.cached_count());
        // Third lookup sweeps the dead entry before inserting.
        let _b = emitter.emit(&[PropertyDef::new("b", DataType::Int32)]);
        assert_eq!(2, emitter.cached_count());
        assert_eq!(2, emitter.live_count());
    }

    #[test]
    fn re_emit_after_drop() {
        let emitter = TypeEmitter::default();
        drop(emitter.emit(&shape()));
        let again = emitter.emit(&shape());
        assert_eq!(2, emitter.emitted_count());
        assert_eq!(2, again.properties().len());
    }
}
