use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use jsonschema::Validator;
use serde_json::Value;

use crate::validate::{self, ValidationMode, ValidationReport};
use crate::SchemaError;

pub const DEFAULT_CAPACITY: usize = 100;

/// One compiled schema. Never mutated after insertion.
pub struct CachedValidator {
    pub schema_hash: String,
    /// Insertion sequence number, monotonically increasing per cache.
    pub inserted_at: u64,
    validator: Validator,
}

impl CachedValidator {
    pub fn validate(&self, instance: &Value, mode: ValidationMode) -> ValidationReport {
        validate::run(&self.validator, instance, mode)
    }
}

/// Chooses which entries to drop once the cache is over capacity.
pub trait EvictionStrategy: Send + Sync {
    /// `entries` holds `(schema_hash, inserted_at)` for every cached schema.
    fn victims(&self, entries: &[(String, u64)], capacity: usize) -> Vec<String>;
}

/// Drops the oldest half by insertion order. Access recency is not tracked.
#[derive(Clone, Copy, Debug, Default)]
pub struct OldestInsertedHalf;

impl EvictionStrategy for OldestInsertedHalf {
    fn victims(&self, entries: &[(String, u64)], capacity: usize) -> Vec<String> {
        if entries.len() <= capacity {
            return Vec::new();
        }
        let mut ordered: Vec<&(String, u64)> = entries.iter().collect();
        ordered.sort_by_key(|(_, seq)| *seq);
        ordered
            .into_iter()
            .take(entries.len() / 2)
            .map(|(hash, _)| hash.clone())
            .collect()
    }
}

pub struct Lookup {
    pub validator: Arc<CachedValidator>,
    pub cache_hit: bool,
    pub compile_ms: f64,
}

/// Process-wide compiled-schema cache.
///
/// Compilation happens outside the lock; inserts are keyed by content hash, so two callers
/// racing on the same schema converge on one entry and the loser only wastes a compile.
pub struct SchemaCache {
    capacity: usize,
    strategy: Box<dyn EvictionStrategy>,
    entries: RwLock<HashMap<String, Arc<CachedValidator>>>,
    next_seq: AtomicU64,
    compiles: AtomicU64,
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, Box::new(OldestInsertedHalf))
    }
}

impl SchemaCache {
    pub fn new(capacity: usize, strategy: Box<dyn EvictionStrategy>) -> Self {
        Self {
            capacity,
            strategy,
            entries: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            compiles: AtomicU64::new(0),
        }
    }

    pub fn get(&self, schema_hash: &str) -> Option<Arc<CachedValidator>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(schema_hash).cloned()
    }

    pub fn get_or_compile(&self, schema: &Value, schema_hash: &str) -> Result<Lookup, SchemaError> {
        if let Some(validator) = self.get(schema_hash) {
            return Ok(Lookup {
                validator,
                cache_hit: true,
                compile_ms: 0.0,
            });
        }

        let started = Instant::now();
        let compiled = validate::compile(schema)?;
        let compile_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.compiles.fetch_add(1, Ordering::Relaxed);

        let candidate = Arc::new(CachedValidator {
            schema_hash: schema_hash.to_string(),
            inserted_at: self.next_seq.fetch_add(1, Ordering::Relaxed),
            validator: compiled,
        });

        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let validator = Arc::clone(
            entries
                .entry(schema_hash.to_string())
                .or_insert(candidate),
        );
        if entries.len() > self.capacity {
            let snapshot: Vec<(String, u64)> = entries
                .iter()
                .map(|(hash, v)| (hash.clone(), v.inserted_at))
                .collect();
            let victims = self.strategy.victims(&snapshot, self.capacity);
            tracing::debug!(evicted = victims.len(), size = entries.len(), "schema cache eviction");
            for hash in victims {
                entries.remove(&hash);
            }
        }

        Ok(Lookup {
            validator,
            cache_hit: false,
            compile_ms,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, schema_hash: &str) -> bool {
        self.get(schema_hash).is_some()
    }

    /// Number of compilations performed, hits excluded.
    pub fn compile_count(&self) -> u64 {
        self.compiles.load(Ordering::Relaxed)
    }
}
