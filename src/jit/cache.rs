use crate::expression::ResolvedFilter;
use crate::jit::codegen::{compile_filter, CodegenMode};
use crate::jit::compiled::CompiledFilter;
use crate::jit::{JitError, JitResult};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::debug;
use std::sync::{Arc, Weak};

/// Compiled routines shared between factories, keyed by the resolved tree
/// and the codegen mode.
///
/// The cache only holds weak handles: a routine's executable memory is
/// released as soon as the last factory or cursor using it is closed, and
/// the next lookup compiles it again. Failed compilations are not
/// remembered.
#[derive(Debug, Default)]
pub struct CompiledFilterCache {
    entries: DashMap<Vec<u8>, Weak<CompiledFilter>>,
}

impl CompiledFilterCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the live routine for `filter`, compiling it when none is held
    pub fn get_or_compile(
        &self,
        filter: &ResolvedFilter,
        mode: CodegenMode,
    ) -> JitResult<Arc<CompiledFilter>> {
        let key = bincode::serialize(&(filter, mode))
            .map_err(|e| JitError::Setup(format!("failed to encode cache key: {e}")))?;

        if let Some(compiled) = self.entries.get(&key).and_then(|entry| entry.upgrade()) {
            debug!("compiled filter cache hit for columns {:?}", filter.columns);
            return Ok(compiled);
        }

        // No shard lock is held while compiling; two racing misses may both
        // compile and the first one stored wins.
        let compiled = Arc::new(compile_filter(filter, mode)?);
        let shared = match self.entries.entry(key) {
            Entry::Occupied(mut entry) => match entry.get().upgrade() {
                Some(existing) => existing,
                None => {
                    entry.insert(Arc::downgrade(&compiled));
                    Arc::clone(&compiled)
                }
            },
            Entry::Vacant(entry) => {
                entry.insert(Arc::downgrade(&compiled));
                Arc::clone(&compiled)
            }
        };
        self.purge();
        Ok(shared)
    }

    /// Number of routines still alive
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.value().strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every routine; handles held elsewhere stay valid
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Drop the entries of routines that have been released
    fn purge(&self) {
        self.entries.retain(|_, routine| routine.strong_count() > 0);
    }
}
