//! Atomically swappable rule set.
//!
//! # Purpose
//! Holds the active [`RuleSet`] and lets operators replace it while decisions
//! are in flight.
//!
//! # Key invariants
//! - Readers get an `Arc<RuleSet>` snapshot and never see a partial update.
//! - Generations increase by one per successful load and never repeat.
//!
//! # Concurrency model
//! Reads are a lock-free `ArcSwap::load_full`. Writers serialize on a mutex so
//! generation numbers follow publish order; readers never take that lock.
use crate::rule::Rule;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::Arc;

pub const EMPTY_VERSION: &str = "empty";

/// Immutable, ordered snapshot of the rules in force.
pub struct RuleSet {
    version: String,
    generation: u64,
    rules: Vec<Arc<dyn Rule>>,
}

impl RuleSet {
    fn empty() -> Self {
        Self {
            version: EMPTY_VERSION.to_string(),
            generation: 0,
            rules: Vec::new(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn rules(&self) -> &[Arc<dyn Rule>] {
        &self.rules
    }

    pub fn rule_names(&self) -> Vec<String> {
        self.rules.iter().map(|rule| rule.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl std::fmt::Debug for RuleSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleSet")
            .field("version", &self.version)
            .field("generation", &self.generation)
            .field("rules", &self.rule_names())
            .finish()
    }
}

pub struct RuleRegistry {
    active: ArcSwap<RuleSet>,
    writer: Mutex<()>,
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleRegistry {
    /// Starts with the empty set, which denies everything.
    pub fn new() -> Self {
        Self {
            active: ArcSwap::from_pointee(RuleSet::empty()),
            writer: Mutex::new(()),
        }
    }

    /// Publish `rules` as the new active set and return it.
    pub fn load(&self, version: impl Into<String>, rules: Vec<Arc<dyn Rule>>) -> Arc<RuleSet> {
        let _writer = self.writer.lock();
        let generation = self.active.load().generation + 1;
        let next = Arc::new(RuleSet {
            version: version.into(),
            generation,
            rules,
        });
        self.active.store(next.clone());
        next
    }

    pub fn active_rules(&self) -> Arc<RuleSet> {
        self.active.load_full()
    }
}
