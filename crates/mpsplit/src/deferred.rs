//! Deferred ownership discovery
//!
//! While a tree is walked, some files turn out to belong to another bundle:
//! a `require.async` into a different sub-package, or shared main-package code
//! reached from a sub-package. Those facts are queued here and merged into the
//! owning tree only after every tree has finished its walk, so no tree is
//! mutated while another one is still being built.

use std::{collections::VecDeque, path::PathBuf};

/// One queued ownership fact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredItem {
    /// Root of the owning bundle; empty for the main bundle
    pub owner_key: String,
    pub file: PathBuf,
}

/// FIFO of ownership facts for a single run
#[derive(Debug, Default)]
pub struct DeferredQueue {
    items: VecDeque<DeferredItem>,
}

impl DeferredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, owner_key: impl Into<String>, file: PathBuf) {
        self.items.push_back(DeferredItem {
            owner_key: owner_key.into(),
            file,
        });
    }

    /// Next item in discovery order, `None` once drained
    pub fn pop_next(&mut self) -> Option<DeferredItem> {
        self.items.pop_front()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
