use crate::graph::SubGraphId;
use std::collections::VecDeque;
use std::sync::Arc;

/// Selected complete sub-graphs of one scene hypothesis.
///
/// Clones share the bitmap until the first mutation, so a proposal costs a
/// reference count increment until a move actually claims or releases a
/// sub-graph. The bitmap starts at `first`, the oldest sub-graph the graph
/// still stores; see [forget_before](SelectionMap::forget_before).
///
#[derive(Debug, Clone, Default)]
pub struct SelectionMap {
    first: usize,
    selected: Arc<VecDeque<bool>>,
}

impl SelectionMap {
    fn index(&self, id: SubGraphId) -> Option<usize> {
        id.0.checked_sub(self.first)
    }

    pub fn is_selected(&self, id: SubGraphId) -> bool {
        self.index(id)
            .and_then(|i| self.selected.get(i).copied())
            .unwrap_or(false)
    }

    /// Marks the sub-graph selected; returns `false` if it already was or if
    /// it is older than the bitmap.
    ///
    pub fn select(&mut self, id: SubGraphId) -> bool {
        let i = match self.index(id) {
            Some(i) => i,
            None => return false,
        };
        if self.is_selected(id) {
            return false;
        }
        let selected = Arc::make_mut(&mut self.selected);
        if selected.len() <= i {
            selected.resize(i + 1, false);
        }
        selected[i] = true;
        true
    }

    pub fn release(&mut self, id: SubGraphId) {
        if let Some(i) = self.index(id).filter(|_| self.is_selected(id)) {
            Arc::make_mut(&mut self.selected)[i] = false;
        }
    }

    /// Drops the entries of sub-graphs older than `id`.
    ///
    pub fn forget_before(&mut self, id: SubGraphId) {
        if id.0 <= self.first {
            return;
        }
        let n = (id.0 - self.first).min(self.selected.len());
        if n > 0 {
            Arc::make_mut(&mut self.selected).drain(..n);
        }
        self.first = id.0;
    }

    pub fn count(&self) -> usize {
        self.selected.iter().filter(|s| **s).count()
    }

    /// Bitmap entries held, selected or not
    pub fn capacity(&self) -> usize {
        self.selected.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = SubGraphId> + '_ {
        let first = self.first;
        self.selected
            .iter()
            .enumerate()
            .filter(|(_, s)| **s)
            .map(move |(i, _)| SubGraphId(first + i))
    }

    /// Both maps hold the same bitmap allocation
    pub fn shares_storage(&self, other: &SelectionMap) -> bool {
        Arc::ptr_eq(&self.selected, &other.selected)
    }
}
