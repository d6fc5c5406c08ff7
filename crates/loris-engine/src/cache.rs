//! The observation cache: a write-once memo table from assignments to
//! solver verdicts.
//!
//! A verdict is a deterministic function of its assignment, so the cache
//! only needs eventual visibility. The entry-level locking here gives a
//! stronger property for free: when two workers race on the same fresh
//! assignment, exactly one runs the solver and the other blocks on the
//! entry until the verdict is published.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use loris_model::Assignment;
use loris_solver::Verdict;

#[derive(Debug, Default)]
pub struct ObservationCache {
    entries: Mutex<HashMap<Assignment, Arc<Mutex<Option<Verdict>>>>>,
}

impl ObservationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of assignments ever seen (decided or in flight).
    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The cached verdict for an assignment, if one has been published.
    pub fn get(&self, assignment: &Assignment) -> Option<Verdict> {
        let entry = {
            let map = self.entries.lock().expect("cache mutex poisoned");
            Arc::clone(map.get(assignment)?)
        };
        let slot = entry.lock().expect("cache entry mutex poisoned");
        *slot
    }

    /// Return the verdict for `assignment`, running `solve` only if no
    /// verdict has been published yet.
    ///
    /// The boolean is true when this call ran the solver. The outer map
    /// mutex is held just long enough to fetch the entry, so concurrent
    /// trials on distinct assignments solve in parallel; a failed `solve`
    /// leaves the entry empty and a later trial may retry it.
    pub fn lookup_or_solve<E>(
        &self,
        assignment: &Assignment,
        solve: impl FnOnce() -> Result<Verdict, E>,
    ) -> Result<(Verdict, bool), E> {
        let entry = {
            let mut map = self.entries.lock().expect("cache mutex poisoned");
            Arc::clone(map.entry(assignment.clone()).or_default())
        };
        let mut slot = entry.lock().expect("cache entry mutex poisoned");
        if let Some(verdict) = *slot {
            return Ok((verdict, false));
        }
        let verdict = solve()?;
        *slot = Some(verdict);
        Ok((verdict, true))
    }
}
