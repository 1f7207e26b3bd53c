//! # Process registry - pid → pending completion.
//!
//! The registry is the only state shared by the fork orchestrator and the reaper:
//!
//! ```text
//! spawn (parent) ──► register(pid, completion) ──┐
//!                                                ▼
//!                                      ┌──────────────────┐
//!                                      │ completions: pid │
//!                                      │ children:    pid │
//!                                      └──────────────────┘
//!                                                │
//! SIGCHLD ──► reaper ──► take(pid) ◄─────────────┘
//! ```
//!
//! ## Rules
//! - At most one entry per pid; a second `register` is a `DuplicatePid` fault.
//! - `take` removes both maps atomically; an absent pid is `UnknownPid`.
//! - `clear` drops everything without completing it (child side after fork).

use std::collections::HashMap;

use nix::unistd::Pid;

use crate::core::handle::{ChildRecord, PendingCompletion};
use crate::error::ProcessError;

/// Tracked children of one supervisor.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    completions: HashMap<Pid, PendingCompletion>,
    children: HashMap<Pid, ChildRecord>,
}

impl ProcessRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking `pid`.
    pub fn register(&mut self, pid: Pid, completion: PendingCompletion) -> Result<(), ProcessError> {
        if self.completions.contains_key(&pid) {
            return Err(ProcessError::DuplicatePid { pid: pid.as_raw() });
        }
        self.completions.insert(pid, completion);
        self.children.insert(pid, ChildRecord::new(pid));
        Ok(())
    }

    /// Stops tracking `pid` and hands back its completion.
    pub fn take(&mut self, pid: Pid) -> Result<(PendingCompletion, ChildRecord), ProcessError> {
        let completion = self
            .completions
            .remove(&pid)
            .ok_or(ProcessError::UnknownPid { pid: pid.as_raw() })?;
        let record = self
            .children
            .remove(&pid)
            .unwrap_or_else(|| ChildRecord::new(pid));
        Ok((completion, record))
    }

    /// Forgets every entry without completing any of them.
    pub fn clear(&mut self) {
        self.completions.clear();
        self.children.clear();
    }

    /// Returns `true` if `pid` is tracked.
    pub fn contains(&self, pid: Pid) -> bool {
        self.completions.contains_key(&pid)
    }

    /// Returns the tracked pids, sorted.
    pub fn pids(&self) -> Vec<Pid> {
        let mut pids: Vec<Pid> = self.children.keys().copied().collect();
        pids.sort_unstable_by_key(|pid| pid.as_raw());
        pids
    }

    /// Returns the records of every tracked child, sorted by pid.
    pub fn records(&self) -> Vec<ChildRecord> {
        let mut records: Vec<ChildRecord> = self.children.values().copied().collect();
        records.sort_unstable_by_key(|rec| rec.pid.as_raw());
        records
    }

    /// Number of tracked children.
    pub fn len(&self) -> usize {
        self.completions.len()
    }

    /// Returns `true` if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.completions.is_empty()
    }
}
