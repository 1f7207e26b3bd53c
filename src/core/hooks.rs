//! # Fork hooks - one-shot callbacks run in the child right after a fork.
//!
//! Subsystems that keep per-process state (timers, connection pools, caches keyed by pid)
//! register a hook; the first fork after registration runs it inside the child, before
//! any task logic, and consumes it.
//!
//! ## Rules
//! - `register` returns a stable index; indices are never reused.
//! - `cancel` of an absent index is a no-op.
//! - `run_all` only visits the hooks present when it starts, removing each one before
//!   calling it. A hook registered during the run waits for the next fork.
//! - A panicking hook is caught and reported; the remaining hooks still run.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};

/// Index identifying a registered fork hook.
pub type HookIndex = u64;

/// Boxed fork hook.
pub type ForkHook = Box<dyn FnOnce()>;

/// Failure of a single hook while the pending hooks run after a fork.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookPanic {
    /// Index of the hook that panicked.
    pub index: HookIndex,
    /// Panic message, when it was a string.
    pub message: String,
}

/// Ordered one-shot callback registry.
#[derive(Default)]
pub struct ForkHooks {
    next: HookIndex,
    hooks: BTreeMap<HookIndex, ForkHook>,
}

impl ForkHooks {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `hook` and returns its index.
    pub fn register(&mut self, hook: ForkHook) -> HookIndex {
        let index = self.next;
        self.next += 1;
        self.hooks.insert(index, hook);
        index
    }

    /// Removes the hook at `index`, if still pending.
    pub fn cancel(&mut self, index: HookIndex) -> bool {
        self.hooks.remove(&index).is_some()
    }

    /// Indices of hooks that have not run yet, in registration order.
    pub fn pending(&self) -> Vec<HookIndex> {
        self.hooks.keys().copied().collect()
    }

    /// Number of pending hooks.
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Returns `true` if no hook is pending.
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

/// Runs the hooks of `hooks` that are pending right now.
///
/// The `RefCell` borrow is released while each hook runs, so a hook may register
/// or cancel hooks. Returns the hooks that panicked.
pub(crate) fn run_all(hooks: &RefCell<ForkHooks>) -> Vec<HookPanic> {
    let snapshot = hooks.borrow().pending();

    let mut panics = Vec::new();
    for index in snapshot {
        let taken = hooks.borrow_mut().hooks.remove(&index);
        // Cancelled by an earlier hook.
        let Some(hook) = taken else { continue };

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(hook)) {
            panics.push(HookPanic {
                index,
                message: panic_message(payload.as_ref()),
            });
        }
    }
    panics
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
