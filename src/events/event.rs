//! # Runtime events emitted by the fork supervisor.
//!
//! The [`EventKind`] enum classifies event types across three categories:
//! - **Spawn events**: fork outcome in the parent (spawned, fork failed, duplicate pid)
//! - **Reap events**: how a tracked child ended, or an untracked pid being reaped
//! - **Fork-boundary events**: hook failures, the fork notice in the child, teardown kills
//!
//! The [`Event`] struct carries optional metadata such as the pid, exit code,
//! signal number and hook index.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically
//! within a process. Completion events follow reap order, not spawn order.
//!
//! ## Example
//! ```rust
//! use forkvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::ProcessExited)
//!     .with_pid(4242)
//!     .with_exit_code(3);
//!
//! assert_eq!(ev.kind, EventKind::ProcessExited);
//! assert_eq!(ev.pid, Some(4242));
//! assert_eq!(ev.exit_code, Some(3));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

use nix::sys::signal::Signal;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Spawn events ===
    /// A child was forked and registered.
    ///
    /// Sets:
    /// - `pid`: child pid
    ProcessSpawned,

    /// `fork(2)` failed; nothing was registered.
    ///
    /// Sets:
    /// - `reason`: errno description
    ForkFailed,

    /// A freshly forked pid collided with a tracked entry.
    ///
    /// Sets:
    /// - `pid`: colliding pid
    DuplicatePid,

    // === Reap events ===
    /// A tracked child exited normally; its completion was resolved.
    ///
    /// Sets:
    /// - `pid`: child pid
    /// - `exit_code`: status passed to `exit` (0-255)
    ProcessExited,

    /// A tracked child was killed, dumped core or stopped; its completion was rejected.
    ///
    /// Sets:
    /// - `pid`: child pid
    /// - `signal`: terminating/stopping signal number (if any)
    /// - `reason`: human readable description
    ProcessAbnormal,

    /// A pid was reaped that this supervisor does not track.
    ///
    /// Sets:
    /// - `pid`: reaped pid
    UnknownPidReaped,

    // === Fork-boundary events ===
    /// A fork hook panicked; remaining hooks still ran.
    ///
    /// Sets:
    /// - `hook`: hook index
    /// - `reason`: panic message
    ForkHookPanicked,

    /// The child finished its post-fork reinitialization (hooks ran, registry cleared).
    ///
    /// Sets:
    /// - `pid`: the child's own pid
    ForkNoticed,

    /// Teardown sent the configured signal to a tracked child.
    ///
    /// Sets:
    /// - `pid`: target pid
    /// - `signal`: signal number sent
    /// - `reason`: errno description when delivery failed
    TeardownSignaled,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Process id the event is about.
    pub pid: Option<i32>,
    /// Exit status of a normally exited child.
    pub exit_code: Option<i32>,
    /// Signal number (terminating signal, or the one sent at teardown).
    pub signal: Option<i32>,
    /// Fork hook index.
    pub hook: Option<u64>,
    /// Human-readable reason (errno text, panic message, etc.).
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            pid: None,
            exit_code: None,
            signal: None,
            hook: None,
            reason: None,
        }
    }

    /// Attaches a pid.
    #[inline]
    pub fn with_pid(mut self, pid: i32) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Attaches an exit status.
    #[inline]
    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    /// Attaches a signal (stored as its raw number).
    #[inline]
    pub fn with_signal(mut self, signal: Signal) -> Self {
        self.signal = Some(signal as i32);
        self
    }

    /// Attaches a fork hook index.
    #[inline]
    pub fn with_hook(mut self, index: u64) -> Self {
        self.hook = Some(index);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// True for events that complete a tracked child's handle.
    #[inline]
    pub fn is_completion(&self) -> bool {
        matches!(
            self.kind,
            EventKind::ProcessExited | EventKind::ProcessAbnormal
        )
    }
}
