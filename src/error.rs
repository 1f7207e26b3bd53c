//! Error types used by the fork supervisor.
//!
//! A single enum, [`ProcessError`], covers every failure the runtime can report:
//!
//! - [`ProcessError::ForkFailed`] is returned synchronously from `spawn`.
//! - [`ProcessError::Abnormal`] is delivered through a child's completion.
//! - [`ProcessError::DuplicatePid`] is a registry fault returned from `spawn`.
//! - [`ProcessError::UnknownPid`] is swallowed by the reaper; it only surfaces in logs
//!   and events.
//!
//! Like the rest of the crate, the enum provides `as_label` / `as_message` helpers
//! for logging and metrics.

use nix::errno::Errno;
use nix::sys::signal::Signal;
use thiserror::Error;

/// # Errors produced by the fork supervisor.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ProcessError {
    /// The OS refused to create a new process (e.g. `EAGAIN` when out of process slots).
    #[error("fork failed: {source}")]
    ForkFailed {
        /// Errno reported by `fork(2)`.
        #[source]
        source: Errno,
    },

    /// Child terminated other than by a normal `exit`.
    #[error("process {pid} terminated abnormally ({})", describe_abnormal(.signal, .core_dumped, .stopped))]
    Abnormal {
        /// Pid of the child.
        pid: i32,
        /// Signal that killed or stopped the child, if any.
        signal: Option<Signal>,
        /// The child dumped core.
        core_dumped: bool,
        /// The child was stopped rather than terminated.
        stopped: bool,
    },

    /// A pid was registered while an entry for it already existed.
    #[error("pid {pid} is already tracked")]
    DuplicatePid {
        /// The colliding pid.
        pid: i32,
    },

    /// A terminated pid has no registry entry.
    #[error("pid {pid} is not tracked")]
    UnknownPid {
        /// The untracked pid.
        pid: i32,
    },

    /// The scheduler could not subscribe to an OS signal.
    #[error("signal subscription failed: {0}")]
    Signal(#[from] std::io::Error),

    /// The completion sender was dropped before a result was delivered.
    #[error("completion dropped before the process was reaped")]
    Canceled,
}

fn describe_abnormal(signal: &Option<Signal>, core_dumped: &bool, stopped: &bool) -> String {
    let sig = signal.map_or("none", Signal::as_str);
    match (*stopped, *core_dumped) {
        (true, _) => format!("stopped by {sig}"),
        (false, true) => format!("killed by {sig}, core dumped"),
        (false, false) => format!("killed by {sig}"),
    }
}

impl ProcessError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use forkvisor::ProcessError;
    ///
    /// let err = ProcessError::DuplicatePid { pid: 42 };
    /// assert_eq!(err.as_label(), "process_duplicate_pid");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ProcessError::ForkFailed { .. } => "process_fork_failed",
            ProcessError::Abnormal { .. } => "process_abnormal",
            ProcessError::DuplicatePid { .. } => "process_duplicate_pid",
            ProcessError::UnknownPid { .. } => "process_unknown_pid",
            ProcessError::Signal(_) => "process_signal_subscription",
            ProcessError::Canceled => "process_canceled",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            ProcessError::ForkFailed { source } => format!("fork: {}", source.desc()),
            ProcessError::Abnormal {
                pid,
                signal,
                core_dumped,
                stopped,
            } => format!(
                "pid={pid} {}",
                describe_abnormal(signal, core_dumped, stopped)
            ),
            ProcessError::DuplicatePid { pid } => format!("duplicate: pid={pid}"),
            ProcessError::UnknownPid { pid } => format!("unknown: pid={pid}"),
            ProcessError::Signal(e) => format!("signal: {e}"),
            ProcessError::Canceled => "completion canceled".to_string(),
        }
    }

    /// Indicates whether the error describes how a child ended (as opposed to a
    /// supervisor-side fault).
    ///
    /// # Example
    /// ```
    /// use forkvisor::ProcessError;
    ///
    /// let err = ProcessError::Abnormal { pid: 7, signal: None, core_dumped: false, stopped: false };
    /// assert!(err.is_termination());
    /// assert!(!ProcessError::Canceled.is_termination());
    /// ```
    pub fn is_termination(&self) -> bool {
        matches!(self, ProcessError::Abnormal { .. })
    }
}
