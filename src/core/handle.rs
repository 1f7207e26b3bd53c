//! # Process handles and their completions.
//!
//! A fork produces two halves of a one-shot channel:
//! - [`PendingCompletion`] (resolve/reject) goes into the registry and is consumed by the reaper,
//! - [`Completion`] (a future of the exit code) goes to the caller inside a [`ProcessHandle`].
//!
//! Both `resolve` and `reject` take `self`, so a pid can be completed at most once.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use futures::FutureExt;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::sync::oneshot;

use crate::error::ProcessError;

type Outcome = Result<i32, ProcessError>;

/// Creates the resolve/reject half and the awaitable half for `pid`.
pub(crate) fn completion_pair(pid: Pid) -> (PendingCompletion, Completion) {
    let (tx, rx) = oneshot::channel();
    (PendingCompletion { pid, tx }, Completion { rx })
}

/// Resolve/reject pair owned by the registry until the child is reaped.
#[derive(Debug)]
pub struct PendingCompletion {
    pid: Pid,
    tx: oneshot::Sender<Outcome>,
}

impl PendingCompletion {
    /// Pid this completion belongs to.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Completes with a normal exit status.
    ///
    /// Returns `false` when the caller already dropped its handle.
    pub fn resolve(self, code: i32) -> bool {
        self.tx.send(Ok(code)).is_ok()
    }

    /// Completes with an abnormal termination.
    ///
    /// Returns `false` when the caller already dropped its handle.
    pub fn reject(self, err: ProcessError) -> bool {
        self.tx.send(Err(err)).is_ok()
    }
}

/// Future resolving to the child's exit status.
///
/// Yields `Err(ProcessError::Abnormal { .. })` when the child did not exit normally, and
/// `Err(ProcessError::Canceled)` if the supervisor side was dropped without a result.
#[derive(Debug)]
pub struct Completion {
    rx: oneshot::Receiver<Outcome>,
}

impl Completion {
    /// Non-blocking check for a result.
    ///
    /// Returns `None` while the child has not been reaped. Once a result was
    /// returned, later calls report `Canceled`.
    pub fn try_result(&mut self) -> Option<Outcome> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(ProcessError::Canceled)),
        }
    }
}

impl Future for Completion {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.rx
            .poll_unpin(cx)
            .map(|res| res.unwrap_or(Err(ProcessError::Canceled)))
    }
}

/// A forked child as seen by the caller of `spawn`.
#[derive(Debug)]
pub struct ProcessHandle {
    /// Pid of the child.
    pub pid: Pid,
    /// Resolves with the exit status once the child is reaped.
    pub completion: Completion,
}

impl ProcessHandle {
    /// Sends `sig` to the child with `kill(2)` directly.
    ///
    /// This is a raw OS call that does not go through the supervisor's
    /// [`Os`](crate::Os). Use [`Supervisor::kill`](crate::Supervisor::kill) when
    /// signals must follow the supervisor's primitives.
    pub fn signal(&self, sig: Signal) -> nix::Result<()> {
        signal::kill(self.pid, sig)
    }
}

/// Supervisor-side record of a tracked child, used at teardown.
#[derive(Clone, Copy, Debug)]
pub struct ChildRecord {
    /// Pid of the child.
    pub pid: Pid,
    /// When the fork returned in the parent.
    pub spawned_at: Instant,
}

impl ChildRecord {
    pub(crate) fn new(pid: Pid) -> Self {
        Self {
            pid,
            spawned_at: Instant::now(),
        }
    }
}
