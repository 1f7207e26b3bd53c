//! # Operating-system primitives consumed by the supervisor.
//!
//! Everything that touches the process table goes through the [`Os`] trait:
//! `fork`, a non-blocking wait for any child, `kill`, pid accessors and `exit`.
//! [`SystemOs`] is the real implementation on top of `nix`; tests plug in
//! scripted doubles to simulate fork exhaustion or several children ending
//! between two signal deliveries.

use nix::sys::signal::{self, Signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{self, ForkResult, Pid};

/// Process-level primitives used by the fork orchestrator, the reaper and teardown.
pub trait Os {
    /// Duplicates the calling process.
    ///
    /// # Safety
    ///
    /// Same contract as [`nix::unistd::fork`]: the child of a multi-threaded
    /// process may only rely on state that no other thread could have been
    /// holding locked at the time of the fork.
    unsafe fn fork(&self) -> nix::Result<ForkResult>;

    /// Non-blocking wait for any child (`waitpid(-1, WNOHANG | flags)`).
    ///
    /// Returns [`WaitStatus::StillAlive`] when no child changed state.
    fn try_wait_any(&self, flags: WaitPidFlag) -> nix::Result<WaitStatus>;

    /// Sends `signal` to `pid`.
    fn kill(&self, pid: Pid, signal: Signal) -> nix::Result<()>;

    /// Pid of the calling process.
    fn getpid(&self) -> Pid;

    /// Pid of the parent of the calling process.
    fn getppid(&self) -> Pid;

    /// Terminates the calling process with `code`.
    fn exit(&self, code: i32) -> !;
}

/// [`Os`] backed by the real system calls.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemOs;

impl Os for SystemOs {
    unsafe fn fork(&self) -> nix::Result<ForkResult> {
        unsafe { unistd::fork() }
    }

    fn try_wait_any(&self, flags: WaitPidFlag) -> nix::Result<WaitStatus> {
        waitpid(None, Some(flags | WaitPidFlag::WNOHANG))
    }

    fn kill(&self, pid: Pid, signal: Signal) -> nix::Result<()> {
        signal::kill(pid, signal)
    }

    fn getpid(&self) -> Pid {
        unistd::getpid()
    }

    fn getppid(&self) -> Pid {
        unistd::getppid()
    }

    fn exit(&self, code: i32) -> ! {
        std::process::exit(code)
    }
}
