//! # Reaper: drains terminated children and completes their handles.
//!
//! One SIGCHLD may stand for several children, so every delivery drains the wait
//! queue until the OS reports nothing left:
//!
//! ```text
//! loop {
//!     waitpid(-1, WNOHANG [| WUNTRACED])
//!       ├─ StillAlive / ECHILD ─► stop
//!       ├─ EINTR               ─► retry
//!       └─ (pid, status)       ─► registry.take(pid)
//!                                   ├─ Exited(code)  ─► resolve(code)
//!                                   ├─ other status  ─► reject(Abnormal)
//!                                   └─ untracked     ─► log, ignore
//! }
//! ```
//!
//! Nothing escapes a drain: registry faults and wait errors are logged and
//! published, never propagated into the scheduler.

use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::core::supervisor::Shared;
use crate::driver::Driver;
use crate::error::ProcessError;
use crate::events::{Event, EventKind};
use crate::os::Os;

/// How a reaped child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExitOutcome {
    /// Normal `exit`, with its status.
    Exited(i32),
    /// Killed, dumped core, stopped, or any status that is not a normal exit.
    Abnormal {
        signal: Option<Signal>,
        core_dumped: bool,
        stopped: bool,
    },
}

impl ExitOutcome {
    pub(crate) fn from_status(status: &WaitStatus) -> Self {
        match *status {
            WaitStatus::Exited(_, code) => ExitOutcome::Exited(code),
            WaitStatus::Signaled(_, signal, core_dumped) => ExitOutcome::Abnormal {
                signal: Some(signal),
                core_dumped,
                stopped: false,
            },
            WaitStatus::Stopped(_, signal) => ExitOutcome::Abnormal {
                signal: Some(signal),
                core_dumped: false,
                stopped: true,
            },
            _ => ExitOutcome::Abnormal {
                signal: None,
                core_dumped: false,
                stopped: false,
            },
        }
    }
}

/// Reaps every child that changed state since the last drain.
///
/// Returns the number of pids collected, tracked or not.
pub(crate) fn drain<D: Driver, O: Os>(shared: &Shared<D, O>) -> usize {
    let flags = shared.cfg.wait_flags();
    let mut reaped = 0;

    loop {
        let status = match shared.os.try_wait_any(flags) {
            Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => break,
            Err(Errno::EINTR) => continue,
            Err(e) => {
                warn!(error = %e, "waitpid failed; stopping drain");
                break;
            }
            Ok(status) => status,
        };
        let Some(pid) = status.pid() else { break };

        reaped += 1;
        complete(shared, pid, ExitOutcome::from_status(&status));
    }
    reaped
}

fn complete<D: Driver, O: Os>(shared: &Shared<D, O>, pid: Pid, outcome: ExitOutcome) {
    let taken = shared.registry.borrow_mut().take(pid);
    let (pending, record) = match taken {
        Ok(entry) => entry,
        Err(err) => {
            debug!(pid = pid.as_raw(), reason = %err, "reaped untracked child");
            shared
                .bus
                .publish(Event::new(EventKind::UnknownPidReaped).with_pid(pid.as_raw()));
            return;
        }
    };
    let lifetime = record.spawned_at.elapsed();

    match outcome {
        ExitOutcome::Exited(code) => {
            info!(pid = pid.as_raw(), code, ?lifetime, "child exited");
            if !pending.resolve(code) {
                debug!(pid = pid.as_raw(), "completion dropped by caller");
            }
            shared.bus.publish(
                Event::new(EventKind::ProcessExited)
                    .with_pid(pid.as_raw())
                    .with_exit_code(code),
            );
        }
        ExitOutcome::Abnormal {
            signal,
            core_dumped,
            stopped,
        } => {
            let err = ProcessError::Abnormal {
                pid: pid.as_raw(),
                signal,
                core_dumped,
                stopped,
            };
            warn!(pid = pid.as_raw(), reason = %err, ?lifetime, "child terminated abnormally");

            let mut ev = Event::new(EventKind::ProcessAbnormal)
                .with_pid(pid.as_raw())
                .with_reason(err.as_message());
            if let Some(signal) = signal {
                ev = ev.with_signal(signal);
            }
            if !pending.reject(err) {
                debug!(pid = pid.as_raw(), "completion dropped by caller");
            }
            shared.bus.publish(ev);
        }
    }
}
