//! # Fork orchestrator.
//!
//! `spawn` forks the process and continues on one of three paths:
//!
//! ```text
//! fork()
//!   ├─ Err(errno)        ─► ForkFailed, registry untouched
//!   ├─ Parent { child }  ─► register(child) ─► ProcessHandle
//!   └─ Child
//!        ├─ loop idle    ─► install_fresh ─► notice_fork ─► task
//!        │                    ├─ Some(_) ─► exit(cfg.exit_code)
//!        │                    └─ None    ─► run loop ─► exit
//!        └─ loop running ─► reinstall_and_resume(notice_fork ─► task)
//! ```
//!
//! In the parent, registration happens before `spawn` returns and without a safe
//! point in between, so the reaper cannot observe the child before its entry exists.
//!
//! In the child, [`notice_fork`] runs before any task code: the inherited registry is
//! cleared (those pids are siblings, not children), SIGCHLD is re-subscribed for the
//! child's own children, and the pending fork hooks are consumed.
//!
//! A task that panics never unwinds into the caller's frames: the child exits with
//! [`PANIC_EXIT_CODE`] on both branches.

use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use nix::unistd::{ForkResult, Pid};
use tracing::{debug, error, warn};

use crate::core::handle::{ProcessHandle, completion_pair};
use crate::core::supervisor::Shared;
use crate::core::{hooks, signals};
use crate::driver::{Driver, ReinstallUnwind};
use crate::error::ProcessError;
use crate::events::{Event, EventKind};
use crate::os::Os;

/// Exit status of a child whose task panicked.
pub(crate) const PANIC_EXIT_CODE: i32 = 101;

pub(crate) fn spawn<D, O, A, F, R>(
    shared: &Rc<Shared<D, O>>,
    args: A,
    task: F,
) -> Result<ProcessHandle, ProcessError>
where
    D: Driver + 'static,
    O: Os + 'static,
    A: 'static,
    F: FnOnce(A) -> Option<R> + 'static,
{
    // SAFETY: the supervisor is single-threaded; the child only touches state owned
    // by this thread, and reinitializes the scheduler before running anything else.
    let forked = unsafe { shared.os.fork() };

    match forked {
        Err(errno) => {
            warn!(error = %errno, "fork failed");
            shared
                .bus
                .publish(Event::new(EventKind::ForkFailed).with_reason(errno.desc()));
            Err(ProcessError::ForkFailed { source: errno })
        }
        Ok(ForkResult::Parent { child }) => track(shared, child),
        Ok(ForkResult::Child) => enter_child(Rc::clone(shared), args, task),
    }
}

fn track<D: Driver, O: Os>(shared: &Shared<D, O>, pid: Pid) -> Result<ProcessHandle, ProcessError> {
    let (pending, completion) = completion_pair(pid);

    if let Err(err) = shared.registry.borrow_mut().register(pid, pending) {
        // The new child has no handle and no entry: stop it so it cannot outlive us.
        let sig = shared.cfg.teardown_signal;
        let reason = match shared.os.kill(pid, sig) {
            Ok(()) => format!("untracked child sent {}", sig.as_str()),
            Err(errno) => format!("untracked child not signaled: {}", errno.desc()),
        };
        error!(pid = pid.as_raw(), %reason, "forked pid already tracked; keeping the existing entry");
        shared.bus.publish(
            Event::new(EventKind::DuplicatePid)
                .with_pid(pid.as_raw())
                .with_reason(reason),
        );
        return Err(err);
    }

    debug!(pid = pid.as_raw(), "child spawned");
    shared
        .bus
        .publish(Event::new(EventKind::ProcessSpawned).with_pid(pid.as_raw()));
    Ok(ProcessHandle { pid, completion })
}

fn enter_child<D, O, A, F, R>(shared: Rc<Shared<D, O>>, args: A, task: F) -> !
where
    D: Driver + 'static,
    O: Os + 'static,
    A: 'static,
    F: FnOnce(A) -> Option<R> + 'static,
{
    if shared.driver.is_running() {
        let preserve = shared.cfg.preserve_subscriptions;
        let entry = Rc::clone(&shared);
        shared.driver.reinstall_and_resume(
            Box::new(move || {
                notice_fork(&entry);
                run_task(&entry, args, task);
            }),
            preserve,
        )
    }

    shared.driver.install_fresh();
    notice_fork(&shared);
    run_task(&shared, args, task);

    match shared.driver.run() {
        Ok(()) => shared.os.exit(0),
        Err(e) => {
            error!(error = %e, "child scheduler failed to start");
            shared.os.exit(1)
        }
    }
}

/// Runs the task in the child; returns only when the child stays alive as a service.
fn run_task<D, O, A, F, R>(shared: &Shared<D, O>, args: A, task: F)
where
    D: Driver,
    O: Os,
    F: FnOnce(A) -> Option<R>,
{
    match panic::catch_unwind(AssertUnwindSafe(|| task(args))) {
        Ok(Some(_)) => shared.os.exit(shared.cfg.exit_code),
        Ok(None) => {}
        Err(payload) if payload.is::<ReinstallUnwind>() => panic::resume_unwind(payload),
        Err(payload) => {
            let message = hooks::panic_message(payload.as_ref());
            error!(pid = shared.os.getpid().as_raw(), %message, "child task panicked");
            shared.os.exit(PANIC_EXIT_CODE)
        }
    }
}

/// Reinitializes per-process state in a freshly forked child.
pub(crate) fn notice_fork<D, O>(shared: &Rc<Shared<D, O>>)
where
    D: Driver + 'static,
    O: Os + 'static,
{
    shared.registry.borrow_mut().clear();

    if let Err(e) = signals::install_reaper(shared) {
        error!(error = %e, "cannot subscribe to SIGCHLD in child; its children will not be reaped");
    }

    for failed in hooks::run_all(&shared.hooks) {
        error!(hook = failed.index, message = %failed.message, "fork hook panicked");
        shared.bus.publish(
            Event::new(EventKind::ForkHookPanicked)
                .with_hook(failed.index)
                .with_reason(failed.message),
        );
    }

    let pid = shared.os.getpid().as_raw();
    debug!(pid, "fork noticed");
    shared
        .bus
        .publish(Event::new(EventKind::ForkNoticed).with_pid(pid));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::panic::{self, AssertUnwindSafe};

    use nix::errno::Errno;
    use nix::sys::signal::Signal;
    use nix::sys::wait::WaitStatus;

    use crate::core::Config;
    use crate::core::testing::{ChildExit, LoopDrained, MockDriver, MockOs, harness};

    fn pid(n: i32) -> Pid {
        Pid::from_raw(n)
    }

    /// Runs `f`, which is expected to end the (simulated) child process.
    fn child_exit(f: impl FnOnce()) -> i32 {
        let payload = panic::catch_unwind(AssertUnwindSafe(f)).unwrap_err();
        match payload.downcast::<ChildExit>() {
            Ok(exit) => exit.0,
            Err(other) => panic::resume_unwind(other),
        }
    }

    #[test]
    fn test_fork_failure_leaves_registry_unchanged() {
        let os = MockOs::new();
        let driver = MockDriver::new();
        let sup = harness(Config::default(), &driver, &os);
        let mut events = sup.subscribe();

        os.push_fork(Err(Errno::EAGAIN));
        let err = sup.spawn(|| Some(())).unwrap_err();

        assert!(matches!(
            err,
            ProcessError::ForkFailed {
                source: Errno::EAGAIN
            }
        ));
        assert!(sup.tracked().is_empty());
        assert_eq!(events.try_recv().unwrap().kind, EventKind::ForkFailed);
    }

    #[test]
    fn test_parent_registers_before_returning() {
        let os = MockOs::new();
        let driver = MockDriver::new();
        let sup = harness(Config::default(), &driver, &os);

        os.push_fork(Ok(ForkResult::Parent { child: pid(77) }));
        let mut handle = sup.spawn(|| Some(())).unwrap();
        assert_eq!(handle.pid, pid(77));
        assert_eq!(sup.tracked(), vec![pid(77)]);
        assert!(handle.completion.try_result().is_none());

        os.push_wait(Ok(WaitStatus::Exited(pid(77), 3)));
        driver.deliver(Signal::SIGCHLD);
        assert_eq!(handle.completion.try_result().unwrap().unwrap(), 3);
        assert!(sup.tracked().is_empty());
    }

    #[test]
    fn test_duplicate_pid_keeps_original_entry() {
        let os = MockOs::new();
        let driver = MockDriver::new();
        let sup = harness(Config::default(), &driver, &os);

        os.push_fork(Ok(ForkResult::Parent { child: pid(9) }));
        os.push_fork(Ok(ForkResult::Parent { child: pid(9) }));
        let mut first = sup.spawn(|| Some(())).unwrap();
        let mut events = sup.subscribe();
        let err = sup.spawn(|| Some(())).unwrap_err();
        assert!(matches!(err, ProcessError::DuplicatePid { pid: 9 }));
        assert_eq!(sup.tracked(), vec![pid(9)]);

        // The untracked child is stopped right away.
        assert_eq!(os.kills(), vec![(pid(9), Signal::SIGKILL)]);
        let ev = events.try_recv().unwrap();
        assert_eq!(ev.kind, EventKind::DuplicatePid);
        assert_eq!(ev.pid, Some(9));
        assert!(ev.reason.is_some());

        os.push_wait(Ok(WaitStatus::Exited(pid(9), 0)));
        sup.reap();
        assert_eq!(first.completion.try_result().unwrap().unwrap(), 0);
    }

    #[test]
    fn test_hooks_never_run_in_parent() {
        let os = MockOs::new();
        let driver = MockDriver::new();
        let sup = harness(Config::default(), &driver, &os);
        let ran = Rc::new(Cell::new(false));

        let r = Rc::clone(&ran);
        sup.register_fork_handler(move || r.set(true));
        os.push_fork(Ok(ForkResult::Parent { child: pid(3) }));
        sup.spawn(|| Some(())).unwrap();

        assert!(!ran.get());
        assert_eq!(sup.pending_fork_handlers(), 1);
    }

    #[test]
    fn test_child_with_sync_result_exits_with_configured_code() {
        let os = MockOs::new();
        let driver = MockDriver::new();
        let sup = harness(Config::default(), &driver, &os);

        os.push_fork(Ok(ForkResult::Parent { child: pid(5) }));
        sup.spawn(|| Some(())).unwrap();

        let order = Rc::new(RefCell::new(Vec::new()));
        let o = Rc::clone(&order);
        sup.register_fork_handler(move || o.borrow_mut().push("hook"));

        os.push_fork(Ok(ForkResult::Child));
        let o = Rc::clone(&order);
        let inner = sup.clone();
        let code = child_exit(|| {
            let _ = sup.spawn(move || {
                o.borrow_mut().push("task");
                // Siblings inherited from the parent are not this child's to reap.
                assert!(inner.tracked().is_empty());
                Some(42)
            });
        });

        assert_eq!(code, 0);
        assert_eq!(*order.borrow(), vec!["hook", "task"]);
        assert_eq!(driver.fresh_installs(), 1);
        assert_eq!(driver.runs(), 0);
        assert_eq!(driver.subscriptions(Signal::SIGCHLD), 1);
        assert_eq!(sup.pending_fork_handlers(), 0);
    }

    #[test]
    fn test_child_without_result_runs_the_loop() {
        let os = MockOs::new();
        let driver = MockDriver::new();
        let sup = harness(Config::default(), &driver, &os);

        os.push_fork(Ok(ForkResult::Child));
        let code = child_exit(|| {
            let _ = sup.spawn_with(7, |n: i32| {
                assert_eq!(n, 7);
                None::<()>
            });
        });

        assert_eq!(code, 0);
        assert_eq!(driver.runs(), 1);
    }

    #[test]
    fn test_child_forked_inside_running_loop_reinstalls() {
        let os = MockOs::new();
        let driver = MockDriver::new();
        let cfg = Config {
            exit_code: 3,
            preserve_subscriptions: false,
            ..Config::default()
        };
        let sup = harness(cfg, &driver, &os);
        let ran = Rc::new(Cell::new(false));
        let r = Rc::clone(&ran);
        sup.register_fork_handler(move || r.set(true));

        driver.set_running(true);
        os.push_fork(Ok(ForkResult::Child));
        let code = child_exit(|| {
            let _ = sup.spawn(|| Some(()));
        });

        assert_eq!(code, 3);
        assert!(ran.get());
        assert_eq!(driver.reinstalls(), vec![false]);
        assert_eq!(driver.fresh_installs(), 0);
    }

    #[test]
    fn test_reinstalled_child_without_result_drains_the_loop() {
        let os = MockOs::new();
        let driver = MockDriver::new();
        let sup = harness(Config::default(), &driver, &os);

        driver.set_running(true);
        os.push_fork(Ok(ForkResult::Child));
        let payload = panic::catch_unwind(AssertUnwindSafe(|| {
            let _ = sup.spawn(|| None::<()>);
        }))
        .unwrap_err();

        assert!(payload.is::<LoopDrained>());
        assert_eq!(driver.reinstalls(), vec![true]);
    }

    #[test]
    fn test_panicking_task_exits_child_with_failure() {
        let os = MockOs::new();
        let driver = MockDriver::new();
        let sup = harness(Config::default(), &driver, &os);
        let returned = Rc::new(Cell::new(false));

        os.push_fork(Ok(ForkResult::Child));
        let r = Rc::clone(&returned);
        let code = child_exit(|| {
            let _ = sup.spawn(|| -> Option<()> { panic!("task failed") });
            r.set(true);
        });

        assert_eq!(code, PANIC_EXIT_CODE);
        assert!(!returned.get());
        assert_eq!(driver.runs(), 0);
    }

    #[test]
    fn test_panicking_task_in_reinstalled_child_exits_with_failure() {
        let os = MockOs::new();
        let driver = MockDriver::new();
        let sup = harness(Config::default(), &driver, &os);

        driver.set_running(true);
        os.push_fork(Ok(ForkResult::Child));
        let code = child_exit(|| {
            let _ = sup.spawn(|| -> Option<()> { panic!("task failed") });
        });

        assert_eq!(code, PANIC_EXIT_CODE);
        assert_eq!(driver.reinstalls(), vec![true]);
    }

    #[test]
    fn test_cancelled_hook_never_runs_in_child() {
        let os = MockOs::new();
        let driver = MockDriver::new();
        let sup = harness(Config::default(), &driver, &os);
        let ran = Rc::new(Cell::new(false));

        let r = Rc::clone(&ran);
        let idx = sup.register_fork_handler(move || r.set(true));
        sup.cancel_fork_handler(idx);
        sup.cancel_fork_handler(idx);

        os.push_fork(Ok(ForkResult::Child));
        child_exit(|| {
            let _ = sup.spawn(|| Some(()));
        });
        assert!(!ran.get());
    }

    #[test]
    fn test_panicking_hook_is_reported_and_task_still_runs() {
        let os = MockOs::new();
        let driver = MockDriver::new();
        let sup = harness(Config::default(), &driver, &os);
        let mut events = sup.subscribe();
        let ran = Rc::new(Cell::new(false));

        sup.register_fork_handler(|| panic!("stale pool"));
        os.push_fork(Ok(ForkResult::Child));
        let r = Rc::clone(&ran);
        child_exit(|| {
            let _ = sup.spawn(move || {
                r.set(true);
                Some(())
            });
        });

        assert!(ran.get());
        let kinds: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
            .map(|ev| ev.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![EventKind::ForkHookPanicked, EventKind::ForkNoticed]
        );
    }
}
