//! # Supervisor: owns the registries and exposes the fork/reap contract.
//!
//! The [`Supervisor`] is the composition root. It owns the process registry, the fork
//! hook registry, the event bus, the scheduler [`Driver`] and the [`Os`] primitives, and
//! wires SIGCHLD to the reaper when it is built.
//!
//! ## High-level architecture
//! ```text
//! spawn(task) ──► fork::spawn ──┬─ parent: registry.register(pid) ──► ProcessHandle
//!                               └─ child:  notice_fork ─► task ─► exit / run loop
//!
//! SIGCHLD ──► Driver (safe point) ──► reaper::drain ──► registry.take(pid)
//!                                                         ├─ exited   ─► resolve(code)
//!                                                         └─ abnormal ─► reject(Abnormal)
//!
//! drop(last Supervisor clone) ──► shutdown::signal_all (SIGKILL, no wait)
//! ```
//!
//! `Supervisor` is a cheap handle (`Rc` inside). Clones share the same state; teardown
//! happens when the last clone is dropped. The SIGCHLD handler only holds a weak
//! reference, so it never keeps the supervisor alive.
//!
//! ## Example
//! ```no_run
//! use forkvisor::{Config, Supervisor};
//!
//! let sup = Supervisor::new(Config::default())?;
//! let handle = sup.spawn(|| {
//!     // runs in the child; `Some(_)` means "done, exit now"
//!     Some(())
//! })?;
//!
//! let code = sup.driver().block_on(handle.completion)??;
//! assert_eq!(code, 0);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use nix::sys::signal::Signal;
use nix::unistd::Pid;
use tokio::sync::broadcast;

use crate::core::builder::SupervisorBuilder;
use crate::core::hooks::{ForkHooks, HookIndex};
use crate::core::registry::ProcessRegistry;
use crate::core::{ChildRecord, Config, ProcessHandle, fork, reaper, shutdown};
use crate::driver::{Driver, LocalDriver, SubscriptionId};
use crate::error::ProcessError;
use crate::events::{Bus, Event};
use crate::os::{Os, SystemOs};

/// State shared by the supervisor handle, the SIGCHLD handler and the child entry.
pub(crate) struct Shared<D: Driver, O: Os> {
    pub(crate) cfg: Config,
    pub(crate) bus: Bus,
    pub(crate) driver: D,
    pub(crate) os: O,
    pub(crate) registry: RefCell<ProcessRegistry>,
    pub(crate) hooks: RefCell<ForkHooks>,
    pub(crate) sigchld: Cell<Option<SubscriptionId>>,
}

impl<D: Driver, O: Os> Shared<D, O> {
    pub(crate) fn new(cfg: Config, driver: D, os: O) -> Self {
        let bus = Bus::new(cfg.bus_capacity_clamped());
        Self {
            cfg,
            bus,
            driver,
            os,
            registry: RefCell::new(ProcessRegistry::new()),
            hooks: RefCell::new(ForkHooks::new()),
            sigchld: Cell::new(None),
        }
    }
}

impl<D: Driver, O: Os> Drop for Shared<D, O> {
    fn drop(&mut self) {
        if let Some(id) = self.sigchld.take() {
            self.driver.cancel_signal(id);
        }
        shutdown::signal_all(self);
    }
}

/// Forks tasks into child processes and completes their handles when they end.
pub struct Supervisor<D: Driver = LocalDriver, O: Os = SystemOs> {
    shared: Rc<Shared<D, O>>,
}

impl<D: Driver, O: Os> Clone for Supervisor<D, O> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl Supervisor {
    /// Creates a supervisor on a fresh [`LocalDriver`] and the real OS.
    pub fn new(cfg: Config) -> Result<Self, ProcessError> {
        Self::builder(cfg).build()
    }

    /// Starts building a supervisor; collaborators can be swapped on the builder.
    pub fn builder(cfg: Config) -> SupervisorBuilder {
        SupervisorBuilder::new(cfg)
    }
}

impl<D: Driver + 'static, O: Os + 'static> Supervisor<D, O> {
    pub(crate) fn from_shared(shared: Rc<Shared<D, O>>) -> Self {
        Self { shared }
    }

    /// Forks `task` into a child process.
    ///
    /// In the child, `task` runs after the fork hooks. Returning `Some(_)` exits the
    /// child immediately with [`Config::exit_code`]; returning `None` keeps the child's
    /// scheduler running (the child becomes a long-lived service).
    ///
    /// In the parent, the returned handle is registered before this call returns.
    pub fn spawn<F, R>(&self, task: F) -> Result<ProcessHandle, ProcessError>
    where
        F: FnOnce() -> Option<R> + 'static,
    {
        self.spawn_with((), move |()| task())
    }

    /// Like [`spawn`](Self::spawn), forwarding `args` to `task` in the child.
    pub fn spawn_with<A, F, R>(&self, args: A, task: F) -> Result<ProcessHandle, ProcessError>
    where
        A: 'static,
        F: FnOnce(A) -> Option<R> + 'static,
    {
        fork::spawn(&self.shared, args, task)
    }

    /// Registers a one-shot hook run in the next forked child, before its task.
    pub fn register_fork_handler(&self, hook: impl FnOnce() + 'static) -> HookIndex {
        self.shared.hooks.borrow_mut().register(Box::new(hook))
    }

    /// Cancels a pending fork hook. Already consumed or unknown indices are ignored.
    pub fn cancel_fork_handler(&self, index: HookIndex) {
        self.shared.hooks.borrow_mut().cancel(index);
    }

    /// Subscribes `handler` to `signal` through the scheduler.
    pub fn on_signal(
        &self,
        signal: Signal,
        handler: impl FnMut() + 'static,
    ) -> Result<SubscriptionId, ProcessError> {
        Ok(self.shared.driver.on_signal(signal, Box::new(handler))?)
    }

    /// Drains terminated children now, as a SIGCHLD delivery would.
    ///
    /// Returns the number of pids reaped (tracked or not).
    pub fn reap(&self) -> usize {
        reaper::drain(&self.shared)
    }

    /// Sends the teardown signal to every tracked child without waiting.
    ///
    /// Entries stay registered: the children are still reaped (and completed as
    /// abnormal) by the next SIGCHLD. Returns the number of signals delivered.
    pub fn shutdown(&self) -> usize {
        shutdown::signal_all(&self.shared)
    }
}

impl<D: Driver, O: Os> Supervisor<D, O> {
    /// Pid of the calling process.
    pub fn get_pid(&self) -> Pid {
        self.shared.os.getpid()
    }

    /// Pid of the parent of the calling process.
    pub fn get_ppid(&self) -> Pid {
        self.shared.os.getppid()
    }

    /// Creates a receiver for subsequent runtime events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.shared.bus.subscribe()
    }

    /// Pids of the children currently tracked, sorted.
    pub fn tracked(&self) -> Vec<Pid> {
        self.shared.registry.borrow().pids()
    }

    /// Sends `signal` to `pid` through this supervisor's [`Os`].
    ///
    /// The child stays tracked; its handle completes once it is reaped.
    pub fn kill(&self, pid: Pid, signal: Signal) -> nix::Result<()> {
        self.shared.os.kill(pid, signal)
    }

    /// Records of the children currently tracked, sorted by pid.
    pub fn children(&self) -> Vec<ChildRecord> {
        self.shared.registry.borrow().records()
    }

    /// Number of fork hooks waiting for the next fork.
    pub fn pending_fork_handlers(&self) -> usize {
        self.shared.hooks.borrow().len()
    }

    /// The scheduler this supervisor is attached to.
    pub fn driver(&self) -> &D {
        &self.shared.driver
    }

    /// The os primitives this supervisor uses.
    pub fn os(&self) -> &O {
        &self.shared.os
    }

    /// Configuration in effect.
    pub fn config(&self) -> &Config {
        &self.shared.cfg
    }
}
