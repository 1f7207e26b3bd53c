//! # forkvisor
//!
//! **Forkvisor** forks child processes as tasks of a single-threaded cooperative
//! runtime and collects their exit status through SIGCHLD.
//!
//! Every [`Supervisor::spawn`] call forks the process. The parent gets a
//! [`ProcessHandle`] whose [`Completion`] resolves with the child's exit code once
//! the child is reaped; the child runs the task and either exits immediately or
//! keeps its own scheduler alive as a long-lived service.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   spawn(task)                                  register_fork_handler(hook)
//!        │                                                   │
//!        ▼                                                   ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Supervisor (composition root, Rc handle)                         │
//! │  - ProcessRegistry (pid → pending completion)                     │
//! │  - ForkHooks (one-shot callbacks for the next child)              │
//! │  - Bus (broadcast events)                                         │
//! │  - Driver (scheduler) + Os (fork / waitpid / kill)                │
//! └──────┬──────────────────────────────┬─────────────────────────────┘
//!        │ fork()                       │ SIGCHLD at a safe point
//!        ▼                              ▼
//! ┌──────────────────────┐     ┌──────────────────────────────┐
//! │ parent               │     │ reaper                       │
//! │  register(pid)       │     │  waitpid(-1, WNOHANG) loop   │
//! │  return handle       │     │  exited  ─► resolve(code)    │
//! ├──────────────────────┤     │  other   ─► reject(Abnormal) │
//! │ child                │     └──────────────────────────────┘
//! │  notice_fork:        │
//! │   clear registry     │
//! │   re-subscribe       │
//! │   run hooks          │
//! │  task ─► exit / loop │
//! └──────────────────────┘
//! ```
//!
//! ### Child lifecycle
//! ```text
//! task(args)
//!   ├─ Some(_) ─► exit(Config::exit_code)
//!   └─ None    ─► scheduler keeps running (service child)
//!                 └─ exits with 0 once the scheduler has nothing left to do
//! ```
//!
//! ## Features
//! | Area              | Description                                                   | Key types / traits                      |
//! |-------------------|---------------------------------------------------------------|-----------------------------------------|
//! | **Supervision**   | Fork tasks, track children, tear them down on drop.           | [`Supervisor`], [`ProcessHandle`]       |
//! | **Fork hooks**    | Reset per-process state in the child before its task runs.    | [`Supervisor::register_fork_handler`]   |
//! | **Scheduler**     | Safe-point signal dispatch and mid-loop reinstall after fork. | [`Driver`], [`LocalDriver`]             |
//! | **OS primitives** | fork, non-blocking wait, kill, pids.                          | [`Os`], [`SystemOs`]                    |
//! | **Events**        | Broadcast of spawn, reap, hook and teardown events.           | [`Event`], [`EventKind`]                |
//! | **Errors**        | Typed errors for fork failures and abnormal termination.      | [`ProcessError`]                        |
//! | **Configuration** | Teardown signal, exit code, stopped-child reporting.          | [`Config`]                              |
//!
//! ## Example
//! ```rust,no_run
//! use forkvisor::{Config, ProcessError, Supervisor};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sup = Supervisor::new(Config::default())?;
//!
//!     // Runs in the next child only, before its task.
//!     sup.register_fork_handler(|| {
//!         // e.g. drop connections inherited from the parent
//!     });
//!
//!     let done = sup.spawn(|| {
//!         println!("hello from the child");
//!         Some(())
//!     })?;
//!     let killed = sup.spawn_with(3, |n: u32| {
//!         std::thread::sleep(std::time::Duration::from_secs(n.into()));
//!         Some(())
//!     })?;
//!     killed.signal(nix::sys::signal::Signal::SIGKILL)?;
//!
//!     sup.driver().block_on(async move {
//!         assert_eq!(done.completion.await?, 0);
//!         assert!(matches!(killed.completion.await, Err(ProcessError::Abnormal { .. })));
//!         Ok::<(), ProcessError>(())
//!     })??;
//!     Ok(())
//! }
//! ```
mod core;
mod driver;
mod error;
mod events;
mod os;

// ---- Public re-exports ----

pub use core::{
    ChildRecord, Completion, Config, ForkHook, ForkHooks, HookIndex, HookPanic, PendingCompletion,
    ProcessHandle, ProcessRegistry, Supervisor, SupervisorBuilder,
};
pub use driver::{Callback, Driver, LocalDriver, SignalHandler, SubscriptionId};
pub use error::ProcessError;
pub use events::{Bus, Event, EventKind};
pub use os::{Os, SystemOs};
