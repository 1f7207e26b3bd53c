//! Runtime core: forking, reaping and lifecycle.
//!
//! The public API from this module is [`Supervisor`] (built through
//! [`SupervisorBuilder`]), its [`Config`], and the [`ProcessHandle`] a spawn returns.
//!
//! Internal modules:
//! - [`fork`]: fork orchestration, parent/child branching and the fork notice;
//! - [`reaper`]: drains terminated children and completes their handles;
//! - [`signals`]: subscribes the reaper to SIGCHLD through the driver;
//! - [`registry`]: pid → pending completion bookkeeping;
//! - [`hooks`]: one-shot callbacks run in the child after a fork;
//! - [`shutdown`]: teardown signalling of tracked children.

mod builder;
mod config;
mod fork;
mod handle;
mod hooks;
mod reaper;
mod registry;
mod shutdown;
mod signals;
mod supervisor;

#[cfg(test)]
mod testing;

pub use builder::SupervisorBuilder;
pub use config::Config;
pub use handle::{ChildRecord, Completion, PendingCompletion, ProcessHandle};
pub use hooks::{ForkHook, ForkHooks, HookIndex, HookPanic};
pub use registry::ProcessRegistry;
pub use supervisor::Supervisor;
