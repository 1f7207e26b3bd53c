//! # Scheduler contract consumed by the supervisor.
//!
//! The supervisor never owns an event loop; it talks to one through [`Driver`].
//! The contract mirrors what a cooperative, single-threaded scheduler offers:
//!
//! | Operation                | Used by                                               |
//! |--------------------------|-------------------------------------------------------|
//! | `on_signal`              | signal bridge (SIGCHLD → reaper), user passthrough    |
//! | `cancel_signal`          | re-registration of SIGCHLD after a fork               |
//! | `defer`                  | initial drain of children that ended before the loop  |
//! | `is_running`             | fork orchestrator, child branch selection             |
//! | `install_fresh` + `run`  | child forked from top-level code                      |
//! | `reinstall_and_resume`   | child forked from inside a running loop               |
//!
//! ## Safe-point dispatch
//! Signal handlers registered through [`Driver::on_signal`] **must** only run at
//! scheduler safe points (between two cooperative steps), never as a true
//! interrupt. The supervisor relies on this: registering a freshly forked pid
//! and returning its handle happen without a safe point in between, so a
//! SIGCHLD for that pid can never be processed before its entry exists.
//!
//! [`LocalDriver`] is the reference implementation on a tokio `current_thread`
//! runtime with a `LocalSet`.

mod local;

pub use local::LocalDriver;
pub(crate) use local::ReinstallUnwind;

use std::io;

use nix::sys::signal::Signal;

/// Callback invoked each time a subscribed signal is dispatched.
pub type SignalHandler = Box<dyn FnMut()>;

/// One-shot callback run by the scheduler.
pub type Callback = Box<dyn FnOnce()>;

/// Identifier of a signal subscription, used for cancellation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub(crate) u64);

impl SubscriptionId {
    /// Raw numeric value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Cooperative single-threaded scheduler, as seen by the supervisor.
pub trait Driver {
    /// Subscribes `handler` to `signal`; the handler runs at safe points only.
    fn on_signal(&self, signal: Signal, handler: SignalHandler) -> io::Result<SubscriptionId>;

    /// Drops a subscription. Unknown ids are ignored.
    fn cancel_signal(&self, id: SubscriptionId);

    /// Runs `callback` at the next safe point (or as soon as the loop starts).
    fn defer(&self, callback: Callback);

    /// True while the loop is executing in this process.
    fn is_running(&self) -> bool;

    /// Discards every piece of scheduler state (subscriptions, deferred work)
    /// and installs a fresh, idle instance.
    fn install_fresh(&self);

    /// Runs the loop until no work is left.
    fn run(&self) -> io::Result<()>;

    /// Swaps the scheduler internals mid-flight and resumes inside `entry`.
    ///
    /// Only meaningful in a forked child. The in-flight state inherited from the
    /// parent is abandoned, a fresh loop is installed, `entry` runs as its first
    /// callback and the loop then runs to completion. Signal subscriptions are
    /// carried over when `preserve_subscriptions` is set. Never returns: the
    /// process exits once the fresh loop drains.
    fn reinstall_and_resume(&self, entry: Callback, preserve_subscriptions: bool) -> !;
}
