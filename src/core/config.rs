//! # Global supervisor configuration.
//!
//! Provides [`Config`] centralized settings for the fork supervisor.
//!
//! Config is consumed once, by `Supervisor::builder(config)`; it is copied into
//! the supervisor and inherited unchanged by every forked child.

use nix::sys::signal::Signal;
use nix::sys::wait::WaitPidFlag;

/// Global configuration for the fork supervisor.
///
/// ## Field semantics
/// - `bus_capacity`: Event bus ring buffer size (min 1; clamped by Bus)
/// - `teardown_signal`: Signal sent to every tracked child when the supervisor is torn down
/// - `report_stopped`: Also reap stopped children (`WUNTRACED`); they are completed as abnormal
/// - `preserve_subscriptions`: Keep signal subscriptions across a mid-loop reinstall in the child
/// - `exit_code`: Status a child exits with when its task finished synchronously
#[derive(Clone, Debug)]
pub struct Config {
    /// Capacity of the event bus broadcast channel ring buffer.
    ///
    /// Slow receivers that lag behind more than `bus_capacity` messages will
    /// receive `Lagged` and skip older items.
    pub bus_capacity: usize,

    /// Signal sent to still-tracked children on teardown.
    ///
    /// Teardown is fire-and-forget: nothing waits for the children to die.
    pub teardown_signal: Signal,

    /// Include stopped children in the reap loop.
    ///
    /// A stopped child is reported once by `waitpid(WUNTRACED)`; its completion is
    /// rejected as abnormal and the entry removed, even though the process may later
    /// continue.
    pub report_stopped: bool,

    /// Signal subscriptions made by other subsystems survive a reinstall in a
    /// child forked from inside a running loop.
    pub preserve_subscriptions: bool,

    /// Exit status of a child whose task returned `Some(_)`.
    pub exit_code: i32,
}

impl Config {
    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Flags passed to the non-blocking wait, on top of `WNOHANG`.
    #[inline]
    pub fn wait_flags(&self) -> WaitPidFlag {
        if self.report_stopped {
            WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED
        } else {
            WaitPidFlag::WNOHANG
        }
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `bus_capacity = 1024`
    /// - `teardown_signal = SIGKILL`
    /// - `report_stopped = true`
    /// - `preserve_subscriptions = true`
    /// - `exit_code = 0`
    fn default() -> Self {
        Self {
            bus_capacity: 1024,
            teardown_signal: Signal::SIGKILL,
            report_stopped: true,
            preserve_subscriptions: true,
            exit_code: 0,
        }
    }
}
