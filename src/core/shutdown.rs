//! # Teardown: signal every tracked child, wait for none.
//!
//! Runs when the last [`Supervisor`](crate::Supervisor) clone is dropped, or on
//! an explicit `shutdown()`. Each tracked child receives the configured teardown
//! signal (`SIGKILL` by default). Delivery failures (the child already exited but
//! was not reaped yet) are logged and skipped; teardown never blocks on `waitpid`.

use tracing::{debug, info};

use crate::core::supervisor::Shared;
use crate::driver::Driver;
use crate::events::{Event, EventKind};
use crate::os::Os;

/// Sends the teardown signal to every tracked child.
///
/// Returns how many signals were delivered.
pub(crate) fn signal_all<D: Driver, O: Os>(shared: &Shared<D, O>) -> usize {
    let signal = shared.cfg.teardown_signal;
    let records = shared.registry.borrow().records();
    if records.is_empty() {
        return 0;
    }

    let mut delivered = 0;
    for record in &records {
        let pid = record.pid.as_raw();
        let ev = Event::new(EventKind::TeardownSignaled)
            .with_pid(pid)
            .with_signal(signal);

        match shared.os.kill(record.pid, signal) {
            Ok(()) => {
                delivered += 1;
                shared.bus.publish(ev);
            }
            Err(e) => {
                debug!(pid, signal = signal.as_str(), error = %e, "teardown signal not delivered");
                shared.bus.publish(ev.with_reason(e.desc()));
            }
        }
    }
    info!(
        tracked = records.len(),
        delivered,
        signal = signal.as_str(),
        "supervisor teardown"
    );
    delivered
}
