//! SIGCHLD bridge: connects the scheduler's signal dispatch to the reaper.

use std::rc::Rc;

use nix::sys::signal::Signal;
use tracing::trace;

use crate::core::reaper;
use crate::core::supervisor::Shared;
use crate::driver::Driver;
use crate::error::ProcessError;
use crate::os::Os;

/// (Re)subscribes the reaper to SIGCHLD and queues one drain.
///
/// A previous subscription of this supervisor is cancelled first, so a child that
/// inherited its parent's subscriptions never drains twice per delivery. The queued
/// drain picks up children that ended before the loop started listening.
pub(crate) fn install_reaper<D, O>(shared: &Rc<Shared<D, O>>) -> Result<(), ProcessError>
where
    D: Driver + 'static,
    O: Os + 'static,
{
    if let Some(previous) = shared.sigchld.take() {
        shared.driver.cancel_signal(previous);
    }

    let weak = Rc::downgrade(shared);
    let id = shared.driver.on_signal(
        Signal::SIGCHLD,
        Box::new(move || {
            if let Some(shared) = weak.upgrade() {
                reaper::drain(&shared);
            }
        }),
    )?;
    shared.sigchld.set(Some(id));
    trace!(subscription = id.as_u64(), "reaper subscribed to SIGCHLD");

    let weak = Rc::downgrade(shared);
    shared.driver.defer(Box::new(move || {
        if let Some(shared) = weak.upgrade() {
            reaper::drain(&shared);
        }
    }));
    Ok(())
}
