//! # LocalDriver: tokio `current_thread` runtime + `LocalSet`.
//!
//! ## Architecture
//! ```text
//! LocalDriver (Rc<RefCell<State>>, cheap clone)
//!   ├─ runtime + LocalSet: created on first use, kept between loop runs
//!   ├─ subscriptions: id → (signal, handler, pipe registration, listener task)
//!   └─ reinstall: entry handed over by a forked child
//!
//! signal ──► signal-hook handler ──► write(pipe) ──► listener task ──► handler()
//!
//! block_on(fut) / run()
//!   └─► drive():
//!         ├─ take the LocalSet, mark running
//!         ├─ poll until done ─┬─ fut ready / LocalSet idle ─► put LocalSet back
//!         │                   └─ reinstall requested ─────► resume_reinstalled() ─► exit
//!         └─ mark idle
//! ```
//!
//! ## Rules
//! - Signal handlers run inside local tasks: they are dispatched between two
//!   cooperative steps, never as interrupts.
//! - Each subscription owns a socket pair. The process-level handler only writes
//!   a byte to it; the listener task reads it and calls the handler.
//! - A subscription's pipe exists from the moment of subscription, so a delivery
//!   that happens while the loop is idle is dispatched at the next loop run.
//! - Deferred callbacks are local tasks; they run in submission order.
//! - After a fork, the inherited runtime is leaked rather than dropped: its
//!   destructors would deregister I/O sources that still belong to the parent.
//! - After a fork, inherited pipe registrations are removed and the read ends are
//!   never polled again. Subscriptions carried into the child get new pipes, so
//!   parent and child never read from the same signal pipe.
//! - A child that resumed never returns into the parent's call stack; it exits
//!   once its fresh loop drains.
//!
//! Tokio's own signal driver is not used: its self-pipe is process-wide and a
//! forked child would inherit it, racing the parent for SIGCHLD wakeups.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::future::Future;
use std::io;
use std::mem;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use nix::sys::signal::Signal;
use signal_hook::SigId;
use signal_hook::consts::FORBIDDEN;
use signal_hook::low_level::{self, pipe};
use tokio::net::UnixStream;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::Notify;
use tokio::task::{AbortHandle, LocalSet};
use tracing::{debug, error};

use super::{Callback, Driver, SignalHandler, SubscriptionId};

/// Unwind payload carrying a forked child out of the stale loop.
///
/// Code catching panics on the way up must let it through.
pub(crate) struct ReinstallUnwind;

struct Reinstall {
    entry: Callback,
    preserve_subscriptions: bool,
}

struct Subscription {
    signal: Signal,
    handler: Rc<RefCell<SignalHandler>>,
    registration: Option<SigId>,
    listener: Option<AbortHandle>,
}

#[derive(Default)]
struct State {
    running: bool,
    next_id: u64,
    subscriptions: BTreeMap<SubscriptionId, Subscription>,
    reinstall: Option<Reinstall>,
    wake: Option<Rc<Notify>>,
    // Declared before `runtime`: local tasks are dropped first.
    local: Option<LocalSet>,
    runtime: Option<Rc<Runtime>>,
}

impl Drop for State {
    fn drop(&mut self) {
        for sub in self.subscriptions.values_mut() {
            if let Some(registration) = sub.registration.take() {
                low_level::unregister(registration);
            }
        }
    }
}

/// Single-threaded cooperative scheduler on top of tokio.
///
/// Clones share the same scheduler state.
#[derive(Clone, Default)]
pub struct LocalDriver {
    state: Rc<RefCell<State>>,
}

impl LocalDriver {
    /// Creates an idle driver. The runtime is built on first use.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the loop until `fut` completes and returns its output.
    ///
    /// Local tasks still pending when `fut` completes stay queued for the next run.
    /// Fails if the loop is already running.
    pub fn block_on<F: Future>(&self, fut: F) -> io::Result<F::Output> {
        self.drive(|rt, local, wake| {
            local.block_on(rt, async move {
                tokio::select! {
                    biased;
                    () = wake.notified() => None,
                    out = fut => Some(out),
                }
            })
        })
    }

    /// Number of live signal subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.state.borrow().subscriptions.len()
    }

    fn runtime(&self) -> io::Result<Rc<Runtime>> {
        let mut st = self.state.borrow_mut();
        if let Some(rt) = &st.runtime {
            return Ok(Rc::clone(rt));
        }
        let rt = Rc::new(Builder::new_current_thread().enable_all().build()?);
        st.runtime = Some(Rc::clone(&rt));
        st.local = Some(LocalSet::new());
        Ok(rt)
    }

    /// Spawns the future built by `make` as a local task.
    ///
    /// `make` runs inside the runtime context. While the loop runs the task goes
    /// straight to the active `LocalSet`; otherwise it waits in the idle one.
    fn spawn<F>(&self, make: impl FnOnce() -> io::Result<F>) -> io::Result<AbortHandle>
    where
        F: Future<Output = ()> + 'static,
    {
        let rt = self.runtime()?;
        let _rt = rt.enter();
        let fut = make()?;

        let st = self.state.borrow();
        let task = match st.local.as_ref() {
            Some(local) => local.spawn_local(fut),
            None => tokio::task::spawn_local(fut),
        };
        Ok(task.abort_handle())
    }

    /// Opens a pipe for `sig` and spawns the task dispatching it to `handler`.
    fn attach(
        &self,
        sig: Signal,
        handler: &Rc<RefCell<SignalHandler>>,
    ) -> io::Result<(SigId, AbortHandle)> {
        let (registration, reader) = open_pipe(sig)?;
        let handler = Rc::clone(handler);
        match self.spawn(move || listen(reader, handler)) {
            Ok(listener) => Ok((registration, listener)),
            Err(e) => {
                low_level::unregister(registration);
                Err(e)
            }
        }
    }

    fn drive<T>(
        &self,
        step: impl FnOnce(&Runtime, &mut LocalSet, Rc<Notify>) -> Option<T>,
    ) -> io::Result<T> {
        let rt = self.runtime()?;
        let (mut local, wake) = {
            let mut st = self.state.borrow_mut();
            let Some(local) = st.local.take() else {
                return Err(io::Error::other("scheduler is already running"));
            };
            let wake = Rc::new(Notify::new());
            st.running = true;
            st.wake = Some(Rc::clone(&wake));
            (local, wake)
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| step(&rt, &mut local, wake)));
        {
            let mut st = self.state.borrow_mut();
            st.running = false;
            st.wake = None;
        }

        match outcome {
            Ok(Some(out)) => {
                self.state.borrow_mut().local = Some(local);
                Ok(out)
            }
            Ok(None) => self.resume_reinstalled(rt, local),
            Err(payload) if payload.is::<ReinstallUnwind>() => self.resume_reinstalled(rt, local),
            Err(payload) => {
                self.state.borrow_mut().local = Some(local);
                panic::resume_unwind(payload)
            }
        }
    }

    /// Leaks the runtime inherited from the parent along with its tasks, and
    /// removes the inherited pipe registrations.
    fn abandon_runtime(&self) {
        let mut st = self.state.borrow_mut();
        for sub in st.subscriptions.values_mut() {
            if let Some(registration) = sub.registration.take() {
                low_level::unregister(registration);
            }
            if let Some(listener) = sub.listener.take() {
                mem::forget(listener);
            }
        }
        if let Some(local) = st.local.take() {
            mem::forget(local);
        }
        if let Some(rt) = st.runtime.take() {
            mem::forget(rt);
        }
    }

    fn resume_reinstalled(&self, rt: Rc<Runtime>, local: LocalSet) -> ! {
        mem::forget(local);
        mem::forget(rt);
        self.abandon_runtime();
        self.resume_fresh()
    }

    fn resume_fresh(&self) -> ! {
        let pending = self.state.borrow_mut().reinstall.take();
        let Some(Reinstall {
            entry,
            preserve_subscriptions,
        }) = pending
        else {
            error!("scheduler woken for a reinstall without an entry");
            std::process::exit(1);
        };

        if let Err(e) = self.reattach(preserve_subscriptions) {
            error!(error = %e, "cannot reattach signal subscriptions");
            std::process::exit(1);
        }
        self.defer(entry);
        debug!(preserve_subscriptions, "resuming on a fresh scheduler");

        let code = match self.run() {
            Ok(()) => 0,
            Err(e) => {
                error!(error = %e, "fresh scheduler failed to start");
                1
            }
        };
        std::process::exit(code)
    }

    fn reattach(&self, preserve_subscriptions: bool) -> io::Result<()> {
        let carried: Vec<_> = {
            let mut st = self.state.borrow_mut();
            if !preserve_subscriptions {
                st.subscriptions.clear();
            }
            st.subscriptions
                .iter()
                .map(|(id, sub)| (*id, sub.signal, Rc::clone(&sub.handler)))
                .collect()
        };

        for (id, sig, handler) in carried {
            let (registration, listener) = self.attach(sig, &handler)?;
            if let Some(sub) = self.state.borrow_mut().subscriptions.get_mut(&id) {
                sub.registration = Some(registration);
                sub.listener = Some(listener);
            }
        }
        Ok(())
    }
}

/// Registers a socket pair written to by the process-level handler of `sig`.
///
/// Returns the registration and the read end.
fn open_pipe(sig: Signal) -> io::Result<(SigId, StdUnixStream)> {
    let raw = sig as i32;
    if FORBIDDEN.contains(&raw) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} cannot be handled", sig.as_str()),
        ));
    }
    let (reader, writer) = StdUnixStream::pair()?;
    reader.set_nonblocking(true)?;
    writer.set_nonblocking(true)?;
    let registration = pipe::register(raw, writer)?;
    Ok((registration, reader))
}

/// Builds the future dispatching wakeups read from `reader`.
///
/// Must be called inside the runtime context. Deliveries that piled up between
/// two reads are coalesced into one handler call.
fn listen(
    reader: StdUnixStream,
    handler: Rc<RefCell<SignalHandler>>,
) -> io::Result<impl Future<Output = ()> + 'static> {
    let reader = UnixStream::from_std(reader)?;
    Ok(async move {
        let mut buf = [0u8; 64];
        while reader.readable().await.is_ok() {
            let mut woken = false;
            loop {
                match reader.try_read(&mut buf) {
                    Ok(0) => return,
                    Ok(_) => woken = true,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => {
                        debug!(error = %e, "signal pipe failed; listener stops");
                        return;
                    }
                }
            }
            if woken {
                (handler.borrow_mut())();
            }
        }
    })
}

impl Driver for LocalDriver {
    fn on_signal(&self, sig: Signal, handler: SignalHandler) -> io::Result<SubscriptionId> {
        let handler = Rc::new(RefCell::new(handler));
        let (registration, listener) = self.attach(sig, &handler)?;

        let mut st = self.state.borrow_mut();
        let id = SubscriptionId(st.next_id);
        st.next_id += 1;
        st.subscriptions.insert(
            id,
            Subscription {
                signal: sig,
                handler,
                registration: Some(registration),
                listener: Some(listener),
            },
        );
        Ok(id)
    }

    fn cancel_signal(&self, id: SubscriptionId) {
        let Some(mut sub) = self.state.borrow_mut().subscriptions.remove(&id) else {
            return;
        };
        if let Some(registration) = sub.registration.take() {
            low_level::unregister(registration);
        }
        if let Some(listener) = sub.listener.take() {
            listener.abort();
        }
    }

    fn defer(&self, callback: Callback) {
        if let Err(e) = self.spawn(|| Ok(async move { callback() })) {
            error!(error = %e, "cannot build the scheduler; deferred callback dropped");
        }
    }

    fn is_running(&self) -> bool {
        self.state.borrow().running
    }

    fn install_fresh(&self) {
        self.abandon_runtime();
        let mut st = self.state.borrow_mut();
        st.running = false;
        st.wake = None;
        st.reinstall = None;
        st.subscriptions.clear();
    }

    fn run(&self) -> io::Result<()> {
        self.drive(|rt, local, wake| {
            rt.block_on(async move {
                tokio::select! {
                    biased;
                    () = wake.notified() => None,
                    () = local => Some(()),
                }
            })
        })
    }

    fn reinstall_and_resume(&self, entry: Callback, preserve_subscriptions: bool) -> ! {
        let wake = {
            let mut st = self.state.borrow_mut();
            st.reinstall = Some(Reinstall {
                entry,
                preserve_subscriptions,
            });
            st.wake.clone()
        };

        match wake {
            Some(wake) => {
                wake.notify_one();
                panic::resume_unwind(Box::new(ReinstallUnwind))
            }
            None => {
                self.abandon_runtime();
                self.resume_fresh()
            }
        }
    }
}
