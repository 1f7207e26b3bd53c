//! Scripted [`Os`] and [`Driver`] doubles for unit tests.
//!
//! `MockOs::exit` and the end of a mocked loop unwind with [`ChildExit`] /
//! [`LoopDrained`] payloads, so a test can follow the child branch of a fork in-process.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io;
use std::panic;
use std::rc::Rc;

use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::{WaitPidFlag, WaitStatus};
use nix::unistd::{ForkResult, Pid};

use crate::core::{Config, Supervisor, SupervisorBuilder};
use crate::driver::{Callback, Driver, SignalHandler, SubscriptionId};
use crate::os::Os;

/// Unwind payload of [`MockOs::exit`].
#[derive(Debug)]
pub(crate) struct ChildExit(pub(crate) i32);

/// Unwind payload of a mocked loop that ran out of work after a reinstall.
#[derive(Debug)]
pub(crate) struct LoopDrained;

pub(crate) fn harness(cfg: Config, driver: &MockDriver, os: &MockOs) -> Supervisor<MockDriver, MockOs> {
    SupervisorBuilder::new(cfg)
        .with_driver(driver.clone())
        .with_os(os.clone())
        .build()
        .expect("mock driver never fails to subscribe")
}

#[derive(Default)]
struct OsState {
    forks: VecDeque<nix::Result<ForkResult>>,
    waits: VecDeque<nix::Result<WaitStatus>>,
    wait_calls: usize,
    last_wait_flags: Option<WaitPidFlag>,
    kills: Vec<(Pid, Signal)>,
    kill_errors: HashMap<Pid, Errno>,
}

#[derive(Clone, Default)]
pub(crate) struct MockOs {
    state: Rc<RefCell<OsState>>,
}

impl MockOs {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_fork(&self, result: nix::Result<ForkResult>) {
        self.state.borrow_mut().forks.push_back(result);
    }

    pub(crate) fn push_wait(&self, result: nix::Result<WaitStatus>) {
        self.state.borrow_mut().waits.push_back(result);
    }

    pub(crate) fn fail_kill(&self, pid: Pid, errno: Errno) {
        self.state.borrow_mut().kill_errors.insert(pid, errno);
    }

    pub(crate) fn kills(&self) -> Vec<(Pid, Signal)> {
        self.state.borrow().kills.clone()
    }

    pub(crate) fn wait_calls(&self) -> usize {
        self.state.borrow().wait_calls
    }

    pub(crate) fn pending_waits(&self) -> usize {
        self.state.borrow().waits.len()
    }

    pub(crate) fn last_wait_flags(&self) -> Option<WaitPidFlag> {
        self.state.borrow().last_wait_flags
    }
}

impl Os for MockOs {
    unsafe fn fork(&self) -> nix::Result<ForkResult> {
        self.state
            .borrow_mut()
            .forks
            .pop_front()
            .unwrap_or(Err(Errno::EAGAIN))
    }

    fn try_wait_any(&self, flags: WaitPidFlag) -> nix::Result<WaitStatus> {
        let mut st = self.state.borrow_mut();
        st.wait_calls += 1;
        st.last_wait_flags = Some(flags);
        st.waits.pop_front().unwrap_or(Ok(WaitStatus::StillAlive))
    }

    fn kill(&self, pid: Pid, signal: Signal) -> nix::Result<()> {
        let mut st = self.state.borrow_mut();
        st.kills.push((pid, signal));
        match st.kill_errors.get(&pid) {
            Some(errno) => Err(*errno),
            None => Ok(()),
        }
    }

    fn getpid(&self) -> Pid {
        Pid::from_raw(1000)
    }

    fn getppid(&self) -> Pid {
        Pid::from_raw(1)
    }

    fn exit(&self, code: i32) -> ! {
        panic::panic_any(ChildExit(code))
    }
}

#[derive(Default)]
struct DriverState {
    running: bool,
    next_id: u64,
    handlers: BTreeMap<SubscriptionId, (Signal, Rc<RefCell<SignalHandler>>)>,
    deferred: VecDeque<Callback>,
    fresh_installs: usize,
    runs: usize,
    reinstalls: Vec<bool>,
}

/// Driver whose safe points are triggered by the test (`deliver`, `run`).
#[derive(Clone, Default)]
pub(crate) struct MockDriver {
    state: Rc<RefCell<DriverState>>,
}

impl MockDriver {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.state.borrow_mut().running = running;
    }

    /// Dispatches `signal` to its subscribers, as a safe point would.
    pub(crate) fn deliver(&self, signal: Signal) {
        let handlers: Vec<_> = self
            .state
            .borrow()
            .handlers
            .values()
            .filter(|(sig, _)| *sig == signal)
            .map(|(_, handler)| Rc::clone(handler))
            .collect();
        for handler in handlers {
            (handler.borrow_mut())();
        }
    }

    pub(crate) fn subscriptions(&self, signal: Signal) -> usize {
        self.state
            .borrow()
            .handlers
            .values()
            .filter(|(sig, _)| *sig == signal)
            .count()
    }

    pub(crate) fn fresh_installs(&self) -> usize {
        self.state.borrow().fresh_installs
    }

    pub(crate) fn runs(&self) -> usize {
        self.state.borrow().runs
    }

    pub(crate) fn reinstalls(&self) -> Vec<bool> {
        self.state.borrow().reinstalls.clone()
    }

    fn drain_deferred(&self) {
        loop {
            let next = self.state.borrow_mut().deferred.pop_front();
            match next {
                Some(callback) => callback(),
                None => break,
            }
        }
    }
}

impl Driver for MockDriver {
    fn on_signal(&self, signal: Signal, handler: SignalHandler) -> io::Result<SubscriptionId> {
        let mut st = self.state.borrow_mut();
        let id = SubscriptionId(st.next_id);
        st.next_id += 1;
        st.handlers
            .insert(id, (signal, Rc::new(RefCell::new(handler))));
        Ok(id)
    }

    fn cancel_signal(&self, id: SubscriptionId) {
        self.state.borrow_mut().handlers.remove(&id);
    }

    fn defer(&self, callback: Callback) {
        self.state.borrow_mut().deferred.push_back(callback);
    }

    fn is_running(&self) -> bool {
        self.state.borrow().running
    }

    fn install_fresh(&self) {
        let mut st = self.state.borrow_mut();
        st.running = false;
        st.handlers.clear();
        st.deferred.clear();
        st.fresh_installs += 1;
    }

    fn run(&self) -> io::Result<()> {
        self.state.borrow_mut().runs += 1;
        self.drain_deferred();
        Ok(())
    }

    fn reinstall_and_resume(&self, entry: Callback, preserve_subscriptions: bool) -> ! {
        {
            let mut st = self.state.borrow_mut();
            st.reinstalls.push(preserve_subscriptions);
            st.deferred.clear();
            if !preserve_subscriptions {
                st.handlers.clear();
            }
        }
        entry();
        self.drain_deferred();
        panic::panic_any(LoopDrained)
    }
}
