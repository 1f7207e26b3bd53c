use std::rc::Rc;

use crate::core::signals;
use crate::core::supervisor::{Shared, Supervisor};
use crate::core::Config;
use crate::driver::{Driver, LocalDriver};
use crate::error::ProcessError;
use crate::os::{Os, SystemOs};

/// Builder for constructing a Supervisor with swapped collaborators.
///
/// By default the supervisor runs on a fresh [`LocalDriver`] and the real OS
/// ([`SystemOs`]). Pass a clone of an existing driver to share one scheduler
/// between several subsystems.
pub struct SupervisorBuilder<D = LocalDriver, O = SystemOs> {
    cfg: Config,
    driver: D,
    os: O,
}

impl SupervisorBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            driver: LocalDriver::new(),
            os: SystemOs,
        }
    }
}

impl<D, O> SupervisorBuilder<D, O> {
    /// Sets the scheduler the supervisor dispatches SIGCHLD through.
    pub fn with_driver<D2: Driver>(self, driver: D2) -> SupervisorBuilder<D2, O> {
        SupervisorBuilder {
            cfg: self.cfg,
            driver,
            os: self.os,
        }
    }

    /// Sets the process primitives (fork, wait, kill).
    pub fn with_os<O2: Os>(self, os: O2) -> SupervisorBuilder<D, O2> {
        SupervisorBuilder {
            cfg: self.cfg,
            driver: self.driver,
            os,
        }
    }
}

impl<D: Driver + 'static, O: Os + 'static> SupervisorBuilder<D, O> {
    /// Builds the supervisor and subscribes its reaper to SIGCHLD.
    ///
    /// Fails only if the driver refuses the SIGCHLD subscription.
    pub fn build(self) -> Result<Supervisor<D, O>, ProcessError> {
        let shared = Rc::new(Shared::new(self.cfg, self.driver, self.os));
        signals::install_reaper(&shared)?;
        Ok(Supervisor::from_shared(shared))
    }
}
