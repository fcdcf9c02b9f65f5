use anyhow::Result;
use gatekeeper_core::status::{ServiceState, ServiceStatus, StatusProvider};
use parking_lot::Mutex;

/// Lifecycle state reported over the status channel.
pub(crate) struct ServiceStatusTracker {
    state: Mutex<ServiceState>,
}

impl ServiceStatusTracker {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(ServiceState::StartPending),
        }
    }

    pub(crate) fn set(&self, state: ServiceState) {
        *self.state.lock() = state;
    }
}

impl StatusProvider for ServiceStatusTracker {
    fn status(&self) -> Result<ServiceStatus> {
        let state = *self.state.lock();
        let running = state == ServiceState::Running;
        // pausing is not supported by this service
        Ok(ServiceStatus {
            state,
            can_pause: false,
            can_stop: running,
            can_shutdown: running,
        })
    }
}
