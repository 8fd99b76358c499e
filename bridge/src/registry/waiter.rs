//! Pending `use_service` callers

use std::cell::RefCell;
use std::rc::Weak;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::directory::{RegistryState, ServiceHandle};

/// A caller waiting for a name to be provided
pub(super) struct Waiter {
    pub(super) id: u64,
    pub(super) tx: oneshot::Sender<ServiceHandle>,
    pub(super) deadline: Instant,
}

impl Waiter {
    /// Still waiting: the caller hasn't gone away and the deadline hasn't passed
    pub(super) fn is_live(&self, now: Instant) -> bool {
        !self.tx.is_closed() && now < self.deadline
    }
}

/// Removes its waiter when the owning future completes, times out, or is dropped
pub(super) struct WaiterGuard {
    state: Weak<RefCell<RegistryState>>,
    name: String,
    id: u64,
}

impl WaiterGuard {
    pub(super) fn new(state: Weak<RefCell<RegistryState>>, name: &str, id: u64) -> Self {
        Self {
            state,
            name: name.to_string(),
            id,
        }
    }
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let Ok(mut state) = state.try_borrow_mut() else {
            // The next provide or use_handle for this name prunes the dead sender
            warn!(name = %self.name, id = self.id, "WaiterGuard::drop: registry busy, waiter left for pruning");
            return;
        };
        if let Some(waiters) = state.waiters.get_mut(&self.name) {
            let before = waiters.len();
            waiters.retain(|w| w.id != self.id);
            if waiters.len() != before {
                debug!(name = %self.name, id = self.id, "WaiterGuard::drop: removed pending waiter");
            }
            if waiters.is_empty() {
                state.waiters.remove(&self.name);
            }
        }
    }
}
