//! Lifecycle state machine (§4.1).
//!
//! A single enum-valued variable with a narrow transition API, guarded so
//! that once `Closed` is reached no further transition occurs. Reads and
//! writes of the state happen under the *state lock*, a
//! `std::sync::Mutex` distinct from the write lock guarding the transport
//! half, to avoid lock-ordering hazards (§5).

use std::sync::Mutex;

/// Coarse phase of the handler's relationship with a single transport
/// attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    NotConnected,
    Registered,
    Connected,
    Activating,
    Active,
    Disconnected,
    Deactivating,
    Deactivated,
    /// Terminal. No transition out of `Closed` is ever permitted.
    Closed,
}

impl LifecycleState {
    /// True iff the transport is still usable for in-flight accounting:
    /// `Connected`, `Activating`, `Active`, or `Disconnected` (§4.1).
    ///
    /// Implemented as an explicit match rather than an integer ordinal
    /// range (the source idiom) — see DESIGN.md for why.
    pub fn is_connected(self) -> bool {
        matches!(
            self,
            LifecycleState::Connected
                | LifecycleState::Activating
                | LifecycleState::Active
                | LifecycleState::Disconnected
        )
    }

    pub fn is_closed(self) -> bool {
        matches!(self, LifecycleState::Closed)
    }
}

/// Guards the lifecycle enum under the state lock.
#[derive(Debug)]
pub(crate) struct LifecycleDriver {
    state: Mutex<LifecycleState>,
}

impl LifecycleDriver {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(LifecycleState::NotConnected),
        }
    }

    pub(crate) fn get(&self) -> LifecycleState {
        *self.state.lock().unwrap()
    }

    /// Transition unconditionally unless the current state is `Closed`, in
    /// which case this is a no-op. Returns the state after the attempted
    /// transition.
    pub(crate) fn set_if_not_closed(&self, next: LifecycleState) -> LifecycleState {
        let mut guard = self.state.lock().unwrap();
        if !guard.is_closed() {
            *guard = next;
        }
        *guard
    }

    /// Unconditional transition to `Closed`. Idempotent: closing an
    /// already-closed handler is a no-op and reports so via the return
    /// value.
    pub(crate) fn close(&self) -> bool {
        let mut guard = self.state.lock().unwrap();
        if guard.is_closed() {
            false
        } else {
            *guard = LifecycleState::Closed;
            true
        }
    }
}
