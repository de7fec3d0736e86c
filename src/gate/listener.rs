//! Consumer side of the gate

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::sender::GateShared;

/// Opaque identity of a listener within its gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(crate) u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

struct SlotState {
    ready: bool,
    registered: bool,
}

/// Per-listener state shared between the handle and the gate index
pub(crate) struct ListenerSlot {
    state: Mutex<SlotState>,
}

impl ListenerSlot {
    pub(crate) fn new(ready: bool) -> Self {
        Self {
            state: Mutex::new(SlotState {
                ready,
                registered: true,
            }),
        }
    }

    /// Take this slot out of the counters. Only the first call has an effect.
    pub(crate) fn release(&self, shared: &GateShared) -> bool {
        let mut state = self.state.lock();
        if !state.registered {
            return false;
        }
        state.registered = false;
        let was_ready = std::mem::replace(&mut state.ready, false);
        shared.adjust(-1, if was_ready { -1 } else { 0 });
        true
    }
}

/// A consumer's declaration of readiness on one [`FrameGate`](super::FrameGate)
///
/// Dropping the listener deregisters it.
pub struct ReadinessListener {
    id: ListenerId,
    slot: Arc<ListenerSlot>,
    shared: Arc<GateShared>,
}

impl ReadinessListener {
    pub(crate) fn new(id: ListenerId, slot: Arc<ListenerSlot>, shared: Arc<GateShared>) -> Self {
        Self { id, slot, shared }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Declare whether this consumer can take another frame
    ///
    /// Returns false without touching the gate once the listener has been
    /// deregistered.
    pub fn set_ready(&self, ready: bool) -> bool {
        let mut state = self.slot.state.lock();
        if !state.registered {
            return false;
        }
        if state.ready != ready {
            state.ready = ready;
            self.shared.adjust(0, if ready { 1 } else { -1 });
        }
        true
    }

    pub fn is_ready(&self) -> bool {
        let state = self.slot.state.lock();
        state.registered && state.ready
    }

    pub fn is_registered(&self) -> bool {
        self.slot.state.lock().registered
    }

    /// Leave the gate now instead of waiting for drop
    pub fn deregister(&self) -> bool {
        let released = self.slot.release(&self.shared);
        if released {
            self.shared.forget(self.id);
            tracing::trace!(listener = %self.id, "Listener deregistered");
        }
        released
    }
}

impl Drop for ReadinessListener {
    fn drop(&mut self) {
        self.deregister();
    }
}

impl fmt::Debug for ReadinessListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.slot.state.lock();
        f.debug_struct("ReadinessListener")
            .field("id", &self.id)
            .field("ready", &state.ready)
            .field("registered", &state.registered)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::gate::FrameGate;

    #[test]
    fn test_drop_deregisters_once() {
        let gate = FrameGate::new();
        let listener = gate.create_listener(true);
        assert!(listener.deregister());
        assert!(!listener.deregister());
        assert_eq!(gate.listener_count(), 0);

        drop(listener);
        assert_eq!(gate.listener_count(), 0);
        assert_eq!(gate.ready_count(), 0);
    }

    #[test]
    fn test_drop_without_explicit_deregister() {
        let gate = FrameGate::new();
        let keep = gate.create_listener(false);
        {
            let _scoped = gate.create_listener(true);
            assert_eq!(gate.listener_count(), 2);
        }
        assert_eq!(gate.listener_count(), 1);
        assert!(!gate.can_send());
        assert!(keep.is_registered());
    }

    #[test]
    fn test_set_ready_after_deregister_is_noop() {
        let gate = FrameGate::new();
        let listener = gate.create_listener(false);
        listener.deregister();
        assert!(!listener.set_ready(true));
        assert!(!listener.is_ready());
        assert!(!gate.can_send());
    }

    #[test]
    fn test_ids_are_unique() {
        let gate = FrameGate::new();
        let a = gate.create_listener(false);
        let b = gate.create_listener(false);
        assert_ne!(a.id(), b.id());
        assert!(a.id().to_string().starts_with("listener-"));
    }
}
