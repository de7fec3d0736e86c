//! Producer side of the gate

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::listener::{ListenerId, ListenerSlot, ReadinessListener};

const READY_MASK: u64 = 0xFFFF_FFFF;
const LISTENER_SHIFT: u32 = 32;

fn pack(listeners: u32, ready: u32) -> u64 {
    ((listeners as u64) << LISTENER_SHIFT) | ready as u64
}

fn unpack(packed: u64) -> (u32, u32) {
    ((packed >> LISTENER_SHIFT) as u32, (packed & READY_MASK) as u32)
}

/// State shared between the gate and every listener it handed out
pub(crate) struct GateShared {
    counters: AtomicU64,
    listeners: Mutex<HashMap<ListenerId, Arc<ListenerSlot>>>,
    next_id: AtomicU64,
}

impl GateShared {
    /// Apply a delta to both counters in one step
    pub(crate) fn adjust(&self, listeners: i32, ready: i32) {
        let result = self
            .counters
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |packed| {
                let (l, r) = unpack(packed);
                let l = l.checked_add_signed(listeners)?;
                let r = r.checked_add_signed(ready)?;
                (r <= l).then(|| pack(l, r))
            });

        if let Err(packed) = result {
            let (l, r) = unpack(packed);
            tracing::error!(
                listeners = l,
                ready = r,
                listener_delta = listeners,
                ready_delta = ready,
                "Gate counter update rejected"
            );
            debug_assert!(false, "gate counters out of range");
        }
    }

    /// Remove a listener from the index. The slot itself is released by the caller.
    pub(crate) fn forget(&self, id: ListenerId) {
        self.listeners.lock().remove(&id);
    }
}

/// Snapshot of both counters taken from a single load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GateSnapshot {
    pub listeners: u32,
    pub ready: u32,
}

/// Diagnostic state of a gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// Nobody is watching the stream
    NoListeners,
    /// Consumers exist but all of them are busy
    NoneReady,
    /// At least one consumer can take a frame
    Ready,
}

impl GateState {
    pub fn description(&self) -> &'static str {
        match self {
            GateState::NoListeners => "no listeners",
            GateState::NoneReady => "listeners present, none ready",
            GateState::Ready => "ready",
        }
    }
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Lock-free readiness gate for one capture stream
///
/// Cloning is cheap and yields a handle to the same gate.
#[derive(Clone)]
pub struct FrameGate {
    shared: Arc<GateShared>,
}

impl FrameGate {
    /// Create a gate with no listeners
    pub fn new() -> Self {
        Self {
            shared: Arc::new(GateShared {
                counters: AtomicU64::new(0),
                listeners: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register a new consumer
    ///
    /// The consumer decides whether it starts out ready.
    pub fn create_listener(&self, initially_ready: bool) -> ReadinessListener {
        let id = ListenerId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let slot = Arc::new(ListenerSlot::new(initially_ready));

        {
            let mut listeners = self.shared.listeners.lock();
            self.shared.adjust(1, initially_ready as i32);
            listeners.insert(id, Arc::clone(&slot));
        }

        tracing::trace!(listener = %id, ready = initially_ready, "Listener registered");

        ReadinessListener::new(id, slot, Arc::clone(&self.shared))
    }

    /// Whether at least one consumer can accept a frame right now
    #[inline]
    pub fn can_send(&self) -> bool {
        self.shared.counters.load(Ordering::Acquire) & READY_MASK != 0
    }

    pub fn ready_count(&self) -> u32 {
        self.snapshot().ready
    }

    pub fn listener_count(&self) -> u32 {
        self.snapshot().listeners
    }

    /// Both counters from one load, so they are mutually consistent
    pub fn snapshot(&self) -> GateSnapshot {
        let (listeners, ready) = unpack(self.shared.counters.load(Ordering::Acquire));
        GateSnapshot { listeners, ready }
    }

    pub fn state(&self) -> GateState {
        let snap = self.snapshot();
        if snap.listeners == 0 {
            GateState::NoListeners
        } else if snap.ready == 0 {
            GateState::NoneReady
        } else {
            GateState::Ready
        }
    }

    pub fn state_description(&self) -> &'static str {
        self.state().description()
    }

    /// Deregister one listener from the gate side
    ///
    /// The consumer's handle stays valid but inert. Returns false if the
    /// listener was already gone.
    pub fn revoke(&self, id: ListenerId) -> bool {
        let slot = self.shared.listeners.lock().remove(&id);
        match slot {
            Some(slot) => slot.release(&self.shared),
            None => false,
        }
    }

    /// Deregister every listener, returning how many were still registered
    pub fn revoke_all(&self) -> usize {
        let slots: Vec<Arc<ListenerSlot>> = {
            let mut listeners = self.shared.listeners.lock();
            listeners.drain().map(|(_, slot)| slot).collect()
        };

        slots
            .iter()
            .filter(|slot| slot.release(&self.shared))
            .count()
    }
}

impl Default for FrameGate {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FrameGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snap = self.snapshot();
        f.debug_struct("FrameGate")
            .field("listeners", &snap.listeners)
            .field("ready", &snap.ready)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::thread;

    #[test]
    fn test_no_listeners_cannot_send() {
        let gate = FrameGate::new();
        assert!(!gate.can_send());
        assert_eq!(gate.state(), GateState::NoListeners);
        assert_eq!(gate.state_description(), "no listeners");
    }

    #[test]
    fn test_two_idle_listeners_then_one_ready() {
        let gate = FrameGate::new();
        let a = gate.create_listener(false);
        let _b = gate.create_listener(false);

        assert!(!gate.can_send());
        assert_eq!(gate.state(), GateState::NoneReady);

        a.set_ready(true);
        assert!(gate.can_send());
        assert_eq!(gate.ready_count(), 1);
        assert_eq!(gate.listener_count(), 2);

        drop(a);
        assert!(!gate.can_send());
        assert_eq!(gate.listener_count(), 1);
        assert_eq!(gate.ready_count(), 0);
    }

    #[test]
    fn test_initially_ready_listener() {
        let gate = FrameGate::new();
        let listener = gate.create_listener(true);
        assert!(gate.can_send());
        assert_eq!(gate.state(), GateState::Ready);
        assert!(listener.is_ready());
    }

    #[test]
    fn test_set_ready_is_idempotent() {
        let gate = FrameGate::new();
        let listener = gate.create_listener(false);
        listener.set_ready(true);
        listener.set_ready(true);
        assert_eq!(gate.ready_count(), 1);
        listener.set_ready(false);
        listener.set_ready(false);
        assert_eq!(gate.ready_count(), 0);
    }

    #[test]
    fn test_revoke_all_makes_handles_inert() {
        let gate = FrameGate::new();
        let a = gate.create_listener(true);
        let b = gate.create_listener(false);

        assert_eq!(gate.revoke_all(), 2);
        assert_eq!(gate.snapshot(), GateSnapshot::default());

        assert!(!a.set_ready(true));
        assert!(!b.is_registered());
        assert!(!gate.can_send());

        drop(a);
        drop(b);
        assert_eq!(gate.listener_count(), 0);
    }

    #[test]
    fn test_revoke_single_listener() {
        let gate = FrameGate::new();
        let a = gate.create_listener(true);
        let b = gate.create_listener(true);

        assert!(gate.revoke(a.id()));
        assert!(!gate.revoke(a.id()));
        assert_eq!(gate.listener_count(), 1);
        assert_eq!(gate.ready_count(), 1);

        drop(b);
        assert_eq!(gate.listener_count(), 0);
    }

    #[test]
    fn test_counters_consistent_under_contention() {
        let gate = FrameGate::new();
        let stop = Arc::new(AtomicBool::new(false));

        let observer = {
            let gate = gate.clone();
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut observations = 0u64;
                while !stop.load(Ordering::Relaxed) {
                    let snap = gate.snapshot();
                    assert!(snap.ready <= snap.listeners, "{:?}", snap);
                    observations += 1;
                }
                observations
            })
        };

        let workers: Vec<_> = (0..8)
            .map(|i| {
                let gate = gate.clone();
                thread::spawn(move || {
                    for round in 0..500 {
                        let listener = gate.create_listener(round % 2 == 0);
                        listener.set_ready(true);
                        listener.set_ready(false);
                        listener.set_ready(true);
                        if (round + i) % 3 == 0 {
                            listener.deregister();
                        }
                        if round % 50 == 0 {
                            gate.revoke(listener.id());
                        }
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        stop.store(true, Ordering::Relaxed);
        assert!(observer.join().unwrap() > 0);

        assert_eq!(gate.snapshot(), GateSnapshot::default());
        assert!(!gate.can_send());
    }
}
