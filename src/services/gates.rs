//! Per-session locking
//!
//! Each session id gets a gate with two async mutexes. `op` serialises the
//! handler-driven operations (advance, pause, resume) for one session;
//! `commit` guards read-modify-write of the stored snapshot and is the only
//! lock cancel, cleanup and delete need, so they never wait on a handler.
//!
//! Gates only live while some operation holds them. Handles are handed out
//! and released under the table lock, so an entry is dropped exactly when
//! its last holder lets go and two holders never see different gates.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;

#[derive(Debug, Default)]
pub struct SessionGate {
    pub op: AsyncMutex<()>,
    pub commit: AsyncMutex<()>,
}

/// Gate table keyed by session id
#[derive(Debug, Default)]
pub struct SessionGates {
    gates: Mutex<HashMap<String, Arc<SessionGate>>>,
}

impl SessionGates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gate for `id`, created on first use and removed when the last
    /// returned handle is dropped
    pub fn gate(&self, id: &str) -> GateHandle<'_> {
        let mut gates = self.gates.lock();
        let gate = Arc::clone(gates.entry(id.to_string()).or_default());
        GateHandle {
            gates: self,
            id: id.to_string(),
            gate,
        }
    }

    fn release(&self, id: &str, gate: &Arc<SessionGate>) {
        let mut gates = self.gates.lock();
        // the table and the releasing handle are the only owners left
        let idle = gates
            .get(id)
            .is_some_and(|entry| Arc::ptr_eq(entry, gate) && Arc::strong_count(entry) == 2);
        if idle {
            gates.remove(id);
        }
    }

    /// Number of ids with an operation in flight
    pub fn len(&self) -> usize {
        self.gates.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Held gate; releases its table entry on drop
#[derive(Debug)]
pub struct GateHandle<'a> {
    gates: &'a SessionGates,
    id: String,
    gate: Arc<SessionGate>,
}

impl GateHandle<'_> {
    pub fn shares(&self, other: &GateHandle<'_>) -> bool {
        Arc::ptr_eq(&self.gate, &other.gate)
    }
}

impl Deref for GateHandle<'_> {
    type Target = SessionGate;

    fn deref(&self) -> &SessionGate {
        &self.gate
    }
}

impl Drop for GateHandle<'_> {
    fn drop(&mut self) {
        self.gates.release(&self.id, &self.gate);
    }
}
