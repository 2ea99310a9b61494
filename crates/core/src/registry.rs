//! The hub's client registry.
//!
//! An insertion-ordered set of `{session, descriptor}` pairs guarded for
//! concurrent mutation. Iteration always goes through [ClientRegistry::
//! snapshot] so callers never observe a half-applied mutation, and the
//! fan-out paths stay safe against clients joining or leaving mid-flight.

use cortex_api::*;
use std::sync::{Arc, Mutex};

/// One registered client: the delivery capability plus the descriptor
/// the client reported at join time.
#[derive(Debug, Clone)]
pub struct ClientEntry {
    /// The hub-side delivery handle. Exactly one per live client.
    pub session: DynSession,

    /// The client's self-reported identity. Immutable after join.
    pub descriptor: Arc<ClientDescriptor>,

    /// Hub wall-clock time the client was registered.
    pub joined: Timestamp,
}

/// The ordered, guarded client registry.
#[derive(Debug)]
pub struct ClientRegistry(Mutex<Inner>);

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistry {
    /// Construct an empty registry.
    pub fn new() -> Self {
        Self(Mutex::new(Inner {
            entries: Vec::new(),
        }))
    }

    /// Register a client. Returns the registry size after the insert.
    ///
    /// A client id can only be registered once; a second session
    /// claiming the same id is rejected as malformed input.
    pub fn insert(&self, entry: ClientEntry) -> CxResult<usize> {
        let mut inner = self.0.lock().unwrap();
        if inner
            .entries
            .iter()
            .any(|e| e.descriptor.id == entry.descriptor.id)
        {
            return Err(CxError::malformed(format!(
                "client id already registered: {}",
                entry.descriptor.id,
            )));
        }
        inner.entries.push(entry);
        Ok(inner.entries.len())
    }

    /// Remove the client owning the given session handle. Idempotent:
    /// the first caller gets the removed entry, later callers get None.
    pub fn remove_by_handle(&self, session: &DynSession) -> Option<ClientEntry> {
        let mut inner = self.0.lock().unwrap();
        let pos = inner
            .entries
            .iter()
            .position(|e| same_session(&e.session, session))?;
        Some(inner.entries.remove(pos))
    }

    /// Remove a client by id. Idempotent, like [Self::remove_by_handle].
    pub fn remove_by_id(&self, id: &ClientId) -> Option<ClientEntry> {
        let mut inner = self.0.lock().unwrap();
        let pos = inner.entries.iter().position(|e| e.descriptor.id == *id)?;
        Some(inner.entries.remove(pos))
    }

    /// Get a client by id.
    pub fn get(&self, id: &ClientId) -> Option<ClientEntry> {
        let inner = self.0.lock().unwrap();
        inner.entries.iter().find(|e| e.descriptor.id == *id).cloned()
    }

    /// An immutable copy of the registry, in insertion order.
    pub fn snapshot(&self) -> Vec<ClientEntry> {
        self.0.lock().unwrap().entries.clone()
    }

    /// Current registry size.
    pub fn len(&self) -> usize {
        self.0.lock().unwrap().entries.len()
    }

    /// True when no clients are registered.
    pub fn is_empty(&self) -> bool {
        self.0.lock().unwrap().entries.is_empty()
    }

    /// Find the registered client nearest to the probe descriptor.
    ///
    /// The probe itself (by id) is excluded. Non-finite distances are
    /// filtered out. Ties break toward insertion order. Returns None on
    /// an empty registry or when every candidate is non-finite.
    pub fn find_nearest(
        &self,
        probe: &ClientDescriptor,
    ) -> Option<(ClientEntry, f64)> {
        let inner = self.0.lock().unwrap();
        let mut best: Option<(&ClientEntry, f64)> = None;
        for entry in inner.entries.iter() {
            if entry.descriptor.id == probe.id {
                continue;
            }
            let d = vector_distance(&probe.vector, &entry.descriptor.vector);
            if !d.is_finite() {
                continue;
            }
            match best {
                Some((_, bd)) if bd <= d => {}
                _ => best = Some((entry, d)),
            }
        }
        best.map(|(e, d)| (e.clone(), d))
    }
}

#[derive(Debug)]
struct Inner {
    entries: Vec<ClientEntry>,
}
