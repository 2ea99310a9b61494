//! The broadcast engine.
//!
//! Fans one encoded frame out to every registered client in parallel.
//! Per-recipient failures never fail the broadcast: transient faults are
//! logged and the recipient stays registered, dead sessions are removed
//! from the registry exactly once and reported on the departure queue so
//! the hub can notify pending coordinators and announce `client-left`.
//!
//! One slow recipient cannot delay the others; each delivery completes
//! independently. Per-recipient ordering holds because a later broadcast
//! call only starts after the engine dispatched the earlier one.

use crate::registry::{ClientEntry, ClientRegistry};
use cortex_api::*;
use std::sync::Arc;

/// A client removed from the registry, awaiting departure processing.
#[derive(Debug)]
pub struct Departure {
    /// The removed registry entry.
    pub entry: ClientEntry,

    /// Why the client was removed.
    pub reason: CxError,
}

/// The producer half of the hub's departure queue.
pub type DepartureSender = tokio::sync::mpsc::UnboundedSender<Departure>;

/// The consumer half of the hub's departure queue.
pub type DepartureReceiver = tokio::sync::mpsc::UnboundedReceiver<Departure>;

/// The parallel fan-out engine.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<ClientRegistry>,
    departures: DepartureSender,
}

impl Broadcaster {
    /// Construct a broadcaster over the given registry.
    pub fn new(
        registry: Arc<ClientRegistry>,
        departures: DepartureSender,
    ) -> Self {
        Self {
            registry,
            departures,
        }
    }

    /// The registry this broadcaster fans out over.
    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Deliver one frame to every currently-registered client.
    ///
    /// Returns the registry size at function entry, whether or not any
    /// individual delivery succeeded.
    pub async fn broadcast(&self, frame: bytes::Bytes) -> usize {
        let snapshot = self.registry.snapshot();
        let recipients = snapshot.len();

        let deliveries = snapshot.into_iter().map(|entry| {
            let frame = frame.clone();
            async move {
                let outcome = entry.session.deliver(frame).await;
                (entry, outcome)
            }
        });

        for (entry, outcome) in futures::future::join_all(deliveries).await {
            match outcome {
                DeliveryOutcome::Delivered => {}
                DeliveryOutcome::Transient(err) => {
                    tracing::warn!(
                        client = %entry.descriptor.id,
                        ?err,
                        "broadcast delivery failed, recipient kept",
                    );
                }
                DeliveryOutcome::Dead(err) => {
                    self.evict(&entry, err);
                }
            }
        }

        recipients
    }

    /// Remove a dead client from the registry and queue its departure.
    /// Only the caller that actually removes the entry reports it.
    pub fn evict(&self, entry: &ClientEntry, reason: CxError) {
        if let Some(removed) = self.registry.remove_by_handle(&entry.session) {
            tracing::debug!(
                client = %removed.descriptor.id,
                %reason,
                "evicting dead session",
            );
            let _ = self.departures.send(Departure {
                entry: removed,
                reason,
            });
        }
    }
}
