//! Cortex session related types.
//!
//! A session is the hub-side capability to deliver framed messages to
//! one connected worker. Sessions are single-writer: only the hub
//! delivers on them. Delivery is total — implementations never raise to
//! the caller, they classify every fault into a [DeliveryOutcome] so the
//! broadcast engine and the coordinators can decide between logging and
//! eviction without inspecting error strings.

use crate::*;
use std::sync::Arc;

/// The classified result of a single delivery attempt.
#[derive(Debug)]
pub enum DeliveryOutcome {
    /// The frame was handed to the transport.
    Delivered,

    /// This delivery failed, but the session may recover. The recipient
    /// stays registered.
    Transient(CxError),

    /// The session cannot be used further. The owning client must be
    /// evicted from the registry exactly once.
    Dead(CxError),
}

impl DeliveryOutcome {
    /// True if the frame was handed to the transport.
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered)
    }

    /// True if the session is unusable and the client must be evicted.
    pub fn is_dead(&self) -> bool {
        matches!(self, DeliveryOutcome::Dead(_))
    }
}

/// The hub-side handle to one bidirectional worker session.
pub trait Session: 'static + Send + Sync + std::fmt::Debug {
    /// Deliver one encoded frame to the worker.
    ///
    /// Within a single session, frames are delivered in dispatch order.
    fn deliver(&self, frame: bytes::Bytes) -> BoxFut<'_, DeliveryOutcome>;

    /// Close the session, making a best effort to flush the reason to
    /// the remote first.
    fn close(&self, reason: Option<String>) -> BoxFut<'_, ()>;
}

/// Trait-object [Session].
pub type DynSession = Arc<dyn Session>;

/// Sessions are compared by handle identity, not by content. Two clones
/// of the same `Arc` are the same session.
pub fn same_session(a: &DynSession, b: &DynSession) -> bool {
    Arc::ptr_eq(a, b)
}
