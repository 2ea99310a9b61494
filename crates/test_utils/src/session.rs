//! A scripted [Session] for driving hub tests.
//!
//! Records every delivered frame (decoded back to JSON) and returns a
//! configurable [DeliveryOutcome], so tests can inject transient faults
//! and dead sessions without a transport.

use cortex_api::*;
use std::sync::{Arc, Mutex};

/// What the next deliveries should report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Record the frame and report [DeliveryOutcome::Delivered].
    Healthy,

    /// Drop the frame and report [DeliveryOutcome::Transient].
    Flaky,

    /// Drop the frame and report [DeliveryOutcome::Dead].
    Dead,
}

/// A scripted session that records delivered messages.
#[derive(Debug)]
pub struct TestSession {
    mode: Mutex<SessionMode>,
    delivered: Mutex<Vec<serde_json::Value>>,
    closed: Mutex<Option<String>>,
}

impl TestSession {
    /// Construct a healthy test session. Keep the concrete handle for
    /// inspection, pass [TestSession::as_dyn] clones to the hub.
    pub fn create() -> Arc<TestSession> {
        Arc::new(TestSession {
            mode: Mutex::new(SessionMode::Healthy),
            delivered: Mutex::new(Vec::new()),
            closed: Mutex::new(None),
        })
    }

    /// This session as the trait object the hub consumes.
    pub fn as_dyn(self: &Arc<Self>) -> DynSession {
        self.clone()
    }

    /// Change how further deliveries behave.
    pub fn set_mode(&self, mode: SessionMode) {
        *self.mode.lock().unwrap() = mode;
    }

    /// Every message delivered so far, in dispatch order.
    pub fn messages(&self) -> Vec<serde_json::Value> {
        self.delivered.lock().unwrap().clone()
    }

    /// The delivered messages carrying the given `type` tag.
    pub fn messages_of_type(&self, ty: &str) -> Vec<serde_json::Value> {
        self.messages()
            .into_iter()
            .filter(|m| m["type"] == ty)
            .collect()
    }

    /// Wait until a message of the given type has been delivered, then
    /// return the first one. Panics after ~2s.
    pub async fn wait_for(&self, ty: &str) -> serde_json::Value {
        for _ in 0..200 {
            if let Some(found) = self.messages_of_type(ty).into_iter().next()
            {
                return found;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("no {ty} message arrived; got {:?}", self.messages());
    }

    /// Forget everything delivered so far.
    pub fn clear(&self) {
        self.delivered.lock().unwrap().clear();
    }

    /// The close reason, if the hub closed this session.
    pub fn closed(&self) -> Option<String> {
        self.closed.lock().unwrap().clone()
    }
}

impl Session for TestSession {
    fn deliver(&self, frame: bytes::Bytes) -> BoxFut<'_, DeliveryOutcome> {
        Box::pin(async move {
            match *self.mode.lock().unwrap() {
                SessionMode::Healthy => {
                    match serde_json::from_slice(&frame) {
                        Ok(msg) => {
                            self.delivered.lock().unwrap().push(msg);
                            DeliveryOutcome::Delivered
                        }
                        Err(err) => DeliveryOutcome::Transient(
                            CxError::other_src("undecodable frame", err),
                        ),
                    }
                }
                SessionMode::Flaky => DeliveryOutcome::Transient(
                    CxError::other("scripted transient fault"),
                ),
                SessionMode::Dead => DeliveryOutcome::Dead(
                    CxError::session_dead("scripted dead session"),
                ),
            }
        })
    }

    fn close(&self, reason: Option<String>) -> BoxFut<'_, ()> {
        Box::pin(async move {
            *self.closed.lock().unwrap() =
                Some(reason.unwrap_or_else(|| "closed".to_string()));
            self.set_mode(SessionMode::Dead);
        })
    }
}
