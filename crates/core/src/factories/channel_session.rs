//! The in-process channel-backed session implementation.
//!
//! A session owns the single-writer end of an unbounded channel to the
//! worker and a disposer. Dead-session classification is typed at this
//! layer: once the channel is disposed (either side), every further
//! delivery reports [DeliveryOutcome::Dead] and the owning client gets
//! evicted exactly once by whoever observes it first.

use cortex_api::*;
use std::sync::Mutex;

type FrameSend = tokio::sync::mpsc::UnboundedSender<bytes::Bytes>;

/// The frames delivered to one worker, in dispatch order.
pub type FrameRecv = tokio::sync::mpsc::UnboundedReceiver<bytes::Bytes>;

/// A [Session] delivering frames over an in-process channel.
pub struct ChannelSession {
    send: Mutex<Option<FrameSend>>,
}

impl std::fmt::Debug for ChannelSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let open = self
            .send
            .lock()
            .map(|s| s.is_some())
            .unwrap_or(false);
        f.debug_struct("ChannelSession").field("open", &open).finish()
    }
}

impl ChannelSession {
    /// Construct a session and the worker-side frame receiver.
    pub fn create() -> (DynSession, FrameRecv) {
        let (send, recv) = tokio::sync::mpsc::unbounded_channel();
        let out: DynSession = std::sync::Arc::new(ChannelSession {
            send: Mutex::new(Some(send)),
        });
        (out, recv)
    }
}

impl Session for ChannelSession {
    fn deliver(&self, frame: bytes::Bytes) -> BoxFut<'_, DeliveryOutcome> {
        Box::pin(async move {
            let send = self.send.lock().unwrap().clone();
            match send {
                None => DeliveryOutcome::Dead(CxError::session_dead(
                    "session channel disposed",
                )),
                Some(send) => match send.send(frame) {
                    Ok(()) => DeliveryOutcome::Delivered,
                    Err(_) => {
                        // receiver dropped, dispose our side too
                        self.send.lock().unwrap().take();
                        DeliveryOutcome::Dead(CxError::session_dead(
                            "session channel disposed",
                        ))
                    }
                },
            }
        })
    }

    fn close(&self, reason: Option<String>) -> BoxFut<'_, ()> {
        Box::pin(async move {
            if self.send.lock().unwrap().take().is_some() {
                if let Some(reason) = reason {
                    tracing::debug!(reason, "session closed");
                }
            }
        })
    }
}
