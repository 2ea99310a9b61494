//! Cortex wire protocol types.
//!
//! Every message the hub delivers to a worker is one line of JSON with a
//! `type` tag. Messages are encoded once into a [bytes::Bytes] frame and
//! the same buffer is fanned out to every recipient.

use crate::*;

/// The nearest-neighbour hint included in a `client-list` message.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchHint {
    /// The closest already-registered peer.
    pub peer: ClientDescriptor,

    /// Vector distance to that peer.
    pub distance: f64,
}

/// A message delivered from the hub to a worker session.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum HubMessage {
    /// Sent exactly once to a joining client: the current registry
    /// snapshot, its nearest neighbour (if any) and the command surface.
    ClientList {
        /// Registry snapshot at join time.
        clients: Vec<ClientDescriptor>,
        /// Nearest neighbour hint, or null when joining an empty hub.
        r#match: Option<MatchHint>,
        /// Names of the commands the hub accepts.
        commands: Vec<String>,
    },

    /// Broadcast to everyone when a client joins.
    ClientJoined {
        /// The descriptor of the client that joined.
        client: ClientDescriptor,
        /// Registry size after the join.
        total: usize,
    },

    /// Broadcast to everyone when a client leaves or is evicted.
    ClientLeft {
        /// The descriptor of the client that left.
        client: ClientDescriptor,
        /// Registry size after the departure.
        total: usize,
    },

    /// Sent exactly once to the nearest neighbour of a joining client.
    ClientMatch {
        /// The descriptor of the client that just joined.
        client: ClientDescriptor,
        /// Vector distance between the pair.
        distance: f64,
        /// Always "hello".
        message: String,
    },

    /// A broadcast chat message.
    UserMessage {
        /// The sending client, or the hub itself.
        from: String,
        /// The message body.
        message: String,
        /// Hub wall-clock time at dispatch.
        timestamp: Timestamp,
    },

    /// Fan-out request opening a benchmark round.
    BenchmarkRequest {
        /// Identifies the pending benchmark.
        request_id: RequestId,
        /// The client that asked for the benchmark.
        requester_id: String,
        /// Loop iterations each worker should run.
        iterations: u64,
        /// How long the hub will wait for reports.
        timeout_ms: u64,
        /// Hub wall-clock time at dispatch.
        started_at: Timestamp,
    },

    /// One task assignment within a map-reduce request.
    MapreduceTask {
        /// Identifies the pending map-reduce.
        request_id: RequestId,
        /// Identifies the task within the request.
        task_id: TaskId,
        /// Opaque task payload. The hub never interprets it.
        payload: serde_json::Value,
        /// Optional opaque task metadata.
        metadata: Option<serde_json::Value>,
        /// The reducer that will aggregate results.
        reducer: Reducer,
        /// Number of tasks in the whole request.
        total_tasks: usize,
        /// How long the hub will wait for the whole request.
        timeout_ms: u64,
        /// Dispatch attempts for this task, including this one.
        attempts: u32,
    },

    /// Low-rate broadcast of the hub's wall-clock time.
    Heartbeat {
        /// Hub wall-clock time.
        now: Timestamp,
    },
}

impl HubMessage {
    /// Encode this message into a newline-terminated JSON frame.
    pub fn encode(&self) -> CxResult<bytes::Bytes> {
        encode_value(
            &serde_json::to_value(self)
                .map_err(|e| CxError::other_src("encode hub message", e))?,
        )
    }
}

/// Encode an arbitrary JSON envelope into a newline-terminated frame.
///
/// Used for user-supplied broadcast envelopes (e.g. `play-audio`) that
/// pass through the hub unchanged.
pub fn encode_value(value: &serde_json::Value) -> CxResult<bytes::Bytes> {
    let mut out = serde_json::to_vec(value)
        .map_err(|e| CxError::other_src("encode frame", e))?;
    out.push(b'\n');
    Ok(bytes::Bytes::from(out))
}
