//! Typed report and summary shapes for the hub's group operations.
//!
//! These are the success bodies of `benchmark` and `mapreduce` command
//! responses. They serialize straight into the router's JSON replies.

use crate::*;

/// The closed set of aggregation functions applied to successful
/// map-reduce task results.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Reducer {
    /// List of results, in task order. The default.
    Collect,
    /// Numeric sum. Finite-parseable strings are coerced, the rest drop.
    Sum,
    /// Numeric mean, zero when nothing is finite.
    Average,
    /// String concatenation in task order.
    Concat,
    /// Number of successful results.
    Count,
    /// Left-to-right key merge of object results.
    Merge,
}

impl Reducer {
    /// Parse a reducer name, accepting the documented aliases.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "collect" => Some(Self::Collect),
            "sum" | "add" | "total" => Some(Self::Sum),
            "average" | "avg" | "mean" => Some(Self::Average),
            "concat" | "join" | "string" => Some(Self::Concat),
            "count" | "len" | "length" => Some(Self::Count),
            "merge" | "object" | "combine" => Some(Self::Merge),
            _ => None,
        }
    }
}

impl std::fmt::Display for Reducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Collect => "collect",
            Self::Sum => "sum",
            Self::Average => "average",
            Self::Concat => "concat",
            Self::Count => "count",
            Self::Merge => "merge",
        })
    }
}

/// One client's timing report within a benchmark round.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkResult {
    /// The reporting client.
    pub client_id: ClientId,

    /// Reported wall-clock duration of the benchmark loop.
    pub duration_ms: f64,

    /// Iterations the client was asked to run.
    pub iterations: u64,

    /// Derived throughput, absent when the duration is zero.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ops_per_second: Option<f64>,

    /// Hub wall-clock time the report arrived.
    pub received_at: Timestamp,

    /// Free-form detail string supplied by the client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// The resolved outcome of one benchmark round.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkSummary {
    /// Always "benchmark".
    pub command: String,
    /// Identifies the round.
    pub request_id: RequestId,
    /// The client that started the round.
    pub requester_id: String,
    /// Iterations each worker was asked to run.
    pub iterations: u64,
    /// The round's timeout.
    pub timeout_ms: u64,
    /// When the round was dispatched.
    pub started_at: Timestamp,
    /// When the round resolved.
    pub completed_at: Timestamp,
    /// `completed_at - started_at`.
    pub duration_ms: i64,
    /// Registry size at dispatch.
    pub participants: usize,
    /// `participants - |pending|`.
    pub responded: usize,
    /// Clients that never reported.
    pub pending: Vec<ClientId>,
    /// Reports in order of receipt.
    pub results: Vec<BenchmarkResult>,
    /// Human-readable resolution ("completed", "timed out", ...).
    pub message: String,
}

/// One task's row in a map-reduce summary.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResultEntry {
    /// Identifies the task within the request.
    pub task_id: TaskId,

    /// The worker that last held the task, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<ClientId>,

    /// Dispatch attempts made for this task.
    pub attempts: u32,

    /// `completed_at - assigned_at`, when both are known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,

    /// The reported result, for successful tasks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    /// The failure reason, for failed tasks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Optional metadata echoed from the worker's report.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// The resolved outcome of one map-reduce request.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapReduceSummary {
    /// Always "mapreduce".
    pub command: String,
    /// Identifies the request.
    pub request_id: RequestId,
    /// The client that started the request.
    pub requester_id: String,
    /// The reducer applied to successful results.
    pub reducer: Reducer,
    /// The request's timeout.
    pub timeout_ms: u64,
    /// When the request was dispatched.
    pub started_at: Timestamp,
    /// When the request resolved.
    pub completed_at: Timestamp,
    /// `completed_at - started_at`.
    pub duration_ms: i64,
    /// Number of tasks in the request.
    pub total_tasks: usize,
    /// Tasks with a recorded completion.
    pub completed_tasks: usize,
    /// Completed tasks that ended in error.
    pub failed_tasks: usize,
    /// `total_tasks - completed_tasks`.
    pub pending_tasks: usize,
    /// Per-task rows, in task order.
    pub results: Vec<TaskResultEntry>,
    /// The reduction over successful results.
    pub reduced_value: serde_json::Value,
    /// Human-readable resolution ("completed", "timed out", ...).
    pub message: String,
}
