//! The map-reduce coordinator.
//!
//! Distributes opaque task payloads round-robin across the active worker
//! pool, collects per-task results reported back over the command
//! surface, reassigns tasks whose worker departs, and reduces completed
//! results through one of the closed reducer set.
//!
//! One pending request per request id, each owning its task table, its
//! round-robin cursor, its timeout timer and its resolver. Reassignment
//! is enqueued onto the runtime after the departure is committed, so the
//! departure handler never re-enters dispatch.

use crate::broadcast::Broadcaster;
use crate::common::random_request_id;
use cortex_api::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub mod parse;
pub mod reduce;

/// Map-reduce configuration types.
pub mod config {
    /// Configuration parameters for
    /// [MapReduceCoordinator](super::MapReduceCoordinator).
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MapReduceConfig {
        /// Request timeout when the caller does not specify one.
        ///
        /// Default: 30000 ms.
        pub default_timeout_ms: u64,
    }

    impl Default for MapReduceConfig {
        fn default() -> Self {
            Self {
                default_timeout_ms: 30_000,
            }
        }
    }

    /// Module-level configuration for the map-reduce coordinator.
    #[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MapReduceModConfig {
        /// Map-reduce configuration.
        #[serde(default)]
        pub map_reduce: MapReduceConfig,
    }

    impl cortex_api::config::ModConfig for MapReduceModConfig {}
}

pub use config::*;

const DISPATCH_FAILED: &str = "Failed to dispatch task to any client";
const REASSIGN_FAILED: &str = "Failed to reassign after client departure";
const NO_RESPONSE: &str = "No response received";

#[derive(Debug)]
struct TaskState {
    task_id: TaskId,
    payload: serde_json::Value,
    metadata: Option<serde_json::Value>,
    assigned_to: Option<ClientId>,
    assigned_at: Option<Timestamp>,
    attempts: u32,
    completed_at: Option<Timestamp>,
    result: Option<serde_json::Value>,
    error: Option<String>,
    result_metadata: Option<serde_json::Value>,
}

impl TaskState {
    fn new(task: parse::ParsedTask) -> Self {
        Self {
            task_id: task.task_id,
            payload: task.payload,
            metadata: task.metadata,
            assigned_to: None,
            assigned_at: None,
            attempts: 0,
            completed_at: None,
            result: None,
            error: None,
            result_metadata: None,
        }
    }

    fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }

    fn fail(&mut self, message: &str) {
        self.completed_at = Some(Timestamp::now());
        self.error = Some(message.to_string());
    }

    fn result_entry(&self) -> TaskResultEntry {
        let duration_ms = match (self.assigned_at, self.completed_at) {
            (Some(a), Some(c)) => Some(c.as_millis() - a.as_millis()),
            _ => None,
        };
        TaskResultEntry {
            task_id: self.task_id.clone(),
            assigned_to: self.assigned_to.clone(),
            attempts: self.attempts,
            duration_ms,
            result: self.result.clone(),
            error: self.error.clone(),
            metadata: self.result_metadata.clone(),
        }
    }
}

struct PendingMapReduce {
    requester_id: String,
    started_at: Timestamp,
    timeout_ms: u64,
    reducer: Reducer,
    tasks: Vec<TaskState>,
    cursor: usize,
    resolver: Option<tokio::sync::oneshot::Sender<MapReduceSummary>>,
    timer: Option<tokio::task::JoinHandle<()>>,
}

impl PendingMapReduce {
    fn task_mut(&mut self, task_id: &TaskId) -> Option<&mut TaskState> {
        self.tasks.iter_mut().find(|t| t.task_id == *task_id)
    }

    fn completed(&self) -> usize {
        self.tasks.iter().filter(|t| t.is_complete()).count()
    }
}

/// The map-reduce coordinator. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MapReduceCoordinator {
    broadcaster: Broadcaster,
    pending: Arc<Mutex<HashMap<RequestId, PendingMapReduce>>>,
    config: MapReduceConfig,
}

impl std::fmt::Debug for MapReduceCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapReduceCoordinator")
            .field("pending", &self.pending.lock().unwrap().len())
            .finish()
    }
}

impl MapReduceCoordinator {
    /// Construct a coordinator dispatching over the given broadcaster's
    /// registry.
    pub fn new(broadcaster: Broadcaster, config: MapReduceConfig) -> Self {
        Self {
            broadcaster,
            pending: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    /// Run one map-reduce request to completion.
    ///
    /// `tasks_input` is the raw task-set token (JSON or base64 JSON).
    /// Fails fast with [CxError::Malformed] / [CxError::NoTasks] /
    /// [CxError::NoClients]; every later outcome resolves into a
    /// summary.
    pub async fn start(
        &self,
        requester: Option<&ClientId>,
        tasks_input: &str,
        reducer: Reducer,
        timeout_ms: Option<u64>,
    ) -> CxResult<MapReduceSummary> {
        let tasks = parse::parse_tasks(tasks_input)?;
        if self.broadcaster.registry().is_empty() {
            return Err(CxError::NoClients);
        }

        let request_id = random_request_id();
        let requester_id = requester
            .map(|c| c.to_string())
            .unwrap_or_else(|| "server".to_string());
        let timeout_ms = timeout_ms.unwrap_or(self.config.default_timeout_ms);
        let task_count = tasks.len();

        let (resolve_send, resolve_recv) = tokio::sync::oneshot::channel();

        self.pending.lock().unwrap().insert(
            request_id.clone(),
            PendingMapReduce {
                requester_id,
                started_at: Timestamp::now(),
                timeout_ms,
                reducer,
                tasks: tasks.into_iter().map(TaskState::new).collect(),
                cursor: 0,
                resolver: Some(resolve_send),
                timer: None,
            },
        );

        // arm the timer only after the request is registered
        let timer = {
            let this = self.clone();
            let request_id = request_id.clone();
            tokio::task::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(
                    timeout_ms,
                ))
                .await;
                this.on_timeout(&request_id);
            })
        };
        if let Some(req) = self.pending.lock().unwrap().get_mut(&request_id) {
            req.timer = Some(timer);
        } else {
            timer.abort();
        }

        for idx in 0..task_count {
            self.dispatch(&request_id, idx, DISPATCH_FAILED).await;
        }
        self.check_complete(&request_id, "completed");

        resolve_recv
            .await
            .map_err(|_| CxError::other("mapreduce request dropped"))
    }

    /// Dispatch one task to the next round-robin candidate, evicting
    /// unreachable recipients and trying further candidates until one
    /// accepts or none remain.
    async fn dispatch(
        &self,
        request_id: &RequestId,
        idx: usize,
        fail_msg: &str,
    ) {
        loop {
            let snapshot = self.broadcaster.registry().snapshot();

            let picked = {
                let mut pending = self.pending.lock().unwrap();
                let req = match pending.get_mut(request_id) {
                    None => return,
                    Some(req) => req,
                };
                if req.tasks[idx].is_complete() {
                    return;
                }
                if snapshot.is_empty() {
                    req.tasks[idx].fail(fail_msg);
                    None
                } else {
                    let slot = req.cursor % snapshot.len();
                    let entry = snapshot[slot].clone();
                    let total_tasks = req.tasks.len();
                    let timeout_ms = req.timeout_ms;
                    let reducer = req.reducer;
                    let task = &mut req.tasks[idx];
                    task.attempts += 1;
                    task.assigned_to = Some(entry.descriptor.id.clone());
                    task.assigned_at = Some(Timestamp::now());
                    let frame = HubMessage::MapreduceTask {
                        request_id: request_id.clone(),
                        task_id: task.task_id.clone(),
                        payload: task.payload.clone(),
                        metadata: task.metadata.clone(),
                        reducer,
                        total_tasks,
                        timeout_ms,
                        attempts: task.attempts,
                    }
                    .encode();
                    match frame {
                        Ok(frame) => Some((slot, entry, frame)),
                        Err(err) => {
                            tracing::error!(
                                ?err,
                                "could not encode mapreduce task frame",
                            );
                            task.fail(fail_msg);
                            None
                        }
                    }
                }
            };

            let (slot, entry, frame) = match picked {
                None => {
                    self.check_complete(request_id, "completed");
                    return;
                }
                Some(picked) => picked,
            };

            match entry.session.deliver(frame).await {
                DeliveryOutcome::Delivered => {
                    let mut pending = self.pending.lock().unwrap();
                    if let Some(req) = pending.get_mut(request_id) {
                        req.cursor = slot + 1;
                    }
                    return;
                }
                DeliveryOutcome::Transient(err)
                | DeliveryOutcome::Dead(err) => {
                    // clear the assignment first so the departure scan
                    // does not double-dispatch this task
                    {
                        let mut pending = self.pending.lock().unwrap();
                        if let Some(req) = pending.get_mut(request_id) {
                            req.tasks[idx].assigned_to = None;
                            req.tasks[idx].assigned_at = None;
                        }
                    }
                    self.broadcaster.evict(&entry, err);
                }
            }
        }
    }

    /// Record one worker's task report. Idempotency is by task id: the
    /// first report wins, later ones are rejected.
    pub fn report(
        &self,
        request_id: &RequestId,
        task_id: &TaskId,
        reporter: Option<&ClientId>,
        result: Option<serde_json::Value>,
        error: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> serde_json::Value {
        let ack = {
            let mut pending = self.pending.lock().unwrap();
            let req = match pending.get_mut(request_id) {
                None => {
                    return serde_json::json!({
                        "command": "mapreduce report",
                        "accepted": false,
                        "error": "unknown requestId",
                        "requestId": request_id,
                    })
                }
                Some(req) => req,
            };
            let total = req.tasks.len();
            let task = match req.task_mut(task_id) {
                None => {
                    return serde_json::json!({
                        "command": "mapreduce report",
                        "accepted": false,
                        "error": "unknown taskId",
                        "requestId": request_id,
                        "taskId": task_id,
                    })
                }
                Some(task) => task,
            };
            if task.is_complete() {
                return serde_json::json!({
                    "command": "mapreduce report",
                    "accepted": false,
                    "error": "already reported",
                    "requestId": request_id,
                    "taskId": task_id,
                });
            }
            if let Some(reporter) = reporter {
                if task.assigned_to.as_ref() != Some(reporter) {
                    tracing::debug!(
                        %task_id,
                        %reporter,
                        assigned = ?task.assigned_to,
                        "task report from a client other than the assignee",
                    );
                }
            }
            task.completed_at = Some(Timestamp::now());
            match error {
                Some(error) => task.error = Some(error),
                None => {
                    task.result =
                        Some(result.unwrap_or(serde_json::Value::Null))
                }
            }
            task.result_metadata = metadata;
            serde_json::json!({
                "command": "mapreduce report",
                "accepted": true,
                "requestId": request_id,
                "taskId": task_id,
                "completedTasks": req.completed(),
                "totalTasks": total,
            })
        };

        self.check_complete(request_id, "completed");
        ack
    }

    /// A snapshot of a pending request's progress.
    pub fn status(&self, request_id: &RequestId) -> serde_json::Value {
        let pending = self.pending.lock().unwrap();
        let req = match pending.get(request_id) {
            None => {
                return serde_json::json!({
                    "command": "mapreduce status",
                    "error": "unknown requestId",
                    "requestId": request_id,
                })
            }
            Some(req) => req,
        };
        let completed = req.completed();
        let failed = req
            .tasks
            .iter()
            .filter(|t| t.is_complete() && t.error.is_some())
            .count();
        let entries: Vec<TaskResultEntry> =
            req.tasks.iter().map(|t| t.result_entry()).collect();
        serde_json::json!({
            "command": "mapreduce status",
            "requestId": request_id,
            "reducer": req.reducer,
            "totalTasks": req.tasks.len(),
            "completedTasks": completed,
            "failedTasks": failed,
            "pendingTasks": req.tasks.len() - completed,
            "elapsedMs": Timestamp::now().as_millis()
                - req.started_at.as_millis(),
            "results": serde_json::to_value(entries).unwrap_or_default(),
        })
    }

    /// Cancel a pending request. Unfinished tasks stay pending in the
    /// summary; only the timeout path force-fails them.
    pub fn cancel(&self, request_id: &RequestId) -> serde_json::Value {
        let removed = self.pending.lock().unwrap().remove(request_id);
        match removed {
            None => serde_json::json!({
                "command": "mapreduce cancel",
                "error": "unknown requestId",
                "requestId": request_id,
            }),
            Some(req) => {
                self.resolve(request_id, req, "cancelled");
                serde_json::json!({
                    "command": "mapreduce cancel",
                    "cancelled": true,
                    "requestId": request_id,
                })
            }
        }
    }

    /// A client left the registry: clear its uncompleted assignments and
    /// enqueue re-dispatch work on the runtime.
    pub fn departure(&self, client_id: &ClientId) {
        let mut to_redispatch: Vec<(RequestId, usize)> = Vec::new();
        {
            let mut pending = self.pending.lock().unwrap();
            for (request_id, req) in pending.iter_mut() {
                for (idx, task) in req.tasks.iter_mut().enumerate() {
                    if !task.is_complete()
                        && task.assigned_to.as_ref() == Some(client_id)
                    {
                        task.assigned_to = None;
                        task.assigned_at = None;
                        to_redispatch.push((request_id.clone(), idx));
                    }
                }
            }
        }
        for (request_id, idx) in to_redispatch {
            let this = self.clone();
            tokio::task::spawn(async move {
                this.dispatch(&request_id, idx, REASSIGN_FAILED).await;
                this.check_complete(&request_id, "completed");
            });
        }
    }

    fn check_complete(&self, request_id: &RequestId, message: &str) {
        let req = {
            let mut pending = self.pending.lock().unwrap();
            let done = pending
                .get(request_id)
                .map(|req| req.tasks.iter().all(|t| t.is_complete()))
                .unwrap_or(false);
            if !done {
                return;
            }
            pending.remove(request_id).expect("checked above")
        };
        self.resolve(request_id, req, message);
    }

    fn on_timeout(&self, request_id: &RequestId) {
        let req = self.pending.lock().unwrap().remove(request_id);
        if let Some(mut req) = req {
            for task in req.tasks.iter_mut() {
                if !task.is_complete() {
                    task.fail(NO_RESPONSE);
                }
            }
            self.resolve(request_id, req, "timed out");
        }
    }

    fn resolve(
        &self,
        request_id: &RequestId,
        mut req: PendingMapReduce,
        message: &str,
    ) {
        // clear the timer before resolving so a resolution never races a
        // late fire
        if let Some(timer) = req.timer.take() {
            timer.abort();
        }
        let completed_at = Timestamp::now();
        let completed = req.completed();
        let failed = req
            .tasks
            .iter()
            .filter(|t| t.is_complete() && t.error.is_some())
            .count();
        let successes: Vec<serde_json::Value> = req
            .tasks
            .iter()
            .filter(|t| t.is_complete() && t.error.is_none())
            .map(|t| t.result.clone().unwrap_or(serde_json::Value::Null))
            .collect();
        let summary = MapReduceSummary {
            command: "mapreduce".to_string(),
            request_id: request_id.clone(),
            requester_id: req.requester_id.clone(),
            reducer: req.reducer,
            timeout_ms: req.timeout_ms,
            started_at: req.started_at,
            completed_at,
            duration_ms: completed_at.as_millis() - req.started_at.as_millis(),
            total_tasks: req.tasks.len(),
            completed_tasks: completed,
            failed_tasks: failed,
            pending_tasks: req.tasks.len() - completed,
            results: req.tasks.iter().map(|t| t.result_entry()).collect(),
            reduced_value: reduce::reduce(req.reducer, &successes),
            message: message.to_string(),
        };
        if let Some(resolver) = req.resolver.take() {
            let _ = resolver.send(summary);
        }
    }
}

#[cfg(test)]
mod test;
