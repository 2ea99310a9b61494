//! The benchmark coordinator.
//!
//! One pending round per request id, each owning its expected-set, its
//! timeout timer and its resolver. A round resolves when the expected
//! set drains, when the timer fires, or when the last expected client
//! departs, whichever happens first. The timer is cleared before the
//! resolver runs so a resolution never races a late timer fire.

use crate::broadcast::Broadcaster;
use crate::common::random_request_id;
use cortex_api::*;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Benchmark configuration types.
pub mod config {
    /// Configuration parameters for
    /// [BenchmarkCoordinator](super::BenchmarkCoordinator).
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct BenchmarkConfig {
        /// Iterations to request when the caller does not specify any.
        ///
        /// Default: 50000.
        pub default_iterations: u64,

        /// Round timeout when the caller does not specify one.
        ///
        /// Default: 5000 ms.
        pub default_timeout_ms: u64,
    }

    impl Default for BenchmarkConfig {
        fn default() -> Self {
            Self {
                default_iterations: 50_000,
                default_timeout_ms: 5_000,
            }
        }
    }

    /// Module-level configuration for the benchmark coordinator.
    #[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct BenchmarkModConfig {
        /// Benchmark configuration.
        #[serde(default)]
        pub benchmark: BenchmarkConfig,
    }

    impl cortex_api::config::ModConfig for BenchmarkModConfig {}
}

pub use config::*;

struct PendingBenchmark {
    requester_id: String,
    started_at: Timestamp,
    iterations: u64,
    timeout_ms: u64,
    participants: usize,
    expected: Vec<ClientId>,
    reported: HashSet<ClientId>,
    results: Vec<BenchmarkResult>,
    resolver: Option<tokio::sync::oneshot::Sender<BenchmarkSummary>>,
    timer: Option<tokio::task::JoinHandle<()>>,
}

/// The benchmark coordinator. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct BenchmarkCoordinator {
    broadcaster: Broadcaster,
    pending: Arc<Mutex<HashMap<RequestId, PendingBenchmark>>>,
    config: BenchmarkConfig,
}

impl std::fmt::Debug for BenchmarkCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BenchmarkCoordinator")
            .field("pending", &self.pending.lock().unwrap().len())
            .finish()
    }
}

impl BenchmarkCoordinator {
    /// Construct a coordinator fanning out over the given broadcaster's
    /// registry.
    pub fn new(broadcaster: Broadcaster, config: BenchmarkConfig) -> Self {
        Self {
            broadcaster,
            pending: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    /// Run one benchmark round to completion.
    ///
    /// Fails fast with [CxError::NoClients] on an empty registry. Every
    /// other outcome, including "could not reach any clients" and a
    /// timeout, resolves into a summary.
    pub async fn start(
        &self,
        requester: Option<&ClientId>,
        iterations: Option<u64>,
        timeout_ms: Option<u64>,
    ) -> CxResult<BenchmarkSummary> {
        let snapshot = self.broadcaster.registry().snapshot();
        if snapshot.is_empty() {
            return Err(CxError::NoClients);
        }

        let request_id = random_request_id();
        let requester_id = requester
            .map(|c| c.to_string())
            .unwrap_or_else(|| "server".to_string());
        let iterations = iterations.unwrap_or(self.config.default_iterations);
        let timeout_ms = timeout_ms.unwrap_or(self.config.default_timeout_ms);
        let started_at = Timestamp::now();

        let frame = HubMessage::BenchmarkRequest {
            request_id: request_id.clone(),
            requester_id: requester_id.clone(),
            iterations,
            timeout_ms,
            started_at,
        }
        .encode()?;

        let (resolve_send, resolve_recv) = tokio::sync::oneshot::channel();

        self.pending.lock().unwrap().insert(
            request_id.clone(),
            PendingBenchmark {
                requester_id,
                started_at,
                iterations,
                timeout_ms,
                participants: snapshot.len(),
                expected: snapshot
                    .iter()
                    .map(|e| e.descriptor.id.clone())
                    .collect(),
                reported: HashSet::new(),
                results: Vec::new(),
                resolver: Some(resolve_send),
                timer: None,
            },
        );

        // the timer is armed after the round is registered so a fire
        // always finds its round
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
        if let Some(round) = self.pending.lock().unwrap().get_mut(&request_id)
        {
            round.timer = Some(timer);
        } else {
            timer.abort();
        }

        // parallel dispatch; a failed delivery immediately stops the
        // round waiting on that client
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
                        "benchmark request delivery failed",
                    );
                    self.drop_expected(&request_id, &entry.descriptor.id);
                }
                DeliveryOutcome::Dead(err) => {
                    self.drop_expected(&request_id, &entry.descriptor.id);
                    self.broadcaster.evict(&entry, err);
                }
            }
        }

        self.check_complete(&request_id, "could not reach any clients");

        resolve_recv
            .await
            .map_err(|_| CxError::other("benchmark round dropped"))
    }

    /// Record one client's report. First report per client wins; later
    /// duplicates are acknowledged but not recorded.
    pub fn report(
        &self,
        request_id: &RequestId,
        client_id: &ClientId,
        duration_ms: f64,
        details: Option<String>,
    ) -> serde_json::Value {
        let mut pending = self.pending.lock().unwrap();
        let round = match pending.get_mut(request_id) {
            None => {
                return serde_json::json!({
                    "command": "benchmark report",
                    "accepted": false,
                    "error": "unknown requestId",
                    "requestId": request_id,
                })
            }
            Some(round) => round,
        };

        if !round.reported.insert(client_id.clone()) {
            return serde_json::json!({
                "command": "benchmark report",
                "accepted": true,
                "alreadyReported": true,
                "requestId": request_id,
            });
        }

        let ops_per_second = if duration_ms > 0.0 {
            Some(round.iterations as f64 / (duration_ms / 1000.0))
        } else {
            None
        };
        round.results.push(BenchmarkResult {
            client_id: client_id.clone(),
            duration_ms,
            iterations: round.iterations,
            ops_per_second,
            received_at: Timestamp::now(),
            details,
        });
        round.expected.retain(|c| c != client_id);
        let remaining = round.expected.len();
        drop(pending);

        self.check_complete(request_id, "completed");

        serde_json::json!({
            "command": "benchmark report",
            "accepted": true,
            "requestId": request_id,
            "pending": remaining,
        })
    }

    /// A client left the registry: stop waiting on it everywhere. May
    /// complete rounds whose expected-set drains.
    pub fn departure(&self, client_id: &ClientId) {
        let drained: Vec<RequestId> = {
            let mut pending = self.pending.lock().unwrap();
            pending
                .iter_mut()
                .filter_map(|(id, round)| {
                    let before = round.expected.len();
                    round.expected.retain(|c| c != client_id);
                    (before > 0 && round.expected.is_empty())
                        .then(|| id.clone())
                })
                .collect()
        };
        for request_id in drained {
            self.check_complete(&request_id, "completed");
        }
    }

    fn drop_expected(&self, request_id: &RequestId, client_id: &ClientId) {
        if let Some(round) = self.pending.lock().unwrap().get_mut(request_id) {
            round.expected.retain(|c| c != client_id);
        }
    }

    /// Resolve the round if its expected-set drained. A round that got
    /// no reports at all resolves with the given empty-message instead.
    fn check_complete(&self, request_id: &RequestId, empty_message: &str) {
        let mut pending = self.pending.lock().unwrap();
        let done = pending
            .get(request_id)
            .map(|round| round.expected.is_empty())
            .unwrap_or(false);
        if !done {
            return;
        }
        let round = pending.remove(request_id).expect("checked above");
        drop(pending);
        let message = if round.results.is_empty() {
            empty_message
        } else {
            "completed"
        };
        self.resolve(request_id, round, message);
    }

    fn on_timeout(&self, request_id: &RequestId) {
        let round = self.pending.lock().unwrap().remove(request_id);
        if let Some(round) = round {
            self.resolve(request_id, round, "timed out waiting for reports");
        }
    }

    fn resolve(
        &self,
        request_id: &RequestId,
        mut round: PendingBenchmark,
        message: &str,
    ) {
        // clear the timer before resolving so a resolver never races a
        // late fire; aborting from within the timer task itself is fine
        // because nothing awaits after this point
        if let Some(timer) = round.timer.take() {
            timer.abort();
        }
        let completed_at = Timestamp::now();
        let summary = BenchmarkSummary {
            command: "benchmark".to_string(),
            request_id: request_id.clone(),
            requester_id: round.requester_id,
            iterations: round.iterations,
            timeout_ms: round.timeout_ms,
            started_at: round.started_at,
            completed_at,
            duration_ms: completed_at.as_millis()
                - round.started_at.as_millis(),
            participants: round.participants,
            responded: round.results.len(),
            pending: round.expected,
            results: round.results,
            message: message.to_string(),
        };
        if let Some(resolver) = round.resolver.take() {
            let _ = resolver.send(summary);
        }
    }
}
