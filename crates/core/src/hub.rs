//! The hub: session registry, group operations and the command surface,
//! wired together.
//!
//! All evictions funnel through one departure queue owned by a single
//! processing task: it announces `client-left`, drops the departed
//! client from every pending benchmark, and enqueues map-reduce
//! reassignment. The queue breaks the re-entrancy between "a broadcast
//! discovered a dead session" and "that departure triggers another
//! broadcast".

use crate::benchmark::{BenchmarkCoordinator, BenchmarkModConfig};
use crate::broadcast::{
    Broadcaster, Departure, DepartureReceiver, DepartureSender,
};
use crate::kv::{KvStore, KvStoreModConfig};
use crate::mapreduce::{MapReduceCoordinator, MapReduceModConfig};
use crate::registry::{ClientEntry, ClientRegistry};
use crate::router;
use cortex_api::*;
use std::sync::Arc;

/// Hub configuration types.
pub mod config {
    /// Configuration parameters for [Hub](super::Hub).
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HubConfig {
        /// Interval of the wall-clock heartbeat broadcast.
        ///
        /// Default: 30000 ms.
        pub heartbeat_interval_ms: u64,
    }

    impl Default for HubConfig {
        fn default() -> Self {
            Self {
                heartbeat_interval_ms: 30_000,
            }
        }
    }

    /// Module-level configuration for the hub.
    #[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HubModConfig {
        /// Hub configuration.
        #[serde(default)]
        pub hub: HubConfig,
    }

    impl cortex_api::config::ModConfig for HubModConfig {}
}

pub use config::*;

/// The coordination hub.
#[derive(Debug)]
pub struct Hub {
    pub(crate) registry: Arc<ClientRegistry>,
    pub(crate) broadcaster: Broadcaster,
    pub(crate) kv: KvStore,
    pub(crate) objects: object_store::DynObjectStore,
    pub(crate) benchmarks: BenchmarkCoordinator,
    pub(crate) mapreduce: MapReduceCoordinator,
    departures: DepartureSender,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl Drop for Hub {
    fn drop(&mut self) {
        for task in self.tasks.iter() {
            task.abort();
        }
    }
}

impl Hub {
    /// Construct a hub from a frozen builder. Starts the departure
    /// processing task, the heartbeat and the KV expiry alarm.
    pub async fn create(builder: Arc<builder::Builder>) -> CxResult<Arc<Hub>> {
        let hub_config: HubModConfig = builder.config.get_module_config()?;
        let kv_config: KvStoreModConfig = builder.config.get_module_config()?;
        let bench_config: BenchmarkModConfig =
            builder.config.get_module_config()?;
        let mr_config: MapReduceModConfig =
            builder.config.get_module_config()?;

        let kv_backend = builder.kv_backend.create(builder.clone()).await?;
        let objects = builder.object_store.create(builder.clone()).await?;

        let registry = Arc::new(ClientRegistry::new());
        let (departures, departure_recv) =
            tokio::sync::mpsc::unbounded_channel();
        let broadcaster = Broadcaster::new(registry.clone(), departures.clone());
        let benchmarks = BenchmarkCoordinator::new(
            broadcaster.clone(),
            bench_config.benchmark,
        );
        let mapreduce = MapReduceCoordinator::new(
            broadcaster.clone(),
            mr_config.map_reduce,
        );
        let kv = KvStore::create(kv_backend, kv_config.kv_store).await?;

        let tasks = vec![
            tokio::task::spawn(departure_task(
                broadcaster.clone(),
                benchmarks.clone(),
                mapreduce.clone(),
                departure_recv,
            )),
            tokio::task::spawn(heartbeat_task(
                broadcaster.clone(),
                std::time::Duration::from_millis(
                    hub_config.hub.heartbeat_interval_ms,
                ),
            )),
        ];

        Ok(Arc::new(Hub {
            registry,
            broadcaster,
            kv,
            objects,
            benchmarks,
            mapreduce,
            departures,
            tasks,
        }))
    }

    /// Register a new worker session.
    ///
    /// On success the joiner has received its `client-list`, the nearest
    /// neighbour (if any) its `client-match`, and everyone a
    /// `client-joined`. Returns the registry size after the insert.
    ///
    /// This is the one operation that fails with an error instead of a
    /// structured response, so the transport can reject the session.
    pub async fn join(
        &self,
        session: DynSession,
        descriptor: &serde_json::Value,
    ) -> CxResult<usize> {
        let descriptor = ClientDescriptor::from_value(descriptor)?;
        let nearest = self.registry.find_nearest(&descriptor);

        let total = self.registry.insert(ClientEntry {
            session: session.clone(),
            descriptor: Arc::new(descriptor.clone()),
            joined: Timestamp::now(),
        })?;
        tracing::debug!(client = %descriptor.id, total, "client joined");

        let clients: Vec<ClientDescriptor> = self
            .registry
            .snapshot()
            .iter()
            .map(|e| (*e.descriptor).clone())
            .collect();
        let list = HubMessage::ClientList {
            clients,
            r#match: nearest.as_ref().map(|(entry, distance)| MatchHint {
                peer: (*entry.descriptor).clone(),
                distance: *distance,
            }),
            commands: router::command_names(),
        };
        match session.deliver(list.encode()?).await {
            DeliveryOutcome::Delivered => {}
            DeliveryOutcome::Transient(err) | DeliveryOutcome::Dead(err) => {
                self.registry.remove_by_handle(&session);
                return Err(CxError::other(format!(
                    "could not deliver client list to joining client: {err}"
                )));
            }
        }

        if let Some((neighbour, distance)) = nearest {
            let hello = HubMessage::ClientMatch {
                client: descriptor.clone(),
                distance,
                message: "hello".to_string(),
            };
            match neighbour.session.deliver(hello.encode()?).await {
                DeliveryOutcome::Delivered => {}
                DeliveryOutcome::Transient(err) => {
                    tracing::warn!(
                        client = %neighbour.descriptor.id,
                        ?err,
                        "client-match delivery failed",
                    );
                }
                DeliveryOutcome::Dead(err) => {
                    self.broadcaster.evict(&neighbour, err);
                }
            }
        }

        let joined = HubMessage::ClientJoined {
            client: descriptor,
            total: self.registry.len(),
        };
        self.broadcaster.broadcast(joined.encode()?).await;

        Ok(total)
    }

    /// Explicitly disconnect a session. Returns false when the session
    /// owned no registered client (already evicted or never joined).
    pub async fn disconnect(&self, session: &DynSession) -> bool {
        match self.registry.remove_by_handle(session) {
            None => false,
            Some(entry) => {
                entry.session.close(None).await;
                let _ = self.departures.send(Departure {
                    entry,
                    reason: CxError::other("client disconnected"),
                });
                true
            }
        }
    }

    /// Route one worker command line to the matching operation.
    /// Never fails; malformed input comes back as a structured error.
    pub async fn handle_command(
        &self,
        line: &str,
        caller: Option<&ClientId>,
    ) -> serde_json::Value {
        router::route(self, line, caller).await
    }

    /// Fan an arbitrary, already-built envelope out to every client
    /// (e.g. a `play-audio` message). Returns the recipient count.
    pub async fn broadcast_value(
        &self,
        value: &serde_json::Value,
    ) -> CxResult<usize> {
        let frame = protocol::encode_value(value)?;
        Ok(self.broadcaster.broadcast(frame).await)
    }

    /// Current registry size.
    pub fn client_count(&self) -> usize {
        self.registry.len()
    }

    /// Stop the heartbeat, the departure pump and the KV expiry alarm.
    /// Registered sessions are left to their transports.
    pub fn shutdown(&self) {
        for task in self.tasks.iter() {
            task.abort();
        }
        self.kv.shutdown();
    }
}

async fn departure_task(
    broadcaster: Broadcaster,
    benchmarks: BenchmarkCoordinator,
    mapreduce: MapReduceCoordinator,
    mut recv: DepartureReceiver,
) {
    while let Some(departure) = recv.recv().await {
        let client_id = departure.entry.descriptor.id.clone();
        tracing::debug!(
            client = %client_id,
            reason = %departure.reason,
            "processing departure",
        );

        benchmarks.departure(&client_id);
        mapreduce.departure(&client_id);

        let left = HubMessage::ClientLeft {
            client: (*departure.entry.descriptor).clone(),
            total: broadcaster.registry().len(),
        };
        match left.encode() {
            Ok(frame) => {
                broadcaster.broadcast(frame).await;
            }
            Err(err) => {
                tracing::error!(?err, "could not encode client-left");
            }
        }
    }
}

async fn heartbeat_task(
    broadcaster: Broadcaster,
    interval: std::time::Duration,
) {
    loop {
        tokio::time::sleep(interval).await;
        let beat = HubMessage::Heartbeat {
            now: Timestamp::now(),
        };
        match beat.encode() {
            Ok(frame) => {
                broadcaster.broadcast(frame).await;
            }
            Err(err) => {
                tracing::error!(?err, "could not encode heartbeat");
            }
        }
    }
}
