//! The hub's TTL-capable key-value store.
//!
//! Values are stored in the backend as JSON payloads of the shape
//! `{"value": V, "expiresAt": ms | null}`. Expiry is enforced twice:
//! lazily, when a read observes a deadline in the past, and by a single
//! coalesced alarm task that sweeps every expired entry and then
//! reschedules itself to the earliest remaining deadline. The alarm is a
//! monotone minimum: callers may only lower the current deadline. The
//! deadline is persisted in the backend's single alarm slot and restored
//! at startup.

use cortex_api::*;
use std::sync::{Arc, Mutex};

/// KvStore configuration types.
pub mod config {
    /// Configuration parameters for [KvStore](super::KvStore).
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct KvStoreConfig {
        /// Upper bound on the number of keys a `list` returns.
        ///
        /// Default: 1000.
        pub max_list_keys: usize,
    }

    impl Default for KvStoreConfig {
        fn default() -> Self {
            Self {
                max_list_keys: 1000,
            }
        }
    }

    /// Module-level configuration for KvStore.
    #[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct KvStoreModConfig {
        /// KvStore configuration.
        #[serde(default)]
        pub kv_store: KvStoreConfig,
    }

    impl cortex_api::config::ModConfig for KvStoreModConfig {}
}

pub use config::*;

/// The stored payload envelope.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct KvPayload {
    value: serde_json::Value,
    #[serde(default)]
    expires_at: Option<Timestamp>,
}

/// The outcome of a `get`.
#[derive(Debug, Clone, PartialEq)]
pub struct KvGet {
    /// The stored value, or None when absent or just expired.
    pub value: Option<serde_json::Value>,

    /// True when this read observed an expired entry and deleted it.
    pub expired: bool,
}

/// The outcome of a `list`.
#[derive(Debug, Clone, PartialEq)]
pub struct KvList {
    /// Up to `max_list_keys` keys, unordered.
    pub keys: Vec<String>,

    /// Number of keys returned.
    pub count: usize,

    /// Total entries in the backing store.
    pub size: usize,
}

#[derive(Debug, Default)]
struct AlarmState {
    deadline: Mutex<Option<Timestamp>>,
    changed: tokio::sync::Notify,
}

/// The TTL key-value store.
#[derive(Debug)]
pub struct KvStore {
    backend: DynKvBackend,
    config: KvStoreConfig,
    alarm: Arc<AlarmState>,
    sweep_task: tokio::task::JoinHandle<()>,
}

impl Drop for KvStore {
    fn drop(&mut self) {
        self.sweep_task.abort();
    }
}

impl KvStore {
    /// Construct a store over a backend, restoring any persisted alarm
    /// deadline and starting the sweep task.
    pub async fn create(
        backend: DynKvBackend,
        config: KvStoreConfig,
    ) -> CxResult<Self> {
        let alarm = Arc::new(AlarmState::default());
        *alarm.deadline.lock().unwrap() = backend.get_alarm().await?;

        let sweep_task =
            tokio::task::spawn(sweep_task(backend.clone(), alarm.clone()));

        Ok(Self {
            backend,
            config,
            alarm,
            sweep_task,
        })
    }

    /// The backend this store writes through.
    pub fn backend(&self) -> &DynKvBackend {
        &self.backend
    }

    /// Stop the expiry alarm task. Entries keep expiring lazily.
    pub fn shutdown(&self) {
        self.sweep_task.abort();
    }

    /// The currently scheduled sweep deadline, if any.
    pub fn alarm_deadline(&self) -> Option<Timestamp> {
        *self.alarm.deadline.lock().unwrap()
    }

    /// Store a value, optionally expiring after `ttl_seconds`.
    /// Returns the absolute expiry, if one was set.
    pub async fn put(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl_seconds: Option<u64>,
    ) -> CxResult<Option<Timestamp>> {
        let expires_at = ttl_seconds
            .map(|s| Timestamp::now() + std::time::Duration::from_secs(s));
        let payload = serde_json::to_string(&KvPayload { value, expires_at })
            .map_err(|e| CxError::other_src("encode kv payload", e))?;
        self.backend.put(key.to_string(), payload).await?;
        if let Some(deadline) = expires_at {
            self.schedule_expiry(deadline).await?;
        }
        Ok(expires_at)
    }

    /// Read a value, lazily deleting it when expired.
    pub async fn get(&self, key: &str) -> CxResult<KvGet> {
        let payload = match self.backend.get(key.to_string()).await? {
            None => {
                return Ok(KvGet {
                    value: None,
                    expired: false,
                })
            }
            Some(payload) => payload,
        };
        let payload = parse_payload(key, &payload)?;
        if is_expired(&payload, Timestamp::now()) {
            self.backend.delete(key.to_string()).await?;
            return Ok(KvGet {
                value: None,
                expired: true,
            });
        }
        Ok(KvGet {
            value: Some(payload.value),
            expired: false,
        })
    }

    /// Delete a key. Idempotent. Returns whether the key existed.
    pub async fn delete(&self, key: &str) -> CxResult<bool> {
        self.backend.delete(key.to_string()).await
    }

    /// List keys (bounded) plus the total backing-store size.
    pub async fn list(&self) -> CxResult<KvList> {
        let keys = self.backend.list_keys(self.config.max_list_keys).await?;
        let size = self.backend.count().await?;
        Ok(KvList {
            count: keys.len(),
            keys,
            size,
        })
    }

    /// Reset a key's expiry to `now + seconds`. Returns false when the
    /// key is absent.
    pub async fn expire(
        &self,
        key: &str,
        seconds: u64,
    ) -> CxResult<Option<Timestamp>> {
        let payload = match self.backend.get(key.to_string()).await? {
            None => return Ok(None),
            Some(payload) => payload,
        };
        let mut payload = parse_payload(key, &payload)?;
        let deadline =
            Timestamp::now() + std::time::Duration::from_secs(seconds);
        payload.expires_at = Some(deadline);
        let payload = serde_json::to_string(&payload)
            .map_err(|e| CxError::other_src("encode kv payload", e))?;
        self.backend.put(key.to_string(), payload).await?;
        self.schedule_expiry(deadline).await?;
        Ok(Some(deadline))
    }

    /// Remaining time-to-live for a key, in whole seconds (rounded up).
    ///
    /// `-2` when the key is absent (or just lazily expired), `-1` when
    /// the key carries no expiry.
    pub async fn ttl(&self, key: &str) -> CxResult<i64> {
        let payload = match self.backend.get(key.to_string()).await? {
            None => return Ok(-2),
            Some(payload) => payload,
        };
        let payload = parse_payload(key, &payload)?;
        let expires_at = match payload.expires_at {
            None => return Ok(-1),
            Some(t) => t,
        };
        let now = Timestamp::now();
        if expires_at <= now {
            self.backend.delete(key.to_string()).await?;
            return Ok(-2);
        }
        let remaining_ms = expires_at.as_millis() - now.as_millis();
        Ok((remaining_ms + 999) / 1000)
    }

    /// Lower the sweep deadline to `min(existing, deadline)` and persist
    /// it. Raising the deadline is not possible through this call.
    async fn schedule_expiry(&self, deadline: Timestamp) -> CxResult<()> {
        let lowered = {
            let mut cur = self.alarm.deadline.lock().unwrap();
            match *cur {
                Some(existing) if existing <= deadline => None,
                _ => {
                    *cur = Some(deadline);
                    Some(deadline)
                }
            }
        };
        if let Some(deadline) = lowered {
            self.backend.set_alarm(Some(deadline)).await?;
            self.alarm.changed.notify_one();
        }
        Ok(())
    }
}

fn parse_payload(key: &str, payload: &str) -> CxResult<KvPayload> {
    serde_json::from_str(payload).map_err(|e| {
        CxError::other_src(format!("malformed kv payload for key {key}"), e)
    })
}

fn is_expired(payload: &KvPayload, now: Timestamp) -> bool {
    matches!(payload.expires_at, Some(t) if t <= now)
}

/// Sleep until the scheduled deadline (or until it is lowered), then
/// sweep every expired entry and reschedule to the earliest remaining
/// deadline.
async fn sweep_task(backend: DynKvBackend, alarm: Arc<AlarmState>) {
    loop {
        let deadline = *alarm.deadline.lock().unwrap();
        match deadline {
            None => alarm.changed.notified().await,
            Some(deadline) => {
                tokio::select! {
                    _ = tokio::time::sleep(deadline.duration_until()) => {
                        if let Err(err) = sweep(&backend, &alarm).await {
                            tracing::warn!(?err, "kv expiry sweep failed");
                        }
                    }
                    _ = alarm.changed.notified() => {}
                }
            }
        }
    }
}

/// One pass over the whole store: delete expired entries, skip malformed
/// ones, leave the alarm at the earliest remaining deadline.
async fn sweep(backend: &DynKvBackend, alarm: &AlarmState) -> CxResult<()> {
    let now = Timestamp::now();
    let mut earliest: Option<Timestamp> = None;
    let mut swept = 0_usize;

    for key in backend.list_keys(usize::MAX).await? {
        let payload = match backend.get(key.clone()).await? {
            None => continue,
            Some(payload) => payload,
        };
        let payload: KvPayload = match serde_json::from_str(&payload) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::debug!(key, ?err, "skipping malformed kv payload");
                continue;
            }
        };
        match payload.expires_at {
            Some(t) if t <= now => {
                backend.delete(key).await?;
                swept += 1;
            }
            Some(t) => {
                earliest = Some(match earliest {
                    None => t,
                    Some(e) => e.min(t),
                });
            }
            None => {}
        }
    }

    if swept > 0 {
        tracing::debug!(swept, "kv expiry sweep removed entries");
    }

    *alarm.deadline.lock().unwrap() = earliest;
    backend.set_alarm(earliest).await?;
    Ok(())
}
