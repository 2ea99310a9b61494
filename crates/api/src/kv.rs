//! The key-value backing store trait.
//!
//! The backend persists opaque `(key, jsonPayload)` string pairs plus a
//! single-slot alarm deadline. All TTL semantics (lazy expiry, the
//! coalesced sweep) live above this trait in cortex_core; the backend
//! only stores.

use crate::*;
use std::sync::Arc;

/// A backing store for the hub's TTL key-value surface.
pub trait KvBackend: 'static + Send + Sync + std::fmt::Debug {
    /// Store a payload under a key. The last successful put wins.
    fn put(&self, key: String, payload: String) -> BoxFut<'_, CxResult<()>>;

    /// Get the payload stored under a key.
    fn get(&self, key: String) -> BoxFut<'_, CxResult<Option<String>>>;

    /// Delete a key. Returns whether the key existed. Idempotent.
    fn delete(&self, key: String) -> BoxFut<'_, CxResult<bool>>;

    /// List up to `limit` keys in unspecified order.
    fn list_keys(&self, limit: usize) -> BoxFut<'_, CxResult<Vec<String>>>;

    /// Total number of stored entries.
    fn count(&self) -> BoxFut<'_, CxResult<usize>>;

    /// Persist the single wake-up deadline, or clear it with `None`.
    fn set_alarm(
        &self,
        deadline: Option<Timestamp>,
    ) -> BoxFut<'_, CxResult<()>>;

    /// Read back the persisted wake-up deadline.
    fn get_alarm(&self) -> BoxFut<'_, CxResult<Option<Timestamp>>>;

    /// A short human-readable description of the backend, embedded in
    /// `whoami` and `storage` responses.
    fn descriptor(&self) -> String;
}

/// Trait-object [KvBackend].
pub type DynKvBackend = Arc<dyn KvBackend>;

/// A factory for constructing [KvBackend] instances.
pub trait KvBackendFactory: 'static + Send + Sync + std::fmt::Debug {
    /// Help the builder construct a default config from the chosen
    /// module factories.
    fn default_config(&self, config: &mut config::Config) -> CxResult<()>;

    /// Validate the config.
    fn validate_config(&self, config: &config::Config) -> CxResult<()>;

    /// Construct a backend instance.
    fn create(
        &self,
        builder: Arc<builder::Builder>,
    ) -> BoxFut<'static, CxResult<DynKvBackend>>;
}

/// Trait-object [KvBackendFactory].
pub type DynKvBackendFactory = Arc<dyn KvBackendFactory>;
