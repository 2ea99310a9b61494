//! An in-memory implementation of the [KvBackend].

use cortex_api::*;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct MemKvInner {
    entries: HashMap<String, String>,
    alarm: Option<Timestamp>,
}

/// An in-memory implementation of the [KvBackend].
///
/// This is useful for testing and single-process deployments. Nothing
/// survives a restart, which matches the hub's non-goal of persisting
/// client identities across restarts.
#[derive(Debug)]
pub struct MemKvBackend {
    inner: Arc<Mutex<MemKvInner>>,
}

impl MemKvBackend {
    /// Create a new [MemKvBackend].
    pub fn create() -> DynKvBackend {
        Arc::new(MemKvBackend {
            inner: Arc::new(Mutex::new(MemKvInner::default())),
        })
    }
}

impl KvBackend for MemKvBackend {
    fn put(&self, key: String, payload: String) -> BoxFut<'_, CxResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.lock().await.entries.insert(key, payload);
            Ok(())
        })
    }

    fn get(&self, key: String) -> BoxFut<'_, CxResult<Option<String>>> {
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.lock().await.entries.get(&key).cloned()) })
    }

    fn delete(&self, key: String) -> BoxFut<'_, CxResult<bool>> {
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.lock().await.entries.remove(&key).is_some()) })
    }

    fn list_keys(&self, limit: usize) -> BoxFut<'_, CxResult<Vec<String>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            Ok(inner
                .lock()
                .await
                .entries
                .keys()
                .take(limit)
                .cloned()
                .collect())
        })
    }

    fn count(&self) -> BoxFut<'_, CxResult<usize>> {
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.lock().await.entries.len()) })
    }

    fn set_alarm(
        &self,
        deadline: Option<Timestamp>,
    ) -> BoxFut<'_, CxResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.lock().await.alarm = deadline;
            Ok(())
        })
    }

    fn get_alarm(&self) -> BoxFut<'_, CxResult<Option<Timestamp>>> {
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.lock().await.alarm) })
    }

    fn descriptor(&self) -> String {
        "memory".into()
    }
}

/// A factory for creating [MemKvBackend] instances.
#[derive(Debug)]
pub struct MemKvBackendFactory;

impl MemKvBackendFactory {
    /// Construct a new [MemKvBackendFactory].
    pub fn create() -> DynKvBackendFactory {
        Arc::new(MemKvBackendFactory)
    }
}

impl KvBackendFactory for MemKvBackendFactory {
    fn default_config(&self, _config: &mut config::Config) -> CxResult<()> {
        Ok(())
    }

    fn validate_config(&self, _config: &config::Config) -> CxResult<()> {
        Ok(())
    }

    fn create(
        &self,
        _builder: Arc<builder::Builder>,
    ) -> BoxFut<'static, CxResult<DynKvBackend>> {
        Box::pin(async move { Ok(MemKvBackend::create()) })
    }
}
