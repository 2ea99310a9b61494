//! An in-memory implementation of the [ObjectStore].

use cortex_api::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct StoredObject {
    data: bytes::Bytes,
    content_type: String,
    uploaded: String,
}

/// An in-memory implementation of the [ObjectStore], keyed by filename.
#[derive(Debug)]
pub struct MemObjectStore {
    // BTreeMap so `list` comes back in a stable name order
    inner: Arc<Mutex<BTreeMap<String, StoredObject>>>,
}

impl MemObjectStore {
    /// Create a new [MemObjectStore].
    pub fn create() -> DynObjectStore {
        Arc::new(MemObjectStore {
            inner: Arc::new(Mutex::new(BTreeMap::new())),
        })
    }
}

fn iso_now() -> String {
    chrono::DateTime::<chrono::Utc>::from(std::time::SystemTime::now())
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

impl ObjectStore for MemObjectStore {
    fn list(&self) -> BoxFut<'_, CxResult<Vec<ObjectInfo>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            Ok(inner
                .lock()
                .await
                .iter()
                .map(|(name, obj)| ObjectInfo {
                    name: name.clone(),
                    size: obj.data.len(),
                    uploaded: obj.uploaded.clone(),
                })
                .collect())
        })
    }

    fn get(&self, name: String) -> BoxFut<'_, CxResult<Option<ObjectBody>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            Ok(inner.lock().await.get(&name).map(|obj| ObjectBody {
                data: obj.data.clone(),
                content_type: obj.content_type.clone(),
            }))
        })
    }

    fn put(
        &self,
        name: String,
        data: bytes::Bytes,
        content_type: String,
    ) -> BoxFut<'_, CxResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.lock().await.insert(
                name,
                StoredObject {
                    data,
                    content_type,
                    uploaded: iso_now(),
                },
            );
            Ok(())
        })
    }
}

/// A factory for creating [MemObjectStore] instances.
#[derive(Debug)]
pub struct MemObjectStoreFactory;

impl MemObjectStoreFactory {
    /// Construct a new [MemObjectStoreFactory].
    pub fn create() -> DynObjectStoreFactory {
        Arc::new(MemObjectStoreFactory)
    }
}

impl ObjectStoreFactory for MemObjectStoreFactory {
    fn default_config(&self, _config: &mut config::Config) -> CxResult<()> {
        Ok(())
    }

    fn validate_config(&self, _config: &config::Config) -> CxResult<()> {
        Ok(())
    }

    fn create(
        &self,
        _builder: Arc<builder::Builder>,
    ) -> BoxFut<'static, CxResult<DynObjectStore>> {
        Box::pin(async move { Ok(MemObjectStore::create()) })
    }
}
