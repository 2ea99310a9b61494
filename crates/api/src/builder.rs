//! Builder-related types.

use crate::*;
use std::sync::Arc;

/// The general cortex builder.
/// This contains both configuration and factory instances,
/// allowing construction of runtime module instances.
pub struct Builder {
    /// The module configuration to be used when building modules.
    /// This can be loaded from disk or modified before freezing the
    /// builder.
    pub config: config::Config,

    /// The [kv::KvBackendFactory] to be used for creating
    /// [kv::KvBackend] instances.
    pub kv_backend: kv::DynKvBackendFactory,

    /// The [object_store::ObjectStoreFactory] to be used for creating
    /// [object_store::ObjectStore] instances.
    pub object_store: object_store::DynObjectStoreFactory,
}

impl std::fmt::Debug for Builder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builder")
            .field("config", &self.config)
            .finish()
    }
}

impl Builder {
    /// Construct a default config given the configured module factories.
    /// Note, this should be called before freezing the Builder instance
    /// in an Arc<>.
    pub fn set_default_config(&mut self) -> CxResult<()> {
        let Self {
            config,
            kv_backend,
            object_store,
        } = self;

        kv_backend.default_config(config)?;
        object_store.default_config(config)?;

        Ok(())
    }

    /// Helper to call [Builder::set_default_config] in a chaining
    /// builder-pattern style.
    pub fn with_default_config(mut self) -> CxResult<Self> {
        self.set_default_config()?;
        Ok(self)
    }

    /// Validate the config against the configured module factories.
    pub fn validate_config(&self) -> CxResult<()> {
        self.kv_backend.validate_config(&self.config)?;
        self.object_store.validate_config(&self.config)?;
        Ok(())
    }

    /// Freeze the builder so modules can be constructed from it.
    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }
}
