//! Cortex error types.

use std::sync::Arc;

/// A clonable trait-object inner error.
#[derive(Clone, Default)]
pub struct DynInnerError(
    pub Option<Arc<dyn std::error::Error + 'static + Send + Sync>>,
);

impl std::fmt::Debug for DynInnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Display for DynInnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.as_ref() {
            None => f.write_str("None"),
            Some(s) => s.fmt(f),
        }
    }
}

impl std::error::Error for DynInnerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.as_ref().map(|s| {
            let out: &(dyn std::error::Error + 'static) = &**s;
            out
        })
    }
}

impl DynInnerError {
    /// Construct a new DynInnerError from a source error.
    pub fn new<E: std::error::Error + 'static + Send + Sync>(e: E) -> Self {
        Self(Some(Arc::new(e)))
    }
}

/// The core cortex error type. This type is used in all external
/// cortex apis as well as internally in some modules.
///
/// This type is required to implement `Clone` to ease the use of
/// shared futures, which require the entire `Result` to be `Clone`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CxError {
    /// Input that could not be parsed or validated. Surfaced verbatim
    /// to the caller, never logged as an error.
    #[error("malformed input: {ctx}")]
    Malformed {
        /// What was malformed about the input.
        ctx: Arc<str>,
    },

    /// A group operation refused to start because no clients are
    /// registered.
    #[error("no clients registered")]
    NoClients,

    /// A map-reduce start was given a payload with zero parseable tasks.
    #[error("no tasks parsed")]
    NoTasks,

    /// A session can no longer be used for delivery. The owning client
    /// must be evicted from the registry.
    #[error("session dead: {ctx}")]
    SessionDead {
        /// Why the session is considered dead.
        ctx: Arc<str>,
    },

    /// Generic cortex internal error.
    #[error("{ctx} (src: {src})")]
    Other {
        /// Any context associated with this error.
        ctx: Arc<str>,

        /// The inner error (if any).
        #[source]
        src: DynInnerError,
    },
}

impl CxError {
    /// Construct a "malformed input" error.
    pub fn malformed<C: std::fmt::Display>(ctx: C) -> Self {
        Self::Malformed {
            ctx: ctx.to_string().into_boxed_str().into(),
        }
    }

    /// Construct a "dead session" error.
    pub fn session_dead<C: std::fmt::Display>(ctx: C) -> Self {
        Self::SessionDead {
            ctx: ctx.to_string().into_boxed_str().into(),
        }
    }

    /// Construct an "other" error with an inner source error.
    pub fn other_src<
        C: std::fmt::Display,
        S: std::error::Error + 'static + Send + Sync,
    >(
        ctx: C,
        src: S,
    ) -> Self {
        Self::Other {
            ctx: ctx.to_string().into_boxed_str().into(),
            src: DynInnerError::new(src),
        }
    }

    /// Construct an "other" error.
    pub fn other<C: std::fmt::Display>(ctx: C) -> Self {
        Self::Other {
            ctx: ctx.to_string().into_boxed_str().into(),
            src: DynInnerError::default(),
        }
    }
}

/// The core cortex result type.
pub type CxResult<T> = Result<T, CxError>;
