//! Reference module implementations provided by cortex_core.

mod channel_session;
pub use channel_session::*;

mod mem_kv;
pub use mem_kv::*;

mod mem_object_store;
pub use mem_object_store::*;
