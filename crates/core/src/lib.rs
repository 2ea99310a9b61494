#![deny(missing_docs)]
//! Reference implementation of the [Cortex API](cortex_api).
//!
//! The entry point is [hub::Hub]: construct one from a [Builder]
//! (see [default_builder]), hand it sessions via [hub::Hub::join], and
//! feed it worker command lines via [hub::Hub::handle_command].

use cortex_api::*;

mod common;

pub mod factories;

pub mod registry;

pub mod broadcast;

pub mod kv;

pub mod benchmark;

pub mod mapreduce;

pub mod router;

pub mod hub;

/// Construct a builder wired with the in-memory backend modules.
///
/// - `kv_backend` - The default KV backend is
///   [factories::MemKvBackendFactory].
/// - `object_store` - The default object store is
///   [factories::MemObjectStoreFactory].
pub fn default_builder() -> builder::Builder {
    builder::Builder {
        config: config::Config::default(),
        kv_backend: factories::MemKvBackendFactory::create(),
        object_store: factories::MemObjectStoreFactory::create(),
    }
}
