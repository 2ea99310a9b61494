#![deny(missing_docs)]
//! Cortex API contains the hub module traits and the basic types required
//! to define the api of those traits.
//!
//! If you want to run a hub, please see the cortex_core crate.

/// Boxed future type.
pub type BoxFut<'a, T> =
    std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

pub mod builder;
pub mod config;

pub mod kv;
pub use kv::*;

pub mod object_store;
pub use object_store::*;

mod error;
pub use error::*;

pub mod id;
pub use id::{ClientId, RequestId, TaskId};

mod timestamp;
pub use timestamp::*;

mod client;
pub use client::*;

mod session;
pub use session::*;

pub mod protocol;
pub use protocol::{HubMessage, MatchHint};

pub mod report;
pub use report::*;
