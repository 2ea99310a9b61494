//! Test utilities associated with client identity.

use cortex_api::*;

/// Build a descriptor for a test client.
pub fn descriptor(id: &str, vector: &[f64]) -> ClientDescriptor {
    ClientDescriptor {
        id: id.into(),
        joined_at: "2024-01-01T00:00:00Z".into(),
        vector: vector.to_vec(),
    }
}

/// The raw join payload for a test client, as a worker would send it.
pub fn join_payload(id: &str, vector: &[f64]) -> serde_json::Value {
    serde_json::to_value(descriptor(id, vector)).expect("descriptor encodes")
}
