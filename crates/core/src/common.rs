use cortex_api::*;

/// Generate a random request id for a pending group operation.
pub(crate) fn random_request_id() -> RequestId {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    format!("req-{:08x}{:08x}", rng.gen::<u32>(), rng.gen::<u32>()).into()
}
