use admiral_controller_core::ResourceType;

/// Failures surfaced by controllers, caches and handlers.
///
/// None of these are fatal: they are returned to the driver, which logs them and decides whether
/// to retry.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A watch delivered an object of a different kind than the controller handles.
    #[error("type assertion failed, {found:?} is not of type {expected}")]
    TypeMismatch { expected: String, found: String },

    #[error("failed to decode {kind}: {reason}")]
    Decode { kind: String, reason: String },

    #[error(
        "op={op} type={kind} name={name} namespace={namespace} message=nothing to update, {kind} not found in cache"
    )]
    NotFoundInCache {
        op: &'static str,
        kind: ResourceType,
        name: String,
        namespace: String,
    },

    #[error("kubernetes client is not initialized, txId={tx_id}")]
    ClientNotInitialized { tx_id: String },

    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error("handler failed: {0}")]
    Handler(#[source] anyhow::Error),

    #[error("controller is shutting down")]
    Cancelled,
}
