/// Low-level storage errors.
/// This is the error type for the `DataStorage` trait — storage operations can
/// only fail with infrastructure errors, never domain errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Message content encode/decode errors. These are never retryable — a message
/// that cannot be encoded today cannot be encoded tomorrow.
#[derive(Debug, thiserror::Error)]
#[error("codec error: {0}")]
pub struct CodecError(#[from] pub serde_json::Error);

/// Transport-level errors. Retryable up to the configured ceiling.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("send failed: {0}")]
    Send(String),
}

impl TransportError {
    /// Connection errors invalidate the pooled connection; send errors do not.
    pub fn is_connection(&self) -> bool {
        matches!(self, TransportError::Connection(_))
    }
}

/// Errors raised while creating or driving a consumer client. Broker
/// connection failures during client creation are wrapped into the single
/// `Connect` variant and surfaced to the caller.
#[derive(Debug, thiserror::Error)]
pub enum SubscribeError {
    #[error("failed to create consumer client: {0}")]
    Connect(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors on the outbox write path.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error(transparent)]
    Encoding(#[from] CodecError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("dispatch channel closed")]
    DispatcherStopped,
}

/// Errors on the handler-invocation path.
#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    #[error("message content could not be decoded: {0}")]
    Decoding(String),

    #[error("no subscriber bound to group {group} topic {topic}")]
    NoSubscriber { group: String, topic: String },

    #[error("handler failed: {0}")]
    Handler(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("dispatch channel closed")]
    DispatcherStopped,
}

/// Startup configuration errors from the consumer registry. Fatal — reported
/// immediately when the registry is built, never retried at runtime.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate subscriber binding for group {group} topic {topic}")]
    DuplicateBinding { group: String, topic: String },
}

/// Errors from the processing server lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
