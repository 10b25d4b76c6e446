use thiserror::Error;

pub type Result<T> = std::result::Result<T, ShardError>;

/// Errors surfaced by shard operations.
///
/// Serialization conflicts are retryable by the caller; accessors never
/// retry on their own.
#[derive(Debug, Error)]
pub enum ShardError {
    #[error("serialization conflict, retry the transaction")]
    Serialization,
    #[error("object does not exist")]
    NonexistentObject,
    #[error("operation on a deleted object")]
    DeletedObject,
    #[error("vertex has incident edges, use detach delete")]
    VertexHasEdges,
    #[error("edge properties are disabled")]
    PropertiesDisabled,
    #[error("a vertex with this primary key already exists")]
    VertexAlreadyInserted,
    #[error("schema violation: {0}")]
    SchemaViolation(String),
    #[error("primary key outside the shard's key range")]
    OutOfRange,
    #[error("stale shard map version {observed}, current is {current}")]
    StaleShardMap { observed: u64, current: u64 },
    #[error("request timed out")]
    Timeout,
    #[error("corruption detected: {0}")]
    Corruption(&'static str),
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
}
