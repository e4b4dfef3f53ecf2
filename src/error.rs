//! Error types for the roost coordination plane.

/// Top-level error type for the satellite coordination server.
#[derive(Debug, thiserror::Error)]
pub enum RoostError {
    /// Invalid user-supplied configuration (bad URL shape, credential
    /// length out of range). Never persisted; surfaced as a 4xx.
    #[error("config error: {0}")]
    Config(String),

    /// A command endpoint was instantiated with missing or inconsistent
    /// credentials. The endpoint slot is left empty; the server keeps running.
    #[error("endpoint config error: {0}")]
    EndpointConfig(String),

    /// Transient failure while contacting a command endpoint.
    #[error("endpoint runtime error: {0}")]
    EndpointRuntime(String),

    /// An externally supplied path resolved outside its root directory.
    #[error("unsafe path: {0}")]
    PathUnsafe(String),

    /// Config store read/write error.
    #[error("store error: {0}")]
    Store(String),

    /// Upstream catalog or asset fetch error.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// A requested asset, release, or record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Satellite or backend transport error.
    #[error("transport error: {0}")]
    Transport(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, RoostError>;
