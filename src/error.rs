use thiserror::Error;

/// Top-level error for the ETL binary and infrastructure plumbing.
#[derive(Error, Debug)]
pub enum EtlError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Load(#[from] LoadError),
}

pub type Result<T> = std::result::Result<T, EtlError>;

/// Failures raised by the extractor against the upstream open-data API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("upstream unavailable after {attempts} attempts")]
    UpstreamUnavailable { attempts: u32 },

    #[error("upstream rate limited after {attempts} attempts")]
    UpstreamRateLimited { attempts: u32 },

    #[error("upstream returned malformed response: {0}")]
    UpstreamMalformedResponse(String),

    #[error("upstream rejected request with HTTP {status}")]
    UpstreamRejected { status: u16 },
}

/// Per-record rejection reasons from the transformer. Counted, never raised.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    #[error("unknown station")]
    UnknownStation,

    #[error("missing or invalid timestamp")]
    InvalidTimestamp,

    #[error("no usable measurement fields")]
    NoUsableData,
}

/// Failures raised by the loader against the reading store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("batch write failed: {0}")]
    BatchWriteFailed(String),
}
