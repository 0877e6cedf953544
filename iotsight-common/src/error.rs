use thiserror::Error;

/// Common error type for IoTSight components.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Upstream unavailable: {0}")]
    Upstream(String),

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to decode upstream response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Geo resolution failed: {0}")]
    GeoResolution(String),

    #[error("{0} is not a currently supported pollutant")]
    UnsupportedPollutant(String),

    #[error("{0} could not be parsed into a valid pollutant field")]
    InvalidField(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using IoTSight's Error.
pub type Result<T> = std::result::Result<T, Error>;
