//! Error types for feed loading, reference data and configuration.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalyzerError {
    /// A local feed or reference file could not be read.
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A JSON feed did not match the expected shape.
    #[error("Failed to parse feed {origin}: {source}")]
    Feed {
        origin: String,
        #[source]
        source: serde_json::Error,
    },

    /// A remote feed could not be fetched. Retrying the whole run is the only recovery.
    #[error("Failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// Embedded or user-supplied reference data (enrollments, aliases) is malformed.
    #[error("Invalid reference data in {origin}: {source}")]
    Reference {
        origin: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid score '{value}' for label {label}")]
    InvalidScore { label: String, value: String },

    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidConfig { field: String, reason: String },
}

pub type Result<T> = std::result::Result<T, AnalyzerError>;
