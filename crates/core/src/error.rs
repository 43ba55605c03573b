//! Error types for chronocube

use thiserror::Error;

/// Main error type for chronocube operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid raster dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("Index out of bounds: ({row}, {col}) in raster of size ({rows}, {cols})")]
    IndexOutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("Raster size mismatch: expected ({er}, {ec}), got ({ar}, {ac})")]
    SizeMismatch { er: usize, ec: usize, ar: usize, ac: usize },

    #[error("CRS mismatch: {0} vs {1}")]
    CrsMismatch(String, String),

    #[error("Cube shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Unknown {kind} '{value}' (expected one of: {expected})")]
    Configuration {
        kind: &'static str,
        value: String,
        expected: String,
    },

    #[error("Invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("Data store returned an empty cube: {0}")]
    EmptyResult(String),

    #[error("Missing band '{0}' in cube")]
    MissingBand(String),

    #[error("Unsupported data type: {0}")]
    UnsupportedDataType(String),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Algorithm error: {0}")]
    Algorithm(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a configuration error for an unrecognized tag
    pub fn unknown(kind: &'static str, value: impl Into<String>, expected: &[&str]) -> Self {
        Error::Configuration {
            kind,
            value: value.into(),
            expected: expected.join(", "),
        }
    }

    /// Whether this error was raised while validating configuration,
    /// before any data was loaded
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::Configuration { .. } | Error::InvalidParameter { .. }
        )
    }
}

/// Result type alias for chronocube operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_message_lists_choices() {
        let err = Error::unknown("reducer", "mode", &["median", "mean"]);
        assert!(err.is_configuration());
        assert_eq!(
            err.to_string(),
            "Unknown reducer 'mode' (expected one of: median, mean)"
        );
    }

    #[test]
    fn test_empty_result_is_not_configuration() {
        let err = Error::EmptyResult("no time steps".into());
        assert!(!err.is_configuration());
    }
}
