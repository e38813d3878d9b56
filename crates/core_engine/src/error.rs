//! Error types for the quantum control engine

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Main error type for the quantum control engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid value for config key '{key}': {message}")]
    ConfigValue { key: String, message: String },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: String, actual: String },

    #[error("Numerical failure: {0}")]
    Numeric(String),

    #[error("Linear solver diverged: {0}")]
    SolverDiverged(String),

    #[error("Control basis evaluated outside [0,T] at t = {t}")]
    OutOfDomain { t: f64 },

    #[error("Control derivative requested inside a pi-pulse interval at t = {t}")]
    PiPulseDerivative { t: f64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        EngineError::Config(message.into())
    }

    /// Create a configuration error tied to a specific key
    pub fn config_value(key: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::ConfigValue {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a numerical error
    pub fn numeric(message: impl Into<String>) -> Self {
        EngineError::Numeric(message.into())
    }

    /// Create a dimension mismatch error
    pub fn dimension_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        EngineError::DimensionMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Process exit code for the CLI contract: 1 configuration,
    /// 2 numerical failure, 3 I/O failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::Config(_)
            | EngineError::ConfigValue { .. }
            | EngineError::DimensionMismatch { .. } => 1,
            EngineError::Numeric(_)
            | EngineError::SolverDiverged(_)
            | EngineError::OutOfDomain { .. }
            | EngineError::PiPulseDerivative { .. }
            | EngineError::Internal(_) => 2,
            EngineError::Io(_) => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(EngineError::config("missing ntime").exit_code(), 1);
        assert_eq!(EngineError::numeric("NaN in residual").exit_code(), 2);
        assert_eq!(EngineError::OutOfDomain { t: 1.5 }.exit_code(), 2);
        let io = EngineError::from(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert_eq!(io.exit_code(), 3);
    }

    #[test]
    fn test_display_carries_context() {
        let err = EngineError::config_value("lindblad_type", "unknown value 'squeeze'");
        let msg = format!("{}", err);
        assert!(msg.contains("lindblad_type"));
        assert!(msg.contains("squeeze"));
    }
}
