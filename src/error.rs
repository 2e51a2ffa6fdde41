//! Error types for the lxdis disassembly-reconstruction library.
//!
//! This module provides structured error handling using thiserror. Most
//! degraded conditions in the pipeline are logged warnings rather than
//! errors; only missing mandatory inputs abort a run (see the pipeline).

use thiserror::Error;

/// Main error type for lxdis operations.
#[derive(Debug, Error)]
pub enum LxError {
    /// A fixed-width field could not be read from the fixup section
    #[error("truncated field '{field}': need {needed} bytes, {available} left")]
    TruncatedField {
        field: &'static str,
        needed: usize,
        available: usize,
    },

    /// A mandatory input section is absent from the header tree
    #[error("missing mandatory section: {0}")]
    MissingSection(&'static str),

    /// Fixup record with an unknown target-type selector
    #[error("page {page}, record {record}: invalid target type {value:#x}")]
    InvalidTargetType { page: u32, record: u32, value: u8 },

    /// No legal splice point for a data-map insertion
    #[error("data map splice failed: {0}")]
    SpliceFailed(&'static str),

    /// The external disassembler failed for one range
    #[error("disassembler failure: {0}")]
    Disassembler(String),

    /// A decode-mode string could not be interpreted
    #[error("invalid decode mode: '{0}'")]
    InvalidMode(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors from the tree writer
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal error
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for lxdis operations
pub type Result<T> = std::result::Result<T, LxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LxError::TruncatedField {
            field: "target offset",
            needed: 4,
            available: 1,
        };
        assert_eq!(
            err.to_string(),
            "truncated field 'target offset': need 4 bytes, 1 left"
        );

        let err = LxError::InvalidTargetType {
            page: 3,
            record: 17,
            value: 0x7,
        };
        assert_eq!(err.to_string(), "page 3, record 17: invalid target type 0x7");
    }
}
