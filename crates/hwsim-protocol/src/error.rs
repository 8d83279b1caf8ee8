//! Error types for simulator protocol parsing

use thiserror::Error;

/// Errors that can occur while parsing protocol data
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Buffer is incomplete - need more data
    #[error("incomplete data: need {needed} more bytes")]
    Incomplete { needed: usize },

    /// Invalid frame structure
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Filter command parameters do not match `XXX,XXX`
    #[error("invalid CAN filter: {0}")]
    InvalidFilter(String),

    /// Configuration item with an unknown value width
    #[error("invalid configuration key: 0x{0:08X}")]
    InvalidConfigKey(u32),

    /// Checksum mismatch
    #[error("checksum mismatch: expected {expected:02X?}, got {actual:02X?}")]
    ChecksumMismatch { expected: (u8, u8), actual: (u8, u8) },
}
