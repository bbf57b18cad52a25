//! Centralized error types for tnefextract.

use thiserror::Error;

/// All errors produced by the extraction core.
///
/// Errors inside a single attribute (bad MAPI type code, checksum mismatch,
/// malformed string length) are recovered locally and never reach the caller;
/// only stream-framing failures and empty results surface here.
#[derive(Error, Debug)]
pub enum ConvertError {
    /// The input does not start with the TNEF signature.
    #[error("Not a TNEF stream: bad signature 0x{0:08X}")]
    NotTnef(u32),

    /// The stream ended before a declared length was satisfied.
    #[error("Truncated stream at offset {offset}: needed {needed} byte(s), {remaining} remain")]
    TruncatedStream {
        offset: usize,
        needed: usize,
        remaining: usize,
    },

    /// A compressed-RTF header carried neither the LZFu nor the MELA magic.
    #[error("Unknown compressed-RTF magic 0x{0:08X}")]
    UnknownLzfuMagic(u32),

    /// No registered decoder matched the input.
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    /// The parse succeeded but produced zero artifacts.
    #[error("No content found in file")]
    NoContent,
}

/// Convenience alias for `Result<T, ConvertError>`.
pub type Result<T> = std::result::Result<T, ConvertError>;
