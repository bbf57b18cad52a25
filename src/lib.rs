//! `tnefextract` — a pure in-memory TNEF (`winmail.dat`) extraction core.
//!
//! Takes a byte buffer produced by Outlook/Exchange and returns the message
//! bodies, named attachments, and recursively embedded messages it carries,
//! with inline `cid:` images resolved to self-contained `data:` URIs and
//! optional inlining of external images.
//!
//! The crate holds no global state and performs no I/O of its own except
//! the opt-in external image fetch in [`inline_external_images`].

pub mod error;
pub mod format;
pub mod inline;
pub mod model;
pub mod rtf;
pub mod shape;
pub mod tnef;

pub use error::{ConvertError, Result};
pub use format::{FormatDecoder, Registry};
pub use inline::inline_external_images;
pub use model::artifact::{Category, ConvertedFile, FileKind};
pub use tnef::TnefDecoder;

/// Convert a TNEF byte buffer into extracted artifacts.
///
/// Shorthand for [`TnefDecoder::new()`][TnefDecoder] plus
/// [`FormatDecoder::convert`]; use a [`Registry`] when the input format is
/// not known up front.
pub fn convert(data: &[u8]) -> Result<Vec<ConvertedFile>> {
    TnefDecoder::new().convert(data)
}
