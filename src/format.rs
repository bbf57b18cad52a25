//! Format detection and the decoder registry.
//!
//! The registry is an explicit value built once at program start and passed
//! to `detect` — deliberately not a mutable global, so tests construct a
//! fresh registry and registration order cannot leak between callers.

use crate::error::{ConvertError, Result};
use crate::model::artifact::ConvertedFile;

/// A registered file-format decoder.
pub trait FormatDecoder: Send + Sync {
    /// Short identifier, e.g. `"tnef"`.
    fn name(&self) -> &'static str;

    /// Does the file's leading bytes carry this format's magic?
    fn matches_magic(&self, prefix: &[u8]) -> bool;

    /// Is this file name's extension associated with the format?
    fn matches_extension(&self, filename: &str) -> bool;

    /// Decode the full input into extracted artifacts.
    fn convert(&self, data: &[u8]) -> Result<Vec<ConvertedFile>>;
}

/// An ordered collection of decoders.
#[derive(Default)]
pub struct Registry {
    decoders: Vec<Box<dyn FormatDecoder>>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in decoders registered.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(crate::tnef::TnefDecoder::new()));
        registry
    }

    /// Add a decoder. Intended for process-init time; the registry is
    /// immutable afterwards.
    pub fn register(&mut self, decoder: Box<dyn FormatDecoder>) {
        self.decoders.push(decoder);
    }

    /// Pick the decoder for a file.
    ///
    /// Magic is authoritative and order-insensitive; the extension is only
    /// a fallback, with ties going to the first-registered decoder.
    pub fn detect(&self, name: &str, data: &[u8]) -> Option<&dyn FormatDecoder> {
        let prefix = &data[..data.len().min(16)];
        if let Some(by_magic) = self.decoders.iter().find(|d| d.matches_magic(prefix)) {
            return Some(by_magic.as_ref());
        }
        self.decoders
            .iter()
            .find(|d| d.matches_extension(name))
            .map(|d| d.as_ref())
    }

    /// Detect and convert in one step.
    pub fn convert(&self, name: &str, data: &[u8]) -> Result<Vec<ConvertedFile>> {
        match self.detect(name, data) {
            Some(decoder) => decoder.convert(data),
            None => Err(ConvertError::UnsupportedFormat(name.to_string())),
        }
    }
}
