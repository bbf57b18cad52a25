//! TNEF (winmail.dat) decoding: stream parsing, MAPI properties, LZFu
//! decompression, and the conversion pipeline.

pub mod cursor;
pub mod lzfu;
pub mod mapi;
pub mod stream;

use tracing::warn;

use crate::error::{ConvertError, Result};
use crate::format::FormatDecoder;
use crate::inline;
use crate::model::artifact::ConvertedFile;
use crate::model::message::{BodyFormat, BodyVariant, Message};
use crate::rtf;
use crate::shape;

/// Decoder for TNEF streams.
pub struct TnefDecoder;

impl TnefDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TnefDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatDecoder for TnefDecoder {
    fn name(&self) -> &'static str {
        "tnef"
    }

    fn matches_magic(&self, prefix: &[u8]) -> bool {
        prefix.len() >= 4 && prefix[..4] == stream::TNEF_SIGNATURE.to_le_bytes()
    }

    fn matches_extension(&self, filename: &str) -> bool {
        let lower = filename.to_lowercase();
        lower.ends_with(".dat") || lower.ends_with(".tnef")
    }

    fn convert(&self, data: &[u8]) -> Result<Vec<ConvertedFile>> {
        let mut msg = stream::parse_message(data)?;
        finish_message(&mut msg);
        let files = shape::flatten(&msg);
        if files.is_empty() {
            return Err(ConvertError::NoContent);
        }
        Ok(files)
    }
}

/// Post-parse body work, applied recursively to embedded messages:
/// compressed RTF is decompressed and, when HTML-encapsulated, turned into
/// the HTML variant; then `cid:` references in HTML are resolved against
/// the attachment pool.
fn finish_message(msg: &mut Message) {
    if let Some(variant) = msg.body(BodyFormat::RtfCompressed).cloned() {
        match lzfu::decompress(&variant.bytes) {
            Ok(rtf_bytes) => {
                if rtf::is_html_encapsulated(&rtf_bytes) && msg.body(BodyFormat::Html).is_none() {
                    let html = rtf::decapsulate(&rtf_bytes, msg.codepage);
                    msg.replace_body(
                        BodyFormat::RtfCompressed,
                        BodyVariant {
                            format: BodyFormat::Html,
                            codepage: msg.codepage,
                            bytes: html,
                        },
                    );
                } else {
                    msg.replace_body(
                        BodyFormat::RtfCompressed,
                        BodyVariant {
                            format: BodyFormat::RtfRaw,
                            codepage: variant.codepage,
                            bytes: rtf_bytes,
                        },
                    );
                }
            }
            Err(e) => {
                warn!(error = %e, "Dropping undecodable compressed-RTF body");
                msg.body_variants
                    .retain(|v| v.format != BodyFormat::RtfCompressed);
            }
        }
    }

    if let Some(idx) = msg
        .body_variants
        .iter()
        .position(|v| v.format == BodyFormat::Html)
    {
        let bytes = std::mem::take(&mut msg.body_variants[idx].bytes);
        msg.body_variants[idx].bytes = inline::resolve_cid_images(&bytes, &mut msg.attachments);
    }

    for embedded in &mut msg.embedded_messages {
        finish_message(embedded);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compressed_rtf_without_html_becomes_raw_rtf() {
        let payload = b"{\\rtf1 not encapsulated}";
        let mut container = Vec::new();
        container.extend_from_slice(&(payload.len() as u32 + 12).to_le_bytes());
        container.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        container.extend_from_slice(&lzfu::MAGIC_UNCOMPRESSED.to_le_bytes());
        container.extend_from_slice(&0u32.to_le_bytes());
        container.extend_from_slice(payload);

        let mut msg = Message::default();
        msg.add_body(BodyVariant {
            format: BodyFormat::RtfCompressed,
            codepage: None,
            bytes: container,
        });
        finish_message(&mut msg);

        assert!(msg.body(BodyFormat::RtfCompressed).is_none());
        assert_eq!(msg.body(BodyFormat::RtfRaw).unwrap().bytes, payload);
        assert!(msg.body(BodyFormat::Html).is_none());
    }

    #[test]
    fn test_undecodable_rtf_dropped() {
        let mut msg = Message::default();
        msg.add_body(BodyVariant {
            format: BodyFormat::RtfCompressed,
            codepage: None,
            bytes: b"too short".to_vec(),
        });
        finish_message(&mut msg);
        assert!(msg.body_variants.is_empty());
    }
}
