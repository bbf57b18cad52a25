//! The intermediate message node assembled during TNEF parsing.

use chrono::{DateTime, Utc};

use super::attachment::Attachment;

/// The format of one body variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFormat {
    /// Plain text (`attBody` or `PR_BODY`).
    Plain,
    /// HTML (`PR_BODY_HTML`, or recovered from encapsulated RTF).
    Html,
    /// RTF that is not HTML-encapsulated, kept verbatim.
    RtfRaw,
    /// Compressed RTF (`PR_RTF_COMPRESSED`) awaiting decompression.
    RtfCompressed,
}

/// One body representation. A message carries at most one variant per
/// format; the variants are not mutually exclusive.
#[derive(Debug, Clone)]
pub struct BodyVariant {
    pub format: BodyFormat,
    /// Windows code page the bytes are encoded in; `None` for Unicode/UTF-8
    /// sources.
    pub codepage: Option<u16>,
    pub bytes: Vec<u8>,
}

/// A message node: the root of a parse, or an embedded message.
///
/// Dropped once the tree is flattened into artifacts.
#[derive(Debug, Clone, Default)]
pub struct Message {
    pub subject: String,
    pub from: String,
    pub to: String,
    pub date: Option<DateTime<Utc>>,
    /// MAPI message class, e.g. `IPM.Note`.
    pub message_class: String,
    /// Active code page for String8 and `\'xx` decoding (from
    /// `attOemCodepage` or `PR_MESSAGE_CODEPAGE`); Windows-1252 when unset.
    pub codepage: Option<u16>,
    pub body_variants: Vec<BodyVariant>,
    /// Attachments in stream order.
    pub attachments: Vec<Attachment>,
    pub embedded_messages: Vec<Message>,
}

impl Message {
    /// Get the body variant with the given format, if present.
    pub fn body(&self, format: BodyFormat) -> Option<&BodyVariant> {
        self.body_variants.iter().find(|v| v.format == format)
    }

    /// Insert a body variant unless one with the same format already exists
    /// (first writer wins, preserving stream order).
    pub fn add_body(&mut self, variant: BodyVariant) {
        if self.body(variant.format).is_none() {
            self.body_variants.push(variant);
        }
    }

    /// Replace the variant with `from` format by a new variant (used when
    /// compressed RTF turns out to encapsulate HTML).
    pub fn replace_body(&mut self, from: BodyFormat, variant: BodyVariant) {
        self.body_variants.retain(|v| v.format != from);
        self.add_body(variant);
    }

    /// True when nothing extractable was found in this node or below it.
    pub fn is_empty(&self) -> bool {
        self.body_variants.is_empty()
            && self.attachments.is_empty()
            && self.embedded_messages.iter().all(Message::is_empty)
    }
}
