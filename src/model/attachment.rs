//! Attachment data extracted from a TNEF stream.

/// How an attachment is meant to be displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Disposition {
    /// Referenced from an HTML body via `cid:` — rendered in place.
    Inline,
    /// A regular downloadable attachment.
    #[default]
    Attachment,
}

/// A single attachment, with metadata merged from attachment-level
/// attributes and the attachment's MAPI property list.
#[derive(Debug, Clone, Default)]
pub struct Attachment {
    /// File name. The long MAPI name (`PR_ATTACH_LONG_FILENAME`) wins over
    /// the short `attAttachTitle` name when both are present.
    pub filename: String,

    /// Content-ID (`PR_ATTACH_CONTENT_ID`) referenced from HTML as `cid:`.
    pub content_id: Option<String>,

    /// MIME type from `PR_ATTACH_MIME_TAG`, when the sender recorded one.
    pub mime_tag: Option<String>,

    /// Transport name (`PR_ATTACH_TRANSPORT_NAME`), a rarely-set fallback
    /// source for the file name.
    pub transport_name: Option<String>,

    /// `PR_ATTACH_METHOD` value; 5 marks an embedded message.
    pub method: Option<u32>,

    /// Set to `Inline` when a body references this attachment's content-id.
    pub disposition: Disposition,

    /// Raw decoded payload.
    pub bytes: Vec<u8>,
}

impl Attachment {
    /// Best available file name: long MAPI name, then short title, then
    /// transport name. Empty when the stream carried none.
    pub fn best_name(&self) -> &str {
        if !self.filename.is_empty() {
            return &self.filename;
        }
        self.transport_name.as_deref().unwrap_or("")
    }

    /// Content-ID normalized for matching: angle brackets stripped,
    /// lowercased.
    pub fn normalized_content_id(&self) -> Option<String> {
        self.content_id
            .as_deref()
            .map(|cid| cid.trim().trim_matches(|c| c == '<' || c == '>').to_lowercase())
            .filter(|cid| !cid.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_content_id() {
        let mut att = Attachment::default();
        att.content_id = Some("<Logo@X>".to_string());
        assert_eq!(att.normalized_content_id().as_deref(), Some("logo@x"));

        att.content_id = Some("  plain.id  ".to_string());
        assert_eq!(att.normalized_content_id().as_deref(), Some("plain.id"));

        att.content_id = Some("<>".to_string());
        assert_eq!(att.normalized_content_id(), None);

        att.content_id = None;
        assert_eq!(att.normalized_content_id(), None);
    }

    #[test]
    fn test_best_name_fallback() {
        let mut att = Attachment::default();
        assert_eq!(att.best_name(), "");
        att.transport_name = Some("wire.bin".to_string());
        assert_eq!(att.best_name(), "wire.bin");
        att.filename = "real.bin".to_string();
        assert_eq!(att.best_name(), "real.bin");
    }
}
