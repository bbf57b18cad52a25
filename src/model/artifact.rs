//! Final output artifacts.
//!
//! A conversion flattens the parsed message tree into a linear list of
//! [`ConvertedFile`]s. The `data` payload is never serialized; callers serve
//! it on demand and ship only the metadata to clients.

use serde::Serialize;

/// Where an artifact came from within the message tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// A message body variant (plain text, HTML, or raw RTF).
    Body,
    /// A regular named attachment.
    Attachment,
    /// Anything extracted from a nested embedded message.
    Embedded,
}

/// Coarse UI category derived from a file name's extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Html,
    Text,
    Rtf,
    Image,
    Pdf,
    Document,
    Spreadsheet,
    File,
}

impl FileKind {
    /// Classify a file name by its extension.
    pub fn from_name(name: &str) -> Self {
        let lower = name.to_lowercase();
        let ext = lower.rsplit('.').next().unwrap_or("");
        match ext {
            "html" | "htm" => Self::Html,
            "txt" => Self::Text,
            "rtf" => Self::Rtf,
            "png" | "jpg" | "jpeg" | "gif" | "webp" | "bmp" | "svg" => Self::Image,
            "pdf" => Self::Pdf,
            "doc" | "docx" => Self::Document,
            "xls" | "xlsx" => Self::Spreadsheet,
            _ => Self::File,
        }
    }

    /// The lowercase tag used in the JSON wire shape.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Text => "text",
            Self::Rtf => "rtf",
            Self::Image => "image",
            Self::Pdf => "pdf",
            Self::Document => "document",
            Self::Spreadsheet => "spreadsheet",
            Self::File => "file",
        }
    }
}

/// A single extracted file: the unit of conversion output.
#[derive(Debug, Clone, Serialize)]
pub struct ConvertedFile {
    /// Safe file name, unique within one result set.
    pub name: String,

    /// Payload size in bytes.
    pub size: usize,

    /// UI category tag.
    #[serde(rename = "type")]
    pub kind: FileKind,

    /// Origin of the artifact within the message tree.
    pub category: Category,

    /// Content type guessed from the file name extension.
    #[serde(skip)]
    pub mime_hint: String,

    /// Raw byte payload. Served on demand, never serialized to clients.
    #[serde(skip)]
    pub data: Vec<u8>,
}

impl ConvertedFile {
    /// Build an artifact, deriving `size`, `kind`, and `mime_hint` from the
    /// name and payload.
    pub fn new(name: String, data: Vec<u8>, category: Category) -> Self {
        let kind = FileKind::from_name(&name);
        let mime_hint = mime_hint_for(&name, kind);
        Self {
            size: data.len(),
            kind,
            category,
            mime_hint,
            name,
            data,
        }
    }
}

/// Content type for serving an artifact, from its name and kind.
pub fn mime_hint_for(name: &str, kind: FileKind) -> String {
    match kind {
        FileKind::Html => "text/html; charset=utf-8".to_string(),
        FileKind::Text => "text/plain; charset=utf-8".to_string(),
        FileKind::Rtf => "application/rtf".to_string(),
        FileKind::Image => image_mime(name).to_string(),
        FileKind::Pdf => "application/pdf".to_string(),
        _ => "application/octet-stream".to_string(),
    }
}

/// Image content type from a file name extension. PNG when unrecognized.
pub fn image_mime(name: &str) -> &'static str {
    let lower = name.to_lowercase();
    let ext = lower.rsplit('.').next().unwrap_or("");
    match ext {
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        _ => "image/png",
    }
}
