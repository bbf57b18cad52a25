//! Flatten a parsed message tree into the final artifact list.
//!
//! Naming rules: the root message's bodies become `body.html` / `body.rtf` /
//! `body.txt`; an embedded message at depth `d` with index `i` within its
//! parent prefixes its artifacts with `embedded_<d>_<i>/`. Attachment names
//! are sanitized and made unique across the whole result set.

use std::collections::HashSet;

use crate::model::artifact::{Category, ConvertedFile};
use crate::model::attachment::Attachment;
use crate::model::message::{BodyFormat, Message};

/// Longest permitted artifact name, in bytes.
const MAX_NAME_BYTES: usize = 255;

/// Flatten the tree depth-first into uniquely named artifacts.
pub fn flatten(msg: &Message) -> Vec<ConvertedFile> {
    let mut out = Vec::new();
    let mut used = HashSet::new();
    let mut unnamed = 0usize;
    walk(msg, 0, "", &mut out, &mut used, &mut unnamed);
    out
}

fn walk(
    msg: &Message,
    depth: usize,
    prefix: &str,
    out: &mut Vec<ConvertedFile>,
    used: &mut HashSet<String>,
    unnamed: &mut usize,
) {
    let body_category = if depth == 0 {
        Category::Body
    } else {
        Category::Embedded
    };
    let attachment_category = if depth == 0 {
        Category::Attachment
    } else {
        Category::Embedded
    };

    // All surviving variants are emitted, HTML first.
    for (format, name) in [
        (BodyFormat::Html, "body.html"),
        (BodyFormat::RtfRaw, "body.rtf"),
        (BodyFormat::Plain, "body.txt"),
    ] {
        if let Some(variant) = msg.body(format) {
            let name = unique(&format!("{prefix}{name}"), used);
            out.push(ConvertedFile::new(name, variant.bytes.clone(), body_category));
        }
    }

    for att in &msg.attachments {
        let base = attachment_name(att, unnamed);
        let name = unique(&format!("{prefix}{base}"), used);
        out.push(ConvertedFile::new(name, att.bytes.clone(), attachment_category));
    }

    for (i, embedded) in msg.embedded_messages.iter().enumerate() {
        let child_prefix = format!("{prefix}embedded_{}_{i}/", depth + 1);
        walk(embedded, depth + 1, &child_prefix, out, used, unnamed);
    }
}

/// Sanitized file name for an attachment, synthesizing `attachment_<n>`
/// when the stream carried none.
fn attachment_name(att: &Attachment, unnamed: &mut usize) -> String {
    let sanitized = sanitize(att.best_name());
    if sanitized.is_empty() {
        *unnamed += 1;
        format!("attachment_{unnamed}")
    } else {
        sanitized
    }
}

/// Strip path separators and control bytes, and cap the length.
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|&c| c != '/' && c != '\\' && c as u32 >= 0x20 && c as u32 != 0x7F)
        .collect();
    let cleaned = cleaned.trim().to_string();
    truncate_bytes(&cleaned, MAX_NAME_BYTES)
}

/// Cut a string to at most `max` bytes on a char boundary.
fn truncate_bytes(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Reserve a unique name, appending `_2`, `_3`, … before the extension on
/// collision.
fn unique(base: &str, used: &mut HashSet<String>) -> String {
    if used.insert(base.to_string()) {
        return base.to_string();
    }
    let (stem, ext) = match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (base, None),
    };
    for i in 2..10_000usize {
        let candidate = match ext {
            Some(ext) => format!("{stem}_{i}.{ext}"),
            None => format!("{stem}_{i}"),
        };
        if used.insert(candidate.clone()) {
            return candidate;
        }
    }
    // Practically unreachable; keep names unique regardless.
    let fallback = format!("{stem}_{}", used.len());
    used.insert(fallback.clone());
    fallback
}
