//! The outer TNEF attribute stream.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ signature: u32 = 0x223E9F78                  │
//! │ key: u16                                     │
//! ├──────────────────────────────────────────────┤
//! │ ATTRIBUTE (repeated)                         │
//! │   level: u8          1=message 2=attachment  │
//! │   id_and_type: u32   low word = attribute id │
//! │   length: u32                                │
//! │   data: length bytes                         │
//! │   checksum: u16      additive, mod 65536     │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! The parser is tolerant: checksum mismatches and unknown attributes are
//! logged and skipped, and a truncated tail returns everything parsed so
//! far. Only a bad signature aborts.

use tracing::{debug, warn};

use crate::error::{ConvertError, Result};
use crate::model::attachment::Attachment;
use crate::model::message::{BodyFormat, BodyVariant, Message};
use crate::tnef::cursor::ByteCursor;
use crate::tnef::mapi::{self, PropertyListExt};

/// TNEF stream signature (`78 9F 3E 22` on the wire).
pub const TNEF_SIGNATURE: u32 = 0x223E9F78;

/// Attribute levels.
pub const LVL_MESSAGE: u8 = 1;
pub const LVL_ATTACHMENT: u8 = 2;

// Attribute ids (low word of `id_and_type`). The type word varies between
// producers, so identity is matched on the id alone — except `attBody` and
// `attFrom`, which share id 0x8000 and are split on the type word.
const ID_BODY_OR_FROM: u16 = 0x8000;
const ID_SUBJECT: u16 = 0x8004;
const ID_DATE_SENT: u16 = 0x8005;
const ID_MESSAGE_CLASS: u16 = 0x8008;
const ID_ATTACH_DATA: u16 = 0x800F;
const ID_ATTACH_TITLE: u16 = 0x8010;
const ID_ATTACH_RENDDATA: u16 = 0x9002;
const ID_MSG_PROPS: u16 = 0x9003;
const ID_ATTACHMENT: u16 = 0x9005;
const ID_TNEF_VERSION: u16 = 0x9006;
const ID_OEM_CODEPAGE: u16 = 0x9007;

/// Type word marking a sender triple (`attFrom`).
const ATP_TRIPLES: u16 = 0x0004;

/// Maximum depth for recursively embedded messages.
const MAX_EMBED_DEPTH: usize = 8;

/// 16-bit additive checksum over an attribute payload.
pub fn sum16(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |acc, &b| acc.wrapping_add(b as u16))
}

/// Parse a complete TNEF stream into a message tree.
pub fn parse_message(data: &[u8]) -> Result<Message> {
    parse_at_depth(data, 0)
}

fn parse_at_depth(data: &[u8], depth: usize) -> Result<Message> {
    let mut cur = ByteCursor::new(data);
    let signature = cur.read_u32_le()?;
    if signature != TNEF_SIGNATURE {
        return Err(ConvertError::NotTnef(signature));
    }
    let _key = cur.read_u16_le()?;

    let mut msg = Message::default();
    // The attachment being filled, started by attAttachRenddata.
    let mut pending: Option<Attachment> = None;

    while !cur.eof() {
        let attr = match read_attribute(&mut cur) {
            Ok(attr) => attr,
            Err(e) => {
                warn!(offset = cur.position(), error = %e, "Partial TNEF stream, keeping attributes parsed so far");
                break;
            }
        };

        let declared = attr.checksum;
        let actual = sum16(attr.data);
        if declared != actual {
            warn!(
                id = attr.id,
                declared = declared,
                actual = actual,
                "Attribute checksum mismatch, skipping"
            );
            continue;
        }

        match attr.level {
            LVL_MESSAGE => apply_message_attribute(&mut msg, &attr),
            LVL_ATTACHMENT => apply_attachment_attribute(&mut msg, &mut pending, &attr),
            other => {
                debug!(level = other, id = attr.id, "Unknown attribute level, skipping");
            }
        }
    }

    if let Some(att) = pending.take() {
        msg.attachments.push(att);
    }

    promote_embedded(&mut msg, depth);
    Ok(msg)
}

struct Attribute<'a> {
    level: u8,
    /// Low word of `id_and_type`.
    id: u16,
    /// High word of `id_and_type`.
    atp: u16,
    data: &'a [u8],
    checksum: u16,
}

fn read_attribute<'a>(cur: &mut ByteCursor<'a>) -> Result<Attribute<'a>> {
    let level = cur.read_u8()?;
    let id_and_type = cur.read_u32_le()?;
    let length = cur.read_u32_le()? as usize;
    // Declared length is checked against the remaining input before any
    // allocation happens downstream.
    let data = cur.read_bytes(length)?;
    let checksum = cur.read_u16_le()?;
    Ok(Attribute {
        level,
        id: id_and_type as u16,
        atp: (id_and_type >> 16) as u16,
        data,
        checksum,
    })
}

fn apply_message_attribute(msg: &mut Message, attr: &Attribute<'_>) {
    match attr.id {
        ID_MSG_PROPS => {
            let props = mapi::decode_properties(attr.data);
            apply_message_properties(msg, &props);
        }
        ID_BODY_OR_FROM if attr.atp == ATP_TRIPLES => {
            if let Some(from) = parse_triple(attr.data) {
                if msg.from.is_empty() {
                    msg.from = from;
                }
            }
        }
        ID_BODY_OR_FROM => {
            msg.add_body(BodyVariant {
                format: BodyFormat::Plain,
                codepage: msg.codepage,
                bytes: attr.data.to_vec(),
            });
        }
        ID_SUBJECT => {
            if msg.subject.is_empty() {
                msg.subject = mapi::string8_to_string(attr.data, msg.codepage);
            }
        }
        ID_DATE_SENT => {
            if msg.date.is_none() {
                msg.date = parse_tnef_date(attr.data);
            }
        }
        ID_MESSAGE_CLASS => {
            if msg.message_class.is_empty() {
                msg.message_class = mapi::string8_to_string(attr.data, msg.codepage);
            }
        }
        ID_OEM_CODEPAGE => {
            let mut cur = ByteCursor::new(attr.data);
            if let Ok(cp) = cur.read_u32_le() {
                if msg.codepage.is_none() {
                    msg.codepage = Some(cp as u16);
                }
            }
        }
        ID_TNEF_VERSION => {}
        other => {
            debug!(id = other, "Skipping unhandled message attribute");
        }
    }
}

fn apply_message_properties(msg: &mut Message, props: &[mapi::Property]) {
    // Code page first: every String8 below decodes through it.
    if let Some(cp) = props.find_u32(mapi::PR_MESSAGE_CODEPAGE) {
        msg.codepage = Some(cp as u16);
    }
    let cp = msg.codepage;

    if msg.subject.is_empty() {
        if let Some(subject) = props.find_string(mapi::PR_SUBJECT, cp) {
            msg.subject = subject;
        }
    }
    if msg.from.is_empty() {
        if let Some(from) = props.find_string(mapi::PR_SENDER_NAME, cp) {
            msg.from = from;
        }
    }
    if msg.to.is_empty() {
        if let Some(to) = props.find_string(mapi::PR_DISPLAY_TO, cp) {
            msg.to = to;
        }
    }
    if msg.date.is_none() {
        msg.date = props.find_systime(mapi::PR_CLIENT_SUBMIT_TIME);
    }
    if msg.message_class.is_empty() {
        if let Some(class) = props.find_string(mapi::PR_MESSAGE_CLASS, cp) {
            msg.message_class = class;
        }
    }

    if let Some(body) = props.find_binary(mapi::PR_BODY) {
        msg.add_body(BodyVariant {
            format: BodyFormat::Plain,
            codepage: cp,
            bytes: body.to_vec(),
        });
    }
    if let Some(html) = props.find_binary(mapi::PR_BODY_HTML) {
        msg.add_body(BodyVariant {
            format: BodyFormat::Html,
            codepage: cp,
            bytes: html.to_vec(),
        });
    }
    if let Some(rtf) = props.find_binary(mapi::PR_RTF_COMPRESSED) {
        msg.add_body(BodyVariant {
            format: BodyFormat::RtfCompressed,
            codepage: cp,
            bytes: rtf.to_vec(),
        });
    }
}

fn apply_attachment_attribute(
    msg: &mut Message,
    pending: &mut Option<Attachment>,
    attr: &Attribute<'_>,
) {
    if attr.id == ID_ATTACH_RENDDATA {
        // Rend-data opens a new attachment context.
        if let Some(done) = pending.replace(Attachment::default()) {
            msg.attachments.push(done);
        }
        return;
    }

    // Tolerate attachment attributes arriving before any rend-data.
    let att = pending.get_or_insert_with(Attachment::default);

    match attr.id {
        ID_ATTACH_TITLE => {
            // Short name: only a fallback, the long MAPI name wins.
            if att.filename.is_empty() {
                att.filename = mapi::string8_to_string(attr.data, msg.codepage);
            }
        }
        ID_ATTACH_DATA => {
            att.bytes = attr.data.to_vec();
        }
        ID_ATTACHMENT => {
            let props = mapi::decode_properties(attr.data);
            apply_attachment_properties(att, &props, msg.codepage);
        }
        other => {
            debug!(id = other, "Skipping unhandled attachment attribute");
        }
    }
}

fn apply_attachment_properties(
    att: &mut Attachment,
    props: &[mapi::Property],
    codepage: Option<u16>,
) {
    if let Some(long) = props.find_string(mapi::PR_ATTACH_LONG_FILENAME, codepage) {
        if !long.is_empty() {
            att.filename = long;
        }
    } else if att.filename.is_empty() {
        if let Some(name) = props
            .find_string(mapi::PR_DISPLAY_NAME, codepage)
            .or_else(|| props.find_string(mapi::PR_ATTACH_FILENAME, codepage))
        {
            att.filename = name;
        }
    }

    if att.content_id.is_none() {
        att.content_id = props.find_string(mapi::PR_ATTACH_CONTENT_ID, codepage);
    }
    if att.mime_tag.is_none() {
        att.mime_tag = props
            .find_string(mapi::PR_ATTACH_MIME_TAG, codepage)
            .filter(|s| !s.is_empty());
    }
    if att.transport_name.is_none() {
        att.transport_name = props.find_string(mapi::PR_ATTACH_TRANSPORT_NAME, codepage);
    }
    if att.method.is_none() {
        att.method = props.find_u32(mapi::PR_ATTACH_METHOD);
    }
    if att.bytes.is_empty() {
        if let Some(data) = props.find_binary(mapi::PR_ATTACH_DATA) {
            att.bytes = data.to_vec();
        }
    }
}

/// Move attachments that are really embedded messages into
/// `embedded_messages`, recursing up to [`MAX_EMBED_DEPTH`].
fn promote_embedded(msg: &mut Message, depth: usize) {
    let mut kept = Vec::with_capacity(msg.attachments.len());
    for att in msg.attachments.drain(..) {
        let looks_embedded = att.method == Some(mapi::ATTACH_EMBEDDED_MSG)
            || att.bytes.len() >= 4
                && u32::from_le_bytes([att.bytes[0], att.bytes[1], att.bytes[2], att.bytes[3]])
                    == TNEF_SIGNATURE;

        if !looks_embedded {
            kept.push(att);
            continue;
        }
        if depth >= MAX_EMBED_DEPTH {
            warn!(
                depth = depth,
                filename = %att.filename,
                "Embedded message depth exceeded, keeping as plain attachment"
            );
            kept.push(att);
            continue;
        }
        match parse_at_depth(&att.bytes, depth + 1) {
            Ok(embedded) => msg.embedded_messages.push(embedded),
            Err(_) => kept.push(att),
        }
    }
    msg.attachments = kept;
}

/// Parse an `attFrom` TRP triple: header of four u16s, then the display
/// name and address as counted NUL-terminated strings.
fn parse_triple(data: &[u8]) -> Option<String> {
    let mut cur = ByteCursor::new(data);
    let _trp_id = cur.read_u16_le().ok()?;
    let _total = cur.read_u16_le().ok()?;
    let name_len = cur.read_u16_le().ok()? as usize;
    let addr_len = cur.read_u16_le().ok()? as usize;
    let name = cur.read_bytes(name_len).ok()?;
    let addr = cur.read_bytes(addr_len).ok()?;

    let name = mapi::string8_to_string(name, None);
    let addr = mapi::string8_to_string(addr, None);
    match (name.is_empty(), addr.is_empty()) {
        (false, false) => Some(format!("{name} <{addr}>")),
        (false, true) => Some(name),
        (true, false) => Some(addr),
        (true, true) => None,
    }
}

/// Parse a TNEF date attribute: six u16 fields (year, month, day, hour,
/// minute, second) plus a day-of-week the parser ignores.
fn parse_tnef_date(data: &[u8]) -> Option<chrono::DateTime<chrono::Utc>> {
    use chrono::TimeZone;

    let mut cur = ByteCursor::new(data);
    let year = cur.read_u16_le().ok()? as i32;
    let month = cur.read_u16_le().ok()? as u32;
    let day = cur.read_u16_le().ok()? as u32;
    let hour = cur.read_u16_le().ok()? as u32;
    let minute = cur.read_u16_le().ok()? as u32;
    let second = cur.read_u16_le().ok()? as u32;

    chrono::Utc
        .with_ymd_and_hms(year, month, day, hour, minute, second)
        .single()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build one attribute with a correct checksum.
    fn attribute(level: u8, id_and_type: u32, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(level);
        out.extend_from_slice(&id_and_type.to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(data);
        out.extend_from_slice(&sum16(data).to_le_bytes());
        out
    }

    fn stream(attributes: &[Vec<u8>]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&TNEF_SIGNATURE.to_le_bytes());
        out.extend_from_slice(&0x0100u16.to_le_bytes());
        for a in attributes {
            out.extend_from_slice(a);
        }
        out
    }

    #[test]
    fn test_sum16() {
        assert_eq!(sum16(b""), 0);
        assert_eq!(sum16(b"\x01\x02\x03"), 6);
        assert_eq!(sum16(&[0xFF; 300]), (300 * 255 % 65536) as u16);
    }

    #[test]
    fn test_signature_rejected() {
        let err = parse_message(b"\x00\x01\x02\x03\x00\x00").unwrap_err();
        assert!(matches!(err, ConvertError::NotTnef(0x03020100)));
    }

    #[test]
    fn test_plain_body_and_subject() {
        let data = stream(&[
            attribute(LVL_MESSAGE, 0x0001_8004, b"Greetings\0"),
            attribute(LVL_MESSAGE, 0x0001_8000, b"Hi Bob"),
        ]);
        let msg = parse_message(&data).unwrap();
        assert_eq!(msg.subject, "Greetings");
        let body = msg.body(BodyFormat::Plain).unwrap();
        assert_eq!(body.bytes, b"Hi Bob");
    }

    #[test]
    fn test_attachment_title_and_data() {
        let data = stream(&[
            attribute(LVL_ATTACHMENT, 0x0006_9002, &[0u8; 14]),
            attribute(LVL_ATTACHMENT, 0x0001_8010, b"hello.txt\0"),
            attribute(LVL_ATTACHMENT, 0x0006_800F, b"hello\n"),
        ]);
        let msg = parse_message(&data).unwrap();
        assert_eq!(msg.attachments.len(), 1);
        assert_eq!(msg.attachments[0].filename, "hello.txt");
        assert_eq!(msg.attachments[0].bytes, b"hello\n");
    }

    #[test]
    fn test_attachment_order_preserved() {
        let data = stream(&[
            attribute(LVL_ATTACHMENT, 0x0006_9002, &[0u8; 14]),
            attribute(LVL_ATTACHMENT, 0x0001_8010, b"first.bin\0"),
            attribute(LVL_ATTACHMENT, 0x0006_800F, b"1"),
            attribute(LVL_ATTACHMENT, 0x0006_9002, &[0u8; 14]),
            attribute(LVL_ATTACHMENT, 0x0001_8010, b"second.bin\0"),
            attribute(LVL_ATTACHMENT, 0x0006_800F, b"2"),
        ]);
        let msg = parse_message(&data).unwrap();
        let names: Vec<&str> = msg.attachments.iter().map(|a| a.filename.as_str()).collect();
        assert_eq!(names, ["first.bin", "second.bin"]);
    }

    #[test]
    fn test_checksum_mismatch_skips_attribute_only() {
        let mut bad = attribute(LVL_MESSAGE, 0x0001_8004, b"Ignored\0");
        let n = bad.len();
        bad[n - 2] ^= 0xFF; // corrupt the checksum
        let data = stream(&[attribute(LVL_MESSAGE, 0x0001_8000, b"Kept"), bad]);
        let msg = parse_message(&data).unwrap();
        assert_eq!(msg.subject, "");
        assert_eq!(msg.body(BodyFormat::Plain).unwrap().bytes, b"Kept");
    }

    #[test]
    fn test_truncated_tail_keeps_prefix() {
        let mut data = stream(&[attribute(LVL_MESSAGE, 0x0001_8000, b"Hi")]);
        // A second attribute whose declared length runs past the end.
        data.push(LVL_MESSAGE);
        data.extend_from_slice(&0x0001_8004u32.to_le_bytes());
        data.extend_from_slice(&1000u32.to_le_bytes());
        data.extend_from_slice(b"short");

        let msg = parse_message(&data).unwrap();
        assert_eq!(msg.body(BodyFormat::Plain).unwrap().bytes, b"Hi");
    }

    #[test]
    fn test_tnef_date() {
        let mut data = Vec::new();
        for v in [2024u16, 3, 15, 10, 30, 0, 5] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        let date = parse_tnef_date(&data).unwrap();
        assert_eq!(date.to_rfc3339(), "2024-03-15T10:30:00+00:00");
    }

    #[test]
    fn test_from_triple() {
        let mut data = Vec::new();
        data.extend_from_slice(&4u16.to_le_bytes()); // trp id
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&6u16.to_le_bytes()); // name len incl NUL
        data.extend_from_slice(&12u16.to_le_bytes()); // addr len incl NUL
        data.extend_from_slice(b"Alice\0");
        data.extend_from_slice(b"a@example.x\0");
        assert_eq!(parse_triple(&data).as_deref(), Some("Alice <a@example.x>"));
    }

    #[test]
    fn test_oem_codepage_applies_to_later_strings() {
        let mut cp = Vec::new();
        cp.extend_from_slice(&932u32.to_le_bytes()); // Shift-JIS
        cp.extend_from_slice(&0u32.to_le_bytes());
        let data = stream(&[
            attribute(LVL_MESSAGE, 0x0006_9007, &cp),
            attribute(LVL_MESSAGE, 0x0001_8004, &[0x83, 0x65, 0x00]),
        ]);
        let msg = parse_message(&data).unwrap();
        assert_eq!(msg.codepage, Some(932));
        assert_eq!(msg.subject, "テ");
    }

    #[test]
    fn test_embedded_message_promoted() {
        let inner = stream(&[attribute(LVL_MESSAGE, 0x0001_8000, b"inner body")]);
        let data = stream(&[
            attribute(LVL_ATTACHMENT, 0x0006_9002, &[0u8; 14]),
            attribute(LVL_ATTACHMENT, 0x0006_800F, &inner),
        ]);
        let msg = parse_message(&data).unwrap();
        assert!(msg.attachments.is_empty());
        assert_eq!(msg.embedded_messages.len(), 1);
        assert_eq!(
            msg.embedded_messages[0].body(BodyFormat::Plain).unwrap().bytes,
            b"inner body"
        );
    }
}
