//! MAPI property-list decoding.
//!
//! An `attMsgProps` or `attAttachment` attribute carries a count followed by
//! that many typed property entries. The decoder surfaces every property by
//! tag; callers pick out the handful they care about.

use chrono::{DateTime, Utc};
use encoding_rs::{UTF_16LE, WINDOWS_1252};
use tracing::warn;

use crate::error::Result;
use crate::tnef::cursor::ByteCursor;

// Property types (MS-OXCDATA).
pub const PT_SHORT: u16 = 0x0002;
pub const PT_LONG: u16 = 0x0003;
pub const PT_FLOAT: u16 = 0x0004;
pub const PT_DOUBLE: u16 = 0x0005;
pub const PT_APPTIME: u16 = 0x0007;
pub const PT_BOOLEAN: u16 = 0x000B;
pub const PT_OBJECT: u16 = 0x000D;
pub const PT_I8: u16 = 0x0014;
pub const PT_STRING8: u16 = 0x001E;
pub const PT_UNICODE: u16 = 0x001F;
pub const PT_SYSTIME: u16 = 0x0040;
pub const PT_CLSID: u16 = 0x0048;
pub const PT_BINARY: u16 = 0x0102;
/// OR'd onto a base type for multi-valued properties.
pub const PT_MULTI_FLAG: u16 = 0x1000;

// Property tags the TNEF parser consults.
pub const PR_MESSAGE_CLASS: u16 = 0x001A;
pub const PR_SUBJECT: u16 = 0x0037;
pub const PR_CLIENT_SUBMIT_TIME: u16 = 0x0039;
pub const PR_SENDER_NAME: u16 = 0x0C1A;
pub const PR_DISPLAY_TO: u16 = 0x0E04;
pub const PR_BODY: u16 = 0x1000;
pub const PR_RTF_COMPRESSED: u16 = 0x1009;
pub const PR_BODY_HTML: u16 = 0x1013;
pub const PR_DISPLAY_NAME: u16 = 0x3001;
pub const PR_ATTACH_DATA: u16 = 0x3701;
pub const PR_ATTACH_FILENAME: u16 = 0x3704;
pub const PR_ATTACH_METHOD: u16 = 0x3705;
pub const PR_ATTACH_LONG_FILENAME: u16 = 0x3707;
pub const PR_ATTACH_TRANSPORT_NAME: u16 = 0x370C;
pub const PR_ATTACH_MIME_TAG: u16 = 0x370E;
pub const PR_ATTACH_CONTENT_ID: u16 = 0x3712;
pub const PR_MESSAGE_CODEPAGE: u16 = 0x3FFD;

/// `PR_ATTACH_METHOD` value marking an embedded message.
pub const ATTACH_EMBEDDED_MSG: u32 = 5;

/// A decoded property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    Short(i16),
    Long(i32),
    Double(f64),
    Boolean(bool),
    Int64(i64),
    /// Windows FILETIME: 100 ns ticks since 1601-01-01.
    SysTime(i64),
    /// Code-page-encoded byte string; decoded lazily once the message
    /// code page is known.
    String8(Vec<u8>),
    Unicode(String),
    Clsid([u8; 16]),
    Binary(Vec<u8>),
    Multi(Vec<PropValue>),
}

/// One tagged property entry.
#[derive(Debug, Clone)]
pub struct Property {
    pub tag: u16,
    pub ptype: u16,
    pub value: PropValue,
}

/// Decode a MAPI property list.
///
/// Tolerant by design: an unknown type code or a truncated value stops the
/// walk with a warning and returns every property decoded so far, so one
/// bad entry cannot poison the whole attribute.
pub fn decode_properties(data: &[u8]) -> Vec<Property> {
    let mut cur = ByteCursor::new(data);
    let count = match cur.read_u32_le() {
        Ok(c) => c,
        Err(_) => return Vec::new(),
    };

    let mut props = Vec::new();
    for i in 0..count {
        match decode_one(&mut cur) {
            Ok(Some(prop)) => props.push(prop),
            Ok(None) => {
                warn!(
                    index = i,
                    offset = cur.position(),
                    "Unknown MAPI property type, stopping property walk"
                );
                break;
            }
            Err(e) => {
                warn!(index = i, error = %e, "Truncated MAPI property list");
                break;
            }
        }
    }
    props
}

/// Decode a single property entry. `Ok(None)` means the type code was not
/// recognized (the remaining bytes cannot be framed).
fn decode_one(cur: &mut ByteCursor<'_>) -> Result<Option<Property>> {
    let ptype = cur.read_u16_le()?;
    let tag = cur.read_u16_le()?;

    // Named properties (tag >= 0x8000) carry a GUID plus an id or name
    // the stream parser has no use for; skip the extra header.
    if tag >= 0x8000 {
        cur.skip(16)?;
        let kind = cur.read_u32_le()?;
        if kind == 1 {
            let name_len = cur.read_u32_le()? as usize;
            cur.skip(padded4(name_len))?;
        } else {
            cur.skip(4)?;
        }
    }

    let base = ptype & !PT_MULTI_FLAG;
    let value = if ptype & PT_MULTI_FLAG != 0 {
        let n = cur.read_u32_le()? as usize;
        if n > cur.remaining() {
            // A count cannot exceed one byte per value; refuse to allocate.
            return Err(crate::error::ConvertError::TruncatedStream {
                offset: cur.position(),
                needed: n,
                remaining: cur.remaining(),
            });
        }
        let mut values = Vec::with_capacity(n.min(1024));
        for _ in 0..n {
            match decode_value(cur, base)? {
                Some(v) => values.push(v),
                None => return Ok(None),
            }
        }
        PropValue::Multi(values)
    } else {
        match decode_value(cur, base)? {
            Some(v) => v,
            None => return Ok(None),
        }
    };

    Ok(Some(Property { tag, ptype, value }))
}

/// Decode one value of the given base type.
fn decode_value(cur: &mut ByteCursor<'_>, base: u16) -> Result<Option<PropValue>> {
    let value = match base {
        PT_SHORT => {
            let v = cur.read_u16_le()? as i16;
            cur.skip(2)?; // padded to 4
            PropValue::Short(v)
        }
        PT_LONG => PropValue::Long(cur.read_u32_le()? as i32),
        PT_BOOLEAN => PropValue::Boolean(cur.read_u32_le()? != 0),
        PT_FLOAT | PT_DOUBLE | PT_APPTIME => {
            let raw = cur.read_u64_le()?.to_le_bytes();
            let v = if base == PT_FLOAT {
                f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as f64
            } else {
                f64::from_le_bytes(raw)
            };
            PropValue::Double(v)
        }
        PT_I8 => PropValue::Int64(cur.read_u64_le()? as i64),
        PT_SYSTIME => PropValue::SysTime(cur.read_u64_le()? as i64),
        PT_CLSID => {
            let mut clsid = [0u8; 16];
            clsid.copy_from_slice(cur.read_bytes(16)?);
            PropValue::Clsid(clsid)
        }
        PT_STRING8 => {
            let bytes = read_counted(cur)?;
            PropValue::String8(bytes)
        }
        PT_UNICODE => {
            let bytes = read_counted(cur)?;
            let (text, _, _) = UTF_16LE.decode(&bytes);
            PropValue::Unicode(text.trim_end_matches('\0').to_string())
        }
        PT_BINARY | PT_OBJECT => PropValue::Binary(read_counted(cur)?),
        _ => return Ok(None),
    };
    Ok(Some(value))
}

/// Read a `count:u32 | count bytes | pad to 4` block. The count is
/// cross-checked against the remaining input before allocation.
fn read_counted(cur: &mut ByteCursor<'_>) -> Result<Vec<u8>> {
    let count = cur.read_u32_le()? as usize;
    if count > cur.remaining() {
        return Err(crate::error::ConvertError::TruncatedStream {
            offset: cur.position(),
            needed: count,
            remaining: cur.remaining(),
        });
    }
    let bytes = cur.read_bytes(count)?.to_vec();
    let pad = padded4(count) - count;
    // Padding is mandatory even at end-of-stream drift; tolerate its absence
    // only when nothing follows.
    if pad > 0 && cur.remaining() >= pad {
        cur.skip(pad)?;
    }
    Ok(bytes)
}

/// Round a byte count up to a multiple of 4.
fn padded4(n: usize) -> usize {
    (n + 3) & !3
}

/// Decode a String8 payload using the message code page, defaulting to
/// Windows-1252 when the page is unknown or unmapped.
pub fn string8_to_string(bytes: &[u8], codepage: Option<u16>) -> String {
    let encoding = codepage
        .and_then(codepage::to_encoding)
        .unwrap_or(WINDOWS_1252);
    let (text, _, _) = encoding.decode(bytes);
    text.trim_end_matches('\0').to_string()
}

/// Convert a Windows FILETIME to a UTC timestamp.
pub fn filetime_to_datetime(filetime: i64) -> Option<DateTime<Utc>> {
    // Seconds between 1601-01-01 and the Unix epoch.
    const EPOCH_DIFF_SECS: i64 = 11_644_473_600;
    let secs = filetime / 10_000_000 - EPOCH_DIFF_SECS;
    let nanos = (filetime % 10_000_000) as u32 * 100;
    DateTime::from_timestamp(secs, nanos)
}

/// Property-list lookup helpers used by the stream parser.
pub trait PropertyListExt {
    fn find(&self, tag: u16) -> Option<&PropValue>;
    fn find_string(&self, tag: u16, codepage: Option<u16>) -> Option<String>;
    fn find_binary(&self, tag: u16) -> Option<&[u8]>;
    fn find_u32(&self, tag: u16) -> Option<u32>;
    fn find_systime(&self, tag: u16) -> Option<DateTime<Utc>>;
}

impl PropertyListExt for [Property] {
    fn find(&self, tag: u16) -> Option<&PropValue> {
        self.iter().find(|p| p.tag == tag).map(|p| &p.value)
    }

    fn find_string(&self, tag: u16, codepage: Option<u16>) -> Option<String> {
        match self.find(tag)? {
            PropValue::String8(bytes) => Some(string8_to_string(bytes, codepage)),
            PropValue::Unicode(s) => Some(s.clone()),
            PropValue::Binary(bytes) => Some(string8_to_string(bytes, codepage)),
            PropValue::Multi(values) => values.first().and_then(|v| match v {
                PropValue::String8(bytes) => Some(string8_to_string(bytes, codepage)),
                PropValue::Unicode(s) => Some(s.clone()),
                _ => None,
            }),
            _ => None,
        }
    }

    fn find_binary(&self, tag: u16) -> Option<&[u8]> {
        match self.find(tag)? {
            PropValue::Binary(bytes) | PropValue::String8(bytes) => Some(bytes),
            PropValue::Multi(values) => values.first().and_then(|v| match v {
                PropValue::Binary(bytes) => Some(bytes.as_slice()),
                _ => None,
            }),
            _ => None,
        }
    }

    fn find_u32(&self, tag: u16) -> Option<u32> {
        match self.find(tag)? {
            PropValue::Long(v) => Some(*v as u32),
            PropValue::Short(v) => Some(*v as u16 as u32),
            PropValue::Int64(v) => Some(*v as u32),
            _ => None,
        }
    }

    fn find_systime(&self, tag: u16) -> Option<DateTime<Utc>> {
        match self.find(tag)? {
            PropValue::SysTime(ft) => filetime_to_datetime(*ft),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prop_header(ptype: u16, tag: u16) -> Vec<u8> {
        let mut v = Vec::new();
        v.extend_from_slice(&ptype.to_le_bytes());
        v.extend_from_slice(&tag.to_le_bytes());
        v
    }

    fn counted(bytes: &[u8]) -> Vec<u8> {
        let mut v = Vec::new();
        v.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        v.extend_from_slice(bytes);
        v.resize(v.len() + (padded4(bytes.len()) - bytes.len()), 0);
        v
    }

    #[test]
    fn test_string8_padding_advances_exactly() {
        // Two consecutive String8 properties: if the first one's padding is
        // wrong, the second decodes garbage.
        let mut data = Vec::new();
        data.extend_from_slice(&2u32.to_le_bytes());
        data.extend_from_slice(&prop_header(PT_STRING8, PR_SUBJECT));
        data.extend_from_slice(&counted(b"hello")); // 5 bytes -> 3 pad
        data.extend_from_slice(&prop_header(PT_STRING8, PR_DISPLAY_NAME));
        data.extend_from_slice(&counted(b"x"));

        let props = decode_properties(&data);
        assert_eq!(props.len(), 2);
        assert_eq!(
            props.find_string(PR_SUBJECT, None).as_deref(),
            Some("hello")
        );
        assert_eq!(props.find_string(PR_DISPLAY_NAME, None).as_deref(), Some("x"));
    }

    #[test]
    fn test_scalar_types() {
        let mut data = Vec::new();
        data.extend_from_slice(&3u32.to_le_bytes());
        data.extend_from_slice(&prop_header(PT_LONG, PR_ATTACH_METHOD));
        data.extend_from_slice(&5u32.to_le_bytes());
        data.extend_from_slice(&prop_header(PT_BOOLEAN, 0x0E1F));
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&prop_header(PT_SHORT, 0x3FDE));
        data.extend_from_slice(&7u16.to_le_bytes());
        data.extend_from_slice(&[0, 0]); // short padded to 4

        let props = decode_properties(&data);
        assert_eq!(props.len(), 3);
        assert_eq!(props.find_u32(PR_ATTACH_METHOD), Some(5));
        assert_eq!(props.find(0x0E1F), Some(&PropValue::Boolean(true)));
        assert_eq!(props.find(0x3FDE), Some(&PropValue::Short(7)));
    }

    #[test]
    fn test_unicode_value() {
        let text: Vec<u8> = "héllo\0".encode_utf16().flat_map(u16::to_le_bytes).collect();
        let mut data = Vec::new();
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&prop_header(PT_UNICODE, PR_SUBJECT));
        data.extend_from_slice(&counted(&text));

        let props = decode_properties(&data);
        assert_eq!(props.find_string(PR_SUBJECT, None).as_deref(), Some("héllo"));
    }

    #[test]
    fn test_named_property_header_skipped() {
        let mut data = Vec::new();
        data.extend_from_slice(&2u32.to_le_bytes());
        // Named property: tag 0x8010, by-id.
        data.extend_from_slice(&prop_header(PT_LONG, 0x8010));
        data.extend_from_slice(&[0u8; 16]); // GUID
        data.extend_from_slice(&0u32.to_le_bytes()); // kind: by id
        data.extend_from_slice(&0x1234u32.to_le_bytes()); // named id
        data.extend_from_slice(&42u32.to_le_bytes()); // the value
        // A normal property must still decode after the named one.
        data.extend_from_slice(&prop_header(PT_STRING8, PR_SUBJECT));
        data.extend_from_slice(&counted(b"after"));

        let props = decode_properties(&data);
        assert_eq!(props.len(), 2);
        assert_eq!(props.find(0x8010), Some(&PropValue::Long(42)));
        assert_eq!(props.find_string(PR_SUBJECT, None).as_deref(), Some("after"));
    }

    #[test]
    fn test_multi_value_binary() {
        let mut data = Vec::new();
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&prop_header(PT_BINARY | PT_MULTI_FLAG, 0x1102));
        data.extend_from_slice(&2u32.to_le_bytes()); // two values
        data.extend_from_slice(&counted(b"ab"));
        data.extend_from_slice(&counted(b"cdef"));

        let props = decode_properties(&data);
        assert_eq!(props.len(), 1);
        match &props[0].value {
            PropValue::Multi(values) => {
                assert_eq!(values.len(), 2);
                assert_eq!(values[0], PropValue::Binary(b"ab".to_vec()));
                assert_eq!(values[1], PropValue::Binary(b"cdef".to_vec()));
            }
            other => panic!("expected multi, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type_keeps_earlier_properties() {
        let mut data = Vec::new();
        data.extend_from_slice(&2u32.to_le_bytes());
        data.extend_from_slice(&prop_header(PT_LONG, PR_ATTACH_METHOD));
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&prop_header(0x00FE, 0x0001)); // bogus type
        data.extend_from_slice(&[0u8; 8]);

        let props = decode_properties(&data);
        assert_eq!(props.len(), 1);
        assert_eq!(props.find_u32(PR_ATTACH_METHOD), Some(1));
    }

    #[test]
    fn test_oversized_count_refused() {
        let mut data = Vec::new();
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&prop_header(PT_BINARY, 0x3701));
        data.extend_from_slice(&0xFFFF_FFF0u32.to_le_bytes()); // absurd length
        data.extend_from_slice(&[0u8; 8]);

        // Must not panic or try to allocate 4 GiB; the walk just stops.
        let props = decode_properties(&data);
        assert!(props.is_empty());
    }

    #[test]
    fn test_string8_codepage_decoding() {
        // 0xE9 is é in Windows-1252.
        assert_eq!(string8_to_string(b"caf\xE9", None), "café");
        assert_eq!(string8_to_string(b"caf\xE9", Some(1252)), "café");
        // Shift-JIS (cp 932): 0x83 0x65 is テ.
        assert_eq!(string8_to_string(&[0x83, 0x65], Some(932)), "テ");
        assert_eq!(string8_to_string(b"plain\0", None), "plain");
    }

    #[test]
    fn test_filetime_conversion() {
        // 2020-01-01T00:00:00Z == 132223104000000000 ticks.
        let dt = filetime_to_datetime(132_223_104_000_000_000).unwrap();
        assert_eq!(dt.to_rfc3339(), "2020-01-01T00:00:00+00:00");
    }
}
