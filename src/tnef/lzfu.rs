//! Compressed-RTF ("LZFu") decompression per MS-OXRTFCP.
//!
//! The stream is an LZ77 variant over a 4096-byte ring dictionary that is
//! pre-seeded with a fixed RTF preamble, so short documents compress to a
//! handful of back-references into boilerplate.

use crate::error::{ConvertError, Result};
use crate::tnef::cursor::ByteCursor;

/// Header magic for a compressed stream ("LZFu").
pub const MAGIC_COMPRESSED: u32 = 0x75465A4C;

/// Header magic for an uncompressed stream ("MELA"); the body follows
/// verbatim.
pub const MAGIC_UNCOMPRESSED: u32 = 0x414C454D;

const DICT_SIZE: usize = 4096;

/// The exact dictionary preamble from MS-OXRTFCP §3.1.1.1.1 (207 bytes).
/// Must not vary by a single byte or every real-world stream decodes wrong.
const DICT_PREAMBLE: &[u8] = b"{\\rtf1\\ansi\\mac\\deff0\\deftab720{\\fonttbl;}\
{\\f0\\fnil \\froman \\fswiss \\fmodern \\fscript \\fdecor \
MS Sans SerifSymbolArialTimes New RomanCourier\
{\\colortbl\\red0\\green0\\blue0\r\n\\par \\pard\\plain\\f0\\fs20\\b\\i\\u\\tab\\tx";

/// Decompress a `PR_RTF_COMPRESSED` payload back to RTF bytes.
///
/// Output is bounded by the declared `raw_size` and, defensively, by
/// `16 × comp_size` against corrupt headers.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut cur = ByteCursor::new(data);
    let comp_size = cur.read_u32_le()?;
    let raw_size = cur.read_u32_le()? as usize;
    let magic = cur.read_u32_le()?;
    let _crc32 = cur.read_u32_le()?;

    match magic {
        MAGIC_UNCOMPRESSED => {
            // Body follows verbatim.
            let n = cur.remaining().min(raw_size);
            return Ok(cur.read_bytes(n)?.to_vec());
        }
        MAGIC_COMPRESSED => {}
        other => return Err(ConvertError::UnknownLzfuMagic(other)),
    }

    let cap = raw_size.min(16 * comp_size as usize);
    let mut dict = [0u8; DICT_SIZE];
    dict[..DICT_PREAMBLE.len()].copy_from_slice(DICT_PREAMBLE);
    let mut wpos = DICT_PREAMBLE.len();
    let mut out = Vec::with_capacity(cap);

    'stream: while !cur.eof() && out.len() < cap {
        let control = cur.read_u8()?;
        for bit in 0..8 {
            if out.len() >= cap {
                break 'stream;
            }
            if control & (1 << bit) != 0 {
                // Back-reference: offset:12 | length:4, big-endian pair.
                let hi = cur.read_u8()? as usize;
                let lo = cur.read_u8()? as usize;
                let offset = (hi << 4) | (lo >> 4);
                let length = (lo & 0x0F) + 2;
                if offset == wpos {
                    // End-of-stream sentinel.
                    break 'stream;
                }
                for k in 0..length {
                    let b = dict[(offset + k) % DICT_SIZE];
                    out.push(b);
                    dict[wpos] = b;
                    wpos = (wpos + 1) % DICT_SIZE;
                    if out.len() >= cap {
                        break 'stream;
                    }
                }
            } else {
                if cur.eof() {
                    break 'stream;
                }
                let b = cur.read_u8()?;
                out.push(b);
                dict[wpos] = b;
                wpos = (wpos + 1) % DICT_SIZE;
            }
        }
    }

    Ok(out)
}
