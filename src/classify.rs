//! Byte-level string classification.
//!
//! Scans a block of raw bytes for ASCII/UTF-8 runs and UTF-16LE sequences,
//! producing `(offset, length, encoding)` hits. This is the per-interval
//! workhorse the concurrent scan engine fans out across its worker pool.

use crate::types::StrEncoding;
use memchr::memchr;

/// Maximum number of distinct 256-codepoint unicode blocks a UTF-16 string
/// may span before it is rejected as noise.
pub const MAX_UNI_BLOCKS: usize = 4;

/// Options for one classification pass.
#[derive(Debug, Clone, Copy)]
pub struct ScanOptions {
    /// Minimum number of characters for a hit.
    pub min_length: usize,
    /// Bound on distinct unicode blocks in UTF-16 candidates.
    pub max_uni_blocks: usize,
}

impl ScanOptions {
    pub fn new(min_length: usize) -> Self {
        Self {
            min_length,
            max_uni_blocks: MAX_UNI_BLOCKS,
        }
    }
}

/// One raw classifier hit, offsets relative to the scanned block's base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedString {
    pub text: String,
    /// Absolute offset of the first byte (block base + local offset).
    pub offset: u64,
    /// Length in characters.
    pub length: usize,
    /// Size in bytes including the terminator when one is present.
    pub size: usize,
    pub encoding: StrEncoding,
}

#[inline]
fn is_printable(b: u8) -> bool {
    b.is_ascii_graphic() || matches!(b, b' ' | b'\t')
}

/// Printable check for a UTF-16 code unit. CJK ranges are left out on
/// purpose; they overwhelm results with misaligned reads.
#[inline]
fn is_printable_wide(cu: u16) -> bool {
    match cu {
        0x0009 | 0x000A | 0x000D | 0x0020..=0x007E => true,
        // Latin supplements and extensions
        0x00A0..=0x024F => true,
        // Greek, Cyrillic
        0x0370..=0x04FF => true,
        // General punctuation, currency
        0x2000..=0x206F | 0x20A0..=0x20CF => true,
        _ => false,
    }
}

/// Scan `data` for strings, reporting offsets as `base + local`.
pub fn scan_bytes(data: &[u8], base: u64, opt: &ScanOptions) -> Vec<DetectedString> {
    let mut out = Vec::new();
    let mut i = 0usize;

    while i < data.len() {
        let b = data[i];
        if b == 0 {
            i += 1;
            continue;
        }

        // A printable byte followed by a zero byte is the signature of a
        // UTF-16LE code unit; try the wide decoder first and fall back to
        // an ASCII run when it comes up short.
        if is_printable(b) && i + 1 < data.len() && data[i + 1] == 0 {
            if let Some((hit, consumed)) = scan_wide_at(data, i, base, opt) {
                out.push(hit);
                i += consumed;
                continue;
            }
        }

        if is_printable(b) || b >= 0x80 {
            let consumed = scan_run_at(data, i, base, opt, &mut out);
            i += consumed;
        } else {
            i += 1;
        }
    }

    out
}

/// Decode a UTF-16LE candidate starting at `start`. Returns the hit and the
/// number of bytes consumed, or `None` when the candidate is too short or
/// spans too many unicode blocks.
fn scan_wide_at(
    data: &[u8],
    start: usize,
    base: u64,
    opt: &ScanOptions,
) -> Option<(DetectedString, usize)> {
    let mut units: Vec<u16> = Vec::new();
    let mut i = start;
    let mut blocks: Vec<u16> = Vec::new();

    while i + 1 < data.len() {
        let cu = u16::from_le_bytes([data[i], data[i + 1]]);
        if cu == 0 || !is_printable_wide(cu) {
            break;
        }
        let block = cu >> 8;
        if !blocks.contains(&block) {
            blocks.push(block);
            if blocks.len() > opt.max_uni_blocks {
                return None;
            }
        }
        units.push(cu);
        i += 2;
    }

    if units.len() < opt.min_length.max(2) {
        return None;
    }

    let mut consumed = i - start;
    let mut size = consumed;
    // swallow the 16-bit terminator if present
    if i + 1 < data.len() && data[i] == 0 && data[i + 1] == 0 {
        consumed += 2;
        size += 2;
    }

    let text = String::from_utf16_lossy(&units);
    let length = text.chars().count();
    Some((
        DetectedString {
            text,
            offset: base + start as u64,
            length,
            size,
            encoding: StrEncoding::Utf16Le,
        },
        consumed,
    ))
}

/// Scan an ASCII/UTF-8 run starting at `start`; pushes a hit when the run is
/// long enough and returns the number of bytes consumed either way.
fn scan_run_at(
    data: &[u8],
    start: usize,
    base: u64,
    opt: &ScanOptions,
    out: &mut Vec<DetectedString>,
) -> usize {
    // Bound the run by the next NUL so the terminator can be accounted for
    // in the hit's byte size.
    let limit = memchr(0, &data[start..]).map_or(data.len(), |p| start + p);

    let mut end = start;
    let mut ascii_only = true;
    while end < limit {
        let b = data[end];
        if is_printable(b) {
            end += 1;
        } else if b >= 0x80 {
            // accept a whole multi-byte UTF-8 sequence or stop the run
            match utf8_seq_len(&data[end..limit]) {
                Some(n) => {
                    ascii_only = false;
                    end += n;
                }
                None => break,
            }
        } else {
            break;
        }
    }

    let run = &data[start..end];
    let consumed = (end - start).max(1);

    let Ok(text) = std::str::from_utf8(run) else {
        return consumed;
    };
    let length = text.chars().count();
    if length < opt.min_length {
        return consumed;
    }

    let terminated = end == limit && limit < data.len();
    out.push(DetectedString {
        text: text.to_string(),
        offset: base + start as u64,
        length,
        size: run.len() + usize::from(terminated),
        encoding: if ascii_only {
            StrEncoding::Ascii
        } else {
            StrEncoding::Utf8
        },
    });
    consumed
}

/// Length of a valid multi-byte UTF-8 sequence at the head of `data`, for
/// characters that are not control codes.
fn utf8_seq_len(data: &[u8]) -> Option<usize> {
    let lead = *data.first()?;
    let need = match lead {
        0xC2..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF4 => 4,
        _ => return None,
    };
    let seq = data.get(..need)?;
    std::str::from_utf8(seq).ok()?;
    Some(need)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(data: &[u8], min: usize) -> Vec<DetectedString> {
        scan_bytes(data, 0, &ScanOptions::new(min))
    }

    #[test]
    fn test_ascii_run_terminated() {
        let hits = scan(b"\x01\x02hello world\0junk", 4);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "hello world");
        assert_eq!(hits[0].offset, 2);
        assert_eq!(hits[0].length, 11);
        // terminator counted
        assert_eq!(hits[0].size, 12);
        assert_eq!(hits[0].encoding, StrEncoding::Ascii);
        assert_eq!(hits[1].text, "junk");
        // run ends at the block boundary, no terminator byte
        assert_eq!(hits[1].size, 4);
    }

    #[test]
    fn test_min_length_filters_short_runs() {
        let hits = scan(b"ab\0cdef\0", 4);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "cdef");
    }

    #[test]
    fn test_utf16le_string() {
        let mut data = vec![0u8; 2];
        for b in b"wide-str" {
            data.push(*b);
            data.push(0);
        }
        data.push(0);
        data.push(0);
        let hits = scan(&data, 4);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "wide-str");
        assert_eq!(hits[0].encoding, StrEncoding::Utf16Le);
        assert_eq!(hits[0].offset, 2);
        // 8 code units + 16-bit terminator
        assert_eq!(hits[0].size, 18);
    }

    #[test]
    fn test_utf16_block_limit_rejects_noise() {
        // cycle through six distinct unicode blocks, two over the limit;
        // every window long enough to qualify spans more than four
        let cycle: [u16; 6] = [0x0041, 0x0141, 0x0241, 0x0391, 0x0441, 0x2041];
        let mut data = Vec::new();
        for i in 0..12usize {
            data.extend_from_slice(&cycle[i % 6].to_le_bytes());
        }
        let opt = ScanOptions {
            min_length: 6,
            max_uni_blocks: 4,
        };
        let hits = scan_bytes(&data, 0, &opt);
        assert!(hits.iter().all(|h| h.encoding != StrEncoding::Utf16Le));
    }

    #[test]
    fn test_utf16_mixed_script_within_block_limit() {
        // two distinct blocks is legitimate mixed-script text
        let mut data = Vec::new();
        for cu in [0x0041u16, 0x0410, 0x0042, 0x0411, 0x0043, 0x0412] {
            data.extend_from_slice(&cu.to_le_bytes());
        }
        data.extend_from_slice(&[0, 0]);
        let hits = scan(&data, 4);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].encoding, StrEncoding::Utf16Le);
        assert_eq!(hits[0].length, 6);
    }

    #[test]
    fn test_utf8_multibyte_run() {
        let hits = scan("caf\u{e9} au lait\0".as_bytes(), 4);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "café au lait");
        assert_eq!(hits[0].encoding, StrEncoding::Utf8);
        assert_eq!(hits[0].length, 12);
        assert_eq!(hits[0].size, 14);
    }

    #[test]
    fn test_base_offset_applied() {
        let hits = scan_bytes(b"\0\0test\0", 0x4000, &ScanOptions::new(4));
        assert_eq!(hits[0].offset, 0x4002);
    }

    #[test]
    fn test_empty_and_zero_data() {
        assert!(scan(&[], 4).is_empty());
        assert!(scan(&[0u8; 64], 4).is_empty());
    }
}
