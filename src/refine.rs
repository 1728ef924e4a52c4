//! Boundary refinement of string candidates.
//!
//! A reference address that lands strictly inside a candidate means the byte
//! scan merged two adjacent strings; the address is where the second one
//! really begins. Each such address cuts one candidate into a prefix and a
//! suffix. Fragment text is re-decoded from the buffer, never sliced from
//! the old string: cutting a UTF-16 or UTF-8 run at an arbitrary byte can
//! produce sequences that no longer decode, and those fragments are dropped.

use crate::types::{ExtractedString, Range, StringEncoding};

/// Split candidates at every reference offset that falls strictly inside one.
///
/// `offsets` are file offsets, applied in the order given; an offset equal
/// to a candidate's start or end is a no-op, and one offset never splits
/// more than one candidate. Fragments shorter than `min_len` characters are
/// dropped. The result is re-sorted by offset, since fragment insertion does
/// not preserve the global order.
pub fn split_candidates(
    buf: &[u8],
    mut strings: Vec<ExtractedString>,
    offsets: &[u64],
    min_len: usize,
) -> Vec<ExtractedString> {
    for &offset in offsets {
        let mut split_done = false;
        let mut next = Vec::with_capacity(strings.len() + 1);

        for s in strings {
            if !split_done && s.range.offset < offset && offset < s.range.end() {
                split_done = true;
                let prefix = Range::new(s.range.offset, offset - s.range.offset);
                let suffix = Range::new(offset, s.range.end() - offset);
                for range in [prefix, suffix] {
                    if let Some(fragment) = decode_fragment(buf, range, s.encoding, min_len) {
                        next.push(fragment);
                    }
                }
            } else {
                next.push(s);
            }
        }

        strings = next;
    }

    strings.sort_by_key(|s| s.range.offset);
    strings
}

/// Re-decode one fragment from the buffer, or `None` if it fails to decode
/// or is shorter than `min_len` characters.
fn decode_fragment(
    buf: &[u8],
    range: Range,
    encoding: StringEncoding,
    min_len: usize,
) -> Option<ExtractedString> {
    let start = usize::try_from(range.offset).ok()?;
    let end = usize::try_from(range.end()).ok()?;
    let bytes = buf.get(start..end)?;

    let text = match encoding {
        StringEncoding::Ascii => std::str::from_utf8(bytes).ok()?.to_string(),
        StringEncoding::Utf8 => {
            // blob-mode candidates carry their text with newlines stripped;
            // fragments keep that convention
            std::str::from_utf8(bytes).ok()?.replace('\n', "")
        }
        StringEncoding::Unicode => {
            if bytes.len() % 2 != 0 {
                return None;
            }
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .collect();
            String::from_utf16(&units).ok()?
        }
    };

    if text.chars().count() < min_len {
        return None;
    }
    Some(ExtractedString::new(text, range, encoding))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(buf: &[u8], offset: u64, length: u64) -> ExtractedString {
        let start = offset as usize;
        let text = std::str::from_utf8(&buf[start..start + length as usize]).unwrap();
        ExtractedString::new(text, Range::new(offset, length), StringEncoding::Ascii)
    }

    fn buffer_with(at: usize, text: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; at + text.len() + 16];
        buf[at..at + text.len()].copy_from_slice(text);
        buf
    }

    #[test]
    fn test_split_exact() {
        let buf = buffer_with(100, b"ABCDEFGH");
        let strings = vec![candidate(&buf, 100, 8)];

        let out = split_candidates(&buf, strings, &[104], 4);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].text, "ABCD");
        assert_eq!(out[0].range, Range::new(100, 4));
        assert_eq!(out[1].text, "EFGH");
        assert_eq!(out[1].range, Range::new(104, 4));
    }

    #[test]
    fn test_split_drops_short_fragment() {
        let buf = buffer_with(100, b"ABCDEFGH");
        let strings = vec![candidate(&buf, 100, 8)];

        let out = split_candidates(&buf, strings, &[105], 5);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "ABCDE");
    }

    #[test]
    fn test_split_drops_both_fragments() {
        let buf = buffer_with(100, b"ABCDEFGH");
        let strings = vec![candidate(&buf, 100, 8)];

        let out = split_candidates(&buf, strings, &[104], 5);
        assert!(out.is_empty());
    }

    #[test]
    fn test_boundary_addresses_do_not_split() {
        let buf = buffer_with(100, b"ABCDEFGH");
        let strings = vec![candidate(&buf, 100, 8)];

        let out = split_candidates(&buf, strings.clone(), &[100], 4);
        assert_eq!(out, strings);
        let out = split_candidates(&buf, strings.clone(), &[108], 4);
        assert_eq!(out, strings);
    }

    #[test]
    fn test_address_outside_any_candidate_is_noop() {
        let buf = buffer_with(100, b"ABCDEFGH");
        let strings = vec![candidate(&buf, 100, 8)];

        let out = split_candidates(&buf, strings.clone(), &[50, 300], 4);
        assert_eq!(out, strings);
    }

    #[test]
    fn test_one_address_splits_only_one_candidate() {
        // two candidates, the second nested-looking range would also contain
        // the address if it were checked; only the first match is split
        let buf = buffer_with(100, b"AAAABBBBCCCC");
        let strings = vec![candidate(&buf, 100, 8), candidate(&buf, 100, 12)];

        let out = split_candidates(&buf, strings, &[104], 4);
        // first candidate split into two, second untouched
        assert_eq!(out.len(), 3);
        assert_eq!(out.iter().filter(|s| s.range.length == 12).count(), 1);
    }

    #[test]
    fn test_result_sorted_after_split() {
        let buf = buffer_with(100, b"AAAABBBBXXXXXXCCCCDDDD");
        let strings = vec![candidate(&buf, 114, 8), candidate(&buf, 100, 8)];

        let out = split_candidates(&buf, strings, &[118, 104], 4);
        let offsets: Vec<u64> = out.iter().map(|s| s.range.offset).collect();
        assert_eq!(offsets, [100, 104, 114, 118]);
    }

    #[test]
    fn test_unicode_fragment_redecoded() {
        // "wide" in UTF-16LE at offset 10
        let mut buf = vec![0u8; 32];
        buf[10..18].copy_from_slice(b"w\x00i\x00d\x00e\x00");
        let strings = vec![ExtractedString::new(
            "wide",
            Range::new(10, 8),
            StringEncoding::Unicode,
        )];

        let out = split_candidates(&buf, strings, &[14], 2);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].text, "wi");
        assert_eq!(out[1].text, "de");
    }

    #[test]
    fn test_unicode_fragment_cut_off_boundary_dropped() {
        let mut buf = vec![0u8; 32];
        buf[10..18].copy_from_slice(b"w\x00i\x00d\x00e\x00");
        let strings = vec![ExtractedString::new(
            "wide",
            Range::new(10, 8),
            StringEncoding::Unicode,
        )];

        // odd split point: both fragments have odd byte lengths and neither
        // can re-decode as UTF-16
        let out = split_candidates(&buf, strings, &[13], 1);
        assert!(out.is_empty());
    }
}
