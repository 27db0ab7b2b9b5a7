//! Character encoding detection and translation.
//!
//! Input documents arrive as raw bytes in one of the built-in encodings
//! (UTF-8, UTF-16 LE/BE, ISO-8859-1, US-ASCII), a single-byte encoding known
//! to `encoding_rs`, or a caller-described unknown encoding. The scanner
//! pulls validated characters out of the raw bytes through [`XmlEncoding`];
//! everything downstream of the scanner works on internal UTF-8.

use std::rc::Rc;

use encoding_rs::Encoding as RsEncoding;

/// Result of decoding one character from a byte buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum NextChar {
    /// A full character and the number of input bytes it occupied.
    Char { c: char, len: usize },
    /// The buffer ends inside a multi-byte sequence.
    Incomplete,
    /// The bytes can never form a legal character in this encoding.
    Malformed,
}

/// Byte-to-character map for encodings the parser has no built-in tables
/// for, filled by the caller's unknown-encoding hook.
///
/// Each entry is either a Unicode scalar value below `0x10000` (and outside
/// the surrogate block), `-1` for a byte that can never start a character,
/// or `-2`/`-3`/`-4` for a byte that introduces a sequence of that many
/// bytes. Multi-byte sequences are resolved through `convert`.
pub struct UnknownEncoding {
    map: [i32; 256],
    convert: Option<Box<dyn Fn(&[u8]) -> Option<char>>>,
}

impl UnknownEncoding {
    /// Validates the map and builds the encoding description. Returns
    /// `None` when a map entry is out of range, per the contract above.
    pub fn new(
        map: [i32; 256],
        convert: Option<Box<dyn Fn(&[u8]) -> Option<char>>>,
    ) -> Option<Self> {
        for &v in map.iter() {
            match v {
                -4..=-1 => {}
                0..=0xFFFF => {
                    if (0xD800..=0xDFFF).contains(&v) {
                        return None;
                    }
                }
                _ => return None,
            }
        }
        Some(Self { map, convert })
    }
}

impl std::fmt::Debug for UnknownEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("UnknownEncoding")
            .field("convert", &self.convert.is_some())
            .finish()
    }
}

/// A concrete input encoding.
#[derive(Debug, Clone)]
pub(crate) enum XmlEncoding {
    Utf8,
    Utf16Le,
    Utf16Be,
    Latin1,
    Ascii,
    /// Table-driven single- or multi-byte encoding: a registered unknown
    /// encoding or a single-byte encoding adopted from `encoding_rs`.
    Table(Rc<UnknownEncoding>),
}

impl XmlEncoding {
    pub(crate) fn min_bytes_per_char(&self) -> usize {
        match self {
            XmlEncoding::Utf16Le | XmlEncoding::Utf16Be => 2,
            _ => 1,
        }
    }

    /// Decode one character starting at `buf[0]`.
    pub(crate) fn next_char(&self, buf: &[u8]) -> NextChar {
        if buf.is_empty() {
            return NextChar::Incomplete;
        }
        match self {
            XmlEncoding::Utf8 => next_utf8(buf),
            XmlEncoding::Ascii => {
                if buf[0] < 0x80 {
                    NextChar::Char {
                        c: buf[0] as char,
                        len: 1,
                    }
                } else {
                    NextChar::Malformed
                }
            }
            XmlEncoding::Latin1 => NextChar::Char {
                c: char::from(buf[0]),
                len: 1,
            },
            XmlEncoding::Utf16Le => next_utf16(buf, true),
            XmlEncoding::Utf16Be => next_utf16(buf, false),
            XmlEncoding::Table(table) => next_table(table, buf),
        }
    }

    /// Convert a byte range, already known to scan cleanly, to internal
    /// UTF-8.
    pub(crate) fn convert(&self, buf: &[u8]) -> String {
        if let XmlEncoding::Utf8 = self {
            // The scanner validated every sequence in the range.
            if let Ok(s) = std::str::from_utf8(buf) {
                return s.to_string();
            }
        }
        let mut out = String::with_capacity(buf.len());
        let mut pos = 0;
        while pos < buf.len() {
            match self.next_char(&buf[pos..]) {
                NextChar::Char { c, len } => {
                    out.push(c);
                    pos += len;
                }
                _ => break,
            }
        }
        out
    }
}

fn next_utf8(buf: &[u8]) -> NextChar {
    let b0 = buf[0];
    if b0 < 0x80 {
        return NextChar::Char {
            c: b0 as char,
            len: 1,
        };
    }
    // Lead byte determines length; overlong forms, surrogates and values
    // above U+10FFFF are rejected by the range checks below.
    let (len, min, init) = match b0 {
        0xC2..=0xDF => (2, 0x80, (b0 & 0x1F) as u32),
        0xC0..=0xC1 => return NextChar::Malformed,
        0xE0..=0xEF => (3, 0x800, (b0 & 0x0F) as u32),
        0xF0..=0xF4 => (4, 0x10000, (b0 & 0x07) as u32),
        _ => return NextChar::Malformed,
    };
    if buf.len() < len {
        // Trailing bytes seen so far must still look like a legal prefix.
        for &b in &buf[1..] {
            if b & 0xC0 != 0x80 {
                return NextChar::Malformed;
            }
        }
        return NextChar::Incomplete;
    }
    let mut value = init;
    for &b in &buf[1..len] {
        if b & 0xC0 != 0x80 {
            return NextChar::Malformed;
        }
        value = (value << 6) | (b & 0x3F) as u32;
    }
    if value < min || value > 0x10FFFF || (0xD800..=0xDFFF).contains(&value) {
        return NextChar::Malformed;
    }
    match char::from_u32(value) {
        Some(c) => NextChar::Char { c, len },
        None => NextChar::Malformed,
    }
}

fn next_utf16(buf: &[u8], little_endian: bool) -> NextChar {
    if buf.len() < 2 {
        return NextChar::Incomplete;
    }
    let unit = |hi: u8, lo: u8| ((hi as u32) << 8) | lo as u32;
    let u0 = if little_endian {
        unit(buf[1], buf[0])
    } else {
        unit(buf[0], buf[1])
    };
    match u0 {
        0xD800..=0xDBFF => {
            if buf.len() < 4 {
                return NextChar::Incomplete;
            }
            let u1 = if little_endian {
                unit(buf[3], buf[2])
            } else {
                unit(buf[2], buf[3])
            };
            if !(0xDC00..=0xDFFF).contains(&u1) {
                return NextChar::Malformed;
            }
            let value = 0x10000 + ((u0 - 0xD800) << 10) + (u1 - 0xDC00);
            match char::from_u32(value) {
                Some(c) => NextChar::Char { c, len: 4 },
                None => NextChar::Malformed,
            }
        }
        0xDC00..=0xDFFF => NextChar::Malformed,
        _ => match char::from_u32(u0) {
            Some(c) => NextChar::Char { c, len: 2 },
            None => NextChar::Malformed,
        },
    }
}

fn next_table(table: &UnknownEncoding, buf: &[u8]) -> NextChar {
    match table.map[buf[0] as usize] {
        -1 => NextChar::Malformed,
        n @ -4..=-2 => {
            let len = (-n) as usize;
            if buf.len() < len {
                return NextChar::Incomplete;
            }
            let convert = match &table.convert {
                Some(f) => f,
                None => return NextChar::Malformed,
            };
            match convert(&buf[..len]) {
                Some(c) => NextChar::Char { c, len },
                None => NextChar::Malformed,
            }
        }
        v => match char::from_u32(v as u32) {
            Some(c) => NextChar::Char { c, len: 1 },
            None => NextChar::Malformed,
        },
    }
}

/// A reference to an encoding together with information about how it was
/// chosen.
///
/// The refinement order is fixed: an explicitly configured encoding can
/// never change; an implicit (default) one can be refined first by a byte
/// order mark and then by the XML declaration; a BOM-detected one only by
/// the declaration.
#[derive(Debug, Clone)]
pub(crate) enum EncodingRef {
    /// Assumed default, refinable by BOM or declaration.
    Implicit(XmlEncoding),
    /// Set through the API; never refined.
    Explicit(XmlEncoding),
    /// Detected from a byte order mark; refinable by the declaration.
    BomDetected(XmlEncoding),
    /// Taken from the XML or text declaration; final.
    XmlDetected(XmlEncoding),
}

impl EncodingRef {
    pub(crate) fn encoding(&self) -> &XmlEncoding {
        match self {
            EncodingRef::Implicit(e)
            | EncodingRef::Explicit(e)
            | EncodingRef::BomDetected(e)
            | EncodingRef::XmlDetected(e) => e,
        }
    }

    pub(crate) fn can_be_refined(&self) -> bool {
        matches!(self, EncodingRef::Implicit(_) | EncodingRef::BomDetected(_))
    }
}

/// Byte-order-mark and first-bytes sniffing.
///
/// Returns the detected encoding and the number of BOM bytes to strip.
/// Zero-byte patterns around `<` catch BOM-less UTF-16.
pub(crate) fn detect_encoding(buf: &[u8]) -> Option<(XmlEncoding, usize)> {
    if buf.starts_with(&[0xEF, 0xBB, 0xBF]) {
        return Some((XmlEncoding::Utf8, 3));
    }
    if buf.starts_with(&[0xFF, 0xFE]) {
        return Some((XmlEncoding::Utf16Le, 2));
    }
    if buf.starts_with(&[0xFE, 0xFF]) {
        return Some((XmlEncoding::Utf16Be, 2));
    }
    if buf.starts_with(&[b'<', 0x00]) {
        return Some((XmlEncoding::Utf16Le, 0));
    }
    if buf.starts_with(&[0x00, b'<']) {
        return Some((XmlEncoding::Utf16Be, 0));
    }
    None
}

/// Resolve an encoding name from the API or an XML declaration to one of
/// the built-in encodings. A bare `UTF-16` label resolves to big-endian,
/// as the XML recommendation requires when no BOM settled the endianness.
pub(crate) fn builtin_for_name(name: &str) -> Option<XmlEncoding> {
    let n = name.trim();
    if n.eq_ignore_ascii_case("UTF-8") {
        Some(XmlEncoding::Utf8)
    } else if n.eq_ignore_ascii_case("UTF-16") {
        Some(XmlEncoding::Utf16Be)
    } else if n.eq_ignore_ascii_case("UTF-16LE") {
        Some(XmlEncoding::Utf16Le)
    } else if n.eq_ignore_ascii_case("UTF-16BE") {
        Some(XmlEncoding::Utf16Be)
    } else if n.eq_ignore_ascii_case("ISO-8859-1") {
        Some(XmlEncoding::Latin1)
    } else if n.eq_ignore_ascii_case("US-ASCII") {
        Some(XmlEncoding::Ascii)
    } else {
        None
    }
}

/// Adopt a single-byte encoding known to `encoding_rs` by decoding each of
/// the 256 bytes once and recording the result as a byte-to-char map.
pub(crate) fn table_from_encoding_rs(name: &str) -> Option<XmlEncoding> {
    let enc = RsEncoding::for_label(name.trim().as_bytes())?;
    if !enc.is_single_byte() {
        return None;
    }
    let mut map = [-1i32; 256];
    for b in 0..=255u8 {
        let bytes = [b];
        let (decoded, _, malformed) = enc.decode(bytes.as_ref());
        if malformed {
            continue;
        }
        let mut chars = decoded.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            if (c as u32) < 0x10000 {
                map[b as usize] = c as i32;
            }
        }
    }
    UnknownEncoding::new(map, None).map(|t| XmlEncoding::Table(Rc::new(t)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ch(c: char, len: usize) -> NextChar {
        NextChar::Char { c, len }
    }

    #[test]
    fn utf8_basic_and_multibyte() {
        let e = XmlEncoding::Utf8;
        assert_eq!(e.next_char(b"a"), ch('a', 1));
        assert_eq!(e.next_char("é".as_bytes()), ch('é', 2));
        assert_eq!(e.next_char("€".as_bytes()), ch('€', 3));
        assert_eq!(e.next_char("𝄞".as_bytes()), ch('𝄞', 4));
    }

    #[test]
    fn utf8_rejects_overlong_and_surrogates() {
        let e = XmlEncoding::Utf8;
        // Overlong encoding of '/'.
        assert_eq!(e.next_char(&[0xC0, 0xAF]), NextChar::Malformed);
        // UTF-8-encoded surrogate U+D800.
        assert_eq!(e.next_char(&[0xED, 0xA0, 0x80]), NextChar::Malformed);
        // Above U+10FFFF.
        assert_eq!(e.next_char(&[0xF5, 0x80, 0x80, 0x80]), NextChar::Malformed);
    }

    #[test]
    fn utf8_truncation_is_incomplete() {
        let e = XmlEncoding::Utf8;
        assert_eq!(e.next_char(&[0xC3]), NextChar::Incomplete);
        assert_eq!(e.next_char(&[0xE2, 0x82]), NextChar::Incomplete);
        // A broken trail byte is malformed even when short.
        assert_eq!(e.next_char(&[0xE2, 0x21]), NextChar::Malformed);
    }

    #[test]
    fn utf16_pairs() {
        let le = XmlEncoding::Utf16Le;
        assert_eq!(le.next_char(&[0x3C, 0x00]), ch('<', 2));
        // U+1D11E as a surrogate pair, little-endian.
        assert_eq!(le.next_char(&[0x34, 0xD8, 0x1E, 0xDD]), ch('𝄞', 4));
        // Lone trail surrogate.
        assert_eq!(le.next_char(&[0x1E, 0xDD]), NextChar::Malformed);
        // Lead surrogate with missing trail is incomplete.
        assert_eq!(le.next_char(&[0x34, 0xD8]), NextChar::Incomplete);
    }

    #[test]
    fn latin1_maps_bytes_straight_through() {
        let e = XmlEncoding::Latin1;
        assert_eq!(e.next_char(&[0xE9]), ch('é', 1));
    }

    #[test]
    fn ascii_rejects_high_bytes() {
        assert_eq!(XmlEncoding::Ascii.next_char(&[0xE9]), NextChar::Malformed);
    }

    #[test]
    fn bom_detection() {
        assert!(matches!(
            detect_encoding(&[0xEF, 0xBB, 0xBF, b'<']),
            Some((XmlEncoding::Utf8, 3))
        ));
        assert!(matches!(
            detect_encoding(&[0xFF, 0xFE, b'<', 0]),
            Some((XmlEncoding::Utf16Le, 2))
        ));
        assert!(matches!(
            detect_encoding(&[0x00, b'<']),
            Some((XmlEncoding::Utf16Be, 0))
        ));
        assert_eq!(detect_encoding(b"<doc/>").map(|e| e.1), None);
    }

    #[test]
    fn unknown_encoding_map_validation() {
        let mut map = [-1i32; 256];
        map[b'a' as usize] = 'a' as i32;
        assert!(UnknownEncoding::new(map, None).is_some());
        map[0] = 0xD800;
        assert!(UnknownEncoding::new(map, None).is_none());
        map[0] = -5;
        assert!(UnknownEncoding::new(map, None).is_none());
    }

    #[test]
    fn encoding_rs_single_byte_adoption() {
        let enc = table_from_encoding_rs("windows-1251").expect("known single-byte encoding");
        // 0xC0 is CYRILLIC CAPITAL LETTER A in windows-1251.
        assert_eq!(enc.next_char(&[0xC0]), ch('А', 1));
    }

    #[test]
    fn refinement_rules() {
        let implicit = EncodingRef::Implicit(XmlEncoding::Utf8);
        assert!(implicit.can_be_refined());
        let bom = EncodingRef::BomDetected(XmlEncoding::Utf16Le);
        assert!(bom.can_be_refined());
        let explicit = EncodingRef::Explicit(XmlEncoding::Utf8);
        assert!(!explicit.can_be_refined());
        let decl = EncodingRef::XmlDetected(XmlEncoding::Latin1);
        assert!(!decl.can_be_refined());
    }
}
