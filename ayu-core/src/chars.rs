//! Byte classification shared by the parser and printer.
//!
//! One table lookup per byte decides which production a term starts, and a
//! second says whether a byte may continue an unquoted word. Bytes `>= 0x80`
//! are word bytes to the parser; the printer is stricter and only leaves
//! non-ASCII text bare when it is identifier-like (see [`can_be_bare`]).

use unicode_xid::UnicodeXID;

/// Which production a byte starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CharClass {
    /// Can't start anything
    Invalid = 0,
    /// Whitespace or `,`
    Space,
    /// Start of a bare word
    Word,
    Digit,
    Dot,
    Plus,
    Minus,
    Quote,
    OpenArray,
    CloseArray,
    OpenObject,
    CloseObject,
    Colon,
    /// `&` shortcut declaration
    Decl,
    /// `*` shortcut use
    Use,
}

const fn build_classes() -> [CharClass; 256] {
    let mut table = [CharClass::Invalid; 256];
    let mut i = 0;
    while i < 256 {
        let b = i as u8;
        table[i] = match b {
            b' ' | b'\t' | b'\n' | b'\r' | b',' => CharClass::Space,
            b'a'..=b'z' | b'A'..=b'Z' | b'_' | b'/' | b'~' | b'!' | b'@' | b'#' | b'$' | b'%'
            | b'^' | b'\'' | b'?' | b'|' | b'\\' | b'<' | b'>' | b'=' | b';' | b'`' => CharClass::Word,
            0x80..=0xff => CharClass::Word,
            b'0'..=b'9' => CharClass::Digit,
            b'.' => CharClass::Dot,
            b'+' => CharClass::Plus,
            b'-' => CharClass::Minus,
            b'"' => CharClass::Quote,
            b'[' => CharClass::OpenArray,
            b']' => CharClass::CloseArray,
            b'{' => CharClass::OpenObject,
            b'}' => CharClass::CloseObject,
            b':' => CharClass::Colon,
            b'&' => CharClass::Decl,
            b'*' => CharClass::Use,
            _ => CharClass::Invalid,
        };
        i += 1;
    }
    table
}

const fn build_word_continue() -> [bool; 256] {
    let mut table = [false; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = matches!(
            CLASSES[i],
            CharClass::Word
                | CharClass::Digit
                | CharClass::Dot
                | CharClass::Plus
                | CharClass::Minus
                | CharClass::Decl
                | CharClass::Use
        );
        i += 1;
    }
    table
}

static CLASSES: [CharClass; 256] = build_classes();
static WORD_CONTINUE: [bool; 256] = build_word_continue();

/// Reserved words that never parse as strings.
pub static KEYWORDS: phf::Map<&'static str, Keyword> = phf::phf_map! {
    "null" => Keyword::Null,
    "true" => Keyword::True,
    "false" => Keyword::False,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Null,
    True,
    False,
}

#[inline]
pub fn class(b: u8) -> CharClass {
    CLASSES[b as usize]
}

/// Whether `b` may continue a bare word. `:` is handled separately: only
/// the pair `::` continues a word.
#[inline]
pub fn is_word_continue(b: u8) -> bool {
    WORD_CONTINUE[b as usize]
}

/// Whether `s` can be printed without quotes and read back as the same
/// string.
pub fn can_be_bare(s: &str) -> bool {
    if s.is_empty() || KEYWORDS.contains_key(s) {
        return false;
    }
    let mut chars = s.chars();
    let first = match chars.next() {
        Some(c) => c,
        None => return false,
    };
    let starts_ok = if first.is_ascii() {
        class(first as u8) == CharClass::Word
    } else {
        first.is_xid_start()
    };
    if !starts_ok {
        return false;
    }

    let bytes = s.as_bytes();
    let mut i = first.len_utf8();
    while i < bytes.len() {
        let b = bytes[i];
        if b == b':' {
            if bytes.get(i + 1) == Some(&b':') {
                i += 2;
                continue;
            }
            return false;
        }
        if b.is_ascii() {
            if !is_word_continue(b) {
                return false;
            }
            i += 1;
        } else {
            // `i` is always on a char boundary here
            let c = match s[i..].chars().next() {
                Some(c) => c,
                None => return false,
            };
            if !c.is_xid_continue() {
                return false;
            }
            i += c.len_utf8();
        }
    }
    true
}
