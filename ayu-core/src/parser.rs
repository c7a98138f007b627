//! Text to [`Tree`].
//!
//! A single forward pass over the input with no separate lexer. The byte
//! class table in [`crate::chars`] picks the production for each term; the
//! production then consumes exactly the bytes it owns.
//!
//! ```text
//! document   := bom? ws? term ws?
//! term       := word | number | string | array | object | decl | use
//! array      := "[" (ws term sep?)* "]"
//! object     := "{" (ws string ":" ws term sep?)* "}"
//! decl       := "&" (word|string) (":" term)?
//! use        := "*" (word|string)
//! comment    := "--" any* "\n"
//! ```
//!
//! Shortcuts live in a flat list for the whole parse. Documents declare a
//! handful at most, so a linear search beats anything hashed.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::chars::{self, CharClass, Keyword};
use crate::error::{Error, ParseErrorCode, Result};
use crate::tree::{Tree, TreeFlags};
use crate::value::{parse_number, NumberValue, TreeString};

/// Deepest allowed nesting of arrays and objects.
pub const MAX_DEPTH: usize = 200;

const BOM: &[u8] = b"\xEF\xBB\xBF";

/// Parse one document.
///
/// `filename` only shows up in error messages.
pub fn parse(input: &[u8], filename: &str) -> Result<Tree> {
    let mut parser = Parser::new(input, filename);
    parser.skip_bom();
    parser.skip_ws();
    let tree = parser.parse_value(0)?;
    parser.skip_ws();
    if !parser.at_end() {
        return Err(parser.error(ParseErrorCode::TrailingContent));
    }
    Ok(tree)
}

/// Parse a document held in a string.
pub fn parse_str(text: &str) -> Result<Tree> {
    parse(text.as_bytes(), "<string>")
}

/// Parse a sequence of top-level terms with no enclosing brackets.
///
/// Terms sit one level down, so the nesting budget is one less than for
/// [`parse`].
pub fn parse_list(input: &[u8], filename: &str) -> Result<Vec<Tree>> {
    let mut parser = Parser::new(input, filename);
    parser.skip_bom();
    let mut terms = Vec::new();
    loop {
        parser.skip_ws();
        if parser.at_end() {
            return Ok(terms);
        }
        if let Some(tree) = parser.parse_term(1)? {
            terms.push(tree);
        }
    }
}

/// Read and parse a file.
pub fn parse_file(path: impl AsRef<Path>) -> Result<Tree> {
    let path = path.as_ref();
    let mut file = File::open(path).map_err(|source| Error::OpenFailed {
        path: path.to_path_buf(),
        source,
    })?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).map_err(|source| Error::ReadFailed {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::trace!(path = %path.display(), len = bytes.len(), "parsing file");
    parse(&bytes, &path.to_string_lossy())
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
    filename: &'a str,
    shortcuts: Vec<(TreeString, Tree)>,
}

impl<'a> Parser<'a> {
    fn new(input: &'a [u8], filename: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            filename,
            shortcuts: Vec::new(),
        }
    }

    // =========================================================================
    // Cursor
    // =========================================================================

    #[inline]
    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    #[inline]
    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    #[inline]
    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.input.get(self.pos + offset).copied()
    }

    fn skip_bom(&mut self) {
        if self.input.starts_with(BOM) {
            self.pos = BOM.len();
        }
    }

    /// Skip separators and comments.
    fn skip_ws(&mut self) {
        while let Some(b) = self.peek() {
            if chars::class(b) == CharClass::Space {
                self.pos += 1;
            } else if b == b'-' && self.peek_at(1) == Some(b'-') {
                let rest = &self.input[self.pos..];
                self.pos += match memchr::memchr(b'\n', rest) {
                    Some(nl) => nl + 1,
                    None => rest.len(),
                };
            } else {
                break;
            }
        }
    }

    // =========================================================================
    // Errors
    // =========================================================================

    fn error(&self, code: ParseErrorCode) -> Error {
        self.error_at(self.pos, code, String::new())
    }

    /// Build an error for `pos`, working out line and column by rescanning.
    fn error_at(&self, pos: usize, code: ParseErrorCode, detail: String) -> Error {
        let pos = pos.min(self.input.len());
        let before = &self.input[..pos];
        let line = memchr::memchr_iter(b'\n', before).count() + 1;
        let line_start = memchr::memrchr(b'\n', before).map_or(0, |nl| nl + 1);
        // Count chars, not bytes: skip UTF-8 continuation bytes
        let column = before[line_start..]
            .iter()
            .filter(|&&b| b & 0xC0 != 0x80)
            .count()
            + 1;
        Error::ParseFailed {
            filename: self.filename.to_string(),
            line,
            column,
            code,
            detail,
        }
    }

    // =========================================================================
    // Terms
    // =========================================================================

    /// Parse terms until one produces a value.
    ///
    /// A `&name:value` declaration produces nothing, so the value of the
    /// enclosing slot comes from whatever term follows it.
    fn parse_value(&mut self, depth: usize) -> Result<Tree> {
        loop {
            if self.at_end() {
                return Err(self.error(ParseErrorCode::UnexpectedEof));
            }
            if let Some(tree) = self.parse_term(depth)? {
                return Ok(tree);
            }
            self.skip_ws();
        }
    }

    /// Parse one term. `depth` counts the arrays, objects and shortcut
    /// declarations around it.
    fn parse_term(&mut self, depth: usize) -> Result<Option<Tree>> {
        let Some(b) = self.peek() else {
            return Err(self.error(ParseErrorCode::UnexpectedEof));
        };
        let tree = match chars::class(b) {
            CharClass::Word => self.parse_word()?,
            CharClass::Digit | CharClass::Plus | CharClass::Minus => self.parse_numeric()?,
            CharClass::Dot => {
                // `.4` is a malformed number, `.foo` is a word
                if matches!(self.peek_at(1), Some(b'0'..=b'9')) {
                    return Err(self.error(ParseErrorCode::InvalidNumber));
                }
                self.parse_word()?
            }
            CharClass::Quote => Tree::from(self.parse_string()?),
            CharClass::OpenArray => {
                self.check_depth(depth)?;
                self.parse_array(depth + 1)?
            }
            CharClass::OpenObject => {
                self.check_depth(depth)?;
                self.parse_object(depth + 1)?
            }
            CharClass::Decl => return self.parse_decl(depth),
            CharClass::Use => self.parse_use()?,
            CharClass::CloseArray
            | CharClass::CloseObject
            | CharClass::Colon
            | CharClass::Space
            | CharClass::Invalid => {
                return Err(self.error(ParseErrorCode::UnexpectedChar));
            }
        };
        Ok(Some(tree))
    }

    fn check_depth(&self, depth: usize) -> Result<()> {
        if depth >= MAX_DEPTH {
            return Err(self.error(ParseErrorCode::TooDeep));
        }
        Ok(())
    }

    /// Consume a run of word bytes, treating `::` as part of the word.
    fn read_word(&mut self) -> Result<&'a [u8]> {
        let input = self.input;
        let start = self.pos;
        while let Some(b) = self.peek() {
            if chars::is_word_continue(b) {
                self.pos += 1;
            } else if b == b':' && self.peek_at(1) == Some(b':') {
                self.pos += 2;
            } else if b == b'"' {
                return Err(self.error(ParseErrorCode::QuoteInWord));
            } else {
                break;
            }
        }
        Ok(&input[start..self.pos])
    }

    fn word_str(&self, start: usize, word: &'a [u8]) -> Result<&'a str> {
        std::str::from_utf8(word)
            .map_err(|_| self.error_at(start, ParseErrorCode::InvalidUtf8, String::new()))
    }

    fn parse_word(&mut self) -> Result<Tree> {
        let start = self.pos;
        let word = self.read_word()?;
        let text = self.word_str(start, word)?;
        Ok(match chars::KEYWORDS.get(text) {
            Some(Keyword::Null) => Tree::null(),
            Some(Keyword::True) => Tree::from(true),
            Some(Keyword::False) => Tree::from(false),
            None => Tree::from(text.to_string()),
        })
    }

    fn parse_numeric(&mut self) -> Result<Tree> {
        let start = self.pos;
        let word = self.read_word()?;
        let Some(number) = parse_number(word) else {
            let detail = String::from_utf8_lossy(word).into_owned();
            return Err(self.error_at(start, ParseErrorCode::InvalidNumber, detail));
        };
        let tree = match number.value {
            NumberValue::Int(i) => Tree::from(i),
            NumberValue::Double(d) => Tree::from(d),
        };
        Ok(if number.hex {
            tree.with_flags(TreeFlags::PREFER_HEX)
        } else {
            tree
        })
    }

    // =========================================================================
    // Strings
    // =========================================================================

    fn parse_string(&mut self) -> Result<String> {
        let start = self.pos;
        self.pos += 1;
        let mut buf = Vec::new();
        loop {
            let rest = &self.input[self.pos..];
            let Some(i) = memchr::memchr2(b'"', b'\\', rest) else {
                return Err(self.error_at(start, ParseErrorCode::UnclosedString, String::new()));
            };
            buf.extend_from_slice(&rest[..i]);
            self.pos += i + 1;
            if rest[i] == b'"' {
                break;
            }
            self.parse_escape(&mut buf)?;
        }
        String::from_utf8(buf).map_err(|_| self.error_at(start, ParseErrorCode::InvalidUtf8, String::new()))
    }

    /// Decode one escape. The cursor sits just past the backslash.
    fn parse_escape(&mut self, buf: &mut Vec<u8>) -> Result<()> {
        let escape_start = self.pos - 1;
        let Some(c) = self.peek() else {
            return Err(self.error(ParseErrorCode::UnclosedString));
        };
        self.pos += 1;
        match c {
            b'"' | b'\\' | b'/' => buf.push(c),
            b'b' => buf.push(0x08),
            b'f' => buf.push(0x0C),
            b'n' => buf.push(b'\n'),
            b'r' => buf.push(b'\r'),
            b't' => buf.push(b'\t'),
            b'x' => {
                let byte = self.read_hex(2, escape_start)?;
                buf.push(byte as u8);
            }
            b'u' => {
                // Take the whole run so surrogate pairs fuse
                let mut units = vec![self.read_hex(4, escape_start)? as u16];
                while self.input[self.pos..].starts_with(b"\\u") {
                    self.pos += 2;
                    units.push(self.read_hex(4, escape_start)? as u16);
                }
                let mut utf8 = [0u8; 4];
                for decoded in char::decode_utf16(units) {
                    let ch = decoded.map_err(|e| {
                        self.error_at(
                            escape_start,
                            ParseErrorCode::InvalidEscape,
                            format!("unpaired surrogate \\u{:04x}", e.unpaired_surrogate()),
                        )
                    })?;
                    buf.extend_from_slice(ch.encode_utf8(&mut utf8).as_bytes());
                }
            }
            _ => {
                return Err(self.error_at(
                    escape_start,
                    ParseErrorCode::InvalidEscape,
                    format!("\\{}", c as char),
                ));
            }
        }
        Ok(())
    }

    fn read_hex(&mut self, digits: usize, escape_start: usize) -> Result<u32> {
        let end = self.pos + digits;
        let Some(hex) = self.input.get(self.pos..end) else {
            return Err(self.error_at(escape_start, ParseErrorCode::InvalidEscape, String::new()));
        };
        let mut value = 0u32;
        for &b in hex {
            let Some(d) = (b as char).to_digit(16) else {
                return Err(self.error_at(escape_start, ParseErrorCode::InvalidEscape, String::new()));
            };
            value = value * 16 + d;
        }
        self.pos = end;
        Ok(value)
    }

    // =========================================================================
    // Compounds
    // =========================================================================

    fn parse_array(&mut self, depth: usize) -> Result<Tree> {
        let start = self.pos;
        self.pos += 1;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None => {
                    return Err(self.error_at(start, ParseErrorCode::UnclosedArray, String::new()));
                }
                Some(b']') => {
                    self.pos += 1;
                    return Ok(Tree::from(items));
                }
                Some(_) => {
                    if let Some(item) = self.parse_term(depth)? {
                        items.push(item);
                    }
                }
            }
        }
    }

    fn parse_object(&mut self, depth: usize) -> Result<Tree> {
        let start = self.pos;
        self.pos += 1;
        let mut pairs: Vec<(TreeString, Tree)> = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None => {
                    return Err(self.error_at(start, ParseErrorCode::UnclosedObject, String::new()));
                }
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(Tree::object(pairs));
                }
                Some(_) => {}
            }

            let key_start = self.pos;
            let Some(key) = self.parse_term(depth)? else {
                continue;
            };
            let Ok(key) = key.as_tree_string() else {
                return Err(self.error_at(key_start, ParseErrorCode::InvalidKey, String::new()));
            };
            let key = key.clone();

            self.skip_ws();
            if self.peek() != Some(b':') {
                return Err(self.error(ParseErrorCode::MissingColon));
            }
            self.pos += 1;
            self.skip_ws();
            let value = self.parse_value(depth)?;
            pairs.push((key, value));
        }
    }

    // =========================================================================
    // Shortcuts
    // =========================================================================

    fn parse_shortcut_name(&mut self) -> Result<TreeString> {
        let start = self.pos;
        match self.peek().map(chars::class) {
            Some(CharClass::Quote) => Ok(TreeString::from(self.parse_string()?)),
            Some(
                CharClass::Word | CharClass::Digit | CharClass::Dot | CharClass::Plus | CharClass::Minus,
            ) => {
                let word = self.read_word()?;
                Ok(TreeString::from(self.word_str(start, word)?.to_string()))
            }
            _ => Err(self.error(ParseErrorCode::InvalidShortcutName)),
        }
    }

    /// `&name value` yields `value`; `&name:value` yields nothing.
    fn parse_decl(&mut self, depth: usize) -> Result<Option<Tree>> {
        let start = self.pos;
        self.pos += 1;
        let name = self.parse_shortcut_name()?;

        let substitute = if self.peek() == Some(b':') {
            self.pos += 1;
            false
        } else {
            true
        };
        self.skip_ws();
        // A declared value nests like an array element
        self.check_depth(depth)?;
        let value = self.parse_value(depth + 1)?;

        if self.shortcuts.iter().any(|(n, _)| *n == name) {
            return Err(self.error_at(start, ParseErrorCode::ShortcutRedeclared, name.to_string()));
        }
        self.shortcuts.push((name, value.clone()));
        Ok(substitute.then_some(value))
    }

    fn parse_use(&mut self) -> Result<Tree> {
        let start = self.pos;
        self.pos += 1;
        let name = self.parse_shortcut_name()?;
        match self.shortcuts.iter().find(|(n, _)| *n == name) {
            Some((_, value)) => Ok(value.clone()),
            None => Err(self.error_at(start, ParseErrorCode::ShortcutUnknown, name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn code_of(input: &str) -> ParseErrorCode {
        match parse_str(input) {
            Err(Error::ParseFailed { code, .. }) => code,
            other => panic!("expected parse failure for {input:?}, got {other:?}"),
        }
    }

    #[test]
    fn test_scalars() {
        assert_eq!(parse_str("null").unwrap(), Tree::null());
        assert_eq!(parse_str("true").unwrap(), Tree::from(true));
        assert_eq!(parse_str(" false ").unwrap(), Tree::from(false));
        assert_eq!(parse_str("42").unwrap(), Tree::from(42));
        assert_eq!(parse_str("-1.5").unwrap(), Tree::from(-1.5));
        assert_eq!(parse_str("hello").unwrap(), Tree::from("hello"));
    }

    #[test]
    fn test_keywords_whole_word_only() {
        assert_eq!(parse_str("nullable").unwrap(), Tree::from("nullable"));
        assert_eq!(parse_str("true_ish").unwrap(), Tree::from("true_ish"));
    }

    #[test]
    fn test_namespaced_word() {
        assert_eq!(parse_str("std::vector").unwrap(), Tree::from("std::vector"));
        let obj = parse_str("{a::b:1}").unwrap();
        assert_eq!(obj.attr("a::b"), Some(&Tree::from(1)));
    }

    #[test]
    fn test_hex_flag() {
        let t = parse_str("0x40").unwrap();
        assert_eq!(t, Tree::from(64));
        assert!(t.flags().contains(TreeFlags::PREFER_HEX));
        assert!(!parse_str("64").unwrap().flags().contains(TreeFlags::PREFER_HEX));
    }

    #[test]
    fn test_strings() {
        assert_eq!(parse_str(r#""a b""#).unwrap(), Tree::from("a b"));
        assert_eq!(parse_str(r#""""#).unwrap(), Tree::from(""));
        assert_eq!(
            parse_str(r#""\"\\\/\b\f\n\r\t""#).unwrap(),
            Tree::from("\"\\/\u{8}\u{c}\n\r\t")
        );
        assert_eq!(parse_str(r#""\x41""#).unwrap(), Tree::from("A"));
        assert_eq!(parse_str(r#""é""#).unwrap(), Tree::from("é"));
        assert_eq!(parse_str(r#""😀""#).unwrap(), Tree::from("😀"));
    }

    #[test]
    fn test_string_errors() {
        assert_eq!(code_of(r#""abc"#), ParseErrorCode::UnclosedString);
        assert_eq!(code_of(r#""\q""#), ParseErrorCode::InvalidEscape);
        assert_eq!(code_of(r#""\ud83d""#), ParseErrorCode::InvalidEscape);
        assert_eq!(code_of(r#""\xff""#), ParseErrorCode::InvalidUtf8);
        assert_eq!(code_of(r#"abc""#), ParseErrorCode::QuoteInWord);
    }

    #[test]
    fn test_arrays_and_separators() {
        let expected = Tree::array([Tree::from(1), Tree::from(2), Tree::from(3)]);
        assert_eq!(parse_str("[1 2 3]").unwrap(), expected);
        assert_eq!(parse_str("[1,2,3]").unwrap(), expected);
        assert_eq!(parse_str("[ 1 ,, 2\n,3 , ]").unwrap(), expected);
        assert_eq!(parse_str("[]").unwrap(), Tree::array([]));
    }

    #[test]
    fn test_objects() {
        let t = parse_str(r#"{a:1 "b c": [x] d : null}"#).unwrap();
        assert_eq!(t.attr("a"), Some(&Tree::from(1)));
        assert_eq!(t.attr("b c"), Some(&Tree::array([Tree::from("x")])));
        assert_eq!(t.attr("d"), Some(&Tree::null()));
        assert_eq!(code_of("{1:2}"), ParseErrorCode::InvalidKey);
        assert_eq!(code_of("{a 2}"), ParseErrorCode::MissingColon);
        assert_eq!(code_of("{a:1"), ParseErrorCode::UnclosedObject);
        assert_eq!(code_of("[1 2"), ParseErrorCode::UnclosedArray);
    }

    #[test]
    fn test_comments() {
        let t = parse_str("-- leading\n[1 -- one\n 2] -- trailing").unwrap();
        assert_eq!(t, Tree::array([Tree::from(1), Tree::from(2)]));
    }

    #[test]
    fn test_bom_skipped() {
        assert_eq!(parse(b"\xEF\xBB\xBF7", "bom").unwrap(), Tree::from(7));
    }

    #[test]
    fn test_dots() {
        assert_eq!(parse_str(".foo.bar").unwrap(), Tree::from(".foo.bar"));
        assert_eq!(code_of(".4"), ParseErrorCode::InvalidNumber);
        assert_eq!(code_of("4."), ParseErrorCode::InvalidNumber);
    }

    #[test]
    fn test_shortcuts() {
        assert_eq!(parse_str("&foo 1").unwrap(), Tree::from(1));
        assert_eq!(parse_str("&foo:1 *foo").unwrap(), Tree::from(1));
        assert_eq!(
            parse_str("[&x:[a b] *x *x]").unwrap(),
            Tree::array([
                Tree::array([Tree::from("a"), Tree::from("b")]),
                Tree::array([Tree::from("a"), Tree::from("b")]),
            ])
        );
        assert_eq!(parse_str(r#"[&"n m" 2 *"n m"]"#).unwrap(), Tree::array([Tree::from(2), Tree::from(2)]));
        assert_eq!(code_of("[&a 1 &a 2]"), ParseErrorCode::ShortcutRedeclared);
        assert_eq!(code_of("*nope"), ParseErrorCode::ShortcutUnknown);
        assert_eq!(code_of("[*a &a 1]"), ParseErrorCode::ShortcutUnknown);
        assert_eq!(code_of("&[1]"), ParseErrorCode::InvalidShortcutName);
    }

    #[test]
    fn test_trailing_and_eof() {
        assert_eq!(code_of("1 2"), ParseErrorCode::TrailingContent);
        assert_eq!(code_of(""), ParseErrorCode::UnexpectedEof);
        assert_eq!(code_of("  -- only a comment"), ParseErrorCode::UnexpectedEof);
        assert_eq!(code_of("]"), ParseErrorCode::UnexpectedChar);
        assert_eq!(code_of("(x)"), ParseErrorCode::UnexpectedChar);
    }

    #[test]
    fn test_error_position() {
        let err = parse("[1\n  2\n  )]".as_bytes(), "pos.ayu").unwrap_err();
        match err {
            Error::ParseFailed {
                filename,
                line,
                column,
                ..
            } => {
                assert_eq!(filename, "pos.ayu");
                assert_eq!(line, 3);
                assert_eq!(column, 3);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_list() {
        let terms = parse_list(b"1 two [3] &x:4 *x", "<args>").unwrap();
        assert_eq!(
            terms,
            vec![
                Tree::from(1),
                Tree::from("two"),
                Tree::array([Tree::from(3)]),
                Tree::from(4),
            ]
        );
        assert!(parse_list(b"", "<args>").unwrap().is_empty());
    }

    #[test]
    fn test_parsed_strings_are_shared() {
        let t = parse_str("word").unwrap();
        assert!(matches!(t.value(), Value::String(TreeString::Shared(_))));
    }
}
