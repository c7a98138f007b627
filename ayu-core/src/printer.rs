//! [`Tree`] to text.
//!
//! Output goes straight into a growing `String`; there is no measuring pass.
//! Three knobs: compact or pretty layout, and JSON compatibility, which can
//! be combined with either layout.
//!
//! # Layout
//!
//! - Compact: everything on one line, single spaces between elements.
//! - Pretty: 4-space indents. Small arrays (up to 8 scalar elements) and
//!   objects with at most one scalar attribute stay on one line; anything
//!   bigger gets one child per line, and expanded arrays mark each element
//!   with a `-- N` comment.
//! - JSON: commas, quoted keys and strings, no hex, no comments, and the
//!   float specials become `null`, `1e999` and `-1e999`.

use std::fmt::Write as _;
use std::fs::File;
use std::io::Write as _;
use std::path::Path;

use crate::chars;
use crate::error::{Error, Result};
use crate::tree::{Tree, TreeFlags};
use crate::value::{TreeString, Value};

bitflags::bitflags! {
    /// Output options for [`print`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PrintOptions: u8 {
        /// Indented, one child per line where it helps.
        const PRETTY = 1 << 0;
        /// Single line. The default when neither layout is given.
        const COMPACT = 1 << 1;
        /// Output that JSON parsers accept.
        const JSON = 1 << 2;
    }
}

/// Strings longer than this print with raw newlines in pretty mode.
const EXPAND_STRING_LEN: usize = 50;
/// Arrays with more elements than this get one element per line.
const INLINE_ARRAY_MAX: usize = 8;
/// Objects with more attributes than this get one attribute per line.
const INLINE_OBJECT_MAX: usize = 1;
const INDENT: &str = "    ";

/// Print a tree to a string.
pub fn print(tree: &Tree, options: PrintOptions) -> Result<String> {
    validate(options)?;
    let mut printer = Printer {
        out: String::new(),
        pretty: options.contains(PrintOptions::PRETTY),
        json: options.contains(PrintOptions::JSON),
    };
    printer.print_tree(tree, 0)?;
    Ok(printer.out)
}

/// Print a tree to a file, followed by a newline.
///
/// Pretty layout is used unless `options` asks for compact.
pub fn print_file(tree: &Tree, path: impl AsRef<Path>, options: PrintOptions) -> Result<()> {
    let path = path.as_ref();
    let options = if options.contains(PrintOptions::COMPACT) {
        options
    } else {
        options | PrintOptions::PRETTY
    };
    let mut text = print(tree, options)?;
    text.push('\n');
    write_file(path, text.as_bytes())
}

pub(crate) fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = File::create(path).map_err(|source| Error::OpenFailed {
        path: path.to_path_buf(),
        source,
    })?;
    file.write_all(bytes).map_err(|source| Error::WriteFailed {
        path: path.to_path_buf(),
        source,
    })?;
    file.sync_all().map_err(|source| Error::CloseFailed {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::trace!(path = %path.display(), len = bytes.len(), "wrote file");
    Ok(())
}

fn validate(options: PrintOptions) -> Result<()> {
    if options.contains(PrintOptions::PRETTY | PrintOptions::COMPACT) {
        return Err(Error::PrintOptionsInvalid {
            options: format!("{options:?}"),
        });
    }
    Ok(())
}

struct Printer {
    out: String,
    pretty: bool,
    json: bool,
}

impl Printer {
    fn print_tree(&mut self, tree: &Tree, indent: usize) -> Result<()> {
        let flags = tree.flags();
        match tree.value() {
            Value::Null => self.out.push_str("null"),
            Value::Bool(b) => self.out.push_str(if *b { "true" } else { "false" }),
            Value::Int(i) => self.print_int(*i, flags),
            Value::Double(d) => self.print_double(*d, flags),
            Value::String(s) => self.print_string(s, flags),
            Value::Array(items) => self.print_array(items, flags, indent)?,
            Value::Object(pairs) => self.print_object(pairs, flags, indent)?,
            Value::Error(err) => {
                return Err(Error::TreeCantRepresent {
                    type_name: "text",
                    tree: err.to_string(),
                });
            }
        }
        Ok(())
    }

    fn newline(&mut self, indent: usize) {
        self.out.push('\n');
        for _ in 0..indent {
            self.out.push_str(INDENT);
        }
    }

    // =========================================================================
    // Scalars
    // =========================================================================

    fn print_int(&mut self, i: i64, flags: TreeFlags) {
        if flags.contains(TreeFlags::PREFER_HEX) && !self.json {
            if i < 0 {
                let _ = write!(self.out, "-0x{:x}", i.unsigned_abs());
            } else {
                let _ = write!(self.out, "0x{i:x}");
            }
        } else {
            let _ = write!(self.out, "{i}");
        }
    }

    fn print_double(&mut self, d: f64, flags: TreeFlags) {
        if d.is_nan() {
            self.out.push_str(if self.json { "null" } else { "+nan" });
            return;
        }
        if d.is_infinite() {
            self.out.push_str(match (d > 0.0, self.json) {
                (true, false) => "+inf",
                (false, false) => "-inf",
                (true, true) => "1e999",
                (false, true) => "-1e999",
            });
            return;
        }
        if flags.contains(TreeFlags::PREFER_HEX) && !self.json {
            if d.fract() == 0.0 && d.abs() < 9_007_199_254_740_992.0 {
                self.print_int(d as i64, flags);
            } else {
                self.print_hex_double(d);
            }
            return;
        }
        // Both are shortest round-trip; keep whichever is shorter
        let plain = d.to_string();
        let sci = format!("{d:e}");
        let text = if sci.len() < plain.len() { &sci } else { &plain };
        // Integer text reads back as an int, which has to be exact
        match text.parse::<i64>() {
            Ok(n) if n as i128 != d as i128 => self.out.push_str(&sci),
            _ => self.out.push_str(text),
        }
    }

    /// `0x1.8p1` style, exact for every finite double.
    fn print_hex_double(&mut self, d: f64) {
        let bits = d.to_bits();
        let biased_exp = ((bits >> 52) & 0x7ff) as i64;
        let mantissa = bits & ((1u64 << 52) - 1);
        let (lead, exp) = if biased_exp == 0 {
            (0, -1022)
        } else {
            (1, biased_exp - 1023)
        };
        if d.is_sign_negative() {
            self.out.push('-');
        }
        let _ = write!(self.out, "0x{lead}");
        if mantissa != 0 {
            let digits = format!("{mantissa:013x}");
            self.out.push('.');
            self.out.push_str(digits.trim_end_matches('0'));
        }
        let _ = write!(self.out, "p{exp}");
    }

    fn print_string(&mut self, s: &TreeString, flags: TreeFlags) {
        if !self.json && chars::can_be_bare(s) {
            self.out.push_str(s);
            return;
        }
        let expand = if self.json {
            false
        } else if flags.contains(TreeFlags::PREFER_EXPANDED) {
            true
        } else if flags.contains(TreeFlags::PREFER_COMPACT) {
            false
        } else if self.pretty {
            s.len() > EXPAND_STRING_LEN
        } else {
            true
        };
        self.print_quoted(s, expand);
    }

    fn print_quoted(&mut self, s: &str, expand: bool) {
        self.out.reserve(s.len() + 2);
        self.out.push('"');
        for c in s.chars() {
            match c {
                '"' => self.out.push_str("\\\""),
                '\\' => self.out.push_str("\\\\"),
                '\n' if !expand => self.out.push_str("\\n"),
                '\t' if !expand => self.out.push_str("\\t"),
                '\n' | '\t' => self.out.push(c),
                '\r' => self.out.push_str("\\r"),
                '\u{8}' => self.out.push_str("\\b"),
                '\u{c}' => self.out.push_str("\\f"),
                c if (c as u32) < 0x20 || c == '\u{7f}' => {
                    let _ = write!(self.out, "\\u{:04x}", c as u32);
                }
                c => self.out.push(c),
            }
        }
        self.out.push('"');
    }

    // =========================================================================
    // Compounds
    // =========================================================================

    fn inline<'t>(&self, flags: TreeFlags, len: usize, max: usize, mut children: impl Iterator<Item = &'t Tree>) -> bool {
        if !self.pretty || flags.contains(TreeFlags::PREFER_COMPACT) {
            return true;
        }
        if flags.contains(TreeFlags::PREFER_EXPANDED) || len > max {
            return false;
        }
        !children.any(is_nonempty_compound)
    }

    fn separator(&self) -> &'static str {
        match (self.json, self.pretty) {
            (true, true) => ", ",
            (true, false) => ",",
            (false, _) => " ",
        }
    }

    fn print_array(&mut self, items: &[Tree], flags: TreeFlags, indent: usize) -> Result<()> {
        if items.is_empty() {
            self.out.push_str("[]");
            return Ok(());
        }
        self.out.push('[');
        if self.inline(flags, items.len(), INLINE_ARRAY_MAX, items.iter()) {
            let sep = self.separator();
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    self.out.push_str(sep);
                }
                self.print_tree(item, indent)?;
            }
        } else {
            let width = digit_count(items.len() - 1);
            for (i, item) in items.iter().enumerate() {
                self.newline(indent + 1);
                self.print_tree(item, indent + 1)?;
                if self.json {
                    if i + 1 < items.len() {
                        self.out.push(',');
                    }
                } else {
                    let _ = write!(self.out, " -- {i:>width$}");
                }
            }
            self.newline(indent);
        }
        self.out.push(']');
        Ok(())
    }

    fn print_object(&mut self, pairs: &[(TreeString, Tree)], flags: TreeFlags, indent: usize) -> Result<()> {
        if pairs.is_empty() {
            self.out.push_str("{}");
            return Ok(());
        }
        let key_sep = if self.pretty { ": " } else { ":" };
        self.out.push('{');
        if self.inline(flags, pairs.len(), INLINE_OBJECT_MAX, pairs.iter().map(|(_, v)| v)) {
            let sep = self.separator();
            for (i, (key, value)) in pairs.iter().enumerate() {
                if i > 0 {
                    self.out.push_str(sep);
                }
                self.print_string(key, TreeFlags::empty());
                self.out.push_str(key_sep);
                self.print_tree(value, indent)?;
            }
        } else {
            for (i, (key, value)) in pairs.iter().enumerate() {
                self.newline(indent + 1);
                self.print_string(key, TreeFlags::empty());
                self.out.push_str(key_sep);
                self.print_tree(value, indent + 1)?;
                if self.json && i + 1 < pairs.len() {
                    self.out.push(',');
                }
            }
            self.newline(indent);
        }
        self.out.push('}');
        Ok(())
    }
}

fn is_nonempty_compound(tree: &Tree) -> bool {
    match tree.value() {
        Value::Array(items) => !items.is_empty(),
        Value::Object(pairs) => !pairs.is_empty(),
        _ => false,
    }
}

fn digit_count(mut n: usize) -> usize {
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    digits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_str;

    fn compact(t: &Tree) -> String {
        print(t, PrintOptions::COMPACT).unwrap()
    }

    fn pretty(t: &Tree) -> String {
        print(t, PrintOptions::PRETTY).unwrap()
    }

    fn json(t: &Tree) -> String {
        print(t, PrintOptions::JSON).unwrap()
    }

    #[test]
    fn test_scalars() {
        assert_eq!(compact(&Tree::null()), "null");
        assert_eq!(compact(&Tree::from(true)), "true");
        assert_eq!(compact(&Tree::from(-12)), "-12");
        assert_eq!(compact(&Tree::from(0.5)), "0.5");
        assert_eq!(compact(&Tree::from(1e300)), "1e300");
        assert_eq!(compact(&Tree::from(1e-7)), "1e-7");
    }

    #[test]
    fn test_large_integral_doubles_read_back_exactly() {
        let exact = Tree::from(9_007_199_254_740_992.0);
        assert_eq!(compact(&exact), "9007199254740992");
        let rounded = Tree::from(1_234_567_890_123_456_768.0);
        assert_eq!(compact(&rounded), "1.2345678901234568e18");
        for t in [exact, rounded] {
            assert_eq!(parse_str(&compact(&t)).unwrap(), t);
        }
    }

    #[test]
    fn test_hex() {
        let t = Tree::from(-64).with_flags(TreeFlags::PREFER_HEX);
        assert_eq!(compact(&t), "-0x40");
        assert_eq!(json(&t), "-64");
        let t = Tree::from(3.0).with_flags(TreeFlags::PREFER_HEX);
        assert_eq!(compact(&t), "0x3");
        let t = Tree::from(-3.0).with_flags(TreeFlags::PREFER_HEX);
        assert_eq!(compact(&t), "-0x3");
        let t = Tree::from(0.75).with_flags(TreeFlags::PREFER_HEX);
        assert_eq!(compact(&t), "0x1.8p-1");
    }

    #[test]
    fn test_specials() {
        assert_eq!(compact(&Tree::from(f64::NAN)), "+nan");
        assert_eq!(compact(&Tree::from(f64::INFINITY)), "+inf");
        assert_eq!(compact(&Tree::from(f64::NEG_INFINITY)), "-inf");
        assert_eq!(json(&Tree::from(f64::NAN)), "null");
        assert_eq!(json(&Tree::from(f64::INFINITY)), "1e999");
        assert_eq!(json(&Tree::from(f64::NEG_INFINITY)), "-1e999");
    }

    #[test]
    fn test_strings() {
        assert_eq!(compact(&Tree::from("plain")), "plain");
        assert_eq!(compact(&Tree::from("null")), r#""null""#);
        assert_eq!(compact(&Tree::from("")), r#""""#);
        assert_eq!(compact(&Tree::from("two words")), r#""two words""#);
        assert_eq!(compact(&Tree::from("3d")), r#""3d""#);
        assert_eq!(json(&Tree::from("plain")), r#""plain""#);
        assert_eq!(compact(&Tree::from("q\"\\")), r#""q\"\\""#);
        assert_eq!(compact(&Tree::from("\u{1}")), r#""\u0001""#);
    }

    #[test]
    fn test_string_expansion() {
        let short = Tree::from("a\nb");
        assert_eq!(compact(&short), "\"a\nb\"");
        assert_eq!(pretty(&short), r#""a\nb""#);
        assert_eq!(json(&short), r#""a\nb""#);

        let long = Tree::from("line one is here\nline two is here\nline three is here\n");
        assert!(pretty(&long).contains('\n'));

        let forced = Tree::from("a\tb").with_flags(TreeFlags::PREFER_EXPANDED);
        assert_eq!(pretty(&forced), "\"a\tb\"");
        let forced = Tree::from("a\tb").with_flags(TreeFlags::PREFER_COMPACT);
        assert_eq!(compact(&forced), r#""a\tb""#);
    }

    #[test]
    fn test_compact_compounds() {
        let t = parse_str("{a:[1 2] b:{c:null}}").unwrap();
        assert_eq!(compact(&t), "{a:[1 2] b:{c:null}}");
        assert_eq!(json(&t), r#"{"a":[1,2],"b":{"c":null}}"#);
        assert_eq!(compact(&Tree::array([])), "[]");
        assert_eq!(compact(&Tree::object(Vec::<(&str, Tree)>::new())), "{}");
    }

    #[test]
    fn test_pretty_inline_small() {
        assert_eq!(pretty(&parse_str("[1 2 3]").unwrap()), "[1 2 3]");
        assert_eq!(pretty(&parse_str("{a:1}").unwrap()), "{a: 1}");
        assert_eq!(
            print(&parse_str("[1 2 3]").unwrap(), PrintOptions::PRETTY | PrintOptions::JSON).unwrap(),
            "[1, 2, 3]"
        );
    }

    #[test]
    fn test_pretty_expanded() {
        let t = parse_str("{a:1 b:[x y]}").unwrap();
        assert_eq!(pretty(&t), "{\n    a: 1\n    b: [x y]\n}");

        let t = parse_str("[0 1 2 3 4 5 6 7 8 9 10]").unwrap();
        let text = pretty(&t);
        assert!(text.starts_with("[\n    0 --  0\n"));
        assert!(text.ends_with("    10 -- 10\n]"));

        let t = parse_str("[[1] 2]").unwrap();
        assert_eq!(pretty(&t), "[\n    [1] -- 0\n    2 -- 1\n]");
    }

    #[test]
    fn test_pretty_json_expanded() {
        let t = parse_str("{a:1 b:[[1] 2]}").unwrap();
        let text = print(&t, PrintOptions::PRETTY | PrintOptions::JSON).unwrap();
        assert_eq!(text, "{\n    \"a\": 1,\n    \"b\": [\n        [1],\n        2\n    ]\n}");
    }

    #[test]
    fn test_forced_layout() {
        let t = parse_str("[1 2]").unwrap().with_flags(TreeFlags::PREFER_EXPANDED);
        assert_eq!(pretty(&t), "[\n    1 -- 0\n    2 -- 1\n]");
        let t = parse_str("{a:1 b:2}").unwrap().with_flags(TreeFlags::PREFER_COMPACT);
        assert_eq!(pretty(&t), "{a: 1 b: 2}");
    }

    #[test]
    fn test_invalid_options() {
        let err = print(&Tree::null(), PrintOptions::PRETTY | PrintOptions::COMPACT).unwrap_err();
        assert_eq!(err.code(), "PrintOptionsInvalid");
    }

    #[test]
    fn test_error_tree() {
        let t = Tree::array([Tree::error(Error::AttrMissing { key: "x".into() })]);
        let err = print(&t, PrintOptions::COMPACT).unwrap_err();
        assert_eq!(err.code(), "TreeCantRepresent");
    }
}
