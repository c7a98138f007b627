//! Tree payloads and scalar parsing.
//!
//! [`Value`] is the tagged union carried by every [`Tree`]. Compound payloads
//! sit behind `Rc` so copies share one buffer; writers go through
//! `Rc::make_mut`, so a change made through one handle never shows up in
//! another.
//!
//! Number parsing lives here too. The parser hands over a complete word and
//! gets back a typed value, the same split the syntax uses: the first byte
//! picks the production, the whole word decides the value.

use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::rc::Rc;

use crate::error::Error;
use crate::tree::Tree;

/// String payload with two lifetime modes.
///
/// Literals stay borrowed for the life of the program; everything else is
/// shared and reference counted. Callers only ever see a `&str`.
#[derive(Clone)]
pub enum TreeString {
    Static(&'static str),
    Shared(Rc<str>),
}

impl TreeString {
    /// Borrow the text.
    #[inline]
    pub fn as_str(&self) -> &str {
        match self {
            TreeString::Static(s) => s,
            TreeString::Shared(s) => s,
        }
    }
}

impl Deref for TreeString {
    type Target = str;

    #[inline]
    fn deref(&self) -> &str {
        self.as_str()
    }
}

impl Borrow<str> for TreeString {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl PartialEq for TreeString {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for TreeString {}

impl PartialEq<str> for TreeString {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for TreeString {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl Hash for TreeString {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl fmt::Debug for TreeString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for TreeString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&'static str> for TreeString {
    fn from(s: &'static str) -> Self {
        TreeString::Static(s)
    }
}

impl From<String> for TreeString {
    fn from(s: String) -> Self {
        TreeString::Shared(Rc::from(s))
    }
}

impl From<Rc<str>> for TreeString {
    fn from(s: Rc<str>) -> Self {
        TreeString::Shared(s)
    }
}

/// Tree payload.
#[derive(Debug, Clone)]
pub enum Value {
    /// `null`
    Null,

    /// `true` or `false`
    Bool(bool),

    /// Integer: `42`, `-0x40`
    Int(i64),

    /// Float: `3.14`, `0x1.8p1`, `+inf`
    Double(f64),

    /// Bare word or quoted string
    String(TreeString),

    /// Array: `[a b c]`
    Array(Rc<Vec<Tree>>),

    /// Object: `{a:1 b:2}`, pairs in insertion order
    Object(Rc<Vec<(TreeString, Tree)>>),

    /// A failure carried as a value
    Error(Rc<Error>),
}

/// A parsed number and whether it was written in hex.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Number {
    pub value: NumberValue,
    pub hex: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumberValue {
    Int(i64),
    Double(f64),
}

/// Float literals that bypass the number grammar.
static FLOAT_SPECIALS: phf::Map<&'static str, f64> = phf::phf_map! {
    "+nan" => f64::NAN,
    "+inf" => f64::INFINITY,
    "-inf" => f64::NEG_INFINITY,
};

/// Parse a complete word as a number.
///
/// Grammar: `["+"|"-"] ("0x" hexdigits | digits) ["." digits] [exp ["+"|"-"] digits]`
/// where `exp` is `e`/`E` for decimal and `p`/`P` for hex. A `.` must be
/// followed by at least one digit. Integers that overflow `i64` or carry a
/// fraction/exponent come back as doubles.
///
/// Returns `None` if the word isn't a number.
pub fn parse_number(word: &[u8]) -> Option<Number> {
    if let Some(&special) = std::str::from_utf8(word).ok().and_then(|s| FLOAT_SPECIALS.get(s)) {
        return Some(Number {
            value: NumberValue::Double(special),
            hex: false,
        });
    }

    let (negative, rest) = match word.first() {
        Some(b'-') => (true, &word[1..]),
        Some(b'+') => (false, &word[1..]),
        _ => (false, word),
    };

    if rest.len() >= 2 && rest[0] == b'0' && (rest[1] == b'x' || rest[1] == b'X') {
        let value = try_parse_hex(negative, &rest[2..])?;
        return Some(Number { value, hex: true });
    }

    let value = try_parse_decimal(negative, word, rest)?;
    Some(Number { value, hex: false })
}

/// Split digits into `(int, frac, exp)` parts, validating the shape.
///
/// `exp` includes its optional sign. Returns `None` on any stray byte, an
/// empty integer part, a `.` without digits after it, or an exponent
/// marker without digits.
fn split_number(bytes: &[u8], is_digit: fn(u8) -> bool, exp_marker: u8) -> Option<(&[u8], &[u8], &[u8])> {
    let int_end = bytes.iter().position(|&b| !is_digit(b)).unwrap_or(bytes.len());
    if int_end == 0 {
        return None;
    }
    let int = &bytes[..int_end];
    let mut rest = &bytes[int_end..];

    let mut frac: &[u8] = &[];
    if let Some(b'.') = rest.first() {
        let after = &rest[1..];
        let frac_end = after.iter().position(|&b| !is_digit(b)).unwrap_or(after.len());
        if frac_end == 0 {
            return None;
        }
        frac = &after[..frac_end];
        rest = &after[frac_end..];
    }

    let mut exp: &[u8] = &[];
    if let Some(&b) = rest.first() {
        if b.to_ascii_lowercase() != exp_marker {
            return None;
        }
        let after = &rest[1..];
        let sign_len = matches!(after.first(), Some(b'+' | b'-')) as usize;
        let digits = &after[sign_len..];
        if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
            return None;
        }
        exp = after;
    }

    Some((int, frac, exp))
}

fn try_parse_decimal(negative: bool, word: &[u8], rest: &[u8]) -> Option<NumberValue> {
    let (int, frac, exp) = split_number(rest, |b| b.is_ascii_digit(), b'e')?;

    if frac.is_empty() && exp.is_empty() {
        let mut result: i64 = 0;
        let mut overflow = false;
        for &b in int {
            match result
                .checked_mul(10)
                .and_then(|r| if negative { r.checked_sub((b - b'0') as i64) } else { r.checked_add((b - b'0') as i64) })
            {
                Some(r) => result = r,
                None => {
                    overflow = true;
                    break;
                }
            }
        }
        if !overflow {
            return Some(NumberValue::Int(result));
        }
    }

    // The shape is validated, so the standard float parser sees only digits,
    // one optional dot, and an optional exponent.
    let text = std::str::from_utf8(word).ok()?;
    text.parse::<f64>().ok().map(NumberValue::Double)
}

fn try_parse_hex(negative: bool, bytes: &[u8]) -> Option<NumberValue> {
    let (int, frac, exp) = split_number(bytes, |b| b.is_ascii_hexdigit(), b'p')?;

    if frac.is_empty() && exp.is_empty() {
        let mut magnitude: u64 = 0;
        let mut overflow = false;
        for &b in int {
            match magnitude.checked_mul(16).and_then(|m| m.checked_add(hex_digit(b) as u64)) {
                Some(m) => magnitude = m,
                None => {
                    overflow = true;
                    break;
                }
            }
        }
        if !overflow {
            let value = if negative {
                0i64.checked_sub_unsigned(magnitude)
            } else {
                i64::try_from(magnitude).ok()
            };
            if let Some(v) = value {
                return Some(NumberValue::Int(v));
            }
        }
    }

    // Accumulate up to 60 significant bits. Dropped digits only matter for
    // rounding, so any nonzero one sets a sticky low bit.
    let mut mantissa: u64 = 0;
    let mut scale: i64 = 0;
    let mut sticky = false;
    for &b in int {
        if mantissa >> 56 == 0 {
            mantissa = mantissa * 16 + hex_digit(b) as u64;
        } else {
            scale += 4;
            sticky |= b != b'0';
        }
    }
    for &b in frac {
        if mantissa >> 56 == 0 {
            mantissa = mantissa * 16 + hex_digit(b) as u64;
            scale -= 4;
        } else {
            sticky |= b != b'0';
        }
    }
    if sticky {
        mantissa |= 1;
    }
    if !exp.is_empty() {
        let text = std::str::from_utf8(exp).ok()?;
        // Clamp absurd exponents instead of failing; they round to 0 or inf.
        let e = text.parse::<i64>().unwrap_or(if exp[0] == b'-' { -100_000 } else { 100_000 });
        scale += e.clamp(-100_000, 100_000);
    }

    let magnitude = hex_to_f64(mantissa, scale);
    Some(NumberValue::Double(if negative { -magnitude } else { magnitude }))
}

/// `mantissa * 2^scale`, rounded once to nearest-even.
///
/// The mantissa is cut down to the bits a double (or subnormal) can hold
/// before converting, so the final scaling is exact.
fn hex_to_f64(mut mantissa: u64, mut scale: i64) -> f64 {
    if mantissa == 0 {
        return 0.0;
    }
    let top = (63 - mantissa.leading_zeros()) as i64 + scale;
    let lowest = (top - 52).max(-1074);
    if scale < lowest {
        mantissa = round_shift(mantissa, lowest - scale);
        scale = lowest;
    }
    ldexp(mantissa as f64, scale)
}

/// `m >> shift`, rounding half to even.
fn round_shift(m: u64, shift: i64) -> u64 {
    if shift >= 64 {
        // m < 2^60, below half of the smallest step
        return 0;
    }
    let shift = shift as u32;
    let kept = m >> shift;
    let rest = m & ((1u64 << shift) - 1);
    let half = 1u64 << (shift - 1);
    if rest > half || (rest == half && kept & 1 == 1) {
        kept + 1
    } else {
        kept
    }
}

#[inline]
fn hex_digit(b: u8) -> u8 {
    match b {
        b'0'..=b'9' => b - b'0',
        b'a'..=b'f' => b - b'a' + 10,
        b'A'..=b'F' => b - b'A' + 10,
        _ => 0,
    }
}

/// `x * 2^exp`, stepping so intermediate powers never overflow.
pub(crate) fn ldexp(mut x: f64, mut exp: i64) -> f64 {
    while exp > 1000 {
        x *= 2f64.powi(1000);
        exp -= 1000;
        if x.is_infinite() {
            return x;
        }
    }
    while exp < -1000 {
        x *= 2f64.powi(-1000);
        exp += 1000;
        if x == 0.0 {
            return x;
        }
    }
    x * 2f64.powi(exp as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(word: &str) -> Option<i64> {
        match parse_number(word.as_bytes())?.value {
            NumberValue::Int(i) => Some(i),
            NumberValue::Double(_) => None,
        }
    }

    fn double(word: &str) -> Option<f64> {
        match parse_number(word.as_bytes())?.value {
            NumberValue::Double(d) => Some(d),
            NumberValue::Int(_) => None,
        }
    }

    #[test]
    fn test_integer_values() {
        assert_eq!(int("42"), Some(42));
        assert_eq!(int("0"), Some(0));
        assert_eq!(int("-42"), Some(-42));
        assert_eq!(int("+7"), Some(7));
        assert_eq!(int("-9223372036854775808"), Some(i64::MIN));
    }

    #[test]
    fn test_hex_values() {
        assert_eq!(int("0xFF"), Some(255));
        assert_eq!(int("0x10"), Some(16));
        assert_eq!(int("-0x40"), Some(-0x40));
        assert_eq!(int("-0x8000000000000000"), Some(i64::MIN));
        assert!(parse_number(b"0x10").unwrap().hex);
        assert!(!parse_number(b"10").unwrap().hex);
    }

    #[test]
    fn test_float_values() {
        assert_eq!(double("3.14"), Some(3.14));
        assert_eq!(double("1.5e-3"), Some(0.0015));
        assert_eq!(double("-2.5"), Some(-2.5));
        assert_eq!(double("1e999"), Some(f64::INFINITY));
    }

    #[test]
    fn test_overflowing_integer_becomes_double() {
        assert_eq!(double("99999999999999999999"), Some(1e20));
    }

    #[test]
    fn test_hex_float() {
        assert_eq!(double("0xdead.beefP30"), Some(0xdeadbeef_u64 as f64 * 16384.0));
        assert_eq!(double("0x1.8p1"), Some(3.0));
        assert_eq!(double("0x1p-2"), Some(0.25));
        assert_eq!(double("-0x1.8p+1"), Some(-3.0));
    }

    #[test]
    fn test_hex_float_rounds_once() {
        // Ties go to even
        assert_eq!(double("0x1.00000000000008p0"), Some(1.0));
        assert_eq!(double("0x1.00000000000018p0"), Some(1.0 + 2.0 * f64::EPSILON));
        // Digits past the kept bits still break a tie
        assert_eq!(double("0x1.000000000000080000001p0"), Some(1.0 + f64::EPSILON));
        assert_eq!(double("0x10000000000000800000001p-88"), Some(1.0 + f64::EPSILON));
        // Subnormals
        assert_eq!(double("0x1.7ffffffffffff8p-1074"), Some(f64::from_bits(1)));
        assert_eq!(double("0x1.8p-1074"), Some(f64::from_bits(2)));
        assert_eq!(double("0x1p-1075"), Some(0.0));
        assert_eq!(double("0x1.0000001p-1075"), Some(f64::from_bits(1)));
    }

    #[test]
    fn test_specials() {
        assert!(double("+nan").unwrap().is_nan());
        assert_eq!(double("+inf"), Some(f64::INFINITY));
        assert_eq!(double("-inf"), Some(f64::NEG_INFINITY));
        assert_eq!(parse_number(b"nan"), None);
        assert_eq!(parse_number(b"-nan"), None);
    }

    #[test]
    fn test_invalid_numbers() {
        for word in ["4.", ".4", "0.e4", "1e", "1e+", "0x", "+", "-", "12ab", "1.2.3", "0xg"] {
            assert_eq!(parse_number(word.as_bytes()), None, "{word}");
        }
    }

    #[test]
    fn test_tree_string_modes_compare_equal() {
        let a = TreeString::from("name");
        let b = TreeString::from(String::from("name"));
        assert_eq!(a, b);
        assert!(matches!(a, TreeString::Static(_)));
        assert!(matches!(b, TreeString::Shared(_)));
    }
}
