/// Value Representation and Coercion
///
/// The tagged value type shared by the parser (literals) and the runtime,
/// with the conversion rules between strings and numbers, truthiness,
/// and comparison semantics. Values are shared by reference counting:
/// cloning a `Value` bumps the count, dropping releases it.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::ErrKind;

/// A shared associative map. Handing the same handle to two slots makes
/// them aliases of one map, which is how arrays pass by reference.
pub type MapHandle = Rc<RefCell<IndexMap<String, Value>>>;

/// The runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    /// One wide code point.
    Char(char),
    /// One byte.
    Bchr(u8),
    Int(i64),
    Flt(f64),
    /// Immutable character string.
    Str(Rc<str>),
    /// A string whose text was a valid number when it was produced by
    /// input splitting. Compares numerically against numeric operands.
    NumStr(Rc<str>),
    /// Immutable byte string; embedded NULs are legal.
    Mbs(Rc<[u8]>),
    Map(MapHandle),
}

/// A number that is either exact or floating.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Num {
    Int(i64),
    Flt(f64),
}

impl Num {
    pub fn as_flt(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Flt(f) => f,
        }
    }

    pub fn as_int(self) -> i64 {
        match self {
            Num::Int(i) => i,
            Num::Flt(f) => f as i64,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Num::Int(i) => Value::Int(i),
            Num::Flt(f) => Value::Flt(f),
        }
    }
}

impl Value {
    pub fn str_from(s: &str) -> Value {
        Value::Str(Rc::from(s))
    }

    pub fn mbs_from(b: &[u8]) -> Value {
        Value::Mbs(Rc::from(b))
    }

    pub fn new_map() -> Value {
        Value::Map(Rc::new(RefCell::new(IndexMap::new())))
    }

    /// Build a value from external text: numeric text becomes a numeric
    /// string, anything else a plain string. Used for `-v var=value`
    /// assignments and console `var=val` entries.
    pub fn num_or_str(s: &str) -> Value {
        if looks_like_number(s) {
            Value::NumStr(Rc::from(s))
        } else {
            Value::Str(Rc::from(s))
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Char(_) => "char",
            Value::Bchr(_) => "bchr",
            Value::Int(_) => "int",
            Value::Flt(_) => "flt",
            Value::Str(_) | Value::NumStr(_) => "str",
            Value::Mbs(_) => "mbs",
            Value::Map(_) => "map",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn is_map(&self) -> bool {
        matches!(self, Value::Map(_))
    }

    /// Truthiness: nil and numeric zero are false; plain strings are true
    /// when non-empty; numeric strings follow their numeric value.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Char(c) => *c != '\0',
            Value::Bchr(b) => *b != 0,
            Value::Int(i) => *i != 0,
            Value::Flt(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::NumStr(s) => str_to_num(s, true).as_flt() != 0.0,
            Value::Mbs(b) => !b.is_empty(),
            Value::Map(m) => !m.borrow().is_empty(),
        }
    }

    /// Convert to a number. `strip` also trims trailing blanks from
    /// string operands before tokenizing.
    pub fn to_num(&self, strip: bool) -> Result<Num, ErrKind> {
        match self {
            Value::Nil => Ok(Num::Int(0)),
            Value::Char(c) => Ok(Num::Int(*c as i64)),
            Value::Bchr(b) => Ok(Num::Int(*b as i64)),
            Value::Int(i) => Ok(Num::Int(*i)),
            Value::Flt(f) => Ok(Num::Flt(*f)),
            Value::Str(s) | Value::NumStr(s) => Ok(str_to_num(s, strip)),
            Value::Mbs(b) => {
                let s: String = b.iter().map(|&c| c as char).collect();
                Ok(str_to_num(&s, strip))
            }
            Value::Map(_) => Err(ErrKind::EvalToNum),
        }
    }

    pub fn to_flt(&self, strip: bool) -> Result<f64, ErrKind> {
        Ok(self.to_num(strip)?.as_flt())
    }

    pub fn to_int(&self, strip: bool) -> Result<i64, ErrKind> {
        Ok(self.to_num(strip)?.as_int())
    }

    /// Convert to a character string. Non-integral floats are formatted
    /// with `fmt` (CONVFMT for implicit conversion, OFMT for print).
    pub fn to_str(&self, fmt: &str) -> Result<Rc<str>, ErrKind> {
        match self {
            Value::Nil => Ok(Rc::from("")),
            Value::Char(c) => Ok(Rc::from(c.to_string().as_str())),
            Value::Bchr(b) => Ok(Rc::from((*b as char).to_string().as_str())),
            Value::Int(i) => Ok(Rc::from(i.to_string().as_str())),
            Value::Flt(f) => Ok(Rc::from(flt_to_str(*f, fmt).as_str())),
            Value::Str(s) | Value::NumStr(s) => Ok(s.clone()),
            Value::Mbs(b) => {
                let s: String = b.iter().map(|&c| c as char).collect();
                Ok(Rc::from(s.as_str()))
            }
            Value::Map(_) => Err(ErrKind::EvalToStr),
        }
    }

    /// Convert to a byte string. Characters are encoded as UTF-8.
    pub fn to_mbs(&self, fmt: &str) -> Result<Rc<[u8]>, ErrKind> {
        match self {
            Value::Mbs(b) => Ok(b.clone()),
            Value::Bchr(b) => Ok(Rc::from([*b].as_slice())),
            other => {
                let s = other.to_str(fmt)?;
                Ok(Rc::from(s.as_bytes()))
            }
        }
    }

    /// Whether this value takes part in numeric comparison against a
    /// numeric counterpart. Numeric strings qualify only when
    /// `ncmponstr` is in effect.
    fn numericish(&self, ncmponstr: bool) -> bool {
        match self {
            Value::Nil | Value::Char(_) | Value::Bchr(_) | Value::Int(_) | Value::Flt(_) => true,
            Value::NumStr(_) => ncmponstr,
            _ => false,
        }
    }

    /// Three-way comparison: numbers when both sides qualify, string
    /// collation (byte-wise) otherwise.
    pub fn cmp_with(&self, other: &Value, fmt: &str, ncmponstr: bool) -> Result<Ordering, ErrKind> {
        if self.numericish(ncmponstr) && other.numericish(ncmponstr) {
            if let (Value::Int(a), Value::Int(b)) = (self, other) {
                return Ok(a.cmp(b));
            }
            let a = self.to_flt(true)?;
            let b = other.to_flt(true)?;
            return Ok(a.partial_cmp(&b).unwrap_or(Ordering::Equal));
        }
        let a = self.to_str(fmt)?;
        let b = other.to_str(fmt)?;
        Ok(a.as_bytes().cmp(b.as_bytes()))
    }

    /// Strict equality: different tags never compare equal; maps compare
    /// by identity.
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Bchr(a), Value::Bchr(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Flt(a), Value::Flt(b)) => a == b,
            (Value::Str(a) | Value::NumStr(a), Value::Str(b) | Value::NumStr(b)) => a == b,
            (Value::Mbs(a), Value::Mbs(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Deep copy for whole-map assignment, so stores never create shared
    /// cycles.
    pub fn deep_copy(&self) -> Value {
        match self {
            Value::Map(m) => {
                let copied: IndexMap<String, Value> = m
                    .borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.deep_copy()))
                    .collect();
                Value::Map(Rc::new(RefCell::new(copied)))
            }
            other => other.clone(),
        }
    }
}

// ─── String → Number ─────────────────────────────────────────

/// Liberal leading-prefix number tokenizer: optional sign, `0x` hex,
/// `0b` binary, leading-zero octal, or decimal with optional fraction
/// and exponent. Non-numeric text yields integer zero.
pub fn str_to_num(s: &str, strip: bool) -> Num {
    let t = if strip { s.trim() } else { s.trim_start() };
    let bytes = t.as_bytes();
    let mut i = 0;

    let mut neg = false;
    if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
        neg = bytes[i] == b'-';
        i += 1;
    }

    // Radix-prefixed integers.
    if i + 1 < bytes.len() && bytes[i] == b'0' {
        let (radix, skip) = match bytes[i + 1] {
            b'x' | b'X' => (16u32, 2),
            b'b' | b'B' => (2u32, 2),
            _ => (0, 0),
        };
        if radix != 0 {
            let digits: String = t[i + skip..]
                .chars()
                .take_while(|c| c.is_digit(radix))
                .collect();
            if !digits.is_empty() {
                let mag = i64::from_str_radix(&digits, radix).unwrap_or(0);
                return Num::Int(if neg { -mag } else { mag });
            }
            return Num::Int(0);
        }
        // Leading-zero octal, only when the whole digit run is octal and
        // no radix point or exponent follows.
        let run: &[u8] = &bytes[i..];
        let digits = run.iter().take_while(|b| b.is_ascii_digit()).count();
        let all_octal = run[..digits].iter().all(|b| (b'0'..=b'7').contains(b));
        let followed = run.get(digits).copied();
        if digits > 1 && all_octal && !matches!(followed, Some(b'.') | Some(b'e') | Some(b'E')) {
            let text = std::str::from_utf8(&run[..digits]).unwrap();
            let mag = i64::from_str_radix(text, 8).unwrap_or(0);
            return Num::Int(if neg { -mag } else { mag });
        }
    }

    // Decimal: integer part, fraction, exponent.
    let start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let int_digits = i - start;
    let mut is_flt = false;

    if i < bytes.len() && bytes[i] == b'.' {
        let frac_start = i + 1;
        let mut j = frac_start;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j > frac_start || int_digits > 0 {
            is_flt = j > frac_start;
            i = j;
        }
    }

    if int_digits == 0 && !is_flt {
        return Num::Int(0);
    }

    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        let exp_start = j;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j > exp_start {
            is_flt = true;
            i = j;
        }
    }

    let prefix = &t[..i];
    if is_flt {
        Num::Flt(prefix.parse::<f64>().unwrap_or(0.0))
    } else {
        match prefix.parse::<i64>() {
            Ok(n) => Num::Int(n),
            // Magnitude overflow falls back to floating point.
            Err(_) => Num::Flt(prefix.parse::<f64>().unwrap_or(0.0)),
        }
    }
}

/// Whether the entire trimmed string is a valid decimal number. This is
/// the numeric-string test applied to input fields and `var=val` text.
pub fn looks_like_number(s: &str) -> bool {
    let t = s.trim();
    if t.is_empty() {
        return false;
    }
    t.parse::<f64>().map_or(false, |f| f.is_finite())
}

// ─── Number → String ─────────────────────────────────────────

/// Format a float: integral values render without a decimal point,
/// everything else through a `%`-style format such as `"%.6g"`.
pub fn flt_to_str(n: f64, fmt: &str) -> String {
    if n.is_nan() {
        return "nan".to_string();
    }
    if n.is_infinite() {
        return if n.is_sign_positive() { "inf" } else { "-inf" }.to_string();
    }
    if n == n.floor() && n.abs() < i64::MAX as f64 {
        return format!("{}", n as i64);
    }
    apply_flt_format(n, fmt)
}

/// Apply a single-specifier format string (`%f`, `%.2f`, `%e`, `%g`...)
/// to a floating-point number.
fn apply_flt_format(n: f64, fmt: &str) -> String {
    let bytes = fmt.as_bytes();
    let mut i = 0;

    while i < bytes.len() && bytes[i] != b'%' {
        i += 1;
    }
    if i >= bytes.len() {
        return format!("{}", n);
    }
    i += 1;

    let mut precision: Option<usize> = None;
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        let mut prec = 0usize;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            prec = prec * 10 + (bytes[i] - b'0') as usize;
            i += 1;
        }
        precision = Some(prec);
    }

    if i >= bytes.len() {
        return format!("{}", n);
    }

    let prec = precision.unwrap_or(6);
    match bytes[i] {
        b'f' => format!("{:.prec$}", n),
        b'e' => format!("{:.prec$e}", n),
        b'E' => format!("{:.prec$E}", n),
        b'g' | b'G' => format_g(n, prec),
        _ => format!("{}", n),
    }
}

/// `%g`-style formatting: precision counts significant digits, the
/// notation follows the magnitude, and trailing fraction zeros drop.
pub fn format_g(n: f64, precision: usize) -> String {
    if n == 0.0 {
        return "0".to_string();
    }
    let sig = precision.max(1);
    let magnitude = n.abs().log10().floor() as i32;

    let raw = if magnitude < -4 || magnitude >= sig as i32 {
        format!("{:.*e}", sig - 1, n)
    } else {
        let decimals = (sig as i32 - 1 - magnitude).max(0) as usize;
        format!("{:.*}", decimals, n)
    };
    strip_fraction_zeros(&raw)
}

/// Drop trailing zeros (and a bare radix point) from the fractional
/// part, leaving any exponent suffix in place.
fn strip_fraction_zeros(s: &str) -> String {
    let (mantissa, exponent) = match s.find('e') {
        Some(i) => s.split_at(i),
        None => (s, ""),
    };
    if !mantissa.contains('.') {
        return s.to_string();
    }
    let kept = mantissa.trim_end_matches('0').trim_end_matches('.');
    format!("{}{}", kept, exponent)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FMT: &str = "%.6g";

    #[test]
    fn test_str_to_num_integer() {
        assert_eq!(str_to_num("42", true), Num::Int(42));
        assert_eq!(str_to_num("-7", true), Num::Int(-7));
        assert_eq!(str_to_num("+5", true), Num::Int(5));
    }

    #[test]
    fn test_str_to_num_float() {
        assert_eq!(str_to_num("3.14", true), Num::Flt(3.14));
        assert_eq!(str_to_num("1e5", true), Num::Flt(100000.0));
        assert_eq!(str_to_num(".5", true), Num::Flt(0.5));
    }

    #[test]
    fn test_str_to_num_prefix() {
        assert_eq!(str_to_num("123abc", true), Num::Int(123));
        assert_eq!(str_to_num("1.5e2xyz", true), Num::Flt(150.0));
        assert_eq!(str_to_num("abc", true), Num::Int(0));
        assert_eq!(str_to_num("", true), Num::Int(0));
    }

    #[test]
    fn test_str_to_num_radix_prefixes() {
        assert_eq!(str_to_num("0x1f", true), Num::Int(31));
        assert_eq!(str_to_num("0b101", true), Num::Int(5));
        assert_eq!(str_to_num("010", true), Num::Int(8));
        assert_eq!(str_to_num("-0x10", true), Num::Int(-16));
        // "09" is not octal, "0.5" is not octal
        assert_eq!(str_to_num("09", true), Num::Int(9));
        assert_eq!(str_to_num("0.5", true), Num::Flt(0.5));
    }

    #[test]
    fn test_str_to_num_dangling_exponent() {
        // "1e" parses as 1 with the exponent unconsumed
        assert_eq!(str_to_num("1e", true), Num::Int(1));
        assert_eq!(str_to_num("2e+", true), Num::Int(2));
    }

    #[test]
    fn test_looks_like_number() {
        assert!(looks_like_number("42"));
        assert!(looks_like_number(" 3.5 "));
        assert!(looks_like_number("-1e3"));
        assert!(!looks_like_number("12ab"));
        assert!(!looks_like_number(""));
        assert!(!looks_like_number("nan is text"));
    }

    #[test]
    fn test_flt_to_str_integral() {
        assert_eq!(flt_to_str(42.0, FMT), "42");
        assert_eq!(flt_to_str(-5.0, FMT), "-5");
        assert_eq!(flt_to_str(0.0, FMT), "0");
    }

    #[test]
    fn test_flt_to_str_fractional() {
        assert_eq!(flt_to_str(3.14, FMT), "3.14");
        assert_eq!(flt_to_str(0.5, FMT), "0.5");
    }

    #[test]
    fn test_flt_to_str_fixed_format() {
        assert_eq!(flt_to_str(3.14159, "%.2f"), "3.14");
    }

    #[test]
    fn test_to_str_int_and_nil() {
        assert_eq!(&*Value::Int(7).to_str(FMT).unwrap(), "7");
        assert_eq!(&*Value::Nil.to_str(FMT).unwrap(), "");
        assert_eq!(&*Value::Char('x').to_str(FMT).unwrap(), "x");
    }

    #[test]
    fn test_to_str_map_fails() {
        assert_eq!(Value::new_map().to_str(FMT), Err(ErrKind::EvalToStr));
        assert_eq!(Value::new_map().to_num(true), Err(ErrKind::EvalToNum));
    }

    #[test]
    fn test_to_num_variants() {
        assert_eq!(Value::Nil.to_num(true).unwrap(), Num::Int(0));
        assert_eq!(Value::Char('A').to_num(true).unwrap(), Num::Int(65));
        assert_eq!(Value::Bchr(b'0').to_num(true).unwrap(), Num::Int(48));
        assert_eq!(Value::str_from("12.5").to_num(true).unwrap(), Num::Flt(12.5));
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(Value::Int(1).is_truthy());
        assert!(!Value::Flt(0.0).is_truthy());
        assert!(!Value::str_from("").is_truthy());
        // A plain string "0" is true; a numeric string "0" is false.
        assert!(Value::str_from("0").is_truthy());
        assert!(!Value::NumStr(Rc::from("0")).is_truthy());
        assert!(Value::NumStr(Rc::from("2")).is_truthy());
    }

    #[test]
    fn test_cmp_numeric() {
        let a = Value::Int(3);
        let b = Value::Int(10);
        assert_eq!(a.cmp_with(&b, FMT, true).unwrap(), Ordering::Less);
    }

    #[test]
    fn test_cmp_string() {
        let a = Value::str_from("3");
        let b = Value::str_from("10");
        // Plain strings compare lexicographically: "3" > "10"
        assert_eq!(a.cmp_with(&b, FMT, true).unwrap(), Ordering::Greater);
    }

    #[test]
    fn test_cmp_numeric_strings() {
        let a = Value::NumStr(Rc::from("3"));
        let b = Value::NumStr(Rc::from("10"));
        assert_eq!(a.cmp_with(&b, FMT, true).unwrap(), Ordering::Less);
        // Without ncmponstr they fall back to string collation
        assert_eq!(a.cmp_with(&b, FMT, false).unwrap(), Ordering::Greater);
    }

    #[test]
    fn test_cmp_nil_against_string() {
        let nil = Value::Nil;
        assert_eq!(
            nil.cmp_with(&Value::str_from(""), FMT, true).unwrap(),
            Ordering::Equal
        );
        assert_eq!(nil.cmp_with(&Value::Int(0), FMT, true).unwrap(), Ordering::Equal);
    }

    #[test]
    fn test_strict_eq() {
        assert!(Value::Int(1).strict_eq(&Value::Int(1)));
        // Different tags never equal, even when loose comparison would
        assert!(!Value::Int(1).strict_eq(&Value::str_from("1")));
        assert!(!Value::Int(1).strict_eq(&Value::Flt(1.0)));
        let m = Value::new_map();
        assert!(m.strict_eq(&m.clone()));
        assert!(!m.strict_eq(&Value::new_map()));
    }

    #[test]
    fn test_deep_copy_breaks_sharing() {
        let m = Value::new_map();
        if let Value::Map(h) = &m {
            h.borrow_mut().insert("k".to_string(), Value::Int(1));
        }
        let c = m.deep_copy();
        if let (Value::Map(a), Value::Map(b)) = (&m, &c) {
            assert!(!Rc::ptr_eq(a, b));
            b.borrow_mut().insert("k2".to_string(), Value::Int(2));
            assert!(a.borrow().get("k2").is_none());
        } else {
            panic!("expected maps");
        }
    }

    #[test]
    fn test_num_or_str() {
        assert!(matches!(Value::num_or_str("42"), Value::NumStr(_)));
        assert!(matches!(Value::num_or_str("hello"), Value::Str(_)));
    }

    #[test]
    fn test_mbs_round_trip() {
        let v = Value::mbs_from(b"ab\0cd");
        assert_eq!(&*v.to_str(FMT).unwrap(), "ab\0cd");
        let b = Value::str_from("hi").to_mbs(FMT).unwrap();
        assert_eq!(&*b, b"hi");
    }
}
