/// Regular Expressions
///
/// A regex node holds its source pattern and two lazily compiled
/// programs, one case-sensitive and one case-insensitive. Compilation
/// happens on first use of each slot; both `~` matching and the
/// splitting/substitution intrinsics share the same node type.

use std::cell::OnceCell;
use std::rc::Rc;

use regex_lite::Regex;

use crate::error::{ErrKind, HawkError, Result};

// ─── Pattern Translation ─────────────────────────────────────

/// POSIX character classes and their plain character-class spellings,
/// sorted by name.
const POSIX_CLASSES: &[(&str, &str)] = &[
    ("alnum", "a-zA-Z0-9"),
    ("alpha", "a-zA-Z"),
    ("blank", " \\t"),
    ("cntrl", "\\x00-\\x1f\\x7f"),
    ("digit", "0-9"),
    ("graph", "!-~"),
    ("lower", "a-z"),
    ("print", " -~"),
    ("punct", "!\"#$%&'()*+,\\-./:;<=>?@\\[\\]\\\\^_`{|}~"),
    ("space", " \\t\\n\\r\\f\\v"),
    ("upper", "A-Z"),
    ("xdigit", "0-9A-Fa-f"),
];

/// Rewrite standalone `[[:name:]]` occurrences into plain character
/// classes. Unknown names and classes embedded in larger bracket
/// expressions pass through untouched for the engine to judge.
fn expand_posix_classes(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut rest = pattern;

    while let Some(open) = rest.find("[[:") {
        let after = &rest[open + 3..];
        let close = match after.find(":]]") {
            Some(i) => i,
            None => break,
        };
        let name = &after[..close];
        let found = POSIX_CLASSES
            .binary_search_by(|(n, _)| n.cmp(&name))
            .ok()
            .map(|i| POSIX_CLASSES[i].1);
        out.push_str(&rest[..open]);
        match found {
            Some(body) => {
                out.push('[');
                out.push_str(body);
                out.push(']');
            }
            None => out.push_str(&rest[open..open + 3 + close + 3]),
        }
        rest = &after[close + 3..];
    }
    out.push_str(rest);
    out
}

/// Escape unescaped braces so `{n,m}` reads as literal text when the
/// bound quantifier is disabled.
fn escape_bounds(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut escaped = false;
    for ch in pattern.chars() {
        if escaped {
            out.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' => {
                out.push('\\');
                escaped = true;
            }
            '{' => out.push_str("\\{"),
            '}' => out.push_str("\\}"),
            c => out.push(c),
        }
    }
    out
}

// ─── Rex ─────────────────────────────────────────────────────

/// A compiled-on-demand regular expression with case-sensitive and
/// case-insensitive program slots.
pub struct Rex {
    pattern: String,
    translated: String,
    cs: OnceCell<std::result::Result<Rc<Regex>, String>>,
    ci: OnceCell<std::result::Result<Rc<Regex>, String>>,
}

impl std::fmt::Debug for Rex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Rex(/{}/)", self.pattern)
    }
}

impl Rex {
    pub fn new(pattern: &str, rexbound: bool) -> Self {
        let mut translated = expand_posix_classes(pattern);
        if !rexbound {
            translated = escape_bounds(&translated);
        }
        Rex {
            pattern: pattern.to_string(),
            translated,
            cs: OnceCell::new(),
            ci: OnceCell::new(),
        }
    }

    /// The original pattern text, for deparsing and error messages.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// The compiled program for the requested slot, building it on first
    /// use.
    pub fn compiled(&self, ignore_case: bool) -> Result<Rc<Regex>> {
        let slot = if ignore_case { &self.ci } else { &self.cs };
        let built = slot.get_or_init(|| {
            let src = if ignore_case {
                format!("(?i){}", self.translated)
            } else {
                self.translated.clone()
            };
            Regex::new(&src).map(Rc::new).map_err(|e| e.to_string())
        });
        match built {
            Ok(re) => Ok(re.clone()),
            Err(msg) => Err(HawkError::bare(
                ErrKind::Rexerr,
                format!("invalid regular expression /{}/ - {}", self.pattern, msg),
            )),
        }
    }

    pub fn is_match(&self, s: &str, ignore_case: bool) -> Result<bool> {
        Ok(self.compiled(ignore_case)?.is_match(s))
    }

    /// First match as 0-based character start and character length.
    pub fn match_first(&self, s: &str, ignore_case: bool) -> Result<Option<(usize, usize)>> {
        let re = self.compiled(ignore_case)?;
        Ok(re.find(s).map(|m| {
            let start = s[..m.start()].chars().count();
            let len = s[m.start()..m.end()].chars().count();
            (start, len)
        }))
    }

    /// First match at or after `from` as byte offsets, for iterative
    /// match-replace-advance callers.
    pub fn find_from(
        &self,
        s: &str,
        from: usize,
        ignore_case: bool,
    ) -> Result<Option<(usize, usize)>> {
        let re = self.compiled(ignore_case)?;
        Ok(re.find_at(s, from).map(|m| (m.start(), m.end())))
    }

    /// Split `s` on this pattern.
    pub fn split<'a>(&self, s: &'a str, ignore_case: bool) -> Result<Vec<&'a str>> {
        let re = self.compiled(ignore_case)?;
        Ok(re.split(s).collect())
    }
}

/// Whether a record-separator string needs regex treatment, as opposed
/// to plain single- or multi-character matching.
pub fn has_meta(s: &str) -> bool {
    s.chars().any(|c| {
        matches!(
            c,
            '.' | '*' | '+' | '?' | '[' | ']' | '(' | ')' | '{' | '}' | '|' | '^' | '$' | '\\'
        )
    })
}

/// Escape a literal string for embedding into a pattern.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if has_meta(&c.to_string()) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_match() {
        let re = Rex::new("w[a-z]+", true);
        assert!(re.is_match("hello world", false).unwrap());
        assert_eq!(re.match_first("hello world", false).unwrap(), Some((6, 5)));
    }

    #[test]
    fn test_no_match() {
        let re = Rex::new("xyz", true);
        assert_eq!(re.match_first("hello", false).unwrap(), None);
    }

    #[test]
    fn test_case_insensitive_slot() {
        let re = Rex::new("abc", true);
        assert!(!re.is_match("ABC", false).unwrap());
        assert!(re.is_match("ABC", true).unwrap());
        // Both slots stay usable after compilation
        assert!(re.is_match("abc", false).unwrap());
    }

    #[test]
    fn test_posix_class_expansion() {
        let re = Rex::new("[[:digit:]]+", true);
        assert_eq!(re.match_first("ab12cd", false).unwrap(), Some((2, 2)));
    }

    #[test]
    fn test_bound_quantifier_gated() {
        let on = Rex::new("a{2,3}", true);
        assert!(on.is_match("aaa", false).unwrap());
        assert!(!on.is_match("a", false).unwrap());

        // With bounds disabled the braces are literal text.
        let off = Rex::new("a{2,3}", false);
        assert!(off.is_match("xa{2,3}y", false).unwrap());
        assert!(!off.is_match("aaa", false).unwrap());
    }

    #[test]
    fn test_invalid_pattern_reports_rexerr() {
        let re = Rex::new("(unclosed", true);
        let err = re.is_match("x", false).unwrap_err();
        assert_eq!(err.kind, ErrKind::Rexerr);
    }

    #[test]
    fn test_char_positions_with_multibyte() {
        let re = Rex::new("b+", true);
        // 'é' is two bytes but one character
        assert_eq!(re.match_first("áébb", false).unwrap(), Some((2, 2)));
    }

    #[test]
    fn test_find_from() {
        let re = Rex::new("o", true);
        let s = "foo bor";
        let first = re.find_from(s, 0, false).unwrap().unwrap();
        let second = re.find_from(s, first.1, false).unwrap().unwrap();
        assert_eq!(first, (1, 2));
        assert_eq!(second, (2, 3));
    }

    #[test]
    fn test_split() {
        let re = Rex::new("[,;]", true);
        assert_eq!(re.split("a,b;c", false).unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_has_meta() {
        assert!(has_meta("a|b"));
        assert!(has_meta("a."));
        assert!(!has_meta("::"));
        assert!(!has_meta("ab"));
    }

    #[test]
    fn test_quote() {
        let re = Rex::new(&quote("a.b"), true);
        assert!(re.is_match("a.b", false).unwrap());
        assert!(!re.is_match("axb", false).unwrap());
    }
}
