/// Lexer
///
/// Streams tokens from a stack of sources. The bottom of the stack is
/// the master source supplied by the embedder; `@include` pushes a new
/// source and end-of-source pops back. Includes are bounded in depth,
/// rejected on cycles, and resolved first against the directory of the
/// including source, then against the configured include directories.

use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::error::{ErrKind, HawkError, Loc, Result};
use crate::opts::Traits;
use crate::types::{Token, TokenType};

// ─── Keywords ────────────────────────────────────────────────

/// Look up a keyword by name. Returns the corresponding TokenType if the
/// identifier is a reserved keyword, or None if it is a regular
/// identifier.
fn lookup_keyword(name: &str) -> Option<TokenType> {
    match name {
        "BEGIN" => Some(TokenType::Begin),
        "END" => Some(TokenType::End),
        "BEGINFILE" => Some(TokenType::BeginFile),
        "ENDFILE" => Some(TokenType::EndFile),
        "function" => Some(TokenType::Function),
        "if" => Some(TokenType::If),
        "else" => Some(TokenType::Else),
        "while" => Some(TokenType::While),
        "do" => Some(TokenType::Do),
        "for" => Some(TokenType::For),
        "in" => Some(TokenType::In),
        "break" => Some(TokenType::Break),
        "continue" => Some(TokenType::Continue),
        "next" => Some(TokenType::Next),
        "nextfile" => Some(TokenType::NextFile),
        "nextofile" => Some(TokenType::NextOFile),
        "exit" => Some(TokenType::Exit),
        "return" => Some(TokenType::Return),
        "delete" => Some(TokenType::Delete),
        "print" => Some(TokenType::Print),
        "printf" => Some(TokenType::Printf),
        "getline" => Some(TokenType::Getline),
        _ => None,
    }
}

/// `@`-prefixed keywords.
fn lookup_at_keyword(name: &str) -> Option<TokenType> {
    match name {
        "abort" => Some(TokenType::Abort),
        "reset" => Some(TokenType::Reset),
        "global" => Some(TokenType::Global),
        "local" => Some(TokenType::Local),
        "nil" => Some(TokenType::XNil),
        "pragma" => Some(TokenType::Pragma),
        _ => None,
    }
}

/// Determines whether a `/` at the current position starts a regex
/// literal (true) or a division operator (false), based on the
/// preceding token.
fn can_be_regex(last_token: Option<&TokenType>) -> bool {
    match last_token {
        None => true,
        Some(tt) => !matches!(
            tt,
            TokenType::Int
                | TokenType::Flt
                | TokenType::Str
                | TokenType::Mbs
                | TokenType::CharLit
                | TokenType::BchrLit
                | TokenType::Ident
                | TokenType::RParen
                | TokenType::RBracket
                | TokenType::Incr
                | TokenType::Decr
                | TokenType::Dollar
        ),
    }
}

// ─── Source Resolution ───────────────────────────────────────

/// Reads included sources. The default implementation goes to the
/// filesystem; tests plug in an in-memory table.
pub trait SourceResolver {
    fn read(&mut self, path: &Path) -> io::Result<String>;
}

pub struct FsResolver;

impl SourceResolver for FsResolver {
    fn read(&mut self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }
}

// ─── Sources ─────────────────────────────────────────────────

struct Source {
    name: Rc<str>,
    /// Path of this source on disk, when it came from one; used to
    /// resolve relative includes.
    path: Option<PathBuf>,
    chars: Vec<char>,
    pos: usize,
    line: u32,
    col: u32,
}

impl Source {
    fn new(name: Rc<str>, path: Option<PathBuf>, text: &str) -> Self {
        Source {
            name,
            path,
            chars: text.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }
}

// ─── Lexer ───────────────────────────────────────────────────

pub struct Lexer {
    stack: Vec<Source>,
    traits: Traits,
    include_limit: usize,
    include_dirs: Vec<PathBuf>,
    resolver: Box<dyn SourceResolver>,
    last_token_type: Option<TokenType>,
}

impl Lexer {
    pub fn new(name: &str, text: &str, traits: Traits, include_limit: usize) -> Self {
        Lexer {
            stack: vec![Source::new(Rc::from(name), None, text)],
            traits,
            include_limit,
            include_dirs: Vec::new(),
            resolver: Box::new(FsResolver),
            last_token_type: None,
        }
    }

    pub fn with_include_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.include_dirs = dirs;
        self
    }

    pub fn with_resolver(mut self, resolver: Box<dyn SourceResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Mark the master source as coming from the given file path, so
    /// relative includes resolve against its directory.
    pub fn set_master_path(&mut self, path: PathBuf) {
        if let Some(src) = self.stack.first_mut() {
            src.path = Some(path);
        }
    }

    /// Pragmas may flip traits mid-parse; the parser pushes them down.
    pub fn set_traits(&mut self, traits: Traits) {
        self.traits = traits;
    }

    pub fn set_include_limit(&mut self, limit: usize) {
        self.include_limit = limit;
    }

    // ── Helpers ──────────────────────────────────────────────

    fn src(&self) -> &Source {
        self.stack.last().expect("source stack never empty")
    }

    fn src_mut(&mut self) -> &mut Source {
        self.stack.last_mut().expect("source stack never empty")
    }

    fn loc(&self) -> Loc {
        let s = self.src();
        Loc::new(Some(s.name.clone()), s.line, s.col)
    }

    fn peek(&self, offset: usize) -> char {
        let s = self.src();
        if s.pos + offset < s.chars.len() {
            s.chars[s.pos + offset]
        } else {
            '\0'
        }
    }

    fn advance(&mut self) -> char {
        let s = self.src_mut();
        if s.pos >= s.chars.len() {
            return '\0';
        }
        let ch = s.chars[s.pos];
        s.pos += 1;
        if ch == '\n' {
            s.line += 1;
            s.col = 1;
        } else {
            s.col += 1;
        }
        ch
    }

    fn at_source_end(&self) -> bool {
        let s = self.src();
        s.pos >= s.chars.len()
    }

    fn make(&self, token_type: TokenType, value: String, loc: Loc) -> Token {
        Token { token_type, value, loc }
    }

    fn err(&self, loc: Loc, msg: impl Into<String>) -> HawkError {
        HawkError::new(ErrKind::Syntax, loc, msg)
    }

    // ── Whitespace / Comments / Line Continuation ────────────

    fn skip_blanks(&mut self) {
        loop {
            if self.at_source_end() {
                return;
            }
            let ch = self.peek(0);
            if ch == ' ' || ch == '\t' || ch == '\r' {
                self.advance();
            } else if ch == '\\' && self.peek(1) == '\n' {
                self.advance();
                self.advance();
            } else if ch == '#' {
                while !self.at_source_end() && self.peek(0) != '\n' {
                    self.advance();
                }
            } else {
                return;
            }
        }
    }

    // ── Escapes ──────────────────────────────────────────────

    /// Decode one escape sequence after a consumed backslash. `wide`
    /// enables `\u`/`\U`.
    fn read_escape(&mut self, wide: bool) -> Result<char> {
        let loc = self.loc();
        let escaped = self.advance();
        let ch = match escaped {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            'f' => '\x0C',
            'b' => '\x08',
            'v' => '\x0B',
            'a' => '\x07',
            '\\' => '\\',
            '"' => '"',
            '\'' => '\'',
            '/' => '/',
            'x' => {
                let mut hex = String::new();
                while hex.len() < 2 && self.peek(0).is_ascii_hexdigit() {
                    hex.push(self.advance());
                }
                if hex.is_empty() {
                    return Err(self.err(loc, "invalid \\x escape with no hex digits"));
                }
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(c) => c,
                    None => return Err(self.err(loc, format!("invalid escape \\x{}", hex))),
                }
            }
            'u' | 'U' if wide => {
                let want = if escaped == 'u' { 4 } else { 8 };
                let mut hex = String::new();
                while hex.len() < want && self.peek(0).is_ascii_hexdigit() {
                    hex.push(self.advance());
                }
                if hex.len() != want {
                    return Err(self.err(loc, format!("invalid \\{} escape", escaped)));
                }
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(c) => c,
                    None => return Err(self.err(loc, format!("invalid code point \\{}{}", escaped, hex))),
                }
            }
            c if c.is_ascii_digit() && c < '8' => {
                let mut octal = String::new();
                octal.push(c);
                while octal.len() < 3 && ('0'..='7').contains(&self.peek(0)) {
                    octal.push(self.advance());
                }
                u32::from_str_radix(&octal, 8)
                    .ok()
                    .and_then(char::from_u32)
                    .unwrap_or('\0')
            }
            other => other,
        };
        Ok(ch)
    }

    // ── Literals ─────────────────────────────────────────────

    fn read_string(&mut self, wide: bool) -> Result<Token> {
        let start = self.loc();
        self.advance(); // opening quote
        let mut value = String::new();
        let multiline = self.traits.has(Traits::MULTILINESTR);

        loop {
            if self.at_source_end() {
                return Err(self.err(start, "unterminated string literal"));
            }
            match self.peek(0) {
                '"' => break,
                '\n' if !multiline => {
                    return Err(self.err(start, "newline in string literal"));
                }
                '\\' => {
                    self.advance();
                    value.push(self.read_escape(wide)?);
                }
                _ => value.push(self.advance()),
            }
        }
        self.advance(); // closing quote

        let tt = if wide { TokenType::Str } else { TokenType::Mbs };
        Ok(self.make(tt, value, start))
    }

    fn read_char_literal(&mut self, wide: bool) -> Result<Token> {
        let start = self.loc();
        self.advance(); // opening quote
        if self.at_source_end() {
            return Err(self.err(start, "unterminated character literal"));
        }
        let ch = if self.peek(0) == '\\' {
            self.advance();
            self.read_escape(wide)?
        } else {
            self.advance()
        };
        if self.peek(0) != '\'' {
            return Err(self.err(start, "unterminated character literal"));
        }
        self.advance();

        let tt = if wide { TokenType::CharLit } else { TokenType::BchrLit };
        Ok(self.make(tt, ch.to_string(), start))
    }

    fn read_regex(&mut self) -> Result<Token> {
        let start = self.loc();
        self.advance(); // opening /
        let mut pattern = String::new();
        let multiline = self.traits.has(Traits::MULTILINESTR);

        loop {
            if self.at_source_end() {
                return Err(self.err(start, "unterminated regular expression"));
            }
            match self.peek(0) {
                '/' => break,
                '\n' if !multiline => {
                    return Err(self.err(start, "newline in regular expression"));
                }
                '\\' => {
                    pattern.push(self.advance());
                    if !self.at_source_end() {
                        pattern.push(self.advance());
                    }
                }
                _ => pattern.push(self.advance()),
            }
        }
        self.advance(); // closing /

        Ok(self.make(TokenType::Regex, pattern, start))
    }

    fn read_number(&mut self) -> Result<Token> {
        let start = self.loc();
        let mut text = String::new();

        // Radix-prefixed integers.
        if self.peek(0) == '0' && (self.peek(1) == 'x' || self.peek(1) == 'X') {
            text.push(self.advance());
            text.push(self.advance());
            while self.peek(0).is_ascii_hexdigit() {
                text.push(self.advance());
            }
            if text.len() == 2 {
                return Err(self.err(start, "invalid hexadecimal literal"));
            }
            return Ok(self.make(TokenType::Int, text, start));
        }
        if self.peek(0) == '0' && (self.peek(1) == 'b' || self.peek(1) == 'B') {
            text.push(self.advance());
            text.push(self.advance());
            while self.peek(0) == '0' || self.peek(0) == '1' {
                text.push(self.advance());
            }
            if text.len() == 2 {
                return Err(self.err(start, "invalid binary literal"));
            }
            return Ok(self.make(TokenType::Int, text, start));
        }

        while self.peek(0).is_ascii_digit() {
            text.push(self.advance());
        }

        let mut is_flt = false;
        if self.peek(0) == '.' && self.peek(1).is_ascii_digit() {
            is_flt = true;
            text.push(self.advance());
            while self.peek(0).is_ascii_digit() {
                text.push(self.advance());
            }
        }

        if self.peek(0) == 'e' || self.peek(0) == 'E' {
            let after = self.peek(1);
            let after2 = self.peek(2);
            if after.is_ascii_digit()
                || ((after == '+' || after == '-') && after2.is_ascii_digit())
            {
                is_flt = true;
                text.push(self.advance());
                if self.peek(0) == '+' || self.peek(0) == '-' {
                    text.push(self.advance());
                }
                while self.peek(0).is_ascii_digit() {
                    text.push(self.advance());
                }
            }
        }

        let tt = if is_flt { TokenType::Flt } else { TokenType::Int };
        Ok(self.make(tt, text, start))
    }

    fn read_identifier(&mut self) -> Token {
        let start = self.loc();
        let mut name = String::new();

        while self.peek(0).is_ascii_alphanumeric() || self.peek(0) == '_' {
            name.push(self.advance());
        }

        // Module-qualified names: mod::symbol
        while self.peek(0) == ':'
            && self.peek(1) == ':'
            && (self.peek(2).is_ascii_alphabetic() || self.peek(2) == '_')
        {
            name.push(self.advance());
            name.push(self.advance());
            while self.peek(0).is_ascii_alphanumeric() || self.peek(0) == '_' {
                name.push(self.advance());
            }
        }

        match lookup_keyword(&name) {
            Some(tt) => self.make(tt, name, start),
            None => self.make(TokenType::Ident, name, start),
        }
    }

    // ── @-Directives ─────────────────────────────────────────

    /// Handle a token starting with `@`: a byte literal, an `@`-keyword,
    /// or an `@include` that pushes a new source.
    fn read_at(&mut self) -> Result<Option<Token>> {
        let start = self.loc();
        self.advance(); // @

        // Byte string / byte char literals: @b"..." and @b'...'
        if self.peek(0) == 'b' && (self.peek(1) == '"' || self.peek(1) == '\'') {
            self.advance();
            return if self.peek(0) == '"' {
                self.read_string(false).map(Some)
            } else {
                self.read_char_literal(false).map(Some)
            };
        }

        let mut word = String::new();
        while self.peek(0).is_ascii_alphanumeric() || self.peek(0) == '_' {
            word.push(self.advance());
        }

        if word == "include" {
            self.handle_include(start)?;
            return Ok(None);
        }

        match lookup_at_keyword(&word) {
            Some(tt) => Ok(Some(self.make(tt, format!("@{}", word), start))),
            None => Err(self.err(start, format!("unknown directive @{}", word))),
        }
    }

    fn handle_include(&mut self, at: Loc) -> Result<()> {
        self.skip_blanks();
        if self.peek(0) != '"' {
            return Err(self.err(at, "@include requires a quoted path"));
        }
        let tok = self.read_string(true)?;
        let spec = tok.value;

        // Optional trailing semicolon belongs to the directive.
        self.skip_blanks();
        if self.peek(0) == ';' {
            self.advance();
        }

        if self.stack.len() >= self.include_limit {
            return Err(HawkError::new(
                ErrKind::Stackov,
                at,
                format!("include depth exceeds {}", self.include_limit),
            ));
        }

        let (path, text) = self.resolve_include(&spec, &at)?;

        // Reject any path already on the stack.
        let norm: Rc<str> = Rc::from(path.to_string_lossy().as_ref());
        if self.stack.iter().any(|s| s.name == norm) {
            return Err(HawkError::new(
                ErrKind::Exist,
                at,
                format!("cyclic include of {}", norm),
            ));
        }

        self.stack.push(Source::new(norm, Some(path), &text));
        Ok(())
    }

    fn resolve_include(&mut self, spec: &str, at: &Loc) -> Result<(PathBuf, String)> {
        let spec_path = PathBuf::from(spec);
        let mut candidates = Vec::new();

        if spec_path.is_absolute() {
            candidates.push(spec_path);
        } else {
            if let Some(dir) = self
                .src()
                .path
                .as_ref()
                .and_then(|p| p.parent())
                .map(|p| p.to_path_buf())
            {
                candidates.push(dir.join(spec));
            } else {
                candidates.push(spec_path.clone());
            }
            for dir in &self.include_dirs {
                candidates.push(dir.join(spec));
            }
        }

        for cand in candidates {
            if let Ok(text) = self.resolver.read(&cand) {
                return Ok((cand, text));
            }
        }
        Err(HawkError::new(
            ErrKind::Noent,
            at.clone(),
            format!("cannot include {}", spec),
        ))
    }

    // ── Operators ────────────────────────────────────────────

    fn read_operator(&mut self) -> Result<Token> {
        let start = self.loc();
        let ch = self.advance();
        let next = self.peek(0);

        macro_rules! tok {
            ($tt:expr, $v:expr) => {
                Ok(self.make($tt, $v.to_string(), start))
            };
        }

        match ch {
            '+' => {
                if next == '+' {
                    self.advance();
                    tok!(TokenType::Incr, "++")
                } else if next == '=' {
                    self.advance();
                    tok!(TokenType::PlusAssign, "+=")
                } else {
                    tok!(TokenType::Plus, "+")
                }
            }
            '-' => {
                if next == '-' {
                    self.advance();
                    tok!(TokenType::Decr, "--")
                } else if next == '=' {
                    self.advance();
                    tok!(TokenType::MinusAssign, "-=")
                } else {
                    tok!(TokenType::Minus, "-")
                }
            }
            '*' => {
                if next == '*' {
                    self.advance();
                    // ** is an alias for ^
                    tok!(TokenType::Caret, "**")
                } else if next == '=' {
                    self.advance();
                    tok!(TokenType::StarAssign, "*=")
                } else {
                    tok!(TokenType::Star, "*")
                }
            }
            '/' => {
                if next == '=' {
                    self.advance();
                    tok!(TokenType::SlashAssign, "/=")
                } else {
                    tok!(TokenType::Slash, "/")
                }
            }
            '%' => {
                if next == '=' {
                    self.advance();
                    tok!(TokenType::PercentAssign, "%=")
                } else {
                    tok!(TokenType::Percent, "%")
                }
            }
            '^' => {
                if next == '=' {
                    self.advance();
                    tok!(TokenType::CaretAssign, "^=")
                } else {
                    tok!(TokenType::Caret, "^")
                }
            }
            '=' => {
                if next == '=' {
                    self.advance();
                    if self.peek(0) == '=' {
                        self.advance();
                        tok!(TokenType::TEq, "===")
                    } else {
                        tok!(TokenType::Eq, "==")
                    }
                } else {
                    tok!(TokenType::Assign, "=")
                }
            }
            '!' => {
                if next == '=' {
                    self.advance();
                    if self.peek(0) == '=' {
                        self.advance();
                        tok!(TokenType::TNe, "!==")
                    } else {
                        tok!(TokenType::Ne, "!=")
                    }
                } else if next == '~' {
                    self.advance();
                    tok!(TokenType::NotMatchOp, "!~")
                } else {
                    tok!(TokenType::Not, "!")
                }
            }
            '<' => {
                if next == '=' {
                    self.advance();
                    tok!(TokenType::Le, "<=")
                } else {
                    tok!(TokenType::Lt, "<")
                }
            }
            '>' => {
                if next == '=' {
                    self.advance();
                    tok!(TokenType::Ge, ">=")
                } else if next == '>' {
                    self.advance();
                    tok!(TokenType::Append, ">>")
                } else {
                    tok!(TokenType::Gt, ">")
                }
            }
            '&' => {
                if next == '&' {
                    self.advance();
                    tok!(TokenType::LAnd, "&&")
                } else {
                    tok!(TokenType::Amp, "&")
                }
            }
            '|' => {
                if next == '|' {
                    self.advance();
                    tok!(TokenType::LOr, "||")
                } else if next == '&' {
                    self.advance();
                    tok!(TokenType::RwPipe, "|&")
                } else {
                    tok!(TokenType::Pipe, "|")
                }
            }
            '~' => tok!(TokenType::MatchOp, "~"),
            '?' => tok!(TokenType::Question, "?"),
            ':' => tok!(TokenType::Colon, ":"),
            ',' => tok!(TokenType::Comma, ","),
            ';' => tok!(TokenType::Semicolon, ";"),
            '(' => tok!(TokenType::LParen, "("),
            ')' => tok!(TokenType::RParen, ")"),
            '{' => tok!(TokenType::LBrace, "{"),
            '}' => tok!(TokenType::RBrace, "}"),
            '[' => tok!(TokenType::LBracket, "["),
            ']' => tok!(TokenType::RBracket, "]"),
            '$' => tok!(TokenType::Dollar, "$"),
            other => Err(self.err(start, format!("unexpected character '{}'", other))),
        }
    }

    // ── Main Dispatch ────────────────────────────────────────

    /// Produce the next token, chasing includes and popping finished
    /// sources. The stream ends with an Eof token.
    pub fn next_token(&mut self) -> Result<Token> {
        loop {
            self.skip_blanks();

            if self.at_source_end() {
                if self.stack.len() > 1 {
                    self.stack.pop();
                    continue;
                }
                let loc = self.loc();
                return Ok(self.make(TokenType::Eof, String::new(), loc));
            }

            let ch = self.peek(0);

            let token = if ch == '\n' {
                let loc = self.loc();
                self.advance();
                self.make(TokenType::Newline, "\n".to_string(), loc)
            } else if ch == '@' {
                match self.read_at()? {
                    Some(t) => t,
                    None => continue, // include handled
                }
            } else if ch == '"' {
                self.read_string(true)?
            } else if ch == '\'' {
                self.read_char_literal(true)?
            } else if ch == '/' && can_be_regex(self.last_token_type.as_ref()) {
                self.read_regex()?
            } else if ch.is_ascii_digit() || (ch == '.' && self.peek(1).is_ascii_digit()) {
                self.read_number()?
            } else if ch.is_ascii_alphabetic() || ch == '_' {
                self.read_identifier()
            } else {
                self.read_operator()?
            };

            self.last_token_type = Some(token.token_type.clone());
            return Ok(token);
        }
    }
}

// ─── Convenience for tests and the deparser round-trip ──────

/// Tokenize a complete source string with the given traits.
pub fn tokenize(input: &str, traits: Traits) -> Result<Vec<Token>> {
    let mut lexer = Lexer::new("(main)", input, traits, 32);
    let mut tokens = Vec::new();
    loop {
        let tok = lexer.next_token()?;
        let done = tok.token_type == TokenType::Eof;
        tokens.push(tok);
        if done {
            return Ok(tokens);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn types(input: &str) -> Vec<TokenType> {
        tokenize(input, Traits::modern())
            .unwrap()
            .into_iter()
            .map(|t| t.token_type)
            .filter(|t| *t != TokenType::Eof)
            .collect()
    }

    fn type_vals(input: &str) -> Vec<(TokenType, String)> {
        tokenize(input, Traits::modern())
            .unwrap()
            .into_iter()
            .filter(|t| t.token_type != TokenType::Eof)
            .map(|t| (t.token_type, t.value))
            .collect()
    }

    /// An in-memory resolver for include tests.
    struct MemResolver(HashMap<PathBuf, String>);

    impl SourceResolver for MemResolver {
        fn read(&mut self, path: &Path) -> io::Result<String> {
            self.0
                .get(path)
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such source"))
        }
    }

    fn mem_lexer(main: &str, files: &[(&str, &str)]) -> Lexer {
        let map = files
            .iter()
            .map(|(k, v)| (PathBuf::from(k), v.to_string()))
            .collect();
        Lexer::new("(main)", main, Traits::modern(), 8)
            .with_resolver(Box::new(MemResolver(map)))
    }

    fn drain(lexer: &mut Lexer) -> Result<Vec<Token>> {
        let mut out = Vec::new();
        loop {
            let t = lexer.next_token()?;
            let done = t.token_type == TokenType::Eof;
            out.push(t);
            if done {
                return Ok(out);
            }
        }
    }

    #[test]
    fn test_print_field() {
        let toks = types("{ print $1 }");
        assert_eq!(
            toks,
            vec![
                TokenType::LBrace,
                TokenType::Print,
                TokenType::Dollar,
                TokenType::Int,
                TokenType::RBrace,
            ]
        );
    }

    #[test]
    fn test_string_and_escapes() {
        let toks = type_vals(r#""hello\tworld\n""#);
        assert_eq!(toks, vec![(TokenType::Str, "hello\tworld\n".to_string())]);
    }

    #[test]
    fn test_hex_octal_unicode_escapes() {
        let toks = type_vals(r#""\x41\101B""#);
        assert_eq!(toks[0].1, "AAB");
    }

    #[test]
    fn test_mbs_literal() {
        let toks = type_vals(r#"@b"bytes""#);
        assert_eq!(toks, vec![(TokenType::Mbs, "bytes".to_string())]);
    }

    #[test]
    fn test_char_literals() {
        let toks = type_vals(r"'a' @b'z'");
        assert_eq!(
            toks,
            vec![
                (TokenType::CharLit, "a".to_string()),
                (TokenType::BchrLit, "z".to_string()),
            ]
        );
    }

    #[test]
    fn test_numbers() {
        let toks = type_vals("1 2.5 0x1f 0b101 1e3");
        assert_eq!(
            toks,
            vec![
                (TokenType::Int, "1".to_string()),
                (TokenType::Flt, "2.5".to_string()),
                (TokenType::Int, "0x1f".to_string()),
                (TokenType::Int, "0b101".to_string()),
                (TokenType::Flt, "1e3".to_string()),
            ]
        );
    }

    #[test]
    fn test_regex_vs_division() {
        let toks = types("a / b");
        assert_eq!(toks, vec![TokenType::Ident, TokenType::Slash, TokenType::Ident]);

        let toks = types("/pattern/");
        assert_eq!(toks, vec![TokenType::Regex]);

        let toks = types("$0 ~ /foo/");
        assert!(toks.contains(&TokenType::Regex));
    }

    #[test]
    fn test_extended_operators() {
        let toks = types("a === b !== c |& d & e");
        assert!(toks.contains(&TokenType::TEq));
        assert!(toks.contains(&TokenType::TNe));
        assert!(toks.contains(&TokenType::RwPipe));
        assert!(toks.contains(&TokenType::Amp));
    }

    #[test]
    fn test_at_keywords() {
        let toks = types("@global g; @local l; @abort; @reset a; x = @nil");
        assert!(toks.contains(&TokenType::Global));
        assert!(toks.contains(&TokenType::Local));
        assert!(toks.contains(&TokenType::Abort));
        assert!(toks.contains(&TokenType::Reset));
        assert!(toks.contains(&TokenType::XNil));
    }

    #[test]
    fn test_unknown_at_directive_fails() {
        assert!(tokenize("@bogus", Traits::modern()).is_err());
    }

    #[test]
    fn test_module_qualified_ident() {
        let toks = type_vals("sys::getpid()");
        assert_eq!(toks[0], (TokenType::Ident, "sys::getpid".to_string()));
    }

    #[test]
    fn test_keywords() {
        for (kw, expected) in [
            ("BEGIN", TokenType::Begin),
            ("END", TokenType::End),
            ("BEGINFILE", TokenType::BeginFile),
            ("ENDFILE", TokenType::EndFile),
            ("nextofile", TokenType::NextOFile),
            ("getline", TokenType::Getline),
        ] {
            assert_eq!(types(kw), vec![expected], "keyword '{}'", kw);
        }
    }

    #[test]
    fn test_comments_and_continuation() {
        let toks = types("a # comment\nb");
        assert_eq!(toks, vec![TokenType::Ident, TokenType::Newline, TokenType::Ident]);

        let toks = types("a +\\\nb");
        assert_eq!(toks, vec![TokenType::Ident, TokenType::Plus, TokenType::Ident]);
    }

    #[test]
    fn test_newline_in_string_rejected_without_multilinestr() {
        let mut t = Traits::modern();
        t.set(Traits::MULTILINESTR, false);
        assert!(tokenize("\"ab\ncd\"", t).is_err());
        assert!(tokenize("\"ab\ncd\"", Traits::modern()).is_ok());
    }

    #[test]
    fn test_unterminated_string_fails() {
        let mut t = Traits::modern();
        t.set(Traits::MULTILINESTR, false);
        let err = tokenize(r#""never closed"#, t).unwrap_err();
        assert_eq!(err.kind, ErrKind::Syntax);
    }

    #[test]
    fn test_include_splices_tokens() {
        let mut lexer = mem_lexer(
            "@include \"inc.hawk\"\nBEGIN { f() }",
            &[("inc.hawk", "function f() { return 1 }\n")],
        );
        let toks = drain(&mut lexer).unwrap();
        let tts: Vec<_> = toks.iter().map(|t| t.token_type.clone()).collect();
        assert!(tts.contains(&TokenType::Function));
        assert!(tts.contains(&TokenType::Begin));
        // Included tokens come before the master's continuation.
        let f_pos = tts.iter().position(|t| *t == TokenType::Function).unwrap();
        let b_pos = tts.iter().position(|t| *t == TokenType::Begin).unwrap();
        assert!(f_pos < b_pos);
    }

    #[test]
    fn test_include_cycle_rejected() {
        let mut lexer = mem_lexer(
            "@include \"a.hawk\"",
            &[
                ("a.hawk", "@include \"b.hawk\"\n"),
                ("b.hawk", "@include \"a.hawk\"\n"),
            ],
        );
        let err = drain(&mut lexer).unwrap_err();
        assert_eq!(err.kind, ErrKind::Exist);
        assert!(err.msg.contains("cyclic include"));
    }

    #[test]
    fn test_include_depth_bounded() {
        // c1 includes c2 includes c3 ... past the limit
        let mut files: Vec<(String, String)> = Vec::new();
        for i in 1..12 {
            files.push((
                format!("c{}.hawk", i),
                format!("@include \"c{}.hawk\"\n", i + 1),
            ));
        }
        let refs: Vec<(&str, &str)> = files
            .iter()
            .map(|(a, b)| (a.as_str(), b.as_str()))
            .collect();
        let mut lexer = mem_lexer("@include \"c1.hawk\"", &refs);
        let err = drain(&mut lexer).unwrap_err();
        assert_eq!(err.kind, ErrKind::Stackov);
    }

    #[test]
    fn test_missing_include_fails() {
        let mut lexer = mem_lexer("@include \"nope.hawk\"", &[]);
        let err = drain(&mut lexer).unwrap_err();
        assert_eq!(err.kind, ErrKind::Noent);
    }

    #[test]
    fn test_include_tokens_carry_their_file() {
        let mut lexer = mem_lexer("@include \"inc.hawk\"", &[("inc.hawk", "x")]);
        let toks = drain(&mut lexer).unwrap();
        let ident = toks.iter().find(|t| t.token_type == TokenType::Ident).unwrap();
        assert_eq!(ident.loc.file.as_deref(), Some("inc.hawk"));
    }

    #[test]
    fn test_locations() {
        let toks = tokenize("a\n  b", Traits::modern()).unwrap();
        assert_eq!((toks[0].loc.line, toks[0].loc.col), (1, 1));
        // after newline: b at line 2 col 3
        assert_eq!((toks[2].loc.line, toks[2].loc.col), (2, 3));
    }
}
