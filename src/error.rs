/// Error Types
///
/// A single error type is shared by the whole interpreter: parse errors,
/// runtime errors, I/O errors, and module errors all become a `HawkError`
/// carrying an error kind, a source location, and a formatted message.

use std::rc::Rc;
use thiserror::Error;

/// Error kinds with stable numeric codes.
///
/// The codes are what the reference command-line embedder prints in
/// `ERROR: CODE <n> ...` lines, so they must not be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrKind {
    /// Memory allocation failed
    Oomem,
    /// Invalid argument or parameter
    Inval,
    /// Name, path, or symbol not found
    Noent,
    /// Name or resource already exists
    Exist,
    /// Feature not implemented or unavailable
    Noimpl,
    /// General I/O failure
    Ioerr,
    /// End of stream reached
    Eof,
    /// Underlying OS call failed
    Syserr,
    /// Operation not permitted in the current state
    Perm,
    /// Syntax error during parsing
    Syntax,
    /// Value not convertible to a string
    EvalToStr,
    /// Value not convertible to a number
    EvalToNum,
    /// Configured depth limit exceeded
    Stackov,
    /// Regular expression build or match failure
    Rexerr,
    /// Internal invariant breach
    Intern,
    /// Broken pipe
    Pipe,
    /// Operation would block, retry later
    Again,
    /// Operation timed out
    Tmout,
    /// Module symbol not found
    Modnonm,
    /// Reference target entry not found
    Rfent,
}

impl ErrKind {
    /// Stable numeric error code.
    pub fn code(self) -> i32 {
        match self {
            ErrKind::Oomem => 1,
            ErrKind::Inval => 2,
            ErrKind::Noent => 3,
            ErrKind::Exist => 4,
            ErrKind::Noimpl => 5,
            ErrKind::Ioerr => 6,
            ErrKind::Eof => 7,
            ErrKind::Syserr => 8,
            ErrKind::Perm => 9,
            ErrKind::Syntax => 10,
            ErrKind::EvalToStr => 11,
            ErrKind::EvalToNum => 12,
            ErrKind::Stackov => 13,
            ErrKind::Rexerr => 14,
            ErrKind::Intern => 15,
            ErrKind::Pipe => 16,
            ErrKind::Again => 17,
            ErrKind::Tmout => 18,
            ErrKind::Modnonm => 19,
            ErrKind::Rfent => 20,
        }
    }

    /// Kinds that TOLERANT mode may recover from during evaluation.
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            ErrKind::EvalToStr
                | ErrKind::EvalToNum
                | ErrKind::Inval
                | ErrKind::Rexerr
                | ErrKind::Pipe
                | ErrKind::Again
                | ErrKind::Tmout
        )
    }
}

/// A source location: optional file, 1-based line and column.
///
/// Line 0 means "no location" (e.g. errors raised outside evaluation).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Loc {
    pub file: Option<Rc<str>>,
    pub line: u32,
    pub col: u32,
}

impl Loc {
    pub fn new(file: Option<Rc<str>>, line: u32, col: u32) -> Self {
        Loc { file, line, col }
    }

    pub fn none() -> Self {
        Loc::default()
    }
}

/// The interpreter error type.
#[derive(Debug, Clone, Error)]
#[error("{msg}")]
pub struct HawkError {
    pub kind: ErrKind,
    pub loc: Loc,
    pub msg: String,
}

impl HawkError {
    pub fn new(kind: ErrKind, loc: Loc, msg: impl Into<String>) -> Self {
        HawkError { kind, loc, msg: msg.into() }
    }

    /// An error with no useful location, typically attached to one later.
    pub fn bare(kind: ErrKind, msg: impl Into<String>) -> Self {
        HawkError { kind, loc: Loc::none(), msg: msg.into() }
    }

    /// Attach a location if the error does not carry one yet.
    pub fn at(mut self, loc: &Loc) -> Self {
        if self.loc.line == 0 {
            self.loc = loc.clone();
        }
        self
    }

    /// Render the error the way the command-line embedder reports it.
    pub fn report(&self) -> String {
        match &self.loc.file {
            Some(f) => format!(
                "ERROR: CODE {} LINE {} COLUMN {} FILE {} - {}",
                self.kind.code(),
                self.loc.line,
                self.loc.col,
                f,
                self.msg
            ),
            None => format!(
                "ERROR: CODE {} LINE {} COLUMN {} - {}",
                self.kind.code(),
                self.loc.line,
                self.loc.col,
                self.msg
            ),
        }
    }
}

impl From<std::io::Error> for HawkError {
    fn from(e: std::io::Error) -> Self {
        let kind = match e.kind() {
            std::io::ErrorKind::NotFound => ErrKind::Noent,
            std::io::ErrorKind::PermissionDenied => ErrKind::Perm,
            std::io::ErrorKind::BrokenPipe => ErrKind::Pipe,
            std::io::ErrorKind::WouldBlock => ErrKind::Again,
            std::io::ErrorKind::TimedOut => ErrKind::Tmout,
            std::io::ErrorKind::UnexpectedEof => ErrKind::Eof,
            _ => ErrKind::Ioerr,
        };
        HawkError::bare(kind, e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HawkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(ErrKind::Oomem.code(), 1);
        assert_eq!(ErrKind::Syntax.code(), 10);
        assert_eq!(ErrKind::Stackov.code(), 13);
        assert_eq!(ErrKind::Rfent.code(), 20);
    }

    #[test]
    fn test_report_with_file() {
        let e = HawkError::new(
            ErrKind::Syntax,
            Loc::new(Some("x.hawk".into()), 3, 7),
            "unexpected token",
        );
        assert_eq!(
            e.report(),
            "ERROR: CODE 10 LINE 3 COLUMN 7 FILE x.hawk - unexpected token"
        );
    }

    #[test]
    fn test_report_without_file() {
        let e = HawkError::new(ErrKind::Ioerr, Loc::new(None, 1, 1), "read failed");
        assert_eq!(e.report(), "ERROR: CODE 6 LINE 1 COLUMN 1 - read failed");
    }

    #[test]
    fn test_at_does_not_clobber() {
        let loc = Loc::new(None, 5, 2);
        let e = HawkError::new(ErrKind::Inval, loc.clone(), "bad").at(&Loc::new(None, 9, 9));
        assert_eq!(e.loc, loc);

        let e2 = HawkError::bare(ErrKind::Inval, "bad").at(&loc);
        assert_eq!(e2.loc, loc);
    }

    #[test]
    fn test_recoverable_kinds() {
        assert!(ErrKind::EvalToNum.is_recoverable());
        assert!(!ErrKind::Stackov.is_recoverable());
        assert!(!ErrKind::Oomem.is_recoverable());
    }
}
