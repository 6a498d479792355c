/// Syntax Tree Types
///
/// Token types, AST nodes, and the parsed program structure shared by
/// the lexer, parser, deparser, and runtime.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::Loc;
use crate::opts::{Depths, Traits};
use crate::rex::Rex;

// ─── Tokens ──────────────────────────────────────────────────

/// All token types recognized by the lexer.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenType {
    // Literals
    Int,
    Flt,
    Str,
    Mbs,
    CharLit,
    BchrLit,
    Regex,
    Ident,

    // Keywords
    Begin,
    End,
    BeginFile,
    EndFile,
    Function,
    If,
    Else,
    While,
    Do,
    For,
    In,
    Break,
    Continue,
    Next,
    NextFile,
    NextOFile,
    Exit,
    Return,
    Delete,
    Print,
    Printf,
    Getline,

    // `@`-keywords
    Abort,
    Reset,
    Global,
    Local,
    XNil,
    Pragma,

    // Arithmetic operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,

    // Comparison operators
    Eq,
    Ne,
    TEq, // ===
    TNe, // !==
    Lt,
    Gt,
    Le,
    Ge,

    // Regex match operators
    MatchOp,    // ~
    NotMatchOp, // !~

    // Logical operators
    LAnd, // &&
    LOr,  // ||
    Not,  // !

    // Assignment operators
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
    CaretAssign,

    // Increment / Decrement
    Incr,
    Decr,

    // Ternary
    Question,
    Colon,

    // Punctuation
    Comma,
    Semicolon,
    Newline,

    // Brackets
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,

    // Special
    Dollar,
    Append, // >>
    Pipe,   // |
    RwPipe, // |&
    Amp,    // &
    Eof,
}

/// A single token produced by the lexer.
#[derive(Debug, Clone)]
pub struct Token {
    pub token_type: TokenType,
    pub value: String,
    pub loc: Loc,
}

// ─── Built-in Globals ────────────────────────────────────────

/// Indices of the distinguished global slots. These occupy a fixed
/// prefix of the global table; user globals follow.
pub mod gbl {
    pub const ARGC: usize = 0;
    pub const ARGV: usize = 1;
    pub const CONVFMT: usize = 2;
    pub const ENVIRON: usize = 3;
    pub const FILENAME: usize = 4;
    pub const FNR: usize = 5;
    pub const FS: usize = 6;
    pub const NF: usize = 7;
    pub const NR: usize = 8;
    pub const OFILENAME: usize = 9;
    pub const OFMT: usize = 10;
    pub const OFS: usize = 11;
    pub const ORS: usize = 12;
    pub const RLENGTH: usize = 13;
    pub const RS: usize = 14;
    pub const RSTART: usize = 15;
    pub const RT: usize = 16;
    pub const SUBSEP: usize = 17;

    pub const NAMES: [&str; 18] = [
        "ARGC", "ARGV", "CONVFMT", "ENVIRON", "FILENAME", "FNR", "FS", "NF", "NR", "OFILENAME",
        "OFMT", "OFS", "ORS", "RLENGTH", "RS", "RSTART", "RT", "SUBSEP",
    ];

    /// Look up a built-in global index by name.
    pub fn index_of(name: &str) -> Option<usize> {
        NAMES.iter().position(|n| *n == name)
    }
}

// ─── Operators ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    Ne,
    TEq,
    TNe,
    Lt,
    Gt,
    Le,
    Ge,
    MatchOp,
    NotMatchOp,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Not,
    Neg,
    Pos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncOp {
    Incr,
    Decr,
}

// ─── Variable scope ──────────────────────────────────────────

/// Where a resolved variable reference lives. The parser rewrites every
/// name into one of these at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarScope {
    /// Implicit variable, looked up by name at runtime.
    Named,
    /// Slot in the per-runtime global table.
    Global(usize),
    /// Declared local, indexed within the current call frame.
    Local(usize),
    /// Function parameter, indexed within the current call frame.
    Arg(usize),
}

// ─── Expressions ─────────────────────────────────────────────

/// The input source of a `getline` expression.
#[derive(Debug, Clone)]
pub enum GetlineSrc {
    Console,
    File(Box<Expr>),
    Pipe(Box<Expr>),
    RwPipe(Box<Expr>),
}

/// Expression AST nodes.
#[derive(Debug, Clone)]
pub enum Expr {
    Int(i64),
    Flt(f64),
    Str(String),
    Mbs(Vec<u8>),
    CharLit(char),
    BchrLit(u8),
    Rex(Rc<Rex>),
    XNil,
    Var {
        name: Rc<str>,
        scope: VarScope,
        loc: Loc,
    },
    Indexed {
        name: Rc<str>,
        scope: VarScope,
        index: Vec<Expr>,
        loc: Loc,
    },
    Field {
        index: Box<Expr>,
        loc: Loc,
    },
    Binary {
        op: BinOp,
        l: Box<Expr>,
        r: Box<Expr>,
        loc: Loc,
    },
    Unary {
        op: UnOp,
        e: Box<Expr>,
        loc: Loc,
    },
    IncDec {
        op: IncOp,
        pre: bool,
        target: Box<Expr>,
        loc: Loc,
    },
    Ternary {
        cond: Box<Expr>,
        then: Box<Expr>,
        alt: Box<Expr>,
    },
    Assign {
        op: AssignOp,
        target: Box<Expr>,
        value: Box<Expr>,
        loc: Loc,
    },
    /// A call to a user function, intrinsic, module function, or a
    /// variable holding a function name; resolved in that order at
    /// evaluation time.
    Call {
        name: Rc<str>,
        args: Vec<Expr>,
        loc: Loc,
    },
    In {
        keys: Vec<Expr>,
        name: Rc<str>,
        scope: VarScope,
        loc: Loc,
    },
    Getline {
        var: Option<Box<Expr>>,
        src: GetlineSrc,
        loc: Loc,
    },
    Concat {
        l: Box<Expr>,
        r: Box<Expr>,
    },
    /// A parenthesized expression list with more than one element, e.g.
    /// `(i, j) in a` or `print > (f i)` grouping.
    Group(Vec<Expr>),
}

impl Expr {
    pub fn loc(&self) -> Loc {
        match self {
            Expr::Var { loc, .. }
            | Expr::Indexed { loc, .. }
            | Expr::Field { loc, .. }
            | Expr::Binary { loc, .. }
            | Expr::Unary { loc, .. }
            | Expr::IncDec { loc, .. }
            | Expr::Assign { loc, .. }
            | Expr::Call { loc, .. }
            | Expr::In { loc, .. }
            | Expr::Getline { loc, .. } => loc.clone(),
            Expr::Ternary { cond, .. } => cond.loc(),
            Expr::Concat { l, .. } => l.loc(),
            Expr::Group(es) => es.first().map(|e| e.loc()).unwrap_or_default(),
            _ => Loc::none(),
        }
    }

    /// Whether this expression can be assigned through.
    pub fn is_lvalue(&self) -> bool {
        matches!(
            self,
            Expr::Var { .. } | Expr::Indexed { .. } | Expr::Field { .. }
        )
    }
}

// ─── Statements ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutKind {
    File,   // >
    Append, // >>
    Pipe,   // |
    RwPipe, // |&
}

/// Output redirection of a print/printf statement.
#[derive(Debug, Clone)]
pub struct OutTarget {
    pub kind: OutKind,
    pub dest: Expr,
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub loc: Loc,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Null,
    Expr(Expr),
    Block(Vec<Stmt>),
    If {
        cond: Expr,
        then: Box<Stmt>,
        alt: Option<Box<Stmt>>,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        cond: Expr,
    },
    For {
        init: Option<Expr>,
        cond: Option<Expr>,
        step: Option<Expr>,
        body: Box<Stmt>,
    },
    ForIn {
        var: Box<Expr>,
        array: Box<Expr>,
        body: Box<Stmt>,
    },
    Break,
    Continue,
    Next,
    NextFile,
    NextOFile,
    Return(Option<Expr>),
    Exit(Option<Expr>),
    Abort(Option<Expr>),
    Delete(Expr),
    Reset(Expr),
    Print {
        args: Vec<Expr>,
        out: Option<OutTarget>,
    },
    Printf {
        args: Vec<Expr>,
        out: Option<OutTarget>,
    },
}

// ─── Program Structure ───────────────────────────────────────

/// Pattern of a pattern-action rule.
#[derive(Debug, Clone)]
pub enum Pattern {
    Begin,
    End,
    BeginFile,
    EndFile,
    Expr(Expr),
    Range { start: Expr, end: Expr },
}

/// A single pattern-action rule. `action: None` means the default
/// action (print the record).
#[derive(Debug, Clone)]
pub struct Rule {
    pub pattern: Option<Pattern>,
    pub action: Option<Vec<Stmt>>,
    pub loc: Loc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamMode {
    Value,
    Ref,
}

/// A user-defined function.
#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: Rc<str>,
    pub params: Vec<(Rc<str>, ParamMode)>,
    /// Declared locals, hoisted to the frame after the parameters.
    pub locals: Vec<Rc<str>>,
    pub body: Vec<Stmt>,
    pub loc: Loc,
}

/// A fully parsed program.
#[derive(Debug, Clone)]
pub struct Program {
    /// Global table: built-in prefix first, then user globals in
    /// declaration order.
    pub globals: Vec<Rc<str>>,
    pub functions: IndexMap<String, Rc<FunctionDef>>,
    pub rules: Vec<Rule>,
    /// `@pragma entry` function to invoke instead of the rule loop.
    pub entry: Option<String>,
    /// Traits in effect at the end of the parse.
    pub traits: Traits,
    pub depths: Depths,
}

impl Program {
    pub fn user_global_base() -> usize {
        gbl::NAMES.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_global_indices() {
        assert_eq!(gbl::index_of("ARGC"), Some(gbl::ARGC));
        assert_eq!(gbl::index_of("FS"), Some(gbl::FS));
        assert_eq!(gbl::index_of("SUBSEP"), Some(gbl::SUBSEP));
        assert_eq!(gbl::index_of("nosuch"), None);
        assert_eq!(gbl::NAMES.len(), 18);
    }

    #[test]
    fn test_names_match_indices() {
        assert_eq!(gbl::NAMES[gbl::NF], "NF");
        assert_eq!(gbl::NAMES[gbl::RT], "RT");
        assert_eq!(gbl::NAMES[gbl::OFILENAME], "OFILENAME");
    }

    #[test]
    fn test_lvalue_classification() {
        let v = Expr::Var {
            name: "x".into(),
            scope: VarScope::Named,
            loc: Loc::none(),
        };
        assert!(v.is_lvalue());
        assert!(!Expr::Int(1).is_lvalue());
        let f = Expr::Field {
            index: Box::new(Expr::Int(0)),
            loc: Loc::none(),
        };
        assert!(f.is_lvalue());
    }
}
