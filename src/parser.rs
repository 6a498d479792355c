/// Parser
///
/// Recursive descent over the token stream. Produces the program tree
/// plus the global table (built-in prefix, then user globals) and the
/// function table. Variable names are resolved into
/// Named/Global/Local/Arg references at parse time; `@pragma`
/// directives take effect from their point of declaration.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::{ErrKind, HawkError, Loc, Result};
use crate::lexer::Lexer;
use crate::opts::{Options, Traits};
use crate::rex::Rex;
use crate::rtx::builtins::find_builtin;
use crate::types::{
    gbl, AssignOp, BinOp, Expr, FunctionDef, GetlineSrc, IncOp, OutKind, OutTarget, ParamMode,
    Pattern, Program, Rule, Stmt, StmtKind, Token, TokenType, UnOp, VarScope,
};

// ─── Function scope ──────────────────────────────────────────

struct FnCtx {
    params: Vec<(Rc<str>, ParamMode)>,
    locals: Vec<Rc<str>>,
}

/// A call site remembered for validation once every function
/// definition has been seen.
struct PendingCall {
    name: String,
    argc: usize,
    arg_is_lvalue: Vec<bool>,
    loc: Loc,
}

// ─── Parser ──────────────────────────────────────────────────

pub struct Parser {
    lexer: Lexer,
    cur: Token,
    ahead: Option<Token>,

    traits: Traits,
    depths: crate::opts::Depths,

    globals: Vec<Rc<str>>,
    functions: IndexMap<String, Rc<FunctionDef>>,
    rules: Vec<Rule>,
    entry: Option<String>,

    fn_ctx: Option<FnCtx>,
    pending_calls: Vec<PendingCall>,

    expr_depth: usize,
    block_depth: usize,

    /// `>` terminates the expression (print argument lists).
    no_gt: bool,
    /// `in` is not an operator here (for-loop init clauses).
    no_in: bool,
}

/// Parse a complete program from a named source string.
pub fn parse_source(name: &str, text: &str, opts: &Options) -> Result<Program> {
    let lexer = Lexer::new(name, text, opts.traits, opts.depths.include)
        .with_include_dirs(opts.include_dirs.clone());
    Parser::new(lexer, opts)?.parse()
}

impl Parser {
    pub fn new(lexer: Lexer, opts: &Options) -> Result<Self> {
        let mut p = Parser {
            lexer,
            cur: Token {
                token_type: TokenType::Eof,
                value: String::new(),
                loc: Loc::none(),
            },
            ahead: None,
            traits: opts.traits,
            depths: opts.depths,
            globals: gbl::NAMES.iter().map(|n| Rc::from(*n)).collect(),
            functions: IndexMap::new(),
            rules: Vec::new(),
            entry: None,
            fn_ctx: None,
            pending_calls: Vec::new(),
            expr_depth: 0,
            block_depth: 0,
            no_gt: false,
            no_in: false,
        };
        p.cur = p.next_filtered()?;
        Ok(p)
    }

    // ── Token plumbing ───────────────────────────────────────

    fn next_filtered(&mut self) -> Result<Token> {
        loop {
            let t = self.lexer.next_token()?;
            if t.token_type == TokenType::Newline && !self.traits.has(Traits::NEWLINE) {
                continue;
            }
            return Ok(t);
        }
    }

    fn bump(&mut self) -> Result<Token> {
        let next = match self.ahead.take() {
            Some(t) => t,
            None => self.next_filtered()?,
        };
        Ok(std::mem::replace(&mut self.cur, next))
    }

    fn peek_ahead(&mut self) -> Result<&Token> {
        if self.ahead.is_none() {
            self.ahead = Some(self.next_filtered()?);
        }
        Ok(self.ahead.as_ref().unwrap())
    }

    fn check(&self, tt: TokenType) -> bool {
        self.cur.token_type == tt
    }

    fn accept(&mut self, tt: TokenType) -> Result<bool> {
        if self.check(tt) {
            self.bump()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, tt: TokenType) -> Result<Token> {
        if !self.check(tt.clone()) {
            return Err(self.err(format!(
                "expected {:?}, found {:?} '{}'",
                tt, self.cur.token_type, self.cur.value
            )));
        }
        self.bump()
    }

    fn err(&self, msg: impl Into<String>) -> HawkError {
        HawkError::new(ErrKind::Syntax, self.cur.loc.clone(), msg)
    }

    fn err_at(&self, loc: &Loc, msg: impl Into<String>) -> HawkError {
        HawkError::new(ErrKind::Syntax, loc.clone(), msg)
    }

    fn skip_newlines(&mut self) -> Result<()> {
        while self.check(TokenType::Newline) {
            self.bump()?;
        }
        Ok(())
    }

    fn skip_terminators(&mut self) -> Result<()> {
        while self.check(TokenType::Newline) || self.check(TokenType::Semicolon) {
            self.bump()?;
        }
        Ok(())
    }

    fn at_statement_end(&self) -> bool {
        matches!(
            self.cur.token_type,
            TokenType::Newline | TokenType::Semicolon | TokenType::RBrace | TokenType::Eof
        )
    }

    // ── Name resolution ──────────────────────────────────────

    fn resolve_name(&self, name: &str, loc: &Loc) -> Result<(Rc<str>, VarScope)> {
        if let Some(f) = &self.fn_ctx {
            if let Some(i) = f.params.iter().position(|(p, _)| &**p == name) {
                return Ok((f.params[i].0.clone(), VarScope::Arg(i)));
            }
            if let Some(i) = f.locals.iter().position(|l| &**l == name) {
                return Ok((f.locals[i].clone(), VarScope::Local(i)));
            }
        }
        if let Some(i) = self.globals.iter().position(|g| &**g == name) {
            return Ok((self.globals[i].clone(), VarScope::Global(i)));
        }
        if name.contains("::") {
            return Err(self.err_at(loc, format!("module symbol {} is not a variable", name)));
        }
        if self.traits.has(Traits::STRICTNAMING) && self.functions.contains_key(name) {
            return Err(self.err_at(loc, format!("function name {} used as a variable", name)));
        }
        if self.traits.has(Traits::IMPLICIT) {
            Ok((Rc::from(name), VarScope::Named))
        } else {
            Err(self.err_at(loc, format!("undeclared variable {}", name)))
        }
    }

    // ── Program ──────────────────────────────────────────────

    pub fn parse(mut self) -> Result<Program> {
        self.skip_terminators()?;

        while !self.check(TokenType::Eof) {
            match self.cur.token_type {
                TokenType::Pragma => self.parse_pragma()?,
                TokenType::Global => self.parse_global_decl()?,
                TokenType::Function => self.parse_function()?,
                _ => {
                    if !self.traits.has(Traits::PABLOCK) {
                        return Err(self.err("pattern-action blocks are disabled"));
                    }
                    let rule = self.parse_rule()?;
                    self.rules.push(rule);
                }
            }
            self.skip_terminators()?;
        }

        self.validate_calls()?;

        if let Some(entry) = &self.entry {
            if !self.functions.contains_key(entry) {
                return Err(HawkError::bare(
                    ErrKind::Noent,
                    format!("entry function {} is not defined", entry),
                ));
            }
        }

        Ok(Program {
            globals: self.globals,
            functions: self.functions,
            rules: self.rules,
            entry: self.entry,
            traits: self.traits,
            depths: self.depths,
        })
    }

    fn validate_calls(&self) -> Result<()> {
        for call in &self.pending_calls {
            if let Some(f) = self.functions.get(&call.name) {
                if call.argc > f.params.len() {
                    return Err(self.err_at(
                        &call.loc,
                        format!(
                            "{} takes at most {} arguments, {} given",
                            call.name,
                            f.params.len(),
                            call.argc
                        ),
                    ));
                }
                for (i, (pname, mode)) in f.params.iter().enumerate().take(call.argc) {
                    if *mode == ParamMode::Ref && !call.arg_is_lvalue[i] {
                        return Err(self.err_at(
                            &call.loc,
                            format!("argument {} to {} (&{}) must be assignable", i + 1, call.name, pname),
                        ));
                    }
                }
            } else if let Some(spec) = find_builtin(&call.name) {
                if call.argc < spec.min_args || call.argc > spec.max_args {
                    return Err(self.err_at(
                        &call.loc,
                        format!("wrong number of arguments to {}", call.name),
                    ));
                }
                for (i, mode) in spec.arg_spec.bytes().enumerate().take(call.argc) {
                    if mode == b'r' && !call.arg_is_lvalue[i] {
                        return Err(self.err_at(
                            &call.loc,
                            format!("argument {} to {} must be assignable", i + 1, call.name),
                        ));
                    }
                }
            }
            // Module functions and indirect calls resolve at runtime.
        }
        Ok(())
    }

    // ── Pragmas and declarations ─────────────────────────────

    fn parse_pragma(&mut self) -> Result<()> {
        let at = self.expect(TokenType::Pragma)?.loc;
        let name = self.expect(TokenType::Ident)?.value;

        match name.as_str() {
            "entry" => {
                let f = self.expect(TokenType::Ident)?.value;
                self.entry = Some(f);
            }
            "include_depth" => {
                let v = self.expect(TokenType::Int)?.value;
                let n = v.parse::<usize>().map_err(|_| {
                    self.err_at(&at, format!("bad include_depth value {}", v))
                })?;
                self.depths.include = n;
                self.lexer.set_include_limit(n);
            }
            other => match Traits::by_name(other) {
                Some(flag) => {
                    let v = self.expect(TokenType::Ident)?.value;
                    let on = match v.as_str() {
                        "on" => true,
                        "off" => false,
                        _ => return Err(self.err_at(&at, format!("@pragma {} takes on/off", other))),
                    };
                    self.traits.set(flag, on);
                    self.lexer.set_traits(self.traits);
                }
                None => return Err(self.err_at(&at, format!("unknown pragma {}", other))),
            },
        }

        if !self.at_statement_end() {
            return Err(self.err("trailing tokens after @pragma"));
        }
        Ok(())
    }

    fn parse_global_decl(&mut self) -> Result<()> {
        let at = self.expect(TokenType::Global)?.loc;
        if self.fn_ctx.is_some() {
            return Err(self.err_at(&at, "@global is not allowed inside a function"));
        }
        loop {
            let tok = self.expect(TokenType::Ident)?;
            if self.globals.iter().any(|g| **g == tok.value) {
                return Err(HawkError::new(
                    ErrKind::Exist,
                    tok.loc,
                    format!("duplicate global {}", tok.value),
                ));
            }
            if self.functions.contains_key(&tok.value) {
                return Err(HawkError::new(
                    ErrKind::Exist,
                    tok.loc,
                    format!("{} is already a function name", tok.value),
                ));
            }
            self.globals.push(Rc::from(tok.value.as_str()));
            if !self.accept(TokenType::Comma)? {
                break;
            }
        }
        Ok(())
    }

    fn parse_local_decl(&mut self) -> Result<()> {
        let at = self.expect(TokenType::Local)?.loc;
        if self.fn_ctx.is_none() {
            return Err(self.err_at(&at, "@local is only allowed inside a function"));
        }
        loop {
            let tok = self.expect(TokenType::Ident)?;
            let f = self.fn_ctx.as_mut().unwrap();
            if f.params.iter().any(|(p, _)| **p == tok.value)
                || f.locals.iter().any(|l| **l == tok.value)
            {
                return Err(HawkError::new(
                    ErrKind::Exist,
                    tok.loc,
                    format!("duplicate local {}", tok.value),
                ));
            }
            f.locals.push(Rc::from(tok.value.as_str()));
            if !self.accept(TokenType::Comma)? {
                break;
            }
        }
        Ok(())
    }

    fn parse_function(&mut self) -> Result<()> {
        let at = self.expect(TokenType::Function)?.loc;
        let name_tok = self.expect(TokenType::Ident)?;
        let name = name_tok.value;

        if self.functions.contains_key(&name) {
            return Err(HawkError::new(
                ErrKind::Exist,
                name_tok.loc,
                format!("function {} is already defined", name),
            ));
        }
        if self.globals.iter().any(|g| **g == name) {
            return Err(HawkError::new(
                ErrKind::Exist,
                name_tok.loc,
                format!("{} is already a variable name", name),
            ));
        }
        if find_builtin(&name).is_some() {
            return Err(HawkError::new(
                ErrKind::Exist,
                name_tok.loc,
                format!("{} is a built-in function", name),
            ));
        }

        self.expect(TokenType::LParen)?;
        let mut params: Vec<(Rc<str>, ParamMode)> = Vec::new();
        if !self.check(TokenType::RParen) {
            loop {
                let mode = if self.accept(TokenType::Amp)? {
                    ParamMode::Ref
                } else {
                    ParamMode::Value
                };
                let p = self.expect(TokenType::Ident)?;
                if params.iter().any(|(n, _)| **n == p.value) {
                    return Err(HawkError::new(
                        ErrKind::Exist,
                        p.loc,
                        format!("duplicate parameter {}", p.value),
                    ));
                }
                params.push((Rc::from(p.value.as_str()), mode));
                if !self.accept(TokenType::Comma)? {
                    break;
                }
                self.skip_newlines()?;
            }
        }
        self.expect(TokenType::RParen)?;
        self.skip_newlines()?;

        self.fn_ctx = Some(FnCtx {
            params,
            locals: Vec::new(),
        });

        let body = self.parse_block_stmts()?;

        let ctx = self.fn_ctx.take().unwrap();
        let def = FunctionDef {
            name: Rc::from(name.as_str()),
            params: ctx.params,
            locals: ctx.locals,
            body,
            loc: at,
        };
        self.functions.insert(name, Rc::new(def));
        Ok(())
    }

    // ── Rules ────────────────────────────────────────────────

    fn parse_rule(&mut self) -> Result<Rule> {
        let loc = self.cur.loc.clone();

        // A bare statement at the top level runs once up front, as if
        // wrapped in a leading block.
        if matches!(
            self.cur.token_type,
            TokenType::Print
                | TokenType::Printf
                | TokenType::If
                | TokenType::While
                | TokenType::Do
                | TokenType::For
                | TokenType::Delete
                | TokenType::Reset
                | TokenType::Exit
                | TokenType::Abort
        ) {
            let stmt = self.parse_statement()?;
            return Ok(Rule {
                pattern: Some(Pattern::Begin),
                action: Some(vec![stmt]),
                loc,
            });
        }

        let pattern = match self.cur.token_type {
            TokenType::Begin => {
                self.bump()?;
                Some(Pattern::Begin)
            }
            TokenType::End => {
                self.bump()?;
                Some(Pattern::End)
            }
            TokenType::BeginFile => {
                self.bump()?;
                Some(Pattern::BeginFile)
            }
            TokenType::EndFile => {
                self.bump()?;
                Some(Pattern::EndFile)
            }
            TokenType::LBrace => None,
            _ => {
                let start = self.parse_expression()?;
                if self.accept(TokenType::Comma)? {
                    self.skip_newlines()?;
                    let end = self.parse_expression()?;
                    Some(Pattern::Range { start, end })
                } else {
                    Some(Pattern::Expr(start))
                }
            }
        };

        let special = matches!(
            pattern,
            Some(Pattern::Begin)
                | Some(Pattern::End)
                | Some(Pattern::BeginFile)
                | Some(Pattern::EndFile)
        );
        if special {
            self.skip_newlines()?;
        }

        let action = if self.check(TokenType::LBrace) {
            Some(self.parse_block_stmts()?)
        } else if special {
            return Err(self.err("special pattern requires an action block"));
        } else {
            // Default action: print the record.
            None
        };

        Ok(Rule { pattern, action, loc })
    }

    // ── Statements ───────────────────────────────────────────

    fn parse_block_stmts(&mut self) -> Result<Vec<Stmt>> {
        self.block_depth += 1;
        if self.block_depth > self.depths.block_parse {
            self.block_depth -= 1;
            return Err(HawkError::new(
                ErrKind::Stackov,
                self.cur.loc.clone(),
                "block nesting too deep",
            ));
        }

        let r = self.parse_block_stmts_inner();
        self.block_depth -= 1;
        r
    }

    fn parse_block_stmts_inner(&mut self) -> Result<Vec<Stmt>> {
        self.expect(TokenType::LBrace)?;
        self.skip_terminators()?;

        let mut stmts = Vec::new();
        while !self.check(TokenType::RBrace) && !self.check(TokenType::Eof) {
            if self.check(TokenType::Local) {
                self.parse_local_decl()?;
            } else {
                stmts.push(self.parse_statement()?);
            }
            self.skip_terminators()?;
        }
        self.expect(TokenType::RBrace)?;
        Ok(stmts)
    }

    fn parse_statement(&mut self) -> Result<Stmt> {
        let loc = self.cur.loc.clone();
        let kind = match self.cur.token_type {
            TokenType::Semicolon => {
                self.bump()?;
                StmtKind::Null
            }
            TokenType::LBrace => StmtKind::Block(self.parse_block_stmts()?),
            TokenType::If => self.parse_if()?,
            TokenType::While => self.parse_while()?,
            TokenType::Do => self.parse_do_while()?,
            TokenType::For => self.parse_for()?,
            TokenType::Break => {
                self.bump()?;
                StmtKind::Break
            }
            TokenType::Continue => {
                self.bump()?;
                StmtKind::Continue
            }
            TokenType::Next => {
                self.bump()?;
                StmtKind::Next
            }
            TokenType::NextFile => {
                self.bump()?;
                StmtKind::NextFile
            }
            TokenType::NextOFile => {
                if !self.traits.has(Traits::NEXTOFILE) {
                    return Err(self.err("nextofile is disabled"));
                }
                self.bump()?;
                StmtKind::NextOFile
            }
            TokenType::Exit => {
                self.bump()?;
                let v = if self.at_statement_end() {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                StmtKind::Exit(v)
            }
            TokenType::Abort => {
                self.bump()?;
                let v = if self.at_statement_end() {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                StmtKind::Abort(v)
            }
            TokenType::Return => {
                if self.fn_ctx.is_none() {
                    return Err(self.err("return outside a function"));
                }
                self.bump()?;
                let v = if self.at_statement_end() {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                StmtKind::Return(v)
            }
            TokenType::Delete => {
                self.bump()?;
                let target = self.parse_del_target()?;
                StmtKind::Delete(target)
            }
            TokenType::Reset => {
                self.bump()?;
                let target = self.parse_del_target()?;
                StmtKind::Reset(target)
            }
            TokenType::Print => {
                if !self.traits.has(Traits::RIO) {
                    return Err(self.err("built-in I/O is disabled"));
                }
                self.bump()?;
                let (args, out) = self.parse_print_tail()?;
                StmtKind::Print { args, out }
            }
            TokenType::Printf => {
                if !self.traits.has(Traits::RIO) {
                    return Err(self.err("built-in I/O is disabled"));
                }
                self.bump()?;
                let (args, out) = self.parse_print_tail()?;
                if args.is_empty() {
                    return Err(self.err("printf requires a format argument"));
                }
                StmtKind::Printf { args, out }
            }
            _ => StmtKind::Expr(self.parse_expression()?),
        };
        Ok(Stmt { kind, loc })
    }

    fn parse_del_target(&mut self) -> Result<Expr> {
        let tok = self.expect(TokenType::Ident)?;
        let (name, scope) = self.resolve_name(&tok.value, &tok.loc)?;
        if self.accept(TokenType::LBracket)? {
            let index = self.parse_index_list()?;
            Ok(Expr::Indexed { name, scope, index, loc: tok.loc })
        } else {
            Ok(Expr::Var { name, scope, loc: tok.loc })
        }
    }

    fn parse_if(&mut self) -> Result<StmtKind> {
        self.expect(TokenType::If)?;
        self.expect(TokenType::LParen)?;
        let cond = self.parse_expression()?;
        self.expect(TokenType::RParen)?;
        self.skip_newlines()?;
        let then = Box::new(self.parse_statement()?);

        // `else` may sit on its own line.
        let mut alt = None;
        if self.check(TokenType::Else) || self.lookahead_else()? {
            self.skip_terminators()?;
            self.expect(TokenType::Else)?;
            self.skip_newlines()?;
            alt = Some(Box::new(self.parse_statement()?));
        }
        Ok(StmtKind::If { cond, then, alt })
    }

    /// Whether an `else` follows after terminators, without consuming
    /// anything when it does not.
    fn lookahead_else(&mut self) -> Result<bool> {
        if !(self.check(TokenType::Newline) || self.check(TokenType::Semicolon)) {
            return Ok(false);
        }
        Ok(self.peek_past_terminators()? == TokenType::Else)
    }

    fn peek_past_terminators(&mut self) -> Result<TokenType> {
        // Only a single token of lookahead is kept, so consume the
        // terminator run when the next interesting token is close.
        while self.check(TokenType::Newline) || self.check(TokenType::Semicolon) {
            let next = self.peek_ahead()?.token_type.clone();
            if next == TokenType::Newline || next == TokenType::Semicolon {
                self.bump()?;
                continue;
            }
            return Ok(next);
        }
        Ok(self.cur.token_type.clone())
    }

    fn parse_while(&mut self) -> Result<StmtKind> {
        self.expect(TokenType::While)?;
        self.expect(TokenType::LParen)?;
        let cond = self.parse_expression()?;
        self.expect(TokenType::RParen)?;
        self.skip_newlines()?;
        let body = Box::new(self.parse_statement()?);
        Ok(StmtKind::While { cond, body })
    }

    fn parse_do_while(&mut self) -> Result<StmtKind> {
        self.expect(TokenType::Do)?;
        self.skip_newlines()?;
        let body = Box::new(self.parse_statement()?);
        self.skip_terminators()?;
        self.expect(TokenType::While)?;
        self.expect(TokenType::LParen)?;
        let cond = self.parse_expression()?;
        self.expect(TokenType::RParen)?;
        Ok(StmtKind::DoWhile { body, cond })
    }

    fn parse_for(&mut self) -> Result<StmtKind> {
        self.expect(TokenType::For)?;
        self.expect(TokenType::LParen)?;

        // for (var in array)
        if self.check(TokenType::Ident) && self.peek_ahead()?.token_type == TokenType::In {
            let tok = self.bump()?;
            let (name, scope) = self.resolve_name(&tok.value, &tok.loc)?;
            let var = Expr::Var { name, scope, loc: tok.loc };
            self.expect(TokenType::In)?;
            let arr_tok = self.expect(TokenType::Ident)?;
            let (aname, ascope) = self.resolve_name(&arr_tok.value, &arr_tok.loc)?;
            let array = Expr::Var { name: aname, scope: ascope, loc: arr_tok.loc };
            self.expect(TokenType::RParen)?;
            self.skip_newlines()?;
            let body = Box::new(self.parse_statement()?);
            return Ok(StmtKind::ForIn {
                var: Box::new(var),
                array: Box::new(array),
                body,
            });
        }

        let init = if self.check(TokenType::Semicolon) {
            None
        } else {
            let saved = self.no_in;
            self.no_in = true;
            let e = self.parse_expression();
            self.no_in = saved;
            Some(e?)
        };
        self.expect(TokenType::Semicolon)?;

        let cond = if self.check(TokenType::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(TokenType::Semicolon)?;

        let step = if self.check(TokenType::RParen) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(TokenType::RParen)?;
        self.skip_newlines()?;
        let body = Box::new(self.parse_statement()?);

        Ok(StmtKind::For { init, cond, step, body })
    }

    fn parse_print_tail(&mut self) -> Result<(Vec<Expr>, Option<OutTarget>)> {
        let mut args = Vec::new();

        if !self.at_statement_end()
            && !matches!(
                self.cur.token_type,
                TokenType::Gt | TokenType::Append | TokenType::Pipe | TokenType::RwPipe
            )
        {
            let saved = self.no_gt;
            self.no_gt = true;
            let r = (|| -> Result<()> {
                args.push(self.parse_expression()?);
                while self.accept(TokenType::Comma)? {
                    self.skip_newlines()?;
                    args.push(self.parse_expression()?);
                }
                Ok(())
            })();
            self.no_gt = saved;
            r?;

            // `print (a, b)` prints the grouped list.
            if args.len() == 1 {
                if let Expr::Group(es) = &args[0] {
                    args = es.clone();
                }
            }
        }

        let out = match self.cur.token_type {
            TokenType::Gt => {
                self.bump()?;
                Some(OutTarget { kind: OutKind::File, dest: self.parse_concat()? })
            }
            TokenType::Append => {
                self.bump()?;
                Some(OutTarget { kind: OutKind::Append, dest: self.parse_concat()? })
            }
            TokenType::Pipe => {
                self.bump()?;
                Some(OutTarget { kind: OutKind::Pipe, dest: self.parse_concat()? })
            }
            TokenType::RwPipe => {
                if !self.traits.has(Traits::RWPIPE) {
                    return Err(self.err("|& is disabled"));
                }
                self.bump()?;
                Some(OutTarget { kind: OutKind::RwPipe, dest: self.parse_concat()? })
            }
            _ => None,
        };

        Ok((args, out))
    }

    fn parse_index_list(&mut self) -> Result<Vec<Expr>> {
        let mut index = vec![self.parse_expression()?];
        while self.accept(TokenType::Comma)? {
            index.push(self.parse_expression()?);
        }
        self.expect(TokenType::RBracket)?;
        Ok(index)
    }

    // ── Expressions ──────────────────────────────────────────

    fn parse_expression(&mut self) -> Result<Expr> {
        self.expr_depth += 1;
        if self.expr_depth > self.depths.expr_parse {
            self.expr_depth -= 1;
            return Err(HawkError::new(
                ErrKind::Stackov,
                self.cur.loc.clone(),
                "expression nesting too deep",
            ));
        }
        let r = self.parse_assignment();
        self.expr_depth -= 1;
        r
    }

    fn parse_assignment(&mut self) -> Result<Expr> {
        let lhs = self.parse_ternary()?;

        let op = match self.cur.token_type {
            TokenType::Assign => AssignOp::Set,
            TokenType::PlusAssign => AssignOp::Add,
            TokenType::MinusAssign => AssignOp::Sub,
            TokenType::StarAssign => AssignOp::Mul,
            TokenType::SlashAssign => AssignOp::Div,
            TokenType::PercentAssign => AssignOp::Mod,
            TokenType::CaretAssign => AssignOp::Pow,
            _ => return Ok(lhs),
        };

        if !lhs.is_lvalue() {
            return Err(self.err("assignment target is not assignable"));
        }
        let loc = self.bump()?.loc;
        self.skip_newlines()?;
        let value = Box::new(self.parse_expression()?);
        Ok(Expr::Assign { op, target: Box::new(lhs), value, loc })
    }

    fn parse_ternary(&mut self) -> Result<Expr> {
        let cond = self.parse_or()?;
        if self.accept(TokenType::Question)? {
            self.skip_newlines()?;
            let then = Box::new(self.parse_assignment()?);
            self.skip_newlines()?;
            self.expect(TokenType::Colon)?;
            self.skip_newlines()?;
            let alt = Box::new(self.parse_assignment()?);
            return Ok(Expr::Ternary { cond: Box::new(cond), then, alt });
        }
        Ok(cond)
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut l = self.parse_and()?;
        while self.check(TokenType::LOr) {
            let loc = self.bump()?.loc;
            self.skip_newlines()?;
            let r = self.parse_and()?;
            l = Expr::Binary { op: BinOp::Or, l: Box::new(l), r: Box::new(r), loc };
        }
        Ok(l)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut l = self.parse_in()?;
        while self.check(TokenType::LAnd) {
            let loc = self.bump()?.loc;
            self.skip_newlines()?;
            let r = self.parse_in()?;
            l = Expr::Binary { op: BinOp::And, l: Box::new(l), r: Box::new(r), loc };
        }
        Ok(l)
    }

    fn parse_in(&mut self) -> Result<Expr> {
        let mut l = self.parse_match()?;
        while !self.no_in && self.check(TokenType::In) {
            let loc = self.bump()?.loc;
            let arr = self.expect(TokenType::Ident)?;
            let (name, scope) = self.resolve_name(&arr.value, &arr.loc)?;
            let keys = match l {
                Expr::Group(es) => es,
                single => vec![single],
            };
            l = Expr::In { keys, name, scope, loc };
        }
        Ok(l)
    }

    fn parse_match(&mut self) -> Result<Expr> {
        let mut l = self.parse_rel()?;
        loop {
            let op = match self.cur.token_type {
                TokenType::MatchOp => BinOp::MatchOp,
                TokenType::NotMatchOp => BinOp::NotMatchOp,
                _ => break,
            };
            let loc = self.bump()?.loc;
            let r = self.parse_rel()?;
            l = Expr::Binary { op, l: Box::new(l), r: Box::new(r), loc };
        }
        Ok(l)
    }

    fn parse_rel(&mut self) -> Result<Expr> {
        let mut l = self.parse_concat()?;

        // `expr | getline [var]` and `expr |& getline [var]`
        loop {
            let rw = match self.cur.token_type {
                TokenType::Pipe => false,
                TokenType::RwPipe => true,
                _ => break,
            };
            if self.peek_ahead()?.token_type != TokenType::Getline {
                break;
            }
            if rw && !self.traits.has(Traits::RWPIPE) {
                return Err(self.err("|& is disabled"));
            }
            if !self.traits.has(Traits::RIO) {
                return Err(self.err("built-in I/O is disabled"));
            }
            self.bump()?; // pipe
            let loc = self.bump()?.loc; // getline
            let var = self.parse_getline_var()?;
            let src = if rw {
                GetlineSrc::RwPipe(Box::new(l))
            } else {
                GetlineSrc::Pipe(Box::new(l))
            };
            l = Expr::Getline { var, src, loc };
        }

        let op = match self.cur.token_type {
            TokenType::Lt => BinOp::Lt,
            TokenType::Le => BinOp::Le,
            TokenType::Gt if !self.no_gt => BinOp::Gt,
            TokenType::Ge => BinOp::Ge,
            TokenType::Eq => BinOp::Eq,
            TokenType::Ne => BinOp::Ne,
            TokenType::TEq => BinOp::TEq,
            TokenType::TNe => BinOp::TNe,
            _ => return Ok(l),
        };
        let loc = self.bump()?.loc;
        let r = self.parse_concat()?;
        Ok(Expr::Binary { op, l: Box::new(l), r: Box::new(r), loc })
    }

    /// Whether the current token can begin a concatenation operand.
    fn starts_concat_operand(&self) -> bool {
        matches!(
            self.cur.token_type,
            TokenType::Int
                | TokenType::Flt
                | TokenType::Str
                | TokenType::Mbs
                | TokenType::CharLit
                | TokenType::BchrLit
                | TokenType::Ident
                | TokenType::Dollar
                | TokenType::Not
                | TokenType::LParen
                | TokenType::Incr
                | TokenType::Decr
                | TokenType::XNil
        )
    }

    fn parse_concat(&mut self) -> Result<Expr> {
        let mut l = self.parse_additive()?;
        while self.traits.has(Traits::BLANKCONCAT) && self.starts_concat_operand() {
            let r = self.parse_additive()?;
            l = Expr::Concat { l: Box::new(l), r: Box::new(r) };
        }
        Ok(l)
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut l = self.parse_multiplicative()?;
        loop {
            let op = match self.cur.token_type {
                TokenType::Plus => BinOp::Add,
                TokenType::Minus => BinOp::Sub,
                _ => break,
            };
            let loc = self.bump()?.loc;
            let r = self.parse_multiplicative()?;
            l = Expr::Binary { op, l: Box::new(l), r: Box::new(r), loc };
        }
        Ok(l)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut l = self.parse_unary()?;
        loop {
            let op = match self.cur.token_type {
                TokenType::Star => BinOp::Mul,
                TokenType::Slash => BinOp::Div,
                TokenType::Percent => BinOp::Mod,
                _ => break,
            };
            let loc = self.bump()?.loc;
            let r = self.parse_unary()?;
            l = Expr::Binary { op, l: Box::new(l), r: Box::new(r), loc };
        }
        Ok(l)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        self.expr_depth += 1;
        if self.expr_depth > self.depths.expr_parse {
            self.expr_depth -= 1;
            return Err(HawkError::new(
                ErrKind::Stackov,
                self.cur.loc.clone(),
                "expression nesting too deep",
            ));
        }
        let r = self.parse_unary_inner();
        self.expr_depth -= 1;
        r
    }

    fn parse_unary_inner(&mut self) -> Result<Expr> {
        let op = match self.cur.token_type {
            TokenType::Not => Some(UnOp::Not),
            TokenType::Minus => Some(UnOp::Neg),
            TokenType::Plus => Some(UnOp::Pos),
            _ => None,
        };
        if let Some(op) = op {
            let loc = self.bump()?.loc;
            let e = Box::new(self.parse_unary()?);
            return Ok(Expr::Unary { op, e, loc });
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Expr> {
        let base = self.parse_postfix()?;
        if self.check(TokenType::Caret) {
            let loc = self.bump()?.loc;
            // Right-associative; unary minus binds tighter on the right.
            let r = self.parse_unary()?;
            return Ok(Expr::Binary {
                op: BinOp::Pow,
                l: Box::new(base),
                r: Box::new(r),
                loc,
            });
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let e = self.parse_primary()?;
        match self.cur.token_type {
            TokenType::Incr | TokenType::Decr if e.is_lvalue() => {
                let op = if self.check(TokenType::Incr) { IncOp::Incr } else { IncOp::Decr };
                let loc = self.bump()?.loc;
                Ok(Expr::IncDec { op, pre: false, target: Box::new(e), loc })
            }
            _ => Ok(e),
        }
    }

    fn parse_getline_var(&mut self) -> Result<Option<Box<Expr>>> {
        if matches!(self.cur.token_type, TokenType::Ident | TokenType::Dollar) {
            let v = self.parse_primary()?;
            if !v.is_lvalue() {
                return Err(self.err("getline target is not assignable"));
            }
            Ok(Some(Box::new(v)))
        } else {
            Ok(None)
        }
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let loc = self.cur.loc.clone();

        match self.cur.token_type.clone() {
            TokenType::Int => {
                let t = self.bump()?;
                let n = parse_int_literal(&t.value)
                    .ok_or_else(|| self.err_at(&t.loc, format!("bad integer literal {}", t.value)))?;
                Ok(Expr::Int(n))
            }
            TokenType::Flt => {
                let t = self.bump()?;
                let f = t.value.parse::<f64>().map_err(|_| {
                    self.err_at(&t.loc, format!("bad floating-point literal {}", t.value))
                })?;
                Ok(Expr::Flt(f))
            }
            TokenType::Str => {
                let t = self.bump()?;
                Ok(Expr::Str(t.value))
            }
            TokenType::Mbs => {
                let t = self.bump()?;
                let bytes: Vec<u8> = t.value.chars().map(|c| (c as u32) as u8).collect();
                Ok(Expr::Mbs(bytes))
            }
            TokenType::CharLit => {
                let t = self.bump()?;
                Ok(Expr::CharLit(t.value.chars().next().unwrap_or('\0')))
            }
            TokenType::BchrLit => {
                let t = self.bump()?;
                Ok(Expr::BchrLit(t.value.chars().next().unwrap_or('\0') as u8))
            }
            TokenType::Regex => {
                let t = self.bump()?;
                Ok(Expr::Rex(Rc::new(Rex::new(
                    &t.value,
                    self.traits.has(Traits::REXBOUND),
                ))))
            }
            TokenType::XNil => {
                self.bump()?;
                Ok(Expr::XNil)
            }
            TokenType::Dollar => {
                self.bump()?;
                let index = Box::new(self.parse_primary()?);
                Ok(Expr::Field { index, loc })
            }
            TokenType::Incr | TokenType::Decr => {
                let op = if self.check(TokenType::Incr) { IncOp::Incr } else { IncOp::Decr };
                self.bump()?;
                let target = self.parse_primary()?;
                if !target.is_lvalue() {
                    return Err(self.err_at(&loc, "increment target is not assignable"));
                }
                Ok(Expr::IncDec { op, pre: true, target: Box::new(target), loc })
            }
            TokenType::LParen => {
                self.bump()?;
                self.skip_newlines()?;
                let mut es = vec![self.parse_expression()?];
                while self.accept(TokenType::Comma)? {
                    self.skip_newlines()?;
                    es.push(self.parse_expression()?);
                }
                self.skip_newlines()?;
                self.expect(TokenType::RParen)?;
                if es.len() == 1 {
                    Ok(es.pop().unwrap())
                } else {
                    Ok(Expr::Group(es))
                }
            }
            TokenType::Getline => {
                if !self.traits.has(Traits::RIO) {
                    return Err(self.err("built-in I/O is disabled"));
                }
                self.bump()?;
                let var = self.parse_getline_var()?;
                let src = if self.accept(TokenType::Lt)? {
                    GetlineSrc::File(Box::new(self.parse_concat()?))
                } else {
                    GetlineSrc::Console
                };
                Ok(Expr::Getline { var, src, loc })
            }
            TokenType::Ident => {
                let t = self.bump()?;
                let name = t.value;

                if self.check(TokenType::LParen) {
                    return self.parse_call(name, t.loc);
                }
                if self.check(TokenType::LBracket) {
                    let (rname, scope) = self.resolve_name(&name, &t.loc)?;
                    self.bump()?;
                    let index = self.parse_index_list()?;
                    return Ok(Expr::Indexed { name: rname, scope, index, loc: t.loc });
                }
                if let Some(spec) = find_builtin(&name) {
                    // Only `length` may appear without parentheses.
                    if spec.name == "length" {
                        return Ok(Expr::Call { name: Rc::from("length"), args: vec![], loc: t.loc });
                    }
                    return Err(self.err_at(&t.loc, format!("{} is a built-in function", name)));
                }
                let (rname, scope) = self.resolve_name(&name, &t.loc)?;
                Ok(Expr::Var { name: rname, scope, loc: t.loc })
            }
            other => Err(self.err(format!("unexpected token {:?} '{}'", other, self.cur.value))),
        }
    }

    fn parse_call(&mut self, name: String, loc: Loc) -> Result<Expr> {
        self.expect(TokenType::LParen)?;
        self.skip_newlines()?;

        let mut args = Vec::new();
        if !self.check(TokenType::RParen) {
            args.push(self.parse_expression()?);
            while self.accept(TokenType::Comma)? {
                self.skip_newlines()?;
                args.push(self.parse_expression()?);
            }
            self.skip_newlines()?;
        }
        self.expect(TokenType::RParen)?;

        self.pending_calls.push(PendingCall {
            name: name.clone(),
            argc: args.len(),
            arg_is_lvalue: args.iter().map(|a| a.is_lvalue()).collect(),
            loc: loc.clone(),
        });

        Ok(Expr::Call { name: Rc::from(name.as_str()), args, loc })
    }
}

/// Parse an integer literal in decimal, hex (`0x`), or binary (`0b`).
fn parse_int_literal(text: &str) -> Option<i64> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).ok();
    }
    if let Some(bin) = text.strip_prefix("0b").or_else(|| text.strip_prefix("0B")) {
        return i64::from_str_radix(bin, 2).ok();
    }
    text.parse::<i64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opts::Options;

    fn parse(text: &str) -> Result<Program> {
        parse_source("(test)", text, &Options::default())
    }

    fn parse_ok(text: &str) -> Program {
        parse(text).expect("program should parse")
    }

    #[test]
    fn test_empty_program() {
        let p = parse_ok("");
        assert!(p.rules.is_empty());
        assert!(p.functions.is_empty());
        assert_eq!(p.globals.len(), gbl::NAMES.len());
    }

    #[test]
    fn test_begin_rule() {
        let p = parse_ok("BEGIN { print \"hi\" }");
        assert_eq!(p.rules.len(), 1);
        assert!(matches!(p.rules[0].pattern, Some(Pattern::Begin)));
        assert!(p.rules[0].action.is_some());
    }

    #[test]
    fn test_beginfile_endfile() {
        let p = parse_ok("BEGINFILE { n = 0 } ENDFILE { print n }");
        assert!(matches!(p.rules[0].pattern, Some(Pattern::BeginFile)));
        assert!(matches!(p.rules[1].pattern, Some(Pattern::EndFile)));
    }

    #[test]
    fn test_begin_requires_block() {
        assert!(parse("BEGIN").is_err());
    }

    #[test]
    fn test_pattern_without_action() {
        let p = parse_ok("/error/");
        assert!(p.rules[0].action.is_none());
        assert!(matches!(p.rules[0].pattern, Some(Pattern::Expr(Expr::Rex(_)))));
    }

    #[test]
    fn test_action_without_pattern() {
        let p = parse_ok("{ print $1 }");
        assert!(p.rules[0].pattern.is_none());
    }

    #[test]
    fn test_range_pattern() {
        let p = parse_ok("/start/, /stop/ { print }");
        assert!(matches!(p.rules[0].pattern, Some(Pattern::Range { .. })));
    }

    #[test]
    fn test_builtin_global_resolution() {
        let p = parse_ok("{ NR }");
        let action = p.rules[0].action.as_ref().unwrap();
        match &action[0].kind {
            StmtKind::Expr(Expr::Var { scope, .. }) => {
                assert_eq!(*scope, VarScope::Global(gbl::NR));
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_user_global_declaration() {
        let p = parse_ok("@global counter; BEGIN { counter = 1 }");
        assert_eq!(p.globals.len(), gbl::NAMES.len() + 1);
        let action = p.rules[0].action.as_ref().unwrap();
        match &action[0].kind {
            StmtKind::Expr(Expr::Assign { target, .. }) => match &**target {
                Expr::Var { scope, .. } => {
                    assert_eq!(*scope, VarScope::Global(gbl::NAMES.len()));
                }
                other => panic!("unexpected target {:?}", other),
            },
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_global_rejected() {
        let err = parse("@global x; @global x;").unwrap_err();
        assert_eq!(err.kind, ErrKind::Exist);
    }

    #[test]
    fn test_function_scopes() {
        let p = parse_ok("function f(a, b) { @local t; t = a + b; return t }");
        let f = p.functions.get("f").unwrap();
        assert_eq!(f.params.len(), 2);
        assert_eq!(f.locals.len(), 1);
        // t = a + b: t is Local(0), a is Arg(0), b is Arg(1)
        match &f.body[0].kind {
            StmtKind::Expr(Expr::Assign { target, value, .. }) => {
                assert!(matches!(**target, Expr::Var { scope: VarScope::Local(0), .. }));
                match &**value {
                    Expr::Binary { l, r, .. } => {
                        assert!(matches!(**l, Expr::Var { scope: VarScope::Arg(0), .. }));
                        assert!(matches!(**r, Expr::Var { scope: VarScope::Arg(1), .. }));
                    }
                    other => panic!("unexpected value {:?}", other),
                }
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_ref_parameter() {
        let p = parse_ok("function f(&out) { out = 1 } BEGIN { f(x) }");
        let f = p.functions.get("f").unwrap();
        assert_eq!(f.params[0].1, ParamMode::Ref);
    }

    #[test]
    fn test_ref_arg_must_be_lvalue() {
        let err = parse("function f(&out) { out = 1 } BEGIN { f(1+2) }").unwrap_err();
        assert_eq!(err.kind, ErrKind::Syntax);
        assert!(err.msg.contains("assignable"));
    }

    #[test]
    fn test_call_arity_checked() {
        let err = parse("function f(a) { return a } BEGIN { f(1, 2) }").unwrap_err();
        assert!(err.msg.contains("at most"));
    }

    #[test]
    fn test_duplicate_function_rejected() {
        let err = parse("function f() {} function f() {}").unwrap_err();
        assert_eq!(err.kind, ErrKind::Exist);
    }

    #[test]
    fn test_undeclared_variable_without_implicit() {
        let mut opts = Options::default();
        opts.traits.set(Traits::IMPLICIT, false);
        let err = parse_source("(test)", "BEGIN { x = 1 }", &opts).unwrap_err();
        assert!(err.msg.contains("undeclared"));

        let ok = parse_source("(test)", "@global x; BEGIN { x = 1 }", &opts);
        assert!(ok.is_ok());
    }

    #[test]
    fn test_pablock_disabled_rejects_rules() {
        let mut opts = Options::default();
        opts.traits.set(Traits::PABLOCK, false);
        let err = parse_source("(test)", "{ print }", &opts).unwrap_err();
        assert!(err.msg.contains("pattern-action"));
    }

    #[test]
    fn test_pragma_entry() {
        let p = parse_ok("@pragma entry main\nfunction main(args) { return 0 }");
        assert_eq!(p.entry.as_deref(), Some("main"));
    }

    #[test]
    fn test_pragma_entry_requires_defined_function() {
        let err = parse("@pragma entry nothere\n").unwrap_err();
        assert_eq!(err.kind, ErrKind::Noent);
    }

    #[test]
    fn test_pragma_trait_toggle() {
        // Turning implicit off from the pragma point onward.
        let err = parse("@pragma implicit off\nBEGIN { zz = 1 }").unwrap_err();
        assert!(err.msg.contains("undeclared"));
    }

    #[test]
    fn test_ternary_and_precedence() {
        let p = parse_ok("BEGIN { x = 1 + 2 * 3 }");
        let action = p.rules[0].action.as_ref().unwrap();
        match &action[0].kind {
            StmtKind::Expr(Expr::Assign { value, .. }) => match &**value {
                Expr::Binary { op: BinOp::Add, r, .. } => {
                    assert!(matches!(**r, Expr::Binary { op: BinOp::Mul, .. }));
                }
                other => panic!("unexpected value {:?}", other),
            },
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_concatenation() {
        let p = parse_ok("BEGIN { x = \"a\" \"b\" }");
        let action = p.rules[0].action.as_ref().unwrap();
        match &action[0].kind {
            StmtKind::Expr(Expr::Assign { value, .. }) => {
                assert!(matches!(**value, Expr::Concat { .. }));
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_concat_disabled() {
        let mut opts = Options::default();
        opts.traits.set(Traits::BLANKCONCAT, false);
        assert!(parse_source("(test)", "BEGIN { x = \"a\" \"b\" }", &opts).is_err());
    }

    #[test]
    fn test_field_expressions() {
        let p = parse_ok("{ print $1, $(NF-1) }");
        let action = p.rules[0].action.as_ref().unwrap();
        match &action[0].kind {
            StmtKind::Print { args, .. } => {
                assert_eq!(args.len(), 2);
                assert!(matches!(args[0], Expr::Field { .. }));
                assert!(matches!(args[1], Expr::Field { .. }));
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_print_redirection() {
        let p = parse_ok("{ print $1 > \"out.txt\" }");
        let action = p.rules[0].action.as_ref().unwrap();
        match &action[0].kind {
            StmtKind::Print { args, out } => {
                assert_eq!(args.len(), 1);
                let out = out.as_ref().unwrap();
                assert_eq!(out.kind, OutKind::File);
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_print_gt_comparison_in_parens() {
        let p = parse_ok("{ print (a > b) }");
        let action = p.rules[0].action.as_ref().unwrap();
        match &action[0].kind {
            StmtKind::Print { args, out } => {
                assert!(out.is_none());
                assert!(matches!(args[0], Expr::Binary { op: BinOp::Gt, .. }));
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_getline_forms() {
        let p = parse_ok(
            "{ getline; getline x; getline < \"f\"; getline x < \"f\"; \"cmd\" | getline; \"cmd\" | getline x }",
        );
        let action = p.rules[0].action.as_ref().unwrap();
        let forms: Vec<_> = action
            .iter()
            .map(|s| match &s.kind {
                StmtKind::Expr(Expr::Getline { var, src, .. }) => {
                    (var.is_some(), matches!(src, GetlineSrc::Console), matches!(src, GetlineSrc::Pipe(_)))
                }
                other => panic!("unexpected statement {:?}", other),
            })
            .collect();
        assert_eq!(
            forms,
            vec![
                (false, true, false),
                (true, true, false),
                (false, false, false),
                (true, false, false),
                (false, false, true),
                (true, false, true),
            ]
        );
    }

    #[test]
    fn test_rwpipe_getline_gated() {
        assert!(parse("{ \"cmd\" |& getline }").is_ok());
        let mut opts = Options::default();
        opts.traits.set(Traits::RWPIPE, false);
        assert!(parse_source("(test)", "{ \"cmd\" |& getline }", &opts).is_err());
    }

    #[test]
    fn test_for_variants() {
        let p = parse_ok("BEGIN { for (i = 0; i < 3; i++) print i\nfor (k in a) print k }");
        let action = p.rules[0].action.as_ref().unwrap();
        assert!(matches!(action[0].kind, StmtKind::For { .. }));
        assert!(matches!(action[1].kind, StmtKind::ForIn { .. }));
    }

    #[test]
    fn test_do_while() {
        let p = parse_ok("BEGIN { do { x++ } while (x < 10) }");
        let action = p.rules[0].action.as_ref().unwrap();
        assert!(matches!(action[0].kind, StmtKind::DoWhile { .. }));
    }

    #[test]
    fn test_if_else_across_newline() {
        let p = parse_ok("BEGIN { if (x)\n  y = 1\nelse\n  y = 2\n}");
        let action = p.rules[0].action.as_ref().unwrap();
        match &action[0].kind {
            StmtKind::If { alt, .. } => assert!(alt.is_some()),
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_delete_and_reset() {
        let p = parse_ok("BEGIN { delete a[1]; delete a; @reset a }");
        let action = p.rules[0].action.as_ref().unwrap();
        assert!(matches!(&action[0].kind, StmtKind::Delete(Expr::Indexed { .. })));
        assert!(matches!(&action[1].kind, StmtKind::Delete(Expr::Var { .. })));
        assert!(matches!(&action[2].kind, StmtKind::Reset(Expr::Var { .. })));
    }

    #[test]
    fn test_multidim_index() {
        let p = parse_ok("BEGIN { a[1, 2] = 3; if ((1, 2) in a) print 1 }");
        let action = p.rules[0].action.as_ref().unwrap();
        match &action[0].kind {
            StmtKind::Expr(Expr::Assign { target, .. }) => match &**target {
                Expr::Indexed { index, .. } => assert_eq!(index.len(), 2),
                other => panic!("unexpected target {:?}", other),
            },
            other => panic!("unexpected statement {:?}", other),
        }
        match &action[1].kind {
            StmtKind::If { cond, .. } => match cond {
                Expr::In { keys, .. } => assert_eq!(keys.len(), 2),
                other => panic!("unexpected condition {:?}", other),
            },
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_unparenthesized_length() {
        let p = parse_ok("{ print length }");
        let action = p.rules[0].action.as_ref().unwrap();
        match &action[0].kind {
            StmtKind::Print { args, .. } => {
                assert!(matches!(&args[0], Expr::Call { name, .. } if &**name == "length"));
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_builtin_arity_checked() {
        let err = parse("BEGIN { substr() }").unwrap_err();
        assert!(err.msg.contains("wrong number of arguments"));
    }

    #[test]
    fn test_sub_target_must_be_lvalue() {
        let err = parse("BEGIN { sub(/a/, \"b\", 1+1) }").unwrap_err();
        assert!(err.msg.contains("assignable"));
    }

    #[test]
    fn test_module_call_parses() {
        let p = parse_ok("BEGIN { x = sys::getpid() }");
        let action = p.rules[0].action.as_ref().unwrap();
        match &action[0].kind {
            StmtKind::Expr(Expr::Assign { value, .. }) => {
                assert!(matches!(&**value, Expr::Call { name, .. } if &**name == "sys::getpid"));
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_expression_depth_guard() {
        let mut src = String::from("BEGIN { x = ");
        for _ in 0..400 {
            src.push('(');
        }
        src.push('1');
        for _ in 0..400 {
            src.push(')');
        }
        src.push_str(" }");
        let err = parse(&src).unwrap_err();
        assert_eq!(err.kind, ErrKind::Stackov);
    }

    #[test]
    fn test_power_right_assoc_with_unary() {
        // -2^2 parses as -(2^2)
        let p = parse_ok("BEGIN { x = -2^2 }");
        let action = p.rules[0].action.as_ref().unwrap();
        match &action[0].kind {
            StmtKind::Expr(Expr::Assign { value, .. }) => {
                assert!(matches!(**value, Expr::Unary { op: UnOp::Neg, .. }));
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_exit_with_value() {
        let p = parse_ok("BEGIN { exit 3 }");
        let action = p.rules[0].action.as_ref().unwrap();
        assert!(matches!(&action[0].kind, StmtKind::Exit(Some(Expr::Int(3)))));
    }

    #[test]
    fn test_abort_statement() {
        let p = parse_ok("BEGIN { @abort 9 }");
        let action = p.rules[0].action.as_ref().unwrap();
        assert!(matches!(&action[0].kind, StmtKind::Abort(Some(Expr::Int(9)))));
    }

    #[test]
    fn test_nextofile_gated() {
        assert!(parse("{ nextofile }").is_ok());
        let mut opts = Options::default();
        opts.traits.set(Traits::NEXTOFILE, false);
        assert!(parse_source("(test)", "{ nextofile }", &opts).is_err());
    }

    #[test]
    fn test_return_outside_function_rejected() {
        let err = parse("BEGIN { return 1 }").unwrap_err();
        assert!(err.msg.contains("outside"));
    }
}
