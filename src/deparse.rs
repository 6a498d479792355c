/// Deparser
///
/// Re-emits a parsed program as source text. The output is valid input:
/// re-parsing it yields a structurally equivalent tree, which the tests
/// check by comparing a second deparse. Subexpressions are
/// parenthesized unconditionally so no precedence analysis is needed.

use std::fmt::Write;

use crate::types::{
    Expr, GetlineSrc, OutKind, ParamMode, Pattern, Program, Stmt, StmtKind, AssignOp, BinOp,
    IncOp, UnOp,
};

/// Deparse a whole program.
pub fn deparse(program: &Program) -> String {
    let mut out = String::new();
    let mut w = Deparser { out: &mut out, indent: 0 };
    w.program(program);
    out
}

struct Deparser<'a> {
    out: &'a mut String,
    indent: usize,
}

impl<'a> Deparser<'a> {
    fn program(&mut self, p: &Program) {
        if let Some(entry) = &p.entry {
            let _ = writeln!(self.out, "@pragma entry {}", entry);
        }

        let base = crate::types::Program::user_global_base();
        for g in &p.globals[base..] {
            let _ = writeln!(self.out, "@global {};", g);
        }

        for f in p.functions.values() {
            let _ = write!(self.out, "function {}(", f.name);
            for (i, (name, mode)) in f.params.iter().enumerate() {
                if i > 0 {
                    self.push(", ");
                }
                if *mode == ParamMode::Ref {
                    self.push("&");
                }
                self.push(name);
            }
            self.push(")\n{\n");
            self.indent += 1;
            if !f.locals.is_empty() {
                self.line_start();
                self.push("@local ");
                for (i, l) in f.locals.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.push(l);
                }
                self.push(";\n");
            }
            for s in &f.body {
                self.stmt_line(s);
            }
            self.indent -= 1;
            self.push("}\n");
        }

        for r in &p.rules {
            match &r.pattern {
                None => {}
                Some(Pattern::Begin) => self.push("BEGIN "),
                Some(Pattern::End) => self.push("END "),
                Some(Pattern::BeginFile) => self.push("BEGINFILE "),
                Some(Pattern::EndFile) => self.push("ENDFILE "),
                Some(Pattern::Expr(e)) => {
                    self.expr(e);
                    self.push(" ");
                }
                Some(Pattern::Range { start, end }) => {
                    self.expr(start);
                    self.push(", ");
                    self.expr(end);
                    self.push(" ");
                }
            }
            if let Some(action) = &r.action {
                self.push("{\n");
                self.indent += 1;
                for s in action {
                    self.stmt_line(s);
                }
                self.indent -= 1;
                self.push("}\n");
            } else {
                self.push("\n");
            }
        }
    }

    // ── Helpers ──────────────────────────────────────────────

    fn push(&mut self, s: &str) {
        self.out.push_str(s);
    }

    fn line_start(&mut self) {
        for _ in 0..self.indent {
            self.out.push('\t');
        }
    }

    fn stmt_line(&mut self, s: &Stmt) {
        self.line_start();
        self.stmt(s);
        self.push("\n");
    }

    // ── Statements ───────────────────────────────────────────

    fn body(&mut self, s: &Stmt) {
        self.push("{\n");
        self.indent += 1;
        match &s.kind {
            StmtKind::Block(stmts) => {
                for inner in stmts {
                    self.stmt_line(inner);
                }
            }
            _ => self.stmt_line(s),
        }
        self.indent -= 1;
        self.line_start();
        self.push("}");
    }

    fn stmt(&mut self, s: &Stmt) {
        match &s.kind {
            StmtKind::Null => self.push(";"),
            StmtKind::Expr(e) => {
                self.expr(e);
                self.push(";");
            }
            StmtKind::Block(stmts) => {
                self.push("{\n");
                self.indent += 1;
                for inner in stmts {
                    self.stmt_line(inner);
                }
                self.indent -= 1;
                self.line_start();
                self.push("}");
            }
            StmtKind::If { cond, then, alt } => {
                self.push("if (");
                self.expr(cond);
                self.push(") ");
                self.body(then);
                if let Some(alt) = alt {
                    self.push(" else ");
                    self.body(alt);
                }
            }
            StmtKind::While { cond, body } => {
                self.push("while (");
                self.expr(cond);
                self.push(") ");
                self.body(body);
            }
            StmtKind::DoWhile { body, cond } => {
                self.push("do ");
                self.body(body);
                self.push(" while (");
                self.expr(cond);
                self.push(");");
            }
            StmtKind::For { init, cond, step, body } => {
                self.push("for (");
                if let Some(e) = init {
                    self.expr(e);
                }
                self.push("; ");
                if let Some(e) = cond {
                    self.expr(e);
                }
                self.push("; ");
                if let Some(e) = step {
                    self.expr(e);
                }
                self.push(") ");
                self.body(body);
            }
            StmtKind::ForIn { var, array, body } => {
                self.push("for (");
                self.expr(var);
                self.push(" in ");
                self.expr(array);
                self.push(") ");
                self.body(body);
            }
            StmtKind::Break => self.push("break;"),
            StmtKind::Continue => self.push("continue;"),
            StmtKind::Next => self.push("next;"),
            StmtKind::NextFile => self.push("nextfile;"),
            StmtKind::NextOFile => self.push("nextofile;"),
            StmtKind::Return(v) => {
                self.push("return");
                if let Some(e) = v {
                    self.push(" ");
                    self.expr(e);
                }
                self.push(";");
            }
            StmtKind::Exit(v) => {
                self.push("exit");
                if let Some(e) = v {
                    self.push(" ");
                    self.expr(e);
                }
                self.push(";");
            }
            StmtKind::Abort(v) => {
                self.push("@abort");
                if let Some(e) = v {
                    self.push(" ");
                    self.expr(e);
                }
                self.push(";");
            }
            StmtKind::Delete(target) => {
                self.push("delete ");
                self.expr(target);
                self.push(";");
            }
            StmtKind::Reset(target) => {
                self.push("@reset ");
                self.expr(target);
                self.push(";");
            }
            StmtKind::Print { args, out } => {
                self.push("print");
                self.print_tail(args, out);
            }
            StmtKind::Printf { args, out } => {
                self.push("printf");
                self.print_tail(args, out);
            }
        }
    }

    fn print_tail(&mut self, args: &[Expr], out: &Option<crate::types::OutTarget>) {
        for (i, a) in args.iter().enumerate() {
            self.push(if i == 0 { " " } else { ", " });
            // Parenthesized so a comparison argument cannot read as a
            // redirection.
            self.sub(a);
        }
        if let Some(t) = out {
            match t.kind {
                OutKind::File => self.push(" > "),
                OutKind::Append => self.push(" >> "),
                OutKind::Pipe => self.push(" | "),
                OutKind::RwPipe => self.push(" |& "),
            }
            self.sub(&t.dest);
        }
        self.push(";");
    }

    // ── Expressions ──────────────────────────────────────────

    /// Emit a subexpression, parenthesized unless atomic.
    fn sub(&mut self, e: &Expr) {
        if is_atomic(e) {
            self.expr(e);
        } else {
            self.push("(");
            self.expr(e);
            self.push(")");
        }
    }

    fn expr(&mut self, e: &Expr) {
        match e {
            Expr::Int(v) => {
                let _ = write!(self.out, "{}", v);
            }
            Expr::Flt(v) => {
                if v.fract() == 0.0 && v.is_finite() {
                    let _ = write!(self.out, "{:.1}", v);
                } else {
                    let _ = write!(self.out, "{}", v);
                }
            }
            Expr::Str(s) => {
                self.push("\"");
                let escaped = esc_string(s);
                self.push(&escaped);
                self.push("\"");
            }
            Expr::Mbs(b) => {
                self.push("@b\"");
                let text: String = b.iter().map(|&c| c as char).collect();
                let escaped = esc_string(&text);
                self.push(&escaped);
                self.push("\"");
            }
            Expr::CharLit(c) => {
                self.push("'");
                let escaped = esc_string(&c.to_string());
                self.push(&escaped);
                self.push("'");
            }
            Expr::BchrLit(b) => {
                self.push("@b'");
                let escaped = esc_string(&(*b as char).to_string());
                self.push(&escaped);
                self.push("'");
            }
            Expr::Rex(r) => {
                self.push("/");
                self.push(r.pattern());
                self.push("/");
            }
            Expr::XNil => self.push("@nil"),
            Expr::Var { name, .. } => self.push(name),
            Expr::Indexed { name, index, .. } => {
                self.push(name);
                self.push("[");
                for (i, k) in index.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.expr(k);
                }
                self.push("]");
            }
            Expr::Field { index, .. } => {
                self.push("$");
                match &**index {
                    Expr::Int(_) | Expr::Var { .. } => self.expr(index),
                    other => {
                        self.push("(");
                        self.expr(other);
                        self.push(")");
                    }
                }
            }
            Expr::Binary { op, l, r, .. } => {
                self.sub(l);
                self.push(bin_op_text(*op));
                self.sub(r);
            }
            Expr::Unary { op, e, .. } => {
                self.push(match op {
                    UnOp::Not => "!",
                    UnOp::Neg => "-",
                    UnOp::Pos => "+",
                });
                self.sub(e);
            }
            Expr::IncDec { op, pre, target, .. } => {
                let text = match op {
                    IncOp::Incr => "++",
                    IncOp::Decr => "--",
                };
                if *pre {
                    self.push(text);
                    self.expr(target);
                } else {
                    self.expr(target);
                    self.push(text);
                }
            }
            Expr::Ternary { cond, then, alt } => {
                self.sub(cond);
                self.push(" ? ");
                self.sub(then);
                self.push(" : ");
                self.sub(alt);
            }
            Expr::Assign { op, target, value, .. } => {
                self.expr(target);
                self.push(match op {
                    AssignOp::Set => " = ",
                    AssignOp::Add => " += ",
                    AssignOp::Sub => " -= ",
                    AssignOp::Mul => " *= ",
                    AssignOp::Div => " /= ",
                    AssignOp::Mod => " %= ",
                    AssignOp::Pow => " ^= ",
                });
                self.sub(value);
            }
            Expr::Call { name, args, .. } => {
                self.push(name);
                self.push("(");
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.expr(a);
                }
                self.push(")");
            }
            Expr::In { keys, name, .. } => {
                if keys.len() == 1 {
                    self.sub(&keys[0]);
                } else {
                    self.push("(");
                    for (i, k) in keys.iter().enumerate() {
                        if i > 0 {
                            self.push(", ");
                        }
                        self.expr(k);
                    }
                    self.push(")");
                }
                self.push(" in ");
                self.push(name);
            }
            Expr::Getline { var, src, .. } => match src {
                GetlineSrc::Console => {
                    self.push("getline");
                    if let Some(v) = var {
                        self.push(" ");
                        self.expr(v);
                    }
                }
                GetlineSrc::File(f) => {
                    self.push("getline");
                    if let Some(v) = var {
                        self.push(" ");
                        self.expr(v);
                    }
                    self.push(" < ");
                    self.sub(f);
                }
                GetlineSrc::Pipe(cmd) => {
                    self.sub(cmd);
                    self.push(" | getline");
                    if let Some(v) = var {
                        self.push(" ");
                        self.expr(v);
                    }
                }
                GetlineSrc::RwPipe(cmd) => {
                    self.sub(cmd);
                    self.push(" |& getline");
                    if let Some(v) = var {
                        self.push(" ");
                        self.expr(v);
                    }
                }
            },
            Expr::Concat { l, r } => {
                self.sub(l);
                self.push(" ");
                self.sub(r);
            }
            Expr::Group(es) => {
                self.push("(");
                for (i, x) in es.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.expr(x);
                }
                self.push(")");
            }
        }
    }
}

fn is_atomic(e: &Expr) -> bool {
    matches!(
        e,
        Expr::Int(_)
            | Expr::Flt(_)
            | Expr::Str(_)
            | Expr::Mbs(_)
            | Expr::CharLit(_)
            | Expr::BchrLit(_)
            | Expr::Rex(_)
            | Expr::XNil
            | Expr::Var { .. }
            | Expr::Indexed { .. }
            | Expr::Field { .. }
            | Expr::Call { .. }
            | Expr::Group(_)
    )
}

fn bin_op_text(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => " + ",
        BinOp::Sub => " - ",
        BinOp::Mul => " * ",
        BinOp::Div => " / ",
        BinOp::Mod => " % ",
        BinOp::Pow => " ^ ",
        BinOp::Eq => " == ",
        BinOp::Ne => " != ",
        BinOp::TEq => " === ",
        BinOp::TNe => " !== ",
        BinOp::Lt => " < ",
        BinOp::Gt => " > ",
        BinOp::Le => " <= ",
        BinOp::Ge => " >= ",
        BinOp::MatchOp => " ~ ",
        BinOp::NotMatchOp => " !~ ",
        BinOp::And => " && ",
        BinOp::Or => " || ",
    }
}

fn esc_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\x07' => out.push_str("\\a"),
            '\x08' => out.push_str("\\b"),
            '\x0B' => out.push_str("\\v"),
            '\x0C' => out.push_str("\\f"),
            c if (c as u32) < 0x20 || (c as u32) == 0x7F => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opts::Options;
    use crate::parser::parse_source;

    /// Deparse must be a fixed point of parse-then-deparse.
    fn assert_round_trip(src: &str) {
        let opts = Options::default();
        let p1 = parse_source("(rt)", src, &opts).expect("original should parse");
        let d1 = deparse(&p1);
        let p2 = parse_source("(rt)", &d1, &opts)
            .unwrap_or_else(|e| panic!("deparsed output failed to parse: {}\n---\n{}", e.msg, d1));
        let d2 = deparse(&p2);
        assert_eq!(d1, d2, "round trip diverged for:\n{}", src);
    }

    #[test]
    fn test_round_trip_simple_rules() {
        assert_round_trip("BEGIN { print \"hello\" }");
        assert_round_trip("{ print $1, $3 }");
        assert_round_trip("END { print NR }");
    }

    #[test]
    fn test_round_trip_patterns() {
        assert_round_trip("/err/ { print }");
        assert_round_trip("NR > 1 { print $0 }");
        assert_round_trip("/a/, /b/ { print }");
        assert_round_trip("/skip/\n");
    }

    #[test]
    fn test_round_trip_control_flow() {
        assert_round_trip(
            "BEGIN { for (i = 0; i < 10; i++) { if (i % 2) print i; else print -i } }",
        );
        assert_round_trip("BEGIN { while (x < 3) x++ }");
        assert_round_trip("BEGIN { do { x += 1 } while (x < 5) }");
        assert_round_trip("{ for (k in seen) print k, seen[k] }");
    }

    #[test]
    fn test_round_trip_functions() {
        assert_round_trip(
            "function add(a, b) { return a + b }\nfunction bump(&x) { x = x + 1 }\nBEGIN { bump(n); print add(n, 2) }",
        );
        assert_round_trip("function f(n) { @local s; s = n * 2; return s }\nBEGIN { print f(4) }");
    }

    #[test]
    fn test_round_trip_globals_and_entry() {
        assert_round_trip("@global total;\nBEGIN { total += $1 }");
        assert_round_trip("@pragma entry main\nfunction main(args) { return 7 }");
    }

    #[test]
    fn test_round_trip_string_escapes() {
        assert_round_trip(r#"BEGIN { print "tab\there\nnewline\\done\"q" }"#);
        assert_round_trip("BEGIN { x = \"\\x01\\x02\" }");
    }

    #[test]
    fn test_round_trip_literals() {
        assert_round_trip("BEGIN { a = 3; b = 2.5; c = 'x'; d = @b'y'; e = @b\"raw\"; f = @nil }");
        assert_round_trip("BEGIN { x = 0x1f + 0b101 }");
        assert_round_trip("BEGIN { y = 3.0 }");
    }

    #[test]
    fn test_round_trip_getline_forms() {
        assert_round_trip("{ getline }");
        assert_round_trip("{ getline line }");
        assert_round_trip("{ getline < \"data.txt\" }");
        assert_round_trip("{ getline x < \"data.txt\" }");
        assert_round_trip("{ \"date\" | getline now }");
        assert_round_trip("{ \"bc\" |& getline result }");
    }

    #[test]
    fn test_round_trip_print_redirection() {
        assert_round_trip("{ print $1 > \"out\" }");
        assert_round_trip("{ print $1, $2 >> \"log\" }");
        assert_round_trip("{ print $0 | \"sort\" }");
        assert_round_trip("{ printf \"%d\\n\", n }");
    }

    #[test]
    fn test_round_trip_arrays() {
        assert_round_trip("{ a[$1]++ } END { for (k in a) print k, a[k] }");
        assert_round_trip("BEGIN { m[1, 2] = 3; if ((1, 2) in m) delete m[1, 2]; delete m }");
        assert_round_trip("BEGIN { @reset a }");
    }

    #[test]
    fn test_round_trip_operators() {
        assert_round_trip("BEGIN { x = a ~ /p/ ? -b : +c; y = !d; z = a ^ b ^ c }");
        assert_round_trip("BEGIN { s = \"a\" \"b\" 1 + 2 }");
        assert_round_trip("BEGIN { if (a === b || a !== c) print 1 }");
        assert_round_trip("BEGIN { v = x++ + ++y }");
    }

    #[test]
    fn test_round_trip_special_statements() {
        assert_round_trip("{ next }");
        assert_round_trip("{ nextfile }");
        assert_round_trip("{ nextofile }");
        assert_round_trip("BEGIN { exit 2 }");
        assert_round_trip("BEGIN { @abort 3 }");
    }

    #[test]
    fn test_deparsed_field_forms() {
        let opts = Options::default();
        let p = parse_source("(t)", "{ print $0, $NF, $(NF - 1) }", &opts).unwrap();
        let d = deparse(&p);
        assert!(d.contains("$0"));
        assert!(d.contains("$NF"));
        assert!(d.contains("$(NF - 1)"));
    }

    #[test]
    fn test_default_action_not_materialized() {
        let opts = Options::default();
        let p = parse_source("(t)", "/x/\n", &opts).unwrap();
        let d = deparse(&p);
        // A pattern with a default action deparses without a block.
        assert!(d.contains("/x/"));
        assert!(!d.contains("{"));
    }
}
