/// Statement Execution
///
/// The statement half of the tree walker. Control flow unwinds as
/// `Flow` statuses: loops absorb break/continue, call frames absorb
/// return, and the record loop absorbs next/nextfile/exit/abort.

use crate::error::ErrKind;
use crate::gem::note_err;
use crate::rio::ChanClass;
use crate::rtx::{Exec, Flow, Rtx, Signal};
use crate::types::{gbl, Expr, OutKind, OutTarget, Stmt, StmtKind};
use crate::value::Value;

impl Rtx {
    pub(crate) fn exec_block_stmts(&mut self, stmts: &[Stmt]) -> Exec<()> {
        self.block_depth += 1;
        if self.block_depth > self.depths.block_run {
            self.block_depth -= 1;
            let loc = stmts.first().map(|s| s.loc.clone()).unwrap_or_default();
            return Err(self.rt_err(ErrKind::Stackov, &loc, "block nesting too deep"));
        }
        let mut r = Ok(());
        for s in stmts {
            r = self.exec_stmt(s);
            if r.is_err() {
                break;
            }
        }
        self.block_depth -= 1;
        r
    }

    pub(crate) fn exec_stmt(&mut self, s: &Stmt) -> Exec<()> {
        self.check_halt()?;

        match &s.kind {
            StmtKind::Null => Ok(()),
            StmtKind::Expr(e) => {
                self.eval_expr(e)?;
                Ok(())
            }
            StmtKind::Block(stmts) => self.exec_block_stmts(stmts),
            StmtKind::If { cond, then, alt } => {
                let c = self.eval_expr(cond)?;
                if c.is_truthy() {
                    self.exec_stmt(then)
                } else if let Some(alt) = alt {
                    self.exec_stmt(alt)
                } else {
                    Ok(())
                }
            }
            StmtKind::While { cond, body } => {
                loop {
                    self.check_halt()?;
                    let c = self.eval_expr(cond)?;
                    if !c.is_truthy() {
                        break;
                    }
                    match self.exec_stmt(body) {
                        Ok(()) => {}
                        Err(Signal::Flow(Flow::Break)) => break,
                        Err(Signal::Flow(Flow::Continue)) => continue,
                        Err(other) => return Err(other),
                    }
                }
                Ok(())
            }
            StmtKind::DoWhile { body, cond } => {
                loop {
                    self.check_halt()?;
                    match self.exec_stmt(body) {
                        Ok(()) => {}
                        Err(Signal::Flow(Flow::Break)) => break,
                        Err(Signal::Flow(Flow::Continue)) => {}
                        Err(other) => return Err(other),
                    }
                    let c = self.eval_expr(cond)?;
                    if !c.is_truthy() {
                        break;
                    }
                }
                Ok(())
            }
            StmtKind::For { init, cond, step, body } => {
                if let Some(e) = init {
                    self.eval_expr(e)?;
                }
                loop {
                    self.check_halt()?;
                    if let Some(c) = cond {
                        let v = self.eval_expr(c)?;
                        if !v.is_truthy() {
                            break;
                        }
                    }
                    match self.exec_stmt(body) {
                        Ok(()) => {}
                        Err(Signal::Flow(Flow::Break)) => break,
                        Err(Signal::Flow(Flow::Continue)) => {}
                        Err(other) => return Err(other),
                    }
                    if let Some(e) = step {
                        self.eval_expr(e)?;
                    }
                }
                Ok(())
            }
            StmtKind::ForIn { var, array, body } => {
                // Snapshot the keys so the body may delete or insert
                // without upsetting the walk.
                let keys: Vec<String> = match array.as_ref() {
                    Expr::Var { name, scope, loc } => {
                        match self.map_at_scope(*scope, name, false, loc)? {
                            Some(map) => map.borrow().keys().cloned().collect(),
                            None => Vec::new(),
                        }
                    }
                    other => {
                        return Err(self.rt_err(
                            ErrKind::Inval,
                            &other.loc(),
                            "for-in needs an array variable",
                        ))
                    }
                };
                let lv = self.resolve_lvalue(var)?;
                for key in keys {
                    self.check_halt()?;
                    self.write_lvalue(&lv, Value::str_from(&key), &s.loc)?;
                    match self.exec_stmt(body) {
                        Ok(()) => {}
                        Err(Signal::Flow(Flow::Break)) => break,
                        Err(Signal::Flow(Flow::Continue)) => continue,
                        Err(other) => return Err(other),
                    }
                }
                Ok(())
            }
            StmtKind::Break => Err(Signal::Flow(Flow::Break)),
            StmtKind::Continue => Err(Signal::Flow(Flow::Continue)),
            StmtKind::Next => Err(Signal::Flow(Flow::Next)),
            StmtKind::NextFile => Err(Signal::Flow(Flow::NextFile)),
            StmtKind::NextOFile => self.advance_ofile(),
            StmtKind::Return(v) => {
                let val = match v {
                    Some(e) => {
                        let v = self.eval_expr(e)?;
                        if v.is_map() && !self.traits.has(crate::opts::Traits::FLEXMAP) {
                            return Err(self.rt_err(
                                ErrKind::Perm,
                                &s.loc,
                                "returning a map is disabled",
                            ));
                        }
                        v
                    }
                    None => Value::Nil,
                };
                Err(Signal::Flow(Flow::Return(val)))
            }
            StmtKind::Exit(v) => {
                let val = match v {
                    Some(e) => self.eval_expr(e)?,
                    None => Value::Nil,
                };
                Err(Signal::Flow(Flow::Exit(val)))
            }
            StmtKind::Abort(v) => {
                let val = match v {
                    Some(e) => self.eval_expr(e)?,
                    None => Value::Nil,
                };
                Err(Signal::Flow(Flow::Abort(val)))
            }
            StmtKind::Delete(target) => self.exec_delete(target),
            StmtKind::Reset(target) => self.exec_reset(target),
            StmtKind::Print { args, out } => self.exec_print(args, out, s),
            StmtKind::Printf { args, out } => self.exec_printf(args, out, s),
        }
    }

    // ── delete / @reset ──────────────────────────────────────

    fn exec_delete(&mut self, target: &Expr) -> Exec<()> {
        match target {
            Expr::Var { name, scope, loc } => {
                // Wholesale deletion empties the map but keeps its
                // identity, so aliases observe the emptied map.
                if let Some(map) = self.map_at_scope(*scope, name, false, loc)? {
                    map.borrow_mut().clear();
                }
                Ok(())
            }
            Expr::Indexed { name, scope, index, loc } => {
                let key = self.index_key(index)?;
                if let Some(map) = self.map_at_scope(*scope, name, false, loc)? {
                    map.borrow_mut().shift_remove(&key);
                }
                Ok(())
            }
            other => Err(self.rt_err(ErrKind::Inval, &other.loc(), "delete needs an array")),
        }
    }

    fn exec_reset(&mut self, target: &Expr) -> Exec<()> {
        let lv = self.resolve_lvalue(target)?;
        self.write_lvalue(&lv, Value::Nil, &target.loc())
    }

    // ── print / printf ───────────────────────────────────────

    fn out_channel(&mut self, out: &Option<OutTarget>, s: &Stmt) -> Exec<Option<(ChanClass, String, bool)>> {
        let target = match out {
            None => return Ok(None),
            Some(t) => t,
        };
        let v = self.eval_expr(&target.dest)?;
        let name = self.val_to_str(&v, &s.loc)?.to_string();
        let (class, append) = match target.kind {
            OutKind::File => (ChanClass::FileWrite, false),
            OutKind::Append => (ChanClass::FileWrite, true),
            OutKind::Pipe => (ChanClass::PipeWrite, false),
            OutKind::RwPipe => (ChanClass::RwPipe, false),
        };
        Ok(Some((class, name, append)))
    }

    fn emit(&mut self, chan: Option<(ChanClass, String, bool)>, data: &[u8], s: &Stmt) -> Exec<()> {
        let result = match &chan {
            None => self.rio.console_write(data),
            Some((class, name, append)) => self.rio.write(*class, name, *append, data),
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) => {
                let recoverable = e.kind.is_recoverable();
                let err = note_err(&self.gem, e.at(&s.loc));
                if recoverable && self.traits.has(crate::opts::Traits::TOLERANT) {
                    Ok(())
                } else {
                    Err(err.into())
                }
            }
        }
    }

    fn exec_print(&mut self, args: &[Expr], out: &Option<OutTarget>, s: &Stmt) -> Exec<()> {
        let chan = self.out_channel(out, s)?;

        let ofs = self.val_to_str(&self.globals[gbl::OFS].clone(), &s.loc)?;
        let ors = self.val_to_str(&self.globals[gbl::ORS].clone(), &s.loc)?;

        let mut text = String::new();
        if args.is_empty() {
            text.push_str(&self.record);
        } else {
            for (i, a) in args.iter().enumerate() {
                if i > 0 {
                    text.push_str(&ofs);
                }
                let v = self.eval_expr(a)?;
                let piece = self.val_to_out_str(&v, &s.loc)?;
                text.push_str(&piece);
            }
        }
        text.push_str(&ors);

        self.emit(chan, text.as_bytes(), s)
    }

    fn exec_printf(&mut self, args: &[Expr], out: &Option<OutTarget>, s: &Stmt) -> Exec<()> {
        let chan = self.out_channel(out, s)?;

        let fmt_val = self.eval_expr(&args[0])?;
        let fmt = self.val_to_str(&fmt_val, &s.loc)?;
        let mut vals = Vec::with_capacity(args.len() - 1);
        for a in &args[1..] {
            vals.push(self.eval_expr(a)?);
        }
        let text = self.format_values(&fmt, &vals, &s.loc)?;

        self.emit(chan, text.as_bytes(), s)
    }

}

#[cfg(test)]
mod tests {
    use crate::rtx::tests::run_program;

    #[test]
    fn test_if_else_chains() {
        let (out, _) = run_program(
            "{ if ($1 > 5) print \"big\"; else if ($1 > 2) print \"mid\"; else print \"small\" }",
            "7\n3\n1\n",
        );
        assert_eq!(out, "big\nmid\nsmall\n");
    }

    #[test]
    fn test_while_break_continue() {
        let (out, _) = run_program(
            "BEGIN { i = 0; while (1) { i++; if (i == 2) continue; if (i > 4) break; print i } }",
            "",
        );
        assert_eq!(out, "1\n3\n4\n");
    }

    #[test]
    fn test_for_loop() {
        let (out, _) = run_program("BEGIN { for (i = 0; i < 3; i++) print i }", "");
        assert_eq!(out, "0\n1\n2\n");
    }

    #[test]
    fn test_do_while_runs_once() {
        let (out, _) = run_program("BEGIN { do print \"once\"; while (0) }", "");
        assert_eq!(out, "once\n");
    }

    #[test]
    fn test_for_in_with_delete_in_body() {
        let (out, _) = run_program(
            "BEGIN { a[1]=1; a[2]=1; a[3]=1; n=0; for (k in a) { delete a[k]; n++ }; print n, length(a) }",
            "",
        );
        assert_eq!(out, "3 0\n");
    }

    #[test]
    fn test_delete_element_and_whole() {
        let (out, _) = run_program(
            "BEGIN { a[\"x\"]=1; a[\"y\"]=2; delete a[\"x\"]; print (\"x\" in a), (\"y\" in a); delete a; print (\"y\" in a) }",
            "",
        );
        assert_eq!(out, "0 1\n0\n");
    }

    #[test]
    fn test_delete_keeps_identity_for_aliases() {
        let (out, _) = run_program(
            "function clear(arr) { delete arr } BEGIN { a[\"k\"]=1; clear(a); print length(a) }",
            "",
        );
        assert_eq!(out, "0\n");
    }

    #[test]
    fn test_reset_clears_binding() {
        let (out, _) = run_program(
            "BEGIN { a[\"k\"] = 1; @reset a; a[\"j\"] = 2; print (\"k\" in a), (\"j\" in a) }",
            "",
        );
        assert_eq!(out, "0 1\n");
    }

    #[test]
    fn test_print_ofs_ors() {
        let (out, _) = run_program(
            "BEGIN { OFS = \"-\"; ORS = \"|\" } { print $1, $2 }",
            "a b\nc d\n",
        );
        assert_eq!(out, "a-b|c-d|");
    }

    #[test]
    fn test_print_uses_ofmt() {
        let (out, _) = run_program("BEGIN { OFMT = \"%.2f\"; print 3.14159 }", "");
        assert_eq!(out, "3.14\n");
    }

    #[test]
    fn test_print_to_file_and_read_back() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("hawk-print-test-{}.txt", std::process::id()));
        let file = path.to_string_lossy().to_string();
        let src = format!(
            "BEGIN {{ print \"line1\" > \"{f}\"; print \"line2\" > \"{f}\"; close(\"{f}\"); while ((getline l < \"{f}\") > 0) print \"got\", l }}",
            f = file
        );
        let (out, _) = run_program(&src, "");
        assert_eq!(out, "got line1\ngot line2\n");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_print_pipe_to_command() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("hawk-pipe-test-{}.txt", std::process::id()));
        let file = path.to_string_lossy().to_string();
        let src = format!(
            "BEGIN {{ cmd = \"cat > {f}\"; print \"piped\" | cmd; close(cmd); getline x < \"{f}\"; print x }}",
            f = file
        );
        let (out, _) = run_program(&src, "");
        assert_eq!(out, "piped\n");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_exit_from_function_unwinds() {
        let (out, val) = run_program(
            "function f() { exit 5 } BEGIN { f(); print \"unreached\" } END { print \"end\" }",
            "",
        );
        assert_eq!(out, "end\n");
        assert_eq!(val.to_int(true).unwrap(), 5);
    }

    #[test]
    fn test_next_from_function() {
        let (out, _) = run_program(
            "function skip() { next } /b/ { skip() } { print $0 }",
            "a\nb\nc\n",
        );
        assert_eq!(out, "a\nc\n");
    }
}
