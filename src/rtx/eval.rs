/// Expression Evaluation
///
/// The expression half of the tree walker. Every node type evaluates to
/// a value; lvalues resolve to slot references shared with reference
/// parameters and the `r`-mode intrinsic arguments.

use std::rc::Rc;

use crate::error::{ErrKind, Loc};
use crate::gem::note_err;
use crate::opts::Traits;
use crate::rex::Rex;
use crate::rio::ChanClass;
use crate::rtx::builtins::find_builtin;
use crate::rtx::{Exec, Lvalue, Rtx, Signal, Slot};
use crate::types::{
    gbl, AssignOp, BinOp, Expr, GetlineSrc, IncOp, ParamMode, UnOp, VarScope,
};
use crate::value::{MapHandle, Num, Value};

impl Rtx {
    pub(crate) fn eval_expr(&mut self, e: &Expr) -> Exec<Value> {
        self.expr_depth += 1;
        if self.expr_depth > self.depths.expr_run {
            self.expr_depth -= 1;
            return Err(self.rt_err(ErrKind::Stackov, &e.loc(), "expression nesting too deep"));
        }
        let r = self.eval_expr_inner(e);
        self.expr_depth -= 1;
        r
    }

    fn eval_expr_inner(&mut self, e: &Expr) -> Exec<Value> {
        match e {
            Expr::Int(v) => Ok(Value::Int(*v)),
            Expr::Flt(v) => Ok(Value::Flt(*v)),
            Expr::Str(s) => Ok(Value::str_from(s)),
            Expr::Mbs(b) => Ok(Value::mbs_from(b)),
            Expr::CharLit(c) => Ok(Value::Char(*c)),
            Expr::BchrLit(b) => Ok(Value::Bchr(*b)),
            Expr::XNil => Ok(Value::Nil),
            Expr::Rex(re) => {
                // A bare regex matches against the current record.
                let hit = re
                    .is_match(&self.record, false)
                    .map_err(|err| note_err(&self.gem, err))?;
                Ok(Value::Int(hit as i64))
            }
            Expr::Var { name, scope, .. } => self.get_scoped(*scope, name),
            Expr::Indexed { name, scope, index, loc } => {
                let key = self.index_key(index)?;
                match self.map_at_scope(*scope, name, false, loc)? {
                    Some(map) => Ok(map.borrow().get(&key).cloned().unwrap_or(Value::Nil)),
                    None => Ok(Value::Nil),
                }
            }
            Expr::Field { index, loc } => {
                let v = self.eval_expr(index)?;
                let n = self.val_to_int(&v, loc)?;
                self.get_field(n, loc)
            }
            Expr::Binary { op, l, r, loc } => self.eval_binary(*op, l, r, loc),
            Expr::Unary { op, e, loc } => {
                let v = self.eval_expr(e)?;
                match op {
                    UnOp::Not => Ok(Value::Int(!v.is_truthy() as i64)),
                    UnOp::Neg => match self.val_to_num(&v, loc)? {
                        Num::Int(i) => Ok(Value::Int(i.wrapping_neg())),
                        Num::Flt(f) => Ok(Value::Flt(-f)),
                    },
                    UnOp::Pos => Ok(self.val_to_num(&v, loc)?.into_value()),
                }
            }
            Expr::IncDec { op, pre, target, loc } => {
                let lv = self.resolve_lvalue(target)?;
                let old = self.read_lvalue(&lv, loc)?;
                let n = self.val_to_num(&old, loc)?;
                let new = match (op, n) {
                    (IncOp::Incr, Num::Int(i)) => Value::Int(i.wrapping_add(1)),
                    (IncOp::Incr, Num::Flt(f)) => Value::Flt(f + 1.0),
                    (IncOp::Decr, Num::Int(i)) => Value::Int(i.wrapping_sub(1)),
                    (IncOp::Decr, Num::Flt(f)) => Value::Flt(f - 1.0),
                };
                self.write_lvalue(&lv, new.clone(), loc)?;
                if *pre {
                    Ok(new)
                } else {
                    Ok(n.into_value())
                }
            }
            Expr::Ternary { cond, then, alt } => {
                let c = self.eval_expr(cond)?;
                if c.is_truthy() {
                    self.eval_expr(then)
                } else {
                    self.eval_expr(alt)
                }
            }
            Expr::Assign { op, target, value, loc } => {
                let rhs = self.eval_expr(value)?;
                self.assign(*op, target, rhs, loc)
            }
            Expr::Call { name, args, loc } => self.call_function(name, args, loc, 0),
            Expr::In { keys, name, scope, loc } => {
                let key = self.index_key(keys)?;
                match self.map_at_scope(*scope, name, false, loc)? {
                    Some(map) => Ok(Value::Int(map.borrow().contains_key(&key) as i64)),
                    None => Ok(Value::Int(0)),
                }
            }
            Expr::Getline { var, src, loc } => self.do_getline(var, src, loc),
            Expr::Concat { l, r } => {
                let a = self.eval_expr(l)?;
                let b = self.eval_expr(r)?;
                self.concat_vals(a, b, &l.loc())
            }
            Expr::Group(_) => Err(self.rt_err(
                ErrKind::Inval,
                &e.loc(),
                "grouped expression is not a value",
            )),
        }
    }

    // ── Scoped variable access ───────────────────────────────

    fn stack_index(&self, scope: VarScope) -> usize {
        match scope {
            VarScope::Arg(i) => self.frame_base + i,
            VarScope::Local(i) => self.frame_base + self.frame_params + i,
            _ => unreachable!("not a frame scope"),
        }
    }

    pub(crate) fn get_scoped(&mut self, scope: VarScope, name: &Rc<str>) -> Exec<Value> {
        match scope {
            VarScope::Named => Ok(self.named.get(name).cloned().unwrap_or(Value::Nil)),
            VarScope::Global(i) => Ok(self.globals[i].clone()),
            VarScope::Arg(_) | VarScope::Local(_) => {
                let abs = self.stack_index(scope);
                match self.stack[abs].clone() {
                    Slot::Val(v) => Ok(v),
                    Slot::Ref(lv) => self.read_lvalue(&lv, &Loc::none()),
                }
            }
        }
    }

    pub(crate) fn set_global(&mut self, idx: usize, v: Value, loc: &Loc) -> Exec<()> {
        if idx == gbl::NF {
            let n = self.val_to_int(&v, loc)?;
            return self.set_nf(n, loc);
        }
        self.globals[idx] = v;
        Ok(())
    }

    // ── Lvalues ──────────────────────────────────────────────

    pub(crate) fn resolve_lvalue(&mut self, e: &Expr) -> Exec<Lvalue> {
        match e {
            Expr::Var { name, scope, .. } => match scope {
                VarScope::Named => Ok(Lvalue::Named(name.clone())),
                VarScope::Global(i) => Ok(Lvalue::Global(*i)),
                VarScope::Arg(_) | VarScope::Local(_) => {
                    let abs = self.stack_index(*scope);
                    // References flatten at creation so a stored
                    // reference never points at another reference.
                    match &self.stack[abs] {
                        Slot::Ref(lv) => Ok(lv.clone()),
                        Slot::Val(_) => Ok(Lvalue::Stack(abs)),
                    }
                }
            },
            Expr::Indexed { name, scope, index, loc } => {
                let key = self.index_key(index)?;
                let map = self
                    .map_at_scope(*scope, name, true, loc)?
                    .expect("map creation requested");
                Ok(Lvalue::Elem(map, key))
            }
            Expr::Field { index, loc } => {
                let v = self.eval_expr(index)?;
                let n = self.val_to_int(&v, loc)?;
                if n < 0 {
                    return Err(self.rt_err(ErrKind::Inval, loc, "negative field index"));
                }
                Ok(Lvalue::Field(n as usize))
            }
            other => Err(self.rt_err(
                ErrKind::Inval,
                &other.loc(),
                "expression is not assignable",
            )),
        }
    }

    pub(crate) fn read_lvalue(&mut self, lv: &Lvalue, loc: &Loc) -> Exec<Value> {
        match lv {
            Lvalue::Named(n) => Ok(self.named.get(n).cloned().unwrap_or(Value::Nil)),
            Lvalue::Global(i) => Ok(self.globals[*i].clone()),
            Lvalue::Stack(abs) => match self.stack[*abs].clone() {
                Slot::Val(v) => Ok(v),
                Slot::Ref(inner) => self.read_lvalue(&inner, loc),
            },
            Lvalue::Field(n) => self.get_field(*n as i64, loc),
            Lvalue::Elem(map, key) => Ok(map.borrow().get(key).cloned().unwrap_or(Value::Nil)),
        }
    }

    pub(crate) fn write_lvalue(&mut self, lv: &Lvalue, v: Value, loc: &Loc) -> Exec<()> {
        match lv {
            Lvalue::Named(n) => {
                self.named.insert(n.clone(), v);
                Ok(())
            }
            Lvalue::Global(i) => self.set_global(*i, v, loc),
            Lvalue::Stack(abs) => match self.stack[*abs].clone() {
                Slot::Ref(inner) => self.write_lvalue(&inner, v, loc),
                Slot::Val(_) => {
                    self.stack[*abs] = Slot::Val(v);
                    Ok(())
                }
            },
            Lvalue::Field(n) => self.set_field(*n as i64, v, loc),
            Lvalue::Elem(map, key) => {
                map.borrow_mut().insert(key.clone(), v);
                Ok(())
            }
        }
    }

    /// The map bound at a variable slot, creating one when `create` and
    /// the slot is nil.
    pub(crate) fn map_at_scope(
        &mut self,
        scope: VarScope,
        name: &Rc<str>,
        create: bool,
        loc: &Loc,
    ) -> Exec<Option<MapHandle>> {
        let cur = self.get_scoped(scope, name)?;
        match cur {
            Value::Map(m) => Ok(Some(m)),
            Value::Nil => {
                if !create {
                    return Ok(None);
                }
                let v = Value::new_map();
                let handle = match &v {
                    Value::Map(m) => m.clone(),
                    _ => unreachable!(),
                };
                match scope {
                    VarScope::Named => {
                        self.named.insert(name.clone(), v);
                    }
                    VarScope::Global(i) => self.globals[i] = v,
                    VarScope::Arg(_) | VarScope::Local(_) => {
                        let abs = self.stack_index(scope);
                        match self.stack[abs].clone() {
                            Slot::Ref(lv) => self.write_lvalue(&lv, v, loc)?,
                            Slot::Val(_) => self.stack[abs] = Slot::Val(v),
                        }
                    }
                }
                Ok(Some(handle))
            }
            other => Err(self.rt_err(
                ErrKind::Inval,
                loc,
                format!("scalar of type {} used as an array", other.type_name()),
            )),
        }
    }

    /// Join index expressions into a map key with `SUBSEP`.
    pub(crate) fn index_key(&mut self, index: &[Expr]) -> Exec<String> {
        let subsep = self.subsep();
        let mut parts = Vec::with_capacity(index.len());
        for e in index {
            let v = self.eval_expr(e)?;
            parts.push(self.val_to_str(&v, &e.loc())?.to_string());
        }
        Ok(parts.join(&subsep))
    }

    // ── Operators ────────────────────────────────────────────

    fn assign(&mut self, op: AssignOp, target: &Expr, rhs: Value, loc: &Loc) -> Exec<Value> {
        let lv = self.resolve_lvalue(target)?;

        let value = if op == AssignOp::Set {
            rhs
        } else {
            let old = self.read_lvalue(&lv, loc)?;
            let bin = match op {
                AssignOp::Add => BinOp::Add,
                AssignOp::Sub => BinOp::Sub,
                AssignOp::Mul => BinOp::Mul,
                AssignOp::Div => BinOp::Div,
                AssignOp::Mod => BinOp::Mod,
                AssignOp::Pow => BinOp::Pow,
                AssignOp::Set => unreachable!(),
            };
            self.arith(bin, &old, &rhs, loc)?
        };

        let value = if value.is_map() {
            if !self.traits.has(Traits::FLEXMAP) {
                return Err(self.rt_err(ErrKind::Perm, loc, "whole-map assignment is disabled"));
            }
            // Copy on store keeps map ownership acyclic.
            value.deep_copy()
        } else {
            value
        };

        self.write_lvalue(&lv, value.clone(), loc)?;
        Ok(value)
    }

    fn eval_binary(&mut self, op: BinOp, l: &Expr, r: &Expr, loc: &Loc) -> Exec<Value> {
        match op {
            BinOp::And => {
                let a = self.eval_expr(l)?;
                if !a.is_truthy() {
                    return Ok(Value::Int(0));
                }
                let b = self.eval_expr(r)?;
                Ok(Value::Int(b.is_truthy() as i64))
            }
            BinOp::Or => {
                let a = self.eval_expr(l)?;
                if a.is_truthy() {
                    return Ok(Value::Int(1));
                }
                let b = self.eval_expr(r)?;
                Ok(Value::Int(b.is_truthy() as i64))
            }
            BinOp::MatchOp | BinOp::NotMatchOp => {
                let subject = {
                    let v = self.eval_expr(l)?;
                    self.val_to_str(&v, loc)?
                };
                let rex = self.rex_operand(r)?;
                let hit = rex
                    .is_match(&subject, false)
                    .map_err(|e| note_err(&self.gem, e))?;
                let hit = if op == BinOp::NotMatchOp { !hit } else { hit };
                Ok(Value::Int(hit as i64))
            }
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => {
                let a = self.eval_expr(l)?;
                let b = self.eval_expr(r)?;
                let ord = a
                    .cmp_with(&b, &self.convfmt(), self.traits.has(Traits::NCMPONSTR))
                    .map_err(|k| self.rt_err(k, loc, "values are not comparable"))?;
                let hit = match op {
                    BinOp::Eq => ord == std::cmp::Ordering::Equal,
                    BinOp::Ne => ord != std::cmp::Ordering::Equal,
                    BinOp::Lt => ord == std::cmp::Ordering::Less,
                    BinOp::Gt => ord == std::cmp::Ordering::Greater,
                    BinOp::Le => ord != std::cmp::Ordering::Greater,
                    BinOp::Ge => ord != std::cmp::Ordering::Less,
                    _ => unreachable!(),
                };
                Ok(Value::Int(hit as i64))
            }
            BinOp::TEq | BinOp::TNe => {
                let a = self.eval_expr(l)?;
                let b = self.eval_expr(r)?;
                let hit = a.strict_eq(&b);
                let hit = if op == BinOp::TNe { !hit } else { hit };
                Ok(Value::Int(hit as i64))
            }
            _ => {
                let a = self.eval_expr(l)?;
                let b = self.eval_expr(r)?;
                self.arith(op, &a, &b, loc)
            }
        }
    }

    /// The regex for a match operand: a literal node as-is, anything
    /// else built from its string value.
    pub(crate) fn rex_operand(&mut self, e: &Expr) -> Exec<Rc<Rex>> {
        if let Expr::Rex(re) = e {
            return Ok(re.clone());
        }
        let v = self.eval_expr(e)?;
        let pat = self.val_to_str(&v, &e.loc())?;
        Ok(Rc::new(Rex::new(&pat, self.traits.has(Traits::REXBOUND))))
    }

    pub(crate) fn arith(&mut self, op: BinOp, l: &Value, r: &Value, loc: &Loc) -> Exec<Value> {
        let a = self.val_to_num(l, loc)?;
        let b = self.val_to_num(r, loc)?;

        match op {
            BinOp::Add => Ok(int_or_flt(a, b, i64::checked_add, |x, y| x + y)),
            BinOp::Sub => Ok(int_or_flt(a, b, i64::checked_sub, |x, y| x - y)),
            BinOp::Mul => Ok(int_or_flt(a, b, i64::checked_mul, |x, y| x * y)),
            BinOp::Div => {
                if b.as_flt() == 0.0 {
                    return self.arith_error(loc, "division by zero");
                }
                match (a, b) {
                    (Num::Int(x), Num::Int(y)) if x % y == 0 => Ok(Value::Int(x / y)),
                    _ => Ok(Value::Flt(a.as_flt() / b.as_flt())),
                }
            }
            BinOp::Mod => {
                if b.as_flt() == 0.0 {
                    return self.arith_error(loc, "modulo by zero");
                }
                match (a, b) {
                    (Num::Int(x), Num::Int(y)) => Ok(Value::Int(x.wrapping_rem(y))),
                    _ => Ok(Value::Flt(a.as_flt() % b.as_flt())),
                }
            }
            BinOp::Pow => match (a, b) {
                (Num::Int(x), Num::Int(y)) if (0..=u32::MAX as i64).contains(&y) => {
                    match x.checked_pow(y as u32) {
                        Some(v) => Ok(Value::Int(v)),
                        None => Ok(Value::Flt((x as f64).powf(y as f64))),
                    }
                }
                _ => Ok(Value::Flt(a.as_flt().powf(b.as_flt()))),
            },
            other => Err(self.rt_err(
                ErrKind::Intern,
                loc,
                format!("{:?} is not an arithmetic operator", other),
            )),
        }
    }

    fn arith_error(&mut self, loc: &Loc, msg: &str) -> Exec<Value> {
        let err = self.rt_err(ErrKind::Inval, loc, msg);
        if self.traits.has(Traits::TOLERANT) {
            // Recoverable: the statement continues with nil.
            Ok(Value::Nil)
        } else {
            Err(err)
        }
    }

    pub(crate) fn concat_vals(&mut self, a: Value, b: Value, loc: &Loc) -> Exec<Value> {
        if matches!(a, Value::Mbs(_)) || matches!(b, Value::Mbs(_)) {
            let fmt = self.convfmt();
            let x = a.to_mbs(&fmt).map_err(|k| self.rt_err(k, loc, "not convertible to bytes"))?;
            let y = b.to_mbs(&fmt).map_err(|k| self.rt_err(k, loc, "not convertible to bytes"))?;
            let mut out = Vec::with_capacity(x.len() + y.len());
            out.extend_from_slice(&x);
            out.extend_from_slice(&y);
            return Ok(Value::Mbs(Rc::from(out.as_slice())));
        }
        let x = self.val_to_str(&a, loc)?;
        let y = self.val_to_str(&b, loc)?;
        let mut s = String::with_capacity(x.len() + y.len());
        s.push_str(&x);
        s.push_str(&y);
        Ok(Value::Str(Rc::from(s.as_str())))
    }

    // ── Calls ────────────────────────────────────────────────

    pub(crate) fn call_function(
        &mut self,
        name: &str,
        args: &[Expr],
        loc: &Loc,
        hops: usize,
    ) -> Exec<Value> {
        self.check_halt()?;

        if let Some(f) = self.program.functions.get(name).cloned() {
            let mut slots = Vec::with_capacity(f.params.len());
            for (i, (_, mode)) in f.params.iter().enumerate() {
                if i >= args.len() {
                    slots.push(Slot::Val(Value::Nil));
                } else if *mode == ParamMode::Ref {
                    let lv = self.resolve_lvalue(&args[i])?;
                    slots.push(Slot::Ref(lv));
                } else {
                    slots.push(Slot::Val(self.eval_expr(&args[i])?));
                }
            }
            return self.call_frame(&f, slots);
        }

        if let Some(spec) = find_builtin(name) {
            if args.len() < spec.min_args || args.len() > spec.max_args {
                return Err(self.rt_err(
                    ErrKind::Inval,
                    loc,
                    format!("wrong number of arguments to {}", name),
                ));
            }
            return (spec.handler)(self, args, loc);
        }

        if let Some((module, sym)) = name.split_once("::") {
            let mut vals = Vec::with_capacity(args.len());
            for a in args {
                vals.push(self.eval_expr(a)?);
            }
            return self.call_module(module, sym, &vals, loc);
        }

        // Indirect call through a variable holding the function name.
        if hops == 0 {
            let held = self
                .named
                .get(name)
                .cloned()
                .or_else(|| {
                    self.program
                        .globals
                        .iter()
                        .position(|g| &**g == name)
                        .map(|i| self.globals[i].clone())
                });
            if let Some(v) = held {
                let target = self.val_to_str(&v, loc)?;
                if !target.is_empty() && &*target != name {
                    return self.call_function(&target, args, loc, hops + 1);
                }
            }
        }

        Err(self.rt_err(ErrKind::Noent, loc, format!("function {} is not defined", name)))
    }

    fn call_module(
        &mut self,
        module: &str,
        sym: &str,
        args: &[Value],
        loc: &Loc,
    ) -> Exec<Value> {
        let lib = {
            let mut host = self.modules.borrow_mut();
            host.get_or_load(module)
                .map_err(|e| note_err(&self.gem, e.at(loc)))?
        };
        {
            let mut host = self.modules.borrow_mut();
            host.ensure_rtx_init(module, self.rtx_id);
        }
        match lib.query(sym) {
            Some(crate::module::ModSym::Func { min_args, max_args }) => {
                if args.len() < min_args || args.len() > max_args {
                    return Err(self.rt_err(
                        ErrKind::Inval,
                        loc,
                        format!("wrong number of arguments to {}::{}", module, sym),
                    ));
                }
                lib.call(sym, self, args).map_err(|e| note_err(&self.gem, e.at(loc)).into())
            }
            Some(crate::module::ModSym::IntConst(i)) => Ok(Value::Int(i)),
            Some(crate::module::ModSym::FltConst(f)) => Ok(Value::Flt(f)),
            None => Err(self.rt_err(
                ErrKind::Modnonm,
                loc,
                format!("{}::{} is not exported", module, sym),
            )),
        }
    }

    // ── Getline ──────────────────────────────────────────────

    fn do_getline(
        &mut self,
        var: &Option<Box<Expr>>,
        src: &GetlineSrc,
        loc: &Loc,
    ) -> Exec<Value> {
        match src {
            GetlineSrc::Console => match self.console_getline_record() {
                Ok(Some(rec)) => {
                    self.getline_store(var, &rec, loc)?;
                    Ok(Value::Int(1))
                }
                Ok(None) => Ok(Value::Int(0)),
                Err(Signal::Error(e)) => {
                    note_err(&self.gem, e);
                    Ok(Value::Int(-1))
                }
                Err(flow) => Err(flow),
            },
            GetlineSrc::File(e) => self.getline_channel(ChanClass::FileRead, e, var, false, loc),
            GetlineSrc::Pipe(e) => self.getline_channel(ChanClass::PipeRead, e, var, true, loc),
            GetlineSrc::RwPipe(e) => self.getline_channel(ChanClass::RwPipe, e, var, true, loc),
        }
    }

    fn getline_channel(
        &mut self,
        class: ChanClass,
        name_expr: &Expr,
        var: &Option<Box<Expr>>,
        bump_nr: bool,
        loc: &Loc,
    ) -> Exec<Value> {
        let v = self.eval_expr(name_expr)?;
        let name = self.val_to_str(&v, loc)?;
        let rs = self.rs_mode();
        match self.rio.read_record(class, &name, &rs) {
            Ok(Some((rec, rt))) => {
                self.globals[gbl::RT] = Value::str_from(&rt);
                if bump_nr {
                    let nr = self.globals[gbl::NR].to_int(true).unwrap_or(0);
                    self.globals[gbl::NR] = Value::Int(nr + 1);
                }
                self.getline_store(var, &rec, loc)?;
                Ok(Value::Int(1))
            }
            Ok(None) => Ok(Value::Int(0)),
            Err(e) => {
                // Open and read failures yield -1 with the error noted.
                note_err(&self.gem, e.at(loc));
                Ok(Value::Int(-1))
            }
        }
    }

    fn getline_store(&mut self, var: &Option<Box<Expr>>, rec: &str, loc: &Loc) -> Exec<()> {
        match var {
            None => self.set_record(rec),
            Some(target) => {
                let lv = self.resolve_lvalue(target)?;
                let v = self.field_value(rec);
                self.write_lvalue(&lv, v, loc)
            }
        }
    }
}

/// Integer arithmetic when both operands are integers and the checked
/// operation fits, floating point otherwise.
fn int_or_flt(
    a: Num,
    b: Num,
    int_op: fn(i64, i64) -> Option<i64>,
    flt_op: fn(f64, f64) -> f64,
) -> Value {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => match int_op(x, y) {
            Some(v) => Value::Int(v),
            None => Value::Flt(flt_op(x as f64, y as f64)),
        },
        _ => Value::Flt(flt_op(a.as_flt(), b.as_flt())),
    }
}

#[cfg(test)]
mod tests {
    use crate::rtx::tests::run_program;

    #[test]
    fn test_arithmetic() {
        let (out, _) = run_program("BEGIN { print 1 + 2 * 3, 2 ^ 10, 7 % 3, -4 }", "");
        assert_eq!(out, "7 1024 1 -4\n");
    }

    #[test]
    fn test_integer_division_stays_exact() {
        let (out, _) = run_program("BEGIN { print 10 / 2, 7 / 2 }", "");
        assert_eq!(out, "5 3.5\n");
    }

    #[test]
    fn test_division_by_zero_fails() {
        let mut ok = std::panic::catch_unwind(|| run_program("BEGIN { print 1 / 0 }", ""));
        assert!(ok.is_err());
        ok = std::panic::catch_unwind(|| run_program("BEGIN { print 1 % 0 }", ""));
        assert!(ok.is_err());
    }

    #[test]
    fn test_tolerant_division_by_zero_continues() {
        let (out, _) = run_program(
            "@pragma tolerant on\nBEGIN { x = 1 / 0; print \"after\", x \"\" }",
            "",
        );
        assert_eq!(out, "after \n");
    }

    #[test]
    fn test_string_numeric_comparison() {
        let (out, _) = run_program(
            "BEGIN { print (\"3\" < \"10\"), (3 < 10), (\"abc\" < \"abd\") }",
            "",
        );
        // Plain strings collate; numbers compare numerically.
        assert_eq!(out, "0 1 1\n");
    }

    #[test]
    fn test_strict_equality() {
        let (out, _) = run_program("BEGIN { print (1 == \"1\"), (1 === \"1\"), (1 !== 2) }", "");
        assert_eq!(out, "1 0 1\n");
    }

    #[test]
    fn test_ternary_and_logic() {
        let (out, _) = run_program("BEGIN { print 1 && 2, 0 || 3, !0, (5 > 3 ? \"y\" : \"n\") }", "");
        assert_eq!(out, "1 1 1 y\n");
    }

    #[test]
    fn test_concat() {
        let (out, _) = run_program("BEGIN { x = \"a\" 1 + 1; print x }", "");
        assert_eq!(out, "a2\n");
    }

    #[test]
    fn test_incdec() {
        let (out, _) = run_program("BEGIN { i = 5; print i++, i, ++i, i--, i }", "");
        assert_eq!(out, "5 6 7 7 6\n");
    }

    #[test]
    fn test_match_operators() {
        let (out, _) = run_program("{ print ($0 ~ /o/), ($0 !~ /z/) }", "foo\n");
        assert_eq!(out, "1 1\n");
    }

    #[test]
    fn test_dynamic_regex_from_string() {
        let (out, _) = run_program("BEGIN { r = \"^a+$\"; print (\"aaa\" ~ r) }", "");
        assert_eq!(out, "1\n");
    }

    #[test]
    fn test_bare_regex_matches_record() {
        let (out, _) = run_program("{ if (/x/) print \"hit\" }", "axb\n");
        assert_eq!(out, "hit\n");
    }

    #[test]
    fn test_array_subscripts_and_subsep() {
        let (out, _) = run_program(
            "BEGIN { a[1, 2] = \"v\"; print ((1, 2) in a), ((1 SUBSEP 2) in a), ((9, 9) in a) }",
            "",
        );
        assert_eq!(out, "1 1 0\n");
    }

    #[test]
    fn test_uninitialized_reads_as_nil() {
        let (out, _) = run_program("BEGIN { print \"[\" u \"]\", u + 0 }", "");
        assert_eq!(out, "[] 0\n");
    }

    #[test]
    fn test_scalar_as_array_fails() {
        let caught = std::panic::catch_unwind(|| {
            run_program("BEGIN { x = 1; x[1] = 2 }", "")
        });
        assert!(caught.is_err());
    }

    #[test]
    fn test_ref_parameter_writes_through() {
        let (out, _) = run_program(
            "function bump(&x) { x = x + 1 } BEGIN { n = 5; bump(n); print n }",
            "",
        );
        assert_eq!(out, "6\n");
    }

    #[test]
    fn test_array_passed_by_handle() {
        let (out, _) = run_program(
            "function fill(arr) { arr[\"k\"] = 1 } BEGIN { fill(a); print a[\"k\"] }",
            "",
        );
        assert_eq!(out, "1\n");
    }

    #[test]
    fn test_whole_map_assignment_copies() {
        let (out, _) = run_program(
            "BEGIN { a[\"k\"] = 1; b = a; b[\"k\"] = 2; print a[\"k\"], b[\"k\"] }",
            "",
        );
        assert_eq!(out, "1 2\n");
    }

    #[test]
    fn test_indirect_call_by_variable() {
        let (out, _) = run_program(
            "function hello() { return \"hi\" } BEGIN { f = \"hello\"; print f() }",
            "",
        );
        assert_eq!(out, "hi\n");
    }

    #[test]
    fn test_getline_var_from_file_leaves_nr() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("hawk-getline-test-{}.txt", std::process::id()));
        std::fs::write(&path, "f1\nf2\n").unwrap();
        let file = path.to_string_lossy().to_string();
        let src = format!(
            "BEGIN {{ while ((getline line < \"{}\") > 0) n++; print n, NR }}",
            file
        );
        let (out, _) = run_program(&src, "");
        assert_eq!(out, "2 0\n");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_getline_missing_file_returns_minus_one() {
        let (out, _) = run_program(
            "BEGIN { r = (getline x < \"/nonexistent/hawk\"); print r }",
            "",
        );
        assert_eq!(out, "-1\n");
    }

    #[test]
    fn test_getline_console_var() {
        let (out, _) = run_program(
            "NR == 1 { getline peeked; print \"first=\" $0, \"peeked=\" peeked }",
            "one\ntwo\nthree\n",
        );
        // The peek consumed record two; record three still runs rules.
        assert!(out.contains("first=one peeked=two"));
    }
}
