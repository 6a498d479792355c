/// Built-in Functions
///
/// Table-driven intrinsics. Each entry carries its arity bounds and an
/// argument-mode string: `v` is by-value, `r` is a reference the
/// function writes through (`sub`, `gsub`, `split`). Handlers evaluate
/// their own arguments so reference arguments resolve as lvalues. The
/// printf engine here also backs the `printf` statement and `OFMT`
/// style conversions.

use std::rc::Rc;

use rand::Rng;

use crate::error::{ErrKind, Loc};
use crate::gem::note_err;
use crate::rtx::{Exec, Lvalue, Rtx};
use crate::types::{gbl, Expr};
use crate::value::{format_g, Value};

// ─── Registry ────────────────────────────────────────────────

type Handler = fn(&mut Rtx, &[Expr], &Loc) -> Exec<Value>;

pub struct BuiltinSpec {
    pub name: &'static str,
    pub min_args: usize,
    pub max_args: usize,
    pub arg_spec: &'static str,
    pub handler: Handler,
}

/// Sorted by name for binary search.
static BUILTINS: &[BuiltinSpec] = &[
    BuiltinSpec { name: "atan2", min_args: 2, max_args: 2, arg_spec: "vv", handler: bi_atan2 },
    BuiltinSpec { name: "close", min_args: 1, max_args: 2, arg_spec: "vv", handler: bi_close },
    BuiltinSpec { name: "cos", min_args: 1, max_args: 1, arg_spec: "v", handler: bi_cos },
    BuiltinSpec { name: "exp", min_args: 1, max_args: 1, arg_spec: "v", handler: bi_exp },
    BuiltinSpec { name: "fflush", min_args: 0, max_args: 1, arg_spec: "v", handler: bi_fflush },
    BuiltinSpec { name: "gensub", min_args: 3, max_args: 4, arg_spec: "vvvv", handler: bi_gensub },
    BuiltinSpec { name: "getioattr", min_args: 2, max_args: 2, arg_spec: "vv", handler: bi_getioattr },
    BuiltinSpec { name: "gsub", min_args: 2, max_args: 3, arg_spec: "vvr", handler: bi_gsub },
    BuiltinSpec { name: "index", min_args: 2, max_args: 2, arg_spec: "vv", handler: bi_index },
    BuiltinSpec { name: "int", min_args: 1, max_args: 1, arg_spec: "v", handler: bi_int },
    BuiltinSpec { name: "length", min_args: 0, max_args: 1, arg_spec: "v", handler: bi_length },
    BuiltinSpec { name: "log", min_args: 1, max_args: 1, arg_spec: "v", handler: bi_log },
    BuiltinSpec { name: "match", min_args: 2, max_args: 2, arg_spec: "vv", handler: bi_match },
    BuiltinSpec { name: "rand", min_args: 0, max_args: 0, arg_spec: "", handler: bi_rand },
    BuiltinSpec { name: "setioattr", min_args: 3, max_args: 3, arg_spec: "vvv", handler: bi_setioattr },
    BuiltinSpec { name: "sin", min_args: 1, max_args: 1, arg_spec: "v", handler: bi_sin },
    BuiltinSpec { name: "split", min_args: 2, max_args: 3, arg_spec: "vrv", handler: bi_split },
    BuiltinSpec { name: "sprintf", min_args: 1, max_args: 64, arg_spec: "v", handler: bi_sprintf },
    BuiltinSpec { name: "sqrt", min_args: 1, max_args: 1, arg_spec: "v", handler: bi_sqrt },
    BuiltinSpec { name: "srand", min_args: 0, max_args: 1, arg_spec: "v", handler: bi_srand },
    BuiltinSpec { name: "sub", min_args: 2, max_args: 3, arg_spec: "vvr", handler: bi_sub },
    BuiltinSpec { name: "substr", min_args: 2, max_args: 3, arg_spec: "vvv", handler: bi_substr },
    BuiltinSpec { name: "system", min_args: 1, max_args: 1, arg_spec: "v", handler: bi_system },
    BuiltinSpec { name: "tolower", min_args: 1, max_args: 1, arg_spec: "v", handler: bi_tolower },
    BuiltinSpec { name: "toupper", min_args: 1, max_args: 1, arg_spec: "v", handler: bi_toupper },
];

pub fn find_builtin(name: &str) -> Option<&'static BuiltinSpec> {
    BUILTINS
        .binary_search_by(|spec| spec.name.cmp(name))
        .ok()
        .map(|i| &BUILTINS[i])
}

// ─── Shared helpers ──────────────────────────────────────────

impl Rtx {
    fn arg_str(&mut self, args: &[Expr], i: usize, loc: &Loc) -> Exec<Rc<str>> {
        let v = self.eval_expr(&args[i])?;
        self.val_to_str(&v, loc)
    }

    fn arg_flt(&mut self, args: &[Expr], i: usize, loc: &Loc) -> Exec<f64> {
        let v = self.eval_expr(&args[i])?;
        self.val_to_flt(&v, loc)
    }

    fn arg_int(&mut self, args: &[Expr], i: usize, loc: &Loc) -> Exec<i64> {
        let v = self.eval_expr(&args[i])?;
        self.val_to_int(&v, loc)
    }
}

fn flt(v: f64) -> Exec<Value> {
    Ok(Value::Flt(v))
}

// ─── Numeric functions ───────────────────────────────────────

fn bi_sin(rtx: &mut Rtx, args: &[Expr], loc: &Loc) -> Exec<Value> {
    let x = rtx.arg_flt(args, 0, loc)?;
    flt(x.sin())
}

fn bi_cos(rtx: &mut Rtx, args: &[Expr], loc: &Loc) -> Exec<Value> {
    let x = rtx.arg_flt(args, 0, loc)?;
    flt(x.cos())
}

fn bi_atan2(rtx: &mut Rtx, args: &[Expr], loc: &Loc) -> Exec<Value> {
    let y = rtx.arg_flt(args, 0, loc)?;
    let x = rtx.arg_flt(args, 1, loc)?;
    flt(y.atan2(x))
}

fn bi_exp(rtx: &mut Rtx, args: &[Expr], loc: &Loc) -> Exec<Value> {
    let x = rtx.arg_flt(args, 0, loc)?;
    flt(x.exp())
}

fn bi_log(rtx: &mut Rtx, args: &[Expr], loc: &Loc) -> Exec<Value> {
    let x = rtx.arg_flt(args, 0, loc)?;
    flt(x.ln())
}

fn bi_sqrt(rtx: &mut Rtx, args: &[Expr], loc: &Loc) -> Exec<Value> {
    let x = rtx.arg_flt(args, 0, loc)?;
    flt(x.sqrt())
}

fn bi_int(rtx: &mut Rtx, args: &[Expr], loc: &Loc) -> Exec<Value> {
    let v = rtx.arg_int(args, 0, loc)?;
    Ok(Value::Int(v))
}

fn bi_rand(rtx: &mut Rtx, _args: &[Expr], _loc: &Loc) -> Exec<Value> {
    Ok(Value::Flt(rtx.rng.gen::<f64>()))
}

fn bi_srand(rtx: &mut Rtx, args: &[Expr], loc: &Loc) -> Exec<Value> {
    use rand::SeedableRng;
    let prev = rtx.rng_prev_seed;
    let seed = if args.is_empty() {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    } else {
        rtx.arg_int(args, 0, loc)? as u64
    };
    rtx.rng = rand::rngs::StdRng::seed_from_u64(seed);
    rtx.rng_prev_seed = seed;
    Ok(Value::Int(prev as i64))
}

// ─── String functions ────────────────────────────────────────

fn bi_length(rtx: &mut Rtx, args: &[Expr], loc: &Loc) -> Exec<Value> {
    if args.is_empty() {
        return Ok(Value::Int(rtx.record.chars().count() as i64));
    }
    let v = rtx.eval_expr(&args[0])?;
    let n = match &v {
        Value::Map(m) => m.borrow().len() as i64,
        Value::Mbs(b) => b.len() as i64,
        other => rtx.val_to_str(other, loc)?.chars().count() as i64,
    };
    Ok(Value::Int(n))
}

fn bi_substr(rtx: &mut Rtx, args: &[Expr], loc: &Loc) -> Exec<Value> {
    let s = rtx.arg_str(args, 0, loc)?;
    let chars: Vec<char> = s.chars().collect();
    let m = rtx.arg_int(args, 1, loc)?;

    let start = m.max(1);
    let from = (start - 1) as usize;
    let end = if args.len() > 2 {
        let n = rtx.arg_int(args, 2, loc)?;
        // The count is relative to the requested start, which may lie
        // left of the string.
        (m + n.max(0) - 1).max(0) as usize
    } else {
        chars.len()
    };

    if from >= chars.len() || end <= from {
        return Ok(Value::str_from(""));
    }
    let end = end.min(chars.len());
    let out: String = chars[from..end].iter().collect();
    Ok(Value::str_from(&out))
}

fn bi_index(rtx: &mut Rtx, args: &[Expr], loc: &Loc) -> Exec<Value> {
    let s = rtx.arg_str(args, 0, loc)?;
    let t = rtx.arg_str(args, 1, loc)?;
    match s.find(&*t) {
        Some(byte_pos) => {
            let pos = s[..byte_pos].chars().count() as i64 + 1;
            Ok(Value::Int(pos))
        }
        None => Ok(Value::Int(0)),
    }
}

fn bi_tolower(rtx: &mut Rtx, args: &[Expr], loc: &Loc) -> Exec<Value> {
    let s = rtx.arg_str(args, 0, loc)?;
    Ok(Value::str_from(&s.to_lowercase()))
}

fn bi_toupper(rtx: &mut Rtx, args: &[Expr], loc: &Loc) -> Exec<Value> {
    let s = rtx.arg_str(args, 0, loc)?;
    Ok(Value::str_from(&s.to_uppercase()))
}

/// Sets RSTART/RLENGTH and returns whether the pattern matched.
fn bi_match(rtx: &mut Rtx, args: &[Expr], loc: &Loc) -> Exec<Value> {
    let s = rtx.arg_str(args, 0, loc)?;
    let rex = rtx.rex_operand(&args[1])?;
    match rex.match_first(&s, false).map_err(|e| note_err(&rtx.gem, e))? {
        Some((start, len)) => {
            rtx.globals[gbl::RSTART] = Value::Int(start as i64 + 1);
            rtx.globals[gbl::RLENGTH] = Value::Int(len as i64);
            Ok(Value::Int(1))
        }
        None => {
            rtx.globals[gbl::RSTART] = Value::Int(0);
            rtx.globals[gbl::RLENGTH] = Value::Int(-1);
            Ok(Value::Int(0))
        }
    }
}

/// Expand `&` (the matched text) and backslash escapes in a sub/gsub
/// replacement.
fn expand_ampersand(repl: &str, matched: &str) -> String {
    let mut out = String::with_capacity(repl.len());
    let mut chars = repl.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('&') => out.push('&'),
                Some('\\') => out.push('\\'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            },
            '&' => out.push_str(matched),
            other => out.push(other),
        }
    }
    out
}

fn substitute(
    rtx: &mut Rtx,
    args: &[Expr],
    loc: &Loc,
    all: bool,
) -> Exec<Value> {
    let rex = rtx.rex_operand(&args[0])?;
    let repl = rtx.arg_str(args, 1, loc)?;
    let lv = if args.len() > 2 {
        rtx.resolve_lvalue(&args[2])?
    } else {
        Lvalue::Field(0)
    };

    let subject_val = rtx.read_lvalue(&lv, loc)?;
    let subject = rtx.val_to_str(&subject_val, loc)?;

    let mut out = String::with_capacity(subject.len());
    let mut pos = 0usize;
    let mut count = 0i64;

    loop {
        match rex.find_from(&subject, pos, false).map_err(|e| note_err(&rtx.gem, e))? {
            Some((start, end)) => {
                out.push_str(&subject[pos..start]);
                out.push_str(&expand_ampersand(&repl, &subject[start..end]));
                count += 1;
                if start == end {
                    // Empty match: copy one character and move on.
                    match subject[end..].chars().next() {
                        Some(c) => {
                            out.push(c);
                            pos = end + c.len_utf8();
                        }
                        None => {
                            pos = end;
                            break;
                        }
                    }
                } else {
                    pos = end;
                }
                if !all {
                    break;
                }
                if pos >= subject.len() {
                    break;
                }
            }
            None => break,
        }
    }
    out.push_str(&subject[pos..]);

    if count > 0 {
        rtx.write_lvalue(&lv, Value::str_from(&out), loc)?;
    }
    Ok(Value::Int(count))
}

fn bi_sub(rtx: &mut Rtx, args: &[Expr], loc: &Loc) -> Exec<Value> {
    substitute(rtx, args, loc, false)
}

fn bi_gsub(rtx: &mut Rtx, args: &[Expr], loc: &Loc) -> Exec<Value> {
    substitute(rtx, args, loc, true)
}

fn bi_gensub(rtx: &mut Rtx, args: &[Expr], loc: &Loc) -> Exec<Value> {
    let rex = rtx.rex_operand(&args[0])?;
    let repl = rtx.arg_str(args, 1, loc)?;
    let how = rtx.arg_str(args, 2, loc)?;
    let subject = if args.len() > 3 {
        rtx.arg_str(args, 3, loc)?
    } else {
        Rc::from(rtx.record.as_str())
    };

    let all = how.trim() == "g" || how.trim() == "G";
    let nth: i64 = if all {
        0
    } else {
        match crate::value::str_to_num(&how, true) {
            crate::value::Num::Int(i) if i >= 1 => i,
            crate::value::Num::Flt(f) if f >= 1.0 => f as i64,
            _ => 1,
        }
    };

    let re = rex.compiled(false).map_err(|e| note_err(&rtx.gem, e))?;
    let mut out = String::with_capacity(subject.len());
    let mut pos = 0usize;
    let mut seen = 0i64;

    while let Some(caps) = re.captures_at(&subject, pos) {
        let m = caps.get(0).expect("group 0 always present");
        seen += 1;
        let replace_this = all || seen == nth;
        out.push_str(&subject[pos..m.start()]);
        if replace_this {
            out.push_str(&expand_gensub(&repl, &caps, &subject));
        } else {
            out.push_str(m.as_str());
        }
        if m.start() == m.end() {
            match subject[m.end()..].chars().next() {
                Some(c) => {
                    out.push(c);
                    pos = m.end() + c.len_utf8();
                }
                None => {
                    pos = m.end();
                    break;
                }
            }
        } else {
            pos = m.end();
        }
        if pos >= subject.len() {
            break;
        }
    }
    out.push_str(&subject[pos..]);
    Ok(Value::str_from(&out))
}

/// Expand `\0`..`\9` capture references and `&` in a gensub
/// replacement.
fn expand_gensub(repl: &str, caps: &regex_lite::Captures, subject: &str) -> String {
    let whole = caps.get(0).map(|m| &subject[m.start()..m.end()]).unwrap_or("");
    let mut out = String::with_capacity(repl.len());
    let mut chars = repl.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(d @ '0'..='9') => {
                    let idx = d as usize - '0' as usize;
                    if let Some(g) = caps.get(idx) {
                        out.push_str(g.as_str());
                    }
                }
                Some('&') => out.push('&'),
                Some('\\') => out.push('\\'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            },
            '&' => out.push_str(whole),
            other => out.push(other),
        }
    }
    out
}

fn bi_split(rtx: &mut Rtx, args: &[Expr], loc: &Loc) -> Exec<Value> {
    let s = rtx.arg_str(args, 0, loc)?;

    let map = match &args[1] {
        Expr::Var { name, scope, loc } => rtx
            .map_at_scope(*scope, name, true, loc)?
            .expect("map creation requested"),
        other => {
            return Err(rtx.rt_err(ErrKind::Inval, &other.loc(), "split needs an array variable"))
        }
    };
    map.borrow_mut().clear();

    let raw: Vec<String> = if s.is_empty() {
        Vec::new()
    } else {
        match args.get(2) {
            None => {
                let fs_val = rtx.globals[gbl::FS].clone();
                let fs = rtx.val_to_str(&fs_val, loc)?.to_string();
                let rex = rtx.fs_rex()?;
                crate::rtx::fields::split_by_fs(&s, &fs, rex.as_deref())?
            }
            Some(Expr::Rex(re)) => re
                .split(&s, false)
                .map_err(|e| note_err(&rtx.gem, e))?
                .into_iter()
                .map(|p| p.to_string())
                .collect(),
            Some(e) => {
                let fs = rtx.arg_str(args, 2, &e.loc())?.to_string();
                if fs == " " || fs.chars().count() <= 1 {
                    crate::rtx::fields::split_by_fs(&s, &fs, None)?
                } else {
                    let re = crate::rex::Rex::new(&fs, true);
                    re.split(&s, false)
                        .map_err(|e| note_err(&rtx.gem, e))?
                        .into_iter()
                        .map(|p| p.to_string())
                        .collect()
                }
            }
        }
    };

    let n = raw.len();
    {
        let mut m = map.borrow_mut();
        for (i, piece) in raw.iter().enumerate() {
            m.insert((i + 1).to_string(), rtx.field_value(piece));
        }
    }
    Ok(Value::Int(n as i64))
}

// ─── I/O functions ───────────────────────────────────────────

fn bi_close(rtx: &mut Rtx, args: &[Expr], loc: &Loc) -> Exec<Value> {
    let name = rtx.arg_str(args, 0, loc)?;
    let which = if args.len() > 1 {
        Some(rtx.arg_str(args, 1, loc)?.to_string())
    } else {
        None
    };
    let r = rtx.rio.close_name(&name, which.as_deref());
    Ok(Value::Int(r))
}

fn bi_fflush(rtx: &mut Rtx, args: &[Expr], loc: &Loc) -> Exec<Value> {
    let name = if args.is_empty() {
        None
    } else {
        Some(rtx.arg_str(args, 0, loc)?.to_string())
    };
    match rtx.rio.flush(name.as_deref()) {
        Ok(()) => Ok(Value::Int(0)),
        Err(e) => {
            note_err(&rtx.gem, e.at(loc));
            Ok(Value::Int(-1))
        }
    }
}

fn bi_system(rtx: &mut Rtx, args: &[Expr], loc: &Loc) -> Exec<Value> {
    let cmd = rtx.arg_str(args, 0, loc)?;
    let _ = rtx.rio.flush(None);
    match std::process::Command::new("/bin/sh").arg("-c").arg(&*cmd).status() {
        Ok(status) => Ok(Value::Int(status.code().unwrap_or(-1) as i64)),
        Err(e) => {
            note_err(
                &rtx.gem,
                crate::error::HawkError::new(ErrKind::Syserr, loc.clone(), e.to_string()),
            );
            Ok(Value::Int(-1))
        }
    }
}

fn bi_setioattr(rtx: &mut Rtx, args: &[Expr], loc: &Loc) -> Exec<Value> {
    let name = rtx.arg_str(args, 0, loc)?;
    let attr = rtx.arg_str(args, 1, loc)?;
    let value = rtx.arg_flt(args, 2, loc)?;
    match rtx.rio.set_attr(&name, &attr, value) {
        Ok(()) => Ok(Value::Int(0)),
        Err(e) => {
            note_err(&rtx.gem, e.at(loc));
            Ok(Value::Int(-1))
        }
    }
}

fn bi_getioattr(rtx: &mut Rtx, args: &[Expr], loc: &Loc) -> Exec<Value> {
    let name = rtx.arg_str(args, 0, loc)?;
    let attr = rtx.arg_str(args, 1, loc)?;
    match rtx.rio.get_attr(&name, &attr) {
        Ok(v) => {
            if v.fract() == 0.0 {
                Ok(Value::Int(v as i64))
            } else {
                Ok(Value::Flt(v))
            }
        }
        Err(e) => {
            note_err(&rtx.gem, e.at(loc));
            Ok(Value::Int(-1))
        }
    }
}

// ─── printf engine ───────────────────────────────────────────

fn bi_sprintf(rtx: &mut Rtx, args: &[Expr], loc: &Loc) -> Exec<Value> {
    let fmt = rtx.arg_str(args, 0, loc)?;
    let mut vals = Vec::with_capacity(args.len() - 1);
    for a in &args[1..] {
        let v = rtx.eval_expr(a)?;
        vals.push(v);
    }
    let out = rtx.format_values(&fmt, &vals, loc)?;
    Ok(Value::str_from(&out))
}

fn pad(s: String, width: &str, left: bool) -> String {
    if width.is_empty() {
        return s;
    }
    let w: usize = width.parse().unwrap_or(0);
    if left {
        format!("{:<width$}", s, width = w)
    } else {
        format!("{:>width$}", s, width = w)
    }
}

fn pad_zero(digits: String, sign: &str, width: &str) -> String {
    let w: usize = width.parse().unwrap_or(0);
    let pad_len = w.saturating_sub(sign.len());
    format!("{}{:0>width$}", sign, digits, width = pad_len)
}

impl Rtx {
    /// Format a printf-style string against argument values.
    ///
    /// Specifiers: %s %c %d %i %f %e %E %g %G %x %X %o %%
    /// Flags: `-`, `+`, space, `0`; width and precision accept `*`.
    pub(crate) fn format_values(&mut self, fmt: &str, values: &[Value], loc: &Loc) -> Exec<String> {
        let mut value_idx = 0;
        let mut result = String::new();
        let chars: Vec<char> = fmt.chars().collect();
        let mut i = 0;

        while i < chars.len() {
            if chars[i] != '%' || i + 1 >= chars.len() {
                result.push(chars[i]);
                i += 1;
                continue;
            }

            let mut j = i + 1;
            let mut flags = String::new();
            let mut width = String::new();
            let mut precision = String::new();

            while j < chars.len() && "-+ #0".contains(chars[j]) {
                flags.push(chars[j]);
                j += 1;
            }

            if j < chars.len() && chars[j] == '*' {
                let w = match values.get(value_idx) {
                    Some(v) => self.val_to_int(v, loc)?,
                    None => 0,
                };
                if w < 0 {
                    flags.push('-');
                    width = (-w).to_string();
                } else {
                    width = w.to_string();
                }
                value_idx += 1;
                j += 1;
            } else {
                while j < chars.len() && chars[j].is_ascii_digit() {
                    width.push(chars[j]);
                    j += 1;
                }
            }

            if j < chars.len() && chars[j] == '.' {
                j += 1;
                if j < chars.len() && chars[j] == '*' {
                    let p = match values.get(value_idx) {
                        Some(v) => self.val_to_int(v, loc)?,
                        None => 0,
                    };
                    precision = p.max(0).to_string();
                    value_idx += 1;
                    j += 1;
                } else {
                    while j < chars.len() && chars[j].is_ascii_digit() {
                        precision.push(chars[j]);
                        j += 1;
                    }
                }
            }

            // Length modifiers are accepted and ignored.
            while j < chars.len() && "lhzj".contains(chars[j]) {
                j += 1;
            }

            if j >= chars.len() {
                result.extend(&chars[i..]);
                break;
            }

            let spec = chars[j];
            let left = flags.contains('-');
            let val = values.get(value_idx).cloned().unwrap_or(Value::Nil);

            match spec {
                's' => {
                    let mut s = self.val_to_str(&val, loc)?.to_string();
                    if !precision.is_empty() {
                        let prec: usize = precision.parse().unwrap_or(0);
                        s = s.chars().take(prec).collect();
                    }
                    result.push_str(&pad(s, &width, left));
                    value_idx += 1;
                }
                'c' => {
                    let c = match &val {
                        Value::Char(c) => *c,
                        Value::Bchr(b) => *b as char,
                        Value::Int(n) => char::from_u32(*n as u32).unwrap_or('\0'),
                        other => {
                            let s = self.val_to_str(other, loc)?;
                            s.chars().next().unwrap_or('\0')
                        }
                    };
                    result.push_str(&pad(c.to_string(), &width, left));
                    value_idx += 1;
                }
                'd' | 'i' => {
                    let num = self.val_to_int(&val, loc)?;
                    let is_negative = num < 0;
                    let mut digits = num.unsigned_abs().to_string();

                    if !precision.is_empty() {
                        let prec: usize = precision.parse().unwrap_or(0);
                        while digits.len() < prec {
                            digits.insert(0, '0');
                        }
                    }

                    let sign = if is_negative {
                        "-"
                    } else if flags.contains('+') {
                        "+"
                    } else if flags.contains(' ') {
                        " "
                    } else {
                        ""
                    };

                    let s = if !width.is_empty() && flags.contains('0') && precision.is_empty() && !left {
                        pad_zero(digits, sign, &width)
                    } else {
                        pad(format!("{}{}", sign, digits), &width, left)
                    };
                    result.push_str(&s);
                    value_idx += 1;
                }
                'x' | 'X' | 'o' => {
                    let num = self.val_to_int(&val, loc)?;
                    let mut digits = match spec {
                        'x' => format!("{:x}", num.unsigned_abs()),
                        'X' => format!("{:X}", num.unsigned_abs()),
                        _ => format!("{:o}", num.unsigned_abs()),
                    };
                    if !precision.is_empty() {
                        let prec: usize = precision.parse().unwrap_or(0);
                        while digits.len() < prec {
                            digits.insert(0, '0');
                        }
                    }
                    let sign = if num < 0 { "-" } else { "" };
                    let s = if !width.is_empty() && flags.contains('0') && precision.is_empty() && !left {
                        pad_zero(digits, sign, &width)
                    } else {
                        pad(format!("{}{}", sign, digits), &width, left)
                    };
                    result.push_str(&s);
                    value_idx += 1;
                }
                'f' => {
                    let num = self.val_to_flt(&val, loc)?;
                    let prec: usize = precision.parse().unwrap_or(6);
                    let s = format!("{:.prec$}", num);
                    result.push_str(&pad(s, &width, left));
                    value_idx += 1;
                }
                'e' | 'E' => {
                    let num = self.val_to_flt(&val, loc)?;
                    let prec: usize = precision.parse().unwrap_or(6);
                    let mut s = format!("{:.prec$e}", num);
                    if spec == 'E' {
                        s = s.to_uppercase();
                    }
                    result.push_str(&pad(s, &width, left));
                    value_idx += 1;
                }
                'g' | 'G' => {
                    let num = self.val_to_flt(&val, loc)?;
                    let prec: usize = precision.parse().unwrap_or(6);
                    let mut s = format_g(num, prec);
                    if spec == 'G' {
                        s = s.to_uppercase();
                    }
                    result.push_str(&pad(s, &width, left));
                    value_idx += 1;
                }
                '%' => result.push('%'),
                other => {
                    result.push('%');
                    result.push(other);
                }
            }
            i = j + 1;
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use crate::rtx::tests::run_program;

    #[test]
    fn test_length_variants() {
        let (out, _) = run_program(
            "BEGIN { a[1]=1; a[2]=2; print length(\"héllo\"), length(a), length(12345) } { print length }",
            "abc def\n",
        );
        assert_eq!(out, "5 2 5\n7\n");
    }

    #[test]
    fn test_substr() {
        let (out, _) = run_program(
            "BEGIN { s = \"hello\"; print substr(s, 2), substr(s, 2, 3), substr(s, 0, 2), substr(s, 9), \"|\" substr(s, -1, 3) \"|\" }",
            "",
        );
        assert_eq!(out, "ello ell h  |h|\n");
    }

    #[test]
    fn test_index() {
        let (out, _) = run_program(
            "BEGIN { print index(\"hello\", \"llo\"), index(\"hello\", \"z\") }",
            "",
        );
        assert_eq!(out, "3 0\n");
    }

    #[test]
    fn test_case_mapping() {
        let (out, _) = run_program("BEGIN { print toupper(\"MiXeD\"), tolower(\"MiXeD\") }", "");
        assert_eq!(out, "MIXED mixed\n");
    }

    #[test]
    fn test_sub_and_gsub() {
        let (out, _) = run_program(
            "{ n = gsub(/o/, \"0\"); print n, $0 } ",
            "foo boo\n",
        );
        assert_eq!(out, "4 f00 b00\n");
    }

    #[test]
    fn test_sub_on_variable() {
        let (out, _) = run_program(
            "BEGIN { s = \"aaa\"; n = sub(/a/, \"b\", s); print n, s }",
            "",
        );
        assert_eq!(out, "1 baa\n");
    }

    #[test]
    fn test_sub_ampersand() {
        let (out, _) = run_program(
            "BEGIN { s = \"cat\"; sub(/a/, \"[&]\", s); print s; t = \"cat\"; sub(/a/, \"[\\\\&]\", t); print t }",
            "",
        );
        assert_eq!(out, "c[a]t\nc[&]t\n");
    }

    #[test]
    fn test_gensub_groups_and_nth() {
        let (out, _) = run_program(
            "BEGIN { print gensub(/(a)(b)/, \"\\\\2\\\\1\", \"g\", \"abab\"); print gensub(/x/, \"y\", 2, \"xx\") }",
            "",
        );
        assert_eq!(out, "baba\nxy\n");
    }

    #[test]
    fn test_split_default_and_explicit() {
        let (out, _) = run_program(
            "BEGIN { n = split(\"a b c\", arr); print n, arr[1], arr[3]; m = split(\"x:y\", p, \":\"); print m, p[2] }",
            "",
        );
        assert_eq!(out, "3 a c\n2 y\n");
    }

    #[test]
    fn test_split_regex_and_empty() {
        let (out, _) = run_program(
            "BEGIN { n = split(\"a1b22c\", arr, /[0-9]+/); print n, arr[2], arr[3]; print split(\"\", z) }",
            "",
        );
        assert_eq!(out, "3 b c\n0\n");
    }

    #[test]
    fn test_sprintf_and_formats() {
        let (out, _) = run_program(
            "BEGIN { print sprintf(\"%05d|%-4s|%x|%o|%c|%.2f|%e\", 42, \"ab\", 255, 8, 65, 3.14159, 12345.678) }",
            "",
        );
        assert!(out.starts_with("00042|ab  |ff|10|A|3.14|1.234568e4"));
    }

    #[test]
    fn test_printf_star_width() {
        let (out, _) = run_program("BEGIN { printf \"%*d|\\n\", 5, 42 }", "");
        assert_eq!(out, "   42|\n");
    }

    #[test]
    fn test_percent_literal() {
        let (out, _) = run_program("BEGIN { printf \"100%%\\n\" }", "");
        assert_eq!(out, "100%\n");
    }

    #[test]
    fn test_int_truncates() {
        let (out, _) = run_program("BEGIN { print int(3.9), int(-3.9), int(\"12abc\") }", "");
        assert_eq!(out, "3 -3 12\n");
    }

    #[test]
    fn test_math_functions() {
        let (out, _) = run_program(
            "BEGIN { print sqrt(16), int(exp(0)), int(log(1)), int(atan2(0, 1) * 100), int(sin(0)), int(cos(0)) }",
            "",
        );
        assert_eq!(out, "4 1 0 0 0 1\n");
    }

    #[test]
    fn test_rand_deterministic_after_srand() {
        let (out, _) = run_program(
            "BEGIN { srand(7); a = rand(); srand(7); b = rand(); print (a == b), (a >= 0), (a < 1) }",
            "",
        );
        assert_eq!(out, "1 1 1\n");
    }

    #[test]
    fn test_srand_returns_previous_seed() {
        let (out, _) = run_program("BEGIN { srand(5); print srand(9) }", "");
        assert_eq!(out, "5\n");
    }

    #[test]
    fn test_system_exit_code() {
        let (out, _) = run_program("BEGIN { print system(\"exit 3\") }", "");
        assert_eq!(out, "3\n");
    }

    #[test]
    fn test_close_results() {
        let (out, _) = run_program(
            "BEGIN { \"echo x\" | getline v; print close(\"echo x\"); print close(\"echo x\") }",
            "",
        );
        assert_eq!(out, "0\n-1\n");
    }

    #[test]
    fn test_setioattr_getioattr() {
        let (out, _) = run_program(
            "BEGIN { print setioattr(\"ch\", \"rtimeout\", 2), getioattr(\"ch\", \"rtimeout\"), setioattr(\"ch\", \"bogus\", 1) }",
            "",
        );
        assert_eq!(out, "0 2 -1\n");
    }
}
