/// Runtime Context
///
/// A runtime context binds a parsed program to its execution state: the
/// global table sized by the parser, the frame stack for locals and
/// arguments, the named-variable map, the current record and fields,
/// the channel table, and the halt flag. The orchestration here covers
/// the BEGIN / per-record / END loop, console input driven by `ARGV`,
/// and the entry-function mode.

pub mod builtins;
mod eval;
mod exec;
mod fields;

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::{ErrKind, HawkError, Loc, Result};
use crate::gem::{note_err, GemRef};
use crate::module::ModuleHost;
use crate::opts::{Depths, Traits};
use crate::rex::Rex;
use crate::rio::{ByteSink, ByteSource, Rio, RsMode};
use crate::types::{gbl, Pattern, Program, Rule};
use crate::value::{MapHandle, Value};

// ─── Control Flow ────────────────────────────────────────────

/// Non-local control flow raised by statements and absorbed by the
/// enclosing construct.
#[derive(Debug)]
pub enum Flow {
    Break,
    Continue,
    Next,
    NextFile,
    Return(Value),
    Exit(Value),
    Abort(Value),
}

/// What unwinds out of an evaluator function: a real error or a
/// control-flow status on its way to the construct that absorbs it.
#[derive(Debug)]
pub enum Signal {
    Error(HawkError),
    Flow(Flow),
}

impl From<HawkError> for Signal {
    fn from(e: HawkError) -> Self {
        Signal::Error(e)
    }
}

impl From<Flow> for Signal {
    fn from(f: Flow) -> Self {
        Signal::Flow(f)
    }
}

pub type Exec<T> = std::result::Result<T, Signal>;

/// A frame slot: either an owned value or a reference into another
/// slot, used for reference parameters.
#[derive(Debug, Clone)]
pub enum Slot {
    Val(Value),
    Ref(Lvalue),
}

/// A resolved assignment target.
#[derive(Debug, Clone)]
pub enum Lvalue {
    Named(Rc<str>),
    Global(usize),
    /// Absolute index into the value stack.
    Stack(usize),
    Field(usize),
    Elem(MapHandle, String),
}

/// How the runtime connects its console ends.
pub struct RtxIo {
    pub console_in: Option<ByteSource>,
    pub console_out: Option<ByteSink>,
    /// Console output file names for `-t` / `nextofile`.
    pub console_ofiles: Vec<String>,
}

impl Default for RtxIo {
    fn default() -> Self {
        RtxIo {
            console_in: None,
            console_out: None,
            console_ofiles: Vec::new(),
        }
    }
}

static NEXT_RTX_ID: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);

// ─── Rtx ─────────────────────────────────────────────────────

pub struct Rtx {
    pub(crate) gem: GemRef,
    pub(crate) program: Rc<Program>,
    pub(crate) traits: Traits,
    pub(crate) depths: Depths,

    pub(crate) globals: Vec<Value>,
    pub(crate) named: HashMap<Rc<str>, Value>,
    pub(crate) stack: Vec<Slot>,
    pub(crate) frame_base: usize,
    pub(crate) frame_params: usize,

    pub(crate) record: String,
    pub(crate) fields: Vec<Value>,
    fs_cache: Option<(String, Rc<Rex>)>,
    rs_cache: Option<(String, RsMode)>,
    range_on: Vec<bool>,

    pub(crate) rio: Rio,
    pub(crate) modules: Rc<std::cell::RefCell<ModuleHost>>,

    pub(crate) rng: StdRng,
    pub(crate) rng_prev_seed: u64,

    halt: Arc<AtomicBool>,
    pub(crate) expr_depth: usize,
    pub(crate) block_depth: usize,
    pub(crate) rtx_id: u64,

    // Console input walking
    argv_next: usize,
    opened_any_input: bool,
    used_stdin_fallback: bool,
    ofiles: Vec<String>,
    ofile_next: usize,

    closed: bool,
}

impl Rtx {
    pub fn open(
        gem: GemRef,
        program: Rc<Program>,
        modules: Rc<std::cell::RefCell<ModuleHost>>,
        argv: &[String],
        io: RtxIo,
    ) -> Result<Self> {
        let traits = program.traits;
        let depths = program.depths;

        let mut rio = Rio::new();
        if let Some(src) = io.console_in {
            rio.set_stdin_source(src);
        }
        if let Some(sink) = io.console_out {
            rio.set_console_out(sink);
        }

        let seed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let mut rtx = Rtx {
            gem,
            traits,
            depths,
            globals: vec![Value::Nil; program.globals.len()],
            named: HashMap::new(),
            stack: Vec::new(),
            frame_base: 0,
            frame_params: 0,
            record: String::new(),
            fields: Vec::new(),
            fs_cache: None,
            rs_cache: None,
            range_on: vec![false; program.rules.len()],
            rio,
            modules,
            rng: StdRng::seed_from_u64(seed),
            rng_prev_seed: seed,
            halt: Arc::new(AtomicBool::new(false)),
            expr_depth: 0,
            block_depth: 0,
            rtx_id: NEXT_RTX_ID.fetch_add(1, Ordering::Relaxed),
            argv_next: 1,
            opened_any_input: false,
            used_stdin_fallback: false,
            ofiles: io.console_ofiles,
            ofile_next: 0,
            program,
            closed: false,
        };

        rtx.init_globals(argv)?;

        if !rtx.ofiles.is_empty() {
            let first = rtx.ofiles[0].clone();
            rtx.rio.console_set_ofile(&first)?;
            rtx.globals[gbl::OFILENAME] = Value::str_from(&first);
            rtx.ofile_next = 1;
        }

        Ok(rtx)
    }

    fn init_globals(&mut self, argv: &[String]) -> Result<()> {
        let nl = if self.traits.has(Traits::CRLF) { "\r\n" } else { "\n" };

        self.globals[gbl::CONVFMT] = Value::str_from("%.6g");
        self.globals[gbl::OFMT] = Value::str_from("%.6g");
        self.globals[gbl::FS] = Value::str_from(" ");
        self.globals[gbl::OFS] = Value::str_from(" ");
        self.globals[gbl::ORS] = Value::str_from(nl);
        self.globals[gbl::RS] = Value::str_from("\n");
        self.globals[gbl::SUBSEP] = Value::str_from("\x1c");
        self.globals[gbl::NR] = Value::Int(0);
        self.globals[gbl::FNR] = Value::Int(0);
        self.globals[gbl::NF] = Value::Int(0);
        self.globals[gbl::RSTART] = Value::Int(0);
        self.globals[gbl::RLENGTH] = Value::Int(-1);
        self.globals[gbl::FILENAME] = Value::str_from("");
        self.globals[gbl::OFILENAME] = Value::str_from("");
        self.globals[gbl::RT] = Value::str_from("");

        let argv_map = Value::new_map();
        if let Value::Map(m) = &argv_map {
            let mut m = m.borrow_mut();
            m.insert("0".to_string(), Value::str_from("hawk"));
            for (i, a) in argv.iter().enumerate() {
                m.insert((i + 1).to_string(), Value::num_or_str(a));
            }
        }
        self.globals[gbl::ARGV] = argv_map;
        self.globals[gbl::ARGC] = Value::Int(argv.len() as i64 + 1);

        let environ = Value::new_map();
        if let Value::Map(m) = &environ {
            let mut m = m.borrow_mut();
            for (k, v) in std::env::vars() {
                m.insert(k, Value::str_from(&v));
            }
        }
        self.globals[gbl::ENVIRON] = environ;

        Ok(())
    }

    // ── Shared accessors ─────────────────────────────────────

    pub fn halt_handle(&self) -> Arc<AtomicBool> {
        self.halt.clone()
    }

    /// Request cooperative cancellation. Safe to call from a signal
    /// context through the cloned handle.
    pub fn halt(&self) {
        self.halt.store(true, Ordering::Relaxed);
    }

    pub(crate) fn halted(&self) -> bool {
        self.halt.load(Ordering::Relaxed)
    }

    pub(crate) fn check_halt(&mut self) -> Exec<()> {
        if self.halted() {
            Err(Signal::Flow(Flow::Exit(Value::Nil)))
        } else {
            Ok(())
        }
    }

    pub(crate) fn convfmt(&self) -> String {
        match &self.globals[gbl::CONVFMT] {
            Value::Str(s) | Value::NumStr(s) => s.to_string(),
            other => other.to_str("%.6g").map(|s| s.to_string()).unwrap_or_default(),
        }
    }

    pub(crate) fn ofmt(&self) -> String {
        match &self.globals[gbl::OFMT] {
            Value::Str(s) | Value::NumStr(s) => s.to_string(),
            other => other.to_str("%.6g").map(|s| s.to_string()).unwrap_or_default(),
        }
    }

    pub(crate) fn subsep(&self) -> String {
        match &self.globals[gbl::SUBSEP] {
            Value::Str(s) | Value::NumStr(s) => s.to_string(),
            _ => "\x1c".to_string(),
        }
    }

    pub(crate) fn strip_spc(&self) -> bool {
        self.traits.has(Traits::STRIPSTRSPC)
    }

    /// Convert with CONVFMT, honoring TOLERANT recovery.
    pub(crate) fn val_to_str(&mut self, v: &Value, loc: &Loc) -> Exec<Rc<str>> {
        match v.to_str(&self.convfmt()) {
            Ok(s) => Ok(s),
            Err(kind) => self.recover_str(kind, loc),
        }
    }

    /// Convert with OFMT for print output.
    pub(crate) fn val_to_out_str(&mut self, v: &Value, loc: &Loc) -> Exec<Rc<str>> {
        match v.to_str(&self.ofmt()) {
            Ok(s) => Ok(s),
            Err(kind) => self.recover_str(kind, loc),
        }
    }

    fn recover_str(&mut self, kind: ErrKind, loc: &Loc) -> Exec<Rc<str>> {
        let err = HawkError::new(kind, loc.clone(), "value not convertible to a string");
        if self.traits.has(Traits::TOLERANT) && kind.is_recoverable() {
            note_err(&self.gem, err);
            Ok(Rc::from(""))
        } else {
            Err(note_err(&self.gem, err).into())
        }
    }

    pub(crate) fn val_to_num(&mut self, v: &Value, loc: &Loc) -> Exec<crate::value::Num> {
        match v.to_num(self.strip_spc()) {
            Ok(n) => Ok(n),
            Err(kind) => {
                let err = HawkError::new(kind, loc.clone(), "value not convertible to a number");
                if self.traits.has(Traits::TOLERANT) && kind.is_recoverable() {
                    note_err(&self.gem, err);
                    Ok(crate::value::Num::Int(0))
                } else {
                    Err(note_err(&self.gem, err).into())
                }
            }
        }
    }

    pub(crate) fn val_to_int(&mut self, v: &Value, loc: &Loc) -> Exec<i64> {
        Ok(self.val_to_num(v, loc)?.as_int())
    }

    pub(crate) fn val_to_flt(&mut self, v: &Value, loc: &Loc) -> Exec<f64> {
        Ok(self.val_to_num(v, loc)?.as_flt())
    }

    pub(crate) fn rt_err(&mut self, kind: ErrKind, loc: &Loc, msg: impl Into<String>) -> Signal {
        note_err(&self.gem, HawkError::new(kind, loc.clone(), msg)).into()
    }

    /// The compiled field separator, rebuilt when `FS` changes.
    pub(crate) fn fs_rex(&mut self) -> Exec<Option<Rc<Rex>>> {
        let fs = match self.globals[gbl::FS].to_str(&self.convfmt()) {
            Ok(s) => s.to_string(),
            Err(_) => " ".to_string(),
        };
        if fs == " " || fs.chars().count() == 1 {
            return Ok(None);
        }
        if let Some((cached, rex)) = &self.fs_cache {
            if *cached == fs {
                return Ok(Some(rex.clone()));
            }
        }
        let rex = Rc::new(Rex::new(&fs, self.traits.has(Traits::REXBOUND)));
        self.fs_cache = Some((fs, rex.clone()));
        Ok(Some(rex))
    }

    /// The record separator mode, rebuilt when `RS` changes.
    pub(crate) fn rs_mode(&mut self) -> RsMode {
        let rs = match self.globals[gbl::RS].to_str("%.6g") {
            Ok(s) => s.to_string(),
            Err(_) => "\n".to_string(),
        };
        if let Some((cached, mode)) = &self.rs_cache {
            if *cached == rs {
                return mode.clone();
            }
        }
        let mode = RsMode::from_rs(&rs, self.traits.has(Traits::REXBOUND));
        self.rs_cache = Some((rs, mode.clone()));
        mode
    }

    // ── Console input walking ────────────────────────────────

    fn argv_entry(&self, i: usize) -> String {
        if let Value::Map(m) = &self.globals[gbl::ARGV] {
            if let Some(v) = m.borrow().get(&i.to_string()) {
                return v.to_str("%.6g").map(|s| s.to_string()).unwrap_or_default();
            }
        }
        String::new()
    }

    fn argc(&self) -> usize {
        self.globals[gbl::ARGC].to_int(true).unwrap_or(0).max(0) as usize
    }

    /// Open the next console input, handling `var=val` entries as
    /// deferred assignments. Returns false when input is exhausted.
    fn next_input_file(&mut self) -> Exec<bool> {
        loop {
            if self.argv_next >= self.argc() {
                if !self.opened_any_input && !self.used_stdin_fallback {
                    self.used_stdin_fallback = true;
                    self.rio.console_open("")?;
                    self.globals[gbl::FILENAME] = Value::str_from("");
                    self.globals[gbl::FNR] = Value::Int(0);
                    self.run_special(SpecialRule::BeginFile)?;
                    return Ok(true);
                }
                return Ok(false);
            }

            let entry = self.argv_entry(self.argv_next);
            self.argv_next += 1;

            if entry.is_empty() {
                continue;
            }
            if let Some((var, val)) = split_console_assignment(&entry) {
                self.console_assign(&var, &val)?;
                continue;
            }

            self.rio.console_open(&entry)?;
            self.opened_any_input = true;
            self.globals[gbl::FILENAME] = Value::str_from(&entry);
            self.globals[gbl::FNR] = Value::Int(0);
            self.run_special(SpecialRule::BeginFile)?;
            return Ok(true);
        }
    }

    /// Apply a `var=val` console entry at file-switch time.
    fn console_assign(&mut self, var: &str, val: &str) -> Exec<()> {
        let value = Value::num_or_str(val);
        if let Some(i) = self.program.globals.iter().position(|g| &**g == var) {
            self.set_global(i, value, &Loc::none())?;
        } else {
            self.named.insert(Rc::from(var), value);
        }
        Ok(())
    }

    fn end_current_file(&mut self) -> Exec<()> {
        if self.rio.console_is_open() {
            self.run_special(SpecialRule::EndFile)?;
            self.rio.console_close();
        }
        Ok(())
    }

    /// Fetch the next console record, walking files as needed. Returns
    /// the `(record, terminator)` pair.
    pub(crate) fn console_advance(&mut self) -> Exec<Option<(String, String)>> {
        loop {
            if !self.rio.console_is_open() {
                if !self.next_input_file()? {
                    return Ok(None);
                }
            }
            let rs = self.rs_mode();
            match self.rio.console_read(&rs) {
                Ok(Some(pair)) => return Ok(Some(pair)),
                Ok(None) => {
                    self.end_current_file()?;
                    continue;
                }
                Err(e) => return Err(note_err(&self.gem, e).into()),
            }
        }
    }

    /// Console `getline` shared by the main loop and the expression
    /// forms: bumps NR/FNR and stores into `$0` or the given setter.
    pub(crate) fn console_getline_record(&mut self) -> Exec<Option<String>> {
        match self.console_advance()? {
            Some((rec, rt)) => {
                self.bump_nr();
                self.globals[gbl::RT] = Value::str_from(&rt);
                Ok(Some(rec))
            }
            None => Ok(None),
        }
    }

    pub(crate) fn bump_nr(&mut self) {
        let nr = self.globals[gbl::NR].to_int(true).unwrap_or(0);
        let fnr = self.globals[gbl::FNR].to_int(true).unwrap_or(0);
        self.globals[gbl::NR] = Value::Int(nr + 1);
        self.globals[gbl::FNR] = Value::Int(fnr + 1);
    }

    /// Advance the console output to the next `-t` file.
    pub(crate) fn advance_ofile(&mut self) -> Exec<()> {
        if self.ofile_next < self.ofiles.len() {
            let name = self.ofiles[self.ofile_next].clone();
            self.ofile_next += 1;
            self.rio.console_set_ofile(&name)?;
            self.globals[gbl::OFILENAME] = Value::str_from(&name);
        }
        Ok(())
    }

    // ── Rule orchestration ───────────────────────────────────

    fn has_input_rules(&self) -> bool {
        self.program.rules.iter().any(|r| {
            !matches!(r.pattern, Some(Pattern::Begin) | Some(Pattern::End))
        })
    }

    fn has_end_rules(&self) -> bool {
        self.program
            .rules
            .iter()
            .any(|r| matches!(r.pattern, Some(Pattern::End)))
    }

    fn run_special(&mut self, which: SpecialRule) -> Exec<()> {
        let prog = self.program.clone();
        for rule in &prog.rules {
            let hit = match (&rule.pattern, which) {
                (Some(Pattern::Begin), SpecialRule::Begin) => true,
                (Some(Pattern::End), SpecialRule::End) => true,
                (Some(Pattern::BeginFile), SpecialRule::BeginFile) => true,
                (Some(Pattern::EndFile), SpecialRule::EndFile) => true,
                _ => false,
            };
            if hit {
                self.run_action(rule)?;
            }
        }
        Ok(())
    }

    fn run_action(&mut self, rule: &Rule) -> Exec<()> {
        match &rule.action {
            Some(stmts) => self.exec_block_stmts(stmts),
            None => {
                // Default action: print the record.
                let ors = self.val_to_str(&self.globals[gbl::ORS].clone(), &rule.loc)?;
                let mut out = self.record.clone().into_bytes();
                out.extend_from_slice(ors.as_bytes());
                self.rio.console_write(&out).map_err(|e| note_err(&self.gem, e))?;
                Ok(())
            }
        }
    }

    fn rule_matches(&mut self, index: usize, rule: &Rule) -> Exec<bool> {
        match &rule.pattern {
            None => Ok(true),
            Some(Pattern::Begin)
            | Some(Pattern::End)
            | Some(Pattern::BeginFile)
            | Some(Pattern::EndFile) => Ok(false),
            Some(Pattern::Expr(e)) => {
                let v = self.eval_expr(e)?;
                Ok(v.is_truthy())
            }
            Some(Pattern::Range { start, end }) => {
                if !self.range_on[index] {
                    let s = self.eval_expr(start)?;
                    if s.is_truthy() {
                        self.range_on[index] = true;
                        let e = self.eval_expr(end)?;
                        if e.is_truthy() {
                            self.range_on[index] = false;
                        }
                        return Ok(true);
                    }
                    Ok(false)
                } else {
                    let e = self.eval_expr(end)?;
                    if e.is_truthy() {
                        self.range_on[index] = false;
                    }
                    Ok(true)
                }
            }
        }
    }

    fn run_record_rules(&mut self) -> Exec<()> {
        let prog = self.program.clone();
        for (i, rule) in prog.rules.iter().enumerate() {
            if matches!(
                rule.pattern,
                Some(Pattern::Begin)
                    | Some(Pattern::End)
                    | Some(Pattern::BeginFile)
                    | Some(Pattern::EndFile)
            ) {
                continue;
            }
            if self.rule_matches(i, rule)? {
                self.run_action(rule)?;
            }
        }
        Ok(())
    }

    // ── Entry points ─────────────────────────────────────────

    /// Run the program: the entry function when `@pragma entry` names
    /// one, the pattern-action loop otherwise. Returns the exit value.
    pub fn exec_loop(&mut self) -> Result<Value> {
        let result = self.exec_loop_inner();
        let _ = self.rio.flush(None);
        result
    }

    fn exec_loop_inner(&mut self) -> Result<Value> {
        if let Some(entry) = self.program.entry.clone() {
            let argc = self.argc();
            let args: Vec<Value> = (1..argc).map(|i| Value::num_or_str(&self.argv_entry(i))).collect();
            return self.call(&entry, &args);
        }

        if !self.traits.has(Traits::PABLOCK) {
            return Ok(Value::Nil);
        }

        let mut exit_value = Value::Nil;

        // BEGIN
        let mut skip_input = false;
        match self.run_special(SpecialRule::Begin) {
            Ok(()) => {}
            Err(Signal::Flow(Flow::Exit(v))) => {
                exit_value = v;
                skip_input = true;
                self.absorb_halt();
            }
            Err(Signal::Flow(Flow::Abort(v))) => return Ok(v),
            Err(Signal::Flow(f)) => {
                return Err(self.flow_misuse(f));
            }
            Err(Signal::Error(e)) => return Err(e),
        }

        // Per-record loop. Skipped when only BEGIN rules exist.
        if !skip_input && (self.has_input_rules() || self.has_end_rules()) {
            'records: loop {
                match self.console_getline_record() {
                    Ok(Some(rec)) => match self.set_record(&rec) {
                        Ok(()) => {}
                        Err(Signal::Flow(f)) => return Err(self.flow_misuse(f)),
                        Err(Signal::Error(e)) => return Err(e),
                    },
                    Ok(None) => break 'records,
                    Err(Signal::Flow(Flow::Exit(v))) => {
                        exit_value = v;
                        self.absorb_halt();
                        break 'records;
                    }
                    Err(Signal::Flow(Flow::Abort(v))) => return Ok(v),
                    Err(Signal::Flow(f)) => return Err(self.flow_misuse(f)),
                    Err(Signal::Error(e)) => return Err(e),
                }

                match self.run_record_rules() {
                    Ok(()) => {}
                    Err(Signal::Flow(Flow::Next)) => continue 'records,
                    Err(Signal::Flow(Flow::NextFile)) => {
                        match self.end_current_file() {
                            Ok(()) => {}
                            Err(Signal::Flow(Flow::Exit(v))) => {
                                exit_value = v;
                                self.absorb_halt();
                                break 'records;
                            }
                            Err(Signal::Flow(Flow::Abort(v))) => return Ok(v),
                            Err(Signal::Flow(f)) => return Err(self.flow_misuse(f)),
                            Err(Signal::Error(e)) => return Err(e),
                        }
                        continue 'records;
                    }
                    Err(Signal::Flow(Flow::Exit(v))) => {
                        exit_value = v;
                        self.absorb_halt();
                        break 'records;
                    }
                    Err(Signal::Flow(Flow::Abort(v))) => return Ok(v),
                    Err(Signal::Flow(f)) => return Err(self.flow_misuse(f)),
                    Err(Signal::Error(e)) => return Err(e),
                }
            }
        }

        // END
        match self.run_special(SpecialRule::End) {
            Ok(()) => {}
            Err(Signal::Flow(Flow::Exit(v))) => {
                if !v.is_nil() {
                    exit_value = v;
                }
            }
            Err(Signal::Flow(Flow::Abort(v))) => return Ok(v),
            Err(Signal::Flow(f)) => return Err(self.flow_misuse(f)),
            Err(Signal::Error(e)) => return Err(e),
        }

        self.rio.close_all();
        Ok(exit_value)
    }

    fn absorb_halt(&mut self) {
        // A halt unwinds as `exit`; once absorbed the END blocks may
        // still run.
        self.halt.store(false, Ordering::Relaxed);
    }

    fn flow_misuse(&mut self, f: Flow) -> HawkError {
        let what = match f {
            Flow::Break => "break outside a loop",
            Flow::Continue => "continue outside a loop",
            Flow::Next => "next is not allowed here",
            Flow::NextFile => "nextfile is not allowed here",
            Flow::Return(_) => "return outside a function",
            _ => "stray control flow",
        };
        note_err(
            &self.gem,
            HawkError::new(ErrKind::Perm, Loc::none(), what),
        )
    }

    /// Run the pattern-action loop with a fresh `ARGV`.
    pub fn exec(&mut self, argv: &[String]) -> Result<Value> {
        let argv_map = Value::new_map();
        if let Value::Map(m) = &argv_map {
            let mut m = m.borrow_mut();
            m.insert("0".to_string(), Value::str_from("hawk"));
            for (i, a) in argv.iter().enumerate() {
                m.insert((i + 1).to_string(), Value::num_or_str(a));
            }
        }
        self.globals[gbl::ARGV] = argv_map;
        self.globals[gbl::ARGC] = Value::Int(argv.len() as i64 + 1);
        self.argv_next = 1;
        self.exec_loop()
    }

    /// Call a named function with the given argument values.
    pub fn call(&mut self, name: &str, args: &[Value]) -> Result<Value> {
        let f = match self.program.functions.get(name) {
            Some(f) => f.clone(),
            None => {
                return Err(note_err(
                    &self.gem,
                    HawkError::bare(ErrKind::Noent, format!("function {} is not defined", name)),
                ))
            }
        };
        let slots: Vec<Slot> = (0..f.params.len())
            .map(|i| Slot::Val(args.get(i).cloned().unwrap_or(Value::Nil)))
            .collect();
        match self.call_frame(&f, slots) {
            Ok(v) => Ok(v),
            Err(Signal::Flow(Flow::Exit(v))) | Err(Signal::Flow(Flow::Abort(v))) => Ok(v),
            Err(Signal::Flow(f)) => Err(self.flow_misuse(f)),
            Err(Signal::Error(e)) => Err(e),
        }
    }

    /// Bind a frame and run a function body.
    pub(crate) fn call_frame(
        &mut self,
        f: &crate::types::FunctionDef,
        mut slots: Vec<Slot>,
    ) -> Exec<Value> {
        self.check_halt()?;
        self.block_depth += 1;
        if self.block_depth > self.depths.block_run {
            self.block_depth -= 1;
            return Err(self.rt_err(ErrKind::Stackov, &f.loc, "call nesting too deep"));
        }

        let base = self.stack.len();
        while slots.len() < f.params.len() {
            slots.push(Slot::Val(Value::Nil));
        }
        self.stack.append(&mut slots);
        for _ in 0..f.locals.len() {
            self.stack.push(Slot::Val(Value::Nil));
        }

        let saved_base = self.frame_base;
        let saved_params = self.frame_params;
        self.frame_base = base;
        self.frame_params = f.params.len();

        let r = self.exec_block_stmts(&f.body);

        self.stack.truncate(base);
        self.frame_base = saved_base;
        self.frame_params = saved_params;
        self.block_depth -= 1;

        match r {
            Ok(()) => Ok(Value::Nil),
            Err(Signal::Flow(Flow::Return(v))) => Ok(v),
            Err(other) => Err(other),
        }
    }

    /// Assign a global or named variable from external text, the way
    /// `-v var=value` and console `var=val` entries do: numeric text
    /// becomes a numeric string.
    pub fn assign_var(&mut self, name: &str, text: &str) -> Result<()> {
        match self.console_assign(name, text) {
            Ok(()) => Ok(()),
            Err(Signal::Error(e)) => Err(e),
            Err(Signal::Flow(_)) => Err(note_err(
                &self.gem,
                HawkError::bare(ErrKind::Intern, "stray control flow in assignment"),
            )),
        }
    }

    /// Named variables, for the embedder's debug dump.
    pub fn named_vars(&self) -> Vec<(String, String)> {
        let fmt = self.convfmt();
        let mut out: Vec<(String, String)> = self
            .named
            .iter()
            .map(|(k, v)| {
                let text = v
                    .to_str(&fmt)
                    .map(|s| s.to_string())
                    .unwrap_or_else(|_| format!("<{}>", v.type_name()));
                (k.to_string(), text)
            })
            .collect();
        out.sort();
        out
    }

    /// Release runtime resources: flush and close channels, run module
    /// per-runtime teardown.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.rio.close_all();
        self.modules.borrow_mut().fini_rtx(self.rtx_id);
    }
}

impl Drop for Rtx {
    fn drop(&mut self) {
        self.close();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpecialRule {
    Begin,
    End,
    BeginFile,
    EndFile,
}

/// Split a console `var=val` entry; the name must be a plain
/// identifier.
fn split_console_assignment(entry: &str) -> Option<(String, String)> {
    let eq = entry.find('=')?;
    let (name, val) = entry.split_at(eq);
    if name.is_empty() {
        return None;
    }
    let mut chars = name.chars();
    let first = chars.next().unwrap();
    if !(first.is_ascii_alphabetic() || first == '_') {
        return None;
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    Some((name.to_string(), val[1..].to_string()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::hawk::Hawk;
    use std::cell::RefCell;
    use std::io::Cursor;

    /// Run a program against console input, returning (stdout, exit value).
    pub(crate) fn run_program(src: &str, input: &str) -> (String, Value) {
        run_program_args(src, input, &[])
    }

    pub(crate) fn run_program_args(src: &str, input: &str, argv: &[&str]) -> (String, Value) {
        let mut hawk = Hawk::new();
        let program = hawk.parse("(test)", src).expect("parse failed");
        let out = Rc::new(RefCell::new(Vec::new()));
        let io = RtxIo {
            console_in: Some(ByteSource::Mem(Cursor::new(input.as_bytes().to_vec()))),
            console_out: Some(ByteSink::Mem(out.clone())),
            console_ofiles: Vec::new(),
        };
        let args: Vec<String> = argv.iter().map(|s| s.to_string()).collect();
        let mut rtx = Rtx::open(hawk.gem(), program, hawk.modules(), &args, io).expect("open failed");
        let val = rtx.exec_loop().expect("run failed");
        rtx.close();
        let text = String::from_utf8_lossy(&out.borrow()).to_string();
        (text, val)
    }

    #[test]
    fn test_printf_expression() {
        let (out, _) = run_program("BEGIN { printf \"%d\\n\", 1+2 }", "");
        assert_eq!(out, "3\n");
    }

    #[test]
    fn test_top_level_statement_runs_once() {
        let (out, val) = run_program("printf \"%d\\n\", 1+2", "");
        assert_eq!(out, "3\n");
        assert_eq!(val.to_int(true).unwrap(), 0);
    }

    #[test]
    fn test_field_splitting_with_fs() {
        let (out, _) = run_program(
            "BEGIN{FS=\":\"} { print $1, $3 }",
            "root:x:0:0:/root:/bin/sh\n",
        );
        assert_eq!(out, "root 0\n");
    }

    #[test]
    fn test_count_by_key() {
        let (out, _) = run_program(
            "{a[$1]++} END{for(k in a) print k, a[k]}",
            "a\nb\na\nc\na\n",
        );
        let mut lines: Vec<&str> = out.lines().collect();
        lines.sort();
        assert_eq!(lines, vec!["a 3", "b 1", "c 1"]);
    }

    #[test]
    fn test_match_sets_rstart_rlength() {
        let (out, _) = run_program(
            "BEGIN{ print (match(\"hello world\", /w[a-z]+/), RSTART, RLENGTH) }",
            "",
        );
        assert_eq!(out, "1 7 5\n");
    }

    #[test]
    fn test_recursive_function() {
        let (out, _) = run_program(
            "function f(n,  s){ if(n==0) return 0; s=n+f(n-1); return s } BEGIN{print f(10)}",
            "",
        );
        assert_eq!(out, "55\n");
    }

    #[test]
    fn test_command_pipe_getline() {
        let (out, _) = run_program(
            "BEGIN{ \"echo hi\" | getline x; print x; print close(\"echo hi\") }",
            "",
        );
        assert_eq!(out, "hi\n0\n");
    }

    #[test]
    fn test_default_action_prints_record() {
        let (out, _) = run_program("/b/", "abc\nxyz\nrab\n");
        assert_eq!(out, "abc\nrab\n");
    }

    #[test]
    fn test_exit_value_and_end() {
        let (out, val) = run_program("BEGIN { print \"b\"; exit 3 } END { print \"e\" }", "");
        assert_eq!(out, "b\ne\n");
        assert_eq!(val.to_int(true).unwrap(), 3);
    }

    #[test]
    fn test_abort_skips_end(){
        let (out, val) = run_program("BEGIN { print \"b\"; @abort 9 } END { print \"e\" }", "");
        assert_eq!(out, "b\n");
        assert_eq!(val.to_int(true).unwrap(), 9);
    }

    #[test]
    fn test_nr_fnr_tracking() {
        let (out, _) = run_program("{ print NR, FNR }", "a\nb\n");
        assert_eq!(out, "1 1\n2 2\n");
    }

    #[test]
    fn test_next_skips_rules() {
        let (out, _) = run_program("/skip/ { next } { print $0 }", "one\nskip me\ntwo\n");
        assert_eq!(out, "one\ntwo\n");
    }

    #[test]
    fn test_range_pattern() {
        let (out, _) = run_program("/start/,/stop/", "a\nstart\nmid\nstop\nb\n");
        assert_eq!(out, "start\nmid\nstop\n");
    }

    #[test]
    fn test_entry_pragma() {
        let (out, val) = run_program(
            "@pragma entry main\nfunction main() { print \"from entry\"; return 42 }",
            "ignored input\n",
        );
        assert_eq!(out, "from entry\n");
        assert_eq!(val.to_int(true).unwrap(), 42);
    }

    #[test]
    fn test_call_by_name() {
        let mut hawk = Hawk::new();
        let program = hawk.parse("(t)", "function add(a, b) { return a + b }").unwrap();
        let mut rtx = Rtx::open(
            hawk.gem(),
            program,
            hawk.modules(),
            &[],
            RtxIo::default(),
        )
        .unwrap();
        let v = rtx.call("add", &[Value::Int(2), Value::Int(5)]).unwrap();
        assert_eq!(v.to_int(true).unwrap(), 7);

        assert!(rtx.call("missing", &[]).is_err());
    }

    #[test]
    fn test_halt_unwinds_as_exit() {
        let mut hawk = Hawk::new();
        let program = hawk
            .parse("(t)", "BEGIN { while (1) n++ } END { print \"end\", (n > 0) }")
            .unwrap();
        let out = Rc::new(RefCell::new(Vec::new()));
        let io = RtxIo {
            console_in: Some(ByteSource::Mem(Cursor::new(Vec::new()))),
            console_out: Some(ByteSink::Mem(out.clone())),
            console_ofiles: Vec::new(),
        };
        let mut rtx = Rtx::open(hawk.gem(), program, hawk.modules(), &[], io).unwrap();
        // Halt before the loop starts; the first halt check unwinds.
        rtx.halt();
        rtx.exec_loop().unwrap();
        let text = String::from_utf8_lossy(&out.borrow()).to_string();
        assert!(text.starts_with("end"));
    }

    #[test]
    fn test_var_assignment_in_argv() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("hawk-argv-test-{}.txt", std::process::id()));
        std::fs::write(&path, "x y\n").unwrap();
        let file = path.to_string_lossy().to_string();

        let (out, _) = run_program_args(
            "{ print mark, $1 }",
            "",
            &["mark=42", file.as_str()],
        );
        assert_eq!(out, "42 x\n");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_beginfile_endfile() {
        let (out, _) = run_program(
            "BEGINFILE { print \"[open]\" } { print $0 } ENDFILE { print \"[close]\" }",
            "data\n",
        );
        assert_eq!(out, "[open]\ndata\n[close]\n");
    }

    #[test]
    fn test_paragraph_mode_records() {
        let (out, _) = run_program(
            "BEGIN { RS = \"\" } { print NR \": \" $0 }",
            "a\nb\n\nc\n",
        );
        assert_eq!(out, "1: a\nb\n2: c\n");
    }

    #[test]
    fn test_rt_variable() {
        let (out, _) = run_program(
            "BEGIN { RS = \"x+\" } { printf \"%s/%s \", $0, RT }",
            "axxb",
        );
        assert_eq!(out, "a/xx b/ ");
    }
}
