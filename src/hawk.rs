/// Embedding Surface
///
/// A `Hawk` instance owns the per-instance services (gem), the
/// configuration, and the module host. The embedder configures it,
/// parses one program, and opens runtime contexts against the parsed
/// program: open → parse → (exec | call)* → close.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use crate::cmgr::Cmgr;
use crate::error::{HawkError, Result};
use crate::gem::{new_gem, note_err, GemRef};
use crate::lexer::Lexer;
use crate::module::ModuleHost;
use crate::opts::Options;
use crate::parser::Parser;
use crate::rtx::{Rtx, RtxIo};
use crate::types::Program;

pub struct Hawk {
    gem: GemRef,
    opts: Options,
    modules: Rc<RefCell<ModuleHost>>,
}

impl Hawk {
    pub fn new() -> Self {
        Self::with_cmgr(None)
    }

    pub fn with_cmgr(cmgr: Option<Rc<dyn Cmgr>>) -> Self {
        let opts = Options::default();
        let modules = Rc::new(RefCell::new(ModuleHost::new(
            opts.mod_lib_dirs.clone(),
            opts.mod_prefix.clone(),
            opts.mod_postfix.clone(),
        )));
        Hawk {
            gem: new_gem(cmgr),
            opts,
            modules,
        }
    }

    pub fn gem(&self) -> GemRef {
        self.gem.clone()
    }

    pub fn modules(&self) -> Rc<RefCell<ModuleHost>> {
        self.modules.clone()
    }

    pub fn opts(&self) -> &Options {
        &self.opts
    }

    pub fn opts_mut(&mut self) -> &mut Options {
        &mut self.opts
    }

    pub fn set_trait(&mut self, flag: u32, on: bool) {
        self.opts.traits.set(flag, on);
    }

    /// Module search configuration feeds the host; call after the
    /// options settle.
    pub fn apply_module_opts(&mut self) {
        self.modules = Rc::new(RefCell::new(ModuleHost::new(
            self.opts.mod_lib_dirs.clone(),
            self.opts.mod_prefix.clone(),
            self.opts.mod_postfix.clone(),
        )));
    }

    /// Most recent error, for embedders that lost the returned value.
    pub fn last_error(&self) -> Option<HawkError> {
        self.gem.borrow().last_err().cloned()
    }

    /// Parse a program from a named source string.
    pub fn parse(&mut self, name: &str, text: &str) -> Result<Rc<Program>> {
        let lexer = Lexer::new(name, text, self.opts.traits, self.opts.depths.include)
            .with_include_dirs(self.opts.include_dirs.clone());
        self.parse_with(lexer)
    }

    /// Parse a program from a file; relative includes resolve against
    /// the file's directory first.
    pub fn parse_file(&mut self, path: &str) -> Result<Rc<Program>> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| note_err(&self.gem, HawkError::from(e)))?;
        let mut lexer = Lexer::new(path, &text, self.opts.traits, self.opts.depths.include)
            .with_include_dirs(self.opts.include_dirs.clone());
        lexer.set_master_path(PathBuf::from(path));
        self.parse_with(lexer)
    }

    fn parse_with(&mut self, lexer: Lexer) -> Result<Rc<Program>> {
        let parser = Parser::new(lexer, &self.opts).map_err(|e| note_err(&self.gem, e))?;
        match parser.parse() {
            Ok(p) => Ok(Rc::new(p)),
            Err(e) => Err(note_err(&self.gem, e)),
        }
    }

    /// Open a runtime context with standard console wiring.
    pub fn open_rtx(&self, program: Rc<Program>, argv: &[String], io: RtxIo) -> Result<Rtx> {
        Rtx::open(self.gem.clone(), program, self.modules.clone(), argv, io)
            .map_err(|e| note_err(&self.gem, e))
    }
}

impl Default for Hawk {
    fn default() -> Self {
        Hawk::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrKind;
    use crate::opts::Traits;

    #[test]
    fn test_parse_records_error_on_gem() {
        let mut hawk = Hawk::new();
        let err = hawk.parse("(t)", "BEGIN {").unwrap_err();
        assert_eq!(err.kind, ErrKind::Syntax);
        let last = hawk.last_error().unwrap();
        assert_eq!(last.kind, ErrKind::Syntax);
    }

    #[test]
    fn test_traits_flow_into_parse() {
        let mut hawk = Hawk::new();
        hawk.set_trait(Traits::IMPLICIT, false);
        assert!(hawk.parse("(t)", "BEGIN { und = 1 }").is_err());
    }

    #[test]
    fn test_parse_and_call_round_trip() {
        let mut hawk = Hawk::new();
        let program = hawk.parse("(t)", "function twice(x) { return x * 2 }").unwrap();
        let mut rtx = hawk.open_rtx(program, &[], RtxIo::default()).unwrap();
        let v = rtx
            .call("twice", &[crate::value::Value::Int(21)])
            .unwrap();
        assert_eq!(v.to_int(true).unwrap(), 42);
    }
}
