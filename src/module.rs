/// Module System
///
/// Extension modules provide additional intrinsics under a
/// `modname::symbol` namespace. The `sys` module is compiled in; other
/// modules load as shared objects on first reference, export a
/// descriptor through a `hawk_mod_<name>` entry point, and are released
/// when the host shuts down. A module keeps its per-runtime state in an
/// ordered map keyed by the runtime id, populated in `init_rtx` and
/// cleared in `fini_rtx`, so several runtimes may be active at once.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::ffi::{CStr, CString};
use std::path::PathBuf;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::{ErrKind, HawkError, Result};
use crate::rtx::Rtx;
use crate::value::Value;

pub type RtxId = u64;

/// What a module exports under a symbol name.
#[derive(Debug, Clone, Copy)]
pub enum ModSym {
    Func { min_args: usize, max_args: usize },
    IntConst(i64),
    FltConst(f64),
}

/// The contract a module signs: symbol query, per-runtime lifecycle,
/// and the call entry shared with the intrinsic convention.
pub trait ModuleLib {
    fn name(&self) -> &str;
    fn query(&self, sym: &str) -> Option<ModSym>;
    fn init_rtx(&self, rtx: RtxId);
    fn fini_rtx(&self, rtx: RtxId);
    fn call(&self, sym: &str, rtx: &mut Rtx, args: &[Value]) -> Result<Value>;
    /// Last call before the module is released.
    fn unload(&self) {}
}

// ─── Host ────────────────────────────────────────────────────

pub struct ModuleHost {
    mod_dirs: Vec<PathBuf>,
    prefix: String,
    postfix: String,
    mods: IndexMap<String, Rc<dyn ModuleLib>>,
    /// Which (runtime, module) pairs have run `init_rtx`.
    inited: HashSet<(RtxId, String)>,
}

impl ModuleHost {
    pub fn new(mod_dirs: Vec<PathBuf>, prefix: String, postfix: String) -> Self {
        ModuleHost {
            mod_dirs,
            prefix,
            postfix,
            mods: IndexMap::new(),
            inited: HashSet::new(),
        }
    }

    pub fn get_or_load(&mut self, name: &str) -> Result<Rc<dyn ModuleLib>> {
        if let Some(m) = self.mods.get(name) {
            return Ok(m.clone());
        }

        let lib: Rc<dyn ModuleLib> = match name {
            "sys" => Rc::new(SysMod::new()),
            other => Rc::new(DynModule::load(
                other,
                &self.mod_dirs,
                &self.prefix,
                &self.postfix,
            )?),
        };
        self.mods.insert(name.to_string(), lib.clone());
        Ok(lib)
    }

    /// Run the module's per-runtime init exactly once per runtime.
    pub fn ensure_rtx_init(&mut self, name: &str, rtx: RtxId) {
        let key = (rtx, name.to_string());
        if self.inited.contains(&key) {
            return;
        }
        if let Some(m) = self.mods.get(name) {
            m.init_rtx(rtx);
            self.inited.insert(key);
        }
    }

    /// Tear down per-runtime state in every module the runtime touched.
    pub fn fini_rtx(&mut self, rtx: RtxId) {
        let touched: Vec<String> = self
            .inited
            .iter()
            .filter(|(id, _)| *id == rtx)
            .map(|(_, n)| n.clone())
            .collect();
        for name in touched {
            if let Some(m) = self.mods.get(&name) {
                m.fini_rtx(rtx);
            }
            self.inited.remove(&(rtx, name));
        }
    }

    pub fn unload_all(&mut self) {
        for (_, m) in self.mods.drain(..) {
            m.unload();
        }
        self.inited.clear();
    }
}

impl Drop for ModuleHost {
    fn drop(&mut self) {
        self.unload_all();
    }
}

// ─── Dynamic modules ─────────────────────────────────────────

/// The C-side value cell: tag 0 nil, 1 int, 2 flt, 3 string. A string
/// returned by a module call must be malloc'd; the host copies and
/// frees it.
#[repr(C)]
pub struct RawValue {
    pub tag: i32,
    pub i: i64,
    pub f: f64,
    pub s: *mut libc::c_char,
}

#[repr(C)]
pub struct RawFuncSpec {
    pub name: *const libc::c_char,
    pub min_args: u32,
    pub max_args: u32,
    pub call: unsafe extern "C" fn(
        argc: libc::size_t,
        argv: *const RawValue,
        ret: *mut RawValue,
    ) -> libc::c_int,
}

/// The descriptor a `hawk_mod_<name>` entry point fills in. The
/// function table must be sorted by name.
#[repr(C)]
pub struct RawModule {
    pub fncs: *const RawFuncSpec,
    pub fnc_count: libc::size_t,
    pub init: Option<unsafe extern "C" fn(rtx: u64) -> libc::c_int>,
    pub fini: Option<unsafe extern "C" fn(rtx: u64)>,
    pub unload: Option<unsafe extern "C" fn()>,
}

struct DynModule {
    name: String,
    handle: *mut libc::c_void,
    desc: RawModule,
}

impl DynModule {
    fn load(name: &str, dirs: &[PathBuf], prefix: &str, postfix: &str) -> Result<Self> {
        let file = format!("{}{}{}", prefix, name, postfix);
        let mut candidates: Vec<PathBuf> = dirs.iter().map(|d| d.join(&file)).collect();
        if candidates.is_empty() {
            candidates.push(PathBuf::from(&file));
        }

        let mut handle = std::ptr::null_mut();
        for cand in &candidates {
            let c_path = CString::new(cand.to_string_lossy().as_bytes())
                .map_err(|_| HawkError::bare(ErrKind::Inval, "module path contains NUL"))?;
            handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };
            if !handle.is_null() {
                break;
            }
        }
        if handle.is_null() {
            return Err(HawkError::bare(
                ErrKind::Noent,
                format!("cannot load module {}", name),
            ));
        }

        let entry_name = CString::new(format!("hawk_mod_{}", name))
            .map_err(|_| HawkError::bare(ErrKind::Inval, "bad module name"))?;
        let entry = unsafe { libc::dlsym(handle, entry_name.as_ptr()) };
        if entry.is_null() {
            unsafe { libc::dlclose(handle) };
            return Err(HawkError::bare(
                ErrKind::Modnonm,
                format!("module {} has no entry point", name),
            ));
        }

        let mut desc = RawModule {
            fncs: std::ptr::null(),
            fnc_count: 0,
            init: None,
            fini: None,
            unload: None,
        };
        // SAFETY: the entry symbol is documented to have this exact
        // signature; the descriptor outlives the call.
        let entry: unsafe extern "C" fn(*mut RawModule) -> libc::c_int =
            unsafe { std::mem::transmute(entry) };
        let rc = unsafe { entry(&mut desc) };
        if rc != 0 {
            unsafe { libc::dlclose(handle) };
            return Err(HawkError::bare(
                ErrKind::Syserr,
                format!("module {} failed to initialize", name),
            ));
        }

        Ok(DynModule {
            name: name.to_string(),
            handle,
            desc,
        })
    }

    fn find_spec(&self, sym: &str) -> Option<&RawFuncSpec> {
        if self.desc.fncs.is_null() {
            return None;
        }
        // SAFETY: the descriptor promises fnc_count valid entries.
        let table =
            unsafe { std::slice::from_raw_parts(self.desc.fncs, self.desc.fnc_count) };
        let found = table
            .binary_search_by(|spec| {
                let name = unsafe { CStr::from_ptr(spec.name) };
                name.to_bytes().cmp(sym.as_bytes())
            })
            .ok()?;
        Some(&table[found])
    }
}

impl ModuleLib for DynModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn query(&self, sym: &str) -> Option<ModSym> {
        self.find_spec(sym).map(|spec| ModSym::Func {
            min_args: spec.min_args as usize,
            max_args: spec.max_args as usize,
        })
    }

    fn init_rtx(&self, rtx: RtxId) {
        if let Some(init) = self.desc.init {
            // SAFETY: provided by the module for exactly this purpose.
            unsafe {
                init(rtx);
            }
        }
    }

    fn fini_rtx(&self, rtx: RtxId) {
        if let Some(fini) = self.desc.fini {
            // SAFETY: as for init.
            unsafe {
                fini(rtx);
            }
        }
    }

    fn call(&self, sym: &str, _rtx: &mut Rtx, args: &[Value]) -> Result<Value> {
        let spec = self.find_spec(sym).ok_or_else(|| {
            HawkError::bare(ErrKind::Modnonm, format!("{}::{} vanished", self.name, sym))
        })?;

        // Marshal arguments. Strings are owned CStrings kept alive for
        // the duration of the call.
        let mut keep: Vec<CString> = Vec::new();
        let mut raw: Vec<RawValue> = Vec::with_capacity(args.len());
        for a in args {
            let cell = match a {
                Value::Nil => RawValue { tag: 0, i: 0, f: 0.0, s: std::ptr::null_mut() },
                Value::Int(i) => RawValue { tag: 1, i: *i, f: 0.0, s: std::ptr::null_mut() },
                Value::Flt(f) => RawValue { tag: 2, i: 0, f: *f, s: std::ptr::null_mut() },
                other => {
                    let text = other
                        .to_str("%.6g")
                        .map_err(|k| HawkError::bare(k, "module argument not convertible"))?;
                    let c = CString::new(text.as_bytes().to_vec()).map_err(|_| {
                        HawkError::bare(ErrKind::Inval, "module argument contains NUL")
                    })?;
                    let ptr = c.as_ptr() as *mut libc::c_char;
                    keep.push(c);
                    RawValue { tag: 3, i: 0, f: 0.0, s: ptr }
                }
            };
            raw.push(cell);
        }

        let mut ret = RawValue { tag: 0, i: 0, f: 0.0, s: std::ptr::null_mut() };
        // SAFETY: argv points at `raw` which outlives the call; ret is
        // a valid out-cell.
        let rc = unsafe { (spec.call)(raw.len(), raw.as_ptr(), &mut ret) };
        drop(keep);

        if rc != 0 {
            return Err(HawkError::bare(
                ErrKind::Syserr,
                format!("{}::{} failed with code {}", self.name, sym, rc),
            ));
        }

        let out = match ret.tag {
            0 => Value::Nil,
            1 => Value::Int(ret.i),
            2 => Value::Flt(ret.f),
            3 => {
                if ret.s.is_null() {
                    Value::str_from("")
                } else {
                    // SAFETY: tag 3 promises a malloc'd NUL-terminated
                    // string the host must free.
                    let text = unsafe { CStr::from_ptr(ret.s) }.to_string_lossy().to_string();
                    unsafe { libc::free(ret.s as *mut libc::c_void) };
                    Value::str_from(&text)
                }
            }
            other => {
                return Err(HawkError::bare(
                    ErrKind::Inval,
                    format!("{}::{} returned unknown tag {}", self.name, sym, other),
                ))
            }
        };
        Ok(out)
    }

    fn unload(&self) {
        if let Some(unload) = self.desc.unload {
            // SAFETY: the last call before dlclose.
            unsafe {
                unload();
            }
        }
    }
}

impl Drop for DynModule {
    fn drop(&mut self) {
        if !self.handle.is_null() {
            unsafe {
                libc::dlclose(self.handle);
            }
        }
    }
}

// ─── The sys module ──────────────────────────────────────────

#[derive(Default)]
struct SysState {
    errmsg: String,
}

/// Built-in `sys` module: process identity, time, and sleep. Its
/// per-runtime state lives in the ordered registry keyed by runtime
/// id.
pub struct SysMod {
    states: RefCell<BTreeMap<RtxId, SysState>>,
}

/// Sorted by name.
const SYS_FNS: &[(&str, usize, usize)] = &[
    ("errmsg", 0, 0),
    ("getgid", 0, 0),
    ("getpid", 0, 0),
    ("getppid", 0, 0),
    ("getuid", 0, 0),
    ("gettime", 0, 0),
    ("sleep", 1, 1),
];

impl SysMod {
    pub fn new() -> Self {
        SysMod {
            states: RefCell::new(BTreeMap::new()),
        }
    }

    fn set_errmsg(&self, rtx: RtxId, msg: &str) {
        let mut states = self.states.borrow_mut();
        states.entry(rtx).or_default().errmsg = msg.to_string();
    }
}

impl ModuleLib for SysMod {
    fn name(&self) -> &str {
        "sys"
    }

    fn query(&self, sym: &str) -> Option<ModSym> {
        SYS_FNS
            .binary_search_by(|(n, _, _)| n.cmp(&sym))
            .ok()
            .map(|i| ModSym::Func {
                min_args: SYS_FNS[i].1,
                max_args: SYS_FNS[i].2,
            })
    }

    fn init_rtx(&self, rtx: RtxId) {
        self.states.borrow_mut().insert(rtx, SysState::default());
    }

    fn fini_rtx(&self, rtx: RtxId) {
        self.states.borrow_mut().remove(&rtx);
    }

    fn call(&self, sym: &str, rtx: &mut Rtx, args: &[Value]) -> Result<Value> {
        match sym {
            "getpid" => Ok(Value::Int(unsafe { libc::getpid() } as i64)),
            "getppid" => Ok(Value::Int(unsafe { libc::getppid() } as i64)),
            "getuid" => Ok(Value::Int(unsafe { libc::getuid() } as i64)),
            "getgid" => Ok(Value::Int(unsafe { libc::getgid() } as i64)),
            "gettime" => {
                let now = chrono::Utc::now();
                Ok(Value::Flt(now.timestamp_millis() as f64 / 1000.0))
            }
            "sleep" => {
                let secs = args[0]
                    .to_flt(true)
                    .map_err(|k| HawkError::bare(k, "sleep needs a number"))?;
                if secs < 0.0 {
                    self.set_errmsg(rtx.rtx_id, "negative sleep interval");
                    return Ok(Value::Int(-1));
                }
                // Sleep in slices so a halt request interrupts promptly.
                let mut remaining = std::time::Duration::from_secs_f64(secs);
                let slice = std::time::Duration::from_millis(50);
                while !remaining.is_zero() {
                    if rtx.halted() {
                        break;
                    }
                    let step = remaining.min(slice);
                    std::thread::sleep(step);
                    remaining -= step;
                }
                Ok(Value::Int(0))
            }
            "errmsg" => {
                let states = self.states.borrow();
                let msg = states
                    .get(&rtx.rtx_id)
                    .map(|s| s.errmsg.clone())
                    .unwrap_or_default();
                Ok(Value::str_from(&msg))
            }
            other => Err(HawkError::bare(
                ErrKind::Modnonm,
                format!("sys::{} is not exported", other),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtx::tests::run_program;

    #[test]
    fn test_sys_query_table_sorted() {
        let m = SysMod::new();
        assert!(m.query("getpid").is_some());
        assert!(m.query("sleep").is_some());
        assert!(m.query("nosuch").is_none());
        for w in SYS_FNS.windows(2) {
            assert!(w[0].0 < w[1].0, "sys table must stay sorted");
        }
    }

    #[test]
    fn test_sys_getpid_from_script() {
        let (out, _) = run_program("BEGIN { print (sys::getpid() > 0) }", "");
        assert_eq!(out, "1\n");
    }

    #[test]
    fn test_sys_gettime_moves_forward() {
        let (out, _) = run_program("BEGIN { print (sys::gettime() > 1000000000) }", "");
        assert_eq!(out, "1\n");
    }

    #[test]
    fn test_unknown_module_symbol_fails() {
        let caught = std::panic::catch_unwind(|| run_program("BEGIN { sys::bogus() }", ""));
        assert!(caught.is_err());
    }

    #[test]
    fn test_missing_module_fails() {
        let caught = std::panic::catch_unwind(|| run_program("BEGIN { nosuchmod::f() }", ""));
        assert!(caught.is_err());
    }

    #[test]
    fn test_per_rtx_state_registry() {
        let m = SysMod::new();
        m.init_rtx(1);
        m.init_rtx(2);
        m.set_errmsg(1, "one");
        m.set_errmsg(2, "two");
        assert_eq!(m.states.borrow().get(&1).unwrap().errmsg, "one");
        assert_eq!(m.states.borrow().get(&2).unwrap().errmsg, "two");
        m.fini_rtx(1);
        assert!(m.states.borrow().get(&1).is_none());
        assert!(m.states.borrow().get(&2).is_some());
    }

    #[test]
    fn test_host_init_once_and_fini() {
        let mut host = ModuleHost::new(Vec::new(), "libhawk-".into(), ".so".into());
        host.get_or_load("sys").unwrap();
        host.ensure_rtx_init("sys", 7);
        host.ensure_rtx_init("sys", 7);
        assert_eq!(host.inited.len(), 1);
        host.fini_rtx(7);
        assert!(host.inited.is_empty());
    }
}
