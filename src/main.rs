use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use clap::Parser;

use hawk::cmgr::find_cmgr;
use hawk::rtx::RtxIo;
use hawk::{Hawk, Traits, Value};

#[derive(Parser)]
#[command(name = "hawk")]
#[command(about = "An embeddable AWK-superset interpreter")]
#[command(disable_version_flag = true)]
struct Cli {
    /// Print version and exit
    #[arg(long)]
    version: bool,

    /// Show extra information on exit
    #[arg(short = 'D')]
    debug_dump: bool,

    /// Call a function instead of entering the pattern-action loop;
    /// remaining arguments are passed to it
    #[arg(short = 'c', long = "call", value_name = "name")]
    call: Option<String>,

    /// Source script file (repeatable)
    #[arg(short = 'f', long = "file", value_name = "file")]
    files: Vec<String>,

    /// Write the deparsed script to this file
    #[arg(short = 'd', long = "deparsed-file", value_name = "file")]
    deparsed_file: Option<String>,

    /// Console output file (repeatable)
    #[arg(short = 't', long = "console-output", value_name = "file")]
    console_output: Vec<String>,

    /// Set the field separator (FS)
    #[arg(short = 'F', long = "field-separator", value_name = "string")]
    field_separator: Option<String>,

    /// Add a global variable with a value (var=value, repeatable)
    #[arg(short = 'v', long = "assign", value_name = "var=value")]
    assign: Vec<String>,

    /// Limit memory usage in bytes (accepted for compatibility)
    #[arg(short = 'm', long = "memory-limit", value_name = "number")]
    memory_limit: Option<u64>,

    /// Specify script file encoding
    #[arg(long = "script-encoding", value_name = "string")]
    script_encoding: Option<String>,

    /// Specify console encoding
    #[arg(long = "console-encoding", value_name = "string")]
    console_encoding: Option<String>,

    /// Directories to look for included files in (colon separated)
    #[arg(short = 'I', long = "includedirs", value_name = "dirs")]
    includedirs: Option<String>,

    /// Directories to look for module files in (colon separated)
    #[arg(long = "modlibdirs", value_name = "dirs")]
    modlibdirs: Option<String>,

    /// Run in the modern mode (default)
    #[arg(long)]
    modern: bool,

    /// Run in the classic mode
    #[arg(long)]
    classic: bool,

    // Per-trait switches, each taking on/off.
    #[arg(long, value_name = "on/off")]
    implicit: Option<String>,
    #[arg(long, value_name = "on/off")]
    multilinestr: Option<String>,
    #[arg(long, value_name = "on/off")]
    nextofile: Option<String>,
    #[arg(long, value_name = "on/off")]
    rio: Option<String>,
    #[arg(long, value_name = "on/off")]
    rwpipe: Option<String>,
    #[arg(long, value_name = "on/off")]
    newline: Option<String>,
    #[arg(long, value_name = "on/off")]
    striprecspc: Option<String>,
    #[arg(long, value_name = "on/off")]
    stripstrspc: Option<String>,
    #[arg(long, value_name = "on/off")]
    blankconcat: Option<String>,
    #[arg(long, value_name = "on/off")]
    crlf: Option<String>,
    #[arg(long, value_name = "on/off")]
    flexmap: Option<String>,
    #[arg(long, value_name = "on/off")]
    pablock: Option<String>,
    #[arg(long, value_name = "on/off")]
    rexbound: Option<String>,
    #[arg(long, value_name = "on/off")]
    ncmponstr: Option<String>,
    #[arg(long, value_name = "on/off")]
    numstrdetect: Option<String>,
    #[arg(long, value_name = "on/off")]
    strictnaming: Option<String>,
    #[arg(long, value_name = "on/off")]
    tolerant: Option<String>,

    /// Script string (when no -f is given), then input files
    #[arg()]
    rest: Vec<String>,
}

impl Cli {
    fn trait_switches(&self) -> Vec<(&'static str, &Option<String>)> {
        vec![
            ("implicit", &self.implicit),
            ("multilinestr", &self.multilinestr),
            ("nextofile", &self.nextofile),
            ("rio", &self.rio),
            ("rwpipe", &self.rwpipe),
            ("newline", &self.newline),
            ("striprecspc", &self.striprecspc),
            ("stripstrspc", &self.stripstrspc),
            ("blankconcat", &self.blankconcat),
            ("crlf", &self.crlf),
            ("flexmap", &self.flexmap),
            ("pablock", &self.pablock),
            ("rexbound", &self.rexbound),
            ("ncmponstr", &self.ncmponstr),
            ("numstrdetect", &self.numstrdetect),
            ("strictnaming", &self.strictnaming),
            ("tolerant", &self.tolerant),
        ]
    }
}

static HALT: OnceLock<Arc<AtomicBool>> = OnceLock::new();

extern "C" fn on_signal(_sig: libc::c_int) {
    if let Some(flag) = HALT.get() {
        flag.store(true, Ordering::Relaxed);
    }
}

fn print_error(msg: &str) {
    eprintln!("ERROR: {}", msg);
}

fn split_dirs(spec: &str) -> Vec<PathBuf> {
    spec.split(':')
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .collect()
}

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let cli = Cli::parse();

    if cli.version {
        println!("hawk {}", env!("CARGO_PKG_VERSION"));
        return 2;
    }

    // Encoding names are validated up front; a bad name is its own
    // exit code.
    let mut cmgr = None;
    for (what, name) in [
        ("script", &cli.script_encoding),
        ("console", &cli.console_encoding),
    ] {
        if let Some(n) = name {
            match find_cmgr(n) {
                Some(c) => cmgr = Some(c),
                None => {
                    print_error(&format!("unknown {} encoding {}", what, n));
                    return 3;
                }
            }
        }
    }

    let mut hawk = Hawk::with_cmgr(cmgr);

    if cli.classic {
        hawk.opts_mut().traits = Traits::classic();
    }
    for (name, switch) in cli.trait_switches() {
        if let Some(v) = switch {
            let on = match v.as_str() {
                "on" => true,
                "off" => false,
                other => {
                    print_error(&format!("--{} takes on/off, not {}", name, other));
                    return 1;
                }
            };
            let flag = Traits::by_name(name).expect("switch names mirror the trait table");
            hawk.set_trait(flag, on);
        }
    }

    if let Some(dirs) = &cli.includedirs {
        hawk.opts_mut().include_dirs = split_dirs(dirs);
    }
    if let Some(dirs) = &cli.modlibdirs {
        hawk.opts_mut().mod_lib_dirs = split_dirs(dirs);
        hawk.apply_module_opts();
    }
    if cli.memory_limit.is_some() {
        eprintln!("WARNING: --memory-limit is accepted but not enforced");
    }

    // Collect the script and the input files.
    let mut rest = cli.rest.clone();
    let program = if cli.files.is_empty() {
        if rest.is_empty() {
            print_error("no source script given; use -f or a script string");
            return 1;
        }
        let text = rest.remove(0);
        match hawk.parse("(command line)", &text) {
            Ok(p) => p,
            Err(e) => {
                eprintln!("{}", e.report());
                return 1;
            }
        }
    } else if cli.files.len() == 1 {
        match hawk.parse_file(&cli.files[0]) {
            Ok(p) => p,
            Err(e) => {
                eprintln!("{}", e.report());
                return 1;
            }
        }
    } else {
        // Several -f files parse as one concatenated source.
        let mut text = String::new();
        for f in &cli.files {
            match std::fs::read_to_string(f) {
                Ok(t) => {
                    text.push_str(&t);
                    text.push('\n');
                }
                Err(e) => {
                    print_error(&format!("cannot read {} - {}", f, e));
                    return 1;
                }
            }
        }
        match hawk.parse(&cli.files[0], &text) {
            Ok(p) => p,
            Err(e) => {
                eprintln!("{}", e.report());
                return 1;
            }
        }
    };

    if let Some(path) = &cli.deparsed_file {
        let text = hawk::deparse(&program);
        if let Err(e) = std::fs::write(path, text) {
            print_error(&format!("cannot write {} - {}", path, e));
            return 1;
        }
    }

    let io = RtxIo {
        console_in: None,
        console_out: None,
        console_ofiles: cli.console_output.clone(),
    };
    let mut rtx = match hawk.open_rtx(program, &rest, io) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("{}", e.report());
            return 1;
        }
    };

    for spec in &cli.assign {
        match spec.split_once('=') {
            Some((var, val)) => {
                if let Err(e) = rtx.assign_var(var, val) {
                    eprintln!("{}", e.report());
                    return 1;
                }
            }
            None => {
                print_error(&format!("bad assignment {}", spec));
                return 1;
            }
        }
    }
    if let Some(fs) = &cli.field_separator {
        if let Err(e) = rtx.assign_var("FS", fs) {
            eprintln!("{}", e.report());
            return 1;
        }
    }

    // Interrupts request a cooperative halt; the evaluator unwinds as
    // if `exit` ran.
    let _ = HALT.set(rtx.halt_handle());
    let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
    unsafe {
        libc::signal(libc::SIGINT, handler);
        libc::signal(libc::SIGTERM, handler);
    }

    let result = match &cli.call {
        Some(name) => {
            let args: Vec<Value> = rest.iter().map(|a| Value::num_or_str(a)).collect();
            rtx.call(name, &args)
        }
        None => rtx.exec_loop(),
    };

    let code = match result {
        Ok(v) => {
            if cli.debug_dump {
                dump_return(&rtx, &v);
            }
            v.to_int(true).unwrap_or(0).clamp(0, 255) as i32
        }
        Err(e) => {
            eprintln!("{}", e.report());
            1
        }
    };

    rtx.close();
    code
}

fn dump_return(rtx: &hawk::Rtx, v: &Value) {
    match v.to_str("%.6g") {
        Ok(s) if !v.is_nil() => eprintln!("[RETURN] - [{}]", s),
        _ => eprintln!("[RETURN] - ***nil***"),
    }
    eprintln!("[NAMED VARIABLES]");
    for (name, value) in rtx.named_vars() {
        eprintln!("{} = {}", name, value);
    }
    eprintln!("[END NAMED VARIABLES]");
}
