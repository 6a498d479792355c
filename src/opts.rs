/// Interpreter Options
///
/// Trait flags, depth limits, and search-path configuration shared by the
/// lexer, parser, and runtime. Traits can also be flipped mid-parse by
/// `@pragma` directives.

use std::path::PathBuf;

// ─── Traits ──────────────────────────────────────────────────

/// Behavior trait bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Traits(pub u32);

impl Traits {
    /// Allow undeclared variables.
    pub const IMPLICIT: u32 = 1 << 0;
    /// Allow raw multi-line string and regex literals.
    pub const MULTILINESTR: u32 = 1 << 1;
    /// Enable `nextofile` and `OFILENAME`.
    pub const NEXTOFILE: u32 = 1 << 2;
    /// Enable built-in I/O: `getline`, `print`, `printf`, console.
    pub const RIO: u32 = 1 << 3;
    /// Allow the bidirectional `|&` pipe.
    pub const RWPIPE: u32 = 1 << 4;
    /// A newline terminates a statement.
    pub const NEWLINE: u32 = 1 << 5;
    /// Strip leading/trailing blanks when splitting a record.
    pub const STRIPRECSPC: u32 = 1 << 6;
    /// Strip blanks in string-to-number conversion.
    pub const STRIPSTRSPC: u32 = 1 << 7;
    /// Blank-separated expressions concatenate as strings.
    pub const BLANKCONCAT: u32 = 1 << 8;
    /// Output newline as CRLF.
    pub const CRLF: u32 = 1 << 9;
    /// A map value may be assigned or returned as a whole.
    pub const FLEXMAP: u32 = 1 << 10;
    /// Enable the pattern-action loop.
    pub const PABLOCK: u32 = 1 << 11;
    /// Enable the `{n,m}` bound quantifier in regexes.
    pub const REXBOUND: u32 = 1 << 12;
    /// Compare numeric strings numerically.
    pub const NCMPONSTR: u32 = 1 << 13;
    /// Detect numeric strings during input splitting.
    pub const NUMSTRDETECT: u32 = 1 << 14;
    /// Reject unusual identifiers.
    pub const STRICTNAMING: u32 = 1 << 15;
    /// Continue past recoverable runtime errors.
    pub const TOLERANT: u32 = 1 << 16;

    /// The default modern trait set.
    pub const MODERN: u32 = Self::IMPLICIT
        | Self::MULTILINESTR
        | Self::NEXTOFILE
        | Self::RIO
        | Self::RWPIPE
        | Self::NEWLINE
        | Self::BLANKCONCAT
        | Self::FLEXMAP
        | Self::PABLOCK
        | Self::REXBOUND
        | Self::NCMPONSTR
        | Self::NUMSTRDETECT
        | Self::STRICTNAMING;

    /// The trait set for classic AWK language compatibility.
    pub const CLASSIC: u32 = Self::IMPLICIT
        | Self::RIO
        | Self::NEWLINE
        | Self::BLANKCONCAT
        | Self::PABLOCK
        | Self::STRIPSTRSPC;

    pub fn modern() -> Self {
        Traits(Self::MODERN)
    }

    pub fn classic() -> Self {
        Traits(Self::CLASSIC)
    }

    pub fn has(self, flag: u32) -> bool {
        self.0 & flag != 0
    }

    pub fn set(&mut self, flag: u32, on: bool) {
        if on {
            self.0 |= flag;
        } else {
            self.0 &= !flag;
        }
    }

    /// Look up a trait flag by its option name.
    pub fn by_name(name: &str) -> Option<u32> {
        let flag = match name {
            "implicit" => Self::IMPLICIT,
            "multilinestr" => Self::MULTILINESTR,
            "nextofile" => Self::NEXTOFILE,
            "rio" => Self::RIO,
            "rwpipe" => Self::RWPIPE,
            "newline" => Self::NEWLINE,
            "striprecspc" => Self::STRIPRECSPC,
            "stripstrspc" => Self::STRIPSTRSPC,
            "blankconcat" => Self::BLANKCONCAT,
            "crlf" => Self::CRLF,
            "flexmap" => Self::FLEXMAP,
            "pablock" => Self::PABLOCK,
            "rexbound" => Self::REXBOUND,
            "ncmponstr" => Self::NCMPONSTR,
            "numstrdetect" => Self::NUMSTRDETECT,
            "strictnaming" => Self::STRICTNAMING,
            "tolerant" => Self::TOLERANT,
            _ => return None,
        };
        Some(flag)
    }

    /// All option names with their flags, in the order the embedder lists them.
    pub fn table() -> &'static [(&'static str, u32)] {
        &[
            ("implicit", Self::IMPLICIT),
            ("multilinestr", Self::MULTILINESTR),
            ("nextofile", Self::NEXTOFILE),
            ("rio", Self::RIO),
            ("rwpipe", Self::RWPIPE),
            ("newline", Self::NEWLINE),
            ("striprecspc", Self::STRIPRECSPC),
            ("stripstrspc", Self::STRIPSTRSPC),
            ("blankconcat", Self::BLANKCONCAT),
            ("crlf", Self::CRLF),
            ("flexmap", Self::FLEXMAP),
            ("pablock", Self::PABLOCK),
            ("rexbound", Self::REXBOUND),
            ("ncmponstr", Self::NCMPONSTR),
            ("numstrdetect", Self::NUMSTRDETECT),
            ("strictnaming", Self::STRICTNAMING),
            ("tolerant", Self::TOLERANT),
        ]
    }
}

impl Default for Traits {
    fn default() -> Self {
        Traits::modern()
    }
}

// ─── Depth Limits ────────────────────────────────────────────

/// Recursion depth limits. Zero means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Depths {
    pub block_parse: usize,
    pub expr_parse: usize,
    pub block_run: usize,
    pub expr_run: usize,
    pub rex_build: usize,
    pub rex_match: usize,
    pub include: usize,
}

impl Default for Depths {
    fn default() -> Self {
        Depths {
            block_parse: 64,
            expr_parse: 256,
            block_run: 512,
            expr_run: 512,
            rex_build: 256,
            rex_match: 1024,
            include: 32,
        }
    }
}

// ─── Options ─────────────────────────────────────────────────

/// Complete interpreter configuration.
#[derive(Debug, Clone)]
pub struct Options {
    pub traits: Traits,
    pub depths: Depths,
    /// Directories searched for `@include` targets after the including
    /// file's own directory.
    pub include_dirs: Vec<PathBuf>,
    /// Directories searched for loadable modules.
    pub mod_lib_dirs: Vec<PathBuf>,
    /// Filename prefix for module shared objects.
    pub mod_prefix: String,
    /// Filename suffix for module shared objects.
    pub mod_postfix: String,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            traits: Traits::default(),
            depths: Depths::default(),
            include_dirs: Vec::new(),
            mod_lib_dirs: Vec::new(),
            mod_prefix: "libhawk-".to_string(),
            mod_postfix: ".so".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_clear() {
        let mut t = Traits(0);
        t.set(Traits::RIO, true);
        assert!(t.has(Traits::RIO));
        assert!(!t.has(Traits::RWPIPE));
        t.set(Traits::RIO, false);
        assert!(!t.has(Traits::RIO));
    }

    #[test]
    fn test_modern_includes_pablock_and_rio() {
        let t = Traits::modern();
        assert!(t.has(Traits::PABLOCK));
        assert!(t.has(Traits::RIO));
        assert!(t.has(Traits::IMPLICIT));
        assert!(t.has(Traits::REXBOUND));
    }

    #[test]
    fn test_classic_excludes_extensions() {
        let t = Traits::classic();
        assert!(t.has(Traits::PABLOCK));
        assert!(!t.has(Traits::RWPIPE));
        assert!(!t.has(Traits::NEXTOFILE));
        assert!(!t.has(Traits::MULTILINESTR));
    }

    #[test]
    fn test_by_name_round_trip() {
        for (name, flag) in Traits::table() {
            assert_eq!(Traits::by_name(name), Some(*flag), "option '{}'", name);
        }
        assert_eq!(Traits::by_name("nosuch"), None);
    }

    #[test]
    fn test_default_depths_nonzero() {
        let d = Depths::default();
        assert!(d.block_parse > 0);
        assert!(d.expr_run > 0);
        assert!(d.include > 0);
    }
}
