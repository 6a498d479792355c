//! hawk - an embeddable AWK-superset interpreter
//!
//! This library parses source text into a syntax tree and executes the
//! tree against a stream of input records, driving pattern/action
//! rules, named I/O channels, and a library of intrinsic functions.

pub mod cmgr;
pub mod deparse;
pub mod error;
pub mod gem;
pub mod hawk;
pub mod lexer;
pub mod module;
pub mod opts;
pub mod parser;
pub mod rex;
pub mod rio;
pub mod rtx;
pub mod types;
pub mod value;

pub use deparse::deparse;
pub use error::{ErrKind, HawkError, Loc};
pub use hawk::Hawk;
pub use opts::{Depths, Options, Traits};
pub use rtx::{Rtx, RtxIo};
pub use types::Program;
pub use value::Value;
