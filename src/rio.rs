/// Runtime I/O
///
/// The per-runtime channel table. Each named channel binds to one
/// adapter state: a file opened for reading/writing/appending, a
/// one-directional pipe, a bidirectional pipe, or the console. Handles
/// are created on first use, reused on later references to the same
/// name, and closed by `close(name)` or at runtime shutdown. Record
/// reads honor `RS` in all its shapes and report the matched
/// terminator text.

use std::cell::RefCell;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::{ErrKind, HawkError, Result};
use crate::rex::{has_meta, Rex};

// ─── Record Separator Modes ──────────────────────────────────

/// How `RS` splits the input into records.
#[derive(Debug, Clone)]
pub enum RsMode {
    Newline,
    Char(char),
    /// Empty `RS`: records are separated by runs of blank lines.
    Paragraph,
    Str(String),
    Rex(Rc<Rex>),
}

impl RsMode {
    pub fn from_rs(rs: &str, rexbound: bool) -> RsMode {
        let mut chars = rs.chars();
        match (chars.next(), chars.next()) {
            (None, _) => RsMode::Paragraph,
            (Some('\n'), None) => RsMode::Newline,
            (Some(c), None) => RsMode::Char(c),
            _ => {
                if has_meta(rs) {
                    RsMode::Rex(Rc::new(Rex::new(rs, rexbound)))
                } else {
                    RsMode::Str(rs.to_string())
                }
            }
        }
    }
}

// ─── Channel Timeouts ────────────────────────────────────────

/// Per-channel timeout attributes, in seconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct IoAttrs {
    pub rtimeout: Option<f64>,
    pub wtimeout: Option<f64>,
    pub ctimeout: Option<f64>,
    pub atimeout: Option<f64>,
}

impl IoAttrs {
    pub fn set(&mut self, attr: &str, value: f64) -> bool {
        let slot = match attr {
            "rtimeout" => &mut self.rtimeout,
            "wtimeout" => &mut self.wtimeout,
            "ctimeout" => &mut self.ctimeout,
            "atimeout" => &mut self.atimeout,
            _ => return false,
        };
        *slot = if value < 0.0 { None } else { Some(value) };
        true
    }

    pub fn get(&self, attr: &str) -> Option<f64> {
        match attr {
            "rtimeout" => self.rtimeout,
            "wtimeout" => self.wtimeout,
            "ctimeout" => self.ctimeout,
            "atimeout" => self.atimeout,
            _ => None,
        }
    }
}

/// Wait until `fd` is ready for the given poll events or the timeout
/// elapses.
fn wait_ready(fd: RawFd, events: libc::c_short, secs: f64) -> Result<()> {
    let mut pfd = libc::pollfd { fd, events, revents: 0 };
    let ms = (secs * 1000.0) as libc::c_int;
    let r = unsafe { libc::poll(&mut pfd, 1, ms) };
    if r < 0 {
        return Err(HawkError::bare(ErrKind::Syserr, "poll failed"));
    }
    if r == 0 {
        return Err(HawkError::bare(ErrKind::Tmout, "channel operation timed out"));
    }
    Ok(())
}

// ─── Byte Sources and Sinks ──────────────────────────────────

/// The read end of a channel, tagged by adapter kind.
pub enum ByteSource {
    File(std::fs::File),
    Child(ChildStdout),
    Stdin(io::Stdin),
    Mem(io::Cursor<Vec<u8>>),
}

impl ByteSource {
    fn raw_fd(&self) -> Option<RawFd> {
        match self {
            ByteSource::File(f) => Some(f.as_raw_fd()),
            ByteSource::Child(c) => Some(c.as_raw_fd()),
            ByteSource::Stdin(s) => Some(s.as_raw_fd()),
            ByteSource::Mem(_) => None,
        }
    }
}

impl Read for ByteSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ByteSource::File(f) => f.read(buf),
            ByteSource::Child(c) => c.read(buf),
            ByteSource::Stdin(s) => s.read(buf),
            ByteSource::Mem(m) => m.read(buf),
        }
    }
}

/// The write end of a channel.
pub enum ByteSink {
    File(std::fs::File),
    Child(ChildStdin),
    Stdout(io::Stdout),
    Mem(Rc<RefCell<Vec<u8>>>),
}

impl ByteSink {
    fn raw_fd(&self) -> Option<RawFd> {
        match self {
            ByteSink::File(f) => Some(f.as_raw_fd()),
            ByteSink::Child(c) => Some(c.as_raw_fd()),
            ByteSink::Stdout(s) => Some(s.as_raw_fd()),
            ByteSink::Mem(_) => None,
        }
    }

    fn write_all_bytes(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            ByteSink::File(f) => f.write_all(data),
            ByteSink::Child(c) => c.write_all(data),
            ByteSink::Stdout(s) => s.write_all(data),
            ByteSink::Mem(m) => {
                m.borrow_mut().extend_from_slice(data);
                Ok(())
            }
        }
    }

    fn flush_sink(&mut self) -> io::Result<()> {
        match self {
            ByteSink::File(f) => f.flush(),
            ByteSink::Child(c) => c.flush(),
            ByteSink::Stdout(s) => s.flush(),
            ByteSink::Mem(_) => Ok(()),
        }
    }
}

// ─── Record Reader ───────────────────────────────────────────

const READ_CHUNK: usize = 4096;

/// Buffered reader that carves records out of a byte source according
/// to the current record separator.
pub struct RecordReader {
    src: ByteSource,
    buf: String,
    /// Undecoded byte tail (an incomplete UTF-8 sequence at a chunk
    /// boundary).
    pending: Vec<u8>,
    eof: bool,
}

impl RecordReader {
    pub fn new(src: ByteSource) -> Self {
        RecordReader {
            src,
            buf: String::new(),
            pending: Vec::new(),
            eof: false,
        }
    }

    /// Pull more bytes from the source and decode them onto the text
    /// buffer. Invalid sequences decode to U+FFFD.
    fn fill(&mut self, rtimeout: Option<f64>) -> Result<()> {
        if let (Some(secs), Some(fd)) = (rtimeout, self.src.raw_fd()) {
            wait_ready(fd, libc::POLLIN, secs)?;
        }

        let mut chunk = [0u8; READ_CHUNK];
        let n = self.src.read(&mut chunk)?;
        if n == 0 {
            self.eof = true;
            if !self.pending.is_empty() {
                self.buf.push_str(&String::from_utf8_lossy(&self.pending));
                self.pending.clear();
            }
            return Ok(());
        }

        self.pending.extend_from_slice(&chunk[..n]);
        match std::str::from_utf8(&self.pending) {
            Ok(s) => {
                self.buf.push_str(s);
                self.pending.clear();
            }
            Err(e) => {
                let valid = e.valid_up_to();
                let (head, tail) = self.pending.split_at(valid);
                if e.error_len().is_some() {
                    // Truly invalid bytes: substitute and move on.
                    self.buf.push_str(std::str::from_utf8(head).unwrap());
                    self.buf.push_str(&String::from_utf8_lossy(tail));
                    self.pending.clear();
                } else {
                    self.buf.push_str(std::str::from_utf8(head).unwrap());
                    self.pending = tail.to_vec();
                }
            }
        }
        Ok(())
    }

    /// Locate the next separator in the buffer. Returns
    /// (record_start, record_end, consumed_end) when one is found.
    fn find_sep(&self, rs: &RsMode) -> Result<Option<(usize, usize, usize)>> {
        match rs {
            RsMode::Newline => Ok(self.buf.find('\n').map(|i| (0, i, i + 1))),
            RsMode::Char(c) => Ok(self.buf.find(*c).map(|i| (0, i, i + c.len_utf8()))),
            RsMode::Str(s) => Ok(self.buf.find(s.as_str()).map(|i| (0, i, i + s.len()))),
            RsMode::Rex(re) => {
                match re.find_from(&self.buf, 0, false)? {
                    // A match flush with the buffer end may still grow;
                    // wait for more input first.
                    Some((start, end)) => {
                        if end == self.buf.len() && !self.eof {
                            Ok(None)
                        } else if start == end {
                            // Zero-width separators would never advance.
                            Ok(None)
                        } else {
                            Ok(Some((0, start, end)))
                        }
                    }
                    None => Ok(None),
                }
            }
            RsMode::Paragraph => {
                // Skip leading blank lines, then split on the next run
                // of two or more newlines.
                let body = self.buf.trim_start_matches('\n');
                let skip = self.buf.len() - body.len();
                match body.find("\n\n") {
                    Some(i) => {
                        let mut end = skip + i + 2;
                        let bytes = self.buf.as_bytes();
                        while end < bytes.len() && bytes[end] == b'\n' {
                            end += 1;
                        }
                        // The newline run may keep growing.
                        if end == self.buf.len() && !self.eof {
                            Ok(None)
                        } else {
                            Ok(Some((skip, skip + i, end)))
                        }
                    }
                    None => Ok(None),
                }
            }
        }
    }

    /// Read the next record, returning `(record, terminator)` or `None`
    /// at end of input.
    pub fn read_record(
        &mut self,
        rs: &RsMode,
        rtimeout: Option<f64>,
    ) -> Result<Option<(String, String)>> {
        loop {
            if let Some((start, end, consumed)) = self.find_sep(rs)? {
                let record = self.buf[start..end].to_string();
                let rt = self.buf[end..consumed].to_string();
                self.buf.drain(..consumed);
                return Ok(Some((record, rt)));
            }

            if self.eof {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                let rest = match rs {
                    RsMode::Paragraph => self.buf.trim_matches('\n').to_string(),
                    RsMode::Newline | RsMode::Char('\n') => {
                        self.buf.trim_end_matches('\n').to_string()
                    }
                    _ => std::mem::take(&mut self.buf),
                };
                self.buf.clear();
                if rest.is_empty() {
                    return Ok(None);
                }
                return Ok(Some((rest, String::new())));
            }

            self.fill(rtimeout)?;
        }
    }
}

// ─── Channels ────────────────────────────────────────────────

/// Channel class, the first half of the table key. Reading and writing
/// the same name concurrently (e.g. `"cmd" | getline` while
/// `print | "cmd"`) are distinct channels; a rwpipe is one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChanClass {
    FileRead,
    FileWrite,
    PipeRead,
    PipeWrite,
    RwPipe,
}

/// One open channel: the adapter state for its kind.
pub struct Channel {
    pub class: ChanClass,
    reader: Option<RecordReader>,
    writer: Option<ByteSink>,
    child: Option<Child>,
    attrs: IoAttrs,
}

impl Channel {
    fn wait_child(&mut self) -> i64 {
        match self.child.take() {
            Some(mut child) => {
                // The write end must close first so the child sees EOF.
                self.writer.take();
                self.reader.take();
                match child.wait() {
                    Ok(status) => status.code().unwrap_or(-1) as i64,
                    Err(_) => -1,
                }
            }
            None => 0,
        }
    }
}

// ─── RIO Table ───────────────────────────────────────────────

pub struct Rio {
    channels: IndexMap<(ChanClass, String), Channel>,
    /// Attributes set before a channel of that name is opened.
    pending_attrs: IndexMap<String, IoAttrs>,

    // Console state. Input is swapped in by the runtime as it walks
    // the input file list; output goes to the current console output
    // target.
    console_in: Option<RecordReader>,
    console_out: ByteSink,
    /// Embedder-supplied stdin replacement, taken at most once.
    stdin_source: Option<ByteSource>,
}

impl Rio {
    pub fn new() -> Self {
        Rio {
            channels: IndexMap::new(),
            pending_attrs: IndexMap::new(),
            console_in: None,
            console_out: ByteSink::Stdout(io::stdout()),
            stdin_source: None,
        }
    }

    /// Replace the default console output sink.
    pub fn set_console_out(&mut self, sink: ByteSink) {
        self.console_out = sink;
    }

    /// Supply an in-memory (or otherwise pre-opened) stdin for the
    /// console.
    pub fn set_stdin_source(&mut self, src: ByteSource) {
        self.stdin_source = Some(src);
    }

    // ── Console ──────────────────────────────────────────────

    /// Open the console on the given file path, `-`/empty meaning
    /// standard input.
    pub fn console_open(&mut self, path: &str) -> Result<()> {
        let src = if path.is_empty() || path == "-" {
            match self.stdin_source.take() {
                Some(s) => s,
                None => ByteSource::Stdin(io::stdin()),
            }
        } else {
            ByteSource::File(std::fs::File::open(path).map_err(|e| {
                HawkError::bare(ErrKind::from_open(&e), format!("cannot open {} - {}", path, e))
            })?)
        };
        self.console_in = Some(RecordReader::new(src));
        Ok(())
    }

    pub fn console_is_open(&self) -> bool {
        self.console_in.is_some()
    }

    pub fn console_close(&mut self) {
        self.console_in = None;
    }

    pub fn console_read(&mut self, rs: &RsMode) -> Result<Option<(String, String)>> {
        match &mut self.console_in {
            Some(r) => r.read_record(rs, None),
            None => Ok(None),
        }
    }

    pub fn console_write(&mut self, data: &[u8]) -> Result<()> {
        self.console_out.write_all_bytes(data).map_err(HawkError::from)
    }

    /// Redirect console output to the given file path (`-` = stdout).
    pub fn console_set_ofile(&mut self, path: &str) -> Result<()> {
        let _ = self.console_out.flush_sink();
        self.console_out = if path.is_empty() || path == "-" {
            ByteSink::Stdout(io::stdout())
        } else {
            ByteSink::File(std::fs::File::create(path).map_err(|e| {
                HawkError::bare(ErrKind::from_open(&e), format!("cannot open {} - {}", path, e))
            })?)
        };
        Ok(())
    }

    // ── Named channels ───────────────────────────────────────

    fn attrs_for(&self, name: &str) -> IoAttrs {
        self.pending_attrs.get(name).copied().unwrap_or_default()
    }

    fn open_channel(&mut self, class: ChanClass, name: &str) -> Result<&mut Channel> {
        let key = (class, name.to_string());
        if self.channels.contains_key(&key) {
            return Ok(self.channels.get_mut(&key).unwrap());
        }

        let attrs = self.attrs_for(name);
        let chan = match class {
            ChanClass::FileRead => {
                let f = std::fs::File::open(name).map_err(|e| {
                    HawkError::bare(ErrKind::from_open(&e), format!("cannot open {} - {}", name, e))
                })?;
                Channel {
                    class,
                    reader: Some(RecordReader::new(ByteSource::File(f))),
                    writer: None,
                    child: None,
                    attrs,
                }
            }
            ChanClass::FileWrite => {
                // Reopening after close truncates; reuse appends.
                let f = std::fs::File::create(name).map_err(|e| {
                    HawkError::bare(ErrKind::from_open(&e), format!("cannot open {} - {}", name, e))
                })?;
                Channel {
                    class,
                    reader: None,
                    writer: Some(ByteSink::File(f)),
                    child: None,
                    attrs,
                }
            }
            ChanClass::PipeRead => {
                let mut child = Command::new("/bin/sh")
                    .arg("-c")
                    .arg(name)
                    .stdout(Stdio::piped())
                    .spawn()
                    .map_err(|e| HawkError::bare(ErrKind::Syserr, format!("cannot run {} - {}", name, e)))?;
                let out = child.stdout.take().ok_or_else(|| {
                    HawkError::bare(ErrKind::Intern, "child has no stdout")
                })?;
                Channel {
                    class,
                    reader: Some(RecordReader::new(ByteSource::Child(out))),
                    writer: None,
                    child: Some(child),
                    attrs,
                }
            }
            ChanClass::PipeWrite => {
                let mut child = Command::new("/bin/sh")
                    .arg("-c")
                    .arg(name)
                    .stdin(Stdio::piped())
                    .spawn()
                    .map_err(|e| HawkError::bare(ErrKind::Syserr, format!("cannot run {} - {}", name, e)))?;
                let sin = child.stdin.take().ok_or_else(|| {
                    HawkError::bare(ErrKind::Intern, "child has no stdin")
                })?;
                Channel {
                    class,
                    reader: None,
                    writer: Some(ByteSink::Child(sin)),
                    child: Some(child),
                    attrs,
                }
            }
            ChanClass::RwPipe => {
                let mut child = Command::new("/bin/sh")
                    .arg("-c")
                    .arg(name)
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .spawn()
                    .map_err(|e| HawkError::bare(ErrKind::Syserr, format!("cannot run {} - {}", name, e)))?;
                let sin = child.stdin.take().ok_or_else(|| {
                    HawkError::bare(ErrKind::Intern, "child has no stdin")
                })?;
                let out = child.stdout.take().ok_or_else(|| {
                    HawkError::bare(ErrKind::Intern, "child has no stdout")
                })?;
                Channel {
                    class,
                    reader: Some(RecordReader::new(ByteSource::Child(out))),
                    writer: Some(ByteSink::Child(sin)),
                    child: Some(child),
                    attrs,
                }
            }
        };

        self.channels.insert(key.clone(), chan);
        Ok(self.channels.get_mut(&key).unwrap())
    }

    /// Open (or reuse) a file write channel in append mode on first
    /// open.
    fn open_append(&mut self, name: &str) -> Result<&mut Channel> {
        let key = (ChanClass::FileWrite, name.to_string());
        if !self.channels.contains_key(&key) {
            let attrs = self.attrs_for(name);
            let f = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(name)
                .map_err(|e| {
                    HawkError::bare(ErrKind::from_open(&e), format!("cannot open {} - {}", name, e))
                })?;
            self.channels.insert(
                key.clone(),
                Channel {
                    class: ChanClass::FileWrite,
                    reader: None,
                    writer: Some(ByteSink::File(f)),
                    child: None,
                    attrs,
                },
            );
        }
        Ok(self.channels.get_mut(&key).unwrap())
    }

    /// Read one record from a named channel.
    pub fn read_record(
        &mut self,
        class: ChanClass,
        name: &str,
        rs: &RsMode,
    ) -> Result<Option<(String, String)>> {
        let chan = self.open_channel(class, name)?;
        let rtimeout = chan.attrs.rtimeout;
        match &mut chan.reader {
            Some(r) => r.read_record(rs, rtimeout),
            None => Err(HawkError::bare(
                ErrKind::Perm,
                format!("channel {} is not readable", name),
            )),
        }
    }

    /// Write bytes to a named channel, opening it on first use.
    pub fn write(&mut self, class: ChanClass, name: &str, append: bool, data: &[u8]) -> Result<()> {
        let chan = if class == ChanClass::FileWrite && append {
            self.open_append(name)?
        } else {
            self.open_channel(class, name)?
        };
        if let (Some(secs), Some(fd)) = (chan.attrs.wtimeout, chan.writer.as_ref().and_then(|w| w.raw_fd())) {
            wait_ready(fd, libc::POLLOUT, secs)?;
        }
        match &mut chan.writer {
            Some(w) => w.write_all_bytes(data).map_err(|e| {
                if e.kind() == io::ErrorKind::BrokenPipe {
                    HawkError::bare(ErrKind::Pipe, format!("broken pipe on {}", name))
                } else {
                    HawkError::from(e)
                }
            }),
            None => Err(HawkError::bare(
                ErrKind::Perm,
                format!("channel {} is not writable", name),
            )),
        }
    }

    /// Close every channel with this name. Returns the last child exit
    /// status for pipes, 0 for files, or -1 when nothing was open.
    pub fn close_name(&mut self, name: &str, which_end: Option<&str>) -> i64 {
        let keys: Vec<(ChanClass, String)> = self
            .channels
            .keys()
            .filter(|(_, n)| n == name)
            .cloned()
            .collect();
        if keys.is_empty() {
            return -1;
        }

        let mut status = 0i64;
        for key in keys {
            // A rwpipe can close one direction at a time.
            if let Some(end) = which_end {
                let chan = self.channels.get_mut(&key).unwrap();
                if chan.class == ChanClass::RwPipe {
                    match end {
                        "to" => {
                            chan.writer.take();
                            continue;
                        }
                        "from" => {
                            chan.reader.take();
                            continue;
                        }
                        _ => {}
                    }
                }
            }
            let mut chan = self.channels.shift_remove(&key).unwrap();
            if let Some(w) = &mut chan.writer {
                let _ = w.flush_sink();
            }
            if chan.child.is_some() {
                status = chan.wait_child();
            }
        }
        status
    }

    /// Flush one named output channel, or every output channel
    /// (console included) when no name is given.
    pub fn flush(&mut self, name: Option<&str>) -> Result<()> {
        match name {
            Some(n) => {
                let mut found = false;
                for ((_, cname), chan) in self.channels.iter_mut() {
                    if cname == n {
                        if let Some(w) = &mut chan.writer {
                            w.flush_sink()?;
                            found = true;
                        }
                    }
                }
                if !found {
                    return Err(HawkError::bare(
                        ErrKind::Noent,
                        format!("channel {} is not open for output", n),
                    ));
                }
                Ok(())
            }
            None => {
                for chan in self.channels.values_mut() {
                    if let Some(w) = &mut chan.writer {
                        w.flush_sink()?;
                    }
                }
                self.console_out.flush_sink()?;
                Ok(())
            }
        }
    }

    /// Set a timeout attribute on a channel by name, applying to open
    /// channels and remembering it for channels opened later.
    pub fn set_attr(&mut self, name: &str, attr: &str, value: f64) -> Result<()> {
        let mut pending = self.attrs_for(name);
        if !pending.set(attr, value) {
            return Err(HawkError::bare(
                ErrKind::Inval,
                format!("unknown I/O attribute {}", attr),
            ));
        }
        self.pending_attrs.insert(name.to_string(), pending);
        for ((_, cname), chan) in self.channels.iter_mut() {
            if cname == name {
                chan.attrs.set(attr, value);
            }
        }
        Ok(())
    }

    pub fn get_attr(&self, name: &str, attr: &str) -> Result<f64> {
        for ((_, cname), chan) in self.channels.iter() {
            if cname == name {
                return Ok(chan.attrs.get(attr).unwrap_or(-1.0));
            }
        }
        match self.pending_attrs.get(name) {
            Some(a) => Ok(a.get(attr).unwrap_or(-1.0)),
            None => Ok(-1.0),
        }
    }

    /// Shut everything down: flush and close all channels, reaping
    /// children.
    pub fn close_all(&mut self) {
        let names: Vec<String> = self
            .channels
            .keys()
            .map(|(_, n)| n.clone())
            .collect();
        for n in names {
            self.close_name(&n, None);
        }
        self.console_in = None;
        let _ = self.console_out.flush_sink();
    }
}

impl Default for Rio {
    fn default() -> Self {
        Rio::new()
    }
}

impl ErrKind {
    fn from_open(e: &io::Error) -> ErrKind {
        match e.kind() {
            io::ErrorKind::NotFound => ErrKind::Noent,
            io::ErrorKind::PermissionDenied => ErrKind::Perm,
            _ => ErrKind::Ioerr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem_reader(text: &str) -> RecordReader {
        RecordReader::new(ByteSource::Mem(io::Cursor::new(text.as_bytes().to_vec())))
    }

    fn read_all(text: &str, rs: &RsMode) -> Vec<(String, String)> {
        let mut r = mem_reader(text);
        let mut out = Vec::new();
        while let Some(rec) = r.read_record(rs, None).unwrap() {
            out.push(rec);
        }
        out
    }

    #[test]
    fn test_newline_records() {
        let recs = read_all("a\nb\nc\n", &RsMode::Newline);
        assert_eq!(
            recs,
            vec![
                ("a".to_string(), "\n".to_string()),
                ("b".to_string(), "\n".to_string()),
                ("c".to_string(), "\n".to_string()),
            ]
        );
    }

    #[test]
    fn test_last_record_without_terminator() {
        let recs = read_all("a\nb", &RsMode::Newline);
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[1], ("b".to_string(), "".to_string()));
    }

    #[test]
    fn test_single_char_separator() {
        let recs = read_all("a:b:c", &RsMode::Char(':'));
        assert_eq!(recs.len(), 3);
        assert_eq!(recs[0], ("a".to_string(), ":".to_string()));
        assert_eq!(recs[2], ("c".to_string(), "".to_string()));
    }

    #[test]
    fn test_multi_char_separator() {
        let recs = read_all("aXXbXXc", &RsMode::Str("XX".to_string()));
        assert_eq!(recs.len(), 3);
        assert_eq!(recs[1], ("b".to_string(), "XX".to_string()));
    }

    #[test]
    fn test_regex_separator_and_rt() {
        let rs = RsMode::from_rs("x+", true);
        assert!(matches!(rs, RsMode::Rex(_)));
        let recs = read_all("axxxbxc", &rs);
        assert_eq!(
            recs,
            vec![
                ("a".to_string(), "xxx".to_string()),
                ("b".to_string(), "x".to_string()),
                ("c".to_string(), "".to_string()),
            ]
        );
    }

    #[test]
    fn test_paragraph_mode() {
        let rs = RsMode::from_rs("", true);
        let recs = read_all("\n\nfirst line\nsecond\n\n\nthird\n", &rs);
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].0, "first line\nsecond");
        assert_eq!(recs[0].1, "\n\n\n");
        assert_eq!(recs[1].0, "third");
    }

    #[test]
    fn test_rs_mode_classification() {
        assert!(matches!(RsMode::from_rs("\n", true), RsMode::Newline));
        assert!(matches!(RsMode::from_rs(";", true), RsMode::Char(';')));
        assert!(matches!(RsMode::from_rs("ab", true), RsMode::Str(_)));
        assert!(matches!(RsMode::from_rs("a|b", true), RsMode::Rex(_)));
        assert!(matches!(RsMode::from_rs("", true), RsMode::Paragraph));
    }

    #[test]
    fn test_empty_input() {
        let recs = read_all("", &RsMode::Newline);
        assert!(recs.is_empty());
    }

    #[test]
    fn test_mem_console_round_trip() {
        let mut rio = Rio::new();
        rio.set_stdin_source(ByteSource::Mem(io::Cursor::new(b"x\ny\n".to_vec())));
        rio.console_open("-").unwrap();
        let out = Rc::new(RefCell::new(Vec::new()));
        rio.set_console_out(ByteSink::Mem(out.clone()));

        let mut lines = Vec::new();
        while let Some((rec, _)) = rio.console_read(&RsMode::Newline).unwrap() {
            lines.push(rec.clone());
            rio.console_write(rec.as_bytes()).unwrap();
            rio.console_write(b"!\n").unwrap();
        }
        assert_eq!(lines, vec!["x", "y"]);
        assert_eq!(&*out.borrow(), b"x!\ny!\n");
    }

    #[test]
    fn test_close_unopened_returns_minus_one() {
        let mut rio = Rio::new();
        assert_eq!(rio.close_name("nope", None), -1);
    }

    #[test]
    fn test_file_write_reuse_and_close() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("hawk-rio-test-{}", std::process::id()));
        let name = path.to_string_lossy().to_string();

        let mut rio = Rio::new();
        rio.write(ChanClass::FileWrite, &name, false, b"one\n").unwrap();
        // Reuse continues the same handle rather than truncating.
        rio.write(ChanClass::FileWrite, &name, false, b"two\n").unwrap();
        assert_eq!(rio.close_name(&name, None), 0);
        // Closing again reports "not open".
        assert_eq!(rio.close_name(&name, None), -1);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "one\ntwo\n");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_pipe_read() {
        let mut rio = Rio::new();
        let rec = rio
            .read_record(ChanClass::PipeRead, "echo hi", &RsMode::Newline)
            .unwrap();
        assert_eq!(rec.unwrap().0, "hi");
        assert_eq!(rio.close_name("echo hi", None), 0);
    }

    #[test]
    fn test_rwpipe_round_trip() {
        let mut rio = Rio::new();
        rio.write(ChanClass::RwPipe, "cat", false, b"ping\n").unwrap();
        // Close the write side so the child drains.
        rio.close_name("cat", Some("to"));
        let rec = rio
            .read_record(ChanClass::RwPipe, "cat", &RsMode::Newline)
            .unwrap();
        assert_eq!(rec.unwrap().0, "ping");
        rio.close_name("cat", None);
    }

    #[test]
    fn test_io_attrs() {
        let mut rio = Rio::new();
        rio.set_attr("chan", "rtimeout", 1.5).unwrap();
        assert_eq!(rio.get_attr("chan", "rtimeout").unwrap(), 1.5);
        assert_eq!(rio.get_attr("chan", "wtimeout").unwrap(), -1.0);
        assert!(rio.set_attr("chan", "bogus", 1.0).is_err());
    }

    #[test]
    fn test_missing_file_read_fails() {
        let mut rio = Rio::new();
        let err = rio
            .read_record(ChanClass::FileRead, "/nonexistent/hawk/file", &RsMode::Newline)
            .unwrap_err();
        assert_eq!(err.kind, ErrKind::Noent);
    }
}
