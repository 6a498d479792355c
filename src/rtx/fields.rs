/// Field Operations
///
/// Splits the current record into fields by `FS`, reads and writes
/// `$0`/`$n`, and keeps the record text and the field list consistent:
/// assigning a field rebuilds `$0` with `OFS`, assigning `$0`
/// re-splits, and assigning `NF` truncates or extends.

use std::rc::Rc;

use crate::error::{ErrKind, Loc};
use crate::opts::Traits;
use crate::rex::Rex;
use crate::rtx::{Exec, Rtx};
use crate::types::gbl;
use crate::value::Value;

/// Split `line` into raw field strings. The default separator (one
/// space) means runs of whitespace with leading/trailing blanks
/// dropped; a single character splits on that character; anything
/// longer splits as a regex.
pub(crate) fn split_by_fs(line: &str, fs: &str, fs_rex: Option<&Rex>) -> Exec<Vec<String>> {
    if line.is_empty() {
        return Ok(Vec::new());
    }
    if fs == " " {
        return Ok(line.split_whitespace().map(|s| s.to_string()).collect());
    }
    if let Some(re) = fs_rex {
        return Ok(re
            .split(line, false)
            .map_err(crate::rtx::Signal::from)?
            .into_iter()
            .map(|s| s.to_string())
            .collect());
    }
    let mut chars = fs.chars();
    let c = chars.next().unwrap_or(' ');
    Ok(line.split(c).map(|s| s.to_string()).collect())
}

impl Rtx {
    fn fs_string(&self) -> String {
        match &self.globals[gbl::FS] {
            Value::Str(s) | Value::NumStr(s) => s.to_string(),
            other => other.to_str("%.6g").map(|s| s.to_string()).unwrap_or_else(|_| " ".into()),
        }
    }

    /// Turn a raw field into a value, detecting numeric strings when
    /// the trait asks for it.
    pub(crate) fn field_value(&self, raw: &str) -> Value {
        if self.traits.has(Traits::NUMSTRDETECT) {
            Value::num_or_str(raw)
        } else {
            Value::str_from(raw)
        }
    }

    /// Install a new record: set `$0`, split into fields, update `NF`.
    pub(crate) fn set_record(&mut self, line: &str) -> Exec<()> {
        let mut text = line;
        if self.traits.has(Traits::STRIPRECSPC) {
            text = text.trim_matches(|c| c == ' ' || c == '\t');
        }
        self.record = text.to_string();

        let fs = self.fs_string();
        let rex = self.fs_rex()?;
        let raw = split_by_fs(&self.record, &fs, rex.as_deref())?;
        self.fields = raw.iter().map(|f| self.field_value(f)).collect();
        self.globals[gbl::NF] = Value::Int(self.fields.len() as i64);
        Ok(())
    }

    /// Read `$index`.
    pub(crate) fn get_field(&mut self, index: i64, loc: &Loc) -> Exec<Value> {
        if index < 0 {
            return Err(self.rt_err(ErrKind::Inval, loc, format!("negative field index {}", index)));
        }
        if index == 0 {
            return Ok(Value::Str(Rc::from(self.record.as_str())));
        }
        Ok(self
            .fields
            .get(index as usize - 1)
            .cloned()
            .unwrap_or(Value::Nil))
    }

    /// Rebuild `$0` by joining the current fields with `OFS`.
    pub(crate) fn rebuild_record(&mut self, loc: &Loc) -> Exec<()> {
        let ofs = self.val_to_str(&self.globals[gbl::OFS].clone(), loc)?;
        let mut parts = Vec::with_capacity(self.fields.len());
        for f in self.fields.clone() {
            parts.push(self.val_to_str(&f, loc)?.to_string());
        }
        self.record = parts.join(&ofs);
        Ok(())
    }

    /// Write `$index`. Setting `$0` re-splits; setting a field beyond
    /// `NF` extends the list with empty fields.
    pub(crate) fn set_field(&mut self, index: i64, value: Value, loc: &Loc) -> Exec<()> {
        if index < 0 {
            return Err(self.rt_err(ErrKind::Inval, loc, format!("negative field index {}", index)));
        }
        if index == 0 {
            let text = self.val_to_str(&value, loc)?.to_string();
            return self.set_record(&text);
        }

        let idx = index as usize;
        while self.fields.len() < idx {
            self.fields.push(Value::str_from(""));
        }
        self.fields[idx - 1] = value;
        self.globals[gbl::NF] = Value::Int(self.fields.len() as i64);
        self.rebuild_record(loc)
    }

    /// Assign `NF` directly, truncating or extending the field list.
    pub(crate) fn set_nf(&mut self, new_nf: i64, loc: &Loc) -> Exec<()> {
        let n = new_nf.max(0) as usize;
        if n < self.fields.len() {
            self.fields.truncate(n);
        } else {
            while self.fields.len() < n {
                self.fields.push(Value::str_from(""));
            }
        }
        self.globals[gbl::NF] = Value::Int(n as i64);
        self.rebuild_record(loc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtx::tests::run_program;

    #[test]
    fn test_default_fs_whitespace_runs() {
        let (out, _) = run_program("{ print NF, $1, $2 }", "  a \t b  \n");
        assert_eq!(out, "2 a b\n");
    }

    #[test]
    fn test_single_char_fs_keeps_empty_fields() {
        let (out, _) = run_program("BEGIN { FS = \",\" } { print NF, $2 }", "a,,c\n");
        assert_eq!(out, "3 \n");
    }

    #[test]
    fn test_regex_fs() {
        let (out, _) = run_program("BEGIN { FS = \"[,;]\" } { print $1, $2, $3 }", "a,b;c\n");
        assert_eq!(out, "a b c\n");
    }

    #[test]
    fn test_field_beyond_nf_is_empty() {
        let (out, _) = run_program("{ print \"[\" $9 \"]\" }", "a b\n");
        assert_eq!(out, "[]\n");
    }

    #[test]
    fn test_assigning_field_rebuilds_record() {
        let (out, _) = run_program("{ $2 = \"X\"; print $0 }", "a b c\n");
        assert_eq!(out, "a X c\n");
    }

    #[test]
    fn test_assigning_record_resplits() {
        let (out, _) = run_program("{ $0 = \"p q r\"; print NF, $3 }", "one\n");
        assert_eq!(out, "3 r\n");
    }

    #[test]
    fn test_record_assignment_symmetry() {
        let (out, _) = run_program("{ $0 = \"x y\"; print $0 }", "ignored\n");
        assert_eq!(out, "x y\n");
    }

    #[test]
    fn test_extending_field_pads_with_ofs() {
        let (out, _) = run_program("{ $4 = \"d\"; print $0; print NF }", "a b\n");
        assert_eq!(out, "a b  d\n4\n");
    }

    #[test]
    fn test_nf_truncation() {
        let (out, _) = run_program("{ NF = 2; print $0; print $3 }", "a b c d\n");
        assert_eq!(out, "a b\n\n");
    }

    #[test]
    fn test_nf_extension() {
        let (out, _) = run_program("BEGIN { OFS = \"-\" } { NF = 4; print $0 }", "a b\n");
        assert_eq!(out, "a-b--\n");
    }

    #[test]
    fn test_ofs_used_on_rebuild_only() {
        let (out, _) = run_program("BEGIN { OFS = \"|\" } { $1 = $1; print $0 }", "a b c\n");
        assert_eq!(out, "a|b|c\n");
    }

    #[test]
    fn test_numeric_string_comparison_of_fields() {
        // With numeric strings detected, "10" from input beats "9".
        let (out, _) = run_program("{ print ($1 > $2) }", "10 9\n");
        assert_eq!(out, "1\n");
    }
}
