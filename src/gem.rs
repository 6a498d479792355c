/// Per-Instance Services
///
/// A `Gem` bundles the services every subsystem needs: the default
/// character manager and the most-recent-error slot the embedder reads
/// back through the accessor functions. One gem is shared by a `Hawk`
/// instance and every runtime context opened from it.

use std::cell::RefCell;
use std::rc::Rc;

use crate::cmgr::{default_cmgr, Cmgr};
use crate::error::HawkError;

pub struct Gem {
    cmgr: Rc<dyn Cmgr>,
    err: Option<HawkError>,
}

impl Gem {
    pub fn new(cmgr: Option<Rc<dyn Cmgr>>) -> Self {
        Gem {
            cmgr: cmgr.unwrap_or_else(default_cmgr),
            err: None,
        }
    }

    pub fn cmgr(&self) -> Rc<dyn Cmgr> {
        self.cmgr.clone()
    }

    pub fn set_cmgr(&mut self, cmgr: Rc<dyn Cmgr>) {
        self.cmgr = cmgr;
    }

    /// Record an error for later retrieval. The slot keeps only the most
    /// recent error.
    pub fn set_err(&mut self, err: HawkError) {
        self.err = Some(err);
    }

    pub fn last_err(&self) -> Option<&HawkError> {
        self.err.as_ref()
    }

    pub fn clear_err(&mut self) {
        self.err = None;
    }
}

pub type GemRef = Rc<RefCell<Gem>>;

pub fn new_gem(cmgr: Option<Rc<dyn Cmgr>>) -> GemRef {
    Rc::new(RefCell::new(Gem::new(cmgr)))
}

/// Record `err` on the gem and pass it through, so `?` propagation and
/// the embedder's error accessors stay in sync.
pub fn note_err(gem: &GemRef, err: HawkError) -> HawkError {
    gem.borrow_mut().set_err(err.clone());
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrKind, HawkError};

    #[test]
    fn test_error_slot_keeps_latest() {
        let gem = new_gem(None);
        assert!(gem.borrow().last_err().is_none());

        note_err(&gem, HawkError::bare(ErrKind::Inval, "first"));
        note_err(&gem, HawkError::bare(ErrKind::Noent, "second"));

        let g = gem.borrow();
        let e = g.last_err().unwrap();
        assert_eq!(e.kind, ErrKind::Noent);
        assert_eq!(e.msg, "second");
    }

    #[test]
    fn test_clear_err() {
        let gem = new_gem(None);
        note_err(&gem, HawkError::bare(ErrKind::Ioerr, "oops"));
        gem.borrow_mut().clear_err();
        assert!(gem.borrow().last_err().is_none());
    }

    #[test]
    fn test_default_cmgr_is_utf8() {
        let gem = new_gem(None);
        assert_eq!(gem.borrow().cmgr().name(), "utf8");
    }
}
