use crate::error::{DocViewError, Result};
use std::cell::Cell;
use std::rc::Rc;

/// Cancellation token shared between a view coordinator and the
/// callbacks it hands out. Once cancelled it never becomes live again.
#[derive(Debug, Clone)]
pub struct Liveness {
    alive: Rc<Cell<bool>>,
}

impl Liveness {
    pub fn new() -> Self {
        Liveness {
            alive: Rc::new(Cell::new(true)),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.get()
    }

    pub fn cancel(&self) {
        self.alive.set(false);
    }

    /// `Err(Cancelled)` once the owner has been torn down. Checked before
    /// every state commit.
    pub fn check(&self) -> Result<()> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(DocViewError::Cancelled)
        }
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}
