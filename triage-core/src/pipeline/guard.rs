//! Single-slot guard serialising classification runs.
//!
//! A caller that finds the guard held is turned away immediately; nothing
//! waits on it. The permit releases the guard when dropped, so every exit
//! path of a classification (success, early return, failure) frees it.

use parking_lot::Mutex;

#[derive(Debug, Default)]
pub struct ClassificationGuard {
    busy: Mutex<bool>,
}

impl ClassificationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check-and-set the busy flag. `None` when a classification is in flight.
    pub fn try_acquire(&self) -> Option<GuardPermit<'_>> {
        let mut busy = self.busy.lock();
        if *busy {
            return None;
        }
        *busy = true;
        Some(GuardPermit { guard: self })
    }

    pub fn is_held(&self) -> bool {
        *self.busy.lock()
    }
}

/// Proof of holding the guard. Releases on drop.
#[derive(Debug)]
pub struct GuardPermit<'a> {
    guard: &'a ClassificationGuard,
}

impl Drop for GuardPermit<'_> {
    fn drop(&mut self) {
        *self.guard.busy.lock() = false;
    }
}
