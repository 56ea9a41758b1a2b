//! Epoch-stamped visited set over arena slots.
//!
//! Marking a slot writes the current epoch into its cell; starting a new
//! traversal bumps the epoch, so resets are O(1) except for the rare wrap.

use std::cell::RefCell;

#[derive(Debug)]
pub struct VisitedSet {
    stamps: Vec<u16>,
    epoch: u16,
}

impl VisitedSet {
    pub fn with_slots(slots: usize) -> Self {
        Self {
            stamps: vec![0u16; slots],
            epoch: 1,
        }
    }

    /// Starts a new traversal over an arena of `slots` slots.
    pub fn reset(&mut self, slots: usize) {
        if slots > self.stamps.len() {
            self.stamps.resize(slots, 0);
        }
        if self.epoch == u16::MAX {
            self.stamps.fill(0);
            self.epoch = 1;
        } else {
            self.epoch += 1;
        }
    }

    /// Marks `slot`. Returns `true` the first time a slot is seen in this traversal.
    ///
    /// Slots past the current capacity (published after `reset`) grow the set.
    #[inline]
    pub fn mark(&mut self, slot: u32) -> bool {
        let idx = slot as usize;
        if idx >= self.stamps.len() {
            self.stamps.resize(idx + 1, 0);
        }
        let cell = &mut self.stamps[idx];
        if *cell == self.epoch {
            false
        } else {
            *cell = self.epoch;
            true
        }
    }
}

impl Default for VisitedSet {
    fn default() -> Self {
        Self::with_slots(0)
    }
}

thread_local! {
    static VISITED: RefCell<VisitedSet> = RefCell::new(VisitedSet::default());
}

/// Runs `f` with this thread's reusable visited set, reset for `slots` slots.
///
/// Falls back to a fresh set if the thread-local one is already borrowed.
pub fn with_visited<R>(slots: usize, f: impl FnOnce(&mut VisitedSet) -> R) -> R {
    VISITED.with(|cell| match cell.try_borrow_mut() {
        Ok(mut set) => {
            set.reset(slots);
            f(&mut set)
        }
        Err(_) => {
            let mut set = VisitedSet::with_slots(slots);
            f(&mut set)
        }
    })
}
