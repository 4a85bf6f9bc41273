//! Frontier tracking: the largest fully-scanned prefix of a range under out-of-order completion.

use std::collections::HashSet;

use crate::types::SeedRange;

/// What one completion did to the frontier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Advance {
    /// The frontier moved to the contained value.
    Moved(u32),
    /// Completed ahead of a gap; parked until the gap closes.
    Pending,
    /// Already accounted for (below the frontier or already parked).
    Duplicate,
    /// Outside the tracked range.
    OutOfRange,
}

/// `[start, current)` is fully evaluated; `pending` holds seeds finished past `current`.
///
/// Not persisted: a resumed run starts a fresh tracker at the checkpoint's `current`.
#[derive(Clone, Debug)]
pub struct Frontier {
    current: u32,
    end: u32,
    pending: HashSet<u32>,
}

impl Frontier {
    pub fn new(range: SeedRange) -> Self {
        Self {
            current: range.start,
            end: range.end,
            pending: HashSet::new(),
        }
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    /// Seeds completed ahead of the frontier.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_complete(&self) -> bool {
        self.current >= self.end
    }

    /// Account for a completed seed. Never moves the frontier backwards and never past a gap.
    pub fn advance(&mut self, seed: u32) -> Advance {
        if seed >= self.end {
            return Advance::OutOfRange;
        }
        if seed < self.current {
            return Advance::Duplicate;
        }
        if seed > self.current {
            return match self.pending.insert(seed) {
                true => Advance::Pending,
                false => Advance::Duplicate,
            };
        }
        self.current += 1;
        while self.pending.remove(&self.current) {
            self.current += 1;
        }
        Advance::Moved(self.current)
    }
}
