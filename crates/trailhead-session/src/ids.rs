//! Player ID allocation.

use std::collections::BTreeSet;

use trailhead_protocol::PlayerId;

/// Hands out the smallest player ID not currently in use.
///
/// Freed IDs go into an ordered set and the minimum is reused first. The
/// counter only advances when nothing has been freed, so IDs stay dense.
#[derive(Debug)]
pub struct IdAllocator {
    next: u32,
    freed: BTreeSet<u32>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            next: 1,
            freed: BTreeSet::new(),
        }
    }

    pub fn allocate(&mut self) -> PlayerId {
        if let Some(id) = self.freed.pop_first() {
            return PlayerId(id);
        }
        let id = self.next;
        self.next += 1;
        PlayerId(id)
    }

    /// Returns an ID to the pool. Freeing an ID that was never handed out,
    /// or freeing twice, is ignored.
    pub fn free(&mut self, id: PlayerId) {
        if id.0 == 0 || id.0 >= self.next {
            tracing::warn!(%id, "freeing an id that was never allocated");
            return;
        }
        if !self.freed.insert(id.0) {
            tracing::warn!(%id, "id freed twice");
        }
    }

    /// Number of IDs currently handed out.
    pub fn in_use(&self) -> usize {
        (self.next - 1) as usize - self.freed.len()
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
