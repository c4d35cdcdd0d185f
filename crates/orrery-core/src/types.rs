//! Scene object identifiers.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Identifier of a scene object.
///
/// IDs are handed out by an [`IdAllocator`] owned by whoever builds the
/// scene; there is no process-wide counter.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable, Serialize,
    Deserialize,
)]
#[repr(transparent)]
pub struct ObjectId(pub u32);

impl ObjectId {
    /// Raw index value.
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

/// Monotonic allocator for [`ObjectId`]s.
#[derive(Debug, Default, Clone)]
pub struct IdAllocator {
    next: u32,
}

impl IdAllocator {
    /// Create an allocator whose first ID is 0.
    pub const fn new() -> Self {
        Self { next: 0 }
    }

    /// Hand out the next unused ID.
    pub fn allocate(&mut self) -> ObjectId {
        let id = ObjectId(self.next);
        self.next += 1;
        id
    }

    /// Number of IDs handed out so far.
    pub const fn allocated(&self) -> u32 {
        self.next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_sequential() {
        let mut ids = IdAllocator::new();
        assert_eq!(ids.allocate(), ObjectId(0));
        assert_eq!(ids.allocate(), ObjectId(1));
        assert_eq!(ids.allocated(), 2);
    }

    #[test]
    fn allocators_are_independent() {
        let mut a = IdAllocator::new();
        let mut b = IdAllocator::new();
        a.allocate();
        a.allocate();
        assert_eq!(b.allocate(), ObjectId(0));
    }
}
