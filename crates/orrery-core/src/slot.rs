//! Ring arithmetic for frame slots and ping-pong buffers.
//!
//! Both the frames-in-flight ring and the simulation ping-pong buffers cycle
//! through `len` slots; these helpers keep the modular arithmetic in one place.

/// Slot following `slot` in a ring of `len` slots.
#[inline]
pub const fn next_slot(slot: usize, len: usize) -> usize {
    (slot + 1) % len
}

/// Slot preceding `slot` in a ring of `len` slots.
#[inline]
pub const fn previous_slot(slot: usize, len: usize) -> usize {
    (slot + len - 1) % len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_wraps_around() {
        assert_eq!(next_slot(0, 2), 1);
        assert_eq!(next_slot(1, 2), 0);
        assert_eq!(next_slot(2, 3), 0);
    }

    #[test]
    fn previous_wraps_around() {
        assert_eq!(previous_slot(0, 2), 1);
        assert_eq!(previous_slot(1, 2), 0);
        assert_eq!(previous_slot(0, 3), 2);
    }

    #[test]
    fn next_and_previous_are_inverse() {
        for len in 1..5 {
            for slot in 0..len {
                assert_eq!(previous_slot(next_slot(slot, len), len), slot);
            }
        }
    }
}
