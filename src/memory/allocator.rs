//! This module contains the deterministic allocator that assigns base
//! addresses to memory objects.

use rand::Rng;
use rand_chacha::{rand_core::SeedableRng, ChaCha8Rng};

use crate::constant::{ALLOCATION_ALIGNMENT, ALLOCATION_BASE_ADDRESS};

/// An allocator of fresh, non-overlapping base addresses.
///
/// Addresses are handed out in increasing order with a small randomised gap
/// between allocations. The gap is drawn from a seeded generator, so two
/// runs with equal seeds allocate identically; the jitter exists so that
/// adjacent allocations are not byte-adjacent and off-by-one accesses fault
/// rather than silently landing in a neighbour.
#[derive(Clone, Debug)]
pub struct Allocator {
    next_address: u64,
    next_id: u64,
    rng: ChaCha8Rng,
}

impl Allocator {
    /// Constructs an allocator whose gap jitter derives from `seed`.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            next_address: ALLOCATION_BASE_ADDRESS,
            next_id: 0,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Reserves `size` bytes, returning the object identity and base
    /// address of the reservation.
    pub fn allocate(&mut self, size: u64) -> (u64, u64) {
        let id = self.next_id;
        self.next_id += 1;

        let address = self.next_address;
        let gap = u64::from(self.rng.gen_range(1u8..=16)) * ALLOCATION_ALIGNMENT;
        let advance = size.max(1).next_multiple_of(ALLOCATION_ALIGNMENT) + gap;
        self.next_address = self.next_address.saturating_add(advance);

        (id, address)
    }
}

#[cfg(test)]
mod test {
    use super::Allocator;

    #[test]
    fn allocations_never_overlap() {
        let mut allocator = Allocator::new(7);
        let (_, a) = allocator.allocate(16);
        let (_, b) = allocator.allocate(32);
        let (_, c) = allocator.allocate(1);

        assert!(a + 16 <= b);
        assert!(b + 32 <= c);
    }

    #[test]
    fn equal_seeds_allocate_identically() {
        let mut left = Allocator::new(99);
        let mut right = Allocator::new(99);

        for _ in 0..10 {
            assert_eq!(left.allocate(24), right.allocate(24));
        }
    }

    #[test]
    fn identities_are_sequential() {
        let mut allocator = Allocator::new(0);
        assert_eq!(allocator.allocate(8).0, 0);
        assert_eq!(allocator.allocate(8).0, 1);
        assert_eq!(allocator.allocate(8).0, 2);
    }
}
