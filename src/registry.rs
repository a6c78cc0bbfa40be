use crate::protocol::{PlaneId, PLANE_SLOTS};
use static_assertions::const_assert;

const FULL_MASK: u16 = u16::MAX;

const_assert!(PLANE_SLOTS <= u16::BITS as usize);

/// The set of plane IDs currently in use, one bit per ID.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaneRegistry {
    allocated: u16,
}

impl PlaneRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands out the lowest free ID, or `None` when every slot is taken.
    pub fn allocate(&mut self) -> Option<PlaneId> {
        if self.is_full() {
            return None;
        }

        let lowest = (!self.allocated).trailing_zeros() as u8;
        self.allocated |= 1 << lowest;
        Some(PlaneId::from_nibble(lowest))
    }

    pub fn release(&mut self, id: PlaneId) {
        self.allocated &= !(1 << id.get());
    }

    pub fn is_allocated(&self, id: PlaneId) -> bool {
        self.allocated & (1 << id.get()) != 0
    }

    pub fn is_full(&self) -> bool {
        self.allocated == FULL_MASK
    }

    pub fn allocated_count(&self) -> u32 {
        self.allocated.count_ones()
    }

    pub fn mask(&self) -> u16 {
        self.allocated
    }
}
