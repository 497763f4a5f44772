//! The bucket bank: pre-staged backings of increasing sizes.
//!
//! A bank owns an ordered set of backings with strictly increasing size
//! powers. Exactly one is active; the others are dormant and may hold stale
//! slots, which are wiped before a backing is activated. Growing by
//! migration into an already-allocated dormant backing keeps rehash free of
//! allocation until the bank itself has to be extended.

use crate::mem::MigratableVec;
use crate::raw::Slot;
use crate::word::{Key, Word};

pub(crate) struct Bank<K: Key, V: Word> {
    backings: Vec<MigratableVec<Slot<K, V>>>,
    // Size power of `backings[0]`; entry `i` has power `base_power + i`.
    base_power: u8,
    active: usize,
}

impl<K: Key, V: Word> Bank<K, V> {
    pub fn new_backing(power: u8) -> MigratableVec<Slot<K, V>> {
        MigratableVec::filled_with(1usize << power, Slot::empty)
    }

    /// A bank holding a single backing; the degenerate form used when
    /// rehashing rebuilds in place of migrating.
    pub fn with_power(power: u8) -> Bank<K, V> {
        Bank {
            backings: vec![Self::new_backing(power)],
            base_power: power,
            active: 0,
        }
    }

    /// A bank of `depth` backings with powers `power..power + depth`, the
    /// smallest active.
    pub fn with_depth(power: u8, depth: usize) -> Bank<K, V> {
        let backings = (0..depth as u8)
            .map(|i| Self::new_backing(power + i))
            .collect();
        Bank {
            backings,
            base_power: power,
            active: 0,
        }
    }

    pub fn active(&self) -> &MigratableVec<Slot<K, V>> {
        &self.backings[self.active]
    }

    pub fn active_mut(&mut self) -> &mut MigratableVec<Slot<K, V>> {
        &mut self.backings[self.active]
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn set_active(&mut self, index: usize) {
        debug_assert!(index < self.backings.len());
        self.active = index;
    }

    pub fn backing(&self, index: usize) -> &MigratableVec<Slot<K, V>> {
        &self.backings[index]
    }

    pub fn len(&self) -> usize {
        self.backings.len()
    }

    pub fn power_of(&self, index: usize) -> u8 {
        self.base_power + index as u8
    }

    /// Bank position of the backing with the given size power, if banked.
    pub fn position_of_power(&self, power: u8) -> Option<usize> {
        let slot = power.checked_sub(self.base_power)? as usize;
        (slot < self.backings.len()).then_some(slot)
    }

    /// Appends one dormant backing of the next unbanked power.
    pub fn push_next(&mut self) {
        let power = self.base_power + self.backings.len() as u8;
        self.backings.push(Self::new_backing(power));
    }

    /// Replaces the active backing with `fresh`, which becomes the sole
    /// content of the bank. Used by the rebuild rehash path.
    pub fn replace_active(&mut self, fresh: MigratableVec<Slot<K, V>>, power: u8) {
        self.backings.clear();
        self.backings.push(fresh);
        self.base_power = power;
        self.active = 0;
    }

    /// Overwrites every slot of backing `index` with the empty state.
    pub fn wipe(&mut self, index: usize) {
        for slot in self.backings[index].as_mut_slice() {
            *K::get_mut(&mut slot.key) = K::EMPTY;
            *V::get_mut(&mut slot.value) = V::ZERO;
        }
    }
}

impl<K: Key, V: Word> Clone for Bank<K, V> {
    // Dormant backings hold stale data by contract; only the shape of the
    // bank and the contents of the active backing carry over.
    fn clone(&self) -> Bank<K, V> {
        let backings: Vec<_> = (0..self.backings.len())
            .map(|i| {
                let backing = Self::new_backing(self.power_of(i));
                if i == self.active {
                    let src = self.backings[i].as_slice();
                    for (fresh, old) in backing.as_slice().iter().zip(src) {
                        use std::sync::atomic::Ordering::Relaxed;
                        K::store(&fresh.key, old.key(Relaxed), Relaxed);
                        V::store(&fresh.value, old.value(Relaxed), Relaxed);
                    }
                }
                backing
            })
            .collect();
        Bank {
            backings,
            base_power: self.base_power,
            active: self.active,
        }
    }
}
