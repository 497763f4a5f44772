//! Bucket-level machinery shared by the serial map and the device view.
//!
//! A table is a power-of-two slice of [`Slot`]s. The serial regime owns the
//! slice exclusively and still goes through relaxed atomic accesses, which
//! compile to plain loads and stores; the parallel regime uses the full
//! protocol. Both regimes share the probe engine, the refill pass that
//! rehashes one backing into another, and the displacement-repair erase.

pub(crate) mod bank;
pub(crate) mod probe;

use std::sync::atomic::Ordering;

use crate::hash::BucketHash;
use crate::word::{Key, Word};

/// One bucket: a key cell and a value cell.
///
/// A slot is empty iff its key equals the sentinel `K::EMPTY`. Empty slots
/// keep a zero value so a slot claimed as an accumulator cell starts from
/// zero without an initializing store racing against peers.
pub(crate) struct Slot<K: Word, V: Word> {
    pub key: K::Atomic,
    pub value: V::Atomic,
}

impl<K: Key, V: Word> Slot<K, V> {
    pub fn empty() -> Slot<K, V> {
        Slot {
            key: K::EMPTY.into_atomic(),
            value: V::ZERO.into_atomic(),
        }
    }

    #[inline]
    pub fn key(&self, order: Ordering) -> K {
        K::load(&self.key, order)
    }

    #[inline]
    pub fn value(&self, order: Ordering) -> V {
        V::load(&self.value, order)
    }

    #[inline]
    pub fn is_occupied(&self, order: Ordering) -> bool {
        self.key(order) != K::EMPTY
    }
}

// Re-insert every occupied slot of `src` into `dst`, probing at most
// `bound` slots per key. `dst` must already be wiped. Returns the largest
// probe distance used plus one, or `None` if some key could not be placed
// within the bound; `dst` is then abandoned by the caller and `src` is
// untouched either way.
pub(crate) fn refill<K, V, H>(
    src: &[Slot<K, V>],
    dst: &[Slot<K, V>],
    dst_power: u8,
    bound: usize,
) -> Option<usize>
where
    K: Key,
    V: Word,
    H: BucketHash<K>,
{
    let mask = dst.len() - 1;
    let window = bound.min(dst.len());
    let mut observed = 0;

    for slot in src {
        let key = slot.key(Ordering::Relaxed);
        if key == K::EMPTY {
            continue;
        }
        let value = slot.value(Ordering::Relaxed);
        let hash = H::hash(key, dst_power);

        let mut probe = probe::Probe::start(hash, mask);
        let mut placed = false;
        while probe.len < window {
            let candidate = &dst[probe.i];
            if candidate.key(Ordering::Relaxed) == K::EMPTY {
                K::store(&candidate.key, key, Ordering::Relaxed);
                V::store(&candidate.value, value, Ordering::Relaxed);
                observed = observed.max(probe.len + 1);
                placed = true;
                break;
            }
            probe.next(mask);
        }

        if !placed {
            return None;
        }
    }

    Some(observed)
}

// Clear slot `index` and repair displaced entries behind it.
//
// After the slot is vacated, every occupied slot up to the next empty one
// is inspected: an entry sitting outside its home bucket is moved into the
// vacancy when the move keeps its probe distance under `bound`, and the
// vacancy advances to the slot it came from. The scan stops at the first
// empty slot; nothing further away can have probed across `index`.
//
// Returns `false` if the slot was already empty. The caller adjusts the
// fill count.
pub(crate) fn erase_and_repair<K, V, H>(
    slots: &[Slot<K, V>],
    size_power: u8,
    bound: usize,
    index: usize,
) -> bool
where
    K: Key,
    V: Word,
    H: BucketHash<K>,
{
    let mask = slots.len() - 1;
    if !slots[index].is_occupied(Ordering::Acquire) {
        return false;
    }

    K::swap(&slots[index].key, K::EMPTY, Ordering::AcqRel);
    V::swap(&slots[index].value, V::ZERO, Ordering::AcqRel);

    let mut target = index;
    for ahead in 1..slots.len() {
        let i = (index + ahead) & mask;
        let occupant = slots[i].key(Ordering::Acquire);
        if occupant == K::EMPTY {
            break;
        }

        let home = probe::home_bucket::<K, H>(occupant, size_power, mask);
        if home == i {
            // In its home bucket; untouched.
            continue;
        }

        let dist = target.wrapping_sub(home) & mask;
        if dist < bound {
            let value = slots[i].value(Ordering::Acquire);
            K::swap(&slots[target].key, occupant, Ordering::AcqRel);
            V::swap(&slots[target].value, value, Ordering::AcqRel);
            target = i;
            K::swap(&slots[target].key, K::EMPTY, Ordering::AcqRel);
            V::swap(&slots[target].value, V::ZERO, Ordering::AcqRel);
        }
    }

    true
}

// Index of the first occupied slot at or after `from`, scanning to the end
// of the table without wrapping.
pub(crate) fn next_occupied<K: Key, V: Word>(
    slots: &[Slot<K, V>],
    from: usize,
    order: Ordering,
) -> Option<usize> {
    (from..slots.len()).find(|&i| slots[i].is_occupied(order))
}
