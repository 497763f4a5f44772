use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::Error;
use crate::hash::{BucketHash, Fibonacci};
use crate::map::FerryMap;
use crate::mem::Stream;
use crate::raw::probe::{self, ProbeResult};
use crate::raw::{self, Slot};
use crate::word::{Key, Word};

/// The device-side face of a [`FerryMap`] during a parallel phase.
///
/// A handle is obtained from [`FerryMap::upload`] and holds a mutable
/// borrow of the map for its whole lifetime, so the host cannot observe or
/// mutate the map mid-phase. All handle operations take `&self` and are
/// safe to call from any number of threads sharing the handle by
/// reference; conflicts on a slot are resolved by per-slot atomics, with
/// last-writer-wins semantics per key and no ordering across slots.
///
/// The aggregate state a kernel may grow (the fill count, the observed
/// overflow, the active backing index) lives in a device mirror inside the
/// handle and is folded back into the map by [`reclaim`](Self::reclaim).
/// Dropping the handle instead of reclaiming it writes the counters back
/// and restores host residency, but never rehashes; prefer `reclaim`.
///
/// Absent-key [`read`](Self::read)s and a saturated table abort the kernel,
/// which this host-side rendition models as a panic.
#[must_use = "a device handle left unreclaimed never folds parallel growth back into the map"]
pub struct DeviceHandle<'m, K: Key, V: Word, H = Fibonacci, const B: usize = 8> {
    owner: &'m mut FerryMap<K, V, H, B>,
    // Snapshots taken at upload.
    size_power: u8,
    // Device-resident aggregates, reconciled at reclaim.
    fill: AtomicUsize,
    observed_overflow: AtomicUsize,
    active_index: AtomicUsize,
}

impl<'m, K: Key, V: Word, H, const B: usize> DeviceHandle<'m, K, V, H, B> {
    pub(crate) fn new(owner: &'m mut FerryMap<K, V, H, B>) -> DeviceHandle<'m, K, V, H, B> {
        let size_power = owner.size_power();
        let fill = AtomicUsize::new(owner.len());
        let observed_overflow = AtomicUsize::new(owner.observed_overflow());
        let active_index = AtomicUsize::new(owner.active_backing_index());
        DeviceHandle {
            owner,
            size_power,
            fill,
            observed_overflow,
            active_index,
        }
    }

    fn slots(&self) -> &[Slot<K, V>] {
        self.owner.slots()
    }

    fn reconcile(&mut self) {
        let fill = self.fill.load(Ordering::Acquire);
        let observed = self.observed_overflow.load(Ordering::Acquire);
        let active = self.active_index.load(Ordering::Acquire);
        self.owner.sync_from_device(fill, observed, active);
    }

    /// Number of occupied slots. Exact only once all inserting threads
    /// have finished; mid-phase it can trail an in-flight claim by one per
    /// inserter.
    pub fn fill(&self) -> usize {
        self.fill.load(Ordering::Acquire)
    }

    /// The probe window readers currently use. Never decreases during the
    /// phase.
    pub fn observed_overflow(&self) -> usize {
        self.observed_overflow.load(Ordering::Acquire)
    }

    pub fn bucket_count(&self) -> usize {
        self.slots().len()
    }

    pub fn size_power(&self) -> u8 {
        self.size_power
    }
}

impl<K: Key, V: Word, H: BucketHash<K>, const B: usize> DeviceHandle<'_, K, V, H, B> {
    /// Reads the value for `key`, which the caller asserts is present.
    ///
    /// # Panics
    ///
    /// Panics if the key is absent; asking for a missing key is a contract
    /// violation that aborts the kernel.
    pub fn read(&self, key: K) -> V {
        match self.get(key) {
            Some(value) => value,
            None => panic!("read of a key that is not in the table"),
        }
    }

    /// Returns the value for `key`, probing the observed overflow window.
    ///
    /// A concurrent writer of the same key may or may not be visible; the
    /// value returned is some value that was stored for the key.
    pub fn get(&self, key: K) -> Option<V> {
        let slots = self.slots();
        let window = self.observed_overflow.load(Ordering::Acquire);
        let hash = H::hash(key, self.size_power);
        match probe::probe_slots(slots, hash, window, key, Ordering::Acquire) {
            ProbeResult::Match(i) => Some(slots[i].value(Ordering::Acquire)),
            ProbeResult::Vacant(_) | ProbeResult::Exhausted => None,
        }
    }

    pub fn contains_key(&self, key: K) -> bool {
        self.get(key).is_some()
    }

    /// Index of the slot holding `key`, probing the observed window.
    pub fn find_index(&self, key: K) -> Option<usize> {
        let window = self.observed_overflow.load(Ordering::Acquire);
        let hash = H::hash(key, self.size_power);
        match probe::probe_slots(self.slots(), hash, window, key, Ordering::Acquire) {
            ProbeResult::Match(i) => Some(i),
            ProbeResult::Vacant(_) | ProbeResult::Exhausted => None,
        }
    }

    /// Inserts or overwrites `key -> value`.
    ///
    /// Concurrent `set`s of the same key serialize on the slot's key cell:
    /// exactly one claims the slot and bumps the fill count, every writer
    /// stores its value, and whichever store lands last wins. The probe
    /// window is widened for readers before returning.
    ///
    /// # Panics
    ///
    /// Panics if every bucket holds some other key; a saturated table
    /// aborts the kernel. Uploading at a sane load factor makes this
    /// unreachable.
    pub fn set(&self, key: K, value: V) {
        debug_assert!(key != K::EMPTY, "the empty-slot sentinel is not a key");
        self.claim(key, |slot| V::store(&slot.value, value, Ordering::Release));
    }

    /// Inserts `key -> value` if the key is absent; a present key keeps its
    /// stored value. Returns whether this call inserted.
    ///
    /// Two threads racing to insert the same absent key may both report an
    /// insertion; the stored value is then either of theirs.
    pub fn insert(&self, key: K, value: V) -> bool {
        if self.contains_key(key) {
            return false;
        }
        self.set(key, value);
        true
    }

    /// Returns the atomic value cell for `key`, claiming a slot if the key
    /// is absent, for in-kernel arithmetic on values. A freshly claimed
    /// cell starts at zero.
    ///
    /// ```
    /// use ferrymap::{FerryMap, Stream};
    /// use std::sync::atomic::Ordering;
    ///
    /// let stream = Stream::default();
    /// let mut histogram: FerryMap<u32, u64> = FerryMap::new();
    /// let handle = histogram.upload(&stream);
    ///
    /// // Kernel threads accumulate without read-modify-write races.
    /// handle.value_cell(9).fetch_add(2, Ordering::Relaxed);
    /// handle.value_cell(9).fetch_add(3, Ordering::Relaxed);
    ///
    /// handle.reclaim(&stream)?;
    /// assert_eq!(histogram.get(9), Some(5));
    /// # Ok::<(), ferrymap::Error>(())
    /// ```
    pub fn value_cell(&self, key: K) -> &V::Atomic {
        debug_assert!(key != K::EMPTY, "the empty-slot sentinel is not a key");
        let slot = self.claim(key, |_| {});
        &slot.value
    }

    // The conflict-tolerant claim loop. Starting at the home bucket, CAS
    // each slot's key from EMPTY; owning the slot (we installed the key) or
    // losing it to a peer installing the same key both finish the claim.
    // `publish` runs on the claimed slot before the probe window widens.
    fn claim(&self, key: K, publish: impl FnOnce(&Slot<K, V>)) -> &Slot<K, V> {
        let slots = self.slots();
        let mask = slots.len() - 1;
        let hash = H::hash(key, self.size_power);
        let mut probe = probe::Probe::start(hash, mask);

        while probe.len < slots.len() {
            let slot = &slots[probe.i];
            match K::compare_exchange(
                &slot.key,
                K::EMPTY,
                key,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    // Fresh slot: this thread alone accounts for it.
                    publish(slot);
                    self.fill.fetch_add(1, Ordering::AcqRel);
                    self.observed_overflow
                        .fetch_max(probe.len + 1, Ordering::AcqRel);
                    return slot;
                }
                Err(occupant) if occupant == key => {
                    publish(slot);
                    self.observed_overflow
                        .fetch_max(probe.len + 1, Ordering::AcqRel);
                    return slot;
                }
                Err(_) => probe.next(mask),
            }
        }

        panic!("insert saturated all {} buckets", slots.len());
    }

    /// Removes `key`, reseating displaced entries. Returns whether the key
    /// was present.
    ///
    /// Erase serializes per field through atomic exchanges but tolerates no
    /// concurrent operations on the entries it reseats; kernels that erase
    /// partition the key space among threads.
    pub fn erase(&self, key: K) -> bool {
        match self.find_index(key) {
            Some(i) => self.erase_index(i),
            None => false,
        }
    }

    /// Clears the slot at `index` and repairs displacement behind it.
    /// Returns whether the slot was occupied.
    pub fn erase_index(&self, index: usize) -> bool {
        let window = self.observed_overflow.load(Ordering::Acquire).max(B);
        let cleared =
            raw::erase_and_repair::<K, V, H>(self.slots(), self.size_power, window, index);
        if cleared {
            self.fill.fetch_sub(1, Ordering::AcqRel);
        }
        cleared
    }

    /// Iterates over occupied slots in ascending index order, yielding
    /// `(index, key, value)`.
    ///
    /// Slots written concurrently with the traversal may or may not be
    /// observed.
    pub fn iter(&self) -> DeviceIter<'_, K, V> {
        DeviceIter {
            slots: self.slots(),
            index: 0,
        }
    }

    /// Ends the parallel phase: folds the fill count, observed overflow and
    /// active backing index back into the map, transfers the buckets toward
    /// the host, and rehashes to the next size power if the phase pushed
    /// the observed overflow past the configured window.
    pub fn reclaim(mut self, stream: &Stream) -> Result<(), Error> {
        self.reconcile();
        self.owner.bank_mut().active_mut().optimize_for_host(stream);
        stream.synchronize();

        let result = if self.owner.observed_overflow() > B {
            let next = self.owner.size_power() + 1;
            self.owner.rehash(next)
        } else {
            Ok(())
        };

        // Reconciliation is done; keep Drop from repeating it.
        mem::forget(self);
        result
    }
}

impl<K: Key, V: Word, H, const B: usize> Drop for DeviceHandle<'_, K, V, H, B> {
    fn drop(&mut self) {
        self.reconcile();
        self.owner
            .bank_mut()
            .active_mut()
            .optimize_for_host(&Stream::default());
    }
}

/// An iterator over the occupied slots seen through a [`DeviceHandle`],
/// yielding `(index, key, value)` in ascending index order.
pub struct DeviceIter<'a, K: Key, V: Word> {
    slots: &'a [Slot<K, V>],
    index: usize,
}

impl<K: Key, V: Word> Iterator for DeviceIter<'_, K, V> {
    type Item = (usize, K, V);

    fn next(&mut self) -> Option<(usize, K, V)> {
        while self.index < self.slots.len() {
            let i = self.index;
            self.index += 1;
            let slot = &self.slots[i];
            let key = slot.key(Ordering::Acquire);
            if key != K::EMPTY {
                return Some((i, key, slot.value(Ordering::Acquire)));
            }
        }
        None
    }
}
