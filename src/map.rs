use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::Ordering;

use crate::error::Error;
use crate::hash::{BucketHash, Fibonacci};
use crate::mem::Stream;
use crate::raw::bank::Bank;
use crate::raw::probe::{self, ProbeResult};
use crate::raw::{self, Slot};
use crate::view::DeviceHandle;
use crate::word::{Key, Word};

/// Size power of a map built with [`FerryMap::new`].
pub const DEFAULT_SIZE_POWER: u8 = 4;

/// Largest supported size power; bucket indices are 32-bit.
pub const MAX_SIZE_POWER: u8 = 32;

/// Number of pre-staged backings in [`ResizeMode::banked`].
pub const DEFAULT_BANK_DEPTH: usize = 6;

/// A dual-residency open-addressing hash map.
///
/// `FerryMap` keeps `(key, value)` pairs in a power-of-two table of slots
/// using linear probing within a bounded overflow window of `B` slots
/// (default 8). Between parallel phases it behaves like an ordinary
/// single-threaded associative container; [`upload`](FerryMap::upload)
/// hands the buckets to a [`DeviceHandle`] whose operations are safe under
/// massive write concurrency, and reclaiming the handle folds the outcome
/// of the parallel phase back into the map.
///
/// Keys and values are machine words ([`Key`] / [`Word`]); the slot whose
/// key equals `K::EMPTY` is free, so the sentinel itself can never be
/// inserted. The hash function is the compile-time policy `H`, one of
/// [`Fibonacci`], [`Fnv1a`](crate::Fnv1a) or [`Murmur`](crate::Murmur).
///
/// The map only ever grows. A probe window filling up during insertion
/// triggers a rehash to the next size power; how the new backing is
/// obtained is governed by [`ResizeMode`].
///
/// # Examples
///
/// ```
/// use ferrymap::FerryMap;
///
/// let mut map: FerryMap<u32, u32> = FerryMap::new();
/// map.insert(1, 10)?;
/// map.insert(2, 20)?;
/// assert_eq!(map.get(1), Some(10));
/// assert_eq!(map.len(), 2);
/// assert!(map.remove(1));
/// assert_eq!(map.get(1), None);
/// # Ok::<(), ferrymap::Error>(())
/// ```
pub struct FerryMap<K: Key, V: Word, H = Fibonacci, const B: usize = 8> {
    bank: Bank<K, V>,
    size_power: u8,
    fill: usize,
    observed_overflow: usize,
    mode: ResizeMode,
    _hash: PhantomData<H>,
}

/// How a rehash obtains the larger backing.
///
/// Both modes move every occupied slot into a table of the next size power
/// and retry with a bigger power if some key cannot be placed within the
/// overflow window. They differ only in where the target backing comes
/// from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResizeMode {
    /// Allocate a fresh backing for each rehash and drop the old one once
    /// the copy committed.
    Rebuild,
    /// Keep a bank of `depth` pre-allocated backings of successively
    /// doubled sizes and rehash by migrating into a dormant one, leaving
    /// the previous backing dormant in its place. Rehash allocates only
    /// when growth runs past the end of the bank.
    Banked { depth: usize },
}

impl ResizeMode {
    /// The banked mode at its default depth.
    pub fn banked() -> ResizeMode {
        ResizeMode::Banked {
            depth: DEFAULT_BANK_DEPTH,
        }
    }
}

impl Default for ResizeMode {
    fn default() -> Self {
        ResizeMode::Rebuild
    }
}

/// A builder for a [`FerryMap`].
///
/// # Examples
///
/// ```
/// use ferrymap::{FerryMap, ResizeMode};
///
/// let map: FerryMap<u64, u64> = FerryMap::builder()
///     // Start with 2^6 buckets.
///     .size_power(6)
///     // Grow by migrating inside a bank of pre-staged backings.
///     .resize_mode(ResizeMode::banked())
///     .build();
/// assert_eq!(map.bucket_count(), 64);
/// ```
pub struct FerryMapBuilder<K, V, H = Fibonacci, const B: usize = 8> {
    size_power: u8,
    mode: ResizeMode,
    _marker: PhantomData<(K, V, H)>,
}

impl<K: Key, V: Word, H, const B: usize> FerryMapBuilder<K, V, H, B> {
    /// Sets the initial size power; the map starts with `2^size_power`
    /// buckets.
    pub fn size_power(mut self, size_power: u8) -> Self {
        self.size_power = size_power;
        self
    }

    /// Sets the resize mode. See [`ResizeMode`] for details.
    pub fn resize_mode(mut self, mode: ResizeMode) -> Self {
        self.mode = mode;
        self
    }

    /// Constructs the map from the configured options.
    ///
    /// # Panics
    ///
    /// Panics if the size power is outside `1..=32`, if the overflow window
    /// `B` is zero, or if a banked mode would stage a backing past the
    /// maximum size power.
    pub fn build(self) -> FerryMap<K, V, H, B> {
        assert!(
            (1..=MAX_SIZE_POWER).contains(&self.size_power),
            "size power must be in 1..=32"
        );
        assert!(B >= 1, "the overflow window must hold at least one slot");

        let bank = match self.mode {
            ResizeMode::Rebuild => Bank::with_power(self.size_power),
            ResizeMode::Banked { depth } => {
                assert!(depth >= 1, "a bank needs at least one backing");
                assert!(
                    self.size_power as usize + depth - 1 <= MAX_SIZE_POWER as usize,
                    "bank would stage a backing past 2^32 buckets"
                );
                Bank::with_depth(self.size_power, depth)
            }
        };

        FerryMap {
            bank,
            size_power: self.size_power,
            fill: 0,
            observed_overflow: 0,
            mode: self.mode,
            _hash: PhantomData,
        }
    }
}

impl<K: Key, V: Word, H, const B: usize> fmt::Debug for FerryMapBuilder<K, V, H, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FerryMapBuilder")
            .field("size_power", &self.size_power)
            .field("resize_mode", &self.mode)
            .finish()
    }
}

impl<K: Key, V: Word, H, const B: usize> FerryMap<K, V, H, B> {
    /// Creates an empty map with `2^4` buckets and the default resize mode.
    pub fn new() -> FerryMap<K, V, H, B> {
        Self::builder().build()
    }

    /// Creates an empty map with `2^size_power` buckets.
    ///
    /// # Panics
    ///
    /// Panics if `size_power` is outside `1..=32`.
    pub fn with_size_power(size_power: u8) -> FerryMap<K, V, H, B> {
        Self::builder().size_power(size_power).build()
    }

    /// Returns a builder for a `FerryMap`.
    pub fn builder() -> FerryMapBuilder<K, V, H, B> {
        FerryMapBuilder {
            size_power: DEFAULT_SIZE_POWER,
            mode: ResizeMode::default(),
            _marker: PhantomData,
        }
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.fill
    }

    pub fn is_empty(&self) -> bool {
        self.fill == 0
    }

    /// Number of buckets in the active backing, always a power of two.
    pub fn bucket_count(&self) -> usize {
        self.bank.active().len()
    }

    /// Base-two logarithm of the bucket count.
    pub fn size_power(&self) -> u8 {
        self.size_power
    }

    /// Fraction of buckets occupied.
    pub fn load_factor(&self) -> f64 {
        self.fill as f64 / self.bucket_count() as f64
    }

    /// The compile-time overflow window: the longest probe sequence the
    /// serial regime tolerates before forcing a rehash.
    pub fn overflow_bound(&self) -> usize {
        B
    }

    /// The longest probe distance any present entry has actually needed,
    /// plus one. Grows during parallel phases and is folded back in at
    /// reclaim.
    pub fn observed_overflow(&self) -> usize {
        self.observed_overflow
    }

    /// The configured resize mode.
    pub fn resize_mode(&self) -> ResizeMode {
        self.mode
    }

    /// Position of the active backing within the bank. Always zero in
    /// [`ResizeMode::Rebuild`].
    pub fn active_backing_index(&self) -> usize {
        self.bank.active_index()
    }

    /// Number of backings currently allocated, dormant ones included.
    pub fn backing_count(&self) -> usize {
        self.bank.len()
    }

    /// The occupied slot at `index`, if any.
    pub fn slot(&self, index: usize) -> Option<(K, V)> {
        let slot = self.slots().get(index)?;
        let key = slot.key(Ordering::Relaxed);
        (key != K::EMPTY).then(|| (key, slot.value(Ordering::Relaxed)))
    }

    /// Iterates over occupied slots in ascending index order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            slots: self.slots(),
            index: 0,
        }
    }

    /// Overwrites every slot with the empty state and resets the counters.
    /// Capacity is unchanged.
    pub fn clear(&mut self) {
        let active = self.bank.active_index();
        self.bank.wipe(active);
        self.fill = 0;
        self.observed_overflow = 0;
    }

    /// Exchanges the entire contents of two maps.
    pub fn swap(&mut self, other: &mut FerryMap<K, V, H, B>) {
        std::mem::swap(self, other);
    }

    pub(crate) fn slots(&self) -> &[Slot<K, V>] {
        self.bank.active().as_slice()
    }

    pub(crate) fn bank_mut(&mut self) -> &mut Bank<K, V> {
        &mut self.bank
    }

    // Reconciliation target for the device view.
    pub(crate) fn sync_from_device(&mut self, fill: usize, observed: usize, active: usize) {
        self.fill = fill;
        self.observed_overflow = observed;
        self.bank.set_active(active);
    }
}

impl<K: Key, V: Word, H: BucketHash<K>, const B: usize> FerryMap<K, V, H, B> {
    /// Returns the value stored for `key`.
    pub fn get(&self, key: K) -> Option<V> {
        let i = self.find_index(key)?;
        Some(self.slots()[i].value(Ordering::Relaxed))
    }

    /// Returns the value stored for `key`, failing with
    /// [`Error::NotFound`] if the key is absent.
    pub fn try_get(&self, key: K) -> Result<V, Error> {
        self.get(key).ok_or(Error::NotFound)
    }

    /// Returns the slot index holding `key`.
    ///
    /// The index stays valid until the next operation that can rehash.
    pub fn find_index(&self, key: K) -> Option<usize> {
        let hash = H::hash(key, self.size_power);
        match probe::probe_slots(self.slots(), hash, B, key, Ordering::Relaxed) {
            ProbeResult::Match(i) => Some(i),
            ProbeResult::Vacant(_) | ProbeResult::Exhausted => None,
        }
    }

    pub fn contains_key(&self, key: K) -> bool {
        self.find_index(key).is_some()
    }

    /// Number of slots holding `key`: zero or one.
    pub fn count(&self, key: K) -> usize {
        usize::from(self.contains_key(key))
    }

    /// Returns a mutable reference to the value stored for `key`.
    pub fn get_mut(&mut self, key: K) -> Option<&mut V> {
        let i = self.find_index(key)?;
        let slot = &mut self.bank.active_mut().as_mut_slice()[i];
        Some(V::get_mut(&mut slot.value))
    }

    /// Returns a mutable reference to the value for `key`, claiming a slot
    /// with `default` if the key is absent. The claim rehashes to a larger
    /// table as many times as it takes to place the key.
    ///
    /// # Examples
    ///
    /// ```
    /// use ferrymap::FerryMap;
    ///
    /// let mut counts: FerryMap<u32, u64> = FerryMap::new();
    /// *counts.get_or_insert(3, 0)? += 1;
    /// *counts.get_or_insert(3, 0)? += 1;
    /// assert_eq!(counts.get(3), Some(2));
    /// # Ok::<(), ferrymap::Error>(())
    /// ```
    pub fn get_or_insert(&mut self, key: K, default: V) -> Result<&mut V, Error> {
        let (index, claimed) = self.claim(key)?;
        let slot = &mut self.bank.active_mut().as_mut_slice()[index];
        let value = V::get_mut(&mut slot.value);
        if claimed {
            *value = default;
        }
        Ok(value)
    }

    /// Inserts `key -> value` if the key is absent. Returns the slot index
    /// and whether an insertion happened; a present key keeps its stored
    /// value unchanged.
    pub fn insert(&mut self, key: K, value: V) -> Result<(usize, bool), Error> {
        let (index, claimed) = self.claim(key)?;
        if claimed {
            let slot = &mut self.bank.active_mut().as_mut_slice()[index];
            *V::get_mut(&mut slot.value) = value;
        }
        Ok((index, claimed))
    }

    /// Removes `key`. Returns whether it was present.
    pub fn remove(&mut self, key: K) -> bool {
        match self.find_index(key) {
            Some(i) => {
                self.erase_index(i);
                true
            }
            None => false,
        }
    }

    /// Clears the slot at `index` and reseats displaced entries behind it
    /// so that no surviving entry's probe distance grows. Returns the index
    /// of the next occupied slot, in ascending order.
    pub fn erase_index(&mut self, index: usize) -> Option<usize> {
        if index >= self.bucket_count() {
            return None;
        }
        if raw::erase_and_repair::<K, V, H>(self.slots(), self.size_power, B, index) {
            self.fill -= 1;
        }
        raw::next_occupied(self.slots(), index + 1, Ordering::Relaxed)
    }

    /// Rehashes to `2^size_power` buckets. Powers at or below the current
    /// one are ignored; the map never shrinks.
    pub fn resize(&mut self, size_power: u8) -> Result<(), Error> {
        if size_power > MAX_SIZE_POWER {
            return Err(Error::TooLarge { size_power });
        }
        if size_power <= self.size_power {
            return Ok(());
        }
        self.rehash(size_power)
    }

    /// Doubles the table until the load factor is at or below `target`.
    ///
    /// Sizing the table down to a comfortable load factor before an upload
    /// is what keeps parallel insertions short-probed.
    ///
    /// # Panics
    ///
    /// Panics if `target` is not positive.
    pub fn resize_to_load_factor(&mut self, target: f64) -> Result<(), Error> {
        assert!(target > 0.0, "target load factor must be positive");
        while self.load_factor() > target {
            self.rehash(self.size_power + 1)?;
        }
        Ok(())
    }

    /// Transfers the buckets toward the accelerator and returns the handle
    /// the parallel phase operates through.
    ///
    /// The handle borrows the map mutably: the host cannot touch the map
    /// again until the handle is reclaimed or dropped. Reclaiming folds the
    /// fill count and the observed overflow back into the map and rehashes
    /// if the parallel phase outgrew the overflow window.
    ///
    /// # Examples
    ///
    /// ```
    /// use ferrymap::{FerryMap, Stream};
    ///
    /// let stream = Stream::default();
    /// let mut map: FerryMap<u32, u32> = FerryMap::new();
    /// map.insert(7, 70)?;
    ///
    /// let handle = map.upload(&stream);
    /// handle.set(8, 80);
    /// assert_eq!(handle.read(7), 70);
    /// handle.reclaim(&stream)?;
    ///
    /// assert_eq!(map.get(8), Some(80));
    /// # Ok::<(), ferrymap::Error>(())
    /// ```
    pub fn upload(&mut self, stream: &Stream) -> DeviceHandle<'_, K, V, H, B> {
        self.bank.active_mut().optimize_for_accelerator(stream);
        DeviceHandle::new(self)
    }

    // Find or claim a slot for `key`, rehashing on an exhausted window.
    // Returns the slot index and whether a fresh slot was claimed.
    fn claim(&mut self, key: K) -> Result<(usize, bool), Error> {
        if key == K::EMPTY {
            return Err(Error::InvalidKey);
        }

        loop {
            let hash = H::hash(key, self.size_power);
            match probe::probe_slots(self.slots(), hash, B, key, Ordering::Relaxed) {
                ProbeResult::Match(i) => return Ok((i, false)),
                ProbeResult::Vacant(i) => {
                    let mask = self.bucket_count() - 1;
                    let dist = probe::distance(i, hash, mask);
                    let slot = &mut self.bank.active_mut().as_mut_slice()[i];
                    *K::get_mut(&mut slot.key) = key;
                    self.fill += 1;
                    self.observed_overflow = self.observed_overflow.max(dist + 1);
                    return Ok((i, true));
                }
                ProbeResult::Exhausted => self.rehash(self.size_power + 1)?,
            }
        }
    }

    pub(crate) fn rehash(&mut self, new_power: u8) -> Result<(), Error> {
        match self.mode {
            ResizeMode::Rebuild => self.rehash_rebuild(new_power),
            ResizeMode::Banked { .. } => self.rehash_migrate(new_power),
        }
    }

    // Copy into a freshly allocated backing, adopting it only once every
    // entry has been placed; an exhausted window abandons the attempt and
    // tries the next power.
    fn rehash_rebuild(&mut self, mut power: u8) -> Result<(), Error> {
        loop {
            if power > MAX_SIZE_POWER {
                return Err(Error::TooLarge { size_power: power });
            }

            let fresh = Bank::<K, V>::new_backing(power);
            if let Some(observed) = raw::refill::<K, V, H>(self.slots(), fresh.as_slice(), power, B)
            {
                self.bank.replace_active(fresh, power);
                self.size_power = power;
                self.observed_overflow = observed;
                return Ok(());
            }

            power += 1;
        }
    }

    // Migrate into the dormant backing of the target power, extending the
    // bank with further dormant backings if the power is not staged yet.
    // The outgoing backing stays in the bank, dormant.
    fn rehash_migrate(&mut self, mut power: u8) -> Result<(), Error> {
        loop {
            if power > MAX_SIZE_POWER {
                return Err(Error::TooLarge { size_power: power });
            }

            let index = loop {
                match self.bank.position_of_power(power) {
                    Some(i) => break i,
                    None => self.bank.push_next(),
                }
            };

            self.bank.wipe(index);
            let dst = self.bank.backing(index).as_slice();
            if let Some(observed) = raw::refill::<K, V, H>(self.slots(), dst, power, B) {
                self.bank.set_active(index);
                self.size_power = power;
                self.observed_overflow = observed;
                return Ok(());
            }

            power += 1;
        }
    }
}

impl<K: Key, V: Word, H, const B: usize> Default for FerryMap<K, V, H, B> {
    fn default() -> Self {
        FerryMap::new()
    }
}

impl<K: Key, V: Word, H, const B: usize> Clone for FerryMap<K, V, H, B> {
    fn clone(&self) -> Self {
        FerryMap {
            bank: self.bank.clone(),
            size_power: self.size_power,
            fill: self.fill,
            observed_overflow: self.observed_overflow,
            mode: self.mode,
            _hash: PhantomData,
        }
    }
}

impl<K: Key, V: Word, H, const B: usize> fmt::Debug for FerryMap<K, V, H, B>
where
    K: fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K: Key, V: Word, H: BucketHash<K>, const B: usize> PartialEq for FerryMap<K, V, H, B> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|(k, v)| other.get(k) == Some(v))
    }
}

impl<K: Key, V: Word, H: BucketHash<K>, const B: usize> Eq for FerryMap<K, V, H, B> {}

impl<'a, K: Key, V: Word, H, const B: usize> IntoIterator for &'a FerryMap<K, V, H, B> {
    type Item = (K, V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Iter<'a, K, V> {
        self.iter()
    }
}

/// An iterator over a map's occupied slots in ascending index order.
///
/// Yields `(key, value)` pairs by value; both are machine words.
pub struct Iter<'a, K: Key, V: Word> {
    slots: &'a [Slot<K, V>],
    index: usize,
}

impl<K: Key, V: Word> Iterator for Iter<'_, K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<(K, V)> {
        while self.index < self.slots.len() {
            let slot = &self.slots[self.index];
            self.index += 1;
            let key = slot.key(Ordering::Relaxed);
            if key != K::EMPTY {
                return Some((key, slot.value(Ordering::Relaxed)));
            }
        }
        None
    }
}
