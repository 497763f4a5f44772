//! A dual-residency open-addressing hash map.
//!
//! `ferrymap` serves workloads that alternate between serial host-side
//! mutation and massively parallel accelerator-style mutation of the same
//! logical map. On the host, [`FerryMap`] is an ordinary associative
//! container: lookup, insert, erase, iteration, growth. For a parallel
//! phase, [`FerryMap::upload`] transfers the bucket storage toward the
//! accelerator and returns a [`DeviceHandle`] offering the restricted,
//! conflict-tolerant subset (atomic insert/update, read, displacement-aware
//! erase) that thousands of simultaneous writers can share. Reclaiming the
//! handle folds the phase's growth back into the map and rehashes if the
//! probe window was outgrown.
//!
//! Buckets live in contiguous power-of-two storage probed linearly within a
//! bounded overflow window. Keys and values are machine words; a reserved
//! key ([`Key::EMPTY`]) marks free slots. The hash function is a
//! compile-time policy: [`Fibonacci`] (default), [`Fnv1a`], or [`Murmur`].
//!
//! # Usage
//!
//! ```
//! use ferrymap::{FerryMap, Stream};
//!
//! let stream = Stream::default();
//! let mut map: FerryMap<u32, u32> = FerryMap::new();
//!
//! // Serial regime: plain container semantics.
//! for key in 0..8 {
//!     map.insert(key, key * 10)?;
//! }
//! assert_eq!(map.get(3), Some(30));
//!
//! // Keep parallel probes short, then hand the buckets over.
//! map.resize_to_load_factor(0.5)?;
//! let handle = map.upload(&stream);
//! std::thread::scope(|s| {
//!     for t in 0..4u32 {
//!         let handle = &handle;
//!         s.spawn(move || handle.set(100 + t, t));
//!     }
//! });
//! handle.reclaim(&stream)?;
//!
//! assert_eq!(map.len(), 12);
//! # Ok::<(), ferrymap::Error>(())
//! ```
//!
//! The map only grows, and only on the host: between upload and reclaim the
//! handle owns the map (it holds the exclusive borrow), and parallel
//! insertions that overflow the probe window merely record the fact for
//! reclaim to act on.

mod error;
mod hash;
mod map;
mod mem;
mod raw;
mod view;
mod word;

#[cfg(feature = "serde")]
mod serde_impls;

pub use error::Error;
pub use hash::{BucketHash, Fibonacci, Fnv1a, Murmur};
pub use map::{
    FerryMap, FerryMapBuilder, Iter, ResizeMode, DEFAULT_BANK_DEPTH, DEFAULT_SIZE_POWER,
    MAX_SIZE_POWER,
};
pub use mem::{MigratableVec, Residency, Stream};
pub use view::{DeviceHandle, DeviceIter};
pub use word::{Key, Word};
