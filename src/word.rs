//! Machine words storable in a bucket slot.
//!
//! Every key and value lives in a fixed-width integer slot that both
//! execution regimes touch: the serial regime through `&mut` access with no
//! synchronization cost, the parallel regime through the per-slot atomic
//! protocol. [`Word`] ties a plain integer type to its atomic cell and the
//! primitive set both regimes need; [`Key`] additionally reserves the
//! sentinel that marks a slot as empty.

use std::fmt::Debug;
use std::sync::atomic::{
    AtomicI16, AtomicI32, AtomicI64, AtomicI8, AtomicIsize, AtomicU16, AtomicU32, AtomicU64,
    AtomicU8, AtomicUsize, Ordering,
};

/// A fixed-width integer that can occupy one field of a bucket slot.
///
/// The associated [`Atomic`](Word::Atomic) cell has the same representation
/// as the word itself; slots are stored as atomic cells permanently so the
/// same backing can serve both regimes without reinterpretation.
pub trait Word: Copy + Eq + Debug + Send + Sync + 'static {
    /// The atomic cell holding this word in a slot.
    type Atomic: Send + Sync;

    /// Width of the word in bits.
    const BITS: u32;

    /// The all-zero word. Empty slots hold this in their value field so a
    /// freshly claimed accumulator cell starts from zero.
    const ZERO: Self;

    fn into_atomic(self) -> Self::Atomic;

    fn load(cell: &Self::Atomic, order: Ordering) -> Self;

    fn store(cell: &Self::Atomic, value: Self, order: Ordering);

    fn swap(cell: &Self::Atomic, value: Self, order: Ordering) -> Self;

    fn compare_exchange(
        cell: &Self::Atomic,
        current: Self,
        new: Self,
        success: Ordering,
        failure: Ordering,
    ) -> Result<Self, Self>;

    fn fetch_add(cell: &Self::Atomic, delta: Self, order: Ordering) -> Self;

    fn fetch_max(cell: &Self::Atomic, value: Self, order: Ordering) -> Self;

    /// Plain access through exclusive ownership; the serial regime's path.
    fn get_mut(cell: &mut Self::Atomic) -> &mut Self;

    /// The raw bit pattern, zero- or sign-extended to 64 bits. Hash input.
    fn to_bits(self) -> u64;
}

/// A [`Word`] usable as a bucket key.
///
/// `EMPTY` is the reserved sentinel marking an unoccupied slot; it may never
/// be inserted as a real key. The provided implementations reserve the
/// all-ones pattern (`MAX` for unsigned words, `-1` for signed ones). A key
/// space that needs the all-ones value can wrap the word in a newtype with a
/// different sentinel.
pub trait Key: Word {
    /// The empty-slot sentinel.
    const EMPTY: Self;
}

macro_rules! impl_word {
    ($($int:ty => $atomic:ty),* $(,)?) => {$(
        impl Word for $int {
            type Atomic = $atomic;

            const BITS: u32 = <$int>::BITS;
            const ZERO: Self = 0;

            #[inline]
            fn into_atomic(self) -> $atomic {
                <$atomic>::new(self)
            }

            #[inline]
            fn load(cell: &$atomic, order: Ordering) -> Self {
                cell.load(order)
            }

            #[inline]
            fn store(cell: &$atomic, value: Self, order: Ordering) {
                cell.store(value, order);
            }

            #[inline]
            fn swap(cell: &$atomic, value: Self, order: Ordering) -> Self {
                cell.swap(value, order)
            }

            #[inline]
            fn compare_exchange(
                cell: &$atomic,
                current: Self,
                new: Self,
                success: Ordering,
                failure: Ordering,
            ) -> Result<Self, Self> {
                cell.compare_exchange(current, new, success, failure)
            }

            #[inline]
            fn fetch_add(cell: &$atomic, delta: Self, order: Ordering) -> Self {
                cell.fetch_add(delta, order)
            }

            #[inline]
            fn fetch_max(cell: &$atomic, value: Self, order: Ordering) -> Self {
                cell.fetch_max(value, order)
            }

            #[inline]
            fn get_mut(cell: &mut $atomic) -> &mut Self {
                cell.get_mut()
            }

            #[inline]
            fn to_bits(self) -> u64 {
                self as u64
            }
        }
    )*};
}

impl_word! {
    u8 => AtomicU8,
    u16 => AtomicU16,
    u32 => AtomicU32,
    u64 => AtomicU64,
    usize => AtomicUsize,
    i8 => AtomicI8,
    i16 => AtomicI16,
    i32 => AtomicI32,
    i64 => AtomicI64,
    isize => AtomicIsize,
}

macro_rules! impl_key {
    ($($int:ty => $empty:expr),* $(,)?) => {$(
        impl Key for $int {
            const EMPTY: Self = $empty;
        }
    )*};
}

impl_key! {
    u8 => u8::MAX,
    u16 => u16::MAX,
    u32 => u32::MAX,
    u64 => u64::MAX,
    usize => usize::MAX,
    i8 => -1,
    i16 => -1,
    i32 => -1,
    i64 => -1,
    isize => -1,
}
