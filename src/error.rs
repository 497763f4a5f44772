/// Errors surfaced by map operations.
///
/// Errors are never retried internally. Growth is not an error: a probe
/// window filling up on the host triggers a rehash and the operation
/// proceeds. The parallel regime has no recoverable failures at all; its
/// contract violations (reading an absent key, saturating the table) abort
/// the kernel, which the host-side stand-in models as a panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A read-only lookup did not find the key.
    #[error("key not found")]
    NotFound,

    /// A rehash would exceed the 32-bit bucket index space.
    #[error("table cannot grow to 2^{size_power} buckets")]
    TooLarge { size_power: u8 },

    /// The empty-slot sentinel was passed as a key.
    #[error("the empty-slot sentinel cannot be used as a key")]
    InvalidKey,
}
