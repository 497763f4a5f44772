use ferrymap::{BucketHash, FerryMap, Key, ResizeMode, Word};

// Run the test on both resize modes of the map.
pub fn with_map<K, V, H, const B: usize>(mut test: impl FnMut(&dyn Fn() -> FerryMap<K, V, H, B>))
where
    K: Key,
    V: Word,
    H: BucketHash<K>,
{
    // The single-backing rebuild mode.
    test(&(|| FerryMap::builder().resize_mode(ResizeMode::Rebuild).build()));

    // A shallow bank, to stress migration and bank expansion.
    test(
        &(|| {
            FerryMap::builder()
                .resize_mode(ResizeMode::Banked { depth: 2 })
                .build()
        }),
    );

    // The default bank depth.
    test(&(|| FerryMap::builder().resize_mode(ResizeMode::banked()).build()));
}

// Search for `n` distinct keys whose home bucket at `size_power` is
// `bucket`, skipping the empty sentinel.
pub fn colliding_keys<H: BucketHash<u32>>(size_power: u8, bucket: u32, n: usize) -> Vec<u32> {
    let mask = (1u32 << size_power) - 1;
    let mut found = Vec::with_capacity(n);
    let mut key = 0u32;
    while found.len() < n {
        if key != u32::MAX && H::hash(key, size_power) & mask == bucket {
            found.push(key);
        }
        key = key.checked_add(1).expect("ran out of candidate keys");
    }
    found
}
