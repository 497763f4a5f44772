use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Barrier;
use std::thread;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use ferrymap::{FerryMap, Fibonacci, ResizeMode, Stream, Word};

mod common;
use common::colliding_keys;

const THREADS: usize = 8;

#[test]
fn last_writer_wins_per_key() {
    // 1024 logical inserters, each writing its id under key `id % 64`.
    const INSERTERS: u32 = 1024;
    const KEYS: u32 = 64;

    let stream = Stream::default();
    let mut map: FerryMap<u32, u32> = FerryMap::with_size_power(8);

    let handle = map.upload(&stream);
    let barrier = Barrier::new(THREADS);
    thread::scope(|s| {
        for t in 0..THREADS as u32 {
            let handle = &handle;
            let barrier = &barrier;
            s.spawn(move || {
                let per_thread = INSERTERS / THREADS as u32;
                barrier.wait();
                for id in (t * per_thread)..((t + 1) * per_thread) {
                    handle.set(id % KEYS, id);
                }
            });
        }
    });
    handle.reclaim(&stream).unwrap();

    assert_eq!(map.len(), KEYS as usize);
    for key in 0..KEYS {
        let value = map.get(key).unwrap();
        assert!(value < INSERTERS);
        assert_eq!(value % KEYS, key);
    }
}

#[test]
fn upload_reclaim_is_neutral() {
    // No kernel between upload and reclaim: the map must come back
    // slot-for-slot identical.
    for mode in [ResizeMode::Rebuild, ResizeMode::banked()] {
        let stream = Stream::default();
        let mut map: FerryMap<u32, u32> = FerryMap::builder().resize_mode(mode).build();
        for key in 0..200 {
            map.insert(key, key.wrapping_mul(7)).unwrap();
        }
        map.remove(40);
        map.remove(41);

        let buckets = map.bucket_count();
        let before: Vec<_> = (0..buckets).map(|i| map.slot(i)).collect();
        let fill = map.len();
        let observed = map.observed_overflow();

        let handle = map.upload(&stream);
        handle.reclaim(&stream).unwrap();

        assert_eq!(map.bucket_count(), buckets);
        assert_eq!(map.len(), fill);
        assert_eq!(map.observed_overflow(), observed);
        let after: Vec<_> = (0..buckets).map(|i| map.slot(i)).collect();
        assert_eq!(before, after);
    }
}

#[test]
fn applying_a_batch_twice_is_idempotent() {
    let batch: Vec<(u32, u32)> = (0..300u32).map(|k| (k, k.wrapping_mul(13))).collect();

    let run = |passes: usize| {
        let stream = Stream::default();
        let mut map: FerryMap<u32, u32> = FerryMap::with_size_power(10);
        let handle = map.upload(&stream);
        thread::scope(|s| {
            for chunk in batch.chunks(batch.len() / THREADS) {
                let handle = &handle;
                s.spawn(move || {
                    for _ in 0..passes {
                        for &(k, v) in chunk {
                            handle.set(k, v);
                        }
                    }
                });
            }
        });
        handle.reclaim(&stream).unwrap();

        let mut contents: Vec<_> = map.iter().collect();
        contents.sort_unstable();
        (map.len(), contents)
    };

    assert_eq!(run(1), run(2));
}

#[test]
fn concurrent_readers_and_writers() {
    let stream = Stream::default();
    let mut map: FerryMap<u32, u32> = FerryMap::with_size_power(10);
    for key in 0..256 {
        map.insert(key, key).unwrap();
    }

    let handle = map.upload(&stream);
    let barrier = Barrier::new(THREADS);
    thread::scope(|s| {
        // Half the threads overwrite, half read the stable key range.
        for t in 0..THREADS as u32 {
            let handle = &handle;
            let barrier = &barrier;
            s.spawn(move || {
                barrier.wait();
                if t % 2 == 0 {
                    for key in 256..512 {
                        handle.set(key, key * 3);
                    }
                } else {
                    for key in 0..256 {
                        // Keys written before the upload are always visible.
                        assert_eq!(handle.read(key), key);
                    }
                }
            });
        }
    });
    handle.reclaim(&stream).unwrap();

    assert_eq!(map.len(), 512);
    for key in 256..512 {
        assert_eq!(map.get(key), Some(key * 3));
    }
}

// A kernel body generic over the value word, accumulating through the
// trait's read-modify-write surface rather than a concrete atomic type.
fn accumulate<V: Word>(cell: &V::Atomic, delta: V) {
    V::fetch_add(cell, delta, Ordering::Relaxed);
}

#[test]
fn value_cells_accumulate() {
    const KEYS: u32 = 10;
    const PER_THREAD: u64 = 100;

    let stream = Stream::default();
    let mut histogram: FerryMap<u32, u64> = FerryMap::with_size_power(6);

    let handle = histogram.upload(&stream);
    let barrier = Barrier::new(THREADS);
    thread::scope(|s| {
        for _ in 0..THREADS {
            let handle = &handle;
            let barrier = &barrier;
            s.spawn(move || {
                barrier.wait();
                for _ in 0..PER_THREAD {
                    for key in 0..KEYS {
                        accumulate::<u64>(handle.value_cell(key), 1);
                    }
                }
            });
        }
    });
    handle.reclaim(&stream).unwrap();

    assert_eq!(histogram.len(), KEYS as usize);
    for key in 0..KEYS {
        assert_eq!(histogram.get(key), Some(THREADS as u64 * PER_THREAD));
    }
}

#[test]
fn device_erase_reseats_displaced_entries() {
    let keys = colliding_keys::<Fibonacci>(4, 0, 3);
    let stream = Stream::default();
    let mut map: FerryMap<u32, u32> = FerryMap::with_size_power(4);
    for (i, &key) in keys.iter().enumerate() {
        map.insert(key, i as u32).unwrap();
    }

    let handle = map.upload(&stream);
    assert!(handle.erase(keys[0]));
    assert!(!handle.erase(keys[0]));
    assert_eq!(handle.fill(), 2);
    assert_eq!(handle.get(keys[1]), Some(1));
    assert_eq!(handle.get(keys[2]), Some(2));
    handle.reclaim(&stream).unwrap();

    assert_eq!(map.len(), 2);
    // The survivors were pulled back toward their home bucket.
    assert_eq!(map.slot(0), Some((keys[1], 1)));
    assert_eq!(map.slot(1), Some((keys[2], 2)));
    assert_eq!(map.slot(2), None);
}

#[test]
fn reclaim_rehashes_after_window_overflow() {
    // Parallel inserts may probe past the configured window; the overflow
    // is recorded on the device and acted on only at reclaim.
    let keys = colliding_keys::<Fibonacci>(4, 5, 4);
    let stream = Stream::default();
    let mut map: FerryMap<u32, u32, Fibonacci, 2> = FerryMap::with_size_power(4);

    let handle = map.upload(&stream);
    for (i, &key) in keys.iter().enumerate() {
        handle.set(key, i as u32);
    }
    assert!(handle.observed_overflow() > 2);
    handle.reclaim(&stream).unwrap();

    assert!(map.size_power() >= 5);
    assert!(map.observed_overflow() <= map.overflow_bound());
    assert_eq!(map.len(), 4);
    for (i, &key) in keys.iter().enumerate() {
        assert_eq!(map.get(key), Some(i as u32));
    }
}

#[test]
fn device_iteration_covers_all_slots() {
    let stream = Stream::default();
    let mut map: FerryMap<u32, u32> = FerryMap::with_size_power(7);
    for key in 0..50 {
        map.insert(key, key + 1).unwrap();
    }

    let handle = map.upload(&stream);
    let mut seen: Vec<_> = handle.iter().map(|(_, k, v)| (k, v)).collect();
    let indices: Vec<_> = handle.iter().map(|(i, _, _)| i).collect();
    assert!(indices.windows(2).all(|w| w[0] < w[1]));
    handle.reclaim(&stream).unwrap();

    seen.sort_unstable();
    let expected: Vec<_> = (0..50).map(|k| (k, k + 1)).collect();
    assert_eq!(seen, expected);
}

#[test]
fn parallel_insert_stress() {
    const PER_THREAD: usize = 2000;

    let stream = Stream::default();
    let mut map: FerryMap<u64, u64> = FerryMap::with_size_power(15);

    let per_thread_keys: Vec<Vec<u64>> = (0..THREADS)
        .map(|t| {
            let mut rng = StdRng::seed_from_u64(0xFE44_1 + t as u64);
            (0..PER_THREAD)
                .map(|_| rng.gen_range(0..1_000_000u64))
                .collect()
        })
        .collect();

    let handle = map.upload(&stream);
    let barrier = Barrier::new(THREADS);
    thread::scope(|s| {
        for keys in &per_thread_keys {
            let handle = &handle;
            let barrier = &barrier;
            s.spawn(move || {
                barrier.wait();
                for &key in keys {
                    handle.set(key, key * 2);
                }
            });
        }
    });
    handle.reclaim(&stream).unwrap();

    let distinct: HashSet<u64> = per_thread_keys.iter().flatten().copied().collect();
    assert_eq!(map.len(), distinct.len());
    for &key in &distinct {
        assert_eq!(map.get(key), Some(key * 2));
    }
}

#[test]
#[should_panic(expected = "saturated")]
fn saturated_table_aborts_the_kernel() {
    let stream = Stream::default();
    let mut map: FerryMap<u32, u32> = FerryMap::with_size_power(2);
    let handle = map.upload(&stream);
    for key in 1..=4 {
        handle.set(key, key);
    }
    handle.set(5, 5);
}

#[test]
#[should_panic(expected = "not in the table")]
fn reading_an_absent_key_aborts_the_kernel() {
    let stream = Stream::default();
    let mut map: FerryMap<u32, u32> = FerryMap::new();
    let handle = map.upload(&stream);
    handle.read(1);
}
