/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::thread;

use tadpole::{Bound, Depth, EntryFlags, PackedMove, Probe, Score, TTable, TTableEntry, REHASH};

fn entry(depth: i32, age: u8, value: i32) -> TTableEntry {
    TTableEntry {
        depth: Depth::new(depth),
        age,
        bound: Bound::Valid,
        flags: EntryFlags::NONE,
        value: Score::new(value),
        static_value: Score::new(value / 2),
        best: Some(PackedMove {
            from: 8,
            to: 16,
            promotion: 0,
        }),
    }
}

/// `count` distinct keys that all map to the bucket of `base`.
fn same_bucket(table: &TTable, base: u64, count: usize) -> Vec<u64> {
    let buckets = (table.capacity() / REHASH) as u64;
    (0..count as u64).map(|k| base + k * buckets).collect()
}

fn small_table() -> TTable {
    TTable::with_bytes(64 * 1024).unwrap()
}

#[test]
fn test_mate_value_round_trip() {
    let table = small_table();
    let hash = 0x1234_5678_9ABC_DEF1;
    let stored = TTableEntry {
        bound: Bound::LowerBound,
        ..entry(9, 2, Score::mate_in(7).inner())
    };
    table.store(hash, stored);

    match table.probe(hash, Depth::new(9), 2) {
        Probe::Hit(found) => assert_eq!(found, stored),
        other => panic!("expected a hit, got {other:?}"),
    }
    assert!(matches!(
        table.probe(hash, Depth::new(10), 2),
        Probe::Shallow(_)
    ));
    assert_eq!(table.probe(hash ^ 1, Depth::ZERO, 2), Probe::Miss);
}

#[test]
fn test_full_bucket_keeps_deeper_entries() {
    let table = small_table();
    let keys = same_bucket(&table, 0xABC1, REHASH + 1);

    for (i, &key) in keys[..REHASH].iter().enumerate() {
        table.store(key, entry(10 + i as i32, 1, i as i32));
    }

    // Shallower than everything in the bucket, same search: dropped
    let extra = keys[REHASH];
    table.store(extra, entry(2, 1, 99));
    assert_eq!(table.probe(extra, Depth::ZERO, 1), Probe::Miss);
    for &key in &keys[..REHASH] {
        assert_ne!(table.probe(key, Depth::ZERO, 1), Probe::Miss);
    }

    // Deeper than the shallowest slot: replaces exactly that one
    table.store(extra, entry(20, 1, 99));
    assert!(matches!(table.probe(extra, Depth::ZERO, 1), Probe::Hit(_)));
    assert_eq!(table.probe(keys[0], Depth::ZERO, 1), Probe::Miss);
    let survivors = keys[1..REHASH]
        .iter()
        .filter(|&&key| table.probe(key, Depth::ZERO, 1) != Probe::Miss)
        .count();
    assert_eq!(survivors, REHASH - 1);
}

#[test]
fn test_stale_entries_are_evicted() {
    let table = small_table();
    let keys = same_bucket(&table, 0x77, REHASH + 1);

    for &key in &keys[..REHASH] {
        table.store(key, entry(30, 1, 0));
    }

    // A shallow entry from a newer search still finds room
    let extra = keys[REHASH];
    table.store(extra, entry(1, 5, 42));
    match table.probe(extra, Depth::ZERO, 5) {
        Probe::Hit(found) => assert_eq!(found.value, Score::new(42)),
        other => panic!("expected a hit, got {other:?}"),
    }
}

#[test]
fn test_protected_entries_survive() {
    let table = small_table();
    let keys = same_bucket(&table, 0x5150, REHASH + 1);

    for &key in &keys[..REHASH] {
        let protected = TTableEntry {
            flags: EntryFlags::TB,
            ..entry(1, 1, 7)
        };
        table.store(key, protected);
    }

    let extra = keys[REHASH];
    table.store(extra, entry(40, 9, 0));
    assert_eq!(table.probe(extra, Depth::ZERO, 9), Probe::Miss);

    for &key in &keys[..REHASH] {
        let found = table.probe(key, Depth::ZERO, 9);
        let flags = found.entry().map(|e| e.flags).unwrap_or_default();
        assert!(flags.contains(EntryFlags::TB), "{key:#x} lost its entry");
    }
}

#[test]
fn test_concurrent_access() {
    let table = TTable::with_bytes(256 * 1024).unwrap();
    let threads = 4;
    let per_thread = 20_000u64;

    // Every value is derived from its key, so a torn read would show up as a mismatch
    let value_of = |key: u64| (key % 20_000) as i32 - 10_000;

    thread::scope(|s| {
        for t in 0..threads {
            let table = &table;
            s.spawn(move || {
                for i in 0..per_thread {
                    let key = (t * per_thread + i).wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
                    table.store(key, entry((i % 20) as i32, 1, value_of(key)));

                    let lookup_key = (i * threads as u64 + t as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
                    if let Some(found) = table.probe(lookup_key, Depth::ZERO, 1).entry() {
                        assert_eq!(found.value, Score::new(value_of(lookup_key)));
                        assert_eq!(found.static_value, Score::new(value_of(lookup_key) / 2));
                    }
                }
            });
        }
    });

    assert!(table.pct_full() > 0);
}
