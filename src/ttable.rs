/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::{
    fmt,
    mem::size_of,
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
};

use crate::{Depth, Score, TadpoleError};

/// Number of slots examined for every key.
pub const REHASH: usize = 4;

/// Depth stored for quiescence entries searched with checks.
pub const QSEARCH_CHECK_DEPTH: Depth = Depth::from_units(-1);

/// Depth stored for quiescence entries searched without checks.
pub const QSEARCH_NO_CHECK_DEPTH: Depth = Depth::from_units(-2);

/// Offset applied to stored depths so that negative quiescence depths fit in a byte.
const DEPTH_BIAS: i32 = 2;

/// Encodes "no move" in the start square byte.
const NO_SQUARE: u8 = 0xFF;

// The table is shared by every search thread without a lock.
const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}
    fn check() {
        assert_send_sync::<TTable>();
    }
    let _ = check;
};

/// The kind of bound a cached value represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Bound {
    /// The value is exact.
    Valid = 0,

    /// The true value is at most the stored value (the node failed low).
    UpperBound = 1,

    /// The true value is at least the stored value (the node failed high).
    LowerBound = 2,

    /// Only the static evaluation is meaningful.
    Eval = 3,
}

impl Bound {
    #[inline(always)]
    const fn from_bits(bits: u8) -> Self {
        match bits & EntryFlags::TYPE_MASK {
            0 => Self::Valid,
            1 => Self::UpperBound,
            2 => Self::LowerBound,
            _ => Self::Eval,
        }
    }
}

/// Extra information stored alongside a [`Bound`].
#[derive(Default, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct EntryFlags(u8);

impl EntryFlags {
    const TYPE_MASK: u8 = 0x07;

    /// No flags set.
    pub const NONE: Self = Self(0);

    /// The value came from an endgame tablebase.
    pub const TB: Self = Self(0x08);

    /// The entry was loaded from persistent learning. Never evicted.
    pub const LEARNED: Self = Self(0x10);

    /// The best move was the only legal reply.
    pub const FORCED: Self = Self(0x20);

    /// The best move was one of only two legal replies.
    pub const FORCED2: Self = Self(0x40);

    /// Returns `true` if every flag in `other` is set in `self`.
    #[inline(always)]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` if this entry may not be evicted by an ordinary store.
    #[inline(always)]
    pub const fn is_protected(self) -> bool {
        self.0 & (Self::TB.0 | Self::LEARNED.0) != 0
    }

    #[inline(always)]
    const fn bits(self) -> u8 {
        self.0 & !Self::TYPE_MASK
    }
}

impl std::ops::BitOr for EntryFlags {
    type Output = Self;
    #[inline(always)]
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for EntryFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::TB, "TB"),
            (Self::LEARNED, "LEARNED"),
            (Self::FORCED, "FORCED"),
            (Self::FORCED2, "FORCED2"),
        ];
        let set = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect::<Vec<_>>();
        write!(f, "[{}]", set.join("|"))
    }
}

/// A compact, board-independent encoding of a best move: start, destination and promotion.
///
/// Must be re-validated against a position before it can be played.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PackedMove {
    /// Index of the start square.
    pub from: u8,

    /// Index of the destination square.
    pub to: u8,

    /// Promotion piece code, `0` for none.
    pub promotion: u8,
}

/// A decoded transposition table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TTableEntry {
    /// Depth the value was searched to.
    pub depth: Depth,

    /// Generation of the search that last touched this entry.
    pub age: u8,

    /// Bound type of `value`.
    pub bound: Bound,

    /// Auxiliary flags.
    pub flags: EntryFlags,

    /// Search value, with mate scores relative to the stored node.
    pub value: Score,

    /// Static evaluation of the position.
    pub static_value: Score,

    /// Best move found, if any.
    pub best: Option<PackedMove>,
}

impl TTableEntry {
    /// Returns `true` if a null move at `null_depth` is likely to fail low against `beta`.
    #[inline(always)]
    pub fn avoid_null(&self, null_depth: Depth, beta: Score) -> bool {
        self.bound == Bound::UpperBound && self.depth >= null_depth && self.value < beta
    }

    /// Packs the depth, age, flags and move into the second word of an entry.
    fn pack_data(&self) -> u64 {
        let depth = (self.depth.units() + DEPTH_BIAS).clamp(0, u8::MAX as i32) as u64;
        let (from, to, promotion) = match self.best {
            Some(mv) => (mv.from, mv.to, mv.promotion),
            None => (NO_SQUARE, NO_SQUARE, 0),
        };

        depth
            | (self.age as u64) << 8
            | ((self.bound as u8 | self.flags.bits()) as u64) << 16
            | (from as u64) << 24
            | (to as u64) << 32
            | (promotion as u64) << 40
    }

    /// Packs the value and static evaluation into the third word of an entry.
    fn pack_values(&self) -> u64 {
        (self.value.inner() as u32 as u64) | ((self.static_value.inner() as u32 as u64) << 32)
    }

    fn unpack(data: u64, values: u64) -> Self {
        let flag_bits = (data >> 16) as u8;
        let from = (data >> 24) as u8;
        let best = (from != NO_SQUARE).then(|| PackedMove {
            from,
            to: (data >> 32) as u8,
            promotion: (data >> 40) as u8,
        });

        Self {
            depth: Depth::from_units((data & 0xFF) as i32 - DEPTH_BIAS),
            age: (data >> 8) as u8,
            bound: Bound::from_bits(flag_bits),
            flags: EntryFlags(flag_bits & !EntryFlags::TYPE_MASK),
            value: Score::new(values as u32 as i32),
            static_value: Score::new((values >> 32) as u32 as i32),
            best,
        }
    }
}

/// Outcome of probing the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// No slot holds this key.
    Miss,

    /// The key was found but searched too shallowly. The entry is still useful for move ordering.
    Shallow(TTableEntry),

    /// The key was found at sufficient depth.
    Hit(TTableEntry),
}

impl Probe {
    /// Returns the entry, regardless of its depth.
    #[inline(always)]
    pub fn entry(&self) -> Option<&TTableEntry> {
        match self {
            Self::Miss => None,
            Self::Shallow(entry) | Self::Hit(entry) => Some(entry),
        }
    }
}

/// Three 64-bit atomic words forming one slot.
///
/// The key word holds `hash ^ data ^ values`, so a torn read reconstructs the wrong hash and reads as a miss.
#[derive(Default)]
struct Slot {
    key: AtomicU64,
    data: AtomicU64,
    values: AtomicU64,
}

impl Slot {
    /// Reads all three words and returns the reconstructed hash along with the entry.
    #[inline(always)]
    fn load(&self) -> (u64, u64, u64) {
        let key = self.key.load(Ordering::Relaxed);
        let data = self.data.load(Ordering::Relaxed);
        let values = self.values.load(Ordering::Relaxed);
        (key ^ data ^ values, data, values)
    }

    #[inline(always)]
    fn is_empty(&self) -> bool {
        self.key.load(Ordering::Relaxed) == 0
    }

    #[inline(always)]
    fn write(&self, hash: u64, data: u64, values: u64) {
        self.data.store(data, Ordering::Relaxed);
        self.values.store(values, Ordering::Relaxed);
        self.key.store(hash ^ data ^ values, Ordering::Relaxed);
    }

    #[inline(always)]
    fn clear(&self) {
        self.key.store(0, Ordering::Relaxed);
        self.data.store(0, Ordering::Relaxed);
        self.values.store(0, Ordering::Relaxed);
    }
}

/// A [transposition table](https://www.chessprogramming.org/Transposition_Table) shared by all search threads.
///
/// Open-addressed: a key maps to a bucket of [`REHASH`] consecutive slots.
/// Readers and writers never lock; see [`Slot`] for how torn entries are rejected.
pub struct TTable {
    slots: Vec<Slot>,

    /// Number of buckets minus one.
    mask: u64,

    /// Number of slots never written since the last clear.
    free: AtomicUsize,
}

impl TTable {
    /// Default size of the table, in megabytes.
    pub const DEFAULT_SIZE: usize = 16;

    /// Minimum size of the table, in megabytes.
    pub const MIN_SIZE: usize = 0;

    /// Maximum size of the table, in megabytes.
    pub const MAX_SIZE: usize = 65_536;

    /// Allocates a table of at most `mb` megabytes.
    ///
    /// If the memory cannot be obtained, a zero-capacity table is returned along with the error,
    /// so search can continue without caching.
    pub fn new(mb: usize) -> (Self, Option<TadpoleError>) {
        let bytes = mb.min(Self::MAX_SIZE) * 1024 * 1024;
        match Self::with_bytes(bytes) {
            Ok(table) => (table, None),
            Err(err) => (Self::empty(), Some(err)),
        }
    }

    /// A table that caches nothing.
    pub fn empty() -> Self {
        Self {
            slots: Vec::new(),
            mask: 0,
            free: AtomicUsize::new(0),
        }
    }

    /// Allocates a table whose size is the largest power-of-two number of buckets fitting in `bytes`.
    pub fn with_bytes(bytes: usize) -> Result<Self, TadpoleError> {
        let bucket_bytes = REHASH * size_of::<Slot>();
        let buckets = bytes / bucket_bytes;
        if buckets == 0 {
            return Ok(Self::empty());
        }

        // Round down to a power of two so `hash & mask` selects a bucket.
        let buckets = 1usize << (usize::BITS - 1 - buckets.leading_zeros());
        let capacity = buckets * REHASH;

        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|_| TadpoleError::HashAllocation { bytes })?;
        slots.resize_with(capacity, Slot::default);

        Ok(Self {
            slots,
            mask: buckets as u64 - 1,
            free: AtomicUsize::new(capacity),
        })
    }

    /// Total number of slots.
    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Size of the table, in bytes.
    #[inline(always)]
    pub fn size(&self) -> usize {
        self.capacity() * size_of::<Slot>()
    }

    /// Zeroes every slot.
    pub fn clear(&self) {
        self.slots.iter().for_each(Slot::clear);
        self.free.store(self.capacity(), Ordering::Relaxed);
    }

    /// Fill ratio in permille.
    pub fn pct_full(&self) -> usize {
        let capacity = self.capacity();
        if capacity == 0 {
            return 0;
        }
        let used = capacity.saturating_sub(self.free.load(Ordering::Relaxed));
        1000 * used / capacity
    }

    /// The slots of the bucket `hash` maps to.
    #[inline(always)]
    fn bucket(&self, hash: u64) -> &[Slot] {
        let start = (hash & self.mask) as usize * REHASH;
        &self.slots[start..start + REHASH]
    }

    /// Looks up `hash`.
    ///
    /// A matching entry from an older search is re-stamped with `age` so that it is less likely to be evicted.
    pub fn probe(&self, hash: u64, min_depth: Depth, age: u8) -> Probe {
        if self.slots.is_empty() {
            return Probe::Miss;
        }

        for slot in self.bucket(hash) {
            let (stored, data, values) = slot.load();
            if stored != hash {
                continue;
            }

            let mut entry = TTableEntry::unpack(data, values);
            if entry.age != 0 && entry.age != age {
                entry.age = age;
                slot.write(hash, entry.pack_data(), values);
            }

            return if entry.depth >= min_depth {
                Probe::Hit(entry)
            } else {
                Probe::Shallow(entry)
            };
        }

        Probe::Miss
    }

    /// Stores `entry` under `hash`.
    ///
    /// An empty slot or a slot with the same key is always taken. Otherwise the unprotected slot that is
    /// shallower than `entry` or from another search, and has the highest `|age diff| * 4096 - depth`, is evicted.
    /// If there is no such slot, nothing is stored.
    pub fn store(&self, hash: u64, entry: TTableEntry) {
        if self.slots.is_empty() {
            return;
        }
        debug_assert!(
            entry.value.abs() <= Score::MATE,
            "Storing out of range value {:?}",
            entry.value
        );

        let mut best = None;
        let mut max_score = i32::MIN;

        for slot in self.bucket(hash) {
            if slot.is_empty() {
                // Two threads can claim the same empty slot, so the count must not wrap
                let _ = self
                    .free
                    .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |free| free.checked_sub(1));
                best = Some(slot);
                break;
            }

            let (stored, data, values) = slot.load();
            if stored == hash {
                best = Some(slot);
                break;
            }

            let current = TTableEntry::unpack(data, values);
            if !current.flags.is_protected()
                && (current.depth <= entry.depth || current.age != entry.age)
            {
                let age_diff = (current.age as i32 - entry.age as i32).abs();
                let score = (age_diff << 12) - current.depth.units();
                if score > max_score {
                    max_score = score;
                    best = Some(slot);
                }
            }
        }

        if let Some(slot) = best {
            slot.write(hash, entry.pack_data(), entry.pack_values());
        }
    }
}

impl fmt::Debug for TTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TTable")
            .field("capacity", &self.capacity())
            .field("permille_full", &self.pct_full())
            .finish()
    }
}

impl Default for TTable {
    #[inline(always)]
    fn default() -> Self {
        Self::new(Self::DEFAULT_SIZE).0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(depth: i32, age: u8, bound: Bound, value: i32) -> TTableEntry {
        TTableEntry {
            depth: Depth::new(depth),
            age,
            bound,
            flags: EntryFlags::NONE,
            value: Score::new(value),
            static_value: Score::new(-17),
            best: Some(PackedMove {
                from: 12,
                to: 28,
                promotion: 0,
            }),
        }
    }

    #[test]
    fn test_packing_round_trip() {
        let mut original = entry(7, 3, Bound::LowerBound, -Score::MATE.inner() + 9);
        original.flags = EntryFlags::FORCED | EntryFlags::TB;
        original.depth = QSEARCH_NO_CHECK_DEPTH;

        let decoded = TTableEntry::unpack(original.pack_data(), original.pack_values());
        assert_eq!(decoded, original);

        original.best = None;
        let decoded = TTableEntry::unpack(original.pack_data(), original.pack_values());
        assert_eq!(decoded.best, None);
    }

    #[test]
    fn test_store_then_probe() {
        let tt = TTable::with_bytes(64 * 1024).unwrap();
        let stored = entry(5, 1, Bound::UpperBound, 42);
        tt.store(0xDEAD_BEEF, stored);

        assert_eq!(tt.probe(0xDEAD_BEEF, Depth::new(5), 1), Probe::Hit(stored));
        assert_eq!(tt.probe(0xDEAD_BEEF, Depth::new(6), 1), Probe::Shallow(stored));
        assert_eq!(tt.probe(0xBEEF_DEAD, Depth::ZERO, 1), Probe::Miss);
    }

    #[test]
    fn test_lookup_refreshes_age() {
        let tt = TTable::with_bytes(64 * 1024).unwrap();
        tt.store(99, entry(2, 4, Bound::Valid, 10));

        let Probe::Hit(refreshed) = tt.probe(99, Depth::ZERO, 5) else {
            panic!("Expected a hit on key 99");
        };
        assert_eq!(refreshed.age, 5);
        assert_eq!(tt.probe(99, Depth::ZERO, 5).entry().map(|e| e.age), Some(5));
    }

    #[test]
    fn test_zero_capacity_table() {
        let tt = TTable::empty();
        tt.store(1, entry(1, 1, Bound::Valid, 1));
        assert_eq!(tt.probe(1, Depth::ZERO, 1), Probe::Miss);
        assert_eq!(tt.pct_full(), 0);
    }

    #[test]
    fn test_clear_and_fill() {
        let tt = TTable::with_bytes(64 * 1024).unwrap();
        let capacity = tt.capacity() as u64;
        for key in 1..=capacity / 2 {
            tt.store(key.wrapping_mul(0x9E37_79B9_7F4A_7C15), entry(1, 1, Bound::Valid, 0));
        }
        assert!(tt.pct_full() > 0);

        tt.clear();
        assert_eq!(tt.pct_full(), 0);
    }

    #[test]
    fn test_flags_combine() {
        let flags = EntryFlags::TB | EntryFlags::LEARNED;
        assert!(flags.contains(EntryFlags::TB));
        assert!(flags.contains(EntryFlags::LEARNED));
        assert!(flags.is_protected());
        assert!(!(EntryFlags::FORCED | EntryFlags::NONE).is_protected());
    }

    #[test]
    fn test_fill_count_never_wraps() {
        let tt = TTable::with_bytes(16 * 1024).unwrap();
        let capacity = tt.capacity() as u64;

        std::thread::scope(|s| {
            for t in 0..8u64 {
                let tt = &tt;
                s.spawn(move || {
                    // Every thread writes the same keys, racing for the same empty slots
                    for key in 1..=capacity * 4 {
                        let hash = (key + t % 2).wrapping_mul(0x9E37_79B9_7F4A_7C15);
                        tt.store(hash, entry(1 + (key % 8) as i32, 1, Bound::Valid, 0));
                    }
                });
            }
        });

        let full = tt.pct_full();
        assert!(full <= 1000);
        assert!(full >= 500, "a well filled table reports {full} permille");
    }
}
