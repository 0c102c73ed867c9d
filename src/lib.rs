/* SPDX-License-Identifier: MPL-2.0 */
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha12Rng;
use std::collections::{BTreeSet, HashSet};
use std::hash::Hash;

pub mod util;

/** Modulus for the affine hash family. Keys congruent modulo this value are
 * indistinguishable to every member of the family, so the useful key universe
 * is any interval spanning less than the modulus (e.g. -10^9..=10^9). */
pub const PRIME_MODULUS: i64 = 2_000_000_009;

/** A top-level hash is accepted once the sum of squared bucket sizes is at most
 * this multiple of the key count, which caps the total size of the per-bucket
 * tables at a linear function of n. */
pub const LOAD_BALANCE_FACTOR: u64 = 4;

/** Trial budget for each hash search. Both acceptance predicates pass more than
 * half of all draws, so exhausting the budget on valid input has probability
 * below 2^-64 per search; in practice running out means the predicate was
 * unsatisfiable for the given keys. */
pub const MAX_HASH_TRIALS: u32 = 64;

/** Ways the randomized set construction can fail. */
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum BuildError {
    /** The key list contained this key more than once. */
    #[error("key {0} appears more than once in the input")]
    DuplicateKey(i64),
    /** A hash search ran out of trials. Distinct keys spanning less than
     * [PRIME_MODULUS] essentially never trigger this; two keys congruent
     * modulo [PRIME_MODULUS] always do, since no hash separates them. */
    #[error("no acceptable hash function found after {trials} trials")]
    RetryLimitExceeded { trials: u32 },
}

pub trait StaticSet<K> {
    /** Construct a set of the given keys, drawing whatever randomness the
     * construction needs from `rng`. Keys should be distinct; implementations
     * either report [BuildError::DuplicateKey] or silently absorb repeats. */
    fn build<R: Rng>(keys: &[K], rng: &mut R) -> Result<Self, BuildError>
    where
        Self: Sized;
    /** Test whether `key` was among the keys the set was built from. */
    fn contains(&self, key: K) -> bool;
    /** Worst-case number of "reads to main memory" per query (read operations
     * from large tables which vary as a function of the input; does not include
     * data contained in the struct itself or which is read on every query.)
     *
     * Returns None if no fixed bound */
    fn max_memory_read(&self) -> Option<u32>;
    /* Total memory usage estimate (_including_ the size of this structure). None if not available.
     * This is the _ideal_ space estimate, excluding spare capacity from allocations.
     */
    fn total_memory_usage(&self) -> Option<usize>;
}

/* ---------------------------------------------------------------------------- */

/** A very simple and space efficient baseline: a sorted array of keys, queried
 * with binary search. Performance drops significantly once most queries fall
 * outside the CPU caches, since O(log n) cache lines need to be loaded. */
pub struct BinSearchSet<K>
where
    K: Ord + Clone,
{
    data: Vec<K>,
}

impl<K: Ord + Clone> StaticSet<K> for BinSearchSet<K> {
    fn build<R: Rng>(keys: &[K], _rng: &mut R) -> Result<BinSearchSet<K>, BuildError> {
        let mut d: Vec<K> = keys.to_vec();
        d.sort_unstable();
        d.dedup();
        Ok(BinSearchSet { data: d })
    }
    fn contains(&self, key: K) -> bool {
        self.data.binary_search(&key).is_ok()
    }
    fn max_memory_read(&self) -> Option<u32> {
        /* Each binary search step reduces the space searched by half; complete at size 1.
         * Technically the last few steps are in the same cache line. */
        Some(next_log_power_of_two(self.data.len()))
    }
    fn total_memory_usage(&self) -> Option<usize> {
        Some(self.data.len() * std::mem::size_of::<K>() + std::mem::size_of::<Self>())
    }
}

/* ---------------------------------------------------------------------------- */

/** Rust's BTreeSet. Deterministic, O(log n) query time but with good constants. */
pub struct StdBTreeSet<K>
where
    K: Ord + Clone,
{
    data: BTreeSet<K>,
}

impl<K: Ord + Clone> StaticSet<K> for StdBTreeSet<K> {
    fn build<R: Rng>(keys: &[K], _rng: &mut R) -> Result<StdBTreeSet<K>, BuildError> {
        Ok(StdBTreeSet {
            data: BTreeSet::from_iter(keys.iter().cloned()),
        })
    }
    fn contains(&self, key: K) -> bool {
        self.data.contains(&key)
    }
    fn max_memory_read(&self) -> Option<u32> {
        /* The maximum depth depends on the branching factor and the balancing logic. */
        None
    }
    fn total_memory_usage(&self) -> Option<usize> {
        None
    }
}

/* ---------------------------------------------------------------------------- */

/** Rust's HashSet. Randomized, uses a PRF (SipHash-1-3). */
pub struct StdHashSet<K>
where
    K: Hash + Eq + Clone,
{
    data: HashSet<K>,
}

impl<K: Hash + Eq + Clone> StaticSet<K> for StdHashSet<K> {
    fn build<R: Rng>(keys: &[K], _rng: &mut R) -> Result<StdHashSet<K>, BuildError> {
        Ok(StdHashSet {
            data: HashSet::from_iter(keys.iter().cloned()),
        })
    }
    fn contains(&self, key: K) -> bool {
        self.data.contains(&key)
    }
    fn max_memory_read(&self) -> Option<u32> {
        /* Closed hash table with quadratic probing; the number of reads depends on
         * collisions, which should be O(log n) w.h.p. but has no fixed bound. */
        None
    }
    fn total_memory_usage(&self) -> Option<usize> {
        /* The actual table stores the keys plus an array of "control bytes"
         * (at least 1 per entry, possibly rounded up for SIMD.) */
        None
    }
}

/** Return least `i` so that (1<<i) >= `v`.
 * 0=>0, 1=>0, 2=>1, 3=>2, 4=>2, 5=>3...
 */
fn next_log_power_of_two(v: usize) -> u32 {
    usize::BITS - (v.max(1) - 1).leading_zeros()
}

#[test]
fn test_ceil_log2() {
    assert!(next_log_power_of_two(0) == 0);
    assert!(next_log_power_of_two(1) == 0);
    assert!(next_log_power_of_two(3) == 2);
    assert!(next_log_power_of_two(4) == 2);
    assert!(next_log_power_of_two(5) == 3);
}

/* ---------------------------------------------------------------------------- */

/** An affine hash `x -> (a*x + b) mod PRIME_MODULUS` from the classic universal
 * family of Carter-Wegman 1979. Over the random choice of coefficients, two
 * keys with distinct residues land in the same cell of an m-cell table with
 * probability about 1/m. */
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ModPrimeHash {
    a: i64,
    b: i64,
}

impl ModPrimeHash {
    /** Make the hash with the given coefficients. `a` must be nonzero; the
     * constant functions collapse every key into one cell. */
    pub fn new(a: i64, b: i64) -> ModPrimeHash {
        assert!(a != 0, "zero multiplier makes a constant hash");
        ModPrimeHash { a, b }
    }

    /** Evaluate the hash; the result is in [0, PRIME_MODULUS) even for negative
     * keys. The product of a coefficient and a key can need ~95 bits, so the
     * arithmetic runs at 128 bits before reducing. */
    #[inline(always)]
    pub fn value(&self, key: i64) -> i64 {
        ((self.a as i128 * key as i128 + self.b as i128).rem_euclid(PRIME_MODULUS as i128)) as i64
    }
}

impl Default for ModPrimeHash {
    /** The `a = b = 1` member, carried by tables with no keys in place of a
     * searched-for hash; such tables never evaluate it. */
    fn default() -> ModPrimeHash {
        ModPrimeHash { a: 1, b: 1 }
    }
}

#[test]
fn test_mod_prime_hash() {
    let h = ModPrimeHash::new(48_271, 11);
    for k in [
        0,
        1,
        -1,
        55_555,
        -99_999,
        i64::MIN,
        i64::MAX,
        PRIME_MODULUS,
        -PRIME_MODULUS,
    ] {
        let v = h.value(k);
        assert!((0..PRIME_MODULUS).contains(&v), "{} mapped to {}", k, v);
        assert!(v == h.value(k));
    }
    /* Keys congruent modulo the prime cannot be told apart */
    assert!(h.value(77) == h.value(77 + PRIME_MODULUS));

    assert!(ModPrimeHash::new(1, 0).value(123_456_789) == 123_456_789);
    assert!(ModPrimeHash::new(1, 0).value(-1) == PRIME_MODULUS - 1);
    assert!(ModPrimeHash::new(2, 5).value(PRIME_MODULUS) == 5);
    assert!(ModPrimeHash::default().value(3) == 4);
}

#[test]
#[should_panic]
fn test_zero_multiplier() {
    ModPrimeHash::new(0, 3);
}

/* ---------------------------------------------------------------------------- */

/** Bucket occupancy counts produced by throwing every key into a
 * `table_size`-cell table with `hash`. */
fn bucket_loads(hash: &ModPrimeHash, keys: &[i64], table_size: usize) -> Vec<u32> {
    let mut loads = vec![0_u32; table_size];
    for k in keys {
        loads[hash.value(*k) as usize % table_size] += 1;
    }
    loads
}

fn sum_of_squares(loads: &[u32]) -> u128 {
    loads.iter().map(|x| (*x as u128) * (*x as u128)).sum()
}

/** Reject a top-level hash whose buckets are too lopsided: per-bucket tables
 * take quadratic space, so their total stays linear only while the sum of
 * squared bucket sizes is at most LOAD_BALANCE_FACTOR * n. A universal family
 * keeps the expected sum under 2n, so by Markov's inequality at most half of
 * all draws are rejected (FKS84). */
fn is_unbalanced(hash: &ModPrimeHash, keys: &[i64], table_size: usize) -> bool {
    sum_of_squares(&bucket_loads(hash, keys, table_size))
        > (LOAD_BALANCE_FACTOR as u128) * (keys.len() as u128)
}

/** Reject a hash mapping two keys to the same cell of a `table_size`-cell
 * table. With table size at least the square of the key count, the birthday
 * bound keeps the rejection probability under half. */
fn has_collisions(hash: &ModPrimeHash, keys: &[i64], table_size: usize) -> bool {
    let mut occupied = vec![false; table_size]; // todo: use a bitset
    for k in keys {
        let cell = hash.value(*k) as usize % table_size;
        if occupied[cell] {
            return true;
        }
        occupied[cell] = true;
    }
    false
}

/** Draw affine hashes from `rng` until `reject` passes one, or the trial budget
 * runs out. The predicate receives the candidate, the keys, and the table size,
 * and returns true to reject.
 *
 * Acceptable hashes must make up at least half the family for the intended
 * predicates, so hitting MAX_HASH_TRIALS means the predicate is unsatisfiable
 * for this input rather than that the search was unlucky. */
fn find_hash<R: Rng, P: Fn(&ModPrimeHash, &[i64], usize) -> bool>(
    keys: &[i64],
    table_size: usize,
    rng: &mut R,
    reject: P,
) -> Result<ModPrimeHash, BuildError> {
    let mut trials = 0_u32;
    loop {
        let hash = ModPrimeHash::new(
            rng.random_range(1..PRIME_MODULUS),
            rng.random_range(0..PRIME_MODULUS),
        );
        trials += 1;
        if !reject(&hash, keys, table_size) {
            return Ok(hash);
        }
        if trials >= MAX_HASH_TRIALS {
            return Err(BuildError::RetryLimitExceeded { trials });
        }
    }
}

#[test]
fn test_load_predicates() {
    let id = ModPrimeHash::new(1, 0);
    let spread: Vec<i64> = (0..10).collect();
    let loads = bucket_loads(&id, &spread, 10);
    assert!(loads.iter().all(|l| *l == 1), "{:?}", loads);
    assert!(sum_of_squares(&loads) == 10);
    assert!(!is_unbalanced(&id, &spread, 10));
    assert!(!has_collisions(&id, &spread, 10));

    /* Five keys piled into one cell of ten: 25 > 4 * 5 */
    let piled: Vec<i64> = vec![0, 10, 20, 30, 40];
    assert!(bucket_loads(&id, &piled, 10)[0] == 5);
    assert!(is_unbalanced(&id, &piled, 10));
    assert!(has_collisions(&id, &piled, 10));

    /* Congruent keys collide under every member of the family */
    for (a, b) in [(1, 0), (48_271, 11), (7_777_777, 123_456)] {
        let h = ModPrimeHash::new(a, b);
        assert!(has_collisions(&h, &[3, 3 + PRIME_MODULUS], 1000));
    }
}

#[test]
fn test_find_hash() {
    let mut rng = ChaCha12Rng::seed_from_u64(99);
    let keys: Vec<i64> = vec![-5, 0, 17, 123_456, -987_654_321];
    let cells = keys.len() * keys.len();
    let hash = find_hash(&keys, cells, &mut rng, has_collisions).unwrap();
    assert!(!has_collisions(&hash, &keys, cells));

    /* An unsatisfiable predicate must report failure instead of spinning */
    let res = find_hash(&keys, cells, &mut rng, |_, _, _| true);
    assert!(
        res == Err(BuildError::RetryLimitExceeded {
            trials: MAX_HASH_TRIALS
        })
    );
}

/* ---------------------------------------------------------------------------- */

/** One collision-free table: a key either sits at the cell its hash names, or
 * it is not in the table at all. */
struct BucketTable {
    /** An occupied cell holds exactly the key that hashes to it. */
    cells: Vec<Option<i64>>,
    hash: ModPrimeHash,
}

impl BucketTable {
    /** Build a table over `capacity` cells in which no two keys share a cell.
     * `reject` decides which hashes are unacceptable; the caller must pick a
     * capacity large enough for the predicate to be satisfiable often. */
    fn build<R: Rng, P: Fn(&ModPrimeHash, &[i64], usize) -> bool>(
        keys: &[i64],
        capacity: usize,
        rng: &mut R,
        reject: P,
    ) -> Result<BucketTable, BuildError> {
        if keys.is_empty() {
            /* No cells, and a placeholder hash that is never evaluated */
            return Ok(BucketTable {
                cells: Vec::new(),
                hash: ModPrimeHash::default(),
            });
        }
        assert!(
            capacity >= keys.len(),
            "{} keys cannot fit in {} cells",
            keys.len(),
            capacity
        );

        let hash = find_hash(keys, capacity, rng, reject)?;
        let mut cells = vec![None; capacity];
        for k in keys {
            let cell = &mut cells[hash.value(*k) as usize % capacity];
            assert!(cell.is_none(), "accepted hash still collides on key {}", k);
            *cell = Some(*k);
        }
        Ok(BucketTable { cells, hash })
    }

    fn contains(&self, value: i64) -> bool {
        if self.cells.is_empty() {
            return false;
        }
        /* Occupancy alone is not enough; the probe must equal the stored key */
        self.cells[self.hash.value(value) as usize % self.cells.len()] == Some(value)
    }
}

#[test]
fn test_bucket_table() {
    let mut rng = ChaCha12Rng::seed_from_u64(4);
    let keys: [i64; 4] = [31, -6, 900_000_000, 77];
    let table =
        BucketTable::build(&keys, keys.len() * keys.len(), &mut rng, has_collisions).unwrap();
    for k in keys {
        assert!(table.contains(k));
    }
    for missing in [0_i64, 30, 32, 6, -900_000_000, i64::MAX] {
        assert!(!table.contains(missing));
    }

    let empty = BucketTable::build(&[], 0, &mut rng, has_collisions).unwrap();
    assert!(empty.cells.is_empty());
    assert!(!empty.contains(0) && !empty.contains(31));
}

/* ---------------------------------------------------------------------------- */

/** The FKS84 two-level hash table, specialized to membership queries: a
 * top-level hash splits the keys over n buckets, and each bucket gets its own
 * collision-free table with capacity quadratic in its population. A query reads
 * one bucket header and one cell, so lookups make a worst case of two dependent
 * memory accesses regardless of the set size.
 *
 * Construction is randomized and rejection-sampled: hashes are redrawn until
 * both levels meet their bounds, an expected two draws per level. The structure
 * never changes after construction, so it can be shared freely across threads.
 */
pub struct FixedSet {
    top_hash: ModPrimeHash,
    /** One table per bucket; `buckets.len()` equals the number of keys. */
    buckets: Vec<BucketTable>,
    len: usize,
}

impl FixedSet {
    /** Build from OS entropy; panics if the keys cannot be hashed (duplicates,
     * or distinct keys congruent modulo [PRIME_MODULUS]). Use
     * [StaticSet::build] to control seeding or to handle failure. */
    pub fn new(keys: &[i64]) -> FixedSet {
        let mut rng = ChaCha12Rng::from_os_rng();
        <FixedSet as StaticSet<i64>>::build(keys, &mut rng)
            .expect("could not build a perfect hash for these keys")
    }

    /** Number of keys in the set. */
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /** Visit the stored keys, in bucket-then-cell order. */
    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        self.buckets
            .iter()
            .flat_map(|b| b.cells.iter().flatten().copied())
    }
}

/** Locate a key occurring more than once, if any */
fn find_duplicate(keys: &[i64]) -> Option<i64> {
    let mut sorted = keys.to_vec();
    sorted.sort_unstable();
    for w in sorted.windows(2) {
        if w[0] == w[1] {
            return Some(w[0]);
        }
    }
    None
}

impl StaticSet<i64> for FixedSet {
    fn build<R: Rng>(keys: &[i64], rng: &mut R) -> Result<FixedSet, BuildError> {
        /* A repeated key would make every bucket hash collide and the bucket
         * search fail its budget; report it by name instead. */
        if let Some(k) = find_duplicate(keys) {
            return Err(BuildError::DuplicateKey(k));
        }
        if keys.is_empty() {
            return Ok(FixedSet {
                top_hash: ModPrimeHash::default(),
                buckets: Vec::new(),
                len: 0,
            });
        }

        let n = keys.len();
        let top_hash = find_hash(keys, n, rng, is_unbalanced)?;

        let mut groups: Vec<Vec<i64>> = Vec::new();
        groups.resize_with(n, Vec::new);
        for k in keys {
            groups[top_hash.value(*k) as usize % n].push(*k);
        }

        /* Quadratic capacity keeps the collision-free search likely to succeed
         * quickly. Buckets are built in index order; a seeded build replays the
         * same sequence of draws. */
        let mut buckets = Vec::with_capacity(n);
        for group in groups.iter() {
            buckets.push(BucketTable::build(
                group,
                group.len() * group.len(),
                rng,
                has_collisions,
            )?);
        }

        Ok(FixedSet {
            top_hash,
            buckets,
            len: n,
        })
    }

    fn contains(&self, key: i64) -> bool {
        if self.buckets.is_empty() {
            return false;
        }
        self.buckets[self.top_hash.value(key) as usize % self.buckets.len()].contains(key)
    }

    fn max_memory_read(&self) -> Option<u32> {
        /* One bucket header, then one cell of that bucket */
        Some(2)
    }

    fn total_memory_usage(&self) -> Option<usize> {
        let cells: usize = self.buckets.iter().map(|b| b.cells.len()).sum();
        Some(
            std::mem::size_of::<Self>()
                + self.buckets.len() * std::mem::size_of::<BucketTable>()
                + cells * std::mem::size_of::<Option<i64>>(),
        )
    }
}

/** Widening adapter: a set storing i64 keys can serve i32 keys directly. */
impl<T: StaticSet<i64>> StaticSet<i32> for T {
    fn build<R: Rng>(keys: &[i32], rng: &mut R) -> Result<T, BuildError> {
        let keys_i64: Vec<i64> = keys.iter().map(|x| *x as i64).collect();
        T::build(&keys_i64, rng)
    }
    fn contains(&self, key: i32) -> bool {
        StaticSet::<i64>::contains(self, key as i64)
    }
    fn max_memory_read(&self) -> Option<u32> {
        StaticSet::<i64>::max_memory_read(self)
    }
    fn total_memory_usage(&self) -> Option<usize> {
        StaticSet::<i64>::total_memory_usage(self)
    }
}

/* ---------------------------------------------------------------------------- */

#[cfg(test)]
fn check_static_set<S: StaticSet<i64>>() {
    let mut sizes: Vec<usize> = vec![0, 1, 2, 3];
    for j in 2..10 {
        sizes.push(2 << j);
        sizes.push(3 << j);
    }

    let mut rng = ChaCha12Rng::seed_from_u64(0x5e7);
    for s in sizes {
        let keys = util::random_key_set(s, -1_000_000_000..1_000_000_001, &mut rng);
        let set = S::build(&keys, &mut rng).unwrap();
        for k in keys.iter() {
            assert!(set.contains(*k), "key {} missing at size {}", k, s);
        }
        let probes =
            util::disjoint_probes(&keys, s.max(16), -1_000_000_000..1_000_000_001, &mut rng);
        for p in probes {
            assert!(!set.contains(p), "non-key {} present at size {}", p, s);
        }
        /* Queries are read-only; repeating one must not change the answer */
        if let Some(k) = keys.first() {
            for _ in 0..3 {
                assert!(set.contains(*k));
            }
        }
    }
}

#[test]
fn test_binsearch_set() {
    check_static_set::<BinSearchSet<i64>>();
}

#[test]
fn test_std_btree_set() {
    check_static_set::<StdBTreeSet<i64>>();
}

#[test]
fn test_std_hash_set() {
    check_static_set::<StdHashSet<i64>>();
}

#[test]
fn test_fixed_set() {
    check_static_set::<FixedSet>();
}

#[test]
fn test_empty_set() {
    let set = FixedSet::new(&[]);
    assert!(set.is_empty() && set.len() == 0);
    for probe in [0_i64, 1, -1, i64::MIN, i64::MAX] {
        assert!(!set.contains(probe));
    }
    assert!(set.iter().next().is_none());
    assert!(
        StaticSet::<i64>::total_memory_usage(&set).unwrap() == std::mem::size_of::<FixedSet>()
    );
}

#[test]
fn test_singleton_set() {
    let set = FixedSet::new(&[42]);
    assert!(set.len() == 1 && !set.is_empty());
    assert!(set.contains(42_i64));
    assert!(!set.contains(41_i64) && !set.contains(43_i64) && !set.contains(-42_i64));
    assert!(set.iter().collect::<Vec<i64>>() == vec![42]);
}

#[test]
fn test_duplicate_keys_rejected() {
    let mut rng = ChaCha12Rng::seed_from_u64(0);
    let keys: [i64; 5] = [3, 1, 4, 1, 5];
    let res: Result<FixedSet, BuildError> = StaticSet::build(&keys, &mut rng);
    assert!(res.err() == Some(BuildError::DuplicateKey(1)));

    /* The widening path validates after conversion */
    let keys32: [i32; 2] = [7, 7];
    let res32: Result<FixedSet, BuildError> = StaticSet::build(&keys32, &mut rng);
    assert!(res32.err() == Some(BuildError::DuplicateKey(7)));
}

#[test]
fn test_inseparable_keys_give_up() {
    /* Distinct keys congruent modulo the prime collide under every hash in the
     * family; the bucket search must fail in bounded time instead of spinning */
    let mut rng = ChaCha12Rng::seed_from_u64(8);
    let keys: [i64; 2] = [3, 3 + PRIME_MODULUS];
    let res: Result<FixedSet, BuildError> = StaticSet::build(&keys, &mut rng);
    assert!(
        res.err()
            == Some(BuildError::RetryLimitExceeded {
                trials: MAX_HASH_TRIALS
            })
    );
}

#[test]
fn test_seeded_build_reproducible() {
    let mut rng = ChaCha12Rng::seed_from_u64(0xfeed);
    let keys = util::random_key_set(300, -1_000_000_000..1_000_000_001, &mut rng);

    let a: FixedSet = StaticSet::build(&keys, &mut ChaCha12Rng::seed_from_u64(7)).unwrap();
    let b: FixedSet = StaticSet::build(&keys, &mut ChaCha12Rng::seed_from_u64(7)).unwrap();
    assert!(a.top_hash == b.top_hash);
    assert!(a.buckets.len() == b.buckets.len());
    for (x, y) in a.buckets.iter().zip(b.buckets.iter()) {
        assert!(x.hash == y.hash && x.cells == y.cells);
    }

    /* A different seed almost surely picks different hashes, but must agree
     * about membership */
    let c: FixedSet = StaticSet::build(&keys, &mut ChaCha12Rng::seed_from_u64(8)).unwrap();
    for k in keys.iter() {
        assert!(a.contains(*k) && c.contains(*k));
    }
}

#[test]
fn test_space_bound() {
    let mut rng = ChaCha12Rng::seed_from_u64(0xa11);
    for n in [1_usize, 10, 100, 1000, 5000] {
        let keys = util::random_key_set(n, -1_000_000_000..1_000_000_001, &mut rng);
        let set: FixedSet = StaticSet::build(&keys, &mut rng).unwrap();
        let total_cells: usize = set.buckets.iter().map(|b| b.cells.len()).sum();
        assert!(
            total_cells as u64 <= LOAD_BALANCE_FACTOR * n as u64,
            "{} cells used for {} keys",
            total_cells,
            n
        );
        assert!(StaticSet::<i64>::max_memory_read(&set) == Some(2));
        assert!(StaticSet::<i64>::total_memory_usage(&set).unwrap() > 0);
    }
}

#[test]
fn test_structure_invariants() {
    /* Each key sits in the bucket the top hash names, at the cell its bucket
     * hash names, and nowhere else */
    let mut rng = ChaCha12Rng::seed_from_u64(3);
    let keys = util::random_key_set(800, -1_000_000_000..1_000_000_001, &mut rng);
    let set: FixedSet = StaticSet::build(&keys, &mut rng).unwrap();

    let mut seen = 0_usize;
    for (i, bucket) in set.buckets.iter().enumerate() {
        for (j, cell) in bucket.cells.iter().enumerate() {
            let Some(k) = cell else { continue };
            assert!(set.top_hash.value(*k) as usize % set.buckets.len() == i);
            assert!(bucket.hash.value(*k) as usize % bucket.cells.len() == j);
            seen += 1;
        }
    }
    assert!(seen == keys.len());

    let mut stored: Vec<i64> = set.iter().collect();
    stored.sort_unstable();
    let mut sorted_keys = keys.clone();
    sorted_keys.sort_unstable();
    assert!(stored == sorted_keys);
}

#[test]
fn test_order_independence() {
    use itertools::Itertools;

    let keys: [i64; 4] = [-19, 2, 65_536, 1_000_000_000];
    let mut rng = ChaCha12Rng::seed_from_u64(0x0d);
    for perm in keys.iter().copied().permutations(keys.len()) {
        let set: FixedSet = StaticSet::build(&perm, &mut rng).unwrap();
        for k in keys.iter() {
            assert!(set.contains(*k), "{} missing under order {:?}", k, perm);
        }
        for probe in [-20_i64, 0, 65_537, 999_999_999] {
            assert!(!set.contains(probe));
        }
    }
}

#[test]
fn test_narrow_keys() {
    let mut rng = ChaCha12Rng::seed_from_u64(0x32);
    let keys: Vec<i32> = vec![-2_000_000_000, -7, 0, 13, 2_000_000_000, i32::MAX, i32::MIN];
    let set: FixedSet = StaticSet::build(&keys, &mut rng).unwrap();
    for k in keys.iter() {
        assert!(set.contains(*k));
    }
    assert!(!set.contains(14_i32) && !set.contains(-13_i32) && !set.contains(1_i32));
    /* The same storage answers wide probes consistently */
    assert!(set.contains(13_i64));
    assert!(!set.contains(8_000_000_000_i64));
}

#[test]
fn test_ten_thousand_keys() {
    let mut rng = ChaCha12Rng::seed_from_u64(0x10_000);
    let keys = util::random_key_set(10_000, -1_000_000_000..1_000_000_001, &mut rng);
    let set: FixedSet = StaticSet::build(&keys, &mut rng).unwrap();
    assert!(set.len() == 10_000);
    for k in keys.iter() {
        assert!(set.contains(*k));
    }
    for p in util::disjoint_probes(&keys, 10_000, -1_000_000_000..1_000_000_001, &mut rng) {
        assert!(!set.contains(p));
    }
}

#[test]
fn test_parallel_queries() {
    use rayon::prelude::*;

    let mut rng = ChaCha12Rng::seed_from_u64(55);
    let keys = util::random_key_set(4096, -1_000_000_000..1_000_000_001, &mut rng);
    let set: FixedSet = StaticSet::build(&keys, &mut rng).unwrap();

    let hits: usize = keys.par_iter().map(|k| set.contains(*k) as usize).sum();
    assert!(hits == keys.len());

    let probes = util::disjoint_probes(&keys, 4096, -1_000_000_000..1_000_000_001, &mut rng);
    let false_hits: usize = probes.par_iter().map(|p| set.contains(*p) as usize).sum();
    assert!(false_hits == 0);
}
