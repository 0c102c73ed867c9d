use std::collections::BTreeSet;

/* SPDX-License-Identifier: MPL-2.0 */
use crate::StaticSet;
use rand::{seq::SliceRandom, Rng};
#[cfg(test)]
use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;
use rand_distr::{Binomial, Distribution, StandardUniform};
use std::ops::Range;

/** Produces a sorted, uniformly random (assuming a perfect RNG) distribution
 * over fixed size subsets of a given range.
 *
 * The `rand` crate's rand::seq::index::sample unnecessarily allocates,
 * the allocation-free rand::seq::index::sample_array is quadratic, and
 * neither can provide subsets of integers larger than usize::MAX.
 */
struct RandomSubsetIterator<'a> {
    start: u64,
    end_incl: u64,
    count: u64,
    rng: &'a mut ChaCha12Rng,
}

impl RandomSubsetIterator<'_> {
    fn new(start: u64, end_incl: u64, count: u64, rng: &mut ChaCha12Rng) -> RandomSubsetIterator {
        assert!(end_incl >= start);
        if count > 0 {
            assert!(
                end_incl - start >= count - 1,
                "{}..={} {}",
                start,
                end_incl,
                count
            );
        }
        RandomSubsetIterator {
            start,
            end_incl,
            count,
            rng,
        }
    }
}
impl Iterator for RandomSubsetIterator<'_> {
    type Item = u64;

    fn next(&mut self) -> Option<Self::Item> {
        if self.count == 0 {
            return None;
        }

        /* Vitter 1984's Algorithm D, built from existing distribution samplers
         * (as recommended by Ting 2021's "Simple, Optimal Algorithms for Random
         * Sampling Without Replacement"): sample the gap before the smallest
         * remaining element, emit it, and recurse on the rest of the range. */
        let mut nmk = (self.end_incl - self.start) - (self.count - 1);

        // TODO: directly implement binomial sampling, because rand_distr's Binomial
        // can break when floats are produced that don't fit in `i64`. Also, this way we can
        // ensure the calculations are valid and accurate even when operating up to
        // u128::MAX or larger.

        /* The gap follows Beta(1, count) scaled to the free positions. With
         * alpha=1 fixed the inverse-CDF form 1-u^(1/count) suffices, computed
         * as -exp_m1(ln(u)/count) to stay accurate when count is large and
         * u^(1/count) rounds to a value near 1. A zero `u` gives ln(u) = -inf
         * and exp_m1(-inf) = -1, so p = 1 and the remaining range collapses. */
        let u: f64 = StandardUniform::default().sample(self.rng);
        let p = -f64::exp_m1(f64::ln(u) * (1. / (self.count as f64)));

        /* Binomial::sample from rand_distr 0.5.1 currently has a panic issue
         * when the trial count is close to u64::MAX, and does not sample odd
         * values properly when it is large (floating point quantization). Adding
         * samples from smaller distributions avoids both, as long as one of the
         * added parts has magnitude 1<<53 or smaller. */
        let mut offset = 0;
        let first_n = 1u64 << 50;
        if nmk > first_n {
            let bin = Binomial::new(first_n, p).unwrap();
            offset += bin.sample(self.rng);
            nmk -= first_n;
        }
        let max_n = 1u64 << 62; // 1<<63 is too large
        while nmk > max_n {
            let bin = Binomial::new(max_n, p).unwrap();
            offset += bin.sample(self.rng);
            nmk -= max_n;
        }
        let bin = Binomial::new(nmk, p).unwrap();
        offset += bin.sample(self.rng);

        let first_pos = self.start + offset;

        self.start = first_pos + 1;
        self.count -= 1;
        Some(first_pos)
    }
}

#[test]
fn test_random_subset() {
    let max = (1u64 << 48) - 1;
    let mut rng = ChaCha12Rng::seed_from_u64(13);
    for (start, end_incl, count) in [
        (0, 10, 0),              /* empty subset */
        (0, 0, 1),               /* single forced choice */
        (0, 99, 100),            /* take the whole range */
        (1 << 20, max, 1 << 16), /* sparse sampling */
    ] {
        let v: Vec<u64> = RandomSubsetIterator::new(start, end_incl, count, &mut rng).collect();
        assert!(v.len() == count as usize);
        for w in v.windows(2) {
            assert!(w[0] < w[1], "{} {}", w[0], w[1]);
        }
        assert!(v.iter().all(|x| (start..=end_incl).contains(x)));
    }
}

/** Return `count` distinct keys drawn uniformly from `range`, in random order.
 *
 * Note: a seed is not guaranteed to produce consistent keys between
 * architectures, due to allowable differences in floating point behavior;
 * library changes to the sampling routines may also affect the pattern. */
pub fn random_key_set(count: usize, range: Range<i64>, rng: &mut ChaCha12Rng) -> Vec<i64> {
    assert!(!range.is_empty());
    /* Sample offsets into the range; the span can exceed i64::MAX, so widths
     * are handled as u64 and mapped back with wrapping adds. */
    let span_end = range.end.wrapping_sub(range.start).wrapping_sub(1) as u64;
    let mut keys: Vec<i64> = RandomSubsetIterator::new(0, span_end, count as u64, rng)
        .map(|offset| range.start.wrapping_add(offset as i64))
        .collect();
    keys.shuffle(rng);
    keys
}

/** Return `count` probe values from `range`, none of which occur in `keys`.
 * Probes may repeat. Rejection sampling; only fast while the keys fill at most
 * about half of the range. */
pub fn disjoint_probes(
    keys: &[i64],
    count: usize,
    range: Range<i64>,
    rng: &mut ChaCha12Rng,
) -> Vec<i64> {
    assert!(!range.is_empty());
    let members: BTreeSet<i64> = keys.iter().copied().collect();
    let span = range.end.wrapping_sub(range.start) as u64 as u128;
    assert!((members.len() as u128) < span, "no probes outside the key set");

    let mut probes = Vec::with_capacity(count);
    while probes.len() < count {
        let x = rng.random_range(range.clone());
        if !members.contains(&x) {
            probes.push(x);
        }
    }
    probes
}

#[test]
fn test_random_key_set() {
    let mut rng = ChaCha12Rng::seed_from_u64(13);
    for (count, range) in [
        (0_usize, 0_i64..1_i64),
        (1, -5..5),
        (100, 0..100), /* take the whole range */
        (1 << 12, i64::MIN..i64::MAX),
        (1000, -1_000_000_000..1_000_000_001),
    ] {
        let keys = random_key_set(count, range.clone(), &mut rng);
        assert!(keys.len() == count);
        assert!(keys.iter().all(|k| range.contains(k)));
        let distinct: BTreeSet<i64> = keys.iter().copied().collect();
        assert!(distinct.len() == count, "repeats in {:?}", keys);
    }
}

#[test]
fn test_disjoint_probes() {
    let mut rng = ChaCha12Rng::seed_from_u64(29);
    let keys = random_key_set(512, -1000..1000, &mut rng);
    let probes = disjoint_probes(&keys, 256, -1000..1000, &mut rng);
    let members: BTreeSet<i64> = keys.iter().copied().collect();
    assert!(probes.len() == 256);
    assert!(probes
        .iter()
        .all(|p| !members.contains(p) && (-1000..1000).contains(p)));
}

/** Throughput helper: query every probe and count the hits. Callers know how
 * many probes are members; checking the total also keeps the compiler from
 * discarding the queries. */
pub fn count_hits<T: StaticSet<i64>>(set: &T, probes: &[i64]) -> usize {
    let mut hits = 0;
    for p in probes {
        hits += set.contains(*p) as usize;
    }
    hits
}

/** Latency helper: walk `steps` queries where each probe index depends on the
 * previous answer, so consecutive lookups cannot overlap in the memory system.
 * Returns the number of hits. */
pub fn dependent_query<T: StaticSet<i64>>(set: &T, probes: &[i64], steps: usize) -> usize {
    let mut hits = 0_usize;
    let mut idx = 0_usize;
    for _ in 0..steps {
        let hit = set.contains(probes[idx]);
        hits += hit as usize;
        idx = (idx + 1 + hit as usize) % probes.len();
    }
    hits
}

#[test]
fn test_query_helpers() {
    use crate::BinSearchSet;

    let mut rng = ChaCha12Rng::seed_from_u64(77);
    let keys = random_key_set(256, -10_000..10_000, &mut rng);
    let set: BinSearchSet<i64> = StaticSet::build(&keys, &mut rng).unwrap();
    assert!(count_hits(&set, &keys) == keys.len());
    assert!(dependent_query(&set, &keys, 1000) == 1000);

    let probes = disjoint_probes(&keys, 128, -10_000..10_000, &mut rng);
    assert!(count_hits(&set, &probes) == 0);
    assert!(dependent_query(&set, &probes, 1000) == 0);
}
