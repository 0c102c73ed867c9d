/* SPDX-License-Identifier: MPL-2.0 */
/*! Test program: build and query a static set */

use fixset::*;
use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;
use rayon::prelude::*;
use std::time::Instant;

struct SetTrialImpl<S> {
    set: S,
}
trait SetTrial {
    fn new(keys: &[i64], seed: u64) -> Box<dyn SetTrial>
    where
        Self: Sized;
    fn test_seq(&self, queries: &[i64]) -> usize;
    fn test_par(&self, queries: &[i64]) -> usize;
}
impl<S> SetTrial for SetTrialImpl<S>
where
    S: StaticSet<i64> + Send + Sync + 'static,
{
    fn new(keys: &[i64], seed: u64) -> Box<dyn SetTrial>
    where
        Self: Sized,
    {
        let mut rng = ChaCha12Rng::seed_from_u64(seed);
        Box::new(SetTrialImpl {
            set: S::build(keys, &mut rng).unwrap(),
        })
    }
    #[inline(never)]
    fn test_seq(&self, queries: &[i64]) -> usize {
        let mut x = 0;
        for q in queries.iter() {
            x += self.set.contains(*q) as usize;
        }
        std::hint::black_box(x)
    }
    #[inline(never)]
    fn test_par(&self, queries: &[i64]) -> usize {
        let x = queries
            .par_iter()
            .map(|q| self.set.contains(*q) as usize)
            .sum();
        std::hint::black_box(x)
    }
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let set_type: &str = args.get(1).map(|x| x.as_str()).unwrap_or("fks");
    let sz = args
        .get(2)
        .map(|x| usize::from_str_radix(&x, 10).unwrap())
        .unwrap_or(1 << 18);

    let pattern = args.get(3).map(|x| x.as_str()).unwrap_or("randb");
    let range = match pattern {
        /* one billion in each direction, the scale the structure is sized for */
        "randb" => -1_000_000_000..1_000_000_001,
        /* centered power of two span, still within one residue class width */
        "rand30" => -(1_i64 << 29)..(1_i64 << 29),
        _ => unimplemented!(),
    };
    let mut key_rng = ChaCha12Rng::seed_from_u64(0x1111);
    let keys = std::hint::black_box(util::random_key_set(sz, range, &mut key_rng));
    let queries: Vec<i64> = std::hint::black_box(keys.clone());
    let t0 = Instant::now();

    let set = match set_type {
        "fks" => SetTrialImpl::<FixedSet>::new(&keys, 0x1),
        "binsearch" => SetTrialImpl::<BinSearchSet<i64>>::new(&keys, 0x1),
        "btree" => SetTrialImpl::<StdBTreeSet<i64>>::new(&keys, 0x1),
        "hash" => SetTrialImpl::<StdHashSet<i64>>::new(&keys, 0x1),
        _ => panic!(),
    };

    let t1 = Instant::now();

    let seq_hits = set.test_seq(&queries);
    assert!(seq_hits == queries.len());

    let t2 = Instant::now();

    let par_hits = set.test_par(&queries);
    assert!(par_hits == queries.len());

    let t3 = Instant::now();
    println!(
        "type: {} size: {}; construction time: {} secs; query time: {} secs; parallel query time: {} secs",
        set_type,
        sz,
        t1.duration_since(t0).as_secs_f64(),
        t2.duration_since(t1).as_secs_f64(),
        t3.duration_since(t2).as_secs_f64()
    )
}
