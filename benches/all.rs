/* SPDX-License-Identifier: MPL-2.0 */
/* Benchmarking code / mini-framework for _possibly_ long running tasks with setup and processing phases.
 *
 * (The main alternatives, `criterion` and `divan`, have no good way to handle time limits (or crashes due to
 * hitting memory limit). This approach runs a subprocess per benchmark size class.)
 */

use clap::{Arg, ArgAction};
use fixset::*;
use rand::{seq::SliceRandom, SeedableRng};
use rand_chacha::ChaCha12Rng;
use rustix::{io, pipe, process};
use std::{
    collections::BTreeSet,
    io::Write,
    os::fd::{AsRawFd, FromRawFd, OwnedFd},
};

struct BenchConfig<'a> {
    name: &'a str,
    set_name: &'a str,
    min_time_sec: f64,
    soft_max_time_sec: f64,
    output_pipe: OwnedFd,
    /** Keys are drawn from a centered range spanning 2^range_bits values. */
    range_bits: u32,
    sz: usize,
}

type BenchFn = Box<dyn Fn(&BenchConfig)>;

struct SetCycleResults {
    average_time_per_build: f64,
    average_time_per_hitq: f64,
    average_time_per_missq: f64,
    average_time_per_latq: f64,
}

struct ParameterInfo {
    samples: u64,
    min: f64,
    q1: f64,
    median: f64,
    q3: f64,
    max: f64,
    systematic_error: f64,
}

impl ParameterInfo {
    fn from_iter<I: Iterator<Item = f64>>(x: I, systematic_error: f64) -> ParameterInfo {
        let mut v: Vec<f64> = x.collect();
        v.sort_by(|x, y| f64::partial_cmp(x, y).unwrap());
        let median = (v[v.len() / 2] + v[v.len() - 1 - v.len() / 2]) / 2.0;
        ParameterInfo {
            samples: v.len() as u64,
            min: *v.first().unwrap(),
            q1: v[v.len() / 4], // note: quartiles use the next most extreme value and are not interpolated like the median
            median,
            q3: v[v.len() - 1 - v.len() / 4],
            max: *v.last().unwrap(),
            systematic_error,
        }
    }
    fn to_string(&self) -> String {
        format!("{{ \"samples\": {}, \"min\": {}, \"q1\": {}, \"median\": {}, \"q3\": {}, \"max\": {}, \"systematic_error\": {} }}", self.samples, self.min, self.q1, self.median, self.q3, self.max, self.systematic_error)
    }
}

/** Keys accepted by every set type: a centered interval spanning 2^range_bits
 * values, which for range_bits <= 30 stays within one residue class width. */
fn key_range(range_bits: u32) -> std::ops::Range<i64> {
    assert!((1..=30).contains(&range_bits));
    let half = 1_i64 << (range_bits - 1);
    -half..half
}

fn run_set_cycle<S: StaticSet<i64>>(
    iterations: u64,
    range_bits: u32,
    sz: usize,
    seed: u64,
) -> SetCycleResults {
    let mut rng = ChaCha12Rng::seed_from_u64(seed);
    let range = key_range(range_bits);
    let keys = std::hint::black_box(util::random_key_set(sz, range.clone(), &mut rng));
    let misses = std::hint::black_box(util::disjoint_probes(&keys, sz, range, &mut rng));
    /* Probes for the latency measurement mix hits and misses so that the
     * dependent index walk is not predictable */
    let mut mixed: Vec<i64> = keys.iter().chain(misses.iter()).copied().collect();
    mixed.shuffle(&mut rng);

    let mut build_rng = ChaCha12Rng::seed_from_u64(seed ^ 0xb111d);
    let start_time = std::time::Instant::now();
    let mut set = None;
    for _ in 0..iterations {
        set = Some(std::hint::black_box(
            S::build(&keys, &mut build_rng).unwrap(),
        ));
    }
    let build_time = std::time::Instant::now();
    /* Query performance depends on what construction left in the caches; touch
     * every key once so all set types start from a warm state. */
    let set = set.unwrap();
    util::count_hits(&set, &keys);
    let warmup_time = std::time::Instant::now();
    for _ in 0..iterations {
        assert!(util::count_hits(&set, &keys) == keys.len());
    }
    let hit_query_time = std::time::Instant::now();
    for _ in 0..iterations {
        assert!(util::count_hits(&set, &misses) == 0);
    }
    let miss_query_time = std::time::Instant::now();
    for _ in 0..iterations {
        std::hint::black_box(util::dependent_query(&set, &mixed, sz));
    }
    let dependent_query_time = std::time::Instant::now();

    SetCycleResults {
        average_time_per_build: build_time.duration_since(start_time).as_secs_f64()
            / (iterations as f64),
        average_time_per_hitq: hit_query_time.duration_since(warmup_time).as_secs_f64()
            / (iterations as f64),
        average_time_per_missq: miss_query_time.duration_since(hit_query_time).as_secs_f64()
            / (iterations as f64),
        average_time_per_latq: dependent_query_time
            .duration_since(miss_query_time)
            .as_secs_f64()
            / (iterations as f64),
    }
}

fn run_bench<S: StaticSet<i64>>(cfg: &BenchConfig) {
    println!("Running benchmark: {}", cfg.name);

    /* The very first cycle may take significantly longer than usual due to the
     * cost of loading all the code and bringing it into caches. Run the instance
     * on a smaller input to correct for this, to get more accurate first-cycle
     * measurements. */
    run_set_cycle::<S>(1, cfg.range_bits, 64, 0x1);

    let mut seed = 0x1234;
    let seed_start = std::time::Instant::now();
    let seed_results = run_set_cycle::<S>(1, cfg.range_bits, cfg.sz, seed);
    let seed_end = std::time::Instant::now();
    let seed_elapsed = seed_end.duration_since(seed_start).as_secs_f64();

    /* This extrapolation can still strongly underestimate the required time
     * on small input sizes, but is unlikely to _overestimate_ the time. */
    let suggested_iteration_count = (cfg.min_time_sec / (10.0 * seed_elapsed)).ceil() as u64;
    assert!(suggested_iteration_count >= 1);
    /* Assuming 1us time measurement overhead.
     * This systematic error should be an _upper bound_ on the systematic
     * deviation of the measured time from the time we wanted to measure,
     * but it ignores the cost of the iteration loop itself and however
     * the compiler and CPU together optimize or pessimize std::black_box.
     */
    let systematic_error = 1e-6 / (suggested_iteration_count as f64);

    let mut measurements = Vec::new();
    if suggested_iteration_count == 1 {
        /* Test is slow, run it at most 3 times or until soft time limit */
        measurements.push(seed_results);

        let remaining_iters = ((cfg.soft_max_time_sec / seed_elapsed).ceil() as u64).min(3) - 1;
        seed += 2;
        for _ in 0..remaining_iters {
            measurements.push(run_set_cycle::<S>(1, cfg.range_bits, cfg.sz, seed));
        }
    } else {
        /* Repeat test 10 times */
        for _ in 0..10 {
            measurements.push(run_set_cycle::<S>(
                suggested_iteration_count,
                cfg.range_bits,
                cfg.sz,
                seed,
            ));
            seed += 2;
        }
    }

    /* Compute basic statistics.
     *
     * Note: lag spikes may correlate between the different parts measured in these runs.
     */
    let info_build = ParameterInfo::from_iter(
        measurements.iter().map(|x| x.average_time_per_build),
        systematic_error,
    );
    let info_hitq = ParameterInfo::from_iter(
        measurements.iter().map(|x| x.average_time_per_hitq),
        systematic_error,
    );
    let info_missq = ParameterInfo::from_iter(
        measurements.iter().map(|x| x.average_time_per_missq),
        systematic_error,
    );
    let info_latq = ParameterInfo::from_iter(
        measurements.iter().map(|x| x.average_time_per_latq),
        systematic_error,
    );

    let mut message = String::from("{");
    message += &format!(
        "\"set\": \"{}\", \"range_bits\": {}, \"n_keys\": {}, ",
        cfg.set_name, cfg.range_bits, cfg.sz
    );

    message += "\"measurements\": {\n";

    message += "  \"build\": ";
    message += &info_build.to_string();
    message += ",\n";

    message += "  \"hitq\": ";
    message += &info_hitq.to_string();
    message += ",\n";

    message += "  \"missq\": ";
    message += &info_missq.to_string();
    message += ",\n";

    message += "  \"latq\": ";
    message += &info_latq.to_string();

    message.push_str("\n} }\n");

    let b = message.as_bytes();
    let length_field = u32::to_le_bytes(message.len() as u32);
    assert!(io::write(&cfg.output_pipe, &length_field) == Ok(4));
    assert!(io::write(&cfg.output_pipe, b) == Ok(b.len()));
}

fn make_bench_fn<S: StaticSet<i64> + 'static>() -> Box<dyn Fn(&BenchConfig)> {
    Box::new(|cfg| {
        run_bench::<S>(cfg);
    })
}

fn main() {
    let cmd = clap::Command::new("bench-all")
        .about("Set of benchmarks for static membership structures")
        .arg(
            Arg::new("bench")
                .long("bench")
                .action(ArgAction::SetTrue)
                .default_value("false"),
        )
        .arg(
            Arg::new("exact")
                .long("exact")
                .action(ArgAction::SetTrue)
                .default_value("false"),
        )
        .arg(
            Arg::new("list")
                .long("list")
                .action(ArgAction::SetTrue)
                .default_value("false"),
        )
        .arg(
            Arg::new("new")
                .long("new")
                .action(ArgAction::SetTrue)
                .default_value("false")
                .help("Only run benchmarks for which no output has been recorded"),
        )
        .arg(Arg::new("run").long("run").action(ArgAction::Set).help(
            "Internal use: run the listed test and report outputs. Argument is output pipe fd.",
        ))
        .arg(Arg::new("filters").action(ArgAction::Append));

    let matches = cmd.get_matches();

    let memory_limit = 10000000000; /* bytes */
    let time_hard_max = 100; /* seconds */
    let time_soft_max = 3.0; /* seconds */
    let time_min = 0.1; /* seconds */

    // benchmarks: one per set type, each with 4 outputs: build/hitq/missq/latq
    let benchmarks: &[(&'static str, BenchFn)] = &[
        ("fks", make_bench_fn::<FixedSet>()),
        ("binsearch", make_bench_fn::<BinSearchSet<i64>>()),
        ("btree", make_bench_fn::<StdBTreeSet<i64>>()),
        ("hash", make_bench_fn::<StdHashSet<i64>>()),
    ];

    if let Some(fdstr) = matches.get_one::<String>("run") {
        let fd_no = i32::from_str_radix(&fdstr, 10).unwrap();
        let output_pipe = unsafe { OwnedFd::from_raw_fd(fd_no) };

        let mut names: Vec<&String> = matches.get_many::<String>("filters").unwrap().collect();
        let full_name = names.pop().unwrap();
        assert!(names.is_empty());

        let parts: Vec<&str> = full_name.split("_").collect();
        assert!(parts.len() == 3);
        let bench_name = parts[0];
        let range_bits = u32::from_str_radix(&parts[1], 10).unwrap();
        let sz_bits = u32::from_str_radix(&parts[2], 10).unwrap();
        let sz = 1 << sz_bits;

        let mem_limit = process::getrlimit(process::Resource::As);
        let time_limit = process::getrlimit(process::Resource::Cpu);

        let new_memory_limit = mem_limit.current.unwrap_or(memory_limit).min(memory_limit);
        process::setrlimit(
            process::Resource::As,
            process::Rlimit {
                current: Some(new_memory_limit),
                maximum: Some(new_memory_limit),
            },
        )
        .unwrap();

        /* Note: this imposes a CPU time limit inside the process, but the
         * timeout granularity is limited, and (in general) time limits should
         * in terms of wall clock time and be enforced by the parent process,
         * to ensure the benchmark subprocess cannot hang while ignoring signals.
         *
         * Also: SIGXCPU dumps core by default; a parent SIGKILL would avoid this.
         */
        let new_time_limit = time_limit
            .current
            .unwrap_or(time_hard_max)
            .min(time_hard_max);
        process::setrlimit(
            process::Resource::Cpu,
            process::Rlimit {
                current: Some(new_time_limit),
                maximum: Some(new_time_limit + 1),
            },
        )
        .unwrap();

        let cfg = BenchConfig {
            name: &full_name,
            set_name: bench_name,
            min_time_sec: time_min,
            soft_max_time_sec: time_soft_max,
            output_pipe,
            range_bits,
            sz,
        };

        let Some(b) = benchmarks.iter().find(|x| x.0 == bench_name) else {
            panic!("Unknown benchmark {}", bench_name);
        };
        b.1(&cfg);
        return;
    }

    let size_classes: Vec<u32> = (0..=26).collect();
    let is_list = matches.get_flag("list");
    if is_list {
        for c in size_classes.iter() {
            for range_bits in [16u32, 30u32] {
                for entry in benchmarks {
                    println!("{}_{}_{}", entry.0, range_bits, c);
                }
            }
        }
        return;
    }

    let is_bench = matches.get_flag("bench");
    if !is_bench {
        eprintln!("Running in test mode (without --bench) not yet supported");
        return;
    }

    let new_only = matches.get_flag("new");

    let exact = matches.get_flag("exact");
    let filters: Vec<&String> = matches
        .get_many::<String>("filters")
        .unwrap_or_default()
        .collect();

    let mut chosen_benches: Vec<(&'static str, u32, u32)> = Vec::new();
    for c in size_classes.iter() {
        for range_bits in [16u32, 30u32] {
            /* Leave room in the range for the miss probes */
            if *c >= range_bits {
                continue;
            }

            for entry in benchmarks {
                let name = format!("{}_{}_{}", entry.0, range_bits, c);
                let keep = if filters.is_empty() {
                    true
                } else {
                    if exact {
                        /* exact match with a filter */
                        filters.iter().any(|x| x.as_str() == name)
                    } else {
                        /* Substring match with a filter */
                        filters.iter().any(|x| name.contains(*x))
                    }
                };
                if keep {
                    chosen_benches.push((entry.0, range_bits, *c));
                }
            }
        }
    }

    let executable = std::env::current_exe().unwrap();

    let mut failed_benches = BTreeSet::new();

    let bench_time: String = chrono::Local::now().format("%Y-%m-%d-%H:%M:%S").to_string();
    let folder = "target/bench/";
    let archive_folder = String::from(folder) + &bench_time + "/";
    let output_folder = String::from(folder) + "main/";
    std::fs::create_dir_all(&archive_folder).unwrap();
    std::fs::create_dir_all(&output_folder).unwrap();

    for (name, range_bits, sz_class) in chosen_benches {
        if failed_benches.contains(&(name, range_bits)) {
            continue;
        }

        let full_name = format!("{}_{}_{}", name, range_bits, sz_class);
        let file_name = full_name.clone() + ".json";
        let current_path = std::path::PathBuf::from(output_folder.clone()).join(&file_name);
        if new_only && std::fs::exists(&current_path).unwrap() {
            continue;
        }

        let (pipe_r, pipe_w) = pipe::pipe_with(pipe::PipeFlags::CLOEXEC).unwrap();
        io::fcntl_setfd(&pipe_w, io::FdFlags::empty()).unwrap();
        let shared_fd = format!("{}", pipe_w.as_raw_fd());

        let bench_start_time = std::time::Instant::now();

        let mut handle = std::process::Command::new(&executable)
            .args(&["--run", &shared_fd, &full_name])
            .spawn()
            .unwrap();
        drop(pipe_w);

        /* todo: move time enforcement to this process */

        let mut output: Vec<u8> = Vec::new();
        let mut buf = [0; 4096];
        let mut clean_exit;
        loop {
            match io::read(&pipe_r, &mut buf) {
                Err(err) => match err {
                    io::Errno::AGAIN | io::Errno::INTR => {
                        continue;
                    }
                    io::Errno::CONNRESET | io::Errno::NOTCONN => {
                        clean_exit = true;
                        break;
                    }
                    _ => {
                        clean_exit = false;
                        break;
                    }
                },
                Ok(b) => {
                    if b == 0 {
                        clean_exit = true;
                        break;
                    }
                    output.extend_from_slice(&buf[..b]);
                }
            }
        }
        handle.wait().unwrap();
        drop(pipe_r);

        if let Some(l) = output.first_chunk::<4>() {
            let length = u32::from_le_bytes(*l) as usize;
            if output.len() != length + 4 {
                clean_exit = false;
            }
        } else {
            clean_exit = false;
        }

        let bench_end_time = std::time::Instant::now();

        if !clean_exit {
            println!(
                "Benchmark '{}' crashed or timed out after {} secs, skipping all others in the series",
                full_name,
                bench_end_time.duration_since(bench_start_time).as_secs_f64(),
            );
            failed_benches.insert((name, range_bits));
            // TODO: formalize and store timeout/crash results as JSON,
            // ideally distinguishing which failure mode occurred
            continue;
        }
        let validated_output = &output[4..];

        println!(
            "Benchmark '{}' completed after {} secs",
            full_name,
            bench_end_time
                .duration_since(bench_start_time)
                .as_secs_f64()
        );

        let archive_path = std::path::PathBuf::from(archive_folder.clone()).join(&file_name);
        let rel_archive_path = std::path::PathBuf::from("../")
            .join(&bench_time)
            .join(&file_name);

        let mut f = std::fs::File::create(&archive_path).unwrap();
        f.write(validated_output).unwrap();
        drop(f);

        let _ = std::fs::remove_file(&current_path);
        std::os::unix::fs::symlink(&rel_archive_path, &current_path).unwrap();
    }

    println!("Done.");
}
