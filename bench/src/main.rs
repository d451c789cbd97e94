use reclaim::workload::{self, StressOptions};
use reclaim::{Runtime, RuntimeConfig};
use serde::Serialize;
use std::time::Instant;

#[derive(Serialize)]
struct BenchmarkResult {
    name: String,
    initial_threshold: usize,
    wall_secs: f64,
    cycles: usize,
    total_pause_us: u64,
    max_pause_us: u64,
    freed: usize,
    live_blocks: usize,
}

#[derive(Serialize)]
struct BenchmarkOutput {
    results: Vec<BenchmarkResult>,
}

fn run_workload(name: &str, initial_threshold: usize, opts: &StressOptions) -> Option<BenchmarkResult> {
    let config = RuntimeConfig {
        initial_threshold,
        ..Default::default()
    };
    let start = Instant::now();
    let outcome = Runtime::with_config(config).and_then(|mut rt| {
        let report = workload::run_stress(&mut rt, opts)?;
        rt.close()?;
        Ok(report)
    });
    let elapsed = start.elapsed().as_secs_f64();
    match outcome {
        Ok(report) => Some(BenchmarkResult {
            name: name.to_string(),
            initial_threshold,
            wall_secs: elapsed,
            cycles: report.gc.cycles,
            total_pause_us: report.gc.total_pause_us,
            max_pause_us: report.gc.max_pause_us,
            freed: report.gc.total_freed.total(),
            live_blocks: report.blocks,
        }),
        Err(e) => {
            eprintln!("Workload {} (threshold={}) failed: {}", name, initial_threshold, e);
            None
        }
    }
}

fn main() {
    let workloads = [
        ("small", StressOptions::default()),
        (
            "table_heavy",
            StressOptions {
                rounds: 20,
                tables: 2_000,
                strings: 100,
                userdata: 10,
                ..StressOptions::default()
            },
        ),
        (
            "string_heavy",
            StressOptions {
                rounds: 20,
                tables: 100,
                strings: 5_000,
                userdata: 10,
                ..StressOptions::default()
            },
        ),
        (
            "userdata_heavy",
            StressOptions {
                rounds: 20,
                tables: 100,
                strings: 100,
                userdata: 2_000,
                ..StressOptions::default()
            },
        ),
    ];

    let mut results = Vec::new();
    for (name, opts) in &workloads {
        for threshold in [16 * 1024, 64 * 1024, 1024 * 1024] {
            results.extend(run_workload(name, threshold, opts));
        }
    }

    let output = BenchmarkOutput { results };
    match serde_json::to_string_pretty(&output) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("failed to serialize results: {}", e),
    }
}
