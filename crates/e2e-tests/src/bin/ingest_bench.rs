use std::collections::BTreeMap;
use std::time::Instant;

use chrono::Utc;
use clap::{Parser, ValueEnum};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use e2e_tests::{document_text, TestHarness, DIM};
use vault_engine::{CleanupOptions, OwnerScope, ReportType};
use vault_types::Chunk;

const DEFAULT_ITERATIONS: usize = 3;
const QUERIES_PER_ITERATION: usize = 50;

#[derive(Parser, Debug)]
#[command(name = "ingest_bench", about = "Knowledge vault ingestion benchmark harness")]
struct Args {
    #[arg(long, value_enum, default_value = "small")]
    tier: DatasetTier,
    #[arg(long, default_value_t = DEFAULT_ITERATIONS)]
    iterations: usize,
    /// Fraction of chunks that repeat earlier content
    #[arg(long, default_value_t = 0.3)]
    duplicate_fraction: f64,
    #[arg(long, default_value_t = 42)]
    seed: u64,
    /// Also print the final optimization report
    #[arg(long)]
    report: bool,
}

#[derive(Clone, Copy, Debug, Serialize, ValueEnum, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum DatasetTier {
    Small,
    Medium,
}

impl DatasetTier {
    /// (owners, chunks per owner)
    fn shape(&self) -> (usize, usize) {
        match self {
            DatasetTier::Small => (20, 10),
            DatasetTier::Medium => (100, 25),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
struct StepMetrics {
    p50_ms: f64,
    p90_ms: f64,
    p99_ms: f64,
    samples: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    throughput_cps: Option<f64>,
}

#[derive(Debug, Serialize)]
struct BenchmarkOutput {
    tier: DatasetTier,
    iterations: usize,
    duplicate_fraction: f64,
    generated_at: String,
    steps: BTreeMap<String, StepMetrics>,
    duplicates_detected: u64,
    average_compression_ratio: f64,
    entries_reclaimed: u64,
}

#[derive(Default)]
struct SampleCollector {
    samples: BTreeMap<&'static str, Vec<f64>>,
    chunks_ingested: u64,
    ingest_ms: f64,
}

impl SampleCollector {
    fn record(&mut self, step: &'static str, ms: f64) {
        self.samples.entry(step).or_default().push(ms);
    }
}

fn random_vector(rng: &mut StdRng) -> Vec<f32> {
    (0..DIM).map(|_| rng.random_range(-1.0f32..1.0)).collect()
}

/// One batch per owner; a share of chunks reuse content seen earlier.
fn build_dataset(rng: &mut StdRng, tier: DatasetTier, duplicate_fraction: f64) -> Vec<(String, Vec<Chunk>)> {
    let (owners, per_owner) = tier.shape();
    let mut seen: Vec<usize> = Vec::new();
    let mut next_seed = 0usize;
    (0..owners)
        .map(|owner| {
            let chunks = (0..per_owner)
                .map(|_| {
                    let seed = if !seen.is_empty() && rng.random_bool(duplicate_fraction) {
                        seen[rng.random_range(0..seen.len())]
                    } else {
                        next_seed += 1;
                        seen.push(next_seed);
                        next_seed
                    };
                    let mut vector_rng = StdRng::seed_from_u64(seed as u64);
                    Chunk::new(document_text(seed), random_vector(&mut vector_rng))
                })
                .collect();
            (format!("bench-{}", owner), chunks)
        })
        .collect()
}

fn percentile(values: &[f64], percentile: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let rank = (percentile / 100.0) * (values.len() as f64 - 1.0);
    let low = rank.floor() as usize;
    let high = rank.ceil() as usize;
    if low == high {
        values[low]
    } else {
        let weight = rank - low as f64;
        values[low] + (values[high] - values[low]) * weight
    }
}

fn summarize(samples: &[f64], throughput_cps: Option<f64>) -> StepMetrics {
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    StepMetrics {
        p50_ms: percentile(&sorted, 50.0),
        p90_ms: percentile(&sorted, 90.0),
        p99_ms: percentile(&sorted, 99.0),
        samples: sorted.len(),
        throughput_cps,
    }
}

fn render_table(output: &BenchmarkOutput) -> String {
    let mut lines = vec![
        format!(
            "Benchmark Results (tier={:?}, iterations={}, duplicates={:.0}%)",
            output.tier,
            output.iterations,
            output.duplicate_fraction * 100.0
        ),
        "step\tp50_ms\tp90_ms\tp99_ms\tthroughput_cps".to_string(),
    ];
    for (step, metrics) in &output.steps {
        lines.push(format!(
            "{}\t{:.2}\t{:.2}\t{:.2}\t{}",
            step,
            metrics.p50_ms,
            metrics.p90_ms,
            metrics.p99_ms,
            metrics
                .throughput_cps
                .map(|t| format!("{:.1}", t))
                .unwrap_or_else(|| "-".to_string())
        ));
    }
    lines.join("\n")
}

#[tokio::main]
async fn main() -> Result<(), String> {
    let args = Args::parse();
    if !(0.0..=1.0).contains(&args.duplicate_fraction) {
        return Err("--duplicate-fraction must be within 0..=1".to_string());
    }

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut collector = SampleCollector::default();
    let mut duplicates_detected = 0;
    let mut ratio_sum = 0.0;
    let mut ratio_batches = 0u64;
    let mut entries_reclaimed = 0;
    let mut last_report = None;

    for iteration in 0..args.iterations {
        let harness = TestHarness::new();
        let dataset = build_dataset(&mut rng, args.tier, args.duplicate_fraction);

        for (owner, chunks) in dataset {
            if cancel.is_cancelled() {
                return Err("interrupted".to_string());
            }
            harness.owners.register(owner.as_str());
            let start = Instant::now();
            let result = harness
                .vault
                .ingest_with_cancel(&owner, chunks, &cancel)
                .await
                .map_err(|e| format!("ingest failed: {e}"))?;
            let ms = start.elapsed().as_secs_f64() * 1000.0;
            collector.record("ingest_batch", ms);
            collector.chunks_ingested += result.processed;
            collector.ingest_ms += ms;
            duplicates_detected += result.duplicates_detected;
            if result.storage_result.new_entries > 0 {
                ratio_sum += result.storage_result.average_compression_ratio;
                ratio_batches += 1;
            }
        }

        for _ in 0..QUERIES_PER_ITERATION {
            let vector = random_vector(&mut rng);
            let start = Instant::now();
            harness
                .vault
                .query(OwnerScope::All, vector, 10)
                .await
                .map_err(|e| format!("query failed: {e}"))?;
            collector.record("query_top10", start.elapsed().as_secs_f64() * 1000.0);
        }

        let start = Instant::now();
        harness
            .vault
            .reclassify()
            .await
            .map_err(|e| format!("reclassify failed: {e}"))?;
        collector.record("reclassify", start.elapsed().as_secs_f64() * 1000.0);

        // Retire half the owners, then sweep
        let (owners, _) = args.tier.shape();
        for owner in (0..owners).step_by(2) {
            harness.owners.remove(&format!("bench-{}", owner));
        }
        let start = Instant::now();
        let cleanup = harness
            .vault
            .cleanup(CleanupOptions::default())
            .await
            .map_err(|e| format!("cleanup failed: {e}"))?;
        collector.record("cleanup", start.elapsed().as_secs_f64() * 1000.0);
        entries_reclaimed += cleanup.entries_deleted;

        if args.report && iteration + 1 == args.iterations {
            last_report = Some(
                harness
                    .vault
                    .optimization_report(ReportType::Full)
                    .await
                    .map_err(|e| format!("report failed: {e}"))?,
            );
        }
    }

    let ingest_throughput = if collector.ingest_ms > 0.0 {
        Some(collector.chunks_ingested as f64 / (collector.ingest_ms / 1000.0))
    } else {
        None
    };
    let steps = collector
        .samples
        .iter()
        .map(|(step, samples)| {
            let throughput = (*step == "ingest_batch").then_some(ingest_throughput).flatten();
            (step.to_string(), summarize(samples, throughput))
        })
        .collect();

    let output = BenchmarkOutput {
        tier: args.tier,
        iterations: args.iterations,
        duplicate_fraction: args.duplicate_fraction,
        generated_at: Utc::now().to_rfc3339(),
        steps,
        duplicates_detected,
        average_compression_ratio: if ratio_batches == 0 {
            1.0
        } else {
            ratio_sum / ratio_batches as f64
        },
        entries_reclaimed,
    };

    eprintln!("{}", render_table(&output));
    let json = serde_json::to_string_pretty(&output).map_err(|e| format!("serialize: {e}"))?;
    println!("{json}");
    if let Some(report) = last_report {
        let json = serde_json::to_string_pretty(&report).map_err(|e| format!("serialize: {e}"))?;
        println!("{json}");
    }
    Ok(())
}
