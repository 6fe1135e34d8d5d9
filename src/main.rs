//! Multiscale Bridge - demo driver.
//!
//! Builds a synthetic series in memory, opens it twice through one registry
//! and reads every tile of every level from concurrent workers.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use multiscale_bridge::{
    BackendKind, Config, ImageRegistry, InMemoryHandleFactory, InMemorySource, SourceDescriptor,
    VirtualImage,
};

/// One tile request: timepoint, level, cell.
type Job = (u32, usize, [u64; 3]);

#[derive(Debug, Default)]
struct WorkerReport {
    tiles: u64,
    bytes: u64,
    failures: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    info!(
        width = config.width,
        height = config.height,
        depth = config.depth,
        timepoints = config.timepoints,
        cell = config.cell_size,
        workers = config.workers,
        "Building synthetic series"
    );

    let registry = ImageRegistry::new(config.image_config());
    let descriptor = SourceDescriptor::new(BackendKind::InMemory, "synthetic://demo");
    let factory = InMemoryHandleFactory::new();

    // Two openers of the same raw data share one pool and one cache
    let mut images = Vec::with_capacity(2);
    for _ in 0..2 {
        let source = match synthetic_source(&config) {
            Ok(source) => source,
            Err(e) => {
                error!("Failed to build synthetic series: {}", e);
                return ExitCode::FAILURE;
            }
        };
        match registry.open(&descriptor, source, factory.clone()).await {
            Ok(image) => images.push(Arc::new(image)),
            Err(e) => {
                error!("Failed to open image: {}", e);
                registry.shutdown().await;
                return ExitCode::FAILURE;
            }
        }
    }

    let jobs = all_tiles(&images[0]);
    info!(tiles = jobs.len(), levels = images[0].num_levels(), "Fetching tiles");

    let started = Instant::now();
    let report = run_workers(&images, jobs, config.workers).await;
    let elapsed = started.elapsed();

    if report.failures > 0 {
        warn!(failures = report.failures, "Some tiles failed");
    }

    let image = &images[0];
    let summary = serde_json::json!({
        "config": registry.config(),
        "key": image.raw_data_key().canonical(),
        "levels": (0..image.num_levels()).filter_map(|l| image.level_spec(l)).collect::<Vec<_>>(),
        "tiles": report.tiles,
        "bytes": report.bytes,
        "failures": report.failures,
        "elapsed_ms": elapsed.as_millis() as u64,
        "pool": image.pool_stats(),
        "cache": image.cache_stats(),
        "frame": image.coordinate_frame(),
        "handles_created": factory.created(),
    });

    for image in images {
        match Arc::try_unwrap(image) {
            Ok(image) => image.close().await,
            Err(_) => warn!("Image still shared at exit"),
        }
    }
    registry.shutdown().await;

    match serde_json::to_string_pretty(&summary) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            error!("Failed to serialize summary: {}", e);
            return ExitCode::FAILURE;
        }
    }

    if report.failures > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "multiscale_bridge=debug"
    } else {
        "multiscale_bridge=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// A gradient that varies along every axis so each level looks different.
fn synthetic_source(
    config: &Config,
) -> Result<InMemorySource, multiscale_bridge::SourceError> {
    InMemorySource::synthetic_u8(
        [config.width, config.height, config.depth],
        [config.cell_size, config.cell_size, 1],
        config.timepoints,
        |t, x, y, z| (x.wrapping_add(2 * y).wrapping_add(17 * z).wrapping_add(31 * t as u64)) as u8,
    )
}

/// Every (timepoint, level, cell) of the image.
fn all_tiles(image: &VirtualImage<InMemorySource>) -> Vec<Job> {
    let mut jobs = Vec::new();
    for level in 0..image.num_levels() {
        let Some(spec) = image.level_spec(level) else {
            continue;
        };
        let [gx, gy, gz] = spec.grid;
        for t in 0..image.num_timepoints() {
            for z in 0..gz {
                for y in 0..gy {
                    for x in 0..gx {
                        jobs.push((t, level, [x, y, z]));
                    }
                }
            }
        }
    }
    jobs
}

/// Spread the jobs round-robin over `workers` tasks, alternating images.
async fn run_workers(
    images: &[Arc<VirtualImage<InMemorySource>>],
    jobs: Vec<Job>,
    workers: usize,
) -> WorkerReport {
    let mut queues: Vec<Vec<Job>> = vec![Vec::new(); workers];
    for (i, job) in jobs.into_iter().enumerate() {
        queues[i % workers].push(job);
    }

    let handles: Vec<_> = queues
        .into_iter()
        .enumerate()
        .map(|(worker, queue)| {
            let image = images[worker % images.len()].clone();
            tokio::spawn(async move {
                let mut report = WorkerReport::default();
                for (t, level, cell) in queue {
                    match image.get_tile(t, level, cell).await {
                        Ok(tile) => {
                            report.tiles += 1;
                            report.bytes += tile.len() as u64;
                        }
                        Err(e) => {
                            warn!(t, level, ?cell, error = %e, "Tile failed");
                            report.failures += 1;
                        }
                    }
                }
                report
            })
        })
        .collect();

    let mut total = WorkerReport::default();
    for handle in handles {
        match handle.await {
            Ok(report) => {
                total.tiles += report.tiles;
                total.bytes += report.bytes;
                total.failures += report.failures;
            }
            Err(e) => {
                error!("Worker panicked: {}", e);
                total.failures += 1;
            }
        }
    }
    total
}
