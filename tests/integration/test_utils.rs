//! Test utilities for integration tests.
//!
//! This module provides a tracking `u16` backend and a counting handle factory
//! so tests can observe how many decodes and handle creations happen.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use multiscale_bridge::{
    BackendKind, CalibrationRecord, CellRegion, FrameCorrection, ImageConfig, PixelKind,
    RawTileSource, ResourceFactory, SourceDescriptor, SourceError,
};

// =============================================================================
// Tracking Source
// =============================================================================

/// A `u16` series generated from a function, recording every read.
pub struct TrackingSource {
    dimensions: [u64; 3],
    cell_shape: [u32; 3],
    volumes: Vec<Vec<u16>>,
    calibration: CalibrationRecord,
    correction: FrameCorrection,
    delay: Option<Duration>,
    reads: Arc<RwLock<Vec<(u32, [u64; 3])>>>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

impl TrackingSource {
    pub fn new<F>(dimensions: [u64; 3], cell_shape: [u32; 3], timepoints: u32, f: F) -> Self
    where
        F: Fn(u32, u64, u64, u64) -> u16,
    {
        let [w, h, d] = dimensions;
        let volumes = (0..timepoints)
            .map(|t| {
                let mut volume = Vec::with_capacity((w * h * d) as usize);
                for z in 0..d {
                    for y in 0..h {
                        for x in 0..w {
                            volume.push(f(t, x, y, z));
                        }
                    }
                }
                volume
            })
            .collect();

        Self {
            dimensions,
            cell_shape,
            volumes,
            calibration: CalibrationRecord::uncalibrated(dimensions),
            correction: FrameCorrection::default(),
            delay: None,
            reads: Arc::new(RwLock::new(Vec::new())),
            active: Arc::new(AtomicUsize::new(0)),
            max_active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_calibration(mut self, calibration: CalibrationRecord) -> Self {
        self.calibration = calibration;
        self
    }

    pub fn with_correction(mut self, correction: FrameCorrection) -> Self {
        self.correction = correction;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Shared view of the read log, usable after the source is moved.
    pub fn tracker(&self) -> ReadTracker {
        ReadTracker {
            reads: Arc::clone(&self.reads),
            max_active: Arc::clone(&self.max_active),
        }
    }

    /// Sample at a level-0 position.
    pub fn sample(&self, t: u32, x: u64, y: u64, z: u64) -> u16 {
        let [w, h, _] = self.dimensions;
        self.volumes[t as usize][((z * h + y) * w + x) as usize]
    }
}

/// Read statistics of a [`TrackingSource`].
#[derive(Clone)]
pub struct ReadTracker {
    reads: Arc<RwLock<Vec<(u32, [u64; 3])>>>,
    max_active: Arc<AtomicUsize>,
}

impl ReadTracker {
    pub async fn reads(&self) -> Vec<(u32, [u64; 3])> {
        self.reads.read().await.clone()
    }

    pub async fn read_count(&self) -> usize {
        self.reads.read().await.len()
    }

    /// Highest number of reads that were in progress at once.
    pub fn max_concurrent_reads(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

/// Handle type for [`TrackingSource`].
#[derive(Debug)]
pub struct TrackedHandle {
    pub id: usize,
}

#[async_trait]
impl RawTileSource for TrackingSource {
    type Handle = TrackedHandle;

    fn series_dimensions(&self) -> [u64; 3] {
        self.dimensions
    }

    fn num_timepoints(&self) -> u32 {
        self.volumes.len() as u32
    }

    fn cell_shape(&self) -> [u32; 3] {
        self.cell_shape
    }

    fn pixel_kind(&self) -> PixelKind {
        PixelKind::U16
    }

    fn calibration(&self) -> CalibrationRecord {
        self.calibration.clone()
    }

    fn frame_correction(&self) -> FrameCorrection {
        self.correction
    }

    async fn read_tile(
        &self,
        _handle: &mut TrackedHandle,
        timepoint: u32,
        region: &CellRegion,
    ) -> Result<Bytes, SourceError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        self.reads.write().await.push((timepoint, region.cell));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut out = Vec::with_capacity(region.num_pixels() * 2);
        for z in 0..region.size[2] as u64 {
            for y in 0..region.size[1] as u64 {
                for x in 0..region.size[0] as u64 {
                    let value = self.sample(
                        timepoint,
                        region.min[0] + x,
                        region.min[1] + y,
                        region.min[2] + z,
                    );
                    out.extend_from_slice(&value.to_le_bytes());
                }
            }
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(Bytes::from(out))
    }
}

// =============================================================================
// Counting Factory
// =============================================================================

/// A handle factory that counts creations and destructions, optionally slowly.
#[derive(Clone, Default)]
pub struct CountingFactory {
    created: Arc<AtomicUsize>,
    destroyed: Arc<AtomicUsize>,
    delay: Option<Duration>,
}

impl CountingFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceFactory for CountingFactory {
    type Resource = TrackedHandle;

    async fn create(&self) -> Result<TrackedHandle, SourceError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let id = self.created.fetch_add(1, Ordering::SeqCst);
        Ok(TrackedHandle { id })
    }

    fn destroy(&self, _resource: TrackedHandle) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Descriptor for a file-backed series at `location`.
pub fn descriptor(location: &str) -> SourceDescriptor {
    SourceDescriptor::new(BackendKind::BioFormats, location)
}

/// A small-image configuration: levels down to 8 pixels.
pub fn small_config(pool_size: usize) -> ImageConfig {
    ImageConfig {
        pool_size,
        min_level_size: 8,
        ..ImageConfig::default()
    }
}

/// Decode a little-endian `u16` tile buffer.
pub fn u16_samples(data: &[u8]) -> Vec<u16> {
    data.chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect()
}

/// Downsample a whole `u16` plane stack the slow, obvious way.
pub fn reference_downsample(values: &[u16], dims: [u64; 3]) -> (Vec<u16>, [u64; 3]) {
    let [w, h, d] = dims;
    let (nw, nh) = (w.div_ceil(2), h.div_ceil(2));
    let at = |x: u64, y: u64, z: u64| values[((z * h + y.min(h - 1)) * w + x.min(w - 1)) as usize] as u32;

    let mut out = Vec::with_capacity((nw * nh * d) as usize);
    for z in 0..d {
        for y in 0..nh {
            for x in 0..nw {
                let sum = at(2 * x, 2 * y, z)
                    + at(2 * x + 1, 2 * y, z)
                    + at(2 * x, 2 * y + 1, z)
                    + at(2 * x + 1, 2 * y + 1, z);
                out.push((sum / 4) as u16);
            }
        }
    }
    (out, [nw, nh, d])
}
