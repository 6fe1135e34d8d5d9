//! In-memory backend: whole volumes held in RAM, read cell by cell.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

use crate::error::SourceError;
use crate::frame::CalibrationRecord;
use crate::pixel::PixelKind;
use crate::pyramid::CellRegion;

use super::{RawTileSource, ResourceFactory};

/// Handle type for [`InMemorySource`]; carries the id it was created with.
#[derive(Debug)]
pub struct InMemoryHandle {
    pub id: usize,
}

/// Factory for [`InMemoryHandle`]s that counts creations and destructions.
#[derive(Debug, Clone, Default)]
pub struct InMemoryHandleFactory {
    created: Arc<AtomicUsize>,
    destroyed: Arc<AtomicUsize>,
}

impl InMemoryHandleFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of handles created so far.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Number of handles destroyed so far.
    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceFactory for InMemoryHandleFactory {
    type Resource = InMemoryHandle;

    async fn create(&self) -> Result<InMemoryHandle, SourceError> {
        let id = self.created.fetch_add(1, Ordering::SeqCst);
        Ok(InMemoryHandle { id })
    }

    fn destroy(&self, _resource: InMemoryHandle) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

/// A series stored as one contiguous buffer per timepoint.
pub struct InMemorySource {
    dimensions: [u64; 3],
    cell_shape: [u32; 3],
    kind: PixelKind,
    volumes: Vec<Bytes>,
    calibration: CalibrationRecord,
    read_delay: Option<Duration>,
    reads: Arc<AtomicUsize>,
}

impl InMemorySource {
    /// Wrap per-timepoint volumes (X-fastest, little-endian samples).
    pub fn new(
        dimensions: [u64; 3],
        cell_shape: [u32; 3],
        kind: PixelKind,
        volumes: Vec<Vec<u8>>,
    ) -> Result<Self, SourceError> {
        let bpp = kind.bytes_per_pixel().ok_or_else(|| {
            SourceError::Decode(format!("pixel kind {:?} is not byte addressable", kind))
        })?;
        let expected = dimensions.iter().product::<u64>() as usize * bpp;

        if volumes.is_empty() {
            return Err(SourceError::Decode("no timepoints".to_string()));
        }
        for (t, volume) in volumes.iter().enumerate() {
            if volume.len() != expected {
                return Err(SourceError::Decode(format!(
                    "timepoint {} holds {} bytes, expected {}",
                    t,
                    volume.len(),
                    expected
                )));
            }
        }

        Ok(Self {
            dimensions,
            cell_shape,
            kind,
            volumes: volumes.into_iter().map(Bytes::from).collect(),
            calibration: CalibrationRecord::uncalibrated(dimensions),
            read_delay: None,
            reads: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// A `u8` series whose samples are computed by `f(t, x, y, z)`.
    pub fn synthetic_u8<F>(
        dimensions: [u64; 3],
        cell_shape: [u32; 3],
        timepoints: u32,
        f: F,
    ) -> Result<Self, SourceError>
    where
        F: Fn(u32, u64, u64, u64) -> u8,
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

        Self::new(dimensions, cell_shape, PixelKind::U8, volumes)
    }

    /// Replace the default (uncalibrated) record.
    pub fn with_calibration(mut self, calibration: CalibrationRecord) -> Self {
        self.calibration = calibration;
        self
    }

    /// Sleep for `delay` on every read, to simulate a slow decoder.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    /// Number of cells read so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Shared read counter, usable after the source is moved into an image.
    pub fn read_counter(&self) -> Arc<AtomicUsize> {
        self.reads.clone()
    }
}

#[async_trait]
impl RawTileSource for InMemorySource {
    type Handle = InMemoryHandle;

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
        self.kind
    }

    fn calibration(&self) -> CalibrationRecord {
        self.calibration.clone()
    }

    async fn read_tile(
        &self,
        _handle: &mut InMemoryHandle,
        timepoint: u32,
        region: &CellRegion,
    ) -> Result<Bytes, SourceError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }

        let volume = self
            .volumes
            .get(timepoint as usize)
            .ok_or_else(|| SourceError::NotFound(format!("timepoint {}", timepoint)))?;

        let bpp = self.kind.bytes_per_pixel().unwrap_or(1);
        let [w, h, _] = self.dimensions.map(|d| d as usize);
        let [x0, y0, z0] = region.min.map(|m| m as usize);
        let [sx, sy, sz] = region.size.map(|s| s as usize);

        let mut out = BytesMut::with_capacity(sx * sy * sz * bpp);
        for z in z0..z0 + sz {
            for y in y0..y0 + sy {
                let start = ((z * h + y) * w + x0) * bpp;
                let end = start + sx * bpp;
                let row = volume.get(start..end).ok_or_else(|| {
                    SourceError::Decode(format!("cell {:?} outside volume", region.cell))
                })?;
                out.extend_from_slice(row);
            }
        }

        Ok(out.freeze())
    }
}
