//! Pixel kinds and the 2×2 box-filter used to synthesize pyramid levels.
//!
//! Tile buffers are stored as little-endian samples in X-fastest order
//! (then Y, then Z). Packed ARGB pixels occupy one little-endian `u32` each,
//! with alpha in the high byte.
//!
//! # Rounding
//!
//! The averaging rule is fixed per kind and must be reproduced bit-for-bit:
//!
//! | Kind                  | Rule                                         |
//! |-----------------------|----------------------------------------------|
//! | unsigned integers     | `(a + b + c + d) / 4` in `u64`, truncated     |
//! | signed integers       | `(a + b + c + d) / 4` in `i64`, toward zero   |
//! | packed ARGB           | each 8-bit channel averaged as unsigned       |
//! | `f32` / `f64`         | `(a + b + c + d) / 4` in native precision     |

use serde::Serialize;

use crate::error::TileError;

// =============================================================================
// Pixel Kind
// =============================================================================

/// Numeric kind of a series' pixels, as declared by its backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelKind {
    /// 1-bit mask data (not downsampled)
    Bit,
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
    F64,
    /// Packed 8-bit-per-channel ARGB in a `u32`
    Argb8,
    /// Interleaved complex `f32` pairs (not downsampled)
    Complex32,
}

impl PixelKind {
    /// Size of one pixel in bytes, or `None` for kinds that are not byte-addressable.
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self {
            PixelKind::Bit => None,
            PixelKind::U8 | PixelKind::I8 => Some(1),
            PixelKind::U16 | PixelKind::I16 => Some(2),
            PixelKind::U32 | PixelKind::I32 | PixelKind::F32 | PixelKind::Argb8 => Some(4),
            PixelKind::F64 | PixelKind::Complex32 => Some(8),
        }
    }

    /// Whether the box filter can synthesize lower resolutions of this kind.
    pub fn is_downsamplable(&self) -> bool {
        !matches!(self, PixelKind::Bit | PixelKind::Complex32)
    }

    /// Bytes per pixel for kinds the tile pipeline can carry.
    pub(crate) fn checked_bytes_per_pixel(&self) -> Result<usize, TileError> {
        match self.bytes_per_pixel() {
            Some(bpp) if self.is_downsamplable() => Ok(bpp),
            _ => Err(TileError::UnsupportedPixelKind(*self)),
        }
    }
}

// =============================================================================
// Sample Trait
// =============================================================================

/// A pixel sample that can be read, written and box-averaged.
trait Sample: Copy {
    const SIZE: usize;

    fn read(bytes: &[u8]) -> Self;

    fn write(self, out: &mut [u8]);

    fn average4(a: Self, b: Self, c: Self, d: Self) -> Self;
}

macro_rules! impl_integer_sample {
    ($t:ty, $wide:ty) => {
        impl Sample for $t {
            const SIZE: usize = std::mem::size_of::<$t>();

            #[inline]
            fn read(bytes: &[u8]) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$t>()];
                buf.copy_from_slice(&bytes[..Self::SIZE]);
                <$t>::from_le_bytes(buf)
            }

            #[inline]
            fn write(self, out: &mut [u8]) {
                out[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
            }

            #[inline]
            fn average4(a: Self, b: Self, c: Self, d: Self) -> Self {
                let sum = a as $wide + b as $wide + c as $wide + d as $wide;
                (sum / 4) as $t
            }
        }
    };
}

impl_integer_sample!(u8, u64);
impl_integer_sample!(u16, u64);
impl_integer_sample!(u32, u64);
impl_integer_sample!(i8, i64);
impl_integer_sample!(i16, i64);
impl_integer_sample!(i32, i64);

macro_rules! impl_float_sample {
    ($t:ty) => {
        impl Sample for $t {
            const SIZE: usize = std::mem::size_of::<$t>();

            #[inline]
            fn read(bytes: &[u8]) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$t>()];
                buf.copy_from_slice(&bytes[..Self::SIZE]);
                <$t>::from_le_bytes(buf)
            }

            #[inline]
            fn write(self, out: &mut [u8]) {
                out[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
            }

            #[inline]
            fn average4(a: Self, b: Self, c: Self, d: Self) -> Self {
                (a + b + c + d) / 4.0
            }
        }
    };
}

impl_float_sample!(f32);
impl_float_sample!(f64);

/// Packed ARGB pixel, averaged per channel.
#[derive(Clone, Copy)]
struct Argb(u32);

impl Sample for Argb {
    const SIZE: usize = 4;

    #[inline]
    fn read(bytes: &[u8]) -> Self {
        Argb(u32::read(bytes))
    }

    #[inline]
    fn write(self, out: &mut [u8]) {
        self.0.write(out)
    }

    #[inline]
    fn average4(a: Self, b: Self, c: Self, d: Self) -> Self {
        let channel = |shift: u32| {
            let sum = ((a.0 >> shift) & 0xFF)
                + ((b.0 >> shift) & 0xFF)
                + ((c.0 >> shift) & 0xFF)
                + ((d.0 >> shift) & 0xFF);
            (sum / 4) << shift
        };
        Argb(channel(24) | channel(16) | channel(8) | channel(0))
    }
}

// =============================================================================
// Box Filter
// =============================================================================

/// Output dimensions of a 2× downsample in X and Y. Z is kept.
pub fn downsampled_dims(dims: [usize; 3]) -> [usize; 3] {
    [dims[0].div_ceil(2), dims[1].div_ceil(2), dims[2]]
}

/// Downsample a buffer by 2 in X and Y using a 2×2 box filter.
///
/// Samples at `2x+1` / `2y+1` beyond the last column or row are replaced by
/// the border sample, so odd-sized inputs produce `ceil(n / 2)` outputs.
pub fn downsample_2x(kind: PixelKind, src: &[u8], dims: [usize; 3]) -> Result<Vec<u8>, TileError> {
    let bpp = kind.checked_bytes_per_pixel()?;
    let expected = dims[0] * dims[1] * dims[2] * bpp;
    if src.len() != expected {
        return Err(TileError::BufferSize {
            expected,
            actual: src.len(),
        });
    }

    let out = match kind {
        PixelKind::U8 => downsample_typed::<u8>(src, dims),
        PixelKind::I8 => downsample_typed::<i8>(src, dims),
        PixelKind::U16 => downsample_typed::<u16>(src, dims),
        PixelKind::I16 => downsample_typed::<i16>(src, dims),
        PixelKind::U32 => downsample_typed::<u32>(src, dims),
        PixelKind::I32 => downsample_typed::<i32>(src, dims),
        PixelKind::F32 => downsample_typed::<f32>(src, dims),
        PixelKind::F64 => downsample_typed::<f64>(src, dims),
        PixelKind::Argb8 => downsample_typed::<Argb>(src, dims),
        PixelKind::Bit | PixelKind::Complex32 => {
            return Err(TileError::UnsupportedPixelKind(kind))
        }
    };

    Ok(out)
}

fn downsample_typed<T: Sample>(src: &[u8], dims: [usize; 3]) -> Vec<u8> {
    let [w, h, d] = dims;
    let [ow, oh, _] = downsampled_dims(dims);
    let mut out = vec![0u8; ow * oh * d * T::SIZE];

    if w == 0 || h == 0 {
        return out;
    }

    let at = |x: usize, y: usize, z: usize| {
        let offset = ((z * h + y) * w + x) * T::SIZE;
        T::read(&src[offset..])
    };

    for z in 0..d {
        for y in 0..oh {
            let y0 = 2 * y;
            let y1 = (y0 + 1).min(h - 1);
            for x in 0..ow {
                let x0 = 2 * x;
                let x1 = (x0 + 1).min(w - 1);
                let value = T::average4(at(x0, y0, z), at(x1, y0, z), at(x0, y1, z), at(x1, y1, z));
                let offset = ((z * oh + y) * ow + x) * T::SIZE;
                value.write(&mut out[offset..]);
            }
        }
    }

    out
}

// =============================================================================
// Tests
// =============================================================================
