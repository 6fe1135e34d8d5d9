//! Virtual images: the surface exposed to viewers and analysis code.
//!
//! ```text
//!   ImageRegistry::open(descriptor, source, factory)
//!        │
//!        ├── RawDataKey already live? ──► attach (openers += 1)
//!        │
//!        └── resolve frame, plan levels, build pool + pyramid cache
//!                 │
//!                 ▼
//!            VirtualImage ── get_tile ──► PyramidCache ──► ResourcePool ──► RawTileSource
//! ```

mod key;
mod registry;
mod virtual_image;

pub use key::{BackendKind, RawDataKey, SourceDescriptor};
pub use registry::ImageRegistry;
pub use virtual_image::VirtualImage;
