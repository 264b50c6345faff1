//! Object storage port for wallpaper bytes.
//!
//! All backends implement the [`ObjectStorage`] trait. Keys follow the
//! layout `<wallpaperId>/original.<ext>` for originals and
//! `<wallpaperId>/variant_<W>x<H>.<ext>` for variants written by the
//! downstream variant worker.

pub mod keys;
pub mod memory;
pub mod s3;
pub mod traits;

pub use keys::{original_key, wallpaper_id_for_key};
pub use memory::MemoryStorage;
pub use s3::S3Storage;
pub use traits::{ObjectEntry, ObjectStorage, StorageError, StorageResult};
