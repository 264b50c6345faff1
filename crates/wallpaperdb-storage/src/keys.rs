//! Storage key layout.
//!
//! Original bytes live at `<wallpaperId>/original.<ext>`. The first path
//! segment of any key is the owning wallpaper id, which is how the orphan
//! sweep maps objects back to metadata records.

use wallpaperdb_core::WallpaperId;

/// Key of the original upload for a wallpaper.
pub fn original_key(id: &WallpaperId, extension: &str) -> String {
    format!("{}/original.{}", id, extension)
}

/// The wallpaper id implied by a storage key, if its first path segment
/// parses as one.
pub fn wallpaper_id_for_key(key: &str) -> Option<WallpaperId> {
    let first = key.split('/').next()?;
    WallpaperId::parse(first).ok()
}
