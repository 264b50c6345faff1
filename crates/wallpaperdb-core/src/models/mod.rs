//! Domain models

pub mod wallpaper;

pub use wallpaper::{FileType, StatePatch, UploadState, Wallpaper, WallpaperId};
