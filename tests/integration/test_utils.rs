//! Shared fixtures: container files and configured managers.

use std::fs;
use std::path::{Path, PathBuf};

use pix_cache::decode::{encode_runs, ColorMode, ImageHeader};
use pix_cache::{CacheConfig, CacheManager, ImageSource};

/// Bytes of a raw (uncompressed) container filled with `fill`.
pub fn raw_container(width: u16, height: u16, mode: ColorMode, fill: u8) -> Vec<u8> {
    let header = ImageHeader {
        width,
        height,
        color_mode: mode,
        compressed: false,
    };
    let mut bytes = header.encode().to_vec();
    bytes.extend(std::iter::repeat(fill).take(header.pixel_data_size()));
    bytes
}

/// Bytes of an RLE container whose decoded payload is `fill` everywhere.
pub fn rle_container(width: u16, height: u16, mode: ColorMode, fill: u8) -> Vec<u8> {
    let header = ImageHeader {
        width,
        height,
        color_mode: mode,
        compressed: true,
    };
    let pixels = vec![fill; header.pixel_data_size()];
    let mut bytes = header.encode().to_vec();
    bytes.extend_from_slice(&encode_runs(&pixels));
    bytes
}

/// Write a raw Alpha8 container file and return its path.
pub fn write_alpha_container(dir: &Path, name: &str, width: u16, height: u16, fill: u8) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, raw_container(width, height, ColorMode::Alpha8, fill)).unwrap();
    path
}

/// An in-memory 4x4 Alpha8 source whose id doubles as its fill byte.
pub fn mem_source(id: u32) -> ImageSource {
    ImageSource::memory(id, raw_container(4, 4, ColorMode::Alpha8, id as u8))
}

/// A manager with the given capacity and otherwise default settings.
pub fn manager(capacity: u16) -> CacheManager {
    CacheManager::new(CacheConfig::new(capacity)).unwrap()
}
