//! Scanline streaming of not-yet-cached images.

use pix_cache::decode::ColorMode;
use pix_cache::{CacheError, DrawStyle, ImageSource};

use super::test_utils::{manager, rle_container, write_alpha_container};

#[test]
fn stream_lines_then_complete_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_alpha_container(dir.path(), "photo.pxi", 64, 32, 0x7E);
    let source = ImageSource::path(path);

    let cache = manager(4);

    // Header first: the view can be laid out before any pixels exist.
    let header = cache.open_streaming(&source, DrawStyle::default()).unwrap();
    assert_eq!((header.width, header.height), (64, 32));
    assert_eq!(cache.memory_used(), 0);

    // Draw a few rows straight off the stream.
    let mut row = vec![0u8; 64];
    for y in [0u16, 15, 31] {
        cache.read_line(&source, y, 64, &mut row).unwrap();
        assert!(row.iter().all(|&b| b == 0x7E));
    }

    // A later open completes the decode into the same slot; afterwards
    // line reads come from the cached buffer.
    let info = cache.open(&source, DrawStyle::default()).unwrap();
    assert_eq!(info.pixels.len(), 64 * 32);
    cache.read_line(&source, 31, 64, &mut row).unwrap();
    assert!(row.iter().all(|&b| b == 0x7E));
}

#[test]
fn read_line_from_cached_buffer_matches_decode() {
    let cache = manager(4);
    let source = ImageSource::memory(1, rle_container(8, 4, ColorMode::Alpha8, 0x33));

    let info = cache.open(&source, DrawStyle::default()).unwrap();
    assert_eq!(info.pixels.len(), 32);

    let mut row = [0u8; 8];
    cache.read_line(&source, 3, 8, &mut row).unwrap();
    assert_eq!(row, [0x33; 8]);
}

#[test]
fn streaming_a_compressed_source_refuses_line_reads() {
    let cache = manager(4);
    let source = ImageSource::memory(2, rle_container(8, 8, ColorMode::Alpha8, 0x11));

    cache.open_streaming(&source, DrawStyle::default()).unwrap();

    // Run streams have no random access; the caller falls back to a full
    // decode instead.
    let mut row = [0u8; 8];
    assert!(matches!(
        cache.read_line(&source, 0, 8, &mut row),
        Err(CacheError::Format(_))
    ));

    let info = cache.open(&source, DrawStyle::default()).unwrap();
    assert_eq!(info.pixels.len(), 64);
}

#[test]
fn read_line_without_binding_is_not_ready() {
    let cache = manager(4);
    let mut row = [0u8; 4];
    assert!(matches!(
        cache.read_line(&ImageSource::memory(5, vec![]), 0, 4, &mut row),
        Err(CacheError::NotReady(_))
    ));
}

#[test]
fn out_of_bounds_line_reads_fail_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_alpha_container(dir.path(), "small.pxi", 8, 4, 1);
    let source = ImageSource::path(path);

    let cache = manager(4);
    cache.open_streaming(&source, DrawStyle::default()).unwrap();

    let mut row = [0u8; 16];
    assert!(cache.read_line(&source, 4, 8, &mut row).is_err());
    assert!(cache.read_line(&source, 0, 9, &mut row).is_err());
    // A valid read still works afterwards.
    assert!(cache.read_line(&source, 3, 8, &mut row).is_ok());
}
