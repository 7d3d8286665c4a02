//! Lookup, eviction and recovery scenarios.

use pix_cache::decode::ColorMode;
use pix_cache::{
    CacheConfig, CacheError, CacheManager, DrawStyle, ImageSource, MAX_CACHE_ENTRIES,
};

use super::test_utils::{manager, mem_source, raw_container, write_alpha_container};

#[test]
fn init_rejects_out_of_range_capacities() {
    assert!(matches!(
        CacheManager::new(CacheConfig::new(0)),
        Err(CacheError::Capacity { .. })
    ));
    assert!(matches!(
        CacheManager::new(CacheConfig::new(MAX_CACHE_ENTRIES + 1)),
        Err(CacheError::Capacity { .. })
    ));

    // A valid capacity opens straight away: no NotReady on the synchronous
    // decode path.
    let cache = manager(8);
    let result = cache.open(&mem_source(1), DrawStyle::default());
    assert!(result.is_ok());
}

#[test]
fn fifth_open_evicts_the_first_of_four() {
    let dir = tempfile::tempdir().unwrap();
    let sources: Vec<ImageSource> = (1..=5)
        .map(|i| {
            ImageSource::path(write_alpha_container(
                dir.path(),
                &format!("s{i}.pxi"),
                4,
                4,
                i as u8,
            ))
        })
        .collect();

    let cache = manager(4);
    for source in &sources {
        cache.open(source, DrawStyle::default()).unwrap();
    }

    // All recency scores were equal at creation, so pool-index order broke
    // the tie: the first source lost its slot, the rest survived.
    assert!(cache.slot_status(&sources[0]).is_none());
    for source in &sources[1..] {
        let status = cache.slot_status(source).unwrap();
        assert!(status.fully_loaded);
    }
}

#[test]
fn repeated_opens_return_one_buffer() {
    let cache = manager(4);
    let source = mem_source(1);

    let first = cache.open(&source, DrawStyle::default()).unwrap();
    let second = cache.open(&source, DrawStyle::default()).unwrap();
    let third = cache.open(&source, DrawStyle::default()).unwrap();

    // One decode: every open shares the same allocation.
    assert_eq!(first.pixels.as_ptr(), second.pixels.as_ptr());
    assert_eq!(second.pixels.as_ptr(), third.pixels.as_ptr());
    assert_eq!(cache.memory_used(), first.pixels.len());
}

#[test]
fn decoded_size_matches_header_for_every_mode() {
    let cache = manager(8);
    for (id, mode, bpp) in [
        (1u32, ColorMode::Argb8888, 4usize),
        (2, ColorMode::Rgb888, 3),
        (3, ColorMode::Rgb565, 2),
        (4, ColorMode::Alpha8, 1),
    ] {
        let source = ImageSource::memory(id, raw_container(6, 5, mode, 0x42));
        let info = cache.open(&source, DrawStyle::default()).unwrap();
        assert_eq!(info.pixels.len(), 6 * 5 * bpp);
        assert_eq!(info.header.pixel_data_size(), info.pixels.len());
    }
}

#[test]
fn close_is_idempotent_and_isolated() {
    let cache = manager(4);
    let a = mem_source(1);
    let b = mem_source(2);

    cache.open(&a, DrawStyle::default()).unwrap();
    let b_info = cache.open(&b, DrawStyle::default()).unwrap();

    assert!(cache.close(&a));
    assert!(cache.close(&a));
    assert!(cache.close(&mem_source(99)));

    // `b` is untouched: same buffer, still bound.
    let b_again = cache.open(&b, DrawStyle::default()).unwrap();
    assert_eq!(b_info.pixels.as_ptr(), b_again.pixels.as_ptr());
}

#[test]
fn oom_prunes_one_slot_then_succeeds() {
    let config = CacheConfig {
        capacity: 4,
        memory_limit: Some(24),
        ..CacheConfig::default()
    };
    let cache = CacheManager::new(config).unwrap();

    let a = mem_source(1);
    let b = mem_source(2);
    cache.open(&a, DrawStyle::default()).unwrap();

    // A second 16-byte decode cannot fit in 24 bytes; the cache frees
    // exactly one slot (a) and retries.
    cache.open(&b, DrawStyle::default()).unwrap();
    assert!(cache.slot_status(&a).is_none());
    assert!(cache.slot_status(&b).unwrap().fully_loaded);
}

#[test]
fn oom_with_no_evictable_slot_surfaces() {
    let dir = tempfile::tempdir().unwrap();
    let boot_res = write_alpha_container(dir.path(), "boot.pxi", 4, 4, 1);
    let manifest = dir.path().join("boot.txt");
    std::fs::write(&manifest, "boot.pxi\n").unwrap();

    let mut config = CacheConfig::new(4);
    config.memory_limit = Some(24);
    config.preload.boot_manifest = Some(manifest);
    let cache = CacheManager::new(config).unwrap();
    cache.preload_before_launch().unwrap();

    // The only populated slot is persistent, so nothing can be pruned.
    assert!(cache.slot_status(&ImageSource::path(&*boot_res)).unwrap().persistent);
    assert!(matches!(
        cache.open(&mem_source(2), DrawStyle::default()),
        Err(CacheError::OutOfMemory { .. })
    ));
}

#[test]
fn image_header_sizes_views_without_decoding() {
    let cache = manager(4);
    let source = mem_source(1);

    let header = cache.image_header(&source).unwrap();
    assert_eq!((header.width, header.height), (4, 4));
    // No pixels were decoded for it.
    assert_eq!(cache.memory_used(), 0);
    assert!(cache.slot_status(&source).is_none());
}

#[test]
fn unsupported_color_mode_is_a_format_error() {
    let cache = manager(4);
    let mut container = raw_container(2, 2, ColorMode::Alpha8, 0);
    container[8] = 9; // out-of-range color mode
    let source = ImageSource::memory(1, container);

    assert!(matches!(
        cache.open(&source, DrawStyle::default()),
        Err(CacheError::Format(_))
    ));
}

#[test]
fn missing_file_is_an_io_error() {
    let cache = manager(4);
    assert!(matches!(
        cache.open(&ImageSource::path("/no/such/resource.pxi"), DrawStyle::default()),
        Err(CacheError::Io { .. })
    ));
}
