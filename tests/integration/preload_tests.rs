//! Background preloading: budgeted steps, retries, and the real idle
//! thread driven by frame signals.

use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};

use pix_cache::{
    spawn_preloader, CacheConfig, CacheError, CacheManager, DrawStyle, FrameCoordinator,
    ImageSource, PreloadPhase, StepOutcome, ThroughputTable,
};

use super::test_utils::write_alpha_container;

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

/// A manager whose idle manifest lists `files`, with the throughput table
/// pinned so chunk sizes are deterministic.
fn idle_manager(
    dir: &std::path::Path,
    files: &[(&str, u16, u16)],
    table: ThroughputTable,
) -> CacheManager {
    let mut content = String::new();
    for (name, width, height) in files {
        write_alpha_container(dir, name, *width, *height, 0x5A);
        content.push_str(name);
        content.push('\n');
    }
    let manifest = dir.join("idle.txt");
    fs::write(&manifest, content).unwrap();

    let mut config = CacheConfig::new(8);
    config.preload.idle_manifest = Some(manifest);
    let cache = CacheManager::new(config).unwrap();
    cache.preload_before_launch().unwrap();
    cache.set_throughput_table(table);
    cache
}

#[test]
fn chunked_steps_fill_and_promote_persistent() {
    let dir = tempfile::tempdir().unwrap();
    // 100x100 Alpha8: a 10_000-byte payload.
    let cache = idle_manager(
        dir.path(),
        &[("big.pxi", 100, 100)],
        ThroughputTable::from_samples([(ms(5), 2000)]),
    );

    // The table answers "2000 bytes per 5ms tick": each 5ms step performs
    // exactly one chunked read, and the fifth completes the descriptor.
    for _ in 0..4 {
        assert_eq!(cache.preload_step(0, ms(5)), StepOutcome::Terminated);
    }
    assert_eq!(cache.preload_step(0, ms(5)), StepOutcome::Ended);

    let source = ImageSource::path(dir.path().join("big.pxi"));
    let status = cache.slot_status(&source).unwrap();
    assert!(status.persistent);
    assert!(status.fully_loaded);

    // Served from cache, no decode.
    let info = cache.open(&source, DrawStyle::default()).unwrap();
    assert_eq!(info.pixels.len(), 10_000);
    assert!(info.pixels.iter().all(|&b| b == 0x5A));
}

#[test]
fn loaded_bytes_are_monotonic_and_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let cache = idle_manager(
        dir.path(),
        &[("big.pxi", 100, 100)],
        ThroughputTable::from_samples([(ms(5), 3000)]),
    );

    let mut last = 0;
    for _ in 0..16 {
        let outcome = cache.preload_step(0, ms(5));
        let progress = &cache.preload_progress()[0];
        assert!(progress.loaded >= last);
        assert!(progress.loaded <= progress.total.unwrap_or(usize::MAX));
        last = progress.loaded;
        if outcome == StepOutcome::Ended {
            return;
        }
    }
    panic!("descriptor never completed");
}

#[test]
fn step_wall_time_stays_near_budget() {
    let dir = tempfile::tempdir().unwrap();
    let cache = idle_manager(
        dir.path(),
        &[("big.pxi", 100, 100)],
        ThroughputTable::from_samples([(ms(2), 1000)]),
    );

    let start = Instant::now();
    cache.preload_step(0, ms(2));
    // Bounded by the budget plus one outstanding chunked read; anything
    // near a frame period would mean the step ignored its budget.
    assert!(start.elapsed() < ms(100));
}

#[test]
fn open_mid_preload_reports_not_ready() {
    let dir = tempfile::tempdir().unwrap();
    let cache = idle_manager(
        dir.path(),
        &[("big.pxi", 100, 100)],
        ThroughputTable::from_samples([(ms(5), 2000)]),
    );

    let source = ImageSource::path(dir.path().join("big.pxi"));

    // Queued but unstarted: the slot is reserved, not readable.
    assert!(matches!(
        cache.open(&source, DrawStyle::default()),
        Err(CacheError::NotReady(_))
    ));

    // Partially loaded: still not readable, and no torn buffer either.
    cache.preload_step(0, ms(5));
    assert_eq!(cache.preload_progress()[0].phase, PreloadPhase::PartiallyLoaded);
    assert!(matches!(
        cache.open(&source, DrawStyle::default()),
        Err(CacheError::NotReady(_))
    ));
}

#[test]
fn single_retry_failure_is_excluded_from_later_passes() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = dir.path().join("idle.txt");
    fs::write(&manifest, "missing.pxi\n").unwrap();

    let mut config = CacheConfig::new(8);
    config.preload.idle_manifest = Some(manifest);
    config.preload.retry_budget = 1;
    let cache = CacheManager::new(config).unwrap();
    cache.preload_before_launch().unwrap();
    cache.set_throughput_table(ThroughputTable::from_samples([(ms(1), 4096)]));

    assert_eq!(cache.preload_step(0, ms(5)), StepOutcome::Terminated);

    let progress = &cache.preload_progress()[0];
    assert_eq!(progress.phase, PreloadPhase::Failed);
    assert_eq!(progress.retries_left, 0);
    assert_eq!(cache.idle_pending(), 0);

    // Subsequent passes skip it outright.
    assert_eq!(cache.preload_step(0, ms(5)), StepOutcome::Terminated);
    assert_eq!(cache.preload_progress()[0].phase, PreloadPhase::Failed);
}

#[test]
fn failed_preload_falls_back_to_synchronous_open() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = dir.path().join("idle.txt");
    // Listed before it exists: the first attempt fails.
    fs::write(&manifest, "late.pxi\n").unwrap();

    let mut config = CacheConfig::new(8);
    config.preload.idle_manifest = Some(manifest);
    config.preload.retry_budget = 1;
    let cache = CacheManager::new(config).unwrap();
    cache.preload_before_launch().unwrap();
    cache.set_throughput_table(ThroughputTable::from_samples([(ms(1), 4096)]));

    assert_eq!(cache.preload_step(0, ms(5)), StepOutcome::Terminated);

    // The resource appears later; a plain open decodes it synchronously.
    let path = write_alpha_container(dir.path(), "late.pxi", 4, 4, 3);
    let info = cache
        .open(&ImageSource::path(path), DrawStyle::default())
        .unwrap();
    assert_eq!(info.pixels.len(), 16);
}

#[test]
fn background_thread_loads_idle_list_in_frame_slack() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(idle_manager(
        dir.path(),
        &[("a.pxi", 50, 50), ("b.pxi", 40, 40)],
        ThroughputTable::from_samples([(ms(1), 2048)]),
    ));
    let frames = Arc::new(FrameCoordinator::new(ms(50), Duration::ZERO));

    let preloader = spawn_preloader(cache.clone(), frames.clone());

    // Drive the render loop; preloading happens strictly after the first
    // frame completes.
    let mut done = false;
    for _ in 0..400 {
        frames.on_frame_start();
        frames.on_frame_end(ms(1));
        std::thread::sleep(ms(2));
        if cache.idle_pending() == 0 {
            done = true;
            break;
        }
    }
    frames.shutdown();
    preloader.join().unwrap();
    assert!(done, "idle list never drained");

    for name in ["a.pxi", "b.pxi"] {
        let source = ImageSource::path(dir.path().join(name));
        let status = cache.slot_status(&source).unwrap();
        assert!(status.persistent, "{name} not persistent");
        assert!(status.fully_loaded, "{name} not loaded");
    }
}

#[test]
fn preloader_exits_on_shutdown_before_first_frame() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(idle_manager(
        dir.path(),
        &[("a.pxi", 8, 8)],
        ThroughputTable::from_samples([(ms(1), 4096)]),
    ));
    let frames = Arc::new(FrameCoordinator::default());

    let preloader = spawn_preloader(cache.clone(), frames.clone());
    // Never paint a frame; the preloader must not have started any I/O.
    std::thread::sleep(ms(20));
    assert_eq!(cache.preload_progress()[0].loaded, 0);

    frames.shutdown();
    preloader.join().unwrap();
}
