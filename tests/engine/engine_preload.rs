//! Preloading, foreground and background.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use planktoscan::{MemoryProbe, PreloadTask};

use crate::fixture::{TestFixture, MODEL_IDS};

fn ids(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_preload_fills_free_slots_only() {
    let fixture = TestFixture::new();
    let engine = fixture.engine();

    let report = engine.preload(&ids(&MODEL_IDS));

    assert_eq!(report.success, vec!["m1", "m2"]);
    assert_eq!(report.skipped, vec!["m3"]);
    assert!(report.failed.is_empty());
    assert!(!report.aborted_on_memory);
    assert_eq!(report.timings.len(), 2);
    assert_eq!(engine.cache_info().cache.evictions, 0);
}

#[test]
fn test_preload_aborts_on_memory_pressure() {
    let fixture = TestFixture::new();
    let loads = Arc::clone(&fixture.loads);
    // Above the preload threshold once the first model is in.
    let probe: Arc<dyn MemoryProbe> = Arc::new(move || {
        if loads.load(Ordering::SeqCst) >= 1 {
            0.80
        } else {
            0.30
        }
    });
    let config = planktoscan::EngineConfig {
        max_cached_models: 6,
        ..fixture.config()
    };
    let engine = fixture.engine_with_probe(config, probe);

    let report = engine.preload(&ids(&["m1", "m2", "m3"]));

    assert_eq!(report.success, vec!["m1"]);
    assert_eq!(report.skipped, vec!["m2", "m3"]);
    assert!(report.aborted_on_memory);
    assert_eq!(fixture.load_count(), 1);
}

#[test]
fn test_preload_skips_resident_models() {
    let fixture = TestFixture::new();
    let engine = fixture.engine();
    let image = fixture.write_png("sample.png");
    engine.predict("m1", image.as_path(), true).unwrap();

    let report = engine.preload(&ids(&["m1", "m2"]));

    assert_eq!(report.skipped, vec!["m1"]);
    assert_eq!(report.success, vec!["m2"]);
    assert_eq!(fixture.load_count(), 2);
}

#[test]
fn test_preload_reports_missing_and_unknown_models() {
    let fixture = TestFixture::new();
    let engine = fixture.engine();
    std::fs::remove_file(fixture.artifact("m2")).unwrap();

    let report = engine.preload(&ids(&["m2", "ghost"]));

    assert_eq!(report.failed.len(), 2);
    assert_eq!(report.failed[0].id, "m2");
    assert!(report.failed[0].reason.contains("artifact not found"));
    assert_eq!(report.failed[1].id, "ghost");
    assert_eq!(fixture.load_count(), 0);

    let status = engine.preload_status(&ids(&["m1", "m2"])).unwrap();
    assert!(status[0].exists);
    assert!(!status[1].exists);
}

#[tokio::test]
async fn test_background_preload_completes() {
    let fixture = TestFixture::new();
    let engine = Arc::new(fixture.engine());

    let task = engine.start_preloading();
    let report = task.join().await.unwrap();

    assert_eq!(report.success, vec!["m1", "m2"]);
    assert!(!report.cancelled);
    assert_eq!(engine.cache_info().cache.count, 2);
}

#[tokio::test]
async fn test_shutdown_before_start_cancels_warming() {
    let fixture = TestFixture::new();
    let engine = Arc::new(fixture.engine());

    let task = PreloadTask::spawn(
        Arc::clone(&engine),
        ids(&MODEL_IDS),
        Duration::from_secs(60),
    );
    let report = task.shutdown(Duration::from_secs(5)).await.unwrap();

    assert!(report.cancelled);
    assert_eq!(report.skipped, vec!["m1", "m2", "m3"]);
    assert_eq!(fixture.load_count(), 0);
}

#[tokio::test]
async fn test_dropping_task_cancels_warming() {
    let fixture = TestFixture::new();
    let engine = Arc::new(fixture.engine());

    let task = PreloadTask::spawn(
        Arc::clone(&engine),
        ids(&MODEL_IDS),
        Duration::from_millis(50),
    );
    drop(task);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(fixture.load_count(), 0);
    assert_eq!(engine.cache_info().cache.count, 0);
}
