//! Cache behavior observed through the engine.

use std::sync::Arc;
use std::thread;

use crate::fixture::{TestFixture, MODEL_IDS};

fn resident(engine: &planktoscan::ClassificationEngine) -> Vec<String> {
    let ids: Vec<String> = MODEL_IDS.iter().map(|s| s.to_string()).collect();
    engine
        .preload_status(&ids)
        .unwrap()
        .into_iter()
        .filter(|status| status.resident)
        .map(|status| status.id)
        .collect()
}

#[test]
fn test_clear_cache_forces_reload() {
    let fixture = TestFixture::new();
    let engine = fixture.engine();
    let image = fixture.write_png("sample.png");

    engine.predict("m1", image.as_path(), true).unwrap();
    assert_eq!(engine.cache_info().cache.count, 1);

    engine.clear_cache();
    assert_eq!(engine.cache_info().cache.count, 0);

    let result = engine.predict("m1", image.as_path(), true).unwrap();
    assert!(!result.performance.cache_hit);
    assert_eq!(fixture.load_count(), 2);
}

#[test]
fn test_capacity_evicts_least_recently_used() {
    let fixture = TestFixture::new();
    let engine = fixture.engine();
    let image = fixture.write_png("sample.png");

    for id in ["m1", "m2", "m1", "m3"] {
        engine.predict(id, image.as_path(), true).unwrap();
        assert!(engine.cache_info().cache.count <= 2);
    }

    assert_eq!(resident(&engine), vec!["m1", "m3"]);
    assert_eq!(engine.cache_info().cache.evictions, 1);
}

#[test]
fn test_memory_pressure_drains_until_load_fits() {
    let fixture = TestFixture::new();
    let config = planktoscan::EngineConfig {
        max_cached_models: 3,
        ..fixture.config()
    };
    let engine = fixture.engine_with(config);
    let image = fixture.write_png("sample.png");

    engine.predict("m1", image.as_path(), true).unwrap();
    engine.predict("m2", image.as_path(), true).unwrap();

    // Pressure never clears, so eviction stops only once the cache is empty.
    fixture.memory.set(0.95);
    engine.predict("m3", image.as_path(), true).unwrap();

    assert_eq!(resident(&engine), vec!["m3"]);
}

#[test]
fn test_cache_info_counters() {
    let fixture = TestFixture::new();
    let engine = fixture.engine();
    let image = fixture.write_png("sample.png");

    assert!(!engine.cache_info().labels_cached);

    engine.predict("m1", image.as_path(), true).unwrap();
    engine.predict("m1", image.as_path(), true).unwrap();

    let info = engine.cache_info();
    assert!(info.labels_cached);
    assert_eq!((info.cache.hits, info.cache.misses), (1, 1));
    assert_eq!(info.cache.max_entries, 2);
    assert_eq!(info.cache.entries.len(), 1);
    assert_eq!(info.cache.entries[0].path, fixture.artifact("m1"));
    assert_eq!(info.cache.entries[0].kind, "callable");

    // 2.5M float32 parameters
    assert!((info.cache.entries[0].memory_mb - 9.5367).abs() < 1e-3);

    let json = serde_json::to_value(&info).unwrap();
    assert_eq!(json["count"], 1);
    assert_eq!(json["labels_cached"], true);
}

#[test]
fn test_concurrent_misses_load_once() {
    let fixture = TestFixture::new();
    let engine = Arc::new(fixture.engine());
    let image = fixture.write_png("sample.png");

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let image = image.clone();
            thread::spawn(move || engine.predict("m1", image, true).unwrap())
        })
        .collect();

    for worker in workers {
        assert_eq!(worker.join().unwrap().predicted_class, "Calanus");
    }
    assert_eq!(fixture.load_count(), 1);
    assert_eq!(engine.cache_info().cache.count, 1);
}

#[test]
fn test_shutdown_releases_models() {
    let fixture = TestFixture::new();
    let engine = fixture.engine();
    let image = fixture.write_png("sample.png");

    engine.predict("m1", image.as_path(), true).unwrap();
    engine.shutdown();

    assert_eq!(engine.cache_info().cache.count, 0);
}
