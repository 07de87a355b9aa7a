//! Prediction flow tests against stub models.

use base64::Engine as _;
use planktoscan::{Error, ImageSource};

use crate::fixture::TestFixture;

#[test]
fn test_predict_ranks_top_three() {
    let fixture = TestFixture::new();
    let engine = fixture.engine();
    let image = fixture.write_png("sample.png");

    let result = engine.predict("m1", image.as_path(), true).unwrap();

    assert_eq!(result.model_id, "m1");
    assert_eq!(result.architecture, "MobileNetV2");
    assert_eq!(result.predicted_class, "Calanus");
    assert_eq!(result.confidence, 0.7);
    let labels: Vec<&str> = result.top_k.iter().map(|c| c.label.as_str()).collect();
    assert_eq!(labels, vec!["Calanus", "Oithona", "Acartia"]);
    assert_eq!(result.message, "Prediction result: Calanus (70.00%)");
    assert!(!result.performance.cache_hit);
    assert!(result.performance.total >= result.performance.inference);
}

#[test]
fn test_predict_is_idempotent() {
    let fixture = TestFixture::new();
    let engine = fixture.engine();
    let image = fixture.write_png("sample.png");

    let first = engine.predict("m1", image.as_path(), true).unwrap();
    let second = engine.predict("m1", image.as_path(), true).unwrap();

    assert_eq!(first.predicted_class, second.predicted_class);
    assert_eq!(first.confidence, second.confidence);
    assert!(second.performance.cache_hit);
    assert_eq!(fixture.load_count(), 1);
}

#[test]
fn test_unknown_model_lists_available() {
    let fixture = TestFixture::new();
    let engine = fixture.engine();
    let image = fixture.write_png("sample.png");

    match engine.predict("alexnet", image.as_path(), true) {
        Err(Error::ModelNotAvailable { id, available }) => {
            assert_eq!(id, "alexnet");
            assert_eq!(available, vec!["m1", "m2", "m3"]);
        }
        other => panic!("expected ModelNotAvailable, got {:?}", other),
    }
    assert_eq!(fixture.load_count(), 0);
}

#[test]
fn test_missing_image_is_rejected_before_loading() {
    let fixture = TestFixture::new();
    let engine = fixture.engine();

    let err = engine
        .predict("m1", fixture.root().join("nope.png"), true)
        .unwrap_err();

    assert!(matches!(err, Error::ImageNotFound(_)));
    assert!(err.is_client_error());
    assert_eq!(fixture.load_count(), 0);
}

#[test]
fn test_corrupt_image_leaves_cache_intact() {
    let fixture = TestFixture::new();
    let engine = fixture.engine();
    let garbage = fixture.write_file("broken.png", b"this is not an image");

    let err = engine.predict("m1", garbage.as_path(), true).unwrap_err();
    assert!(matches!(err, Error::ImageDecode(_)));

    // The model was loaded before decoding failed and stays usable.
    assert_eq!(engine.cache_info().cache.count, 1);
    let image = fixture.write_png("sample.png");
    assert!(engine.predict("m1", image.as_path(), true).unwrap().performance.cache_hit);
}

#[test]
fn test_bytes_and_data_url_sources() {
    let fixture = TestFixture::new();
    let engine = fixture.engine();
    let path = fixture.write_png("sample.png");
    let bytes = std::fs::read(&path).unwrap();

    let from_path = engine.predict("m1", path.as_path(), true).unwrap();
    let from_bytes = engine.predict("m1", bytes.clone(), true).unwrap();
    let url = format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(&bytes)
    );
    let from_url = engine.predict("m1", ImageSource::DataUrl(url), true).unwrap();

    assert_eq!(from_path.predicted_class, from_bytes.predicted_class);
    assert_eq!(from_path.predicted_class, from_url.predicted_class);
}

#[test]
fn test_uncached_predict_never_inserts() {
    let fixture = TestFixture::new();
    let engine = fixture.engine();
    let image = fixture.write_png("sample.png");

    engine.predict("m1", image.as_path(), false).unwrap();
    engine.predict("m1", image.as_path(), false).unwrap();

    assert_eq!(engine.cache_info().cache.count, 0);
    assert_eq!(fixture.load_count(), 2);
}

#[test]
fn test_transient_load_failures_are_retried() {
    let fixture = TestFixture::new();
    let engine = fixture.engine();
    let image = fixture.write_png("sample.png");
    fixture.fail_next_loads(2);

    let result = engine.predict("m1", image.as_path(), true).unwrap();

    assert_eq!(result.predicted_class, "Calanus");
    assert_eq!(fixture.load_count(), 3);
}

#[test]
fn test_exhausted_retries_create_no_entry() {
    let fixture = TestFixture::new();
    let engine = fixture.engine();
    let image = fixture.write_png("sample.png");
    fixture.fail_next_loads(3);

    let err = engine.predict("m1", image.as_path(), true).unwrap_err();

    match &err {
        Error::ArtifactLoad { failures, .. } => assert_eq!(failures[0].strategy, "stub"),
        other => panic!("expected ArtifactLoad, got {:?}", other),
    }
    assert!(!err.is_client_error());
    assert_eq!(fixture.load_count(), 3);
    assert_eq!(engine.cache_info().cache.count, 0);
}

#[test]
fn test_image_metadata() {
    let fixture = TestFixture::new();
    let image = fixture.write_png("sample.png");

    let metadata = planktoscan::image_metadata(&image).unwrap();

    assert_eq!((metadata.width, metadata.height), (32, 24));
    assert_eq!(metadata.format, "PNG");
    assert_eq!(metadata.file_size, std::fs::metadata(&image).unwrap().len());
}
