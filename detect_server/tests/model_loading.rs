use std::{fs, path::PathBuf};

use anyhow::Result;
use cam_source::Frame;
use detect_server::{
    detection::{Detect, Thresholds},
    error::ModelError,
    nn::{read_trusted_weights, ModelSpec, YoloModel},
};
use image::{Rgb, RgbImage};
use sha2::{Digest, Sha256};
use tempfile::TempDir;

fn write_file(dir: &TempDir, name: &str, content: &[u8]) -> Result<PathBuf> {
    let path = dir.path().join(name);
    fs::write(&path, content)?;
    Ok(path)
}

fn untrusted_reason(result: Result<Vec<u8>, ModelError>) -> String {
    match result {
        Err(ModelError::Untrusted { reason, .. }) => reason,
        other => panic!("expected an untrusted model, got {other:?}"),
    }
}

#[test]
fn missing_model_is_reported() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("best.onnx");

    assert!(matches!(
        read_trusted_weights(&path, None),
        Err(ModelError::Missing(missing)) if missing == path
    ));
    assert!(matches!(
        YoloModel::load(&ModelSpec::new(&path)),
        Err(ModelError::Missing(_))
    ));
    Ok(())
}

#[test]
fn pickle_checkpoints_are_refused_by_extension() -> Result<()> {
    let dir = TempDir::new()?;
    for name in ["best.pt", "best.PTH", "weights.pkl", "last.ckpt"] {
        let path = write_file(&dir, name, b"\x80\x02}q\x00.")?;
        let reason = untrusted_reason(read_trusted_weights(&path, None));
        assert!(reason.contains("export the model to ONNX"), "{name}: {reason}");
    }
    Ok(())
}

#[test]
fn unknown_extension_is_refused() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_file(&dir, "best.bin", b"\x08\x07")?;

    let reason = untrusted_reason(read_trusted_weights(&path, None));
    assert!(reason.contains(".onnx"));
    Ok(())
}

#[test]
fn checkpoint_renamed_to_onnx_is_refused_by_content() -> Result<()> {
    let dir = TempDir::new()?;
    let zipped = write_file(&dir, "zipped.onnx", b"PK\x03\x04archive/data.pkl")?;
    let pickled = write_file(&dir, "pickled.onnx", b"\x80\x04\x95")?;
    let empty = write_file(&dir, "empty.onnx", b"")?;

    assert!(untrusted_reason(read_trusted_weights(&zipped, None)).contains("checkpoint"));
    assert!(untrusted_reason(read_trusted_weights(&pickled, None)).contains("checkpoint"));
    assert!(untrusted_reason(read_trusted_weights(&empty, None)).contains("empty"));
    Ok(())
}

#[test]
fn digest_is_checked_before_loading() -> Result<()> {
    let dir = TempDir::new()?;
    let content = b"\x08\x07\x12\x04test";
    let path = write_file(&dir, "best.onnx", content)?;
    let digest = hex::encode(Sha256::digest(content));

    assert_eq!(read_trusted_weights(&path, Some(&digest))?, content.to_vec());
    assert_eq!(
        read_trusted_weights(&path, Some(&digest.to_uppercase()))?,
        content.to_vec()
    );

    let wrong = "0".repeat(64);
    match read_trusted_weights(&path, Some(&wrong)) {
        Err(ModelError::DigestMismatch {
            expected, actual, ..
        }) => {
            assert_eq!(expected, wrong);
            assert_eq!(actual, digest);
        }
        other => panic!("expected a digest mismatch, got {other:?}"),
    }
    Ok(())
}

#[test]
fn invalid_graph_fails_to_load() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_file(&dir, "best.onnx", b"this is not a protobuf graph")?;

    let mut spec = ModelSpec::new(&path);
    spec.input_size = 64;
    assert!(matches!(YoloModel::load(&spec), Err(ModelError::Graph(_))));
    Ok(())
}

/// Graph reshaping the `[1, 3, 8, 8]` input into a `[1, 6, 32]` output.
///
/// Red ends up in the box centers, green in the box sizes and blue in both class scores, so a
/// uniformly colored frame yields 32 identical proposals.
fn reshape_model(labels: Option<PathBuf>) -> Result<YoloModel> {
    let mut spec = ModelSpec::new(
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/data/reshape_6x32.onnx"),
    );
    spec.input_size = 8;
    spec.labels = labels;
    Ok(YoloModel::load(&spec)?)
}

#[test]
fn detects_through_the_loaded_graph() -> Result<()> {
    let dir = TempDir::new()?;
    let labels = write_file(&dir, "labels.txt", b"cat\n\ndog\n")?;
    let model = reshape_model(Some(labels))?;
    assert_eq!(model.labels(), ["cat", "dog"]);

    // Center and size of 1 input pixel, scaled by 800 / 8
    let frame = Frame::new(0, RgbImage::from_pixel(800, 800, Rgb([255, 255, 204])));
    let detections = model.detect(&frame, &Thresholds::default())?;

    // The identical proposals collapse into one
    assert_eq!(detections.len(), 1);
    let detection = &detections[0];
    assert!((detection.confidence - 0.8).abs() < 0.01);
    for (actual, expected) in [
        (detection.bbox.x1, 50.0),
        (detection.bbox.y1, 50.0),
        (detection.bbox.x2, 150.0),
        (detection.bbox.y2, 150.0),
    ] {
        assert!((actual - expected).abs() < 1.0, "{:?}", detection.bbox);
    }
    assert!(matches!(detection.label.as_deref(), Some("cat" | "dog")));

    Ok(())
}

#[test]
fn loaded_graph_respects_the_confidence_threshold() -> Result<()> {
    let model = reshape_model(None)?;
    assert!(model.labels().is_empty());

    let frame = Frame::new(0, RgbImage::from_pixel(80, 80, Rgb([128, 128, 51])));
    let thresholds = Thresholds {
        confidence: 0.5,
        ..Default::default()
    };
    assert!(model.detect(&frame, &thresholds)?.is_empty());

    Ok(())
}
