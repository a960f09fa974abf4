//! Object detection with a YOLOv8-style ONNX model.
//!
//! The model expects a `[1, 3, S, S]` float input with values in `[0, 1]` and produces a
//! `[1, 4 + C, N]` output: for each of the `N` proposals the box center, width and height in input
//! pixels followed by one score per class.
use std::{
    io::Cursor,
    path::{Path, PathBuf},
};

use anyhow::Result;
use cam_source::Frame;
use image::RgbImage;
use ndarray::{s, ArrayView2, Axis, Ix3};
use sha2::{Digest, Sha256};
use tract_onnx::prelude::*;

use crate::{
    detection::{select_detections, BBox, Detect, Detection, Thresholds},
    error::ModelError,
};

type NnModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Leading bytes of a zip archive, the container of PyTorch checkpoints.
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
/// Protocol opcode every pickle stream starts with.
const PICKLE_PROTO: u8 = 0x80;

/// Where to find the model and how to feed it.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub path: PathBuf,
    /// Expected SHA-256 of the weights file as hex.
    pub sha256: Option<String>,
    /// Text file with one class name per line.
    pub labels: Option<PathBuf>,
    /// Side length of the square model input.
    pub input_size: u32,
}

impl ModelSpec {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sha256: None,
            labels: None,
            input_size: 640,
        }
    }
}

/// A loaded detection model, read-only after construction.
pub struct YoloModel {
    model: NnModel,
    input_size: u32,
    labels: Vec<String>,
}

impl YoloModel {
    /// Validate and load the model described by `spec`.
    pub fn load(spec: &ModelSpec) -> Result<Self, ModelError> {
        let weights = read_trusted_weights(&spec.path, spec.sha256.as_deref())?;
        let model = build_plan(&weights, spec.input_size)
            .map_err(|e| ModelError::Graph(format!("{e:#}")))?;

        let labels = match &spec.labels {
            Some(path) => read_labels(path)?,
            None => Vec::new(),
        };

        log::info!(
            "Loaded model {} ({}x{} input, {} class names)",
            spec.path.display(),
            spec.input_size,
            spec.input_size,
            labels.len()
        );

        Ok(Self {
            model,
            input_size: spec.input_size,
            labels,
        })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    fn preproc(&self, input: &RgbImage) -> Tensor {
        let size = self.input_size;
        let resized: RgbImage =
            image::imageops::resize(input, size, size, image::imageops::FilterType::Triangle);

        tract_ndarray::Array4::from_shape_fn(
            (1, 3, size as usize, size as usize),
            |(_, c, y, x)| resized[(x as _, y as _)][c] as f32 / 255.0,
        )
        .into()
    }
}

impl Detect for YoloModel {
    fn detect(&self, frame: &Frame, thresholds: &Thresholds) -> Result<Vec<Detection>> {
        let input = self.preproc(frame.image());
        let raw_nn_out = self.model.run(tvec!(input.into()))?;

        let output = raw_nn_out[0]
            .to_array_view::<f32>()?
            .into_dimensionality::<Ix3>()?;
        let (width, height) = frame.dimensions();

        let candidates = decode_predictions(
            output.index_axis(Axis(0), 0),
            self.input_size,
            (width, height),
            thresholds.confidence,
            &self.labels,
        )?;

        Ok(select_detections(candidates, thresholds))
    }
}

/// Turn raw model output into detection candidates in frame pixel coordinates.
///
/// Accepts both `[4 + C, N]` and the transposed `[N, 4 + C]` layout. Proposals whose best class
/// scores below `min_confidence` are dropped early.
pub fn decode_predictions(
    output: ArrayView2<f32>,
    input_size: u32,
    frame_size: (u32, u32),
    min_confidence: f32,
    labels: &[String],
) -> Result<Vec<Detection>> {
    // There are always more proposals than values per proposal
    let output = match output.nrows() <= output.ncols() {
        true => output,
        false => output.reversed_axes(),
    };
    if output.nrows() < 5 {
        anyhow::bail!("unexpected model output shape {:?}", output.shape());
    }

    let scale_x = frame_size.0 as f32 / input_size as f32;
    let scale_y = frame_size.1 as f32 / input_size as f32;

    let candidates = output
        .axis_iter(Axis(1))
        .filter_map(|proposal| {
            let (class_id, confidence) = proposal
                .slice(s![4..])
                .iter()
                .copied()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(&b.1))?;
            if confidence < min_confidence {
                return None;
            }

            let (cx, cy, w, h) = (proposal[0], proposal[1], proposal[2], proposal[3]);
            let bbox = BBox::new(
                (cx - w / 2.0) * scale_x,
                (cy - h / 2.0) * scale_y,
                (cx + w / 2.0) * scale_x,
                (cy + h / 2.0) * scale_y,
            )
            .clamped(frame_size.0, frame_size.1);

            let detection = Detection::new(bbox, confidence, class_id);
            Some(match labels.get(class_id) {
                Some(label) => detection.with_label(label.as_str()),
                None => detection,
            })
        })
        .collect();

    Ok(candidates)
}

/// Read the weights file, refusing anything but plain ONNX data.
///
/// Pickle based checkpoints can execute arbitrary code when deserialized, so they are rejected by
/// extension and by content. With `expected_sha256`, the content must also match the digest.
pub fn read_trusted_weights(
    path: &Path,
    expected_sha256: Option<&str>,
) -> Result<Vec<u8>, ModelError> {
    if !path.is_file() {
        return Err(ModelError::Missing(path.to_path_buf()));
    }

    let untrusted = |reason: &str| ModelError::Untrusted {
        path: path.to_path_buf(),
        reason: reason.to_owned(),
    };

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("onnx") => (),
        Some("pt" | "pth" | "pkl" | "ckpt") => {
            return Err(untrusted(
                "pickle based checkpoints are not accepted, export the model to ONNX",
            ))
        }
        _ => return Err(untrusted("expected an .onnx file")),
    }

    let weights = std::fs::read(path)?;
    if weights.is_empty() {
        return Err(untrusted("file is empty"));
    }
    if weights.starts_with(ZIP_MAGIC) || weights[0] == PICKLE_PROTO {
        return Err(untrusted("content is a serialized checkpoint, not ONNX"));
    }

    if let Some(expected) = expected_sha256 {
        let actual = hex::encode(Sha256::digest(&weights));
        if !actual.eq_ignore_ascii_case(expected.trim()) {
            return Err(ModelError::DigestMismatch {
                path: path.to_path_buf(),
                expected: expected.to_owned(),
                actual,
            });
        }
    }

    Ok(weights)
}

fn build_plan(weights: &[u8], input_size: u32) -> TractResult<NnModel> {
    let input_fact = InferenceFact::dt_shape(
        f32::datum_type(),
        tvec!(1, 3, input_size as usize, input_size as usize),
    );
    tract_onnx::onnx()
        .model_for_read(&mut Cursor::new(weights))?
        .with_input_fact(0, input_fact)?
        .into_optimized()?
        .into_runnable()
}

fn read_labels(path: &Path) -> Result<Vec<String>, ModelError> {
    let content = std::fs::read_to_string(path).map_err(ModelError::Labels)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect())
}
