//! Detections and their selection.
//!
use anyhow::Result;
use cam_source::Frame;

/// Positive additive constant to avoid divide-by-zero.
const EPS: f32 = 1.0e-7;

/// Axis-aligned bounding box in pixel coordinates of the source frame.
///
/// `(x1, y1)` is the top-left and `(x2, y2)` the bottom-right corner, the origin is the top
/// left corner of the image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Area enclosed by the box.
    ///
    /// If the box is ill-defined by having the bottom-right point above/to the left of the
    /// top-left point, the area is zero.
    pub fn area(&self) -> f32 {
        let (width, height) = (self.width(), self.height());
        if width < 0.0 || height < 0.0 {
            return 0.0;
        }

        width * height
    }

    /// Intersection-over-union with another box.
    pub fn iou(&self, other: &BBox) -> f32 {
        // If the boxes do not overlap, the corner points of the overlap box are ill defined and
        // its area is zero.
        let overlap = BBox {
            x1: f32::max(self.x1, other.x1),
            y1: f32::max(self.y1, other.y1),
            x2: f32::min(self.x2, other.x2),
            y2: f32::min(self.y2, other.y2),
        };
        let overlap_area = overlap.area();

        overlap_area / (self.area() + other.area() - overlap_area + EPS)
    }

    /// Clamp the box into an image of the given size.
    pub fn clamped(&self, width: u32, height: u32) -> BBox {
        let (width, height) = (width as f32, height as f32);
        BBox {
            x1: self.x1.clamp(0.0, width),
            y1: self.y1.clamp(0.0, height),
            x2: self.x2.clamp(0.0, width),
            y2: self.y2.clamp(0.0, height),
        }
    }
}

/// One predicted object instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: BBox,
    /// Score in `[0, 1]`.
    pub confidence: f32,
    pub class_id: usize,
    /// Class name, if the model ships with one.
    pub label: Option<String>,
}

impl Detection {
    pub fn new(bbox: BBox, confidence: f32, class_id: usize) -> Self {
        Self {
            bbox,
            confidence: confidence.clamp(0.0, 1.0),
            class_id,
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Text drawn next to the box.
    pub fn caption(&self) -> String {
        match &self.label {
            Some(label) => format!("{} {:.2}", label, self.confidence),
            None => format!("{:.2}", self.confidence),
        }
    }
}

/// Thresholds applied to raw candidates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Candidates scoring below this are discarded.
    pub confidence: f32,
    /// Maximum IoU a candidate may have with any more confident, selected detection.
    pub overlap: f32,
    pub max_detections: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            confidence: 0.1,
            overlap: 0.5,
            max_detections: 300,
        }
    }
}

impl Thresholds {
    /// Check that both thresholds are fractions.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("confidence", self.confidence), ("overlap", self.overlap)] {
            if !(0.0..=1.0).contains(&value) {
                anyhow::bail!("{name} threshold must be within [0, 1], got {value}");
            }
        }
        Ok(())
    }
}

/// Anything that maps a frame to a set of detections.
///
/// Implementations hold no per-call state, so one instance can serve several pipelines.
pub trait Detect {
    fn detect(&self, frame: &Frame, thresholds: &Thresholds) -> Result<Vec<Detection>>;
}

impl<D: Detect + ?Sized> Detect for std::sync::Arc<D> {
    fn detect(&self, frame: &Frame, thresholds: &Thresholds) -> Result<Vec<Detection>> {
        (**self).detect(frame, thresholds)
    }
}

/// Filter raw candidates by confidence and run non-maximum-suppression.
///
/// Start with the most confident candidate and iterate over all others in the order of sinking
/// confidence. A candidate is selected only if its IoU with every already selected detection is
/// at most `thresholds.overlap`. Suppression ignores classes. The result is sorted by descending
/// confidence and holds at most `thresholds.max_detections` entries.
pub fn select_detections(candidates: Vec<Detection>, thresholds: &Thresholds) -> Vec<Detection> {
    let mut candidates: Vec<Detection> = candidates
        .into_iter()
        .filter(|candidate| candidate.confidence >= thresholds.confidence)
        .collect();

    // Ascending, so the most confident candidate sits at the back
    candidates.sort_by(|a, b| a.confidence.total_cmp(&b.confidence));

    let mut selected: Vec<Detection> = Vec::new();
    'candidates: while let Some(candidate) = candidates.pop() {
        if selected.len() >= thresholds.max_detections {
            break;
        }

        for kept in selected.iter() {
            if candidate.bbox.iou(&kept.bbox) > thresholds.overlap {
                continue 'candidates;
            }
        }

        selected.push(candidate);
    }

    selected
}
