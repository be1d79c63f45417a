//! Palm detection: SSD-style decoding of the palm detector outputs into
//! frame-space regions, and the rotated crop each region implies for the
//! hand-pose model.

use std::{f32::consts::FRAC_PI_2, path::Path, sync::LazyLock};

use anyhow::{Context, Result, anyhow, ensure};
use ort::{session::Session, value::Tensor};

use super::tensor::{Letterbox, PALM_INPUT_SIZE, letterbox_tensor};
use crate::types::Frame;

const PALM_KEYPOINTS: usize = 7;
const BOX_FEATURES: usize = 4 + PALM_KEYPOINTS * 2;
const NMS_IOU_THRESHOLD: f32 = 0.3;
const CROP_EXPANSION: f32 = 2.4;
const MIN_CROP_SIDE: f32 = 80.0;

/// (feature map size, anchors per cell), in output order.
const ANCHOR_LAYOUT: [(usize, usize); 2] = [(24, 2), (12, 6)];

/// Anchor centers in normalized input space.
pub static ANCHORS: LazyLock<Vec<[f32; 2]>> = LazyLock::new(|| {
    let mut anchors = Vec::new();
    for (size, per_cell) in ANCHOR_LAYOUT {
        for y in 0..size {
            for x in 0..size {
                let center = [(x as f32 + 0.5) / size as f32, (y as f32 + 0.5) / size as f32];
                anchors.extend(std::iter::repeat_n(center, per_cell));
            }
        }
    }
    anchors
});

/// A detected palm in frame pixels.
#[derive(Clone, Debug, PartialEq)]
pub struct PalmRegion {
    /// `[x1, y1, x2, y2]`
    pub bbox: [f32; 4],
    pub keypoints: Vec<(f32, f32)>,
    pub score: f32,
}

pub struct PalmDetector {
    session: Session,
    score_threshold: f32,
}

impl PalmDetector {
    pub fn new(model_path: &Path, score_threshold: f32) -> Result<Self> {
        Ok(Self {
            session: super::load_session(model_path)?,
            score_threshold,
        })
    }

    /// Palms above the score threshold after NMS, best first.
    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<PalmRegion>> {
        let (input, letterbox) = letterbox_tensor(frame, PALM_INPUT_SIZE)?;
        let outputs = self
            .session
            .run(ort::inputs![Tensor::from_array(input)?])
            .context("failed to run palm detector")?;
        ensure!(
            outputs.len() >= 2,
            "palm detector returned {} outputs, expected 2",
            outputs.len()
        );

        let boxes = outputs[0].try_extract_array::<f32>()?;
        let scores = outputs[1].try_extract_array::<f32>()?;
        let boxes: Vec<f32> = boxes.iter().copied().collect();
        let scores: Vec<f32> = scores.iter().copied().collect();

        let candidates = decode_regions(&boxes, &scores, &letterbox, self.score_threshold)?;
        Ok(non_max_suppression(candidates, NMS_IOU_THRESHOLD))
    }
}

/// Decodes raw anchor regressions (`[anchors, 18]`) and logits (`[anchors]`).
pub fn decode_regions(
    boxes: &[f32],
    scores: &[f32],
    letterbox: &Letterbox,
    score_threshold: f32,
) -> Result<Vec<PalmRegion>> {
    let anchors = ANCHORS.len();
    ensure!(
        boxes.len() >= anchors * BOX_FEATURES && scores.len() >= anchors,
        "palm outputs too short for {anchors} anchors: boxes {}, scores {}",
        boxes.len(),
        scores.len()
    );

    let input = PALM_INPUT_SIZE as f32;
    let extent = letterbox.orig_w.max(letterbox.orig_h) as f32;
    let (bias_x, bias_y) = (
        letterbox.pad_x / letterbox.scale,
        letterbox.pad_y / letterbox.scale,
    );
    let to_frame = |nx: f32, ny: f32| (nx * extent - bias_x, ny * extent - bias_y);
    let (max_x, max_y) = (
        letterbox.orig_w.saturating_sub(1) as f32,
        letterbox.orig_h.saturating_sub(1) as f32,
    );

    let mut regions = Vec::new();
    for (i, anchor) in ANCHORS.iter().enumerate() {
        let score = sigmoid(scores[i]);
        if score < score_threshold {
            continue;
        }
        let raw = boxes
            .get(i * BOX_FEATURES..(i + 1) * BOX_FEATURES)
            .ok_or_else(|| anyhow!("missing regression for anchor {i}"))?;

        let cx = raw[0] / input + anchor[0];
        let cy = raw[1] / input + anchor[1];
        let (hw, hh) = (raw[2] / input / 2.0, raw[3] / input / 2.0);
        let (x1, y1) = to_frame(cx - hw, cy - hh);
        let (x2, y2) = to_frame(cx + hw, cy + hh);
        if x2 <= x1 || y2 <= y1 {
            continue;
        }

        let keypoints = raw[4..]
            .chunks_exact(2)
            .map(|kp| to_frame(kp[0] / input + anchor[0], kp[1] / input + anchor[1]))
            .collect();

        regions.push(PalmRegion {
            bbox: [
                x1.clamp(0.0, max_x),
                y1.clamp(0.0, max_y),
                x2.clamp(0.0, max_x),
                y2.clamp(0.0, max_y),
            ],
            keypoints,
            score,
        });
    }
    Ok(regions)
}

/// Greedy NMS; survivors come back sorted by descending score.
pub fn non_max_suppression(mut candidates: Vec<PalmRegion>, iou_threshold: f32) -> Vec<PalmRegion> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<PalmRegion> = Vec::new();
    for candidate in candidates {
        if kept
            .iter()
            .all(|k| iou(&k.bbox, &candidate.bbox) < iou_threshold)
        {
            kept.push(candidate);
        }
    }
    kept
}

pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let inter_w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let inter_h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = inter_w * inter_h;
    if inter <= 0.0 {
        return 0.0;
    }
    let area = |r: &[f32; 4]| (r[2] - r[0]).max(0.0) * (r[3] - r[1]).max(0.0);
    let union = area(a) + area(b) - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}

/// Center, side and rotation of the square the hand-pose model should see.
pub fn crop_from_palm(region: &PalmRegion) -> ((f32, f32), f32, f32) {
    let [x1, y1, x2, y2] = region.bbox;
    let center = mean(&region.keypoints).unwrap_or(((x1 + x2) * 0.5, (y1 + y2) * 0.5));

    let span = if region.keypoints.is_empty() {
        0.0
    } else {
        let (min_x, max_x, min_y, max_y) = region.keypoints.iter().fold(
            (f32::MAX, f32::MIN, f32::MAX, f32::MIN),
            |(lx, hx, ly, hy), &(x, y)| (lx.min(x), hx.max(x), ly.min(y), hy.max(y)),
        );
        (max_x - min_x).max(max_y - min_y)
    };
    let side = (x2 - x1)
        .abs()
        .max((y2 - y1).abs())
        .max(span)
        .max(MIN_CROP_SIDE)
        * CROP_EXPANSION;

    (center, side, orientation(&region.keypoints))
}

/// Principal axis of the palm keypoints, turned so the fingers point up.
pub fn orientation(keypoints: &[(f32, f32)]) -> f32 {
    let Some((mx, my)) = mean(keypoints) else {
        return 0.0;
    };
    if keypoints.len() < 2 {
        return 0.0;
    }

    let n = keypoints.len() as f32;
    let (mut sxx, mut sxy, mut syy) = (0.0f32, 0.0f32, 0.0f32);
    for &(x, y) in keypoints {
        let (dx, dy) = (x - mx, y - my);
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }
    let (sxx, sxy, syy) = (sxx / n, sxy / n, syy / n);

    let half_trace = (sxx + syy) * 0.5;
    let det = sxx * syy - sxy * sxy;
    let lambda = (half_trace + (half_trace * half_trace - det).max(0.0).sqrt()).max(1e-6);
    let (vx, vy) = if sxy.abs() > 1e-6 {
        (lambda - syy, sxy)
    } else if sxx >= syy {
        (1.0, 0.0)
    } else {
        (0.0, 1.0)
    };

    vy.atan2(vx) - FRAC_PI_2
}

fn mean(points: &[(f32, f32)]) -> Option<(f32, f32)> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f32;
    let (sx, sy) = points
        .iter()
        .fold((0.0f32, 0.0f32), |(ax, ay), &(x, y)| (ax + x, ay + y));
    Some((sx / n, sy / n))
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
