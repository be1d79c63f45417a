//! Hand landmark detection: palm detector → rotated crop → hand-pose model.

mod palm;
mod tensor;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use ort::{
    session::{Session, builder::GraphOptimizationLevel},
    value::Tensor,
};

use crate::{
    config::Settings,
    model_download::{ModelKind, ensure_model_ready},
    types::{Frame, FrameObservation, Hand, HandObservation, Handedness},
};

use palm::{PalmDetector, PalmRegion, crop_from_palm};
use tensor::{HANDPOSE_INPUT_SIZE, decode_landmarks, rotated_crop_tensor};

/// Turns a frame into zero or more hands. Implementations may keep state
/// between calls but must not retain the frame.
pub trait LandmarkSource {
    fn detect(&mut self, frame: &Frame) -> Result<FrameObservation>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct LandmarkerConfig {
    pub max_hands: usize,
    pub min_detection_confidence: f32,
    pub min_tracking_confidence: f32,
    pub models_dir: PathBuf,
}

impl LandmarkerConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_hands: settings.max_num_hands,
            min_detection_confidence: settings.min_detection_confidence,
            min_tracking_confidence: settings.min_tracking_confidence,
            models_dir: settings.models_dir.clone(),
        }
    }
}

/// What the hand-pose model says about one crop.
#[derive(Clone, Debug)]
struct HandposeReading {
    landmarks: Vec<[f32; 3]>,
    confidence: f32,
    handedness: f32,
}

pub struct HandLandmarker {
    config: LandmarkerConfig,
    palm_detector: PalmDetector,
    handpose: Session,
}

impl HandLandmarker {
    /// Loads both models, downloading them on first use.
    pub fn new(config: LandmarkerConfig) -> Result<Self> {
        let palm_path = ensure_model_ready(&config.models_dir, ModelKind::PalmDetector)?;
        let handpose_path = ensure_model_ready(&config.models_dir, ModelKind::HandposeEstimator)?;

        let palm_detector = PalmDetector::new(&palm_path, config.min_detection_confidence)?;
        let handpose = load_session(&handpose_path)?;
        log::info!(
            "hand landmarker ready using {} and {}",
            handpose_path.display(),
            palm_path.display()
        );

        Ok(Self {
            config,
            palm_detector,
            handpose,
        })
    }

    fn read_hand(&mut self, frame: &Frame, region: &PalmRegion) -> Result<Option<HandObservation>> {
        let (center, side, angle) = crop_from_palm(region);
        let (input, transform) =
            rotated_crop_tensor(frame, center, side, angle, HANDPOSE_INPUT_SIZE)?;
        let reading = self.run_handpose(input)?;

        let confidence = (reading.confidence * region.score).clamp(0.0, 1.0);
        if confidence < self.config.min_tracking_confidence {
            log::trace!("dropping hand with confidence {confidence:.2}");
            return Ok(None);
        }

        let normalized: Vec<[f32; 3]> = reading
            .landmarks
            .iter()
            .map(|&lm| transform.normalize(lm))
            .collect();
        let hand = Hand::from_triples(&normalized)
            .ok_or_else(|| anyhow!("hand-pose model returned {} points", normalized.len()))?;

        Ok(Some(HandObservation {
            hand,
            handedness: Handedness::from_score(reading.handedness),
        }))
    }

    fn run_handpose(&mut self, input: ndarray::Array4<f32>) -> Result<HandposeReading> {
        let outputs = self
            .handpose
            .run(ort::inputs![Tensor::from_array(input)?])
            .context("failed to run hand-pose model")?;
        if outputs.len() < 1 {
            return Err(anyhow!("hand-pose model returned no outputs"));
        }

        let coords: Vec<f32> = outputs[0].try_extract_array::<f32>()?.iter().copied().collect();
        let scalar = |i: usize| {
            if outputs.len() > i {
                outputs[i]
                    .try_extract_array::<f32>()
                    .ok()
                    .and_then(|arr| arr.iter().next().copied())
                    .unwrap_or(0.0)
            } else {
                0.0
            }
        };

        Ok(HandposeReading {
            landmarks: decode_landmarks(&coords)?,
            confidence: scalar(1),
            handedness: scalar(2),
        })
    }
}

impl LandmarkSource for HandLandmarker {
    fn detect(&mut self, frame: &Frame) -> Result<FrameObservation> {
        let regions = self.palm_detector.detect(frame)?;
        let mut hands = Vec::with_capacity(self.config.max_hands);
        for region in regions.iter().take(self.config.max_hands) {
            if let Some(hand) = self.read_hand(frame, region)? {
                hands.push(hand);
            }
        }
        Ok(hands)
    }
}

fn load_session(model_path: &Path) -> Result<Session> {
    Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(2)?
        .commit_from_file(model_path)
        .with_context(|| format!("failed to load ORT session from {}", model_path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_mirrors_settings() {
        let mut settings = Settings::default();
        settings.max_num_hands = 2;
        settings.min_tracking_confidence = 0.4;
        let config = LandmarkerConfig::from_settings(&settings);
        assert_eq!(config.max_hands, 2);
        assert_eq!(config.min_detection_confidence, 0.6);
        assert_eq!(config.min_tracking_confidence, 0.4);
        assert_eq!(config.models_dir, PathBuf::from("models"));
    }
}
