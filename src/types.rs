/// Keypoints per hand, in the fixed MediaPipe hand-model order.
pub const NUM_LANDMARKS: usize = 21;
pub const WRIST: usize = 0;
pub const MIDDLE_FINGER_MCP: usize = 9;
/// Thumb, index, middle, ring, pinky.
pub const FINGERTIPS: [usize; 5] = [4, 8, 12, 16, 20];

#[derive(Clone, Debug)]
pub struct Frame {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    pub fn black(width: u32, height: u32) -> Self {
        let mut rgba = vec![0u8; width as usize * height as usize * 4];
        for px in rgba.chunks_exact_mut(4) {
            px[3] = 255;
        }
        Self {
            rgba,
            width,
            height,
        }
    }

    /// Flips the image around its vertical axis.
    pub fn mirror_horizontally(&mut self) {
        let width = self.width as usize;
        let stride = width * 4;
        if stride == 0 {
            return;
        }
        for row in self.rgba.chunks_exact_mut(stride) {
            for x in 0..width / 2 {
                let (left, right) = (x * 4, (width - 1 - x) * 4);
                for c in 0..4 {
                    row.swap(left + c, right + c);
                }
            }
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 4;
        self.rgba
            .get(idx..idx + 4)
            .map(|px| [px[0], px[1], px[2], px[3]])
    }
}

/// Normalized landmark: x/y in [0,1] of frame width/height, z relative depth.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Keypoint {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Planar distance; depth is ignored.
    pub fn distance_2d(&self, other: &Keypoint) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Hand {
    points: [Keypoint; NUM_LANDMARKS],
}

impl Hand {
    pub fn new(points: [Keypoint; NUM_LANDMARKS]) -> Self {
        Self { points }
    }

    /// Builds a hand from `[x, y, z]` triples; `None` unless exactly 21 are given.
    pub fn from_triples(triples: &[[f32; 3]]) -> Option<Self> {
        if triples.len() != NUM_LANDMARKS {
            return None;
        }
        let mut points = [Keypoint::default(); NUM_LANDMARKS];
        for (dst, [x, y, z]) in points.iter_mut().zip(triples) {
            *dst = Keypoint::new(*x, *y, *z);
        }
        Some(Self::new(points))
    }

    pub fn point(&self, index: usize) -> Keypoint {
        self.points[index]
    }

    pub fn points(&self) -> &[Keypoint; NUM_LANDMARKS] {
        &self.points
    }

    pub fn planar(&self) -> Vec<[f32; 2]> {
        self.points.iter().map(|p| [p.x, p.y]).collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Handedness {
    Left,
    Right,
}

impl Handedness {
    pub fn from_score(score: f32) -> Self {
        if score >= 0.5 {
            Handedness::Right
        } else {
            Handedness::Left
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Handedness::Left => "Left",
            Handedness::Right => "Right",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct HandObservation {
    pub hand: Hand,
    pub handedness: Handedness,
}

/// All hands seen in one frame, in detector order. Identity is not tracked
/// between frames.
pub type FrameObservation = Vec<HandObservation>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mirror_swaps_columns() {
        let mut frame = Frame::black(3, 1);
        frame.rgba[0..4].copy_from_slice(&[10, 20, 30, 255]);
        frame.mirror_horizontally();
        assert_eq!(frame.pixel(2, 0), Some([10, 20, 30, 255]));
        assert_eq!(frame.pixel(0, 0), Some([0, 0, 0, 255]));
    }

    #[test]
    fn hand_requires_twenty_one_points() {
        assert!(Hand::from_triples(&[[0.0; 3]; 20]).is_none());
        let hand = Hand::from_triples(&[[0.5, 0.25, 0.0]; 21]).expect("21 points");
        assert_eq!(hand.planar()[20], [0.5, 0.25]);
    }

    #[test]
    fn handedness_threshold() {
        assert_eq!(Handedness::from_score(0.5), Handedness::Right);
        assert_eq!(Handedness::from_score(0.49), Handedness::Left);
        assert_eq!(Handedness::Left.label(), "Left");
    }
}
