use std::fmt;

use crate::types::{FINGERTIPS, Hand, HandObservation, MIDDLE_FINGER_MCP, WRIST};

/// Fingertip reach (in wrist→middle-base units) above which a finger counts as extended.
pub const OPEN_THRESHOLD: f32 = 1.8;
/// Fingertip reach below which a finger counts as curled.
pub const CLOSED_THRESHOLD: f32 = 1.0;
const SCALE_EPSILON: f32 = 1e-6;

const INDEX: usize = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GestureKind {
    OpenPalm,
    Fist,
    Point,
}

impl GestureKind {
    pub fn name(&self) -> &'static str {
        match self {
            GestureKind::OpenPalm => "OPEN_PALM",
            GestureKind::Fist => "FIST",
            GestureKind::Point => "POINT",
        }
    }

    /// Symbolic payload forwarded downstream with the gesture name.
    pub fn symbol(&self) -> &'static str {
        match self {
            GestureKind::OpenPalm => "#FLAME[RISE]",
            GestureKind::Fist => "#STONE[SEAL]",
            GestureKind::Point => "#ARROW[TRUE]",
        }
    }
}

impl fmt::Display for GestureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Classifies the first hand of a frame. Further hands are ignored.
///
/// Rules are checked in a fixed order and the first match wins:
/// open palm, then fist, then point. There is no smoothing across frames.
pub fn classify(hands: &[HandObservation]) -> Option<GestureKind> {
    let first = hands.first()?;
    classify_hand(&first.hand)
}

pub fn classify_hand(hand: &Hand) -> Option<GestureKind> {
    let reach = normalized_tip_reach(hand);

    // Thumb excluded.
    if reach[INDEX..].iter().all(|&d| d > OPEN_THRESHOLD) {
        return Some(GestureKind::OpenPalm);
    }

    if reach.iter().all(|&d| d < CLOSED_THRESHOLD) {
        return Some(GestureKind::Fist);
    }

    let others_curled = reach
        .iter()
        .enumerate()
        .filter(|(finger, _)| *finger != INDEX)
        .all(|(_, &d)| d < CLOSED_THRESHOLD);
    if reach[INDEX] > OPEN_THRESHOLD && others_curled {
        return Some(GestureKind::Point);
    }

    None
}

/// Planar fingertip-to-wrist distances (thumb first) divided by the
/// wrist-to-middle-base length of the same hand.
pub fn normalized_tip_reach(hand: &Hand) -> [f32; 5] {
    let wrist = hand.point(WRIST);
    let scale = wrist.distance_2d(&hand.point(MIDDLE_FINGER_MCP)) + SCALE_EPSILON;

    let mut reach = [0.0f32; 5];
    for (slot, &tip) in reach.iter_mut().zip(FINGERTIPS.iter()) {
        *slot = hand.point(tip).distance_2d(&wrist) / scale;
    }
    reach
}
