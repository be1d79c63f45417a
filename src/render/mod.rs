//! Overlay rendering: hand skeleton, constellation and HUD labels drawn onto
//! either the camera frame or a black canvas of the same size.

mod draw;
mod font;

use crate::{
    config::Settings,
    gesture::GestureKind,
    types::{Frame, Hand, HandObservation},
};

use draw::{Canvas, WHITE};

/// Hand-model topology: thumb, index, middle, ring, pinky chains from the wrist.
pub const SKELETON_CONNECTIONS: &[(usize, usize)] = &[
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 4),
    (0, 5),
    (5, 6),
    (6, 7),
    (7, 8),
    (0, 9),
    (9, 10),
    (10, 11),
    (11, 12),
    (0, 13),
    (13, 14),
    (14, 15),
    (15, 16),
    (0, 17),
    (17, 18),
    (18, 19),
    (19, 20),
];

const SKELETON_THICKNESS: i32 = 2;
const KEYPOINT_RADIUS: i32 = 4;

const TEXT_LEFT: i32 = 16;
const FIRST_BASELINE: i32 = 30;
const LINE_STEP: i32 = 28;
const TEXT_SCALE: i32 = 2;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConstellationStyle {
    pub neighbors: usize,
    pub point_radius: i32,
    pub line_thickness: i32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RenderOptions {
    pub title: String,
    pub camera_background: bool,
    pub draw_fps: bool,
    pub constellation: Option<ConstellationStyle>,
}

impl RenderOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        let constellation = settings
            .constellation
            .enabled
            .then(|| ConstellationStyle {
                neighbors: settings.constellation.neighbors.max(1),
                point_radius: settings.constellation.point_radius,
                line_thickness: settings.constellation.line_thickness,
            });
        Self {
            title: settings.window_title.clone(),
            camera_background: settings.camera_background(),
            draw_fps: settings.draw_fps,
            constellation,
        }
    }
}

/// Stateless apart from the options it was built with.
pub struct OverlayRenderer {
    options: RenderOptions,
}

impl OverlayRenderer {
    pub fn new(options: RenderOptions) -> Self {
        Self { options }
    }

    /// Produces a new canvas the size of `frame`; `frame` itself is untouched.
    pub fn render(
        &self,
        frame: &Frame,
        hands: &[HandObservation],
        gesture: Option<GestureKind>,
        fps: f64,
    ) -> Frame {
        let mut output = if self.options.camera_background {
            frame.clone()
        } else {
            Frame::black(frame.width, frame.height)
        };

        let (width, height) = (output.width as f32, output.height as f32);
        let mut canvas = Canvas::new(&mut output);

        for observation in hands {
            let points = pixel_points(&observation.hand, width, height);
            draw_skeleton(&mut canvas, &points);
            if let Some(style) = self.options.constellation {
                draw_constellation(&mut canvas, &points, style);
            }
        }

        for (line, text) in self.labels(gesture, fps).iter().enumerate() {
            let baseline = FIRST_BASELINE + line as i32 * LINE_STEP;
            let top = baseline - font::GLYPH_HEIGHT * TEXT_SCALE;
            font::draw_text(&mut canvas, text, (TEXT_LEFT, top), TEXT_SCALE, WHITE);
        }

        output
    }

    /// Label lines top to bottom. Absent entries collapse, so later lines
    /// move up.
    fn labels(&self, gesture: Option<GestureKind>, fps: f64) -> Vec<String> {
        let mut lines = vec![self.options.title.clone()];
        if let Some(gesture) = gesture {
            lines.push(format!("Gesture: {}", gesture.name()));
            lines.push(format!("Symbol: {}", gesture.symbol()));
        }
        if self.options.draw_fps {
            lines.push(format!("FPS: {fps:.1}"));
        }
        lines
    }
}

fn pixel_points(hand: &Hand, width: f32, height: f32) -> Vec<(f32, f32)> {
    hand.points()
        .iter()
        .map(|p| (p.x * width, p.y * height))
        .collect()
}

fn draw_skeleton(canvas: &mut Canvas<'_>, points: &[(f32, f32)]) {
    for &(a, b) in SKELETON_CONNECTIONS {
        if let (Some(&pa), Some(&pb)) = (points.get(a), points.get(b)) {
            canvas.line(pa, pb, WHITE, SKELETON_THICKNESS);
        }
    }
    for &(x, y) in points {
        canvas.fill_circle((x as i32, y as i32), KEYPOINT_RADIUS, WHITE);
    }
}

fn draw_constellation(canvas: &mut Canvas<'_>, points: &[(f32, f32)], style: ConstellationStyle) {
    for &(x, y) in points {
        canvas.fill_circle((x as i32, y as i32), style.point_radius, WHITE);
    }
    for (i, neighbors) in nearest_neighbors(points, style.neighbors).iter().enumerate() {
        let from = (points[i].0.round(), points[i].1.round());
        for &j in neighbors {
            let to = (points[j].0.round(), points[j].1.round());
            canvas.line(from, to, WHITE, style.line_thickness);
        }
    }
}

/// For each point, the indices of its `k` closest other points, nearest first.
///
/// Every point picks its own set, so `j` appearing in the list of `i` does not
/// imply the reverse. `k` is capped at `points.len() - 1`.
pub fn nearest_neighbors(points: &[(f32, f32)], k: usize) -> Vec<Vec<usize>> {
    let k = k.min(points.len().saturating_sub(1));
    points
        .iter()
        .enumerate()
        .map(|(i, &(xi, yi))| {
            let mut others: Vec<(usize, f32)> = points
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != i)
                .map(|(j, &(xj, yj))| (j, (xi - xj).hypot(yi - yj)))
                .collect();
            others.sort_by(|a, b| a.1.total_cmp(&b.1));
            others.into_iter().take(k).map(|(j, _)| j).collect()
        })
        .collect()
}
