use anyhow::{Context, Result, anyhow, ensure};
use fast_image_resize as fir;
use ndarray::Array4;
use rayon::prelude::*;

use crate::types::{Frame, NUM_LANDMARKS};

pub const HANDPOSE_INPUT_SIZE: u32 = 224;
pub const PALM_INPUT_SIZE: u32 = 192;

/// How a frame was scaled and padded into a square model input.
#[derive(Clone, Debug, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub orig_w: u32,
    pub orig_h: u32,
}

impl Letterbox {
    pub fn fit(width: u32, height: u32, target: u32) -> Self {
        let scale = target as f32 / width.max(height).max(1) as f32;
        let new_w = (width as f32 * scale).round().max(1.0) as u32;
        let new_h = (height as f32 * scale).round().max(1.0) as u32;
        Self {
            scale,
            pad_x: (target.saturating_sub(new_w) / 2) as f32,
            pad_y: (target.saturating_sub(new_h) / 2) as f32,
            orig_w: width,
            orig_h: height,
        }
    }

    fn resized_dims(&self) -> (u32, u32) {
        (
            (self.orig_w as f32 * self.scale).round().max(1.0) as u32,
            (self.orig_h as f32 * self.scale).round().max(1.0) as u32,
        )
    }
}

/// Rotated square crop around a hand, and its inverse mapping back to frame
/// pixels.
#[derive(Clone, Debug)]
pub struct CropTransform {
    pub center: (f32, f32),
    pub side: f32,
    pub angle: f32,
    pub output_size: u32,
    pub orig_w: u32,
    pub orig_h: u32,
}

impl CropTransform {
    fn pixel_scale(&self) -> f32 {
        self.side / self.output_size as f32
    }

    fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        let half = self.output_size as f32 / 2.0;
        let scale = self.pixel_scale();
        let (dx, dy) = ((x - half) * scale, (y - half) * scale);
        let (sin, cos) = self.angle.sin_cos();
        (
            self.center.0 + dx * cos - dy * sin,
            self.center.1 + dx * sin + dy * cos,
        )
    }

    /// Crop-space landmark to frame-normalized `[x, y, z]`. x and y are
    /// clamped to the frame; z is scaled like x.
    pub fn normalize(&self, landmark: [f32; 3]) -> [f32; 3] {
        let (px, py) = self.to_frame(landmark[0], landmark[1]);
        let w = self.orig_w.max(1) as f32;
        let h = self.orig_h.max(1) as f32;
        [
            (px / w).clamp(0.0, 1.0),
            (py / h).clamp(0.0, 1.0),
            landmark[2] * self.pixel_scale() / w,
        ]
    }
}

fn check_buffer(frame: &Frame) -> Result<()> {
    let expected = (frame.width as usize)
        .saturating_mul(frame.height as usize)
        .saturating_mul(4);
    ensure!(
        frame.rgba.len() == expected,
        "frame buffer size mismatch: got {}, expected {expected}",
        frame.rgba.len()
    );
    Ok(())
}

/// Letterboxes `frame` into a `target`x`target` NHWC tensor scaled to [0,1].
pub fn letterbox_tensor(frame: &Frame, target: u32) -> Result<(Array4<f32>, Letterbox)> {
    check_buffer(frame)?;
    let letterbox = Letterbox::fit(frame.width, frame.height, target);
    let (new_w, new_h) = letterbox.resized_dims();

    let src = fir::images::Image::from_vec_u8(
        frame.width,
        frame.height,
        frame.rgba.clone(),
        fir::PixelType::U8x4,
    )?;
    let mut dst = fir::images::Image::new(new_w, new_h, fir::PixelType::U8x4);
    let options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));
    fir::Resizer::new()
        .resize(&src, &mut dst, Some(&options))
        .context("letterbox resize failed")?;
    let resized = dst.into_vec();

    let side = target as usize;
    let mut canvas = vec![0u8; side * side * 4];
    let src_stride = new_w as usize * 4;
    let (pad_x, pad_y) = (letterbox.pad_x as usize, letterbox.pad_y as usize);
    for (row, src_row) in resized.chunks_exact(src_stride).enumerate() {
        let offset = ((pad_y + row) * side + pad_x) * 4;
        if let Some(dst_row) = canvas.get_mut(offset..offset + src_stride) {
            dst_row.copy_from_slice(src_row);
        }
    }

    let normalized: Vec<f32> = canvas
        .par_chunks_exact(4)
        .flat_map_iter(|px| px[..3].iter().map(|&c| c as f32 / 255.0).collect::<Vec<_>>())
        .collect();
    let input = Array4::from_shape_vec((1, side, side, 3), normalized)
        .map_err(|err| anyhow!("failed to build letterbox tensor: {err}"))?;

    Ok((input, letterbox))
}

/// Samples a rotated square of `side` pixels around `center` into an
/// `output_size` NHWC tensor.
pub fn rotated_crop_tensor(
    frame: &Frame,
    center: (f32, f32),
    side: f32,
    angle: f32,
    output_size: u32,
) -> Result<(Array4<f32>, CropTransform)> {
    check_buffer(frame)?;
    let transform = CropTransform {
        center,
        side,
        angle,
        output_size,
        orig_w: frame.width,
        orig_h: frame.height,
    };

    let n = output_size as usize;
    let data: Vec<f32> = (0..n * n)
        .into_par_iter()
        .flat_map_iter(|i| {
            let (x, y) = ((i % n) as f32 + 0.5, (i / n) as f32 + 0.5);
            let (sx, sy) = transform.to_frame(x, y);
            bilinear_rgb(frame, sx, sy)
        })
        .collect();

    let input = Array4::from_shape_vec((1, n, n, 3), data)
        .map_err(|err| anyhow!("failed to build crop tensor: {err}"))?;
    Ok((input, transform))
}

/// First 21 `[x, y, z]` triples of a flat model output.
pub fn decode_landmarks(flat: &[f32]) -> Result<Vec<[f32; 3]>> {
    ensure!(
        flat.len() >= NUM_LANDMARKS * 3,
        "landmark output too short: got {}, need {}",
        flat.len(),
        NUM_LANDMARKS * 3
    );
    Ok(flat
        .chunks_exact(3)
        .take(NUM_LANDMARKS)
        .map(|c| [c[0], c[1], c[2]])
        .collect())
}

fn bilinear_rgb(frame: &Frame, x: f32, y: f32) -> [f32; 3] {
    if !x.is_finite() || !y.is_finite() {
        return [0.0; 3];
    }
    let (x0, y0) = (x.floor(), y.floor());
    let (fx, fy) = (x - x0, y - y0);
    let texel = |cx: f32, cy: f32| -> [f32; 3] {
        let (ix, iy) = (cx as i64, cy as i64);
        if ix < 0 || iy < 0 || ix >= frame.width as i64 || iy >= frame.height as i64 {
            return [0.0; 3];
        }
        let idx = (iy as usize * frame.width as usize + ix as usize) * 4;
        match frame.rgba.get(idx..idx + 3) {
            Some(px) => [
                px[0] as f32 / 255.0,
                px[1] as f32 / 255.0,
                px[2] as f32 / 255.0,
            ],
            None => [0.0; 3],
        }
    };

    let (c00, c10) = (texel(x0, y0), texel(x0 + 1.0, y0));
    let (c01, c11) = (texel(x0, y0 + 1.0), texel(x0 + 1.0, y0 + 1.0));
    let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
    std::array::from_fn(|c| lerp(lerp(c00[c], c10[c], fx), lerp(c01[c], c11[c], fx), fy))
}
