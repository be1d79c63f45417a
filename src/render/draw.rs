use crate::types::Frame;

pub type Color = [u8; 4];

pub const WHITE: Color = [255, 255, 255, 255];

/// Clipped raster operations over an RGBA frame.
pub struct Canvas<'a> {
    buffer: &'a mut [u8],
    width: u32,
    height: u32,
}

impl<'a> Canvas<'a> {
    pub fn new(frame: &'a mut Frame) -> Self {
        Self {
            buffer: &mut frame.rgba,
            width: frame.width,
            height: frame.height,
        }
    }

    /// Bresenham line; `thickness` widens it with a diamond brush.
    pub fn line(&mut self, p0: (f32, f32), p1: (f32, f32), color: Color, thickness: i32) {
        let (mut x0, mut y0) = (p0.0 as i32, p0.1 as i32);
        let (x1, y1) = (p1.0 as i32, p1.1 as i32);
        let dx = (x1 - x0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let dy = -(y1 - y0).abs();
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        let radius = (thickness.max(1) - 1) / 2;

        loop {
            self.stamp(x0, y0, radius, color);
            if x0 == x1 && y0 == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x0 += sx;
            }
            if e2 <= dx {
                err += dx;
                y0 += sy;
            }
        }
    }

    pub fn fill_circle(&mut self, center: (i32, i32), radius: i32, color: Color) {
        let (cx, cy) = center;
        let radius = radius.max(0);
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                if dx * dx + dy * dy <= radius * radius {
                    self.put(cx + dx, cy + dy, color);
                }
            }
        }
    }

    pub fn fill_rect(&mut self, x: i32, y: i32, w: i32, h: i32, color: Color) {
        for py in y..y + h {
            for px in x..x + w {
                self.put(px, py, color);
            }
        }
    }

    fn stamp(&mut self, x: i32, y: i32, radius: i32, color: Color) {
        self.put(x, y, color);
        for ox in -radius..=radius {
            for oy in -radius..=radius {
                if (ox != 0 || oy != 0) && ox.abs() + oy.abs() <= radius {
                    self.put(x + ox, y + oy, color);
                }
            }
        }
    }

    pub fn put(&mut self, x: i32, y: i32, color: Color) {
        if x < 0 || y < 0 {
            return;
        }
        let (ux, uy) = (x as u32, y as u32);
        if ux >= self.width || uy >= self.height {
            return;
        }
        let idx = (uy as usize * self.width as usize + ux as usize) * 4;
        if let Some(px) = self.buffer.get_mut(idx..idx + 4) {
            px.copy_from_slice(&color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(frame: &Frame) -> usize {
        frame.rgba.chunks_exact(4).filter(|px| px[0] == 255).count()
    }

    #[test]
    fn horizontal_line_covers_endpoints() {
        let mut frame = Frame::black(10, 3);
        Canvas::new(&mut frame).line((1.0, 1.0), (8.0, 1.0), WHITE, 1);
        assert_eq!(frame.pixel(1, 1), Some(WHITE));
        assert_eq!(frame.pixel(8, 1), Some(WHITE));
        assert_eq!(lit(&frame), 8);
    }

    #[test]
    fn thick_line_is_wider() {
        let mut thin = Frame::black(20, 20);
        Canvas::new(&mut thin).line((2.0, 10.0), (17.0, 10.0), WHITE, 1);
        let mut thick = Frame::black(20, 20);
        Canvas::new(&mut thick).line((2.0, 10.0), (17.0, 10.0), WHITE, 3);
        assert!(lit(&thick) > lit(&thin));
        assert_eq!(thick.pixel(10, 11), Some(WHITE));
    }

    #[test]
    fn drawing_is_clipped() {
        let mut frame = Frame::black(4, 4);
        let mut canvas = Canvas::new(&mut frame);
        canvas.fill_circle((0, 0), 3, WHITE);
        canvas.line((-10.0, -10.0), (20.0, 20.0), WHITE, 2);
        canvas.put(100, 100, WHITE);
        assert_eq!(frame.rgba.len(), 4 * 4 * 4);
        assert_eq!(frame.pixel(0, 0), Some(WHITE));
    }

    #[test]
    fn circle_radius_zero_is_one_pixel() {
        let mut frame = Frame::black(5, 5);
        Canvas::new(&mut frame).fill_circle((2, 2), 0, WHITE);
        assert_eq!(lit(&frame), 1);
    }
}
