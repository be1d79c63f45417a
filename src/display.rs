use std::time::Duration;

use anyhow::{Result, anyhow};
use minifb::{Key, Window, WindowOptions};

use crate::{frame_loop::FrameDisplay, types::Frame};

/// On-screen preview. The window is opened on the first frame so it always
/// matches the camera's negotiated size.
pub struct PreviewWindow {
    title: String,
    window: Option<(Window, (usize, usize))>,
    buffer: Vec<u32>,
    closed: bool,
}

impl PreviewWindow {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            window: None,
            buffer: Vec::new(),
            closed: false,
        }
    }

    fn window_for(&mut self, width: usize, height: usize) -> Result<&mut Window> {
        let stale = self
            .window
            .as_ref()
            .is_some_and(|(_, size)| *size != (width, height));
        if stale || self.window.is_none() {
            let mut window = Window::new(
                &self.title,
                width,
                height,
                WindowOptions {
                    resize: true,
                    ..WindowOptions::default()
                },
            )
            .map_err(|err| anyhow!("failed to create window: {err}"))?;
            window.limit_update_rate(Some(Duration::from_millis(1)));
            self.window = Some((window, (width, height)));
        }
        self.window
            .as_mut()
            .map(|(window, _)| window)
            .ok_or_else(|| anyhow!("preview window unavailable"))
    }
}

impl FrameDisplay for PreviewWindow {
    fn show(&mut self, frame: &Frame) -> Result<()> {
        let (width, height) = (frame.width as usize, frame.height as usize);
        let mut buffer = std::mem::take(&mut self.buffer);
        pack_0rgb(&frame.rgba, &mut buffer);

        let window = self.window_for(width, height)?;
        let updated = window
            .update_with_buffer(&buffer, width, height)
            .map_err(|err| anyhow!("window update failed: {err}"));
        let closed = !window.is_open() || window.is_key_down(Key::Q);

        self.buffer = buffer;
        self.closed = closed;
        updated
    }

    fn should_quit(&mut self) -> bool {
        self.closed
    }
}

/// RGBA bytes to minifb's `0RGB` words.
fn pack_0rgb(rgba: &[u8], out: &mut Vec<u32>) {
    out.clear();
    out.extend(
        rgba.chunks_exact(4)
            .map(|px| (u32::from(px[0]) << 16) | (u32::from(px[1]) << 8) | u32::from(px[2])),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_rgb_and_drops_alpha() {
        let mut out = vec![7; 5];
        pack_0rgb(&[0x12, 0x34, 0x56, 0xFF, 1, 2, 3, 0], &mut out);
        assert_eq!(out, vec![0x0012_3456, 0x0001_0203]);
    }
}
