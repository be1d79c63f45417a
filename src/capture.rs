use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Local};
use image::{DynamicImage, RgbaImage};

use crate::{gesture::GestureKind, types::Frame};

/// `{NAME}_{YYYYmmdd_HHMMSS_micros}.jpg`
pub fn frame_filename(gesture: GestureKind, at: DateTime<Local>) -> String {
    format!("{}_{}.jpg", gesture.name(), at.format("%Y%m%d_%H%M%S_%6f"))
}

/// Writes the rendered frame as JPEG into `frames_dir`, creating it if needed.
pub fn save_frame(frame: &Frame, frames_dir: &Path, gesture: GestureKind) -> Result<PathBuf> {
    fs::create_dir_all(frames_dir)
        .with_context(|| format!("failed to create {}", frames_dir.display()))?;

    let path = frames_dir.join(frame_filename(gesture, Local::now()));
    let rgba = RgbaImage::from_raw(frame.width, frame.height, frame.rgba.clone())
        .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", frame.width, frame.height))?;
    DynamicImage::ImageRgba8(rgba)
        .to_rgb8()
        .save(&path)
        .with_context(|| format!("failed to write {}", path.display()))?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn filename_embeds_gesture_and_microseconds() {
        let at = Local
            .with_ymd_and_hms(2024, 3, 9, 14, 5, 7)
            .single()
            .expect("unambiguous time")
            + chrono::Duration::microseconds(42);
        assert_eq!(
            frame_filename(GestureKind::OpenPalm, at),
            "OPEN_PALM_20240309_140507_000042.jpg"
        );
    }

    #[test]
    fn saves_decodable_jpeg_in_new_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let frames_dir = dir.path().join("frames");
        let frame = Frame::black(32, 24);

        let path = save_frame(&frame, &frames_dir, GestureKind::Fist).expect("saved");

        assert!(path.starts_with(&frames_dir));
        let name = path.file_name().and_then(|n| n.to_str()).expect("name");
        assert!(name.starts_with("FIST_"));
        assert!(name.ends_with(".jpg"));
        let decoded = image::open(&path).expect("decodable");
        assert_eq!((decoded.width(), decoded.height()), (32, 24));
    }

    #[test]
    fn rejects_truncated_buffer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut frame = Frame::black(8, 8);
        frame.rgba.truncate(10);
        assert!(save_frame(&frame, dir.path(), GestureKind::Point).is_err());
    }
}
