//! Camera buffer → RGBA frame for every pixel format the capture side may
//! negotiate.

use std::convert::TryFrom;

use anyhow::{Result, anyhow, bail};
use nokhwa::{Buffer, utils::FrameFormat};
use rayon::prelude::*;
use yuv::{
    YuvBiPlanarImage, YuvConversionMode, YuvPackedImage, YuvRange, YuvStandardMatrix,
    yuv_nv12_to_rgba, yuyv422_to_rgba,
};
use zune_jpeg::{
    JpegDecoder,
    zune_core::{bytestream::ZCursor, colorspace::ColorSpace, options::DecoderOptions},
};

use crate::types::Frame;

pub fn decode_buffer(buffer: &Buffer) -> Result<Frame> {
    let resolution = buffer.resolution();
    decode_raw(
        buffer.source_frame_format(),
        buffer.buffer(),
        resolution.width_x,
        resolution.height_y,
    )
}

pub fn decode_raw(format: FrameFormat, data: &[u8], width: u32, height: u32) -> Result<Frame> {
    let dims = Dims { width, height };
    let rgba = match format {
        FrameFormat::NV12 => dims.nv12(data)?,
        FrameFormat::YUYV => dims.yuyv(data)?,
        FrameFormat::MJPEG => dims.mjpeg(data)?,
        FrameFormat::RAWRGB => dims.expand(data, Layout::Rgb)?,
        FrameFormat::RAWBGR => dims.expand(data, Layout::Bgr)?,
        FrameFormat::GRAY => dims.expand(data, Layout::Gray)?,
    };

    Ok(Frame {
        rgba,
        width,
        height,
    })
}

/// Byte-per-channel layouts that map to RGBA without a colour transform.
#[derive(Clone, Copy)]
enum Layout {
    Rgb,
    Bgr,
    Gray,
}

impl Layout {
    fn channels(self) -> usize {
        match self {
            Layout::Rgb | Layout::Bgr => 3,
            Layout::Gray => 1,
        }
    }

    fn write(self, src: &[u8], dst: &mut [u8]) {
        let [r, g, b] = match self {
            Layout::Rgb => [src[0], src[1], src[2]],
            Layout::Bgr => [src[2], src[1], src[0]],
            Layout::Gray => [src[0]; 3],
        };
        dst.copy_from_slice(&[r, g, b, 255]);
    }
}

#[derive(Clone, Copy)]
struct Dims {
    width: u32,
    height: u32,
}

impl Dims {
    fn pixels(self) -> usize {
        self.width as usize * self.height as usize
    }

    fn rgba_buffer(self) -> Vec<u8> {
        vec![0u8; self.pixels() * 4]
    }

    fn require(self, label: &str, data: &[u8], needed: usize) -> Result<()> {
        if data.len() < needed {
            bail!(
                "{label} buffer too small for {}x{}: got {}, expected {needed}",
                self.width,
                self.height,
                data.len()
            );
        }
        Ok(())
    }

    fn expand(self, data: &[u8], layout: Layout) -> Result<Vec<u8>> {
        let channels = layout.channels();
        let label = match layout {
            Layout::Rgb => "RGB",
            Layout::Bgr => "BGR",
            Layout::Gray => "GRAY",
        };
        self.require(label, data, self.pixels() * channels)?;

        let mut rgba = self.rgba_buffer();
        rgba.par_chunks_mut(4)
            .zip(data.par_chunks_exact(channels))
            .for_each(|(dst, src)| layout.write(src, dst));
        Ok(rgba)
    }

    fn nv12(self, data: &[u8]) -> Result<Vec<u8>> {
        let luma = self.pixels();
        let chroma = luma / 2;
        self.require("NV12", data, luma + chroma)?;

        let (y_plane, rest) = data.split_at(luma);
        let image = YuvBiPlanarImage {
            y_plane,
            y_stride: self.width,
            uv_plane: &rest[..chroma],
            uv_stride: self.width,
            width: self.width,
            height: self.height,
        };

        let mut rgba = self.rgba_buffer();
        yuv_nv12_to_rgba(
            &image,
            &mut rgba,
            self.width * 4,
            YuvRange::Full,
            YuvStandardMatrix::Bt709,
            YuvConversionMode::Balanced,
        )
        .map_err(|err| anyhow!("NV12 conversion failed: {err:?}"))?;
        Ok(rgba)
    }

    fn yuyv(self, data: &[u8]) -> Result<Vec<u8>> {
        self.require("YUYV", data, self.pixels() * 2)?;

        let packed = YuvPackedImage {
            yuy: data,
            yuy_stride: self.width * 2,
            width: self.width,
            height: self.height,
        };

        let mut rgba = self.rgba_buffer();
        yuyv422_to_rgba(
            &packed,
            &mut rgba,
            self.width * 4,
            YuvRange::Full,
            YuvStandardMatrix::Bt709,
        )
        .map_err(|err| anyhow!("YUYV conversion failed: {err:?}"))?;
        Ok(rgba)
    }

    /// The JPEG's own dimensions must match the negotiated resolution.
    fn mjpeg(self, data: &[u8]) -> Result<Vec<u8>> {
        let options = DecoderOptions::default().jpeg_set_out_colorspace(ColorSpace::RGBA);
        let mut decoder = JpegDecoder::new_with_options(ZCursor::new(data), options);
        let rgba = decoder
            .decode()
            .map_err(|err| anyhow!("MJPEG decode failed: {err:?}"))?;

        if let Some(info) = decoder.info() {
            let decoded = (u32::try_from(info.width).ok(), u32::try_from(info.height).ok());
            if decoded != (Some(self.width), Some(self.height)) {
                bail!(
                    "MJPEG frame is {}x{}, expected {}x{}",
                    info.width,
                    info.height,
                    self.width,
                    self.height
                );
            }
        }
        if rgba.len() < self.pixels() * 4 {
            bail!(
                "MJPEG decode produced {} bytes, expected {}",
                rgba.len(),
                self.pixels() * 4
            );
        }
        Ok(rgba)
    }
}
