use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use nokhwa::{
    Camera,
    pixel_format::RgbFormat,
    query,
    utils::{
        ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
        Resolution,
    },
};

use super::{FrameSource, FrameSourceError, rgba_converter};
use crate::types::Frame;

const REQUESTED_FPS: u32 = 30;

// Built-in macOS cameras often reject YUYV even though it is advertised, so
// raw RGB variants come first.
const PREFERRED_PIXEL_FORMATS: &[FrameFormat] = &[
    FrameFormat::RAWRGB,
    FrameFormat::RAWBGR,
    FrameFormat::GRAY,
    FrameFormat::YUYV,
    FrameFormat::NV12,
    FrameFormat::MJPEG,
];

fn requested_formats(width: u32, height: u32) -> [RequestedFormat<'static>; 4] {
    let wanted = CameraFormat::new(
        Resolution::new(width, height),
        FrameFormat::MJPEG,
        REQUESTED_FPS,
    );
    [
        RequestedFormat::with_formats(RequestedFormatType::Closest(wanted), PREFERRED_PIXEL_FORMATS),
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestFrameRate,
            PREFERRED_PIXEL_FORMATS,
        ),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
    ]
}

#[derive(Clone, Debug)]
pub struct CameraDevice {
    pub index: CameraIndex,
    pub label: String,
}

pub fn available_cameras() -> Result<Vec<CameraDevice>> {
    let cameras = query(ApiBackend::Auto).context("failed to enumerate cameras")?;
    Ok(cameras
        .into_iter()
        .map(|info| CameraDevice {
            index: info.index().clone(),
            label: info.human_name(),
        })
        .collect())
}

fn build_camera(index: CameraIndex, width: u32, height: u32) -> Result<Camera> {
    let mut last_err = None;
    for requested in requested_formats(width, height) {
        match Camera::new(index.clone(), requested) {
            Ok(mut camera) => match camera.open_stream() {
                Ok(()) => return Ok(camera),
                Err(err) => last_err = Some(err.into()),
            },
            Err(err) => last_err = Some(err.into()),
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow!("failed to open camera with any supported format")))
}

type FrameResult = Result<Frame, FrameSourceError>;

/// Webcam frames produced on a capture thread. Only the newest frame is kept
/// when the consumer falls behind.
pub struct CameraSource {
    frames: Receiver<FrameResult>,
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CameraSource {
    /// Opens camera `index` and starts capturing. Fails if the device cannot
    /// be opened in any supported format.
    pub fn open(index: u32, width: u32, height: u32) -> Result<Self> {
        let (frame_tx, frame_rx) = bounded(1);
        let (ready_tx, ready_rx) = bounded::<Result<(), String>>(1);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let stale_rx = frame_rx.clone();

        let handle = thread::Builder::new()
            .name("camera".to_string())
            .spawn(move || {
                let mut camera = match build_camera(CameraIndex::Index(index), width, height) {
                    Ok(camera) => {
                        let _ = ready_tx.send(Ok(()));
                        camera
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(format!("{err:?}")));
                        return;
                    }
                };
                log::info!(
                    "camera {index} streaming {}x{} ({:?})",
                    camera.resolution().width_x,
                    camera.resolution().height_y,
                    camera.frame_format()
                );
                capture_loop(&mut camera, &frame_tx, &stale_rx, &stop_flag);
                if let Err(err) = camera.stop_stream() {
                    log::debug!("failed to stop camera stream: {err:?}");
                }
            })
            .context("failed to spawn camera thread")?;

        let opened = ready_rx
            .recv()
            .map_err(|_| anyhow!("camera thread exited before reporting"))
            .and_then(|status| status.map_err(|err| anyhow!(err)));
        if let Err(err) = opened {
            let _ = handle.join();
            return Err(err.context(format!("could not open camera {index}")));
        }

        Ok(Self {
            frames: frame_rx,
            stop,
            handle: Some(handle),
        })
    }
}

fn capture_loop(
    camera: &mut Camera,
    frame_tx: &Sender<FrameResult>,
    stale_rx: &Receiver<FrameResult>,
    stop: &AtomicBool,
) {
    while !stop.load(Ordering::Relaxed) {
        let result = camera
            .frame()
            .map_err(|err| FrameSourceError::Read(err.to_string()))
            .and_then(|buffer| {
                rgba_converter::decode_buffer(&buffer)
                    .map_err(|err| FrameSourceError::Decode(format!("{err:#}")))
            });
        let failed = result.is_err();

        let mut pending = result;
        loop {
            match frame_tx.try_send(pending) {
                Ok(()) => break,
                Err(TrySendError::Full(back)) => {
                    let _ = stale_rx.try_recv();
                    pending = back;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }

        if failed {
            return;
        }
    }
}

impl FrameSource for CameraSource {
    fn next_frame(&mut self) -> Result<Frame, FrameSourceError> {
        self.frames
            .recv()
            .map_err(|_| FrameSourceError::Disconnected)?
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
