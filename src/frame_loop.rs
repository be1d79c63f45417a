//! The per-frame pipeline. Everything here runs on the calling thread, one
//! frame at a time: capture, landmarks, classification, fan-out to the
//! dashboard, OSC and the renderer, then gesture-change side effects.

use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::Result;

use crate::{
    capture,
    config::Settings,
    dashboard::DashboardState,
    gesture::{GestureKind, classify},
    osc::OscEmitter,
    pipeline::{FrameSource, LandmarkSource},
    render::OverlayRenderer,
    types::Frame,
};

const MIN_FRAME_INTERVAL: Duration = Duration::from_micros(1);

/// Where rendered frames go, and how the loop learns it should stop.
pub trait FrameDisplay {
    fn show(&mut self, frame: &Frame) -> Result<()>;
    fn should_quit(&mut self) -> bool;
}

#[derive(Clone, Debug, PartialEq)]
pub struct LoopSettings {
    pub mirror: bool,
    pub capture_frames_on_change: bool,
    pub frames_dir: PathBuf,
}

impl LoopSettings {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            mirror: settings.mirror,
            capture_frames_on_change: settings.capture_frames_on_change,
            frames_dir: settings.frames_dir.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    /// The display asked to stop.
    Quit,
    /// The frame source failed or went away.
    SourceEnded,
}

pub struct FrameLoop<S, L, D> {
    source: S,
    landmarks: L,
    display: D,
    renderer: OverlayRenderer,
    dashboard: Arc<DashboardState>,
    osc: Option<OscEmitter>,
    settings: LoopSettings,
    last_gesture: Option<GestureKind>,
    last_frame_at: Instant,
}

impl<S, L, D> FrameLoop<S, L, D>
where
    S: FrameSource,
    L: LandmarkSource,
    D: FrameDisplay,
{
    pub fn new(
        source: S,
        landmarks: L,
        display: D,
        renderer: OverlayRenderer,
        dashboard: Arc<DashboardState>,
        settings: LoopSettings,
    ) -> Self {
        Self {
            source,
            landmarks,
            display,
            renderer,
            dashboard,
            osc: None,
            settings,
            last_gesture: None,
            last_frame_at: Instant::now(),
        }
    }

    pub fn with_osc(mut self, osc: OscEmitter) -> Self {
        self.osc = Some(osc);
        self
    }

    /// Runs until the display quits or the source ends. Only a display
    /// failure is returned as an error.
    pub fn run(&mut self) -> Result<StepOutcome> {
        loop {
            match self.step()? {
                StepOutcome::Continue => {}
                outcome => {
                    log::info!("frame loop stopped: {outcome:?}");
                    return Ok(outcome);
                }
            }
        }
    }

    pub fn step(&mut self) -> Result<StepOutcome> {
        let mut frame = match self.source.next_frame() {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("frame grab failed: {err}");
                return Ok(StepOutcome::SourceEnded);
            }
        };
        if self.settings.mirror {
            frame.mirror_horizontally();
        }

        let hands = self.landmarks.detect(&frame).unwrap_or_else(|err| {
            log::warn!("landmark detection failed: {err:#}");
            Vec::new()
        });
        let gesture = classify(&hands);

        let now = Instant::now();
        let elapsed = now
            .saturating_duration_since(self.last_frame_at)
            .max(MIN_FRAME_INTERVAL);
        let fps = 1.0 / elapsed.as_secs_f64();
        self.last_frame_at = now;

        self.dashboard
            .update(gesture, fps, hands.first().map(|h| h.hand.planar()));

        if let Some(osc) = self.osc.as_mut() {
            osc.send_fps_throttled(fps, now);
            osc.send_landmarks(&hands);
        }

        let output = self.renderer.render(&frame, &hands, gesture, fps);

        if gesture != self.last_gesture {
            if let Some(gesture) = gesture {
                self.on_gesture_change(gesture, &output);
            }
            self.last_gesture = gesture;
        }

        self.display.show(&output)?;
        if self.display.should_quit() {
            return Ok(StepOutcome::Quit);
        }
        Ok(StepOutcome::Continue)
    }

    fn on_gesture_change(&self, gesture: GestureKind, output: &Frame) {
        log::info!("GESTURE: {} | SYMBOL: {}", gesture.name(), gesture.symbol());
        if let Some(osc) = &self.osc {
            osc.send_gesture(Some(gesture));
        }
        if self.settings.capture_frames_on_change {
            match capture::save_frame(output, &self.settings.frames_dir, gesture) {
                Ok(path) => log::debug!("saved {}", path.display()),
                Err(err) => log::warn!("failed to save gesture frame: {err:#}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, fs, net::UdpSocket, path::Path};

    use anyhow::anyhow;

    use super::*;
    use crate::{
        gesture::tests::{hand_with_reach, observed},
        osc::{GESTURE_ADDR, HANDEDNESS_ADDR, LANDMARKS_ADDR},
        pipeline::FrameSourceError,
        render::RenderOptions,
        types::FrameObservation,
    };

    struct ScriptedSource {
        frames: VecDeque<Frame>,
    }

    impl ScriptedSource {
        fn black(count: usize) -> Self {
            Self {
                frames: (0..count).map(|_| Frame::black(64, 48)).collect(),
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn next_frame(&mut self) -> Result<Frame, FrameSourceError> {
            self.frames.pop_front().ok_or(FrameSourceError::Disconnected)
        }
    }

    /// Replays one observation per frame; `None` entries fail detection.
    /// Records the top-left pixel of every frame it was given.
    #[derive(Default)]
    struct ScriptedLandmarks {
        script: VecDeque<Option<FrameObservation>>,
        seen_corner: Vec<Option<[u8; 4]>>,
    }

    impl ScriptedLandmarks {
        fn new(script: impl IntoIterator<Item = Option<FrameObservation>>) -> Self {
            Self {
                script: script.into_iter().collect(),
                seen_corner: Vec::new(),
            }
        }
    }

    impl LandmarkSource for ScriptedLandmarks {
        fn detect(&mut self, frame: &Frame) -> Result<FrameObservation> {
            self.seen_corner.push(frame.pixel(0, 0));
            match self.script.pop_front() {
                Some(Some(hands)) => Ok(hands),
                Some(None) => Err(anyhow!("model failure")),
                None => Ok(Vec::new()),
            }
        }
    }

    #[derive(Default)]
    struct RecordingDisplay {
        shown: usize,
        quit_after: Option<usize>,
    }

    impl FrameDisplay for RecordingDisplay {
        fn show(&mut self, _frame: &Frame) -> Result<()> {
            self.shown += 1;
            Ok(())
        }

        fn should_quit(&mut self) -> bool {
            self.quit_after.is_some_and(|n| self.shown >= n)
        }
    }

    fn fist() -> FrameObservation {
        vec![observed(hand_with_reach([0.5; 5]))]
    }

    fn open_palm() -> FrameObservation {
        vec![observed(hand_with_reach([2.0; 5]))]
    }

    fn renderer() -> OverlayRenderer {
        OverlayRenderer::new(RenderOptions {
            title: "test".to_string(),
            camera_background: false,
            draw_fps: true,
            constellation: None,
        })
    }

    fn build(
        source: ScriptedSource,
        landmarks: ScriptedLandmarks,
        display: RecordingDisplay,
        frames_dir: &Path,
    ) -> FrameLoop<ScriptedSource, ScriptedLandmarks, RecordingDisplay> {
        FrameLoop::new(
            source,
            landmarks,
            display,
            renderer(),
            Arc::new(DashboardState::new()),
            LoopSettings {
                mirror: false,
                capture_frames_on_change: true,
                frames_dir: frames_dir.to_path_buf(),
            },
        )
    }

    fn saved(frames_dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(frames_dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    #[test]
    fn repeated_gesture_saves_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let frames_dir = dir.path().join("frames");
        let mut frame_loop = build(
            ScriptedSource::black(3),
            ScriptedLandmarks::new([Some(fist()), Some(fist()), Some(fist())]),
            RecordingDisplay::default(),
            &frames_dir,
        );

        assert_eq!(frame_loop.run().expect("run"), StepOutcome::SourceEnded);

        let files = saved(&frames_dir);
        assert_eq!(files.len(), 1);
        assert!(files[0].starts_with("FIST_"));
        assert_eq!(frame_loop.display.shown, 3);
        assert_eq!(frame_loop.dashboard.get().gesture.as_deref(), Some("FIST"));
    }

    #[test]
    fn every_transition_into_a_gesture_fires() {
        let dir = tempfile::tempdir().expect("tempdir");
        let frames_dir = dir.path().join("frames");
        let mut frame_loop = build(
            ScriptedSource::black(5),
            ScriptedLandmarks::new([
                Some(fist()),
                Some(open_palm()),
                Some(open_palm()),
                Some(Vec::new()),
                Some(fist()),
            ]),
            RecordingDisplay::default(),
            &frames_dir,
        );

        frame_loop.run().expect("run");

        let files = saved(&frames_dir);
        assert_eq!(files.len(), 3);
        assert_eq!(files.iter().filter(|f| f.starts_with("FIST_")).count(), 2);
        assert_eq!(files.iter().filter(|f| f.starts_with("OPEN_PALM_")).count(), 1);
    }

    #[test]
    fn handless_frames_keep_last_landmarks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let frames_dir = dir.path().join("frames");
        let hand = fist();
        let script = std::iter::once(Some(hand.clone())).chain((0..10).map(|_| Some(Vec::new())));
        let mut frame_loop = build(
            ScriptedSource::black(11),
            ScriptedLandmarks::new(script),
            RecordingDisplay::default(),
            &frames_dir,
        );

        assert_eq!(frame_loop.step().expect("step"), StepOutcome::Continue);
        assert_eq!(saved(&frames_dir).len(), 1);

        for _ in 0..10 {
            assert_eq!(frame_loop.step().expect("step"), StepOutcome::Continue);
            let snapshot = frame_loop.dashboard.get();
            assert_eq!(snapshot.gesture, None);
            assert_eq!(snapshot.symbol, None);
            assert_eq!(snapshot.landmarks, hand[0].hand.planar());
        }
        assert_eq!(saved(&frames_dir).len(), 1);
    }

    #[test]
    fn handless_session_writes_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let frames_dir = dir.path().join("frames");
        let mut frame_loop = build(
            ScriptedSource::black(10),
            ScriptedLandmarks::default(),
            RecordingDisplay::default(),
            &frames_dir,
        );

        frame_loop.run().expect("run");

        assert!(saved(&frames_dir).is_empty());
        let snapshot = frame_loop.dashboard.get();
        assert_eq!(snapshot.gesture, None);
        assert!(snapshot.landmarks.is_empty());
        assert!(snapshot.fps > 0.0);
    }

    #[test]
    fn quit_stops_before_source_is_drained() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut frame_loop = build(
            ScriptedSource::black(10),
            ScriptedLandmarks::default(),
            RecordingDisplay {
                shown: 0,
                quit_after: Some(2),
            },
            dir.path(),
        );

        assert_eq!(frame_loop.run().expect("run"), StepOutcome::Quit);
        assert_eq!(frame_loop.display.shown, 2);
        assert_eq!(frame_loop.source.frames.len(), 8);
    }

    #[test]
    fn detection_failure_counts_as_no_hands() {
        let dir = tempfile::tempdir().expect("tempdir");
        let frames_dir = dir.path().join("frames");
        let mut frame_loop = build(
            ScriptedSource::black(3),
            ScriptedLandmarks::new([Some(fist()), None, Some(fist())]),
            RecordingDisplay::default(),
            &frames_dir,
        );

        assert_eq!(frame_loop.run().expect("run"), StepOutcome::SourceEnded);
        assert_eq!(frame_loop.display.shown, 3);
        assert_eq!(saved(&frames_dir).len(), 2);
    }

    #[test]
    fn capture_can_be_disabled() {
        let dir = tempfile::tempdir().expect("tempdir");
        let frames_dir = dir.path().join("frames");
        let mut frame_loop = build(
            ScriptedSource::black(2),
            ScriptedLandmarks::new([Some(fist()), Some(open_palm())]),
            RecordingDisplay::default(),
            &frames_dir,
        );
        frame_loop.settings.capture_frames_on_change = false;

        frame_loop.run().expect("run");
        assert!(saved(&frames_dir).is_empty());
    }

    #[test]
    fn mirroring_happens_before_detection() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut frame = Frame::black(4, 2);
        let right_edge = 3 * 4;
        frame.rgba[right_edge..right_edge + 4].copy_from_slice(&[200, 100, 50, 255]);

        let mut frame_loop = build(
            ScriptedSource {
                frames: VecDeque::from([frame]),
            },
            ScriptedLandmarks::default(),
            RecordingDisplay::default(),
            dir.path(),
        );
        frame_loop.settings.mirror = true;

        frame_loop.step().expect("step");
        assert_eq!(
            frame_loop.landmarks.seen_corner,
            vec![Some([200, 100, 50, 255])]
        );
    }

    fn osc_pair(send_landmarks: bool) -> (UdpSocket, OscEmitter) {
        let receiver = UdpSocket::bind("127.0.0.1:0").expect("bind");
        receiver
            .set_read_timeout(Some(Duration::from_millis(300)))
            .expect("timeout");
        let port = receiver.local_addr().expect("addr").port();
        let osc = OscEmitter::new("127.0.0.1", port, send_landmarks, Duration::from_secs(3600))
            .expect("emitter");
        (receiver, osc)
    }

    fn received(receiver: &UdpSocket) -> Vec<rosc::OscMessage> {
        let mut messages = Vec::new();
        let mut buf = [0u8; 4096];
        while let Ok((len, _)) = receiver.recv_from(&mut buf) {
            if let Ok((_, rosc::OscPacket::Message(msg))) = rosc::decoder::decode_udp(&buf[..len]) {
                messages.push(msg);
            }
        }
        messages
    }

    #[test]
    fn gesture_event_is_sent_once_per_transition() {
        let (receiver, osc) = osc_pair(false);

        let dir = tempfile::tempdir().expect("tempdir");
        let mut frame_loop = build(
            ScriptedSource::black(3),
            ScriptedLandmarks::new([Some(fist()), Some(fist()), Some(fist())]),
            RecordingDisplay::default(),
            dir.path(),
        )
        .with_osc(osc);
        frame_loop.run().expect("run");

        let addrs: Vec<String> = received(&receiver).into_iter().map(|m| m.addr).collect();
        assert_eq!(addrs.iter().filter(|a| *a == GESTURE_ADDR).count(), 1);
        // First frame always carries an fps sample; the long interval blocks the rest.
        assert_eq!(addrs.len(), 2);
    }

    #[test]
    fn landmarks_are_sent_every_frame_when_enabled() {
        let (receiver, osc) = osc_pair(true);

        let dir = tempfile::tempdir().expect("tempdir");
        let mut frame_loop = build(
            ScriptedSource::black(3),
            ScriptedLandmarks::new([Some(fist()), Some(Vec::new()), Some(fist())]),
            RecordingDisplay::default(),
            dir.path(),
        )
        .with_osc(osc);
        frame_loop.run().expect("run");

        let messages = received(&receiver);
        let landmarks: Vec<usize> = messages
            .iter()
            .filter(|m| m.addr == LANDMARKS_ADDR)
            .map(|m| m.args.len())
            .collect();
        assert_eq!(landmarks, vec![63, 0, 63]);
        assert_eq!(
            messages.iter().filter(|m| m.addr == HANDEDNESS_ADDR).count(),
            2
        );
    }
}
