//! Live dashboard: the shared per-frame snapshot and the HTTP endpoint that
//! serves it.
//!
//! The frame loop is the only writer; HTTP handlers read on their own
//! threads. One [`DashboardState`] is created at startup, shared through an
//! `Arc`, and lives until the process exits.

mod server;

use parking_lot::Mutex;
use serde::Serialize;

use crate::gesture::GestureKind;

pub use server::spawn_dashboard_server;

/// What `/state` reports.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DashboardSnapshot {
    pub gesture: Option<String>,
    pub symbol: Option<String>,
    pub fps: f64,
    /// Normalized (x, y) of the most recently seen first hand.
    pub landmarks: Vec<[f32; 2]>,
}

#[derive(Debug, Default)]
pub struct DashboardState {
    snapshot: Mutex<DashboardSnapshot>,
}

impl DashboardState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces gesture, symbol and fps. Landmarks are replaced only when
    /// given, so the last seen hand stays on screen through detection gaps.
    pub fn update(&self, gesture: Option<GestureKind>, fps: f64, landmarks: Option<Vec<[f32; 2]>>) {
        let mut snapshot = self.snapshot.lock();
        snapshot.gesture = gesture.map(|g| g.name().to_string());
        snapshot.symbol = gesture.map(|g| g.symbol().to_string());
        snapshot.fps = fps.max(0.0);
        if let Some(landmarks) = landmarks {
            snapshot.landmarks = landmarks;
        }
    }

    /// Owned copy of the current snapshot.
    pub fn get(&self) -> DashboardSnapshot {
        self.snapshot.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn starts_empty() {
        let state = DashboardState::new();
        assert_eq!(state.get(), DashboardSnapshot::default());
    }

    #[test]
    fn update_sets_name_and_symbol_together() {
        let state = DashboardState::new();
        state.update(Some(GestureKind::Point), 29.5, None);
        let snap = state.get();
        assert_eq!(snap.gesture.as_deref(), Some("POINT"));
        assert_eq!(snap.symbol.as_deref(), Some("#ARROW[TRUE]"));
        assert_eq!(snap.fps, 29.5);

        state.update(None, 30.0, None);
        let snap = state.get();
        assert_eq!(snap.gesture, None);
        assert_eq!(snap.symbol, None);
    }

    #[test]
    fn landmarks_survive_empty_frames() {
        let state = DashboardState::new();
        let seen = vec![[0.1, 0.2]; 21];
        state.update(Some(GestureKind::Fist), 30.0, Some(seen.clone()));
        for _ in 0..10 {
            state.update(None, 30.0, None);
        }
        assert_eq!(state.get().landmarks, seen);
    }

    #[test]
    fn get_returns_a_detached_copy() {
        let state = DashboardState::new();
        state.update(Some(GestureKind::OpenPalm), 12.0, Some(vec![[0.5, 0.5]]));

        let mut copy = state.get();
        copy.landmarks.clear();
        copy.gesture = Some("MUTATED".to_string());
        copy.fps = -1.0;

        let fresh = state.get();
        assert_eq!(fresh.landmarks, vec![[0.5, 0.5]]);
        assert_eq!(fresh.gesture.as_deref(), Some("OPEN_PALM"));
        assert_eq!(fresh.fps, 12.0);
    }

    #[test]
    fn concurrent_readers_see_consistent_snapshots() {
        let state = Arc::new(DashboardState::new());
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let state = Arc::clone(&state);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let snap = state.get();
                        assert_eq!(snap.gesture.is_some(), snap.symbol.is_some());
                    }
                })
            })
            .collect();

        for i in 0..500 {
            let gesture = (i % 2 == 0).then_some(GestureKind::Fist);
            state.update(gesture, i as f64, Some(vec![[0.0, 0.0]; 21]));
        }
        for reader in readers {
            reader.join().expect("reader thread");
        }
    }

    #[test]
    fn serializes_to_dashboard_json() {
        let state = DashboardState::new();
        state.update(Some(GestureKind::Fist), 25.0, Some(vec![[0.25, 0.75]]));
        let json = serde_json::to_value(state.get()).expect("serializable");
        assert_eq!(
            json,
            serde_json::json!({
                "gesture": "FIST",
                "symbol": "#STONE[SEAL]",
                "fps": 25.0,
                "landmarks": [[0.25, 0.75]],
            })
        );
    }
}
