//! OSC over UDP. Sends are fire-and-forget: nothing is acknowledged or
//! retried, and a failed send is logged at debug level and dropped.

use std::{
    net::{SocketAddr, ToSocketAddrs, UdpSocket},
    time::{Duration, Instant},
};

use anyhow::{Context, Result, anyhow};
use rosc::{OscMessage, OscPacket, OscType, encoder};

use crate::{gesture::GestureKind, types::HandObservation};

pub const GESTURE_ADDR: &str = "/thesidia/gesture";
pub const FPS_ADDR: &str = "/thesidia/fps";
pub const LANDMARKS_ADDR: &str = "/thesidia/hand/0/landmarks";
pub const HANDEDNESS_ADDR: &str = "/thesidia/hand/0/handedness";

/// Rate limit for the periodic fps metric.
#[derive(Clone, Debug)]
pub struct FpsThrottle {
    interval: Duration,
    last_sent: Option<Instant>,
}

impl FpsThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: None,
        }
    }

    /// True (and records `now`) when nothing was sent yet or the interval has
    /// elapsed since the last send.
    pub fn ready(&mut self, now: Instant) -> bool {
        let due = match self.last_sent {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };
        if due {
            self.last_sent = Some(now);
        }
        due
    }
}

pub struct OscEmitter {
    socket: UdpSocket,
    target: SocketAddr,
    send_landmarks: bool,
    fps_throttle: FpsThrottle,
}

impl OscEmitter {
    pub fn new(host: &str, port: u16, send_landmarks: bool, fps_interval: Duration) -> Result<Self> {
        let target = (host, port)
            .to_socket_addrs()
            .with_context(|| format!("failed to resolve OSC target {host}:{port}"))?
            .next()
            .ok_or_else(|| anyhow!("OSC target {host}:{port} resolved to nothing"))?;
        let bind_addr: SocketAddr = if target.is_ipv4() {
            ([0u8; 4], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind_addr).context("failed to bind OSC socket")?;
        socket
            .set_nonblocking(true)
            .context("failed to make OSC socket non-blocking")?;

        log::info!("sending OSC to {target}");
        Ok(Self {
            socket,
            target,
            send_landmarks,
            fps_throttle: FpsThrottle::new(fps_interval),
        })
    }

    /// Gesture-change event; an absent gesture goes out as `NONE` with an
    /// empty symbol.
    pub fn send_gesture(&self, gesture: Option<GestureKind>) {
        let (name, symbol) = gesture.map_or(("NONE", ""), |g| (g.name(), g.symbol()));
        self.send(
            GESTURE_ADDR,
            vec![
                OscType::String(name.to_string()),
                OscType::String(symbol.to_string()),
            ],
        );
    }

    pub fn send_fps(&self, fps: f64) {
        self.send(FPS_ADDR, vec![OscType::Float(fps as f32)]);
    }

    /// Sends fps if the throttle interval has passed. Returns whether it did.
    pub fn send_fps_throttled(&mut self, fps: f64, now: Instant) -> bool {
        if !self.fps_throttle.ready(now) {
            return false;
        }
        self.send_fps(fps);
        true
    }

    /// Flattened x,y,z of the first hand plus its handedness. With no hand an
    /// empty landmark message is sent so receivers can tell "gone" from
    /// "no update". Disabled unless landmark sending was requested.
    pub fn send_landmarks(&self, hands: &[HandObservation]) {
        if !self.send_landmarks {
            return;
        }
        let Some(first) = hands.first() else {
            self.send(LANDMARKS_ADDR, Vec::new());
            return;
        };

        let flat = first
            .hand
            .points()
            .iter()
            .flat_map(|p| [p.x, p.y, p.z])
            .map(OscType::Float)
            .collect();
        self.send(LANDMARKS_ADDR, flat);
        self.send(
            HANDEDNESS_ADDR,
            vec![OscType::String(first.handedness.label().to_string())],
        );
    }

    fn send(&self, addr: &str, args: Vec<OscType>) {
        let packet = OscPacket::Message(OscMessage {
            addr: addr.to_string(),
            args,
        });
        let bytes = match encoder::encode(&packet) {
            Ok(bytes) => bytes,
            Err(err) => {
                log::debug!("failed to encode OSC message {addr}: {err:?}");
                return;
            }
        };
        if let Err(err) = self.socket.send_to(&bytes, self.target) {
            log::debug!("OSC send to {} failed: {err}", self.target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        gesture::tests::{hand_with_reach, observed},
        types::Handedness,
    };

    fn receiver() -> (UdpSocket, u16) {
        let socket = UdpSocket::bind("127.0.0.1:0").expect("bind receiver");
        socket
            .set_read_timeout(Some(Duration::from_millis(500)))
            .expect("timeout");
        let port = socket.local_addr().expect("addr").port();
        (socket, port)
    }

    fn recv_message(socket: &UdpSocket) -> Option<OscMessage> {
        let mut buf = [0u8; 4096];
        let (len, _) = socket.recv_from(&mut buf).ok()?;
        match rosc::decoder::decode_udp(&buf[..len]).ok()?.1 {
            OscPacket::Message(msg) => Some(msg),
            OscPacket::Bundle(_) => None,
        }
    }

    fn emitter(port: u16, send_landmarks: bool) -> OscEmitter {
        OscEmitter::new("127.0.0.1", port, send_landmarks, Duration::from_millis(500))
            .expect("emitter")
    }

    #[test]
    fn throttle_limits_fps_rate() {
        let mut throttle = FpsThrottle::new(Duration::from_millis(500));
        let t0 = Instant::now();
        assert!(throttle.ready(t0));
        assert!(!throttle.ready(t0 + Duration::from_millis(300)));
        assert!(throttle.ready(t0 + Duration::from_millis(500)));
        assert!(!throttle.ready(t0 + Duration::from_millis(900)));
        assert!(throttle.ready(t0 + Duration::from_millis(1000)));
    }

    #[test]
    fn throttled_fps_sends_once_per_interval() {
        let (socket, port) = receiver();
        let mut osc = emitter(port, false);
        let t0 = Instant::now();

        assert!(osc.send_fps_throttled(30.0, t0));
        assert!(!osc.send_fps_throttled(31.0, t0 + Duration::from_millis(300)));
        assert!(osc.send_fps_throttled(32.0, t0 + Duration::from_millis(600)));

        let first = recv_message(&socket).expect("first fps");
        assert_eq!(first.addr, FPS_ADDR);
        assert_eq!(first.args, vec![OscType::Float(30.0)]);
        let second = recv_message(&socket).expect("second fps");
        assert_eq!(second.args, vec![OscType::Float(32.0)]);
        assert!(recv_message(&socket).is_none());
    }

    #[test]
    fn gesture_message_defaults_for_none() {
        let (socket, port) = receiver();
        let osc = emitter(port, false);

        osc.send_gesture(Some(GestureKind::OpenPalm));
        osc.send_gesture(None);

        let msg = recv_message(&socket).expect("gesture");
        assert_eq!(msg.addr, GESTURE_ADDR);
        assert_eq!(
            msg.args,
            vec![
                OscType::String("OPEN_PALM".into()),
                OscType::String("#FLAME[RISE]".into())
            ]
        );
        let msg = recv_message(&socket).expect("none gesture");
        assert_eq!(
            msg.args,
            vec![OscType::String("NONE".into()), OscType::String(String::new())]
        );
    }

    #[test]
    fn landmarks_flatten_first_hand() {
        let (socket, port) = receiver();
        let osc = emitter(port, true);
        let mut left = observed(hand_with_reach([0.5; 5]));
        left.handedness = Handedness::Left;
        let right = observed(hand_with_reach([2.0; 5]));

        osc.send_landmarks(&[left.clone(), right]);

        let msg = recv_message(&socket).expect("landmarks");
        assert_eq!(msg.addr, LANDMARKS_ADDR);
        assert_eq!(msg.args.len(), 63);
        assert_eq!(msg.args[0], OscType::Float(left.hand.point(0).x));
        assert_eq!(msg.args[62], OscType::Float(left.hand.point(20).z));

        let msg = recv_message(&socket).expect("handedness");
        assert_eq!(msg.addr, HANDEDNESS_ADDR);
        assert_eq!(msg.args, vec![OscType::String("Left".into())]);
    }

    #[test]
    fn missing_hand_sends_empty_landmarks() {
        let (socket, port) = receiver();
        let osc = emitter(port, true);
        osc.send_landmarks(&[]);

        let msg = recv_message(&socket).expect("empty landmarks");
        assert_eq!(msg.addr, LANDMARKS_ADDR);
        assert!(msg.args.is_empty());
        assert!(recv_message(&socket).is_none());
    }

    #[test]
    fn landmarks_disabled_sends_nothing() {
        let (socket, port) = receiver();
        let osc = emitter(port, false);
        osc.send_landmarks(&[]);
        assert!(recv_message(&socket).is_none());
    }

    #[test]
    fn unreachable_target_is_silent() {
        let osc = emitter(9, false);
        osc.send_gesture(Some(GestureKind::Fist));
        osc.send_fps(10.0);
    }
}
