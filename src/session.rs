//! Session supervision
//!
//! Owns the event-polling loop, the connection-state machine and the
//! watchdog. The poll loop drains session events, frame packets, decode
//! completions and gaze samples, runs the periodic controller ticks, and
//! follows up on the one-shot recovery flags the ingest side raises.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::alert::AlertSink;
use crate::bitrate::BitrateController;
use crate::config::{Capabilities, StreamConfig};
use crate::control::{self, ControlSink, EncoderConfig, FoveationMessage};
use crate::decode::{Codec, DecodeBackend, DecodeCompletion, FormatDescriptor};
use crate::discovery::{DiscoveryRefresher, ServiceAdvertiser};
use crate::foveation;
use crate::gaze::{GazePredictor, GazeSample};
use crate::ingest::FrameIngest;
use log::{debug, error, info, warn};
use std::io;
use std::path::PathBuf;
use std::process::exit;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};

/// Poll loop sleep between iterations.
const POLL_SLEEP: Duration = Duration::from_micros(500);
/// Periodic tick cadence (config refresh, controller ticks).
const TICK_INTERVAL: Duration = Duration::from_secs(5);
/// No frame for this long while initialized: request a keyframe.
const FRAME_STALL: Duration = Duration::from_secs(5);
/// No session activity for this long: forced fatal-decoder-error report.
const ACTIVITY_TIMEOUT_RENDERING: Duration = Duration::from_secs(20);
const ACTIVITY_TIMEOUT_IDLE: Duration = Duration::from_secs(30);
/// Watchdog check spacing and restart budget.
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(1);
const MAX_RESTART_ATTEMPTS: u32 = 3;
/// How far ahead the foveation solver asks the gaze predictor to look.
const GAZE_LOOKAHEAD_S: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Typed events from the negotiated session event source.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    HudMessageUpdated(String),
    StreamingStarted {
        encoding_gamma: f64,
        hdr_enabled: bool,
        view_width: u32,
        view_height: u32,
    },
    StreamingStopped,
    Haptics {
        device_id: u64,
        duration_s: f64,
        frequency: f64,
        amplitude: f64,
    },
    DecoderConfig {
        codec: Codec,
        config_bytes: Vec<u8>,
    },
}

/// Polled session event source collaborator.
pub trait EventSource: Send {
    fn poll(&mut self) -> Option<SessionEvent>;
}

pub trait HapticsSink: Send {
    fn vibrate(&mut self, device_id: u64, duration_s: f64, frequency: f64, amplitude: f64);
}

/// One arriving compressed frame from the transport.
#[derive(Debug)]
pub struct FramePacket {
    pub payload: Vec<u8>,
    pub timestamp_ns: u64,
    pub is_idr: bool,
}

/// Connection-state machine. Once local rendering has begun the state is
/// latched: further automatic transitions are suppressed so the UI never
/// flaps while the consumer is actively drawing frames.
#[derive(Debug)]
pub struct ConnectionTracker {
    state: ConnectionState,
    latched: bool,
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            latched: false,
        }
    }
}

impl ConnectionTracker {
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// One-way guard; there is deliberately no unlatch.
    pub fn latch_rendering(&mut self) {
        self.latched = true;
    }

    pub fn on_event(&mut self, event: &SessionEvent) {
        if self.latched {
            return;
        }
        self.state = match event {
            SessionEvent::HudMessageUpdated(_) | SessionEvent::DecoderConfig { .. } => {
                match self.state {
                    ConnectionState::Connected => ConnectionState::Connected,
                    _ => ConnectionState::Connecting,
                }
            }
            SessionEvent::StreamingStarted { .. } => ConnectionState::Connected,
            SessionEvent::StreamingStopped => ConnectionState::Disconnected,
            SessionEvent::Haptics { .. } => self.state,
        };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogVerdict {
    Healthy,
    /// The loop is stalled; ask it to restart.
    Restart,
    /// Restarts had no effect; terminate the process.
    Fatal,
    /// The process moved to background; exit proactively.
    BackgroundExit,
}

/// Heartbeat checker driven by the watchdog thread. The poll loop bumps the
/// counter once per iteration; a frozen counter means the loop is stuck.
#[derive(Debug)]
pub struct Watchdog {
    heartbeat: Arc<AtomicU64>,
    backgrounded: Arc<AtomicBool>,
    last_seen: u64,
    restart_attempts: u32,
}

impl Watchdog {
    pub fn new(heartbeat: Arc<AtomicU64>, backgrounded: Arc<AtomicBool>) -> Self {
        Self {
            heartbeat,
            backgrounded,
            last_seen: 0,
            restart_attempts: 0,
        }
    }

    pub fn check(&mut self) -> WatchdogVerdict {
        if self.backgrounded.load(Ordering::SeqCst) {
            return WatchdogVerdict::BackgroundExit;
        }

        let current = self.heartbeat.load(Ordering::SeqCst);
        if current != self.last_seen {
            self.last_seen = current;
            self.restart_attempts = 0;
            return WatchdogVerdict::Healthy;
        }

        self.restart_attempts += 1;
        if self.restart_attempts > MAX_RESTART_ATTEMPTS {
            WatchdogVerdict::Fatal
        } else {
            WatchdogVerdict::Restart
        }
    }
}

/// Spawns the watchdog loop on its own thread. `restart_requested` is the
/// cooperative signal the poll loop honors between iterations; a loop too
/// stuck to honor it gets the process terminated.
pub fn spawn_watchdog(
    heartbeat: Arc<AtomicU64>,
    backgrounded: Arc<AtomicBool>,
    restart_requested: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let mut watchdog = Watchdog::new(heartbeat, backgrounded);
        loop {
            sleep(WATCHDOG_INTERVAL);
            match watchdog.check() {
                WatchdogVerdict::Healthy => {}
                WatchdogVerdict::Restart => {
                    warn!("Event loop heartbeat is stale. Requesting a loop restart.");
                    restart_requested.store(true, Ordering::SeqCst);
                }
                WatchdogVerdict::Fatal => {
                    error!("Event loop did not recover after restart requests. Terminating.");
                    exit(1);
                }
                WatchdogVerdict::BackgroundExit => {
                    info!("Process moved to background. Exiting.");
                    exit(0);
                }
            }
        }
    })
}

/// All collaborator endpoints the supervisor drives. Constructed once at
/// session start and torn down when the loop returns.
pub struct SessionIo {
    pub events: Box<dyn EventSource>,
    pub backend: Box<dyn DecodeBackend>,
    pub sink: Box<dyn ControlSink>,
    pub alerts: Box<dyn AlertSink>,
    pub haptics: Box<dyn HapticsSink>,
    pub advertiser: Box<dyn ServiceAdvertiser>,
    pub frames: Receiver<FramePacket>,
    pub gaze: Receiver<GazeSample>,
    pub completions: Receiver<DecodeCompletion>,
    pub completions_tx: Sender<DecodeCompletion>,
}

pub struct SessionSupervisor {
    config_path: Option<PathBuf>,
    config: StreamConfig,
    ingest: Arc<FrameIngest>,
    predictor: GazePredictor,
    bitrate: BitrateController,
    discovery: DiscoveryRefresher,
    connection: ConnectionTracker,
    io: SessionIo,
    heartbeat: Arc<AtomicU64>,
    restart_requested: Arc<AtomicBool>,
    streaming: bool,
    decoder_initialized: bool,
    view_width: u32,
    view_height: u32,
    session_start: Instant,
    last_frame_at: Option<Instant>,
    last_activity_at: Instant,
    last_tick_at: Option<Instant>,
}

impl SessionSupervisor {
    pub fn new(
        config: StreamConfig,
        config_path: Option<PathBuf>,
        io: SessionIo,
        heartbeat: Arc<AtomicU64>,
        restart_requested: Arc<AtomicBool>,
    ) -> Self {
        let capabilities = Capabilities::resolve(&config);
        let ingest = Arc::new(FrameIngest::new(&config));
        let bitrate = BitrateController::new(&config.bitrate);
        let discovery = DiscoveryRefresher::new(capabilities);
        Self {
            config_path,
            config,
            ingest,
            predictor: GazePredictor::default(),
            bitrate,
            discovery,
            connection: ConnectionTracker::default(),
            io,
            heartbeat,
            restart_requested,
            streaming: false,
            decoder_initialized: false,
            view_width: 0,
            view_height: 0,
            session_start: Instant::now(),
            last_frame_at: None,
            last_activity_at: Instant::now(),
            last_tick_at: None,
        }
    }

    pub fn ingest(&self) -> Arc<FrameIngest> {
        Arc::clone(&self.ingest)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Runs the poll loop until a restart is requested. The caller wraps
    /// this in its own retry loop.
    pub fn run(&mut self) -> io::Result<()> {
        info!("Session loop running.");
        loop {
            if self.restart_requested.swap(false, Ordering::SeqCst) {
                warn!("Restart requested; leaving the session loop.");
                return Ok(());
            }
            self.iterate(Instant::now());
            sleep(POLL_SLEEP);
        }
    }

    /// One poll-loop iteration. Split out so the loop body is testable with
    /// an injected clock.
    pub fn iterate(&mut self, now: Instant) {
        self.heartbeat.fetch_add(1, Ordering::SeqCst);

        while let Some(event) = self.io.events.poll() {
            self.handle_event(event, now);
        }
        self.drain_frames(now);
        self.drain_completions(now);
        self.drain_gaze();

        self.discovery
            .tick(self.io.advertiser.as_mut(), now, self.streaming);
        self.periodic_tick(now);
        self.check_stalls(now);
    }

    fn handle_event(&mut self, event: SessionEvent, now: Instant) {
        self.last_activity_at = now;
        self.connection.on_event(&event);

        match event {
            SessionEvent::HudMessageUpdated(text) => {
                self.io.alerts.hud_message(&text);
            }
            SessionEvent::StreamingStarted {
                encoding_gamma,
                hdr_enabled,
                view_width,
                view_height,
            } => {
                info!(
                    "Streaming started: {}x{} per eye, gamma {:.2}, hdr {}",
                    view_width, view_height, encoding_gamma, hdr_enabled
                );
                self.streaming = true;
                self.view_width = view_width;
                self.view_height = view_height;
                let encoder = EncoderConfig::from_config(&self.config, self.bitrate.current());
                control::send_encoder_config(self.io.sink.as_mut(), &encoder);
            }
            SessionEvent::StreamingStopped => {
                info!("Streaming stopped.");
                self.streaming = false;
            }
            SessionEvent::Haptics {
                device_id,
                duration_s,
                frequency,
                amplitude,
            } => {
                self.io
                    .haptics
                    .vibrate(device_id, duration_s, frequency, amplitude);
            }
            SessionEvent::DecoderConfig { codec, config_bytes } => {
                match self.io.backend.create_session(
                    codec,
                    &config_bytes,
                    self.io.completions_tx.clone(),
                ) {
                    Ok(FormatDescriptor { width, height }) => {
                        info!("Decode session created: {:?}, {}x{}", codec, width, height);
                        self.decoder_initialized = true;
                    }
                    Err(e) => {
                        error!("Failed to create decode session ({e})");
                        self.io.alerts.fatal_decoder_error(&e.to_string());
                    }
                }
            }
        }
    }

    fn drain_frames(&mut self, now: Instant) {
        loop {
            let packet = match self.io.frames.try_recv() {
                Ok(packet) => packet,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            };
            self.last_activity_at = now;
            self.last_frame_at = Some(now);

            // Rejections raise the one-shot keyframe flag; check_stalls
            // follows up so each rejection sends exactly one request.
            let encoder = EncoderConfig::from_config(&self.config, self.bitrate.current());
            self.ingest.on_frame_arrival(
                &packet.payload,
                packet.timestamp_ns,
                packet.is_idr,
                now,
                self.io.backend.as_mut(),
                self.io.sink.as_mut(),
                &encoder,
                self.io.alerts.as_mut(),
            );
        }
    }

    fn drain_completions(&mut self, now: Instant) {
        while let Ok(completion) = self.io.completions.try_recv() {
            self.ingest.handle_completion(completion, now);
        }
    }

    fn drain_gaze(&mut self) {
        let mut updated = false;
        while let Ok(sample) = self.io.gaze.try_recv() {
            self.predictor.update(sample.position, sample.timestamp_s);
            updated = true;
        }
        if updated && self.streaming && self.config.foveation.enabled {
            self.emit_foveation();
        }
    }

    fn emit_foveation(&mut self) {
        let gaze = self
            .config
            .foveation
            .follow_gaze
            .then(|| self.predictor.predict(GAZE_LOOKAHEAD_S));
        let scene = self.ingest.latest_scene();
        let parameters = foveation::solve(
            &self.config.foveation,
            &self.config.dark_scene,
            &self.config.motion,
            self.view_width.max(1),
            self.view_height.max(1),
            gaze,
            Some(scene),
        );
        let message = FoveationMessage {
            enabled: self.config.foveation.enabled,
            dynamic: self.config.foveation.dynamic,
            strength: self.config.foveation.strength,
            parameters,
        };
        control::send_foveation_params(self.io.sink.as_mut(), &message);
    }

    fn periodic_tick(&mut self, now: Instant) {
        if let Some(last) = self.last_tick_at {
            if now.duration_since(last) < TICK_INTERVAL {
                return;
            }
        }
        self.last_tick_at = Some(now);

        self.refresh_config();

        if let Some(bitrate) = self.bitrate.tick(
            now,
            Some(self.ingest.latest_scene()),
            &self.config.dark_scene,
            &self.config.motion,
            self.streaming,
        ) {
            control::send_bitrate_update(self.io.sink.as_mut(), bitrate);
        }
        if self.streaming && self.config.foveation.enabled {
            self.emit_foveation();
        }
    }

    fn refresh_config(&mut self) {
        let Some(path) = &self.config_path else {
            return;
        };
        match StreamConfig::load(path) {
            Ok(config) => {
                self.bitrate.set_bounds(&config.bitrate);
                self.discovery
                    .set_capabilities(Capabilities::resolve(&config));
                self.config = config;
            }
            Err(e) => {
                debug!("Config refresh failed ({e}); keeping the previous snapshot.");
            }
        }
    }

    fn check_stalls(&mut self, now: Instant) {
        // Ingest-raised one-shot keyframe flag.
        if self.ingest.take_keyframe_needed() {
            control::send_keyframe_request(self.io.sink.as_mut());
        }

        // Transport stall: no frame for FRAME_STALL while initialized.
        if self.decoder_initialized {
            let reference = self.last_frame_at.unwrap_or(self.session_start);
            if now.duration_since(reference) >= FRAME_STALL {
                debug!("No frame for {:?}; requesting a keyframe.", FRAME_STALL);
                control::send_keyframe_request(self.io.sink.as_mut());
                self.last_frame_at = Some(now);
            }
        }

        // Connection timeout: forced fatal-decoder-error report, local reset.
        let timeout = if self.ingest.rendering_started() {
            ACTIVITY_TIMEOUT_RENDERING
        } else {
            ACTIVITY_TIMEOUT_IDLE
        };
        if now.duration_since(self.last_activity_at) >= timeout {
            warn!("No session activity for {:?}.", timeout);
            self.io
                .alerts
                .fatal_decoder_error("connection timed out waiting for session activity");
            self.ingest.reset_counters();
            self.last_activity_at = now;
        }
    }

    /// The rendering consumer announces it is drawing; latches the
    /// connection state.
    pub fn rendering_began(&mut self) {
        self.ingest.set_rendering_started();
        self.connection.latch_rendering();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};

    struct NullBackend;
    impl DecodeBackend for NullBackend {
        fn create_session(
            &mut self,
            _codec: Codec,
            _config_bytes: &[u8],
            _completions: Sender<DecodeCompletion>,
        ) -> io::Result<FormatDescriptor> {
            Ok(FormatDescriptor {
                width: 1920,
                height: 1824,
            })
        }
        fn submit(&mut self, _payload: &[u8], _timestamp_ns: u64) -> io::Result<()> {
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct SharedSink {
        messages: Arc<Mutex<Vec<Vec<u8>>>>,
    }
    impl ControlSink for SharedSink {
        fn send(&mut self, message: &[u8]) -> io::Result<()> {
            self.messages.lock().unwrap().push(message.to_vec());
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct SharedAlerts {
        fatal: Arc<Mutex<Vec<String>>>,
        hud: Arc<Mutex<Vec<String>>>,
    }
    impl AlertSink for SharedAlerts {
        fn persistent_instability(&mut self, _events_in_window: u32) {}
        fn fatal_decoder_error(&mut self, reason: &str) {
            self.fatal.lock().unwrap().push(reason.to_string());
        }
        fn hud_message(&mut self, text: &str) {
            self.hud.lock().unwrap().push(text.to_string());
        }
    }

    #[derive(Clone, Default)]
    struct SharedHaptics {
        pulses: Arc<Mutex<Vec<u64>>>,
    }
    impl HapticsSink for SharedHaptics {
        fn vibrate(&mut self, device_id: u64, _d: f64, _f: f64, _a: f64) {
            self.pulses.lock().unwrap().push(device_id);
        }
    }

    struct NullAdvertiser;
    impl ServiceAdvertiser for NullAdvertiser {
        fn register(&mut self, _properties: &[(&'static str, String)]) -> io::Result<()> {
            Ok(())
        }
    }

    struct Fixture {
        supervisor: SessionSupervisor,
        sink: SharedSink,
        alerts: SharedAlerts,
        haptics: SharedHaptics,
        events: Arc<Mutex<VecDeque<SessionEvent>>>,
        frames_tx: Sender<FramePacket>,
        gaze_tx: Sender<GazeSample>,
    }

    struct SharedEvents(Arc<Mutex<VecDeque<SessionEvent>>>);
    impl EventSource for SharedEvents {
        fn poll(&mut self) -> Option<SessionEvent> {
            self.0.lock().unwrap().pop_front()
        }
    }

    fn fixture() -> Fixture {
        let sink = SharedSink::default();
        let alerts = SharedAlerts::default();
        let haptics = SharedHaptics::default();
        let events = Arc::new(Mutex::new(VecDeque::new()));
        let (frames_tx, frames_rx) = mpsc::channel();
        let (gaze_tx, gaze_rx) = mpsc::channel();
        let (completions_tx, completions_rx) = mpsc::channel();
        let io = SessionIo {
            events: Box::new(SharedEvents(Arc::clone(&events))),
            backend: Box::new(NullBackend),
            sink: Box::new(sink.clone()),
            alerts: Box::new(alerts.clone()),
            haptics: Box::new(haptics.clone()),
            advertiser: Box::new(NullAdvertiser),
            frames: frames_rx,
            gaze: gaze_rx,
            completions: completions_rx,
            completions_tx,
        };
        let supervisor = SessionSupervisor::new(
            StreamConfig::default(),
            None,
            io,
            Arc::new(AtomicU64::new(0)),
            Arc::new(AtomicBool::new(false)),
        );
        Fixture {
            supervisor,
            sink,
            alerts,
            haptics,
            events,
            frames_tx,
            gaze_tx,
        }
    }

    fn streaming_started() -> SessionEvent {
        SessionEvent::StreamingStarted {
            encoding_gamma: 2.2,
            hdr_enabled: false,
            view_width: 2048,
            view_height: 2048,
        }
    }

    #[test]
    fn connection_state_follows_events_until_latched() {
        let mut tracker = ConnectionTracker::default();
        assert_eq!(tracker.state(), ConnectionState::Disconnected);

        tracker.on_event(&SessionEvent::HudMessageUpdated("pairing".into()));
        assert_eq!(tracker.state(), ConnectionState::Connecting);

        tracker.on_event(&streaming_started());
        assert_eq!(tracker.state(), ConnectionState::Connected);

        tracker.latch_rendering();
        tracker.on_event(&SessionEvent::StreamingStopped);
        // Latched: the displayed state no longer flaps.
        assert_eq!(tracker.state(), ConnectionState::Connected);
    }

    #[test]
    fn unlatched_stop_disconnects() {
        let mut tracker = ConnectionTracker::default();
        tracker.on_event(&streaming_started());
        tracker.on_event(&SessionEvent::StreamingStopped);
        assert_eq!(tracker.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn watchdog_escalates_after_bounded_restarts() {
        let heartbeat = Arc::new(AtomicU64::new(0));
        let backgrounded = Arc::new(AtomicBool::new(false));
        let mut watchdog = Watchdog::new(Arc::clone(&heartbeat), backgrounded);

        heartbeat.store(1, Ordering::SeqCst);
        assert_eq!(watchdog.check(), WatchdogVerdict::Healthy);

        // Frozen heartbeat: bounded restarts, then fatal.
        for _ in 0..MAX_RESTART_ATTEMPTS {
            assert_eq!(watchdog.check(), WatchdogVerdict::Restart);
        }
        assert_eq!(watchdog.check(), WatchdogVerdict::Fatal);

        // Recovery resets the budget.
        heartbeat.store(2, Ordering::SeqCst);
        assert_eq!(watchdog.check(), WatchdogVerdict::Healthy);
    }

    #[test]
    fn watchdog_exits_on_backgrounding() {
        let backgrounded = Arc::new(AtomicBool::new(true));
        let mut watchdog = Watchdog::new(Arc::new(AtomicU64::new(0)), backgrounded);
        assert_eq!(watchdog.check(), WatchdogVerdict::BackgroundExit);
    }

    #[test]
    fn haptics_events_reach_the_sink() {
        let mut fixture = fixture();
        fixture.events.lock().unwrap().push_back(SessionEvent::Haptics {
            device_id: 7,
            duration_s: 0.1,
            frequency: 160.0,
            amplitude: 0.7,
        });
        fixture.supervisor.iterate(Instant::now());
        assert_eq!(*fixture.haptics.pulses.lock().unwrap(), vec![7]);
    }

    #[test]
    fn streaming_start_emits_encoder_config() {
        let mut fixture = fixture();
        fixture.events.lock().unwrap().push_back(streaming_started());
        fixture.supervisor.iterate(Instant::now());
        let messages = fixture.sink.messages.lock().unwrap();
        assert!(messages
            .iter()
            .any(|m| m[0] == control::OPCODE_ENCODER_CONFIG));
    }

    #[test]
    fn frame_stall_requests_keyframe() {
        let mut fixture = fixture();
        let start = Instant::now();
        fixture
            .events
            .lock()
            .unwrap()
            .push_back(SessionEvent::DecoderConfig {
                codec: Codec::H264,
                config_bytes: vec![],
            });
        fixture.supervisor.iterate(start);
        assert!(fixture.sink.messages.lock().unwrap().is_empty());

        fixture.supervisor.iterate(start + FRAME_STALL);
        let messages = fixture.sink.messages.lock().unwrap();
        assert!(messages
            .iter()
            .any(|m| m[0] == control::OPCODE_KEYFRAME_REQUEST));
    }

    #[test]
    fn activity_timeout_reports_fatal_decoder_error_once() {
        let mut fixture = fixture();
        let start = Instant::now();
        fixture.supervisor.iterate(start);
        fixture.supervisor.iterate(start + ACTIVITY_TIMEOUT_IDLE);
        assert_eq!(fixture.alerts.fatal.lock().unwrap().len(), 1);

        // The activity clock was reset; no repeat on the next iteration.
        fixture
            .supervisor
            .iterate(start + ACTIVITY_TIMEOUT_IDLE + Duration::from_secs(1));
        assert_eq!(fixture.alerts.fatal.lock().unwrap().len(), 1);
    }

    #[test]
    fn gaze_samples_drive_foveation_messages_while_streaming() {
        let mut fixture = fixture();
        let start = Instant::now();
        fixture.events.lock().unwrap().push_back(streaming_started());
        fixture.supervisor.rendering_began();
        fixture.supervisor.iterate(start);

        fixture
            .gaze_tx
            .send(GazeSample {
                position: [0.1, -0.05],
                timestamp_s: 0.5,
            })
            .unwrap();
        fixture.supervisor.iterate(start + Duration::from_millis(1));

        let messages = fixture.sink.messages.lock().unwrap();
        assert!(messages
            .iter()
            .any(|m| m[0] == control::OPCODE_FOVEATION_PARAMS));
    }

    #[test]
    fn rejected_frame_triggers_keyframe_request() {
        let mut fixture = fixture();
        let start = Instant::now();
        fixture.events.lock().unwrap().push_back(streaming_started());
        fixture.supervisor.rendering_began();
        fixture.supervisor.iterate(start);
        fixture.sink.messages.lock().unwrap().clear();

        // 181 arrivals with no decode completions exhaust the stale-decode
        // budget and force a keyframe request.
        for i in 0..181u64 {
            fixture
                .frames_tx
                .send(FramePacket {
                    payload: vec![0u8; 8],
                    timestamp_ns: i,
                    is_idr: false,
                })
                .unwrap();
        }
        fixture.supervisor.iterate(start + Duration::from_millis(2));
        let requests = fixture
            .sink
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m[0] == control::OPCODE_KEYFRAME_REQUEST)
            .count();
        assert_eq!(requests, 1);
    }

    #[test]
    fn rendering_shortens_the_activity_timeout() {
        let mut fixture = fixture();
        let start = Instant::now();
        fixture.supervisor.rendering_began();
        fixture.supervisor.iterate(start);
        assert!(fixture.alerts.fatal.lock().unwrap().is_empty());

        fixture
            .supervisor
            .iterate(start + ACTIVITY_TIMEOUT_RENDERING);
        assert_eq!(fixture.alerts.fatal.lock().unwrap().len(), 1);
    }
}
