//! HMD stream client binary.
//!
//! Wires the session supervisor to a local loopback session: a software
//! decode backend, synthetic frame and gaze producers, and logging sinks for
//! the outbound control channel. Platform integrations replace these
//! endpoints with their own `SessionIo` implementations.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

#[macro_use]
extern crate log;

#[macro_use]
extern crate serde_derive;

use docopt::Docopt;
use hmd_stream_client::alert::LogAlertSink;
use hmd_stream_client::config::{Capabilities, StreamConfig};
use hmd_stream_client::control::ControlSink;
use hmd_stream_client::decode::{
    Codec, DecodeBackend, DecodeCompletion, FormatDescriptor, FrameBuffer, ViewParams,
};
use hmd_stream_client::discovery::ServiceAdvertiser;
use hmd_stream_client::gaze::GazeSample;
use hmd_stream_client::session::{
    spawn_watchdog, EventSource, FramePacket, HapticsSink, SessionEvent, SessionIo,
    SessionSupervisor,
};
use image::GrayImage;
use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;
use std::thread::sleep;
use std::time::Duration;

const USAGE: &str = "
HMD stream client: receives a remote-rendered video stream and adapts bitrate and foveation to latency, scene content, and gaze.

Usage:
  hmd-stream-client [--settings=<file>]
  hmd-stream-client --check-settings [--settings=<file>]
  hmd-stream-client (--version | -v)
  hmd-stream-client (--help | -h)

Options:
    --settings=<file>   Settings file [default: settings.yaml]
    --check-settings    Load the settings file, print the resolved capabilities, and exit
    --version, -v       Show version
    --help, -h          Show help
";

#[derive(Debug, Clone, Deserialize)]
struct Args {
    flag_settings: String,
    flag_check_settings: bool,
}

const LOOPBACK_FPS: u64 = 72;
const LOOPBACK_VIEW_WIDTH: u32 = 2048;
const LOOPBACK_VIEW_HEIGHT: u32 = 2048;

/// Decodes nothing; completes every submission with a flat gray frame.
struct SoftwareDecodeBackend {
    completions: Option<Sender<DecodeCompletion>>,
}

impl DecodeBackend for SoftwareDecodeBackend {
    fn create_session(
        &mut self,
        codec: Codec,
        _config_bytes: &[u8],
        completions: Sender<DecodeCompletion>,
    ) -> io::Result<FormatDescriptor> {
        info!("Loopback decode session created for {:?}", codec);
        self.completions = Some(completions);
        Ok(FormatDescriptor {
            width: LOOPBACK_VIEW_WIDTH * 2,
            height: LOOPBACK_VIEW_HEIGHT,
        })
    }

    fn submit(&mut self, payload: &[u8], timestamp_ns: u64) -> io::Result<()> {
        let completions = self
            .completions
            .as_ref()
            .ok_or_else(|| io::Error::other("submit before session creation"))?;
        let shade = payload.first().copied().unwrap_or(0x80);
        let frame = GrayImage::from_pixel(64, 64, image::Luma([shade]));
        completions
            .send(DecodeCompletion {
                timestamp_ns,
                decode_time: Duration::from_millis(2),
                frame: Some(FrameBuffer::Luma(frame)),
                views: [ViewParams::default(); 2],
            })
            .map_err(io::Error::other)
    }
}

/// Scripted session events: decoder config, then streaming start.
struct ScriptedEvents {
    queue: VecDeque<SessionEvent>,
}

impl EventSource for ScriptedEvents {
    fn poll(&mut self) -> Option<SessionEvent> {
        self.queue.pop_front()
    }
}

struct LogControlSink;

impl ControlSink for LogControlSink {
    fn send(&mut self, message: &[u8]) -> io::Result<()> {
        debug!(
            "Control message: opcode {}, {} bytes",
            message.first().copied().unwrap_or(0xff),
            message.len()
        );
        Ok(())
    }
}

struct LogAdvertiser;

impl ServiceAdvertiser for LogAdvertiser {
    fn register(&mut self, properties: &[(&'static str, String)]) -> io::Result<()> {
        debug!("Service advertisement refreshed: {:?}", properties);
        Ok(())
    }
}

struct LogHaptics;

impl HapticsSink for LogHaptics {
    fn vibrate(&mut self, device_id: u64, duration_s: f64, frequency: f64, amplitude: f64) {
        debug!(
            "Haptics: device {device_id}, {duration_s:.2}s at {frequency:.0}Hz, amplitude {amplitude:.2}"
        );
    }
}

fn load_settings(path: &PathBuf) -> StreamConfig {
    match StreamConfig::load(path) {
        Ok(config) => config,
        Err(e) => {
            warn!(
                "Could not read settings from {} ({e}); using defaults.",
                path.display()
            );
            StreamConfig::default()
        }
    }
}

/// Feeds synthetic frames and a slow circular gaze sweep into the session.
fn spawn_loopback_producer(frames: Sender<FramePacket>, gaze: Sender<GazeSample>) {
    thread::spawn(move || {
        let spacing = Duration::from_nanos(1_000_000_000 / LOOPBACK_FPS);
        let mut timestamp_ns: u64 = 0;
        let mut elapsed_s: f64 = 0.0;
        let mut first = true;
        loop {
            let shade = (128.0 + 100.0 * (elapsed_s * 0.5).sin()) as u8;
            let packet = FramePacket {
                payload: vec![shade; 5000],
                timestamp_ns,
                is_idr: first,
            };
            first = false;
            if frames.send(packet).is_err() {
                return;
            }
            let angle = elapsed_s * 0.8;
            if gaze
                .send(GazeSample {
                    position: [0.3 * angle.cos(), 0.3 * angle.sin()],
                    timestamp_s: elapsed_s,
                })
                .is_err()
            {
                return;
            }
            timestamp_ns += spacing.as_nanos() as u64;
            elapsed_s += spacing.as_secs_f64();
            sleep(spacing);
        }
    });
}

fn main() -> io::Result<()> {
    let version = env!("CARGO_PKG_NAME").to_string() + ", version: " + env!("CARGO_PKG_VERSION");
    env_logger::init();

    let args: Args = Docopt::new(USAGE)
        .map(|d| d.help(true))
        .map(|d| d.version(Some(version)))
        .and_then(|d| d.deserialize())
        .unwrap_or_else(|e| e.exit());

    let settings_path = PathBuf::from(&args.flag_settings);
    let config = load_settings(&settings_path);

    if args.flag_check_settings {
        println!("{:#?}", Capabilities::resolve(&config));
        return Ok(());
    }

    let (frames_tx, frames_rx) = mpsc::channel();
    let (gaze_tx, gaze_rx) = mpsc::channel();
    let (completions_tx, completions_rx) = mpsc::channel();

    let events = ScriptedEvents {
        queue: VecDeque::from([
            SessionEvent::HudMessageUpdated("Loopback session starting".to_string()),
            SessionEvent::DecoderConfig {
                codec: if config.prefer_hevc {
                    Codec::Hevc
                } else {
                    Codec::H264
                },
                config_bytes: Vec::new(),
            },
            SessionEvent::StreamingStarted {
                encoding_gamma: 2.2,
                hdr_enabled: config.prefer_10bit,
                view_width: LOOPBACK_VIEW_WIDTH,
                view_height: LOOPBACK_VIEW_HEIGHT,
            },
        ]),
    };

    let io = SessionIo {
        events: Box::new(events),
        backend: Box::new(SoftwareDecodeBackend { completions: None }),
        sink: Box::new(LogControlSink),
        alerts: Box::new(LogAlertSink),
        haptics: Box::new(LogHaptics),
        advertiser: Box::new(LogAdvertiser),
        frames: frames_rx,
        gaze: gaze_rx,
        completions: completions_rx,
        completions_tx,
    };

    let heartbeat = Arc::new(AtomicU64::new(0));
    let backgrounded = Arc::new(AtomicBool::new(false));
    let restart_requested = Arc::new(AtomicBool::new(false));
    spawn_watchdog(
        Arc::clone(&heartbeat),
        Arc::clone(&backgrounded),
        Arc::clone(&restart_requested),
    );

    let mut supervisor = SessionSupervisor::new(
        config,
        Some(settings_path),
        io,
        heartbeat,
        Arc::clone(&restart_requested),
    );

    spawn_loopback_producer(frames_tx, gaze_tx);

    // The loopback consumer: drain decoded frames at display cadence.
    let ingest = supervisor.ingest();
    thread::spawn(move || loop {
        if let Some(frame) = ingest.pull_frame() {
            debug!("Presented frame at timestamp {}", frame.timestamp_ns);
        }
        sleep(Duration::from_nanos(1_000_000_000 / LOOPBACK_FPS));
    });
    supervisor.rendering_began();

    info!("Loopback session running.");
    loop {
        supervisor.run()?;
        warn!("Session loop restarting.");
    }
}
