//! Frame ingest and recovery state machine
//!
//! Consumes arriving compressed frames and their decode completions, detects
//! stutter and keyframe loss, keeps the bounded frame queue, and signals the
//! one-shot recovery actions (forced keyframe, encoder reset) the session
//! supervisor follows up on. The arrival path and the completion path run on
//! different execution contexts, so all shared counters and the queue sit
//! behind one mutex held for the minimum critical section.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::alert::AlertSink;
use crate::config::StreamConfig;
use crate::control::{self, ControlSink, EncoderConfig};
use crate::decode::{DecodeBackend, DecodeCompletion, FrameBuffer, ViewParams};
use crate::latency::LatencyTracker;
use crate::scene::{SceneAnalysisResult, SceneAnalyzer};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Drift above this is a stutter candidate.
const STUTTER_DRIFT: Duration = Duration::from_millis(40);
/// Drift above this qualifies regardless of event spacing.
const HEAVY_DRIFT: Duration = Duration::from_millis(100);
/// Spacing bounds for a qualifying stutter event.
const STUTTER_GAP_MIN: Duration = Duration::from_millis(250);
const STUTTER_GAP_MAX: Duration = Duration::from_secs(10);
/// Drift above this with a stale IDR is a lag spike.
const LAG_SPIKE_DRIFT: Duration = Duration::from_millis(600);
/// Frames without an IDR / without a decode before recovery kicks in.
const STALE_FRAME_LIMIT: u32 = 180;
/// Stutter accounting window and its alert threshold.
const INSTABILITY_WINDOW: Duration = Duration::from_secs(60);
const INSTABILITY_THRESHOLD: u32 = 50;
/// A decode slower than this is an overrun.
const DECODE_OVERRUN: Duration = Duration::from_millis(50);
/// Submissions we remember for arrival-to-enqueue latency tracking.
const IN_FLIGHT_CAPACITY: usize = 32;

/// Outcome of one frame arrival, consumed by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrivalOutcome {
    /// Rendering has not started; the frame was ignored.
    NotReady,
    /// The frame was dropped. When `request_keyframe` is set the caller must
    /// ask the sender for an IDR before the stream can resume.
    Rejected { request_keyframe: bool },
    /// The payload went to the decode backend.
    Submitted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// Decode exceeded its budget; an encoder reset was scheduled and the
    /// frame dropped.
    Overrun,
    /// The backend produced no image.
    Dropped,
    Enqueued,
}

/// One decoded frame waiting for the rendering consumer.
pub struct QueuedFrame {
    pub frame: FrameBuffer,
    pub timestamp_ns: u64,
    pub valid: bool,
    pub views: [ViewParams; 2],
}

/// FIFO of decoded frames, bounded to `optimal_size + 1`. Insertion evicts
/// oldest-first when capacity is exceeded.
pub struct FrameQueue {
    frames: VecDeque<QueuedFrame>,
    optimal_size: usize,
}

impl FrameQueue {
    pub fn new(optimal_size: usize) -> Self {
        Self {
            frames: VecDeque::new(),
            optimal_size,
        }
    }

    pub fn set_optimal_size(&mut self, optimal_size: usize) {
        self.optimal_size = optimal_size.max(1);
        self.evict();
    }

    pub fn push(&mut self, frame: QueuedFrame) {
        self.frames.push_back(frame);
        self.evict();
    }

    fn evict(&mut self) {
        while self.frames.len() > self.optimal_size + 1 {
            let evicted = self.frames.pop_front();
            if let Some(evicted) = evicted {
                debug!("evicting stale frame {}", evicted.timestamp_ns);
            }
        }
    }

    pub fn pop(&mut self) -> Option<QueuedFrame> {
        self.frames.pop_front()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Counters owned by the state machine, mutated under its lock.
#[derive(Debug, Default)]
struct RecoveryCounters {
    frames_since_last_idr: u32,
    frames_since_last_decode: u32,
    last_requested_timestamp_ns: u64,
    last_stutter: Option<Instant>,
    stutter_events: u32,
    stutter_sample_start: Option<Instant>,
    alerted_this_window: bool,
}

struct Shared {
    counters: RecoveryCounters,
    queue: FrameQueue,
    scene: SceneAnalyzer,
    latency: LatencyTracker,
    encoder_reset_pending: bool,
    /// Timestamp of the most recently enqueued frame. A repeated timestamp
    /// still takes the enqueue path; this field only feeds coalescing
    /// bookkeeping for the consumer.
    last_enqueued_timestamp_ns: Option<u64>,
    in_flight: VecDeque<(u64, Instant)>,
}

pub struct FrameIngest {
    shared: Mutex<Shared>,
    rendering_started: AtomicBool,
    keyframe_needed: AtomicBool,
    scene_analysis_enabled: bool,
    latency_tracking_enabled: bool,
    /// Queue depth ceiling from the configuration snapshot.
    queue_depth_cap: usize,
}

impl FrameIngest {
    pub fn new(config: &StreamConfig) -> Self {
        let cap = config
            .frame_queue_size
            .min(config.network_buffering_strategy.queue_ceiling())
            .max(1);
        Self {
            shared: Mutex::new(Shared {
                counters: RecoveryCounters::default(),
                queue: FrameQueue::new(1),
                scene: SceneAnalyzer::default(),
                latency: LatencyTracker::new(),
                encoder_reset_pending: false,
                last_enqueued_timestamp_ns: None,
                in_flight: VecDeque::with_capacity(IN_FLIGHT_CAPACITY),
            }),
            rendering_started: AtomicBool::new(false),
            keyframe_needed: AtomicBool::new(false),
            scene_analysis_enabled: config.dark_scene.enabled || config.motion.enabled,
            latency_tracking_enabled: config.network_buffering_strategy
                != crate::config::BufferingStrategy::Minimal,
            queue_depth_cap: cap,
        }
    }

    /// The rendering consumer has started pulling frames.
    pub fn set_rendering_started(&self) {
        self.rendering_started.store(true, Ordering::SeqCst);
    }

    pub fn rendering_started(&self) -> bool {
        self.rendering_started.load(Ordering::SeqCst)
    }

    /// One-shot keyframe flag for the supervisor's follow-up cadence.
    pub fn take_keyframe_needed(&self) -> bool {
        self.keyframe_needed.swap(false, Ordering::SeqCst)
    }

    /// Called when the pipeline explicitly requests a frame for a display
    /// refresh; arrival drift is measured against this.
    pub fn set_last_requested_timestamp(&self, timestamp_ns: u64) {
        let mut shared = self.shared.lock().unwrap();
        shared.counters.last_requested_timestamp_ns = timestamp_ns;
    }

    /// Zeroes the recovery counters, e.g. after a connection timeout report.
    pub fn reset_counters(&self) {
        let mut shared = self.shared.lock().unwrap();
        shared.counters.frames_since_last_idr = 0;
        shared.counters.frames_since_last_decode = 0;
    }

    pub fn latest_scene(&self) -> SceneAnalysisResult {
        self.shared.lock().unwrap().scene.latest()
    }

    pub fn average_latency_ms(&self) -> f64 {
        self.shared.lock().unwrap().latency.average_ms()
    }

    pub fn queue_len(&self) -> usize {
        self.shared.lock().unwrap().queue.len()
    }

    /// Pulls the current frame for one display refresh.
    pub fn pull_frame(&self) -> Option<QueuedFrame> {
        self.shared.lock().unwrap().queue.pop()
    }

    /// Ingest gate for one arriving compressed frame. See the module docs
    /// for the recovery rules; the happy path ends in `DecodeBackend::submit`
    /// with completion arriving on the session's channel.
    pub fn on_frame_arrival(
        &self,
        payload: &[u8],
        timestamp_ns: u64,
        is_idr: bool,
        now: Instant,
        backend: &mut dyn DecodeBackend,
        sink: &mut dyn ControlSink,
        encoder_config: &EncoderConfig,
        alerts: &mut dyn AlertSink,
    ) -> ArrivalOutcome {
        if !self.rendering_started() {
            return ArrivalOutcome::NotReady;
        }

        let mut shared = self.shared.lock().unwrap();

        if shared.encoder_reset_pending {
            shared.encoder_reset_pending = false;
            drop(shared);
            info!("Encoder reset pending: emitting encoder config instead of decoding.");
            control::send_encoder_config(sink, encoder_config);
            return ArrivalOutcome::Rejected {
                request_keyframe: false,
            };
        }

        let counters = &mut shared.counters;
        if is_idr {
            counters.frames_since_last_idr = 0;
        } else {
            counters.frames_since_last_idr += 1;
        }
        counters.frames_since_last_decode += 1;

        let drift_ns = counters
            .last_requested_timestamp_ns
            .saturating_sub(timestamp_ns);
        let drift = Duration::from_nanos(drift_ns);

        // Per-minute stutter window.
        let window_start = *counters.stutter_sample_start.get_or_insert(now);
        if now.duration_since(window_start) >= INSTABILITY_WINDOW {
            counters.stutter_sample_start = Some(now);
            counters.stutter_events = 0;
            counters.alerted_this_window = false;
        }

        if counters.stutter_events >= INSTABILITY_THRESHOLD {
            if !counters.alerted_this_window {
                counters.alerted_this_window = true;
                alerts.persistent_instability(counters.stutter_events);
            }
            counters.stutter_events = 0;
        }

        if drift > STUTTER_DRIFT {
            let spaced = counters
                .last_stutter
                .map(|last| {
                    let gap = now.duration_since(last);
                    (STUTTER_GAP_MIN..=STUTTER_GAP_MAX).contains(&gap)
                })
                .unwrap_or(false);
            if spaced || drift > HEAVY_DRIFT {
                counters.stutter_events += 1;
            }
            // Every candidate seeds the spacing clock, so sustained mild
            // drift qualifies on its own.
            counters.last_stutter = Some(now);
        }

        let lag_spiked =
            drift > LAG_SPIKE_DRIFT && counters.frames_since_last_idr > STALE_FRAME_LIMIT;
        if lag_spiked || counters.frames_since_last_decode > STALE_FRAME_LIMIT {
            warn!(
                "Dropping frame {} (drift {:?}, {} frames since IDR, {} since decode). \
                Requesting a keyframe.",
                timestamp_ns, drift, counters.frames_since_last_idr,
                counters.frames_since_last_decode
            );
            counters.frames_since_last_idr = 0;
            counters.frames_since_last_decode = 0;
            drop(shared);
            self.keyframe_needed.store(true, Ordering::SeqCst);
            return ArrivalOutcome::Rejected {
                request_keyframe: true,
            };
        }

        if shared.in_flight.len() == IN_FLIGHT_CAPACITY {
            shared.in_flight.pop_front();
        }
        shared.in_flight.push_back((timestamp_ns, now));
        drop(shared);

        match backend.submit(payload, timestamp_ns) {
            Ok(()) => ArrivalOutcome::Submitted,
            Err(e) => {
                warn!("Decode submit for frame {timestamp_ns} failed ({e})");
                self.keyframe_needed.store(true, Ordering::SeqCst);
                ArrivalOutcome::Rejected {
                    request_keyframe: true,
                }
            }
        }
    }

    /// Handles one asynchronous decode completion. May run on a different
    /// execution context than the arrival path; never sleeps.
    pub fn handle_completion(&self, completion: DecodeCompletion, now: Instant) -> CompletionOutcome {
        let mut shared = self.shared.lock().unwrap();

        let arrival = shared
            .in_flight
            .iter()
            .position(|(ts, _)| *ts == completion.timestamp_ns)
            .and_then(|idx| shared.in_flight.remove(idx))
            .map(|(_, at)| at);

        if completion.decode_time > DECODE_OVERRUN {
            warn!(
                "Decode of frame {} took {:?}; scheduling encoder reset.",
                completion.timestamp_ns, completion.decode_time
            );
            shared.encoder_reset_pending = true;
            shared.counters.frames_since_last_idr = 0;
            shared.counters.frames_since_last_decode = 0;
            return CompletionOutcome::Overrun;
        }

        let Some(frame) = completion.frame else {
            debug!("Backend dropped frame {}", completion.timestamp_ns);
            return CompletionOutcome::Dropped;
        };

        shared.counters.frames_since_last_decode = 0;

        if self.scene_analysis_enabled {
            shared.scene.analyze(&frame, now);
        }
        if self.latency_tracking_enabled {
            if let Some(arrival) = arrival {
                let latency_ms = now.duration_since(arrival).as_secs_f64() * 1000.0;
                shared.latency.record(latency_ms);
                let depth = shared
                    .latency
                    .recommended_queue_depth()
                    .min(self.queue_depth_cap);
                shared.queue.set_optimal_size(depth);
            }
        }

        // A repeated timestamp supersedes the bookkeeping entry but still
        // takes the enqueue path; the observed source never skipped it.
        shared.last_enqueued_timestamp_ns = Some(completion.timestamp_ns);
        shared.queue.push(QueuedFrame {
            frame,
            timestamp_ns: completion.timestamp_ns,
            valid: true,
            views: completion.views,
        });

        CompletionOutcome::Enqueued
    }
}
