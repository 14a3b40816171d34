//! User-facing alert collaborator
//!
//! Transient stream anomalies recover locally and never reach this sink;
//! only supervisor-level unresponsiveness and instability crossing its
//! threshold are surfaced.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use log::{info, warn};

pub trait AlertSink: Send {
    /// Suppressible notice that the stream has crossed the per-minute
    /// stutter threshold.
    fn persistent_instability(&mut self, events_in_window: u32);

    /// Forced fatal-decoder-error report after a connection timeout. Not
    /// process-fatal; the session restarts its counters.
    fn fatal_decoder_error(&mut self, reason: &str);

    /// HUD text pushed by the sender.
    fn hud_message(&mut self, text: &str);
}

/// Default sink for headless runs: everything goes to the log.
#[derive(Debug, Default)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn persistent_instability(&mut self, events_in_window: u32) {
        warn!(
            "Streaming is unstable: {events_in_window} stutter events within the last minute. \
            Check the network link."
        );
    }

    fn fatal_decoder_error(&mut self, reason: &str) {
        warn!("Decoder error: {reason}");
    }

    fn hud_message(&mut self, text: &str) {
        info!("HUD: {text}");
    }
}
