//! Outbound control messages
//!
//! Fire-and-forget messages back to the sender: bitrate updates, encoder
//! configuration, foveation parameters. Framed as an opcode byte followed by
//! a bincode body; no acknowledgment is expected.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::config::StreamConfig;
use crate::decode::Codec;
use crate::foveation::FoveationParameters;
use log::error;
use serde::{Deserialize, Serialize};
use std::io;

/// opcodes
pub const OPCODE_BITRATE_UPDATE: u8 = 0;
pub const OPCODE_ENCODER_CONFIG: u8 = 1;
pub const OPCODE_FOVEATION_PARAMS: u8 = 2;
pub const OPCODE_KEYFRAME_REQUEST: u8 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    pub codec: Codec,
    pub preset: String,
    pub profile: String,
    pub rate_control: String,
    pub bitrate_bps: u64,
    pub max_bitrate_bps: u64,
    pub gop_length: u32,
    pub ref_frames: u32,
    pub adaptive_quantization: bool,
    pub aq_strength: u8,
}

impl EncoderConfig {
    /// Assembles the encoder configuration from the current settings
    /// snapshot and rate controller state.
    pub fn from_config(config: &StreamConfig, current_bitrate: u64) -> Self {
        Self {
            codec: if config.prefer_hevc {
                Codec::Hevc
            } else {
                Codec::H264
            },
            preset: config.encoder_preset.clone(),
            profile: config.encoder_profile.clone(),
            rate_control: config.encoder_rate_control.clone(),
            bitrate_bps: current_bitrate,
            max_bitrate_bps: config.bitrate.max,
            // Long GOP with in-band recovery; keyframes arrive on request.
            gop_length: 0,
            ref_frames: 1,
            adaptive_quantization: config.cloud_optimized_mode,
            aq_strength: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoveationMessage {
    pub enabled: bool,
    pub dynamic: bool,
    pub strength: f64,
    pub parameters: FoveationParameters,
}

/// Transport-facing message sink. Implementations push bytes at the sender;
/// delivery is best-effort.
pub trait ControlSink: Send {
    fn send(&mut self, message: &[u8]) -> io::Result<()>;
}

fn frame<T: Serialize>(opcode: u8, body: &T) -> Vec<u8> {
    let mut message = vec![opcode];
    message.extend(bincode::serialize(body).unwrap());
    message
}

pub fn send_bitrate_update(sink: &mut dyn ControlSink, bitrate_bps: u64) {
    if let Err(e) = sink.send(&frame(OPCODE_BITRATE_UPDATE, &bitrate_bps)) {
        error!("Failed to send bitrate update ({e})");
    }
}

pub fn send_encoder_config(sink: &mut dyn ControlSink, config: &EncoderConfig) {
    if let Err(e) = sink.send(&frame(OPCODE_ENCODER_CONFIG, config)) {
        error!("Failed to send encoder config ({e})");
    }
}

pub fn send_foveation_params(sink: &mut dyn ControlSink, message: &FoveationMessage) {
    if let Err(e) = sink.send(&frame(OPCODE_FOVEATION_PARAMS, message)) {
        error!("Failed to send foveation parameters ({e})");
    }
}

/// Asks the sender for an IDR so the decoder can resynchronize.
pub fn send_keyframe_request(sink: &mut dyn ControlSink) {
    if let Err(e) = sink.send(&[OPCODE_KEYFRAME_REQUEST]) {
        error!("Failed to send keyframe request ({e})");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        messages: Vec<Vec<u8>>,
    }

    impl ControlSink for RecordingSink {
        fn send(&mut self, message: &[u8]) -> io::Result<()> {
            self.messages.push(message.to_vec());
            Ok(())
        }
    }

    #[test]
    fn bitrate_update_round_trips() {
        let mut sink = RecordingSink::default();
        send_bitrate_update(&mut sink, 42_000_000);
        let message = &sink.messages[0];
        assert_eq!(message[0], OPCODE_BITRATE_UPDATE);
        let bitrate: u64 = bincode::deserialize(&message[1..]).unwrap();
        assert_eq!(bitrate, 42_000_000);
    }

    #[test]
    fn encoder_config_reflects_snapshot() {
        let mut config = StreamConfig::default();
        config.prefer_hevc = true;
        config.encoder_preset = "p7".to_string();
        let encoder = EncoderConfig::from_config(&config, 55);
        assert_eq!(encoder.codec, Codec::Hevc);
        assert_eq!(encoder.preset, "p7");
        assert_eq!(encoder.bitrate_bps, 55);
        assert_eq!(encoder.max_bitrate_bps, config.bitrate.max);
    }

    #[test]
    fn failed_send_is_swallowed() {
        struct FailingSink;
        impl ControlSink for FailingSink {
            fn send(&mut self, _message: &[u8]) -> io::Result<()> {
                Err(io::Error::other("transport gone"))
            }
        }
        // Fire-and-forget: a dead transport must not propagate.
        send_bitrate_update(&mut FailingSink, 1);
    }
}
