//! Decode backend collaborator contract
//!
//! The hardware decode session itself is out of scope; only its callback
//! contract matters here. Completions are delivered over an mpsc channel so
//! that the control core is the single consumer serializing access to the
//! frame queue, rather than an arbitrary backend thread.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::mpsc::Sender;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Codec {
    H264,
    Hevc,
    Av1,
}

/// A decoded image handle. Planar luma output is the common hardware path;
/// packed RGB shows up with software fallbacks.
#[derive(Debug, Clone)]
pub enum FrameBuffer {
    Luma(GrayImage),
    Rgb(RgbImage),
}

impl FrameBuffer {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            FrameBuffer::Luma(img) => img.dimensions(),
            FrameBuffer::Rgb(img) => img.dimensions(),
        }
    }
}

/// Per-eye view parameters carried alongside every frame.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ViewParams {
    pub orientation: [f32; 4],
    pub position: [f32; 3],
}

/// Negotiated output format of a decode session.
#[derive(Debug, Clone, Copy)]
pub struct FormatDescriptor {
    pub width: u32,
    pub height: u32,
}

/// One asynchronous decode result. `frame` is `None` when the backend gave up
/// on the payload; the ingest side treats that as a dropped frame.
#[derive(Debug)]
pub struct DecodeCompletion {
    pub timestamp_ns: u64,
    pub decode_time: Duration,
    pub frame: Option<FrameBuffer>,
    pub views: [ViewParams; 2],
}

/// The decode backend. Implementations submit payloads to the hardware (or a
/// software fallback) and push `DecodeCompletion`s into the channel handed to
/// them at session creation, from whatever execution context they run on.
pub trait DecodeBackend: Send {
    /// Creates a decode session for the negotiated codec, returning the
    /// output format the backend settled on.
    fn create_session(
        &mut self,
        codec: Codec,
        config_bytes: &[u8],
        completions: Sender<DecodeCompletion>,
    ) -> io::Result<FormatDescriptor>;

    /// Hands one compressed frame to the decoder. Completion arrives
    /// asynchronously on the session's channel.
    fn submit(&mut self, payload: &[u8], timestamp_ns: u64) -> io::Result<()>;
}
