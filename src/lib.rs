//! Client-side control core for a remote-rendered HMD video stream.
//!
//! The receiving half of the pipeline: frames arrive compressed over the
//! transport, pass through the ingest gate ([`ingest`]), come back from the
//! decoder over a completion channel ([`decode`]), and wait in a small
//! latency-bounded queue for the renderer. Around that path sit the adaptive
//! controllers: scene analysis ([`scene`]), bitrate ([`bitrate`]), gaze
//! prediction ([`gaze`]) and the foveation solver ([`foveation`]), all
//! supervised by the session poll loop ([`session`]).
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

pub mod alert;
pub mod bitrate;
pub mod config;
pub mod control;
pub mod decode;
pub mod discovery;
pub mod foveation;
pub mod gaze;
pub mod ingest;
pub mod latency;
pub mod scene;
pub mod session;
