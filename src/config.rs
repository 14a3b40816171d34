//! Client configuration snapshot
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use log::warn;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io;
use std::path::Path;

fn default_true() -> bool {
    true
}

fn default_frame_queue_size() -> usize {
    2
}

fn default_dark_threshold() -> f64 {
    0.3
}

fn default_dark_multiplier() -> f64 {
    1.2
}

fn default_motion_threshold() -> f64 {
    0.05
}

fn default_motion_multiplier() -> f64 {
    1.3
}

fn default_static_multiplier() -> f64 {
    0.8
}

fn default_foveation_strength() -> f64 {
    2.0
}

fn default_center_size() -> f64 {
    0.4
}

fn default_edge_ratio() -> f64 {
    4.0
}

fn default_min_bitrate() -> u64 {
    10
}

fn default_max_bitrate() -> u64 {
    100
}

fn default_packet_size() -> usize {
    1400
}

fn default_encoder_preset() -> String {
    "p4".to_string()
}

fn default_encoder_profile() -> String {
    "main".to_string()
}

fn default_encoder_rate_control() -> String {
    "cbr".to_string()
}

/// How aggressively the client buffers frames against network jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BufferingStrategy {
    Minimal,
    #[default]
    Balanced,
    Adaptive,
    Aggressive,
}

impl BufferingStrategy {
    /// Upper bound on the frame queue's optimal size under this strategy.
    pub fn queue_ceiling(&self) -> usize {
        match self {
            BufferingStrategy::Minimal => 1,
            BufferingStrategy::Balanced => 2,
            BufferingStrategy::Adaptive => 3,
            BufferingStrategy::Aggressive => 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DarkSceneConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_dark_threshold")]
    pub threshold: f64,
    #[serde(default = "default_dark_multiplier")]
    pub multiplier: f64,
}

impl Default for DarkSceneConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_dark_threshold(),
            multiplier: default_dark_multiplier(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_motion_threshold")]
    pub threshold: f64,
    #[serde(default = "default_motion_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_static_multiplier")]
    pub static_multiplier: f64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_motion_threshold(),
            multiplier: default_motion_multiplier(),
            static_multiplier: default_static_multiplier(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FoveationShape {
    Radial,
    #[default]
    Rectangular,
    Adaptive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoveationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub dynamic: bool,
    #[serde(default = "default_foveation_strength")]
    pub strength: f64,
    #[serde(default)]
    pub shape: FoveationShape,
    #[serde(default = "default_center_size")]
    pub center_size: f64,
    #[serde(default = "default_edge_ratio")]
    pub edge_ratio: f64,
    #[serde(default)]
    pub vertical_offset: f64,
    #[serde(default = "default_true")]
    pub follow_gaze: bool,
}

impl Default for FoveationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dynamic: true,
            strength: default_foveation_strength(),
            shape: FoveationShape::default(),
            center_size: default_center_size(),
            edge_ratio: default_edge_ratio(),
            vertical_offset: 0.0,
            follow_gaze: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitrateConfig {
    #[serde(default = "default_min_bitrate")]
    pub min: u64,
    #[serde(default = "default_max_bitrate")]
    pub max: u64,
}

impl Default for BitrateConfig {
    fn default() -> Self {
        Self {
            min: default_min_bitrate(),
            max: default_max_bitrate(),
        }
    }
}

/// One refreshable snapshot of every recognized option. Unrecognized keys in
/// the settings file are ignored; missing keys take the field default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub cloud_optimized_mode: bool,
    pub predictive_frame_generation: bool,
    pub network_buffering_strategy: BufferingStrategy,
    pub frame_queue_size: usize,
    pub prefer_hevc: bool,
    pub prefer_10bit: bool,
    pub encoder_preset: String,
    pub encoder_profile: String,
    pub encoder_rate_control: String,
    pub dark_scene: DarkSceneConfig,
    pub motion: MotionConfig,
    pub foveation: FoveationConfig,
    pub bitrate: BitrateConfig,
    pub packet_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            cloud_optimized_mode: false,
            predictive_frame_generation: false,
            network_buffering_strategy: BufferingStrategy::default(),
            frame_queue_size: default_frame_queue_size(),
            prefer_hevc: false,
            prefer_10bit: false,
            encoder_preset: default_encoder_preset(),
            encoder_profile: default_encoder_profile(),
            encoder_rate_control: default_encoder_rate_control(),
            dark_scene: DarkSceneConfig::default(),
            motion: MotionConfig::default(),
            foveation: FoveationConfig::default(),
            bitrate: BitrateConfig::default(),
            packet_size: default_packet_size(),
        }
    }
}

const RECOGNIZED_PRESETS: &[&str] = &["p1", "p2", "p3", "p4", "p5", "p6", "p7"];
const RECOGNIZED_PROFILES: &[&str] = &["baseline", "main", "high", "main10"];
const RECOGNIZED_RATE_CONTROLS: &[&str] = &["cbr", "vbr"];

impl StreamConfig {
    pub fn load(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let mut config: Self = serde_yml::from_reader(file).map_err(io::Error::other)?;
        config.normalize_encoder_strings();
        Ok(config)
    }

    /// Unrecognized encoder strings fall back to the defaults rather than
    /// reaching the sender.
    fn normalize_encoder_strings(&mut self) {
        if !RECOGNIZED_PRESETS.contains(&self.encoder_preset.as_str()) {
            warn!(
                "Unrecognized encoder preset {:?}; using {:?}.",
                self.encoder_preset,
                default_encoder_preset()
            );
            self.encoder_preset = default_encoder_preset();
        }
        if !RECOGNIZED_PROFILES.contains(&self.encoder_profile.as_str()) {
            warn!(
                "Unrecognized encoder profile {:?}; using {:?}.",
                self.encoder_profile,
                default_encoder_profile()
            );
            self.encoder_profile = default_encoder_profile();
        }
        if !RECOGNIZED_RATE_CONTROLS.contains(&self.encoder_rate_control.as_str()) {
            warn!(
                "Unrecognized rate control {:?}; using {:?}.",
                self.encoder_rate_control,
                default_encoder_rate_control()
            );
            self.encoder_rate_control = default_encoder_rate_control();
        }
    }
}

/// Capability descriptor resolved once at session start so that per-call
/// platform checks never leak into the pipeline.
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    pub cloud_optimized: bool,
    pub hevc: bool,
    pub ten_bit: bool,
    pub rtx_optimized: bool,
    pub foveated_rendering: bool,
    pub wifi_optimized: bool,
}

impl Capabilities {
    pub fn resolve(config: &StreamConfig) -> Self {
        Self {
            cloud_optimized: config.cloud_optimized_mode,
            hevc: config.prefer_hevc,
            ten_bit: config.prefer_10bit,
            rtx_optimized: config.predictive_frame_generation,
            foveated_rendering: config.foveation.enabled,
            wifi_optimized: config.network_buffering_strategy != BufferingStrategy::Minimal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_option() {
        let config = StreamConfig::default();
        assert_eq!(config.network_buffering_strategy, BufferingStrategy::Balanced);
        assert_eq!(config.bitrate.min, 10);
        assert_eq!(config.bitrate.max, 100);
        assert!(config.dark_scene.enabled);
        assert!((config.dark_scene.threshold - 0.3).abs() < f64::EPSILON);
        assert!((config.motion.static_multiplier - 0.8).abs() < f64::EPSILON);
        assert_eq!(config.foveation.shape, FoveationShape::Rectangular);
        assert_eq!(config.packet_size, 1400);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let yaml = "
network_buffering_strategy: aggressive
bitrate:
  max: 200
foveation:
  shape: adaptive
";
        let config: StreamConfig = serde_yml::from_str(yaml).unwrap();
        assert_eq!(
            config.network_buffering_strategy,
            BufferingStrategy::Aggressive
        );
        assert_eq!(config.bitrate.max, 200);
        assert_eq!(config.bitrate.min, 10);
        assert_eq!(config.foveation.shape, FoveationShape::Adaptive);
        assert!((config.foveation.strength - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unrecognized_encoder_strings_fall_back() {
        let mut config = StreamConfig::default();
        config.encoder_preset = "ultrafast".to_string();
        config.encoder_rate_control = "crf".to_string();
        config.normalize_encoder_strings();
        assert_eq!(config.encoder_preset, "p4");
        assert_eq!(config.encoder_profile, "main");
        assert_eq!(config.encoder_rate_control, "cbr");
    }

    #[test]
    fn capabilities_follow_config() {
        let mut config = StreamConfig::default();
        config.prefer_hevc = true;
        config.network_buffering_strategy = BufferingStrategy::Minimal;
        let caps = Capabilities::resolve(&config);
        assert!(caps.hevc);
        assert!(!caps.wifi_optimized);
        assert!(caps.foveated_rendering);
    }
}
