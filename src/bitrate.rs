//! Scene-adaptive bitrate control
//!
//! Closed-loop controller: the scene descriptor scales a multiplier over the
//! configured maximum bitrate, the target is clamped to the configured
//! bounds, and the current rate approaches the target by a fixed step per
//! adjustment so the encoder never sees a rate jump.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::config::{BitrateConfig, DarkSceneConfig, MotionConfig};
use crate::scene::SceneAnalysisResult;
use log::debug;
use std::time::{Duration, Instant};

/// Minimum spacing between adjustments.
const ADJUSTMENT_INTERVAL: Duration = Duration::from_secs(1);

/// Rate-units the current bitrate moves per adjustment.
const RATE_STEP: u64 = 5;

/// Motion factor saturates at this magnitude.
const MOTION_FACTOR_SCALE: f64 = 0.5;

#[derive(Debug)]
pub struct BitrateController {
    current: u64,
    target: u64,
    min: u64,
    max: u64,
    last_adjustment: Option<Instant>,
}

impl BitrateController {
    pub fn new(config: &BitrateConfig) -> Self {
        Self {
            current: config.min,
            target: config.min,
            min: config.min,
            max: config.max,
            last_adjustment: None,
        }
    }

    pub fn current(&self) -> u64 {
        self.current
    }

    pub fn target(&self) -> u64 {
        self.target
    }

    /// Re-reads the configured bounds on a settings refresh.
    pub fn set_bounds(&mut self, config: &BitrateConfig) {
        self.min = config.min;
        self.max = config.max;
        self.target = self.target.clamp(self.min, self.max);
        self.current = self.current.clamp(self.min, self.max);
    }

    /// One controller tick. No-op until the adjustment interval has elapsed;
    /// returns the rate to emit downstream when streaming is active, `None`
    /// otherwise.
    pub fn tick(
        &mut self,
        now: Instant,
        scene: Option<SceneAnalysisResult>,
        dark: &DarkSceneConfig,
        motion: &MotionConfig,
        streaming_active: bool,
    ) -> Option<u64> {
        if let Some(last) = self.last_adjustment {
            if now.duration_since(last) < ADJUSTMENT_INTERVAL {
                return None;
            }
        }
        self.last_adjustment = Some(now);

        let mut multiplier = 1.0;
        if let Some(scene) = scene {
            if dark.enabled && scene.is_dark_scene(dark.threshold) {
                let darkness_factor = 1.0 - scene.average_luminance / dark.threshold;
                multiplier += darkness_factor * (dark.multiplier - 1.0);
            }

            if motion.enabled {
                if scene.has_significant_motion(motion.threshold) {
                    let motion_factor =
                        (scene.motion_magnitude / MOTION_FACTOR_SCALE).min(1.0);
                    multiplier += motion_factor * (motion.multiplier - 1.0);
                } else {
                    multiplier *= motion.static_multiplier;
                }
            }
        }

        let raw_target = self.max as f64 * multiplier;
        self.target = (raw_target.round() as u64).clamp(self.min, self.max);

        // Approach the target by a fixed step, never overshooting.
        if self.current < self.target {
            self.current = (self.current + RATE_STEP).min(self.target);
        } else if self.current > self.target {
            self.current = self.current.saturating_sub(RATE_STEP).max(self.target);
        }
        debug!(
            "bitrate tick: multiplier {:.3}, target {}, current {}",
            multiplier, self.target, self.current
        );

        streaming_active.then_some(self.current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamConfig;

    fn scene(luminance: f64, motion: f64) -> SceneAnalysisResult {
        SceneAnalysisResult {
            average_luminance: luminance,
            motion_magnitude: motion,
            complexity_score: 0.0,
        }
    }

    fn controller(min: u64, max: u64) -> BitrateController {
        BitrateController::new(&BitrateConfig { min, max })
    }

    #[test]
    fn static_scene_applies_static_multiplier() {
        // Bright, motionless scene with static_multiplier 0.8 and max 70.
        let config = StreamConfig::default();
        let mut controller = controller(10, 70);
        controller.tick(
            Instant::now(),
            Some(scene(0.6, 0.0)),
            &config.dark_scene,
            &config.motion,
            true,
        );
        assert_eq!(controller.target(), 56);
    }

    #[test]
    fn dark_scene_boost_is_clamped_to_max() {
        // luminance 0.2, threshold 0.3, multiplier 1.2: raw target 74.67.
        let config = StreamConfig::default();
        let mut controller = controller(10, 70);
        controller.tick(
            Instant::now(),
            Some(scene(0.2, 0.1)),
            &config.dark_scene,
            &config.motion,
            true,
        );
        assert_eq!(controller.target(), 70);
    }

    #[test]
    fn current_ramps_by_at_most_the_step() {
        let config = StreamConfig::default();
        let mut controller = controller(10, 70);
        let mut now = Instant::now();
        let mut previous = controller.current();
        for _ in 0..30 {
            now += ADJUSTMENT_INTERVAL;
            controller.tick(
                now,
                Some(scene(0.6, 0.0)),
                &config.dark_scene,
                &config.motion,
                true,
            );
            let current = controller.current();
            assert!(current.abs_diff(previous) <= RATE_STEP);
            assert!((10..=70).contains(&current));
            previous = current;
        }
        // Static target is 56; the ramp must land exactly on it.
        assert_eq!(controller.current(), 56);
    }

    #[test]
    fn tick_is_gated_by_the_interval() {
        let config = StreamConfig::default();
        let mut controller = controller(10, 70);
        let now = Instant::now();
        assert!(controller
            .tick(now, None, &config.dark_scene, &config.motion, true)
            .is_some());
        assert!(controller
            .tick(
                now + Duration::from_millis(200),
                None,
                &config.dark_scene,
                &config.motion,
                true
            )
            .is_none());
    }

    #[test]
    fn no_emission_while_not_streaming() {
        let config = StreamConfig::default();
        let mut controller = controller(10, 70);
        let emitted = controller.tick(
            Instant::now(),
            Some(scene(0.6, 0.0)),
            &config.dark_scene,
            &config.motion,
            false,
        );
        assert!(emitted.is_none());
        // The controller state still advanced.
        assert_eq!(controller.target(), 56);
    }

    #[test]
    fn target_stays_within_bounds_for_all_scenes() {
        let config = StreamConfig::default();
        for luminance in [0.0, 0.1, 0.3, 0.6, 1.0] {
            for motion in [0.0, 0.05, 0.2, 1.0, 10.0] {
                let mut controller = controller(10, 70);
                controller.tick(
                    Instant::now(),
                    Some(scene(luminance, motion)),
                    &config.dark_scene,
                    &config.motion,
                    true,
                );
                assert!((10..=70).contains(&controller.target()));
            }
        }
    }
}
