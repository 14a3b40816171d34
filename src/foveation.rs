//! Foveation-region solver
//!
//! Combines the base foveation settings, the predicted gaze position and the
//! scene descriptor into pixel-aligned foveation parameters for the encoder
//! and the rendering consumer.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::config::{DarkSceneConfig, FoveationConfig, FoveationShape, MotionConfig};
use crate::gaze::Vec2;
use crate::scene::SceneAnalysisResult;
use serde::{Deserialize, Serialize};

/// Valid output ranges.
const CENTER_SIZE_MIN: f64 = 0.1;
const CENTER_SIZE_MAX: f64 = 0.9;
const SHIFT_MAX: f64 = 0.5;
const EDGE_RATIO_MIN: f64 = 1.0;
const EDGE_RATIO_MAX: f64 = 10.0;

/// Gaze-to-shift coupling.
const GAZE_SHIFT_GAIN: f64 = 0.3;

/// Scene-adaptive adjustment limits.
const DARK_CENTER_BOOST: f64 = 0.3;
const MOTION_CENTER_SHRINK: f64 = 0.2;
const MOTION_EDGE_WIDEN: f64 = 1.0;
const MOTION_CENTER_FLOOR: f64 = 0.2;
const MOTION_EDGE_CEILING: f64 = 6.0;
const MOTION_FACTOR_SCALE: f64 = 0.5;

/// Encoder block alignment for optimized dimensions.
const BLOCK_ALIGN: u32 = 32;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FoveationParameters {
    pub center_size_x: f64,
    pub center_size_y: f64,
    pub center_shift_x: f64,
    pub center_shift_y: f64,
    pub edge_ratio_x: f64,
    pub edge_ratio_y: f64,
    /// Block-aligned dimensions of the optimized (foveated) eye image.
    pub optimized_width: u32,
    pub optimized_height: u32,
    /// Unaligned-to-aligned optimized size ratio, for sampling correction.
    pub scale_ratio_x: f64,
    pub scale_ratio_y: f64,
}

/// Pixel alignment of one axis: grow the edge region to an integer multiple
/// of `edge_ratio * 2` pixels, then derive the foveated scale and the
/// block-aligned optimized dimension. Returns the aligned center size and
/// shift so the emitted parameters describe the image actually produced.
fn align_axis(
    center_size: f64,
    center_shift: f64,
    edge_ratio: f64,
    target_dim: u32,
) -> (f64, f64, u32, f64) {
    let target = f64::from(target_dim);
    let align = edge_ratio * 2.0;

    let edge_size = target * (1.0 - center_size);
    let edge_size_aligned = (edge_size / align).ceil() * align;
    let center_size_aligned = 1.0 - edge_size_aligned / target;

    let shift_aligned = (target * center_shift / align).ceil() * align / target;

    let scale = center_size_aligned + (1.0 - center_size_aligned) / edge_ratio;
    let optimized = scale * target;
    let optimized_aligned = (optimized / f64::from(BLOCK_ALIGN)).ceil() as u32 * BLOCK_ALIGN;
    let ratio = optimized / f64::from(optimized_aligned);

    (center_size_aligned, shift_aligned, optimized_aligned, ratio)
}

/// Solves one foveation cycle. `gaze` is the predicted normalized gaze
/// position (origin at the view center); `scene` the latest content
/// descriptor. Either may be absent early in a session.
pub fn solve(
    foveation: &FoveationConfig,
    dark: &DarkSceneConfig,
    motion: &MotionConfig,
    target_width: u32,
    target_height: u32,
    gaze: Option<Vec2>,
    scene: Option<SceneAnalysisResult>,
) -> FoveationParameters {
    let mut center_size_x = foveation.center_size;
    let mut center_size_y = foveation.center_size;
    let mut edge_ratio_x = foveation.edge_ratio;
    let mut edge_ratio_y = foveation.edge_ratio;
    let mut center_shift_x = 0.0;
    let mut center_shift_y = foveation.vertical_offset;

    if foveation.follow_gaze {
        if let Some(gaze) = gaze {
            center_shift_x = gaze[0] * GAZE_SHIFT_GAIN * foveation.strength;
            center_shift_y =
                gaze[1] * GAZE_SHIFT_GAIN * foveation.strength + foveation.vertical_offset;
        }
    }

    let significant_motion = scene
        .map(|s| motion.enabled && s.has_significant_motion(motion.threshold))
        .unwrap_or(false);

    if let Some(scene) = scene {
        if dark.enabled && scene.is_dark_scene(dark.threshold) {
            // A dark scene hides peripheral compression poorly; widen the
            // full-detail center instead.
            let darkness = 1.0 - scene.average_luminance / dark.threshold;
            center_size_x += DARK_CENTER_BOOST * darkness;
            center_size_y += DARK_CENTER_BOOST * darkness;
        }

        if significant_motion {
            let factor = (scene.motion_magnitude / MOTION_FACTOR_SCALE).min(1.0);
            center_size_x = (center_size_x - MOTION_CENTER_SHRINK * factor).max(MOTION_CENTER_FLOOR);
            center_size_y = (center_size_y - MOTION_CENTER_SHRINK * factor).max(MOTION_CENTER_FLOOR);
            edge_ratio_x = (edge_ratio_x + MOTION_EDGE_WIDEN * factor).min(MOTION_EDGE_CEILING);
            edge_ratio_y = (edge_ratio_y + MOTION_EDGE_WIDEN * factor).min(MOTION_EDGE_CEILING);
        }
    }

    match foveation.shape {
        FoveationShape::Radial => {
            let center = (center_size_x + center_size_y) / 2.0;
            let edge = (edge_ratio_x + edge_ratio_y) / 2.0;
            center_size_x = center;
            center_size_y = center;
            edge_ratio_x = edge;
            edge_ratio_y = edge;
        }
        FoveationShape::Rectangular => {}
        FoveationShape::Adaptive => {
            if significant_motion {
                edge_ratio_x *= 1.2;
                center_size_x *= 0.9;
            }
        }
    }

    center_size_x = center_size_x.clamp(CENTER_SIZE_MIN, CENTER_SIZE_MAX);
    center_size_y = center_size_y.clamp(CENTER_SIZE_MIN, CENTER_SIZE_MAX);
    center_shift_x = center_shift_x.clamp(-SHIFT_MAX, SHIFT_MAX);
    center_shift_y = center_shift_y.clamp(-SHIFT_MAX, SHIFT_MAX);
    edge_ratio_x = edge_ratio_x.clamp(EDGE_RATIO_MIN, EDGE_RATIO_MAX);
    edge_ratio_y = edge_ratio_y.clamp(EDGE_RATIO_MIN, EDGE_RATIO_MAX);

    let (center_x, shift_x, optimized_width, scale_ratio_x) =
        align_axis(center_size_x, center_shift_x, edge_ratio_x, target_width);
    let (center_y, shift_y, optimized_height, scale_ratio_y) =
        align_axis(center_size_y, center_shift_y, edge_ratio_y, target_height);

    FoveationParameters {
        center_size_x: center_x.clamp(CENTER_SIZE_MIN, CENTER_SIZE_MAX),
        center_size_y: center_y.clamp(CENTER_SIZE_MIN, CENTER_SIZE_MAX),
        center_shift_x: shift_x.clamp(-SHIFT_MAX, SHIFT_MAX),
        center_shift_y: shift_y.clamp(-SHIFT_MAX, SHIFT_MAX),
        edge_ratio_x,
        edge_ratio_y,
        optimized_width,
        optimized_height,
        scale_ratio_x,
        scale_ratio_y,
    }
}
