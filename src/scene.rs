//! Scene content analysis
//!
//! Samples decoded frames on a throttled cadence and produces the content
//! descriptor that drives the bitrate controller and foveation solver.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::decode::FrameBuffer;
use log::debug;
use ndarray::Array2;
use std::time::{Duration, Instant};

/// Full analysis runs at most once per this interval; callers in between get
/// the cached result.
const ANALYSIS_INTERVAL: Duration = Duration::from_millis(100);

/// Sparse sampling grid dimension (GRID x GRID probes per frame).
const GRID: usize = 10;

/// Background update rate for the motion estimate.
const ALPHA: f64 = 0.2;

/// Rec.709 luma weights for packed color formats.
const LUMA_R: f64 = 0.2126;
const LUMA_G: f64 = 0.7152;
const LUMA_B: f64 = 0.0722;

#[derive(Debug, Clone, Copy, Default)]
pub struct SceneAnalysisResult {
    /// Average luminance over the sampling grid, in [0, 1].
    pub average_luminance: f64,
    /// Mean absolute inter-frame difference over the grid, >= 0.
    pub motion_magnitude: f64,
    /// Luminance variance over the grid.
    pub complexity_score: f64,
}

impl SceneAnalysisResult {
    pub fn is_dark_scene(&self, threshold: f64) -> bool {
        self.average_luminance < threshold
    }

    pub fn has_significant_motion(&self, threshold: f64) -> bool {
        self.motion_magnitude > threshold
    }
}

/// Motion estimation seam. The default estimator compares successive sampling
/// grids against an exponential-moving-average background; a richer
/// implementation (decoder motion vectors, dense flow) can replace it without
/// touching the analyzer.
pub trait MotionEstimator: Send {
    fn estimate(&mut self, grid: &Array2<f64>) -> f64;
}

/// Frame-difference estimator over the luminance sampling grid.
#[derive(Debug, Default)]
pub struct GridDifferenceEstimator {
    background: Option<Array2<f64>>,
}

impl MotionEstimator for GridDifferenceEstimator {
    fn estimate(&mut self, grid: &Array2<f64>) -> f64 {
        let magnitude = match &self.background {
            Some(background) => {
                let diff = (grid - background).mapv(f64::abs);
                diff.mean().unwrap_or(0.0)
            }
            None => 0.0,
        };

        // Exponential moving average, as in classic background subtraction.
        self.background = Some(match self.background.take() {
            Some(background) => grid * ALPHA + &(background * (1.0 - ALPHA)),
            None => grid.clone(),
        });

        magnitude
    }
}

pub struct SceneAnalyzer {
    estimator: Box<dyn MotionEstimator>,
    last_analysis: Option<Instant>,
    cached: SceneAnalysisResult,
}

impl Default for SceneAnalyzer {
    fn default() -> Self {
        Self::new(Box::new(GridDifferenceEstimator::default()))
    }
}

impl SceneAnalyzer {
    pub fn new(estimator: Box<dyn MotionEstimator>) -> Self {
        Self {
            estimator,
            last_analysis: None,
            cached: SceneAnalysisResult::default(),
        }
    }

    pub fn latest(&self) -> SceneAnalysisResult {
        self.cached
    }

    /// Analyzes a decoded frame, or returns the cached descriptor when called
    /// again within the throttle interval.
    pub fn analyze(&mut self, frame: &FrameBuffer, now: Instant) -> SceneAnalysisResult {
        if let Some(last) = self.last_analysis {
            if now.duration_since(last) < ANALYSIS_INTERVAL {
                return self.cached;
            }
        }
        self.last_analysis = Some(now);

        let grid = sample_grid(frame);
        let average_luminance = grid.mean().unwrap_or(0.0);
        let complexity_score = grid
            .mapv(|v| (v - average_luminance).powi(2))
            .mean()
            .unwrap_or(0.0);
        let motion_magnitude = self.estimator.estimate(&grid);

        self.cached = SceneAnalysisResult {
            average_luminance,
            motion_magnitude,
            complexity_score,
        };
        debug!(
            "scene: luminance {:.3}, motion {:.3}, complexity {:.4}",
            average_luminance, motion_magnitude, complexity_score
        );
        self.cached
    }
}

/// Samples a sparse GRID x GRID luminance grid over the frame. Planar luma is
/// read directly; packed RGB goes through the Rec.709 weighted sum.
fn sample_grid(frame: &FrameBuffer) -> Array2<f64> {
    let (width, height) = frame.dimensions();
    let mut grid = Array2::zeros((GRID, GRID));

    for gy in 0..GRID {
        for gx in 0..GRID {
            // Probe positions sit at cell centers so a tiny frame still maps
            // inside its bounds.
            let x = ((gx as u32 * 2 + 1) * width / (GRID as u32 * 2)).min(width - 1);
            let y = ((gy as u32 * 2 + 1) * height / (GRID as u32 * 2)).min(height - 1);

            grid[[gy, gx]] = match frame {
                FrameBuffer::Luma(img) => img.get_pixel(x, y)[0] as f64 / 255.0,
                FrameBuffer::Rgb(img) => {
                    let p = img.get_pixel(x, y);
                    (LUMA_R * p[0] as f64 + LUMA_G * p[1] as f64 + LUMA_B * p[2] as f64) / 255.0
                }
            };
        }
    }

    grid
}
