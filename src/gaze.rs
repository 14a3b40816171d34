//! Gaze prediction
//!
//! A constant-velocity Kalman filter over the normalized 2D gaze stream,
//! with adaptive noise tuning: follow the measurement tightly through
//! saccades, smooth jitter out during fixations. The foveation solver asks
//! it where the eye will be a few frames from now.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use std::collections::VecDeque;

/// Bounded sample / velocity history length.
const HISTORY_CAPACITY: usize = 10;

/// dt outside this range means a clock jump or missed samples; the filter
/// snaps to the measurement instead of integrating garbage.
const MIN_VALID_DT: f64 = 0.0001;
const MAX_VALID_DT: f64 = 0.1;

/// Fixation tuning saturates after this long.
const FIXATION_CAP_SECS: f64 = 2.0;

pub type Vec2 = [f64; 2];
type Mat2 = [[f64; 2]; 2];

const IDENTITY: Mat2 = [[1.0, 0.0], [0.0, 1.0]];

fn mat_add_diag(m: Mat2, d: f64) -> Mat2 {
    [[m[0][0] + d, m[0][1]], [m[1][0], m[1][1] + d]]
}

fn mat_mul(a: Mat2, b: Mat2) -> Mat2 {
    [
        [
            a[0][0] * b[0][0] + a[0][1] * b[1][0],
            a[0][0] * b[0][1] + a[0][1] * b[1][1],
        ],
        [
            a[1][0] * b[0][0] + a[1][1] * b[1][0],
            a[1][0] * b[0][1] + a[1][1] * b[1][1],
        ],
    ]
}

fn mat_sub(a: Mat2, b: Mat2) -> Mat2 {
    [
        [a[0][0] - b[0][0], a[0][1] - b[0][1]],
        [a[1][0] - b[1][0], a[1][1] - b[1][1]],
    ]
}

fn mat_inv(m: Mat2) -> Mat2 {
    let det = m[0][0] * m[1][1] - m[0][1] * m[1][0];
    // The innovation covariance always carries measurement noise on its
    // diagonal, so det stays away from zero in practice.
    let inv_det = 1.0 / det;
    [
        [m[1][1] * inv_det, -m[0][1] * inv_det],
        [-m[1][0] * inv_det, m[0][0] * inv_det],
    ]
}

fn mat_vec(m: Mat2, v: Vec2) -> Vec2 {
    [
        m[0][0] * v[0] + m[0][1] * v[1],
        m[1][0] * v[0] + m[1][1] * v[1],
    ]
}

#[derive(Debug, Clone, Copy)]
pub struct GazeSample {
    pub position: Vec2,
    pub timestamp_s: f64,
}

/// Externally configured bounds for the adaptive tuning.
#[derive(Debug, Clone, Copy)]
pub struct NoiseBounds {
    pub process_min: f64,
    pub process_max: f64,
    pub measurement_min: f64,
    pub measurement_max: f64,
    /// Smoothed velocity magnitude above which motion counts as a saccade,
    /// in normalized units per second.
    pub saccade_velocity: f64,
}

impl Default for NoiseBounds {
    fn default() -> Self {
        Self {
            process_min: 0.001,
            process_max: 0.1,
            measurement_min: 0.001,
            measurement_max: 0.05,
            saccade_velocity: 0.8,
        }
    }
}

pub struct GazePredictor {
    position: Vec2,
    velocity: Vec2,
    covariance: Mat2,
    process_noise: f64,
    measurement_noise: f64,
    bounds: NoiseBounds,
    last_update_s: Option<f64>,
    history: VecDeque<GazeSample>,
    velocities: VecDeque<Vec2>,
    fixation_start_s: Option<f64>,
}

impl Default for GazePredictor {
    fn default() -> Self {
        Self::new(NoiseBounds::default())
    }
}

impl GazePredictor {
    pub fn new(bounds: NoiseBounds) -> Self {
        Self {
            position: [0.0, 0.0],
            velocity: [0.0, 0.0],
            covariance: IDENTITY,
            process_noise: (bounds.process_min + bounds.process_max) / 2.0,
            measurement_noise: (bounds.measurement_min + bounds.measurement_max) / 2.0,
            bounds,
            last_update_s: None,
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
            velocities: VecDeque::with_capacity(HISTORY_CAPACITY),
            fixation_start_s: None,
        }
    }

    pub fn position(&self) -> Vec2 {
        self.position
    }

    /// Pure extrapolation; no covariance update.
    pub fn predict(&self, time_ahead_s: f64) -> Vec2 {
        [
            self.position[0] + self.velocity[0] * time_ahead_s,
            self.position[1] + self.velocity[1] * time_ahead_s,
        ]
    }

    /// Feeds one gaze measurement through the filter and returns the filtered
    /// position.
    pub fn update(&mut self, measurement: Vec2, now_s: f64) -> Vec2 {
        self.record_sample(measurement, now_s);
        self.tune_noise(now_s);

        let dt = match self.last_update_s {
            Some(last) => now_s - last,
            None => 0.0,
        };
        self.last_update_s = Some(now_s);

        // dt at the lower bound is as untrustworthy as below it.
        if dt <= MIN_VALID_DT || dt > MAX_VALID_DT {
            // Clock jump or missed samples: snap, don't integrate.
            self.position = measurement;
            return self.position;
        }

        // Predict.
        let predicted = [
            self.position[0] + self.velocity[0] * dt,
            self.position[1] + self.velocity[1] * dt,
        ];
        let predicted_cov = mat_add_diag(self.covariance, self.process_noise * dt);

        // Update.
        let innovation_cov = mat_add_diag(predicted_cov, self.measurement_noise);
        let gain = mat_mul(predicted_cov, mat_inv(innovation_cov));
        let innovation = [
            measurement[0] - predicted[0],
            measurement[1] - predicted[1],
        ];
        let correction = mat_vec(gain, innovation);
        self.position = [predicted[0] + correction[0], predicted[1] + correction[1]];

        // Heuristic velocity correction toward the implied measurement
        // velocity, damped by the gain.
        let implied = [
            innovation[0] / dt - self.velocity[0],
            innovation[1] / dt - self.velocity[1],
        ];
        let velocity_correction = mat_vec(gain, implied);
        self.velocity[0] += 0.5 * velocity_correction[0];
        self.velocity[1] += 0.5 * velocity_correction[1];

        self.covariance = mat_mul(mat_sub(IDENTITY, gain), predicted_cov);

        self.position
    }

    fn record_sample(&mut self, position: Vec2, timestamp_s: f64) {
        if let Some(previous) = self.history.back() {
            let dt = timestamp_s - previous.timestamp_s;
            if dt > MIN_VALID_DT {
                let raw = [
                    (position[0] - previous.position[0]) / dt,
                    (position[1] - previous.position[1]) / dt,
                ];
                if self.velocities.len() == HISTORY_CAPACITY {
                    self.velocities.pop_front();
                }
                self.velocities.push_back(raw);
            }
        }

        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(GazeSample {
            position,
            timestamp_s,
        });
    }

    fn smoothed_velocity_magnitude(&self) -> f64 {
        if self.velocities.is_empty() {
            return 0.0;
        }
        let (sx, sy) = self
            .velocities
            .iter()
            .fold((0.0, 0.0), |(sx, sy), v| (sx + v[0], sy + v[1]));
        let n = self.velocities.len() as f64;
        ((sx / n).powi(2) + (sy / n).powi(2)).sqrt()
    }

    /// Saccade: widen process noise, trust the measurement. Fixation:
    /// progressively smooth jitter, saturating after FIXATION_CAP_SECS.
    fn tune_noise(&mut self, now_s: f64) {
        if self.smoothed_velocity_magnitude() > self.bounds.saccade_velocity {
            self.fixation_start_s = None;
            self.process_noise = self.bounds.process_max;
            self.measurement_noise = self.bounds.measurement_min;
            return;
        }

        let start = *self.fixation_start_s.get_or_insert(now_s);
        let t = ((now_s - start) / FIXATION_CAP_SECS).clamp(0.0, 1.0);
        self.process_noise =
            self.bounds.process_max + (self.bounds.process_min - self.bounds.process_max) * t;
        self.measurement_noise = self.bounds.measurement_min
            + (self.bounds.measurement_max - self.bounds.measurement_min) * t;
    }
}
