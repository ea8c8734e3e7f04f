//! Audio-driven jaw opening
//!
//! Band magnitudes are sampled once per frame by the host while narration
//! plays. Intensity is smoothed to gate speech; mid/high bands shape how far
//! the jaw opens.

use crate::ease_in_out;
use crate::morph::MorphBinding;
use crate::rig::Rig;
use serde::{Deserialize, Serialize};

/// Distance to the target below which the opening snaps onto it
const SNAP_DISTANCE: f32 = 1e-3;

/// Per-frame audio features, each in [0, 1]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioBands {
    pub intensity: f32,
    pub mid: f32,
    pub high: f32,
}

impl AudioBands {
    pub fn new(intensity: f32, mid: f32, high: f32) -> Self {
        Self {
            intensity,
            mid,
            high,
        }
    }

    /// Replace non-finite values with silence and clamp into [0, 1]
    pub fn sanitized(self) -> Self {
        let clean = |v: f32| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        Self {
            intensity: clean(self.intensity),
            mid: clean(self.mid),
            high: clean(self.high),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LipSyncConfig {
    /// Weight of the previous smoothed intensity
    pub smoothing: f32,
    /// Smoothed intensity at or below which the mouth closes
    pub min_threshold: f32,
    /// Opening rate, 1/s
    pub response_speed: f32,
    /// Closing rate, 1/s
    pub close_speed: f32,
    pub mid_weight: f32,
    pub high_weight: f32,
}

impl Default for LipSyncConfig {
    fn default() -> Self {
        Self {
            smoothing: 0.7,
            min_threshold: 0.05,
            response_speed: 18.0,
            close_speed: 10.0,
            mid_weight: 0.6,
            high_weight: 0.4,
        }
    }
}

pub struct JawController {
    config: LipSyncConfig,
    smoothed_intensity: f32,
    target_opening: f32,
    current_opening: f32,
    targets: Vec<MorphBinding>,
}

impl JawController {
    pub fn new(config: LipSyncConfig, targets: Vec<MorphBinding>) -> Self {
        if targets.is_empty() {
            log::warn!("No jaw/mouth morph targets found; lip-sync disabled");
        }
        Self {
            config,
            smoothed_intensity: 0.0,
            target_opening: 0.0,
            current_opening: 0.0,
            targets,
        }
    }

    pub fn smoothed_intensity(&self) -> f32 {
        self.smoothed_intensity
    }

    pub fn target_opening(&self) -> f32 {
        self.target_opening
    }

    pub fn opening(&self) -> f32 {
        self.current_opening
    }

    pub fn targets(&self) -> &[MorphBinding] {
        &self.targets
    }

    /// Advance by `delta` seconds. `None` means no narration is playing.
    pub fn update(&mut self, delta: f32, audio: Option<AudioBands>) {
        let bands = audio.map(AudioBands::sanitized).unwrap_or_default();
        let smoothing = self.config.smoothing.clamp(0.0, 1.0);

        self.smoothed_intensity =
            self.smoothed_intensity * smoothing + bands.intensity * (1.0 - smoothing);

        self.target_opening = if self.smoothed_intensity > self.config.min_threshold {
            (bands.mid * self.config.mid_weight + bands.high * self.config.high_weight)
                .clamp(0.0, 1.0)
        } else {
            0.0
        };

        let delta = if delta.is_finite() { delta.max(0.0) } else { 0.0 };
        let speed = if self.target_opening > self.current_opening {
            self.config.response_speed
        } else {
            self.config.close_speed
        };
        let alpha = 1.0 - (-speed.max(0.0) * delta).exp();

        let mut next = self.current_opening + (self.target_opening - self.current_opening) * alpha;
        if (self.target_opening - next).abs() < SNAP_DISTANCE {
            next = self.target_opening;
        }
        self.current_opening = next.clamp(0.0, 1.0);
    }

    /// Open every jaw/mouth target from whatever it currently holds.
    ///
    /// A closed jaw leaves the value untouched.
    pub fn apply(&self, rig: &mut Rig) {
        let open = self.current_opening;
        let shaped = open * ease_in_out(open);
        if shaped <= 0.0 {
            return;
        }
        for target in &self.targets {
            let start = target.read(rig).clamp(0.0, 1.0);
            target.write(rig, start + (1.0 - start) * shaped);
        }
    }

    /// Close the mouth immediately and forget audio history
    pub fn reset(&mut self) {
        self.smoothed_intensity = 0.0;
        self.target_opening = 0.0;
        self.current_opening = 0.0;
    }
}
