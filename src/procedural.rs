//! Procedural body motion layered over the baked pose
//!
//! Continuous motions are sinusoids on one axis of one or more bone roles.
//! Gestures are one-shot offsets that rise and fall over a fixed duration and
//! then drop out of the active set. Every contribution is an offset; they are
//! summed on top of whatever the frame already holds for that bone.

use crate::error::EngineError;
use crate::rig::{BoneRole, Rig, SkeletonCache};
use crate::{ease_in_out, TIME_EPSILON};
use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;

/// Largest accepted energy scale
const MAX_ENERGY: f32 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

/// A continuous sinusoidal motion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MotionConfig {
    pub name: String,
    pub roles: Vec<BoneRole>,
    pub axis: Axis,
    /// Radians
    pub amplitude: f32,
    /// Hz
    pub frequency: f32,
    /// Radians
    #[serde(default)]
    pub phase: f32,
}

impl MotionConfig {
    pub fn new(
        name: &str,
        roles: &[BoneRole],
        axis: Axis,
        amplitude: f32,
        frequency: f32,
    ) -> Self {
        Self {
            name: name.to_string(),
            roles: roles.to_vec(),
            axis,
            amplitude,
            frequency,
            phase: 0.0,
        }
    }

    pub fn with_phase(mut self, phase: f32) -> Self {
        self.phase = phase;
        self
    }

    /// Offset at `cycle` turns into the period, `cycle` in [0, 1)
    #[inline]
    pub fn offset(&self, cycle: f32) -> f32 {
        (cycle * TAU + self.phase).sin() * self.amplitude
    }
}

/// Peak rotation offset of one bone axis during a gesture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GestureOffset {
    pub role: BoneRole,
    pub axis: Axis,
    /// Radians at the peak of the gesture
    pub angle: f32,
}

/// A one-shot motion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GestureConfig {
    pub name: String,
    /// Seconds from start to settled
    pub duration: f32,
    pub offsets: Vec<GestureOffset>,
}

impl GestureConfig {
    pub fn new(name: &str, duration: f32, offsets: &[(BoneRole, Axis, f32)]) -> Self {
        Self {
            name: name.to_string(),
            duration,
            offsets: offsets
                .iter()
                .map(|&(role, axis, angle)| GestureOffset { role, axis, angle })
                .collect(),
        }
    }

    /// There-and-back envelope in [0, 1] at `elapsed` seconds
    pub fn envelope(&self, elapsed: f32) -> f32 {
        if self.duration <= 0.0 {
            return 0.0;
        }
        let progress = (elapsed / self.duration).clamp(0.0, 1.0);
        if progress < 0.5 {
            ease_in_out(progress * 2.0)
        } else {
            ease_in_out((1.0 - progress) * 2.0)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProceduralConfig {
    pub enabled: bool,
    pub motions: Vec<MotionConfig>,
    pub gestures: Vec<GestureConfig>,
}

impl Default for ProceduralConfig {
    fn default() -> Self {
        use BoneRole::*;
        Self {
            enabled: true,
            motions: vec![
                MotionConfig::new("breathing", &[Chest], Axis::X, 0.02, 0.25),
                MotionConfig::new("spineSway", &[Spine], Axis::Y, 0.015, 0.15),
                MotionConfig::new("headSway", &[Head], Axis::Z, 0.03, 0.2),
                MotionConfig::new("headBob", &[Head], Axis::X, 0.015, 0.35).with_phase(1.0),
                MotionConfig::new("shoulderBounce", &[ShoulderL, ShoulderR], Axis::Z, 0.02, 0.5),
            ],
            gestures: vec![
                GestureConfig::new(
                    "emphasize",
                    0.6,
                    &[
                        (UpperArmR, Axis::Z, -0.3),
                        (ForearmR, Axis::X, -0.5),
                        (Head, Axis::X, 0.1),
                    ],
                ),
                GestureConfig::new(
                    "shrug",
                    0.8,
                    &[
                        (ShoulderL, Axis::Z, 0.25),
                        (ShoulderR, Axis::Z, -0.25),
                        (Head, Axis::Z, 0.08),
                    ],
                ),
                GestureConfig::new("nod", 0.5, &[(Head, Axis::X, 0.25), (Neck, Axis::X, 0.1)]),
            ],
        }
    }
}

/// A motion layer resolved against this rig
struct Layer {
    bones: Vec<usize>,
    motion: MotionConfig,
    /// Position within the current period, kept wrapped so long sessions
    /// keep sub-frame precision
    cycle: f32,
}

struct ActiveGesture {
    gesture: usize,
    elapsed: f32,
}

pub struct ProceduralMotion {
    enabled: bool,
    layers: Vec<Layer>,
    gestures: Vec<GestureConfig>,
    /// Bone index per gesture offset, aligned with `GestureConfig::offsets`
    gesture_bones: Vec<Vec<Option<usize>>>,
    active: Vec<ActiveGesture>,
    time: f64,
    energy: f32,
}

impl ProceduralMotion {
    pub fn new(config: ProceduralConfig, cache: &SkeletonCache) -> Self {
        let layers: Vec<Layer> = config
            .motions
            .into_iter()
            .filter_map(|motion| {
                let bones: Vec<usize> = motion
                    .roles
                    .iter()
                    .filter_map(|role| cache.get_bone(*role))
                    .collect();
                if bones.is_empty() {
                    log::debug!("Motion `{}` has no bones on this rig", motion.name);
                    None
                } else {
                    Some(Layer {
                        bones,
                        motion,
                        cycle: 0.0,
                    })
                }
            })
            .collect();

        let gesture_bones = config
            .gestures
            .iter()
            .map(|gesture| {
                gesture
                    .offsets
                    .iter()
                    .map(|offset| cache.get_bone(offset.role))
                    .collect()
            })
            .collect();

        if config.enabled && layers.is_empty() && !cache.is_degenerate() {
            log::warn!("No procedural motion could be bound to this rig");
        }

        Self {
            enabled: config.enabled,
            layers,
            gestures: config.gestures,
            gesture_bones,
            active: Vec::new(),
            time: 0.0,
            energy: 1.0,
        }
    }

    /// Accumulated motion time in seconds
    pub fn time(&self) -> f32 {
        self.time as f32
    }

    pub fn energy(&self) -> f32 {
        self.energy
    }

    pub fn active_gestures(&self) -> usize {
        self.active.len()
    }

    pub fn has_gesture(&self, name: &str) -> bool {
        self.gestures.iter().any(|g| g.name == name)
    }

    /// Names of the motions that found at least one bone
    pub fn bound_motions(&self) -> impl Iterator<Item = &str> {
        self.layers.iter().map(|layer| layer.motion.name.as_str())
    }

    /// Scale continuous amplitudes; gestures are unaffected
    pub fn set_energy(&mut self, scale: f32) {
        if scale.is_finite() {
            self.energy = scale.clamp(0.0, MAX_ENERGY);
        } else {
            log::warn!("Ignoring non-finite procedural energy {}", scale);
        }
    }

    /// Start a one-shot gesture; overlapping instances are summed
    pub fn trigger_gesture(&mut self, name: &str) -> Result<(), EngineError> {
        let gesture = self
            .gestures
            .iter()
            .position(|g| g.name == name)
            .ok_or_else(|| EngineError::UnknownGesture(name.to_string()))?;
        self.active.push(ActiveGesture {
            gesture,
            elapsed: 0.0,
        });
        Ok(())
    }

    /// Advance the motion clock and retire finished gestures
    pub fn update(&mut self, delta: f32) {
        let delta = if delta.is_finite() { delta.max(0.0) } else { 0.0 };
        self.time += f64::from(delta);
        for layer in &mut self.layers {
            layer.cycle = (layer.cycle + delta * layer.motion.frequency).rem_euclid(1.0);
        }

        let gestures = &self.gestures;
        self.active.retain_mut(|active| {
            active.elapsed += delta;
            active.elapsed + TIME_EPSILON < gestures[active.gesture].duration
        });
    }

    /// Add every contribution to the rig's current rotations
    pub fn apply(&self, rig: &mut Rig) {
        if !self.enabled {
            return;
        }

        for layer in &self.layers {
            let offset = layer.motion.offset(layer.cycle) * self.energy;
            for &bone in &layer.bones {
                if let Some(bone) = rig.bones.get_mut(bone) {
                    bone.rotation[layer.motion.axis.index()] += offset;
                }
            }
        }

        for active in &self.active {
            let gesture = &self.gestures[active.gesture];
            let envelope = gesture.envelope(active.elapsed);
            for (offset, bone) in gesture.offsets.iter().zip(&self.gesture_bones[active.gesture]) {
                if let Some(bone) = bone.and_then(|b| rig.bones.get_mut(b)) {
                    bone.rotation[offset.axis.index()] += offset.angle * envelope;
                }
            }
        }
    }
}
