//! Facial expression presets and blending
//!
//! Exactly one preset is current and one is target; a blend factor in [0, 1]
//! interpolates every morph value between them. Presets that omit a morph
//! target hold it at zero.

use crate::error::EngineError;
use crate::lipsync::AudioBands;
use crate::morph::{MorphBinding, MorphTargetMap};
use crate::rig::Rig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Blend factor within this distance of 1 completes the transition
const BLEND_COMPLETE_EPSILON: f32 = 1e-4;

/// A named set of morph target values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionPreset {
    pub name: String,
    #[serde(default)]
    pub targets: BTreeMap<String, f32>,
}

impl ExpressionPreset {
    pub fn new<I, S>(name: impl Into<String>, targets: I) -> Self
    where
        I: IntoIterator<Item = (S, f32)>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            targets: targets.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// How the blend factor advances
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum BlendAdvance {
    /// Wall-clock: `rate` per second, independent of frame rate
    PerSecond { rate: f32 },
    /// Fixed `step` per update call, whatever the delta
    PerUpdate { step: f32 },
}

impl BlendAdvance {
    fn increment(self, delta: f32) -> f32 {
        match self {
            BlendAdvance::PerSecond { rate } => rate.max(0.0) * delta,
            BlendAdvance::PerUpdate { step } => step.max(0.0),
        }
    }
}

/// Audio-reactive expression selection while narration plays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AutoExpressionConfig {
    pub enabled: bool,
    /// High band magnitude above which the character laughs
    pub laugh_threshold: f32,
    /// High band magnitude above which the character smiles
    pub smile_threshold: f32,
    pub laugh: String,
    pub smile: String,
    pub rest: String,
    /// Seconds an explicit `set_expression` keeps the classifier away
    pub explicit_hold: f32,
}

impl Default for AutoExpressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            laugh_threshold: 0.6,
            smile_threshold: 0.3,
            laugh: "laugh".to_string(),
            smile: "smile".to_string(),
            rest: "neutral".to_string(),
            explicit_hold: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExpressionConfig {
    pub presets: Vec<ExpressionPreset>,
    pub blend: BlendAdvance,
    pub auto: AutoExpressionConfig,
    pub initial: String,
}

impl Default for ExpressionConfig {
    fn default() -> Self {
        Self {
            presets: default_presets(),
            blend: BlendAdvance::PerSecond { rate: 3.0 },
            auto: AutoExpressionConfig::default(),
            initial: "neutral".to_string(),
        }
    }
}

/// ARKit-style blendshape names
pub fn default_presets() -> Vec<ExpressionPreset> {
    vec![
        ExpressionPreset::new("neutral", Vec::<(String, f32)>::new()),
        ExpressionPreset::new(
            "smile",
            [
                ("mouthSmileLeft", 0.7),
                ("mouthSmileRight", 0.7),
                ("cheekSquintLeft", 0.3),
                ("cheekSquintRight", 0.3),
            ],
        ),
        ExpressionPreset::new(
            "laugh",
            [
                ("mouthSmileLeft", 1.0),
                ("mouthSmileRight", 1.0),
                ("cheekSquintLeft", 0.6),
                ("cheekSquintRight", 0.6),
                ("eyeSquintLeft", 0.5),
                ("eyeSquintRight", 0.5),
                ("browInnerUp", 0.2),
            ],
        ),
        ExpressionPreset::new(
            "shocked",
            [
                ("eyeWideLeft", 0.9),
                ("eyeWideRight", 0.9),
                ("browInnerUp", 0.8),
                ("browOuterUpLeft", 0.6),
                ("browOuterUpRight", 0.6),
                ("mouthFunnel", 0.4),
            ],
        ),
        ExpressionPreset::new(
            "angry",
            [
                ("browDownLeft", 0.9),
                ("browDownRight", 0.9),
                ("noseSneerLeft", 0.5),
                ("noseSneerRight", 0.5),
                ("mouthFrownLeft", 0.6),
                ("mouthFrownRight", 0.6),
            ],
        ),
        ExpressionPreset::new(
            "confused",
            [
                ("browInnerUp", 0.5),
                ("browDownLeft", 0.4),
                ("eyeSquintRight", 0.3),
                ("mouthLeft", 0.3),
                ("mouthPucker", 0.2),
            ],
        ),
    ]
}

/// Outcome of a successful `set_expression`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpressionChange {
    /// Snapped to the preset with no blend
    Snapped,
    /// A blend towards the preset began
    Started,
    /// Already the target; nothing restarted
    Unchanged,
}

pub struct ExpressionBlender {
    blend_advance: BlendAdvance,
    auto: AutoExpressionConfig,
    names: Vec<String>,
    /// Union of every morph name in any preset, sorted
    known_targets: Vec<String>,
    /// Per preset, values aligned with `known_targets`
    dense: Vec<Vec<f32>>,
    /// Rig slots for each known target, aligned with `known_targets`
    writes: Vec<Vec<MorphBinding>>,
    current: usize,
    target: usize,
    /// Values blended from; a snapshot when retargeted mid-blend
    from_values: Vec<f32>,
    blend: f32,
    /// Seconds left during which the classifier must not override
    explicit_hold_left: f32,
    explicit_pending: bool,
}

impl ExpressionBlender {
    pub fn new(config: ExpressionConfig, morphs: &MorphTargetMap) -> Self {
        let mut presets = config.presets;
        if presets.is_empty() {
            log::warn!("No expression presets configured; adding an empty neutral preset");
            presets.push(ExpressionPreset::new("neutral", Vec::<(String, f32)>::new()));
        }

        let known_targets: Vec<String> = presets
            .iter()
            .flat_map(|preset| preset.targets.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let dense = presets
            .iter()
            .map(|preset| {
                known_targets
                    .iter()
                    .map(|name| preset.targets.get(name).copied().unwrap_or(0.0))
                    .collect()
            })
            .collect();

        let writes: Vec<Vec<MorphBinding>> = known_targets
            .iter()
            .map(|name| morphs.named(name).cloned().collect())
            .collect();

        let missing = writes.iter().filter(|w| w.is_empty()).count();
        if missing > 0 {
            log::debug!(
                "{} of {} expression morph targets are absent from this rig",
                missing,
                known_targets.len()
            );
        }

        let names: Vec<String> = presets.into_iter().map(|p| p.name).collect();
        let initial = names
            .iter()
            .position(|n| *n == config.initial)
            .unwrap_or_else(|| {
                log::warn!(
                    "Initial expression `{}` is not a preset; using `{}`",
                    config.initial,
                    names[0]
                );
                0
            });

        let mut blender = Self {
            blend_advance: config.blend,
            auto: config.auto,
            names,
            known_targets,
            dense,
            writes,
            current: initial,
            target: initial,
            from_values: Vec::new(),
            blend: 1.0,
            explicit_hold_left: 0.0,
            explicit_pending: false,
        };
        blender.from_values = blender.dense[initial].clone();
        blender
    }

    pub fn current(&self) -> &str {
        &self.names[self.current]
    }

    pub fn target(&self) -> &str {
        &self.names[self.target]
    }

    /// Blend factor in [0, 1]
    pub fn blend_factor(&self) -> f32 {
        self.blend
    }

    pub fn is_blending(&self) -> bool {
        self.current != self.target
    }

    pub fn has_expression(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn expression_names(&self) -> &[String] {
        &self.names
    }

    /// Blended value of a morph name before baselines are added
    pub fn value(&self, morph: &str) -> Option<f32> {
        let i = self.known_targets.iter().position(|n| n == morph)?;
        Some(self.blended(i))
    }

    #[inline]
    fn blended(&self, i: usize) -> f32 {
        let from = self.from_values[i];
        let to = self.dense[self.target][i];
        from + (to - from) * self.blend
    }

    /// Explicit command; wins over the audio classifier
    pub fn set_expression(
        &mut self,
        name: &str,
        immediate: bool,
    ) -> Result<ExpressionChange, EngineError> {
        let index = self
            .names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| EngineError::UnknownExpression(name.to_string()))?;

        self.explicit_pending = true;
        self.explicit_hold_left = self.auto.explicit_hold.max(0.0);

        if immediate {
            self.current = index;
            self.target = index;
            self.blend = 1.0;
            self.from_values.clone_from(&self.dense[index]);
            return Ok(ExpressionChange::Snapped);
        }

        Ok(self.retarget(index))
    }

    fn retarget(&mut self, index: usize) -> ExpressionChange {
        if index == self.target {
            return ExpressionChange::Unchanged;
        }

        // Blend onward from whatever is on screen right now
        let snapshot: Vec<f32> = (0..self.known_targets.len())
            .map(|i| self.blended(i))
            .collect();
        self.from_values = snapshot;
        self.current = self.target;
        self.target = index;
        self.blend = 0.0;
        ExpressionChange::Started
    }

    fn classify(&self, bands: AudioBands) -> &str {
        if bands.high > self.auto.laugh_threshold {
            &self.auto.laugh
        } else if bands.high > self.auto.smile_threshold {
            &self.auto.smile
        } else {
            &self.auto.rest
        }
    }

    /// Advance the blend; `audio` is present only while narration plays
    pub fn update(&mut self, delta: f32, audio: Option<AudioBands>) {
        let delta = if delta.is_finite() { delta.max(0.0) } else { 0.0 };
        self.explicit_hold_left = (self.explicit_hold_left - delta).max(0.0);

        if let Some(bands) = audio {
            let blocked = self.explicit_pending || self.explicit_hold_left > 0.0;
            if self.auto.enabled && !blocked {
                let wanted = self.classify(bands.sanitized()).to_string();
                match self.names.iter().position(|n| *n == wanted) {
                    Some(index) => {
                        self.retarget(index);
                    }
                    None => log::debug!("Auto expression `{}` is not a preset", wanted),
                }
            }
        }
        self.explicit_pending = false;

        if self.blend < 1.0 {
            self.blend = (self.blend + self.blend_advance.increment(delta)).min(1.0);
            if self.blend >= 1.0 - BLEND_COMPLETE_EPSILON {
                self.complete();
            }
        }
    }

    fn complete(&mut self) {
        self.blend = 1.0;
        self.current = self.target;
        self.from_values.clone_from(&self.dense[self.target]);
    }

    /// Write `baseline + blended value` into every preset morph target
    pub fn apply(&self, rig: &mut Rig) {
        for (i, bindings) in self.writes.iter().enumerate() {
            let value = self.blended(i);
            for binding in bindings {
                binding.write(rig, (binding.baseline + value).clamp(0.0, 1.0));
            }
        }
    }
}
