//! Engine tuning tables
//!
//! Every field has a default, so hosts only send the values they override.

use crate::animation::AnimationConfig;
use crate::blink::BlinkConfig;
use crate::error::EngineError;
use crate::expression::{BlendAdvance, ExpressionConfig};
use crate::lipsync::LipSyncConfig;
use crate::morph::MorphNamePolicy;
use crate::procedural::ProceduralConfig;
use crate::rig::BoneNamePolicy;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub bones: BoneNamePolicy,
    pub morphs: MorphNamePolicy,
    pub blink: BlinkConfig,
    pub lip_sync: LipSyncConfig,
    pub expression: ExpressionConfig,
    pub procedural: ProceduralConfig,
    pub animation: AnimationConfig,
}

/// `value` if finite and at least `min`, otherwise `fallback`
fn checked(value: f32, min: f32, fallback: f32, what: &str) -> f32 {
    if value.is_finite() && value >= min {
        value
    } else {
        log::warn!("Invalid {} ({}), using {}", what, value, fallback);
        fallback
    }
}

impl EngineConfig {
    /// Parse host overrides from JSON
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        serde_json::from_str(json).map_err(|source| EngineError::Parse {
            what: "engine config",
            source,
        })
    }

    /// Repair values the controllers cannot work with
    pub fn sanitized(mut self) -> Self {
        let defaults = EngineConfig::default();

        let blink = &mut self.blink;
        let d = &defaults.blink;
        blink.min_interval = checked(blink.min_interval, 0.0, d.min_interval, "minInterval");
        blink.max_interval = checked(blink.max_interval, 0.0, d.max_interval, "maxInterval");
        if blink.min_interval > blink.max_interval {
            log::warn!(
                "Blink interval range [{}, {}] is inverted; swapping",
                blink.min_interval,
                blink.max_interval
            );
            std::mem::swap(&mut blink.min_interval, &mut blink.max_interval);
        }
        blink.close_duration =
            checked(blink.close_duration, 0.0, d.close_duration, "closeDuration");
        blink.open_duration = checked(blink.open_duration, 0.0, d.open_duration, "openDuration");

        let lip = &mut self.lip_sync;
        let d = &defaults.lip_sync;
        lip.smoothing = checked(lip.smoothing, 0.0, d.smoothing, "smoothing").min(1.0);
        lip.min_threshold = checked(lip.min_threshold, 0.0, d.min_threshold, "minThreshold");
        lip.response_speed = checked(lip.response_speed, 0.0, d.response_speed, "responseSpeed");
        lip.close_speed = checked(lip.close_speed, 0.0, d.close_speed, "closeSpeed");
        lip.mid_weight = checked(lip.mid_weight, 0.0, d.mid_weight, "midWeight");
        lip.high_weight = checked(lip.high_weight, 0.0, d.high_weight, "highWeight");

        let expression = &mut self.expression;
        expression.blend = match expression.blend {
            BlendAdvance::PerSecond { rate } if rate.is_finite() && rate > 0.0 => expression.blend,
            BlendAdvance::PerUpdate { step } if step.is_finite() && step > 0.0 => expression.blend,
            invalid => {
                log::warn!("Invalid expression blend {:?}, using default", invalid);
                defaults.expression.blend
            }
        };
        for preset in &mut expression.presets {
            for value in preset.targets.values_mut() {
                if !value.is_finite() {
                    log::warn!("Non-finite value in expression `{}`, using 0", preset.name);
                    *value = 0.0;
                }
            }
        }
        let auto = &mut expression.auto;
        let d = &defaults.expression.auto;
        auto.smile_threshold =
            checked(auto.smile_threshold, 0.0, d.smile_threshold, "smileThreshold");
        auto.laugh_threshold =
            checked(auto.laugh_threshold, 0.0, d.laugh_threshold, "laughThreshold");
        if auto.smile_threshold > auto.laugh_threshold {
            log::warn!("Smile threshold above laugh threshold; swapping");
            std::mem::swap(&mut auto.smile_threshold, &mut auto.laugh_threshold);
        }
        auto.explicit_hold = checked(auto.explicit_hold, 0.0, d.explicit_hold, "explicitHold");

        self.procedural.motions.retain(|motion| {
            let ok = motion.amplitude.is_finite()
                && motion.frequency.is_finite()
                && motion.phase.is_finite();
            if !ok {
                log::warn!("Dropping motion `{}` with non-finite parameters", motion.name);
            }
            ok
        });
        self.procedural.gestures.retain(|gesture| {
            let ok = gesture.duration.is_finite()
                && gesture.duration > 0.0
                && gesture.offsets.iter().all(|o| o.angle.is_finite());
            if !ok {
                log::warn!("Dropping gesture `{}` with invalid parameters", gesture.name);
            }
            ok
        });

        self.animation.default_transition = checked(
            self.animation.default_transition,
            0.0,
            defaults.animation.default_transition,
            "defaultTransition",
        );
        for state in &mut self.animation.states {
            if !(state.weight.is_finite() && (0.0..=1.0).contains(&state.weight)) {
                log::warn!("State `{}` weight {} out of range, using 1", state.name, state.weight);
                state.weight = 1.0;
            }
        }

        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rig::BoneRole;
    use wasm_bindgen_test::*;

    #[test]
    #[wasm_bindgen_test]
    fn test_empty_json_is_default() {
        let config = EngineConfig::from_json("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.animation.states.len(), 7);
        assert_eq!(config.expression.presets.len(), 6);
        assert_eq!(config.procedural.gestures.len(), 3);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_partial_overrides() {
        let json = r#"{
            "blink": { "minInterval": 1.0 },
            "lipSync": { "closeSpeed": 4.0 },
            "expression": { "blend": { "mode": "perUpdate", "step": 0.05 } },
            "bones": { "head": ["Kopf"] },
            "animation": { "defaultTransition": 0.5 }
        }"#;
        let config = EngineConfig::from_json(json).unwrap();
        assert_eq!(config.blink.min_interval, 1.0);
        assert_eq!(config.blink.max_interval, 5.0);
        assert_eq!(config.lip_sync.close_speed, 4.0);
        assert_eq!(config.lip_sync.response_speed, 18.0);
        assert_eq!(config.expression.blend, BlendAdvance::PerUpdate { step: 0.05 });
        assert_eq!(config.bones.candidates_for(BoneRole::Head), ["Kopf".to_string()]);
        assert!(config.bones.candidates_for(BoneRole::Chest).is_empty());
        assert_eq!(config.animation.default_transition, 0.5);
        assert_eq!(config.animation.initial_state, "idle");
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_malformed_json_is_parse_error() {
        let err = EngineConfig::from_json(r#"{ "blink": 3 }"#).unwrap_err();
        assert!(matches!(err, EngineError::Parse { what: "engine config", .. }));
        assert!(!err.is_recoverable());

        let err = EngineConfig::from_json(r#"{ "bones": { "tail": ["Tail"] } }"#).unwrap_err();
        assert!(err.to_string().contains("unknown bone role"));
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_sanitize_repairs_bad_values() {
        let mut config = EngineConfig::default();
        config.blink.min_interval = 6.0;
        config.blink.max_interval = 2.0;
        config.blink.close_duration = f32::NAN;
        config.lip_sync.smoothing = 4.0;
        config.lip_sync.response_speed = -1.0;
        config.expression.blend = BlendAdvance::PerSecond { rate: 0.0 };
        config.expression.auto.smile_threshold = 0.9;
        config.procedural.motions[0].amplitude = f32::INFINITY;
        config.procedural.gestures[0].duration = 0.0;
        config.animation.default_transition = -2.0;
        config.animation.states[0].weight = 3.0;

        let config = config.sanitized();
        assert_eq!((config.blink.min_interval, config.blink.max_interval), (2.0, 6.0));
        assert_eq!(config.blink.close_duration, 0.15);
        assert_eq!(config.lip_sync.smoothing, 1.0);
        assert_eq!(config.lip_sync.response_speed, 18.0);
        assert_eq!(config.expression.blend, BlendAdvance::PerSecond { rate: 3.0 });
        assert_eq!(config.expression.auto.smile_threshold, 0.6);
        assert_eq!(config.expression.auto.laugh_threshold, 0.9);
        assert_eq!(config.procedural.motions.len(), 4);
        assert_eq!(config.procedural.gestures.len(), 2);
        assert_eq!(config.animation.default_transition, 0.3);
        assert_eq!(config.animation.states[0].weight, 1.0);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_default_survives_sanitize_unchanged() {
        assert_eq!(EngineConfig::default().sanitized(), EngineConfig::default());
    }
}
