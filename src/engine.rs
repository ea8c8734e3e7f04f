//! One animated character
//!
//! [`CharacterEngine`] owns the rig and every controller. Each frame resets
//! bones and morphs to their captured baselines, then writes in a fixed
//! order: baked pose, procedural overlay, expression, jaw, blink. The jaw and
//! eyelids open or close from whatever the expression left in a shared
//! target, so a resting jaw and open lids leave a preset untouched.

use crate::animation::{AnimationStateMachine, ClipLibrary};
use crate::blink::{BlinkController, BlinkState};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::expression::ExpressionBlender;
use crate::lipsync::{AudioBands, JawController};
use crate::morph::MorphTargetMap;
use crate::procedural::ProceduralMotion;
use crate::rig::{Rig, SkeletonCache};
use crate::script::{AnimationScript, ScriptCue, ScriptEvent, ScriptPlayer, ScriptVocabulary};
use serde::Serialize;

/// Procedural energy for a script segment of the given intensity
fn energy_for(intensity: f32) -> f32 {
    0.5 + intensity.clamp(0.0, 1.0)
}

/// Log a failed command and report whether it applied
fn applied<T>(result: Result<T, EngineError>) -> bool {
    match result {
        Ok(_) => true,
        Err(err) if err.is_recoverable() => {
            log::warn!("{}", err);
            false
        }
        Err(err) => {
            log::error!("{}", err);
            false
        }
    }
}

/// Serializable view of the engine for hosts and debugging
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSnapshot {
    pub current_state: String,
    pub target_state: String,
    pub transitioning: bool,
    pub locked: bool,
    pub expression: String,
    pub target_expression: String,
    pub expression_blend: f32,
    pub blink_state: BlinkState,
    pub jaw_opening: f32,
    pub procedural_time: f32,
    pub active_gestures: usize,
    pub script_time: Option<f32>,
    pub script_segment: Option<usize>,
}

pub struct CharacterEngine {
    rig: Rig,
    skeleton: SkeletonCache,
    morphs: MorphTargetMap,
    animation: AnimationStateMachine,
    procedural: ProceduralMotion,
    expressions: ExpressionBlender,
    jaw: JawController,
    blink: BlinkController,
    script: Option<ScriptPlayer>,
    vocabulary: ScriptVocabulary,
    rest_state: String,
    rest_expression: String,
}

impl CharacterEngine {
    /// Take ownership of a loaded rig and bind every controller to it
    pub fn new(rig: Rig, config: EngineConfig) -> Self {
        Self::build(rig, config, None)
    }

    /// Same as `new`, with a fixed blink interval sequence
    pub fn with_blink_seed(rig: Rig, config: EngineConfig, seed: u64) -> Self {
        Self::build(rig, config, Some(seed))
    }

    fn build(mut rig: Rig, config: EngineConfig, seed: Option<u64>) -> Self {
        let config = config.sanitized();

        let skeleton = SkeletonCache::initialize(&rig, &config.bones);
        let morphs = MorphTargetMap::scan(&rig);
        if skeleton.is_degenerate() && morphs.is_empty() {
            let err = EngineError::DegenerateRig("bones or morph targets");
            log::warn!("{}; character will stay static", err);
        }

        let clips = std::mem::take(&mut rig.clips);
        let library = ClipLibrary::new(clips, &rig);

        let blink_targets = morphs.find_matching(&config.morphs.blink);
        let jaw_targets = morphs.find_matching(&config.morphs.jaw);
        let blink = match seed {
            Some(seed) => BlinkController::with_seed(config.blink, blink_targets, seed),
            None => BlinkController::new(config.blink, blink_targets),
        };

        let rest_state = config.animation.initial_state.clone();
        let rest_expression = config.expression.initial.clone();
        let animation = AnimationStateMachine::new(config.animation, library);
        let expressions = ExpressionBlender::new(config.expression, &morphs);
        let vocabulary = ScriptVocabulary {
            animations: animation.state_names().map(str::to_string).collect(),
            expressions: expressions.expression_names().to_vec(),
        };

        let mut engine = Self {
            procedural: ProceduralMotion::new(config.procedural, &skeleton),
            jaw: JawController::new(config.lip_sync, jaw_targets),
            rig,
            skeleton,
            morphs,
            animation,
            expressions,
            blink,
            script: None,
            vocabulary,
            rest_state,
            rest_expression,
        };
        engine.evaluate();
        engine
    }

    pub fn rig(&self) -> &Rig {
        &self.rig
    }

    pub fn skeleton(&self) -> &SkeletonCache {
        &self.skeleton
    }

    pub fn morphs(&self) -> &MorphTargetMap {
        &self.morphs
    }

    pub fn animation(&self) -> &AnimationStateMachine {
        &self.animation
    }

    pub fn expressions(&self) -> &ExpressionBlender {
        &self.expressions
    }

    pub fn procedural(&self) -> &ProceduralMotion {
        &self.procedural
    }

    pub fn jaw(&self) -> &JawController {
        &self.jaw
    }

    pub fn blink(&self) -> &BlinkController {
        &self.blink
    }

    pub fn script(&self) -> Option<&ScriptPlayer> {
        self.script.as_ref()
    }

    /// Advance every controller by `delta` seconds and pose the rig.
    ///
    /// `audio` is present only while narration plays.
    pub fn update(&mut self, delta: f32, audio: Option<AudioBands>) {
        let delta = if delta.is_finite() { delta.max(0.0) } else { 0.0 };

        self.advance_script(delta);

        self.animation.update(delta);
        self.procedural.update(delta);
        self.expressions.update(delta, audio);
        self.jaw.update(delta, audio);
        self.blink.update(delta);

        self.evaluate();
    }

    /// Reset to baselines, then write every layer in order
    fn evaluate(&mut self) {
        self.skeleton.reset_to_baseline(&mut self.rig);
        self.morphs.reset_to_baseline(&mut self.rig);

        self.animation.apply(&mut self.rig, &self.skeleton);
        self.procedural.apply(&mut self.rig);
        self.expressions.apply(&mut self.rig);
        self.jaw.apply(&mut self.rig);
        self.blink.apply(&mut self.rig);
    }

    fn advance_script(&mut self, delta: f32) {
        let Some(player) = self.script.as_mut() else {
            return;
        };
        match player.update(delta) {
            Some(ScriptEvent::Cue(cue)) => self.perform(cue),
            Some(ScriptEvent::Finished) => {
                log::info!("Animation script finished");
                self.script = None;
                self.rest();
            }
            None => {}
        }
    }

    fn perform(&mut self, cue: ScriptCue) {
        log::debug!(
            "Script segment {}: {} / {} at {:.2}",
            cue.segment,
            cue.animation,
            cue.expression,
            cue.intensity
        );
        self.set_state(&cue.animation, None);
        self.set_expression(&cue.expression, false);
        self.procedural.set_energy(energy_for(cue.intensity));
    }

    fn rest(&mut self) {
        let state = self.rest_state.clone();
        let expression = self.rest_expression.clone();
        self.set_state(&state, None);
        self.set_expression(&expression, false);
        self.procedural.set_energy(1.0);
    }

    /// Crossfade to a state; `None` uses the default transition
    pub fn set_state(&mut self, name: &str, transition: Option<f32>) -> bool {
        applied(self.animation.set_state(name, transition))
    }

    /// Restart a state's clip even if it is already playing
    pub fn replay_state(&mut self, name: &str, transition: Option<f32>) -> bool {
        applied(self.animation.replay_state(name, transition))
    }

    pub fn hold_state(&mut self, name: &str) -> bool {
        applied(self.animation.hold_state(name))
    }

    pub fn unlock_state(&mut self) {
        self.animation.unlock_state();
    }

    pub fn set_expression(&mut self, name: &str, immediate: bool) -> bool {
        applied(self.expressions.set_expression(name, immediate))
    }

    pub fn trigger_gesture(&mut self, name: &str) -> bool {
        applied(self.procedural.trigger_gesture(name))
    }

    /// Pin the eyelids shut, or open them and resume blinking
    pub fn force_blink(&mut self, closed: bool) {
        if closed {
            self.blink.force_close();
        } else {
            self.blink.force_open();
        }
    }

    /// Let the eyelids follow the blink timer again
    pub fn release_blink(&mut self) {
        self.blink.release();
    }

    /// Perform a timeline from the narration pipeline.
    ///
    /// Unusable input is replaced by the fallback performance; returns
    /// false in that case.
    pub fn load_script(&mut self, text: &str, transcript: &str, expected_duration: f32) -> bool {
        let script = AnimationScript::load(text, transcript, expected_duration, &self.vocabulary);
        let usable = !script.is_fallback();
        self.play_script(script);
        usable
    }

    pub fn play_script(&mut self, script: AnimationScript) {
        log::info!(
            "Playing animation script: {} segments over {:.1}s",
            script.timeline.len(),
            script.duration()
        );
        self.script = Some(ScriptPlayer::new(script));
    }

    /// Abandon the running script, close the mouth and return to rest
    pub fn stop_script(&mut self) {
        if self.script.take().is_some() {
            log::info!("Animation script stopped");
            self.jaw.reset();
            self.rest();
        }
    }

    /// Bone rotations as flat `[x, y, z]` triples in rig order
    pub fn bone_rotations(&self) -> Vec<f32> {
        self.rig
            .bones
            .iter()
            .flat_map(|bone| bone.rotation.to_array())
            .collect()
    }

    pub fn morph_influences(&self, mesh: usize) -> Option<&[f32]> {
        self.rig.meshes.get(mesh).map(|m| m.influences.as_slice())
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            current_state: self.animation.current_state().to_string(),
            target_state: self.animation.target_state().to_string(),
            transitioning: self.animation.is_transitioning(),
            locked: self.animation.is_locked(),
            expression: self.expressions.current().to_string(),
            target_expression: self.expressions.target().to_string(),
            expression_blend: self.expressions.blend_factor(),
            blink_state: self.blink.state(),
            jaw_opening: self.jaw.opening(),
            procedural_time: self.procedural.time(),
            active_gestures: self.procedural.active_gestures(),
            script_time: self.script.as_ref().map(ScriptPlayer::time),
            script_segment: self.script.as_ref().and_then(ScriptPlayer::active_index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blink::BlinkConfig;
    use crate::expression::ExpressionPreset;
    use crate::rig::{Bone, BoneTrack, Clip, MorphMesh, RotationKeyframe};
    use glam::{Quat, Vec3};
    use wasm_bindgen_test::*;

    const FRAME: f32 = 1.0 / 60.0;
    const EPSILON: f32 = 1e-5;

    fn clip(name: &str, angle: f32) -> Clip {
        Clip::new(
            name,
            2.0,
            vec![BoneTrack::new(
                "mixamorig:Spine",
                vec![
                    RotationKeyframe {
                        time: 0.0,
                        rotation: Quat::IDENTITY,
                    },
                    RotationKeyframe {
                        time: 1.0,
                        rotation: Quat::from_rotation_y(angle),
                    },
                ],
            )],
        )
    }

    fn character() -> Rig {
        Rig::new(
            vec![
                Bone::new("mixamorig:Hips", Vec3::new(0.05, 0.0, 0.0)),
                Bone::new("mixamorig:Spine", Vec3::ZERO).with_parent(0),
                Bone::new("mixamorig:Spine2", Vec3::new(0.1, 0.0, 0.0)).with_parent(1),
                Bone::new("mixamorig:Neck", Vec3::ZERO).with_parent(2),
                Bone::new("mixamorig:Head", Vec3::ZERO).with_parent(3),
                Bone::new("mixamorig:LeftShoulder", Vec3::ZERO).with_parent(2),
                Bone::new("mixamorig:RightShoulder", Vec3::ZERO).with_parent(2),
                Bone::new("Ponytail", Vec3::new(0.2, 0.1, 0.0)).with_parent(4),
            ],
            vec![
                MorphMesh::new(
                    "Face",
                    [
                        "eyeBlinkLeft",
                        "eyeBlinkRight",
                        "jawOpen",
                        "mouthSmileLeft",
                        "mouthSmileRight",
                    ],
                )
                .with_influence("eyeBlinkLeft", 0.1),
                MorphMesh::new("Teeth", ["jawOpen"]),
            ],
            vec![
                clip("Idle", 0.1),
                clip("Run", 0.6),
                clip("Sitting_Talk", 0.2),
                clip("Spellcast", 0.8),
                clip("Relax", -0.2),
            ],
        )
    }

    fn engine() -> CharacterEngine {
        let config = EngineConfig {
            blink: BlinkConfig {
                min_interval: 2.5,
                max_interval: 2.5,
                ..BlinkConfig::default()
            },
            ..EngineConfig::default()
        };
        CharacterEngine::with_blink_seed(character(), config, 3)
    }

    fn influence(engine: &CharacterEngine, mesh: usize, name: &str) -> f32 {
        engine.rig().meshes[mesh].influence(name).unwrap()
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_unrelated_bones_never_move() {
        let mut engine = engine();
        for frame in 0..900 {
            let audio = (frame % 3 == 0).then(|| AudioBands::new(0.8, 0.7, 0.5));
            engine.update(FRAME, audio);
        }
        let rig = engine.rig();
        assert_eq!(rig.bones[7].rotation, Vec3::new(0.2, 0.1, 0.0));
        assert_eq!(rig.bones[0].rotation, Vec3::new(0.05, 0.0, 0.0));
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_immediate_expression_reads_back_exactly() {
        let mut engine = engine();
        assert!(engine.set_expression("laugh", true));
        engine.update(0.0, None);
        assert_eq!(influence(&engine, 0, "mouthSmileLeft"), 1.0);
        assert_eq!(influence(&engine, 0, "mouthSmileRight"), 1.0);
        assert!((influence(&engine, 0, "eyeBlinkLeft") - 0.1).abs() < EPSILON);
        assert_eq!(influence(&engine, 1, "jawOpen"), 0.0);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_resting_jaw_and_open_lids_keep_preset_values() {
        let mut config = EngineConfig::default();
        config.expression.presets.push(ExpressionPreset::new(
            "yawn",
            [("jawOpen", 0.8), ("eyeBlinkLeft", 0.5), ("mouthSmileLeft", 0.3)],
        ));
        let mut engine = CharacterEngine::with_blink_seed(character(), config, 1);

        assert!(engine.set_expression("yawn", true));
        engine.update(FRAME, None);
        assert!((influence(&engine, 0, "jawOpen") - 0.8).abs() < EPSILON);
        assert!((influence(&engine, 1, "jawOpen") - 0.8).abs() < EPSILON);
        assert!((influence(&engine, 0, "eyeBlinkLeft") - 0.6).abs() < EPSILON);
        assert!((influence(&engine, 0, "mouthSmileLeft") - 0.3).abs() < EPSILON);

        // Closed lids and speech still reach past the preset
        engine.force_blink(true);
        for _ in 0..20 {
            engine.update(FRAME, Some(AudioBands::new(0.9, 1.0, 0.1)));
        }
        assert!((influence(&engine, 0, "eyeBlinkLeft") - 1.0).abs() < EPSILON);
        assert!(influence(&engine, 0, "jawOpen") > 0.8);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_speech_opens_every_jaw_target() {
        let mut engine = engine();
        for _ in 0..30 {
            engine.update(FRAME, Some(AudioBands::new(0.9, 1.0, 0.2)));
        }
        assert!(engine.jaw().opening() > 0.5);
        let face = influence(&engine, 0, "jawOpen");
        let teeth = influence(&engine, 1, "jawOpen");
        assert!(face > 0.0);
        assert_eq!(face, teeth);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_blink_cycle_through_engine() {
        let mut engine = engine();
        for _ in 0..10 {
            engine.update(0.25, None);
        }
        assert_ne!(engine.blink().state(), BlinkState::Open);
        engine.update(0.25, None);
        assert_eq!(engine.blink().state(), BlinkState::Open);
        assert!((influence(&engine, 0, "eyeBlinkLeft") - 0.1).abs() < EPSILON);

        engine.force_blink(true);
        engine.update(FRAME, None);
        assert!((influence(&engine, 0, "eyeBlinkRight") - 1.0).abs() < EPSILON);
        engine.force_blink(false);
        engine.update(FRAME, None);
        assert_eq!(influence(&engine, 0, "eyeBlinkRight"), 0.0);

        engine.force_blink(true);
        engine.release_blink();
        engine.update(FRAME, None);
        assert_eq!(engine.blink().state(), BlinkState::Opening);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_commands_report_failures_without_side_effects() {
        let mut engine = engine();
        assert!(!engine.set_state("moonwalk", None));
        assert!(!engine.set_expression("smug", false));
        assert!(!engine.trigger_gesture("dab"));
        assert!(engine.trigger_gesture("nod"));
        assert!(engine.set_state("idle", Some(0.5)));

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.current_state, "idle");
        assert_eq!(snapshot.target_expression, "neutral");
        assert_eq!(snapshot.active_gestures, 1);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_hold_blocks_state_changes() {
        let mut engine = engine();
        assert!(engine.hold_state("relax"));
        assert!(!engine.set_state("run", None));
        assert!(engine.snapshot().locked);

        engine.unlock_state();
        assert!(engine.set_state("run", Some(0.2)));
        engine.update(0.2, None);
        assert_eq!(engine.snapshot().current_state, "run");
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_fallback_script_drives_the_character() {
        let mut engine = engine();
        assert!(!engine.load_script("no timeline today", "roast", 8.0));

        engine.update(0.0, None);
        assert_eq!(engine.snapshot().script_segment, Some(0));
        assert!((engine.procedural().energy() - 1.0).abs() < EPSILON);

        engine.update(2.0, None);
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.target_state, "sitTalk");
        assert_eq!(snapshot.target_expression, "smile");
        assert!((engine.procedural().energy() - 1.2).abs() < EPSILON);

        engine.update(2.0, None);
        assert_eq!(engine.snapshot().target_state, "spellcast");

        engine.update(4.0, None);
        let snapshot = engine.snapshot();
        assert!(engine.script().is_none());
        assert_eq!(snapshot.target_state, "idle");
        assert_eq!(snapshot.target_expression, "neutral");
        assert_eq!(engine.procedural().energy(), 1.0);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_stop_script_returns_to_rest() {
        let mut engine = engine();
        engine.play_script(AnimationScript::fallback(8.0, "roast"));
        engine.update(5.0, None);
        assert_eq!(engine.snapshot().target_state, "spellcast");
        for _ in 0..20 {
            engine.update(FRAME, Some(AudioBands::new(0.9, 1.0, 0.1)));
        }
        assert!(engine.jaw().opening() > 0.0);

        engine.stop_script();
        assert!(engine.script().is_none());
        assert_eq!(engine.snapshot().target_state, "idle");
        assert_eq!(engine.jaw().opening(), 0.0);
        engine.update(0.0, None);
        assert_eq!(influence(&engine, 1, "jawOpen"), 0.0);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_degenerate_rig_is_static_not_fatal() {
        let mut engine = CharacterEngine::new(Rig::default(), EngineConfig::default());
        engine.update(FRAME, Some(AudioBands::new(1.0, 1.0, 1.0)));
        assert!(engine.trigger_gesture("shrug"));
        engine.update(10.0, None);
        assert!(engine.bone_rotations().is_empty());
        assert!(engine.morph_influences(0).is_none());
        assert!(!engine.set_state("run", None));
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_snapshot_serializes_camel_case() {
        let engine = engine();
        let json = serde_json::to_value(engine.snapshot()).unwrap();
        assert_eq!(json["currentState"], "idle");
        assert_eq!(json["blinkState"], "open");
        assert!(json["scriptTime"].is_null());
        assert_eq!(engine.bone_rotations().len(), 8 * 3);
    }
}
