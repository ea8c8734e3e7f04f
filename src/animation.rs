//! Baked clip playback and the animation state machine
//!
//! Clips are loaded with the rig and bound to bone indices once. A
//! [`ClipMixer`] keeps one lazily created [`Action`] per clip and crossfades
//! their weights; the [`AnimationStateMachine`] maps logical state names onto
//! clips and tracks the current/target transition.

use crate::error::EngineError;
use crate::rig::{euler_to_quat, quat_to_euler, Clip, Rig, SkeletonCache};
use crate::TIME_EPSILON;
use glam::Quat;
use serde::{Deserialize, Serialize};

/// Weight below which an action counts as silent
const SILENT_WEIGHT: f32 = 1e-4;

// ============================================================================
// Clip library
// ============================================================================

/// Loaded clips with their tracks bound to rig bones.
///
/// Read-only after construction.
pub struct ClipLibrary {
    clips: Vec<Clip>,
    /// Rig bone index per track, aligned with `Clip::tracks`
    bindings: Vec<Vec<Option<usize>>>,
}

impl ClipLibrary {
    pub fn new(clips: Vec<Clip>, rig: &Rig) -> Self {
        let bindings = clips
            .iter()
            .map(|clip| {
                clip.tracks
                    .iter()
                    .map(|track| {
                        let bone = rig.bone_index(&track.bone);
                        if bone.is_none() {
                            log::debug!(
                                "Clip `{}` track `{}` has no bone on this rig",
                                clip.name,
                                track.bone
                            );
                        }
                        bone
                    })
                    .collect()
            })
            .collect();

        if clips.is_empty() {
            log::warn!("Rig has no baked clips; state machine will only track names");
        } else {
            log::info!("Loaded {} baked clips", clips.len());
        }

        Self { clips, bindings }
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Clip> {
        self.clips.get(index)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.clips.iter().map(|clip| clip.name.as_str())
    }

    /// Find a clip by exact name, falling back to a case-insensitive
    /// substring match in either direction
    pub fn find(&self, name: &str) -> Option<usize> {
        if let Some(index) = self.clips.iter().position(|clip| clip.name == name) {
            return Some(index);
        }

        let wanted = name.to_lowercase();
        if wanted.is_empty() {
            return None;
        }
        let fallback = self
            .clips
            .iter()
            .position(|clip| clip.name.to_lowercase().contains(&wanted))
            .or_else(|| {
                self.clips.iter().position(|clip| {
                    let have = clip.name.to_lowercase();
                    !have.is_empty() && wanted.contains(&have)
                })
            });

        if let Some(index) = fallback {
            log::info!(
                "Clip `{}` not found, using `{}` instead",
                name,
                self.clips[index].name
            );
        }
        fallback
    }
}

// ============================================================================
// Actions and crossfades
// ============================================================================

/// Runtime playback handle for one clip
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    clip: usize,
    time: f32,
    weight: f32,
    looping: bool,
    playing: bool,
    fade_from: f32,
    fade_to: f32,
    fade_elapsed: f32,
    fade_duration: f32,
}

impl Action {
    fn new(clip: usize) -> Self {
        Self {
            clip,
            time: 0.0,
            weight: 0.0,
            looping: true,
            playing: false,
            fade_from: 0.0,
            fade_to: 0.0,
            fade_elapsed: 0.0,
            fade_duration: 0.0,
        }
    }

    pub fn clip(&self) -> usize {
        self.clip
    }

    /// Playback position in seconds, wrapped into the clip when looping
    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn weight(&self) -> f32 {
        self.weight
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Weight the current fade is heading towards
    pub fn fade_target(&self) -> f32 {
        self.fade_to
    }

    fn fade(&mut self, target: f32, duration: f32) {
        self.fade_from = self.weight;
        self.fade_to = target;
        self.fade_elapsed = 0.0;
        self.fade_duration = duration.max(0.0);
        if self.fade_duration <= 0.0 {
            self.weight = target;
        }
    }

    fn advance(&mut self, delta: f32, duration: f32) {
        if !self.playing {
            return;
        }
        self.time = if duration <= 0.0 {
            0.0
        } else if self.looping {
            (self.time + delta).rem_euclid(duration)
        } else {
            (self.time + delta).min(duration)
        };

        if self.weight != self.fade_to {
            self.fade_elapsed += delta;
            if self.fade_elapsed + TIME_EPSILON >= self.fade_duration {
                self.weight = self.fade_to;
            } else {
                let t = self.fade_elapsed / self.fade_duration;
                self.weight = self.fade_from + (self.fade_to - self.fade_from) * t;
            }
        }

        if self.fade_to <= 0.0 && self.weight <= SILENT_WEIGHT {
            self.weight = 0.0;
            self.playing = false;
            self.time = 0.0;
        }
    }
}

/// Crossfading clip player
#[derive(Debug, Clone, Default)]
pub struct ClipMixer {
    /// Created on first play, at most one per clip
    actions: Vec<Action>,
    active: Option<usize>,
}

impl ClipMixer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clip most recently started
    pub fn active_clip(&self) -> Option<usize> {
        self.active
    }

    pub fn action(&self, clip: usize) -> Option<&Action> {
        self.actions.iter().find(|action| action.clip == clip)
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    fn action_mut(&mut self, clip: usize) -> &mut Action {
        let index = match self.actions.iter().position(|action| action.clip == clip) {
            Some(index) => index,
            None => {
                self.actions.push(Action::new(clip));
                self.actions.len() - 1
            }
        };
        &mut self.actions[index]
    }

    /// Fade `clip` in to `weight` over `fade` seconds and every other clip out.
    ///
    /// A stopped clip, or any clip when `restart` is set, starts from time 0.
    pub fn play(&mut self, clip: usize, weight: f32, fade: f32, looping: bool, restart: bool) {
        let action = self.action_mut(clip);
        if restart || !action.playing {
            action.time = 0.0;
        }
        action.playing = true;
        action.looping = looping;
        action.fade(weight.clamp(0.0, 1.0), fade);

        for other in self.actions.iter_mut().filter(|a| a.clip != clip) {
            if other.playing && other.fade_to > 0.0 {
                other.fade(0.0, fade);
            }
        }
        self.active = Some(clip);
    }

    pub fn update(&mut self, delta: f32, library: &ClipLibrary) {
        for action in &mut self.actions {
            let duration = library.get(action.clip).map_or(0.0, |clip| clip.duration);
            action.advance(delta, duration);
        }
    }

    /// Write the blended pose of every audible action into the rig.
    ///
    /// Samples are combined by sequential weighted slerp; weight left over
    /// below 1 blends towards the bone's baseline.
    pub fn apply(&self, rig: &mut Rig, library: &ClipLibrary, cache: &SkeletonCache) {
        let mut blended: Vec<Option<(Quat, f32)>> = vec![None; rig.bones.len()];

        for action in self.actions.iter().filter(|a| a.playing && a.weight > SILENT_WEIGHT) {
            let (Some(clip), Some(bindings)) =
                (library.get(action.clip), library.bindings.get(action.clip))
            else {
                continue;
            };

            for (track, bone) in bindings.iter().enumerate() {
                let Some(bone) = *bone else { continue };
                let Some(sample) = clip.sample_track(track, action.time, action.looping) else {
                    continue;
                };
                let Some(slot) = blended.get_mut(bone) else {
                    continue;
                };

                *slot = Some(match *slot {
                    None => (sample, action.weight),
                    Some((accumulated, total)) => {
                        let total = total + action.weight;
                        (accumulated.slerp(sample, action.weight / total), total)
                    }
                });
            }
        }

        for (index, slot) in blended.into_iter().enumerate() {
            let Some((rotation, total)) = slot else { continue };
            let rotation = if total < 1.0 {
                let baseline = cache
                    .bone_baseline(index)
                    .map(euler_to_quat)
                    .unwrap_or(Quat::IDENTITY);
                baseline.slerp(rotation, total)
            } else {
                rotation
            };
            rig.bones[index].rotation = quat_to_euler(rotation);
        }
    }
}

// ============================================================================
// State machine
// ============================================================================

/// A logical animation state bound to a clip name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimationStateDef {
    pub name: String,
    pub clip: String,
    #[serde(default = "full_weight")]
    pub weight: f32,
    #[serde(default = "looping")]
    pub looping: bool,
}

fn full_weight() -> f32 {
    1.0
}

fn looping() -> bool {
    true
}

impl AnimationStateDef {
    pub fn new(name: &str, clip: &str) -> Self {
        Self {
            name: name.to_string(),
            clip: clip.to_string(),
            weight: 1.0,
            looping: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnimationConfig {
    pub states: Vec<AnimationStateDef>,
    /// Seconds
    pub default_transition: f32,
    pub initial_state: String,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            states: vec![
                AnimationStateDef::new("idle", "Idle"),
                AnimationStateDef::new("walkRelaxed", "Walk"),
                AnimationStateDef::new("walkThink", "Think"),
                AnimationStateDef::new("run", "Run"),
                AnimationStateDef::new("sitTalk", "Sit"),
                AnimationStateDef::new("spellcast", "Spell"),
                AnimationStateDef::new("relax", "Relax"),
            ],
            default_transition: 0.3,
            initial_state: "idle".to_string(),
        }
    }
}

/// Outcome of a successful state command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    /// Already current or already the target; nothing restarted
    Unchanged,
    /// A crossfade towards the state began
    Started,
    /// The state's clip restarted from the beginning
    Replayed,
    /// The state is pinned until unlocked
    Held,
}

pub struct AnimationStateMachine {
    states: Vec<AnimationStateDef>,
    default_transition: f32,
    library: ClipLibrary,
    mixer: ClipMixer,
    current: usize,
    target: usize,
    transitioning: bool,
    transition_elapsed: f32,
    transition_duration: f32,
    locked: bool,
}

impl AnimationStateMachine {
    pub fn new(config: AnimationConfig, library: ClipLibrary) -> Self {
        let mut states = config.states;
        if states.is_empty() {
            log::warn!("No animation states configured; adding `{}`", config.initial_state);
            states.push(AnimationStateDef::new(&config.initial_state, &config.initial_state));
        }

        let initial = match states.iter().position(|s| s.name == config.initial_state) {
            Some(index) => index,
            None => {
                log::warn!(
                    "Initial state `{}` is not configured; using `{}`",
                    config.initial_state,
                    states[0].name
                );
                0
            }
        };

        let mut machine = Self {
            states,
            default_transition: config.default_transition.max(0.0),
            library,
            mixer: ClipMixer::new(),
            current: initial,
            target: initial,
            transitioning: false,
            transition_elapsed: 0.0,
            transition_duration: 0.0,
            locked: false,
        };

        if let Err(err) = machine.start_clip(initial, 0.0, true) {
            log::warn!("{}", err);
        }
        machine
    }

    pub fn current_state(&self) -> &str {
        &self.states[self.current].name
    }

    pub fn target_state(&self) -> &str {
        &self.states[self.target].name
    }

    pub fn is_transitioning(&self) -> bool {
        self.transitioning
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn default_transition(&self) -> f32 {
        self.default_transition
    }

    pub fn has_state(&self, name: &str) -> bool {
        self.states.iter().any(|s| s.name == name)
    }

    pub fn state_names(&self) -> impl Iterator<Item = &str> {
        self.states.iter().map(|s| s.name.as_str())
    }

    pub fn library(&self) -> &ClipLibrary {
        &self.library
    }

    pub fn mixer(&self) -> &ClipMixer {
        &self.mixer
    }

    fn state_index(&self, name: &str) -> Result<usize, EngineError> {
        self.states
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| EngineError::UnknownState(name.to_string()))
    }

    fn start_clip(&mut self, state: usize, fade: f32, restart: bool) -> Result<(), EngineError> {
        let def = &self.states[state];
        let clip = self
            .library
            .find(&def.clip)
            .ok_or_else(|| EngineError::MissingClip {
                state: def.name.clone(),
                clip: def.clip.clone(),
            })?;
        self.mixer.play(clip, def.weight, fade, def.looping, restart);
        Ok(())
    }

    fn begin_transition(&mut self, state: usize, fade: f32) {
        self.target = state;
        self.transition_elapsed = 0.0;
        self.transition_duration = fade;
        self.transitioning = state != self.current;
    }

    /// Crossfade to `name` over `transition` seconds (default when `None`).
    ///
    /// No-op when `name` is already current with nothing in flight, or is
    /// already the target of the transition in flight.
    pub fn set_state(
        &mut self,
        name: &str,
        transition: Option<f32>,
    ) -> Result<StateChange, EngineError> {
        if self.locked {
            return Err(EngineError::StateLocked(self.current_state().to_string()));
        }
        let state = self.state_index(name)?;

        let settled_here = state == self.current && !self.transitioning;
        let already_heading = state == self.target && self.transitioning;
        if settled_here || already_heading {
            return Ok(StateChange::Unchanged);
        }

        let fade = transition.unwrap_or(self.default_transition).max(0.0);
        self.start_clip(state, fade, false)?;
        self.begin_transition(state, fade);
        log::info!("Animation state -> {} ({:.2}s)", name, fade);
        Ok(StateChange::Started)
    }

    /// Like `set_state`, but restarts the clip even when already current
    pub fn replay_state(
        &mut self,
        name: &str,
        transition: Option<f32>,
    ) -> Result<StateChange, EngineError> {
        if self.locked {
            return Err(EngineError::StateLocked(self.current_state().to_string()));
        }
        let state = self.state_index(name)?;
        let fade = transition.unwrap_or(self.default_transition).max(0.0);
        self.start_clip(state, fade, true)?;
        self.begin_transition(state, fade);
        log::info!("Animation state replay -> {}", name);
        Ok(StateChange::Replayed)
    }

    /// Pin `name` as both current and target until `unlock_state`
    pub fn hold_state(&mut self, name: &str) -> Result<StateChange, EngineError> {
        let state = self.state_index(name)?;
        if let Err(err) = self.start_clip(state, self.default_transition, false) {
            log::warn!("{}", err);
        }
        self.current = state;
        self.target = state;
        self.transitioning = false;
        self.locked = true;
        log::info!("Animation state held at {}", name);
        Ok(StateChange::Held)
    }

    pub fn unlock_state(&mut self) {
        if self.locked {
            log::info!("Animation state unlocked at {}", self.current_state());
        }
        self.locked = false;
    }

    /// Advance clip playback and complete a finished transition
    pub fn update(&mut self, delta: f32) {
        let delta = if delta.is_finite() { delta.max(0.0) } else { 0.0 };
        self.mixer.update(delta, &self.library);

        if self.transitioning {
            self.transition_elapsed += delta;
            if self.transition_elapsed + TIME_EPSILON >= self.transition_duration {
                self.current = self.target;
            }
        }
        if self.target == self.current {
            self.transitioning = false;
        }
    }

    /// Write the baked pose into the rig
    pub fn apply(&self, rig: &mut Rig, cache: &SkeletonCache) {
        self.mixer.apply(rig, &self.library, cache);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rig::{Bone, BoneNamePolicy, BoneTrack, RotationKeyframe};
    use glam::Vec3;
    use std::f32::consts::FRAC_PI_2;
    use std::f32::consts::FRAC_PI_4;
    use wasm_bindgen_test::*;

    const EPSILON: f32 = 1e-4;

    fn held_pose(name: &str, bone: &str, angle_x: f32) -> Clip {
        Clip::new(
            name,
            1.0,
            vec![BoneTrack::new(
                bone,
                vec![RotationKeyframe {
                    time: 0.0,
                    rotation: Quat::from_rotation_x(angle_x),
                }],
            )],
        )
    }

    fn rig() -> Rig {
        Rig::new(
            vec![
                Bone::new("Hips", Vec3::ZERO),
                Bone::new("Head", Vec3::ZERO).with_parent(0),
                Bone::new("Tail", Vec3::new(0.0, 0.4, 0.0)).with_parent(0),
            ],
            Vec::new(),
            vec![
                held_pose("Armature|Idle_Loop", "Head", 0.0),
                held_pose("Run", "Head", FRAC_PI_2),
                held_pose("Relax", "Head", -FRAC_PI_2),
            ],
        )
    }

    fn machine(rig: &Rig, config: AnimationConfig) -> (SkeletonCache, AnimationStateMachine) {
        let cache = SkeletonCache::initialize(rig, &BoneNamePolicy::default());
        let library = ClipLibrary::new(rig.clips.clone(), rig);
        (cache, AnimationStateMachine::new(config, library))
    }

    fn head_x(rig: &Rig) -> f32 {
        rig.bone("Head").unwrap().rotation.x
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_library_lookup_with_fallback() {
        let rig = rig();
        let library = ClipLibrary::new(rig.clips.clone(), &rig);
        assert_eq!(library.find("Run"), Some(1));
        assert_eq!(library.find("idle"), Some(0));
        assert_eq!(library.find("RELAX"), Some(2));
        assert_eq!(library.find("runFast"), Some(1));
        assert_eq!(library.find("Jump"), None);
        assert_eq!(library.find(""), None);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_initial_state_plays_immediately() {
        let mut rig = rig();
        let (cache, machine) = machine(&rig, AnimationConfig::default());
        assert_eq!(machine.current_state(), "idle");
        assert!(!machine.is_transitioning());
        assert_eq!(machine.mixer().action(0).unwrap().weight(), 1.0);

        rig.bones[1].rotation = Vec3::splat(0.7);
        machine.apply(&mut rig, &cache);
        assert!(head_x(&rig).abs() < EPSILON);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_set_state_twice_does_not_restart() {
        let rig = rig();
        let (_, mut machine) = machine(&rig, AnimationConfig::default());

        assert_eq!(machine.set_state("idle", None).unwrap(), StateChange::Unchanged);
        assert!(!machine.is_transitioning());

        assert_eq!(machine.set_state("run", None).unwrap(), StateChange::Started);
        machine.update(0.1);
        let weight = machine.mixer().action(1).unwrap().weight();

        assert_eq!(machine.set_state("run", None).unwrap(), StateChange::Unchanged);
        assert_eq!(machine.target_state(), "run");
        assert_eq!(machine.mixer().action(1).unwrap().weight(), weight);
        assert!((weight - 0.1 / 0.3).abs() < EPSILON);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_crossfade_blends_and_completes() {
        let mut rig = rig();
        let (cache, mut machine) = machine(&rig, AnimationConfig::default());

        machine.set_state("run", Some(0.3)).unwrap();
        assert!(machine.is_transitioning());
        assert_eq!(machine.current_state(), "idle");

        machine.update(0.15);
        cache.reset_to_baseline(&mut rig);
        machine.apply(&mut rig, &cache);
        assert!((head_x(&rig) - FRAC_PI_4).abs() < EPSILON);

        machine.update(0.15);
        assert_eq!(machine.current_state(), "run");
        assert!(!machine.is_transitioning());

        cache.reset_to_baseline(&mut rig);
        machine.apply(&mut rig, &cache);
        assert!((head_x(&rig) - FRAC_PI_2).abs() < EPSILON);
        // Untracked bones keep their baseline
        assert_eq!(rig.bone("Tail").unwrap().rotation, Vec3::new(0.0, 0.4, 0.0));
        assert!(!machine.mixer().action(0).unwrap().is_playing());
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_partial_weight_blends_towards_baseline() {
        let mut rig = rig();
        let mut config = AnimationConfig::default();
        config.states[0] = AnimationStateDef {
            weight: 0.5,
            ..AnimationStateDef::new("idle", "Run")
        };
        let (cache, machine) = machine(&rig, config);

        machine.apply(&mut rig, &cache);
        assert!((head_x(&rig) - FRAC_PI_4).abs() < EPSILON);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_hold_locks_until_unlocked() {
        let rig = rig();
        let (_, mut machine) = machine(&rig, AnimationConfig::default());

        assert_eq!(machine.hold_state("relax").unwrap(), StateChange::Held);
        assert_eq!(machine.current_state(), "relax");
        assert_eq!(machine.target_state(), "relax");
        assert!(machine.is_locked());

        assert!(matches!(
            machine.set_state("run", None),
            Err(EngineError::StateLocked(_))
        ));
        assert!(machine.replay_state("relax", None).is_err());

        // Last writer wins
        machine.hold_state("idle").unwrap();
        assert_eq!(machine.current_state(), "idle");

        machine.unlock_state();
        assert_eq!(machine.set_state("run", None).unwrap(), StateChange::Started);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_missing_clip_keeps_previous_clip() {
        let mut rig = rig();
        let (cache, mut machine) = machine(&rig, AnimationConfig::default());

        assert!(matches!(
            machine.set_state("sitTalk", None),
            Err(EngineError::MissingClip { .. })
        ));
        assert!(matches!(
            machine.set_state("moonwalk", None),
            Err(EngineError::UnknownState(_))
        ));
        assert_eq!(machine.current_state(), "idle");
        assert_eq!(machine.target_state(), "idle");

        machine.update(1.0);
        machine.apply(&mut rig, &cache);
        assert_eq!(machine.mixer().action(0).unwrap().weight(), 1.0);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_replay_restarts_clip_time() {
        let rig = rig();
        let (_, mut machine) = machine(&rig, AnimationConfig::default());
        machine.update(0.7);
        assert!((machine.mixer().action(0).unwrap().time() - 0.7).abs() < EPSILON);

        assert_eq!(machine.replay_state("idle", Some(0.0)).unwrap(), StateChange::Replayed);
        assert_eq!(machine.mixer().action(0).unwrap().time(), 0.0);
        assert!(!machine.is_transitioning());
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_looping_time_stays_inside_clip() {
        let rig = rig();
        let (_, mut looping) = machine(&rig, AnimationConfig::default());
        looping.update(10_000.25);
        let time = looping.mixer().action(0).unwrap().time();
        assert!((time - 0.25).abs() < EPSILON, "got {}", time);

        looping.update(0.5);
        assert!((looping.mixer().action(0).unwrap().time() - 0.75).abs() < EPSILON);

        let mut config = AnimationConfig::default();
        config.states[0].looping = false;
        let (_, mut once) = machine(&rig, config);
        once.update(3.0);
        assert_eq!(once.mixer().action(0).unwrap().time(), 1.0);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_zero_length_transition_completes_next_update() {
        let rig = rig();
        let (_, mut machine) = machine(&rig, AnimationConfig::default());
        machine.set_state("relax", Some(0.0)).unwrap();
        assert_eq!(machine.mixer().action(2).unwrap().weight(), 1.0);
        machine.update(0.0);
        assert_eq!(machine.current_state(), "relax");
    }
}
