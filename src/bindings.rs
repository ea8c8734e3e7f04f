//! JavaScript entry points
//!
//! Thin wrappers over the handle registry. Times arrive in milliseconds from
//! `requestAnimationFrame` and are converted to seconds here. Commands on an
//! unknown handle log a warning and report false.

use wasm_bindgen::prelude::*;

use crate::config::EngineConfig;
use crate::engine::CharacterEngine;
use crate::lipsync::AudioBands;
use crate::rig::Rig;
use crate::state::{register, unregister, with_engine, with_engine_mut};

fn missing(handle: u32) {
    log::warn!("No character with handle {}", handle);
}

fn on_character<R>(handle: u32, fallback: R, f: impl FnOnce(&mut CharacterEngine) -> R) -> R {
    with_engine_mut(handle, f).unwrap_or_else(|| {
        missing(handle);
        fallback
    })
}

/// Load a rig (and optional config overrides) and return its handle
#[wasm_bindgen]
pub fn create_character(rig_json: &str, config_json: Option<String>) -> Result<u32, JsValue> {
    let rig = Rig::from_json(rig_json).map_err(|e| JsValue::from_str(&e.to_string()))?;
    let config = match config_json.as_deref() {
        Some(json) => EngineConfig::from_json(json).map_err(|e| JsValue::from_str(&e.to_string()))?,
        None => EngineConfig::default(),
    };

    log::info!(
        "Creating character: {} bones, {} meshes, {} clips",
        rig.bones.len(),
        rig.meshes.len(),
        rig.clips.len()
    );
    Ok(register(CharacterEngine::new(rig, config)))
}

#[wasm_bindgen]
pub fn destroy_character(handle: u32) -> bool {
    let removed = unregister(handle);
    if removed {
        log::info!("Destroyed character {}", handle);
    } else {
        missing(handle);
    }
    removed
}

/// Advance one frame with no narration playing
#[wasm_bindgen]
pub fn update_character(handle: u32, delta_ms: f32) {
    on_character(handle, (), |engine| engine.update(delta_ms / 1000.0, None));
}

/// Advance one frame with the narration's analyzed audio bands
#[wasm_bindgen]
pub fn update_character_with_audio(
    handle: u32,
    delta_ms: f32,
    intensity: f32,
    mid: f32,
    high: f32,
) {
    let bands = AudioBands::new(intensity, mid, high);
    on_character(handle, (), |engine| engine.update(delta_ms / 1000.0, Some(bands)));
}

/// Crossfade to a state; a negative transition uses the default
#[wasm_bindgen]
pub fn set_animation_state(handle: u32, state: &str, transition: f32) -> bool {
    let transition = (transition >= 0.0).then_some(transition);
    on_character(handle, false, |engine| engine.set_state(state, transition))
}

#[wasm_bindgen]
pub fn replay_animation_state(handle: u32, state: &str, transition: f32) -> bool {
    let transition = (transition >= 0.0).then_some(transition);
    on_character(handle, false, |engine| engine.replay_state(state, transition))
}

#[wasm_bindgen]
pub fn hold_animation_state(handle: u32, state: &str) -> bool {
    on_character(handle, false, |engine| engine.hold_state(state))
}

#[wasm_bindgen]
pub fn unlock_animation_state(handle: u32) -> bool {
    on_character(handle, false, |engine| {
        engine.unlock_state();
        true
    })
}

#[wasm_bindgen]
pub fn set_expression(handle: u32, expression: &str, immediate: bool) -> bool {
    on_character(handle, false, |engine| engine.set_expression(expression, immediate))
}

#[wasm_bindgen]
pub fn trigger_gesture(handle: u32, gesture: &str) -> bool {
    on_character(handle, false, |engine| engine.trigger_gesture(gesture))
}

/// Hold the eyelids shut (`true`) or reopen them and resume blinking
#[wasm_bindgen]
pub fn force_blink(handle: u32, closed: bool) -> bool {
    on_character(handle, false, |engine| {
        engine.force_blink(closed);
        true
    })
}

/// Let a forced blink hand the eyelids back to the blink timer
#[wasm_bindgen]
pub fn release_blink(handle: u32) -> bool {
    on_character(handle, false, |engine| {
        engine.release_blink();
        true
    })
}

/// Perform a generated timeline; false when the fallback was used instead
#[wasm_bindgen]
pub fn load_script(handle: u32, text: &str, transcript: &str, expected_duration: f32) -> bool {
    on_character(handle, false, |engine| {
        engine.load_script(text, transcript, expected_duration)
    })
}

#[wasm_bindgen]
pub fn stop_script(handle: u32) -> bool {
    on_character(handle, false, |engine| {
        engine.stop_script();
        true
    })
}

/// Flat `[x, y, z]` Euler radians per bone, in rig order
#[wasm_bindgen]
pub fn bone_rotations(handle: u32) -> Vec<f32> {
    with_engine(handle, CharacterEngine::bone_rotations).unwrap_or_else(|| {
        missing(handle);
        Vec::new()
    })
}

#[wasm_bindgen]
pub fn morph_influences(handle: u32, mesh_index: usize) -> Vec<f32> {
    with_engine(handle, |engine| {
        engine
            .morph_influences(mesh_index)
            .map(<[f32]>::to_vec)
            .unwrap_or_default()
    })
    .unwrap_or_else(|| {
        missing(handle);
        Vec::new()
    })
}

#[wasm_bindgen]
pub fn engine_snapshot(handle: u32) -> Result<JsValue, JsValue> {
    let snapshot = with_engine(handle, CharacterEngine::snapshot)
        .ok_or_else(|| JsValue::from_str(&format!("no character with handle {handle}")))?;
    serde_wasm_bindgen::to_value(&snapshot).map_err(JsValue::from)
}
