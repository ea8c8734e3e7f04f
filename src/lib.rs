//! Roast Rig - Character Animation Core
//!
//! Drives a narrating character rig: skeleton role cache, autonomous
//! blinking, audio-driven jaw, expression blending, procedural body motion
//! and baked-clip state machine. Everything mutates a [`Rig`] in place; the
//! host renderer reads bone rotations and morph influences back each frame.

pub mod animation;
#[cfg(target_arch = "wasm32")]
mod bindings;
pub mod blink;
pub mod config;
pub mod engine;
pub mod error;
pub mod expression;
pub mod lipsync;
pub mod morph;
pub mod procedural;
pub mod rig;
pub mod script;
pub mod state;

pub use animation::{AnimationConfig, AnimationStateMachine, ClipLibrary, ClipMixer, StateChange};
pub use blink::{BlinkConfig, BlinkController, BlinkState};
pub use config::EngineConfig;
pub use engine::{CharacterEngine, EngineSnapshot};
pub use error::EngineError;
pub use expression::{ExpressionBlender, ExpressionConfig, ExpressionPreset};
pub use glam::Vec3;
pub use lipsync::{AudioBands, JawController, LipSyncConfig};
pub use procedural::{ProceduralConfig, ProceduralMotion};
pub use rig::{BoneRole, Clip, Rig, SkeletonCache};
pub use script::{AnimationScript, ScriptPlayer};

#[cfg(target_arch = "wasm32")]
pub use bindings::*;

/// Slack when comparing accumulated frame time against a phase duration
pub const TIME_EPSILON: f32 = 1e-5;

/// Quadratic ease-in-out on [0, 1]
#[inline]
pub fn ease_in_out(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    if t < 0.5 {
        2.0 * t * t
    } else {
        let u = -2.0 * t + 2.0;
        1.0 - u * u / 2.0
    }
}

/// Route `log` output to the browser console
#[cfg(target_arch = "wasm32")]
#[wasm_bindgen::prelude::wasm_bindgen]
pub fn init_logging() {
    console_error_panic_hook::set_once();

    cfg_if::cfg_if! {
        if #[cfg(debug_assertions)] {
            let level = log::Level::Debug;
        } else {
            let level = log::Level::Info;
        }
    }
    console_log::init_with_level(level).ok();
}
