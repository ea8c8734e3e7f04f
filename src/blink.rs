//! Autonomous eyelid blinking
//!
//! `open -> closing -> closed -> opening -> open`, driven purely by
//! accumulated frame time. A single large delta walks through as many phases
//! as it covers, so the cycle can never stall half-closed.

use crate::morph::MorphBinding;
use crate::rig::Rig;
use crate::{ease_in_out, TIME_EPSILON};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Shortest interval ever drawn, keeps the update loop finite
const MIN_DRAWN_INTERVAL: f32 = 0.05;

/// Whole blinks walked in one update before the rest of the delta is folded
const MAX_BLINKS_PER_UPDATE: u32 = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BlinkConfig {
    /// Seconds, lower bound of the randomized gap between blinks
    pub min_interval: f32,
    /// Seconds, upper bound of the randomized gap between blinks
    pub max_interval: f32,
    /// Seconds to close the lids
    pub close_duration: f32,
    /// Seconds to reopen the lids
    pub open_duration: f32,
    pub enabled: bool,
}

impl Default for BlinkConfig {
    fn default() -> Self {
        Self {
            min_interval: 2.5,
            max_interval: 5.0,
            close_duration: 0.15,
            open_duration: 0.10,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlinkState {
    Open,
    Closing,
    Closed,
    Opening,
}

pub struct BlinkController {
    config: BlinkConfig,
    state: BlinkState,
    time_since_last_blink: f32,
    next_blink_interval: f32,
    /// Time spent in the current closing/opening phase
    phase_time: f32,
    /// Set by `force_close`; suspends timing
    held: bool,
    targets: Vec<MorphBinding>,
    rng: StdRng,
}

impl BlinkController {
    /// Create a controller seeded from the platform RNG
    pub fn new(config: BlinkConfig, targets: Vec<MorphBinding>) -> Self {
        let seed = getrandom::u64().unwrap_or_else(|e| {
            log::debug!("getrandom unavailable ({}), using fixed blink seed", e);
            0x9e37_79b9_7f4a_7c15
        });
        Self::with_seed(config, targets, seed)
    }

    /// Create a controller with a deterministic interval sequence
    pub fn with_seed(config: BlinkConfig, targets: Vec<MorphBinding>, seed: u64) -> Self {
        if targets.is_empty() {
            log::warn!("No eyelid morph targets found; blinking disabled");
        }

        let mut controller = Self {
            config,
            state: BlinkState::Open,
            time_since_last_blink: 0.0,
            next_blink_interval: 0.0,
            phase_time: 0.0,
            held: false,
            targets,
            rng: StdRng::seed_from_u64(seed),
        };
        controller.next_blink_interval = controller.draw_interval();
        controller
    }

    fn draw_interval(&mut self) -> f32 {
        let min = self.config.min_interval.max(MIN_DRAWN_INTERVAL);
        let max = self.config.max_interval.max(min);
        if max > min {
            self.rng.random_range(min..=max)
        } else {
            min
        }
    }

    pub fn state(&self) -> BlinkState {
        self.state
    }

    pub fn time_since_last_blink(&self) -> f32 {
        self.time_since_last_blink
    }

    pub fn next_blink_interval(&self) -> f32 {
        self.next_blink_interval
    }

    pub fn targets(&self) -> &[MorphBinding] {
        &self.targets
    }

    /// Lid closure in [0, 1] for the current phase
    pub fn blink_amount(&self) -> f32 {
        match self.state {
            BlinkState::Open => 0.0,
            BlinkState::Closed => 1.0,
            BlinkState::Closing => phase_progress(self.phase_time, self.config.close_duration),
            BlinkState::Opening => {
                1.0 - phase_progress(self.phase_time, self.config.open_duration)
            }
        }
    }

    /// Advance the state machine by `delta` seconds
    pub fn update(&mut self, delta: f32) {
        if self.held || !self.config.enabled || !delta.is_finite() {
            return;
        }

        let mut remaining = delta.max(0.0);
        let mut blinks = 0;
        loop {
            match self.state {
                BlinkState::Open => {
                    let wait = (self.next_blink_interval - self.time_since_last_blink).max(0.0);
                    if remaining + TIME_EPSILON < wait {
                        self.time_since_last_blink += remaining;
                        return;
                    }
                    remaining = (remaining - wait).max(0.0);
                    self.time_since_last_blink = self.next_blink_interval;
                    self.state = BlinkState::Closing;
                    self.phase_time = 0.0;
                }
                BlinkState::Closing => {
                    let left = (self.config.close_duration - self.phase_time).max(0.0);
                    if remaining + TIME_EPSILON < left {
                        self.phase_time += remaining;
                        return;
                    }
                    remaining = (remaining - left).max(0.0);
                    self.state = BlinkState::Closed;
                    self.phase_time = 0.0;
                }
                BlinkState::Closed => {
                    // Full closure is held for zero time
                    self.state = BlinkState::Opening;
                    self.phase_time = 0.0;
                }
                BlinkState::Opening => {
                    let left = (self.config.open_duration - self.phase_time).max(0.0);
                    if remaining + TIME_EPSILON < left {
                        self.phase_time += remaining;
                        return;
                    }
                    remaining = (remaining - left).max(0.0);
                    self.reopen();

                    // f32 subtraction cannot shrink a huge delta; keep only
                    // the part that falls inside the next cycle
                    blinks += 1;
                    if blinks >= MAX_BLINKS_PER_UPDATE {
                        remaining %= self.cycle_length();
                    }
                }
            }
        }
    }

    /// Seconds from now until the next blink has fully reopened
    fn cycle_length(&self) -> f32 {
        self.next_blink_interval
            + self.config.close_duration.max(0.0)
            + self.config.open_duration.max(0.0)
    }

    fn reopen(&mut self) {
        self.state = BlinkState::Open;
        self.phase_time = 0.0;
        self.time_since_last_blink = 0.0;
        self.next_blink_interval = self.draw_interval();
    }

    /// Close every eyelid target from whatever it currently holds.
    ///
    /// Open lids leave the value untouched; full closure always reaches 1.
    pub fn apply(&self, rig: &mut Rig) {
        let amount = self.blink_amount();
        if amount <= 0.0 {
            return;
        }
        for target in &self.targets {
            let start = target.read(rig).clamp(0.0, 1.0);
            target.write(rig, start + amount * (1.0 - start));
        }
    }

    /// Open the lids now and resume timing from zero
    pub fn force_open(&mut self) {
        self.held = false;
        self.reopen();
    }

    /// Close the lids and hold them closed until `force_open` or `release`
    pub fn force_close(&mut self) {
        self.held = true;
        self.state = BlinkState::Closed;
        self.phase_time = 0.0;
    }

    /// Resume timing after `force_close`; the lids reopen normally
    pub fn release(&mut self) {
        self.held = false;
    }

    pub fn is_held(&self) -> bool {
        self.held
    }
}

fn phase_progress(elapsed: f32, duration: f32) -> f32 {
    if duration <= 0.0 {
        return 1.0;
    }
    ease_in_out((elapsed / duration).clamp(0.0, 1.0))
}
