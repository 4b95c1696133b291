//! Scripted input for loopback clients

use glam::Quat;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::game::{InputFrame, Tick};
use crate::net::InputSampler;

/// Shortest and longest run of ticks a bot holds one movement choice
const HOLD_TICKS: std::ops::RangeInclusive<u32> = 10..=60;

/// Chance per tick of pulling the trigger
const FIRE_CHANCE: f64 = 0.1;

/// Chance per movement change of jumping
const JUMP_CHANCE: f64 = 0.15;

/// Seeded wander-and-shoot input. The same seed yields the same input for
/// the same sequence of ticks.
pub struct ScriptedInput {
    rng: ChaCha8Rng,
    current: InputFrame,
    hold: u32,
}

impl ScriptedInput {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            current: InputFrame::neutral(),
            hold: 0,
        }
    }

    fn pick_movement(&mut self) {
        let yaw = self.rng.gen_range(0.0..std::f32::consts::TAU);
        self.current = InputFrame {
            forward: self.rng.gen_bool(0.7),
            back: self.rng.gen_bool(0.1),
            left: self.rng.gen_bool(0.2),
            right: self.rng.gen_bool(0.2),
            jump: self.rng.gen_bool(JUMP_CHANCE),
            fire: false,
            view: Quat::from_rotation_y(yaw),
        };
        self.hold = self.rng.gen_range(HOLD_TICKS);
    }
}

impl InputSampler for ScriptedInput {
    fn sample(&mut self, _tick: Tick) -> Option<InputFrame> {
        if self.hold == 0 {
            self.pick_movement();
        } else {
            // Jumps are one-tick presses
            self.current.jump = false;
        }
        self.hold -= 1;

        let mut input = self.current;
        input.fire = self.rng.gen_bool(FIRE_CHANCE);
        Some(input)
    }
}
