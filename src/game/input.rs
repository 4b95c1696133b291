//! Per-tick control input

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// One tick's worth of control input for a single entity.
///
/// Movement intent is four directional flags; the signed axes the movement
/// model consumes are derived from them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InputFrame {
    pub forward: bool,
    pub back: bool,
    pub left: bool,
    pub right: bool,
    pub jump: bool,
    pub fire: bool,
    /// View orientation at capture time
    pub view: Quat,
}

impl InputFrame {
    pub const FORWARD: u8 = 1;
    pub const BACK: u8 = 2;
    pub const RIGHT: u8 = 4;
    pub const LEFT: u8 = 8;
    pub const JUMP: u8 = 16;
    pub const FIRE: u8 = 32;

    /// Mask of every key bit; the two high bits are free for the codec
    pub const KEY_MASK: u8 = 0b0011_1111;

    /// The empty input: nothing pressed, identity view
    pub fn neutral() -> Self {
        Self {
            forward: false,
            back: false,
            left: false,
            right: false,
            jump: false,
            fire: false,
            view: Quat::IDENTITY,
        }
    }

    /// Input holding forward while looking along `view`
    pub fn forward(view: Quat) -> Self {
        Self {
            forward: true,
            view,
            ..Self::neutral()
        }
    }

    /// +1 forward, -1 back, forward wins if both are held
    pub fn forward_axis(&self) -> f32 {
        if self.forward {
            1.0
        } else if self.back {
            -1.0
        } else {
            0.0
        }
    }

    /// +1 right, -1 left, right wins if both are held
    pub fn right_axis(&self) -> f32 {
        if self.right {
            1.0
        } else if self.left {
            -1.0
        } else {
            0.0
        }
    }

    pub fn has_movement(&self) -> bool {
        self.forward_axis() != 0.0 || self.right_axis() != 0.0
    }

    /// Unit direction the entity is looking in
    pub fn aim_direction(&self) -> Vec3 {
        (self.view * Vec3::X).normalize_or_zero()
    }

    pub fn key_bits(&self) -> u8 {
        let mut bits = 0;
        if self.forward {
            bits |= Self::FORWARD;
        }
        if self.back {
            bits |= Self::BACK;
        }
        if self.right {
            bits |= Self::RIGHT;
        }
        if self.left {
            bits |= Self::LEFT;
        }
        if self.jump {
            bits |= Self::JUMP;
        }
        if self.fire {
            bits |= Self::FIRE;
        }
        bits
    }

    /// Rebuild the flags from a key bitfield, ignoring the high bits
    pub fn with_key_bits(bits: u8, view: Quat) -> Self {
        Self {
            forward: bits & Self::FORWARD != 0,
            back: bits & Self::BACK != 0,
            right: bits & Self::RIGHT != 0,
            left: bits & Self::LEFT != 0,
            jump: bits & Self::JUMP != 0,
            fire: bits & Self::FIRE != 0,
            view,
        }
    }
}

impl Default for InputFrame {
    fn default() -> Self {
        Self::neutral()
    }
}
