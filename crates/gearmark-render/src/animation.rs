// SPDX-License-Identifier: CEPL-1.0
use std::time::Duration;

use gearmark_math::{gear_model_view, srgb_to_linear, Mat4, Vec2, Vec3};

pub const ROTATION_SPEED_DEG_PER_SEC: f32 = 70.0;

/// Degrees added to the view rotation per arrow key press.
pub const VIEW_STEP_DEG: f32 = 5.0;

const INITIAL_VIEW_ROT: Vec3 = Vec3::new(20.0, 30.0, 0.0);

const GEAR_POSITIONS: [Vec2; 3] = [
    Vec2::new(-3.0, -2.0),
    Vec2::new(3.1, -2.0),
    Vec2::new(-3.1, 4.2),
];

const GEAR_COLORS_SRGB: [[f32; 3]; 3] = [[0.8, 0.1, 0.0], [0.0, 0.8, 0.2], [0.2, 0.2, 1.0]];

/// Placement of one gear for a single frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GearPose {
    pub position: Vec2,
    pub angle: f32,
    /// Linear colour, ready for an sRGB framebuffer.
    pub color: [f32; 3],
}

impl GearPose {
    pub fn model_view(&self, view: Mat4) -> Mat4 {
        gear_model_view(view, self.position, self.angle)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Animation {
    angle: f32,
    enabled: bool,
    view_rot: Vec3,
}

impl Default for Animation {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Animation {
    pub fn new(enabled: bool) -> Self {
        Self {
            angle: 0.0,
            enabled,
            view_rot: INITIAL_VIEW_ROT,
        }
    }

    pub fn angle(&self) -> f32 {
        self.angle
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn view_rot(&self) -> Vec3 {
        self.view_rot
    }

    /// Advances the drive gear by `dt`. The angle stays in [0, 360).
    pub fn advance(&mut self, dt: Duration) {
        if !self.enabled {
            return;
        }
        let a = self.angle + ROTATION_SPEED_DEG_PER_SEC * dt.as_secs_f32();
        self.angle = a.rem_euclid(360.0);
        if self.angle >= 360.0 {
            self.angle = 0.0;
        }
    }

    pub fn toggle(&mut self) {
        self.enabled = !self.enabled;
    }

    /// Arrow keys: `dx` tilts around X, `dy` spins around Y.
    pub fn rotate_view(&mut self, dx: f32, dy: f32) {
        self.view_rot.x += dx;
        self.view_rot.y += dy;
    }

    pub fn poses(&self) -> [GearPose; 3] {
        let a = self.angle;
        let angles = [a, -2.0 * a - 9.0, -2.0 * a - 25.0];
        std::array::from_fn(|i| GearPose {
            position: GEAR_POSITIONS[i],
            angle: angles[i],
            color: GEAR_COLORS_SRGB[i].map(srgb_to_linear),
        })
    }
}
