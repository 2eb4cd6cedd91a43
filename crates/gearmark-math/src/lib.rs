// SPDX-License-Identifier: CEPL-1.0
//! Matrix helpers and the procedural gear generator.

pub mod gear;
pub mod matrix;

pub use gear::{create_gear, GearMesh, GearParams, GearSet, GearVertex, MeshRange};
pub use glam::{Mat4, Vec2, Vec3};
pub use matrix::{frustum_vk, gear_model_view, projection_for, srgb_to_linear, view_matrix};
