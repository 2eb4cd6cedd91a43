// SPDX-License-Identifier: CEPL-1.0
use glam::{Mat4, Vec2, Vec3, Vec4};

pub const NEAR_PLANE: f32 = 5.0;
pub const FAR_PLANE: f32 = 60.0;
pub const VIEW_DISTANCE: f32 = 40.0;

/// Off-centre frustum for Vulkan clip space: Y points down, depth maps to 0..1.
pub fn frustum_vk(l: f32, r: f32, b: f32, t: f32, n: f32, f: f32) -> Mat4 {
    let dx = r - l;
    let dy = t - b;
    let dz = f - n;
    Mat4::from_cols(
        Vec4::new(2.0 * n / dx, 0.0, 0.0, 0.0),
        Vec4::new(0.0, -2.0 * n / dy, 0.0, 0.0),
        Vec4::new((r + l) / dx, (t + b) / dy, f / (n - f), -1.0),
        Vec4::new(0.0, 0.0, -(f * n) / dz, 0.0),
    )
}

/// Projection for a drawable of `width`x`height`: unit half-width, height
/// scaled by the aspect ratio.
pub fn projection_for(width: u32, height: u32) -> Mat4 {
    let h = height.max(1) as f32 / width.max(1) as f32;
    frustum_vk(-1.0, 1.0, -h, h, NEAR_PLANE, FAR_PLANE)
}

/// Camera transform: pull back along -Z, then rotate by `rot_deg` about X, Y, Z
/// in that order.
pub fn view_matrix(rot_deg: Vec3) -> Mat4 {
    Mat4::from_translation(Vec3::new(0.0, 0.0, -VIEW_DISTANCE))
        * Mat4::from_rotation_x(rot_deg.x.to_radians())
        * Mat4::from_rotation_y(rot_deg.y.to_radians())
        * Mat4::from_rotation_z(rot_deg.z.to_radians())
}

pub fn gear_model_view(view: Mat4, position: Vec2, angle_deg: f32) -> Mat4 {
    view * Mat4::from_translation(position.extend(0.0)) * Mat4::from_rotation_z(angle_deg.to_radians())
}

/// sRGB electro-optical transfer function.
pub fn srgb_to_linear(c: f32) -> f32 {
    if c < 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn frustum_maps_near_and_far_to_unit_depth() {
        let p = projection_for(640, 480);
        let near = p * Vec4::new(0.0, 0.0, -NEAR_PLANE, 1.0);
        let far = p * Vec4::new(0.0, 0.0, -FAR_PLANE, 1.0);
        assert!(approx(near.z / near.w, 0.0));
        assert!(approx(far.z / far.w, 1.0));
    }

    #[test]
    fn frustum_flips_y_for_vulkan() {
        let p = projection_for(100, 100);
        let up = p * Vec4::new(0.0, 1.0, -NEAR_PLANE, 1.0);
        assert!(up.y / up.w < 0.0);
    }

    #[test]
    fn projection_depends_only_on_aspect() {
        assert_eq!(projection_for(640, 480), projection_for(1280, 960));
        assert_ne!(projection_for(640, 480), projection_for(800, 800));
    }

    #[test]
    fn zero_sized_drawable_does_not_divide_by_zero() {
        let p = projection_for(0, 0);
        assert!(p.is_finite());
    }

    #[test]
    fn view_without_rotation_is_a_pull_back() {
        let v = view_matrix(Vec3::ZERO);
        let origin = v * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert!(approx(origin.z, -VIEW_DISTANCE));
    }

    #[test]
    fn model_view_places_gear_at_its_position() {
        let mv = gear_model_view(Mat4::IDENTITY, Vec2::new(3.1, -2.0), 90.0);
        let centre = mv * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert!(approx(centre.x, 3.1) && approx(centre.y, -2.0));
        let rim = mv * Vec4::new(1.0, 0.0, 0.0, 1.0);
        assert!(approx(rim.x, 3.1) && approx(rim.y, -1.0));
    }

    #[test]
    fn srgb_curve_endpoints() {
        assert_eq!(srgb_to_linear(0.0), 0.0);
        assert!(approx(srgb_to_linear(1.0), 1.0));
        assert!(approx(srgb_to_linear(0.04), 0.04 / 12.92));
        assert!(srgb_to_linear(0.5) < 0.5);
    }
}
