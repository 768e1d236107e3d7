//! Cameras used for the main view and for shadow passes

use glam::{Mat4, Vec3};

/// View and projection of a camera
///
/// Shadow maps own one of these; the scene keeps one for the main view so
/// draws can be sorted by distance to the eye.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Camera {
    pub view: Mat4,
    pub projection: Mat4,
    /// Eye position in world space
    pub position: Vec3,
    _pad: f32,
}

impl Camera {
    pub fn new(view: Mat4, projection: Mat4, position: Vec3) -> Self {
        Self {
            view,
            projection,
            position,
            _pad: 0.0,
        }
    }

    /// Perspective camera at `position` looking at `target`
    pub fn perspective(position: Vec3, target: Vec3, fov_y: f32, aspect: f32, near: f32, far: f32) -> Self {
        let up = Self::stable_up(target - position);
        Self::new(
            Mat4::look_at_rh(position, target, up),
            Mat4::perspective_rh(fov_y, aspect, near, far),
            position,
        )
    }

    /// Orthographic camera with a square `extent` half-size
    pub fn orthographic(position: Vec3, target: Vec3, extent: f32, near: f32, far: f32) -> Self {
        let up = Self::stable_up(target - position);
        Self::new(
            Mat4::look_at_rh(position, target, up),
            Mat4::orthographic_rh(-extent, extent, -extent, extent, near, far),
            position,
        )
    }

    pub fn view_proj(&self) -> Mat4 {
        self.projection * self.view
    }

    /// Up vector that is not parallel to `direction`
    fn stable_up(direction: Vec3) -> Vec3 {
        if direction.normalize_or_zero().abs().dot(Vec3::Y) > 0.99 {
            Vec3::Z
        } else {
            Vec3::Y
        }
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY, Mat4::IDENTITY, Vec3::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looking_straight_down_picks_another_up() {
        let camera = Camera::orthographic(Vec3::new(0.0, 10.0, 0.0), Vec3::ZERO, 5.0, 0.1, 20.0);
        assert!(camera.view.is_finite());
        let clip = camera.view_proj() * Vec3::ZERO.extend(1.0);
        assert!(clip.x.abs() < 1e-5 && clip.y.abs() < 1e-5);
    }

    #[test]
    fn target_lands_in_front_of_perspective_camera() {
        let camera = Camera::perspective(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, 1.0, 1.0, 0.1, 100.0);
        let clip = camera.view_proj() * Vec3::ZERO.extend(1.0);
        let ndc_z = clip.z / clip.w;
        assert!((0.0..=1.0).contains(&ndc_z));
    }
}
