//! Shadow maps
//!
//! A shadow map pairs an offscreen render target with a camera placed at a
//! light. Every frame `LightList::make_shadow_maps` assigns each contributing
//! shadow map a layer of the shadow atlas and renders the scene into it.
//!
//! Shadow maps are owned by whoever attached them to a light; the light only
//! keeps a weak reference.

use crate::backend::{RenderTarget, Renderer};
use crate::camera::Camera;
use crate::scene::Scene;
use crate::shader::ShaderManager;
use crate::Result;
use glam::{Mat4, Vec3};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

/// Maps clip space [-1, 1] into texture space [0, 1] for shadow lookups
const SHADOW_BIAS: Mat4 = Mat4::from_cols_array(&[
    0.5, 0.0, 0.0, 0.0,
    0.0, 0.5, 0.0, 0.0,
    0.0, 0.0, 1.0, 0.0,
    0.5, 0.5, 0.0, 1.0,
]);

/// Render target + camera used to render depth from a light's point of view
#[derive(Debug)]
pub struct ShadowMap {
    enabled: AtomicBool,
    layer_index: AtomicI32,
    camera: RwLock<Option<Camera>>,
    target: RwLock<Option<RenderTarget>>,
}

impl ShadowMap {
    pub fn new(target: Option<RenderTarget>, camera: Option<Camera>) -> Arc<Self> {
        Arc::new(Self {
            enabled: AtomicBool::new(true),
            layer_index: AtomicI32::new(-1),
            camera: RwLock::new(camera),
            target: RwLock::new(target),
        })
    }

    /// Orthographic shadow camera looking along `direction` at `center`
    pub fn ortho_for_direction(direction: Vec3, center: Vec3, extent: f32, near: f32, far: f32) -> Camera {
        let dir = direction.normalize_or_zero();
        let eye = center - dir * (far * 0.5);
        Camera::orthographic(eye, center, extent, near, far)
    }

    /// Perspective shadow camera covering a spot light's outer cone
    pub fn perspective_for_spot(position: Vec3, direction: Vec3, outer_angle: f32, near: f32, far: f32) -> Camera {
        let dir = direction.normalize_or_zero();
        Camera::perspective(
            position,
            position + dir,
            (outer_angle * 2.0).clamp(0.01, std::f32::consts::PI - 0.01),
            1.0,
            near,
            far,
        )
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn camera(&self) -> Option<Camera> {
        *self.camera.read()
    }

    pub fn set_camera(&self, camera: Option<Camera>) {
        *self.camera.write() = camera;
    }

    /// Whether a render target is attached
    pub fn has_texture(&self) -> bool {
        self.target.read().is_some()
    }

    pub fn set_render_target(&self, target: Option<RenderTarget>) {
        *self.target.write() = target;
    }

    /// Attached render target, tagged with the current atlas layer
    pub fn render_target(&self) -> Option<RenderTarget> {
        self.target
            .read()
            .as_ref()
            .map(|t| t.with_layer(self.layer_index()))
    }

    /// Atlas layer assigned this frame, -1 before the first assignment
    pub fn layer_index(&self) -> i32 {
        self.layer_index.load(Ordering::Acquire)
    }

    pub fn set_layer_index(&self, layer: i32) {
        self.layer_index.store(layer, Ordering::Release);
    }

    /// Texture-space matrix shaders use to sample this shadow map
    pub fn shadow_matrix(&self) -> Option<Mat4> {
        self.camera().map(|c| SHADOW_BIAS * c.view_proj())
    }

    pub fn cull_from_camera(&self, scene: &Scene, renderer: &dyn Renderer, shaders: &ShaderManager) -> Result<()> {
        match self.camera() {
            Some(camera) => renderer.cull_from_camera(scene, &camera, shaders),
            None => Ok(()),
        }
    }

    pub fn begin_rendering(&self, renderer: &dyn Renderer) -> Result<()> {
        match self.render_target() {
            Some(target) => renderer.begin_render_target(&target),
            None => Ok(()),
        }
    }

    pub fn end_rendering(&self, renderer: &dyn Renderer) -> Result<()> {
        match self.render_target() {
            Some(target) => renderer.end_render_target(&target),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_target_carries_layer() {
        let map = ShadowMap::new(Some(RenderTarget::new("shadow", 512, 512)), None);
        assert_eq!(map.render_target().unwrap().layer, -1);
        map.set_layer_index(3);
        assert_eq!(map.render_target().unwrap().layer, 3);
        assert!(map.has_texture());
        assert!(map.shadow_matrix().is_none());
    }

    #[test]
    fn shadow_matrix_maps_center_to_texture_middle() {
        let camera = ShadowMap::ortho_for_direction(Vec3::new(0.0, -1.0, 0.0), Vec3::ZERO, 10.0, 0.1, 100.0);
        let map = ShadowMap::new(None, Some(camera));
        let m = map.shadow_matrix().unwrap();
        let p = m.project_point3(Vec3::ZERO);
        assert!((p.x - 0.5).abs() < 1e-4);
        assert!((p.y - 0.5).abs() < 1e-4);
    }
}
