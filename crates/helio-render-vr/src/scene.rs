//! Scene database and per-frame orchestration

use crate::backend::{DrawCall, Renderer};
use crate::camera::Camera;
use crate::config::LightingConfig;
use crate::lights::{Light, LightClassRegistry, LightList};
use crate::render_data::{compare_for_draw, RenderData};
use crate::shader::{ShaderManager, ShaderTemplate};
use crate::{Error, Result};
use glam::Vec3;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::sync::Arc;

/// A drawable in the scene
#[derive(Debug)]
pub struct SceneObject {
    name: String,
    position: Mutex<Vec3>,
    render_data: Mutex<RenderData>,
}

impl SceneObject {
    pub fn new(name: impl Into<String>, position: Vec3, render_data: RenderData) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            position: Mutex::new(position),
            render_data: Mutex::new(render_data),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn position(&self) -> Vec3 {
        *self.position.lock()
    }

    pub fn set_position(&self, position: Vec3) {
        *self.position.lock() = position;
    }

    pub fn render_data(&self) -> MutexGuard<'_, RenderData> {
        self.render_data.lock()
    }
}

/// What one call to [`Scene::render_frame`] did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub shadow_maps: usize,
    pub draws: usize,
    pub shaders_rebuilt: bool,
    /// A light had a renderable shadow map this frame
    pub shadow_candidate: bool,
}

/// The scene database
///
/// Owns the light list, the light class registry and every drawable. All
/// methods take `&self` so a logic thread can attach lights and objects while
/// the render thread runs frames.
pub struct Scene {
    lights: LightList,
    light_classes: LightClassRegistry,
    objects: RwLock<Vec<Arc<SceneObject>>>,
    main_camera: RwLock<Camera>,
}

impl Scene {
    pub fn new(config: LightingConfig) -> Self {
        Self {
            lights: LightList::new(config),
            light_classes: LightClassRegistry::new(),
            objects: RwLock::new(Vec::new()),
            main_camera: RwLock::new(Camera::default()),
        }
    }

    pub fn with_main_camera(self, camera: Camera) -> Self {
        *self.main_camera.write() = camera;
        self
    }

    pub fn lights(&self) -> &LightList {
        &self.lights
    }

    pub fn light_classes(&self) -> &LightClassRegistry {
        &self.light_classes
    }

    pub fn main_camera(&self) -> Camera {
        *self.main_camera.read()
    }

    pub fn set_main_camera(&self, camera: Camera) {
        *self.main_camera.write() = camera;
    }

    pub fn add_light(&self, light: &Arc<Light>) -> bool {
        light.on_added_to_scene(self)
    }

    pub fn remove_light(&self, light: &Light) -> bool {
        light.on_removed_from_scene(self)
    }

    pub fn add_object(&self, object: Arc<SceneObject>) {
        self.objects.write().push(object);
    }

    pub fn remove_object(&self, object: &SceneObject) -> bool {
        let mut objects = self.objects.write();
        let before = objects.len();
        objects.retain(|o| !std::ptr::eq(Arc::as_ptr(o), object));
        objects.len() != before
    }

    /// Snapshot of the drawables
    pub fn objects(&self) -> Vec<Arc<SceneObject>> {
        self.objects.read().clone()
    }

    /// Run one frame: sync lights, rebuild lit shaders if the light population
    /// changed, render shadow maps and submit draws in sorted order.
    pub fn render_frame(
        &self,
        renderer: &dyn Renderer,
        shaders: &ShaderManager,
        template: &ShaderTemplate,
    ) -> Result<FrameStats> {
        let mut stats = FrameStats::default();

        let mut shadow_map = self.lights.update_lights(renderer)?;
        if self.lights.needs_shader_rebuild() {
            let shader = shaders.light_shader(template, &self.lights)?;
            for object in self.objects() {
                let mut rd = object.render_data();
                if !rd.light_enabled() {
                    continue;
                }
                for pass in 0..rd.pass_count() {
                    rd.set_shader(pass, shader.id(), false)?;
                }
            }
            stats.shaders_rebuilt = true;

            // Shaders match again, so the light block can be synced this frame.
            // If lights changed meanwhile the rebuild stays pending.
            if self.lights.shaders_rebuilt(shader.signature()) {
                shadow_map = self.lights.update_lights(renderer)?;
            }
        }
        stats.shadow_candidate = shadow_map.is_some();

        stats.shadow_maps = self.lights.make_shadow_maps(self, shaders, renderer)?;
        stats.draws = self.submit_draws(renderer, shaders)?;

        log::trace!("Frame: {:?}", stats);
        Ok(stats)
    }

    fn submit_draws(&self, renderer: &dyn Renderer, shaders: &ShaderManager) -> Result<usize> {
        let eye = self.main_camera().position;
        let mut queue: Vec<(usize, RenderData)> = self
            .objects()
            .iter()
            .enumerate()
            .map(|(i, object)| {
                let position = object.position();
                let mut rd = object.render_data();
                rd.invalidate_camera_distance();
                rd.resolve_camera_distance(|| position.distance(eye));
                (i, rd.clone())
            })
            .collect();
        queue.sort_by(|a, b| compare_for_draw(&a.1, &b.1));

        let mut draws = 0;
        for (object, rd) in &queue {
            for (pass, render_pass) in rd.passes().iter().enumerate() {
                let Some(id) = render_pass.shader(false) else {
                    continue;
                };
                let shader = shaders
                    .get(id)
                    .ok_or_else(|| Error::Shader(format!("unknown shader {:?}", id)))?;
                let lit = rd.light_enabled() && self.lights.use_lights(renderer, &shader)?;
                renderer.draw(
                    &DrawCall {
                        object: *object,
                        pass,
                        shader: id,
                        state_hash: rd.hash_code(),
                        rendering_order: rd.rendering_order(),
                        lit,
                    },
                    rd,
                )?;
                draws += 1;
            }
        }
        Ok(draws)
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new(LightingConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_data::RenderPass;

    #[test]
    fn light_hooks_route_through_scene() {
        let scene = Scene::default();
        let light = Light::spot();
        assert!(scene.add_light(&light));
        assert_eq!(light.index(), 0);
        assert_eq!(scene.lights().light_count(), 1);
        assert!(scene.remove_light(&light));
        assert!(!light.is_attached());
        assert!(!scene.remove_light(&light));
    }

    #[test]
    fn objects_added_and_removed() {
        let scene = Scene::default();
        let mut rd = RenderData::new();
        rd.add_pass(RenderPass::new());
        let cube = SceneObject::new("cube", Vec3::ZERO, rd);
        scene.add_object(cube.clone());
        assert_eq!(scene.objects().len(), 1);
        assert!(scene.remove_object(&cube));
        assert!(!scene.remove_object(&cube));
    }
}
