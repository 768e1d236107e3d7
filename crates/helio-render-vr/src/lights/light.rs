//! A single light source and its slice of the shared light block

use super::class::{LightClass, LightClassId};
use crate::backend::{Renderer, UniformBuffer};
use crate::scene::Scene;
use crate::shader::ShaderManager;
use crate::shadows::ShadowMap;
use crate::uniforms::UniformBlock;
use crate::Result;
use glam::Mat4;
use parking_lot::{Mutex, MutexGuard};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

const ENABLED: &str = "enabled";
const SHADOW_MAP_INDEX: &str = "shadow_map_index";
const SHADOW_MATRIX_COLUMNS: [&str; 4] = ["sm0", "sm1", "sm2", "sm3"];

/// No block offset assigned yet
const NO_OFFSET: usize = usize::MAX;

/// One light source
///
/// A light is shared as `Arc<Light>`. While attached to a scene its
/// [`LightList`](super::LightList) assigns it an index within its class and a
/// float offset into the shared light block; both are rewritten when the light
/// population changes and must be re-read every frame.
#[derive(Debug)]
pub struct Light {
    class: Arc<LightClass>,
    enabled: AtomicBool,
    index: AtomicI32,
    block_offset: AtomicUsize,
    uniforms: Mutex<UniformBlock>,
    shadow_map: Mutex<Weak<ShadowMap>>,
}

impl Light {
    pub fn new(class: Arc<LightClass>) -> Arc<Self> {
        Self::with_defaults(class, &[])
    }

    /// Directional light shining straight down with white diffuse and specular
    pub fn directional() -> Arc<Self> {
        Self::with_defaults(LightClass::directional(), DIRECTIONAL_DEFAULTS)
    }

    pub fn point() -> Arc<Self> {
        Self::with_defaults(LightClass::point(), POINT_DEFAULTS)
    }

    /// Spot light pointing down -Z. Cone angles are stored as cosines.
    pub fn spot() -> Arc<Self> {
        Self::with_defaults(LightClass::spot(), SPOT_DEFAULTS)
    }

    fn with_defaults(class: Arc<LightClass>, defaults: &[Defaults]) -> Arc<Self> {
        let block = match Self::default_block(&class, defaults) {
            Ok(block) => block,
            Err(err) => {
                debug_assert!(false, "bad defaults for {}: {}", class.name(), err);
                log::error!("Bad defaults for {}: {}", class.name(), err);
                UniformBlock::new(class.descriptor().clone())
            }
        };

        Arc::new(Self {
            class,
            enabled: AtomicBool::new(true),
            index: AtomicI32::new(-1),
            block_offset: AtomicUsize::new(NO_OFFSET),
            uniforms: Mutex::new(block),
            shadow_map: Mutex::new(Weak::new()),
        })
    }

    /// Uniform block of `class` with `defaults` applied in order
    fn default_block(class: &LightClass, defaults: &[Defaults]) -> Result<UniformBlock> {
        let mut block = UniformBlock::new(class.descriptor().clone());
        for (name, value) in [(ENABLED, 1.0f32), (SHADOW_MAP_INDEX, -1.0)] {
            if block.has_uniform(name) {
                block.set_float(name, value)?;
            }
        }
        for (name, values) in defaults.iter().flat_map(|d| d.iter()) {
            block.set_floats(name, values)?;
        }
        Ok(block)
    }

    pub fn class(&self) -> &Arc<LightClass> {
        &self.class
    }

    pub fn class_id(&self) -> LightClassId {
        self.class.id()
    }

    /// Position within the class array, -1 while detached
    pub fn index(&self) -> i32 {
        self.index.load(Ordering::Acquire)
    }

    pub(crate) fn set_index(&self, index: i32) {
        self.index.store(index, Ordering::Release);
    }

    pub fn is_attached(&self) -> bool {
        self.index() >= 0
    }

    /// Offset in floats into the shared light block
    pub fn block_offset(&self) -> Option<usize> {
        match self.block_offset.load(Ordering::Acquire) {
            NO_OFFSET => None,
            offset => Some(offset),
        }
    }

    pub(crate) fn set_block_offset(&self, offset: Option<usize>) {
        self.block_offset.store(offset.unwrap_or(NO_OFFSET), Ordering::Release);
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Toggle the light. The `enabled` uniform follows the flag so shaders can
    /// skip disabled entries.
    pub fn set_enabled(&self, enabled: bool) -> Result<()> {
        self.enabled.store(enabled, Ordering::Release);
        let mut block = self.uniforms.lock();
        if block.has_uniform(ENABLED) {
            block.set_float(ENABLED, if enabled { 1.0 } else { 0.0 })?;
        }
        Ok(())
    }

    /// Locked access to the light's uniform block
    pub fn uniforms(&self) -> MutexGuard<'_, UniformBlock> {
        self.uniforms.lock()
    }

    pub fn set_float(&self, name: &str, value: f32) -> Result<()> {
        self.uniforms.lock().set_float(name, value)
    }

    pub fn get_float(&self, name: &str) -> Result<f32> {
        self.uniforms.lock().get_float(name)
    }

    pub fn set_vec3(&self, name: &str, value: [f32; 3]) -> Result<()> {
        self.uniforms.lock().set_vec3(name, value)
    }

    pub fn set_vec4(&self, name: &str, value: [f32; 4]) -> Result<()> {
        self.uniforms.lock().set_vec4(name, value)
    }

    pub fn get_vec4(&self, name: &str) -> Result<[f32; 4]> {
        self.uniforms.lock().get_vec4(name)
    }

    /// Uniform footprint in bytes
    pub fn total_size(&self) -> usize {
        self.class.descriptor().total_size()
    }

    pub fn is_dirty(&self) -> bool {
        self.uniforms.lock().is_dirty()
    }

    /// Upload this light's floats at `offset` and clear its dirty flag
    pub(crate) fn upload(&self, buffer: &dyn UniformBuffer, renderer: &dyn Renderer, offset: usize) -> Result<()> {
        let mut block = self.uniforms.lock();
        buffer.update(renderer, offset, block.as_floats())?;
        block.clear_dirty();
        log::trace!(
            "Uploaded {}[{}] at float offset {}",
            self.class.name(),
            self.index(),
            offset
        );
        Ok(())
    }

    /// Attach a shadow map. The light does not keep it alive.
    pub fn set_shadow_map(&self, map: &Arc<ShadowMap>) {
        *self.shadow_map.lock() = Arc::downgrade(map);
    }

    pub fn clear_shadow_map(&self) {
        *self.shadow_map.lock() = Weak::new();
    }

    /// The attached shadow map, whether or not it can render
    pub fn shadow_map_handle(&self) -> Option<Arc<ShadowMap>> {
        self.shadow_map.lock().upgrade()
    }

    /// The attached shadow map if it is enabled and has a camera
    pub fn shadow_map(&self) -> Option<Arc<ShadowMap>> {
        self.shadow_map_handle()
            .filter(|map| map.enabled() && map.camera().is_some())
    }

    /// Write a shadow matrix into the `sm0..sm3` columns
    pub fn update_shadow_matrix(&self, matrix: &Mat4) -> Result<()> {
        let mut block = self.uniforms.lock();
        for (i, name) in SHADOW_MATRIX_COLUMNS.iter().enumerate() {
            if block.has_uniform(name) {
                block.set_vec4(name, matrix.col(i).to_array())?;
            }
        }
        Ok(())
    }

    fn set_shadow_map_index(&self, value: f32) -> Result<()> {
        let mut block = self.uniforms.lock();
        if block.has_uniform(SHADOW_MAP_INDEX) {
            block.set_float(SHADOW_MAP_INDEX, value)?;
        }
        Ok(())
    }

    /// Give up any atlas layer. Returns true if the light had a renderable
    /// shadow map.
    pub(crate) fn release_shadow_layer(&self) -> Result<bool> {
        self.set_shadow_map_index(-1.0)?;
        let map = self.shadow_map().filter(|m| m.has_texture());
        if let Some(map) = &map {
            map.set_layer_index(-1);
        }
        Ok(map.is_some())
    }

    /// Render this light's shadow map into atlas layer `layer`
    ///
    /// Returns `false` when the light has no renderable shadow map, after
    /// resetting `shadow_map_index` to -1.
    pub fn make_shadow_map(
        &self,
        scene: &Scene,
        shaders: &ShaderManager,
        renderer: &dyn Renderer,
        layer: i32,
    ) -> Result<bool> {
        let Some(map) = self.shadow_map().filter(|m| m.has_texture()) else {
            self.set_shadow_map_index(-1.0)?;
            return Ok(false);
        };

        self.set_shadow_map_index(layer as f32)?;
        if let Some(matrix) = map.shadow_matrix() {
            self.update_shadow_matrix(&matrix)?;
        }
        map.set_layer_index(layer);

        let Some(target) = map.render_target() else {
            return Ok(false);
        };
        map.cull_from_camera(scene, renderer, shaders)?;
        map.begin_rendering(renderer)?;
        renderer.render_render_target(scene, &target, shaders)?;
        map.end_rendering(renderer)?;
        Ok(true)
    }

    /// Append one declaration line per uniform field and return the footprint
    /// in bytes
    pub fn make_shader_layout(&self, layout: &mut String) -> usize {
        let descriptor = self.class.descriptor();
        descriptor.for_each_uniform(|entry| {
            let _ = writeln!(layout, "    {}", entry.declaration());
        });
        descriptor.total_size()
    }

    /// Struct declaration matching this light's class, e.g. `struct UPointLight {...};`
    pub fn make_shader_struct(&self) -> String {
        let mut out = format!("struct {}\n{{\n", self.class.shader_type_name());
        self.make_shader_layout(&mut out);
        out.push_str("};\n");
        out
    }

    /// Register with the scene's light list
    pub fn on_added_to_scene(self: &Arc<Self>, scene: &Scene) -> bool {
        scene.lights().add_light(self)
    }

    /// Unregister from the scene's light list
    pub fn on_removed_from_scene(&self, scene: &Scene) -> bool {
        scene.lights().remove_light(self)
    }
}

type Defaults = &'static [(&'static str, &'static [f32])];

const DIRECTIONAL_DEFAULTS: &[Defaults] = &[&[
    ("world_direction", &[0.0, -1.0, 0.0]),
    ("ambient_intensity", &[0.0, 0.0, 0.0, 1.0]),
    ("diffuse_intensity", &[1.0, 1.0, 1.0, 1.0]),
    ("specular_intensity", &[1.0, 1.0, 1.0, 1.0]),
]];

const POINT_FIELDS: Defaults = &[
    ("world_position", &[0.0, 0.0, 0.0]),
    ("ambient_intensity", &[0.0, 0.0, 0.0, 1.0]),
    ("diffuse_intensity", &[1.0, 1.0, 1.0, 1.0]),
    ("specular_intensity", &[1.0, 1.0, 1.0, 1.0]),
    ("attenuation_constant", &[1.0]),
    ("attenuation_linear", &[0.0]),
    ("attenuation_quadratic", &[0.0]),
];

const POINT_DEFAULTS: &[Defaults] = &[POINT_FIELDS];

const SPOT_DEFAULTS: &[Defaults] = &[
    POINT_FIELDS,
    &[
        ("world_direction", &[0.0, 0.0, -1.0]),
        ("inner_cone_angle", &[0.9]),
        ("outer_cone_angle", &[0.8]),
    ],
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RenderTarget;
    use crate::camera::Camera;

    #[test]
    fn shadow_map_requires_enabled_and_camera() {
        let light = Light::directional();
        assert!(light.shadow_map().is_none());

        let map = ShadowMap::new(Some(RenderTarget::new("shadow", 256, 256)), None);
        light.set_shadow_map(&map);
        assert!(light.shadow_map_handle().is_some());
        assert!(light.shadow_map().is_none(), "no camera yet");

        map.set_camera(Some(Camera::default()));
        assert!(light.shadow_map().is_some());

        map.set_enabled(false);
        assert!(light.shadow_map().is_none());
        assert!(light.shadow_map_handle().is_some());

        drop(map);
        assert!(light.shadow_map_handle().is_none());
    }

    #[test]
    fn shader_layout_lists_every_field() {
        let light = Light::point();
        let mut layout = String::new();
        let size = light.make_shader_layout(&mut layout);
        assert_eq!(size, light.total_size());
        assert_eq!(layout.lines().count(), 8);
        assert!(layout.contains("vec3 world_position;"));

        let decl = light.make_shader_struct();
        assert!(decl.starts_with("struct UPointLight\n{\n"));
        assert!(decl.ends_with("};\n"));
    }

    #[test]
    fn defaults_and_enable_toggle() {
        let light = Light::directional();
        assert_eq!(light.index(), -1);
        assert_eq!(light.block_offset(), None);
        assert_eq!(light.get_float("shadow_map_index").unwrap(), -1.0);
        assert_eq!(light.get_float("enabled").unwrap(), 1.0);

        light.uniforms().clear_dirty();
        light.set_enabled(false).unwrap();
        assert!(!light.enabled());
        assert_eq!(light.get_float("enabled").unwrap(), 0.0);
        assert!(light.is_dirty());
    }

    #[test]
    fn builtin_defaults_fit_their_descriptors() {
        for (class, defaults) in [
            (LightClass::directional(), DIRECTIONAL_DEFAULTS),
            (LightClass::point(), POINT_DEFAULTS),
            (LightClass::spot(), SPOT_DEFAULTS),
        ] {
            assert!(Light::default_block(&class, defaults).is_ok(), "{}", class.name());
        }

        let spot = Light::spot();
        assert_eq!(spot.get_float("outer_cone_angle").unwrap(), 0.8);
        assert_eq!(spot.get_float("attenuation_constant").unwrap(), 1.0);
    }

    #[test]
    fn defaults_naming_a_missing_field_fail() {
        let bad: &[Defaults] = &[&[("cone_angle", &[0.5])]];
        assert!(Light::default_block(&LightClass::point(), bad).is_err());

        let wrong_arity: &[Defaults] = &[&[("attenuation_linear", &[0.1, 0.2])]];
        assert!(Light::default_block(&LightClass::point(), wrong_arity).is_err());
    }

    #[test]
    fn shadow_matrix_written_as_columns() {
        let light = Light::spot();
        let m = Mat4::from_cols_array(&[
            1.0, 2.0, 3.0, 4.0,
            5.0, 6.0, 7.0, 8.0,
            9.0, 10.0, 11.0, 12.0,
            13.0, 14.0, 15.0, 16.0,
        ]);
        light.update_shadow_matrix(&m).unwrap();
        assert_eq!(light.get_vec4("sm0").unwrap(), [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(light.get_vec4("sm3").unwrap(), [13.0, 14.0, 15.0, 16.0]);
    }
}
