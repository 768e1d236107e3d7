//! Scene light list - owns the light population and the shared light block

use super::class::{LightClass, LightClassId};
use super::light::Light;
use crate::backend::{Renderer, UniformBuffer, UniformBufferDesc};
use crate::config::LightingConfig;
use crate::scene::Scene;
use crate::shader::{Shader, ShaderManager};
use crate::shadows::ShadowMap;
use crate::Result;
use bitflags::bitflags;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Arc, Weak};

bitflags! {
    /// Pending work for the light list
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LightDirty: u32 {
        const LIGHT_ADDED = 1 << 0;
        const LIGHT_REMOVED = 1 << 1;
        const SHADOW_CHANGED = 1 << 2;
        const REBUILD_SHADERS = 1 << 3;
    }
}

/// Descriptor of one element of the shared block
const LIGHT_BLOCK_DESC: &str = "float lightdata";

struct ClassBucket {
    class: Arc<LightClass>,
    lights: Vec<Weak<Light>>,
}

impl ClassBucket {
    fn renumber(&self) {
        for (i, light) in self.lights.iter().enumerate() {
            if let Some(light) = light.upgrade() {
                light.set_index(i as i32);
            }
        }
    }
}

#[derive(Default)]
struct ListState {
    classes: BTreeMap<LightClassId, ClassBucket>,
    block: Option<Arc<dyn UniformBuffer>>,
    dirty: LightDirty,
    num_shadow_maps: usize,
}

impl Default for LightDirty {
    fn default() -> Self {
        Self::empty()
    }
}

impl ListState {
    fn light_count(&self) -> usize {
        self.classes.values().map(|b| b.lights.len()).sum()
    }

    fn contains(&self, light: &Light) -> bool {
        let ptr = light as *const Light;
        self.classes
            .get(&light.class_id())
            .is_some_and(|b| b.lights.iter().any(|w| Weak::as_ptr(w) == ptr))
    }

    /// Drop lights that no longer exist. Returns true if any were removed.
    fn prune(&mut self) -> bool {
        let mut pruned = false;
        self.classes.retain(|_, bucket| {
            let before = bucket.lights.len();
            bucket.lights.retain(|w| w.strong_count() > 0);
            if bucket.lights.len() != before {
                pruned = true;
                bucket.renumber();
            }
            !bucket.lights.is_empty()
        });
        pruned
    }

    /// Live lights in class-then-index order
    fn snapshot(&self) -> Vec<Arc<Light>> {
        self.classes
            .values()
            .flat_map(|b| b.lights.iter().filter_map(Weak::upgrade))
            .collect()
    }
}

/// All lights of one scene, packed into a single uniform block
///
/// Lights are grouped by class and ordered by class id, then by index within
/// the class. The list only holds weak references; a dropped light is removed
/// on the next [`update_lights`](Self::update_lights).
///
/// Every operation takes the same reentrant lock. Calls into lights, shadow
/// maps and the renderer are made without any interior borrow held, so a
/// shadow render may call back into the list (even to add or remove lights).
pub struct LightList {
    config: LightingConfig,
    state: ReentrantMutex<RefCell<ListState>>,
}

impl LightList {
    pub fn new(config: LightingConfig) -> Self {
        Self {
            config,
            state: ReentrantMutex::new(RefCell::new(ListState::default())),
        }
    }

    pub fn config(&self) -> &LightingConfig {
        &self.config
    }

    fn lock(&self) -> ReentrantMutexGuard<'_, RefCell<ListState>> {
        self.state.lock()
    }

    /// Add a light to its class bucket
    ///
    /// Returns false if the light is already in the list or the list holds
    /// `max_lights` lights.
    pub fn add_light(&self, light: &Arc<Light>) -> bool {
        let guard = self.lock();
        let mut state = guard.borrow_mut();

        if state.prune() {
            state.dirty |= LightDirty::LIGHT_REMOVED | LightDirty::REBUILD_SHADERS;
        }
        if state.contains(light) {
            log::debug!("{} already in light list", light.class().name());
            return false;
        }
        if state.light_count() >= self.config.max_lights {
            log::warn!(
                "Light list full ({} lights), rejecting {}",
                self.config.max_lights,
                light.class().name()
            );
            return false;
        }

        let bucket = state
            .classes
            .entry(light.class_id())
            .or_insert_with(|| ClassBucket {
                class: light.class().clone(),
                lights: Vec::new(),
            });
        light.set_index(bucket.lights.len() as i32);
        bucket.lights.push(Arc::downgrade(light));
        state.dirty |= LightDirty::LIGHT_ADDED | LightDirty::REBUILD_SHADERS;

        log::debug!("Added {}[{}]", light.class().name(), light.index());
        true
    }

    /// Remove a light and renumber the rest of its class
    ///
    /// Returns false if the light is not in the list.
    pub fn remove_light(&self, light: &Light) -> bool {
        let guard = self.lock();
        let mut state = guard.borrow_mut();
        let ptr = light as *const Light;
        let class_id = light.class_id();

        let Some(bucket) = state.classes.get_mut(&class_id) else {
            log::debug!("remove_light: no {} lights in list", light.class().name());
            return false;
        };
        let Some(pos) = bucket.lights.iter().position(|w| Weak::as_ptr(w) == ptr) else {
            log::debug!("remove_light: {} not in list", light.class().name());
            return false;
        };

        bucket.lights.remove(pos);
        bucket.renumber();
        if bucket.lights.is_empty() {
            state.classes.remove(&class_id);
        }
        light.set_index(-1);
        light.set_block_offset(None);
        state.dirty |= LightDirty::LIGHT_REMOVED | LightDirty::REBUILD_SHADERS;

        log::debug!("Removed {} light", light.class().name());
        true
    }

    /// Per-frame sync of the light block
    ///
    /// While shaders are out of date nothing is uploaded and the dirty flags
    /// are kept; the call only reports the last renderable shadow map. Otherwise
    /// offsets are reassigned after membership changes, the block grows if
    /// needed and every dirty light is uploaded at its offset.
    ///
    /// Returns the last enabled shadow map seen, if any.
    pub fn update_lights(&self, renderer: &dyn Renderer) -> Result<Option<Arc<ShadowMap>>> {
        let guard = self.lock();
        let (dirty, lights) = {
            let mut state = guard.borrow_mut();
            if state.prune() {
                state.dirty |= LightDirty::LIGHT_REMOVED | LightDirty::REBUILD_SHADERS;
            }
            (state.dirty, state.snapshot())
        };

        if dirty.contains(LightDirty::REBUILD_SHADERS) {
            return Ok(lights.iter().filter_map(|l| l.shadow_map()).last());
        }
        if dirty.intersects(LightDirty::LIGHT_ADDED | LightDirty::LIGHT_REMOVED) {
            self.build_light_block(&guard, &lights, renderer)?;
        }

        let block = guard.borrow().block.clone();
        let mut shadow_map = None;
        for light in &lights {
            if let Some(map) = light.shadow_map() {
                shadow_map = Some(map);
            }
            let (Some(block), Some(offset)) = (block.as_deref(), light.block_offset()) else {
                continue;
            };
            if !dirty.is_empty() || light.is_dirty() {
                light.upload(block, renderer, offset)?;
            }
        }

        // Flags raised by re-entrant calls during the uploads stay pending
        guard.borrow_mut().dirty.remove(dirty);
        Ok(shadow_map)
    }

    /// Assign block offsets in class order and grow the block if it is too
    /// small. The block never shrinks.
    fn build_light_block(
        &self,
        guard: &ReentrantMutexGuard<'_, RefCell<ListState>>,
        lights: &[Arc<Light>],
        renderer: &dyn Renderer,
    ) -> Result<()> {
        let mut num_floats = 0;
        for light in lights {
            light.set_block_offset(Some(num_floats));
            num_floats += light.total_size() / std::mem::size_of::<f32>();
        }

        let capacity = guard.borrow().block.as_ref().map(|b| b.capacity_floats());
        if num_floats == 0 || capacity.is_some_and(|c| c >= num_floats) {
            return Ok(());
        }

        let buffer = renderer.create_uniform_buffer(&UniformBufferDesc {
            descriptor: LIGHT_BLOCK_DESC,
            binding: self.config.light_ubo_binding,
            name: &self.config.light_block_name,
            num_floats,
        })?;
        log::info!(
            "Light block '{}' allocated: {} floats (was {})",
            self.config.light_block_name,
            num_floats,
            capacity.unwrap_or(0)
        );
        guard.borrow_mut().block = Some(Arc::from(buffer));
        Ok(())
    }

    /// Bind the light block to `shader`
    ///
    /// Returns false when no block has been built yet; the draw proceeds
    /// unlit.
    pub fn use_lights(&self, renderer: &dyn Renderer, shader: &Shader) -> Result<bool> {
        let guard = self.lock();
        let block = guard.borrow().block.clone();
        match block {
            Some(block) => {
                block.bind(renderer, shader)?;
                Ok(true)
            }
            None => {
                log::debug!("No light block, drawing {:?} unlit", shader.id());
                Ok(false)
            }
        }
    }

    /// Render the shadow map of every enabled light
    ///
    /// Atlas layers are handed out in class order to lights that actually
    /// render, up to `max_shadow_maps`. Lights past the limit get
    /// `shadow_map_index` -1. Returns the number of shadow maps rendered.
    pub fn make_shadow_maps(&self, scene: &Scene, shaders: &ShaderManager, renderer: &dyn Renderer) -> Result<usize> {
        let guard = self.lock();
        let lights = guard.borrow().snapshot();

        let max_layers = self.config.max_shadow_maps as i32;
        let mut layer = 0;
        for light in lights.iter().filter(|l| l.enabled()) {
            if layer >= max_layers {
                if light.release_shadow_layer()? {
                    log::debug!(
                        "Shadow atlas full ({} layers), {}[{}] renders unshadowed",
                        max_layers,
                        light.class().name(),
                        light.index()
                    );
                }
                continue;
            }
            if light.make_shadow_map(scene, shaders, renderer, layer)? {
                layer += 1;
            }
        }

        let rendered = layer as usize;
        let mut state = guard.borrow_mut();
        if state.num_shadow_maps != rendered {
            log::debug!("Shadow maps: {} -> {}", state.num_shadow_maps, rendered);
            state.num_shadow_maps = rendered;
            state.dirty |= LightDirty::SHADOW_CHANGED;
        }
        Ok(rendered)
    }

    /// Uniform block declaration with one struct array per light class
    pub fn make_shader_block(&self) -> String {
        let guard = self.lock();
        let state = guard.borrow();

        let mut out = format!("layout (std140) uniform {}\n{{\n", self.config.light_block_name);
        for bucket in state.classes.values() {
            let _ = writeln!(
                out,
                "{} {}[{}];",
                bucket.class.shader_type_name(),
                bucket.class.array_name(),
                bucket.lights.len()
            );
        }
        out.push_str("};\n");
        out
    }

    /// Compact key of the class population, e.g. `DirectLight1PointLight2`
    pub fn light_signature(&self) -> String {
        let guard = self.lock();
        let state = guard.borrow();
        state
            .classes
            .values()
            .map(|b| format!("{}{}", b.class.name(), b.lights.len()))
            .collect()
    }

    /// One light of each class present, in class order
    pub fn class_representatives(&self) -> Vec<Arc<Light>> {
        let guard = self.lock();
        let state = guard.borrow();
        state
            .classes
            .values()
            .filter_map(|b| b.lights.iter().find_map(Weak::upgrade))
            .collect()
    }

    /// All live lights in class-then-index order
    pub fn get_lights(&self) -> Vec<Arc<Light>> {
        self.lock().borrow().snapshot()
    }

    /// Detach every light. The light block is kept.
    pub fn clear(&self) {
        let guard = self.lock();
        let lights = {
            let mut state = guard.borrow_mut();
            let lights = state.snapshot();
            state.classes.clear();
            state.dirty = LightDirty::LIGHT_REMOVED | LightDirty::REBUILD_SHADERS;
            lights
        };
        for light in lights {
            light.set_index(-1);
            light.set_block_offset(None);
        }
    }

    /// Signature and light declarations (class structs, then the block) taken
    /// under one lock
    pub fn shader_declarations(&self) -> (String, String) {
        let _guard = self.lock();
        let mut source = String::new();
        for light in self.class_representatives() {
            source.push_str(&light.make_shader_struct());
        }
        source.push_str(&self.make_shader_block());
        (self.light_signature(), source)
    }

    /// Shaders were rebuilt for the population with `signature`
    ///
    /// Clears REBUILD_SHADERS only if the population still has that signature.
    /// Returns false when lights changed in the meantime, leaving the rebuild
    /// pending.
    pub fn shaders_rebuilt(&self, signature: &str) -> bool {
        let guard = self.lock();
        let current = self.light_signature();
        if current != signature {
            log::debug!("Lights changed during shader rebuild: {} -> {}", signature, current);
            return false;
        }
        guard.borrow_mut().dirty.remove(LightDirty::REBUILD_SHADERS);
        true
    }

    pub fn needs_shader_rebuild(&self) -> bool {
        self.dirty().contains(LightDirty::REBUILD_SHADERS)
    }

    pub fn dirty(&self) -> LightDirty {
        self.lock().borrow().dirty
    }

    pub fn num_shadow_maps(&self) -> usize {
        self.lock().borrow().num_shadow_maps
    }

    pub fn light_count(&self) -> usize {
        self.lock().borrow().light_count()
    }

    pub fn class_count(&self) -> usize {
        self.lock().borrow().classes.len()
    }

    /// Capacity of the light block in floats, 0 before the first build
    pub fn block_capacity(&self) -> usize {
        self.lock()
            .borrow()
            .block
            .as_ref()
            .map_or(0, |b| b.capacity_floats())
    }
}

impl Default for LightList {
    fn default() -> Self {
        Self::new(LightingConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{HeadlessRenderer, RenderTarget, RendererEvent};
    use crate::camera::Camera;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn indices(lights: &[Arc<Light>]) -> Vec<i32> {
        lights.iter().map(|l| l.index()).collect()
    }

    fn shadow_caster(light: &Arc<Light>) -> Arc<ShadowMap> {
        let map = ShadowMap::new(
            Some(RenderTarget::new("shadow", 128, 128)),
            Some(Camera::default()),
        );
        light.set_shadow_map(&map);
        map
    }

    #[test]
    fn point_lights_added_and_removed() {
        init();
        let list = LightList::default();
        let a = Light::point();
        let b = Light::point();

        assert!(list.add_light(&a));
        assert_eq!(a.index(), 0);
        assert_eq!(list.light_signature(), "PointLight1");

        assert!(list.add_light(&b));
        assert_eq!((a.index(), b.index()), (0, 1));

        assert!(list.remove_light(&a));
        assert_eq!(a.index(), -1);
        assert_eq!(b.index(), 0);
        assert_eq!(list.light_signature(), "PointLight1");

        assert!(list.remove_light(&b));
        assert_eq!(list.class_count(), 0);
        assert!(list.get_lights().is_empty());
        assert!(!list.remove_light(&b));
    }

    #[test]
    fn removing_first_keeps_relative_order() {
        let list = LightList::default();
        let lights: Vec<_> = (0..5).map(|_| Light::spot()).collect();
        for light in &lights {
            assert!(list.add_light(light));
        }
        list.remove_light(&lights[0]);

        let remaining = list.get_lights();
        assert_eq!(indices(&remaining), vec![0, 1, 2, 3]);
        for (kept, original) in remaining.iter().zip(&lights[1..]) {
            assert!(Arc::ptr_eq(kept, original));
        }
    }

    #[test]
    fn indices_stay_contiguous_under_churn() {
        let list = LightList::default();
        let mut live: Vec<Arc<Light>> = Vec::new();
        for step in 0..24usize {
            if step % 3 == 2 && !live.is_empty() {
                let victim = live.remove((step * 7) % live.len());
                assert!(list.remove_light(&victim));
            } else {
                let light = if step % 2 == 0 { Light::point() } else { Light::directional() };
                assert!(list.add_light(&light));
                live.push(light);
            }

            for class in [LightClassId::POINT, LightClassId::DIRECTIONAL] {
                let mut idx: Vec<i32> = list
                    .get_lights()
                    .iter()
                    .filter(|l| l.class_id() == class)
                    .map(|l| l.index())
                    .collect();
                idx.sort_unstable();
                assert_eq!(idx, (0..idx.len() as i32).collect::<Vec<_>>());
            }
        }
    }

    #[test]
    fn duplicates_and_ceiling_rejected() {
        let list = LightList::new(LightingConfig::default().with_max_lights(2));
        let a = Light::point();
        assert!(list.add_light(&a));
        assert!(!list.add_light(&a));
        let b = Light::point();
        assert!(list.add_light(&b));
        let c = Light::directional();
        assert!(!list.add_light(&c));
        assert_eq!(c.index(), -1);

        // a dropped light frees its slot
        drop(b);
        assert!(list.add_light(&c));
        assert_eq!(list.light_count(), 2);
    }

    #[test]
    fn no_upload_while_shaders_stale() {
        init();
        let renderer = HeadlessRenderer::new();
        let list = LightList::default();
        let a = Light::directional();
        let b = Light::spot();
        let map_a = shadow_caster(&a);
        let map_b = shadow_caster(&b);
        list.add_light(&a);
        list.add_light(&b);

        let candidate = list.update_lights(&renderer).unwrap();
        assert!(Arc::ptr_eq(&candidate.unwrap(), &map_b), "last wins");
        assert!(renderer.events().is_empty());
        assert!(list.dirty().contains(LightDirty::LIGHT_ADDED | LightDirty::REBUILD_SHADERS));

        map_b.set_enabled(false);
        let candidate = list.update_lights(&renderer).unwrap();
        assert!(Arc::ptr_eq(&candidate.unwrap(), &map_a));

        map_a.set_camera(None);
        assert!(list.update_lights(&renderer).unwrap().is_none());
        assert_eq!(renderer.upload_count(), 0);
    }

    #[test]
    fn uploads_after_shader_rebuild() {
        let renderer = HeadlessRenderer::new();
        let list = LightList::default();
        let a = Light::directional();
        let b = Light::point();
        list.add_light(&b);
        list.add_light(&a);
        list.shaders_rebuilt(&list.light_signature());

        list.update_lights(&renderer).unwrap();
        assert!(list.dirty().is_empty());
        assert_eq!(renderer.upload_count(), 2);

        // directional sorts first regardless of insertion order
        assert_eq!(a.block_offset(), Some(0));
        assert_eq!(b.block_offset(), Some(a.total_size() / 4));
        assert_eq!(list.block_capacity(), (a.total_size() + b.total_size()) / 4);

        let floats = renderer.buffer_floats("Lights_ubo").unwrap();
        let offset = b.block_offset().unwrap();
        assert_eq!(&floats[offset..offset + 1], &[1.0], "point enabled");

        // clean frame uploads nothing, a dirty light uploads only itself
        list.update_lights(&renderer).unwrap();
        assert_eq!(renderer.upload_count(), 2);
        b.set_vec3("world_position", [1.0, 2.0, 3.0]).unwrap();
        list.update_lights(&renderer).unwrap();
        assert_eq!(renderer.upload_count(), 3);
        let floats = renderer.buffer_floats("Lights_ubo").unwrap();
        assert_eq!(&floats[offset + 4..offset + 7], &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn capacity_never_shrinks() {
        let renderer = HeadlessRenderer::new();
        let list = LightList::default();
        let lights: Vec<_> = (0..4).map(|_| Light::spot()).collect();
        let mut capacities = Vec::new();

        for light in &lights {
            list.add_light(light);
            list.shaders_rebuilt(&list.light_signature());
            list.update_lights(&renderer).unwrap();
            capacities.push(list.block_capacity());
        }
        for light in &lights[..3] {
            list.remove_light(light);
            list.shaders_rebuilt(&list.light_signature());
            list.update_lights(&renderer).unwrap();
            capacities.push(list.block_capacity());
        }
        list.clear();
        capacities.push(list.block_capacity());

        assert!(capacities.windows(2).all(|w| w[0] <= w[1]), "{:?}", capacities);
        let allocations = renderer
            .events()
            .iter()
            .filter(|e| matches!(e, RendererEvent::CreateUniformBuffer { .. }))
            .count();
        assert_eq!(allocations, 4);
    }

    #[test]
    fn allocation_failure_is_propagated() {
        let renderer = HeadlessRenderer::new();
        let list = LightList::default();
        let light = Light::point();
        list.add_light(&light);
        list.shaders_rebuilt(&list.light_signature());

        renderer.fail_next_allocation();
        let err = list.update_lights(&renderer).unwrap_err();
        assert!(matches!(err, crate::Error::ResourceAllocationFailed(_)));
        assert!(list.dirty().contains(LightDirty::LIGHT_ADDED));

        list.update_lights(&renderer).unwrap();
        assert!(list.block_capacity() > 0);
    }

    #[test]
    fn dropped_lights_are_pruned() {
        let renderer = HeadlessRenderer::new();
        let list = LightList::default();
        let a = Light::point();
        let b = Light::point();
        list.add_light(&a);
        list.add_light(&b);
        list.shaders_rebuilt(&list.light_signature());
        list.update_lights(&renderer).unwrap();

        drop(a);
        list.update_lights(&renderer).unwrap();
        assert_eq!(b.index(), 0);
        assert_eq!(list.light_count(), 1);
        assert!(list.needs_shader_rebuild());
    }

    #[test]
    fn clear_keeps_block() {
        let renderer = HeadlessRenderer::new();
        let list = LightList::default();
        let a = Light::directional();
        let b = Light::point();
        list.add_light(&a);
        list.add_light(&b);
        list.shaders_rebuilt(&list.light_signature());
        list.update_lights(&renderer).unwrap();
        let capacity = list.block_capacity();
        assert!(capacity > 0);

        // pending additions are superseded by the clear
        let c = Light::spot();
        list.add_light(&c);
        assert!(list.dirty().contains(LightDirty::LIGHT_ADDED));

        list.clear();
        assert!(list.get_lights().is_empty());
        assert_eq!(list.dirty(), LightDirty::LIGHT_REMOVED | LightDirty::REBUILD_SHADERS);
        assert_eq!(a.index(), -1);
        assert_eq!(c.index(), -1);
        assert_eq!(list.block_capacity(), capacity);
    }

    #[test]
    fn shader_block_text() {
        let list = LightList::default();
        let lights = [Light::point(), Light::point(), Light::directional()];
        for light in &lights {
            list.add_light(light);
        }
        assert_eq!(
            list.make_shader_block(),
            "layout (std140) uniform Lights_ubo\n{\nUDirectLight DirectLights[1];\nUPointLight PointLights[2];\n};\n"
        );
        assert_eq!(list.light_signature(), "DirectLight1PointLight2");
        assert_eq!(list.class_representatives().len(), 2);
    }

    #[test]
    fn shadow_count_change_flags_shadow_changed() {
        init();
        let renderer = HeadlessRenderer::new();
        let scene = Scene::new(LightingConfig::default());
        let shaders = ShaderManager::new();
        let a = Light::directional();
        let b = Light::spot();
        let _map_a = shadow_caster(&a);
        scene.add_light(&a);
        scene.add_light(&b);
        scene.lights().shaders_rebuilt(&scene.lights().light_signature());

        assert_eq!(scene.lights().make_shadow_maps(&scene, &shaders, &renderer).unwrap(), 1);
        assert_eq!(a.get_float("shadow_map_index").unwrap(), 0.0);
        assert_eq!(b.get_float("shadow_map_index").unwrap(), -1.0);
        scene.lights().update_lights(&renderer).unwrap();
        assert!(scene.lights().dirty().is_empty());

        let map_b = shadow_caster(&b);
        assert_eq!(scene.lights().make_shadow_maps(&scene, &shaders, &renderer).unwrap(), 2);
        assert_eq!(scene.lights().num_shadow_maps(), 2);
        assert!(scene.lights().dirty().contains(LightDirty::SHADOW_CHANGED));
        assert_eq!(map_b.layer_index(), 1);
        assert_eq!(b.get_float("shadow_map_index").unwrap(), 1.0);

        // disabled lights are skipped and do not consume a layer
        a.set_enabled(false).unwrap();
        assert_eq!(scene.lights().make_shadow_maps(&scene, &shaders, &renderer).unwrap(), 1);
        assert_eq!(map_b.layer_index(), 0);
    }

    #[test]
    fn shadow_layers_stop_at_atlas_size() {
        init();
        let renderer = HeadlessRenderer::new();
        let scene = Scene::new(LightingConfig::default().with_max_shadow_maps(1));
        let shaders = ShaderManager::new();
        let a = Light::directional();
        let b = Light::directional();
        let map_a = shadow_caster(&a);
        let map_b = shadow_caster(&b);
        scene.add_light(&a);
        scene.add_light(&b);

        assert_eq!(scene.lights().make_shadow_maps(&scene, &shaders, &renderer).unwrap(), 1);
        assert_eq!(scene.lights().num_shadow_maps(), 1);
        assert_eq!(map_a.layer_index(), 0);
        assert_eq!(map_b.layer_index(), -1);
        assert_eq!(a.get_float("shadow_map_index").unwrap(), 0.0);
        assert_eq!(b.get_float("shadow_map_index").unwrap(), -1.0);
        let begun = renderer
            .events()
            .iter()
            .filter(|e| matches!(e, RendererEvent::BeginRenderTarget { .. }))
            .count();
        assert_eq!(begun, 1);

        // freeing the layer hands it to the next caster
        a.set_enabled(false).unwrap();
        assert_eq!(scene.lights().make_shadow_maps(&scene, &shaders, &renderer).unwrap(), 1);
        assert_eq!(map_b.layer_index(), 0);
        assert_eq!(b.get_float("shadow_map_index").unwrap(), 0.0);
    }

    #[test]
    fn rebuild_stays_pending_when_lights_change_mid_rebuild() {
        init();
        let shaders = ShaderManager::new();
        let template = crate::shader::ShaderTemplate::new("phong", "void main() {}\n");
        let list = LightList::default();
        let point = Light::point();
        list.add_light(&point);

        let shader = shaders.light_shader(&template, &list).unwrap();
        let spot = Light::spot();
        list.add_light(&spot);

        assert!(!list.shaders_rebuilt(shader.signature()));
        assert!(list.needs_shader_rebuild());
        assert_eq!(shader.signature(), "PointLight1");

        let rebuilt = shaders.light_shader(&template, &list).unwrap();
        assert_eq!(rebuilt.signature(), "PointLight1SpotLight1");
        assert!(rebuilt.source().contains("USpotLight SpotLights[1];"));
        assert!(list.shaders_rebuilt(rebuilt.signature()));
        assert!(!list.needs_shader_rebuild());
    }

    #[test]
    fn shader_declarations_match_block_and_signature() {
        let list = LightList::default();
        let lights = [Light::directional(), Light::point()];
        for light in &lights {
            list.add_light(light);
        }
        let (signature, declarations) = list.shader_declarations();
        assert_eq!(signature, list.light_signature());
        assert!(declarations.starts_with("struct UDirectLight\n{\n"));
        assert!(declarations.ends_with(&list.make_shader_block()));
    }
}
