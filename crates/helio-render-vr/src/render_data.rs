//! Per-drawable render state
//!
//! `RenderData` carries everything a draw needs besides geometry: the list of
//! render passes (shader + material each), the queue it sorts into and the
//! fixed-function pipeline state. A hash of the pipeline-relevant state is
//! cached and recomputed after any setter that changes it.

use crate::shader::ShaderId;
use crate::uniforms::{DataDescriptor, UniformBlock};
use crate::{Error, Result};
use bitflags::bitflags;
use std::cell::Cell;
use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Rendering order buckets. Lower values draw first.
#[derive(Debug, Clone, Copy)]
pub struct RenderQueue;

impl RenderQueue {
    pub const STENCIL: i32 = -1000;
    pub const BACKGROUND: i32 = 1000;
    pub const GEOMETRY: i32 = 2000;
    pub const TRANSPARENT: i32 = 3000;
    pub const OVERLAY: i32 = 4000;
}

bitflags! {
    /// Eyes a drawable is rendered for
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RenderMask: u32 {
        const LEFT = 1 << 0;
        const RIGHT = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareFunc {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StencilOp {
    Keep,
    Zero,
    Replace,
    IncrementClamp,
    DecrementClamp,
    Invert,
    IncrementWrap,
    DecrementWrap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstColor,
    OneMinusDstColor,
    DstAlpha,
    OneMinusDstAlpha,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullFace {
    #[default]
    Back,
    Front,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DrawMode {
    Points,
    Lines,
    LineStrip,
    #[default]
    Triangles,
    TriangleStrip,
}

/// Stencil test configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StencilState {
    pub test: bool,
    pub func: CompareFunc,
    pub reference: u32,
    pub func_mask: u32,
    pub fail: StencilOp,
    pub depth_fail: StencilOp,
    pub pass: StencilOp,
    pub write_mask: u32,
}

impl Default for StencilState {
    fn default() -> Self {
        Self {
            test: false,
            func: CompareFunc::Always,
            reference: 0,
            func_mask: 0,
            fail: StencilOp::Keep,
            depth_fail: StencilOp::Keep,
            pass: StencilOp::Keep,
            write_mask: 0,
        }
    }
}

/// Camera distance used for sorting, computed at most once per frame
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum CameraDistance {
    #[default]
    Pending,
    Resolved(f32),
}

impl CameraDistance {
    /// Resolve with `compute` if still pending and return the distance
    pub fn resolve(&mut self, compute: impl FnOnce() -> f32) -> f32 {
        match *self {
            Self::Resolved(d) => d,
            Self::Pending => {
                let d = compute();
                *self = Self::Resolved(d);
                d
            }
        }
    }

    pub fn get(&self) -> Option<f32> {
        match *self {
            Self::Resolved(d) => Some(d),
            Self::Pending => None,
        }
    }
}

/// One shader + material configuration of a drawable
#[derive(Debug, Clone)]
pub struct RenderPass {
    material: UniformBlock,
    shader: Option<ShaderId>,
    multiview_shader: Option<ShaderId>,
    cull_face: CullFace,
}

impl RenderPass {
    pub fn new() -> Self {
        Self::with_material(UniformBlock::new(Arc::new(DataDescriptor::default())))
    }

    pub fn with_material(material: UniformBlock) -> Self {
        Self {
            material,
            shader: None,
            multiview_shader: None,
            cull_face: CullFace::default(),
        }
    }

    pub fn material(&self) -> &UniformBlock {
        &self.material
    }

    pub fn material_mut(&mut self) -> &mut UniformBlock {
        &mut self.material
    }

    pub fn shader(&self, multiview: bool) -> Option<ShaderId> {
        if multiview {
            self.multiview_shader
        } else {
            self.shader
        }
    }

    pub fn set_shader(&mut self, id: ShaderId, multiview: bool) {
        if multiview {
            self.multiview_shader = Some(id);
        } else {
            self.shader = Some(id);
        }
    }

    pub fn cull_face(&self) -> CullFace {
        self.cull_face
    }

    pub fn set_cull_face(&mut self, cull_face: CullFace) {
        self.cull_face = cull_face;
    }
}

impl Default for RenderPass {
    fn default() -> Self {
        Self::new()
    }
}

/// Render configuration of one drawable
#[derive(Debug, Clone)]
pub struct RenderData {
    passes: Vec<RenderPass>,
    rendering_order: i32,
    render_mask: RenderMask,
    use_light: bool,
    use_lightmap: bool,
    batching: bool,
    cast_shadows: bool,
    offset: bool,
    offset_factor: f32,
    offset_units: f32,
    depth_test: bool,
    depth_mask: bool,
    alpha_blend: bool,
    source_blend: BlendFactor,
    dest_blend: BlendFactor,
    alpha_to_coverage: bool,
    sample_coverage: f32,
    invert_coverage_mask: bool,
    stencil: StencilState,
    draw_mode: DrawMode,
    camera_distance: CameraDistance,
    dirty: bool,
    hash_code: Cell<Option<u64>>,
}

impl Default for RenderData {
    fn default() -> Self {
        Self {
            passes: Vec::new(),
            rendering_order: RenderQueue::GEOMETRY,
            render_mask: RenderMask::LEFT | RenderMask::RIGHT,
            use_light: false,
            use_lightmap: false,
            batching: true,
            cast_shadows: true,
            offset: false,
            offset_factor: 0.0,
            offset_units: 0.0,
            depth_test: true,
            depth_mask: true,
            alpha_blend: true,
            source_blend: BlendFactor::One,
            dest_blend: BlendFactor::OneMinusSrcAlpha,
            alpha_to_coverage: false,
            sample_coverage: 1.0,
            invert_coverage_mask: false,
            stencil: StencilState::default(),
            draw_mode: DrawMode::default(),
            camera_distance: CameraDistance::default(),
            dirty: false,
            hash_code: Cell::new(None),
        }
    }
}

impl RenderData {
    pub fn new() -> Self {
        Self::default()
    }

    fn invalidate_hash(&mut self) {
        self.hash_code.set(None);
    }

    /// Hash of the pipeline-relevant state, recomputed after any change
    pub fn hash_code(&self) -> u64 {
        if let Some(hash) = self.hash_code.get() {
            return hash;
        }
        let mut h = DefaultHasher::new();
        self.use_light.hash(&mut h);
        self.use_lightmap.hash(&mut h);
        self.render_mask.hash(&mut h);
        self.offset.hash(&mut h);
        self.offset_factor.to_bits().hash(&mut h);
        self.offset_units.to_bits().hash(&mut h);
        self.depth_test.hash(&mut h);
        self.depth_mask.hash(&mut h);
        self.alpha_blend.hash(&mut h);
        self.source_blend.hash(&mut h);
        self.dest_blend.hash(&mut h);
        self.alpha_to_coverage.hash(&mut h);
        self.sample_coverage.to_bits().hash(&mut h);
        self.invert_coverage_mask.hash(&mut h);
        self.stencil.hash(&mut h);
        self.draw_mode.hash(&mut h);
        for pass in &self.passes {
            pass.shader.hash(&mut h);
            pass.multiview_shader.hash(&mut h);
            pass.cull_face.hash(&mut h);
        }
        let hash = h.finish();
        self.hash_code.set(Some(hash));
        hash
    }

    pub fn is_hash_code_dirty(&self) -> bool {
        self.hash_code.get().is_none()
    }

    // Passes

    pub fn add_pass(&mut self, pass: RenderPass) {
        self.passes.push(pass);
        self.invalidate_hash();
    }

    pub fn remove_pass(&mut self, index: usize) -> Result<RenderPass> {
        self.check_pass(index)?;
        self.invalidate_hash();
        Ok(self.passes.remove(index))
    }

    fn check_pass(&self, index: usize) -> Result<()> {
        if index < self.passes.len() {
            Ok(())
        } else {
            Err(Error::RenderPass {
                index,
                count: self.passes.len(),
            })
        }
    }

    pub fn pass(&self, index: usize) -> Result<&RenderPass> {
        self.check_pass(index)?;
        Ok(&self.passes[index])
    }

    /// Mutable pass access. The state hash is recomputed on next use.
    pub fn pass_mut(&mut self, index: usize) -> Result<&mut RenderPass> {
        self.check_pass(index)?;
        self.invalidate_hash();
        Ok(&mut self.passes[index])
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub fn passes(&self) -> &[RenderPass] {
        &self.passes
    }

    pub fn material(&self, pass: usize) -> Result<&UniformBlock> {
        Ok(self.pass(pass)?.material())
    }

    pub fn shader(&self, pass: usize, multiview: bool) -> Result<Option<ShaderId>> {
        Ok(self.pass(pass)?.shader(multiview))
    }

    pub fn set_shader(&mut self, pass: usize, id: ShaderId, multiview: bool) -> Result<()> {
        log::debug!("Pass {} shader -> {:?} (multiview: {})", pass, id, multiview);
        self.pass_mut(pass)?.set_shader(id, multiview);
        Ok(())
    }

    pub fn cull_face(&self, pass: usize) -> Result<CullFace> {
        Ok(self.pass(pass)?.cull_face())
    }

    // Ordering

    pub fn rendering_order(&self) -> i32 {
        self.rendering_order
    }

    pub fn set_rendering_order(&mut self, order: i32) {
        self.rendering_order = order;
    }

    /// Move geometry with alpha into the transparent queue. Never demotes, and
    /// custom orders are left alone.
    pub fn adjust_rendering_order_for_transparency(&mut self, has_alpha: bool) {
        if has_alpha && self.rendering_order == RenderQueue::GEOMETRY {
            self.rendering_order = RenderQueue::TRANSPARENT;
        }
    }

    pub fn camera_distance(&self) -> CameraDistance {
        self.camera_distance
    }

    /// Resolve the camera distance for this frame, computing it at most once
    pub fn resolve_camera_distance(&mut self, compute: impl FnOnce() -> f32) -> f32 {
        self.camera_distance.resolve(compute)
    }

    /// Forget the distance so the next frame recomputes it
    pub fn invalidate_camera_distance(&mut self) {
        self.camera_distance = CameraDistance::Pending;
    }

    // Flags

    pub fn light_enabled(&self) -> bool {
        self.use_light
    }

    pub fn set_light_enabled(&mut self, enabled: bool) {
        self.use_light = enabled;
        self.invalidate_hash();
    }

    pub fn lightmap_enabled(&self) -> bool {
        self.use_lightmap
    }

    pub fn set_lightmap_enabled(&mut self, enabled: bool) {
        self.use_lightmap = enabled;
        self.invalidate_hash();
    }

    pub fn render_mask(&self) -> RenderMask {
        self.render_mask
    }

    pub fn set_render_mask(&mut self, mask: RenderMask) {
        self.render_mask = mask;
        self.invalidate_hash();
    }

    pub fn cast_shadows(&self) -> bool {
        self.cast_shadows
    }

    pub fn set_cast_shadows(&mut self, cast: bool) {
        self.cast_shadows = cast;
    }

    pub fn batching(&self) -> bool {
        self.batching
    }

    pub fn set_batching(&mut self, batching: bool) {
        self.batching = batching;
    }

    pub fn offset(&self) -> bool {
        self.offset
    }

    pub fn set_offset(&mut self, offset: bool) {
        self.offset = offset;
        self.invalidate_hash();
    }

    pub fn offset_factor(&self) -> f32 {
        self.offset_factor
    }

    pub fn set_offset_factor(&mut self, factor: f32) {
        self.offset_factor = factor;
        self.invalidate_hash();
    }

    pub fn offset_units(&self) -> f32 {
        self.offset_units
    }

    pub fn set_offset_units(&mut self, units: f32) {
        self.offset_units = units;
        self.invalidate_hash();
    }

    pub fn depth_test(&self) -> bool {
        self.depth_test
    }

    pub fn set_depth_test(&mut self, test: bool) {
        self.depth_test = test;
        self.invalidate_hash();
    }

    pub fn depth_mask(&self) -> bool {
        self.depth_mask
    }

    pub fn set_depth_mask(&mut self, mask: bool) {
        self.depth_mask = mask;
        self.invalidate_hash();
    }

    pub fn alpha_blend(&self) -> bool {
        self.alpha_blend
    }

    pub fn set_alpha_blend(&mut self, blend: bool) {
        self.alpha_blend = blend;
        self.invalidate_hash();
    }

    pub fn blend_func(&self) -> (BlendFactor, BlendFactor) {
        (self.source_blend, self.dest_blend)
    }

    pub fn set_blend_func(&mut self, source: BlendFactor, dest: BlendFactor) {
        self.source_blend = source;
        self.dest_blend = dest;
        self.invalidate_hash();
    }

    pub fn alpha_to_coverage(&self) -> bool {
        self.alpha_to_coverage
    }

    pub fn set_alpha_to_coverage(&mut self, enabled: bool) {
        self.alpha_to_coverage = enabled;
        self.invalidate_hash();
    }

    pub fn sample_coverage(&self) -> f32 {
        self.sample_coverage
    }

    pub fn set_sample_coverage(&mut self, coverage: f32) {
        self.sample_coverage = coverage;
        self.invalidate_hash();
    }

    pub fn invert_coverage_mask(&self) -> bool {
        self.invert_coverage_mask
    }

    pub fn set_invert_coverage_mask(&mut self, invert: bool) {
        self.invert_coverage_mask = invert;
        self.invalidate_hash();
    }

    pub fn stencil(&self) -> &StencilState {
        &self.stencil
    }

    pub fn set_stencil_test(&mut self, test: bool) {
        self.stencil.test = test;
        self.invalidate_hash();
    }

    pub fn set_stencil_func(&mut self, func: CompareFunc, reference: u32, mask: u32) {
        self.stencil.func = func;
        self.stencil.reference = reference;
        self.stencil.func_mask = mask;
        self.invalidate_hash();
    }

    pub fn set_stencil_op(&mut self, fail: StencilOp, depth_fail: StencilOp, pass: StencilOp) {
        self.stencil.fail = fail;
        self.stencil.depth_fail = depth_fail;
        self.stencil.pass = pass;
        self.invalidate_hash();
    }

    pub fn set_stencil_mask(&mut self, mask: u32) {
        self.stencil.write_mask = mask;
        self.invalidate_hash();
    }

    pub fn draw_mode(&self) -> DrawMode {
        self.draw_mode
    }

    pub fn set_draw_mode(&mut self, mode: DrawMode) {
        self.draw_mode = mode;
        self.invalidate_hash();
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }
}

/// Draw order: rendering order, then pass-0 shader, then camera distance
/// (back to front from the transparent queue on, front to back below it).
/// Unresolved distances sort as 0.
pub fn compare_for_draw(a: &RenderData, b: &RenderData) -> Ordering {
    a.rendering_order
        .cmp(&b.rendering_order)
        .then_with(|| {
            let shader = |r: &RenderData| r.passes.first().and_then(|p| p.shader);
            shader(a).cmp(&shader(b))
        })
        .then_with(|| {
            let da = a.camera_distance.get().unwrap_or(0.0);
            let db = b.camera_distance.get().unwrap_or(0.0);
            if a.rendering_order >= RenderQueue::TRANSPARENT {
                db.total_cmp(&da)
            } else {
                da.total_cmp(&db)
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_shader(id: u32) -> RenderData {
        let mut rd = RenderData::new();
        rd.add_pass(RenderPass::new());
        rd.set_shader(0, ShaderId(id), false).unwrap();
        rd
    }

    #[test]
    fn hash_follows_state_changes() {
        let mut rd = with_shader(1);
        let first = rd.hash_code();
        assert!(!rd.is_hash_code_dirty());
        assert_eq!(rd.hash_code(), first);

        rd.set_rendering_order(RenderQueue::OVERLAY);
        rd.set_cast_shadows(false);
        assert_eq!(rd.hash_code(), first, "order and shadows are not pipeline state");

        rd.set_depth_mask(false);
        assert!(rd.is_hash_code_dirty());
        let second = rd.hash_code();
        assert_ne!(second, first);

        rd.set_depth_mask(true);
        assert_eq!(rd.hash_code(), first);

        rd.pass_mut(0).unwrap().set_cull_face(CullFace::None);
        assert_ne!(rd.hash_code(), first);
        assert_eq!(rd.cull_face(0).unwrap(), CullFace::None);
    }

    #[test]
    fn pass_access_is_bounds_checked() {
        let mut rd = with_shader(3);
        assert!(matches!(rd.pass(1), Err(Error::RenderPass { index: 1, count: 1 })));
        assert!(rd.set_shader(2, ShaderId(1), true).is_err());
        assert!(rd.remove_pass(0).is_ok());
        assert_eq!(rd.pass_count(), 0);
        assert!(rd.material(0).is_err());
    }

    #[test]
    fn transparency_only_promotes_geometry() {
        let mut rd = RenderData::new();
        rd.adjust_rendering_order_for_transparency(false);
        assert_eq!(rd.rendering_order(), RenderQueue::GEOMETRY);
        rd.adjust_rendering_order_for_transparency(true);
        assert_eq!(rd.rendering_order(), RenderQueue::TRANSPARENT);
        rd.adjust_rendering_order_for_transparency(false);
        assert_eq!(rd.rendering_order(), RenderQueue::TRANSPARENT);

        let mut overlay = RenderData::new();
        overlay.set_rendering_order(RenderQueue::OVERLAY);
        overlay.adjust_rendering_order_for_transparency(true);
        assert_eq!(overlay.rendering_order(), RenderQueue::OVERLAY);
    }

    #[test]
    fn camera_distance_resolves_once() {
        let mut rd = RenderData::new();
        assert_eq!(rd.camera_distance(), CameraDistance::Pending);
        let mut calls = 0;
        assert_eq!(rd.resolve_camera_distance(|| { calls += 1; 4.0 }), 4.0);
        assert_eq!(rd.resolve_camera_distance(|| { calls += 1; 9.0 }), 4.0);
        assert_eq!(calls, 1);
        rd.invalidate_camera_distance();
        assert_eq!(rd.camera_distance().get(), None);
    }

    #[test]
    fn draw_order() {
        let mut near = with_shader(2);
        near.resolve_camera_distance(|| 1.0);
        let mut far = with_shader(2);
        far.resolve_camera_distance(|| 10.0);
        let other_shader = with_shader(1);
        let mut background = with_shader(5);
        background.set_rendering_order(RenderQueue::BACKGROUND);

        assert_eq!(compare_for_draw(&background, &other_shader), Ordering::Less);
        assert_eq!(compare_for_draw(&other_shader, &near), Ordering::Less);
        assert_eq!(compare_for_draw(&near, &far), Ordering::Less);

        near.adjust_rendering_order_for_transparency(true);
        far.adjust_rendering_order_for_transparency(true);
        assert_eq!(compare_for_draw(&far, &near), Ordering::Less, "back to front");
    }
}
