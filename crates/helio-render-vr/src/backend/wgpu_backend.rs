//! wgpu backend
//!
//! The light block lives in a `UNIFORM | COPY_DST` buffer bound together with
//! the shadow atlas and its comparison sampler as one lighting bind group.
//! Light uploads are partial `Queue::write_buffer` calls at the light's float
//! offset. Shadow maps render into single layers of a `Depth32Float` array
//! texture.
//!
//! Geometry is not owned by this crate, so draws are queued together with the
//! resolved pipeline state and bound groups for an external encoder.

use super::{DrawCall, RenderTarget, Renderer, UniformBuffer, UniformBufferDesc};
use crate::camera::Camera;
use crate::config::LightingConfig;
use crate::render_data::{BlendFactor, CompareFunc, CullFace, DrawMode, RenderData, StencilOp};
use crate::scene::Scene;
use crate::shader::{Shader, ShaderManager};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

const SHADOW_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Bind groups to set before the next draw, keyed by group index
type BoundGroups = Arc<Mutex<BTreeMap<u32, Arc<wgpu::BindGroup>>>>;

impl From<CompareFunc> for wgpu::CompareFunction {
    fn from(func: CompareFunc) -> Self {
        match func {
            CompareFunc::Never => Self::Never,
            CompareFunc::Less => Self::Less,
            CompareFunc::Equal => Self::Equal,
            CompareFunc::LessEqual => Self::LessEqual,
            CompareFunc::Greater => Self::Greater,
            CompareFunc::NotEqual => Self::NotEqual,
            CompareFunc::GreaterEqual => Self::GreaterEqual,
            CompareFunc::Always => Self::Always,
        }
    }
}

impl From<StencilOp> for wgpu::StencilOperation {
    fn from(op: StencilOp) -> Self {
        match op {
            StencilOp::Keep => Self::Keep,
            StencilOp::Zero => Self::Zero,
            StencilOp::Replace => Self::Replace,
            StencilOp::IncrementClamp => Self::IncrementClamp,
            StencilOp::DecrementClamp => Self::DecrementClamp,
            StencilOp::Invert => Self::Invert,
            StencilOp::IncrementWrap => Self::IncrementWrap,
            StencilOp::DecrementWrap => Self::DecrementWrap,
        }
    }
}

impl From<BlendFactor> for wgpu::BlendFactor {
    fn from(factor: BlendFactor) -> Self {
        match factor {
            BlendFactor::Zero => Self::Zero,
            BlendFactor::One => Self::One,
            BlendFactor::SrcColor => Self::Src,
            BlendFactor::OneMinusSrcColor => Self::OneMinusSrc,
            BlendFactor::SrcAlpha => Self::SrcAlpha,
            BlendFactor::OneMinusSrcAlpha => Self::OneMinusSrcAlpha,
            BlendFactor::DstColor => Self::Dst,
            BlendFactor::OneMinusDstColor => Self::OneMinusDst,
            BlendFactor::DstAlpha => Self::DstAlpha,
            BlendFactor::OneMinusDstAlpha => Self::OneMinusDstAlpha,
        }
    }
}

impl From<DrawMode> for wgpu::PrimitiveTopology {
    fn from(mode: DrawMode) -> Self {
        match mode {
            DrawMode::Points => Self::PointList,
            DrawMode::Lines => Self::LineList,
            DrawMode::LineStrip => Self::LineStrip,
            DrawMode::Triangles => Self::TriangleList,
            DrawMode::TriangleStrip => Self::TriangleStrip,
        }
    }
}

fn cull_mode(face: CullFace) -> Option<wgpu::Face> {
    match face {
        CullFace::Back => Some(wgpu::Face::Back),
        CullFace::Front => Some(wgpu::Face::Front),
        CullFace::None => None,
    }
}

/// Fixed-function state of one draw, resolved to wgpu types
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineState {
    pub primitive: wgpu::PrimitiveState,
    pub depth_stencil: wgpu::DepthStencilState,
    pub multisample: wgpu::MultisampleState,
    pub blend: Option<wgpu::BlendState>,
}

impl PipelineState {
    pub fn resolve(rd: &RenderData, pass: usize, depth_format: wgpu::TextureFormat) -> Result<Self> {
        let stencil = if rd.stencil().test {
            let s = rd.stencil();
            let face = wgpu::StencilFaceState {
                compare: s.func.into(),
                fail_op: s.fail.into(),
                depth_fail_op: s.depth_fail.into(),
                pass_op: s.pass.into(),
            };
            wgpu::StencilState {
                front: face,
                back: face,
                read_mask: s.func_mask,
                write_mask: s.write_mask,
            }
        } else {
            wgpu::StencilState::default()
        };

        let bias = if rd.offset() {
            wgpu::DepthBiasState {
                constant: rd.offset_units() as i32,
                slope_scale: rd.offset_factor(),
                clamp: 0.0,
            }
        } else {
            wgpu::DepthBiasState::default()
        };

        let blend = rd.alpha_blend().then(|| {
            let (src, dst) = rd.blend_func();
            let component = wgpu::BlendComponent {
                src_factor: src.into(),
                dst_factor: dst.into(),
                operation: wgpu::BlendOperation::Add,
            };
            wgpu::BlendState {
                color: component,
                alpha: component,
            }
        });

        let mask = if rd.invert_coverage_mask() { !0u64 << 1 } else { !0u64 };

        Ok(Self {
            primitive: wgpu::PrimitiveState {
                topology: rd.draw_mode().into(),
                cull_mode: cull_mode(rd.cull_face(pass)?),
                ..Default::default()
            },
            depth_stencil: wgpu::DepthStencilState {
                format: depth_format,
                depth_write_enabled: rd.depth_mask(),
                depth_compare: if rd.depth_test() {
                    wgpu::CompareFunction::LessEqual
                } else {
                    wgpu::CompareFunction::Always
                },
                stencil,
                bias,
            },
            multisample: wgpu::MultisampleState {
                count: 1,
                mask,
                alpha_to_coverage_enabled: rd.alpha_to_coverage(),
            },
            blend,
        })
    }
}

/// A draw waiting for the external encoder
#[derive(Debug)]
pub struct QueuedDraw {
    pub call: DrawCall,
    pub state: PipelineState,
    pub bind_groups: Vec<(u32, Arc<wgpu::BindGroup>)>,
}

/// Shadow casters queued for one atlas layer
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedShadowPass {
    pub layer: u32,
    pub camera: Option<Camera>,
    pub casters: Vec<usize>,
}

/// Uniform buffer in GPU memory
pub struct WgpuUniformBuffer {
    name: String,
    binding: u32,
    capacity_floats: usize,
    buffer: Arc<wgpu::Buffer>,
    bind_group: Arc<wgpu::BindGroup>,
    queue: Arc<wgpu::Queue>,
    bound: BoundGroups,
}

impl WgpuUniformBuffer {
    pub fn buffer(&self) -> &Arc<wgpu::Buffer> {
        &self.buffer
    }
}

impl UniformBuffer for WgpuUniformBuffer {
    fn name(&self) -> &str {
        &self.name
    }

    fn binding(&self) -> u32 {
        self.binding
    }

    fn capacity_floats(&self) -> usize {
        self.capacity_floats
    }

    fn update(&self, _renderer: &dyn Renderer, offset_floats: usize, data: &[f32]) -> Result<()> {
        if offset_floats + data.len() > self.capacity_floats {
            return Err(Error::Backend(format!(
                "write of {} floats at {} overruns '{}' ({} floats)",
                data.len(),
                offset_floats,
                self.name,
                self.capacity_floats
            )));
        }
        let offset = (offset_floats * std::mem::size_of::<f32>()) as wgpu::BufferAddress;
        self.queue
            .write_buffer(&self.buffer, offset, bytemuck::cast_slice(data));
        Ok(())
    }

    fn bind(&self, _renderer: &dyn Renderer, shader: &Shader) -> Result<()> {
        log::trace!("Binding '{}' at group {} for {:?}", self.name, self.binding, shader.id());
        self.bound.lock().insert(self.binding, self.bind_group.clone());
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Renderer backed by a wgpu device
pub struct WgpuRenderer {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    lighting_layout: Arc<wgpu::BindGroupLayout>,
    _shadow_atlas: wgpu::Texture,
    shadow_atlas_view: Arc<wgpu::TextureView>,
    shadow_sampler: Arc<wgpu::Sampler>,
    layer_views: Vec<Arc<wgpu::TextureView>>,
    shadow_camera: Mutex<Option<Camera>>,
    shadow_passes: Mutex<Vec<QueuedShadowPass>>,
    bound: BoundGroups,
    draw_list: Mutex<Vec<QueuedDraw>>,
    depth_format: wgpu::TextureFormat,
}

impl WgpuRenderer {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>, config: &LightingConfig) -> Self {
        let lighting_layout = Arc::new(Self::create_lighting_layout(&device));
        let layers = config.max_shadow_maps.max(1);

        // Shadow atlas: one layer per shadow map
        let atlas = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Shadow Atlas"),
            size: wgpu::Extent3d {
                width: config.shadow_map_size,
                height: config.shadow_map_size,
                depth_or_array_layers: layers,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: SHADOW_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });

        let atlas_view = atlas.create_view(&wgpu::TextureViewDescriptor {
            label: Some("Shadow Atlas View"),
            dimension: Some(wgpu::TextureViewDimension::D2Array),
            ..Default::default()
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Shadow Comparison Sampler"),
            compare: Some(wgpu::CompareFunction::LessEqual),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let layer_views = (0..layers)
            .map(|layer| {
                Arc::new(atlas.create_view(&wgpu::TextureViewDescriptor {
                    label: Some(&format!("Shadow Atlas Layer {layer}")),
                    dimension: Some(wgpu::TextureViewDimension::D2),
                    base_array_layer: layer,
                    array_layer_count: Some(1),
                    ..Default::default()
                }))
            })
            .collect();

        log::info!(
            "wgpu renderer created: {}x{} shadow atlas, {} layers",
            config.shadow_map_size,
            config.shadow_map_size,
            layers
        );

        Self {
            device,
            queue,
            lighting_layout,
            _shadow_atlas: atlas,
            shadow_atlas_view: Arc::new(atlas_view),
            shadow_sampler: Arc::new(sampler),
            layer_views,
            shadow_camera: Mutex::new(None),
            shadow_passes: Mutex::new(Vec::new()),
            bound: Arc::new(Mutex::new(BTreeMap::new())),
            draw_list: Mutex::new(Vec::new()),
            depth_format: SHADOW_FORMAT,
        }
    }

    /// Depth format draws are resolved against
    pub fn with_depth_format(mut self, format: wgpu::TextureFormat) -> Self {
        self.depth_format = format;
        self
    }

    /// Lighting group: light block, shadow atlas, comparison sampler
    fn create_lighting_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Lighting Bind Group Layout"),
            entries: &[
                // Binding 0: Light block uniform buffer
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // Binding 1: Shadow atlas (depth texture array)
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Depth,
                        view_dimension: wgpu::TextureViewDimension::D2Array,
                        multisampled: false,
                    },
                    count: None,
                },
                // Binding 2: Shadow sampler (comparison)
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Comparison),
                    count: None,
                },
            ],
        })
    }

    pub fn lighting_layout(&self) -> &Arc<wgpu::BindGroupLayout> {
        &self.lighting_layout
    }

    pub fn shadow_atlas_view(&self) -> &Arc<wgpu::TextureView> {
        &self.shadow_atlas_view
    }

    /// Take the queued draws, leaving the list empty
    pub fn take_draws(&self) -> Vec<QueuedDraw> {
        std::mem::take(&mut *self.draw_list.lock())
    }

    /// Take the queued shadow passes, leaving the list empty
    pub fn take_shadow_passes(&self) -> Vec<QueuedShadowPass> {
        std::mem::take(&mut *self.shadow_passes.lock())
    }

    fn layer_view(&self, target: &RenderTarget) -> Result<&Arc<wgpu::TextureView>> {
        usize::try_from(target.layer)
            .ok()
            .and_then(|layer| self.layer_views.get(layer))
            .ok_or_else(|| {
                Error::Backend(format!(
                    "'{}' has layer {}, atlas holds {}",
                    target.label,
                    target.layer,
                    self.layer_views.len()
                ))
            })
    }
}

impl Renderer for WgpuRenderer {
    fn name(&self) -> &str {
        "wgpu"
    }

    fn create_uniform_buffer(&self, desc: &UniformBufferDesc) -> Result<Box<dyn UniformBuffer>> {
        let size = (desc.num_floats * std::mem::size_of::<f32>()).div_ceil(16) * 16;
        let limit = self.device.limits().max_uniform_buffer_binding_size as usize;
        if size == 0 || size > limit {
            return Err(Error::ResourceAllocationFailed(format!(
                "'{}' needs {} bytes, uniform limit is {}",
                desc.name, size, limit
            )));
        }

        let buffer = Arc::new(self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(desc.name),
            size: size as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        }));

        let bind_group = Arc::new(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{} Bind Group", desc.name)),
            layout: &self.lighting_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&self.shadow_atlas_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&self.shadow_sampler),
                },
            ],
        }));

        log::info!("Uniform buffer '{}' ({}): {}B", desc.descriptor, desc.name, size);
        Ok(Box::new(WgpuUniformBuffer {
            name: desc.name.to_string(),
            binding: desc.binding,
            capacity_floats: size / std::mem::size_of::<f32>(),
            buffer,
            bind_group,
            queue: self.queue.clone(),
            bound: self.bound.clone(),
        }))
    }

    fn cull_from_camera(&self, _scene: &Scene, camera: &Camera, _shaders: &ShaderManager) -> Result<()> {
        *self.shadow_camera.lock() = Some(*camera);
        Ok(())
    }

    /// Clear the target's atlas layer
    fn begin_render_target(&self, target: &RenderTarget) -> Result<()> {
        let view = self.layer_view(target)?;
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Shadow Clear Encoder"),
        });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(&format!("Shadow Pass Layer {}", target.layer)),
                color_attachments: &[],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn render_render_target(&self, scene: &Scene, target: &RenderTarget, _shaders: &ShaderManager) -> Result<()> {
        self.layer_view(target)?;
        let casters = scene
            .objects()
            .iter()
            .enumerate()
            .filter(|(_, o)| o.render_data().cast_shadows())
            .map(|(i, _)| i)
            .collect();
        self.shadow_passes.lock().push(QueuedShadowPass {
            layer: target.layer as u32,
            camera: self.shadow_camera.lock().take(),
            casters,
        });
        Ok(())
    }

    fn end_render_target(&self, target: &RenderTarget) -> Result<()> {
        log::trace!("Shadow layer {} done", target.layer);
        Ok(())
    }

    fn draw(&self, call: &DrawCall, render_data: &RenderData) -> Result<()> {
        let state = PipelineState::resolve(render_data, call.pass, self.depth_format)?;
        let bind_groups = if call.lit {
            self.bound
                .lock()
                .iter()
                .map(|(group, bg)| (*group, bg.clone()))
                .collect()
        } else {
            Vec::new()
        };
        self.draw_list.lock().push(QueuedDraw {
            call: call.clone(),
            state,
            bind_groups,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_data::{RenderPass, RenderQueue};
    use crate::shader::ShaderId;

    fn render_data() -> RenderData {
        let mut rd = RenderData::new();
        rd.add_pass(RenderPass::new());
        rd.set_shader(0, ShaderId(0), false).unwrap();
        rd
    }

    #[test]
    fn default_state() {
        let state = PipelineState::resolve(&render_data(), 0, SHADOW_FORMAT).unwrap();
        assert_eq!(state.primitive.topology, wgpu::PrimitiveTopology::TriangleList);
        assert_eq!(state.primitive.cull_mode, Some(wgpu::Face::Back));
        assert!(state.depth_stencil.depth_write_enabled);
        assert_eq!(state.depth_stencil.depth_compare, wgpu::CompareFunction::LessEqual);
        assert_eq!(state.depth_stencil.stencil, wgpu::StencilState::default());
        let blend = state.blend.unwrap();
        assert_eq!(blend.color.dst_factor, wgpu::BlendFactor::OneMinusSrcAlpha);
    }

    #[test]
    fn stencil_offset_and_culling() {
        let mut rd = render_data();
        rd.set_stencil_test(true);
        rd.set_stencil_func(CompareFunc::Equal, 1, 0xff);
        rd.set_stencil_op(StencilOp::Keep, StencilOp::Zero, StencilOp::Replace);
        rd.set_stencil_mask(0x0f);
        rd.set_offset(true);
        rd.set_offset_units(2.0);
        rd.set_offset_factor(1.5);
        rd.set_depth_test(false);
        rd.set_alpha_blend(false);
        rd.set_draw_mode(DrawMode::LineStrip);
        rd.pass_mut(0).unwrap().set_cull_face(CullFace::None);
        rd.set_rendering_order(RenderQueue::OVERLAY);

        let state = PipelineState::resolve(&rd, 0, SHADOW_FORMAT).unwrap();
        let stencil = state.depth_stencil.stencil;
        assert_eq!(stencil.front.compare, wgpu::CompareFunction::Equal);
        assert_eq!(stencil.front.pass_op, wgpu::StencilOperation::Replace);
        assert_eq!(stencil.back.depth_fail_op, wgpu::StencilOperation::Zero);
        assert_eq!((stencil.read_mask, stencil.write_mask), (0xff, 0x0f));
        assert_eq!(state.depth_stencil.bias.constant, 2);
        assert_eq!(state.depth_stencil.bias.slope_scale, 1.5);
        assert_eq!(state.depth_stencil.depth_compare, wgpu::CompareFunction::Always);
        assert!(state.blend.is_none());
        assert_eq!(state.primitive.topology, wgpu::PrimitiveTopology::LineStrip);
        assert_eq!(state.primitive.cull_mode, None);

        assert!(PipelineState::resolve(&rd, 3, SHADOW_FORMAT).is_err());
    }

    #[test]
    fn blend_factor_names() {
        assert_eq!(wgpu::BlendFactor::from(BlendFactor::SrcColor), wgpu::BlendFactor::Src);
        assert_eq!(wgpu::BlendFactor::from(BlendFactor::OneMinusDstColor), wgpu::BlendFactor::OneMinusDst);
        assert_eq!(wgpu::CompareFunction::from(CompareFunc::GreaterEqual), wgpu::CompareFunction::GreaterEqual);
    }
}
