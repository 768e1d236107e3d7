//! Backend capabilities consumed by the lighting core
//!
//! The light subsystem never talks to a graphics API directly. It allocates and
//! updates uniform buffers, binds them for draws and drives shadow render
//! targets through these two traits:
//!
//! - [`Renderer`]: allocation, culling, render-target and draw entry points
//! - [`UniformBuffer`]: a GPU-resident block of floats with partial updates
//!
//! [`headless::HeadlessRenderer`] records every call and mirrors uploads in CPU
//! memory. [`wgpu_backend::WgpuRenderer`] drives the modern explicit API.

pub mod headless;
pub mod wgpu_backend;

use crate::camera::Camera;
use crate::render_data::RenderData;
use crate::scene::Scene;
use crate::shader::{Shader, ShaderId, ShaderManager};
use crate::Result;
use std::any::Any;

pub use headless::{HeadlessRenderer, RendererEvent};
pub use wgpu_backend::WgpuRenderer;

/// Parameters for allocating a uniform buffer
#[derive(Debug, Clone, Copy)]
pub struct UniformBufferDesc<'a> {
    /// Descriptor text of a single element, e.g. `"float lightdata"`
    pub descriptor: &'a str,
    /// Binding index used when the buffer is bound to a shader
    pub binding: u32,
    /// Block name in generated shader source
    pub name: &'a str,
    /// Capacity in floats
    pub num_floats: usize,
}

/// GPU-resident uniform buffer
pub trait UniformBuffer: Send + Sync {
    fn name(&self) -> &str;

    fn binding(&self) -> u32;

    /// Capacity in floats
    fn capacity_floats(&self) -> usize;

    /// Upload `data` starting at `offset_floats`
    fn update(&self, renderer: &dyn Renderer, offset_floats: usize, data: &[f32]) -> Result<()>;

    /// Bind the whole buffer to `shader` for the next draw
    fn bind(&self, renderer: &dyn Renderer, shader: &Shader) -> Result<()>;

    fn as_any(&self) -> &dyn Any;
}

/// Offscreen target a shadow map renders into
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderTarget {
    pub label: String,
    pub width: u32,
    pub height: u32,
    /// Layer in the shadow atlas, -1 when unassigned
    pub layer: i32,
}

impl RenderTarget {
    pub fn new(label: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            label: label.into(),
            width,
            height,
            layer: -1,
        }
    }

    pub fn with_layer(&self, layer: i32) -> Self {
        Self {
            layer,
            ..self.clone()
        }
    }
}

/// One draw submitted for a scene object and render pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawCall {
    /// Index of the object in the scene
    pub object: usize,
    pub pass: usize,
    pub shader: ShaderId,
    /// `RenderData::hash_code` at submission time
    pub state_hash: u64,
    pub rendering_order: i32,
    /// Whether the light block was bound for this draw
    pub lit: bool,
}

/// Graphics backend used by the lighting core
pub trait Renderer: Send + Sync {
    fn name(&self) -> &str;

    /// Allocate a uniform buffer. Failure is reported as
    /// `Error::ResourceAllocationFailed` and passed through unchanged.
    fn create_uniform_buffer(&self, desc: &UniformBufferDesc) -> Result<Box<dyn UniformBuffer>>;

    /// Cull scene geometry against `camera` ahead of a render-target pass
    fn cull_from_camera(&self, scene: &Scene, camera: &Camera, shaders: &ShaderManager) -> Result<()>;

    fn begin_render_target(&self, target: &RenderTarget) -> Result<()>;

    /// Render the culled scene into `target`
    fn render_render_target(&self, scene: &Scene, target: &RenderTarget, shaders: &ShaderManager) -> Result<()>;

    fn end_render_target(&self, target: &RenderTarget) -> Result<()>;

    /// Submit one draw of an object's render pass
    fn draw(&self, call: &DrawCall, render_data: &RenderData) -> Result<()>;
}
