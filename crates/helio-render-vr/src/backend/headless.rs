//! Headless backend - records every call and mirrors uploads in CPU memory

use super::{DrawCall, RenderTarget, Renderer, UniformBuffer, UniformBufferDesc};
use crate::camera::Camera;
use crate::render_data::RenderData;
use crate::scene::Scene;
use crate::shader::{Shader, ShaderId, ShaderManager};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A call observed by [`HeadlessRenderer`]
#[derive(Debug, Clone, PartialEq)]
pub enum RendererEvent {
    CreateUniformBuffer { name: String, binding: u32, num_floats: usize },
    UpdateUniformBuffer { name: String, offset: usize, len: usize },
    BindUniformBuffer { name: String, binding: u32, shader: ShaderId },
    CullFromCamera { objects: usize },
    BeginRenderTarget { label: String, layer: i32 },
    /// `lights` is the light count seen from inside the shadow pass
    RenderRenderTarget { label: String, layer: i32, casters: usize, lights: usize },
    EndRenderTarget { label: String, layer: i32 },
    Draw(DrawCall),
}

type EventLog = Arc<Mutex<Vec<RendererEvent>>>;

/// Uniform buffer backed by a `Vec<f32>`
pub struct HeadlessUniformBuffer {
    name: String,
    binding: u32,
    data: Arc<Mutex<Vec<f32>>>,
    events: EventLog,
}

impl HeadlessUniformBuffer {
    pub fn floats(&self) -> Vec<f32> {
        self.data.lock().clone()
    }
}

impl UniformBuffer for HeadlessUniformBuffer {
    fn name(&self) -> &str {
        &self.name
    }

    fn binding(&self) -> u32 {
        self.binding
    }

    fn capacity_floats(&self) -> usize {
        self.data.lock().len()
    }

    fn update(&self, _renderer: &dyn Renderer, offset_floats: usize, data: &[f32]) -> Result<()> {
        let mut floats = self.data.lock();
        let end = offset_floats + data.len();
        if end > floats.len() {
            return Err(Error::Backend(format!(
                "write of {} floats at {} overruns '{}' ({} floats)",
                data.len(),
                offset_floats,
                self.name,
                floats.len()
            )));
        }
        floats[offset_floats..end].copy_from_slice(data);
        self.events.lock().push(RendererEvent::UpdateUniformBuffer {
            name: self.name.clone(),
            offset: offset_floats,
            len: data.len(),
        });
        Ok(())
    }

    fn bind(&self, _renderer: &dyn Renderer, shader: &Shader) -> Result<()> {
        self.events.lock().push(RendererEvent::BindUniformBuffer {
            name: self.name.clone(),
            binding: self.binding,
            shader: shader.id(),
        });
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Renderer that performs no GPU work
///
/// Used by tests and tooling to observe what the lighting core asks of a
/// backend.
#[derive(Default)]
pub struct HeadlessRenderer {
    events: EventLog,
    buffers: Mutex<HashMap<String, Arc<Mutex<Vec<f32>>>>>,
    fail_next_allocation: AtomicBool,
}

impl HeadlessRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RendererEvent> {
        self.events.lock().clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    /// Number of uniform buffer uploads recorded
    pub fn upload_count(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, RendererEvent::UpdateUniformBuffer { .. }))
            .count()
    }

    /// Contents of the most recently created buffer named `name`
    pub fn buffer_floats(&self, name: &str) -> Option<Vec<f32>> {
        self.buffers.lock().get(name).map(|data| data.lock().clone())
    }

    /// Make the next `create_uniform_buffer` fail
    pub fn fail_next_allocation(&self) {
        self.fail_next_allocation.store(true, Ordering::Release);
    }

    fn record(&self, event: RendererEvent) {
        self.events.lock().push(event);
    }
}

impl Renderer for HeadlessRenderer {
    fn name(&self) -> &str {
        "headless"
    }

    fn create_uniform_buffer(&self, desc: &UniformBufferDesc) -> Result<Box<dyn UniformBuffer>> {
        if self.fail_next_allocation.swap(false, Ordering::AcqRel) {
            return Err(Error::ResourceAllocationFailed(format!(
                "{} ({} floats)",
                desc.name, desc.num_floats
            )));
        }

        let data = Arc::new(Mutex::new(vec![0.0; desc.num_floats]));
        self.buffers.lock().insert(desc.name.to_string(), data.clone());
        self.record(RendererEvent::CreateUniformBuffer {
            name: desc.name.to_string(),
            binding: desc.binding,
            num_floats: desc.num_floats,
        });

        Ok(Box::new(HeadlessUniformBuffer {
            name: desc.name.to_string(),
            binding: desc.binding,
            data,
            events: self.events.clone(),
        }))
    }

    fn cull_from_camera(&self, scene: &Scene, _camera: &Camera, _shaders: &ShaderManager) -> Result<()> {
        self.record(RendererEvent::CullFromCamera {
            objects: scene.objects().len(),
        });
        Ok(())
    }

    fn begin_render_target(&self, target: &RenderTarget) -> Result<()> {
        self.record(RendererEvent::BeginRenderTarget {
            label: target.label.clone(),
            layer: target.layer,
        });
        Ok(())
    }

    fn render_render_target(&self, scene: &Scene, target: &RenderTarget, _shaders: &ShaderManager) -> Result<()> {
        let casters = scene
            .objects()
            .iter()
            .filter(|o| o.render_data().cast_shadows())
            .count();
        self.record(RendererEvent::RenderRenderTarget {
            label: target.label.clone(),
            layer: target.layer,
            casters,
            lights: scene.lights().light_count(),
        });
        Ok(())
    }

    fn end_render_target(&self, target: &RenderTarget) -> Result<()> {
        self.record(RendererEvent::EndRenderTarget {
            label: target.label.clone(),
            layer: target.layer,
        });
        Ok(())
    }

    fn draw(&self, call: &DrawCall, _render_data: &RenderData) -> Result<()> {
        self.record(RendererEvent::Draw(call.clone()));
        Ok(())
    }
}
