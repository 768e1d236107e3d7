//! Helio Render VR - scene lighting core for the mobile VR renderer
//!
//! This crate owns the part of the renderer that sits between scene mutation
//! and draw submission:
//!
//! - Lights grouped by light class and packed into one shared uniform block
//! - Shader layout text regenerated whenever the light population changes shape
//! - Per-light shadow maps rendered into layers of a shadow atlas every frame
//! - Per-drawable render state (`RenderData`) with a cached pipeline hash
//!
//! Concrete GPU work goes through the [`backend::Renderer`] and
//! [`backend::UniformBuffer`] capabilities. A `wgpu` backend and a headless
//! recording backend are provided.

pub mod backend;
pub mod config;
pub mod lights;
pub mod render_data;
pub mod scene;
pub mod shader;
pub mod shadows;
pub mod uniforms;

mod camera;

pub use backend::{Renderer, UniformBuffer, UniformBufferDesc, RenderTarget};
pub use camera::Camera;
pub use config::LightingConfig;
pub use lights::{Light, LightClass, LightClassId, LightClassRegistry, LightDirty, LightList};
pub use render_data::{RenderData, RenderPass, RenderQueue, CameraDistance};
pub use scene::{FrameStats, Scene, SceneObject};
pub use shader::{Shader, ShaderId, ShaderManager, ShaderTemplate};
pub use shadows::ShadowMap;
pub use uniforms::{DataDescriptor, UniformBlock, UniformType};

/// Result type for renderer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the lighting core
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Descriptor error: {0}")]
    Descriptor(String),

    #[error("Unknown uniform '{0}'")]
    UnknownUniform(String),

    #[error("Uniform '{name}' holds {expected} floats, got {actual}")]
    TypeMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("Resource allocation failed: {0}")]
    ResourceAllocationFailed(String),

    #[error("Shader error: {0}")]
    Shader(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Render pass {index} out of bounds ({count} passes)")]
    RenderPass { index: usize, count: usize },

    #[error("WGPU error: {0}")]
    Wgpu(String),
}

impl From<wgpu::Error> for Error {
    fn from(err: wgpu::Error) -> Self {
        Error::Wgpu(err.to_string())
    }
}
