//! Lighting configuration

/// Default ceiling on the number of lights a scene may hold
pub const DEFAULT_MAX_LIGHTS: usize = 64;
/// Default number of shadow atlas layers
pub const DEFAULT_MAX_SHADOW_MAPS: u32 = 8;
/// Binding index of the shared light uniform block
pub const LIGHT_UBO_INDEX: u32 = 2;
/// Name of the shared light uniform block in generated shaders
pub const LIGHT_BLOCK_NAME: &str = "Lights_ubo";
/// Default shadow atlas layer resolution
pub const DEFAULT_SHADOW_MAP_SIZE: u32 = 1024;

/// Configuration for a scene's light list and the shadow atlas behind it
#[derive(Debug, Clone)]
pub struct LightingConfig {
    /// Total number of lights accepted by `LightList::add_light`
    pub max_lights: usize,
    /// Number of layers in the shadow atlas
    pub max_shadow_maps: u32,
    pub light_ubo_binding: u32,
    pub light_block_name: String,
    /// Width and height of one shadow atlas layer
    pub shadow_map_size: u32,
}

impl Default for LightingConfig {
    fn default() -> Self {
        Self {
            max_lights: DEFAULT_MAX_LIGHTS,
            max_shadow_maps: DEFAULT_MAX_SHADOW_MAPS,
            light_ubo_binding: LIGHT_UBO_INDEX,
            light_block_name: LIGHT_BLOCK_NAME.to_string(),
            shadow_map_size: DEFAULT_SHADOW_MAP_SIZE,
        }
    }
}

impl LightingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_lights(mut self, max: usize) -> Self {
        self.max_lights = max;
        self
    }

    pub fn with_max_shadow_maps(mut self, max: u32) -> Self {
        self.max_shadow_maps = max;
        self
    }

    pub fn with_light_binding(mut self, binding: u32) -> Self {
        self.light_ubo_binding = binding;
        self
    }

    pub fn with_block_name(mut self, name: impl Into<String>) -> Self {
        self.light_block_name = name.into();
        self
    }

    pub fn with_shadow_map_size(mut self, size: u32) -> Self {
        self.shadow_map_size = size;
        self
    }
}
