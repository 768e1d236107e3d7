//! Light-aware shader assembly and caching
//!
//! Lit shaders are the template body prefixed with one struct per light class
//! and the shared light block declaration. Because the block text depends on
//! how many lights of each class exist, shaders are cached per template *and*
//! light signature, and regenerated whenever the light list asks for it.

use crate::lights::LightList;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Identifier of an assembled shader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderId(pub u32);

/// Named shader body that light declarations are prepended to
#[derive(Debug, Clone)]
pub struct ShaderTemplate {
    pub name: String,
    pub body: String,
}

impl ShaderTemplate {
    pub fn new(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: body.into(),
        }
    }
}

/// Assembled shader source
#[derive(Debug)]
pub struct Shader {
    id: ShaderId,
    template: String,
    signature: String,
    source: String,
}

impl Shader {
    pub fn id(&self) -> ShaderId {
        self.id
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Light signature the source was generated for
    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Key for shader cache lookup
#[derive(Hash, Eq, PartialEq, Clone, Debug)]
struct ShaderKey {
    template: String,
    signature: String,
}

#[derive(Default)]
struct ShaderCache {
    by_key: HashMap<ShaderKey, Arc<Shader>>,
    by_id: HashMap<ShaderId, Arc<Shader>>,
    next_id: u32,
}

/// Cache of assembled shaders
#[derive(Default)]
pub struct ShaderManager {
    cache: Mutex<ShaderCache>,
}

impl ShaderManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or assemble the lit variant of `template` for the current lights
    pub fn light_shader(&self, template: &ShaderTemplate, lights: &LightList) -> Result<Arc<Shader>> {
        if template.name.is_empty() || template.body.trim().is_empty() {
            return Err(Error::Shader(format!(
                "template '{}' has no body",
                template.name
            )));
        }

        // Signature and declarations come from one snapshot of the light list
        let (signature, declarations) = lights.shader_declarations();
        let key = ShaderKey {
            template: template.name.clone(),
            signature,
        };
        if let Some(shader) = self.cache.lock().by_key.get(&key) {
            log::trace!("Using cached shader: {:?}", key);
            return Ok(shader.clone());
        }

        let source = format!("{}\n{}", declarations, template.body);

        let mut cache = self.cache.lock();
        if let Some(shader) = cache.by_key.get(&key) {
            return Ok(shader.clone());
        }
        let id = ShaderId(cache.next_id);
        cache.next_id += 1;

        log::info!("Assembled shader {:?} for {:?}", id, key);
        let shader = Arc::new(Shader {
            id,
            template: key.template.clone(),
            signature: key.signature.clone(),
            source,
        });
        cache.by_id.insert(id, shader.clone());
        cache.by_key.insert(key, shader.clone());
        Ok(shader)
    }

    pub fn get(&self, id: ShaderId) -> Option<Arc<Shader>> {
        self.cache.lock().by_id.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.cache.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached shader. Ids are not reused.
    pub fn clear(&self) {
        let mut cache = self.cache.lock();
        cache.by_key.clear();
        cache.by_id.clear();
    }
}
