//! Light classes - the kinds of light a scene can hold
//!
//! A class names the shader struct lights of that kind are packed into and
//! carries the uniform descriptor every light of the class shares. Classes are
//! looked up by [`LightClassId`]; the name is only used for shader text.

use crate::uniforms::{is_identifier, DataDescriptor, UniformType};
use crate::{Error, Result};
use parking_lot::RwLock;
use std::sync::{Arc, OnceLock};

use UniformType::{Float, Vec3, Vec4};

/// Stable identifier of a light class. Lights are packed in id order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LightClassId(pub u16);

impl LightClassId {
    pub const DIRECTIONAL: Self = Self(0);
    pub const POINT: Self = Self(1);
    pub const SPOT: Self = Self(2);

    /// First id handed out to registered classes
    pub const FIRST_CUSTOM: Self = Self(16);
}

/// A kind of light and its uniform layout
#[derive(Debug)]
pub struct LightClass {
    id: LightClassId,
    name: String,
    descriptor: Arc<DataDescriptor>,
}

impl LightClass {
    pub fn id(&self) -> LightClassId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &Arc<DataDescriptor> {
        &self.descriptor
    }

    /// Struct type used in shader source, e.g. `UPointLight`
    pub fn shader_type_name(&self) -> String {
        format!("U{}", self.name)
    }

    /// Array name inside the light block, e.g. `PointLights`
    pub fn array_name(&self) -> String {
        format!("{}s", self.name)
    }

    pub fn directional() -> Arc<LightClass> {
        builtins()[0].clone()
    }

    pub fn point() -> Arc<LightClass> {
        builtins()[1].clone()
    }

    pub fn spot() -> Arc<LightClass> {
        builtins()[2].clone()
    }
}

const SHADOW_FIELDS: [(UniformType, &str, usize); 5] = [
    (Float, "shadow_map_index", 1),
    (Vec4, "sm0", 1),
    (Vec4, "sm1", 1),
    (Vec4, "sm2", 1),
    (Vec4, "sm3", 1),
];

const INTENSITY_FIELDS: [(UniformType, &str, usize); 3] = [
    (Vec4, "ambient_intensity", 1),
    (Vec4, "diffuse_intensity", 1),
    (Vec4, "specular_intensity", 1),
];

fn builtins() -> &'static [Arc<LightClass>; 3] {
    static BUILTINS: OnceLock<[Arc<LightClass>; 3]> = OnceLock::new();
    BUILTINS.get_or_init(|| {
        let mut direct = vec![(Float, "enabled", 1), (Vec3, "world_direction", 1)];
        direct.extend(INTENSITY_FIELDS);
        direct.extend(SHADOW_FIELDS);

        let mut point = vec![(Float, "enabled", 1), (Vec3, "world_position", 1)];
        point.extend(INTENSITY_FIELDS);
        point.extend([
            (Float, "attenuation_constant", 1),
            (Float, "attenuation_linear", 1),
            (Float, "attenuation_quadratic", 1),
        ]);

        let mut spot = point.clone();
        spot.extend([
            (Vec3, "world_direction", 1),
            (Float, "inner_cone_angle", 1),
            (Float, "outer_cone_angle", 1),
        ]);
        spot.extend(SHADOW_FIELDS);

        let make = |id, name: &str, fields: &[(UniformType, &str, usize)]| {
            Arc::new(LightClass {
                id,
                name: name.to_string(),
                descriptor: Arc::new(DataDescriptor::from_fields(fields)),
            })
        };

        [
            make(LightClassId::DIRECTIONAL, "DirectLight", &direct[..]),
            make(LightClassId::POINT, "PointLight", &point[..]),
            make(LightClassId::SPOT, "SpotLight", &spot[..]),
        ]
    })
}

/// Registry of light classes known to a scene
///
/// Starts with the built-in directional, point and spot classes.
pub struct LightClassRegistry {
    classes: RwLock<Vec<Arc<LightClass>>>,
}

impl LightClassRegistry {
    pub fn new() -> Self {
        Self {
            classes: RwLock::new(builtins().to_vec()),
        }
    }

    /// Register a custom light class
    ///
    /// The name becomes part of shader identifiers, so it must be a valid
    /// identifier and unique within the registry.
    pub fn register(&self, name: &str, descriptor: &str) -> Result<Arc<LightClass>> {
        if !is_identifier(name) {
            return Err(Error::Descriptor(format!("invalid light class name '{}'", name)));
        }
        let descriptor = Arc::new(DataDescriptor::parse(descriptor)?);

        let mut classes = self.classes.write();
        if classes.iter().any(|c| c.name == name) {
            return Err(Error::Descriptor(format!("light class '{}' already registered", name)));
        }
        let next = classes
            .iter()
            .map(|c| c.id.0 + 1)
            .max()
            .unwrap_or(0)
            .max(LightClassId::FIRST_CUSTOM.0);

        let class = Arc::new(LightClass {
            id: LightClassId(next),
            name: name.to_string(),
            descriptor,
        });
        log::debug!("Registered light class '{}' as {:?}", name, class.id);
        classes.push(class.clone());
        Ok(class)
    }

    pub fn get(&self, id: LightClassId) -> Option<Arc<LightClass>> {
        self.classes.read().iter().find(|c| c.id == id).cloned()
    }

    pub fn find(&self, name: &str) -> Option<Arc<LightClass>> {
        self.classes.read().iter().find(|c| c.name == name).cloned()
    }

    pub fn len(&self) -> usize {
        self.classes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.read().is_empty()
    }
}

impl Default for LightClassRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_layouts() {
        let direct = LightClass::directional();
        assert_eq!(direct.name(), "DirectLight");
        assert_eq!(direct.shader_type_name(), "UDirectLight");
        let desc = direct.descriptor();
        assert_eq!(desc.find("world_direction").unwrap().offset, 16);
        assert_eq!(desc.find("shadow_map_index").unwrap().offset, 80);
        assert_eq!(desc.find("sm0").unwrap().offset, 96);
        assert_eq!(desc.total_size(), 160);

        let spot = LightClass::spot();
        assert!(spot.descriptor().find("outer_cone_angle").is_some());
        assert!(spot.descriptor().find("sm3").is_some());
        assert!(LightClass::point().descriptor().find("shadow_map_index").is_none());
    }

    #[test]
    fn register_custom_classes() {
        let registry = LightClassRegistry::new();
        assert_eq!(registry.len(), 3);

        let area = registry.register("AreaLight", "float enabled vec4 color vec2 extent").unwrap();
        assert_eq!(area.id(), LightClassId::FIRST_CUSTOM);
        let tube = registry.register("TubeLight", "float enabled").unwrap();
        assert_eq!(tube.id(), LightClassId(17));

        assert!(registry.register("AreaLight", "float enabled").is_err());
        assert!(registry.register("bad name", "float enabled").is_err());
        assert!(registry.register("Broken", "vec4").is_err());

        assert_eq!(registry.find("AreaLight").unwrap().id(), area.id());
        assert_eq!(registry.get(LightClassId::SPOT).unwrap().name(), "SpotLight");
    }
}
