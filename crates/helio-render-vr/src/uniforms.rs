//! Uniform descriptors and CPU-side uniform blocks
//!
//! A descriptor is a whitespace separated list of `type name` pairs, e.g.
//! `"vec4 diffuse_intensity float shadow_map_index vec4 sm[4]"`. Fields are laid
//! out with std140 rules so the floats of a [`UniformBlock`] can be copied into a
//! GPU uniform buffer without repacking.

use crate::{Error, Result};
use std::fmt::Write as _;
use std::sync::Arc;

/// std140 base alignment of array elements and structs
const VEC4_ALIGN: usize = 16;

/// Shader-visible type of a uniform field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformType {
    Float,
    Int,
    Vec2,
    Vec3,
    Vec4,
    IVec2,
    IVec3,
    IVec4,
    Mat3,
    Mat4,
}

impl UniformType {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "float" => Self::Float,
            "int" => Self::Int,
            "vec2" | "float2" => Self::Vec2,
            "vec3" | "float3" => Self::Vec3,
            "vec4" | "float4" => Self::Vec4,
            "ivec2" | "int2" => Self::IVec2,
            "ivec3" | "int3" => Self::IVec3,
            "ivec4" | "int4" => Self::IVec4,
            "mat3" => Self::Mat3,
            "mat4" => Self::Mat4,
            _ => return None,
        })
    }

    /// GLSL spelling used in generated shader source
    pub fn glsl_name(self) -> &'static str {
        match self {
            Self::Float => "float",
            Self::Int => "int",
            Self::Vec2 => "vec2",
            Self::Vec3 => "vec3",
            Self::Vec4 => "vec4",
            Self::IVec2 => "ivec2",
            Self::IVec3 => "ivec3",
            Self::IVec4 => "ivec4",
            Self::Mat3 => "mat3",
            Self::Mat4 => "mat4",
        }
    }

    /// Size in bytes of one element (matrix columns padded to vec4)
    pub fn size(self) -> usize {
        match self {
            Self::Float | Self::Int => 4,
            Self::Vec2 | Self::IVec2 => 8,
            Self::Vec3 | Self::IVec3 => 12,
            Self::Vec4 | Self::IVec4 => 16,
            Self::Mat3 => 48,
            Self::Mat4 => 64,
        }
    }

    pub fn alignment(self) -> usize {
        match self {
            Self::Float | Self::Int => 4,
            Self::Vec2 | Self::IVec2 => 8,
            _ => VEC4_ALIGN,
        }
    }

    /// Number of components a caller writes for one element
    pub fn components(self) -> usize {
        match self {
            Self::Float | Self::Int => 1,
            Self::Vec2 | Self::IVec2 => 2,
            Self::Vec3 | Self::IVec3 => 3,
            Self::Vec4 | Self::IVec4 => 4,
            Self::Mat3 => 12,
            Self::Mat4 => 16,
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(self, Self::Int | Self::IVec2 | Self::IVec3 | Self::IVec4)
    }
}

/// One field of a descriptor with its resolved std140 placement
#[derive(Debug, Clone, PartialEq)]
pub struct DataEntry {
    pub name: String,
    pub ty: UniformType,
    /// Array length, 1 for plain fields
    pub count: usize,
    /// Byte offset within the block
    pub offset: usize,
    /// Byte size including array stride padding
    pub size: usize,
}

impl DataEntry {
    pub fn float_offset(&self) -> usize {
        self.offset / 4
    }

    pub fn float_count(&self) -> usize {
        self.size / 4
    }

    /// Shader declaration for this field, e.g. `vec4 sm[4];`
    pub fn declaration(&self) -> String {
        if self.count > 1 {
            format!("{} {}[{}];", self.ty.glsl_name(), self.name, self.count)
        } else {
            format!("{} {};", self.ty.glsl_name(), self.name)
        }
    }
}

/// Parsed uniform descriptor with std140 layout
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataDescriptor {
    entries: Vec<DataEntry>,
    total_size: usize,
}

fn round_up(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}

pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl DataDescriptor {
    /// Parse a descriptor string and compute the std140 layout
    pub fn parse(desc: &str) -> Result<Self> {
        let tokens: Vec<&str> = desc
            .split(|c: char| c.is_whitespace() || c == ';' || c == ',')
            .filter(|t| !t.is_empty())
            .collect();

        if tokens.len() % 2 != 0 {
            return Err(Error::Descriptor(format!(
                "'{}' has a type without a field name",
                desc.trim()
            )));
        }

        let mut fields: Vec<(UniformType, &str, usize)> = Vec::with_capacity(tokens.len() / 2);
        for pair in tokens.chunks(2) {
            let ty = UniformType::parse(pair[0])
                .ok_or_else(|| Error::Descriptor(format!("unknown uniform type '{}'", pair[0])))?;
            let (name, count) = Self::split_array(pair[1])?;

            if fields.iter().any(|(_, n, _)| *n == name) {
                return Err(Error::Descriptor(format!("duplicate uniform '{}'", name)));
            }
            fields.push((ty, name, count));
        }

        Ok(Self::from_fields(&fields))
    }

    /// Lay out already validated fields
    pub(crate) fn from_fields(fields: &[(UniformType, &str, usize)]) -> Self {
        let mut entries = Vec::with_capacity(fields.len());
        let mut offset = 0usize;

        for &(ty, name, count) in fields {
            let (align, size) = if count > 1 {
                let stride = round_up(ty.size(), VEC4_ALIGN);
                (VEC4_ALIGN, stride * count)
            } else {
                (ty.alignment(), ty.size())
            };

            offset = round_up(offset, align);
            entries.push(DataEntry {
                name: name.to_string(),
                ty,
                count,
                offset,
                size,
            });
            offset += size;
        }

        Self {
            entries,
            total_size: round_up(offset, VEC4_ALIGN),
        }
    }

    fn split_array(token: &str) -> Result<(&str, usize)> {
        let Some(open) = token.find('[') else {
            if !is_identifier(token) {
                return Err(Error::Descriptor(format!("invalid uniform name '{}'", token)));
            }
            return Ok((token, 1));
        };
        let name = &token[..open];
        let count = token[open + 1..]
            .strip_suffix(']')
            .and_then(|n| n.parse::<usize>().ok())
            .filter(|&n| n > 0)
            .ok_or_else(|| Error::Descriptor(format!("invalid array size in '{}'", token)))?;
        if !is_identifier(name) {
            return Err(Error::Descriptor(format!("invalid uniform name '{}'", name)));
        }
        Ok((name, count))
    }

    pub fn entries(&self) -> &[DataEntry] {
        &self.entries
    }

    pub fn find(&self, name: &str) -> Option<&DataEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Total size in bytes, a multiple of 16
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn total_floats(&self) -> usize {
        self.total_size / 4
    }

    pub fn for_each_uniform(&self, mut f: impl FnMut(&DataEntry)) {
        for entry in &self.entries {
            f(entry);
        }
    }
}

/// CPU-side storage for the fields of one descriptor
///
/// Setters only dirty the block when a value actually changes, so a light whose
/// parameters are rewritten with identical values is not re-uploaded.
#[derive(Debug, Clone)]
pub struct UniformBlock {
    descriptor: Arc<DataDescriptor>,
    data: Vec<f32>,
    dirty: bool,
}

impl UniformBlock {
    /// A new block is zero filled and dirty (it has never been uploaded)
    pub fn new(descriptor: Arc<DataDescriptor>) -> Self {
        let data = vec![0.0; descriptor.total_floats()];
        Self {
            descriptor,
            data,
            dirty: true,
        }
    }

    pub fn from_desc(desc: &str) -> Result<Self> {
        Ok(Self::new(Arc::new(DataDescriptor::parse(desc)?)))
    }

    pub fn descriptor(&self) -> &Arc<DataDescriptor> {
        &self.descriptor
    }

    pub fn has_uniform(&self, name: &str) -> bool {
        self.descriptor.find(name).is_some()
    }

    fn entry(&self, name: &str) -> Result<&DataEntry> {
        self.descriptor
            .find(name)
            .ok_or_else(|| Error::UnknownUniform(name.to_string()))
    }

    fn write(&mut self, name: &str, values: &[f32]) -> Result<()> {
        let entry = self.entry(name)?;
        let start = entry.float_offset();
        let end = start + values.len();
        if values.len() > entry.float_count() {
            return Err(Error::TypeMismatch {
                name: name.to_string(),
                expected: entry.float_count(),
                actual: values.len(),
            });
        }
        let slot = &mut self.data[start..end];
        if slot.iter().zip(values).any(|(a, b)| a.to_bits() != b.to_bits()) {
            slot.copy_from_slice(values);
            self.dirty = true;
        }
        Ok(())
    }

    fn write_typed(&mut self, name: &str, values: &[f32], components: usize) -> Result<()> {
        let entry = self.entry(name)?;
        if entry.ty.components() != components || entry.count != 1 {
            return Err(Error::TypeMismatch {
                name: name.to_string(),
                expected: entry.ty.components() * entry.count,
                actual: components,
            });
        }
        self.write(name, values)
    }

    fn read(&self, name: &str, components: usize) -> Result<&[f32]> {
        let entry = self.entry(name)?;
        if entry.ty.components() != components {
            return Err(Error::TypeMismatch {
                name: name.to_string(),
                expected: entry.ty.components(),
                actual: components,
            });
        }
        let start = entry.float_offset();
        Ok(&self.data[start..start + components])
    }

    pub fn set_float(&mut self, name: &str, value: f32) -> Result<()> {
        self.write_typed(name, &[value], 1)
    }

    pub fn get_float(&self, name: &str) -> Result<f32> {
        Ok(self.read(name, 1)?[0])
    }

    /// Integers are stored bit-for-bit in the float slot
    pub fn set_int(&mut self, name: &str, value: i32) -> Result<()> {
        self.write_typed(name, &[f32::from_bits(value as u32)], 1)
    }

    pub fn get_int(&self, name: &str) -> Result<i32> {
        Ok(self.read(name, 1)?[0].to_bits() as i32)
    }

    pub fn set_vec2(&mut self, name: &str, value: [f32; 2]) -> Result<()> {
        self.write_typed(name, &value, 2)
    }

    pub fn set_vec3(&mut self, name: &str, value: [f32; 3]) -> Result<()> {
        self.write_typed(name, &value, 3)
    }

    pub fn get_vec3(&self, name: &str) -> Result<[f32; 3]> {
        let v = self.read(name, 3)?;
        Ok([v[0], v[1], v[2]])
    }

    pub fn set_vec4(&mut self, name: &str, value: [f32; 4]) -> Result<()> {
        self.write_typed(name, &value, 4)
    }

    pub fn get_vec4(&self, name: &str) -> Result<[f32; 4]> {
        let v = self.read(name, 4)?;
        Ok([v[0], v[1], v[2], v[3]])
    }

    pub fn set_mat4(&mut self, name: &str, value: &glam::Mat4) -> Result<()> {
        self.write_typed(name, &value.to_cols_array(), 16)
    }

    /// Raw write in stored layout (array strides and matrix padding included)
    pub fn set_floats(&mut self, name: &str, values: &[f32]) -> Result<()> {
        self.write(name, values)
    }

    pub fn as_floats(&self) -> &[f32] {
        &self.data
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }

    /// Size in bytes
    pub fn total_size(&self) -> usize {
        self.descriptor.total_size()
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

    /// Debug dump, one field per line
    pub fn dump_floats(&self) -> String {
        let mut out = String::new();
        for entry in self.descriptor.entries() {
            let start = entry.float_offset();
            let values = &self.data[start..start + entry.float_count()];
            let _ = writeln!(out, "{} @{}: {:?}", entry.name, entry.offset, values);
        }
        out
    }
}
