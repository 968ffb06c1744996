//! Declarative description of shader stages and their interfaces.

use std::fmt;

use crate::gpu::data_type::RenderDataType;

/// Pipeline stage a source belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStageType {
    /// Vertex stage.
    Vertex,
    /// Geometry stage.
    Geometry,
    /// Fragment stage.
    Fragment,
}

impl fmt::Display for ShaderStageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Vertex => "vertex",
            Self::Geometry => "geometry",
            Self::Fragment => "fragment",
        };
        f.write_str(s)
    }
}

/// A declared uniform.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderSpecUniform {
    /// Name in source.
    pub name: String,
    /// Value type.
    pub data_type: RenderDataType,
}

impl ShaderSpecUniform {
    /// Uniform `name` of type `data_type`.
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: RenderDataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// A declared per-vertex attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderSpecAttribute {
    /// Name in source.
    pub name: String,
    /// Element type.
    pub data_type: RenderDataType,
    /// Fixed array multiplicity, 1 to 4.
    pub array_count: u32,
}

impl ShaderSpecAttribute {
    /// Scalar (non-array) attribute.
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: RenderDataType) -> Self {
        Self::array(name, data_type, 1)
    }

    /// Attribute made of `array_count` consecutive elements per vertex.
    #[must_use]
    pub fn array(
        name: impl Into<String>,
        data_type: RenderDataType,
        array_count: u32,
    ) -> Self {
        Self {
            name: name.into(),
            data_type,
            array_count,
        }
    }
}

/// A declared sampled texture.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderSpecTexture {
    /// Sampler name in source.
    pub name: String,
    /// Dimensionality, 1 to 3.
    pub dim: u32,
}

impl ShaderSpecTexture {
    /// Sampler `name` of dimensionality `dim`.
    #[must_use]
    pub fn new(name: impl Into<String>, dim: u32) -> Self {
        Self {
            name: name.into(),
            dim,
        }
    }
}

/// One stage of a program: source text plus its declared interface.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderStageSpecification {
    /// Stage kind.
    pub stage: ShaderStageType,
    /// Source text, possibly containing `${ TAG }$` markers.
    pub src: String,
    /// Declared uniforms.
    pub uniforms: Vec<ShaderSpecUniform>,
    /// Declared attributes.
    pub attributes: Vec<ShaderSpecAttribute>,
    /// Declared textures.
    pub textures: Vec<ShaderSpecTexture>,
}

impl ShaderStageSpecification {
    /// Stage with no declared interface.
    #[must_use]
    pub fn new(stage: ShaderStageType, src: impl Into<String>) -> Self {
        Self {
            stage,
            src: src.into(),
            uniforms: Vec::new(),
            attributes: Vec::new(),
            textures: Vec::new(),
        }
    }

    /// Builder: declare a uniform.
    #[must_use]
    pub fn with_uniform(
        mut self,
        name: impl Into<String>,
        data_type: RenderDataType,
    ) -> Self {
        self.uniforms.push(ShaderSpecUniform::new(name, data_type));
        self
    }

    /// Builder: declare an attribute.
    #[must_use]
    pub fn with_attribute(
        mut self,
        name: impl Into<String>,
        data_type: RenderDataType,
    ) -> Self {
        self.attributes.push(ShaderSpecAttribute::new(name, data_type));
        self
    }

    /// Builder: declare an array attribute.
    #[must_use]
    pub fn with_array_attribute(
        mut self,
        name: impl Into<String>,
        data_type: RenderDataType,
        array_count: u32,
    ) -> Self {
        self.attributes
            .push(ShaderSpecAttribute::array(name, data_type, array_count));
        self
    }

    /// Builder: declare a texture.
    #[must_use]
    pub fn with_texture(mut self, name: impl Into<String>, dim: u32) -> Self {
        self.textures.push(ShaderSpecTexture::new(name, dim));
        self
    }
}
