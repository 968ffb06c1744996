//! Per-owner program instances.
//!
//! A [`ShaderProgram`] wraps a shared [`CompiledProgram`] with everything
//! one drawable owns: attribute buffers, uniform values, texture bindings,
//! an optional index buffer and instancing parameters. Setting a name the
//! program declares but the linker dropped is a silent no-op, so callers
//! can feed every declared input without tracking what survived.
//!
//! Uniform values live on the instance and are uploaded at draw time;
//! instances sharing one compiled program never see each other's values.

use std::rc::Rc;

use super::compiled::{CompiledProgram, ProgramAttribute};
use super::draw_mode::DrawMode;
use crate::device::{AttribLayout, BufferTarget, TexelData, VertexArrayId};
use crate::error::{NameKind, RenderError};
use crate::gpu::data_type::{
    type_label, BufferElement, RenderDataType, UniformValue,
};
use crate::gpu::{
    AttributeBuffer, Colormap, FilterMode, RenderContext, TextureBuffer,
    TextureFormat,
};

/// Index value that restarts a strip when primitive restart is on.
pub const DEFAULT_RESTART_INDEX: u32 = u32::MAX;

/// Sampling policy for textures created from raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextureOptions {
    /// RGBA input instead of RGB.
    pub with_alpha: bool,
    /// Build a mip chain and sample it trilinearly.
    pub use_mipmap: bool,
    /// Tile instead of clamping to edge.
    pub repeat: bool,
}

#[derive(Debug)]
enum TextureBinding {
    /// Shared with other owners; may be re-bound.
    External(Rc<TextureBuffer>),
    /// Created by this instance.
    Owned(Rc<TextureBuffer>),
}

impl TextureBinding {
    fn texture(&self) -> &Rc<TextureBuffer> {
        match self {
            Self::External(t) | Self::Owned(t) => t,
        }
    }
}

#[derive(Debug)]
struct IndexBinding {
    buffer: Rc<AttributeBuffer>,
    multiplicity: usize,
}

/// Bindings and draw parameters of one drawable.
#[derive(Debug)]
pub struct ShaderProgram {
    program: Rc<CompiledProgram>,
    vao: VertexArrayId,
    attributes: Vec<Option<Rc<AttributeBuffer>>>,
    external_attributes: Vec<bool>,
    uniforms: Vec<Option<UniformValue>>,
    textures: Vec<Option<TextureBinding>>,
    index: Option<IndexBinding>,
    instance_count: Option<u32>,
    restart_index: u32,
    draw_length: usize,
}

fn unknown(kind: NameKind, name: &str) -> RenderError {
    RenderError::UnknownName {
        kind,
        name: name.to_owned(),
    }
}

fn check_attribute_type(
    attr: &ProgramAttribute,
    data_type: RenderDataType,
    array_count: u32,
) -> Result<(), RenderError> {
    if attr.data_type == RenderDataType::Matrix44Float {
        return Err(RenderError::NotImplemented(format!(
            "matrix-typed attribute {}",
            attr.name
        )));
    }
    let compatible =
        RenderDataType::count_compatibility(attr.data_type, data_type).is_some();
    if !compatible || array_count != attr.array_count {
        return Err(RenderError::TypeMismatch(format!(
            "attribute {} is {} but data is {}",
            attr.name,
            type_label(attr.data_type, attr.array_count),
            type_label(data_type, array_count)
        )));
    }
    Ok(())
}

impl ShaderProgram {
    /// Fresh instance with nothing bound.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Allocation`] if the device cannot create a
    /// vertex array.
    pub fn new(program: Rc<CompiledProgram>) -> Result<Self, RenderError> {
        let vao = program.context().device().create_vertex_array()?;
        let n_attributes = program.attributes().len();
        let n_uniforms = program.uniforms().len();
        let n_textures = program.textures().len();
        Ok(Self {
            program,
            vao,
            attributes: (0..n_attributes).map(|_| None).collect(),
            external_attributes: vec![false; n_attributes],
            uniforms: vec![None; n_uniforms],
            textures: (0..n_textures).map(|_| None).collect(),
            index: None,
            instance_count: None,
            restart_index: DEFAULT_RESTART_INDEX,
            draw_length: 0,
        })
    }

    fn ctx(&self) -> &Rc<RenderContext> {
        self.program.context()
    }

    fn attribute_slot(&self, name: &str) -> Result<usize, RenderError> {
        self.program
            .attributes()
            .iter()
            .position(|a| a.name == name)
            .ok_or_else(|| unknown(NameKind::Attribute, name))
    }

    fn uniform_slot(&self, name: &str) -> Result<usize, RenderError> {
        self.program
            .uniforms()
            .iter()
            .position(|u| u.name == name)
            .ok_or_else(|| unknown(NameKind::Uniform, name))
    }

    fn texture_slot(&self, name: &str) -> Result<usize, RenderError> {
        self.program
            .textures()
            .iter()
            .position(|t| t.name == name)
            .ok_or_else(|| unknown(NameKind::Texture, name))
    }

    /// Point the attribute's locations at `buffer` in the vertex array.
    fn assign_to_vao(&self, attr: &ProgramAttribute, buffer: &AttributeBuffer) {
        let Some(location) = attr.location else {
            return;
        };
        let device = self.ctx().device();
        device.bind_vertex_array(Some(self.vao));
        device.bind_buffer(BufferTarget::Array, Some(buffer.handle()));
        let components = attr.data_type.components();
        let stride = components * 4 * attr.array_count;
        for i in 0..attr.array_count {
            device.vertex_attrib_pointer(
                location + i,
                AttribLayout {
                    components,
                    kind: attr.data_type.scalar_kind(),
                    stride,
                    offset: components * 4 * i,
                },
            );
        }
        device.bind_vertex_array(None);
    }

    /// Write per-vertex data, creating the buffer on first use.
    ///
    /// The buffer is typed after `T`, so a packed `f32` stream can feed a
    /// `vec3` attribute.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::UnknownName`] for an undeclared attribute,
    /// [`RenderError::NotImplemented`] for matrix attributes, and
    /// [`RenderError::TypeMismatch`] if `T` does not fit the declared type.
    pub fn set_attribute<T: BufferElement>(
        &mut self,
        name: &str,
        data: &[T],
    ) -> Result<(), RenderError> {
        let slot = self.attribute_slot(name)?;
        let program = Rc::clone(&self.program);
        let attr = &program.attributes()[slot];
        if attr.location.is_none() {
            return Ok(());
        }
        check_attribute_type(attr, T::DATA_TYPE, T::ARRAY_COUNT)?;

        let buffer = if let Some(buffer) = &self.attributes[slot] {
            Rc::clone(buffer)
        } else {
            log::debug!("creating buffer for attribute {name}");
            let buffer = Rc::new(AttributeBuffer::new(
                self.ctx(),
                T::DATA_TYPE,
                T::ARRAY_COUNT,
            )?);
            self.assign_to_vao(attr, &buffer);
            self.attributes[slot] = Some(Rc::clone(&buffer));
            buffer
        };
        buffer.set_data(data)?;
        self.ctx().check_error()
    }

    /// Source an attribute from a buffer owned elsewhere.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::UnknownName`] for an undeclared attribute,
    /// [`RenderError::TypeMismatch`] for a foreign or mistyped buffer,
    /// [`RenderError::NotImplemented`] for matrix attributes, and
    /// [`RenderError::InvalidState`] if a buffer is already attached.
    pub fn set_attribute_buffer(
        &mut self,
        name: &str,
        buffer: Rc<AttributeBuffer>,
    ) -> Result<(), RenderError> {
        let slot = self.attribute_slot(name)?;
        self.ctx().ensure_same(buffer.context(), "attribute buffer")?;
        let program = Rc::clone(&self.program);
        let attr = &program.attributes()[slot];
        if attr.location.is_none() {
            return Ok(());
        }
        check_attribute_type(attr, buffer.data_type(), buffer.array_count())?;
        if self.attributes[slot].is_some() {
            return Err(RenderError::InvalidState(format!(
                "attribute {name} already has a buffer"
            )));
        }
        self.assign_to_vao(attr, &buffer);
        self.attributes[slot] = Some(buffer);
        self.external_attributes[slot] = true;
        self.ctx().check_error()
    }

    /// Store a uniform value for the next draw.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::UnknownName`] for an undeclared uniform and
    /// [`RenderError::TypeMismatch`] if the value's type differs from the
    /// declaration.
    pub fn set_uniform(
        &mut self,
        name: &str,
        value: impl Into<UniformValue>,
    ) -> Result<(), RenderError> {
        let slot = self.uniform_slot(name)?;
        let uniform = &self.program.uniforms()[slot];
        if uniform.location.is_none() {
            return Ok(());
        }
        let value = value.into();
        if value.data_type() != uniform.data_type {
            return Err(RenderError::TypeMismatch(format!(
                "uniform {name} is {} but value is {}",
                uniform.data_type,
                value.data_type()
            )));
        }
        self.uniforms[slot] = Some(value);
        Ok(())
    }

    /// Resolve a texture name to its slot if the linker kept it, checking
    /// the declared dimensionality.
    fn live_texture_slot(
        &self,
        name: &str,
        dim: u32,
    ) -> Result<Option<usize>, RenderError> {
        let slot = self.texture_slot(name)?;
        let texture = &self.program.textures()[slot];
        if texture.location.is_none() {
            return Ok(None);
        }
        if texture.dim != dim {
            return Err(RenderError::TypeMismatch(format!(
                "texture {name} is {}D but a {dim}D texture was given",
                texture.dim
            )));
        }
        Ok(Some(slot))
    }

    fn ensure_unset(&self, slot: usize, name: &str) -> Result<(), RenderError> {
        if self.textures[slot].is_some() {
            return Err(RenderError::InvalidState(format!(
                "texture {name} has already been set"
            )));
        }
        Ok(())
    }

    /// Sample an existing texture. May be called again to re-bind.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::UnknownName`] for an undeclared texture and
    /// [`RenderError::TypeMismatch`] for a foreign texture or a
    /// dimensionality mismatch.
    pub fn set_texture_from_buffer(
        &mut self,
        name: &str,
        texture: Rc<TextureBuffer>,
    ) -> Result<(), RenderError> {
        self.ctx().ensure_same(texture.context(), "texture")?;
        let Some(slot) = self.live_texture_slot(name, texture.dimension())?
        else {
            return Ok(());
        };
        self.textures[slot] = Some(TextureBinding::External(texture));
        Ok(())
    }

    /// Create an owned 2D texture from 8-bit RGB or RGBA data.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::UnknownName`] for an undeclared texture,
    /// [`RenderError::TypeMismatch`] if it is not 2D, and
    /// [`RenderError::InvalidState`] if it is already set.
    pub fn set_texture_2d(
        &mut self,
        name: &str,
        data: &[u8],
        width: u32,
        height: u32,
        options: TextureOptions,
    ) -> Result<(), RenderError> {
        let Some(slot) = self.live_texture_slot(name, 2)? else {
            return Ok(());
        };
        self.ensure_unset(slot, name)?;
        let format = if options.with_alpha {
            TextureFormat::Rgba8
        } else {
            TextureFormat::Rgb8
        };
        let texture = TextureBuffer::new_2d(
            self.ctx(),
            format,
            width,
            height,
            Some(TexelData::Bytes(data)),
        )?;
        texture.set_filter_mode(FilterMode::Linear)?;
        texture.set_wrap_repeat(options.repeat)?;
        if options.use_mipmap {
            texture.generate_mipmaps()?;
        }
        self.textures[slot] = Some(TextureBinding::Owned(Rc::new(texture)));
        Ok(())
    }

    /// Create an owned 1D texture from 8-bit RGB data.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::UnknownName`] for an undeclared texture,
    /// [`RenderError::TypeMismatch`] if it is not 1D, and
    /// [`RenderError::InvalidState`] if it is already set.
    pub fn set_texture_1d(
        &mut self,
        name: &str,
        data: &[u8],
        len: u32,
    ) -> Result<(), RenderError> {
        let Some(slot) = self.live_texture_slot(name, 1)? else {
            return Ok(());
        };
        self.ensure_unset(slot, name)?;
        let texture = TextureBuffer::new_1d(
            self.ctx(),
            TextureFormat::Rgb8,
            len,
            Some(TexelData::Bytes(data)),
        )?;
        texture.set_filter_mode(FilterMode::Linear)?;
        self.textures[slot] = Some(TextureBinding::Owned(Rc::new(texture)));
        Ok(())
    }

    /// Create an owned lookup texture from a colormap.
    ///
    /// Replacing an existing binding requires `allow_update`.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::UnknownName`] for an undeclared texture,
    /// [`RenderError::TypeMismatch`] if it is not 1D, and
    /// [`RenderError::InvalidState`] if it is already set and `allow_update`
    /// is false.
    pub fn set_texture_from_colormap(
        &mut self,
        name: &str,
        colormap: &Colormap,
        allow_update: bool,
    ) -> Result<(), RenderError> {
        let Some(slot) = self.live_texture_slot(name, 1)? else {
            return Ok(());
        };
        if !allow_update {
            self.ensure_unset(slot, name)?;
        }
        let texture = colormap.create_texture(self.ctx())?;
        self.textures[slot] = Some(TextureBinding::Owned(Rc::new(texture)));
        Ok(())
    }

    /// Attach the index buffer. Only indexed draw modes take one.
    ///
    /// `Int`/`UInt` buffers hold one index per element, `VectorNUInt`
    /// buffers hold N.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::InvalidState`] for draw modes without indexing
    /// and [`RenderError::TypeMismatch`] for foreign or non-integer buffers.
    pub fn set_index(
        &mut self,
        buffer: Rc<AttributeBuffer>,
    ) -> Result<(), RenderError> {
        if !self.program.draw_mode().uses_index() {
            return Err(RenderError::InvalidState(format!(
                "draw mode {:?} does not use an index buffer",
                self.program.draw_mode()
            )));
        }
        self.ctx().ensure_same(buffer.context(), "index buffer")?;
        let per_element = match buffer.data_type() {
            RenderDataType::Int | RenderDataType::UInt => 1,
            RenderDataType::Vector2UInt => 2,
            RenderDataType::Vector3UInt => 3,
            RenderDataType::Vector4UInt => 4,
            other => {
                return Err(RenderError::TypeMismatch(format!(
                    "index buffer must hold integer types, not {other}"
                )))
            }
        };
        let device = self.ctx().device();
        device.bind_vertex_array(Some(self.vao));
        device.bind_buffer(BufferTarget::ElementArray, Some(buffer.handle()));
        device.bind_vertex_array(None);
        self.index = Some(IndexBinding {
            multiplicity: per_element * buffer.array_count() as usize,
            buffer,
        });
        self.ctx().check_error()
    }

    /// Index value that restarts a strip.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::InvalidState`] for draw modes without primitive
    /// restart.
    pub fn set_primitive_restart_index(
        &mut self,
        index: u32,
    ) -> Result<(), RenderError> {
        if !self.program.draw_mode().uses_primitive_restart() {
            return Err(RenderError::InvalidState(format!(
                "draw mode {:?} does not support primitive restart",
                self.program.draw_mode()
            )));
        }
        self.restart_index = index;
        Ok(())
    }

    /// Number of instances instanced draw modes emit.
    pub fn set_instance_count(&mut self, count: u32) {
        self.instance_count = Some(count);
    }

    /// Check that every live input is bound and sizes agree.
    ///
    /// Returns the number of vertices (or indices) the next draw emits.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::InvalidState`] naming the first live input left
    /// unset, or [`RenderError::InconsistentSize`] if attribute lengths
    /// disagree.
    pub fn validate(&mut self) -> Result<usize, RenderError> {
        let program = Rc::clone(&self.program);

        for (uniform, value) in program.uniforms().iter().zip(&self.uniforms) {
            if uniform.location.is_some() && value.is_none() {
                return Err(RenderError::InvalidState(format!(
                    "uniform {} has not been set",
                    uniform.name
                )));
            }
        }

        let mut vertex_count: Option<(usize, &str)> = None;
        for (attr, buffer) in program.attributes().iter().zip(&self.attributes)
        {
            if attr.location.is_none() {
                continue;
            }
            let Some(buffer) = buffer.as_ref().filter(|b| b.is_set()) else {
                return Err(RenderError::InvalidState(format!(
                    "attribute {} has no buffer data",
                    attr.name
                )));
            };
            let scale = RenderDataType::count_compatibility(
                attr.data_type,
                buffer.data_type(),
            )
            .unwrap_or(1);
            let count = buffer.len() / scale;
            match vertex_count {
                Some((expected, first)) if expected != count => {
                    return Err(RenderError::InconsistentSize(format!(
                        "attribute {} has {count} entries but {first} has \
                         {expected}",
                        attr.name
                    )));
                }
                Some(_) => {}
                None => vertex_count = Some((count, &attr.name)),
            }
        }

        for (texture, binding) in program.textures().iter().zip(&self.textures) {
            if texture.location.is_some() && binding.is_none() {
                return Err(RenderError::InvalidState(format!(
                    "texture {} has not been set",
                    texture.name
                )));
            }
        }

        let mode = program.draw_mode();
        let length = if mode.uses_index() {
            let index = self.index.as_ref().ok_or_else(|| {
                RenderError::InvalidState(
                    "index buffer has not been set".to_owned(),
                )
            })?;
            if !index.buffer.is_set() {
                return Err(RenderError::InvalidState(
                    "index buffer has no data".to_owned(),
                ));
            }
            index.buffer.len() * index.multiplicity
        } else {
            vertex_count.map_or(0, |(count, _)| count)
        };

        if mode.is_instanced() && self.instance_count.is_none() {
            return Err(RenderError::InvalidState(
                "instance count has not been set".to_owned(),
            ));
        }

        self.draw_length = length;
        Ok(length)
    }

    fn activate_textures(&self) {
        let device = self.ctx().device();
        for (texture, binding) in
            self.program.textures().iter().zip(&self.textures)
        {
            let (Some(location), Some(binding)) = (texture.location, binding)
            else {
                continue;
            };
            device.active_texture(texture.unit);
            binding.texture().bind();
            device.set_uniform(location, &UniformValue::Int(texture.unit as i32));
        }
    }

    fn upload_uniforms(&self) {
        let device = self.ctx().device();
        for (uniform, value) in self.program.uniforms().iter().zip(&self.uniforms)
        {
            if let (Some(location), Some(value)) = (uniform.location, value) {
                device.set_uniform(location, value);
            }
        }
    }

    /// Validate, then issue the draw for the program's topology.
    ///
    /// # Errors
    ///
    /// Returns any [`Self::validate`] error, [`RenderError::ResourceLimit`]
    /// if the length exceeds the native count range, and
    /// [`RenderError::Device`] if the device raises an error.
    pub fn draw(&mut self) -> Result<(), RenderError> {
        let length = self.validate()?;
        let count = u32::try_from(length).map_err(|_| {
            RenderError::ResourceLimit(format!(
                "draw of {length} elements exceeds the native count range"
            ))
        })?;
        let mode = self.program.draw_mode();
        let primitive = mode.primitive();
        let restart = mode.uses_primitive_restart();
        let device = self.ctx().device();

        device.use_program(Some(self.program.handle()));
        self.upload_uniforms();
        device.bind_vertex_array(Some(self.vao));
        if restart {
            device.set_primitive_restart(Some(self.restart_index));
        }
        self.activate_textures();

        if mode.uses_index() {
            device.draw_elements(primitive, count);
        } else if let (true, Some(instances)) =
            (mode.is_instanced(), self.instance_count)
        {
            device.draw_arrays_instanced(primitive, 0, count, instances);
        } else {
            device.draw_arrays(primitive, 0, count);
        }

        if restart {
            device.set_primitive_restart(None);
        }
        self.ctx().check_error()
    }

    /// Whether `name` is a declared uniform the linker kept.
    #[must_use]
    pub fn has_uniform(&self, name: &str) -> bool {
        self.program
            .uniforms()
            .iter()
            .any(|u| u.name == name && u.location.is_some())
    }

    /// Whether `name` is a declared attribute the linker kept.
    #[must_use]
    pub fn has_attribute(&self, name: &str) -> bool {
        self.program
            .attributes()
            .iter()
            .any(|a| a.name == name && a.location.is_some())
    }

    /// Whether `name` is a declared texture the linker kept.
    #[must_use]
    pub fn has_texture(&self, name: &str) -> bool {
        self.program
            .textures()
            .iter()
            .any(|t| t.name == name && t.location.is_some())
    }

    /// Whether the attribute has a buffer holding data.
    #[must_use]
    pub fn attribute_is_set(&self, name: &str) -> bool {
        self.attribute_slot(name).is_ok_and(|slot| {
            self.attributes[slot].as_ref().is_some_and(|b| b.is_set())
        })
    }

    /// Whether the texture has a binding.
    #[must_use]
    pub fn texture_is_set(&self, name: &str) -> bool {
        self.texture_slot(name)
            .is_ok_and(|slot| self.textures[slot].is_some())
    }

    /// The attribute's buffer, if one was created or attached.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::UnknownName`] for an undeclared attribute.
    pub fn attribute_buffer(
        &self,
        name: &str,
    ) -> Result<Option<Rc<AttributeBuffer>>, RenderError> {
        let slot = self.attribute_slot(name)?;
        Ok(self.attributes[slot].clone())
    }

    /// Whether the attribute's buffer was attached from outside.
    #[must_use]
    pub fn attribute_is_external(&self, name: &str) -> bool {
        self.attribute_slot(name)
            .is_ok_and(|slot| self.external_attributes[slot])
    }

    /// The texture bound to `name`, owned or external.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::UnknownName`] for an undeclared texture.
    pub fn texture_buffer(
        &self,
        name: &str,
    ) -> Result<Option<Rc<TextureBuffer>>, RenderError> {
        let slot = self.texture_slot(name)?;
        Ok(self.textures[slot].as_ref().map(|b| Rc::clone(b.texture())))
    }

    /// Value stored for a uniform, if any.
    #[must_use]
    pub fn uniform_value(&self, name: &str) -> Option<UniformValue> {
        let slot = self.uniform_slot(name).ok()?;
        self.uniforms[slot]
    }

    /// Length computed by the last successful validation.
    #[must_use]
    pub fn draw_data_length(&self) -> usize {
        self.draw_length
    }

    /// Instance count for instanced modes.
    #[must_use]
    pub fn instance_count(&self) -> Option<u32> {
        self.instance_count
    }

    /// Topology and indexing scheme.
    #[must_use]
    pub fn draw_mode(&self) -> DrawMode {
        self.program.draw_mode()
    }

    /// The shared compiled program.
    #[must_use]
    pub fn compiled(&self) -> &Rc<CompiledProgram> {
        &self.program
    }
}

impl Drop for ShaderProgram {
    fn drop(&mut self) {
        self.ctx().device().delete_vertex_array(self.vao);
    }
}
