//! Linked programs and their merged, location-resolved interface.

use std::fmt::Write as _;
use std::rc::Rc;

use super::draw_mode::DrawMode;
use super::spec::ShaderStageSpecification;
use crate::device::{ProgramId, ShaderId, UniformLocation};
use crate::error::RenderError;
use crate::gpu::data_type::{type_label, RenderDataType};
use crate::gpu::render_context::RenderContext;

/// A uniform of a linked program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramUniform {
    /// Name in source.
    pub name: String,
    /// Value type.
    pub data_type: RenderDataType,
    /// `None` when the linker dropped it.
    pub location: Option<UniformLocation>,
}

/// An attribute of a linked program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramAttribute {
    /// Name in source.
    pub name: String,
    /// Element type.
    pub data_type: RenderDataType,
    /// Consecutive locations used per vertex.
    pub array_count: u32,
    /// First location; `None` when the linker dropped it.
    pub location: Option<u32>,
}

/// A sampled texture of a linked program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramTexture {
    /// Sampler name in source.
    pub name: String,
    /// Dimensionality, 1 to 3.
    pub dim: u32,
    /// Sampler uniform location; `None` when the linker dropped it.
    pub location: Option<UniformLocation>,
    /// Texture unit assigned at link time.
    pub unit: u32,
}

fn merge<T>(
    list: &mut Vec<T>,
    item: T,
    key: impl Fn(&T) -> (&str, String),
    what: &str,
) -> Result<(), RenderError> {
    let (name, kind) = key(&item);
    if let Some(existing) = list.iter().find(|e| key(e).0 == name) {
        let existing_kind = key(existing).1;
        if existing_kind != kind {
            return Err(RenderError::TypeMismatch(format!(
                "{what} {name} appears twice in program with different \
                 types ({existing_kind} and {kind})"
            )));
        }
        return Ok(());
    }
    list.push(item);
    Ok(())
}

fn numbered(source: &str) -> String {
    let mut out = String::new();
    for (n, line) in source.lines().enumerate() {
        let _ = writeln!(out, "{:>4}: {line}", n + 1);
    }
    out
}

/// A linked program shared by every instance requested with the same key.
#[derive(Debug)]
pub struct CompiledProgram {
    ctx: Rc<RenderContext>,
    handle: ProgramId,
    draw_mode: DrawMode,
    uniforms: Vec<ProgramUniform>,
    attributes: Vec<ProgramAttribute>,
    textures: Vec<ProgramTexture>,
}

impl CompiledProgram {
    /// Merge the stages' interfaces, compile each stage with
    /// `common_source` appended, link and resolve locations.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::TypeMismatch`] if stages declare one name
    /// with different types or array counts, [`RenderError::InvalidState`]
    /// if no stage declares an attribute, [`RenderError::ResourceLimit`]
    /// if the textures exceed the device's units, and
    /// [`RenderError::ShaderCompile`] or [`RenderError::ShaderLink`] when
    /// the device rejects the source.
    pub fn new(
        ctx: &Rc<RenderContext>,
        stages: &[ShaderStageSpecification],
        draw_mode: DrawMode,
        common_source: &str,
        log_source: bool,
    ) -> Result<Self, RenderError> {
        let mut uniforms = Vec::new();
        let mut attributes = Vec::new();
        let mut textures: Vec<ProgramTexture> = Vec::new();
        for stage in stages {
            for u in &stage.uniforms {
                merge(
                    &mut uniforms,
                    ProgramUniform {
                        name: u.name.clone(),
                        data_type: u.data_type,
                        location: None,
                    },
                    |e| (e.name.as_str(), e.data_type.to_string()),
                    "uniform",
                )?;
            }
            for a in &stage.attributes {
                merge(
                    &mut attributes,
                    ProgramAttribute {
                        name: a.name.clone(),
                        data_type: a.data_type,
                        array_count: a.array_count.max(1),
                        location: None,
                    },
                    |e| (e.name.as_str(), type_label(e.data_type, e.array_count)),
                    "attribute",
                )?;
            }
            for t in &stage.textures {
                let unit = textures.len() as u32;
                merge(
                    &mut textures,
                    ProgramTexture {
                        name: t.name.clone(),
                        dim: t.dim,
                        location: None,
                        unit,
                    },
                    |e| (e.name.as_str(), format!("{}D", e.dim)),
                    "texture",
                )?;
            }
        }

        if attributes.is_empty() {
            return Err(RenderError::InvalidState(
                "program has no attributes".to_owned(),
            ));
        }
        let max_units = ctx.device().max_texture_units();
        if textures.len() > max_units as usize {
            return Err(RenderError::ResourceLimit(format!(
                "program samples {} textures but only {max_units} texture \
                 units are available",
                textures.len()
            )));
        }

        let handle = link(ctx, stages, common_source, log_source)?;
        let mut program = Self {
            ctx: Rc::clone(ctx),
            handle,
            draw_mode,
            uniforms,
            attributes,
            textures,
        };
        program.resolve_locations()?;
        Ok(program)
    }

    fn resolve_locations(&mut self) -> Result<(), RenderError> {
        let device = self.ctx.device();
        device.use_program(Some(self.handle));
        for u in &mut self.uniforms {
            u.location = device.uniform_location(self.handle, &u.name);
            if u.location.is_none() {
                log::debug!("failed to get location for uniform {}", u.name);
            }
        }
        for a in &mut self.attributes {
            a.location = device.attrib_location(self.handle, &a.name);
            if a.location.is_none() {
                log::debug!("failed to get location for attribute {}", a.name);
            }
        }
        for t in &mut self.textures {
            t.location = device.uniform_location(self.handle, &t.name);
            if t.location.is_none() {
                log::debug!("failed to get location for texture {}", t.name);
            }
        }
        self.ctx.check_error()
    }

    /// Native handle.
    #[must_use]
    pub fn handle(&self) -> ProgramId {
        self.handle
    }

    /// Topology and indexing scheme.
    #[must_use]
    pub fn draw_mode(&self) -> DrawMode {
        self.draw_mode
    }

    /// Merged uniforms, in declaration order.
    #[must_use]
    pub fn uniforms(&self) -> &[ProgramUniform] {
        &self.uniforms
    }

    /// Merged attributes, in declaration order.
    #[must_use]
    pub fn attributes(&self) -> &[ProgramAttribute] {
        &self.attributes
    }

    /// Merged textures, in unit order.
    #[must_use]
    pub fn textures(&self) -> &[ProgramTexture] {
        &self.textures
    }

    /// Owning context.
    #[must_use]
    pub fn context(&self) -> &Rc<RenderContext> {
        &self.ctx
    }
}

impl Drop for CompiledProgram {
    fn drop(&mut self) {
        self.ctx.device().delete_program(self.handle);
    }
}

fn compile_stage(
    ctx: &RenderContext,
    stage: &ShaderStageSpecification,
    common_source: &str,
    log_source: bool,
) -> Result<ShaderId, RenderError> {
    let source = if common_source.is_empty() {
        stage.src.clone()
    } else {
        format!("{}\n{common_source}", stage.src)
    };
    if log_source {
        log::debug!("{} stage source:\n{}", stage.stage, numbered(&source));
    }
    let out = ctx.device().compile_shader(stage.stage, &source)?;
    if !out.success {
        log::error!(
            "{} shader compile failed:\n{}\nprogram text:\n{}",
            stage.stage,
            out.info_log,
            numbered(&source)
        );
        ctx.device().delete_shader(out.handle);
        return Err(RenderError::ShaderCompile {
            stage: stage.stage,
            log: out.info_log,
        });
    }
    if !out.info_log.is_empty() {
        log::debug!("{} shader info log: {}", stage.stage, out.info_log);
    }
    Ok(out.handle)
}

fn link(
    ctx: &RenderContext,
    stages: &[ShaderStageSpecification],
    common_source: &str,
    log_source: bool,
) -> Result<ProgramId, RenderError> {
    let device = ctx.device();
    let mut shaders = Vec::with_capacity(stages.len());
    for stage in stages {
        match compile_stage(ctx, stage, common_source, log_source) {
            Ok(id) => shaders.push(id),
            Err(e) => {
                for id in shaders {
                    device.delete_shader(id);
                }
                return Err(e);
            }
        }
    }

    let linked = device.link_program(&shaders);
    // Stages are not needed once linking has been attempted.
    for id in &shaders {
        device.delete_shader(*id);
    }
    let out = linked?;
    if !out.success {
        log::error!("shader program link failed:\n{}", out.info_log);
        device.delete_program(out.handle);
        return Err(RenderError::ShaderLink { log: out.info_log });
    }
    if let Err(e) = ctx.check_error() {
        device.delete_program(out.handle);
        return Err(e);
    }
    Ok(out.handle)
}
