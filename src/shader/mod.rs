//! Shader programs: stage descriptions, text substitution, linking and
//! per-owner instances.

/// Linked programs with resolved locations.
pub mod compiled;
/// Topology and indexing scheme.
pub mod draw_mode;
/// Built-in substitution rules.
pub mod library;
/// Per-owner bindings, validation and draw.
pub mod program;
/// `${ TAG }$` marker substitution.
pub mod replacement;
/// Stage sources and declared interfaces.
pub mod spec;

pub use compiled::{
    CompiledProgram, ProgramAttribute, ProgramTexture, ProgramUniform,
};
pub use draw_mode::DrawMode;
pub use program::{ShaderProgram, TextureOptions, DEFAULT_RESTART_INDEX};
pub use replacement::{
    apply_shader_replacements, resolve_rules, ShaderReplacementRule,
};
pub use spec::{
    ShaderSpecAttribute, ShaderSpecTexture, ShaderSpecUniform,
    ShaderStageSpecification, ShaderStageType,
};
