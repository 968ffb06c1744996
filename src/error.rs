//! Crate-level error types.

use std::fmt;

use crate::device::DeviceErrorCode;
use crate::shader::ShaderStageType;

/// What kind of declared name a lookup failed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    /// A shader uniform.
    Uniform,
    /// A per-vertex shader attribute.
    Attribute,
    /// A sampled texture.
    Texture,
    /// A registered shader program.
    Program,
    /// A registered substitution rule.
    Rule,
    /// A registered colormap.
    Colormap,
}

impl fmt::Display for NameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Uniform => "uniform",
            Self::Attribute => "attribute",
            Self::Texture => "texture",
            Self::Program => "shader program",
            Self::Rule => "shader replacement rule",
            Self::Colormap => "colormap",
        };
        f.write_str(s)
    }
}

/// Errors produced by the render backend.
#[derive(Debug)]
pub enum RenderError {
    /// Data or a resource of the wrong semantic type (or from a different
    /// device context) was supplied.
    TypeMismatch(String),
    /// A read went past the logical end of a buffer.
    OutOfBounds {
        /// One past the last element the request touched.
        requested: usize,
        /// Logical element count of the buffer.
        len: usize,
    },
    /// A name that was never declared or registered.
    UnknownName {
        /// What the name was supposed to refer to.
        kind: NameKind,
        /// The offending name.
        name: String,
    },
    /// The operation is not implemented for this combination of inputs.
    NotImplemented(String),
    /// Sizes that must agree do not.
    InconsistentSize(String),
    /// An operation was issued before its prerequisite state was reached,
    /// or a singleton value was set twice.
    InvalidState(String),
    /// A fixed native limit was exceeded.
    ResourceLimit(String),
    /// Shader text could not be processed by the substitution engine.
    InvalidShaderSource(String),
    /// A shader stage failed to compile.
    ShaderCompile {
        /// Stage that failed.
        stage: ShaderStageType,
        /// Compiler info log.
        log: String,
    },
    /// The program failed to link.
    ShaderLink {
        /// Linker info log.
        log: String,
    },
    /// The device reported an error through its cumulative error flag.
    Device(DeviceErrorCode),
    /// The device could not allocate a native object.
    Allocation(String),
    /// Generic I/O failure (options files).
    Io(std::io::Error),
    /// TOML options parsing/serialization failure.
    OptionsParse(String),
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TypeMismatch(msg) => write!(f, "type mismatch: {msg}"),
            Self::OutOfBounds { requested, len } => write!(
                f,
                "out of bounds: request reaches element {requested} but buffer \
                 holds {len}"
            ),
            Self::UnknownName { kind, name } => {
                write!(f, "no {kind} with name [{name}]")
            }
            Self::NotImplemented(msg) => write!(f, "not implemented: {msg}"),
            Self::InconsistentSize(msg) => {
                write!(f, "inconsistent size: {msg}")
            }
            Self::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            Self::ResourceLimit(msg) => {
                write!(f, "resource limit exceeded: {msg}")
            }
            Self::InvalidShaderSource(msg) => {
                write!(f, "invalid shader source: {msg}")
            }
            Self::ShaderCompile { stage, log } => {
                write!(f, "{stage} shader compile failed: {log}")
            }
            Self::ShaderLink { log } => {
                write!(f, "shader program link failed: {log}")
            }
            Self::Device(code) => write!(f, "device error: {code}"),
            Self::Allocation(msg) => {
                write!(f, "device allocation failed: {msg}")
            }
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::OptionsParse(msg) => {
                write!(f, "options parse error: {msg}")
            }
        }
    }
}

impl std::error::Error for RenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for RenderError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<DeviceErrorCode> for RenderError {
    fn from(code: DeviceErrorCode) -> Self {
        Self::Device(code)
    }
}
