//! Device resources.
//!
//! Every resource holds the [`RenderContext`] it was created on and
//! releases its native handle when dropped.

/// Typed, growable vertex-attribute and index buffers.
pub mod attribute_buffer;
/// Named colormap tables.
pub mod colormap;
/// Semantic element types shared by buffers, attributes and uniforms.
pub mod data_type;
/// Pixel and renderbuffer formats.
pub mod format;
/// Render targets.
pub mod framebuffer;
/// Attachable non-sampled storage.
pub mod render_buffer;
/// Device ownership, error polling and current-target bookkeeping.
pub mod render_context;
/// 1D/2D/3D textures.
pub mod texture;

pub use attribute_buffer::AttributeBuffer;
pub use colormap::Colormap;
pub use data_type::{BufferElement, RenderDataType, UniformValue};
pub use format::{RenderBufferType, TextureFormat};
pub use framebuffer::{AttachmentSource, FrameBuffer};
pub use render_buffer::RenderBuffer;
pub use render_context::{BoundTarget, RenderContext};
pub use texture::{FilterMode, TextureBuffer};
