//! The native graphics context the backend drives.
//!
//! [`Device`] models a bind-then-operate API with integer object handles,
//! uniform/attribute locations and a cumulative error flag. All methods take
//! `&self`; implementations keep their own interior state, the same way a
//! real context does.
//!
//! - [`HeadlessDevice`]: in-memory software implementation, always built.
//! - `GlDevice`: OpenGL 3.3+ through `glow` (feature `gl`).

mod headless;
#[cfg(feature = "gl")]
mod gl;

use std::fmt;

#[cfg(feature = "gl")]
pub use gl::GlDevice;
pub use headless::{DrawCall, HeadlessDevice};

use crate::error::RenderError;
use crate::gpu::data_type::UniformValue;
use crate::gpu::format::{RenderBufferType, TextureFormat};
use crate::shader::ShaderStageType;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);
    };
}

handle!(
    /// Native buffer object.
    BufferId
);
handle!(
    /// Native texture object.
    TextureId
);
handle!(
    /// Native renderbuffer object.
    RenderbufferId
);
handle!(
    /// Native framebuffer object. The window framebuffer has no id.
    FramebufferId
);
handle!(
    /// Native shader object (one compiled stage).
    ShaderId
);
handle!(
    /// Native linked program.
    ProgramId
);
handle!(
    /// Native vertex-array (attribute layout) object.
    VertexArrayId
);

/// Resolved location of a uniform inside a linked program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformLocation(pub u32);

/// Buffer binding point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferTarget {
    /// Per-vertex attribute data.
    Array,
    /// Index data of the bound vertex array.
    ElementArray,
}

/// Texture binding point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureTarget {
    /// 1D texture.
    D1,
    /// 2D texture.
    D2,
    /// 3D texture.
    D3,
}

impl TextureTarget {
    /// Dimensionality, 1 to 3.
    #[must_use]
    pub const fn dimension(self) -> u32 {
        match self {
            Self::D1 => 1,
            Self::D2 => 2,
            Self::D3 => 3,
        }
    }

    /// Binding point for a dimensionality, if there is one.
    #[must_use]
    pub const fn from_dimension(dim: u32) -> Option<Self> {
        match dim {
            1 => Some(Self::D1),
            2 => Some(Self::D2),
            3 => Some(Self::D3),
            _ => None,
        }
    }
}

/// Scalar kind of attribute components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    /// 32-bit float.
    Float,
    /// 32-bit signed integer.
    Int,
    /// 32-bit unsigned integer.
    UInt,
}

/// Primitive topology of a native draw call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    /// Points.
    Points,
    /// Independent lines.
    Lines,
    /// Line strip.
    LineStrip,
    /// Lines with adjacency.
    LinesAdjacency,
    /// Line strip with adjacency.
    LineStripAdjacency,
    /// Independent triangles.
    Triangles,
    /// Triangle strip.
    TriangleStrip,
    /// Triangles with adjacency.
    TrianglesAdjacency,
}

/// Texture sampling filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFilter {
    /// Nearest texel.
    Nearest,
    /// Bilinear.
    Linear,
    /// Trilinear across mip levels (minification only).
    LinearMipmapLinear,
}

/// Texture addressing outside [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureWrap {
    /// Clamp to the edge texel.
    ClampToEdge,
    /// Tile.
    Repeat,
}

/// Complete sampler configuration of a texture object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerState {
    /// Minification filter.
    pub min_filter: TextureFilter,
    /// Magnification filter.
    pub mag_filter: TextureFilter,
    /// Wrap mode, applied to every axis.
    pub wrap: TextureWrap,
}

impl Default for SamplerState {
    fn default() -> Self {
        Self {
            min_filter: TextureFilter::Linear,
            mag_filter: TextureFilter::Linear,
            wrap: TextureWrap::ClampToEdge,
        }
    }
}

/// Host pixel data handed to a texture upload.
#[derive(Debug, Clone, Copy)]
pub enum TexelData<'a> {
    /// Unsigned bytes, one per channel.
    Bytes(&'a [u8]),
    /// Floats, one per channel.
    Floats(&'a [f32]),
}

impl TexelData<'_> {
    /// Number of channel values.
    #[must_use]
    pub const fn len(&self) -> usize {
        match self {
            Self::Bytes(b) => b.len(),
            Self::Floats(f) => f.len(),
        }
    }

    /// Whether there is no data.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Framebuffer attachment point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attachment {
    /// Color slot `n`.
    Color(u32),
    /// The depth slot.
    Depth,
}

/// Framebuffer binding point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FramebufferTarget {
    /// Read and draw.
    Both,
    /// Source of reads and blits.
    Read,
    /// Destination of draws, clears and blits.
    Draw,
}

/// Pixel layout of a synchronous read-back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadFormat {
    /// Four color channels.
    Rgba,
    /// One depth value.
    Depth,
}

impl ReadFormat {
    /// Values per pixel.
    #[must_use]
    pub const fn channels(self) -> usize {
        match self {
            Self::Rgba => 4,
            Self::Depth => 1,
        }
    }
}

/// Which planes a clear touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ClearMask {
    /// Color planes.
    pub color: bool,
    /// Depth plane.
    pub depth: bool,
    /// Stencil plane.
    pub stencil: bool,
}

impl ClearMask {
    /// Every plane.
    pub const ALL: Self = Self {
        color: true,
        depth: true,
        stencil: true,
    };
}

/// Integer pixel rectangle, origin bottom-left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    /// Left edge.
    pub x: i32,
    /// Bottom edge.
    pub y: i32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Rect {
    /// Rectangle anchored at the origin.
    #[must_use]
    pub const fn sized(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    /// Number of pixels covered.
    #[must_use]
    pub const fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Toggleable fixed-function capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Depth testing.
    DepthTest,
    /// Color blending.
    Blend,
    /// Face culling.
    CullFace,
}

/// Depth comparison function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareFunc {
    /// Never passes.
    Never,
    /// Passes if less.
    Less,
    /// Passes if equal.
    Equal,
    /// Passes if less or equal.
    LEqual,
    /// Passes if greater.
    Greater,
    /// Always passes.
    Always,
}

/// Blend factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    /// 0
    Zero,
    /// 1
    One,
    /// Source alpha.
    SrcAlpha,
    /// 1 - source alpha.
    OneMinusSrcAlpha,
    /// Destination alpha.
    DstAlpha,
    /// 1 - destination alpha.
    OneMinusDstAlpha,
}

/// Polygon face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Face {
    /// Front faces.
    Front,
    /// Back faces.
    Back,
}

/// Front-face winding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Winding {
    /// Counter-clockwise.
    Ccw,
    /// Clockwise.
    Cw,
}

/// A single fixed-function state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateChange {
    /// Turn a capability on.
    Enable(Capability),
    /// Turn a capability off.
    Disable(Capability),
    /// Depth comparison.
    DepthFunc(CompareFunc),
    /// Depth writes on or off.
    DepthMask(bool),
    /// Blend factors for all channels.
    BlendFunc {
        /// Source factor.
        src: BlendFactor,
        /// Destination factor.
        dst: BlendFactor,
    },
    /// Separate color/alpha blend factors.
    BlendFuncSeparate {
        /// Source color factor.
        src_rgb: BlendFactor,
        /// Destination color factor.
        dst_rgb: BlendFactor,
        /// Source alpha factor.
        src_alpha: BlendFactor,
        /// Destination alpha factor.
        dst_alpha: BlendFactor,
    },
    /// Per-channel color write mask (RGBA).
    ColorMask([bool; 4]),
    /// Which faces culling removes.
    CullFace(Face),
    /// Front-face winding.
    FrontFace(Winding),
}

/// Value of the device's cumulative error flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceErrorCode {
    /// An enum argument was out of range.
    InvalidEnum,
    /// A numeric argument was out of range.
    InvalidValue,
    /// The operation is not allowed in the current state.
    InvalidOperation,
    /// The bound framebuffer is not complete.
    InvalidFramebufferOperation,
    /// Memory exhausted.
    OutOfMemory,
    /// Any other native code.
    Other(u32),
}

impl fmt::Display for DeviceErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnum => f.write_str("GL_INVALID_ENUM"),
            Self::InvalidValue => f.write_str("GL_INVALID_VALUE"),
            Self::InvalidOperation => f.write_str("GL_INVALID_OPERATION"),
            Self::InvalidFramebufferOperation => {
                f.write_str("GL_INVALID_FRAMEBUFFER_OPERATION")
            }
            Self::OutOfMemory => f.write_str("GL_OUT_OF_MEMORY"),
            Self::Other(code) => write!(f, "unknown error code {code:#x}"),
        }
    }
}

/// Layout of one attribute location inside the bound array buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttribLayout {
    /// Components per element (1 to 4).
    pub components: u32,
    /// Component kind. Integer kinds are passed through unconverted.
    pub kind: ScalarKind,
    /// Bytes between consecutive vertices.
    pub stride: u32,
    /// Byte offset of the first component.
    pub offset: u32,
}

/// Result of a compile or link step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOutput<T> {
    /// The native object, valid even on failure so it can be deleted.
    pub handle: T,
    /// Whether the step succeeded.
    pub success: bool,
    /// Compiler or linker info log.
    pub info_log: String,
}

/// A stateful, GL-style graphics context.
///
/// Object creation returns [`RenderError::Allocation`] when the context
/// cannot produce a handle. Everything else reports failure through the
/// cumulative error flag read by [`Device::poll_error`], the way the native
/// API does.
pub trait Device {
    // -- buffers --

    /// Create a buffer object.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Allocation`] if the device cannot create the
    /// object.
    fn create_buffer(&self) -> Result<BufferId, RenderError>;
    /// Delete a buffer object.
    fn delete_buffer(&self, id: BufferId);
    /// Bind a buffer (or unbind with `None`).
    fn bind_buffer(&self, target: BufferTarget, id: Option<BufferId>);
    /// (Re)allocate uninitialized storage for the bound buffer.
    fn buffer_storage(&self, target: BufferTarget, size_bytes: usize);
    /// Write bytes into the bound buffer.
    fn buffer_sub_data(&self, target: BufferTarget, offset: usize, data: &[u8]);
    /// Read bytes back from the bound buffer.
    fn get_buffer_sub_data(
        &self,
        target: BufferTarget,
        offset: usize,
        out: &mut [u8],
    );

    // -- textures --

    /// Create a texture object.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Allocation`] if the device cannot create the
    /// object.
    fn create_texture(&self) -> Result<TextureId, RenderError>;
    /// Delete a texture object.
    fn delete_texture(&self, id: TextureId);
    /// Select the texture unit later binds apply to.
    fn active_texture(&self, unit: u32);
    /// Bind a texture to the active unit.
    fn bind_texture(&self, target: TextureTarget, id: Option<TextureId>);
    /// (Re)allocate storage for the bound texture, optionally filled.
    ///
    /// `extents` uses 1 for unused trailing axes.
    fn tex_image(
        &self,
        target: TextureTarget,
        format: TextureFormat,
        extents: [u32; 3],
        data: Option<TexelData<'_>>,
    );
    /// Overwrite the full contents of the bound texture.
    fn tex_sub_image(
        &self,
        target: TextureTarget,
        format: TextureFormat,
        extents: [u32; 3],
        data: TexelData<'_>,
    );
    /// Configure sampling of the bound texture.
    fn tex_sampler(&self, target: TextureTarget, sampler: SamplerState);
    /// Build the mip chain of the bound texture.
    fn generate_mipmap(&self, target: TextureTarget);
    /// Read the bound texture's base level as floats, `channels` per texel.
    fn get_tex_image(&self, target: TextureTarget, channels: u32, out: &mut [f32]);

    // -- renderbuffers --

    /// Create a renderbuffer object.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Allocation`] if the device cannot create the
    /// object.
    fn create_renderbuffer(&self) -> Result<RenderbufferId, RenderError>;
    /// Delete a renderbuffer object.
    fn delete_renderbuffer(&self, id: RenderbufferId);
    /// (Re)allocate renderbuffer storage. Contents are undefined afterwards.
    fn renderbuffer_storage(
        &self,
        id: RenderbufferId,
        kind: RenderBufferType,
        width: u32,
        height: u32,
    );

    // -- framebuffers --

    /// Create a framebuffer object.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Allocation`] if the device cannot create the
    /// object.
    fn create_framebuffer(&self) -> Result<FramebufferId, RenderError>;
    /// Delete a framebuffer object.
    fn delete_framebuffer(&self, id: FramebufferId);
    /// Bind a framebuffer; `None` is the window framebuffer.
    fn bind_framebuffer(&self, target: FramebufferTarget, id: Option<FramebufferId>);
    /// Attach a renderbuffer to the bound draw framebuffer.
    fn framebuffer_renderbuffer(&self, attachment: Attachment, id: RenderbufferId);
    /// Attach a 2D texture to the bound draw framebuffer.
    fn framebuffer_texture(&self, attachment: Attachment, id: TextureId);
    /// Route fragment outputs 0..count to color slots 0..count.
    fn draw_buffers(&self, count: u32);
    /// Whether the bound draw framebuffer is complete.
    fn check_framebuffer_status(&self) -> bool;
    /// Set the viewport transform.
    fn viewport(&self, rect: Rect);
    /// Clear planes of the bound draw framebuffer.
    fn clear(&self, color: [f32; 4], depth: f32, mask: ClearMask);
    /// Read pixels from the bound read framebuffer as floats.
    ///
    /// Rows are bottom-up; `out` holds `rect.area() * format.channels()`.
    fn read_pixels_f32(&self, rect: Rect, format: ReadFormat, out: &mut [f32]);
    /// Read RGBA bytes from the bound read framebuffer.
    fn read_pixels_u8(&self, rect: Rect, out: &mut [u8]);
    /// Copy color from the read framebuffer into the draw framebuffer.
    fn blit_framebuffer(&self, src: Rect, dst: Rect, filter: TextureFilter);
    /// Submit queued commands.
    fn flush(&self);
    /// Block until every queued command has completed.
    fn finish(&self);
    /// Size of the window framebuffer.
    fn default_framebuffer_size(&self) -> (u32, u32);

    // -- programs --

    /// Compile one stage.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Allocation`] if no shader object can be
    /// created. Compile failures are reported through the output, not as
    /// errors.
    fn compile_shader(
        &self,
        stage: ShaderStageType,
        source: &str,
    ) -> Result<CompileOutput<ShaderId>, RenderError>;
    /// Delete a compiled stage.
    fn delete_shader(&self, id: ShaderId);
    /// Link compiled stages into a program.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Allocation`] if no program object can be
    /// created. Link failures are reported through the output.
    fn link_program(
        &self,
        shaders: &[ShaderId],
    ) -> Result<CompileOutput<ProgramId>, RenderError>;
    /// Delete a program.
    fn delete_program(&self, id: ProgramId);
    /// Make a program current (`None` unbinds).
    fn use_program(&self, id: Option<ProgramId>);
    /// Location of an active uniform, `None` if it was optimized out.
    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation>;
    /// Location of an active attribute, `None` if it was optimized out.
    fn attrib_location(&self, program: ProgramId, name: &str) -> Option<u32>;
    /// Set a uniform of the current program.
    fn set_uniform(&self, location: UniformLocation, value: &UniformValue);

    // -- vertex arrays and draws --

    /// Create a vertex-array object.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Allocation`] if the device cannot create the
    /// object.
    fn create_vertex_array(&self) -> Result<VertexArrayId, RenderError>;
    /// Delete a vertex-array object.
    fn delete_vertex_array(&self, id: VertexArrayId);
    /// Bind a vertex-array object (`None` unbinds).
    fn bind_vertex_array(&self, id: Option<VertexArrayId>);
    /// Enable `location` of the bound vertex array and source it from the
    /// bound array buffer.
    fn vertex_attrib_pointer(&self, location: u32, layout: AttribLayout);
    /// Enable primitive restart with the given index, or disable it.
    fn set_primitive_restart(&self, index: Option<u32>);
    /// Non-indexed draw.
    fn draw_arrays(&self, primitive: Primitive, first: u32, count: u32);
    /// Non-indexed instanced draw.
    fn draw_arrays_instanced(
        &self,
        primitive: Primitive,
        first: u32,
        count: u32,
        instances: u32,
    );
    /// Indexed draw using `u32` indices from the bound element buffer.
    fn draw_elements(&self, primitive: Primitive, count: u32);

    // -- global state --

    /// Apply one fixed-function state change.
    fn apply_state(&self, change: StateChange);
    /// Take and clear the cumulative error flag.
    fn poll_error(&self) -> Option<DeviceErrorCode>;
    /// Number of texture units a single program may sample from.
    fn max_texture_units(&self) -> u32;
}
