//! [`Device`] over a live OpenGL 3.3+ context through `glow`.
//!
//! Every call assumes the context is current on the calling thread. The
//! device never makes it current itself; that is the windowing layer's job.

use std::cell::Cell;
use std::num::NonZeroU32;

use glow::HasContext;

use super::{
    AttribLayout, Attachment, BlendFactor, BufferId, BufferTarget, Capability,
    ClearMask, CompareFunc, CompileOutput, Device, DeviceErrorCode, Face,
    FramebufferId, FramebufferTarget, Primitive, ProgramId, ReadFormat, Rect,
    RenderbufferId, SamplerState, ScalarKind, ShaderId, StateChange,
    TexelData, TextureFilter, TextureId, TextureTarget, TextureWrap,
    UniformLocation, VertexArrayId, Winding,
};
use crate::error::RenderError;
use crate::gpu::data_type::UniformValue;
use crate::gpu::format::{RenderBufferType, TextureFormat};
use crate::shader::ShaderStageType;

/// OpenGL device.
pub struct GlDevice {
    gl: glow::Context,
    max_units: u32,
    window_size: Cell<(u32, u32)>,
}

impl GlDevice {
    /// Wrap a context whose window framebuffer has the given size.
    #[must_use]
    pub fn new(gl: glow::Context, window_width: u32, window_height: u32) -> Self {
        let max_units = unsafe {
            gl.get_parameter_i32(glow::MAX_TEXTURE_IMAGE_UNITS).max(1) as u32
        };
        log::info!(
            "GL device: {} ({} texture units)",
            unsafe { gl.get_parameter_string(glow::RENDERER) },
            max_units
        );
        Self {
            gl,
            max_units,
            window_size: Cell::new((window_width, window_height)),
        }
    }

    /// Record a new window framebuffer size after the surface was resized.
    pub fn set_window_size(&self, width: u32, height: u32) {
        self.window_size.set((width, height));
    }

    /// The wrapped context.
    #[must_use]
    pub const fn context(&self) -> &glow::Context {
        &self.gl
    }
}

fn buffer_target(target: BufferTarget) -> u32 {
    match target {
        BufferTarget::Array => glow::ARRAY_BUFFER,
        BufferTarget::ElementArray => glow::ELEMENT_ARRAY_BUFFER,
    }
}

fn texture_target(target: TextureTarget) -> u32 {
    match target {
        TextureTarget::D1 => glow::TEXTURE_1D,
        TextureTarget::D2 => glow::TEXTURE_2D,
        TextureTarget::D3 => glow::TEXTURE_3D,
    }
}

fn framebuffer_target(target: FramebufferTarget) -> u32 {
    match target {
        FramebufferTarget::Both => glow::FRAMEBUFFER,
        FramebufferTarget::Read => glow::READ_FRAMEBUFFER,
        FramebufferTarget::Draw => glow::DRAW_FRAMEBUFFER,
    }
}

fn attachment_point(attachment: Attachment) -> u32 {
    match attachment {
        Attachment::Color(slot) => glow::COLOR_ATTACHMENT0 + slot,
        Attachment::Depth => glow::DEPTH_ATTACHMENT,
    }
}

/// `(internal format, pixel format)` of a texture format.
fn texture_format(format: TextureFormat) -> (u32, u32) {
    match format {
        TextureFormat::Rgb8 => (glow::RGB8, glow::RGB),
        TextureFormat::Rgba8 => (glow::RGBA8, glow::RGBA),
        TextureFormat::Rg16F => (glow::RG16F, glow::RG),
        TextureFormat::Rgb16F => (glow::RGB16F, glow::RGB),
        TextureFormat::Rgba16F => (glow::RGBA16F, glow::RGBA),
        TextureFormat::R32F => (glow::R32F, glow::RED),
        TextureFormat::R16F => (glow::R16F, glow::RED),
        TextureFormat::Rgb32F => (glow::RGB32F, glow::RGB),
        TextureFormat::Rgba32F => (glow::RGBA32F, glow::RGBA),
        TextureFormat::Depth24 => {
            (glow::DEPTH_COMPONENT24, glow::DEPTH_COMPONENT)
        }
    }
}

fn renderbuffer_format(kind: RenderBufferType) -> u32 {
    match kind {
        RenderBufferType::ColorAlpha => glow::RGBA8,
        RenderBufferType::Color => glow::RGB8,
        RenderBufferType::Depth => glow::DEPTH_COMPONENT24,
        RenderBufferType::Float4 => glow::RGBA32F,
    }
}

fn channel_format(channels: u32) -> u32 {
    match channels {
        1 => glow::RED,
        2 => glow::RG,
        3 => glow::RGB,
        _ => glow::RGBA,
    }
}

fn filter(filter: TextureFilter) -> i32 {
    (match filter {
        TextureFilter::Nearest => glow::NEAREST,
        TextureFilter::Linear => glow::LINEAR,
        TextureFilter::LinearMipmapLinear => glow::LINEAR_MIPMAP_LINEAR,
    }) as i32
}

fn primitive(primitive: Primitive) -> u32 {
    match primitive {
        Primitive::Points => glow::POINTS,
        Primitive::Lines => glow::LINES,
        Primitive::LineStrip => glow::LINE_STRIP,
        Primitive::LinesAdjacency => glow::LINES_ADJACENCY,
        Primitive::LineStripAdjacency => glow::LINE_STRIP_ADJACENCY,
        Primitive::Triangles => glow::TRIANGLES,
        Primitive::TriangleStrip => glow::TRIANGLE_STRIP,
        Primitive::TrianglesAdjacency => glow::TRIANGLES_ADJACENCY,
    }
}

fn capability(cap: Capability) -> u32 {
    match cap {
        Capability::DepthTest => glow::DEPTH_TEST,
        Capability::Blend => glow::BLEND,
        Capability::CullFace => glow::CULL_FACE,
    }
}

fn compare(func: CompareFunc) -> u32 {
    match func {
        CompareFunc::Never => glow::NEVER,
        CompareFunc::Less => glow::LESS,
        CompareFunc::Equal => glow::EQUAL,
        CompareFunc::LEqual => glow::LEQUAL,
        CompareFunc::Greater => glow::GREATER,
        CompareFunc::Always => glow::ALWAYS,
    }
}

fn blend(factor: BlendFactor) -> u32 {
    match factor {
        BlendFactor::Zero => glow::ZERO,
        BlendFactor::One => glow::ONE,
        BlendFactor::SrcAlpha => glow::SRC_ALPHA,
        BlendFactor::OneMinusSrcAlpha => glow::ONE_MINUS_SRC_ALPHA,
        BlendFactor::DstAlpha => glow::DST_ALPHA,
        BlendFactor::OneMinusDstAlpha => glow::ONE_MINUS_DST_ALPHA,
    }
}

fn shader_kind(stage: ShaderStageType) -> u32 {
    match stage {
        ShaderStageType::Vertex => glow::VERTEX_SHADER,
        ShaderStageType::Geometry => glow::GEOMETRY_SHADER,
        ShaderStageType::Fragment => glow::FRAGMENT_SHADER,
    }
}

fn error_code(code: u32) -> DeviceErrorCode {
    match code {
        glow::INVALID_ENUM => DeviceErrorCode::InvalidEnum,
        glow::INVALID_VALUE => DeviceErrorCode::InvalidValue,
        glow::INVALID_OPERATION => DeviceErrorCode::InvalidOperation,
        glow::INVALID_FRAMEBUFFER_OPERATION => {
            DeviceErrorCode::InvalidFramebufferOperation
        }
        glow::OUT_OF_MEMORY => DeviceErrorCode::OutOfMemory,
        other => DeviceErrorCode::Other(other),
    }
}

fn nz(raw: u32) -> Option<NonZeroU32> {
    NonZeroU32::new(raw)
}

impl GlDevice {
    fn upload(
        &self,
        target: TextureTarget,
        format: TextureFormat,
        extents: [u32; 3],
        data: Option<TexelData<'_>>,
    ) {
        let (internal, pixel) = texture_format(format);
        let (ty, bytes): (u32, Option<&[u8]>) = match data {
            Some(TexelData::Bytes(b)) => (glow::UNSIGNED_BYTE, Some(b)),
            Some(TexelData::Floats(f)) => {
                (glow::FLOAT, Some(bytemuck::cast_slice(f)))
            }
            None if format.is_normalized_byte() => (glow::UNSIGNED_BYTE, None),
            None => (glow::FLOAT, None),
        };
        let [w, h, d] = extents.map(|e| e as i32);
        let gl_target = texture_target(target);
        unsafe {
            self.gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
            match target {
                TextureTarget::D1 => self.gl.tex_image_1d(
                    gl_target,
                    0,
                    internal as i32,
                    w,
                    0,
                    pixel,
                    ty,
                    bytes,
                ),
                TextureTarget::D2 => self.gl.tex_image_2d(
                    gl_target,
                    0,
                    internal as i32,
                    w,
                    h,
                    0,
                    pixel,
                    ty,
                    bytes,
                ),
                TextureTarget::D3 => self.gl.tex_image_3d(
                    gl_target,
                    0,
                    internal as i32,
                    w,
                    h,
                    d,
                    0,
                    pixel,
                    ty,
                    bytes,
                ),
            }
        }
    }
}

impl Device for GlDevice {
    fn create_buffer(&self) -> Result<BufferId, RenderError> {
        let buffer =
            unsafe { self.gl.create_buffer() }.map_err(RenderError::Allocation)?;
        Ok(BufferId(buffer.0.get()))
    }

    fn delete_buffer(&self, id: BufferId) {
        if let Some(raw) = nz(id.0) {
            unsafe { self.gl.delete_buffer(glow::NativeBuffer(raw)) };
        }
    }

    fn bind_buffer(&self, target: BufferTarget, id: Option<BufferId>) {
        let native = id.and_then(|b| nz(b.0)).map(glow::NativeBuffer);
        unsafe { self.gl.bind_buffer(buffer_target(target), native) };
    }

    fn buffer_storage(&self, target: BufferTarget, size_bytes: usize) {
        unsafe {
            self.gl.buffer_data_size(
                buffer_target(target),
                size_bytes as i32,
                glow::STATIC_DRAW,
            );
        }
    }

    fn buffer_sub_data(&self, target: BufferTarget, offset: usize, data: &[u8]) {
        unsafe {
            self.gl.buffer_sub_data_u8_slice(
                buffer_target(target),
                offset as i32,
                data,
            );
        }
    }

    fn get_buffer_sub_data(
        &self,
        target: BufferTarget,
        offset: usize,
        out: &mut [u8],
    ) {
        unsafe {
            self.gl
                .get_buffer_sub_data(buffer_target(target), offset as i32, out);
        }
    }

    fn create_texture(&self) -> Result<TextureId, RenderError> {
        let texture =
            unsafe { self.gl.create_texture() }.map_err(RenderError::Allocation)?;
        Ok(TextureId(texture.0.get()))
    }

    fn delete_texture(&self, id: TextureId) {
        if let Some(raw) = nz(id.0) {
            unsafe { self.gl.delete_texture(glow::NativeTexture(raw)) };
        }
    }

    fn active_texture(&self, unit: u32) {
        unsafe { self.gl.active_texture(glow::TEXTURE0 + unit) };
    }

    fn bind_texture(&self, target: TextureTarget, id: Option<TextureId>) {
        let native = id.and_then(|t| nz(t.0)).map(glow::NativeTexture);
        unsafe { self.gl.bind_texture(texture_target(target), native) };
    }

    fn tex_image(
        &self,
        target: TextureTarget,
        format: TextureFormat,
        extents: [u32; 3],
        data: Option<TexelData<'_>>,
    ) {
        self.upload(target, format, extents, data);
    }

    fn tex_sub_image(
        &self,
        target: TextureTarget,
        format: TextureFormat,
        extents: [u32; 3],
        data: TexelData<'_>,
    ) {
        // Full-extent overwrite; same storage, same result.
        self.upload(target, format, extents, Some(data));
    }

    fn tex_sampler(&self, target: TextureTarget, sampler: SamplerState) {
        let t = texture_target(target);
        let wrap = (match sampler.wrap {
            TextureWrap::ClampToEdge => glow::CLAMP_TO_EDGE,
            TextureWrap::Repeat => glow::REPEAT,
        }) as i32;
        unsafe {
            self.gl.tex_parameter_i32(t, glow::TEXTURE_MIN_FILTER, filter(sampler.min_filter));
            self.gl.tex_parameter_i32(t, glow::TEXTURE_MAG_FILTER, filter(sampler.mag_filter));
            self.gl.tex_parameter_i32(t, glow::TEXTURE_WRAP_S, wrap);
            if target.dimension() >= 2 {
                self.gl.tex_parameter_i32(t, glow::TEXTURE_WRAP_T, wrap);
            }
            if target.dimension() >= 3 {
                self.gl.tex_parameter_i32(t, glow::TEXTURE_WRAP_R, wrap);
            }
        }
    }

    fn generate_mipmap(&self, target: TextureTarget) {
        unsafe { self.gl.generate_mipmap(texture_target(target)) };
    }

    fn get_tex_image(&self, target: TextureTarget, channels: u32, out: &mut [f32]) {
        unsafe {
            self.gl.pixel_store_i32(glow::PACK_ALIGNMENT, 1);
            self.gl.get_tex_image(
                texture_target(target),
                0,
                channel_format(channels),
                glow::FLOAT,
                glow::PixelPackData::Slice(bytemuck::cast_slice_mut(out)),
            );
        }
    }

    fn create_renderbuffer(&self) -> Result<RenderbufferId, RenderError> {
        let rb = unsafe { self.gl.create_renderbuffer() }
            .map_err(RenderError::Allocation)?;
        Ok(RenderbufferId(rb.0.get()))
    }

    fn delete_renderbuffer(&self, id: RenderbufferId) {
        if let Some(raw) = nz(id.0) {
            unsafe { self.gl.delete_renderbuffer(glow::NativeRenderbuffer(raw)) };
        }
    }

    fn renderbuffer_storage(
        &self,
        id: RenderbufferId,
        kind: RenderBufferType,
        width: u32,
        height: u32,
    ) {
        let native = nz(id.0).map(glow::NativeRenderbuffer);
        unsafe {
            self.gl.bind_renderbuffer(glow::RENDERBUFFER, native);
            self.gl.renderbuffer_storage(
                glow::RENDERBUFFER,
                renderbuffer_format(kind),
                width as i32,
                height as i32,
            );
        }
    }

    fn create_framebuffer(&self) -> Result<FramebufferId, RenderError> {
        let fb = unsafe { self.gl.create_framebuffer() }
            .map_err(RenderError::Allocation)?;
        Ok(FramebufferId(fb.0.get()))
    }

    fn delete_framebuffer(&self, id: FramebufferId) {
        if let Some(raw) = nz(id.0) {
            unsafe { self.gl.delete_framebuffer(glow::NativeFramebuffer(raw)) };
        }
    }

    fn bind_framebuffer(&self, target: FramebufferTarget, id: Option<FramebufferId>) {
        let native = id.and_then(|f| nz(f.0)).map(glow::NativeFramebuffer);
        unsafe {
            self.gl.bind_framebuffer(framebuffer_target(target), native);
        }
    }

    fn framebuffer_renderbuffer(&self, attachment: Attachment, id: RenderbufferId) {
        let native = nz(id.0).map(glow::NativeRenderbuffer);
        unsafe {
            self.gl.framebuffer_renderbuffer(
                glow::DRAW_FRAMEBUFFER,
                attachment_point(attachment),
                glow::RENDERBUFFER,
                native,
            );
        }
    }

    fn framebuffer_texture(&self, attachment: Attachment, id: TextureId) {
        let native = nz(id.0).map(glow::NativeTexture);
        unsafe {
            self.gl.framebuffer_texture_2d(
                glow::DRAW_FRAMEBUFFER,
                attachment_point(attachment),
                glow::TEXTURE_2D,
                native,
                0,
            );
        }
    }

    fn draw_buffers(&self, count: u32) {
        let slots: Vec<u32> =
            (0..count).map(|i| glow::COLOR_ATTACHMENT0 + i).collect();
        unsafe { self.gl.draw_buffers(&slots) };
    }

    fn check_framebuffer_status(&self) -> bool {
        unsafe {
            self.gl.check_framebuffer_status(glow::DRAW_FRAMEBUFFER)
                == glow::FRAMEBUFFER_COMPLETE
        }
    }

    fn viewport(&self, rect: Rect) {
        unsafe {
            self.gl.viewport(
                rect.x,
                rect.y,
                rect.width as i32,
                rect.height as i32,
            );
        }
    }

    fn clear(&self, color: [f32; 4], depth: f32, mask: ClearMask) {
        let mut bits = 0;
        if mask.color {
            bits |= glow::COLOR_BUFFER_BIT;
        }
        if mask.depth {
            bits |= glow::DEPTH_BUFFER_BIT;
        }
        if mask.stencil {
            bits |= glow::STENCIL_BUFFER_BIT;
        }
        unsafe {
            self.gl.clear_color(color[0], color[1], color[2], color[3]);
            self.gl.clear_depth_f32(depth);
            self.gl.clear(bits);
        }
    }

    fn read_pixels_f32(&self, rect: Rect, format: ReadFormat, out: &mut [f32]) {
        let pixel = match format {
            ReadFormat::Rgba => glow::RGBA,
            ReadFormat::Depth => glow::DEPTH_COMPONENT,
        };
        unsafe {
            self.gl.pixel_store_i32(glow::PACK_ALIGNMENT, 1);
            self.gl.read_pixels(
                rect.x,
                rect.y,
                rect.width as i32,
                rect.height as i32,
                pixel,
                glow::FLOAT,
                glow::PixelPackData::Slice(bytemuck::cast_slice_mut(out)),
            );
        }
    }

    fn read_pixels_u8(&self, rect: Rect, out: &mut [u8]) {
        unsafe {
            self.gl.pixel_store_i32(glow::PACK_ALIGNMENT, 1);
            self.gl.read_pixels(
                rect.x,
                rect.y,
                rect.width as i32,
                rect.height as i32,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                glow::PixelPackData::Slice(out),
            );
        }
    }

    fn blit_framebuffer(&self, src: Rect, dst: Rect, mode: TextureFilter) {
        let gl_filter = match mode {
            TextureFilter::Nearest => glow::NEAREST,
            TextureFilter::Linear | TextureFilter::LinearMipmapLinear => {
                glow::LINEAR
            }
        };
        unsafe {
            self.gl.blit_framebuffer(
                src.x,
                src.y,
                src.x + src.width as i32,
                src.y + src.height as i32,
                dst.x,
                dst.y,
                dst.x + dst.width as i32,
                dst.y + dst.height as i32,
                glow::COLOR_BUFFER_BIT,
                gl_filter,
            );
        }
    }

    fn flush(&self) {
        unsafe { self.gl.flush() };
    }

    fn finish(&self) {
        unsafe { self.gl.finish() };
    }

    fn default_framebuffer_size(&self) -> (u32, u32) {
        self.window_size.get()
    }

    fn compile_shader(
        &self,
        stage: ShaderStageType,
        source: &str,
    ) -> Result<CompileOutput<ShaderId>, RenderError> {
        unsafe {
            let shader = self
                .gl
                .create_shader(shader_kind(stage))
                .map_err(RenderError::Allocation)?;
            self.gl.shader_source(shader, source);
            self.gl.compile_shader(shader);
            Ok(CompileOutput {
                handle: ShaderId(shader.0.get()),
                success: self.gl.get_shader_compile_status(shader),
                info_log: self.gl.get_shader_info_log(shader),
            })
        }
    }

    fn delete_shader(&self, id: ShaderId) {
        if let Some(raw) = nz(id.0) {
            unsafe { self.gl.delete_shader(glow::NativeShader(raw)) };
        }
    }

    fn link_program(
        &self,
        shaders: &[ShaderId],
    ) -> Result<CompileOutput<ProgramId>, RenderError> {
        unsafe {
            let program =
                self.gl.create_program().map_err(RenderError::Allocation)?;
            let natives: Vec<_> = shaders
                .iter()
                .filter_map(|s| nz(s.0))
                .map(glow::NativeShader)
                .collect();
            for shader in &natives {
                self.gl.attach_shader(program, *shader);
            }
            self.gl.link_program(program);
            for shader in &natives {
                self.gl.detach_shader(program, *shader);
            }
            Ok(CompileOutput {
                handle: ProgramId(program.0.get()),
                success: self.gl.get_program_link_status(program),
                info_log: self.gl.get_program_info_log(program),
            })
        }
    }

    fn delete_program(&self, id: ProgramId) {
        if let Some(raw) = nz(id.0) {
            unsafe { self.gl.delete_program(glow::NativeProgram(raw)) };
        }
    }

    fn use_program(&self, id: Option<ProgramId>) {
        let native = id.and_then(|p| nz(p.0)).map(glow::NativeProgram);
        unsafe { self.gl.use_program(native) };
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        let native = glow::NativeProgram(nz(program.0)?);
        unsafe { self.gl.get_uniform_location(native, name) }
            .map(|loc| UniformLocation(loc.0))
    }

    fn attrib_location(&self, program: ProgramId, name: &str) -> Option<u32> {
        let native = glow::NativeProgram(nz(program.0)?);
        unsafe { self.gl.get_attrib_location(native, name) }
    }

    fn set_uniform(&self, location: UniformLocation, value: &UniformValue) {
        let loc = glow::NativeUniformLocation(location.0);
        let loc = Some(&loc);
        unsafe {
            match *value {
                UniformValue::Int(v) => self.gl.uniform_1_i32(loc, v),
                UniformValue::UInt(v) => self.gl.uniform_1_u32(loc, v),
                UniformValue::Float(v) => self.gl.uniform_1_f32(loc, v),
                UniformValue::Vec2(v) => self.gl.uniform_2_f32(loc, v.x, v.y),
                UniformValue::Vec3(v) => {
                    self.gl.uniform_3_f32(loc, v.x, v.y, v.z);
                }
                UniformValue::Vec4(v) => {
                    self.gl.uniform_4_f32(loc, v.x, v.y, v.z, v.w);
                }
                UniformValue::UVec2(v) => self.gl.uniform_2_u32(loc, v.x, v.y),
                UniformValue::UVec3(v) => {
                    self.gl.uniform_3_u32(loc, v.x, v.y, v.z);
                }
                UniformValue::UVec4(v) => {
                    self.gl.uniform_4_u32(loc, v.x, v.y, v.z, v.w);
                }
                UniformValue::Mat4(m) => self.gl.uniform_matrix_4_f32_slice(
                    loc,
                    false,
                    &m.to_cols_array(),
                ),
            }
        }
    }

    fn create_vertex_array(&self) -> Result<VertexArrayId, RenderError> {
        let vao = unsafe { self.gl.create_vertex_array() }
            .map_err(RenderError::Allocation)?;
        Ok(VertexArrayId(vao.0.get()))
    }

    fn delete_vertex_array(&self, id: VertexArrayId) {
        if let Some(raw) = nz(id.0) {
            unsafe { self.gl.delete_vertex_array(glow::NativeVertexArray(raw)) };
        }
    }

    fn bind_vertex_array(&self, id: Option<VertexArrayId>) {
        let native = id.and_then(|v| nz(v.0)).map(glow::NativeVertexArray);
        unsafe { self.gl.bind_vertex_array(native) };
    }

    fn vertex_attrib_pointer(&self, location: u32, layout: AttribLayout) {
        let size = layout.components as i32;
        let stride = layout.stride as i32;
        let offset = layout.offset as i32;
        unsafe {
            self.gl.enable_vertex_attrib_array(location);
            match layout.kind {
                ScalarKind::Float => self.gl.vertex_attrib_pointer_f32(
                    location,
                    size,
                    glow::FLOAT,
                    false,
                    stride,
                    offset,
                ),
                ScalarKind::Int => self.gl.vertex_attrib_pointer_i32(
                    location, size, glow::INT, stride, offset,
                ),
                ScalarKind::UInt => self.gl.vertex_attrib_pointer_i32(
                    location,
                    size,
                    glow::UNSIGNED_INT,
                    stride,
                    offset,
                ),
            }
        }
    }

    fn set_primitive_restart(&self, index: Option<u32>) {
        // Only the fixed all-ones index is portable through glow.
        unsafe {
            match index {
                Some(i) => {
                    if i != u32::MAX {
                        log::warn!(
                            "primitive restart index {i} is not supported, \
                             using {}",
                            u32::MAX
                        );
                    }
                    self.gl.enable(glow::PRIMITIVE_RESTART_FIXED_INDEX);
                }
                None => self.gl.disable(glow::PRIMITIVE_RESTART_FIXED_INDEX),
            }
        }
    }

    fn draw_arrays(&self, prim: Primitive, first: u32, count: u32) {
        unsafe {
            self.gl.draw_arrays(primitive(prim), first as i32, count as i32);
        }
    }

    fn draw_arrays_instanced(
        &self,
        prim: Primitive,
        first: u32,
        count: u32,
        instances: u32,
    ) {
        unsafe {
            self.gl.draw_arrays_instanced(
                primitive(prim),
                first as i32,
                count as i32,
                instances as i32,
            );
        }
    }

    fn draw_elements(&self, prim: Primitive, count: u32) {
        unsafe {
            self.gl.draw_elements(
                primitive(prim),
                count as i32,
                glow::UNSIGNED_INT,
                0,
            );
        }
    }

    fn apply_state(&self, change: StateChange) {
        unsafe {
            match change {
                StateChange::Enable(cap) => self.gl.enable(capability(cap)),
                StateChange::Disable(cap) => self.gl.disable(capability(cap)),
                StateChange::DepthFunc(func) => self.gl.depth_func(compare(func)),
                StateChange::DepthMask(on) => self.gl.depth_mask(on),
                StateChange::BlendFunc { src, dst } => {
                    self.gl.blend_func(blend(src), blend(dst));
                }
                StateChange::BlendFuncSeparate {
                    src_rgb,
                    dst_rgb,
                    src_alpha,
                    dst_alpha,
                } => self.gl.blend_func_separate(
                    blend(src_rgb),
                    blend(dst_rgb),
                    blend(src_alpha),
                    blend(dst_alpha),
                ),
                StateChange::ColorMask([r, g, b, a]) => {
                    self.gl.color_mask(r, g, b, a);
                }
                StateChange::CullFace(face) => self.gl.cull_face(match face {
                    Face::Front => glow::FRONT,
                    Face::Back => glow::BACK,
                }),
                StateChange::FrontFace(winding) => {
                    self.gl.front_face(match winding {
                        Winding::Ccw => glow::CCW,
                        Winding::Cw => glow::CW,
                    });
                }
            }
        }
    }

    fn poll_error(&self) -> Option<DeviceErrorCode> {
        let code = unsafe { self.gl.get_error() };
        (code != glow::NO_ERROR).then(|| error_code(code))
    }

    fn max_texture_units(&self) -> u32 {
        self.max_units
    }
}
