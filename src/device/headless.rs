//! In-memory software implementation of [`Device`].
//!
//! Object storage, framebuffer completeness, clears, read-backs and blits
//! behave like a real context. The "compiler" only checks for `#error`
//! directives and balanced braces; its linker treats a name as active when
//! it is referenced at least once beyond its declaration, which is enough to
//! model the optimizer dropping unused interface names. Draw calls are
//! recorded, not rasterized.

use std::cell::RefCell;

use half::f16;
use rustc_hash::{FxHashMap, FxHashSet};

use super::{
    AttribLayout, Attachment, BufferId, BufferTarget, Capability, ClearMask,
    CompileOutput, Device, DeviceErrorCode, FramebufferId, FramebufferTarget,
    Primitive, ProgramId, ReadFormat, Rect, RenderbufferId, SamplerState,
    ShaderId, StateChange, TexelData, TextureFilter, TextureId,
    TextureTarget, UniformLocation, VertexArrayId,
};
use crate::error::RenderError;
use crate::gpu::data_type::UniformValue;
use crate::gpu::format::{RenderBufferType, TextureFormat};
use crate::shader::ShaderStageType;

const DEFAULT_WINDOW_SIZE: (u32, u32) = (800, 600);
const DEFAULT_TEXTURE_UNITS: u32 = 16;
const MAX_COLOR_SLOTS: u32 = 8;
/// Attribute locations reserved per declared attribute (max array count).
const ATTRIB_LOCATION_STRIDE: u32 = 4;

/// A draw call as the device received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawCall {
    /// Program that was current.
    pub program: ProgramId,
    /// Vertex array that was bound.
    pub vertex_array: VertexArrayId,
    /// Draw framebuffer (`None` for the window).
    pub framebuffer: Option<FramebufferId>,
    /// Topology.
    pub primitive: Primitive,
    /// First vertex (non-indexed draws).
    pub first: u32,
    /// Vertex or index count.
    pub count: u32,
    /// Instance count for instanced draws.
    pub instances: Option<u32>,
    /// Whether indices came from the element buffer.
    pub indexed: bool,
    /// Primitive-restart index in effect.
    pub restart_index: Option<u32>,
    /// Bound 1D/2D/3D textures by unit, sorted by unit.
    pub textures: Vec<(u32, TextureId)>,
}

#[derive(Debug, Clone)]
struct Image {
    format: TextureFormat,
    extents: [u32; 3],
    data: Vec<f32>,
}

impl Image {
    fn new(format: TextureFormat, extents: [u32; 3]) -> Self {
        let len = texel_count(extents) * format.channels() as usize;
        Self {
            format,
            extents,
            data: vec![0.0; len],
        }
    }

    fn channels(&self) -> usize {
        self.format.channels() as usize
    }

    fn size_2d(&self) -> (u32, u32) {
        (self.extents[0], self.extents[1])
    }

    fn fill(&mut self, data: TexelData<'_>) {
        let format = self.format;
        match data {
            TexelData::Bytes(bytes) => {
                for (dst, &b) in self.data.iter_mut().zip(bytes) {
                    *dst = quantize(format, f32::from(b) / 255.0);
                }
            }
            TexelData::Floats(floats) => {
                for (dst, &v) in self.data.iter_mut().zip(floats) {
                    *dst = quantize(format, v);
                }
            }
        }
    }

    /// Texel `(x, y)` widened to RGBA (alpha defaults to 1).
    fn rgba(&self, x: u32, y: u32) -> [f32; 4] {
        let mut out = [0.0, 0.0, 0.0, 1.0];
        let (w, h) = self.size_2d();
        if x >= w || y >= h {
            return [0.0; 4];
        }
        let ch = self.channels();
        let base = (y as usize * w as usize + x as usize) * ch;
        for (c, slot) in out.iter_mut().enumerate().take(ch) {
            *slot = self.data[base + c];
        }
        out
    }

    fn set_rgba(&mut self, x: u32, y: u32, value: [f32; 4]) {
        let (w, h) = self.size_2d();
        if x >= w || y >= h {
            return;
        }
        let ch = self.channels();
        let format = self.format;
        let base = (y as usize * w as usize + x as usize) * ch;
        for (c, v) in value.iter().enumerate().take(ch) {
            self.data[base + c] = quantize(format, *v);
        }
    }
}

fn texel_count(extents: [u32; 3]) -> usize {
    extents.iter().map(|&e| e as usize).product()
}

/// Round a value through the storage precision of `format`.
fn quantize(format: TextureFormat, v: f32) -> f32 {
    if format.is_normalized_byte() {
        (v.clamp(0.0, 1.0) * 255.0).round() / 255.0
    } else if format.is_half_float() {
        f16::from_f32(v).to_f32()
    } else if format.is_depth() {
        v.clamp(0.0, 1.0)
    } else {
        v
    }
}

#[derive(Debug, Default)]
struct TextureObject {
    target: Option<TextureTarget>,
    image: Option<Image>,
    sampler: SamplerState,
    has_mipmaps: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttachTarget {
    Texture(u32),
    Renderbuffer(u32),
}

#[derive(Debug, Default)]
struct FramebufferObject {
    colors: FxHashMap<u32, AttachTarget>,
    depth: Option<AttachTarget>,
    draw_buffers: u32,
}

#[derive(Debug)]
struct ShaderObject {
    stage: ShaderStageType,
    source: String,
    compiled: bool,
}

#[derive(Debug, Default)]
struct ProgramObject {
    linked: bool,
    all_refs: FxHashMap<String, usize>,
    vertex_refs: FxHashMap<String, usize>,
    uniforms: FxHashMap<String, u32>,
    attribs: FxHashMap<String, u32>,
    values: FxHashMap<u32, UniformValue>,
}

#[derive(Debug, Default)]
struct VertexArrayObject {
    element_buffer: Option<u32>,
    attribs: FxHashMap<u32, (u32, AttribLayout)>,
}

#[derive(Debug)]
struct State {
    next_id: u32,
    buffers: FxHashMap<u32, Vec<u8>>,
    array_buffer: Option<u32>,
    element_buffer: Option<u32>,
    textures: FxHashMap<u32, TextureObject>,
    active_unit: u32,
    unit_bindings: FxHashMap<(u32, TextureTarget), u32>,
    renderbuffers: FxHashMap<u32, Option<Image>>,
    framebuffers: FxHashMap<u32, FramebufferObject>,
    window_color: Image,
    window_depth: Image,
    read_fb: Option<u32>,
    draw_fb: Option<u32>,
    viewport: Rect,
    shaders: FxHashMap<u32, ShaderObject>,
    programs: FxHashMap<u32, ProgramObject>,
    current_program: Option<u32>,
    vertex_arrays: FxHashMap<u32, VertexArrayObject>,
    bound_vao: Option<u32>,
    restart: Option<u32>,
    error: Option<DeviceErrorCode>,
    enabled: FxHashSet<Capability>,
    state_log: Vec<StateChange>,
    draws: Vec<DrawCall>,
    compiled_sources: Vec<(ShaderStageType, String)>,
    finish_count: usize,
    force_incomplete: bool,
    max_units: u32,
    max_renderbuffer_size: u32,
}

impl State {
    fn new(width: u32, height: u32) -> Self {
        Self {
            next_id: 1,
            buffers: FxHashMap::default(),
            array_buffer: None,
            element_buffer: None,
            textures: FxHashMap::default(),
            active_unit: 0,
            unit_bindings: FxHashMap::default(),
            renderbuffers: FxHashMap::default(),
            framebuffers: FxHashMap::default(),
            window_color: Image::new(TextureFormat::Rgba8, [width, height, 1]),
            window_depth: Image::new(TextureFormat::Depth24, [width, height, 1]),
            read_fb: None,
            draw_fb: None,
            viewport: Rect::sized(width, height),
            shaders: FxHashMap::default(),
            programs: FxHashMap::default(),
            current_program: None,
            vertex_arrays: FxHashMap::default(),
            bound_vao: None,
            restart: None,
            error: None,
            enabled: FxHashSet::default(),
            state_log: Vec::new(),
            draws: Vec::new(),
            compiled_sources: Vec::new(),
            finish_count: 0,
            force_incomplete: false,
            max_units: DEFAULT_TEXTURE_UNITS,
            max_renderbuffer_size: u32::MAX,
        }
    }

    fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Record an error unless one is already pending.
    fn raise(&mut self, code: DeviceErrorCode) {
        if self.error.is_none() {
            self.error = Some(code);
        }
    }

    fn bound_buffer(&self, target: BufferTarget) -> Option<u32> {
        match target {
            BufferTarget::Array => self.array_buffer,
            BufferTarget::ElementArray => self.element_buffer,
        }
    }

    fn bound_texture_mut(
        &mut self,
        target: TextureTarget,
    ) -> Option<&mut TextureObject> {
        let id = *self.unit_bindings.get(&(self.active_unit, target))?;
        self.textures.get_mut(&id)
    }

    fn attachment_image(&self, target: AttachTarget) -> Option<&Image> {
        match target {
            AttachTarget::Texture(id) => self.textures.get(&id)?.image.as_ref(),
            AttachTarget::Renderbuffer(id) => {
                self.renderbuffers.get(&id)?.as_ref()
            }
        }
    }

    fn attachment_image_mut(&mut self, target: AttachTarget) -> Option<&mut Image> {
        match target {
            AttachTarget::Texture(id) => {
                self.textures.get_mut(&id)?.image.as_mut()
            }
            AttachTarget::Renderbuffer(id) => {
                self.renderbuffers.get_mut(&id)?.as_mut()
            }
        }
    }

    fn framebuffer_complete(&self, id: Option<u32>) -> bool {
        let Some(id) = id else {
            return true;
        };
        if self.force_incomplete {
            return false;
        }
        let Some(fb) = self.framebuffers.get(&id) else {
            return false;
        };
        let mut size = None;
        for target in fb.colors.values().chain(fb.depth.iter()) {
            let Some(image) = self.attachment_image(*target) else {
                return false;
            };
            match size {
                None => size = Some(image.size_2d()),
                Some(s) if s != image.size_2d() => return false,
                Some(_) => {}
            }
        }
        size.is_some()
    }

    /// Color images written by draws/clears/blits into `id`.
    fn draw_color_targets(&self, id: u32) -> Vec<AttachTarget> {
        let Some(fb) = self.framebuffers.get(&id) else {
            return Vec::new();
        };
        let count = fb.draw_buffers.max(1);
        let mut slots: Vec<_> = fb
            .colors
            .iter()
            .filter(|(slot, _)| **slot < count)
            .map(|(slot, target)| (*slot, *target))
            .collect();
        slots.sort_unstable_by_key(|(slot, _)| *slot);
        slots.into_iter().map(|(_, target)| target).collect()
    }

    fn read_source(&self, format: ReadFormat) -> Option<&Image> {
        match (self.read_fb, format) {
            (None, ReadFormat::Rgba) => Some(&self.window_color),
            (None, ReadFormat::Depth) => Some(&self.window_depth),
            (Some(id), ReadFormat::Rgba) => {
                let target = *self.framebuffers.get(&id)?.colors.get(&0)?;
                self.attachment_image(target)
            }
            (Some(id), ReadFormat::Depth) => {
                let target = self.framebuffers.get(&id)?.depth?;
                self.attachment_image(target)
            }
        }
    }

    fn record_draw(
        &mut self,
        primitive: Primitive,
        first: u32,
        count: u32,
        instances: Option<u32>,
        indexed: bool,
    ) {
        let (Some(program), Some(vao)) = (self.current_program, self.bound_vao)
        else {
            self.raise(DeviceErrorCode::InvalidOperation);
            return;
        };
        if !self.framebuffer_complete(self.draw_fb) {
            self.raise(DeviceErrorCode::InvalidFramebufferOperation);
            return;
        }
        let mut textures: Vec<_> = self
            .unit_bindings
            .iter()
            .map(|((unit, _), id)| (*unit, TextureId(*id)))
            .collect();
        textures.sort_unstable();
        self.draws.push(DrawCall {
            program: ProgramId(program),
            vertex_array: VertexArrayId(vao),
            framebuffer: self.draw_fb.map(FramebufferId),
            primitive,
            first,
            count,
            instances,
            indexed,
            restart_index: self.restart,
            textures,
        });
    }
}

/// Count identifier references, skipping `//` comments and number literals.
fn identifier_refs(source: &str) -> FxHashMap<String, usize> {
    let mut counts = FxHashMap::default();
    for line in source.lines() {
        let code = line.split("//").next().unwrap_or_default();
        let bytes = code.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            let c = bytes[i];
            if c.is_ascii_alphabetic() || c == b'_' {
                let start = i;
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_')
                {
                    i += 1;
                }
                *counts.entry(code[start..i].to_owned()).or_insert(0) += 1;
            } else if c.is_ascii_digit() {
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'.')
                {
                    i += 1;
                }
            } else {
                i += 1;
            }
        }
    }
    counts
}

/// Minimal front end: `#error` directives and brace balance.
fn check_source(source: &str) -> Result<(), String> {
    let mut depth = 0_i64;
    let mut last_line = 0;
    for (n, line) in source.lines().enumerate() {
        last_line = n + 1;
        if let Some(rest) = line.trim_start().strip_prefix("#error") {
            return Err(format!("0:{}: '#error' :{rest}", n + 1));
        }
        for c in line.chars() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(format!(
                            "0:{}: syntax error: unexpected '}}'",
                            n + 1
                        ));
                    }
                }
                _ => {}
            }
        }
    }
    if depth == 0 {
        Ok(())
    } else {
        Err(format!("0:{last_line}: syntax error: unexpected end of file"))
    }
}

/// Software device for tests, CI and offscreen use.
#[derive(Debug)]
pub struct HeadlessDevice {
    state: RefCell<State>,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    /// Device with an 800x600 window framebuffer.
    #[must_use]
    pub fn new() -> Self {
        Self::with_window_size(DEFAULT_WINDOW_SIZE.0, DEFAULT_WINDOW_SIZE.1)
    }

    /// Device with a window framebuffer of the given size.
    #[must_use]
    pub fn with_window_size(width: u32, height: u32) -> Self {
        Self {
            state: RefCell::new(State::new(width, height)),
        }
    }

    /// Resize the window framebuffer, discarding its contents.
    pub fn resize_window(&self, width: u32, height: u32) {
        let mut s = self.state.borrow_mut();
        s.window_color = Image::new(TextureFormat::Rgba8, [width, height, 1]);
        s.window_depth = Image::new(TextureFormat::Depth24, [width, height, 1]);
    }

    /// Override the texture-unit limit reported to programs.
    pub fn set_max_texture_units(&self, units: u32) {
        self.state.borrow_mut().max_units = units;
    }

    /// Largest renderbuffer edge; bigger storage requests raise
    /// `InvalidValue` and leave the old storage in place.
    pub fn set_max_renderbuffer_size(&self, size: u32) {
        self.state.borrow_mut().max_renderbuffer_size = size;
    }

    /// Make every offscreen framebuffer report itself incomplete, the way
    /// some platforms do while the window is minimized.
    pub fn set_force_incomplete(&self, incomplete: bool) {
        self.state.borrow_mut().force_incomplete = incomplete;
    }

    /// Set the error flag as if the last call had failed.
    pub fn inject_error(&self, code: DeviceErrorCode) {
        self.state.borrow_mut().raise(code);
    }

    /// Every draw call issued so far.
    #[must_use]
    pub fn draw_calls(&self) -> Vec<DrawCall> {
        self.state.borrow().draws.clone()
    }

    /// Every fixed-function state change applied so far.
    #[must_use]
    pub fn state_log(&self) -> Vec<StateChange> {
        self.state.borrow().state_log.clone()
    }

    /// Forget recorded draws and state changes.
    pub fn clear_history(&self) {
        let mut s = self.state.borrow_mut();
        s.draws.clear();
        s.state_log.clear();
    }

    /// Whether a capability is currently enabled.
    #[must_use]
    pub fn is_enabled(&self, capability: Capability) -> bool {
        self.state.borrow().enabled.contains(&capability)
    }

    /// Current viewport.
    #[must_use]
    pub fn current_viewport(&self) -> Rect {
        self.state.borrow().viewport
    }

    /// Allocated size in bytes of a buffer object.
    #[must_use]
    pub fn buffer_size(&self, id: BufferId) -> Option<usize> {
        self.state.borrow().buffers.get(&id.0).map(Vec::len)
    }

    /// Sampler configuration of a texture object.
    #[must_use]
    pub fn texture_sampler(&self, id: TextureId) -> Option<SamplerState> {
        self.state.borrow().textures.get(&id.0).map(|t| t.sampler)
    }

    /// Whether a mip chain was generated for a texture object.
    #[must_use]
    pub fn texture_has_mipmaps(&self, id: TextureId) -> bool {
        self.state
            .borrow()
            .textures
            .get(&id.0)
            .is_some_and(|t| t.has_mipmaps)
    }

    /// Last value set for a uniform of a program.
    #[must_use]
    pub fn uniform_value(&self, program: ProgramId, name: &str) -> Option<UniformValue> {
        let s = self.state.borrow();
        let p = s.programs.get(&program.0)?;
        let loc = p.uniforms.get(name)?;
        p.values.get(loc).copied()
    }

    /// Sources of every stage compiled so far, in order.
    #[must_use]
    pub fn compiled_sources(&self) -> Vec<(ShaderStageType, String)> {
        self.state.borrow().compiled_sources.clone()
    }

    /// Number of completed `finish` calls.
    #[must_use]
    pub fn finish_count(&self) -> usize {
        self.state.borrow().finish_count
    }

    /// Number of live native objects of every kind.
    #[must_use]
    pub fn live_object_count(&self) -> usize {
        let s = self.state.borrow();
        s.buffers.len()
            + s.textures.len()
            + s.renderbuffers.len()
            + s.framebuffers.len()
            + s.shaders.len()
            + s.programs.len()
            + s.vertex_arrays.len()
    }
}

impl Device for HeadlessDevice {
    fn create_buffer(&self) -> Result<BufferId, RenderError> {
        let mut s = self.state.borrow_mut();
        let id = s.alloc_id();
        let _ = s.buffers.insert(id, Vec::new());
        Ok(BufferId(id))
    }

    fn delete_buffer(&self, id: BufferId) {
        let mut s = self.state.borrow_mut();
        let _ = s.buffers.remove(&id.0);
        if s.array_buffer == Some(id.0) {
            s.array_buffer = None;
        }
        if s.element_buffer == Some(id.0) {
            s.element_buffer = None;
        }
    }

    fn bind_buffer(&self, target: BufferTarget, id: Option<BufferId>) {
        let mut s = self.state.borrow_mut();
        if let Some(id) = id {
            if !s.buffers.contains_key(&id.0) {
                s.raise(DeviceErrorCode::InvalidOperation);
                return;
            }
        }
        let raw = id.map(|b| b.0);
        match target {
            BufferTarget::Array => s.array_buffer = raw,
            BufferTarget::ElementArray => {
                s.element_buffer = raw;
                if let Some(vao) = s.bound_vao {
                    if let Some(obj) = s.vertex_arrays.get_mut(&vao) {
                        obj.element_buffer = raw;
                    }
                }
            }
        }
    }

    fn buffer_storage(&self, target: BufferTarget, size_bytes: usize) {
        let mut s = self.state.borrow_mut();
        let Some(id) = s.bound_buffer(target) else {
            s.raise(DeviceErrorCode::InvalidOperation);
            return;
        };
        if let Some(storage) = s.buffers.get_mut(&id) {
            *storage = vec![0; size_bytes];
        }
    }

    fn buffer_sub_data(&self, target: BufferTarget, offset: usize, data: &[u8]) {
        let mut s = self.state.borrow_mut();
        let Some(id) = s.bound_buffer(target) else {
            s.raise(DeviceErrorCode::InvalidOperation);
            return;
        };
        let Some(storage) = s.buffers.get_mut(&id) else {
            return;
        };
        match storage.get_mut(offset..offset + data.len()) {
            Some(region) => region.copy_from_slice(data),
            None => s.raise(DeviceErrorCode::InvalidValue),
        }
    }

    fn get_buffer_sub_data(
        &self,
        target: BufferTarget,
        offset: usize,
        out: &mut [u8],
    ) {
        let mut s = self.state.borrow_mut();
        let Some(id) = s.bound_buffer(target) else {
            s.raise(DeviceErrorCode::InvalidOperation);
            return;
        };
        let region = s
            .buffers
            .get(&id)
            .and_then(|storage| storage.get(offset..offset + out.len()));
        match region {
            Some(region) => out.copy_from_slice(region),
            None => s.raise(DeviceErrorCode::InvalidValue),
        }
    }

    fn create_texture(&self) -> Result<TextureId, RenderError> {
        let mut s = self.state.borrow_mut();
        let id = s.alloc_id();
        let _ = s.textures.insert(id, TextureObject::default());
        Ok(TextureId(id))
    }

    fn delete_texture(&self, id: TextureId) {
        let mut s = self.state.borrow_mut();
        let _ = s.textures.remove(&id.0);
        s.unit_bindings.retain(|_, bound| *bound != id.0);
    }

    fn active_texture(&self, unit: u32) {
        let mut s = self.state.borrow_mut();
        if unit >= s.max_units {
            s.raise(DeviceErrorCode::InvalidEnum);
            return;
        }
        s.active_unit = unit;
    }

    fn bind_texture(&self, target: TextureTarget, id: Option<TextureId>) {
        let mut s = self.state.borrow_mut();
        let unit = s.active_unit;
        let Some(id) = id else {
            let _ = s.unit_bindings.remove(&(unit, target));
            return;
        };
        let Some(tex) = s.textures.get_mut(&id.0) else {
            s.raise(DeviceErrorCode::InvalidOperation);
            return;
        };
        match tex.target {
            Some(existing) if existing != target => {
                s.raise(DeviceErrorCode::InvalidOperation);
                return;
            }
            _ => tex.target = Some(target),
        }
        let _ = s.unit_bindings.insert((unit, target), id.0);
    }

    fn tex_image(
        &self,
        target: TextureTarget,
        format: TextureFormat,
        extents: [u32; 3],
        data: Option<TexelData<'_>>,
    ) {
        let mut s = self.state.borrow_mut();
        let expected = texel_count(extents) * format.channels() as usize;
        if data.is_some_and(|d| d.len() != expected) {
            s.raise(DeviceErrorCode::InvalidValue);
            return;
        }
        let Some(tex) = s.bound_texture_mut(target) else {
            s.raise(DeviceErrorCode::InvalidOperation);
            return;
        };
        let mut image = Image::new(format, extents);
        if let Some(data) = data {
            image.fill(data);
        }
        tex.image = Some(image);
        tex.has_mipmaps = false;
    }

    fn tex_sub_image(
        &self,
        target: TextureTarget,
        format: TextureFormat,
        extents: [u32; 3],
        data: TexelData<'_>,
    ) {
        let mut s = self.state.borrow_mut();
        let image = s.bound_texture_mut(target).and_then(|t| t.image.as_mut());
        let Some(image) = image else {
            s.raise(DeviceErrorCode::InvalidOperation);
            return;
        };
        let expected = texel_count(extents) * format.channels() as usize;
        if image.extents != extents || data.len() != expected {
            s.raise(DeviceErrorCode::InvalidValue);
            return;
        }
        image.fill(data);
    }

    fn tex_sampler(&self, target: TextureTarget, sampler: SamplerState) {
        let mut s = self.state.borrow_mut();
        match s.bound_texture_mut(target) {
            Some(tex) => tex.sampler = sampler,
            None => s.raise(DeviceErrorCode::InvalidOperation),
        }
    }

    fn generate_mipmap(&self, target: TextureTarget) {
        let mut s = self.state.borrow_mut();
        match s.bound_texture_mut(target) {
            Some(tex) if tex.image.is_some() => tex.has_mipmaps = true,
            _ => s.raise(DeviceErrorCode::InvalidOperation),
        }
    }

    fn get_tex_image(&self, target: TextureTarget, channels: u32, out: &mut [f32]) {
        let mut s = self.state.borrow_mut();
        let image = s.bound_texture_mut(target).and_then(|t| t.image.as_ref());
        let Some(image) = image else {
            s.raise(DeviceErrorCode::InvalidOperation);
            return;
        };
        let src_ch = image.channels();
        let dst_ch = channels as usize;
        let texels = texel_count(image.extents);
        if out.len() != texels * dst_ch {
            s.raise(DeviceErrorCode::InvalidValue);
            return;
        }
        for t in 0..texels {
            for c in 0..dst_ch {
                out[t * dst_ch + c] = if c < src_ch {
                    image.data[t * src_ch + c]
                } else if c == 3 {
                    1.0
                } else {
                    0.0
                };
            }
        }
    }

    fn create_renderbuffer(&self) -> Result<RenderbufferId, RenderError> {
        let mut s = self.state.borrow_mut();
        let id = s.alloc_id();
        let _ = s.renderbuffers.insert(id, None);
        Ok(RenderbufferId(id))
    }

    fn delete_renderbuffer(&self, id: RenderbufferId) {
        let _ = self.state.borrow_mut().renderbuffers.remove(&id.0);
    }

    fn renderbuffer_storage(
        &self,
        id: RenderbufferId,
        kind: RenderBufferType,
        width: u32,
        height: u32,
    ) {
        let mut s = self.state.borrow_mut();
        if width.max(height) > s.max_renderbuffer_size {
            s.raise(DeviceErrorCode::InvalidValue);
            return;
        }
        match s.renderbuffers.get_mut(&id.0) {
            Some(slot) => {
                *slot = Some(Image::new(kind.storage_format(), [width, height, 1]));
            }
            None => s.raise(DeviceErrorCode::InvalidOperation),
        }
    }

    fn create_framebuffer(&self) -> Result<FramebufferId, RenderError> {
        let mut s = self.state.borrow_mut();
        let id = s.alloc_id();
        let _ = s.framebuffers.insert(id, FramebufferObject::default());
        Ok(FramebufferId(id))
    }

    fn delete_framebuffer(&self, id: FramebufferId) {
        let mut s = self.state.borrow_mut();
        let _ = s.framebuffers.remove(&id.0);
        if s.read_fb == Some(id.0) {
            s.read_fb = None;
        }
        if s.draw_fb == Some(id.0) {
            s.draw_fb = None;
        }
    }

    fn bind_framebuffer(&self, target: FramebufferTarget, id: Option<FramebufferId>) {
        let mut s = self.state.borrow_mut();
        if let Some(id) = id {
            if !s.framebuffers.contains_key(&id.0) {
                s.raise(DeviceErrorCode::InvalidOperation);
                return;
            }
        }
        let raw = id.map(|f| f.0);
        match target {
            FramebufferTarget::Both => {
                s.read_fb = raw;
                s.draw_fb = raw;
            }
            FramebufferTarget::Read => s.read_fb = raw,
            FramebufferTarget::Draw => s.draw_fb = raw,
        }
    }

    fn framebuffer_renderbuffer(&self, attachment: Attachment, id: RenderbufferId) {
        attach(&mut self.state.borrow_mut(), attachment, AttachTarget::Renderbuffer(id.0));
    }

    fn framebuffer_texture(&self, attachment: Attachment, id: TextureId) {
        attach(&mut self.state.borrow_mut(), attachment, AttachTarget::Texture(id.0));
    }

    fn draw_buffers(&self, count: u32) {
        let mut s = self.state.borrow_mut();
        if count > MAX_COLOR_SLOTS {
            s.raise(DeviceErrorCode::InvalidValue);
            return;
        }
        let Some(id) = s.draw_fb else {
            s.raise(DeviceErrorCode::InvalidOperation);
            return;
        };
        if let Some(fb) = s.framebuffers.get_mut(&id) {
            fb.draw_buffers = count;
        }
    }

    fn check_framebuffer_status(&self) -> bool {
        let s = self.state.borrow();
        s.framebuffer_complete(s.draw_fb)
    }

    fn viewport(&self, rect: Rect) {
        self.state.borrow_mut().viewport = rect;
    }

    fn clear(&self, color: [f32; 4], depth: f32, mask: ClearMask) {
        let mut s = self.state.borrow_mut();
        let Some(id) = s.draw_fb else {
            if mask.color {
                let format = s.window_color.format;
                fill_color(&mut s.window_color, format, color);
            }
            if mask.depth {
                s.window_depth.data.fill(depth.clamp(0.0, 1.0));
            }
            return;
        };
        if !s.framebuffer_complete(Some(id)) {
            s.raise(DeviceErrorCode::InvalidFramebufferOperation);
            return;
        }
        if mask.color {
            for target in s.draw_color_targets(id) {
                if let Some(image) = s.attachment_image_mut(target) {
                    let format = image.format;
                    fill_color(image, format, color);
                }
            }
        }
        if mask.depth {
            let depth_target = s.framebuffers.get(&id).and_then(|fb| fb.depth);
            if let Some(image) = depth_target.and_then(|t| s.attachment_image_mut(t)) {
                image.data.fill(depth.clamp(0.0, 1.0));
            }
        }
    }

    fn read_pixels_f32(&self, rect: Rect, format: ReadFormat, out: &mut [f32]) {
        let mut s = self.state.borrow_mut();
        let ch = format.channels();
        if out.len() != rect.area() * ch {
            s.raise(DeviceErrorCode::InvalidValue);
            return;
        }
        let Some(image) = s.read_source(format) else {
            s.raise(DeviceErrorCode::InvalidOperation);
            return;
        };
        for row in 0..rect.height {
            for col in 0..rect.width {
                let x = rect.x + col as i32;
                let y = rect.y + row as i32;
                let px = if x < 0 || y < 0 {
                    [0.0; 4]
                } else {
                    image.rgba(x as u32, y as u32)
                };
                let base = (row as usize * rect.width as usize + col as usize) * ch;
                out[base..base + ch].copy_from_slice(&px[..ch]);
            }
        }
    }

    fn read_pixels_u8(&self, rect: Rect, out: &mut [u8]) {
        let mut floats = vec![0.0; rect.area() * 4];
        if out.len() != floats.len() {
            self.state.borrow_mut().raise(DeviceErrorCode::InvalidValue);
            return;
        }
        self.read_pixels_f32(rect, ReadFormat::Rgba, &mut floats);
        for (dst, v) in out.iter_mut().zip(floats) {
            *dst = (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        }
    }

    fn blit_framebuffer(&self, src: Rect, dst: Rect, _filter: TextureFilter) {
        let mut s = self.state.borrow_mut();
        let Some(source) = s.read_source(ReadFormat::Rgba) else {
            s.raise(DeviceErrorCode::InvalidOperation);
            return;
        };
        // Resample at destination pixel centres.
        let mut pixels = Vec::with_capacity(dst.area());
        for row in 0..dst.height {
            for col in 0..dst.width {
                let u = (col as f32 + 0.5) / dst.width as f32;
                let v = (row as f32 + 0.5) / dst.height as f32;
                let sx = src.x + (u * src.width as f32) as i32;
                let sy = src.y + (v * src.height as f32) as i32;
                let px = if sx < 0 || sy < 0 {
                    [0.0; 4]
                } else {
                    source.rgba(sx as u32, sy as u32)
                };
                pixels.push(px);
            }
        }
        let targets = match s.draw_fb {
            None => {
                write_rect(&mut s.window_color, dst, &pixels);
                return;
            }
            Some(id) => s.draw_color_targets(id),
        };
        for target in targets {
            if let Some(image) = s.attachment_image_mut(target) {
                write_rect(image, dst, &pixels);
            }
        }
    }

    fn flush(&self) {}

    fn finish(&self) {
        self.state.borrow_mut().finish_count += 1;
    }

    fn default_framebuffer_size(&self) -> (u32, u32) {
        self.state.borrow().window_color.size_2d()
    }

    fn compile_shader(
        &self,
        stage: ShaderStageType,
        source: &str,
    ) -> Result<CompileOutput<ShaderId>, RenderError> {
        let mut s = self.state.borrow_mut();
        let id = s.alloc_id();
        let result = check_source(source);
        let compiled = result.is_ok();
        let _ = s.shaders.insert(
            id,
            ShaderObject {
                stage,
                source: source.to_owned(),
                compiled,
            },
        );
        s.compiled_sources.push((stage, source.to_owned()));
        Ok(CompileOutput {
            handle: ShaderId(id),
            success: compiled,
            info_log: result.err().unwrap_or_default(),
        })
    }

    fn delete_shader(&self, id: ShaderId) {
        let _ = self.state.borrow_mut().shaders.remove(&id.0);
    }

    fn link_program(
        &self,
        shaders: &[ShaderId],
    ) -> Result<CompileOutput<ProgramId>, RenderError> {
        let mut s = self.state.borrow_mut();
        let id = s.alloc_id();
        let mut program = ProgramObject::default();
        let mut log = String::new();
        let mut has_vertex = false;
        let mut has_fragment = false;
        let mut all_source = String::new();
        let mut vertex_source = String::new();
        for shader in shaders {
            let Some(obj) = s.shaders.get(&shader.0) else {
                log.push_str("error: attached object is not a shader\n");
                continue;
            };
            if !obj.compiled {
                log.push_str("error: attached shader is not compiled\n");
            }
            match obj.stage {
                ShaderStageType::Vertex => {
                    has_vertex = true;
                    vertex_source.push_str(&obj.source);
                    vertex_source.push('\n');
                }
                ShaderStageType::Fragment => has_fragment = true,
                ShaderStageType::Geometry => {}
            }
            all_source.push_str(&obj.source);
            all_source.push('\n');
        }
        if !has_vertex {
            log.push_str("error: program has no vertex stage\n");
        }
        if !has_fragment {
            log.push_str("error: program has no fragment stage\n");
        }
        program.linked = log.is_empty();
        if program.linked {
            program.all_refs = identifier_refs(&all_source);
            program.vertex_refs = identifier_refs(&vertex_source);
        }
        let success = program.linked;
        let _ = s.programs.insert(id, program);
        Ok(CompileOutput {
            handle: ProgramId(id),
            success,
            info_log: log,
        })
    }

    fn delete_program(&self, id: ProgramId) {
        let mut s = self.state.borrow_mut();
        let _ = s.programs.remove(&id.0);
        if s.current_program == Some(id.0) {
            s.current_program = None;
        }
    }

    fn use_program(&self, id: Option<ProgramId>) {
        let mut s = self.state.borrow_mut();
        if let Some(id) = id {
            if !s.programs.get(&id.0).is_some_and(|p| p.linked) {
                s.raise(DeviceErrorCode::InvalidOperation);
                return;
            }
        }
        s.current_program = id.map(|p| p.0);
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        let mut s = self.state.borrow_mut();
        let p = s.programs.get_mut(&program.0)?;
        if p.all_refs.get(name).copied().unwrap_or(0) < 2 {
            return None;
        }
        let next = p.uniforms.len() as u32;
        Some(UniformLocation(*p.uniforms.entry(name.to_owned()).or_insert(next)))
    }

    fn attrib_location(&self, program: ProgramId, name: &str) -> Option<u32> {
        let mut s = self.state.borrow_mut();
        let p = s.programs.get_mut(&program.0)?;
        if p.vertex_refs.get(name).copied().unwrap_or(0) < 2 {
            return None;
        }
        let next = p.attribs.len() as u32 * ATTRIB_LOCATION_STRIDE;
        Some(*p.attribs.entry(name.to_owned()).or_insert(next))
    }

    fn set_uniform(&self, location: UniformLocation, value: &UniformValue) {
        let mut s = self.state.borrow_mut();
        let Some(current) = s.current_program else {
            s.raise(DeviceErrorCode::InvalidOperation);
            return;
        };
        if let Some(p) = s.programs.get_mut(&current) {
            let _ = p.values.insert(location.0, *value);
        }
    }

    fn create_vertex_array(&self) -> Result<VertexArrayId, RenderError> {
        let mut s = self.state.borrow_mut();
        let id = s.alloc_id();
        let _ = s.vertex_arrays.insert(id, VertexArrayObject::default());
        Ok(VertexArrayId(id))
    }

    fn delete_vertex_array(&self, id: VertexArrayId) {
        let mut s = self.state.borrow_mut();
        let _ = s.vertex_arrays.remove(&id.0);
        if s.bound_vao == Some(id.0) {
            s.bound_vao = None;
            s.element_buffer = None;
        }
    }

    fn bind_vertex_array(&self, id: Option<VertexArrayId>) {
        let mut s = self.state.borrow_mut();
        let Some(id) = id else {
            s.bound_vao = None;
            s.element_buffer = None;
            return;
        };
        let Some(element_buffer) =
            s.vertex_arrays.get(&id.0).map(|vao| vao.element_buffer)
        else {
            s.raise(DeviceErrorCode::InvalidOperation);
            return;
        };
        s.bound_vao = Some(id.0);
        s.element_buffer = element_buffer;
    }

    fn vertex_attrib_pointer(&self, location: u32, layout: AttribLayout) {
        let mut s = self.state.borrow_mut();
        let (Some(vao), Some(buffer)) = (s.bound_vao, s.array_buffer) else {
            s.raise(DeviceErrorCode::InvalidOperation);
            return;
        };
        if layout.components == 0 || layout.components > 4 {
            s.raise(DeviceErrorCode::InvalidValue);
            return;
        }
        if let Some(obj) = s.vertex_arrays.get_mut(&vao) {
            let _ = obj.attribs.insert(location, (buffer, layout));
        }
    }

    fn set_primitive_restart(&self, index: Option<u32>) {
        self.state.borrow_mut().restart = index;
    }

    fn draw_arrays(&self, primitive: Primitive, first: u32, count: u32) {
        self.state
            .borrow_mut()
            .record_draw(primitive, first, count, None, false);
    }

    fn draw_arrays_instanced(
        &self,
        primitive: Primitive,
        first: u32,
        count: u32,
        instances: u32,
    ) {
        self.state
            .borrow_mut()
            .record_draw(primitive, first, count, Some(instances), false);
    }

    fn draw_elements(&self, primitive: Primitive, count: u32) {
        let mut s = self.state.borrow_mut();
        let available = s
            .element_buffer
            .and_then(|id| s.buffers.get(&id))
            .map_or(0, Vec::len);
        if available < count as usize * 4 {
            s.raise(DeviceErrorCode::InvalidOperation);
            return;
        }
        s.record_draw(primitive, 0, count, None, true);
    }

    fn apply_state(&self, change: StateChange) {
        let mut s = self.state.borrow_mut();
        match change {
            StateChange::Enable(cap) => {
                let _ = s.enabled.insert(cap);
            }
            StateChange::Disable(cap) => {
                let _ = s.enabled.remove(&cap);
            }
            _ => {}
        }
        s.state_log.push(change);
    }

    fn poll_error(&self) -> Option<DeviceErrorCode> {
        self.state.borrow_mut().error.take()
    }

    fn max_texture_units(&self) -> u32 {
        self.state.borrow().max_units
    }
}

fn attach(s: &mut State, attachment: Attachment, target: AttachTarget) {
    let Some(id) = s.draw_fb else {
        s.raise(DeviceErrorCode::InvalidOperation);
        return;
    };
    let exists = match target {
        AttachTarget::Texture(t) => s.textures.contains_key(&t),
        AttachTarget::Renderbuffer(r) => s.renderbuffers.contains_key(&r),
    };
    if !exists {
        s.raise(DeviceErrorCode::InvalidOperation);
        return;
    }
    let Some(fb) = s.framebuffers.get_mut(&id) else {
        return;
    };
    match attachment {
        Attachment::Color(slot) if slot < MAX_COLOR_SLOTS => {
            let _ = fb.colors.insert(slot, target);
        }
        Attachment::Color(_) => s.raise(DeviceErrorCode::InvalidValue),
        Attachment::Depth => fb.depth = Some(target),
    }
}

fn fill_color(image: &mut Image, format: TextureFormat, color: [f32; 4]) {
    let ch = image.channels();
    for texel in image.data.chunks_exact_mut(ch) {
        for (dst, v) in texel.iter_mut().zip(color) {
            *dst = quantize(format, v);
        }
    }
}

fn write_rect(image: &mut Image, rect: Rect, pixels: &[[f32; 4]]) {
    for row in 0..rect.height {
        for col in 0..rect.width {
            let x = rect.x + col as i32;
            let y = rect.y + row as i32;
            if x < 0 || y < 0 {
                continue;
            }
            let px = pixels[row as usize * rect.width as usize + col as usize];
            image.set_rgba(x as u32, y as u32, px);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreferenced_names_are_not_active() {
        let dev = HeadlessDevice::new();
        let vs = dev
            .compile_shader(
                ShaderStageType::Vertex,
                "in vec3 a_pos;\nin vec3 a_unused;\nvoid main() { gl_Position = vec4(a_pos, 1.0); }",
            )
            .unwrap();
        let fs = dev
            .compile_shader(
                ShaderStageType::Fragment,
                "uniform vec3 u_color;\nuniform float u_dead;\nvoid main() { out_color = vec4(u_color, 1.0); }",
            )
            .unwrap();
        let prog = dev.link_program(&[vs.handle, fs.handle]).unwrap();
        assert!(prog.success, "{}", prog.info_log);
        assert!(dev.attrib_location(prog.handle, "a_pos").is_some());
        assert!(dev.attrib_location(prog.handle, "a_unused").is_none());
        assert!(dev.uniform_location(prog.handle, "u_color").is_some());
        assert!(dev.uniform_location(prog.handle, "u_dead").is_none());
    }

    #[test]
    fn compile_errors_carry_line_numbers() {
        let dev = HeadlessDevice::new();
        let out = dev
            .compile_shader(ShaderStageType::Fragment, "void main() {\n#error boom\n}")
            .unwrap();
        assert!(!out.success);
        assert!(out.info_log.starts_with("0:2:"), "{}", out.info_log);
    }

    #[test]
    fn link_requires_vertex_and_fragment() {
        let dev = HeadlessDevice::new();
        let vs = dev
            .compile_shader(ShaderStageType::Vertex, "void main() {}")
            .unwrap();
        let prog = dev.link_program(&[vs.handle]).unwrap();
        assert!(!prog.success);
        assert!(prog.info_log.contains("fragment"));
    }

    #[test]
    fn buffer_writes_past_storage_raise_invalid_value() {
        let dev = HeadlessDevice::new();
        let id = dev.create_buffer().unwrap();
        dev.bind_buffer(BufferTarget::Array, Some(id));
        dev.buffer_storage(BufferTarget::Array, 8);
        dev.buffer_sub_data(BufferTarget::Array, 4, &[1, 2, 3, 4, 5]);
        assert_eq!(dev.poll_error(), Some(DeviceErrorCode::InvalidValue));
        assert_eq!(dev.poll_error(), None);
    }

    #[test]
    fn mismatched_attachments_make_framebuffer_incomplete() {
        let dev = HeadlessDevice::new();
        let a = dev.create_renderbuffer().unwrap();
        let b = dev.create_renderbuffer().unwrap();
        dev.renderbuffer_storage(a, RenderBufferType::ColorAlpha, 4, 4);
        dev.renderbuffer_storage(b, RenderBufferType::Depth, 8, 8);
        let fb = dev.create_framebuffer().unwrap();
        dev.bind_framebuffer(FramebufferTarget::Both, Some(fb));
        dev.framebuffer_renderbuffer(Attachment::Color(0), a);
        assert!(dev.check_framebuffer_status());
        dev.framebuffer_renderbuffer(Attachment::Depth, b);
        assert!(!dev.check_framebuffer_status());
    }

    #[test]
    fn clear_then_read_back_window() {
        let dev = HeadlessDevice::with_window_size(2, 2);
        dev.clear([1.0, 0.0, 0.0, 1.0], 1.0, ClearMask::ALL);
        let mut px = [0_u8; 16];
        dev.read_pixels_u8(Rect::sized(2, 2), &mut px);
        assert_eq!(&px[..4], &[255, 0, 0, 255]);
        assert_eq!(dev.poll_error(), None);
    }

    #[test]
    fn half_float_storage_rounds() {
        assert_eq!(quantize(TextureFormat::R16F, 0.1), f16::from_f32(0.1).to_f32());
        assert_eq!(quantize(TextureFormat::R32F, 0.1), 0.1);
        assert_eq!(quantize(TextureFormat::Rgba8, 2.0), 1.0);
    }
}
