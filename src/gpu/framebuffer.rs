//! Framebuffers: attachment aggregation, viewport, clears, read-back and
//! blits.
//!
//! A [`FrameBuffer`] either owns a native framebuffer object or stands for
//! the window framebuffer, which has no handle and is never deleted.
//! Attachments are shared (`Rc`) so the same texture can be rendered into
//! here and sampled elsewhere.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use glam::Vec3;

use super::render_buffer::RenderBuffer;
use super::render_context::{BoundTarget, RenderContext};
use super::texture::TextureBuffer;
use crate::device::{
    Attachment, BlendFactor, Capability, ClearMask, CompareFunc, FramebufferId,
    FramebufferTarget, ReadFormat, Rect, StateChange, TextureFilter,
    TextureTarget,
};
use crate::error::RenderError;

/// Maximum number of color attachments.
pub const MAX_COLOR_ATTACHMENTS: usize = 8;

/// Storage attached to a framebuffer slot.
#[derive(Debug, Clone)]
pub enum AttachmentSource {
    /// A renderbuffer.
    RenderBuffer(Rc<RenderBuffer>),
    /// A 2D texture.
    Texture(Rc<TextureBuffer>),
}

impl AttachmentSource {
    fn context(&self) -> &Rc<RenderContext> {
        match self {
            Self::RenderBuffer(rb) => rb.context(),
            Self::Texture(tex) => tex.context(),
        }
    }

    fn size(&self) -> (u32, u32) {
        match self {
            Self::RenderBuffer(rb) => rb.size(),
            Self::Texture(tex) => {
                let [w, h, _] = tex.extents();
                (w, h)
            }
        }
    }

    fn is_depth(&self) -> bool {
        match self {
            Self::RenderBuffer(rb) => rb.kind().is_depth(),
            Self::Texture(tex) => tex.format().is_depth(),
        }
    }

    fn resize(&self, width: u32, height: u32) -> Result<(), RenderError> {
        match self {
            Self::RenderBuffer(rb) => rb.resize(width, height),
            Self::Texture(tex) => tex.resize_2d(width, height),
        }
    }
}

impl From<Rc<RenderBuffer>> for AttachmentSource {
    fn from(rb: Rc<RenderBuffer>) -> Self {
        Self::RenderBuffer(rb)
    }
}

impl From<Rc<TextureBuffer>> for AttachmentSource {
    fn from(tex: Rc<TextureBuffer>) -> Self {
        Self::Texture(tex)
    }
}

/// A render target.
#[derive(Debug)]
pub struct FrameBuffer {
    ctx: Rc<RenderContext>,
    handle: Option<FramebufferId>,
    size: Cell<(u32, u32)>,
    colors: RefCell<Vec<AttachmentSource>>,
    depth: RefCell<Option<AttachmentSource>>,
    viewport: Cell<Option<Rect>>,
    clear_color: Cell<Vec3>,
    clear_alpha: Cell<f32>,
    clear_depth: Cell<f32>,
}

impl FrameBuffer {
    fn with_handle(
        ctx: &Rc<RenderContext>,
        handle: Option<FramebufferId>,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            ctx: Rc::clone(ctx),
            handle,
            size: Cell::new((width, height)),
            colors: RefCell::new(Vec::new()),
            depth: RefCell::new(None),
            viewport: Cell::new(None),
            clear_color: Cell::new(Vec3::ONE),
            clear_alpha: Cell::new(0.0),
            clear_depth: Cell::new(1.0),
        }
    }

    /// Offscreen framebuffer with no attachments yet.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Allocation`] if the device cannot create a
    /// framebuffer object.
    pub fn new(
        ctx: &Rc<RenderContext>,
        width: u32,
        height: u32,
    ) -> Result<Self, RenderError> {
        let handle = ctx.device().create_framebuffer()?;
        let fb = Self::with_handle(ctx, Some(handle), width, height);
        fb.bind();
        ctx.check_error()?;
        Ok(fb)
    }

    /// The window framebuffer, at the device's current window size.
    #[must_use]
    pub fn window(ctx: &Rc<RenderContext>) -> Self {
        let (w, h) = ctx.device().default_framebuffer_size();
        Self::with_handle(ctx, None, w, h)
    }

    /// Bind for reading and drawing.
    pub fn bind(&self) {
        self.ctx
            .device()
            .bind_framebuffer(FramebufferTarget::Both, self.handle);
    }

    fn check_attachable(&self, source: &AttachmentSource) -> Result<(), RenderError> {
        if self.handle.is_none() {
            return Err(RenderError::InvalidState(
                "the window framebuffer cannot take attachments".to_owned(),
            ));
        }
        self.ctx
            .ensure_same(source.context(), "framebuffer attachment")?;
        if let AttachmentSource::Texture(tex) = source {
            if tex.target() != TextureTarget::D2 {
                return Err(RenderError::TypeMismatch(format!(
                    "only 2D textures can be attached, got a {}D texture",
                    tex.dimension()
                )));
            }
        }
        Ok(())
    }

    fn attach(&self, attachment: Attachment, source: &AttachmentSource) {
        self.bind();
        let device = self.ctx.device();
        match source {
            AttachmentSource::RenderBuffer(rb) => {
                device.framebuffer_renderbuffer(attachment, rb.handle());
            }
            AttachmentSource::Texture(tex) => {
                device.framebuffer_texture(attachment, tex.handle());
            }
        }
    }

    /// Attach storage at the next color slot.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::TypeMismatch`] for storage from another
    /// context, or [`RenderError::ResourceLimit`] when every color slot is
    /// taken.
    pub fn add_color_buffer(
        &self,
        source: impl Into<AttachmentSource>,
    ) -> Result<(), RenderError> {
        let source = source.into();
        self.check_attachable(&source)?;
        let slot = self.colors.borrow().len();
        if slot >= MAX_COLOR_ATTACHMENTS {
            return Err(RenderError::ResourceLimit(format!(
                "a framebuffer holds at most {MAX_COLOR_ATTACHMENTS} color \
                 attachments"
            )));
        }
        if source.is_depth() {
            log::warn!("depth-format storage attached to color slot {slot}");
        }
        self.attach(Attachment::Color(slot as u32), &source);
        self.colors.borrow_mut().push(source);
        self.ctx.check_error()
    }

    /// Attach storage at the depth slot.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::TypeMismatch`] for storage from another
    /// context, or [`RenderError::InvalidState`] if a depth attachment
    /// already exists.
    pub fn add_depth_buffer(
        &self,
        source: impl Into<AttachmentSource>,
    ) -> Result<(), RenderError> {
        let source = source.into();
        self.check_attachable(&source)?;
        if self.depth.borrow().is_some() {
            return Err(RenderError::InvalidState(
                "framebuffer already has a depth attachment".to_owned(),
            ));
        }
        if !source.is_depth() {
            log::warn!("color-format storage attached to the depth slot");
        }
        self.attach(Attachment::Depth, &source);
        *self.depth.borrow_mut() = Some(source);
        self.ctx.check_error()
    }

    /// Route fragment outputs to every color attachment. Call after the
    /// last `add_color_buffer`.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Device`] if the device raises an error.
    pub fn set_draw_buffers(&self) -> Result<(), RenderError> {
        self.bind();
        let count = self.colors.borrow().len() as u32;
        if count > 0 {
            self.ctx.device().draw_buffers(count);
        }
        self.ctx.check_error()
    }

    /// Set the viewport used when binding for rendering.
    pub fn set_viewport(&self, x: i32, y: i32, width: u32, height: u32) {
        self.viewport.set(Some(Rect {
            x,
            y,
            width,
            height,
        }));
    }

    fn verify_sizes(&self) -> Result<(), RenderError> {
        let size = self.size.get();
        let colors = self.colors.borrow();
        let depth = self.depth.borrow();
        for source in colors.iter().chain(depth.iter()) {
            if source.size() != size {
                return Err(RenderError::InconsistentSize(format!(
                    "framebuffer is {}x{} but an attachment is {}x{}",
                    size.0,
                    size.1,
                    source.size().0,
                    source.size().1
                )));
            }
        }
        Ok(())
    }

    /// Make this the render target.
    ///
    /// Returns `Ok(false)` without touching state when the device reports
    /// the framebuffer incomplete (e.g. while the window is minimized).
    /// Otherwise sets the viewport, less-than depth testing and standard
    /// alpha blending.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::InconsistentSize`] if an attachment's size
    /// differs from the framebuffer's, or [`RenderError::InvalidState`] if no
    /// viewport was set.
    pub fn bind_for_rendering(&self) -> Result<bool, RenderError> {
        self.verify_sizes()?;
        self.bind();
        let device = self.ctx.device();
        if !device.check_framebuffer_status() {
            log::warn!("framebuffer {:?} is incomplete, skipping", self.handle);
            return Ok(false);
        }
        let Some(viewport) = self.viewport.get() else {
            return Err(RenderError::InvalidState(
                "viewport not set for framebuffer; call set_viewport first"
                    .to_owned(),
            ));
        };
        self.ctx.set_viewport(viewport);
        self.ctx.set_bound_target(match self.handle {
            Some(id) => BoundTarget::Offscreen(id),
            None => BoundTarget::Window,
        });
        device.apply_state(StateChange::Enable(Capability::DepthTest));
        device.apply_state(StateChange::DepthFunc(CompareFunc::Less));
        device.apply_state(StateChange::Enable(Capability::Blend));
        device.apply_state(StateChange::BlendFunc {
            src: BlendFactor::SrcAlpha,
            dst: BlendFactor::OneMinusSrcAlpha,
        });
        self.ctx.check_error()?;
        Ok(true)
    }

    /// Clear color, depth and stencil to the stored clear values. Does
    /// nothing if binding soft-fails.
    ///
    /// # Errors
    ///
    /// Same as [`Self::bind_for_rendering`].
    pub fn clear(&self) -> Result<(), RenderError> {
        if !self.bind_for_rendering()? {
            return Ok(());
        }
        let c = self.clear_color.get();
        self.ctx.device().clear(
            [c.x, c.y, c.z, self.clear_alpha.get()],
            self.clear_depth.get(),
            ClearMask::ALL,
        );
        self.ctx.check_error()
    }

    fn prepare_read(&self) {
        let device = self.ctx.device();
        device.flush();
        device.finish();
        self.bind();
    }

    /// RGBA float at a pixel (origin bottom-left). Blocks.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Device`] if the device raises an error.
    pub fn read_float4(&self, x: i32, y: i32) -> Result<[f32; 4], RenderError> {
        self.prepare_read();
        let mut out = [0.0; 4];
        self.ctx.device().read_pixels_f32(
            Rect {
                x,
                y,
                width: 1,
                height: 1,
            },
            ReadFormat::Rgba,
            &mut out,
        );
        self.ctx.check_error()?;
        Ok(out)
    }

    /// Depth at a pixel (origin bottom-left). Blocks.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Device`] if the device raises an error, e.g.
    /// when there is no depth attachment.
    pub fn read_depth(&self, x: i32, y: i32) -> Result<f32, RenderError> {
        self.prepare_read();
        let mut out = [0.0];
        self.ctx.device().read_pixels_f32(
            Rect {
                x,
                y,
                width: 1,
                height: 1,
            },
            ReadFormat::Depth,
            &mut out,
        );
        self.ctx.check_error()?;
        Ok(out[0])
    }

    /// Whole framebuffer as RGBA bytes, rows bottom-up. Blocks.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Device`] if the device raises an error.
    pub fn read_buffer(&self) -> Result<Vec<u8>, RenderError> {
        self.prepare_read();
        let (w, h) = self.size.get();
        let rect = Rect::sized(w, h);
        let mut out = vec![0; rect.area() * 4];
        self.ctx.device().read_pixels_u8(rect, &mut out);
        self.ctx.check_error()?;
        Ok(out)
    }

    /// Copy color into `target`, scaled to its extents with linear
    /// filtering.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::TypeMismatch`] if `target` belongs to another
    /// context, plus the errors of [`Self::bind_for_rendering`].
    pub fn blit_to(&self, target: &Self) -> Result<(), RenderError> {
        self.ctx.ensure_same(&target.ctx, "blit target")?;
        if !self.bind_for_rendering()? {
            return Ok(());
        }
        let device = self.ctx.device();
        device.bind_framebuffer(FramebufferTarget::Draw, target.handle);
        let (sw, sh) = self.size.get();
        let (tw, th) = target.size.get();
        device.blit_framebuffer(
            Rect::sized(sw, sh),
            Rect::sized(tw, th),
            TextureFilter::Linear,
        );
        self.ctx.check_error()
    }

    /// Resize every attachment and the framebuffer itself. Contents are
    /// discarded.
    ///
    /// # Errors
    ///
    /// Returns the first attachment's resize error. Every attachment is
    /// then put back to the previous extents, so the framebuffer keeps one
    /// consistent size.
    pub fn resize(&self, width: u32, height: u32) -> Result<(), RenderError> {
        let colors = self.colors.borrow();
        let depth = self.depth.borrow();
        let sources: Vec<&AttachmentSource> =
            colors.iter().chain(depth.as_ref()).collect();
        for (failed, source) in sources.iter().enumerate() {
            if let Err(err) = source.resize(width, height) {
                let (old_w, old_h) = self.size.get();
                for resized in &sources[..=failed] {
                    if let Err(restore) = resized.resize(old_w, old_h) {
                        log::warn!("could not restore attachment size: {restore}");
                    }
                }
                return Err(err);
            }
        }
        self.size.set((width, height));
        Ok(())
    }

    /// Color used by [`Self::clear`].
    pub fn set_clear_color(&self, color: Vec3) {
        self.clear_color.set(color);
    }

    /// Alpha used by [`Self::clear`].
    pub fn set_clear_alpha(&self, alpha: f32) {
        self.clear_alpha.set(alpha);
    }

    /// Depth used by [`Self::clear`].
    pub fn set_clear_depth(&self, depth: f32) {
        self.clear_depth.set(depth);
    }

    /// Number of color attachments.
    #[must_use]
    pub fn color_attachment_count(&self) -> usize {
        self.colors.borrow().len()
    }

    /// Whether a depth attachment is present.
    #[must_use]
    pub fn has_depth(&self) -> bool {
        self.depth.borrow().is_some()
    }

    /// `(width, height)`.
    #[must_use]
    pub fn size(&self) -> (u32, u32) {
        self.size.get()
    }

    /// Explicitly set viewport, if any.
    #[must_use]
    pub fn viewport(&self) -> Option<Rect> {
        self.viewport.get()
    }

    /// Native handle; `None` for the window framebuffer.
    #[must_use]
    pub fn handle(&self) -> Option<FramebufferId> {
        self.handle
    }

    /// Owning context.
    #[must_use]
    pub fn context(&self) -> &Rc<RenderContext> {
        &self.ctx
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle {
            self.ctx.device().delete_framebuffer(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceErrorCode, HeadlessDevice};
    use crate::gpu::format::{RenderBufferType, TextureFormat};

    fn context() -> (Rc<HeadlessDevice>, Rc<RenderContext>) {
        let device = Rc::new(HeadlessDevice::with_window_size(16, 16));
        let ctx = RenderContext::new(device.clone());
        (device, ctx)
    }

    fn color_rb(ctx: &Rc<RenderContext>, kind: RenderBufferType) -> Rc<RenderBuffer> {
        Rc::new(RenderBuffer::new(ctx, kind, 4, 4).unwrap())
    }

    #[test]
    fn viewport_is_required() {
        let (_, ctx) = context();
        let fb = FrameBuffer::new(&ctx, 4, 4).unwrap();
        fb.add_color_buffer(color_rb(&ctx, RenderBufferType::ColorAlpha))
            .unwrap();
        assert!(matches!(
            fb.bind_for_rendering(),
            Err(RenderError::InvalidState(_))
        ));
        fb.set_viewport(0, 0, 4, 4);
        assert!(fb.bind_for_rendering().unwrap());
        assert_eq!(ctx.viewport(), Rect::sized(4, 4));
        assert_eq!(
            ctx.bound_target(),
            fb.handle().map(BoundTarget::Offscreen)
        );
    }

    #[test]
    fn bind_enables_depth_and_blend() {
        let (device, ctx) = context();
        let fb = FrameBuffer::window(&ctx);
        fb.set_viewport(0, 0, 16, 16);
        assert!(fb.bind_for_rendering().unwrap());
        assert!(device.is_enabled(Capability::DepthTest));
        assert!(device.is_enabled(Capability::Blend));
        assert!(device
            .state_log()
            .contains(&StateChange::DepthFunc(CompareFunc::Less)));
    }

    #[test]
    fn incomplete_framebuffer_is_a_soft_failure() {
        let (device, ctx) = context();
        let fb = FrameBuffer::new(&ctx, 4, 4).unwrap();
        fb.add_color_buffer(color_rb(&ctx, RenderBufferType::ColorAlpha))
            .unwrap();
        fb.set_viewport(0, 0, 4, 4);
        device.set_force_incomplete(true);
        assert!(!fb.bind_for_rendering().unwrap());
        fb.clear().unwrap();
        device.set_force_incomplete(false);
        assert!(fb.bind_for_rendering().unwrap());
    }

    #[test]
    fn too_many_color_attachments() {
        let (_, ctx) = context();
        let fb = FrameBuffer::new(&ctx, 4, 4).unwrap();
        for _ in 0..MAX_COLOR_ATTACHMENTS {
            fb.add_color_buffer(color_rb(&ctx, RenderBufferType::Float4))
                .unwrap();
        }
        assert!(matches!(
            fb.add_color_buffer(color_rb(&ctx, RenderBufferType::Float4)),
            Err(RenderError::ResourceLimit(_))
        ));
        fb.set_draw_buffers().unwrap();
    }

    #[test]
    fn depth_renderbuffer_on_color_slot_is_accepted() {
        let (_, ctx) = context();
        let fb = FrameBuffer::new(&ctx, 4, 4).unwrap();
        fb.add_color_buffer(color_rb(&ctx, RenderBufferType::Depth))
            .unwrap();
        assert_eq!(fb.color_attachment_count(), 1);
    }

    #[test]
    fn second_depth_attachment_is_rejected() {
        let (_, ctx) = context();
        let fb = FrameBuffer::new(&ctx, 4, 4).unwrap();
        fb.add_depth_buffer(color_rb(&ctx, RenderBufferType::Depth))
            .unwrap();
        assert!(matches!(
            fb.add_depth_buffer(color_rb(&ctx, RenderBufferType::Depth)),
            Err(RenderError::InvalidState(_))
        ));
    }

    #[test]
    fn foreign_attachments_are_rejected() {
        let (_, ctx) = context();
        let other = RenderContext::headless();
        let fb = FrameBuffer::new(&ctx, 4, 4).unwrap();
        assert!(matches!(
            fb.add_color_buffer(color_rb(&other, RenderBufferType::Color)),
            Err(RenderError::TypeMismatch(_))
        ));
        let window = FrameBuffer::window(&ctx);
        assert!(matches!(
            window.add_color_buffer(color_rb(&ctx, RenderBufferType::Color)),
            Err(RenderError::InvalidState(_))
        ));
    }

    #[test]
    fn mismatched_sizes_fail_binding() {
        let (_, ctx) = context();
        let fb = FrameBuffer::new(&ctx, 8, 8).unwrap();
        fb.add_color_buffer(color_rb(&ctx, RenderBufferType::Color))
            .unwrap();
        fb.set_viewport(0, 0, 8, 8);
        assert!(matches!(
            fb.bind_for_rendering(),
            Err(RenderError::InconsistentSize(_))
        ));
        fb.resize(8, 8).unwrap();
        assert!(fb.bind_for_rendering().unwrap());
    }

    #[test]
    fn clear_and_read_back() {
        let (_, ctx) = context();
        let fb = FrameBuffer::new(&ctx, 4, 4).unwrap();
        fb.add_color_buffer(color_rb(&ctx, RenderBufferType::Float4))
            .unwrap();
        fb.add_depth_buffer(color_rb(&ctx, RenderBufferType::Depth))
            .unwrap();
        fb.set_draw_buffers().unwrap();
        fb.set_viewport(0, 0, 4, 4);
        fb.set_clear_color(Vec3::new(0.25, 0.5, 0.75));
        fb.set_clear_alpha(1.0);
        fb.set_clear_depth(0.5);
        fb.clear().unwrap();
        assert_eq!(fb.read_float4(3, 3).unwrap(), [0.25, 0.5, 0.75, 1.0]);
        assert_eq!(fb.read_depth(0, 0).unwrap(), 0.5);
        let bytes = fb.read_buffer().unwrap();
        assert_eq!(bytes.len(), 4 * 4 * 4);
        assert_eq!(&bytes[..4], &[64, 128, 191, 255]);
    }

    #[test]
    fn blit_copies_color_into_target() {
        let (_, ctx) = context();
        let src_tex = Rc::new(
            TextureBuffer::new_2d(&ctx, TextureFormat::Rgba32F, 4, 4, None)
                .unwrap(),
        );
        let src = FrameBuffer::new(&ctx, 4, 4).unwrap();
        src.add_color_buffer(Rc::clone(&src_tex)).unwrap();
        src.set_viewport(0, 0, 4, 4);
        src.set_clear_color(Vec3::new(1.0, 0.0, 0.0));
        src.set_clear_alpha(1.0);
        src.clear().unwrap();

        let dst = FrameBuffer::new(&ctx, 2, 2).unwrap();
        dst.add_color_buffer(Rc::new(
            RenderBuffer::new(&ctx, RenderBufferType::Float4, 2, 2).unwrap(),
        ))
        .unwrap();
        src.blit_to(&dst).unwrap();
        assert_eq!(dst.read_float4(1, 1).unwrap(), [1.0, 0.0, 0.0, 1.0]);

        let foreign = FrameBuffer::window(&RenderContext::headless());
        assert!(matches!(
            src.blit_to(&foreign),
            Err(RenderError::TypeMismatch(_))
        ));
    }

    #[test]
    fn failed_resize_restores_every_attachment() {
        let (device, ctx) = context();
        let color = Rc::new(
            TextureBuffer::new_2d(&ctx, TextureFormat::Rgba8, 4, 4, None)
                .unwrap(),
        );
        let depth = color_rb(&ctx, RenderBufferType::Depth);
        let fb = FrameBuffer::new(&ctx, 4, 4).unwrap();
        fb.add_color_buffer(Rc::clone(&color)).unwrap();
        fb.add_depth_buffer(Rc::clone(&depth)).unwrap();

        device.set_max_renderbuffer_size(32);
        assert!(matches!(
            fb.resize(64, 64),
            Err(RenderError::Device(DeviceErrorCode::InvalidValue))
        ));
        assert_eq!(fb.size(), (4, 4));
        assert_eq!(color.extents(), [4, 4, 1]);
        assert_eq!(depth.size(), (4, 4));

        fb.resize(16, 8).unwrap();
        assert_eq!(color.extents(), [16, 8, 1]);
        assert_eq!(depth.size(), (16, 8));
    }
}
