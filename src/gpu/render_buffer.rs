//! Renderbuffers: attachable storage that is never sampled.

use std::cell::Cell;
use std::rc::Rc;

use super::format::RenderBufferType;
use super::render_context::RenderContext;
use crate::device::RenderbufferId;
use crate::error::RenderError;

/// Color or depth storage for a framebuffer attachment.
#[derive(Debug)]
pub struct RenderBuffer {
    ctx: Rc<RenderContext>,
    handle: RenderbufferId,
    kind: RenderBufferType,
    size: Cell<(u32, u32)>,
}

impl RenderBuffer {
    /// Allocate storage of `kind` at the given size.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Allocation`] if the device cannot create a
    /// renderbuffer object.
    pub fn new(
        ctx: &Rc<RenderContext>,
        kind: RenderBufferType,
        width: u32,
        height: u32,
    ) -> Result<Self, RenderError> {
        let handle = ctx.device().create_renderbuffer()?;
        let buffer = Self {
            ctx: Rc::clone(ctx),
            handle,
            kind,
            size: Cell::new((width, height)),
        };
        buffer.allocate()?;
        Ok(buffer)
    }

    fn allocate(&self) -> Result<(), RenderError> {
        let (w, h) = self.size.get();
        self.ctx
            .device()
            .renderbuffer_storage(self.handle, self.kind, w, h);
        self.ctx.check_error()
    }

    /// Reallocate at a new size. Contents are discarded.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Device`] if the device raises an error.
    pub fn resize(&self, width: u32, height: u32) -> Result<(), RenderError> {
        self.size.set((width, height));
        self.allocate()
    }

    /// Content kind.
    #[must_use]
    pub fn kind(&self) -> RenderBufferType {
        self.kind
    }

    /// `(width, height)`.
    #[must_use]
    pub fn size(&self) -> (u32, u32) {
        self.size.get()
    }

    /// Native handle.
    #[must_use]
    pub fn handle(&self) -> RenderbufferId {
        self.handle
    }

    /// Owning context.
    #[must_use]
    pub fn context(&self) -> &Rc<RenderContext> {
        &self.ctx
    }
}

impl Drop for RenderBuffer {
    fn drop(&mut self) {
        self.ctx.device().delete_renderbuffer(self.handle);
    }
}
