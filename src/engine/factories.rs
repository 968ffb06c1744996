//! Resource factories for Engine

use super::Engine;
use crate::device::TexelData;
use crate::error::RenderError;
use crate::gpu::{
    AttributeBuffer, BufferElement, FrameBuffer, RenderBuffer,
    RenderBufferType, RenderDataType, TextureBuffer, TextureFormat,
};

impl Engine {
    /// Empty typed buffer.
    ///
    /// # Errors
    ///
    /// Same as [`AttributeBuffer::new`].
    pub fn generate_attribute_buffer(
        &self,
        data_type: RenderDataType,
        array_count: u32,
    ) -> Result<AttributeBuffer, RenderError> {
        AttributeBuffer::new(&self.ctx, data_type, array_count)
    }

    /// Buffer typed after `T`, filled with `data`.
    ///
    /// # Errors
    ///
    /// Same as [`AttributeBuffer::with_data`].
    pub fn generate_attribute_buffer_with<T: BufferElement>(
        &self,
        data: &[T],
    ) -> Result<AttributeBuffer, RenderError> {
        AttributeBuffer::with_data(&self.ctx, data)
    }

    /// 1D texture.
    ///
    /// # Errors
    ///
    /// Same as [`TextureBuffer::new_1d`].
    pub fn generate_texture_1d(
        &self,
        format: TextureFormat,
        len: u32,
        data: Option<TexelData<'_>>,
    ) -> Result<TextureBuffer, RenderError> {
        TextureBuffer::new_1d(&self.ctx, format, len, data)
    }

    /// 2D texture.
    ///
    /// # Errors
    ///
    /// Same as [`TextureBuffer::new_2d`].
    pub fn generate_texture_2d(
        &self,
        format: TextureFormat,
        width: u32,
        height: u32,
        data: Option<TexelData<'_>>,
    ) -> Result<TextureBuffer, RenderError> {
        TextureBuffer::new_2d(&self.ctx, format, width, height, data)
    }

    /// 3D texture.
    ///
    /// # Errors
    ///
    /// Same as [`TextureBuffer::new_3d`].
    pub fn generate_texture_3d(
        &self,
        format: TextureFormat,
        extents: [u32; 3],
        data: Option<TexelData<'_>>,
    ) -> Result<TextureBuffer, RenderError> {
        TextureBuffer::new_3d(&self.ctx, format, extents, data)
    }

    /// Renderbuffer with allocated storage.
    ///
    /// # Errors
    ///
    /// Same as [`RenderBuffer::new`].
    pub fn generate_render_buffer(
        &self,
        kind: RenderBufferType,
        width: u32,
        height: u32,
    ) -> Result<RenderBuffer, RenderError> {
        RenderBuffer::new(&self.ctx, kind, width, height)
    }

    /// Offscreen framebuffer with no attachments.
    ///
    /// # Errors
    ///
    /// Same as [`FrameBuffer::new`].
    pub fn generate_frame_buffer(
        &self,
        width: u32,
        height: u32,
    ) -> Result<FrameBuffer, RenderError> {
        FrameBuffer::new(&self.ctx, width, height)
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;

    #[test]
    fn factories_share_the_engine_context() {
        let engine = Engine::headless().unwrap();
        let id = engine.context().id();
        let buffer = engine
            .generate_attribute_buffer(RenderDataType::Vector3Float, 1)
            .unwrap();
        assert_eq!(buffer.context().id(), id);
        let filled = engine.generate_attribute_buffer_with(&[1.0_f32, 2.0]).unwrap();
        assert_eq!(filled.len(), 2);
        let texture = engine
            .generate_texture_3d(TextureFormat::R32F, [2, 2, 2], None)
            .unwrap();
        assert_eq!(texture.total_size(), 8);
        let rb = engine
            .generate_render_buffer(RenderBufferType::Depth, 8, 8)
            .unwrap();
        let fb = engine.generate_frame_buffer(8, 8).unwrap();
        fb.add_depth_buffer(Rc::new(rb)).unwrap();
        assert!(fb.has_depth());
    }
}
