//! Device textures of a fixed format and dimensionality.

use std::cell::Cell;
use std::rc::Rc;

use glam::{Vec2, Vec3, Vec4};

use super::data_type::{BufferElement, RenderDataType};
use super::format::TextureFormat;
use super::render_context::RenderContext;
use crate::device::{
    SamplerState, TexelData, TextureFilter, TextureId, TextureTarget,
    TextureWrap,
};
use crate::error::RenderError;

/// Sampling filter exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterMode {
    /// Nearest texel.
    Nearest,
    /// Bilinear.
    Linear,
}

impl From<FilterMode> for TextureFilter {
    fn from(mode: FilterMode) -> Self {
        match mode {
            FilterMode::Nearest => Self::Nearest,
            FilterMode::Linear => Self::Linear,
        }
    }
}

/// A 1D, 2D or 3D texture.
///
/// Storage is reallocated (and contents discarded) on resize. New textures
/// sample with [`FilterMode::Nearest`] and clamp to edge.
#[derive(Debug)]
pub struct TextureBuffer {
    ctx: Rc<RenderContext>,
    handle: TextureId,
    target: TextureTarget,
    format: TextureFormat,
    extents: Cell<[u32; 3]>,
    filter: Cell<FilterMode>,
    sampler: Cell<SamplerState>,
}

impl TextureBuffer {
    fn create(
        ctx: &Rc<RenderContext>,
        target: TextureTarget,
        format: TextureFormat,
        extents: [u32; 3],
        data: Option<TexelData<'_>>,
    ) -> Result<Self, RenderError> {
        let expected =
            extents.iter().map(|&e| e as usize).product::<usize>() * format.channels() as usize;
        if let Some(data) = data {
            if data.len() != expected {
                return Err(RenderError::InconsistentSize(format!(
                    "{format} texture of extents {extents:?} needs {expected} \
                     values, got {}",
                    data.len()
                )));
            }
        }
        let handle = ctx.device().create_texture()?;
        let texture = Self {
            ctx: Rc::clone(ctx),
            handle,
            target,
            format,
            extents: Cell::new(extents),
            filter: Cell::new(FilterMode::Nearest),
            sampler: Cell::new(SamplerState::default()),
        };
        texture.bind();
        ctx.device().tex_image(target, format, extents, data);
        texture.set_filter_mode(FilterMode::Nearest)?;
        Ok(texture)
    }

    /// 1D texture of `len` texels, optionally initialized.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::InconsistentSize`] if `data` does not hold one
    /// value per channel per texel, or [`RenderError::Allocation`] if the
    /// device cannot create a texture.
    pub fn new_1d(
        ctx: &Rc<RenderContext>,
        format: TextureFormat,
        len: u32,
        data: Option<TexelData<'_>>,
    ) -> Result<Self, RenderError> {
        Self::create(ctx, TextureTarget::D1, format, [len, 1, 1], data)
    }

    /// 2D texture, optionally initialized.
    ///
    /// # Errors
    ///
    /// Same as [`Self::new_1d`].
    pub fn new_2d(
        ctx: &Rc<RenderContext>,
        format: TextureFormat,
        width: u32,
        height: u32,
        data: Option<TexelData<'_>>,
    ) -> Result<Self, RenderError> {
        Self::create(ctx, TextureTarget::D2, format, [width, height, 1], data)
    }

    /// 3D texture, optionally initialized.
    ///
    /// # Errors
    ///
    /// Same as [`Self::new_1d`].
    pub fn new_3d(
        ctx: &Rc<RenderContext>,
        format: TextureFormat,
        extents: [u32; 3],
        data: Option<TexelData<'_>>,
    ) -> Result<Self, RenderError> {
        Self::create(ctx, TextureTarget::D3, format, extents, data)
    }

    /// Bind to the active texture unit.
    pub fn bind(&self) {
        self.ctx.device().bind_texture(self.target, Some(self.handle));
    }

    fn reallocate(&self, dim: u32, extents: [u32; 3]) -> Result<(), RenderError> {
        if dim != self.dimension() {
            return Err(RenderError::InvalidState(format!(
                "cannot resize a {}D texture with {dim}D extents",
                self.dimension()
            )));
        }
        self.extents.set(extents);
        self.bind();
        self.ctx
            .device()
            .tex_image(self.target, self.format, extents, None);
        // Fresh storage has no mip chain; restore the plain sampler.
        let mut sampler = self.sampler.get();
        if sampler.min_filter == TextureFilter::LinearMipmapLinear {
            sampler.min_filter = TextureFilter::Linear;
        }
        self.apply_sampler(sampler);
        self.ctx.check_error()
    }

    /// Resize a 1D texture. Contents are discarded.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::InvalidState`] if the texture is not 1D.
    pub fn resize_1d(&self, len: u32) -> Result<(), RenderError> {
        self.reallocate(1, [len, 1, 1])
    }

    /// Resize a 2D texture. Contents are discarded.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::InvalidState`] if the texture is not 2D.
    pub fn resize_2d(&self, width: u32, height: u32) -> Result<(), RenderError> {
        self.reallocate(2, [width, height, 1])
    }

    /// Resize a 3D texture. Contents are discarded.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::InvalidState`] if the texture is not 3D.
    pub fn resize_3d(&self, extents: [u32; 3]) -> Result<(), RenderError> {
        self.reallocate(3, extents)
    }

    /// Overwrite every texel.
    ///
    /// Accepts `f32`/`f64` for one-channel formats and `Vec3`/`Vec4` for
    /// three- and four-channel formats; other element types are not
    /// implemented.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::NotImplemented`] for unsupported element types,
    /// [`RenderError::InconsistentSize`] if the length is not the texel
    /// count, and [`RenderError::TypeMismatch`] if the element arity differs
    /// from the format's channel count.
    pub fn set_data<T: BufferElement>(&self, data: &[T]) -> Result<(), RenderError> {
        let channels = match (T::DATA_TYPE, T::ARRAY_COUNT) {
            (RenderDataType::Float, 1) => 1,
            (RenderDataType::Vector3Float, 1) => 3,
            (RenderDataType::Vector4Float, 1) => 4,
            (data_type, _) => {
                return Err(RenderError::NotImplemented(format!(
                    "texture writes from {data_type} data"
                )))
            }
        };
        if data.len() != self.total_size() {
            return Err(RenderError::InconsistentSize(format!(
                "texture holds {} texels, data has {}",
                self.total_size(),
                data.len()
            )));
        }
        if channels != self.format.channels() {
            return Err(RenderError::TypeMismatch(format!(
                "{} texture has {} channels, data has {channels}",
                self.format,
                self.format.channels()
            )));
        }
        let stored: Vec<T::Stored> = data.iter().map(|v| v.store()).collect();
        let floats: &[f32] = bytemuck::cast_slice(&stored);
        self.bind();
        self.ctx.device().tex_sub_image(
            self.target,
            self.format,
            self.extents.get(),
            TexelData::Floats(floats),
        );
        self.ctx.check_error()
    }

    /// Set the sampling filter. Also clamps every axis to edge.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Device`] if the device raises an error.
    pub fn set_filter_mode(&self, mode: FilterMode) -> Result<(), RenderError> {
        self.filter.set(mode);
        self.apply_sampler(SamplerState {
            min_filter: mode.into(),
            mag_filter: mode.into(),
            wrap: TextureWrap::ClampToEdge,
        });
        self.ctx.check_error()
    }

    /// Tile instead of clamping along every axis.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Device`] if the device raises an error.
    pub fn set_wrap_repeat(&self, repeat: bool) -> Result<(), RenderError> {
        let mut sampler = self.sampler.get();
        sampler.wrap = if repeat {
            TextureWrap::Repeat
        } else {
            TextureWrap::ClampToEdge
        };
        self.apply_sampler(sampler);
        self.ctx.check_error()
    }

    /// Build the mip chain and switch minification to trilinear.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Device`] if the device raises an error.
    pub fn generate_mipmaps(&self) -> Result<(), RenderError> {
        let mut sampler = self.sampler.get();
        sampler.min_filter = TextureFilter::LinearMipmapLinear;
        sampler.mag_filter = TextureFilter::Linear;
        self.apply_sampler(sampler);
        self.ctx.device().generate_mipmap(self.target);
        self.ctx.check_error()
    }

    fn apply_sampler(&self, sampler: SamplerState) {
        self.sampler.set(sampler);
        self.bind();
        self.ctx.device().tex_sampler(self.target, sampler);
    }

    fn read(&self, channels: u32, what: &str) -> Result<Vec<f32>, RenderError> {
        if self.format.channels() != channels {
            return Err(RenderError::TypeMismatch(format!(
                "{what} read from a {} texture with {} channels",
                self.format,
                self.format.channels()
            )));
        }
        let mut out = vec![0.0_f32; self.total_size() * channels as usize];
        let device = self.ctx.device();
        self.bind();
        device.finish();
        device.get_tex_image(self.target, channels, &mut out);
        self.ctx.check_error()?;
        Ok(out)
    }

    /// Read back a one-channel texture.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::TypeMismatch`] unless the format has one
    /// channel.
    pub fn get_data_scalar(&self) -> Result<Vec<f32>, RenderError> {
        self.read(1, "scalar")
    }

    /// Read back a two-channel texture.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::TypeMismatch`] unless the format has two
    /// channels.
    pub fn get_data_vector2(&self) -> Result<Vec<Vec2>, RenderError> {
        let raw = self.read(2, "vector2")?;
        Ok(raw.chunks_exact(2).map(Vec2::from_slice).collect())
    }

    /// Read back a three-channel texture.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::TypeMismatch`] unless the format has three
    /// channels.
    pub fn get_data_vector3(&self) -> Result<Vec<Vec3>, RenderError> {
        let raw = self.read(3, "vector3")?;
        Ok(raw.chunks_exact(3).map(Vec3::from_slice).collect())
    }

    /// Read back a four-channel texture.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::TypeMismatch`] unless the format has four
    /// channels.
    pub fn get_data_vector4(&self) -> Result<Vec<Vec4>, RenderError> {
        let raw = self.read(4, "vector4")?;
        Ok(raw.chunks_exact(4).map(Vec4::from_slice).collect())
    }

    /// Dimensionality, 1 to 3.
    #[must_use]
    pub fn dimension(&self) -> u32 {
        self.target.dimension()
    }

    /// Binding point.
    #[must_use]
    pub fn target(&self) -> TextureTarget {
        self.target
    }

    /// Pixel format.
    #[must_use]
    pub fn format(&self) -> TextureFormat {
        self.format
    }

    /// Extents; unused trailing axes are 1.
    #[must_use]
    pub fn extents(&self) -> [u32; 3] {
        self.extents.get()
    }

    /// Number of texels.
    #[must_use]
    pub fn total_size(&self) -> usize {
        self.extents.get().iter().map(|&e| e as usize).product()
    }

    /// Current sampling filter.
    #[must_use]
    pub fn filter_mode(&self) -> FilterMode {
        self.filter.get()
    }

    /// Native handle.
    #[must_use]
    pub fn handle(&self) -> TextureId {
        self.handle
    }

    /// Owning context.
    #[must_use]
    pub fn context(&self) -> &Rc<RenderContext> {
        &self.ctx
    }
}

impl Drop for TextureBuffer {
    fn drop(&mut self) {
        self.ctx.device().delete_texture(self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HeadlessDevice;

    fn context() -> (Rc<HeadlessDevice>, Rc<RenderContext>) {
        let device = Rc::new(HeadlessDevice::new());
        let ctx = RenderContext::new(device.clone());
        (device, ctx)
    }

    #[test]
    fn resize_discards_contents() {
        let (_, ctx) = context();
        let data = vec![0.5_f32; 64 * 64 * 4];
        let tex = TextureBuffer::new_2d(
            &ctx,
            TextureFormat::Rgba32F,
            64,
            64,
            Some(TexelData::Floats(&data)),
        )
        .unwrap();
        assert!(tex.get_data_vector4().unwrap().iter().all(|v| v.x == 0.5));
        tex.resize_2d(128, 128).unwrap();
        let back = tex.get_data_vector4().unwrap();
        assert_eq!(back.len(), 128 * 128);
        assert!(back.iter().all(|v| v.x == 0.0));
    }

    #[test]
    fn resize_must_match_dimension() {
        let (_, ctx) = context();
        let tex = TextureBuffer::new_1d(&ctx, TextureFormat::R32F, 8, None).unwrap();
        assert!(matches!(tex.resize_2d(4, 4), Err(RenderError::InvalidState(_))));
        tex.resize_1d(16).unwrap();
        assert_eq!(tex.total_size(), 16);
    }

    #[test]
    fn set_data_checks_size_kind_and_channels() {
        let (_, ctx) = context();
        let tex = TextureBuffer::new_2d(&ctx, TextureFormat::Rgb32F, 2, 2, None).unwrap();
        assert!(matches!(
            tex.set_data(&[Vec3::ONE; 3]),
            Err(RenderError::InconsistentSize(_))
        ));
        assert!(matches!(
            tex.set_data(&[1_u32; 4]),
            Err(RenderError::NotImplemented(_))
        ));
        assert!(matches!(
            tex.set_data(&[Vec4::ONE; 4]),
            Err(RenderError::TypeMismatch(_))
        ));
        tex.set_data(&[Vec3::new(0.25, 0.5, 1.0); 4]).unwrap();
        assert_eq!(tex.get_data_vector3().unwrap()[3], Vec3::new(0.25, 0.5, 1.0));
    }

    #[test]
    fn scalar_texture_accepts_f64() {
        let (_, ctx) = context();
        let tex = TextureBuffer::new_1d(&ctx, TextureFormat::R32F, 3, None).unwrap();
        tex.set_data(&[1.0_f64, 2.0, 3.0]).unwrap();
        assert_eq!(tex.get_data_scalar().unwrap(), vec![1.0, 2.0, 3.0]);
        assert!(matches!(
            tex.get_data_vector2(),
            Err(RenderError::TypeMismatch(_))
        ));
    }

    #[test]
    fn byte_data_is_normalized() {
        let (_, ctx) = context();
        let tex = TextureBuffer::new_1d(
            &ctx,
            TextureFormat::Rgba8,
            1,
            Some(TexelData::Bytes(&[255, 0, 51, 255])),
        )
        .unwrap();
        let px = tex.get_data_vector4().unwrap()[0];
        assert_eq!(px, Vec4::new(1.0, 0.0, 0.2, 1.0));
    }

    #[test]
    fn wrong_initial_data_length_is_rejected() {
        let (_, ctx) = context();
        let err = TextureBuffer::new_2d(
            &ctx,
            TextureFormat::Rgb8,
            2,
            2,
            Some(TexelData::Bytes(&[0; 4])),
        )
        .unwrap_err();
        assert!(matches!(err, RenderError::InconsistentSize(_)));
    }

    #[test]
    fn filter_mode_clamps_and_mipmaps_switch_min_filter() {
        let (device, ctx) = context();
        let tex = TextureBuffer::new_2d(&ctx, TextureFormat::Rgba8, 4, 4, None).unwrap();
        tex.set_wrap_repeat(true).unwrap();
        tex.set_filter_mode(FilterMode::Linear).unwrap();
        let sampler = device.texture_sampler(tex.handle()).unwrap();
        assert_eq!(sampler.wrap, TextureWrap::ClampToEdge);
        assert_eq!(sampler.mag_filter, TextureFilter::Linear);

        tex.generate_mipmaps().unwrap();
        assert!(device.texture_has_mipmaps(tex.handle()));
        assert_eq!(
            device.texture_sampler(tex.handle()).unwrap().min_filter,
            TextureFilter::LinearMipmapLinear
        );
    }
}
