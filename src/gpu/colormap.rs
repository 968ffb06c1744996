//! Named colormap sample tables and their 1D lookup textures.

use std::rc::Rc;

use glam::Vec3;

use super::format::TextureFormat;
use super::render_context::RenderContext;
use super::texture::{FilterMode, TextureBuffer};
use crate::device::TexelData;
use crate::error::RenderError;

/// An evenly spaced table of RGB samples over `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Colormap {
    name: String,
    values: Vec<Vec3>,
}

impl Colormap {
    /// Colormap `name` with at least one sample.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::InconsistentSize`] if `values` is empty.
    pub fn new(name: impl Into<String>, values: Vec<Vec3>) -> Result<Self, RenderError> {
        let name = name.into();
        if values.is_empty() {
            return Err(RenderError::InconsistentSize(format!(
                "colormap [{name}] has no samples"
            )));
        }
        Ok(Self { name, values })
    }

    /// Registered name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw samples.
    #[must_use]
    pub fn values(&self) -> &[Vec3] {
        &self.values
    }

    /// Linearly interpolated color at `t`, clamped to `[0, 1]`.
    #[must_use]
    pub fn sample(&self, t: f32) -> Vec3 {
        let last = self.values.len() - 1;
        if last == 0 || t.is_nan() {
            return self.values[0];
        }
        let pos = t.clamp(0.0, 1.0) * last as f32;
        let lo = (pos.floor() as usize).min(last);
        let hi = (lo + 1).min(last);
        self.values[lo].lerp(self.values[hi], pos - lo as f32)
    }

    /// Upload as an RGB32F 1D texture with linear filtering.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Allocation`] if the device cannot create a
    /// texture.
    pub fn create_texture(
        &self,
        ctx: &Rc<RenderContext>,
    ) -> Result<TextureBuffer, RenderError> {
        let floats: Vec<f32> =
            self.values.iter().flat_map(|v| v.to_array()).collect();
        let texture = TextureBuffer::new_1d(
            ctx,
            TextureFormat::Rgb32F,
            self.values.len() as u32,
            Some(TexelData::Floats(&floats)),
        )?;
        texture.set_filter_mode(FilterMode::Linear)?;
        Ok(texture)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> Colormap {
        Colormap::new("ramp", vec![Vec3::ZERO, Vec3::ONE]).unwrap()
    }

    #[test]
    fn sampling_interpolates_and_clamps() {
        let cm = ramp();
        assert_eq!(cm.sample(0.5), Vec3::splat(0.5));
        assert_eq!(cm.sample(-3.0), Vec3::ZERO);
        assert_eq!(cm.sample(7.0), Vec3::ONE);
    }

    #[test]
    fn empty_tables_are_rejected() {
        assert!(Colormap::new("empty", Vec::new()).is_err());
    }

    #[test]
    fn texture_is_linear_rgb() {
        let ctx = RenderContext::headless();
        let tex = ramp().create_texture(&ctx).unwrap();
        assert_eq!(tex.format(), TextureFormat::Rgb32F);
        assert_eq!(tex.dimension(), 1);
        assert_eq!(tex.filter_mode(), FilterMode::Linear);
        assert_eq!(tex.get_data_vector3().unwrap(), vec![Vec3::ZERO, Vec3::ONE]);
    }
}
