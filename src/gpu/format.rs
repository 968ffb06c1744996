//! Pixel formats for textures and renderbuffers.

use std::fmt;

/// Storage format of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// 8-bit normalized RGB.
    Rgb8,
    /// 8-bit normalized RGBA.
    Rgba8,
    /// Half-float RG.
    Rg16F,
    /// Half-float RGB.
    Rgb16F,
    /// Half-float RGBA.
    Rgba16F,
    /// Single-channel float.
    R32F,
    /// Single-channel half float.
    R16F,
    /// Float RGB.
    Rgb32F,
    /// Float RGBA.
    Rgba32F,
    /// 24-bit depth.
    Depth24,
}

impl TextureFormat {
    /// Number of channels per texel.
    #[must_use]
    pub const fn channels(self) -> u32 {
        match self {
            Self::R32F | Self::R16F | Self::Depth24 => 1,
            Self::Rg16F => 2,
            Self::Rgb8 | Self::Rgb16F | Self::Rgb32F => 3,
            Self::Rgba8 | Self::Rgba16F | Self::Rgba32F => 4,
        }
    }

    /// Whether texels are stored at half precision.
    #[must_use]
    pub const fn is_half_float(self) -> bool {
        matches!(self, Self::Rg16F | Self::Rgb16F | Self::Rgba16F | Self::R16F)
    }

    /// Whether texels are stored as normalized bytes.
    #[must_use]
    pub const fn is_normalized_byte(self) -> bool {
        matches!(self, Self::Rgb8 | Self::Rgba8)
    }

    /// Whether this is a depth format.
    #[must_use]
    pub const fn is_depth(self) -> bool {
        matches!(self, Self::Depth24)
    }
}

impl fmt::Display for TextureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Rgb8 => "RGB8",
            Self::Rgba8 => "RGBA8",
            Self::Rg16F => "RG16F",
            Self::Rgb16F => "RGB16F",
            Self::Rgba16F => "RGBA16F",
            Self::R32F => "R32F",
            Self::R16F => "R16F",
            Self::Rgb32F => "RGB32F",
            Self::Rgba32F => "RGBA32F",
            Self::Depth24 => "DEPTH24",
        };
        f.write_str(s)
    }
}

/// Content kind of a renderbuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderBufferType {
    /// RGBA, 8 bits per channel.
    ColorAlpha,
    /// RGB, 8 bits per channel.
    Color,
    /// Depth only.
    Depth,
    /// RGBA float.
    Float4,
}

impl RenderBufferType {
    /// Texture format with the same storage layout.
    #[must_use]
    pub const fn storage_format(self) -> TextureFormat {
        match self {
            Self::ColorAlpha => TextureFormat::Rgba8,
            Self::Color => TextureFormat::Rgb8,
            Self::Depth => TextureFormat::Depth24,
            Self::Float4 => TextureFormat::Rgba32F,
        }
    }

    /// Whether this renderbuffer holds depth.
    #[must_use]
    pub const fn is_depth(self) -> bool {
        matches!(self, Self::Depth)
    }
}

impl fmt::Display for RenderBufferType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ColorAlpha => "ColorAlpha",
            Self::Color => "Color",
            Self::Depth => "Depth",
            Self::Float4 => "Float4",
        };
        f.write_str(s)
    }
}
