//! The closed set of semantic element types the backend moves between host
//! and device.
//!
//! Buffers, attributes and uniforms all speak [`RenderDataType`]. Host data
//! enters through [`BufferElement`] (for arrays) or [`UniformValue`] (for
//! single values), so every setter has one validation path instead of one
//! overload per type.

use std::fmt;

use bytemuck::Pod;
use glam::{Mat4, UVec2, UVec3, UVec4, Vec2, Vec3, Vec4};

use crate::device::ScalarKind;

/// Semantic type of one element of a buffer, attribute or uniform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderDataType {
    /// `float`
    Float,
    /// `vec2`
    Vector2Float,
    /// `vec3`
    Vector3Float,
    /// `vec4`
    Vector4Float,
    /// `mat4`
    Matrix44Float,
    /// `int`
    Int,
    /// `uint`
    UInt,
    /// `uvec2`
    Vector2UInt,
    /// `uvec3`
    Vector3UInt,
    /// `uvec4`
    Vector4UInt,
}

impl RenderDataType {
    /// Number of scalar components in one element.
    #[must_use]
    pub const fn components(self) -> u32 {
        match self {
            Self::Float | Self::Int | Self::UInt => 1,
            Self::Vector2Float | Self::Vector2UInt => 2,
            Self::Vector3Float | Self::Vector3UInt => 3,
            Self::Vector4Float | Self::Vector4UInt => 4,
            Self::Matrix44Float => 16,
        }
    }

    /// Scalar kind of each component.
    #[must_use]
    pub const fn scalar_kind(self) -> ScalarKind {
        match self {
            Self::Float
            | Self::Vector2Float
            | Self::Vector3Float
            | Self::Vector4Float
            | Self::Matrix44Float => ScalarKind::Float,
            Self::Int => ScalarKind::Int,
            Self::UInt
            | Self::Vector2UInt
            | Self::Vector3UInt
            | Self::Vector4UInt => ScalarKind::UInt,
        }
    }

    /// Size of one element in bytes. Every scalar kind is 4 bytes wide.
    #[must_use]
    pub const fn size_bytes(self) -> usize {
        self.components() as usize * 4
    }

    /// Whether the type is made of floating-point components.
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self.scalar_kind(), ScalarKind::Float)
    }

    /// How many elements of a `buffer`-typed stream make up one element of
    /// an `attribute`-typed input.
    ///
    /// Identical types map one-to-one. A packed scalar stream may feed a
    /// vector attribute of the same scalar kind, consuming one scalar per
    /// component. Everything else is incompatible (`None`).
    #[must_use]
    pub const fn count_compatibility(
        attribute: Self,
        buffer: Self,
    ) -> Option<usize> {
        match (attribute, buffer) {
            (a, b) if a as u8 == b as u8 => Some(1),
            (Self::Vector2Float, Self::Float)
            | (Self::Vector2UInt, Self::UInt) => Some(2),
            (Self::Vector3Float, Self::Float)
            | (Self::Vector3UInt, Self::UInt) => Some(3),
            (Self::Vector4Float, Self::Float)
            | (Self::Vector4UInt, Self::UInt) => Some(4),
            _ => None,
        }
    }
}

impl fmt::Display for RenderDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Float => "Float",
            Self::Vector2Float => "Vector2Float",
            Self::Vector3Float => "Vector3Float",
            Self::Vector4Float => "Vector4Float",
            Self::Matrix44Float => "Matrix44Float",
            Self::Int => "Int",
            Self::UInt => "UInt",
            Self::Vector2UInt => "Vector2UInt",
            Self::Vector3UInt => "Vector3UInt",
            Self::Vector4UInt => "Vector4UInt",
        };
        f.write_str(s)
    }
}

/// Host-side element type that can be written to and read from a typed
/// buffer.
///
/// `Stored` is the device representation. It equals `Self` for every type
/// except `f64`, which is narrowed to `f32` on write and widened on read.
pub trait BufferElement: Copy {
    /// Semantic type of one stored element.
    const DATA_TYPE: RenderDataType;
    /// Fixed small array multiplicity (e.g. 3 for `[Vec3; 3]`).
    const ARRAY_COUNT: u32 = 1;
    /// Device-side representation.
    type Stored: Pod;

    /// Convert to the device representation.
    fn store(self) -> Self::Stored;
    /// Convert back from the device representation.
    fn load(stored: Self::Stored) -> Self;
}

macro_rules! pod_element {
    ($ty:ty, $data_type:ident) => {
        pod_element!($ty, $data_type, 1);
    };
    ($ty:ty, $data_type:ident, $count:expr) => {
        impl BufferElement for $ty {
            const DATA_TYPE: RenderDataType = RenderDataType::$data_type;
            const ARRAY_COUNT: u32 = $count;
            type Stored = Self;

            fn store(self) -> Self {
                self
            }

            fn load(stored: Self) -> Self {
                stored
            }
        }
    };
}

pod_element!(f32, Float);
pod_element!(i32, Int);
pod_element!(u32, UInt);
pod_element!(Vec2, Vector2Float);
pod_element!(Vec3, Vector3Float);
pod_element!(Vec4, Vector4Float);
pod_element!(Mat4, Matrix44Float);
pod_element!(UVec2, Vector2UInt);
pod_element!(UVec3, Vector3UInt);
pod_element!(UVec4, Vector4UInt);
pod_element!([Vec3; 2], Vector3Float, 2);
pod_element!([Vec3; 3], Vector3Float, 3);
pod_element!([Vec3; 4], Vector3Float, 4);

impl BufferElement for f64 {
    const DATA_TYPE: RenderDataType = RenderDataType::Float;
    type Stored = f32;

    fn store(self) -> f32 {
        self as f32
    }

    fn load(stored: f32) -> Self {
        Self::from(stored)
    }
}

/// Human-readable `Type[count]` label used in mismatch messages.
pub(crate) fn type_label(data_type: RenderDataType, array_count: u32) -> String {
    if array_count == 1 {
        data_type.to_string()
    } else {
        format!("{data_type}[{array_count}]")
    }
}

/// A single uniform value, tagged with its semantic type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    /// `int`
    Int(i32),
    /// `uint`
    UInt(u32),
    /// `float`
    Float(f32),
    /// `vec2`
    Vec2(Vec2),
    /// `vec3`
    Vec3(Vec3),
    /// `vec4`
    Vec4(Vec4),
    /// `uvec2`
    UVec2(UVec2),
    /// `uvec3`
    UVec3(UVec3),
    /// `uvec4`
    UVec4(UVec4),
    /// `mat4`, column-major.
    Mat4(Mat4),
}

impl UniformValue {
    /// Semantic type of the value.
    #[must_use]
    pub const fn data_type(&self) -> RenderDataType {
        match self {
            Self::Int(_) => RenderDataType::Int,
            Self::UInt(_) => RenderDataType::UInt,
            Self::Float(_) => RenderDataType::Float,
            Self::Vec2(_) => RenderDataType::Vector2Float,
            Self::Vec3(_) => RenderDataType::Vector3Float,
            Self::Vec4(_) => RenderDataType::Vector4Float,
            Self::UVec2(_) => RenderDataType::Vector2UInt,
            Self::UVec3(_) => RenderDataType::Vector3UInt,
            Self::UVec4(_) => RenderDataType::Vector4UInt,
            Self::Mat4(_) => RenderDataType::Matrix44Float,
        }
    }
}

macro_rules! uniform_from {
    ($ty:ty, $variant:ident) => {
        impl From<$ty> for UniformValue {
            fn from(v: $ty) -> Self {
                Self::$variant(v)
            }
        }
    };
}

uniform_from!(i32, Int);
uniform_from!(u32, UInt);
uniform_from!(f32, Float);
uniform_from!(Vec2, Vec2);
uniform_from!(Vec3, Vec3);
uniform_from!(Vec4, Vec4);
uniform_from!(UVec2, UVec2);
uniform_from!(UVec3, UVec3);
uniform_from!(UVec4, UVec4);
uniform_from!(Mat4, Mat4);

/// Narrows to single precision.
impl From<f64> for UniformValue {
    fn from(v: f64) -> Self {
        Self::Float(v as f32)
    }
}

impl From<[f32; 3]> for UniformValue {
    fn from(v: [f32; 3]) -> Self {
        Self::Vec3(Vec3::from_array(v))
    }
}

impl From<[f32; 4]> for UniformValue {
    fn from(v: [f32; 4]) -> Self {
        Self::Vec4(Vec4::from_array(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compatibility_table() {
        use RenderDataType::{Float, UInt, Vector3Float, Vector3UInt};
        assert_eq!(
            RenderDataType::count_compatibility(Vector3Float, Vector3Float),
            Some(1)
        );
        assert_eq!(
            RenderDataType::count_compatibility(Vector3Float, Float),
            Some(3)
        );
        assert_eq!(
            RenderDataType::count_compatibility(Vector3UInt, UInt),
            Some(3)
        );
        assert_eq!(RenderDataType::count_compatibility(Float, Vector3Float), None);
        assert_eq!(RenderDataType::count_compatibility(Vector3UInt, Float), None);
    }

    #[test]
    fn f64_narrows_and_widens() {
        let stored = 0.1_f64.store();
        assert_eq!(stored, 0.1_f32);
        assert_eq!(f64::load(stored), f64::from(0.1_f32));
    }

    #[test]
    fn array_elements_carry_multiplicity() {
        assert_eq!(<[Vec3; 3]>::DATA_TYPE, RenderDataType::Vector3Float);
        assert_eq!(<[Vec3; 3]>::ARRAY_COUNT, 3);
        assert_eq!(type_label(RenderDataType::Vector3Float, 3), "Vector3Float[3]");
    }

    #[test]
    fn uniform_values_report_their_type() {
        assert_eq!(
            UniformValue::from([1.0_f32, 2.0, 3.0]).data_type(),
            RenderDataType::Vector3Float
        );
        assert_eq!(UniformValue::from(2.5_f64), UniformValue::Float(2.5));
        assert_eq!(
            UniformValue::from(Mat4::IDENTITY).data_type(),
            RenderDataType::Matrix44Float
        );
    }
}
