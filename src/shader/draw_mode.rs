//! Primitive topology and indexing scheme of a program.

use crate::device::Primitive;

/// How bound vertex data is interpreted by a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrawMode {
    /// Points.
    Points,
    /// Independent lines.
    Lines,
    /// Triangles.
    Triangles,
    /// Triangles with adjacency.
    TrianglesAdjacency,
    /// Lines with adjacency.
    LinesAdjacency,
    /// Indexed independent lines.
    IndexedLines,
    /// Indexed line strip; supports primitive restart.
    IndexedLineStrip,
    /// Indexed lines with adjacency.
    IndexedLinesAdjacency,
    /// Indexed line strip with adjacency; supports primitive restart.
    IndexedLineStripAdjacency,
    /// Indexed triangles.
    IndexedTriangles,
    /// Instanced triangles.
    TrianglesInstanced,
    /// Instanced triangle strip.
    TriangleStripInstanced,
}

impl DrawMode {
    /// Native topology.
    #[must_use]
    pub const fn primitive(self) -> Primitive {
        match self {
            Self::Points => Primitive::Points,
            Self::Lines | Self::IndexedLines => Primitive::Lines,
            Self::Triangles
            | Self::IndexedTriangles
            | Self::TrianglesInstanced => Primitive::Triangles,
            Self::TrianglesAdjacency => Primitive::TrianglesAdjacency,
            Self::LinesAdjacency | Self::IndexedLinesAdjacency => {
                Primitive::LinesAdjacency
            }
            Self::IndexedLineStrip => Primitive::LineStrip,
            Self::IndexedLineStripAdjacency => Primitive::LineStripAdjacency,
            Self::TriangleStripInstanced => Primitive::TriangleStrip,
        }
    }

    /// Whether draws read an index buffer.
    #[must_use]
    pub const fn uses_index(self) -> bool {
        matches!(
            self,
            Self::IndexedLines
                | Self::IndexedLineStrip
                | Self::IndexedLinesAdjacency
                | Self::IndexedLineStripAdjacency
                | Self::IndexedTriangles
        )
    }

    /// Whether draws are instanced.
    #[must_use]
    pub const fn is_instanced(self) -> bool {
        matches!(self, Self::TrianglesInstanced | Self::TriangleStripInstanced)
    }

    /// Whether primitive restart applies.
    #[must_use]
    pub const fn uses_primitive_restart(self) -> bool {
        matches!(self, Self::IndexedLineStrip | Self::IndexedLineStripAdjacency)
    }
}
