use crate::error::{Error, Result};
use std::ops::BitOr;

/// Identifier of an attribute inside an [`AttributeRegistry`](crate::AttributeRegistry).
///
/// Ids are handed out sequentially and are never reused, even after the
/// attribute they refer to is deleted.
pub type AttributeId = u32;

/// Sentinel for an attribute id that does not refer to any attribute.
pub const INVALID_ATTRIBUTE_ID: AttributeId = AttributeId::MAX;

/// Index of a mesh element (vertex, facet, corner or edge).
pub type Index = u32;

/// Sentinel for an index that does not refer to any element. Used by index
/// attributes and to terminate the corner chains built by the connectivity.
pub const INVALID_INDEX: Index = Index::MAX;

/**
 * The kind of mesh element an attribute is defined on.
 */
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum AttributeElement {
    /// One row per vertex.
    Vertex = 1 << 0,
    /// One row per facet.
    Facet = 1 << 1,
    /// One row per edge. Only available when the edges are initialized.
    Edge = 1 << 2,
    /// One row per facet corner.
    Corner = 1 << 3,
    /// Free floating rows, not tied to the number of any mesh element.
    Value = 1 << 4,
    /// Values shared by corners through an index buffer.
    Indexed = 1 << 5,
}

impl AttributeElement {
    pub const ALL: [AttributeElement; 6] = [
        AttributeElement::Vertex,
        AttributeElement::Facet,
        AttributeElement::Edge,
        AttributeElement::Corner,
        AttributeElement::Value,
        AttributeElement::Indexed,
    ];

    pub fn bit(self) -> u8 {
        self as u8
    }
}

/// A set of [`AttributeElement`]s, used to filter attributes when iterating
/// over a registry.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ElementMask(u8);

impl ElementMask {
    pub const ALL: ElementMask = ElementMask(0b11_1111);
    pub const NONE: ElementMask = ElementMask(0);

    pub fn contains(&self, element: AttributeElement) -> bool {
        self.0 & element.bit() != 0
    }
}

impl From<AttributeElement> for ElementMask {
    fn from(element: AttributeElement) -> Self {
        ElementMask(element.bit())
    }
}

impl BitOr for AttributeElement {
    type Output = ElementMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        ElementMask(self.bit() | rhs.bit())
    }
}

impl BitOr<AttributeElement> for ElementMask {
    type Output = ElementMask;

    fn bitor(self, rhs: AttributeElement) -> Self::Output {
        ElementMask(self.0 | rhs.bit())
    }
}

impl BitOr for ElementMask {
    type Output = ElementMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        ElementMask(self.0 | rhs.0)
    }
}

/**
 * Hint describing what the values of an attribute represent. The usage does
 * not affect the storage layout, but it constrains the number of channels, and
 * tells the remapping algorithms which attributes hold element indices.
 */
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AttributeUsage {
    /// Any number of channels.
    Vector,
    /// Exactly 1 channel.
    Scalar,
    /// As many channels as the mesh dimension.
    Position,
    /// Mesh dimension, or dimension + 1 channels.
    Normal,
    /// Mesh dimension, or dimension + 1 channels.
    Tangent,
    /// Mesh dimension, or dimension + 1 channels.
    Bitangent,
    /// 1 to 4 channels.
    Color,
    /// Exactly 2 channels.
    UV,
    /// Single channel integer attribute indexing a vertex.
    VertexIndex,
    /// Single channel integer attribute indexing a facet.
    FacetIndex,
    /// Single channel integer attribute indexing a corner.
    CornerIndex,
    /// Single channel integer attribute indexing an edge.
    EdgeIndex,
    /// Bytes of a string, stored one byte per row.
    String,
}

impl AttributeUsage {
    /// Whether the values of this attribute are indices of mesh elements.
    pub fn is_index(&self) -> bool {
        matches!(
            self,
            AttributeUsage::VertexIndex
                | AttributeUsage::FacetIndex
                | AttributeUsage::CornerIndex
                | AttributeUsage::EdgeIndex
        )
    }

    /// The element kind indexed by the values of this attribute, if any.
    pub fn indexed_element(&self) -> Option<AttributeElement> {
        match self {
            AttributeUsage::VertexIndex => Some(AttributeElement::Vertex),
            AttributeUsage::FacetIndex => Some(AttributeElement::Facet),
            AttributeUsage::CornerIndex => Some(AttributeElement::Corner),
            AttributeUsage::EdgeIndex => Some(AttributeElement::Edge),
            _ => None,
        }
    }

    /// Check the number of channels against this usage. The dimension
    /// dependent usages are only checked when `dimension` is known.
    pub fn check_channels(&self, channels: usize, dimension: Option<usize>) -> Result<()> {
        let valid = channels > 0
            && match self {
                AttributeUsage::Vector => true,
                AttributeUsage::Scalar | AttributeUsage::String => channels == 1,
                AttributeUsage::UV => channels == 2,
                AttributeUsage::Color => channels <= 4,
                AttributeUsage::Position => dimension.is_none_or(|d| channels == d),
                AttributeUsage::Normal | AttributeUsage::Tangent | AttributeUsage::Bitangent => {
                    dimension.is_none_or(|d| channels == d || channels == d + 1)
                }
                AttributeUsage::VertexIndex
                | AttributeUsage::FacetIndex
                | AttributeUsage::CornerIndex
                | AttributeUsage::EdgeIndex => channels == 1,
            };
        if valid {
            Ok(())
        } else {
            Err(Error::InvalidChannelCount {
                usage: *self,
                channels,
            })
        }
    }
}

/// Number of elements of each kind, used to size newly created attributes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ElementCounts {
    pub vertices: usize,
    pub facets: usize,
    pub edges: usize,
    pub corners: usize,
}

impl ElementCounts {
    /// Number of rows an attribute of `element` type should have. Value
    /// attributes are not tied to the mesh, and indexed attributes are sized
    /// by the number of corners.
    pub fn rows(&self, element: AttributeElement) -> usize {
        match element {
            AttributeElement::Vertex => self.vertices,
            AttributeElement::Facet => self.facets,
            AttributeElement::Edge => self.edges,
            AttributeElement::Corner | AttributeElement::Indexed => self.corners,
            AttributeElement::Value => 0,
        }
    }

    pub(crate) fn set(&mut self, element: AttributeElement, n: usize) {
        match element {
            AttributeElement::Vertex => self.vertices = n,
            AttributeElement::Facet => self.facets = n,
            AttributeElement::Edge => self.edges = n,
            AttributeElement::Corner | AttributeElement::Indexed => self.corners = n,
            AttributeElement::Value => {}
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn t_element_mask() {
        let mask = AttributeElement::Vertex | AttributeElement::Corner;
        assert!(mask.contains(AttributeElement::Vertex));
        assert!(mask.contains(AttributeElement::Corner));
        assert!(!mask.contains(AttributeElement::Facet));
        assert!(!mask.contains(AttributeElement::Indexed));
        for e in AttributeElement::ALL {
            assert!(ElementMask::ALL.contains(e));
            assert!(!ElementMask::NONE.contains(e));
        }
    }

    #[test]
    fn t_usage_channels() {
        assert!(AttributeUsage::Scalar.check_channels(1, None).is_ok());
        assert!(AttributeUsage::Scalar.check_channels(2, None).is_err());
        assert!(AttributeUsage::UV.check_channels(2, Some(3)).is_ok());
        assert!(AttributeUsage::UV.check_channels(3, Some(3)).is_err());
        assert!(AttributeUsage::Color.check_channels(4, None).is_ok());
        assert!(AttributeUsage::Color.check_channels(5, None).is_err());
        assert!(AttributeUsage::Position.check_channels(3, Some(3)).is_ok());
        assert!(AttributeUsage::Position.check_channels(2, Some(3)).is_err());
        assert!(AttributeUsage::Normal.check_channels(4, Some(3)).is_ok());
        assert!(AttributeUsage::Normal.check_channels(5, Some(3)).is_err());
        assert!(AttributeUsage::Vector.check_channels(0, None).is_err());
        assert!(matches!(
            AttributeUsage::VertexIndex.check_channels(2, None),
            Err(Error::InvalidChannelCount {
                usage: AttributeUsage::VertexIndex,
                channels: 2
            })
        ));
    }

    #[test]
    fn t_element_counts() {
        let counts = ElementCounts {
            vertices: 4,
            facets: 2,
            edges: 5,
            corners: 6,
        };
        assert_eq!(counts.rows(AttributeElement::Vertex), 4);
        assert_eq!(counts.rows(AttributeElement::Indexed), 6);
        assert_eq!(counts.rows(AttributeElement::Value), 0);
    }
}
