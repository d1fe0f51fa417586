/*!
This is an attribute based polygon mesh data engine. Everything a mesh knows,
including its vertex positions and its facets, is stored as a named attribute
in a flat, typed buffer.

# Overview

+ An [`Attribute<T>`] is a buffer of `rows x channels` values of one of the
  supported numeric types. Rows are tied to a kind of mesh element, described
  by [`AttributeElement`], and the meaning of the values is described by
  [`AttributeUsage`].

+ An attribute either owns its buffer, or wraps memory owned by the caller,
  without copying. When an operation conflicts with external ownership, for
  example growing past the capacity of the wrapped memory or writing to
  read-only memory, the policies in [`policy`] decide whether to fail or to
  copy the data and carry on.

+ [`IndexedAttribute<T>`] stores values shared between corners through an
  index buffer. This is how attributes with seams, like UVs, are
  represented.

+ The [`AttributeRegistry`] owns all attributes of a mesh, addressed by name
  or by a stable [`AttributeId`]. Names starting with `$` are reserved for the
  mesh itself.

+ [`SurfaceMesh`] stores the vertices and the facets as reserved attributes,
  supports regular and hybrid facet layouts, and builds the edges and the
  corner chains around vertices and edges on demand, using the
  [`ConnectivityBuilder`]. Cloning a mesh is cheap: attributes are shared and
  only copied when one of the clones writes to them.

+ The [`remap`] module moves attribute values between element sets, for
  example when vertices are merged or reordered.

+ With the `use_glam` feature, positions of three dimensional meshes can be
  read and written as [`glam`](https://crates.io/crates/glam) vectors, see
  the [`use_glam`] module.
*/

mod attribute;
mod buffer;
mod check;
mod connectivity;
mod element;
mod error;
mod indexed;
mod iterator;
mod macros;
mod mesh;
pub mod policy;
mod registry;
pub mod remap;
mod value;

#[cfg(feature = "use_glam")]
pub mod use_glam;

pub use attribute::Attribute;
pub use buffer::{BufferOwner, ExportedBuffer};
pub use connectivity::{Connectivity, ConnectivityBuilder, EdgeKey};
pub use element::{
    AttributeElement, AttributeId, AttributeUsage, ElementCounts, ElementMask,
    INVALID_ATTRIBUTE_ID, INVALID_INDEX, Index,
};
pub use error::{Error, Result};
pub use indexed::IndexedAttribute;
pub use iterator::CornerChainIter;
pub use mesh::{SurfaceMesh, names};
pub use policy::{
    BufferPolicies, CopyPolicy, CreatePolicy, DeletePolicy, ExportPolicy, GrowthPolicy,
    MappingPolicy, ResetToDefault, ShrinkPolicy, WritePolicy,
};
pub use registry::{AttributeBase, AttributeRegistry, RESERVED_PREFIX, is_reserved_name};
pub use value::{AttributeValue, Scalar, ValueKind};
