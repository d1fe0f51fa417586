use crate::{
    element::{AttributeElement, AttributeUsage},
    value::ValueKind,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // Registry.
    #[error("attribute '{0}' does not exist")]
    UnknownAttribute(String),
    #[error("attribute '{0}' already exists")]
    DuplicateName(String),
    #[error("'{0}' is a reserved attribute name")]
    ReservedName(String),
    #[error("attribute value type mismatch: expected {expected:?}, found {found:?}")]
    TypeMismatch { expected: ValueKind, found: ValueKind },
    #[error("attribute '{0}' exists with a different shape")]
    AttributeShapeMismatch(String),
    #[error("{channels} channels is not valid for usage {usage:?}")]
    InvalidChannelCount {
        usage: AttributeUsage,
        channels: usize,
    },
    #[error("usage {usage:?} requires an integral value type, found {found:?}")]
    NonIntegralIndex {
        usage: AttributeUsage,
        found: ValueKind,
    },
    #[error("attribute element {0:?} is not supported by this operation")]
    UnsupportedElement(AttributeElement),
    // Buffer ownership.
    #[error("attempted to write to a read-only attribute buffer")]
    ReadOnlyViolation,
    #[error("requested {requested} values but the external buffer only holds {capacity}")]
    CapacityExceeded { requested: usize, capacity: usize },
    #[error("external buffer policy violation: {0}")]
    ExternalBufferPolicyViolation(&'static str),
    // Mapping and indexing.
    #[error("{count} source elements map to target element {target}")]
    NonInjectiveMapping { target: usize, count: usize },
    #[error("cannot average attribute values with usage {0:?}")]
    InvalidAverage(AttributeUsage),
    #[error("index {index} is out of range for {len} elements")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("mismatched array lengths {0} and {1}")]
    MismatchedArrayLengths(usize, usize),
    #[error("invalid mapping: {0}")]
    InvalidMapping(String),
    // Mesh.
    #[error("edge connectivity is not initialized")]
    MissingEdges,
    #[error("facets must have at least 3 vertices, found {0}")]
    InvalidFacetSize(usize),
    #[error("mesh dimension must be 2 or 3, found {0}")]
    InvalidDimension(usize),
    #[error("mesh topology is inconsistent: {0}")]
    InvalidTopology(String),
}

pub type Result<T> = std::result::Result<T, Error>;
