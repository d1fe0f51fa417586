/*!
Policies that decide what happens when an operation conflicts with the
ownership of an attribute buffer, or with the reserved attribute names.

Policies are plain values passed at the call site or stored on the attribute.
Several of them select a non-error outcome, such as silently copying an
external buffer into owned storage.
*/

/// Creation of attributes with a reserved name.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum CreatePolicy {
    #[default]
    ErrorIfReserved,
    Force,
}

/// Deletion of attributes with a reserved name.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum DeletePolicy {
    #[default]
    ErrorIfReserved,
    Force,
}

/// What to do when an attribute wrapping an external buffer needs to grow.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum GrowthPolicy {
    /// Fail whenever the number of elements changes, even within capacity.
    #[default]
    ErrorIfExternal,
    /// Allow growth as long as the external capacity is not exceeded.
    AllowWithinCapacity,
    /// Log a warning and copy the data into an internal buffer.
    WarnAndCopy,
    /// Copy the data into an internal buffer.
    SilentCopy,
}

/// What to do when an attribute wrapping an external buffer is asked to
/// release unused capacity.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ShrinkPolicy {
    ErrorIfExternal,
    /// Leave the external buffer untouched.
    #[default]
    IgnoreIfExternal,
    WarnAndCopy,
    SilentCopy,
}

/// What to do when writing to an attribute that wraps a read-only buffer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum WritePolicy {
    #[default]
    ErrorIfReadOnly,
    WarnAndCopy,
    SilentCopy,
}

/// How the data of an external buffer is handed back on export.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ExportPolicy {
    /// Copy the data if the attribute wraps an external buffer.
    #[default]
    CopyIfExternal,
    /// Copy the data only if nobody manages the lifetime of the external
    /// buffer. Managed buffers are shared instead.
    CopyIfUnmanaged,
    /// Hand back the raw external pointer. The caller becomes responsible
    /// for its validity.
    KeepExternalPtr,
    ErrorIfExternal,
}

/// How an attribute wrapping an external buffer is copied.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum CopyPolicy {
    #[default]
    CopyIfExternal,
    /// The copy aliases the same external buffer.
    KeepExternalPtr,
    ErrorIfExternal,
}

/// Whether `find_or_create` resets the values of an existing attribute.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ResetToDefault {
    Yes,
    #[default]
    No,
}

/// How several source elements collapsing into one target element are
/// combined when mapping attributes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum MappingPolicy {
    /// Average the values of the group.
    #[default]
    Average,
    /// Keep the value of the first element of the group.
    KeepFirst,
    /// Every group must contain exactly one element.
    Error,
}

/// The full set of ownership policies carried by an attribute.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BufferPolicies {
    pub growth: GrowthPolicy,
    pub shrink: ShrinkPolicy,
    pub write: WritePolicy,
    pub copy: CopyPolicy,
}
