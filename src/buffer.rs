use std::{any::Any, fmt::Debug, ptr::NonNull, sync::Arc};

/// Keeps the memory behind an external buffer alive, if somebody manages it.
pub type BufferOwner = Arc<dyn Any + Send + Sync>;

/// A span of memory owned by someone other than the attribute.
#[derive(Clone)]
pub(crate) struct ExternalSpan<T> {
    ptr: NonNull<T>,
    /// Number of values the external memory can hold.
    capacity: usize,
    /// Number of values in use.
    len: usize,
    owner: Option<BufferOwner>,
}

impl<T> ExternalSpan<T> {
    /// # Safety
    ///
    /// `ptr` must be valid for reads (and writes, if the span is used
    /// mutably) of `capacity` values for as long as the span, or any copy of
    /// it, is alive.
    pub(crate) unsafe fn new(
        ptr: NonNull<T>,
        capacity: usize,
        len: usize,
        owner: Option<BufferOwner>,
    ) -> Self {
        debug_assert!(len <= capacity);
        ExternalSpan {
            ptr,
            capacity,
            len,
            owner,
        }
    }

    fn as_slice(&self) -> &[T] {
        // SAFETY: Guaranteed by the contract of `ExternalSpan::new`.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    fn as_mut_slice(&mut self) -> &mut [T] {
        // SAFETY: Guaranteed by the contract of `ExternalSpan::new`.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

/**
 * Storage backing an attribute. Exactly one of these variants is active at
 * any time.
 */
pub(crate) enum Buffer<T> {
    /// Heap buffer owned by the attribute. The length of the vector is the
    /// number of values in use.
    Owned(Vec<T>),
    /// Mutable memory owned by the caller.
    External(ExternalSpan<T>),
    /// Read-only memory owned by the caller.
    ExternalConst(ExternalSpan<T>),
}

// SAFETY: Owned buffers are plain vectors. External spans only hand out
// references according to the contract the caller accepted when wrapping the
// memory, and the optional owner is itself `Send + Sync`.
unsafe impl<T: Send + Sync> Send for Buffer<T> {}
unsafe impl<T: Send + Sync> Sync for Buffer<T> {}

impl<T> Buffer<T>
where
    T: Copy,
{
    pub fn as_slice(&self) -> &[T] {
        match self {
            Buffer::Owned(v) => v,
            Buffer::External(span) | Buffer::ExternalConst(span) => span.as_slice(),
        }
    }

    /// Mutable access to the values, `None` for read-only buffers.
    pub fn as_mut_slice(&mut self) -> Option<&mut [T]> {
        match self {
            Buffer::Owned(v) => Some(v),
            Buffer::External(span) => Some(span.as_mut_slice()),
            Buffer::ExternalConst(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Buffer::Owned(v) => v.len(),
            Buffer::External(span) | Buffer::ExternalConst(span) => span.len,
        }
    }

    pub fn capacity(&self) -> usize {
        match self {
            Buffer::Owned(v) => v.capacity(),
            Buffer::External(span) | Buffer::ExternalConst(span) => span.capacity,
        }
    }

    pub fn as_ptr(&self) -> *const T {
        match self {
            Buffer::Owned(v) => v.as_ptr(),
            Buffer::External(span) | Buffer::ExternalConst(span) => span.ptr.as_ptr(),
        }
    }

    pub fn is_external(&self) -> bool {
        !matches!(self, Buffer::Owned(_))
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self, Buffer::ExternalConst(_))
    }

    pub fn is_managed(&self) -> bool {
        match self {
            Buffer::Owned(_) => true,
            Buffer::External(span) | Buffer::ExternalConst(span) => span.owner.is_some(),
        }
    }

    pub fn owner(&self) -> Option<&BufferOwner> {
        match self {
            Buffer::Owned(_) => None,
            Buffer::External(span) | Buffer::ExternalConst(span) => span.owner.as_ref(),
        }
    }

    /// Copy the values in use into a new owned buffer, reserving at least the
    /// capacity of this buffer.
    pub fn to_owned_vec(&self) -> Vec<T> {
        let values = self.as_slice();
        let mut out = Vec::with_capacity(self.capacity().max(values.len()));
        out.extend_from_slice(values);
        out
    }

    /// Change the number of values in use. New values are set to `fill`. For
    /// external buffers the caller must have checked the capacity, and that
    /// the buffer is writable if it grows.
    pub fn resize(&mut self, n: usize, fill: T) {
        match self {
            Buffer::Owned(v) => v.resize(n, fill),
            Buffer::External(span) => {
                debug_assert!(n <= span.capacity);
                let old = span.len;
                span.len = n;
                if n > old {
                    span.as_mut_slice()[old..].fill(fill);
                }
            }
            Buffer::ExternalConst(span) => {
                debug_assert!(n <= span.len, "Cannot grow a read-only buffer");
                span.len = n.min(span.len);
            }
        }
    }

    /// A buffer aliasing the same memory. Owned buffers are deep copied.
    pub fn alias(&self) -> Buffer<T> {
        match self {
            Buffer::Owned(v) => Buffer::Owned(v.clone()),
            Buffer::External(span) => Buffer::External(span.clone()),
            Buffer::ExternalConst(span) => Buffer::ExternalConst(span.clone()),
        }
    }
}

impl<T> Debug for Buffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Buffer::Owned(v) => write!(f, "Owned(len: {})", v.len()),
            Buffer::External(span) => write!(
                f,
                "External(len: {}, capacity: {}, managed: {})",
                span.len,
                span.capacity,
                span.owner.is_some()
            ),
            Buffer::ExternalConst(span) => write!(
                f,
                "ExternalConst(len: {}, capacity: {}, managed: {})",
                span.len,
                span.capacity,
                span.owner.is_some()
            ),
        }
    }
}

/// Data handed back by [`Attribute::export_buffer`](crate::Attribute::export_buffer).
pub enum ExportedBuffer<T> {
    /// The attribute's own storage, or a copy of the external data.
    Owned(Vec<T>),
    /// A managed external buffer, shared with its owner.
    Shared {
        ptr: NonNull<T>,
        len: usize,
        owner: BufferOwner,
    },
    /// The raw external pointer. Valid only as long as the caller of the
    /// original wrap keeps the memory alive.
    Raw { ptr: NonNull<T>, len: usize },
}

// SAFETY: Same reasoning as for `Buffer`.
unsafe impl<T: Send + Sync> Send for ExportedBuffer<T> {}
unsafe impl<T: Send + Sync> Sync for ExportedBuffer<T> {}

impl<T> ExportedBuffer<T> {
    pub fn as_ptr(&self) -> *const T {
        match self {
            ExportedBuffer::Owned(v) => v.as_ptr(),
            ExportedBuffer::Shared { ptr, .. } | ExportedBuffer::Raw { ptr, .. } => {
                ptr.as_ptr() as *const T
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ExportedBuffer::Owned(v) => v.len(),
            ExportedBuffer::Shared { len, .. } | ExportedBuffer::Raw { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, ExportedBuffer::Owned(_))
    }

    /// View the exported values.
    pub fn as_slice(&self) -> &[T] {
        match self {
            ExportedBuffer::Owned(v) => v,
            ExportedBuffer::Shared { ptr, len, .. } | ExportedBuffer::Raw { ptr, len } => {
                // SAFETY: Shared buffers are kept alive by their owner. Raw
                // buffers rely on the contract accepted when the memory was
                // wrapped.
                unsafe { std::slice::from_raw_parts(ptr.as_ptr(), *len) }
            }
        }
    }
}

impl<T> ExportedBuffer<T>
where
    T: Copy,
{
    /// Take the values as an owned vector, copying if they are not owned.
    pub fn into_vec(self) -> Vec<T> {
        match self {
            ExportedBuffer::Owned(v) => v,
            other => other.as_slice().to_vec(),
        }
    }
}
