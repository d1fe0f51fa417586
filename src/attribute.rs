use crate::{
    buffer::{Buffer, BufferOwner, ExportedBuffer, ExternalSpan},
    element::{AttributeElement, AttributeUsage, INVALID_INDEX, Index},
    error::{Error, Result},
    policy::{
        BufferPolicies, CopyPolicy, ExportPolicy, GrowthPolicy, ShrinkPolicy, WritePolicy,
    },
    value::{AttributeValue, ValueKind},
};
use std::{ptr::NonNull, sync::Arc};

/// Check that values of type `T` with the given usage and number of channels
/// make a valid attribute.
pub(crate) fn check_shape<T: AttributeValue>(
    usage: AttributeUsage,
    num_channels: usize,
    dimension: Option<usize>,
) -> Result<()> {
    usage.check_channels(num_channels, dimension)?;
    if usage.is_index() && !T::is_integral() {
        return Err(Error::NonIntegralIndex {
            usage,
            found: T::KIND,
        });
    }
    if usage == AttributeUsage::String && T::KIND != ValueKind::U8 {
        return Err(Error::TypeMismatch {
            expected: ValueKind::U8,
            found: T::KIND,
        });
    }
    Ok(())
}

/**
 * A typed buffer of `num_elements x num_channels` values, stored row by row.
 *
 * The values either live in a buffer owned by the attribute, or in memory
 * owned by the caller that the attribute wraps without copying. External
 * memory may be read-only. Whenever an operation conflicts with external
 * ownership, the policies stored on the attribute decide whether to fail, or
 * to copy the data into an owned buffer and carry on. Once copied, the
 * attribute stays internally owned until it is explicitly wrapped again.
 */
#[derive(Debug)]
pub struct Attribute<T>
where
    T: AttributeValue,
{
    element: AttributeElement,
    usage: AttributeUsage,
    num_channels: usize,
    num_elements: usize,
    default_value: T,
    policies: BufferPolicies,
    buffer: Buffer<T>,
}

impl<T> Attribute<T>
where
    T: AttributeValue,
{
    /// Create an empty, internally owned attribute.
    pub fn new(element: AttributeElement, usage: AttributeUsage, num_channels: usize) -> Result<Self> {
        if element == AttributeElement::Indexed {
            return Err(Error::UnsupportedElement(element));
        }
        check_shape::<T>(usage, num_channels, None)?;
        Ok(Attribute {
            element,
            usage,
            num_channels,
            num_elements: 0,
            default_value: if usage.is_index() {
                T::from_index(INVALID_INDEX)
            } else {
                T::default()
            },
            policies: BufferPolicies::default(),
            buffer: Buffer::Owned(Vec::new()),
        })
    }

    /// Create an internally owned attribute with `num_elements` rows set to
    /// the default value.
    pub fn create(
        element: AttributeElement,
        usage: AttributeUsage,
        num_channels: usize,
        num_elements: usize,
    ) -> Result<Self> {
        let mut attr = Self::new(element, usage, num_channels)?;
        attr.resize_elements(num_elements)?;
        Ok(attr)
    }

    /// Set the value used to fill new rows. Existing rows are not touched.
    pub fn with_default_value(mut self, value: T) -> Self {
        self.default_value = value;
        self
    }

    pub fn with_policies(mut self, policies: BufferPolicies) -> Self {
        self.policies = policies;
        self
    }

    pub fn element_type(&self) -> AttributeElement {
        self.element
    }

    pub fn usage(&self) -> AttributeUsage {
        self.usage
    }

    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    pub fn num_elements(&self) -> usize {
        self.num_elements
    }

    pub fn is_empty(&self) -> bool {
        self.num_elements == 0
    }

    pub fn default_value(&self) -> T {
        self.default_value
    }

    pub fn set_default_value(&mut self, value: T) {
        self.default_value = value;
    }

    pub(crate) fn set_element_type(&mut self, element: AttributeElement) {
        self.element = element;
    }

    pub(crate) fn set_usage(&mut self, usage: AttributeUsage) {
        self.usage = usage;
    }

    pub fn policies(&self) -> BufferPolicies {
        self.policies
    }

    pub fn set_growth_policy(&mut self, policy: GrowthPolicy) {
        self.policies.growth = policy;
    }

    pub fn set_shrink_policy(&mut self, policy: ShrinkPolicy) {
        self.policies.shrink = policy;
    }

    pub fn set_write_policy(&mut self, policy: WritePolicy) {
        self.policies.write = policy;
    }

    pub fn set_copy_policy(&mut self, policy: CopyPolicy) {
        self.policies.copy = policy;
    }

    /// Whether the values live in memory not owned by this attribute.
    pub fn is_external(&self) -> bool {
        self.buffer.is_external()
    }

    pub fn is_read_only(&self) -> bool {
        self.buffer.is_read_only()
    }

    /// Whether the lifetime of the memory is managed, either by this
    /// attribute or by an owner handed over when wrapping.
    pub fn is_managed(&self) -> bool {
        self.buffer.is_managed()
    }

    /// Number of values the current buffer can hold without reallocating.
    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Pointer to the first value. Useful to check whether two attributes
    /// share memory.
    pub fn data_ptr(&self) -> *const T {
        self.buffer.as_ptr()
    }

    /// Wrap caller owned mutable memory holding `capacity` values, of which
    /// the first `num_elements` rows are in use. No copy is made.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `capacity` values for as
    /// long as this attribute, or any copy of it made with
    /// [`CopyPolicy::KeepExternalPtr`], is alive. The memory must not be
    /// accessed through other means while the attribute is being accessed.
    pub unsafe fn wrap(&mut self, ptr: *mut T, capacity: usize, num_elements: usize) -> Result<()> {
        let span = unsafe { self.external_span(ptr, capacity, num_elements, None)? };
        self.buffer = Buffer::External(span);
        self.num_elements = num_elements;
        Ok(())
    }

    /// Same as [`Attribute::wrap`], except the lifetime of the memory is
    /// tied to `owner`.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `capacity` values as long
    /// as `owner` is alive. The memory must not be accessed through other
    /// means while the attribute is being accessed.
    pub unsafe fn wrap_managed(
        &mut self,
        ptr: *mut T,
        capacity: usize,
        num_elements: usize,
        owner: BufferOwner,
    ) -> Result<()> {
        let span = unsafe { self.external_span(ptr, capacity, num_elements, Some(owner))? };
        self.buffer = Buffer::External(span);
        self.num_elements = num_elements;
        Ok(())
    }

    /// Wrap a mutable slice that lives for the rest of the program.
    pub fn wrap_slice(&mut self, data: &'static mut [T], num_elements: usize) -> Result<()> {
        let capacity = data.len();
        // SAFETY: The slice is valid forever and exclusively borrowed by us.
        unsafe { self.wrap(data.as_mut_ptr(), capacity, num_elements) }
    }

    /// Wrap shared read-only memory. The attribute keeps the memory alive.
    pub fn wrap_const(&mut self, data: Arc<[T]>, num_elements: usize) -> Result<()> {
        let capacity = data.len();
        let ptr = data.as_ptr() as *mut T;
        let owner: BufferOwner = Arc::new(data);
        // SAFETY: The owner keeps the memory alive, and read-only buffers are
        // never written to.
        let span = unsafe { self.external_span(ptr, capacity, num_elements, Some(owner))? };
        self.buffer = Buffer::ExternalConst(span);
        self.num_elements = num_elements;
        Ok(())
    }

    /// Wrap caller owned read-only memory.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads of `capacity` values for as long as
    /// this attribute, or any copy of it made with
    /// [`CopyPolicy::KeepExternalPtr`], is alive.
    pub unsafe fn wrap_const_ptr(
        &mut self,
        ptr: *const T,
        capacity: usize,
        num_elements: usize,
    ) -> Result<()> {
        let span = unsafe { self.external_span(ptr as *mut T, capacity, num_elements, None)? };
        self.buffer = Buffer::ExternalConst(span);
        self.num_elements = num_elements;
        Ok(())
    }

    unsafe fn external_span(
        &self,
        ptr: *mut T,
        capacity: usize,
        num_elements: usize,
        owner: Option<BufferOwner>,
    ) -> Result<ExternalSpan<T>> {
        let len = num_elements * self.num_channels;
        if len > capacity {
            return Err(Error::CapacityExceeded {
                requested: len,
                capacity,
            });
        }
        let ptr = match NonNull::new(ptr) {
            Some(ptr) => ptr,
            None if capacity == 0 => NonNull::dangling(),
            None => {
                return Err(Error::ExternalBufferPolicyViolation(
                    "cannot wrap a null pointer",
                ));
            }
        };
        Ok(unsafe { ExternalSpan::new(ptr, capacity, len, owner) })
    }

    /// Get the value at `row` and `channel`, or `None` if either is out of
    /// range.
    pub fn get(&self, row: usize, channel: usize) -> Option<T> {
        if channel >= self.num_channels {
            return None;
        }
        self.get_row(row).map(|r| r[channel])
    }

    pub fn get_row(&self, row: usize) -> Option<&[T]> {
        let start = row * self.num_channels;
        self.buffer
            .as_slice()
            .get(start..(start + self.num_channels))
    }

    /// All values, row after row.
    pub fn get_all(&self) -> &[T] {
        self.buffer.as_slice()
    }

    /// Iterate over the rows.
    pub fn rows(&self) -> impl Iterator<Item = &[T]> + use<'_, T> {
        self.buffer.as_slice().chunks_exact(self.num_channels)
    }

    /// Get a mutable reference to the value at `row` and `channel`. Fails
    /// if the buffer is read-only and the write policy says so.
    pub fn ref_value(&mut self, row: usize, channel: usize) -> Result<&mut T> {
        debug_assert!(channel < self.num_channels);
        let i = row * self.num_channels + channel;
        let len = self.num_elements;
        self.ref_all()?
            .get_mut(i)
            .ok_or(Error::IndexOutOfRange { index: row, len })
    }

    pub fn ref_row(&mut self, row: usize) -> Result<&mut [T]> {
        let nc = self.num_channels;
        let len = self.num_elements;
        self.ref_all()?
            .get_mut((row * nc)..((row + 1) * nc))
            .ok_or(Error::IndexOutOfRange { index: row, len })
    }

    pub fn ref_all(&mut self) -> Result<&mut [T]> {
        self.write_check()?;
        self.buffer.as_mut_slice().ok_or(Error::ReadOnlyViolation)
    }

    pub fn set(&mut self, row: usize, channel: usize, value: T) -> Result<()> {
        *self.ref_value(row, channel)? = value;
        Ok(())
    }

    /// Append rows. The number of values must be a multiple of the number of
    /// channels.
    pub fn insert_rows(&mut self, values: &[T]) -> Result<()> {
        if values.len() % self.num_channels != 0 {
            return Err(Error::MismatchedArrayLengths(
                values.len(),
                self.num_channels,
            ));
        }
        let old = self.num_elements * self.num_channels;
        self.resize_elements(self.num_elements + values.len() / self.num_channels)?;
        self.ref_all()?[old..].copy_from_slice(values);
        Ok(())
    }

    /// Append `count` rows set to the default value.
    pub fn insert_elements(&mut self, count: usize) -> Result<()> {
        self.resize_elements(self.num_elements + count)
    }

    /// Change the number of rows. New rows are set to the default value.
    ///
    /// Shrinking never copies. Growing an external buffer is subject to the
    /// growth policy, and the copying policies only copy when the new size
    /// exceeds the capacity of the buffer or the buffer is read-only. Growth
    /// within the capacity of a mutable external buffer writes in place.
    pub fn resize_elements(&mut self, num_elements: usize) -> Result<()> {
        let len = num_elements * self.num_channels;
        if len > self.buffer.len() {
            self.growth_check(len)?;
        }
        self.buffer.resize(len, self.default_value);
        self.num_elements = num_elements;
        Ok(())
    }

    /// Fails if resizing to `num_elements` rows would fail. Nothing is
    /// modified.
    pub(crate) fn check_resize(&self, num_elements: usize) -> Result<()> {
        let len = num_elements * self.num_channels;
        if len > self.buffer.len() {
            self.check_growth(len)?;
        }
        Ok(())
    }

    /// Make sure the buffer can be written and resized to `num_elements`
    /// rows, copying external data where the policies allow it.
    pub(crate) fn prepare_write(&mut self, num_elements: usize) -> Result<()> {
        let len = num_elements * self.num_channels;
        if len > self.buffer.len() {
            self.growth_check(len)?;
        }
        self.write_check()
    }

    pub fn clear(&mut self) -> Result<()> {
        self.resize_elements(0)
    }

    /// Reserve room for `num_elements` rows.
    pub fn reserve_elements(&mut self, num_elements: usize) -> Result<()> {
        let len = num_elements * self.num_channels;
        if self.buffer.is_external() && len > self.buffer.capacity() {
            self.growth_check(len)?;
        }
        if let Buffer::Owned(v) = &mut self.buffer {
            v.reserve(len.saturating_sub(v.len()));
        }
        Ok(())
    }

    /// Release unused capacity. External buffers follow the shrink policy.
    pub fn shrink_to_fit(&mut self) -> Result<()> {
        match &mut self.buffer {
            Buffer::Owned(v) => {
                v.shrink_to_fit();
                Ok(())
            }
            _ => match self.policies.shrink {
                ShrinkPolicy::ErrorIfExternal => Err(Error::ExternalBufferPolicyViolation(
                    "cannot shrink an external buffer",
                )),
                ShrinkPolicy::IgnoreIfExternal => Ok(()),
                ShrinkPolicy::WarnAndCopy => {
                    log::warn!("Shrinking an external attribute buffer, copying the data");
                    self.buffer = Buffer::Owned(self.buffer.as_slice().to_vec());
                    Ok(())
                }
                ShrinkPolicy::SilentCopy => {
                    self.buffer = Buffer::Owned(self.buffer.as_slice().to_vec());
                    Ok(())
                }
            },
        }
    }

    /// Copy external data into an internally owned buffer. Does nothing if
    /// the buffer is already owned.
    pub fn create_internal_copy(&mut self) {
        if self.buffer.is_external() {
            self.buffer = Buffer::Owned(self.buffer.to_owned_vec());
        }
    }

    /// Copy this attribute. External buffers follow the copy policy.
    pub fn try_clone(&self) -> Result<Self> {
        let buffer = match &self.buffer {
            Buffer::Owned(v) => Buffer::Owned(v.clone()),
            external => match self.policies.copy {
                CopyPolicy::CopyIfExternal => Buffer::Owned(external.to_owned_vec()),
                CopyPolicy::KeepExternalPtr => external.alias(),
                CopyPolicy::ErrorIfExternal => {
                    return Err(Error::ExternalBufferPolicyViolation(
                        "cannot copy an attribute wrapping an external buffer",
                    ));
                }
            },
        };
        Ok(Attribute {
            element: self.element,
            usage: self.usage,
            num_channels: self.num_channels,
            num_elements: self.num_elements,
            default_value: self.default_value,
            policies: self.policies,
            buffer,
        })
    }

    /// Hand the values over to the caller. On success the attribute is left
    /// empty and internally owned.
    pub fn export_buffer(&mut self, policy: ExportPolicy) -> Result<ExportedBuffer<T>> {
        let exported = match &mut self.buffer {
            Buffer::Owned(v) => ExportedBuffer::Owned(std::mem::take(v)),
            external => match policy {
                ExportPolicy::CopyIfExternal => ExportedBuffer::Owned(external.as_slice().to_vec()),
                ExportPolicy::CopyIfUnmanaged => match external.owner() {
                    Some(owner) => ExportedBuffer::Shared {
                        ptr: non_null(external.as_ptr()),
                        len: external.len(),
                        owner: owner.clone(),
                    },
                    None => ExportedBuffer::Owned(external.as_slice().to_vec()),
                },
                ExportPolicy::KeepExternalPtr => {
                    log::warn!(
                        "Exporting the raw pointer of an external buffer. Its validity is the caller's responsibility"
                    );
                    match external.owner() {
                        Some(owner) => ExportedBuffer::Shared {
                            ptr: non_null(external.as_ptr()),
                            len: external.len(),
                            owner: owner.clone(),
                        },
                        None => ExportedBuffer::Raw {
                            ptr: non_null(external.as_ptr()),
                            len: external.len(),
                        },
                    }
                }
                ExportPolicy::ErrorIfExternal => {
                    return Err(Error::ExternalBufferPolicyViolation(
                        "cannot export an external buffer",
                    ));
                }
            },
        };
        self.buffer = Buffer::Owned(Vec::new());
        self.num_elements = 0;
        Ok(exported)
    }

    /// Rebuild the rows so that new row `i` is old row `new_to_old[i]`.
    /// Invalid indices produce default rows.
    pub fn gather_rows(&mut self, new_to_old: &[Index]) -> Result<()> {
        let nc = self.num_channels;
        let mut values = Vec::with_capacity(new_to_old.len() * nc);
        {
            let old = self.get_all();
            for &i in new_to_old {
                if i == INVALID_INDEX {
                    values.extend(std::iter::repeat_n(self.default_value, nc));
                    continue;
                }
                let i = i as usize;
                if i >= self.num_elements {
                    return Err(Error::IndexOutOfRange {
                        index: i,
                        len: self.num_elements,
                    });
                }
                values.extend_from_slice(&old[(i * nc)..((i + 1) * nc)]);
            }
        }
        self.replace_values(values)
    }

    /// Replace all values, keeping the current ownership if possible.
    pub(crate) fn replace_values(&mut self, values: Vec<T>) -> Result<()> {
        debug_assert_eq!(values.len() % self.num_channels, 0);
        if let Buffer::Owned(_) = self.buffer {
            self.num_elements = values.len() / self.num_channels;
            self.buffer = Buffer::Owned(values);
            return Ok(());
        }
        self.resize_elements(values.len() / self.num_channels)?;
        self.ref_all()?.copy_from_slice(&values);
        Ok(())
    }

    /// Treat the values as element indices, and replace each of them with
    /// `old_to_new[value]`. Values that are invalid or out of range become
    /// invalid.
    pub fn remap_index_values(&mut self, old_to_new: &[Index]) -> Result<()> {
        for v in self.ref_all()?.iter_mut() {
            let i = v.to_index();
            let mapped = old_to_new
                .get(i as usize)
                .copied()
                .unwrap_or(INVALID_INDEX);
            *v = T::from_index(mapped);
        }
        Ok(())
    }

    /// Set every value back to the default.
    pub fn reset_to_default(&mut self) -> Result<()> {
        let default = self.default_value;
        self.ref_all()?.fill(default);
        Ok(())
    }

    fn check_write(&self) -> Result<()> {
        match self.policies.write {
            WritePolicy::ErrorIfReadOnly if self.buffer.is_read_only() => {
                Err(Error::ReadOnlyViolation)
            }
            _ => Ok(()),
        }
    }

    fn write_check(&mut self) -> Result<()> {
        self.check_write()?;
        if !self.buffer.is_read_only() {
            return Ok(());
        }
        if self.policies.write == WritePolicy::WarnAndCopy {
            log::warn!("Writing to a read-only attribute buffer, copying the data");
        }
        self.create_internal_copy();
        Ok(())
    }

    /// Fails if the growth policy forbids growing the buffer to `len` values.
    fn check_growth(&self, len: usize) -> Result<()> {
        if !self.buffer.is_external() {
            return Ok(());
        }
        let capacity = self.buffer.capacity();
        match self.policies.growth {
            GrowthPolicy::ErrorIfExternal if len > capacity => Err(Error::CapacityExceeded {
                requested: len,
                capacity,
            }),
            GrowthPolicy::ErrorIfExternal => Err(Error::ExternalBufferPolicyViolation(
                "cannot grow an external buffer",
            )),
            GrowthPolicy::AllowWithinCapacity if len > capacity => {
                Err(Error::CapacityExceeded {
                    requested: len,
                    capacity,
                })
            }
            GrowthPolicy::AllowWithinCapacity => self.check_write(),
            GrowthPolicy::WarnAndCopy | GrowthPolicy::SilentCopy => Ok(()),
        }
    }

    /// Called before the buffer grows to `len` values.
    fn growth_check(&mut self, len: usize) -> Result<()> {
        self.check_growth(len)?;
        if !self.buffer.is_external() {
            return Ok(());
        }
        let copy = len > self.buffer.capacity() || self.buffer.is_read_only();
        match self.policies.growth {
            GrowthPolicy::AllowWithinCapacity => self.write_check(),
            GrowthPolicy::WarnAndCopy if copy => {
                log::warn!("Growing an external attribute buffer to {len} values, copying the data");
                self.create_internal_copy();
                Ok(())
            }
            GrowthPolicy::SilentCopy if copy => {
                self.create_internal_copy();
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

fn non_null<T>(ptr: *const T) -> NonNull<T> {
    NonNull::new(ptr as *mut T).unwrap_or(NonNull::dangling())
}
