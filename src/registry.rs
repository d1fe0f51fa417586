use crate::{
    attribute::{Attribute, check_shape},
    element::{
        AttributeElement, AttributeId, AttributeUsage, ElementCounts, ElementMask, Index,
    },
    error::{Error, Result},
    indexed::IndexedAttribute,
    policy::{CreatePolicy, DeletePolicy, ExportPolicy, ResetToDefault},
    buffer::ExportedBuffer,
    value::{AttributeValue, ValueKind},
};
use std::{any::Any, collections::BTreeMap, fmt::Debug, sync::Arc};

/// Attribute names starting with this prefix are reserved for the mesh.
pub const RESERVED_PREFIX: &str = "$";

pub fn is_reserved_name(name: &str) -> bool {
    name.starts_with(RESERVED_PREFIX)
}

/**
 * Non generic interface shared by all attributes, regardless of their value
 * type. This is what the registry stores, and what algorithms that do not
 * care about the value type work with.
 */
pub trait AttributeBase: Any + Send + Sync + Debug {
    fn element_type(&self) -> AttributeElement;

    fn usage(&self) -> AttributeUsage;

    fn num_channels(&self) -> usize;

    fn value_kind(&self) -> ValueKind;

    fn is_indexed(&self) -> bool;

    /// Number of rows. For indexed attributes this is the number of corners.
    fn num_elements(&self) -> usize;

    fn is_external(&self) -> bool;

    /// Address of the values, to tell whether two attributes share memory.
    fn data_ptr(&self) -> *const ();

    /// Deep copy, following the copy policy of external buffers.
    fn clone_boxed(&self) -> Result<Box<dyn AttributeBase>>;

    fn resize_elements(&mut self, num_elements: usize) -> Result<()>;

    /// Fails if [`AttributeBase::resize_elements`] would fail. Nothing is
    /// modified.
    fn check_resize(&self, num_elements: usize) -> Result<()>;

    /// Make the buffers writable and able to hold `num_elements` rows,
    /// copying external data where the policies allow it. The values do not
    /// change.
    fn prepare_write(&mut self, num_elements: usize) -> Result<()>;

    /// New row `i` becomes old row `new_to_old[i]`.
    fn gather_rows(&mut self, new_to_old: &[Index]) -> Result<()>;

    /// Rewrite the values of an index attribute through `old_to_new`.
    fn remap_index_values(&mut self, old_to_new: &[Index]) -> Result<()>;

    fn reset_to_default(&mut self) -> Result<()>;

    fn shrink_to_fit(&mut self) -> Result<()>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T> AttributeBase for Attribute<T>
where
    T: AttributeValue,
{
    fn element_type(&self) -> AttributeElement {
        Attribute::element_type(self)
    }

    fn usage(&self) -> AttributeUsage {
        Attribute::usage(self)
    }

    fn num_channels(&self) -> usize {
        Attribute::num_channels(self)
    }

    fn value_kind(&self) -> ValueKind {
        T::KIND
    }

    fn is_indexed(&self) -> bool {
        false
    }

    fn num_elements(&self) -> usize {
        Attribute::num_elements(self)
    }

    fn is_external(&self) -> bool {
        Attribute::is_external(self)
    }

    fn data_ptr(&self) -> *const () {
        Attribute::data_ptr(self) as *const ()
    }

    fn clone_boxed(&self) -> Result<Box<dyn AttributeBase>> {
        Ok(Box::new(self.try_clone()?))
    }

    fn resize_elements(&mut self, num_elements: usize) -> Result<()> {
        Attribute::resize_elements(self, num_elements)
    }

    fn check_resize(&self, num_elements: usize) -> Result<()> {
        Attribute::check_resize(self, num_elements)
    }

    fn prepare_write(&mut self, num_elements: usize) -> Result<()> {
        Attribute::prepare_write(self, num_elements)
    }

    fn gather_rows(&mut self, new_to_old: &[Index]) -> Result<()> {
        Attribute::gather_rows(self, new_to_old)
    }

    fn remap_index_values(&mut self, old_to_new: &[Index]) -> Result<()> {
        Attribute::remap_index_values(self, old_to_new)
    }

    fn reset_to_default(&mut self) -> Result<()> {
        Attribute::reset_to_default(self)
    }

    fn shrink_to_fit(&mut self) -> Result<()> {
        Attribute::shrink_to_fit(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl<T> AttributeBase for IndexedAttribute<T>
where
    T: AttributeValue,
{
    fn element_type(&self) -> AttributeElement {
        AttributeElement::Indexed
    }

    fn usage(&self) -> AttributeUsage {
        IndexedAttribute::usage(self)
    }

    fn num_channels(&self) -> usize {
        IndexedAttribute::num_channels(self)
    }

    fn value_kind(&self) -> ValueKind {
        T::KIND
    }

    fn is_indexed(&self) -> bool {
        true
    }

    fn num_elements(&self) -> usize {
        self.num_corners()
    }

    fn is_external(&self) -> bool {
        self.values().is_external() || self.indices().is_external()
    }

    fn data_ptr(&self) -> *const () {
        self.values().data_ptr() as *const ()
    }

    fn clone_boxed(&self) -> Result<Box<dyn AttributeBase>> {
        Ok(Box::new(self.try_clone()?))
    }

    fn resize_elements(&mut self, num_elements: usize) -> Result<()> {
        self.indices_mut().resize_elements(num_elements)
    }

    fn check_resize(&self, num_elements: usize) -> Result<()> {
        self.indices().check_resize(num_elements)
    }

    fn prepare_write(&mut self, num_elements: usize) -> Result<()> {
        let num_values = self.values().num_elements();
        self.values_mut().prepare_write(num_values)?;
        self.indices_mut().prepare_write(num_elements)
    }

    fn gather_rows(&mut self, new_to_old: &[Index]) -> Result<()> {
        self.indices_mut().gather_rows(new_to_old)
    }

    fn remap_index_values(&mut self, old_to_new: &[Index]) -> Result<()> {
        self.values_mut().remap_index_values(old_to_new)
    }

    fn reset_to_default(&mut self) -> Result<()> {
        self.values_mut().clear()?;
        self.indices_mut().reset_to_default()
    }

    fn shrink_to_fit(&mut self) -> Result<()> {
        self.values_mut().shrink_to_fit()?;
        self.indices_mut().shrink_to_fit()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn unknown_id(id: AttributeId) -> Error {
    Error::UnknownAttribute(format!("#{id}"))
}

/// Make sure the attribute is not shared with anyone else, copying it if
/// needed, and return mutable access to it.
pub(crate) fn materialize_if_shared(
    attr: &mut Arc<dyn AttributeBase>,
) -> Result<&mut (dyn AttributeBase + 'static)> {
    if Arc::get_mut(attr).is_none() {
        log::debug!(
            "Copying shared {:?} attribute with {} rows before writing",
            attr.element_type(),
            attr.num_elements()
        );
        *attr = Arc::from(attr.clone_boxed()?);
    }
    Arc::get_mut(attr).ok_or(Error::ReadOnlyViolation)
}

#[derive(Clone)]
struct Slot {
    name: String,
    attr: Arc<dyn AttributeBase>,
}

/**
 * Owns all the attributes of a mesh, addressed by name or by id.
 *
 * Attributes of different value types are stored behind the common
 * [`AttributeBase`] interface, and typed access checks the value type at
 * runtime. Cloning a registry shares every attribute. The first mutable
 * access to a shared attribute makes a private copy of it, so clones never
 * observe each other's writes.
 */
#[derive(Clone, Default)]
pub struct AttributeRegistry {
    name_to_id: BTreeMap<String, AttributeId>,
    slots: Vec<Option<Slot>>,
    counts: ElementCounts,
    dimension: Option<usize>,
}

impl Debug for AttributeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.name_to_id.iter().filter_map(|(name, id)| {
                self.slots[*id as usize]
                    .as_ref()
                    .map(|slot| (name, &slot.attr))
            }))
            .finish()
    }
}

impl AttributeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose position-like attributes are checked against
    /// `dimension`.
    pub fn with_dimension(dimension: usize) -> Self {
        AttributeRegistry {
            dimension: Some(dimension),
            ..Default::default()
        }
    }

    pub fn counts(&self) -> ElementCounts {
        self.counts
    }

    /// Number of live attributes.
    pub fn len(&self) -> usize {
        self.name_to_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.name_to_id.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.name_to_id.contains_key(name)
    }

    pub fn id(&self, name: &str) -> Result<AttributeId> {
        self.name_to_id
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownAttribute(name.to_string()))
    }

    pub fn name(&self, id: AttributeId) -> Result<&str> {
        Ok(&self.slot(id)?.name)
    }

    fn slot(&self, id: AttributeId) -> Result<&Slot> {
        self.slots
            .get(id as usize)
            .and_then(|s| s.as_ref())
            .ok_or_else(|| unknown_id(id))
    }

    fn slot_mut(&mut self, id: AttributeId) -> Result<&mut Slot> {
        self.slots
            .get_mut(id as usize)
            .and_then(|s| s.as_mut())
            .ok_or_else(|| unknown_id(id))
    }

    /// Type erased read access.
    pub fn base(&self, id: AttributeId) -> Result<&dyn AttributeBase> {
        Ok(self.slot(id)?.attr.as_ref())
    }

    /// Type erased write access. Shared attributes are copied first.
    pub fn base_mut(&mut self, id: AttributeId) -> Result<&mut (dyn AttributeBase + 'static)> {
        materialize_if_shared(&mut self.slot_mut(id)?.attr)
    }

    /// Whether the attribute's storage is shared with another registry.
    pub fn is_shared(&self, id: AttributeId) -> Result<bool> {
        Ok(Arc::strong_count(&self.slot(id)?.attr) > 1)
    }

    fn insert(&mut self, name: &str, attr: Arc<dyn AttributeBase>) -> AttributeId {
        let id = self.slots.len() as AttributeId;
        self.slots.push(Some(Slot {
            name: name.to_string(),
            attr,
        }));
        self.name_to_id.insert(name.to_string(), id);
        id
    }

    pub(crate) fn check_new_name(&self, name: &str, policy: CreatePolicy) -> Result<()> {
        if is_reserved_name(name) && policy != CreatePolicy::Force {
            return Err(Error::ReservedName(name.to_string()));
        }
        if self.contains(name) {
            return Err(Error::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    /// Create a new attribute, sized according to the current element
    /// counts. Creating an attribute with a reserved name requires
    /// [`CreatePolicy::Force`].
    pub fn create<T>(
        &mut self,
        name: &str,
        element: AttributeElement,
        usage: AttributeUsage,
        num_channels: usize,
        policy: CreatePolicy,
    ) -> Result<AttributeId>
    where
        T: AttributeValue,
    {
        self.check_new_name(name, policy)?;
        check_shape::<T>(usage, num_channels, self.dimension)?;
        let attr: Arc<dyn AttributeBase> = match element {
            AttributeElement::Indexed => Arc::new(IndexedAttribute::<T>::new(
                usage,
                num_channels,
                self.counts.corners,
            )?),
            _ => Arc::new(Attribute::<T>::create(
                element,
                usage,
                num_channels,
                self.counts.rows(element),
            )?),
        };
        Ok(self.insert(name, attr))
    }

    /// Add an already built attribute. Its number of rows must match the
    /// element counts of this registry.
    pub fn insert_attribute(
        &mut self,
        name: &str,
        attr: Box<dyn AttributeBase>,
        policy: CreatePolicy,
    ) -> Result<AttributeId> {
        self.check_new_name(name, policy)?;
        self.check_rows(attr.as_ref())?;
        Ok(self.insert(name, Arc::from(attr)))
    }

    fn check_rows(&self, attr: &dyn AttributeBase) -> Result<()> {
        let element = attr.element_type();
        if element != AttributeElement::Value && attr.num_elements() != self.counts.rows(element) {
            return Err(Error::MismatchedArrayLengths(
                attr.num_elements(),
                self.counts.rows(element),
            ));
        }
        Ok(())
    }

    /// Replace the attribute stored under `id`, keeping its name and id.
    pub(crate) fn replace(&mut self, id: AttributeId, attr: Box<dyn AttributeBase>) -> Result<()> {
        self.check_rows(attr.as_ref())?;
        self.slot_mut(id)?.attr = Arc::from(attr);
        Ok(())
    }

    /// Get the id of an attribute with the given shape, creating it if it
    /// does not exist. An existing attribute with a different shape is an
    /// error.
    pub fn find_or_create<T>(
        &mut self,
        name: &str,
        element: AttributeElement,
        usage: AttributeUsage,
        num_channels: usize,
        reset: ResetToDefault,
    ) -> Result<AttributeId>
    where
        T: AttributeValue,
    {
        if is_reserved_name(name) {
            return Err(Error::ReservedName(name.to_string()));
        }
        let Ok(id) = self.id(name) else {
            return self.create::<T>(name, element, usage, num_channels, CreatePolicy::ErrorIfReserved);
        };
        let base = self.base(id)?;
        if base.value_kind() != T::KIND {
            return Err(Error::TypeMismatch {
                expected: T::KIND,
                found: base.value_kind(),
            });
        }
        if base.element_type() != element
            || base.usage() != usage
            || base.num_channels() != num_channels
        {
            return Err(Error::AttributeShapeMismatch(name.to_string()));
        }
        if reset == ResetToDefault::Yes {
            self.base_mut(id)?.reset_to_default()?;
        }
        Ok(id)
    }

    /// Share the attribute `other_name` of another registry under `name`.
    /// No data is copied until one of the two is written to.
    pub fn create_from(
        &mut self,
        name: &str,
        other: &AttributeRegistry,
        other_name: &str,
        policy: CreatePolicy,
    ) -> Result<AttributeId> {
        self.check_new_name(name, policy)?;
        let attr = other.slot(other.id(other_name)?)?.attr.clone();
        self.check_rows(attr.as_ref())?;
        Ok(self.insert(name, attr))
    }

    /// Copy an attribute under a new name. The copy shares storage with the
    /// original until either is written to.
    pub fn duplicate(&mut self, old_name: &str, new_name: &str) -> Result<AttributeId> {
        self.check_new_name(new_name, CreatePolicy::ErrorIfReserved)?;
        let attr = self.slot(self.id(old_name)?)?.attr.clone();
        Ok(self.insert(new_name, attr))
    }

    fn check_type<T: AttributeValue>(&self, id: AttributeId, indexed: bool) -> Result<()> {
        let base = self.base(id)?;
        if base.value_kind() != T::KIND {
            return Err(Error::TypeMismatch {
                expected: T::KIND,
                found: base.value_kind(),
            });
        }
        if base.is_indexed() != indexed {
            return Err(Error::AttributeShapeMismatch(self.name(id)?.to_string()));
        }
        Ok(())
    }

    pub fn get<T>(&self, id: AttributeId) -> Result<&Attribute<T>>
    where
        T: AttributeValue,
    {
        self.check_type::<T>(id, false)?;
        self.base(id)?
            .as_any()
            .downcast_ref::<Attribute<T>>()
            .ok_or_else(|| unknown_id(id))
    }

    pub fn get_by_name<T>(&self, name: &str) -> Result<&Attribute<T>>
    where
        T: AttributeValue,
    {
        self.get(self.id(name)?)
    }

    /// Mutable access to an attribute. If its storage is shared, it is copied
    /// first.
    pub fn get_mut<T>(&mut self, id: AttributeId) -> Result<&mut Attribute<T>>
    where
        T: AttributeValue,
    {
        self.check_type::<T>(id, false)?;
        self.base_mut(id)?
            .as_any_mut()
            .downcast_mut::<Attribute<T>>()
            .ok_or_else(|| unknown_id(id))
    }

    pub fn get_mut_by_name<T>(&mut self, name: &str) -> Result<&mut Attribute<T>>
    where
        T: AttributeValue,
    {
        let id = self.id(name)?;
        self.get_mut(id)
    }

    pub fn get_indexed<T>(&self, id: AttributeId) -> Result<&IndexedAttribute<T>>
    where
        T: AttributeValue,
    {
        self.check_type::<T>(id, true)?;
        self.base(id)?
            .as_any()
            .downcast_ref::<IndexedAttribute<T>>()
            .ok_or_else(|| unknown_id(id))
    }

    pub fn get_indexed_mut<T>(&mut self, id: AttributeId) -> Result<&mut IndexedAttribute<T>>
    where
        T: AttributeValue,
    {
        self.check_type::<T>(id, true)?;
        self.base_mut(id)?
            .as_any_mut()
            .downcast_mut::<IndexedAttribute<T>>()
            .ok_or_else(|| unknown_id(id))
    }

    /// Delete an attribute. Its id is never handed out again. Reserved
    /// attributes require [`DeletePolicy::Force`].
    pub fn delete(&mut self, id: AttributeId, policy: DeletePolicy) -> Result<()> {
        let name = self.name(id)?;
        if is_reserved_name(name) && policy != DeletePolicy::Force {
            return Err(Error::ReservedName(name.to_string()));
        }
        if let Some(slot) = self.slots[id as usize].take() {
            self.name_to_id.remove(&slot.name);
        }
        Ok(())
    }

    pub fn delete_by_name(&mut self, name: &str, policy: DeletePolicy) -> Result<()> {
        self.delete(self.id(name)?, policy)
    }

    /// Delete an attribute and hand its values over to the caller.
    pub fn delete_and_export<T>(
        &mut self,
        name: &str,
        delete_policy: DeletePolicy,
        export_policy: ExportPolicy,
    ) -> Result<ExportedBuffer<T>>
    where
        T: AttributeValue,
    {
        let id = self.id(name)?;
        if is_reserved_name(name) && delete_policy != DeletePolicy::Force {
            return Err(Error::ReservedName(name.to_string()));
        }
        let exported = self.get_mut::<T>(id)?.export_buffer(export_policy)?;
        self.delete(id, DeletePolicy::Force)?;
        Ok(exported)
    }

    /// Rename an attribute, keeping its id.
    pub fn rename(&mut self, old_name: &str, new_name: &str, policy: CreatePolicy) -> Result<()> {
        if is_reserved_name(old_name) && policy != CreatePolicy::Force {
            return Err(Error::ReservedName(old_name.to_string()));
        }
        self.check_new_name(new_name, policy)?;
        let id = self.id(old_name)?;
        self.name_to_id.remove(old_name);
        self.name_to_id.insert(new_name.to_string(), id);
        self.slot_mut(id)?.name = new_name.to_string();
        Ok(())
    }

    /// Ids of the attributes whose element type is in `mask`, in name order.
    pub fn ids(&self, mask: impl Into<ElementMask>) -> Vec<AttributeId> {
        let mask = mask.into();
        self.name_to_id
            .values()
            .copied()
            .filter(|id| {
                self.base(*id)
                    .is_ok_and(|attr| mask.contains(attr.element_type()))
            })
            .collect()
    }

    /// Visit the attributes whose element type is in `mask`, in name order.
    pub fn for_each<F>(&self, mask: impl Into<ElementMask>, mut f: F)
    where
        F: FnMut(AttributeId, &str, &dyn AttributeBase),
    {
        let mask = mask.into();
        for id in self.name_to_id.values() {
            if let Some(slot) = &self.slots[*id as usize] {
                if mask.contains(slot.attr.element_type()) {
                    f(*id, &slot.name, slot.attr.as_ref());
                }
            }
        }
    }

    /// Same as [`AttributeRegistry::for_each`] with write access. Every
    /// visited attribute is made unique first. Stops at the first error.
    pub fn for_each_mut<F>(&mut self, mask: impl Into<ElementMask>, mut f: F) -> Result<()>
    where
        F: FnMut(AttributeId, &str, &mut dyn AttributeBase) -> Result<()>,
    {
        let mask = mask.into();
        for id in self.name_to_id.values() {
            if let Some(slot) = &mut self.slots[*id as usize] {
                if mask.contains(slot.attr.element_type()) {
                    let attr = materialize_if_shared(&mut slot.attr)?;
                    f(*id, &slot.name, attr)?;
                }
            }
        }
        Ok(())
    }

    /// Resize every attribute of the given element type, and record the new
    /// count. Corner counts also apply to indexed attributes. Every attribute
    /// is checked before any of them is resized, so a failure leaves the
    /// registry as it was.
    pub fn resize_elements(&mut self, element: AttributeElement, num_elements: usize) -> Result<()> {
        self.resize_all_but(element, num_elements, None)
    }

    /// Same as [`AttributeRegistry::resize_elements`], except that the
    /// attribute under `id` is replaced by `attr`, which already has the new
    /// number of rows.
    pub(crate) fn resize_and_replace(
        &mut self,
        element: AttributeElement,
        num_elements: usize,
        id: AttributeId,
        attr: Box<dyn AttributeBase>,
    ) -> Result<()> {
        debug_assert_eq!(attr.element_type(), element);
        if attr.num_elements() != num_elements {
            return Err(Error::MismatchedArrayLengths(attr.num_elements(), num_elements));
        }
        self.slot(id)?;
        self.resize_all_but(element, num_elements, Some(id))?;
        self.slot_mut(id)?.attr = Arc::from(attr);
        Ok(())
    }

    fn resize_all_but(
        &mut self,
        element: AttributeElement,
        num_elements: usize,
        skip: Option<AttributeId>,
    ) -> Result<()> {
        let ids: Vec<AttributeId> = self
            .ids(ElementMask::ALL)
            .into_iter()
            .filter(|id| {
                Some(*id) != skip
                    && self.base(*id).is_ok_and(|attr| {
                        let e = attr.element_type();
                        attr.num_elements() != num_elements
                            && (e == element
                                || (element == AttributeElement::Corner
                                    && e == AttributeElement::Indexed))
                    })
            })
            .collect();
        for id in &ids {
            self.base_mut(*id)?;
        }
        for id in &ids {
            self.base(*id)?.check_resize(num_elements)?;
        }
        for id in ids {
            self.base_mut(id)?.resize_elements(num_elements)?;
        }
        self.counts.set(element, num_elements);
        Ok(())
    }

    /// Make writable every attribute for which `rows` returns a row count,
    /// with room for that many rows. Used before multi-step edits so that
    /// read-only buffers fail the edit before anything changes.
    ///
    /// Every attribute in `mask` is also made unique, so that a following
    /// [`AttributeRegistry::for_each_mut`] over `mask` cannot fail to copy.
    pub(crate) fn prepare_write<F>(&mut self, mask: impl Into<ElementMask>, mut rows: F) -> Result<()>
    where
        F: FnMut(&dyn AttributeBase) -> Option<usize>,
    {
        let mask = mask.into();
        for id in self.name_to_id.values() {
            if let Some(slot) = &mut self.slots[*id as usize] {
                if !mask.contains(slot.attr.element_type()) {
                    continue;
                }
                let attr = materialize_if_shared(&mut slot.attr)?;
                if let Some(n) = rows(&*attr) {
                    attr.prepare_write(n)?;
                }
            }
        }
        Ok(())
    }

    /// Record a new element count without touching the attributes. The
    /// caller replaces every attribute of that element afterwards.
    pub(crate) fn set_count(&mut self, element: AttributeElement, num_elements: usize) {
        self.counts.set(element, num_elements);
    }

    /// Release unused capacity in every attribute.
    pub fn shrink_to_fit(&mut self) -> Result<()> {
        self.for_each_mut(ElementMask::ALL, |_, _, attr| attr.shrink_to_fit())
    }
}
