use crate::{
    attribute::Attribute,
    element::{AttributeElement, AttributeUsage, INVALID_INDEX, Index},
    error::{Error, Result},
    value::AttributeValue,
};

/**
 * An attribute whose values are shared between corners. The values are
 * stored in a buffer of their own, and every corner holds an index into that
 * buffer. This is how attributes with seams, like UVs, are represented.
 */
#[derive(Debug)]
pub struct IndexedAttribute<T>
where
    T: AttributeValue,
{
    usage: AttributeUsage,
    values: Attribute<T>,
    indices: Attribute<Index>,
}

impl<T> IndexedAttribute<T>
where
    T: AttributeValue,
{
    /// Create an indexed attribute with no values, and `num_corners` invalid
    /// indices.
    pub fn new(usage: AttributeUsage, num_channels: usize, num_corners: usize) -> Result<Self> {
        let mut indices = Attribute::new(AttributeElement::Corner, AttributeUsage::Scalar, 1)?
            .with_default_value(INVALID_INDEX);
        indices.resize_elements(num_corners)?;
        Ok(IndexedAttribute {
            usage,
            values: Attribute::new(AttributeElement::Value, usage, num_channels)?,
            indices,
        })
    }

    /// Assemble an indexed attribute from value rows and per corner indices.
    pub(crate) fn from_parts(
        usage: AttributeUsage,
        values: Attribute<T>,
        indices: Attribute<Index>,
    ) -> Result<Self> {
        let attr = IndexedAttribute {
            usage,
            values,
            indices,
        };
        attr.check_indices()?;
        Ok(attr)
    }

    pub fn element_type(&self) -> AttributeElement {
        AttributeElement::Indexed
    }

    pub fn usage(&self) -> AttributeUsage {
        self.usage
    }

    pub(crate) fn set_usage(&mut self, usage: AttributeUsage) {
        self.usage = usage;
        self.values.set_usage(usage);
    }

    pub fn num_channels(&self) -> usize {
        self.values.num_channels()
    }

    pub fn num_values(&self) -> usize {
        self.values.num_elements()
    }

    pub fn num_corners(&self) -> usize {
        self.indices.num_elements()
    }

    pub fn values(&self) -> &Attribute<T> {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut Attribute<T> {
        &mut self.values
    }

    pub fn indices(&self) -> &Attribute<Index> {
        &self.indices
    }

    pub fn indices_mut(&mut self) -> &mut Attribute<Index> {
        &mut self.indices
    }

    /// The value row of corner `c`, or `None` if the corner is out of range
    /// or has an invalid index.
    pub fn get(&self, c: usize) -> Option<&[T]> {
        match self.indices.get(c, 0)? {
            INVALID_INDEX => None,
            i => self.values.get_row(i as usize),
        }
    }

    /// Replace both the values and the indices. Everything is validated
    /// before either buffer is modified.
    pub fn set(&mut self, values: &[T], indices: &[Index]) -> Result<()> {
        let nc = self.num_channels();
        if values.len() % nc != 0 {
            return Err(Error::MismatchedArrayLengths(values.len(), nc));
        }
        if indices.len() != self.num_corners() {
            return Err(Error::MismatchedArrayLengths(
                indices.len(),
                self.num_corners(),
            ));
        }
        let num_values = values.len() / nc;
        if let Some(&bad) = indices
            .iter()
            .find(|&&i| i != INVALID_INDEX && i as usize >= num_values)
        {
            return Err(Error::IndexOutOfRange {
                index: bad as usize,
                len: num_values,
            });
        }
        // Both writes below can still fail if a buffer is external. Stage the
        // new values in owned copies so the attribute is only modified when
        // both succeed.
        let mut new_values = self.values.try_clone()?;
        new_values.resize_elements(0)?;
        new_values.insert_rows(values)?;
        let mut new_indices = self.indices.try_clone()?;
        new_indices.ref_all()?.copy_from_slice(indices);
        self.values = new_values;
        self.indices = new_indices;
        Ok(())
    }

    /// Copy this attribute. External buffers follow their copy policy.
    pub fn try_clone(&self) -> Result<Self> {
        Ok(IndexedAttribute {
            usage: self.usage,
            values: self.values.try_clone()?,
            indices: self.indices.try_clone()?,
        })
    }

    /// Rows of the values that are not referenced by any corner are
    /// dropped, and the indices are updated accordingly.
    pub fn compact_values(&mut self) -> Result<()> {
        let mut old_to_new = vec![INVALID_INDEX; self.num_values()];
        let mut new_to_old = Vec::new();
        for &i in self.indices.get_all() {
            if i == INVALID_INDEX {
                continue;
            }
            let slot = &mut old_to_new[i as usize];
            if *slot == INVALID_INDEX {
                *slot = new_to_old.len() as Index;
                new_to_old.push(i);
            }
        }
        self.indices.remap_index_values(&old_to_new)?;
        self.values.gather_rows(&new_to_old)
    }

    /// Check that every valid index refers to an existing value.
    pub fn check_indices(&self) -> Result<()> {
        let len = self.num_values();
        match self
            .indices
            .get_all()
            .iter()
            .find(|&&i| i != INVALID_INDEX && i as usize >= len)
        {
            Some(&i) => Err(Error::IndexOutOfRange {
                index: i as usize,
                len,
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn uvs() -> IndexedAttribute<f32> {
        let mut attr =
            IndexedAttribute::<f32>::new(AttributeUsage::UV, 2, 4).expect("Cannot create attribute");
        attr.set(&[0., 0., 1., 0., 1., 1.], &[0, 1, 2, 1])
            .expect("Cannot set values");
        attr
    }

    #[test]
    fn t_new() {
        let attr =
            IndexedAttribute::<f64>::new(AttributeUsage::Normal, 3, 5).expect("Cannot create attribute");
        assert_eq!(attr.num_channels(), 3);
        assert_eq!(attr.num_corners(), 5);
        assert_eq!(attr.num_values(), 0);
        assert!(attr.indices().get_all().iter().all(|i| *i == INVALID_INDEX));
        assert_eq!(attr.get(0), None);
        assert_eq!(attr.element_type(), AttributeElement::Indexed);
        assert_eq!(attr.values().element_type(), AttributeElement::Value);
        assert_eq!(attr.indices().element_type(), AttributeElement::Corner);
    }

    #[test]
    fn t_set_and_get() {
        let attr = uvs();
        assert_eq!(attr.num_values(), 3);
        assert_eq!(attr.get(3), Some(&[1.0f32, 0.][..]));
        assert_eq!(attr.get(2), Some(&[1.0f32, 1.][..]));
        assert_eq!(attr.get(4), None);
        attr.check_indices().expect("Indices must be valid");
    }

    #[test]
    fn t_set_is_atomic() {
        let mut attr = uvs();
        let values_before = attr.values().get_all().to_vec();
        let indices_before = attr.indices().get_all().to_vec();
        assert!(matches!(
            attr.set(&[0., 0., 1., 1.], &[0, 1, 2, INVALID_INDEX]),
            Err(Error::IndexOutOfRange { index: 2, len: 2 })
        ));
        assert!(matches!(
            attr.set(&[0., 0., 1.], &[0, 0, 0, 0]),
            Err(Error::MismatchedArrayLengths(3, 2))
        ));
        assert!(matches!(
            attr.set(&[0., 0.], &[0, 0]),
            Err(Error::MismatchedArrayLengths(2, 4))
        ));
        assert_eq!(attr.values().get_all(), values_before.as_slice());
        assert_eq!(attr.indices().get_all(), indices_before.as_slice());
        attr.set(&[5., 5.], &[0, INVALID_INDEX, 0, 0])
            .expect("Cannot set values");
        assert_eq!(attr.get(1), None);
        assert_eq!(attr.get(2), Some(&[5.0f32, 5.][..]));
    }

    #[test]
    fn t_compact_values() {
        let mut attr = IndexedAttribute::<u8>::new(AttributeUsage::Scalar, 1, 3)
            .expect("Cannot create attribute");
        attr.set(&[10, 11, 12, 13], &[3, 1, 3]).expect("Cannot set values");
        attr.compact_values().expect("Cannot compact");
        assert_eq!(attr.values().get_all(), &[13, 11]);
        assert_eq!(attr.indices().get_all(), &[0, 1, 0]);
    }
}
