/*!
Moving attribute values between element sets.

Mappings are given from the point of view of the target: target element `i`
takes its values from one source element, or from a group of them. Groups
are stored in compressed form, with `offsets[i]..offsets[i + 1]` indexing
into `data`. When several source elements feed the same target, a
[`MappingPolicy`] decides how their values are combined.
*/

use crate::{
    attribute::Attribute,
    element::{AttributeElement, AttributeId, AttributeUsage, ElementMask, INVALID_INDEX, Index},
    error::{Error, Result},
    indexed::IndexedAttribute,
    mesh::{SurfaceMesh, names},
    policy::{CreatePolicy, DeletePolicy, MappingPolicy},
    registry::{AttributeBase, AttributeRegistry, is_reserved_name},
    value::{AttributeValue, Scalar, dispatch_value_kind},
};

/// Describes where each target element takes its values from.
#[derive(Copy, Clone, Debug)]
pub struct MappingOptions<'a> {
    /// Group boundaries into `data`, one more than the number of targets.
    /// Without offsets, target `i` maps to the single source `data[i]`.
    pub offsets: Option<&'a [Index]>,
    /// Source element indices.
    pub data: &'a [Index],
    pub integral_policy: MappingPolicy,
    pub float_policy: MappingPolicy,
}

impl<'a> MappingOptions<'a> {
    /// Target `i` takes its values from source `data[i]`. Invalid indices
    /// leave the target at its default value.
    pub fn one_to_one(data: &'a [Index]) -> Self {
        MappingOptions {
            offsets: None,
            data,
            integral_policy: MappingPolicy::KeepFirst,
            float_policy: MappingPolicy::Average,
        }
    }

    /// Target `i` takes its values from sources
    /// `data[offsets[i]..offsets[i + 1]]`.
    pub fn grouped(offsets: &'a [Index], data: &'a [Index]) -> Self {
        MappingOptions {
            offsets: Some(offsets),
            ..Self::one_to_one(data)
        }
    }

    pub fn with_policies(mut self, integral: MappingPolicy, float: MappingPolicy) -> Self {
        self.integral_policy = integral;
        self.float_policy = float;
        self
    }

    pub fn num_targets(&self) -> usize {
        match self.offsets {
            Some(offsets) => offsets.len().saturating_sub(1),
            None => self.data.len(),
        }
    }

    fn group(&self, i: usize) -> &'a [Index] {
        match self.offsets {
            Some(offsets) => &self.data[(offsets[i] as usize)..(offsets[i + 1] as usize)],
            None => std::slice::from_ref(&self.data[i]),
        }
    }

    fn policy<T: AttributeValue>(&self) -> MappingPolicy {
        if T::is_integral() {
            self.integral_policy
        } else {
            self.float_policy
        }
    }

    fn check(&self, num_sources: usize) -> Result<()> {
        if let Some(offsets) = self.offsets {
            match (offsets.first(), offsets.last()) {
                (Some(0), Some(&last)) if last as usize == self.data.len() => {}
                _ => {
                    return Err(Error::InvalidMapping(
                        "offsets must start at 0 and end at the length of the data".to_string(),
                    ));
                }
            }
            debug_assert!(
                offsets.windows(2).all(|w| w[0] <= w[1]),
                "Mapping offsets must be sorted"
            );
        }
        match self
            .data
            .iter()
            .find(|i| **i != INVALID_INDEX && **i as usize >= num_sources)
        {
            Some(i) => Err(Error::IndexOutOfRange {
                index: *i as usize,
                len: num_sources,
            }),
            None => Ok(()),
        }
    }
}

/// Options for [`remap_vertices`].
#[derive(Copy, Clone, Debug)]
pub struct RemapVerticesOptions {
    pub integral_policy: MappingPolicy,
    pub float_policy: MappingPolicy,
}

impl Default for RemapVerticesOptions {
    fn default() -> Self {
        RemapVerticesOptions {
            integral_policy: MappingPolicy::KeepFirst,
            float_policy: MappingPolicy::Average,
        }
    }
}

/// Map the rows of a typed attribute.
fn map_rows<T>(attr: &Attribute<T>, options: &MappingOptions) -> Result<Attribute<T>>
where
    T: AttributeValue,
{
    let nc = attr.num_channels();
    let policy = options.policy::<T>();
    if options.offsets.is_some() && policy == MappingPolicy::Average && attr.usage().is_index() {
        return Err(Error::InvalidAverage(attr.usage()));
    }
    let num_targets = options.num_targets();
    let src = attr.get_all();
    let mut values = vec![attr.default_value(); num_targets * nc];
    let mut sum = vec![0f64; nc];
    for (i, dst) in values.chunks_exact_mut(nc).enumerate() {
        let group = options.group(i);
        let mut valid = group.iter().filter(|j| **j != INVALID_INDEX);
        let Some(&first) = valid.next() else {
            continue;
        };
        let row = move |j: Index| &src[(j as usize * nc)..((j as usize + 1) * nc)];
        let count = 1 + valid.clone().count();
        if count == 1 || policy == MappingPolicy::KeepFirst {
            dst.copy_from_slice(row(first));
            continue;
        }
        if policy == MappingPolicy::Error {
            return Err(Error::NonInjectiveMapping { target: i, count });
        }
        for (s, v) in sum.iter_mut().zip(row(first)) {
            *s = v.to_f64_lossy();
        }
        for j in valid {
            for (s, v) in sum.iter_mut().zip(row(*j)) {
                *s += v.to_f64_lossy();
            }
        }
        for (d, s) in dst.iter_mut().zip(&sum) {
            *d = T::from_f64_lossy(s / count as f64);
        }
    }
    let mut out = Attribute::<T>::new(attr.element_type(), attr.usage(), nc)?
        .with_default_value(attr.default_value());
    out.replace_values(values)?;
    Ok(out)
}

fn map_typed<T>(attr: &dyn AttributeBase, options: &MappingOptions) -> Result<Box<dyn AttributeBase>>
where
    T: AttributeValue,
{
    let mismatch = || Error::TypeMismatch {
        expected: T::KIND,
        found: attr.value_kind(),
    };
    if attr.is_indexed() {
        let indexed = attr
            .as_any()
            .downcast_ref::<IndexedAttribute<T>>()
            .ok_or_else(mismatch)?;
        // Index rows cannot be averaged, so groups keep their first corner.
        let index_policy = match options.policy::<T>() {
            MappingPolicy::Error => MappingPolicy::Error,
            _ => MappingPolicy::KeepFirst,
        };
        let index_options = options.with_policies(index_policy, index_policy);
        let indices = map_rows(indexed.indices(), &index_options)?;
        Ok(Box::new(IndexedAttribute::from_parts(
            indexed.usage(),
            indexed.values().try_clone()?,
            indices,
        )?))
    } else {
        let attr = attr
            .as_any()
            .downcast_ref::<Attribute<T>>()
            .ok_or_else(mismatch)?;
        Ok(Box::new(map_rows(attr, options)?))
    }
}

pub(crate) fn map_base(
    attr: &dyn AttributeBase,
    options: &MappingOptions,
) -> Result<Box<dyn AttributeBase>> {
    dispatch_value_kind!(attr.value_kind(), V => map_typed::<V>(attr, options))
}

fn same_shape(a: &dyn AttributeBase, b: &dyn AttributeBase) -> bool {
    a.value_kind() == b.value_kind()
        && a.element_type() == b.element_type()
        && a.usage() == b.usage()
        && a.num_channels() == b.num_channels()
}

/// Map the non reserved attributes of one element type from `source` into
/// `target`. Corner mappings also carry the indexed attributes.
pub(crate) fn map_registry_attributes(
    source: &AttributeRegistry,
    target: &mut AttributeRegistry,
    element: AttributeElement,
    options: &MappingOptions,
) -> Result<()> {
    let mask: ElementMask = match element {
        AttributeElement::Value | AttributeElement::Indexed => {
            return Err(Error::UnsupportedElement(element));
        }
        AttributeElement::Corner => AttributeElement::Corner | AttributeElement::Indexed,
        _ => element.into(),
    };
    let expected = target.counts().rows(element);
    if options.num_targets() != expected {
        return Err(Error::MismatchedArrayLengths(options.num_targets(), expected));
    }
    options.check(source.counts().rows(element))?;
    // Compute everything before touching the target.
    let mut mapped: Vec<(String, Box<dyn AttributeBase>)> = Vec::new();
    let mut failure = None;
    source.for_each(mask, |_, name, attr| {
        if failure.is_some() || is_reserved_name(name) {
            return;
        }
        match map_base(attr, options) {
            Ok(attr) => mapped.push((name.to_string(), attr)),
            Err(e) => failure = Some(e),
        }
    });
    if let Some(e) = failure {
        return Err(e);
    }
    for (name, attr) in &mapped {
        if let Ok(id) = target.id(name) {
            if !same_shape(target.base(id)?, attr.as_ref()) {
                return Err(Error::AttributeShapeMismatch(name.clone()));
            }
        }
    }
    log::debug!(
        "Mapping {} {:?} attributes onto {} elements",
        mapped.len(),
        element,
        expected
    );
    for (name, attr) in mapped {
        match target.id(&name) {
            Ok(id) => {
                log::trace!("Replacing attribute '{name}'");
                target.replace(id, attr)?
            }
            Err(_) => {
                log::trace!("Creating attribute '{name}'");
                target.insert_attribute(&name, attr, CreatePolicy::ErrorIfReserved)?;
            }
        }
    }
    Ok(())
}

/// Map all non reserved attributes of `element` type from `source` onto
/// `target`, whose element count must match the number of targets of the
/// mapping.
pub fn map_attributes<S>(
    source: &SurfaceMesh<S>,
    target: &mut SurfaceMesh<S>,
    element: AttributeElement,
    options: &MappingOptions,
) -> Result<()>
where
    S: Scalar,
{
    map_registry_attributes(source.attributes(), target.registry_mut(), element, options)
}

/// Invert an `old -> new` mapping into groups of old indices per new index,
/// returned as `(offsets, data)`. Old elements mapped to [`INVALID_INDEX`] are
/// dropped. Groups list old indices in increasing order.
pub fn invert_mapping(
    old_to_new: &[Index],
    num_new: usize,
    require_surjective: bool,
) -> Result<(Vec<Index>, Vec<Index>)> {
    let mut offsets = vec![0 as Index; num_new + 1];
    for &n in old_to_new {
        if n == INVALID_INDEX {
            continue;
        }
        if n as usize >= num_new {
            return Err(Error::IndexOutOfRange {
                index: n as usize,
                len: num_new,
            });
        }
        offsets[n as usize + 1] += 1;
    }
    if require_surjective {
        if let Some(i) = offsets[1..].iter().position(|c| *c == 0) {
            return Err(Error::InvalidMapping(format!(
                "no element maps to target {i}"
            )));
        }
    }
    for i in 1..offsets.len() {
        offsets[i] += offsets[i - 1];
    }
    let mut cursor = offsets.clone();
    let mut data = vec![INVALID_INDEX; offsets[num_new] as usize];
    for (old, &n) in old_to_new.iter().enumerate() {
        if n == INVALID_INDEX {
            continue;
        }
        let slot = &mut cursor[n as usize];
        data[*slot as usize] = old as Index;
        *slot += 1;
    }
    Ok((offsets, data))
}

/// Renumber the vertices so that old vertex `v` becomes `old_to_new[v]`.
/// Several old vertices may collapse into one, in which case their values
/// are combined according to the options. Every new index must be used.
pub fn remap_vertices<S>(
    mesh: &mut SurfaceMesh<S>,
    old_to_new: &[Index],
    options: RemapVerticesOptions,
) -> Result<()>
where
    S: Scalar,
{
    let nv = mesh.num_vertices();
    if old_to_new.len() != nv {
        return Err(Error::MismatchedArrayLengths(old_to_new.len(), nv));
    }
    if old_to_new.contains(&INVALID_INDEX) {
        return Err(Error::InvalidMapping(
            "every vertex must have a target".to_string(),
        ));
    }
    let num_new = old_to_new.iter().max().map_or(0, |m| *m as usize + 1);
    let (offsets, data) = invert_mapping(old_to_new, num_new, true)?;
    let mapping = MappingOptions::grouped(&offsets, &data)
        .with_policies(options.integral_policy, options.float_policy);
    // Compute everything before touching the mesh.
    let mut mapped: Vec<(AttributeId, Box<dyn AttributeBase>)> = Vec::new();
    let mut failure = None;
    mesh.attributes()
        .for_each(AttributeElement::Vertex, |id, name, attr| {
            if failure.is_some() || name == names::VERTEX_TO_FIRST_CORNER {
                return;
            }
            match map_base(attr, &mapping) {
                Ok(attr) => mapped.push((id, attr)),
                Err(e) => failure = Some(e),
            }
        });
    if let Some(e) = failure {
        return Err(e);
    }
    let edges = if mesh.has_edges() {
        let c2v: Vec<Index> = mesh
            .corner_to_vertex()?
            .iter()
            .map(|v| old_to_new.get(*v as usize).copied().unwrap_or(INVALID_INDEX))
            .collect();
        let layout = mesh.facet_layout()?;
        Some(mesh.rebuild_edges(
            num_new,
            &c2v,
            layout.ranges(),
            None,
            options.integral_policy,
            options.float_policy,
        )?)
    } else {
        None
    };
    let with_edges = edges.is_some();
    mesh.registry_mut()
        .prepare_write(ElementMask::ALL, |attr| {
            let written = (attr.usage() == AttributeUsage::VertexIndex
                && attr.element_type() != AttributeElement::Vertex)
                || (with_edges && attr.usage() == AttributeUsage::EdgeIndex);
            written.then(|| attr.num_elements())
        })?;
    log::debug!("Remapping {nv} vertices onto {num_new}");
    // Nothing below can fail.
    mesh.drop_connectivity()?;
    let registry = mesh.registry_mut();
    registry.set_count(AttributeElement::Vertex, num_new);
    for (id, attr) in mapped {
        registry.replace(id, attr)?;
    }
    let conn = match edges {
        Some(edges) => Some(mesh.commit_edge_attributes(edges)?),
        None => None,
    };
    mesh.registry_mut()
        .for_each_mut(ElementMask::ALL, |_, _, attr| {
            if attr.usage() == AttributeUsage::VertexIndex {
                attr.remap_index_values(old_to_new)
            } else {
                Ok(())
            }
        })?;
    if let Some(conn) = conn {
        mesh.store_connectivity(conn)?;
    }
    Ok(())
}

fn check_permutation(order: &[Index], len: usize) -> Result<()> {
    if order.len() != len {
        return Err(Error::MismatchedArrayLengths(order.len(), len));
    }
    let mut seen = vec![false; len];
    for &i in order {
        match seen.get_mut(i as usize) {
            Some(true) => {
                return Err(Error::NonInjectiveMapping {
                    target: i as usize,
                    count: 2,
                });
            }
            Some(flag) => *flag = true,
            None => {
                return Err(Error::IndexOutOfRange {
                    index: i as usize,
                    len,
                });
            }
        }
    }
    Ok(())
}

/// Reorder the vertices so that new vertex `i` is old vertex
/// `new_to_old[i]`.
pub fn reorder_vertices<S>(mesh: &mut SurfaceMesh<S>, new_to_old: &[Index]) -> Result<()>
where
    S: Scalar,
{
    check_permutation(new_to_old, mesh.num_vertices())?;
    mesh.reindex_vertices(new_to_old)
}

/// Reorder the facets so that new facet `i` is old facet `new_to_old[i]`.
/// Corners move along with their facets.
pub fn reorder_facets<S>(mesh: &mut SurfaceMesh<S>, new_to_old: &[Index]) -> Result<()>
where
    S: Scalar,
{
    check_permutation(new_to_old, mesh.num_facets())?;
    mesh.reindex_facets(new_to_old)
}

/// The element of every corner, for the element types attached to the mesh.
fn corner_to_element<S>(mesh: &SurfaceMesh<S>, element: AttributeElement) -> Result<Vec<Index>>
where
    S: Scalar,
{
    let nc = mesh.num_corners() as Index;
    Ok(match element {
        AttributeElement::Vertex => mesh.corner_to_vertex()?.to_vec(),
        AttributeElement::Facet => {
            let layout = mesh.facet_layout()?;
            (0..nc).map(|c| layout.facet_of(c)).collect()
        }
        AttributeElement::Edge => mesh.corner_to_edge()?.to_vec(),
        AttributeElement::Corner => (0..nc).collect(),
        AttributeElement::Value | AttributeElement::Indexed => {
            return Err(Error::UnsupportedElement(element));
        }
    })
}

fn convert_typed<T, S>(
    mesh: &SurfaceMesh<S>,
    id: AttributeId,
    new_element: AttributeElement,
) -> Result<Box<dyn AttributeBase>>
where
    T: AttributeValue,
    S: Scalar,
{
    let registry = mesh.attributes();
    let base = registry.base(id)?;
    let usage = base.usage();
    let nc = base.num_channels();
    // Source rows, the source row of every corner, and the default value.
    let (values, corner_rows, default) = match base.element_type() {
        AttributeElement::Indexed => {
            let attr = registry.get_indexed::<T>(id)?;
            (
                attr.values().get_all().to_vec(),
                Some(attr.indices().get_all().to_vec()),
                attr.values().default_value(),
            )
        }
        AttributeElement::Value => {
            let attr = registry.get::<T>(id)?;
            (attr.get_all().to_vec(), None, attr.default_value())
        }
        element => {
            let attr = registry.get::<T>(id)?;
            (
                attr.get_all().to_vec(),
                Some(corner_to_element(mesh, element)?),
                attr.default_value(),
            )
        }
    };
    let num_rows = values.len() / nc;
    let make = |element: AttributeElement, values: Vec<T>| -> Result<Attribute<T>> {
        let mut attr = Attribute::<T>::new(element, usage, nc)?.with_default_value(default);
        attr.replace_values(values)?;
        Ok(attr)
    };
    let gather = |rows: &[Index]| -> Vec<T> {
        let mut out = Vec::with_capacity(rows.len() * nc);
        for &r in rows {
            match r {
                INVALID_INDEX => out.extend(std::iter::repeat_n(default, nc)),
                r => out.extend_from_slice(&values[(r as usize * nc)..((r as usize + 1) * nc)]),
            }
        }
        out
    };
    let num_corners = mesh.num_corners();
    match new_element {
        AttributeElement::Indexed => {
            let rows = match corner_rows {
                Some(rows) => rows,
                None if num_rows == num_corners => (0..num_corners as Index).collect(),
                None => return Err(Error::MismatchedArrayLengths(num_rows, num_corners)),
            };
            let mut indices = Attribute::<Index>::new(AttributeElement::Corner, AttributeUsage::Scalar, 1)?
                .with_default_value(INVALID_INDEX);
            indices.replace_values(rows)?;
            let values = make(AttributeElement::Value, values.clone())?;
            Ok(Box::new(IndexedAttribute::from_parts(usage, values, indices)?))
        }
        AttributeElement::Value => {
            let values = match (&corner_rows, base.is_indexed()) {
                (Some(rows), true) => gather(rows),
                _ => values.clone(),
            };
            Ok(Box::new(make(AttributeElement::Value, values)?))
        }
        target => {
            let num_targets = registry.counts().rows(target);
            let Some(rows) = corner_rows else {
                if num_rows != num_targets {
                    return Err(Error::MismatchedArrayLengths(num_rows, num_targets));
                }
                return Ok(Box::new(make(target, values.clone())?));
            };
            if target == AttributeElement::Corner {
                return Ok(Box::new(make(target, gather(&rows))?));
            }
            if usage.is_index() {
                return Err(Error::InvalidAverage(usage));
            }
            // Every corner contributes its source row to its target element.
            let targets = corner_to_element(mesh, target)?;
            let mut sums = vec![0f64; num_targets * nc];
            let mut counts = vec![0usize; num_targets];
            for (&src, &dst) in rows.iter().zip(&targets) {
                if src == INVALID_INDEX {
                    continue;
                }
                let (src, dst) = (src as usize, dst as usize);
                counts[dst] += 1;
                for (s, v) in sums[(dst * nc)..((dst + 1) * nc)]
                    .iter_mut()
                    .zip(&values[(src * nc)..((src + 1) * nc)])
                {
                    *s += v.to_f64_lossy();
                }
            }
            let mut out = vec![default; num_targets * nc];
            for (i, count) in counts.iter().enumerate() {
                if *count == 0 {
                    continue;
                }
                for (d, s) in out[(i * nc)..((i + 1) * nc)]
                    .iter_mut()
                    .zip(&sums[(i * nc)..((i + 1) * nc)])
                {
                    *d = T::from_f64_lossy(s / *count as f64);
                }
            }
            Ok(Box::new(make(target, out)?))
        }
    }
}

/// Convert an attribute to another element type, stored under `new_name`.
/// Values move through the corners: finer targets gather the value of their
/// source, coarser targets average the values of their corners, and indexed
/// targets reuse the source rows as their values.
pub fn map_attribute<S>(
    mesh: &mut SurfaceMesh<S>,
    id: AttributeId,
    new_name: &str,
    new_element: AttributeElement,
) -> Result<AttributeId>
where
    S: Scalar,
{
    let (old_element, kind) = {
        let base = mesh.attributes().base(id)?;
        (base.element_type(), base.value_kind())
    };
    if old_element == new_element {
        log::warn!("Attribute is already of element type {new_element:?}, copying it");
        let name = mesh.attribute_name(id)?.to_string();
        return mesh.duplicate_attribute(&name, new_name);
    }
    mesh.attributes()
        .check_new_name(new_name, CreatePolicy::ErrorIfReserved)?;
    if (old_element == AttributeElement::Edge || new_element == AttributeElement::Edge)
        && !mesh.has_edges()
    {
        mesh.initialize_edges()?;
    }
    let attr = dispatch_value_kind!(kind, V => convert_typed::<V, S>(mesh, id, new_element))?;
    mesh.registry_mut()
        .insert_attribute(new_name, attr, CreatePolicy::ErrorIfReserved)
}

/// Same as [`map_attribute`], but the converted attribute replaces the
/// original one under the same name. Returns the id of the new attribute.
pub fn map_attribute_in_place<S>(
    mesh: &mut SurfaceMesh<S>,
    id: AttributeId,
    new_element: AttributeElement,
) -> Result<AttributeId>
where
    S: Scalar,
{
    let name = mesh.attribute_name(id)?.to_string();
    if is_reserved_name(&name) {
        return Err(Error::ReservedName(name));
    }
    let mut tmp = format!("{name}.mapped");
    while mesh.has_attribute(&tmp) {
        tmp.push('_');
    }
    let new_id = map_attribute(mesh, id, &tmp, new_element)?;
    mesh.delete_attribute(&name, DeletePolicy::ErrorIfReserved)?;
    mesh.rename_attribute(&tmp, &name)?;
    Ok(new_id)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::macros::assert_f64_eq;

    fn grid_line() -> SurfaceMesh<f64> {
        let mut mesh = SurfaceMesh::<f64>::new(3).expect("Cannot create mesh");
        mesh.add_vertices(4, &[0., 0., 0., 1., 0., 0., 2., 0., 0., 3., 0., 0.])
            .expect("Cannot add vertices");
        mesh
    }

    fn split_quad() -> SurfaceMesh<f64> {
        let mut mesh = SurfaceMesh::<f64>::new(3).expect("Cannot create mesh");
        mesh.add_vertices(4, &[0., 0., 0., 1., 0., 0., 1., 1., 0., 0., 1., 0.])
            .expect("Cannot add vertices");
        mesh.add_triangles(&[0, 1, 2, 0, 2, 3])
            .expect("Cannot add triangles");
        mesh
    }

    fn with_scalar<T: AttributeValue>(mesh: &mut SurfaceMesh<f64>, name: &str, values: &[T]) {
        let id = mesh
            .create_attribute::<T>(name, AttributeElement::Vertex, AttributeUsage::Scalar, 1)
            .expect("Cannot create attribute");
        mesh.attribute_by_id_mut::<T>(id)
            .expect("Missing attribute")
            .ref_all()
            .expect("Cannot write")
            .copy_from_slice(values);
    }

    fn two_vertices() -> SurfaceMesh<f64> {
        let mut mesh = SurfaceMesh::<f64>::new(3).expect("Cannot create mesh");
        mesh.add_vertices(2, &[]).expect("Cannot add vertices");
        mesh
    }

    #[test]
    fn t_map_grouped_policies() {
        let mut source = grid_line();
        with_scalar::<f64>(&mut source, "s", &[1., 2., 3., 4.]);
        let offsets = [0, 2, 4];
        let data = [0, 1, 2, 3];

        let mut target = two_vertices();
        map_attributes(
            &source,
            &mut target,
            AttributeElement::Vertex,
            &MappingOptions::grouped(&offsets, &data),
        )
        .expect("Cannot map attributes");
        assert_eq!(target.attribute::<f64>("s").expect("Missing").get_all(), &[1.5, 3.5]);
        // Reserved attributes are left alone.
        assert_eq!(target.position(1).expect("Missing vertex"), &[0., 0., 0.]);

        let mut target = two_vertices();
        map_attributes(
            &source,
            &mut target,
            AttributeElement::Vertex,
            &MappingOptions::grouped(&offsets, &data)
                .with_policies(MappingPolicy::KeepFirst, MappingPolicy::KeepFirst),
        )
        .expect("Cannot map attributes");
        assert_eq!(target.attribute::<f64>("s").expect("Missing").get_all(), &[1., 3.]);

        let mut target = two_vertices();
        assert!(matches!(
            map_attributes(
                &source,
                &mut target,
                AttributeElement::Vertex,
                &MappingOptions::grouped(&offsets, &data)
                    .with_policies(MappingPolicy::Error, MappingPolicy::Error),
            ),
            Err(Error::NonInjectiveMapping { target: 0, count: 2 })
        ));
        assert!(!target.has_attribute("s"));
    }

    #[test]
    fn t_map_integral_and_index() {
        let mut source = grid_line();
        with_scalar::<u8>(&mut source, "level", &[1, 2, 4, 250]);
        let mut target = two_vertices();
        let offsets = [0, 2, 4];
        let data = [0, 1, 2, 3];
        map_attributes(
            &source,
            &mut target,
            AttributeElement::Vertex,
            &MappingOptions::grouped(&offsets, &data)
                .with_policies(MappingPolicy::Average, MappingPolicy::Average),
        )
        .expect("Cannot map attributes");
        assert_eq!(target.attribute::<u8>("level").expect("Missing").get_all(), &[1, 127]);

        let id = source
            .create_attribute::<u32>("link", AttributeElement::Vertex, AttributeUsage::VertexIndex, 1)
            .expect("Cannot create attribute");
        assert_eq!(
            source.attribute_by_id::<u32>(id).expect("Missing").get(0, 0),
            Some(u32::MAX)
        );
        let mut target = two_vertices();
        assert!(matches!(
            map_attributes(
                &source,
                &mut target,
                AttributeElement::Vertex,
                &MappingOptions::grouped(&offsets, &data)
                    .with_policies(MappingPolicy::Average, MappingPolicy::Average),
            ),
            Err(Error::InvalidAverage(AttributeUsage::VertexIndex))
        ));
    }

    #[test]
    fn t_map_one_to_one() {
        let mut source = grid_line();
        with_scalar::<i32>(&mut source, "s", &[10, 20, 30, 40]);
        let mut target = grid_line();
        target
            .create_attribute::<i32>("s", AttributeElement::Vertex, AttributeUsage::Scalar, 1)
            .expect("Cannot create attribute");
        map_attributes(
            &source,
            &mut target,
            AttributeElement::Vertex,
            &MappingOptions::one_to_one(&[3, INVALID_INDEX, 0, 0]),
        )
        .expect("Cannot map attributes");
        assert_eq!(
            target.attribute::<i32>("s").expect("Missing").get_all(),
            &[40, 0, 10, 10]
        );
        // Existing targets must have the same shape.
        let mut other = grid_line();
        other
            .create_attribute::<f32>("s", AttributeElement::Vertex, AttributeUsage::Scalar, 1)
            .expect("Cannot create attribute");
        assert!(matches!(
            map_attributes(
                &source,
                &mut other,
                AttributeElement::Vertex,
                &MappingOptions::one_to_one(&[0, 1, 2, 3]),
            ),
            Err(Error::AttributeShapeMismatch(_))
        ));
        assert!(matches!(
            map_attributes(
                &source,
                &mut other,
                AttributeElement::Vertex,
                &MappingOptions::one_to_one(&[0, 1, 2]),
            ),
            Err(Error::MismatchedArrayLengths(3, 4))
        ));
        assert!(matches!(
            map_attributes(
                &source,
                &mut other,
                AttributeElement::Vertex,
                &MappingOptions::one_to_one(&[0, 1, 2, 9]),
            ),
            Err(Error::IndexOutOfRange { index: 9, len: 4 })
        ));
    }

    #[test]
    fn t_map_corners_with_indexed() {
        let mut source = split_quad();
        source
            .create_attribute::<f32>("uv", AttributeElement::Indexed, AttributeUsage::UV, 2)
            .expect("Cannot create attribute");
        source
            .indexed_attribute_mut::<f32>("uv")
            .expect("Missing")
            .set(&[0., 0., 1., 1.], &[0, 1, 1, 0, 1, 0])
            .expect("Cannot set values");
        let mut target = split_quad();
        // Swap the two triangles.
        map_attributes(
            &source,
            &mut target,
            AttributeElement::Corner,
            &MappingOptions::one_to_one(&[3, 4, 5, 0, 1, 2]),
        )
        .expect("Cannot map attributes");
        let uv = target.indexed_attribute::<f32>("uv").expect("Missing");
        assert_eq!(uv.indices().get_all(), &[0, 1, 0, 0, 1, 1]);
        assert_eq!(uv.values().get_all(), &[0., 0., 1., 1.]);
    }

    #[test]
    fn t_invert_mapping() {
        let (offsets, data) =
            invert_mapping(&[1, 0, 1, INVALID_INDEX, 2], 3, true).expect("Cannot invert");
        assert_eq!(offsets, vec![0, 1, 3, 4]);
        assert_eq!(data, vec![1, 0, 2, 4]);
        assert!(matches!(
            invert_mapping(&[0, 0, 2], 3, true),
            Err(Error::InvalidMapping(_))
        ));
        let (offsets, _) = invert_mapping(&[0, 0, 2], 3, false).expect("Cannot invert");
        assert_eq!(offsets, vec![0, 2, 2, 3]);
        assert!(matches!(
            invert_mapping(&[0, 5], 3, false),
            Err(Error::IndexOutOfRange { index: 5, len: 3 })
        ));
    }

    #[test]
    fn t_remap_vertices() {
        let mut mesh = split_quad();
        with_scalar::<f32>(&mut mesh, "w", &[1., 2., 3., 5.]);
        mesh.initialize_edges().expect("Cannot build edges");
        // Collapse vertex 3 onto vertex 0.
        remap_vertices(&mut mesh, &[0, 1, 2, 0], RemapVerticesOptions::default())
            .expect("Cannot remap vertices");
        assert_eq!(mesh.num_vertices(), 3);
        assert!(mesh.has_edges());
        assert_eq!(mesh.num_edges(), 4);
        assert_eq!(mesh.position(0).expect("Missing vertex"), &[0., 0.5, 0.]);
        assert_eq!(mesh.attribute::<f32>("w").expect("Missing").get_all(), &[3., 2., 3.]);
        assert_eq!(mesh.facet_vertices(1).expect("Missing facet"), &[0, 2, 0]);
        assert!(matches!(
            remap_vertices(&mut mesh, &[0, 2, 2], RemapVerticesOptions::default()),
            Err(Error::InvalidMapping(_))
        ));
        assert!(matches!(
            remap_vertices(&mut mesh, &[0, 1], RemapVerticesOptions::default()),
            Err(Error::MismatchedArrayLengths(2, 3))
        ));
    }

    fn with_edge_values(mesh: &mut SurfaceMesh<f64>, values: &[f64]) -> AttributeId {
        mesh.initialize_edges().expect("Cannot build edges");
        let id = mesh
            .create_attribute::<f64>("len", AttributeElement::Edge, AttributeUsage::Scalar, 1)
            .expect("Cannot create attribute");
        mesh.attribute_by_id_mut::<f64>(id)
            .expect("Missing attribute")
            .ref_all()
            .expect("Cannot write")
            .copy_from_slice(values);
        id
    }

    fn edge_value(mesh: &SurfaceMesh<f64>, id: AttributeId, v0: Index, v1: Index) -> f64 {
        let e = mesh
            .find_edge_from_vertices(v0, v1)
            .expect("Cannot search edges")
            .expect("Missing edge");
        mesh.attribute_by_id::<f64>(id)
            .expect("Missing attribute")
            .get(e as usize, 0)
            .expect("Missing row")
    }

    #[test]
    fn t_remap_vertices_keeps_edges() {
        let mut mesh = split_quad();
        let len = with_edge_values(&mut mesh, &[7.; 5]);
        remap_vertices(&mut mesh, &[0, 1, 2, 3], RemapVerticesOptions::default())
            .expect("Cannot remap vertices");
        assert!(mesh.has_edges());
        assert_eq!(mesh.num_edges(), 5);
        assert_eq!(mesh.attribute_by_id::<f64>(len).expect("Missing").get_all(), &[7.; 5]);
        mesh.check_topology().expect("Invalid topology");

        // Welding 3 onto 0 merges the edges (0, 2) and (2, 3).
        let mut mesh = split_quad();
        let len = with_edge_values(&mut mesh, &[0., 1., 2., 3., 4.]);
        remap_vertices(&mut mesh, &[0, 1, 2, 0], RemapVerticesOptions::default())
            .expect("Cannot remap vertices");
        assert_eq!(mesh.num_edges(), 4);
        assert_f64_eq!(edge_value(&mesh, len, 0, 1), 0.);
        assert_f64_eq!(edge_value(&mesh, len, 1, 2), 1.);
        assert_f64_eq!(edge_value(&mesh, len, 2, 0), 2.5);
    }

    #[test]
    fn t_failed_remap_changes_nothing() {
        let mut mesh = split_quad();
        let len = with_edge_values(&mut mesh, &[0., 1., 2., 3., 4.]);
        assert!(matches!(
            remap_vertices(
                &mut mesh,
                &[0, 1, 2, 0],
                RemapVerticesOptions {
                    integral_policy: MappingPolicy::KeepFirst,
                    float_policy: MappingPolicy::Error,
                },
            ),
            Err(Error::NonInjectiveMapping { target: 0, count: 2 })
        ));
        assert_eq!(mesh.num_vertices(), 4);
        assert_eq!(mesh.num_edges(), 5);
        assert_eq!(
            mesh.attribute_by_id::<f64>(len).expect("Missing").get_all(),
            &[0., 1., 2., 3., 4.]
        );

        let mut mesh = split_quad();
        mesh.wrap_as_const_facets(std::sync::Arc::from(vec![0, 1, 2, 0, 2, 3]), 2, 3)
            .expect("Cannot wrap facets");
        mesh.initialize_edges().expect("Cannot build edges");
        assert!(matches!(
            remap_vertices(&mut mesh, &[0, 1, 2, 0], RemapVerticesOptions::default()),
            Err(Error::ReadOnlyViolation)
        ));
        assert!(matches!(
            reorder_facets(&mut mesh, &[1, 0]),
            Err(Error::ReadOnlyViolation)
        ));
        assert!(matches!(
            reorder_vertices(&mut mesh, &[3, 2, 1, 0]),
            Err(Error::ReadOnlyViolation)
        ));
        assert_eq!(mesh.num_vertices(), 4);
        assert_eq!(mesh.position(3).expect("Missing vertex"), &[0., 1., 0.]);
        assert_eq!(mesh.facet_vertices(0).expect("Missing facet"), &[0, 1, 2]);
        assert_eq!(mesh.facet_vertices(1).expect("Missing facet"), &[0, 2, 3]);
        assert!(mesh.has_edges());
        mesh.check_topology().expect("Invalid topology");
    }

    #[test]
    fn t_reorder_keeps_edges() {
        let mut mesh = split_quad();
        let len = with_edge_values(&mut mesh, &[0., 10., 20., 30., 40.]);
        reorder_facets(&mut mesh, &[1, 0]).expect("Cannot reorder facets");
        assert_eq!(mesh.num_edges(), 5);
        assert_f64_eq!(edge_value(&mesh, len, 0, 1), 0.);
        assert_f64_eq!(edge_value(&mesh, len, 0, 2), 20.);
        assert_f64_eq!(edge_value(&mesh, len, 2, 3), 30.);
        mesh.check_topology().expect("Invalid topology");
        // Old vertex v becomes 3 - v.
        reorder_vertices(&mut mesh, &[3, 2, 1, 0]).expect("Cannot reorder vertices");
        assert_f64_eq!(edge_value(&mesh, len, 3, 2), 0.);
        assert_f64_eq!(edge_value(&mesh, len, 3, 1), 20.);
        assert_f64_eq!(edge_value(&mesh, len, 1, 0), 30.);
        assert_f64_eq!(edge_value(&mesh, len, 0, 3), 40.);
        mesh.check_topology().expect("Invalid topology");
    }

    #[test]
    fn t_reorder() {
        let mut mesh = split_quad();
        let id = mesh
            .create_attribute::<u16>("c", AttributeElement::Corner, AttributeUsage::Scalar, 1)
            .expect("Cannot create attribute");
        mesh.attribute_by_id_mut::<u16>(id)
            .expect("Missing")
            .ref_all()
            .expect("Cannot write")
            .copy_from_slice(&[0, 1, 2, 3, 4, 5]);
        reorder_facets(&mut mesh, &[1, 0]).expect("Cannot reorder facets");
        assert_eq!(mesh.facet_vertices(0).expect("Missing facet"), &[0, 2, 3]);
        assert_eq!(
            mesh.attribute_by_id::<u16>(id).expect("Missing").get_all(),
            &[3, 4, 5, 0, 1, 2]
        );
        reorder_vertices(&mut mesh, &[3, 2, 1, 0]).expect("Cannot reorder vertices");
        assert_eq!(mesh.facet_vertices(0).expect("Missing facet"), &[3, 1, 0]);
        assert_eq!(mesh.position(0).expect("Missing vertex"), &[0., 1., 0.]);
        assert!(matches!(
            reorder_vertices(&mut mesh, &[0, 0, 1, 2]),
            Err(Error::NonInjectiveMapping { target: 0, count: 2 })
        ));
        assert!(matches!(
            reorder_facets(&mut mesh, &[0]),
            Err(Error::MismatchedArrayLengths(1, 2))
        ));
    }

    #[test]
    fn t_map_attribute_elements() {
        let mut mesh = split_quad();
        with_scalar::<f64>(&mut mesh, "h", &[0., 1., 2., 4.]);
        let h = mesh.attribute_id("h").expect("Missing");

        let corner = map_attribute(&mut mesh, h, "h_corner", AttributeElement::Corner)
            .expect("Cannot map attribute");
        assert_eq!(
            mesh.attribute_by_id::<f64>(corner).expect("Missing").get_all(),
            &[0., 1., 2., 0., 2., 4.]
        );

        let facet = map_attribute(&mut mesh, h, "h_facet", AttributeElement::Facet)
            .expect("Cannot map attribute");
        let facet = mesh.attribute_by_id::<f64>(facet).expect("Missing");
        assert_f64_eq!(facet.get(0, 0).expect("Missing row"), 1.);
        assert_f64_eq!(facet.get(1, 0).expect("Missing row"), 2.);

        let back = map_attribute(&mut mesh, corner, "h_back", AttributeElement::Vertex)
            .expect("Cannot map attribute");
        assert_eq!(
            mesh.attribute_by_id::<f64>(back).expect("Missing").get_all(),
            &[0., 1., 2., 4.]
        );

        let edge = map_attribute(&mut mesh, h, "h_edge", AttributeElement::Edge)
            .expect("Cannot map attribute");
        assert!(mesh.has_edges());
        let diagonal = mesh
            .find_edge_from_vertices(0, 2)
            .expect("Cannot search edges")
            .expect("Missing edge");
        let lengths = mesh.attribute_by_id::<f64>(edge).expect("Missing");
        assert_f64_eq!(lengths.get(diagonal as usize, 0).expect("Missing row"), 1.);

        let indexed = map_attribute(&mut mesh, h, "h_indexed", AttributeElement::Indexed)
            .expect("Cannot map attribute");
        let attr = mesh
            .attributes()
            .get_indexed::<f64>(indexed)
            .expect("Missing");
        assert_eq!(attr.get(5), Some(&[4.][..]));
        assert_eq!(attr.num_values(), 4);

        let value = map_attribute(&mut mesh, indexed, "h_value", AttributeElement::Value)
            .expect("Cannot map attribute");
        assert_eq!(
            mesh.attribute_by_id::<f64>(value).expect("Missing").get_all(),
            &[0., 1., 2., 0., 2., 4.]
        );
        let corner_again = map_attribute(&mut mesh, value, "h_corner2", AttributeElement::Corner)
            .expect("Cannot map attribute");
        assert_eq!(
            mesh.attribute_by_id::<f64>(corner_again).expect("Missing").get_all(),
            &[0., 1., 2., 0., 2., 4.]
        );
        assert!(matches!(
            map_attribute(&mut mesh, value, "h_bad", AttributeElement::Vertex),
            Err(Error::MismatchedArrayLengths(6, 4))
        ));
    }

    #[test]
    fn t_map_attribute_in_place() {
        let mut mesh = split_quad();
        with_scalar::<f32>(&mut mesh, "h", &[0., 1., 2., 4.]);
        let old = mesh.attribute_id("h").expect("Missing");
        let new = map_attribute_in_place(&mut mesh, old, AttributeElement::Corner)
            .expect("Cannot map attribute");
        assert_ne!(old, new);
        assert_eq!(mesh.attribute_id("h").expect("Missing"), new);
        assert_eq!(
            mesh.attribute::<f32>("h").expect("Missing").element_type(),
            AttributeElement::Corner
        );
        let position = mesh.position_id();
        assert!(matches!(
            map_attribute_in_place(&mut mesh, position, AttributeElement::Corner),
            Err(Error::ReservedName(_))
        ));
        let link = mesh
            .create_attribute::<u32>("link", AttributeElement::Corner, AttributeUsage::VertexIndex, 1)
            .expect("Cannot create attribute");
        assert!(matches!(
            map_attribute(&mut mesh, link, "link_v", AttributeElement::Vertex),
            Err(Error::InvalidAverage(AttributeUsage::VertexIndex))
        ));
    }
}
