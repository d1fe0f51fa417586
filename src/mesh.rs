use crate::{
    attribute::Attribute,
    buffer::ExportedBuffer,
    connectivity::{Connectivity, ConnectivityBuilder},
    element::{
        AttributeElement, AttributeId, AttributeUsage, ElementMask, INVALID_ATTRIBUTE_ID,
        INVALID_INDEX, Index,
    },
    error::{Error, Result},
    indexed::IndexedAttribute,
    iterator::{CornerChainIter, FacetCornerIter, next_corner_in_facet, prev_corner_in_facet},
    policy::{CreatePolicy, DeletePolicy, ExportPolicy, MappingPolicy, ResetToDefault},
    registry::{AttributeBase, AttributeRegistry, is_reserved_name},
    remap::{MappingOptions, invert_mapping, map_base},
    value::{AttributeValue, Scalar},
};
use std::{marker::PhantomData, ops::Range, sync::Arc};

/// Names of the attributes managed by the mesh itself.
pub mod names {
    pub const VERTEX_TO_POSITION: &str = "$vertex_to_position";
    pub const CORNER_TO_VERTEX: &str = "$corner_to_vertex";
    pub const FACET_TO_FIRST_CORNER: &str = "$facet_to_first_corner";
    pub const CORNER_TO_FACET: &str = "$corner_to_facet";
    pub const CORNER_TO_EDGE: &str = "$corner_to_edge";
    pub const EDGE_TO_FIRST_CORNER: &str = "$edge_to_first_corner";
    pub const NEXT_CORNER_AROUND_EDGE: &str = "$next_corner_around_edge";
    pub const VERTEX_TO_FIRST_CORNER: &str = "$vertex_to_first_corner";
    pub const NEXT_CORNER_AROUND_VERTEX: &str = "$next_corner_around_vertex";

    /// Attributes that only the mesh may create or delete.
    pub const MANAGED: [&str; 9] = [
        VERTEX_TO_POSITION,
        CORNER_TO_VERTEX,
        FACET_TO_FIRST_CORNER,
        CORNER_TO_FACET,
        CORNER_TO_EDGE,
        EDGE_TO_FIRST_CORNER,
        NEXT_CORNER_AROUND_EDGE,
        VERTEX_TO_FIRST_CORNER,
        NEXT_CORNER_AROUND_VERTEX,
    ];
}

#[derive(Copy, Clone, Debug)]
struct ReservedIds {
    vertex_to_position: AttributeId,
    corner_to_vertex: AttributeId,
    facet_to_first_corner: AttributeId,
    corner_to_facet: AttributeId,
    corner_to_edge: AttributeId,
    edge_to_first_corner: AttributeId,
    next_corner_around_edge: AttributeId,
    vertex_to_first_corner: AttributeId,
    next_corner_around_vertex: AttributeId,
}

impl Default for ReservedIds {
    fn default() -> Self {
        ReservedIds {
            vertex_to_position: INVALID_ATTRIBUTE_ID,
            corner_to_vertex: INVALID_ATTRIBUTE_ID,
            facet_to_first_corner: INVALID_ATTRIBUTE_ID,
            corner_to_facet: INVALID_ATTRIBUTE_ID,
            corner_to_edge: INVALID_ATTRIBUTE_ID,
            edge_to_first_corner: INVALID_ATTRIBUTE_ID,
            next_corner_around_edge: INVALID_ATTRIBUTE_ID,
            vertex_to_first_corner: INVALID_ATTRIBUTE_ID,
            next_corner_around_vertex: INVALID_ATTRIBUTE_ID,
        }
    }
}

/// How the corners of the facets are laid out.
#[derive(Copy, Clone)]
pub(crate) enum FacetLayout<'a> {
    /// Every facet has `size` corners.
    Regular { size: usize, num_facets: usize },
    /// Facets of varying sizes.
    Hybrid {
        first_corner: &'a [Index],
        corner_to_facet: &'a [Index],
        num_corners: usize,
    },
}

impl FacetLayout<'_> {
    pub fn begin(&self, f: Index) -> Index {
        match self {
            FacetLayout::Regular { size, .. } => f * *size as Index,
            FacetLayout::Hybrid { first_corner, .. } => first_corner[f as usize],
        }
    }

    pub fn end(&self, f: Index) -> Index {
        match self {
            FacetLayout::Regular { size, .. } => (f + 1) * *size as Index,
            FacetLayout::Hybrid {
                first_corner,
                num_corners,
                ..
            } => first_corner
                .get(f as usize + 1)
                .copied()
                .unwrap_or(*num_corners as Index),
        }
    }

    pub fn facet_of(&self, c: Index) -> Index {
        match self {
            FacetLayout::Regular { size, .. } => c / *size as Index,
            FacetLayout::Hybrid {
                corner_to_facet, ..
            } => corner_to_facet[c as usize],
        }
    }

    pub fn num_facets(&self) -> usize {
        match self {
            FacetLayout::Regular { num_facets, .. } => *num_facets,
            FacetLayout::Hybrid { first_corner, .. } => first_corner.len(),
        }
    }

    pub fn next(&self, c: Index) -> Index {
        let f = self.facet_of(c);
        next_corner_in_facet(self.begin(f), self.end(f), c)
    }

    pub fn prev(&self, c: Index) -> Index {
        let f = self.facet_of(c);
        prev_corner_in_facet(self.begin(f), self.end(f), c)
    }

    pub fn ranges(&self) -> impl Iterator<Item = Range<usize>> + use<'_> {
        (0..self.num_facets() as Index).map(|f| (self.begin(f) as usize)..(self.end(f) as usize))
    }
}

/// Number of facets and their sizes, for adding facets in bulk.
enum FacetSizes<'a> {
    Uniform { num_facets: usize, size: usize },
    Varying(&'a [usize]),
}

impl FacetSizes<'_> {
    fn num_facets(&self) -> usize {
        match self {
            FacetSizes::Uniform { num_facets, .. } => *num_facets,
            FacetSizes::Varying(sizes) => sizes.len(),
        }
    }

    fn num_corners(&self) -> usize {
        match self {
            FacetSizes::Uniform { num_facets, size } => num_facets * size,
            FacetSizes::Varying(sizes) => sizes.iter().sum(),
        }
    }

    /// The common size of all facets, if there is one.
    fn uniform_size(&self) -> Option<usize> {
        match self {
            FacetSizes::Uniform { size, .. } => Some(*size),
            FacetSizes::Varying(sizes) => match sizes.first() {
                Some(first) if sizes.iter().all(|s| s == first) => Some(*first),
                _ => None,
            },
        }
    }

    fn check(&self) -> Result<()> {
        let bad = match self {
            FacetSizes::Uniform { num_facets, size } => (*num_facets > 0 && *size < 3).then_some(*size),
            FacetSizes::Varying(sizes) => sizes.iter().copied().find(|s| *s < 3),
        };
        match bad {
            Some(size) => Err(Error::InvalidFacetSize(size)),
            None => Ok(()),
        }
    }
}

/// Edges of a mesh being edited, with the user edge attributes already
/// mapped onto them.
pub(crate) struct RebuiltEdges {
    conn: Connectivity,
    /// New id of every old edge.
    old_to_new: Vec<Index>,
    attributes: Vec<(AttributeId, Box<dyn AttributeBase>)>,
}

/// Rows of the attributes written in place when facets are reindexed.
fn facet_edit_rows(attr: &dyn AttributeBase, with_edges: bool) -> Option<usize> {
    let written = matches!(
        attr.element_type(),
        AttributeElement::Facet | AttributeElement::Corner | AttributeElement::Indexed
    ) || matches!(
        attr.usage(),
        AttributeUsage::FacetIndex | AttributeUsage::CornerIndex
    ) || (with_edges && attr.usage() == AttributeUsage::EdgeIndex);
    written.then(|| attr.num_elements())
}

/// Rows of the attributes written in place when vertices are reindexed.
fn vertex_edit_rows(attr: &dyn AttributeBase, with_edges: bool) -> Option<usize> {
    let written = attr.element_type() == AttributeElement::Vertex
        || attr.usage() == AttributeUsage::VertexIndex
        || (with_edges && attr.usage() == AttributeUsage::EdgeIndex);
    written.then(|| attr.num_elements())
}

/**
 * A polygon mesh whose vertices, facets, corners and edges carry attributes.
 *
 * Facets are stored as a flat list of corners, each referring to a vertex.
 * When all facets have the same number of corners, the mesh is regular and
 * no offsets are stored. Adding a facet of a different size turns the mesh
 * hybrid, and the first corner of each facet is then stored explicitly.
 *
 * Edges and the corner chains around vertices and edges are derived data.
 * They are built on demand with [`SurfaceMesh::initialize_edges`], and
 * dropped when elements are added. Removing, reordering or remapping
 * elements rebuilds them, and edge attributes follow their edges.
 *
 * An edit that fails leaves the mesh as it was.
 *
 * Cloning a mesh is cheap. All attributes are shared with the clone until
 * one of the two meshes writes to them.
 */
#[derive(Clone, Debug)]
pub struct SurfaceMesh<S = f64>
where
    S: Scalar,
{
    dimension: usize,
    vertex_per_facet: usize,
    registry: AttributeRegistry,
    ids: ReservedIds,
    _phantom: PhantomData<S>,
}

impl<S> SurfaceMesh<S>
where
    S: Scalar,
{
    /// Create an empty mesh whose vertices have `dimension` coordinates.
    pub fn new(dimension: usize) -> Result<Self> {
        if !(2..=3).contains(&dimension) {
            return Err(Error::InvalidDimension(dimension));
        }
        let mut registry = AttributeRegistry::with_dimension(dimension);
        let ids = ReservedIds {
            vertex_to_position: registry.create::<S>(
                names::VERTEX_TO_POSITION,
                AttributeElement::Vertex,
                AttributeUsage::Position,
                dimension,
                CreatePolicy::Force,
            )?,
            corner_to_vertex: registry.create::<Index>(
                names::CORNER_TO_VERTEX,
                AttributeElement::Corner,
                AttributeUsage::VertexIndex,
                1,
                CreatePolicy::Force,
            )?,
            ..Default::default()
        };
        Ok(SurfaceMesh {
            dimension,
            vertex_per_facet: 0,
            registry,
            ids,
            _phantom: PhantomData,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn num_vertices(&self) -> usize {
        self.registry.counts().vertices
    }

    pub fn num_facets(&self) -> usize {
        self.registry.counts().facets
    }

    pub fn num_corners(&self) -> usize {
        self.registry.counts().corners
    }

    /// Number of edges. Zero unless the edges are initialized.
    pub fn num_edges(&self) -> usize {
        self.registry.counts().edges
    }

    /// Number of corners of every facet of a regular mesh. Zero for hybrid
    /// meshes, and for meshes without facets.
    pub fn vertex_per_facet(&self) -> usize {
        self.vertex_per_facet
    }

    pub fn is_hybrid(&self) -> bool {
        self.ids.facet_to_first_corner != INVALID_ATTRIBUTE_ID
    }

    pub fn is_regular(&self) -> bool {
        !self.is_hybrid()
    }

    pub fn is_triangle_mesh(&self) -> bool {
        self.vertex_per_facet == 3
    }

    pub fn is_quad_mesh(&self) -> bool {
        self.vertex_per_facet == 4
    }

    /// All attributes of the mesh, including the reserved ones.
    pub fn attributes(&self) -> &AttributeRegistry {
        &self.registry
    }

    pub(crate) fn registry_mut(&mut self) -> &mut AttributeRegistry {
        &mut self.registry
    }

    pub fn position_id(&self) -> AttributeId {
        self.ids.vertex_to_position
    }

    pub fn corner_to_vertex_id(&self) -> AttributeId {
        self.ids.corner_to_vertex
    }

    // Vertices.

    pub fn positions(&self) -> Result<&Attribute<S>> {
        self.registry.get(self.ids.vertex_to_position)
    }

    /// Write access to the positions. Copies them if they are shared with
    /// another mesh.
    pub fn positions_mut(&mut self) -> Result<&mut Attribute<S>> {
        self.registry.get_mut(self.ids.vertex_to_position)
    }

    pub fn position(&self, v: Index) -> Result<&[S]> {
        let len = self.num_vertices();
        self.positions()?
            .get_row(v as usize)
            .ok_or(Error::IndexOutOfRange {
                index: v as usize,
                len,
            })
    }

    pub fn position_mut(&mut self, v: Index) -> Result<&mut [S]> {
        self.positions_mut()?.ref_row(v as usize)
    }

    /// Add a vertex and return its index.
    pub fn add_vertex(&mut self, coords: &[S]) -> Result<Index> {
        let v = self.num_vertices() as Index;
        self.add_vertices(1, coords)?;
        Ok(v)
    }

    /// Add `num` vertices. `coords` holds `dimension` coordinates per vertex,
    /// or is empty, in which case the new vertices are at the origin.
    pub fn add_vertices(&mut self, num: usize, coords: &[S]) -> Result<()> {
        if !coords.is_empty() && coords.len() != num * self.dimension {
            return Err(Error::MismatchedArrayLengths(
                coords.len(),
                num * self.dimension,
            ));
        }
        let old = self.num_vertices();
        self.resize_vertices(old + num)?;
        if !coords.is_empty() {
            let dim = self.dimension;
            self.positions_mut()?.ref_all()?[(old * dim)..].copy_from_slice(coords);
        }
        Ok(())
    }

    /// Add `num` vertices, calling `f` with the index and the coordinates of
    /// each new vertex to fill them in.
    pub fn add_vertices_with<F>(&mut self, num: usize, mut f: F) -> Result<()>
    where
        F: FnMut(Index, &mut [S]),
    {
        let old = self.num_vertices();
        self.resize_vertices(old + num)?;
        let dim = self.dimension;
        for (i, row) in self.positions_mut()?.ref_all()?[(old * dim)..]
            .chunks_exact_mut(dim)
            .enumerate()
        {
            f((old + i) as Index, row);
        }
        Ok(())
    }

    fn resize_vertices(&mut self, num: usize) -> Result<()> {
        self.registry.resize_elements(AttributeElement::Vertex, num)?;
        self.clear_edges()
    }

    // Facets.

    pub(crate) fn facet_layout(&self) -> Result<FacetLayout<'_>> {
        if self.is_hybrid() {
            Ok(FacetLayout::Hybrid {
                first_corner: self
                    .registry
                    .get::<Index>(self.ids.facet_to_first_corner)?
                    .get_all(),
                corner_to_facet: self
                    .registry
                    .get::<Index>(self.ids.corner_to_facet)?
                    .get_all(),
                num_corners: self.num_corners(),
            })
        } else {
            Ok(FacetLayout::Regular {
                size: self.vertex_per_facet,
                num_facets: self.num_facets(),
            })
        }
    }

    /// The vertex of every corner.
    pub fn corner_to_vertex(&self) -> Result<&[Index]> {
        Ok(self
            .registry
            .get::<Index>(self.ids.corner_to_vertex)?
            .get_all())
    }

    fn check_facet(&self, f: Index) -> Result<()> {
        if f as usize >= self.num_facets() {
            return Err(Error::IndexOutOfRange {
                index: f as usize,
                len: self.num_facets(),
            });
        }
        Ok(())
    }

    fn check_corner(&self, c: Index) -> Result<()> {
        if c as usize >= self.num_corners() {
            return Err(Error::IndexOutOfRange {
                index: c as usize,
                len: self.num_corners(),
            });
        }
        Ok(())
    }

    pub fn facet_corner_begin(&self, f: Index) -> Result<Index> {
        self.check_facet(f)?;
        Ok(self.facet_layout()?.begin(f))
    }

    pub fn facet_corner_end(&self, f: Index) -> Result<Index> {
        self.check_facet(f)?;
        Ok(self.facet_layout()?.end(f))
    }

    pub fn facet_corners(&self, f: Index) -> Result<Range<Index>> {
        self.check_facet(f)?;
        let layout = self.facet_layout()?;
        Ok(layout.begin(f)..layout.end(f))
    }

    pub fn facet_size(&self, f: Index) -> Result<usize> {
        let corners = self.facet_corners(f)?;
        Ok((corners.end - corners.start) as usize)
    }

    pub fn corner_vertex(&self, c: Index) -> Result<Index> {
        self.check_corner(c)?;
        Ok(self.corner_to_vertex()?[c as usize])
    }

    pub fn corner_facet(&self, c: Index) -> Result<Index> {
        self.check_corner(c)?;
        Ok(self.facet_layout()?.facet_of(c))
    }

    pub fn facet_vertices(&self, f: Index) -> Result<&[Index]> {
        let corners = self.facet_corners(f)?;
        Ok(&self.corner_to_vertex()?[(corners.start as usize)..(corners.end as usize)])
    }

    /// Write access to the vertices of a facet. This drops the edges, as
    /// they may no longer match the facets.
    pub fn facet_vertices_mut(&mut self, f: Index) -> Result<&mut [Index]> {
        let corners = self.facet_corners(f)?;
        self.clear_edges()?;
        let c2v = self.ids.corner_to_vertex;
        let len = self.num_corners();
        self.registry
            .get_mut::<Index>(c2v)?
            .ref_all()?
            .get_mut((corners.start as usize)..(corners.end as usize))
            .ok_or(Error::IndexOutOfRange {
                index: corners.end as usize,
                len,
            })
    }

    /// Iterate the vertices of each facet.
    pub fn facets(&self) -> Result<impl Iterator<Item = &[Index]> + use<'_, S>> {
        let layout = self.facet_layout()?;
        let c2v = self.corner_to_vertex()?;
        Ok((0..self.num_facets() as Index)
            .map(move |f| &c2v[(layout.begin(f) as usize)..(layout.end(f) as usize)]))
    }

    pub fn add_triangle(&mut self, v0: Index, v1: Index, v2: Index) -> Result<Index> {
        self.add_polygon(&[v0, v1, v2])
    }

    pub fn add_quad(&mut self, v0: Index, v1: Index, v2: Index, v3: Index) -> Result<Index> {
        self.add_polygon(&[v0, v1, v2, v3])
    }

    /// Add a facet and return its index.
    pub fn add_polygon(&mut self, vertices: &[Index]) -> Result<Index> {
        self.add_facets(
            FacetSizes::Uniform {
                num_facets: 1,
                size: vertices.len(),
            },
            vertices,
        )
    }

    /// Add `indices.len() / 3` triangles, and return the index of the first
    /// one.
    pub fn add_triangles(&mut self, indices: &[Index]) -> Result<Index> {
        self.add_polygons(3, indices)
    }

    pub fn add_quads(&mut self, indices: &[Index]) -> Result<Index> {
        self.add_polygons(4, indices)
    }

    /// Add facets of `size` corners each.
    pub fn add_polygons(&mut self, size: usize, indices: &[Index]) -> Result<Index> {
        if size == 0 || indices.len() % size != 0 {
            return Err(Error::InvalidFacetSize(size));
        }
        self.add_facets(
            FacetSizes::Uniform {
                num_facets: indices.len() / size,
                size,
            },
            indices,
        )
    }

    /// Add facets of varying sizes. The vertices of all facets are
    /// concatenated in `indices`.
    pub fn add_hybrid(&mut self, sizes: &[usize], indices: &[Index]) -> Result<Index> {
        self.add_facets(FacetSizes::Varying(sizes), indices)
    }

    fn add_facets(&mut self, sizes: FacetSizes, indices: &[Index]) -> Result<Index> {
        sizes.check()?;
        let num_new_corners = sizes.num_corners();
        if indices.len() != num_new_corners {
            return Err(Error::MismatchedArrayLengths(indices.len(), num_new_corners));
        }
        let nv = self.num_vertices();
        if let Some(&v) = indices.iter().find(|v| **v as usize >= nv) {
            return Err(Error::IndexOutOfRange {
                index: v as usize,
                len: nv,
            });
        }
        let old_facets = self.num_facets();
        let old_corners = self.num_corners();
        let first_facet = old_facets as Index;
        let num_new_facets = sizes.num_facets();
        if num_new_facets == 0 {
            return Ok(first_facet);
        }
        // Stay regular only if every facet has the same size.
        let regular_size = match (self.is_hybrid(), sizes.uniform_size()) {
            (false, Some(size)) if old_facets == 0 || size == self.vertex_per_facet => Some(size),
            _ => None,
        };
        if regular_size.is_none() && !self.is_hybrid() {
            self.make_hybrid()?;
        }
        self.registry
            .resize_elements(AttributeElement::Corner, old_corners + num_new_corners)?;
        if let Err(e) = self
            .registry
            .resize_elements(AttributeElement::Facet, old_facets + num_new_facets)
        {
            self.registry
                .resize_elements(AttributeElement::Corner, old_corners)?;
            return Err(e);
        }
        self.clear_edges()?;
        self.registry
            .get_mut::<Index>(self.ids.corner_to_vertex)?
            .ref_all()?[old_corners..]
            .copy_from_slice(indices);
        match regular_size {
            Some(size) => self.vertex_per_facet = size,
            None => {
                let mut first = Vec::with_capacity(num_new_facets);
                let mut c2f = Vec::with_capacity(num_new_corners);
                let mut c = old_corners;
                for i in 0..num_new_facets {
                    let size = match &sizes {
                        FacetSizes::Uniform { size, .. } => *size,
                        FacetSizes::Varying(sizes) => sizes[i],
                    };
                    first.push(c as Index);
                    c2f.extend(std::iter::repeat_n((old_facets + i) as Index, size));
                    c += size;
                }
                self.registry
                    .get_mut::<Index>(self.ids.facet_to_first_corner)?
                    .ref_all()?[old_facets..]
                    .copy_from_slice(&first);
                self.registry
                    .get_mut::<Index>(self.ids.corner_to_facet)?
                    .ref_all()?[old_corners..]
                    .copy_from_slice(&c2f);
            }
        }
        Ok(first_facet)
    }

    /// Store the first corner of every facet explicitly, so facets of any
    /// size can be added.
    fn make_hybrid(&mut self) -> Result<()> {
        log::debug!(
            "Converting a mesh with {} facets of size {} to hybrid storage",
            self.num_facets(),
            self.vertex_per_facet
        );
        let size = self.vertex_per_facet as Index;
        let first: Vec<Index> = (0..self.num_facets() as Index).map(|f| f * size).collect();
        let c2f: Vec<Index> = (0..self.num_corners() as Index)
            .map(|c| if size == 0 { 0 } else { c / size })
            .collect();
        let mut first_attr = Attribute::<Index>::new(
            AttributeElement::Facet,
            AttributeUsage::CornerIndex,
            1,
        )?;
        first_attr.insert_rows(&first)?;
        let mut c2f_attr = Attribute::<Index>::new(
            AttributeElement::Corner,
            AttributeUsage::FacetIndex,
            1,
        )?;
        c2f_attr.insert_rows(&c2f)?;
        self.ids.facet_to_first_corner = self.registry.insert_attribute(
            names::FACET_TO_FIRST_CORNER,
            Box::new(first_attr),
            CreatePolicy::Force,
        )?;
        self.ids.corner_to_facet = self.registry.insert_attribute(
            names::CORNER_TO_FACET,
            Box::new(c2f_attr),
            CreatePolicy::Force,
        )?;
        self.vertex_per_facet = 0;
        Ok(())
    }

    /// Switch a hybrid mesh back to regular storage if all its facets have
    /// the same size. Returns whether the mesh is regular afterwards.
    pub fn compress_if_regular(&mut self) -> Result<bool> {
        if !self.is_hybrid() {
            return Ok(true);
        }
        let layout = self.facet_layout()?;
        let mut sizes = (0..self.num_facets() as Index).map(|f| layout.end(f) - layout.begin(f));
        let size = match sizes.next() {
            Some(first) if sizes.all(|s| s == first) => first as usize,
            Some(_) => return Ok(false),
            None => 0,
        };
        log::debug!("Compressing hybrid mesh with facets of size {size}");
        self.registry
            .delete(self.ids.facet_to_first_corner, DeletePolicy::Force)?;
        self.registry
            .delete(self.ids.corner_to_facet, DeletePolicy::Force)?;
        self.ids.facet_to_first_corner = INVALID_ATTRIBUTE_ID;
        self.ids.corner_to_facet = INVALID_ATTRIBUTE_ID;
        self.vertex_per_facet = size;
        Ok(true)
    }

    /// Remove all facets, keeping the vertices.
    pub fn clear_facets(&mut self) -> Result<()> {
        self.clear_edges()?;
        self.registry.resize_elements(AttributeElement::Facet, 0)?;
        self.registry.resize_elements(AttributeElement::Corner, 0)?;
        self.compress_if_regular()?;
        self.vertex_per_facet = 0;
        Ok(())
    }

    /// Remove everything.
    pub fn clear_vertices(&mut self) -> Result<()> {
        self.clear_facets()?;
        self.registry.resize_elements(AttributeElement::Vertex, 0)
    }

    /// Remove the given facets. `facets` must be sorted.
    pub fn remove_facets(&mut self, facets: &[Index]) -> Result<()> {
        let mask = sorted_to_mask(facets, self.num_facets())?;
        self.remove_facets_if(|f| mask[f as usize])
    }

    /// Remove the facets for which `pred` returns true. Facet and corner
    /// attributes are compacted, and attributes holding facet or corner
    /// indices are updated.
    pub fn remove_facets_if<F>(&mut self, mut pred: F) -> Result<()>
    where
        F: FnMut(Index) -> bool,
    {
        let new_to_old: Vec<Index> = (0..self.num_facets() as Index)
            .filter(|f| !pred(*f))
            .collect();
        if new_to_old.len() == self.num_facets() {
            return Ok(());
        }
        self.reindex_facets(&new_to_old)
    }

    /// Rebuild the facets so that new facet `i` is old facet
    /// `new_to_old[i]`. Old facets that are not listed are removed. The
    /// corners follow their facets.
    pub(crate) fn reindex_facets(&mut self, new_to_old: &[Index]) -> Result<()> {
        let nf = self.num_facets();
        let mut facet_old_to_new = vec![INVALID_INDEX; nf];
        for (new, old) in new_to_old.iter().enumerate() {
            match facet_old_to_new.get_mut(*old as usize) {
                Some(slot) if *slot == INVALID_INDEX => *slot = new as Index,
                Some(_) => {
                    return Err(Error::NonInjectiveMapping {
                        target: *old as usize,
                        count: 2,
                    });
                }
                None => {
                    return Err(Error::IndexOutOfRange {
                        index: *old as usize,
                        len: nf,
                    });
                }
            }
        }
        let (corner_new_to_old, corner_old_to_new, ranges) = {
            let layout = self.facet_layout()?;
            let mut new_to_old_c = Vec::with_capacity(self.num_corners());
            let mut ranges = Vec::with_capacity(new_to_old.len());
            for f in new_to_old {
                let begin = new_to_old_c.len();
                new_to_old_c.extend(layout.begin(*f)..layout.end(*f));
                ranges.push(begin..new_to_old_c.len());
            }
            let mut old_to_new_c = vec![INVALID_INDEX; self.num_corners()];
            for (new, old) in new_to_old_c.iter().enumerate() {
                old_to_new_c[*old as usize] = new as Index;
            }
            (new_to_old_c, old_to_new_c, ranges)
        };
        let edges = if self.has_edges() {
            let c2v = self.corner_to_vertex()?;
            let new_c2v: Vec<Index> = corner_new_to_old
                .iter()
                .map(|c| c2v[*c as usize])
                .collect();
            Some(self.rebuild_edges(
                self.num_vertices(),
                &new_c2v,
                ranges.into_iter(),
                Some(&corner_new_to_old),
                MappingPolicy::KeepFirst,
                MappingPolicy::Average,
            )?)
        } else {
            None
        };
        let with_edges = edges.is_some();
        self.registry
            .prepare_write(ElementMask::ALL, |attr| facet_edit_rows(attr, with_edges))?;
        // Nothing below can fail.
        self.drop_connectivity()?;
        let conn = match edges {
            Some(edges) => Some(self.commit_edge_attributes(edges)?),
            None => None,
        };
        self.registry
            .for_each_mut(ElementMask::ALL, |_, _, attr| match attr.usage() {
                AttributeUsage::FacetIndex => attr.remap_index_values(&facet_old_to_new),
                AttributeUsage::CornerIndex => attr.remap_index_values(&corner_old_to_new),
                _ => Ok(()),
            })?;
        self.registry
            .for_each_mut(AttributeElement::Facet, |_, _, attr| {
                attr.gather_rows(new_to_old)
            })?;
        self.registry.for_each_mut(
            AttributeElement::Corner | AttributeElement::Indexed,
            |_, _, attr| attr.gather_rows(&corner_new_to_old),
        )?;
        self.registry
            .resize_elements(AttributeElement::Facet, new_to_old.len())?;
        self.registry
            .resize_elements(AttributeElement::Corner, corner_new_to_old.len())?;
        if new_to_old.is_empty() {
            self.clear_facets()?;
        }
        if let Some(conn) = conn {
            self.store_connectivity(conn)?;
        }
        Ok(())
    }

    /// Remove the given vertices, and every facet using them. `vertices` must
    /// be sorted.
    pub fn remove_vertices(&mut self, vertices: &[Index]) -> Result<()> {
        let mask = sorted_to_mask(vertices, self.num_vertices())?;
        self.remove_vertices_if(|v| mask[v as usize])
    }

    /// Remove the vertices for which `pred` returns true, and every facet
    /// using them.
    pub fn remove_vertices_if<F>(&mut self, mut pred: F) -> Result<()>
    where
        F: FnMut(Index) -> bool,
    {
        let removed: Vec<bool> = (0..self.num_vertices() as Index).map(&mut pred).collect();
        if !removed.iter().any(|r| *r) {
            return Ok(());
        }
        let kept_facets: Vec<Index> = self
            .facets()?
            .enumerate()
            .filter(|(_, verts)| {
                !verts
                    .iter()
                    .any(|v| removed.get(*v as usize).copied().unwrap_or(true))
            })
            .map(|(f, _)| f as Index)
            .collect();
        let new_to_old: Vec<Index> = (0..self.num_vertices() as Index)
            .filter(|v| !removed[*v as usize])
            .collect();
        // Both steps must be able to write before the first one starts.
        let with_edges = self.has_edges();
        self.registry.prepare_write(ElementMask::ALL, |attr| {
            facet_edit_rows(attr, with_edges).or_else(|| vertex_edit_rows(attr, with_edges))
        })?;
        if kept_facets.len() != self.num_facets() {
            self.reindex_facets(&kept_facets)?;
        }
        self.reindex_vertices(&new_to_old)
    }

    /// Rebuild the vertices so that new vertex `i` is old vertex
    /// `new_to_old[i]`. Facets must not use vertices that are not listed.
    pub(crate) fn reindex_vertices(&mut self, new_to_old: &[Index]) -> Result<()> {
        let nv = self.num_vertices();
        let mut old_to_new = vec![INVALID_INDEX; nv];
        for (new, old) in new_to_old.iter().enumerate() {
            match old_to_new.get_mut(*old as usize) {
                Some(slot) if *slot == INVALID_INDEX => *slot = new as Index,
                Some(_) => {
                    return Err(Error::NonInjectiveMapping {
                        target: *old as usize,
                        count: 2,
                    });
                }
                None => {
                    return Err(Error::IndexOutOfRange {
                        index: *old as usize,
                        len: nv,
                    });
                }
            }
        }
        if let Some(v) = self
            .corner_to_vertex()?
            .iter()
            .find(|v| old_to_new[**v as usize] == INVALID_INDEX)
        {
            return Err(Error::InvalidMapping(format!(
                "vertex {v} is used by a facet but is not kept"
            )));
        }
        let edges = if self.has_edges() {
            let c2v: Vec<Index> = self
                .corner_to_vertex()?
                .iter()
                .map(|v| old_to_new[*v as usize])
                .collect();
            let layout = self.facet_layout()?;
            Some(self.rebuild_edges(
                new_to_old.len(),
                &c2v,
                layout.ranges(),
                None,
                MappingPolicy::KeepFirst,
                MappingPolicy::Average,
            )?)
        } else {
            None
        };
        let with_edges = edges.is_some();
        self.registry
            .prepare_write(ElementMask::ALL, |attr| vertex_edit_rows(attr, with_edges))?;
        // Nothing below can fail.
        self.drop_connectivity()?;
        let conn = match edges {
            Some(edges) => Some(self.commit_edge_attributes(edges)?),
            None => None,
        };
        self.registry
            .for_each_mut(ElementMask::ALL, |_, _, attr| match attr.usage() {
                AttributeUsage::VertexIndex => attr.remap_index_values(&old_to_new),
                _ => Ok(()),
            })?;
        self.registry
            .for_each_mut(AttributeElement::Vertex, |_, _, attr| {
                attr.gather_rows(new_to_old)
            })?;
        self.registry
            .resize_elements(AttributeElement::Vertex, new_to_old.len())?;
        if let Some(conn) = conn {
            self.store_connectivity(conn)?;
        }
        Ok(())
    }

    /// Release unused memory held by the attributes.
    pub fn shrink_to_fit(&mut self) -> Result<()> {
        self.registry.shrink_to_fit()
    }

    // Edges.

    pub fn has_edges(&self) -> bool {
        self.ids.corner_to_edge != INVALID_ATTRIBUTE_ID
    }

    /// Build the edges, and the corner chains around vertices and edges.
    pub fn initialize_edges(&mut self) -> Result<()> {
        self.initialize_edges_with(&[])
    }

    /// Same as [`SurfaceMesh::initialize_edges`], but the listed edges get
    /// the first ids, in the given order.
    pub fn initialize_edges_with(&mut self, edges: &[[Index; 2]]) -> Result<()> {
        if self.has_edges() && edges.is_empty() {
            return Ok(());
        }
        let conn = {
            let layout = self.facet_layout()?;
            ConnectivityBuilder::new(self.num_vertices(), self.corner_to_vertex()?)
                .with_edge_order(edges)
                .build(layout.ranges())?
        };
        self.clear_edges()?;
        self.registry
            .resize_elements(AttributeElement::Edge, conn.num_edges())?;
        self.store_connectivity(conn)
    }

    /// Insert the reserved connectivity attributes. The edge count must
    /// already match.
    pub(crate) fn store_connectivity(&mut self, conn: Connectivity) -> Result<()> {
        let Connectivity {
            corner_to_edge,
            edge_to_first_corner,
            next_corner_around_edge,
            vertex_to_first_corner,
            next_corner_around_vertex,
        } = conn;
        self.ids.corner_to_edge = self.insert_index_attribute(
            names::CORNER_TO_EDGE,
            AttributeElement::Corner,
            AttributeUsage::EdgeIndex,
            corner_to_edge,
        )?;
        self.ids.edge_to_first_corner = self.insert_index_attribute(
            names::EDGE_TO_FIRST_CORNER,
            AttributeElement::Edge,
            AttributeUsage::CornerIndex,
            edge_to_first_corner,
        )?;
        self.ids.next_corner_around_edge = self.insert_index_attribute(
            names::NEXT_CORNER_AROUND_EDGE,
            AttributeElement::Corner,
            AttributeUsage::CornerIndex,
            next_corner_around_edge,
        )?;
        self.ids.vertex_to_first_corner = self.insert_index_attribute(
            names::VERTEX_TO_FIRST_CORNER,
            AttributeElement::Vertex,
            AttributeUsage::CornerIndex,
            vertex_to_first_corner,
        )?;
        self.ids.next_corner_around_vertex = self.insert_index_attribute(
            names::NEXT_CORNER_AROUND_VERTEX,
            AttributeElement::Corner,
            AttributeUsage::CornerIndex,
            next_corner_around_vertex,
        )?;
        Ok(())
    }

    fn insert_index_attribute(
        &mut self,
        name: &str,
        element: AttributeElement,
        usage: AttributeUsage,
        values: Vec<Index>,
    ) -> Result<AttributeId> {
        let mut attr = Attribute::<Index>::new(element, usage, 1)?;
        attr.replace_values(values)?;
        self.registry
            .insert_attribute(name, Box::new(attr), CreatePolicy::Force)
    }

    /// Drop the edges and the corner chains. Edge attributes are emptied.
    pub fn clear_edges(&mut self) -> Result<()> {
        self.drop_connectivity()?;
        self.registry.resize_elements(AttributeElement::Edge, 0)
    }

    /// Delete the reserved connectivity attributes, leaving the edge count
    /// and the user edge attributes as they are.
    pub(crate) fn drop_connectivity(&mut self) -> Result<()> {
        for id in [
            &mut self.ids.corner_to_edge,
            &mut self.ids.edge_to_first_corner,
            &mut self.ids.next_corner_around_edge,
            &mut self.ids.vertex_to_first_corner,
            &mut self.ids.next_corner_around_vertex,
        ] {
            if *id != INVALID_ATTRIBUTE_ID {
                self.registry.delete(*id, DeletePolicy::Force)?;
                *id = INVALID_ATTRIBUTE_ID;
            }
        }
        Ok(())
    }

    /// Build the edges of the mesh as it will be after an edit, from its
    /// new corners. New corner `c` comes from old corner
    /// `corner_origin[c]`, or from old corner `c` without an origin map.
    /// Old edges keep their relative order. The user edge attributes are
    /// mapped onto the new edges, and old edges that collapse into one have
    /// their values combined following the policies.
    ///
    /// The mesh must have edges. Nothing is modified.
    pub(crate) fn rebuild_edges(
        &self,
        num_vertices: usize,
        corner_to_vertex: &[Index],
        facets: impl Iterator<Item = Range<usize>>,
        corner_origin: Option<&[Index]>,
        integral_policy: MappingPolicy,
        float_policy: MappingPolicy,
    ) -> Result<RebuiltEdges> {
        let mut conn = ConnectivityBuilder::new(num_vertices, corner_to_vertex).build(facets)?;
        let old_c2e = self.edge_index_slice(self.ids.corner_to_edge)?;
        let num_old = self.num_edges();
        let num_new = conn.num_edges();
        let mut first_old = vec![INVALID_INDEX; num_new];
        let mut old_to_new = vec![INVALID_INDEX; num_old];
        for (c, &e) in conn.corner_to_edge.iter().enumerate() {
            let origin = corner_origin.map_or(c as Index, |o| o[c]);
            let old = old_c2e
                .get(origin as usize)
                .copied()
                .ok_or(Error::IndexOutOfRange {
                    index: origin as usize,
                    len: old_c2e.len(),
                })?;
            old_to_new[old as usize] = e;
            first_old[e as usize] = first_old[e as usize].min(old);
        }
        let mut order: Vec<Index> = (0..num_new as Index).collect();
        order.sort_by_key(|e| first_old[*e as usize]);
        let mut rank = vec![INVALID_INDEX; num_new];
        for (r, e) in order.iter().enumerate() {
            rank[*e as usize] = r as Index;
        }
        conn.renumber_edges(&rank);
        for e in old_to_new.iter_mut().filter(|e| **e != INVALID_INDEX) {
            *e = rank[*e as usize];
        }
        let (offsets, data) = invert_mapping(&old_to_new, num_new, false)?;
        let options =
            MappingOptions::grouped(&offsets, &data).with_policies(integral_policy, float_policy);
        let mut attributes = Vec::new();
        let mut failure = None;
        self.registry
            .for_each(AttributeElement::Edge, |id, name, attr| {
                if failure.is_some() || is_reserved_name(name) {
                    return;
                }
                match map_base(attr, &options) {
                    Ok(attr) => attributes.push((id, attr)),
                    Err(e) => failure = Some(e),
                }
            });
        if let Some(e) = failure {
            return Err(e);
        }
        log::debug!(
            "Rebuilt {num_new} edges from {num_old}, carrying {} edge attributes",
            attributes.len()
        );
        Ok(RebuiltEdges {
            conn,
            old_to_new,
            attributes,
        })
    }

    /// Switch the user edge attributes over to edges built by
    /// [`SurfaceMesh::rebuild_edges`], and make edge indices stored in
    /// attributes follow their edges. The returned connectivity is stored
    /// with [`SurfaceMesh::store_connectivity`] once the vertices and facets
    /// are final.
    pub(crate) fn commit_edge_attributes(&mut self, edges: RebuiltEdges) -> Result<Connectivity> {
        let RebuiltEdges {
            conn,
            old_to_new,
            attributes,
        } = edges;
        self.drop_connectivity()?;
        self.registry
            .set_count(AttributeElement::Edge, conn.num_edges());
        for (id, attr) in attributes {
            self.registry.replace(id, attr)?;
        }
        self.registry
            .for_each_mut(ElementMask::ALL, |_, _, attr| match attr.usage() {
                AttributeUsage::EdgeIndex => attr.remap_index_values(&old_to_new),
                _ => Ok(()),
            })?;
        Ok(conn)
    }

    fn edge_index_slice(&self, id: AttributeId) -> Result<&[Index]> {
        if id == INVALID_ATTRIBUTE_ID {
            return Err(Error::MissingEdges);
        }
        Ok(self.registry.get::<Index>(id)?.get_all())
    }

    fn check_edge(&self, e: Index) -> Result<()> {
        if !self.has_edges() {
            return Err(Error::MissingEdges);
        }
        if e as usize >= self.num_edges() {
            return Err(Error::IndexOutOfRange {
                index: e as usize,
                len: self.num_edges(),
            });
        }
        Ok(())
    }

    fn check_vertex(&self, v: Index) -> Result<()> {
        if v as usize >= self.num_vertices() {
            return Err(Error::IndexOutOfRange {
                index: v as usize,
                len: self.num_vertices(),
            });
        }
        Ok(())
    }

    /// The edge of every corner.
    pub fn corner_to_edge(&self) -> Result<&[Index]> {
        self.edge_index_slice(self.ids.corner_to_edge)
    }

    pub(crate) fn next_corner_around_edge(&self) -> Result<&[Index]> {
        self.edge_index_slice(self.ids.next_corner_around_edge)
    }

    pub(crate) fn next_corner_around_vertex(&self) -> Result<&[Index]> {
        self.edge_index_slice(self.ids.next_corner_around_vertex)
    }

    /// The edge starting at corner `c`, going to the next corner of its
    /// facet.
    pub fn corner_edge(&self, c: Index) -> Result<Index> {
        self.check_corner(c)?;
        Ok(self.edge_index_slice(self.ids.corner_to_edge)?[c as usize])
    }

    /// The two vertices of an edge.
    pub fn edge_vertices(&self, e: Index) -> Result<[Index; 2]> {
        self.check_edge(e)?;
        let c = self.edge_index_slice(self.ids.edge_to_first_corner)?[e as usize];
        let layout = self.facet_layout()?;
        let c2v = self.corner_to_vertex()?;
        Ok([c2v[c as usize], c2v[layout.next(c) as usize]])
    }

    /// The edge between `v0` and `v1`, if there is one.
    pub fn find_edge_from_vertices(&self, v0: Index, v1: Index) -> Result<Option<Index>> {
        let layout = self.facet_layout()?;
        let c2v = self.corner_to_vertex()?;
        let c2e = self.edge_index_slice(self.ids.corner_to_edge)?;
        for c in self.corners_around_vertex(v0)? {
            let next = layout.next(c);
            if c2v[next as usize] == v1 {
                return Ok(Some(c2e[c as usize]));
            }
            let prev = layout.prev(c);
            if c2v[prev as usize] == v1 {
                return Ok(Some(c2e[prev as usize]));
            }
        }
        Ok(None)
    }

    /// Corners whose vertex is `v`, in corner order.
    pub fn corners_around_vertex(&self, v: Index) -> Result<CornerChainIter<'_>> {
        self.check_vertex(v)?;
        let first = self.edge_index_slice(self.ids.vertex_to_first_corner)?[v as usize];
        Ok(CornerChainIter::new(
            self.edge_index_slice(self.ids.next_corner_around_vertex)?,
            first,
        ))
    }

    /// Corners whose edge is `e`, in corner order.
    pub fn corners_around_edge(&self, e: Index) -> Result<CornerChainIter<'_>> {
        self.check_edge(e)?;
        let first = self.edge_index_slice(self.ids.edge_to_first_corner)?[e as usize];
        Ok(CornerChainIter::new(
            self.edge_index_slice(self.ids.next_corner_around_edge)?,
            first,
        ))
    }

    /// Facets using vertex `v`. A facet visiting `v` more than once is
    /// reported once per visit.
    pub fn facets_adjacent_to_vertex(
        &self,
        v: Index,
    ) -> Result<impl Iterator<Item = Index> + use<'_, S>> {
        let layout = self.facet_layout()?;
        Ok(self
            .corners_around_vertex(v)?
            .map(move |c| layout.facet_of(c)))
    }

    /// Facets using edge `e`, one per corner of the edge.
    pub fn edge_adjacent_facets(&self, e: Index) -> Result<impl Iterator<Item = Index> + use<'_, S>> {
        let layout = self.facet_layout()?;
        Ok(self.corners_around_edge(e)?.map(move |c| layout.facet_of(c)))
    }

    /// Edges incident to vertex `v`. Every corner of `v` contributes the
    /// edge leaving it and the edge arriving at it, so interior edges are
    /// reported twice.
    pub fn edges_around_vertex_with_duplicates(
        &self,
        v: Index,
    ) -> Result<impl Iterator<Item = Index> + use<'_, S>> {
        let layout = self.facet_layout()?;
        let c2e = self.edge_index_slice(self.ids.corner_to_edge)?;
        Ok(self
            .corners_around_vertex(v)?
            .flat_map(move |c| [c2e[c as usize], c2e[layout.prev(c) as usize]]))
    }

    /// The corners of facet `f` starting from corner `c`.
    pub fn corners_of_facet_from(&self, f: Index, c: Index) -> Result<impl Iterator<Item = Index>> {
        let corners = self.facet_corners(f)?;
        if !corners.contains(&c) {
            return Err(Error::IndexOutOfRange {
                index: c as usize,
                len: corners.end as usize,
            });
        }
        Ok(FacetCornerIter::new(corners.start, corners.end, c))
    }

    pub fn count_num_corners_around_vertex(&self, v: Index) -> Result<usize> {
        Ok(self.corners_around_vertex(v)?.count())
    }

    pub fn count_num_corners_around_edge(&self, e: Index) -> Result<usize> {
        Ok(self.corners_around_edge(e)?.count())
    }

    /// An edge used by exactly one facet corner.
    pub fn is_boundary_edge(&self, e: Index) -> Result<bool> {
        Ok(self.count_num_corners_around_edge(e)? == 1)
    }

    /// Whether every edge is used by at most two corners, and no facet uses
    /// the same vertex twice.
    pub fn is_manifold(&self) -> Result<bool> {
        if !self.has_edges() {
            return Err(Error::MissingEdges);
        }
        for e in 0..self.num_edges() as Index {
            if self.count_num_corners_around_edge(e)? > 2 {
                return Ok(false);
            }
        }
        let mut seen: Vec<Index> = Vec::new();
        for verts in self.facets()? {
            seen.clear();
            seen.extend_from_slice(verts);
            seen.sort_unstable();
            if seen.windows(2).any(|w| w[0] == w[1]) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    // Attributes.

    pub fn has_attribute(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    pub fn attribute_id(&self, name: &str) -> Result<AttributeId> {
        self.registry.id(name)
    }

    pub fn attribute_name(&self, id: AttributeId) -> Result<&str> {
        self.registry.name(id)
    }

    fn ensure_element(&mut self, element: AttributeElement) -> Result<()> {
        if element == AttributeElement::Edge && !self.has_edges() {
            self.initialize_edges()?;
        }
        Ok(())
    }

    /// Create an attribute. Edge attributes initialize the edges if needed.
    pub fn create_attribute<T>(
        &mut self,
        name: &str,
        element: AttributeElement,
        usage: AttributeUsage,
        num_channels: usize,
    ) -> Result<AttributeId>
    where
        T: AttributeValue,
    {
        self.registry.check_new_name(name, CreatePolicy::ErrorIfReserved)?;
        self.ensure_element(element)?;
        self.registry.create::<T>(
            name,
            element,
            usage,
            num_channels,
            CreatePolicy::ErrorIfReserved,
        )
    }

    pub fn find_or_create_attribute<T>(
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
        if !self.has_attribute(name) {
            self.ensure_element(element)?;
        }
        self.registry
            .find_or_create::<T>(name, element, usage, num_channels, reset)
    }

    /// Share an attribute of another mesh with matching element counts.
    pub fn create_attribute_from(
        &mut self,
        name: &str,
        other: &SurfaceMesh<S>,
        other_name: &str,
    ) -> Result<AttributeId> {
        self.registry
            .create_from(name, &other.registry, other_name, CreatePolicy::ErrorIfReserved)
    }

    pub fn attribute<T>(&self, name: &str) -> Result<&Attribute<T>>
    where
        T: AttributeValue,
    {
        self.registry.get_by_name(name)
    }

    pub fn attribute_by_id<T>(&self, id: AttributeId) -> Result<&Attribute<T>>
    where
        T: AttributeValue,
    {
        self.registry.get(id)
    }

    /// Write access to a non reserved attribute.
    pub fn attribute_mut<T>(&mut self, name: &str) -> Result<&mut Attribute<T>>
    where
        T: AttributeValue,
    {
        self.check_not_managed(name)?;
        self.registry.get_mut_by_name(name)
    }

    pub fn attribute_by_id_mut<T>(&mut self, id: AttributeId) -> Result<&mut Attribute<T>>
    where
        T: AttributeValue,
    {
        self.check_not_managed(self.registry.name(id)?)?;
        self.registry.get_mut(id)
    }

    pub fn indexed_attribute<T>(&self, name: &str) -> Result<&IndexedAttribute<T>>
    where
        T: AttributeValue,
    {
        self.registry.get_indexed(self.registry.id(name)?)
    }

    pub fn indexed_attribute_mut<T>(&mut self, name: &str) -> Result<&mut IndexedAttribute<T>>
    where
        T: AttributeValue,
    {
        let id = self.registry.id(name)?;
        self.registry.get_indexed_mut(id)
    }

    fn check_not_managed(&self, name: &str) -> Result<()> {
        if name != names::VERTEX_TO_POSITION && names::MANAGED.contains(&name) {
            return Err(Error::ReservedName(name.to_string()));
        }
        Ok(())
    }

    /// Delete an attribute. Reserved names require [`DeletePolicy::Force`],
    /// and the attributes managed by the mesh can never be deleted.
    pub fn delete_attribute(&mut self, name: &str, policy: DeletePolicy) -> Result<()> {
        if names::MANAGED.contains(&name) {
            return Err(Error::ReservedName(name.to_string()));
        }
        self.registry.delete_by_name(name, policy)
    }

    /// Delete an attribute and hand its values over to the caller.
    pub fn delete_and_export_attribute<T>(
        &mut self,
        name: &str,
        delete_policy: DeletePolicy,
        export_policy: ExportPolicy,
    ) -> Result<ExportedBuffer<T>>
    where
        T: AttributeValue,
    {
        if names::MANAGED.contains(&name) {
            return Err(Error::ReservedName(name.to_string()));
        }
        self.registry
            .delete_and_export(name, delete_policy, export_policy)
    }

    pub fn rename_attribute(&mut self, old_name: &str, new_name: &str) -> Result<()> {
        self.registry
            .rename(old_name, new_name, CreatePolicy::ErrorIfReserved)
    }

    /// Copy an attribute under a new name. The copy shares storage with the
    /// original until either is written to.
    pub fn duplicate_attribute(&mut self, old_name: &str, new_name: &str) -> Result<AttributeId> {
        self.registry.duplicate(old_name, new_name)
    }

    /// Visit the attributes whose element type is in `mask`, in name order.
    pub fn for_each_attribute<F>(&self, mask: impl Into<ElementMask>, f: F)
    where
        F: FnMut(AttributeId, &str, &dyn AttributeBase),
    {
        self.registry.for_each(mask, f)
    }

    // Wrapping external buffers.

    /// Use caller owned memory for the vertex positions, without copying.
    /// The memory holds `capacity` coordinates, of which the first
    /// `num_vertices * dimension` are in use. The vertex count of the mesh
    /// becomes `num_vertices`.
    ///
    /// # Safety
    ///
    /// Same contract as [`Attribute::wrap`].
    pub unsafe fn wrap_as_vertices(
        &mut self,
        ptr: *mut S,
        capacity: usize,
        num_vertices: usize,
    ) -> Result<()> {
        self.check_vertex_count(num_vertices)?;
        let mut attr = Attribute::<S>::new(
            AttributeElement::Vertex,
            AttributeUsage::Position,
            self.dimension,
        )?;
        unsafe { attr.wrap(ptr, capacity, num_vertices)? };
        self.replace_positions(attr, num_vertices)
    }

    /// Use shared read-only memory for the vertex positions.
    pub fn wrap_as_const_vertices(&mut self, data: Arc<[S]>, num_vertices: usize) -> Result<()> {
        self.check_vertex_count(num_vertices)?;
        let mut attr = Attribute::<S>::new(
            AttributeElement::Vertex,
            AttributeUsage::Position,
            self.dimension,
        )?;
        attr.wrap_const(data, num_vertices)?;
        self.replace_positions(attr, num_vertices)
    }

    fn replace_positions(&mut self, positions: Attribute<S>, num_vertices: usize) -> Result<()> {
        self.registry.resize_and_replace(
            AttributeElement::Vertex,
            num_vertices,
            self.ids.vertex_to_position,
            Box::new(positions),
        )?;
        self.clear_edges()
    }

    fn check_vertex_count(&self, num_vertices: usize) -> Result<()> {
        match self
            .corner_to_vertex()?
            .iter()
            .find(|v| **v as usize >= num_vertices)
        {
            Some(v) => Err(Error::IndexOutOfRange {
                index: *v as usize,
                len: num_vertices,
            }),
            None => Ok(()),
        }
    }

    /// Use caller owned memory for the facets of a regular mesh, without
    /// copying. Existing facets are replaced by `num_facets` facets of
    /// `vertex_per_facet` corners.
    ///
    /// # Safety
    ///
    /// Same contract as [`Attribute::wrap`].
    pub unsafe fn wrap_as_facets(
        &mut self,
        ptr: *mut Index,
        capacity: usize,
        num_facets: usize,
        vertex_per_facet: usize,
    ) -> Result<()> {
        let mut attr = Attribute::<Index>::new(
            AttributeElement::Corner,
            AttributeUsage::VertexIndex,
            1,
        )?;
        unsafe { attr.wrap(ptr, capacity, num_facets * vertex_per_facet)? };
        self.replace_facets(attr, num_facets, vertex_per_facet)
    }

    /// Use shared read-only memory for the facets of a regular mesh.
    pub fn wrap_as_const_facets(
        &mut self,
        data: Arc<[Index]>,
        num_facets: usize,
        vertex_per_facet: usize,
    ) -> Result<()> {
        let mut attr = Attribute::<Index>::new(
            AttributeElement::Corner,
            AttributeUsage::VertexIndex,
            1,
        )?;
        attr.wrap_const(data, num_facets * vertex_per_facet)?;
        self.replace_facets(attr, num_facets, vertex_per_facet)
    }

    fn replace_facets(
        &mut self,
        corner_to_vertex: Attribute<Index>,
        num_facets: usize,
        vertex_per_facet: usize,
    ) -> Result<()> {
        if num_facets > 0 && vertex_per_facet < 3 {
            return Err(Error::InvalidFacetSize(vertex_per_facet));
        }
        let nv = self.num_vertices();
        if let Some(v) = corner_to_vertex
            .get_all()
            .iter()
            .find(|v| **v as usize >= nv)
        {
            return Err(Error::IndexOutOfRange {
                index: *v as usize,
                len: nv,
            });
        }
        self.clear_facets()?;
        self.registry
            .resize_elements(AttributeElement::Corner, num_facets * vertex_per_facet)?;
        self.registry
            .resize_elements(AttributeElement::Facet, num_facets)?;
        self.registry
            .replace(self.ids.corner_to_vertex, Box::new(corner_to_vertex))?;
        self.vertex_per_facet = if num_facets > 0 { vertex_per_facet } else { 0 };
        Ok(())
    }

    /// Create an attribute backed by caller owned memory. The number of rows
    /// is the number of elements of the given type, or, for value
    /// attributes, as many rows as fit in `capacity`.
    ///
    /// # Safety
    ///
    /// Same contract as [`Attribute::wrap`].
    pub unsafe fn wrap_as_attribute<T>(
        &mut self,
        name: &str,
        element: AttributeElement,
        usage: AttributeUsage,
        num_channels: usize,
        ptr: *mut T,
        capacity: usize,
    ) -> Result<AttributeId>
    where
        T: AttributeValue,
    {
        self.registry.check_new_name(name, CreatePolicy::ErrorIfReserved)?;
        self.ensure_element(element)?;
        let rows = self.wrapped_rows(element, num_channels, capacity)?;
        let mut attr = Attribute::<T>::new(element, usage, num_channels)?;
        unsafe { attr.wrap(ptr, capacity, rows)? };
        self.registry
            .insert_attribute(name, Box::new(attr), CreatePolicy::ErrorIfReserved)
    }

    /// Create an attribute backed by shared read-only memory.
    pub fn wrap_as_const_attribute<T>(
        &mut self,
        name: &str,
        element: AttributeElement,
        usage: AttributeUsage,
        num_channels: usize,
        data: Arc<[T]>,
    ) -> Result<AttributeId>
    where
        T: AttributeValue,
    {
        self.registry.check_new_name(name, CreatePolicy::ErrorIfReserved)?;
        self.ensure_element(element)?;
        let rows = self.wrapped_rows(element, num_channels, data.len())?;
        let mut attr = Attribute::<T>::new(element, usage, num_channels)?;
        attr.wrap_const(data, rows)?;
        self.registry
            .insert_attribute(name, Box::new(attr), CreatePolicy::ErrorIfReserved)
    }

    fn wrapped_rows(
        &self,
        element: AttributeElement,
        num_channels: usize,
        capacity: usize,
    ) -> Result<usize> {
        match element {
            AttributeElement::Indexed => Err(Error::UnsupportedElement(element)),
            AttributeElement::Value => Ok(capacity / num_channels.max(1)),
            _ => Ok(self.registry.counts().rows(element)),
        }
    }

    /// A mesh sharing the positions and facets of this one, without any
    /// other attribute.
    pub fn stripped_copy(&self) -> Result<Self> {
        let mut registry = AttributeRegistry::with_dimension(self.dimension);
        let counts = self.registry.counts();
        registry.resize_elements(AttributeElement::Vertex, counts.vertices)?;
        registry.resize_elements(AttributeElement::Facet, counts.facets)?;
        registry.resize_elements(AttributeElement::Corner, counts.corners)?;
        let mut ids = ReservedIds::default();
        let share = |registry: &mut AttributeRegistry, name: &str| {
            registry.create_from(name, &self.registry, name, CreatePolicy::Force)
        };
        ids.vertex_to_position = share(&mut registry, names::VERTEX_TO_POSITION)?;
        ids.corner_to_vertex = share(&mut registry, names::CORNER_TO_VERTEX)?;
        if self.is_hybrid() {
            ids.facet_to_first_corner = share(&mut registry, names::FACET_TO_FIRST_CORNER)?;
            ids.corner_to_facet = share(&mut registry, names::CORNER_TO_FACET)?;
        }
        Ok(SurfaceMesh {
            dimension: self.dimension,
            vertex_per_facet: self.vertex_per_facet,
            registry,
            ids,
            _phantom: PhantomData,
        })
    }
}

/// Turn a sorted list of indices into a mask of `len` flags.
fn sorted_to_mask(indices: &[Index], len: usize) -> Result<Vec<bool>> {
    if indices.windows(2).any(|w| w[0] >= w[1]) {
        return Err(Error::InvalidMapping(
            "indices must be sorted and unique".to_string(),
        ));
    }
    let mut mask = vec![false; len];
    for i in indices {
        match mask.get_mut(*i as usize) {
            Some(flag) => *flag = true,
            None => {
                return Err(Error::IndexOutOfRange {
                    index: *i as usize,
                    len,
                });
            }
        }
    }
    Ok(mask)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::policy::GrowthPolicy;

    /// Unit square made of two triangles sharing the diagonal (0, 2).
    fn split_quad() -> SurfaceMesh<f64> {
        let mut mesh = SurfaceMesh::<f64>::new(3).expect("Cannot create mesh");
        mesh.add_vertices(
            4,
            &[0., 0., 0., 1., 0., 0., 1., 1., 0., 0., 1., 0.],
        )
        .expect("Cannot add vertices");
        mesh.add_triangles(&[0, 1, 2, 0, 2, 3])
            .expect("Cannot add triangles");
        mesh
    }

    #[test]
    fn t_new_mesh() {
        let mesh = SurfaceMesh::<f32>::new(3).expect("Cannot create mesh");
        assert_eq!(mesh.num_vertices(), 0);
        assert_eq!(mesh.num_facets(), 0);
        let positions = mesh.positions().expect("Missing positions");
        assert_eq!(positions.element_type(), AttributeElement::Vertex);
        assert_eq!(positions.usage(), AttributeUsage::Position);
        assert_eq!(positions.num_channels(), 3);
        assert!(mesh.has_attribute(names::CORNER_TO_VERTEX));
        assert_ne!(mesh.position_id(), INVALID_ATTRIBUTE_ID);
        assert_eq!(
            mesh.attribute_id(names::CORNER_TO_VERTEX).expect("Missing"),
            mesh.corner_to_vertex_id()
        );
        assert!(matches!(
            SurfaceMesh::<f32>::new(5),
            Err(Error::InvalidDimension(5))
        ));
    }

    #[test]
    fn t_add_elements() {
        let mesh = split_quad();
        assert_eq!(mesh.num_vertices(), 4);
        assert_eq!(mesh.num_facets(), 2);
        assert_eq!(mesh.num_corners(), 6);
        assert!(mesh.is_triangle_mesh());
        assert_eq!(mesh.position(2).expect("Missing vertex"), &[1., 1., 0.]);
        assert_eq!(mesh.facet_vertices(1).expect("Missing facet"), &[0, 2, 3]);
        assert_eq!(mesh.facet_corners(1).expect("Missing facet"), 3..6);
        assert_eq!(mesh.corner_facet(4).expect("Missing corner"), 1);
        assert_eq!(mesh.corner_vertex(4).expect("Missing corner"), 2);
        assert!(mesh.position(4).is_err());
        let mut mesh = mesh;
        assert!(matches!(
            mesh.add_triangle(0, 1, 7),
            Err(Error::IndexOutOfRange { index: 7, len: 4 })
        ));
        assert!(matches!(
            mesh.add_polygon(&[0, 1]),
            Err(Error::InvalidFacetSize(2))
        ));
        assert_eq!(mesh.num_facets(), 2);
        let v = mesh.add_vertex(&[2., 2., 2.]).expect("Cannot add vertex");
        assert_eq!(v, 4);
        mesh.add_vertices_with(2, |i, p| p.fill(i as f64))
            .expect("Cannot add vertices");
        assert_eq!(mesh.position(6).expect("Missing vertex"), &[6., 6., 6.]);
        assert!(mesh.add_vertex(&[1., 2.]).is_err());
    }

    #[test]
    fn t_hybrid() {
        let mut mesh = split_quad();
        let uv = mesh
            .create_attribute::<u32>("facet_tag", AttributeElement::Facet, AttributeUsage::Scalar, 1)
            .expect("Cannot create attribute");
        mesh.attribute_by_id_mut::<u32>(uv)
            .expect("Missing attribute")
            .ref_all()
            .expect("Cannot write")
            .copy_from_slice(&[7, 8]);
        mesh.add_vertex(&[2., 0., 0.]).expect("Cannot add vertex");
        let f = mesh.add_quad(1, 4, 2, 0).expect("Cannot add quad");
        assert_eq!(f, 2);
        assert!(mesh.is_hybrid());
        assert_eq!(mesh.vertex_per_facet(), 0);
        assert_eq!(mesh.facet_corners(2).expect("Missing facet"), 6..10);
        assert_eq!(mesh.corner_facet(7).expect("Missing corner"), 2);
        assert_eq!(mesh.corner_facet(2).expect("Missing corner"), 0);
        mesh.add_hybrid(&[3, 4], &[0, 1, 4, 4, 2, 3, 0])
            .expect("Cannot add facets");
        assert_eq!(mesh.num_facets(), 4);
        assert_eq!(mesh.facet_vertices(3).expect("Missing facet"), &[4, 2, 3, 0]);
        assert_eq!(
            mesh.attribute::<u32>("facet_tag")
                .expect("Missing attribute")
                .get_all(),
            &[7, 8, 0, 0]
        );
        assert!(!mesh.compress_if_regular().expect("Cannot compress"));
        mesh.remove_facets(&[2, 3]).expect("Cannot remove facets");
        assert!(mesh.compress_if_regular().expect("Cannot compress"));
        assert!(mesh.is_regular());
        assert_eq!(mesh.vertex_per_facet(), 3);
        assert_eq!(mesh.facet_vertices(1).expect("Missing facet"), &[0, 2, 3]);
        mesh.check_topology().expect("Invalid topology");
    }

    #[test]
    fn t_copy_on_write() {
        let a = split_quad();
        let mut b = a.clone();
        let pa = a.positions().expect("Missing positions").data_ptr();
        let pb = b.positions().expect("Missing positions").data_ptr();
        assert_eq!(pa, pb);
        b.position_mut(1).expect("Cannot write")[2] = 5.;
        assert_ne!(
            b.positions().expect("Missing positions").data_ptr(),
            a.positions().expect("Missing positions").data_ptr()
        );
        assert_eq!(a.position(1).expect("Missing vertex"), &[1., 0., 0.]);
        assert_eq!(b.position(1).expect("Missing vertex"), &[1., 0., 5.]);
        // Untouched attributes stay shared.
        assert_eq!(
            a.attributes()
                .base(a.corner_to_vertex_id())
                .expect("Missing")
                .data_ptr(),
            b.attributes()
                .base(b.corner_to_vertex_id())
                .expect("Missing")
                .data_ptr()
        );
    }

    #[test]
    fn t_stripped_copy() {
        let mut mesh = split_quad();
        mesh.create_attribute::<f32>("w", AttributeElement::Vertex, AttributeUsage::Scalar, 1)
            .expect("Cannot create attribute");
        mesh.initialize_edges().expect("Cannot build edges");
        let stripped = mesh.stripped_copy().expect("Cannot copy");
        assert!(!stripped.has_attribute("w"));
        assert!(!stripped.has_edges());
        assert_eq!(stripped.attributes().len(), 2);
        assert_eq!(stripped.num_vertices(), 4);
        assert_eq!(stripped.num_facets(), 2);
        assert_eq!(
            stripped.positions().expect("Missing").data_ptr(),
            mesh.positions().expect("Missing").data_ptr()
        );
        assert_eq!(stripped.facet_vertices(1).expect("Missing facet"), &[0, 2, 3]);
    }

    #[test]
    fn t_edges() {
        let mut mesh = split_quad();
        assert!(matches!(mesh.edge_vertices(0), Err(Error::MissingEdges)));
        mesh.initialize_edges().expect("Cannot build edges");
        assert_eq!(mesh.num_edges(), 5);
        let diagonal = mesh
            .find_edge_from_vertices(2, 0)
            .expect("Cannot search edges")
            .expect("Missing diagonal");
        assert_eq!(mesh.edge_vertices(diagonal).expect("Missing edge"), [2, 0]);
        assert!(!mesh.is_boundary_edge(diagonal).expect("Missing edge"));
        assert_eq!(
            mesh.edge_adjacent_facets(diagonal)
                .expect("Missing edge")
                .collect::<Vec<_>>(),
            vec![0, 1]
        );
        let boundary = (0..5)
            .filter(|e| mesh.is_boundary_edge(*e).expect("Missing edge"))
            .count();
        assert_eq!(boundary, 4);
        assert_eq!(
            mesh.find_edge_from_vertices(1, 3).expect("Cannot search edges"),
            None
        );
        assert_eq!(
            mesh.find_edge_from_vertices(3, 0).expect("Cannot search edges"),
            mesh.find_edge_from_vertices(0, 3).expect("Cannot search edges")
        );
        assert_eq!(
            mesh.facets_adjacent_to_vertex(0)
                .expect("Missing vertex")
                .collect::<Vec<_>>(),
            vec![0, 1]
        );
        assert_eq!(mesh.count_num_corners_around_vertex(1).expect("Missing vertex"), 1);
        let mut around: Vec<Index> = mesh
            .edges_around_vertex_with_duplicates(0)
            .expect("Missing vertex")
            .collect();
        around.sort();
        around.dedup();
        assert_eq!(around.len(), 3);
        assert!(mesh.is_manifold().expect("Missing edges"));
        assert_eq!(
            mesh.corners_of_facet_from(1, 4)
                .expect("Missing facet")
                .collect::<Vec<_>>(),
            vec![4, 5, 3]
        );
        mesh.check_topology().expect("Invalid topology");
        // Changing the vertex count drops the edges.
        mesh.add_vertex(&[0., 0., 1.]).expect("Cannot add vertex");
        assert!(!mesh.has_edges());
        assert_eq!(mesh.num_edges(), 0);
        assert!(!mesh.has_attribute(names::CORNER_TO_EDGE));
    }

    #[test]
    fn t_edge_attributes() {
        let mut mesh = split_quad();
        let id = mesh
            .create_attribute::<f64>("length", AttributeElement::Edge, AttributeUsage::Scalar, 1)
            .expect("Cannot create attribute");
        assert!(mesh.has_edges());
        assert_eq!(mesh.attribute_by_id::<f64>(id).expect("Missing").num_elements(), 5);
        mesh.add_triangle(1, 2, 3).expect("Cannot add facet");
        assert!(!mesh.has_edges());
        assert_eq!(mesh.attribute_by_id::<f64>(id).expect("Missing").num_elements(), 0);
        mesh.initialize_edges().expect("Cannot build edges");
        assert_eq!(mesh.attribute_by_id::<f64>(id).expect("Missing").num_elements(), 6);
    }

    #[test]
    fn t_remove_vertices() {
        let mut mesh = split_quad();
        let tag = mesh
            .create_attribute::<u32>("vtag", AttributeElement::Vertex, AttributeUsage::Scalar, 1)
            .expect("Cannot create attribute");
        mesh.attribute_by_id_mut::<u32>(tag)
            .expect("Missing")
            .ref_all()
            .expect("Cannot write")
            .copy_from_slice(&[10, 11, 12, 13]);
        let link = mesh
            .create_attribute::<u32>("link", AttributeElement::Facet, AttributeUsage::VertexIndex, 1)
            .expect("Cannot create attribute");
        mesh.attribute_by_id_mut::<u32>(link)
            .expect("Missing")
            .ref_all()
            .expect("Cannot write")
            .copy_from_slice(&[1, 3]);
        mesh.remove_vertices(&[1]).expect("Cannot remove vertices");
        assert_eq!(mesh.num_vertices(), 3);
        assert_eq!(mesh.num_facets(), 1);
        assert_eq!(mesh.facet_vertices(0).expect("Missing facet"), &[0, 1, 2]);
        assert_eq!(
            mesh.attribute_by_id::<u32>(tag).expect("Missing").get_all(),
            &[10, 12, 13]
        );
        // The remaining facet linked to vertex 3, which is now vertex 2.
        assert_eq!(mesh.attribute_by_id::<u32>(link).expect("Missing").get_all(), &[2]);
        assert_eq!(mesh.position(1).expect("Missing vertex"), &[1., 1., 0.]);
        assert!(mesh.remove_vertices(&[2, 1]).is_err());
        assert!(mesh.remove_vertices(&[9]).is_err());
        mesh.check_topology().expect("Invalid topology");
    }

    #[test]
    fn t_remove_facets() {
        let mut mesh = split_quad();
        let ctag = mesh
            .create_attribute::<i32>("ctag", AttributeElement::Corner, AttributeUsage::Scalar, 1)
            .expect("Cannot create attribute");
        mesh.attribute_by_id_mut::<i32>(ctag)
            .expect("Missing")
            .ref_all()
            .expect("Cannot write")
            .copy_from_slice(&[0, 1, 2, 3, 4, 5]);
        let uv = mesh
            .create_attribute::<f32>("uv", AttributeElement::Indexed, AttributeUsage::UV, 2)
            .expect("Cannot create attribute");
        mesh.indexed_attribute_mut::<f32>("uv")
            .expect("Missing")
            .set(&[0., 0., 1., 1.], &[0, 1, 0, 1, 0, 1])
            .expect("Cannot set");
        mesh.remove_facets_if(|f| f == 0).expect("Cannot remove facets");
        assert_eq!(mesh.num_facets(), 1);
        assert_eq!(mesh.num_corners(), 3);
        assert_eq!(mesh.num_vertices(), 4);
        assert_eq!(
            mesh.attribute_by_id::<i32>(ctag).expect("Missing").get_all(),
            &[3, 4, 5]
        );
        let uv = mesh.attributes().get_indexed::<f32>(uv).expect("Missing");
        assert_eq!(uv.indices().get_all(), &[1, 0, 1]);
        mesh.remove_facets(&[0]).expect("Cannot remove facets");
        assert_eq!(mesh.num_facets(), 0);
        assert_eq!(mesh.num_corners(), 0);
        assert_eq!(mesh.vertex_per_facet(), 0);
        mesh.add_quad(0, 1, 2, 3).expect("Cannot add quad");
        assert!(mesh.is_quad_mesh());
    }

    #[test]
    fn t_removal_keeps_edge_attributes() {
        let mut mesh = split_quad();
        mesh.initialize_edges().expect("Cannot build edges");
        let len = mesh
            .create_attribute::<f64>("len", AttributeElement::Edge, AttributeUsage::Scalar, 1)
            .expect("Cannot create attribute");
        mesh.attribute_by_id_mut::<f64>(len)
            .expect("Missing")
            .ref_all()
            .expect("Cannot write")
            .copy_from_slice(&[0., 10., 20., 30., 40.]);
        let diagonal = mesh
            .find_edge_from_vertices(0, 2)
            .expect("Cannot search edges")
            .expect("Missing edge");
        let link = mesh
            .create_attribute::<u32>("link", AttributeElement::Facet, AttributeUsage::EdgeIndex, 1)
            .expect("Cannot create attribute");
        mesh.attribute_by_id_mut::<u32>(link)
            .expect("Missing")
            .ref_all()
            .expect("Cannot write")
            .copy_from_slice(&[0, diagonal]);
        mesh.remove_facets(&[0]).expect("Cannot remove facets");
        assert!(mesh.has_edges());
        assert_eq!(mesh.num_edges(), 3);
        // Surviving edges keep their values and their order.
        assert_eq!(
            mesh.attribute_by_id::<f64>(len).expect("Missing").get_all(),
            &[20., 30., 40.]
        );
        let diagonal = mesh
            .find_edge_from_vertices(0, 2)
            .expect("Cannot search edges")
            .expect("Missing edge");
        assert_eq!(mesh.attribute_by_id::<u32>(link).expect("Missing").get_all(), &[diagonal]);
        mesh.check_topology().expect("Invalid topology");

        let mut mesh = split_quad();
        mesh.initialize_edges().expect("Cannot build edges");
        let len = mesh
            .create_attribute::<f64>("len", AttributeElement::Edge, AttributeUsage::Scalar, 1)
            .expect("Cannot create attribute");
        mesh.attribute_by_id_mut::<f64>(len)
            .expect("Missing")
            .ref_all()
            .expect("Cannot write")
            .copy_from_slice(&[0., 10., 20., 30., 40.]);
        mesh.remove_vertices(&[1]).expect("Cannot remove vertices");
        assert_eq!(mesh.num_edges(), 3);
        assert_eq!(
            mesh.attribute_by_id::<f64>(len).expect("Missing").get_all(),
            &[20., 30., 40.]
        );
        // Old edge (2, 3) is now (1, 2).
        let e = mesh
            .find_edge_from_vertices(1, 2)
            .expect("Cannot search edges")
            .expect("Missing edge");
        assert_eq!(mesh.attribute_by_id::<f64>(len).expect("Missing").get_all()[e as usize], 30.);
        mesh.check_topology().expect("Invalid topology");
    }

    #[test]
    fn t_failed_removal_changes_nothing() {
        let mut mesh = split_quad();
        mesh.wrap_as_const_facets(Arc::from(vec![0, 1, 2, 0, 2, 3]), 2, 3)
            .expect("Cannot wrap facets");
        let tag = mesh
            .create_attribute::<u8>("tag", AttributeElement::Facet, AttributeUsage::Scalar, 1)
            .expect("Cannot create attribute");
        mesh.attribute_by_id_mut::<u8>(tag)
            .expect("Missing")
            .ref_all()
            .expect("Cannot write")
            .copy_from_slice(&[7, 8]);
        mesh.initialize_edges().expect("Cannot build edges");
        assert!(matches!(
            mesh.remove_vertices(&[1]),
            Err(Error::ReadOnlyViolation)
        ));
        assert!(matches!(
            mesh.remove_facets(&[0]),
            Err(Error::ReadOnlyViolation)
        ));
        assert_eq!(mesh.num_vertices(), 4);
        assert_eq!(mesh.num_facets(), 2);
        assert_eq!(mesh.num_corners(), 6);
        assert_eq!(mesh.facet_vertices(1).expect("Missing facet"), &[0, 2, 3]);
        assert_eq!(mesh.attribute_by_id::<u8>(tag).expect("Missing").get_all(), &[7, 8]);
        assert!(mesh.has_edges());
        mesh.check_topology().expect("Invalid topology");
        // Once copying is allowed, the same removal goes through.
        let c2v = mesh.corner_to_vertex_id();
        mesh.registry_mut()
            .get_mut::<Index>(c2v)
            .expect("Missing")
            .set_write_policy(crate::policy::WritePolicy::SilentCopy);
        mesh.remove_vertices(&[1]).expect("Cannot remove vertices");
        assert_eq!(mesh.num_facets(), 1);
        assert_eq!(mesh.facet_vertices(0).expect("Missing facet"), &[0, 1, 2]);
        assert_eq!(mesh.attribute_by_id::<u8>(tag).expect("Missing").get_all(), &[8]);
        mesh.check_topology().expect("Invalid topology");
    }

    #[test]
    fn t_failed_add_keeps_edges() {
        let mut mesh = split_quad();
        mesh.wrap_as_const_facets(Arc::from(vec![0, 1, 2, 0, 2, 3]), 2, 3)
            .expect("Cannot wrap facets");
        mesh.initialize_edges().expect("Cannot build edges");
        assert!(matches!(
            mesh.add_triangle(1, 2, 3),
            Err(Error::CapacityExceeded { .. })
        ));
        assert_eq!(mesh.num_facets(), 2);
        assert_eq!(mesh.num_corners(), 6);
        assert!(mesh.has_edges());
        mesh.check_topology().expect("Invalid topology");
    }

    #[test]
    fn t_reserved_attributes() {
        let mut mesh = split_quad();
        assert!(matches!(
            mesh.create_attribute::<f32>("$mine", AttributeElement::Vertex, AttributeUsage::Scalar, 1),
            Err(Error::ReservedName(_))
        ));
        assert!(matches!(
            mesh.delete_attribute(names::VERTEX_TO_POSITION, DeletePolicy::Force),
            Err(Error::ReservedName(_))
        ));
        assert!(matches!(
            mesh.attribute_mut::<Index>(names::CORNER_TO_VERTEX),
            Err(Error::ReservedName(_))
        ));
        mesh.registry_mut()
            .create::<f32>(
                "$mine",
                AttributeElement::Vertex,
                AttributeUsage::Scalar,
                1,
                CreatePolicy::Force,
            )
            .expect("Cannot force create attribute");
        assert!(matches!(
            mesh.delete_attribute("$mine", DeletePolicy::ErrorIfReserved),
            Err(Error::ReservedName(_))
        ));
        mesh.delete_attribute("$mine", DeletePolicy::Force)
            .expect("Cannot force delete attribute");
        assert!(!mesh.has_attribute("$mine"));
    }

    #[test]
    fn t_wrap_vertices() {
        let coords: &'static mut [f64] = Box::leak(vec![0.; 15].into_boxed_slice());
        let ptr = coords.as_mut_ptr();
        let mut mesh = split_quad();
        // SAFETY: The memory is leaked, so it lives forever.
        unsafe { mesh.wrap_as_vertices(ptr, 15, 4) }.expect("Cannot wrap vertices");
        assert!(mesh.positions().expect("Missing").is_external());
        assert_eq!(mesh.positions().expect("Missing").data_ptr(), ptr as *const f64);
        mesh.position_mut(3).expect("Cannot write")[1] = 4.;
        assert_eq!(mesh.position(3).expect("Missing vertex"), &[0., 4., 0.]);
        // Adding a vertex goes beyond the wrapped rows.
        assert!(mesh.add_vertex(&[1., 1., 1.]).is_err());
        mesh.positions_mut()
            .expect("Missing")
            .set_growth_policy(GrowthPolicy::AllowWithinCapacity);
        mesh.add_vertex(&[1., 1., 1.]).expect("Cannot add vertex");
        assert_eq!(mesh.positions().expect("Missing").data_ptr(), ptr as *const f64);
        assert!(matches!(
            unsafe { mesh.wrap_as_vertices(ptr, 15, 2) },
            Err(Error::IndexOutOfRange { .. })
        ));
    }

    #[test]
    fn t_failed_wrap_changes_nothing() {
        let coords: &'static mut [f64] = Box::leak(vec![0.; 6].into_boxed_slice());
        let ptr = coords.as_mut_ptr();
        let mut mesh = split_quad();
        mesh.initialize_edges().expect("Cannot build edges");
        // Five vertices need 15 coordinates.
        assert!(matches!(
            unsafe { mesh.wrap_as_vertices(ptr, 6, 5) },
            Err(Error::CapacityExceeded {
                requested: 15,
                capacity: 6
            })
        ));
        assert_eq!(mesh.num_vertices(), 4);
        assert_eq!(mesh.position(3).expect("Missing vertex"), &[0., 1., 0.]);
        assert!(!mesh.positions().expect("Missing").is_external());
        assert!(mesh.has_edges());
        mesh.check_topology().expect("Invalid topology");
        // A user vertex attribute that cannot grow stops the wrap as well.
        let mut mesh = split_quad();
        mesh.wrap_as_const_attribute(
            "w",
            AttributeElement::Vertex,
            AttributeUsage::Scalar,
            1,
            Arc::from(vec![1.0f32, 2., 3., 4.]),
        )
        .expect("Cannot wrap attribute");
        let coords: &'static mut [f64] = Box::leak(vec![0.; 15].into_boxed_slice());
        assert!(unsafe { mesh.wrap_as_vertices(coords.as_mut_ptr(), 15, 5) }.is_err());
        assert_eq!(mesh.num_vertices(), 4);
        assert!(!mesh.positions().expect("Missing").is_external());
    }

    #[test]
    fn t_wrap_const_facets_and_attributes() {
        let mut mesh = split_quad();
        let facets: Arc<[Index]> = Arc::from(vec![0, 1, 2, 3]);
        mesh.wrap_as_const_facets(facets.clone(), 1, 4)
            .expect("Cannot wrap facets");
        assert!(mesh.is_quad_mesh());
        assert_eq!(mesh.num_corners(), 4);
        assert_eq!(mesh.facet_vertices(0).expect("Missing facet"), &[0, 1, 2, 3]);
        assert!(matches!(
            mesh.facet_vertices_mut(0),
            Err(Error::ReadOnlyViolation)
        ));
        let weights: Arc<[f32]> = Arc::from(vec![1., 2., 3., 4.]);
        mesh.wrap_as_const_attribute(
            "w",
            AttributeElement::Vertex,
            AttributeUsage::Scalar,
            1,
            weights.clone(),
        )
        .expect("Cannot wrap attribute");
        let w = mesh.attribute::<f32>("w").expect("Missing attribute");
        assert!(w.is_read_only());
        assert_eq!(w.data_ptr(), weights.as_ptr());
        let exported = mesh
            .delete_and_export_attribute::<f32>("w", DeletePolicy::ErrorIfReserved, ExportPolicy::CopyIfUnmanaged)
            .expect("Cannot export");
        assert_eq!(exported.as_ptr(), weights.as_ptr());
        assert!(!mesh.has_attribute("w"));
    }

    #[test]
    fn t_attribute_access() {
        let mut mesh = split_quad();
        let id = mesh
            .find_or_create_attribute::<f32>(
                "n",
                AttributeElement::Vertex,
                AttributeUsage::Normal,
                3,
                ResetToDefault::No,
            )
            .expect("Cannot create attribute");
        assert!(matches!(
            mesh.create_attribute::<f32>("bad", AttributeElement::Vertex, AttributeUsage::Normal, 2),
            Err(Error::InvalidChannelCount { .. })
        ));
        mesh.rename_attribute("n", "normal").expect("Cannot rename");
        assert_eq!(mesh.attribute_id("normal").expect("Missing"), id);
        let dup = mesh.duplicate_attribute("normal", "normal2").expect("Cannot duplicate");
        assert_eq!(mesh.attribute_name(dup).expect("Missing"), "normal2");
        let mut names = Vec::new();
        mesh.for_each_attribute(AttributeElement::Vertex, |_, name, _| {
            names.push(name.to_string())
        });
        assert_eq!(names, vec!["$vertex_to_position", "normal", "normal2"]);
        let other = mesh.clone();
        let mut third = split_quad();
        third.create_attribute_from("shared", &other, "normal")
            .expect("Cannot share attribute");
        assert_eq!(
            third.attribute::<f32>("shared").expect("Missing").data_ptr(),
            other.attribute::<f32>("normal").expect("Missing").data_ptr()
        );
    }
}
