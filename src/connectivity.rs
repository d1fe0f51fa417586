/*!
Derived connectivity of a surface mesh.

Everything here is computed from the corner to vertex buffer and the corner
ranges of the facets, in a single pass over the corners:

+ Every corner `c` of a facet defines the undirected edge between its vertex
  and the vertex of the next corner of the same facet. Edges get dense ids in
  the order they are first encountered.

+ The corners of each edge, and the corners of each vertex, are chained into
  singly linked lists through dense corner ids. The lists preserve the order
  of the input corners and end with [`INVALID_INDEX`].

Non-manifold input, such as an edge shared by more than two facets, or a
facet visiting the same vertex twice, is recorded as is.
*/

use crate::{
    element::{INVALID_INDEX, Index},
    error::{Error, Result},
    iterator::CornerChainIter,
};
use std::{collections::HashMap, ops::Range};

/// Undirected edge between two vertices. The two vertices are kept sorted, so
/// equality and hashing do not depend on the direction of the edge.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeKey(Index, Index);

impl EdgeKey {
    pub fn new(a: Index, b: Index) -> Self {
        if a <= b { EdgeKey(a, b) } else { EdgeKey(b, a) }
    }

    pub fn vertices(&self) -> [Index; 2] {
        [self.0, self.1]
    }
}

/// Edge ids and corner chains of a mesh.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Connectivity {
    pub corner_to_edge: Vec<Index>,
    pub edge_to_first_corner: Vec<Index>,
    pub next_corner_around_edge: Vec<Index>,
    pub vertex_to_first_corner: Vec<Index>,
    pub next_corner_around_vertex: Vec<Index>,
}

impl Connectivity {
    pub fn num_edges(&self) -> usize {
        self.edge_to_first_corner.len()
    }

    /// Give edge `e` the id `old_to_new[e]`. `old_to_new` must be a
    /// permutation of the edge ids.
    pub(crate) fn renumber_edges(&mut self, old_to_new: &[Index]) {
        debug_assert_eq!(old_to_new.len(), self.num_edges());
        for e in self.corner_to_edge.iter_mut() {
            *e = old_to_new[*e as usize];
        }
        let mut first = vec![INVALID_INDEX; self.num_edges()];
        for (e, c) in self.edge_to_first_corner.iter().enumerate() {
            first[old_to_new[e] as usize] = *c;
        }
        self.edge_to_first_corner = first;
    }

    /// Corners adjacent to edge `e`. Empty if `e` is out of range.
    pub fn corners_around_edge(&self, e: Index) -> CornerChainIter<'_> {
        CornerChainIter::new(
            &self.next_corner_around_edge,
            first_in_chain(&self.edge_to_first_corner, e),
        )
    }

    /// Corners incident to vertex `v`. Empty if `v` is out of range.
    pub fn corners_around_vertex(&self, v: Index) -> CornerChainIter<'_> {
        CornerChainIter::new(
            &self.next_corner_around_vertex,
            first_in_chain(&self.vertex_to_first_corner, v),
        )
    }
}

fn first_in_chain(first: &[Index], i: Index) -> Index {
    first.get(i as usize).copied().unwrap_or(INVALID_INDEX)
}

/// Appends corner `c` at the end of the chain of `head`.
fn append(first: &mut [Index], last: &mut [Index], next: &mut [Index], head: usize, c: Index) {
    match last[head] {
        INVALID_INDEX => first[head] = c,
        prev => next[prev as usize] = c,
    }
    last[head] = c;
}

/**
 * Builds the [`Connectivity`] of a mesh.
 *
 * ```rust
 * use meshstore::ConnectivityBuilder;
 *
 * // Two triangles sharing the edge (0, 2).
 * let corners = [0, 1, 2, 0, 2, 3];
 * let conn = ConnectivityBuilder::new(4, &corners)
 *     .build([0..3, 3..6].into_iter())
 *     .expect("Cannot build connectivity");
 * assert_eq!(conn.num_edges(), 5);
 * ```
 */
pub struct ConnectivityBuilder<'a> {
    num_vertices: usize,
    corner_to_vertex: &'a [Index],
    edge_order: &'a [[Index; 2]],
}

impl<'a> ConnectivityBuilder<'a> {
    pub fn new(num_vertices: usize, corner_to_vertex: &'a [Index]) -> Self {
        ConnectivityBuilder {
            num_vertices,
            corner_to_vertex,
            edge_order: &[],
        }
    }

    /// Give the listed edges the ids `0..edges.len()` in this order. Edges
    /// not listed are numbered after them, in the order they are found.
    /// Every listed edge must be used by at least one facet.
    pub fn with_edge_order(mut self, edges: &'a [[Index; 2]]) -> Self {
        self.edge_order = edges;
        self
    }

    /// Build the connectivity. `facets` yields the corner range of each
    /// facet, and the ranges must cover every corner.
    pub fn build(self, facets: impl Iterator<Item = Range<usize>>) -> Result<Connectivity> {
        let num_corners = self.corner_to_vertex.len();
        if let Some(&v) = self
            .corner_to_vertex
            .iter()
            .find(|v| **v as usize >= self.num_vertices)
        {
            return Err(Error::IndexOutOfRange {
                index: v as usize,
                len: self.num_vertices,
            });
        }
        let mut edge_ids: HashMap<EdgeKey, Index> = HashMap::with_capacity(num_corners);
        let mut edge_to_first_corner: Vec<Index> = Vec::with_capacity(num_corners);
        for &[a, b] in self.edge_order {
            let key = EdgeKey::new(a, b);
            if edge_ids.insert(key, edge_to_first_corner.len() as Index).is_some() {
                return Err(Error::InvalidMapping(format!(
                    "edge ({a}, {b}) is listed more than once"
                )));
            }
            edge_to_first_corner.push(INVALID_INDEX);
        }
        let mut edge_last_corner = edge_to_first_corner.clone();
        let mut corner_to_edge = vec![INVALID_INDEX; num_corners];
        let mut next_corner_around_edge = vec![INVALID_INDEX; num_corners];
        let mut vertex_to_first_corner = vec![INVALID_INDEX; self.num_vertices];
        let mut vertex_last_corner = vec![INVALID_INDEX; self.num_vertices];
        let mut next_corner_around_vertex = vec![INVALID_INDEX; num_corners];
        let mut visited = 0usize;
        for range in facets {
            let (begin, end) = (range.start, range.end);
            if end > num_corners || begin > end {
                return Err(Error::IndexOutOfRange {
                    index: end,
                    len: num_corners,
                });
            }
            visited += end - begin;
            for c in begin..end {
                let next = if c + 1 == end { begin } else { c + 1 };
                let v0 = self.corner_to_vertex[c];
                let v1 = self.corner_to_vertex[next];
                append(
                    &mut vertex_to_first_corner,
                    &mut vertex_last_corner,
                    &mut next_corner_around_vertex,
                    v0 as usize,
                    c as Index,
                );
                let e = *edge_ids.entry(EdgeKey::new(v0, v1)).or_insert_with(|| {
                    edge_to_first_corner.push(INVALID_INDEX);
                    edge_last_corner.push(INVALID_INDEX);
                    (edge_to_first_corner.len() - 1) as Index
                });
                corner_to_edge[c] = e;
                append(
                    &mut edge_to_first_corner,
                    &mut edge_last_corner,
                    &mut next_corner_around_edge,
                    e as usize,
                    c as Index,
                );
            }
        }
        debug_assert_eq!(visited, num_corners, "Facets must cover all corners");
        if let Some(e) = edge_to_first_corner.iter().position(|c| *c == INVALID_INDEX) {
            let [a, b] = self.edge_order[e];
            return Err(Error::InvalidMapping(format!(
                "edge ({a}, {b}) is not used by any facet"
            )));
        }
        log::debug!(
            "Initialized {} edges from {} corners",
            edge_to_first_corner.len(),
            num_corners
        );
        Ok(Connectivity {
            corner_to_edge,
            edge_to_first_corner,
            next_corner_around_edge,
            vertex_to_first_corner,
            next_corner_around_vertex,
        })
    }
}
