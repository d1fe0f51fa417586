use crate::{
    element::{AttributeElement, ElementCounts, ElementMask, INVALID_INDEX, Index},
    error::{Error, Result},
    iterator::CornerChainIter,
    mesh::{FacetLayout, SurfaceMesh},
    registry::AttributeRegistry,
    value::Scalar,
};

fn invalid(msg: String) -> Error {
    Error::InvalidTopology(msg)
}

fn check_attribute_rows(registry: &AttributeRegistry) -> Result<()> {
    let counts: ElementCounts = registry.counts();
    let mut failure = None;
    registry.for_each(ElementMask::ALL, |_, name, attr| {
        let element = attr.element_type();
        if failure.is_none()
            && element != AttributeElement::Value
            && attr.num_elements() != counts.rows(element)
        {
            failure = Some(invalid(format!(
                "attribute '{name}' has {} rows, expected {}",
                attr.num_elements(),
                counts.rows(element)
            )));
        }
    });
    failure.map_or(Ok(()), Err)
}

fn check_facets(layout: &FacetLayout, corner_to_vertex: &[Index], num_vertices: usize) -> Result<()> {
    if let Some(v) = corner_to_vertex
        .iter()
        .find(|v| **v as usize >= num_vertices)
    {
        return Err(invalid(format!("corner refers to missing vertex {v}")));
    }
    let mut expected = 0usize;
    for (f, range) in layout.ranges().enumerate() {
        // Facets must tile the corners in order.
        if range.start != expected || range.len() < 3 {
            return Err(invalid(format!("facet {f} spans corners {range:?}")));
        }
        for c in range.clone() {
            if layout.facet_of(c as Index) as usize != f {
                return Err(invalid(format!("corner {c} does not point back to facet {f}")));
            }
        }
        expected = range.end;
    }
    if expected != corner_to_vertex.len() {
        return Err(invalid(format!(
            "facets cover {expected} of {} corners",
            corner_to_vertex.len()
        )));
    }
    Ok(())
}

/// Every corner must appear exactly once in the chains, and each chain must
/// only hold corners with the same key.
fn check_chains(
    heads: &[Index],
    next: &[Index],
    key: impl Fn(Index) -> Index,
    what: &str,
) -> Result<()> {
    let mut visited = vec![false; next.len()];
    for (k, head) in heads.iter().enumerate() {
        if *head == INVALID_INDEX {
            continue;
        }
        for c in CornerChainIter::new(next, *head) {
            if std::mem::replace(&mut visited[c as usize], true) {
                return Err(invalid(format!("corner {c} is linked twice around {what} {k}")));
            }
            if key(c) as usize != k {
                return Err(invalid(format!("corner {c} is linked around the wrong {what} {k}")));
            }
        }
    }
    match visited.iter().position(|v| !v) {
        Some(c) => Err(invalid(format!("corner {c} is not linked around any {what}"))),
        None => Ok(()),
    }
}

impl<S> SurfaceMesh<S>
where
    S: Scalar,
{
    /// Check the internal consistency of the mesh: attribute sizes, facet
    /// layout, and the edge connectivity if it is initialized.
    pub fn check_topology(&self) -> Result<()> {
        check_attribute_rows(self.attributes())?;
        let layout = self.facet_layout()?;
        let c2v = self.corner_to_vertex()?;
        check_facets(&layout, c2v, self.num_vertices())?;
        if self.is_regular() && self.num_facets() * self.vertex_per_facet() != self.num_corners() {
            return Err(invalid(format!(
                "{} facets of size {} do not match {} corners",
                self.num_facets(),
                self.vertex_per_facet(),
                self.num_corners()
            )));
        }
        if !self.has_edges() {
            return Ok(());
        }
        let c2e = self.corner_to_edge()?;
        let num_edges = self.num_edges() as Index;
        let mut first = vec![INVALID_INDEX; self.num_edges()];
        for (c, e) in c2e.iter().enumerate() {
            if *e >= num_edges {
                return Err(invalid(format!("corner {c} refers to missing edge {e}")));
            }
            if first[*e as usize] == INVALID_INDEX {
                first[*e as usize] = c as Index;
            }
        }
        // All corners of an edge must join the same pair of vertices.
        for e in 0..num_edges {
            let [a, b] = self.edge_vertices(e)?;
            let key = (a.min(b), a.max(b));
            for c in self.corners_around_edge(e)? {
                let (u, v) = (c2v[c as usize], c2v[layout.next(c) as usize]);
                if (u.min(v), u.max(v)) != key {
                    return Err(invalid(format!("corner {c} does not lie on edge {e}")));
                }
            }
        }
        let mut edge_heads = Vec::with_capacity(self.num_edges());
        for e in 0..num_edges {
            edge_heads.push(self.corners_around_edge(e)?.next().unwrap_or(INVALID_INDEX));
        }
        if edge_heads != first {
            return Err(invalid("edge chains do not start at the first corner of their edge".to_string()));
        }
        let mut vertex_heads = Vec::with_capacity(self.num_vertices());
        for v in 0..self.num_vertices() as Index {
            vertex_heads.push(self.corners_around_vertex(v)?.next().unwrap_or(INVALID_INDEX));
        }
        check_chains(&edge_heads, self.next_corner_around_edge()?, |c| c2e[c as usize], "edge")?;
        check_chains(
            &vertex_heads,
            self.next_corner_around_vertex()?,
            |c| c2v[c as usize],
            "vertex",
        )
    }
}
