/*!
This is an optional module that is enabled by the `use_glam` feature. It
lets the positions of three dimensional meshes be read and written as
[`glam`](https://docs.rs/glam/latest/glam/) vectors.
*/

use crate::{
    element::Index,
    error::{Error, Result},
    mesh::SurfaceMesh,
    value::Scalar,
};

/// Scalar types with a matching 3d vector type in glam.
pub trait GlamScalar: Scalar {
    type Vec3: Copy + std::fmt::Debug + PartialEq;

    fn vector(coords: [Self; 3]) -> Self::Vec3;

    fn coords(v: Self::Vec3) -> [Self; 3];
}

impl GlamScalar for f32 {
    type Vec3 = glam::Vec3;

    fn vector(coords: [Self; 3]) -> Self::Vec3 {
        glam::Vec3::from_array(coords)
    }

    fn coords(v: Self::Vec3) -> [Self; 3] {
        v.to_array()
    }
}

impl GlamScalar for f64 {
    type Vec3 = glam::DVec3;

    fn vector(coords: [Self; 3]) -> Self::Vec3 {
        glam::DVec3::from_array(coords)
    }

    fn coords(v: Self::Vec3) -> [Self; 3] {
        v.to_array()
    }
}

/// Mesh that uses 32 bit floating point numbers for its positions.
pub type SurfaceMeshF32 = SurfaceMesh<f32>;

/// Mesh that uses 64 bit floating point numbers for its positions.
pub type SurfaceMeshF64 = SurfaceMesh<f64>;

impl<S> SurfaceMesh<S>
where
    S: GlamScalar,
{
    fn require_3d(&self) -> Result<()> {
        match self.dimension() {
            3 => Ok(()),
            d => Err(Error::InvalidDimension(d)),
        }
    }

    /// Position of a vertex.
    pub fn point(&self, v: Index) -> Result<S::Vec3> {
        self.require_3d()?;
        let p = self.position(v)?;
        Ok(S::vector([p[0], p[1], p[2]]))
    }

    pub fn set_point(&mut self, v: Index, pos: S::Vec3) -> Result<()> {
        self.require_3d()?;
        self.position_mut(v)?.copy_from_slice(&S::coords(pos));
        Ok(())
    }

    /// Add a vertex at the given position and return its index.
    pub fn add_point(&mut self, pos: S::Vec3) -> Result<Index> {
        self.require_3d()?;
        self.add_vertex(&S::coords(pos))
    }

    pub fn add_points(&mut self, points: &[S::Vec3]) -> Result<()> {
        self.require_3d()?;
        let first = self.num_vertices();
        self.add_vertices_with(points.len(), |v, p| {
            p.copy_from_slice(&S::coords(points[v as usize - first]))
        })
    }

    /// Average of the positions of the vertices of a facet.
    pub fn facet_centroid(&self, f: Index) -> Result<S::Vec3> {
        self.require_3d()?;
        let mut sum = [S::zero(); 3];
        let verts = self.facet_vertices(f)?;
        for v in verts {
            for (s, x) in sum.iter_mut().zip(self.position(*v)?) {
                *s = *s + *x;
            }
        }
        let n = S::from_f64_lossy(verts.len() as f64);
        Ok(S::vector(sum.map(|s| s / n)))
    }

    /// Smallest and largest coordinates of the vertices, or `None` for a
    /// mesh without vertices.
    pub fn bounding_box(&self) -> Result<Option<(S::Vec3, S::Vec3)>> {
        self.require_3d()?;
        let mut rows = self.positions()?.rows();
        let Some(first) = rows.next() else {
            return Ok(None);
        };
        let mut lo = [first[0], first[1], first[2]];
        let mut hi = lo;
        for p in rows {
            for i in 0..3 {
                lo[i] = lo[i].min(p[i]);
                hi[i] = hi[i].max(p[i]);
            }
        }
        Ok(Some((S::vector(lo), S::vector(hi))))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::macros::assert_f32_eq;

    #[test]
    fn t_points() {
        let mut mesh = SurfaceMeshF32::new(3).expect("Cannot create mesh");
        let v = mesh
            .add_point(glam::vec3(1., 2., 3.))
            .expect("Cannot add vertex");
        assert_eq!(mesh.point(v).expect("Missing vertex"), glam::vec3(1., 2., 3.));
        mesh.add_points(&[glam::Vec3::X, glam::Vec3::Y])
            .expect("Cannot add vertices");
        assert_eq!(mesh.num_vertices(), 3);
        assert_eq!(mesh.point(2).expect("Missing vertex"), glam::Vec3::Y);
        mesh.set_point(0, glam::Vec3::ZERO).expect("Cannot move vertex");
        mesh.add_triangle(0, 1, 2).expect("Cannot add triangle");
        let c = mesh.facet_centroid(0).expect("Missing facet");
        assert_f32_eq!(c.x, 1. / 3.);
        assert_f32_eq!(c.y, 1. / 3.);
        assert_f32_eq!(c.z, 0.);
        let (lo, hi) = mesh
            .bounding_box()
            .expect("Cannot compute box")
            .expect("Empty mesh");
        assert_eq!(lo, glam::Vec3::ZERO);
        assert_eq!(hi, glam::vec3(1., 1., 0.));
    }

    #[test]
    fn t_planar_mesh() {
        let mut mesh = SurfaceMeshF64::new(2).expect("Cannot create mesh");
        mesh.add_vertex(&[1., 2.]).expect("Cannot add vertex");
        assert!(matches!(mesh.point(0), Err(Error::InvalidDimension(2))));
        assert!(matches!(
            mesh.add_point(glam::DVec3::ONE),
            Err(Error::InvalidDimension(2))
        ));
        assert!(
            SurfaceMeshF64::new(3)
                .expect("Cannot create mesh")
                .bounding_box()
                .expect("Cannot compute box")
                .is_none()
        );
    }
}
