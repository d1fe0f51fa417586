use criterion::{Criterion, criterion_group, criterion_main};
use meshstore::{
    AttributeElement, AttributeUsage, Index, SurfaceMesh,
    remap::{RemapVerticesOptions, remap_vertices, reorder_facets},
};
use std::hint::black_box;

type PolygonMesh = SurfaceMesh<f32>;

const GRID_SIZE: usize = 200;

// Quad grid with `n x n` facets in the XY plane.
fn quad_grid(n: usize) -> PolygonMesh {
    let mut mesh = PolygonMesh::new(3).unwrap();
    let stride = n + 1;
    mesh.add_vertices_with(stride * stride, |v, p| {
        let v = v as usize;
        p[0] = (v % stride) as f32;
        p[1] = (v / stride) as f32;
        p[2] = 0.;
    })
    .unwrap();
    let mut indices = Vec::with_capacity(n * n * 4);
    for y in 0..n {
        for x in 0..n {
            let v = (y * stride + x) as Index;
            let s = stride as Index;
            indices.extend_from_slice(&[v, v + 1, v + s + 1, v + s]);
        }
    }
    mesh.add_quads(&indices).unwrap();
    mesh
}

fn bench_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("construction");

    group.bench_function("quad_grid", |b| {
        b.iter(|| {
            let mesh = quad_grid(black_box(GRID_SIZE));
            black_box(mesh);
        });
    });

    group.bench_function("hybrid_grid", |b| {
        let quads = quad_grid(GRID_SIZE);
        b.iter(|| {
            let mut mesh = quads.stripped_copy().unwrap();
            mesh.add_triangle(0, 1, 2).unwrap();
            black_box(mesh);
        });
    });

    group.finish();
}

fn bench_connectivity(c: &mut Criterion) {
    let mut group = c.benchmark_group("connectivity");
    let mesh = quad_grid(GRID_SIZE);

    group.bench_function("initialize_edges", |b| {
        b.iter(|| {
            let mut mesh = mesh.clone();
            mesh.initialize_edges().unwrap();
            black_box(mesh);
        });
    });

    let mut with_edges = mesh.clone();
    with_edges.initialize_edges().unwrap();
    group.bench_function("vertex_valence", |b| {
        b.iter(|| {
            let mut total = 0usize;
            for v in 0..with_edges.num_vertices() as Index {
                total += with_edges.count_num_corners_around_vertex(v).unwrap();
            }
            black_box(total);
        });
    });

    group.finish();
}

fn bench_copy_on_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("copy_on_write");
    let mut mesh = quad_grid(GRID_SIZE);
    for i in 0..8 {
        mesh.create_attribute::<f32>(
            &format!("attr_{i}"),
            AttributeElement::Vertex,
            AttributeUsage::Vector,
            3,
        )
        .unwrap();
    }

    group.bench_function("clone", |b| {
        b.iter(|| black_box(mesh.clone()));
    });

    group.bench_function("clone_and_write_positions", |b| {
        b.iter(|| {
            let mut copy = mesh.clone();
            copy.positions_mut().unwrap().set(0, 2, 1.).unwrap();
            black_box(copy);
        });
    });

    group.finish();
}

fn bench_remap(c: &mut Criterion) {
    let mut group = c.benchmark_group("remap");
    let mesh = quad_grid(GRID_SIZE);
    let nv = mesh.num_vertices();

    // Weld pairs of neighboring vertices in every row.
    let old_to_new: Vec<Index> = (0..nv).map(|v| (v / 2) as Index).collect();
    group.bench_function("remap_vertices", |b| {
        b.iter(|| {
            let mut mesh = mesh.clone();
            remap_vertices(&mut mesh, &old_to_new, RemapVerticesOptions::default()).unwrap();
            black_box(mesh);
        });
    });

    let reversed: Vec<Index> = (0..mesh.num_facets() as Index).rev().collect();
    group.bench_function("reorder_facets", |b| {
        b.iter(|| {
            let mut mesh = mesh.clone();
            reorder_facets(&mut mesh, &reversed).unwrap();
            black_box(mesh);
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_construction,
    bench_connectivity,
    bench_copy_on_write,
    bench_remap
);
criterion_main!(benches);
