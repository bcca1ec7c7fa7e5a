//! Meshes shared by the integration tests.
#![allow(dead_code)]

use subsurf_ccg::sync::MeshDescriptor;

/// Unit cube centered at the origin, faces wound outwards.
pub const CUBE_POSITIONS: [f32; 24] = [
    -0.5, -0.5, 0.5, //
    0.5, -0.5, 0.5, //
    -0.5, 0.5, 0.5, //
    0.5, 0.5, 0.5, //
    -0.5, 0.5, -0.5, //
    0.5, 0.5, -0.5, //
    -0.5, -0.5, -0.5, //
    0.5, -0.5, -0.5,
];

pub const CUBE_VERTICES_PER_FACE: [u32; 6] = [4; 6];

pub const CUBE_INDICES: [u32; 24] = [
    0, 1, 3, 2, //
    2, 3, 5, 4, //
    4, 5, 7, 6, //
    6, 7, 1, 0, //
    1, 7, 5, 3, //
    6, 0, 2, 4,
];

/// Unit quad in the `z = 0` plane, wound counter clockwise seen from `+z`.
pub const QUAD_POSITIONS: [f32; 12] = [0., 0., 0., 1., 0., 0., 1., 1., 0., 0., 1., 0.];
pub const QUAD_VERTICES_PER_FACE: [u32; 1] = [4];
pub const QUAD_INDICES: [u32; 4] = [0, 1, 2, 3];

/// 2×2 quads over `[0, 2]²` in the `z = 0` plane.
pub const PLANE_POSITIONS: [f32; 27] = [
    0., 0., 0., 1., 0., 0., 2., 0., 0., //
    0., 1., 0., 1., 1., 0., 2., 1., 0., //
    0., 2., 0., 1., 2., 0., 2., 2., 0.,
];
pub const PLANE_VERTICES_PER_FACE: [u32; 4] = [4; 4];
pub const PLANE_INDICES: [u32; 16] = [
    0, 1, 4, 3, //
    1, 2, 5, 4, //
    3, 4, 7, 6, //
    4, 5, 8, 7,
];

pub fn cube() -> MeshDescriptor<'static> {
    let mut mesh = MeshDescriptor::new(8, &CUBE_VERTICES_PER_FACE, &CUBE_INDICES).unwrap();
    mesh.positions(&CUBE_POSITIONS);
    mesh
}

pub fn quad() -> MeshDescriptor<'static> {
    let mut mesh = MeshDescriptor::new(4, &QUAD_VERTICES_PER_FACE, &QUAD_INDICES).unwrap();
    mesh.positions(&QUAD_POSITIONS);
    mesh
}

pub fn plane() -> MeshDescriptor<'static> {
    let mut mesh = MeshDescriptor::new(9, &PLANE_VERTICES_PER_FACE, &PLANE_INDICES).unwrap();
    mesh.positions(&PLANE_POSITIONS);
    mesh
}

pub fn assert_close(a: [f32; 3], b: [f32; 3]) {
    for k in 0..3 {
        assert!(
            (a[k] - b[k]).abs() < 1.0e-5,
            "{a:?} and {b:?} differ in component {k}"
        );
    }
}
