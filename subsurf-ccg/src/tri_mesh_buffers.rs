//! # Triangle Buffer Conversion
//!
//! Helper for turning a [`DerivedMesh`] into triangle mesh buffers for use
//! with realtime rendering.
use crate::{derived::DerivedMesh, Error, Result};
use itertools::Itertools;
use slice_of_array::prelude::*;

static EPSILON: f32 = 0.00000001;

type Vector = ultraviolet::vec::Vec3;
type Normal = Vector;
type Point = Vector;

/// Triangulates the final quads of `derived`.
///
/// See [`quads_to_triangle_mesh_buffers()`].
pub fn to_triangle_mesh_buffers(
    derived: &DerivedMesh,
) -> Result<(Vec<u32>, Vec<[f32; 3]>, Vec<[f32; 3]>)> {
    let points = derived.vertex_cos()?;
    let quads = derived.layout().final_quads().collect::<Vec<_>>();
    quads_to_triangle_mesh_buffers(points.flat(), quads.iter().copied())
}

/// Returns a flat [`u32`] triangle index buffer and two, flat matching point
/// and normal buffers.
///
/// All the faces are disconnected. I.e. points & normals are duplicated for
/// each shared vertex.
pub fn quads_to_triangle_mesh_buffers(
    vertices: &[f32],
    quads: impl Iterator<Item = [u32; 4]> + Clone,
) -> Result<(Vec<u32>, Vec<[f32; 3]>, Vec<[f32; 3]>)> {
    #[cfg(feature = "topology_validation")]
    for quad in quads.clone() {
        for index in quad {
            if vertices.len() <= (3 * index + 2) as usize {
                return Err(Error::IndexOutOfBounds {
                    index: index as _,
                    max: vertices.len() / 3,
                });
            }
        }
    }
    Error::check_len(vertices.len() / 3 * 3, vertices.len())?;

    let points_nested = vertices.nest::<[_; 3]>();

    let (points_nested, normals_nested): (Vec<[f32; 3]>, Vec<[f32; 3]>) = quads
        .clone()
        .flat_map(|quad| {
            quad.iter()
                // Grab the three vertex index entries.
                .circular_tuple_windows::<(_, _, _)>()
                .map(|(&i0, &i1, &i2)| {
                    let point = to_point(&points_nested[i1 as usize]);
                    let normal = orthogonal(
                        &to_point(&points_nested[i0 as usize]),
                        &point,
                        &to_point(&points_nested[i2 as usize]),
                    );
                    let mag_sq = normal.mag_sq();

                    // Check for collinearity:
                    let normal = if mag_sq < EPSILON as _ {
                        face_normal(&index_as_points(&quad, points_nested)).unwrap_or(Vector::unit_z())
                    } else {
                        normal / mag_sq.sqrt()
                    };

                    ([point.x, point.y, point.z], [normal.x, normal.y, normal.z])
                })
                .collect_vec()
        })
        .unzip();

    // Same topology as the quads, only with new keys.
    let triangle_face_index = quads
        .scan(0.., |counter, quad| {
            Some(counter.take(quad.len()).collect::<Vec<u32>>())
        })
        // Split along the shortest diagonal so triangles are most nearly
        // equilateral.
        .flat_map(|quad| {
            let p = index_as_points(&quad, points_nested.as_slice());
            if (p[0] - p[2]).mag_sq() < (p[1] - p[3]).mag_sq() {
                [quad[0], quad[1], quad[2], quad[0], quad[2], quad[3]]
            } else {
                [quad[1], quad[2], quad[3], quad[1], quad[3], quad[0]]
            }
        })
        .collect();

    Ok((triangle_face_index, points_nested, normals_nested))
}

#[inline]
fn to_point(p: &[f32; 3]) -> Point {
    Point::new(p[0], p[1], p[2])
}

#[inline]
fn orthogonal(v0: &Point, v1: &Point, v2: &Point) -> Vector {
    (*v1 - *v0).cross(*v2 - *v1)
}

#[inline]
fn index_as_points(face: &[u32], points: &[[f32; 3]]) -> Vec<Point> {
    face.iter()
        .map(|&index| to_point(&points[index as usize]))
        .collect()
}

/// Computes the normal of a face.
/// Tries to do the right thing if the face
/// is non-planar or degenerate.
#[inline]
fn face_normal(points: &[Point]) -> Option<Normal> {
    let mut considered_edges = 0;

    let normal = points.iter().circular_tuple_windows::<(_, _, _)>().fold(
        Vector::zero(),
        |normal, corner| {
            let ortho_normal = orthogonal(corner.0, corner.1, corner.2);
            let mag_sq = ortho_normal.mag_sq();
            // Filter out collinear edge pairs.
            if mag_sq < EPSILON as _ {
                normal
            } else {
                considered_edges += 1;
                normal + ortho_normal / mag_sq.sqrt()
            }
        },
    );

    if 0 == considered_edges {
        // Degenerate/zero size face.
        None
    } else {
        Some(normal / considered_edges as f32)
    }
}
