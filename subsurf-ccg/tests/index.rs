//! Tests for the index module.

mod test_utils;

use std::collections::HashSet;
use subsurf_ccg::index::*;
use test_utils::*;

fn cube_topology() -> MeshTopology {
    MeshTopology::from_loops(8, &CUBE_VERTICES_PER_FACE, &CUBE_INDICES).unwrap()
}

#[test]
fn test_grid_and_edge_sizes() {
    assert_eq!(grid_size_for_level(1), 3);
    assert_eq!(grid_size_for_level(2), 5);
    assert_eq!(grid_size_for_level(4), 17);
    assert_eq!(edge_size_for_grid(5), 9);
}

#[test]
fn test_single_quad_counts() {
    let topology = MeshTopology::from_loops(4, &QUAD_VERTICES_PER_FACE, &QUAD_INDICES).unwrap();
    let layout = IndexLayout::for_level(&topology, 2);

    assert_eq!(layout.grid_size(), 5);
    assert_eq!(layout.edge_size(), 9);
    assert_eq!(layout.vertex_count(), 81);
    assert_eq!(layout.face_count(), 64);
    assert_eq!(layout.loop_count(), 256);
    assert_eq!(layout.edge_count(), 144);
}

#[test]
fn test_cube_counts_satisfy_euler() {
    let layout = IndexLayout::for_level(&cube_topology(), 1);

    assert_eq!(layout.vertex_count(), 98);
    assert_eq!(layout.edge_count(), 192);
    assert_eq!(layout.face_count(), 96);
    assert_eq!(
        2,
        layout.vertex_count() as i64 - layout.edge_count() as i64 + layout.face_count() as i64
    );
}

#[test]
fn test_coarse_vertices_come_last() {
    let layout = IndexLayout::for_level(&cube_topology(), 2);
    for v in 0..8 {
        assert_eq!(layout.vert_index(v), layout.vert_base() + v as u32);
        assert_eq!(
            layout.locate_vertex(layout.vert_index(v) as usize),
            Some(VertexLocation::Vertex { vert: v })
        );
    }
    assert_eq!(layout.vertex_count() as u32, layout.vert_base() + 8);
}

#[test]
fn test_every_vertex_is_used_once() {
    let layout = IndexLayout::for_level(&cube_topology(), 2);
    let used = layout.final_quads().flatten().collect::<HashSet<_>>();
    assert_eq!(used.len(), layout.vertex_count());
    assert!(used.iter().all(|&v| (v as usize) < layout.vertex_count()));
}

#[test]
fn test_final_edges_are_unique() {
    let layout = IndexLayout::for_level(&cube_topology(), 2);
    let pairs = layout
        .final_edges()
        .map(|[a, b]| (a.min(b), a.max(b)))
        .collect::<HashSet<_>>();
    assert_eq!(pairs.len(), layout.edge_count());
}

#[test]
fn test_grids_share_their_borders() {
    let topology = cube_topology();
    let layout = IndexLayout::for_level(&topology, 2);
    let g = layout.grid_size();

    for face in 0..topology.face_count() {
        let n = topology.valence(face);
        let center = layout.face_vertex_index(face, 0, 0, 0);
        assert_eq!(center, layout.face_base(face as _));

        for s in 0..n {
            let prev = (s + n - 1) % n;
            assert_eq!(layout.face_vertex_index(face, s, 0, 0), center);
            // Column 0 of grid S is row 0 of grid S - 1.
            for y in 0..g {
                assert_eq!(
                    layout.face_vertex_index(face, s, 0, y),
                    layout.face_vertex_index(face, prev, y, 0)
                );
            }

            // The outer corner is the face's corner vertex.
            let corner = topology.face_vertices(face)[s] as usize;
            assert_eq!(
                layout.face_vertex_index(face, s, g - 1, g - 1),
                layout.vert_index(corner)
            );

            // The outer end of the seam is the midpoint of edge S.
            let edge = topology.face_edges(face)[s] as usize;
            assert_eq!(
                layout.face_vertex_index(face, s, g - 1, 0),
                layout.edge_vertex_index(edge, g - 1)
            );
        }
    }
}

#[test]
fn test_edge_points_run_between_end_vertices() {
    let topology = cube_topology();
    let layout = IndexLayout::for_level(&topology, 1);
    let last = layout.edge_size() - 1;
    for edge in 0..topology.edge_count() {
        let [v0, v1] = topology.edge_vertices(edge);
        assert_eq!(layout.edge_vertex_index(edge, 0), layout.vert_index(v0 as _));
        assert_eq!(layout.edge_vertex_index(edge, last), layout.vert_index(v1 as _));
        for x in 1..last {
            assert_eq!(
                layout.locate_vertex(layout.edge_vertex_index(edge, x) as usize),
                Some(VertexLocation::EdgeInterior { edge, x })
            );
        }
    }
}

#[test]
fn test_cell_edges_connect_cell_vertices() {
    let topology = cube_topology();
    let layout = IndexLayout::for_level(&topology, 2);
    let cells = layout.grid_size() - 1;

    for face in 0..topology.face_count() {
        for s in 0..topology.valence(face) {
            for y in 0..cells {
                for x in 0..cells {
                    let verts = layout.cell_vertices(face, s, x, y);
                    let edges = layout.cell_edges(face, s, x, y);
                    for k in 0..4 {
                        let [a, b] = layout.final_edge(edges[k] as usize).unwrap();
                        let (c, d) = (verts[k], verts[(k + 1) % 4]);
                        assert_eq!((a.min(b), a.max(b)), (c.min(d), c.max(d)));
                    }
                }
            }
        }
    }
}

#[test]
fn test_out_of_range_lookups() {
    let layout = IndexLayout::for_level(&cube_topology(), 1);
    assert_eq!(layout.locate_vertex(layout.vertex_count()), None);
    assert_eq!(layout.final_edge(layout.edge_count()), None);
    assert_eq!(layout.final_quad(layout.face_count()), None);
}

#[test]
fn test_mixed_valences() {
    // A triangle next to a pentagon.
    let topology = MeshTopology::from_loops(6, &[3, 5], &[0, 1, 2, 1, 3, 4, 5, 2]).unwrap();
    let layout = IndexLayout::for_level(&topology, 1);

    // Face blocks: 1 + 3 + 3, 1 + 5 + 5; 7 edges with 3 interior points; 6
    // vertices.
    assert_eq!(layout.vertex_count(), 7 + 11 + 7 * 3 + 6);
    assert_eq!(layout.face_count(), (3 + 5) * 4);
    assert_eq!(layout.face_quad_start(1), 12);
    assert_eq!(layout.valence(1), 5);
}
