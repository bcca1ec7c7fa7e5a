//! Tests for the derived mesh facade and the modifier entry point.

mod test_utils;

use std::collections::HashSet;
use subsurf_ccg::{
    attributes::{AttributeKind, AttributeLayer, AttributeSet},
    derived::*,
    displacement::GridPaintMask,
    sync::{sync_from_mesh, MeshDescriptor},
    topology::{AllocatorKind, EdgeHandle, StoreOptions, TopologyStore},
    ORIGINDEX_NONE,
};
use test_utils::*;

fn derive<'a>(store: &'a TopologyStore, mesh: &MeshDescriptor) -> DerivedMesh<'a> {
    DerivedMesh::new(StoreRef::Borrowed(store), mesh, DerivedOptions::default()).unwrap()
}

fn synced(level: usize, mesh: &MeshDescriptor) -> TopologyStore {
    let mut store = TopologyStore::new(level, 3, StoreOptions::default());
    sync_from_mesh(&mut store, mesh, None, false).unwrap();
    store
}

#[test]
fn test_cube_counts() {
    let mesh = cube();
    let store = synced(1, &mesh);
    let derived = derive(&store, &mesh);

    assert_eq!(derived.vertex_count(), 98);
    assert_eq!(derived.edge_count(), 192);
    assert_eq!(derived.face_count(), 96);
    assert_eq!(derived.loop_count(), 384);
    assert_eq!(derived.grid_count(), 24);
    assert_eq!(derived.grid_size(), 3);
    assert_eq!(derived.vertices().unwrap().len(), 98);
    assert_eq!(derived.edges().unwrap().len(), 192);
    assert_eq!(derived.polys().unwrap().len(), 96);
}

#[test]
fn test_single_elements_match_arrays() {
    let mesh = cube();
    let store = synced(2, &mesh);
    let derived = derive(&store, &mesh);

    let verts = derived.vertices().unwrap();
    let edges = derived.edges().unwrap();
    let faces = derived.faces().unwrap();
    for (i, vert) in verts.iter().enumerate() {
        assert_eq!(derived.vertex(i).unwrap(), *vert);
    }
    for (i, edge) in edges.iter().enumerate() {
        assert_eq!(derived.edge(i).unwrap(), *edge);
    }
    for (i, face) in faces.iter().enumerate() {
        assert_eq!(derived.face(i).unwrap(), *face);
    }
    assert!(derived.vertex(verts.len()).is_err());
    assert!(derived.edge(edges.len()).is_err());
    assert!(derived.face(faces.len()).is_err());
}

#[test]
fn test_vertex_positions_and_normals() -> anyhow::Result<()> {
    let mesh = cube();
    let store = synced(1, &mesh);
    let derived = derive(&store, &mesh);

    for index in 0..derived.vertex_count() {
        let vert = derived.vertex(index)?;
        assert_eq!(derived.vertex_co(index)?, vert.co);
        let no = derived.vertex_no(index)?;
        assert!((no.iter().map(|n| n * n).sum::<f32>() - 1.0).abs() < 1.0e-4);
    }
    assert!(derived.vertex_co(derived.vertex_count()).is_err());
    Ok(())
}

#[test]
fn test_grid_offsets_and_flags() {
    // A triangle and a pentagon sharing the edge 0-2.
    let positions = [
        0., 0., 0., 1., 0., 0., 1., 1., 0., 0., 2., 0., -1., 2., 0., -1., 1., 0.,
    ];
    let flag_mats = [FlagMat::new(FaceFlags::empty(), 2), FlagMat::default()];
    let mut mesh = MeshDescriptor::new(6, &[3, 5], &[0, 1, 2, 0, 2, 3, 4, 5]).unwrap();
    mesh.positions(&positions).face_flags(&flag_mats);
    let store = synced(1, &mesh);
    let derived = derive(&store, &mesh);

    assert_eq!(derived.grid_count(), 8);
    assert_eq!(derived.grid_offset(0), 0);
    assert_eq!(derived.grid_offset(1), 3);
    let grid_flags = derived.grid_flag_mats();
    assert_eq!(grid_flags.len(), 8);
    assert!(grid_flags[..3].iter().all(|flag_mat| 2 == flag_mat.mat_nr));
    assert!(grid_flags[3..]
        .iter()
        .all(|flag_mat| flag_mat.flag.contains(FaceFlags::SMOOTH)));
}

#[test]
fn test_loops_walk_their_quads() {
    let mesh = cube();
    let store = synced(1, &mesh);
    let derived = derive(&store, &mesh);

    let faces = derived.faces().unwrap();
    let edges = derived.edges().unwrap();
    let loops = derived.loops().unwrap();
    let polys = derived.polys().unwrap();

    for (q, (face, poly)) in faces.iter().zip(&polys).enumerate() {
        assert_eq!(poly.loopstart, 4 * q as u32);
        assert_eq!(poly.totloop, 4);
        for k in 0..4 {
            let l = loops[4 * q + k];
            assert_eq!(l.v, face.v[k]);
            let edge = edges[l.e as usize];
            let next = face.v[(k + 1) % 4];
            assert_eq!(
                (edge.v1.min(edge.v2), edge.v1.max(edge.v2)),
                (l.v.min(next), l.v.max(next))
            );
        }
    }
}

#[test]
fn test_every_edge_is_used_by_a_loop() {
    let mesh = cube();
    let store = synced(2, &mesh);
    let derived = derive(&store, &mesh);
    let used = derived
        .loops()
        .unwrap()
        .iter()
        .map(|l| l.e)
        .collect::<HashSet<_>>();
    assert_eq!(used.len(), derived.edge_count());
}

#[test]
fn test_origin_index_layers() {
    let face_origins = [10, 11, 12, 13, 14, 15];
    let mut mesh = cube();
    mesh.face_origin_index(&face_origins);
    let store = synced(1, &mesh);
    let derived = derive(&store, &mesh);

    let vert_origins = derived.vertex_origindex();
    assert_eq!(vert_origins.len(), derived.vertex_count());
    for (v, &index) in derived.vert_map().iter().enumerate() {
        assert_eq!(vert_origins[index as usize], v as i32);
    }
    assert_eq!(vert_origins.iter().filter(|&&o| ORIGINDEX_NONE != o).count(), 8);

    let edge_origins = derived.edge_origindex();
    let segments = derived.layout().edge_size() - 1;
    for (e, entry) in derived.edge_map().iter().enumerate() {
        let start = entry.start_edge as usize;
        assert!(edge_origins[start..start + segments]
            .iter()
            .all(|&o| o == e as i32));
    }
    assert!(edge_origins[..derived.edge_map()[0].start_edge as usize]
        .iter()
        .all(|&o| ORIGINDEX_NONE == o));

    let poly_origins = derived.poly_origindex();
    for (q, &face) in derived.reverse_face_map().iter().enumerate() {
        assert_eq!(poly_origins[q], face_origins[face as usize]);
    }
    assert_eq!(derived.tess_face_origindex()[17], 17);
}

#[test]
fn test_maps_point_into_the_final_mesh() {
    let mesh = cube();
    let store = synced(1, &mesh);
    let derived = derive(&store, &mesh);

    let layout = derived.layout();
    for (f, entry) in derived.face_map().iter().enumerate() {
        assert_eq!(entry.start_vert, layout.face_base(f));
        assert_eq!(entry.start_face, 16 * f as u32);
        assert_eq!(derived.reverse_face_map()[entry.start_face as usize], f as u32);
    }
    for (e, entry) in derived.edge_map().iter().enumerate() {
        assert_eq!(entry.start_vert, layout.edge_vertex_index(e, 1));
    }
    assert_eq!(derived.vert_map()[0], layout.vert_base());
}

#[test]
fn test_mapped_element_callbacks() {
    let mesh = cube();
    let store = synced(1, &mesh);
    let derived = derive(&store, &mesh);

    let mut verts = Vec::new();
    derived.foreach_mapped_vert(|origin, co, normal| {
        assert!(normal.is_some());
        verts.push((origin, co));
    });
    assert_eq!(verts.len(), 8);

    let mut segments = 0;
    derived.foreach_mapped_edge(|_, a, b| {
        assert_ne!(a, b);
        segments += 1;
    });
    assert_eq!(segments, 12 * 4);

    let mut centers = 0;
    derived.foreach_mapped_face_center(|origin, co, normal| {
        // Face points of the first level stay on their faces.
        assert!(normal.is_some());
        let axis = (0..3)
            .max_by(|&a, &b| co[a].abs().total_cmp(&co[b].abs()))
            .unwrap();
        assert!((co[axis].abs() - 0.5).abs() < 1.0e-6);
        assert!((0..6).contains(&origin));
        centers += 1;
    });
    assert_eq!(centers, 6);
}

#[test]
fn test_bounds() {
    let mesh = cube();
    let store = synced(1, &mesh);
    let derived = derive(&store, &mesh);
    let (min, max) = derived.min_max().unwrap();
    assert_close(min, max.map(|m| -m));
    // Face points touch the faces of the cage.
    assert_close(max, [0.5; 3]);
}

#[test]
fn test_edge_flags() {
    let edges = [[0, 1], [1, 2], [2, 3], [3, 0]];
    let flags = [
        EdgeFlags::SEAM | EdgeFlags::LOOSE,
        EdgeFlags::SHARP,
        EdgeFlags::empty(),
        EdgeFlags::empty(),
    ];
    let mut mesh = quad();
    mesh.edges(&edges, &[0; 4]).edge_flags(&flags);
    let store = synced(1, &mesh);
    let derived = derive(&store, &mesh);
    let index = |handle| store.edge_by_handle(EdgeHandle(handle)).unwrap().index();

    // Input loose flags are recomputed from the topology.
    let drawn = EdgeFlags::DRAW | EdgeFlags::RENDER;
    assert_eq!(derived.edge_flags()[index(0)], EdgeFlags::SEAM | drawn);
    assert_eq!(derived.edge_flags()[index(1)], EdgeFlags::SHARP | drawn);
    assert_eq!(derived.edge_flags()[index(2)], drawn);

    let segment = derived.edge_map()[index(0)].start_edge as usize;
    assert_eq!(derived.edge(segment).unwrap().flag, EdgeFlags::SEAM | drawn);
    assert_eq!(derived.edges().unwrap()[segment + 1].flag, EdgeFlags::SEAM | drawn);
    assert_eq!(derived.edge(0).unwrap().flag, drawn);
    assert_eq!(derived.edge(0).unwrap().crease, 0);
}

#[test]
fn test_loose_edges_are_flagged() {
    let positions = [0., 0., 0., 1., 0., 0., 1., 1., 0., 0., 1., 0., 0., 2., 0.];
    let edges = [[3, 4]];
    let mut mesh = MeshDescriptor::new(5, &QUAD_VERTICES_PER_FACE, &QUAD_INDICES).unwrap();
    mesh.positions(&positions).edges(&edges, &[0]);
    let store = synced(1, &mesh);
    let derived = derive(&store, &mesh);
    let loose = store.edge_by_handle(EdgeHandle(0)).unwrap().index();

    let drawn = EdgeFlags::DRAW | EdgeFlags::RENDER;
    for (e, &flag) in derived.edge_flags().iter().enumerate() {
        if e == loose {
            assert_eq!(flag, EdgeFlags::LOOSE | drawn);
        } else {
            assert_eq!(flag, drawn);
        }
    }
    assert_eq!(derived.vertex_count(), 9 + 5 * 3 + 5);
    assert_eq!(derived.edge_count(), 4 * 6 + 5 * 4);

    // Face edges without a handle have no source edge.
    let origins = derived.edge_origindex();
    for (e, entry) in derived.edge_map().iter().enumerate() {
        let expected = if e == loose { 0 } else { ORIGINDEX_NONE };
        assert_eq!(origins[entry.start_edge as usize], expected);
    }
}

#[test]
fn test_interior_edges_are_hidden_for_control_edges() {
    let mesh = quad();
    let store = synced(1, &mesh);
    let derived = DerivedMesh::new(
        StoreRef::Borrowed(&store),
        &mesh,
        DerivedOptions {
            draw_interior_edges: false,
            ..Default::default()
        },
    )
    .unwrap();

    let segment_base = derived.edge_map()[0].start_edge as usize;
    for (i, edge) in derived.edges().unwrap().iter().enumerate() {
        assert_eq!(
            edge.flag.contains(EdgeFlags::DRAW),
            segment_base <= i,
            "edge {i}"
        );
    }
}

#[test]
fn test_face_flags_and_materials() {
    let flag_mats = [
        FlagMat::default(),
        FlagMat::new(FaceFlags::empty(), 3),
        FlagMat::default(),
        FlagMat::default(),
        FlagMat::default(),
        FlagMat::default(),
    ];
    let mut mesh = cube();
    mesh.face_flags(&flag_mats);
    let store = synced(1, &mesh);
    let derived = derive(&store, &mesh);

    for (face, poly) in derived.faces().unwrap().iter().zip(derived.polys().unwrap()) {
        assert_eq!(face.mat_nr, poly.mat_nr);
        assert_eq!(face.flag, poly.flag);
    }
    let start = derived.face_map()[1].start_face as usize;
    let face = derived.face(start).unwrap();
    assert_eq!(face.mat_nr, 3);
    assert!(!face.flag.contains(FaceFlags::SMOOTH));
    assert!(derived.face(0).unwrap().flag.contains(FaceFlags::SMOOTH));

    let grids = derived.grid_set().unwrap();
    assert_eq!(grids.flag_mats()[4].mat_nr, 3);
    assert_eq!(grids.grid_face(4), 1);
    assert_eq!(grids.grid_offset(1), 4);
}

#[test]
fn test_grid_set_matches_final_vertices() {
    let mesh = cube();
    let store = synced(2, &mesh);
    let derived = derive(&store, &mesh);
    let grids = derived.grid_set().unwrap();
    let layout = derived.layout();
    let g = derived.grid_size();

    assert_eq!(grids.grid_count(), 24);
    assert_eq!(grids.key().elem_size(), 6);
    for grid in 0..grids.grid_count() {
        let face = grids.grid_face(grid);
        let corner = grid - grids.grid_offset(face);
        for y in 0..g {
            for x in 0..g {
                let element = grids.element(grid, x, y);
                let index = layout.face_vertex_index(face, corner, x, y) as usize;
                let vert = derived.vertex(index).unwrap();
                assert_eq!(&element[..3], &vert.co);
            }
        }
    }
    // Grids are built once.
    assert!(std::sync::Arc::ptr_eq(&grids, &derived.grid_set().unwrap()));
}

#[test]
fn test_vertex_attributes_are_interpolated() {
    let vertex_data = AttributeSet::new()
        .with_layer(AttributeLayer::f32(
            "weight",
            AttributeKind::Generic,
            1,
            vec![0.0, 1.0, 2.0, 3.0],
        ))
        .unwrap();
    let mut mesh = quad();
    mesh.vertex_attributes(&vertex_data);
    let store = synced(1, &mesh);
    let derived = derive(&store, &mesh);

    let layer = derived.vertex_data().unwrap().layer("weight").unwrap();
    assert_eq!(layer.len(), derived.vertex_count());
    let value = |index: u32| layer.f32_at(index as usize).unwrap()[0];
    let layout = derived.layout();

    assert!((value(layout.face_base(0)) - 1.5).abs() < 1.0e-6);
    for v in 0..4 {
        assert_eq!(value(layout.vert_index(v)), v as f32);
    }
    // Edge 0 connects vertices 0 and 1.
    assert!((value(layout.edge_vertex_index(0, 2)) - 0.5).abs() < 1.0e-6);
    let quarters = value(layout.edge_vertex_index(0, 1)) + value(layout.edge_vertex_index(0, 3));
    assert!((quarters - 1.0).abs() < 1.0e-6);
}

fn uv_layer(uvs: &[f32]) -> AttributeSet {
    AttributeSet::new()
        .with_layer(AttributeLayer::f32("uv", AttributeKind::Uv, 2, uvs.to_vec()))
        .unwrap()
}

#[test]
fn test_loop_attributes_are_interpolated() {
    let loop_data = uv_layer(&[0., 0., 1., 0., 1., 1., 0., 1.]);
    let mut mesh = quad();
    mesh.loop_attributes(&loop_data);
    let store = synced(1, &mesh);
    let derived = DerivedMesh::new(
        StoreRef::Borrowed(&store),
        &mesh,
        DerivedOptions {
            use_subsurf_uv: false,
            ..Default::default()
        },
    )
    .unwrap();

    let layer = derived.loop_data().unwrap().layer("uv").unwrap();
    assert_eq!(layer.len(), derived.loop_count());
    for (l, corner) in derived.loops().unwrap().iter().zip(0..) {
        let uv = layer.f32_at(corner).unwrap();
        if let Some(v) = derived.vert_map().iter().position(|&index| index == l.v) {
            assert_eq!(uv, &QUAD_POSITIONS[3 * v..3 * v + 2]);
        }
        if l.v == derived.layout().face_base(0) {
            assert_eq!(uv, &[0.5f32, 0.5]);
        }
    }
}

#[test]
fn test_subsurf_uvs_stay_in_the_unit_square() {
    let loop_data = uv_layer(&[0., 0., 1., 0., 1., 1., 0., 1.]);
    let mut mesh = quad();
    mesh.loop_attributes(&loop_data);
    let store = synced(2, &mesh);
    let derived = derive(&store, &mesh);

    let layer = derived.loop_data().unwrap().layer("uv").unwrap();
    let center = derived.layout().face_base(0);
    for (l, corner) in derived.loops().unwrap().iter().zip(0..) {
        let uv = layer.f32_at(corner).unwrap();
        assert!(uv.iter().all(|&c| (-1.0e-5..=1.0 + 1.0e-5).contains(&c)));
        if l.v == center {
            assert!((uv[0] - 0.5).abs() < 1.0e-5 && (uv[1] - 0.5).abs() < 1.0e-5);
        }
    }
}

#[test]
fn test_incomplete_stores_are_rejected() {
    let mesh = quad();
    let store = TopologyStore::new(1, 3, StoreOptions::default());
    assert!(DerivedMesh::new(StoreRef::Borrowed(&store), &mesh, DerivedOptions::default()).is_err());
}

#[test]
fn test_owned_stores() {
    let mesh = cube();
    let derived = DerivedMesh::new(
        StoreRef::Owned(Box::new(synced(1, &mesh))),
        &mesh,
        DerivedOptions::default(),
    )
    .unwrap();
    assert_eq!(derived.store().face_count(), 6);
    assert_eq!(derived.level(), 1);
}

#[test]
fn test_zero_levels_pass_the_mesh_through() {
    let mut cache = SubsurfCache::new();
    let settings = SubsurfSettings {
        levels: 0,
        render_levels: 0,
        ..Default::default()
    };
    let mesh = cube();
    for flags in [
        SubsurfFlags::empty(),
        SubsurfFlags::IS_FINAL_CALC,
        SubsurfFlags::USE_RENDER_PARAMS,
        SubsurfFlags::FOR_EDIT_MODE,
    ] {
        assert!(cache
            .make_derived(&mesh, &settings, None, flags)
            .unwrap()
            .is_none());
    }
}

#[test]
fn test_render_evaluation_uses_render_levels() {
    let mut cache = SubsurfCache::new();
    let mesh = cube();
    let settings = SubsurfSettings::default();
    {
        let derived = cache
            .make_derived(&mesh, &settings, None, SubsurfFlags::USE_RENDER_PARAMS)
            .unwrap()
            .unwrap();
        assert_eq!(derived.level(), 2);
        assert_eq!(derived.store().allocator_kind(), AllocatorKind::Arena);
    }
    assert!(cache.final_store().is_none());
    assert!(cache.edit_mode_store().is_none());
}

#[test]
fn test_edit_mode_store_is_reused() {
    let mut cache = SubsurfCache::new();
    let mesh = cube();
    let settings = SubsurfSettings::default();
    let edit = SubsurfFlags::FOR_EDIT_MODE | SubsurfFlags::IN_EDIT_MODE;

    for generation in 1..=2 {
        let derived = cache.make_derived(&mesh, &settings, None, edit).unwrap().unwrap();
        assert_eq!(derived.store().generation(), generation);
    }

    // Cage evaluations while in edit mode keep it.
    cache
        .make_derived(&mesh, &settings, None, SubsurfFlags::IN_EDIT_MODE)
        .unwrap();
    assert!(cache.edit_mode_store().is_some());

    // Leaving edit mode drops it.
    cache
        .make_derived(&mesh, &settings, None, SubsurfFlags::empty())
        .unwrap();
    assert!(cache.edit_mode_store().is_none());
}

#[test]
fn test_incremental_final_store_is_reused() {
    let mut cache = SubsurfCache::new();
    let mesh = cube();
    let settings = SubsurfSettings {
        incremental: true,
        ..Default::default()
    };
    for _ in 0..3 {
        cache
            .make_derived(&mesh, &settings, None, SubsurfFlags::IS_FINAL_CALC)
            .unwrap()
            .unwrap();
    }
    let store = cache.final_store().unwrap();
    assert_eq!(store.generation(), 3);
    assert_eq!(store.allocator_kind(), AllocatorKind::Heap);
}

#[test]
fn test_plain_final_store_is_rebuilt() {
    let mut cache = SubsurfCache::new();
    let mesh = cube();
    let settings = SubsurfSettings::default();
    for _ in 0..2 {
        cache
            .make_derived(&mesh, &settings, None, SubsurfFlags::IS_FINAL_CALC)
            .unwrap()
            .unwrap();
    }
    assert_eq!(cache.final_store().unwrap().generation(), 1);

    cache.clear();
    assert!(cache.final_store().is_none());
}

#[test]
fn test_vertex_cos_override() {
    let mut cache = SubsurfCache::new();
    let mesh = cube();
    let scaled = CUBE_POSITIONS.map(|c| 4.0 * c);
    let derived = cache
        .make_derived(&mesh, &SubsurfSettings::default(), Some(&scaled), SubsurfFlags::empty())
        .unwrap()
        .unwrap();
    let (_, max) = derived.min_max().unwrap();
    assert_close(max, [2.0; 3]);
}

#[test]
fn test_simple_subdivision_settings() {
    let mut cache = SubsurfCache::new();
    let mesh = quad();
    let settings = SubsurfSettings {
        levels: 2,
        subdiv_type: SubdivType::Simple,
        ..Default::default()
    };
    let derived = cache
        .make_derived(&mesh, &settings, None, SubsurfFlags::empty())
        .unwrap()
        .unwrap();
    // Corners of a simple subdivided quad stay put.
    for (v, &index) in derived.vert_map().iter().enumerate() {
        let co = derived.vertex(index as usize).unwrap().co;
        assert_close(co, [QUAD_POSITIONS[3 * v], QUAD_POSITIONS[3 * v + 1], 0.0]);
    }
    assert!(derived.store().options().simple_subdiv);
}

#[test]
fn test_paint_mask_is_loaded_on_request() {
    let masks = vec![
        GridPaintMask {
            level: 1,
            data: vec![0.25; 9],
        };
        4
    ];
    let mut mesh = quad();
    mesh.paint_mask(&masks);
    let mut cache = SubsurfCache::new();
    let derived = cache
        .make_derived(
            &mesh,
            &SubsurfSettings::default(),
            None,
            SubsurfFlags::ALLOC_PAINT_MASK,
        )
        .unwrap()
        .unwrap();

    let grids = derived.grid_set().unwrap();
    let offset = grids.key().mask_offset().unwrap();
    assert_eq!(grids.element(2, 1, 1)[offset], 0.25);
}

#[cfg(feature = "tri_mesh_buffers")]
#[test]
fn test_triangle_buffers() {
    let mesh = cube();
    let store = synced(1, &mesh);
    let derived = derive(&store, &mesh);

    let (index, points, normals) =
        subsurf_ccg::tri_mesh_buffers::to_triangle_mesh_buffers(&derived).unwrap();
    assert_eq!(index.len(), 6 * derived.face_count());
    assert_eq!(points.len(), 4 * derived.face_count());
    assert_eq!(normals.len(), points.len());
    // A convex closed surface has all normals facing the same side.
    let facing = points
        .iter()
        .zip(&normals)
        .map(|(p, n)| 0.0 < p[0] * n[0] + p[1] * n[1] + p[2] * n[2])
        .collect::<HashSet<_>>();
    assert_eq!(facing.len(), 1);
}
