//! Tests for grid evaluation through the store.

mod test_utils;

use subsurf_ccg::{
    grid::GridKey,
    sync::sync_from_mesh,
    topology::{StoreOptions, TopologyStore},
};
use test_utils::*;

#[test]
fn test_cube_stays_symmetric() {
    let mut store = TopologyStore::new(2, 3, StoreOptions::default());
    sync_from_mesh(&mut store, &cube(), None, false).unwrap();
    let grids = store.grids().unwrap();
    assert_eq!(grids.vertex_count(), 386);

    let mut min = [f32::MAX; 3];
    let mut max = [f32::MIN; 3];
    for i in 0..grids.vertex_count() {
        let p = grids.position(i);
        for k in 0..3 {
            min[k] = min[k].min(p[k]);
            max[k] = max[k].max(p[k]);
            // Smoothing shrinks the cube.
            assert!(p[k].abs() < 0.5);
        }
    }
    assert_close(min, max.map(|m| -m));
}

#[test]
fn test_smoothed_cube_corners_move_inwards() {
    let mut store = TopologyStore::new(1, 3, StoreOptions::default());
    sync_from_mesh(&mut store, &cube(), None, false).unwrap();
    let grids = store.grids().unwrap();
    let layout = grids.layout();

    for vert in store.verts() {
        let co = vert.co();
        let p = grids.position(layout.vert_index(vert.index()) as usize);
        for k in 0..3 {
            assert_eq!(p[k].signum(), co[k].signum());
            assert!(p[k].abs() < co[k].abs());
        }
        // All corners move by the same amount.
        assert!((p[0].abs() - p[1].abs()).abs() < 1.0e-6);
        assert!((p[1].abs() - p[2].abs()).abs() < 1.0e-6);
    }
}

#[test]
fn test_fully_creased_cube_keeps_its_shape() {
    let mut store = TopologyStore::new(2, 3, StoreOptions::default());
    sync_from_mesh(&mut store, &cube(), None, true).unwrap();
    let grids = store.grids().unwrap();
    let layout = grids.layout();

    for vert in store.verts() {
        let p = grids.position(layout.vert_index(vert.index()) as usize);
        assert_close(p, [vert.co()[0], vert.co()[1], vert.co()[2]]);
    }
    for i in 0..grids.vertex_count() {
        let p = grids.position(i);
        assert!(p.iter().any(|c| (c.abs() - 0.5).abs() < 1.0e-5));
    }
}

#[test]
fn test_flat_plane_stays_flat() {
    let mut store = TopologyStore::new(2, 3, StoreOptions::default());
    sync_from_mesh(&mut store, &plane(), None, false).unwrap();
    let grids = store.grids().unwrap();

    for i in 0..grids.vertex_count() {
        assert!(grids.position(i)[2].abs() < 1.0e-6);
        assert!((grids.normal(i)[2] - 1.0).abs() < 1.0e-5);
    }

    // The regular inner vertex does not move.
    let center = grids.layout().vert_index(4) as usize;
    assert_close(grids.position(center), [1., 1., 0.]);
}

#[test]
fn test_simple_subdivision_is_bilinear() {
    let mut store = TopologyStore::new(
        2,
        3,
        StoreOptions {
            simple_subdiv: true,
            ..Default::default()
        },
    );
    sync_from_mesh(&mut store, &quad(), None, true).unwrap();
    let grids = store.grids().unwrap();

    // Level 2 cuts the quad into 8 × 8 cells.
    for i in 0..grids.vertex_count() {
        for c in grids.position(i) {
            assert!((c * 8.0 - (c * 8.0).round()).abs() < 1.0e-4);
        }
    }
    assert_close(grids.position(grids.layout().face_base(0) as usize), [0.5, 0.5, 0.]);
}

#[test]
fn test_grid_keys() {
    let store = TopologyStore::new(
        3,
        3,
        StoreOptions {
            alloc_mask: true,
            calc_normals: false,
            ..Default::default()
        },
    );
    assert_eq!(store.grid_key(), GridKey::new(3, 3, false, true));
    assert_eq!(store.grid_key().elem_size(), 4);
    assert_eq!(store.grid_key().edge_size(), 17);
}

#[test]
fn test_normals_are_optional() {
    let mut store = TopologyStore::new(
        1,
        3,
        StoreOptions {
            calc_normals: false,
            ..Default::default()
        },
    );
    sync_from_mesh(&mut store, &quad(), None, false).unwrap();
    let grids = store.grids().unwrap();
    assert!(grids.normals().is_empty());
    assert_eq!(grids.normal(0), [0.0; 3]);
}

#[test]
fn test_level_change_rebuilds_grids() {
    let mut store = TopologyStore::new(1, 3, StoreOptions::default());
    sync_from_mesh(&mut store, &cube(), None, false).unwrap();
    assert_eq!(store.grids().unwrap().vertex_count(), 98);

    store.set_level(2);
    sync_from_mesh(&mut store, &cube(), None, false).unwrap();
    assert_eq!(store.grids().unwrap().vertex_count(), 386);
    assert_eq!(store.grids().unwrap().key().grid_size, 5);
}
