//! Tests for the topology store and its sync protocol.

mod test_utils;

use subsurf_ccg::{
    derived::{DerivedMesh, DerivedOptions, StoreRef},
    sync::{sync_from_mesh, MeshDescriptor},
    topology::*,
    Error,
};
use test_utils::*;

fn synced_cube(options: StoreOptions) -> TopologyStore {
    let mut store = TopologyStore::new(1, 3, options);
    sync_from_mesh(&mut store, &cube(), None, false).unwrap();
    store
}

#[test]
fn test_first_sync_creates_everything() {
    let mut store = TopologyStore::new(1, 3, StoreOptions::default());
    let stats = sync_from_mesh(&mut store, &cube(), None, false).unwrap();

    assert_eq!(stats.vert_count, 8);
    assert_eq!(stats.edge_count, 12);
    assert_eq!(stats.face_count, 6);
    assert_eq!(stats.added, 8 + 12 + 6);
    assert_eq!(stats.removed, 0);
    assert!(stats.topology_changed);
    assert_eq!(store.generation(), 1);
    assert!(store.grids().is_some());
}

#[test]
fn test_resync_is_idempotent() {
    let mut store = synced_cube(StoreOptions::default());
    let version = store.topology_version();
    let before = store.grids().unwrap().points().to_vec();

    let stats = sync_from_mesh(&mut store, &cube(), None, false).unwrap();
    assert_eq!(stats.added, 0);
    assert_eq!(stats.removed, 0);
    assert!(!stats.topology_changed);
    assert_eq!(store.topology_version(), version);
    assert_eq!(store.generation(), 2);

    let after = store.grids().unwrap().points();
    assert_eq!(before.len(), after.len());
    for (a, b) in before.iter().zip(after) {
        assert!((a - b).abs() < 1.0e-6);
    }
}

#[test]
fn test_moving_a_vertex_keeps_topology() {
    let mut store = synced_cube(StoreOptions::default());
    let version = store.topology_version();

    let mut positions = CUBE_POSITIONS;
    positions[3 * 3 + 2] = 2.0;
    let stats = sync_from_mesh(&mut store, &cube(), Some(&positions), false).unwrap();

    assert!(!stats.topology_changed);
    assert_eq!(store.topology_version(), version);
    assert_eq!(store.vert_by_handle(VertHandle(3)).unwrap().co(), &[0.5, 0.5, 2.0]);
}

#[test]
fn test_unsynced_elements_are_pruned() {
    let mut store = synced_cube(StoreOptions::default());

    // Drop the last face; its edges are all shared with other faces.
    let mut open = MeshDescriptor::new(8, &CUBE_VERTICES_PER_FACE[..5], &CUBE_INDICES[..20]).unwrap();
    open.positions(&CUBE_POSITIONS);
    let stats = sync_from_mesh(&mut store, &open, None, false).unwrap();

    assert_eq!(stats.removed, 1);
    assert_eq!(stats.face_count, 5);
    assert_eq!(stats.edge_count, 12);
    assert!(stats.topology_changed);
    assert!(store.face_by_handle(FaceHandle(5)).is_none());
    assert!(store.edges().any(|edge| edge.is_boundary()));
}

#[test]
fn test_sync_requires_a_generation() {
    let mut store = TopologyStore::new(1, 3, StoreOptions::default());
    assert!(matches!(
        store.sync_vert(VertHandle(0), &[0.0; 3], false),
        Err(Error::SyncNotStarted)
    ));
    assert!(matches!(store.process_sync(), Err(Error::SyncNotStarted)));
}

#[test]
fn test_wrong_vertex_width_is_rejected() {
    let mut store = TopologyStore::new(1, 3, StoreOptions::default());
    store.init_full_sync();
    assert!(matches!(
        store.sync_vert(VertHandle(0), &[0.0; 2], false),
        Err(Error::InvalidBufferSize {
            expected: 3,
            actual: 2
        })
    ));
}

#[test]
fn test_degenerate_faces_are_rejected() {
    let mut store = TopologyStore::new(1, 3, StoreOptions::default());
    store.init_full_sync();
    for i in 0..3 {
        store.sync_vert(VertHandle(i), &[i as f32, 0.0, 0.0], false).unwrap();
    }
    assert!(matches!(
        store.sync_face(FaceHandle(0), &[VertHandle(0), VertHandle(1)]),
        Err(Error::InvalidTopology(_))
    ));
    assert!(matches!(
        store.sync_face(FaceHandle(0), &[VertHandle(0), VertHandle(7), VertHandle(1)]),
        Err(Error::InvalidTopology(_))
    ));
    store.abort_sync();
    assert!(!store.is_syncing());
    assert_eq!(store.vert_count(), 0);
}

#[test]
fn test_failed_sync_keeps_the_previous_generation() {
    let mut store = synced_cube(StoreOptions::default());

    // Vertex 0 repeats consecutively in the first face.
    let mut broken = MeshDescriptor::new(8, &[4, 4], &[0, 0, 3, 2, 2, 3, 5, 4]).unwrap();
    broken.positions(&CUBE_POSITIONS);
    assert!(sync_from_mesh(&mut store, &broken, None, false).is_err());

    assert!(store.sync_incomplete());
    assert!(!store.is_syncing());
    assert_eq!(store.face_count(), 6);
    assert_eq!(store.edge_count(), 12);
    assert_eq!(store.generation(), 1);
    assert!(matches!(
        DerivedMesh::new(StoreRef::Borrowed(&store), &broken, DerivedOptions::default()),
        Err(Error::SyncIncomplete)
    ));

    // The next good sync clears the flag.
    sync_from_mesh(&mut store, &cube(), None, false).unwrap();
    assert!(!store.sync_incomplete());
}

#[test]
fn test_loose_edges_and_vertices() {
    let positions = [0., 0., 0., 1., 0., 0., 1., 1., 0., 0., 1., 0., 0., 2., 0.];
    let edges = [[3, 4]];
    let mut mesh = MeshDescriptor::new(5, &QUAD_VERTICES_PER_FACE, &QUAD_INDICES).unwrap();
    mesh.positions(&positions).edges(&edges, &[0]);

    let mut store = TopologyStore::new(1, 3, StoreOptions::default());
    let stats = sync_from_mesh(&mut store, &mesh, None, false).unwrap();
    assert_eq!(stats.edge_count, 5);

    let loose = store.edge_by_handle(EdgeHandle(0)).unwrap();
    assert!(loose.is_loose());
    assert_eq!(loose.index(), 0);
    // Face edges that were not synced explicitly have no handle.
    assert_eq!(store.edges().filter(|edge| edge.handle().is_none()).count(), 4);

    let tip = store.vert_by_handle(VertHandle(4)).unwrap();
    assert_eq!(tip.edge_count(), 1);
    assert_eq!(tip.face_count(), 0);

    // Loose geometry keeps its place in the final mesh.
    let grids = store.grids().unwrap();
    let layout = grids.layout();
    assert_close(grids.position(layout.vert_index(tip.index()) as usize), [0., 2., 0.]);
    let middle = layout.edge_vertex_index(loose.index(), layout.edge_size() / 2);
    assert_close(grids.position(middle as usize), [0., 1.5, 0.]);
}

#[test]
fn test_explicit_edge_creases() {
    let edges = [[0, 1], [1, 2], [2, 3], [3, 0]];
    let mut mesh = quad();
    mesh.edges(&edges, &[255, 0, 128, 0]);

    let mut store = TopologyStore::new(2, 3, StoreOptions::default());
    sync_from_mesh(&mut store, &mesh, None, false).unwrap();
    assert_eq!(store.crease_limit(), 3.0);

    let crease = |handle| store.edge_by_handle(EdgeHandle(handle)).unwrap().crease();
    assert_eq!(crease(0), 3.0);
    assert_eq!(crease(1), 0.0);
    assert!((crease(2) - 128.0 * 3.0 / 255.0).abs() < 1.0e-6);
}

#[test]
fn test_allocators_follow_options() {
    let heap = TopologyStore::new(1, 3, StoreOptions::default());
    assert_eq!(heap.allocator_kind(), AllocatorKind::Heap);

    let arena = TopologyStore::new(
        1,
        3,
        StoreOptions {
            use_arena: true,
            ..Default::default()
        },
    );
    assert_eq!(arena.allocator_kind(), AllocatorKind::Arena);
}

#[test]
fn test_stores_are_reused_when_compatible() {
    let store = synced_cube(StoreOptions::default());

    let reused = TopologyStore::new_or_reuse(Some(store), 3, 3, StoreOptions::default());
    assert_eq!(reused.generation(), 1);
    assert_eq!(reused.level(), 3);

    let aging = StoreOptions {
        use_aging: true,
        ..Default::default()
    };
    let fresh = TopologyStore::new_or_reuse(Some(reused), 3, 3, aging);
    assert_eq!(fresh.generation(), 0);
    assert_eq!(fresh.vert_count(), 0);
}

#[test]
fn test_level_is_clamped() {
    let store = TopologyStore::new(0, 3, StoreOptions::default());
    assert_eq!(store.level(), 1);
    assert_eq!(store.grid_key().grid_size, 3);
}

#[test]
fn test_aging_counts_generations() {
    let mut store = synced_cube(StoreOptions {
        use_aging: true,
        ..Default::default()
    });
    for _ in 0..3 {
        sync_from_mesh(&mut store, &cube(), None, false).unwrap();
    }
    assert!(store.verts().all(|vert| 3 == vert.age()));

    let plain = synced_cube(StoreOptions::default());
    assert!(plain.verts().all(|vert| 0 == vert.age()));
}
