use subsurf_ccg::{
    derived::{DerivedMesh, DerivedOptions, StoreRef},
    sync::{sync_from_mesh, MeshDescriptor},
    topology::{StoreOptions, TopologyStore},
    tri_mesh_buffers::to_triangle_mesh_buffers,
};

fn main() -> anyhow::Result<()> {
    let vertices = [
        -0.5, -0.5, 0.5, 0.5, -0.5, 0.5, -0.5, 0.5, 0.5, 0.5, 0.5, 0.5, -0.5, 0.5, -0.5, 0.5, 0.5,
        -0.5, -0.5, -0.5, -0.5, 0.5, -0.5, -0.5,
    ];
    let verts_per_face = [4; 6];
    let vert_indices = [
        0, 1, 3, 2, 2, 3, 5, 4, 4, 5, 7, 6, 6, 7, 1, 0, 1, 7, 5, 3, 6, 0, 2, 4,
    ];

    let mut cube = MeshDescriptor::new(vertices.len() / 3, &verts_per_face, &vert_indices)?;
    cube.positions(&vertices);

    let mut store = TopologyStore::new(3, 3, StoreOptions::default());
    let stats = sync_from_mesh(&mut store, &cube, None, false)?;
    println!("Synced {stats:?}");

    let derived = DerivedMesh::new(StoreRef::Borrowed(&store), &cube, DerivedOptions::default())?;
    let (index, points, normals) = to_triangle_mesh_buffers(&derived)?;

    println!(
        "{} triangles, {} points, {} normals",
        index.len() / 3,
        points.len(),
        normals.len()
    );

    Ok(())
}
