use subsurf_ccg::{
    derived::{SubsurfCache, SubsurfFlags, SubsurfSettings},
    sync::MeshDescriptor,
};

fn main() -> anyhow::Result<()> {
    // Geometry for a cube control polyhedron.
    let vertices = [
        -0.5, -0.5, 0.5, 0.5, -0.5, 0.5, -0.5, 0.5, 0.5, 0.5, 0.5, 0.5, -0.5, 0.5, -0.5, 0.5, 0.5,
        -0.5, -0.5, -0.5, -0.5, 0.5, -0.5, -0.5,
    ];

    let verts_per_face = [4; 6];

    let vert_indices = [
        0, 1, 3, 2, 2, 3, 5, 4, 4, 5, 7, 6, 6, 7, 1, 0, 1, 7, 5, 3, 6, 0, 2, 4,
    ];

    // Crease the four edges around the top face.
    let edges = [
        [0, 1],
        [1, 3],
        [3, 2],
        [2, 0],
        [2, 4],
        [3, 5],
        [4, 5],
        [4, 6],
        [5, 7],
        [6, 7],
        [7, 1],
        [6, 0],
    ];
    let creases = [255, 255, 255, 255, 0, 0, 0, 0, 0, 0, 0, 0];

    let mut cube = MeshDescriptor::new(vertices.len() / 3, &verts_per_face, &vert_indices)?;
    cube.positions(&vertices).edges(&edges, &creases);

    let settings = SubsurfSettings {
        levels: 2,
        incremental: true,
        ..Default::default()
    };

    let mut cache = SubsurfCache::new();
    let Some(derived) = cache.make_derived(&cube, &settings, None, SubsurfFlags::IS_FINAL_CALC)?
    else {
        return Ok(());
    };

    println!(
        "{} vertices, {} edges, {} quads",
        derived.vertex_count(),
        derived.edge_count(),
        derived.face_count()
    );

    // Print the final vertices in Wavefront OBJ format.
    for vert in derived.vertices()? {
        println!("v {} {} {}", vert.co[0], vert.co[1], vert.co[2]);
    }

    for face in derived.faces()? {
        println!(
            "f {} {} {} {}",
            face.v[0] + 1,
            face.v[1] + 1,
            face.v[2] + 1,
            face.v[3] + 1
        );
    }

    Ok(())
}
