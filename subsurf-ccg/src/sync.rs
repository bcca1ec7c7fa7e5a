//! Feeding a polygon mesh into a [`TopologyStore`].
//!
//! ## Example
//! ```
//! # use subsurf_ccg::{sync::{sync_from_mesh, MeshDescriptor}, topology::*};
//! let positions = [0., 0., 0., 1., 0., 0., 1., 1., 0., 0., 1., 0.];
//!
//! let mut quad = MeshDescriptor::new(4, &[4], &[0, 1, 2, 3])?;
//! quad.positions(&positions);
//!
//! let mut store = TopologyStore::new(1, 3, StoreOptions::default());
//! let stats = sync_from_mesh(&mut store, &quad, None, false)?;
//!
//! assert_eq!(stats.edge_count, 4);
//! assert_eq!(store.vert(2).map(|v| v.user().origin), Some(2));
//! # Ok::<(), subsurf_ccg::Error>(())
//! ```
use crate::{
    attributes::AttributeSet,
    derived::{EdgeFlags, FlagMat},
    displacement::{GridHidden, GridPaintMask},
    topology::{EdgeHandle, FaceHandle, StoreOptions, TopologyStore, VertHandle},
    Error, Result, ORIGINDEX_NONE,
};
use smallvec::SmallVec;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

pub use crate::topology::SyncStats;

/// A polygon mesh given as flat buffers plus optional per element layers.
///
/// Faces are given as loops. Loop `i` of face `f` is the global loop
/// [`loop_start(f)`](Self::loop_start)` + i`; per loop layers are indexed
/// by global loop.
#[derive(Clone, Debug)]
pub struct MeshDescriptor<'a> {
    vertices_len: usize,
    vertices_per_face: &'a [u32],
    vertex_indices_per_face: &'a [u32],
    loop_starts: Vec<usize>,
    positions: Option<&'a [f32]>,
    edges: Option<&'a [[u32; 2]]>,
    edge_creases: Option<&'a [u8]>,
    vertex_origin_index: Option<&'a [i32]>,
    edge_origin_index: Option<&'a [i32]>,
    face_origin_index: Option<&'a [i32]>,
    face_flags: Option<&'a [FlagMat]>,
    edge_flags: Option<&'a [EdgeFlags]>,
    merged_vertices: Option<&'a [bool]>,
    vertex_attributes: Option<&'a AttributeSet>,
    loop_attributes: Option<&'a AttributeSet>,
    grid_hidden: Option<&'a [GridHidden]>,
    paint_mask: Option<&'a [GridPaintMask]>,
}

impl<'a> MeshDescriptor<'a> {
    /// Describes the faces of a mesh.
    ///
    /// # Arguments
    ///
    /// * `vertices_len` - The number of vertices in the mesh.
    /// * `vertices_per_face` - The number of vertices of each face.
    /// * `vertex_indices_per_face` - A flat list of the vertex indices of
    ///   each face.
    pub fn new(
        vertices_len: usize,
        vertices_per_face: &'a [u32],
        vertex_indices_per_face: &'a [u32],
    ) -> Result<MeshDescriptor<'a>> {
        if let Some((face, &n)) = vertices_per_face.iter().enumerate().find(|&(_, &n)| n < 3) {
            return Err(Error::InvalidTopology(format!(
                "Face {face} has {n} vertices, at least 3 are needed."
            )));
        }

        let index_count = vertices_per_face.iter().map(|&n| n as usize).sum::<usize>();
        if vertex_indices_per_face.len() != index_count {
            return Err(Error::InvalidTopology(
                "The number of vertex indices is not equal to the sum of face arities."
                    .to_string(),
            ));
        }

        #[cfg(feature = "topology_validation")]
        for (i, &vertex_index) in vertex_indices_per_face.iter().enumerate() {
            if vertices_len <= vertex_index as usize {
                return Err(Error::InvalidTopology(format!(
                    "Vertex index[{i}] = {vertex_index} is out of range (should be < {vertices_len})."
                )));
            }
        }

        let mut loop_starts = Vec::with_capacity(vertices_per_face.len());
        let mut start = 0;
        for &n in vertices_per_face {
            loop_starts.push(start);
            start += n as usize;
        }

        Ok(MeshDescriptor {
            vertices_len,
            vertices_per_face,
            vertex_indices_per_face,
            loop_starts,
            positions: None,
            edges: None,
            edge_creases: None,
            vertex_origin_index: None,
            edge_origin_index: None,
            face_origin_index: None,
            face_flags: None,
            edge_flags: None,
            merged_vertices: None,
            vertex_attributes: None,
            loop_attributes: None,
            grid_hidden: None,
            paint_mask: None,
        })
    }

    /// Vertex positions as a flat buffer, three floats per vertex.
    #[inline]
    pub fn positions(&mut self, positions: &'a [f32]) -> &mut Self {
        self.positions = Some(positions);
        self
    }

    /// Explicit edges as vertex index pairs with a `0..=255` crease each.
    ///
    /// Without explicit edges the edges are derived from the face loops,
    /// in order of first use.
    #[inline]
    pub fn edges(&mut self, edges: &'a [[u32; 2]], creases: &'a [u8]) -> &mut Self {
        self.edges = Some(edges);
        self.edge_creases = Some(creases);
        self
    }

    /// Index of the source vertex of every vertex. Defaults to the vertex
    /// index.
    #[inline]
    pub fn vertex_origin_index(&mut self, origin: &'a [i32]) -> &mut Self {
        self.vertex_origin_index = Some(origin);
        self
    }

    #[inline]
    pub fn edge_origin_index(&mut self, origin: &'a [i32]) -> &mut Self {
        self.edge_origin_index = Some(origin);
        self
    }

    #[inline]
    pub fn face_origin_index(&mut self, origin: &'a [i32]) -> &mut Self {
        self.face_origin_index = Some(origin);
        self
    }

    /// Shading flags and material of every face.
    #[inline]
    pub fn face_flags(&mut self, flags: &'a [FlagMat]) -> &mut Self {
        self.face_flags = Some(flags);
        self
    }

    /// Flags of every explicit edge. Only [`EdgeFlags::SEAM`] and
    /// [`EdgeFlags::SHARP`] are carried over.
    #[inline]
    pub fn edge_flags(&mut self, flags: &'a [EdgeFlags]) -> &mut Self {
        self.edge_flags = Some(flags);
        self
    }

    /// Vertices whose texture coordinates are welded across seams.
    #[inline]
    pub fn merged_vertices(&mut self, merged: &'a [bool]) -> &mut Self {
        self.merged_vertices = Some(merged);
        self
    }

    /// Per vertex attributes, interpolated onto the final vertices.
    #[inline]
    pub fn vertex_attributes(&mut self, attributes: &'a AttributeSet) -> &mut Self {
        self.vertex_attributes = Some(attributes);
        self
    }

    /// Per loop attributes, interpolated onto the final loops.
    #[inline]
    pub fn loop_attributes(&mut self, attributes: &'a AttributeSet) -> &mut Self {
        self.loop_attributes = Some(attributes);
        self
    }

    /// Hidden grid points, one entry per loop.
    #[inline]
    pub fn grid_hidden(&mut self, hidden: &'a [GridHidden]) -> &mut Self {
        self.grid_hidden = Some(hidden);
        self
    }

    /// Sculpt paint mask, one entry per loop.
    #[inline]
    pub fn paint_mask(&mut self, mask: &'a [GridPaintMask]) -> &mut Self {
        self.paint_mask = Some(mask);
        self
    }

    #[inline]
    pub fn vertices_len(&self) -> usize {
        self.vertices_len
    }

    #[inline]
    pub fn faces_len(&self) -> usize {
        self.vertices_per_face.len()
    }

    #[inline]
    pub fn loops_len(&self) -> usize {
        self.vertex_indices_per_face.len()
    }

    /// Number of explicit edges, `0` if edges are derived.
    #[inline]
    pub fn edges_len(&self) -> usize {
        self.edges.map_or(0, <[_]>::len)
    }

    /// Global index of the first loop of `face`.
    #[inline]
    pub fn loop_start(&self, face: usize) -> usize {
        self.loop_starts[face]
    }

    /// The vertex indices of `face`.
    pub fn face_vertices(&self, face: usize) -> &'a [u32] {
        let start = self.loop_start(face);
        &self.vertex_indices_per_face[start..start + self.vertices_per_face[face] as usize]
    }

    pub fn position_buffer(&self) -> Option<&'a [f32]> {
        self.positions
    }

    pub fn explicit_edges(&self) -> Option<&'a [[u32; 2]]> {
        self.edges
    }

    /// Crease of explicit edge `edge`, `0` when none is given.
    pub fn edge_crease(&self, edge: usize) -> u8 {
        self.edge_creases
            .and_then(|creases| creases.get(edge))
            .copied()
            .unwrap_or(0)
    }

    pub fn face_flag_mat(&self, face: usize) -> Option<FlagMat> {
        self.face_flags?.get(face).copied()
    }

    pub fn has_edge_flags(&self) -> bool {
        self.edge_flags.is_some()
    }

    pub fn edge_flag(&self, edge: usize) -> EdgeFlags {
        self.edge_flags
            .and_then(|flags| flags.get(edge))
            .copied()
            .unwrap_or_default()
    }

    pub fn is_merged(&self, vertex: usize) -> bool {
        self.merged_vertices
            .and_then(|merged| merged.get(vertex))
            .copied()
            .unwrap_or(false)
    }

    pub fn vertex_attribute_set(&self) -> Option<&'a AttributeSet> {
        self.vertex_attributes
    }

    pub fn loop_attribute_set(&self) -> Option<&'a AttributeSet> {
        self.loop_attributes
    }

    pub fn grid_hidden_layer(&self) -> Option<&'a [GridHidden]> {
        self.grid_hidden
    }

    pub fn paint_mask_layer(&self) -> Option<&'a [GridPaintMask]> {
        self.paint_mask
    }

    fn origin(layer: Option<&[i32]>, index: usize) -> i32 {
        match layer {
            Some(layer) => layer.get(index).copied().unwrap_or(ORIGINDEX_NONE),
            None => index as i32,
        }
    }

    /// Checks the lengths of every optional layer.
    pub fn validate(&self) -> Result<()> {
        let loops = self.loops_len();
        let faces = self.faces_len();
        let verts = self.vertices_len;
        let edges = self.edges_len();

        let check = |len: Option<usize>, expected: usize| match len {
            Some(len) => Error::check_len(expected, len),
            None => Ok(()),
        };
        check(self.positions.map(<[_]>::len), 3 * verts)?;
        check(self.edge_creases.map(<[_]>::len), edges)?;
        check(self.vertex_origin_index.map(<[_]>::len), verts)?;
        check(self.edge_origin_index.map(<[_]>::len), edges)?;
        check(self.face_origin_index.map(<[_]>::len), faces)?;
        check(self.face_flags.map(<[_]>::len), faces)?;
        check(self.edge_flags.map(<[_]>::len), edges)?;
        check(self.merged_vertices.map(<[_]>::len), verts)?;
        check(self.vertex_attributes.map(AttributeSet::len), verts)?;
        check(self.loop_attributes.map(AttributeSet::len), loops)?;
        check(self.grid_hidden.map(<[_]>::len), loops)?;
        check(self.paint_mask.map(<[_]>::len), loops)?;

        #[cfg(feature = "topology_validation")]
        if let Some(pairs) = self.edges {
            for (i, pair) in pairs.iter().enumerate() {
                if let Some(&v) = pair.iter().find(|&&v| verts <= v as usize) {
                    return Err(Error::InvalidTopology(format!(
                        "Edge[{i}] vertex {v} is out of range (should be < {verts})."
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Set once the first failed sync has been reported.
static SYNC_ERROR_REPORTED: AtomicBool = AtomicBool::new(false);

/// Logs the first sync failure of the process.
fn report_sync_error(error: &Error) {
    if !SYNC_ERROR_REPORTED.swap(true, Ordering::Relaxed) {
        log::warn!("Unrecoverable error in subdivision surface sync: {error}");
    }
}

/// Runs one full sync generation from `mesh`.
///
/// Vertex positions come from `override_positions` if given, otherwise from
/// the mesh. With `flatten_creases` every edge is fully creased, which
/// together with [`StoreOptions::simple_subdiv`] yields simple
/// subdivision.
///
/// On failure the generation is rolled back, the store is flagged as
/// [`sync_incomplete()`](TopologyStore::sync_incomplete) and the error is
/// returned. Only the first failure per process is logged.
#[cfg_attr(feature = "tracing", tracing::instrument(skip_all, name = "sync::mesh"))]
pub fn sync_from_mesh(
    store: &mut TopologyStore,
    mesh: &MeshDescriptor,
    override_positions: Option<&[f32]>,
    flatten_creases: bool,
) -> Result<SyncStats> {
    let result = mesh.validate().and_then(|()| {
        let positions = override_positions
            .or(mesh.positions)
            .ok_or(Error::InvalidBufferSize {
                expected: 3 * mesh.vertices_len,
                actual: 0,
            })?;
        Error::check_len(3 * mesh.vertices_len, positions.len())?;
        store.init_full_sync();
        sync_elements(store, mesh, positions, flatten_creases)
    });

    if let Err(error) = result {
        report_sync_error(&error);
        store.set_sync_incomplete();
        store.abort_sync();
        return Err(error);
    }
    store.process_sync().map_err(|error| {
        report_sync_error(&error);
        store.set_sync_incomplete();
        error
    })
}

fn sync_elements(
    store: &mut TopologyStore,
    mesh: &MeshDescriptor,
    positions: &[f32],
    flatten_creases: bool,
) -> Result<()> {
    let layers = store.layers();
    let limit = store.crease_limit();
    let crease = |c: u8| {
        if flatten_creases {
            limit
        } else {
            c as f32 * limit / 255.0
        }
    };

    let mut co = SmallVec::<[f32; 4]>::from_elem(0.0, layers);
    for (i, p) in positions.chunks_exact(3).enumerate() {
        for (c, &v) in co.iter_mut().zip(p) {
            *c = v;
        }
        store.sync_vert(VertHandle(i as _), &co, false)?;
    }

    let edge_count = match mesh.edges {
        Some(pairs) => {
            for (i, &[v0, v1]) in pairs.iter().enumerate() {
                store.sync_edge(
                    EdgeHandle(i as _),
                    VertHandle(v0),
                    VertHandle(v1),
                    crease(mesh.edge_crease(i)),
                )?;
            }
            pairs.len()
        }
        None => {
            let mut seen = HashSet::new();
            for face in 0..mesh.faces_len() {
                let verts = mesh.face_vertices(face);
                for (i, &v0) in verts.iter().enumerate() {
                    let v1 = verts[(i + 1) % verts.len()];
                    if v0 != v1 && seen.insert((v0.min(v1), v0.max(v1))) {
                        store.sync_edge(
                            EdgeHandle(seen.len() as u32 - 1),
                            VertHandle(v0),
                            VertHandle(v1),
                            crease(0),
                        )?;
                    }
                }
            }
            seen.len()
        }
    };

    let mut handles = SmallVec::<[VertHandle; 8]>::new();
    for face in 0..mesh.faces_len() {
        handles.clear();
        handles.extend(mesh.face_vertices(face).iter().map(|&v| VertHandle(v)));
        store.sync_face(FaceHandle(face as _), &handles)?;
    }

    for i in 0..mesh.vertices_len {
        if let Some(user) = store.vert_user_mut(VertHandle(i as _)) {
            user.origin = MeshDescriptor::origin(mesh.vertex_origin_index, i);
        }
    }
    for i in 0..edge_count {
        if let Some(user) = store.edge_user_mut(EdgeHandle(i as _)) {
            user.origin = MeshDescriptor::origin(mesh.edge_origin_index, i);
        }
    }
    for i in 0..mesh.faces_len() {
        if let Some(user) = store.face_user_mut(FaceHandle(i as _)) {
            user.origin = MeshDescriptor::origin(mesh.face_origin_index, i);
        }
    }
    Ok(())
}

/// Computes the limit surface position of every mesh vertex.
///
/// Uses one smoothing pass and the closed form limit mask
/// `(p·N² + 4·Σe + Σf) / (N·(N + 5))` for a vertex of `N` edges. Face
/// sums of vertices with a different number of faces than edges are
/// rescaled by `N / faces`. Vertices without edges keep their position.
#[cfg_attr(feature = "tracing", tracing::instrument(skip_all, name = "sync::limit"))]
pub fn calculate_limit_positions(mesh: &MeshDescriptor) -> Result<Vec<[f32; 3]>> {
    let mut store = TopologyStore::new(
        1,
        3,
        StoreOptions {
            use_arena: true,
            calc_normals: false,
            ..Default::default()
        },
    );
    sync_from_mesh(&mut store, mesh, None, false)?;
    let first = store.first_pass()?;
    let point = |points: &[f32], index: usize| -> [f32; 3] {
        let p = &points[3 * index..3 * index + 3];
        [p[0], p[1], p[2]]
    };

    let mut limits = vec![[0.0; 3]; mesh.vertices_len];
    for vert in store.verts() {
        let Some(out) = limits.get_mut(vert.handle().0 as usize) else {
            continue;
        };
        let co = point(&first.vert_points, vert.index());
        let n = vert.edge_count();
        if 0 == n {
            *out = co;
            continue;
        }

        let mut edge_sum = [0.0f32; 3];
        for e in vert.edges() {
            let p = point(&first.edge_points, e);
            (0..3).for_each(|k| edge_sum[k] += p[k]);
        }
        let mut face_sum = [0.0f32; 3];
        for f in vert.faces() {
            let p = point(&first.face_points, f);
            (0..3).for_each(|k| face_sum[k] += p[k]);
        }
        let face_count = vert.face_count();
        if 0 != face_count && face_count != n {
            let scale = n as f32 / face_count as f32;
            face_sum = face_sum.map(|f| f * scale);
        }

        let n = n as f32;
        for k in 0..3 {
            out[k] = (co[k] * n * n + 4.0 * edge_sum[k] + face_sum[k]) / (n * (n + 5.0));
        }
    }
    Ok(limits)
}
