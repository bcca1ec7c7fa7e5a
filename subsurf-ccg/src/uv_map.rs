//! Texture coordinate islands and the UV store.
//!
//! The loops around a mesh vertex are grouped by UV position: loops whose
//! coordinates lie within [`STD_UV_CONNECT_LIMIT`] of each other and whose
//! faces have the same UV winding share one UV vertex. A UV store is a
//! [`TopologyStore`] with two layers whose vertices are these groups, so
//! refining it subdivides the UV map without bleeding across seams.
use crate::{
    sync::MeshDescriptor,
    topology::{EdgeHandle, FaceHandle, SyncStats, TopologyStore, VertHandle},
    Error, Result,
};
use smallvec::SmallVec;
use std::collections::HashSet;

/// Largest per axis UV distance of loops that are connected.
pub const STD_UV_CONNECT_LIMIT: f32 = 0.0001;

/// One loop around a mesh vertex.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct UvMapEntry {
    pub face: u32,
    /// Corner of the vertex within `face`.
    pub corner: u32,
    /// First entry of a new UV group.
    pub separate: bool,
}

/// Loops around every mesh vertex, grouped by UV position.
///
/// ```
/// # use subsurf_ccg::{sync::MeshDescriptor, uv_map::UvVertMap};
/// // Two quads sharing the edge 1-2 but not its UVs.
/// let mesh = MeshDescriptor::new(6, &[4, 4], &[0, 1, 2, 3, 1, 4, 5, 2])?;
/// let uvs = [
///     [0.0, 0.0], [0.5, 0.0], [0.5, 1.0], [0.0, 1.0],
///     [0.6, 0.0], [1.0, 0.0], [1.0, 1.0], [0.6, 1.0],
/// ];
/// let map = UvVertMap::new(&mesh, &uvs, 1.0e-4)?;
///
/// assert_eq!(map.group_count(0), 1);
/// assert_eq!(map.group_count(1), 2);
/// # Ok::<(), subsurf_ccg::Error>(())
/// ```
#[derive(Clone, Debug, Default)]
pub struct UvVertMap {
    offsets: Vec<u32>,
    entries: Vec<UvMapEntry>,
}

impl UvVertMap {
    /// Groups the loops of `mesh` by the per loop coordinates `uvs`.
    pub fn new(mesh: &MeshDescriptor, uvs: &[[f32; 2]], limit: f32) -> Result<Self> {
        Error::check_len(mesh.loops_len(), uvs.len())?;

        let winding = (0..mesh.faces_len())
            .map(|face| {
                let start = mesh.loop_start(face);
                0.0 < signed_area(&uvs[start..start + mesh.face_vertices(face).len()])
            })
            .collect::<Vec<_>>();

        // Newest loop first.
        let mut around = vec![Vec::new(); mesh.vertices_len()];
        for face in 0..mesh.faces_len() {
            for (corner, &v) in mesh.face_vertices(face).iter().enumerate() {
                if let Some(list) = around.get_mut(v as usize) {
                    list.push(UvMapEntry {
                        face: face as _,
                        corner: corner as _,
                        separate: false,
                    });
                }
            }
        }

        let uv_of = |entry: &UvMapEntry| uvs[mesh.loop_start(entry.face as usize) + entry.corner as usize];

        let mut offsets = Vec::with_capacity(around.len() + 1);
        let mut entries = Vec::with_capacity(uvs.len());
        offsets.push(0);
        let mut pending = Vec::new();
        let mut grouped = Vec::new();
        for mut list in around {
            list.reverse();
            pending.clear();
            pending.extend(list);
            grouped.clear();

            while !pending.is_empty() {
                let head = pending.remove(0);
                let uv = uv_of(&head);
                let head_winding = winding[head.face as usize];
                grouped.push(head);

                let mut i = 0;
                while i < pending.len() {
                    let other = uv_of(&pending[i]);
                    if (uv[0] - other[0]).abs() < limit
                        && (uv[1] - other[1]).abs() < limit
                        && winding[pending[i].face as usize] == head_winding
                    {
                        grouped.push(pending.remove(i));
                    } else {
                        i += 1;
                    }
                }
                if let Some(last) = grouped.last_mut() {
                    last.separate = true;
                }
            }

            entries.extend(grouped.iter().rev().copied());
            offsets.push(entries.len() as u32);
        }

        Ok(Self { offsets, entries })
    }

    /// The loops around `vert`. Every group starts at an entry flagged
    /// [`separate`](UvMapEntry::separate).
    pub fn entries(&self, vert: usize) -> &[UvMapEntry] {
        match (self.offsets.get(vert), self.offsets.get(vert + 1)) {
            (Some(&start), Some(&end)) => &self.entries[start as usize..end as usize],
            _ => &[],
        }
    }

    /// Number of UV groups around `vert`.
    pub fn group_count(&self, vert: usize) -> usize {
        self.entries(vert).iter().filter(|entry| entry.separate).count()
    }

    /// The group head of the loop of `face` at `vert`.
    pub fn group_head(&self, vert: usize, face: usize) -> Option<UvMapEntry> {
        let entries = self.entries(vert);
        let mut head = *entries.first()?;
        for entry in entries {
            if entry.separate {
                head = *entry;
            }
            if entry.face as usize == face {
                break;
            }
        }
        Some(head)
    }
}

fn signed_area(uvs: &[[f32; 2]]) -> f32 {
    let n = uvs.len();
    (0..n)
        .map(|i| {
            let (a, b) = (uvs[i], uvs[(i + 1) % n]);
            a[0] * b[1] - a[1] * b[0]
        })
        .sum::<f32>()
        * 0.5
}

/// Runs one sync generation of `uv_store` from the per loop coordinates
/// `uvs` of `mesh`.
///
/// A UV vertex is keyed by the global loop of its group head. Its seam
/// flag is set if the mesh vertex has more than one group or is
/// [merged](MeshDescriptor::merged_vertices). UV edges take the crease of
/// the matching edge in `orig_store`, which must be synced from `mesh`,
/// and are fully creased between two merged vertices.
#[cfg_attr(feature = "tracing", tracing::instrument(skip_all, name = "sync::uv"))]
pub fn sync_from_uv(
    uv_store: &mut TopologyStore,
    orig_store: &TopologyStore,
    mesh: &MeshDescriptor,
    uvs: &[[f32; 2]],
) -> Result<SyncStats> {
    let map = UvVertMap::new(mesh, uvs, STD_UV_CONNECT_LIMIT)?;

    uv_store.init_full_sync();
    if let Err(error) = sync_uv_elements(uv_store, orig_store, mesh, uvs, &map) {
        uv_store.set_sync_incomplete();
        uv_store.abort_sync();
        return Err(error);
    }
    uv_store.process_sync().map_err(|error| {
        uv_store.set_sync_incomplete();
        error
    })
}

fn sync_uv_elements(
    uv_store: &mut TopologyStore,
    orig_store: &TopologyStore,
    mesh: &MeshDescriptor,
    uvs: &[[f32; 2]],
    map: &UvVertMap,
) -> Result<()> {
    let layers = uv_store.layers();
    let mut co = SmallVec::<[f32; 4]>::from_elem(0.0, layers);
    for vert in 0..mesh.vertices_len() {
        let entries = map.entries(vert);
        if entries.is_empty() {
            continue;
        }
        let seam = entries[1..].iter().any(|entry| entry.separate) || mesh.is_merged(vert);
        for entry in entries.iter().filter(|entry| entry.separate) {
            let loop_index = mesh.loop_start(entry.face as usize) + entry.corner as usize;
            for (c, &v) in co.iter_mut().zip(&uvs[loop_index]) {
                *c = v;
            }
            uv_store.sync_vert(VertHandle(loop_index as _), &co, seam)?;
        }
    }

    let limit = uv_store.crease_limit();
    let mut seen = HashSet::new();
    let mut face_verts = SmallVec::<[VertHandle; 8]>::new();
    for face in 0..mesh.faces_len() {
        let verts = mesh.face_vertices(face);
        let start = mesh.loop_start(face);
        face_verts.clear();
        for &v in verts {
            let head = map.group_head(v as usize, face).ok_or_else(|| {
                Error::InvalidTopology(format!("Vertex {v} has no UV group."))
            })?;
            face_verts.push(VertHandle(
                (mesh.loop_start(head.face as usize) + head.corner as usize) as _,
            ));
        }

        let orig_edges = orig_store
            .face_by_handle(FaceHandle(face as _))
            .map(|orig| orig.edges().collect::<SmallVec<[usize; 8]>>())
            .unwrap_or_default();

        let n = verts.len();
        if n < 3 {
            return Err(Error::InvalidTopology(format!(
                "Face {face} has {n} vertices, at least 3 are needed."
            )));
        }
        let mut prev = n - 1;
        for next in 0..n {
            let (v0, v1) = (face_verts[prev], face_verts[next]);
            if seen.insert((v0.min(v1), v0.max(v1))) {
                let crease = if mesh.is_merged(verts[prev] as usize)
                    && mesh.is_merged(verts[next] as usize)
                {
                    limit
                } else {
                    orig_edges
                        .get(prev)
                        .and_then(|&edge| orig_store.edge(edge))
                        .map_or(0.0, |edge| edge.crease())
                };
                uv_store.sync_edge(EdgeHandle((start + prev) as _), v0, v1, crease)?;
            }
            prev = next;
        }

        uv_store.sync_face(FaceHandle(face as _), &face_verts)?;
    }
    Ok(())
}
