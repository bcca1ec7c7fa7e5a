//! The incrementally synchronized coarse mesh.
//!
//! A [`TopologyStore`] keeps vertices, edges and faces keyed by caller
//! handles. Every frame the caller runs one sync generation:
//!
//! 1. [`init_full_sync()`](TopologyStore::init_full_sync),
//! 2. [`sync_vert()`](TopologyStore::sync_vert) for every vertex,
//!    [`sync_edge()`](TopologyStore::sync_edge) for every edge and
//!    [`sync_face()`](TopologyStore::sync_face) for every face,
//! 3. [`process_sync()`](TopologyStore::process_sync).
//!
//! Elements that were not synced are pruned, adjacency is rebuilt and the
//! grids are re-evaluated. When neither connectivity nor element order
//! changed the cached refinement plan is reused and only positions are
//! re-evaluated.
//!
//! A generation that fails part way is rolled back with
//! [`abort_sync()`](TopologyStore::abort_sync). The grids of the last good
//! generation stay available.
//!
//! ## Example
//! ```
//! # use subsurf_ccg::topology::{TopologyStore, StoreOptions, VertHandle, FaceHandle};
//! let mut store = TopologyStore::new(2, 3, StoreOptions::default());
//!
//! store.init_full_sync();
//! for (i, co) in [[0., 0., 0.], [1., 0., 0.], [1., 1., 0.], [0., 1., 0.]]
//!     .iter()
//!     .enumerate()
//! {
//!     store.sync_vert(VertHandle(i as _), co, false)?;
//! }
//! store.sync_face(FaceHandle(0), &[0, 1, 2, 3].map(VertHandle))?;
//! let stats = store.process_sync()?;
//!
//! assert!(stats.topology_changed);
//! assert_eq!(store.edge_count(), 4);
//! assert_eq!(store.grids().map(|grids| grids.vertex_count()), Some(81));
//! # Ok::<(), subsurf_ccg::Error>(())
//! ```
use crate::{
    grid::{self, GridData, GridKey, RefineInput, RefinePlan, RefineScratch},
    index::{IndexLayout, MeshTopology},
    Error, Result, ORIGINDEX_NONE,
};
use bytemuck::{Pod, Zeroable};
use derive_more::{Display, From, Into};
use smallvec::SmallVec;
use std::collections::HashMap;

pub mod allocator;
pub mod options;

pub use allocator::{AllocatorKind, Pool, SlotAllocator};
pub use options::{StoreOptions, AGE_LIMIT};

/// Caller key of a vertex.
///
/// ```
/// # use subsurf_ccg::topology::VertHandle;
/// let handle = VertHandle::from(7);
/// assert_eq!(handle.to_string(), "v7");
/// assert_eq!(u32::from(handle), 7);
/// ```
#[repr(transparent)]
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into, Display,
)]
#[display("v{_0}")]
pub struct VertHandle(pub u32);

/// Caller key of an edge.
#[repr(transparent)]
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into, Display,
)]
#[display("e{_0}")]
pub struct EdgeHandle(pub u32);

/// Caller key of a face.
#[repr(transparent)]
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into, Display,
)]
#[display("f{_0}")]
pub struct FaceHandle(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct VertId(pub(crate) u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct EdgeId(pub(crate) u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct FaceId(pub(crate) u32);

/// Per element data owned by the caller side of the store.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct UserData {
    /// Index of the element's first point in the final vertex array.
    pub base: u32,
    /// Index of the source mesh element, or [`ORIGINDEX_NONE`].
    pub origin: i32,
}

impl Default for UserData {
    fn default() -> Self {
        Self {
            base: 0,
            origin: ORIGINDEX_NONE,
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct Vert {
    handle: VertHandle,
    co: SmallVec<[f32; 4]>,
    seam: bool,
    edges: SmallVec<[EdgeId; 4]>,
    faces: SmallVec<[FaceId; 4]>,
    user: UserData,
    index: u32,
    touched: u64,
    saved: u64,
    changed: u32,
}

#[derive(Clone, Debug)]
pub(crate) struct Edge {
    handle: Option<EdgeHandle>,
    v0: VertId,
    v1: VertId,
    crease: f32,
    faces: SmallVec<[FaceId; 2]>,
    user: UserData,
    index: u32,
    touched: u64,
    saved: u64,
    changed: u32,
}

#[derive(Clone, Debug)]
pub(crate) struct Face {
    handle: FaceHandle,
    verts: SmallVec<[VertId; 4]>,
    edges: SmallVec<[EdgeId; 4]>,
    user: UserData,
    index: u32,
    touched: u64,
    saved: u64,
    changed: u32,
}

#[derive(Debug)]
enum Undo {
    NewVert(VertId),
    NewEdge(EdgeId),
    NewFace(FaceId),
    Vert(VertId, Box<Vert>),
    Edge(EdgeId, Box<Edge>),
    Face(FaceId, Box<Face>),
}

/// State of the generation in progress.
#[derive(Debug, Default)]
struct SyncState {
    serial: u64,
    journal: Vec<Undo>,
    vert_order: Vec<VertId>,
    edge_order: Vec<EdgeId>,
    face_order: Vec<FaceId>,
    topology_changed: bool,
    added: usize,
}

/// Results of a generation that are committed only once all of them are
/// built.
struct Staged {
    topology: Option<MeshTopology>,
    plan: Option<RefinePlan>,
    grids: GridData,
}

/// Slots of `pool` whose element matches `stale`.
fn stale_slots<T>(pool: &Pool<T>, stale: impl Fn(&T) -> bool) -> Vec<u32> {
    pool.iter()
        .filter(|(_, element)| stale(element))
        .map(|(slot, _)| slot)
        .collect()
}

/// Outcome of [`TopologyStore::process_sync()`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub vert_count: usize,
    pub edge_count: usize,
    pub face_count: usize,
    /// Elements created this generation.
    pub added: usize,
    /// Elements pruned because they were not synced.
    pub removed: usize,
    /// Connectivity or element order differs from the last generation.
    pub topology_changed: bool,
}

/// Unordered key of the edge between two vertices.
#[inline]
fn pair_key(a: VertId, b: VertId) -> (VertId, VertId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Incrementally synchronized coarse mesh plus its evaluated grids.
#[derive(Debug)]
pub struct TopologyStore {
    level: usize,
    layers: usize,
    options: StoreOptions,

    verts: Pool<Vert>,
    edges: Pool<Edge>,
    faces: Pool<Face>,

    vert_map: HashMap<VertHandle, VertId>,
    edge_map: HashMap<EdgeHandle, EdgeId>,
    face_map: HashMap<FaceHandle, FaceId>,
    pair_map: HashMap<(VertId, VertId), EdgeId>,

    vert_order: Vec<VertId>,
    edge_order: Vec<EdgeId>,
    face_order: Vec<FaceId>,

    serial: u64,
    generation: u32,
    sync: Option<SyncState>,
    sync_incomplete: bool,

    topology_version: u64,
    topology: MeshTopology,
    plan: Option<RefinePlan>,
    scratch: RefineScratch,
    grids: Option<GridData>,
}

impl TopologyStore {
    /// Creates an empty store.
    ///
    /// # Arguments
    ///
    /// * `level` - Subdivision level, clamped to at least `1`.
    /// * `layers` - Number of floats per vertex, `3` for positions.
    /// * `options` - See [`StoreOptions`].
    pub fn new(level: usize, layers: usize, options: StoreOptions) -> Self {
        let kind = options.allocator_kind();
        Self {
            level: level.max(1),
            layers,
            options,
            verts: Pool::new(kind),
            edges: Pool::new(kind),
            faces: Pool::new(kind),
            vert_map: HashMap::new(),
            edge_map: HashMap::new(),
            face_map: HashMap::new(),
            pair_map: HashMap::new(),
            vert_order: Vec::new(),
            edge_order: Vec::new(),
            face_order: Vec::new(),
            serial: 0,
            generation: 0,
            sync: None,
            sync_incomplete: false,
            topology_version: 0,
            topology: MeshTopology::default(),
            plan: None,
            scratch: RefineScratch::default(),
            grids: None,
        }
    }

    /// Returns `previous` with its level set to `level` when its options are
    /// [compatible](StoreOptions::is_compatible) with `options`. Otherwise
    /// `previous` is dropped and a new store is created.
    pub fn new_or_reuse(
        previous: Option<TopologyStore>,
        level: usize,
        layers: usize,
        options: StoreOptions,
    ) -> Self {
        match previous {
            Some(mut store) if store.options.is_compatible(&options) => {
                store.set_level(level);
                store
            }
            _ => Self::new(level, layers, options),
        }
    }

    /// Changes the subdivision level. Takes effect with the next
    /// [`process_sync()`](Self::process_sync).
    pub fn set_level(&mut self, level: usize) {
        self.level = level.max(1);
    }

    #[inline]
    pub fn level(&self) -> usize {
        self.level
    }

    /// Floats per vertex.
    #[inline]
    pub fn layers(&self) -> usize {
        self.layers
    }

    #[inline]
    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// The largest meaningful edge crease, `level + 1`.
    #[inline]
    pub fn crease_limit(&self) -> f32 {
        (self.level + 1) as f32
    }

    /// The element layout of the grids the next evaluation produces.
    pub fn grid_key(&self) -> GridKey {
        GridKey::new(
            self.level,
            self.layers,
            self.options.calc_normals,
            self.options.alloc_mask,
        )
    }

    /// Whether the last generation was aborted.
    #[inline]
    pub fn sync_incomplete(&self) -> bool {
        self.sync_incomplete
    }

    pub(crate) fn set_sync_incomplete(&mut self) {
        self.sync_incomplete = true;
    }

    /// Bumped whenever connectivity or element order changes.
    #[inline]
    pub fn topology_version(&self) -> u64 {
        self.topology_version
    }

    /// Number of completed generations.
    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }

    #[inline]
    pub fn vert_count(&self) -> usize {
        self.vert_order.len()
    }

    #[inline]
    pub fn edge_count(&self) -> usize {
        self.edge_order.len()
    }

    #[inline]
    pub fn face_count(&self) -> usize {
        self.face_order.len()
    }

    /// Coarse connectivity in element order.
    #[inline]
    pub fn topology(&self) -> &MeshTopology {
        &self.topology
    }

    /// Grids of the last completed generation.
    #[inline]
    pub fn grids(&self) -> Option<&GridData> {
        self.grids.as_ref()
    }

    #[inline]
    pub fn grids_mut(&mut self) -> Option<&mut GridData> {
        self.grids.as_mut()
    }

    /// Final mesh layout of the last completed generation.
    #[inline]
    pub fn layout(&self) -> Option<&IndexLayout> {
        self.grids.as_ref().map(GridData::layout)
    }

    #[inline]
    pub fn allocator_kind(&self) -> AllocatorKind {
        self.verts.kind()
    }

    /// Starts a sync generation. Any generation still in progress is
    /// aborted first.
    pub fn init_full_sync(&mut self) {
        if self.sync.is_some() {
            self.abort_sync();
        }
        self.serial += 1;
        self.sync = Some(SyncState {
            serial: self.serial,
            ..Default::default()
        });
    }

    /// Whether a generation is in progress.
    #[inline]
    pub fn is_syncing(&self) -> bool {
        self.sync.is_some()
    }

    fn state(&mut self) -> Result<&mut SyncState> {
        self.sync.as_mut().ok_or(Error::SyncNotStarted)
    }

    /// Creates or updates the vertex `handle`.
    pub fn sync_vert(&mut self, handle: VertHandle, co: &[f32], seam: bool) -> Result<()> {
        Error::check_len(self.layers, co.len())?;
        let serial = self.state()?.serial;
        let pending = self.generation + 1;

        let id = match self.vert_map.get(&handle) {
            Some(&id) => id,
            None => {
                let id = VertId(self.verts.insert(Vert {
                    handle,
                    co: SmallVec::from_slice(co),
                    seam,
                    edges: SmallVec::new(),
                    faces: SmallVec::new(),
                    user: UserData::default(),
                    index: 0,
                    touched: serial,
                    saved: serial,
                    changed: pending,
                }));
                self.vert_map.insert(handle, id);
                let state = self.state()?;
                state.journal.push(Undo::NewVert(id));
                state.vert_order.push(id);
                state.topology_changed = true;
                state.added += 1;
                return Ok(());
            }
        };

        let vert = self.verts.get_mut(id.0).ok_or(Error::SyncNotStarted)?;
        let first_touch = vert.touched != serial;
        vert.touched = serial;
        if vert.co.as_slice() != co || vert.seam != seam {
            let snapshot = (vert.saved != serial).then(|| Box::new(vert.clone()));
            vert.saved = serial;
            vert.co.clear();
            vert.co.extend_from_slice(co);
            vert.seam = seam;
            vert.changed = pending;

            if let Some(snapshot) = snapshot {
                self.state()?.journal.push(Undo::Vert(id, snapshot));
            }
        }
        if first_touch {
            self.state()?.vert_order.push(id);
        }
        Ok(())
    }

    /// Resolves a vertex synced in the current generation.
    fn synced_vert(&self, handle: VertHandle, serial: u64) -> Result<VertId> {
        self.vert_map
            .get(&handle)
            .copied()
            .filter(|id| {
                self.verts
                    .get(id.0)
                    .is_some_and(|vert| vert.touched == serial)
            })
            .ok_or_else(|| Error::InvalidTopology(format!("Vertex {handle} was not synced.")))
    }

    /// Marks `id` as synced, journaling it before the first modification.
    fn touch_edge(&mut self, id: EdgeId, serial: u64, modify: impl FnOnce(&mut Edge)) -> Result<()> {
        let pending = self.generation + 1;
        let edge = self.edges.get_mut(id.0).ok_or(Error::SyncNotStarted)?;
        let first_touch = edge.touched != serial;
        edge.touched = serial;

        let before = edge.clone();
        modify(edge);
        let moved = (edge.v0, edge.v1) != (before.v0, before.v1);
        let modified = moved || edge.crease != before.crease;
        if modified {
            edge.changed = pending;
        }
        let snapshot = (edge.saved != serial && (modified || edge.handle != before.handle))
            .then(|| {
                edge.saved = serial;
                Box::new(before)
            });

        let state = self.state()?;
        if let Some(snapshot) = snapshot {
            state.journal.push(Undo::Edge(id, snapshot));
        }
        if first_touch {
            state.edge_order.push(id);
        }
        if moved {
            state.topology_changed = true;
        }
        Ok(())
    }

    fn new_edge(
        &mut self,
        handle: Option<EdgeHandle>,
        v0: VertId,
        v1: VertId,
        crease: f32,
        serial: u64,
    ) -> Result<EdgeId> {
        let id = EdgeId(self.edges.insert(Edge {
            handle,
            v0,
            v1,
            crease,
            faces: SmallVec::new(),
            user: UserData::default(),
            index: 0,
            touched: serial,
            saved: serial,
            changed: self.generation + 1,
        }));
        self.pair_map.insert(pair_key(v0, v1), id);
        if let Some(handle) = handle {
            self.edge_map.insert(handle, id);
        }
        let state = self.state()?;
        state.journal.push(Undo::NewEdge(id));
        state.edge_order.push(id);
        state.topology_changed = true;
        state.added += 1;
        Ok(id)
    }

    /// Creates or updates the edge `handle` between two vertices synced in
    /// this generation.
    ///
    /// An edge between the same two vertices as an existing edge is merged
    /// into it and keeps the larger crease.
    pub fn sync_edge(
        &mut self,
        handle: EdgeHandle,
        v0: VertHandle,
        v1: VertHandle,
        crease: f32,
    ) -> Result<()> {
        let serial = self.state()?.serial;
        let a = self.synced_vert(v0, serial)?;
        let b = self.synced_vert(v1, serial)?;
        if a == b {
            return Err(Error::InvalidTopology(format!(
                "Edge {handle} connects vertex {v0} to itself."
            )));
        }
        let key = pair_key(a, b);

        // The edge this handle named last generation.
        let primary = self.edge_map.get(&handle).copied().filter(|id| {
            self.edges
                .get(id.0)
                .is_some_and(|edge| edge.touched != serial && edge.handle == Some(handle))
        });

        if let Some(id) = primary {
            let same_pair = edge_ends(&self.edges, id).is_some_and(|(e0, e1)| (e0, e1) == (a, b));
            let pair_taken = self.pair_map.get(&key).is_some_and(|&other| other != id);
            if same_pair || !pair_taken {
                if !same_pair {
                    if let Some((e0, e1)) = edge_ends(&self.edges, id) {
                        self.pair_map.remove(&pair_key(e0, e1));
                    }
                    self.pair_map.insert(key, id);
                }
                return self.touch_edge(id, serial, |edge| {
                    edge.v0 = a;
                    edge.v1 = b;
                    edge.crease = crease;
                });
            }
        }

        match self.pair_map.get(&key).copied() {
            Some(id) => {
                let (touched, has_handle) = self
                    .edges
                    .get(id.0)
                    .map(|edge| (edge.touched == serial, edge.handle.is_some()))
                    .ok_or(Error::SyncNotStarted)?;
                if !touched || !has_handle {
                    self.edge_map.insert(handle, id);
                }
                self.touch_edge(id, serial, |edge| {
                    if !touched {
                        edge.handle = Some(handle);
                        edge.crease = crease;
                    } else {
                        if !has_handle {
                            edge.handle = Some(handle);
                        }
                        edge.crease = edge.crease.max(crease);
                    }
                })
            }
            None => self.new_edge(Some(handle), a, b, crease, serial).map(|_| ()),
        }
    }

    /// Creates or updates the face `handle` with the given boundary loop.
    ///
    /// Boundary edges that were not synced are created with crease `0`.
    pub fn sync_face(&mut self, handle: FaceHandle, verts: &[VertHandle]) -> Result<()> {
        let serial = self.state()?.serial;
        let pending = self.generation + 1;

        if verts.len() < 3 {
            return Err(Error::InvalidTopology(format!(
                "Face {handle} has {} vertices; at least 3 are required.",
                verts.len()
            )));
        }

        let ids = verts
            .iter()
            .map(|&v| self.synced_vert(v, serial))
            .collect::<Result<SmallVec<[VertId; 4]>>>()?;

        for (i, id) in ids.iter().enumerate() {
            if ids[(i + 1) % ids.len()] == *id {
                return Err(Error::InvalidTopology(format!(
                    "Face {handle} repeats vertex {} consecutively.",
                    verts[i]
                )));
            }
            if ids[..i].contains(id) {
                return Err(Error::InvalidTopology(format!(
                    "Face {handle} uses vertex {} more than once.",
                    verts[i]
                )));
            }
        }

        let mut edges = SmallVec::<[EdgeId; 4]>::new();
        for i in 0..ids.len() {
            let (a, b) = (ids[i], ids[(i + 1) % ids.len()]);
            let id = match self.pair_map.get(&pair_key(a, b)).copied() {
                Some(id) => {
                    self.touch_edge(id, serial, |_| {})?;
                    id
                }
                None => self.new_edge(None, a, b, 0.0, serial)?,
            };
            edges.push(id);
        }

        match self.face_map.get(&handle).copied() {
            Some(id) => {
                let face = self.faces.get_mut(id.0).ok_or(Error::SyncNotStarted)?;
                if face.touched == serial {
                    return Err(Error::InvalidTopology(format!(
                        "Face {handle} was synced twice."
                    )));
                }
                face.touched = serial;
                let mut snapshot = None;
                if face.verts != ids || face.edges != edges {
                    if face.saved != serial {
                        snapshot = Some(Box::new(face.clone()));
                        face.saved = serial;
                    }
                    face.verts = ids;
                    face.edges = edges;
                    face.changed = pending;
                }

                let state = self.state()?;
                state.face_order.push(id);
                if let Some(snapshot) = snapshot {
                    state.journal.push(Undo::Face(id, snapshot));
                    state.topology_changed = true;
                }
            }
            None => {
                let id = FaceId(self.faces.insert(Face {
                    handle,
                    verts: ids,
                    edges,
                    user: UserData::default(),
                    index: 0,
                    touched: serial,
                    saved: serial,
                    changed: pending,
                }));
                self.face_map.insert(handle, id);
                let state = self.state()?;
                state.journal.push(Undo::NewFace(id));
                state.face_order.push(id);
                state.topology_changed = true;
                state.added += 1;
            }
        }
        Ok(())
    }

    /// Rolls back the generation in progress.
    ///
    /// Elements created in it are removed, updated elements get their
    /// previous state back. Grids are not touched.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, name = "store::abort"))]
    pub fn abort_sync(&mut self) {
        let Some(state) = self.sync.take() else {
            return;
        };

        for undo in state.journal.into_iter().rev() {
            match undo {
                Undo::NewVert(id) => {
                    self.verts.remove(id.0);
                }
                Undo::NewEdge(id) => {
                    self.edges.remove(id.0);
                }
                Undo::NewFace(id) => {
                    self.faces.remove(id.0);
                }
                Undo::Vert(id, vert) => {
                    if let Some(slot) = self.verts.get_mut(id.0) {
                        *slot = *vert;
                    }
                }
                Undo::Edge(id, edge) => {
                    if let Some(slot) = self.edges.get_mut(id.0) {
                        *slot = *edge;
                    }
                }
                Undo::Face(id, face) => {
                    if let Some(slot) = self.faces.get_mut(id.0) {
                        *slot = *face;
                    }
                }
            }
        }

        self.rebuild_maps();
    }

    fn rebuild_maps(&mut self) {
        self.vert_map = self
            .vert_order
            .iter()
            .filter_map(|&id| Some((self.verts.get(id.0)?.handle, id)))
            .collect();
        self.edge_map = self
            .edge_order
            .iter()
            .filter_map(|&id| Some((self.edges.get(id.0)?.handle?, id)))
            .collect();
        self.face_map = self
            .face_order
            .iter()
            .filter_map(|&id| Some((self.faces.get(id.0)?.handle, id)))
            .collect();
        self.pair_map = self
            .edge_order
            .iter()
            .filter_map(|&id| {
                let (v0, v1) = edge_ends(&self.edges, id)?;
                Some((pair_key(v0, v1), id))
            })
            .collect();
    }

    /// Finishes the generation in progress: prunes elements that were not
    /// synced, rebuilds adjacency and re-evaluates the grids.
    ///
    /// The new grids are evaluated before anything is pruned. If that
    /// fails the generation is aborted, the previous grids stay in place
    /// and [`sync_incomplete()`](Self::sync_incomplete) is set.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, name = "store::process_sync"))]
    pub fn process_sync(&mut self) -> Result<SyncStats> {
        let mut state = self.sync.take().ok_or(Error::SyncNotStarted)?;
        let serial = state.serial;

        let stale_faces = stale_slots(&self.faces, |face| face.touched != serial);
        let stale_edges = stale_slots(&self.edges, |edge| edge.touched != serial);
        let stale_verts = stale_slots(&self.verts, |vert| vert.touched != serial);
        let removed = stale_faces.len() + stale_edges.len() + stale_verts.len();

        let topology_changed = state.topology_changed
            || 0 < removed
            || state.vert_order != self.vert_order
            || state.edge_order != self.edge_order
            || state.face_order != self.face_order;

        let staged = match self.stage(&state, topology_changed) {
            Ok(staged) => staged,
            Err(error) => {
                self.sync = Some(state);
                self.abort_sync();
                self.sync_incomplete = true;
                return Err(error);
            }
        };

        for slot in stale_faces {
            self.faces.remove(slot);
        }
        for slot in stale_edges {
            self.edges.remove(slot);
        }
        for slot in stale_verts {
            self.verts.remove(slot);
        }

        self.vert_order = std::mem::take(&mut state.vert_order);
        self.edge_order = std::mem::take(&mut state.edge_order);
        self.face_order = std::mem::take(&mut state.face_order);
        self.rebuild_maps();
        self.rebuild_adjacency();
        self.generation += 1;

        if topology_changed {
            self.topology_version += 1;
        }
        if let Some(topology) = staged.topology {
            self.topology = topology;
        }
        if let Some(plan) = staged.plan {
            self.plan = Some(plan);
        }
        self.install_grids(staged.grids);

        let stats = SyncStats {
            vert_count: self.vert_count(),
            edge_count: self.edge_count(),
            face_count: self.face_count(),
            added: state.added,
            removed,
            topology_changed,
        };
        log::debug!("Synced generation {}: {stats:?}", self.generation);

        self.sync_incomplete = false;
        Ok(stats)
    }

    /// Builds topology, plan and grids of the generation in progress
    /// without touching the committed state.
    fn stage(&mut self, state: &SyncState, topology_changed: bool) -> Result<Staged> {
        let level = self.level;
        let version = self.topology_version + u64::from(topology_changed);

        let topology = if topology_changed {
            Some(self.build_topology(&state.vert_order, &state.edge_order, &state.face_order)?)
        } else {
            None
        };
        let (positions, creases, seams) =
            self.refine_input_buffers(&state.vert_order, &state.edge_order);
        let key = self.grid_key();

        let coarse = topology.as_ref().unwrap_or(&self.topology);
        let plan = match self.plan.as_ref() {
            Some(plan) if plan.is_valid_for(version, level) => None,
            _ => Some(RefinePlan::new(coarse, level, version)),
        };
        let Some(current_plan) = plan.as_ref().or(self.plan.as_ref()) else {
            return Err(Error::InvalidTopology("Refinement plan is missing.".to_string()));
        };

        let input = RefineInput {
            positions: &positions,
            layers: self.layers,
            creases: &creases,
            seams: &seams,
            simple: self.options.simple_subdiv,
        };
        let grids = grid::evaluate(
            current_plan,
            coarse,
            &input,
            key,
            self.grids.as_ref(),
            &mut self.scratch,
        )?;

        Ok(Staged {
            topology,
            plan,
            grids,
        })
    }

    /// Records the grid base of every element and replaces the grids.
    fn install_grids(&mut self, grids: GridData) {
        let layout = grids.layout();
        for (index, &id) in self.face_order.iter().enumerate() {
            if let Some(face) = self.faces.get_mut(id.0) {
                face.user.base = layout.face_base(index);
            }
        }
        for (index, &id) in self.edge_order.iter().enumerate() {
            if let Some(edge) = self.edges.get_mut(id.0) {
                edge.user.base = layout.edge_base(index);
            }
        }
        for (index, &id) in self.vert_order.iter().enumerate() {
            if let Some(vert) = self.verts.get_mut(id.0) {
                vert.user.base = layout.vert_index(index);
            }
        }
        self.grids = Some(grids);
    }

    fn rebuild_adjacency(&mut self) {
        for (index, &id) in self.vert_order.iter().enumerate() {
            if let Some(vert) = self.verts.get_mut(id.0) {
                vert.edges.clear();
                vert.faces.clear();
                vert.index = index as u32;
            }
        }
        for (index, &id) in self.edge_order.iter().enumerate() {
            let Some(edge) = self.edges.get_mut(id.0) else {
                continue;
            };
            edge.faces.clear();
            edge.index = index as u32;
            let (v0, v1) = (edge.v0, edge.v1);
            for v in [v0, v1] {
                if let Some(vert) = self.verts.get_mut(v.0) {
                    vert.edges.push(id);
                }
            }
        }
        for (index, &id) in self.face_order.iter().enumerate() {
            let Some(face) = self.faces.get_mut(id.0) else {
                continue;
            };
            face.index = index as u32;
            let (verts, edges) = (face.verts.clone(), face.edges.clone());
            for v in verts {
                if let Some(vert) = self.verts.get_mut(v.0) {
                    vert.faces.push(id);
                }
            }
            for e in edges {
                if let Some(edge) = self.edges.get_mut(e.0) {
                    edge.faces.push(id);
                }
            }
        }
    }

    fn build_topology(
        &self,
        vert_order: &[VertId],
        edge_order: &[EdgeId],
        face_order: &[FaceId],
    ) -> Result<MeshTopology> {
        let vert_index: HashMap<VertId, u32> = vert_order
            .iter()
            .enumerate()
            .map(|(index, &id)| (id, index as u32))
            .collect();
        let edge_index: HashMap<EdgeId, u32> = edge_order
            .iter()
            .enumerate()
            .map(|(index, &id)| (id, index as u32))
            .collect();
        let vert_index_of = |id: VertId| {
            vert_index.get(&id).copied().ok_or_else(|| {
                Error::InvalidTopology("Element references a pruned vertex.".to_string())
            })
        };
        let edge_index_of = |id: EdgeId| {
            edge_index.get(&id).copied().ok_or_else(|| {
                Error::InvalidTopology("Face references a pruned edge.".to_string())
            })
        };

        let mut face_offsets = Vec::with_capacity(face_order.len() + 1);
        let mut face_verts = Vec::new();
        let mut face_edges = Vec::new();
        face_offsets.push(0);
        for face in face_order.iter().filter_map(|id| self.faces.get(id.0)) {
            for (&v, &e) in face.verts.iter().zip(&face.edges) {
                face_verts.push(vert_index_of(v)?);
                face_edges.push(edge_index_of(e)?);
            }
            face_offsets.push(face_verts.len() as u32);
        }
        let edge_verts = edge_order
            .iter()
            .filter_map(|id| self.edges.get(id.0))
            .map(|edge| Ok([vert_index_of(edge.v0)?, vert_index_of(edge.v1)?]))
            .collect::<Result<Vec<_>>>()?;

        Ok(MeshTopology {
            face_offsets,
            face_verts,
            face_edges,
            edge_verts,
            vert_count: vert_order.len(),
        })
    }

    fn verts_in_order(&self) -> impl Iterator<Item = &Vert> + '_ {
        self.vert_order.iter().filter_map(|id| self.verts.get(id.0))
    }

    fn edges_in_order(&self) -> impl Iterator<Item = &Edge> + '_ {
        self.edge_order.iter().filter_map(|id| self.edges.get(id.0))
    }

    fn faces_in_order(&self) -> impl Iterator<Item = &Face> + '_ {
        self.face_order.iter().filter_map(|id| self.faces.get(id.0))
    }

    /// Coarse positions in vertex order, `layers` floats each.
    pub fn coarse_positions(&self) -> Vec<f32> {
        self.verts_in_order()
            .flat_map(|vert| vert.co.iter().copied())
            .collect()
    }

    fn refine_input_buffers(
        &self,
        vert_order: &[VertId],
        edge_order: &[EdgeId],
    ) -> (Vec<f32>, Vec<f32>, Vec<bool>) {
        let verts = || vert_order.iter().filter_map(|id| self.verts.get(id.0));
        (
            verts().flat_map(|vert| vert.co.iter().copied()).collect(),
            edge_order
                .iter()
                .filter_map(|id| self.edges.get(id.0))
                .map(|edge| edge.crease)
                .collect(),
            verts().map(|vert| vert.seam).collect(),
        )
    }

    /// Runs the first refinement pass on the current coarse mesh.
    pub(crate) fn first_pass(&self) -> Result<grid::FirstPass> {
        let (positions, creases, seams) =
            self.refine_input_buffers(&self.vert_order, &self.edge_order);
        let input = RefineInput {
            positions: &positions,
            layers: self.layers,
            creases: &creases,
            seams: &seams,
            simple: self.options.simple_subdiv,
        };
        match self.plan.as_ref() {
            Some(plan) => plan.first_pass(&input),
            None => RefinePlan::new(&self.topology, 1, self.topology_version).first_pass(&input),
        }
    }

    /// Generations since `changed`, saturating at [`AGE_LIMIT`]. Always `0`
    /// without [`use_aging`](StoreOptions::use_aging).
    fn age_of(&self, changed: u32) -> u8 {
        if self.options.use_aging {
            self.generation.saturating_sub(changed).min(AGE_LIMIT as u32) as u8
        } else {
            0
        }
    }

    pub(crate) fn vert_user_mut(&mut self, handle: VertHandle) -> Option<&mut UserData> {
        let id = *self.vert_map.get(&handle)?;
        self.verts.get_mut(id.0).map(|vert| &mut vert.user)
    }

    pub(crate) fn edge_user_mut(&mut self, handle: EdgeHandle) -> Option<&mut UserData> {
        let id = *self.edge_map.get(&handle)?;
        self.edges.get_mut(id.0).map(|edge| &mut edge.user)
    }

    pub(crate) fn face_user_mut(&mut self, handle: FaceHandle) -> Option<&mut UserData> {
        let id = *self.face_map.get(&handle)?;
        self.faces.get_mut(id.0).map(|face| &mut face.user)
    }

    /// The vertex at `index` in element order.
    pub fn vert(&self, index: usize) -> Option<VertRef<'_>> {
        let vert = self.verts.get(self.vert_order.get(index)?.0)?;
        Some(VertRef { store: self, vert })
    }

    pub fn edge(&self, index: usize) -> Option<EdgeRef<'_>> {
        let edge = self.edges.get(self.edge_order.get(index)?.0)?;
        Some(EdgeRef { store: self, edge })
    }

    pub fn face(&self, index: usize) -> Option<FaceRef<'_>> {
        let face = self.faces.get(self.face_order.get(index)?.0)?;
        Some(FaceRef { store: self, face })
    }

    pub fn verts(&self) -> impl Iterator<Item = VertRef<'_>> + '_ {
        self.verts_in_order().map(|vert| VertRef { store: self, vert })
    }

    pub fn edges(&self) -> impl Iterator<Item = EdgeRef<'_>> + '_ {
        self.edges_in_order().map(|edge| EdgeRef { store: self, edge })
    }

    pub fn faces(&self) -> impl Iterator<Item = FaceRef<'_>> + '_ {
        self.faces_in_order().map(|face| FaceRef { store: self, face })
    }

    pub fn vert_by_handle(&self, handle: VertHandle) -> Option<VertRef<'_>> {
        let vert = self.verts.get(self.vert_map.get(&handle)?.0)?;
        Some(VertRef { store: self, vert })
    }

    pub fn edge_by_handle(&self, handle: EdgeHandle) -> Option<EdgeRef<'_>> {
        let edge = self.edges.get(self.edge_map.get(&handle)?.0)?;
        Some(EdgeRef { store: self, edge })
    }

    pub fn face_by_handle(&self, handle: FaceHandle) -> Option<FaceRef<'_>> {
        let face = self.faces.get(self.face_map.get(&handle)?.0)?;
        Some(FaceRef { store: self, face })
    }

    /// Index of the edge between two vertices, if there is one.
    pub fn edge_between(&self, v0: VertHandle, v1: VertHandle) -> Option<EdgeRef<'_>> {
        let a = *self.vert_map.get(&v0)?;
        let b = *self.vert_map.get(&v1)?;
        let edge = self.edges.get(self.pair_map.get(&pair_key(a, b))?.0)?;
        Some(EdgeRef { store: self, edge })
    }
}

fn edge_ends(edges: &Pool<Edge>, id: EdgeId) -> Option<(VertId, VertId)> {
    edges.get(id.0).map(|edge| (edge.v0, edge.v1))
}

/// Maps an age to a `1.0` (new) to `0.0` (old) fade factor.
///
/// ```
/// # use subsurf_ccg::topology::{age_fade, AGE_LIMIT};
/// assert_eq!(age_fade(0), 1.0);
/// assert_eq!(age_fade(AGE_LIMIT), 0.0);
/// ```
#[inline]
pub fn age_fade(age: u8) -> f32 {
    1.0 - age.min(AGE_LIMIT) as f32 / AGE_LIMIT as f32
}

/// A vertex of a [`TopologyStore`].
#[derive(Copy, Clone, Debug)]
pub struct VertRef<'a> {
    store: &'a TopologyStore,
    vert: &'a Vert,
}

impl<'a> VertRef<'a> {
    #[inline]
    pub fn handle(&self) -> VertHandle {
        self.vert.handle
    }

    /// Position in element order.
    #[inline]
    pub fn index(&self) -> usize {
        self.vert.index as _
    }

    #[inline]
    pub fn co(&self) -> &'a [f32] {
        &self.vert.co
    }

    #[inline]
    pub fn is_seam(&self) -> bool {
        self.vert.seam
    }

    #[inline]
    pub fn user(&self) -> UserData {
        self.vert.user
    }

    /// Indices of the incident edges.
    pub fn edges(&self) -> impl Iterator<Item = usize> + 'a {
        let store = self.store;
        self.vert
            .edges
            .iter()
            .filter_map(move |id| store.edges.get(id.0).map(|edge| edge.index as usize))
    }

    /// Indices of the incident faces.
    pub fn faces(&self) -> impl Iterator<Item = usize> + 'a {
        let store = self.store;
        self.vert
            .faces
            .iter()
            .filter_map(move |id| store.faces.get(id.0).map(|face| face.index as usize))
    }

    #[inline]
    pub fn edge_count(&self) -> usize {
        self.vert.edges.len()
    }

    #[inline]
    pub fn face_count(&self) -> usize {
        self.vert.faces.len()
    }

    #[inline]
    pub fn age(&self) -> u8 {
        self.store.age_of(self.vert.changed)
    }
}

/// An edge of a [`TopologyStore`].
#[derive(Copy, Clone, Debug)]
pub struct EdgeRef<'a> {
    store: &'a TopologyStore,
    edge: &'a Edge,
}

impl<'a> EdgeRef<'a> {
    /// `None` for edges created implicitly by a face.
    #[inline]
    pub fn handle(&self) -> Option<EdgeHandle> {
        self.edge.handle
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.edge.index as _
    }

    /// Indices of the two end vertices.
    pub fn verts(&self) -> [usize; 2] {
        let index = |id: VertId| {
            self.store
                .verts
                .get(id.0)
                .map_or(0, |vert| vert.index as usize)
        };
        [index(self.edge.v0), index(self.edge.v1)]
    }

    /// Handles of the two end vertices.
    pub fn vert_handles(&self) -> [Option<VertHandle>; 2] {
        let handle = |id: VertId| self.store.verts.get(id.0).map(|vert| vert.handle);
        [handle(self.edge.v0), handle(self.edge.v1)]
    }

    #[inline]
    pub fn crease(&self) -> f32 {
        self.edge.crease
    }

    #[inline]
    pub fn user(&self) -> UserData {
        self.edge.user
    }

    pub fn faces(&self) -> impl Iterator<Item = usize> + 'a {
        let store = self.store;
        self.edge
            .faces
            .iter()
            .filter_map(move |id| store.faces.get(id.0).map(|face| face.index as usize))
    }

    #[inline]
    pub fn face_count(&self) -> usize {
        self.edge.faces.len()
    }

    /// No face uses this edge.
    #[inline]
    pub fn is_loose(&self) -> bool {
        self.edge.faces.is_empty()
    }

    /// Fewer than two faces use this edge.
    #[inline]
    pub fn is_boundary(&self) -> bool {
        self.edge.faces.len() < 2
    }

    #[inline]
    pub fn age(&self) -> u8 {
        self.store.age_of(self.edge.changed)
    }
}

/// A face of a [`TopologyStore`].
#[derive(Copy, Clone, Debug)]
pub struct FaceRef<'a> {
    store: &'a TopologyStore,
    face: &'a Face,
}

impl<'a> FaceRef<'a> {
    #[inline]
    pub fn handle(&self) -> FaceHandle {
        self.face.handle
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.face.index as _
    }

    #[inline]
    pub fn valence(&self) -> usize {
        self.face.verts.len()
    }

    /// Indices of the loop vertices in winding order.
    pub fn verts(&self) -> impl Iterator<Item = usize> + 'a {
        let store = self.store;
        self.face
            .verts
            .iter()
            .filter_map(move |id| store.verts.get(id.0).map(|vert| vert.index as usize))
    }

    /// Handles of the loop vertices in winding order.
    pub fn vert_handles(&self) -> impl Iterator<Item = VertHandle> + 'a {
        let store = self.store;
        self.face
            .verts
            .iter()
            .filter_map(move |id| store.verts.get(id.0).map(|vert| vert.handle))
    }

    /// Indices of the loop edges; edge `i` follows vertex `i`.
    pub fn edges(&self) -> impl Iterator<Item = usize> + 'a {
        let store = self.store;
        self.face
            .edges
            .iter()
            .filter_map(move |id| store.edges.get(id.0).map(|edge| edge.index as usize))
    }

    #[inline]
    pub fn user(&self) -> UserData {
        self.face.user
    }

    #[inline]
    pub fn age(&self) -> u8 {
        self.store.age_of(self.face.changed)
    }
}
