//! The subdivided mesh as a conventional element array mesh.
//!
//! A [`DerivedMesh`] is a read only view of a synced [`TopologyStore`].
//! Every final vertex, edge, quad and loop is addressable by index through
//! the store's [`IndexLayout`], so single elements are computed on demand
//! and whole arrays are copied in one pass. Arrays that need a full scan to
//! build (the loop to edge hash, the per grid element arrays, the origin
//! index layers) are built on first use and cached.
//!
//! ## Example
//! ```
//! # use subsurf_ccg::{derived::*, sync::*, topology::*};
//! let positions = [0., 0., 0., 1., 0., 0., 1., 1., 0., 0., 1., 0.];
//! let mut quad = MeshDescriptor::new(4, &[4], &[0, 1, 2, 3])?;
//! quad.positions(&positions);
//!
//! let mut store = TopologyStore::new(1, 3, StoreOptions::default());
//! sync_from_mesh(&mut store, &quad, None, false)?;
//!
//! let derived = DerivedMesh::new(StoreRef::Borrowed(&store), &quad, DerivedOptions::default())?;
//! assert_eq!(derived.vertex_count(), 25);
//! assert_eq!(derived.face_count(), 16);
//! assert_eq!(derived.loops()?.len(), 64);
//! # Ok::<(), subsurf_ccg::Error>(())
//! ```
use crate::{
    attributes::{interp, AttributeData, AttributeKind, AttributeSet},
    displacement::{DisplacementSink, GridBitmap, GridPaintMask, ModifiedFlags},
    error::try_reserve,
    grid::{GridData, GridKey},
    index::{EdgeLocation, IndexLayout},
    sync::MeshDescriptor,
    topology::{FaceHandle, StoreOptions, TopologyStore},
    uv_map::sync_from_uv,
    weights::WeightTable,
    Error, Result, ORIGINDEX_NONE,
};
use smallvec::SmallVec;
use std::{collections::HashMap, ops::Deref, sync::Arc};

pub mod cache;
pub mod elements;
pub mod subsurf;

pub use cache::LazyCache;
pub use elements::{
    EdgeFlags, FaceFlags, FinalEdge, FinalFace, FinalLoop, FinalPoly, FinalVert, FlagMat,
    VertFlags,
};
pub use subsurf::{SubdivType, SubsurfCache, SubsurfFlags, SubsurfSettings};

/// A store that is either borrowed from a cache or owned by the derived
/// mesh.
#[derive(Debug)]
pub enum StoreRef<'a> {
    Borrowed(&'a TopologyStore),
    Owned(Box<TopologyStore>),
}

impl Deref for StoreRef<'_> {
    type Target = TopologyStore;

    fn deref(&self) -> &TopologyStore {
        match self {
            StoreRef::Borrowed(store) => store,
            StoreRef::Owned(store) => store,
        }
    }
}

/// Options of a [`DerivedMesh`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct DerivedOptions {
    /// Flag edges inside the face grids for drawing and rendering.
    pub draw_interior_edges: bool,
    /// Subdivide texture coordinates as their own surface instead of
    /// interpolating them.
    pub use_subsurf_uv: bool,
}

impl Default for DerivedOptions {
    fn default() -> Self {
        Self {
            draw_interior_edges: true,
            use_subsurf_uv: true,
        }
    }
}

/// First final elements of a coarse face.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct FaceMapEntry {
    pub start_vert: u32,
    pub start_edge: u32,
    pub start_face: u32,
}

/// First final elements of a coarse edge.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct EdgeMapEntry {
    pub start_vert: u32,
    pub start_edge: u32,
}

/// Grids of every face corner, `key.elem_size()` floats per grid point.
///
/// Grid `i` covers the quads of one corner of one coarse face, point
/// `(x, y)` is stored at row `y`, column `x`.
#[derive(Clone, Debug)]
pub struct GridSet {
    key: GridKey,
    data: Vec<f32>,
    grid_offset: Vec<u32>,
    grid_faces: Vec<u32>,
    flag_mats: Vec<FlagMat>,
    hidden: Vec<Option<GridBitmap>>,
}

impl GridSet {
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, name = "derived::grids"))]
    fn build(grids: &GridData, store: &TopologyStore, face_flags: &[FlagMat]) -> Result<Self> {
        let key = grids.key();
        let layout = grids.layout();
        let (g, elem) = (key.grid_size, key.elem_size());
        let grid_count = (0..layout.coarse_face_count())
            .map(|face| layout.valence(face))
            .sum::<usize>();

        let mut data = Vec::new();
        try_reserve(&mut data, grid_count * key.grid_area() * elem, "grid set")?;
        data.resize(grid_count * key.grid_area() * elem, 0.0);

        let mut grid_offset = Vec::with_capacity(store.face_count());
        let mut grid_faces = Vec::with_capacity(grid_count);
        let mut flag_mats = Vec::with_capacity(grid_count);
        let mut elements = data.chunks_exact_mut(elem);
        for face in store.faces() {
            let f = face.index();
            grid_offset.push(grid_faces.len() as u32);
            for corner in 0..face.valence() {
                grid_faces.push(f as u32);
                flag_mats.push(face_flags.get(f).copied().unwrap_or_default());
                for y in 0..g {
                    for x in 0..g {
                        if let Some(out) = elements.next() {
                            grids.write_element(
                                layout.face_vertex_index(f, corner, x, y) as usize,
                                out,
                            );
                        }
                    }
                }
            }
        }

        Ok(Self {
            key,
            data,
            grid_offset,
            grid_faces,
            flag_mats,
            hidden: vec![None; grid_count],
        })
    }

    #[inline]
    pub fn key(&self) -> GridKey {
        self.key
    }

    #[inline]
    pub fn grid_count(&self) -> usize {
        self.grid_faces.len()
    }

    /// Index of the first grid of coarse face `face`.
    #[inline]
    pub fn grid_offset(&self, face: usize) -> usize {
        self.grid_offset[face] as _
    }

    #[inline]
    pub fn grid_offsets(&self) -> &[u32] {
        &self.grid_offset
    }

    /// The coarse face grid `grid` belongs to.
    #[inline]
    pub fn grid_face(&self, grid: usize) -> usize {
        self.grid_faces[grid] as _
    }

    /// Flags and material of each grid's face.
    #[inline]
    pub fn flag_mats(&self) -> &[FlagMat] {
        &self.flag_mats
    }

    #[inline]
    fn grid_len(&self) -> usize {
        self.key.grid_area() * self.key.elem_size()
    }

    /// All elements of `grid`.
    pub fn grid(&self, grid: usize) -> &[f32] {
        let len = self.grid_len();
        &self.data[grid * len..(grid + 1) * len]
    }

    pub fn grid_mut(&mut self, grid: usize) -> &mut [f32] {
        let len = self.grid_len();
        &mut self.data[grid * len..(grid + 1) * len]
    }

    /// The element of point `(x, y)` of `grid`.
    pub fn element(&self, grid: usize, x: usize, y: usize) -> &[f32] {
        let elem = self.key.elem_size();
        let start = (y * self.key.grid_size + x) * elem;
        &self.grid(grid)[start..start + elem]
    }

    pub fn element_mut(&mut self, grid: usize, x: usize, y: usize) -> &mut [f32] {
        let elem = self.key.elem_size();
        let start = (y * self.key.grid_size + x) * elem;
        &mut self.grid_mut(grid)[start..start + elem]
    }

    /// Hidden points of `grid`, `None` if all are visible.
    #[inline]
    pub fn hidden(&self, grid: usize) -> Option<&GridBitmap> {
        self.hidden.get(grid)?.as_ref()
    }

    pub fn set_hidden(&mut self, grid: usize, hidden: Option<GridBitmap>) {
        if let Some(slot) = self.hidden.get_mut(grid) {
            *slot = hidden;
        }
    }
}

/// The subdivided mesh of a [`TopologyStore`].
pub struct DerivedMesh<'a> {
    store: StoreRef<'a>,
    layout: IndexLayout,
    options: DerivedOptions,
    face_map: Vec<FaceMapEntry>,
    edge_map: Vec<EdgeMapEntry>,
    vert_map: Vec<u32>,
    reverse_face_map: Vec<u32>,
    face_flags: Vec<FlagMat>,
    edge_flags: Vec<EdgeFlags>,
    vertex_data: Option<AttributeSet>,
    loop_data: Option<AttributeSet>,
    edge_hash: LazyCache<HashMap<(u32, u32), u32>>,
    grids: LazyCache<GridSet>,
    vert_origindex: LazyCache<Vec<i32>>,
    edge_origindex: LazyCache<Vec<i32>>,
    poly_origindex: LazyCache<Vec<i32>>,
    sink: Option<Box<dyn DisplacementSink + 'a>>,
    modified: ModifiedFlags,
}

impl std::fmt::Debug for DerivedMesh<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedMesh")
            .field("vertex_count", &self.vertex_count())
            .field("edge_count", &self.edge_count())
            .field("face_count", &self.face_count())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<'a> DerivedMesh<'a> {
    /// Builds the derived mesh of `store`, which must have been synced from
    /// `mesh`.
    ///
    /// Per vertex and per loop attributes of `mesh` are interpolated onto
    /// the final mesh here; everything else is computed on demand.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, name = "derived::new"))]
    pub fn new(store: StoreRef<'a>, mesh: &MeshDescriptor, options: DerivedOptions) -> Result<Self> {
        if store.sync_incomplete() {
            return Err(Error::SyncIncomplete);
        }
        let layout = store.layout().ok_or(Error::SyncNotStarted)?.clone();

        let face_map = (0..store.face_count())
            .map(|f| FaceMapEntry {
                start_vert: layout.face_base(f),
                start_edge: layout.face_edge_start(f),
                start_face: layout.face_quad_start(f),
            })
            .collect::<Vec<_>>();
        let edge_map = (0..store.edge_count())
            .map(|e| EdgeMapEntry {
                start_vert: layout.edge_base(e),
                start_edge: layout.edge_segment_start(e) as _,
            })
            .collect();
        let vert_map = (0..store.vert_count())
            .map(|v| layout.vert_index(v))
            .collect();

        let mut reverse_face_map = Vec::new();
        try_reserve(&mut reverse_face_map, layout.face_count(), "reverse face map")?;
        let quads_per_corner = (layout.grid_size() - 1) * (layout.grid_size() - 1);
        for f in 0..store.face_count() {
            let quads = layout.valence(f) * quads_per_corner;
            reverse_face_map.extend(std::iter::repeat_n(f as u32, quads));
        }

        let face_flags = store
            .faces()
            .map(|face| {
                mesh.face_flag_mat(face.handle().0 as usize)
                    .unwrap_or_default()
            })
            .collect();

        let edge_flags = store
            .edges()
            .map(|edge| {
                let mut flags = EdgeFlags::empty();
                if edge.is_loose() {
                    flags |= EdgeFlags::LOOSE;
                }
                match (mesh.has_edge_flags(), edge.handle()) {
                    (true, Some(handle)) => {
                        flags |= mesh.edge_flag(handle.0 as usize)
                            & (EdgeFlags::SEAM | EdgeFlags::SHARP)
                            | EdgeFlags::DRAW
                            | EdgeFlags::RENDER;
                    }
                    (true, None) => {}
                    (false, _) => flags |= EdgeFlags::DRAW | EdgeFlags::RENDER,
                }
                flags
            })
            .collect();

        let mut derived = Self {
            store,
            layout,
            options,
            face_map,
            edge_map,
            vert_map,
            reverse_face_map,
            face_flags,
            edge_flags,
            vertex_data: None,
            loop_data: None,
            edge_hash: LazyCache::new(),
            grids: LazyCache::new(),
            vert_origindex: LazyCache::new(),
            edge_origindex: LazyCache::new(),
            poly_origindex: LazyCache::new(),
            sink: None,
            modified: ModifiedFlags::empty(),
        };

        let mut weights = WeightTable::new(derived.layout.grid_cuts());
        if let Some(src) = mesh.vertex_attribute_set() {
            derived.vertex_data = Some(derived.interp_vertex_data(src, &mut weights)?);
        }
        if let Some(src) = mesh.loop_attribute_set() {
            let mut loop_data = derived.interp_loop_data(mesh, src, &mut weights)?;
            if options.use_subsurf_uv {
                derived.set_subsurf_uv(mesh, src, &mut loop_data)?;
            }
            derived.loop_data = Some(loop_data);
        }
        Ok(derived)
    }

    /// Attaches the sink that receives edited grids on drop.
    pub fn with_displacement(mut self, sink: Box<dyn DisplacementSink + 'a>) -> Self {
        self.sink = Some(sink);
        self
    }

    fn interp_vertex_data(&self, src: &AttributeSet, table: &mut WeightTable) -> Result<AttributeSet> {
        let layout = &self.layout;
        let store = &*self.store;
        let g = layout.grid_size();
        let mut dst = src.zeroed_like(layout.vertex_count());

        for face in store.faces() {
            let f = face.index();
            let n = face.valence();
            let indices = face
                .vert_handles()
                .map(|handle| handle.0 as usize)
                .collect::<SmallVec<[usize; 8]>>();
            let w = table.weights(n)?;

            interp(src, &mut dst, &indices, w.center(), layout.face_base(f) as _)?;
            for s in 0..n {
                for x in 1..g - 1 {
                    let to = layout.face_vertex_index(f, s, x, 0);
                    interp(src, &mut dst, &indices, w.seam(s, x), to as _)?;
                }
                for y in 1..g - 1 {
                    for x in 1..g - 1 {
                        let to = layout.face_vertex_index(f, s, x, y);
                        interp(src, &mut dst, &indices, w.row(s, x, y), to as _)?;
                    }
                }
            }
        }

        let segments = layout.edge_size() - 1;
        for edge in store.edges() {
            let [Some(v0), Some(v1)] = edge.vert_handles() else {
                continue;
            };
            let indices = [v0.0 as usize, v1.0 as usize];
            for x in 1..segments {
                let w1 = x as f32 / segments as f32;
                let to = layout.edge_vertex_index(edge.index(), x);
                interp(src, &mut dst, &indices, &[1.0 - w1, w1], to as _)?;
            }
        }

        for vert in store.verts() {
            let to = layout.vert_index(vert.index());
            interp(src, &mut dst, &[vert.handle().0 as usize], &[1.0], to as _)?;
        }
        Ok(dst)
    }

    fn interp_loop_data(
        &self,
        mesh: &MeshDescriptor,
        src: &AttributeSet,
        table: &mut WeightTable,
    ) -> Result<AttributeSet> {
        let layout = &self.layout;
        let cells = layout.grid_size() - 1;
        let mut dst = src.zeroed_like(layout.loop_count());

        for face in self.store.faces() {
            let handle = face.handle().0 as usize;
            if mesh.faces_len() <= handle {
                continue;
            }
            let f = face.index();
            let n = face.valence();
            let start = mesh.loop_start(handle);
            let indices = (start..start + n).collect::<SmallVec<[usize; 8]>>();
            let w = table.weights(n)?;

            let mut quad = layout.face_quad_start(f) as usize;
            for s in 0..n {
                for y in 0..cells {
                    for x in 0..cells {
                        for (k, row) in w.cell(s, x, y).into_iter().enumerate() {
                            interp(src, &mut dst, &indices, row, 4 * quad + k)?;
                        }
                        quad += 1;
                    }
                }
            }
        }
        Ok(dst)
    }

    /// Replaces interpolated UV layers by subdivided UV surfaces.
    fn set_subsurf_uv(
        &self,
        mesh: &MeshDescriptor,
        src: &AttributeSet,
        dst: &mut AttributeSet,
    ) -> Result<()> {
        let store = &*self.store;
        for (layer, out) in src.layers().iter().zip(dst.layers_mut()) {
            let AttributeData::F32 {
                components: 2,
                values,
            } = layer.data()
            else {
                continue;
            };
            if layer.kind() != AttributeKind::Uv {
                continue;
            }

            let uvs = values
                .chunks_exact(2)
                .map(|uv| [uv[0], uv[1]])
                .collect::<Vec<_>>();
            let mut uv_store = TopologyStore::new(
                store.level(),
                2,
                StoreOptions {
                    use_arena: true,
                    calc_normals: false,
                    ..Default::default()
                },
            );
            if let Err(error) = sync_from_uv(&mut uv_store, store, mesh, &uvs) {
                log::debug!("Keeping interpolated UVs of '{}': {error}", layer.name());
                continue;
            }
            let (Some(uv_grids), Some(uv_layout)) = (uv_store.grids(), uv_store.layout()) else {
                continue;
            };

            let cells = self.layout.grid_size() - 1;
            for uv_face in uv_store.faces() {
                let Some(face) = store.face_by_handle(uv_face.handle()) else {
                    continue;
                };
                let mut quad = self.layout.face_quad_start(face.index()) as usize;
                for s in 0..face.valence() {
                    for y in 0..cells {
                        for x in 0..cells {
                            let corners = uv_layout.cell_vertices(uv_face.index(), s, x, y);
                            for (k, &corner) in corners.iter().enumerate() {
                                if let Some(uv) = out.f32_at_mut(4 * quad + k) {
                                    uv.copy_from_slice(uv_grids.co(corner as usize));
                                }
                            }
                            quad += 1;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    #[inline]
    pub fn store(&self) -> &TopologyStore {
        &self.store
    }

    #[inline]
    pub fn layout(&self) -> &IndexLayout {
        &self.layout
    }

    #[inline]
    pub fn options(&self) -> &DerivedOptions {
        &self.options
    }

    #[inline]
    pub fn level(&self) -> usize {
        self.store.level()
    }

    fn grid_data(&self) -> Result<&GridData> {
        self.store.grids().ok_or(Error::SyncNotStarted)
    }

    pub fn grid_key(&self) -> GridKey {
        self.store.grid_key()
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.layout.vertex_count()
    }

    #[inline]
    pub fn edge_count(&self) -> usize {
        self.layout.edge_count()
    }

    /// Number of final quads, which is also the number of polygons.
    #[inline]
    pub fn face_count(&self) -> usize {
        self.layout.face_count()
    }

    #[inline]
    pub fn loop_count(&self) -> usize {
        self.layout.loop_count()
    }

    #[inline]
    pub fn face_map(&self) -> &[FaceMapEntry] {
        &self.face_map
    }

    #[inline]
    pub fn edge_map(&self) -> &[EdgeMapEntry] {
        &self.edge_map
    }

    /// Final vertex index of every coarse vertex.
    #[inline]
    pub fn vert_map(&self) -> &[u32] {
        &self.vert_map
    }

    /// Coarse face of every final quad.
    #[inline]
    pub fn reverse_face_map(&self) -> &[u32] {
        &self.reverse_face_map
    }

    /// Flags of every coarse edge as carried onto its segments.
    #[inline]
    pub fn edge_flags(&self) -> &[EdgeFlags] {
        &self.edge_flags
    }

    #[inline]
    pub fn face_flags(&self) -> &[FlagMat] {
        &self.face_flags
    }

    /// Interpolated per vertex attributes.
    #[inline]
    pub fn vertex_data(&self) -> Option<&AttributeSet> {
        self.vertex_data.as_ref()
    }

    /// Interpolated per loop attributes.
    #[inline]
    pub fn loop_data(&self) -> Option<&AttributeSet> {
        self.loop_data.as_ref()
    }

    pub fn vertex(&self, index: usize) -> Result<FinalVert> {
        let grids = self.check_vertex(index)?;
        Ok(FinalVert::new(grids.position(index), grids.normal(index)))
    }

    fn check_vertex(&self, index: usize) -> Result<&GridData> {
        if self.vertex_count() <= index {
            return Err(Error::IndexOutOfBounds {
                index,
                max: self.vertex_count(),
            });
        }
        self.grid_data()
    }

    /// Position of final vertex `index`.
    pub fn vertex_co(&self, index: usize) -> Result<[f32; 3]> {
        Ok(self.check_vertex(index)?.position(index))
    }

    /// Unpacked normal of final vertex `index`; zero without normals.
    pub fn vertex_no(&self, index: usize) -> Result<[f32; 3]> {
        Ok(self.check_vertex(index)?.normal(index))
    }

    /// First grid of coarse face `face`.
    #[inline]
    pub fn grid_offset(&self, face: usize) -> usize {
        (0..face).map(|f| self.layout.valence(f)).sum()
    }

    /// Flags and material of the face every grid belongs to.
    pub fn grid_flag_mats(&self) -> Vec<FlagMat> {
        self.face_flags
            .iter()
            .enumerate()
            .flat_map(|(face, &flag_mat)| std::iter::repeat_n(flag_mat, self.layout.valence(face)))
            .collect()
    }

    fn interior_edge_flags(&self) -> EdgeFlags {
        if self.options.draw_interior_edges {
            EdgeFlags::DRAW | EdgeFlags::RENDER
        } else {
            EdgeFlags::empty()
        }
    }

    pub fn edge(&self, index: usize) -> Result<FinalEdge> {
        let out_of_bounds = || Error::IndexOutOfBounds {
            index,
            max: self.edge_count(),
        };
        let [v1, v2] = self.layout.final_edge(index).ok_or_else(out_of_bounds)?;
        let (location, _) = self.layout.locate_edge(index).ok_or_else(out_of_bounds)?;
        let flag = match location {
            EdgeLocation::Face { .. } => self.interior_edge_flags(),
            EdgeLocation::Edge { edge, .. } => {
                self.edge_flags.get(edge).copied().unwrap_or_default()
            }
        };
        Ok(FinalEdge {
            v1,
            v2,
            flag,
            ..Default::default()
        })
    }

    pub fn face(&self, index: usize) -> Result<FinalFace> {
        let v = self
            .layout
            .final_quad(index)
            .ok_or(Error::IndexOutOfBounds {
                index,
                max: self.face_count(),
            })?;
        let flag_mat = self.quad_flag_mat(index);
        Ok(FinalFace {
            v,
            mat_nr: flag_mat.mat_nr,
            flag: flag_mat.flag,
            edcode: 0,
        })
    }

    fn quad_flag_mat(&self, quad: usize) -> FlagMat {
        self.reverse_face_map
            .get(quad)
            .and_then(|&face| self.face_flags.get(face as usize))
            .copied()
            .unwrap_or_default()
    }

    /// Writes all final vertices into `out`.
    pub fn copy_vertex_array(&self, out: &mut [FinalVert]) -> Result<()> {
        Error::check_len(self.vertex_count(), out.len())?;
        let grids = self.grid_data()?;
        for (index, vert) in out.iter_mut().enumerate() {
            *vert = FinalVert::new(grids.position(index), grids.normal(index));
        }
        Ok(())
    }

    /// Writes all final edges into `out`: face grid edges first, then the
    /// segments of every coarse edge.
    pub fn copy_edge_array(&self, out: &mut [FinalEdge]) -> Result<()> {
        Error::check_len(self.edge_count(), out.len())?;
        let interior = self.interior_edge_flags();
        let segment_base = self.layout.edge_segment_start(0) as usize;
        let segments = self.layout.edge_size() - 1;
        for (index, ([v1, v2], edge)) in self.layout.final_edges().zip(out.iter_mut()).enumerate() {
            let flag = if index < segment_base {
                interior
            } else {
                self.edge_flags
                    .get((index - segment_base) / segments)
                    .copied()
                    .unwrap_or_default()
            };
            *edge = FinalEdge {
                v1,
                v2,
                flag,
                ..Default::default()
            };
        }
        Ok(())
    }

    /// Writes all final quads into `out`.
    pub fn copy_face_array(&self, out: &mut [FinalFace]) -> Result<()> {
        Error::check_len(self.face_count(), out.len())?;
        for (index, (v, face)) in self.layout.final_quads().zip(out.iter_mut()).enumerate() {
            let flag_mat = self.quad_flag_mat(index);
            *face = FinalFace {
                v,
                mat_nr: flag_mat.mat_nr,
                flag: flag_mat.flag,
                edcode: 0,
            };
        }
        Ok(())
    }

    /// Final edge index per unordered vertex pair.
    fn edge_hash(&self) -> Arc<HashMap<(u32, u32), u32>> {
        self.edge_hash.get_or_init(|| {
            self.layout
                .final_edges()
                .enumerate()
                .map(|(index, [v1, v2])| ((v1.min(v2), v1.max(v2)), index as u32))
                .collect()
        })
    }

    /// Writes four loops per final quad into `out`.
    pub fn copy_loop_array(&self, out: &mut [FinalLoop]) -> Result<()> {
        Error::check_len(self.loop_count(), out.len())?;
        let hash = self.edge_hash();
        for (quad, loops) in self.layout.final_quads().zip(out.chunks_exact_mut(4)) {
            for (k, l) in loops.iter_mut().enumerate() {
                let (a, b) = (quad[k], quad[(k + 1) % 4]);
                let e = *hash.get(&(a.min(b), a.max(b))).ok_or_else(|| {
                    Error::InvalidTopology(format!("No final edge between {a} and {b}."))
                })?;
                *l = FinalLoop { v: a, e };
            }
        }
        Ok(())
    }

    /// Writes one four loop polygon per final quad into `out`.
    pub fn copy_poly_array(&self, out: &mut [FinalPoly]) -> Result<()> {
        Error::check_len(self.face_count(), out.len())?;
        for (index, poly) in out.iter_mut().enumerate() {
            *poly = FinalPoly::new(4 * index as u32, self.quad_flag_mat(index));
        }
        Ok(())
    }

    pub fn vertices(&self) -> Result<Vec<FinalVert>> {
        let mut out = vec![FinalVert::default(); self.vertex_count()];
        self.copy_vertex_array(&mut out)?;
        Ok(out)
    }

    pub fn edges(&self) -> Result<Vec<FinalEdge>> {
        let mut out = vec![FinalEdge::default(); self.edge_count()];
        self.copy_edge_array(&mut out)?;
        Ok(out)
    }

    pub fn faces(&self) -> Result<Vec<FinalFace>> {
        let mut out = vec![FinalFace::default(); self.face_count()];
        self.copy_face_array(&mut out)?;
        Ok(out)
    }

    pub fn loops(&self) -> Result<Vec<FinalLoop>> {
        let mut out = vec![FinalLoop::default(); self.loop_count()];
        self.copy_loop_array(&mut out)?;
        Ok(out)
    }

    pub fn polys(&self) -> Result<Vec<FinalPoly>> {
        let mut out = vec![FinalPoly::default(); self.face_count()];
        self.copy_poly_array(&mut out)?;
        Ok(out)
    }

    /// Positions of all final vertices.
    pub fn vertex_cos(&self) -> Result<Vec<[f32; 3]>> {
        let grids = self.grid_data()?;
        Ok((0..self.vertex_count()).map(|i| grids.position(i)).collect())
    }

    /// Bounding box of all final vertices, `None` for an empty mesh.
    pub fn min_max(&self) -> Option<([f32; 3], [f32; 3])> {
        let grids = self.store.grids()?;
        (0..self.vertex_count())
            .map(|i| grids.position(i))
            .fold(None, |bounds, p| {
                let (mut min, mut max) = bounds.unwrap_or((p, p));
                for k in 0..3 {
                    min[k] = min[k].min(p[k]);
                    max[k] = max[k].max(p[k]);
                }
                Some((min, max))
            })
    }

    /// Source vertex of every final vertex; [`ORIGINDEX_NONE`] for points
    /// created by subdivision.
    pub fn vertex_origindex(&self) -> Arc<Vec<i32>> {
        self.vert_origindex.get_or_init(|| {
            let mut origindex = vec![ORIGINDEX_NONE; self.vertex_count()];
            for vert in self.store.verts() {
                origindex[self.layout.vert_index(vert.index()) as usize] = vert.user().origin;
            }
            origindex
        })
    }

    /// Source edge of every final edge; [`ORIGINDEX_NONE`] inside faces.
    pub fn edge_origindex(&self) -> Arc<Vec<i32>> {
        self.edge_origindex.get_or_init(|| {
            let mut origindex = vec![ORIGINDEX_NONE; self.edge_count()];
            let segments = self.layout.edge_size() - 1;
            for edge in self.store.edges() {
                let start = self.layout.edge_segment_start(edge.index()) as usize;
                origindex[start..start + segments].fill(edge.user().origin);
            }
            origindex
        })
    }

    /// Source face of every final polygon.
    pub fn poly_origindex(&self) -> Arc<Vec<i32>> {
        self.poly_origindex.get_or_init(|| {
            let origins = self
                .store
                .faces()
                .map(|face| face.user().origin)
                .collect::<Vec<_>>();
            self.reverse_face_map
                .iter()
                .map(|&face| origins[face as usize])
                .collect()
        })
    }

    /// Every final quad is its own tessellated face.
    pub fn tess_face_origindex(&self) -> Vec<i32> {
        (0..self.face_count() as i32).collect()
    }

    fn normal_of(&self, grids: &GridData, index: usize) -> Option<[f32; 3]> {
        grids.key().has_normals.then(|| grids.normal(index))
    }

    /// Calls `f` with the source index, position and normal of every coarse
    /// vertex that maps to a source vertex.
    pub fn foreach_mapped_vert(&self, mut f: impl FnMut(i32, [f32; 3], Option<[f32; 3]>)) {
        let Some(grids) = self.store.grids() else {
            return;
        };
        for vert in self.store.verts() {
            let origin = vert.user().origin;
            if ORIGINDEX_NONE != origin {
                let index = self.layout.vert_index(vert.index()) as usize;
                f(origin, grids.position(index), self.normal_of(grids, index));
            }
        }
    }

    /// Calls `f` with the source index and end points of every segment of
    /// every mapped coarse edge.
    pub fn foreach_mapped_edge(&self, mut f: impl FnMut(i32, [f32; 3], [f32; 3])) {
        let Some(grids) = self.store.grids() else {
            return;
        };
        let segments = self.layout.edge_size() - 1;
        for edge in self.store.edges() {
            let origin = edge.user().origin;
            if ORIGINDEX_NONE == origin {
                continue;
            }
            for x in 0..segments {
                let a = self.layout.edge_vertex_index(edge.index(), x) as usize;
                let b = self.layout.edge_vertex_index(edge.index(), x + 1) as usize;
                f(origin, grids.position(a), grids.position(b));
            }
        }
    }

    /// Calls `f` with the source index, center and center normal of every
    /// mapped coarse face.
    pub fn foreach_mapped_face_center(&self, mut f: impl FnMut(i32, [f32; 3], Option<[f32; 3]>)) {
        let Some(grids) = self.store.grids() else {
            return;
        };
        for face in self.store.faces() {
            let origin = face.user().origin;
            if ORIGINDEX_NONE != origin {
                let index = self.layout.face_base(face.index()) as usize;
                f(origin, grids.position(index), self.normal_of(grids, index));
            }
        }
    }

    /// The grids of every face corner, built on first access.
    pub fn grid_set(&self) -> Result<Arc<GridSet>> {
        self.grids
            .get_or_try_init(|| GridSet::build(self.grid_data()?, &self.store, &self.face_flags))
    }

    /// Mutable grids for sculpting. Call [`mark_modified()`](Self::mark_modified)
    /// after editing so the displacement sink receives them.
    pub fn grid_set_mut(&mut self) -> Result<&mut GridSet> {
        self.grid_set()?;
        self.grids.get_mut().ok_or(Error::SyncNotStarted)
    }

    #[inline]
    pub fn grid_count(&self) -> usize {
        (0..self.face_map.len())
            .map(|face| self.layout.valence(face))
            .sum()
    }

    #[inline]
    pub fn grid_size(&self) -> usize {
        self.layout.grid_size()
    }

    /// Loads a per loop paint mask into the mask channel of the grids.
    ///
    /// Does nothing for grids without a mask channel.
    pub fn load_paint_mask(&mut self, mesh: &MeshDescriptor, masks: &[GridPaintMask]) -> Result<()> {
        Error::check_len(mesh.loops_len(), masks.len())?;
        let mut paint_mask = vec![0.0; self.vertex_count()];
        crate::displacement::copy_grid_paint_mask(self, mesh, masks, &mut paint_mask)?;

        let layout = self.layout.clone();
        let valences = self
            .store
            .faces()
            .map(|face| face.valence())
            .collect::<Vec<_>>();
        let grids = self.grid_set_mut()?;
        let Some(offset) = grids.key().mask_offset() else {
            return Ok(());
        };
        let g = grids.key().grid_size;
        let mut grid = 0;
        for (f, &n) in valences.iter().enumerate() {
            for s in 0..n {
                for y in 0..g {
                    for x in 0..g {
                        let vert = layout.face_vertex_index(f, s, x, y) as usize;
                        grids.element_mut(grid, x, y)[offset] = paint_mask[vert];
                    }
                }
                grid += 1;
            }
        }
        Ok(())
    }

    /// Records edits to the grids for the displacement sink.
    pub fn mark_modified(&mut self, flags: ModifiedFlags) {
        self.modified |= flags;
    }

    #[inline]
    pub fn modified(&self) -> ModifiedFlags {
        self.modified
    }

    /// The face the grid `grid` belongs to, by handle.
    pub fn grid_face_handle(&self, grid: usize) -> Option<FaceHandle> {
        let grids = self.grids.get()?;
        self.store
            .face(grids.grid_faces.get(grid).copied()? as usize)
            .map(|face| face.handle())
    }
}

impl Drop for DerivedMesh<'_> {
    fn drop(&mut self) {
        if self.modified.is_empty() {
            return;
        }
        let (Some(mut sink), Some(grids)) = (self.sink.take(), self.grids.get()) else {
            return;
        };
        if self.modified.contains(ModifiedFlags::COORDS) {
            sink.update_coords(&grids);
        }
        if self.modified.contains(ModifiedFlags::HIDDEN) {
            sink.update_hidden(&grids);
        }
    }
}
