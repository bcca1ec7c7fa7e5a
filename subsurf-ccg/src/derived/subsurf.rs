//! Modifier level entry point: picks, reuses and caches stores.
use super::{DerivedMesh, DerivedOptions, StoreRef};
use crate::{
    sync::{sync_from_mesh, MeshDescriptor},
    topology::{StoreOptions, TopologyStore},
    Result,
};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Refinement rules.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
pub enum SubdivType {
    #[default]
    CatmullClark = 0,
    /// Bilinear refinement with every edge fully creased.
    Simple = 1,
}

/// User settings of a subdivision surface.
///
/// # Examples
///
/// ```
/// use subsurf_ccg::derived::SubsurfSettings;
///
/// let settings = SubsurfSettings {
///     levels: 2,
///     ..Default::default()
/// };
/// assert_eq!(settings.render_levels, 2);
/// assert!(settings.subsurf_uv);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubsurfSettings {
    /// Level used interactively.
    pub levels: usize,
    /// Level used for final renders.
    pub render_levels: usize,
    pub subdiv_type: SubdivType,
    /// Keep the store between evaluations and only update what changed.
    pub incremental: bool,
    /// Track element ages in incremental stores.
    pub debug_incremental: bool,
    /// Subdivide UV maps as surfaces of their own.
    pub subsurf_uv: bool,
    /// Only flag edges lying on coarse edges for drawing.
    pub control_edges: bool,
}

impl Default for SubsurfSettings {
    /// | Property            | Value          |
    /// |---------------------|----------------|
    /// | `levels`            | `1`            |
    /// | `render_levels`     | `2`            |
    /// | `subdiv_type`       | `CatmullClark` |
    /// | `incremental`       | `false`        |
    /// | `debug_incremental` | `false`        |
    /// | `subsurf_uv`        | `true`         |
    /// | `control_edges`     | `false`        |
    fn default() -> Self {
        Self {
            levels: 1,
            render_levels: 2,
            subdiv_type: SubdivType::CatmullClark,
            incremental: false,
            debug_incremental: false,
            subsurf_uv: true,
            control_edges: false,
        }
    }
}

impl SubsurfSettings {
    #[inline]
    fn is_simple(&self) -> bool {
        SubdivType::Simple == self.subdiv_type
    }

    fn derived_options(&self) -> DerivedOptions {
        DerivedOptions {
            draw_interior_edges: !self.control_edges,
            use_subsurf_uv: self.subsurf_uv,
        }
    }
}

bitflags::bitflags! {
    /// Context of an evaluation.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct SubsurfFlags: u8 {
        /// Evaluating the edit mode cage.
        const FOR_EDIT_MODE = 1;
        /// Use render levels and a throw away store.
        const USE_RENDER_PARAMS = 1 << 1;
        /// The result is the final mesh of the object.
        const IS_FINAL_CALC = 1 << 2;
        /// Give grids a paint mask channel.
        const ALLOC_PAINT_MASK = 1 << 3;
        /// The object is in edit mode.
        const IN_EDIT_MODE = 1 << 4;
    }
}

/// Stores kept alive between evaluations of one modifier.
#[derive(Debug, Default)]
pub struct SubsurfCache {
    em_cache: Option<TopologyStore>,
    m_cache: Option<TopologyStore>,
}

impl SubsurfCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The store kept for edit mode evaluation.
    #[inline]
    pub fn edit_mode_store(&self) -> Option<&TopologyStore> {
        self.em_cache.as_ref()
    }

    /// The store kept for final evaluation.
    #[inline]
    pub fn final_store(&self) -> Option<&TopologyStore> {
        self.m_cache.as_ref()
    }

    /// Drops both cached stores.
    pub fn clear(&mut self) {
        self.em_cache = None;
        self.m_cache = None;
    }

    /// Subdivides `mesh`.
    ///
    /// Returns `None` when the level in effect is `0`; the caller keeps
    /// using `mesh` unchanged then.
    ///
    /// * Edit mode evaluations reuse the edit mode store.
    /// * Render evaluations build a throw away store the result owns.
    /// * Final incremental evaluations reuse the final store.
    /// * Other final evaluations replace the final store with a fresh one,
    ///   other non-final evaluations get a store they own.
    ///
    /// Outside edit mode the edit mode store is dropped.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, name = "subsurf::make_derived"))]
    pub fn make_derived<'c>(
        &'c mut self,
        mesh: &MeshDescriptor,
        settings: &SubsurfSettings,
        vertex_cos: Option<&[f32]>,
        flags: SubsurfFlags,
    ) -> Result<Option<DerivedMesh<'c>>> {
        let simple = settings.is_simple();
        let options = settings.derived_options();
        let store_options = |use_aging: bool, use_arena: bool, alloc_mask: bool| StoreOptions {
            use_aging,
            use_arena,
            calc_normals: true,
            alloc_mask,
            simple_subdiv: simple,
        };

        if flags.contains(SubsurfFlags::FOR_EDIT_MODE) {
            if 0 == settings.levels {
                return Ok(None);
            }
            let previous = self.em_cache.take();
            let store = self.em_cache.insert(TopologyStore::new_or_reuse(
                previous,
                settings.levels,
                3,
                store_options(settings.debug_incremental, false, false),
            ));
            sync_from_mesh(store, mesh, vertex_cos, simple)?;
            return DerivedMesh::new(StoreRef::Borrowed(store), mesh, options).map(Some);
        }

        if flags.contains(SubsurfFlags::USE_RENDER_PARAMS) {
            if 0 == settings.render_levels {
                return Ok(None);
            }
            let mut store = Box::new(TopologyStore::new(
                settings.render_levels,
                3,
                store_options(false, true, false),
            ));
            sync_from_mesh(&mut store, mesh, vertex_cos, simple)?;
            return DerivedMesh::new(StoreRef::Owned(store), mesh, options).map(Some);
        }

        if !flags.contains(SubsurfFlags::IN_EDIT_MODE) && self.em_cache.take().is_some() {
            log::debug!("Dropped the edit mode store outside of edit mode");
        }
        if 0 == settings.levels {
            return Ok(None);
        }

        let is_final = flags.contains(SubsurfFlags::IS_FINAL_CALC);
        if settings.incremental && is_final {
            let previous = self.m_cache.take();
            let store = self.m_cache.insert(TopologyStore::new_or_reuse(
                previous,
                settings.levels,
                3,
                store_options(settings.debug_incremental, false, false),
            ));
            sync_from_mesh(store, mesh, vertex_cos, simple)?;
            return DerivedMesh::new(StoreRef::Borrowed(store), mesh, options).map(Some);
        }

        let alloc_mask = flags.contains(SubsurfFlags::ALLOC_PAINT_MASK);
        let store = TopologyStore::new(settings.levels, 3, store_options(false, true, alloc_mask));
        let mut derived = if is_final {
            let store = self.m_cache.insert(store);
            sync_from_mesh(store, mesh, vertex_cos, simple)?;
            DerivedMesh::new(StoreRef::Borrowed(store), mesh, options)?
        } else {
            let mut store = Box::new(store);
            sync_from_mesh(&mut store, mesh, vertex_cos, simple)?;
            DerivedMesh::new(StoreRef::Owned(store), mesh, options)?
        };

        if let (true, Some(masks)) = (alloc_mask, mesh.paint_mask_layer()) {
            derived.load_paint_mask(mesh, masks)?;
        }
        Ok(Some(derived))
    }
}
