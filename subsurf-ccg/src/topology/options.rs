//! Options controlling a [`TopologyStore`](super::TopologyStore).
use super::allocator::AllocatorKind;

/// Number of sync generations after which an element's age stops growing.
pub const AGE_LIMIT: u8 = 8;

/// Store configuration.
///
/// # Examples
///
/// ```
/// use subsurf_ccg::topology::StoreOptions;
///
/// // Long lived store used for interactive editing.
/// let options = StoreOptions {
///     use_aging: true,
///     ..Default::default()
/// };
/// assert!(options.calc_normals);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct StoreOptions {
    /// Track how many generations ago each element was created or changed.
    pub use_aging: bool,
    /// Use an [`ArenaAllocator`](super::allocator::ArenaAllocator).
    pub use_arena: bool,
    /// Compute per point normals for every grid.
    pub calc_normals: bool,
    /// Append one mask float to every grid element.
    pub alloc_mask: bool,
    /// Bilinear instead of Catmull-Clark refinement.
    pub simple_subdiv: bool,
}

impl Default for StoreOptions {
    /// Create options with the following defaults:
    ///
    /// | Property        | Value   |
    /// |-----------------|---------|
    /// | `use_aging`     | `false` |
    /// | `use_arena`     | `false` |
    /// | `calc_normals`  | `true`  |
    /// | `alloc_mask`    | `false` |
    /// | `simple_subdiv` | `false` |
    fn default() -> Self {
        Self {
            use_aging: false,
            use_arena: false,
            calc_normals: true,
            alloc_mask: false,
            simple_subdiv: false,
        }
    }
}

impl StoreOptions {
    /// The allocation strategy these options select.
    #[inline]
    pub fn allocator_kind(&self) -> AllocatorKind {
        if self.use_arena {
            AllocatorKind::Arena
        } else {
            AllocatorKind::Heap
        }
    }

    /// Whether a store built with `self` can be reused for `other`.
    #[inline]
    pub fn is_compatible(&self, other: &StoreOptions) -> bool {
        self.use_aging == other.use_aging && self.simple_subdiv == other.simple_subdiv
    }
}
