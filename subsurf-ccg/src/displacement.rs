//! Per loop sculpt data: hidden grid points, paint masks and the hook that
//! writes edited grids back to a displacement layer.
use crate::{
    derived::{DerivedMesh, FinalVert, GridSet, VertFlags},
    index::grid_size_for_level,
    sync::MeshDescriptor,
    Error, Result,
};

/// One bit per point of a square grid.
///
/// ```
/// # use subsurf_ccg::displacement::GridBitmap;
/// let mut hidden = GridBitmap::new(5);
/// hidden.set(3, 1, true);
/// assert!(hidden.get(3, 1));
/// assert_eq!(hidden.count(), 1);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct GridBitmap {
    grid_size: usize,
    bits: Vec<u64>,
}

impl GridBitmap {
    /// An all clear bitmap for a grid of `grid_size` points per side.
    pub fn new(grid_size: usize) -> Self {
        Self {
            grid_size,
            bits: vec![0; (grid_size * grid_size).div_ceil(64)],
        }
    }

    #[inline]
    pub fn grid_size(&self) -> usize {
        self.grid_size
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> bool {
        self.test(y * self.grid_size + x)
    }

    /// The bit at flat offset `offset`; `false` when out of range.
    #[inline]
    pub fn test(&self, offset: usize) -> bool {
        self.bits
            .get(offset / 64)
            .is_some_and(|word| 0 != word & (1 << (offset % 64)))
    }

    pub fn set(&mut self, x: usize, y: usize, value: bool) {
        let offset = y * self.grid_size + x;
        if let Some(word) = self.bits.get_mut(offset / 64) {
            if value {
                *word |= 1 << (offset % 64);
            } else {
                *word &= !(1 << (offset % 64));
            }
        }
    }

    /// Number of set bits.
    pub fn count(&self) -> usize {
        self.bits.iter().map(|word| word.count_ones() as usize).sum()
    }
}

/// Hidden points of the grid of one loop, stored at `level`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GridHidden {
    pub level: usize,
    pub hidden: Option<GridBitmap>,
}

/// Paint mask of the grid of one loop, stored at `level`, row major.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GridPaintMask {
    pub level: usize,
    pub data: Vec<f32>,
}

/// Flat offset into a grid stored at `src_level` of point `(x, y)` of a
/// grid at `level`.
///
/// Finer sources are sampled at every `2^(src_level - level)`th point,
/// coarser ones are looked up at the covering point.
#[inline]
fn source_offset(src_level: usize, level: usize, x: usize, y: usize) -> usize {
    let src_grid = grid_size_for_level(src_level);
    if level <= src_level {
        let factor = 1 << (src_level - level);
        y * factor * src_grid + x * factor
    } else {
        let shift = level - src_level;
        (y >> shift) * src_grid + (x >> shift)
    }
}

/// Visits every grid point of `derived` with its loop and final vertex.
fn for_each_grid_point(
    derived: &DerivedMesh,
    mesh: &MeshDescriptor,
    mut visit: impl FnMut(usize, usize, usize, u32),
) {
    let layout = derived.layout();
    let g = layout.grid_size();
    for face in derived.store().faces() {
        let f = face.handle().0 as usize;
        if mesh.faces_len() <= f {
            continue;
        }
        let loop_start = mesh.loop_start(f);
        for corner in 0..face.valence() {
            for y in 0..g {
                for x in 0..g {
                    let vert = layout.face_vertex_index(face.index(), corner, x, y);
                    visit(loop_start + corner, x, y, vert);
                }
            }
        }
    }
}

/// Sets [`VertFlags::HIDE`] on every final vertex whose grid point is
/// hidden in `hidden`.
pub fn copy_grid_hidden(
    derived: &DerivedMesh,
    mesh: &MeshDescriptor,
    hidden: &[GridHidden],
    verts: &mut [FinalVert],
) -> Result<()> {
    Error::check_len(mesh.loops_len(), hidden.len())?;
    Error::check_len(derived.vertex_count(), verts.len())?;
    let level = derived.level();
    for_each_grid_point(derived, mesh, |loop_index, x, y, vert| {
        let grid = &hidden[loop_index];
        if let Some(bitmap) = &grid.hidden {
            if bitmap.test(source_offset(grid.level, level, x, y)) {
                verts[vert as usize].flag |= VertFlags::HIDE;
            }
        }
    });
    Ok(())
}

/// Copies the per loop paint mask onto the final vertices.
pub fn copy_grid_paint_mask(
    derived: &DerivedMesh,
    mesh: &MeshDescriptor,
    masks: &[GridPaintMask],
    paint_mask: &mut [f32],
) -> Result<()> {
    Error::check_len(mesh.loops_len(), masks.len())?;
    Error::check_len(derived.vertex_count(), paint_mask.len())?;
    let level = derived.level();
    for_each_grid_point(derived, mesh, |loop_index, x, y, vert| {
        let grid = &masks[loop_index];
        if let Some(&value) = grid.data.get(source_offset(grid.level, level, x, y)) {
            paint_mask[vert as usize] = value;
        }
    });
    Ok(())
}

bitflags::bitflags! {
    /// What changed in a [`GridSet`] since it was handed out.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ModifiedFlags: u8 {
        const COORDS = 1;
        const HIDDEN = 1 << 1;
    }
}

/// Receives edited grids when a [`DerivedMesh`] is dropped.
///
/// This is where sculpted grid coordinates are turned back into
/// displacements of the original surface.
pub trait DisplacementSink: Send {
    /// Grid coordinates were edited.
    fn update_coords(&mut self, grids: &GridSet);

    /// Grid visibility was edited.
    fn update_hidden(&mut self, grids: &GridSet);
}
