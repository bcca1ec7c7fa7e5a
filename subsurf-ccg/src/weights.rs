//! Interpolation weights of grid points relative to a face's corners.
//!
//! For a face of valence `n`, every grid point `(S, x, y)` gets `n` weights,
//! one per face corner. They are used to carry per-vertex and per-loop
//! attributes of the coarse face onto the grid.
//!
//! The table reproduces the classic subsurf weighting: bilinear inside a
//! quad, with a correction that redistributes weight for other valences so
//! that every row sums to one.
//!
//! ```
//! # use subsurf_ccg::weights::WeightTable;
//! // Grid size 5 has 3 cuts.
//! let mut table = WeightTable::new(3);
//! let quad = table.weights(4)?;
//!
//! // The outer grid corner of `S` is corner vertex `S`.
//! assert_eq!(quad.row(2, 4, 4), &[0.0, 0.0, 1.0, 0.0]);
//! // The face center weighs all corners equally.
//! assert_eq!(quad.center(), &[0.25; 4]);
//! # Ok::<(), subsurf_ccg::Error>(())
//! ```
use crate::error::try_reserve;
use crate::Result;

/// Weight rows for one valence.
#[derive(Copy, Clone, Debug)]
pub struct Weights<'a> {
    valence: usize,
    grid_size: usize,
    data: &'a [f32],
}

impl<'a> Weights<'a> {
    #[inline]
    pub fn valence(&self) -> usize {
        self.valence
    }

    /// Weights of point `(x, y)` in corner `S`'s grid.
    #[inline]
    pub fn row(&self, corner: usize, x: usize, y: usize) -> &'a [f32] {
        let n = self.valence;
        let g = self.grid_size;
        let start = corner * n * g * g + (y * g + x) * n;
        &self.data[start..start + n]
    }

    /// Weights of the face center.
    #[inline]
    pub fn center(&self) -> &'a [f32] {
        self.row(0, 0, 0)
    }

    /// Weights of point `(x, 0)` on the seam between grid `S` and grid
    /// `S + 1`.
    #[inline]
    pub fn seam(&self, corner: usize, x: usize) -> &'a [f32] {
        self.row(corner, x, 0)
    }

    /// Weights of the four loops of cell `(x, y)`, in loop order.
    #[inline]
    pub fn cell(&self, corner: usize, x: usize, y: usize) -> [&'a [f32]; 4] {
        [
            self.row(corner, x, y),
            self.row(corner, x, y + 1),
            self.row(corner, x + 1, y + 1),
            self.row(corner, x + 1, y),
        ]
    }
}

/// Memoized weight rows per valence for one grid size.
#[derive(Clone, Debug, Default)]
pub struct WeightTable {
    grid_cuts: usize,
    tables: Vec<Option<Box<[f32]>>>,
}

impl WeightTable {
    /// Creates an empty table for grids with `grid_cuts` interior rows.
    pub fn new(grid_cuts: usize) -> Self {
        Self {
            grid_cuts,
            tables: Vec::new(),
        }
    }

    #[inline]
    pub fn grid_cuts(&self) -> usize {
        self.grid_cuts
    }

    #[inline]
    pub fn grid_size(&self) -> usize {
        self.grid_cuts + 2
    }

    /// Computes the rows for `valence` unless they are cached.
    pub fn prepare(&mut self, valence: usize) -> Result<()> {
        if self.tables.len() <= valence {
            self.tables.resize(valence + 1, None);
        }
        if self.tables[valence].is_none() {
            self.tables[valence] = Some(compute(self.grid_cuts, valence)?);
        }
        Ok(())
    }

    /// Rows for `valence`, computing them on first use.
    pub fn weights(&mut self, valence: usize) -> Result<Weights<'_>> {
        self.prepare(valence)?;
        Ok(self.cached(valence).unwrap_or(Weights {
            valence,
            grid_size: self.grid_size(),
            data: &[],
        }))
    }

    /// Rows for `valence` if [`prepare()`](Self::prepare) ran for it.
    pub fn cached(&self, valence: usize) -> Option<Weights<'_>> {
        let data = self.tables.get(valence)?.as_deref()?;
        Some(Weights {
            valence,
            grid_size: self.grid_size(),
            data,
        })
    }
}

fn compute(grid_cuts: usize, valence: usize) -> Result<Box<[f32]>> {
    let g = grid_cuts + 2;
    let n = valence;
    let len = n * g * g * n;
    let mut data = Vec::new();
    try_reserve(&mut data, len, "weight table")?;
    data.resize(len, 0.0);
    if 0 == n {
        return Ok(data.into_boxed_slice());
    }

    let fac = 1.0 / n as f32;
    let fac2 = n as f32 - 4.0;
    let steps = (grid_cuts + 1) as f32;

    // Rows are stored as [corner][x][y] and read back as [corner][y][x].
    for (i, corner) in data.chunks_exact_mut(g * g * n).enumerate() {
        for (x, column) in corner.chunks_exact_mut(g * n).enumerate() {
            for (y, w) in column.chunks_exact_mut(n).enumerate() {
                let fx = 0.5 - x as f32 / steps / 2.0;
                let fy = 0.5 - y as f32 / steps / 2.0;

                let w1 = (1.0 - fx) * (1.0 - fy) - fac2 * fx * fy * fac;
                let w2 = (1.0 - fx - fac2 * fx * fac) * fy;
                let w4 = fx * (1.0 - fy - fac2 * fy * fac);

                // Triangles have no remaining corners.
                if 3 < n {
                    let rest = (1.0 - (w1 + w2 + w4)) / (n - 3) as f32;
                    w.fill(rest);
                }
                w[i] = w1;
                w[(i + n - 1) % n] = w2;
                w[(i + 1) % n] = w4;
            }
        }
    }
    Ok(data.into_boxed_slice())
}
