//! Evaluated grid data.
//!
//! A [`GridData`] holds one point per final-mesh vertex address (see
//! [`IndexLayout`]): the refined coordinates, the optional normals and the
//! optional paint mask. It is produced by [`evaluate()`] from a cached
//! [`RefinePlan`].
use crate::error::try_reserve;
use crate::index::{edge_size_for_grid, grid_size_for_level, IndexLayout, MeshTopology};
use crate::Result;

pub mod refine;

pub use refine::{FirstPass, RefineInput, RefinePlan, RefineScratch};

/// Marks "no element" in index maps.
pub(crate) const NONE: u32 = u32::MAX;

const EPSILON: f32 = 1.0e-6;

/// Describes the layout of one grid element.
///
/// An element has `layers` coordinate floats, then a mask float when
/// `has_mask`, then three normal floats when `has_normals`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct GridKey {
    pub level: usize,
    pub layers: usize,
    pub grid_size: usize,
    pub has_normals: bool,
    pub has_mask: bool,
}

impl GridKey {
    pub fn new(level: usize, layers: usize, has_normals: bool, has_mask: bool) -> Self {
        Self {
            level,
            layers,
            grid_size: grid_size_for_level(level),
            has_normals,
            has_mask,
        }
    }

    /// Number of floats per grid element.
    #[inline]
    pub fn elem_size(&self) -> usize {
        self.layers + usize::from(self.has_mask) + 3 * usize::from(self.has_normals)
    }

    /// Number of elements per grid.
    #[inline]
    pub fn grid_area(&self) -> usize {
        self.grid_size * self.grid_size
    }

    #[inline]
    pub fn edge_size(&self) -> usize {
        edge_size_for_grid(self.grid_size)
    }

    /// Float offset of the mask inside an element.
    #[inline]
    pub fn mask_offset(&self) -> Option<usize> {
        self.has_mask.then_some(self.layers)
    }

    /// Float offset of the normal inside an element.
    #[inline]
    pub fn normal_offset(&self) -> Option<usize> {
        self.has_normals
            .then_some(self.layers + usize::from(self.has_mask))
    }
}

/// Refined points of every final-mesh vertex.
#[derive(Clone, Debug)]
pub struct GridData {
    key: GridKey,
    layout: IndexLayout,
    co: Vec<f32>,
    normals: Vec<[f32; 3]>,
    mask: Vec<f32>,
}

impl GridData {
    #[inline]
    pub fn key(&self) -> GridKey {
        self.key
    }

    #[inline]
    pub fn layout(&self) -> &IndexLayout {
        &self.layout
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.layout.vertex_count()
    }

    /// All coordinates, `key().layers` floats per vertex.
    #[inline]
    pub fn points(&self) -> &[f32] {
        &self.co
    }

    /// Coordinates of the final vertex `index`.
    #[inline]
    pub fn co(&self, index: usize) -> &[f32] {
        let layers = self.key.layers;
        &self.co[index * layers..(index + 1) * layers]
    }

    #[inline]
    pub fn co_mut(&mut self, index: usize) -> &mut [f32] {
        let layers = self.key.layers;
        &mut self.co[index * layers..(index + 1) * layers]
    }

    /// The first three coordinates of `index`, zero padded.
    pub fn position(&self, index: usize) -> [f32; 3] {
        let mut position = [0.0; 3];
        for (p, c) in position.iter_mut().zip(self.co(index)) {
            *p = *c;
        }
        position
    }

    /// Normal of `index`. Zero when normals are not computed.
    #[inline]
    pub fn normal(&self, index: usize) -> [f32; 3] {
        self.normals.get(index).copied().unwrap_or_default()
    }

    #[inline]
    pub fn normals(&self) -> &[[f32; 3]] {
        &self.normals
    }

    /// Paint mask of `index`. Zero when no mask is allocated.
    #[inline]
    pub fn mask(&self, index: usize) -> f32 {
        self.mask.get(index).copied().unwrap_or_default()
    }

    #[inline]
    pub fn masks(&self) -> &[f32] {
        &self.mask
    }

    #[inline]
    pub fn masks_mut(&mut self) -> &mut [f32] {
        &mut self.mask
    }

    /// Writes `index`'s element in [`GridKey`] layout into `out`.
    pub fn write_element(&self, index: usize, out: &mut [f32]) {
        let layers = self.key.layers;
        out[..layers].copy_from_slice(self.co(index));
        if let Some(offset) = self.key.mask_offset() {
            out[offset] = self.mask(index);
        }
        if let Some(offset) = self.key.normal_offset() {
            out[offset..offset + 3].copy_from_slice(&self.normal(index));
        }
    }

    /// Copy of the element of grid point `(x, y)` of `corner`'s grid in
    /// `face`.
    pub fn grid_element(&self, face: usize, corner: usize, x: usize, y: usize) -> Vec<f32> {
        let mut out = vec![0.0; self.key.elem_size()];
        self.write_element(self.layout.face_vertex_index(face, corner, x, y) as usize, &mut out);
        out
    }
}

/// Refines `input` with `plan` and computes normals when `key` asks for
/// them.
///
/// The result is built in new buffers; `previous` is only read. Its paint
/// mask is carried over when the vertex count is unchanged.
#[cfg_attr(feature = "tracing", tracing::instrument(skip_all, name = "grid::evaluate"))]
pub fn evaluate(
    plan: &RefinePlan,
    coarse: &MeshTopology,
    input: &RefineInput,
    key: GridKey,
    previous: Option<&GridData>,
    scratch: &mut RefineScratch,
) -> Result<GridData> {
    let layout = plan.layout().clone();
    let vertex_count = layout.vertex_count();

    let co = plan.refine(input, scratch)?;

    let mut mask = Vec::new();
    if key.has_mask {
        try_reserve(&mut mask, vertex_count, "grid mask")?;
        match previous {
            Some(previous) if previous.mask.len() == vertex_count => {
                mask.extend_from_slice(&previous.mask)
            }
            _ => mask.resize(vertex_count, 0.0),
        }
    }

    let mut normals = Vec::new();
    if key.has_normals {
        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!("normals").entered();

        compute_normals(&layout, coarse, input, &co, &mut scratch.normal_owner, &mut normals)?;
    }

    Ok(GridData {
        key,
        layout,
        co,
        normals,
        mask,
    })
}

/// Accumulates quad normals per final vertex and renormalizes them.
///
/// A vertex whose sum vanishes gets the unit Newell normal of the coarse
/// face it was first seen in, or `+Z` when that face is degenerate too.
fn compute_normals(
    layout: &IndexLayout,
    coarse: &MeshTopology,
    input: &RefineInput,
    co: &[f32],
    owner: &mut Vec<u32>,
    normals: &mut Vec<[f32; 3]>,
) -> Result<()> {
    let layers = input.layers;
    let vertex_count = layout.vertex_count();
    try_reserve(normals, vertex_count, "grid normals")?;
    normals.resize(vertex_count, [0.0; 3]);

    let position = |index: u32| -> [f32; 3] {
        let mut p = [0.0; 3];
        let start = index as usize * layers;
        for (k, value) in p.iter_mut().enumerate().take(layers) {
            *value = co[start + k];
        }
        p
    };

    owner.clear();
    try_reserve(owner, vertex_count, "grid normals")?;
    owner.resize(vertex_count, NONE);
    let cells = layout.grid_size() - 1;
    for face in 0..coarse.face_count() {
        for corner in 0..coarse.valence(face) {
            for y in 0..cells {
                for x in 0..cells {
                    let quad = layout.cell_vertices(face, corner, x, y);
                    let [a, b, c, d] = quad.map(position);
                    let normal = cross(sub(c, a), sub(d, b));
                    for &v in &quad {
                        let n = &mut normals[v as usize];
                        n[0] += normal[0];
                        n[1] += normal[1];
                        n[2] += normal[2];
                        if NONE == owner[v as usize] {
                            owner[v as usize] = face as u32;
                        }
                    }
                }
            }
        }
    }

    for (normal, &face) in normals.iter_mut().zip(owner.iter()) {
        *normal = match normalize(*normal) {
            Some(n) => n,
            None if NONE == face => [0.0; 3],
            None => newell_normal(coarse, input, face as usize).unwrap_or([0.0, 0.0, 1.0]),
        };
    }
    Ok(())
}

/// Unit Newell normal of a coarse face, `None` when it has no area.
fn newell_normal(coarse: &MeshTopology, input: &RefineInput, face: usize) -> Option<[f32; 3]> {
    let layers = input.layers;
    let corner = |v: u32| -> [f32; 3] {
        let mut p = [0.0; 3];
        let start = v as usize * layers;
        for (k, value) in p.iter_mut().enumerate().take(layers) {
            *value = input.positions[start + k];
        }
        p
    };

    let verts = coarse.face_vertices(face);
    let mut normal = [0.0f32; 3];
    for (i, &v) in verts.iter().enumerate() {
        let a = corner(v);
        let b = corner(verts[(i + 1) % verts.len()]);
        normal[0] += (a[1] - b[1]) * (a[2] + b[2]);
        normal[1] += (a[2] - b[2]) * (a[0] + b[0]);
        normal[2] += (a[0] - b[0]) * (a[1] + b[1]);
    }
    normalize(normal)
}

#[inline]
fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

#[inline]
fn normalize(v: [f32; 3]) -> Option<[f32; 3]> {
    let length = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    (length.is_finite() && EPSILON < length).then(|| [v[0] / length, v[1] / length, v[2] / length])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_layout() {
        let key = GridKey::new(2, 3, true, true);
        assert_eq!(key.grid_size, 5);
        assert_eq!(key.grid_area(), 25);
        assert_eq!(key.elem_size(), 7);
        assert_eq!(key.mask_offset(), Some(3));
        assert_eq!(key.normal_offset(), Some(4));

        let plain = GridKey::new(1, 3, false, false);
        assert_eq!(plain.grid_size, 3);
        assert_eq!(plain.normal_offset(), None);
    }

    #[test]
    fn flat_quad_normals_point_up() {
        let coarse = MeshTopology::from_loops(4, &[4], &[0, 1, 2, 3]).unwrap();
        let positions = [0., 0., 0., 1., 0., 0., 1., 1., 0., 0., 1., 0.];
        let plan = RefinePlan::new(&coarse, 2, 0);
        let input = RefineInput {
            positions: &positions,
            layers: 3,
            creases: &[0.0; 4],
            seams: &[false; 4],
            simple: false,
        };
        let grids = evaluate(
            &plan,
            &coarse,
            &input,
            GridKey::new(2, 3, true, false),
            None,
            &mut RefineScratch::default(),
        )
        .unwrap();

        for normal in grids.normals() {
            assert!((normal[2] - 1.0).abs() < 1.0e-5);
        }
    }

    #[test]
    fn scratch_is_reused_between_evaluations() {
        let coarse = MeshTopology::from_loops(5, &[4, 3], &[0, 1, 2, 3, 1, 4, 2]).unwrap();
        let positions = [
            0., 0., 0., 1., 0., 0., 1., 1., 0., 0., 1., 0., 2., 0.5, 0.5,
        ];
        let plan = RefinePlan::new(&coarse, 2, 0);
        let input = RefineInput {
            positions: &positions,
            layers: 3,
            creases: &[0.0; 6],
            seams: &[false; 5],
            simple: false,
        };
        let key = GridKey::new(2, 3, true, true);
        let mut scratch = RefineScratch::default();

        let first = evaluate(&plan, &coarse, &input, key, None, &mut scratch).unwrap();
        let owner_capacity = scratch.normal_owner.capacity();
        let mut painted = first.clone();
        painted.masks_mut()[0] = 0.5;
        let second = evaluate(&plan, &coarse, &input, key, Some(&painted), &mut scratch).unwrap();

        assert_eq!(scratch.normal_owner.capacity(), owner_capacity);
        assert_eq!(first.normals(), second.normals());
        assert_eq!(second.mask(0), 0.5);
        for normal in second.normals() {
            let length = (normal[0] * normal[0] + normal[1] * normal[1] + normal[2] * normal[2]).sqrt();
            assert!((length - 1.0).abs() < 1.0e-5);
        }
    }
}
