//! Staged Catmull-Clark refinement.
//!
//! Subdividing to `level` takes `level + 1` passes. Pass `p` reads the
//! points of stage `p` and writes the points of stage `p + 1`:
//!
//! * Stage `0` is the coarse polygon mesh.
//! * Stage `p >= 1` is the quad mesh formed by the cells of the
//!   [`IndexLayout`] with grid size `2^(p - 1) + 1`, plus the segments of
//!   loose edges.
//!
//! Because every stage is addressed by an [`IndexLayout`] of the same coarse
//! mesh, the points a pass creates land directly at their final-mesh style
//! addresses in the next stage. A cell `(x, y)` produces the face point
//! `(2x + 1, 2y + 1)`, a grid point `(x, y)` moves to `(2x, 2y)` and so on.
//!
//! The connectivity of all stages only depends on topology and level. It is
//! built once into a [`RefinePlan`] and reused for as long as the store's
//! topology does not change.
use super::NONE;
use crate::error::try_reserve;
use crate::index::{edge_size_for_grid, grid_size_for_level, IndexLayout, MeshTopology};
use crate::Result;
use smallvec::SmallVec;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Compressed adjacency lists.
#[derive(Clone, Debug, Default)]
struct Adjacency {
    offsets: Vec<u32>,
    items: Vec<u32>,
}

impl Adjacency {
    /// Builds lists for `len` keys from `(key, item)` pairs, keeping the
    /// pair order within each list.
    fn build(len: usize, pairs: impl Iterator<Item = (u32, u32)> + Clone) -> Self {
        let mut offsets = vec![0u32; len + 1];
        for (key, _) in pairs.clone() {
            offsets[key as usize + 1] += 1;
        }
        for i in 0..len {
            offsets[i + 1] += offsets[i];
        }
        let mut cursor = offsets.clone();
        let mut items = vec![0u32; offsets[len] as usize];
        for (key, item) in pairs {
            let slot = &mut cursor[key as usize];
            items[*slot as usize] = item;
            *slot += 1;
        }
        Self { offsets, items }
    }

    #[inline]
    fn get(&self, key: usize) -> &[u32] {
        &self.items[self.offsets[key] as usize..self.offsets[key + 1] as usize]
    }
}

/// One refinement pass worth of connectivity.
#[derive(Clone, Debug)]
struct Stage {
    mesh: MeshTopology,
    vert_faces: Adjacency,
    vert_edges: Adjacency,
    edge_faces: Adjacency,
    /// Coarse edge each edge lies on, or [`NONE`].
    edge_parent: Vec<u32>,
    /// Coarse vertex each vertex coincides with, or [`NONE`].
    vert_parent: Vec<u32>,
    face_dest: Vec<u32>,
    edge_dest: Vec<u32>,
    vert_dest: Vec<u32>,
    /// Number of points in the next stage.
    dest_len: usize,
}

impl Stage {
    fn new(
        mesh: MeshTopology,
        edge_parent: Vec<u32>,
        vert_parent: Vec<u32>,
        face_dest: Vec<u32>,
        edge_dest: Vec<u32>,
        vert_dest: Vec<u32>,
        dest_len: usize,
    ) -> Self {
        let face_corners = || {
            (0..mesh.face_count()).flat_map(|face| {
                let (start, end) = (mesh.face_offsets[face], mesh.face_offsets[face + 1]);
                (start..end).map(move |corner| (face as u32, corner as usize))
            })
        };
        let vert_faces = Adjacency::build(
            mesh.vert_count(),
            face_corners().map(|(face, corner)| (mesh.face_verts[corner], face)),
        );
        let edge_faces = Adjacency::build(
            mesh.edge_count(),
            face_corners().map(|(face, corner)| (mesh.face_edges[corner], face)),
        );
        let vert_edges = Adjacency::build(
            mesh.vert_count(),
            mesh.edge_verts
                .iter()
                .enumerate()
                .flat_map(|(edge, &[v0, v1])| [(v0, edge as u32), (v1, edge as u32)]),
        );

        Self {
            mesh,
            vert_faces,
            vert_edges,
            edge_faces,
            edge_parent,
            vert_parent,
            face_dest,
            edge_dest,
            vert_dest,
            dest_len,
        }
    }

    /// The coarse mesh refined into the first quad stage.
    fn coarse(coarse: &MeshTopology, next: &IndexLayout) -> Self {
        let face_dest = (0..coarse.face_count()).map(|f| next.face_base(f)).collect();
        let edge_dest = (0..coarse.edge_count())
            .map(|e| next.edge_vertex_index(e, 1))
            .collect();
        let vert_dest = (0..coarse.vert_count()).map(|v| next.vert_index(v)).collect();

        Self::new(
            coarse.clone(),
            (0..coarse.edge_count() as u32).collect(),
            (0..coarse.vert_count() as u32).collect(),
            face_dest,
            edge_dest,
            vert_dest,
            next.vertex_count(),
        )
    }

    /// The cells of `layout` refined into `next`.
    fn grid(coarse: &MeshTopology, layout: &IndexLayout, next: &IndexLayout) -> Self {
        let g = layout.grid_size();
        let cells = g - 1;

        let mut face_offsets = Vec::with_capacity(layout.face_count() + 1);
        let mut face_verts = Vec::with_capacity(layout.loop_count());
        let mut face_edges = Vec::with_capacity(layout.loop_count());
        let mut face_dest = Vec::with_capacity(layout.face_count());
        face_offsets.push(0);
        for face in 0..coarse.face_count() {
            for s in 0..coarse.valence(face) {
                for y in 0..cells {
                    for x in 0..cells {
                        face_verts.extend_from_slice(&layout.cell_vertices(face, s, x, y));
                        face_edges.extend_from_slice(&layout.cell_edges(face, s, x, y));
                        face_offsets.push(face_verts.len() as u32);
                        face_dest.push(next.face_vertex_index(face, s, 2 * x + 1, 2 * y + 1));
                    }
                }
            }
        }

        // Same order as `IndexLayout::final_edges()`.
        let mut edge_verts = Vec::with_capacity(layout.edge_count());
        let mut edge_dest = Vec::with_capacity(layout.edge_count());
        let mut edge_parent = Vec::with_capacity(layout.edge_count());
        for face in 0..coarse.face_count() {
            for s in 0..coarse.valence(face) {
                let at = |x, y| layout.face_vertex_index(face, s, x, y);
                for x in 0..cells {
                    edge_verts.push([at(x, 0), at(x + 1, 0)]);
                    edge_dest.push(next.face_vertex_index(face, s, 2 * x + 1, 0));
                    edge_parent.push(NONE);
                }
                for x in 1..cells {
                    for y in 0..cells {
                        edge_verts.push([at(x, y), at(x, y + 1)]);
                        edge_dest.push(next.face_vertex_index(face, s, 2 * x, 2 * y + 1));
                        edge_verts.push([at(y, x), at(y + 1, x)]);
                        edge_dest.push(next.face_vertex_index(face, s, 2 * y + 1, 2 * x));
                        edge_parent.extend([NONE, NONE]);
                    }
                }
            }
        }
        for edge in 0..coarse.edge_count() {
            for x in 0..layout.edge_size() - 1 {
                edge_verts.push([
                    layout.edge_vertex_index(edge, x),
                    layout.edge_vertex_index(edge, x + 1),
                ]);
                edge_dest.push(next.edge_vertex_index(edge, 2 * x + 1));
                edge_parent.push(edge as u32);
            }
        }

        let mut vert_dest = vec![NONE; layout.vertex_count()];
        let mut vert_parent = vec![NONE; layout.vertex_count()];
        for face in 0..coarse.face_count() {
            for s in 0..coarse.valence(face) {
                for y in 0..g {
                    for x in 0..g {
                        vert_dest[layout.face_vertex_index(face, s, x, y) as usize] =
                            next.face_vertex_index(face, s, 2 * x, 2 * y);
                    }
                }
            }
        }
        for edge in 0..coarse.edge_count() {
            for x in 0..layout.edge_size() {
                vert_dest[layout.edge_vertex_index(edge, x) as usize] =
                    next.edge_vertex_index(edge, 2 * x);
            }
        }
        for vert in 0..coarse.vert_count() {
            let index = layout.vert_index(vert) as usize;
            vert_dest[index] = next.vert_index(vert);
            vert_parent[index] = vert as u32;
        }

        let mesh = MeshTopology {
            face_offsets,
            face_verts,
            face_edges,
            edge_verts,
            vert_count: layout.vertex_count(),
        };

        Self::new(
            mesh,
            edge_parent,
            vert_parent,
            face_dest,
            edge_dest,
            vert_dest,
            next.vertex_count(),
        )
    }
}

/// Per evaluation inputs of a [`RefinePlan`].
#[derive(Copy, Clone, Debug)]
pub struct RefineInput<'a> {
    /// Coarse vertex data, `layers` floats per vertex.
    pub positions: &'a [f32],
    pub layers: usize,
    /// Crease per coarse edge, in passes: `0` is smooth, a crease of `c`
    /// keeps the edge sharp for the first `c` passes.
    pub creases: &'a [f32],
    /// Seam flag per coarse vertex.
    pub seams: &'a [bool],
    /// Bilinear refinement.
    pub simple: bool,
}

/// Ping-pong buffers reused between evaluations.
#[derive(Clone, Debug, Default)]
pub struct RefineScratch {
    front: Vec<f32>,
    back: Vec<f32>,
    face_points: Vec<f32>,
    edge_points: Vec<f32>,
    vert_points: Vec<f32>,
    /// Face each final vertex was first seen in, for the normal pass.
    pub(super) normal_owner: Vec<u32>,
}

/// Cached connectivity of every refinement stage for one topology and
/// level.
#[derive(Clone, Debug)]
pub struct RefinePlan {
    level: usize,
    topology_version: u64,
    stages: Vec<Stage>,
    layout: IndexLayout,
}

impl RefinePlan {
    /// Builds the plan for refining `coarse` to `level`.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, name = "refine::plan"))]
    pub fn new(coarse: &MeshTopology, level: usize, topology_version: u64) -> Self {
        let passes = level + 1;
        let layout_for_pass = |p: usize| IndexLayout::new(coarse, grid_size_for_level(p - 1));

        let mut stages = Vec::with_capacity(passes);
        let mut next = layout_for_pass(1);
        stages.push(Stage::coarse(coarse, &next));
        for p in 1..passes {
            let layout = next;
            next = layout_for_pass(p + 1);
            stages.push(Stage::grid(coarse, &layout, &next));
        }
        debug_assert_eq!(next.grid_size(), grid_size_for_level(level));
        debug_assert_eq!(next.edge_size(), edge_size_for_grid(next.grid_size()));

        Self {
            level,
            topology_version,
            stages,
            layout: next,
        }
    }

    /// Whether this plan can be reused.
    #[inline]
    pub fn is_valid_for(&self, topology_version: u64, level: usize) -> bool {
        self.topology_version == topology_version && self.level == level
    }

    /// The final mesh layout.
    #[inline]
    pub fn layout(&self) -> &IndexLayout {
        &self.layout
    }

    #[inline]
    pub fn level(&self) -> usize {
        self.level
    }

    /// Number of smoothing passes, `level + 1`.
    #[inline]
    pub fn passes(&self) -> usize {
        self.stages.len()
    }

    /// Runs all passes and returns the final points, `input.layers` floats
    /// per final vertex, in a newly reserved buffer.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, name = "refine::run"))]
    pub fn refine(&self, input: &RefineInput, scratch: &mut RefineScratch) -> Result<Vec<f32>> {
        let layers = input.layers;
        let mut out = Vec::new();
        try_reserve(&mut out, self.layout.vertex_count() * layers, "grid points")?;

        let RefineScratch {
            front,
            back,
            face_points,
            edge_points,
            vert_points,
            ..
        } = scratch;
        front.clear();
        front.extend_from_slice(input.positions);

        for (p, stage) in self.stages.iter().enumerate() {
            resize(back, stage.dest_len * layers, "refinement stage")?;
            run_pass(
                stage,
                p,
                input,
                front,
                back,
                (&mut *face_points, &mut *edge_points, &mut *vert_points),
            )?;
            std::mem::swap(front, back);
        }

        try_reserve(&mut out, front.len(), "grid points")?;
        out.extend_from_slice(front);
        Ok(out)
    }

    /// Runs the first pass only and returns face, edge and vertex points of
    /// the coarse mesh, each `layers` floats per element.
    pub fn first_pass(&self, input: &RefineInput) -> Result<FirstPass> {
        let stage = &self.stages[0];
        let mut points = (Vec::new(), Vec::new(), Vec::new());
        compute_points(stage, 0, input, input.positions, (&mut points.0, &mut points.1, &mut points.2))?;
        Ok(FirstPass {
            face_points: points.0,
            edge_points: points.1,
            vert_points: points.2,
            layers: input.layers,
        })
    }

    /// Coarse vertex adjacency of the first stage: `(edges, faces)`.
    pub(crate) fn coarse_vert_adjacency(&self, vert: usize) -> (&[u32], &[u32]) {
        let stage = &self.stages[0];
        (stage.vert_edges.get(vert), stage.vert_faces.get(vert))
    }
}

/// Points produced by the first refinement pass.
#[derive(Clone, Debug, Default)]
pub struct FirstPass {
    pub face_points: Vec<f32>,
    pub edge_points: Vec<f32>,
    pub vert_points: Vec<f32>,
    pub layers: usize,
}

type PointBuffers<'a> = (&'a mut Vec<f32>, &'a mut Vec<f32>, &'a mut Vec<f32>);

fn run_pass(
    stage: &Stage,
    pass: usize,
    input: &RefineInput,
    src: &[f32],
    dst: &mut [f32],
    points: PointBuffers,
) -> Result<()> {
    let layers = input.layers;
    let (face_points, edge_points, vert_points) = points;
    compute_points(
        stage,
        pass,
        input,
        src,
        (&mut *face_points, &mut *edge_points, &mut *vert_points),
    )?;

    let scatter = |dst: &mut [f32], dest: &[u32], points: &[f32]| {
        for (&to, point) in dest.iter().zip(points.chunks_exact(layers)) {
            let to = to as usize * layers;
            dst[to..to + layers].copy_from_slice(point);
        }
    };
    scatter(dst, &stage.face_dest, face_points);
    scatter(dst, &stage.edge_dest, edge_points);
    scatter(dst, &stage.vert_dest, vert_points);
    Ok(())
}

/// Calls `f(index, chunk)` for every `stride` sized chunk of `out`.
fn for_each_chunk<F>(out: &mut [f32], stride: usize, f: F)
where
    F: Fn(usize, &mut [f32]) + Send + Sync,
{
    #[cfg(feature = "rayon")]
    out.par_chunks_mut(stride)
        .enumerate()
        .for_each(|(i, chunk)| f(i, chunk));

    #[cfg(not(feature = "rayon"))]
    out.chunks_mut(stride)
        .enumerate()
        .for_each(|(i, chunk)| f(i, chunk));
}

fn resize(buffer: &mut Vec<f32>, len: usize, context: &'static str) -> Result<()> {
    buffer.clear();
    try_reserve(buffer, len, context)?;
    buffer.resize(len, 0.0);
    Ok(())
}

fn compute_points(
    stage: &Stage,
    pass: usize,
    input: &RefineInput,
    src: &[f32],
    (face_points, edge_points, vert_points): PointBuffers,
) -> Result<()> {
    let layers = input.layers;
    let mesh = &stage.mesh;
    let point = |index: u32| &src[index as usize * layers..(index as usize + 1) * layers];

    resize(face_points, mesh.face_count() * layers, "face points")?;
    resize(edge_points, mesh.edge_count() * layers, "edge points")?;
    resize(vert_points, mesh.vert_count() * layers, "vertex points")?;

    if 0 == layers {
        return Ok(());
    }

    // Face points: the average of the face's corners.
    for_each_chunk(face_points, layers, |face, out| {
        let verts = mesh.face_vertices(face);
        for &v in verts {
            add(out, point(v));
        }
        scale(out, 1.0 / verts.len() as f32);
    });
    let face_points: &[f32] = face_points;
    let face_point = |face: u32| &face_points[face as usize * layers..(face as usize + 1) * layers];

    let sharpness = |edge: usize| -> f32 {
        if stage.edge_faces.get(edge).len() != 2 {
            1.0
        } else {
            match stage.edge_parent[edge] {
                NONE => 0.0,
                parent => (input.creases[parent as usize] - pass as f32).clamp(0.0, 1.0),
            }
        }
    };

    for_each_chunk(edge_points, layers, |edge, out| {
        let [v0, v1] = mesh.edge_vertices(edge);
        let (a, b) = (point(v0), point(v1));
        for k in 0..layers {
            out[k] = (a[k] + b[k]) * 0.5;
        }

        let faces = stage.edge_faces.get(edge);
        let s = sharpness(edge);
        if input.simple || 2 != faces.len() || 1.0 <= s {
            return;
        }

        let (f0, f1) = (face_point(faces[0]), face_point(faces[1]));
        for k in 0..layers {
            let smooth = (a[k] + b[k] + f0[k] + f1[k]) * 0.25;
            out[k] = smooth + (out[k] - smooth) * s;
        }
    });

    for_each_chunk(vert_points, layers, |vert, out| {
        let co = point(vert as u32);
        out.copy_from_slice(co);
        if input.simple {
            return;
        }

        let edges = stage.vert_edges.get(vert);
        let faces = stage.vert_faces.get(vert);

        let mut sharp_count = 0usize;
        let mut sharp_sum = 0.0f32;
        let mut sharp_others: SmallVec<[f32; 8]> = SmallVec::from_elem(0.0, layers);
        for &edge in edges {
            let s = sharpness(edge as usize);
            if 0.0 < s {
                sharp_count += 1;
                sharp_sum += s;
                add(&mut sharp_others, point(other_end(mesh, edge as usize, vert as u32)));
            }
        }

        let parent = stage.vert_parent[vert];
        if sharp_count < 2 && NONE != parent && input.seams[parent as usize] {
            return;
        }

        // Smooth rule: (Q + 2R + (n - 3)V) / n.
        let mut smooth: SmallVec<[f32; 8]> = SmallVec::from_slice(co);
        if !faces.is_empty() {
            let n = edges.len() as f32;
            let mut q: SmallVec<[f32; 8]> = SmallVec::from_elem(0.0, layers);
            for &face in faces {
                add(&mut q, face_point(face));
            }
            scale(&mut q, 1.0 / faces.len() as f32);

            let mut r: SmallVec<[f32; 8]> = SmallVec::from_elem(0.0, layers);
            for &edge in edges {
                let other = point(other_end(mesh, edge as usize, vert as u32));
                for k in 0..layers {
                    r[k] += (co[k] + other[k]) * 0.5;
                }
            }
            scale(&mut r, 1.0 / edges.len().max(1) as f32);

            for k in 0..layers {
                smooth[k] = (q[k] + 2.0 * r[k] + (n - 3.0) * co[k]) / n;
            }
        }

        if sharp_count < 2 {
            out.copy_from_slice(&smooth);
            return;
        }

        // Crease rule for two sharp edges, corner rule above that.
        if 2 == sharp_count {
            for k in 0..layers {
                out[k] = (sharp_others[k] + 6.0 * co[k]) * 0.125;
            }
        }

        let average = sharp_sum / sharp_count as f32;
        if average < 1.0 {
            for k in 0..layers {
                out[k] = smooth[k] + (out[k] - smooth[k]) * average;
            }
        }
    });

    Ok(())
}

#[inline]
fn other_end(mesh: &MeshTopology, edge: usize, vert: u32) -> u32 {
    let [v0, v1] = mesh.edge_vertices(edge);
    if v0 == vert {
        v1
    } else {
        v0
    }
}

#[inline]
fn add(acc: &mut [f32], value: &[f32]) {
    for (a, v) in acc.iter_mut().zip(value) {
        *a += v;
    }
}

#[inline]
fn scale(acc: &mut [f32], factor: f32) {
    for a in acc.iter_mut() {
        *a *= factor;
    }
}
