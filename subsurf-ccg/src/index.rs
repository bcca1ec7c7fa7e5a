//! Final mesh addressing.
//!
//! Every coarse face with valence `n` is split into `n` quad grids of
//! `grid_size × grid_size` points, one per corner. Grid `S` spans the face
//! center `(0, 0)`, the midpoint of face edge `S` at `(grid_size - 1, 0)`,
//! the corner vertex `S` at `(grid_size - 1, grid_size - 1)` and the midpoint
//! of the previous face edge at `(0, grid_size - 1)`.
//!
//! Points shared between grids, edges and vertices get exactly one index in a
//! flat address space that is laid out in this order:
//!
//! 1. For every face, in face order: the center, `n × grid_cuts` points on
//!    the grid seams (`y == 0` rows), then `n × grid_cuts²` grid interiors.
//! 2. For every edge, in edge order: `edge_size - 2` interior points.
//! 3. Every coarse vertex, in vertex order.
//!
//! [`IndexLayout`] precomputes flat per-face, per-corner and per-edge tables so
//! that [`face_vertex_index()`](IndexLayout::face_vertex_index) and
//! [`edge_vertex_index()`](IndexLayout::edge_vertex_index) are a handful of
//! branches and table reads.
//!
//! ## Example
//! ```
//! # use subsurf_ccg::index::{IndexLayout, MeshTopology};
//! // A single quad.
//! let quad = MeshTopology::from_loops(4, &[4], &[0, 1, 2, 3])?;
//! let layout = IndexLayout::for_level(&quad, 2);
//!
//! assert_eq!(layout.grid_size(), 5);
//! assert_eq!(layout.vertex_count(), 81);
//!
//! // The corner of grid 0 is coarse vertex 0.
//! assert_eq!(layout.face_vertex_index(0, 0, 4, 4), layout.vert_index(0));
//! // All grids share the face center.
//! assert_eq!(layout.face_vertex_index(0, 3, 0, 0), 0);
//! # Ok::<(), subsurf_ccg::Error>(())
//! ```
use crate::{Error, Result};
use bytemuck::{Pod, Zeroable};
use std::collections::HashMap;

/// Grid size for a subdivision level: `2^level + 1`.
#[inline]
pub fn grid_size_for_level(level: usize) -> usize {
    (1 << level) + 1
}

/// Edge size for a grid size: `2 * grid_size - 1`.
#[inline]
pub fn edge_size_for_grid(grid_size: usize) -> usize {
    2 * grid_size - 1
}

/// Polygon mesh connectivity as flat index buffers.
///
/// Face edge `i` connects face vertex `i` with face vertex `i + 1`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MeshTopology {
    pub(crate) face_offsets: Vec<u32>,
    pub(crate) face_verts: Vec<u32>,
    pub(crate) face_edges: Vec<u32>,
    pub(crate) edge_verts: Vec<[u32; 2]>,
    pub(crate) vert_count: usize,
}

impl MeshTopology {
    /// Creates a topology from explicit face and edge buffers.
    ///
    /// # Arguments
    ///
    /// * `vert_count` - The number of vertices.
    /// * `face_offsets` - Start of each face in `face_verts`, plus one
    ///   trailing entry holding the total length.
    /// * `face_verts` - Vertex indices of all faces, concatenated.
    /// * `face_edges` - Edge indices matching `face_verts`.
    /// * `edge_verts` - The two vertex indices of each edge.
    pub fn new(
        vert_count: usize,
        face_offsets: Vec<u32>,
        face_verts: Vec<u32>,
        face_edges: Vec<u32>,
        edge_verts: Vec<[u32; 2]>,
    ) -> Result<Self> {
        let topology = Self {
            face_offsets,
            face_verts,
            face_edges,
            edge_verts,
            vert_count,
        };

        if topology.face_offsets.is_empty() {
            return Err(Error::InvalidTopology(
                "Face offsets need a trailing entry.".to_string(),
            ));
        }
        Error::check_len(topology.face_verts.len(), topology.face_edges.len())?;
        Error::check_len(
            topology.face_verts.len(),
            *topology.face_offsets.last().unwrap_or(&0) as usize,
        )?;

        #[cfg(feature = "topology_validation")]
        topology.validate()?;

        Ok(topology)
    }

    /// Creates a topology from face loops, deriving one edge per unordered
    /// vertex pair in order of first appearance.
    ///
    /// # Arguments
    ///
    /// * `vert_count` - The number of vertices.
    /// * `vertices_per_face` - Valence of each face.
    /// * `vertex_indices_per_face` - A flat list of the vertex indices for
    ///   each face.
    pub fn from_loops(
        vert_count: usize,
        vertices_per_face: &[u32],
        vertex_indices_per_face: &[u32],
    ) -> Result<Self> {
        let total = vertices_per_face.iter().map(|&n| n as usize).sum::<usize>();
        if vertex_indices_per_face.len() != total {
            return Err(Error::InvalidTopology(
                "The number of vertex indices is not equal to the sum of face arities."
                    .to_string(),
            ));
        }

        let mut face_offsets = Vec::with_capacity(vertices_per_face.len() + 1);
        let mut face_edges = Vec::with_capacity(total);
        let mut edge_verts = Vec::new();
        let mut edge_set = HashMap::<(u32, u32), u32>::new();

        let mut start = 0usize;
        face_offsets.push(0);
        for &valence in vertices_per_face {
            let face = &vertex_indices_per_face[start..start + valence as usize];
            for (i, &v0) in face.iter().enumerate() {
                let v1 = face[(i + 1) % face.len()];
                let key = (v0.min(v1), v0.max(v1));
                let edge = *edge_set.entry(key).or_insert_with(|| {
                    edge_verts.push([v0, v1]);
                    (edge_verts.len() - 1) as u32
                });
                face_edges.push(edge);
            }
            start += valence as usize;
            face_offsets.push(start as u32);
        }

        Self::new(
            vert_count,
            face_offsets,
            vertex_indices_per_face.to_vec(),
            face_edges,
            edge_verts,
        )
    }

    #[cfg(feature = "topology_validation")]
    fn validate(&self) -> Result<()> {
        for face in 0..self.face_count() {
            let verts = self.face_vertices(face);
            let edges = self.face_edges(face);
            if verts.len() < 3 {
                return Err(Error::InvalidTopology(format!(
                    "Face {} has {} vertices (should be >= 3).",
                    face,
                    verts.len()
                )));
            }
            for (i, (&vertex, &edge)) in verts.iter().zip(edges).enumerate() {
                if self.vert_count <= vertex as usize {
                    return Err(Error::InvalidTopology(format!(
                        "Vertex index {} of face {} is out of range (should be < {}).",
                        vertex, face, self.vert_count
                    )));
                }
                let next = verts[(i + 1) % verts.len()];
                let [e0, e1] = *self.edge_verts.get(edge as usize).ok_or(
                    Error::IndexOutOfBounds {
                        index: edge as usize,
                        max: self.edge_verts.len(),
                    },
                )?;
                if !((e0 == vertex && e1 == next) || (e1 == vertex && e0 == next)) {
                    return Err(Error::InvalidTopology(format!(
                        "Edge {} of face {} does not connect vertices {} and {}.",
                        edge, face, vertex, next
                    )));
                }
            }
        }
        for (edge, &[v0, v1]) in self.edge_verts.iter().enumerate() {
            if self.vert_count <= v0.max(v1) as usize || v0 == v1 {
                return Err(Error::InvalidTopology(format!(
                    "Edge {} = ({}, {}) is degenerate or out of range.",
                    edge, v0, v1
                )));
            }
        }
        Ok(())
    }

    #[inline]
    pub fn vert_count(&self) -> usize {
        self.vert_count
    }

    #[inline]
    pub fn edge_count(&self) -> usize {
        self.edge_verts.len()
    }

    #[inline]
    pub fn face_count(&self) -> usize {
        self.face_offsets.len() - 1
    }

    #[inline]
    pub fn valence(&self, face: usize) -> usize {
        (self.face_offsets[face + 1] - self.face_offsets[face]) as _
    }

    #[inline]
    pub fn face_vertices(&self, face: usize) -> &[u32] {
        &self.face_verts
            [self.face_offsets[face] as usize..self.face_offsets[face + 1] as usize]
    }

    #[inline]
    pub fn face_edges(&self, face: usize) -> &[u32] {
        &self.face_edges
            [self.face_offsets[face] as usize..self.face_offsets[face + 1] as usize]
    }

    #[inline]
    pub fn edge_vertices(&self, edge: usize) -> [u32; 2] {
        self.edge_verts[edge]
    }

    /// Largest face valence, `0` for a mesh without faces.
    pub fn max_valence(&self) -> usize {
        (0..self.face_count())
            .map(|face| self.valence(face))
            .max()
            .unwrap_or(0)
    }
}

/// Per corner lookup data.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
struct Corner {
    /// Final index of the corner vertex.
    vert: u32,
    /// Face edge `S`.
    edge: u32,
    /// `1` if the corner vertex is the first vertex of `edge`.
    edge_forward: u32,
    /// Face edge `S - 1`.
    prev_edge: u32,
    prev_edge_forward: u32,
}

/// Where a final vertex comes from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum VertexLocation {
    /// The center of a face.
    FaceCenter { face: usize },
    /// A point on the `y == 0` row of grid `corner`, `1 <= x < grid_size - 1`.
    FaceSeam { face: usize, corner: usize, x: usize },
    /// A strict interior point of grid `corner`.
    FaceInterior {
        face: usize,
        corner: usize,
        x: usize,
        y: usize,
    },
    /// An interior point of a coarse edge, `1 <= x < edge_size - 1`.
    EdgeInterior { edge: usize, x: usize },
    /// A coarse vertex.
    Vertex { vert: usize },
}

/// Where a final edge comes from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EdgeLocation {
    /// An edge inside the grids of a face.
    Face { face: usize, corner: usize },
    /// Segment `x` of a coarse edge.
    Edge { edge: usize, x: usize },
}

/// Flat address tables for one grid size.
#[derive(Clone, Debug, Default)]
pub struct IndexLayout {
    grid_size: u32,
    edge_size: u32,
    face_base: Vec<u32>,
    face_edge_start: Vec<u32>,
    face_quad_start: Vec<u32>,
    face_corner_start: Vec<u32>,
    corners: Vec<Corner>,
    edge_base: Vec<u32>,
    edge_ends: Vec<[u32; 2]>,
    vert_base: u32,
    vert_total: u32,
    segment_base: u32,
    edge_total: u32,
    quad_total: u32,
}

impl IndexLayout {
    /// Builds the address tables of `topology` for grids of `grid_size`
    /// points per side.
    pub fn new(topology: &MeshTopology, grid_size: usize) -> Self {
        debug_assert!(2 <= grid_size);

        let g = grid_size as u32;
        let edge_size = edge_size_for_grid(grid_size) as u32;
        let cuts = g - 2;
        let per_grid_edges = (g - 1) + 2 * cuts * (g - 1);
        let per_grid_quads = (g - 1) * (g - 1);

        let face_count = topology.face_count();
        let mut face_base = Vec::with_capacity(face_count);
        let mut face_edge_start = Vec::with_capacity(face_count);
        let mut face_quad_start = Vec::with_capacity(face_count);
        let mut face_corner_start = Vec::with_capacity(face_count + 1);

        let (mut vert_cursor, mut edge_cursor, mut quad_cursor) = (0u32, 0u32, 0u32);
        for face in 0..face_count {
            let n = topology.valence(face) as u32;
            face_base.push(vert_cursor);
            face_edge_start.push(edge_cursor);
            face_quad_start.push(quad_cursor);
            face_corner_start.push(topology.face_offsets[face]);
            vert_cursor += 1 + n * cuts + n * cuts * cuts;
            edge_cursor += n * per_grid_edges;
            quad_cursor += n * per_grid_quads;
        }
        face_corner_start.push(*topology.face_offsets.last().unwrap_or(&0));

        let mut edge_base = Vec::with_capacity(topology.edge_count());
        for _ in 0..topology.edge_count() {
            edge_base.push(vert_cursor);
            vert_cursor += edge_size - 2;
        }

        let vert_base = vert_cursor;
        let edge_ends = topology
            .edge_verts
            .iter()
            .map(|&[v0, v1]| [vert_base + v0, vert_base + v1])
            .collect();

        let mut corners = Vec::with_capacity(topology.face_verts.len());
        for face in 0..face_count {
            let verts = topology.face_vertices(face);
            let edges = topology.face_edges(face);
            let n = verts.len();
            for s in 0..n {
                let vert = verts[s];
                let edge = edges[s];
                let prev_edge = edges[(s + n - 1) % n];
                corners.push(Corner {
                    vert: vert_base + vert,
                    edge,
                    edge_forward: (topology.edge_verts[edge as usize][0] == vert) as u32,
                    prev_edge,
                    prev_edge_forward: (topology.edge_verts[prev_edge as usize][0] == vert)
                        as u32,
                });
            }
        }

        let segment_base = edge_cursor;
        let edge_total = segment_base + topology.edge_count() as u32 * (edge_size - 1);

        Self {
            grid_size: g,
            edge_size,
            face_base,
            face_edge_start,
            face_quad_start,
            face_corner_start,
            corners,
            edge_base,
            edge_ends,
            vert_base,
            vert_total: vert_base + topology.vert_count() as u32,
            segment_base,
            edge_total,
            quad_total: quad_cursor,
        }
    }

    /// Builds the address tables for subdivision `level`.
    pub fn for_level(topology: &MeshTopology, level: usize) -> Self {
        Self::new(topology, grid_size_for_level(level))
    }

    #[inline]
    pub fn grid_size(&self) -> usize {
        self.grid_size as _
    }

    #[inline]
    pub fn edge_size(&self) -> usize {
        self.edge_size as _
    }

    /// Strict interior rows/columns per grid, `grid_size - 2`.
    #[inline]
    pub fn grid_cuts(&self) -> usize {
        self.grid_size as usize - 2
    }

    /// Returns the number of final vertices.
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vert_total as _
    }

    /// Returns the number of final edges.
    #[inline]
    pub fn edge_count(&self) -> usize {
        self.edge_total as _
    }

    /// Returns the number of final quads.
    #[inline]
    pub fn face_count(&self) -> usize {
        self.quad_total as _
    }

    /// Returns the number of final face corners, four per quad.
    #[inline]
    pub fn loop_count(&self) -> usize {
        4 * self.quad_total as usize
    }

    /// Number of coarse faces.
    #[inline]
    pub fn coarse_face_count(&self) -> usize {
        self.face_base.len()
    }

    /// Number of coarse edges.
    #[inline]
    pub fn coarse_edge_count(&self) -> usize {
        self.edge_base.len()
    }

    /// Number of coarse vertices.
    #[inline]
    pub fn coarse_vert_count(&self) -> usize {
        (self.vert_total - self.vert_base) as _
    }

    #[inline]
    pub fn valence(&self, face: usize) -> usize {
        (self.face_corner_start[face + 1] - self.face_corner_start[face]) as _
    }

    /// Final index of the center of `face`.
    #[inline]
    pub fn face_base(&self, face: usize) -> u32 {
        self.face_base[face]
    }

    /// Final index of the first interior point of `edge`.
    #[inline]
    pub fn edge_base(&self, edge: usize) -> u32 {
        self.edge_base[edge]
    }

    /// Final index of coarse vertex `vert`.
    #[inline]
    pub fn vert_index(&self, vert: usize) -> u32 {
        self.vert_base + vert as u32
    }

    /// Final index of the first coarse vertex.
    #[inline]
    pub fn vert_base(&self) -> u32 {
        self.vert_base
    }

    /// Index of the first final edge inside `face`.
    #[inline]
    pub fn face_edge_start(&self, face: usize) -> u32 {
        self.face_edge_start[face]
    }

    /// Index of the first final quad of `face`.
    #[inline]
    pub fn face_quad_start(&self, face: usize) -> u32 {
        self.face_quad_start[face]
    }

    /// Index of the first final edge segment of coarse `edge`.
    #[inline]
    pub fn edge_segment_start(&self, edge: usize) -> u32 {
        self.segment_base + edge as u32 * (self.edge_size - 1)
    }

    /// Returns the final vertex index of grid point `(x, y)` of corner
    /// `corner` of `face`.
    #[inline]
    pub fn face_vertex_index(&self, face: usize, corner: usize, x: usize, y: usize) -> u32 {
        let g = self.grid_size;
        let (x, y) = (x as u32, y as u32);
        let start = self.face_corner_start[face];
        let n = self.face_corner_start[face + 1] - start;
        let c = &self.corners[(start + corner as u32) as usize];

        if x == g - 1 && y == g - 1 {
            c.vert
        } else if x == g - 1 {
            self.edge_run(c.edge, c.edge_forward, g - 1 - y)
        } else if y == g - 1 {
            self.edge_run(c.prev_edge, c.prev_edge_forward, g - 1 - x)
        } else {
            let base = self.face_base[face];
            let cuts = g - 2;
            let s = corner as u32;
            if x == 0 && y == 0 {
                base
            } else if x == 0 {
                base + 1 + cuts * ((s + n - 1) % n) + (y - 1)
            } else if y == 0 {
                base + 1 + cuts * s + (x - 1)
            } else {
                base + 1 + cuts * n + s * cuts * cuts + (y - 1) * cuts + (x - 1)
            }
        }
    }

    /// Point `distance` steps away from the corner vertex along `edge`.
    #[inline]
    fn edge_run(&self, edge: u32, forward: u32, distance: u32) -> u32 {
        let base = self.edge_base[edge as usize];
        if 0 != forward {
            base + distance - 1
        } else {
            base + (self.edge_size - 3) - (distance - 1)
        }
    }

    /// Returns the final vertex index of point `x` along coarse `edge`.
    #[inline]
    pub fn edge_vertex_index(&self, edge: usize, x: usize) -> u32 {
        let x = x as u32;
        if x == 0 {
            self.edge_ends[edge][0]
        } else if x == self.edge_size - 1 {
            self.edge_ends[edge][1]
        } else {
            self.edge_base[edge] + x - 1
        }
    }

    /// Finds the grid or element a final vertex belongs to.
    pub fn locate_vertex(&self, index: usize) -> Option<VertexLocation> {
        let index = index as u32;
        if self.vert_total <= index {
            None
        } else if self.vert_base <= index {
            Some(VertexLocation::Vertex {
                vert: (index - self.vert_base) as _,
            })
        } else if self.edge_base.first().is_some_and(|&start| start <= index) {
            let edge = self.edge_base.partition_point(|&base| base <= index) - 1;
            Some(VertexLocation::EdgeInterior {
                edge,
                x: (index - self.edge_base[edge] + 1) as _,
            })
        } else {
            let face = self.face_base.partition_point(|&base| base <= index) - 1;
            let n = self.valence(face) as u32;
            let cuts = self.grid_size - 2;
            let offset = index - self.face_base[face];
            let seam_end = 1 + n * cuts;

            Some(if offset == 0 {
                VertexLocation::FaceCenter { face }
            } else if offset < seam_end {
                let offset = offset - 1;
                VertexLocation::FaceSeam {
                    face,
                    corner: (offset / cuts) as _,
                    x: (offset % cuts + 1) as _,
                }
            } else {
                let offset = offset - seam_end;
                let area = cuts * cuts;
                let corner = offset / area;
                let offset = offset % area;
                VertexLocation::FaceInterior {
                    face,
                    corner: corner as _,
                    x: (offset % cuts + 1) as _,
                    y: (offset / cuts + 1) as _,
                }
            })
        }
    }

    /// Returns the two final vertex indices of final edge `index`.
    pub fn final_edge(&self, index: usize) -> Option<[u32; 2]> {
        let (location, offset) = self.locate_edge(index)?;
        Some(match location {
            EdgeLocation::Face { face, corner } => {
                let g = self.grid_size as usize;
                if offset < g - 1 {
                    [
                        self.face_vertex_index(face, corner, offset, 0),
                        self.face_vertex_index(face, corner, offset + 1, 0),
                    ]
                } else {
                    let offset = offset - (g - 1);
                    let x = (offset / 2) / (g - 1) + 1;
                    let y = (offset / 2) % (g - 1);
                    if 0 == offset % 2 {
                        [
                            self.face_vertex_index(face, corner, x, y),
                            self.face_vertex_index(face, corner, x, y + 1),
                        ]
                    } else {
                        [
                            self.face_vertex_index(face, corner, y, x),
                            self.face_vertex_index(face, corner, y + 1, x),
                        ]
                    }
                }
            }
            EdgeLocation::Edge { edge, x } => [
                self.edge_vertex_index(edge, x),
                self.edge_vertex_index(edge, x + 1),
            ],
        })
    }

    /// Finds the face grid or coarse edge a final edge belongs to, plus the
    /// edge's offset within its grid.
    pub fn locate_edge(&self, index: usize) -> Option<(EdgeLocation, usize)> {
        let index = index as u32;
        if self.edge_total <= index {
            None
        } else if self.segment_base <= index {
            let offset = index - self.segment_base;
            let edge = (offset / (self.edge_size - 1)) as usize;
            let x = (offset % (self.edge_size - 1)) as usize;
            Some((EdgeLocation::Edge { edge, x }, x))
        } else {
            let face = self.face_edge_start.partition_point(|&start| start <= index) - 1;
            let per_grid = self.per_grid_edges();
            let offset = index - self.face_edge_start[face];
            Some((
                EdgeLocation::Face {
                    face,
                    corner: (offset / per_grid) as _,
                },
                (offset % per_grid) as _,
            ))
        }
    }

    #[inline]
    fn per_grid_edges(&self) -> u32 {
        let g = self.grid_size;
        (g - 1) + 2 * (g - 2) * (g - 1)
    }

    /// Returns the face, corner and cell `(x, y)` of final quad `index`.
    pub fn locate_quad(&self, index: usize) -> Option<(usize, usize, usize, usize)> {
        let index = index as u32;
        if self.quad_total <= index {
            return None;
        }
        let face = self.face_quad_start.partition_point(|&start| start <= index) - 1;
        let cells = self.grid_size - 1;
        let offset = index - self.face_quad_start[face];
        let corner = offset / (cells * cells);
        let offset = offset % (cells * cells);
        Some((
            face,
            corner as _,
            (offset % cells) as _,
            (offset / cells) as _,
        ))
    }

    /// The four final vertex indices of grid cell `(x, y)`.
    ///
    /// The order is `(x, y)`, `(x, y + 1)`, `(x + 1, y + 1)`, `(x + 1, y)`.
    #[inline]
    pub fn cell_vertices(&self, face: usize, corner: usize, x: usize, y: usize) -> [u32; 4] {
        [
            self.face_vertex_index(face, corner, x, y),
            self.face_vertex_index(face, corner, x, y + 1),
            self.face_vertex_index(face, corner, x + 1, y + 1),
            self.face_vertex_index(face, corner, x + 1, y),
        ]
    }

    /// Returns the four final vertex indices of final quad `index`.
    pub fn final_quad(&self, index: usize) -> Option<[u32; 4]> {
        let (face, corner, x, y) = self.locate_quad(index)?;
        Some(self.cell_vertices(face, corner, x, y))
    }

    /// The final edge indices of the four sides of grid cell `(x, y)`, in
    /// the order of [`cell_vertices()`](IndexLayout::cell_vertices): side `i`
    /// connects vertex `i` and vertex `i + 1`.
    pub fn cell_edges(&self, face: usize, corner: usize, x: usize, y: usize) -> [u32; 4] {
        let (x, y) = (x as u32, y as u32);
        [
            self.column_edge(face, corner, x, y),
            self.row_edge(face, corner, y + 1, x),
            self.column_edge(face, corner, x + 1, y),
            self.row_edge(face, corner, y, x),
        ]
    }

    #[inline]
    fn grid_edge_start(&self, face: usize, corner: u32) -> u32 {
        self.face_edge_start[face] + corner * self.per_grid_edges()
    }

    /// Edge `(column, y)-(column, y + 1)`.
    fn column_edge(&self, face: usize, corner: usize, column: u32, y: u32) -> u32 {
        let g = self.grid_size;
        let s = corner as u32;
        if column == 0 {
            // Column 0 of grid S is row 0 of grid S - 1.
            let n = self.valence(face) as u32;
            self.grid_edge_start(face, (s + n - 1) % n) + y
        } else if column == g - 1 {
            let c = self.corner(face, corner);
            self.segment(c.edge, c.edge_forward, g - 1 - y, g - 2 - y)
        } else {
            self.grid_edge_start(face, s) + (g - 1) + 2 * ((column - 1) * (g - 1) + y)
        }
    }

    /// Edge `(x, row)-(x + 1, row)`.
    fn row_edge(&self, face: usize, corner: usize, row: u32, x: u32) -> u32 {
        let g = self.grid_size;
        let s = corner as u32;
        if row == 0 {
            self.grid_edge_start(face, s) + x
        } else if row == g - 1 {
            let c = self.corner(face, corner);
            self.segment(c.prev_edge, c.prev_edge_forward, g - 1 - x, g - 2 - x)
        } else {
            self.grid_edge_start(face, s) + (g - 1) + 2 * ((row - 1) * (g - 1) + x) + 1
        }
    }

    #[inline]
    fn corner(&self, face: usize, corner: usize) -> &Corner {
        &self.corners[self.face_corner_start[face] as usize + corner]
    }

    /// The segment of `edge` between the points `d0` and `d1` steps away
    /// from the corner vertex.
    fn segment(&self, edge: u32, forward: u32, d0: u32, d1: u32) -> u32 {
        let along = |d: u32| {
            if 0 != forward {
                d
            } else {
                self.edge_size - 1 - d
            }
        };
        self.edge_segment_start(edge as usize) + along(d0).min(along(d1))
    }

    /// Iterates all final edges in index order.
    pub fn final_edges(&self) -> impl Iterator<Item = [u32; 2]> + '_ {
        let g = self.grid_size as usize;
        let faces = (0..self.coarse_face_count()).flat_map(move |face| {
            (0..self.valence(face)).flat_map(move |s| {
                let seam = (0..g - 1).map(move |x| {
                    [
                        self.face_vertex_index(face, s, x, 0),
                        self.face_vertex_index(face, s, x + 1, 0),
                    ]
                });
                let inner = (1..g - 1).flat_map(move |x| {
                    (0..g - 1).flat_map(move |y| {
                        [
                            [
                                self.face_vertex_index(face, s, x, y),
                                self.face_vertex_index(face, s, x, y + 1),
                            ],
                            [
                                self.face_vertex_index(face, s, y, x),
                                self.face_vertex_index(face, s, y + 1, x),
                            ],
                        ]
                    })
                });
                seam.chain(inner)
            })
        });
        let edges = (0..self.coarse_edge_count()).flat_map(move |edge| {
            (0..self.edge_size as usize - 1).map(move |x| {
                [
                    self.edge_vertex_index(edge, x),
                    self.edge_vertex_index(edge, x + 1),
                ]
            })
        });
        faces.chain(edges)
    }

    /// Iterates all final quads in index order.
    pub fn final_quads(&self) -> impl Iterator<Item = [u32; 4]> + '_ {
        let cells = self.grid_size as usize - 1;
        (0..self.coarse_face_count()).flat_map(move |face| {
            (0..self.valence(face)).flat_map(move |s| {
                (0..cells).flat_map(move |y| {
                    (0..cells).map(move |x| self.cell_vertices(face, s, x, y))
                })
            })
        })
    }
}
