//! # Grid Based Catmull-Clark Subdivision
//!
//! This crate subdivides polygon meshes with the Catmull-Clark rules and
//! stores the result as per face corner grids of points.
//!
//! It is built for meshes that are edited interactively: the coarse
//! topology lives in a [`TopologyStore`](topology::TopologyStore) that is
//! *synced* from the input mesh, element by element, every time the mesh
//! changes. Unchanged elements keep their storage; only what changed (and
//! what depends on it) is re-evaluated.
//!
//! The subdivided surface is exposed through a
//! [`DerivedMesh`](derived::DerivedMesh), a conventional vertex/edge/face/loop
//! mesh whose elements are addressed by a stable, closed form index layout.
//! Any final vertex, edge or quad can be computed on its own without
//! building the whole mesh.
//!
//! ## Modules
//!
//! * [`topology`] – The coarse topology store, its allocators and the sync
//!   protocol.
//! * [`grid`] – Evaluation of the subdivision grids.
//! * [`index`] – Mapping between grid coordinates and final mesh indices.
//! * [`weights`] – Per valence interpolation weights for custom data.
//! * [`attributes`] – Custom data layers and their interpolation.
//! * [`sync`] – Syncing a store from a [`MeshDescriptor`](sync::MeshDescriptor).
//! * [`uv_map`] – Subdividing UV maps as surfaces of their own.
//! * [`displacement`] – Hidden grid points, paint masks and displacement
//!   write back.
//! * [`derived`] – The final mesh facade and the modifier level entry point.
//!
//! ## Example
//!
//! ```
//! use subsurf_ccg::{derived::*, sync::MeshDescriptor};
//!
//! // A single quad.
//! let positions = [0., 0., 0., 1., 0., 0., 1., 1., 0., 0., 1., 0.];
//! let mut mesh = MeshDescriptor::new(4, &[4], &[0, 1, 2, 3])?;
//! mesh.positions(&positions);
//!
//! let mut cache = SubsurfCache::new();
//! let settings = SubsurfSettings {
//!     levels: 2,
//!     ..Default::default()
//! };
//!
//! let derived = cache
//!     .make_derived(&mesh, &settings, None, SubsurfFlags::empty())?
//!     .expect("level is non-zero");
//!
//! assert_eq!(derived.grid_size(), 5);
//! assert_eq!(derived.face_count(), 4 * 4 * 4);
//! # Ok::<(), subsurf_ccg::Error>(())
//! ```
//!
//! ## Cargo Features
#![doc = document_features::document_features!()]

pub mod attributes;
pub mod derived;
pub mod displacement;
pub mod error;
pub mod grid;
pub mod index;
pub mod sync;
pub mod topology;
#[cfg(feature = "tri_mesh_buffers")]
pub mod tri_mesh_buffers;
pub mod uv_map;
pub mod weights;

pub use error::{Error, Result};

/// Origin index of elements that do not map back to a source element.
pub const ORIGINDEX_NONE: i32 = -1;
