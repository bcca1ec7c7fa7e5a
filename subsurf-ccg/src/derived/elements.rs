//! Plain-old-data final mesh elements and their flag words.
use bytemuck::{Pod, Zeroable};
bitflags::bitflags! {
    /// Flags of a final vertex.
    #[repr(transparent)]
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
    pub struct VertFlags: u8 {
        const HIDE = 1 << 4;
    }
}

bitflags::bitflags! {
    /// Flags of a final edge.
    #[repr(transparent)]
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
    pub struct EdgeFlags: u16 {
        const DRAW = 1 << 1;
        const SEAM = 1 << 2;
        const RENDER = 1 << 5;
        /// No face uses the coarse edge this edge lies on.
        const LOOSE = 1 << 7;
        const SHARP = 1 << 9;
    }
}

bitflags::bitflags! {
    /// Flags of a face.
    #[repr(transparent)]
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
    pub struct FaceFlags: u8 {
        const SMOOTH = 1;
    }
}

/// Face flags plus material index.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct FlagMat {
    pub flag: FaceFlags,
    pad: u8,
    pub mat_nr: i16,
}

impl FlagMat {
    pub const fn new(flag: FaceFlags, mat_nr: i16) -> Self {
        Self {
            flag,
            pad: 0,
            mat_nr,
        }
    }
}

impl Default for FlagMat {
    /// Smooth shaded, material `0`.
    fn default() -> Self {
        Self::new(FaceFlags::SMOOTH, 0)
    }
}

/// A final vertex with a normal packed to `i16`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct FinalVert {
    pub co: [f32; 3],
    pub no: [i16; 3],
    pub flag: VertFlags,
    pub bweight: u8,
}

impl FinalVert {
    pub fn new(co: [f32; 3], no: [f32; 3]) -> Self {
        Self {
            co,
            no: pack_normal(no),
            flag: VertFlags::empty(),
            bweight: 0,
        }
    }

    /// The normal as floats.
    pub fn normal(&self) -> [f32; 3] {
        self.no.map(|n| n as f32 / i16::MAX as f32)
    }
}

/// Packs a unit normal into `i16` components.
#[inline]
pub fn pack_normal(no: [f32; 3]) -> [i16; 3] {
    no.map(|n| (n * i16::MAX as f32) as i16)
}

/// A final edge between two final vertices.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct FinalEdge {
    pub v1: u32,
    pub v2: u32,
    pub crease: u8,
    pub bweight: u8,
    pub flag: EdgeFlags,
}

/// A final quad.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct FinalFace {
    pub v: [u32; 4],
    pub mat_nr: i16,
    pub flag: FaceFlags,
    pub edcode: u8,
}

/// A face corner: its vertex and the edge to the next corner.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct FinalLoop {
    pub v: u32,
    pub e: u32,
}

/// A final polygon; always four loops.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct FinalPoly {
    pub loopstart: u32,
    pub totloop: u32,
    pub mat_nr: i16,
    pub flag: FaceFlags,
    pad: u8,
}

impl FinalPoly {
    pub fn new(loopstart: u32, flag_mat: FlagMat) -> Self {
        Self {
            loopstart,
            totloop: 4,
            mat_nr: flag_mat.mat_nr,
            flag: flag_mat.flag,
            pad: 0,
        }
    }
}
