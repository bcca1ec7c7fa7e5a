//! Named per-element attribute layers and weighted interpolation.
use crate::{Error, Result};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// What an attribute layer holds.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
pub enum AttributeKind {
    #[default]
    Generic = 0,
    /// Texture coordinates, two floats per element.
    Uv = 1,
    /// Byte colors, rounded and clamped on interpolation.
    Color = 2,
    /// Original face-space coordinates.
    OrigSpace = 3,
}

/// Storage of one layer.
#[derive(Clone, Debug, PartialEq)]
pub enum AttributeData {
    F32 { components: usize, values: Vec<f32> },
    U8 { components: usize, values: Vec<u8> },
}

impl AttributeData {
    #[inline]
    pub fn components(&self) -> usize {
        match self {
            AttributeData::F32 { components, .. } | AttributeData::U8 { components, .. } => {
                *components
            }
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            AttributeData::F32 { components, values } => values.len() / (*components).max(1),
            AttributeData::U8 { components, values } => values.len() / (*components).max(1),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        0 == self.len()
    }

    /// Zeroed storage of the same type for `len` elements.
    fn zeroed_like(&self, len: usize) -> Self {
        match self {
            AttributeData::F32 { components, .. } => AttributeData::F32 {
                components: *components,
                values: vec![0.0; len * components],
            },
            AttributeData::U8 { components, .. } => AttributeData::U8 {
                components: *components,
                values: vec![0; len * components],
            },
        }
    }

    fn same_layout(&self, other: &Self) -> bool {
        matches!(
            (self, other),
            (AttributeData::F32 { .. }, AttributeData::F32 { .. })
                | (AttributeData::U8 { .. }, AttributeData::U8 { .. })
        ) && self.components() == other.components()
    }
}

/// A named attribute layer.
#[derive(Clone, Debug, PartialEq)]
pub struct AttributeLayer {
    name: String,
    kind: AttributeKind,
    data: AttributeData,
}

impl AttributeLayer {
    pub fn new(name: impl Into<String>, kind: AttributeKind, data: AttributeData) -> Self {
        Self {
            name: name.into(),
            kind,
            data,
        }
    }

    /// A layer of `components` floats per element.
    pub fn f32(
        name: impl Into<String>,
        kind: AttributeKind,
        components: usize,
        values: Vec<f32>,
    ) -> Self {
        Self::new(name, kind, AttributeData::F32 { components, values })
    }

    /// A layer of `components` bytes per element.
    pub fn u8(
        name: impl Into<String>,
        kind: AttributeKind,
        components: usize,
        values: Vec<u8>,
    ) -> Self {
        Self::new(name, kind, AttributeData::U8 { components, values })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn kind(&self) -> AttributeKind {
        self.kind
    }

    #[inline]
    pub fn data(&self) -> &AttributeData {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut AttributeData {
        &mut self.data
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Float components of `index`, `None` for byte layers.
    pub fn f32_at(&self, index: usize) -> Option<&[f32]> {
        match &self.data {
            AttributeData::F32 { components, values } => {
                values.get(index * components..(index + 1) * components)
            }
            AttributeData::U8 { .. } => None,
        }
    }

    /// Byte components of `index`, `None` for float layers.
    pub fn u8_at(&self, index: usize) -> Option<&[u8]> {
        match &self.data {
            AttributeData::U8 { components, values } => {
                values.get(index * components..(index + 1) * components)
            }
            AttributeData::F32 { .. } => None,
        }
    }

    pub fn f32_at_mut(&mut self, index: usize) -> Option<&mut [f32]> {
        match &mut self.data {
            AttributeData::F32 { components, values } => {
                values.get_mut(index * *components..(index + 1) * *components)
            }
            AttributeData::U8 { .. } => None,
        }
    }
}

/// An ordered set of attribute layers sharing one element count.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AttributeSet {
    layers: Vec<AttributeLayer>,
}

impl AttributeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `layer`. Its length must match the layers already present.
    pub fn push(&mut self, layer: AttributeLayer) -> Result<()> {
        if let Some(first) = self.layers.first() {
            if first.len() != layer.len() {
                return Err(Error::AttributeMismatch(format!(
                    "Layer '{}' has {} elements, the set has {}.",
                    layer.name,
                    layer.len(),
                    first.len()
                )));
            }
        }
        self.layers.push(layer);
        Ok(())
    }

    /// Builder variant of [`push()`](Self::push).
    pub fn with_layer(mut self, layer: AttributeLayer) -> Result<Self> {
        self.push(layer)?;
        Ok(self)
    }

    /// An empty set with the layers of `self`, zeroed for `len` elements.
    pub fn zeroed_like(&self, len: usize) -> Self {
        Self {
            layers: self
                .layers
                .iter()
                .map(|layer| AttributeLayer {
                    name: layer.name.clone(),
                    kind: layer.kind,
                    data: layer.data.zeroed_like(len),
                })
                .collect(),
        }
    }

    #[inline]
    pub fn layers(&self) -> &[AttributeLayer] {
        &self.layers
    }

    #[inline]
    pub fn layers_mut(&mut self) -> &mut [AttributeLayer] {
        &mut self.layers
    }

    pub fn layer(&self, name: &str) -> Option<&AttributeLayer> {
        self.layers.iter().find(|layer| layer.name == name)
    }

    pub fn layer_mut(&mut self, name: &str) -> Option<&mut AttributeLayer> {
        self.layers.iter_mut().find(|layer| layer.name == name)
    }

    /// Layers of the given kind, in set order.
    pub fn layers_of_kind(&self, kind: AttributeKind) -> impl Iterator<Item = &AttributeLayer> {
        self.layers.iter().filter(move |layer| layer.kind == kind)
    }

    /// Element count; `0` for a set without layers.
    pub fn len(&self) -> usize {
        self.layers.first().map_or(0, AttributeLayer::len)
    }

    pub fn is_empty(&self) -> bool {
        0 == self.len()
    }

    /// Whether `other` has the same layer types in the same order.
    pub fn same_layout(&self, other: &AttributeSet) -> bool {
        self.layers.len() == other.layers.len()
            && self
                .layers
                .iter()
                .zip(&other.layers)
                .all(|(a, b)| a.kind == b.kind && a.data.same_layout(&b.data))
    }
}

/// Writes the weighted sum of the `src` elements at `indices` into element
/// `dst_index` of `dst`, layer by layer.
///
/// Byte layers are rounded and clamped to `0..=255`.
///
/// ```
/// # use subsurf_ccg::attributes::*;
/// let src = AttributeSet::new().with_layer(AttributeLayer::f32(
///     "uv",
///     AttributeKind::Uv,
///     2,
///     vec![0.0, 0.0, 1.0, 0.0, 1.0, 1.0],
/// ))?;
/// let mut dst = src.zeroed_like(1);
///
/// interp(&src, &mut dst, &[0, 1, 2], &[0.5, 0.25, 0.25], 0)?;
/// assert_eq!(dst.layer("uv").and_then(|uv| uv.f32_at(0)), Some(&[0.5, 0.25][..]));
/// # Ok::<(), subsurf_ccg::Error>(())
/// ```
pub fn interp(
    src: &AttributeSet,
    dst: &mut AttributeSet,
    indices: &[usize],
    weights: &[f32],
    dst_index: usize,
) -> Result<()> {
    Error::check_len(indices.len(), weights.len())?;
    if !src.same_layout(dst) {
        return Err(Error::AttributeMismatch(
            "Source and destination layers differ.".to_string(),
        ));
    }

    let src_len = src.len();
    if let Some(&index) = indices.iter().find(|&&index| src_len <= index) {
        return Err(Error::IndexOutOfBounds {
            index,
            max: src_len,
        });
    }
    if dst.len() <= dst_index {
        return Err(Error::IndexOutOfBounds {
            index: dst_index,
            max: dst.len(),
        });
    }

    for (from, to) in src.layers.iter().zip(dst.layers.iter_mut()) {
        match (&from.data, &mut to.data) {
            (
                AttributeData::F32 { components, values },
                AttributeData::F32 {
                    values: out_values, ..
                },
            ) => {
                let c = *components;
                let out = &mut out_values[dst_index * c..(dst_index + 1) * c];
                out.fill(0.0);
                for (&index, &weight) in indices.iter().zip(weights) {
                    for (o, v) in out.iter_mut().zip(&values[index * c..(index + 1) * c]) {
                        *o += v * weight;
                    }
                }
            }
            (
                AttributeData::U8 { components, values },
                AttributeData::U8 {
                    values: out_values, ..
                },
            ) => {
                let c = *components;
                let mut sum = [0.0f32; 4];
                let mut wide = Vec::new();
                let sum: &mut [f32] = if c <= 4 {
                    &mut sum[..c]
                } else {
                    wide.resize(c, 0.0);
                    &mut wide
                };
                for (&index, &weight) in indices.iter().zip(weights) {
                    for (s, &v) in sum.iter_mut().zip(&values[index * c..(index + 1) * c]) {
                        *s += v as f32 * weight;
                    }
                }
                for (o, s) in out_values[dst_index * c..(dst_index + 1) * c]
                    .iter_mut()
                    .zip(sum.iter())
                {
                    *o = s.round().clamp(0.0, 255.0) as u8;
                }
            }
            _ => {
                return Err(Error::AttributeMismatch(format!(
                    "Layer '{}' changed type.",
                    from.name
                )))
            }
        }
    }
    Ok(())
}
