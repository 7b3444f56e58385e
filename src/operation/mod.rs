//! Typed image operations and the ordered operation list.
//!
//! An [`OperationList`] always holds its operations in the one canonical
//! order:
//!
//! ```text
//! Crop → Scale → Rotate → ColorTransform → Overlay* → Encode
//! ```
//!
//! The builder has one slot per operation kind (overlays append), so the
//! uniqueness and ordering rules cannot be violated. A built list is
//! immutable; use [`OperationList::to_builder`] to derive a modified copy.

pub mod canonical;
mod crop;
mod scale;
mod transform;

pub use canonical::{canonicalize, CanonicalOperationList, Fingerprint, Limits};
pub use crop::Crop;
pub use scale::{Scale, ScaleMode};
pub use transform::{
    ColorTransform, Encode, Overlay, Position, Rotate, Watermark, DEFAULT_JPEG_QUALITY,
};

use crate::geometry::{Dimension, ScaleConstraint};

// =============================================================================
// Operation
// =============================================================================

/// One step of the processing pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Crop(Crop),
    Scale(Scale),
    Rotate(Rotate),
    Color(ColorTransform),
    Overlay(Overlay),
    Encode(Encode),
}

impl Operation {
    /// Size produced from `input`. A crop treats `input` as the full image.
    pub fn resulting_size(&self, input: Dimension, sc: &ScaleConstraint) -> Dimension {
        match self {
            Operation::Crop(crop) => crop.resulting_size(input, sc),
            Operation::Scale(scale) => scale.resulting_size(input, sc),
            Operation::Rotate(rotate) => rotate.resulting_size(input),
            Operation::Color(_) | Operation::Overlay(_) | Operation::Encode(_) => input,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Operation::Crop(_) => "crop",
            Operation::Scale(_) => "scale",
            Operation::Rotate(_) => "rotate",
            Operation::Color(_) => "color",
            Operation::Overlay(_) => "overlay",
            Operation::Encode(_) => "encode",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Crop(op) => write!(f, "crop:{}", op),
            Operation::Scale(op) => write!(f, "scale:{}", op),
            Operation::Rotate(op) => write!(f, "rotate:{}", op),
            Operation::Color(op) => write!(f, "color:{}", op),
            Operation::Overlay(op) => write!(f, "overlay:{}", op),
            Operation::Encode(op) => write!(f, "encode:{}", op),
        }
    }
}

// =============================================================================
// OperationList
// =============================================================================

/// Ordered operations for one source image.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationList {
    identifier: String,
    scale_constraint: ScaleConstraint,
    operations: Vec<Operation>,
}

impl OperationList {
    pub fn builder(identifier: impl Into<String>) -> OperationListBuilder {
        OperationListBuilder::new(identifier)
    }

    /// A builder pre-filled with this list.
    pub fn to_builder(&self) -> OperationListBuilder {
        let mut builder = OperationListBuilder::new(self.identifier.clone())
            .scale_constraint(self.scale_constraint);
        for operation in &self.operations {
            builder = match operation.clone() {
                Operation::Crop(op) => builder.crop(op),
                Operation::Scale(op) => builder.scale(op),
                Operation::Rotate(op) => builder.rotate(op),
                Operation::Color(op) => builder.color(op),
                Operation::Overlay(op) => builder.overlay(op),
                Operation::Encode(op) => builder.encode(op),
            };
        }
        builder
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn scale_constraint(&self) -> ScaleConstraint {
        self.scale_constraint
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Operation> {
        self.operations.iter()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn crop(&self) -> Option<&Crop> {
        self.iter().find_map(|op| match op {
            Operation::Crop(crop) => Some(crop),
            _ => None,
        })
    }

    pub fn scale(&self) -> Option<&Scale> {
        self.iter().find_map(|op| match op {
            Operation::Scale(scale) => Some(scale),
            _ => None,
        })
    }

    pub fn rotate(&self) -> Option<&Rotate> {
        self.iter().find_map(|op| match op {
            Operation::Rotate(rotate) => Some(rotate),
            _ => None,
        })
    }

    pub fn color(&self) -> Option<&ColorTransform> {
        self.iter().find_map(|op| match op {
            Operation::Color(color) => Some(color),
            _ => None,
        })
    }

    pub fn overlays(&self) -> impl Iterator<Item = &Overlay> {
        self.iter().filter_map(|op| match op {
            Operation::Overlay(overlay) => Some(overlay),
            _ => None,
        })
    }

    pub fn encode(&self) -> Option<&Encode> {
        self.iter().find_map(|op| match op {
            Operation::Encode(encode) => Some(encode),
            _ => None,
        })
    }

    /// Output size for a source of `full_size`, folding every operation.
    ///
    /// Without an explicit scale the scale constraint still shrinks the
    /// cropped region.
    pub fn resulting_size(&self, full_size: Dimension) -> Dimension {
        let sc = self.scale_constraint;
        let mut size = full_size;
        let mut constrained = !sc.has_effect();

        for operation in &self.operations {
            if !constrained && !matches!(operation, Operation::Crop(_)) {
                if !matches!(operation, Operation::Scale(_)) {
                    size = sc.constrained_size(size);
                }
                constrained = true;
            }
            size = operation.resulting_size(size, &sc);
        }
        if !constrained {
            size = sc.constrained_size(size);
        }
        size
    }
}

impl<'a> IntoIterator for &'a OperationList {
    type Item = &'a Operation;
    type IntoIter = std::slice::Iter<'a, Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.operations.iter()
    }
}

impl std::fmt::Display for OperationList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.identifier)?;
        if self.scale_constraint.has_effect() {
            write!(f, " [{}]", self.scale_constraint)?;
        }
        for operation in &self.operations {
            write!(f, " {}", operation)?;
        }
        Ok(())
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder with one slot per operation kind.
///
/// Setting a slot twice replaces the earlier value; passing `None` clears it.
#[derive(Debug, Clone)]
pub struct OperationListBuilder {
    identifier: String,
    scale_constraint: ScaleConstraint,
    crop: Option<Crop>,
    scale: Option<Scale>,
    rotate: Option<Rotate>,
    color: Option<ColorTransform>,
    overlays: Vec<Overlay>,
    encode: Option<Encode>,
}

impl OperationListBuilder {
    fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            scale_constraint: ScaleConstraint::unconstrained(),
            crop: None,
            scale: None,
            rotate: None,
            color: None,
            overlays: Vec::new(),
            encode: None,
        }
    }

    pub fn scale_constraint(mut self, sc: ScaleConstraint) -> Self {
        self.scale_constraint = sc;
        self
    }

    pub fn crop(mut self, crop: impl Into<Option<Crop>>) -> Self {
        self.crop = crop.into();
        self
    }

    pub fn scale(mut self, scale: impl Into<Option<Scale>>) -> Self {
        self.scale = scale.into();
        self
    }

    pub fn rotate(mut self, rotate: impl Into<Option<Rotate>>) -> Self {
        self.rotate = rotate.into();
        self
    }

    pub fn color(mut self, color: impl Into<Option<ColorTransform>>) -> Self {
        self.color = color.into();
        self
    }

    /// Append an overlay; overlays apply in insertion order.
    pub fn overlay(mut self, overlay: Overlay) -> Self {
        self.overlays.push(overlay);
        self
    }

    pub fn encode(mut self, encode: impl Into<Option<Encode>>) -> Self {
        self.encode = encode.into();
        self
    }

    pub fn build(self) -> OperationList {
        let mut operations = Vec::with_capacity(5 + self.overlays.len());
        operations.extend(self.crop.map(Operation::Crop));
        operations.extend(self.scale.map(Operation::Scale));
        operations.extend(self.rotate.map(Operation::Rotate));
        operations.extend(self.color.map(Operation::Color));
        operations.extend(self.overlays.into_iter().map(Operation::Overlay));
        operations.extend(self.encode.map(Operation::Encode));

        OperationList {
            identifier: self.identifier,
            scale_constraint: self.scale_constraint,
            operations,
        }
    }
}

/// Format a float without trailing zeros, to at most six decimals.
pub(crate) fn format_number(value: f64) -> String {
    let formatted = format!("{:.6}", value);
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    match trimmed {
        "-0" | "" => "0".to_string(),
        other => other.to_string(),
    }
}
