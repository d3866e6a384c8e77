//! Linear interpolation of a parameter pair.
//!
//! Formula: blended[i] = alpha * primary[i] + (1 - alpha) * secondary[i]
//!
//! Arithmetic runs in `f32` regardless of how the inputs are stored; the
//! result is narrowed to the blender's [`StoragePrecision`].

use ndarray::Zip;

use crate::{BlendError, Result, StoragePrecision, Tensor};

/// Interpolates parameter pairs into a fixed storage precision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TensorBlender {
    precision: StoragePrecision,
}

impl TensorBlender {
    /// Create a blender storing its results in `precision`.
    pub fn new(precision: StoragePrecision) -> Self {
        Self { precision }
    }

    /// Output storage precision.
    pub fn precision(&self) -> StoragePrecision {
        self.precision
    }

    /// Compute `alpha * a + (1 - alpha) * b` into a newly allocated tensor.
    ///
    /// `name` is only used for error reporting.
    pub fn blend(&self, name: &str, a: &Tensor, b: &Tensor, alpha: f32) -> Result<Tensor> {
        if a.shape() != b.shape() {
            return Err(BlendError::ShapeMismatchUnsupported {
                name: name.to_string(),
                primary: a.shape().to_vec(),
                secondary: b.shape().to_vec(),
            });
        }

        let a = a.to_f32();
        let b = b.to_f32();
        let beta = 1.0 - alpha;
        let blended = Zip::from(&a)
            .and(&b)
            .map_collect(|&x, &y| alpha * x + beta * y);

        Ok(Tensor::from_f32(blended, self.precision))
    }
}
