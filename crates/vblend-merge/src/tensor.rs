//! Parameter tensors and their storage precision.
//!
//! Checkpoints keep every parameter in one of three storage formats. Arithmetic
//! always happens in `f32`; the [`StoragePrecision`] policy decides what the
//! result is narrowed to before it is written back into a checkpoint.

use std::fmt;
use std::str::FromStr;

use half::{bf16, f16};
use ndarray::{ArrayD, Axis, IxDyn, Slice};
use serde::{Deserialize, Serialize};

use crate::{BlendError, Result};

/// Element format used to store blended parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoragePrecision {
    /// 32-bit IEEE float.
    #[serde(alias = "float32")]
    F32,
    /// 16-bit IEEE float (half the size of the source weights).
    #[default]
    #[serde(alias = "float16", alias = "half")]
    F16,
    /// 16-bit brain float.
    #[serde(alias = "bfloat16")]
    BF16,
}

impl StoragePrecision {
    /// Safetensors dtype for this precision.
    pub fn dtype(self) -> safetensors::Dtype {
        match self {
            Self::F32 => safetensors::Dtype::F32,
            Self::F16 => safetensors::Dtype::F16,
            Self::BF16 => safetensors::Dtype::BF16,
        }
    }

    /// Map a safetensors dtype back to a precision, if supported.
    pub fn from_dtype(dtype: safetensors::Dtype) -> Option<Self> {
        match dtype {
            safetensors::Dtype::F32 => Some(Self::F32),
            safetensors::Dtype::F16 => Some(Self::F16),
            safetensors::Dtype::BF16 => Some(Self::BF16),
            _ => None,
        }
    }

    /// Bytes per element.
    pub fn size_in_bytes(self) -> usize {
        match self {
            Self::F32 => 4,
            Self::F16 | Self::BF16 => 2,
        }
    }
}

impl fmt::Display for StoragePrecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::F32 => "f32",
            Self::F16 => "f16",
            Self::BF16 => "bf16",
        };
        f.write_str(name)
    }
}

impl FromStr for StoragePrecision {
    type Err = BlendError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "f32" | "float32" => Ok(Self::F32),
            "f16" | "float16" | "half" => Ok(Self::F16),
            "bf16" | "bfloat16" => Ok(Self::BF16),
            other => Err(BlendError::InvalidConfig(format!(
                "unknown storage precision '{other}' (expected f32, f16 or bf16)"
            ))),
        }
    }
}

/// A named parameter's values in their storage format.
#[derive(Debug, Clone, PartialEq)]
pub enum Tensor {
    /// Full-precision storage.
    F32(ArrayD<f32>),
    /// Half-precision storage.
    F16(ArrayD<f16>),
    /// Brain-float storage.
    BF16(ArrayD<bf16>),
}

impl Tensor {
    /// Build an `f32` tensor from a flat buffer in row-major order.
    pub fn from_shape_vec(shape: &[usize], data: Vec<f32>) -> Result<Self> {
        Ok(Self::F32(ArrayD::from_shape_vec(IxDyn(shape), data)?))
    }

    /// Narrow full-precision values into the given storage format.
    pub fn from_f32(values: ArrayD<f32>, precision: StoragePrecision) -> Self {
        match precision {
            StoragePrecision::F32 => Self::F32(values),
            StoragePrecision::F16 => Self::F16(values.mapv(f16::from_f32)),
            StoragePrecision::BF16 => Self::BF16(values.mapv(bf16::from_f32)),
        }
    }

    /// Decode little-endian tensor bytes as stored in a safetensors file.
    pub fn from_le_bytes(
        precision: StoragePrecision,
        shape: &[usize],
        bytes: &[u8],
    ) -> Result<Self> {
        let expected = shape.iter().product::<usize>() * precision.size_in_bytes();
        if bytes.len() != expected {
            return Err(BlendError::Malformed(format!(
                "expected {expected} bytes for shape {shape:?} ({precision}), found {}",
                bytes.len()
            )));
        }

        let shape = IxDyn(shape);
        Ok(match precision {
            StoragePrecision::F32 => Self::F32(ArrayD::from_shape_vec(shape, decode(bytes))?),
            StoragePrecision::F16 => Self::F16(ArrayD::from_shape_vec(shape, decode(bytes))?),
            StoragePrecision::BF16 => Self::BF16(ArrayD::from_shape_vec(shape, decode(bytes))?),
        })
    }

    /// Encode values as little-endian bytes in row-major order.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            Self::F32(a) => encode(a),
            Self::F16(a) => encode(a),
            Self::BF16(a) => encode(a),
        }
    }

    /// Storage format of this tensor.
    pub fn precision(&self) -> StoragePrecision {
        match self {
            Self::F32(_) => StoragePrecision::F32,
            Self::F16(_) => StoragePrecision::F16,
            Self::BF16(_) => StoragePrecision::BF16,
        }
    }

    /// Shape of this tensor.
    pub fn shape(&self) -> &[usize] {
        match self {
            Self::F32(a) => a.shape(),
            Self::F16(a) => a.shape(),
            Self::BF16(a) => a.shape(),
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    /// Whether the tensor holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Widen to `f32` for arithmetic.
    pub fn to_f32(&self) -> ArrayD<f32> {
        match self {
            Self::F32(a) => a.clone(),
            Self::F16(a) => a.mapv(f16::to_f32),
            Self::BF16(a) => a.mapv(bf16::to_f32),
        }
    }

    /// Keep the first `rows` entries along the leading axis.
    ///
    /// Scalars and tensors that already have at most `rows` rows are returned
    /// unchanged.
    pub fn truncate_rows(&self, rows: usize) -> Tensor {
        if self.shape().first().map_or(true, |&n| n <= rows) {
            return self.clone();
        }
        let slice = Slice::from(0..rows);
        match self {
            Self::F32(a) => Self::F32(a.slice_axis(Axis(0), slice).to_owned()),
            Self::F16(a) => Self::F16(a.slice_axis(Axis(0), slice).to_owned()),
            Self::BF16(a) => Self::BF16(a.slice_axis(Axis(0), slice).to_owned()),
        }
    }
}

// Safetensors payloads are little-endian; hosts are assumed little-endian too.
fn decode<T: bytemuck::Pod>(bytes: &[u8]) -> Vec<T> {
    match bytemuck::try_cast_slice::<u8, T>(bytes) {
        Ok(values) => values.to_vec(),
        // Unaligned payload offsets fall back to element-wise reads.
        Err(_) => bytes
            .chunks_exact(std::mem::size_of::<T>())
            .map(bytemuck::pod_read_unaligned::<T>)
            .collect(),
    }
}

fn encode<T: bytemuck::Pod>(array: &ArrayD<T>) -> Vec<u8> {
    array
        .iter()
        .flat_map(|value| bytemuck::bytes_of(value).iter().copied())
        .collect()
}
