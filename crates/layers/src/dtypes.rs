//! Precision policy used by projections and attention kernels.
//!
//! Parameters may reside in `f16`/`bf16` while every matmul, softmax and
//! banded reduction runs in a wider compute dtype. Results are cast back to the
//! storage dtype only when they are written out.

use candle_core::{DType, Result, Tensor};

/// Describes how tensors should be cast during different phases of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrecisionPolicy {
    storage: DType,
    compute: DType,
}

impl PrecisionPolicy {
    /// Constructs a new policy from explicit dtype selections.
    pub fn new(storage: DType, compute: DType) -> Self {
        Self { storage, compute }
    }

    /// Builds a policy from the parameter storage dtype.
    pub fn from_parameter_dtype(storage: DType) -> Self {
        let compute = match storage {
            DType::F16 | DType::BF16 => DType::F32,
            other => other,
        };
        Self::new(storage, compute)
    }

    /// Returns the dtype used to store parameters and outputs.
    pub fn storage(&self) -> DType {
        self.storage
    }

    /// Returns the dtype used for matmuls and reductions.
    pub fn compute(&self) -> DType {
        self.compute
    }

    /// Indicates whether the policy performs mixed precision work.
    pub fn is_mixed_precision(&self) -> bool {
        self.storage != self.compute
    }

    /// Comparison tolerance for values that went through the storage dtype.
    pub fn tolerance(&self) -> f32 {
        epsilon_for(self.storage)
    }

    /// Casts a tensor to the compute dtype.
    pub fn cast_for_compute(&self, tensor: &Tensor) -> Result<Tensor> {
        cast_tensor(tensor, self.compute)
    }

    /// Casts a tensor back to the storage dtype (or leaves it unchanged).
    pub fn cast_to_storage(&self, tensor: &Tensor) -> Result<Tensor> {
        cast_tensor(tensor, self.storage)
    }
}

fn cast_tensor(tensor: &Tensor, dtype: DType) -> Result<Tensor> {
    if tensor.dtype() == dtype {
        Ok(tensor.clone())
    } else {
        tensor.to_dtype(dtype)
    }
}

fn epsilon_for(dtype: DType) -> f32 {
    match dtype {
        DType::BF16 => 2e-2,
        DType::F16 => 5e-3,
        DType::F32 => 1e-5,
        DType::F64 => 1e-7,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn policy_promotes_reduced_precision_parameters() {
        let policy = PrecisionPolicy::from_parameter_dtype(DType::BF16);
        assert_eq!(policy.storage(), DType::BF16);
        assert_eq!(policy.compute(), DType::F32);
        assert!(policy.is_mixed_precision());

        let policy = PrecisionPolicy::from_parameter_dtype(DType::F64);
        assert_eq!(policy.compute(), DType::F64);
        assert!(!policy.is_mixed_precision());
    }

    #[test]
    fn cast_round_trip_stays_within_tolerance() -> Result<()> {
        let policy = PrecisionPolicy::from_parameter_dtype(DType::F16);
        let base = Tensor::from_vec(vec![0.125f32, -0.75, 3.5], 3, &Device::Cpu)?;
        let stored = policy.cast_to_storage(&base)?;
        assert_eq!(stored.dtype(), DType::F16);

        let compute = policy.cast_for_compute(&stored)?;
        assert_eq!(compute.dtype(), DType::F32);
        for (orig, back) in base.to_vec1::<f32>()?.iter().zip(compute.to_vec1::<f32>()?) {
            assert!((orig - back).abs() <= policy.tolerance());
        }
        Ok(())
    }
}
