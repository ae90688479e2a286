//! Linear and affine projection helpers.
//!
//! Linear layers expect inputs shaped `(batch, seq, in_dim)` or `(rows, in_dim)`
//! and return the same leading dims with `out_dim` features. Weights and
//! activations are cast to [`PrecisionPolicy::compute`] for the matmul; the
//! result stays in the compute dtype so callers can chain further work before
//! deciding when to cast back with
//! [`PrecisionPolicy::cast_to_storage`](crate::dtypes::PrecisionPolicy::cast_to_storage).

use candle_core::{DType, Device, Error, Result, Tensor};

use crate::{checks, dtypes::PrecisionPolicy};

/// Configuration shared by dense projection layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearConfig {
    /// Incoming feature dimension.
    pub input_dim: usize,
    /// Output feature dimension.
    pub output_dim: usize,
    /// Whether a learnable bias vector should be applied.
    pub bias: bool,
}

impl LinearConfig {
    /// Creates a configuration for a projection with bias.
    pub fn new(input_dim: usize, output_dim: usize) -> Self {
        Self {
            input_dim,
            output_dim,
            bias: true,
        }
    }

    /// Same as [`LinearConfig::new`] with the bias toggled.
    pub fn with_bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }
}

/// Supported weight initialisation policies.
#[derive(Debug, Clone)]
pub enum LinearInit {
    /// Xavier/Glorot uniform initialisation.
    XavierUniform,
    /// Xavier/Glorot normal initialisation.
    XavierNormal,
    /// Square identity (zero-padded when the projection is not square).
    Identity,
}

impl LinearInit {
    fn sample(&self, shape: (usize, usize), device: &Device, dtype: DType) -> Result<Tensor> {
        let (out_dim, in_dim) = shape;
        let (fan_in, fan_out) = (in_dim as f64, out_dim as f64);
        let weight_f32 = match self {
            LinearInit::XavierUniform => {
                let bound = (6.0f64 / (fan_in + fan_out)).sqrt() as f32;
                Tensor::rand(-bound, bound, shape, device)?
            }
            LinearInit::XavierNormal => {
                let std = (2.0f64 / (fan_in + fan_out)).sqrt() as f32;
                Tensor::randn(0f32, std, shape, device)?
            }
            LinearInit::Identity => {
                let mut data = vec![0f32; out_dim * in_dim];
                for i in 0..out_dim.min(in_dim) {
                    data[i * in_dim + i] = 1.0;
                }
                Tensor::from_vec(data, shape, device)?
            }
        };
        weight_f32.to_dtype(dtype)
    }
}

/// Dense affine projection `y = x Wᵀ + b`.
///
/// Parameters are immutable after construction so a layer can be shared
/// across concurrent forward calls.
#[derive(Debug, Clone)]
pub struct Linear {
    config: LinearConfig,
    weight: Tensor,
    bias: Option<Tensor>,
}

impl Linear {
    /// Constructs a linear layer from pre-existing parameters.
    pub fn new(config: LinearConfig, weight: Tensor, bias: Option<Tensor>) -> Result<Self> {
        Self::validate_weight(&config, &weight)?;
        Self::validate_bias(&config, bias.as_ref())?;
        Ok(Self {
            config,
            weight,
            bias,
        })
    }

    /// Builds a linear layer with weights following `init` and a zero bias.
    pub fn with_init(
        config: LinearConfig,
        init: &LinearInit,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let weight = init.sample((config.output_dim, config.input_dim), device, dtype)?;
        let bias = if config.bias {
            Some(Tensor::zeros(config.output_dim, dtype, device)?)
        } else {
            None
        };
        Self::new(config, weight, bias)
    }

    pub fn config(&self) -> &LinearConfig {
        &self.config
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }

    /// Applies the projection in the policy's compute dtype.
    pub fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        let input = policy.cast_for_compute(hidden)?;
        let weight_t = policy.cast_for_compute(&self.weight)?.t()?;

        let mut output = match input.dims() {
            &[batch, seq, in_dim] if in_dim == self.config.input_dim => input
                .reshape((batch * seq, in_dim))?
                .matmul(&weight_t)?
                .reshape((batch, seq, self.config.output_dim))?,
            &[_, in_dim] if in_dim == self.config.input_dim => input.matmul(&weight_t)?,
            dims => {
                return Err(Error::Msg(format!(
                    "linear expects input shaped [B, T, {}] or [T, {}], got {dims:?}",
                    self.config.input_dim, self.config.input_dim
                )))
            }
        };

        if let Some(bias) = &self.bias {
            output = output.broadcast_add(&policy.cast_for_compute(bias)?)?;
        }
        Ok(output)
    }

    fn validate_weight(config: &LinearConfig, weight: &Tensor) -> Result<()> {
        checks::expect_rank("linear.weight", weight, 2)?;
        checks::expect_shape(
            "linear.weight",
            weight,
            &[config.output_dim, config.input_dim],
        )?;
        checks::expect_dtype_in("linear.weight", weight, checks::FLOAT_DTYPES)
    }

    fn validate_bias(config: &LinearConfig, bias: Option<&Tensor>) -> Result<()> {
        match (config.bias, bias) {
            (true, Some(tensor)) => {
                checks::expect_shape("linear.bias", tensor, &[config.output_dim])?;
                checks::expect_dtype_in("linear.bias", tensor, checks::FLOAT_DTYPES)
            }
            (false, Some(_)) => Err(Error::Msg("bias provided but config disables bias".into())),
            (true, None) => Err(Error::Msg("config expects bias but none supplied".into())),
            (false, None) => Ok(()),
        }
    }
}
