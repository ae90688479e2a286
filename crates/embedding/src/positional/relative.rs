//! Sinusoidal encodings indexed by relative offset.
//!
//! Row `r` of a relative table encodes the offset `query - key` it stands for,
//! ordered from the largest positive offset down to the most negative one:
//!
//! * [`RelPositionalEncoding`] covers `L-1, ..., 0, ..., -(L-1)` for an input of
//!   length `L` (`2L-1` rows). The attention side turns this absolute layout
//!   into per-query offsets with the relative shift.
//! * [`LocalRelPositionalEncoding`] covers exactly `w, ..., -w` (`2w+1` rows),
//!   the band consumed by windowed attention.

use candle_core::{bail, DType, Device, Result, Tensor};

/// Builds a `[positions.len(), d_model]` sinusoid table.
///
/// Even channels hold `sin(pos * 10000^(-2i/d))`, odd channels the matching
/// cosine.
pub fn sinusoid_table(positions: &[f64], d_model: usize) -> Vec<f32> {
    let log_base = 10_000f64.ln();
    let inv_freqs: Vec<f64> = (0..d_model)
        .step_by(2)
        .map(|i| (-(i as f64) * log_base / d_model as f64).exp())
        .collect();

    let mut table = vec![0f32; positions.len() * d_model];
    for (row, &pos) in table.chunks_mut(d_model).zip(positions) {
        for (pair, &freq) in inv_freqs.iter().enumerate() {
            let angle = pos * freq;
            row[2 * pair] = angle.sin() as f32;
            if 2 * pair + 1 < d_model {
                row[2 * pair + 1] = angle.cos() as f32;
            }
        }
    }
    table
}

fn xscale_for(d_model: usize, enabled: bool) -> Option<f64> {
    enabled.then(|| (d_model as f64).sqrt())
}

fn scale_input(x: &Tensor, xscale: Option<f64>) -> Result<Tensor> {
    match xscale {
        Some(scale) => x.affine(scale, 0.0),
        None => Ok(x.clone()),
    }
}

#[derive(Debug, Clone)]
struct RelTable {
    coverage: usize,
    pe: Tensor,
}

/// Relative encoding spanning the whole sequence.
#[derive(Debug, Clone)]
pub struct RelPositionalEncoding {
    d_model: usize,
    xscale: Option<f64>,
    device: Device,
    dtype: DType,
    table: Option<RelTable>,
}

impl RelPositionalEncoding {
    /// Creates an encoder with a table precomputed for inputs up to `max_len`.
    pub fn new(
        d_model: usize,
        max_len: usize,
        xscale: bool,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        if d_model == 0 {
            bail!("relative positional encoding requires d_model > 0");
        }
        let mut encoder = Self {
            d_model,
            xscale: xscale_for(d_model, xscale),
            device: device.clone(),
            dtype,
            table: None,
        };
        if max_len > 0 {
            encoder.ensure_len(max_len)?;
        }
        Ok(encoder)
    }

    pub fn d_model(&self) -> usize {
        self.d_model
    }

    /// Longest input length the current table serves without regrowing.
    pub fn coverage(&self) -> usize {
        self.table.as_ref().map(|t| t.coverage).unwrap_or(0)
    }

    /// Grows the table so inputs of length `len` can be served.
    pub fn ensure_len(&mut self, len: usize) -> Result<()> {
        if self.coverage() >= len {
            return Ok(());
        }
        let coverage = len.max(1);
        let top = coverage as f64 - 1.0;
        let positions: Vec<f64> = (0..2 * coverage - 1).map(|r| top - r as f64).collect();
        let data = sinusoid_table(&positions, self.d_model);
        let pe = Tensor::from_vec(data, (positions.len(), self.d_model), &self.device)?
            .to_dtype(self.dtype)?;
        log::debug!(
            "relative positional table grown: coverage={} d_model={}",
            coverage,
            self.d_model
        );
        self.table = Some(RelTable { coverage, pe });
        Ok(())
    }

    /// Encodings for offsets `len-1 ..= -(len-1)`, shaped `[1, 2len-1, d_model]`.
    pub fn pos_emb(&mut self, len: usize) -> Result<Tensor> {
        if len == 0 {
            bail!("sequence length must be non-zero");
        }
        self.ensure_len(len)?;
        let Some(table) = self.table.as_ref() else {
            bail!("relative positional table missing after growth");
        };
        table
            .pe
            .narrow(0, table.coverage - len, 2 * len - 1)?
            .unsqueeze(0)
    }

    /// Scales `x` (`[batch, seq, d_model]`) and returns it with its encodings.
    pub fn forward(&mut self, x: &Tensor) -> Result<(Tensor, Tensor)> {
        let (_, seq, width) = x.dims3()?;
        if width != self.d_model {
            bail!("expected feature width {}, got {width}", self.d_model);
        }
        let pos_emb = self.pos_emb(seq)?;
        Ok((scale_input(x, self.xscale)?, pos_emb))
    }
}

/// Relative encoding spanning a fixed `2w+1` band.
#[derive(Debug, Clone)]
pub struct LocalRelPositionalEncoding {
    d_model: usize,
    half_width: usize,
    xscale: Option<f64>,
    pe: Tensor,
}

impl LocalRelPositionalEncoding {
    pub fn new(
        d_model: usize,
        half_width: usize,
        xscale: bool,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        if d_model == 0 {
            bail!("local positional encoding requires d_model > 0");
        }
        if half_width == 0 {
            bail!("local positional encoding requires a non-empty window");
        }
        let positions: Vec<f64> = (0..2 * half_width + 1)
            .map(|r| half_width as f64 - r as f64)
            .collect();
        let data = sinusoid_table(&positions, d_model);
        let pe = Tensor::from_vec(data, (1, positions.len(), d_model), device)?.to_dtype(dtype)?;
        Ok(Self {
            d_model,
            half_width,
            xscale: xscale_for(d_model, xscale),
            pe,
        })
    }

    pub fn half_width(&self) -> usize {
        self.half_width
    }

    /// Encodings for offsets `w ..= -w`, shaped `[1, 2w+1, d_model]`.
    pub fn pos_emb(&self) -> Tensor {
        self.pe.clone()
    }

    pub fn forward(&self, x: &Tensor) -> Result<(Tensor, Tensor)> {
        let (_, _, width) = x.dims3()?;
        if width != self.d_model {
            bail!("expected feature width {}, got {width}", self.d_model);
        }
        Ok((scale_input(x, self.xscale)?, self.pos_emb()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sinusoid_interleaves_sin_and_cos() {
        let table = sinusoid_table(&[0.0, 1.0], 4);
        assert_eq!(&table[..4], &[0.0, 1.0, 0.0, 1.0]);
        assert!((table[4] - 1f32.sin()).abs() < 1e-6);
        assert!((table[5] - 1f32.cos()).abs() < 1e-6);
        let freq = (-2.0 * 10_000f64.ln() / 4.0).exp();
        assert!((table[6] as f64 - freq.sin()).abs() < 1e-6);
    }

    #[test]
    fn odd_width_drops_trailing_cosine() {
        let table = sinusoid_table(&[2.0], 3);
        assert_eq!(table.len(), 3);
        assert!((table[0] - 2f32.sin()).abs() < 1e-6);
    }
}
