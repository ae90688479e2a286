//! Configuration shared by all attention implementations.
//!
//! [`AttentionConfig`] fixes the projection geometry, [`ContextWindow`] the
//! admissible relative offsets of the windowed variant and [`AttentionKind`]
//! selects which variant a layer builds. All three deserialize from the same
//! JSON/YAML documents a model configuration would carry.

use serde::{Deserialize, Serialize};

use super::AttentionError;

/// Projection geometry of a multi-head attention module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttentionConfig {
    /// Number of attention heads.
    pub n_heads: usize,
    /// Model feature width; split evenly across heads.
    pub n_feat: usize,
    /// Whether the query/key/value/output projections carry a bias.
    #[serde(default = "default_bias")]
    pub bias: bool,
}

fn default_bias() -> bool {
    true
}

impl AttentionConfig {
    pub fn new(n_heads: usize, n_feat: usize) -> Self {
        Self {
            n_heads,
            n_feat,
            bias: true,
        }
    }

    /// Rejects geometries where heads cannot evenly share the feature width.
    pub fn validate(&self) -> Result<(), AttentionError> {
        if self.n_heads == 0 {
            return Err(AttentionError::config("n_heads must be greater than zero"));
        }
        if self.n_feat == 0 {
            return Err(AttentionError::config("n_feat must be greater than zero"));
        }
        if self.n_feat % self.n_heads != 0 {
            return Err(AttentionError::config(format!(
                "n_feat ({}) must be divisible by n_heads ({})",
                self.n_feat, self.n_heads
            )));
        }
        Ok(())
    }

    /// Per-head channel count.
    pub fn head_dim(&self) -> usize {
        self.n_feat / self.n_heads
    }

    /// Score scale `1 / sqrt(head_dim)`.
    pub fn scale(&self) -> f64 {
        1.0 / (self.head_dim() as f64).sqrt()
    }
}

/// Left/right context of windowed attention.
///
/// Query `i` may attend to keys `i - left ..= i + right` (after stick-to-right
/// alignment). Both sides must be strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "[i64; 2]", into = "[i64; 2]")]
pub struct ContextWindow {
    left: usize,
    right: usize,
}

impl ContextWindow {
    pub fn new(left: i64, right: i64) -> Result<Self, AttentionError> {
        if left <= 0 || right <= 0 {
            return Err(AttentionError::config(format!(
                "context sizes must be positive, got ({left}, {right})"
            )));
        }
        Ok(Self {
            left: left as usize,
            right: right as usize,
        })
    }

    /// Symmetric window of `size` positions on each side.
    pub fn symmetric(size: i64) -> Result<Self, AttentionError> {
        Self::new(size, size)
    }

    pub fn left(&self) -> usize {
        self.left
    }

    pub fn right(&self) -> usize {
        self.right
    }

    /// Kernel half width `w = max(left, right)`.
    pub fn half_width(&self) -> usize {
        self.left.max(self.right)
    }

    /// Number of relative offsets held per query, `2w + 1`.
    pub fn band_width(&self) -> usize {
        2 * self.half_width() + 1
    }

    /// Whether key offset `key - query` lies inside the window.
    pub fn admits(&self, offset: isize) -> bool {
        -(self.left as isize) <= offset && offset <= self.right as isize
    }
}

impl TryFrom<[i64; 2]> for ContextWindow {
    type Error = AttentionError;

    fn try_from([left, right]: [i64; 2]) -> Result<Self, Self::Error> {
        Self::new(left, right)
    }
}

impl From<ContextWindow> for [i64; 2] {
    fn from(window: ContextWindow) -> Self {
        [window.left as i64, window.right as i64]
    }
}

/// Attention variant selected by a layer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttentionKind {
    /// Dense scaled dot-product attention without positional bias.
    AbsPos,
    /// Full relative-position attention.
    RelPos,
    /// Windowed relative-position attention.
    RelPosLocalAttn,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heads_must_divide_width() {
        assert!(AttentionConfig::new(4, 16).validate().is_ok());
        assert!(matches!(
            AttentionConfig::new(3, 16).validate(),
            Err(AttentionError::InvalidConfig { .. })
        ));
        assert!(AttentionConfig::new(0, 16).validate().is_err());
        assert!(AttentionConfig::new(2, 0).validate().is_err());
    }

    #[test]
    fn head_geometry() {
        let config = AttentionConfig::new(2, 8);
        assert_eq!(config.head_dim(), 4);
        assert!((config.scale() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn window_rejects_non_positive_sides() {
        assert!(ContextWindow::new(0, 4).is_err());
        assert!(ContextWindow::new(4, -1).is_err());
        assert!(ContextWindow::try_from([-1, -1]).is_err());
    }

    #[test]
    fn window_band_is_symmetric_in_the_wider_side() -> Result<(), AttentionError> {
        let window = ContextWindow::new(3, 1)?;
        assert_eq!(window.half_width(), 3);
        assert_eq!(window.band_width(), 7);
        assert!(window.admits(-3));
        assert!(window.admits(1));
        assert!(!window.admits(2));
        assert!(!window.admits(-4));
        Ok(())
    }
}
