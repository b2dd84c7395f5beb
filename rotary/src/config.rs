//! Engine configuration.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Shape and base rate of a rotary embedding. Immutable once the engine is built.
#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
pub struct RotaryConfig {
    /// Model dimension, split across `n_heads`.
    pub dim: usize,
    /// Number of attention heads.
    pub n_heads: usize,
    /// Base angular rate.
    #[serde(default = "default_rope_theta")]
    pub theta: f32,
    /// Maximum sequence length; the cached table covers twice as many positions.
    pub max_seq_len: usize,
    /// Whether pairs are adjacent elements rather than split halves.
    #[serde(default = "default_interleaved")]
    pub interleaved: bool,
}

#[inline(always)]
const fn default_rope_theta() -> f32 {
    1e4
}

#[inline(always)]
const fn default_interleaved() -> bool {
    true
}

impl RotaryConfig {
    /// `dim / n_heads`, or 0 without heads.
    #[inline]
    pub const fn head_dim(&self) -> usize {
        match self.n_heads {
            0 => 0,
            n => self.dim / n,
        }
    }

    /// How value pairs are laid out along the head dimension.
    #[inline]
    pub const fn layout(&self) -> Layout {
        if self.interleaved {
            Layout::Interleaved
        } else {
            Layout::SplitHalf
        }
    }

    /// Checks every invariant and returns the head dimension.
    pub fn validate(&self) -> Result<usize> {
        if self.n_heads == 0 || self.dim % self.n_heads != 0 {
            return Err(Error::IndivisibleHeads {
                dim: self.dim,
                n_heads: self.n_heads,
            });
        }
        let head_dim = self.head_dim();
        if head_dim == 0 || head_dim % 2 != 0 {
            return Err(Error::OddHeadDim { head_dim });
        }
        // frequencies only decay for theta > 1
        if !self.theta.is_finite() || self.theta <= 1. {
            return Err(Error::InvalidTheta { theta: self.theta });
        }
        Ok(head_dim)
    }
}

/// Where the two halves of each rotated pair live.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Layout {
    /// `(x[2i], x[2i + 1])`
    Interleaved,
    /// `(x[i], x[i + head_dim / 2])`
    SplitHalf,
}

impl Layout {
    /// Indices of the real and imaginary parts of pair `i`.
    #[inline]
    pub const fn pair(&self, half_dim: usize, i: usize) -> (usize, usize) {
        match self {
            Self::Interleaved => (2 * i, 2 * i + 1),
            Self::SplitHalf => (i, i + half_dim),
        }
    }
}

#[test]
fn test_validate() {
    let mut config = RotaryConfig {
        dim: 4096,
        n_heads: 32,
        theta: 5e5,
        max_seq_len: 8192,
        interleaved: false,
    };
    assert_eq!(config.validate().unwrap(), 128);
    assert_eq!(config.layout(), Layout::SplitHalf);

    config.n_heads = 33;
    assert!(matches!(
        config.validate(),
        Err(Error::IndivisibleHeads { dim: 4096, n_heads: 33 })
    ));

    config.n_heads = 0;
    assert!(matches!(config.validate(), Err(Error::IndivisibleHeads { .. })));

    config.dim = 6;
    config.n_heads = 2;
    assert!(matches!(config.validate(), Err(Error::OddHeadDim { head_dim: 3 })));

    config.dim = 8;
    config.theta = f32::NAN;
    assert!(matches!(config.validate(), Err(Error::InvalidTheta { .. })));
    for theta in [0., 0.5, 1.] {
        config.theta = theta;
        assert!(matches!(config.validate(), Err(Error::InvalidTheta { .. })));
    }
    config.theta = 1.5;
    assert_eq!(config.validate().unwrap(), 4);
}

#[test]
fn test_serde_defaults() {
    let config: RotaryConfig =
        serde_json::from_str(r#"{"dim": 64, "n_heads": 4, "max_seq_len": 16}"#).unwrap();
    assert_eq!(config.theta, 1e4);
    assert!(config.interleaved);
    assert_eq!(config.head_dim(), 16);
}

#[test]
fn test_layout() {
    assert_eq!(Layout::Interleaved.pair(4, 1), (2, 3));
    assert_eq!(Layout::SplitHalf.pair(4, 1), (1, 5));
}
