//! Rotary position embeddings (RoPE).
//!
//! Builds inverse frequencies from a base rate, optionally rescales them for
//! long contexts, caches the cosine/sine table and rotates activations.
//!
//! Two capabilities come out of [`build`]:
//!
//! - [`RotaryEmbedding`] transforms activations, unscaled or llama3-scaled;
//! - [`YarnRotaryEmbedding`] only provides YaRN cosine/sine tables, which a
//!   fused kernel applies downstream.

#![deny(missing_docs)]

#[macro_use]
extern crate log;

mod apply;
mod cache;
mod config;
mod embedding;
mod error;
mod freqs;
pub mod scaling;

pub use apply::rotate;
pub use cache::{build_table, FrequencyCache};
pub use config::{Layout, RotaryConfig};
pub use embedding::RotaryEmbedding;
pub use error::{Error, Result};
pub use freqs::inv_freqs;
pub use scaling::{
    DynamicNtkParams, LinearSmoothParams, ScalingStrategy, YarnRotaryEmbedding, YarnTables,
};

use apply::seq_axis;

/// An engine built from a configuration and a scaling strategy.
#[derive(Debug)]
pub enum Rope {
    /// Rotates activations.
    Rotary(RotaryEmbedding),
    /// Provides YaRN tables.
    Yarn(YarnRotaryEmbedding),
}

/// Builds the engine for `strategy`. Frequencies are not tabulated yet.
pub fn build(config: RotaryConfig, strategy: ScalingStrategy) -> Result<Rope> {
    debug!(target: "rope", "build {} rope: {config:?}", strategy.name());
    match strategy {
        ScalingStrategy::None => RotaryEmbedding::new(config, None).map(Rope::Rotary),
        ScalingStrategy::LinearSmooth(params) => {
            RotaryEmbedding::new(config, params).map(Rope::Rotary)
        }
        ScalingStrategy::DynamicNtk(params) => {
            YarnRotaryEmbedding::new(config, params).map(Rope::Yarn)
        }
    }
}

impl Rope {
    /// The configuration shared by both capabilities.
    pub const fn config(&self) -> &RotaryConfig {
        match self {
            Self::Rotary(rope) => rope.config(),
            Self::Yarn(yarn) => yarn.config(),
        }
    }

    /// The activation transformer, unless this is a YaRN table provider.
    pub const fn as_rotary(&self) -> Option<&RotaryEmbedding> {
        match self {
            Self::Rotary(rope) => Some(rope),
            Self::Yarn(_) => None,
        }
    }

    /// The YaRN table provider, if this is one.
    pub const fn as_yarn(&self) -> Option<&YarnRotaryEmbedding> {
        match self {
            Self::Rotary(_) => None,
            Self::Yarn(yarn) => Some(yarn),
        }
    }
}

#[test]
fn test_build() {
    let config = RotaryConfig {
        dim: 64,
        n_heads: 4,
        theta: 1e4,
        max_seq_len: 32,
        interleaved: true,
    };
    assert!(matches!(build(config, ScalingStrategy::None), Ok(Rope::Rotary(_))));
    assert!(matches!(
        build(config, ScalingStrategy::LinearSmooth(None)),
        Ok(Rope::Rotary(ref rope)) if rope.scaling().is_none()
    ));

    let rope = build(config, ScalingStrategy::DynamicNtk(None)).unwrap();
    assert_eq!(rope.config(), &config);
    assert!(rope.as_rotary().is_none());
    assert!(matches!(
        rope.as_yarn().unwrap().freqs(4),
        Err(Error::MissingScalingParams { .. })
    ));

    let config = RotaryConfig { n_heads: 5, ..config };
    for strategy in [ScalingStrategy::None, ScalingStrategy::DynamicNtk(None)] {
        assert!(matches!(
            build(config, strategy),
            Err(Error::IndivisibleHeads { dim: 64, n_heads: 5 })
        ));
    }
}
