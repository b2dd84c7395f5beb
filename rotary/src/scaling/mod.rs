//! Frequency rescaling for contexts longer than the model was trained on.

pub(crate) mod llama3;
mod yarn;

pub use llama3::LinearSmoothParams;
pub use yarn::{
    find_correction_dim, find_correction_range, get_mscale, linear_ramp_mask, DynamicNtkParams,
    YarnRotaryEmbedding, YarnTables,
};

use serde::{Deserialize, Serialize};

/// Which rescaling runs on top of the base frequencies.
///
/// `None` and `LinearSmooth` feed [`RotaryEmbedding`](crate::RotaryEmbedding), which rotates
/// activations. `DynamicNtk` is terminal: it hands out finished cosine/sine tables through
/// [`YarnRotaryEmbedding`] instead.
#[derive(Clone, Copy, PartialEq, Debug, Default, Serialize, Deserialize)]
#[serde(tag = "rope_type", content = "params")]
pub enum ScalingStrategy {
    /// Unscaled frequencies.
    #[default]
    #[serde(rename = "default")]
    None,
    /// Llama3-style piecewise rescaling; unscaled without params.
    #[serde(rename = "llama3")]
    LinearSmooth(Option<LinearSmoothParams>),
    /// YaRN interpolation; fails at use without params.
    #[serde(rename = "yarn")]
    DynamicNtk(Option<DynamicNtkParams>),
}

impl ScalingStrategy {
    /// Short name used in logs and errors.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::None => "default",
            Self::LinearSmooth(_) => "llama3",
            Self::DynamicNtk(_) => "yarn",
        }
    }
}

#[test]
fn test_serde() {
    let strategy: ScalingStrategy = serde_json::from_str(r#"{"rope_type": "default"}"#).unwrap();
    assert_eq!(strategy, ScalingStrategy::None);

    let strategy: ScalingStrategy = serde_json::from_str(
        r#"{
            "rope_type": "llama3",
            "params": {
                "factor": 8.0,
                "low_freq_factor": 1.0,
                "high_freq_factor": 4.0,
                "original_max_position_embeddings": 8192
            }
        }"#,
    )
    .unwrap();
    assert_eq!(
        strategy,
        ScalingStrategy::LinearSmooth(Some(LinearSmoothParams {
            factor: 8.,
            low_freq_factor: 1.,
            high_freq_factor: 4.,
            orig_max_position: 8192,
        }))
    );
    assert_eq!(strategy.name(), "llama3");

    let strategy: ScalingStrategy =
        serde_json::from_str(r#"{"rope_type": "yarn", "params": null}"#).unwrap();
    assert_eq!(strategy, ScalingStrategy::DynamicNtk(None));
}
