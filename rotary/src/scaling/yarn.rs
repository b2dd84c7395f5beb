//! YaRN (dynamic-NTK) frequency interpolation.
//!
//! Unlike the other strategies this one never rotates activations itself: it
//! returns finished, mscale-corrected cosine/sine tables for a kernel to consume.

use crate::{seq_axis, Error, Result, RotaryConfig};
use serde::{Deserialize, Serialize};
use std::{f32::consts::PI, ops::Deref};
use tensor::{udim, DataType, Tensor};

/// YaRN parameters.
#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
pub struct DynamicNtkParams {
    /// Ratio between the extended and the original context.
    #[serde(alias = "factor")]
    pub scaling_factor: f32,
    /// Maximum position the model was trained on.
    pub original_max_position_embeddings: usize,
    /// Rotation count below which dimensions are extrapolated.
    #[serde(default = "default_beta_fast")]
    pub beta_fast: f32,
    /// Rotation count above which dimensions are interpolated.
    #[serde(default = "default_beta_slow")]
    pub beta_slow: f32,
    /// Magnitude correction multiplier.
    #[serde(default = "default_mscale")]
    pub mscale: f32,
    /// Magnitude correction multiplier shared by all dimensions.
    #[serde(default)]
    pub mscale_all_dim: f32,
}

#[inline(always)]
const fn default_beta_fast() -> f32 {
    32.
}

#[inline(always)]
const fn default_beta_slow() -> f32 {
    1.
}

#[inline(always)]
const fn default_mscale() -> f32 {
    1.
}

impl DynamicNtkParams {
    pub(crate) fn validate(&self) -> Result<()> {
        let positive = |x: f32| x.is_finite() && x > 0.;
        let reason = if !positive(self.scaling_factor) {
            format!(
                "scaling_factor must be finite and positive, got {}",
                self.scaling_factor
            )
        } else if self.original_max_position_embeddings == 0 {
            "original_max_position_embeddings must be positive".into()
        } else if !positive(self.beta_fast) || !positive(self.beta_slow) {
            format!(
                "beta_fast and beta_slow must be finite and positive, got {} and {}",
                self.beta_fast, self.beta_slow,
            )
        } else if !self.mscale.is_finite() || !self.mscale_all_dim.is_finite() {
            "mscale and mscale_all_dim must be finite".into()
        } else {
            return Ok(());
        };
        Err(Error::InvalidScaling { reason })
    }

    /// `get_mscale(scaling_factor, mscale) / get_mscale(scaling_factor, mscale_all_dim)`
    pub fn table_mscale(&self) -> f32 {
        get_mscale(self.scaling_factor, self.mscale)
            / get_mscale(self.scaling_factor, self.mscale_all_dim)
    }
}

/// Magnitude correction for an interpolation `scale`; 1 when nothing is interpolated.
pub fn get_mscale(scale: f32, mscale: f32) -> f32 {
    if scale <= 1. {
        return 1.;
    }
    0.1 * mscale * scale.ln() + 1.
}

/// Inverse of the frequency formula: the (fractional) dimension index whose
/// component completes `num_rotations` turns over `max_position_embeddings` positions.
pub fn find_correction_dim(
    num_rotations: f32,
    dim: usize,
    base: f32,
    max_position_embeddings: usize,
) -> f32 {
    let dim = dim as f32;
    let max_pos = max_position_embeddings as f32;
    dim * (max_pos / (num_rotations * 2. * PI)).ln() / (2. * base.ln())
}

/// Floored correction dimensions for `low_rot` and `high_rot`, clamped to `[0, dim / 2 - 1]`.
pub fn find_correction_range(
    low_rot: f32,
    high_rot: f32,
    dim: usize,
    base: f32,
    max_position_embeddings: usize,
) -> (f32, f32) {
    let low = find_correction_dim(low_rot, dim, base, max_position_embeddings).floor();
    let high = find_correction_dim(high_rot, dim, base, max_position_embeddings).floor();
    let top = (dim / 2).saturating_sub(1) as f32;
    (low.max(0.), high.min(top))
}

/// `clamp((j - low) / (high - low), 0, 1)` for `j` in `0..len`.
pub fn linear_ramp_mask(low: f32, high: f32, len: usize) -> Vec<f32> {
    let high = if low == high {
        trace!(target: "rope", "yarn ramp collapsed at {low}, nudging the upper bound");
        high + 0.001
    } else {
        high
    };
    (0..len)
        .map(|j| ((j as f32 - low) / (high - low)).clamp(0., 1.))
        .collect()
}

/// Cosine and sine tables, each `[seq_len, dim]` and already scaled by mscale.
#[derive(Clone, Debug)]
pub struct YarnTables {
    /// `cos(emb) * mscale`
    pub cos: Tensor<Vec<f32>>,
    /// `sin(emb) * mscale`
    pub sin: Tensor<Vec<f32>>,
}

impl YarnTables {
    /// Stacks both tables into one `[2, seq_len, dim]` tensor, cosine first.
    pub fn stack(self) -> Tensor<Vec<f32>> {
        let [seq_len, dim] = [self.cos.shape()[0], self.cos.shape()[1]];
        let mut data = self.cos.take_physical();
        data.extend(self.sin.take_physical());
        Tensor::new(DataType::F32, &[2, seq_len, dim], data)
    }
}

/// Table provider for YaRN scaled rotary embeddings.
#[derive(Clone, Debug)]
pub struct YarnRotaryEmbedding {
    config: RotaryConfig,
    params: Option<DynamicNtkParams>,
}

impl YarnRotaryEmbedding {
    /// Validates `config` and, when present, `params`.
    ///
    /// Missing params are accepted here and reported by every table request.
    pub fn new(config: RotaryConfig, params: Option<DynamicNtkParams>) -> Result<Self> {
        config.validate()?;
        if let Some(params) = &params {
            params.validate()?;
            if params.scaling_factor <= 1. {
                warn!(
                    target: "rope",
                    "yarn scaling factor {} <= 1, no interpolation takes place",
                    params.scaling_factor,
                );
            }
        }
        Ok(Self { config, params })
    }

    /// The configuration this provider was built with.
    #[inline]
    pub const fn config(&self) -> &RotaryConfig {
        &self.config
    }

    /// The scaling parameters, if any were given.
    #[inline]
    pub const fn params(&self) -> Option<&DynamicNtkParams> {
        self.params.as_ref()
    }

    fn required_params(&self) -> Result<&DynamicNtkParams> {
        self.params
            .as_ref()
            .ok_or(Error::MissingScalingParams { strategy: "yarn" })
    }

    /// Interpolated/extrapolated blend of the `dim / 2` inverse frequencies.
    pub fn inv_freqs(&self) -> Result<Vec<f32>> {
        let params = self.required_params()?;
        let RotaryConfig { dim, theta, .. } = self.config;

        let (low, high) = find_correction_range(
            params.beta_fast,
            params.beta_slow,
            dim,
            theta,
            params.original_max_position_embeddings,
        );
        let ramp = linear_ramp_mask(low, high, dim / 2);

        let theta = theta as f64;
        Ok(ramp
            .into_iter()
            .enumerate()
            .map(|(j, ramp)| {
                let extra = (1. / theta.powf(2. * j as f64 / dim as f64)) as f32;
                let inter = extra / params.scaling_factor;
                let mask = 1. - ramp;
                inter * (1. - mask) + extra * mask
            })
            .collect())
    }

    /// The magnitude correction applied to both tables.
    pub fn mscale(&self) -> Result<f32> {
        self.required_params().map(DynamicNtkParams::table_mscale)
    }

    /// Tables for positions `0..seq_len`.
    pub fn freqs(&self, seq_len: udim) -> Result<YarnTables> {
        let inv_freqs = self.inv_freqs()?;
        let mscale = self.mscale()?;
        let dim = self.config.dim;
        debug!(
            target: "rope",
            "build yarn tables: {seq_len} positions x {dim}, mscale {mscale}",
        );

        let len = seq_len as usize * dim;
        let mut cos = Vec::with_capacity(len);
        let mut sin = Vec::with_capacity(len);
        for t in 0..seq_len {
            let t = t as f32;
            // emb = concat(freqs, freqs)
            for &f in inv_freqs.iter().chain(&inv_freqs) {
                let (s, c) = (t * f).sin_cos();
                cos.push(c * mscale);
                sin.push(s * mscale);
            }
        }

        let shape = [seq_len, dim as udim];
        Ok(YarnTables {
            cos: Tensor::new(DataType::F32, &shape, cos),
            sin: Tensor::new(DataType::F32, &shape, sin),
        })
    }

    /// Stacked `[2, seq_len, dim]` tables sized by the sequence axis of `x`.
    pub fn freqs_for<P: Deref<Target = [u8]>>(&self, x: &Tensor<P>) -> Result<Tensor<Vec<f32>>> {
        let seq_len = x.shape()[seq_axis(x.shape())?];
        self.freqs(seq_len).map(YarnTables::stack)
    }
}

#[cfg(test)]
fn deepseek() -> (RotaryConfig, DynamicNtkParams) {
    (
        RotaryConfig {
            dim: 64,
            n_heads: 1,
            theta: 1e4,
            max_seq_len: 16,
            interleaved: false,
        },
        DynamicNtkParams {
            scaling_factor: 40.,
            original_max_position_embeddings: 4096,
            beta_fast: 32.,
            beta_slow: 1.,
            mscale: 1.,
            mscale_all_dim: 1.,
        },
    )
}

#[test]
fn test_get_mscale() {
    assert_eq!(get_mscale(1., 123.), 1.);
    assert_eq!(get_mscale(0.5, 1.), 1.);
    let expected = 0.1 * 2f32.ln() + 1.;
    assert!((get_mscale(2., 1.) - expected).abs() < 1e-7);
    assert!((get_mscale(2., 1.) - 1.0693).abs() < 1e-4);
}

#[test]
fn test_correction_range() {
    let (low, high) = find_correction_range(32., 1., 64, 1e4, 4096);
    // 64 * ln(4096 / (32 * 2π)) / (2 * ln(1e4)) = 10.47, and 22.51 for one rotation
    assert_eq!(low, 10.);
    assert_eq!(high, 22.);

    // clamping
    let (low, high) = find_correction_range(1e6, 1e-6, 64, 1e4, 4096);
    assert_eq!(low, 0.);
    assert_eq!(high, 31.);
}

#[test]
fn test_ramp() {
    let ramp = linear_ramp_mask(2., 6., 8);
    assert_eq!(ramp, [0., 0., 0., 0.25, 0.5, 0.75, 1., 1.]);
}

#[test]
fn test_degenerate_ramp() {
    let ramp = linear_ramp_mask(3., 3., 8);
    assert!(ramp.iter().all(|x| x.is_finite()));
    assert!(ramp.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(ramp[..4], [0.; 4]);
    assert_eq!(ramp[4..], [1.; 4]);
}

#[test]
fn test_inv_freqs_blend() {
    let (config, params) = deepseek();
    let yarn = YarnRotaryEmbedding::new(config, Some(params)).unwrap();
    let freqs = yarn.inv_freqs().unwrap();
    assert_eq!(freqs.len(), 32);

    let base = crate::freqs::inv_freqs(64, 1e4);
    // below the correction range: pure extrapolation
    for j in 0..=10 {
        assert!((freqs[j] - base[j]).abs() <= base[j] * 1e-6, "j = {j}");
    }
    // above it: pure interpolation
    for j in 22..32 {
        let expected = base[j] / 40.;
        assert!((freqs[j] - expected).abs() <= expected * 1e-5, "j = {j}");
    }
    // in between: strictly between the two
    for j in 11..22 {
        assert!(freqs[j] < base[j] && freqs[j] > base[j] / 40., "j = {j}");
    }
}

#[test]
fn test_tables() {
    let (config, params) = deepseek();
    let params = DynamicNtkParams {
        mscale_all_dim: 0.,
        ..params
    };
    let yarn = YarnRotaryEmbedding::new(config, Some(params)).unwrap();
    let mscale = yarn.mscale().unwrap();
    assert!((mscale - (0.1 * 40f32.ln() + 1.)).abs() < 1e-6);

    let YarnTables { cos, sin } = yarn.freqs(5).unwrap();
    assert_eq!(cos.shape(), &[5, 64]);
    assert_eq!(sin.shape(), &[5, 64]);

    let inv = yarn.inv_freqs().unwrap();
    let (cos, sin) = (cos.physical(), sin.physical());
    // position 0: cos = mscale, sin = 0
    assert!(cos[..64].iter().all(|&c| (c - mscale).abs() < 1e-6));
    assert!(sin[..64].iter().all(|&s| s == 0.));
    // the halves repeat
    for t in 0..5 {
        let row = &cos[t * 64..][..64];
        assert_eq!(row[..32], row[32..]);
        let expected = (t as f32 * inv[3]).cos() * mscale;
        assert!((row[3] - expected).abs() < 1e-6);
    }
}

#[test]
fn test_missing_params() {
    let (config, _) = deepseek();
    let yarn = YarnRotaryEmbedding::new(config, None).unwrap();
    assert!(matches!(
        yarn.freqs(4),
        Err(Error::MissingScalingParams { strategy: "yarn" })
    ));
    assert!(yarn.inv_freqs().is_err());
    assert!(yarn.mscale().is_err());
}

#[test]
fn test_freqs_for() {
    let (config, params) = deepseek();
    let yarn = YarnRotaryEmbedding::new(config, Some(params)).unwrap();
    let x = Tensor::from_slice(&[1, 3, 2, 64], &[0f32; 3 * 2 * 64]);
    let stacked = yarn.freqs_for(&x).unwrap();
    assert_eq!(stacked.shape(), &[2, 3, 64]);
    let tables = yarn.freqs(3).unwrap();
    assert_eq!(stacked.physical()[..192], tables.cos.physical()[..]);
    assert_eq!(stacked.physical()[192..], tables.sin.physical()[..]);
}

#[test]
fn test_invalid_params() {
    let (config, params) = deepseek();
    for params in [
        DynamicNtkParams { scaling_factor: 0., ..params },
        DynamicNtkParams { original_max_position_embeddings: 0, ..params },
        DynamicNtkParams { beta_slow: 0., ..params },
        DynamicNtkParams { mscale: f32::NAN, ..params },
    ] {
        assert!(matches!(
            YarnRotaryEmbedding::new(config, Some(params)),
            Err(Error::InvalidScaling { .. })
        ));
    }
}

#[test]
fn test_unit_theta() {
    // ln(1) = 0 would turn the correction range infinite and the tables NaN
    let (config, params) = deepseek();
    for theta in [1., 0.5] {
        let config = RotaryConfig { theta, ..config };
        assert!(matches!(
            YarnRotaryEmbedding::new(config, Some(params)),
            Err(Error::InvalidTheta { .. })
        ));
    }

    let tables = YarnRotaryEmbedding::new(RotaryConfig { theta: 1.5, ..config }, Some(params))
        .unwrap()
        .freqs(3)
        .unwrap();
    assert!(tables.cos.physical().iter().all(|x| x.is_finite()));
    assert!(tables.sin.physical().iter().all(|x| x.is_finite()));
}
