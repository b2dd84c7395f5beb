//! Llama3 frequency-dependent rescaling.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

/// Llama3-style rescaling parameters.
#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
pub struct LinearSmoothParams {
    /// Main downscale applied to low-frequency components.
    pub factor: f32,
    /// Divides the original context into the low-frequency wavelength bound.
    pub low_freq_factor: f32,
    /// Divides the original context into the high-frequency wavelength bound.
    pub high_freq_factor: f32,
    /// Maximum position the model was trained on.
    #[serde(alias = "original_max_position_embeddings")]
    pub orig_max_position: usize,
}

impl LinearSmoothParams {
    /// Wavelengths above this are fully downscaled.
    #[inline]
    pub fn low_freq_wavelen(&self) -> f32 {
        self.orig_max_position as f32 / self.low_freq_factor
    }

    /// Wavelengths below this are kept as they are.
    #[inline]
    pub fn high_freq_wavelen(&self) -> f32 {
        self.orig_max_position as f32 / self.high_freq_factor
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let positive = |x: f32| x.is_finite() && x > 0.;
        let reason = if !positive(self.factor) {
            format!("factor must be finite and positive, got {}", self.factor)
        } else if !positive(self.low_freq_factor) || !positive(self.high_freq_factor) {
            format!(
                "frequency factors must be finite and positive, got {} and {}",
                self.low_freq_factor, self.high_freq_factor,
            )
        } else if self.orig_max_position == 0 {
            "orig_max_position must be positive".into()
        } else {
            return Ok(());
        };
        Err(Error::InvalidScaling { reason })
    }

    /// Mid-band blend weight for a component of wavelength `wavelen`:
    /// 0 at the low-frequency bound, 1 at the high-frequency bound.
    ///
    /// Equal frequency factors leave no mid-band, so the weight is pinned to 0.
    pub fn smooth(&self, wavelen: f32) -> f32 {
        if self.low_freq_factor == self.high_freq_factor {
            return 0.;
        }
        (self.orig_max_position as f32 / wavelen - self.low_freq_factor)
            / (self.high_freq_factor - self.low_freq_factor)
    }

    /// `(1 - smooth) * freq / factor + smooth * freq`
    #[inline]
    pub fn blend(&self, freq: f32, smooth: f32) -> f32 {
        (1. - smooth) * freq / self.factor + smooth * freq
    }

    /// Rescales one inverse frequency.
    pub fn scale(&self, freq: f32) -> f32 {
        let wavelen = 2. * PI / freq;
        if wavelen < self.high_freq_wavelen() {
            freq
        } else if wavelen > self.low_freq_wavelen() {
            freq / self.factor
        } else {
            self.blend(freq, self.smooth(wavelen))
        }
    }
}

/// Rescales every component independently.
pub(crate) fn scale_inv_freqs(inv_freqs: &mut [f32], params: &LinearSmoothParams) {
    if params.low_freq_factor == params.high_freq_factor {
        trace!(target: "rope", "llama3 frequency factors are equal, mid-band is empty");
    }
    for f in inv_freqs {
        *f = params.scale(*f);
    }
}

#[cfg(test)]
const LLAMA3: LinearSmoothParams = LinearSmoothParams {
    factor: 8.,
    low_freq_factor: 1.,
    high_freq_factor: 4.,
    orig_max_position: 8192,
};

#[test]
fn test_high_freq_unscaled() {
    assert_eq!(LLAMA3.high_freq_wavelen(), 2048.);
    assert_eq!(LLAMA3.low_freq_wavelen(), 8192.);
    // wavelength 2π, far below 2048
    assert_eq!(LLAMA3.scale(1.), 1.);
    assert_eq!(LLAMA3.scale(0.01), 0.01);
}

#[test]
fn test_low_freq_downscaled() {
    // wavelength ~62832 > 8192
    let f = 1e-4;
    assert_eq!(LLAMA3.scale(f), f / 8.);
}

#[test]
fn test_mid_band() {
    // wavelength 4096, halfway between the bounds in 1/wavelen space
    let f = 2. * PI / 4096.;
    let smooth = LLAMA3.smooth(4096.);
    assert!((smooth - 1. / 3.).abs() < 1e-6);
    let expected = (1. - smooth) * f / 8. + smooth * f;
    assert!((LLAMA3.scale(f) - expected).abs() <= expected * 1e-5);
    assert!(LLAMA3.scale(f) > f / 8. && LLAMA3.scale(f) < f);
}

#[test]
fn test_boundary_continuity() {
    let high = LLAMA3.high_freq_wavelen();
    let low = LLAMA3.low_freq_wavelen();

    // at the high-frequency bound the blend is the identity branch
    let f = 2. * PI / high;
    assert_eq!(LLAMA3.smooth(high), 1.);
    assert_eq!(LLAMA3.blend(f, LLAMA3.smooth(high)), f);

    // at the low-frequency bound the blend is the downscale branch
    let f = 2. * PI / low;
    assert_eq!(LLAMA3.smooth(low), 0.);
    assert_eq!(LLAMA3.blend(f, LLAMA3.smooth(low)), f / LLAMA3.factor);
}

#[test]
fn test_equal_factors() {
    let params = LinearSmoothParams {
        low_freq_factor: 2.,
        high_freq_factor: 2.,
        ..LLAMA3
    };
    assert_eq!(params.smooth(4096.), 0.);
    // exactly on the collapsed bound the blend degenerates to the downscale
    let f = 2. * PI / 4096.;
    let scaled = params.scale(f);
    assert!(scaled.is_finite());
    assert!(scaled == f || (scaled - f / 8.).abs() <= f * 1e-6);

    let mut freqs = crate::freqs::inv_freqs(128, 5e5);
    scale_inv_freqs(&mut freqs, &params);
    assert!(freqs.iter().all(|f| f.is_finite() && *f > 0.));
}

#[test]
fn test_validate() {
    assert!(LLAMA3.validate().is_ok());
    for params in [
        LinearSmoothParams { factor: 0., ..LLAMA3 },
        LinearSmoothParams { factor: f32::INFINITY, ..LLAMA3 },
        LinearSmoothParams { low_freq_factor: -1., ..LLAMA3 },
        LinearSmoothParams { orig_max_position: 0, ..LLAMA3 },
    ] {
        assert!(matches!(params.validate(), Err(Error::InvalidScaling { .. })));
    }
}
