use crate::{
    apply::{rotate_with, Direction},
    cache::FrequencyCache,
    freqs,
    scaling::llama3,
    Error, Layout, LinearSmoothParams, Result, RotaryConfig,
};
use common::upos;
use std::ops::Deref;
use tensor::{udim, Tensor};

/// Rotary embedding over a cached cosine/sine table, optionally llama3-scaled.
#[derive(Debug)]
pub struct RotaryEmbedding {
    config: RotaryConfig,
    scaling: Option<LinearSmoothParams>,
    cache: FrequencyCache,
}

impl RotaryEmbedding {
    /// Validates the configuration and computes the inverse frequencies.
    /// The table itself is built on first use.
    pub fn new(config: RotaryConfig, scaling: Option<LinearSmoothParams>) -> Result<Self> {
        let head_dim = config.validate()?;
        let rows = config
            .max_seq_len
            .checked_mul(2)
            .and_then(|rows| udim::try_from(rows).ok())
            .ok_or(Error::TableTooLarge {
                max_seq_len: config.max_seq_len,
            })?;

        let mut inv_freqs = freqs::inv_freqs(head_dim, config.theta);
        if let Some(params) = &scaling {
            params.validate()?;
            llama3::scale_inv_freqs(&mut inv_freqs, params);
        }

        Ok(Self {
            config,
            scaling,
            cache: FrequencyCache::new(inv_freqs, rows),
        })
    }

    /// The configuration this engine was built with.
    #[inline]
    pub const fn config(&self) -> &RotaryConfig {
        &self.config
    }

    /// Pair layout along the head dimension.
    #[inline]
    pub const fn layout(&self) -> Layout {
        self.config.layout()
    }

    /// `dim / n_heads`
    #[inline]
    pub const fn head_dim(&self) -> usize {
        self.config.head_dim()
    }

    /// Llama3 scaling parameters, if any.
    #[inline]
    pub const fn scaling(&self) -> Option<&LinearSmoothParams> {
        self.scaling.as_ref()
    }

    /// The (possibly rescaled) inverse frequencies, `head_dim / 2` of them.
    #[inline]
    pub fn inv_freqs(&self) -> &[f32] {
        self.cache.inv_freqs()
    }

    /// `[2 * max_seq_len, head_dim / 2, 2]`
    #[inline]
    pub fn freqs_cis(&self) -> Tensor<&[f32]> {
        self.cache.freqs_cis()
    }

    /// `[2 * max_seq_len, head_dim]`
    #[inline]
    pub fn freqs_cis_flat(&self) -> Tensor<&[f32]> {
        self.cache.freqs_cis_flat()
    }

    /// Rotates `x: [(batch,) seq_len, n_kv_heads, head_dim]` to positions
    /// `start_pos..start_pos + seq_len`.
    ///
    /// `start_pos` defaults to 0 and `seq_len` to the sequence axis of `x`.
    pub fn apply<P: Deref<Target = [u8]>>(
        &self,
        x: &Tensor<P>,
        start_pos: Option<upos>,
        seq_len: Option<udim>,
    ) -> Result<Tensor<Vec<u8>>> {
        self.rotate(x, start_pos, seq_len, Direction::Forward)
    }

    /// Undoes [`apply`](Self::apply) for the same positions.
    pub fn apply_inverse<P: Deref<Target = [u8]>>(
        &self,
        x: &Tensor<P>,
        start_pos: Option<upos>,
        seq_len: Option<udim>,
    ) -> Result<Tensor<Vec<u8>>> {
        self.rotate(x, start_pos, seq_len, Direction::Inverse)
    }

    fn rotate<P: Deref<Target = [u8]>>(
        &self,
        x: &Tensor<P>,
        start_pos: Option<upos>,
        seq_len: Option<udim>,
        direction: Direction,
    ) -> Result<Tensor<Vec<u8>>> {
        rotate_with(
            x,
            self.freqs_cis(),
            self.layout(),
            start_pos.unwrap_or(0),
            seq_len,
            direction,
        )
    }
}

#[cfg(test)]
const TINY: RotaryConfig = RotaryConfig {
    dim: 8,
    n_heads: 1,
    theta: 1e4,
    max_seq_len: 4,
    interleaved: false,
};

#[test]
fn test_tiny() {
    let rope = RotaryEmbedding::new(TINY, None).unwrap();
    assert_eq!(rope.head_dim(), 8);
    assert_eq!(rope.inv_freqs().len(), 4);
    assert_eq!(rope.freqs_cis().shape(), &[8, 4, 2]);
    assert_eq!(rope.freqs_cis_flat().shape(), &[8, 8]);

    let x = Tensor::from_slice(&[1, 1, 1, 8], &[1f32; 8]);
    let y = rope.apply(&x, None, None).unwrap();
    assert_eq!(y.shape(), &[1, 1, 1, 8]);
    assert_eq!(y.to_vec::<f32>().unwrap(), [1f32; 8]);
}

#[test]
fn test_lazy_table() {
    let rope = RotaryEmbedding::new(TINY, None).unwrap();
    assert!(!rope.cache.is_built());
    let _ = rope.inv_freqs();
    assert!(!rope.cache.is_built());
    let x = Tensor::from_slice(&[1, 1, 8], &[1f32; 8]);
    rope.apply(&x, Some(3), None).unwrap();
    assert!(rope.cache.is_built());
}

#[test]
fn test_window_limit() {
    let rope = RotaryEmbedding::new(TINY, None).unwrap();
    let x = Tensor::from_slice(&[1, 2, 1, 8], &[1f32; 16]);
    // the table covers 2 * max_seq_len positions
    assert!(rope.apply(&x, Some(6), None).is_ok());
    assert!(matches!(
        rope.apply(&x, Some(7), None),
        Err(Error::OutOfRange { start: 7, len: 2, rows: 8 })
    ));
}

#[test]
fn test_round_trip() {
    let rope = RotaryEmbedding::new(
        RotaryConfig {
            interleaved: true,
            ..TINY
        },
        None,
    )
    .unwrap();
    let data = (0..32).map(|i| (i as f32 * 0.7).cos()).collect::<Vec<_>>();
    let x = Tensor::from_slice(&[2, 2, 1, 8], &data);
    let y = rope.apply(&x, Some(5), Some(2)).unwrap();
    assert_ne!(y.physical(), x.physical());
    let z = rope.apply_inverse(&y, Some(5), Some(2)).unwrap();
    for (a, b) in z.to_vec::<f32>().unwrap().iter().zip(&data) {
        assert!((a - b).abs() < 1e-5, "{a} vs {b}");
    }
}

#[test]
fn test_llama3_scaled() {
    let params = LinearSmoothParams {
        factor: 8.,
        low_freq_factor: 1.,
        high_freq_factor: 4.,
        orig_max_position: 8192,
    };
    let config = RotaryConfig {
        dim: 4096,
        n_heads: 32,
        theta: 5e5,
        max_seq_len: 16,
        interleaved: false,
    };
    let plain = RotaryEmbedding::new(config, None).unwrap();
    let scaled = RotaryEmbedding::new(config, Some(params)).unwrap();
    assert_eq!(scaled.scaling(), Some(&params));

    let (plain, scaled) = (plain.inv_freqs(), scaled.inv_freqs());
    assert_eq!(plain.len(), 64);
    // highest frequencies untouched, lowest divided by the factor
    assert_eq!(plain[0], scaled[0]);
    assert_eq!(plain[63] / 8., scaled[63]);
    assert!(plain.iter().zip(scaled).all(|(p, s)| s <= p));
}

#[test]
fn test_invalid() {
    let config = RotaryConfig { n_heads: 3, ..TINY };
    assert!(matches!(
        RotaryEmbedding::new(config, None),
        Err(Error::IndivisibleHeads { dim: 8, n_heads: 3 })
    ));
    let params = LinearSmoothParams {
        factor: -1.,
        low_freq_factor: 1.,
        high_freq_factor: 4.,
        orig_max_position: 8192,
    };
    assert!(matches!(
        RotaryEmbedding::new(TINY, Some(params)),
        Err(Error::InvalidScaling { .. })
    ));
}
