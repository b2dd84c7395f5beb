//! Property-based tests for `rotary`.
//!
//! - inverse frequencies: length and strict ordering
//! - rotation is an isometry on every pair
//! - `apply_inverse` undoes `apply`
//! - scaling keeps frequencies within `[f / factor, f]`
//! - the YaRN ramp stays finite and monotonic

use proptest::prelude::*;
use rotary::{
    inv_freqs,
    scaling::{find_correction_range, linear_ramp_mask},
    Layout, LinearSmoothParams, RotaryConfig, RotaryEmbedding,
};
use tensor::Tensor;

// ── Strategies ──────────────────────────────────────────────────────────────

/// An even head dimension in [2, 64].
fn arb_head_dim() -> impl Strategy<Value = usize> {
    (1usize..=32).prop_map(|n| n * 2)
}

fn arb_layout() -> impl Strategy<Value = Layout> {
    prop_oneof![Just(Layout::Interleaved), Just(Layout::SplitHalf)]
}

fn arb_scaling() -> impl Strategy<Value = Option<LinearSmoothParams>> {
    prop_oneof![
        Just(None),
        (1f32..=16., 1f32..=2., 2f32..=8., 256usize..=16384).prop_map(
            |(factor, low_freq_factor, high_freq_factor, orig_max_position)| {
                Some(LinearSmoothParams {
                    factor,
                    low_freq_factor,
                    high_freq_factor,
                    orig_max_position,
                })
            }
        ),
    ]
}

/// An engine, an activation `[batch, seq_len, n_heads, head_dim]` and a start position
/// that keeps the window inside the table.
fn arb_case() -> impl Strategy<Value = (RotaryEmbedding, Vec<f32>, [u32; 4], u32)> {
    (
        arb_head_dim(),
        1usize..=4,
        100f32..=1e6,
        arb_layout(),
        arb_scaling(),
        (1u32..=2, 1u32..=6, 1u32..=3),
    )
        .prop_flat_map(|(head_dim, n_heads, theta, layout, scaling, (b, s, h))| {
            let config = RotaryConfig {
                dim: head_dim * n_heads,
                n_heads,
                theta,
                max_seq_len: 8,
                interleaved: layout == Layout::Interleaved,
            };
            let shape = [b, s, h, head_dim as u32];
            let len = shape.iter().product::<u32>() as usize;
            (
                Just(config),
                Just(scaling),
                prop::collection::vec(-10f32..=10., len),
                Just(shape),
                0u32..=16 - s,
            )
        })
        .prop_map(|(config, scaling, data, shape, start)| {
            let rope = RotaryEmbedding::new(config, scaling).expect("valid config");
            (rope, data, shape, start)
        })
}

// ── Property tests ───────────────────────────────────────────────────────────

proptest! {
    /// `head_dim / 2` positive, strictly decreasing frequencies starting at 1.
    #[test]
    fn inv_freqs_are_strictly_decreasing(
        head_dim in (1usize..=128).prop_map(|n| n * 2),
        theta in 100f32..=1e6,
    ) {
        let freqs = inv_freqs(head_dim, theta);
        prop_assert_eq!(freqs.len(), head_dim / 2);
        prop_assert_eq!(freqs[0], 1.);
        prop_assert!(freqs.iter().all(|&f| f > 0. && f.is_finite()));
        prop_assert!(freqs.windows(2).all(|w| w[0] > w[1]), "{:?}", freqs);
    }

    /// Every pair keeps its squared norm.
    #[test]
    fn rotation_is_an_isometry((rope, data, shape, start) in arb_case()) {
        let x = Tensor::from_slice(&shape, &data);
        let y = rope.apply(&x, Some(start), None).unwrap();
        prop_assert_eq!(y.shape(), x.shape());
        let y = y.to_vec::<f32>().unwrap();

        let head_dim = shape[3] as usize;
        let half = head_dim / 2;
        for (before, after) in data.chunks_exact(head_dim).zip(y.chunks_exact(head_dim)) {
            for i in 0..half {
                let (a, b) = rope.layout().pair(half, i);
                let n0 = before[a] * before[a] + before[b] * before[b];
                let n1 = after[a] * after[a] + after[b] * after[b];
                prop_assert!(
                    (n0 - n1).abs() <= 1e-5 * n0.max(1.),
                    "pair {i}: {n0} -> {n1}"
                );
            }
        }
    }

    /// Rotating back recovers the activation.
    #[test]
    fn inverse_recovers_input((rope, data, shape, start) in arb_case()) {
        let x = Tensor::from_slice(&shape, &data);
        let y = rope.apply(&x, Some(start), None).unwrap();
        let z = rope.apply_inverse(&y, Some(start), Some(shape[1])).unwrap();
        for (a, b) in z.to_vec::<f32>().unwrap().iter().zip(&data) {
            prop_assert!((a - b).abs() <= 1e-4 * b.abs().max(1.), "{} vs {}", a, b);
        }
    }

    /// Rescaled frequencies stay between the full downscale and the original.
    #[test]
    fn scaling_is_bounded(
        head_dim in arb_head_dim(),
        theta in 100f32..=1e6,
        scaling in arb_scaling(),
    ) {
        let config = RotaryConfig {
            dim: head_dim,
            n_heads: 1,
            theta,
            max_seq_len: 1,
            interleaved: true,
        };
        let base = inv_freqs(head_dim, theta);
        let rope = RotaryEmbedding::new(config, scaling).unwrap();
        let factor = scaling.map_or(1., |p| p.factor);
        for (&f, &s) in base.iter().zip(rope.inv_freqs()) {
            prop_assert!(s <= f * (1. + 1e-6) && s >= f / factor * (1. - 1e-6), "{} -> {}", f, s);
        }
    }

    /// The ramp is finite, within [0, 1] and non-decreasing for any ordered range.
    #[test]
    fn ramp_is_monotonic(
        dim in (1usize..=64).prop_map(|n| n * 2),
        beta_fast in 8f32..=64.,
        beta_slow in 0.01f32..=1.,
        max_pos in 128usize..=65536,
    ) {
        let (low, high) = find_correction_range(beta_fast, beta_slow, dim, 1e4, max_pos);
        prop_assume!(low <= high);
        let ramp = linear_ramp_mask(low, high, dim / 2);
        prop_assert_eq!(ramp.len(), dim / 2);
        prop_assert!(ramp.iter().all(|x| x.is_finite() && (0f32..=1.).contains(x)));
        prop_assert!(ramp.windows(2).all(|w| w[0] <= w[1]));
    }
}

// ── Unit tests ───────────────────────────────────────────────────────────────

#[test]
fn degenerate_ramp_is_finite() {
    for at in [0., 3., 31.] {
        let ramp = linear_ramp_mask(at, at, 32);
        assert!(ramp.iter().all(|x| x.is_finite()));
        assert!(ramp.windows(2).all(|w| w[0] <= w[1]));
    }
}
