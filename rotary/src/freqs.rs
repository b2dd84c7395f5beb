//! Base inverse frequencies.

/// `1 / theta^(i / head_dim)` for every even `i` in `0..head_dim`.
///
/// The power runs in `f64` and is narrowed only after the reciprocal, so large
/// thetas do not overflow.
pub fn inv_freqs(head_dim: usize, theta: f32) -> Vec<f32> {
    let theta = theta as f64;
    let n = head_dim as f64;
    (0..head_dim)
        .step_by(2)
        .map(|i| (1. / theta.powf(i as f64 / n)) as f32)
        .collect()
}

#[test]
fn test_known_values() {
    let freqs = inv_freqs(8, 1e4);
    assert_eq!(freqs.len(), 4);
    for (i, (&actual, expected)) in freqs.iter().zip([1., 0.1, 0.01, 0.001]).enumerate() {
        assert!(
            (actual - expected).abs() <= expected * 1e-6,
            "freq[{i}] = {actual}, expected {expected}"
        );
    }
}

#[test]
fn test_strictly_decreasing() {
    for theta in [1.5, 1e4, 5e5, 1e30] {
        let freqs = inv_freqs(128, theta);
        assert_eq!(freqs.len(), 64);
        assert_eq!(freqs[0], 1.);
        assert!(freqs.iter().all(|f| f.is_finite() && *f > 0.), "theta = {theta}");
        assert!(freqs.windows(2).all(|w| w[0] > w[1]), "theta = {theta}");
    }
}
