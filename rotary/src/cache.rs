//! Memoized cosine/sine table.

use std::sync::OnceLock;
use tensor::{udim, DataType, Tensor};

/// Owns the (possibly rescaled) inverse frequencies and the table built from them.
///
/// The table is built on first access. Building is a pure function of the
/// frequencies, so concurrent first callers can only ever agree; `OnceLock`
/// keeps exactly one of their results.
#[derive(Debug)]
pub struct FrequencyCache {
    rows: udim,
    inv_freqs: Vec<f32>,
    table: OnceLock<Tensor<Vec<f32>>>,
}

impl FrequencyCache {
    /// A cache over positions `0..rows`; nothing is built yet.
    pub fn new(inv_freqs: Vec<f32>, rows: udim) -> Self {
        Self {
            rows,
            inv_freqs,
            table: OnceLock::new(),
        }
    }

    /// Number of cached positions.
    #[inline]
    pub const fn rows(&self) -> udim {
        self.rows
    }

    /// The inverse frequencies, one per pair.
    #[inline]
    pub fn inv_freqs(&self) -> &[f32] {
        &self.inv_freqs
    }

    /// Whether the table has been built.
    #[inline]
    pub fn is_built(&self) -> bool {
        self.table.get().is_some()
    }

    /// Base layout `[rows, head_dim / 2, 2]`, `(cos, sin)` in the last axis.
    pub fn freqs_cis(&self) -> Tensor<&[f32]> {
        self.table
            .get_or_init(|| build_table(&self.inv_freqs, self.rows))
            .as_ref()
    }

    /// Flattened layout `[rows, head_dim]`: the same values with the pair axis merged.
    ///
    /// Reshape back with [`Tensor::split_last`] before taking pairs apart.
    pub fn freqs_cis_flat(&self) -> Tensor<&[f32]> {
        self.freqs_cis().flatten_last2()
    }
}

/// `(cos, sin)` of the outer product of positions `0..rows` with `inv_freqs`.
pub fn build_table(inv_freqs: &[f32], rows: udim) -> Tensor<Vec<f32>> {
    let half_dim = inv_freqs.len();
    debug!(target: "rope", "build frequency table: {rows} positions x {half_dim} pairs");

    let mut data = Vec::with_capacity(rows as usize * half_dim * 2);
    for pos in 0..rows {
        let pos = pos as f64;
        for &f in inv_freqs {
            let (sin, cos) = (pos * f as f64).sin_cos();
            data.push(cos as f32);
            data.push(sin as f32);
        }
    }
    Tensor::new(DataType::F32, &[rows, half_dim as udim, 2], data)
}

#[test]
fn test_lazy() {
    let cache = FrequencyCache::new(crate::freqs::inv_freqs(8, 1e4), 8);
    assert!(!cache.is_built());
    assert_eq!(cache.rows(), 8);

    let table = cache.freqs_cis();
    assert_eq!(table.shape(), &[8, 4, 2]);
    assert!(cache.is_built());

    // the second access reads the same storage
    let again = cache.freqs_cis();
    assert_eq!(table.physical().as_ptr(), again.physical().as_ptr());
}

#[test]
fn test_values() {
    let inv_freqs = crate::freqs::inv_freqs(8, 1e4);
    let table = build_table(&inv_freqs, 3);
    let data = table.physical();
    // position 0 is the identity
    for pair in data[..8].chunks_exact(2) {
        assert_eq!(pair, [1., 0.]);
    }
    // position 2, pair 1
    let angle = 2. * inv_freqs[1];
    assert!((data[2 * 8 + 2] - angle.cos()).abs() < 1e-6);
    assert!((data[2 * 8 + 3] - angle.sin()).abs() < 1e-6);
}

#[test]
fn test_flat() {
    let cache = FrequencyCache::new(crate::freqs::inv_freqs(16, 1e4), 6);
    let base = cache.freqs_cis();
    let flat = cache.freqs_cis_flat();
    assert_eq!(flat.shape(), &[6, 16]);
    assert_eq!(flat.physical(), base.physical());
    assert_eq!(flat.split_last(2).shape(), base.shape());
}

#[test]
fn test_concurrent_first_access() {
    let cache = FrequencyCache::new(crate::freqs::inv_freqs(64, 5e5), 256);
    let tables = std::thread::scope(|s| {
        let handles = (0..4)
            .map(|_| s.spawn(|| cache.freqs_cis().physical().to_vec()))
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect::<Vec<_>>()
    });
    for table in &tables[1..] {
        assert_eq!(table, &tables[0]);
    }
    assert_eq!(tables[0], cache.freqs_cis().physical().to_vec());
}
