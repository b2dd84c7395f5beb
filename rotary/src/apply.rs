//! Applies a cosine/sine table to activations.

use crate::{Error, Layout, Result};
use common::{slice, upos};
use half::{bf16, f16};
use itertools::iproduct;
use std::ops::Deref;
use tensor::{udim, DataType, Element, Tensor};

/// Rotation sense.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Direction {
    Forward,
    Inverse,
}

/// Sequence axis of an activation: `rank - 3`, leaving `[.., seq_len, n_heads, head_dim]`.
pub(crate) fn seq_axis(shape: &[udim]) -> Result<usize> {
    shape.len().checked_sub(3).ok_or_else(|| Error::ShapeMismatch {
        reason: format!("activation must have at least 3 axes, got {shape:?}"),
    })
}

/// Rotates `x` by the window `[start_pos, start_pos + seq_len)` of `freqs`.
///
/// - x:     `[(batch,) seq_len, n_heads, head_dim]`, any of F16, BF16, F32, F64
/// - freqs: `[rows, head_dim / 2, 2]`, or the flattened `[rows, head_dim]`
///
/// `seq_len` defaults to the sequence axis of `x` and must agree with it when given.
/// The result is a new tensor with the shape and data type of `x`.
pub fn rotate<P: Deref<Target = [u8]>>(
    x: &Tensor<P>,
    freqs: Tensor<&[f32]>,
    layout: Layout,
    start_pos: upos,
    seq_len: Option<udim>,
) -> Result<Tensor<Vec<u8>>> {
    rotate_with(x, freqs, layout, start_pos, seq_len, Direction::Forward)
}

pub(crate) fn rotate_with<P: Deref<Target = [u8]>>(
    x: &Tensor<P>,
    freqs: Tensor<&[f32]>,
    layout: Layout,
    start_pos: upos,
    seq_len: Option<udim>,
    direction: Direction,
) -> Result<Tensor<Vec<u8>>> {
    let shape = x.shape();
    let axis = seq_axis(shape)?;
    let (seq, nh, dh) = (shape[axis], shape[axis + 1], shape[axis + 2]);
    if let Some(len) = seq_len.filter(|&len| len != seq) {
        return Err(Error::ShapeMismatch {
            reason: format!("seq_len {len} disagrees with the activation's {seq} positions"),
        });
    }

    let rows = freqs.shape().first().copied().unwrap_or(0);
    let window = freqs
        .narrow(start_pos, seq)
        .ok_or(Error::OutOfRange {
            start: start_pos as _,
            len: seq as _,
            rows: rows as _,
        })?;
    // a flattened table goes back to pairs
    let flat = matches!(window.shape(), [_, width] if width % 2 == 0);
    let window = if flat { window.split_last(2) } else { window };
    if dh == 0 || dh % 2 != 0 || window.shape() != [seq, dh / 2, 2] {
        return Err(Error::ShapeMismatch {
            reason: format!(
                "head_dim {dh} does not match a table of {:?}",
                &freqs.shape()[1..],
            ),
        });
    }

    let dims = Dims {
        batch: shape[..axis].iter().map(|&d| d as usize).product(),
        seq: seq as _,
        nh: nh as _,
        dh: dh as _,
    };
    let freqs = *window.physical();
    match x.data_type() {
        DataType::F16 => rotate_typed::<f16, _>(x, freqs, dims, layout, direction),
        DataType::BF16 => rotate_typed::<bf16, _>(x, freqs, dims, layout, direction),
        DataType::F32 => rotate_typed::<f32, _>(x, freqs, dims, layout, direction),
        DataType::F64 => rotate_typed::<f64, _>(x, freqs, dims, layout, direction),
        other => Err(Error::UnsupportedDataType(other)),
    }
}

#[derive(Clone, Copy)]
struct Dims {
    batch: usize,
    seq: usize,
    nh: usize,
    dh: usize,
}

fn rotate_typed<T: Element, P: Deref<Target = [u8]>>(
    x: &Tensor<P>,
    freqs: &[f32],
    dims: Dims,
    layout: Layout,
    direction: Direction,
) -> Result<Tensor<Vec<u8>>> {
    let mut data = x.to_vec::<T>().ok_or_else(|| Error::ShapeMismatch {
        reason: format!(
            "activation holds {} bytes, {:?} of {} needs {}",
            x.physical().len(),
            x.shape(),
            x.data_type(),
            x.bytes_size(),
        ),
    })?;

    let Dims { batch, seq, nh, dh } = dims;
    let half = dh / 2;
    let rows = data.chunks_exact_mut(dh);
    for (row, (_, s, _)) in rows.zip(iproduct!(0..batch, 0..seq, 0..nh)) {
        let cis = &slice!(freqs; dh; [s]);
        for (i, cis) in cis.chunks_exact(2).enumerate() {
            // cached in f32, cast at the point of use
            let cos = T::cast(cis[0]);
            let sin = match direction {
                Direction::Forward => T::cast(cis[1]),
                Direction::Inverse => -T::cast(cis[1]),
            };
            let (a, b) = layout.pair(half, i);
            let re = row[a];
            let im = row[b];
            row[a] = re * cos - im * sin;
            row[b] = re * sin + im * cos;
        }
    }
    Ok(Tensor::from_slice(x.shape(), &data))
}

#[cfg(test)]
fn table(head_dim: usize, rows: udim) -> Tensor<Vec<f32>> {
    crate::cache::build_table(&crate::freqs::inv_freqs(head_dim, 1e4), rows)
}

#[test]
fn test_position_zero_is_identity() {
    let freqs = table(8, 8);
    let x = Tensor::from_slice(&[1, 1, 1, 8], &[1f32; 8]);
    for layout in [Layout::SplitHalf, Layout::Interleaved] {
        let y = rotate(&x, freqs.as_ref(), layout, 0, None).unwrap();
        assert_eq!(y.shape(), x.shape());
        assert_eq!(y.data_type(), DataType::F32);
        assert_eq!(y.to_vec::<f32>().unwrap(), [1f32; 8]);
    }
}

#[test]
fn test_known_rotation() {
    // head_dim 2: a single pair rotating by exactly `pos` radians
    let freqs = table(2, 4);
    let x = Tensor::from_slice(&[1, 1, 2], &[1f32, 0.]);
    let y = rotate(&x, freqs.as_ref(), Layout::Interleaved, 3, None)
        .unwrap()
        .to_vec::<f32>()
        .unwrap();
    assert!((y[0] - 3f32.cos()).abs() < 1e-6);
    assert!((y[1] - 3f32.sin()).abs() < 1e-6);
}

#[test]
fn test_layouts_pair_differently() {
    let freqs = table(4, 4);
    let x = Tensor::from_slice(&[1, 1, 4], &[1f32, 2., 3., 4.]);
    let inter = rotate(&x, freqs.as_ref(), Layout::Interleaved, 1, None)
        .unwrap()
        .to_vec::<f32>()
        .unwrap();
    let split = rotate(&x, freqs.as_ref(), Layout::SplitHalf, 1, None)
        .unwrap()
        .to_vec::<f32>()
        .unwrap();

    let (s0, c0) = 1f32.sin_cos();
    let (s1, c1) = 0.01f32.sin_cos();
    // interleaved pairs: (1, 2), (3, 4)
    let expected = [
        1. * c0 - 2. * s0,
        1. * s0 + 2. * c0,
        3. * c1 - 4. * s1,
        3. * s1 + 4. * c1,
    ];
    for (a, e) in inter.iter().zip(expected) {
        assert!((a - e).abs() < 1e-5, "{inter:?} vs {expected:?}");
    }
    // split halves: (1, 3), (2, 4)
    let expected = [
        1. * c0 - 3. * s0,
        2. * c1 - 4. * s1,
        1. * s0 + 3. * c0,
        2. * s1 + 4. * c1,
    ];
    for (a, e) in split.iter().zip(expected) {
        assert!((a - e).abs() < 1e-5, "{split:?} vs {expected:?}");
    }
}

#[test]
fn test_flat_table() {
    let freqs = table(8, 6);
    let x = Tensor::from_slice(
        &[2, 3, 2, 8],
        &(0..96).map(|i| i as f32 / 10.).collect::<Vec<_>>(),
    );
    let base = rotate(&x, freqs.as_ref(), Layout::SplitHalf, 2, None).unwrap();
    let flat = rotate(
        &x,
        freqs.as_ref().flatten_last2(),
        Layout::SplitHalf,
        2,
        Some(3),
    )
    .unwrap();
    assert_eq!(base.physical(), flat.physical());
}

#[test]
fn test_inverse() {
    let freqs = table(8, 16);
    let data = (0..48).map(|i| (i as f32).sin()).collect::<Vec<_>>();
    let x = Tensor::from_slice(&[3, 2, 8], &data);
    let y = rotate_with(&x, freqs.as_ref(), Layout::Interleaved, 5, None, Direction::Forward)
        .unwrap();
    let z = rotate_with(&y, freqs.as_ref(), Layout::Interleaved, 5, None, Direction::Inverse)
        .unwrap();
    for (a, b) in z.to_vec::<f32>().unwrap().iter().zip(&data) {
        assert!((a - b).abs() < 1e-5);
    }
}

#[test]
fn test_half_precision() {
    let freqs = table(4, 4);
    let data = [1., 2., 3., 4.].map(f16::from_f32);
    let x = Tensor::from_slice(&[1, 1, 4], &data);
    let y = rotate(&x, freqs.as_ref(), Layout::SplitHalf, 1, None).unwrap();
    assert_eq!(y.data_type(), DataType::F16);
    let y = y.to_vec::<f16>().unwrap();
    let (s0, c0) = 1f32.sin_cos();
    assert!((y[0].to_f32() - (c0 - 3. * s0)).abs() < 1e-2);
    assert!((y[2].to_f32() - (s0 + 3. * c0)).abs() < 1e-2);

    let x = Tensor::from_slice(&[1, 1, 4], &data.map(|x| bf16::from_f32(x.to_f32())));
    let y = rotate(&x, freqs.as_ref(), Layout::SplitHalf, 0, None).unwrap();
    assert_eq!(y.data_type(), DataType::BF16);
    assert_eq!(y.physical(), x.physical());
}

#[test]
fn test_errors() {
    let freqs = table(8, 4);
    let x = Tensor::from_slice(&[1, 2, 1, 8], &[0f32; 16]);

    assert!(matches!(
        rotate(&x, freqs.as_ref(), Layout::SplitHalf, 3, None),
        Err(Error::OutOfRange { start: 3, len: 2, rows: 4 })
    ));
    assert!(rotate(&x, freqs.as_ref(), Layout::SplitHalf, 2, None).is_ok());
    assert!(matches!(
        rotate(&x, freqs.as_ref(), Layout::SplitHalf, 0, Some(3)),
        Err(Error::ShapeMismatch { .. })
    ));
    assert!(matches!(
        rotate(&x, freqs.as_ref(), Layout::SplitHalf, upos::MAX, None),
        Err(Error::OutOfRange { .. })
    ));

    let x = Tensor::from_slice(&[2, 6], &[0f32; 12]);
    assert!(matches!(
        rotate(&x, freqs.as_ref(), Layout::SplitHalf, 0, None),
        Err(Error::ShapeMismatch { .. })
    ));

    let x = Tensor::from_slice(&[1, 1, 6], &[0f32; 6]);
    assert!(matches!(
        rotate(&x, freqs.as_ref(), Layout::SplitHalf, 0, None),
        Err(Error::ShapeMismatch { .. })
    ));

    let x = Tensor::new(DataType::I32, &[1, 1, 8], vec![0u8; 32]);
    assert!(matches!(
        rotate(&x, freqs.as_ref(), Layout::SplitHalf, 0, None),
        Err(Error::UnsupportedDataType(DataType::I32))
    ));

    let x = Tensor::new(DataType::F32, &[1, 1, 8], vec![0u8; 31]);
    assert!(matches!(
        rotate(&x, freqs.as_ref(), Layout::SplitHalf, 0, None),
        Err(Error::ShapeMismatch { .. })
    ));
}
