//! Scalar aliases and numeric conversions shared by the workspace.

#![deny(missing_docs)]

mod between_f32;

pub use between_f32::BetweenF32;

/// `upos` for position id.
#[allow(non_camel_case_types)]
pub type upos = u32;

/// 从连续存储中取出宽度为 `$width` 的第 `$line` 行；
#[macro_export]
macro_rules! slice {
    ($blob:expr; $width:expr; [$line:expr]) => {
        $blob[$line * $width..][..$width]
    };
}

#[test]
fn test_slice() {
    let blob = [0, 1, 2, 3, 4, 5];
    assert_eq!(slice!(blob; 2; [1]), [2, 3]);
    assert_eq!(slice!(blob; 3; [1]), [3, 4, 5]);
}
