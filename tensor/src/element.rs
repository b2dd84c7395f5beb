use crate::DataType;
use common::BetweenF32;
use half::{bf16, f16};
use std::{
    mem::size_of,
    ops::{Add, Mul, Neg, Sub},
};

/// 张量可以存储的浮点类型及其小端编码；
pub trait Element:
    BetweenF32
    + Copy
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Neg<Output = Self>
    + Send
    + Sync
    + 'static
{
    const DATA_TYPE: DataType;

    /// 从恰好 `size_of::<Self>()` 个字节中解码；
    fn read_le(bytes: &[u8]) -> Self;

    /// 编码到恰好 `size_of::<Self>()` 个字节中；
    fn write_le(self, bytes: &mut [u8]);
}

macro_rules! element {
    ($ty:ty => $data_type:expr) => {
        impl Element for $ty {
            const DATA_TYPE: DataType = $data_type;

            #[inline]
            fn read_le(bytes: &[u8]) -> Self {
                let mut buf = [0u8; size_of::<$ty>()];
                buf.copy_from_slice(bytes);
                <$ty>::from_le_bytes(buf)
            }

            #[inline]
            fn write_le(self, bytes: &mut [u8]) {
                bytes.copy_from_slice(&self.to_le_bytes())
            }
        }
    };
}

element!(f16 => DataType::F16);
element!(bf16 => DataType::BF16);
element!(f32 => DataType::F32);
element!(f64 => DataType::F64);

#[test]
fn test_size_matches() {
    assert_eq!(f16::DATA_TYPE.size(), size_of::<f16>());
    assert_eq!(bf16::DATA_TYPE.size(), size_of::<bf16>());
    assert_eq!(f32::DATA_TYPE.size(), size_of::<f32>());
    assert_eq!(f64::DATA_TYPE.size(), size_of::<f64>());
}

#[test]
fn test_encoding() {
    let mut buf = [0u8; 4];
    1.5f32.write_le(&mut buf);
    assert_eq!(buf, 1.5f32.to_le_bytes());
    assert_eq!(f32::read_le(&buf), 1.5);

    let mut buf = [0u8; 2];
    f16::from_f32(-0.5).write_le(&mut buf);
    assert_eq!(f16::read_le(&buf).to_f32(), -0.5);
}
