use half::{bf16, f16};

/// 可以从 f32 转换而来的浮点类型；
pub trait BetweenF32: Sized {
    /// 将 f32 舍入到最接近的 Self；
    fn cast(f: f32) -> Self;
}

macro_rules! primitive {
    ($($ty:ty),+) => {
        $(
            impl BetweenF32 for $ty {
                #[inline]
                fn cast(f: f32) -> Self {
                    f as _
                }
            }
        )+
    };
}

macro_rules! half_float {
    ($($ty:ty),+) => {
        $(
            impl BetweenF32 for $ty {
                #[inline]
                fn cast(f: f32) -> Self {
                    <$ty>::from_f32(f)
                }
            }
        )+
    };
}

primitive!(f32, f64);
half_float!(f16, bf16);

#[test]
fn test_round_trip() {
    assert_eq!(f16::cast(1.5).to_f32(), 1.5);
    assert_eq!(bf16::cast(-2.).to_f32(), -2.);
    assert_eq!(f64::cast(0.25), 0.25);
    assert_eq!(f32::cast(3.), 3.);
    // bf16 keeps 8 significant bits
    assert_eq!(bf16::cast(1. + 1. / 512.).to_f32(), 1.);
}
