use crate::{udim, DataType, Element};
use smallvec::SmallVec;
use std::ops::Deref;

/// 行主序连续存储的张量；
#[derive(Clone, Debug)]
pub struct Tensor<Physical> {
    pub(crate) data_type: DataType,
    pub(crate) shape: Shape,
    pub(crate) physical: Physical,
}

pub type Shape = SmallVec<[udim; 4]>;

impl<Physical> Tensor<Physical> {
    #[inline]
    pub fn new(data_type: DataType, shape: &[udim], physical: Physical) -> Self {
        Self {
            data_type,
            shape: Shape::from_slice(shape),
            physical,
        }
    }

    #[inline]
    pub const fn data_type(&self) -> DataType {
        self.data_type
    }

    #[inline]
    pub fn shape(&self) -> &[udim] {
        &self.shape
    }

    /// 元素数量；
    #[inline]
    pub fn size(&self) -> usize {
        self.shape.iter().map(|&d| d as usize).product()
    }

    #[inline]
    pub fn bytes_size(&self) -> usize {
        self.size() * self.data_type.size()
    }

    #[inline]
    pub const fn physical(&self) -> &Physical {
        &self.physical
    }

    #[inline]
    pub fn take_physical(self) -> Physical {
        self.physical
    }
}

impl<T, Physical: Deref<Target = [T]>> Tensor<Physical> {
    #[inline]
    pub fn as_ref(&self) -> Tensor<&[T]> {
        Tensor {
            data_type: self.data_type,
            shape: self.shape.clone(),
            physical: self.physical.deref(),
        }
    }
}

impl Tensor<Vec<u8>> {
    /// 将 `data` 编码为形状为 `shape` 的字节张量；
    pub fn from_slice<T: Element>(shape: &[udim], data: &[T]) -> Self {
        let mut ans = Self::new(T::DATA_TYPE, shape, Vec::new());
        assert_eq!(ans.size(), data.len());
        let size = T::DATA_TYPE.size();
        ans.physical = vec![0; data.len() * size];
        for (bytes, &x) in ans.physical.chunks_exact_mut(size).zip(data) {
            x.write_le(bytes);
        }
        ans
    }
}

impl<Physical: Deref<Target = [u8]>> Tensor<Physical> {
    /// 解码全部元素，类型或长度不符时返回 `None`；
    pub fn to_vec<T: Element>(&self) -> Option<Vec<T>> {
        if self.data_type != T::DATA_TYPE || self.physical.len() != self.bytes_size() {
            return None;
        }
        Some(
            self.physical
                .chunks_exact(self.data_type.size())
                .map(T::read_le)
                .collect(),
        )
    }
}

#[test]
fn test_from_slice() {
    let t = Tensor::from_slice(&[2, 3], &[1f32, 2., 3., 4., 5., 6.]);
    assert_eq!(t.data_type(), DataType::F32);
    assert_eq!(t.shape(), &[2, 3]);
    assert_eq!(t.size(), 6);
    assert_eq!(t.bytes_size(), 24);
    assert_eq!(t.physical().len(), 24);
    assert_eq!(t.to_vec::<f32>().unwrap(), [1., 2., 3., 4., 5., 6.]);
    assert!(t.to_vec::<f64>().is_none());
}

#[test]
fn test_half() {
    use half::bf16;
    let data = [bf16::from_f32(1.), bf16::from_f32(-3.)];
    let t = Tensor::from_slice(&[2], &data);
    assert_eq!(t.data_type(), DataType::BF16);
    assert_eq!(t.to_vec::<bf16>().unwrap(), data);
}
