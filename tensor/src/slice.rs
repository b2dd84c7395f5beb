use crate::{udim, Tensor};
use std::ops::Deref;

impl<T, Physical: Deref<Target = [T]>> Tensor<Physical> {
    /// 借用最外维从 `start` 开始的 `len` 项，越界时返回 `None`；
    pub fn narrow(&self, start: udim, len: udim) -> Option<Tensor<&[T]>> {
        let (&outer, inner) = self.shape.split_first()?;
        if start.checked_add(len)? > outer {
            return None;
        }
        let line = inner.iter().map(|&d| d as usize).product::<usize>();
        let mut shape = self.shape.clone();
        shape[0] = len;
        Some(Tensor {
            data_type: self.data_type,
            shape,
            physical: self
                .physical
                .get(start as usize * line..)?
                .get(..len as usize * line)?,
        })
    }
}

#[test]
fn test_narrow() {
    use crate::DataType;
    let data = (0..12).map(|x| x as f32).collect::<Vec<_>>();
    let t = Tensor::new(DataType::F32, &[4, 3], data);

    let s = t.narrow(1, 2).unwrap();
    assert_eq!(s.shape(), &[2, 3]);
    assert_eq!(*s.physical(), &[3., 4., 5., 6., 7., 8.]);

    let s = t.narrow(4, 0).unwrap();
    assert_eq!(s.shape(), &[0, 3]);
    assert!(s.physical().is_empty());

    assert!(t.narrow(3, 2).is_none());
    assert!(t.narrow(udim::MAX, 2).is_none());
}
