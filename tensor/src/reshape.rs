use crate::{udim, Tensor};

impl<Physical> Tensor<Physical> {
    /// 合并最后两维；
    pub fn flatten_last2(self) -> Self {
        let n = self.shape.len();
        assert!(n >= 2);
        let mut shape = self.shape.clone();
        let last = shape.pop().unwrap();
        shape[n - 2] *= last;
        Self { shape, ..self }
    }

    /// 将最后一维拆分为 `[len / inner, inner]`；
    pub fn split_last(self, inner: udim) -> Self {
        let last = *self.shape.last().unwrap();
        assert_eq!(last % inner, 0);
        let mut shape = self.shape.clone();
        *shape.last_mut().unwrap() = last / inner;
        shape.push(inner);
        Self { shape, ..self }
    }
}

#[test]
fn test_pairs() {
    use crate::DataType;
    let t = Tensor::new(DataType::F32, &[4, 3, 2], ());
    let t = t.flatten_last2();
    assert_eq!(t.shape(), &[4, 6]);
    let t = t.split_last(2);
    assert_eq!(t.shape(), &[4, 3, 2]);
}

#[test]
#[should_panic]
fn test_split_uneven() {
    use crate::DataType;
    Tensor::new(DataType::F32, &[4, 3], ()).split_last(2);
}
