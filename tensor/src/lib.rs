mod data_type;
mod element;
mod reshape;
mod slice;
mod tensor;

#[allow(non_camel_case_types)]
pub type udim = u32;

pub use data_type::DataType;
pub use element::Element;
pub use tensor::{Shape, Tensor};
