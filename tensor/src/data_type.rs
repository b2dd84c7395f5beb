use serde::{
    de::{Unexpected, Visitor},
    Deserialize, Deserializer, Serialize, Serializer,
};
use std::fmt;

macro_rules! data_types {
    ($($variant:ident: $size:literal, $name:literal;)+) => {
        /// 张量元素类型，序列化为 pytorch 类型名；
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
        #[repr(u8)]
        pub enum DataType {
            $($variant,)+
        }

        impl DataType {
            /// 单个元素的字节数；
            #[inline]
            pub const fn size(&self) -> usize {
                match self {
                    $(Self::$variant => $size,)+
                }
            }

            /// pytorch 类型名；
            pub const fn name(&self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }

            fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

data_types! {
    Bool: 1, "bool";
    I8:   1, "int8";
    I16:  2, "int16";
    I32:  4, "int32";
    I64:  8, "int64";
    U8:   1, "uint8";
    U16:  2, "uint16";
    U32:  4, "uint32";
    U64:  8, "uint64";
    F16:  2, "float16";
    BF16: 2, "bfloat16";
    F32:  4, "float32";
    F64:  8, "float64";
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for DataType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for DataType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(NameVisitor)
    }
}

struct NameVisitor;

impl<'de> Visitor<'de> for NameVisitor {
    type Value = DataType;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a pytorch dtype name such as \"bfloat16\"")
    }

    fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
        DataType::from_name(v).ok_or_else(|| E::invalid_value(Unexpected::Str(v), &self))
    }
}

#[test]
fn test_serde() {
    let dt: DataType = serde_json::from_str("\"bfloat16\"").unwrap();
    assert_eq!(dt, DataType::BF16);
    assert_eq!(serde_json::to_string(&DataType::F64).unwrap(), "\"float64\"");
    assert_eq!(serde_json::from_str::<DataType>("\"int32\"").unwrap(), DataType::I32);
    assert!(serde_json::from_str::<DataType>("\"int4\"").is_err());
}

#[test]
fn test_size() {
    assert_eq!(DataType::BF16.size(), 2);
    assert_eq!(DataType::F64.size(), 8);
    assert_eq!(DataType::U16.to_string(), "uint16");
}
