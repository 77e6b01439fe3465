use std::str::FromStr;

use bytemuck::Pod;
use derive_more::Display;
use half::f16;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::tensor::TensorError;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DataType {
    #[display("float16")]
    F16,
    #[default]
    #[display("float32")]
    F32,
    #[display("float64")]
    F64,
    #[display("uint8")]
    U8,
    #[display("uint16")]
    U16,
    #[display("uint32")]
    U32,
    #[display("int32")]
    I32,
    #[display("int64")]
    I64,
}

impl DataType {
    /// Size of one element in bytes.
    pub const fn size(self) -> usize {
        match self {
            DataType::F16 => 2,
            DataType::F32 => 4,
            DataType::F64 => 8,
            DataType::U8 => 1,
            DataType::U16 => 2,
            DataType::U32 => 4,
            DataType::I32 => 4,
            DataType::I64 => 8,
        }
    }

    pub const fn is_float(self) -> bool {
        matches!(self, DataType::F16 | DataType::F32 | DataType::F64)
    }
}

impl FromStr for DataType {
    type Err = TensorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "float16" => Ok(Self::F16),
            "float32" => Ok(Self::F32),
            "float64" => Ok(Self::F64),
            "uint8" => Ok(Self::U8),
            "uint16" => Ok(Self::U16),
            "uint32" => Ok(Self::U32),
            "int32" => Ok(Self::I32),
            "int64" => Ok(Self::I64),
            _ => Err(TensorError::Parse(s.into())),
        }
    }
}

pub trait Scalar: Sized + Pod + Send + Sync + sealed::Sealed {
    const DATA_TYPE: DataType;

    fn from_f64(value: f64) -> Self;
    fn to_f64(self) -> f64;
}

macro_rules! impl_scalar {
    ($ty:ty, $data_type:ident) => {
        impl Scalar for $ty {
            const DATA_TYPE: DataType = DataType::$data_type;

            #[inline]
            fn from_f64(value: f64) -> Self {
                value as $ty
            }

            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }
        }
    };
}

impl_scalar!(f32, F32);
impl_scalar!(f64, F64);
impl_scalar!(u8, U8);
impl_scalar!(u16, U16);
impl_scalar!(u32, U32);
impl_scalar!(i32, I32);
impl_scalar!(i64, I64);

impl Scalar for f16 {
    const DATA_TYPE: DataType = DataType::F16;

    #[inline]
    fn from_f64(value: f64) -> Self {
        f16::from_f64(value)
    }

    #[inline]
    fn to_f64(self) -> f64 {
        f16::to_f64(self)
    }
}

/// Binds the scalar type matching a run-time [`DataType`] to `$t` and evaluates `$body`.
macro_rules! dispatch {
    ($type:expr, |$t:ident| $body:expr) => {
        match $type {
            $crate::loom::num::DataType::F16 => {
                type $t = ::half::f16;
                $body
            }
            $crate::loom::num::DataType::F32 => {
                type $t = f32;
                $body
            }
            $crate::loom::num::DataType::F64 => {
                type $t = f64;
                $body
            }
            $crate::loom::num::DataType::U8 => {
                type $t = u8;
                $body
            }
            $crate::loom::num::DataType::U16 => {
                type $t = u16;
                $body
            }
            $crate::loom::num::DataType::U32 => {
                type $t = u32;
                $body
            }
            $crate::loom::num::DataType::I32 => {
                type $t = i32;
                $body
            }
            $crate::loom::num::DataType::I64 => {
                type $t = i64;
                $body
            }
        }
    };
}

pub(crate) use dispatch;

mod sealed {
    use half::f16;

    pub trait Sealed {}

    impl Sealed for f16 {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
    impl Sealed for u8 {}
    impl Sealed for u16 {}
    impl Sealed for u32 {}
    impl Sealed for i32 {}
    impl Sealed for i64 {}
}
