use std::sync::{Arc, RwLock};

use derive_more::{Deref, Display, From, Into};
use itertools::Itertools;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::num::{DataType, Scalar, dispatch};

#[derive(Debug, Error)]
pub enum TensorError {
    #[error("tensor type error: data type {0} mismatches {1}")]
    Type(DataType, DataType),
    #[error("tensor creation error: shape {0}'s size not match data len {1}")]
    Create(Shape, usize),
    #[error("tensor shape error: shape {0} not match shape {1}")]
    Shape(Shape, Shape),
    #[error("unknown data type: {0}")]
    Parse(String),
}

/// Dimensions of a tensor, outermost first.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Deref, From, Into, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[display("[{}]", _0.iter().format(", "))]
pub struct Shape(Arc<[usize]>);

impl Shape {
    /// Number of elements.
    #[inline]
    pub fn size(&self) -> usize {
        self.iter().product()
    }

    /// Returns `true` if the shape has at least one dimension and no zero dimension.
    #[inline]
    pub fn is_positive(&self) -> bool {
        !self.is_empty() && self.iter().all(|&dim| dim > 0)
    }
}

impl From<Vec<usize>> for Shape {
    #[inline]
    fn from(value: Vec<usize>) -> Self {
        Self(value.into())
    }
}

impl From<&[usize]> for Shape {
    #[inline]
    fn from(value: &[usize]) -> Self {
        Self(value.into())
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    #[inline]
    fn from(value: [usize; N]) -> Self {
        Self(value.into())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorId;

/// A tensor handle: shape, data type, identity and storage.
///
/// Clones share both the storage and the identity, so writing through one clone is visible
/// through all of them. Storage is kept as raw bytes in native endianness.
#[derive(Clone)]
pub struct Tensor {
    shape: Shape,
    r#type: DataType,
    id: uid::Id<TensorId>,
    data: Arc<RwLock<Box<[u8]>>>,
}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("type", &self.r#type)
            .field("id", &self.id)
            .finish()
    }
}

impl PartialEq for Tensor {
    fn eq(&self, other: &Self) -> bool {
        if self.shape != other.shape || self.r#type != other.r#type {
            return false;
        }
        if Arc::ptr_eq(&self.data, &other.data) {
            return true;
        }
        *self.data.read().expect("failed to lock") == *other.data.read().expect("failed to lock")
    }
}

impl Tensor {
    #[inline]
    fn from_parts(shape: Shape, r#type: DataType, data: Box<[u8]>) -> Self {
        let id = uid::Id::new();
        let data = Arc::new(RwLock::new(data));
        Self {
            shape,
            r#type,
            id,
            data,
        }
    }

    /// Create a tensor of zeros.
    #[inline]
    pub fn zeros(shape: impl Into<Shape>, r#type: DataType) -> Self {
        let shape = shape.into();
        let data = vec![0u8; shape.size() * r#type.size()].into_boxed_slice();
        Self::from_parts(shape, r#type, data)
    }

    /// Create a tensor of zeros with the same shape and type, but a fresh storage.
    #[inline]
    pub fn zeros_like(&self) -> Self {
        Self::zeros(self.shape(), self.r#type)
    }

    /// Create a new tensor with the given shape and contents.
    pub fn create<T, C>(shape: impl Into<Shape>, contents: C) -> Result<Self, TensorError>
    where
        T: Scalar,
        C: Into<Arc<[T]>>,
    {
        let shape = shape.into();
        let contents: Arc<[T]> = contents.into();
        if shape.size() != contents.len() {
            return Err(TensorError::Create(shape, contents.len()));
        }
        let data: Box<[u8]> = bytemuck::cast_slice::<T, u8>(&contents[..]).into();
        Ok(Self::from_parts(shape, T::DATA_TYPE, data))
    }

    /// Create a tensor from raw native-endian bytes.
    pub fn from_bytes(
        shape: impl Into<Shape>,
        r#type: DataType,
        bytes: &[u8],
    ) -> Result<Self, TensorError> {
        let shape = shape.into();
        if shape.size() * r#type.size() != bytes.len() {
            return Err(TensorError::Create(shape, bytes.len() / r#type.size()));
        }
        Ok(Self::from_parts(shape, r#type, bytes.into()))
    }

    #[inline]
    pub fn shape(&self) -> Shape {
        self.shape.clone()
    }

    #[inline]
    pub fn data_type(&self) -> DataType {
        self.r#type
    }

    #[inline]
    pub fn data_count(&self) -> usize {
        self.shape.size()
    }

    #[inline]
    pub fn data_size(&self) -> usize {
        self.shape.size() * self.r#type.size()
    }

    #[inline]
    pub fn id(&self) -> uid::Id<TensorId> {
        self.id
    }

    /// Number of handles sharing this tensor's storage.
    #[inline]
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.data)
    }

    /// Returns `true` if both handles point to the same storage.
    #[inline]
    pub fn shares_storage(&self, other: &Tensor) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    #[inline]
    fn check_type(&self, r#type: DataType) -> Result<(), TensorError> {
        match self.r#type == r#type {
            true => Ok(()),
            false => Err(TensorError::Type(self.r#type, r#type)),
        }
    }

    #[inline]
    fn check_shape(&self, shape: &Shape) -> Result<(), TensorError> {
        match &self.shape == shape {
            true => Ok(()),
            false => Err(TensorError::Shape(self.shape(), shape.clone())),
        }
    }

    /// Read back the contents. Returns error if the type mismatches.
    pub fn read<T: Scalar>(&self) -> Result<Box<[T]>, TensorError> {
        self.check_type(T::DATA_TYPE)?;
        let data = self.data.read().expect("failed to lock");
        Ok(bytemuck::pod_collect_to_vec::<u8, T>(&data).into_boxed_slice())
    }

    /// Read back the contents as raw bytes.
    pub fn to_bytes(&self) -> Box<[u8]> {
        self.data.read().expect("failed to lock").clone()
    }

    /// Read back the contents converted to `f64`, whatever the data type.
    pub fn to_f64(&self) -> Box<[f64]> {
        let data = self.data.read().expect("failed to lock");
        dispatch!(self.r#type, |T| bytemuck::pod_collect_to_vec::<u8, T>(&data)
            .into_iter()
            .map(Scalar::to_f64)
            .collect())
    }

    /// Overwrite the contents in place. Type and element count must match.
    pub fn write<T: Scalar>(&self, contents: &[T]) -> Result<(), TensorError> {
        self.check_type(T::DATA_TYPE)?;
        if contents.len() != self.data_count() {
            return Err(TensorError::Create(self.shape(), contents.len()));
        }
        let data: Box<[u8]> = bytemuck::cast_slice::<T, u8>(contents).into();
        *self.data.write().expect("failed to lock") = data;
        Ok(())
    }

    /// Overwrite every element with `f(index)` converted to the tensor's data type.
    pub fn fill_with(&self, mut f: impl FnMut(usize) -> f64) {
        let count = self.data_count();
        let data: Box<[u8]> = dispatch!(self.r#type, |T| {
            let contents = (0..count).map(|index| T::from_f64(f(index))).collect_vec();
            bytemuck::cast_slice::<T, u8>(&contents).into()
        });
        *self.data.write().expect("failed to lock") = data;
    }

    /// Replace the contents in place with those of `source`.
    /// Shape and data type must match; the identity of `self` is kept.
    pub fn assign(&self, source: &Tensor) -> Result<(), TensorError> {
        self.check_shape(&source.shape)?;
        self.check_type(source.r#type)?;
        if self.shares_storage(source) {
            return Ok(());
        }
        let data = source.to_bytes();
        *self.data.write().expect("failed to lock") = data;
        Ok(())
    }
}
