//! Saving and loading [`StateDict`]s in the `safetensors` format.
//!
//! Safetensors sorts tensors in its header, so the insertion order of the dict is stored in
//! the header metadata under [`ORDER_KEY`] as a JSON array of names. Tensors it does not
//! list, or all of them in files written elsewhere, follow in name order. Tensor data is
//! little-endian on disk.

use std::{borrow::Cow, collections::HashMap, path::Path};

use itertools::Itertools;
use rustc_hash::FxHashSet as HashSet;
use safetensors::{Dtype, SafeTensorError, SafeTensors, View};
use thiserror::Error;

use crate::{
    layer::StateDict,
    loom::{
        num::DataType,
        tensor::{Shape, Tensor, TensorError},
    },
};

/// Metadata key holding the insertion order of the tensors.
pub const ORDER_KEY: &str = "order";

#[derive(Debug, Error)]
pub enum PersistError {
    #[error(transparent)]
    SafeTensor(#[from] SafeTensorError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Tensor(#[from] TensorError),
    #[error("unsupported safetensors data type: {0:?}")]
    Type(Dtype),
}

fn dtype(r#type: DataType) -> Dtype {
    match r#type {
        DataType::F16 => Dtype::F16,
        DataType::F32 => Dtype::F32,
        DataType::F64 => Dtype::F64,
        DataType::U8 => Dtype::U8,
        DataType::U16 => Dtype::U16,
        DataType::U32 => Dtype::U32,
        DataType::I32 => Dtype::I32,
        DataType::I64 => Dtype::I64,
    }
}

fn data_type(dtype: Dtype) -> Result<DataType, PersistError> {
    match dtype {
        Dtype::F16 => Ok(DataType::F16),
        Dtype::F32 => Ok(DataType::F32),
        Dtype::F64 => Ok(DataType::F64),
        Dtype::U8 => Ok(DataType::U8),
        Dtype::U16 => Ok(DataType::U16),
        Dtype::U32 => Ok(DataType::U32),
        Dtype::I32 => Ok(DataType::I32),
        Dtype::I64 => Ok(DataType::I64),
        dtype => Err(PersistError::Type(dtype)),
    }
}

/// Converts between native and little-endian element bytes. A no-op on little-endian hosts.
fn swap_endian(mut bytes: Box<[u8]>, r#type: DataType) -> Box<[u8]> {
    if cfg!(target_endian = "big") {
        bytes.chunks_exact_mut(r#type.size()).for_each(<[u8]>::reverse);
    }
    bytes
}

/// A tensor snapshot in the shape `safetensors` serializes.
struct Entry {
    dtype: Dtype,
    shape: Shape,
    bytes: Box<[u8]>,
}

impl View for &Entry {
    fn dtype(&self) -> Dtype {
        self.dtype
    }

    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn data(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(&self.bytes[..])
    }

    fn data_len(&self) -> usize {
        self.bytes.len()
    }
}

impl StateDict {
    /// Serialize into `safetensors` bytes, keeping the insertion order.
    pub fn to_safetensors(&self) -> Result<Vec<u8>, PersistError> {
        let entries = self
            .iter()
            .map(|(name, tensor)| {
                let entry = Entry {
                    dtype: dtype(tensor.data_type()),
                    shape: tensor.shape(),
                    bytes: swap_endian(tensor.to_bytes(), tensor.data_type()),
                };
                (name.to_owned(), entry)
            })
            .collect_vec();

        let order = serde_json::to_string(&self.keys().collect_vec())?;
        let metadata = Some(HashMap::from([(ORDER_KEY.to_owned(), order)]));
        let views = entries.iter().map(|(name, entry)| (name.as_str(), entry));
        let bytes = safetensors::serialize(views, &metadata)?;
        Ok(bytes)
    }

    /// Deserialize from `safetensors` bytes.
    pub fn from_safetensors(bytes: &[u8]) -> Result<Self, PersistError> {
        let (_, metadata) = SafeTensors::read_metadata(bytes)?;
        let order = metadata
            .metadata()
            .as_ref()
            .and_then(|metadata| metadata.get(ORDER_KEY));
        let tensors = SafeTensors::deserialize(bytes)?;
        let mut names: Vec<String> = match order {
            Some(order) => serde_json::from_str(order)?,
            None => vec![],
        };
        let rest = {
            let listed: HashSet<&str> = names.iter().map(String::as_str).collect();
            tensors
                .names()
                .into_iter()
                .filter(|name| !listed.contains(name.as_str()))
                .cloned()
                .sorted()
                .collect_vec()
        };
        names.extend(rest);

        let mut dict = StateDict::new();
        for name in names {
            let view = tensors.tensor(&name)?;
            let r#type = data_type(view.dtype())?;
            let bytes = swap_endian(view.data().into(), r#type);
            let tensor = Tensor::from_bytes(view.shape(), r#type, &bytes)?;
            dict.insert(name, tensor);
        }
        log::debug!("load {} tensors from safetensors", dict.len());
        Ok(dict)
    }

    /// Write the dict to a `safetensors` file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        let bytes = self.to_safetensors()?;
        std::fs::write(path.as_ref(), bytes)?;
        log::info!("save {} tensors to {}", self.len(), path.as_ref().display());
        Ok(())
    }

    /// Read a dict from a `safetensors` file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let bytes = std::fs::read(path.as_ref())?;
        Self::from_safetensors(&bytes)
    }
}
