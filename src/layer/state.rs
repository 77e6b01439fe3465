use derive_more::{Deref, DerefMut, From, Into};

use super::{Layer, LayerError, NamedMap, Walk};
use crate::loom::tensor::{Tensor, TensorError};

/// A flat snapshot of a layer tree: qualified names to tensors, in traversal order.
///
/// Entries taken from a layer share storage with it; use [`StateDict::detached`] for an
/// independent copy.
#[derive(Debug, Default, Clone, PartialEq, Deref, DerefMut, From, Into)]
pub struct StateDict(NamedMap<Tensor>);

impl StateDict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies every tensor into fresh storage.
    pub fn detached(&self) -> Result<Self, TensorError> {
        self.iter()
            .map(|(name, tensor)| {
                let bytes = tensor.to_bytes();
                let copy = Tensor::from_bytes(tensor.shape(), tensor.data_type(), &bytes)?;
                Ok((name, copy))
            })
            .collect()
    }
}

impl<K: Into<String>> FromIterator<(K, Tensor)> for StateDict {
    fn from_iter<I: IntoIterator<Item = (K, Tensor)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for StateDict {
    type Item = (String, Tensor);
    type IntoIter = std::vec::IntoIter<(String, Tensor)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Outcome of [`Layer::load_dict`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadReport {
    /// Keys whose tensors were overwritten.
    pub loaded: Vec<String>,
    /// Keys of the layer absent from the supplied dict; left untouched.
    pub missing: Vec<String>,
    /// Keys of the supplied dict that the layer does not have.
    pub unexpected: Vec<String>,
}

impl LoadReport {
    /// Returns `true` if the keys of the layer and of the dict matched exactly.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty()
    }
}

impl Layer {
    /// Parameters and filled persistable buffers of the whole tree, qualified by path.
    #[inline]
    pub fn state_dict(&self) -> StateDict {
        self.state_dict_with(&Walk::default())
    }

    /// Same as [`Layer::state_dict`] with traversal options. Unlike
    /// [`Layer::named_parameters_with`], a tensor registered under several names appears
    /// under each of them.
    #[cfg_attr(
        feature = "trace",
        tracing::instrument(skip_all, fields(layer = %self.full_name))
    )]
    pub fn state_dict_with(&self, walk: &Walk) -> StateDict {
        let mut dict = StateDict::new();
        for (prefix, layer) in self.walk_layers(walk) {
            for (name, param) in layer.parameters.iter() {
                dict.insert(walk.join(&prefix, name), param.tensor().clone());
            }
            for (name, buffer) in layer.buffers.iter() {
                match &buffer.tensor {
                    Some(tensor) if buffer.persistable => {
                        dict.insert(walk.join(&prefix, name), tensor.clone());
                    }
                    _ => {}
                }
            }
        }
        dict
    }

    /// Overwrites parameters and persistable buffers in place from `dict`.
    #[inline]
    pub fn load_dict(&mut self, dict: &StateDict) -> Result<LoadReport, LayerError> {
        self.load_dict_with(dict, &Walk::default())
    }

    /// Overwrites every entry of [`Layer::state_dict_with`] found in `dict` in place.
    ///
    /// Shapes and data types are checked for all entries before anything is written, so a
    /// mismatch leaves the layer unchanged. Keys missing from `dict` are skipped with a
    /// warning; extra keys are reported and ignored.
    #[cfg_attr(
        feature = "trace",
        tracing::instrument(skip_all, fields(layer = %self.full_name))
    )]
    pub fn load_dict_with(
        &mut self,
        dict: &StateDict,
        walk: &Walk,
    ) -> Result<LoadReport, LayerError> {
        let own = self.state_dict_with(walk);
        let mut report = LoadReport::default();
        let mut pairs = vec![];

        for (key, target) in own.iter() {
            let Some(source) = dict.get(key) else {
                log::warn!("{}: \"{key}\" is not found in the state dict", self.full_name);
                report.missing.push(key.to_owned());
                continue;
            };
            let error = if target.shape() != source.shape() {
                Some(TensorError::Shape(target.shape(), source.shape()))
            } else if target.data_type() != source.data_type() {
                Some(TensorError::Type(target.data_type(), source.data_type()))
            } else {
                None
            };
            if let Some(source) = error {
                let key = key.to_owned();
                return Err(LayerError::Load { key, source });
            }
            pairs.push((key, target, source));
        }

        for (key, target, source) in pairs {
            target.assign(source).map_err(|source| LayerError::Load {
                key: key.to_owned(),
                source,
            })?;
            report.loaded.push(key.to_owned());
        }

        report.unexpected = dict
            .keys()
            .filter(|key| !own.contains_key(key))
            .map(ToOwned::to_owned)
            .collect();
        log::debug!(
            "{}: loaded {} tensors, {} missing, {} unexpected",
            self.full_name,
            report.loaded.len(),
            report.missing.len(),
            report.unexpected.len()
        );
        Ok(report)
    }
}
