use std::sync::Arc;

use derive_more::Deref;

use super::{Category, Layer, LayerError, registry::validate, unique};
use crate::loom::{
    init::{Constant, Initializer, XavierUniform},
    num::DataType,
    tensor::{Shape, Tensor},
};

/// A trainable tensor owned by a layer. Always part of the state dict.
///
/// Dereferences to its [`Tensor`]; clones share storage.
#[derive(Debug, Clone, Deref)]
pub struct Param {
    #[deref]
    tensor: Tensor,
    name: String,
    trainable: bool,
    learning_rate: f32,
}

impl Param {
    /// Create a free-standing zero-filled parameter.
    pub fn new(shape: impl Into<Shape>, r#type: DataType) -> Self {
        Self::from_tensor(Tensor::zeros(shape, r#type))
    }

    /// Promote a tensor to a parameter. The tensor's storage is shared, not copied.
    pub fn from_tensor(tensor: Tensor) -> Self {
        Self {
            tensor,
            name: unique::generate("param"),
            trainable: true,
            learning_rate: 1.0,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// The parameter's own unique name, independent of where it is registered.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn tensor(&self) -> &Tensor {
        &self.tensor
    }

    #[inline]
    pub fn into_tensor(self) -> Tensor {
        self.tensor
    }

    #[inline]
    pub fn trainable(&self) -> bool {
        self.trainable
    }

    #[inline]
    pub fn set_trainable(&mut self, trainable: bool) {
        self.trainable = trainable;
    }

    #[inline]
    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }
}

/// Creation options of a parameter.
#[derive(Debug, Clone)]
pub struct ParamAttr {
    /// Explicit unique name. Generated from the layer's full name if unset.
    pub name: Option<String>,
    /// Falls back to zeros for biases and Xavier-uniform for weights if unset.
    pub initializer: Option<Arc<dyn Initializer>>,
    pub learning_rate: f32,
    pub trainable: bool,
}

impl Default for ParamAttr {
    fn default() -> Self {
        Self {
            name: None,
            initializer: None,
            learning_rate: 1.0,
            trainable: true,
        }
    }
}

impl ParamAttr {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_initializer(mut self, initializer: impl Initializer + 'static) -> Self {
        self.initializer = Some(Arc::new(initializer));
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_trainable(mut self, trainable: bool) -> Self {
        self.trainable = trainable;
        self
    }
}

impl Layer {
    /// Allocate a parameter, fill it with the initializer of `attr` and register it as
    /// `name`.
    ///
    /// `shape` must have at least one dimension, all positive. `r#type` defaults to the
    /// layer's data type. Fails if `name` is malformed. A name bound in another category is
    /// moved over to the parameters, as with [`Layer::assign`].
    pub fn create_parameter(
        &mut self,
        name: &str,
        shape: impl Into<Shape>,
        r#type: Option<DataType>,
        attr: &ParamAttr,
        is_bias: bool,
    ) -> Result<Param, LayerError> {
        validate(name, Category::Parameter)?;
        let shape = shape.into();
        if !shape.is_positive() {
            return Err(LayerError::InvalidShape(shape));
        }

        let tensor = Tensor::zeros(shape, r#type.unwrap_or(self.r#type));
        match &attr.initializer {
            Some(initializer) => initializer.fill(&tensor)?,
            None if is_bias => Constant::default().fill(&tensor)?,
            None => XavierUniform::default().fill(&tensor)?,
        }

        let unique_name = match &attr.name {
            Some(name) => name.clone(),
            None => {
                let suffix = if is_bias { "b" } else { "w" };
                unique::generate(&format!("{}.{suffix}", self.full_name))
            }
        };
        let param = Param {
            tensor,
            name: unique_name,
            trainable: attr.trainable,
            learning_rate: attr.learning_rate,
        };
        log::debug!(
            "create parameter {name} ({}) of shape {} in {}",
            param.name,
            param.shape(),
            self.full_name
        );

        self.assign(name, param.clone())?;
        Ok(param)
    }
}
