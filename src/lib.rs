//! Eager-mode layer containers.
//!
//! A [`Layer`] owns named parameters, buffers, sublayers and plain attributes, keeps each in
//! registration order, and flattens the whole tree into a [`StateDict`] that can be loaded
//! back in place or persisted with [`persist`].
//!
//! ## Modules
//! - [`loom`]: the tensor handle, data types and initializers the container stores.
//! - [`layer`]: the container, its traversals and its state dict codec.
//! - [`persist`]: `safetensors` encoding of state dicts.

pub mod layer;
pub mod loom;
pub mod persist;

pub use dygraph_derive::AsLayer;
pub use layer::{AsLayer, Layer, LayerError, Module, Param, ParamAttr, StateDict, Value};
pub use loom::{
    num::DataType,
    tensor::{Shape, Tensor, TensorError},
};
