//! The `layer` module provides [`Layer`], the container underlying every eager-mode network.
//!
//! A layer tracks four categories of named entries:
//! 1. **Parameters**: trainable tensors ([`Param`]), always part of the state dict.
//! 2. **Buffers**: non-trainable tensors, each with a `persistable` flag deciding whether it
//!    shows up in the state dict.
//! 3. **Sublayers**: owned child modules, forming a tree.
//! 4. **Plain attributes**: any other value, stored without tracking.
//!
//! Every store iterates in registration order, and a name is bound in at most one store.
//! Values enter through a single dispatch point, [`Layer::assign`], which resolves the
//! category from the value and from what the name currently holds. Traversals qualify names
//! by joining the path through the sublayer tree with [`SEPARATOR`].
//!
//! User networks embed a `Layer`, derive [`AsLayer`] and implement [`Module::forward`]:
//!
//! ```
//! use dygraph::{
//!     AsLayer,
//!     layer::{Layer, LayerError, Module, ParamAttr},
//!     loom::{init::Constant, tensor::Tensor},
//! };
//!
//! #[derive(AsLayer)]
//! struct Affine {
//!     #[layer]
//!     layer: Layer,
//! }
//!
//! impl Affine {
//!     fn new() -> Result<Self, LayerError> {
//!         let mut layer = Layer::of::<Self>();
//!         let attr = ParamAttr::default().with_initializer(Constant::new(0.5));
//!         layer.create_parameter("bias", [2], None, &attr, true)?;
//!         Ok(Self { layer })
//!     }
//! }
//!
//! impl Module for Affine {
//!     fn forward(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>, LayerError> {
//!         let bias = self.layer.parameter("bias").expect("registered in new");
//!         Ok(vec![inputs[0].try_add(bias)?])
//!     }
//! }
//!
//! let affine = Affine::new()?;
//! let x = Tensor::create([2], vec![1.0f32, 2.0])?;
//! let y = affine.call(&[x])?;
//! assert_eq!(&y[0].read::<f32>()?[..], &[1.5, 2.5]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::any::Any;

use derive_more::Display;
use itertools::Itertools;
use thiserror::Error;

use crate::loom::{
    num::DataType,
    tensor::{Shape, Tensor, TensorError},
};

pub use hook::{ForwardPostHook, ForwardPreHook, HookHandle};
pub use map::NamedMap;
pub use param::{Param, ParamAttr};
pub use state::{LoadReport, StateDict};
pub use walk::Walk;

mod hook;
pub mod map;
mod param;
mod registry;
mod state;
pub mod unique;
mod walk;

/// Joins the segments of a qualified name.
pub const SEPARATOR: char = '.';

/// Coarse classification of [`LayerError`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ErrorKind {
    /// A value of the wrong category was supplied.
    Type,
    /// A name is malformed or already taken.
    Key,
    /// A name is not bound.
    Attribute,
    /// A value is well-typed but unusable.
    Value,
    NotImplemented,
}

#[derive(Debug, Error)]
pub enum LayerError {
    #[error("name of {0} can not be empty")]
    EmptyName(Category),
    #[error("name of {0} can not contain \".\", but received \"{1}\"")]
    InvalidName(Category, String),
    #[error("attribute \"{0}\" already exists")]
    Exists(String),
    #[error("layer has no attribute \"{0}\"")]
    NotFound(String),
    #[error("{0} should be a {1}, but received {2}")]
    Type(Category, ValueKind, ValueKind),
    #[error("parameter shape {0} must be non-empty with positive dimensions")]
    InvalidShape(Shape),
    #[error("failed to load \"{key}\": {source}")]
    Load { key: String, source: TensorError },
    #[error("forward is not implemented for layer \"{0}\"")]
    NotImplemented(String),
    #[error(transparent)]
    Tensor(#[from] TensorError),
}

impl LayerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LayerError::Type(..) => ErrorKind::Type,
            LayerError::EmptyName(_) | LayerError::InvalidName(..) | LayerError::Exists(_) => {
                ErrorKind::Key
            }
            LayerError::NotFound(_) => ErrorKind::Attribute,
            LayerError::InvalidShape(_) | LayerError::Load { .. } | LayerError::Tensor(_) => {
                ErrorKind::Value
            }
            LayerError::NotImplemented(_) => ErrorKind::NotImplemented,
        }
    }
}

/// The store a name is being registered into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Category {
    #[display("parameter")]
    Parameter,
    #[display("buffer")]
    Buffer,
    #[display("sublayer")]
    Sublayer,
    #[display("attribute")]
    Attribute,
}

/// Run-time category of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ValueKind {
    #[display("none")]
    None,
    #[display("tensor")]
    Tensor,
    #[display("parameter")]
    Param,
    #[display("layer")]
    Layer,
    #[display("plain attribute")]
    Attr,
}

/// A value that can be assigned to a layer attribute.
pub enum Value {
    /// The null value. Vacates non-persistable buffer slots.
    None,
    /// A plain tensor; becomes a buffer.
    Tensor(Tensor),
    Param(Param),
    Layer(Box<dyn Module>),
    /// Anything else, stored untracked.
    Attr(Box<dyn Any + Send + Sync>),
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Tensor(tensor) => f.debug_tuple("Tensor").field(tensor).finish(),
            Value::Param(param) => f.debug_tuple("Param").field(param).finish(),
            Value::Layer(layer) => f.debug_tuple("Layer").field(layer.layer()).finish(),
            Value::Attr(_) => write!(f, "Attr(..)"),
        }
    }
}

impl Value {
    #[inline]
    pub fn layer(module: impl Module) -> Self {
        Self::Layer(Box::new(module))
    }

    #[inline]
    pub fn attr(value: impl Any + Send + Sync) -> Self {
        Self::Attr(Box::new(value))
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::None => ValueKind::None,
            Value::Tensor(_) => ValueKind::Tensor,
            Value::Param(_) => ValueKind::Param,
            Value::Layer(_) => ValueKind::Layer,
            Value::Attr(_) => ValueKind::Attr,
        }
    }
}

impl From<Tensor> for Value {
    fn from(value: Tensor) -> Self {
        Self::Tensor(value)
    }
}

impl From<Param> for Value {
    fn from(value: Param) -> Self {
        Self::Param(value)
    }
}

impl From<Layer> for Value {
    fn from(value: Layer) -> Self {
        Self::layer(value)
    }
}

impl From<Box<dyn Module>> for Value {
    fn from(value: Box<dyn Module>) -> Self {
        Self::Layer(value)
    }
}

/// A borrowed view of whatever a name is bound to.
#[derive(Clone, Copy)]
pub enum AttrRef<'a> {
    /// A vacated buffer slot or a plain attribute set to none.
    None,
    Buffer(&'a Tensor),
    Param(&'a Param),
    Layer(&'a dyn Module),
    Attr(&'a (dyn Any + Send + Sync)),
}

impl AttrRef<'_> {
    pub fn kind(&self) -> ValueKind {
        match self {
            AttrRef::None => ValueKind::None,
            AttrRef::Buffer(_) => ValueKind::Tensor,
            AttrRef::Param(_) => ValueKind::Param,
            AttrRef::Layer(_) => ValueKind::Layer,
            AttrRef::Attr(_) => ValueKind::Attr,
        }
    }
}

/// Accessors every module provides. Derive it with `#[derive(AsLayer)]`.
pub trait AsLayer: Any + Send + Sync {
    fn layer(&self) -> &Layer;
    fn layer_mut(&mut self) -> &mut Layer;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// A runnable layer.
pub trait Module: AsLayer {
    /// Runs the layer's own logic using its parameters, buffers and sublayers.
    fn forward(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>, LayerError>;

    /// Runs forward pre-hooks, [`Module::forward`], then forward post-hooks.
    #[cfg_attr(
        feature = "trace",
        tracing::instrument(skip_all, fields(layer = %self.layer().full_name()))
    )]
    fn call(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>, LayerError> {
        let layer = self.layer();
        let inputs = layer.run_pre_hooks(inputs);
        let outputs = self.forward(&inputs)?;
        Ok(layer.run_post_hooks(&inputs, outputs))
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayerId;

/// A buffer slot. A vacated slot keeps its position and persistable flag.
#[derive(Debug, Clone)]
struct Buffer {
    tensor: Option<Tensor>,
    persistable: bool,
}

pub struct Layer {
    id: uid::Id<LayerId>,
    name_scope: String,
    full_name: String,
    r#type: DataType,
    training: bool,
    parameters: NamedMap<Param>,
    buffers: NamedMap<Buffer>,
    sublayers: NamedMap<Box<dyn Module>>,
    attrs: NamedMap<Option<Box<dyn Any + Send + Sync>>>,
    hooks: hook::Hooks,
}

impl Default for Layer {
    fn default() -> Self {
        Self::new("layer")
    }
}

impl std::fmt::Debug for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layer")
            .field("full_name", &self.full_name)
            .field("type", &self.r#type)
            .field("training", &self.training)
            .field("parameters", &self.parameters.keys().collect_vec())
            .field("buffers", &self.buffers.keys().collect_vec())
            .field("sublayers", &self.sublayers.keys().collect_vec())
            .field("attrs", &self.attrs.keys().collect_vec())
            .finish()
    }
}

impl std::fmt::Display for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.sublayers.is_empty() {
            return write!(f, "{}()", self.name_scope);
        }
        writeln!(f, "{}(", self.name_scope)?;
        for (name, sublayer) in self.sublayers.iter() {
            let child = sublayer.layer().to_string();
            writeln!(f, "  ({name}): {}", child.lines().join("\n  "))?;
        }
        write!(f, ")")
    }
}

impl AsLayer for Layer {
    #[inline]
    fn layer(&self) -> &Layer {
        self
    }

    #[inline]
    fn layer_mut(&mut self) -> &mut Layer {
        self
    }

    #[inline]
    fn as_any(&self) -> &dyn Any {
        self
    }

    #[inline]
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Module for Layer {
    fn forward(&self, _inputs: &[Tensor]) -> Result<Vec<Tensor>, LayerError> {
        Err(LayerError::NotImplemented(self.full_name.clone()))
    }
}

impl Layer {
    /// Create an empty layer. Its full name is `name_scope` suffixed with a unique counter.
    pub fn new(name_scope: impl Into<String>) -> Self {
        let name_scope = name_scope.into();
        let full_name = unique::generate(&name_scope);
        log::debug!("create layer {full_name}");
        Self {
            id: uid::Id::new(),
            name_scope,
            full_name,
            r#type: DataType::F32,
            training: true,
            parameters: Default::default(),
            buffers: Default::default(),
            sublayers: Default::default(),
            attrs: Default::default(),
            hooks: Default::default(),
        }
    }

    /// Create an empty layer whose name scope is derived from the type `M`.
    #[inline]
    pub fn of<M: ?Sized>() -> Self {
        Self::new(unique::type_scope::<M>())
    }

    /// Set the default data type of parameters created by this layer.
    #[inline]
    pub fn with_dtype(mut self, r#type: DataType) -> Self {
        self.r#type = r#type;
        self
    }

    #[inline]
    pub fn id(&self) -> uid::Id<LayerId> {
        self.id
    }

    #[inline]
    pub fn name_scope(&self) -> &str {
        &self.name_scope
    }

    #[inline]
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    #[inline]
    pub fn dtype(&self) -> DataType {
        self.r#type
    }

    #[inline]
    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Switch this layer and all of its descendants to training mode.
    pub fn train(&mut self) {
        self.set_training(true)
    }

    /// Switch this layer and all of its descendants to evaluation mode.
    pub fn eval(&mut self) {
        self.set_training(false)
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
        for sublayer in self.sublayers.values_mut() {
            sublayer.layer_mut().set_training(training);
        }
    }

    /// Look up `name` across parameters, buffers, sublayers and plain attributes.
    pub fn get(&self, name: &str) -> Option<AttrRef<'_>> {
        if let Some(param) = self.parameters.get(name) {
            return Some(AttrRef::Param(param));
        }
        if let Some(buffer) = self.buffers.get(name) {
            return Some(match &buffer.tensor {
                Some(tensor) => AttrRef::Buffer(tensor),
                None => AttrRef::None,
            });
        }
        if let Some(sublayer) = self.sublayers.get(name) {
            return Some(AttrRef::Layer(sublayer.as_ref()));
        }
        self.attrs.get(name).map(|attr| match attr {
            Some(attr) => AttrRef::Attr(attr.as_ref()),
            None => AttrRef::None,
        })
    }

    /// Returns `true` if `name` is bound in any category, including vacated buffer slots.
    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.parameters.contains_key(name)
            || self.buffers.contains_key(name)
            || self.sublayers.contains_key(name)
            || self.attrs.contains_key(name)
    }

    #[inline]
    pub fn parameter(&self, name: &str) -> Option<&Param> {
        self.parameters.get(name)
    }

    #[inline]
    pub fn buffer(&self, name: &str) -> Option<&Tensor> {
        self.buffers.get(name).and_then(|buffer| buffer.tensor.as_ref())
    }

    /// Returns the persistable flag of the buffer slot `name`, vacated or not.
    #[inline]
    pub fn is_persistable(&self, name: &str) -> Option<bool> {
        self.buffers.get(name).map(|buffer| buffer.persistable)
    }

    #[inline]
    pub fn sublayer(&self, name: &str) -> Option<&dyn Module> {
        self.sublayers.get(name).map(|sublayer| sublayer.as_ref())
    }

    #[inline]
    pub fn sublayer_mut(&mut self, name: &str) -> Option<&mut dyn Module> {
        match self.sublayers.get_mut(name) {
            Some(sublayer) => Some(sublayer.as_mut()),
            None => None,
        }
    }

    /// Returns the sublayer `name` if it is of type `M`.
    #[inline]
    pub fn sublayer_as<M: Module>(&self, name: &str) -> Option<&M> {
        self.sublayer(name)
            .and_then(|sublayer| sublayer.as_any().downcast_ref())
    }

    #[inline]
    pub fn sublayer_as_mut<M: Module>(&mut self, name: &str) -> Option<&mut M> {
        self.sublayer_mut(name)
            .and_then(|sublayer| sublayer.as_any_mut().downcast_mut())
    }

    /// Returns the plain attribute `name` if it holds a `T`.
    #[inline]
    pub fn attr<T: Any>(&self, name: &str) -> Option<&T> {
        self.attrs
            .get(name)
            .and_then(|attr| attr.as_ref())
            .and_then(|attr| attr.downcast_ref())
    }

    /// Every bound name: parameters, buffers, sublayers, then plain attributes.
    pub fn dir(&self) -> Vec<&str> {
        self.parameters
            .keys()
            .chain(self.buffers.keys())
            .chain(self.sublayers.keys())
            .chain(self.attrs.keys())
            .collect()
    }

    /// Calls the sublayer `name` with `inputs`.
    pub fn call_sublayer(&self, name: &str, inputs: &[Tensor]) -> Result<Vec<Tensor>, LayerError> {
        match self.sublayer(name) {
            Some(sublayer) => sublayer.call(inputs),
            None => Err(LayerError::NotFound(name.into())),
        }
    }
}
