use std::any::Any;

use super::{Buffer, Category, Layer, LayerError, Module, Param, SEPARATOR, Value, ValueKind};
use crate::loom::tensor::Tensor;

/// Checks that `name` can be registered: non-empty and free of the separator.
pub(super) fn validate(name: &str, category: Category) -> Result<(), LayerError> {
    if name.is_empty() {
        return Err(LayerError::EmptyName(category));
    }
    if name.contains(SEPARATOR) {
        return Err(LayerError::InvalidName(category, name.into()));
    }
    Ok(())
}

impl Value {
    fn category(&self) -> Category {
        match self {
            Value::Tensor(_) => Category::Buffer,
            Value::Param(_) => Category::Parameter,
            Value::Layer(_) => Category::Sublayer,
            Value::None | Value::Attr(_) => Category::Attribute,
        }
    }
}

impl Layer {
    /// The store currently holding `name`, if any.
    pub fn category(&self, name: &str) -> Option<Category> {
        if self.parameters.contains_key(name) {
            Some(Category::Parameter)
        } else if self.buffers.contains_key(name) {
            Some(Category::Buffer)
        } else if self.sublayers.contains_key(name) {
            Some(Category::Sublayer)
        } else if self.attrs.contains_key(name) {
            Some(Category::Attribute)
        } else {
            None
        }
    }

    /// Fails unless `name` is well-formed and either unbound or bound in `category`.
    pub(super) fn check_vacant(&self, name: &str, category: Category) -> Result<(), LayerError> {
        validate(name, category)?;
        match self.category(name) {
            Some(bound) if bound != category => Err(LayerError::Exists(name.into())),
            _ => Ok(()),
        }
    }

    /// A sublayer is moved in by value while `self` is mutably borrowed, so it can never hold
    /// `self` in its subtree. Checked in debug builds only.
    fn debug_assert_acyclic(&self, candidate: &Layer) {
        debug_assert!(
            candidate.sublayers(true).iter().all(|layer| layer.id != self.id),
            "layer \"{}\" can not be registered as a descendant of itself",
            candidate.full_name
        );
    }

    /// Removes `name` from whichever store holds it.
    fn forget(&mut self, name: &str) -> Option<Value> {
        if let Some(param) = self.parameters.remove(name) {
            return Some(Value::Param(param));
        }
        if let Some(buffer) = self.buffers.remove(name) {
            return Some(buffer.tensor.map_or(Value::None, Value::Tensor));
        }
        if let Some(sublayer) = self.sublayers.remove(name) {
            return Some(Value::Layer(sublayer));
        }
        self.attrs
            .remove(name)
            .map(|attr| attr.map_or(Value::None, Value::Attr))
    }

    /// Drops any registration of `name` outside of `category`.
    fn migrate(&mut self, name: &str, category: Category) {
        let Some(bound) = self.category(name) else {
            return;
        };
        if bound != category {
            self.forget(name);
            log::debug!(
                "{}: move \"{name}\" from {bound} to {category}",
                self.full_name
            );
        }
    }

    /// Binds `name` to `value`, resolving the category from the value and from what the name
    /// currently holds:
    /// 1. A tensor assigned to a buffer slot replaces the slot's tensor; the slot keeps its
    ///    position and persistable flag.
    /// 2. [`Value::None`] assigned to a non-persistable buffer vacates the slot.
    /// 3. A parameter is upserted into the parameters.
    /// 4. A layer is upserted into the sublayers.
    /// 5. A tensor under any other name becomes a non-persistable buffer.
    /// 6. Anything else is stored as a plain attribute.
    ///
    /// A stale registration of `name` in another store is removed first. Nothing is mutated
    /// if an error is returned.
    pub fn assign(&mut self, name: &str, value: impl Into<Value>) -> Result<(), LayerError> {
        let value = value.into();
        validate(name, value.category())?;
        if let Value::Layer(sublayer) = &value {
            self.debug_assert_acyclic(sublayer.layer());
        }

        let value = match (self.buffers.get_mut(name), value) {
            (Some(buffer), Value::Tensor(tensor)) => {
                buffer.tensor = Some(tensor);
                return Ok(());
            }
            (Some(buffer), Value::None) if !buffer.persistable => {
                buffer.tensor = None;
                return Ok(());
            }
            (_, value) => value,
        };

        let category = value.category();
        self.migrate(name, category);
        match value {
            Value::Param(param) => {
                self.parameters.insert(name, param);
            }
            Value::Layer(sublayer) => {
                self.sublayers.insert(name, sublayer);
            }
            Value::Tensor(tensor) => {
                let buffer = Buffer {
                    tensor: Some(tensor),
                    persistable: false,
                };
                self.buffers.insert(name, buffer);
            }
            Value::None => {
                self.attrs.insert(name, None);
            }
            Value::Attr(attr) => {
                self.attrs.insert(name, Some(attr));
            }
        }
        Ok(())
    }

    /// Removes `name` from whichever store holds it and returns its value.
    pub fn delete(&mut self, name: &str) -> Result<Value, LayerError> {
        let value = self
            .forget(name)
            .ok_or_else(|| LayerError::NotFound(name.into()))?;
        log::debug!("{}: delete \"{name}\"", self.full_name);
        Ok(value)
    }

    /// Registers a persistable buffer. See [`Layer::register_buffer_with`].
    ///
    /// Names are string slices, so other name types are rejected at compile time:
    /// ```compile_fail
    /// # use dygraph::{DataType, Layer, Tensor};
    /// let mut layer = Layer::default();
    /// layer.register_buffer(12, Tensor::zeros([1], DataType::F32));
    /// ```
    #[inline]
    pub fn register_buffer(
        &mut self,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<(), LayerError> {
        self.register_buffer_with(name, value, true)
    }

    /// Registers `value` as a buffer named `name`.
    ///
    /// `value` must be a tensor or [`Value::None`], which registers a vacated slot.
    /// Persistable buffers are part of the state dict. A non-persistable buffer slot is
    /// replaced in place, taking the new flag; any other existing binding of `name`,
    /// a persistable buffer included, is an error.
    pub fn register_buffer_with(
        &mut self,
        name: &str,
        value: impl Into<Value>,
        persistable: bool,
    ) -> Result<(), LayerError> {
        validate(name, Category::Buffer)?;
        let tensor = match value.into() {
            Value::Tensor(tensor) => Some(tensor),
            Value::None => None,
            value => {
                return Err(LayerError::Type(
                    Category::Buffer,
                    ValueKind::Tensor,
                    value.kind(),
                ));
            }
        };
        let buffer = Buffer {
            tensor,
            persistable,
        };
        match self.buffers.get_mut(name) {
            Some(slot) if slot.persistable => return Err(LayerError::Exists(name.into())),
            Some(slot) => *slot = buffer,
            None => {
                self.check_vacant(name, Category::Buffer)?;
                self.buffers.insert(name, buffer);
            }
        }
        log::debug!(
            "{}: register buffer \"{name}\" (persistable: {persistable})",
            self.full_name
        );
        Ok(())
    }

    /// Registers `param` as `name`. Fails if `name` is bound to anything but a parameter.
    pub fn add_parameter(&mut self, name: &str, param: Param) -> Result<(), LayerError> {
        self.check_vacant(name, Category::Parameter)?;
        log::debug!("{}: add parameter \"{name}\"", self.full_name);
        self.parameters.insert(name, param);
        Ok(())
    }

    /// Registers `sublayer` as `name`. Fails if `name` is bound to anything but a sublayer.
    pub fn add_sublayer(&mut self, name: &str, sublayer: impl Module) -> Result<(), LayerError> {
        self.check_vacant(name, Category::Sublayer)?;
        self.debug_assert_acyclic(sublayer.layer());
        log::debug!(
            "{}: add sublayer \"{name}\" ({})",
            self.full_name,
            sublayer.layer().full_name
        );
        self.sublayers.insert(name, Box::new(sublayer));
        Ok(())
    }

    #[inline]
    pub fn set_parameter(&mut self, name: &str, param: Param) -> Result<(), LayerError> {
        self.assign(name, param)
    }

    /// Assigns a tensor. Keeps the slot and flag if `name` is already a buffer, otherwise
    /// creates a non-persistable buffer. Use [`Layer::register_buffer`] for persistable ones.
    #[inline]
    pub fn set_buffer(&mut self, name: &str, tensor: Tensor) -> Result<(), LayerError> {
        self.assign(name, tensor)
    }

    #[inline]
    pub fn set_sublayer(&mut self, name: &str, sublayer: impl Module) -> Result<(), LayerError> {
        self.assign(name, Value::layer(sublayer))
    }

    /// Stores `value` untracked, even if it is a tensor.
    #[inline]
    pub fn set_attr(
        &mut self,
        name: &str,
        value: impl Any + Send + Sync,
    ) -> Result<(), LayerError> {
        self.assign(name, Value::attr(value))
    }
}
