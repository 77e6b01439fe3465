use rustc_hash::FxHashSet as HashSet;

use super::{Layer, Module, Param, SEPARATOR};
use crate::loom::tensor::Tensor;

/// Options of a traversal over the sublayer tree.
///
/// Traversals are pre-order and follow registration order: a layer's own entries come first,
/// then those of each sublayer, recursively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Walk {
    /// Prepended to every qualified name. No separator is emitted for an empty prefix.
    pub prefix: String,
    pub separator: char,
    /// Descend into sublayers.
    pub include_sublayers: bool,
    /// Yield the root itself from sublayer traversals.
    pub include_self: bool,
}

impl Default for Walk {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            separator: SEPARATOR,
            include_sublayers: true,
            include_self: false,
        }
    }
}

impl Walk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_separator(mut self, separator: char) -> Self {
        self.separator = separator;
        self
    }

    pub fn with_sublayers(mut self, include_sublayers: bool) -> Self {
        self.include_sublayers = include_sublayers;
        self
    }

    pub fn with_self(mut self, include_self: bool) -> Self {
        self.include_self = include_self;
        self
    }

    /// Qualifies `name` with `prefix`.
    pub fn join(&self, prefix: &str, name: &str) -> String {
        match prefix.is_empty() {
            true => name.to_owned(),
            false => format!("{prefix}{}{name}", self.separator),
        }
    }
}

impl Layer {
    /// This layer paired with the walk's prefix, followed by its descendants if the walk
    /// includes sublayers.
    pub(super) fn walk_layers(&self, walk: &Walk) -> Vec<(String, &Layer)> {
        let mut layers = vec![(walk.prefix.clone(), self)];
        if walk.include_sublayers {
            self.collect_sublayers(&walk.prefix, walk, &mut layers);
        }
        layers
    }

    fn collect_sublayers<'a>(
        &'a self,
        prefix: &str,
        walk: &Walk,
        output: &mut Vec<(String, &'a Layer)>,
    ) {
        for (name, sublayer) in self.sublayers.iter() {
            let layer = sublayer.layer();
            let prefix = walk.join(prefix, name);
            output.push((prefix.clone(), layer));
            if walk.include_sublayers {
                layer.collect_sublayers(&prefix, walk, output);
            }
        }
    }

    /// Direct sublayers in registration order.
    pub fn children(&self) -> Vec<&dyn Module> {
        self.sublayers
            .values()
            .map(|sublayer| sublayer.as_ref())
            .collect()
    }

    pub fn named_children(&self) -> Vec<(&str, &dyn Module)> {
        self.sublayers
            .iter()
            .map(|(name, sublayer)| (name, sublayer.as_ref()))
            .collect()
    }

    /// Every descendant in pre-order, optionally preceded by this layer.
    pub fn sublayers(&self, include_self: bool) -> Vec<&Layer> {
        let walk = Walk::new().with_self(include_self);
        self.named_sublayers_with(&walk)
            .into_iter()
            .map(|(_, layer)| layer)
            .collect()
    }

    pub fn named_sublayers(&self, prefix: &str, include_self: bool) -> Vec<(String, &Layer)> {
        let walk = Walk::new().with_prefix(prefix).with_self(include_self);
        self.named_sublayers_with(&walk)
    }

    pub fn named_sublayers_with(&self, walk: &Walk) -> Vec<(String, &Layer)> {
        let mut layers = vec![];
        if walk.include_self {
            layers.push((walk.prefix.clone(), self));
        }
        self.collect_sublayers(&walk.prefix, walk, &mut layers);
        layers
    }

    pub fn parameters(&self, include_sublayers: bool) -> Vec<&Param> {
        let walk = Walk::new().with_sublayers(include_sublayers);
        self.named_parameters_with(&walk)
            .into_iter()
            .map(|(_, param)| param)
            .collect()
    }

    pub fn named_parameters(&self, prefix: &str, include_sublayers: bool) -> Vec<(String, &Param)> {
        let walk = Walk::new()
            .with_prefix(prefix)
            .with_sublayers(include_sublayers);
        self.named_parameters_with(&walk)
    }

    /// Qualified parameters in pre-order. A parameter reachable under several names is
    /// yielded once, under the first.
    pub fn named_parameters_with(&self, walk: &Walk) -> Vec<(String, &Param)> {
        let mut seen = HashSet::default();
        let mut output = vec![];
        for (prefix, layer) in self.walk_layers(walk) {
            for (name, param) in layer.parameters.iter() {
                if seen.insert(param.id()) {
                    output.push((walk.join(&prefix, name), param));
                }
            }
        }
        output
    }

    /// Filled buffer slots, persistable or not.
    pub fn buffers(&self, include_sublayers: bool) -> Vec<&Tensor> {
        let walk = Walk::new().with_sublayers(include_sublayers);
        self.named_buffers_with(&walk)
            .into_iter()
            .map(|(_, tensor)| tensor)
            .collect()
    }

    pub fn named_buffers(&self, prefix: &str, include_sublayers: bool) -> Vec<(String, &Tensor)> {
        let walk = Walk::new()
            .with_prefix(prefix)
            .with_sublayers(include_sublayers);
        self.named_buffers_with(&walk)
    }

    /// Qualified buffers in pre-order, skipping vacated slots. Deduplicated like
    /// [`Layer::named_parameters_with`].
    pub fn named_buffers_with(&self, walk: &Walk) -> Vec<(String, &Tensor)> {
        let mut seen = HashSet::default();
        let mut output = vec![];
        for (prefix, layer) in self.walk_layers(walk) {
            for (name, buffer) in layer.buffers.iter() {
                let Some(tensor) = &buffer.tensor else {
                    continue;
                };
                if seen.insert(tensor.id()) {
                    output.push((walk.join(&prefix, name), tensor));
                }
            }
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use itertools::Itertools;

    use super::Walk;
    use crate::{
        layer::{Layer, Param},
        loom::{num::DataType, tensor::Tensor},
    };

    fn leaf(scope: &str) -> Result<Layer, Box<dyn Error>> {
        let mut layer = Layer::new(scope);
        layer.add_parameter("w", Param::new([2], DataType::F32))?;
        layer.register_buffer("running", Tensor::zeros([2], DataType::F32))?;
        Ok(layer)
    }

    fn tree() -> Result<Layer, Box<dyn Error>> {
        let mut block = leaf("block")?;
        block.add_sublayer("first", leaf("leaf")?)?;
        block.add_sublayer("second", leaf("leaf")?)?;

        let mut root = Layer::new("root");
        root.add_parameter("scale", Param::new([1], DataType::F32))?;
        root.add_sublayer("block", block)?;
        root.add_sublayer("head", leaf("head")?)?;
        Ok(root)
    }

    fn names<T>(entries: Vec<(String, T)>) -> Vec<String> {
        entries.into_iter().map(|(name, _)| name).collect()
    }

    #[test]
    fn test_named_parameters_pre_order() -> Result<(), Box<dyn Error>> {
        let root = tree()?;
        assert_eq!(
            names(root.named_parameters("", true)),
            [
                "scale",
                "block.w",
                "block.first.w",
                "block.second.w",
                "head.w"
            ]
        );
        assert_eq!(
            names(root.named_parameters("net", true))[..2],
            ["net.scale", "net.block.w"]
        );
        assert_eq!(names(root.named_parameters("net", false)), ["net.scale"]);
        assert_eq!(root.parameters(true).len(), 5);
        Ok(())
    }

    #[test]
    fn test_named_buffers_and_separator() -> Result<(), Box<dyn Error>> {
        let root = tree()?;
        let walk = Walk::new().with_prefix("root").with_separator('/');
        assert_eq!(
            names(root.named_buffers_with(&walk)),
            [
                "root/block/running",
                "root/block/first/running",
                "root/block/second/running",
                "root/head/running"
            ]
        );
        assert!(root.buffers(false).is_empty());
        Ok(())
    }

    #[test]
    fn test_sublayers() -> Result<(), Box<dyn Error>> {
        let root = tree()?;
        assert_eq!(
            names(root.named_sublayers("", false)),
            ["block", "block.first", "block.second", "head"]
        );
        let scopes = root
            .sublayers(true)
            .into_iter()
            .map(|layer| layer.name_scope())
            .collect_vec();
        assert_eq!(scopes, ["root", "block", "leaf", "leaf", "head"]);

        let walk = Walk::new().with_sublayers(false).with_self(true);
        assert_eq!(names(root.named_sublayers_with(&walk)), ["", "block", "head"]);

        let children = root
            .named_children()
            .into_iter()
            .map(|(name, _)| name)
            .collect_vec();
        assert_eq!(children, ["block", "head"]);
        assert_eq!(root.children().len(), 2);
        Ok(())
    }

    #[test]
    fn test_shared_tensor_yielded_once() -> Result<(), Box<dyn Error>> {
        let mut layer = Layer::default();
        let param = Param::new([2], DataType::F32);
        layer.add_parameter("a", param.clone())?;
        layer.add_parameter("b", param)?;
        assert_eq!(names(layer.named_parameters("", true)), ["a"]);

        let tensor = Tensor::zeros([1], DataType::F32);
        layer.register_buffer("x", tensor.clone())?;
        layer.register_buffer("y", tensor)?;
        assert_eq!(layer.buffers(true).len(), 1);
        Ok(())
    }
}
