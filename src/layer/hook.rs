use std::{borrow::Cow, sync::Arc};

use derive_more::Display;

use super::Layer;
use crate::loom::tensor::Tensor;

/// Runs before `forward`. Returning `Some` replaces the inputs.
pub type ForwardPreHook = dyn Fn(&Layer, &[Tensor]) -> Option<Vec<Tensor>> + Send + Sync;
/// Runs after `forward` with the inputs and outputs. Returning `Some` replaces the outputs.
pub type ForwardPostHook =
    dyn Fn(&Layer, &[Tensor], &[Tensor]) -> Option<Vec<Tensor>> + Send + Sync;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId;

/// Identifies a registered hook; pass it to [`Layer::remove_hook`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub struct HookHandle(uid::Id<HookId>);

#[derive(Default, Clone)]
pub(super) struct Hooks {
    pre: Vec<(HookHandle, Arc<ForwardPreHook>)>,
    post: Vec<(HookHandle, Arc<ForwardPostHook>)>,
}

impl Layer {
    pub fn register_forward_pre_hook<F>(&mut self, hook: F) -> HookHandle
    where
        F: Fn(&Layer, &[Tensor]) -> Option<Vec<Tensor>> + Send + Sync + 'static,
    {
        let handle = HookHandle(uid::Id::new());
        self.hooks.pre.push((handle, Arc::new(hook)));
        handle
    }

    pub fn register_forward_post_hook<F>(&mut self, hook: F) -> HookHandle
    where
        F: Fn(&Layer, &[Tensor], &[Tensor]) -> Option<Vec<Tensor>> + Send + Sync + 'static,
    {
        let handle = HookHandle(uid::Id::new());
        self.hooks.post.push((handle, Arc::new(hook)));
        handle
    }

    /// Removes a hook. Returns `false` if it was not registered on this layer.
    pub fn remove_hook(&mut self, handle: HookHandle) -> bool {
        let Hooks { pre, post } = &mut self.hooks;
        let len = pre.len() + post.len();
        pre.retain(|(x, _)| *x != handle);
        post.retain(|(x, _)| *x != handle);
        pre.len() + post.len() < len
    }

    pub(super) fn run_pre_hooks<'a>(&self, inputs: &'a [Tensor]) -> Cow<'a, [Tensor]> {
        let mut inputs = Cow::Borrowed(inputs);
        for (_, hook) in &self.hooks.pre {
            if let Some(replaced) = hook(self, &inputs) {
                inputs = Cow::Owned(replaced);
            }
        }
        inputs
    }

    pub(super) fn run_post_hooks(
        &self,
        inputs: &[Tensor],
        mut outputs: Vec<Tensor>,
    ) -> Vec<Tensor> {
        for (_, hook) in &self.hooks.post {
            if let Some(replaced) = hook(self, inputs, &outputs) {
                outputs = replaced;
            }
        }
        outputs
    }
}
