//! Policies that fill a freshly allocated parameter.
//!
//! Only the policies the layer needs as defaults live here: [`Constant`] for biases,
//! [`XavierUniform`] for weights, and a plain [`Uniform`].

use super::tensor::{Shape, Tensor, TensorError};

pub trait Initializer: std::fmt::Debug + Send + Sync {
    /// Fill the storage of `tensor` in place.
    fn fill(&self, tensor: &Tensor) -> Result<(), TensorError>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Constant {
    pub value: f64,
}

impl Constant {
    pub fn new(value: f64) -> Self {
        Self { value }
    }
}

impl Initializer for Constant {
    fn fill(&self, tensor: &Tensor) -> Result<(), TensorError> {
        let value = self.value;
        tensor.fill_with(|_| value);
        Ok(())
    }
}

/// Samples from `[low, high)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Uniform {
    pub low: f64,
    pub high: f64,
    pub seed: Option<u64>,
}

impl Default for Uniform {
    fn default() -> Self {
        Self {
            low: -1.0,
            high: 1.0,
            seed: None,
        }
    }
}

impl Uniform {
    pub fn new(low: f64, high: f64) -> Self {
        Self {
            low,
            high,
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

impl Initializer for Uniform {
    fn fill(&self, tensor: &Tensor) -> Result<(), TensorError> {
        let mut rng = rng(self.seed);
        let Self { low, high, .. } = *self;
        tensor.fill_with(|_| low + (high - low) * rng.f64());
        Ok(())
    }
}

/// Uniform in `[-limit, limit)` with `limit = sqrt(6 / (fan_in + fan_out))`.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct XavierUniform {
    pub seed: Option<u64>,
}

impl XavierUniform {
    pub fn with_seed(seed: u64) -> Self {
        let seed = Some(seed);
        Self { seed }
    }
}

impl Initializer for XavierUniform {
    fn fill(&self, tensor: &Tensor) -> Result<(), TensorError> {
        let (fan_in, fan_out) = fans(&tensor.shape());
        let limit = (6.0 / (fan_in + fan_out).max(1) as f64).sqrt();
        Uniform {
            low: -limit,
            high: limit,
            seed: self.seed,
        }
        .fill(tensor)
    }
}

fn rng(seed: Option<u64>) -> fastrand::Rng {
    match seed {
        Some(seed) => fastrand::Rng::with_seed(seed),
        None => fastrand::Rng::new(),
    }
}

/// Computes `(fan_in, fan_out)` of a weight shape.
fn fans(shape: &Shape) -> (usize, usize) {
    match shape.len() {
        0 => (1, 1),
        1 => (shape[0], shape[0]),
        2 => (shape[0], shape[1]),
        _ => {
            let receptive: usize = shape[2..].iter().product();
            (shape[1] * receptive, shape[0] * receptive)
        }
    }
}
