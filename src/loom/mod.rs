//! The `loom` module provides the tensor capability the layer container is built on.
//!
//! ## Key Components
//! 1. **Numerical System**:
//!    - Scalar types (`f16`, `f32`, `f64`, `u8`, ..., `i64`).
//!    - Data type tags (`DataType`) for run-time element representation.
//!
//! 2. **Tensor Handle**:
//!    - Shape, data type and identity, with storage shared between clones.
//!    - Typed read/write and in-place content replacement (`Tensor::assign`).
//!
//! 3. **Initializers**:
//!    - Policies that fill a freshly allocated parameter (`Initializer`).
//!
//! Tensor math beyond element-wise addition is out of scope here.

pub mod init;
pub mod num;
pub mod ops;
pub mod tensor;
