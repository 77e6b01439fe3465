use itertools::Itertools;

use super::{
    num::{Scalar, dispatch},
    tensor::{Tensor, TensorError},
};

impl Tensor {
    /// # Element-wise Addition (`try_add`)
    /// Performs element-wise addition between two tensors.
    ///
    /// ## Arguments
    /// * `self` - The first tensor operand
    /// * `rhs` - The second tensor operand, must have the same shape and type as `self`
    ///
    /// ## Returns
    /// * `Result<Tensor, TensorError>` - A new tensor containing the element-wise sum,
    ///   or an error if shapes or types don't match
    pub fn try_add(&self, rhs: &Tensor) -> Result<Tensor, TensorError> {
        if self.shape() != rhs.shape() {
            return Err(TensorError::Shape(self.shape(), rhs.shape()));
        }
        if self.data_type() != rhs.data_type() {
            return Err(TensorError::Type(self.data_type(), rhs.data_type()));
        }
        dispatch!(self.data_type(), |T| {
            let x = self.read::<T>()?;
            let y = rhs.read::<T>()?;
            let z = x
                .iter()
                .zip_eq(y.iter())
                .map(|(&x, &y)| T::from_f64(x.to_f64() + y.to_f64()))
                .collect_vec();
            Tensor::create::<T, _>(self.shape(), z)
        })
    }
}

impl std::ops::Add<&Tensor> for &Tensor {
    type Output = Tensor;

    fn add(self, rhs: &Tensor) -> Self::Output {
        self.try_add(rhs).expect("tensor shapes must match")
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use crate::loom::{num::DataType, tensor::Tensor};

    #[test]
    fn test_add() -> Result<(), Box<dyn Error>> {
        let a = Tensor::create([2, 2], vec![0.1f32; 4])?;
        let b = Tensor::create([2, 2], vec![0.1f32; 4])?;
        let c = &a + &b;
        assert_eq!(c.data_type(), DataType::F32);
        assert!(c.to_f64().iter().all(|x| (x - 0.2).abs() < 1e-6));
        assert_ne!(c.id(), a.id());

        let d = Tensor::zeros([4], DataType::F32);
        assert!(a.try_add(&d).is_err());
        let e = Tensor::zeros([2, 2], DataType::I32);
        assert!(a.try_add(&e).is_err());
        Ok(())
    }
}
