//! Tape-based autograd engine
//!
//! Tensors are flat `f32` buffers; every op records a backward closure that
//! accumulates gradients into its inputs and then recurses. Shapes live with
//! the caller (the model tracks NHWC extents layer by layer), the same way
//! `matmul` takes explicit `m, k, n`.

mod backward;
mod context;
mod conv;
mod norm;
mod ops;
mod tensor;

#[cfg(test)]
mod tests;

pub use backward::BackwardOp;
pub use context::Context;
pub use conv::{conv2d, conv2d_infer, max_pool2d, max_pool2d_infer, Conv2dShape, PoolShape};
pub use norm::{batch_norm, batch_norm_infer, dropout, BatchStats};
pub use ops::*;
pub use tensor::{GradCell, Tensor};

use crate::{Error, Result};
use ndarray::{Array1, Array2, ArrayView2};

/// Perform backward pass on a tensor
pub fn backward(tensor: &mut Tensor, grad_output: Option<Array1<f32>>) {
    if let Some(grad) = grad_output {
        tensor.set_grad(grad);
    } else {
        // Seed with ones for a scalar loss
        let ones = Array1::ones(tensor.data().len());
        tensor.set_grad(ones);
    }

    if let Some(op) = tensor.backward_op() {
        op.backward();
    }
}

/// View a flat buffer as a row-major `rows x cols` matrix.
pub(crate) fn as_matrix(data: &Array1<f32>, rows: usize, cols: usize) -> Result<ArrayView2<'_, f32>> {
    data.view()
        .into_shape_with_order((rows, cols))
        .map_err(|_| Error::ShapeMismatch {
            expected: vec![rows, cols],
            got: vec![data.len()],
        })
}

/// Flatten a matrix back into a row-major buffer.
pub(crate) fn flatten(matrix: Array2<f32>) -> Array1<f32> {
    matrix.iter().copied().collect()
}
