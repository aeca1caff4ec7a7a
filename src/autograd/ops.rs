//! Element-wise, dense and softmax operations with backward passes

use super::tensor::GradCell;
use super::{as_matrix, flatten, BackwardOp, Tensor};
use crate::Result;
use ndarray::{Array1, Array2, Axis};
use std::rc::Rc;

/// Add two tensors
#[cfg(test)]
pub fn add(a: &Tensor, b: &Tensor) -> Tensor {
    let data = a.data() + b.data();
    let requires_grad = a.requires_grad() || b.requires_grad();

    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(AddBackward {
            a: a.clone(),
            b: b.clone(),
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

#[cfg(test)]
struct AddBackward {
    a: Tensor,
    b: Tensor,
    result_grad: GradCell,
}

#[cfg(test)]
impl BackwardOp for AddBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                self.a.accumulate_grad(grad.clone());
            }
            if self.b.requires_grad() {
                self.b.accumulate_grad(grad.clone());
            }

            self.a.propagate();
            self.b.propagate();
        }
    }
}

/// Scale tensor by a scalar
#[cfg(test)]
pub fn scale(a: &Tensor, factor: f32) -> Tensor {
    let data = a.data() * factor;
    let requires_grad = a.requires_grad();

    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(ScaleBackward {
            a: a.clone(),
            factor,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

#[cfg(test)]
struct ScaleBackward {
    a: Tensor,
    factor: f32,
    result_grad: GradCell,
}

#[cfg(test)]
impl BackwardOp for ScaleBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                // ∂L/∂a = ∂L/∂out * factor
                self.a.accumulate_grad(grad * self.factor);
            }
            self.a.propagate();
        }
    }
}

/// ReLU activation
pub fn relu(a: &Tensor) -> Tensor {
    let data = relu_infer(a.data());
    let requires_grad = a.requires_grad();

    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(ReluBackward {
            a: a.clone(),
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

/// ReLU without gradient tracking
pub fn relu_infer(x: &Array1<f32>) -> Array1<f32> {
    x.mapv(|v| v.max(0.0))
}

struct ReluBackward {
    a: Tensor,
    result_grad: GradCell,
}

impl BackwardOp for ReluBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                // ∂L/∂a = ∂L/∂out * (a > 0)
                let mask = self.a.data().mapv(|x| if x > 0.0 { 1.0 } else { 0.0 });
                self.a.accumulate_grad(grad * &mask);
            }
            self.a.propagate();
        }
    }
}

/// Sum all elements into a scalar tensor
pub fn sum(a: &Tensor) -> Tensor {
    let total = a.data().sum();
    let requires_grad = a.requires_grad();
    let mut result = Tensor::from_vec(vec![total], requires_grad);

    if requires_grad {
        let backward_op = Rc::new(SumBackward {
            a: a.clone(),
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct SumBackward {
    a: Tensor,
    result_grad: GradCell,
}

impl BackwardOp for SumBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                // Broadcast the scalar gradient to every input element
                self.a
                    .accumulate_grad(Array1::from_elem(self.a.len(), grad[0]));
            }
            self.a.propagate();
        }
    }
}

/// Fully connected projection `y = x · W + b`
///
/// `x` is `(batch, in_features)`, `weight` is `(in_features, out_features)`
/// and `bias` has `out_features` entries, all row-major.
pub fn linear(
    x: &Tensor,
    weight: &Tensor,
    bias: &Tensor,
    batch: usize,
    in_features: usize,
    out_features: usize,
) -> Result<Tensor> {
    let data = linear_infer(
        x.data(),
        weight.data(),
        bias.data(),
        batch,
        in_features,
        out_features,
    )?;
    let requires_grad = x.requires_grad() || weight.requires_grad() || bias.requires_grad();
    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(LinearBackward {
            x: x.clone(),
            weight: weight.clone(),
            bias: bias.clone(),
            batch,
            in_features,
            out_features,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    Ok(result)
}

/// Dense projection without gradient tracking
pub fn linear_infer(
    x: &Array1<f32>,
    weight: &Array1<f32>,
    bias: &Array1<f32>,
    batch: usize,
    in_features: usize,
    out_features: usize,
) -> Result<Array1<f32>> {
    if bias.len() != out_features {
        return Err(crate::Error::ShapeMismatch {
            expected: vec![out_features],
            got: vec![bias.len()],
        });
    }
    let x = as_matrix(x, batch, in_features)?;
    let w = as_matrix(weight, in_features, out_features)?;
    let mut out: Array2<f32> = x.dot(&w);
    out += bias;
    Ok(flatten(out))
}

struct LinearBackward {
    x: Tensor,
    weight: Tensor,
    bias: Tensor,
    batch: usize,
    in_features: usize,
    out_features: usize,
    result_grad: GradCell,
}

impl BackwardOp for LinearBackward {
    fn backward(&self) {
        if let Some(grad_output) = self.result_grad.borrow().as_ref() {
            let (Ok(g), Ok(x), Ok(w)) = (
                as_matrix(grad_output, self.batch, self.out_features),
                as_matrix(self.x.data(), self.batch, self.in_features),
                as_matrix(self.weight.data(), self.in_features, self.out_features),
            ) else {
                return;
            };

            // ∂L/∂W = xᵀ · g, ∂L/∂b = Σ_rows g, ∂L/∂x = g · Wᵀ
            if self.weight.requires_grad() {
                self.weight.accumulate_grad(flatten(x.t().dot(&g)));
            }
            if self.bias.requires_grad() {
                self.bias.accumulate_grad(g.sum_axis(Axis(0)));
            }
            if self.x.requires_grad() {
                self.x.accumulate_grad(flatten(g.dot(&w.t())));
            }

            self.x.propagate();
            self.weight.propagate();
            self.bias.propagate();
        }
    }
}

/// Row-wise softmax over a `(rows, cols)` matrix
pub fn softmax_rows(a: &Tensor, cols: usize) -> Result<Tensor> {
    let rows = if cols == 0 { 0 } else { a.len() / cols };
    let data = softmax_rows_infer(a.data(), rows, cols)?;
    let requires_grad = a.requires_grad();
    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(SoftmaxBackward {
            a: a.clone(),
            output: result.data().clone(),
            rows,
            cols,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    Ok(result)
}

/// Numerically stable row-wise softmax without gradient tracking
pub fn softmax_rows_infer(x: &Array1<f32>, rows: usize, cols: usize) -> Result<Array1<f32>> {
    let logits = as_matrix(x, rows, cols)?;
    let mut out = logits.to_owned();
    for mut row in out.rows_mut() {
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        row.mapv_inplace(|v| (v - max).exp());
        let total = row.sum();
        row /= total;
    }
    Ok(flatten(out))
}

struct SoftmaxBackward {
    a: Tensor,
    output: Array1<f32>,
    rows: usize,
    cols: usize,
    result_grad: GradCell,
}

impl BackwardOp for SoftmaxBackward {
    fn backward(&self) {
        if let Some(grad_output) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                let (Ok(y), Ok(g)) = (
                    as_matrix(&self.output, self.rows, self.cols),
                    as_matrix(grad_output, self.rows, self.cols),
                ) else {
                    return;
                };
                // Per row: ∂L/∂x = y ⊙ (∂L/∂y - (y · ∂L/∂y))
                let mut grad_a = Array2::<f32>::zeros((self.rows, self.cols));
                for ((mut out, y_row), g_row) in
                    grad_a.rows_mut().into_iter().zip(y.rows()).zip(g.rows())
                {
                    let dot = (&y_row * &g_row).sum();
                    out.assign(&(&y_row * &(&g_row - dot)));
                }
                self.a.accumulate_grad(flatten(grad_a));
            }
            self.a.propagate();
        }
    }
}
