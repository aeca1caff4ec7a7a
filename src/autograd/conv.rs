//! 2-D convolution and max pooling over NHWC buffers
//!
//! Convolution lowers each batch to an im2col patch matrix and multiplies it by
//! the kernel viewed as `(k·k·in_channels, out_channels)`, which is the Keras
//! kernel layout `(kh, kw, in, out)` flattened. Padding is "same" for odd
//! kernels with stride 1.

use super::tensor::GradCell;
use super::{as_matrix, flatten, BackwardOp, Tensor};
use crate::{Error, Result};
use ndarray::{Array1, Array2, Axis};
use std::rc::Rc;

/// Extents of a stride-1, same-padded convolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conv2dShape {
    pub batch: usize,
    pub height: usize,
    pub width: usize,
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel: usize,
}

impl Conv2dShape {
    fn padding(&self) -> isize {
        (self.kernel / 2) as isize
    }

    /// One im2col row per output pixel
    fn rows(&self) -> usize {
        self.batch * self.height * self.width
    }

    fn patch_len(&self) -> usize {
        self.kernel * self.kernel * self.in_channels
    }

    pub fn input_len(&self) -> usize {
        self.rows() * self.in_channels
    }

    pub fn kernel_len(&self) -> usize {
        self.patch_len() * self.out_channels
    }

    pub fn output_len(&self) -> usize {
        self.rows() * self.out_channels
    }

    /// Visit every (patch row, patch column, input offset) triple that lands
    /// inside the image. Padded taps are skipped.
    fn for_each_tap(&self, mut f: impl FnMut(usize, usize, usize)) {
        let (h, w, k, c) = (
            self.height as isize,
            self.width as isize,
            self.kernel,
            self.in_channels,
        );
        let pad = self.padding();
        for b in 0..self.batch as isize {
            for y in 0..h {
                for x in 0..w {
                    let row = ((b * h + y) * w + x) as usize;
                    for ky in 0..k {
                        let iy = y + ky as isize - pad;
                        if iy < 0 || iy >= h {
                            continue;
                        }
                        for kx in 0..k {
                            let ix = x + kx as isize - pad;
                            if ix < 0 || ix >= w {
                                continue;
                            }
                            let src = (((b * h + iy) * w + ix) as usize) * c;
                            let col = (ky * k + kx) * c;
                            for ci in 0..c {
                                f(row, col + ci, src + ci);
                            }
                        }
                    }
                }
            }
        }
    }
}

fn im2col(x: &Array1<f32>, shape: &Conv2dShape) -> Result<Array2<f32>> {
    if x.len() != shape.input_len() {
        return Err(Error::ShapeMismatch {
            expected: vec![shape.batch, shape.height, shape.width, shape.in_channels],
            got: vec![x.len()],
        });
    }
    let mut cols = Array2::<f32>::zeros((shape.rows(), shape.patch_len()));
    shape.for_each_tap(|row, col, src| cols[[row, col]] = x[src]);
    Ok(cols)
}

fn col2im(dcols: &Array2<f32>, shape: &Conv2dShape) -> Array1<f32> {
    let mut dx = Array1::<f32>::zeros(shape.input_len());
    shape.for_each_tap(|row, col, src| dx[src] += dcols[[row, col]]);
    dx
}

fn conv_product(
    cols: &Array2<f32>,
    kernel: &Array1<f32>,
    bias: &Array1<f32>,
    shape: &Conv2dShape,
) -> Result<Array1<f32>> {
    if bias.len() != shape.out_channels {
        return Err(Error::ShapeMismatch {
            expected: vec![shape.out_channels],
            got: vec![bias.len()],
        });
    }
    let w = as_matrix(kernel, shape.patch_len(), shape.out_channels)?;
    let mut out = cols.dot(&w);
    out += bias;
    Ok(flatten(out))
}

/// Same-padded convolution with bias
pub fn conv2d(x: &Tensor, kernel: &Tensor, bias: &Tensor, shape: Conv2dShape) -> Result<Tensor> {
    let cols = im2col(x.data(), &shape)?;
    let data = conv_product(&cols, kernel.data(), bias.data(), &shape)?;

    let requires_grad = x.requires_grad() || kernel.requires_grad() || bias.requires_grad();
    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(Conv2dBackward {
            x: x.clone(),
            kernel: kernel.clone(),
            bias: bias.clone(),
            cols,
            shape,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    Ok(result)
}

/// Convolution without gradient tracking
pub fn conv2d_infer(
    x: &Array1<f32>,
    kernel: &Array1<f32>,
    bias: &Array1<f32>,
    shape: Conv2dShape,
) -> Result<Array1<f32>> {
    let cols = im2col(x, &shape)?;
    conv_product(&cols, kernel, bias, &shape)
}

struct Conv2dBackward {
    x: Tensor,
    kernel: Tensor,
    bias: Tensor,
    cols: Array2<f32>,
    shape: Conv2dShape,
    result_grad: GradCell,
}

impl BackwardOp for Conv2dBackward {
    fn backward(&self) {
        if let Some(grad_output) = self.result_grad.borrow().as_ref() {
            let s = &self.shape;
            let (Ok(g), Ok(w)) = (
                as_matrix(grad_output, s.rows(), s.out_channels),
                as_matrix(self.kernel.data(), s.patch_len(), s.out_channels),
            ) else {
                return;
            };

            if self.kernel.requires_grad() {
                self.kernel.accumulate_grad(flatten(self.cols.t().dot(&g)));
            }
            if self.bias.requires_grad() {
                self.bias.accumulate_grad(g.sum_axis(Axis(0)));
            }
            if self.x.requires_grad() {
                let dcols = g.dot(&w.t());
                self.x.accumulate_grad(col2im(&dcols, s));
            }

            self.x.propagate();
            self.kernel.propagate();
            self.bias.propagate();
        }
    }
}

/// Extents of a non-overlapping max pool (window = stride = `size`, valid padding)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolShape {
    pub batch: usize,
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub size: usize,
}

impl PoolShape {
    pub fn out_height(&self) -> usize {
        self.height / self.size
    }

    pub fn out_width(&self) -> usize {
        self.width / self.size
    }

    pub fn input_len(&self) -> usize {
        self.batch * self.height * self.width * self.channels
    }

    pub fn output_len(&self) -> usize {
        self.batch * self.out_height() * self.out_width() * self.channels
    }
}

/// Pooled values plus the input offset each one was taken from
fn pool_forward(x: &Array1<f32>, shape: &PoolShape) -> Result<(Array1<f32>, Vec<usize>)> {
    if x.len() != shape.input_len() || shape.size == 0 {
        return Err(Error::ShapeMismatch {
            expected: vec![shape.batch, shape.height, shape.width, shape.channels],
            got: vec![x.len()],
        });
    }
    let (oh, ow, c, p) = (
        shape.out_height(),
        shape.out_width(),
        shape.channels,
        shape.size,
    );
    let mut out = Array1::<f32>::zeros(shape.output_len());
    let mut argmax = vec![0usize; shape.output_len()];

    for b in 0..shape.batch {
        for y in 0..oh {
            for xo in 0..ow {
                for ch in 0..c {
                    let dst = ((b * oh + y) * ow + xo) * c + ch;
                    let mut best = f32::NEG_INFINITY;
                    let mut best_idx = 0;
                    for dy in 0..p {
                        for dx in 0..p {
                            let src =
                                ((b * shape.height + y * p + dy) * shape.width + xo * p + dx) * c
                                    + ch;
                            if x[src] > best {
                                best = x[src];
                                best_idx = src;
                            }
                        }
                    }
                    out[dst] = best;
                    argmax[dst] = best_idx;
                }
            }
        }
    }

    Ok((out, argmax))
}

/// Max pooling; gradients route to the arg-max of each window
pub fn max_pool2d(x: &Tensor, shape: PoolShape) -> Result<Tensor> {
    let (data, argmax) = pool_forward(x.data(), &shape)?;
    let requires_grad = x.requires_grad();
    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(MaxPoolBackward {
            x: x.clone(),
            argmax,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    Ok(result)
}

/// Max pooling without gradient tracking
pub fn max_pool2d_infer(x: &Array1<f32>, shape: PoolShape) -> Result<Array1<f32>> {
    pool_forward(x, &shape).map(|(out, _)| out)
}

struct MaxPoolBackward {
    x: Tensor,
    argmax: Vec<usize>,
    result_grad: GradCell,
}

impl BackwardOp for MaxPoolBackward {
    fn backward(&self) {
        if let Some(grad_output) = self.result_grad.borrow().as_ref() {
            if self.x.requires_grad() {
                let mut grad_x = Array1::<f32>::zeros(self.x.len());
                for (&src, &g) in self.argmax.iter().zip(grad_output.iter()) {
                    grad_x[src] += g;
                }
                self.x.accumulate_grad(grad_x);
            }
            self.x.propagate();
        }
    }
}
