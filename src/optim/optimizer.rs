//! Optimizer trait

use crate::Tensor;

/// A parameter update rule.
///
/// `params` must be passed in the same order on every call; stateful
/// optimizers key their per-parameter buffers by position.
pub trait Optimizer {
    /// Apply one update using the gradients currently stored on `params`
    fn step(&mut self, params: &mut [Tensor]);

    /// Clear all gradients
    fn zero_grad(&mut self, params: &mut [Tensor]) {
        for param in params {
            param.zero_grad();
        }
    }

    fn lr(&self) -> f32;

    fn set_lr(&mut self, lr: f32);

    /// Short name used in logs and tracked parameters
    fn name(&self) -> &str;
}
