//! Gradient clipping

use crate::Tensor;

/// Rescale all gradients so their global L2 norm is at most `max_norm`.
///
/// Returns the norm measured before clipping.
pub fn clip_grad_norm(params: &mut [Tensor], max_norm: f32) -> f32 {
    let total_norm_sq: f32 = params
        .iter()
        .filter_map(|p| p.grad())
        .map(|g| g.iter().map(|&v| v * v).sum::<f32>())
        .sum();
    let global_norm = total_norm_sq.sqrt();

    if global_norm > max_norm {
        let clip_coef = max_norm / global_norm;
        for param in params.iter_mut() {
            if let Some(grad) = param.grad() {
                param.set_grad(grad * clip_coef);
            }
        }
    }

    global_norm
}
