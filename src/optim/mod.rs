//! Optimizers for training the classifier

mod adam;
mod clip;
mod optimizer;

pub use adam::Adam;
pub use clip::clip_grad_norm;
pub use optimizer::Optimizer;
