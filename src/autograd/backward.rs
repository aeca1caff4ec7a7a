//! Backward operation trait

/// A recorded op that pushes its output gradient back into its inputs.
///
/// Implementations accumulate into every input that requires a gradient and
/// then call `backward` on the inputs' own ops, so the whole chain unwinds
/// from the loss.
pub trait BackwardOp {
    fn backward(&self);
}
