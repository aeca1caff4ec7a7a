//! Execution context for a forward pass

use rand::rngs::StdRng;
use rand::SeedableRng;

/// Forward-pass context: training/evaluation mode plus the random stream that
/// drives dropout masks.
///
/// In training mode batch normalization uses batch statistics and updates its
/// running averages, and dropout is active. In evaluation mode both layers use
/// their inference behaviour.
pub struct Context {
    training: bool,
    rng: StdRng,
}

impl Context {
    /// Training context drawing from `rng`
    pub fn new(rng: StdRng) -> Self {
        Self {
            training: true,
            rng,
        }
    }

    /// Training context seeded from a fixed value
    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }

    /// Set training mode
    pub fn train(&mut self) {
        self.training = true;
    }

    /// Set evaluation mode
    pub fn eval(&mut self) {
        self.training = false;
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Random stream shared by shuffling and dropout
    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("training", &self.training)
            .finish_non_exhaustive()
    }
}
