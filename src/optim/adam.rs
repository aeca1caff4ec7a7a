//! Adam optimizer

use super::Optimizer;
use crate::Tensor;
use ndarray::{Array1, Zip};

/// Adam optimizer (Adaptive Moment Estimation)
#[derive(Debug, Clone)]
pub struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    t: u64,
    m: Vec<Option<Array1<f32>>>, // First moment
    v: Vec<Option<Array1<f32>>>, // Second moment
}

impl Adam {
    pub fn new(lr: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            lr,
            beta1,
            beta2,
            epsilon,
            t: 0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }

    /// Adam with β₁ = 0.9, β₂ = 0.999, ε = 1e-7 (Keras defaults)
    pub fn default_params(lr: f32) -> Self {
        Self::new(lr, 0.9, 0.999, 1e-7)
    }

    /// Number of updates applied so far
    pub fn steps(&self) -> u64 {
        self.t
    }

    fn ensure_moments(&mut self, params: &[Tensor]) {
        if self.m.len() != params.len() {
            self.m = params.iter().map(|_| None).collect();
            self.v = params.iter().map(|_| None).collect();
        }
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: &mut [Tensor]) {
        self.ensure_moments(params);
        self.t += 1;

        // Bias correction folded into the step size
        let t = self.t as i32;
        let lr_t = self.lr * (1.0 - self.beta2.powi(t)).sqrt() / (1.0 - self.beta1.powi(t));
        let (beta1, beta2, eps) = (self.beta1, self.beta2, self.epsilon);

        for (i, param) in params.iter_mut().enumerate() {
            let Some(grad) = param.grad() else {
                continue;
            };
            let m = self.m[i].get_or_insert_with(|| Array1::zeros(grad.len()));
            let v = self.v[i].get_or_insert_with(|| Array1::zeros(grad.len()));

            // m ← β₁m + (1-β₁)g, v ← β₂v + (1-β₂)g², θ ← θ - lr_t·m/(√v + ε)
            Zip::from(param.data_mut())
                .and(m)
                .and(v)
                .and(&grad)
                .for_each(|theta, m, v, &g| {
                    *m = beta1 * *m + (1.0 - beta1) * g;
                    *v = beta2 * *v + (1.0 - beta2) * g * g;
                    *theta -= lr_t * *m / (v.sqrt() + eps);
                });
        }
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }

    fn name(&self) -> &str {
        "adam"
    }
}
