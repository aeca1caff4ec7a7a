//! CNN classifier construction
//!
//! [`ModelSpec::resolve`] turns the `model` namespace into a complete
//! specification; [`build_model`] is a pure function of that spec and a
//! random stream. Each entry of `num_filters` adds one block:
//!
//! ```text
//! Conv2D(f, 3x3, same) -> BatchNorm -> ReLU -> MaxPool(2x2) -> Dropout
//! ```
//!
//! followed by the classifier head:
//!
//! ```text
//! Flatten -> Dense(64) -> BatchNorm -> ReLU -> Dropout -> Dense(K) -> Softmax
//! ```

mod layer;
mod sequential;
mod spec;


pub use layer::{Extent, Layer, LayerKind, ParamId, BN_EPSILON, BN_MOMENTUM};
pub use sequential::{LayerSummary, Sequential};
pub use spec::{
    ModelSpec, DEFAULT_DROPOUT_RATE, DEFAULT_NUM_FILTERS, DENSE_UNITS, KERNEL_SIZE, POOL_SIZE,
};

use crate::autograd::BatchStats;
use crate::Tensor;
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::Rng;

/// Build a freshly initialized classifier.
///
/// Kernels use Glorot-uniform initialization, biases and BN betas start at
/// zero, BN gammas at one, running means at zero and running variances at one.
pub fn build_model(spec: &ModelSpec, rng: &mut StdRng) -> Sequential {
    let mut builder = Builder::new(rng);
    let mut channels = spec.input_shape[2];

    for &filters in &spec.num_filters {
        builder.conv2d(channels, filters, KERNEL_SIZE);
        builder.batch_norm(filters);
        builder.unit("re_lu", LayerKind::Relu);
        builder.unit("max_pooling2d", LayerKind::MaxPool { size: POOL_SIZE });
        builder.unit("dropout", LayerKind::Dropout { rate: spec.dropout_rate });
        channels = filters;
    }

    let [h, w, c] = spec.feature_shape();
    builder.unit("flatten", LayerKind::Flatten);
    builder.dense(h * w * c, DENSE_UNITS);
    builder.batch_norm(DENSE_UNITS);
    builder.unit("re_lu", LayerKind::Relu);
    builder.unit("dropout", LayerKind::Dropout { rate: spec.dropout_rate });
    builder.dense(DENSE_UNITS, spec.num_classes);
    builder.unit("softmax", LayerKind::Softmax);

    let Builder {
        layers,
        params,
        names,
        ..
    } = builder;
    Sequential::new(spec.clone(), layers, params, names)
}

struct Builder<'a> {
    rng: &'a mut StdRng,
    layers: Vec<Layer>,
    params: Vec<Tensor>,
    names: Vec<String>,
    counters: std::collections::HashMap<&'static str, usize>,
}

impl<'a> Builder<'a> {
    fn new(rng: &'a mut StdRng) -> Self {
        Self {
            rng,
            layers: Vec::new(),
            params: Vec::new(),
            names: Vec::new(),
            counters: Default::default(),
        }
    }

    /// Keras-style unique layer name: `conv2d_0`, `conv2d_1`, ...
    fn name(&mut self, prefix: &'static str) -> String {
        let n = self.counters.entry(prefix).or_insert(0);
        let name = format!("{prefix}_{n}");
        *n += 1;
        name
    }

    fn param(&mut self, layer: &str, suffix: &str, data: Array1<f32>) -> ParamId {
        self.params.push(Tensor::new(data, true));
        self.names.push(format!("{layer}.{suffix}"));
        self.params.len() - 1
    }

    fn glorot_uniform(&mut self, len: usize, fan_in: usize, fan_out: usize) -> Array1<f32> {
        let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
        (0..len).map(|_| self.rng.random_range(-limit..limit)).collect()
    }

    fn unit(&mut self, prefix: &'static str, kind: LayerKind) {
        let name = self.name(prefix);
        self.layers.push(Layer::new(name, kind));
    }

    fn conv2d(&mut self, in_channels: usize, filters: usize, kernel_size: usize) {
        let name = self.name("conv2d");
        let receptive = kernel_size * kernel_size;
        let weights = self.glorot_uniform(
            receptive * in_channels * filters,
            receptive * in_channels,
            receptive * filters,
        );
        let kernel = self.param(&name, "kernel", weights);
        let bias = self.param(&name, "bias", Array1::zeros(filters));
        self.layers.push(Layer::new(
            name,
            LayerKind::Conv2d {
                kernel,
                bias,
                filters,
                kernel_size,
            },
        ));
    }

    fn batch_norm(&mut self, channels: usize) {
        let name = self.name("batch_normalization");
        let gamma = self.param(&name, "gamma", Array1::ones(channels));
        let beta = self.param(&name, "beta", Array1::zeros(channels));
        self.layers.push(Layer::new(
            name,
            LayerKind::BatchNorm {
                gamma,
                beta,
                running: BatchStats {
                    mean: Array1::zeros(channels),
                    var: Array1::ones(channels),
                },
            },
        ));
    }

    fn dense(&mut self, in_features: usize, units: usize) {
        let name = self.name("dense");
        let weights = self.glorot_uniform(in_features * units, in_features, units);
        let weight = self.param(&name, "kernel", weights);
        let bias = self.param(&name, "bias", Array1::zeros(units));
        self.layers.push(Layer::new(
            name,
            LayerKind::Dense {
                weight,
                bias,
                units,
            },
        ));
    }
}
