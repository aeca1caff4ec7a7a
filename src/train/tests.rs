use super::*;
use crate::autograd::Context;
use crate::data::{one_hot, Partition};
use crate::model::{build_model, ModelSpec, Sequential};
use crate::optim::Adam;
use crate::Error;
use approx::assert_abs_diff_eq;
use ndarray::Array4;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Arc, Mutex};

/// Bright images are class 1, dark images class 0
fn two_class_partition(n: usize) -> Partition {
    let labels: Vec<u8> = (0..n).map(|i| (i % 2) as u8).collect();
    let features = Array4::from_shape_fn((n, 8, 8, 1), |(i, h, w, _)| {
        let base = if labels[i] == 1 { 0.8 } else { 0.1 };
        base + ((h * 8 + w + i) % 7) as f32 * 0.02
    });
    Partition::new(features, one_hot(&labels).unwrap()).unwrap()
}

fn spec(dropout_rate: f32) -> ModelSpec {
    ModelSpec {
        input_shape: [8, 8, 1],
        num_classes: 10,
        num_filters: vec![4, 8],
        dropout_rate,
    }
}

fn trainer(seed: u64, dropout_rate: f32, lr: f32) -> Trainer {
    let mut rng = StdRng::seed_from_u64(seed);
    let model = build_model(&spec(dropout_rate), &mut rng);
    Trainer::new(
        model,
        Box::new(Adam::default_params(lr)),
        Box::new(CategoricalCrossEntropy),
        Box::new(CategoricalAccuracy),
        TrainConfig::default(),
        Context::new(rng),
    )
}

#[test]
fn test_history_has_one_entry_per_epoch() {
    let train = two_class_partition(12);
    let val = two_class_partition(6);
    let mut trainer = trainer(1, 0.5, 0.001);

    let history = trainer.fit(&train, Some(&val), 3, 5).unwrap();
    assert_eq!(history.epochs(), 3);
    assert_eq!(history.accuracy.len(), 3);
    assert_eq!(history.val_loss.len(), 3);
    assert_eq!(history.val_accuracy.len(), 3);
    // 12 samples at batch size 5: 3 steps per epoch
    assert_eq!(trainer.global_step(), 9);

    for (&loss, &acc) in history.loss.iter().zip(&history.accuracy) {
        assert!(loss.is_finite() && loss >= 0.0);
        assert!((0.0..=1.0).contains(&acc));
    }
}

#[test]
fn test_without_validation_only_training_metrics() {
    let train = two_class_partition(8);
    let mut trainer = trainer(2, 0.5, 0.001);
    let history = trainer.fit(&train, None, 2, 4).unwrap();

    assert_eq!(history.loss.len(), 2);
    assert!(history.val_loss.is_empty());
    assert!(history.val_accuracy.is_empty());
}

#[test]
fn test_loss_decreases_on_separable_data() {
    let train = two_class_partition(16);
    let mut trainer = trainer(3, 0.0, 0.01);
    let history = trainer.fit(&train, None, 10, 4).unwrap();

    let first = history.loss[0];
    let last = *history.loss.last().unwrap();
    assert!(last < first, "loss went from {first} to {last}");
}

#[test]
fn test_same_seed_same_history() {
    let train = two_class_partition(10);
    let val = two_class_partition(4);

    let a = trainer(7, 0.5, 0.001).fit(&train, Some(&val), 2, 4).unwrap();
    let b = trainer(7, 0.5, 0.001).fit(&train, Some(&val), 2, 4).unwrap();
    assert_eq!(a, b);

    let c = trainer(8, 0.5, 0.001).fit(&train, Some(&val), 2, 4).unwrap();
    assert_ne!(a.loss[0], c.loss[0]);
}

#[test]
fn test_train_step_updates_parameters() {
    let train = two_class_partition(4);
    let mut trainer = trainer(4, 0.5, 0.01);
    let before: Vec<_> = trainer.model().parameters().iter().map(|p| p.data().clone()).collect();

    let batch = train.gather(&[0, 1, 2, 3]);
    let scores = trainer.train_step(&batch).unwrap();
    assert!(scores.loss > 0.0);

    let after = trainer.model().parameters();
    // Kernels and BN scales always receive a gradient
    assert_ne!(after[0].data(), &before[0]);
    assert_ne!(after[2].data(), &before[2]);
    assert_eq!(trainer.global_step(), 1);
}

#[test]
fn test_evaluate_is_independent_of_batch_size() {
    let data = two_class_partition(9);
    let trainer = trainer(5, 0.5, 0.001);

    let whole = trainer.evaluate(&data, 9).unwrap();
    let chunked = trainer.evaluate(&data, 2).unwrap();
    assert_abs_diff_eq!(whole.loss, chunked.loss, epsilon = 1e-5);
    assert_abs_diff_eq!(whole.accuracy, chunked.accuracy, epsilon = 1e-6);
}

#[test]
fn test_evaluate_does_not_touch_running_stats() {
    let data = two_class_partition(6);
    let trainer = trainer(6, 0.5, 0.001);
    let before = trainer.model().state_dict();
    trainer.evaluate(&data, 3).unwrap();
    assert_eq!(before, trainer.model().state_dict());
}

#[test]
fn test_callback_stop_ends_training() {
    struct StopAfter(usize);
    impl TrainerCallback for StopAfter {
        fn on_epoch_end(&mut self, ctx: &CallbackContext) -> CallbackAction {
            if ctx.epoch + 1 >= self.0 {
                CallbackAction::Stop
            } else {
                CallbackAction::Continue
            }
        }
    }

    let train = two_class_partition(6);
    let mut trainer = trainer(9, 0.5, 0.001);
    trainer.add_callback(StopAfter(1));
    let history = trainer.fit(&train, None, 5, 3).unwrap();
    assert_eq!(history.epochs(), 1);
}

#[test]
fn test_callbacks_see_epoch_metrics() {
    struct Recorder(Arc<Mutex<Vec<CallbackContext>>>);
    impl TrainerCallback for Recorder {
        fn on_epoch_end(&mut self, ctx: &CallbackContext) -> CallbackAction {
            self.0.lock().unwrap().push(ctx.clone());
            CallbackAction::Continue
        }
    }

    let seen = Arc::new(Mutex::new(Vec::new()));
    let train = two_class_partition(6);
    let val = two_class_partition(2);
    let mut trainer = trainer(10, 0.5, 0.001);
    trainer.add_callback(Recorder(seen.clone()));
    let history = trainer.fit(&train, Some(&val), 2, 4).unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[1].epoch, 1);
    assert_eq!(seen[1].steps_per_epoch, 2);
    assert_eq!(seen[1].loss, history.loss[1]);
    assert_eq!(seen[1].val_accuracy, Some(history.val_accuracy[1]));
}

#[test]
fn test_grad_clip_and_no_shuffle() {
    let train = two_class_partition(6);
    let mut rng = StdRng::seed_from_u64(11);
    let model: Sequential = build_model(&spec(0.0), &mut rng);
    let mut trainer = Trainer::new(
        model,
        Box::new(Adam::default_params(0.001)),
        Box::new(CategoricalCrossEntropy),
        Box::new(CategoricalAccuracy),
        TrainConfig::new().with_grad_clip(0.1).with_shuffle(false),
        Context::new(rng),
    );
    let history = trainer.fit(&train, None, 1, 3).unwrap();
    assert!(history.loss[0].is_finite());
}

#[test]
fn test_empty_partitions_are_rejected() {
    let empty = Partition::new(Array4::zeros((0, 8, 8, 1)), one_hot(&[]).unwrap()).unwrap();
    let mut trainer = trainer(12, 0.5, 0.001);
    assert!(matches!(
        trainer.fit(&empty, None, 1, 4),
        Err(Error::InvalidParameter(_))
    ));
    assert!(trainer.evaluate(&empty, 4).is_err());
}
