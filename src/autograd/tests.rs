//! Tests for autograd operations with gradient checking

use super::*;
use approx::assert_abs_diff_eq;
use ndarray::{arr1, Array1};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Central-difference gradient: f'(x) ≈ (f(x + h) - f(x - h)) / 2h
fn finite_difference<F>(f: F, x: &[f32], epsilon: f32) -> Vec<f32>
where
    F: Fn(&[f32]) -> f32,
{
    let mut grad = vec![0.0; x.len()];
    let mut shifted = x.to_vec();

    for i in 0..x.len() {
        shifted[i] = x[i] + epsilon;
        let f_plus = f(&shifted);
        shifted[i] = x[i] - epsilon;
        let f_minus = f(&shifted);
        shifted[i] = x[i];

        grad[i] = (f_plus - f_minus) / (2.0 * epsilon);
    }

    grad
}

fn random_vec(len: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.random_range(-1.0..1.0)).collect()
}

/// Weighted sum Σ wᵢ·yᵢ, the scalar used to check gradients
fn weighted(y: &Array1<f32>, weights: &[f32]) -> f32 {
    y.iter().zip(weights).map(|(a, b)| a * b).sum()
}

fn assert_grad_close(analytic: &Array1<f32>, numeric: &[f32], tol: f32) {
    assert_eq!(analytic.len(), numeric.len());
    for (i, (a, n)) in analytic.iter().zip(numeric).enumerate() {
        let scale = 1.0f32.max(a.abs()).max(n.abs());
        assert!(
            (a - n).abs() / scale < tol,
            "gradient mismatch at {i}: analytic {a}, numeric {n}"
        );
    }
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_tensor_creation() {
        let t = Tensor::from_vec(vec![1.0, 2.0, 3.0], true);
        assert_eq!(t.len(), 3);
        assert!(t.requires_grad());
        assert!(t.grad().is_none());
    }

    #[test]
    fn test_tensor_grad_accumulation() {
        let t = Tensor::from_vec(vec![1.0, 2.0, 3.0], true);

        t.accumulate_grad(arr1(&[1.0, 1.0, 1.0]));
        t.accumulate_grad(arr1(&[1.0, 1.0, 1.0]));

        assert_eq!(t.grad().unwrap()[0], 2.0);
        t.zero_grad();
        assert!(t.grad().is_none());
    }

    #[test]
    fn test_detach_drops_history() {
        let a = Tensor::from_vec(vec![1.0, -2.0], true);
        let b = relu(&a);
        let d = b.detach();
        assert!(!d.requires_grad());
        assert!(d.backward_op().is_none());
        assert_eq!(d.data(), b.data());
    }

    #[test]
    fn test_add_backward() {
        let a = Tensor::from_vec(vec![1.0, 2.0, 3.0], true);
        let b = Tensor::from_vec(vec![4.0, 5.0, 6.0], true);
        let mut c = add(&a, &b);

        assert_abs_diff_eq!(c.data()[1], 7.0);

        backward(&mut c, Some(arr1(&[1.0, 1.0, 1.0])));
        assert_abs_diff_eq!(a.grad().unwrap()[0], 1.0);
        assert_abs_diff_eq!(b.grad().unwrap()[2], 1.0);
    }

    #[test]
    fn test_relu_forward_backward() {
        let a = Tensor::from_vec(vec![-1.0, 0.0, 1.0, 2.0], true);
        let mut y = relu(&a);

        assert_eq!(y.data().to_vec(), vec![0.0, 0.0, 1.0, 2.0]);

        backward(&mut y, Some(arr1(&[1.0, 1.0, 1.0, 1.0])));
        assert_eq!(a.grad().unwrap().to_vec(), vec![0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_sum_and_scale_chain() {
        let a = Tensor::from_vec(vec![1.0, 2.0, 3.0], true);
        let mut total = sum(&scale(&a, 2.0));

        assert_abs_diff_eq!(total.data()[0], 12.0);
        backward(&mut total, None);
        assert_eq!(a.grad().unwrap().to_vec(), vec![2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_linear_forward() {
        // x = [[1, 2]], W = [[1, 0, 1], [0, 1, 1]], b = [0.5, 0, -1]
        let x = Tensor::from_vec(vec![1.0, 2.0], false);
        let w = Tensor::from_vec(vec![1.0, 0.0, 1.0, 0.0, 1.0, 1.0], true);
        let b = Tensor::from_vec(vec![0.5, 0.0, -1.0], true);

        let y = linear(&x, &w, &b, 1, 2, 3).unwrap();
        assert_eq!(y.data().to_vec(), vec![1.5, 2.0, 2.0]);
    }

    #[test]
    fn test_linear_rejects_bad_bias() {
        let x = Tensor::from_vec(vec![1.0, 2.0], false);
        let w = Tensor::from_vec(vec![1.0; 6], true);
        let b = Tensor::from_vec(vec![0.0; 2], true);
        assert!(linear(&x, &w, &b, 1, 2, 3).is_err());
    }

    #[test]
    fn test_linear_gradients_match_finite_difference() {
        let (batch, fin, fout) = (3, 4, 2);
        let xv = random_vec(batch * fin, 1);
        let wv = random_vec(fin * fout, 2);
        let bv = random_vec(fout, 3);
        let upstream = random_vec(batch * fout, 4);

        let x = Tensor::from_vec(xv.clone(), true);
        let w = Tensor::from_vec(wv.clone(), true);
        let b = Tensor::from_vec(bv.clone(), true);
        let mut y = linear(&x, &w, &b, batch, fin, fout).unwrap();
        backward(&mut y, Some(Array1::from(upstream.clone())));

        let f_w = |wp: &[f32]| {
            let out = linear_infer(
                &Array1::from(xv.clone()),
                &Array1::from(wp.to_vec()),
                &Array1::from(bv.clone()),
                batch,
                fin,
                fout,
            )
            .unwrap();
            weighted(&out, &upstream)
        };
        assert_grad_close(&w.grad().unwrap(), &finite_difference(f_w, &wv, 1e-2), 1e-2);

        let f_x = |xp: &[f32]| {
            let out = linear_infer(
                &Array1::from(xp.to_vec()),
                &Array1::from(wv.clone()),
                &Array1::from(bv.clone()),
                batch,
                fin,
                fout,
            )
            .unwrap();
            weighted(&out, &upstream)
        };
        assert_grad_close(&x.grad().unwrap(), &finite_difference(f_x, &xv, 1e-2), 1e-2);

        // ∂/∂b is the column sum of the upstream gradient
        let grad_b = b.grad().unwrap();
        assert_abs_diff_eq!(grad_b[0], upstream[0] + upstream[2] + upstream[4], epsilon = 1e-5);
    }

    #[test]
    fn test_softmax_rows_normalizes_each_row() {
        let a = Tensor::from_vec(vec![1.0, 2.0, 3.0, -5.0, 0.0, 5.0], false);
        let y = softmax_rows(&a, 3).unwrap();

        let first: f32 = y.data().iter().take(3).sum();
        let second: f32 = y.data().iter().skip(3).sum();
        assert_abs_diff_eq!(first, 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(second, 1.0, epsilon = 1e-6);
        assert!(y.data()[2] > y.data()[1]);
    }

    #[test]
    fn test_softmax_rows_gradient() {
        let av = random_vec(8, 11);
        let upstream = random_vec(8, 12);
        let a = Tensor::from_vec(av.clone(), true);
        let mut y = softmax_rows(&a, 4).unwrap();
        backward(&mut y, Some(Array1::from(upstream.clone())));

        let f = |ap: &[f32]| {
            let out = softmax_rows_infer(&Array1::from(ap.to_vec()), 2, 4).unwrap();
            weighted(&out, &upstream)
        };
        assert_grad_close(&a.grad().unwrap(), &finite_difference(f, &av, 1e-2), 1e-2);
    }

    #[test]
    fn test_conv2d_center_tap_is_identity() {
        let shape = Conv2dShape {
            batch: 1,
            height: 3,
            width: 3,
            in_channels: 1,
            out_channels: 1,
            kernel: 3,
        };
        let mut kernel = vec![0.0; 9];
        kernel[4] = 1.0;
        let x: Vec<f32> = (1..=9).map(|v| v as f32).collect();

        let y = conv2d(
            &Tensor::from_vec(x.clone(), false),
            &Tensor::from_vec(kernel, false),
            &Tensor::zeros(1, false),
            shape,
        )
        .unwrap();
        assert_eq!(y.data().to_vec(), x);
    }

    #[test]
    fn test_conv2d_same_padding_border() {
        // All-ones 3x3 kernel over an all-ones 3x3 image counts in-bounds taps
        let shape = Conv2dShape {
            batch: 1,
            height: 3,
            width: 3,
            in_channels: 1,
            out_channels: 1,
            kernel: 3,
        };
        let y = conv2d_infer(
            &Array1::ones(9),
            &Array1::ones(9),
            &Array1::zeros(1),
            shape,
        )
        .unwrap();
        assert_eq!(y.to_vec(), vec![4.0, 6.0, 4.0, 6.0, 9.0, 6.0, 4.0, 6.0, 4.0]);
    }

    #[test]
    fn test_conv2d_gradients_match_finite_difference() {
        let shape = Conv2dShape {
            batch: 2,
            height: 4,
            width: 3,
            in_channels: 2,
            out_channels: 3,
            kernel: 3,
        };
        let xv = random_vec(shape.input_len(), 21);
        let kv = random_vec(shape.kernel_len(), 22);
        let bv = random_vec(3, 23);
        let upstream = random_vec(shape.output_len(), 24);

        let x = Tensor::from_vec(xv.clone(), true);
        let k = Tensor::from_vec(kv.clone(), true);
        let b = Tensor::from_vec(bv.clone(), true);
        let mut y = conv2d(&x, &k, &b, shape).unwrap();
        backward(&mut y, Some(Array1::from(upstream.clone())));

        let f_k = |kp: &[f32]| {
            let out = conv2d_infer(
                &Array1::from(xv.clone()),
                &Array1::from(kp.to_vec()),
                &Array1::from(bv.clone()),
                shape,
            )
            .unwrap();
            weighted(&out, &upstream)
        };
        assert_grad_close(&k.grad().unwrap(), &finite_difference(f_k, &kv, 1e-2), 2e-2);

        let f_x = |xp: &[f32]| {
            let out = conv2d_infer(
                &Array1::from(xp.to_vec()),
                &Array1::from(kv.clone()),
                &Array1::from(bv.clone()),
                shape,
            )
            .unwrap();
            weighted(&out, &upstream)
        };
        assert_grad_close(&x.grad().unwrap(), &finite_difference(f_x, &xv, 1e-2), 2e-2);
    }

    #[test]
    fn test_conv2d_rejects_wrong_input_len() {
        let shape = Conv2dShape {
            batch: 1,
            height: 2,
            width: 2,
            in_channels: 1,
            out_channels: 1,
            kernel: 3,
        };
        let err = conv2d_infer(&Array1::ones(5), &Array1::ones(9), &Array1::zeros(1), shape);
        assert!(matches!(err, Err(crate::Error::ShapeMismatch { .. })));
    }

    #[test]
    fn test_max_pool_forward_and_routing() {
        // One 4x4 single-channel image
        let x: Vec<f32> = vec![
            1.0, 2.0, 5.0, 0.0, //
            3.0, 4.0, 1.0, 1.0, //
            0.0, 0.0, 2.0, 9.0, //
            7.0, 0.5, 3.0, 1.0,
        ];
        let shape = PoolShape {
            batch: 1,
            height: 4,
            width: 4,
            channels: 1,
            size: 2,
        };
        let t = Tensor::from_vec(x, true);
        let mut y = max_pool2d(&t, shape).unwrap();
        assert_eq!(y.data().to_vec(), vec![4.0, 5.0, 7.0, 9.0]);

        backward(&mut y, Some(arr1(&[1.0, 2.0, 3.0, 4.0])));
        let g = t.grad().unwrap();
        assert_eq!(g[5], 1.0);
        assert_eq!(g[2], 2.0);
        assert_eq!(g[12], 3.0);
        assert_eq!(g[11], 4.0);
        assert_abs_diff_eq!(g.sum(), 10.0);
    }

    #[test]
    fn test_max_pool_floors_odd_extent() {
        let shape = PoolShape {
            batch: 1,
            height: 5,
            width: 5,
            channels: 2,
            size: 2,
        };
        assert_eq!(shape.out_height(), 2);
        let y = max_pool2d_infer(&Array1::ones(50), shape).unwrap();
        assert_eq!(y.len(), 8);
    }

    #[test]
    fn test_batch_norm_normalizes_per_channel() {
        let x = Tensor::from_vec(vec![1.0, 10.0, 3.0, 20.0, 5.0, 30.0], false);
        let gamma = Tensor::ones(2, false);
        let beta = Tensor::zeros(2, false);

        let (y, stats) = batch_norm(&x, &gamma, &beta, 2, 1e-3).unwrap();
        assert_abs_diff_eq!(stats.mean[0], 3.0, epsilon = 1e-5);
        assert_abs_diff_eq!(stats.mean[1], 20.0, epsilon = 1e-5);

        let c0: f32 = [0, 2, 4].iter().map(|&i| y.data()[i]).sum();
        assert_abs_diff_eq!(c0, 0.0, epsilon = 1e-5);
        let var0: f32 = [0, 2, 4].iter().map(|&i| y.data()[i].powi(2)).sum::<f32>() / 3.0;
        assert_abs_diff_eq!(var0, 1.0, epsilon = 1e-2);
    }

    #[test]
    fn test_batch_norm_input_gradient() {
        let channels = 3;
        let xv = random_vec(4 * channels, 31);
        let gv: Vec<f32> = random_vec(channels, 32).iter().map(|v| v + 1.5).collect();
        let bv = random_vec(channels, 33);
        let upstream = random_vec(4 * channels, 34);

        let x = Tensor::from_vec(xv.clone(), true);
        let gamma = Tensor::from_vec(gv.clone(), true);
        let beta = Tensor::from_vec(bv.clone(), true);
        let (mut y, _) = batch_norm(&x, &gamma, &beta, channels, 1e-3).unwrap();
        backward(&mut y, Some(Array1::from(upstream.clone())));

        let f = |xp: &[f32]| {
            let (out, _) = batch_norm(
                &Tensor::from_vec(xp.to_vec(), false),
                &Tensor::from_vec(gv.clone(), false),
                &Tensor::from_vec(bv.clone(), false),
                channels,
                1e-3,
            )
            .unwrap();
            weighted(out.data(), &upstream)
        };
        assert_grad_close(&x.grad().unwrap(), &finite_difference(f, &xv, 1e-2), 5e-2);

        let grad_beta = beta.grad().unwrap();
        let expected: f32 = (0..4).map(|r| upstream[r * channels]).sum();
        assert_abs_diff_eq!(grad_beta[0], expected, epsilon = 1e-5);
    }

    #[test]
    fn test_batch_norm_infer_uses_running_stats() {
        let stats = BatchStats {
            mean: arr1(&[1.0]),
            var: arr1(&[4.0]),
        };
        let y = batch_norm_infer(&arr1(&[1.0, 3.0]), &arr1(&[2.0]), &arr1(&[0.5]), &stats, 0.0)
            .unwrap();
        assert_abs_diff_eq!(y[0], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(y[1], 2.5, epsilon = 1e-6);
    }

    #[test]
    fn test_dropout_zero_rate_is_identity() {
        let mut rng = StdRng::seed_from_u64(0);
        let x = Tensor::from_vec(vec![1.0, 2.0, 3.0], true);
        let y = dropout(&x, 0.0, &mut rng);
        assert_eq!(y.data(), x.data());
    }

    #[test]
    fn test_dropout_scales_survivors_and_masks_gradient() {
        let mut rng = StdRng::seed_from_u64(7);
        let x = Tensor::from_vec(vec![1.0; 200], true);
        let mut y = dropout(&x, 0.5, &mut rng);

        for &v in y.data().iter() {
            assert!(v == 0.0 || (v - 2.0).abs() < 1e-6);
        }
        let kept = y.data().iter().filter(|&&v| v > 0.0).count();
        assert!(kept > 60 && kept < 140, "kept {kept} of 200");

        backward(&mut y, Some(Array1::ones(200)));
        assert_eq!(x.grad().unwrap(), y.data().clone());
    }

    #[test]
    fn test_dropout_is_reproducible_per_seed() {
        let x = Tensor::from_vec(vec![1.0; 32], false);
        let a = dropout(&x, 0.3, &mut StdRng::seed_from_u64(42));
        let b = dropout(&x, 0.3, &mut StdRng::seed_from_u64(42));
        assert_eq!(a.data(), b.data());
    }
}

proptest! {
    #[test]
    fn prop_softmax_rows_sum_to_one(
        values in prop::collection::vec(-30.0f32..30.0, 10..=50)
    ) {
        let rows = values.len() / 10;
        let data: Vec<f32> = values[..rows * 10].to_vec();
        let y = softmax_rows_infer(&Array1::from(data), rows, 10).unwrap();
        for r in 0..rows {
            let s: f32 = y.iter().skip(r * 10).take(10).sum();
            prop_assert!((s - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn prop_relu_never_negative(values in prop::collection::vec(-100.0f32..100.0, 1..64)) {
        let y = relu_infer(&Array1::from(values));
        prop_assert!(y.iter().all(|&v| v >= 0.0));
    }
}
