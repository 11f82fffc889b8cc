/*
 * @Author       : 老董
 * @Date         : 2026-10-19
 * @Description  : RAdam 更新测试
 */

use approx::assert_abs_diff_eq;
use ndarray::{Array1, Array2, array};

use crate::nn::{Optimizer, ParamKey};

#[test]
fn test_radam_with_l2_in_gradient() {
    let mut optimizer = Optimizer::new(0.123_f32)
        .unwrap()
        .with_averages(false)
        .with_radam(true)
        .with_l2(0.1)
        .with_l2_is_weight_decay(false);
    let key = ParamKey::new(0, "x");

    let mut empty_w = Array2::<f32>::zeros((1, 2));
    let mut empty_g = Array1::<f32>::zeros(0);
    let (_, gradient) = optimizer
        .call(key.clone(), empty_w.view_mut(), empty_g.view_mut())
        .unwrap();
    assert_eq!(gradient, Array1::<f32>::zeros(0));

    // g = [-1, 0, 0, 1] + 0.1 * w = [-0.9, 0, 0, 1.1]，范数 > 1 被裁剪；
    // beta1 = beta2 = 0 时 RAdam 退化为 SGD
    let mut w = array![1.0_f32, 0.0, 0.0, 1.0];
    let mut dw = array![-1.0_f32, 0.0, 0.0, 1.0];
    optimizer.call(key.clone(), w.view_mut(), dw.view_mut()).unwrap();

    let norm = (0.9_f32 * 0.9 + 1.1 * 1.1).sqrt();
    assert_abs_diff_eq!(w[0], 1.0 + 0.123 * 0.9 / norm, epsilon = 1e-5);
    assert_abs_diff_eq!(w[1], 0.0, epsilon = 1e-6);
    assert_abs_diff_eq!(w[2], 0.0, epsilon = 1e-6);
    assert_abs_diff_eq!(w[3], 1.0 - 0.123 * 1.1 / norm, epsilon = 1e-5);
    assert_eq!(dw, Array1::<f32>::zeros(4));

    // 另一个优化器以不同的 beta 更新同一份权重
    let mut other = Optimizer::new(0.123_f32)
        .unwrap()
        .with_beta1(0.1)
        .with_beta2(0.1);
    let mut dw = array![-1.0_f32, 0.0, 0.0, 1.0];
    other
        .call(ParamKey::new(1, "x"), w.view_mut(), dw.view_mut())
        .unwrap();
    assert!(w.iter().all(|v| v.is_finite()));
}

#[test]
fn test_radam_warmup_is_momentum_sgd() {
    // beta2 = 0.999 时前几步 ρt < 5，更新为 lr * m̂，首步即 lr * g
    let mut optimizer = Optimizer::new(0.1_f32)
        .unwrap()
        .with_beta1(0.9)
        .with_beta2(0.999)
        .with_l2(0.0)
        .with_grad_clip(0.0)
        .with_averages(false)
        .with_radam(true);
    let key = ParamKey::new(0, "W");
    let mut w = array![1.0_f32, 1.0];
    let mut dw = array![0.5_f32, -0.5];

    optimizer.call(key.clone(), w.view_mut(), dw.view_mut()).unwrap();

    assert_abs_diff_eq!(w[0], 0.95, epsilon = 1e-5);
    assert_abs_diff_eq!(w[1], 1.05, epsilon = 1e-5);
    assert!(optimizer.second_moment(&key).is_some());
}

#[test]
fn test_radam_rectified_steps() {
    let mut optimizer = Optimizer::new(0.01_f32)
        .unwrap()
        .with_beta1(0.9)
        .with_beta2(0.999)
        .with_l2(0.0)
        .with_grad_clip(0.0)
        .with_averages(false)
        .with_radam(true);
    let key = ParamKey::new(0, "W");
    let mut w = array![1.0_f32];

    let mut previous = w[0];
    for _ in 0..20 {
        let mut dw = array![1.0_f32];
        optimizer.call(key.clone(), w.view_mut(), dw.view_mut()).unwrap();
        assert!(w[0].is_finite());
        assert!(w[0] < previous);
        previous = w[0];
    }
    assert_eq!(optimizer.nr_update(&key), 20);
}
