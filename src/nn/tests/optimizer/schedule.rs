/*
 * @Author       : 老董
 * @Date         : 2026-10-19
 * @Description  : 调度测试
 */

use super::stub_key;
use crate::errors::OptimizerError;
use crate::nn::{Optimizer, Schedule, ScheduleSource};

fn infinite() -> ScheduleSource {
    ScheduleSource::generator(std::iter::repeat(0.456_f32))
}

fn empty() -> ScheduleSource {
    ScheduleSource::generator(std::iter::empty::<f32>())
}

/// 依次取第 0、1、2 步的学习率
fn first_three_rates(source: ScheduleSource) -> [f32; 3] {
    let mut optimizer = Optimizer::new(source).unwrap();
    let key = stub_key();
    let first = optimizer.learn_rate(optimizer.step(), &key).unwrap();
    optimizer.step_schedules().unwrap();
    let second = optimizer.learn_rate(optimizer.step(), &key).unwrap();
    optimizer.step_schedules().unwrap();
    let third = optimizer.learn_rate(optimizer.step(), &key).unwrap();
    [first, second, third]
}

#[test]
fn test_constant_schedule() {
    assert_eq!(first_three_rates(0.123_f32.into()), [0.123, 0.123, 0.123]);
}

#[test]
fn test_infinite_generator_schedule() {
    assert_eq!(first_three_rates(infinite()), [0.456, 0.456, 0.456]);
}

#[test]
fn test_generator_schedule_follows_values() {
    let source = ScheduleSource::generator(vec![0.2_f32, 0.1, 0.4, 0.5, 0.6, 0.7, 0.8]);
    assert_eq!(first_three_rates(source), [0.2, 0.1, 0.4]);
}

#[test]
fn test_short_generator_clamps_to_last_value() {
    let source = ScheduleSource::generator(vec![0.333_f32, 0.666]);
    assert_eq!(first_three_rates(source), [0.333, 0.666, 0.666]);
}

#[test]
fn test_sequence_schedule() {
    assert_eq!(first_three_rates(vec![0.9_f32, 0.8, 0.7].into()), [0.9, 0.8, 0.7]);
    assert_eq!(first_three_rates([0.0_f32, 0.123].into()), [0.0, 0.123, 0.123]);
}

#[test]
fn test_exhausted_sequence_keeps_last_value() {
    let mut optimizer = Optimizer::new(vec![0.9_f32, 0.8, 0.7]).unwrap();
    for _ in 0..3 {
        optimizer.step_schedules().unwrap();
    }
    assert_eq!(optimizer.step(), 3);
    assert_eq!(optimizer.learn_rate(3, &stub_key()).unwrap(), 0.7);
    assert_eq!(optimizer.learn_rate(100, &stub_key()).unwrap(), 0.7);
}

#[test]
fn test_empty_sources_are_rejected_at_construction() {
    for source in [empty(), Vec::<f32>::new().into()] {
        let err = Optimizer::new(source).unwrap_err();
        assert_eq!(
            err,
            OptimizerError::EmptySchedule {
                name: "learn_rate".to_string()
            }
        );
    }
}

#[test]
fn test_generator_schedule_steps() {
    let mut s = Schedule::new("test", ScheduleSource::generator(vec![0.0_f32, 1.0, 2.0, 3.0])).unwrap();
    let key = stub_key();
    assert_eq!(s.value(0, &key, None).unwrap(), 0.0);
    assert_eq!(s.value(0, &key, None).unwrap(), 0.0);
    assert_eq!(s.value(1, &key, None).unwrap(), 1.0);
    assert_eq!(s.value(1, &key, None).unwrap(), 1.0);
    // 从第 1 步到第 3 步前进两个位置
    assert_eq!(s.value(3, &key, None).unwrap(), 3.0);
    assert_eq!(s.value(10, &key, None).unwrap(), 3.0);

    let err = s.value(1, &key, None).unwrap_err();
    assert_eq!(
        err,
        OptimizerError::StepDecreased {
            name: "test".to_string(),
            last_step: 10,
            step: 1,
        }
    );
    assert!(err.to_string().contains("不得减少"));
}

#[test]
fn test_repeated_step_does_not_advance() {
    let mut s = Schedule::new("test", vec![1.0_f32, 2.0, 3.0]).unwrap();
    let key = stub_key();
    for _ in 0..5 {
        assert_eq!(s.value(0, &key, None).unwrap(), 1.0);
    }
    assert_eq!(s.value(1, &key, None).unwrap(), 2.0);
}

#[test]
fn test_constant_schedule_ignores_step_order() {
    let mut s = Schedule::new("test", 0.5_f32).unwrap();
    let key = stub_key();
    assert_eq!(s.value(10, &key, None).unwrap(), 0.5);
    assert_eq!(s.value(3, &key, None).unwrap(), 0.5);
}

#[test]
fn test_custom_schedule_receives_step_and_key() {
    let mut s = Schedule::custom("test", |step, key, _| step as f32 + key.layer_id as f32 * 100.0);
    assert_eq!(s.value(2, &(3, "W").into(), None).unwrap(), 302.0);
    assert_eq!(s.value(0, &stub_key(), None).unwrap(), 0.0);
}

#[test]
fn test_schedule_source_from_json() {
    let key = stub_key();

    let source = ScheduleSource::from_json("learn_rate", &serde_json::json!(0.25)).unwrap();
    assert_eq!(Schedule::new("learn_rate", source).unwrap().value(7, &key, None).unwrap(), 0.25);

    let source = ScheduleSource::from_json("learn_rate", &serde_json::json!([0.5, 0.25])).unwrap();
    let mut s = Schedule::new("learn_rate", source).unwrap();
    assert_eq!(s.value(0, &key, None).unwrap(), 0.5);
    assert_eq!(s.value(1, &key, None).unwrap(), 0.25);
}

#[test]
fn test_invalid_json_schedule_sources() {
    for value in [
        serde_json::json!("hello"),
        serde_json::json!(null),
        serde_json::json!(true),
        serde_json::json!({"rate": 0.1}),
        serde_json::json!([0.1, "x"]),
    ] {
        let err = ScheduleSource::from_json("learn_rate", &value).unwrap_err();
        assert!(
            matches!(err, OptimizerError::InvalidSchedule { ref name, .. } if name == "learn_rate"),
            "{value} 应被拒绝，实际：{err:?}"
        );
    }

    // 空数组能解析为序列，但构造调度时被拒绝
    let source = ScheduleSource::from_json("learn_rate", &serde_json::json!([])).unwrap();
    assert!(matches!(
        Optimizer::new(source),
        Err(OptimizerError::EmptySchedule { .. })
    ));
}

#[test]
fn test_schedule_name() {
    assert_eq!(Schedule::constant("beta1", 0.9).name(), "beta1");
    assert_eq!(Schedule::new("L2", vec![0.1_f32]).unwrap().name(), "L2");
    let s = Schedule::custom("grad_clip", |_, _, _| 1.0);
    assert_eq!(s.name(), "grad_clip");
    assert!(format!("{s:?}").contains("grad_clip"));
}

#[test]
fn test_check_step() {
    let mut s = Schedule::new("test", vec![1.0_f32, 2.0]).unwrap();
    s.value(3, &stub_key(), None).unwrap();
    assert!(s.check_step(3).is_ok());
    assert!(matches!(
        s.check_step(2),
        Err(OptimizerError::StepDecreased { last_step: 3, step: 2, .. })
    ));
    // 常数与自定义调度不受步数顺序限制
    assert!(Schedule::constant("c", 1.0).check_step(0).is_ok());
}
