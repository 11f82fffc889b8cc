/*
 * @Author       : 老董
 * @Date         : 2026-10-19
 * @Description  : 按名称从配置构造优化器
 */

use serde_json::json;

use super::stub_key;
use crate::errors::OptimizerError;
use crate::nn::{OptimizerConfig, OptimizerKind, resolve};

#[test]
fn test_resolve_registered_names() {
    for name in ["RAdam.v1", "Adam.v1", "SGD.v1"] {
        let mut optimizer = resolve(&json!({"@optimizers": name, "learn_rate": 0.123})).unwrap();
        assert_eq!(optimizer.learn_rate(0, &stub_key()).unwrap(), 0.123);
        assert_eq!(optimizer.use_radam(), name == "RAdam.v1");
    }
}

#[test]
fn test_resolve_sequence_learn_rate() {
    let mut optimizer =
        resolve(&json!({"@optimizers": "Adam.v1", "learn_rate": [0.9, 0.8, 0.7]})).unwrap();
    let key = stub_key();
    assert_eq!(optimizer.learn_rate(optimizer.step(), &key).unwrap(), 0.9);
    optimizer.step_schedules().unwrap();
    assert_eq!(optimizer.learn_rate(optimizer.step(), &key).unwrap(), 0.8);
    optimizer.step_schedules().unwrap();
    assert_eq!(optimizer.learn_rate(optimizer.step(), &key).unwrap(), 0.7);
}

#[test]
fn test_resolve_invalid_learn_rate() {
    for learn_rate in [json!("hello"), json!(null), json!({"a": 1}), json!([])] {
        let result = resolve(&json!({"@optimizers": "Adam.v1", "learn_rate": learn_rate}));
        assert!(result.is_err(), "learn_rate = {learn_rate} 应被拒绝");
    }
}

#[test]
fn test_null_learn_rate_is_not_a_default() {
    let err = resolve(&json!({"@optimizers": "Adam.v1", "learn_rate": null})).unwrap_err();
    assert!(matches!(
        err,
        OptimizerError::InvalidSchedule { ref name, .. } if name == "learn_rate"
    ));

    let config = OptimizerConfig::from_json(r#"{"@optimizers": "SGD.v1", "learn_rate": null}"#)
        .unwrap();
    assert_eq!(config.learn_rate, Some(serde_json::Value::Null));
    assert!(config.build().is_err());

    // 完全省略时才取默认值
    let config = OptimizerConfig::from_json(r#"{"@optimizers": "Adam.v1"}"#).unwrap();
    assert_eq!(config.learn_rate, None);
}

#[test]
fn test_resolve_unknown_name() {
    let err = resolve(&json!({"@optimizers": "Nesterov.v1", "learn_rate": 0.1})).unwrap_err();
    assert_eq!(err, OptimizerError::UnknownOptimizer("Nesterov.v1".to_string()));
}

#[test]
fn test_resolve_unknown_field() {
    let err = resolve(&json!({"@optimizers": "SGD.v1", "learn_rate": 0.1, "momentum": 0.9}))
        .unwrap_err();
    assert!(matches!(err, OptimizerError::InvalidConfig(_)));
}

#[test]
fn test_sgd_requires_learn_rate() {
    let err = resolve(&json!({"@optimizers": "SGD.v1"})).unwrap_err();
    assert!(matches!(err, OptimizerError::InvalidConfig(_)));
}

#[test]
fn test_adam_default_learn_rate() {
    let mut optimizer = resolve(&json!({"@optimizers": "Adam.v1"})).unwrap();
    assert_eq!(
        optimizer.learn_rate(0, &stub_key()).unwrap(),
        OptimizerConfig::ADAM_LEARN_RATE
    );
}

#[test]
fn test_config_from_json_text() {
    let config = OptimizerConfig::from_json(
        r#"{"@optimizers": "RAdam.v1", "learn_rate": 0.01, "L2": 0.0, "use_averages": false, "L2_is_weight_decay": false}"#,
    )
    .unwrap();
    assert_eq!(config.kind().unwrap(), OptimizerKind::RAdam);
    assert_eq!(config.l2, Some(0.0));
    assert_eq!(config.l2_is_weight_decay, Some(false));

    let optimizer = config.build().unwrap();
    assert!(optimizer.use_radam());
    assert!(!optimizer.use_averages());
    assert!(!optimizer.l2_is_weight_decay());

    // 未给出的字段不写回
    let text = serde_json::to_string(&config).unwrap();
    assert!(!text.contains("beta1"));
    assert!(text.contains("\"@optimizers\":\"RAdam.v1\""));
}

#[test]
fn test_kind_round_trip_names() {
    for kind in [OptimizerKind::Sgd, OptimizerKind::Adam, OptimizerKind::RAdam] {
        assert_eq!(kind.to_string().parse::<OptimizerKind>().unwrap(), kind);
    }
    assert!("adam".parse::<OptimizerKind>().is_err());
}
