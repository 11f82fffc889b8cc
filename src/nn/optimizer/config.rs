/*
 * @Author       : 老董
 * @Date         : 2026-10-19
 * @Description  : 优化器注册表：按名称（"SGD.v1" / "Adam.v1" / "RAdam.v1"）从 JSON 配置构造优化器
 *
 * 配置格式：
 * {"@optimizers": "Adam.v1", "learn_rate": 0.001, "beta1": 0.9, ...}
 * 其中 learn_rate 可以是数字或数字数组（序列调度）。
 */

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::core::Optimizer;
use super::schedule::ScheduleSource;
use crate::errors::OptimizerError;

/// 已注册的优化器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerKind {
    Sgd,
    Adam,
    RAdam,
}

impl OptimizerKind {
    pub const fn registry_name(&self) -> &'static str {
        match self {
            Self::Sgd => "SGD.v1",
            Self::Adam => "Adam.v1",
            Self::RAdam => "RAdam.v1",
        }
    }
}

impl FromStr for OptimizerKind {
    type Err = OptimizerError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "SGD.v1" => Ok(Self::Sgd),
            "Adam.v1" => Ok(Self::Adam),
            "RAdam.v1" => Ok(Self::RAdam),
            other => Err(OptimizerError::UnknownOptimizer(other.to_string())),
        }
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.registry_name())
    }
}

/// 优化器配置，未给出的字段取所选优化器的默认值
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OptimizerConfig {
    #[serde(rename = "@optimizers")]
    pub name: String,
    /// 缺省与显式的 `null` 不同：后者会作为无效调度被拒绝
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub learn_rate: Option<Value>,
    #[serde(rename = "L2", default, skip_serializing_if = "Option::is_none")]
    pub l2: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beta1: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beta2: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eps: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grad_clip: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_averages: Option<bool>,
    #[serde(
        rename = "L2_is_weight_decay",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub l2_is_weight_decay: Option<bool>,
}

/// 字段一旦出现（包括 `null`）就记为 `Some`
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl OptimizerConfig {
    pub const ADAM_LEARN_RATE: f32 = 0.001;
    pub const ADAM_BETA1: f32 = 0.9;
    pub const ADAM_BETA2: f32 = 0.999;

    /// 从 JSON 文本解析配置
    pub fn from_json(text: &str) -> Result<Self, OptimizerError> {
        serde_json::from_str(text).map_err(|e| OptimizerError::InvalidConfig(e.to_string()))
    }

    /// 从 JSON 值解析配置
    pub fn from_value(value: &Value) -> Result<Self, OptimizerError> {
        Self::deserialize(value).map_err(|e| OptimizerError::InvalidConfig(e.to_string()))
    }

    pub fn kind(&self) -> Result<OptimizerKind, OptimizerError> {
        self.name.parse()
    }

    /// 按名称查注册表并构造优化器
    pub fn build(&self) -> Result<Optimizer, OptimizerError> {
        let kind = self.kind()?;
        let learn_rate = match (&self.learn_rate, kind) {
            (Some(value), _) => ScheduleSource::from_json("learn_rate", value)?,
            (None, OptimizerKind::Adam | OptimizerKind::RAdam) => {
                ScheduleSource::Constant(Self::ADAM_LEARN_RATE)
            }
            (None, OptimizerKind::Sgd) => {
                return Err(OptimizerError::InvalidConfig(format!(
                    "{kind} 须给出 learn_rate"
                )));
            }
        };

        let (beta1, beta2) = match kind {
            OptimizerKind::Sgd => (0.0, 0.0),
            OptimizerKind::Adam | OptimizerKind::RAdam => (Self::ADAM_BETA1, Self::ADAM_BETA2),
        };

        let optimizer = Optimizer::new(learn_rate)?
            .with_beta1(self.beta1.unwrap_or(beta1))
            .with_beta2(self.beta2.unwrap_or(beta2))
            .with_eps(self.eps.unwrap_or(Optimizer::DEFAULT_EPS))
            .with_l2(self.l2.unwrap_or(Optimizer::DEFAULT_L2))
            .with_grad_clip(self.grad_clip.unwrap_or(Optimizer::DEFAULT_GRAD_CLIP))
            .with_averages(self.use_averages.unwrap_or(true))
            .with_l2_is_weight_decay(self.l2_is_weight_decay.unwrap_or(true))
            .with_radam(kind == OptimizerKind::RAdam);
        log::debug!("由注册表构造优化器：{kind}");
        Ok(optimizer)
    }
}

/// 由形如 `{"@optimizers": "Adam.v1", "learn_rate": 0.001}` 的 JSON 值构造优化器
pub fn resolve(value: &Value) -> Result<Optimizer, OptimizerError> {
    OptimizerConfig::from_value(value)?.build()
}
