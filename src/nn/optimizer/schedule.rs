/*
 * @Author       : 老董
 * @Date         : 2026-10-19
 * @Description  : 超参数调度：把常数、有限序列、（可能无限的）生成器统一成按步取值的调度
 */

use std::fmt;
use std::iter::Fuse;

use serde_json::Value;

use super::core::ParamKey;
use crate::errors::OptimizerError;

/// 调度的来源
///
/// - `Constant`：任何步都返回同一个值
/// - `Sequence`：有限序列，耗尽后一直返回最后一个值
/// - `Generator`：任意迭代器（可以是无限的），按步惰性推进
pub enum ScheduleSource {
    Constant(f32),
    Sequence(Vec<f32>),
    Generator(Box<dyn Iterator<Item = f32>>),
}

impl ScheduleSource {
    /// 用任意迭代器构造生成器来源
    pub fn generator<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = f32>,
        I::IntoIter: 'static,
    {
        Self::Generator(Box::new(iter.into_iter()))
    }

    /// 从 JSON 配置值解析：数字 → 常数，数字数组 → 序列，其余皆无效
    pub fn from_json(name: &str, value: &Value) -> Result<Self, OptimizerError> {
        match value {
            Value::Number(n) => n.as_f64().map(|v| Self::Constant(v as f32)).ok_or_else(|| {
                OptimizerError::InvalidSchedule {
                    name: name.to_string(),
                    reason: format!("无法表示为浮点数：{n}"),
                }
            }),
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_f64()
                        .map(|v| v as f32)
                        .ok_or_else(|| OptimizerError::InvalidSchedule {
                            name: name.to_string(),
                            reason: format!("序列中含有非数值元素：{item}"),
                        })
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Self::Sequence),
            other => Err(OptimizerError::InvalidSchedule {
                name: name.to_string(),
                reason: format!("须为数字或数字数组，实际为：{other}"),
            }),
        }
    }
}

impl From<f32> for ScheduleSource {
    fn from(value: f32) -> Self {
        Self::Constant(value)
    }
}

impl From<Vec<f32>> for ScheduleSource {
    fn from(values: Vec<f32>) -> Self {
        Self::Sequence(values)
    }
}

impl From<&[f32]> for ScheduleSource {
    fn from(values: &[f32]) -> Self {
        Self::Sequence(values.to_vec())
    }
}

impl<const N: usize> From<[f32; N]> for ScheduleSource {
    fn from(values: [f32; N]) -> Self {
        Self::Sequence(values.to_vec())
    }
}

impl fmt::Debug for ScheduleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(v) => f.debug_tuple("Constant").field(v).finish(),
            Self::Sequence(values) => f.debug_tuple("Sequence").field(values).finish(),
            Self::Generator(_) => f.write_str("Generator(..)"),
        }
    }
}

/// 最近一次记录的 `(记录时的步数, 分数)`
pub type LastScore = Option<(usize, f32)>;

type CustomFn = Box<dyn FnMut(usize, &ParamKey, LastScore) -> f32>;

enum ScheduleKind {
    Constant(f32),
    /// 序列与生成器共用：只前进、不回退，缓存最近一次请求的步与值
    Lazy {
        source: Fuse<Box<dyn Iterator<Item = f32>>>,
        last_step: usize,
        value: f32,
    },
    Custom(CustomFn),
}

/// 已解析的调度
///
/// 构造时即完成来源类型的分派与空值校验，之后每次取值只走一次 `match`。
pub struct Schedule {
    name: String,
    kind: ScheduleKind,
}

impl Schedule {
    /// 由来源构造调度；序列或生成器为空时立即报错
    pub fn new(name: &str, source: impl Into<ScheduleSource>) -> Result<Self, OptimizerError> {
        let kind = match source.into() {
            ScheduleSource::Constant(value) => ScheduleKind::Constant(value),
            ScheduleSource::Sequence(values) => Self::lazy(name, Box::new(values.into_iter()))?,
            ScheduleSource::Generator(source) => Self::lazy(name, source)?,
        };
        Ok(Self {
            name: name.to_string(),
            kind,
        })
    }

    /// 常数调度（不会失败）
    pub fn constant(name: &str, value: f32) -> Self {
        Self {
            name: name.to_string(),
            kind: ScheduleKind::Constant(value),
        }
    }

    /// 由调用方提供的函数 `(step, key, last_score) -> value` 构成的调度
    pub fn custom<F>(name: &str, f: F) -> Self
    where
        F: FnMut(usize, &ParamKey, LastScore) -> f32 + 'static,
    {
        Self {
            name: name.to_string(),
            kind: ScheduleKind::Custom(Box::new(f)),
        }
    }

    fn lazy(
        name: &str,
        mut source: Box<dyn Iterator<Item = f32>>,
    ) -> Result<ScheduleKind, OptimizerError> {
        let value = source.next().ok_or_else(|| OptimizerError::EmptySchedule {
            name: name.to_string(),
        })?;
        Ok(ScheduleKind::Lazy {
            source: source.fuse(),
            last_step: 0,
            value,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 校验能否取第`step`步的值：只有序列/生成器会因步数回退而失败
    pub fn check_step(&self, step: usize) -> Result<(), OptimizerError> {
        match self.kind {
            ScheduleKind::Lazy { last_step, .. } if step < last_step => {
                Err(OptimizerError::StepDecreased {
                    name: self.name.clone(),
                    last_step,
                    step,
                })
            }
            _ => Ok(()),
        }
    }

    /// 取第`step`步的值
    ///
    /// 对序列/生成器：同一步重复请求返回缓存值；更大的步按差值推进来源，
    /// 来源耗尽后保持最后产出的值；更小的步返回 `StepDecreased`。
    /// 自定义调度还会收到`key`与`last_score`。
    pub fn value(
        &mut self,
        step: usize,
        key: &ParamKey,
        last_score: LastScore,
    ) -> Result<f32, OptimizerError> {
        self.check_step(step)?;
        match &mut self.kind {
            ScheduleKind::Constant(value) => Ok(*value),
            ScheduleKind::Custom(f) => Ok(f(step, key, last_score)),
            ScheduleKind::Lazy {
                source,
                last_step,
                value,
            } => {
                while *last_step < step {
                    match source.next() {
                        Some(next) => {
                            *last_step += 1;
                            *value = next;
                        }
                        None => *last_step = step,
                    }
                }
                Ok(*value)
            }
        }
    }
}

impl fmt::Debug for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            ScheduleKind::Constant(v) => format!("Constant({v})"),
            ScheduleKind::Lazy {
                last_step, value, ..
            } => format!("Lazy {{ last_step: {last_step}, value: {value} }}"),
            ScheduleKind::Custom(_) => "Custom(..)".to_string(),
        };
        f.debug_struct("Schedule")
            .field("name", &self.name)
            .field("kind", &kind)
            .finish()
    }
}
