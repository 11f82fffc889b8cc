/*
 * @Author       : 老董
 * @Date         : 2026-10-19
 * @Description  : 错误类型：优化器（配置/调度/状态）错误、形状错误以及对外统一的 Error
 */

use thiserror::Error;

/// 优化器相关错误
///
/// 按发生时机可分为三类：
/// - 配置错误（构造时）：`EmptySchedule`、`InvalidSchedule`、`UnknownOptimizer`、`InvalidConfig`
/// - 时序错误（调用时）：`StepDecreased`
/// - 形状错误（调用时）：`ShapeMismatch`、`StateMismatch`
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OptimizerError {
    #[error("调度`{name}`为空：序列或生成器至少需要产出一个值")]
    EmptySchedule { name: String },

    #[error("调度`{name}`无效：{reason}")]
    InvalidSchedule { name: String, reason: String },

    #[error("调度`{name}`的步数不得减少：上次请求第{last_step}步，本次请求第{step}步")]
    StepDecreased {
        name: String,
        last_step: usize,
        step: usize,
    },

    #[error("参数{key}的权重长度为{weights}，但梯度长度为{gradient}")]
    ShapeMismatch {
        key: String,
        weights: usize,
        gradient: usize,
    },

    #[error("参数{key}已记录的状态长度为{expected}，本次更新长度为{got}")]
    StateMismatch {
        key: String,
        expected: usize,
        got: usize,
    },

    #[error("未注册的优化器：`{0}`（可选：SGD.v1、Adam.v1、RAdam.v1）")]
    UnknownOptimizer(String),

    #[error("优化器配置无效：{0}")]
    InvalidConfig(String),
}

/// 输入/梯度与层参数之间的维度不匹配
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
    #[error("输入须为{expected}维的批量数据，实际形状为{got:?}")]
    NotBatch { expected: usize, got: Vec<usize> },

    #[error("第{axis}维长度须为{expected}，实际为{got}（形状{shape:?}）")]
    DimensionMismatch {
        axis: usize,
        expected: usize,
        got: usize,
        shape: Vec<usize>,
    },

    #[error("批大小不一致：输入为{input}，梯度为{gradient}")]
    BatchMismatch { input: usize, gradient: usize },

    #[error("无法重塑参数视图：{0}")]
    Layout(String),
}

impl From<ndarray::ShapeError> for ShapeError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::Layout(err.to_string())
    }
}

/// 层与优化器协作时对外暴露的统一错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error(transparent)]
    Shape(#[from] ShapeError),

    #[error(transparent)]
    Optimizer(#[from] OptimizerError),

    #[error("层{layer}尚未初始化权重，请先调用 initialize_weights")]
    Uninitialized { layer: String },

    #[error("参数池已被释放，无法访问其中的参数")]
    PoolReleased,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
