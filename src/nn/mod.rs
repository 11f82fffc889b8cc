/*
 * @Author       : 老董
 * @Date         : 2024-01-31 20:23:53
 * @LastEditors  : 老董
 * @LastEditTime : 2026-10-19
 * @Description  : 负责神经网络（neural network）的构建：层与优化器
 */

pub mod layer;
pub mod optimizer;

pub use layer::{Affine, FinishUpdate};
pub use optimizer::{
    Hyperparam, LastScore, Optimizer, OptimizerConfig, OptimizerKind, ParamKey, Schedule,
    ScheduleSource, resolve,
};
