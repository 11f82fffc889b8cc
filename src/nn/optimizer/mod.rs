/*
 * @Author       : 老董
 * @Date         : 2026-10-19
 * @Description  : 优化器模块：超参数调度、SGD/Adam/RAdam 更新规则、按名称构造的注册表
 */

mod config;
mod core;
mod schedule;

pub use config::{OptimizerConfig, OptimizerKind, resolve};
pub use self::core::{Hyperparam, Optimizer, ParamKey};
pub use schedule::{LastScore, Schedule, ScheduleSource};
