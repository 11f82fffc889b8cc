//! # thinc_rs
//!
//! 神经网络工具箱的核心部分：
//! - 带学习率调度（常数、有限序列、惰性生成器）的梯度优化器，支持 SGD / Adam / RAdam；
//! - 可从共享参数池分配权重的 Affine（仿射）层，反向传播时把参数梯度交给调用方的更新函数。
//!
//! ```ignore
//! let mut optimizer = resolve(&json!({"@optimizers": "Adam.v1", "learn_rate": 0.001}))?;
//! let mut fc = Affine::new(NdArrayOps::new(), 10, 6);
//! fc.initialize_weights(None, None)?;
//! let key = ParamKey::new(fc.id(), "params");
//! let (y, finish_update) = fc.begin_update(&x)?;
//! let dx = finish_update.call(&dy, |w, g| optimizer.call(key.clone(), w, g).map(|_| ()))?;
//! optimizer.step_schedules()?;
//! ```

pub mod errors;
pub mod nn;
pub mod ops;

pub use errors::{Error, OptimizerError, ShapeError};
pub use nn::{Affine, Optimizer, ParamKey, resolve};
pub use ops::{NdArrayOps, Ops, ParamPool};
