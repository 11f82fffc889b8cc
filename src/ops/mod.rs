/*
 * @Author       : 老董
 * @Date         : 2026-10-19
 * @Description  : 张量运算后端：层与优化器只通过 `Ops` 访问数组运算，不关心具体硬件
 */

use std::cell::RefCell;

use ndarray::{Array2, ArrayD, ArrayView1, ArrayView2, ArrayViewMut2, IxDyn};
use rand::SeedableRng;
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;

mod pool;

pub use pool::{ParamPool, PoolSlice};


/// 张量运算后端
///
/// `affine` 与 `xavier_uniform_init` 必须由后端实现，其余方法给出了基于 ndarray 的默认实现。
pub trait Ops {
    /// 分配一个全零数组
    fn allocate(&self, shape: &[usize]) -> ArrayD<f32> {
        ArrayD::zeros(IxDyn(shape))
    }

    /// 分配一个含`nr_weight`个元素的参数池
    fn allocate_pool(&self, nr_weight: usize) -> ParamPool {
        ParamPool::new(nr_weight)
    }

    /// 仿射变换：`input @ Wᵀ + b`
    ///
    /// - `w`: [nr_out, nr_in]
    /// - `b`: [nr_out]
    /// - `input`: [batch, nr_in]
    ///
    /// 返回 [batch, nr_out]
    fn affine(&self, w: ArrayView2<f32>, b: ArrayView1<f32>, input: ArrayView2<f32>)
    -> Array2<f32>;

    /// 沿第 1 维收缩：`x @ yᵀ`，[n, k] × [m, k] → [n, m]
    fn batch_dot(&self, x: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32> {
        x.dot(&y.t())
    }

    /// 沿第 0 维（批）收缩：`xᵀ @ y`，[batch, n] × [batch, m] → [n, m]
    fn batch_outer(&self, x: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32> {
        x.t().dot(&y)
    }

    /// 原地执行 Xavier/Glorot 均匀分布初始化
    fn xavier_uniform_init(&self, w: ArrayViewMut2<f32>);
}

/// 基于 ndarray 的 CPU 后端
#[derive(Debug)]
pub struct NdArrayOps {
    rng: RefCell<StdRng>,
}

impl NdArrayOps {
    pub fn new() -> Self {
        Self {
            rng: RefCell::new(StdRng::from_entropy()),
        }
    }

    /// 使用固定种子（确保初始化可重复）
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: RefCell::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for NdArrayOps {
    fn default() -> Self {
        Self::new()
    }
}

impl Ops for NdArrayOps {
    fn affine(
        &self,
        w: ArrayView2<f32>,
        b: ArrayView1<f32>,
        input: ArrayView2<f32>,
    ) -> Array2<f32> {
        let mut output = input.dot(&w.t());
        output += &b;
        output
    }

    fn xavier_uniform_init(&self, mut w: ArrayViewMut2<f32>) {
        let (fan_out, fan_in) = w.dim();
        if fan_in + fan_out == 0 {
            return;
        }
        let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
        let dist = Uniform::new_inclusive(-limit, limit);
        let mut rng = self.rng.borrow_mut();
        w.iter_mut().for_each(|x| *x = dist.sample(&mut *rng));
    }
}
