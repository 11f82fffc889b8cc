/*
 * @Author       : 老董
 * @Date         : 2026-10-19
 * @Description  : Optimizer：按参数键维护矩估计状态，按调度取超参数，原地更新权重
 *
 * 单次更新流程（`call`）：
 * 1. 梯度为空 → 直接返回
 * 2. L2 不作为权重衰减时，先并入梯度：g += L2 * w
 * 3. 梯度裁剪（按 L2 范数）
 * 4. 更新规则：RAdam / Adam（beta2 > 0）/ SGD
 * 5. 梯度清零
 * 6. L2 作为权重衰减：w -= lr * L2 * w
 * 7. 维护参数的滑动平均（可选）
 */

use std::collections::HashMap;
use std::fmt;

use ndarray::{Array1, ArrayViewMut, Dimension, Zip};
use serde::{Deserialize, Serialize};

use super::schedule::{LastScore, Schedule, ScheduleSource};
use crate::errors::OptimizerError;

/// 参数键：`(层 id, 参数名)`
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParamKey {
    pub layer_id: u64,
    pub name: String,
}

impl ParamKey {
    pub fn new(layer_id: u64, name: impl Into<String>) -> Self {
        Self {
            layer_id,
            name: name.into(),
        }
    }
}

impl From<(u64, &str)> for ParamKey {
    fn from((layer_id, name): (u64, &str)) -> Self {
        Self::new(layer_id, name)
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {:?})", self.layer_id, self.name)
    }
}

/// 可挂调度的超参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hyperparam {
    LearnRate,
    Beta1,
    Beta2,
    L2,
    GradClip,
}

impl Hyperparam {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::LearnRate => "learn_rate",
            Self::Beta1 => "beta1",
            Self::Beta2 => "beta2",
            Self::L2 => "L2",
            Self::GradClip => "grad_clip",
        }
    }
}

/// 某一步、某个参数键下的超参数取值
#[derive(Debug, Clone, Copy)]
struct Hyperparams {
    learn_rate: f32,
    beta1: f32,
    beta2: f32,
    l2: f32,
    grad_clip: f32,
}

/// 梯度优化器
///
/// 同一个实例可服务任意多个参数键，每个键的矩估计在首次见到时惰性创建，互不干扰。
/// 超参数均可挂调度；`step_schedules()` 推进全局步数并让所有调度前进到新的一步。
///
/// # 使用示例
/// ```ignore
/// let mut optimizer = Optimizer::new(vec![0.9_f32, 0.8, 0.7])?
///     .with_beta1(0.9)
///     .with_beta2(0.999);
/// let key = ParamKey::new(layer.id(), "params");
/// optimizer.call(key, weights.view_mut(), gradient.view_mut())?;
/// optimizer.step_schedules()?;
/// ```
pub struct Optimizer {
    learn_rate: Schedule,
    beta1: Schedule,
    beta2: Schedule,
    l2: Schedule,
    grad_clip: Schedule,
    /// 数值稳定项
    eps: f32,
    use_averages: bool,
    use_radam: bool,
    l2_is_weight_decay: bool,
    /// 一阶矩估计
    mom1: HashMap<ParamKey, Array1<f32>>,
    /// 二阶矩估计
    mom2: HashMap<ParamKey, Array1<f32>>,
    /// 参数滑动平均
    averages: HashMap<ParamKey, Array1<f32>>,
    /// 每个键已执行的更新次数
    nr_update: HashMap<ParamKey, usize>,
    step: usize,
    last_score: LastScore,
}

impl Optimizer {
    pub const DEFAULT_EPS: f32 = 1e-8;
    pub const DEFAULT_L2: f32 = 1e-6;
    pub const DEFAULT_GRAD_CLIP: f32 = 1.0;

    /// 创建优化器
    ///
    /// 未显式设置时 beta1 = beta2 = 0（即普通 SGD），L2 = 1e-6（作为权重衰减），
    /// 梯度裁剪阈值 1.0，维护参数滑动平均。
    ///
    /// # 错误
    /// 学习率来源为空序列/空生成器时返回 `EmptySchedule`
    pub fn new(learn_rate: impl Into<ScheduleSource>) -> Result<Self, OptimizerError> {
        Ok(Self {
            learn_rate: Schedule::new(Hyperparam::LearnRate.name(), learn_rate)?,
            beta1: Schedule::constant(Hyperparam::Beta1.name(), 0.0),
            beta2: Schedule::constant(Hyperparam::Beta2.name(), 0.0),
            l2: Schedule::constant(Hyperparam::L2.name(), Self::DEFAULT_L2),
            grad_clip: Schedule::constant(Hyperparam::GradClip.name(), Self::DEFAULT_GRAD_CLIP),
            eps: Self::DEFAULT_EPS,
            use_averages: true,
            use_radam: false,
            l2_is_weight_decay: true,
            mom1: HashMap::new(),
            mom2: HashMap::new(),
            averages: HashMap::new(),
            nr_update: HashMap::new(),
            step: 0,
            last_score: None,
        })
    }

    pub fn with_beta1(mut self, beta1: f32) -> Self {
        self.beta1 = Schedule::constant(Hyperparam::Beta1.name(), beta1);
        self
    }

    pub fn with_beta2(mut self, beta2: f32) -> Self {
        self.beta2 = Schedule::constant(Hyperparam::Beta2.name(), beta2);
        self
    }

    pub fn with_eps(mut self, eps: f32) -> Self {
        self.eps = eps;
        self
    }

    pub fn with_l2(mut self, l2: f32) -> Self {
        self.l2 = Schedule::constant(Hyperparam::L2.name(), l2);
        self
    }

    /// 梯度裁剪阈值，0 表示不裁剪
    pub fn with_grad_clip(mut self, grad_clip: f32) -> Self {
        self.grad_clip = Schedule::constant(Hyperparam::GradClip.name(), grad_clip);
        self
    }

    pub fn with_averages(mut self, use_averages: bool) -> Self {
        self.use_averages = use_averages;
        self
    }

    pub fn with_radam(mut self, use_radam: bool) -> Self {
        self.use_radam = use_radam;
        self
    }

    pub fn with_l2_is_weight_decay(mut self, l2_is_weight_decay: bool) -> Self {
        self.l2_is_weight_decay = l2_is_weight_decay;
        self
    }

    /// 为某个超参数挂上调度（常数、序列或生成器）
    pub fn set_schedule(
        &mut self,
        param: Hyperparam,
        source: impl Into<ScheduleSource>,
    ) -> Result<(), OptimizerError> {
        *self.schedule_mut(param) = Schedule::new(param.name(), source)?;
        Ok(())
    }

    /// 用自定义函数 `(step, key, last_score) -> lr` 替换学习率，之后的所有更新都以它为准
    pub fn set_learn_rate<F>(&mut self, f: F)
    where
        F: FnMut(usize, &ParamKey, LastScore) -> f32 + 'static,
    {
        self.learn_rate = Schedule::custom(Hyperparam::LearnRate.name(), f);
    }

    /// 第`step`步、参数`key`的学习率
    ///
    /// 通用调度忽略`key`；自定义学习率函数会收到它以及最近记录的分数。
    pub fn learn_rate(&mut self, step: usize, key: &ParamKey) -> Result<f32, OptimizerError> {
        self.learn_rate.value(step, key, self.last_score)
    }

    pub const fn step(&self) -> usize {
        self.step
    }

    pub const fn eps(&self) -> f32 {
        self.eps
    }

    pub const fn use_averages(&self) -> bool {
        self.use_averages
    }

    pub const fn use_radam(&self) -> bool {
        self.use_radam
    }

    pub const fn l2_is_weight_decay(&self) -> bool {
        self.l2_is_weight_decay
    }

    /// 最近一次记录的 `(记录时的步数, 分数)`
    pub const fn last_score(&self) -> LastScore {
        self.last_score
    }

    /// 以当前步数记录分数
    pub fn set_last_score(&mut self, score: f32) {
        self.last_score = Some((self.step, score));
    }

    /// 推进全局步数，并让所有调度取新一步的值（不更新任何权重）
    ///
    /// 任一调度无法前进到新的一步时返回错误，步数与所有调度均保持不变。
    pub fn step_schedules(&mut self) -> Result<(), OptimizerError> {
        let step = self.step + 1;
        for schedule in [
            &self.learn_rate,
            &self.beta1,
            &self.beta2,
            &self.l2,
            &self.grad_clip,
        ] {
            schedule.check_step(step)?;
        }

        let key = ParamKey::default();
        let last_score = self.last_score;
        for schedule in [
            &mut self.learn_rate,
            &mut self.beta1,
            &mut self.beta2,
            &mut self.l2,
            &mut self.grad_clip,
        ] {
            schedule.value(step, &key, last_score)?;
        }
        self.step = step;
        log::debug!("优化器调度前进到第{step}步");
        Ok(())
    }

    /// 参数`key`已执行的更新次数
    pub fn nr_update(&self, key: &ParamKey) -> usize {
        self.nr_update.get(key).copied().unwrap_or(0)
    }

    /// 参数`key`的一阶矩估计
    pub fn first_moment(&self, key: &ParamKey) -> Option<&Array1<f32>> {
        self.mom1.get(key)
    }

    /// 参数`key`的二阶矩估计
    pub fn second_moment(&self, key: &ParamKey) -> Option<&Array1<f32>> {
        self.mom2.get(key)
    }

    pub fn averages(&self) -> &HashMap<ParamKey, Array1<f32>> {
        &self.averages
    }

    pub fn average(&self, key: &ParamKey) -> Option<&Array1<f32>> {
        self.averages.get(key)
    }

    /// 清空所有参数键的矩估计、滑动平均与更新计数
    ///
    /// 全局步数与调度不受影响：调度只能前进。
    pub fn reset(&mut self) {
        self.mom1.clear();
        self.mom2.clear();
        self.averages.clear();
        self.nr_update.clear();
    }

    /// 对参数`key`执行一次更新，等价于 `call_scaled(key, weights, gradient, 1.0)`
    pub fn call<'g, D, E>(
        &mut self,
        key: ParamKey,
        weights: ArrayViewMut<'_, f32, D>,
        gradient: ArrayViewMut<'g, f32, E>,
    ) -> Result<(ParamKey, ArrayViewMut<'g, f32, E>), OptimizerError>
    where
        D: Dimension,
        E: Dimension,
    {
        self.call_scaled(key, weights, gradient, 1.0)
    }

    /// 对参数`key`执行一次更新，学习率额外乘以`lr_scale`
    ///
    /// 权重原地更新；非空梯度在更新后清零。权重与梯度按逻辑顺序一一对应，
    /// 二者的维度可以不同，但元素个数必须一致。
    ///
    /// 返回传入的键与梯度视图。
    pub fn call_scaled<'g, D, E>(
        &mut self,
        key: ParamKey,
        mut weights: ArrayViewMut<'_, f32, D>,
        mut gradient: ArrayViewMut<'g, f32, E>,
        lr_scale: f32,
    ) -> Result<(ParamKey, ArrayViewMut<'g, f32, E>), OptimizerError>
    where
        D: Dimension,
        E: Dimension,
    {
        if gradient.is_empty() {
            return Ok((key, gradient));
        }
        if weights.len() != gradient.len() {
            return Err(OptimizerError::ShapeMismatch {
                key: key.to_string(),
                weights: weights.len(),
                gradient: gradient.len(),
            });
        }

        let hp = self.hyperparams(&key)?;
        let lr = hp.learn_rate * lr_scale;
        let nr_upd = self.nr_update(&key) + 1;

        let mut w: Array1<f32> = weights.iter().copied().collect();
        let mut g: Array1<f32> = gradient.iter().copied().collect();

        if hp.l2 != 0.0 && !self.l2_is_weight_decay {
            g.scaled_add(hp.l2, &w);
        }
        if hp.grad_clip > 0.0 {
            clip_gradient(&mut g, hp.grad_clip);
        }

        if self.use_radam {
            self.radam(&key, &mut w, &g, nr_upd, lr, hp)?;
        } else if hp.beta2 > 0.0 {
            self.adam(&key, &mut w, &g, nr_upd, lr, hp)?;
        } else {
            w.scaled_add(-lr, &g);
        }

        if hp.l2 != 0.0 && self.l2_is_weight_decay {
            w *= 1.0 - lr * hp.l2;
        }
        if self.use_averages {
            self.update_average(&key, &w, nr_upd)?;
        }

        self.nr_update.insert(key.clone(), nr_upd);
        weights
            .iter_mut()
            .zip(w.iter())
            .for_each(|(dst, &src)| *dst = src);
        gradient.fill(0.0);
        Ok((key, gradient))
    }

    fn schedule_mut(&mut self, param: Hyperparam) -> &mut Schedule {
        match param {
            Hyperparam::LearnRate => &mut self.learn_rate,
            Hyperparam::Beta1 => &mut self.beta1,
            Hyperparam::Beta2 => &mut self.beta2,
            Hyperparam::L2 => &mut self.l2,
            Hyperparam::GradClip => &mut self.grad_clip,
        }
    }

    fn hyperparams(&mut self, key: &ParamKey) -> Result<Hyperparams, OptimizerError> {
        let (step, score) = (self.step, self.last_score);
        Ok(Hyperparams {
            learn_rate: self.learn_rate.value(step, key, score)?,
            beta1: self.beta1.value(step, key, score)?,
            beta2: self.beta2.value(step, key, score)?,
            l2: self.l2.value(step, key, score)?,
            grad_clip: self.grad_clip.value(step, key, score)?,
        })
    }

    /// 取出（必要时创建）参数`key`的一、二阶矩
    fn moments(
        &mut self,
        key: &ParamKey,
        len: usize,
    ) -> Result<(&mut Array1<f32>, &mut Array1<f32>), OptimizerError> {
        if !self.mom1.contains_key(key) {
            log::debug!("为参数{key}创建矩估计，长度{len}");
        }
        let mom1 = self
            .mom1
            .entry(key.clone())
            .or_insert_with(|| Array1::zeros(len));
        let mom2 = self
            .mom2
            .entry(key.clone())
            .or_insert_with(|| Array1::zeros(len));
        if mom1.len() != len || mom2.len() != len {
            return Err(OptimizerError::StateMismatch {
                key: key.to_string(),
                expected: mom1.len(),
                got: len,
            });
        }
        Ok((mom1, mom2))
    }

    /// Adam：
    /// - m = β1 * m + (1 - β1) * g
    /// - v = β2 * v + (1 - β2) * g²
    /// - θ = θ - lr * √(1 - β2^t) / (1 - β1^t) * m / (√v + ε)
    fn adam(
        &mut self,
        key: &ParamKey,
        w: &mut Array1<f32>,
        g: &Array1<f32>,
        nr_upd: usize,
        lr: f32,
        hp: Hyperparams,
    ) -> Result<(), OptimizerError> {
        let eps = self.eps;
        let (b1, b2) = (hp.beta1, hp.beta2);
        let fix1 = 1.0 - b1.powi(nr_upd as i32);
        let fix2 = 1.0 - b2.powi(nr_upd as i32);
        let lr_t = lr * fix2.sqrt() / fix1;

        let (mom1, mom2) = self.moments(key, w.len())?;
        Zip::from(w)
            .and(mom1)
            .and(mom2)
            .and(g)
            .for_each(|w, m1, m2, &g| {
                *m1 = b1 * *m1 + (1.0 - b1) * g;
                *m2 = b2 * *m2 + (1.0 - b2) * g * g;
                *w -= lr_t * *m1 / (m2.sqrt() + eps);
            });
        Ok(())
    }

    /// RAdam（Rectified Adam）：
    /// - ρ∞ = 2 / (1 - β2) - 1
    /// - ρt = ρ∞ - 2t·β2^t / (1 - β2^t)
    /// - ρt ≥ 5：自适应步长乘以修正项 r
    /// - 否则：退化为仅用一阶矩（偏差修正后）的动量 SGD
    fn radam(
        &mut self,
        key: &ParamKey,
        w: &mut Array1<f32>,
        g: &Array1<f32>,
        nr_upd: usize,
        lr: f32,
        hp: Hyperparams,
    ) -> Result<(), OptimizerError> {
        let eps = self.eps;
        let (b1, b2) = (hp.beta1, hp.beta2);
        let t = nr_upd as i32;
        let beta2_t = b2.powi(t);
        let bias1 = 1.0 - b1.powi(t);
        let rho_inf = 2.0 / (1.0 - b2) - 1.0;
        let rho_t = rho_inf - 2.0 * nr_upd as f32 * beta2_t / (1.0 - beta2_t);

        let (mom1, mom2) = self.moments(key, w.len())?;
        Zip::from(&mut *mom1)
            .and(&mut *mom2)
            .and(g)
            .for_each(|m1, m2, &g| {
                *m1 = b1 * *m1 + (1.0 - b1) * g;
                *m2 = b2 * *m2 + (1.0 - b2) * g * g;
            });

        if rho_t >= 5.0 {
            let r = ((1.0 - beta2_t) * (rho_t - 4.0) / (rho_inf - 4.0) * (rho_t - 2.0) / rho_t
                * rho_inf
                / (rho_inf - 2.0))
                .sqrt();
            let step_size = lr * r / bias1;
            Zip::from(w)
                .and(&*mom1)
                .and(&*mom2)
                .for_each(|w, &m1, &m2| *w -= step_size * m1 / (m2.sqrt() + eps));
        } else {
            let step_size = lr / bias1;
            w.scaled_add(-step_size, &*mom1);
        }
        Ok(())
    }

    /// 参数滑动平均：decay = min((1 + t) / (10 + t), 0.9999)，avg -= (1 - decay) * (avg - w)
    fn update_average(
        &mut self,
        key: &ParamKey,
        w: &Array1<f32>,
        nr_upd: usize,
    ) -> Result<(), OptimizerError> {
        let average = self
            .averages
            .entry(key.clone())
            .or_insert_with(|| Array1::zeros(w.len()));
        if average.len() != w.len() {
            return Err(OptimizerError::StateMismatch {
                key: key.to_string(),
                expected: average.len(),
                got: w.len(),
            });
        }
        let t = nr_upd as f32;
        let decay = ((1.0 + t) / (10.0 + t)).min(0.9999);
        Zip::from(average)
            .and(w)
            .for_each(|avg, &w| *avg -= (1.0 - decay) * (*avg - w));
        Ok(())
    }
}

/// 梯度的 L2 范数不小于`threshold`时，将其缩放到范数恰为`threshold`
fn clip_gradient(gradient: &mut Array1<f32>, threshold: f32) {
    let norm = gradient.iter().map(|g| g * g).sum::<f32>().sqrt();
    if norm >= threshold && norm > 0.0 {
        *gradient *= threshold / norm;
    }
}

impl fmt::Debug for Optimizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Optimizer")
            .field("learn_rate", &self.learn_rate)
            .field("beta1", &self.beta1)
            .field("beta2", &self.beta2)
            .field("L2", &self.l2)
            .field("grad_clip", &self.grad_clip)
            .field("eps", &self.eps)
            .field("use_averages", &self.use_averages)
            .field("use_radam", &self.use_radam)
            .field("L2_is_weight_decay", &self.l2_is_weight_decay)
            .field("step", &self.step)
            .field("last_score", &self.last_score)
            .field("nr_keys", &self.nr_update.len())
            .finish()
    }
}
