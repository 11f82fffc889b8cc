/*
 * @Author       : 老董
 * @Date         : 2026-10-19
 * @Description  : Affine（仿射/全连接）层：output = input @ Wᵀ + b
 *
 * 参数按扁平布局存放（长度 nr_weight = nr_out * nr_in + nr_out）：
 * 前 nr_out * nr_in 个元素为按行展开的 W [nr_out, nr_in]，其后 nr_out 个为 b。
 * 存储可以是层自己分配的，也可以是从参数池中切出的一段。
 */

use std::sync::atomic::{AtomicU64, Ordering};

use ndarray::{
    Array1, Array2, ArrayBase, ArrayD, ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2, Axis,
    Data, Dimension, Ix1, Ix2,
};

use crate::errors::{Error, OptimizerError, ShapeError};
use crate::ops::{NdArrayOps, Ops, ParamPool, PoolSlice};

static NEXT_LAYER_ID: AtomicU64 = AtomicU64::new(1);

/// 层参数的存储位置
#[derive(Debug)]
enum ParamStore {
    /// 层自己持有
    Owned(Array1<f32>),
    /// 参数池中的一段（池持有数据）
    Pooled(PoolSlice),
}

impl ParamStore {
    fn with_view<R>(&self, f: impl FnOnce(ArrayView1<'_, f32>) -> R) -> Result<R, Error> {
        match self {
            Self::Owned(data) => Ok(f(data.view())),
            Self::Pooled(slice) => slice.with_view(f),
        }
    }

    fn with_view_mut<R>(&mut self, f: impl FnOnce(ArrayViewMut1<'_, f32>) -> R) -> Result<R, Error> {
        match self {
            Self::Owned(data) => Ok(f(data.view_mut())),
            Self::Pooled(slice) => slice.with_view_mut(f),
        }
    }
}

/// 把扁平参数拆成 W [nr_out, nr_in] 与 b [nr_out]
fn split_params(
    flat: ArrayView1<'_, f32>,
    nr_out: usize,
    nr_in: usize,
) -> Result<(ArrayView2<'_, f32>, ArrayView1<'_, f32>), ShapeError> {
    let (w, b) = flat.split_at(Axis(0), nr_out * nr_in);
    Ok((w.into_shape((nr_out, nr_in))?, b))
}

fn split_params_mut(
    flat: ArrayViewMut1<'_, f32>,
    nr_out: usize,
    nr_in: usize,
) -> Result<(ArrayViewMut2<'_, f32>, ArrayViewMut1<'_, f32>), ShapeError> {
    let (w, b) = flat.split_at(Axis(0), nr_out * nr_in);
    Ok((w.into_shape((nr_out, nr_in))?, b))
}

/// 校验输入为 [batch, nr_in] 的二维批量数据
fn as_batch<S, D>(input: &ArrayBase<S, D>, nr_in: usize) -> Result<ArrayView2<'_, f32>, ShapeError>
where
    S: Data<Elem = f32>,
    D: Dimension,
{
    if input.ndim() != 2 {
        return Err(ShapeError::NotBatch {
            expected: 2,
            got: input.shape().to_vec(),
        });
    }
    let x = input.view().into_dimensionality::<Ix2>()?;
    if x.ncols() != nr_in {
        return Err(ShapeError::DimensionMismatch {
            axis: 1,
            expected: nr_in,
            got: x.ncols(),
            shape: x.shape().to_vec(),
        });
    }
    Ok(x)
}

/// Affine 层
///
/// # 输入/输出形状
/// - 输入：[batch_size, nr_in]
/// - 输出：[batch_size, nr_out]
///
/// # 使用示例
/// ```ignore
/// let ops = NdArrayOps::seeded(42);
/// let pool = ops.allocate_pool(nr_weight);
/// let mut fc = Affine::new(ops, 10, 6);
/// fc.initialize_weights(None, Some(&pool))?;
///
/// let key = ParamKey::new(fc.id(), "params");
/// let (y, finish_update) = fc.begin_update(&x)?;
/// let dx = finish_update.call(&dy, |w, g| optimizer.call(key.clone(), w, g).map(|_| ()))?;
/// ```
#[derive(Debug)]
pub struct Affine<O: Ops = NdArrayOps> {
    id: u64,
    nr_out: usize,
    nr_in: usize,
    ops: O,
    /// 未初始化时为 None
    params: Option<ParamStore>,
    /// 参数梯度（与参数同布局，反向传播时累加）
    d_params: Array1<f32>,
}

impl<O: Ops> Affine<O> {
    /// 创建未初始化的 Affine 层，输出/输入维度在此固定
    pub fn new(ops: O, nr_out: usize, nr_in: usize) -> Self {
        Self {
            id: NEXT_LAYER_ID.fetch_add(1, Ordering::Relaxed),
            nr_out,
            nr_in,
            ops,
            params: None,
            d_params: Array1::zeros(nr_out * nr_in + nr_out),
        }
    }

    /// 进程内唯一的层 id（用作优化器参数键的一部分）
    pub const fn id(&self) -> u64 {
        self.id
    }

    pub const fn nr_out(&self) -> usize {
        self.nr_out
    }

    pub const fn nr_in(&self) -> usize {
        self.nr_in
    }

    /// 参数总数：nr_out * nr_in + nr_out
    pub const fn nr_weight(&self) -> usize {
        self.nr_out * self.nr_in + self.nr_out
    }

    pub const fn ops(&self) -> &O {
        &self.ops
    }

    pub const fn is_initialized(&self) -> bool {
        self.params.is_some()
    }

    /// 是否从参数池分配
    pub const fn is_pooled(&self) -> bool {
        matches!(self.params, Some(ParamStore::Pooled(_)))
    }

    /// 分配并初始化参数：W 用 Xavier 均匀分布，b 置零
    ///
    /// - `input`: 可选的样例输入，给出时按批量输入的规则校验形状
    /// - `data`: 可选的参数池，给出时从池中切出 nr_weight 个元素，否则由层自己分配
    ///
    /// 已初始化的层再次调用不做任何事。
    pub fn initialize_weights(
        &mut self,
        input: Option<&ArrayD<f32>>,
        data: Option<&ParamPool>,
    ) -> Result<(), Error> {
        if self.params.is_some() {
            log::debug!("层{}已初始化，忽略重复的 initialize_weights", self.name());
            return Ok(());
        }
        if let Some(input) = input {
            as_batch(input, self.nr_in)?;
        }

        let nr_weight = self.nr_weight();
        let mut store = match data {
            Some(pool) => ParamStore::Pooled(pool.allocate(nr_weight)),
            None => ParamStore::Owned(
                self.ops
                    .allocate(&[nr_weight])
                    .into_dimensionality::<Ix1>()
                    .map_err(ShapeError::from)?,
            ),
        };

        let (nr_out, nr_in) = (self.nr_out, self.nr_in);
        let ops = &self.ops;
        store.with_view_mut(|flat| -> Result<(), ShapeError> {
            let (w, mut b) = split_params_mut(flat, nr_out, nr_in)?;
            ops.xavier_uniform_init(w);
            b.fill(0.0);
            Ok(())
        })??;

        log::debug!(
            "初始化层{}：W[{nr_out}, {nr_in}]，b[{nr_out}]，{}",
            self.name(),
            if data.is_some() { "参数池" } else { "独立分配" }
        );
        self.params = Some(store);
        Ok(())
    }

    /// 权重 W [nr_out, nr_in] 的拷贝；未初始化（或参数池已释放）时为 None
    pub fn weights(&self) -> Option<Array2<f32>> {
        let (nr_out, nr_in) = (self.nr_out, self.nr_in);
        self.params
            .as_ref()?
            .with_view(|flat| split_params(flat, nr_out, nr_in).map(|(w, _)| w.to_owned()))
            .ok()?
            .ok()
    }

    /// 偏置 b [nr_out] 的拷贝；未初始化（或参数池已释放）时为 None
    pub fn bias(&self) -> Option<Array1<f32>> {
        let (nr_out, nr_in) = (self.nr_out, self.nr_in);
        self.params
            .as_ref()?
            .with_view(|flat| split_params(flat, nr_out, nr_in).map(|(_, b)| b.to_owned()))
            .ok()?
            .ok()
    }

    /// 原地修改 W
    pub fn with_weights_mut<R>(
        &mut self,
        f: impl FnOnce(ArrayViewMut2<'_, f32>) -> R,
    ) -> Result<R, Error> {
        let (nr_out, nr_in) = (self.nr_out, self.nr_in);
        let result = self
            .store_mut()?
            .with_view_mut(|flat| split_params_mut(flat, nr_out, nr_in).map(|(w, _)| f(w)))??;
        Ok(result)
    }

    /// 原地修改 b
    pub fn with_bias_mut<R>(
        &mut self,
        f: impl FnOnce(ArrayViewMut1<'_, f32>) -> R,
    ) -> Result<R, Error> {
        let (nr_out, nr_in) = (self.nr_out, self.nr_in);
        let result = self
            .store_mut()?
            .with_view_mut(|flat| split_params_mut(flat, nr_out, nr_in).map(|(_, b)| f(b)))??;
        Ok(result)
    }

    /// 累积的参数梯度（扁平布局）
    pub fn gradient(&self) -> ArrayView1<'_, f32> {
        self.d_params.view()
    }

    /// 批量前向：[batch, nr_in] → [batch, nr_out]
    ///
    /// 输入不是二维、或第二维不等于 nr_in 时返回形状错误。
    pub fn predict_batch<S, D>(&self, input: &ArrayBase<S, D>) -> Result<Array2<f32>, Error>
    where
        S: Data<Elem = f32>,
        D: Dimension,
    {
        let x = as_batch(input, self.nr_in)?;
        self.forward(x)
    }

    /// 前向并返回反向传播的后续步骤
    ///
    /// 形状校验与 `predict_batch` 相同；返回的 [`FinishUpdate`] 持有输入的拷贝。
    pub fn begin_update<S, D>(
        &mut self,
        input: &ArrayBase<S, D>,
    ) -> Result<(Array2<f32>, FinishUpdate<'_, O>), Error>
    where
        S: Data<Elem = f32>,
        D: Dimension,
    {
        let x = as_batch(input, self.nr_in)?;
        let output = self.forward(x.view())?;
        let input = x.to_owned();
        Ok((output, FinishUpdate { layer: self, input }))
    }

    fn forward(&self, x: ArrayView2<'_, f32>) -> Result<Array2<f32>, Error> {
        let (nr_out, nr_in) = (self.nr_out, self.nr_in);
        let output = self.store()?.with_view(|flat| -> Result<_, ShapeError> {
            let (w, b) = split_params(flat, nr_out, nr_in)?;
            Ok(self.ops.affine(w, b, x))
        })??;
        Ok(output)
    }

    fn store(&self) -> Result<&ParamStore, Error> {
        self.params.as_ref().ok_or_else(|| Error::Uninitialized {
            layer: self.name(),
        })
    }

    fn store_mut(&mut self) -> Result<&mut ParamStore, Error> {
        let name = self.name();
        self.params
            .as_mut()
            .ok_or(Error::Uninitialized { layer: name })
    }

    fn name(&self) -> String {
        format!("affine#{}", self.id)
    }
}

/// `begin_update` 返回的反向传播步骤
///
/// 调用 [`FinishUpdate::call`] 时：
/// 1. 累加参数梯度：dW += dYᵀ @ X，db += Σ_batch dY
/// 2. 计算输入梯度：dX = dY @ W
/// 3. 把扁平的参数与参数梯度交给调用方的更新函数（通常是优化器）
pub struct FinishUpdate<'a, O: Ops> {
    layer: &'a mut Affine<O>,
    input: Array2<f32>,
}

impl<O: Ops> FinishUpdate<'_, O> {
    /// 前向时的输入
    pub fn input(&self) -> &Array2<f32> {
        &self.input
    }

    /// 以输出梯度`d_output`[batch, nr_out] 执行反向传播，返回与输入同形状的输入梯度
    ///
    /// `update(params, gradient)` 收到的是长度为 nr_weight 的扁平视图。
    pub fn call<S, D, F>(self, d_output: &ArrayBase<S, D>, mut update: F) -> Result<Array2<f32>, Error>
    where
        S: Data<Elem = f32>,
        D: Dimension,
        F: FnMut(ArrayViewMut1<'_, f32>, ArrayViewMut1<'_, f32>) -> Result<(), OptimizerError>,
    {
        let Self { layer, input } = self;
        let d_y = as_batch(d_output, layer.nr_out)?;
        if d_y.nrows() != input.nrows() {
            return Err(ShapeError::BatchMismatch {
                input: input.nrows(),
                gradient: d_y.nrows(),
            }
            .into());
        }

        let name = layer.name();
        let (nr_out, nr_in) = (layer.nr_out, layer.nr_in);
        let Affine {
            ops,
            params,
            d_params,
            ..
        } = layer;
        let store = params
            .as_mut()
            .ok_or(Error::Uninitialized { layer: name })?;

        {
            let (mut d_w, mut d_b) = split_params_mut(d_params.view_mut(), nr_out, nr_in)?;
            d_w += &ops.batch_outer(d_y.view(), input.view());
            d_b += &d_y.sum_axis(Axis(0));
        }

        let d_input = store.with_view(|flat| -> Result<_, ShapeError> {
            let (w, _) = split_params(flat, nr_out, nr_in)?;
            Ok(ops.batch_dot(d_y.view(), w.t()))
        })??;

        store.with_view_mut(|flat| update(flat, d_params.view_mut()))??;
        Ok(d_input)
    }
}
