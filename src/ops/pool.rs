/*
 * @Author       : 老董
 * @Date         : 2026-10-19
 * @Description  : 参数池：一段连续的 f32 缓冲区，多个层通过游标依次切出各自的参数
 */

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use ndarray::{Array1, ArrayView1, ArrayViewMut1, s};

use crate::errors::Error;

#[derive(Debug)]
struct PoolInner {
    data: Array1<f32>,
    cursor: usize,
}

/// 参数池
///
/// 池本身持有缓冲区；`allocate` 只移动游标并返回 [`PoolSlice`]（偏移 + 长度），
/// 切片不拥有数据。克隆 `ParamPool` 得到的是同一个池的句柄。
///
/// 池不做越界之外的任何校验：多个层之间的分配顺序、是否重复使用，都由调用方负责。
#[derive(Debug, Clone)]
pub struct ParamPool {
    inner: Rc<RefCell<PoolInner>>,
}

impl ParamPool {
    /// 创建含`size`个元素（全零）的参数池
    pub fn new(size: usize) -> Self {
        Self {
            inner: Rc::new(RefCell::new(PoolInner {
                data: Array1::zeros(size),
                cursor: 0,
            })),
        }
    }

    /// 从当前游标处切出`nr_weight`个元素，并将游标后移
    ///
    /// # Panics
    /// 池中剩余空间不足时 panic
    pub fn allocate(&self, nr_weight: usize) -> PoolSlice {
        let mut inner = self.inner.borrow_mut();
        let offset = inner.cursor;
        assert!(
            offset + nr_weight <= inner.data.len(),
            "参数池空间不足：容量{}，已用{}，本次申请{}",
            inner.data.len(),
            offset,
            nr_weight
        );
        inner.cursor += nr_weight;
        log::trace!("参数池分配[{}, {})", offset, offset + nr_weight);

        PoolSlice {
            pool: Rc::downgrade(&self.inner),
            offset,
            len: nr_weight,
        }
    }

    /// 池的总容量
    pub fn len(&self) -> usize {
        self.inner.borrow().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 已分配的元素个数
    pub fn cursor(&self) -> usize {
        self.inner.borrow().cursor
    }

    /// 尚未分配的元素个数
    pub fn remaining(&self) -> usize {
        let inner = self.inner.borrow();
        inner.data.len() - inner.cursor
    }

    /// 拷贝出整个缓冲区
    pub fn to_vec(&self) -> Vec<f32> {
        self.inner.borrow().data.to_vec()
    }
}

/// 参数池中的一段区域（不拥有数据）
#[derive(Debug, Clone)]
pub struct PoolSlice {
    pool: Weak<RefCell<PoolInner>>,
    offset: usize,
    len: usize,
}

impl PoolSlice {
    pub const fn offset(&self) -> usize {
        self.offset
    }

    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 以只读视图访问该区域
    ///
    /// `f` 拿到的是该区域的拷贝，执行期间不占用池的借用，可以再访问同一个池。
    pub fn with_view<R>(&self, f: impl FnOnce(ArrayView1<'_, f32>) -> R) -> Result<R, Error> {
        let data = self.read()?;
        Ok(f(data.view()))
    }

    /// 以可写视图访问该区域，`f` 返回后把结果写回池的缓冲区
    ///
    /// 与 `with_view` 相同，`f` 执行期间池不被借用。
    pub fn with_view_mut<R>(
        &self,
        f: impl FnOnce(ArrayViewMut1<'_, f32>) -> R,
    ) -> Result<R, Error> {
        let mut data = self.read()?;
        let result = f(data.view_mut());
        let pool = self.pool.upgrade().ok_or(Error::PoolReleased)?;
        pool.borrow_mut()
            .data
            .slice_mut(s![self.offset..self.offset + self.len])
            .assign(&data);
        Ok(result)
    }

    fn read(&self) -> Result<Array1<f32>, Error> {
        let pool = self.pool.upgrade().ok_or(Error::PoolReleased)?;
        let inner = pool.borrow();
        Ok(inner
            .data
            .slice(s![self.offset..self.offset + self.len])
            .to_owned())
    }
}
