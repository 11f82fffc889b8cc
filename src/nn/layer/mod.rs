/*
 * @Author       : 老董
 * @Date         : 2026-10-19
 * @Description  : Layer 模块
 */

mod affine;

pub use affine::{Affine, FinishUpdate};
