/*
 * @Author       : 老董
 * @Date         : 2026-10-16
 * @Description  : 训练步所需的张量工具（底层存储直接用 ndarray 的动态维数组）
 */

use ndarray::{ArrayD, IxDyn};
use rand::Rng;
use rand::distributions::{Distribution, Uniform};

mod ops;

pub use ops::{
    area_downsample, batched_mat_mul, pyramid_reconstruction_loss, reconstruction_loss,
    transpose_last2,
};


/// 张量：标量、向量、矩阵或更高维数组。标量的形状为`[]`。
pub type Tensor = ArrayD<f32>;

/// 数值稳定用的极小量
pub const TINY: f32 = 1e-12;

/// 创建标量张量
pub fn scalar(value: f32) -> Tensor {
    ArrayD::from_elem(IxDyn(&[]), value)
}

/// 创建一个随机张量，其值在[min, max]的闭区间
pub fn random_uniform<R: Rng + ?Sized>(shape: &[usize], min: f32, max: f32, rng: &mut R) -> Tensor {
    let uniform = Uniform::from(min..=max);
    ArrayD::from_shape_simple_fn(IxDyn(shape), || uniform.sample(rng))
}

/// 求均值（空张量视为0）
pub fn squash(t: &Tensor) -> f32 {
    t.mean().unwrap_or(0.0)
}

/// 各元素绝对值之和
pub fn sum_abs(t: &Tensor) -> f32 {
    t.iter().map(|x| x.abs()).sum()
}

/// 各元素绝对值的均值
pub fn mean_abs(t: &Tensor) -> f32 {
    if t.is_empty() {
        return 0.0;
    }
    sum_abs(t) / t.len() as f32
}

/// 各元素平方和
pub fn sum_squares(t: &Tensor) -> f32 {
    t.iter().map(|x| x * x).sum()
}

/// 逐元素对两个张量求均方差
pub fn mean_squared_distance(a: &Tensor, b: &Tensor) -> f32 {
    let diff = a - b;
    squash(&diff.mapv(|x| x * x))
}
