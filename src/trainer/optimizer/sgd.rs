/*
 * @Author       : 老董
 * @Date         : 2026-10-16
 * @Description  : 梯度下降优化器实现
 */

use super::Optimizer;
use crate::graph::VarId;
use crate::tensor::Tensor;

/// SGD (随机梯度下降) 优化器：θ = θ - α * ∇θ
#[derive(Debug, Clone, Default)]
pub struct SGD;

impl SGD {
    pub const fn new() -> Self {
        Self
    }
}

impl Optimizer for SGD {
    fn update(&mut self, _var: VarId, current: &Tensor, gradient: &Tensor, lr: f32) -> Tensor {
        current - &(gradient * lr)
    }

    fn begin_step(&mut self) {}

    fn reset(&mut self) {
        // SGD 无状态
    }
}
