/*
 * @Author       : 老董
 * @Date         : 2026-10-16
 * @Description  : Adam优化器实现
 */

use std::collections::HashMap;

use super::Optimizer;
use crate::graph::VarId;
use crate::tensor::Tensor;

/// Adam 优化器
///
/// - m = β1 * m + (1 - β1) * g
/// - v = β2 * v + (1 - β2) * g²
/// - θ = θ - α * `m_hat` / (√`v_hat` + ε)
#[derive(Debug, Clone)]
pub struct Adam {
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    /// 一阶矩估计
    m: HashMap<VarId, Tensor>,
    /// 二阶矩估计
    v: HashMap<VarId, Tensor>,
    /// 时间步
    t: usize,
}

impl Adam {
    pub fn new(beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            beta1,
            beta2,
            epsilon,
            m: HashMap::new(),
            v: HashMap::new(),
            t: 0,
        }
    }

    /// 获取指定变量的一阶矩
    pub fn momentum(&self, var: VarId) -> Option<&Tensor> {
        self.m.get(&var)
    }

    pub const fn timestep(&self) -> usize {
        self.t
    }
}

impl Optimizer for Adam {
    fn update(&mut self, var: VarId, current: &Tensor, gradient: &Tensor, lr: f32) -> Tensor {
        // 第一次 update 前忘了 begin_step 时按第1步处理，避免偏差修正除零
        let t = self.t.max(1) as i32;

        // 原地更新一阶矩估计: m = β1 * m + (1 - β1) * g
        let m = self
            .m
            .entry(var)
            .or_insert_with(|| Tensor::zeros(gradient.raw_dim()));
        *m *= self.beta1;
        m.scaled_add(1.0 - self.beta1, gradient);

        // 原地更新二阶矩估计: v = β2 * v + (1 - β2) * g²
        let v = self
            .v
            .entry(var)
            .or_insert_with(|| Tensor::zeros(gradient.raw_dim()));
        *v *= self.beta2;
        v.scaled_add(1.0 - self.beta2, &gradient.mapv(|g| g * g));

        // 偏差修正
        let m_hat = &self.m[&var] / (1.0 - self.beta1.powi(t));
        let v_hat = &self.v[&var] / (1.0 - self.beta2.powi(t));

        // 参数更新: θ = θ - α * m_hat / (√v_hat + ε)
        let denominator = v_hat.mapv(f32::sqrt) + self.epsilon;
        current - &(m_hat / denominator * lr)
    }

    fn begin_step(&mut self) {
        self.t += 1;
    }

    fn reset(&mut self) {
        self.m.clear();
        self.v.clear();
        self.t = 0;
    }
}
