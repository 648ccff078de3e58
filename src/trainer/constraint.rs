/*
 * @Author       : 老董
 * @Date         : 2026-10-16
 * @Description  : 权重约束：正交化、Lipschitz 上界、L2 归一化
 *
 * 三种约束按 正交 → Lipschitz → L2 的顺序依次作用，前一种的输出是后一种的输入。
 * 四维权重（卷积核 [kh, kw, in, out]）先按`sum(|w|, axis=1)`再`max(axis=0)`
 * 归约为 [in, out] 矩阵后估计范数。
 */

use ndarray::{Array2, Axis, Ix2, ShapeError};
use tracing::debug;

use crate::config::{PNorm, TrainerConfig, WeightConstraint};
use crate::errors::TrainerError;
use crate::graph::{ParameterStore, VarId};
use crate::tensor::{Tensor, batched_mat_mul, transpose_last2};

#[derive(Debug, Clone)]
pub struct WeightConstraintEngine {
    regimes: Vec<WeightConstraint>,
    every: usize,
    ortho_decay: f32,
    k: f32,
    pnorm: PNorm,
    bounce: bool,
    scaleup: bool,
    l2nn_decay: f32,
    exempt_shape: Option<Vec<usize>>,
}

impl WeightConstraintEngine {
    pub fn new(config: &TrainerConfig) -> Self {
        Self {
            regimes: config.weight_constraint.clone(),
            every: config.constraint_every.max(1),
            ortho_decay: config.ortho_decay,
            k: config.weight_constraint_k,
            pnorm: config.ortho_pnorm,
            bounce: config.weight_bounce,
            scaleup: config.weight_scaleup,
            l2nn_decay: config.l2nn_decay,
            exempt_shape: None,
        }
    }

    /// 形状与之相同的张量不做约束
    pub fn with_exempt_shape(mut self, shape: Option<Vec<usize>>) -> Self {
        self.exempt_shape = shape;
        self
    }

    pub fn is_enabled(&self) -> bool {
        !self.regimes.is_empty()
    }

    /// 本步是否应当施加约束
    pub fn is_due(&self, step: usize) -> bool {
        self.is_enabled() && step % self.every == 0
    }

    pub fn is_exempt(&self, t: &Tensor) -> bool {
        self.exempt_shape.as_deref() == Some(t.shape())
    }

    /// 依次施加所有已启用的约束；豁免或没有任何约束适用时返回`None`
    pub fn apply(&self, t: &Tensor) -> Result<Option<Tensor>, ShapeError> {
        if self.is_exempt(t) {
            return Ok(None);
        }
        let mut current: Option<Tensor> = None;
        for regime in [WeightConstraint::Ortho, WeightConstraint::Lipschitz, WeightConstraint::L2nn] {
            if !self.regimes.contains(&regime) {
                continue;
            }
            let input = current.as_ref().unwrap_or(t);
            let next = match regime {
                WeightConstraint::Ortho => self.orthogonalize(input)?,
                WeightConstraint::Lipschitz => self.lipschitz(input),
                WeightConstraint::L2nn => self.l2_normalize(input),
            };
            if next.is_some() {
                current = next;
            }
        }
        Ok(current)
    }

    /// 对参数组中的每个变量施加约束，返回被改写的变量数
    pub fn apply_to<S: ParameterStore + ?Sized>(
        &self,
        store: &mut S,
        vars: &[VarId],
    ) -> Result<usize, TrainerError> {
        let mut updated = 0;
        for &var in vars {
            let value = store.variable(var)?;
            if self.is_exempt(value) {
                debug!(%var, shape = ?value.shape(), "跳过最后一层权重");
                continue;
            }
            if let Some(next) = self.apply(value)? {
                store.assign(var, next)?;
                updated += 1;
            }
        }
        Ok(updated)
    }

    /// 正交化：`(1+decay)·W − decay·W·Wᵀ·W`，仅作用于四维张量（视作一叠二维矩阵）
    pub fn orthogonalize(&self, t: &Tensor) -> Result<Option<Tensor>, ShapeError> {
        if t.ndim() != 4 {
            return Ok(None);
        }
        let wtw = batched_mat_mul(&transpose_last2(t), t)?;
        let wwtw = batched_mat_mul(t, &wtw)?;
        Ok(Some(t * (1.0 + self.ortho_decay) - wwtw * self.ortho_decay))
    }

    /// 估计算子范数：`inf`取最大列和，否则取最大行和
    pub fn operator_norm(&self, t: &Tensor) -> Option<f32> {
        let m = abs_matrix(t)?;
        let axis = match self.pnorm {
            PNorm::Inf => Axis(0),
            PNorm::Default => Axis(1),
        };
        Some(m.sum_axis(axis).fold(f32::NEG_INFINITY, |acc, &x| acc.max(x)))
    }

    /// 由范数估计值`wp`得到缩放比例`min(1, k/wp)`，再按配置施加回弹/放大
    pub fn lipschitz_ratio(&self, wp: f32) -> f32 {
        let over = wp / self.k;
        let mut ratio = 1.0 / over.max(1.0);
        if self.bounce {
            let bounce = (over - 0.999).ceil().min(1.0);
            ratio -= bounce.max(0.0) * 0.2;
        }
        if self.scaleup && wp > 0.0 {
            let up = (0.02 - over).ceil().min(1.0);
            ratio += up.max(0.0) * self.k / wp * 0.2;
        }
        ratio
    }

    /// Lipschitz 上界：按比例整体缩放，仅作用于二维和四维张量
    pub fn lipschitz(&self, t: &Tensor) -> Option<Tensor> {
        let wp = self.operator_norm(t)?;
        Some(t * self.lipschitz_ratio(wp))
    }

    /// L2 归一化：`bw = min(r(WᵀW), r(WWᵀ))`，`W' = (1−decay)·W + decay·W/√bw`，
    /// 其中`r`为最大行和
    pub fn l2_normalize(&self, t: &Tensor) -> Option<Tensor> {
        let w = abs_matrix(t)?;
        let wtw = w.t().dot(&w);
        let wwt = w.dot(&w.t());
        let bw = max_row_sum(&wtw).min(max_row_sum(&wwt));
        if !(bw > 0.0) {
            return None;
        }
        let normalized = t / bw.sqrt();
        Some(t * (1.0 - self.l2nn_decay) + normalized * self.l2nn_decay)
    }
}

/// 二维取逐元素绝对值；四维按`sum(|w|, axis=1)`、`max(axis=0)`归约；其余维数不适用
fn abs_matrix(t: &Tensor) -> Option<Array2<f32>> {
    let reduced = match t.ndim() {
        2 => t.mapv(f32::abs),
        4 => t
            .mapv(f32::abs)
            .sum_axis(Axis(1))
            .fold_axis(Axis(0), f32::NEG_INFINITY, |acc, &x| acc.max(x)),
        _ => return None,
    };
    reduced.into_dimensionality::<Ix2>().ok()
}

fn max_row_sum(m: &Array2<f32>) -> f32 {
    m.mapv(f32::abs)
        .sum_axis(Axis(1))
        .fold(f32::NEG_INFINITY, |acc, &x| acc.max(x))
}
