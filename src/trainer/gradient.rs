/*
 * @Author       : 老董
 * @Date         : 2026-10-16
 * @Description  : 梯度计算：一个损失对一组变量的梯度，缺失即报错
 */

use tracing::error;

use crate::errors::TrainerError;
use crate::graph::{DifferentiableGraph, FeedDict, LossTarget, VarId};
use crate::tensor::Tensor;

/// 一组变量的梯度，与变量顺序一一对应
#[derive(Debug, Clone, Default)]
pub struct GradientSet {
    entries: Vec<(VarId, Tensor)>,
}

impl GradientSet {
    pub fn iter(&self) -> impl Iterator<Item = &(VarId, Tensor)> {
        self.entries.iter()
    }

    pub fn tensors(&self) -> impl Iterator<Item = &Tensor> {
        self.entries.iter().map(|(_, g)| g)
    }

    pub fn get(&self, var: VarId) -> Option<&Tensor> {
        self.entries.iter().find(|(v, _)| *v == var).map(|(_, g)| g)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for GradientSet {
    type Item = (VarId, Tensor);
    type IntoIter = std::vec::IntoIter<(VarId, Tensor)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// 梯度计算器
pub struct GradientComputer;

impl GradientComputer {
    /// 求`target`对`vars`中每个变量的梯度；任一变量与损失不连通即返回错误
    pub fn compute<G: DifferentiableGraph + ?Sized>(
        graph: &mut G,
        target: LossTarget,
        vars: &[VarId],
        feed: &FeedDict,
    ) -> Result<GradientSet, TrainerError> {
        let mut grads = graph.gradients(target, vars, feed)?.into_iter();
        let mut entries = Vec::with_capacity(vars.len());
        for &var in vars {
            match grads.next().flatten() {
                Some(g) => entries.push((var, g)),
                None => {
                    error!(%var, ?target, "缺失梯度");
                    return Err(TrainerError::MissingGradient { var, target });
                }
            }
        }
        Ok(GradientSet { entries })
    }

    /// 同`compute`，但允许缺失：缺失的变量直接略过
    pub fn compute_partial<G: DifferentiableGraph + ?Sized>(
        graph: &mut G,
        target: LossTarget,
        vars: &[VarId],
        feed: &FeedDict,
    ) -> Result<GradientSet, TrainerError> {
        let grads = graph.gradients(target, vars, feed)?;
        let entries = vars
            .iter()
            .zip(grads)
            .filter_map(|(&var, g)| g.map(|g| (var, g)))
            .collect();
        Ok(GradientSet { entries })
    }
}
