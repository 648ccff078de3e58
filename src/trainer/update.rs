/*
 * @Author       : 老董
 * @Date         : 2026-10-16
 * @Description  : 按更新规则整形梯度，并按分支（完整/仅判别器/仅生成器）收集待更新的变量
 */

use crate::config::{TrainerConfig, UpdateRule};
use crate::errors::TrainerError;
use crate::graph::{DifferentiableGraph, FeedDict, LossTarget, VarId};
use crate::tensor::Tensor;
use crate::trainer::gradient::{GradientComputer, GradientSet};

/// 一次参数更新作用于哪些变量
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerBranch {
    /// 判别器 + 生成器
    Full,
    Discriminator,
    Generator,
}

impl OptimizerBranch {
    const fn includes_discriminator(self) -> bool {
        matches!(self, Self::Full | Self::Discriminator)
    }

    const fn includes_generator(self) -> bool {
        matches!(self, Self::Full | Self::Generator)
    }
}

/// 梯度整形器
#[derive(Debug, Clone)]
pub struct GradientShaper {
    rule: UpdateRule,
    jg_alpha: f32,
    g_w_lambda: f32,
    d_w_lambda: f32,
}

impl GradientShaper {
    pub fn new(config: &TrainerConfig) -> Self {
        Self {
            rule: config.update_rule,
            jg_alpha: config.jg_alpha,
            g_w_lambda: config.g_w_lambda,
            d_w_lambda: config.d_w_lambda,
        }
    }

    /// 整形单个梯度；默认规则下缺少惩罚梯度的变量不参与更新
    pub fn shape(&self, gradient: Tensor, penalty: Option<&Tensor>, is_generator: bool) -> Option<Tensor> {
        match self.rule {
            UpdateRule::SingleStep => Some(gradient),
            UpdateRule::Ttur => {
                let amp = if is_generator { self.g_w_lambda } else { self.d_w_lambda };
                Some(gradient * amp)
            }
            UpdateRule::Default => penalty.map(|jg| gradient + &(jg * self.jg_alpha)),
        }
    }

    /// 求出`branch`涉及的全部梯度并整形，顺序为先判别器后生成器
    pub fn collect<G: DifferentiableGraph + ?Sized>(
        &self,
        graph: &mut G,
        branch: OptimizerBranch,
        d_vars: &[VarId],
        g_vars: &[VarId],
        g_target: LossTarget,
        feed: &FeedDict,
    ) -> Result<Vec<(VarId, Tensor)>, TrainerError> {
        let mut groups: Vec<(GradientSet, bool)> = Vec::with_capacity(2);
        let mut vars = Vec::new();
        if branch.includes_discriminator() {
            groups.push((GradientComputer::compute(graph, LossTarget::Discriminator, d_vars, feed)?, false));
            vars.extend_from_slice(d_vars);
        }
        if branch.includes_generator() {
            groups.push((GradientComputer::compute(graph, g_target, g_vars, feed)?, true));
            vars.extend_from_slice(g_vars);
        }

        let penalties = match self.rule {
            UpdateRule::Default => Some(GradientComputer::compute_partial(
                graph,
                LossTarget::GradientPenalty,
                &vars,
                feed,
            )?),
            UpdateRule::Ttur | UpdateRule::SingleStep => None,
        };

        let mut updates = Vec::with_capacity(vars.len());
        for (grads, is_generator) in groups {
            for (var, g) in grads {
                let penalty = penalties.as_ref().and_then(|p| p.get(var));
                if let Some(shaped) = self.shape(g, penalty, is_generator) {
                    updates.push((var, shaped));
                }
            }
        }
        Ok(updates)
    }
}
