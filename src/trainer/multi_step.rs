/*
 * @Author       : 老董
 * @Date         : 2026-10-16
 * @Description  : 多组训练器：若干 (名称, 损失, 变量) 组依次优化，每组一个优化器
 */

use crate::config::OptimizerConfig;
use crate::errors::{ConfigError, TrainerError};
use crate::graph::{DifferentiableGraph, FeedDict, LossTarget, VarId};
use crate::trainer::gradient::GradientComputer;
use crate::trainer::optimizer::{LearningRate, OptimizerEnum};

/// 一个损失及其负责优化的变量
#[derive(Debug, Clone, PartialEq)]
pub struct LossGroup {
    pub name: String,
    pub target: LossTarget,
    pub vars: Vec<VarId>,
}

impl LossGroup {
    pub fn new(name: impl Into<String>, target: LossTarget, vars: Vec<VarId>) -> Self {
        Self {
            name: name.into(),
            target,
            vars,
        }
    }
}

pub struct MultiStepTrainer {
    groups: Vec<LossGroup>,
    optimizers: Vec<OptimizerEnum>,
    learning_rate: LearningRate,
    progress_every: usize,
    current_step: usize,
    global_step: usize,
}

impl MultiStepTrainer {
    /// 构建训练器；任一组为空或有变量与其损失不连通即报错
    pub fn create<G: DifferentiableGraph + ?Sized>(
        groups: Vec<LossGroup>,
        config: &OptimizerConfig,
        progress_every: usize,
        graph: &mut G,
    ) -> Result<Self, TrainerError> {
        let probe = FeedDict::new();
        for group in &groups {
            if group.vars.is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: group.name.clone(),
                    reason: "变量组为空".to_string(),
                }
                .into());
            }
            GradientComputer::compute(graph, group.target, &group.vars, &probe)?;
        }
        let optimizers = groups
            .iter()
            .map(|_| OptimizerEnum::from_config(config))
            .collect();
        Ok(Self {
            groups,
            optimizers,
            learning_rate: LearningRate::from_config(config),
            progress_every: progress_every.max(1),
            current_step: 0,
            global_step: 0,
        })
    }

    pub fn groups(&self) -> &[LossGroup] {
        &self.groups
    }

    pub const fn current_step(&self) -> usize {
        self.current_step
    }

    /// 依次对每组求损失与梯度并更新，返回各组的 (名称, 损失)
    pub fn step<G: DifferentiableGraph + ?Sized>(
        &mut self,
        graph: &mut G,
        feed: &FeedDict,
    ) -> Result<Vec<(String, f32)>, TrainerError> {
        let lr = self.learning_rate.at(self.global_step);
        let mut metrics = Vec::with_capacity(self.groups.len());
        for (group, optimizer) in self.groups.iter().zip(self.optimizers.iter_mut()) {
            let loss = graph.loss(group.target, feed)?;
            let grads = GradientComputer::compute(graph, group.target, &group.vars, feed)?;
            let updates: Vec<_> = grads.into_iter().collect();
            optimizer.apply(graph, &updates, lr)?;
            metrics.push((group.name.clone(), loss));
        }
        self.global_step += 1;

        if self.current_step % self.progress_every == 0 {
            let values = metrics
                .iter()
                .map(|(name, value)| format!("{name} {value:.2}"))
                .collect::<Vec<_>>()
                .join(" ");
            println!("{:>2}: {values}", self.current_step);
        }
        self.current_step += 1;
        Ok(metrics)
    }
}
