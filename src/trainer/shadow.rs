/*
 * @Author       : 老董
 * @Date         : 2026-10-16
 * @Description  : 影子权重：上一次接受时的权重快照、上一帧生成样本与对应的 z
 */

use std::collections::HashMap;

use rand::Rng;

use crate::errors::TrainerError;
use crate::graph::{DifferentiableGraph, FeedDict, ParameterStore, VarId};
use crate::tensor::{Tensor, mean_squared_distance, random_uniform};

#[derive(Debug, Clone)]
pub struct ShadowWeightTracker {
    /// 每个可训练变量的快照
    past_weights: HashMap<VarId, Tensor>,
    /// 上一帧生成样本
    prev_sample: Option<Tensor>,
    /// 上一次接受时的 fitness inputs（通常是 z）
    prev_latents: Vec<Tensor>,
    ema_decay: f32,
    prev_l2_lambda: f32,
}

impl ShadowWeightTracker {
    pub fn new(ema_decay: f32, prev_l2_lambda: f32) -> Self {
        Self {
            past_weights: HashMap::new(),
            prev_sample: None,
            prev_latents: Vec::new(),
            ema_decay,
            prev_l2_lambda,
        }
    }

    pub fn past_weight(&self, var: VarId) -> Option<&Tensor> {
        self.past_weights.get(&var)
    }

    pub fn prev_sample(&self) -> Option<&Tensor> {
        self.prev_sample.as_ref()
    }

    pub fn prev_latents(&self) -> &[Tensor] {
        &self.prev_latents
    }

    /// 把当前生成器输出记为上一帧样本
    pub fn update_previous<G: DifferentiableGraph + ?Sized>(
        &mut self,
        graph: &mut G,
        feed: &FeedDict,
    ) -> Result<&Tensor, TrainerError> {
        let sample = graph.sample(feed)?;
        Ok(self.prev_sample.insert(sample))
    }

    /// 记下本次接受的 z，供下一次计算上一帧正则
    pub fn cache_latents(&mut self, latents: Vec<Tensor>) {
        self.prev_latents = latents;
    }

    /// `λ·mean((G(z_prev) − prev_sample)²)`
    ///
    /// 上一帧样本尚未建立时，以`[-0.1, 0.1]`的均匀噪声作为初值。
    pub fn prev_l2_loss<G: DifferentiableGraph + ?Sized, R: Rng + ?Sized>(
        &mut self,
        graph: &mut G,
        rng: &mut R,
    ) -> Result<f32, TrainerError> {
        let prev_feed = FeedDict::new().with_fitness_inputs(&self.prev_latents);
        let sample = graph.sample(&prev_feed)?;
        let prev = self
            .prev_sample
            .get_or_insert_with(|| random_uniform(sample.shape(), -0.1, 0.1, rng));
        Ok(self.prev_l2_lambda * mean_squared_distance(&sample, prev))
    }

    /// 把每个变量向其快照拉近：`var = var·(1−decay) + shadow·decay`
    ///
    /// decay=1 时变量恢复为快照，decay=0 时保持当前值。尚无快照的变量不变。
    pub fn update_ema<S: ParameterStore + ?Sized>(
        &self,
        store: &mut S,
        vars: &[VarId],
    ) -> Result<(), TrainerError> {
        let decay = self.ema_decay;
        for &var in vars {
            let Some(shadow) = self.past_weights.get(&var) else {
                continue;
            };
            let blended = store.variable(var)? * (1.0 - decay) + shadow * decay;
            store.assign(var, blended)?;
        }
        Ok(())
    }

    /// 把当前所有变量复制进快照
    pub fn snapshot_weights<S: ParameterStore + ?Sized>(
        &mut self,
        store: &S,
        vars: &[VarId],
    ) -> Result<(), TrainerError> {
        for &var in vars {
            self.past_weights.insert(var, store.variable(var)?.clone());
        }
        Ok(())
    }

    /// 对快照逐个施加变换（如权重约束）；`f`返回`None`表示不改动
    pub fn transform_snapshot<F, E>(&mut self, mut f: F) -> Result<(), E>
    where
        F: FnMut(&Tensor) -> Result<Option<Tensor>, E>,
    {
        for value in self.past_weights.values_mut() {
            if let Some(next) = f(value)? {
                *value = next;
            }
        }
        Ok(())
    }
}
