use crate::config::{DecayFunction, OptimizerConfig};

/// 学习率：固定值，或按全局步数衰减
#[derive(Debug, Clone, PartialEq)]
pub struct LearningRate {
    base: f32,
    decay: Option<DecayFunction>,
    decay_steps: usize,
    decay_rate: f32,
    staircase: bool,
}

impl LearningRate {
    pub fn from_config(config: &OptimizerConfig) -> Self {
        Self {
            base: config.learn_rate,
            decay: config.decay_function,
            decay_steps: config.decay_steps.max(1),
            decay_rate: config.decay_rate,
            staircase: config.decay_staircase,
        }
    }

    pub const fn decay_function(&self) -> Option<DecayFunction> {
        self.decay
    }

    /// 第`global_step`步的学习率
    pub fn at(&self, global_step: usize) -> f32 {
        let Some(decay) = self.decay else {
            return self.base;
        };
        let mut progress = global_step as f32 / self.decay_steps as f32;
        if self.staircase {
            progress = progress.floor();
        }
        match decay {
            DecayFunction::Exponential => self.base * self.decay_rate.powf(progress),
            DecayFunction::InverseTime => self.base / (1.0 + self.decay_rate * progress),
            DecayFunction::NaturalExp => self.base * (-self.decay_rate * progress).exp(),
        }
    }
}
