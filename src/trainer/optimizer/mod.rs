/*
 * @Author       : 老董
 * @Date         : 2026-10-16
 * @Description  : 优化器：按 (变量, 梯度) 列表更新参数，外加学习率衰减
 */

mod adam;
mod schedule;
mod sgd;

pub use adam::Adam;
pub use schedule::LearningRate;
pub use sgd::SGD;

use enum_dispatch::enum_dispatch;

use crate::config::{OptimizerConfig, OptimizerKind};
use crate::errors::TrainerError;
use crate::graph::{ParameterStore, VarId};
use crate::tensor::Tensor;

/// 优化器核心 trait
#[enum_dispatch]
pub trait Optimizer {
    /// 由当前值与梯度算出一个变量的新值
    ///
    /// 一次`apply`内的所有变量共用同一个时间步，调用前须先`begin_step`。
    fn update(&mut self, var: VarId, current: &Tensor, gradient: &Tensor, lr: f32) -> Tensor;

    /// 开始一次参数更新（如 Adam 的时间步 +1）
    fn begin_step(&mut self);

    /// 重置累积状态（如 Adam 的动量）
    fn reset(&mut self);
}

/// 按配置选择的优化器
#[enum_dispatch(Optimizer)]
#[derive(Debug, Clone)]
pub enum OptimizerEnum {
    Adam,
    SGD,
}

impl OptimizerEnum {
    pub fn from_config(config: &OptimizerConfig) -> Self {
        match config.trainer {
            OptimizerKind::Adam => Adam::new(config.beta1, config.beta2, config.epsilon).into(),
            OptimizerKind::Sgd => SGD::new().into(),
        }
    }

    /// 把一组梯度作用到参数上（一次完整的参数更新）
    pub fn apply<S: ParameterStore + ?Sized>(
        &mut self,
        store: &mut S,
        gradients: &[(VarId, Tensor)],
        lr: f32,
    ) -> Result<(), TrainerError> {
        self.begin_step();
        for (var, gradient) in gradients {
            let new_value = self.update(*var, store.variable(*var)?, gradient, lr);
            store.assign(*var, new_value)?;
        }
        Ok(())
    }
}
