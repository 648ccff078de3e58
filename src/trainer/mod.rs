/*
 * @Author       : 老董
 * @Date         : 2026-10-16
 * @Description  : 训练步控制：梯度、适应度判定、权重约束、影子权重与优化器
 */

mod constraint;
mod controller;
mod fitness;
mod gradient;
mod multi_step;
pub mod optimizer;
mod shadow;
mod update;

pub use constraint::WeightConstraintEngine;
pub use controller::{FitnessTrainer, Phase, StepOutcome, StepReport, TrainerState, format_progress};
pub use fitness::{
    EarlyExit, FitnessEvaluator, FitnessFormula, FitnessInputs, FitnessState, TerminationReason,
    Verdict, grad_magnitude, grad_penalty,
};
pub use gradient::{GradientComputer, GradientSet};
pub use multi_step::{LossGroup, MultiStepTrainer};
pub use shadow::ShadowWeightTracker;
pub use update::{GradientShaper, OptimizerBranch};

#[cfg(test)]
mod tests;
