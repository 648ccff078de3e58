/*
 * @Author       : 老董
 * @Date         : 2026-10-16
 * @Description  : 适应度训练器：每步先判定再决定是否提交更新
 *
 * 状态机：Idle → Evaluating → {Accepted, Rejected, Terminated}，每次 step() 回到 Evaluating。
 * Terminated 只是信号（mix_threshold_reached），调用方应停止调用并重置候选。
 *
 * 门控关闭时：按计划施加约束 → 完整优化 → EMA 与快照 → 检查零损失。
 * 门控开启时：计数与失败上限 → 计算适应度 → 判定；
 *   接受：回灌损失/适应度/z → 用上一次的 z 计算上一帧正则 → 更新上一帧样本与 z
 *         → 完整优化 → 按计划施加约束 → EMA 与快照；
 *   拒绝：可选地只训练判别器；本步不计入步数。
 */

use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{info, warn};

use crate::config::TrainerConfig;
use crate::errors::{ConfigError, TrainerError};
use crate::graph::{FeedDict, FeedKey, LossSample, LossTarget, TrainingGraph, VarId};
use crate::trainer::constraint::WeightConstraintEngine;
use crate::trainer::fitness::{
    EarlyExit, FitnessEvaluator, FitnessState, TerminationReason, Verdict, grad_magnitude,
    grad_penalty,
};
use crate::trainer::gradient::GradientComputer;
use crate::trainer::optimizer::{LearningRate, Optimizer, OptimizerEnum};
use crate::trainer::shadow::ShadowWeightTracker;
use crate::trainer::update::{GradientShaper, OptimizerBranch};

/// 训练器的可变状态，由单个训练器独占
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainerState {
    /// 外部可见的步数；被拒绝的步不计入
    pub current_step: usize,
    /// 参数更新次数，用于学习率衰减
    pub global_step: usize,
    pub fitness: FitnessState,
}

/// 状态机所处阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Evaluating,
    Accepted,
    Rejected,
    Terminated,
}

/// 一步的结论
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    /// 未启用门控，直接训练
    Trained,
    Accepted { fitness: f32 },
    Rejected { fitness: f32 },
    /// 适应度与上次完全相同，已清空基线
    Stuck,
    /// 基线为 NaN，已清空基线
    BaselineReset,
    Terminated(TerminationReason),
}

/// 一步的报告
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    /// 本步开始时的`current_step`
    pub step: usize,
    pub outcome: StepOutcome,
    /// 本步的指标；提前结束的步为空
    pub metrics: Vec<(String, f32)>,
}

/// 适应度门控的训练器
pub struct FitnessTrainer {
    config: TrainerConfig,
    d_vars: Vec<VarId>,
    g_vars: Vec<VarId>,
    g_target: LossTarget,
    evaluator: FitnessEvaluator,
    constraints: WeightConstraintEngine,
    shadow: ShadowWeightTracker,
    shaper: GradientShaper,
    optimizer: OptimizerEnum,
    learning_rate: LearningRate,
    state: TrainerState,
    phase: Phase,
    rng: StdRng,
}

impl FitnessTrainer {
    /// 必需的配置项
    pub const fn required() -> &'static [&'static str] {
        TrainerConfig::required()
    }

    /// 构建训练器。配置非法或有变量与其损失不连通时直接报错。
    pub fn create<G: TrainingGraph + ?Sized>(
        config: TrainerConfig,
        graph: &mut G,
    ) -> Result<Self, TrainerError> {
        config.validate()?;

        let d_vars = graph.discriminator_variables();
        let g_vars = graph.generator_variables();
        if d_vars.is_empty() {
            return Err(ConfigError::EmptyVariableGroup("discriminator").into());
        }
        if g_vars.is_empty() {
            return Err(ConfigError::EmptyVariableGroup("generator").into());
        }
        if let Some(&var) = g_vars.iter().find(|v| d_vars.contains(v)) {
            return Err(ConfigError::OverlappingVariable(var).into());
        }

        let g_target = if config.prev_l2_loss {
            LossTarget::GeneratorWithPrevL2
        } else {
            LossTarget::Generator
        };
        let probe = FeedDict::new();
        GradientComputer::compute(graph, LossTarget::Discriminator, &d_vars, &probe)?;
        GradientComputer::compute(graph, g_target, &g_vars, &probe)?;

        let labels = if config.fitness_test {
            graph.labels()
        } else {
            Some(graph.labels().unwrap_or_default())
        };
        let evaluator = FitnessEvaluator::new(&config, labels)?;

        let exempt_shape = match graph.final_discriminator_weight() {
            Some(var) => Some(graph.variable(var)?.shape().to_vec()),
            None => None,
        };
        let constraints = WeightConstraintEngine::new(&config).with_exempt_shape(exempt_shape);

        let learning_rate = LearningRate::from_config(&config.optimizer);
        if let Some(decay) = learning_rate.decay_function() {
            info!(?decay, "使用学习率衰减函数");
        }

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            d_vars,
            g_vars,
            g_target,
            evaluator,
            constraints,
            shadow: ShadowWeightTracker::new(config.ema_decay, config.prev_l2_loss_lambda),
            shaper: GradientShaper::new(&config),
            optimizer: OptimizerEnum::from_config(&config.optimizer),
            learning_rate,
            state: TrainerState::default(),
            phase: Phase::Idle,
            rng,
            config,
        })
    }

    pub const fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub const fn state(&self) -> &TrainerState {
        &self.state
    }

    pub const fn phase(&self) -> Phase {
        self.phase
    }

    pub const fn shadow(&self) -> &ShadowWeightTracker {
        &self.shadow
    }

    pub const fn optimizer(&self) -> &OptimizerEnum {
        &self.optimizer
    }

    pub const fn mix_threshold_reached(&self) -> bool {
        self.state.fitness.mix_threshold_reached
    }

    /// 判别器 + 生成器的全部变量
    pub fn all_variables(&self) -> Vec<VarId> {
        [self.d_vars.as_slice(), self.g_vars.as_slice()].concat()
    }

    /// 丢弃当前候选的适应度状态与优化器累积量（如 Adam 动量），清除终止标志
    pub fn reset_candidate(&mut self) {
        self.state.fitness = FitnessState::default();
        self.optimizer.reset();
        self.phase = Phase::Idle;
    }

    /// 执行一步训练
    pub fn step<G: TrainingGraph + ?Sized>(
        &mut self,
        graph: &mut G,
        mut feed: FeedDict,
    ) -> Result<StepReport, TrainerError> {
        self.phase = Phase::Evaluating;
        let step = self.state.current_step;
        let all_vars = self.all_variables();

        if step == 0 && self.state.fitness.steps_since_fit == 0 {
            self.shadow.snapshot_weights(graph, &all_vars)?;
            self.shadow.update_previous(graph, &feed)?;
        }

        let (outcome, metrics) = if self.config.fitness_test {
            self.step_gated(graph, &mut feed, &all_vars)?
        } else {
            self.step_ungated(graph, &feed, &all_vars)?
        };

        let completed = matches!(
            outcome,
            StepOutcome::Trained | StepOutcome::Accepted { .. } | StepOutcome::Rejected { .. }
        );
        if completed
            && step % self.config.progress_every == 0
            && self.state.fitness.steps_since_fit == 0
        {
            println!("{}", format_progress(step, &metrics, &self.state.fitness));
            self.state.fitness.reset_histogram();
        }

        if !matches!(outcome, StepOutcome::Rejected { .. }) {
            self.state.current_step += 1;
        }
        self.phase = match outcome {
            StepOutcome::Trained | StepOutcome::Accepted { .. } => Phase::Accepted,
            StepOutcome::Rejected { .. } => Phase::Rejected,
            StepOutcome::Stuck | StepOutcome::BaselineReset => Phase::Evaluating,
            StepOutcome::Terminated(_) => Phase::Terminated,
        };

        Ok(StepReport {
            step,
            outcome,
            metrics,
        })
    }

    /// 对指定分支执行一次参数更新
    pub fn apply_branch<G: TrainingGraph + ?Sized>(
        &mut self,
        graph: &mut G,
        branch: OptimizerBranch,
        feed: &FeedDict,
    ) -> Result<(), TrainerError> {
        let lr = self.learning_rate.at(self.state.global_step);
        let updates = self
            .shaper
            .collect(graph, branch, &self.d_vars, &self.g_vars, self.g_target, feed)?;
        self.optimizer.apply(graph, &updates, lr)?;
        self.state.global_step += 1;
        Ok(())
    }

    fn step_ungated<G: TrainingGraph + ?Sized>(
        &mut self,
        graph: &mut G,
        feed: &FeedDict,
        all_vars: &[VarId],
    ) -> Result<(StepOutcome, Vec<(String, f32)>), TrainerError> {
        if self.constraints.is_due(self.state.current_step) {
            info!(step = self.state.current_step, "更新权重约束");
            self.apply_constraints(graph, all_vars)?;
        }

        let sample = graph.run(feed)?;
        self.apply_branch(graph, OptimizerBranch::Full, feed)?;
        self.shadow.update_ema(graph, all_vars)?;
        self.shadow.snapshot_weights(graph, all_vars)?;

        let metrics = collect_metrics(&sample, None, None);
        self.state.fitness.steps_since_fit = 0;
        if sample.g_loss == 0.0 || sample.d_loss == 0.0 {
            warn!(g_loss = sample.g_loss, d_loss = sample.d_loss, "出现零损失，候选退化");
            self.state.fitness.mix_threshold_reached = true;
            return Ok((StepOutcome::Terminated(TerminationReason::ZeroLoss), metrics));
        }
        Ok((StepOutcome::Trained, metrics))
    }

    fn step_gated<G: TrainingGraph + ?Sized>(
        &mut self,
        graph: &mut G,
        feed: &mut FeedDict,
        all_vars: &[VarId],
    ) -> Result<(StepOutcome, Vec<(String, f32)>), TrainerError> {
        if let Some(exit) = self.evaluator.begin_step(&mut self.state.fitness) {
            return Ok((exit.into(), Vec::new()));
        }

        let sample = graph.run(feed)?;
        let d_grads = GradientComputer::compute(graph, LossTarget::Discriminator, &self.d_vars, feed)?;
        let magnitude = grad_magnitude(d_grads.tensors(), self.evaluator.grad_type());
        let penalty = if self.evaluator.formula().needs_gradient_penalty() {
            let g_grads = GradientComputer::compute(graph, self.g_target, &self.g_vars, feed)?;
            grad_penalty(d_grads.tensors().chain(g_grads.tensors()))
        } else {
            0.0
        };
        let fitness = self.evaluator.score(
            sample.g_loss,
            sample.d_loss,
            &sample.d_real,
            &sample.d_fake,
            magnitude,
            penalty,
        );
        let latents = graph.fitness_inputs(feed)?;

        match self
            .evaluator
            .judge(&mut self.state.fitness, fitness, sample.g_loss, sample.d_loss)
        {
            Verdict::Accepted => {
                feed.insert_scalar(FeedKey::GLoss, sample.g_loss);
                feed.insert_scalar(FeedKey::DLoss, sample.d_loss);
                feed.insert_scalar(FeedKey::Fitness, fitness);
                for (i, z) in latents.iter().enumerate() {
                    feed.insert(FeedKey::FitnessInput(i), z.clone());
                }

                // 上一帧正则用的是上一次接受时的 z
                let prev_l2 = self.shadow.prev_l2_loss(graph, &mut self.rng)?;
                let prev_sample = self.shadow.update_previous(graph, feed)?.clone();
                self.shadow.cache_latents(latents);
                feed.insert_scalar(FeedKey::PrevL2Loss, prev_l2);
                feed.insert(FeedKey::PrevSample, prev_sample);

                self.apply_branch(graph, OptimizerBranch::Full, feed)?;
                if self.constraints.is_due(self.state.current_step) {
                    self.apply_constraints(graph, all_vars)?;
                }
                self.shadow.update_ema(graph, all_vars)?;
                self.shadow.snapshot_weights(graph, all_vars)?;

                let metrics = collect_metrics(&sample, Some(fitness), Some(prev_l2));
                Ok((StepOutcome::Accepted { fitness }, metrics))
            }
            Verdict::Rejected => {
                if self.config.train_d_on_fitness_failure {
                    self.apply_branch(graph, OptimizerBranch::Discriminator, feed)?;
                }
                let metrics = collect_metrics(&sample, Some(fitness), None);
                Ok((StepOutcome::Rejected { fitness }, metrics))
            }
            Verdict::Stuck => Ok((StepOutcome::Stuck, Vec::new())),
            Verdict::Terminated(reason) => Ok((StepOutcome::Terminated(reason), Vec::new())),
        }
    }

    /// 对变量与快照施加权重约束
    fn apply_constraints<G: TrainingGraph + ?Sized>(
        &mut self,
        graph: &mut G,
        all_vars: &[VarId],
    ) -> Result<(), TrainerError> {
        let updated = self.constraints.apply_to(graph, all_vars)?;
        let constraints = &self.constraints;
        self.shadow
            .transform_snapshot(|value| constraints.apply(value))?;
        info!(updated, "已施加权重约束");
        Ok(())
    }
}

impl From<EarlyExit> for StepOutcome {
    fn from(exit: EarlyExit) -> Self {
        match exit {
            EarlyExit::BaselineReset => Self::BaselineReset,
            EarlyExit::Terminated(reason) => Self::Terminated(reason),
        }
    }
}

fn collect_metrics(
    sample: &LossSample,
    fitness: Option<f32>,
    prev_l2: Option<f32>,
) -> Vec<(String, f32)> {
    let mut metrics = vec![
        ("d_loss".to_string(), sample.d_loss),
        ("g_loss".to_string(), sample.g_loss),
    ];
    metrics.extend(sample.metrics.iter().cloned());
    if let Some(fitness) = fitness {
        metrics.push(("fitness".to_string(), fitness));
    }
    if let Some(prev_l2) = prev_l2 {
        metrics.push(("prev_l2".to_string(), prev_l2));
    }
    metrics
}

/// 进度行：步数、各指标，以及接受/拒绝计数
pub fn format_progress(step: usize, metrics: &[(String, f32)], state: &FitnessState) -> String {
    let values = metrics
        .iter()
        .map(|(name, value)| format!("{name} {value:.2}"))
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "{step:>2}: {values}  G0:{} G1:{} ",
        state.accept_count, state.reject_count
    )
}
