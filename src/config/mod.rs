/*
 * @Author       : 老董
 * @Date         : 2026-10-16
 * @Description  : 训练器配置（JSON）
 *
 * 每个配置项都有显式的默认值；与“值为假就回退到默认值”的写法不同，
 * 这里显式给出的 0、false 都会被如实采用。
 */

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ConfigError, TrainerError};
use crate::latent::LossRegime;
use crate::trainer::FitnessFormula;


/// 优化器种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    #[default]
    Adam,
    Sgd,
}

/// 学习率衰减函数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecayFunction {
    /// `lr * rate^(step/steps)`
    Exponential,
    /// `lr / (1 + rate * step/steps)`
    InverseTime,
    /// `lr * e^(-rate * step/steps)`
    NaturalExp,
}

/// 梯度整形规则
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateRule {
    /// 两时间尺度：生成器梯度乘`g_w_lambda`，判别器梯度乘`d_w_lambda`
    Ttur,
    /// 直接使用原始梯度
    SingleStep,
    /// `g + jg * jg_alpha`，jg 为梯度惩罚项的梯度
    #[default]
    Default,
}

/// 权重约束
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightConstraint {
    Ortho,
    Lipschitz,
    L2nn,
}

/// Lipschitz 约束估计算子范数的方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PNorm {
    /// 最大行和
    #[default]
    Default,
    /// 最大列和
    Inf,
}

/// 判别器梯度幅度的汇总方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GradType {
    /// 各梯度绝对值之和再相加
    Sum,
    /// 各梯度绝对值均值的平均（任何非`sum`的取值）
    #[default]
    #[serde(other)]
    Mean,
}

/// 优化器与学习率相关配置，两种训练器共用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub trainer: OptimizerKind,
    pub learn_rate: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    pub decay_function: Option<DecayFunction>,
    pub decay_steps: usize,
    pub decay_rate: f32,
    pub decay_staircase: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            trainer: OptimizerKind::Adam,
            learn_rate: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            decay_function: None,
            decay_steps: 50_000,
            decay_rate: 0.9,
            decay_staircase: false,
        }
    }
}

impl OptimizerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        check(self.learn_rate > 0.0, "learn_rate", "须大于0")?;
        check((0.0..1.0).contains(&self.beta1), "beta1", "须在[0, 1)内")?;
        check((0.0..1.0).contains(&self.beta2), "beta2", "须在[0, 1)内")?;
        check(self.decay_steps > 0, "decay_steps", "须大于0")?;
        Ok(())
    }
}

/// 适应度训练器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    #[serde(flatten)]
    pub optimizer: OptimizerConfig,

    pub update_rule: UpdateRule,
    pub jg_alpha: f32,
    pub g_w_lambda: f32,
    pub d_w_lambda: f32,

    pub weight_constraint: Vec<WeightConstraint>,
    pub constraint_every: usize,
    pub ortho_decay: f32,
    pub weight_constraint_k: f32,
    pub ortho_pnorm: PNorm,
    pub weight_bounce: bool,
    pub weight_scaleup: bool,
    pub l2nn_decay: f32,

    pub fitness_test: bool,
    pub fitness_type: FitnessFormula,
    pub fitness_decay: f32,
    /// 连续多少步未被接受即终止候选；`null`表示不设上限
    pub fitness_failure_threshold: Option<usize>,
    pub diversity_importance: f32,
    pub grad_type: GradType,
    pub assert_similarity: bool,
    pub similarity_ratio: f32,
    pub train_d_on_fitness_failure: bool,
    pub skip_fitness: bool,

    pub prev_l2_loss: bool,
    pub prev_l2_loss_lambda: f32,
    pub ema_decay: f32,

    /// 每隔多少步打印一次进度
    pub progress_every: usize,
    pub seed: Option<u64>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            optimizer: OptimizerConfig::default(),
            update_rule: UpdateRule::Default,
            jg_alpha: 0.1,
            g_w_lambda: 3.0,
            d_w_lambda: 1.0,
            weight_constraint: Vec::new(),
            constraint_every: 100,
            ortho_decay: 0.01,
            weight_constraint_k: 100.0,
            ortho_pnorm: PNorm::Default,
            weight_bounce: false,
            weight_scaleup: false,
            l2nn_decay: 1e-4,
            fitness_test: false,
            fitness_type: FitnessFormula::Default,
            fitness_decay: 0.99,
            fitness_failure_threshold: Some(1000),
            diversity_importance: 1.0,
            grad_type: GradType::Mean,
            assert_similarity: false,
            similarity_ratio: 1.8,
            train_d_on_fitness_failure: false,
            skip_fitness: false,
            prev_l2_loss: false,
            prev_l2_loss_lambda: 0.1,
            ema_decay: 0.9,
            progress_every: 10,
            seed: None,
        }
    }
}

impl TrainerConfig {
    /// 必需的配置项
    pub const fn required() -> &'static [&'static str] {
        &["trainer", "learn_rate"]
    }

    pub fn from_json(json: &str) -> Result<Self, TrainerError> {
        Self::from_value(serde_json::from_str(json)?)
    }

    pub fn from_value(value: Value) -> Result<Self, TrainerError> {
        check_required(&value, Self::required())?;
        let config: Self = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.optimizer.validate()?;
        check(self.constraint_every > 0, "constraint_every", "须大于0")?;
        check(self.weight_constraint_k > 0.0, "weight_constraint_k", "须大于0")?;
        check((0.0..=1.0).contains(&self.fitness_decay), "fitness_decay", "须在[0, 1]内")?;
        check((0.0..=1.0).contains(&self.ema_decay), "ema_decay", "须在[0, 1]内")?;
        check((0.0..=1.0).contains(&self.l2nn_decay), "l2nn_decay", "须在[0, 1]内")?;
        check(self.similarity_ratio >= 0.0, "similarity_ratio", "须≥0")?;
        check(self.progress_every > 0, "progress_every", "须大于0")?;
        Ok(())
    }
}

/// 潜变量优化器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatentConfig {
    #[serde(rename = "type")]
    pub regime: LossRegime,

    #[serde(flatten)]
    pub optimizer: OptimizerConfig,

    /// 潜变量最后一维的大小；给出时会与计算图中的潜变量核对
    pub z_dim: Option<usize>,

    pub progress_every: usize,
    pub seed: Option<u64>,
}

impl Default for LatentConfig {
    fn default() -> Self {
        Self {
            regime: LossRegime::Reconstruction,
            optimizer: OptimizerConfig::default(),
            z_dim: None,
            progress_every: 10,
            seed: None,
        }
    }
}

impl LatentConfig {
    pub const fn required() -> &'static [&'static str] {
        &["type", "trainer", "learn_rate"]
    }

    pub fn from_json(json: &str) -> Result<Self, TrainerError> {
        Self::from_value(serde_json::from_str(json)?)
    }

    pub fn from_value(value: Value) -> Result<Self, TrainerError> {
        check_required(&value, Self::required())?;
        let config: Self = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.optimizer.validate()?;
        check(self.progress_every > 0, "progress_every", "须大于0")?;
        check(self.z_dim != Some(0), "z_dim", "须大于0")?;
        Ok(())
    }
}

fn check_required(value: &Value, keys: &[&str]) -> Result<(), ConfigError> {
    let object = value.as_object().ok_or_else(|| ConfigError::InvalidValue {
        key: "<root>".to_string(),
        reason: "配置须为 JSON 对象".to_string(),
    })?;
    match keys.iter().find(|key| !object.contains_key(**key)) {
        Some(key) => Err(ConfigError::MissingKey((*key).to_string())),
        None => Ok(()),
    }
}

fn check(condition: bool, key: &str, reason: &str) -> Result<(), ConfigError> {
    if condition {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: reason.to_string(),
        })
    }
}
