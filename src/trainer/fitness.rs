/*
 * @Author       : 老董
 * @Date         : 2026-10-16
 * @Description  : 适应度公式与接受/拒绝判定
 */

use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{GradType, TrainerConfig};
use crate::errors::ConfigError;
use crate::tensor::{TINY, Tensor, mean_abs, squash, sum_abs, sum_squares};

/// 适应度公式。值越小越好。
///
/// 下文记号：`g`/`d`为生成器/判别器损失，`df`/`dr`为判别器对生成/真实数据的输出，
/// `m`为判别器梯度幅度，`λ`为`diversity_importance`，`(a, b, c)`为损失标签。
/// 对`df`、`dr`的逐元素运算最后都取均值。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "String", into = "String")]
pub enum FitnessFormula {
    /// `g - λ·ln|m + d - g|`
    GLoss,
    /// `-ln(0.5·Σ‖∇‖²)`
    GradientOnly,
    /// `m`
    Grads,
    /// `m - 1000·d + 1000·g`
    Point,
    /// `-m`
    Fail,
    /// `-df`
    Fail2,
    /// `-g`
    Fail3,
    /// `df`
    Fail2Reverse,
    /// `(df - a)²`
    Ls,
    /// `-(df - a)²`
    LsR,
    /// `(df - c)²`
    Ls2,
    /// `-(df - c)²`
    Ls2R,
    /// `-sigmoid(df)`
    Std,
    /// `1 - df`
    Ls3,
    /// `dr - df`
    Ls4,
    /// `dr² - df²`
    Ls5,
    /// `-df - 0.1·m`
    Fq1,
    /// `dr - df - 0.1·m`
    Fq2,
    /// `dr - df + m`
    Fq3,
    /// `-df + m`
    Fq4,
    /// `-df - |m|`
    Fq5,
    /// `-df - 0.1·|m + d|`
    Fq6,
    /// `-df - 0.1·|-m - d|`
    Fq7,
    /// `-|m + d|`
    Fq8,
    /// `0.1·m`
    Fq9,
    /// `|m + d|`
    Fq10,
    /// `-df + 100·m`
    Fq11,
    /// `-(1 - df)`
    Ls3Fail,
    /// `g - d`
    Gldl,
    /// `|df| - |dr|`
    Df,
    /// `g - λ·ln|m - ln(ε + σ(d)) - ln(1 - σ(g) + ε)|`
    Standard,
    /// `df - λ·ln|m + dr - df|`
    #[default]
    Default,
}

impl FitnessFormula {
    /// 全部公式，与`TAGS`一一对应
    pub const ALL: [FitnessFormula; 32] = [
        Self::GLoss,
        Self::GradientOnly,
        Self::Grads,
        Self::Point,
        Self::Fail,
        Self::Fail2,
        Self::Fail3,
        Self::Fail2Reverse,
        Self::Ls,
        Self::LsR,
        Self::Ls2,
        Self::Ls2R,
        Self::Std,
        Self::Ls3,
        Self::Ls4,
        Self::Ls5,
        Self::Fq1,
        Self::Fq2,
        Self::Fq3,
        Self::Fq4,
        Self::Fq5,
        Self::Fq6,
        Self::Fq7,
        Self::Fq8,
        Self::Fq9,
        Self::Fq10,
        Self::Fq11,
        Self::Ls3Fail,
        Self::Gldl,
        Self::Df,
        Self::Standard,
        Self::Default,
    ];

    const TAGS: [&'static str; 32] = [
        "g_loss",
        "gradient-only",
        "grads",
        "point",
        "fail",
        "fail2",
        "fail3",
        "fail2-reverse",
        "ls",
        "ls-r",
        "ls2",
        "ls2-r",
        "std",
        "ls3",
        "ls4",
        "ls5",
        "fq1",
        "fq2",
        "fq3",
        "fq4",
        "fq5",
        "fq6",
        "fq7",
        "fq8",
        "fq9",
        "fq10",
        "fq11",
        "ls3-fail",
        "gldl",
        "df",
        "standard",
        "default",
    ];

    pub fn tag(self) -> &'static str {
        let index = Self::ALL.iter().position(|f| *f == self).unwrap_or(Self::ALL.len() - 1);
        Self::TAGS[index]
    }

    /// 是否需要损失标签
    pub const fn needs_labels(self) -> bool {
        matches!(self, Self::Ls | Self::LsR | Self::Ls2 | Self::Ls2R)
    }

    /// 是否需要全部梯度的平方和
    pub const fn needs_gradient_penalty(self) -> bool {
        matches!(self, Self::GradientOnly)
    }

    /// 计算适应度
    pub fn score(self, inputs: &FitnessInputs<'_>) -> f32 {
        let FitnessInputs {
            g_loss: g,
            d_loss: d,
            d_real,
            d_fake,
            grad_magnitude: m,
            grad_penalty,
            labels: [a, _, c],
            diversity_importance: lambda,
        } = *inputs;
        let df = || squash(d_fake);
        let dr = || squash(d_real);
        let mean_of = |t: &Tensor, f: fn(f32) -> f32| squash(&t.mapv(f));

        match self {
            Self::GLoss => g - lambda * (m + d - g).abs().ln(),
            Self::GradientOnly => -grad_penalty.ln(),
            Self::Grads => m,
            Self::Point => m - 1000.0 * d + 1000.0 * g,
            Self::Fail => -m,
            Self::Fail2 => -df(),
            Self::Fail3 => -g,
            Self::Fail2Reverse => df(),
            Self::Ls => squash(&d_fake.mapv(|x| (x - a).powi(2))),
            Self::LsR => -squash(&d_fake.mapv(|x| (x - a).powi(2))),
            Self::Ls2 => squash(&d_fake.mapv(|x| (x - c).powi(2))),
            Self::Ls2R => -squash(&d_fake.mapv(|x| (x - c).powi(2))),
            Self::Std => -mean_of(d_fake, sigmoid),
            Self::Ls3 => 1.0 - df(),
            Self::Ls4 => dr() - df(),
            Self::Ls5 => mean_of(d_real, |x| x * x) - mean_of(d_fake, |x| x * x),
            Self::Fq1 => -df() - 0.1 * m,
            Self::Fq2 => dr() - df() - 0.1 * m,
            Self::Fq3 => dr() - df() + m,
            Self::Fq4 => -df() + m,
            Self::Fq5 => -df() - m.abs(),
            Self::Fq6 => -df() - 0.1 * (m + d).abs(),
            Self::Fq7 => -df() - 0.1 * (-m - d).abs(),
            Self::Fq8 => -(m + d).abs(),
            Self::Fq9 => 0.1 * m,
            Self::Fq10 => (m + d).abs(),
            Self::Fq11 => -df() + 100.0 * m,
            Self::Ls3Fail => -(1.0 - df()),
            Self::Gldl => -d + g,
            Self::Df => mean_of(d_fake, f32::abs) - mean_of(d_real, f32::abs),
            Self::Standard => {
                let inner = m - (TINY + sigmoid(d)).ln() - (1.0 - sigmoid(g) + TINY).ln();
                g - lambda * inner.abs().ln()
            }
            Self::Default => {
                let df = df();
                df - lambda * (m + dr() - df).abs().ln()
            }
        }
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

impl Display for FitnessFormula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

impl FromStr for FitnessFormula {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::TAGS
            .iter()
            .position(|tag| *tag == s)
            .map(|index| Self::ALL[index])
            .ok_or_else(|| ConfigError::UnknownTag {
                key: "fitness_type".to_string(),
                tag: s.to_string(),
            })
    }
}

impl TryFrom<String> for FitnessFormula {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FitnessFormula> for String {
    fn from(value: FitnessFormula) -> Self {
        value.tag().to_string()
    }
}

/// 一次适应度计算的全部输入
#[derive(Debug, Clone, Copy)]
pub struct FitnessInputs<'a> {
    pub g_loss: f32,
    pub d_loss: f32,
    pub d_real: &'a Tensor,
    pub d_fake: &'a Tensor,
    /// 判别器梯度幅度，见[`grad_magnitude`]
    pub grad_magnitude: f32,
    /// `0.5·Σ‖∇‖²`，仅`gradient-only`使用
    pub grad_penalty: f32,
    pub labels: [f32; 3],
    pub diversity_importance: f32,
}

/// 判别器梯度幅度：`sum`为各梯度绝对值之和的总和，否则为各梯度绝对值均值的平均
pub fn grad_magnitude<'a>(grads: impl IntoIterator<Item = &'a Tensor>, grad_type: GradType) -> f32 {
    let mut total = 0.0;
    let mut count = 0usize;
    for g in grads {
        total += match grad_type {
            GradType::Sum => sum_abs(g),
            GradType::Mean => mean_abs(g),
        };
        count += 1;
    }
    match grad_type {
        GradType::Mean if count > 0 => total / count as f32,
        _ => total,
    }
}

/// `0.5·Σ‖∇‖²`
pub fn grad_penalty<'a>(grads: impl IntoIterator<Item = &'a Tensor>) -> f32 {
    0.5 * grads.into_iter().map(sum_squares).sum::<f32>()
}

/// 适应度状态，由训练器独占
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FitnessState {
    /// 当前的接受基线；`None`表示尚无基线，下一次判定必然接受
    pub min_fitness: Option<f32>,
    /// 上一次参与判定的适应度
    pub old_fitness: Option<f32>,
    /// 自上次接受以来的步数
    pub steps_since_fit: usize,
    /// 接受次数（进度输出后清零）
    pub accept_count: usize,
    /// 拒绝次数（进度输出后清零）
    pub reject_count: usize,
    /// 候选应当被终止
    pub mix_threshold_reached: bool,
}

impl FitnessState {
    /// 终止当前候选：清空基线、置终止标志
    pub fn terminate(&mut self) {
        self.min_fitness = None;
        self.mix_threshold_reached = true;
        self.steps_since_fit = 0;
    }

    pub fn reset_histogram(&mut self) {
        self.accept_count = 0;
        self.reject_count = 0;
    }
}

/// 终止候选的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// 适应度或损失出现 NaN
    NotANumber,
    /// 连续未被接受的步数超过上限
    FailureThreshold,
    /// 生成器与判别器损失差距过大
    Divergence,
    /// 无门控训练中出现零损失
    ZeroLoss,
}

/// 一次判定的结论
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    Accepted,
    Rejected,
    /// 适应度与上次完全相同，清空基线
    Stuck,
    Terminated(TerminationReason),
}

/// 每步开始时的检查结论：本步不再计算适应度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EarlyExit {
    /// 基线为 NaN，已清空基线
    BaselineReset,
    Terminated(TerminationReason),
}

/// 适应度判定器
#[derive(Debug, Clone)]
pub struct FitnessEvaluator {
    formula: FitnessFormula,
    labels: [f32; 3],
    diversity_importance: f32,
    grad_type: GradType,
    decay: f32,
    failure_threshold: Option<usize>,
    assert_similarity: bool,
    similarity_ratio: f32,
    skip_fitness: bool,
}

impl FitnessEvaluator {
    /// 按配置构建；标签类公式在没有标签时报错
    pub fn new(config: &TrainerConfig, labels: Option<[f32; 3]>) -> Result<Self, ConfigError> {
        let formula = config.fitness_type;
        let labels = match labels {
            Some(labels) => labels,
            None if formula.needs_labels() => return Err(ConfigError::MissingLabels(formula)),
            None => [0.0; 3],
        };
        Ok(Self {
            formula,
            labels,
            diversity_importance: config.diversity_importance,
            grad_type: config.grad_type,
            decay: config.fitness_decay,
            failure_threshold: config.fitness_failure_threshold,
            assert_similarity: config.assert_similarity,
            similarity_ratio: config.similarity_ratio,
            skip_fitness: config.skip_fitness,
        })
    }

    pub const fn formula(&self) -> FitnessFormula {
        self.formula
    }

    pub const fn grad_type(&self) -> GradType {
        self.grad_type
    }

    /// 计算适应度
    pub fn score(
        &self,
        g_loss: f32,
        d_loss: f32,
        d_real: &Tensor,
        d_fake: &Tensor,
        grad_magnitude: f32,
        grad_penalty: f32,
    ) -> f32 {
        self.formula.score(&FitnessInputs {
            g_loss,
            d_loss,
            d_real,
            d_fake,
            grad_magnitude,
            grad_penalty,
            labels: self.labels,
            diversity_importance: self.diversity_importance,
        })
    }

    /// 每步开始时调用：计数，并检查失败上限与 NaN 基线。
    /// 返回`Some`时本步不再计算适应度。
    pub fn begin_step(&self, state: &mut FitnessState) -> Option<EarlyExit> {
        state.steps_since_fit += 1;
        if let Some(threshold) = self.failure_threshold {
            if state.steps_since_fit > threshold {
                info!(
                    accepted = state.accept_count,
                    min_fitness = ?state.min_fitness,
                    "达到适应度失败上限，终止候选"
                );
                state.terminate();
                return Some(EarlyExit::Terminated(TerminationReason::FailureThreshold));
            }
        }
        if state.min_fitness.is_some_and(f32::is_nan) {
            warn!("适应度基线为 NaN，已清空");
            state.min_fitness = None;
            return Some(EarlyExit::BaselineReset);
        }
        None
    }

    /// 对新算出的适应度做接受/拒绝判定，并更新状态
    pub fn judge(&self, state: &mut FitnessState, fitness: f32, g_loss: f32, d_loss: f32) -> Verdict {
        if fitness.is_nan() || g_loss.is_nan() || d_loss.is_nan() {
            warn!(fitness, g_loss, d_loss, "检测到 NaN，候选结束");
            state.terminate();
            return Verdict::Terminated(TerminationReason::NotANumber);
        }
        if state.old_fitness == Some(fitness) {
            info!(fitness, "适应度未变化，清空基线");
            state.min_fitness = None;
            return Verdict::Stuck;
        }
        state.old_fitness = Some(fitness);

        if self.skip_fitness {
            state.min_fitness = None;
        }

        match state.min_fitness {
            Some(min) if fitness > min => {
                state.reject_count += 1;
                state.min_fitness = Some(min + (1.0 - self.decay) * (fitness - min));
                Verdict::Rejected
            }
            _ => {
                state.accept_count += 1;
                state.min_fitness = Some(fitness);
                state.steps_since_fit = 0;
                if self.assert_similarity
                    && (g_loss - d_loss) > self.similarity_ratio * ((g_loss + d_loss) / 2.0)
                {
                    warn!(g_loss, d_loss, diff = g_loss - d_loss, "g_loss 与 d_loss 差距超过允许范围");
                    state.terminate();
                    return Verdict::Terminated(TerminationReason::Divergence);
                }
                Verdict::Accepted
            }
        }
    }
}
