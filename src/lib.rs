//! # Fitness GAN
//!
//! `fitness_gan`是对抗式生成网络的训练步控制器：每一步先用可配置的“适应度”公式
//! 判断候选更新是否值得提交，再决定执行完整优化、仅判别器优化或干脆放弃本步；
//! 同时负责权重约束（正交、Lipschitz、L2）、EMA 影子权重以及“上一帧样本”正则。
//!
//! 另附一个没有判别器的变体 [`latent::LatentOptimizer`]：潜变量`z`本身可训练，
//! 并按样本标识缓存。
//!
//! 计算图（生成器、判别器、损失、自动求导）不属于本库，由调用方通过
//! [`graph`]中的 trait 提供。

pub mod config;
pub mod errors;
pub mod graph;
pub mod latent;
pub mod tensor;
pub mod trainer;

pub use config::{LatentConfig, OptimizerConfig, TrainerConfig};
pub use errors::{ConfigError, TrainerError};
pub use graph::{FeedDict, FeedKey, GraphError, LossSample, LossTarget, VarId};
pub use latent::{LatentCache, LatentOptimizer, LossRegime};
pub use trainer::{FitnessFormula, FitnessTrainer, StepOutcome, StepReport, TerminationReason};
