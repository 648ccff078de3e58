/*
 * @Author       : 老董
 * @Date         : 2026-10-16
 * @Description  : 训练器与外部计算图之间的约定
 *
 * 本库不构建网络、不实现自动求导：生成器/判别器/编码器、损失函数与会话都由调用方提供。
 * 训练器只通过下面几个 trait 读写参数、求梯度、取样本与损失。
 *
 * 约定：同一个 FeedDict 在一步之内多次使用时，计算图须基于同一批输入
 * （同一批真实数据、同一组 z），否则适应度判断与随后的优化就不是针对同一个候选。
 */

use std::collections::HashMap;
use std::fmt::{self, Display};

use thiserror::Error;

use crate::tensor::{Tensor, scalar};

/// 可训练变量的标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub usize);

impl Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "var#{}", self.0)
    }
}

/// 求梯度/求值时所针对的损失
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LossTarget {
    /// 判别器损失
    Discriminator,
    /// 生成器损失
    Generator,
    /// 生成器损失 + 上一帧样本的 L2 正则（见 FeedKey::PrevSample）
    GeneratorWithPrevL2,
    /// `0.5 * Σ‖∇‖²`，其中∇为判别器与生成器损失对各自变量的梯度
    GradientPenalty,
    /// `(x - G(z))²`
    Reconstruction,
    /// 多分辨率的`(x - G(z))²`
    PyramidReconstruction,
    /// 潜变量判别器的生成损失 + 标准判别器的生成损失 + 重建误差
    ZEncoder,
    /// 潜变量判别器损失（区分 z 与均匀分布样本）
    LatentDiscriminator,
    /// `|0.5 - D(x) - D(G(z))| + 0.01 * mean|x - G(z)|`
    Wgan,
}

/// 喂给计算图的占位值
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedKey {
    /// 真实数据 x
    Input,
    /// 已接受候选的生成器损失
    GLoss,
    /// 已接受候选的判别器损失
    DLoss,
    /// 已接受候选的适应度
    Fitness,
    /// 上一帧样本的 L2 正则值
    PrevL2Loss,
    /// 上一帧生成样本
    PrevSample,
    /// 计算图`fitness_inputs()`的第 i 项（通常是 z）
    FitnessInput(usize),
}

/// 一次运行所用的占位值集合
#[derive(Debug, Clone, Default)]
pub struct FeedDict {
    values: HashMap<FeedKey, Tensor>,
}

impl FeedDict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: FeedKey, value: Tensor) -> Option<Tensor> {
        self.values.insert(key, value)
    }

    pub fn insert_scalar(&mut self, key: FeedKey, value: f32) -> Option<Tensor> {
        self.values.insert(key, scalar(value))
    }

    pub fn get(&self, key: FeedKey) -> Option<&Tensor> {
        self.values.get(&key)
    }

    pub fn contains(&self, key: FeedKey) -> bool {
        self.values.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// 用`inputs`依次填充`FitnessInput(0..n)`
    pub fn with_fitness_inputs(mut self, inputs: &[Tensor]) -> Self {
        for (i, value) in inputs.iter().enumerate() {
            self.values.insert(FeedKey::FitnessInput(i), value.clone());
        }
        self
    }
}

/// 一次前向得到的损失及判别器输出
#[derive(Debug, Clone)]
pub struct LossSample {
    pub d_loss: f32,
    pub g_loss: f32,
    /// 判别器对真实数据的输出
    pub d_real: Tensor,
    /// 判别器对生成数据的输出
    pub d_fake: Tensor,
    /// 其余需要输出的标量指标（名称, 值）
    pub metrics: Vec<(String, f32)>,
}

/// 输入源取出的一批数据
#[derive(Debug, Clone)]
pub struct Batch {
    /// 每个样本的标识（如文件名）
    pub ids: Vec<String>,
    /// 真实数据，第0维为批大小
    pub x: Tensor,
}

/// 计算图一侧的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("未知变量：{0}")]
    UnknownVariable(VarId),

    #[error("形状不匹配：期望{expected:?}，实际{got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },

    #[error("缺少占位值：{0:?}")]
    MissingFeed(FeedKey),

    #[error("不支持的损失：{0:?}")]
    UnsupportedTarget(LossTarget),

    #[error("计算失败：{0}")]
    Computation(String),

    #[error("输入数据已耗尽")]
    InputExhausted,
}

/// 可读写的参数集合
pub trait ParameterStore {
    fn variable(&self, id: VarId) -> Result<&Tensor, GraphError>;

    /// 直接覆盖变量的值（不经过优化器）
    fn assign(&mut self, id: VarId, value: Tensor) -> Result<(), GraphError>;
}

/// 可求梯度的计算图
pub trait DifferentiableGraph: ParameterStore {
    /// 求`target`对每个变量的梯度，与`vars`一一对应；不连通的变量返回`None`
    ///
    /// 训练器构建时会以空的 FeedDict 调用一次，仅用于检查连通性。
    fn gradients(
        &mut self,
        target: LossTarget,
        vars: &[VarId],
        feed: &FeedDict,
    ) -> Result<Vec<Option<Tensor>>, GraphError>;

    /// 求`target`的标量值
    fn loss(&mut self, target: LossTarget, feed: &FeedDict) -> Result<f32, GraphError>;

    /// 生成器输出
    fn sample(&mut self, feed: &FeedDict) -> Result<Tensor, GraphError>;
}

/// 对抗训练所需的计算图
pub trait TrainingGraph: DifferentiableGraph {
    fn discriminator_variables(&self) -> Vec<VarId>;

    /// 编码器 + 生成器的变量
    fn generator_variables(&self) -> Vec<VarId>;

    /// 一次前向：损失与判别器输出
    fn run(&mut self, feed: &FeedDict) -> Result<LossSample, GraphError>;

    /// 接受候选后需要回灌的值（通常是本步的 z）
    fn fitness_inputs(&mut self, _feed: &FeedDict) -> Result<Vec<Tensor>, GraphError> {
        Ok(Vec::new())
    }

    /// 损失的标签 (a, b, c)，供最小二乘类适应度公式使用
    fn labels(&self) -> Option<[f32; 3]> {
        None
    }

    /// 判别器的最后一层权重；与其形状相同的张量不做权重约束
    fn final_discriminator_weight(&self) -> Option<VarId> {
        None
    }
}

/// 潜变量优化所需的计算图（无判别器也可）
pub trait LatentGraph: DifferentiableGraph {
    /// 从输入源取下一批数据
    fn next_batch(&mut self) -> Result<Batch, GraphError>;

    /// 可训练的潜变量 z，第0维为批大小
    fn latent_variable(&self) -> VarId;

    fn generator_variables(&self) -> Vec<VarId>;

    fn discriminator_variables(&self) -> Vec<VarId> {
        Vec::new()
    }

    /// 潜变量判别器的变量（仅 z_encoder 模式使用）
    fn latent_discriminator_variables(&self) -> Vec<VarId> {
        Vec::new()
    }

    /// 训练后读取当前的潜变量编码
    fn encode(&mut self, feed: &FeedDict) -> Result<Tensor, GraphError>;
}
