/*
 * @Author       : 老董
 * @Date         : 2026-10-16
 * @Description  : 训练器的错误类型
 *
 * 只有构建期（配置缺失、梯度不可达）和外部协作者本身的失败才以错误形式返回；
 * 训练中的数值异常（NaN、卡死、发散、零损失）通过 StepOutcome 与终止标志上报。
 */

use thiserror::Error;

use crate::graph::{GraphError, LossTarget, VarId};
use crate::trainer::FitnessFormula;

/// 配置相关错误（均为致命错误，在 create() 时抛出）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("缺少必需的配置项：{0}")]
    MissingKey(String),

    #[error("配置项`{key}`取值非法：{reason}")]
    InvalidValue { key: String, reason: String },

    #[error("配置项`{key}`的标签未知：{tag}")]
    UnknownTag { key: String, tag: String },

    #[error("变量组`{0}`为空")]
    EmptyVariableGroup(&'static str),

    #[error("变量{0}同时属于判别器组和生成器组")]
    OverlappingVariable(VarId),

    #[error("适应度公式`{0}`需要损失标签(a, b, c)，但损失未提供")]
    MissingLabels(FitnessFormula),

    #[error("潜变量形状不符：期望最后一维为{expected}，实际形状为{got:?}")]
    LatentShape { expected: usize, got: Vec<usize> },
}

/// 训练器错误
#[derive(Error, Debug)]
pub enum TrainerError {
    #[error("配置错误：{0}")]
    Config(#[from] ConfigError),

    #[error("变量{var}与损失{target:?}不连通，无法求梯度")]
    MissingGradient { var: VarId, target: LossTarget },

    #[error("计算图错误：{0}")]
    Graph(#[from] GraphError),

    #[error("张量形状错误：{0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("IO 错误：{0}")]
    Io(#[from] std::io::Error),

    #[error("二进制（反）序列化错误：{0}")]
    Bincode(#[from] bincode::Error),

    #[error("JSON 解析错误：{0}")]
    Json(#[from] serde_json::Error),
}
