use serde::{Deserialize, Serialize};

use crate::errors::{ConfigError, TrainerError};
use crate::graph::{LatentGraph, LossTarget};
use crate::trainer::LossGroup;

/// 潜变量优化的损失组合方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LossRegime {
    /// `(x - G(z))²`，优化 z 与生成器
    #[default]
    Reconstruction,
    /// 多分辨率重建误差，优化 z 与生成器
    PyramidReconstruction,
    /// 生成器组之外，再分别训练标准判别器与潜变量判别器
    ZEncoder,
    /// z、生成器与判别器一起最小化 wgan 式损失
    Wgan,
}

impl LossRegime {
    /// 是否额外报告重建误差
    pub const fn reports_reconstruction(self) -> bool {
        matches!(self, Self::Reconstruction | Self::PyramidReconstruction)
    }

    /// 按损失组合方式组装优化组；第一组总是`generator`
    pub fn groups<G: LatentGraph + ?Sized>(self, graph: &G) -> Result<Vec<LossGroup>, TrainerError> {
        let latent = graph.latent_variable();
        let mut generator = vec![latent];
        generator.extend(graph.generator_variables());

        let groups = match self {
            Self::Reconstruction => {
                vec![LossGroup::new("generator", LossTarget::Reconstruction, generator)]
            }
            Self::PyramidReconstruction => vec![LossGroup::new(
                "generator",
                LossTarget::PyramidReconstruction,
                generator,
            )],
            Self::ZEncoder => {
                let d_vars = required_group(graph.discriminator_variables(), "discriminator")?;
                let mut z_d_vars =
                    required_group(graph.latent_discriminator_variables(), "latent_discriminator")?;
                z_d_vars.push(latent);
                vec![
                    LossGroup::new("generator", LossTarget::ZEncoder, generator),
                    LossGroup::new("discriminator", LossTarget::Discriminator, d_vars),
                    LossGroup::new("z_discriminator", LossTarget::LatentDiscriminator, z_d_vars),
                ]
            }
            Self::Wgan => {
                let d_vars = required_group(graph.discriminator_variables(), "discriminator")?;
                generator.extend(d_vars);
                vec![LossGroup::new("generator", LossTarget::Wgan, generator)]
            }
        };
        Ok(groups)
    }
}

fn required_group<T>(vars: Vec<T>, name: &'static str) -> Result<Vec<T>, ConfigError> {
    if vars.is_empty() {
        Err(ConfigError::EmptyVariableGroup(name))
    } else {
        Ok(vars)
    }
}
