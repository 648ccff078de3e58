/*
 * @Author       : 老董
 * @Date         : 2026-10-16
 * @Description  : 潜变量优化器：没有判别器也能训练，z 本身可训练并按样本缓存
 *
 * 每步：取一批数据 → 从缓存取出（或随机初始化）各样本的 z → 把 z 直接写入潜变量
 * → 多组训练器做一次优化 → 读回优化后的 z 并写回缓存。
 * 写入必须在优化之前完成，读回必须在优化之后，二者是两个独立的操作。
 */

mod cache;
mod regime;

pub use cache::LatentCache;
pub use regime::LossRegime;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::info;

use crate::config::LatentConfig;
use crate::errors::{ConfigError, TrainerError};
use crate::graph::{FeedDict, FeedKey, GraphError, LatentGraph, ParameterStore, VarId};
use crate::tensor::{Tensor, pyramid_reconstruction_loss, reconstruction_loss};
use crate::trainer::MultiStepTrainer;


pub struct LatentOptimizer {
    config: LatentConfig,
    latent: VarId,
    latent_shape: Vec<usize>,
    trainer: MultiStepTrainer,
    cache: LatentCache,
    rng: StdRng,
}

impl LatentOptimizer {
    pub const fn required() -> &'static [&'static str] {
        LatentConfig::required()
    }

    pub fn create<G: LatentGraph + ?Sized>(
        config: LatentConfig,
        graph: &mut G,
    ) -> Result<Self, TrainerError> {
        config.validate()?;

        let latent = graph.latent_variable();
        let latent_shape = graph.variable(latent)?.shape().to_vec();
        let expected = config.z_dim.unwrap_or_else(|| latent_shape.last().copied().unwrap_or(0));
        if latent_shape.len() < 2 || latent_shape.last() != Some(&expected) {
            return Err(ConfigError::LatentShape {
                expected,
                got: latent_shape,
            }
            .into());
        }

        let groups = config.regime.groups(&*graph)?;
        info!(regime = ?config.regime, groups = groups.len(), "创建潜变量优化器");
        let trainer =
            MultiStepTrainer::create(groups, &config.optimizer, config.progress_every, graph)?;

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            config,
            latent,
            latent_shape,
            trainer,
            cache: LatentCache::new(),
            rng,
        })
    }

    pub const fn config(&self) -> &LatentConfig {
        &self.config
    }

    pub const fn cache(&self) -> &LatentCache {
        &self.cache
    }

    /// 替换缓存（如从文件恢复）
    pub fn set_cache(&mut self, cache: LatentCache) {
        self.cache = cache;
    }

    pub const fn trainer(&self) -> &MultiStepTrainer {
        &self.trainer
    }

    /// 把`z`直接写入潜变量（不经过优化器）
    pub fn assign_latent<S: ParameterStore + ?Sized>(
        &self,
        store: &mut S,
        z: Tensor,
    ) -> Result<(), TrainerError> {
        if z.shape() != self.latent_shape.as_slice() {
            return Err(GraphError::ShapeMismatch {
                expected: self.latent_shape.clone(),
                got: z.shape().to_vec(),
            }
            .into());
        }
        store.assign(self.latent, z)?;
        Ok(())
    }

    /// 读取优化后的潜变量编码
    pub fn read_latent<G: LatentGraph + ?Sized>(
        &self,
        graph: &mut G,
        feed: &FeedDict,
    ) -> Result<Tensor, TrainerError> {
        Ok(graph.encode(feed)?)
    }

    /// 执行一步，返回各组损失；重建类组合额外返回`rec`
    pub fn step<G: LatentGraph + ?Sized>(
        &mut self,
        graph: &mut G,
        mut feed: FeedDict,
    ) -> Result<Vec<(String, f32)>, TrainerError> {
        let batch = graph.next_batch()?;

        let mut example_shape = self.latent_shape.clone();
        example_shape[0] = 1;
        let z = self.cache.lookup(&batch.ids, &example_shape, &mut self.rng)?;
        feed.insert(FeedKey::Input, batch.x.clone());
        self.assign_latent(graph, z)?;

        let mut metrics = self.trainer.step(graph, &feed)?;

        let updated = self.read_latent(graph, &feed)?;
        self.cache.store(&batch.ids, &updated)?;

        if self.config.regime.reports_reconstruction() {
            let sample = graph.sample(&feed)?;
            if sample.shape() != batch.x.shape() {
                return Err(GraphError::ShapeMismatch {
                    expected: batch.x.shape().to_vec(),
                    got: sample.shape().to_vec(),
                }
                .into());
            }
            let rec = match self.config.regime {
                LossRegime::PyramidReconstruction => pyramid_reconstruction_loss(&batch.x, &sample),
                _ => reconstruction_loss(&batch.x, &sample),
            };
            metrics.push(("rec".to_string(), rec));
        }
        Ok(metrics)
    }
}
