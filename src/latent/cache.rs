/*
 * @Author       : 老董
 * @Date         : 2026-10-16
 * @Description  : 潜变量缓存：按样本标识保存每个样本当前的 z，可存取到文件
 */

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use ndarray::{Axis, IxDyn, concatenate};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::errors::TrainerError;
use crate::graph::GraphError;
use crate::tensor::{Tensor, random_uniform};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatentCache {
    entries: HashMap<String, Tensor>,
}

impl LatentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Tensor> {
        self.entries.get(id)
    }

    /// 按标识取出一批 z，沿第0维拼接
    ///
    /// `example_shape`为单个样本的形状（第0维为1）。未见过的标识取`[-1, 1]`的均匀随机值。
    pub fn lookup<R: Rng + ?Sized>(
        &self,
        ids: &[String],
        example_shape: &[usize],
        rng: &mut R,
    ) -> Result<Tensor, TrainerError> {
        let mut zs = Vec::with_capacity(ids.len());
        for id in ids {
            let z = match self.entries.get(id) {
                Some(z) => z.clone().into_shape(IxDyn(example_shape))?,
                None => random_uniform(example_shape, -1.0, 1.0, rng),
            };
            zs.push(z);
        }
        if zs.is_empty() {
            let mut shape = example_shape.to_vec();
            if let Some(first) = shape.first_mut() {
                *first = 0;
            }
            return Ok(Tensor::zeros(IxDyn(&shape)));
        }
        let views: Vec<_> = zs.iter().map(|z| z.view()).collect();
        Ok(concatenate(Axis(0), &views)?)
    }

    /// 把`zs`的第 i 行存为`ids[i]`的 z
    pub fn store(&mut self, ids: &[String], zs: &Tensor) -> Result<(), TrainerError> {
        let batch = zs.shape().first().copied().unwrap_or(0);
        if batch < ids.len() {
            return Err(GraphError::ShapeMismatch {
                expected: vec![ids.len()],
                got: zs.shape().to_vec(),
            }
            .into());
        }
        for (i, id) in ids.iter().enumerate() {
            self.entries.insert(id.clone(), zs.index_axis(Axis(0), i).to_owned());
        }
        Ok(())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), TrainerError> {
        let writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(writer, self)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, TrainerError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(bincode::deserialize_from(reader)?)
    }
}
