mod controller;

use std::collections::{HashMap, HashSet, VecDeque};

use ndarray::{ArrayD, IxDyn};

use crate::graph::{
    DifferentiableGraph, FeedDict, FeedKey, GraphError, LossSample, LossTarget, ParameterStore,
    TrainingGraph, VarId,
};
use crate::tensor::{Tensor, scalar, squash, sum_squares};

pub(super) fn tensor(data: &[f32], shape: &[usize]) -> Tensor {
    ArrayD::from_shape_vec(IxDyn(shape), data.to_vec()).unwrap()
}

/// 测试用的对抗网络：每个损失都是`0.5·‖w‖²`，梯度即变量本身。
/// `run()`依次吐出预设的 (d_loss, g_loss)，耗尽后返回 (1, 1)。
pub(super) struct MockGan {
    pub values: HashMap<VarId, Tensor>,
    pub d_vars: Vec<VarId>,
    pub g_vars: Vec<VarId>,
    pub scripted: VecDeque<(f32, f32)>,
    pub disconnected: HashSet<VarId>,
    pub labels: Option<[f32; 3]>,
    pub final_weight: Option<VarId>,
    pub runs: usize,
}

pub(super) const D: VarId = VarId(0);
pub(super) const G: VarId = VarId(1);

impl MockGan {
    pub fn new() -> Self {
        let mut values = HashMap::new();
        values.insert(D, tensor(&[0.5, -0.5, 0.25, 1.0], &[2, 2]));
        values.insert(G, tensor(&[1.0, 0.0, 0.0, 1.0], &[2, 2]));
        Self {
            values,
            d_vars: vec![D],
            g_vars: vec![G],
            scripted: VecDeque::new(),
            disconnected: HashSet::new(),
            labels: None,
            final_weight: None,
            runs: 0,
        }
    }

    pub fn script(mut self, losses: &[(f32, f32)]) -> Self {
        self.scripted.extend(losses.iter().copied());
        self
    }

    pub fn value(&self, var: VarId) -> &Tensor {
        &self.values[&var]
    }

    fn group_loss(&self, vars: &[VarId]) -> f32 {
        0.5 * vars.iter().map(|v| sum_squares(&self.values[v])).sum::<f32>()
    }
}

impl ParameterStore for MockGan {
    fn variable(&self, id: VarId) -> Result<&Tensor, GraphError> {
        self.values.get(&id).ok_or(GraphError::UnknownVariable(id))
    }

    fn assign(&mut self, id: VarId, value: Tensor) -> Result<(), GraphError> {
        let slot = self.values.get_mut(&id).ok_or(GraphError::UnknownVariable(id))?;
        if slot.shape() != value.shape() {
            return Err(GraphError::ShapeMismatch {
                expected: slot.shape().to_vec(),
                got: value.shape().to_vec(),
            });
        }
        *slot = value;
        Ok(())
    }
}

impl DifferentiableGraph for MockGan {
    fn gradients(
        &mut self,
        target: LossTarget,
        vars: &[VarId],
        _feed: &FeedDict,
    ) -> Result<Vec<Option<Tensor>>, GraphError> {
        let grads = vars
            .iter()
            .map(|var| {
                if self.disconnected.contains(var) {
                    return None;
                }
                let value = self.values.get(var)?;
                let connected = match target {
                    LossTarget::Discriminator => self.d_vars.contains(var),
                    LossTarget::Generator | LossTarget::GeneratorWithPrevL2 => {
                        self.g_vars.contains(var)
                    }
                    LossTarget::GradientPenalty => return Some(Tensor::zeros(value.raw_dim())),
                    _ => false,
                };
                connected.then(|| value.clone())
            })
            .collect();
        Ok(grads)
    }

    fn loss(&mut self, target: LossTarget, _feed: &FeedDict) -> Result<f32, GraphError> {
        match target {
            LossTarget::Discriminator => Ok(self.group_loss(&self.d_vars)),
            LossTarget::Generator | LossTarget::GeneratorWithPrevL2 => {
                Ok(self.group_loss(&self.g_vars))
            }
            other => Err(GraphError::UnsupportedTarget(other)),
        }
    }

    fn sample(&mut self, feed: &FeedDict) -> Result<Tensor, GraphError> {
        let shift = feed.get(FeedKey::FitnessInput(0)).map(squash).unwrap_or(0.0);
        Ok(self.values[&G].clone() + shift)
    }
}

impl TrainingGraph for MockGan {
    fn discriminator_variables(&self) -> Vec<VarId> {
        self.d_vars.clone()
    }

    fn generator_variables(&self) -> Vec<VarId> {
        self.g_vars.clone()
    }

    fn run(&mut self, _feed: &FeedDict) -> Result<LossSample, GraphError> {
        self.runs += 1;
        let (d_loss, g_loss) = self.scripted.pop_front().unwrap_or((1.0, 1.0));
        Ok(LossSample {
            d_loss,
            g_loss,
            d_real: tensor(&[1.0, 1.0], &[2]),
            d_fake: tensor(&[g_loss, g_loss], &[2]),
            metrics: vec![("runs".to_string(), self.runs as f32)],
        })
    }

    fn fitness_inputs(&mut self, _feed: &FeedDict) -> Result<Vec<Tensor>, GraphError> {
        Ok(vec![scalar(self.runs as f32)])
    }

    fn labels(&self) -> Option<[f32; 3]> {
        self.labels
    }

    fn final_discriminator_weight(&self) -> Option<VarId> {
        self.final_weight
    }
}
