use approx::assert_abs_diff_eq;

use super::{D, G, MockGan, tensor};
use crate::config::{OptimizerConfig, OptimizerKind, TrainerConfig, UpdateRule};
use crate::errors::{ConfigError, TrainerError};
use crate::graph::{FeedDict, LossTarget, VarId};
use crate::trainer::optimizer::OptimizerEnum;
use crate::trainer::{
    FitnessFormula, FitnessState, FitnessTrainer, Phase, StepOutcome, TerminationReason,
    format_progress,
};

/// 门控开启，适应度为`-g_loss`，SGD 学习率 0.1，不整形梯度
fn gated_config() -> TrainerConfig {
    TrainerConfig {
        optimizer: OptimizerConfig {
            trainer: OptimizerKind::Sgd,
            learn_rate: 0.1,
            ..OptimizerConfig::default()
        },
        update_rule: UpdateRule::SingleStep,
        fitness_test: true,
        fitness_type: FitnessFormula::Fail3,
        seed: Some(1),
        ..TrainerConfig::default()
    }
}

fn ungated_config() -> TrainerConfig {
    TrainerConfig {
        fitness_test: false,
        ..gated_config()
    }
}

#[test]
fn test_create_fails_on_disconnected_variable() {
    let mut graph = MockGan::new();
    graph.disconnected.insert(G);

    let err = FitnessTrainer::create(gated_config(), &mut graph).err().unwrap();
    assert!(matches!(
        err,
        TrainerError::MissingGradient { var, target: LossTarget::Generator } if var == G
    ));
}

#[test]
fn test_create_probes_prev_l2_target() {
    let mut graph = MockGan::new();
    let config = TrainerConfig {
        prev_l2_loss: true,
        ..gated_config()
    };
    assert!(FitnessTrainer::create(config, &mut graph).is_ok());
}

#[test]
fn test_create_rejects_bad_variable_groups() {
    let mut graph = MockGan::new();
    graph.g_vars.push(D);
    let err = FitnessTrainer::create(gated_config(), &mut graph).err().unwrap();
    assert!(matches!(
        err,
        TrainerError::Config(ConfigError::OverlappingVariable(var)) if var == D
    ));

    let mut graph = MockGan::new();
    graph.d_vars.clear();
    let err = FitnessTrainer::create(gated_config(), &mut graph).err().unwrap();
    assert!(matches!(
        err,
        TrainerError::Config(ConfigError::EmptyVariableGroup("discriminator"))
    ));
}

#[test]
fn test_label_formula_requires_labels() {
    let config = TrainerConfig {
        fitness_type: FitnessFormula::Ls,
        ..gated_config()
    };
    let mut graph = MockGan::new();
    let err = FitnessTrainer::create(config.clone(), &mut graph).err().unwrap();
    assert!(matches!(
        err,
        TrainerError::Config(ConfigError::MissingLabels(FitnessFormula::Ls))
    ));

    let mut graph = MockGan::new();
    graph.labels = Some([-1.0, 1.0, 0.0]);
    assert!(FitnessTrainer::create(config, &mut graph).is_ok());
}

#[test]
fn test_first_step_accepted_and_applies_update() {
    let mut graph = MockGan::new().script(&[(1.0, 2.0)]);
    let d_before = graph.value(D).clone();
    let mut trainer = FitnessTrainer::create(gated_config(), &mut graph).unwrap();
    assert_eq!(trainer.phase(), Phase::Idle);

    let report = trainer.step(&mut graph, FeedDict::new()).unwrap();

    assert_eq!(report.step, 0);
    assert_eq!(report.outcome, StepOutcome::Accepted { fitness: -2.0 });
    assert_eq!(trainer.phase(), Phase::Accepted);
    assert_eq!(trainer.state().current_step, 1);
    assert_eq!(trainer.state().fitness.min_fitness, Some(-2.0));
    assert_eq!(trainer.state().fitness.steps_since_fit, 0);
    // SGD 得到 0.9w，再以 0.9 向初始快照回拉：0.1·0.9w + 0.9·w = 0.99w
    let expected = &d_before * 0.99;
    for (a, b) in graph.value(D).iter().zip(expected.iter()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
    }
    // 快照与当前值一致
    assert_eq!(trainer.shadow().past_weight(D), Some(graph.value(D)));

    let names: Vec<_> = report.metrics.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, ["d_loss", "g_loss", "runs", "fitness", "prev_l2"]);
}

#[test]
fn test_rejected_step_moves_baseline_and_keeps_weights() {
    let mut graph = MockGan::new().script(&[(1.0, 2.0), (1.0, 1.0)]);
    let mut trainer = FitnessTrainer::create(gated_config(), &mut graph).unwrap();
    trainer.step(&mut graph, FeedDict::new()).unwrap();
    let d_after_accept = graph.value(D).clone();
    let g_after_accept = graph.value(G).clone();

    let report = trainer.step(&mut graph, FeedDict::new()).unwrap();

    assert_eq!(report.outcome, StepOutcome::Rejected { fitness: -1.0 });
    assert_eq!(report.step, 1);
    assert_eq!(trainer.phase(), Phase::Rejected);
    // 被拒绝的步不计入
    assert_eq!(trainer.state().current_step, 1);
    let min = trainer.state().fitness.min_fitness.unwrap();
    assert!(min > -2.0 && min < -1.0);
    assert_abs_diff_eq!(min, -1.99, epsilon = 1e-6);
    assert_eq!(graph.value(D), &d_after_accept);
    assert_eq!(graph.value(G), &g_after_accept);
}

#[test]
fn test_rejected_step_trains_discriminator_when_configured() {
    let config = TrainerConfig {
        train_d_on_fitness_failure: true,
        ..gated_config()
    };
    let mut graph = MockGan::new().script(&[(1.0, 2.0), (1.0, 1.0)]);
    let mut trainer = FitnessTrainer::create(config, &mut graph).unwrap();
    trainer.step(&mut graph, FeedDict::new()).unwrap();
    let d_after_accept = graph.value(D).clone();
    let g_after_accept = graph.value(G).clone();

    let report = trainer.step(&mut graph, FeedDict::new()).unwrap();

    assert!(matches!(report.outcome, StepOutcome::Rejected { .. }));
    let expected = &d_after_accept * 0.9;
    for (a, b) in graph.value(D).iter().zip(expected.iter()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
    }
    assert_eq!(graph.value(G), &g_after_accept);
}

#[test]
fn test_nan_terminates_candidate() {
    let mut graph = MockGan::new().script(&[(1.0, 2.0), (1.0, f32::NAN)]);
    let mut trainer = FitnessTrainer::create(gated_config(), &mut graph).unwrap();
    trainer.step(&mut graph, FeedDict::new()).unwrap();

    let report = trainer.step(&mut graph, FeedDict::new()).unwrap();

    assert_eq!(
        report.outcome,
        StepOutcome::Terminated(TerminationReason::NotANumber)
    );
    assert!(report.metrics.is_empty());
    assert!(trainer.mix_threshold_reached());
    assert_eq!(trainer.state().fitness.min_fitness, None);
    assert_eq!(trainer.phase(), Phase::Terminated);

    trainer.reset_candidate();
    assert!(!trainer.mix_threshold_reached());
    assert_eq!(trainer.state().fitness, FitnessState::default());
    assert_eq!(trainer.phase(), Phase::Idle);
}

#[test]
fn test_stuck_fitness_clears_baseline() {
    let mut graph = MockGan::new().script(&[(1.0, 2.0), (0.5, 2.0)]);
    let mut trainer = FitnessTrainer::create(gated_config(), &mut graph).unwrap();
    trainer.step(&mut graph, FeedDict::new()).unwrap();

    let report = trainer.step(&mut graph, FeedDict::new()).unwrap();

    assert_eq!(report.outcome, StepOutcome::Stuck);
    assert_eq!(trainer.state().fitness.min_fitness, None);
    assert!(!trainer.mix_threshold_reached());
}

#[test]
fn test_failure_threshold_terminates_without_running() {
    let config = TrainerConfig {
        fitness_failure_threshold: Some(2),
        ..gated_config()
    };
    let mut graph = MockGan::new().script(&[(1.0, 2.0), (1.0, 1.0), (1.0, 0.5)]);
    let mut trainer = FitnessTrainer::create(config, &mut graph).unwrap();

    assert!(matches!(
        trainer.step(&mut graph, FeedDict::new()).unwrap().outcome,
        StepOutcome::Accepted { .. }
    ));
    assert!(matches!(
        trainer.step(&mut graph, FeedDict::new()).unwrap().outcome,
        StepOutcome::Rejected { .. }
    ));
    assert!(matches!(
        trainer.step(&mut graph, FeedDict::new()).unwrap().outcome,
        StepOutcome::Rejected { .. }
    ));
    let report = trainer.step(&mut graph, FeedDict::new()).unwrap();

    assert_eq!(
        report.outcome,
        StepOutcome::Terminated(TerminationReason::FailureThreshold)
    );
    assert_eq!(graph.runs, 3);
    assert!(trainer.mix_threshold_reached());
    assert_eq!(trainer.state().fitness.steps_since_fit, 0);
}

#[test]
fn test_nan_baseline_is_reset_without_running() {
    // -inf 被接受后，+inf 被拒绝使基线变为 -inf + 0.01·inf = NaN
    let mut graph = MockGan::new().script(&[(1.0, f32::INFINITY), (1.0, f32::NEG_INFINITY)]);
    let mut trainer = FitnessTrainer::create(gated_config(), &mut graph).unwrap();
    trainer.step(&mut graph, FeedDict::new()).unwrap();
    trainer.step(&mut graph, FeedDict::new()).unwrap();
    assert!(trainer.state().fitness.min_fitness.unwrap().is_nan());

    let report = trainer.step(&mut graph, FeedDict::new()).unwrap();

    assert_eq!(report.outcome, StepOutcome::BaselineReset);
    assert_eq!(trainer.state().fitness.min_fitness, None);
    assert_eq!(graph.runs, 2);
}

#[test]
fn test_skip_fitness_accepts_worse_candidates() {
    let config = TrainerConfig {
        skip_fitness: true,
        ..gated_config()
    };
    let mut graph = MockGan::new().script(&[(1.0, 2.0), (1.0, 1.0)]);
    let mut trainer = FitnessTrainer::create(config, &mut graph).unwrap();
    trainer.step(&mut graph, FeedDict::new()).unwrap();

    let report = trainer.step(&mut graph, FeedDict::new()).unwrap();
    assert_eq!(report.outcome, StepOutcome::Accepted { fitness: -1.0 });
    assert_eq!(trainer.state().current_step, 2);
}

#[test]
fn test_similarity_guard_terminates_divergent_candidate() {
    let config = TrainerConfig {
        assert_similarity: true,
        ..gated_config()
    };
    let mut graph = MockGan::new().script(&[(1.0, 20.0)]);
    let mut trainer = FitnessTrainer::create(config, &mut graph).unwrap();

    let report = trainer.step(&mut graph, FeedDict::new()).unwrap();

    assert_eq!(
        report.outcome,
        StepOutcome::Terminated(TerminationReason::Divergence)
    );
    assert!(trainer.mix_threshold_reached());
}

#[test]
fn test_ungated_training_and_zero_loss() {
    let mut graph = MockGan::new().script(&[(1.0, 1.0), (0.0, 1.0)]);
    let g_before = graph.value(G).clone();
    let mut trainer = FitnessTrainer::create(ungated_config(), &mut graph).unwrap();

    let report = trainer.step(&mut graph, FeedDict::new()).unwrap();
    assert_eq!(report.outcome, StepOutcome::Trained);
    assert_ne!(graph.value(G), &g_before);
    assert_eq!(trainer.state().current_step, 1);
    assert_eq!(trainer.state().global_step, 1);

    let report = trainer.step(&mut graph, FeedDict::new()).unwrap();
    assert_eq!(
        report.outcome,
        StepOutcome::Terminated(TerminationReason::ZeroLoss)
    );
    assert!(trainer.mix_threshold_reached());
}

#[test]
fn test_ungated_applies_constraints_on_schedule() {
    let config = TrainerConfig {
        weight_constraint: vec![crate::config::WeightConstraint::Lipschitz],
        weight_constraint_k: 0.5,
        constraint_every: 2,
        ema_decay: 0.0,
        ..ungated_config()
    };
    let mut graph = MockGan::new();
    graph.values.insert(G, tensor(&[2.0, 0.0, 0.0, 2.0], &[2, 2]));
    let mut trainer = FitnessTrainer::create(config, &mut graph).unwrap();

    // 第0步：最大行和 2 → 缩放 0.25 → 0.5，再经 SGD 得 0.45
    trainer.step(&mut graph, FeedDict::new()).unwrap();
    assert_abs_diff_eq!(graph.value(G)[[0, 0]], 0.45, epsilon = 1e-6);

    // 第1步不施加约束
    trainer.step(&mut graph, FeedDict::new()).unwrap();
    assert_abs_diff_eq!(graph.value(G)[[0, 0]], 0.405, epsilon = 1e-6);
}

#[test]
fn test_gated_applies_constraints_only_on_accepted_due_steps() {
    let config = TrainerConfig {
        weight_constraint: vec![crate::config::WeightConstraint::Lipschitz],
        weight_constraint_k: 0.5,
        constraint_every: 2,
        ema_decay: 0.0,
        ..gated_config()
    };
    let diag2 = || tensor(&[2.0, 0.0, 0.0, 2.0], &[2, 2]);
    let mut graph = MockGan::new().script(&[(1.0, 2.0), (1.0, 3.0), (1.0, 1.0), (1.0, 4.0)]);
    graph.values.insert(G, diag2());
    let mut trainer = FitnessTrainer::create(config, &mut graph).unwrap();

    // 第0步接受且到期：SGD 得 1.8，再按最大行和缩放到 0.5
    let report = trainer.step(&mut graph, FeedDict::new()).unwrap();
    assert!(matches!(report.outcome, StepOutcome::Accepted { .. }));
    assert_abs_diff_eq!(graph.value(G)[[0, 0]], 0.5, epsilon = 1e-6);

    // 第1步接受但未到期：只有 SGD
    graph.values.insert(G, diag2());
    let report = trainer.step(&mut graph, FeedDict::new()).unwrap();
    assert!(matches!(report.outcome, StepOutcome::Accepted { .. }));
    assert_abs_diff_eq!(graph.value(G)[[0, 0]], 1.8, epsilon = 1e-6);

    // 第2步到期但被拒绝：权重不变
    graph.values.insert(G, diag2());
    let report = trainer.step(&mut graph, FeedDict::new()).unwrap();
    assert!(matches!(report.outcome, StepOutcome::Rejected { .. }));
    assert_eq!(trainer.state().current_step, 2);
    assert_eq!(graph.value(G), &diag2());

    // 重试第2步并被接受：施加约束
    let report = trainer.step(&mut graph, FeedDict::new()).unwrap();
    assert_eq!(report.step, 2);
    assert!(matches!(report.outcome, StepOutcome::Accepted { .. }));
    assert_abs_diff_eq!(graph.value(G)[[0, 0]], 0.5, epsilon = 1e-6);
    assert_abs_diff_eq!(graph.value(G)[[0, 1]], 0.0);
}

#[test]
fn test_reset_candidate_clears_optimizer_state() {
    let config = TrainerConfig {
        optimizer: OptimizerConfig {
            trainer: OptimizerKind::Adam,
            learn_rate: 0.01,
            ..OptimizerConfig::default()
        },
        ..gated_config()
    };
    let mut graph = MockGan::new().script(&[(1.0, 2.0)]);
    let mut trainer = FitnessTrainer::create(config, &mut graph).unwrap();
    trainer.step(&mut graph, FeedDict::new()).unwrap();

    let OptimizerEnum::Adam(adam) = trainer.optimizer() else {
        panic!("应为 Adam");
    };
    assert_eq!(adam.timestep(), 1);
    assert!(adam.momentum(G).is_some());

    trainer.reset_candidate();

    let OptimizerEnum::Adam(adam) = trainer.optimizer() else {
        panic!("应为 Adam");
    };
    assert_eq!(adam.timestep(), 0);
    assert!(adam.momentum(D).is_none());
    assert!(adam.momentum(G).is_none());
}

#[test]
fn test_final_discriminator_weight_is_exempt() {
    let config = TrainerConfig {
        weight_constraint: vec![crate::config::WeightConstraint::Lipschitz],
        weight_constraint_k: 0.1,
        ema_decay: 0.0,
        ..ungated_config()
    };
    let mut graph = MockGan::new();
    graph.values.insert(VarId(2), tensor(&[1.0, 1.0, 1.0], &[3, 1]));
    graph.d_vars.push(VarId(2));
    graph.final_weight = Some(VarId(2));
    let mut trainer = FitnessTrainer::create(config, &mut graph).unwrap();

    trainer.step(&mut graph, FeedDict::new()).unwrap();
    // 只有 SGD 生效
    assert_abs_diff_eq!(graph.value(VarId(2))[[0, 0]], 0.9, epsilon = 1e-6);
}

#[test]
fn test_histogram_reset_after_progress() {
    let mut graph = MockGan::new().script(&[(1.0, 2.0), (1.0, 3.0)]);
    let mut trainer = FitnessTrainer::create(gated_config(), &mut graph).unwrap();

    trainer.step(&mut graph, FeedDict::new()).unwrap();
    // 第0步打印进度后清零
    assert_eq!(trainer.state().fitness.accept_count, 0);

    trainer.step(&mut graph, FeedDict::new()).unwrap();
    assert_eq!(trainer.state().fitness.accept_count, 1);
}

#[test]
fn test_format_progress() {
    let state = FitnessState {
        accept_count: 3,
        reject_count: 1,
        ..FitnessState::default()
    };
    let metrics = vec![("d_loss".to_string(), 1.0), ("g_loss".to_string(), 2.5)];
    assert_eq!(
        format_progress(10, &metrics, &state),
        "10: d_loss 1.00 g_loss 2.50  G0:3 G1:1 "
    );
    assert_eq!(format_progress(0, &[], &state), " 0:   G0:3 G1:1 ");
}
