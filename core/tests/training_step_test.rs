mod common;

use approx::assert_relative_eq;
use common::{build_on_threads, build_pipeline, pipeline_args, Stage};
use stagewise::distributed::initialize_model_parallel;
use stagewise::models::{EmbeddingSync, SharedEmbeddingModule};
use stagewise::nn::{Module, Parameter};
use stagewise::optim::{clip_grad_norm, grad_norm, Optimizer, Sgd};
use stagewise::tensor::{DynTensor, Tensor};

/// Builds a two-stage pipeline, then runs one step on each stage thread:
/// a stage-specific gradient, the embedding-gradient all-reduce, and SGD.
fn train_one_step(first_grad: f32, last_grad: f32, lr: f32) -> (Vec<Stage>, Vec<Vec<f32>>) {
    let args = pipeline_args(2);
    let stages = build_on_threads(&args, initialize_model_parallel(&args).unwrap());
    let before: Vec<Vec<f32>> = stages
        .iter()
        .map(|(m, s)| m.word_embeddings_weight(s.topology()).unwrap().data().to_f32().into_data())
        .collect();

    let stages = std::thread::scope(|scope| {
        let handles: Vec<_> = stages
            .into_iter()
            .map(|(mut model, state)| {
                scope.spawn(move || {
                    let value = if state.is_pipeline_first_stage(true) { first_grad } else { last_grad };
                    let weight = model.word_embeddings_weight_mut(state.topology()).unwrap();
                    let shape = weight.shape().to_vec();
                    weight.set_grad(Some(DynTensor::F32(Tensor::full(&shape, value))));

                    let sync = model.allreduce_word_embedding_grads(&state).unwrap();
                    assert_eq!(sync, EmbeddingSync::Synchronized);

                    let mut sgd = Sgd::new(lr);
                    sgd.step(&mut model.parameters_mut()).unwrap();
                    (model, state)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect::<Vec<_>>()
    });
    (stages, before)
}

fn weight_of(stage: &Stage) -> &Parameter {
    stage.0.word_embeddings_weight(stage.1.topology()).unwrap()
}

#[test]
fn test_sgd_step_keeps_tied_copies_equal() {
    let (stages, before) = train_one_step(1.0, 2.0, 0.1);
    assert_eq!(before[0], before[1]);

    let first = weight_of(&stages[0]).data().to_f32().into_data();
    let last = weight_of(&stages[1]).data().to_f32().into_data();
    assert_eq!(first, last);

    // Both applied the summed gradient 1.0 + 2.0.
    for (after, was) in first.iter().zip(&before[0]) {
        assert_relative_eq!(*after, was - 0.1 * 3.0, epsilon = 1e-6);
    }
}

#[test]
fn test_grad_norm_counts_tied_weights_once() {
    let (stages, _) = train_one_step(0.5, 0.5, 0.0);
    let first = weight_of(&stages[0]);
    let last = weight_of(&stages[1]);

    // After the all-reduce every element of both gradients is 1.0.
    let expected = (first.data().numel() as f32).sqrt();
    assert_relative_eq!(grad_norm(&[first, last]), expected, epsilon = 1e-3);
    assert_relative_eq!(grad_norm(&[first]), expected, epsilon = 1e-3);
    assert_eq!(grad_norm(&[last]), 0.0);
}

/// One clipped step on every stage of an `n`-stage pipeline: gradient `grad`
/// on both embedding copies, the embedding all-reduce, clipping to
/// `max_norm`, then SGD. Returns the stages and the norm each one saw.
fn clipped_step(n: usize, grad: f32, max_norm: f32, lr: f32) -> (Vec<Stage>, Vec<f32>) {
    let args = pipeline_args(n);
    let stages = build_on_threads(&args, initialize_model_parallel(&args).unwrap());

    let results = std::thread::scope(|scope| {
        let handles: Vec<_> = stages
            .into_iter()
            .map(|(mut model, state)| {
                scope.spawn(move || {
                    if let Ok(weight) = model.word_embeddings_weight_mut(state.topology()) {
                        let shape = weight.shape().to_vec();
                        weight.set_grad(Some(DynTensor::F32(Tensor::full(&shape, grad))));
                    }
                    model.allreduce_word_embedding_grads(&state).unwrap();

                    let norm = clip_grad_norm(&mut model.parameters_mut(), max_norm, &state).unwrap();
                    Sgd::new(lr).step(&mut model.parameters_mut()).unwrap();
                    ((model, state), norm)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect::<Vec<_>>()
    });
    results.into_iter().unzip()
}

#[test]
fn test_clipped_step_keeps_tied_copies_equal() {
    let untouched = build_pipeline(&pipeline_args(2));
    let before = weight_of(&untouched[0]).data().to_f32().into_data();

    let (stages, norms) = clipped_step(2, 1.0, 1.0, 0.1);

    // 32 x 8 elements of summed gradient 2.0, counted once.
    let expected_norm = 2.0 * (32.0f32 * 8.0).sqrt();
    assert_relative_eq!(norms[0], expected_norm, epsilon = 1e-3);
    assert_eq!(norms[0], norms[1]);

    let first = weight_of(&stages[0]).data().to_f32().into_data();
    let last = weight_of(&stages[1]).data().to_f32().into_data();
    assert_eq!(first, last);

    // Clipped gradient per element: 2.0 * 1.0 / norm.
    let step = 0.1 * 2.0 / expected_norm;
    for (after, was) in first.iter().zip(&before) {
        assert_relative_eq!(*after, was - step, epsilon = 1e-5);
    }
}

#[test]
fn test_middle_stages_join_the_norm_reduction() {
    let (stages, norms) = clipped_step(3, 0.5, 0.5, 0.1);
    assert!(norms.iter().all(|n| *n == norms[0]));
    assert_relative_eq!(norms[0], (32.0f32 * 8.0).sqrt(), epsilon = 1e-3);

    let first = weight_of(&stages[0]).data().to_f32().into_data();
    let last = weight_of(&stages[2]).data().to_f32().into_data();
    assert_eq!(first, last);
}

#[test]
fn test_missing_gradient_is_a_config_error() {
    let args = pipeline_args(2);
    let stages = build_on_threads(&args, initialize_model_parallel(&args).unwrap());
    let (mut model, state) = stages.into_iter().next().unwrap();
    model.zero_grad();
    let err = model.allreduce_word_embedding_grads(&state).unwrap_err();
    assert!(matches!(err, stagewise::Error::Config(_)));
}
