//! Builds a tied-embedding language model split over in-process pipeline
//! stages, runs one synchronised SGD step, then streams batches through the
//! pipeline.
//!
//! Usage: `pipeline_sync [config.json]`. Without a config a four-stage bf16
//! pipeline is used. `RUST_LOG=debug` shows the collectives.

use stagewise::checkpoint::save_module;
use stagewise::data::{DataCollatorForLanguageModeling, DataLoader, FeatureValue, Features};
use stagewise::distributed::{initialize_model_parallel, run_pipeline_forward, CpuBackend, ParallelState, PipelineStage};
use stagewise::logging::init_logging;
use stagewise::models::{Float16Module, SharedEmbeddingModule, StagedLanguageModel};
use stagewise::nn::Module;
use stagewise::optim::{clip_grad_norm, Optimizer, Sgd};
use stagewise::tree::ValueTree;
use stagewise::{Error, Result, TrainingArgs};
use tracing::info;

type Stage = (StagedLanguageModel, ParallelState<CpuBackend>);

fn load_args() -> Result<TrainingArgs> {
    match std::env::args().nth(1) {
        Some(path) => TrainingArgs::from_json_file(path),
        None => {
            let args = TrainingArgs {
                pipeline_model_parallel_size: 4,
                bf16: true,
                padded_vocab_size: 64,
                hidden_size: 16,
                ..TrainingArgs::default()
            };
            args.validate()?;
            Ok(args)
        }
    }
}

/// Runs `f` once per stage, each on its own named thread, and returns the
/// results in rank order.
fn on_stage_threads<I, T, F>(inputs: Vec<I>, f: F) -> Result<Vec<T>>
where
    I: Send,
    T: Send,
    F: Fn(I) -> Result<T> + Sync,
{
    std::thread::scope(|scope| {
        let handles = inputs
            .into_iter()
            .enumerate()
            .map(|(rank, input)| {
                let f = &f;
                std::thread::Builder::new()
                    .name(format!("stage-{rank}"))
                    .spawn_scoped(scope, move || f(input))
                    .map_err(Error::from)
            })
            .collect::<Result<Vec<_>>>()?;
        handles
            .into_iter()
            .map(|h| {
                h.join()
                    .map_err(|_| Error::Comm("stage thread panicked".to_string()))
                    .and_then(|out| out)
            })
            .collect()
    })
}

/// One step of L2 regularisation: grad = w on every stage, tied grads
/// summed, global-norm clipping, SGD.
fn regularisation_step(stages: Vec<Stage>, lr: f32) -> Result<Vec<Stage>> {
    on_stage_threads(stages, |(mut model, state)| {
        for param in model.parameters_mut() {
            let grad = param.data().clone();
            param.set_grad(Some(grad));
        }
        let sync = model.allreduce_word_embedding_grads(&state)?;
        let norm = clip_grad_norm(&mut model.parameters_mut(), 1.0, &state)?;
        Sgd::new(lr).step(&mut model.parameters_mut())?;
        model.zero_grad();
        info!(grad_norm = norm, ?sync, "applied update");
        Ok((model, state))
    })
}

fn synthetic_dataset(vocab: usize) -> Vec<Features> {
    (0..10)
        .map(|i| {
            let len = 3 + i % 4;
            let ids = (0..len).map(|t| ((i * 7 + t * 3) % (vocab - 1) + 1) as i64).collect();
            Features::from([("input_ids".to_string(), FeatureValue::IntSeq(ids))])
        })
        .collect()
}

fn main() -> Result<()> {
    init_logging("info")?;
    let args = load_args()?;

    let states = initialize_model_parallel(&args)?;
    let stages = on_stage_threads(states, |state| {
        let model = StagedLanguageModel::new(&args, &state)?;
        info!(sync = ?model.embedding_sync(), "built stage");
        Ok((model, state))
    })?;

    let stages = regularisation_step(stages, 0.01)?;

    let last = stages.len() - 1;
    if args.share_word_embeddings {
        let first_w = stages[0].0.word_embeddings_weight(stages[0].1.topology())?;
        let last_w = stages[last].0.word_embeddings_weight(stages[last].1.topology())?;
        if first_w.data() != last_w.data() {
            return Err(Error::Comm("tied embeddings diverged".to_string()));
        }
        info!("tied embeddings agree after the update");
    }

    let checkpoint = std::env::temp_dir().join("stagewise_last_stage.safetensors");
    save_module(&checkpoint, &stages[last].0)?;
    info!(path = %checkpoint.display(), "saved last stage");

    let modules: Vec<(Box<dyn Module>, ParallelState<CpuBackend>)> = stages
        .into_iter()
        .map(|(model, state)| -> Result<(Box<dyn Module>, _)> {
            let module: Box<dyn Module> = if args.reduced_precision().is_some() {
                Box::new(Float16Module::new(model, &args)?)
            } else {
                Box::new(model)
            };
            Ok((module, state))
        })
        .collect::<Result<_>>()?;
    let plan: Vec<PipelineStage<'_>> = modules
        .iter()
        .map(|(m, s)| (&**m as &dyn Module, *s.topology()))
        .collect();

    let loader = DataLoader::new(synthetic_dataset(args.padded_vocab_size), 4)
        .shuffle(true, args.seed)
        .with_collator(DataCollatorForLanguageModeling::new(Some(0)));
    for (step, batch) in loader.iter(0).enumerate() {
        let batch = batch?;
        let input_ids = batch
            .get("input_ids")
            .cloned()
            .ok_or_else(|| Error::Config("batch has no input_ids".to_string()))?;
        let outputs = run_pipeline_forward(&plan, ValueTree::tuple([ValueTree::from(input_ids)]))?;
        let logits = outputs
            .first_tensor()
            .ok_or_else(|| Error::Config("pipeline produced no logits".to_string()))?;
        info!(step, shape = ?logits.shape(), dtype = %logits.dtype(), "forward");
    }
    Ok(())
}
