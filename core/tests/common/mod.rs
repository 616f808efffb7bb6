#![allow(dead_code)]

use stagewise::distributed::{initialize_model_parallel, CpuBackend, ParallelState};
use stagewise::models::StagedLanguageModel;
use stagewise::TrainingArgs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

pub type Stage = (StagedLanguageModel, ParallelState<CpuBackend>);

pub fn pipeline_args(stages: usize) -> TrainingArgs {
    TrainingArgs {
        pipeline_model_parallel_size: stages,
        padded_vocab_size: 32,
        hidden_size: 8,
        init_method_std: 0.5,
        ..TrainingArgs::default()
    }
}

/// Builds every stage's model on its own thread, as the workers of a real
/// pipeline would, and returns them in rank order.
pub fn build_pipeline(args: &TrainingArgs) -> Vec<Stage> {
    let states = initialize_model_parallel(args).unwrap();
    build_on_threads(args, states)
}

pub fn build_on_threads(args: &TrainingArgs, states: Vec<ParallelState<CpuBackend>>) -> Vec<Stage> {
    std::thread::scope(|s| {
        let handles: Vec<_> = states
            .into_iter()
            .map(|state| {
                s.spawn(move || {
                    let model = StagedLanguageModel::new(args, &state).unwrap();
                    (model, state)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

/// Counts WARN events seen by the subscriber it is attached to.
#[derive(Clone, Default)]
pub struct WarnCounter(Arc<AtomicUsize>);

impl WarnCounter {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl<S: Subscriber> Layer<S> for WarnCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::WARN {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}
