use super::state::PipelineTopology;
use crate::error::{Error, Result};
use crate::nn::Module;
use crate::tree::ValueTree;
use crossbeam::channel::{unbounded, Receiver, Sender};
use tracing::debug;

/// A stage ready to run: the module it executes and where it sits in the pipeline.
pub type PipelineStage<'a> = (&'a dyn Module, PipelineTopology);

/// Runs one forward pass through a pipeline, one thread per stage.
///
/// Stage `i` waits for the activations of stage `i - 1` on a channel, runs its
/// module, and hands the result to stage `i + 1`. The first stage receives
/// `input`; the last stage's output is returned. Each stage only ever sees
/// values by move, so no tensor is shared between workers.
///
/// # Errors
///
/// `Error::Config` if `stages` is empty or a stage's topology does not match
/// its position. The first failing stage's error is returned otherwise;
/// downstream stages of a failed stage exit without running.
pub fn run_pipeline_forward(stages: &[PipelineStage<'_>], input: ValueTree) -> Result<ValueTree> {
    if stages.is_empty() {
        return Err(Error::config("pipeline has no stages"));
    }
    for (idx, (_, topology)) in stages.iter().enumerate() {
        if topology.pipeline_rank() != idx || topology.pipeline_size() != stages.len() {
            return Err(Error::config(format!(
                "stage {idx} has topology rank {} of {}, expected rank {idx} of {}",
                topology.pipeline_rank(),
                topology.pipeline_size(),
                stages.len()
            )));
        }
    }

    std::thread::scope(|scope| {
        let (input_tx, mut upstream_rx) = unbounded::<ValueTree>();
        let mut workers = Vec::with_capacity(stages.len());

        for (module, topology) in stages {
            let (downstream_tx, next_rx) = unbounded::<ValueTree>();
            let inputs_rx = std::mem::replace(&mut upstream_rx, next_rx);

            workers.push(scope.spawn(move || run_stage(*module, topology, &inputs_rx, &downstream_tx)));
        }

        input_tx
            .send(input)
            .map_err(|_| Error::Comm("first stage exited before receiving input".to_string()))?;
        drop(input_tx);
        let output = upstream_rx.recv();

        for worker in workers {
            worker
                .join()
                .map_err(|_| Error::Comm("pipeline stage panicked".to_string()))??;
        }

        output.map_err(|_| Error::Comm("last stage produced no output".to_string()))
    })
}

/// One stage worker: receive, forward, hand downstream.
fn run_stage(
    module: &dyn Module,
    topology: &PipelineTopology,
    inputs_rx: &Receiver<ValueTree>,
    downstream_tx: &Sender<ValueTree>,
) -> Result<()> {
    // A closed channel means an upstream stage failed; its error is reported instead.
    let Ok(inputs) = inputs_rx.recv() else {
        return Ok(());
    };
    debug!(stage = topology.pipeline_rank(), "running forward");
    let outputs = module.forward(inputs, topology)?;
    downstream_tx.send(outputs).map_err(|_| {
        Error::Comm(format!(
            "stage {}: downstream stage exited before receiving activations",
            topology.pipeline_rank()
        ))
    })
}
