//! In-process launcher: builds the per-rank state of a pipeline whose stages
//! run as threads of the current process.

use super::cpu_backend::CpuBackend;
use super::state::{ParallelState, PipelineTopology};
use crate::config::TrainingArgs;
use crate::error::Result;
use tracing::info;

/// Creates one [`ParallelState`] per pipeline rank, indexed by rank.
///
/// Every rank joins a model-parallel group spanning all stages. The
/// embedding group is wired between rank `0` and rank
/// `pipeline_model_parallel_size - 1`; with a single stage it degenerates to a
/// one-member group on rank `0`. Middle ranks get no embedding group. When
/// virtual staging is configured every state starts on chunk `0`.
///
/// Each returned state must be moved onto its own thread before any
/// collective runs: the group operations block until all members arrive.
pub fn initialize_model_parallel(args: &TrainingArgs) -> Result<Vec<ParallelState<CpuBackend>>> {
    args.validate()?;
    let pipeline_size = args.pipeline_model_parallel_size;

    let mut embedding_members = CpuBackend::ring(if pipeline_size == 1 { 1 } else { 2 }).into_iter();
    let mut first_member = embedding_members.next();
    let mut last_member = embedding_members.next();

    let mut states = Vec::with_capacity(pipeline_size);
    for (rank, model_parallel_group) in CpuBackend::ring(pipeline_size).into_iter().enumerate() {
        let mut topology = PipelineTopology::new(rank, pipeline_size)?;
        if let Some(virtual_size) = args.virtual_pipeline_model_parallel_size {
            topology = topology.with_virtual(0, virtual_size)?;
        }

        let embedding_group = if rank == 0 {
            first_member.take()
        } else if rank == pipeline_size - 1 {
            last_member.take()
        } else {
            None
        };

        states.push(ParallelState::distributed(
            topology,
            rank,
            pipeline_size,
            model_parallel_group,
            embedding_group,
        ));
    }

    info!(
        pipeline_model_parallel_size = pipeline_size,
        virtual_pipeline_model_parallel_size = ?args.virtual_pipeline_model_parallel_size,
        "initialized model parallel state"
    );
    Ok(states)
}
