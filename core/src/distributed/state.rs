//! Model-parallel state: where this worker sits in the pipeline and which
//! communication groups it belongs to.
//!
//! Everything here is an explicit value handed to the code that needs it.
//! A worker owns one [`ParallelState`]; the launcher builds them.

use super::backend::CollectiveBackend;
use super::cpu_backend::CpuBackend;
use crate::error::{Error, Result};

/// A worker's position among the ordered pipeline stages.
///
/// Under interleaved ("virtual") scheduling each pipeline rank holds several
/// model chunks; `virtual_rank` picks the chunk this topology describes. The
/// stage predicates can either honour that subdivision or look only at the
/// physical rank (`ignore_virtual = true`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineTopology {
    pipeline_rank: usize,
    pipeline_size: usize,
    virtual_rank: Option<usize>,
    virtual_size: Option<usize>,
}

impl PipelineTopology {
    pub fn new(pipeline_rank: usize, pipeline_size: usize) -> Result<Self> {
        if pipeline_size == 0 || pipeline_rank >= pipeline_size {
            return Err(Error::config(format!(
                "pipeline rank {pipeline_rank} is outside a pipeline of {pipeline_size} stages"
            )));
        }
        Ok(Self {
            pipeline_rank,
            pipeline_size,
            virtual_rank: None,
            virtual_size: None,
        })
    }

    /// A one-stage pipeline: the worker is both first and last.
    pub fn single_stage() -> Self {
        Self {
            pipeline_rank: 0,
            pipeline_size: 1,
            virtual_rank: None,
            virtual_size: None,
        }
    }

    /// Selects model chunk `virtual_rank` out of `virtual_size` on this rank.
    pub fn with_virtual(mut self, virtual_rank: usize, virtual_size: usize) -> Result<Self> {
        if virtual_size == 0 || virtual_rank >= virtual_size {
            return Err(Error::config(format!(
                "virtual rank {virtual_rank} is outside {virtual_size} model chunks"
            )));
        }
        self.virtual_rank = Some(virtual_rank);
        self.virtual_size = Some(virtual_size);
        Ok(self)
    }

    pub fn pipeline_rank(&self) -> usize {
        self.pipeline_rank
    }

    pub fn pipeline_size(&self) -> usize {
        self.pipeline_size
    }

    pub fn virtual_rank(&self) -> Option<usize> {
        self.virtual_rank
    }

    pub fn virtual_size(&self) -> Option<usize> {
        self.virtual_size
    }

    /// `true` if this worker holds the input embedding.
    pub fn is_first_stage(&self, ignore_virtual: bool) -> bool {
        if !ignore_virtual {
            if let (Some(_), Some(vrank)) = (self.virtual_size, self.virtual_rank) {
                if vrank != 0 {
                    return false;
                }
            }
        }
        self.pipeline_rank == 0
    }

    /// `true` if this worker holds the output projection.
    pub fn is_last_stage(&self, ignore_virtual: bool) -> bool {
        if !ignore_virtual {
            if let (Some(vsize), Some(vrank)) = (self.virtual_size, self.virtual_rank) {
                if vrank != vsize - 1 {
                    return false;
                }
            }
        }
        self.pipeline_rank == self.pipeline_size - 1
    }
}

/// Communication groups of a worker whose distributed runtime is up.
#[derive(Debug)]
struct DistributedGroups<B> {
    world_rank: usize,
    world_size: usize,
    /// Spans every pipeline stage of this model replica.
    model_parallel_group: B,
    /// Spans exactly the first and the last pipeline stage. `None` on
    /// workers that are in neither role.
    embedding_group: Option<B>,
}

/// Everything a worker knows about the parallel layout it runs in.
#[derive(Debug)]
pub struct ParallelState<B: CollectiveBackend = CpuBackend> {
    topology: PipelineTopology,
    distributed: Option<DistributedGroups<B>>,
}

impl<B: CollectiveBackend> ParallelState<B> {
    fn groups(&self) -> Result<&DistributedGroups<B>> {
        self.distributed
            .as_ref()
            .ok_or_else(|| Error::config("distributed runtime is not initialized"))
    }

    /// A worker with no distributed runtime, e.g. a tool that only loads and
    /// inspects a model.
    pub fn local(topology: PipelineTopology) -> Self {
        Self {
            topology,
            distributed: None,
        }
    }

    /// A worker connected to its peers.
    pub fn distributed(
        topology: PipelineTopology,
        world_rank: usize,
        world_size: usize,
        model_parallel_group: B,
        embedding_group: Option<B>,
    ) -> Self {
        Self {
            topology,
            distributed: Some(DistributedGroups {
                world_rank,
                world_size,
                model_parallel_group,
                embedding_group,
            }),
        }
    }

    pub fn topology(&self) -> &PipelineTopology {
        &self.topology
    }

    /// Switches the model chunk this state describes under virtual staging.
    pub fn set_virtual_rank(&mut self, virtual_rank: usize) -> Result<()> {
        let size = self.topology.virtual_size.ok_or_else(|| {
            Error::config("set_virtual_rank called without virtual pipeline staging")
        })?;
        self.topology = self.topology.with_virtual(virtual_rank, size)?;
        Ok(())
    }

    pub fn pipeline_model_parallel_size(&self) -> usize {
        self.topology.pipeline_size
    }

    pub fn is_pipeline_first_stage(&self, ignore_virtual: bool) -> bool {
        self.topology.is_first_stage(ignore_virtual)
    }

    pub fn is_pipeline_last_stage(&self, ignore_virtual: bool) -> bool {
        self.topology.is_last_stage(ignore_virtual)
    }

    /// `true` once this worker is connected to its peers.
    pub fn is_distributed_initialized(&self) -> bool {
        self.distributed.is_some()
    }

    pub fn world_rank(&self) -> Option<usize> {
        self.distributed.as_ref().map(|d| d.world_rank)
    }

    pub fn world_size(&self) -> Option<usize> {
        self.distributed.as_ref().map(|d| d.world_size)
    }

    /// The group spanning all pipeline stages; reductions that must agree
    /// model-wide (the gradient norm) run over it.
    pub fn model_parallel_group(&self) -> Result<&B> {
        Ok(&self.groups()?.model_parallel_group)
    }

    /// The two-member group spanning the first and the last stage.
    pub fn embedding_group(&self) -> Result<&B> {
        self.groups()?.embedding_group.as_ref().ok_or_else(|| {
            Error::config(format!(
                "pipeline rank {} is not a member of the embedding group",
                self.topology.pipeline_rank
            ))
        })
    }
}
