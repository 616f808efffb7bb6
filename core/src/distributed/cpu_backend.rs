use super::backend::CollectiveBackend;
use crate::error::{Error, Result};
use crate::tensor::{Tensor, TensorElem};
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::any::Any;
use tracing::debug;

type Payload = Box<dyn Any + Send>;

/// An in-process collective group for workers running on threads.
///
/// Implements **Ring All-Reduce** over `crossbeam` channels: each member
/// receives from its left neighbour and sends to its right neighbour. Chunks
/// travel as typed `Vec<T>` payloads, so a member that passes a different
/// element type than its peers gets an `Error::Comm` instead of garbage.
pub struct CpuBackend {
    rank: usize,
    world_size: usize,
    left_rx: Receiver<Payload>, // Receive from rank - 1
    right_tx: Sender<Payload>,  // Send to rank + 1
}

impl std::fmt::Debug for CpuBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuBackend")
            .field("rank", &self.rank)
            .field("world_size", &self.world_size)
            .finish()
    }
}

impl CpuBackend {
    pub fn new(
        rank: usize,
        world_size: usize,
        left_rx: Receiver<Payload>,
        right_tx: Sender<Payload>,
    ) -> Self {
        Self {
            rank,
            world_size,
            left_rx,
            right_tx,
        }
    }

    /// Builds a fully wired ring of `world_size` members, indexed by rank.
    ///
    /// Channel `i` carries traffic from member `i` to member `i + 1`.
    pub fn ring(world_size: usize) -> Vec<CpuBackend> {
        let (txs, rxs): (Vec<_>, Vec<_>) = (0..world_size).map(|_| unbounded()).unzip();
        (0..world_size)
            .map(|rank| {
                let left = (rank + world_size - 1) % world_size;
                CpuBackend::new(rank, world_size, rxs[left].clone(), txs[rank].clone())
            })
            .collect()
    }

    fn send<T: TensorElem + 'static>(&self, chunk: Vec<T>) -> Result<()> {
        self.right_tx.send(Box::new(chunk)).map_err(|_| {
            Error::Comm(format!(
                "rank {} of {}: right neighbour left the group",
                self.rank, self.world_size
            ))
        })
    }

    fn recv<T: TensorElem + 'static>(&self, expected_len: usize) -> Result<Vec<T>> {
        let payload = self.left_rx.recv().map_err(|_| {
            Error::Comm(format!(
                "rank {} of {}: left neighbour left the group",
                self.rank, self.world_size
            ))
        })?;
        let chunk = payload.downcast::<Vec<T>>().map_err(|_| {
            Error::Comm(format!(
                "rank {}: peer sent a chunk of a different element type",
                self.rank
            ))
        })?;
        if chunk.len() != expected_len {
            return Err(Error::Comm(format!(
                "rank {}: expected a chunk of {} elements, got {}",
                self.rank,
                expected_len,
                chunk.len()
            )));
        }
        Ok(*chunk)
    }
}

impl CollectiveBackend for CpuBackend {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn all_reduce_sum<T: TensorElem + 'static>(&self, tensor: &mut Tensor<T>) -> Result<()> {
        let world = self.world_size;
        let data = tensor.data_mut();
        let total = data.len();
        if world <= 1 || total == 0 {
            return Ok(());
        }
        debug!(rank = self.rank, world, elements = total, "ring all-reduce");

        let chunk_size = total.div_ceil(world);
        let bounds = |idx: usize| {
            let start = (idx * chunk_size).min(total);
            (start, (start + chunk_size).min(total))
        };

        // Phase 1: scatter-reduce. After world - 1 steps, rank r owns the
        // fully reduced chunk (r + 1) % world.
        for step in 0..world - 1 {
            let send_idx = (self.rank + world - step) % world;
            let recv_idx = (self.rank + world - step - 1) % world;

            let (start, end) = bounds(send_idx);
            self.send(data[start..end].to_vec())?;

            let (start, end) = bounds(recv_idx);
            let incoming: Vec<T> = self.recv(end - start)?;
            for (dst, val) in data[start..end].iter_mut().zip(incoming) {
                *dst += val;
            }
        }

        // Phase 2: all-gather the reduced chunks around the ring.
        for step in 0..world - 1 {
            let send_idx = (self.rank + world + 1 - step) % world;
            let recv_idx = (self.rank + world - step) % world;

            let (start, end) = bounds(send_idx);
            self.send(data[start..end].to_vec())?;

            let (start, end) = bounds(recv_idx);
            let incoming: Vec<T> = self.recv(end - start)?;
            data[start..end].copy_from_slice(&incoming);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{DType, DynTensor};
    use half::bf16;
    use std::thread;

    #[test]
    fn test_ring_wiring() {
        let ring = CpuBackend::ring(3);
        assert_eq!(ring.len(), 3);
        for (rank, backend) in ring.iter().enumerate() {
            assert_eq!(backend.rank(), rank);
            assert_eq!(backend.world_size(), 3);
        }
    }

    #[test]
    fn test_single_member_is_noop() {
        let backend = CpuBackend::ring(1).pop().unwrap();
        let mut t = Tensor::<f32>::new(vec![1.0, 2.0], &[2]).unwrap();
        backend.all_reduce_sum(&mut t).unwrap();
        assert_eq!(t.data(), &[1.0, 2.0]);
    }

    #[test]
    fn test_uneven_chunks_sum_correctly() {
        // 5 elements over 3 ranks: chunks of 2, 2, 1.
        let handles: Vec<_> = CpuBackend::ring(3)
            .into_iter()
            .map(|backend| {
                thread::spawn(move || {
                    let r = backend.rank() as f32;
                    let mut t = Tensor::new(vec![r, r + 1.0, r + 2.0, r + 3.0, r + 4.0], &[5]).unwrap();
                    backend.all_reduce_sum(&mut t).unwrap();
                    t
                })
            })
            .collect();

        for handle in handles {
            let t = handle.join().unwrap();
            // sum over r in {0,1,2} of (r + i) = 3 + 3i
            assert_eq!(t.data(), &[3.0, 6.0, 9.0, 12.0, 15.0]);
        }
    }

    #[test]
    fn test_dyn_reduce_in_bf16() {
        let handles: Vec<_> = CpuBackend::ring(2)
            .into_iter()
            .map(|backend| {
                thread::spawn(move || {
                    let mut t = DynTensor::F32(Tensor::full(&[4], 0.5)).to_dtype(DType::BF16);
                    backend.all_reduce_sum_dyn(&mut t).unwrap();
                    t
                })
            })
            .collect();

        for handle in handles {
            match handle.join().unwrap() {
                DynTensor::BF16(t) => assert!(t.data().iter().all(|&v| v == bf16::ONE)),
                other => panic!("dtype changed to {}", other.dtype()),
            }
        }
    }

    #[test]
    fn test_bool_reduce_is_rejected() {
        let backend = CpuBackend::ring(1).pop().unwrap();
        let mut t = DynTensor::zeros(DType::Bool, &[2]);
        assert!(backend.all_reduce_sum_dyn(&mut t).is_err());
    }

    #[test]
    fn test_dropped_peer_is_reported() {
        let mut ring = CpuBackend::ring(2);
        let _peer = ring.pop().unwrap();
        let backend = ring.pop().unwrap();
        drop(_peer);

        let mut t = Tensor::<f32>::ones(&[4]);
        assert!(matches!(
            backend.all_reduce_sum(&mut t),
            Err(Error::Comm(_))
        ));
    }
}
