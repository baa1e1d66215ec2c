use std::{mem, sync::Arc};

use rayon::prelude::*;

use super::{ComputeBackend, Kernel};
use crate::{
    buffers::{DigestBuffer, KeyBuffer},
    error::{CrackError, CrackResult},
    scheduling::SliceIterator,
};

/// Hashes a batch with fork-join parallelism.
/// The batch is split into one contiguous slice per worker, and the call returns once
/// every slice is done. Workers only share the keys and the salt, read-only.
#[derive(Default)]
pub struct ParallelBackend {
    kernel: Option<Arc<dyn Kernel>>,
    workers: Option<usize>,
}

impl ParallelBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a fixed number of slices instead of one per rayon thread.
    pub fn with_workers(workers: usize) -> Self {
        Self {
            kernel: None,
            workers: Some(workers),
        }
    }
}

impl ComputeBackend for ParallelBackend {
    fn name(&self) -> &str {
        "CPU, multithreaded"
    }

    fn prepare(
        &mut self,
        kernel: Arc<dyn Kernel>,
        _capacity: usize,
        _plaintext_length: usize,
    ) -> CrackResult<()> {
        self.kernel = Some(kernel);
        Ok(())
    }

    fn dispatch(
        &mut self,
        keys: &KeyBuffer,
        count: usize,
        salt: &[u8],
        out: &mut DigestBuffer,
    ) -> CrackResult<usize> {
        let kernel = self.kernel.as_ref().ok_or(CrackError::NotInitialized)?;
        let binary_size = out.binary_size();
        let workers = self
            .workers
            .unwrap_or_else(rayon::current_num_threads);

        // cut the output into the disjoint slices the workers will own
        let mut rest = out.full_mut(count);
        let mut jobs = Vec::new();
        for slice in SliceIterator::new(count, workers) {
            let (digests, tail) = mem::take(&mut rest).split_at_mut(slice.len() * binary_size);
            jobs.push((slice, digests));
            rest = tail;
        }

        jobs.into_par_iter().try_for_each(|(slice, digests)| {
            let mut hasher = kernel.hasher();
            for (i, digest) in slice.zip(digests.chunks_exact_mut(binary_size)) {
                kernel.compute(&mut *hasher, keys.get(i), salt, digest)?;
            }

            CrackResult::Ok(())
        })?;
        out.seal_full(count);

        Ok(count)
    }

    fn release(&mut self) {
        self.kernel = None;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::ParallelBackend;
    use crate::{
        backend::{
            tests::{md5, SaltedMd5},
            ComputeBackend, CpuBackend,
        },
        buffers::{DigestBuffer, KeyBuffer},
    };

    #[test]
    fn test_matches_cpu_backend() {
        let count = 1000;
        let mut keys = KeyBuffer::new(count, 31);
        for i in 0..count {
            keys.set(i, format!("key{i}").as_bytes());
        }

        let mut cpu = CpuBackend::new();
        cpu.prepare(Arc::new(SaltedMd5), count, 31).unwrap();
        let mut expected = DigestBuffer::new(count, 16);
        cpu.dispatch(&keys, count, b"s", &mut expected).unwrap();

        // an odd number of workers leaves a remainder
        let mut parallel = ParallelBackend::with_workers(7);
        parallel.prepare(Arc::new(SaltedMd5), count, 31).unwrap();
        let mut actual = DigestBuffer::new(count, 16);
        assert_eq!(
            count,
            parallel.dispatch(&keys, count, b"s", &mut actual).unwrap()
        );

        for i in 0..count {
            assert_eq!(expected.full(i), actual.full(i));
            assert_eq!(expected.partial(i), actual.partial(i));
        }
    }

    #[test]
    fn test_partial_batch() {
        let mut keys = KeyBuffer::new(8, 31);
        keys.set(0, b"test");
        let mut parallel = ParallelBackend::new();
        parallel.prepare(Arc::new(SaltedMd5), 8, 31).unwrap();
        let mut digests = DigestBuffer::new(8, 16);

        assert_eq!(1, parallel.dispatch(&keys, 1, b"", &mut digests).unwrap());
        assert_eq!(md5(b"test"), digests.full(0).unwrap());
        assert_eq!(1, digests.len());
    }
}
