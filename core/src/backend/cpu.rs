use std::sync::Arc;

use super::{ComputeBackend, Kernel};
use crate::{
    buffers::{DigestBuffer, KeyBuffer},
    error::{CrackError, CrackResult},
};

/// Hashes the keys one after the other on the calling thread.
#[derive(Default)]
pub struct CpuBackend {
    kernel: Option<Arc<dyn Kernel>>,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        "CPU"
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
        let mut hasher = kernel.hasher();

        for (i, digest) in out.full_mut(count).chunks_exact_mut(binary_size).enumerate() {
            kernel.compute(&mut *hasher, keys.get(i), salt, digest)?;
        }
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

    use super::CpuBackend;
    use crate::{
        backend::{
            tests::{md5, SaltedMd5},
            ComputeBackend,
        },
        buffers::{DigestBuffer, KeyBuffer},
    };

    #[test]
    fn test_dispatch() {
        let mut backend = CpuBackend::new();
        backend.prepare(Arc::new(SaltedMd5), 4, 31).unwrap();

        let mut keys = KeyBuffer::new(4, 31);
        keys.set(0, b"test");
        keys.set(1, b"abc");
        let mut digests = DigestBuffer::new(4, 16);

        assert_eq!(2, backend.dispatch(&keys, 2, b"", &mut digests).unwrap());
        assert_eq!(md5(b"test"), digests.full(0).unwrap());
        assert_eq!(md5(b"abc"), digests.full(1).unwrap());
        assert!(digests.full(2).is_none());

        backend.dispatch(&keys, 1, b"salt", &mut digests).unwrap();
        assert_eq!(md5(b"testsalt"), digests.full(0).unwrap());
    }

    #[test]
    fn test_release() {
        let mut backend = CpuBackend::new();
        backend.prepare(Arc::new(SaltedMd5), 1, 31).unwrap();
        backend.release();
        backend.release();

        let keys = KeyBuffer::new(1, 31);
        let mut digests = DigestBuffer::new(1, 16);
        assert!(backend.dispatch(&keys, 1, b"", &mut digests).is_err());
    }
}
