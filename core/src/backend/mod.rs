//! The backends running the batched digest computation.

mod cpu;
mod device;
mod host;
mod parallel;
#[cfg(feature = "wgpu")]
mod wgpu;

use std::sync::Arc;

use digest::DynDigest;

use crate::{
    buffers::{DigestBuffer, KeyBuffer},
    error::CrackResult,
    target::TargetIndex,
    tuning::Tunable,
};

pub use cpu::CpuBackend;
pub use device::{Device, DeviceBackend, DeviceContext, DeviceInfo, LaunchEvent, Region};
pub use host::{HostDevice, HostMapped};
pub use parallel::ParallelBackend;
#[cfg(feature = "wgpu")]
pub use self::wgpu::{WgpuDevice, WgpuMapped};

/// The computation applied to every key of a batch.
pub trait Kernel: Send + Sync + 'static {
    /// The name of the algorithm.
    fn name(&self) -> &'static str;

    /// The size of a digest in bytes.
    fn binary_size(&self) -> usize;

    /// Returns a fresh hasher. Every worker owns its own.
    fn hasher(&self) -> Box<dyn DynDigest>;

    /// Computes the digest of a key into `out`, which is `binary_size` bytes long.
    fn compute(
        &self,
        hasher: &mut dyn DynDigest,
        key: &[u8],
        salt: &[u8],
        out: &mut [u8],
    ) -> CrackResult<()>;

    /// The WGSL source of this kernel, for the algorithms that have one.
    fn wgsl(&self) -> Option<&'static str> {
        None
    }
}

/// Where a batch gets hashed.
///
/// A dispatch blocks until the digests are ready and takes the buffers exclusively,
/// so two dispatches can never race on the same batch.
pub trait ComputeBackend: Send {
    /// The name of the backend, shown next to the algorithm name.
    fn name(&self) -> &str;

    /// Acquires the resources needed to hash batches of `capacity` keys with this kernel.
    fn prepare(
        &mut self,
        kernel: Arc<dyn Kernel>,
        capacity: usize,
        plaintext_length: usize,
    ) -> CrackResult<()>;

    /// Returns true if the backend filters the digests against the targets itself.
    fn target_aware(&self) -> bool {
        false
    }

    /// Hands the targets to a target-aware backend. `None` disables the filtering.
    fn load_targets(&mut self, _targets: Option<&TargetIndex>) -> CrackResult<()> {
        Ok(())
    }

    /// Hashes the first `count` keys.
    ///
    /// Returns the number of entries written to `out`: every key when no targets are loaded,
    /// only the keys surviving the target filter otherwise.
    fn dispatch(
        &mut self,
        keys: &KeyBuffer,
        count: usize,
        salt: &[u8],
        out: &mut DigestBuffer,
    ) -> CrackResult<usize>;

    /// Makes the full digests of the last dispatch available in `out`.
    fn fetch_full(&mut self, _out: &mut DigestBuffer) -> CrackResult<()> {
        Ok(())
    }

    /// Releases every resource. Calling it twice is harmless.
    fn release(&mut self);

    /// Returns the auto-tuning interface of backends that have knobs to tune.
    fn tunable(&mut self) -> Option<&mut dyn Tunable> {
        None
    }
}
