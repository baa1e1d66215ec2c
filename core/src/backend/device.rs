//! Offloading a batch to a massively parallel device.

use std::{
    ops::Deref,
    sync::Arc,
    time::{Duration, Instant},
};

use tracing::{debug, error, info};

use super::{ComputeBackend, Kernel};
use crate::{
    buffers::{DigestBuffer, KeyBuffer},
    error::{CrackError, CrackResult},
    scheduling::WorkSize,
    target::TargetIndex,
    tuning::{TuneLimits, Tunable},
};

/// What a device can do.
#[derive(Clone, Debug)]
pub struct DeviceInfo {
    pub name: String,
    /// The maximum number of work items in a work group.
    pub max_work_group_size: usize,
    /// Work group sizes should be a multiple of this value.
    pub preferred_multiple: usize,
    /// The maximum number of keys in a batch.
    pub max_keys: usize,
}

/// The timestamps of a dispatch in nanoseconds, along with the number of keys
/// that passed the target filter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LaunchEvent {
    pub queued: u64,
    pub submit: u64,
    pub start: u64,
    pub end: u64,
    pub matched: u32,
}

impl LaunchEvent {
    /// The execution time of the kernel.
    pub fn duration(&self) -> Duration {
        Duration::from_nanos(self.end.saturating_sub(self.start))
    }
}

/// The output regions of a kernel that can be mapped on the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Region {
    /// The digests of every key, in column layout: word `w` of key `i` is at `w * count + i`.
    Digests,
    /// The (slot, first word) pairs of the keys that passed the target filter.
    Matches,
}

/// A compute device running a kernel over a batch of keys.
///
/// Devices are driven through a single queue, one launch at a time.
pub trait Device: Send {
    /// A host view of a device region. The region is unmapped when the view is dropped.
    type Mapped<'a>: Deref<Target = [u32]>
    where
        Self: 'a;

    fn info(&self) -> &DeviceInfo;

    /// Compiles the kernel and allocates the buffers for `capacity` keys of `slot_size` bytes.
    /// Previously uploaded targets are dropped.
    fn build(&mut self, kernel: &Arc<dyn Kernel>, capacity: usize, slot_size: usize)
        -> CrackResult<()>;

    /// Uploads the bitmap and hash table of the targets. `None` disables the filter.
    fn upload_targets(&mut self, targets: Option<&TargetIndex>) -> CrackResult<()>;

    /// Runs the kernel over the first `count` keys and waits for its completion.
    fn launch(
        &mut self,
        keys: &KeyBuffer,
        count: usize,
        salt: &[u8],
        work: WorkSize,
    ) -> CrackResult<LaunchEvent>;

    /// Maps the first `len` words of an output region.
    fn map(&mut self, region: Region, len: usize) -> CrackResult<Self::Mapped<'_>>;

    /// Frees every buffer and the compiled kernel.
    fn release(&mut self);
}

/// Owns a device along with its queue and compiled kernel.
/// Everything is released when the context is dropped.
pub struct DeviceContext<D: Device> {
    device: D,
    live: bool,
}

impl<D: Device> DeviceContext<D> {
    pub fn new(device: D) -> Self {
        Self {
            device,
            live: false,
        }
    }

    pub fn info(&self) -> &DeviceInfo {
        self.device.info()
    }

    /// Builds the kernel, releasing the previous one.
    pub fn build(
        &mut self,
        kernel: &Arc<dyn Kernel>,
        capacity: usize,
        slot_size: usize,
    ) -> CrackResult<()> {
        self.release();
        self.device.build(kernel, capacity, slot_size)?;
        self.live = true;

        Ok(())
    }

    /// Returns the device, or an error if nothing has been built.
    pub fn device(&mut self) -> CrackResult<&mut D> {
        if !self.live {
            return Err(CrackError::NotInitialized);
        }

        Ok(&mut self.device)
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    /// Releases the device resources. Calling it twice is harmless.
    pub fn release(&mut self) {
        if self.live {
            self.device.release();
            self.live = false;
        }
    }
}

impl<D: Device> Drop for DeviceContext<D> {
    fn drop(&mut self) {
        self.release();
    }
}

/// A backend offloading every batch to a device as a single dispatch.
///
/// When targets are loaded, the device filters the digests itself and only the survivors
/// are read back. The full digests are only read when an exact comparison needs them.
pub struct DeviceBackend<D: Device> {
    ctx: DeviceContext<D>,
    kernel: Option<Arc<dyn Kernel>>,
    slot_size: usize,
    capacity: usize,
    local: usize,
    filtering: bool,
    stride: usize,
}

impl<D: Device> DeviceBackend<D> {
    pub fn new(device: D) -> Self {
        let local = device.info().preferred_multiple.max(1);

        Self {
            ctx: DeviceContext::new(device),
            kernel: None,
            slot_size: 0,
            capacity: 0,
            local,
            filtering: false,
            stride: 0,
        }
    }

    /// The current work group size.
    pub fn local(&self) -> usize {
        self.local
    }

    pub fn context(&self) -> &DeviceContext<D> {
        &self.ctx
    }

    fn device(&mut self) -> CrackResult<&mut D> {
        self.ctx.device().inspect_err(|err| error!("{err}"))
    }

    fn build(&mut self, capacity: usize) -> CrackResult<()> {
        let kernel = self.kernel.clone().ok_or(CrackError::NotInitialized)?;
        let capacity = capacity.min(self.ctx.info().max_keys);

        self.ctx
            .build(&kernel, capacity, self.slot_size)
            .inspect_err(|err| error!("failed to build the {} kernel: {err}", kernel.name()))?;
        self.capacity = capacity;
        self.filtering = false;

        Ok(())
    }
}

impl<D: Device> ComputeBackend for DeviceBackend<D> {
    fn name(&self) -> &str {
        &self.ctx.info().name
    }

    fn prepare(
        &mut self,
        kernel: Arc<dyn Kernel>,
        capacity: usize,
        plaintext_length: usize,
    ) -> CrackResult<()> {
        self.kernel = Some(kernel);
        self.slot_size = KeyBuffer::slot_size_for(plaintext_length);
        self.build(capacity)
    }

    fn target_aware(&self) -> bool {
        true
    }

    fn load_targets(&mut self, targets: Option<&TargetIndex>) -> CrackResult<()> {
        let targets = targets.filter(|targets| !targets.is_empty());
        self.device()?.upload_targets(targets)?;
        self.filtering = targets.is_some();

        if let Some(targets) = targets {
            info!(
                targets = targets.len(),
                bitmap = targets.hash_num(),
                "uploaded the targets"
            );
        }

        Ok(())
    }

    fn dispatch(
        &mut self,
        keys: &KeyBuffer,
        count: usize,
        salt: &[u8],
        out: &mut DigestBuffer,
    ) -> CrackResult<usize> {
        let count = count.min(self.capacity);
        let work = WorkSize::new(count, self.local);
        let filtering = self.filtering;

        let device = self.device()?;
        let event = device
            .launch(keys, count, salt, work)
            .inspect_err(|err| error!("{err}"))?;
        debug!(
            count,
            matched = event.matched,
            kernel_ns = event.end.saturating_sub(event.start),
            "launched a batch"
        );

        let entries = if filtering {
            let matched = event.matched as usize;
            let pairs = device.map(Region::Matches, matched * 2)?;
            out.set_survivors(&pairs);
            matched
        } else {
            let words = device.map(Region::Digests, count)?;
            out.set_partial(&words);
            count
        };
        self.stride = count;

        Ok(entries)
    }

    fn fetch_full(&mut self, out: &mut DigestBuffer) -> CrackResult<()> {
        if out.is_empty() {
            return Ok(());
        }

        let stride = self.stride;
        let words = out.binary_size() / 4;
        let mapped = self.device()?.map(Region::Digests, stride * words)?;
        out.fill_full(|slot, w| mapped[w * stride + slot]);

        Ok(())
    }

    fn release(&mut self) {
        self.ctx.release();
        self.filtering = false;
    }

    fn tunable(&mut self) -> Option<&mut dyn Tunable> {
        Some(self)
    }
}

impl<D: Device> Tunable for DeviceBackend<D> {
    fn limits(&self) -> TuneLimits {
        let info = self.ctx.info();

        TuneLimits {
            max_keys: info.max_keys,
            max_local: info.max_work_group_size,
            preferred_multiple: info.preferred_multiple.max(1),
        }
    }

    fn reallocate(&mut self, capacity: usize) -> CrackResult<usize> {
        self.build(capacity)?;
        Ok(self.capacity)
    }

    fn local(&self) -> usize {
        self.local
    }

    fn set_local(&mut self, local: usize) {
        self.local = local.clamp(1, self.ctx.info().max_work_group_size.max(1));
    }

    fn timed_run(&mut self, keys: &KeyBuffer, count: usize) -> CrackResult<Duration> {
        let count = count.min(self.capacity);
        let work = WorkSize::new(count, self.local);
        let device = self.device()?;

        let event = device.launch(keys, count, &[], work)?;
        let readback = Instant::now();
        drop(device.map(Region::Digests, count)?);

        Ok(event.duration() + readback.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{DeviceBackend, DeviceContext};
    use crate::{
        backend::{
            tests::{md5, SaltedMd5},
            ComputeBackend, CpuBackend, HostDevice, Kernel,
        },
        buffers::{first_word, DigestBuffer, KeyBuffer},
        target::TargetIndex,
    };

    fn keys(count: usize) -> KeyBuffer {
        let mut keys = KeyBuffer::new(count, 31);
        for i in 0..count {
            keys.set(i, format!("password{i}").as_bytes());
        }
        keys
    }

    #[test]
    fn test_exhaustive_dispatch() {
        let count = 300;
        let keys = keys(count);
        let mut backend = DeviceBackend::new(HostDevice::new());
        backend.prepare(Arc::new(SaltedMd5), count, 31).unwrap();

        let mut digests = DigestBuffer::new(count, 16);
        assert_eq!(count, backend.dispatch(&keys, count, b"", &mut digests).unwrap());

        // only the first words are read back eagerly
        assert!(!digests.is_full_ready());
        assert_eq!(
            first_word(&md5(b"password42")),
            digests.partial(42)
        );

        backend.fetch_full(&mut digests).unwrap();
        assert_eq!(md5(b"password299"), digests.full(299).unwrap());
    }

    #[test]
    fn test_filtered_dispatch_agrees_with_host_filter() {
        let count = 500;
        let keys = keys(count);
        let targets = [7, 123, 499]
            .map(|i| md5(format!("password{i}").as_bytes()))
            .to_vec();
        let index = TargetIndex::build(targets.iter().map(Vec::as_slice), 16);

        let mut backend = DeviceBackend::new(HostDevice::new());
        backend.prepare(Arc::new(SaltedMd5), count, 31).unwrap();
        backend.load_targets(Some(&index)).unwrap();

        let mut digests = DigestBuffer::new(count, 16);
        let survivors = backend.dispatch(&keys, count, b"", &mut digests).unwrap();

        // the on-device filter keeps exactly what the host-side probe keeps
        let mut cpu = CpuBackend::new();
        cpu.prepare(Arc::new(SaltedMd5), count, 31).unwrap();
        let mut expected = DigestBuffer::new(count, 16);
        cpu.dispatch(&keys, count, b"", &mut expected).unwrap();
        let expected_slots: Vec<usize> = (0..count)
            .filter(|&i| index.probe(expected.partial(i)))
            .collect();

        let slots: Vec<usize> = (0..survivors).map(|i| digests.slot(i)).collect();
        assert_eq!(vec![7, 123, 499], slots);
        assert_eq!(expected_slots, slots);

        backend.fetch_full(&mut digests).unwrap();
        for (i, target) in targets.iter().enumerate() {
            assert_eq!(target.as_slice(), digests.full(i).unwrap());
        }
    }

    #[test]
    fn test_unload_targets() {
        let keys = keys(16);
        let index = TargetIndex::build([md5(b"password3").as_slice()], 16);
        let mut backend = DeviceBackend::new(HostDevice::new());
        backend.prepare(Arc::new(SaltedMd5), 16, 31).unwrap();
        let mut digests = DigestBuffer::new(16, 16);

        backend.load_targets(Some(&index)).unwrap();
        assert_eq!(1, backend.dispatch(&keys, 16, b"", &mut digests).unwrap());

        backend.load_targets(None).unwrap();
        assert_eq!(16, backend.dispatch(&keys, 16, b"", &mut digests).unwrap());
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut backend = DeviceBackend::new(HostDevice::new());
        backend.prepare(Arc::new(SaltedMd5), 8, 31).unwrap();
        assert!(backend.context().is_live());

        backend.release();
        backend.release();
        assert!(!backend.context().is_live());

        let keys = keys(8);
        let mut digests = DigestBuffer::new(8, 16);
        assert!(backend.dispatch(&keys, 8, b"", &mut digests).is_err());
    }

    #[test]
    fn test_context_released_on_drop() {
        let kernel: Arc<dyn Kernel> = Arc::new(SaltedMd5);
        let mut ctx = DeviceContext::new(HostDevice::new());
        ctx.build(&kernel, 4, 32).unwrap();
        assert!(ctx.is_live());
        drop(ctx);
    }
}
