//! Device using wgpu.
//! Supports the following backends:
//! - Vulkan, DX12, DX11 on Windows
//! - Vulkan, GLES 3 on Linux
//! - Metal on MacOS

use std::{
    borrow::Cow,
    collections::HashMap,
    mem,
    ops::Deref,
    sync::{mpsc, Arc},
    time::Instant,
};

use pollster::FutureExt;
use tracing::info;
use wgpu::{
    Backends, BindGroupDescriptor, BindGroupEntry, Buffer, BufferDescriptor, BufferUsages,
    BufferView, CommandEncoderDescriptor, ComputePassDescriptor, ComputePipeline,
    ComputePipelineDescriptor, DeviceDescriptor, Features, Instance, Maintain, MapMode,
    PowerPreference, Queue, RequestAdapterOptions, ShaderModuleDescriptor, ShaderSource,
};

use super::{
    device::{Device, DeviceInfo, LaunchEvent, Region},
    Kernel,
};
use crate::{
    buffers::KeyBuffer,
    error::{CrackError, CrackResult},
    scheduling::WorkSize,
    target::{TargetIndex, PASSWORD_HASH_SHR},
};

/// The byte offset of the pairs in the matches buffer, after the match count and its padding.
const MATCHES_HEADER: u64 = 8;

struct Gpu {
    device: wgpu::Device,
    queue: Queue,
}

/// The buffers and pipelines of a built kernel.
struct KernelState {
    source: String,
    pipelines: HashMap<usize, ComputePipeline>,
    capacity: usize,
    slot_size: usize,
    keys: Buffer,
    lengths: Buffer,
    digests: Buffer,
    matches: Buffer,
    bitmap: Buffer,
    heads: Buffer,
    next: Buffer,
    words: Buffer,
    params: Buffer,
    staging: Buffer,
    staging_size: u64,
    filter: Option<(u32, u32)>,
}

impl KernelState {
    /// Compiles the pipeline for a work group size, unless it already is.
    fn compile(&mut self, device: &wgpu::Device, local: usize) {
        let source = &self.source;

        self.pipelines.entry(local).or_insert_with(|| {
            let module = device.create_shader_module(ShaderModuleDescriptor {
                label: Some("Kernel"),
                source: ShaderSource::Wgsl(Cow::Owned(
                    source.replace("{{WORKGROUP_SIZE}}", &local.to_string()),
                )),
            });

            device.create_compute_pipeline(&ComputePipelineDescriptor {
                label: None,
                layout: None,
                module: &module,
                entry_point: "md5",
            })
        });
    }
}

/// A GPU driven through wgpu.
/// The adapter is only requested when a kernel is first built.
pub struct WgpuDevice {
    backends: Backends,
    info: DeviceInfo,
    epoch: Instant,
    gpu: Option<Gpu>,
    state: Option<KernelState>,
}

impl WgpuDevice {
    pub fn new(backends: Backends) -> Self {
        Self {
            backends,
            info: DeviceInfo {
                name: "wgpu".to_owned(),
                max_work_group_size: 256,
                preferred_multiple: 64,
                max_keys: 1 << 22,
            },
            epoch: Instant::now(),
            gpu: None,
            state: None,
        }
    }

    async fn open(&mut self) -> CrackResult<Gpu> {
        let instance = Instance::new(self.backends);

        let adapter = instance
            .request_adapter(&RequestAdapterOptions {
                power_preference: PowerPreference::HighPerformance,
                ..Default::default()
            })
            .await
            .ok_or(CrackError::NoGpu)?;

        let limits = adapter.limits();
        let (device, queue) = adapter
            .request_device(
                &DeviceDescriptor {
                    label: None,
                    features: Features::empty(),
                    limits: limits.clone(),
                },
                None,
            )
            .await?;

        self.info = DeviceInfo {
            name: adapter.get_info().name,
            max_work_group_size: limits
                .max_compute_invocations_per_workgroup
                .min(limits.max_compute_workgroup_size_x) as usize,
            preferred_multiple: 64,
            max_keys: (limits.max_storage_buffer_binding_size as usize / 32).min(1 << 24),
        };
        info!(device = %self.info.name, "opened the GPU");

        Ok(Gpu { device, queue })
    }

    fn now(epoch: Instant) -> u64 {
        epoch.elapsed().as_nanos() as u64
    }
}

fn buffer(device: &wgpu::Device, label: &str, size: u64, usage: BufferUsages) -> Buffer {
    device.create_buffer(&BufferDescriptor {
        label: Some(label),
        // empty bindings are not allowed
        size: size.max(4).next_multiple_of(4),
        usage,
        mapped_at_creation: false,
    })
}

/// A mapped region of the staging buffer, unmapped when dropped.
pub struct WgpuMapped<'a> {
    view: Option<BufferView<'a>>,
    buffer: &'a Buffer,
}

impl Deref for WgpuMapped<'_> {
    type Target = [u32];

    fn deref(&self) -> &[u32] {
        match &self.view {
            Some(view) => bytemuck::cast_slice::<u8, u32>(view),
            None => &[],
        }
    }
}

impl Drop for WgpuMapped<'_> {
    fn drop(&mut self) {
        if self.view.take().is_some() {
            self.buffer.unmap();
        }
    }
}

/// Maps the beginning of a buffer and waits for it.
fn map_read(gpu: &Gpu, buffer: &Buffer, size: u64) -> CrackResult<()> {
    let (sender, receiver) = mpsc::channel();
    buffer
        .slice(..size)
        .map_async(MapMode::Read, move |result| {
            let _ = sender.send(result);
        });

    gpu.device.poll(Maintain::Wait);

    receiver
        .recv()
        .map_err(|_| CrackError::Device("the mapping never completed".to_owned()))??;

    Ok(())
}

impl Device for WgpuDevice {
    type Mapped<'a> = WgpuMapped<'a>;

    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn build(
        &mut self,
        kernel: &Arc<dyn Kernel>,
        capacity: usize,
        slot_size: usize,
    ) -> CrackResult<()> {
        let source = kernel.wgsl().ok_or_else(|| {
            CrackError::Device(format!("{} has no WGSL kernel", kernel.name()))
        })?;

        if self.gpu.is_none() {
            let gpu = self.open().block_on()?;
            self.gpu = Some(gpu);
        }
        let gpu = self.gpu.as_ref().ok_or(CrackError::NoGpu)?;
        let device = &gpu.device;

        let capacity = capacity as u64;
        let digests_size = capacity * kernel.binary_size() as u64;
        let pairs_size = capacity * 2 * mem::size_of::<u32>() as u64;
        let staging_size = digests_size.max(pairs_size).max(4);
        let input = BufferUsages::STORAGE | BufferUsages::COPY_DST;
        let output = BufferUsages::STORAGE | BufferUsages::COPY_SRC | BufferUsages::COPY_DST;

        self.state = Some(KernelState {
            source: source.to_owned(),
            pipelines: HashMap::new(),
            capacity: capacity as usize,
            slot_size,
            keys: buffer(device, "Keys", capacity * slot_size as u64, input),
            lengths: buffer(device, "Lengths", capacity * 4, input),
            digests: buffer(device, "Digests", digests_size, output),
            matches: buffer(device, "Matches", MATCHES_HEADER + pairs_size, output),
            bitmap: buffer(device, "Bitmap", 4, input),
            heads: buffer(device, "Heads", 4, input),
            next: buffer(device, "Next", 4, input),
            words: buffer(device, "Words", 4, input),
            params: buffer(
                device,
                "Params",
                32,
                BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            ),
            staging: buffer(
                device,
                "Staging",
                staging_size,
                BufferUsages::MAP_READ | BufferUsages::COPY_DST,
            ),
            staging_size,
            filter: None,
        });

        Ok(())
    }

    fn upload_targets(&mut self, targets: Option<&TargetIndex>) -> CrackResult<()> {
        let gpu = self.gpu.as_ref().ok_or(CrackError::NotInitialized)?;
        let state = self.state.as_mut().ok_or(CrackError::NotInitialized)?;

        let Some(targets) = targets else {
            state.filter = None;
            return Ok(());
        };

        let upload = |label, words: &[u32]| {
            let buffer = buffer(
                &gpu.device,
                label,
                mem::size_of_val(words) as u64,
                BufferUsages::STORAGE | BufferUsages::COPY_DST,
            );
            gpu.queue.write_buffer(&buffer, 0, bytemuck::cast_slice(words));
            buffer
        };

        state.bitmap = upload("Bitmap", targets.bitmap_words());
        state.heads = upload("Heads", targets.heads());
        state.next = upload("Next", targets.next());
        state.words = upload("Words", targets.words());
        state.filter = Some((targets.mask(), PASSWORD_HASH_SHR));

        Ok(())
    }

    fn launch(
        &mut self,
        keys: &KeyBuffer,
        count: usize,
        _salt: &[u8],
        work: WorkSize,
    ) -> CrackResult<LaunchEvent> {
        let Self {
            gpu, state, epoch, ..
        } = self;
        let gpu = gpu.as_ref().ok_or(CrackError::NotInitialized)?;
        let state = state.as_mut().ok_or(CrackError::NotInitialized)?;
        let queued = Self::now(*epoch);

        if keys.slot_size() != state.slot_size {
            return Err(CrackError::Device(format!(
                "keys have {} bytes slots, the kernel expects {}",
                keys.slot_size(),
                state.slot_size
            )));
        }

        let count = count.min(state.capacity);
        if count > 0 {
            gpu.queue
                .write_buffer(&state.keys, 0, &keys.bytes()[..count * state.slot_size]);
            gpu.queue.write_buffer(
                &state.lengths,
                0,
                bytemuck::cast_slice(&keys.lengths()[..count]),
            );
        }

        let (mask, shr) = state.filter.unwrap_or_default();
        let params: [u32; 8] = [
            count as u32,
            (state.slot_size / 4) as u32,
            state.filter.is_some() as u32,
            mask,
            shr,
            0,
            0,
            0,
        ];
        gpu.queue
            .write_buffer(&state.params, 0, bytemuck::cast_slice(&params));
        gpu.queue.write_buffer(&state.matches, 0, &[0u8; 8]);

        state.compile(&gpu.device, work.local);
        let pipeline = state
            .pipelines
            .get(&work.local)
            .ok_or_else(|| CrackError::Device("the kernel failed to compile".to_owned()))?;
        let bind_group_layout = pipeline.get_bind_group_layout(0);
        let bindings = [
            &state.keys,
            &state.lengths,
            &state.digests,
            &state.matches,
            &state.bitmap,
            &state.heads,
            &state.next,
            &state.words,
            &state.params,
        ];
        let entries = bindings
            .iter()
            .enumerate()
            .map(|(binding, buffer)| BindGroupEntry {
                binding: binding as u32,
                resource: buffer.as_entire_binding(),
            })
            .collect::<Vec<_>>();
        let bind_group = gpu.device.create_bind_group(&BindGroupDescriptor {
            label: None,
            layout: &bind_group_layout,
            entries: &entries,
        });

        let mut encoder = gpu
            .device
            .create_command_encoder(&CommandEncoderDescriptor { label: None });
        {
            let mut cpass = encoder.begin_compute_pass(&ComputePassDescriptor { label: None });
            cpass.set_pipeline(pipeline);
            cpass.set_bind_group(0, &bind_group, &[]);
            cpass.dispatch_workgroups(work.groups() as u32, 1, 1);
        }
        encoder.copy_buffer_to_buffer(&state.matches, 0, &state.staging, 0, 4);

        let submit = Self::now(*epoch);
        gpu.queue.submit(Some(encoder.finish()));

        // reading the match count waits for the kernel
        map_read(gpu, &state.staging, 4)?;
        let matched = {
            let view = state.staging.slice(..4).get_mapped_range();
            bytemuck::cast_slice::<u8, u32>(&view)[0]
        };
        state.staging.unmap();
        let end = Self::now(*epoch);

        Ok(LaunchEvent {
            queued,
            submit,
            start: submit,
            end,
            matched: if state.filter.is_some() { matched } else { 0 },
        })
    }

    fn map(&mut self, region: Region, len: usize) -> CrackResult<WgpuMapped<'_>> {
        let gpu = self.gpu.as_ref().ok_or(CrackError::NotInitialized)?;
        let state = self.state.as_ref().ok_or(CrackError::NotInitialized)?;

        if len == 0 {
            return Ok(WgpuMapped {
                view: None,
                buffer: &state.staging,
            });
        }

        let size = (len * mem::size_of::<u32>()) as u64;
        if size > state.staging_size {
            return Err(CrackError::Device(format!(
                "cannot map {len} words of {region:?}"
            )));
        }

        let (source, offset) = match region {
            Region::Digests => (&state.digests, 0),
            Region::Matches => (&state.matches, MATCHES_HEADER),
        };

        let mut encoder = gpu
            .device
            .create_command_encoder(&CommandEncoderDescriptor { label: None });
        encoder.copy_buffer_to_buffer(source, offset, &state.staging, 0, size);
        gpu.queue.submit(Some(encoder.finish()));

        map_read(gpu, &state.staging, size)?;

        Ok(WgpuMapped {
            view: Some(state.staging.slice(..size).get_mapped_range()),
            buffer: &state.staging,
        })
    }

    fn release(&mut self) {
        self.state = None;
    }
}
