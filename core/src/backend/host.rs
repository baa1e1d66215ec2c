//! A device emulated on the host, running the work groups of a dispatch on rayon.

use std::{ops::Deref, sync::Arc, time::Instant};

use rayon::prelude::*;

use super::{
    device::{Device, DeviceInfo, LaunchEvent, Region},
    Kernel,
};
use crate::{
    buffers::{first_word, KeyBuffer},
    error::{CrackError, CrackResult},
    scheduling::WorkSize,
    target::TargetIndex,
};

/// A device executing the kernels with the host CPU.
///
/// It lays out its outputs exactly like a GPU would, so it's used to run the device code
/// paths where no GPU is available.
pub struct HostDevice {
    info: DeviceInfo,
    epoch: Instant,
    kernel: Option<Arc<dyn Kernel>>,
    capacity: usize,
    digests: Vec<u32>,
    matches: Vec<u32>,
    targets: Option<TargetIndex>,
    live_mappings: usize,
}

impl HostDevice {
    pub fn new() -> Self {
        Self {
            info: DeviceInfo {
                name: "host".to_owned(),
                max_work_group_size: 1024,
                preferred_multiple: 32,
                max_keys: 1 << 24,
            },
            epoch: Instant::now(),
            kernel: None,
            capacity: 0,
            digests: Vec::new(),
            matches: Vec::new(),
            targets: None,
            live_mappings: 0,
        }
    }

    /// The number of mapped regions that haven't been unmapped yet.
    pub fn live_mappings(&self) -> usize {
        self.live_mappings
    }

    fn now(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }
}

impl Default for HostDevice {
    fn default() -> Self {
        Self::new()
    }
}

/// A region of a host device, unmapped when dropped.
pub struct HostMapped<'a> {
    data: &'a [u32],
    live: &'a mut usize,
}

impl Deref for HostMapped<'_> {
    type Target = [u32];

    fn deref(&self) -> &[u32] {
        self.data
    }
}

impl Drop for HostMapped<'_> {
    fn drop(&mut self) {
        *self.live -= 1;
    }
}

impl Device for HostDevice {
    type Mapped<'a> = HostMapped<'a>;

    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn build(
        &mut self,
        kernel: &Arc<dyn Kernel>,
        capacity: usize,
        _slot_size: usize,
    ) -> CrackResult<()> {
        let words = kernel.binary_size() / 4;

        self.kernel = Some(kernel.clone());
        self.capacity = capacity;
        self.digests = vec![0; capacity * words];
        self.matches = Vec::with_capacity(2 * capacity);
        self.targets = None;

        Ok(())
    }

    fn upload_targets(&mut self, targets: Option<&TargetIndex>) -> CrackResult<()> {
        self.targets = targets.cloned();
        Ok(())
    }

    fn launch(
        &mut self,
        keys: &KeyBuffer,
        count: usize,
        salt: &[u8],
        work: WorkSize,
    ) -> CrackResult<LaunchEvent> {
        let kernel = self.kernel.clone().ok_or(CrackError::NotInitialized)?;
        let queued = self.now();
        let count = count.min(self.capacity);
        let binary_size = kernel.binary_size();
        let words = binary_size / 4;
        let targets = self.targets.as_ref();

        let start = self.now();
        let groups = (0..work.groups())
            .into_par_iter()
            .map(|group| {
                let first = group * work.local;
                let last = (first + work.local).min(count);

                let mut hasher = kernel.hasher();
                let mut digest = vec![0u8; binary_size];
                let mut rows = Vec::with_capacity(last.saturating_sub(first) * words);
                let mut matches = Vec::new();

                // work items past the count exit right away
                for slot in first..last {
                    kernel.compute(&mut *hasher, keys.get(slot), salt, &mut digest)?;
                    rows.extend(digest.chunks_exact(4).map(first_word));

                    let word = first_word(&digest);
                    if targets.is_some_and(|targets| targets.probe(word)) {
                        matches.extend([slot as u32, word]);
                    }
                }

                CrackResult::Ok((first, rows, matches))
            })
            .collect::<CrackResult<Vec<_>>>()?;
        let end = self.now();

        self.matches.clear();
        for (first, rows, matches) in groups {
            for (i, row) in rows.chunks_exact(words).enumerate() {
                for (w, word) in row.iter().enumerate() {
                    self.digests[w * count + first + i] = *word;
                }
            }
            self.matches.extend(matches);
        }

        Ok(LaunchEvent {
            queued,
            submit: start,
            start,
            end,
            matched: (self.matches.len() / 2) as u32,
        })
    }

    fn map(&mut self, region: Region, len: usize) -> CrackResult<HostMapped<'_>> {
        let Self {
            digests,
            matches,
            live_mappings,
            ..
        } = self;

        let data = match region {
            Region::Digests => digests,
            Region::Matches => matches,
        };
        let available = data.len();
        let data = data.get(..len).ok_or_else(|| {
            CrackError::Device(format!(
                "cannot map {len} words of {region:?}, only {available} are available"
            ))
        })?;

        *live_mappings += 1;

        Ok(HostMapped {
            data,
            live: live_mappings,
        })
    }

    fn release(&mut self) {
        self.kernel = None;
        self.capacity = 0;
        self.digests = Vec::new();
        self.matches = Vec::new();
        self.targets = None;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::HostDevice;
    use crate::{
        backend::{
            device::{Device, Region},
            tests::{md5, SaltedMd5},
            Kernel,
        },
        buffers::{first_word, KeyBuffer},
        scheduling::WorkSize,
    };

    #[test]
    fn test_column_layout_with_padding() {
        // 10 keys in groups of 4 leave 2 idle work items
        let count = 10;
        let mut keys = KeyBuffer::new(count, 31);
        for i in 0..count {
            keys.set(i, format!("{i}").as_bytes());
        }

        let kernel: Arc<dyn Kernel> = Arc::new(SaltedMd5);
        let mut device = HostDevice::new();
        device.build(&kernel, 16, 32).unwrap();
        let event = device
            .launch(&keys, count, b"", WorkSize::new(count, 4))
            .unwrap();
        assert_eq!(0, event.matched);
        assert!(event.end >= event.start);

        let digests = device.map(Region::Digests, 4 * count).unwrap();
        for i in 0..count {
            let expected = md5(format!("{i}").as_bytes());
            for w in 0..4 {
                assert_eq!(first_word(&expected[4 * w..]), digests[w * count + i]);
            }
        }
    }

    #[test]
    fn test_mappings_are_released() {
        let kernel: Arc<dyn Kernel> = Arc::new(SaltedMd5);
        let mut device = HostDevice::new();
        device.build(&kernel, 4, 32).unwrap();

        let mapped = device.map(Region::Digests, 4).unwrap();
        assert_eq!(4, mapped.len());
        drop(mapped);
        assert_eq!(0, device.live_mappings());

        // nothing matched yet
        assert!(device.map(Region::Matches, 2).is_err());
        assert_eq!(0, device.live_mappings());
    }

    #[test]
    fn test_launch_after_release() {
        let kernel: Arc<dyn Kernel> = Arc::new(SaltedMd5);
        let mut device = HostDevice::new();
        device.build(&kernel, 4, 32).unwrap();
        device.release();

        let keys = KeyBuffer::new(4, 31);
        assert!(device.launch(&keys, 4, b"", WorkSize::new(4, 4)).is_err());
    }
}
