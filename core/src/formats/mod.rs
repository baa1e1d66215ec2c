//! The supported hash formats, each algorithm being registered on one or more backends.

mod mscash;
mod raw_md5;
mod raw_sha1;
mod raw_sha512;

use digest::DynDigest;

pub use mscash::{MsCash, MSCASH_CODEC};
pub use raw_md5::{RawMd5, MD5_NUM_KEYS, MD5_PLAINTEXT_LENGTH, RAW_MD5_CODEC};
pub use raw_sha1::{RawSha1, RAW_SHA1_CODEC};
pub use raw_sha512::{RawSha512, RAW_SHA512_CODEC};

use crate::{
    backend::{CpuBackend, DeviceBackend, HostDevice, ParallelBackend},
    error::{CrackError, CrackResult},
    format::{Format, FormatEngine},
};

/// Writes the digest of everything fed to the hasher into `out`, and resets the hasher.
fn finalize(hasher: &mut dyn DynDigest, out: &mut [u8], name: &'static str) -> CrackResult<()> {
    hasher
        .finalize_into_reset(out)
        .map_err(|_| CrackError::DigestSize(name))
}

/// Returns every available format, in listing order.
pub fn registry() -> Vec<Box<dyn Format>> {
    #[allow(unused_mut)]
    let mut formats: Vec<Box<dyn Format>> = vec![
        Box::new(FormatEngine::new(RawMd5, CpuBackend::new())),
        Box::new(
            FormatEngine::new(RawMd5, DeviceBackend::new(HostDevice::new()))
                .with_label("raw-md5-device"),
        ),
        Box::new(FormatEngine::new(RawSha1, CpuBackend::new())),
        Box::new(FormatEngine::new(RawSha512, ParallelBackend::new())),
        Box::new(
            FormatEngine::new(RawSha512, DeviceBackend::new(HostDevice::new()))
                .with_label("raw-sha512-device"),
        ),
        Box::new(FormatEngine::new(MsCash, ParallelBackend::new())),
    ];

    #[cfg(feature = "wgpu")]
    formats.push(Box::new(
        FormatEngine::new(
            RawMd5,
            DeviceBackend::new(crate::backend::WgpuDevice::new(wgpu::Backends::all())),
        )
        .with_label("raw-md5-wgpu"),
    ));

    formats
}

/// Finds a format by its label.
pub fn find(label: &str) -> CrackResult<Box<dyn Format>> {
    registry()
        .into_iter()
        .find(|format| format.params().label == label)
        .ok_or_else(|| CrackError::UnknownFormat(label.to_owned()))
}

/// The labels of every available format.
pub fn labels() -> Vec<&'static str> {
    registry()
        .iter()
        .map(|format| format.params().label)
        .collect()
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;

    use super::{find, labels, registry, MsCash, RawMd5, RawSha1, RawSha512};
    use crate::{
        backend::CpuBackend,
        error::CrackError,
        format::{self_test, Algorithm, Format, FormatEngine},
        tuning::Tuning,
    };

    /// Hashes every test plaintext of an algorithm on the CPU and checks the digests.
    fn check_vectors<A: Algorithm + Copy>(algorithm: A) {
        let tests = algorithm.tests();
        let mut format =
            FormatEngine::new(algorithm, CpuBackend::new()).with_keys_per_crypt(tests.len());
        format.init(&Tuning::default()).unwrap();

        for test in tests {
            let source = format.split(&format.prepare("", test.ciphertext));
            format.set_salt(&format.salt(&source).unwrap());
            format.set_key(test.plaintext.as_bytes(), 0);
            format.crypt_all(1).unwrap();

            assert!(format.cmp_exact(&source, 0).unwrap(), "{}", test.ciphertext);
        }
    }

    #[test]
    fn test_known_vectors() {
        check_vectors(RawMd5);
        check_vectors(RawSha1);
        check_vectors(RawSha512);
        check_vectors(MsCash);
    }

    #[test]
    fn test_mscash_salt_matters() {
        let mut format = FormatEngine::new(MsCash, CpuBackend::new()).with_keys_per_crypt(1);
        format.init(&Tuning::default()).unwrap();

        let source = "M$administrator#25fd08fa89795ed54207e6e8442a6ca0";
        format.set_key(b"password", 0);
        format.set_salt(&format.salt("M$guest#25fd08fa89795ed54207e6e8442a6ca0").unwrap());
        format.crypt_all(1).unwrap();
        assert!(!format.cmp_exact(source, 0).unwrap());

        format.set_salt(&format.salt(source).unwrap());
        format.crypt_all(1).unwrap();
        assert!(format.cmp_exact(source, 0).unwrap());
    }

    #[test]
    fn test_registry() {
        let labels = labels();
        assert!(labels.iter().all_unique());
        for label in [
            "raw-md5",
            "raw-md5-device",
            "raw-sha1",
            "raw-sha512",
            "raw-sha512-device",
            "mscash",
        ] {
            assert!(labels.contains(&label), "{label}");
        }

        assert!(matches!(find("nope"), Err(CrackError::UnknownFormat(_))));
        assert_eq!("SHA512 CPU, multithreaded", find("raw-sha512").unwrap().params().algorithm_name);
    }

    #[test]
    fn test_self_test_every_format() {
        for mut format in registry() {
            if format.params().label.ends_with("-wgpu") {
                continue;
            }

            // keep the batches small
            let tuning = Tuning::default().gws(64).lws(32);
            format.init(&tuning).unwrap();
            self_test(format.as_mut()).unwrap();
            format.done();
        }
    }
}
