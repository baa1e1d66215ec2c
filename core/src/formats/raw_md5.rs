use digest::DynDigest;

use super::finalize;
use crate::{
    backend::Kernel,
    codec::{BinaryCodec, HexCodec},
    error::CrackResult,
    format::{Algorithm, TestVector},
    hash::HashFunction,
};

/// The maximum length of a MD5 candidate.
pub const MD5_PLAINTEXT_LENGTH: usize = 31;

/// The default number of keys per batch.
pub const MD5_NUM_KEYS: usize = 1024 * 2048;

pub const RAW_MD5_CODEC: HexCodec = HexCodec {
    label: "raw-md5",
    tag: "$MD5$",
    binary_size: 16,
    lowercase_only: false,
};

const TESTS: &[TestVector] = &[
    TestVector {
        ciphertext: "098f6bcd4621d373cade4e832627b4f6",
        plaintext: "test",
    },
    TestVector {
        ciphertext: "$MD5$5f4dcc3b5aa765d61d8327deb882cf99",
        plaintext: "password",
    },
    TestVector {
        ciphertext: "d41d8cd98f00b204e9800998ecf8427e",
        plaintext: "",
    },
];

/// Unsalted MD5.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawMd5;

impl Kernel for RawMd5 {
    fn name(&self) -> &'static str {
        "MD5"
    }

    fn binary_size(&self) -> usize {
        HashFunction::Md5.digest_size()
    }

    fn hasher(&self) -> Box<dyn DynDigest> {
        HashFunction::Md5.cpu()
    }

    fn compute(
        &self,
        hasher: &mut dyn DynDigest,
        key: &[u8],
        _salt: &[u8],
        out: &mut [u8],
    ) -> CrackResult<()> {
        hasher.update(key);
        finalize(hasher, out, self.name())
    }

    fn wgsl(&self) -> Option<&'static str> {
        Some(include_str!("md5.wgsl"))
    }
}

impl Algorithm for RawMd5 {
    fn label(&self) -> &'static str {
        RAW_MD5_CODEC.label
    }

    fn format_name(&self) -> &'static str {
        "Raw MD5"
    }

    fn plaintext_length(&self) -> usize {
        MD5_PLAINTEXT_LENGTH
    }

    fn max_keys_per_crypt(&self) -> usize {
        MD5_NUM_KEYS
    }

    fn codec(&self) -> &dyn BinaryCodec {
        &RAW_MD5_CODEC
    }

    fn tests(&self) -> &'static [TestVector] {
        TESTS
    }
}
