use digest::DynDigest;

use super::finalize;
use crate::{
    backend::Kernel,
    codec::{BinaryCodec, HexCodec},
    error::CrackResult,
    format::{Algorithm, TestVector},
    hash::HashFunction,
};

pub const RAW_SHA1_CODEC: HexCodec = HexCodec {
    label: "raw-sha1",
    tag: "$SHA1$",
    binary_size: 20,
    lowercase_only: false,
};

const TESTS: &[TestVector] = &[
    TestVector {
        ciphertext: "5baa61e4c9b93f3f0682250b6cf8331b7ee68fd8",
        plaintext: "password",
    },
    TestVector {
        ciphertext: "$SHA1$a94a8fe5ccb19ba61c4c0873d391e987982fbbd3",
        plaintext: "test",
    },
];

/// Unsalted SHA-1.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawSha1;

impl Kernel for RawSha1 {
    fn name(&self) -> &'static str {
        "SHA1"
    }

    fn binary_size(&self) -> usize {
        HashFunction::Sha1.digest_size()
    }

    fn hasher(&self) -> Box<dyn DynDigest> {
        HashFunction::Sha1.cpu()
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
}

impl Algorithm for RawSha1 {
    fn label(&self) -> &'static str {
        RAW_SHA1_CODEC.label
    }

    fn format_name(&self) -> &'static str {
        "Raw SHA-1"
    }

    fn plaintext_length(&self) -> usize {
        55
    }

    fn max_keys_per_crypt(&self) -> usize {
        256
    }

    fn codec(&self) -> &dyn BinaryCodec {
        &RAW_SHA1_CODEC
    }

    fn tests(&self) -> &'static [TestVector] {
        TESTS
    }
}
