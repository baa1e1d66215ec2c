use digest::DynDigest;

use super::finalize;
use crate::{
    backend::Kernel,
    codec::{BinaryCodec, HexCodec},
    error::CrackResult,
    format::{Algorithm, TestVector},
    hash::HashFunction,
};

pub const RAW_SHA512_CODEC: HexCodec = HexCodec {
    label: "raw-sha512",
    tag: "$SHA512$",
    binary_size: 64,
    lowercase_only: true,
};

const TESTS: &[TestVector] = &[
    TestVector {
        ciphertext: "b109f3bbbc244eb82441917ed06d618b9008dd09b3befd1b5e07394c706a8bb980b1d7785e5976ec049b46df5f1326af5a2ea6d103fd07c95385ffab0cacbc86",
        plaintext: "password",
    },
    TestVector {
        ciphertext: "$SHA512$fa585d89c851dd338a70dcf535aa2a92fee7836dd6aff1226583e88e0996293f16bc009c652826e0fc5c706695a03cddce372f139eff4d13959da6f1f5d3eabe",
        plaintext: "12345678",
    },
    TestVector {
        ciphertext: "2c80f4c2b3db6b677d328775be4d38c8d8cd9a4464c3b6273644fb148f855e3db51bc33b54f3f6fa1f5f52060509f0e4d350bb0c7f51947728303999c6eff446",
        plaintext: "john-user",
    },
];

/// Unsalted SHA-512.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawSha512;

impl Kernel for RawSha512 {
    fn name(&self) -> &'static str {
        "SHA512"
    }

    fn binary_size(&self) -> usize {
        HashFunction::Sha2_512.digest_size()
    }

    fn hasher(&self) -> Box<dyn DynDigest> {
        HashFunction::Sha2_512.cpu()
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

impl Algorithm for RawSha512 {
    fn label(&self) -> &'static str {
        RAW_SHA512_CODEC.label
    }

    fn format_name(&self) -> &'static str {
        "Raw SHA-512"
    }

    fn plaintext_length(&self) -> usize {
        125
    }

    fn max_keys_per_crypt(&self) -> usize {
        4096
    }

    fn codec(&self) -> &dyn BinaryCodec {
        &RAW_SHA512_CODEC
    }

    fn tests(&self) -> &'static [TestVector] {
        TESTS
    }
}
