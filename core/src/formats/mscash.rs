use digest::DynDigest;

use super::finalize;
use crate::{
    backend::Kernel,
    codec::{BinaryCodec, MsCashCodec, MSCASH_SALT_LENGTH},
    error::CrackResult,
    format::{Algorithm, TestVector},
    hash::HashFunction,
};

pub const MSCASH_CODEC: MsCashCodec = MsCashCodec { label: "mscash" };

const TESTS: &[TestVector] = &[
    TestVector {
        ciphertext: "M$administrator#25fd08fa89795ed54207e6e8442a6ca0",
        plaintext: "password",
    },
    TestVector {
        ciphertext: "M$Bob#1E3A7B66714EC29E7FD399CB8AE8F4A1",
        plaintext: "hashmill",
    },
    TestVector {
        ciphertext: "M$root#176a4c2bd45ac73687676c2f09045353",
        plaintext: "",
    },
];

/// MS Cache: `MD4(MD4(UTF-16LE(password)) || UTF-16LE(lowercase(username)))`.
#[derive(Clone, Copy, Debug, Default)]
pub struct MsCash;

impl Kernel for MsCash {
    fn name(&self) -> &'static str {
        "MD4"
    }

    fn binary_size(&self) -> usize {
        HashFunction::Md4.digest_size()
    }

    fn hasher(&self) -> Box<dyn DynDigest> {
        HashFunction::Md4.cpu()
    }

    fn compute(
        &self,
        hasher: &mut dyn DynDigest,
        key: &[u8],
        salt: &[u8],
        out: &mut [u8],
    ) -> CrackResult<()> {
        // candidates are widened byte by byte
        for &c in key {
            hasher.update(&[c, 0]);
        }
        let mut nt = [0u8; 16];
        finalize(hasher, &mut nt, self.name())?;

        hasher.update(&nt);
        hasher.update(salt);
        finalize(hasher, out, self.name())
    }
}

impl Algorithm for MsCash {
    fn label(&self) -> &'static str {
        MSCASH_CODEC.label
    }

    fn format_name(&self) -> &'static str {
        "M$ Cache Hash"
    }

    fn plaintext_length(&self) -> usize {
        27
    }

    fn salt_size(&self) -> usize {
        2 * MSCASH_SALT_LENGTH
    }

    fn max_keys_per_crypt(&self) -> usize {
        4096
    }

    fn codec(&self) -> &dyn BinaryCodec {
        &MSCASH_CODEC
    }

    fn tests(&self) -> &'static [TestVector] {
        TESTS
    }
}
