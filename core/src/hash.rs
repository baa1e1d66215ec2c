use std::fmt::Display;

use digest::{Digest as _, DynDigest};
use md4::Md4;
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::Sha512;

/// All the hash functions the formats are built on.
#[derive(Copy, Clone, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub enum HashFunction {
    Md4,
    Md5,
    Sha1,
    Sha2_512,
}

impl HashFunction {
    /// Returns the CPU implementation of this hash.
    pub fn cpu(&self) -> Box<dyn DynDigest> {
        match self {
            Self::Md4 => Box::new(Md4::new()),
            Self::Md5 => Box::new(Md5::new()),
            Self::Sha1 => Box::new(Sha1::new()),
            Self::Sha2_512 => Box::new(Sha512::new()),
        }
    }

    /// Returns the size of a digest in bytes.
    pub fn digest_size(&self) -> usize {
        match self {
            Self::Md4 | Self::Md5 => 16,
            Self::Sha1 => 20,
            Self::Sha2_512 => 64,
        }
    }
}

impl Display for HashFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

#[cfg(test)]
mod tests {
    use super::HashFunction;

    #[test]
    fn test_cpu_digest_size() {
        for hash in [
            HashFunction::Md4,
            HashFunction::Md5,
            HashFunction::Sha1,
            HashFunction::Sha2_512,
        ] {
            assert_eq!(hash.digest_size(), hash.cpu().output_size());
        }
    }

    #[test]
    fn test_md5() {
        let mut hasher = HashFunction::Md5.cpu();
        hasher.update(b"test");
        let mut digest = [0; 16];
        hasher.finalize_into_reset(&mut digest).unwrap();

        assert_eq!("098f6bcd4621d373cade4e832627b4f6", hex::encode(digest));
    }
}
