//! Conversions between the textual representation of a hash and its binary digest.

use crate::error::{CrackError, CrackResult};

/// The prefix of a MS Cache hash.
pub const MSCASH_PREFIX: &str = "M$";

/// The maximum length of a MS Cache username, which is the salt of the hash.
pub const MSCASH_SALT_LENGTH: usize = 19;

/// A pure encoder/decoder between ciphertexts and binary digests.
pub trait BinaryCodec: Send + Sync {
    /// Returns true if the ciphertext can be decoded by this codec.
    fn valid(&self, ciphertext: &str) -> bool;

    /// Returns the canonical form of a valid ciphertext.
    fn split(&self, ciphertext: &str) -> String;

    /// Decodes the digest of a ciphertext.
    fn binary(&self, ciphertext: &str) -> CrackResult<Vec<u8>>;

    /// Decodes the salt of a ciphertext. Unsalted codecs return an empty salt.
    fn salt(&self, _ciphertext: &str) -> CrackResult<Vec<u8>> {
        Ok(Vec::new())
    }

    /// Rebuilds a full ciphertext from the fields of a password file line.
    fn prepare(&self, _login: &str, ciphertext: &str) -> String {
        ciphertext.to_owned()
    }

    /// Encodes a digest and its salt into a canonical ciphertext.
    fn encode(&self, binary: &[u8], salt: &[u8]) -> String;
}

/// A codec for raw digests written in hexadecimal, optionally prefixed by a tag.
#[derive(Clone, Copy, Debug)]
pub struct HexCodec {
    pub label: &'static str,
    pub tag: &'static str,
    pub binary_size: usize,
    pub lowercase_only: bool,
}

impl HexCodec {
    fn strip<'a>(&self, ciphertext: &'a str) -> &'a str {
        ciphertext.strip_prefix(self.tag).unwrap_or(ciphertext)
    }

    fn invalid(&self, ciphertext: &str) -> CrackError {
        CrackError::InvalidCiphertext {
            format: self.label,
            ciphertext: ciphertext.to_owned(),
        }
    }
}

impl BinaryCodec for HexCodec {
    fn valid(&self, ciphertext: &str) -> bool {
        let hash = self.strip(ciphertext);

        hash.len() == self.binary_size * 2
            && hash
                .bytes()
                .all(|c| c.is_ascii_hexdigit() && !(self.lowercase_only && c.is_ascii_uppercase()))
    }

    fn split(&self, ciphertext: &str) -> String {
        format!("{}{}", self.tag, self.strip(ciphertext).to_ascii_lowercase())
    }

    fn binary(&self, ciphertext: &str) -> CrackResult<Vec<u8>> {
        if !self.valid(ciphertext) {
            return Err(self.invalid(ciphertext));
        }

        hex::decode(self.strip(ciphertext)).map_err(|_| self.invalid(ciphertext))
    }

    fn encode(&self, binary: &[u8], _salt: &[u8]) -> String {
        format!("{}{}", self.tag, hex::encode(binary))
    }
}

/// A codec for MS Cache hashes, written as `M$username#hash`.
/// The salt is the lowercase username encoded in UTF-16LE.
#[derive(Clone, Copy, Debug)]
pub struct MsCashCodec {
    pub label: &'static str,
}

impl MsCashCodec {
    fn fields(ciphertext: &str) -> Option<(&str, &str)> {
        ciphertext
            .strip_prefix(MSCASH_PREFIX)
            .and_then(|rest| rest.rsplit_once('#'))
    }

    fn invalid(&self, ciphertext: &str) -> CrackError {
        CrackError::InvalidCiphertext {
            format: self.label,
            ciphertext: ciphertext.to_owned(),
        }
    }
}

impl BinaryCodec for MsCashCodec {
    fn valid(&self, ciphertext: &str) -> bool {
        let Some((login, hash)) = Self::fields(ciphertext) else {
            return false;
        };

        login.chars().count() <= MSCASH_SALT_LENGTH
            && hash.len() == 32
            && hash.bytes().all(|c| c.is_ascii_hexdigit())
    }

    fn split(&self, ciphertext: &str) -> String {
        match ciphertext.strip_prefix(MSCASH_PREFIX) {
            Some(rest) => format!("{MSCASH_PREFIX}{}", rest.to_lowercase()),
            None => ciphertext.to_owned(),
        }
    }

    fn binary(&self, ciphertext: &str) -> CrackResult<Vec<u8>> {
        let (_, hash) = Self::fields(ciphertext)
            .filter(|_| self.valid(ciphertext))
            .ok_or_else(|| self.invalid(ciphertext))?;

        hex::decode(hash).map_err(|_| self.invalid(ciphertext))
    }

    fn salt(&self, ciphertext: &str) -> CrackResult<Vec<u8>> {
        let (login, _) = Self::fields(ciphertext).ok_or_else(|| self.invalid(ciphertext))?;

        Ok(login
            .to_lowercase()
            .encode_utf16()
            .flat_map(u16::to_le_bytes)
            .collect())
    }

    fn prepare(&self, login: &str, ciphertext: &str) -> String {
        if ciphertext.starts_with(MSCASH_PREFIX) && self.valid(ciphertext) {
            return ciphertext.to_owned();
        }

        if login.is_empty() {
            return ciphertext.to_owned();
        }

        let full = format!("{MSCASH_PREFIX}{login}#{ciphertext}");
        if self.valid(&full) {
            full
        } else {
            ciphertext.to_owned()
        }
    }

    fn encode(&self, binary: &[u8], salt: &[u8]) -> String {
        let login: String = char::decode_utf16(
            salt.chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]])),
        )
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect();

        format!("{MSCASH_PREFIX}{login}#{}", hex::encode(binary))
    }
}

#[cfg(test)]
mod tests {
    use super::{BinaryCodec, HexCodec, MsCashCodec};

    const MD5: HexCodec = HexCodec {
        label: "raw-md5",
        tag: "$MD5$",
        binary_size: 16,
        lowercase_only: false,
    };

    const SHA512: HexCodec = HexCodec {
        label: "raw-sha512",
        tag: "$SHA512$",
        binary_size: 64,
        lowercase_only: true,
    };

    const MSCASH: MsCashCodec = MsCashCodec { label: "mscash" };

    #[test]
    fn test_hex_valid() {
        assert!(MD5.valid("098f6bcd4621d373cade4e832627b4f6"));
        assert!(MD5.valid("$MD5$098F6BCD4621D373CADE4E832627B4F6"));
        assert!(!MD5.valid("098f6bcd4621d373cade4e832627b4f"));
        assert!(!MD5.valid("098f6bcd4621d373cade4e832627b4fg"));

        let upper = "B109F3BBBC244EB82441917ED06D618B9008DD09B3BEFD1B5E07394C706A8BB980B1D7785E5976EC049B46DF5F1326AF5A2EA6D103FD07C95385FFAB0CACBC86";
        assert!(!SHA512.valid(upper));
        assert!(SHA512.valid(&upper.to_ascii_lowercase()));
    }

    #[test]
    fn test_hex_split_and_binary() {
        let split = MD5.split("098F6BCD4621D373CADE4E832627B4F6");
        assert_eq!("$MD5$098f6bcd4621d373cade4e832627b4f6", split);

        let binary = MD5.binary(&split).unwrap();
        assert_eq!(16, binary.len());
        assert_eq!(split, MD5.encode(&binary, &[]));
        assert!(MD5.salt(&split).unwrap().is_empty());

        assert!(MD5.binary("nope").is_err());
    }

    #[test]
    fn test_mscash() {
        let ciphertext = "M$Administrator#25FD08FA89795ED54207E6E8442A6CA0";
        assert!(MSCASH.valid(ciphertext));

        let split = MSCASH.split(ciphertext);
        assert_eq!("M$administrator#25fd08fa89795ed54207e6e8442a6ca0", split);

        let salt = MSCASH.salt(&split).unwrap();
        assert_eq!(b"a\0d\0m\0i\0n\0", &salt[..10]);
        assert_eq!(26, salt.len());

        let binary = MSCASH.binary(&split).unwrap();
        assert_eq!(split, MSCASH.encode(&binary, &salt));
    }

    #[test]
    fn test_mscash_invalid() {
        assert!(!MSCASH.valid("25fd08fa89795ed54207e6e8442a6ca0"));
        assert!(!MSCASH.valid("M$administrator25fd08fa89795ed54207e6e8442a6ca0"));
        assert!(!MSCASH.valid("M$abcdefghijklmnopqrstuvwxyz#25fd08fa89795ed54207e6e8442a6ca0"));
    }

    #[test]
    fn test_mscash_prepare() {
        assert_eq!(
            "M$administrator#25fd08fa89795ed54207e6e8442a6ca0",
            MSCASH.prepare("administrator", "25fd08fa89795ed54207e6e8442a6ca0")
        );
        assert_eq!(
            "25fd08fa89795ed54207e6e8442a6ca0",
            MSCASH.prepare("", "25fd08fa89795ed54207e6e8442a6ca0")
        );
    }
}
