//! The format contract, and the engine implementing it for any algorithm on any backend.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use tracing::{debug, info};

use crate::{
    backend::{ComputeBackend, Kernel},
    buffers::{first_word, DigestBuffer, KeyBuffer},
    codec::BinaryCodec,
    error::{CrackError, CrackResult},
    target::{Database, TargetIndex},
    tuning::{find_best_kpc, find_best_workgroup, Tuning},
};

/// The masks of the hash levels, from the coarsest to the finest.
pub const HASH_MASKS: [u32; 7] = [
    0xF, 0xFF, 0xFFF, 0xFFFF, 0xFFFFF, 0xFFFFFF, 0x7FFFFFF,
];

/// The width of the masked digest prefix used to bucket candidates against targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HashLevel {
    Bits4,
    Bits8,
    Bits12,
    Bits16,
    Bits20,
    Bits24,
    Bits27,
}

impl HashLevel {
    pub const ALL: [HashLevel; 7] = [
        HashLevel::Bits4,
        HashLevel::Bits8,
        HashLevel::Bits12,
        HashLevel::Bits16,
        HashLevel::Bits20,
        HashLevel::Bits24,
        HashLevel::Bits27,
    ];

    pub fn mask(self) -> u32 {
        HASH_MASKS[self as usize]
    }

    pub fn bits(self) -> u32 {
        self.mask().count_ones()
    }

    /// The number of distinct values at this level.
    pub fn table_size(self) -> usize {
        self.mask() as usize + 1
    }

    /// Returns the finest level worth using for `count` targets, that is the finest level
    /// having at most 4 buckets per target. Below 4 targets, comparing them all is cheaper.
    pub fn for_count(count: usize) -> Option<Self> {
        Self::ALL
            .into_iter()
            .rev()
            .find(|level| level.table_size() / 4 <= count)
    }
}

/// A known ciphertext and its plaintext.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TestVector {
    pub ciphertext: &'static str,
    pub plaintext: &'static str,
}

/// What describes a format.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormatParams {
    /// The name used to select the format.
    pub label: &'static str,
    pub format_name: &'static str,
    /// The algorithm and the backend running it.
    pub algorithm_name: String,
    pub plaintext_length: usize,
    pub binary_size: usize,
    pub salt_size: usize,
    pub min_keys_per_crypt: usize,
    pub max_keys_per_crypt: usize,
    /// Set when the backend filters the digests against the targets itself.
    pub target_aware: bool,
}

/// A hash format: how to decode its ciphertexts, hash a batch of candidates
/// and compare the digests against the targets.
///
/// After a `crypt_all` on a target-aware backend with targets loaded, the indices given to
/// `get_hash`, `cmp_*` and `get_key` denote the surviving candidates in order,
/// until the keys are modified.
pub trait Format: Send {
    fn params(&self) -> &FormatParams;

    fn codec(&self) -> &dyn BinaryCodec;

    /// Allocates the buffers, acquires the backend and tunes it if asked to.
    fn init(&mut self, tuning: &Tuning) -> CrackResult<()>;

    /// Releases the backend. Calling it twice is harmless.
    fn done(&mut self);

    /// Rebuilds the target filter. `None` switches to exhaustive mode.
    fn reset(&mut self, db: Option<&Database>) -> CrackResult<()>;

    fn set_salt(&mut self, salt: &[u8]);

    fn set_key(&mut self, key: &[u8], index: usize);

    /// Returns the key behind an index. Past the survivors of a filtered batch the index
    /// names a key slot, and past the capacity the key is empty.
    fn get_key(&self, index: usize) -> Vec<u8>;

    fn clear_keys(&mut self);

    /// Hashes the first `count` keys.
    ///
    /// Returns the number of candidates computed in exhaustive mode or on backends that
    /// aren't target-aware, and the number of candidates surviving the target filter
    /// otherwise.
    fn crypt_all(&mut self, count: usize) -> CrackResult<usize>;

    /// The first little-endian word of the digest at `index`.
    fn get_hash_word(&self, index: usize) -> u32;

    /// Returns true if one of the first `count` digests may be `binary`.
    fn cmp_all(&self, binary: &[u8], count: usize) -> bool;

    /// Returns true if the digest at `index` may be `binary`.
    fn cmp_one(&self, binary: &[u8], index: usize) -> bool;

    /// Returns true if and only if the digest at `index` is the one of `source`.
    fn cmp_exact(&mut self, source: &str, index: usize) -> CrackResult<bool>;

    fn tests(&self) -> &'static [TestVector];

    /// The current batch capacity.
    fn keys_per_crypt(&self) -> usize {
        self.params().max_keys_per_crypt
    }

    fn valid(&self, ciphertext: &str) -> bool {
        self.codec().valid(ciphertext)
    }

    fn split(&self, ciphertext: &str) -> String {
        self.codec().split(ciphertext)
    }

    fn binary(&self, ciphertext: &str) -> CrackResult<Vec<u8>> {
        self.codec().binary(ciphertext)
    }

    fn salt(&self, ciphertext: &str) -> CrackResult<Vec<u8>> {
        self.codec().salt(ciphertext)
    }

    fn prepare(&self, login: &str, ciphertext: &str) -> String {
        self.codec().prepare(login, ciphertext)
    }

    fn binary_hash(&self, binary: &[u8], level: HashLevel) -> u32 {
        first_word(binary) & level.mask()
    }

    fn get_hash(&self, index: usize, level: HashLevel) -> u32 {
        self.get_hash_word(index) & level.mask()
    }
}

/// A hash algorithm that formats are built from.
pub trait Algorithm: Kernel {
    fn label(&self) -> &'static str;

    fn format_name(&self) -> &'static str;

    fn plaintext_length(&self) -> usize;

    fn salt_size(&self) -> usize {
        0
    }

    /// The default batch capacity.
    fn max_keys_per_crypt(&self) -> usize;

    fn codec(&self) -> &dyn BinaryCodec;

    fn tests(&self) -> &'static [TestVector];
}

/// A format hashing the candidates of an algorithm on a backend.
/// The engine owns its key and digest buffers.
pub struct FormatEngine<B: ComputeBackend> {
    algorithm: Arc<dyn Algorithm>,
    kernel: Arc<dyn Kernel>,
    backend: B,
    params: FormatParams,
    default_keys: usize,
    keys: KeyBuffer,
    digests: DigestBuffer,
    salt: Vec<u8>,
    initialized: bool,
}

impl<B: ComputeBackend> FormatEngine<B> {
    pub fn new<A: Algorithm>(algorithm: A, backend: B) -> Self {
        let algorithm = Arc::new(algorithm);
        let default_keys = algorithm.max_keys_per_crypt();

        let params = FormatParams {
            label: algorithm.label(),
            format_name: algorithm.format_name(),
            algorithm_name: format!("{} {}", algorithm.name(), backend.name()),
            plaintext_length: algorithm.plaintext_length(),
            binary_size: algorithm.binary_size(),
            salt_size: algorithm.salt_size(),
            min_keys_per_crypt: 1,
            max_keys_per_crypt: default_keys,
            target_aware: backend.target_aware(),
        };

        Self {
            kernel: algorithm.clone(),
            algorithm,
            keys: KeyBuffer::new(0, params.plaintext_length),
            digests: DigestBuffer::new(0, params.binary_size),
            backend,
            params,
            default_keys,
            salt: Vec::new(),
            initialized: false,
        }
    }

    /// Registers the format under another label.
    pub fn with_label(mut self, label: &'static str) -> Self {
        self.params.label = label;
        self
    }

    /// Changes the batch capacity used when no `GWS` is given.
    pub fn with_keys_per_crypt(mut self, keys: usize) -> Self {
        self.default_keys = keys.max(1);
        self.params.max_keys_per_crypt = self.default_keys;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn require_init(&self) -> CrackResult<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(CrackError::NotInitialized)
        }
    }
}

impl<B: ComputeBackend> Format for FormatEngine<B> {
    fn params(&self) -> &FormatParams {
        &self.params
    }

    fn codec(&self) -> &dyn BinaryCodec {
        self.algorithm.codec()
    }

    fn init(&mut self, tuning: &Tuning) -> CrackResult<()> {
        if self.initialized {
            return Ok(());
        }

        let plaintext_length = self.params.plaintext_length;
        let mut capacity = match tuning.gws {
            Some(gws) if gws != 0 => gws,
            _ => self.default_keys,
        };

        if let Some(tunable) = self.backend.tunable() {
            capacity = capacity.min(tunable.limits().max_keys);
        }
        self.backend
            .prepare(self.kernel.clone(), capacity, plaintext_length)?;

        if let Some(tunable) = self.backend.tunable() {
            let mut keys = KeyBuffer::new(capacity, plaintext_length);

            match tuning.fixed_lws() {
                Some(lws) => tunable.set_local(lws),
                None => {
                    let key = self
                        .algorithm
                        .tests()
                        .first()
                        .map_or(&b"password"[..], |test| test.plaintext.as_bytes());
                    find_best_workgroup(&mut *tunable, &mut keys, key, capacity)?;
                }
            }

            if tuning.gws == Some(0) {
                capacity =
                    find_best_kpc(&mut *tunable, &mut keys, self.algorithm.max_keys_per_crypt())?;
            }

            info!(
                lws = tunable.local(),
                gws = capacity,
                "{} is ready",
                self.params.label
            );
        }

        self.keys = KeyBuffer::new(capacity, plaintext_length);
        self.digests = DigestBuffer::new(capacity, self.params.binary_size);
        self.params.max_keys_per_crypt = capacity;
        self.initialized = true;

        Ok(())
    }

    fn done(&mut self) {
        if !self.initialized {
            return;
        }

        self.backend.release();
        self.keys = KeyBuffer::new(0, self.params.plaintext_length);
        self.digests = DigestBuffer::new(0, self.params.binary_size);
        self.initialized = false;
        debug!("released {}", self.params.label);
    }

    fn reset(&mut self, db: Option<&Database>) -> CrackResult<()> {
        self.require_init()?;
        self.digests.invalidate();

        if !self.backend.target_aware() {
            return Ok(());
        }

        match db.filter(|db| !db.is_empty()) {
            Some(db) => {
                let index = TargetIndex::build(db.binaries(), self.params.binary_size);
                self.backend.load_targets(Some(&index))
            }
            None => self.backend.load_targets(None),
        }
    }

    fn set_salt(&mut self, salt: &[u8]) {
        if self.params.salt_size == 0 {
            return;
        }

        self.salt.clear();
        self.salt.extend_from_slice(salt);
    }

    fn set_key(&mut self, key: &[u8], index: usize) {
        self.keys.set(index, key);
        self.digests.invalidate();
    }

    fn get_key(&self, index: usize) -> Vec<u8> {
        let slot = self.digests.slot(index);
        if slot >= self.keys.capacity() {
            return Vec::new();
        }

        self.keys.get(slot).to_vec()
    }

    fn clear_keys(&mut self) {
        self.keys.clear();
        self.digests.invalidate();
    }

    fn crypt_all(&mut self, count: usize) -> CrackResult<usize> {
        self.require_init()?;
        let count = count.min(self.keys.capacity());

        self.backend
            .dispatch(&self.keys, count, &self.salt, &mut self.digests)
    }

    fn get_hash_word(&self, index: usize) -> u32 {
        self.digests.partial(index)
    }

    fn cmp_all(&self, binary: &[u8], count: usize) -> bool {
        let word = first_word(binary);
        (0..count.min(self.digests.len())).any(|index| self.digests.partial(index) == word)
    }

    fn cmp_one(&self, binary: &[u8], index: usize) -> bool {
        index < self.digests.len() && self.digests.partial(index) == first_word(binary)
    }

    fn cmp_exact(&mut self, source: &str, index: usize) -> CrackResult<bool> {
        if index >= self.digests.len() {
            return Ok(false);
        }

        let binary = self.algorithm.codec().binary(source)?;
        if !self.digests.is_full_ready() {
            self.backend.fetch_full(&mut self.digests)?;
        }

        Ok(self.digests.full(index) == Some(binary.as_slice()))
    }

    fn tests(&self) -> &'static [TestVector] {
        self.algorithm.tests()
    }
}

impl<B: ComputeBackend> Drop for FormatEngine<B> {
    fn drop(&mut self) {
        self.done();
    }
}

const DECOY_KEY: &[u8] = b"hashmill decoy";

/// Checks a format against its test vectors, first in exhaustive mode,
/// then with the vectors loaded as targets.
/// The format is left in exhaustive mode.
pub fn self_test(format: &mut dyn Format) -> CrackResult<()> {
    let label = format.params().label;
    let plaintext_length = format.params().plaintext_length;
    let fail = |reason: String| CrackError::SelfTest {
        format: label,
        reason,
    };

    let tests = format.tests();
    if tests.is_empty() {
        return Err(fail("no test vectors".to_owned()));
    }

    // the decoy needs a second slot
    let keys = format.keys_per_crypt().max(1);
    let slot = usize::from(keys >= 2);

    format.reset(None)?;
    for test in tests {
        let ciphertext = format.prepare("", test.ciphertext);
        if !format.valid(&ciphertext) {
            return Err(fail(format!("{} is not valid", test.ciphertext)));
        }

        let source = format.split(&ciphertext);
        let binary = format.binary(&source)?;
        let salt = format.salt(&source)?;
        let plaintext = &test.plaintext.as_bytes()[..test.plaintext.len().min(plaintext_length)];

        format.clear_keys();
        if slot == 1 {
            format.set_key(DECOY_KEY, 0);
        }
        format.set_key(test.plaintext.as_bytes(), slot);
        format.set_salt(&salt);

        let count = format.crypt_all(slot + 1)?;
        if count != slot + 1 {
            return Err(fail(format!("{count} digests computed out of {}", slot + 1)));
        }
        if !format.cmp_all(&binary, count) || !format.cmp_one(&binary, slot) {
            return Err(fail(format!("{} rejected by the filter", test.ciphertext)));
        }
        for level in HashLevel::ALL {
            if format.binary_hash(&binary, level) != format.get_hash(slot, level) {
                return Err(fail(format!("{} rejected at {level:?}", test.ciphertext)));
            }
        }
        if !format.cmp_exact(&source, slot)? {
            return Err(fail(format!("{} does not match {}", test.plaintext, test.ciphertext)));
        }
        if slot == 1 && format.cmp_exact(&source, 0)? {
            return Err(fail(format!("the decoy matches {}", test.ciphertext)));
        }
        if format.get_key(slot) != plaintext {
            return Err(fail(format!("{} is not stored as is", test.plaintext)));
        }
    }

    let db = Database::from_ciphertexts(
        format.codec(),
        tests
            .iter()
            .map(|test| format.prepare("", test.ciphertext))
            .collect::<Vec<_>>()
            .iter()
            .map(String::as_str),
    )?;

    // every plaintext is tried against every salt, as many batches as needed
    format.reset(Some(&db))?;
    for group in db.groups() {
        let mut found = vec![false; group.records.len()];

        for chunk in tests.chunks(keys) {
            format.clear_keys();
            for (index, test) in chunk.iter().enumerate() {
                format.set_key(test.plaintext.as_bytes(), index);
            }
            format.set_salt(&group.salt);
            let count = format.crypt_all(chunk.len())?;

            for (record, found) in group.records.iter().zip(found.iter_mut()) {
                for index in 0..count {
                    if *found {
                        break;
                    }
                    *found = format.cmp_one(&record.binary, index)
                        && format.cmp_exact(&record.source, index)?;
                }
            }
        }

        if let Some((record, _)) = group.records.iter().zip(&found).find(|(_, found)| !**found) {
            return Err(fail(format!("{} not found among the targets", record.source)));
        }
    }
    format.reset(None)?;

    debug!("{label} passed its self test");
    Ok(())
}

/// The result of a benchmark.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Benchmark {
    pub candidates: u64,
    pub elapsed: Duration,
}

impl Benchmark {
    /// The number of candidates hashed per second.
    pub fn rate(&self) -> f64 {
        self.candidates as f64 / self.elapsed.as_secs_f64().max(f64::MIN_POSITIVE)
    }
}

/// Hashes full batches in exhaustive mode for at least `duration`.
pub fn benchmark(format: &mut dyn Format, duration: Duration) -> CrackResult<Benchmark> {
    format.reset(None)?;

    let keys = format.keys_per_crypt();
    for index in 0..keys {
        format.set_key(format!("bench{index:08}").as_bytes(), index);
    }

    if let Some(test) = format.tests().first() {
        let ciphertext = format.prepare("", test.ciphertext);
        let salt = format.salt(&format.split(&ciphertext))?;
        format.set_salt(&salt);
    }

    let mut candidates = 0;
    let start = Instant::now();
    loop {
        candidates += format.crypt_all(keys)? as u64;
        if start.elapsed() >= duration {
            break;
        }
    }

    let benchmark = Benchmark {
        candidates,
        elapsed: start.elapsed(),
    };
    info!(
        format = format.params().label,
        rate = benchmark.rate(),
        "benchmark done"
    );

    Ok(benchmark)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{benchmark, self_test, Format, FormatEngine, HashLevel, HASH_MASKS};
    use crate::{
        backend::{CpuBackend, DeviceBackend, HostDevice, ParallelBackend},
        formats::{MsCash, RawMd5, RawSha512},
        target::Database,
        tuning::Tuning,
    };

    fn host_md5() -> FormatEngine<DeviceBackend<HostDevice>> {
        FormatEngine::new(RawMd5, DeviceBackend::new(HostDevice::new())).with_keys_per_crypt(1024)
    }

    #[test]
    fn test_hash_levels() {
        let masks = HashLevel::ALL.map(HashLevel::mask);
        assert_eq!(HASH_MASKS, masks);
        assert_eq!(27, HashLevel::Bits27.bits());
        assert_eq!(0x10000, HashLevel::Bits16.table_size());

        assert_eq!(None, HashLevel::for_count(3));
        assert_eq!(Some(HashLevel::Bits4), HashLevel::for_count(4));
        assert_eq!(Some(HashLevel::Bits8), HashLevel::for_count(64));
        assert_eq!(Some(HashLevel::Bits12), HashLevel::for_count(1500));
    }

    #[test]
    fn test_filter_soundness() {
        let mut format = FormatEngine::new(RawMd5, CpuBackend::new()).with_keys_per_crypt(4);
        format.init(&Tuning::default()).unwrap();
        format.reset(None).unwrap();

        format.set_key(b"test", 0);
        assert_eq!(1, format.crypt_all(1).unwrap());

        let binary = format.binary("098f6bcd4621d373cade4e832627b4f6").unwrap();
        assert_eq!(0xcd6b8f09, format.get_hash_word(0));
        for level in HashLevel::ALL {
            assert_eq!(format.binary_hash(&binary, level), format.get_hash(0, level));
        }
        assert!(format.cmp_exact("098f6bcd4621d373cade4e832627b4f6", 0).unwrap());
        assert!(!format.cmp_exact("d41d8cd98f00b204e9800998ecf8427e", 0).unwrap());
    }

    #[test]
    fn test_crypt_all_counts() {
        let db = Database::from_ciphertexts(
            &crate::formats::RAW_MD5_CODEC,
            ["098f6bcd4621d373cade4e832627b4f6"],
        )
        .unwrap();

        let mut format = host_md5();
        format.init(&Tuning::default().lws(32)).unwrap();

        for (index, key) in [&b"abc"[..], b"test", b"xyz"].into_iter().enumerate() {
            format.set_key(key, index);
        }

        // every candidate is computed in exhaustive mode
        format.reset(None).unwrap();
        assert_eq!(3, format.crypt_all(3).unwrap());

        // only the survivors are reported with targets
        format.reset(Some(&db)).unwrap();
        assert_eq!(1, format.crypt_all(3).unwrap());
        assert_eq!(b"test".to_vec(), format.get_key(0));
        assert!(format.cmp_exact("098f6bcd4621d373cade4e832627b4f6", 0).unwrap());

        // a key change makes indices plain slots again
        format.set_key(b"test", 0);
        assert_eq!(b"test".to_vec(), format.get_key(0));
        assert_eq!(b"xyz".to_vec(), format.get_key(2));
    }

    #[test]
    fn test_done_twice() {
        let mut format = host_md5();
        format.init(&Tuning::default().lws(32)).unwrap();
        format.done();
        format.done();

        assert!(format.crypt_all(1).is_err());
        format.init(&Tuning::default().lws(32)).unwrap();
        assert_eq!(1, format.crypt_all(1).unwrap());
    }

    #[test]
    fn test_salt_ignored_when_unsalted() {
        let mut format = FormatEngine::new(RawMd5, CpuBackend::new()).with_keys_per_crypt(1);
        format.init(&Tuning::default()).unwrap();
        format.set_salt(b"salt");
        format.set_key(b"test", 0);
        format.crypt_all(1).unwrap();

        assert!(format.cmp_exact("098f6bcd4621d373cade4e832627b4f6", 0).unwrap());
    }

    #[test]
    fn test_gws() {
        let mut format = FormatEngine::new(RawMd5, CpuBackend::new());
        format.init(&Tuning::default().gws(100)).unwrap();
        assert_eq!(100, format.keys_per_crypt());
    }

    #[test]
    fn test_self_test() {
        let mut format = host_md5();
        format.init(&Tuning::default().lws(32)).unwrap();
        self_test(&mut format).unwrap();

        let mut format = FormatEngine::new(RawSha512, ParallelBackend::new()).with_keys_per_crypt(64);
        format.init(&Tuning::default()).unwrap();
        self_test(&mut format).unwrap();
    }

    #[test]
    fn test_self_test_small_batches() {
        for keys in 1..=3 {
            let mut format = FormatEngine::new(RawMd5, CpuBackend::new());
            format.init(&Tuning::default().gws(keys)).unwrap();
            assert_eq!(keys, format.keys_per_crypt());
            self_test(&mut format).unwrap_or_else(|err| panic!("{keys} keys: {err}"));

            let mut format = FormatEngine::new(MsCash, ParallelBackend::new());
            format.init(&Tuning::default().gws(keys)).unwrap();
            self_test(&mut format).unwrap_or_else(|err| panic!("{keys} keys: {err}"));
        }
    }

    #[test]
    fn test_get_key_past_survivors() {
        let db = Database::from_ciphertexts(
            &crate::formats::RAW_MD5_CODEC,
            ["098f6bcd4621d373cade4e832627b4f6"],
        )
        .unwrap();

        let mut format = host_md5();
        format.init(&Tuning::default().lws(32)).unwrap();
        format.reset(Some(&db)).unwrap();
        format.set_key(b"abc", 0);
        format.set_key(b"test", 1);
        assert_eq!(1, format.crypt_all(2).unwrap());

        assert_eq!(b"test".to_vec(), format.get_key(0));
        // past the survivors, indices are key slots
        assert_eq!(b"test".to_vec(), format.get_key(1));
        assert_eq!(Vec::<u8>::new(), format.get_key(5000));
    }

    #[test]
    fn test_benchmark() {
        let mut format = FormatEngine::new(RawMd5, ParallelBackend::new()).with_keys_per_crypt(256);
        format.init(&Tuning::default()).unwrap();

        let result = benchmark(&mut format, Duration::from_millis(20)).unwrap();
        assert_eq!(0, result.candidates % 256);
        assert!(result.candidates >= 256);
        assert!(result.rate() > 0.0);
    }
}
