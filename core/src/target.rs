//! The hashes to crack, and the structure indexing them for fast membership tests.

use std::{
    collections::{HashMap, HashSet},
    io::BufRead,
};

use bitvec::prelude::*;
use tracing::{debug, info};

use crate::{buffers::first_word, codec::BinaryCodec, error::CrackResult};

/// The number of bitmap entries used for small target sets.
pub const PASSWORD_HASH_SIZE_SMALL: usize = 0x10000;

/// The number of bitmap entries used for large target sets.
pub const PASSWORD_HASH_SIZE_LARGE: usize = 0x1000000;

/// Above this number of targets, the large bitmap is used to keep the chains short.
pub const PASSWORD_HASH_THRESHOLD: usize = PASSWORD_HASH_SIZE_SMALL / 10;

/// Every chained bucket covers `1 << PASSWORD_HASH_SHR` bitmap entries.
pub const PASSWORD_HASH_SHR: u32 = 2;

/// Terminates a chain of the hash table.
pub const EMPTY_CHAIN: u32 = u32::MAX;

/// A loaded hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PasswordRecord {
    /// The account the hash belongs to. It can be empty.
    pub login: String,
    /// The canonical ciphertext.
    pub source: String,
    /// The decoded digest.
    pub binary: Vec<u8>,
}

/// The hashes sharing the same salt.
#[derive(Clone, Debug)]
pub struct SaltGroup {
    pub salt: Vec<u8>,
    pub records: Vec<PasswordRecord>,
    binaries: HashSet<Vec<u8>>,
}

/// All the hashes to crack, grouped by salt in load order.
#[derive(Clone, Debug, Default)]
pub struct Database {
    groups: Vec<SaltGroup>,
    /// The position of every salt in `groups`.
    salts: HashMap<Vec<u8>, usize>,
    password_count: usize,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a password file made of `login:ciphertext` or bare `ciphertext` lines.
    /// Lines that the codec doesn't recognize are skipped.
    pub fn load<R: BufRead>(codec: &dyn BinaryCodec, reader: R) -> CrackResult<Self> {
        let mut db = Self::new();
        let mut skipped = 0;

        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }

            if !db.add_line(codec, line)? {
                debug!(line = number + 1, "skipping a line");
                skipped += 1;
            }
        }

        info!(
            hashes = db.len(),
            salts = db.salt_count(),
            skipped,
            "loaded the password file"
        );

        Ok(db)
    }

    /// Loads bare ciphertexts.
    pub fn from_ciphertexts<'a>(
        codec: &dyn BinaryCodec,
        ciphertexts: impl IntoIterator<Item = &'a str>,
    ) -> CrackResult<Self> {
        let mut db = Self::new();
        for ciphertext in ciphertexts {
            db.add_line(codec, ciphertext)?;
        }

        Ok(db)
    }

    /// Parses a line and inserts its hash.
    /// Returns false if the line is invalid or a duplicate.
    fn add_line(&mut self, codec: &dyn BinaryCodec, line: &str) -> CrackResult<bool> {
        let mut fields = line.split(':');
        let (login, field) = match (fields.next(), fields.next()) {
            (Some(login), Some(field)) => (login, field),
            _ => ("", line),
        };

        let ciphertext = codec.prepare(login, field);
        if !codec.valid(&ciphertext) {
            return Ok(false);
        }

        let source = codec.split(&ciphertext);
        let record = PasswordRecord {
            login: login.to_owned(),
            binary: codec.binary(&source)?,
            source: source.clone(),
        };

        Ok(self.insert(record, codec.salt(&source)?))
    }

    /// Inserts a hash in its salt group.
    /// Returns false if the same digest is already loaded for this salt.
    pub fn insert(&mut self, record: PasswordRecord, salt: Vec<u8>) -> bool {
        let position = match self.salts.get(&salt) {
            Some(&position) => position,
            None => {
                let position = self.groups.len();
                self.salts.insert(salt.clone(), position);
                self.groups.push(SaltGroup {
                    salt,
                    records: Vec::new(),
                    binaries: HashSet::new(),
                });
                position
            }
        };

        let group = &mut self.groups[position];
        if !group.binaries.insert(record.binary.clone()) {
            return false;
        }

        group.records.push(record);
        self.password_count += 1;
        true
    }

    /// Removes a cracked hash. A salt group left empty is removed too.
    pub fn remove(&mut self, group: usize, record: usize) -> PasswordRecord {
        let removed = self.groups[group].records.remove(record);
        self.groups[group].binaries.remove(&removed.binary);

        if self.groups[group].records.is_empty() {
            let emptied = self.groups.remove(group);
            self.salts.remove(&emptied.salt);
            for position in self.salts.values_mut() {
                if *position > group {
                    *position -= 1;
                }
            }
        }
        self.password_count -= 1;

        removed
    }

    pub fn groups(&self) -> &[SaltGroup] {
        &self.groups
    }

    /// The number of hashes left.
    pub fn len(&self) -> usize {
        self.password_count
    }

    pub fn is_empty(&self) -> bool {
        self.password_count == 0
    }

    pub fn salt_count(&self) -> usize {
        self.groups.len()
    }

    /// Iterates over the digests of every hash.
    pub fn binaries(&self) -> impl Iterator<Item = &[u8]> {
        self.groups
            .iter()
            .flat_map(|group| group.records.iter().map(|record| record.binary.as_slice()))
    }
}

/// A bitmap and a chained hash table over the first word of the loaded digests.
///
/// The bitmap rejects most candidates with a single memory access. Entries passing it are
/// confirmed by walking the chain of their bucket. Digests are stored in column layout
/// (word `w` of digest `i` at `w * len + i`), which is how devices read them.
#[derive(Clone, Debug)]
pub struct TargetIndex {
    hash_num: usize,
    bitmap: BitVec<u32, Lsb0>,
    heads: Vec<u32>,
    next: Vec<u32>,
    words: Vec<u32>,
    digest_words: usize,
    len: usize,
}

impl TargetIndex {
    /// Returns the bitmap size used for `count` targets.
    pub fn hash_num_for(count: usize) -> usize {
        if count > PASSWORD_HASH_THRESHOLD {
            PASSWORD_HASH_SIZE_LARGE
        } else {
            PASSWORD_HASH_SIZE_SMALL
        }
    }

    /// Indexes the given digests, each `binary_size` bytes long.
    /// Duplicated digests are indexed once.
    pub fn build<'a>(binaries: impl IntoIterator<Item = &'a [u8]>, binary_size: usize) -> Self {
        let mut seen = HashSet::new();
        let unique: Vec<&[u8]> = binaries
            .into_iter()
            .filter(|binary| seen.insert(*binary))
            .collect();

        let len = unique.len();
        let hash_num = Self::hash_num_for(len);
        let mask = hash_num - 1;
        let digest_words = binary_size / 4;

        let mut bitmap = bitvec![u32, Lsb0; 0; hash_num];
        let mut heads = vec![EMPTY_CHAIN; hash_num >> PASSWORD_HASH_SHR];
        let mut next = vec![EMPTY_CHAIN; len];
        let mut words = vec![0; digest_words * len];

        for (i, binary) in unique.iter().enumerate() {
            for (w, bytes) in binary.chunks_exact(4).take(digest_words).enumerate() {
                words[w * len + i] = first_word(bytes);
            }

            let hash = first_word(binary) as usize & mask;
            bitmap.set(hash, true);

            // prepend to the chain of the bucket
            let bucket = hash >> PASSWORD_HASH_SHR;
            next[i] = heads[bucket];
            heads[bucket] = i as u32;
        }

        debug!(targets = len, hash_num, "built the target index");

        Self {
            hash_num,
            bitmap,
            heads,
            next,
            words,
            digest_words,
            len,
        }
    }

    /// The number of indexed digests.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The number of bitmap entries.
    pub fn hash_num(&self) -> usize {
        self.hash_num
    }

    pub fn mask(&self) -> u32 {
        (self.hash_num - 1) as u32
    }

    pub fn digest_words(&self) -> usize {
        self.digest_words
    }

    /// Returns true if a loaded digest starts with this word.
    /// Never false for the first word of a loaded digest.
    pub fn probe(&self, word: u32) -> bool {
        self.chain(word).any(|i| self.words[i] == word)
    }

    /// Returns true if this exact digest is loaded.
    pub fn contains(&self, digest: &[u8]) -> bool {
        let word = first_word(digest);

        self.chain(word).any(|i| {
            digest
                .chunks_exact(4)
                .take(self.digest_words)
                .enumerate()
                .all(|(w, bytes)| self.words[w * self.len + i] == first_word(bytes))
        })
    }

    /// Iterates over the chain a word falls in, or nothing if the bitmap rejects it.
    fn chain(&self, word: u32) -> impl Iterator<Item = usize> + '_ {
        let hash = (word & self.mask()) as usize;
        let mut i = if self.bitmap[hash] {
            self.heads[hash >> PASSWORD_HASH_SHR]
        } else {
            EMPTY_CHAIN
        };

        std::iter::from_fn(move || {
            if i == EMPTY_CHAIN {
                return None;
            }
            let current = i as usize;
            i = self.next[current];
            Some(current)
        })
    }

    /// The bitmap as raw words, bit `h` being bit `h % 32` of word `h / 32`.
    pub fn bitmap_words(&self) -> &[u32] {
        self.bitmap.as_raw_slice()
    }

    /// The first entry of every bucket chain.
    pub fn heads(&self) -> &[u32] {
        &self.heads
    }

    /// The link from every entry to the next one in its chain.
    pub fn next(&self) -> &[u32] {
        &self.next
    }

    /// The digests in column layout.
    pub fn words(&self) -> &[u32] {
        &self.words
    }
}

/// Groups the records of a salt by a masked prefix of their digest,
/// so that a computed digest is only compared against the records that could match it.
#[derive(Debug, Default)]
pub struct Buckets {
    mask: u32,
    table: HashMap<u32, Vec<usize>>,
}

impl Buckets {
    pub fn new(records: &[PasswordRecord], mask: u32) -> Self {
        let mut table: HashMap<u32, Vec<usize>> = HashMap::new();
        for (i, record) in records.iter().enumerate() {
            table
                .entry(first_word(&record.binary) & mask)
                .or_default()
                .push(i);
        }

        Self { mask, table }
    }

    /// Returns the records whose masked prefix is `hash`.
    pub fn get(&self, hash: u32) -> &[usize] {
        self.table
            .get(&(hash & self.mask))
            .map_or(&[], Vec::as_slice)
    }
}
