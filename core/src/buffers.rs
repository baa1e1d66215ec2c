//! Batch storage owned by a format: the keys waiting to be hashed and the resulting digests.

/// Reads the first little-endian word of a digest.
/// This is the word every filter works on.
#[inline]
pub fn first_word(digest: &[u8]) -> u32 {
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Fixed-capacity storage for the candidates of a batch.
/// Every slot is word aligned so that it can be uploaded as-is to a device.
#[derive(Clone, Debug)]
pub struct KeyBuffer {
    plaintext_length: usize,
    slot_size: usize,
    keys: Vec<u8>,
    lengths: Vec<u32>,
}

impl KeyBuffer {
    /// Creates a buffer of `capacity` slots holding keys of at most `plaintext_length` bytes.
    pub fn new(capacity: usize, plaintext_length: usize) -> Self {
        let slot_size = Self::slot_size_for(plaintext_length);

        Self {
            plaintext_length,
            slot_size,
            keys: vec![0; capacity * slot_size],
            lengths: vec![0; capacity],
        }
    }

    /// The slot size used for keys of at most `plaintext_length` bytes.
    pub fn slot_size_for(plaintext_length: usize) -> usize {
        plaintext_length.next_multiple_of(4).max(4)
    }

    /// Changes the number of slots. All the keys are cleared.
    pub fn resize(&mut self, capacity: usize) {
        self.keys = vec![0; capacity * self.slot_size];
        self.lengths = vec![0; capacity];
    }

    pub fn capacity(&self) -> usize {
        self.lengths.len()
    }

    pub fn plaintext_length(&self) -> usize {
        self.plaintext_length
    }

    /// The size of a slot in bytes, always a multiple of 4.
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Stores a key in a slot, silently truncated to the maximum plaintext length.
    #[inline]
    pub fn set(&mut self, index: usize, key: &[u8]) {
        let len = key.len().min(self.plaintext_length);
        let start = index * self.slot_size;
        let slot = &mut self.keys[start..start + self.slot_size];

        slot[..len].copy_from_slice(&key[..len]);
        slot[len..].fill(0);
        self.lengths[index] = len as u32;
    }

    /// Returns the key stored in a slot.
    #[inline]
    pub fn get(&self, index: usize) -> &[u8] {
        let start = index * self.slot_size;
        &self.keys[start..start + self.lengths[index] as usize]
    }

    /// Stores the same key in every slot.
    pub fn fill(&mut self, key: &[u8]) {
        for index in 0..self.capacity() {
            self.set(index, key);
        }
    }

    pub fn clear(&mut self) {
        self.lengths.fill(0);
    }

    /// The raw slots, `slot_size` bytes each.
    pub fn bytes(&self) -> &[u8] {
        &self.keys
    }

    pub fn lengths(&self) -> &[u32] {
        &self.lengths
    }
}

/// The digests produced by the last dispatch.
///
/// The first word of every entry is always available. The full digests are either written
/// eagerly by host backends or fetched lazily from a device on the first exact comparison.
/// When a device filtered the batch against the targets, the entries are the survivors only
/// and `slot` maps them back to their key slot.
#[derive(Clone, Debug)]
pub struct DigestBuffer {
    binary_size: usize,
    partial: Vec<u32>,
    full: Vec<u8>,
    survivors: Option<Vec<u32>>,
    len: usize,
    full_ready: bool,
}

impl DigestBuffer {
    pub fn new(capacity: usize, binary_size: usize) -> Self {
        Self {
            binary_size,
            partial: vec![0; capacity],
            full: vec![0; capacity * binary_size],
            survivors: None,
            len: 0,
            full_ready: false,
        }
    }

    pub fn resize(&mut self, capacity: usize) {
        self.partial = vec![0; capacity];
        self.full = vec![0; capacity * self.binary_size];
        self.invalidate();
    }

    pub fn binary_size(&self) -> usize {
        self.binary_size
    }

    /// The number of valid entries.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Marks every entry as stale.
    pub fn invalidate(&mut self) {
        self.len = 0;
        self.survivors = None;
        self.full_ready = false;
    }

    pub fn is_full_ready(&self) -> bool {
        self.full_ready
    }

    pub fn is_filtered(&self) -> bool {
        self.survivors.is_some()
    }

    /// Returns the key slot an entry was computed from.
    /// Indices past the survivors are key slots themselves.
    #[inline]
    pub fn slot(&self, index: usize) -> usize {
        match self.survivors.as_ref().and_then(|survivors| survivors.get(index)) {
            Some(&slot) => slot as usize,
            None => index,
        }
    }

    #[inline]
    pub fn partial(&self, index: usize) -> u32 {
        self.partial[index]
    }

    /// Returns the full digest of an entry, if it has been fetched.
    #[inline]
    pub fn full(&self, index: usize) -> Option<&[u8]> {
        if !self.full_ready || index >= self.len {
            return None;
        }

        Some(&self.full[index * self.binary_size..(index + 1) * self.binary_size])
    }

    /// Returns the storage of the first `count` full digests, to be written by a host backend.
    /// The entries must be sealed afterwards.
    pub fn full_mut(&mut self, count: usize) -> &mut [u8] {
        self.invalidate();
        &mut self.full[..count * self.binary_size]
    }

    /// Validates `count` full digests written through `full_mut`.
    pub fn seal_full(&mut self, count: usize) {
        for (partial, digest) in self.partial[..count]
            .iter_mut()
            .zip(self.full.chunks_exact(self.binary_size))
        {
            *partial = first_word(digest);
        }

        self.len = count;
        self.survivors = None;
        self.full_ready = true;
    }

    /// Stores the first word of `words.len()` unfiltered digests.
    pub fn set_partial(&mut self, words: &[u32]) {
        self.partial[..words.len()].copy_from_slice(words);
        self.len = words.len();
        self.survivors = None;
        self.full_ready = false;
    }

    /// Stores the survivors of a device-side filter, as (slot, first word) pairs.
    pub fn set_survivors(&mut self, pairs: &[u32]) {
        let count = pairs.len() / 2;
        let mut survivors = Vec::with_capacity(count);

        for (i, pair) in pairs.chunks_exact(2).enumerate() {
            survivors.push(pair[0]);
            self.partial[i] = pair[1];
        }

        self.len = count;
        self.survivors = Some(survivors);
        self.full_ready = false;
    }

    /// Fills the full digests of every entry, word by word.
    /// `word(slot, w)` returns the `w`th little-endian word of the digest of a key slot.
    pub fn fill_full(&mut self, mut word: impl FnMut(usize, usize) -> u32) {
        let words = self.binary_size / 4;

        for index in 0..self.len {
            let slot = self
                .survivors
                .as_ref()
                .map_or(index, |survivors| survivors[index] as usize);
            let digest = &mut self.full[index * self.binary_size..(index + 1) * self.binary_size];

            for (w, bytes) in digest.chunks_exact_mut(4).enumerate().take(words) {
                bytes.copy_from_slice(&word(slot, w).to_le_bytes());
            }
        }

        self.full_ready = true;
    }
}
