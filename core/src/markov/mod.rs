//! Candidates enumerated by ascending cost under a first-order Markov model.
//!
//! Every password of the model has an index, so that a run can be resumed from any index
//! and split between nodes without any coordination.

mod nbparts;
mod stats;
mod walk;

use std::io::{BufRead, Write};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub use nbparts::NbParts;
pub use stats::{ProbabilityTables, MAX_KNOWN_COST, ORDER_LEN, UNKNOWN_COST};
pub use walk::MarkovWalk;

use crate::{
    error::{CrackError, CrackResult},
    DEFAULT_MKV_LEVEL, DEFAULT_MKV_MAX_LEN, MAX_MKV_LEN, MAX_MKV_LVL,
};

/// Selects a share of a keyspace: nodes `min` to `max` out of `count`, counted from 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub min: u32,
    pub max: u32,
    pub count: u32,
}

impl Node {
    pub fn new(min: u32, max: u32, count: u32) -> CrackResult<Self> {
        if min == 0 || min > max || max > count {
            return Err(CrackError::Node { min, max, count });
        }

        Ok(Self { min, max, count })
    }

    /// Splits `[start, end]` in `count` parts of the same size and returns the share of the
    /// nodes. The last node also gets the remainder.
    pub fn partition(&self, start: u64, end: u64) -> CrackResult<(u64, u64)> {
        let size = end - start + 1;
        let part = size / self.count as u64;
        if part == 0 {
            return Err(CrackError::Node {
                min: self.min,
                max: self.max,
                count: self.count,
            });
        }

        let share_end = if self.max == self.count {
            end
        } else {
            start + part * self.max as u64 - 1
        };
        let share_start = start + part * (self.min as u64 - 1);

        Ok((share_start, share_end))
    }
}

/// A builder for a Markov context.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MarkovCtxBuilder {
    level: Option<u32>,
    max_len: Option<usize>,
    min_level: u32,
    min_len: usize,
    start: u64,
    end: u64,
    plaintext_length: Option<usize>,
    node: Option<Node>,
}

impl Default for MarkovCtxBuilder {
    fn default() -> Self {
        Self {
            level: Some(DEFAULT_MKV_LEVEL),
            max_len: Some(DEFAULT_MKV_MAX_LEN),
            min_level: 0,
            min_len: 0,
            start: 0,
            end: 0,
            plaintext_length: None,
            node: None,
        }
    }
}

impl MarkovCtxBuilder {
    /// Creates a new MarkovCtxBuilder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the highest cost of the passwords.
    pub fn level(mut self, level: Option<u32>) -> Self {
        self.level = level;

        self
    }

    /// Sets the maximum password length.
    pub fn max_len(mut self, max_len: Option<usize>) -> Self {
        self.max_len = max_len;

        self
    }

    /// Sets the lowest cost of the emitted passwords.
    pub fn min_level(mut self, min_level: u32) -> Self {
        self.min_level = min_level;

        self
    }

    pub fn min_len(mut self, min_len: usize) -> Self {
        self.min_len = min_len;

        self
    }

    /// Sets the index of the first password.
    pub fn start(mut self, start: u64) -> Self {
        self.start = start;

        self
    }

    /// Sets the index of the last password. 0 means the whole keyspace.
    pub fn end(mut self, end: u64) -> Self {
        self.end = end;

        self
    }

    /// Sets the longest plaintext the format can hash. The maximum length is clamped to it.
    pub fn plaintext_length(mut self, plaintext_length: usize) -> Self {
        self.plaintext_length = Some(plaintext_length);

        self
    }

    /// Restricts the context to the share of some nodes.
    pub fn node(mut self, node: Option<Node>) -> Self {
        self.node = node;

        self
    }

    /// Builds a MarkovCtx over `tables`, counting its keyspace.
    pub fn build(self, tables: ProbabilityTables) -> CrackResult<MarkovCtx> {
        let mut level = self.level.ok_or(CrackError::MissingParameter("the Markov level"))?;
        let mut max_len = self
            .max_len
            .ok_or(CrackError::MissingParameter("the Markov maximum length"))?;

        if let Some(plaintext_length) = self.plaintext_length {
            if max_len > plaintext_length {
                warn!("the maximum length {max_len} is too high, using {plaintext_length}");
                max_len = plaintext_length;
            }
        }

        if max_len > MAX_MKV_LEN {
            warn!("the maximum length {max_len} is too high, using {MAX_MKV_LEN}");
            max_len = MAX_MKV_LEN;
        }

        if level > MAX_MKV_LVL {
            warn!("the level {level} is too high, using {MAX_MKV_LVL}");
            level = MAX_MKV_LVL;
        }

        let mut min_len = self.min_len;
        if min_len > max_len {
            warn!("the minimum length {min_len} is above the maximum length, using {max_len}");
            min_len = max_len;
        }

        let nbparts = NbParts::build(&tables, level, max_len)?;
        let keyspace = nbparts.total();

        let mut end = self.end;
        if end == 0 {
            end = keyspace;
        } else if end > keyspace {
            warn!("the end index {end} is beyond the keyspace, using {keyspace}");
            end = keyspace;
        }

        let mut start = self.start;
        if start > end {
            return Err(CrackError::StartAfterEnd { start, end });
        }

        if let Some(node) = self.node {
            (start, end) = node.partition(start, end)?;
        }

        info!(
            level,
            max_len,
            keyspace,
            start,
            end,
            "counted the Markov keyspace"
        );

        Ok(MarkovCtx {
            tables,
            nbparts,
            level,
            max_len,
            min_level: self.min_level,
            min_len,
            start,
            end,
        })
    }
}

/// The passwords of a Markov model to enumerate.
#[derive(Clone, Debug)]
pub struct MarkovCtx {
    tables: ProbabilityTables,
    nbparts: NbParts,
    level: u32,
    max_len: usize,
    min_level: u32,
    min_len: usize,
    start: u64,
    end: u64,
}

impl MarkovCtx {
    pub fn tables(&self) -> &ProbabilityTables {
        &self.tables
    }

    pub fn nbparts(&self) -> &NbParts {
        &self.nbparts
    }

    /// The highest cost of the passwords.
    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn min_level(&self) -> u32 {
        self.min_level
    }

    pub fn min_len(&self) -> usize {
        self.min_len
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    /// The number of passwords of the model, the empty one included.
    pub fn keyspace(&self) -> u64 {
        self.nbparts.total()
    }
}

/// The position of a walk between its bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkovState {
    /// The index of the next password visited.
    pub gidx: u64,
    pub gstart: u64,
    pub gend: u64,
    /// The index saved by `save_state`.
    pub tidx: u64,
}

impl MarkovState {
    pub fn new(gstart: u64, gend: u64) -> Self {
        Self {
            gidx: gstart,
            gstart,
            gend,
            tidx: gstart,
        }
    }

    /// Commits the current index.
    pub fn fix(&mut self) {
        self.tidx = self.gidx;
    }

    /// Writes the committed index as a decimal line.
    pub fn save_state<W: Write>(&self, mut writer: W) -> CrackResult<()> {
        writeln!(writer, "{}", self.tidx)?;

        Ok(())
    }

    /// Reads an index written by `save_state`.
    pub fn read_state<R: BufRead>(reader: R) -> CrackResult<u64> {
        let line = reader
            .lines()
            .next()
            .ok_or_else(|| CrackError::State("the Markov index is missing".to_owned()))??;

        line.trim()
            .parse()
            .map_err(|_| CrackError::State(format!("{line} is not a Markov index")))
    }

    /// Returns the progress in percent, and the hundredths of a percent.
    pub fn get_progress(&self) -> (u32, u32) {
        let done = self.gidx.saturating_sub(self.gstart) as u128;
        let total = self.gend.saturating_sub(self.gstart).max(1) as u128;
        let progress = (done * 10000 / total).min(10000) as u32;

        (progress / 100, progress % 100)
    }
}
