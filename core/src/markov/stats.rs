//! The character costs the Markov enumerator orders passwords with.

use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::Path,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{CrackError, CrackResult};

/// The cost of a character or a transition never seen during training.
pub const UNKNOWN_COST: u8 = 255;

/// The highest cost a seen character or transition can get.
pub const MAX_KNOWN_COST: u8 = 254;

/// The number of characters a password can be made of. The NUL byte is never used.
pub const ORDER_LEN: usize = 255;

/// The costs of the first characters and of the transitions between two characters.
///
/// A cost is `-10 ln p` rounded, where `p` is the probability of the character.
/// `charsorted` holds, for every preceding character, the characters sorted by
/// ascending cost. Row 0 orders the first characters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbabilityTables {
    proba1: Vec<u8>,
    proba2: Vec<u8>,
    #[serde(skip)]
    charsorted: Vec<u8>,
}

impl Default for ProbabilityTables {
    fn default() -> Self {
        Self::from_costs(vec![UNKNOWN_COST; 256], vec![UNKNOWN_COST; 256 * 256])
    }
}

impl ProbabilityTables {
    /// Builds the tables from raw costs.
    /// `proba1` must hold 256 costs and `proba2` 256 * 256.
    pub fn from_costs(proba1: Vec<u8>, proba2: Vec<u8>) -> Self {
        debug_assert_eq!(256, proba1.len());
        debug_assert_eq!(256 * 256, proba2.len());

        let mut tables = Self {
            proba1,
            proba2,
            charsorted: Vec::new(),
        };
        tables.sort_chars();

        tables
    }

    /// Parses the textual statistics, made of `N=proba1[C]` and `N=proba2[C1*256+C2]` lines.
    /// Costs that aren't listed are unknown.
    pub fn parse<R: BufRead>(reader: R) -> CrackResult<Self> {
        let mut proba1 = vec![UNKNOWN_COST; 256];
        let mut proba2 = vec![UNKNOWN_COST; 256 * 256];

        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let malformed = |reason: &str| CrackError::Stats {
                line: number + 1,
                reason: reason.to_owned(),
            };

            let (cost, entry) = line
                .split_once('=')
                .ok_or_else(|| malformed("missing '='"))?;
            let cost = cost
                .trim()
                .parse::<u32>()
                .map_err(|_| malformed("the cost is not a number"))?
                .min(UNKNOWN_COST as u32) as u8;

            let parse_char = |text: &str| {
                text.trim()
                    .parse::<u8>()
                    .map_err(|_| malformed("the character is not a byte"))
            };

            if let Some(c) = entry
                .strip_prefix("proba1[")
                .and_then(|rest| rest.strip_suffix(']'))
            {
                proba1[parse_char(c)? as usize] = cost;
            } else if let Some(pair) = entry
                .strip_prefix("proba2[")
                .and_then(|rest| rest.strip_suffix(']'))
            {
                let (previous, c) = pair
                    .split_once("*256+")
                    .ok_or_else(|| malformed("expected C1*256+C2"))?;
                proba2[parse_char(previous)? as usize * 256 + parse_char(c)? as usize] = cost;
            } else {
                return Err(malformed("unknown table"));
            }
        }

        Ok(Self::from_costs(proba1, proba2))
    }

    /// Writes the known costs in the textual format read by `parse`.
    pub fn write<W: Write>(&self, mut writer: W) -> CrackResult<()> {
        for (c, &cost) in self.proba1.iter().enumerate() {
            if cost != UNKNOWN_COST {
                writeln!(writer, "{cost}=proba1[{c}]")?;
            }
        }

        for (i, &cost) in self.proba2.iter().enumerate() {
            if cost != UNKNOWN_COST {
                writeln!(writer, "{cost}=proba2[{}*256+{}]", i / 256, i % 256)?;
            }
        }

        Ok(())
    }

    /// Computes the costs from a wordlist, one password per line.
    pub fn train<R: BufRead>(reader: R) -> CrackResult<Self> {
        let mut first = vec![0u64; 256];
        let mut transitions = vec![0u64; 256 * 256];
        let mut words = 0u64;

        for line in reader.split(b'\n') {
            let mut line = line?;
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            let Some(&head) = line.first() else {
                continue;
            };
            if line.contains(&0) {
                continue;
            }

            words += 1;
            first[head as usize] += 1;
            for pair in line.windows(2) {
                transitions[pair[0] as usize * 256 + pair[1] as usize] += 1;
            }
        }

        let proba1 = first.iter().map(|&count| cost(count, words)).collect();

        let mut proba2 = vec![UNKNOWN_COST; 256 * 256];
        for (row, counts) in transitions.chunks_exact(256).enumerate() {
            let total = counts.iter().sum();
            for (c, &count) in counts.iter().enumerate() {
                proba2[row * 256 + c] = cost(count, total);
            }
        }

        info!(words, "trained the probability tables");

        Ok(Self::from_costs(proba1, proba2))
    }

    /// Reads the textual statistics at `path`.
    pub fn open(path: &Path) -> CrackResult<Self> {
        let tables = Self::parse(BufReader::new(File::open(path)?))?;
        debug!(path = %path.display(), "read the statistics");

        Ok(tables)
    }

    /// Stores the tables in a compact binary form.
    pub fn store(&self, path: &Path) -> CrackResult<()> {
        let file = File::options()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let buf_writer = BufWriter::new(file);
        bincode::serialize_into(buf_writer, self).map_err(|_| CrackError::Serialize)?;

        Ok(())
    }

    /// Loads tables stored by `store`.
    pub fn load(path: &Path) -> CrackResult<Self> {
        let file = File::open(path)?;
        let buf_reader = BufReader::new(file);
        let tables: Self =
            bincode::deserialize_from(buf_reader).map_err(|_| CrackError::Deserialize)?;

        if tables.proba1.len() != 256 || tables.proba2.len() != 256 * 256 {
            return Err(CrackError::Deserialize);
        }

        Ok(Self::from_costs(tables.proba1, tables.proba2))
    }

    /// The cost of `c` as the first character.
    pub fn first(&self, c: u8) -> u8 {
        self.proba1[c as usize]
    }

    /// The cost of `c` following `previous`.
    pub fn transition(&self, previous: u8, c: u8) -> u8 {
        self.proba2[previous as usize * 256 + c as usize]
    }

    /// The characters following `previous` by ascending cost.
    /// `previous == 0` gives the order of the first characters.
    pub fn order(&self, previous: u8) -> &[u8] {
        let start = previous as usize * ORDER_LEN;
        &self.charsorted[start..start + ORDER_LEN]
    }

    /// The cost of `c` after `previous`, or as the first character when `previous` is 0.
    pub fn cost(&self, previous: u8, c: u8) -> u8 {
        if previous == 0 {
            self.first(c)
        } else {
            self.transition(previous, c)
        }
    }

    fn sort_chars(&mut self) {
        let mut charsorted = Vec::with_capacity(256 * ORDER_LEN);
        for previous in 0..=255u8 {
            let mut row: Vec<u8> = (1..=255).collect();
            row.sort_by_key(|&c| (self.cost(previous, c), c));
            charsorted.extend(row);
        }

        self.charsorted = charsorted;
    }
}

fn cost(count: u64, total: u64) -> u8 {
    if count == 0 || total == 0 {
        return UNKNOWN_COST;
    }

    let p = count as f64 / total as f64;
    (-10. * p.ln()).round().min(MAX_KNOWN_COST as f64) as u8
}
