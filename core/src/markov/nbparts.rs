//! Counts of the passwords below every node of the enumeration tree.

use super::stats::ProbabilityTables;
use crate::error::{CrackError, CrackResult};

const UNCOMPUTED: u64 = u64::MAX;

/// `nbparts[c][len][level]`: the number of tree nodes in the subtree of a password
/// of length `len` ending with `c` and costing `level`, itself included.
///
/// The root is the empty password, stored at `(0, 0, 0)`.
#[derive(Clone, Debug)]
pub struct NbParts {
    counts: Vec<u64>,
    max_level: u32,
    max_len: usize,
}

impl NbParts {
    /// Counts the passwords costing at most `max_level`, up to `max_len` characters.
    ///
    /// Fails if the keyspace doesn't fit in 64 bits.
    pub fn build(
        tables: &ProbabilityTables,
        max_level: u32,
        max_len: usize,
    ) -> CrackResult<Self> {
        let mut nbparts = Self {
            counts: vec![UNCOMPUTED; 256 * (max_len + 1) * (max_level as usize + 1)],
            max_level,
            max_len,
        };

        nbparts.count(tables, 0, 0, 0)?;

        Ok(nbparts)
    }

    /// The size of the keyspace, the empty password included.
    pub fn total(&self) -> u64 {
        self.counts[0]
    }

    pub fn max_level(&self) -> u32 {
        self.max_level
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// The number of nodes in the subtree of a password of length `len`
    /// ending with `c` and costing `level`.
    pub fn get(&self, c: u8, len: usize, level: u32) -> u64 {
        if len > self.max_len || level > self.max_level {
            return 0;
        }

        match self.counts[self.position(c, len, level)] {
            // unreachable nodes are never counted
            UNCOMPUTED => 0,
            count => count,
        }
    }

    fn position(&self, c: u8, len: usize, level: u32) -> usize {
        (len * (self.max_level as usize + 1) + level as usize) * 256 + c as usize
    }

    fn count(
        &mut self,
        tables: &ProbabilityTables,
        c: u8,
        len: usize,
        level: u32,
    ) -> CrackResult<u64> {
        if len > self.max_len || level > self.max_level {
            return Ok(0);
        }

        let position = self.position(c, len, level);
        if self.counts[position] != UNCOMPUTED {
            return Ok(self.counts[position]);
        }

        let mut total = 1u64;
        if len < self.max_len {
            for &next in tables.order(c) {
                let next_level = level + tables.cost(c, next) as u32;
                // the characters are sorted by cost, so the next ones are too expensive
                if next_level > self.max_level {
                    break;
                }

                let below = self.count(tables, next, len + 1, next_level)?;
                total = total.checked_add(below).ok_or(CrackError::Space(64))?;
            }
        }

        self.counts[position] = total;

        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::NbParts;
    use crate::{error::CrackError, markov::stats::ProbabilityTables};

    /// Two characters costing 1 anywhere.
    fn binary_tables() -> ProbabilityTables {
        let text = "1=proba1[97]\n1=proba1[98]\n\
                    1=proba2[97*256+97]\n1=proba2[97*256+98]\n\
                    1=proba2[98*256+97]\n1=proba2[98*256+98]\n";
        ProbabilityTables::parse(Cursor::new(text)).unwrap()
    }

    #[test]
    fn test_binary_tree() {
        let tables = binary_tables();

        // every password of up to 3 characters, and the empty one
        let nbparts = NbParts::build(&tables, 10, 3).unwrap();
        assert_eq!(1 + 2 + 4 + 8, nbparts.total());
        assert_eq!(1 + 2 + 4, nbparts.get(b'a', 1, 1));
        assert_eq!(1, nbparts.get(b'b', 3, 3));

        // the level cuts the tree before the length does
        let nbparts = NbParts::build(&tables, 2, 3).unwrap();
        assert_eq!(1 + 2 + 4, nbparts.total());
        assert_eq!(0, nbparts.get(b'a', 3, 3));
    }

    #[test]
    fn test_unknown_transitions_count_when_affordable() {
        let tables = ProbabilityTables::parse(Cursor::new("1=proba1[97]")).unwrap();

        assert_eq!(2, NbParts::build(&tables, 254, 2).unwrap().total());
        // the other first characters become affordable, and so do the transitions after a
        assert_eq!(1 + (1 + 255) + 254, NbParts::build(&tables, 256, 2).unwrap().total());
    }

    #[test]
    fn test_overflow() {
        // everything is free, so the keyspace is 255^30
        let first = (1..=255).map(|c| format!("0=proba1[{c}]\n"));
        let transitions = (1..=255)
            .flat_map(|p| (1..=255).map(move |c| format!("0=proba2[{p}*256+{c}]\n")));
        let text = first.chain(transitions).collect::<String>();
        let tables = ProbabilityTables::parse(Cursor::new(text)).unwrap();

        assert!(matches!(
            NbParts::build(&tables, 0, 30),
            Err(CrackError::Space(64))
        ));
    }
}
