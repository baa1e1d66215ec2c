//! The enumeration of the passwords of a Markov context, in tree order.

use std::io::{BufRead, Write};

use arrayvec::ArrayVec;

use super::{
    stats::{ProbabilityTables, ORDER_LEN},
    MarkovCtx, MarkovState,
};
use crate::{error::CrackResult, MAX_MKV_LEN};

/// A password of the tree whose children are being visited.
#[derive(Clone, Copy, Debug)]
struct Frame {
    /// The last character, 0 for the root.
    c: u8,
    level: u32,
    /// The position of the next child in the order of `c`.
    next: usize,
}

/// Walks the tree of the passwords of a context.
///
/// The children of a password are the password extended by one character, visited by
/// ascending cost. A password is visited after its subtree, so the empty password is the
/// last one. Every visit takes one index, but only the passwords that are long enough and
/// expensive enough are emitted. The empty password is never emitted.
#[derive(Clone, Debug)]
pub struct MarkovWalk {
    ctx: MarkovCtx,
    stack: ArrayVec<Frame, { MAX_MKV_LEN + 1 }>,
    password: ArrayVec<u8, MAX_MKV_LEN>,
    current: ArrayVec<u8, MAX_MKV_LEN>,
    current_level: u32,
    state: MarkovState,
}

impl MarkovWalk {
    /// Creates a walk positioned at the start of the context.
    pub fn new(ctx: MarkovCtx) -> Self {
        let state = MarkovState::new(ctx.start(), ctx.end());
        let mut walk = Self {
            ctx,
            stack: ArrayVec::new(),
            password: ArrayVec::new(),
            current: ArrayVec::new(),
            current_level: 0,
            state,
        };
        walk.seek(walk.state.gstart);

        walk
    }

    pub fn ctx(&self) -> &MarkovCtx {
        &self.ctx
    }

    pub fn state(&self) -> &MarkovState {
        &self.state
    }

    /// The index of the next password visited.
    pub fn gidx(&self) -> u64 {
        self.state.gidx
    }

    /// Positions the walk so that the next password visited is the one at index `k`.
    ///
    /// The counts of the subtrees are used to skip them, so only one path of the tree
    /// is walked down.
    pub fn seek(&mut self, k: u64) {
        self.stack.clear();
        self.password.clear();
        self.state.gidx = k;

        if k >= self.ctx.nbparts().total() {
            return;
        }

        let tables = self.ctx.tables();
        let nbparts = self.ctx.nbparts();
        let (max_len, max_level) = (self.ctx.max_len(), self.ctx.level());

        let mut remaining = k;
        self.stack.push(Frame {
            c: 0,
            level: 0,
            next: 0,
        });

        'down: while let Some(frame) = self.stack.last_mut() {
            let len = self.password.len();
            while let Some((c, level)) = next_child(tables, frame, len, max_len, max_level) {
                let count = nbparts.get(c, len + 1, level);
                if remaining < count {
                    self.stack.push(Frame { c, level, next: 0 });
                    self.password.push(c);
                    continue 'down;
                }
                remaining -= count;
            }

            // every child is skipped, the password itself is at the index
            debug_assert_eq!(0, remaining);
            break;
        }
    }

    /// Visits passwords until one is emitted, and returns its level.
    /// The password is then available with `password`.
    ///
    /// Returns `None` once the end index is passed or the tree is exhausted.
    pub fn advance(&mut self) -> Option<u32> {
        let tables = self.ctx.tables();
        let (max_len, max_level) = (self.ctx.max_len(), self.ctx.level());
        let (min_len, min_level) = (self.ctx.min_len(), self.ctx.min_level());

        loop {
            let len = self.password.len();
            let frame = self.stack.last_mut()?;

            if let Some((c, level)) = next_child(tables, frame, len, max_len, max_level) {
                self.stack.push(Frame { c, level, next: 0 });
                self.password.push(c);
                continue;
            }

            let level = frame.level;
            if self.state.gidx > self.state.gend {
                self.stack.clear();
                return None;
            }

            self.stack.pop();
            self.state.gidx += 1;

            let emitted = len > 0 && len >= min_len && level >= min_level;
            if emitted {
                self.current.clone_from(&self.password);
                self.current_level = level;
            }
            self.password.pop();

            if emitted {
                return Some(level);
            }
        }
    }

    /// The password emitted by the last `advance`.
    pub fn password(&self) -> &[u8] {
        &self.current
    }

    /// The level of the password emitted by the last `advance`.
    pub fn level(&self) -> u32 {
        self.current_level
    }

    /// Returns true once nothing is left to visit.
    pub fn is_done(&self) -> bool {
        self.stack.is_empty() || self.state.gidx > self.state.gend
    }

    /// Commits the index of the next password, which is what `save_state` writes.
    pub fn fix_state(&mut self) {
        self.state.fix();
    }

    pub fn save_state<W: Write>(&self, writer: W) -> CrackResult<()> {
        self.state.save_state(writer)
    }

    /// Reads an index written by `save_state` and seeks to it.
    pub fn restore_state<R: BufRead>(&mut self, reader: R) -> CrackResult<()> {
        let gidx = MarkovState::read_state(reader)?;
        self.seek(gidx);
        self.state.fix();

        Ok(())
    }

    pub fn get_progress(&self) -> (u32, u32) {
        self.state.get_progress()
    }
}

impl Iterator for MarkovWalk {
    type Item = (Vec<u8>, u32);

    fn next(&mut self) -> Option<Self::Item> {
        let level = self.advance()?;
        Some((self.current.to_vec(), level))
    }
}

/// Returns the next affordable child of `frame` and its level, and moves past it.
fn next_child(
    tables: &ProbabilityTables,
    frame: &mut Frame,
    len: usize,
    max_len: usize,
    max_level: u32,
) -> Option<(u8, u32)> {
    if len >= max_len || frame.next >= ORDER_LEN {
        return None;
    }

    let c = tables.order(frame.c)[frame.next];
    let level = frame.level + tables.cost(frame.c, c) as u32;

    // the children are sorted by cost, so the next ones are too expensive
    if level > max_level {
        frame.next = ORDER_LEN;
        return None;
    }

    frame.next += 1;
    Some((c, level))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use itertools::Itertools;

    use super::MarkovWalk;
    use crate::markov::{MarkovCtxBuilder, ProbabilityTables};

    /// a costs 1, b costs 2 and c costs 4, wherever they are.
    fn abc_tables() -> ProbabilityTables {
        let costs = [(b'a', 1), (b'b', 2), (b'c', 4)];
        let mut text = String::new();
        for (c, cost) in costs {
            text.push_str(&format!("{cost}=proba1[{c}]\n"));
            for (previous, _) in costs {
                text.push_str(&format!("{cost}=proba2[{previous}*256+{c}]\n"));
            }
        }

        ProbabilityTables::parse(Cursor::new(text)).unwrap()
    }

    fn walk(level: u32, max_len: usize) -> MarkovWalk {
        let ctx = MarkovCtxBuilder::new()
            .level(Some(level))
            .max_len(Some(max_len))
            .build(abc_tables())
            .unwrap();

        MarkovWalk::new(ctx)
    }

    fn passwords(walk: MarkovWalk) -> Vec<String> {
        walk.map(|(password, _)| String::from_utf8(password).unwrap())
            .collect()
    }

    #[test]
    fn test_post_order() {
        let walk = walk(3, 2);
        assert_eq!(6, walk.ctx().keyspace());

        let expected = ["aa", "ab", "a", "ba", "b"];
        assert_eq!(expected.to_vec(), passwords(walk.clone()));

        // the empty password keeps the last index without being emitted
        let mut walk = walk;
        while walk.advance().is_some() {}
        assert_eq!(6, walk.gidx());
        assert_eq!((100, 0), walk.get_progress());
    }

    #[test]
    fn test_visits_every_password_once() {
        let walk = walk(8, 4);
        let total = walk.ctx().keyspace();
        let all = passwords(walk);

        assert_eq!(total as usize - 1, all.len());
        assert!(all.iter().all_unique());
        assert!(all.iter().all(|password| (1..=4).contains(&password.len())));
    }

    #[test]
    fn test_seek_reproduces_the_suffix() {
        let full = passwords(walk(8, 4));

        let mut resumed = walk(8, 4);
        for k in [0, 1, 5, 17, full.len() as u64 - 1, full.len() as u64] {
            resumed.seek(k);
            assert_eq!(k, resumed.gidx());
            assert_eq!(full[k as usize..].to_vec(), passwords(resumed.clone()), "{k}");
        }
    }

    #[test]
    fn test_levels_and_lengths_filter_emission() {
        let ctx = MarkovCtxBuilder::new()
            .level(Some(3))
            .max_len(Some(2))
            .min_len(2)
            .build(abc_tables())
            .unwrap();
        let mut walk = MarkovWalk::new(ctx);
        assert_eq!(vec!["aa", "ab", "ba"], passwords(walk.clone()));

        // the skipped passwords still take an index
        while walk.advance().is_some() {}
        assert_eq!(6, walk.gidx());

        let ctx = MarkovCtxBuilder::new()
            .level(Some(3))
            .max_len(Some(2))
            .min_level(3)
            .build(abc_tables())
            .unwrap();
        let emitted = MarkovWalk::new(ctx).collect::<Vec<_>>();
        assert_eq!(vec![(b"ab".to_vec(), 3), (b"ba".to_vec(), 3)], emitted);
    }

    #[test]
    fn test_bounds() {
        let ctx = MarkovCtxBuilder::new()
            .level(Some(3))
            .max_len(Some(2))
            .start(2)
            .end(4)
            .build(abc_tables())
            .unwrap();
        let mut walk = MarkovWalk::new(ctx);

        assert_eq!((0, 0), walk.get_progress());
        assert_eq!(vec!["a", "ba", "b"], passwords(walk.clone()));

        while walk.advance().is_some() {}
        assert!(walk.is_done());
        assert_eq!(5, walk.gidx());
    }

    #[test]
    fn test_state_round_trip() {
        let mut walk = walk(8, 4);
        for _ in 0..10 {
            walk.advance();
        }
        walk.fix_state();
        let expected = passwords(walk.clone());

        let mut saved = Vec::new();
        walk.save_state(&mut saved).unwrap();

        let mut restored = self::walk(8, 4);
        restored.restore_state(Cursor::new(saved)).unwrap();
        assert_eq!(expected, passwords(restored));
    }
}
