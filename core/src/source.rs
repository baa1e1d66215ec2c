//! Where the candidates come from.

use std::{
    fs::File,
    io::{BufRead, BufReader, Write},
    path::Path,
};

use crate::{
    error::{CrackError, CrackResult},
    markov::{MarkovCtx, MarkovState, MarkovWalk},
};

/// A resumable sequence of candidates.
pub trait CandidateSource: Send {
    fn name(&self) -> &'static str;

    /// Writes the next candidate in `candidate`.
    /// Returns false once the source is exhausted.
    fn next_candidate(&mut self, candidate: &mut Vec<u8>) -> CrackResult<bool>;

    /// Commits the position after every candidate produced so far.
    fn fix_state(&mut self);

    /// Writes the committed position as one line.
    fn save_state(&self, writer: &mut dyn Write) -> CrackResult<()>;

    /// Moves to a position written by `save_state`.
    fn restore_state(&mut self, reader: &mut dyn BufRead) -> CrackResult<()>;

    /// The progress in percent and hundredths of a percent, when the size is known.
    fn progress(&self) -> Option<(u32, u32)>;
}

/// The passwords of a Markov model.
pub struct MarkovSource {
    walk: MarkovWalk,
}

impl MarkovSource {
    pub fn new(ctx: MarkovCtx) -> Self {
        Self {
            walk: MarkovWalk::new(ctx),
        }
    }

    pub fn walk(&self) -> &MarkovWalk {
        &self.walk
    }
}

impl CandidateSource for MarkovSource {
    fn name(&self) -> &'static str {
        "markov"
    }

    fn next_candidate(&mut self, candidate: &mut Vec<u8>) -> CrackResult<bool> {
        if self.walk.advance().is_none() {
            return Ok(false);
        }

        candidate.clear();
        candidate.extend_from_slice(self.walk.password());

        Ok(true)
    }

    fn fix_state(&mut self) {
        self.walk.fix_state();
    }

    fn save_state(&self, writer: &mut dyn Write) -> CrackResult<()> {
        self.walk.save_state(writer)
    }

    fn restore_state(&mut self, reader: &mut dyn BufRead) -> CrackResult<()> {
        self.walk.restore_state(reader)
    }

    fn progress(&self) -> Option<(u32, u32)> {
        Some(self.walk.get_progress())
    }
}

/// One candidate per line of a wordlist. Line endings are stripped.
pub struct WordlistSource<R> {
    reader: R,
    line: u64,
    committed: u64,
    read: u64,
    size: Option<u64>,
}

impl WordlistSource<BufReader<File>> {
    /// Opens the wordlist at `path`.
    pub fn open(path: &Path) -> CrackResult<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();

        Ok(Self::new(BufReader::new(file), Some(size)))
    }
}

impl<R: BufRead + Send> WordlistSource<R> {
    /// Reads the candidates from `reader`. Knowing the size in bytes gives the progress.
    pub fn new(reader: R, size: Option<u64>) -> Self {
        Self {
            reader,
            line: 0,
            committed: 0,
            read: 0,
            size,
        }
    }

    /// The number of lines read.
    pub fn line(&self) -> u64 {
        self.line
    }

    fn read_line(&mut self, candidate: &mut Vec<u8>) -> CrackResult<bool> {
        candidate.clear();
        let read = self.reader.read_until(b'\n', candidate)?;
        if read == 0 {
            return Ok(false);
        }

        self.read += read as u64;
        self.line += 1;

        if candidate.last() == Some(&b'\n') {
            candidate.pop();
        }
        if candidate.last() == Some(&b'\r') {
            candidate.pop();
        }

        Ok(true)
    }
}

impl<R: BufRead + Send> CandidateSource for WordlistSource<R> {
    fn name(&self) -> &'static str {
        "wordlist"
    }

    fn next_candidate(&mut self, candidate: &mut Vec<u8>) -> CrackResult<bool> {
        self.read_line(candidate)
    }

    fn fix_state(&mut self) {
        self.committed = self.line;
    }

    fn save_state(&self, writer: &mut dyn Write) -> CrackResult<()> {
        writeln!(writer, "{}", self.committed)?;

        Ok(())
    }

    /// Skips the lines up to the saved one. The reader must be at its start.
    fn restore_state(&mut self, reader: &mut dyn BufRead) -> CrackResult<()> {
        let target = MarkovState::read_state(reader).map_err(|err| match err {
            CrackError::State(_) => CrackError::State("the wordlist line is missing".to_owned()),
            err => err,
        })?;

        let mut skipped = Vec::new();
        while self.line < target {
            if !self.read_line(&mut skipped)? {
                return Err(CrackError::State(format!(
                    "the wordlist has only {} lines, cannot resume at line {target}",
                    self.line
                )));
            }
        }
        self.committed = self.line;

        Ok(())
    }

    fn progress(&self) -> Option<(u32, u32)> {
        let size = self.size.filter(|&size| size > 0)?;
        let progress = (self.read as u128 * 10000 / size as u128).min(10000) as u32;

        Some((progress / 100, progress % 100))
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};

    use super::{CandidateSource, MarkovSource, WordlistSource};
    use crate::markov::{MarkovCtxBuilder, ProbabilityTables};

    fn drain(source: &mut dyn CandidateSource) -> Vec<Vec<u8>> {
        let mut candidate = Vec::new();
        let mut all = Vec::new();
        while source.next_candidate(&mut candidate).unwrap() {
            all.push(candidate.clone());
        }

        all
    }

    #[test]
    fn test_wordlist_strips_line_endings() {
        let mut source = WordlistSource::new(Cursor::new("test\r\n\npass word\nlast"), None);
        let all = drain(&mut source);

        assert_eq!(
            vec![b"test".to_vec(), b"".to_vec(), b"pass word".to_vec(), b"last".to_vec()],
            all
        );
        assert_eq!(4, source.line());
        assert_eq!(None, source.progress());
    }

    #[test]
    fn test_wordlist_resume() {
        let words = "a\nb\nc\nd\ne\n";
        let mut source = WordlistSource::new(Cursor::new(words), Some(words.len() as u64));
        let mut candidate = Vec::new();
        for _ in 0..2 {
            source.next_candidate(&mut candidate).unwrap();
        }
        source.fix_state();
        // produced but not committed
        source.next_candidate(&mut candidate).unwrap();
        assert_eq!(Some((60, 0)), source.progress());

        let mut state = Vec::new();
        source.save_state(&mut state).unwrap();
        assert_eq!(b"2\n".to_vec(), state);

        let mut resumed = WordlistSource::new(Cursor::new(words), None);
        resumed.restore_state(&mut Cursor::new(state)).unwrap();
        assert_eq!(vec![b"c".to_vec(), b"d".to_vec(), b"e".to_vec()], drain(&mut resumed));
    }

    #[test]
    fn test_wordlist_too_short_to_resume() {
        let mut source = WordlistSource::new(Cursor::new("a\nb\n"), None);
        assert!(source.restore_state(&mut Cursor::new("3\n")).is_err());
    }

    #[test]
    fn test_wordlist_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"one\ntwo\n").unwrap();

        let mut source = WordlistSource::open(file.path()).unwrap();
        assert_eq!(2, drain(&mut source).len());
        assert_eq!(Some((100, 0)), source.progress());
    }

    #[test]
    fn test_markov_resume() {
        let tables = ProbabilityTables::train(Cursor::new("abc\nacb\nbca\n")).unwrap();
        let ctx = MarkovCtxBuilder::new()
            .level(Some(40))
            .max_len(Some(4))
            .build(tables)
            .unwrap();

        let mut source = MarkovSource::new(ctx.clone());
        let all = drain(&mut MarkovSource::new(ctx.clone()));

        let mut candidate = Vec::new();
        for _ in 0..3 {
            source.next_candidate(&mut candidate).unwrap();
        }
        source.fix_state();
        let mut state = Vec::new();
        source.save_state(&mut state).unwrap();

        let mut resumed = MarkovSource::new(ctx);
        resumed.restore_state(&mut Cursor::new(state)).unwrap();
        assert_eq!(all[3..].to_vec(), drain(&mut resumed));
        assert_eq!(Some((100, 0)), resumed.progress());
    }
}
