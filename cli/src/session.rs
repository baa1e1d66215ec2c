//! The session file of a crack, to resume it after an interruption.
//!
//! The file holds a header line, the number of arguments, one argument per line,
//! then the position of the candidate source.

use std::{
    fs::{self, File},
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{bail, ensure, Context, Result};

const HEADER: &str = "hashmill session v1";

/// The arguments of a crack and the committed position of its source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub args: Vec<String>,
    pub state: String,
}

impl Session {
    pub fn new(args: Vec<String>) -> Self {
        Self {
            args,
            state: String::new(),
        }
    }

    /// Writes the session with the given source position.
    /// A temporary file is renamed over the previous session, so that an
    /// interrupted save never leaves a truncated one.
    pub fn save(&mut self, path: &Path, state: &str) -> Result<()> {
        ensure!(
            self.args.iter().all(|arg| !arg.contains('\n')),
            "An argument spans several lines, the session cannot be saved"
        );
        self.state = state.trim_end().to_owned();

        let mut tmp = PathBuf::from(path);
        tmp.set_extension("tmp");

        let file = File::options()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)
            .with_context(|| format!("Unable to create {}", tmp.display()))?;
        let mut writer = BufWriter::new(file);

        writeln!(writer, "{HEADER}")?;
        writeln!(writer, "{}", self.args.len())?;
        for arg in &self.args {
            writeln!(writer, "{arg}")?;
        }
        writeln!(writer, "{}", self.state)?;
        writer.flush()?;
        drop(writer);

        fs::rename(&tmp, path)
            .with_context(|| format!("Unable to write the session to {}", path.display()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Unable to open the session {}", path.display()))?;
        let mut lines = BufReader::new(file).lines();
        let mut next = |what: &str| -> Result<String> {
            lines
                .next()
                .transpose()?
                .with_context(|| format!("The session is truncated, {what} is missing"))
        };

        if next("the header")? != HEADER {
            bail!("{} is not a session file", path.display());
        }

        let count = next("the argument count")?
            .parse::<usize>()
            .context("The argument count of the session is not a number")?;
        let args = (0..count)
            .map(|_| next("an argument"))
            .collect::<Result<Vec<_>>>()?;
        let state = next("the position")?;

        Ok(Self { args, state })
    }

    /// Removes the session file, if any.
    pub fn remove(path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => {
                Err(err).with_context(|| format!("Unable to remove {}", path.display()))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::Session;

    #[test]
    fn test_session_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.rec");

        let args = ["crack", "hashes.txt", "-w", "words with spaces"].map(String::from).to_vec();
        let mut session = Session::new(args.clone());
        session.save(&path, "1234\n").unwrap();

        let loaded = Session::load(&path).unwrap();
        assert_eq!(args, loaded.args);
        assert_eq!("1234", loaded.state);
        assert!(!path.with_extension("tmp").exists());

        // a later save replaces the position
        session.save(&path, "5678\n").unwrap();
        assert_eq!("5678", Session::load(&path).unwrap().state);

        Session::remove(&path).unwrap();
        assert!(!path.exists());
        Session::remove(&path).unwrap();
    }

    #[test]
    fn test_session_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.rec");

        fs::write(&path, "something else\n").unwrap();
        assert!(Session::load(&path).is_err());

        fs::write(&path, "hashmill session v1\n3\ncrack\n").unwrap();
        assert!(Session::load(&path).is_err());

        fs::write(&path, "hashmill session v1\nmany\n").unwrap();
        assert!(Session::load(&path).is_err());

        assert!(Session::load(&dir.path().join("missing.rec")).is_err());
    }

    #[test]
    fn test_multiline_argument() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(vec!["two\nlines".to_owned()]);

        assert!(session.save(&dir.path().join("run.rec"), "0").is_err());
    }
}
