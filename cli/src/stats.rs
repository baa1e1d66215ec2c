use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
};

use anyhow::{Context, Result};

use hashmill_core::ProbabilityTables;

use crate::TrainStats;

/// Trains Markov statistics on a wordlist and writes them.
pub fn train_stats(args: TrainStats) -> Result<()> {
    let wordlist = File::open(&args.wordlist)
        .with_context(|| format!("Unable to open the wordlist {}", args.wordlist.display()))?;
    let tables = ProbabilityTables::train(BufReader::new(wordlist))?;

    if args.binary {
        tables
            .store(&args.out)
            .with_context(|| format!("Unable to store the statistics in {}", args.out.display()))?;
    } else {
        let file = File::create(&args.out)
            .with_context(|| format!("Unable to create {}", args.out.display()))?;
        let mut writer = BufWriter::new(file);
        tables.write(&mut writer)?;
        writer.flush()?;
    }

    eprintln!("Statistics written to {}", args.out.display());

    Ok(())
}
