use std::{
    fs::File,
    io::BufReader,
    path::Path,
    sync::{atomic::AtomicBool, Arc},
    time::{Duration, Instant},
};

use anyhow::{ensure, Context, Result};
use comfy_table::{presets::UTF8_BORDERS_ONLY, Cell, Color, Table};
use human_repr::{HumanCount, HumanDuration, HumanThroughput};
use signal_hook::consts::{SIGINT, SIGTERM};
use tracing::{debug, info};

use hashmill_core::{
    formats, self_test, CandidateSource, CrackSummary, Cracked, Cracker, Database, Event,
    MarkovCtxBuilder, MarkovSource, ProbabilityTables, Stop, Tuning, WordlistSource,
};

use crate::{parse_crack_args, session::Session, Crack, Restore};

/// Loads Markov statistics, stored by `train-stats --binary` when the extension is `.bin`.
pub fn load_tables(path: &Path) -> Result<ProbabilityTables> {
    let tables = if path.extension().is_some_and(|ext| ext == "bin") {
        ProbabilityTables::load(path)
    } else {
        ProbabilityTables::open(path)
    };

    tables.with_context(|| format!("Unable to load the statistics {}", path.display()))
}

/// Builds the candidate source described by the arguments.
fn build_source(args: &Crack, plaintext_length: usize) -> Result<Box<dyn CandidateSource>> {
    if let Some(wordlist) = &args.wordlist {
        let source = WordlistSource::open(wordlist)
            .with_context(|| format!("Unable to open the wordlist {}", wordlist.display()))?;

        return Ok(Box::new(source));
    }

    let stats = args
        .markov
        .as_deref()
        .context("A wordlist or Markov statistics are required")?;

    let ctx = MarkovCtxBuilder::new()
        .level(Some(args.level))
        .min_level(args.min_level)
        .max_len(Some(args.max_len))
        .min_len(args.min_len)
        .start(args.start)
        .end(args.end)
        .plaintext_length(plaintext_length)
        .node(args.node)
        .build(load_tables(stats)?)?;

    Ok(Box::new(MarkovSource::new(ctx)))
}

fn tuning(args: &Crack) -> Tuning {
    let mut tuning = Tuning::from_env();
    if let Some(gws) = args.gws {
        tuning = tuning.gws(gws);
    }
    if let Some(lws) = args.lws {
        tuning = tuning.lws(lws);
    }

    tuning
}

fn print_cracked(cracked: &Cracked) {
    let who = if cracked.login.is_empty() {
        &cracked.ciphertext
    } else {
        &cracked.login
    };

    println!("{:<24} ({who})", String::from_utf8_lossy(&cracked.plaintext));
}

fn print_summary(summary: &CrackSummary, elapsed: Duration) {
    let (stop, color) = match summary.stop {
        Stop::AllCracked => ("Every hash was cracked", Color::Green),
        Stop::Exhausted => ("Every candidate was tried", Color::Yellow),
        Stop::Aborted => ("Aborted", Color::Red),
    };
    let rate = summary.candidates as f64 / elapsed.as_secs_f64().max(f64::MIN_POSITIVE);

    let mut display_table = Table::new();
    display_table.load_preset(UTF8_BORDERS_ONLY);
    display_table.set_header(vec![
        "Outcome",
        "Cracked",
        "Remaining",
        "Candidates",
        "Duration",
        "Speed",
    ]);
    display_table.add_row(vec![
        Cell::new(stop).fg(color),
        Cell::new(summary.cracked).fg(Color::Green),
        Cell::new(summary.remaining),
        Cell::new(summary.candidates.human_count_bare()),
        Cell::new(elapsed.as_secs_f64().human_duration()),
        Cell::new(rate.human_throughput("c")),
    ]);

    eprintln!("{display_table}");
}

/// Cracks the hashes described by `args`.
/// `argv` is saved in the session, and `state` is the position to resume from.
pub fn crack(args: Crack, argv: Vec<String>, state: Option<String>) -> Result<()> {
    let mut format = formats::find(&args.format)?;
    format
        .init(&tuning(&args))
        .with_context(|| format!("Unable to initialize {}", args.format))?;

    if !args.skip_self_test {
        self_test(&mut *format)?;
    }

    let plaintext_length = format.params().plaintext_length;
    let hashes = File::open(&args.hashes)
        .with_context(|| format!("Unable to open {}", args.hashes.display()))?;
    let db = Database::load(format.codec(), BufReader::new(hashes))?;
    ensure!(
        !db.is_empty(),
        "No {} hash was found in {}",
        args.format,
        args.hashes.display()
    );
    info!(
        hashes = db.len(),
        salts = db.salt_count(),
        "loaded the hashes"
    );
    eprintln!(
        "Loaded {} {} hashes with {} different salts",
        db.len(),
        format.params().format_name,
        db.salt_count()
    );

    let mut source = build_source(&args, plaintext_length)?;
    if let Some(state) = &state {
        source
            .restore_state(&mut state.as_bytes())
            .context("Unable to resume the session")?;
        eprintln!("Resuming the {} candidates at {}", source.name(), state.trim_end());
    }

    let abort = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&abort))
            .context("Unable to handle the interruptions")?;
    }

    let mut session = Session::new(argv);
    let save_every = Duration::from_secs(args.save_every);
    let start = Instant::now();
    let mut last_save = Instant::now();

    let mut handle = Cracker::new(format, db, source).abort_flag(abort).spawn();
    while let Some(event) = handle.recv() {
        match event {
            Event::Cracked(cracked) => print_cracked(&cracked),
            Event::Batch {
                batch_number,
                candidates,
                cracked,
            } => debug!(batch_number, candidates, cracked, "batch done"),
            Event::Progress {
                candidates,
                progress,
                state,
            } => {
                if last_save.elapsed() < save_every {
                    continue;
                }

                session.save(&args.session, &state)?;
                last_save = Instant::now();

                let progress = progress
                    .map(|(percent, hundredths)| format!("{percent}.{hundredths:02}%"))
                    .unwrap_or_else(|| "?".to_owned());
                eprintln!(
                    "{progress} {} candidates, {}",
                    candidates.human_count_bare(),
                    start.elapsed().as_secs().human_duration()
                );
            }
        }
    }

    let summary = handle.join()?;
    print_summary(&summary, start.elapsed());

    if summary.stop == Stop::Aborted {
        session.save(&args.session, &summary.state)?;
        eprintln!(
            "Session saved, resume it with `hashmill restore {}`",
            args.session.display()
        );
    } else {
        Session::remove(&args.session)?;
    }

    Ok(())
}

/// Resumes the crack saved in a session.
pub fn restore(args: Restore) -> Result<()> {
    let session = Session::load(&args.session)?;
    let mut crack_args = parse_crack_args(&session.args)?;
    // the file may have been moved since
    crack_args.session = args.session;

    crack(crack_args, session.args, Some(session.state))
}
