mod bench;
mod crack;
mod session;
mod stats;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{value_parser, ArgAction, ArgGroup, Args, Parser, Subcommand};
use comfy_table::{presets::UTF8_BORDERS_ONLY, Table};
use tracing_subscriber::EnvFilter;

use hashmill_core::{formats, markov::Node, DEFAULT_MKV_LEVEL, DEFAULT_MKV_MAX_LEN};

use bench::{bench, self_test};
use crack::{crack, restore};
use stats::train_stats;

/// The session file used when none is given.
const DEFAULT_SESSION: &str = "hashmill.rec";

/// Password recovery with Markov and wordlist candidates, on the CPU or on a compute device.
#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// Increases the verbosity. Repeat it for more details.
    /// RUST_LOG takes precedence when it is set.
    #[clap(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[clap(subcommand)]
    commands: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Crack(Crack),
    Restore(Restore),
    Test(Test),
    Bench(Bench),
    /// List the available formats.
    ListFormats,
    TrainStats(TrainStats),
}

/// Crack the hashes of a password file.
#[derive(Args)]
#[clap(group(ArgGroup::new("source").required(true).args(["wordlist", "markov"])))]
pub struct Crack {
    /// The password file, made of `login:ciphertext` or bare `ciphertext` lines.
    #[clap(value_parser)]
    hashes: PathBuf,

    /// The format of the hashes. See `list-formats`.
    #[clap(short, long, default_value = "raw-md5")]
    format: String,

    /// Tries every line of a wordlist.
    #[clap(short, long, value_parser)]
    wordlist: Option<PathBuf>,

    /// Enumerates the passwords of the Markov model described by these statistics,
    /// in text form or as stored by `train-stats --binary` (`.bin` extension).
    #[clap(short, long, value_parser)]
    markov: Option<PathBuf>,

    /// The highest cost of the Markov passwords.
    #[clap(short, long, default_value_t = DEFAULT_MKV_LEVEL)]
    level: u32,

    /// The lowest cost of the Markov passwords tried.
    #[clap(long, default_value_t = 0)]
    min_level: u32,

    /// The maximum length of the Markov passwords.
    #[clap(long, default_value_t = DEFAULT_MKV_MAX_LEN)]
    max_len: usize,

    /// The minimum length of the Markov passwords tried.
    #[clap(long, default_value_t = 0)]
    min_len: usize,

    /// The index of the first Markov password.
    #[clap(long, default_value_t = 0)]
    start: u64,

    /// The index of the last Markov password. 0 means the whole keyspace.
    #[clap(long, default_value_t = 0)]
    end: u64,

    /// Only enumerates the share of some nodes, as `MIN[-MAX]/COUNT`.
    #[clap(long, value_parser = parse_node)]
    node: Option<Node>,

    /// The number of keys per batch. 0 searches the best one.
    /// Overrides the GWS environment variable.
    #[clap(long)]
    gws: Option<usize>,

    /// The work group size on devices. 0 searches the best one.
    /// Overrides the LWS environment variable.
    #[clap(long)]
    lws: Option<usize>,

    /// Skips the self test run before cracking.
    #[clap(long, value_parser)]
    skip_self_test: bool,

    /// The session file, where the position is saved to resume an interrupted run.
    #[clap(short, long, value_parser, default_value = DEFAULT_SESSION)]
    session: PathBuf,

    /// The number of seconds between two session saves.
    #[clap(long, value_parser = value_parser!(u64).range(1..), default_value_t = 30)]
    save_every: u64,
}

/// Resume an interrupted crack.
#[derive(Args)]
pub struct Restore {
    /// The session file of the interrupted run.
    #[clap(value_parser, default_value = DEFAULT_SESSION)]
    session: PathBuf,
}

/// Check the formats against their known hashes.
#[derive(Args)]
pub struct Test {
    /// Only tests this format.
    #[clap(short, long)]
    format: Option<String>,
}

/// Measure the speed of the formats.
#[derive(Args)]
pub struct Bench {
    /// Only benchmarks this format.
    #[clap(short, long)]
    format: Option<String>,

    /// The number of seconds spent on every format.
    #[clap(short, long, value_parser = value_parser!(u64).range(1..), default_value_t = 1)]
    seconds: u64,
}

/// Compute Markov statistics from a wordlist.
#[derive(Args)]
pub struct TrainStats {
    /// The wordlist, one password per line.
    #[clap(value_parser)]
    wordlist: PathBuf,

    /// Where the statistics are written.
    #[clap(value_parser)]
    out: PathBuf,

    /// Stores the statistics in a compact binary form instead of text.
    #[clap(long, value_parser)]
    binary: bool,
}

/// Parses `MIN[-MAX]/COUNT`.
fn parse_node(node: &str) -> Result<Node> {
    let (range, count) = node
        .split_once('/')
        .context("The node should look like MIN[-MAX]/COUNT")?;
    let (min, max) = range.split_once('-').unwrap_or((range, range));

    let number = |text: &str| {
        text.trim()
            .parse::<u32>()
            .with_context(|| format!("{text} is not a node number"))
    };

    Ok(Node::new(number(min)?, number(max)?, number(count)?)?)
}

/// Installs the log subscriber writing to stderr.
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn list_formats() {
    let mut display_table = Table::new();
    display_table.load_preset(UTF8_BORDERS_ONLY);
    display_table.set_header(vec![
        "Label",
        "Format",
        "Algorithm",
        "Max length",
        "Salt size",
        "Keys per crypt",
    ]);

    for format in formats::registry() {
        let params = format.params();
        display_table.add_row(vec![
            params.label.to_owned(),
            params.format_name.to_owned(),
            params.algorithm_name.clone(),
            params.plaintext_length.to_string(),
            params.salt_size.to_string(),
            params.max_keys_per_crypt.to_string(),
        ]);
    }

    println!("{display_table}");
}

fn main() -> Result<()> {
    let argv = std::env::args().skip(1).collect::<Vec<_>>();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.commands {
        Commands::Crack(args) => crack(args, argv, None)?,
        Commands::Restore(args) => restore(args)?,
        Commands::Test(args) => self_test(args)?,
        Commands::Bench(args) => bench(args)?,
        Commands::ListFormats => list_formats(),
        Commands::TrainStats(args) => train_stats(args)?,
    }

    Ok(())
}

/// Parses the arguments of a saved session, which must be a crack.
fn parse_crack_args(args: &[String]) -> Result<Crack> {
    let argv = std::iter::once("hashmill").chain(args.iter().map(String::as_str));
    let cli = Cli::try_parse_from(argv).context("The session holds invalid arguments")?;

    match cli.commands {
        Commands::Crack(crack) => Ok(crack),
        _ => bail!("The session is not a crack session"),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::{parse_crack_args, parse_node, Cli};

    #[test]
    fn test_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_node() {
        let node = parse_node("2/4").unwrap();
        assert_eq!((2, 2, 4), (node.min, node.max, node.count));

        let node = parse_node("1-3/8").unwrap();
        assert_eq!((1, 3, 8), (node.min, node.max, node.count));

        assert!(parse_node("3").is_err());
        assert!(parse_node("5/4").is_err());
        assert!(parse_node("a/4").is_err());
    }

    #[test]
    fn test_parse_crack_args() {
        let args = ["crack", "hashes.txt", "--markov", "stats.txt", "-l", "150", "--node", "1/2"]
            .map(String::from);
        let crack = parse_crack_args(&args).unwrap();

        assert_eq!(150, crack.level);
        assert_eq!("raw-md5", crack.format);
        assert!(crack.node.is_some());

        // a source is required
        assert!(parse_crack_args(&["crack", "hashes.txt"].map(String::from)).is_err());
        assert!(parse_crack_args(&["list-formats".to_owned()]).is_err());
    }
}
