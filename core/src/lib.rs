pub mod backend;
pub mod buffers;
pub mod codec;
pub mod cracker;
pub mod error;
pub mod event;
pub mod format;
pub mod formats;
pub mod hash;
pub mod markov;
pub mod scheduling;
pub mod source;
pub mod target;
pub mod tuning;

pub use cracker::{CrackSummary, Cracked, Cracker, Stop};
pub use error::{CrackError, CrackResult};
pub use event::{CrackHandle, Event};
pub use format::{benchmark, self_test, Benchmark, Format, FormatEngine, FormatParams, HashLevel};
pub use markov::{MarkovCtx, MarkovCtxBuilder, MarkovWalk, Node, ProbabilityTables};
pub use source::{CandidateSource, MarkovSource, WordlistSource};
pub use target::{Database, TargetIndex};
pub use tuning::Tuning;

/// The longest password the Markov enumerator supports.
pub const MAX_MKV_LEN: usize = 30;

/// The highest Markov level supported.
pub const MAX_MKV_LVL: u32 = 400;

/// The default Markov level.
pub const DEFAULT_MKV_LEVEL: u32 = 200;

/// The default maximum length of the Markov passwords.
pub const DEFAULT_MKV_MAX_LEN: usize = 12;
