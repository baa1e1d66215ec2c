//! Empirical tuning of the work group size and of the number of keys per batch.

use std::{env, time::Duration};

use tracing::{debug, info, warn};

use crate::{buffers::KeyBuffer, error::CrackResult};

/// The key every slot is filled with when searching the best batch size.
pub const TUNING_KEY: &[u8] = b"abcaaeaf";

/// The batch sizes tried by `find_best_kpc` are this far apart.
pub const KPC_STEP: usize = 4096;

/// The time the timed passes of a work group size should roughly take.
const TARGET_PASS_TIME: Duration = Duration::from_millis(500);

const MAX_LOOPS: u128 = 10;

/// The tuning knobs a user can set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Tuning {
    /// The number of keys per batch. `Some(0)` asks for a search.
    pub gws: Option<usize>,
    /// The work group size. `None` or `Some(0)` asks for a search.
    pub lws: Option<usize>,
}

impl Tuning {
    /// Reads the `GWS` and `LWS` environment variables.
    pub fn from_env() -> Self {
        Self {
            gws: read_knob("GWS"),
            lws: read_knob("LWS"),
        }
    }

    pub fn gws(mut self, gws: usize) -> Self {
        self.gws = Some(gws);
        self
    }

    pub fn lws(mut self, lws: usize) -> Self {
        self.lws = Some(lws);
        self
    }

    /// Returns the work group size to use, if one was given.
    pub fn fixed_lws(&self) -> Option<usize> {
        self.lws.filter(|&lws| lws != 0)
    }
}

fn read_knob(name: &str) -> Option<usize> {
    let value = env::var(name).ok()?;

    match value.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("ignoring {name}={value}, it is not a number");
            None
        }
    }
}

/// The bounds of the values a backend accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TuneLimits {
    pub max_keys: usize,
    pub max_local: usize,
    pub preferred_multiple: usize,
}

/// A backend with knobs that can be tuned by timing its dispatches.
pub trait Tunable {
    fn limits(&self) -> TuneLimits;

    /// Reallocates every buffer for `capacity` keys.
    /// Returns the capacity actually allocated.
    fn reallocate(&mut self, capacity: usize) -> CrackResult<usize>;

    fn local(&self) -> usize;

    fn set_local(&mut self, local: usize);

    /// Hashes the first `count` keys and returns the kernel and read back time.
    fn timed_run(&mut self, keys: &KeyBuffer, count: usize) -> CrackResult<Duration>;
}

/// Finds the work group size hashing `count` copies of `key` the fastest, and keeps it.
///
/// Only multiples of the preferred multiple dividing `count` are tried.
pub fn find_best_workgroup(
    tunable: &mut dyn Tunable,
    keys: &mut KeyBuffer,
    key: &[u8],
    count: usize,
) -> CrackResult<usize> {
    let limits = tunable.limits();
    let max_local = limits.max_local.max(1);
    let multiple = limits.preferred_multiple.clamp(1, max_local);

    keys.fill(key);

    // the first run pays for the lazy initializations
    tunable.set_local(multiple);
    tunable.timed_run(keys, count)?;
    let probe = tunable.timed_run(keys, count)?;
    let loops = (TARGET_PASS_TIME.as_nanos() / probe.as_nanos().max(1)).clamp(1, MAX_LOOPS);

    let mut best = (multiple, Duration::MAX);
    for local in (multiple..=max_local).step_by(multiple) {
        if count % local != 0 {
            continue;
        }

        tunable.set_local(local);
        let mut total = Duration::ZERO;
        for _ in 0..loops {
            total += tunable.timed_run(keys, count)?;
        }
        debug!(local, ?total, "timed a work group size");

        if total < best.1 {
            best = (local, total);
        }
    }

    tunable.set_local(best.0);
    info!(lws = best.0, "tuned the local work size (to skip this, set LWS={})", best.0);

    Ok(best.0)
}

/// Finds the batch size with the lowest hashing time per key, and reallocates for it.
///
/// Sizes are tried from `max` downward. On a tie, the smaller batch wins.
pub fn find_best_kpc(
    tunable: &mut dyn Tunable,
    keys: &mut KeyBuffer,
    max: usize,
) -> CrackResult<usize> {
    let max = max.min(tunable.limits().max_keys);
    let mut optimal = max;
    let mut best_per_key = f64::MAX;

    let mut num = max;
    while num > KPC_STEP {
        let capacity = tunable.reallocate(num)?;
        keys.resize(capacity);
        keys.fill(TUNING_KEY);

        match tunable.timed_run(keys, capacity) {
            Ok(elapsed) => {
                let per_key = elapsed.as_nanos() as f64 / capacity as f64;
                debug!(capacity, per_key, "timed a batch size");

                if per_key <= best_per_key {
                    best_per_key = per_key;
                    optimal = capacity;
                }
            }
            Err(err) => warn!("skipping a batch of {capacity} keys: {err}"),
        }

        num -= KPC_STEP;
    }

    let capacity = tunable.reallocate(optimal)?;
    keys.resize(capacity);
    info!(gws = capacity, "tuned the keys per crypt (to skip this, set GWS={capacity})");

    Ok(capacity)
}
