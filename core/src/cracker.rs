//! The crack loop: candidates are hashed by batches and compared against the targets.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Sender},
        Arc,
    },
    thread,
};

use tracing::{debug, info};

use crate::{
    error::CrackResult,
    event::{CrackHandle, Event},
    format::{Format, HashLevel},
    source::CandidateSource,
    target::{Buckets, Database},
};

/// A cracked hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cracked {
    pub login: String,
    /// The canonical ciphertext.
    pub ciphertext: String,
    pub plaintext: Vec<u8>,
}

/// Why a run stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stop {
    /// Every candidate of the source was tried.
    Exhausted,
    /// No hash is left to crack.
    AllCracked,
    /// The abort flag was raised.
    Aborted,
}

/// What a run did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CrackSummary {
    pub stop: Stop,
    pub candidates: u64,
    pub cracked: usize,
    /// The hashes left to crack.
    pub remaining: usize,
    /// The committed position of the source, as written by `CandidateSource::save_state`.
    pub state: String,
}

/// The records of a salt group bucketed by a prefix of their digest.
/// Small groups aren't bucketed, every record is compared.
struct GroupIndex {
    level: Option<HashLevel>,
    buckets: Buckets,
}

/// Drives a candidate source through a format against a set of targets.
pub struct Cracker {
    format: Box<dyn Format>,
    db: Database,
    source: Box<dyn CandidateSource>,
    abort: Arc<AtomicBool>,
}

impl Cracker {
    /// The format must be initialized.
    pub fn new(format: Box<dyn Format>, db: Database, source: Box<dyn CandidateSource>) -> Self {
        Self {
            format,
            db,
            source,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Uses a flag raised from outside to stop the run.
    pub fn abort_flag(mut self, abort: Arc<AtomicBool>) -> Self {
        self.abort = abort;

        self
    }

    /// Runs in the background, the events being sent to the returned handle.
    pub fn spawn(self) -> CrackHandle {
        let (sender, receiver) = mpsc::channel();
        let handle = thread::spawn(move || self.run(Some(sender)));

        CrackHandle { handle, receiver }
    }

    /// Runs until the source is exhausted, every hash is cracked or the run is aborted.
    ///
    /// An abort during the filling of a batch still hashes the candidates already set,
    /// so that the committed position never skips a candidate.
    pub fn run(mut self, sender: Option<Sender<Event>>) -> CrackResult<CrackSummary> {
        let send = |event: Event| {
            if let Some(sender) = &sender {
                // the receiver may be gone, the run goes on without it
                let _ = sender.send(event);
            }
        };

        let mut cracked = 0;
        let mut candidates = 0u64;
        let mut batch_number = 0u64;
        let mut candidate = Vec::new();

        let stop = if self.db.is_empty() {
            Stop::AllCracked
        } else {
            self.format.reset(Some(&self.db))?;
            let mut groups = self.index_groups();

            loop {
                let capacity = self.format.keys_per_crypt();
                let mut count = 0;
                let mut stop = None;

                self.format.clear_keys();
                while count < capacity {
                    if self.abort.load(Ordering::Relaxed) {
                        stop = Some(Stop::Aborted);
                        break;
                    }
                    if !self.source.next_candidate(&mut candidate)? {
                        stop = Some(Stop::Exhausted);
                        break;
                    }

                    self.format.set_key(&candidate, count);
                    count += 1;
                }

                let mut batch_cracked = Vec::new();
                if count > 0 {
                    batch_cracked = self.crypt_batch(count, &groups)?;
                    candidates += count as u64;
                    batch_number += 1;
                }

                self.source.fix_state();

                if !batch_cracked.is_empty() {
                    cracked += batch_cracked.len();
                    for hit in batch_cracked {
                        send(Event::Cracked(hit));
                    }

                    if !self.db.is_empty() {
                        self.format.reset(Some(&self.db))?;
                        groups = self.index_groups();
                    }
                }

                debug!(batch_number, count, "hashed a batch");
                send(Event::Batch {
                    batch_number,
                    candidates: count,
                    cracked,
                });
                send(Event::Progress {
                    candidates,
                    progress: self.source.progress(),
                    state: self.state()?,
                });

                if self.db.is_empty() {
                    break Stop::AllCracked;
                }
                if let Some(stop) = stop {
                    break stop;
                }
                if self.abort.load(Ordering::Relaxed) {
                    break Stop::Aborted;
                }
            }
        };

        info!(?stop, candidates, cracked, "the run is over");

        Ok(CrackSummary {
            stop,
            candidates,
            cracked,
            remaining: self.db.len(),
            state: self.state()?,
        })
    }

    /// Hashes the first `count` keys for every salt and removes the cracked hashes.
    fn crypt_batch(&mut self, count: usize, groups: &[GroupIndex]) -> CrackResult<Vec<Cracked>> {
        // survivor indices only hold until the next crypt, so plaintexts are read right away
        let mut hits: Vec<(usize, usize, Vec<u8>)> = Vec::new();

        for (g, (group, index)) in self.db.groups().iter().zip(groups).enumerate() {
            self.format.set_salt(&group.salt);
            let computed = self.format.crypt_all(count)?;
            if computed == 0 {
                continue;
            }

            match index.level {
                Some(level) => {
                    for i in 0..computed {
                        let hash = self.format.get_hash(i, level);
                        for &r in index.buckets.get(hash) {
                            let record = &group.records[r];
                            if self.format.cmp_one(&record.binary, i)
                                && self.format.cmp_exact(&record.source, i)?
                            {
                                hits.push((g, r, self.format.get_key(i)));
                            }
                        }
                    }
                }
                None => {
                    for (r, record) in group.records.iter().enumerate() {
                        if !self.format.cmp_all(&record.binary, computed) {
                            continue;
                        }

                        for i in 0..computed {
                            if self.format.cmp_one(&record.binary, i)
                                && self.format.cmp_exact(&record.source, i)?
                            {
                                hits.push((g, r, self.format.get_key(i)));
                            }
                        }
                    }
                }
            }
        }

        // a hash matched by several candidates is cracked once
        hits.sort_unstable();
        hits.dedup_by_key(|(g, r, _)| (*g, *r));

        // removing from the end keeps the other positions valid
        let mut cracked = Vec::with_capacity(hits.len());
        for (g, r, plaintext) in hits.into_iter().rev() {
            let record = self.db.remove(g, r);
            info!(login = %record.login, "cracked {}", record.source);

            cracked.push(Cracked {
                login: record.login,
                ciphertext: record.source,
                plaintext,
            });
        }
        cracked.reverse();

        Ok(cracked)
    }

    fn index_groups(&self) -> Vec<GroupIndex> {
        self.db
            .groups()
            .iter()
            .map(|group| {
                let level = HashLevel::for_count(group.records.len());
                let mask = level.map_or(0, HashLevel::mask);

                GroupIndex {
                    level,
                    buckets: match level {
                        Some(_) => Buckets::new(&group.records, mask),
                        None => Buckets::default(),
                    },
                }
            })
            .collect()
    }

    fn state(&self) -> CrackResult<String> {
        let mut state = Vec::new();
        self.source.save_state(&mut state)?;

        Ok(String::from_utf8_lossy(&state).trim_end().to_owned())
    }
}
