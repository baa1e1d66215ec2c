use std::{sync::mpsc::Receiver, thread::JoinHandle};

use crate::{
    cracker::{CrackSummary, Cracked},
    error::{CrackError, CrackResult},
};

/// An event to track a cracking run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// A hash was cracked.
    Cracked(Cracked),
    /// The nth batch was hashed and compared.
    Batch {
        batch_number: u64,
        candidates: usize,
        cracked: usize,
    },
    /// The source committed its position after a batch.
    Progress {
        /// The candidates tried since the start of the run.
        candidates: u64,
        /// In percent and hundredths of a percent, when the source knows its size.
        progress: Option<(u32, u32)>,
        /// The position of the source, as written by `CandidateSource::save_state`.
        state: String,
    },
}

pub struct CrackHandle {
    pub(crate) handle: JoinHandle<CrackResult<CrackSummary>>,
    pub(crate) receiver: Receiver<Event>,
}

impl CrackHandle {
    /// Returns the summary of the run.
    /// Blocks until the run is over.
    pub fn join(self) -> CrackResult<CrackSummary> {
        self.handle
            .join()
            .map_err(|_| CrackError::Panicked)?
    }

    /// Blocks until an event is received.
    /// Returns `None` if the run is over.
    pub fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().ok()
    }
}
