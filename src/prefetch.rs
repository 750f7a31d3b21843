use crate::partition::{PartitionError, PartitionedTrack, Partitioner};
use crossbeam_channel::{Receiver, Sender};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PrefetchError {
    #[error("Mood task ended without selecting a track")]
    NoSelection,
    #[error("Failed to prepare {id}: {source}")]
    Partition {
        id: String,
        #[source]
        source: PartitionError,
    },
}

impl PrefetchError {
    /// The track that failed to load, if one was selected.
    pub fn track_id(&self) -> Option<&str> {
        match self {
            Self::NoSelection => None,
            Self::Partition { id, .. } => Some(id),
        }
    }
}

pub type Handoff = Result<PartitionedTrack, PrefetchError>;

/// Loads and partitions the next track once it has been selected.
#[derive(Clone)]
pub struct Prefetcher {
    partitioner: Partitioner,
}

impl Prefetcher {
    pub fn new(partitioner: Partitioner) -> Self {
        Self { partitioner }
    }

    /// Block until a selection arrives, prepare it, and hand it off. Nothing
    /// is loaded before the selection; a dropped selection sender hands off
    /// [`PrefetchError::NoSelection`].
    pub fn run(&self, selection: Receiver<String>, handoff: Sender<Handoff>) {
        let result = match selection.recv() {
            Ok(id) => {
                log::info!("Prefetching {id}");
                self.partitioner
                    .partition(&id)
                    .map_err(|source| PrefetchError::Partition { id, source })
            }
            Err(_) => Err(PrefetchError::NoSelection),
        };

        if let Err(e) = &result {
            log::warn!("Prefetch failed: {e}");
        }
        if handoff.send(result).is_err() {
            log::debug!("Handoff receiver dropped");
        }
    }
}
