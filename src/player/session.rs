use crate::partition::PartitionedTrack;
use crate::transition::Strategy;

/// Where the playback loop is within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    PlayingPre,
    PlayingSampleAndAnalyzing,
    AwaitingHandoff,
    PlayingTransition,
    Stopped,
}

/// The track being played and how much of its `pre_transition` was already
/// heard inside the transition that introduced it.
#[derive(Debug, Clone)]
pub struct CurrentTrack {
    pub track: PartitionedTrack,
    pub resume_offset: usize,
}

/// Playback state owned by the control thread.
#[derive(Debug)]
pub struct Session {
    pub current: Option<CurrentTrack>,
    /// The track picked for the next cycle, if any.
    pub next: Option<String>,
    pub is_playing: bool,
    pub state: PlayerState,
    /// Last track that failed to load; random picks avoid it.
    pub last_failed: Option<String>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            current: None,
            next: None,
            is_playing: false,
            state: PlayerState::Idle,
            last_failed: None,
        }
    }
}

/// Progress notifications from the playback loop.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    StateChanged(PlayerState),
    TrackStarted { id: String, resume_offset: usize },
    MoodSampled(f64),
    NextSelected { id: String, mood: f64 },
    TransitionPlayed {
        from: String,
        to: String,
        strategy: Strategy,
        samples: usize,
    },
    CycleFailed { reason: String },
}
