//! The playback loop: plays the current track region by region while a mood
//! task and a prefetch task prepare the next one, then plays a synthesized
//! transition and rotates.

pub mod session;

pub use session::{CurrentTrack, PlayerEvent, PlayerState, Session};

use crate::audio::output::{AudioSink, OutputError};
use crate::mood::sampler::MoodSampler;
use crate::mood::{MoodSettings, MoodSource};
use crate::partition::{PartitionedTrack, Partitioner};
use crate::prefetch::{Handoff, PrefetchError, Prefetcher};
use crate::selector::{Catalog, SelectError, select};
use crate::stop::StopSignal;
use crate::transition::TransitionSynthesizer;
use crossbeam_channel::{Sender, bounded};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("Cannot start playback: {0}")]
    Catalog(#[from] SelectError),
    #[error("Audio output failed: {0}")]
    Output(#[from] OutputError),
    #[error("Failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Loop-level settings that are not owned by a collaborator.
#[derive(Debug, Clone)]
pub struct PlayerSettings {
    pub mood: MoodSettings,
    /// Pause before retrying after a track fails to load.
    pub retry_backoff: Duration,
    /// Seed for random track picks. Random when unset.
    pub seed: Option<u64>,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            mood: MoodSettings::default(),
            retry_backoff: Duration::from_millis(500),
            seed: None,
        }
    }
}

/// Everything the loop talks to.
pub struct PlayerParts {
    pub catalog: Arc<Catalog>,
    pub partitioner: Partitioner,
    pub mood: Arc<dyn MoodSource>,
    pub synthesizer: TransitionSynthesizer,
    pub sink: Box<dyn AudioSink>,
}

pub struct Player {
    catalog: Arc<Catalog>,
    partitioner: Partitioner,
    mood: Arc<dyn MoodSource>,
    synthesizer: TransitionSynthesizer,
    sink: Box<dyn AudioSink>,
    settings: PlayerSettings,
    stop: StopSignal,
    rng: StdRng,
    events: Option<Sender<PlayerEvent>>,
    session: Session,
}

/// Result of the mood task: the averaged mood and the track it selected.
type MoodOutcome = Option<(f64, String)>;

impl Player {
    /// Fails if the catalog is empty.
    pub fn new(parts: PlayerParts, settings: PlayerSettings, stop: StopSignal) -> Result<Self, PlayerError> {
        if parts.catalog.is_empty() {
            return Err(SelectError::EmptyCatalog.into());
        }
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            catalog: parts.catalog,
            partitioner: parts.partitioner,
            mood: parts.mood,
            synthesizer: parts.synthesizer,
            sink: parts.sink,
            settings,
            stop,
            rng,
            events: None,
            session: Session::default(),
        })
    }

    /// Send progress events to `events`. Use an unbounded channel; events are
    /// dropped if the receiver goes away.
    pub fn with_events(mut self, events: Sender<PlayerEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Play until stop is requested.
    pub fn run(&mut self) -> Result<(), PlayerError> {
        self.run_cycles(None)
    }

    /// Play at most `limit` cycles (unbounded when `None`), or until stop.
    pub fn run_cycles(&mut self, limit: Option<usize>) -> Result<(), PlayerError> {
        self.session.is_playing = true;
        let mut cycles = 0usize;
        let result = loop {
            if self.stop.is_requested() || limit.is_some_and(|n| cycles >= n) {
                break Ok(());
            }
            if let Err(e) = self.run_cycle() {
                break Err(e);
            }
            cycles += 1;
        };
        self.session.is_playing = false;
        self.set_state(PlayerState::Stopped);
        log::info!("Playback stopped after {cycles} cycles");
        result
    }

    fn emit(&self, event: PlayerEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn set_state(&mut self, state: PlayerState) {
        if self.session.state != state {
            log::debug!("{:?} -> {:?}", self.session.state, state);
            self.session.state = state;
            self.emit(PlayerEvent::StateChanged(state));
        }
    }

    fn fail_cycle(&mut self, reason: String) {
        log::warn!("{reason}");
        self.emit(PlayerEvent::CycleFailed { reason });
    }

    /// Pick and load a track when there is no current one. Returns `false` if
    /// loading failed and the cycle should end.
    fn ensure_current(&mut self) -> Result<bool, PlayerError> {
        if self.session.current.is_some() {
            return Ok(true);
        }
        // Announced on every attempt so retries are visible
        self.session.state = PlayerState::Idle;
        self.emit(PlayerEvent::StateChanged(PlayerState::Idle));

        let exclude = self.session.last_failed.as_deref();
        let id = self.catalog.random_pick(&mut self.rng, exclude)?.id.clone();
        log::info!("Starting with {id}");

        match self.partitioner.partition(&id) {
            Ok(track) => {
                self.session.last_failed = None;
                self.session.current = Some(CurrentTrack {
                    track,
                    resume_offset: 0,
                });
                Ok(true)
            }
            Err(e) => {
                self.session.last_failed = Some(id.clone());
                self.fail_cycle(format!("Failed to load {id}: {e}"));
                self.stop.sleep(self.settings.retry_backoff);
                Ok(false)
            }
        }
    }

    fn spawn_mood_task(
        &self,
        duration: Duration,
        selection: Sender<String>,
    ) -> Result<JoinHandle<MoodOutcome>, PlayerError> {
        let mut sampler = MoodSampler::new(self.mood.clone(), &self.settings.mood);
        let catalog = self.catalog.clone();
        let stop = self.stop.clone();

        std::thread::Builder::new()
            .name("mood-sampler".into())
            .spawn(move || {
                let mood = sampler.sample(duration, &stop);
                if stop.is_requested() {
                    return None;
                }
                let id = select(mood, &catalog).ok()?.id.clone();
                log::info!("Mood {mood:.3} selects {id}");
                // Dropping the sender without a selection tells the prefetcher to give up
                selection.send(id.clone()).ok()?;
                Some((mood, id))
            })
            .map_err(|source| PlayerError::Spawn {
                name: "mood-sampler",
                source,
            })
    }

    fn spawn_prefetch_task(
        &self,
        selection: crossbeam_channel::Receiver<String>,
        handoff: Sender<Handoff>,
    ) -> Result<JoinHandle<()>, PlayerError> {
        let prefetcher = Prefetcher::new(self.partitioner.clone());
        std::thread::Builder::new()
            .name("prefetch".into())
            .spawn(move || prefetcher.run(selection, handoff))
            .map_err(|source| PlayerError::Spawn {
                name: "prefetch",
                source,
            })
    }

    /// One full cycle: pre region, sample region with mood and prefetch tasks,
    /// handoff, transition, rotation.
    fn run_cycle(&mut self) -> Result<(), PlayerError> {
        if !self.ensure_current()? {
            return Ok(());
        }
        let Some(current) = self.session.current.take() else {
            return Ok(());
        };
        let CurrentTrack {
            track,
            resume_offset,
        } = current;
        let sr = track.sample_rate;

        self.emit(PlayerEvent::TrackStarted {
            id: track.id.clone(),
            resume_offset,
        });

        self.set_state(PlayerState::PlayingPre);
        let start = resume_offset.min(track.pre_transition.len());
        self.sink.play_blocking(&track.pre_transition[start..], sr)?;
        if self.stop.is_requested() {
            return Ok(());
        }

        self.set_state(PlayerState::PlayingSampleAndAnalyzing);
        let (selection_tx, selection_rx) = bounded::<String>(1);
        let (handoff_tx, handoff_rx) = bounded::<Handoff>(1);
        let sample_duration = Duration::from_secs_f64(track.region_secs(&track.sample));
        let mood_task = self.spawn_mood_task(sample_duration, selection_tx)?;
        let prefetch_task = self.spawn_prefetch_task(selection_rx, handoff_tx)?;

        let played = self.sink.play_blocking(&track.sample, sr);

        self.set_state(PlayerState::AwaitingHandoff);
        let handoff = handoff_rx.recv().unwrap_or(Err(PrefetchError::NoSelection));
        let outcome = mood_task.join().unwrap_or_else(|_| {
            log::warn!("mood-sampler thread panicked");
            None
        });
        if prefetch_task.join().is_err() {
            log::warn!("prefetch thread panicked");
        }
        played?;

        if let Some((mood, id)) = outcome {
            self.emit(PlayerEvent::MoodSampled(mood));
            self.emit(PlayerEvent::NextSelected { id: id.clone(), mood });
            self.session.next = Some(id);
        }
        if self.stop.is_requested() {
            return Ok(());
        }

        let next = match handoff {
            Ok(next) => next,
            Err(e) => {
                self.session.last_failed = e.track_id().map(str::to_string);
                self.session.next = None;
                self.fail_cycle(format!("Skipping transition: {e}"));
                return Ok(());
            }
        };

        self.set_state(PlayerState::PlayingTransition);
        let resume_offset = self.play_transition(&track, &next)?;

        self.session.next = None;
        self.session.current = Some(CurrentTrack {
            track: next,
            resume_offset,
        });
        Ok(())
    }

    /// Mix the head of the outgoing `post_transition` into the head of the
    /// incoming `pre_transition` and play it. Returns how many incoming
    /// samples the transition used.
    fn play_transition(
        &mut self,
        current: &PartitionedTrack,
        next: &PartitionedTrack,
    ) -> Result<usize, PlayerError> {
        let window = self.synthesizer.window_len();
        let head = self.synthesizer.incoming_len();
        let outgoing = &current.post_transition[..window.min(current.post_transition.len())];
        let incoming = &next.pre_transition[..head.min(next.pre_transition.len())];

        match self.synthesizer.synthesize_or_fallback(outgoing, incoming) {
            Ok((mixed, strategy)) => {
                log::info!(
                    "{} -> {} via {} ({:.2}s)",
                    current.id,
                    next.id,
                    strategy,
                    mixed.len() as f64 / current.sample_rate as f64
                );
                self.sink.play_blocking(&mixed, current.sample_rate)?;
                self.emit(PlayerEvent::TransitionPlayed {
                    from: current.id.clone(),
                    to: next.id.clone(),
                    strategy,
                    samples: mixed.len(),
                });
                Ok(incoming.len())
            }
            Err(e) => {
                self.fail_cycle(format!("No transition from {} to {}: {e}", current.id, next.id));
                Ok(0)
            }
        }
    }
}
