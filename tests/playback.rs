//! End-to-end playback loop tests with in-memory tracks and a recording sink.

use crossbeam_channel::{Receiver, unbounded};
use moodmix::audio::decode::DecodeError;
use moodmix::audio::output::{AudioSink, ClockSink, OutputError};
use moodmix::audio::{Track, TrackLoader};
use moodmix::mood::{ConstantMoodSource, MoodError, MoodSettings, MoodSource};
use moodmix::partition::{PartitionSettings, Partitioner};
use moodmix::player::{Player, PlayerError, PlayerEvent, PlayerParts, PlayerSettings, PlayerState};
use moodmix::selector::{Catalog, CatalogEntry};
use moodmix::stop::StopSignal;
use moodmix::transition::{TransitionSettings, TransitionSynthesizer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const SR: u32 = 1000;
/// One second per track: pre 150, sample 200, post 650 samples.
const TRACK_LEN: usize = 1000;
/// 100 ms transition window.
const WINDOW: usize = 100;

type Log = Arc<Mutex<Vec<String>>>;

/// Tracks are constant tones keyed by id; `broken` fails to decode.
struct MemoryLoader {
    log: Log,
}

impl TrackLoader for MemoryLoader {
    fn load(&self, track_id: &str, target_rate: u32) -> Result<Track, DecodeError> {
        self.log.lock().unwrap().push(format!("load:{track_id}"));
        if track_id == "broken" {
            return Err(DecodeError::UnsupportedFormat(track_id.into()));
        }
        Ok(Track {
            id: track_id.into(),
            samples: vec![0.25; TRACK_LEN],
            sample_rate: target_rate,
        })
    }
}

/// Records segment lengths without waiting.
struct RecordingSink {
    log: Log,
}

impl AudioSink for RecordingSink {
    fn play(&mut self, samples: &[f32], _sample_rate: u32) -> Result<(), OutputError> {
        self.log.lock().unwrap().push(format!("play:{}", samples.len()));
        Ok(())
    }

    fn play_blocking(&mut self, samples: &[f32], sample_rate: u32) -> Result<(), OutputError> {
        self.play(samples, sample_rate)
    }
}

/// Constant mood that logs every poll.
struct LoggedMood {
    mood: f64,
    log: Log,
}

impl MoodSource for LoggedMood {
    fn poll(&self) -> Result<f64, MoodError> {
        self.log.lock().unwrap().push("poll".into());
        Ok(self.mood)
    }
}

fn catalog(entries: &[(&str, f64)]) -> Arc<Catalog> {
    Arc::new(Catalog::new(
        entries.iter().map(|(id, e)| CatalogEntry::new(*id, *e)).collect(),
    ))
}

fn settings() -> PlayerSettings {
    PlayerSettings {
        mood: MoodSettings {
            poll_interval_ms: 10,
            ..Default::default()
        },
        retry_backoff: Duration::from_millis(10),
        seed: Some(11),
    }
}

/// Fails its first load, whatever the track.
struct FlakyLoader {
    inner: MemoryLoader,
    failed: AtomicBool,
}

impl TrackLoader for FlakyLoader {
    fn load(&self, track_id: &str, target_rate: u32) -> Result<Track, DecodeError> {
        if !self.failed.swap(true, Ordering::SeqCst) {
            self.inner.log.lock().unwrap().push(format!("fail:{track_id}"));
            return Err(DecodeError::UnsupportedFormat(track_id.into()));
        }
        self.inner.load(track_id, target_rate)
    }
}

fn build(
    catalog: Arc<Catalog>,
    mood: Arc<dyn MoodSource>,
    sink: Box<dyn AudioSink>,
    log: &Log,
    stop: StopSignal,
) -> Result<(Player, Receiver<PlayerEvent>), PlayerError> {
    let loader: Arc<dyn TrackLoader> = Arc::new(MemoryLoader { log: log.clone() });
    build_with(loader, catalog, mood, sink, stop)
}

fn build_with(
    loader: Arc<dyn TrackLoader>,
    catalog: Arc<Catalog>,
    mood: Arc<dyn MoodSource>,
    sink: Box<dyn AudioSink>,
    stop: StopSignal,
) -> Result<(Player, Receiver<PlayerEvent>), PlayerError> {
    let partition = PartitionSettings {
        trim_secs: 0.0,
        ..Default::default()
    };
    let transition = TransitionSettings {
        window_secs: WINDOW as f64 / SR as f64,
        crossfade_secs: WINDOW as f64 / SR as f64,
        seed: Some(5),
        ..Default::default()
    };
    let synthesizer = TransitionSynthesizer::new(transition, SR, loader.as_ref()).unwrap();

    let parts = PlayerParts {
        catalog,
        partitioner: Partitioner::new(loader, SR, partition),
        mood,
        synthesizer,
        sink,
    };
    let (tx, rx) = unbounded();
    let player = Player::new(parts, settings(), stop)?.with_events(tx);
    Ok((player, rx))
}

fn recording(log: &Log) -> Box<dyn AudioSink> {
    Box::new(RecordingSink { log: log.clone() })
}

#[test]
fn test_constant_low_mood_always_selects_lowest_energy() {
    let log: Log = Arc::default();
    let (mut player, events) = build(
        catalog(&[("mid", 0.5), ("low", 0.1), ("high", 0.9)]),
        Arc::new(ConstantMoodSource(0.2)),
        recording(&log),
        &log,
        StopSignal::new(),
    )
    .unwrap();

    player.run_cycles(Some(3)).unwrap();
    drop(player);
    let events: Vec<PlayerEvent> = events.iter().collect();

    let selected: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            PlayerEvent::NextSelected { id, .. } => Some(id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(selected, vec!["low", "low", "low"]);

    let transitions = events
        .iter()
        .filter(|e| matches!(e, PlayerEvent::TransitionPlayed { to, .. } if to == "low"))
        .count();
    assert_eq!(transitions, 3);
    assert_eq!(events.last(), Some(&PlayerEvent::StateChanged(PlayerState::Stopped)));
}

#[test]
fn test_cycle_walks_states_in_order() {
    let log: Log = Arc::default();
    let (mut player, events) = build(
        catalog(&[("a", 0.3), ("b", 0.7)]),
        Arc::new(ConstantMoodSource(0.7)),
        recording(&log),
        &log,
        StopSignal::new(),
    )
    .unwrap();

    player.run_cycles(Some(1)).unwrap();
    drop(player);
    let states: Vec<PlayerState> = events
        .iter()
        .filter_map(|e| match e {
            PlayerEvent::StateChanged(s) => Some(s),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            PlayerState::Idle,
            PlayerState::PlayingPre,
            PlayerState::PlayingSampleAndAnalyzing,
            PlayerState::AwaitingHandoff,
            PlayerState::PlayingTransition,
            PlayerState::Stopped,
        ]
    );
}

#[test]
fn test_next_track_resumes_after_transition_window() {
    let log: Log = Arc::default();
    let (mut player, events) = build(
        catalog(&[("a", 0.3)]),
        Arc::new(ConstantMoodSource(0.3)),
        recording(&log),
        &log,
        StopSignal::new(),
    )
    .unwrap();

    player.run_cycles(Some(2)).unwrap();
    drop(player);

    let offsets: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            PlayerEvent::TrackStarted { resume_offset, .. } => Some(resume_offset),
            _ => None,
        })
        .collect();
    assert_eq!(offsets, vec![0, WINDOW]);

    let plays: Vec<String> = log
        .lock()
        .unwrap()
        .iter()
        .filter(|entry| entry.starts_with("play:"))
        .cloned()
        .collect();
    // pre, sample, transition; then the rest of pre, sample, transition
    assert_eq!(
        plays,
        vec!["play:150", "play:200", "play:100", "play:50", "play:200", "play:100"]
    );
}

#[test]
fn test_prefetch_waits_for_mood_sampling() {
    let log: Log = Arc::default();
    let mood = Arc::new(LoggedMood {
        mood: 0.8,
        log: log.clone(),
    });
    let (mut player, _events) = build(
        catalog(&[("a", 0.2), ("b", 0.8)]),
        mood,
        recording(&log),
        &log,
        StopSignal::new(),
    )
    .unwrap();

    player.run_cycles(Some(2)).unwrap();
    drop(player);

    let log = log.lock().unwrap();
    let loads: Vec<usize> = log
        .iter()
        .enumerate()
        .filter(|(_, e)| e.starts_with("load:"))
        .map(|(i, _)| i)
        .collect();
    // The initial pick plus one prefetch per cycle
    assert_eq!(loads.len(), 3);

    for &at in &loads[1..] {
        assert_eq!(log[at], "load:b");
        assert_eq!(log[at - 1], "poll", "prefetch must follow the last poll");
        let after: Vec<&String> = log[at + 1..]
            .iter()
            .take_while(|e| !e.starts_with("play:"))
            .collect();
        assert!(after.is_empty(), "mood polled after prefetch: {after:?}");
    }
}

#[test]
fn test_failed_prefetch_skips_transition_and_avoids_track() {
    let log: Log = Arc::default();
    let (mut player, events) = build(
        catalog(&[("broken", 0.2), ("ok", 0.8)]),
        Arc::new(ConstantMoodSource(0.2)),
        recording(&log),
        &log,
        StopSignal::new(),
    )
    .unwrap();

    player.run_cycles(Some(4)).unwrap();
    drop(player);
    let events: Vec<PlayerEvent> = events.iter().collect();

    assert!(events.iter().any(|e| matches!(e, PlayerEvent::CycleFailed { .. })));
    for e in &events {
        match e {
            PlayerEvent::TrackStarted { id, .. } => assert_eq!(id, "ok"),
            PlayerEvent::TransitionPlayed { to, .. } => assert_ne!(to, "broken"),
            _ => {}
        }
    }
}

#[test]
fn test_failed_initial_load_retries_with_another_track() {
    let log: Log = Arc::default();
    let loader = Arc::new(FlakyLoader {
        inner: MemoryLoader { log: log.clone() },
        failed: AtomicBool::new(false),
    });
    let (mut player, events) = build_with(
        loader,
        catalog(&[("a", 0.3), ("b", 0.7)]),
        Arc::new(ConstantMoodSource(0.3)),
        recording(&log),
        StopSignal::new(),
    )
    .unwrap();

    player.run_cycles(Some(2)).unwrap();
    drop(player);
    let events: Vec<PlayerEvent> = events.iter().collect();

    let failed = log.lock().unwrap()[0].strip_prefix("fail:").unwrap().to_string();
    assert_eq!(events[0], PlayerEvent::StateChanged(PlayerState::Idle));
    assert!(matches!(&events[1], PlayerEvent::CycleFailed { reason } if reason.contains(&failed)));
    // The retry announces Idle again, then starts the other track
    assert_eq!(events[2], PlayerEvent::StateChanged(PlayerState::Idle));
    match &events[3] {
        PlayerEvent::TrackStarted { id, resume_offset } => {
            assert_ne!(*id, failed);
            assert_eq!(*resume_offset, 0);
        }
        other => panic!("expected TrackStarted, got {other:?}"),
    }
}

#[test]
fn test_empty_catalog_is_rejected() {
    let log: Log = Arc::default();
    let result = build(
        catalog(&[]),
        Arc::new(ConstantMoodSource(0.5)),
        recording(&log),
        &log,
        StopSignal::new(),
    );
    assert!(matches!(result, Err(PlayerError::Catalog(_))));
}

#[test]
fn test_stop_interrupts_real_time_playback() {
    let log: Log = Arc::default();
    let stop = StopSignal::new();
    let (mut player, _events) = build(
        catalog(&[("a", 0.5)]),
        Arc::new(ConstantMoodSource(0.5)),
        Box::new(ClockSink::new(stop.clone())),
        &log,
        stop.clone(),
    )
    .unwrap();

    let remote = stop.clone();
    let stopper = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(80));
        remote.request();
    });

    let start = Instant::now();
    player.run().unwrap();
    stopper.join().unwrap();

    assert!(start.elapsed() < Duration::from_millis(600), "{:?}", start.elapsed());
    assert_eq!(player.session().state, PlayerState::Stopped);
    assert!(!player.session().is_playing);
}
