use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use moodmix::analyzer::beats::{BeatSettings, analyze_beats};
use moodmix::analyzer::dtw::{align_with, cosine_distance};
use moodmix::analyzer::features::chroma_pair;
use moodmix::analyzer::score::{PartyScore, ScoreSettings, party_score};
use moodmix::audio::output::{AudioSink, ClockSink, TeeSink, WavSink};
use moodmix::audio::{FileLoader, TrackLoader};
use moodmix::config::AppConfig;
use moodmix::mood::monitor::MoodMonitor;
use moodmix::mood::{ConstantMoodSource, HttpMoodSource, MoodSource};
use moodmix::partition::Partitioner;
use moodmix::player::{Player, PlayerEvent, PlayerParts, PlayerState};
use moodmix::selector::select;
use moodmix::stop::StopSignal;
use moodmix::transition::{Strategy, TransitionSynthesizer};
use serde::Serialize;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "moodmix", version, about = "Mood-driven continuous music player")]
struct Cli {
    /// Path to the config file (defaults to the XDG config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play the catalog continuously, following the mood signal
    Play {
        /// Use a fixed mood instead of polling the mood endpoint
        #[arg(long)]
        mood: Option<f64>,

        /// Transition strategy (overrides the config file)
        #[arg(long, value_enum)]
        strategy: Option<Strategy>,

        /// Stop after this many cycles
        #[arg(long)]
        cycles: Option<usize>,

        /// Also record the mix to a WAV file
        #[arg(long)]
        record: Option<PathBuf>,

        /// Keep time without opening the sound card
        #[arg(long)]
        headless: bool,
    },

    /// Render a single transition from the end of one track into another
    Transition {
        /// Outgoing track
        from: String,

        /// Incoming track
        to: String,

        /// Output WAV file
        #[arg(short, long)]
        output: PathBuf,

        /// Transition strategy (overrides the config file)
        #[arg(long, value_enum)]
        strategy: Option<Strategy>,
    },

    /// Align two tracks with DTW over chroma features
    Align {
        a: String,
        b: String,

        /// Print the alignment as JSON
        #[arg(long)]
        json: bool,
    },

    /// Estimate tempo and beat positions of a track
    Beats {
        file: String,
    },

    /// Score tracks by tempo and loudness to pick catalog energies
    Score {
        files: Vec<String>,

        /// Print the scores as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show which catalog track a mood value selects
    Select {
        mood: f64,
    },
}

#[derive(Serialize)]
struct AlignmentSummary {
    a: String,
    b: String,
    frames_a: usize,
    frames_b: usize,
    cost: f64,
    path: Vec<(usize, usize)>,
}

#[derive(Serialize)]
struct ScoredTrack<'a> {
    id: &'a str,
    #[serde(flatten)]
    score: &'a PartyScore,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Explicit --config must load; the default location falls back to defaults
    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load(),
    };
    config.validate()?;

    let sample_rate = config.sample_rate;
    let loader: Arc<dyn TrackLoader> = Arc::new(FileLoader::new(config.music_dir.clone()));

    match cli.command {
        Commands::Play { mood, strategy, cycles, record, headless } => {
            let catalog = Arc::new(config.catalog());
            if catalog.is_empty() {
                anyhow::bail!("No tracks to play. Add [[tracks]] entries to the config file.");
            }

            let mut transition = config.transition.clone();
            if let Some(strategy) = strategy {
                transition.strategy = strategy;
            }
            let synthesizer = TransitionSynthesizer::new(transition, sample_rate, loader.as_ref())
                .context("Failed to load scratch effect")?;

            let stop = StopSignal::new();
            let mood_source: Arc<dyn MoodSource> = match mood {
                Some(value) => {
                    log::info!("Using fixed mood {value}");
                    Arc::new(ConstantMoodSource(value.clamp(0.0, 1.0)))
                }
                None => {
                    log::info!("Polling mood from {}", config.mood.url);
                    let http = Arc::new(HttpMoodSource::new(config.mood.url.clone()));
                    let interval = Duration::from_millis(config.mood.poll_interval_ms);
                    Arc::new(MoodMonitor::spawn(http, interval).context("Failed to start mood monitor")?)
                }
            };

            let output = output_sink(headless, &stop)?;
            let sink: Box<dyn AudioSink> = match &record {
                Some(path) => {
                    let wav = WavSink::create(path, sample_rate)
                        .with_context(|| format!("Failed to create {}", path.display()))?;
                    Box::new(TeeSink::new(vec![Box::new(wav), output]))
                }
                None => output,
            };

            let parts = PlayerParts {
                catalog,
                partitioner: Partitioner::new(loader.clone(), sample_rate, config.partition),
                mood: mood_source,
                synthesizer,
                sink,
            };
            let (events_tx, events_rx) = crossbeam_channel::unbounded();
            let mut player = Player::new(parts, config.player_settings(), stop.clone())?
                .with_events(events_tx);

            watch_stdin(stop.clone())?;
            let printer = std::thread::Builder::new()
                .name("events".into())
                .spawn(move || {
                    for event in events_rx {
                        print_event(&event);
                    }
                })
                .context("Failed to spawn event printer")?;

            println!("Playing. Type 'stop' to quit.");
            let result = player.run_cycles(cycles);
            // Dropping the player closes the event channel and finalizes any recording
            drop(player);
            let _ = printer.join();
            result.context("Playback failed")?;

            if let Some(path) = record {
                println!("Recorded mix to {}", path.display());
            }
        }

        Commands::Transition { from, to, output, strategy } => {
            let partitioner = Partitioner::new(loader.clone(), sample_rate, config.partition);
            let outgoing = partitioner.partition(&from).with_context(|| format!("Failed to load {from}"))?;
            let incoming = partitioner.partition(&to).with_context(|| format!("Failed to load {to}"))?;

            let mut transition = config.transition.clone();
            if let Some(strategy) = strategy {
                transition.strategy = strategy;
            }
            let strategy = transition.strategy;
            let mut synthesizer = TransitionSynthesizer::new(transition, sample_rate, loader.as_ref())
                .context("Failed to load scratch effect")?;
            let window = synthesizer.window_len();
            let head_len = synthesizer.incoming_len();
            let tail = &outgoing.post_transition[..window.min(outgoing.post_transition.len())];
            let head = &incoming.pre_transition[..head_len.min(incoming.pre_transition.len())];

            let mixed = synthesizer
                .synthesize(strategy, tail, head)
                .with_context(|| format!("{strategy} transition failed"))?;

            let mut wav = WavSink::create(&output, sample_rate)
                .with_context(|| format!("Failed to create {}", output.display()))?;
            wav.play_blocking(&mixed, sample_rate)?;
            wav.finalize()?;
            println!(
                "Wrote {:.2}s {} transition to {}",
                mixed.len() as f64 / sample_rate as f64,
                strategy,
                output.display()
            );
        }

        Commands::Align { a, b, json } => {
            let track_a = loader.load(&a, sample_rate).with_context(|| format!("Failed to load {a}"))?;
            let track_b = loader.load(&b, sample_rate).with_context(|| format!("Failed to load {b}"))?;

            let features = config.transition.features();
            let (chroma_a, chroma_b) = chroma_pair(&track_a.samples, &track_b.samples, sample_rate, features);
            let alignment = align_with(
                &chroma_a.frames,
                &chroma_b.frames,
                cosine_distance,
                config.transition.alignment(),
            )?;

            let summary = AlignmentSummary {
                a,
                b,
                frames_a: chroma_a.len(),
                frames_b: chroma_b.len(),
                cost: alignment.cost.total_cost(),
                path: alignment.path,
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                let hop_secs = features.hop_length as f64 / sample_rate as f64;
                println!("{:<10} {}", "A", summary.a);
                println!("{:<10} {}", "B", summary.b);
                println!("{:<10} {} x {}", "Frames", summary.frames_a, summary.frames_b);
                println!("{:<10} {:.3}", "Cost", summary.cost);
                println!(
                    "{:<10} {:.3} per step over {} steps",
                    "Mean",
                    summary.cost / summary.path.len().max(1) as f64,
                    summary.path.len()
                );
                if let (Some(first), Some(last)) = (summary.path.first(), summary.path.last()) {
                    println!(
                        "{:<10} {:.1}s..{:.1}s -> {:.1}s..{:.1}s",
                        "Span",
                        first.0 as f64 * hop_secs,
                        last.0 as f64 * hop_secs,
                        first.1 as f64 * hop_secs,
                        last.1 as f64 * hop_secs
                    );
                }
            }
        }

        Commands::Beats { file } => {
            let track = loader.load(&file, sample_rate).with_context(|| format!("Failed to load {file}"))?;
            let analysis = analyze_beats(
                &track.samples,
                sample_rate,
                config.transition.features(),
                &BeatSettings::default(),
            );
            match analysis.tempo_bpm {
                Some(bpm) => println!("Tempo: {bpm:.1} BPM"),
                None => println!("Tempo: unknown"),
            }
            println!("Beats: {}", analysis.beat_times.len());
            for (i, t) in analysis.beat_times.iter().enumerate() {
                println!("{:>5} {:>9.3}s", i + 1, t);
            }
        }

        Commands::Score { files, json } => {
            if files.is_empty() {
                anyhow::bail!("No files to score");
            }
            let features = config.transition.features();
            let settings = ScoreSettings::default();
            let results: Vec<(String, Result<PartyScore, String>)> = {
                use rayon::prelude::*;
                files
                    .par_iter()
                    .map(|file| {
                        let score = loader
                            .load(file, sample_rate)
                            .map(|track| party_score(&track.samples, sample_rate, features, &settings))
                            .map_err(|e| e.to_string());
                        (file.clone(), score)
                    })
                    .collect()
            };

            if json {
                let scored: Vec<ScoredTrack> = results
                    .iter()
                    .filter_map(|(file, r)| r.as_ref().ok().map(|s| ScoredTrack { id: file, score: s }))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&scored)?);
            } else {
                println!("{:<40} {:>7} {:>7} {:>6}", "Track", "BPM", "RMS", "Score");
                println!("{}", "-".repeat(63));
                for (file, result) in &results {
                    match result {
                        Ok(s) => println!(
                            "{:<40} {:>7} {:>7.3} {:>6}",
                            file,
                            s.tempo_bpm.map_or("-".to_string(), |b| format!("{b:.1}")),
                            s.mean_rms,
                            s.percent()
                        ),
                        Err(e) => println!("{file:<40} failed: {e}"),
                    }
                }
                println!();
                println!("# Catalog entries");
                for (file, result) in &results {
                    if let Ok(s) = result {
                        println!("[[tracks]]\nid = {file:?}\nenergy = {:.2}\n", s.score);
                    }
                }
            }
        }

        Commands::Select { mood } => {
            let catalog = config.catalog();
            let entry = select(mood, &catalog).context("Nothing to select from")?;
            println!("{:<30} {:>6}", "Track", "Energy");
            println!("{}", "-".repeat(37));
            for e in catalog.entries() {
                let marker = if e.id == entry.id { "*" } else { " " };
                println!("{marker}{:<29} {:>6.2}", e.id, e.energy);
            }
            println!();
            println!("Mood {mood:.2} selects {}", entry.id);
        }
    }

    Ok(())
}

/// The sound card, or a wall-clock sink when headless.
fn output_sink(headless: bool, stop: &StopSignal) -> Result<Box<dyn AudioSink>> {
    #[cfg(feature = "device")]
    if !headless {
        let device = moodmix::audio::device::DeviceSink::open(stop.clone())
            .context("Failed to open audio device (use --headless to play without one)")?;
        return Ok(Box::new(device));
    }
    #[cfg(not(feature = "device"))]
    if !headless {
        log::warn!("Built without the `device` feature, playing headless");
    }
    Ok(Box::new(ClockSink::new(stop.clone())))
}

/// Request stop when a `stop`, `quit` or `exit` line arrives on stdin.
fn watch_stdin(stop: StopSignal) -> Result<()> {
    std::thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                match line.trim() {
                    "stop" | "quit" | "exit" => {
                        println!("Stopping after the current segment...");
                        stop.request();
                        break;
                    }
                    "" => {}
                    other => println!("Unknown command: {other} (try 'stop')"),
                }
            }
        })
        .context("Failed to spawn stdin watcher")?;
    Ok(())
}

fn print_event(event: &PlayerEvent) {
    match event {
        PlayerEvent::TrackStarted { id, resume_offset } if *resume_offset > 0 => {
            println!("Now playing: {id} (continuing from transition)")
        }
        PlayerEvent::TrackStarted { id, .. } => println!("Now playing: {id}"),
        PlayerEvent::MoodSampled(mood) => println!("  mood {mood:.3}"),
        PlayerEvent::NextSelected { id, .. } => println!("  up next: {id}"),
        PlayerEvent::TransitionPlayed { from, to, strategy, .. } => {
            println!("  {from} -> {to} ({strategy})")
        }
        PlayerEvent::CycleFailed { reason } => println!("  skipped: {reason}"),
        PlayerEvent::StateChanged(PlayerState::Stopped) => println!("Stopped."),
        PlayerEvent::StateChanged(_) => {}
    }
}
