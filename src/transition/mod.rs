//! Transition synthesis between the tail of one track and the head of the next.
//!
//! Every strategy is a free function over plain sample slices so it can be
//! exercised on its own; [`TransitionSynthesizer`] owns the settings, the
//! scratch effect and the RNG, and dispatches by [`Strategy`].

pub mod crossfade;
pub mod reverb;
pub mod scratch;
pub mod splice;

use crate::analyzer::beats::BeatSettings;
use crate::analyzer::dtw::{AlignmentError, AlignmentOptions, DEFAULT_CELL_CEILING};
use crate::analyzer::features::FeatureSettings;
use crate::audio::decode::DecodeError;
use crate::audio::{TrackLoader, secs_to_samples};
use clap::ValueEnum;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransitionError {
    #[error("Not enough audio for the transition: needed {needed} samples, have {available}")]
    InsufficientLength { needed: usize, available: usize },
    #[error("Alignment failed: {0}")]
    Alignment(#[from] AlignmentError),
    #[error("No beat candidates outside the {guard_secs}s guard")]
    NoBeatCandidates { guard_secs: f64 },
}

/// Blend algorithm used for a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    Linear,
    DtwCrossfade,
    ReverbTail,
    BeatSplice,
    Scratch,
    ScratchCrossfade,
}

impl Strategy {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::DtwCrossfade => "dtw_crossfade",
            Self::ReverbTail => "reverb_tail",
            Self::BeatSplice => "beat_splice",
            Self::Scratch => "scratch",
            Self::ScratchCrossfade => "scratch_crossfade",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Reverb impulse-response shape.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ReverbSettings {
    pub decay_secs: f64,
    pub room_size: f64,
    pub damping: f64,
}

impl Default for ReverbSettings {
    fn default() -> Self {
        Self {
            decay_secs: 3.0,
            room_size: 0.8,
            damping: 0.4,
        }
    }
}

/// Scratch effect placement and source.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScratchSettings {
    /// Fraction of the outgoing segment kept before the cut.
    pub position: f64,
    pub fade_ms: f64,
    /// Overlap length for the scratch crossfade variant.
    pub overlap_secs: f64,
    /// Audio file holding the effect. Synthesized when unset.
    pub effect_path: Option<PathBuf>,
    pub effect_max_secs: f64,
}

impl Default for ScratchSettings {
    fn default() -> Self {
        Self {
            position: 0.75,
            fade_ms: 100.0,
            overlap_secs: 1.5,
            effect_path: None,
            effect_max_secs: 3.0,
        }
    }
}

/// The `[transition]` config section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransitionSettings {
    pub strategy: Strategy,
    /// Seconds taken from each side of the boundary.
    pub window_secs: f64,
    /// Upper bound on crossfade length for the linear and DTW strategies.
    pub crossfade_secs: f64,
    pub n_fft: usize,
    pub hop_length: usize,
    /// Largest DTW matrix computed in full.
    pub dtw_cell_ceiling: usize,
    pub dtw_band_radius: usize,
    /// Beats closer than this to either end are not splice candidates.
    pub guard_secs: f64,
    pub peak_ceiling: f32,
    pub reverb: ReverbSettings,
    pub scratch: ScratchSettings,
    /// Seed for reverb noise and the synthesized scratch. Random when unset.
    pub seed: Option<u64>,
}

impl Default for TransitionSettings {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            window_secs: 2.0,
            crossfade_secs: 2.0,
            n_fft: 4096,
            hop_length: 1024,
            dtw_cell_ceiling: DEFAULT_CELL_CEILING,
            dtw_band_radius: 64,
            guard_secs: 10.0,
            peak_ceiling: 0.95,
            reverb: ReverbSettings::default(),
            scratch: ScratchSettings::default(),
            seed: None,
        }
    }
}

impl TransitionSettings {
    pub fn features(&self) -> FeatureSettings {
        FeatureSettings {
            n_fft: self.n_fft,
            hop_length: self.hop_length,
        }
    }

    pub fn alignment(&self) -> AlignmentOptions {
        AlignmentOptions {
            cell_ceiling: self.dtw_cell_ceiling,
            band_radius: self.dtw_band_radius,
        }
    }
}

/// Evenly spaced values from `start` to `end`, both inclusive.
pub fn linspace(start: f32, end: f32, n: usize) -> Vec<f32> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f32;
            (0..n)
                .map(|k| if k == n - 1 { end } else { start + step * k as f32 })
                .collect()
        }
    }
}

/// Scale so the largest absolute sample equals `ceiling`. Silence is left alone.
/// The result never exceeds `ceiling`, even by a rounding step.
pub fn peak_normalize(buffer: &mut [f32], ceiling: f32) {
    let peak = buffer.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    if peak > 0.0 {
        let gain = ceiling / peak;
        buffer
            .iter_mut()
            .for_each(|s| *s = (*s * gain).clamp(-ceiling, ceiling));
    }
}

pub fn rms(buffer: &[f32]) -> f32 {
    if buffer.is_empty() {
        return 0.0;
    }
    let sum: f64 = buffer.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / buffer.len() as f64).sqrt() as f32
}

/// Renders transitions with one settings block, scratch effect and RNG.
pub struct TransitionSynthesizer {
    settings: TransitionSettings,
    sample_rate: u32,
    effect: Vec<f32>,
    rng: StdRng,
}

impl TransitionSynthesizer {
    /// Build a synthesizer, loading the scratch effect file through `loader` if
    /// one is configured.
    pub fn new(
        settings: TransitionSettings,
        sample_rate: u32,
        loader: &dyn TrackLoader,
    ) -> Result<Self, DecodeError> {
        let mut rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let max_len = secs_to_samples(settings.scratch.effect_max_secs, sample_rate);
        let effect = match &settings.scratch.effect_path {
            Some(path) => {
                let id = path.to_string_lossy();
                let mut effect = loader.load(&id, sample_rate)?.samples;
                effect.truncate(max_len);
                log::debug!("Loaded scratch effect {} ({} samples)", id, effect.len());
                effect
            }
            None => scratch::synthesize_scratch(&mut rng, sample_rate, settings.scratch.effect_max_secs.min(1.2)),
        };

        Ok(Self {
            settings,
            sample_rate,
            effect,
            rng,
        })
    }

    pub fn settings(&self) -> &TransitionSettings {
        &self.settings
    }

    pub fn strategy(&self) -> Strategy {
        self.settings.strategy
    }

    /// Samples taken from each side of the boundary.
    pub fn window_len(&self) -> usize {
        secs_to_samples(self.settings.window_secs, self.sample_rate)
    }

    /// Samples of the incoming track the configured strategy wants. The
    /// reverb tail rings past the outgoing window, so it takes a longer head
    /// to fade in under the whole decay.
    pub fn incoming_len(&self) -> usize {
        match self.settings.strategy {
            Strategy::ReverbTail => {
                self.window_len() + secs_to_samples(self.settings.reverb.decay_secs, self.sample_rate)
            }
            _ => self.window_len(),
        }
    }

    pub fn synthesize(
        &mut self,
        strategy: Strategy,
        outgoing: &[f32],
        incoming: &[f32],
    ) -> Result<Vec<f32>, TransitionError> {
        let s = &self.settings;
        let sr = self.sample_rate;
        let crossfade_len = secs_to_samples(s.crossfade_secs, sr);

        match strategy {
            Strategy::Linear => crossfade::linear_crossfade(outgoing, incoming, crossfade_len),
            Strategy::DtwCrossfade => crossfade::dtw_crossfade(
                outgoing,
                incoming,
                sr,
                // Leave room for the alignment to span the overlap
                crossfade_len.min(outgoing.len() / 2).min(incoming.len() / 2),
                s.features(),
                s.alignment(),
            ),
            Strategy::ReverbTail => Ok(reverb::reverb_tail_blend(
                outgoing,
                incoming,
                sr,
                &s.reverb,
                s.peak_ceiling,
                &mut self.rng,
            )),
            Strategy::BeatSplice => splice::beat_splice(
                outgoing,
                incoming,
                sr,
                s.guard_secs,
                s.features(),
                &BeatSettings::default(),
                s.peak_ceiling,
            ),
            Strategy::Scratch => Ok(scratch::scratch_insert(
                outgoing,
                incoming,
                &self.effect,
                sr,
                &s.scratch,
            )),
            Strategy::ScratchCrossfade => Ok(scratch::scratch_crossfade(
                outgoing,
                incoming,
                &self.effect,
                sr,
                &s.scratch,
                s.peak_ceiling,
            )),
        }
    }

    /// Synthesize with the configured strategy, falling back to a linear
    /// crossfade if it fails. Returns the mix and the strategy that made it.
    pub fn synthesize_or_fallback(
        &mut self,
        outgoing: &[f32],
        incoming: &[f32],
    ) -> Result<(Vec<f32>, Strategy), TransitionError> {
        let strategy = self.settings.strategy;
        match self.synthesize(strategy, outgoing, incoming) {
            Ok(mixed) => Ok((mixed, strategy)),
            Err(e) if strategy != Strategy::Linear => {
                log::warn!("{strategy} transition failed ({e}), falling back to linear crossfade");
                let mixed = self.synthesize(Strategy::Linear, outgoing, incoming)?;
                Ok((mixed, Strategy::Linear))
            }
            Err(e) => Err(e),
        }
    }
}
