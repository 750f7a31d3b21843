//! Party score: how energetic a track feels, from its tempo and loudness.
//! Used to fill in catalog energies.

use super::beats::{BeatSettings, analyze_beats};
use super::features::FeatureSettings;
use serde::Serialize;

/// RMS framing, matching the usual 2048/512 analysis frames.
const RMS_FRAME: usize = 2048;
const RMS_HOP: usize = 512;

/// Ranges the two components are normalized over.
#[derive(Debug, Clone, Copy)]
pub struct ScoreSettings {
    pub min_bpm: f64,
    pub max_bpm: f64,
    /// Mean frame RMS that counts as full energy.
    pub max_rms: f64,
}

impl Default for ScoreSettings {
    fn default() -> Self {
        Self {
            min_bpm: 60.0,
            max_bpm: 200.0,
            max_rms: 0.25,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PartyScore {
    pub tempo_bpm: Option<f64>,
    pub mean_rms: f64,
    /// Average of normalized tempo and normalized loudness, in `[0, 1]`.
    pub score: f64,
}

impl PartyScore {
    /// Score on a 0-100 scale.
    pub fn percent(&self) -> u32 {
        (self.score * 100.0) as u32
    }
}

/// Map `value` from `[min, max]` onto `[0, 1]`, clamped.
pub fn normalize(value: f64, min: f64, max: f64) -> f64 {
    if max <= min {
        return 0.0;
    }
    ((value - min) / (max - min)).clamp(0.0, 1.0)
}

/// Mean RMS over centered, zero-padded frames.
pub fn mean_rms(signal: &[f32]) -> f64 {
    if signal.is_empty() {
        return 0.0;
    }
    let half = RMS_FRAME / 2;
    let frames = 1 + signal.len() / RMS_HOP;
    let total: f64 = (0..frames)
        .map(|f| {
            let center = f * RMS_HOP;
            let start = center.saturating_sub(half);
            let end = (center + half).min(signal.len());
            let power: f64 = signal[start..end].iter().map(|&s| (s as f64) * (s as f64)).sum();
            (power / RMS_FRAME as f64).sqrt()
        })
        .sum();
    total / frames as f64
}

/// Score a mono signal. A track with no detectable tempo scores on loudness
/// alone, with its tempo component at zero.
pub fn party_score(
    signal: &[f32],
    sample_rate: u32,
    features: FeatureSettings,
    settings: &ScoreSettings,
) -> PartyScore {
    let beats = BeatSettings {
        min_bpm: settings.min_bpm,
        max_bpm: settings.max_bpm,
        ..Default::default()
    };
    let (analysis, rms) = rayon::join(
        || analyze_beats(signal, sample_rate, features, &beats),
        || mean_rms(signal),
    );

    let tempo = analysis
        .tempo_bpm
        .map_or(0.0, |bpm| normalize(bpm, settings.min_bpm, settings.max_bpm));
    let loudness = normalize(rms, 0.0, settings.max_rms);

    PartyScore {
        tempo_bpm: analysis.tempo_bpm,
        mean_rms: rms,
        score: (tempo + loudness) / 2.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 8000;

    /// Clicks at `bpm`, silent in between.
    fn click_track(bpm: f64, secs: f64, amplitude: f32) -> Vec<f32> {
        let len = (secs * SR as f64) as usize;
        let period = (60.0 / bpm * SR as f64) as usize;
        (0..len)
            .map(|i| if i % period < 80 { amplitude } else { 0.0 })
            .collect()
    }

    fn features() -> FeatureSettings {
        FeatureSettings {
            n_fft: 1024,
            hop_length: 256,
        }
    }

    #[test]
    fn test_normalize_clamps() {
        assert_eq!(normalize(130.0, 60.0, 200.0), 0.5);
        assert_eq!(normalize(40.0, 60.0, 200.0), 0.0);
        assert_eq!(normalize(260.0, 60.0, 200.0), 1.0);
        assert_eq!(normalize(1.0, 1.0, 1.0), 0.0);
    }

    #[test]
    fn test_mean_rms_of_constant_signal() {
        let signal = vec![0.5f32; 100_000];
        // Edge frames are partly padding
        let rms = mean_rms(&signal);
        assert!(rms > 0.49 && rms <= 0.5, "{rms}");
        assert_eq!(mean_rms(&[]), 0.0);
    }

    #[test]
    fn test_silence_scores_zero() {
        let score = party_score(&vec![0.0; 4 * SR as usize], SR, features(), &ScoreSettings::default());
        assert_eq!(score.tempo_bpm, None);
        assert_eq!(score.score, 0.0);
        assert_eq!(score.percent(), 0);
    }

    #[test]
    fn test_faster_louder_track_scores_higher() {
        let settings = ScoreSettings::default();
        let calm = party_score(&click_track(70.0, 12.0, 0.2), SR, features(), &settings);
        let party = party_score(&click_track(170.0, 12.0, 0.9), SR, features(), &settings);
        assert!(party.mean_rms > calm.mean_rms);
        assert!(party.score > calm.score, "{party:?} vs {calm:?}");
        assert!((0.0..=1.0).contains(&party.score));
    }
}
