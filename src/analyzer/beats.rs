use super::features::{FeatureSettings, onset_strength};

/// Tempo search range and dynamic-programming tightness.
#[derive(Debug, Clone, Copy)]
pub struct BeatSettings {
    pub min_bpm: f64,
    pub max_bpm: f64,
    /// Center of the log-normal tempo prior.
    pub start_bpm: f64,
    /// How strongly beat spacing is held to the estimated period.
    pub tightness: f64,
}

impl Default for BeatSettings {
    fn default() -> Self {
        Self {
            min_bpm: 60.0,
            max_bpm: 200.0,
            start_bpm: 120.0,
            tightness: 100.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BeatAnalysis {
    pub tempo_bpm: Option<f64>,
    /// Beat timestamps in seconds, ascending.
    pub beat_times: Vec<f64>,
}

/// Autocorrelation tempo estimate over the onset envelope, weighted by a
/// log-normal prior around `start_bpm`. `None` if the envelope has no periodicity.
///
/// The autocorrelation is smoothed across neighboring lags so a period that
/// falls between two integer lags is not outscored by its subharmonic.
pub fn estimate_tempo(onset: &[f32], frame_rate: f64, settings: &BeatSettings) -> Option<f64> {
    let n = onset.len();
    let lag_min = ((60.0 * frame_rate / settings.max_bpm).floor() as usize).max(1);
    let lag_max = ((60.0 * frame_rate / settings.min_bpm).ceil() as usize).min(n.saturating_sub(2));
    if lag_min > lag_max {
        return None;
    }

    let mean = onset.iter().map(|&v| v as f64).sum::<f64>() / n as f64;
    let centered: Vec<f64> = onset.iter().map(|&v| v as f64 - mean).collect();
    let raw: Vec<f64> = (0..=lag_max + 1)
        .map(|lag| {
            centered[..n - lag]
                .iter()
                .zip(&centered[lag..])
                .map(|(a, b)| a * b)
                .sum()
        })
        .collect();

    let mut best: Option<(usize, f64)> = None;
    for lag in lag_min..=lag_max {
        let ac = raw[lag] + 0.5 * (raw[lag - 1] + raw[lag + 1]);
        if ac <= 0.0 {
            continue;
        }
        let bpm = 60.0 * frame_rate / lag as f64;
        let octaves = (bpm / settings.start_bpm).log2();
        let weighted = ac * (-0.5 * octaves * octaves).exp();
        if best.is_none_or(|(_, w)| weighted > w) {
            best = Some((lag, weighted));
        }
    }

    best.map(|(lag, _)| 60.0 * frame_rate / lag as f64)
}

/// Dynamic-programming beat tracker. Returns beat frame indices, ascending.
///
/// Each frame's cumulative score is its normalized onset strength plus the best
/// predecessor score in `[t - 2P, t - P/2]`, penalized by the squared log ratio
/// of the gap to the period `P`. The path is traced back from the best-scoring
/// frame within the final period.
pub fn track_beats(onset: &[f32], period: f64, tightness: f64) -> Vec<usize> {
    let n = onset.len();
    if n == 0 || period < 1.0 {
        return Vec::new();
    }

    let mean = onset.iter().map(|&v| v as f64).sum::<f64>() / n as f64;
    let var = onset
        .iter()
        .map(|&v| (v as f64 - mean).powi(2))
        .sum::<f64>()
        / n as f64;
    let std = var.sqrt();
    if std <= f64::EPSILON {
        return Vec::new();
    }
    let local: Vec<f64> = onset.iter().map(|&v| v as f64 / std).collect();

    let near = (period / 2.0).round().max(1.0) as usize;
    let far = (2.0 * period).round() as usize;

    let mut cumulative = vec![0.0f64; n];
    let mut backlink: Vec<Option<usize>> = vec![None; n];
    for t in 0..n {
        let mut best: Option<(usize, f64)> = None;
        if t >= near {
            let lo = t.saturating_sub(far);
            for prev in lo..=t - near {
                let gap = (t - prev) as f64 / period;
                let score = cumulative[prev] - tightness * gap.ln().powi(2);
                if best.is_none_or(|(_, s)| score > s) {
                    best = Some((prev, score));
                }
            }
        }
        match best {
            Some((prev, score)) => {
                cumulative[t] = local[t] + score;
                backlink[t] = Some(prev);
            }
            None => cumulative[t] = local[t],
        }
    }

    let tail_start = n.saturating_sub(period.ceil() as usize);
    let mut cursor = (tail_start..n)
        .max_by(|&a, &b| cumulative[a].total_cmp(&cumulative[b]))
        .unwrap_or(n - 1);

    let mut beats = vec![cursor];
    while let Some(prev) = backlink[cursor] {
        beats.push(prev);
        cursor = prev;
    }
    beats.reverse();

    // Trim leading/trailing frames that carry no onset energy
    while beats.first().is_some_and(|&b| onset[b] <= 0.0) {
        beats.remove(0);
    }
    while beats.last().is_some_and(|&b| onset[b] <= 0.0) {
        beats.pop();
    }
    beats
}

/// Estimate tempo and beat times for a mono signal.
pub fn analyze_beats(
    signal: &[f32],
    sample_rate: u32,
    features: FeatureSettings,
    settings: &BeatSettings,
) -> BeatAnalysis {
    let onset = onset_strength(signal, features);
    let frame_rate = sample_rate as f64 / features.hop_length as f64;

    let Some(tempo) = estimate_tempo(&onset, frame_rate, settings) else {
        return BeatAnalysis {
            tempo_bpm: None,
            beat_times: Vec::new(),
        };
    };

    let period = 60.0 * frame_rate / tempo;
    // Frame t's window is centered half a window past t * hop
    let center = features.n_fft as f64 / 2.0;
    let beat_times = track_beats(&onset, period, settings.tightness)
        .into_iter()
        .map(|t| (t as f64 * features.hop_length as f64 + center) / sample_rate as f64)
        .collect();

    BeatAnalysis {
        tempo_bpm: Some(tempo),
        beat_times,
    }
}
