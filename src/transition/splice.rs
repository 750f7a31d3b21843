use super::{TransitionError, peak_normalize};
use crate::analyzer::beats::{BeatSettings, analyze_beats};
use crate::analyzer::features::FeatureSettings;
use crate::audio::secs_to_samples;

/// Beats of a signal that lie inside `[guard, duration - guard]`.
fn guarded(beats: &[f64], duration: f64, guard: f64) -> Vec<f64> {
    beats
        .iter()
        .copied()
        .filter(|&t| t >= guard && t <= duration - guard)
        .collect()
}

/// The candidate pair with the smallest time difference. Ties keep the pair
/// found first, scanning `first` then `second` in ascending order.
pub fn closest_beat_pair(first: &[f64], second: &[f64]) -> Option<(f64, f64)> {
    let mut best: Option<(f64, f64, f64)> = None;
    for &t1 in first {
        for &t2 in second {
            let diff = (t1 - t2).abs();
            if best.is_none_or(|(_, _, d)| diff < d) {
                best = Some((t1, t2, diff));
            }
        }
    }
    best.map(|(t1, t2, _)| (t1, t2))
}

/// Cut `first` on a beat and continue `second` from its closest beat.
///
/// Output is `first[..b1] ++ second[b2..]`, peak-normalized.
pub fn beat_splice(
    first: &[f32],
    second: &[f32],
    sample_rate: u32,
    guard_secs: f64,
    features: FeatureSettings,
    beats: &BeatSettings,
    ceiling: f32,
) -> Result<Vec<f32>, TransitionError> {
    let sr = sample_rate as f64;
    let (beats_a, beats_b) = rayon::join(
        || analyze_beats(first, sample_rate, features, beats),
        || analyze_beats(second, sample_rate, features, beats),
    );

    let cand_a = guarded(&beats_a.beat_times, first.len() as f64 / sr, guard_secs);
    let cand_b = guarded(&beats_b.beat_times, second.len() as f64 / sr, guard_secs);
    let Some((t1, t2)) = closest_beat_pair(&cand_a, &cand_b) else {
        return Err(TransitionError::NoBeatCandidates { guard_secs });
    };

    log::debug!(
        "Splicing at {:.2}s -> {:.2}s ({:?} / {:?} BPM)",
        t1,
        t2,
        beats_a.tempo_bpm,
        beats_b.tempo_bpm
    );

    let b1 = secs_to_samples(t1, sample_rate).min(first.len());
    let b2 = secs_to_samples(t2, sample_rate).min(second.len());
    let mut output = Vec::with_capacity(b1 + second.len() - b2);
    output.extend_from_slice(&first[..b1]);
    output.extend_from_slice(&second[b2..]);
    peak_normalize(&mut output, ceiling);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 8000;

    fn click_track(secs: f64, interval: f64, offset: f64) -> Vec<f32> {
        let mut signal = vec![0.0f32; (secs * SR as f64) as usize];
        let mut t = offset;
        while t < secs {
            let start = (t * SR as f64) as usize;
            for (k, s) in signal.iter_mut().skip(start).take(80).enumerate() {
                *s = if k % 2 == 0 { 0.8 } else { -0.8 } * (1.0 - k as f32 / 80.0);
            }
            t += interval;
        }
        signal
    }

    fn features() -> FeatureSettings {
        FeatureSettings { n_fft: 512, hop_length: 256 }
    }

    #[test]
    fn test_closest_pair_prefers_earliest_on_ties() {
        assert_eq!(closest_beat_pair(&[1.0, 3.0], &[2.0, 4.0]), Some((1.0, 2.0)));
        assert_eq!(closest_beat_pair(&[1.0, 5.0], &[4.9]), Some((5.0, 4.9)));
        assert_eq!(closest_beat_pair(&[], &[1.0]), None);
    }

    #[test]
    fn test_guard_excludes_edges() {
        let beats = [0.5, 5.0, 10.0, 15.0, 19.5];
        assert_eq!(guarded(&beats, 20.0, 5.0), vec![5.0, 10.0, 15.0]);
        assert!(guarded(&beats, 20.0, 10.5).is_empty());
    }

    #[test]
    fn test_splice_joins_on_beats() {
        let first = click_track(12.0, 0.5, 0.25);
        let second = click_track(12.0, 0.5, 0.1);
        let out = beat_splice(&first, &second, SR, 2.0, features(), &BeatSettings::default(), 0.95)
            .unwrap();
        assert!(!out.is_empty());
        let peak = out.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!((peak - 0.95).abs() < 1e-4);
        // Both halves come from 12 s inputs cut inside the 2 s guard
        assert!(out.len() > 4 * SR as usize);
        assert!(out.len() < 20 * SR as usize);
    }

    #[test]
    fn test_short_signals_have_no_candidates() {
        let first = click_track(6.0, 0.5, 0.25);
        let second = click_track(6.0, 0.5, 0.25);
        let err = beat_splice(&first, &second, SR, 10.0, features(), &BeatSettings::default(), 0.95)
            .unwrap_err();
        assert!(matches!(err, TransitionError::NoBeatCandidates { .. }));
    }
}
