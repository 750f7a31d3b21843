use super::{ScratchSettings, linspace, peak_normalize};
use super::reverb::gaussian;
use crate::audio::secs_to_samples;
use rand::Rng;
use std::f32::consts::PI;

fn normalized(signal: &[f32], ceiling: f32) -> Vec<f32> {
    let mut out = signal.to_vec();
    peak_normalize(&mut out, ceiling);
    out
}

/// A record-scratch stand-in: band-limited noise and a tone whose pitch is
/// swept back and forth, gated into short strokes.
pub fn synthesize_scratch<R: Rng>(rng: &mut R, sample_rate: u32, secs: f64) -> Vec<f32> {
    let len = secs_to_samples(secs, sample_rate);
    let sr = sample_rate as f32;
    // Strokes per second of the hand moving the record
    let stroke_rate = 6.0f32;

    let mut phase = 0.0f32;
    let mut lowpassed = 0.0f32;
    let mut out = Vec::with_capacity(len);
    for k in 0..len {
        let t = k as f32 / sr;
        let stroke = (2.0 * PI * stroke_rate * t).sin();
        // Playback speed follows the hand; pitch rises and falls with it
        let speed = stroke.abs();
        phase += 2.0 * PI * (180.0 + 900.0 * speed) / sr;
        let tone = phase.sin() * speed;

        lowpassed += 0.3 * (gaussian(rng) - lowpassed);
        let gate = if stroke.abs() > 0.15 { 1.0 } else { 0.0 };
        out.push((0.6 * tone + 0.4 * lowpassed * speed) * gate);
    }
    peak_normalize(&mut out, 1.0);
    out
}

fn fade_len(settings: &ScratchSettings, sample_rate: u32) -> usize {
    secs_to_samples(settings.fade_ms / 1000.0, sample_rate)
}

/// Cut the outgoing segment, drop the effect in, then start the incoming one.
///
/// All three inputs are peak-normalized first. The outgoing segment is cut at
/// `position` with a short fade-out, the incoming segment starts with a short
/// fade-in (when it is longer than the fade), and the whole is normalized.
pub fn scratch_insert(
    outgoing: &[f32],
    incoming: &[f32],
    effect: &[f32],
    sample_rate: u32,
    settings: &ScratchSettings,
) -> Vec<f32> {
    let mut first = normalized(outgoing, 1.0);
    let mut second = normalized(incoming, 1.0);
    let effect = normalized(effect, 1.0);

    let cut = ((first.len() as f64 * settings.position).floor() as usize).min(first.len());
    let fade = fade_len(settings, sample_rate);

    let fade_out = fade.min(cut);
    for (s, g) in first[cut - fade_out..cut]
        .iter_mut()
        .zip(linspace(1.0, 0.0, fade_out))
    {
        *s *= g;
    }
    if fade < second.len() {
        for (s, g) in second[..fade].iter_mut().zip(linspace(0.0, 1.0, fade)) {
            *s *= g;
        }
    }

    let mut output = Vec::with_capacity(cut + effect.len() + second.len());
    output.extend_from_slice(&first[..cut]);
    output.extend_from_slice(&effect);
    output.extend_from_slice(&second);
    peak_normalize(&mut output, 1.0);
    output
}

/// Attack/sustain/release envelope with 10% ramps at each end.
fn effect_envelope(len: usize) -> Vec<f32> {
    let ramp = len / 10;
    let sustain = len - 2 * ramp;
    let mut env = linspace(0.0, 1.0, ramp);
    env.extend(std::iter::repeat_n(1.0, sustain));
    env.extend(linspace(1.0, 0.0, ramp));
    env
}

/// Overlap the two segments at `position` with `^1.5` fades and lay the
/// effect over the seam, starting 30% into the overlap.
///
/// Every incoming sample is kept, so the result runs until the incoming
/// segment (or the effect) ends.
pub fn scratch_crossfade(
    outgoing: &[f32],
    incoming: &[f32],
    effect: &[f32],
    sample_rate: u32,
    settings: &ScratchSettings,
    ceiling: f32,
) -> Vec<f32> {
    let first = normalized(outgoing, 1.0);
    let second = normalized(incoming, 1.0);
    let effect = normalized(effect, 0.8);

    let cut = ((first.len() as f64 * settings.position).floor() as usize).min(first.len());
    let overlap = secs_to_samples(settings.overlap_secs, sample_rate);
    let effect_start = cut + (overlap as f64 * 0.3) as usize;

    let total = (cut + overlap)
        .max(effect_start + effect.len())
        .max(cut + second.len());
    let mut output = vec![0.0f32; total];
    output[..cut].copy_from_slice(&first[..cut]);

    // The overlap can't run past either segment
    let actual = overlap.min(first.len() - cut).min(second.len());
    let fade_out = linspace(1.0, 0.0, overlap);
    let fade_in = linspace(0.0, 1.0, overlap);
    for k in 0..actual {
        output[cut + k] = first[cut + k] * fade_out[k].powf(1.5) + second[k] * fade_in[k].powf(1.5);
    }
    for (k, &s) in second.iter().enumerate().skip(actual) {
        output[cut + k] += s;
    }

    for ((slot, &s), g) in output[effect_start..]
        .iter_mut()
        .zip(&effect)
        .zip(effect_envelope(effect.len()))
    {
        *slot += s * g;
    }

    peak_normalize(&mut output, ceiling);
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    const SR: u32 = 1000;

    fn settings() -> ScratchSettings {
        ScratchSettings {
            position: 0.75,
            fade_ms: 100.0,
            overlap_secs: 0.2,
            ..Default::default()
        }
    }

    #[test]
    fn test_insert_layout() {
        let out = vec![0.5f32; 1000];
        let inc = vec![0.25f32; 600];
        let effect = vec![-0.1f32; 300];
        let mixed = scratch_insert(&out, &inc, &effect, SR, &settings());
        assert_eq!(mixed.len(), 750 + 300 + 600);

        // Untouched head of the outgoing segment, normalized to 1
        assert!((mixed[0] - 1.0).abs() < 1e-6);
        // Fade-out reaches silence right at the cut
        assert!(mixed[749].abs() < 1e-6);
        // Effect sits between the two segments
        assert!((mixed[750] + 1.0).abs() < 1e-6);
        // Incoming fade-in starts from silence and reaches full level
        assert!(mixed[1050].abs() < 1e-6);
        assert!((mixed[1649] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_insert_skips_fade_for_short_incoming() {
        let mixed = scratch_insert(&[0.5; 100], &[0.5; 50], &[0.5; 10], SR, &settings());
        assert_eq!(mixed.len(), 75 + 10 + 50);
        assert!((mixed[85] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_crossfade_keeps_all_incoming() {
        let out = vec![0.5f32; 1000];
        let inc = vec![0.5f32; 800];
        let effect = vec![0.5f32; 100];
        let mixed = scratch_crossfade(&out, &inc, &effect, SR, &settings(), 0.95);
        assert_eq!(mixed.len(), 750 + 800);
        let peak = mixed.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!((peak - 0.95).abs() < 1e-5);
    }

    #[test]
    fn test_crossfade_extends_for_long_effect() {
        let mixed = scratch_crossfade(&[0.5; 100], &[0.5; 10], &[0.5; 500], SR, &settings(), 0.95);
        // effect starts 30% into the 200-sample overlap after the cut at 75
        assert_eq!(mixed.len(), 75 + 60 + 500);
    }

    #[test]
    fn test_effect_envelope_shape() {
        let env = effect_envelope(100);
        assert_eq!(env.len(), 100);
        assert_eq!(env[0], 0.0);
        assert_eq!(env[50], 1.0);
        assert_eq!(env[99], 0.0);
        assert_eq!(effect_envelope(5), vec![1.0; 5]);
    }

    #[test]
    fn test_synthesized_scratch_is_normalized() {
        let mut rng = StdRng::seed_from_u64(3);
        let effect = synthesize_scratch(&mut rng, 8000, 1.0);
        assert_eq!(effect.len(), 8000);
        let peak = effect.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!((peak - 1.0).abs() < 1e-6);
        assert!(effect.iter().any(|&s| s == 0.0));
    }
}
