use super::{ReverbSettings, peak_normalize, rms};
use crate::audio::secs_to_samples;
use rand::Rng;
use rustfft::FftPlanner;
use rustfft::num_complex::Complex;

/// Standard normal sample (Box-Muller).
pub(crate) fn gaussian<R: Rng>(rng: &mut R) -> f32 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    ((-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()) as f32
}

/// Noise impulse response under an exponential decay and a linear damping
/// ramp, scaled so its absolute values sum to 1.2.
pub fn impulse_response<R: Rng>(
    settings: &ReverbSettings,
    sample_rate: u32,
    rng: &mut R,
) -> Vec<f32> {
    let len = secs_to_samples(settings.decay_secs, sample_rate);
    if len == 0 {
        return Vec::new();
    }
    let denom = (len.max(2) - 1) as f64;
    let time_constant = settings.room_size * 1.5;

    let mut impulse: Vec<f32> = (0..len)
        .map(|k| {
            let frac = k as f64 / denom;
            let envelope = (-(frac * settings.decay_secs) / time_constant).exp();
            let damping = 1.0 - settings.damping * frac;
            gaussian(rng) * (envelope * damping) as f32
        })
        .collect();

    let l1: f32 = impulse.iter().map(|s| s.abs()).sum();
    if l1 > 0.0 {
        let gain = 1.2 / l1;
        impulse.iter_mut().for_each(|s| *s *= gain);
    }
    impulse
}

/// Full linear convolution (`a.len() + b.len() - 1` samples) via FFT.
pub fn fft_convolve(a: &[f32], b: &[f32]) -> Vec<f32> {
    if a.is_empty() || b.is_empty() {
        return Vec::new();
    }
    let out_len = a.len() + b.len() - 1;
    let n = out_len.next_power_of_two();

    let mut planner = FftPlanner::<f32>::new();
    let forward = planner.plan_fft_forward(n);
    let inverse = planner.plan_fft_inverse(n);

    let pad = |x: &[f32]| -> Vec<Complex<f32>> {
        let mut buf = vec![Complex::new(0.0, 0.0); n];
        for (slot, &s) in buf.iter_mut().zip(x) {
            slot.re = s;
        }
        buf
    };
    let mut fa = pad(a);
    let mut fb = pad(b);
    forward.process(&mut fa);
    forward.process(&mut fb);

    for (x, y) in fa.iter_mut().zip(&fb) {
        *x = *x * *y;
    }
    inverse.process(&mut fa);

    let scale = 1.0 / n as f32;
    fa[..out_len].iter().map(|c| c.re * scale).collect()
}

/// Reverb of `signal`: convolution with a fresh impulse response, RMS-matched
/// to the input and lifted by 10%.
pub fn reverb_tail<R: Rng>(
    signal: &[f32],
    settings: &ReverbSettings,
    sample_rate: u32,
    rng: &mut R,
) -> Vec<f32> {
    let impulse = impulse_response(settings, sample_rate, rng);
    let mut tail = fft_convolve(signal, &impulse);

    let input_rms = rms(signal);
    let tail_rms = rms(&tail);
    if tail_rms > 0.0 {
        let gain = input_rms / tail_rms * 1.1;
        tail.iter_mut().for_each(|s| *s *= gain);
    }
    tail
}

/// Blend `outgoing` into `incoming` through a reverb tail of `outgoing`.
///
/// Over the overlap, `outgoing * fade_out + tail * fade_out * 0.85 +
/// incoming * fade_in * 0.95`, with `^1.5` ramps. The overlap is the tail
/// length, shortened to `incoming` so the fade-in completes inside it; any
/// remaining incoming audio follows. The result is peak-normalized.
pub fn reverb_tail_blend<R: Rng>(
    outgoing: &[f32],
    incoming: &[f32],
    sample_rate: u32,
    settings: &ReverbSettings,
    ceiling: f32,
    rng: &mut R,
) -> Vec<f32> {
    let tail = reverb_tail(outgoing, settings, sample_rate, rng);
    let overlap = if incoming.is_empty() {
        tail.len()
    } else {
        tail.len().min(incoming.len())
    };

    let fade_out: Vec<f32> = super::linspace(1.0, 0.0, overlap)
        .into_iter()
        .map(|v| v.powf(1.5))
        .collect();
    let fade_in: Vec<f32> = super::linspace(0.0, 1.0, overlap)
        .into_iter()
        .map(|v| v.powf(1.5))
        .collect();

    let mut output = Vec::with_capacity(overlap.max(incoming.len()));
    for k in 0..overlap {
        let dry = outgoing.get(k).copied().unwrap_or(0.0);
        let wet = tail[k];
        let next = incoming.get(k).copied().unwrap_or(0.0);
        output.push(dry * fade_out[k] + wet * fade_out[k] * 0.85 + next * fade_in[k] * 0.95);
    }
    if incoming.len() > overlap {
        output.extend_from_slice(&incoming[overlap..]);
    }

    peak_normalize(&mut output, ceiling);
    output
}
