use rayon::prelude::*;
use rustfft::FftPlanner;
use rustfft::num_complex::Complex;
use std::f32::consts::PI;

/// Pitch classes per chroma vector.
pub const CHROMA_BINS: usize = 12;

/// Lowest / highest frequency folded into chroma (C1 .. ~D#8).
const CHROMA_FMIN: f32 = 32.7;
const CHROMA_FMAX: f32 = 5000.0;

/// STFT framing shared by chroma and onset extraction.
#[derive(Debug, Clone, Copy)]
pub struct FeatureSettings {
    pub n_fft: usize,
    pub hop_length: usize,
}

impl Default for FeatureSettings {
    fn default() -> Self {
        Self {
            n_fft: 4096,
            hop_length: 1024,
        }
    }
}

/// One chroma vector per hop of the source signal.
#[derive(Debug, Clone)]
pub struct FeatureSequence {
    pub hop_length: usize,
    pub sample_rate: u32,
    pub frames: Vec<Vec<f32>>,
}

impl FeatureSequence {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Sample offset where frame `index` starts.
    pub fn frame_to_sample(&self, index: usize) -> usize {
        index * self.hop_length
    }
}

/// Magnitude spectrogram. Frame `t` covers `[t*hop, t*hop + n_fft)`, zero-padded
/// past the end of the signal, so there are `floor(len / hop)` frames.
pub fn magnitude_spectrogram(signal: &[f32], settings: FeatureSettings) -> Vec<Vec<f32>> {
    let n_fft = settings.n_fft;
    let hop = settings.hop_length.max(1);
    let n_frames = signal.len() / hop;
    if n_frames == 0 || n_fft == 0 {
        return Vec::new();
    }

    let fft = FftPlanner::<f32>::new().plan_fft_forward(n_fft);
    let window: Vec<f32> = (0..n_fft)
        .map(|n| 0.5 - 0.5 * (2.0 * PI * n as f32 / n_fft as f32).cos())
        .collect();
    let scratch_len = fft.get_inplace_scratch_len();

    (0..n_frames)
        .into_par_iter()
        .map_init(
            || {
                (
                    vec![Complex::new(0.0f32, 0.0); n_fft],
                    vec![Complex::new(0.0f32, 0.0); scratch_len],
                )
            },
            |(buf, scratch), t| {
                let start = t * hop;
                for (n, slot) in buf.iter_mut().enumerate() {
                    let s = signal.get(start + n).copied().unwrap_or(0.0);
                    *slot = Complex::new(s * window[n], 0.0);
                }
                fft.process_with_scratch(buf, scratch);
                buf[..=n_fft / 2].iter().map(|c| c.norm()).collect()
            },
        )
        .collect()
}

/// Pitch class for each FFT bin, `None` outside the chroma range.
fn bin_pitch_classes(n_fft: usize, sample_rate: u32) -> Vec<Option<usize>> {
    (0..=n_fft / 2)
        .map(|k| {
            let freq = k as f32 * sample_rate as f32 / n_fft as f32;
            if !(CHROMA_FMIN..=CHROMA_FMAX).contains(&freq) {
                return None;
            }
            let midi = (12.0 * (freq / 440.0).log2() + 69.0).round() as i64;
            Some(midi.rem_euclid(CHROMA_BINS as i64) as usize)
        })
        .collect()
}

/// Chroma features: spectral power folded onto 12 pitch classes (C = 0),
/// each frame scaled so its largest bin is 1. Silent frames stay all-zero.
pub fn chroma(signal: &[f32], sample_rate: u32, settings: FeatureSettings) -> FeatureSequence {
    let pitch_classes = bin_pitch_classes(settings.n_fft, sample_rate);
    let frames = magnitude_spectrogram(signal, settings)
        .into_iter()
        .map(|mags| {
            let mut vector = vec![0.0f32; CHROMA_BINS];
            for (mag, pc) in mags.iter().zip(&pitch_classes) {
                if let Some(pc) = pc {
                    vector[*pc] += mag * mag;
                }
            }
            let peak = vector.iter().cloned().fold(0.0f32, f32::max);
            if peak > 0.0 {
                vector.iter_mut().for_each(|v| *v /= peak);
            }
            vector
        })
        .collect();

    FeatureSequence {
        hop_length: settings.hop_length,
        sample_rate,
        frames,
    }
}

/// Chroma for two signals at once.
pub fn chroma_pair(
    a: &[f32],
    b: &[f32],
    sample_rate: u32,
    settings: FeatureSettings,
) -> (FeatureSequence, FeatureSequence) {
    rayon::join(
        || chroma(a, sample_rate, settings),
        || chroma(b, sample_rate, settings),
    )
}

/// Spectral-flux onset strength, one value per frame: the summed positive
/// change in log-compressed magnitude from the previous frame.
pub fn onset_strength(signal: &[f32], settings: FeatureSettings) -> Vec<f32> {
    let spec: Vec<Vec<f32>> = magnitude_spectrogram(signal, settings)
        .into_iter()
        .map(|frame| frame.into_iter().map(|m| (1.0 + 1000.0 * m).ln()).collect())
        .collect();

    let mut envelope = Vec::with_capacity(spec.len());
    for t in 0..spec.len() {
        if t == 0 {
            envelope.push(0.0);
            continue;
        }
        let flux: f32 = spec[t]
            .iter()
            .zip(&spec[t - 1])
            .map(|(cur, prev)| (cur - prev).max(0.0))
            .sum();
        envelope.push(flux);
    }
    envelope
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq: f32, sample_rate: u32, secs: f32) -> Vec<f32> {
        let n = (sample_rate as f32 * secs) as usize;
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn test_frame_count_is_floor_of_hop() {
        let settings = FeatureSettings { n_fft: 1024, hop_length: 512 };
        let signal = vec![0.0; 512 * 10 + 100];
        assert_eq!(magnitude_spectrogram(&signal, settings).len(), 10);
        assert!(magnitude_spectrogram(&signal[..300], settings).is_empty());
    }

    #[test]
    fn test_chroma_of_a440_peaks_at_a() {
        let sr = 22050;
        let seq = chroma(&tone(440.0, sr, 1.0), sr, FeatureSettings::default());
        assert!(!seq.is_empty());
        let mid = &seq.frames[seq.len() / 2];
        let argmax = mid
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(argmax, 9, "A is pitch class 9, got {mid:?}");
        assert!((mid[9] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_chroma_of_silence_is_zero() {
        let seq = chroma(&vec![0.0; 22050], 22050, FeatureSettings::default());
        assert!(seq.frames.iter().all(|f| f.iter().all(|&v| v == 0.0)));
        assert_eq!(seq.frames[0].len(), CHROMA_BINS);
    }

    #[test]
    fn test_onset_strength_spikes_at_click() {
        let settings = FeatureSettings { n_fft: 1024, hop_length: 512 };
        let mut signal = vec![0.0f32; 512 * 40];
        for s in &mut signal[512 * 20..512 * 20 + 64] {
            *s = 1.0;
        }
        let env = onset_strength(&signal, settings);
        let peak = env
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        // The click first enters the analysis window one frame ahead of its hop
        assert!((18..=20).contains(&peak), "peak at {peak}");
        assert_eq!(env[5], 0.0);
    }

    #[test]
    fn test_frame_to_sample() {
        let seq = FeatureSequence { hop_length: 512, sample_rate: 22050, frames: vec![] };
        assert_eq!(seq.frame_to_sample(3), 1536);
    }
}
