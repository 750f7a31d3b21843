use super::{TransitionError, linspace};
use crate::analyzer::dtw::{AlignmentOptions, WarpingPath, align_with, cosine_distance};
use crate::analyzer::features::{FeatureSettings, chroma_pair};

/// Equal-length linear crossfade of the tail of `end` into the head of `start`.
///
/// The overlap is `min(max_len, end.len(), start.len())` samples; the output is
/// just the overlap. If exactly one side is empty the result is empty.
pub fn linear_crossfade(
    end: &[f32],
    start: &[f32],
    max_len: usize,
) -> Result<Vec<f32>, TransitionError> {
    if end.is_empty() && start.is_empty() {
        return Err(TransitionError::InsufficientLength {
            needed: 1,
            available: 0,
        });
    }

    let length = max_len.min(end.len()).min(start.len());
    let fade_out = linspace(1.0, 0.0, length);
    let fade_in = linspace(0.0, 1.0, length);
    let tail = &end[end.len() - length..];

    Ok(tail
        .iter()
        .zip(&start[..length])
        .zip(fade_out.iter().zip(&fade_in))
        .map(|((a, b), (fo, fi))| a * fo + b * fi)
        .collect())
}

/// Piecewise-linear map from sample positions in the first signal to sample
/// positions in the second, built from a warping path.
#[derive(Debug, Clone)]
pub struct TimeMap {
    xp: Vec<f64>,
    fp: Vec<f64>,
}

impl TimeMap {
    /// Frames become sample offsets via `hop`. Consecutive path points that
    /// share a first-signal frame collapse to the mean of their second-signal
    /// positions, so the map is a function.
    pub fn from_path(path: &WarpingPath, hop: usize) -> Self {
        let mut xp: Vec<f64> = Vec::new();
        let mut fp: Vec<f64> = Vec::new();
        let mut run_sum = 0.0;
        let mut run_len = 0usize;

        for (k, &(i, j)) in path.iter().enumerate() {
            run_sum += (j * hop) as f64;
            run_len += 1;
            let run_ends = path.get(k + 1).is_none_or(|&(next_i, _)| next_i != i);
            if run_ends {
                xp.push((i * hop) as f64);
                fp.push(run_sum / run_len as f64);
                run_sum = 0.0;
                run_len = 0;
            }
        }

        Self { xp, fp }
    }

    /// Length of first-signal time the path covers, in samples.
    pub fn span(&self) -> f64 {
        match (self.xp.first(), self.xp.last()) {
            (Some(first), Some(last)) => last - first,
            _ => 0.0,
        }
    }

    /// Position in the second signal for position `t` in the first. Before the
    /// path the first point is held; past it the map continues at unit slope.
    pub fn map(&self, t: f64) -> f64 {
        let (Some(&x0), Some(&xn)) = (self.xp.first(), self.xp.last()) else {
            return t;
        };
        if t <= x0 {
            return self.fp[0];
        }
        if t >= xn {
            return self.fp[self.fp.len() - 1] + (t - xn);
        }
        let k = self.xp.partition_point(|&x| x <= t);
        let (x_lo, x_hi) = (self.xp[k - 1], self.xp[k]);
        let (f_lo, f_hi) = (self.fp[k - 1], self.fp[k]);
        f_lo + (f_hi - f_lo) * (t - x_lo) / (x_hi - x_lo)
    }
}

/// Read `signal` at fractional position `pos` with linear interpolation,
/// clamped to the ends.
fn interpolate(signal: &[f32], pos: f64) -> f32 {
    let last = signal.len() - 1;
    let pos = pos.clamp(0.0, last as f64);
    let lo = pos.floor() as usize;
    let hi = (lo + 1).min(last);
    let frac = (pos - lo as f64) as f32;
    signal[lo] * (1.0 - frac) + signal[hi] * frac
}

/// Resample `second` onto the first signal's timeline. The result runs until
/// the map reaches the end of `second`.
pub fn warp_signal(second: &[f32], map: &TimeMap) -> Vec<f32> {
    if second.is_empty() {
        return Vec::new();
    }
    let end = second.len() as f64;
    let mut warped = Vec::with_capacity(second.len());
    let mut t = 0usize;
    loop {
        let pos = map.map(t as f64);
        if pos >= end && !warped.is_empty() {
            break;
        }
        warped.push(interpolate(second, pos));
        t += 1;
    }
    warped
}

/// Crossfade after time-aligning `second` to `first` with DTW over chroma.
///
/// The output is `first` up to the crossfade, the linear blend of the last
/// `crossfade_len` samples of `first` with the head of the warped `second`,
/// then the rest of the warped `second`.
pub fn dtw_crossfade(
    first: &[f32],
    second: &[f32],
    sample_rate: u32,
    crossfade_len: usize,
    features: FeatureSettings,
    options: AlignmentOptions,
) -> Result<Vec<f32>, TransitionError> {
    if crossfade_len > first.len() {
        return Err(TransitionError::InsufficientLength {
            needed: crossfade_len,
            available: first.len(),
        });
    }

    let (chroma_a, chroma_b) = chroma_pair(first, second, sample_rate, features);
    let alignment = align_with(&chroma_a.frames, &chroma_b.frames, cosine_distance, options)?;
    let map = TimeMap::from_path(&alignment.path, features.hop_length);

    let span = map.span() as usize;
    if crossfade_len > span {
        return Err(TransitionError::InsufficientLength {
            needed: crossfade_len,
            available: span,
        });
    }

    let warped = warp_signal(second, &map);
    if crossfade_len > warped.len() {
        return Err(TransitionError::InsufficientLength {
            needed: crossfade_len,
            available: warped.len(),
        });
    }
    log::debug!(
        "DTW path of {} steps, warped {} -> {} samples",
        alignment.path.len(),
        second.len(),
        warped.len()
    );

    let cut = first.len() - crossfade_len;
    let fade_out = linspace(1.0, 0.0, crossfade_len);
    let fade_in = linspace(0.0, 1.0, crossfade_len);

    let mut output = Vec::with_capacity(cut + warped.len());
    output.extend_from_slice(&first[..cut]);
    for k in 0..crossfade_len {
        output.push(first[cut + k] * fade_out[k] + warped[k] * fade_in[k]);
    }
    output.extend_from_slice(&warped[crossfade_len..]);
    Ok(output)
}
