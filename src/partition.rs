use crate::audio::decode::DecodeError;
use crate::audio::{Track, TrackLoader, secs_to_samples};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PartitionError {
    #[error("Failed to load track: {0}")]
    Load(#[from] DecodeError),
    #[error("Track {id} is {length} samples, too short to trim {trim} samples from each end")]
    Trim { id: String, length: usize, trim: usize },
}

/// How a track is cut into regions.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct PartitionSettings {
    /// Seconds dropped from both the head and the tail.
    pub trim_secs: f64,
    /// Fraction of the trimmed track that becomes the mood-sampling region.
    pub sample_ratio: f64,
    /// Fraction of the trimmed track that becomes the `pre_transition` region.
    pub transition_ratio: f64,
}

impl Default for PartitionSettings {
    fn default() -> Self {
        Self {
            trim_secs: 30.0,
            sample_ratio: 0.20,
            transition_ratio: 0.15,
        }
    }
}

/// A trimmed track cut into three consecutive regions.
#[derive(Debug, Clone)]
pub struct PartitionedTrack {
    pub id: String,
    pub sample_rate: u32,
    pub pre_transition: Vec<f32>,
    pub sample: Vec<f32>,
    pub post_transition: Vec<f32>,
}

impl PartitionedTrack {
    /// Total samples across all regions.
    pub fn len(&self) -> usize {
        self.pre_transition.len() + self.sample.len() + self.post_transition.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn region_secs(&self, region: &[f32]) -> f64 {
        region.len() as f64 / self.sample_rate as f64
    }
}

/// Trim and split an already-loaded track.
///
/// With `L' = L - 2*trim`, the regions are `floor(L' * transition_ratio)`,
/// `floor(L' * sample_ratio)` and the remainder, in that order.
pub fn partition_track(
    track: Track,
    settings: &PartitionSettings,
) -> Result<PartitionedTrack, PartitionError> {
    let trim = secs_to_samples(settings.trim_secs, track.sample_rate);
    let length = track.samples.len();
    if length <= 2 * trim {
        return Err(PartitionError::Trim {
            id: track.id,
            length,
            trim,
        });
    }

    let Track {
        id,
        mut samples,
        sample_rate,
    } = track;
    samples.truncate(length - trim);
    samples.drain(..trim);
    let trimmed = samples.len();

    let pre_len = (trimmed as f64 * settings.transition_ratio).floor() as usize;
    let sample_len = (trimmed as f64 * settings.sample_ratio).floor() as usize;
    // Guard against ratios that round past the end
    let pre_len = pre_len.min(trimmed);
    let sample_len = sample_len.min(trimmed - pre_len);

    let post_transition = samples.split_off(pre_len + sample_len);
    let sample = samples.split_off(pre_len);
    let pre_transition = samples;

    Ok(PartitionedTrack {
        id,
        sample_rate,
        pre_transition,
        sample,
        post_transition,
    })
}

/// Loads tracks through a [`TrackLoader`] and partitions them.
#[derive(Clone)]
pub struct Partitioner {
    loader: Arc<dyn TrackLoader>,
    sample_rate: u32,
    settings: PartitionSettings,
}

impl Partitioner {
    pub fn new(loader: Arc<dyn TrackLoader>, sample_rate: u32, settings: PartitionSettings) -> Self {
        Self {
            loader,
            sample_rate,
            settings,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn partition(&self, track_id: &str) -> Result<PartitionedTrack, PartitionError> {
        let track = self.loader.load(track_id, self.sample_rate)?;
        let parts = partition_track(track, &self.settings)?;
        log::debug!(
            "Partitioned {}: pre {} ({:.1}s), sample {} ({:.1}s), post {} ({:.1}s)",
            parts.id,
            parts.pre_transition.len(),
            parts.region_secs(&parts.pre_transition),
            parts.sample.len(),
            parts.region_secs(&parts.sample),
            parts.post_transition.len(),
            parts.region_secs(&parts.post_transition),
        );
        Ok(parts)
    }
}
