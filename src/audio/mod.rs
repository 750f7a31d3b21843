pub mod decode;
pub mod device;
pub mod output;

use decode::DecodeError;
use std::path::{Path, PathBuf};

/// A decoded track: mono samples at the engine's sample rate.
#[derive(Debug, Clone)]
pub struct Track {
    pub id: String,
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Track {
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Source of raw track audio. The playback engine never touches files directly.
pub trait TrackLoader: Send + Sync {
    /// Load `track_id` resampled to `target_rate`.
    fn load(&self, track_id: &str, target_rate: u32) -> Result<Track, DecodeError>;
}

/// Loads tracks from disk. Relative identifiers resolve against `music_dir`.
#[derive(Debug, Clone, Default)]
pub struct FileLoader {
    music_dir: Option<PathBuf>,
}

impl FileLoader {
    pub fn new(music_dir: Option<PathBuf>) -> Self {
        Self { music_dir }
    }

    pub fn resolve(&self, track_id: &str) -> PathBuf {
        let path = Path::new(track_id);
        match &self.music_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl TrackLoader for FileLoader {
    fn load(&self, track_id: &str, target_rate: u32) -> Result<Track, DecodeError> {
        let path = self.resolve(track_id);
        log::debug!("Decoding {}", path.display());

        let audio = decode::load_audio(&path)?;
        let samples = if audio.sample_rate == target_rate {
            audio.samples
        } else {
            log::debug!(
                "Resampling {} from {} Hz to {} Hz",
                track_id,
                audio.sample_rate,
                target_rate
            );
            decode::resample(&audio.samples, audio.sample_rate, target_rate)?
        };

        Ok(Track {
            id: track_id.to_string(),
            samples,
            sample_rate: target_rate,
        })
    }
}

/// Seconds → whole samples (floor).
pub fn secs_to_samples(secs: f64, sample_rate: u32) -> usize {
    (secs.max(0.0) * sample_rate as f64) as usize
}
