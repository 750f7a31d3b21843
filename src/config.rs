use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;

use crate::mood::MoodSettings;
use crate::partition::PartitionSettings;
use crate::player::PlayerSettings;
use crate::selector::{Catalog, CatalogEntry};
use crate::transition::{Strategy, TransitionSettings};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Application configuration loaded from TOML config file.
/// All fields have defaults, so the config file is optional.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Rate every track is decoded and played at.
    pub sample_rate: u32,
    /// Relative track ids resolve against this directory.
    pub music_dir: Option<PathBuf>,
    /// The catalog, in selection-priority order.
    pub tracks: Vec<CatalogEntry>,
    pub partition: PartitionSettings,
    pub mood: MoodSettings,
    pub transition: TransitionSettings,
    /// Pause before retrying after a track fails to load.
    pub retry_backoff_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sample_rate: crate::DEFAULT_SAMPLE_RATE,
            music_dir: None,
            tracks: Vec::new(),
            partition: PartitionSettings::default(),
            mood: MoodSettings::default(),
            transition: TransitionSettings::default(),
            retry_backoff_ms: 500,
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/moodmix/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => match Self::load_from(&path) {
                Ok(config) => config,
                Err(e) => {
                    log::warn!("{e}. Using defaults.");
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Load an explicitly named config file. Unlike [`AppConfig::load`], any
    /// failure is an error.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str::<AppConfig>(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Check ranges that serde can't express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.sample_rate == 0 {
            return invalid("sample_rate must be positive".into());
        }

        let p = &self.partition;
        if !(p.trim_secs >= 0.0) {
            return invalid(format!("partition.trim_secs must be >= 0, got {}", p.trim_secs));
        }
        if !(p.sample_ratio >= 0.0 && p.transition_ratio >= 0.0) {
            return invalid("partition ratios must be >= 0".into());
        }
        if p.sample_ratio + p.transition_ratio > 1.0 {
            return invalid(format!(
                "partition.sample_ratio + partition.transition_ratio must be <= 1, got {}",
                p.sample_ratio + p.transition_ratio
            ));
        }

        for (i, track) in self.tracks.iter().enumerate() {
            if !(0.0..=1.0).contains(&track.energy) {
                return invalid(format!(
                    "tracks[{i}] ({}) energy must be in [0, 1], got {}",
                    track.id, track.energy
                ));
            }
            if self.tracks[..i].iter().any(|t| t.id == track.id) {
                return invalid(format!("tracks[{i}] duplicates id {}", track.id));
            }
        }

        let m = &self.mood;
        if m.poll_interval_ms == 0 {
            return invalid("mood.poll_interval_ms must be positive".into());
        }
        if !(0.0..=1.0).contains(&m.neutral) {
            return invalid(format!("mood.neutral must be in [0, 1], got {}", m.neutral));
        }
        if m.window_capacity == 0 {
            return invalid("mood.window_capacity must be positive".into());
        }

        let t = &self.transition;
        if !(t.window_secs > 0.0) {
            return invalid(format!("transition.window_secs must be positive, got {}", t.window_secs));
        }
        if !(t.crossfade_secs >= 0.0) {
            return invalid(format!(
                "transition.crossfade_secs must be >= 0, got {}",
                t.crossfade_secs
            ));
        }
        if t.hop_length == 0 || t.n_fft == 0 {
            return invalid("transition.n_fft and transition.hop_length must be positive".into());
        }
        if !(t.peak_ceiling > 0.0 && t.peak_ceiling <= 1.0) {
            return invalid(format!(
                "transition.peak_ceiling must be in (0, 1], got {}",
                t.peak_ceiling
            ));
        }
        if !(t.reverb.decay_secs > 0.0 && t.reverb.room_size > 0.0) {
            return invalid("transition.reverb decay_secs and room_size must be positive".into());
        }
        if !(0.0..=1.0).contains(&t.reverb.damping) {
            return invalid(format!(
                "transition.reverb.damping must be in [0, 1], got {}",
                t.reverb.damping
            ));
        }
        if !(0.0..=1.0).contains(&t.scratch.position) {
            return invalid(format!(
                "transition.scratch.position must be in [0, 1], got {}",
                t.scratch.position
            ));
        }

        if t.strategy == Strategy::BeatSplice && t.window_secs <= 2.0 * t.guard_secs {
            log::warn!(
                "beat_splice needs window_secs > 2 * guard_secs ({} <= {}); transitions will fall back to linear",
                t.window_secs,
                2.0 * t.guard_secs
            );
        }
        Ok(())
    }

    pub fn catalog(&self) -> Catalog {
        Catalog::new(self.tracks.clone())
    }

    pub fn player_settings(&self) -> PlayerSettings {
        PlayerSettings {
            mood: self.mood.clone(),
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            seed: self.transition.seed,
        }
    }

    /// Get the config file path.
    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.sample_rate, 22050);
        assert_eq!(config.partition.trim_secs, 30.0);
        assert_eq!(config.mood.poll_interval_ms, 100);
        assert_eq!(config.mood.neutral, 0.5);
        assert_eq!(config.transition.window_secs, 2.0);
        assert_eq!(config.transition.strategy, Strategy::Linear);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_file() {
        let file = write_config(
            r#"
music_dir = "/music"

[[tracks]]
id = "gym.mp3"
energy = 0.9

[[tracks]]
id = "lana.mp3"
energy = 0.2

[transition]
strategy = "reverb_tail"

[transition.reverb]
decay_secs = 1.5

[mood]
url = "http://localhost:9000/get_mood"
"#,
        );
        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.music_dir, Some(PathBuf::from("/music")));
        assert_eq!(config.tracks.len(), 2);
        assert_eq!(config.tracks[1], CatalogEntry::new("lana.mp3", 0.2));
        assert_eq!(config.transition.strategy, Strategy::ReverbTail);
        assert_eq!(config.transition.reverb.decay_secs, 1.5);
        assert_eq!(config.transition.reverb.room_size, 0.8);
        assert_eq!(config.mood.url, "http://localhost:9000/get_mood");
        assert_eq!(config.mood.poll_interval_ms, 100);
        assert!(config.validate().is_ok());
        assert_eq!(config.catalog().len(), 2);
    }

    #[test]
    fn test_unparsable_file_is_an_error() {
        let file = write_config("tracks = 3");
        assert!(matches!(
            AppConfig::load_from(file.path()),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            AppConfig::load_from(Path::new("/definitely/not/here.toml")),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_ratios() {
        let mut config = AppConfig::default();
        config.partition.sample_ratio = 0.9;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_bad_energy_and_duplicates() {
        let mut config = AppConfig::default();
        config.tracks = vec![CatalogEntry::new("a", 1.5)];
        assert!(config.validate().is_err());

        config.tracks = vec![CatalogEntry::new("a", 0.5), CatalogEntry::new("a", 0.6)];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_poll_interval() {
        let mut config = AppConfig::default();
        config.mood.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_player_settings_carry_backoff() {
        let mut config = AppConfig::default();
        config.retry_backoff_ms = 250;
        assert_eq!(config.player_settings().retry_backoff, Duration::from_millis(250));
    }
}
