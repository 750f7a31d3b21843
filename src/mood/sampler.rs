use super::{MoodSettings, MoodSource};
use crate::stop::StopSignal;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Bounded window of mood readings. The oldest reading is dropped when full.
#[derive(Debug, Clone)]
pub struct MoodWindow {
    readings: VecDeque<f64>,
    capacity: usize,
}

impl MoodWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            readings: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, reading: f64) {
        if self.readings.len() == self.capacity {
            self.readings.pop_front();
        }
        self.readings.push_back(reading);
    }

    pub fn clear(&mut self) {
        self.readings.clear();
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Arithmetic mean, `None` for an empty window.
    pub fn mean(&self) -> Option<f64> {
        if self.readings.is_empty() {
            None
        } else {
            Some(self.readings.iter().sum::<f64>() / self.readings.len() as f64)
        }
    }
}

/// Polls a [`MoodSource`] at a fixed cadence and reduces each window to its mean.
pub struct MoodSampler {
    source: Arc<dyn MoodSource>,
    poll_interval: Duration,
    neutral: f64,
    window: MoodWindow,
}

impl MoodSampler {
    pub fn new(source: Arc<dyn MoodSource>, settings: &MoodSettings) -> Self {
        Self {
            source,
            poll_interval: Duration::from_millis(settings.poll_interval_ms.max(1)),
            neutral: settings.neutral,
            window: MoodWindow::new(settings.window_capacity),
        }
    }

    /// Sample for `duration` (or until `stop` is requested) and return the mean
    /// mood. Failed polls count as the neutral value.
    pub fn sample(&mut self, duration: Duration, stop: &StopSignal) -> f64 {
        self.window.clear();
        let deadline = Instant::now() + duration;

        loop {
            let reading = match self.source.poll() {
                Ok(mood) => mood,
                Err(e) => {
                    log::debug!("{e}; recording neutral mood {}", self.neutral);
                    self.neutral
                }
            };
            self.window.push(reading);

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            if !stop.sleep(self.poll_interval.min(deadline - now)) {
                break;
            }
            if Instant::now() >= deadline {
                break;
            }
        }

        let mood = self.window.mean().unwrap_or(self.neutral);
        log::info!(
            "Sampled mood {:.3} from {} readings over {:.1}s",
            mood,
            self.window.len(),
            duration.as_secs_f64()
        );
        mood
    }

    pub fn window(&self) -> &MoodWindow {
        &self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mood::{ConstantMoodSource, MoodError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Alternating(AtomicUsize);

    impl MoodSource for Alternating {
        fn poll(&self) -> Result<f64, MoodError> {
            let n = self.0.fetch_add(1, Ordering::SeqCst);
            Ok(if n % 2 == 0 { 0.0 } else { 1.0 })
        }
    }

    struct Down;

    impl MoodSource for Down {
        fn poll(&self) -> Result<f64, MoodError> {
            Err(MoodError::Unavailable("offline".into()))
        }
    }

    fn settings(poll_interval_ms: u64) -> MoodSettings {
        MoodSettings {
            poll_interval_ms,
            ..Default::default()
        }
    }

    #[test]
    fn test_window_drops_oldest() {
        let mut window = MoodWindow::new(3);
        for r in [1.0, 1.0, 0.0, 0.0, 0.0] {
            window.push(r);
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.mean(), Some(0.0));
        window.clear();
        assert_eq!(window.mean(), None);
    }

    #[test]
    fn test_alternating_source_averages_to_half() {
        let mut sampler = MoodSampler::new(Arc::new(Alternating(AtomicUsize::new(0))), &settings(100));
        let mood = sampler.sample(Duration::from_secs(1), &StopSignal::new());
        assert!((mood - 0.5).abs() <= 0.1, "mood {mood}");
        assert!(sampler.window().len() >= 9);
    }

    #[test]
    fn test_failed_polls_record_neutral() {
        let mut sampler = MoodSampler::new(Arc::new(Down), &settings(10));
        let mood = sampler.sample(Duration::from_millis(50), &StopSignal::new());
        assert_eq!(mood, 0.5);
        assert!(!sampler.window().is_empty());
    }

    #[test]
    fn test_stop_ends_window_early() {
        let stop = StopSignal::new();
        stop.request();
        let mut sampler = MoodSampler::new(Arc::new(ConstantMoodSource(0.8)), &settings(100));
        let start = Instant::now();
        let mood = sampler.sample(Duration::from_secs(10), &stop);
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(mood, 0.8);
    }

    #[test]
    fn test_window_is_cleared_between_samples() {
        let mut sampler = MoodSampler::new(Arc::new(ConstantMoodSource(0.3)), &settings(10));
        sampler.sample(Duration::from_millis(30), &StopSignal::new());
        let first = sampler.window().len();
        sampler.sample(Duration::from_millis(30), &StopSignal::new());
        assert!(sampler.window().len() <= first + 2);
        assert!((sampler.window().mean().unwrap() - 0.3).abs() < 1e-12);
    }
}
