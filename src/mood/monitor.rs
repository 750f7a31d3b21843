use super::{MoodError, MoodSource};
use crate::stop::StopSignal;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Readings kept while nobody is consuming.
const BACKLOG: usize = 16;

/// Polls a slow source on its own thread and hands readings over a channel.
///
/// The channel keeps only the most recent readings, so a consumer that was
/// idle for a while sees fresh values rather than a stale backlog. A failed
/// poll is sent as `None`. As a [`MoodSource`] it reports the newest reading,
/// or unavailable if the newest poll failed.
pub struct MoodMonitor {
    readings: Receiver<Option<f64>>,
    latest: Mutex<Option<Option<f64>>>,
    stop: StopSignal,
    handle: Option<JoinHandle<()>>,
}

impl MoodMonitor {
    pub fn spawn(source: Arc<dyn MoodSource>, interval: Duration) -> std::io::Result<Self> {
        let (tx, rx) = bounded(BACKLOG);
        let stop = StopSignal::new();
        let handle = {
            let stop = stop.clone();
            let overflow = rx.clone();
            std::thread::Builder::new()
                .name("mood-monitor".into())
                .spawn(move || poll_loop(source.as_ref(), interval, &tx, &overflow, &stop))?
        };

        Ok(Self {
            readings: rx,
            latest: Mutex::new(None),
            stop,
            handle: Some(handle),
        })
    }

    /// The channel of raw readings, `None` for a failed poll.
    pub fn readings(&self) -> &Receiver<Option<f64>> {
        &self.readings
    }

    /// Stop polling and wait for the thread to exit.
    pub fn shutdown(&mut self) {
        self.stop.request();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("mood-monitor thread panicked");
            }
        }
    }
}

fn poll_loop(
    source: &dyn MoodSource,
    interval: Duration,
    tx: &Sender<Option<f64>>,
    overflow: &Receiver<Option<f64>>,
    stop: &StopSignal,
) {
    while !stop.is_requested() {
        let reading = match source.poll() {
            Ok(mood) => Some(mood),
            Err(e) => {
                log::debug!("mood-monitor: {e}");
                None
            }
        };
        if let Err(TrySendError::Full(reading)) = tx.try_send(reading) {
            // Drop the oldest reading to make room
            let _ = overflow.try_recv();
            let _ = tx.try_send(reading);
        }
        stop.sleep(interval);
    }
    log::debug!("mood-monitor stopped");
}

impl MoodSource for MoodMonitor {
    fn poll(&self) -> Result<f64, MoodError> {
        let newest = self.readings.try_iter().last();
        let mut latest = self
            .latest
            .lock()
            .map_err(|_| MoodError::Unavailable("mood monitor state poisoned".into()))?;
        if let Some(reading) = newest {
            *latest = Some(reading);
        }
        match *latest {
            Some(Some(mood)) => Ok(mood),
            Some(None) => Err(MoodError::Unavailable("mood source stopped responding".into())),
            None => Err(MoodError::Unavailable("no mood reading yet".into())),
        }
    }
}

impl Drop for MoodMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
