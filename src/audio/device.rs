//! Sound card output.
//!
//! The cpal stream is owned by a dedicated audio thread, because cpal's
//! `Stream` is not `Send` on every platform. The control thread and the
//! output callback share a [`SampleQueue`] of interleaved frames.
//! [`DeviceSink`] needs the `device` feature.

use super::output::OutputError;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Interleaved frames waiting for the output callback.
#[derive(Debug)]
pub struct SampleQueue {
    channels: usize,
    samples: Mutex<VecDeque<f32>>,
}

impl SampleQueue {
    pub fn new(channels: usize) -> Self {
        Self {
            channels: channels.max(1),
            samples: Mutex::new(VecDeque::new()),
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Queue mono samples, copying each one to every channel.
    pub fn push_mono(&self, mono: &[f32]) -> Result<(), OutputError> {
        let mut queue = self
            .samples
            .lock()
            .map_err(|_| OutputError::Device("sample queue poisoned".into()))?;
        queue.reserve(mono.len() * self.channels);
        for &s in mono {
            queue.extend(std::iter::repeat_n(s, self.channels));
        }
        Ok(())
    }

    /// Fill an output buffer from the queue, padding with silence once it runs
    /// dry. Returns how many queued samples were written.
    pub fn fill(&self, output: &mut [f32]) -> usize {
        let Ok(mut queue) = self.samples.lock() else {
            output.fill(0.0);
            return 0;
        };
        let mut written = 0;
        for slot in output.iter_mut() {
            match queue.pop_front() {
                Some(s) => {
                    *slot = s;
                    written += 1;
                }
                None => *slot = 0.0,
            }
        }
        written
    }

    /// Samples not yet handed to the device.
    pub fn pending(&self) -> usize {
        self.samples.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn clear(&self) {
        if let Ok(mut queue) = self.samples.lock() {
            queue.clear();
        }
    }
}

#[cfg(feature = "device")]
pub use sink::DeviceSink;

#[cfg(feature = "device")]
mod sink {
    use super::SampleQueue;
    use crate::audio::decode::resample;
    use crate::audio::output::{AudioSink, OutputError};
    use crate::stop::StopSignal;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use crossbeam_channel::{Sender, bounded};
    use std::sync::Arc;
    use std::thread::JoinHandle;
    use std::time::Duration;

    /// How often a blocking play checks whether the queue has drained.
    const DRAIN_POLL: Duration = Duration::from_millis(10);

    /// Plays through the default output device.
    ///
    /// Segments are resampled to the device rate when they differ and queued
    /// back to back, so consecutive segments play without a gap.
    pub struct DeviceSink {
        queue: Arc<SampleQueue>,
        device_rate: u32,
        stop: StopSignal,
        shutdown: Option<Sender<()>>,
        handle: Option<JoinHandle<()>>,
    }

    impl DeviceSink {
        /// Open the default output device and start its stream.
        pub fn open(stop: StopSignal) -> Result<Self, OutputError> {
            let (ready_tx, ready_rx) = bounded::<Result<(u32, Arc<SampleQueue>), OutputError>>(1);
            let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

            let handle = std::thread::Builder::new()
                .name("audio-output".into())
                .spawn(move || {
                    let stream = match build_stream() {
                        Ok((stream, rate, queue)) => {
                            let _ = ready_tx.send(Ok((rate, queue)));
                            stream
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    // Hold the stream until the sink goes away
                    let _ = shutdown_rx.recv();
                    drop(stream);
                    log::debug!("audio-output stopped");
                })
                .map_err(|e| OutputError::Device(format!("failed to spawn audio thread: {e}")))?;

            let (device_rate, queue) = ready_rx
                .recv()
                .map_err(|_| OutputError::Device("audio thread exited during setup".into()))??;
            log::info!(
                "Output device running at {} Hz, {} channels",
                device_rate,
                queue.channels()
            );

            Ok(Self {
                queue,
                device_rate,
                stop,
                shutdown: Some(shutdown_tx),
                handle: Some(handle),
            })
        }

        pub fn device_rate(&self) -> u32 {
            self.device_rate
        }
    }

    fn build_stream() -> Result<(cpal::Stream, u32, Arc<SampleQueue>), OutputError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| OutputError::Device("no output device".into()))?;
        let supported = device
            .default_output_config()
            .map_err(|e| OutputError::Device(e.to_string()))?;
        let rate = supported.sample_rate();
        let config = supported.config();

        let queue = Arc::new(SampleQueue::new(config.channels as usize));
        let callback_queue = Arc::clone(&queue);
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    callback_queue.fill(data);
                },
                |err| log::error!("Audio stream error: {err}"),
                None,
            )
            .map_err(|e| OutputError::Device(e.to_string()))?;
        stream.play().map_err(|e| OutputError::Device(e.to_string()))?;
        Ok((stream, rate, queue))
    }

    impl AudioSink for DeviceSink {
        fn play(&mut self, samples: &[f32], sample_rate: u32) -> Result<(), OutputError> {
            if sample_rate == self.device_rate {
                self.queue.push_mono(samples)
            } else {
                let converted = resample(samples, sample_rate, self.device_rate)
                    .map_err(|e| OutputError::Resample(e.to_string()))?;
                self.queue.push_mono(&converted)
            }
        }

        fn play_blocking(&mut self, samples: &[f32], sample_rate: u32) -> Result<(), OutputError> {
            self.play(samples, sample_rate)?;
            while self.queue.pending() > 0 {
                if !self.stop.sleep(DRAIN_POLL) {
                    self.queue.clear();
                    log::debug!("Segment halted by stop request");
                    break;
                }
            }
            Ok(())
        }
    }

    impl Drop for DeviceSink {
        fn drop(&mut self) {
            self.shutdown.take();
            if let Some(handle) = self.handle.take() {
                if handle.join().is_err() {
                    log::warn!("audio-output thread panicked");
                }
            }
        }
    }
}
