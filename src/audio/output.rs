use crate::stop::StopSignal;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
    #[error("Sample rate changed mid-stream: {expected} Hz -> {got} Hz")]
    RateMismatch { expected: u32, got: u32 },
    #[error("Audio device error: {0}")]
    Device(String),
    #[error("Resample error: {0}")]
    Resample(String),
}

/// Something that renders mono sample buffers.
pub trait AudioSink: Send {
    /// Start rendering `samples` and return immediately.
    fn play(&mut self, samples: &[f32], sample_rate: u32) -> Result<(), OutputError>;

    /// Render `samples`, returning once the segment has finished.
    fn play_blocking(&mut self, samples: &[f32], sample_rate: u32) -> Result<(), OutputError>;
}

pub fn segment_duration(len: usize, sample_rate: u32) -> Duration {
    Duration::from_secs_f64(len as f64 / sample_rate as f64)
}

/// Renders in real time against the wall clock without an output device.
///
/// Segments queue back to back: a blocking call first waits out whatever a
/// previous non-blocking call started. A stop request halts the in-flight
/// segment within one sleep slice.
#[derive(Debug)]
pub struct ClockSink {
    stop: StopSignal,
    busy_until: Option<Instant>,
}

impl ClockSink {
    pub fn new(stop: StopSignal) -> Self {
        Self {
            stop,
            busy_until: None,
        }
    }

    fn drain(&mut self) {
        if let Some(until) = self.busy_until.take() {
            let now = Instant::now();
            if until > now {
                self.stop.sleep(until - now);
            }
        }
    }
}

impl AudioSink for ClockSink {
    fn play(&mut self, samples: &[f32], sample_rate: u32) -> Result<(), OutputError> {
        let start = match self.busy_until {
            Some(until) if until > Instant::now() => until,
            _ => Instant::now(),
        };
        self.busy_until = Some(start + segment_duration(samples.len(), sample_rate));
        Ok(())
    }

    fn play_blocking(&mut self, samples: &[f32], sample_rate: u32) -> Result<(), OutputError> {
        self.drain();
        if !self.stop.sleep(segment_duration(samples.len(), sample_rate)) {
            log::debug!("Segment halted by stop request");
        }
        Ok(())
    }
}

/// Records everything played into a mono 32-bit float WAV file.
pub struct WavSink {
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    sample_rate: u32,
}

impl WavSink {
    pub fn create(path: &Path, sample_rate: u32) -> Result<Self, OutputError> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let writer = hound::WavWriter::create(path, spec)?;
        Ok(Self {
            writer: Some(writer),
            sample_rate,
        })
    }

    fn write(&mut self, samples: &[f32], sample_rate: u32) -> Result<(), OutputError> {
        if sample_rate != self.sample_rate {
            return Err(OutputError::RateMismatch {
                expected: self.sample_rate,
                got: sample_rate,
            });
        }
        if let Some(writer) = self.writer.as_mut() {
            for &s in samples {
                writer.write_sample(s.clamp(-1.0, 1.0))?;
            }
        }
        Ok(())
    }

    /// Flush and fix up the WAV header.
    pub fn finalize(mut self) -> Result<(), OutputError> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
        }
        Ok(())
    }
}

impl AudioSink for WavSink {
    fn play(&mut self, samples: &[f32], sample_rate: u32) -> Result<(), OutputError> {
        self.write(samples, sample_rate)
    }

    fn play_blocking(&mut self, samples: &[f32], sample_rate: u32) -> Result<(), OutputError> {
        self.write(samples, sample_rate)
    }
}

/// Fans a segment out to several sinks. The last sink decides blocking
/// behavior; the others are fed through their non-blocking path first.
pub struct TeeSink {
    sinks: Vec<Box<dyn AudioSink>>,
}

impl TeeSink {
    pub fn new(sinks: Vec<Box<dyn AudioSink>>) -> Self {
        Self { sinks }
    }
}

impl AudioSink for TeeSink {
    fn play(&mut self, samples: &[f32], sample_rate: u32) -> Result<(), OutputError> {
        for sink in &mut self.sinks {
            sink.play(samples, sample_rate)?;
        }
        Ok(())
    }

    fn play_blocking(&mut self, samples: &[f32], sample_rate: u32) -> Result<(), OutputError> {
        let Some((last, rest)) = self.sinks.split_last_mut() else {
            return Ok(());
        };
        for sink in rest {
            sink.play(samples, sample_rate)?;
        }
        last.play_blocking(samples, sample_rate)
    }
}
