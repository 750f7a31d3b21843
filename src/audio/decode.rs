use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("symphonia decode error: {0}")]
    Symphonia(String),
    #[error("FLAC decode error: {0}")]
    Flac(String),
    #[error("No audio track in {0}")]
    NoAudioTrack(String),
    #[error("Resample error: {0}")]
    Resample(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mono samples at the file's native rate.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Load an audio file as mono, using claxon for FLAC
/// and symphonia for everything else.
pub fn load_audio(path: &Path) -> Result<DecodedAudio, DecodeError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    if !crate::SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(DecodeError::UnsupportedFormat(path.display().to_string()));
    }
    if ext == "flac" {
        load_flac(path)
    } else {
        load_via_symphonia(path, &ext)
    }
}

fn load_flac(path: &Path) -> Result<DecodedAudio, DecodeError> {
    let mut reader = claxon::FlacReader::open(path).map_err(|e| DecodeError::Flac(e.to_string()))?;
    let info = reader.streaminfo();
    let channels = info.channels.max(1) as usize;
    let scale = 1.0 / (1i64 << (info.bits_per_sample - 1)) as f32;

    let mut mono = Vec::with_capacity(info.samples.unwrap_or(0) as usize);
    let mut acc = 0.0f32;
    let mut ch = 0;
    for sample in reader.samples() {
        let s = sample.map_err(|e| DecodeError::Flac(e.to_string()))?;
        acc += s as f32 * scale;
        ch += 1;
        if ch == channels {
            mono.push(acc / channels as f32);
            acc = 0.0;
            ch = 0;
        }
    }

    Ok(DecodedAudio {
        samples: mono,
        sample_rate: info.sample_rate,
    })
}

fn load_via_symphonia(path: &Path, ext: &str) -> Result<DecodedAudio, DecodeError> {
    let file = std::fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if !ext.is_empty() {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| DecodeError::UnsupportedFormat(format!("{}: {e}", path.display())))?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| DecodeError::NoAudioTrack(path.display().to_string()))?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| DecodeError::Symphonia("unknown sample rate".to_string()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::Symphonia(e.to_string()))?;

    let mut mono = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(DecodeError::Symphonia(e.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            // Corrupt frames are skipped, matching what players do
            Err(SymphoniaError::DecodeError(e)) => {
                log::debug!("Skipping undecodable packet in {}: {e}", path.display());
                continue;
            }
            Err(e) => return Err(DecodeError::Symphonia(e.to_string())),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count().max(1);
        let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buf.copy_interleaved_ref(decoded);
        mono.extend(
            buf.samples()
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32),
        );
    }

    Ok(DecodedAudio {
        samples: mono,
        sample_rate,
    })
}

/// Resample a mono buffer in one pass.
pub fn resample(samples: &[f32], from: u32, to: u32) -> Result<Vec<f32>, DecodeError> {
    if from == to || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let params = SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler =
        SincFixedIn::<f32>::new(to as f64 / from as f64, 1.0, params, samples.len(), 1)
            .map_err(|e| DecodeError::Resample(e.to_string()))?;

    let mut out = resampler
        .process(&[samples], None)
        .map_err(|e| DecodeError::Resample(e.to_string()))?;

    Ok(out.pop().unwrap_or_default())
}
