//! Audio buffer and WAV I/O
//!
//! The inference core only ever sees decoded PCM in an [`AudioBuffer`]; WAV
//! decoding lives here for the command-line ingestion path and tests.

use candle_core::{Device, Tensor};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::Path;

use crate::error::{Result, ShieldError};

/// Audio buffer holding raw mono waveform data
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    /// Mono audio samples, nominally in [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioBuffer {
    /// Create a new audio buffer
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Convert to a Candle tensor of shape [samples]
    pub fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        Ok(Tensor::new(self.samples.as_slice(), device)?)
    }

    /// Duration in seconds
    pub fn duration(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Reject buffers the pipeline cannot process
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(ShieldError::MalformedAudio("sample rate is zero".into()));
        }
        if self.samples.is_empty() {
            return Err(ShieldError::MalformedAudio("audio buffer is empty".into()));
        }
        if let Some(pos) = self.samples.iter().position(|s| !s.is_finite()) {
            return Err(ShieldError::MalformedAudio(format!(
                "non-finite sample at index {}",
                pos
            )));
        }
        Ok(())
    }

    /// Save to WAV file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        save_wav(path, &self.samples, self.sample_rate)
    }

    /// Load from WAV file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        load_wav(path)
    }
}

fn wav_error(path: &Path, err: hound::Error) -> ShieldError {
    match err {
        hound::Error::IoError(e) => ShieldError::Io(e),
        other => ShieldError::MalformedAudio(format!("{}: {}", path.display(), other)),
    }
}

/// Load a WAV file into an AudioBuffer, downmixing to mono
pub fn load_wav<P: AsRef<Path>>(path: P) -> Result<AudioBuffer> {
    let path = path.as_ref();
    let reader = WavReader::open(path).map_err(|e| wav_error(path, e))?;

    let spec = reader.spec();
    let sample_rate = spec.sample_rate;
    let channels = spec.channels as usize;

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| wav_error(path, e))?,
        SampleFormat::Int => {
            let bits = spec.bits_per_sample;
            let max_val = (1i64 << (bits - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| wav_error(path, e))?
        }
    };

    let mono_samples = if channels > 1 {
        samples
            .chunks(channels)
            .map(|chunk| chunk.iter().sum::<f32>() / chunk.len() as f32)
            .collect()
    } else {
        samples
    };

    tracing::debug!(
        "Loaded {} ({} Hz, {} channel(s), {} mono samples)",
        path.display(),
        sample_rate,
        channels,
        mono_samples.len()
    );

    Ok(AudioBuffer::new(mono_samples, sample_rate))
}

/// Save samples to a 32-bit float WAV file
pub fn save_wav<P: AsRef<Path>>(path: P, samples: &[f32], sample_rate: u32) -> Result<()> {
    let path = path.as_ref();
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };

    let mut writer = WavWriter::create(path, spec).map_err(|e| wav_error(path, e))?;
    for &sample in samples {
        writer.write_sample(sample).map_err(|e| wav_error(path, e))?;
    }
    writer.finalize().map_err(|e| wav_error(path, e))?;
    Ok(())
}
