//! Sample-rate conversion for the ingestion path using rubato
//!
//! The pipelines run at one fixed rate; uploads recorded at any other rate are
//! brought to it here before they reach the normalizer.

use rubato::{
    FastFixedIn, PolynomialDegree, Resampler as RubatoResampler, SincFixedIn,
    SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use super::AudioBuffer;
use crate::error::{Result, ShieldError};

const CHUNK_SIZE: usize = 1024;

/// Resampling quality preset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResampleQuality {
    /// Cubic polynomial interpolation
    Fast,
    /// Windowed sinc interpolation
    #[default]
    Sinc,
}

/// Audio resampler
#[derive(Debug, Clone, Copy, Default)]
pub struct Resampler {
    quality: ResampleQuality,
}

impl Resampler {
    /// Create a new resampler
    pub fn new(quality: ResampleQuality) -> Self {
        Self { quality }
    }

    /// Resample audio to a target sample rate
    ///
    /// The output length is `round(len * target / source)`; the resampler's
    /// startup delay is removed so sample `i` of the output lines up with time
    /// `i / target` of the input.
    pub fn resample(&self, audio: &AudioBuffer, target_rate: u32) -> Result<AudioBuffer> {
        audio.validate()?;
        if target_rate == 0 {
            return Err(ShieldError::Config("target sample rate is zero".into()));
        }
        if audio.sample_rate == target_rate {
            return Ok(audio.clone());
        }

        let ratio = target_rate as f64 / audio.sample_rate as f64;
        let expected = (audio.len() as f64 * ratio).round() as usize;

        let output = match self.quality {
            ResampleQuality::Fast => {
                let mut resampler =
                    FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, CHUNK_SIZE, 1)
                        .map_err(|e| ShieldError::Config(format!("resampler: {}", e)))?;
                run_chunks(&mut resampler, &audio.samples, expected)?
            }
            ResampleQuality::Sinc => {
                let params = SincInterpolationParameters {
                    sinc_len: 128,
                    f_cutoff: 0.95,
                    interpolation: SincInterpolationType::Linear,
                    oversampling_factor: 128,
                    window: WindowFunction::BlackmanHarris2,
                };
                let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, CHUNK_SIZE, 1)
                    .map_err(|e| ShieldError::Config(format!("resampler: {}", e)))?;
                run_chunks(&mut resampler, &audio.samples, expected)?
            }
        };

        tracing::debug!(
            "Resampled {} -> {} Hz ({} -> {} samples)",
            audio.sample_rate,
            target_rate,
            audio.len(),
            output.len()
        );

        Ok(AudioBuffer::new(output, target_rate))
    }
}

/// Feed fixed-size chunks (zero-padding the tail) and flush until `expected`
/// samples past the resampler delay have been produced.
fn run_chunks<R: RubatoResampler<f32>>(
    resampler: &mut R,
    samples: &[f32],
    expected: usize,
) -> Result<Vec<f32>> {
    let delay = resampler.output_delay();
    let mut output = Vec::with_capacity(expected + delay);
    let mut pos = 0;

    while output.len() < expected + delay {
        let mut chunk = vec![0.0f32; CHUNK_SIZE];
        if pos < samples.len() {
            let end = (pos + CHUNK_SIZE).min(samples.len());
            chunk[..end - pos].copy_from_slice(&samples[pos..end]);
        }
        pos += CHUNK_SIZE;

        let result = resampler
            .process(&[chunk], None)
            .map_err(|e| ShieldError::MalformedAudio(format!("resampling failed: {}", e)))?;
        if let Some(channel) = result.first() {
            output.extend_from_slice(channel);
        }
    }

    Ok(output.into_iter().skip(delay).take(expected).collect())
}

/// Convenience function to resample audio with the default quality
pub fn resample(audio: &AudioBuffer, target_rate: u32) -> Result<AudioBuffer> {
    Resampler::default().resample(audio, target_rate)
}
