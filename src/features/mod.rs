//! Acoustic descriptor extraction
//!
//! [`FeatureExtractor`] computes the fixed set of ten descriptors in one
//! pass over a [`NormalizedAudio`] clip. All STFT-based descriptors share a
//! single centered transform so their frame grids line up.

pub mod chroma;
mod matrix;
pub mod mel;
pub mod pitch;
pub mod spectral;
mod standardize;
pub mod stft;

use std::fmt;
use std::str::FromStr;

pub use matrix::FeatureMatrix;
pub use standardize::{standardize, standardize_series, time_average, StandardizedFeature};

use crate::audio::NormalizedAudio;
use crate::config::FeatureConfig;
use crate::error::{Result, ShieldError};
use chroma::ChromaFilterbank;
use mel::MelFilterbank;
use pitch::Yin;
use stft::Stft;

/// One of the fixed descriptors, in fusion order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FeatureKind {
    Mfcc,
    Chroma,
    Tonnetz,
    SpectralContrast,
    Pitch,
    Energy,
    Zcr,
    OnsetStrength,
    SpectralCentroid,
    MelSpectrogram,
}

impl FeatureKind {
    /// Every descriptor in the order the deepfake fusion vector expects
    pub const ALL: [FeatureKind; 10] = [
        FeatureKind::Mfcc,
        FeatureKind::Chroma,
        FeatureKind::Tonnetz,
        FeatureKind::SpectralContrast,
        FeatureKind::Pitch,
        FeatureKind::Energy,
        FeatureKind::Zcr,
        FeatureKind::OnsetStrength,
        FeatureKind::SpectralCentroid,
        FeatureKind::MelSpectrogram,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FeatureKind::Mfcc => "mfcc",
            FeatureKind::Chroma => "chroma",
            FeatureKind::Tonnetz => "tonnetz",
            FeatureKind::SpectralContrast => "spectral_contrast",
            FeatureKind::Pitch => "pitch",
            FeatureKind::Energy => "energy",
            FeatureKind::Zcr => "zcr",
            FeatureKind::OnsetStrength => "onset_strength",
            FeatureKind::SpectralCentroid => "spectral_centroid",
            FeatureKind::MelSpectrogram => "mel_spectrogram",
        }
    }
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FeatureKind {
    type Err = ShieldError;

    fn from_str(s: &str) -> Result<Self> {
        FeatureKind::ALL
            .iter()
            .copied()
            .find(|k| k.name() == s)
            .ok_or_else(|| ShieldError::Config(format!("unknown feature '{}'", s)))
    }
}

/// All ten descriptors of one clip, each in its native shape
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMap {
    /// (n_mfcc, T)
    pub mfcc: FeatureMatrix,
    /// (12, T)
    pub chroma: FeatureMatrix,
    /// (6, T)
    pub tonnetz: FeatureMatrix,
    /// (contrast_bands + 1, T)
    pub spectral_contrast: FeatureMatrix,
    /// (1, T), Hz
    pub pitch: FeatureMatrix,
    /// (1, T), frame RMS
    pub energy: FeatureMatrix,
    /// (1, T)
    pub zcr: FeatureMatrix,
    /// (1, T)
    pub onset_strength: FeatureMatrix,
    /// (1, T), Hz
    pub spectral_centroid: FeatureMatrix,
    /// (n_mels, T), power
    pub mel_spectrogram: FeatureMatrix,
}

impl FeatureMap {
    pub fn get(&self, kind: FeatureKind) -> &FeatureMatrix {
        match kind {
            FeatureKind::Mfcc => &self.mfcc,
            FeatureKind::Chroma => &self.chroma,
            FeatureKind::Tonnetz => &self.tonnetz,
            FeatureKind::SpectralContrast => &self.spectral_contrast,
            FeatureKind::Pitch => &self.pitch,
            FeatureKind::Energy => &self.energy,
            FeatureKind::Zcr => &self.zcr,
            FeatureKind::OnsetStrength => &self.onset_strength,
            FeatureKind::SpectralCentroid => &self.spectral_centroid,
            FeatureKind::MelSpectrogram => &self.mel_spectrogram,
        }
    }

    /// Descriptors in fusion order
    pub fn iter(&self) -> impl Iterator<Item = (FeatureKind, &FeatureMatrix)> {
        FeatureKind::ALL.into_iter().map(move |k| (k, self.get(k)))
    }

    /// First descriptor holding a NaN or infinity, if any
    fn first_non_finite(&self) -> Option<FeatureKind> {
        self.iter().find(|(_, m)| !m.is_finite()).map(|(k, _)| k)
    }
}

/// Descriptor extractor with precomputed filterbanks
///
/// Holds no per-call state; one instance can serve concurrent callers.
pub struct FeatureExtractor {
    sample_rate: u32,
    config: FeatureConfig,
    stft: Stft,
    mel: MelFilterbank,
    chroma: ChromaFilterbank,
    yin: Yin,
    freqs: Vec<f32>,
}

impl FeatureExtractor {
    pub fn new(sample_rate: u32, config: &FeatureConfig) -> Result<Self> {
        let stft = Stft::new(config.n_fft, config.hop_length);
        let yin = Yin::new(
            sample_rate,
            config.pitch_fmin,
            config.pitch_fmax,
            config.n_fft,
            config.hop_length,
            config.yin_threshold,
        )?;
        Ok(Self {
            sample_rate,
            config: config.clone(),
            mel: MelFilterbank::new(sample_rate, config.n_fft, config.n_mels, 0.0, None),
            chroma: ChromaFilterbank::new(sample_rate, config.n_fft, config.n_chroma),
            freqs: stft.bin_frequencies(sample_rate),
            stft,
            yin,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Compute every descriptor, or fail as a whole
    pub fn extract(&self, audio: &NormalizedAudio) -> Result<FeatureMap> {
        if audio.sample_rate() != self.sample_rate {
            return Err(ShieldError::MalformedAudio(format!(
                "extractor runs at {} Hz, clip is {} Hz",
                self.sample_rate,
                audio.sample_rate()
            )));
        }
        let samples = audio.samples();
        let cfg = &self.config;

        let spectrum = self.stft.forward(samples);
        let magnitude = spectrum.magnitude();
        let power = spectrum.power();

        let mel_spectrogram = self.mel.apply(&power);
        let mfcc = mel::mfcc(&mel_spectrogram, cfg.n_mfcc);
        let chroma = self.chroma.apply(&power);
        let harmonic = chroma::harmonic_power(&spectrum, cfg.hpss_kernel);
        let tonnetz = chroma::tonnetz(&self.chroma.apply(&harmonic));
        let spectral_contrast = spectral::spectral_contrast(
            &magnitude,
            &self.freqs,
            cfg.contrast_fmin,
            cfg.contrast_bands,
        )?;
        let pitch = self.yin.estimate(samples);
        let energy = spectral::rms(samples, cfg.n_fft, cfg.hop_length);
        let zcr = spectral::zero_crossing_rate(samples, cfg.n_fft, cfg.hop_length);
        let onset_strength = spectral::onset_strength(&mel_spectrogram, cfg.n_fft, cfg.hop_length);
        let spectral_centroid = spectral::spectral_centroid(&magnitude, &self.freqs);

        let features = FeatureMap {
            mfcc,
            chroma,
            tonnetz,
            spectral_contrast,
            pitch,
            energy,
            zcr,
            onset_strength,
            spectral_centroid,
            mel_spectrogram,
        };

        if let Some(kind) = features.first_non_finite() {
            return Err(ShieldError::extraction(kind.name(), "non-finite value"));
        }

        tracing::debug!(
            "Extracted features: {}",
            features
                .iter()
                .map(|(k, m)| format!("{}={:?}", k, m.shape()))
                .collect::<Vec<_>>()
                .join(" ")
        );

        Ok(features)
    }
}
