//! Inference entry points
//!
//! Each pipeline owns a normalizer, a feature extractor and a shared handle
//! to its model. None of them hold per-call state, so a pipeline can be
//! wrapped in an `Arc` and called from any number of threads.

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use candle_core::Device;

use crate::audio::{AudioBuffer, AudioNormalizer};
use crate::config::{PipelineConfig, ShieldConfig};
use crate::decision::{self, AuthenticityLabel, IdentityEmbedding, VerificationOutcome};
use crate::error::{Result, ShieldError};
use crate::features::{FeatureExtractor, FeatureMap};
use crate::models::{DeepfakeModel, ModelBundle, SpeakerModel};
use crate::store::{ReferenceEmbedding, ReferenceStore};

/// Tolerance when deciding whether an embedding is unit length
const UNIT_NORM_TOLERANCE: f32 = 1e-3;

/// Output of the authenticity pipeline
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AuthenticityResult {
    pub label: AuthenticityLabel,
    /// Bona fide probability in [0, 1]
    pub confidence: f32,
}

/// Shared front half of both pipelines: normalize then extract
struct FeatureFrontEnd {
    normalizer: AudioNormalizer,
    extractor: FeatureExtractor,
}

impl FeatureFrontEnd {
    fn new(config: &PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            normalizer: AudioNormalizer::new(config)?,
            extractor: FeatureExtractor::new(config.sample_rate, &config.features)?,
        })
    }

    fn features(&self, audio: &AudioBuffer) -> Result<FeatureMap> {
        let start = Instant::now();
        let normalized = self.normalizer.normalize(audio)?;
        let normalized_at = start.elapsed();
        let features = self.extractor.extract(&normalized)?;
        tracing::debug!(
            "Front end: normalize {:.1}ms, extract {:.1}ms",
            normalized_at.as_secs_f64() * 1000.0,
            (start.elapsed() - normalized_at).as_secs_f64() * 1000.0
        );
        Ok(features)
    }
}

fn check_shape(config: &PipelineConfig, model_shape: (usize, usize), model: &str) -> Result<()> {
    if config.target_shape != model_shape {
        return Err(ShieldError::Config(format!(
            "pipeline target_shape {:?} does not match {} model input {:?}",
            config.target_shape, model, model_shape
        )));
    }
    Ok(())
}

/// Audio -> bona fide probability -> label
pub struct AuthenticityPipeline {
    config: PipelineConfig,
    front: FeatureFrontEnd,
    model: Arc<DeepfakeModel>,
}

impl AuthenticityPipeline {
    pub fn new(config: PipelineConfig, model: Arc<DeepfakeModel>) -> Result<Self> {
        check_shape(&config, model.feature_shape(), "deepfake")?;
        Ok(Self {
            front: FeatureFrontEnd::new(&config)?,
            config,
            model,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn model(&self) -> &Arc<DeepfakeModel> {
        &self.model
    }

    pub fn normalizer(&self) -> &AudioNormalizer {
        &self.front.normalizer
    }

    pub fn extractor(&self) -> &FeatureExtractor {
        &self.front.extractor
    }

    /// Normalize and extract without running the model
    pub fn features(&self, audio: &AudioBuffer) -> Result<FeatureMap> {
        self.front.features(audio)
    }

    pub fn detect(&self, audio: &AudioBuffer) -> Result<AuthenticityResult> {
        let features = self.front.features(audio)?;
        let start = Instant::now();
        let confidence = self.model.forward(&features)?;
        let label = decision::classify(confidence);
        tracing::debug!(
            "Authenticity: {} ({:.4}) in {:.1}ms",
            label,
            confidence,
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(AuthenticityResult { label, confidence })
    }
}

/// Audio -> speaker embedding -> similarity against a reference
pub struct IdentityPipeline {
    config: PipelineConfig,
    front: FeatureFrontEnd,
    model: Arc<SpeakerModel>,
}

impl IdentityPipeline {
    pub fn new(config: PipelineConfig, model: Arc<SpeakerModel>) -> Result<Self> {
        check_shape(&config, model.feature_shape(), "speaker")?;
        let f = &config.features;
        let m = model.config();
        let widths = [
            ("n_mfcc", f.n_mfcc, m.n_mfcc),
            ("n_chroma", f.n_chroma, m.n_chroma),
            ("contrast_bands + 1", f.contrast_bands + 1, m.n_contrast),
        ];
        for (name, extracted, expected) in widths {
            if extracted != expected {
                return Err(ShieldError::Config(format!(
                    "{} is {} but the speaker model expects {}",
                    name, extracted, expected
                )));
            }
        }
        Ok(Self {
            front: FeatureFrontEnd::new(&config)?,
            config,
            model,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn model(&self) -> &Arc<SpeakerModel> {
        &self.model
    }

    pub fn threshold(&self) -> f32 {
        self.config.similarity_threshold
    }

    /// Normalize and extract without running the model
    pub fn features(&self, audio: &AudioBuffer) -> Result<FeatureMap> {
        self.front.features(audio)
    }

    pub fn embed(&self, audio: &AudioBuffer) -> Result<IdentityEmbedding> {
        let features = self.front.features(audio)?;
        let start = Instant::now();
        let embedding = self
            .model
            .forward(&features, self.config.normalize_embedding)?;
        tracing::debug!(
            "Embedding: dim {} in {:.1}ms",
            embedding.len(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(IdentityEmbedding::new(embedding))
    }

    /// Embed `audio` and compare it with `reference` at `threshold`
    pub fn verify(
        &self,
        audio: &AudioBuffer,
        reference: &ReferenceEmbedding,
        threshold: f32,
    ) -> Result<VerificationOutcome> {
        if reference.embedding.is_empty() {
            return Err(ShieldError::ReferenceNotFound(reference.identity.clone()));
        }
        let embedding = self.embed(audio)?;
        self.check_normalization(reference);
        let outcome = decision::verify(embedding.as_slice(), reference.as_slice(), threshold)?;
        tracing::debug!(
            "Verification of {}: similarity {:.4}, confirmed {}",
            reference.identity,
            outcome.similarity,
            outcome.confirmed
        );
        Ok(outcome)
    }

    /// Average several utterances into one reference for `identity`
    pub fn enroll(
        &self,
        identity: impl Into<String>,
        clips: &[AudioBuffer],
    ) -> Result<ReferenceEmbedding> {
        if clips.is_empty() {
            return Err(ShieldError::MalformedAudio(
                "enrollment needs at least one clip".to_string(),
            ));
        }
        let embeddings = clips
            .iter()
            .map(|clip| self.embed(clip))
            .collect::<Result<Vec<_>>>()?;
        let mean = decision::average_embeddings(&embeddings, self.config.normalize_embedding)?;
        let identity = identity.into();
        tracing::info!("Enrolled {} from {} clips", identity, clips.len());
        Ok(ReferenceEmbedding::new(identity, mean))
    }

    fn check_normalization(&self, reference: &ReferenceEmbedding) {
        let unit = (reference.embedding.norm() - 1.0).abs() <= UNIT_NORM_TOLERANCE;
        if unit != self.config.normalize_embedding {
            tracing::warn!(
                "Reference {} has norm {:.4} but this pipeline {} embeddings",
                reference.identity,
                reference.embedding.norm(),
                if self.config.normalize_embedding {
                    "normalizes"
                } else {
                    "does not normalize"
                }
            );
        }
    }
}

/// Both pipelines behind one facade
pub struct AudioShield {
    authenticity: AuthenticityPipeline,
    identity: IdentityPipeline,
}

impl AudioShield {
    pub fn new(config: ShieldConfig, models: &ModelBundle) -> Result<Self> {
        Ok(Self {
            authenticity: AuthenticityPipeline::new(
                config.authenticity,
                Arc::clone(models.deepfake()),
            )?,
            identity: IdentityPipeline::new(config.identity, Arc::clone(models.speaker()))?,
        })
    }

    /// Load weights from `model_dir` and build both pipelines
    pub fn load<P: AsRef<Path>>(model_dir: P, config: ShieldConfig, device: &Device) -> Result<Self> {
        let models = ModelBundle::load(model_dir, device)?;
        Self::new(config, &models)
    }

    pub fn authenticity(&self) -> &AuthenticityPipeline {
        &self.authenticity
    }

    pub fn identity(&self) -> &IdentityPipeline {
        &self.identity
    }

    pub fn detect_authenticity(&self, audio: &AudioBuffer) -> Result<AuthenticityResult> {
        self.authenticity.detect(audio)
    }

    pub fn extract_identity_embedding(&self, audio: &AudioBuffer) -> Result<IdentityEmbedding> {
        self.identity.embed(audio)
    }

    pub fn verify_identity(
        &self,
        audio: &AudioBuffer,
        reference: &ReferenceEmbedding,
        threshold: f32,
    ) -> Result<VerificationOutcome> {
        self.identity.verify(audio, reference, threshold)
    }

    /// Look up `identity` in `store` and verify at the configured threshold
    pub fn verify_enrolled(
        &self,
        audio: &AudioBuffer,
        store: &dyn ReferenceStore,
        identity: &str,
    ) -> Result<VerificationOutcome> {
        let reference = store.get(identity)?;
        self.identity.verify(audio, &reference, self.similarity_threshold())
    }

    pub fn similarity_threshold(&self) -> f32 {
        self.identity.threshold()
    }
}
