//! Startup loading of both models
//!
//! A model directory holds:
//!
//! ```text
//! df_model.safetensors      authenticity classifier weights
//! voice_model.safetensors   speaker embedding weights
//! df_config.json            optional DeepfakeModelConfig
//! voice_config.json         optional SpeakerModelConfig
//! ```
//!
//! Loading is all-or-nothing: any missing or malformed tensor fails the
//! whole bundle with [`ShieldError::ModelNotLoaded`].

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use super::config::{DeepfakeModelConfig, SpeakerModelConfig};
use super::deepfake::DeepfakeModel;
use super::speaker::SpeakerModel;
use crate::error::{Result, ShieldError};

pub const DEEPFAKE_WEIGHTS: &str = "df_model.safetensors";
pub const SPEAKER_WEIGHTS: &str = "voice_model.safetensors";
pub const DEEPFAKE_CONFIG: &str = "df_config.json";
pub const SPEAKER_CONFIG: &str = "voice_config.json";

/// Read-only handles to both loaded models
///
/// Cloning is cheap; every clone shares the same weights.
#[derive(Clone)]
pub struct ModelBundle {
    deepfake: Arc<DeepfakeModel>,
    speaker: Arc<SpeakerModel>,
    device: Device,
}

impl ModelBundle {
    /// Load both models from `dir`
    pub fn load<P: AsRef<Path>>(dir: P, device: &Device) -> Result<Self> {
        let dir = dir.as_ref();
        tracing::info!("Loading models from: {}", dir.display());

        let df_config =
            optional_config(&dir.join(DEEPFAKE_CONFIG), |p| DeepfakeModelConfig::from_file(p))?;
        let voice_config =
            optional_config(&dir.join(SPEAKER_CONFIG), |p| SpeakerModelConfig::from_file(p))?;

        let df_weights = load_weights(&dir.join(DEEPFAKE_WEIGHTS), device)?;
        let voice_weights = load_weights(&dir.join(SPEAKER_WEIGHTS), device)?;
        tracing::debug!(
            "Loaded {} deepfake tensors, {} speaker tensors",
            df_weights.len(),
            voice_weights.len()
        );

        let bundle = Self::from_var_builders(
            df_config,
            VarBuilder::from_tensors(df_weights, DType::F32, device),
            voice_config,
            VarBuilder::from_tensors(voice_weights, DType::F32, device),
        )?;
        tracing::info!("Models ready");
        Ok(bundle)
    }

    /// Build both models from already-open weight sources
    pub fn from_var_builders(
        df_config: DeepfakeModelConfig,
        df_vb: VarBuilder,
        voice_config: SpeakerModelConfig,
        voice_vb: VarBuilder,
    ) -> Result<Self> {
        let device = df_vb.device().clone();
        let deepfake = DeepfakeModel::new(df_config, df_vb).map_err(not_loaded("deepfake"))?;
        let speaker = SpeakerModel::new(voice_config, voice_vb).map_err(not_loaded("speaker"))?;
        Ok(Self {
            deepfake: Arc::new(deepfake),
            speaker: Arc::new(speaker),
            device,
        })
    }

    pub fn deepfake(&self) -> &Arc<DeepfakeModel> {
        &self.deepfake
    }

    pub fn speaker(&self) -> &Arc<SpeakerModel> {
        &self.speaker
    }

    pub fn device(&self) -> &Device {
        &self.device
    }
}

fn optional_config<T, F>(path: &Path, read: F) -> Result<T>
where
    T: Default,
    F: Fn(&Path) -> Result<T>,
{
    if path.exists() {
        read(path)
    } else {
        Ok(T::default())
    }
}

fn load_weights(path: &Path, device: &Device) -> Result<HashMap<String, Tensor>> {
    if !path.exists() {
        return Err(ShieldError::ModelNotLoaded(format!(
            "weights not found: {}",
            path.display()
        )));
    }
    candle_core::safetensors::load(path, device).map_err(|e| {
        ShieldError::ModelNotLoaded(format!("failed to read {}: {}", path.display(), e))
    })
}

fn not_loaded(model: &'static str) -> impl Fn(ShieldError) -> ShieldError {
    move |e| match e {
        ShieldError::ModelNotLoaded(_) => e,
        other => ShieldError::ModelNotLoaded(format!("{} model: {}", model, other)),
    }
}
