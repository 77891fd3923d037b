//! # audio-shield
//!
//! Pure Rust inference for voice deepfake detection and speaker
//! verification with multi-branch acoustic feature fusion.
//!
//! ## Features
//!
//! - **CPU**: Default, with optional MKL/Accelerate for faster BLAS
//! - **CUDA**: NVIDIA GPU acceleration
//! - **Metal**: Apple Silicon GPU acceleration
//!
//! ## Example
//!
//! ```rust,ignore
//! use audio_shield::{auto_device, AudioBuffer, AudioShield, ShieldConfig};
//!
//! let device = auto_device()?;
//! let shield = AudioShield::load("models/", ShieldConfig::default(), &device)?;
//! let audio = AudioBuffer::load("clip.wav")?;
//! let result = shield.detect_authenticity(&audio)?;
//! println!("{} ({:.3})", result.label, result.confidence);
//! ```

pub mod audio;
pub mod config;
pub mod decision;
pub mod error;
pub mod features;
pub mod models;
pub mod pipeline;
pub mod store;

use candle_core::Device;

/// Re-exports for convenience
pub use audio::AudioBuffer;
pub use config::{FeatureConfig, PipelineConfig, ShieldConfig};
pub use decision::{AuthenticityLabel, IdentityEmbedding, VerificationOutcome};
pub use error::{Result, ShieldError};
pub use features::{FeatureKind, FeatureMap};
pub use models::ModelBundle;
pub use pipeline::{AudioShield, AuthenticityPipeline, AuthenticityResult, IdentityPipeline};
pub use store::{InMemoryReferenceStore, JsonReferenceStore, ReferenceEmbedding, ReferenceStore};

/// Select the best available device
pub fn auto_device() -> Result<Device> {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::cuda_if_available(0) {
            if device.is_cuda() {
                tracing::info!("Using CUDA device");
                return Ok(device);
            }
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            tracing::info!("Using Metal device");
            return Ok(device);
        }
    }

    tracing::info!("Using CPU device");
    Ok(Device::Cpu)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_device() {
        let device = auto_device().unwrap();
        #[cfg(not(any(feature = "cuda", feature = "metal")))]
        assert!(matches!(device, Device::Cpu));
        let _ = device;
    }

    #[test]
    fn test_pipelines_are_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AudioShield>();
        assert_send_sync::<ModelBundle>();
        assert_send_sync::<JsonReferenceStore>();
    }
}
