//! Neural network models for authenticity and identity
//!
//! This module contains:
//! - `config`: Architecture configuration
//! - `branch`: Encoder trait and the per-model branch plans
//! - `dense`, `conv`, `recurrent`: The three branch encoder families
//! - `fusion`: Dense head over concatenated branch outputs
//! - `deepfake`: Ten-branch authenticity classifier
//! - `speaker`: Five-branch speaker embedding model
//! - `bundle`: Loading both models from a directory

pub mod branch;
pub mod bundle;
pub mod config;
pub mod conv;
pub mod deepfake;
pub mod dense;
pub mod fusion;
pub mod ops;
pub mod recurrent;
pub mod speaker;

pub use branch::{BranchEncoder, BranchInput, BranchPlan, BranchSet};
pub use bundle::ModelBundle;
pub use config::{DeepfakeModelConfig, SpeakerModelConfig};
pub use deepfake::DeepfakeModel;
pub use speaker::SpeakerModel;
