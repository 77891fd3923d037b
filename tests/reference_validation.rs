//! Validation against the deployed checkpoints
//!
//! These tests need `test_data/models/{df_model,voice_model}.safetensors`
//! exported from the trained models and skip when they are absent. Speaker
//! statistics additionally read `test_data/speakers/<id>/*.wav`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use audio_shield::decision::{cosine_similarity, Trial, VerificationReport};
use audio_shield::models::bundle::{DEEPFAKE_WEIGHTS, SPEAKER_WEIGHTS};
use audio_shield::{AudioBuffer, AudioShield, IdentityEmbedding, ModelBundle, ShieldConfig};
use candle_core::{Device, Tensor};

const MODEL_DIR: &str = "test_data/models";
const SPEAKER_DIR: &str = "test_data/speakers";

/// Check if exported weights exist
fn weights_available() -> bool {
    let dir = Path::new(MODEL_DIR);
    dir.join(DEEPFAKE_WEIGHTS).exists() && dir.join(SPEAKER_WEIGHTS).exists()
}

fn load_shield() -> AudioShield {
    AudioShield::load(MODEL_DIR, ShieldConfig::default(), &Device::Cpu).unwrap()
}

fn tone(f0: f32, seconds: f32) -> AudioBuffer {
    let sr = 22050;
    let samples = (0..(seconds * sr as f32) as usize)
        .map(|i| (2.0 * std::f32::consts::PI * f0 * i as f32 / sr as f32).sin() * 0.5)
        .collect();
    AudioBuffer::new(samples, sr)
}

/// WAV files grouped by speaker directory
fn speaker_clips() -> HashMap<String, Vec<PathBuf>> {
    let mut clips = HashMap::new();
    let Ok(entries) = std::fs::read_dir(SPEAKER_DIR) else {
        return clips;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let id = entry.file_name().to_string_lossy().to_string();
        let mut wavs: Vec<PathBuf> = std::fs::read_dir(&path)
            .into_iter()
            .flatten()
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|e| e == "wav"))
            .collect();
        wavs.sort();
        if wavs.len() >= 2 {
            clips.insert(id, wavs);
        }
    }
    clips
}

#[test]
fn test_checkpoint_tensor_names() {
    if !weights_available() {
        eprintln!("Skipping test_checkpoint_tensor_names: weights not found");
        return;
    }
    let tensors: HashMap<String, Tensor> =
        candle_core::safetensors::load(Path::new(MODEL_DIR).join(DEEPFAKE_WEIGHTS), &Device::Cpu)
            .unwrap();
    for name in [
        "mfcc_branch.conv1.weight",
        "mfcc_branch.fc.weight",
        "chroma_branch.bn1.running_var",
        "mel_spec_branch.fc3.weight",
        "fusion_layer.0.weight",
        "fusion_layer.3.weight",
        "output_layer.weight",
    ] {
        assert!(tensors.contains_key(name), "missing {}", name);
    }
    assert_eq!(tensors["fusion_layer.0.weight"].dims(), &[512, 1280]);

    let tensors: HashMap<String, Tensor> =
        candle_core::safetensors::load(Path::new(MODEL_DIR).join(SPEAKER_WEIGHTS), &Device::Cpu)
            .unwrap();
    assert_eq!(tensors["mel_branch.lstm.weight_ih_l0"].dims(), &[2048, 2048]);
    assert_eq!(tensors["mel_branch.lstm.weight_hh_l1_reverse"].dims(), &[2048, 512]);
    assert_eq!(tensors["fc_fusion.0.weight"].dims(), &[512, 1536]);
    assert_eq!(tensors["embedding_out.weight"].dims(), &[128, 256]);
}

#[test]
fn test_real_bundle_loads() {
    if !weights_available() {
        eprintln!("Skipping test_real_bundle_loads: weights not found");
        return;
    }
    let bundle = ModelBundle::load(MODEL_DIR, &Device::Cpu).unwrap();
    assert_eq!(bundle.speaker().embedding_dim(), 128);
    assert_eq!(bundle.deepfake().feature_shape(), (128, 259));
}

#[test]
fn test_real_silence_detection() {
    if !weights_available() {
        eprintln!("Skipping test_real_silence_detection: weights not found");
        return;
    }
    let shield = load_shield();
    let silence = AudioBuffer::new(vec![0.0; 3 * 22050], 22050);
    let a = shield.detect_authenticity(&silence).unwrap();
    let b = shield.detect_authenticity(&silence).unwrap();
    assert!((0.0..=1.0).contains(&a.confidence));
    assert_eq!(a.confidence.to_bits(), b.confidence.to_bits());
    println!("Silence: {} ({:.4})", a.label, a.confidence);
}

#[test]
fn test_real_embedding_properties() {
    if !weights_available() {
        eprintln!("Skipping test_real_embedding_properties: weights not found");
        return;
    }
    let shield = load_shield();
    let a = shield.extract_identity_embedding(&tone(150.0, 2.0)).unwrap();
    let b = shield.extract_identity_embedding(&tone(300.0, 2.0)).unwrap();
    assert_eq!(a.len(), 128);
    assert!((a.norm() - 1.0).abs() < 1e-4);

    let self_sim = cosine_similarity(a.as_slice(), a.as_slice()).unwrap();
    assert!((self_sim - 1.0).abs() < 1e-5);
    let ab = cosine_similarity(a.as_slice(), b.as_slice()).unwrap();
    let ba = cosine_similarity(b.as_slice(), a.as_slice()).unwrap();
    assert_eq!(ab, ba);
}

#[test]
fn test_same_speaker_pairs_pass_more_often() {
    if !weights_available() {
        eprintln!("Skipping test_same_speaker_pairs_pass_more_often: weights not found");
        return;
    }
    let clips = speaker_clips();
    if clips.len() < 2 {
        eprintln!("Skipping test_same_speaker_pairs_pass_more_often: need two speakers");
        return;
    }

    let shield = load_shield();
    let mut embeddings: Vec<(String, IdentityEmbedding)> = Vec::new();
    for (id, paths) in &clips {
        for path in paths {
            let audio = AudioBuffer::load(path).unwrap();
            let audio = if audio.sample_rate == 22050 {
                audio
            } else {
                audio_shield::audio::resample(&audio, 22050).unwrap()
            };
            embeddings.push((id.clone(), shield.extract_identity_embedding(&audio).unwrap()));
        }
    }

    let mut trials = Vec::new();
    for (i, (id_a, a)) in embeddings.iter().enumerate() {
        for (id_b, b) in &embeddings[i + 1..] {
            trials.push(Trial {
                similarity: cosine_similarity(a.as_slice(), b.as_slice()).unwrap(),
                same_speaker: id_a == id_b,
            });
        }
    }

    let report = VerificationReport::from_trials(&trials, shield.similarity_threshold());
    println!("{}", serde_json::to_string_pretty(&report).unwrap());
    assert!(report.separates());
}
