//! Command-line front end: deepfake detection, speaker embedding and
//! verification on WAV files
//!
//! Every subcommand prints one JSON object on stdout.

use anyhow::{bail, Context, Result};
use candle_core::Device;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use audio_shield::audio::resample;
use audio_shield::{
    auto_device, AudioBuffer, AudioShield, JsonReferenceStore, ReferenceEmbedding, ReferenceStore,
    ShieldConfig,
};

#[derive(Parser, Debug)]
#[command(name = "audio-shield")]
#[command(author, version, about = "Voice deepfake detection and speaker verification")]
struct Cli {
    /// Directory holding df_model.safetensors and voice_model.safetensors
    #[arg(short, long, global = true, default_value = "test_data/models")]
    models: PathBuf,

    /// Pipeline configuration (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Force CPU even when an accelerator is available
    #[arg(long, global = true)]
    cpu: bool,

    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Classify a clip as bonafide or spoof
    Detect {
        /// Input WAV file
        #[arg(short, long)]
        audio: PathBuf,
    },
    /// Print the speaker embedding of a clip
    Embed {
        /// Input WAV file
        #[arg(short, long)]
        audio: PathBuf,
    },
    /// Compare a clip against an enrolled identity
    Verify {
        /// Input WAV file
        #[arg(short, long)]
        audio: PathBuf,

        /// JSON reference store: { "<uid>": { "embedding": [..] } }
        #[arg(long, requires = "uid", conflicts_with = "reference")]
        store: Option<PathBuf>,

        /// Identity to look up in the store
        #[arg(long, requires = "store")]
        uid: Option<String>,

        /// Reference embedding file as written by `embed`
        #[arg(long, required_unless_present = "store")]
        reference: Option<PathBuf>,

        /// Similarity threshold (defaults to the configured value)
        #[arg(long)]
        threshold: Option<f32>,
    },
}

#[derive(Serialize, Deserialize)]
struct EmbeddingOutput {
    embedding: Vec<f32>,
}

fn load_audio(path: &Path, sample_rate: u32) -> Result<AudioBuffer> {
    let audio = AudioBuffer::load(path)
        .with_context(|| format!("Failed to load audio from {}", path.display()))?;
    info!(
        "Loaded {}: {:.2}s at {} Hz",
        path.display(),
        audio.duration(),
        audio.sample_rate
    );
    if audio.sample_rate == sample_rate {
        return Ok(audio);
    }
    info!("Resampling {} Hz -> {} Hz", audio.sample_rate, sample_rate);
    resample(&audio, sample_rate).context("Failed to resample audio")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::WARN })
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = match &cli.config {
        Some(path) => ShieldConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ShieldConfig::default(),
    };

    let device = if cli.cpu { Device::Cpu } else { auto_device()? };
    let shield = AudioShield::load(&cli.models, config, &device)
        .with_context(|| format!("Failed to load models from {}", cli.models.display()))?;

    match &cli.command {
        Command::Detect { audio } => {
            let rate = shield.authenticity().config().sample_rate;
            let audio = load_audio(audio, rate)?;
            let result = shield.detect_authenticity(&audio)?;
            print_json(&result)
        }
        Command::Embed { audio } => {
            let rate = shield.identity().config().sample_rate;
            let audio = load_audio(audio, rate)?;
            let embedding = shield.extract_identity_embedding(&audio)?;
            print_json(&EmbeddingOutput {
                embedding: embedding.into_vec(),
            })
        }
        Command::Verify {
            audio,
            store,
            uid,
            reference,
            threshold,
        } => {
            let reference = match (store, uid, reference) {
                (Some(store), Some(uid), _) => {
                    let store = JsonReferenceStore::from_file(store).with_context(|| {
                        format!("Failed to read reference store {}", store.display())
                    })?;
                    store.get(uid)?
                }
                (_, _, Some(path)) => {
                    let content = std::fs::read_to_string(path).with_context(|| {
                        format!("Failed to read reference {}", path.display())
                    })?;
                    let parsed: EmbeddingOutput = serde_json::from_str(&content)
                        .with_context(|| format!("Invalid reference file {}", path.display()))?;
                    ReferenceEmbedding::new(path.display().to_string(), parsed.embedding)
                }
                _ => bail!("verify needs --store with --uid, or --reference"),
            };

            let rate = shield.identity().config().sample_rate;
            let audio = load_audio(audio, rate)?;
            let threshold = threshold.unwrap_or_else(|| shield.similarity_threshold());
            let outcome = shield.verify_identity(&audio, &reference, threshold)?;
            print_json(&outcome)
        }
    }
}
