//! Per-stage inference benchmark.
//!
//! Measures normalization, feature extraction and both model forward passes
//! over synthetic clips, plus the real-time factor of each full pipeline.
//! Without `--model-dir` the models run on randomly initialised weights.
//!
//! Usage:
//! ```sh
//! cargo bench --features cli --bench pipeline_bench -- \
//!     --model-dir test_data/models --iterations 3
//!
//! # With JSON output:
//! cargo bench --features cli --bench pipeline_bench -- \
//!     --json-output results.json
//! ```

use anyhow::{Context, Result};
use audio_shield::models::{DeepfakeModelConfig, SpeakerModelConfig};
use audio_shield::{
    auto_device, AudioBuffer, AuthenticityPipeline, IdentityPipeline, ModelBundle, PipelineConfig,
};
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use clap::Parser;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

// ── CLI ──────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "pipeline_bench", about = "Per-stage inference benchmark")]
struct Args {
    /// Force CPU even when an accelerator is available
    #[arg(long)]
    cpu: bool,

    /// Directory with df_model.safetensors and voice_model.safetensors
    #[arg(long)]
    model_dir: Option<String>,

    /// Number of warmup runs (not measured)
    #[arg(long, default_value_t = 1)]
    warmup: usize,

    /// Number of timed iterations (results are averaged)
    #[arg(long, default_value_t = 3)]
    iterations: usize,

    /// Write JSON results to this path
    #[arg(long)]
    json_output: Option<String>,

    /// Cargo passes this to every bench binary
    #[arg(long, hide = true)]
    bench: bool,
}

// ── Result types ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize)]
struct StageTimes {
    normalize_ms: f64,
    extract_ms: f64,
    deepfake_ms: f64,
    speaker_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
struct BenchmarkResult {
    label: String,
    audio_duration_secs: f64,
    stages: StageTimes,
    /// Full authenticity pipeline wall-clock / audio duration
    detect_rtf: f64,
    /// Full identity pipeline wall-clock / audio duration
    embed_rtf: f64,
    confidence: f32,
}

#[derive(Debug, Serialize)]
struct BenchmarkReport {
    device: String,
    weights: String,
    iterations: usize,
    results: Vec<BenchmarkResult>,
}

// ── Test corpus ──────────────────────────────────────────────────────────

const SAMPLE_RATE: u32 = 22050;

fn tone(seconds: f32) -> Vec<f32> {
    let n = (seconds * SAMPLE_RATE as f32) as usize;
    (0..n)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            let f0 = 140.0 + 20.0 * (2.0 * std::f32::consts::PI * 3.0 * t).sin();
            (1..=4)
                .map(|h| (2.0 * std::f32::consts::PI * f0 * h as f32 * t).sin() / h as f32)
                .sum::<f32>()
                * 0.3
        })
        .collect()
}

fn noise(seconds: f32) -> Vec<f32> {
    let n = (seconds * SAMPLE_RATE as f32) as usize;
    let mut state = 0x2545_f491u32;
    (0..n)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state as f32 / u32::MAX as f32 - 0.5) * 0.2
        })
        .collect()
}

fn test_corpus() -> Vec<(&'static str, AudioBuffer)> {
    vec![
        ("silence", AudioBuffer::new(vec![0.0; 3 * SAMPLE_RATE as usize], SAMPLE_RATE)),
        ("tone", AudioBuffer::new(tone(6.0), SAMPLE_RATE)),
        ("noise", AudioBuffer::new(noise(10.0), SAMPLE_RATE)),
    ]
}

// ── Memory measurement ───────────────────────────────────────────────────

fn resident_memory_mb() -> Option<f64> {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/proc/self/status")
            .ok()
            .and_then(|s| {
                s.lines()
                    .find(|l| l.starts_with("VmRSS:"))
                    .and_then(|l| {
                        l.split_whitespace()
                            .nth(1)
                            .and_then(|v| v.parse::<f64>().ok())
                    })
                    .map(|kb| kb / 1024.0)
            })
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

// ── Benchmark runner ─────────────────────────────────────────────────────

fn ms_since(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

fn run_stages(
    detect: &AuthenticityPipeline,
    identity: &IdentityPipeline,
    audio: &AudioBuffer,
) -> Result<(StageTimes, f32)> {
    let start = Instant::now();
    let normalized = detect.normalizer().normalize(audio)?;
    let normalize_ms = ms_since(start);

    let start = Instant::now();
    let features = detect.extractor().extract(&normalized)?;
    let extract_ms = ms_since(start);

    let start = Instant::now();
    let confidence = detect.model().forward(&features)?;
    let deepfake_ms = ms_since(start);

    let start = Instant::now();
    identity
        .model()
        .forward(&features, identity.config().normalize_embedding)?;
    let speaker_ms = ms_since(start);

    Ok((
        StageTimes {
            normalize_ms,
            extract_ms,
            deepfake_ms,
            speaker_ms,
        },
        confidence,
    ))
}

fn run_benchmark(
    detect: &AuthenticityPipeline,
    identity: &IdentityPipeline,
    label: &str,
    audio: &AudioBuffer,
    args: &Args,
) -> Result<BenchmarkResult> {
    for _ in 0..args.warmup {
        run_stages(detect, identity, audio)?;
    }

    let mut totals = StageTimes::default();
    let mut detect_ms = 0.0;
    let mut embed_ms = 0.0;
    let mut confidence = 0.0;
    for _ in 0..args.iterations {
        let (stages, c) = run_stages(detect, identity, audio)?;
        totals.normalize_ms += stages.normalize_ms;
        totals.extract_ms += stages.extract_ms;
        totals.deepfake_ms += stages.deepfake_ms;
        totals.speaker_ms += stages.speaker_ms;
        confidence = c;

        let start = Instant::now();
        detect.detect(audio)?;
        detect_ms += ms_since(start);

        let start = Instant::now();
        identity.embed(audio)?;
        embed_ms += ms_since(start);
    }

    let n = args.iterations.max(1) as f64;
    let audio_secs = audio.duration() as f64;
    let rtf = |total_ms: f64| {
        if audio_secs > 0.0 {
            total_ms / n / 1000.0 / audio_secs
        } else {
            f64::INFINITY
        }
    };

    Ok(BenchmarkResult {
        label: label.to_string(),
        audio_duration_secs: audio_secs,
        stages: StageTimes {
            normalize_ms: totals.normalize_ms / n,
            extract_ms: totals.extract_ms / n,
            deepfake_ms: totals.deepfake_ms / n,
            speaker_ms: totals.speaker_ms / n,
        },
        detect_rtf: rtf(detect_ms),
        embed_rtf: rtf(embed_ms),
        confidence,
    })
}

// ── Table formatting ─────────────────────────────────────────────────────

fn print_table(results: &[BenchmarkResult]) {
    println!();
    println!(
        "{:<8} {:>9} {:>10} {:>10} {:>10} {:>10} {:>8} {:>8}",
        "Label", "Audio (s)", "Norm (ms)", "Feat (ms)", "DF (ms)", "Spk (ms)", "RTF det", "RTF emb"
    );
    println!("{}", "-".repeat(80));

    for r in results {
        println!(
            "{:<8} {:>9.2} {:>10.1} {:>10.1} {:>10.1} {:>10.1} {:>8.3} {:>8.3}",
            r.label,
            r.audio_duration_secs,
            r.stages.normalize_ms,
            r.stages.extract_ms,
            r.stages.deepfake_ms,
            r.stages.speaker_ms,
            r.detect_rtf,
            r.embed_rtf,
        );
    }
    if let Some(mem) = resident_memory_mb() {
        println!("\nResident memory: {mem:.0} MB");
    }
    println!();
}

// ── Main ─────────────────────────────────────────────────────────────────

fn random_bundle(device: &Device) -> Result<ModelBundle> {
    let df_vars = VarMap::new();
    let voice_vars = VarMap::new();
    Ok(ModelBundle::from_var_builders(
        DeepfakeModelConfig::default(),
        VarBuilder::from_varmap(&df_vars, DType::F32, device),
        SpeakerModelConfig::default(),
        VarBuilder::from_varmap(&voice_vars, DType::F32, device),
    )?)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let device = if args.cpu { Device::Cpu } else { auto_device()? };
    println!("Device: {:?}", device);
    println!(
        "Config: {} warmup, {} iterations",
        args.warmup, args.iterations
    );

    println!("Loading models...");
    let (bundle, weights) = match &args.model_dir {
        Some(dir) => (
            ModelBundle::load(dir, &device)
                .with_context(|| format!("Failed to load models from {dir}"))?,
            dir.clone(),
        ),
        None => (random_bundle(&device)?, "random".to_string()),
    };
    println!("Models loaded ({weights}).\n");

    let detect = AuthenticityPipeline::new(PipelineConfig::deepfake(), Arc::clone(bundle.deepfake()))?;
    let identity = IdentityPipeline::new(PipelineConfig::verification(), Arc::clone(bundle.speaker()))?;

    let corpus = test_corpus();
    let mut results = Vec::with_capacity(corpus.len());

    for (label, audio) in &corpus {
        print!("Benchmarking [{label}]...");
        std::io::Write::flush(&mut std::io::stdout())?;
        let result = run_benchmark(&detect, &identity, label, audio, &args)?;
        println!(
            " RTF={:.3}/{:.3} ({:.2}s audio)",
            result.detect_rtf, result.embed_rtf, result.audio_duration_secs
        );
        results.push(result);
    }

    print_table(&results);

    if let Some(ref path) = args.json_output {
        let report = BenchmarkReport {
            device: format!("{:?}", device),
            weights,
            iterations: args.iterations,
            results: results.clone(),
        };
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, &json)?;
        println!("JSON results written to {path}");
    }

    Ok(())
}
