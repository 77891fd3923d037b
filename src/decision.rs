//! Thresholding of model outputs
//!
//! Authenticity uses a fixed, inclusive 0.5 cut on the bona fide
//! probability. Identity uses cosine similarity against a stored reference
//! and a configurable threshold.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, ShieldError};

/// Scores at or above this are bona fide
pub const BONAFIDE_THRESHOLD: f32 = 0.5;

/// Smallest norm treated as non-zero
const NORM_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthenticityLabel {
    Bonafide,
    Spoof,
}

impl AuthenticityLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthenticityLabel::Bonafide => "bonafide",
            AuthenticityLabel::Spoof => "spoof",
        }
    }
}

impl fmt::Display for AuthenticityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Label a bona fide probability
pub fn classify(score: f32) -> AuthenticityLabel {
    if score >= BONAFIDE_THRESHOLD {
        AuthenticityLabel::Bonafide
    } else {
        AuthenticityLabel::Spoof
    }
}

/// Fixed-length speaker embedding of one utterance (or an enrollment mean)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityEmbedding(Vec<f32>);

impl IdentityEmbedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Euclidean norm
    pub fn norm(&self) -> f32 {
        norm(&self.0) as f32
    }
}

impl From<Vec<f32>> for IdentityEmbedding {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

/// Result of comparing an utterance against a reference
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub similarity: f32,
    pub confirmed: bool,
}

fn norm(v: &[f32]) -> f64 {
    v.iter().map(|&x| (x as f64) * (x as f64)).sum::<f64>().sqrt()
}

/// Cosine of the angle between `a` and `b`, in [-1, 1]
///
/// `a` is the freshly inferred embedding and `b` the stored reference: a
/// zero-norm `a` is an `ExtractionFailure`, while a zero-norm `b` or a length
/// mismatch is an `InvalidReference`. Accumulates in f64 so `sim(a, a)` is 1
/// to within f32 rounding.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(ShieldError::InvalidReference(format!(
            "embedding length {} does not match reference length {}",
            a.len(),
            b.len()
        )));
    }
    let (na, nb) = (norm(a), norm(b));
    if na < NORM_EPSILON {
        return Err(ShieldError::extraction(
            "identity embedding",
            "embedding has zero norm",
        ));
    }
    if nb < NORM_EPSILON {
        return Err(ShieldError::InvalidReference(
            "reference embedding has zero norm".to_string(),
        ));
    }
    let dot: f64 = a.iter().zip(b).map(|(&x, &y)| x as f64 * y as f64).sum();
    Ok((dot / (na * nb)).clamp(-1.0, 1.0) as f32)
}

/// Compare and threshold; `similarity >= threshold` confirms
pub fn verify(embedding: &[f32], reference: &[f32], threshold: f32) -> Result<VerificationOutcome> {
    let similarity = cosine_similarity(embedding, reference)?;
    Ok(VerificationOutcome {
        similarity,
        confirmed: similarity >= threshold,
    })
}

/// Scale to unit L2 norm; all-zero input stays zero
pub fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let n = norm(v).max(NORM_EPSILON);
    v.iter().map(|&x| (x as f64 / n) as f32).collect()
}

/// Element-wise mean of several embeddings, optionally renormalized
pub fn average_embeddings(embeddings: &[IdentityEmbedding], normalize: bool) -> Result<IdentityEmbedding> {
    let first = embeddings.first().ok_or_else(|| {
        ShieldError::InvalidReference("no embeddings to average".to_string())
    })?;
    let dim = first.len();
    let mut acc = vec![0.0f64; dim];
    for e in embeddings {
        if e.len() != dim {
            return Err(ShieldError::InvalidReference(format!(
                "cannot average embeddings of length {} and {}",
                dim,
                e.len()
            )));
        }
        for (a, &x) in acc.iter_mut().zip(e.as_slice()) {
            *a += x as f64;
        }
    }
    let count = embeddings.len() as f64;
    let mean: Vec<f32> = acc.into_iter().map(|a| (a / count) as f32).collect();
    Ok(IdentityEmbedding(if normalize { l2_normalize(&mean) } else { mean }))
}

/// One scored comparison with its ground truth
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trial {
    pub similarity: f32,
    pub same_speaker: bool,
}

/// Aggregate acceptance statistics over a set of trials
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationReport {
    pub threshold: f32,
    pub genuine_trials: usize,
    pub impostor_trials: usize,
    /// Fraction of same-speaker trials confirmed
    pub genuine_acceptance_rate: f32,
    /// Fraction of mismatched trials confirmed
    pub impostor_acceptance_rate: f32,
    pub mean_genuine_similarity: f32,
    pub mean_impostor_similarity: f32,
}

impl VerificationReport {
    pub fn from_trials(trials: &[Trial], threshold: f32) -> Self {
        let stats = |same: bool| {
            let scores: Vec<f32> = trials
                .iter()
                .filter(|t| t.same_speaker == same)
                .map(|t| t.similarity)
                .collect();
            if scores.is_empty() {
                return (0, 0.0, 0.0);
            }
            let n = scores.len();
            let accepted = scores.iter().filter(|&&s| s >= threshold).count();
            let mean = scores.iter().sum::<f32>() / n as f32;
            (n, accepted as f32 / n as f32, mean)
        };
        let (genuine_trials, genuine_acceptance_rate, mean_genuine_similarity) = stats(true);
        let (impostor_trials, impostor_acceptance_rate, mean_impostor_similarity) = stats(false);

        Self {
            threshold,
            genuine_trials,
            impostor_trials,
            genuine_acceptance_rate,
            impostor_acceptance_rate,
            mean_genuine_similarity,
            mean_impostor_similarity,
        }
    }

    /// Same-speaker pairs pass more often than mismatched pairs
    pub fn separates(&self) -> bool {
        self.genuine_trials > 0
            && self.impostor_trials > 0
            && self.genuine_acceptance_rate > self.impostor_acceptance_rate
    }
}
