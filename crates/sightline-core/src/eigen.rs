//! Eigen-subspace face model.
//!
//! Trained from the full enrollment set with the snapshot method: the
//! N x N Gram matrix of mean-centered samples is eigendecomposed (cyclic
//! Jacobi) and mapped back to pixel-space components. Prediction projects
//! a canonical face crop into the subspace and returns the nearest
//! enrolled sample; the Euclidean distance between projections is the
//! confidence score (lower = more confident).
//!
//! Label indices are positional: the Nth enrolled sample maps to index N.
//! The label map is persisted inside the model file so the two can never
//! be reloaded out of sync.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Canonical face crop side in pixels; every sample and probe is a
/// grayscale square of this size.
pub const FACE_SIZE: usize = 200;

const FACE_DIM: usize = FACE_SIZE * FACE_SIZE;

/// Eigenvalues below this fraction of the largest are treated as noise.
const COMPONENT_CUTOFF: f64 = 1e-8;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("no enrollment samples to train on")]
    EmptyEnrollment,
    #[error("sample for '{0}' has wrong length (expected {FACE_DIM} pixels)")]
    BadSampleLength(String),
    #[error("model not trained")]
    NotTrained,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Trained eigen-subspace model plus its positional label map.
#[derive(Serialize, Deserialize)]
pub struct EigenFaceModel {
    mean: Vec<f32>,
    /// Unit-norm subspace components, each `FACE_DIM` long.
    components: Vec<Vec<f32>>,
    /// Per-sample subspace projections, one per enrolled sample.
    projections: Vec<Vec<f32>>,
    /// Identities by label index, in enrollment order.
    labels: Vec<String>,
}

impl EigenFaceModel {
    /// Train from enrollment samples (identity, canonical grayscale crop),
    /// in enrollment order. Retraining replaces the model wholesale.
    pub fn train(samples: &[(String, Vec<u8>)]) -> Result<Self, ModelError> {
        if samples.is_empty() {
            return Err(ModelError::EmptyEnrollment);
        }
        for (identity, pixels) in samples {
            if pixels.len() != FACE_DIM {
                return Err(ModelError::BadSampleLength(identity.clone()));
            }
        }

        let n = samples.len();
        let mut mean = vec![0.0f32; FACE_DIM];
        for (_, pixels) in samples {
            for (m, &p) in mean.iter_mut().zip(pixels.iter()) {
                *m += p as f32;
            }
        }
        for m in mean.iter_mut() {
            *m /= n as f32;
        }

        let centered: Vec<Vec<f32>> = samples
            .iter()
            .map(|(_, pixels)| {
                pixels
                    .iter()
                    .zip(mean.iter())
                    .map(|(&p, &m)| p as f32 - m)
                    .collect()
            })
            .collect();

        // Snapshot method: eigendecompose the small N x N Gram matrix
        // instead of the FACE_DIM x FACE_DIM covariance.
        let mut gram = Array2::<f64>::zeros((n, n));
        for i in 0..n {
            for j in i..n {
                let dot: f64 = centered[i]
                    .iter()
                    .zip(centered[j].iter())
                    .map(|(&a, &b)| a as f64 * b as f64)
                    .sum();
                gram[[i, j]] = dot;
                gram[[j, i]] = dot;
            }
        }

        let (eigvals, eigvecs) = jacobi_eigen(gram);

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| {
            eigvals[b]
                .partial_cmp(&eigvals[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let largest = eigvals[order[0]].max(0.0);
        let cutoff = largest * COMPONENT_CUTOFF;

        let mut components = Vec::new();
        for &k in &order {
            if eigvals[k] <= cutoff || eigvals[k] <= 0.0 {
                break;
            }
            // pixel-space component: weighted sum of centered samples
            let mut u = vec![0.0f64; FACE_DIM];
            for (i, sample) in centered.iter().enumerate() {
                let w = eigvecs[[i, k]];
                for (uv, &sv) in u.iter_mut().zip(sample.iter()) {
                    *uv += w * sv as f64;
                }
            }
            let norm: f64 = u.iter().map(|v| v * v).sum::<f64>().sqrt();
            if norm <= f64::EPSILON {
                continue;
            }
            components.push(u.iter().map(|&v| (v / norm) as f32).collect());
        }

        let projections: Vec<Vec<f32>> = centered
            .iter()
            .map(|sample| project(&components, sample))
            .collect();

        let labels: Vec<String> = samples.iter().map(|(id, _)| id.clone()).collect();

        tracing::info!(
            samples = n,
            components = components.len(),
            "trained eigen face model"
        );

        Ok(Self { mean, components, projections, labels })
    }

    /// Predict the nearest enrolled label for a canonical grayscale crop.
    ///
    /// Returns `(label_index, distance)`; lower distance = more confident.
    pub fn predict(&self, face: &[u8]) -> Result<(usize, f32), ModelError> {
        if face.len() != FACE_DIM {
            return Err(ModelError::BadSampleLength("probe".into()));
        }
        if self.projections.is_empty() {
            return Err(ModelError::NotTrained);
        }

        let centered: Vec<f32> = face
            .iter()
            .zip(self.mean.iter())
            .map(|(&p, &m)| p as f32 - m)
            .collect();
        let probe = project(&self.components, &centered);

        let mut best = (0usize, f32::INFINITY);
        for (i, reference) in self.projections.iter().enumerate() {
            let dist: f32 = probe
                .iter()
                .zip(reference.iter())
                .map(|(a, b)| (a - b) * (a - b))
                .sum::<f32>()
                .sqrt();
            if dist < best.1 {
                best = (i, dist);
            }
        }
        Ok(best)
    }

    /// Identity for a label index; a map miss reports "Unknown" rather
    /// than failing.
    pub fn identity_of(&self, label_index: usize) -> &str {
        self.labels
            .get(label_index)
            .map(String::as_str)
            .unwrap_or("Unknown")
    }

    pub fn num_samples(&self) -> usize {
        self.labels.len()
    }

    /// Identities in enrollment order. Used to detect a persisted model
    /// that has gone stale against the enrollment directory.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Persist the model (components and label map together) as JSON.
    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(path)?;
        serde_json::to_writer(std::io::BufWriter::new(file), self)?;
        tracing::info!(path = %path.display(), "saved face model");
        Ok(())
    }

    /// Reload a persisted model. Callers must retrain instead whenever the
    /// enrollment set has changed since the save.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let file = std::fs::File::open(path)?;
        let model = serde_json::from_reader(std::io::BufReader::new(file))?;
        Ok(model)
    }
}

/// Project a centered pixel vector onto the subspace components.
fn project(components: &[Vec<f32>], centered: &[f32]) -> Vec<f32> {
    components
        .iter()
        .map(|u| {
            u.iter()
                .zip(centered.iter())
                .map(|(&a, &b)| a * b)
                .sum::<f32>()
        })
        .collect()
}

/// Eigendecomposition of a symmetric matrix by cyclic Jacobi rotations.
///
/// Returns (eigenvalues, eigenvectors-as-columns). Sized for the small
/// Gram matrices of an enrollment set, not for general use.
fn jacobi_eigen(mut a: Array2<f64>) -> (Vec<f64>, Array2<f64>) {
    let n = a.nrows();
    let mut v = Array2::<f64>::eye(n);

    for _sweep in 0..100 {
        let mut off_diag = 0.0;
        for p in 0..n {
            for q in (p + 1)..n {
                off_diag += a[[p, q]] * a[[p, q]];
            }
        }
        if off_diag < 1e-20 {
            break;
        }

        for p in 0..n {
            for q in (p + 1)..n {
                let apq = a[[p, q]];
                if apq.abs() < 1e-30 {
                    continue;
                }
                let theta = (a[[q, q]] - a[[p, p]]) / (2.0 * apq);
                let t = if theta >= 0.0 {
                    1.0 / (theta + (theta * theta + 1.0).sqrt())
                } else {
                    1.0 / (theta - (theta * theta + 1.0).sqrt())
                };
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..n {
                    let akp = a[[k, p]];
                    let akq = a[[k, q]];
                    a[[k, p]] = c * akp - s * akq;
                    a[[k, q]] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = a[[p, k]];
                    let aqk = a[[q, k]];
                    a[[p, k]] = c * apk - s * aqk;
                    a[[q, k]] = s * apk + c * aqk;
                }
                for k in 0..n {
                    let vkp = v[[k, p]];
                    let vkq = v[[k, q]];
                    v[[k, p]] = c * vkp - s * vkq;
                    v[[k, q]] = s * vkp + c * vkq;
                }
            }
        }
    }

    let eigvals = (0..n).map(|i| a[[i, i]]).collect();
    (eigvals, v)
}
