//! Enrollment storage: a flat directory of face images, one per identity.
//!
//! Filename stem = identity, extensions `.jpg/.jpeg/.png`. Samples are
//! loaded in sorted filename order so positional label indices stay
//! stable between training runs on the same directory contents.

use crate::eigen::FACE_SIZE;
use image::imageops::FilterType;
use image::GrayImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
}

/// Handle to the enrollment directory.
pub struct EnrollmentStore {
    dir: PathBuf,
}

impl EnrollmentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load every enrollment sample as (identity, canonical grayscale
    /// crop), in sorted filename order. Unreadable images are skipped
    /// with a warning; a missing directory is an empty enrollment set.
    pub fn load_samples(&self) -> Result<Vec<(String, Vec<u8>)>, EnrollError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                matches!(
                    path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase),
                    Some(ref ext) if ext == "jpg" || ext == "jpeg" || ext == "png"
                )
            })
            .collect();
        paths.sort();

        let mut samples = Vec::with_capacity(paths.len());
        for path in paths {
            let Some(identity) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match image::open(&path) {
                Ok(img) => {
                    let canonical = canonicalize(&img.to_luma8());
                    samples.push((identity.to_string(), canonical.into_raw()));
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable enrollment image");
                }
            }
        }

        tracing::info!(count = samples.len(), dir = %self.dir.display(), "loaded enrollment samples");
        Ok(samples)
    }

    /// Save a freshly captured grayscale frame as `<identity>.jpg`,
    /// creating the directory if needed. Overwrites a previous sample for
    /// the same identity.
    pub fn save_sample(
        &self,
        identity: &str,
        gray: &[u8],
        width: u32,
        height: u32,
    ) -> Result<PathBuf, EnrollError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{identity}.jpg"));

        let img = GrayImage::from_raw(width, height, gray.to_vec()).ok_or_else(|| {
            EnrollError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "gray buffer does not match dimensions",
            ))
        })?;
        img.save(&path)?;

        tracing::info!(identity, path = %path.display(), "saved enrollment image");
        Ok(path)
    }
}

/// Resize a grayscale image to the canonical face size used by the model.
pub fn canonicalize(gray: &GrayImage) -> GrayImage {
    if gray.width() as usize == FACE_SIZE && gray.height() as usize == FACE_SIZE {
        return gray.clone();
    }
    image::imageops::resize(gray, FACE_SIZE as u32, FACE_SIZE as u32, FilterType::Triangle)
}
