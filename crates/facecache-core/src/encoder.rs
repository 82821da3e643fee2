//! Face encoding cache builder.
//!
//! Walks a root directory laid out as `root/<identity>/<image>` and builds an
//! [`EncodingTable`] with one embedding per usable image. Every failure below
//! the root (unreadable file, no face, inference error) is logged and skips
//! only the image concerned; a load never fails as a whole.

use crate::detector::{DetectionStrategy, DetectorError};
use crate::preprocess::{self, PreprocessError, DEFAULT_MAX_DIMENSION};
use crate::recognizer::{EmbeddingExtractor, RecognizerError};
use crate::types::{BoundingBox, Embedding, EncodingTable};
use image::RgbImage;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

/// Prefix of diagnostic copies written for images without a detectable face.
pub const NO_FACE_PREFIX: &str = "no_face_";

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error("detection failed: {0}")]
    Detector(#[from] DetectorError),
    #[error("embedding extraction failed: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("no face detected by any strategy")]
    NoFaceDetected,
    #[error("encoder was built for detection only; no embedding extractor")]
    NoExtractor,
}

/// Tunables for [`FaceEncoder`].
#[derive(Debug, Clone)]
pub struct EncoderOptions {
    /// Images whose larger side exceeds this are downscaled before detection.
    pub max_dimension: u32,
    /// Where to write copies of images no strategy found a face in.
    /// `None` disables diagnostic copies.
    pub debug_dir: Option<PathBuf>,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            max_dimension: DEFAULT_MAX_DIMENSION,
            debug_dir: None,
        }
    }
}

/// Builds encoding tables from per-identity image folders.
///
/// Detection strategies are tried in order for every image until one of them
/// finds at least one face.
pub struct FaceEncoder {
    strategies: Vec<Box<dyn DetectionStrategy>>,
    extractor: Option<Box<dyn EmbeddingExtractor>>,
    options: EncoderOptions,
    table: EncodingTable,
}

impl FaceEncoder {
    pub fn new(
        strategies: Vec<Box<dyn DetectionStrategy>>,
        extractor: Box<dyn EmbeddingExtractor>,
        options: EncoderOptions,
    ) -> Self {
        Self::build(strategies, Some(extractor), options)
    }

    /// An encoder that can only detect faces.
    ///
    /// [`verify_image`](Self::verify_image) works as usual. Anything that
    /// needs an embedding fails with [`EncodeError::NoExtractor`], so a
    /// [`load`](Self::load) yields an empty table.
    pub fn detection_only(strategies: Vec<Box<dyn DetectionStrategy>>, options: EncoderOptions) -> Self {
        Self::build(strategies, None, options)
    }

    fn build(
        strategies: Vec<Box<dyn DetectionStrategy>>,
        extractor: Option<Box<dyn EmbeddingExtractor>>,
        options: EncoderOptions,
    ) -> Self {
        if strategies.is_empty() {
            tracing::warn!("face encoder has no detection strategies; every image will be face-less");
        }
        Self {
            strategies,
            extractor,
            options,
            table: EncodingTable::new(),
        }
    }

    /// Names of the configured strategies, in the order they are tried.
    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Rebuild the table from `root`.
    ///
    /// A missing root, or one without identity directories, yields an empty
    /// table. The previous table is discarded in every case.
    pub fn load(&mut self, root: impl AsRef<Path>) -> &EncodingTable {
        let root = root.as_ref();
        tracing::info!(root = %root.display(), "loading faces");

        self.table = EncodingTable::new();

        let Some(identities) = identity_dirs(root) else {
            return &self.table;
        };

        let mut table = EncodingTable::new();
        for (identity, dir) in identities {
            tracing::info!(identity = %identity, "processing identity");
            let mut encoded = 0usize;

            for image_path in image_files(&dir) {
                if let Some(embedding) = self.encode_for_identity(&image_path, &identity) {
                    table.push(identity.clone(), embedding);
                    encoded += 1;
                }
            }

            tracing::info!(identity = %identity, encoded, "identity done");
        }

        tracing::info!(
            total = table.len(),
            identities = table.counts().len(),
            "load complete"
        );
        self.table = table;
        &self.table
    }

    /// The table produced by the most recent [`load`](Self::load); empty before any load.
    pub fn table(&self) -> &EncodingTable {
        &self.table
    }

    pub fn encodings(&self) -> &[Embedding] {
        self.table.encodings()
    }

    pub fn names(&self) -> &[String] {
        self.table.names()
    }

    /// Embeddings of the most recent load grouped by identity.
    pub fn encodings_by_identity(&self) -> BTreeMap<String, Vec<Embedding>> {
        self.table.by_identity()
    }

    /// Whether at least one face can be detected in the image.
    ///
    /// Runs the same preprocessing and strategy chain as [`load`](Self::load)
    /// but leaves the table untouched.
    pub fn verify_image(&mut self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        let result = preprocess::load_image(path, self.options.max_dimension)
            .map_err(EncodeError::from)
            .and_then(|image| self.detect(&image));

        match result {
            Ok(Some((strategy, faces))) => {
                tracing::info!(path = %path.display(), strategy = %strategy, faces = faces.len(), "face detected");
                true
            }
            Ok(None) => {
                tracing::info!(path = %path.display(), "no face detected");
                false
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "could not verify image");
                false
            }
        }
    }

    /// Load one image and extract the embedding of its first detected face.
    pub fn encode_file(&mut self, path: impl AsRef<Path>) -> Result<Embedding, EncodeError> {
        let path = path.as_ref();
        let image = preprocess::load_image(path, self.options.max_dimension)?;
        self.encode_image(path, &image)
    }

    fn encode_for_identity(&mut self, path: &Path, identity: &str) -> Option<Embedding> {
        match self.encode_file(path) {
            Ok(embedding) => Some(embedding),
            Err(EncodeError::NoFaceDetected) => {
                tracing::warn!(path = %path.display(), identity, "no face found; skipping image");
                None
            }
            Err(e) => {
                tracing::error!(path = %path.display(), identity, error = %e, "failed to process image");
                None
            }
        }
    }

    fn encode_image(&mut self, path: &Path, image: &RgbImage) -> Result<Embedding, EncodeError> {
        if self.extractor.is_none() {
            return Err(EncodeError::NoExtractor);
        }

        let Some((strategy, faces)) = self.detect(image)? else {
            self.save_debug_copy(path, image);
            return Err(EncodeError::NoFaceDetected);
        };

        if faces.len() > 1 {
            tracing::warn!(
                path = %path.display(),
                faces = faces.len(),
                strategy = %strategy,
                "multiple faces found; using the first"
            );
        }

        let face = &faces[0];
        tracing::debug!(path = %path.display(), strategy = %strategy, confidence = face.confidence, "encoding face");
        let extractor = self.extractor.as_mut().ok_or(EncodeError::NoExtractor)?;
        Ok(extractor.extract(image, face)?)
    }

    /// Run the strategy chain; `None` when no strategy finds a face.
    fn detect(&mut self, image: &RgbImage) -> Result<Option<(String, Vec<BoundingBox>)>, EncodeError> {
        for strategy in self.strategies.iter_mut() {
            let faces = strategy.detect(image)?;
            if !faces.is_empty() {
                return Ok(Some((strategy.name().to_string(), faces)));
            }
            tracing::debug!(strategy = strategy.name(), "no face with this strategy");
        }
        Ok(None)
    }

    fn save_debug_copy(&self, path: &Path, image: &RgbImage) {
        let Some(debug_dir) = &self.options.debug_dir else {
            return;
        };
        let Some(file_name) = path.file_name() else {
            return;
        };

        let target = debug_dir.join(format!("{NO_FACE_PREFIX}{}", file_name.to_string_lossy()));
        let saved = std::fs::create_dir_all(debug_dir)
            .map_err(|e| e.to_string())
            .and_then(|()| image.save(&target).map_err(|e| e.to_string()));

        match saved {
            Ok(()) => tracing::debug!(path = %target.display(), "saved diagnostic copy"),
            Err(e) => tracing::warn!(path = %target.display(), error = %e, "could not save diagnostic copy"),
        }
    }
}

/// Identity directories under `root`, sorted by name.
///
/// Logs and returns `None` when the root is missing or holds no directories.
fn identity_dirs(root: &Path) -> Option<Vec<(String, PathBuf)>> {
    if !root.exists() {
        tracing::error!(root = %root.display(), "root directory does not exist");
        return None;
    }
    if !root.is_dir() {
        tracing::error!(root = %root.display(), "root path is not a directory");
        return None;
    }

    let dirs: Vec<(String, PathBuf)> = sorted_children(root)
        .filter(|entry| entry.file_type().is_dir())
        .map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            (name, entry.into_path())
        })
        .collect();

    if dirs.is_empty() {
        tracing::error!(root = %root.display(), "root directory has no identity subdirectories");
        return None;
    }
    Some(dirs)
}

/// Image files directly inside `dir`, sorted by name.
fn image_files(dir: &Path) -> Vec<PathBuf> {
    sorted_children(dir)
        .filter(|entry| entry.file_type().is_file() && preprocess::is_image_file(entry.path()))
        .map(DirEntry::into_path)
        .collect()
}

fn sorted_children(dir: &Path) -> impl Iterator<Item = DirEntry> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable directory entry");
                None
            }
        })
}
