//! facecache-core: per-identity face encoding tables.
//!
//! Loads reference photos from `root/<identity>/<image>`, detects faces with
//! SCRFD and extracts ArcFace embeddings, both running via ONNX Runtime for
//! CPU inference.

use std::path::PathBuf;

pub mod alignment;
pub mod detector;
pub mod encoder;
pub mod preprocess;
pub mod recognizer;
pub mod types;

pub use detector::{DetectionStrategy, ScrfdConfig, ScrfdDetector};
pub use encoder::{EncodeError, EncoderOptions, FaceEncoder};
pub use recognizer::{ArcFaceRecognizer, EmbeddingExtractor};
pub use types::{BoundingBox, CosineMatcher, Embedding, EncodingTable, MatchResult, Matcher};

/// Default location of the ONNX model files: `$XDG_DATA_HOME/facecache/models`,
/// falling back to `~/.local/share/facecache/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facecache")
        .join("models")
}
