use facecache_core::preprocess::DEFAULT_MAX_DIMENSION;
use facecache_core::{EncoderOptions, ScrfdConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// CLI configuration.
///
/// Resolved from built-in defaults, then an optional TOML file, then
/// `FACECACHE_*` environment variables (highest precedence).
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// SCRFD model tried first (file name in `model_dir`, or absolute path).
    pub fast_model: String,
    /// SCRFD model tried when the fast one finds nothing.
    pub accurate_model: String,
    /// ArcFace model.
    pub recognition_model: String,
    /// Larger image side above which images are downscaled.
    pub max_dimension: u32,
    /// Where copies of face-less images are written.
    pub debug_dir: PathBuf,
    /// Whether to write those copies at all.
    pub save_debug_images: bool,
    /// Cosine similarity threshold for a positive match.
    pub similarity_threshold: f32,
}

/// Keys accepted in the TOML file. All optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct FileConfig {
    model_dir: Option<PathBuf>,
    fast_model: Option<String>,
    accurate_model: Option<String>,
    recognition_model: Option<String>,
    max_dimension: Option<u32>,
    debug_dir: Option<PathBuf>,
    save_debug_images: Option<bool>,
    similarity_threshold: Option<f32>,
}

impl FileConfig {
    fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl Config {
    /// Load configuration from an optional TOML file and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => FileConfig::read(path)?,
            None => FileConfig::default(),
        };
        Ok(Self::resolve(file, |key| std::env::var(key).ok()))
    }

    pub(crate) fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let model_dir = env("FACECACHE_MODEL_DIR")
            .map(PathBuf::from)
            .or(file.model_dir)
            .unwrap_or_else(facecache_core::default_model_dir);

        Self {
            model_dir,
            fast_model: env("FACECACHE_FAST_MODEL")
                .or(file.fast_model)
                .unwrap_or_else(|| "det_500m.onnx".to_string()),
            accurate_model: env("FACECACHE_ACCURATE_MODEL")
                .or(file.accurate_model)
                .unwrap_or_else(|| "det_10g.onnx".to_string()),
            recognition_model: env("FACECACHE_RECOGNITION_MODEL")
                .or(file.recognition_model)
                .unwrap_or_else(|| "w600k_r50.onnx".to_string()),
            max_dimension: nonzero_dimension(
                env_parse(&env, "FACECACHE_MAX_DIMENSION").or(file.max_dimension),
            ),
            debug_dir: env("FACECACHE_DEBUG_DIR")
                .map(PathBuf::from)
                .or(file.debug_dir)
                .unwrap_or_else(|| PathBuf::from("debug")),
            save_debug_images: env("FACECACHE_SAVE_DEBUG_IMAGES")
                .map(|v| v != "0")
                .or(file.save_debug_images)
                .unwrap_or(true),
            similarity_threshold: env_parse(&env, "FACECACHE_SIMILARITY_THRESHOLD")
                .or(file.similarity_threshold)
                .unwrap_or(0.40),
        }
    }

    /// Detection strategies in the order they are tried.
    pub fn detector_configs(&self) -> Vec<ScrfdConfig> {
        vec![
            ScrfdConfig::new("fast", self.model_dir.join(&self.fast_model)),
            ScrfdConfig::new("accurate", self.model_dir.join(&self.accurate_model)),
        ]
    }

    /// Path to the ArcFace recognition model.
    pub fn recognition_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.recognition_model)
    }

    pub fn encoder_options(&self) -> EncoderOptions {
        EncoderOptions {
            max_dimension: self.max_dimension,
            debug_dir: self.save_debug_images.then(|| self.debug_dir.clone()),
        }
    }
}

fn nonzero_dimension(value: Option<u32>) -> u32 {
    match value {
        Some(0) => {
            tracing::warn!(default = DEFAULT_MAX_DIMENSION, "ignoring zero max_dimension");
            DEFAULT_MAX_DIMENSION
        }
        Some(v) => v,
        None => DEFAULT_MAX_DIMENSION,
    }
}

fn env_parse<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment variable");
            None
        }
    }
}
