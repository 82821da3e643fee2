use crate::config::Config;
use facecache_core::{
    ArcFaceRecognizer, CosineMatcher, DetectionStrategy, EncodeError, EncodingTable, FaceEncoder,
    MatchResult, Matcher, ScrfdDetector,
};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] facecache_core::detector::DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] facecache_core::recognizer::RecognizerError),
    #[error("could not encode probe image: {0}")]
    Probe(#[source] EncodeError),
    #[error("encoder task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("encoder unavailable after a failed task")]
    Unavailable,
}

/// Owns the face encoder and runs its blocking work off the async runtime.
pub struct Engine {
    encoder: Option<FaceEncoder>,
}

impl Engine {
    /// Load every configured model. Fails fast if any is missing or invalid.
    pub fn from_config(config: &Config) -> Result<Self, EngineError> {
        let strategies = load_strategies(config)?;

        let recognition_path = config.recognition_model_path();
        let recognizer = ArcFaceRecognizer::load(&recognition_path)?;
        tracing::info!(path = %recognition_path.display(), "ArcFace recognizer loaded");

        Ok(Self::new(FaceEncoder::new(
            strategies,
            Box::new(recognizer),
            config.encoder_options(),
        )))
    }

    /// Load only the detection models. Enough for [`verify`](Self::verify).
    pub fn detection_only(config: &Config) -> Result<Self, EngineError> {
        let strategies = load_strategies(config)?;
        Ok(Self::new(FaceEncoder::detection_only(
            strategies,
            config.encoder_options(),
        )))
    }

    pub fn new(encoder: FaceEncoder) -> Self {
        Self {
            encoder: Some(encoder),
        }
    }

    /// Build the encoding table for `root`.
    pub async fn load(&mut self, root: PathBuf) -> Result<EncodingTable, EngineError> {
        self.run(move |encoder| encoder.load(&root).clone()).await
    }

    /// Whether a face is detectable in `image`.
    pub async fn verify(&mut self, image: PathBuf) -> Result<bool, EngineError> {
        self.run(move |encoder| encoder.verify_image(&image)).await
    }

    /// Load `root`, then match the face in `probe` against it.
    pub async fn identify(
        &mut self,
        root: PathBuf,
        probe: PathBuf,
        threshold: f32,
    ) -> Result<(EncodingTable, MatchResult), EngineError> {
        let table = self.load(root).await?;
        let embedding = self
            .run(move |encoder| encoder.encode_file(&probe))
            .await?
            .map_err(EngineError::Probe)?;

        let result = CosineMatcher.compare(&embedding, &table, threshold);
        tracing::info!(
            matched = result.matched,
            similarity = result.similarity,
            identity = ?result.identity,
            "probe compared"
        );
        Ok((table, result))
    }

    /// Run `f` on a blocking thread with exclusive access to the encoder.
    async fn run<T, F>(&mut self, f: F) -> Result<T, EngineError>
    where
        T: Send + 'static,
        F: FnOnce(&mut FaceEncoder) -> T + Send + 'static,
    {
        let mut encoder = self.encoder.take().ok_or(EngineError::Unavailable)?;
        let (encoder, out) = tokio::task::spawn_blocking(move || {
            let out = f(&mut encoder);
            (encoder, out)
        })
        .await?;
        self.encoder = Some(encoder);
        Ok(out)
    }
}

fn load_strategies(config: &Config) -> Result<Vec<Box<dyn DetectionStrategy>>, EngineError> {
    let mut strategies: Vec<Box<dyn DetectionStrategy>> = Vec::new();
    for detector_config in config.detector_configs() {
        let detector = ScrfdDetector::load(&detector_config)?;
        tracing::info!(
            strategy = %detector_config.name,
            path = %detector_config.model_path.display(),
            "detection strategy ready"
        );
        strategies.push(Box::new(detector));
    }
    Ok(strategies)
}
