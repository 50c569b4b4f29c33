//! Configuration types for question answering over PDFs.
//!
//! All engine behaviour is controlled through [`QaConfig`], built via its
//! [`QaConfigBuilder`]. The builder clamps numeric knobs into range and
//! `build()` rejects combinations that cannot work.

use crate::error::QaError;
use crate::observer::WorkflowObserver;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for a [`crate::engine::QaEngine`].
///
/// Built via [`QaConfig::builder()`] or using [`QaConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_pdfqa::QaConfig;
///
/// let config = QaConfig::builder()
///     .max_rewrites(2)
///     .similarity_threshold(60)
///     .output_dir("evidence")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct QaConfig {
    /// LLM model identifier, e.g. "gpt-4.1-mini", "gemini-2.5-flash".
    /// If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "gemini", "ollama").
    /// If None along with `provider`, the provider is auto-detected from the environment.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for every model call. Default: 0.0.
    ///
    /// Grading and citation extraction must be reproducible; the same
    /// question over the same context should take the same path through the
    /// workflow.
    pub temperature: f32,

    /// Maximum tokens the model may generate per call. Default: 4096.
    pub max_tokens: usize,

    /// Maximum retry attempts on a transient model or retrieval failure. Default: 3.
    ///
    /// Permanent errors (bad API key, malformed request) and schema
    /// violations are never retried.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    /// Maximum number of question rewrites per turn. Default: 3.
    ///
    /// Each rewrite sends the workflow back to the decide step. When the
    /// grader still rejects the context after this many rewrites the turn
    /// fails with [`QaError::MaxIterationsExceeded`].
    pub max_rewrites: u32,

    /// Corrective retries for a malformed synthesizer reply. Default: 1.
    ///
    /// The retry re-sends the prompt together with the rejected reply and the
    /// validation error. `0` fails the turn on the first malformed reply. The
    /// grader never gets a corrective retry.
    pub schema_repair_attempts: u32,

    /// Minimum similarity (0–100, inclusive) for a text block to be
    /// highlighted as evidence. Default: 50.
    pub similarity_threshold: u8,

    /// DPI used when rasterising annotated pages. Range: 72–400. Default: 150.
    pub evidence_dpi: u32,

    /// Maximum rendered image dimension in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Directory receiving `output_page_<n>.png` files. Default: `temp_images`.
    pub output_dir: PathBuf,

    /// Idle time after which a thread checkpoint is dropped. Default: 30 min.
    /// `None` keeps checkpoints until evicted by capacity.
    pub checkpoint_ttl: Option<Duration>,

    /// Maximum number of checkpointed threads. Default: 1024.
    pub checkpoint_capacity: usize,

    /// Chunk size in characters for the built-in index. Default: 2000.
    pub chunk_size: usize,

    /// Overlap between consecutive chunks in characters. Default: 200.
    pub chunk_overlap: usize,

    /// Number of chunks returned per retrieval. Default: 4.
    pub top_k: usize,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Optional per-state event callback.
    pub observer: Option<Arc<dyn WorkflowObserver>>,
}

impl Default for QaConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
            max_rewrites: 3,
            schema_repair_attempts: 1,
            similarity_threshold: 50,
            evidence_dpi: 150,
            max_rendered_pixels: 2000,
            output_dir: PathBuf::from("temp_images"),
            checkpoint_ttl: Some(Duration::from_secs(30 * 60)),
            checkpoint_capacity: 1024,
            chunk_size: 2000,
            chunk_overlap: 200,
            top_k: 4,
            password: None,
            observer: None,
        }
    }
}

impl fmt::Debug for QaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QaConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("max_rewrites", &self.max_rewrites)
            .field("schema_repair_attempts", &self.schema_repair_attempts)
            .field("similarity_threshold", &self.similarity_threshold)
            .field("evidence_dpi", &self.evidence_dpi)
            .field("output_dir", &self.output_dir)
            .field("checkpoint_ttl", &self.checkpoint_ttl)
            .field("checkpoint_capacity", &self.checkpoint_capacity)
            .field("chunk_size", &self.chunk_size)
            .field("chunk_overlap", &self.chunk_overlap)
            .field("top_k", &self.top_k)
            .finish()
    }
}

impl QaConfig {
    /// Create a new builder for `QaConfig`.
    pub fn builder() -> QaConfigBuilder {
        QaConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`QaConfig`].
#[derive(Debug)]
pub struct QaConfigBuilder {
    config: QaConfig,
}

impl QaConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn max_rewrites(mut self, n: u32) -> Self {
        self.config.max_rewrites = n;
        self
    }

    pub fn schema_repair_attempts(mut self, n: u32) -> Self {
        self.config.schema_repair_attempts = n;
        self
    }

    pub fn similarity_threshold(mut self, threshold: u8) -> Self {
        self.config.similarity_threshold = threshold.min(100);
        self
    }

    pub fn evidence_dpi(mut self, dpi: u32) -> Self {
        self.config.evidence_dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn checkpoint_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.config.checkpoint_ttl = ttl;
        self
    }

    pub fn checkpoint_capacity(mut self, n: usize) -> Self {
        self.config.checkpoint_capacity = n;
        self
    }

    pub fn chunk_size(mut self, n: usize) -> Self {
        self.config.chunk_size = n;
        self
    }

    pub fn chunk_overlap(mut self, n: usize) -> Self {
        self.config.chunk_overlap = n;
        self
    }

    pub fn top_k(mut self, n: usize) -> Self {
        self.config.top_k = n.max(1);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn observer(mut self, observer: Arc<dyn WorkflowObserver>) -> Self {
        self.config.observer = Some(observer);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<QaConfig, QaError> {
        let c = &self.config;
        if c.checkpoint_capacity == 0 {
            return Err(QaError::InvalidConfig(
                "Checkpoint capacity must be ≥ 1".into(),
            ));
        }
        if c.chunk_size == 0 {
            return Err(QaError::InvalidConfig("Chunk size must be ≥ 1".into()));
        }
        if c.chunk_overlap >= c.chunk_size {
            return Err(QaError::InvalidConfig(format!(
                "Chunk overlap ({}) must be smaller than chunk size ({})",
                c.chunk_overlap, c.chunk_size
            )));
        }
        if c.output_dir.as_os_str().is_empty() {
            return Err(QaError::InvalidConfig("Output directory must not be empty".into()));
        }
        Ok(self.config)
    }
}
