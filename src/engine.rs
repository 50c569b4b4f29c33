//! Top-level entry points: ingest documents, ask questions, locate evidence.
//!
//! A [`QaEngine`] owns everything that outlives a single turn: the model and
//! retrieval capabilities, the built-in index, and the checkpoint arena.
//! Each call to [`QaEngine::ask`] runs one independent turn through the
//! [`Workflow`]; concurrent calls on different threads never share state.

use crate::capability::{LanguageModel, Retriever};
use crate::checkpoint::{CheckpointStore, ThreadId};
use crate::config::QaConfig;
use crate::error::QaError;
use crate::evidence::{self, DocumentStore, LocateOptions};
use crate::index::DocumentIndex;
use crate::output::{EvidenceReport, QueryResponse, TurnOutput};
use crate::pipeline::llm::ProviderModel;
use crate::pipeline::{input, render};
use crate::similarity::Similarity;
use crate::workflow::Workflow;
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEFAULT_MODEL: &str = "gpt-4.1-mini";

/// Outcome of [`QaEngine::ingest`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub documents: usize,
    pub pages: usize,
    pub chunks: usize,
}

/// Question answering over a set of PDFs.
pub struct QaEngine {
    config: QaConfig,
    model: Arc<dyn LanguageModel>,
    retriever: Arc<dyn Retriever>,
    /// `None` once an external retriever has been injected.
    index: Option<Arc<DocumentIndex>>,
    checkpoints: CheckpointStore,
    similarity: Arc<dyn Similarity>,
    workflow: Workflow,
}

impl QaEngine {
    /// Build an engine around `model`, retrieving from the built-in index.
    pub fn new(model: Arc<dyn LanguageModel>, config: QaConfig) -> Self {
        let index = Arc::new(DocumentIndex::from_config(&config));
        let retriever: Arc<dyn Retriever> = index.clone();
        let workflow = Workflow::new(model.clone(), retriever.clone(), &config);
        Self {
            checkpoints: CheckpointStore::new(config.checkpoint_ttl, config.checkpoint_capacity),
            similarity: evidence::default_similarity(),
            config,
            model,
            retriever,
            index: Some(index),
            workflow,
        }
    }

    /// Build an engine whose model is resolved from `config` and the
    /// environment (see [`resolve_provider`]).
    pub fn from_config(config: QaConfig) -> Result<Self, QaError> {
        let provider = resolve_provider(&config)?;
        info!("Using provider {}/{}", provider.name(), provider.model());
        let model: Arc<dyn LanguageModel> = Arc::new(ProviderModel::new(provider, &config));
        Ok(Self::new(model, config))
    }

    /// Retrieve from `retriever` instead of the built-in index.
    pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.workflow = Workflow::new(self.model.clone(), retriever.clone(), &self.config);
        self.retriever = retriever;
        self.index = None;
        self
    }

    /// Replace the similarity measure used by the evidence locator.
    pub fn with_similarity(mut self, similarity: Arc<dyn Similarity>) -> Self {
        self.similarity = similarity;
        self
    }

    pub fn config(&self) -> &QaConfig {
        &self.config
    }

    /// The built-in index, unless an external retriever was injected.
    pub fn index(&self) -> Option<&DocumentIndex> {
        self.index.as_deref()
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    // ── Ingestion ────────────────────────────────────────────────────────────

    /// Validate, extract and index each PDF.
    ///
    /// Stops at the first document that fails; documents before it stay
    /// indexed.
    pub async fn ingest<P: AsRef<Path>>(&self, paths: &[P]) -> Result<IngestSummary, QaError> {
        let index = self.index.as_ref().ok_or_else(|| {
            QaError::InvalidConfig(
                "ingest needs the built-in index; this engine uses an external retriever".into(),
            )
        })?;

        let start = Instant::now();
        let mut summary = IngestSummary::default();
        for path in paths {
            let pdf_path = input::validate_pdf(path)?;
            let extracted =
                render::extract_pages(&pdf_path, self.config.password.as_deref()).await?;
            summary.documents += 1;
            summary.pages += extracted.pages.len();
            summary.chunks += index.add_document(&extracted);
        }

        info!(
            "Ingested {} documents ({} pages, {} chunks) in {}ms",
            summary.documents,
            summary.pages,
            summary.chunks,
            start.elapsed().as_millis()
        );
        Ok(summary)
    }

    // ── Questions ────────────────────────────────────────────────────────────

    /// Answer `question`, continuing `thread` when given.
    ///
    /// # Errors
    /// [`QaError::PreconditionFailed`] when nothing has been ingested yet,
    /// plus any fatal error of the turn itself.
    pub async fn ask(
        &self,
        question: &str,
        thread: Option<ThreadId>,
    ) -> Result<TurnOutput, QaError> {
        self.ask_cancellable(question, thread, &CancellationToken::new())
            .await
    }

    /// [`QaEngine::ask`] that aborts with [`QaError::Cancelled`] once `cancel`
    /// fires.
    pub async fn ask_cancellable(
        &self,
        question: &str,
        thread: Option<ThreadId>,
        cancel: &CancellationToken,
    ) -> Result<TurnOutput, QaError> {
        if !self.retriever.is_ready() {
            return Err(QaError::PreconditionFailed(
                "no documents have been ingested yet; add a PDF before asking".into(),
            ));
        }

        let thread_id = thread.unwrap_or_default();
        let conversation = match self.checkpoints.load(&thread_id) {
            Some(conversation) => conversation,
            None => {
                if thread.is_some() {
                    debug!("thread {}: no checkpoint, starting fresh", thread_id);
                }
                Default::default()
            }
        };

        let (output, conversation) = self
            .workflow
            .run_turn(thread_id, conversation, question, cancel)
            .await?;
        self.checkpoints.save(thread_id, conversation);
        Ok(output)
    }

    // ── Evidence ─────────────────────────────────────────────────────────────

    /// Render highlighted evidence pages for the turn's citations using
    /// pdfium.
    ///
    /// Only documents the retriever returned during the turn are opened;
    /// citations naming anything else are reported as
    /// [`CitationError::SourceNotFound`](crate::CitationError::SourceNotFound).
    pub async fn locate(&self, turn: &TurnOutput) -> Result<EvidenceReport, QaError> {
        if turn.result.citations.is_empty() {
            return Ok(EvidenceReport::default());
        }
        evidence::locate_evidence(
            turn.result.citations.clone(),
            self.locate_options(turn),
            &self.config,
            self.similarity.clone(),
        )
        .await
    }

    /// [`QaEngine::locate`] against `store` instead of pdfium.
    pub fn locate_with(
        &self,
        store: &dyn DocumentStore,
        turn: &TurnOutput,
    ) -> Result<EvidenceReport, QaError> {
        evidence::locate(
            store,
            &turn.result.citations,
            &self.config.output_dir,
            &self.locate_options(turn),
            self.similarity.as_ref(),
        )
    }

    fn locate_options(&self, turn: &TurnOutput) -> LocateOptions {
        LocateOptions::from_config(&self.config).with_sources(turn.sources.clone())
    }

    /// Ask, then locate evidence: the full response a front end needs.
    pub async fn ask_with_evidence(
        &self,
        question: &str,
        thread: Option<ThreadId>,
    ) -> Result<QueryResponse, QaError> {
        let turn = self.ask(question, thread).await?;
        let report = self.locate(&turn).await?;
        if let Some(summary) = report.error_summary() {
            warn!("thread {}: some citations were skipped: {}", turn.thread_id, summary);
        }
        QueryResponse::from_turn(&turn, &report)
    }

    // ── Reset ────────────────────────────────────────────────────────────────

    /// Drop every indexed chunk and checkpoint, and delete rendered
    /// `output_page_*.png` files. Returns the number of files removed.
    pub fn reset(&self) -> Result<usize, QaError> {
        if let Some(index) = &self.index {
            index.clear();
        }
        self.checkpoints.clear();

        let dir = &self.config.output_dir;
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(QaError::OutputWriteFailed {
                    path: dir.clone(),
                    source: e,
                })
            }
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with("output_page_") && name.ends_with(".png") {
                std::fs::remove_file(entry.path()).map_err(|e| QaError::OutputWriteFailed {
                    path: entry.path(),
                    source: e,
                })?;
                removed += 1;
            }
        }
        info!("Reset: removed {} evidence images", removed);
        Ok(removed)
    }
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, QaError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        QaError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`); the API key is
///    read from the provider's usual environment variable.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **OpenAI** when `OPENAI_API_KEY` is set.
/// 5. **Auto-detection** through [`ProviderFactory::from_env`].
///
/// The provider must support tool calling: the decide step offers the
/// retrieval tool on every turn.
pub fn resolve_provider(config: &QaConfig) -> Result<Arc<dyn LLMProvider>, QaError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| QaError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
