//! Built-in in-memory document index.
//!
//! Page text is split into overlapping character windows (2000 chars with
//! 200 overlap by default), each chunk keeping `{page, title, source}`
//! metadata. Retrieval ranks chunks by TF-IDF weighted term overlap with the
//! query and returns the top `k`. Good enough for a handful of PDFs on a
//! laptop; inject any other [`Retriever`] for real corpora.

use crate::capability::Retriever;
use crate::config::QaConfig;
use crate::error::CapabilityError;
use crate::output::{ChunkMetadata, RetrievedDocument};
use crate::pipeline::render::ExtractedDocument;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

struct IndexedChunk {
    document: RetrievedDocument,
    terms: HashMap<String, usize>,
}

/// Lexical chunk index implementing [`Retriever`].
pub struct DocumentIndex {
    chunks: RwLock<Vec<IndexedChunk>>,
    chunk_size: usize,
    chunk_overlap: usize,
    top_k: usize,
}

impl DocumentIndex {
    pub fn new(chunk_size: usize, chunk_overlap: usize, top_k: usize) -> Self {
        Self {
            chunks: RwLock::new(Vec::new()),
            chunk_size: chunk_size.max(1),
            chunk_overlap: chunk_overlap.min(chunk_size.saturating_sub(1)),
            top_k: top_k.max(1),
        }
    }

    pub fn from_config(config: &QaConfig) -> Self {
        Self::new(config.chunk_size, config.chunk_overlap, config.top_k)
    }

    /// Index every page of `document`, replacing any earlier chunks from the
    /// same source. Returns the number of chunks added.
    pub fn add_document(&self, document: &ExtractedDocument) -> usize {
        let mut new_chunks = Vec::new();
        for (page, text) in document.pages.iter().enumerate() {
            for chunk in split_text(text, self.chunk_size, self.chunk_overlap) {
                new_chunks.push(RetrievedDocument::new(
                    chunk,
                    ChunkMetadata {
                        page: Some(page),
                        title: document.title.clone(),
                        source: document.source.clone(),
                    },
                ));
            }
        }

        let added = new_chunks.len();
        self.remove_source(&document.source);
        self.add_chunks(new_chunks);
        info!("Indexed {} chunks from {}", added, document.source);
        added
    }

    /// Add pre-chunked documents as-is.
    pub fn add_chunks(&self, documents: Vec<RetrievedDocument>) {
        let mut chunks = self.chunks.write();
        chunks.extend(documents.into_iter().map(|document| IndexedChunk {
            terms: term_counts(&document.text),
            document,
        }));
    }

    pub fn remove_source(&self, source: &str) {
        self.chunks
            .write()
            .retain(|c| c.document.metadata.source != source);
    }

    pub fn len(&self) -> usize {
        self.chunks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.read().is_empty()
    }

    pub fn clear(&self) {
        self.chunks.write().clear();
    }

    /// Top-k chunks sharing at least one term with `query`, best first.
    pub fn search(&self, query: &str) -> Vec<RetrievedDocument> {
        let query_terms: HashSet<String> = tokenize(query).into_iter().collect();
        let chunks = self.chunks.read();
        if query_terms.is_empty() || chunks.is_empty() {
            return Vec::new();
        }

        let n = chunks.len() as f64;
        let idf: HashMap<&str, f64> = query_terms
            .iter()
            .map(|t| {
                let df = chunks.iter().filter(|c| c.terms.contains_key(t)).count() as f64;
                (t.as_str(), (1.0 + (n - df + 0.5) / (df + 0.5)).ln())
            })
            .collect();

        let mut scored: Vec<(f64, usize)> = chunks
            .iter()
            .enumerate()
            .filter_map(|(i, c)| {
                let score: f64 = query_terms
                    .iter()
                    .filter_map(|t| {
                        let tf = *c.terms.get(t)? as f64;
                        Some(idf[t.as_str()] * tf / (tf + 1.2))
                    })
                    .sum();
                (score > 0.0).then_some((score, i))
            })
            .collect();

        // Ties keep insertion order.
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });
        scored.truncate(self.top_k);
        debug!("search {:?}: {} hits", query, scored.len());

        scored
            .into_iter()
            .map(|(_, i)| chunks[i].document.clone())
            .collect()
    }
}

#[async_trait]
impl Retriever for DocumentIndex {
    async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedDocument>, CapabilityError> {
        Ok(self.search(query))
    }

    fn is_ready(&self) -> bool {
        !self.is_empty()
    }
}

/// Split `text` into windows of at most `size` chars overlapping by
/// `overlap` chars, breaking on whitespace when one falls in the second half
/// of the window.
pub fn split_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let size = size.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let mut end = (start + size).min(chars.len());
        if end < chars.len() {
            if let Some(ws) = (start + size / 2..end).rev().find(|&i| chars[i].is_whitespace()) {
                end = ws;
            }
        }

        let chunk: String = chars[start..end].iter().collect();
        let chunk = chunk.trim();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }
        if end >= chars.len() {
            break;
        }

        let next = end.saturating_sub(overlap);
        start = if next > start { next } else { end };
    }

    chunks
}

fn term_counts(text: &str) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for term in tokenize(text) {
        *counts.entry(term).or_insert(0) += 1;
    }
    counts
}

/// Lowercase alphanumeric words of two or more chars, minus stop words.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .filter(|w| w.chars().count() > 1 && !is_stop_word(w))
        .collect()
}

fn is_stop_word(word: &str) -> bool {
    matches!(
        word,
        "the"
            | "and"
            | "for"
            | "are"
            | "but"
            | "not"
            | "was"
            | "what"
            | "how"
            | "why"
            | "who"
            | "which"
            | "this"
            | "that"
            | "with"
            | "from"
            | "does"
            | "is"
            | "of"
            | "to"
            | "in"
            | "on"
            | "an"
            | "it"
            | "as"
            | "by"
            | "be"
            | "or"
            | "at"
    )
}
