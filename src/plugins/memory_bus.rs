//! Write-through memory bus.
//!
//! Keeps a [`SemanticIndex`] and a [`DocumentStore`] consistent. Writes hit
//! the index first and the document store second; a document failure
//! rolls the index entry back to the committed document (or removes it)
//! and is reported to governance.
//! Reads fall through three tiers: exact key, keyword scan, similarity.
//!
//! With the intent journal enabled every write is bracketed by `begin` and
//! `commit`/`abort` records, so [`MemoryBus::recover`] can repair writes a
//! crash cut in half.

use crate::core::error::SwitchyardError;
use crate::core::output;
use crate::core::runtime::Switchyard;
use crate::core::time;
use crate::plugins::documents::{DocumentStore, normalize_key};
use crate::plugins::governance::{FailureReport, GovernanceMonitor};
use crate::plugins::index::{Metadata, SemanticIndex};
use clap::Subcommand;
use colored::Colorize;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

pub fn content_sha256(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteResult {
    pub key: String,
    pub path: String,
    pub content_sha256: String,
    pub index_latency_ms: f64,
    pub document_latency_ms: f64,
    pub total_latency_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitSource {
    Exact,
    Keyword,
    Semantic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryHit {
    pub source: HitSource,
    pub key: String,
    pub content: String,
    pub score: f64,
    pub metadata: Metadata,
    /// Time spent in the tier that produced this hit.
    pub latency_ms: f64,
}

/// Receives latency and outcome for every bus operation.
pub trait BusObserver: Send + Sync {
    fn on_write(&self, key: &str, ok: bool, latency_ms: f64);
    fn on_read(&self, query: &str, hits: &[MemoryHit], latency_ms: f64);
}

pub struct TracingObserver;

impl BusObserver for TracingObserver {
    fn on_write(&self, key: &str, ok: bool, latency_ms: f64) {
        tracing::info!(target: "switchyard::memory_bus", key, ok, latency_ms, "memory write");
    }

    fn on_read(&self, query: &str, hits: &[MemoryHit], latency_ms: f64) {
        let exact = hits.iter().filter(|h| h.source == HitSource::Exact).count();
        let keyword = hits.iter().filter(|h| h.source == HitSource::Keyword).count();
        let semantic = hits.iter().filter(|h| h.source == HitSource::Semantic).count();
        tracing::info!(
            target: "switchyard::memory_bus",
            query = %crate::core::output::compact_line(query, 80),
            exact,
            keyword,
            semantic,
            latency_ms,
            "memory read"
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentPhase {
    Begin,
    Commit,
    Abort,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentRecord {
    pub ts: String,
    pub phase: IntentPhase,
    pub key: String,
    pub content_sha256: String,
}

/// Append-only JSONL journal of write intents.
pub struct IntentJournal {
    path: PathBuf,
}

impl IntentJournal {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, phase: IntentPhase, key: &str, sha: &str) -> Result<(), SwitchyardError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let record = IntentRecord {
            ts: time::now_epoch_z(),
            phase,
            key: key.to_string(),
            content_sha256: sha.to_string(),
        };
        let mut f = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(f, "{}", serde_json::to_string(&record)?)?;
        Ok(())
    }

    /// Records whose key has `begin` as its latest phase, in journal order.
    /// Malformed lines are skipped.
    pub fn dangling(&self) -> Result<Vec<IntentRecord>, SwitchyardError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(&self.path)?);
        let mut latest: Vec<IntentRecord> = Vec::new();
        for line in reader.lines() {
            let line = line?;
            let Ok(record) = serde_json::from_str::<IntentRecord>(&line) else {
                continue;
            };
            latest.retain(|r| r.key != record.key);
            latest.push(record);
        }
        latest.retain(|r| r.phase == IntentPhase::Begin);
        Ok(latest)
    }

    fn append_or_warn(&self, phase: IntentPhase, key: &str, sha: &str) {
        if let Err(e) = self.append(phase, key, sha) {
            tracing::warn!(error = %e, key, ?phase, "failed to append intent record");
        }
    }
}

pub struct MemoryBus<I: SemanticIndex, D: DocumentStore> {
    index: I,
    documents: D,
    governance: Arc<GovernanceMonitor>,
    search_dirs: Vec<String>,
    journal: Option<IntentJournal>,
    observer: Box<dyn BusObserver>,
}

impl<I: SemanticIndex, D: DocumentStore> MemoryBus<I, D> {
    pub fn new(index: I, documents: D, governance: Arc<GovernanceMonitor>) -> Self {
        Self {
            index,
            documents,
            governance,
            search_dirs: Vec::new(),
            journal: None,
            observer: Box::new(TracingObserver),
        }
    }

    /// Folders scanned by the keyword tier. With none configured the
    /// keyword tier is skipped.
    pub fn with_search_dirs(mut self, dirs: Vec<String>) -> Self {
        self.search_dirs = dirs;
        self
    }

    pub fn with_intent_journal(mut self, path: &Path) -> Self {
        self.journal = Some(IntentJournal::new(path));
        self
    }

    pub fn with_observer(mut self, observer: Box<dyn BusObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn index(&self) -> &I {
        &self.index
    }

    pub fn documents(&self) -> &D {
        &self.documents
    }

    pub fn governance(&self) -> &Arc<GovernanceMonitor> {
        &self.governance
    }

    pub fn write(&self, path: &str, content: &str, metadata: Metadata) -> Result<WriteResult, SwitchyardError> {
        let start = Instant::now();
        let key = normalize_key(path)?;
        let result = self.write_inner(path, &key, content, metadata, start);
        self.observer.on_write(&key, result.is_ok(), time::elapsed_ms(start));
        result
    }

    fn write_inner(
        &self,
        path: &str,
        key: &str,
        content: &str,
        mut metadata: Metadata,
        start: Instant,
    ) -> Result<WriteResult, SwitchyardError> {
        let sha = content_sha256(content);
        metadata.insert("path".to_string(), JsonValue::String(path.to_string()));
        metadata.insert("content_sha256".to_string(), JsonValue::String(sha.clone()));

        if let Some(journal) = &self.journal {
            if let Err(e) = journal.append(IntentPhase::Begin, key, &sha) {
                self.report_failure(key, path, "write.journal", &e);
                return Err(e);
            }
        }

        let index_start = Instant::now();
        if let Err(e) = self.index.upsert(key, content, &metadata) {
            if let Some(journal) = &self.journal {
                journal.append_or_warn(IntentPhase::Abort, key, &sha);
            }
            self.report_failure(key, path, "write.index", &e);
            return Err(e);
        }
        let index_latency_ms = time::elapsed_ms(index_start);

        let doc_start = Instant::now();
        if let Err(e) = self.documents.write(key, content) {
            let mut detail = e.to_string();
            // A failed rollback leaves the intent open for recover().
            if let Err(rollback) = self.rollback_index(key) {
                tracing::error!(key, error = %rollback, "rollback of index entry failed");
                detail = format!("{}; rollback failed: {}", detail, rollback);
            } else if let Some(journal) = &self.journal {
                journal.append_or_warn(IntentPhase::Abort, key, &sha);
            }
            self.governance.record_failure(FailureReport {
                key: key.to_string(),
                path: path.to_string(),
                operation: "write.document".to_string(),
                error: detail,
            });
            return Err(SwitchyardError::WriteConsistencyFailure {
                key: key.to_string(),
                source: Box::new(e),
            });
        }
        let document_latency_ms = time::elapsed_ms(doc_start);

        if let Some(journal) = &self.journal {
            journal.append_or_warn(IntentPhase::Commit, key, &sha);
        }
        self.governance.record_success();

        Ok(WriteResult {
            key: key.to_string(),
            path: path.to_string(),
            content_sha256: sha,
            index_latency_ms,
            document_latency_ms,
            total_latency_ms: time::elapsed_ms(start),
        })
    }

    /// Up to `max_results` hits for `query`. Exact-key hits come first,
    /// then keyword matches, then similarity matches; a key appears once.
    pub fn read(&self, query: &str, exact_key: Option<&str>, max_results: usize) -> Result<Vec<MemoryHit>, SwitchyardError> {
        let start = Instant::now();
        let result = self.read_inner(query, exact_key, max_results);
        match &result {
            Ok(hits) => self.observer.on_read(query, hits, time::elapsed_ms(start)),
            Err(SwitchyardError::ValidationError(_)) => {}
            Err(e) => self.report_failure(exact_key.unwrap_or(query), query, "read", e),
        }
        result
    }

    fn read_inner(&self, query: &str, exact_key: Option<&str>, max_results: usize) -> Result<Vec<MemoryHit>, SwitchyardError> {
        let mut hits: Vec<MemoryHit> = Vec::new();
        let mut seen: FxHashSet<String> = FxHashSet::default();
        if max_results == 0 {
            return Ok(hits);
        }

        if let Some(raw) = exact_key {
            let tier_start = Instant::now();
            let key = normalize_key(raw)?;
            if let Some(content) = self.documents.read(&key)? {
                seen.insert(key.clone());
                hits.push(MemoryHit {
                    source: HitSource::Exact,
                    metadata: path_metadata(&key),
                    key,
                    content,
                    score: 1.0,
                    latency_ms: time::elapsed_ms(tier_start),
                });
            }
        }

        let needle = query.to_lowercase();
        if hits.len() < max_results && !query.trim().is_empty() && !self.search_dirs.is_empty() {
            let tier_start = Instant::now();
            let mut matched = Vec::new();
            for key in self.keyword_candidates()? {
                if seen.contains(&key) {
                    continue;
                }
                let content = match self.documents.read(&key) {
                    Ok(Some(content)) => content,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "skipping unreadable document in keyword scan");
                        continue;
                    }
                };
                if content.to_lowercase().contains(&needle) {
                    seen.insert(key.clone());
                    matched.push((key, content));
                    if hits.len() + matched.len() >= max_results {
                        break;
                    }
                }
            }
            let latency_ms = time::elapsed_ms(tier_start);
            for (key, content) in matched {
                hits.push(MemoryHit {
                    source: HitSource::Keyword,
                    metadata: path_metadata(&key),
                    key,
                    content,
                    score: 1.0,
                    latency_ms,
                });
            }
        }

        let remaining = max_results - hits.len();
        if remaining > 0 && self.index.count()? > 0 {
            let tier_start = Instant::now();
            let found = self.index.query(query, remaining + seen.len())?;
            let latency_ms = time::elapsed_ms(tier_start);
            hits.extend(
                found
                    .into_iter()
                    .filter(|h| !seen.contains(&h.key))
                    .take(remaining)
                    .map(|h| MemoryHit {
                        source: HitSource::Semantic,
                        key: h.key,
                        content: h.content,
                        score: h.score,
                        metadata: h.metadata,
                        latency_ms,
                    }),
            );
        }

        Ok(hits)
    }

    fn keyword_candidates(&self) -> Result<Vec<String>, SwitchyardError> {
        let mut keys = Vec::new();
        for dir in &self.search_dirs {
            keys.extend(self.documents.list(dir)?);
        }
        Ok(keys)
    }

    /// Repairs writes left between `begin` and `commit`/`abort`. A document
    /// matching the journalled hash means the write landed and is marked
    /// committed; otherwise the index is rebuilt from whatever document is
    /// there (or its entry deleted) and the intent aborted. Returns the
    /// number of keys repaired.
    pub fn recover(&self) -> Result<usize, SwitchyardError> {
        let Some(journal) = &self.journal else {
            return Ok(0);
        };
        let dangling = journal.dangling()?;
        for intent in &dangling {
            let key = intent.key.as_str();
            match self.documents.read(key)? {
                Some(text) if content_sha256(&text) == intent.content_sha256 => {
                    journal.append(IntentPhase::Commit, key, &intent.content_sha256)?;
                    tracing::info!(key, "recovered write: document present, marked committed");
                }
                Some(text) => {
                    self.index.upsert(key, &text, &restored_metadata(key, &text))?;
                    journal.append(IntentPhase::Abort, key, &intent.content_sha256)?;
                    tracing::warn!(key, "recovered write: index restored from document");
                }
                None => {
                    self.index.delete(key)?;
                    journal.append(IntentPhase::Abort, key, &intent.content_sha256)?;
                    tracing::warn!(key, "recovered write: no document, index entry dropped");
                }
            }
        }
        Ok(dangling.len())
    }

    /// Puts the index entry for `key` back in line with the document store:
    /// the committed document if there is one, otherwise nothing.
    fn rollback_index(&self, key: &str) -> Result<(), SwitchyardError> {
        match self.documents.read(key) {
            Ok(Some(previous)) => self
                .index
                .upsert(key, &previous, &restored_metadata(key, &previous)),
            _ => self.index.delete(key),
        }
    }

    fn report_failure(&self, key: &str, path: &str, operation: &str, error: &SwitchyardError) {
        self.governance.record_failure(FailureReport {
            key: key.to_string(),
            path: path.to_string(),
            operation: operation.to_string(),
            error: error.to_string(),
        });
    }
}

#[derive(clap::Args, Debug)]
pub struct MemoryCli {
    #[clap(subcommand)]
    pub command: MemoryCommand,
}

#[derive(Subcommand, Debug)]
pub enum MemoryCommand {
    /// Write a document through the index and the document store.
    Write {
        path: String,
        /// Inline content.
        #[clap(long, conflicts_with = "file")]
        content: Option<String>,
        /// Read content from this file instead.
        #[clap(long)]
        file: Option<PathBuf>,
        /// Extra metadata as key=value; repeatable.
        #[clap(long = "meta")]
        meta: Vec<String>,
    },
    /// Exact key, then keyword, then similarity lookup.
    Read {
        query: String,
        /// Document key tried before any search.
        #[clap(long)]
        key: Option<String>,
        /// Defaults to memory.max_results from switchyard.toml.
        #[clap(long)]
        max: Option<usize>,
    },
    /// Repair writes a crash left half-done.
    Recover,
}

fn parse_meta(pairs: &[String]) -> Result<Metadata, SwitchyardError> {
    let mut metadata = Metadata::new();
    for pair in pairs {
        let Some((k, v)) = pair.split_once('=') else {
            return Err(SwitchyardError::ValidationError(format!(
                "metadata '{}' is not key=value",
                pair
            )));
        };
        metadata.insert(k.trim().to_string(), JsonValue::String(v.to_string()));
    }
    Ok(metadata)
}

pub fn run_memory_cli(yard: &Switchyard, cli: MemoryCli, json: bool) -> Result<(), SwitchyardError> {
    match cli.command {
        MemoryCommand::Write {
            path,
            content,
            file,
            meta,
        } => {
            let content = match (content, file) {
                (Some(c), _) => c,
                (None, Some(f)) => fs::read_to_string(f)?,
                (None, None) => {
                    return Err(SwitchyardError::ValidationError(
                        "memory write needs --content or --file".to_string(),
                    ));
                }
            };
            let result = yard.bus.write(&path, &content, parse_meta(&meta)?)?;
            if json {
                return output::print_envelope("memory.write", serde_json::to_value(&result)?);
            }
            println!(
                "{} {} ({:.1} ms, sha256 {})",
                "Wrote".green(),
                result.key,
                result.total_latency_ms,
                &result.content_sha256[..12]
            );
        }
        MemoryCommand::Read { query, key, max } => {
            let max = max.unwrap_or(yard.config.memory.max_results);
            let hits = yard.bus.read(&query, key.as_deref(), max)?;
            if json {
                return output::print_envelope("memory.read", serde_json::json!({ "hits": hits }));
            }
            if hits.is_empty() {
                println!("No matches.");
            }
            for hit in hits {
                let source = match hit.source {
                    HitSource::Exact => "exact".bright_green(),
                    HitSource::Keyword => "keyword".bright_cyan(),
                    HitSource::Semantic => "semantic".bright_magenta(),
                };
                println!(
                    "[{}] {} {:.3}  {}",
                    source,
                    output::cell(&hit.key, 32),
                    hit.score,
                    output::compact_line(&hit.content, 80)
                );
            }
        }
        MemoryCommand::Recover => {
            let repaired = yard.bus.recover()?;
            if json {
                return output::print_envelope("memory.recover", serde_json::json!({ "repaired": repaired }));
            }
            println!("Repaired {} interrupted write(s)", repaired);
        }
    }
    Ok(())
}

fn path_metadata(key: &str) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("path".to_string(), JsonValue::String(key.to_string()));
    metadata
}

fn restored_metadata(key: &str, text: &str) -> Metadata {
    let mut metadata = path_metadata(key);
    metadata.insert(
        "content_sha256".to_string(),
        JsonValue::String(content_sha256(text)),
    );
    metadata
}
