//! Structured retrieval metrics: one record per query and per index open,
//! written to pluggable sinks, plus an in-process aggregate for runs.
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Mutex;
use std::thread::JoinHandle;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::degradation::{DegradationEvent, DegradationReason, Retrieval, RetrievalMode};

/// Short stable hash so raw queries never reach the log.
pub fn query_hash(query: &str) -> String {
    let hex = blake3::hash(query.as_bytes()).to_hex();
    hex.as_str()[..16].to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    pub timestamp: DateTime<Utc>,
    pub query_hash: String,
    pub top_k: usize,
    pub total_chunks: usize,
    pub lexical_candidates: usize,
    pub vector_candidates: usize,
    pub fused_candidates: usize,
    pub reranked: usize,
    pub lexical_ms: f64,
    pub vector_ms: f64,
    pub fusion_ms: f64,
    pub rerank_ms: f64,
    pub total_ms: f64,
    pub result_count: usize,
    pub mode: RetrievalMode,
    pub degradation: Option<DegradationReason>,
    pub events: Vec<DegradationEvent>,
}

impl QueryRecord {
    pub fn from_retrieval(query: &str, top_k: usize, total_chunks: usize, retrieval: &Retrieval) -> Self {
        let t = &retrieval.trace;
        Self {
            timestamp: Utc::now(),
            query_hash: query_hash(query),
            top_k,
            total_chunks,
            lexical_candidates: t.lexical_candidates,
            vector_candidates: t.vector_candidates,
            fused_candidates: t.fused_candidates,
            reranked: t.reranked,
            lexical_ms: t.lexical_ms,
            vector_ms: t.vector_ms,
            fusion_ms: t.fusion_ms,
            rerank_ms: t.rerank_ms,
            total_ms: t.total_ms,
            result_count: retrieval.results.len(),
            mode: retrieval.mode,
            degradation: retrieval.primary_reason(),
            events: retrieval.degradations.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildOrigin {
    Loaded,
    Built,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRecord {
    pub timestamp: DateTime<Utc>,
    pub cache_key: Option<String>,
    pub origin: BuildOrigin,
    pub chunk_count: usize,
    pub skipped_documents: usize,
    pub latency_ms: f64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricRecord {
    Query(QueryRecord),
    Build(BuildRecord),
}

/// Destination for metric records. Emitting must not block a query and
/// must not fail it.
pub trait MetricsSink: Send + Sync {
    fn emit(&self, record: MetricRecord);
    /// Block until everything emitted so far is durable.
    fn flush(&self) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl MetricsSink for NullSink {
    fn emit(&self, _record: MetricRecord) {}
}

#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<MetricRecord>>,
}

impl MemorySink {
    pub fn new() -> Self { Self::default() }

    pub fn records(&self) -> Vec<MetricRecord> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl MetricsSink for MemorySink {
    fn emit(&self, record: MetricRecord) {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).push(record);
    }
}

enum SinkMessage {
    Record(Box<MetricRecord>),
    Flush(mpsc::Sender<()>),
}

/// Append-only JSON Lines file written by a background thread.
pub struct JsonlSink {
    path: PathBuf,
    tx: Mutex<Option<mpsc::Sender<SinkMessage>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl JsonlSink {
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let (tx, rx) = mpsc::channel::<SinkMessage>();
        let log_path = path.clone();
        let worker = std::thread::Builder::new()
            .name("metrics-jsonl".into())
            .spawn(move || {
                let mut out = BufWriter::new(file);
                for msg in rx {
                    match msg {
                        SinkMessage::Record(record) => {
                            let written = serde_json::to_string(&record)
                                .map_err(std::io::Error::from)
                                .and_then(|line| writeln!(out, "{line}"))
                                .and_then(|()| out.flush());
                            if let Err(e) = written {
                                warn!(path = %log_path.display(), error = %e, "failed to write metric record");
                            }
                        }
                        SinkMessage::Flush(ack) => {
                            if let Err(e) = out.flush().and_then(|()| out.get_ref().sync_data()) {
                                warn!(path = %log_path.display(), error = %e, "failed to flush metrics log");
                            }
                            let _ = ack.send(());
                        }
                    }
                }
            })?;
        Ok(Self { path, tx: Mutex::new(Some(tx)), worker: Mutex::new(Some(worker)) })
    }

    pub fn path(&self) -> &Path { &self.path }

    fn send(&self, msg: SinkMessage) -> bool {
        let guard = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(tx) => tx.send(msg).is_ok(),
            None => false,
        }
    }
}

impl MetricsSink for JsonlSink {
    fn emit(&self, record: MetricRecord) {
        if !self.send(SinkMessage::Record(Box::new(record))) {
            warn!(path = %self.path.display(), "metrics writer stopped; record dropped");
        }
    }

    fn flush(&self) {
        let (ack_tx, ack_rx) = mpsc::channel();
        if self.send(SinkMessage::Flush(ack_tx)) {
            let _ = ack_rx.recv();
        }
    }
}

impl Drop for JsonlSink {
    fn drop(&mut self) {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(worker) = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = worker.join();
        }
    }
}

/// Aggregate over a run of queries. Hit rates are over all recorded
/// queries; a query without a judged rank counts as a miss.
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    thresholds: Vec<usize>,
    total_queries: usize,
    total_latency_ms: f64,
    total_results: usize,
    last_chunk_count: usize,
    modes: BTreeMap<RetrievalMode, usize>,
    reasons: BTreeMap<DegradationReason, usize>,
    hits: BTreeMap<usize, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_queries: usize,
    pub avg_latency_ms: f64,
    pub avg_results: f64,
    pub last_chunk_count: usize,
    pub mode_counts: BTreeMap<String, usize>,
    pub degradation_counts: BTreeMap<String, usize>,
    pub top_k_hit_rate: BTreeMap<String, f64>,
}

impl RunStats {
    pub fn new(thresholds: &[usize]) -> Self {
        let mut thresholds: Vec<usize> = thresholds.to_vec();
        thresholds.sort_unstable();
        thresholds.dedup();
        let hits = thresholds.iter().map(|&k| (k, 0)).collect();
        Self { thresholds, hits, ..Self::default() }
    }

    /// `best_rank` is the 1-based rank of the first relevant result.
    pub fn record(&mut self, query: &QueryRecord, best_rank: Option<usize>) {
        self.total_queries += 1;
        self.total_latency_ms += query.total_ms;
        self.total_results += query.result_count;
        self.last_chunk_count = query.total_chunks;
        *self.modes.entry(query.mode).or_insert(0) += 1;
        for event in &query.events {
            *self.reasons.entry(event.reason).or_insert(0) += 1;
        }
        if let Some(rank) = best_rank {
            for &k in &self.thresholds {
                if rank <= k {
                    *self.hits.entry(k).or_insert(0) += 1;
                }
            }
        }
    }

    pub fn total_queries(&self) -> usize { self.total_queries }

    pub fn hit_rate(&self, k: usize) -> f64 {
        if self.total_queries == 0 {
            return 0.0;
        }
        self.hits.get(&k).copied().unwrap_or(0) as f64 / self.total_queries as f64
    }

    pub fn summary(&self) -> RunSummary {
        let per_query = |total: f64| if self.total_queries == 0 { 0.0 } else { total / self.total_queries as f64 };
        RunSummary {
            total_queries: self.total_queries,
            avg_latency_ms: per_query(self.total_latency_ms),
            avg_results: per_query(self.total_results as f64),
            last_chunk_count: self.last_chunk_count,
            mode_counts: self.modes.iter().map(|(m, c)| (m.as_str().to_string(), *c)).collect(),
            degradation_counts: self.reasons.iter().map(|(r, c)| (r.as_str().to_string(), *c)).collect(),
            top_k_hit_rate: self.thresholds.iter().map(|&k| (format!("top@{k}"), self.hit_rate(k))).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(mode: RetrievalMode, events: Vec<DegradationEvent>, total_ms: f64) -> QueryRecord {
        QueryRecord {
            timestamp: Utc::now(),
            query_hash: query_hash("q"),
            top_k: 5,
            total_chunks: 10,
            lexical_candidates: 3,
            vector_candidates: 3,
            fused_candidates: 4,
            reranked: 0,
            lexical_ms: 0.1,
            vector_ms: 0.2,
            fusion_ms: 0.1,
            rerank_ms: 0.0,
            total_ms,
            result_count: 4,
            mode,
            degradation: events.first().map(|e| e.reason),
            events,
        }
    }

    #[test]
    fn query_hash_is_short_and_stable() {
        assert_eq!(query_hash("销售额").len(), 16);
        assert_eq!(query_hash("销售额"), query_hash("销售额"));
        assert_ne!(query_hash("a"), query_hash("b"));
    }

    #[test]
    fn records_are_tagged_by_kind() {
        let json = serde_json::to_value(MetricRecord::Query(record(RetrievalMode::Full, vec![], 1.0))).unwrap();
        assert_eq!(json["kind"], "query");
        assert_eq!(json["mode"], "full");
        assert!(json["degradation"].is_null());
    }

    #[test]
    fn run_stats_aggregate_hits_modes_and_reasons() {
        let mut stats = RunStats::new(&[5, 1, 3, 3]);
        stats.record(&record(RetrievalMode::Full, vec![], 10.0), Some(1));
        stats.record(&record(RetrievalMode::Full, vec![], 20.0), Some(4));
        let degraded = vec![DegradationEvent::new(DegradationReason::EmbeddingUnavailable, "timeout")];
        stats.record(&record(RetrievalMode::LexicalOnly, degraded, 30.0), None);

        let s = stats.summary();
        assert_eq!(s.total_queries, 3);
        assert!((s.avg_latency_ms - 20.0).abs() < 1e-9);
        assert_eq!(s.mode_counts["full"], 2);
        assert_eq!(s.mode_counts["lexical_only"], 1);
        assert_eq!(s.degradation_counts["embedding_unavailable"], 1);
        assert!((s.top_k_hit_rate["top@1"] - 1.0 / 3.0).abs() < 1e-9);
        assert!((s.top_k_hit_rate["top@3"] - 1.0 / 3.0).abs() < 1e-9);
        assert!((s.top_k_hit_rate["top@5"] - 2.0 / 3.0).abs() < 1e-9);
    }
}
