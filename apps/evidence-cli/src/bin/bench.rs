use std::{env, fs, path::PathBuf, sync::Arc};
use evidence_core::config::{resolve_with_base, Config};
use evidence_core::Embedder;
use evidence_embed::get_default_embedder;
use evidence_hybrid::{EvidenceService, JsonlSink, MetricsSink, NullSink, RunStats};
use serde::Deserialize;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// One judged query: relevant evidence contains any of `answer_substrings`.
#[derive(Debug, Deserialize)]
struct Sample {
    query: String,
    #[serde(default)]
    answer_substrings: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))).init();
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <samples.jsonl> [--top-k N]", args[0]);
        std::process::exit(1);
    }
    let settings = Config::load()?.settings()?;
    let mut samples_path = None; let mut top_k = settings.retrieval.default_top_k;
    let mut i = 1; while i < args.len() { match args[i].as_str() {
        "--top-k" | "-k" => { match args.get(i + 1).and_then(|v| v.parse::<usize>().ok()) { Some(n) => { top_k = n; i += 1; } None => { eprintln!("Error: --top-k requires a number"); std::process::exit(1); } } }
        other => samples_path = Some(PathBuf::from(other)) } i += 1; }
    let Some(samples_path) = samples_path else { eprintln!("Error: missing samples file"); std::process::exit(1); };

    let mut samples = Vec::new();
    for (line_no, line) in fs::read_to_string(&samples_path)?.lines().enumerate() {
        if line.trim().is_empty() { continue; }
        match serde_json::from_str::<Sample>(line) { Ok(s) => samples.push(s), Err(e) => warn!(line = line_no + 1, error = %e, "skipping malformed sample") }
    }

    let base = env::current_dir()?;
    let sink: Arc<dyn MetricsSink> = if settings.metrics.enabled { Arc::new(JsonlSink::open(resolve_with_base(&base, &settings.metrics.log_path))?) } else { Arc::new(NullSink) };
    let embedder: Arc<dyn Embedder> = Arc::from(get_default_embedder(&settings.embedding)?);
    let service = {
        let (base, settings, sink) = (base.clone(), settings.clone(), Arc::clone(&sink));
        tokio::task::spawn_blocking(move || EvidenceService::open(&base, &settings, embedder, sink)).await?
    };

    let mut stats = RunStats::new(&settings.metrics.top_k_thresholds);
    for sample in &samples {
        let (set, record) = service.retrieve_traced(&sample.query, top_k).await;
        let best_rank = set.items.iter().position(|item| sample.answer_substrings.iter().any(|a| !a.is_empty() && item.text.contains(a.as_str()))).map(|p| p + 1);
        stats.record(&record, best_rank);
    }
    service.flush_metrics();
    println!("{}", serde_json::to_string_pretty(&stats.summary())?);
    Ok(())
}
