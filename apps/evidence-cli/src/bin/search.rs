use std::{env, sync::Arc};
use evidence_core::config::{resolve_with_base, Config};
use evidence_core::Embedder;
use evidence_embed::get_default_embedder;
use evidence_hybrid::{EvidenceService, JsonlSink, MetricsSink, NullSink};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))).init();
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <query> [--top-k N]", args[0]);
        eprintln!("Example: {} '第三季度销售额' --top-k 5", args[0]);
        std::process::exit(1);
    }
    let settings = Config::load()?.settings()?;
    let mut query_parts = Vec::new(); let mut top_k = settings.retrieval.default_top_k;
    let mut i = 1; while i < args.len() { match args[i].as_str() {
        "--top-k" | "-k" => { match args.get(i + 1).and_then(|v| v.parse::<usize>().ok()) { Some(n) => { top_k = n; i += 1; } None => { eprintln!("Error: --top-k requires a number"); std::process::exit(1); } } }
        other => query_parts.push(other.to_string()) } i += 1; }
    let query_text = query_parts.join(" ");

    let base = env::current_dir()?;
    let sink: Arc<dyn MetricsSink> = if settings.metrics.enabled { Arc::new(JsonlSink::open(resolve_with_base(&base, &settings.metrics.log_path))?) } else { Arc::new(NullSink) };
    let embedder: Arc<dyn Embedder> = Arc::from(get_default_embedder(&settings.embedding)?);
    let service = {
        let (base, settings, sink) = (base.clone(), settings.clone(), Arc::clone(&sink));
        tokio::task::spawn_blocking(move || EvidenceService::open(&base, &settings, embedder, sink)).await?
    };

    println!("🔍 evidence-search\n=================");
    println!("Query: {}", query_text);
    let set = service.retrieve_evidence(&query_text, top_k).await;
    println!("Mode: {}", set.mode.as_str());
    for warning in &set.warnings { println!("⚠️  {}", warning); }
    println!("\n🔍 Found {} results for: \"{}\"", set.items.len(), query_text);
    for (i, item) in set.items.iter().enumerate() {
        println!("\n  {}. score={:.4}  id={}  section={}", i + 1, item.score, item.chunk_id, item.section_title);
        println!("     📝 {}", item.text);
    }
    service.flush_metrics();
    Ok(())
}
