use std::{env, path::PathBuf, sync::Arc};
use evidence_core::config::{resolve_with_base, Config};
use evidence_core::data_processor::DataProcessor;
use evidence_core::Chunker;
use evidence_embed::get_default_embedder;
use evidence_index::{BuildOptions, CacheOrigin, IndexCache};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))).init();
    let config = Config::load().map_err(|e| { eprintln!("Error loading config: {}", e); e })?;
    let settings = config.settings()?;
    let args: Vec<String> = env::args().skip(1).collect();
    let mut data_dir = None; let mut limit = None; let mut force = false;
    let mut i = 0; while i < args.len() { match args[i].as_str() {
        "--force" | "-f" => force = true,
        "--limit" => { match args.get(i + 1).and_then(|v| v.parse::<usize>().ok()) { Some(n) => { limit = Some(n); i += 1; } None => { eprintln!("Error: --limit requires a number"); std::process::exit(1); } } }
        _ if !args[i].starts_with('-') => data_dir = Some(PathBuf::from(&args[i])), _ => {} } i += 1; }
    let base = env::current_dir()?;
    let data_dir = data_dir.unwrap_or_else(|| resolve_with_base(&base, &settings.data.corpus_dir));
    println!("Evidence Indexer\n================");
    println!("Corpus directory: {}", data_dir.display());

    let processor = DataProcessor::new();
    let corpus = match limit { Some(n) => { println!("🔢 Limiting corpus to {} files", n); processor.process_directory_limited(&data_dir, n)? } None => processor.process_directory(&data_dir)? };
    for skipped in &corpus.skipped { println!("⚠️  Skipped {}: {}", skipped.file, skipped.reason); }

    let embedder: Arc<dyn evidence_core::Embedder> = Arc::from(get_default_embedder(&settings.embedding)?);
    let cache = IndexCache::from_settings(resolve_with_base(&base, &settings.index.cache_dir), &settings.index);
    let chunker = Chunker::new(settings.chunking);
    if force {
        let key = cache.key_for(&corpus, &chunker, embedder.as_ref());
        println!("🧹 Removing cached snapshot {}", key);
        cache.invalidate(&key)?;
    }

    let options = BuildOptions::from_settings(&settings.index);
    let cancel = options.cancel.clone();
    let build = tokio::task::spawn_blocking(move || cache.get_or_build(&corpus, &chunker, embedder.as_ref(), &options));
    tokio::pin!(build);
    let outcome = tokio::select! {
        res = &mut build => res??,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\n⏹  Interrupted, cancelling build...");
            cancel.cancel();
            build.await??
        }
    };

    let verb = match outcome.origin { CacheOrigin::Loaded => "Loaded cached", CacheOrigin::Built => "Built" };
    println!("\n✅ {} index {} ({} chunks, dim {}, model {}) in {:.1?}", verb, outcome.cache_key, outcome.index.len(), outcome.index.vector_dim(), outcome.index.embedding_model_id(), outcome.elapsed);
    println!("\n💡 To search, use: cargo run --bin evidence-search '<query>'");
    Ok(())
}
