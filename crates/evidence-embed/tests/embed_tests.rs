use evidence_core::config::EmbeddingSettings;
use evidence_core::Embedder;
use evidence_embed::{get_default_embedder, HashEmbedder};

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[test]
fn hash_provider_shapes_and_determinism() {
    let settings = EmbeddingSettings { provider: "hash".into(), hash_dim: 256, ..EmbeddingSettings::default() };
    let embedder = get_default_embedder(&settings).expect("embedder");
    assert_eq!(embedder.model_id(), "hash:d256");

    let texts = vec!["hello world".to_string(), "hello world".to_string()];
    let embs = embedder.embed_batch(&texts).expect("embed_batch");
    assert_eq!(embs.len(), 2);
    let v1 = &embs[0];
    assert_eq!(v1.len(), 256);

    let norm: f32 = v1.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() <= 1e-3, "vector is L2-normalized (norm={norm})");
    for (a, b) in v1.iter().zip(embs[1].iter()) { assert!((a - b).abs() <= 1e-6); }
}

#[test]
fn shared_cjk_phrases_are_closer() {
    let e = HashEmbedder::new(384);
    let q = e.embed_query("销售额").expect("query");
    let sales = e.embed_text("第一季度销售额为500万。");
    let team = e.embed_text("研发团队扩充到四十人。");
    assert!(cosine(&q, &sales) > cosine(&q, &team));
}

#[test]
fn empty_text_embeds_to_zero_vector() {
    let v = HashEmbedder::new(8).embed_text("");
    assert!(v.iter().all(|x| *x == 0.0));
}

#[test]
fn unknown_provider_is_rejected() {
    let settings = EmbeddingSettings { provider: "remote".into(), ..EmbeddingSettings::default() };
    assert!(get_default_embedder(&settings).is_err());
}

#[test]
fn unknown_device_is_rejected_before_loading_the_model() {
    let settings = EmbeddingSettings { provider: "local".into(), device: "tpu".into(), ..EmbeddingSettings::default() };
    let err = get_default_embedder(&settings).err().expect("bad device must fail");
    assert!(err.to_string().contains("tpu"));
}
