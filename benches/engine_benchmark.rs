use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use findex::core::config::EngineConfig;
use findex::core::engine::SearchEngine;
use findex::search::results::SearchRequest;
use rand::Rng;
use serde_json::json;
use tempfile::TempDir;
use tokio::runtime::Runtime;

/// Random title built from a small vocabulary so terms repeat.
fn random_title(words: usize) -> String {
    let vocabulary = ["the", "quick", "brown", "fox", "jumps", "over", "lazy", "dog"];
    let mut rng = rand::thread_rng();
    (0..words)
        .map(|_| vocabulary[rng.gen_range(0..vocabulary.len())])
        .collect::<Vec<_>>()
        .join(" ")
}

fn seeded_engine(rt: &Runtime, docs: usize) -> (TempDir, SearchEngine) {
    let dir = TempDir::new().unwrap();
    let engine = rt
        .block_on(SearchEngine::open(EngineConfig::with_data_dir(dir.path())))
        .unwrap();

    rt.block_on(async {
        engine.create_index("bench", None, None).await.unwrap();
        let items: Vec<_> = (0..docs)
            .map(|i| {
                (
                    Some(format!("doc{}", i)),
                    json!({"title": random_title(12), "category": format!("cat{}", i % 10)}),
                )
            })
            .collect();
        engine.bulk_index("bench", items).await.unwrap();
        engine.flush().await.unwrap();
    });

    (dir, engine)
}

fn bench_index_document(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (_dir, engine) = seeded_engine(&rt, 100);

    c.bench_function("index_single_document", |b| {
        let mut id = 0usize;
        b.iter(|| {
            rt.block_on(async {
                engine
                    .index_document(
                        "bench",
                        Some(format!("extra{}", id)),
                        json!({"title": random_title(12)}),
                    )
                    .await
                    .unwrap();
            });
            id += 1;
        });
    });
}

fn bench_term_search(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("term_search");

    for docs in [100usize, 1000] {
        let (_dir, engine) = seeded_engine(&rt, docs);
        group.bench_with_input(BenchmarkId::from_parameter(docs), &docs, |b, _| {
            b.iter(|| {
                rt.block_on(async {
                    let request = SearchRequest::for_query(
                        json!({"match": {"field": "title", "value": "quick"}}),
                    );
                    engine.search("bench", request).await.unwrap()
                })
            });
        });
    }
    group.finish();
}

fn bench_wildcard_search(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (_dir, engine) = seeded_engine(&rt, 1000);

    c.bench_function("wildcard_search", |b| {
        b.iter(|| {
            rt.block_on(async {
                let request = SearchRequest::for_query(
                    json!({"wildcard": {"field": "title", "value": "qu*"}}),
                );
                engine.search("bench", request).await.unwrap()
            })
        });
    });
}

criterion_group!(benches, bench_index_document, bench_term_search, bench_wildcard_search);
criterion_main!(benches);
