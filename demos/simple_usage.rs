/// End-to-end findex tour:
/// - index lifecycle (create, mappings, delete)
/// - document writes (single, bulk, delete)
/// - search (match, wildcard, phrase, boolean, filters, highlights)
/// - suggestions

use findex::core::config::EngineConfig;
use findex::core::engine::SearchEngine;
use findex::search::results::SearchRequest;
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let data_dir = tempfile::tempdir()?;
    let engine = SearchEngine::open(EngineConfig::with_data_dir(data_dir.path())).await?;

    println!("Creating index...");
    engine.create_index("articles", None, None).await?;

    println!("Indexing documents...");
    engine
        .index_document("articles", Some("1".into()),
            json!({"title": "Rust Programming", "body": "Learning the Rust language", "tier": "featured"}))
        .await?;
    engine
        .bulk_index("articles", vec![
            (Some("2".into()), json!({"title": "Database Systems", "body": "Search engines and storage", "tier": "normal"})),
            (Some("3".into()), json!({"title": "Rusty Tools", "body": "Practical systems utilities", "tier": "normal"})),
        ])
        .await?;
    engine.flush().await?;

    println!("\nMatch query 'rust':");
    let response = engine
        .search("articles", SearchRequest::for_query(json!({"match": {"field": "title", "value": "rust"}})))
        .await?;
    for hit in &response.hits {
        println!("  {} (score {:.3})", hit.id, hit.score);
    }

    println!("\nWildcard 'rus*' with highlights:");
    let mut request = SearchRequest::for_query(json!({"wildcard": {"field": "title", "value": "rus*"}}));
    request.highlight = Some(true);
    let response = engine.search("articles", request).await?;
    for hit in &response.hits {
        let highlight = hit.highlights.as_ref()
            .and_then(|h| h.get("title"))
            .map(|fragments| fragments[0].as_str())
            .unwrap_or("-");
        println!("  {} -> {}", hit.id, highlight);
    }

    println!("\nFiltered search (tier == featured):");
    let mut request = SearchRequest::for_query(json!("rust database"));
    request.filter = Some(json!({"tier": "featured"}).as_object().unwrap().clone());
    let response = engine.search("articles", request).await?;
    println!("  {} of {} matched the filter", response.hits.len(), response.pagination.total_results);

    println!("\nSuggestions for 'rsut':");
    for suggestion in engine.suggest("articles", "rsut", Some("title"), Some(3)).await? {
        println!("  {} (distance {}, freq {})", suggestion.text, suggestion.distance, suggestion.freq);
    }

    engine.delete_document("articles", "3").await?;
    engine.flush().await?;
    println!("\nAfter delete, total for 'rust': {}",
        engine.search("articles", SearchRequest::for_query(json!("rust"))).await?.total);

    engine.delete_index("articles").await?;
    println!("Index deleted.");
    Ok(())
}
