//! Human and JSON rendering for CLI output.

use serde::Serialize;

use docfuse::{
    IngestReport, QueryHit, Settings,
    engine::IndexStats,
    error::Result,
    graph::{KnowledgeGraph, NodeKind},
};

/// Characters of chunk text shown per hit in human output.
const PREVIEW_CHARS: usize = 240;

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_report(report: &IngestReport) {
    println!("{}", report.message);
}

pub fn print_hits(hits: &[QueryHit]) {
    if hits.is_empty() {
        println!("No matching chunks.");
        return;
    }
    for (rank, hit) in hits.iter().enumerate() {
        println!(
            "{}. {} (score: {:.3}, vector: {:.3}, keyword: {:.3})",
            rank + 1,
            hit.source_id,
            hit.score,
            hit.vector_score,
            hit.keyword_score
        );
        println!("   {}", preview(&hit.text));
    }
}

pub fn print_stats(stats: &IndexStats) {
    println!("Chunks:   {}", stats.chunk_count);
    println!("Sources:  {}", stats.distinct_source_count);
    println!("Keyword:  {}", availability(stats.keyword_available));
    println!("Semantic: {}", availability(stats.vector_available));
    println!("Mode:     {:?}", stats.mode);
}

pub fn print_sources(sources: &[String]) {
    if sources.is_empty() {
        println!("No documents indexed.");
    }
    for source in sources {
        println!("{source}");
    }
}

pub fn print_settings(settings: &Settings) {
    println!("embed_model\t{}", settings.embed_model);
    println!("ollama_host\t{}", settings.ollama_host);
    println!("chat_model\t{}", settings.chat_model);
    println!("index_path\t{}", settings.index_path.display());
    println!("chunk_size\t{}", settings.chunk_size);
    println!("chunk_overlap\t{}", settings.chunk_overlap);
    println!("retrieval_k\t{}", settings.retrieval_k);
    println!("hybrid_alpha\t{}", settings.hybrid_alpha);
    println!("use_hybrid_search\t{}", settings.use_hybrid_search);
}

pub fn print_graph(graph: &KnowledgeGraph) {
    if graph.nodes.is_empty() {
        println!("Keyword index is empty.");
        return;
    }
    println!(
        "{} documents, {} terms, {} links",
        graph.document_count(),
        graph.term_count(),
        graph.links.len()
    );
    for node in graph.nodes.iter().filter(|n| n.kind == NodeKind::Document) {
        let terms: Vec<&str> = graph
            .links
            .iter()
            .filter(|l| l.source == node.id)
            .filter_map(|l| l.target.strip_prefix("term_"))
            .collect();
        println!("{}\t{}\t{}", node.id, node.label, terms.join(", "));
    }
}

fn availability(available: bool) -> &'static str {
    if available { "available" } else { "unavailable" }
}

/// `text` with whitespace collapsed, cut to `PREVIEW_CHARS` characters.
fn preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= PREVIEW_CHARS {
        return flat;
    }
    let mut cut: String = flat.chars().take(PREVIEW_CHARS).collect();
    cut.push_str("...");
    cut
}
