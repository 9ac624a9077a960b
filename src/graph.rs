//! Document/term graph derived from the keyword index.
//!
//! Each chunk becomes a document node linked to its most characteristic
//! terms. Terms are shared between documents, so chunks that use the same
//! distinctive vocabulary end up connected through a common term node.

use std::collections::HashSet;

use serde::Serialize;

use crate::keyword_index::KeywordIndex;

pub const DEFAULT_MAX_DOCS: usize = 50;
pub const DEFAULT_TERMS_PER_DOC: usize = 5;

/// Terms at or below this IDF are too common to be worth a node.
pub const MIN_TERM_IDF: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Document,
    Term,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub group: u8,
    pub radius: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Link {
    pub source: String,
    pub target: String,
    /// `tf * idf` of the term within the document.
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KnowledgeGraph {
    pub nodes: Vec<Node>,
    pub links: Vec<Link>,
}

impl KnowledgeGraph {
    /// Build the graph over the first `max_docs` chunks of `index`.
    pub fn build(
        index: &KeywordIndex,
        max_docs: usize,
        terms_per_doc: usize,
    ) -> Self {
        let mut graph = Self::default();
        let mut seen_terms = HashSet::new();

        for (i, chunk) in index.chunks().iter().take(max_docs).enumerate() {
            let doc_id = format!("doc_{i}");
            graph.nodes.push(Node {
                id: doc_id.clone(),
                label: chunk.source_id.clone(),
                kind: NodeKind::Document,
                group: 1,
                radius: 12,
            });

            for (term, weight) in index.top_terms(i, terms_per_doc, MIN_TERM_IDF)
            {
                let term_id = format!("term_{term}");
                if seen_terms.insert(term.clone()) {
                    graph.nodes.push(Node {
                        id: term_id.clone(),
                        label: term,
                        kind: NodeKind::Term,
                        group: 2,
                        radius: 6,
                    });
                }
                graph.links.push(Link {
                    source: doc_id.clone(),
                    target: term_id,
                    value: weight,
                });
            }
        }

        tracing::debug!(
            nodes = graph.nodes.len(),
            links = graph.links.len(),
            "knowledge graph built"
        );
        graph
    }

    pub fn document_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.kind == NodeKind::Document)
            .count()
    }

    pub fn term_count(&self) -> usize {
        self.nodes.len() - self.document_count()
    }
}
