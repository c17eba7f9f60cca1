//! ---
//! rs_section: "03-persistence-logging"
//! rs_subsection: "module"
//! rs_type: "source"
//! rs_scope: "code"
//! rs_description: "In-memory document store with cosine-similarity search."
//! rs_version: "v0.1.0"
//! rs_owner: "tbd"
//! ---
use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{Result, StoreError};

/// Embedding width used by the reference document set.
pub const DEFAULT_DIMENSION: usize = 1536;

/// Operating procedure, incident report, or other reference text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    /// Store-assigned identifier.
    pub id: u64,
    /// Unique document name.
    pub name: String,
    /// Full text.
    pub content: String,
    /// Embedding, absent until computed.
    pub embedding: Option<Vec<f32>>,
    /// Free-form metadata; `document_type` and `tags` are recognised.
    pub metadata: serde_json::Value,
    /// Insertion time.
    pub created_at: DateTime<Utc>,
}

impl KnowledgeDocument {
    fn document_type(&self) -> Option<&str> {
        self.metadata.get("document_type").and_then(|v| v.as_str())
    }
}

/// One search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// Matching document.
    pub document: KnowledgeDocument,
    /// Cosine similarity in [-1, 1].
    pub similarity: f32,
    /// `1 - similarity`.
    pub distance: f32,
}

#[derive(Debug, Default)]
struct Inner {
    documents: Vec<KnowledgeDocument>,
    next_id: u64,
}

/// Fixed-dimension document index.
#[derive(Debug)]
pub struct KnowledgeBase {
    dimension: usize,
    inner: RwLock<Inner>,
}

impl Default for KnowledgeBase {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

impl KnowledgeBase {
    /// Create an empty index accepting embeddings of `dimension` components.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Embedding width accepted by this index.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.inner.read().documents.len()
    }

    /// Whether the index holds no documents.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() == self.dimension {
            Ok(())
        } else {
            Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            })
        }
    }

    /// Add a document; a document with the same name is replaced in place.
    pub fn add(
        &self,
        name: impl Into<String>,
        content: impl Into<String>,
        embedding: Option<Vec<f32>>,
        metadata: serde_json::Value,
    ) -> Result<KnowledgeDocument> {
        if let Some(vector) = &embedding {
            self.check_dimension(vector)?;
        }
        let name = name.into();
        let mut inner = self.inner.write();
        if let Some(existing) = inner.documents.iter_mut().find(|d| d.name == name) {
            existing.content = content.into();
            existing.embedding = embedding;
            existing.metadata = metadata;
            return Ok(existing.clone());
        }
        inner.next_id += 1;
        let document = KnowledgeDocument {
            id: inner.next_id,
            name,
            content: content.into(),
            embedding,
            metadata,
            created_at: Utc::now(),
        };
        inner.documents.push(document.clone());
        Ok(document)
    }

    /// Replace the embedding of an existing document.
    pub fn update_embedding(&self, id: u64, embedding: Vec<f32>) -> Result<Option<KnowledgeDocument>> {
        self.check_dimension(&embedding)?;
        let mut inner = self.inner.write();
        Ok(inner.documents.iter_mut().find(|d| d.id == id).map(|doc| {
            doc.embedding = Some(embedding);
            doc.clone()
        }))
    }

    /// Look a document up by id.
    pub fn get(&self, id: u64) -> Option<KnowledgeDocument> {
        self.inner.read().documents.iter().find(|d| d.id == id).cloned()
    }

    /// Look a document up by name.
    pub fn get_by_name(&self, name: &str) -> Option<KnowledgeDocument> {
        self.inner
            .read()
            .documents
            .iter()
            .find(|d| d.name == name)
            .cloned()
    }

    /// Remove a document, returning it.
    pub fn remove(&self, id: u64) -> Option<KnowledgeDocument> {
        let mut inner = self.inner.write();
        let index = inner.documents.iter().position(|d| d.id == id)?;
        Some(inner.documents.remove(index))
    }

    /// Documents most similar to `query`, best first.
    ///
    /// Only hits with similarity at or above `threshold` are returned, and at
    /// most `limit` of them. Documents without an embedding are skipped.
    pub fn search(
        &self,
        query: &[f32],
        limit: usize,
        threshold: f32,
        document_type: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        self.check_dimension(query)?;
        let inner = self.inner.read();
        let mut hits: Vec<SearchHit> = inner
            .documents
            .iter()
            .filter(|doc| document_type.map_or(true, |t| doc.document_type() == Some(t)))
            .filter_map(|doc| {
                let similarity = cosine_similarity(query, doc.embedding.as_deref()?)?;
                (similarity >= threshold).then(|| SearchHit {
                    document: doc.clone(),
                    similarity,
                    distance: 1.0 - similarity,
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
                .then(a.document.id.cmp(&b.document.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    /// Case-insensitive substring match on name or content.
    pub fn search_text(&self, term: &str) -> Vec<KnowledgeDocument> {
        let needle = term.to_lowercase();
        self.inner
            .read()
            .documents
            .iter()
            .filter(|d| {
                d.name.to_lowercase().contains(&needle) || d.content.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect()
    }
}

/// `None` when either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() {
        return None;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return None;
    }
    Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kb() -> KnowledgeBase {
        let kb = KnowledgeBase::new(3);
        kb.add(
            "scram-procedure",
            "Insert all control rods",
            Some(vec![1.0, 0.0, 0.0]),
            json!({"document_type": "procedure"}),
        )
        .unwrap();
        kb.add(
            "coolant-leak-report",
            "Primary coolant loss at pump 2",
            Some(vec![0.8, 0.6, 0.0]),
            json!({"document_type": "incident"}),
        )
        .unwrap();
        kb.add("unrelated", "Cafeteria menu", Some(vec![0.0, 0.0, 1.0]), json!({}))
            .unwrap();
        kb.add("pending", "No embedding yet", None, json!({})).unwrap();
        kb
    }

    #[test]
    fn search_orders_by_similarity_and_applies_threshold() {
        let kb = kb();
        let hits = kb.search(&[1.0, 0.0, 0.0], 5, 0.5, None).unwrap();
        let names: Vec<_> = hits.iter().map(|h| h.document.name.as_str()).collect();
        assert_eq!(names, vec!["scram-procedure", "coolant-leak-report"]);
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
        assert!((hits[1].similarity - 0.8).abs() < 1e-6);
        assert!((hits[1].distance - 0.2).abs() < 1e-6);

        let limited = kb.search(&[1.0, 0.0, 0.0], 1, 0.0, None).unwrap();
        assert_eq!(limited.len(), 1);

        let incidents = kb.search(&[1.0, 0.0, 0.0], 5, 0.0, Some("incident")).unwrap();
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].document.name, "coolant-leak-report");
    }

    #[test]
    fn dimension_is_enforced() {
        let kb = kb();
        assert!(matches!(
            kb.search(&[1.0, 0.0], 5, 0.0, None),
            Err(StoreError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
        assert!(kb.add("bad", "x", Some(vec![1.0; 4]), json!({})).is_err());
        assert!(kb.update_embedding(1, vec![0.0; 2]).is_err());
    }

    #[test]
    fn same_name_replaces_and_text_search_matches() {
        let kb = kb();
        let before = kb.len();
        let doc = kb
            .add("scram-procedure", "Revised", Some(vec![0.0, 1.0, 0.0]), json!({}))
            .unwrap();
        assert_eq!(kb.len(), before);
        assert_eq!(doc.id, 1);
        assert_eq!(kb.search_text("COOLANT").len(), 1);
        assert!(kb.remove(doc.id).is_some());
        assert!(kb.get_by_name("scram-procedure").is_none());
    }

    #[test]
    fn zero_vectors_have_no_similarity() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), None);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), None);
    }
}
