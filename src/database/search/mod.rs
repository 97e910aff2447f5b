// Brute-force scoring and ranking shared by every VectorStore adapter.
// Each adapter only decides how candidates are fetched.

#[cfg(test)]
mod tests;

use std::cmp::Ordering;

use super::models::{Metadata, SearchHit, SearchQuery};

/// A stored record offered to [`Ranker::offer`].
pub(crate) struct Candidate<'a> {
    pub id: i64,
    pub content_id: &'a str,
    pub content_type: &'a str,
    pub model_name: &'a str,
    pub vector: &'a [f32],
    pub title: Option<&'a str>,
    pub content_snippet: Option<&'a str>,
    pub metadata: &'a Metadata,
}

/// Accumulates qualifying candidates for one query.
pub(crate) struct Ranker<'q> {
    query: &'q SearchQuery,
    hits: Vec<SearchHit>,
    scanned: usize,
}

impl<'q> Ranker<'q> {
    pub fn new(query: &'q SearchQuery) -> Self {
        Self {
            query,
            hits: Vec::new(),
            scanned: 0,
        }
    }

    /// Whether a candidate passes the model and content type filters.
    pub fn accepts(&self, model_name: &str, content_type: &str) -> bool {
        self.query
            .model_name
            .as_deref()
            .is_none_or(|m| m == model_name)
            && self
                .query
                .content_type
                .as_deref()
                .is_none_or(|ct| ct == content_type)
    }

    /// Score `candidate` and keep it if it clears `min_similarity`.
    ///
    /// Candidates of a different dimension than the query are never scored.
    pub fn offer(&mut self, candidate: Candidate<'_>) {
        if !self.accepts(candidate.model_name, candidate.content_type)
            || candidate.vector.len() != self.query.vector.len()
        {
            return;
        }
        self.scanned += 1;

        let Ok(score) = self.query.metric.score(&self.query.vector, candidate.vector) else {
            return;
        };
        if score < self.query.min_similarity {
            return;
        }

        self.hits.push(SearchHit {
            id: candidate.id,
            content_id: candidate.content_id.to_string(),
            content_type: candidate.content_type.to_string(),
            model_name: candidate.model_name.to_string(),
            score,
            title: candidate.title.map(str::to_string),
            content_snippet: candidate.content_snippet.map(str::to_string),
            metadata: candidate.metadata.clone(),
        });
    }

    pub fn scanned(&self) -> usize {
        self.scanned
    }

    pub fn finish(self) -> Vec<SearchHit> {
        rank(self.hits, self.query.top_k)
    }
}

/// Highest score first; equal scores fall back to ascending `content_id`,
/// then `content_type`, `model_name` and `id` so the order is total.
pub(crate) fn compare_hits(a: &SearchHit, b: &SearchHit) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.content_id.cmp(&b.content_id))
        .then_with(|| a.content_type.cmp(&b.content_type))
        .then_with(|| a.model_name.cmp(&b.model_name))
        .then_with(|| a.id.cmp(&b.id))
}

pub(crate) fn rank(mut hits: Vec<SearchHit>, top_k: usize) -> Vec<SearchHit> {
    hits.sort_by(compare_hits);
    hits.truncate(top_k);
    hits
}
