
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::Result;
use crate::database::{EmbeddingStats, VectorStore};

const BYTES_PER_MEGABYTE: f64 = 1024.0 * 1024.0;

/// Read-only summaries over a [`VectorStore`].
///
/// Holds no state of its own: every call re-reads the store.
#[derive(Clone)]
pub struct StatsAggregator {
    store: Arc<dyn VectorStore>,
}

impl fmt::Debug for StatsAggregator {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatsAggregator").finish_non_exhaustive()
    }
}

impl StatsAggregator {
    #[inline]
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self { store }
    }

    #[inline]
    pub async fn summary(&self) -> Result<StatsSummary> {
        let stats = self.store.stats().await?;
        debug!("Summarizing {} embeddings", stats.total_embeddings);
        Ok(StatsSummary::from_stats(stats))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSummary {
    pub stats: EmbeddingStats,
    pub model_count: usize,
    pub content_type_count: usize,
    pub estimated_storage_mb: f64,
    /// Fraction of all embeddings produced by each model. Empty when the store is.
    pub model_share: BTreeMap<String, f64>,
    /// Model with the most embeddings; ties go to the first name in order.
    pub dominant_model: Option<String>,
}

impl StatsSummary {
    #[inline]
    pub fn from_stats(stats: EmbeddingStats) -> Self {
        let model_share = if stats.total_embeddings == 0 {
            BTreeMap::new()
        } else {
            let total = stats.total_embeddings as f64;
            stats
                .by_model
                .iter()
                .map(|(model, count)| (model.clone(), *count as f64 / total))
                .collect()
        };

        // by_model iterates in name order, so keeping the first maximum breaks ties by name
        let dominant_model = stats
            .by_model
            .iter()
            .fold(None::<(&String, u64)>, |best, (model, count)| match best {
                Some((_, best_count)) if best_count >= *count => best,
                _ => Some((model, *count)),
            })
            .map(|(model, _)| model.clone());

        Self {
            model_count: stats.by_model.len(),
            content_type_count: stats.by_content_type.len(),
            estimated_storage_mb: stats.estimated_storage_bytes as f64 / BYTES_PER_MEGABYTE,
            model_share,
            dominant_model,
            stats,
        }
    }
}

impl fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total embeddings: {}", self.stats.total_embeddings)?;
        writeln!(f, "Average dimension: {:.1}", self.stats.average_dimension)?;
        writeln!(
            f,
            "Estimated storage: {:.2} MB",
            self.estimated_storage_mb
        )?;

        if !self.stats.by_model.is_empty() {
            writeln!(f, "Models ({}):", self.model_count)?;
            for (model, count) in &self.stats.by_model {
                let share = self.model_share.get(model).copied().unwrap_or_default();
                writeln!(f, "  {}: {} ({:.1}%)", model, count, share * 100.0)?;
            }
        }

        if !self.stats.by_content_type.is_empty() {
            writeln!(f, "Content types ({}):", self.content_type_count)?;
            for (content_type, count) in &self.stats.by_content_type {
                writeln!(f, "  {}: {}", content_type, count)?;
            }
        }

        Ok(())
    }
}
