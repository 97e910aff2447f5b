use anyhow::{Context, Result};
use console::style;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::database::{
    NewEmbedding, SearchHit, SearchQuery, SqliteVectorStore, VectorStore, metadata_from,
};
use crate::embeddings::{MAX_TEXTS_PER_CALL, OllamaModel, SimilarityMetric, VectorEncoder};
use crate::stats::{StatsAggregator, StatsSummary};

pub const DEFAULT_CONTENT_TYPE: &str = "document";

/// Everything a command needs, built once by `main`.
#[derive(Debug)]
pub struct AppContext {
    pub config: Config,
    pub store: Arc<SqliteVectorStore>,
    pub encoder: VectorEncoder,
}

impl AppContext {
    #[inline]
    pub async fn open(config: Config) -> Result<Self> {
        let store = SqliteVectorStore::initialize_from_config_dir(config.get_base_dir())
            .await
            .context("Failed to initialize database")?;
        let model = OllamaModel::new(&config.ollama).context("Failed to create Ollama client")?;

        Ok(Self {
            config,
            store: Arc::new(store),
            encoder: VectorEncoder::new(Arc::new(model)),
        })
    }

    #[inline]
    pub fn store(&self) -> Arc<dyn VectorStore> {
        Arc::clone(&self.store) as Arc<dyn VectorStore>
    }

    /// Texts sent to the model per request, from `[ollama] batch_size`.
    #[inline]
    pub fn batch_size(&self) -> usize {
        self.config.ollama.batch_size as usize
    }
}

/// Options for [`search`], defaulting to the `[search]` config section.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub content_type: Option<String>,
    pub metric: SimilarityMetric,
    pub top_k: usize,
    pub min_similarity: f32,
}

impl SearchOptions {
    #[inline]
    pub fn from_config(config: &Config) -> Self {
        Self {
            content_type: None,
            metric: config.search.metric,
            top_k: config.search.top_k,
            min_similarity: config.search.min_similarity,
        }
    }
}

/// Text and key of a document to embed. Also the shape of one `import` line.
#[derive(Debug, Clone, Deserialize)]
pub struct EmbedRequest {
    pub content_id: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    pub text: String,
}

fn default_content_type() -> String {
    DEFAULT_CONTENT_TYPE.to_string()
}

#[inline]
pub fn show_config(config_dir: &Path) -> Result<()> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;

    println!("{}", style("Current Configuration").bold().cyan());
    println!();

    println!("{}", style("Ollama Settings:").bold().yellow());
    println!("  Host: {}", style(&config.ollama.host).cyan());
    println!("  Port: {}", style(config.ollama.port).cyan());
    println!("  Model: {}", style(&config.ollama.model).cyan());
    println!("  Batch Size: {}", style(config.ollama.batch_size).cyan());
    println!(
        "  Embedding Dimension: {}",
        style(config.ollama.embedding_dimension).cyan()
    );
    match config.ollama_url() {
        Ok(url) => println!("  Ollama URL: {}", style(url).cyan()),
        Err(e) => println!("  Ollama URL: {} ({})", style("Invalid").red(), e),
    }

    println!();
    println!("{}", style("Search Settings:").bold().yellow());
    println!("  Metric: {}", style(config.search.metric).cyan());
    println!("  Top K: {}", style(config.search.top_k).cyan());
    println!(
        "  Minimum Similarity: {}",
        style(config.search.min_similarity).cyan()
    );

    println!();
    println!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );
    println!(
        "Database: {}",
        style(config.database_path().display()).dim()
    );

    Ok(())
}

/// Write the current (or default) configuration to `config.toml`.
#[inline]
pub fn init_config(config_dir: &Path) -> Result<Config> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;
    config.save().context("Failed to save configuration")?;

    println!(
        "{} {}",
        style("Configuration written to").green(),
        config.config_file_path().display()
    );
    Ok(config)
}

#[inline]
pub async fn check_health(config: &Config) -> Result<()> {
    let model = OllamaModel::new(&config.ollama).context("Failed to create Ollama client")?;
    let url = config.ollama_url()?;

    tokio::task::spawn_blocking(move || model.health_check())
        .await
        .context("Health check task failed")?
        .with_context(|| format!("Ollama at {} is not healthy", url))?;

    println!(
        "{} {} with model {}",
        style("Healthy:").green().bold(),
        url,
        config.ollama.model
    );
    Ok(())
}

/// Embed documents and store them, returning their embedding ids in input order.
///
/// Texts go to the model `batch_size` at a time; all of them are stored in one
/// `batch_store` call.
#[inline]
pub async fn embed(
    store: &dyn VectorStore,
    encoder: &VectorEncoder,
    batch_size: usize,
    requests: Vec<EmbedRequest>,
) -> Result<Vec<i64>> {
    if requests.is_empty() {
        return Ok(Vec::new());
    }

    let mut embeddings = Vec::with_capacity(requests.len());
    for group in requests.chunks(MAX_TEXTS_PER_CALL) {
        let texts: Vec<String> = group.iter().map(|r| r.text.clone()).collect();
        let batch = encoder
            .generate(&texts, batch_size, true)
            .await
            .context("Failed to encode text")?;
        info!(
            "Encoded {} texts in {:?}",
            texts.len(),
            batch.processing_time
        );

        for (request, vector) in group.iter().zip(batch.vectors) {
            embeddings.push(to_embedding(
                request,
                &batch.model_name,
                batch.embedding_dim,
                vector,
            )?);
        }
    }

    let ids = store
        .batch_store(embeddings)
        .await
        .context("Failed to store embeddings")?;

    for (request, id) in requests.iter().zip(&ids) {
        println!(
            "Stored {} ({}) as embedding {}",
            style(&request.content_id).cyan(),
            request.content_type,
            id
        );
    }
    Ok(ids)
}

fn to_embedding(
    request: &EmbedRequest,
    model_name: &str,
    embedding_dim: usize,
    vector: Vec<f32>,
) -> Result<NewEmbedding> {
    let mut metadata = metadata_from(&json!({
        "title": request.title,
        "source": request.source,
        "content": request.text,
    }))?;
    metadata.retain(|_, value| !value.is_null());

    let embedding = NewEmbedding::new(
        &request.content_id,
        &request.content_type,
        model_name,
        vector,
    )
    .with_embedding_dim(embedding_dim)
    .with_metadata(metadata);

    // rejected here so batch_store never skips an entry and ids stay aligned
    embedding
        .validate()
        .with_context(|| format!("Cannot store {}", request.content_id))?;
    Ok(embedding)
}

/// Read one JSON [`EmbedRequest`] per line from `path`. Blank lines are skipped.
#[inline]
pub fn read_import_file(path: &Path) -> Result<Vec<EmbedRequest>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read import file: {}", path.display()))?;

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(number, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("Invalid entry on line {} of {}", number + 1, path.display()))
        })
        .collect()
}

/// Embed `query` and print the closest stored embeddings of the same model.
#[inline]
pub async fn search(
    store: &dyn VectorStore,
    encoder: &VectorEncoder,
    query: &str,
    options: SearchOptions,
) -> Result<Vec<SearchHit>> {
    let vector = encoder
        .embed_query(query)
        .await
        .context("Failed to encode query")?;

    let mut search_query = SearchQuery::new(vector)
        .model_name(encoder.model_name())
        .metric(options.metric)
        .top_k(options.top_k)
        .min_similarity(options.min_similarity);
    if let Some(content_type) = options.content_type {
        search_query = search_query.content_type(content_type);
    }

    let hits = store
        .similarity_search(&search_query)
        .await
        .context("Search failed")?;

    if hits.is_empty() {
        println!("No results above {}", options.min_similarity);
        return Ok(hits);
    }

    for (rank, hit) in hits.iter().enumerate() {
        println!(
            "{}. {} {} ({})",
            rank + 1,
            style(format!("{:.3}", hit.score)).green(),
            style(hit.title.as_deref().unwrap_or(&hit.content_id)).bold(),
            hit.content_type
        );
        if let Some(snippet) = &hit.content_snippet {
            println!("   {}", style(snippet).dim());
        }
    }

    Ok(hits)
}

#[inline]
pub async fn delete(
    store: &dyn VectorStore,
    content_id: &str,
    content_type: Option<&str>,
    model_name: Option<&str>,
) -> Result<bool> {
    let removed = store
        .delete(content_id, content_type, model_name)
        .await
        .context("Failed to delete embeddings")?;

    if removed {
        println!("Deleted embeddings for {}", style(content_id).cyan());
    } else {
        println!("No embeddings found for {}", style(content_id).yellow());
    }
    Ok(removed)
}

#[inline]
pub async fn show_stats(store: Arc<dyn VectorStore>) -> Result<StatsSummary> {
    let summary = StatsAggregator::new(store)
        .summary()
        .await
        .context("Failed to compute statistics")?;

    println!("{}", style("Embedding Store").bold().cyan());
    print!("{}", summary);
    if let Some(model) = &summary.dominant_model {
        println!("Dominant model: {}", style(model).green());
    }
    Ok(summary)
}

#[inline]
pub async fn optimize(store: &SqliteVectorStore) -> Result<()> {
    store
        .optimize()
        .await
        .context("Failed to optimize database")?;
    println!("{}", style("Database optimized").green());
    Ok(())
}
