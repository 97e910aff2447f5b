use anyhow::Result;
use clap::{Parser, Subcommand};
use embedding_store::commands::{
    AppContext, DEFAULT_CONTENT_TYPE, EmbedRequest, SearchOptions, check_health, delete, embed,
    init_config, optimize, read_import_file, search, show_config, show_stats,
};
use embedding_store::config::{Config, get_config_dir};
use embedding_store::embeddings::SimilarityMetric;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "embedding-store")]
#[command(about = "Store text embeddings and search them by semantic similarity")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml and the database (default: ~/.embedding-store)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the current configuration
    Config {
        /// Write the configuration file with current or default values
        #[arg(long)]
        init: bool,
    },
    /// Check that the Ollama server is reachable and the model is installed
    Health,
    /// Embed a piece of text and store it under a content id
    Embed {
        /// Text to embed
        text: String,
        #[arg(long)]
        content_id: String,
        #[arg(long, default_value = DEFAULT_CONTENT_TYPE)]
        content_type: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        source: Option<String>,
    },
    /// Embed every entry of a JSON lines file
    Import {
        /// One object per line with content_id, text and optional content_type, title, source
        file: PathBuf,
    },
    /// Find stored content similar to a query
    Search {
        query: String,
        #[arg(long)]
        content_type: Option<String>,
        /// cosine or euclidean
        #[arg(long)]
        metric: Option<SimilarityMetric>,
        #[arg(long)]
        top_k: Option<usize>,
        #[arg(long)]
        min_similarity: Option<f32>,
    },
    /// Delete the embeddings of a content id
    Delete {
        content_id: String,
        #[arg(long)]
        content_type: Option<String>,
        #[arg(long)]
        model: Option<String>,
    },
    /// Show aggregate statistics
    Stats,
    /// Run VACUUM and ANALYZE on the database
    Optimize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => get_config_dir()?,
    };

    match cli.command {
        Commands::Config { init } => {
            if init {
                init_config(&config_dir)?;
            } else {
                show_config(&config_dir)?;
            }
        }
        Commands::Health => {
            check_health(&Config::load(&config_dir)?).await?;
        }
        Commands::Embed {
            text,
            content_id,
            content_type,
            title,
            source,
        } => {
            let context = AppContext::open(Config::load(&config_dir)?).await?;
            let request = EmbedRequest {
                content_id,
                content_type,
                title,
                source,
                text,
            };
            embed(
                context.store.as_ref(),
                &context.encoder,
                context.batch_size(),
                vec![request],
            )
            .await?;
        }
        Commands::Import { file } => {
            let requests = read_import_file(&file)?;
            let context = AppContext::open(Config::load(&config_dir)?).await?;
            embed(
                context.store.as_ref(),
                &context.encoder,
                context.batch_size(),
                requests,
            )
            .await?;
        }
        Commands::Search {
            query,
            content_type,
            metric,
            top_k,
            min_similarity,
        } => {
            let context = AppContext::open(Config::load(&config_dir)?).await?;
            let mut options = SearchOptions::from_config(&context.config);
            options.content_type = content_type;
            if let Some(metric) = metric {
                options.metric = metric;
            }
            if let Some(top_k) = top_k {
                options.top_k = top_k;
            }
            if let Some(min_similarity) = min_similarity {
                options.min_similarity = min_similarity;
            }
            search(context.store.as_ref(), &context.encoder, &query, options).await?;
        }
        Commands::Delete {
            content_id,
            content_type,
            model,
        } => {
            let context = AppContext::open(Config::load(&config_dir)?).await?;
            delete(
                context.store.as_ref(),
                &content_id,
                content_type.as_deref(),
                model.as_deref(),
            )
            .await?;
        }
        Commands::Stats => {
            let context = AppContext::open(Config::load(&config_dir)?).await?;
            show_stats(context.store()).await?;
        }
        Commands::Optimize => {
            let context = AppContext::open(Config::load(&config_dir)?).await?;
            optimize(&context.store).await?;
        }
    }

    Ok(())
}
