mod cli;

use agora::{
    bbcode::BbcodeRenderer,
    config::{self, Config},
    images::ImageCacheStore,
    maintenance,
    postprocess::{Dispatch, PostprocessQueue, Postprocessor},
    server::{self, AppContext},
};
use agora_core::{RecordId, RecordKind};
use agora_db::pool::{init_pool, DbPool};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;
use std::sync::Arc;

fn open_pool(config: &Config) -> Result<DbPool> {
    let db_path = config.storage.db_path.to_string_lossy();
    tracing::info!("Initializing database at {}", db_path);
    init_pool(&db_path).with_context(|| format!("Failed to open database at {}", db_path))
}

fn start_queue(config: &Config, pool: &DbPool) -> Result<PostprocessQueue> {
    let postprocessor = Postprocessor::from_config(config, pool.clone())?;
    Ok(PostprocessQueue::new(Arc::new(postprocessor), &config.queue))
}

async fn serve(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    // Override host/port from CLI if specified
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    config::validate_config(&config)?;

    tracing::info!("Starting agora server");

    let pool = open_pool(&config)?;
    let queue = Arc::new(start_queue(&config, &pool)?);

    let ctx = AppContext {
        store: ImageCacheStore::new(pool.clone(), config.storage.media_dir.clone()),
        config: Arc::new(config),
        pool,
        dispatcher: queue.clone() as Arc<dyn Dispatch>,
    };

    let result = server::start_server(ctx).await;

    tracing::info!("Shutting down...");
    match Arc::try_unwrap(queue) {
        Ok(queue) => queue.close().await?,
        Err(_) => tracing::warn!("Postprocess queue still referenced; not waiting for jobs"),
    }

    result
}

async fn postprocess_one(
    kind: RecordKind,
    id: RecordId,
    config_path: Option<&Path>,
) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let pool = open_pool(&config)?;
    let postprocessor = Postprocessor::from_config(&config, pool)?;

    let report = postprocessor.postprocess(kind, id).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn trigger_all(config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let pool = open_pool(&config)?;
    let queue = start_queue(&config, &pool)?;

    let submitted = maintenance::trigger_all(&pool, &queue).await?;
    println!("Submitted {} records; waiting for jobs to finish...", submitted);
    queue.close().await?;
    println!("Done.");
    Ok(())
}

fn regenerate(config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let pool = open_pool(&config)?;
    let renderer = BbcodeRenderer::new(pool.clone());

    let count = maintenance::regenerate_all(&pool, &renderer)?;
    println!("Regenerated {} records", count);
    Ok(())
}

fn find_urls(fragment: &str, config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let pool = open_pool(&config)?;

    for found in maintenance::find_urls(&pool, fragment)? {
        println!("{}\t{}\t{}", found.kind, found.id, found.url);
    }
    Ok(())
}

async fn clean_url_images(config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let pool = open_pool(&config)?;
    let renderer = BbcodeRenderer::new(pool.clone());
    let queue = start_queue(&config, &pool)?;

    let changed = maintenance::clean_url_images(&pool, &renderer, &queue).await?;
    println!("Rewrote {} records; waiting for jobs to finish...", changed);
    queue.close().await?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "agora=trace,agora_db=debug,agora_core=debug,tower_http=debug".to_string()
        } else {
            "agora=debug,agora_db=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Serve { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(serve(host, port, config_path))
        }
        Commands::Postprocess { kind, id } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(postprocess_one(kind, id, config_path))
        }
        Commands::TriggerAll => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(trigger_all(config_path))
        }
        Commands::Regenerate => regenerate(config_path),
        Commands::FindUrls { url } => find_urls(&url, config_path),
        Commands::CleanUrlImages => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(clean_url_images(config_path))
        }
        Commands::Validate { path } => {
            let path = path.or_else(|| cli.config.clone());
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("agora {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            print_config(&config);
        }
        None => {
            println!("No config file specified, using defaults");
            print_config(&Config::default());
        }
    }

    Ok(())
}

fn print_config(config: &Config) {
    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!("  Database: {}", config.storage.db_path.display());
    println!("  Media dir: {}", config.storage.media_dir.display());
    println!("  Max image size: {} bytes", config.cache.max_size_bytes);
    println!("  Allowed types: {}", config.cache.allowed_types.join(", "));
    println!("  Max pixels: {}", config.cache.max_pixels);
    println!("  Queue workers: {}", config.queue.workers);
}
