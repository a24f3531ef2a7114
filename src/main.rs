use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use deskqa::cascade::Resolver;
use deskqa::generator::OpenAiGenerator;
use deskqa::loaders::LoaderRegistry;
use deskqa::{run_server, AppConfig};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = AppConfig::from_env();
    tokio::fs::create_dir_all(&config.document_root).await?;

    let registry = Arc::new(LoaderRegistry::with_defaults());
    let generator = Arc::new(OpenAiGenerator::new(config.generator.clone()));

    // No retriever is wired by default; the resolver then runs answer-only
    // and the fallback strategies work against the document root directly.
    let resolver = Resolver::new(config.clone(), registry, generator, None);

    run_server(config, resolver).await
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
