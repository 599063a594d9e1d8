mod cli;
mod repl;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use medrag::openai::embedding_provider_from_config;
use medrag::{
    AnswerResponse, AppConfig, ConfiguredContextLoader, ContextLoader, IndexBuilder, RagError,
    RagPipeline, RecursiveChunker, load_pages,
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command, SessionArgs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "medrag=debug,info" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(index) = cli.index {
        config.index_path = index;
    }

    match cli.command {
        Command::Ingest { source } => ingest(&config, &source).await,
        Command::Ask { question, json, session } => {
            let pipeline = open_pipeline(&config, &session).await?;
            let response = pipeline.ask_or_apologize(&question).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&without_embeddings(response))?);
            } else {
                print_response(&response, session.show_context);
            }
            Ok(())
        }
        Command::Chat { session } => {
            let pipeline = open_pipeline(&config, &session).await?;
            repl::run(&pipeline, session.show_context).await
        }
    }
}

async fn ingest(config: &AppConfig, source: &Path) -> anyhow::Result<()> {
    let pages = load_pages(source)?;
    if pages.is_empty() {
        bail!("no pages found in {}", source.display());
    }

    let embedder = embedding_provider_from_config(&config.embedding).await?;
    let chunker = Arc::new(RecursiveChunker::new(config.rag.chunk_size, config.rag.chunk_overlap)?);
    let index = IndexBuilder::new(config.rag.clone(), chunker, embedder)
        .build_and_save(&pages, &config.index_path)
        .await
        .with_context(|| format!("failed to build index at {}", config.index_path.display()))?;

    info!(
        page_count = pages.len(),
        chunk_count = index.chunks().len(),
        path = %config.index_path.display(),
        "index saved"
    );
    Ok(())
}

async fn open_pipeline(config: &AppConfig, session: &SessionArgs) -> anyhow::Result<RagPipeline> {
    let loader = Arc::new(ConfiguredContextLoader::new(config.clone()));
    open_with(config, session, loader).await
}

/// Open a pipeline over `loader`. With `--source`, a missing or unreadable
/// index is rebuilt from the pages once before giving up.
async fn open_with(
    config: &AppConfig,
    session: &SessionArgs,
    loader: Arc<dyn ContextLoader>,
) -> anyhow::Result<RagPipeline> {
    let mut rebuilt = false;
    loop {
        let err = match RagPipeline::new(Arc::clone(&loader)).await {
            Ok(pipeline) => return Ok(pipeline),
            Err(e) => e,
        };
        match (&session.source, err) {
            (Some(source), e @ (RagError::IndexNotReady { .. } | RagError::Storage { .. }))
                if !rebuilt =>
            {
                warn!(error = %e, source = %source.display(), "index unusable; building it");
                ingest(config, source).await?;
                rebuilt = true;
            }
            (_, RagError::IndexNotReady { path }) => bail!(
                "no index at {}; run `medrag ingest --source <pages>` first",
                path.display()
            ),
            (_, e) => return Err(e.into()),
        }
    }
}

fn without_embeddings(mut response: AnswerResponse) -> AnswerResponse {
    for result in &mut response.retrieved_chunks {
        result.chunk.embedding.clear();
    }
    response
}

pub(crate) fn print_response(response: &AnswerResponse, show_context: bool) {
    println!("{}", response.answer);
    if show_context && !response.retrieved_chunks.is_empty() {
        println!();
        for (rank, result) in response.retrieved_chunks.iter().enumerate() {
            println!(
                "[{}] {} p.{} (score {:.3})",
                rank + 1,
                result.chunk.source_id,
                result.chunk.page_number,
                result.score
            );
            println!("    {}", result.chunk.text.replace('\n', "\n    "));
        }
    }
}
