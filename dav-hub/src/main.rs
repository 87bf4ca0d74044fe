use anyhow::Result;
use clap::Parser;
use dav_hub::api;
use dav_hub::config::{Cli, Config};
use dav_hub_core::{DavHandler, FileSystem, LocalFs, MemFs};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::load(Cli::parse())?;

    let fs: Arc<dyn FileSystem> = match &config.root {
        Some(root) => {
            anyhow::ensure!(root.is_dir(), "{} is not a directory", root.display());
            info!(root = %root.display(), "serving directory");
            Arc::new(LocalFs::new(root))
        }
        None => {
            info!("serving an in-memory tree");
            Arc::new(MemFs::new())
        }
    };

    let dav = DavHandler::new(fs, config.dav.clone());
    let app = api::router(dav, config.max_body);

    let listener = TcpListener::bind(config.addr).await?;
    info!(
        addr = %config.addr,
        prefix = %config.dav.prefix,
        read_only = config.dav.read_only,
        "listening"
    );
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
