//! Server configuration from flags, environment and an optional JSON file.
//!
//! Precedence, highest first: command line flags, `DAV_*` environment
//! variables, the `--config` file, built-in defaults.

use anyhow::{Context, Result};
use clap::Parser;
use dav_hub_core::DavConfig;
use std::net::SocketAddr;
use std::path::PathBuf;

pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";

#[derive(Parser, Debug, Clone)]
#[command(name = "dav-hub")]
#[command(about = "WebDAV server with locking and property support")]
pub struct Cli {
    /// Directory to serve. An in-memory tree is used when absent
    #[arg(short, long)]
    pub root: Option<PathBuf>,

    /// Listen address
    #[arg(short, long)]
    pub addr: Option<String>,

    /// URL prefix the tree is mounted under, e.g. /dav
    #[arg(long)]
    pub prefix: Option<String>,

    /// Refuse every mutating method with 403
    #[arg(long)]
    pub read_only: bool,

    /// Disable collection listings for GET and PROPFIND
    #[arg(long)]
    pub no_listings: bool,

    /// Allow PROPFIND with Depth: infinity
    #[arg(long)]
    pub allow_infinite_propfind: bool,

    /// Lock timeout in seconds when the client asks for none, 0 for infinite
    #[arg(long)]
    pub lock_timeout: Option<u64>,

    /// Upper bound for granted lock timeouts in seconds, 0 for no bound
    #[arg(long)]
    pub max_lock_timeout: Option<u64>,

    /// Largest accepted request body in bytes
    #[arg(long, default_value_t = 64 * 1024 * 1024)]
    pub max_body: usize,

    /// JSON file holding engine settings
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub root: Option<PathBuf>,
    pub addr: SocketAddr,
    pub max_body: usize,
    pub dav: DavConfig,
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn seconds(value: u64) -> Option<u64> {
    (value > 0).then_some(value)
}

impl Config {
    pub fn load(cli: Cli) -> Result<Self> {
        let mut dav = match &cli.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                serde_json::from_str::<DavConfig>(&raw)
                    .with_context(|| format!("parsing config file {}", path.display()))?
            }
            None => DavConfig::default(),
        };

        let root = cli
            .root
            .or_else(|| std::env::var("DAV_ROOT").ok().map(PathBuf::from));
        let addr = cli.addr.unwrap_or_else(|| {
            std::env::var("DAV_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string())
        });
        let addr: SocketAddr = addr
            .parse()
            .with_context(|| format!("invalid listen address {addr}"))?;

        if let Some(prefix) = cli.prefix.or_else(|| std::env::var("DAV_PREFIX").ok()) {
            dav.prefix = prefix;
        }
        if cli.read_only || env_flag("DAV_READ_ONLY") {
            dav.read_only = true;
        }
        if cli.no_listings {
            dav.listings = false;
        }
        if cli.allow_infinite_propfind {
            dav.allow_infinite_propfind = true;
        }
        if let Some(secs) = cli.lock_timeout {
            dav.lock_timeout_secs = seconds(secs);
        }
        if let Some(secs) = cli.max_lock_timeout {
            dav.max_lock_timeout_secs = seconds(secs);
        }

        Ok(Config {
            root,
            addr,
            max_body: cli.max_body,
            dav,
        })
    }
}
