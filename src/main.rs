#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::cargo)]
#![warn(clippy::perf)]
#![warn(clippy::complexity)]
#![warn(clippy::style)]
#![allow(clippy::multiple_crate_versions)]

use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use cache::ManifestCache;
use chrome::ChromeLauncher;
use clap::Parser;
use pipeline::{Pipeline, PortalConfig};
use registry::Registry;
use reqwest::header::{HeaderMap, HeaderValue};
use resolver::ResolveSettings;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub mod cache;
pub mod chrome;
pub mod fetch;
pub mod pipeline;
pub mod registry;
pub mod resolver;
pub mod server;
#[cfg(test)]
pub mod testkit;

/// Serves registered streams as stable playlist URLs by ferreting the real,
/// short-lived manifest URL out of each upstream player page
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Address to serve on
    #[arg(short, long, default_value = "0.0.0.0:8787")]
    listen: SocketAddr,

    /// Path to the stream registry document
    #[arg(short, long, default_value = "streams.json")]
    registry: PathBuf,

    /// Chromium/Chrome binary used to drive upstream pages
    #[arg(long, default_value = "chromium")]
    chrome: PathBuf,

    /// URL suffix that marks the playlist request during observation
    #[arg(long, default_value = ".m3u8")]
    match_suffix: String,

    /// Navigation budget per resolution attempt, in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Quiet window after page load before traffic counts as settled, in milliseconds
    #[arg(long, default_value_t = 1500)]
    settle: u64,

    /// Maximum age of a cached playlist before re-resolving, in seconds
    #[arg(long, default_value_t = 30)]
    freshness: u64,

    /// Portal URL template for the /live endpoint; `{mac}` and `{stream}`
    /// are substituted per request
    #[arg(long)]
    portal: Option<String>,

    /// Device identifier used when the /live endpoint omits ?mac=
    #[arg(long, default_value = "00:1A:79:3A:93:FD")]
    mac: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let launcher = ChromeLauncher::new(
        std::env::var("CHROME_BIN").map_or(args.chrome, PathBuf::from),
        Duration::from_millis(args.settle),
    );
    if !launcher.is_installed().await {
        warn!("Browser binary is not runnable; every resolution will fail until it is");
    }

    // A broken registry is held, not fatal: callers get a distinct
    // system-failure response instead of a dead process.
    let registry = Registry::load(&args.registry).await;
    if let Err(e) = &registry {
        error!("Stream registry unusable: {e}");
    }

    let portal = args
        .portal
        .or_else(|| std::env::var("PORTAL_TEMPLATE").ok())
        .map(|template| PortalConfig {
            template,
            default_mac: std::env::var("PORTAL_MAC").unwrap_or(args.mac),
        });
    if portal.is_some() {
        info!("Portal variant enabled at /live");
    }

    let pipeline = Arc::new(Pipeline::new(
        registry,
        ManifestCache::new(Duration::from_secs(args.freshness)),
        launcher,
        init_http_client(),
        ResolveSettings {
            match_suffix: args.match_suffix,
            timeout: Duration::from_secs(args.timeout),
        },
        portal,
    ));

    let ct = CancellationToken::new();
    spawn_ct_watcher(ct.clone());

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .context(format!("Binding to {}", args.listen))?;
    info!("Serving playlists on http://{}", args.listen);

    axum::serve(listener, server::router(pipeline))
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .context("Serving HTTP")?;

    info!("Shut down cleanly");
    Ok(())
}

fn init_http_client() -> reqwest::Client {
    let mut headers = HeaderMap::new();
    headers.insert(
        "User-Agent",
        HeaderValue::from_str(&format!(
            "{}/{} (+{})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_REPOSITORY")
        ))
        .expect("Unable to build HTTP client user agent"),
    );

    reqwest::Client::builder()
        .default_headers(headers)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .expect("Unable to build HTTP client")
}

fn spawn_ct_watcher(ct: CancellationToken) {
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Caught CTRL+C signal!");
        ct.cancel();
    });
}
