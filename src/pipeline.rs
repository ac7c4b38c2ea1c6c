use std::sync::LazyLock;

use regex::Regex;
use tracing::{info, instrument, warn};

use crate::{
    cache::ManifestCache,
    fetch::{self, FetchError},
    registry::{Registry, RegistryError},
    resolver::{self, BrowserLauncher, ResolveSettings},
};

/// Identifier convention: stream names and portal paths must carry the
/// playlist extension before anything else happens.
pub const MANIFEST_EXT: &str = ".m3u8";

static MAC_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9A-Fa-f]{2}(?::[0-9A-Fa-f]{2}){5}$").unwrap());

/// One resolution, fully classified. Consumed only by the response assembler.
#[derive(Debug, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// The verbatim playlist text fetched from upstream.
    Success(String),
    /// Malformed or missing identifier; nothing downstream was touched.
    InvalidRequest,
    /// A well-formed name that the registry does not know.
    NotFound,
    /// The registry document itself is missing or corrupt.
    RegistryUnavailable,
    /// The upstream page never produced a matching request within budget
    /// (covers launch/navigation failures too - none are retried here).
    UpstreamTimeout,
    /// The playlist URL was observed but its body could not be fetched;
    /// carries the HTTP status when there was a response at all.
    FetchFailure(Option<u16>),
}

/// Deployment variant that builds targets from a portal URL template instead
/// of the registry. `{mac}` and `{stream}` are substituted per request.
#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub template: String,
    /// Device identifier used when the caller does not send `?mac=`.
    pub default_mac: String,
}

/// The whole resolution pipeline: registry lookup, cached-or-fresh decision,
/// browser-driven URL discovery, body fetch, cache overwrite.
pub struct Pipeline<L> {
    registry: Result<Registry, RegistryError>,
    cache: ManifestCache,
    launcher: L,
    client: reqwest::Client,
    settings: ResolveSettings,
    portal: Option<PortalConfig>,
}

impl<L: BrowserLauncher> Pipeline<L> {
    pub fn new(
        registry: Result<Registry, RegistryError>,
        cache: ManifestCache,
        launcher: L,
        client: reqwest::Client,
        settings: ResolveSettings,
        portal: Option<PortalConfig>,
    ) -> Self {
        Self {
            registry,
            cache,
            launcher,
            client,
            settings,
            portal,
        }
    }

    #[must_use]
    pub fn portal(&self) -> Option<&PortalConfig> {
        self.portal.as_ref()
    }

    /// Serves a registered stream by its public filename (e.g. `one.m3u8`).
    ///
    /// Validation fails fast: a malformed name is rejected before the
    /// registry is consulted and before any browser session exists.
    #[instrument(skip(self))]
    pub async fn serve_named(&self, filename: &str) -> ResolutionOutcome {
        if filename.is_empty() || !filename.ends_with(MANIFEST_EXT) {
            return ResolutionOutcome::InvalidRequest;
        }

        let registry = match &self.registry {
            Ok(registry) => registry,
            Err(e) => {
                warn!("stream registry is unavailable: {e}");
                return ResolutionOutcome::RegistryUnavailable;
            }
        };
        let Some(descriptor) = registry.lookup(filename) else {
            warn!("no stream registered as {filename}");
            return ResolutionOutcome::NotFound;
        };

        let source_url = descriptor.source_url.clone();
        self.resolve_and_fetch(filename, &source_url).await
    }

    /// Serves the portal variant: `<stream>.m3u8` where `<stream>` is a bare
    /// numeric ID, with an optional caller-supplied device identifier.
    #[instrument(skip(self))]
    pub async fn serve_portal(&self, path: &str, mac: Option<&str>) -> ResolutionOutcome {
        let Some(portal) = &self.portal else {
            return ResolutionOutcome::NotFound;
        };

        let Some(stream) = path.strip_suffix(MANIFEST_EXT) else {
            return ResolutionOutcome::InvalidRequest;
        };
        if stream.is_empty() || !stream.bytes().all(|b| b.is_ascii_digit()) {
            return ResolutionOutcome::InvalidRequest;
        }
        let mac = mac.unwrap_or(&portal.default_mac);
        if !MAC_REGEX.is_match(mac) {
            return ResolutionOutcome::InvalidRequest;
        }

        let target = portal
            .template
            .replace("{mac}", mac)
            .replace("{stream}", stream);
        self.resolve_and_fetch(&format!("{stream}@{mac}"), &target).await
    }

    /// Cache-or-resolve for one identifier. Only a fully fetched body is ever
    /// written back; failures leave the previous entry untouched.
    async fn resolve_and_fetch(&self, key: &str, target_url: &str) -> ResolutionOutcome {
        if let Some(body) = self.cache.get_fresh(key) {
            info!("serving cached playlist for {key}");
            return ResolutionOutcome::Success(body);
        }

        let manifest_url =
            match resolver::resolve(&self.launcher, target_url, &self.settings).await {
                Ok(url) => url,
                Err(e) => {
                    warn!("resolving {key}: {e}");
                    return ResolutionOutcome::UpstreamTimeout;
                }
            };
        info!("captured playlist URL for {key}: {manifest_url}");

        match fetch::fetch_manifest(&self.client, &manifest_url).await {
            Ok(body) => {
                self.cache.put(key, body.clone());
                ResolutionOutcome::Success(body)
            }
            Err(e @ FetchError::Status(status)) => {
                warn!("fetching playlist for {key}: {e}");
                ResolutionOutcome::FetchFailure(Some(status))
            }
            Err(e @ FetchError::Transport(_)) => {
                warn!("fetching playlist for {key}: {e}");
                ResolutionOutcome::FetchFailure(None)
            }
        }
    }
}
