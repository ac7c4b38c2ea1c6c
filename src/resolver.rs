use std::{future::Future, time::Duration};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("spawning browser process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("devtools handshake: {0}")]
    Handshake(String),
    #[error("devtools transport: {0}")]
    Transport(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("browser session ended unexpectedly")]
    Disconnected,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("page settled without a request matching `{0}`")]
    NoMatch(String),
    #[error("no request matching `{suffix}` within {budget:?}")]
    TimedOut { suffix: String, budget: Duration },
}

/// Creates browser sessions. One session per resolution attempt; sessions are
/// never pooled or reused, so observers cannot leak across attempts.
pub trait BrowserLauncher: Send + Sync {
    type Session: BrowserSession;

    fn launch(&self) -> impl Future<Output = Result<Self::Session, SessionError>> + Send;
}

/// A single controllable browser page. The production implementation lives in
/// [`crate::chrome`]; tests drive the resolver with a scripted fake.
pub trait BrowserSession: Send {
    /// Hands out the stream of outbound request URLs observed by the page.
    /// Must be taken before [`Self::navigate`] is started, or requests fired
    /// early in the page load are lost.
    fn observe_requests(&mut self) -> mpsc::Receiver<String>;

    /// Navigates the page and resolves once it has loaded and its network
    /// traffic has settled.
    fn navigate(&mut self, url: &str) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Tears the session down. Infallible by design so every exit path can
    /// call it unconditionally.
    fn close(self) -> impl Future<Output = ()> + Send;
}

/// How a resolution attempt matches and when it gives up. Deployment-tunable;
/// nothing here is hard-coded into the pipeline.
#[derive(Debug, Clone)]
pub struct ResolveSettings {
    /// URL suffix that marks the playlist request (e.g. `.m3u8`).
    pub match_suffix: String,
    /// Wall-clock budget for the whole navigate-and-observe step.
    pub timeout: Duration,
}

/// Drives one browser session against `target_url` and returns the URL of the
/// first observed request ending in the configured suffix.
///
/// The session is closed on every exit path - success, no-match, navigation
/// error and timeout alike. Later matching requests in the same session are
/// ignored; first match wins and observation stops there.
///
/// # Errors
/// Launch failures, navigation failures, a page that settles without a match
/// and a blown time budget are all reported; none of them are retried here.
/// Retry policy, if any, belongs to the caller.
#[instrument(skip(launcher, settings), fields(suffix = %settings.match_suffix))]
pub async fn resolve<L: BrowserLauncher>(
    launcher: &L,
    target_url: &str,
    settings: &ResolveSettings,
) -> Result<String, ResolveError> {
    let mut session = launcher.launch().await?;

    let attempt = tokio::time::timeout(
        settings.timeout,
        drive(&mut session, target_url, &settings.match_suffix),
    )
    .await;

    // Unconditional teardown; a leaked session is a defect.
    session.close().await;

    match attempt {
        Ok(result) => result,
        Err(_elapsed) => {
            warn!("resolution budget of {:?} elapsed for {target_url}", settings.timeout);
            Err(ResolveError::TimedOut {
                suffix: settings.match_suffix.clone(),
                budget: settings.timeout,
            })
        }
    }
}

async fn drive<S: BrowserSession>(
    session: &mut S,
    target_url: &str,
    suffix: &str,
) -> Result<String, ResolveError> {
    // Observation must be live before navigation begins, otherwise a playlist
    // requested early in the page load slips past unseen.
    let mut requests = session.observe_requests();
    let nav = session.navigate(target_url);
    tokio::pin!(nav);

    loop {
        tokio::select! {
            settled = &mut nav => {
                settled.map_err(ResolveError::Session)?;
                // Page settled; whatever is already buffered is the last chance.
                while let Ok(url) = requests.try_recv() {
                    if url.ends_with(suffix) {
                        return Ok(url);
                    }
                }
                return Err(ResolveError::NoMatch(suffix.to_string()));
            }
            observed = requests.recv() => match observed {
                Some(url) if url.ends_with(suffix) => return Ok(url),
                Some(url) => debug!("ignoring request: {url}"),
                None => return Err(ResolveError::Session(SessionError::Disconnected)),
            }
        }
    }
}
