use std::{future::Future, path::PathBuf, process::Stdio, sync::LazyLock, time::Duration};

use futures_util::{
    SinkExt as _, StreamExt as _,
    stream::{SplitSink, SplitStream},
};
use regex::Regex;
use reqwest_websocket::{Message, RequestBuilderExt as _, WebSocket};
use serde_json::{Value, json};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{Child, ChildStderr, Command},
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::{
    chrome::protocol::PageEvent,
    resolver::{BrowserLauncher, BrowserSession, SessionError},
};

pub mod protocol;

static DEVTOOLS_WS_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"DevTools listening on ws://([0-9.]+:\d+)/").unwrap());

/// How long the freshly spawned browser gets to announce its DevTools
/// endpoint on stderr before the launch counts as failed.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

const NETWORK_ENABLE_ID: u64 = 1;
const PAGE_ENABLE_ID: u64 = 2;
const NAVIGATE_ID: u64 = 3;
const BROWSER_CLOSE_ID: u64 = 4;

/// Spawns a headless Chromium per resolution attempt and speaks the DevTools
/// protocol to it over a WebSocket. One child process per session, killed on
/// close (and on drop, as a backstop).
pub struct ChromeLauncher {
    binary: PathBuf,
    settle: Duration,
    http: reqwest::Client,
}

impl ChromeLauncher {
    /// # Panics
    /// Panics if the DevTools HTTP client cannot be built.
    #[must_use]
    pub fn new(binary: PathBuf, settle: Duration) -> Self {
        let http = reqwest::Client::builder()
            .http1_only() // https://github.com/jgraef/reqwest-websocket/issues/2
            .build()
            .expect("Unable to build DevTools HTTP client");

        Self {
            binary,
            settle,
            http,
        }
    }

    /// Checks if the configured browser binary is runnable
    pub async fn is_installed(&self) -> bool {
        debug!("Checking for browser installation at {:?}", self.binary);
        Command::new(&self.binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .is_ok_and(|status| status.success())
    }
}

impl BrowserLauncher for ChromeLauncher {
    type Session = ChromeSession;

    fn launch(&self) -> impl Future<Output = Result<ChromeSession, SessionError>> + Send {
        async move {
            let mut child = Command::new(&self.binary)
                .args([
                    "--headless=new",
                    "--remote-debugging-port=0",
                    "--no-sandbox",
                    "--disable-setuid-sandbox",
                    "--disable-gpu",
                    "--no-first-run",
                    "--mute-audio",
                ])
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(SessionError::Spawn)?;

            let stderr = child.stderr.take().ok_or_else(|| {
                SessionError::Handshake("browser stderr is not piped".to_string())
            })?;
            let (addr, stderr) = tokio::time::timeout(HANDSHAKE_TIMEOUT, wait_for_devtools(stderr))
                .await
                .map_err(|_| {
                    SessionError::Handshake(
                        "browser never announced its DevTools endpoint".to_string(),
                    )
                })??;
            // Keep draining stderr so the child never blocks on a full pipe.
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(_)) = lines.next_line().await {}
            });
            debug!("DevTools endpoint up on {addr}");

            // Open a fresh page target. Modern builds only accept PUT here.
            let created = self
                .http
                .put(format!("http://{addr}/json/new?about:blank"))
                .send()
                .await
                .map_err(|e| SessionError::Handshake(format!("creating page target: {e}")))?
                .json::<Value>()
                .await
                .map_err(|e| SessionError::Handshake(format!("parsing page target: {e}")))?;
            let Some(ws_url) = created["webSocketDebuggerUrl"].as_str() else {
                return Err(SessionError::Handshake(
                    "page target has no webSocketDebuggerUrl".to_string(),
                ));
            };

            let upgrade = self
                .http
                .get(ws_url)
                .upgrade()
                .send()
                .await
                .map_err(|e| SessionError::Handshake(format!("connecting to page socket: {e}")))?;
            let ws = upgrade.into_websocket().await.map_err(|e| {
                SessionError::Handshake(format!("upgrading into a WebSocket: {e}"))
            })?;
            let (mut sink, stream) = ws.split();

            // Network observation goes live here, strictly before any
            // navigation command can be issued on this session.
            send_command(&mut sink, NETWORK_ENABLE_ID, "Network.enable", json!({})).await?;
            send_command(&mut sink, PAGE_ENABLE_ID, "Page.enable", json!({})).await?;

            let (requests_tx, requests_rx) = mpsc::channel(256);
            let (events_tx, events_rx) = mpsc::channel(256);
            let pump = tokio::spawn(pump_events(stream, requests_tx, events_tx));

            Ok(ChromeSession {
                child,
                sink,
                pump,
                requests: Some(requests_rx),
                events: events_rx,
                settle: self.settle,
            })
        }
    }
}

/// Reads the child's stderr until Chromium prints its
/// `DevTools listening on ws://host:port/...` banner.
async fn wait_for_devtools(stderr: ChildStderr) -> Result<(String, ChildStderr), SessionError> {
    let mut reader = BufReader::new(stderr);
    let mut line = String::new();
    loop {
        line.clear();
        let read = reader
            .read_line(&mut line)
            .await
            .map_err(SessionError::Spawn)?;
        if read == 0 {
            return Err(SessionError::Handshake(
                "browser exited before announcing its DevTools endpoint".to_string(),
            ));
        }
        debug!("chrome: {}", line.trim_end());
        if let Some(captures) = DEVTOOLS_WS_REGEX.captures(&line) {
            return Ok((captures[1].to_string(), reader.into_inner()));
        }
    }
}

async fn send_command(
    sink: &mut SplitSink<WebSocket, Message>,
    id: u64,
    method: &str,
    params: Value,
) -> Result<(), SessionError> {
    sink.send(Message::Text(protocol::command(id, method, params)))
        .await
        .map_err(|e| SessionError::Transport(e.to_string()))
}

enum SessionEvent {
    /// A request left the page; resets the settle window.
    Activity,
    Loaded,
    NavigationFailed(String),
}

/// Owns the inbound half of the page socket. Forwards request URLs to the
/// observer channel and lifecycle events to the session; ends when the
/// browser closes the socket.
async fn pump_events(
    mut stream: SplitStream<WebSocket>,
    requests: mpsc::Sender<String>,
    events: mpsc::Sender<SessionEvent>,
) {
    while let Some(message) = stream.next().await {
        let Ok(Message::Text(raw)) = message else {
            continue;
        };
        match protocol::parse_message(&raw) {
            PageEvent::RequestWillBeSent(url) => {
                events.send(SessionEvent::Activity).await.ok();
                requests.send(url).await.ok();
            }
            PageEvent::LoadEventFired => {
                events.send(SessionEvent::Loaded).await.ok();
            }
            PageEvent::CommandResult {
                id: NAVIGATE_ID,
                error: Some(error),
            } => {
                events.send(SessionEvent::NavigationFailed(error)).await.ok();
            }
            PageEvent::CommandResult { .. } | PageEvent::Other => {}
        }
    }
    // Both senders drop here; the session observes the disconnect.
}

pub struct ChromeSession {
    child: Child,
    sink: SplitSink<WebSocket, Message>,
    pump: JoinHandle<()>,
    requests: Option<mpsc::Receiver<String>>,
    events: mpsc::Receiver<SessionEvent>,
    settle: Duration,
}

impl BrowserSession for ChromeSession {
    fn observe_requests(&mut self) -> mpsc::Receiver<String> {
        self.requests.take().unwrap_or_else(|| {
            // A second observer gets a dead channel rather than stolen events.
            warn!("observe_requests called twice on one session");
            mpsc::channel(1).1
        })
    }

    fn navigate(&mut self, url: &str) -> impl Future<Output = Result<(), SessionError>> + Send {
        let url = url.to_string();
        async move {
            send_command(
                &mut self.sink,
                NAVIGATE_ID,
                "Page.navigate",
                json!({ "url": url }),
            )
            .await?;

            // "Settled" means the load event fired and then a full quiet
            // window passed with no further outbound requests.
            let mut loaded = false;
            loop {
                let event = if loaded {
                    match tokio::time::timeout(self.settle, self.events.recv()).await {
                        Err(_quiet) => return Ok(()),
                        Ok(event) => event,
                    }
                } else {
                    self.events.recv().await
                };

                match event {
                    None => return Err(SessionError::Disconnected),
                    Some(SessionEvent::Loaded) => loaded = true,
                    Some(SessionEvent::Activity) => {}
                    Some(SessionEvent::NavigationFailed(error)) => {
                        return Err(SessionError::Navigation(error));
                    }
                }
            }
        }
    }

    fn close(mut self) -> impl Future<Output = ()> + Send {
        async move {
            // Best-effort polite shutdown before the hard kill.
            send_command(&mut self.sink, BROWSER_CLOSE_ID, "Browser.close", json!({}))
                .await
                .ok();
            self.pump.abort();
            if let Err(e) = self.child.kill().await {
                warn!("killing browser process: {e}");
            }
        }
    }
}
