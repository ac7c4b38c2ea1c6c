//! Test doubles shared across modules: a scripted browser capability and a
//! canned raw-TCP HTTP upstream.

use std::{
    future::Future,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpListener,
    sync::mpsc,
};

use crate::resolver::{BrowserLauncher, BrowserSession, SessionError};

/// A deterministic [`BrowserLauncher`]: every session "observes" a scripted
/// sequence of request URLs during navigation, then settles after
/// `nav_delay`. Launch/close counts are shared so tests can assert that no
/// session leaks and that cache hits open none.
pub struct ScriptedLauncher {
    pub urls: Vec<String>,
    pub nav_delay: Duration,
    pub fail_launch: bool,
    pub launched: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
    /// Target URLs each session was navigated to, in order.
    pub targets: Arc<Mutex<Vec<String>>>,
}

impl ScriptedLauncher {
    pub fn observing<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            urls: urls.into_iter().map(Into::into).collect(),
            nav_delay: Duration::ZERO,
            fail_launch: false,
            launched: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
            targets: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A launcher whose pages emit no requests at all.
    pub fn silent() -> Self {
        Self::observing(Vec::<String>::new())
    }
}

impl BrowserLauncher for ScriptedLauncher {
    type Session = ScriptedSession;

    fn launch(&self) -> impl Future<Output = Result<ScriptedSession, SessionError>> + Send {
        let session = if self.fail_launch {
            Err(SessionError::Spawn(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "scripted launch failure",
            )))
        } else {
            self.launched.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::channel(64);
            Ok(ScriptedSession {
                urls: self.urls.clone(),
                nav_delay: self.nav_delay,
                closed: self.closed.clone(),
                targets: self.targets.clone(),
                tx,
                rx: Some(rx),
            })
        };
        async move { session }
    }
}

pub struct ScriptedSession {
    urls: Vec<String>,
    nav_delay: Duration,
    closed: Arc<AtomicUsize>,
    targets: Arc<Mutex<Vec<String>>>,
    tx: mpsc::Sender<String>,
    rx: Option<mpsc::Receiver<String>>,
}

impl BrowserSession for ScriptedSession {
    fn observe_requests(&mut self) -> mpsc::Receiver<String> {
        self.rx.take().expect("observe_requests called twice")
    }

    fn navigate(&mut self, url: &str) -> impl Future<Output = Result<(), SessionError>> + Send {
        self.targets.lock().unwrap().push(url.to_string());
        // Refusing to navigate un-observed sessions turns any ordering
        // violation into a loud test failure.
        let observed = self.rx.is_none();
        let tx = self.tx.clone();
        let urls = std::mem::take(&mut self.urls);
        let delay = self.nav_delay;
        async move {
            if !observed {
                return Err(SessionError::Navigation(
                    "navigate started before observe_requests".to_string(),
                ));
            }
            for url in urls {
                tx.send(url).await.ok();
            }
            tokio::time::sleep(delay).await;
            Ok(())
        }
    }

    fn close(self) -> impl Future<Output = ()> + Send {
        self.closed.fetch_add(1, Ordering::SeqCst);
        async {}
    }
}

/// Serves every connection the same canned HTTP/1.1 response, raw over TCP.
/// Returns the base URL to request against.
pub async fn canned_http(status_line: &str, body: &str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let status_line = status_line.to_string();
    let body = body.to_string();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _addr)) = listener.accept().await else {
                break;
            };
            let mut reader = BufReader::new(&mut stream);
            let mut line = String::new();
            // Consume the request head; the response is the same regardless.
            while reader.read_line(&mut line).await.is_ok() && line.trim() != "" {
                line.clear();
            }
            stream
                .write_all(
                    format!(
                        "HTTP/1.1 {status_line}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                        body.len()
                    )
                    .as_bytes(),
                )
                .await
                .ok();
        }
    });

    format!("http://{addr}")
}
