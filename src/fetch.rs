use thiserror::Error;
use tracing::instrument;

#[derive(Debug, Error)]
pub enum FetchError {
    /// Upstream answered, but outside the 200-299 range.
    #[error("upstream returned HTTP {0}")]
    Status(u16),
    /// No usable response at all (DNS, connect, read, decode).
    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),
}

/// Fetches a resolved playlist URL and returns its body as opaque text.
///
/// One request, no retries. Redirects follow reqwest's default policy (up to
/// 10 hops); anything beyond that is the transport's business, not ours.
///
/// # Errors
/// * [`FetchError::Status`] on a non-2xx response
/// * [`FetchError::Transport`] when no response arrives
#[instrument(skip(client))]
pub async fn fetch_manifest(client: &reqwest::Client, url: &str) -> Result<String, FetchError> {
    let res = client
        .get(url)
        .send()
        .await
        .map_err(FetchError::Transport)?;

    let status = res.status();
    if !status.is_success() {
        return Err(FetchError::Status(status.as_u16()));
    }

    res.text().await.map_err(FetchError::Transport)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::canned_http;

    #[tokio::test]
    async fn returns_verbatim_body_on_success() {
        let base = canned_http("200 OK", "#EXTM3U\n#EXT-X-ENDLIST\n").await;
        let client = reqwest::Client::new();

        let body = fetch_manifest(&client, &format!("{base}/index.m3u8"))
            .await
            .unwrap();
        assert_eq!(body, "#EXTM3U\n#EXT-X-ENDLIST\n");
    }

    #[tokio::test]
    async fn non_success_status_is_classified() {
        let base = canned_http("403 Forbidden", "denied").await;
        let client = reqwest::Client::new();

        let err = fetch_manifest(&client, &format!("{base}/index.m3u8"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Status(403)));
    }

    #[tokio::test]
    async fn no_response_is_a_transport_failure() {
        // Bind then drop to get a port with nothing listening on it.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = reqwest::Client::new();
        let err = fetch_manifest(&client, &format!("http://{addr}/index.m3u8"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Transport(_)));
    }
}
