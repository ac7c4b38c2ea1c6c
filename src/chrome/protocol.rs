//! Just enough of the Chrome DevTools protocol to navigate a page and watch
//! its outbound requests. Messages are JSON over one WebSocket; commands
//! carry an `id`, events a `method`.

use serde_json::{Value, json};

/// Serializes one protocol command.
#[must_use]
pub fn command(id: u64, method: &str, params: Value) -> String {
    json!({ "id": id, "method": method, "params": params }).to_string()
}

/// The subset of inbound traffic the session cares about.
#[derive(Debug, PartialEq, Eq)]
pub enum PageEvent {
    /// `Network.requestWillBeSent` - a request is about to leave the page.
    RequestWillBeSent(String),
    /// `Page.loadEventFired` - the page's load event ran.
    LoadEventFired,
    /// Reply to a command we sent, with the error text if it failed.
    CommandResult { id: u64, error: Option<String> },
    /// Everything else - target churn, console spam, unrelated domains.
    Other,
}

#[must_use]
pub fn parse_message(raw: &str) -> PageEvent {
    let Ok(value) = serde_json::from_str::<Value>(raw) else {
        return PageEvent::Other;
    };

    if let Some(id) = value["id"].as_u64() {
        let error = value["error"]["message"]
            .as_str()
            // Page.navigate reports unreachable URLs in-band rather than as
            // a protocol error.
            .or_else(|| value["result"]["errorText"].as_str())
            .filter(|text| !text.is_empty())
            .map(ToString::to_string);
        return PageEvent::CommandResult { id, error };
    }

    match value["method"].as_str() {
        Some("Network.requestWillBeSent") => value["params"]["request"]["url"]
            .as_str()
            .map_or(PageEvent::Other, |url| {
                PageEvent::RequestWillBeSent(url.to_string())
            }),
        Some("Page.loadEventFired") => PageEvent::LoadEventFired,
        _ => PageEvent::Other,
    }
}
