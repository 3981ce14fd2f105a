//! Multipart event feed from `eventManager.cgi`.
//!
//! The device keeps the response open and writes one section per event:
//!
//! ```text
//! --myboundary
//! Content-Type: text/plain
//! Content-Length: 39
//!
//! Code=VideoMotion;action=Start;index=0
//!
//! ```
//!
//! The body is `key=value;` pairs, optionally ending in `data={...}` where
//! everything from the `{` onwards is a raw JSON payload.
//!
//! [`EventReader`] works over any [`AsyncBufRead`]; [`event_manager`]
//! attaches to a device and wraps the reader in a [`Stream`].

use std::io;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, TryStreamExt};
use indexmap::IndexMap;
use reqwest::header::CONTENT_TYPE;
use serde::{Serialize, Serializer};
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::io::StreamReader;
use tracing::{debug, trace};

use crate::cgi::{CgiGet, CgiRequest, ok};
use crate::error::{Error, body_preview};

pub const DEFAULT_BOUNDARY: &str = "myboundary";

/// Type-erased response body used by the live feed.
pub type BoxedBody = Pin<Box<dyn AsyncBufRead + Send>>;

// ── Event ───────────────────────────────────────────────────────────

/// One parsed section of the event feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Event {
    pub content_type: String,
    pub content_length: usize,
    pub code: String,
    pub action: String,
    pub index: i64,
    /// Keys other than `code`, `action` and `index`, lowercased.
    pub extra: IndexMap<String, String>,
    /// Trailing payload bytes as sent, usually a JSON object. Empty when
    /// absent. Serialized as text with invalid UTF-8 replaced.
    #[serde(serialize_with = "serialize_lossy")]
    pub data: Bytes,
}

fn serialize_lossy<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(data))
}

impl Event {
    /// Decode the raw payload.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_slice(&self.data).map_err(|e| Error::Decode {
            message: e.to_string(),
            body: body_preview(&String::from_utf8_lossy(&self.data)),
        })
    }

    fn from_parts(content_type: String, content_length: usize, body: &[u8]) -> Self {
        let (mut fields, data) = parse_body(body);
        let code = fields.shift_remove("code").unwrap_or_default();
        let action = fields.shift_remove("action").unwrap_or_default();
        let index = fields
            .shift_remove("index")
            .and_then(|i| i.trim().parse().ok())
            .unwrap_or(0);

        Self {
            content_type,
            content_length,
            code,
            action,
            index,
            extra: fields,
            data,
        }
    }
}

/// Split `key=value;key=value;data={...}` into fields and raw payload.
///
/// Keys are lowercased. Scanning stops at the first value that starts with
/// `{`; that value and everything after it is the payload. The key naming
/// the payload is not kept. The payload bytes are copied untouched.
fn parse_body(body: &[u8]) -> (IndexMap<String, String>, Bytes) {
    let mut fields = IndexMap::new();
    let mut rest = body;

    while let Some((key, after)) = split_once(rest, b'=') {
        let key = String::from_utf8_lossy(key).trim().to_lowercase();
        if after.starts_with(b"{") {
            return (fields, Bytes::copy_from_slice(after));
        }
        match split_once(after, b';') {
            Some((value, next)) => {
                fields.insert(key, String::from_utf8_lossy(value).into_owned());
                rest = next;
            }
            None => {
                fields.insert(key, String::from_utf8_lossy(after).trim_end().to_owned());
                break;
            }
        }
    }

    (fields, Bytes::new())
}

fn split_once(bytes: &[u8], delim: u8) -> Option<(&[u8], &[u8])> {
    let at = bytes.iter().position(|b| *b == delim)?;
    Some((bytes.get(..at)?, bytes.get(at + 1..)?))
}

// ── EventReader ─────────────────────────────────────────────────────

/// Line-oriented reader over a boundary-delimited event feed.
pub struct EventReader<R> {
    reader: R,
    marker: String,
    buf: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> EventReader<R> {
    pub fn new(reader: R, boundary: &str) -> Self {
        Self {
            reader,
            marker: format!("--{boundary}"),
            buf: Vec::with_capacity(256),
        }
    }

    /// Skip forward to the next boundary line.
    ///
    /// Returns [`Error::StreamEnded`] if the stream ends first.
    pub async fn poll(&mut self) -> Result<(), Error> {
        loop {
            self.read_line().await?;
            if self.buf.starts_with(self.marker.as_bytes()) {
                return Ok(());
            }
            trace!(line = %String::from_utf8_lossy(&self.buf), "skipping line outside event section");
        }
    }

    /// Parse the section following a successful [`poll`](Self::poll).
    pub async fn read_event(&mut self) -> Result<Event, Error> {
        let mut content_type = String::new();
        let mut content_length = 0;
        for line in self.read_until_blank().await? {
            let line = String::from_utf8_lossy(&line);
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            if name.trim().eq_ignore_ascii_case("content-type") {
                value.clone_into(&mut content_type);
            } else if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.parse().unwrap_or(0);
            }
        }

        let body = self.read_until_blank().await?.join(&b'\n');
        Ok(Event::from_parts(content_type, content_length, &body))
    }

    async fn read_until_blank(&mut self) -> Result<Vec<Vec<u8>>, Error> {
        let mut lines = Vec::new();
        loop {
            self.read_line().await?;
            if self.buf.is_empty() {
                return Ok(lines);
            }
            lines.push(self.buf.clone());
        }
    }

    /// Load the next line into `buf` without its terminator.
    ///
    /// Returns [`Error::StreamEnded`] at end of stream.
    async fn read_line(&mut self) -> Result<(), Error> {
        self.buf.clear();
        let n = self.reader.read_until(b'\n', &mut self.buf).await?;
        if n == 0 {
            return Err(Error::StreamEnded);
        }
        while self.buf.last().is_some_and(|b| *b == b'\n' || *b == b'\r') {
            self.buf.pop();
        }
        Ok(())
    }
}

// ── EventManager ────────────────────────────────────────────────────

/// An attached event feed: the open response body plus its boundary.
pub struct EventManager {
    boundary: String,
    body: BoxedBody,
}

impl std::fmt::Debug for EventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventManager")
            .field("boundary", &self.boundary)
            .finish_non_exhaustive()
    }
}

impl EventManager {
    pub fn new(body: BoxedBody, boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            body,
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn into_reader(self) -> EventReader<BoxedBody> {
        EventReader::new(self.body, &self.boundary)
    }

    /// Poll and read events until the feed ends or fails.
    ///
    /// A clean end of stream terminates the stream without an error item.
    pub fn into_stream(self) -> impl Stream<Item = Result<Event, Error>> + Send {
        let mut reader = self.into_reader();
        async_stream::stream! {
            loop {
                match reader.poll().await {
                    Ok(()) => {}
                    Err(Error::StreamEnded) => break,
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
                match reader.read_event().await {
                    Ok(event) => yield Ok(event),
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        }
    }
}

/// Boundary from a `multipart/x-mixed-replace; boundary=...` content type.
pub fn parse_boundary(content_type: &str) -> String {
    content_type
        .split(';')
        .filter_map(|token| token.split_once('='))
        .find(|(key, _)| key.trim() == "boundary")
        .map(|(_, value)| value.trim().trim_matches('"').to_owned())
        .filter(|boundary| !boundary.is_empty())
        .unwrap_or_else(|| DEFAULT_BOUNDARY.to_owned())
}

/// Attach to `eventManager.cgi` for all event codes.
///
/// `heartbeat` asks the device to emit a `Heartbeat` section every N seconds
/// so dead connections are noticed.
pub async fn event_manager(cgi: &impl CgiGet, heartbeat: Option<u32>) -> Result<EventManager, Error> {
    let mut req = CgiRequest::new("eventManager.cgi")
        .query("action", "attach")
        .query("codes", "[All]")
        .streaming();
    if let Some(heartbeat) = heartbeat.filter(|h| *h != 0) {
        req = req.query_int("heartbeat", i64::from(heartbeat));
    }

    let resp = ok(cgi.cgi_get(&req).await?)?;
    let boundary = resp
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| DEFAULT_BOUNDARY.to_owned(), parse_boundary);
    debug!(boundary = %boundary, "attached to event feed");

    let body = StreamReader::new(resp.bytes_stream().map_err(io::Error::other));
    Ok(EventManager::new(Box::pin(BufReader::new(body)), boundary))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const FIXTURE: &str = "--myboundary\r
Content-Type: text/plain\r
Content-Length: 147\r
\r
Code=VideoMotion;action=Start;index=0;data={
\t\"LocaleTime\":\t\"2023-08-11 21:37:30\",
\t\"UTC\":\t1691815050,
\t\"SmartMotionEnable\":\ttrue
}
\r
--myboundary\r
Content-Type: text/plain\r
Content-Length: 146\r
\r
Code=VideoMotion;action=Stop;index=1;test=doesnotexist;data={
\t\"Name\":\t\"IPC\"
}
\r
";

    fn reader(input: &str) -> EventReader<&[u8]> {
        EventReader::new(input.as_bytes(), DEFAULT_BOUNDARY)
    }

    #[tokio::test]
    async fn reads_two_events_then_ends() {
        let mut reader = reader(FIXTURE);

        reader.poll().await.unwrap();
        let first = reader.read_event().await.unwrap();
        assert_eq!(first.content_type, "text/plain");
        assert_eq!(first.content_length, 147);
        assert_eq!(first.code, "VideoMotion");
        assert_eq!(first.action, "Start");
        assert_eq!(first.index, 0);
        assert!(first.extra.is_empty());
        assert!(first.data.starts_with(b"{"));

        reader.poll().await.unwrap();
        let second = reader.read_event().await.unwrap();
        assert_eq!(second.content_length, 146);
        assert_eq!(second.action, "Stop");
        assert_eq!(second.index, 1);
        assert_eq!(second.extra.get("test").map(String::as_str), Some("doesnotexist"));

        let payload: serde_json::Value = second.json().unwrap();
        assert_eq!(payload["Name"], "IPC");

        assert!(matches!(reader.poll().await, Err(Error::StreamEnded)));
    }

    #[tokio::test]
    async fn poll_skips_garbage_before_boundary() {
        let input = "noise\r\nmore noise\r\n--myboundary\r\n\r\nCode=Heartbeat\r\n\r\n";
        let mut reader = reader(input);
        reader.poll().await.unwrap();
        let event = reader.read_event().await.unwrap();
        assert_eq!(event.code, "Heartbeat");
        assert_eq!(event.content_length, 0);
        assert!(event.data.is_empty());
    }

    #[tokio::test]
    async fn payload_bytes_are_kept_verbatim() {
        let mut input = b"--myboundary\r\n\r\nCode=AlarmLocal;action=Pulse;index=0;data={\"Name\":\"".to_vec();
        input.extend_from_slice(&[0xC3, 0x28]);
        input.extend_from_slice(b"\"}\r\n\r\n");

        let mut reader = EventReader::new(input.as_slice(), DEFAULT_BOUNDARY);
        reader.poll().await.unwrap();
        let event = reader.read_event().await.unwrap();
        assert_eq!(event.code, "AlarmLocal");
        assert_eq!(&event.data[..], b"{\"Name\":\"\xC3\x28\"}");

        let shown = serde_json::to_value(&event).unwrap();
        assert_eq!(shown["data"], "{\"Name\":\"\u{FFFD}(\"}");
    }

    #[tokio::test]
    async fn empty_stream_ends_immediately() {
        assert!(matches!(reader("").poll().await, Err(Error::StreamEnded)));
    }

    #[tokio::test]
    async fn stream_yields_events_and_stops_cleanly() {
        use futures_util::StreamExt;

        let body: BoxedBody = Box::pin(FIXTURE.as_bytes());
        let events: Vec<_> = EventManager::new(body, DEFAULT_BOUNDARY)
            .into_stream()
            .collect()
            .await;
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(Result::is_ok));
    }

    #[test]
    fn body_without_payload_keeps_last_value() {
        let (fields, data) = parse_body(b"Code=AlarmLocal;action=Pulse;index=3");
        assert_eq!(fields.get("code").map(String::as_str), Some("AlarmLocal"));
        assert_eq!(fields.get("index").map(String::as_str), Some("3"));
        assert!(data.is_empty());
    }

    #[test]
    fn malformed_index_defaults_to_zero() {
        let event = Event::from_parts(String::new(), 0, b"Code=X;action=Start;index=abc;");
        assert_eq!(event.index, 0);
        assert_eq!(event.code, "X");
    }

    #[test]
    fn keys_are_case_insensitive() {
        let event = Event::from_parts(String::new(), 0, b"CODE=X;Action=Stop;INDEX=2");
        assert_eq!(event.code, "X");
        assert_eq!(event.action, "Stop");
        assert_eq!(event.index, 2);
    }

    #[test]
    fn boundary_from_content_type() {
        assert_eq!(
            parse_boundary("multipart/x-mixed-replace; boundary=myboundary"),
            "myboundary"
        );
        assert_eq!(
            parse_boundary("multipart/x-mixed-replace;boundary=\"other\""),
            "other"
        );
        assert_eq!(parse_boundary("text/plain"), DEFAULT_BOUNDARY);
    }
}
