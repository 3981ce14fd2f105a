// Snapshot and audio CGI helpers.
//
// These only look at the response headers; the body is handed back to the
// caller untouched as a byte stream.

use bytes::Bytes;
use futures_util::{Stream, TryStreamExt};
use reqwest::header::CONTENT_TYPE;
use strum::Display;

use crate::cgi::{CgiGet, CgiRequest, get_table, ok};
use crate::error::Error;
use crate::rpc::RpcClient;

/// A media response body with its content type and length.
#[derive(Debug)]
pub struct MediaStream {
    pub content_type: String,
    pub content_length: Option<u64>,
    response: reqwest::Response,
}

impl MediaStream {
    fn from_response(response: reqwest::Response) -> Self {
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        Self {
            content_type,
            content_length: response.content_length(),
            response,
        }
    }

    /// Read the whole body.
    pub async fn bytes(self) -> Result<Bytes, Error> {
        self.response.bytes().await.map_err(Error::Transport)
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, Error>> + Send {
        self.response.bytes_stream().map_err(Error::Transport)
    }
}

/// A recorded file from the device's local disk.
pub async fn load_file(rpc: &RpcClient, file_path: &str) -> Result<MediaStream, Error> {
    Ok(MediaStream::from_response(rpc.load_file(file_path).await?))
}

/// JPEG snapshot of `channel`. Channel 0 uses the device default.
pub async fn snapshot(cgi: &impl CgiGet, channel: u32) -> Result<MediaStream, Error> {
    let mut req = CgiRequest::new("snapshot.cgi")
        .query("action", "attach")
        .query("codes", "[All]");
    if channel != 0 {
        req = req.query_int("channel", i64::from(channel));
    }

    let resp = ok(cgi.cgi_get(&req).await?)?;
    Ok(MediaStream::from_response(resp))
}

pub async fn audio_input_channel_count(cgi: &impl CgiGet) -> Result<u32, Error> {
    collect_count(cgi, "devAudioInput.cgi").await
}

pub async fn audio_output_channel_count(cgi: &impl CgiGet) -> Result<u32, Error> {
    collect_count(cgi, "devAudioOutput.cgi").await
}

async fn collect_count(cgi: &impl CgiGet, method: &str) -> Result<u32, Error> {
    let req = CgiRequest::new(method).query("action", "getCollect");
    let table = get_table(cgi, &req).await?;
    let raw = table.get("result").unwrap_or_default();
    raw.trim().parse().map_err(|e| Error::Decode {
        message: format!("{method}: invalid channel count: {e}"),
        body: raw.to_owned(),
    })
}

/// Framing of the audio stream response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum HttpType {
    SinglePart,
    MultiPart,
}

/// Live audio from `channel`.
pub async fn audio_stream(
    cgi: &impl CgiGet,
    channel: u32,
    http_type: HttpType,
) -> Result<MediaStream, Error> {
    let req = CgiRequest::new("audio.cgi")
        .query("action", "getAudio")
        .query_int("channel", i64::from(channel))
        .query("httptype", http_type.to_string())
        .streaming();

    let resp = ok(cgi.cgi_get(&req).await?)?;
    Ok(MediaStream::from_response(resp))
}
