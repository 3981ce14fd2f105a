// RPC envelope codec
//
// Wire shapes for `/RPC2` and `/RPC2_Login`. Devices are inconsistent about
// field types (session and result flip between strings, numbers and bools
// across firmware), so every polymorphic field is normalized at decode time
// into one canonical representation.

use std::fmt;

use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::Display;
use tracing::{debug, trace};
use url::Url;

use crate::error::{Error, body_preview, decode_error};

// ── Request ─────────────────────────────────────────────────────────

/// A single RPC call as it goes over the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    pub id: u64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub session: String,
    pub method: String,
    pub params: Value,
    #[serde(skip_serializing_if = "is_zero")]
    pub object: i64,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(object: &i64) -> bool {
    *object == 0
}

impl Request {
    pub fn new(
        id: u64,
        session: impl Into<String>,
        method: impl Into<String>,
        params: Value,
        object: i64,
    ) -> Self {
        Self {
            id,
            session: session.into(),
            method: method.into(),
            params,
            object,
        }
    }
}

// ── RequestBuilder ──────────────────────────────────────────────────

/// Immutable request builder bound to an HTTP client and endpoint URL.
///
/// Every setter consumes the builder and returns a new one, so a template
/// can be cloned and specialized by concurrent callers without sharing
/// mutable state.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    http: reqwest::Client,
    url: Url,
    request: Request,
}

impl RequestBuilder {
    pub fn new(http: reqwest::Client, url: Url, id: u64, session: impl Into<String>) -> Self {
        Self {
            http,
            url,
            request: Request::new(id, session, "", Value::Null, 0),
        }
    }

    pub fn id(mut self, id: u64) -> Self {
        self.request.id = id;
        self
    }

    pub fn session(mut self, session: impl Into<String>) -> Self {
        self.request.session = session.into();
        self
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.request.method = method.into();
        self
    }

    pub fn params(mut self, params: Value) -> Self {
        self.request.params = params;
        self
    }

    /// Target a device-side object handle (e.g. an open file-search cursor).
    pub fn object(mut self, object: i64) -> Self {
        self.request.object = object;
        self
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    // ── Sending ─────────────────────────────────────────────────────

    /// POST the request and decode the response without interpreting `error`.
    pub async fn send<T: DeserializeOwned>(self) -> Result<Response<T>, Error> {
        let Self { http, url, request } = self;
        debug!(method = %request.method, id = request.id, url = %url, "RPC request");

        let resp = http
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(Error::Transport)?;

        let status = resp.status();
        let body = resp.text().await.map_err(Error::Transport)?;
        trace!(method = %request.method, body = %body_preview(&body), "RPC response");

        if !status.is_success() {
            return Err(Error::Http {
                status: status.as_u16(),
                message: body_preview(&body),
            });
        }

        Response::decode(&body, &request.method)
    }

    /// POST the request, fail on a populated `error`, and return `params`.
    ///
    /// Absent `params` decode as JSON `null`, so `()`, `Option<_>` and
    /// `Value` targets succeed for methods that only return `result`.
    pub async fn send_checked<T: DeserializeOwned>(self) -> Result<T, Error> {
        let response = self.send::<T>().await?.check()?;
        match response.params {
            Some(params) => Ok(params),
            None => serde_json::from_value(Value::Null).map_err(|e| Error::Decode {
                message: format!("response has no params: {e}"),
                body: String::new(),
            }),
        }
    }
}

// ── Response ────────────────────────────────────────────────────────

/// Decoded RPC response.
///
/// Callers must look at `error` before trusting `params` or `result`;
/// [`Response::check`] does that for them.
#[derive(Debug, Clone)]
pub struct Response<T> {
    pub id: u64,
    pub session: Session,
    pub error: Option<ResponseError>,
    pub params: Option<T>,
    pub result: RpcResult,
}

#[derive(Deserialize)]
struct RawResponse {
    #[serde(default)]
    id: u64,
    #[serde(default)]
    session: Session,
    #[serde(default)]
    error: Option<ResponseError>,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    result: RpcResult,
}

impl<T: DeserializeOwned> Response<T> {
    /// Decode a response body, tagging any error with the originating method.
    pub fn decode(body: &str, method: &str) -> Result<Self, Error> {
        let raw: RawResponse = serde_json::from_str(body).map_err(|e| decode_error(&e, body))?;

        let params = if raw.params.is_null() {
            None
        } else {
            match serde_json::from_value(raw.params) {
                Ok(params) => Some(params),
                // The error object is authoritative when both are present.
                Err(_) if raw.error.is_some() => None,
                Err(e) => return Err(decode_error(&e, body)),
            }
        };

        let error = raw.error.map(|mut err| {
            err.method = method.to_owned();
            err
        });

        Ok(Self {
            id: raw.id,
            session: raw.session,
            error,
            params,
            result: raw.result,
        })
    }
}

impl<T> Response<T> {
    /// Convert a populated `error` into `Err`, keeping session-invalid
    /// rejections distinguishable from other protocol errors.
    pub fn check(self) -> Result<Self, Error> {
        match self.error {
            Some(err) => Err(err.into()),
            None => Ok(self),
        }
    }
}

// ── Polymorphic fields ──────────────────────────────────────────────

/// Session token, sent by devices as either a string or an integer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Session(String);

impl Session {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Session {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(Self::default()),
            Value::String(s) => Ok(Self(s)),
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(Self(n.to_string())),
            _ => Err(de::Error::custom("session is not a string or number")),
        }
    }
}

/// Call result, sent as either a bool or an integer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RpcResult(i64);

impl RpcResult {
    pub fn value(self) -> i64 {
        self.0
    }

    pub fn as_bool(self) -> bool {
        self.0 == 1
    }
}

impl<'de> Deserialize<'de> for RpcResult {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(Self::default()),
            Value::Bool(b) => Ok(Self(i64::from(b))),
            Value::Number(n) => n
                .as_i64()
                .map(Self)
                .ok_or_else(|| de::Error::custom("result is not an integer")),
            _ => Err(de::Error::custom("result is not a bool or number")),
        }
    }
}

// ── Response error ──────────────────────────────────────────────────

/// Classified kind of a device error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ErrorKind {
    InvalidRequest,
    MethodNotFound,
    InterfaceNotFound,
    NoData,
    InvalidSession,
    Unknown,
}

impl ErrorKind {
    pub fn from_code(code: i64) -> Self {
        match code {
            268_894_209 => Self::InvalidRequest,
            268_894_210 => Self::MethodNotFound,
            268_632_064 => Self::InterfaceNotFound,
            285_409_284 => Self::NoData,
            287_637_504 | 287_637_505 => Self::InvalidSession,
            _ => Self::Unknown,
        }
    }
}

/// Structured `error` object from a response, tagged with the method that
/// produced it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, thiserror::Error)]
#[serde(from = "RawResponseError")]
#[error("{method}: {message} (code {code}, {kind})")]
pub struct ResponseError {
    pub method: String,
    pub code: i64,
    pub message: String,
    pub kind: ErrorKind,
}

#[derive(Deserialize)]
struct RawResponseError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

impl From<RawResponseError> for ResponseError {
    fn from(raw: RawResponseError) -> Self {
        Self {
            method: String::new(),
            code: raw.code,
            message: raw.message,
            kind: ErrorKind::from_code(raw.code),
        }
    }
}

impl ResponseError {
    pub fn new(method: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            code,
            message: message.into(),
            kind: ErrorKind::from_code(code),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn decode(body: &Value) -> Response<Value> {
        Response::decode(&body.to_string(), "test.method").unwrap()
    }

    #[test]
    fn request_omits_empty_session_and_zero_object() {
        let req = Request::new(3, "", "global.getCurrentTime", Value::Null, 0);
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({ "id": 3, "method": "global.getCurrentTime", "params": null })
        );

        let req = Request::new(4, "abc", "mediaFileFind.close", Value::Null, 99);
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({
                "id": 4,
                "session": "abc",
                "method": "mediaFileFind.close",
                "params": null,
                "object": 99
            })
        );
    }

    #[test]
    fn builder_template_is_not_mutated_by_specializations() {
        let template = RequestBuilder::new(
            reqwest::Client::new(),
            Url::parse("http://camera/RPC2").unwrap(),
            7,
            "sess",
        );
        let a = template.clone().method("a").object(1);
        let b = template.clone().method("b").params(json!({ "x": 1 }));

        assert_eq!(template.request().method, "");
        assert_eq!(a.request().method, "a");
        assert_eq!(a.request().object, 1);
        assert_eq!(b.request().object, 0);
        assert_eq!(b.request().params, json!({ "x": 1 }));
    }

    #[test]
    fn session_number_and_string_normalize_identically() {
        let number = decode(&json!({ "id": 1, "session": 42, "result": true }));
        let string = decode(&json!({ "id": 1, "session": "42", "result": true }));
        assert_eq!(number.session, string.session);
        assert_eq!(number.session.as_str(), "42");
    }

    #[test]
    fn result_bool_and_integer_normalize_identically() {
        let truthy = decode(&json!({ "result": true }));
        let one = decode(&json!({ "result": 1 }));
        assert_eq!(truthy.result, one.result);
        assert!(truthy.result.as_bool());
        assert!(one.result.as_bool());

        assert!(!decode(&json!({ "result": false })).result.as_bool());
        assert!(!decode(&json!({ "result": 0 })).result.as_bool());
    }

    #[test]
    fn object_handle_result_keeps_full_integer() {
        let res = decode(&json!({ "result": 2_034_567_890_i64 }));
        assert_eq!(res.result.value(), 2_034_567_890);
    }

    #[test]
    fn session_of_wrong_shape_is_a_decode_error() {
        let err = Response::<Value>::decode(r#"{"session": [1]}"#, "m").unwrap_err();
        assert!(matches!(err, Error::Decode { ref message, .. } if message.contains("session")));
    }

    #[test]
    fn malformed_json_is_a_decode_error() {
        let err = Response::<Value>::decode("<html>", "m").unwrap_err();
        assert!(matches!(err, Error::Decode { ref body, .. } if body == "<html>"));
    }

    #[test]
    fn error_codes_classify() {
        assert_eq!(ErrorKind::from_code(268_894_209), ErrorKind::InvalidRequest);
        assert_eq!(ErrorKind::from_code(268_894_210), ErrorKind::MethodNotFound);
        assert_eq!(ErrorKind::from_code(268_632_064), ErrorKind::InterfaceNotFound);
        assert_eq!(ErrorKind::from_code(285_409_284), ErrorKind::NoData);
        assert_eq!(ErrorKind::from_code(287_637_504), ErrorKind::InvalidSession);
        assert_eq!(ErrorKind::from_code(287_637_505), ErrorKind::InvalidSession);
        assert_eq!(ErrorKind::from_code(1), ErrorKind::Unknown);
    }

    #[test]
    fn decoded_error_carries_method_and_kind() {
        let res = Response::<Value>::decode(
            r#"{"id":5,"error":{"code":268894210,"message":"Method not found"},"result":false}"#,
            "magicBox.nope",
        )
        .unwrap();
        let err = res.error.clone().unwrap();
        assert_eq!(err.method, "magicBox.nope");
        assert_eq!(err.kind, ErrorKind::MethodNotFound);

        let checked = res.check().unwrap_err();
        assert!(matches!(checked, Error::Rpc(ref e) if e.kind == ErrorKind::MethodNotFound));
    }

    #[test]
    fn check_flags_invalid_session() {
        let res = Response::<Value>::decode(
            r#"{"error":{"code":287637505,"message":"Invalid session"}}"#,
            "global.keepAlive",
        )
        .unwrap();
        assert!(res.check().unwrap_err().is_session_invalid());
    }

    #[test]
    fn params_that_fail_to_decode_are_ignored_when_an_error_is_present() {
        #[derive(Debug, Deserialize)]
        struct Strict {
            #[allow(dead_code)]
            count: u32,
        }

        let res = Response::<Strict>::decode(
            r#"{"error":{"code":1,"message":"x"},"params":{"other":true}}"#,
            "m",
        )
        .unwrap();
        assert!(res.params.is_none());
        assert!(res.error.is_some());
    }
}
