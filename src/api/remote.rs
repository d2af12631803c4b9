//! Purpose: Provide a blocking HTTP client for a `phal` server's limb and config surface.
//! Exports: `RemoteClient`, `ActiveConfig`.
//! Role: Caller-side mirror of the Dispatcher; used by the CLI and integration tests.
//! Invariants: Only 200 is success; any other status decodes into `Error` with its kind.
//! Invariants: Limb names are sent as single path segments (percent-encoded by `url`).
#![allow(clippy::result_large_err)]

use std::io::Read;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::core::error::{Error, ErrorKind};
use crate::core::hardware::Level;

type ApiResult<T> = Result<T, Error>;

/// Header naming the Registry generation that served a response.
pub const GENERATION_HEADER: &str = "phal-generation";

#[derive(Clone)]
pub struct RemoteClient {
    inner: Arc<RemoteClientInner>,
}

struct RemoteClientInner {
    base_url: Url,
    agent: ureq::Agent,
}

impl std::fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteClient")
            .field("base_url", &self.inner.base_url.as_str())
            .finish_non_exhaustive()
    }
}

/// The server's current configuration as reported by `GET /config`.
#[derive(Clone, Debug, Deserialize)]
pub struct ActiveConfig {
    pub generation: u64,
    pub limbs: Vec<Value>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: RemoteError,
}

#[derive(Deserialize)]
struct RemoteError {
    kind: String,
    message: Option<String>,
    hint: Option<String>,
    limb: Option<String>,
    resource: Option<String>,
}

#[derive(Deserialize)]
struct AppliedEnvelope {
    generation: u64,
}

impl RemoteClient {
    pub fn new(base_url: impl Into<String>) -> ApiResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let agent = ureq::AgentBuilder::new().build();
        Ok(Self {
            inner: Arc::new(RemoteClientInner { base_url, agent }),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// Posts a limb configuration; returns the generation that was published.
    pub fn apply_config(&self, payload: impl AsRef<[u8]>) -> ApiResult<u64> {
        let url = build_url(&self.inner.base_url, &["config"])?;
        let response = self
            .request("POST", &url)
            .set("Content-Type", "application/json")
            .send_bytes(payload.as_ref());
        let envelope: AppliedEnvelope = read_json_response(check(response)?)?;
        Ok(envelope.generation)
    }

    pub fn active_config(&self) -> ApiResult<ActiveConfig> {
        let url = build_url(&self.inner.base_url, &["config"])?;
        let response = self
            .request("GET", &url)
            .set("Accept", "application/json")
            .call();
        read_json_response(check(response)?)
    }

    pub fn get_pin(&self, name: &str) -> ApiResult<Level> {
        let body = self.get_limb(name)?;
        String::from_utf8_lossy(&body).parse::<Level>().map_err(|_| {
            Error::new(ErrorKind::Internal)
                .with_message("server returned a pin body other than High or Low")
                .with_limb(name)
        })
    }

    pub fn set_pin(&self, name: &str, level: Level) -> ApiResult<()> {
        self.set_limb(name, level.as_str().as_bytes())
    }

    pub fn send(&self, name: &str, bytes: &[u8]) -> ApiResult<()> {
        self.set_limb(name, bytes)
    }

    /// Drains whatever the serial limb has buffered; empty when nothing arrived.
    pub fn receive(&self, name: &str) -> ApiResult<Vec<u8>> {
        self.get_limb(name)
    }

    pub fn get_limb(&self, name: &str) -> ApiResult<Vec<u8>> {
        let url = build_url(&self.inner.base_url, &["limb", name])?;
        let response = check(self.request("GET", &url).call())?;
        read_bytes_response(response)
    }

    pub fn set_limb(&self, name: &str, body: &[u8]) -> ApiResult<()> {
        let url = build_url(&self.inner.base_url, &["limb", name])?;
        let response = self
            .request("POST", &url)
            .set("Content-Type", "application/octet-stream")
            .send_bytes(body);
        check(response)?;
        Ok(())
    }

    fn request(&self, method: &str, url: &Url) -> ureq::Request {
        self.inner.agent.request(method, url.as_str())
    }
}

fn check(response: Result<ureq::Response, ureq::Error>) -> ApiResult<ureq::Response> {
    match response {
        Ok(resp) if resp.status() == 200 => Ok(resp),
        Ok(resp) => {
            let status = resp.status();
            Err(parse_error_response(status, resp))
        }
        Err(ureq::Error::Status(code, resp)) => Err(parse_error_response(code, resp)),
        Err(ureq::Error::Transport(err)) => Err(Error::new(ErrorKind::Io)
            .with_message("request failed")
            .with_source(err)),
    }
}

fn normalize_base_url(raw: String) -> ApiResult<Url> {
    let mut url = Url::parse(&raw).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid server base url")
            .with_source(err)
    })?;
    if url.scheme() != "http" {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("server base url must use the http scheme")
            .with_hint("TLS is not supported; use http://host:port."));
    }
    if url.path() != "/" && !url.path().is_empty() {
        return Err(
            Error::new(ErrorKind::Usage).with_message("server base url must not include a path")
        );
    }
    url.set_path("/");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

fn build_url(base_url: &Url, segments: &[&str]) -> ApiResult<Url> {
    let mut url = base_url.clone();
    {
        let mut path = url.path_segments_mut().map_err(|_| {
            Error::new(ErrorKind::Usage).with_message("server base url cannot be a base")
        })?;
        path.clear();
        for segment in segments {
            path.push(segment);
        }
    }
    Ok(url)
}

fn read_bytes_response(response: ureq::Response) -> ApiResult<Vec<u8>> {
    let mut body = Vec::new();
    response
        .into_reader()
        .read_to_end(&mut body)
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to read response body")
                .with_source(err)
        })?;
    Ok(body)
}

fn read_json_response<R>(response: ureq::Response) -> ApiResult<R>
where
    R: serde::de::DeserializeOwned,
{
    let body = response.into_string().map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to read response body")
            .with_source(err)
    })?;
    serde_json::from_str(&body).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("invalid response json")
            .with_source(err)
    })
}

fn parse_error_response(status: u16, response: ureq::Response) -> Error {
    let body = response.into_string().unwrap_or_default();
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(&body) {
        return error_from_remote(envelope.error);
    }
    let kind = error_kind_from_status(status);
    Error::new(kind).with_message(format!("server error status {status}"))
}

fn error_from_remote(remote: RemoteError) -> Error {
    let kind = ErrorKind::parse(&remote.kind).unwrap_or(ErrorKind::Internal);
    let mut err = Error::new(kind);
    if let Some(message) = remote.message {
        err = err.with_message(message);
    }
    if let Some(hint) = remote.hint {
        err = err.with_hint(hint);
    }
    if let Some(limb) = remote.limb {
        err = err.with_limb(limb);
    }
    if let Some(resource) = remote.resource {
        err = err.with_resource(resource);
    }
    err
}

fn error_kind_from_status(status: u16) -> ErrorKind {
    match status {
        400 | 413 => ErrorKind::Usage,
        404 => ErrorKind::NotFound,
        409 => ErrorKind::Direction,
        422 => ErrorKind::Malformed,
        503 => ErrorKind::Hardware,
        500..=599 => ErrorKind::Internal,
        _ => ErrorKind::Io,
    }
}
