//! Request/response plumbing shared by both protocol generations.
//!
//! The [`Transport`] trait is the only way the rest of the crate talks to the
//! server. [`HttpTransport`] implements it over reqwest and attaches the bearer
//! credential held by an explicit [`Session`].

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::{Arc, RwLock};
use tracing::debug;

use crate::error::{AlignError, Result};
use crate::model::{ClientConfig, Download};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl Method {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// A request relative to the server base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Look up a query parameter by name.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Successful response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Json(Value),
    /// 204 or an empty 2xx body.
    NoContent,
}

impl Reply {
    pub fn into_value(self) -> Value {
        match self {
            Reply::Json(v) => v,
            Reply::NoContent => Value::Null,
        }
    }

    pub fn decode<T: DeserializeOwned>(self, what: &'static str) -> Result<T> {
        serde_json::from_value(self.into_value()).map_err(|e| AlignError::decode(what, e))
    }
}

/// One file field of a multipart upload.
#[derive(Debug, Clone)]
pub struct FormPart {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// Multipart body for uploads.
#[derive(Debug, Clone, Default)]
pub struct UploadForm {
    pub parts: Vec<(String, FormPart)>,
}

impl UploadForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(mut self, name: &str, file_name: impl Into<String>, bytes: Bytes) -> Self {
        self.parts.push((
            name.to_string(),
            FormPart {
                file_name: file_name.into(),
                content_type: Some("text/plain".into()),
                bytes,
            },
        ));
        self
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// JSON request. Non-2xx statuses become [`AlignError::Api`].
    async fn request(&self, req: ApiRequest) -> Result<Reply>;

    /// Multipart POST with the same error mapping as [`Transport::request`].
    async fn upload(&self, path: &str, form: UploadForm) -> Result<Reply>;

    /// Raw byte payload for file-like responses.
    async fn download(&self, req: ApiRequest) -> Result<Download>;
}

/// Holder for the bearer credential. Cloning shares the same slot.
#[derive(Clone, Default)]
pub struct Session {
    token: Arc<RwLock<Option<String>>>,
}

impl Session {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: Arc::new(RwLock::new(token.filter(|t| !t.is_empty()))),
        }
    }

    pub fn set_token(&self, token: impl Into<String>) {
        let mut slot = self.token.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(token.into());
    }

    pub fn clear(&self) {
        let mut slot = self.token.write().unwrap_or_else(|e| e.into_inner());
        *slot = None;
    }

    pub fn bearer(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let present = self.bearer().is_some();
        f.debug_struct("Session")
            .field("token", &if present { "<redacted>" } else { "<none>" })
            .finish()
    }
}

pub struct HttpTransport {
    http: reqwest::Client,
    base_url: Url,
    session: Session,
}

impl HttpTransport {
    pub fn new(cfg: &ClientConfig, session: Session) -> Result<Self> {
        let base_url = Url::parse(&cfg.base_url).map_err(|e| {
            AlignError::InvalidArgument(format!("base URL '{}': {e}", cfg.base_url))
        })?;
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(cfg.request_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url,
            session,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn url(&self, path: &str, query: &[(String, String)]) -> Url {
        let mut url = self.base_url.clone();
        let joined = format!("{}{}", url.path().trim_end_matches('/'), path);
        url.set_path(&joined);
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        url
    }

    fn builder(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        let rb = self.http.request(method.as_reqwest(), url);
        match self.session.bearer() {
            Some(token) => rb.bearer_auth(token),
            None => rb,
        }
    }

    async fn send(&self, rb: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let resp = rb.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let reason = status.canonical_reason().unwrap_or("");
        let body = resp.bytes().await.unwrap_or_default();
        Err(AlignError::from_response(status.as_u16(), reason, &body))
    }

    async fn read_reply(resp: reqwest::Response) -> Result<Reply> {
        if resp.status() == StatusCode::NO_CONTENT {
            return Ok(Reply::NoContent);
        }
        let body = resp.bytes().await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Reply::NoContent);
        }
        serde_json::from_slice(&body)
            .map(Reply::Json)
            .map_err(|e| AlignError::decode("response body", e))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, req: ApiRequest) -> Result<Reply> {
        let url = self.url(&req.path, &req.query);
        debug!(method = ?req.method, %url, "request");
        let mut rb = self.builder(req.method, url);
        if let Some(body) = &req.body {
            rb = rb.json(body);
        }
        let resp = self.send(rb).await?;
        debug!(status = resp.status().as_u16(), path = %req.path, "response");
        Self::read_reply(resp).await
    }

    async fn upload(&self, path: &str, form: UploadForm) -> Result<Reply> {
        let url = self.url(path, &[]);
        debug!(%url, parts = form.parts.len(), "upload");
        let mut multipart = reqwest::multipart::Form::new();
        for (name, part) in form.parts {
            let mut p =
                reqwest::multipart::Part::bytes(part.bytes.to_vec()).file_name(part.file_name);
            if let Some(ct) = part.content_type {
                p = p.mime_str(&ct)?;
            }
            multipart = multipart.part(name, p);
        }
        let resp = self
            .send(self.builder(Method::Post, url).multipart(multipart))
            .await?;
        Self::read_reply(resp).await
    }

    async fn download(&self, req: ApiRequest) -> Result<Download> {
        let url = self.url(&req.path, &req.query);
        debug!(method = ?req.method, %url, "download");
        let mut rb = self.builder(req.method, url);
        if let Some(body) = &req.body {
            rb = rb.json(body);
        }
        let resp = self.send(rb).await?;
        let file_name = attachment_name(resp.headers());
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut buf = BytesMut::new();
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            buf.extend_from_slice(&chunk?);
        }
        debug!(bytes = buf.len(), file = ?file_name, "download complete");
        Ok(Download {
            file_name,
            content_type,
            bytes: buf.freeze(),
        })
    }
}

/// Extract `filename` from a `Content-Disposition` header.
fn attachment_name(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(CONTENT_DISPOSITION)?.to_str().ok()?;
    raw.split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("filename="))
        .map(|name| name.trim_matches('"').to_string())
        .filter(|name| !name.is_empty())
}
