// Blocking HTTP transport shared by the REST-based backends.
// ureq is synchronous, so every request runs on the blocking thread pool.

use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::identifier::BackendKind;
use crate::{Result, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Method {
    Get,
    Post,
    Delete,
}

#[derive(Debug, Clone)]
pub(crate) struct HttpRequest {
    method: Method,
    path: String,
    headers: Vec<(String, String)>,
    body: Option<String>,
    content_type: &'static str,
    allow_not_found: bool,
}

impl HttpRequest {
    pub(crate) fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
            content_type: "application/json",
            allow_not_found: false,
        }
    }

    pub(crate) fn json(mut self, body: &Value) -> Self {
        self.body = Some(body.to_string());
        self
    }

    pub(crate) fn content_type(mut self, content_type: &'static str) -> Self {
        self.content_type = content_type;
        self
    }

    pub(crate) fn header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.push((key.to_string(), value.into()));
        self
    }

    /// Treat 404 as a regular reply instead of an error
    pub(crate) fn allow_not_found(mut self) -> Self {
        self.allow_not_found = true;
        self
    }
}

#[derive(Debug, Clone)]
pub(crate) struct HttpReply {
    pub(crate) status: u16,
    pub(crate) body: Value,
    headers: Vec<(String, String)>,
}

impl HttpReply {
    pub(crate) fn is_not_found(&self) -> bool {
        self.status == 404
    }

    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone)]
pub(crate) struct HttpClient {
    backend: BackendKind,
    base_url: Url,
    agent: ureq::Agent,
    default_headers: Vec<(String, String)>,
}

impl HttpClient {
    pub(crate) fn new(backend: BackendKind, base_url: &str, timeout: Duration) -> Result<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| StoreError::Config(format!("Invalid {} URL {}: {}", backend, base_url, e)))?;

        // Url::join drops the last segment unless the base ends with a slash
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();

        Ok(Self {
            backend,
            base_url,
            agent,
            default_headers: Vec::new(),
        })
    }

    pub(crate) fn with_header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.default_headers.push((key.to_string(), value.into()));
        self
    }

    pub(crate) async fn send(&self, request: HttpRequest) -> Result<HttpReply> {
        let url = self
            .base_url
            .join(request.path.trim_start_matches('/'))
            .map_err(|e| StoreError::Config(format!("Invalid request path {}: {}", request.path, e)))?;

        let mut headers = self.default_headers.clone();
        headers.extend(request.headers.iter().cloned());
        if request.body.is_some() {
            headers.push(("Content-Type".to_string(), request.content_type.to_string()));
        }

        debug!("{} {:?} {}", self.backend, request.method, url);

        let agent = self.agent.clone();
        let method = request.method;
        let body = request.body.clone();
        let target = url.to_string();
        let outcome = tokio::task::spawn_blocking(move || {
            send_blocking(&agent, method, &target, &headers, body.as_deref())
        })
        .await
        .map_err(|e| StoreError::unavailable(self.backend.as_str(), e))?;

        match outcome {
            Ok((status, text, headers)) => {
                let body = if text.trim().is_empty() {
                    Value::Null
                } else {
                    serde_json::from_str(&text)?
                };
                Ok(HttpReply {
                    status,
                    body,
                    headers,
                })
            }
            Err(ureq::Error::StatusCode(404)) if request.allow_not_found => Ok(HttpReply {
                status: 404,
                body: Value::Null,
                headers: Vec::new(),
            }),
            Err(error) => Err(self.classify(error, &url)),
        }
    }

    /// Transport failures and overloaded servers are transient, other statuses are not
    fn classify(&self, error: ureq::Error, url: &Url) -> StoreError {
        match error {
            ureq::Error::StatusCode(status) if status == 408 || status == 429 || status >= 500 => {
                warn!("{} returned {} for {}", self.backend, status, url);
                StoreError::unavailable(self.backend.as_str(), format!("HTTP {}", status))
            }
            ureq::Error::StatusCode(status) => {
                warn!("{} rejected request to {} with {}", self.backend, url, status);
                StoreError::BackendRejected {
                    backend: self.backend.to_string(),
                    message: format!("HTTP {} from {}", status, url.path()),
                }
            }
            other => {
                warn!("Transport error talking to {}: {}", self.backend, other);
                StoreError::unavailable(self.backend.as_str(), other)
            }
        }
    }
}

type RawReply = (u16, String, Vec<(String, String)>);

fn send_blocking(
    agent: &ureq::Agent,
    method: Method,
    url: &str,
    headers: &[(String, String)],
    body: Option<&str>,
) -> std::result::Result<RawReply, ureq::Error> {
    let mut response = match method {
        Method::Get => with_headers(agent.get(url), headers).call()?,
        Method::Delete => with_headers(agent.delete(url), headers).call()?,
        Method::Post => {
            let builder = with_headers(agent.post(url), headers);
            match body {
                Some(body) => builder.send(body)?,
                None => builder.send_empty()?,
            }
        }
    };

    let status = response.status().as_u16();
    let reply_headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    let text = response.body_mut().read_to_string()?;

    Ok((status, text, reply_headers))
}

fn with_headers<B>(
    mut builder: ureq::RequestBuilder<B>,
    headers: &[(String, String)],
) -> ureq::RequestBuilder<B> {
    for (key, value) in headers {
        builder = builder.header(key.as_str(), value.as_str());
    }
    builder
}

