use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
}

/// One outbound panel request. The session cookie travels as an
/// explicit header value; there is no cookie jar, the cached session is
/// the only cookie state this crate knows about.
#[derive(Debug, Clone)]
pub struct PanelRequest {
    pub method: Method,
    pub url: String,
    pub cookie: Option<String>,
    pub form: Option<Vec<(String, String)>>,
    pub json: Option<serde_json::Value>,
    pub timeout: Duration,
}

impl PanelRequest {
    pub fn get(url: String, cookie: Option<String>, timeout: Duration) -> Self {
        Self {
            method: Method::Get,
            url,
            cookie,
            form: None,
            json: None,
            timeout,
        }
    }

    pub fn post_json(
        url: String,
        cookie: Option<String>,
        body: serde_json::Value,
        timeout: Duration,
    ) -> Self {
        Self {
            method: Method::Post,
            url,
            cookie,
            form: None,
            json: Some(body),
            timeout,
        }
    }

    pub fn post_form(
        url: String,
        cookie: Option<String>,
        form: Vec<(String, String)>,
        timeout: Duration,
    ) -> Self {
        Self {
            method: Method::Post,
            url,
            cookie,
            form: Some(form),
            json: None,
            timeout,
        }
    }

    pub fn delete(url: String, cookie: Option<String>, timeout: Duration) -> Self {
        Self {
            method: Method::Delete,
            url,
            cookie,
            form: None,
            json: None,
            timeout,
        }
    }
}

/// A response that made it back from the panel, whatever its status.
/// `set_cookie` carries the raw Set-Cookie header when the panel sent
/// one (the login endpoint does).
#[derive(Debug, Clone)]
pub struct PanelResponse {
    pub status: u16,
    pub set_cookie: Option<String>,
    pub body: String,
}

impl PanelResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Network-level failure: the request never produced a panel response.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("transport failure: {0}")]
    Other(String),
}

#[async_trait]
pub trait PanelTransport: Send + Sync {
    async fn execute(&self, request: PanelRequest) -> Result<PanelResponse, TransportError>;
}

/// reqwest-backed transport. One shared client; per-request timeouts
/// come from the caller's retry policy.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// For panels behind self-signed certificates, which self-hosted
    /// 3x-UI installs commonly are.
    pub fn insecure() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| TransportError::Other(e.to_string()))?;
        Ok(Self { client })
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PanelTransport for HttpTransport {
    async fn execute(&self, request: PanelRequest) -> Result<PanelResponse, TransportError> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
            Method::Delete => self.client.delete(&request.url),
        }
        .timeout(request.timeout);

        if let Some(cookie) = &request.cookie {
            builder = builder.header(reqwest::header::COOKIE, cookie);
        }
        if let Some(form) = &request.form {
            builder = builder.form(form);
        }
        if let Some(json) = &request.json {
            builder = builder.json(json);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else if e.is_connect() {
                TransportError::Connect(e.to_string())
            } else {
                TransportError::Other(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let set_cookie = response
            .headers()
            .get(reqwest::header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Other(e.to_string()))?;

        Ok(PanelResponse {
            status,
            set_cookie,
            body,
        })
    }
}
