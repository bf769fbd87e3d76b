//! HTTP POST transport for PTZ commands.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tokio::time::timeout;

use crate::error::{Result, ScoutError};
use crate::http::{build_camera_http_client, HttpReply};

use super::Credentials;

pub const CONTENT_SOAP: &str = "application/soap+xml; charset=utf-8";
pub const CONTENT_JSON: &str = "application/json";

/// One outgoing PTZ request.
#[derive(Debug, Clone)]
pub struct PostRequest {
    pub url:          String,
    pub content_type: &'static str,
    pub body:         String,
    /// Sent as HTTP basic credentials when present.
    pub basic_auth:   Option<Credentials>,
    pub timeout:      Duration,
}

/// Sends a request and returns whatever the device answered.
///
/// Non-2xx answers are `Ok`; only transport failures and timeouts are `Err`.
#[async_trait]
pub trait PtzTransport: Send + Sync {
    async fn post(&self, request: PostRequest) -> Result<HttpReply>;
}

/// Permissive `reqwest` transport (self-signed device certificates accepted).
pub struct ReqwestTransport {
    http: Client,
}

impl ReqwestTransport {
    pub fn new(default_timeout: Duration) -> Result<Self> {
        Ok(ReqwestTransport { http: build_camera_http_client(default_timeout)? })
    }

    async fn send(&self, request: PostRequest) -> Result<HttpReply> {
        let mut builder = self
            .http
            .post(&request.url)
            .header(CONTENT_TYPE, request.content_type)
            .timeout(request.timeout)
            .body(request.body);
        if let Some(creds) = &request.basic_auth {
            builder = builder.basic_auth(&creds.username, Some(&creds.password));
        }
        let resp = builder.send().await?;
        HttpReply::read(resp).await
    }
}

#[async_trait]
impl PtzTransport for ReqwestTransport {
    async fn post(&self, request: PostRequest) -> Result<HttpReply> {
        let limit = request.timeout;
        let url = request.url.clone();
        timeout(limit, self.send(request))
            .await
            .map_err(|_| ScoutError::Device(format!("{url}: timed out after {limit:?}")))?
    }
}
