//! Permissive HTTP client shared by fingerprinting and PTZ control.
//!
//! Camera HTTP calls accept any TLS certificate and hostname: the devices in
//! scope serve self-signed certificates from their embedded web servers.

use std::time::Duration;

use reqwest::{Client, Response};

use crate::error::{Result, ScoutError};

/// Status and body of a completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body:   String,
}

impl HttpReply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        HttpReply { status, body: body.into() }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }

    /// Drain a `reqwest` response into an owned reply.
    pub async fn read(resp: Response) -> Result<Self> {
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        Ok(HttpReply { status, body })
    }
}

/// Build the permissive HTTP client used for all camera calls.
///
/// `timeout` is the client-wide default; individual requests may set a
/// shorter one.
pub fn build_camera_http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .timeout(timeout)
        .build()
        .map_err(ScoutError::Http)
}
