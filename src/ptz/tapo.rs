//! Tapo vendor PTZ client.
//!
//! Two phases:
//!   1. `login` POSTs JSON credentials to the device root; the reply embeds a
//!      session token as `stok=<token>/`
//!   2. commands POST `{method, parameters}` to `{scheme}://{host}/stok={token}/ds`
//!
//! A command issued without a token logs in first. Zoom is not exposed by
//! these devices and is accepted without any network I/O.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use serde_json::{json, Value};

use crate::config::ScoutConfig;
use crate::error::{Result, ScoutError};
use crate::http::HttpReply;

use super::transport::{PostRequest, PtzTransport, CONTENT_JSON};
use super::{clamp_speed, wire_preset_id, Credentials, Protocol, PtzController, SessionState};

const STOK_MARKER: &str = "stok=";

/// `error_code` returned when the session token is no longer valid.
const ERR_SESSION_EXPIRED: i64 = -40401;

pub struct TapoClient {
    host:        String,
    credentials: Credentials,
    transport:   Arc<dyn PtzTransport>,
    scheme:      String,
    timeout:     Duration,
    state:       SessionState,
    stok:        Option<String>,
}

impl TapoClient {
    pub fn new(
        host:        &str,
        credentials: Credentials,
        transport:   Arc<dyn PtzTransport>,
        cfg:         &ScoutConfig,
    ) -> Self {
        TapoClient {
            host: host.to_string(),
            credentials,
            transport,
            scheme:  cfg.tapo_scheme.clone(),
            timeout: cfg.tapo_timeout,
            state:   SessionState::Unauthenticated,
            stok:    None,
        }
    }

    fn login_url(&self) -> String {
        format!("{}://{}", self.scheme, self.host)
    }

    fn command_url(&self, stok: &str) -> String {
        format!("{}://{}/stok={stok}/ds", self.scheme, self.host)
    }

    async fn post_json(&self, url: String, payload: &Value) -> Result<HttpReply> {
        self.transport
            .post(PostRequest {
                url,
                content_type: CONTENT_JSON,
                body:         serde_json::to_string(payload)?,
                basic_auth:   None,
                timeout:      self.timeout,
            })
            .await
    }

    fn invalidate(&mut self) {
        self.stok = None;
        self.state = SessionState::Unauthenticated;
    }

    /// Post the login call and keep the returned token.
    async fn login(&mut self) -> Result<()> {
        let payload = json!({
            "method": "login",
            "parameters": {
                "username": self.credentials.username,
                "password": self.credentials.password,
            }
        });
        let reply = match self.post_json(self.login_url(), &payload).await {
            Ok(r) => r,
            Err(e) => {
                self.invalidate();
                return Err(e);
            }
        };
        match extract_stok(&reply.body) {
            Some(stok) => {
                debug!("Tapo {}: session established", self.host);
                self.stok = Some(stok);
                self.state = SessionState::Authenticated;
                Ok(())
            }
            None => {
                self.invalidate();
                Err(ScoutError::Auth(format!(
                    "{}: login returned no session token (HTTP {})",
                    self.host, reply.status
                )))
            }
        }
    }

    /// Current token, logging in first when there is none.
    async fn ensure_session(&mut self) -> Result<String> {
        if let Some(stok) = &self.stok {
            return Ok(stok.clone());
        }
        info!("Tapo {}: no session token, logging in", self.host);
        self.login().await?;
        self.stok
            .clone()
            .ok_or_else(|| ScoutError::Auth(format!("{}: login kept no token", self.host)))
    }

    /// Send a `do` request with `parameters` under the current session.
    async fn send_command(&mut self, parameters: Value) -> Result<()> {
        let stok = self.ensure_session().await?;
        let payload = json!({ "method": "do", "parameters": parameters });
        let reply = self.post_json(self.command_url(&stok), &payload).await?;

        let code = error_code(&reply.body);
        if reply.is_unauthorized() || code == Some(ERR_SESSION_EXPIRED) {
            self.invalidate();
            return Err(ScoutError::Auth(format!("{}: session token rejected", self.host)));
        }
        if !reply.is_success() {
            return Err(ScoutError::Device(format!("{}: HTTP {}", self.host, reply.status)));
        }
        match code {
            Some(c) if c != 0 => Err(ScoutError::Device(format!("{}: error_code {c}", self.host))),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl PtzController for TapoClient {
    fn protocol(&self) -> Protocol {
        Protocol::Tapo
    }

    fn address(&self) -> &str {
        &self.host
    }

    fn state(&self) -> SessionState {
        self.state
    }

    async fn connect(&mut self) -> Result<()> {
        self.login().await
    }

    /// The zoom component is ignored.
    async fn move_axes(&mut self, pan: f32, tilt: f32, _zoom: f32) -> Result<()> {
        self.send_command(motion_parameters(pan, tilt)).await
    }

    async fn zoom(&mut self, speed: f32) -> Result<()> {
        debug!("Tapo {}: zoom {speed} ignored, not supported", self.host);
        Ok(())
    }

    /// Without a session nothing can be moving on our behalf, so this is a
    /// no-op rather than a login.
    async fn stop(&mut self) -> Result<()> {
        if self.stok.is_none() {
            debug!("Tapo {}: stop without a session, nothing to do", self.host);
            return Ok(());
        }
        self.send_command(json!({ "motor": { "stop": {} } })).await
    }

    async fn goto_preset(&mut self, index: u32) -> Result<()> {
        self.send_command(preset_parameters(index)).await
    }

    fn disconnect(&mut self) {
        self.invalidate();
    }
}

/// Token between `stok=` and the following `/`.
pub fn extract_stok(body: &str) -> Option<String> {
    let start = body.find(STOK_MARKER)? + STOK_MARKER.len();
    let len = body[start..].find('/')?;
    if len == 0 {
        return None;
    }
    Some(body[start..start + len].to_string())
}

fn error_code(body: &str) -> Option<i64> {
    serde_json::from_str::<Value>(body)
        .ok()?
        .get("error_code")?
        .as_i64()
}

fn motion_parameters(pan: f32, tilt: f32) -> Value {
    json!({
        "motor": {
            "move": {
                "x_coord": clamp_speed(pan).to_string(),
                "y_coord": clamp_speed(tilt).to_string(),
            }
        }
    })
}

fn preset_parameters(index: u32) -> Value {
    json!({
        "preset": {
            "goto_preset": { "id": wire_preset_id(index).to_string() }
        }
    })
}
