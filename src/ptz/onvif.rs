//! ONVIF PTZ client.
//!
//! Every command is a SOAP 1.2 envelope POSTed to the first endpoint of an
//! ordered candidate list that answers 2xx. Credentials ride on every request
//! as HTTP basic auth; there is no login call.
//!
//! `connect()` sends `GetDeviceInformation` down a separate candidate list
//! and is optional: commands never call it.
//! The two lists are configured independently and may disagree: a device can
//! pass `connect()` on an endpoint that commands never try.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::config::ScoutConfig;
use crate::error::{Result, ScoutError};
use crate::http::HttpReply;

use super::endpoint::EndpointTemplate;
use super::transport::{PostRequest, PtzTransport, CONTENT_SOAP};
use super::{clamp_speed, wire_preset_id, Credentials, Protocol, PtzController, SessionState};

const NS_SOAP:   &str = "http://www.w3.org/2003/05/soap-envelope";
const NS_PTZ:    &str = "http://www.onvif.org/ver20/ptz/wsdl";
const NS_SCHEMA: &str = "http://www.onvif.org/ver10/schema";
const NS_DEVICE: &str = "http://www.onvif.org/ver10/device/wsdl";

/// Fields of a `GetDeviceInformationResponse`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInformation {
    pub manufacturer:     String,
    pub model:            String,
    pub firmware_version: String,
    pub serial_number:    String,
}

pub struct OnvifClient {
    host:              String,
    credentials:       Credentials,
    transport:         Arc<dyn PtzTransport>,
    connect_endpoints: Vec<EndpointTemplate>,
    ptz_endpoints:     Vec<EndpointTemplate>,
    profile_token:     String,
    timeout:           Duration,
    state:             SessionState,
    device_info:       Option<DeviceInformation>,
}

impl OnvifClient {
    pub fn new(
        host:        &str,
        credentials: Credentials,
        transport:   Arc<dyn PtzTransport>,
        cfg:         &ScoutConfig,
    ) -> Self {
        OnvifClient {
            host: host.to_string(),
            credentials,
            transport,
            connect_endpoints: cfg.onvif_connect_endpoints.clone(),
            ptz_endpoints:     cfg.onvif_ptz_endpoints.clone(),
            profile_token:     cfg.onvif_profile_token.clone(),
            timeout:           cfg.onvif_timeout,
            state:             SessionState::Unauthenticated,
            device_info:       None,
        }
    }

    /// POST `envelope` to each candidate in order; the first 2xx wins.
    ///
    /// Individual candidate failures are only logged. Exhausting the list is
    /// an `Auth` error if any candidate answered 401, `EndpointsExhausted`
    /// otherwise.
    async fn post_first(
        &self,
        endpoints: &[EndpointTemplate],
        action:    &str,
        envelope:  &str,
    ) -> Result<HttpReply> {
        let mut unauthorized = false;
        for endpoint in endpoints {
            let url = endpoint.render(&self.host);
            let request = PostRequest {
                url:          url.clone(),
                content_type: CONTENT_SOAP,
                body:         envelope.to_string(),
                basic_auth:   Some(self.credentials.clone()),
                timeout:      self.timeout,
            };
            match self.transport.post(request).await {
                Ok(reply) if reply.is_success() => {
                    debug!("ONVIF {action} accepted by {url}");
                    return Ok(reply);
                }
                Ok(reply) => {
                    unauthorized |= reply.is_unauthorized();
                    debug!("ONVIF {action} at {url}: HTTP {}", reply.status);
                }
                Err(e) => debug!("ONVIF {action} at {url}: {e}"),
            }
        }
        if unauthorized {
            Err(ScoutError::Auth(format!("{} rejected the credentials", self.host)))
        } else {
            Err(ScoutError::EndpointsExhausted { attempted: endpoints.len() })
        }
    }

    /// Send a PTZ service command down the command list.
    ///
    /// No handshake precedes it: the first accepted command is what moves
    /// an unauthenticated session to `Authenticated`.
    async fn command(&mut self, action: &str, body: String) -> Result<()> {
        let envelope = soap_envelope(&body);
        match self.post_first(&self.ptz_endpoints, action, &envelope).await {
            Ok(_) => {
                self.state = SessionState::Authenticated;
                Ok(())
            }
            Err(e) => {
                if matches!(e, ScoutError::Auth(_)) {
                    self.state = SessionState::Unauthenticated;
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl PtzController for OnvifClient {
    fn protocol(&self) -> Protocol {
        Protocol::Onvif
    }

    fn address(&self) -> &str {
        &self.host
    }

    fn state(&self) -> SessionState {
        self.state
    }

    fn device_label(&self) -> Option<String> {
        let info = self.device_info.as_ref()?;
        Some(format!("{} {}", info.manufacturer, info.model))
    }

    async fn connect(&mut self) -> Result<()> {
        let envelope = soap_envelope(&get_device_information_body());
        match self.post_first(&self.connect_endpoints, "GetDeviceInformation", &envelope).await {
            Ok(reply) => {
                self.state = SessionState::Authenticated;
                match parse_device_information(&reply.body) {
                    Ok(info) => {
                        info!(
                            "ONVIF {}: {} {} (firmware {})",
                            self.host, info.manufacturer, info.model, info.firmware_version
                        );
                        self.device_info = Some(info);
                    }
                    Err(e) => debug!("ONVIF {}: unreadable device information: {e}", self.host),
                }
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Unauthenticated;
                Err(e)
            }
        }
    }

    async fn move_axes(&mut self, pan: f32, tilt: f32, zoom: f32) -> Result<()> {
        let body = continuous_move_body(&self.profile_token, pan, tilt, zoom);
        self.command("ContinuousMove", body).await
    }

    async fn stop(&mut self) -> Result<()> {
        let body = stop_body(&self.profile_token);
        self.command("Stop", body).await
    }

    async fn goto_preset(&mut self, index: u32) -> Result<()> {
        let body = goto_preset_body(&self.profile_token, index);
        self.command("GotoPreset", body).await
    }

    fn disconnect(&mut self) {
        self.state = SessionState::Unauthenticated;
        self.device_info = None;
    }
}

// ── SOAP bodies ───────────────────────────────────────────────────────────────

fn soap_envelope(body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="{NS_SOAP}" xmlns:tptz="{NS_PTZ}" xmlns:tt="{NS_SCHEMA}" xmlns:tds="{NS_DEVICE}">
  <s:Body>
    {body}
  </s:Body>
</s:Envelope>"#
    )
}

fn get_device_information_body() -> String {
    "<tds:GetDeviceInformation/>".to_string()
}

fn continuous_move_body(profile: &str, pan: f32, tilt: f32, zoom: f32) -> String {
    format!(
        r#"<tptz:ContinuousMove>
      <tptz:ProfileToken>{profile}</tptz:ProfileToken>
      <tptz:Velocity>
        <tt:PanTilt x="{}" y="{}"/>
        <tt:Zoom x="{}"/>
      </tptz:Velocity>
    </tptz:ContinuousMove>"#,
        clamp_speed(pan),
        clamp_speed(tilt),
        clamp_speed(zoom)
    )
}

fn stop_body(profile: &str) -> String {
    format!(
        r#"<tptz:Stop>
      <tptz:ProfileToken>{profile}</tptz:ProfileToken>
      <tptz:PanTilt>true</tptz:PanTilt>
      <tptz:Zoom>true</tptz:Zoom>
    </tptz:Stop>"#
    )
}

fn goto_preset_body(profile: &str, index: u32) -> String {
    format!(
        r#"<tptz:GotoPreset>
      <tptz:ProfileToken>{profile}</tptz:ProfileToken>
      <tptz:PresetToken>preset_{}</tptz:PresetToken>
      <tptz:Speed>
        <tt:PanTilt x="1.0" y="1.0"/>
        <tt:Zoom x="1.0"/>
      </tptz:Speed>
    </tptz:GotoPreset>"#,
        wire_preset_id(index)
    )
}

/// Extract the interesting fields of a `GetDeviceInformationResponse`,
/// matching on local element names so any namespace prefix works.
pub fn parse_device_information(xml: &str) -> Result<DeviceInformation> {
    let mut reader = Reader::from_str(xml);
    let mut info = DeviceInformation::default();
    let mut current: Option<Vec<u8>> = None;
    let mut seen = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.local_name().as_ref().to_vec();
                seen |= name == b"GetDeviceInformationResponse";
                current = Some(name);
            }
            Event::Text(t) => {
                let Some(name) = current.as_deref() else { continue };
                let text = t.unescape()?.trim().to_string();
                match name {
                    b"Manufacturer"    => info.manufacturer     = text,
                    b"Model"           => info.model            = text,
                    b"FirmwareVersion" => info.firmware_version = text,
                    b"SerialNumber"    => info.serial_number    = text,
                    _ => {}
                }
            }
            Event::End(_) => current = None,
            Event::Eof => break,
            _ => {}
        }
    }

    if seen {
        Ok(info)
    } else {
        Err(ScoutError::Protocol("no GetDeviceInformationResponse element".into()))
    }
}
