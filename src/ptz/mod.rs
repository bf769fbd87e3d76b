//! Pan-tilt-zoom control over two incompatible protocols.
//!
//! Both variants share one session state machine:
//!
//! ```text
//! Unauthenticated ──login / handshake ok──▶ Authenticated
//!        ▲                                       │
//!        └──── disconnect | auth rejected ◀──────┘
//! ```
//!
//! Tapo: a command issued while `Unauthenticated` first logs in, and fails
//! with the login. ONVIF carries credentials on every request, so the first
//! accepted command is itself the transition.
//! Success means "the device accepted the request", not "the device moved".

pub mod endpoint;
pub mod onvif;
pub mod tapo;
pub mod transport;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ScoutConfig;
use crate::error::{Result, ScoutError};

use self::onvif::OnvifClient;
use self::tapo::TapoClient;
use self::transport::{PtzTransport, ReqwestTransport};

/// Speed used by the direction wrappers.
pub const DEFAULT_SPEED: f32 = 0.5;

/// Wire protocol spoken to a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Vendor JSON API with `stok` session tokens.
    Tapo,
    /// ONVIF SOAP with per-request HTTP credentials.
    Onvif,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tapo  => f.write_str("tapo"),
            Protocol::Onvif => f.write_str("onvif"),
        }
    }
}

impl FromStr for Protocol {
    type Err = ScoutError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tapo"  => Ok(Protocol::Tapo),
            "onvif" => Ok(Protocol::Onvif),
            other   => Err(ScoutError::Config(format!("unknown protocol {other:?}"))),
        }
    }
}

/// Account used against the camera.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials { username: username.into(), password: password.into() }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
}

/// Direction buttons bound by the shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
    ZoomIn,
    ZoomOut,
}

impl FromStr for Direction {
    type Err = ScoutError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up"                => Ok(Direction::Up),
            "down"              => Ok(Direction::Down),
            "left"              => Ok(Direction::Left),
            "right"             => Ok(Direction::Right),
            "in" | "zoom-in"    => Ok(Direction::ZoomIn),
            "out" | "zoom-out"  => Ok(Direction::ZoomOut),
            other => Err(ScoutError::Config(format!("unknown direction {other:?}"))),
        }
    }
}

/// Clamp a speed into `[-1.0, 1.0]`; NaN and negative zero become `0.0`.
pub fn clamp_speed(v: f32) -> f32 {
    if v.is_nan() || v == 0.0 {
        0.0
    } else {
        v.clamp(-1.0, 1.0)
    }
}

/// Wire preset identifier for a 0-based preset index.
pub fn wire_preset_id(index: u32) -> u64 {
    u64::from(index) + 1
}

/// Capability set shared by both protocol variants.
///
/// Speeds are signed: positive pan is right, positive tilt is up, positive
/// zoom is tele.
#[async_trait]
pub trait PtzController: Send {
    fn protocol(&self) -> Protocol;

    /// Device address this controller is bound to.
    fn address(&self) -> &str;

    fn state(&self) -> SessionState;

    /// Manufacturer and model learned from the device, when known.
    fn device_label(&self) -> Option<String> {
        None
    }

    /// Establish or validate a session.
    async fn connect(&mut self) -> Result<()>;

    /// Continuous motion on all three axes.
    async fn move_axes(&mut self, pan: f32, tilt: f32, zoom: f32) -> Result<()>;

    /// Continuous zoom only.
    async fn zoom(&mut self, speed: f32) -> Result<()> {
        self.move_axes(0.0, 0.0, speed).await
    }

    /// Halt every axis.
    async fn stop(&mut self) -> Result<()>;

    /// Move to the preset at 0-based `index`.
    async fn goto_preset(&mut self, index: u32) -> Result<()>;

    /// Drop the session. Always succeeds.
    fn disconnect(&mut self);

    async fn move_up(&mut self, speed: f32) -> Result<()> {
        self.move_axes(0.0, speed, 0.0).await
    }

    async fn move_down(&mut self, speed: f32) -> Result<()> {
        self.move_axes(0.0, -speed, 0.0).await
    }

    async fn move_left(&mut self, speed: f32) -> Result<()> {
        self.move_axes(-speed, 0.0, 0.0).await
    }

    async fn move_right(&mut self, speed: f32) -> Result<()> {
        self.move_axes(speed, 0.0, 0.0).await
    }

    async fn zoom_in(&mut self, speed: f32) -> Result<()> {
        self.zoom(speed).await
    }

    async fn zoom_out(&mut self, speed: f32) -> Result<()> {
        self.zoom(-speed).await
    }

    async fn move_direction(&mut self, direction: Direction, speed: f32) -> Result<()> {
        match direction {
            Direction::Up      => self.move_up(speed).await,
            Direction::Down    => self.move_down(speed).await,
            Direction::Left    => self.move_left(speed).await,
            Direction::Right   => self.move_right(speed).await,
            Direction::ZoomIn  => self.zoom_in(speed).await,
            Direction::ZoomOut => self.zoom_out(speed).await,
        }
    }
}

/// Build a controller for `host` speaking `protocol` over the real network.
pub fn build_controller(
    protocol:    Protocol,
    host:        &str,
    credentials: Credentials,
    cfg:         &ScoutConfig,
) -> Result<Box<dyn PtzController>> {
    let controller: Box<dyn PtzController> = match protocol {
        Protocol::Tapo => {
            let transport: Arc<dyn PtzTransport> = Arc::new(ReqwestTransport::new(cfg.tapo_timeout)?);
            Box::new(TapoClient::new(host, credentials, transport, cfg))
        }
        Protocol::Onvif => {
            let transport: Arc<dyn PtzTransport> = Arc::new(ReqwestTransport::new(cfg.onvif_timeout)?);
            Box::new(OnvifClient::new(host, credentials, transport, cfg))
        }
    };
    Ok(controller)
}
